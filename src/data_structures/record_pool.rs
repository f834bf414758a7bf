use ahash::HashMap;
use std::sync::RwLock;

use crate::models::datalog::{Row, Value};

/// Id of the null record, produced by the `nil` constant.
pub const NULL_RECORD: Value = 0;

struct PoolInner {
    ids: HashMap<Row, Value>,
    rows: Vec<Row>,
}

/// Interner for nested records. A record value is an index into this pool;
/// identical records share an id, and id 0 is reserved for the null record.
pub struct RecordPool {
    inner: RwLock<PoolInner>,
}

impl RecordPool {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(PoolInner {
                ids: Default::default(),
                // Slot 0 stands in for the null record.
                rows: vec![Row::from(vec![])],
            }),
        }
    }

    /// Returns the stable id of `tuple`, interning it on first sight.
    pub fn pack(&self, tuple: &[Value]) -> Value {
        {
            let inner = self.inner.read().unwrap();
            if let Some(id) = inner.ids.get(tuple) {
                return *id;
            }
        }

        let mut inner = self.inner.write().unwrap();
        if let Some(id) = inner.ids.get(tuple) {
            return *id;
        }
        let id = inner.rows.len() as Value;
        let row: Row = tuple.to_vec().into_boxed_slice();
        inner.ids.insert(row.clone(), id);
        inner.rows.push(row);
        id
    }

    /// Resolves a record id back into its tuple. The null record and ids
    /// of a different arity yield `None`.
    pub fn unpack(&self, id: Value, arity: usize) -> Option<Row> {
        if id == NULL_RECORD {
            return None;
        }
        let inner = self.inner.read().unwrap();
        inner
            .rows
            .get(id as usize)
            .filter(|row| row.len() == arity)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap().rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() <= 1
    }
}

impl Default for RecordPool {
    fn default() -> Self {
        Self::new()
    }
}
