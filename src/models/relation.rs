use ahash::HashMap;
use indexmap::IndexSet;
use std::collections::BTreeSet;
use std::sync::Mutex;

use crate::models::datalog::{AttributeKind, Row, Value};
use crate::models::index::{Index, IndexOrder, SearchColumns};

pub type RowSet = IndexSet<Row, ahash::RandomState>;

/// A named set of fixed-arity tuples with lazily materialized ordered
/// indices. The insertion-ordered row set backs full scans and existence
/// tests; ordered views are built on first demand and kept in sync on
/// insert.
pub struct Relation {
    name: String,
    arity: usize,
    kinds: Vec<AttributeKind>,
    equivalence: bool,
    rows: RowSet,
    indices: Mutex<HashMap<IndexOrder, Index>>,
}

impl Relation {
    pub fn new(name: &str, kinds: Vec<AttributeKind>) -> Self {
        Self {
            name: name.to_string(),
            arity: kinds.len(),
            kinds,
            equivalence: false,
            rows: Default::default(),
            indices: Mutex::new(Default::default()),
        }
    }

    /// A binary relation that auto-closes under reflexivity, symmetry and
    /// transitivity on insert.
    pub fn new_equivalence(name: &str, kind: AttributeKind) -> Self {
        Self {
            name: name.to_string(),
            arity: 2,
            kinds: vec![kind, kind],
            equivalence: true,
            rows: Default::default(),
            indices: Mutex::new(Default::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arity(&self) -> usize {
        self.arity
    }

    pub fn kinds(&self) -> &[AttributeKind] {
        &self.kinds
    }

    pub fn is_equivalence(&self) -> bool {
        self.equivalence
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Existence test through the total view.
    pub fn contains(&self, row: &[Value]) -> bool {
        self.rows.contains(row)
    }

    /// Yields every tuple exactly once, in insertion order.
    pub fn scan(&self) -> impl Iterator<Item = &Row> {
        self.rows.iter()
    }

    /// Splits a full scan into roughly balanced sub-iterators for parallel
    /// consumption.
    pub fn partition(&self, parts: usize) -> Vec<RelationSlice<'_>> {
        let parts = parts.max(1);
        let chunk = (self.rows.len() + parts - 1) / parts.max(1);
        if chunk == 0 {
            return vec![];
        }
        (0..self.rows.len())
            .step_by(chunk)
            .map(|start| RelationSlice {
                relation: self,
                next: start,
                end: (start + chunk).min(self.rows.len()),
            })
            .collect()
    }

    /// Adds a tuple, returning whether the relation changed. For an
    /// equivalence relation the implied closure pairs are added as well.
    pub fn insert(&mut self, row: &[Value]) -> bool {
        assert_eq!(row.len(), self.arity, "arity mismatch on insert into {}", self.name);

        if self.equivalence {
            let implied = self.extend(row);
            let mut changed = false;
            for pair in implied {
                changed |= self.insert_raw(&pair);
            }
            changed
        } else {
            self.insert_raw(row)
        }
    }

    fn insert_raw(&mut self, row: &[Value]) -> bool {
        let inserted = self.rows.insert(row.to_vec().into_boxed_slice());
        if inserted {
            let mut indices = self.indices.lock().unwrap();
            indices.values_mut().for_each(|index| index.insert(row));
        }
        inserted
    }

    /// Set-union with another relation of equal arity.
    pub fn insert_all(&mut self, other: &Relation) -> bool {
        assert_eq!(self.arity, other.arity);
        let mut changed = false;
        let incoming: Vec<Row> = other.rows.iter().cloned().collect();
        for row in incoming {
            changed |= self.insert(&row);
        }
        changed
    }

    /// All pairs newly implied by inserting `pair` under the
    /// reflexive-symmetric-transitive closure, given the current contents.
    /// Only meaningful for equivalence relations.
    pub fn extend(&self, pair: &[Value]) -> Vec<Row> {
        assert_eq!(pair.len(), 2);
        let (a, b) = (pair[0], pair[1]);

        // Contents are kept closed, so each class can be read off the
        // pairs touching a representative.
        let mut members: BTreeSet<Value> = BTreeSet::new();
        members.insert(a);
        members.insert(b);
        for row in self.rows.iter() {
            if row[0] == a || row[0] == b {
                members.insert(row[1]);
            }
        }

        let mut implied = vec![];
        for &x in &members {
            for &y in &members {
                let candidate = [x, y];
                if !self.rows.contains(&candidate[..]) {
                    implied.push(candidate.to_vec().into_boxed_slice());
                }
            }
        }
        implied
    }

    /// Removes all tuples; keeps the index structure.
    pub fn purge(&mut self) {
        self.rows.clear();
        let mut indices = self.indices.lock().unwrap();
        indices.values_mut().for_each(Index::purge);
    }

    /// Exchanges tuple contents and materialized indices with another
    /// relation of the same schema.
    pub fn swap_contents(&mut self, other: &mut Relation) {
        assert_eq!(self.arity, other.arity);
        std::mem::swap(&mut self.rows, &mut other.rows);
        std::mem::swap(
            self.indices.get_mut().unwrap(),
            other.indices.get_mut().unwrap(),
        );
    }

    /// Makes sure an ordered view with the given order exists.
    pub fn ensure_order(&self, order: IndexOrder) {
        let mut indices = self.indices.lock().unwrap();
        indices
            .entry(order)
            .or_insert_with_key(|order| self.build_index(order.clone()));
    }

    fn build_index(&self, order: IndexOrder) -> Index {
        let mut index = Index::new(order);
        self.rows.iter().for_each(|row| index.insert(row));
        index
    }

    fn with_index<R>(&self, columns: SearchColumns, f: impl FnOnce(&Index) -> R) -> R {
        let mut indices = self.indices.lock().unwrap();
        if let Some(index) = indices.values().find(|index| index.order().covers(columns)) {
            return f(index);
        }
        let order = IndexOrder::from_search(columns, self.arity);
        let index = indices
            .entry(order)
            .or_insert_with_key(|order| self.build_index(order.clone()));
        f(index)
    }

    /// Equal-range lookup over an ordered view compatible with the bound
    /// columns; one is materialized on first demand. Bounds are full-width
    /// keys with unbound positions padded to the domain minimum/maximum.
    pub fn range(&self, columns: SearchColumns, lower: &[Value], upper: &[Value]) -> Vec<Row> {
        self.with_index(columns, |index| index.range(lower, upper))
    }

    pub fn is_range_empty(
        &self,
        columns: SearchColumns,
        lower: &[Value],
        upper: &[Value],
    ) -> bool {
        self.with_index(columns, |index| index.is_range_empty(lower, upper))
    }
}

impl Clone for Relation {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            arity: self.arity,
            kinds: self.kinds.clone(),
            equivalence: self.equivalence,
            rows: self.rows.clone(),
            indices: Mutex::new(self.indices.lock().unwrap().clone()),
        }
    }
}

impl std::fmt::Debug for Relation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Relation")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .field("rows", &self.rows.len())
            .finish()
    }
}

impl PartialEq for Relation {
    fn eq(&self, other: &Self) -> bool {
        self.arity == other.arity
            && self.rows.len() == other.rows.len()
            && self.rows.iter().all(|row| other.rows.contains(row))
    }
}

/// A borrowed slice of a relation's scan, produced by `partition`.
pub struct RelationSlice<'a> {
    relation: &'a Relation,
    next: usize,
    end: usize,
}

impl<'a> Iterator for RelationSlice<'a> {
    type Item = &'a Row;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.end {
            return None;
        }
        let row = self.relation.rows.get_index(self.next);
        self.next += 1;
        row
    }
}

#[cfg(test)]
mod tests {
    use super::Relation;
    use crate::models::datalog::{AttributeKind, MAX_VALUE, MIN_VALUE};
    use crate::models::index::column_mask;

    fn numbers(arity: usize) -> Vec<AttributeKind> {
        vec![AttributeKind::Number; arity]
    }

    #[test]
    fn test_set_semantics() {
        use rand::prelude::*;

        let mut relation = Relation::new("R", numbers(2));
        let mut rng = thread_rng();
        let mut expected = std::collections::BTreeSet::new();

        for _ in 0..2_000 {
            let row = [rng.gen_range(0..30), rng.gen_range(0..30)];
            expected.insert(row);
            relation.insert(&row);
        }

        assert_eq!(relation.len(), expected.len());
        for row in expected {
            assert!(relation.contains(&row));
        }
    }

    #[test]
    fn test_insert_reports_change() {
        let mut relation = Relation::new("R", numbers(2));

        assert!(relation.insert(&[1, 2]));
        assert!(!relation.insert(&[1, 2]));
        assert!(relation.insert(&[2, 1]));
    }

    #[test]
    fn test_range_lookup_matches_scan() {
        use rand::prelude::*;

        let mut relation = Relation::new("R", numbers(3));
        let mut rng = thread_rng();
        for _ in 0..1_000 {
            relation.insert(&[rng.gen_range(0..10), rng.gen_range(0..10), rng.gen_range(0..10)]);
        }

        for probe in 0..10 {
            let hits = relation.range(
                column_mask(&[1]),
                &[MIN_VALUE, probe, MIN_VALUE],
                &[MAX_VALUE, probe, MAX_VALUE],
            );
            let expected = relation.scan().filter(|row| row[1] == probe).count();
            assert_eq!(hits.len(), expected);
            assert!(hits.iter().all(|row| row[1] == probe));
        }
    }

    #[test]
    fn test_index_agreement_on_full_keys() {
        use rand::prelude::*;

        let mut relation = Relation::new("R", numbers(2));
        let mut rng = thread_rng();
        for _ in 0..500 {
            relation.insert(&[rng.gen_range(0..15), rng.gen_range(0..15)]);
        }

        for _ in 0..500 {
            let probe = [rng.gen_range(0..15), rng.gen_range(0..15)];
            let via_index = !relation.is_range_empty(column_mask(&[0, 1]), &probe, &probe);
            assert_eq!(via_index, relation.contains(&probe));
        }
    }

    #[test]
    fn test_indices_stay_in_sync_after_insert() {
        let mut relation = Relation::new("R", numbers(2));
        relation.insert(&[1, 1]);

        // Materialize an ordered view, then keep inserting.
        assert_eq!(relation.range(column_mask(&[0]), &[1, MIN_VALUE], &[1, MAX_VALUE]).len(), 1);
        relation.insert(&[1, 2]);
        relation.insert(&[2, 2]);

        assert_eq!(relation.range(column_mask(&[0]), &[1, MIN_VALUE], &[1, MAX_VALUE]).len(), 2);
    }

    #[test]
    fn test_equivalence_closure() {
        let mut eq = Relation::new_equivalence("EQ", AttributeKind::Number);

        eq.insert(&[1, 2]);
        eq.insert(&[2, 3]);

        assert_eq!(eq.len(), 9);
        for a in 1..=3 {
            for b in 1..=3 {
                assert!(eq.contains(&[a, b]));
            }
        }
    }

    #[test]
    fn test_equivalence_closure_fuzz() {
        use rand::prelude::*;

        let mut rng = thread_rng();
        for _ in 0..20 {
            let mut eq = Relation::new_equivalence("EQ", AttributeKind::Number);
            let pairs: Vec<[i32; 2]> = (0..12)
                .map(|_| [rng.gen_range(0..8), rng.gen_range(0..8)])
                .collect();
            pairs.iter().for_each(|pair| {
                eq.insert(pair);
            });

            // Reference closure over the mentioned elements.
            let mut closure: std::collections::BTreeSet<[i32; 2]> =
                pairs.iter().copied().collect();
            loop {
                let mut extended = closure.clone();
                for &[a, b] in &closure {
                    extended.insert([b, a]);
                    extended.insert([a, a]);
                    extended.insert([b, b]);
                    for &[c, d] in &closure {
                        if b == c {
                            extended.insert([a, d]);
                        }
                    }
                }
                if extended == closure {
                    break;
                }
                closure = extended;
            }

            assert_eq!(eq.len(), closure.len());
            for pair in closure {
                assert!(eq.contains(&pair));
            }
        }
    }

    #[test]
    fn test_partition_covers_scan() {
        let mut relation = Relation::new("R", numbers(1));
        for i in 0..100 {
            relation.insert(&[i]);
        }

        let mut seen = vec![];
        for part in relation.partition(7) {
            seen.extend(part.map(|row| row[0]));
        }
        seen.sort_unstable();

        assert_eq!(seen, (0..100).collect::<Vec<_>>());
    }

    #[test]
    fn test_purge_keeps_index_structure() {
        let mut relation = Relation::new("R", numbers(2));
        relation.insert(&[1, 2]);
        relation.range(column_mask(&[1]), &[MIN_VALUE, 2], &[MAX_VALUE, 2]);

        relation.purge();

        assert!(relation.is_empty());
        assert!(relation.is_range_empty(column_mask(&[1]), &[MIN_VALUE, 2], &[MAX_VALUE, 2]));
    }

    #[test]
    fn test_swap_contents() {
        let mut a = Relation::new("A", numbers(1));
        let mut b = Relation::new("B", numbers(1));
        a.insert(&[1]);
        b.insert(&[2]);
        b.insert(&[3]);

        a.swap_contents(&mut b);

        assert_eq!(a.len(), 2);
        assert_eq!(b.len(), 1);
        assert!(b.contains(&[1]));
        assert!(a.contains(&[2]));
    }
}
