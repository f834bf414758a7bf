use lasso::{Key, Spur, ThreadedRodeo};

use crate::models::datalog::Value;

/// Process-wide string interner. Symbols and relation constants share one
/// id space; ids are dense, monotonic and never reused, so symbol ids
/// generated during a run are stable.
pub struct SymbolTable {
    rodeo: ThreadedRodeo,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self {
            rodeo: ThreadedRodeo::new(),
        }
    }

    /// Interns `symbol`, returning its id. Safe to call concurrently.
    pub fn intern(&self, symbol: &str) -> Value {
        self.rodeo.get_or_intern(symbol).into_usize() as Value
    }

    /// Looks a symbol up without interning it.
    pub fn lookup(&self, symbol: &str) -> Option<Value> {
        self.rodeo.get(symbol).map(|spur| spur.into_usize() as Value)
    }

    /// Resolves an id produced by `intern`. Passing an id that never came
    /// out of this table is a programmer error.
    pub fn resolve(&self, id: Value) -> &str {
        let spur = Spur::try_from_usize(id as usize).unwrap();
        self.rodeo.resolve(&spur)
    }

    pub fn len(&self) -> usize {
        self.rodeo.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rodeo.is_empty()
    }
}

impl Default for SymbolTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::SymbolTable;

    #[test]
    fn test_intern_resolve_round_trip() {
        let symbols = SymbolTable::new();

        let a = symbols.intern("ancestor");
        let b = symbols.intern("descendant");

        assert_eq!(symbols.resolve(a), "ancestor");
        assert_eq!(symbols.resolve(b), "descendant");
        assert_ne!(a, b);
        assert_eq!(symbols.intern("ancestor"), a);
    }

    #[test]
    fn test_ids_are_insertion_ordered() {
        let symbols = SymbolTable::new();

        let ids: Vec<_> = ["a", "b", "c", "d"]
            .iter()
            .map(|symbol| symbols.intern(symbol))
            .collect();

        let mut sorted = ids.clone();
        sorted.sort_unstable();
        assert_eq!(ids, sorted);
    }

    #[test]
    fn test_concurrent_intern() {
        use std::sync::Arc;

        let symbols = Arc::new(SymbolTable::new());

        let handles: Vec<_> = (0..4)
            .map(|worker| {
                let symbols = Arc::clone(&symbols);
                std::thread::spawn(move || {
                    (0..256)
                        .map(|i| symbols.intern(&format!("sym-{}", (i + worker) % 64)))
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(symbols.len(), 64);
        for i in 0..64 {
            let name = format!("sym-{}", i);
            assert_eq!(symbols.resolve(symbols.lookup(&name).unwrap()), name);
        }
    }
}
