use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};
use std::ops::Bound;

use crate::models::datalog::{Row, Value};

/// Bound attribute positions of a lookup, encoded as a bitmask. Bit `i`
/// set means column `i` carries a concrete key value.
pub type SearchColumns = u32;

pub fn column_mask(columns: &[usize]) -> SearchColumns {
    columns.iter().fold(0, |mask, column| mask | (1 << column))
}

pub fn total_columns(arity: usize) -> SearchColumns {
    if arity == 0 {
        0
    } else {
        (1 << arity) - 1
    }
}

/// A complete permutation of attribute positions defining the sort order
/// of one index.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct IndexOrder {
    order: Vec<usize>,
}

impl IndexOrder {
    pub fn new(order: Vec<usize>) -> Self {
        Self { order }
    }

    pub fn identity(arity: usize) -> Self {
        Self {
            order: (0..arity).collect(),
        }
    }

    /// The order whose prefix is exactly the bound columns of `columns`
    /// (ascending), with the free columns appended.
    pub fn from_search(columns: SearchColumns, arity: usize) -> Self {
        let mut order: Vec<usize> = (0..arity).filter(|i| columns & (1 << i) != 0).collect();
        order.extend((0..arity).filter(|i| columns & (1 << i) == 0));
        Self { order }
    }

    pub fn arity(&self) -> usize {
        self.order.len()
    }

    pub fn positions(&self) -> &[usize] {
        &self.order
    }

    /// Whether every bound column of `columns` falls inside this order's
    /// leading prefix, making the order usable for that lookup.
    pub fn covers(&self, columns: SearchColumns) -> bool {
        let bound = columns.count_ones() as usize;
        if bound > self.order.len() {
            return false;
        }
        self.order[..bound]
            .iter()
            .all(|position| columns & (1 << position) != 0)
    }

    fn permute(&self, row: &[Value]) -> Row {
        self.order.iter().map(|position| row[*position]).collect()
    }

    fn restore(&self, permuted: &[Value]) -> Row {
        let mut row = vec![0; permuted.len()];
        self.order
            .iter()
            .enumerate()
            .for_each(|(i, position)| row[*position] = permuted[i]);
        row.into_boxed_slice()
    }
}

impl Display for IndexOrder {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "<{}>",
            self.order
                .iter()
                .map(|position| position.to_string())
                .collect::<Vec<_>>()
                .join(" ")
        )
    }
}

/// An ordered view of a relation: rows sorted lexicographically over the
/// permuted columns, supporting equal-range lookups by any prefix.
#[derive(Clone, PartialEq, Debug)]
pub struct Index {
    order: IndexOrder,
    rows: BTreeSet<Row>,
}

impl Index {
    pub fn new(order: IndexOrder) -> Self {
        Self {
            order,
            rows: BTreeSet::new(),
        }
    }

    pub fn order(&self) -> &IndexOrder {
        &self.order
    }

    pub fn insert(&mut self, row: &[Value]) {
        self.rows.insert(self.order.permute(row));
    }

    pub fn contains(&self, row: &[Value]) -> bool {
        self.rows.contains(&self.order.permute(row))
    }

    /// Inclusive range between two full-width keys, yielding rows in their
    /// original attribute order. Unbound positions of the caller's pattern
    /// are expected to be padded with the domain minimum and maximum.
    pub fn range(&self, lower: &[Value], upper: &[Value]) -> Vec<Row> {
        let lower = self.order.permute(lower);
        let upper = self.order.permute(upper);
        if lower > upper {
            return vec![];
        }
        self.rows
            .range((Bound::Included(lower), Bound::Included(upper)))
            .map(|permuted| self.order.restore(permuted))
            .collect()
    }

    pub fn is_range_empty(&self, lower: &[Value], upper: &[Value]) -> bool {
        let lower = self.order.permute(lower);
        let upper = self.order.permute(upper);
        if lower > upper {
            return true;
        }
        self.rows
            .range((Bound::Included(lower), Bound::Included(upper)))
            .next()
            .is_none()
    }

    pub fn purge(&mut self) {
        self.rows.clear();
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::{column_mask, total_columns, Index, IndexOrder};
    use crate::models::datalog::{MAX_VALUE, MIN_VALUE};

    #[test]
    fn test_order_from_search_puts_bound_columns_first() {
        let order = IndexOrder::from_search(column_mask(&[2]), 3);

        assert_eq!(order.positions(), &[2, 0, 1]);
        assert!(order.covers(column_mask(&[2])));
        assert!(!order.covers(column_mask(&[1])));
    }

    #[test]
    fn test_identity_order_covers_every_prefix() {
        let order = IndexOrder::identity(3);

        assert!(order.covers(0));
        assert!(order.covers(column_mask(&[0])));
        assert!(order.covers(column_mask(&[0, 1])));
        assert!(order.covers(total_columns(3)));
    }

    #[test]
    fn test_range_by_prefix() {
        let mut index = Index::new(IndexOrder::from_search(column_mask(&[1]), 2));
        [[1, 10], [2, 10], [3, 20], [4, 10]]
            .iter()
            .for_each(|row| index.insert(row));

        let hits = index.range(&[MIN_VALUE, 10], &[MAX_VALUE, 10]);

        let mut firsts: Vec<_> = hits.iter().map(|row| row[0]).collect();
        firsts.sort_unstable();
        assert_eq!(firsts, vec![1, 2, 4]);
        assert!(hits.iter().all(|row| row[1] == 10));
    }

    #[test]
    fn test_full_key_range_agrees_with_contains() {
        use rand::prelude::*;

        let mut rng = thread_rng();
        let order = IndexOrder::from_search(column_mask(&[1, 2]), 3);
        let mut index = Index::new(order);

        let rows: Vec<[i32; 3]> = (0..500)
            .map(|_| [rng.gen_range(0..20), rng.gen_range(0..20), rng.gen_range(0..20)])
            .collect();
        rows.iter().for_each(|row| index.insert(row));

        for _ in 0..500 {
            let probe = [rng.gen_range(0..20), rng.gen_range(0..20), rng.gen_range(0..20)];
            let via_range = !index.is_range_empty(&probe, &probe);
            assert_eq!(via_range, index.contains(&probe));
        }
    }

    #[test]
    fn test_range_restores_attribute_order() {
        let mut index = Index::new(IndexOrder::new(vec![1, 0]));
        index.insert(&[7, 8]);

        assert_eq!(index.range(&[7, 8], &[7, 8])[0].as_ref(), &[7, 8]);
    }
}
