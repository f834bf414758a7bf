use std::collections::BTreeSet;

use crate::models::index::{IndexOrder, SearchColumns};

/// Computes a minimum-cardinality set of index orders for one relation
/// such that every observed bound-column set is a prefix of some order.
///
/// Search sets ordered by strict inclusion form chains, and each chain
/// collapses into a single order (the smaller set's columns first, then
/// each successor's difference). A maximum matching over the inclusion
/// relation yields a minimum chain cover.
pub fn minimal_orders(arity: usize, searches: &BTreeSet<SearchColumns>) -> Vec<IndexOrder> {
    let searches: Vec<SearchColumns> = {
        let mut sorted: Vec<_> = searches
            .iter()
            .copied()
            .filter(|&columns| columns != 0)
            .collect();
        sorted.sort_by_key(|columns| (columns.count_ones(), *columns));
        sorted
    };
    if searches.is_empty() {
        return vec![];
    }

    // Edges of the inclusion relation, both endpoints as indices into the
    // sorted search list.
    let adjacency: Vec<Vec<usize>> = searches
        .iter()
        .map(|&small| {
            searches
                .iter()
                .enumerate()
                .filter(|&(_, &big)| small != big && small & big == small)
                .map(|(j, _)| j)
                .collect()
        })
        .collect();

    let matched_into = max_matching(&adjacency, searches.len());

    // Successor along the chain for each search, inverted from the
    // matching.
    let mut successor: Vec<Option<usize>> = vec![None; searches.len()];
    for (j, predecessor) in matched_into.iter().enumerate() {
        if let Some(i) = predecessor {
            successor[*i] = Some(j);
        }
    }

    let mut orders = vec![];
    for head in 0..searches.len() {
        if matched_into[head].is_some() {
            continue;
        }
        // Walk the chain, appending each step's fresh columns.
        let mut order: Vec<usize> = vec![];
        let mut covered: SearchColumns = 0;
        let mut current = Some(head);
        while let Some(i) = current {
            let fresh = searches[i] & !covered;
            order.extend((0..arity).filter(|column| fresh & (1 << column) != 0));
            covered |= searches[i];
            current = successor[i];
        }
        order.extend((0..arity).filter(|column| covered & (1 << column) == 0));
        orders.push(IndexOrder::new(order));
    }

    orders
}

/// Kuhn's augmenting-path maximum bipartite matching. Returns, per right
/// node, the left node matched into it.
fn max_matching(adjacency: &[Vec<usize>], right_count: usize) -> Vec<Option<usize>> {
    let mut matched_into: Vec<Option<usize>> = vec![None; right_count];

    fn augment(
        left: usize,
        adjacency: &[Vec<usize>],
        matched_into: &mut Vec<Option<usize>>,
        visited: &mut Vec<bool>,
    ) -> bool {
        for &right in &adjacency[left] {
            if visited[right] {
                continue;
            }
            visited[right] = true;
            let free = match matched_into[right] {
                None => true,
                Some(other) => augment(other, adjacency, matched_into, visited),
            };
            if free {
                matched_into[right] = Some(left);
                return true;
            }
        }
        false
    }

    for left in 0..adjacency.len() {
        let mut visited = vec![false; right_count];
        augment(left, adjacency, &mut matched_into, &mut visited);
    }

    matched_into
}

#[cfg(test)]
mod tests {
    use super::minimal_orders;
    use crate::models::index::column_mask;
    use std::collections::BTreeSet;

    fn searches(masks: &[&[usize]]) -> BTreeSet<u32> {
        masks.iter().map(|columns| column_mask(columns)).collect()
    }

    #[test]
    fn test_nested_searches_share_one_order() {
        let orders = minimal_orders(3, &searches(&[&[0], &[0, 1], &[0, 1, 2]]));

        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].positions(), &[0, 1, 2]);
    }

    #[test]
    fn test_disjoint_searches_need_separate_orders() {
        let orders = minimal_orders(2, &searches(&[&[0], &[1]]));

        assert_eq!(orders.len(), 2);
    }

    #[test]
    fn test_orders_are_complete_permutations() {
        let orders = minimal_orders(4, &searches(&[&[2], &[1, 2]]));

        assert_eq!(orders.len(), 1);
        let mut positions = orders[0].positions().to_vec();
        assert_eq!(positions[0], 2);
        positions.sort_unstable();
        assert_eq!(positions, vec![0, 1, 2, 3]);
    }

    #[test]
    fn test_every_search_is_covered_fuzz() {
        use rand::prelude::*;

        let mut rng = thread_rng();
        for _ in 0..200 {
            let arity = rng.gen_range(1..=6usize);
            let mut demanded = BTreeSet::new();
            for _ in 0..rng.gen_range(1..10) {
                demanded.insert(rng.gen_range(1..(1u32 << arity)));
            }

            let orders = minimal_orders(arity, &demanded);

            for columns in demanded {
                assert!(
                    orders.iter().any(|order| order.covers(columns)),
                    "search {:b} not covered",
                    columns
                );
            }
        }
    }

    #[test]
    fn test_cover_is_minimal_on_chains() {
        // Two interleaved chains: {0} ⊂ {0,1} and {2} ⊂ {2,3}.
        let orders = minimal_orders(4, &searches(&[&[0], &[0, 1], &[2], &[2, 3]]));

        assert_eq!(orders.len(), 2);
    }
}
