use itertools::Itertools;
use std::collections::HashSet;

use crate::models::datalog::Atom;

/// Bodies above this size keep their written order; the search space
/// grows factorially.
pub const MAX_SCHEDULED_ATOMS: usize = 8;

const CROSS_PRODUCT_PENALTY: f64 = 1.0e6;

fn atom_variables(atom: &Atom) -> HashSet<String> {
    let mut variables = HashSet::new();
    atom.for_each_variable(&mut |name| {
        variables.insert(name.to_string());
    });
    variables
}

fn constant_positions(atom: &Atom) -> usize {
    atom.args.iter().filter(|arg| arg.is_constant()).count()
}

/// Scores one ordering: the sum over positions of the running product of
/// the sizes of atoms that still bind fresh variables, with a heavy
/// penalty for a scan disconnected from everything bound so far.
fn cost_of(order: &[usize], atoms: &[&Atom], sizes: &dyn Fn(&str) -> usize) -> f64 {
    let mut bound: HashSet<String> = HashSet::new();
    let mut product = 1.0f64;
    let mut cost = 0.0f64;

    for &position in order {
        let atom = atoms[position];
        let variables = atom_variables(atom);
        let fresh: Vec<_> = variables.difference(&bound).collect();

        if !fresh.is_empty() {
            let connected = variables.len() > fresh.len() || constant_positions(atom) > 0;
            let mut size = sizes(&atom.name).max(1) as f64;
            if !bound.is_empty() && !connected {
                size *= CROSS_PRODUCT_PENALTY;
            }
            product *= size;
        }
        cost += product;

        bound.extend(variables);
    }

    cost
}

/// Picks an evaluation order for a clause's positive body atoms: a
/// user-supplied plan wins outright, bodies of up to eight atoms get an
/// exhaustive cost search, and larger bodies keep the written order.
pub fn schedule(
    atoms: &[&Atom],
    sizes: &dyn Fn(&str) -> usize,
    plan: Option<&[usize]>,
) -> Vec<usize> {
    if let Some(plan) = plan {
        // Plans are written 1-based.
        return plan.iter().map(|position| position - 1).collect();
    }

    if atoms.len() < 2 || atoms.len() > MAX_SCHEDULED_ATOMS {
        return (0..atoms.len()).collect();
    }

    let mut best: Option<(f64, Vec<usize>)> = None;
    for order in (0..atoms.len()).permutations(atoms.len()) {
        let cost = cost_of(&order, atoms, sizes);
        match &best {
            Some((best_cost, _)) if cost >= *best_cost => {}
            _ => best = Some((cost, order)),
        }
    }

    best.map(|(_, order)| order).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::schedule;
    use crate::models::datalog::Clause;

    #[test]
    fn test_small_relation_is_scanned_first() {
        let clause = Clause::from("A(x) :- Big(x, y), Small(y).");
        let atoms = clause.positive_atoms();

        let order = schedule(
            &atoms,
            &|name| if name == "Big" { 100_000 } else { 1 },
            None,
        );

        assert_eq!(order, vec![1, 0]);
    }

    #[test]
    fn test_user_plan_overrides_search() {
        let clause = Clause::from("A(x) :- Big(x, y), Small(y).");
        let atoms = clause.positive_atoms();

        let order = schedule(
            &atoms,
            &|name| if name == "Big" { 100_000 } else { 1 },
            Some(&[1, 2]),
        );

        assert_eq!(order, vec![0, 1]);
    }

    #[test]
    fn test_large_bodies_keep_written_order() {
        let clause = Clause::from(
            "A(a) :- R1(a, b), R2(b, c), R3(c, d), R4(d, e), R5(e, f), R6(f, g), R7(g, h), R8(h, i), R9(i, j).",
        );
        let atoms = clause.positive_atoms();

        let order = schedule(&atoms, &|_| 10, None);

        assert_eq!(order, (0..9).collect::<Vec<_>>());
    }

    #[test]
    fn test_cross_products_are_avoided() {
        let clause = Clause::from("A(x, z) :- R(x, y), Unrelated(w), S(y, z), Uses(w, z).");
        let atoms = clause.positive_atoms();

        let order = schedule(&atoms, &|_| 100, None);

        // Whatever the exact order, the disconnected atom must not come
        // second while connected work is available.
        let unrelated = order.iter().position(|&i| i == 1).unwrap();
        assert!(unrelated > 1);
    }
}
