use petgraph::algo::tarjan_scc;
use petgraph::graphmap::DiGraphMap;
use std::collections::{HashMap, HashSet};

use crate::models::datalog::{Argument, Clause, Literal, SrcLocation};

/// How one relation depends on another inside a clause body.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum DependencyKind {
    Positive,
    Negative,
    Aggregate,
}

/// A maximal strongly-connected component of the relation dependency
/// graph. Strata are produced in evaluation order: dependencies first.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Stratum {
    pub relations: Vec<String>,
    pub recursive: bool,
}

/// A cycle through a negated or aggregated atom, fatal for translation.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct CycleError {
    pub relation: String,
    pub through: String,
    pub kind: DependencyKind,
    pub location: SrcLocation,
}

fn aggregate_atoms<'a>(argument: &'a Argument, out: &mut Vec<&'a crate::models::datalog::Atom>) {
    match argument {
        Argument::Aggregate { atom, .. } => out.push(atom),
        Argument::UnaryOp { arg, .. } => aggregate_atoms(arg, out),
        Argument::BinaryOp { lhs, rhs, .. } => {
            aggregate_atoms(lhs, out);
            aggregate_atoms(rhs, out);
        }
        Argument::TernaryOp { args, .. } => args.iter().for_each(|arg| aggregate_atoms(arg, out)),
        Argument::RecordInit { fields } => {
            fields.iter().for_each(|field| aggregate_atoms(field, out))
        }
        _ => {}
    }
}

fn merge_kind(existing: Option<DependencyKind>, incoming: DependencyKind) -> DependencyKind {
    // A negative or aggregate edge between the same pair dominates.
    match existing {
        None | Some(DependencyKind::Positive) => incoming,
        Some(kept) => kept,
    }
}

/// Builds the relation-level dependency graph: an edge from a body
/// relation towards the head relation that uses it.
pub fn dependency_graph<'a>(clauses: &'a [Clause]) -> DiGraphMap<&'a str, DependencyKind> {
    let mut graph: DiGraphMap<&str, DependencyKind> = DiGraphMap::new();

    for clause in clauses {
        graph.add_node(clause.head.name.as_str());
        for literal in &clause.body {
            let mut add = |source: &'a str, kind: DependencyKind| {
                let kept = merge_kind(graph.edge_weight(source, &clause.head.name).copied(), kind);
                graph.add_edge(source, &clause.head.name, kept);
            };
            match literal {
                Literal::Atom(atom) => {
                    add(&atom.name, DependencyKind::Positive);
                    let mut aggregates = vec![];
                    atom.args
                        .iter()
                        .for_each(|arg| aggregate_atoms(arg, &mut aggregates));
                    for aggregated in aggregates {
                        add(&aggregated.name, DependencyKind::Aggregate);
                    }
                }
                Literal::Negation(atom) => add(&atom.name, DependencyKind::Negative),
                Literal::BinaryConstraint { lhs, rhs, .. } => {
                    let mut aggregates = vec![];
                    aggregate_atoms(lhs, &mut aggregates);
                    aggregate_atoms(rhs, &mut aggregates);
                    for aggregated in aggregates {
                        add(&aggregated.name, DependencyKind::Aggregate);
                    }
                }
                Literal::BooleanConstraint { .. } => {}
            }
        }
    }

    graph
}

/// Computes the strata of a program in evaluation order. Fails when a
/// cycle runs through a negated or aggregated atom, naming the offending
/// literal's location.
pub fn stratify(clauses: &[Clause]) -> Result<Vec<Stratum>, CycleError> {
    let graph = dependency_graph(clauses);

    let mut sccs = tarjan_scc(&graph);
    // tarjan yields dependents first; evaluation wants dependencies first.
    sccs.reverse();

    let mut component: HashMap<&str, usize> = HashMap::new();
    for (i, scc) in sccs.iter().enumerate() {
        for relation in scc {
            component.insert(relation, i);
        }
    }

    // Reject non-positive edges inside a component.
    for clause in clauses {
        let head_component = component.get(clause.head.name.as_str());
        for literal in &clause.body {
            let offending = match literal {
                Literal::Negation(atom) => {
                    (component.get(atom.name.as_str()) == head_component)
                        .then(|| (atom.name.clone(), DependencyKind::Negative, atom.location))
                }
                Literal::Atom(atom) => {
                    let mut aggregates = vec![];
                    atom.args
                        .iter()
                        .for_each(|arg| aggregate_atoms(arg, &mut aggregates));
                    aggregates
                        .into_iter()
                        .find(|aggregated| {
                            component.get(aggregated.name.as_str()) == head_component
                        })
                        .map(|aggregated| {
                            (aggregated.name.clone(), DependencyKind::Aggregate, aggregated.location)
                        })
                }
                Literal::BinaryConstraint { lhs, rhs, location, .. } => {
                    let mut aggregates = vec![];
                    aggregate_atoms(lhs, &mut aggregates);
                    aggregate_atoms(rhs, &mut aggregates);
                    aggregates
                        .into_iter()
                        .find(|aggregated| {
                            component.get(aggregated.name.as_str()) == head_component
                        })
                        .map(|aggregated| {
                            (aggregated.name.clone(), DependencyKind::Aggregate, *location)
                        })
                }
                Literal::BooleanConstraint { .. } => None,
            };
            if let Some((through, kind, location)) = offending {
                return Err(CycleError {
                    relation: clause.head.name.clone(),
                    through,
                    kind,
                    location,
                });
            }
        }
    }

    let strata = sccs
        .into_iter()
        .map(|scc| {
            let recursive = scc.len() > 1
                || scc
                    .first()
                    .map(|relation| graph.contains_edge(relation, relation))
                    .unwrap_or(false);
            Stratum {
                relations: scc.into_iter().map(|relation| relation.to_string()).collect(),
                recursive,
            }
        })
        .collect();

    Ok(strata)
}

#[cfg(test)]
mod tests {
    use super::{stratify, DependencyKind};
    use crate::models::datalog::Clause;

    fn position_of(strata: &[super::Stratum], relation: &str) -> usize {
        strata
            .iter()
            .position(|stratum| stratum.relations.iter().any(|name| name == relation))
            .unwrap()
    }

    #[test]
    fn test_dependencies_come_first() {
        let clauses = vec![
            Clause::from("T(x, y) :- E(x, y)."),
            Clause::from("T(x, z) :- T(x, y), E(y, z)."),
            Clause::from("Q(x) :- T(x, x)."),
        ];

        let strata = stratify(&clauses).unwrap();

        assert!(position_of(&strata, "E") < position_of(&strata, "T"));
        assert!(position_of(&strata, "T") < position_of(&strata, "Q"));
    }

    #[test]
    fn test_self_recursion_is_flagged() {
        let clauses = vec![
            Clause::from("T(x, y) :- E(x, y)."),
            Clause::from("T(x, z) :- T(x, y), E(y, z)."),
        ];

        let strata = stratify(&clauses).unwrap();

        let t = &strata[position_of(&strata, "T")];
        assert!(t.recursive);
        let e = &strata[position_of(&strata, "E")];
        assert!(!e.recursive);
    }

    #[test]
    fn test_mutual_recursion_shares_a_stratum() {
        let clauses = vec![
            Clause::from("Even(x) :- Zero(x)."),
            Clause::from("Even(y) :- Odd(x), Succ(x, y)."),
            Clause::from("Odd(y) :- Even(x), Succ(x, y)."),
        ];

        let strata = stratify(&clauses).unwrap();

        assert_eq!(position_of(&strata, "Even"), position_of(&strata, "Odd"));
    }

    #[test]
    fn test_negation_outside_cycles_is_accepted() {
        let clauses = vec![
            Clause::from("P(x) :- E(x)."),
            Clause::from("Q(x) :- P(x), !R(x)."),
        ];

        let strata = stratify(&clauses).unwrap();

        assert!(position_of(&strata, "R") < position_of(&strata, "Q"));
    }

    #[test]
    fn test_cyclic_negation_is_rejected() {
        let clauses = vec![
            Clause::from("P(x) :- E(x)."),
            Clause::from("Q(x) :- P(x), !R(x)."),
            Clause::from("R(x) :- Q(x)."),
        ];

        let error = stratify(&clauses).unwrap_err();

        assert_eq!(error.through, "R");
        assert_eq!(error.kind, DependencyKind::Negative);
    }
}
