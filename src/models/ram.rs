use ahash::HashMap;
use itertools::Itertools;
use std::fmt::{Display, Formatter};

use crate::models::datalog::{
    AggregateOp, AttributeKind, BinaryOp, ConstraintOp, TernaryOp, UnaryOp, Value,
};
use crate::models::index::{IndexOrder, SearchColumns};

/// A value expression of the relational-algebra plan. Symbol constants are
/// interned during translation, so only raw domain values remain.
#[derive(Clone, PartialEq, Debug)]
pub enum RamValue {
    Number(Value),
    /// A field of the tuple bound at a nesting level of the enclosing
    /// operation tree.
    TupleElement {
        level: usize,
        position: usize,
    },
    AutoIncrement,
    UnaryOp {
        op: UnaryOp,
        arg: Box<RamValue>,
    },
    BinaryOp {
        op: BinaryOp,
        lhs: Box<RamValue>,
        rhs: Box<RamValue>,
    },
    TernaryOp {
        op: TernaryOp,
        args: Box<[RamValue; 3]>,
    },
    /// Packs the evaluated values into a record, yielding its id.
    Pack(Vec<RamValue>),
    /// The i-th argument of the current subroutine invocation.
    Argument(usize),
}

impl Display for RamValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            RamValue::Number(value) => write!(f, "{}", value),
            RamValue::TupleElement { level, position } => write!(f, "t{}[{}]", level, position),
            RamValue::AutoIncrement => write!(f, "$"),
            RamValue::UnaryOp { op, arg } => write!(f, "{}({})", op, arg),
            RamValue::BinaryOp { op, lhs, rhs } => write!(f, "({} {} {})", lhs, op, rhs),
            RamValue::TernaryOp { op, args } => {
                write!(f, "{}({}, {}, {})", op, args[0], args[1], args[2])
            }
            RamValue::Pack(values) => {
                write!(f, "[{}]", values.iter().map(|value| value.to_string()).join(", "))
            }
            RamValue::Argument(index) => write!(f, "arg({})", index),
        }
    }
}

/// A partial key over a relation's attributes: one entry per attribute,
/// `Some` for bound positions. The matching `SearchColumns` mask is kept
/// alongside wherever a pattern appears.
pub type RangePattern = Vec<Option<RamValue>>;

fn fmt_pattern(pattern: &RangePattern) -> String {
    pattern
        .iter()
        .map(|entry| match entry {
            Some(value) => value.to_string(),
            None => "_".to_string(),
        })
        .join(", ")
}

#[derive(Clone, PartialEq, Debug)]
pub enum RamCondition {
    /// Short-circuit conjunction.
    And(Box<RamCondition>, Box<RamCondition>),
    /// The relation currently holds no tuples.
    Empty(String),
    /// No tuple of the relation matches the partial key. `total` keys use
    /// a direct existence test, partial keys an empty-range test.
    NotExists {
        relation: String,
        columns: SearchColumns,
        pattern: RangePattern,
        total: bool,
    },
    Constraint {
        op: ConstraintOp,
        lhs: RamValue,
        rhs: RamValue,
    },
}

impl Display for RamCondition {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            RamCondition::And(lhs, rhs) => write!(f, "{} and {}", lhs, rhs),
            RamCondition::Empty(relation) => write!(f, "empty({})", relation),
            RamCondition::NotExists {
                relation, pattern, ..
            } => write!(f, "({}) not in {}", fmt_pattern(pattern), relation),
            RamCondition::Constraint { op, lhs, rhs } => write!(f, "{} {} {}", lhs, op, rhs),
        }
    }
}

/// One node of the operation tree nested inside an insert-query. Each
/// operation may bind one entry of the context stack before recursing.
#[derive(Clone, PartialEq, Debug)]
pub enum RamOperation {
    /// Iterates a relation, fully or over an index range. With
    /// `pure_existence` the nested operation runs at most once, keyed on
    /// non-emptiness.
    Scan {
        relation: String,
        level: usize,
        columns: SearchColumns,
        pattern: RangePattern,
        pure_existence: bool,
        nested: Box<RamOperation>,
    },
    /// Unpacks the record referenced by a bound tuple field, binding the
    /// record's fields at `level`. Null references skip the subtree.
    Lookup {
        ref_level: usize,
        ref_position: usize,
        level: usize,
        arity: usize,
        nested: Box<RamOperation>,
    },
    /// Folds an index range with min/max/count/sum, binding the single
    /// aggregated value as a one-tuple at `level`.
    Aggregate {
        op: AggregateOp,
        target: Option<RamValue>,
        relation: String,
        columns: SearchColumns,
        pattern: RangePattern,
        level: usize,
        condition: Option<RamCondition>,
        nested: Box<RamOperation>,
    },
    /// Runs the nested operation iff the condition holds.
    Filter {
        condition: RamCondition,
        nested: Box<RamOperation>,
    },
    /// Leaf: evaluates the values into a fresh tuple and inserts it into
    /// the target, unless the filter relation already contains it.
    Project {
        relation: String,
        values: Vec<RamValue>,
        filter: Option<String>,
    },
    /// Leaf: appends values to the current subroutine's return buffer.
    /// A `None` entry emits 0 with the error flag set.
    Return { values: Vec<Option<RamValue>> },
}

impl RamOperation {
    /// Number of context frames the tree needs.
    pub fn depth(&self) -> usize {
        match self {
            RamOperation::Scan { level, nested, .. }
            | RamOperation::Lookup { level, nested, .. }
            | RamOperation::Aggregate { level, nested, .. } => {
                (level + 1).max(nested.depth())
            }
            RamOperation::Filter { nested, .. } => nested.depth(),
            RamOperation::Project { .. } | RamOperation::Return { .. } => 0,
        }
    }

    fn fmt_indented(&self, f: &mut Formatter<'_>, indent: usize) -> std::fmt::Result {
        let pad = " ".repeat(indent);
        match self {
            RamOperation::Scan {
                relation,
                level,
                columns,
                pattern,
                pure_existence,
                nested,
            } => {
                if *columns == 0 {
                    writeln!(f, "{}for t{} in {}{}", pad, level, relation,
                        if *pure_existence { " (existence)" } else { "" })?;
                } else {
                    writeln!(
                        f,
                        "{}for t{} in {} on ({}){}",
                        pad,
                        level,
                        relation,
                        fmt_pattern(pattern),
                        if *pure_existence { " (existence)" } else { "" }
                    )?;
                }
                nested.fmt_indented(f, indent + 2)
            }
            RamOperation::Lookup {
                ref_level,
                ref_position,
                level,
                arity,
                nested,
            } => {
                writeln!(
                    f,
                    "{}unpack t{} := t{}[{}] arity {}",
                    pad, level, ref_level, ref_position, arity
                )?;
                nested.fmt_indented(f, indent + 2)
            }
            RamOperation::Aggregate {
                op,
                target,
                relation,
                pattern,
                level,
                nested,
                ..
            } => {
                match target {
                    Some(target) => writeln!(
                        f,
                        "{}t{} := {} {} over {} on ({})",
                        pad, level, op, target, relation, fmt_pattern(pattern)
                    )?,
                    None => writeln!(
                        f,
                        "{}t{} := {} over {} on ({})",
                        pad, level, op, relation, fmt_pattern(pattern)
                    )?,
                }
                nested.fmt_indented(f, indent + 2)
            }
            RamOperation::Filter { condition, nested } => {
                writeln!(f, "{}if {}", pad, condition)?;
                nested.fmt_indented(f, indent + 2)
            }
            RamOperation::Project {
                relation,
                values,
                filter,
            } => match filter {
                Some(filter) => writeln!(
                    f,
                    "{}project ({}) into {} unless in {}",
                    pad,
                    values.iter().map(|value| value.to_string()).join(", "),
                    relation,
                    filter
                ),
                None => writeln!(
                    f,
                    "{}project ({}) into {}",
                    pad,
                    values.iter().map(|value| value.to_string()).join(", "),
                    relation
                ),
            },
            RamOperation::Return { values } => writeln!(
                f,
                "{}return ({})",
                pad,
                values
                    .iter()
                    .map(|value| match value {
                        Some(value) => value.to_string(),
                        None => "⊥".to_string(),
                    })
                    .join(", ")
            ),
        }
    }
}

impl Display for RamOperation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        self.fmt_indented(f, 0)
    }
}

/// Schema of a relation created by a `Create` statement, including the
/// index orders chosen for it ahead of time.
#[derive(Clone, PartialEq, Debug)]
pub struct RamRelation {
    pub name: String,
    pub attributes: Vec<String>,
    pub kinds: Vec<AttributeKind>,
    pub equivalence: bool,
    pub orders: Vec<IndexOrder>,
}

impl RamRelation {
    pub fn arity(&self) -> usize {
        self.kinds.len()
    }
}

#[derive(Clone, PartialEq, Debug)]
pub enum RamStatement {
    Create(RamRelation),
    /// Inserts one constant tuple.
    Fact {
        relation: String,
        values: Vec<RamValue>,
    },
    Load {
        relation: String,
        options: Vec<(String, String)>,
    },
    Store {
        relation: String,
        options: Vec<(String, String)>,
    },
    Clear(String),
    Drop(String),
    /// Set-union of the source into the target; an equivalence target
    /// closes over the merged tuples.
    Merge {
        source: String,
        target: String,
    },
    Swap(String, String),
    /// An insert-query: the home of every rule body.
    Query(RamOperation),
    Sequence(Vec<RamStatement>),
    Parallel(Vec<RamStatement>),
    Loop(Box<RamStatement>),
    /// Terminates the enclosing loop after the current iteration when the
    /// condition holds.
    Exit(RamCondition),
    /// Tags the nested statement with the rule it was compiled from; the
    /// message contextualizes runtime faults.
    DebugInfo {
        message: String,
        nested: Box<RamStatement>,
    },
    /// Writes a profile event with start/end/elapsed appended.
    LogTimer {
        message: String,
        nested: Box<RamStatement>,
    },
    /// Writes a profile event with the relation's size appended.
    LogSize {
        message: String,
        relation: String,
    },
}

impl RamStatement {
    fn fmt_indented(&self, f: &mut Formatter<'_>, indent: usize) -> std::fmt::Result {
        let pad = " ".repeat(indent);
        match self {
            RamStatement::Create(relation) => {
                writeln!(
                    f,
                    "{}create {} arity {}{}",
                    pad,
                    relation.name,
                    relation.arity(),
                    if relation.equivalence { " eqrel" } else { "" }
                )
            }
            RamStatement::Fact { relation, values } => writeln!(
                f,
                "{}fact {}({})",
                pad,
                relation,
                values.iter().map(|value| value.to_string()).join(", ")
            ),
            RamStatement::Load { relation, .. } => writeln!(f, "{}load {}", pad, relation),
            RamStatement::Store { relation, .. } => writeln!(f, "{}store {}", pad, relation),
            RamStatement::Clear(relation) => writeln!(f, "{}clear {}", pad, relation),
            RamStatement::Drop(relation) => writeln!(f, "{}drop {}", pad, relation),
            RamStatement::Merge { source, target } => {
                writeln!(f, "{}merge {} into {}", pad, source, target)
            }
            RamStatement::Swap(left, right) => writeln!(f, "{}swap {} {}", pad, left, right),
            RamStatement::Query(operation) => {
                writeln!(f, "{}query", pad)?;
                operation.fmt_indented(f, indent + 2)
            }
            RamStatement::Sequence(statements) => {
                for statement in statements {
                    statement.fmt_indented(f, indent)?;
                }
                Ok(())
            }
            RamStatement::Parallel(statements) => {
                writeln!(f, "{}parallel", pad)?;
                for statement in statements {
                    statement.fmt_indented(f, indent + 2)?;
                }
                Ok(())
            }
            RamStatement::Loop(body) => {
                writeln!(f, "{}loop", pad)?;
                body.fmt_indented(f, indent + 2)
            }
            RamStatement::Exit(condition) => writeln!(f, "{}exit if {}", pad, condition),
            RamStatement::DebugInfo { nested, .. } => nested.fmt_indented(f, indent),
            RamStatement::LogTimer { nested, .. } => nested.fmt_indented(f, indent),
            RamStatement::LogSize { .. } => Ok(()),
        }
    }
}

impl Display for RamStatement {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        self.fmt_indented(f, 0)
    }
}

/// The compiled plan: a main statement plus named subroutines invocable
/// with argument values. Immutable after translation.
pub struct RamProgram {
    pub main: RamStatement,
    pub subroutines: HashMap<String, RamStatement>,
}

impl RamProgram {
    pub fn new(main: RamStatement) -> Self {
        Self {
            main,
            subroutines: Default::default(),
        }
    }
}

impl Display for RamProgram {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        self.main.fmt(f)
    }
}
