use itertools::Itertools;
use std::fmt::{Display, Formatter};

use crate::parsers::datalog::{parse_clause, parse_program};

/// The value domain. Numbers, interned symbols and record ids all share it
/// and compare bit-exact.
pub type Value = i32;

pub const MIN_VALUE: Value = Value::MIN;
pub const MAX_VALUE: Value = Value::MAX;

/// A materialized tuple of fixed arity.
pub type Row = Box<[Value]>;

/// Resolved kind of an attribute.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum AttributeKind {
    Number,
    Symbol,
    Record,
}

/// Position of a token in the source program, kept on AST nodes so that
/// diagnostics can point back at the offending literal.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct SrcLocation {
    pub line: usize,
    pub column: usize,
}

impl Display for SrcLocation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}:{}]", self.line, self.column)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum UnaryOp {
    Neg,
    Bnot,
    Lnot,
    Ord,
    Strlen,
    Sin,
    Cos,
    Tan,
    Exp,
    Log,
}

impl UnaryOp {
    pub fn from_name(name: &str) -> Option<UnaryOp> {
        match name {
            "bnot" => Some(UnaryOp::Bnot),
            "lnot" => Some(UnaryOp::Lnot),
            "ord" => Some(UnaryOp::Ord),
            "strlen" => Some(UnaryOp::Strlen),
            "sin" => Some(UnaryOp::Sin),
            "cos" => Some(UnaryOp::Cos),
            "tan" => Some(UnaryOp::Tan),
            "exp" => Some(UnaryOp::Exp),
            "log" => Some(UnaryOp::Log),
            _ => None,
        }
    }

    /// Whether the functor consumes and produces symbols rather than numbers.
    pub fn on_symbols(&self) -> bool {
        matches!(self, UnaryOp::Ord | UnaryOp::Strlen)
    }
}

impl Display for UnaryOp {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            UnaryOp::Neg => "-",
            UnaryOp::Bnot => "bnot",
            UnaryOp::Lnot => "lnot",
            UnaryOp::Ord => "ord",
            UnaryOp::Strlen => "strlen",
            UnaryOp::Sin => "sin",
            UnaryOp::Cos => "cos",
            UnaryOp::Tan => "tan",
            UnaryOp::Exp => "exp",
            UnaryOp::Log => "log",
        };
        write!(f, "{}", name)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Band,
    Bor,
    Bxor,
    Land,
    Lor,
    Min,
    Max,
    Cat,
}

impl BinaryOp {
    pub fn from_name(name: &str) -> Option<BinaryOp> {
        match name {
            "min" => Some(BinaryOp::Min),
            "max" => Some(BinaryOp::Max),
            "cat" => Some(BinaryOp::Cat),
            _ => None,
        }
    }
}

impl Display for BinaryOp {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Pow => "^",
            BinaryOp::Band => "band",
            BinaryOp::Bor => "bor",
            BinaryOp::Bxor => "bxor",
            BinaryOp::Land => "land",
            BinaryOp::Lor => "lor",
            BinaryOp::Min => "min",
            BinaryOp::Max => "max",
            BinaryOp::Cat => "cat",
        };
        write!(f, "{}", name)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum TernaryOp {
    Substr,
}

impl Display for TernaryOp {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            TernaryOp::Substr => write!(f, "substr"),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum AggregateOp {
    Min,
    Max,
    Count,
    Sum,
}

impl Display for AggregateOp {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            AggregateOp::Min => "min",
            AggregateOp::Max => "max",
            AggregateOp::Count => "count",
            AggregateOp::Sum => "sum",
        };
        write!(f, "{}", name)
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum ConstraintOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Match,
    NotMatch,
    Contains,
    NotContains,
}

impl ConstraintOp {
    pub fn negated(&self) -> ConstraintOp {
        match self {
            ConstraintOp::Eq => ConstraintOp::Ne,
            ConstraintOp::Ne => ConstraintOp::Eq,
            ConstraintOp::Lt => ConstraintOp::Ge,
            ConstraintOp::Le => ConstraintOp::Gt,
            ConstraintOp::Gt => ConstraintOp::Le,
            ConstraintOp::Ge => ConstraintOp::Lt,
            ConstraintOp::Match => ConstraintOp::NotMatch,
            ConstraintOp::NotMatch => ConstraintOp::Match,
            ConstraintOp::Contains => ConstraintOp::NotContains,
            ConstraintOp::NotContains => ConstraintOp::Contains,
        }
    }

    pub fn on_symbols(&self) -> bool {
        matches!(
            self,
            ConstraintOp::Match
                | ConstraintOp::NotMatch
                | ConstraintOp::Contains
                | ConstraintOp::NotContains
        )
    }
}

impl Display for ConstraintOp {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ConstraintOp::Eq => "=",
            ConstraintOp::Ne => "!=",
            ConstraintOp::Lt => "<",
            ConstraintOp::Le => "<=",
            ConstraintOp::Gt => ">",
            ConstraintOp::Ge => ">=",
            ConstraintOp::Match => "match",
            ConstraintOp::NotMatch => "!match",
            ConstraintOp::Contains => "contains",
            ConstraintOp::NotContains => "!contains",
        };
        write!(f, "{}", name)
    }
}

/// An argument expression inside an atom or constraint.
#[derive(Clone, PartialEq, Debug)]
pub enum Argument {
    Variable(String),
    UnnamedVariable,
    Counter,
    NumberConstant(Value),
    SymbolConstant(String),
    NullConstant,
    UnaryOp {
        op: UnaryOp,
        arg: Box<Argument>,
    },
    BinaryOp {
        op: BinaryOp,
        lhs: Box<Argument>,
        rhs: Box<Argument>,
    },
    TernaryOp {
        op: TernaryOp,
        args: Box<[Argument; 3]>,
    },
    RecordInit {
        fields: Vec<Argument>,
    },
    Aggregate {
        op: AggregateOp,
        target: Option<Box<Argument>>,
        atom: Box<Atom>,
    },
}

impl Argument {
    /// Invokes `f` on every variable name in the expression, aggregate
    /// bodies included.
    pub fn for_each_variable(&self, f: &mut impl FnMut(&str)) {
        match self {
            Argument::Variable(name) => f(name),
            Argument::UnaryOp { arg, .. } => arg.for_each_variable(f),
            Argument::BinaryOp { lhs, rhs, .. } => {
                lhs.for_each_variable(f);
                rhs.for_each_variable(f);
            }
            Argument::TernaryOp { args, .. } => args.iter().for_each(|arg| arg.for_each_variable(f)),
            Argument::RecordInit { fields } => {
                fields.iter().for_each(|field| field.for_each_variable(f))
            }
            Argument::Aggregate { target, atom, .. } => {
                if let Some(target) = target {
                    target.for_each_variable(f);
                }
                atom.args.iter().for_each(|arg| arg.for_each_variable(f));
            }
            _ => {}
        }
    }

    /// Rebuilds the expression with every direct child replaced by `f(child)`.
    /// Generic rewrites recurse through this.
    pub fn map_children(&self, f: &mut impl FnMut(&Argument) -> Argument) -> Argument {
        match self {
            Argument::UnaryOp { op, arg } => Argument::UnaryOp {
                op: *op,
                arg: Box::new(f(arg)),
            },
            Argument::BinaryOp { op, lhs, rhs } => Argument::BinaryOp {
                op: *op,
                lhs: Box::new(f(lhs)),
                rhs: Box::new(f(rhs)),
            },
            Argument::TernaryOp { op, args } => Argument::TernaryOp {
                op: *op,
                args: Box::new([f(&args[0]), f(&args[1]), f(&args[2])]),
            },
            Argument::RecordInit { fields } => Argument::RecordInit {
                fields: fields.iter().map(|field| f(field)).collect(),
            },
            Argument::Aggregate { op, target, atom } => Argument::Aggregate {
                op: *op,
                target: target.as_ref().map(|target| Box::new(f(target))),
                atom: Box::new(Atom {
                    name: atom.name.clone(),
                    args: atom.args.iter().map(|arg| f(arg)).collect(),
                    location: atom.location,
                }),
            },
            other => other.clone(),
        }
    }

    /// A fact argument: built from constants only.
    pub fn is_constant(&self) -> bool {
        match self {
            Argument::NumberConstant(_)
            | Argument::SymbolConstant(_)
            | Argument::NullConstant => true,
            Argument::UnaryOp { arg, .. } => arg.is_constant(),
            Argument::BinaryOp { lhs, rhs, .. } => lhs.is_constant() && rhs.is_constant(),
            Argument::TernaryOp { args, .. } => args.iter().all(|arg| arg.is_constant()),
            Argument::RecordInit { fields } => fields.iter().all(|field| field.is_constant()),
            _ => false,
        }
    }
}

impl Display for Argument {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Argument::Variable(name) => write!(f, "{}", name),
            Argument::UnnamedVariable => write!(f, "_"),
            Argument::Counter => write!(f, "$"),
            Argument::NumberConstant(value) => write!(f, "{}", value),
            Argument::SymbolConstant(symbol) => write!(f, "\"{}\"", symbol),
            Argument::NullConstant => write!(f, "nil"),
            Argument::UnaryOp { op: UnaryOp::Neg, arg } => write!(f, "-{}", arg),
            Argument::UnaryOp { op, arg } => write!(f, "{}({})", op, arg),
            Argument::BinaryOp { op, lhs, rhs } => match op {
                BinaryOp::Min | BinaryOp::Max | BinaryOp::Cat => {
                    write!(f, "{}({}, {})", op, lhs, rhs)
                }
                _ => write!(f, "({} {} {})", lhs, op, rhs),
            },
            Argument::TernaryOp { op, args } => {
                write!(f, "{}({}, {}, {})", op, args[0], args[1], args[2])
            }
            Argument::RecordInit { fields } => {
                write!(f, "[{}]", fields.iter().map(|field| field.to_string()).join(", "))
            }
            Argument::Aggregate { op, target, atom } => match target {
                Some(target) => write!(f, "{} {} : {}", op, target, atom),
                None => write!(f, "{} : {}", op, atom),
            },
        }
    }
}

/// A relation name applied to argument expressions.
#[derive(Clone, PartialEq, Debug)]
pub struct Atom {
    pub name: String,
    pub args: Vec<Argument>,
    pub location: SrcLocation,
}

impl Atom {
    pub fn new(name: &str, args: Vec<Argument>) -> Self {
        Self {
            name: name.to_string(),
            args,
            location: SrcLocation::default(),
        }
    }

    pub fn arity(&self) -> usize {
        self.args.len()
    }

    pub fn for_each_variable(&self, f: &mut impl FnMut(&str)) {
        self.args.iter().for_each(|arg| arg.for_each_variable(f));
    }
}

impl From<&str> for Atom {
    fn from(source: &str) -> Self {
        let clause = parse_clause(source).expect("malformed atom literal");
        clause.head
    }
}

impl Display for Atom {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}({})",
            self.name,
            self.args.iter().map(|arg| arg.to_string()).join(", ")
        )
    }
}

/// A body literal: a positive or negated atom, or a built-in constraint.
#[derive(Clone, PartialEq, Debug)]
pub enum Literal {
    Atom(Atom),
    Negation(Atom),
    BinaryConstraint {
        op: ConstraintOp,
        lhs: Argument,
        rhs: Argument,
        location: SrcLocation,
    },
    BooleanConstraint {
        value: bool,
        location: SrcLocation,
    },
}

impl Literal {
    pub fn location(&self) -> SrcLocation {
        match self {
            Literal::Atom(atom) | Literal::Negation(atom) => atom.location,
            Literal::BinaryConstraint { location, .. } => *location,
            Literal::BooleanConstraint { location, .. } => *location,
        }
    }

    pub fn atom(&self) -> Option<&Atom> {
        match self {
            Literal::Atom(atom) | Literal::Negation(atom) => Some(atom),
            _ => None,
        }
    }

    pub fn for_each_variable(&self, f: &mut impl FnMut(&str)) {
        match self {
            Literal::Atom(atom) | Literal::Negation(atom) => atom.for_each_variable(f),
            Literal::BinaryConstraint { lhs, rhs, .. } => {
                lhs.for_each_variable(f);
                rhs.for_each_variable(f);
            }
            Literal::BooleanConstraint { .. } => {}
        }
    }
}

impl Display for Literal {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Literal::Atom(atom) => write!(f, "{}", atom),
            Literal::Negation(atom) => write!(f, "!{}", atom),
            Literal::BinaryConstraint { op, lhs, rhs, .. } => {
                write!(f, "{} {} {}", lhs, op, rhs)
            }
            Literal::BooleanConstraint { value, .. } => write!(f, "{}", value),
        }
    }
}

/// A rule with a head atom and a body of literals. A fact is a clause with
/// an empty body and a constant head.
#[derive(Clone, PartialEq, Debug)]
pub struct Clause {
    pub head: Atom,
    pub body: Vec<Literal>,
    /// User-chosen body-atom order, 1-based over the positive atoms.
    pub plan: Option<Vec<usize>>,
    pub location: SrcLocation,
}

impl Clause {
    pub fn fact(head: Atom) -> Self {
        Self {
            head,
            body: vec![],
            plan: None,
            location: SrcLocation::default(),
        }
    }

    pub fn rule(head: Atom, body: Vec<Literal>) -> Self {
        Self {
            head,
            body,
            plan: None,
            location: SrcLocation::default(),
        }
    }

    pub fn is_fact(&self) -> bool {
        self.body.is_empty()
    }

    /// The positive body atoms, in written order.
    pub fn positive_atoms(&self) -> Vec<&Atom> {
        self.body
            .iter()
            .filter_map(|literal| match literal {
                Literal::Atom(atom) => Some(atom),
                _ => None,
            })
            .collect()
    }
}

impl From<&str> for Clause {
    fn from(source: &str) -> Self {
        parse_clause(source).expect("malformed clause literal")
    }
}

impl Display for Clause {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.is_fact() {
            write!(f, "{}.", self.head)
        } else {
            write!(
                f,
                "{} :- {}.",
                self.head,
                self.body.iter().map(|literal| literal.to_string()).join(", ")
            )
        }
    }
}

/// A typed attribute of a relation or record type declaration.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Attribute {
    pub name: String,
    pub type_name: String,
}

impl Display for Attribute {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.name, self.type_name)
    }
}

/// Options attached to an input or output directive, e.g. filename or
/// delimiter overrides.
pub type IoOptions = Vec<(String, String)>;

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct RelationDecl {
    pub name: String,
    pub attributes: Vec<Attribute>,
    pub is_equivalence: bool,
    pub is_inline: bool,
    pub is_input: bool,
    pub is_output: bool,
    pub input_options: IoOptions,
    pub output_options: IoOptions,
    pub location: SrcLocation,
}

impl RelationDecl {
    pub fn new(name: &str, attributes: Vec<Attribute>) -> Self {
        Self {
            name: name.to_string(),
            attributes,
            is_equivalence: false,
            is_inline: false,
            is_input: false,
            is_output: false,
            input_options: vec![],
            output_options: vec![],
            location: SrcLocation::default(),
        }
    }

    pub fn arity(&self) -> usize {
        self.attributes.len()
    }
}

impl Display for RelationDecl {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            ".decl {}({})",
            self.name,
            self.attributes.iter().map(|attr| attr.to_string()).join(", ")
        )?;
        if self.is_equivalence {
            write!(f, " eqrel")?;
        }
        if self.is_inline {
            write!(f, " inline")?;
        }
        Ok(())
    }
}

/// A named record type: `.type P = [x: number, y: number]`.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct RecordTypeDecl {
    pub name: String,
    pub fields: Vec<Attribute>,
    pub location: SrcLocation,
}

impl Display for RecordTypeDecl {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            ".type {} = [{}]",
            self.name,
            self.fields.iter().map(|field| field.to_string()).join(", ")
        )
    }
}

/// A whole source program after parsing, before checking.
#[derive(Clone, PartialEq, Debug, Default)]
pub struct Program {
    pub types: Vec<RecordTypeDecl>,
    pub relations: Vec<RelationDecl>,
    pub clauses: Vec<Clause>,
    pub pragmas: Vec<(String, String)>,
}

impl From<&str> for Program {
    fn from(source: &str) -> Self {
        parse_program(source).expect("malformed program literal")
    }
}

impl Display for Program {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for decl in &self.types {
            writeln!(f, "{}", decl)?;
        }
        for decl in &self.relations {
            writeln!(f, "{}", decl)?;
            if decl.is_input {
                writeln!(f, ".input {}", decl.name)?;
            }
            if decl.is_output {
                writeln!(f, ".output {}", decl.name)?;
            }
        }
        for clause in &self.clauses {
            writeln!(f, "{}", clause)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::models::datalog::{Argument, Atom, Clause, Literal};

    #[test]
    fn test_clause_display_round_trip() {
        let clause = Clause::from("T(x, z) :- T(x, y), E(y, z).");

        assert_eq!(clause.to_string(), "T(x, z) :- T(x, y), E(y, z).");
        assert_eq!(Clause::from(clause.to_string().as_str()), clause);
    }

    #[test]
    fn test_argument_variables() {
        let clause = Clause::from("A(x) :- B(x, y), x < (y + 1).");

        let mut seen = vec![];
        clause.body.iter().for_each(|literal| {
            literal.for_each_variable(&mut |name| seen.push(name.to_string()))
        });

        assert_eq!(seen, vec!["x", "y", "x", "y"]);
    }

    #[test]
    fn test_map_children_rewrites_nested_args() {
        let argument = Argument::BinaryOp {
            op: crate::models::datalog::BinaryOp::Add,
            lhs: Box::new(Argument::Variable("x".to_string())),
            rhs: Box::new(Argument::NumberConstant(1)),
        };

        let rewritten = argument.map_children(&mut |child| match child {
            Argument::Variable(_) => Argument::NumberConstant(7),
            other => other.clone(),
        });

        assert_eq!(
            rewritten,
            Argument::BinaryOp {
                op: crate::models::datalog::BinaryOp::Add,
                lhs: Box::new(Argument::NumberConstant(7)),
                rhs: Box::new(Argument::NumberConstant(1)),
            }
        );
    }

    #[test]
    fn test_fact_detection() {
        let fact = Clause::fact(Atom::new(
            "E",
            vec![Argument::NumberConstant(1), Argument::NumberConstant(2)],
        ));
        assert!(fact.is_fact());
        assert!(fact.head.args.iter().all(Argument::is_constant));

        let rule = Clause::rule(
            Atom::new("T", vec![Argument::Variable("x".to_string())]),
            vec![Literal::Atom(Atom::new(
                "E",
                vec![Argument::Variable("x".to_string())],
            ))],
        );
        assert!(!rule.is_fact());
    }
}
