use std::collections::{HashMap, HashSet};
use std::fmt::{Display, Formatter};

use crate::models::datalog::{
    AggregateOp, Argument, Atom, AttributeKind, BinaryOp, Clause, ConstraintOp, Literal, Program,
    SrcLocation, TernaryOp, UnaryOp,
};
use crate::reasoning::algorithms::stratification::{stratify, DependencyKind};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Diagnostic {
    pub severity: Severity,
    pub message: String,
    pub location: SrcLocation,
}

impl Display for Diagnostic {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let tag = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        write!(f, "{} {}: {}", tag, self.location, self.message)
    }
}

/// Collected diagnostics of one checker pass. A non-empty error set
/// refuses translation.
#[derive(Default, Debug)]
pub struct ErrorReport {
    pub diagnostics: Vec<Diagnostic>,
}

impl ErrorReport {
    pub fn error(&mut self, message: impl Into<String>, location: SrcLocation) {
        self.diagnostics.push(Diagnostic {
            severity: Severity::Error,
            message: message.into(),
            location,
        });
    }

    pub fn warning(&mut self, message: impl Into<String>, location: SrcLocation) {
        self.diagnostics.push(Diagnostic {
            severity: Severity::Warning,
            message: message.into(),
            location,
        });
    }

    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|diagnostic| diagnostic.severity == Severity::Error)
    }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|diagnostic| diagnostic.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|diagnostic| diagnostic.severity == Severity::Warning)
    }
}

impl Display for ErrorReport {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for diagnostic in &self.diagnostics {
            writeln!(f, "{}", diagnostic)?;
        }
        Ok(())
    }
}

impl std::error::Error for ErrorReport {}

/// Resolved schema of one declared relation.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct RelationSchema {
    pub name: String,
    pub attribute_names: Vec<String>,
    pub kinds: Vec<AttributeKind>,
    /// Record type name per attribute, for record-kinded positions.
    pub record_types: Vec<Option<String>>,
    pub equivalence: bool,
    pub inline: bool,
    pub input: bool,
    pub output: bool,
    pub input_options: Vec<(String, String)>,
    pub output_options: Vec<(String, String)>,
    pub location: SrcLocation,
}

impl RelationSchema {
    pub fn arity(&self) -> usize {
        self.kinds.len()
    }
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct RecordSchema {
    pub name: String,
    pub kinds: Vec<AttributeKind>,
    pub record_types: Vec<Option<String>>,
}

impl RecordSchema {
    pub fn arity(&self) -> usize {
        self.kinds.len()
    }
}

/// Name-resolved schemas, the checker's product consumed by the
/// translator.
#[derive(Default, Debug)]
pub struct TypeInfo {
    pub relations: HashMap<String, RelationSchema>,
    pub records: HashMap<String, RecordSchema>,
}

impl TypeInfo {
    pub fn schema(&self, relation: &str) -> Option<&RelationSchema> {
        self.relations.get(relation)
    }
}

/// Variables a clause binds through positive atoms, plus variables
/// defined by an equality against an already-ground expression (the
/// idiom aggregates use).
#[derive(Default, Debug)]
pub struct ClauseBindings {
    pub bound: HashSet<String>,
    pub definitions: HashMap<String, Argument>,
}

fn bind_pattern(argument: &Argument, bound: &mut HashSet<String>) {
    match argument {
        Argument::Variable(name) => {
            bound.insert(name.clone());
        }
        Argument::RecordInit { fields } => {
            fields.iter().for_each(|field| bind_pattern(field, bound))
        }
        _ => {}
    }
}

fn is_ground(argument: &Argument, bound: &HashSet<String>) -> bool {
    match argument {
        Argument::Variable(name) => bound.contains(name),
        Argument::UnnamedVariable => false,
        Argument::Counter
        | Argument::NumberConstant(_)
        | Argument::SymbolConstant(_)
        | Argument::NullConstant => true,
        Argument::UnaryOp { arg, .. } => is_ground(arg, bound),
        Argument::BinaryOp { lhs, rhs, .. } => is_ground(lhs, bound) && is_ground(rhs, bound),
        Argument::TernaryOp { args, .. } => args.iter().all(|arg| is_ground(arg, bound)),
        Argument::RecordInit { fields } => fields.iter().all(|field| is_ground(field, bound)),
        Argument::Aggregate { target, atom, .. } => {
            // Variables of the aggregate body are scoped to the range; the
            // target may only use range-local or outer-bound variables.
            let mut local = bound.clone();
            atom.args.iter().for_each(|arg| bind_pattern(arg, &mut local));
            target
                .as_ref()
                .map(|target| is_ground(target, &local))
                .unwrap_or(true)
        }
    }
}

/// Computes the clause's bound variable set to a fixpoint: positive atoms
/// bind their variables, and `v = expr` constraints bind `v` once `expr`
/// is ground.
pub fn clause_bindings(clause: &Clause) -> ClauseBindings {
    let mut bindings = ClauseBindings::default();

    for literal in &clause.body {
        if let Literal::Atom(atom) = literal {
            atom.args
                .iter()
                .for_each(|arg| bind_pattern(arg, &mut bindings.bound));
        }
    }

    loop {
        let mut changed = false;
        for literal in &clause.body {
            if let Literal::BinaryConstraint {
                op: ConstraintOp::Eq,
                lhs,
                rhs,
                ..
            } = literal
            {
                for (var_side, expr_side) in [(lhs, rhs), (rhs, lhs)] {
                    if let Argument::Variable(name) = var_side {
                        if !bindings.bound.contains(name) && is_ground(expr_side, &bindings.bound)
                        {
                            bindings.bound.insert(name.clone());
                            bindings
                                .definitions
                                .insert(name.clone(), (*expr_side).clone());
                            changed = true;
                        }
                    }
                }
            }
        }
        if !changed {
            break;
        }
    }

    bindings
}

fn collect_aggregates(argument: &Argument, out: &mut Vec<(AggregateOp, Atom)>) {
    match argument {
        Argument::Aggregate { op, atom, .. } => out.push((*op, (**atom).clone())),
        Argument::UnaryOp { arg, .. } => collect_aggregates(arg, out),
        Argument::BinaryOp { lhs, rhs, .. } => {
            collect_aggregates(lhs, out);
            collect_aggregates(rhs, out);
        }
        Argument::TernaryOp { args, .. } => {
            args.iter().for_each(|arg| collect_aggregates(arg, out))
        }
        Argument::RecordInit { fields } => fields
            .iter()
            .for_each(|field| collect_aggregates(field, out)),
        _ => {}
    }
}

/// Walks the AST once, accumulating diagnostics and resolving schemas.
pub fn check(program: &Program) -> (TypeInfo, ErrorReport) {
    let mut info = TypeInfo::default();
    let mut report = ErrorReport::default();

    check_record_types(program, &mut info, &mut report);
    check_relation_decls(program, &mut info, &mut report);
    for clause in &program.clauses {
        check_clause(clause, &info, &mut report);
    }
    check_stratification(program, &mut report);
    check_inlining(program, &info, &mut report);
    check_unused_relations(program, &info, &mut report);

    (info, report)
}

fn check_record_types(program: &Program, info: &mut TypeInfo, report: &mut ErrorReport) {
    // Names first, so recursive record types resolve.
    let names: HashSet<&str> = program
        .types
        .iter()
        .map(|decl| decl.name.as_str())
        .collect();

    for decl in &program.types {
        if info.records.contains_key(&decl.name) {
            report.error(
                format!("duplicate type declaration {}", decl.name),
                decl.location,
            );
            continue;
        }
        let mut kinds = vec![];
        let mut record_types = vec![];
        for field in &decl.fields {
            let kind = match field.type_name.as_str() {
                "number" => AttributeKind::Number,
                "symbol" => AttributeKind::Symbol,
                other if names.contains(other) => AttributeKind::Record,
                other => {
                    report.error(
                        format!("unknown type {} in {}", other, decl.name),
                        decl.location,
                    );
                    AttributeKind::Number
                }
            };
            record_types.push((kind == AttributeKind::Record).then(|| field.type_name.clone()));
            kinds.push(kind);
        }
        info.records.insert(
            decl.name.clone(),
            RecordSchema {
                name: decl.name.clone(),
                kinds,
                record_types,
            },
        );
    }
}

fn check_relation_decls(program: &Program, info: &mut TypeInfo, report: &mut ErrorReport) {
    for decl in &program.relations {
        if info.relations.contains_key(&decl.name) {
            report.error(
                format!("duplicate declaration of relation {}", decl.name),
                decl.location,
            );
            continue;
        }

        let mut seen_attributes = HashSet::new();
        let mut kinds = vec![];
        let mut record_types = vec![];
        for attribute in &decl.attributes {
            if !seen_attributes.insert(attribute.name.clone()) {
                report.error(
                    format!(
                        "duplicate attribute {} in relation {}",
                        attribute.name, decl.name
                    ),
                    decl.location,
                );
            }
            let kind = match attribute.type_name.as_str() {
                "number" => AttributeKind::Number,
                "symbol" => AttributeKind::Symbol,
                other if info.records.contains_key(other) => AttributeKind::Record,
                other => {
                    report.error(
                        format!(
                            "unknown attribute type {} in relation {}",
                            other, decl.name
                        ),
                        decl.location,
                    );
                    AttributeKind::Number
                }
            };
            record_types
                .push((kind == AttributeKind::Record).then(|| attribute.type_name.clone()));
            kinds.push(kind);
        }

        if decl.is_equivalence {
            if kinds.len() != 2 {
                report.error(
                    format!("equivalence relation {} must be binary", decl.name),
                    decl.location,
                );
            } else if kinds[0] != kinds[1] {
                report.error(
                    format!(
                        "equivalence relation {} needs the same type on both sides",
                        decl.name
                    ),
                    decl.location,
                );
            }
        }

        info.relations.insert(
            decl.name.clone(),
            RelationSchema {
                name: decl.name.clone(),
                attribute_names: decl
                    .attributes
                    .iter()
                    .map(|attribute| attribute.name.clone())
                    .collect(),
                kinds,
                record_types,
                equivalence: decl.is_equivalence,
                inline: decl.is_inline,
                input: decl.is_input,
                output: decl.is_output,
                input_options: decl.input_options.clone(),
                output_options: decl.output_options.clone(),
                location: decl.location,
            },
        );
    }
}

fn check_atom_shape(atom: &Atom, info: &TypeInfo, report: &mut ErrorReport) -> bool {
    match info.relations.get(&atom.name) {
        None => {
            report.error(format!("undefined relation {}", atom.name), atom.location);
            false
        }
        Some(schema) if schema.arity() != atom.arity() => {
            report.error(
                format!(
                    "relation {} expects {} arguments, got {}",
                    atom.name,
                    schema.arity(),
                    atom.arity()
                ),
                atom.location,
            );
            false
        }
        Some(_) => true,
    }
}

fn check_clause(clause: &Clause, info: &TypeInfo, report: &mut ErrorReport) {
    let mut shape_ok = check_atom_shape(&clause.head, info, report);
    for literal in &clause.body {
        match literal {
            Literal::Atom(atom) | Literal::Negation(atom) => {
                shape_ok &= check_atom_shape(atom, info, report);
            }
            Literal::BinaryConstraint { lhs, rhs, .. } => {
                for side in [lhs, rhs] {
                    let mut aggregates = vec![];
                    collect_aggregates(side, &mut aggregates);
                    for (_, atom) in &aggregates {
                        shape_ok &= check_atom_shape(atom, info, report);
                    }
                }
            }
            Literal::BooleanConstraint { .. } => {}
        }
    }
    if !shape_ok {
        return;
    }

    if clause.is_fact() {
        check_fact(clause, report);
    } else {
        check_rule(clause, report);
    }

    let mut typing = Typing {
        info,
        variables: HashMap::new(),
        report,
    };
    typing.type_atom(&clause.head);
    for literal in &clause.body {
        match literal {
            Literal::Atom(atom) | Literal::Negation(atom) => typing.type_atom(atom),
            Literal::BinaryConstraint {
                op,
                lhs,
                rhs,
                location,
            } => typing.type_constraint(*op, lhs, rhs, *location),
            Literal::BooleanConstraint { .. } => {}
        }
    }
}

fn check_fact(clause: &Clause, report: &mut ErrorReport) {
    for arg in &clause.head.args {
        let message = match arg {
            Argument::Variable(name) => Some(format!("variable {} in fact", name)),
            Argument::UnnamedVariable => Some("wildcard in fact".to_string()),
            Argument::Counter => Some("counter in fact".to_string()),
            Argument::Aggregate { .. } => Some("aggregate in fact".to_string()),
            other if !other.is_constant() => Some("non-constant expression in fact".to_string()),
            _ => None,
        };
        if let Some(message) = message {
            report.error(message, clause.head.location);
        }
    }
}

fn check_rule(clause: &Clause, report: &mut ErrorReport) {
    let bindings = clause_bindings(clause);

    // Head and negated variables must be bound by a positive atom or a
    // ground definition.
    clause.head.for_each_variable(&mut |name| {
        if !bindings.bound.contains(name) {
            report.error(
                format!("ungrounded variable {}", name),
                clause.head.location,
            );
        }
    });
    for literal in &clause.body {
        match literal {
            Literal::Negation(atom) => {
                atom.for_each_variable(&mut |name| {
                    if !bindings.bound.contains(name) {
                        report.error(format!("ungrounded variable {}", name), atom.location);
                    }
                });
            }
            Literal::BinaryConstraint { lhs, rhs, location, .. } => {
                for side in [lhs, rhs] {
                    side.for_each_variable(&mut |name| {
                        if !bindings.bound.contains(name) && !aggregate_local(side, name) {
                            report.error(format!("ungrounded variable {}", name), *location);
                        }
                    });
                }
            }
            _ => {}
        }
    }

    // Aggregates live on one side of an equality; anywhere else the
    // translator has no level to bind them at.
    for arg in &clause.head.args {
        flag_misplaced_aggregates(arg, false, clause.head.location, report);
    }
    for literal in &clause.body {
        match literal {
            Literal::Atom(atom) => {
                for arg in &atom.args {
                    flag_misplaced_aggregates(arg, false, atom.location, report);
                }
            }
            Literal::BinaryConstraint { op, lhs, rhs, location } => {
                let standalone_allowed = *op == ConstraintOp::Eq;
                flag_misplaced_aggregates(lhs, standalone_allowed, *location, report);
                flag_misplaced_aggregates(rhs, standalone_allowed, *location, report);
            }
            _ => {}
        }
    }

    check_single_use(clause, report);
    check_plan(clause, report);
}

fn flag_misplaced_aggregates(
    argument: &Argument,
    standalone_allowed: bool,
    location: SrcLocation,
    report: &mut ErrorReport,
) {
    let mut aggregates = vec![];
    collect_aggregates(argument, &mut aggregates);
    let standalone = matches!(argument, Argument::Aggregate { .. });
    if !aggregates.is_empty() && !(standalone && standalone_allowed) {
        report.error(
            "aggregate must appear alone on one side of an equality",
            location,
        );
    }
}

/// Variables bound inside an aggregate's own range are local to it.
fn aggregate_local(argument: &Argument, name: &str) -> bool {
    let mut aggregates = vec![];
    collect_aggregates(argument, &mut aggregates);
    aggregates.iter().any(|(_, atom)| {
        let mut local = false;
        atom.for_each_variable(&mut |var| local |= var == name);
        local
    })
}

fn check_single_use(clause: &Clause, report: &mut ErrorReport) {
    let mut counts: HashMap<String, usize> = HashMap::new();
    let mut tally = |name: &str| {
        *counts.entry(name.to_string()).or_insert(0) += 1;
    };
    clause.head.for_each_variable(&mut tally);
    for literal in &clause.body {
        literal.for_each_variable(&mut tally);
    }

    for (name, count) in counts {
        if count == 1 && !name.starts_with('_') {
            report.warning(
                format!("variable {} is only used once", name),
                clause.location,
            );
        }
    }
}

fn check_plan(clause: &Clause, report: &mut ErrorReport) {
    if let Some(plan) = &clause.plan {
        let atom_count = clause.positive_atoms().len();
        let mut positions: Vec<usize> = plan.clone();
        positions.sort_unstable();
        if positions != (1..=atom_count).collect::<Vec<_>>() {
            report.error(
                format!("plan must be a permutation of the {} body atoms", atom_count),
                clause.location,
            );
        }
    }
}

fn check_stratification(program: &Program, report: &mut ErrorReport) {
    if let Err(cycle) = stratify(&program.clauses) {
        let through = match cycle.kind {
            DependencyKind::Aggregate => "aggregation",
            _ => "negation",
        };
        report.error(
            format!(
                "relation {} depends on itself through {} of {}",
                cycle.relation, through, cycle.through
            ),
            cycle.location,
        );
    }
}

fn check_inlining(program: &Program, info: &TypeInfo, report: &mut ErrorReport) {
    let inline: HashSet<String> = info
        .relations
        .values()
        .filter(|schema| schema.inline)
        .map(|schema| schema.name.clone())
        .collect();
    if inline.is_empty() {
        return;
    }

    for name in &inline {
        let schema = &info.relations[name];
        if schema.input {
            report.error(
                format!("inline relation {} cannot be an input", name),
                schema.location,
            );
        }
        if schema.output {
            report.error(
                format!("inline relation {} cannot be an output", name),
                schema.location,
            );
        }
    }

    // Inline relations must not feed each other in a cycle.
    if let Ok(strata) = stratify(&program.clauses) {
        for stratum in strata {
            if !stratum.recursive {
                continue;
            }
            if let Some(relation) = stratum
                .relations
                .iter()
                .find(|relation| inline.contains(*relation))
            {
                let location = info
                    .relations
                    .get(relation)
                    .map(|schema| schema.location)
                    .unwrap_or_default();
                report.error(format!("inline relation {} is recursive", relation), location);
            }
        }
    }

    // A negated inline atom must not introduce fresh variables.
    for clause in &program.clauses {
        let bindings = clause_bindings(clause);
        for literal in &clause.body {
            if let Literal::Negation(atom) = literal {
                if inline.contains(&atom.name) {
                    atom.for_each_variable(&mut |name| {
                        if !bindings.bound.contains(name) {
                            report.error(
                                format!(
                                    "negated inline atom {} introduces variable {}",
                                    atom.name, name
                                ),
                                atom.location,
                            );
                        }
                    });
                }
            }
        }
    }
}

fn check_unused_relations(program: &Program, info: &TypeInfo, report: &mut ErrorReport) {
    let defined: HashSet<&str> = program
        .clauses
        .iter()
        .map(|clause| clause.head.name.as_str())
        .collect();
    for schema in info.relations.values() {
        if !schema.input && !defined.contains(schema.name.as_str()) {
            report.warning(
                format!("relation {} has neither facts nor rules", schema.name),
                schema.location,
            );
        }
    }
}

struct Typing<'a> {
    info: &'a TypeInfo,
    variables: HashMap<String, AttributeKind>,
    report: &'a mut ErrorReport,
}

impl<'a> Typing<'a> {
    fn type_atom(&mut self, atom: &Atom) {
        let schema = match self.info.relations.get(&atom.name) {
            Some(schema) => schema.clone(),
            None => return,
        };
        for (position, arg) in atom.args.iter().enumerate() {
            self.expect(
                arg,
                schema.kinds[position],
                schema.record_types[position].as_deref(),
                atom.location,
            );
        }
    }

    fn type_constraint(
        &mut self,
        op: ConstraintOp,
        lhs: &Argument,
        rhs: &Argument,
        location: SrcLocation,
    ) {
        let kind = if op.on_symbols() || self.looks_symbolic(lhs) || self.looks_symbolic(rhs) {
            AttributeKind::Symbol
        } else {
            AttributeKind::Number
        };
        self.expect(lhs, kind, None, location);
        self.expect(rhs, kind, None, location);
    }

    fn looks_symbolic(&self, argument: &Argument) -> bool {
        match argument {
            Argument::SymbolConstant(_) => true,
            Argument::BinaryOp { op: BinaryOp::Cat, .. } => true,
            Argument::TernaryOp { op: TernaryOp::Substr, .. } => true,
            Argument::Variable(name) => self.variables.get(name) == Some(&AttributeKind::Symbol),
            _ => false,
        }
    }

    fn expect(
        &mut self,
        argument: &Argument,
        kind: AttributeKind,
        record_type: Option<&str>,
        location: SrcLocation,
    ) {
        match argument {
            Argument::Variable(name) => {
                if let Some(existing) = self.variables.get(name) {
                    if *existing != kind {
                        self.report.error(
                            format!("variable {} used with conflicting types", name),
                            location,
                        );
                    }
                } else {
                    self.variables.insert(name.clone(), kind);
                }
            }
            Argument::UnnamedVariable => {}
            Argument::Counter => {
                if kind != AttributeKind::Number {
                    self.report
                        .error("counter used in a non-numeric position", location);
                }
            }
            Argument::NumberConstant(_) => {
                if kind != AttributeKind::Number {
                    self.report
                        .error("number constant in a non-numeric position", location);
                }
            }
            Argument::SymbolConstant(_) => {
                if kind != AttributeKind::Symbol {
                    self.report
                        .error("symbol constant in a non-symbolic position", location);
                }
            }
            Argument::NullConstant => {
                if kind != AttributeKind::Record {
                    self.report.error("nil used in a non-record position", location);
                }
            }
            Argument::UnaryOp { op, arg } => {
                let (wants, yields) = match op {
                    UnaryOp::Ord | UnaryOp::Strlen => (AttributeKind::Symbol, AttributeKind::Number),
                    _ => (AttributeKind::Number, AttributeKind::Number),
                };
                if kind != yields {
                    self.report
                        .error(format!("functor {} yields a number", op), location);
                }
                self.expect(arg, wants, None, location);
            }
            Argument::BinaryOp { op, lhs, rhs } => {
                let (wants, yields) = match op {
                    BinaryOp::Cat => (AttributeKind::Symbol, AttributeKind::Symbol),
                    _ => (AttributeKind::Number, AttributeKind::Number),
                };
                if kind != yields {
                    self.report.error(
                        format!("functor {} used in a position of the wrong type", op),
                        location,
                    );
                }
                self.expect(lhs, wants, None, location);
                self.expect(rhs, wants, None, location);
            }
            Argument::TernaryOp {
                op: TernaryOp::Substr,
                args,
            } => {
                if kind != AttributeKind::Symbol {
                    self.report.error("substr yields a symbol", location);
                }
                self.expect(&args[0], AttributeKind::Symbol, None, location);
                self.expect(&args[1], AttributeKind::Number, None, location);
                self.expect(&args[2], AttributeKind::Number, None, location);
            }
            Argument::RecordInit { fields } => {
                if kind != AttributeKind::Record {
                    self.report
                        .error("record used in a non-record position", location);
                    return;
                }
                let schema = record_type
                    .and_then(|name| self.info.records.get(name))
                    .cloned();
                if let Some(schema) = schema {
                    if schema.arity() != fields.len() {
                        self.report.error(
                            format!(
                                "record type {} has {} fields, got {}",
                                schema.name,
                                schema.arity(),
                                fields.len()
                            ),
                            location,
                        );
                        return;
                    }
                    for (position, field) in fields.iter().enumerate() {
                        self.expect(
                            field,
                            schema.kinds[position],
                            schema.record_types[position].as_deref(),
                            location,
                        );
                    }
                }
            }
            Argument::Aggregate { op, target, atom } => {
                if kind != AttributeKind::Number {
                    self.report.error("aggregate yields a number", location);
                }
                if *op != AggregateOp::Count {
                    match target {
                        Some(target) => self.expect(target, AttributeKind::Number, None, location),
                        None => self.report.error(
                            format!("{} aggregate needs a target expression", op),
                            location,
                        ),
                    }
                }
                self.type_atom(atom);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::check;
    use crate::models::datalog::Program;

    fn check_source(source: &str) -> (super::TypeInfo, super::ErrorReport) {
        check(&Program::from(source))
    }

    #[test]
    fn test_well_formed_program_passes() {
        let (info, report) = check_source(
            ".decl E(a: number, b: number)
             .decl T(a: number, b: number)
             .output T
             E(1, 2).
             T(x, y) :- E(x, y).
             T(x, z) :- T(x, y), E(y, z).",
        );

        assert!(!report.has_errors(), "{}", report);
        assert_eq!(info.schema("T").unwrap().arity(), 2);
    }

    #[test]
    fn test_undefined_relation_is_an_error() {
        let (_, report) = check_source(
            ".decl A(x: number)
             A(x) :- Missing(x).",
        );

        assert!(report.has_errors());
        assert!(report.errors().any(|d| d.message.contains("Missing")));
    }

    #[test]
    fn test_arity_mismatch_is_an_error() {
        let (_, report) = check_source(
            ".decl A(x: number)
             .decl B(x: number, y: number)
             A(x) :- B(x).",
        );

        assert!(report.has_errors());
        assert!(report
            .errors()
            .any(|d| d.message.contains("expects 2 arguments")));
    }

    #[test]
    fn test_ungrounded_head_variable_is_an_error() {
        let (_, report) = check_source(
            ".decl A(x: number, y: number)
             .decl B(x: number)
             A(x, y) :- B(x).",
        );

        assert!(report
            .errors()
            .any(|d| d.message.contains("ungrounded variable y")));
    }

    #[test]
    fn test_negated_variable_must_be_bound() {
        let (_, report) = check_source(
            ".decl A(x: number)
             .decl B(x: number)
             .decl C(x: number, y: number)
             A(x) :- B(x), !C(x, y).",
        );

        assert!(report
            .errors()
            .any(|d| d.message.contains("ungrounded variable y")));
    }

    #[test]
    fn test_fact_with_variable_is_an_error() {
        let (_, report) = check_source(
            ".decl A(x: number)
             A(x).",
        );

        assert!(report
            .errors()
            .any(|d| d.message.contains("variable x in fact")));
    }

    #[test]
    fn test_single_use_variable_warns_unless_underscored() {
        let (_, report) = check_source(
            ".decl A(x: number)
             .decl B(x: number, y: number)
             A(x) :- B(x, y).",
        );

        assert!(!report.has_errors());
        assert!(report
            .warnings()
            .any(|d| d.message.contains("y is only used once")));

        let (_, silent) = check_source(
            ".decl A(x: number)
             .decl B(x: number, y: number)
             A(x) :- B(x, _y).",
        );
        assert!(!silent
            .warnings()
            .any(|d| d.message.contains("only used once")));
    }

    #[test]
    fn test_type_conflict_is_an_error() {
        let (_, report) = check_source(
            ".decl A(x: number)
             .decl S(x: symbol)
             .decl B(x: number)
             B(x) :- A(x), S(x).",
        );

        assert!(report
            .errors()
            .any(|d| d.message.contains("conflicting types")));
    }

    #[test]
    fn test_cyclic_negation_is_an_error() {
        let (_, report) = check_source(
            ".decl E(x: number)
             .decl P(x: number)
             .decl Q(x: number)
             .decl R(x: number)
             P(x) :- E(x).
             Q(x) :- P(x), !R(x).
             R(x) :- Q(x).",
        );

        assert!(report.errors().any(|d| d.message.contains("negation")));
    }

    #[test]
    fn test_bad_plan_is_an_error() {
        let (_, report) = check_source(
            ".decl A(x: number)
             .decl B(x: number, y: number)
             .decl C(x: number, y: number)
             A(x) :- B(x, y), C(y, x).
             .plan (1, 3)",
        );

        assert!(report.errors().any(|d| d.message.contains("permutation")));
    }

    #[test]
    fn test_inline_input_is_an_error() {
        let (_, report) = check_source(
            ".decl A(x: number) inline
             .input A",
        );

        assert!(report
            .errors()
            .any(|d| d.message.contains("inline relation A")));
    }

    #[test]
    fn test_equivalence_must_be_binary() {
        let (_, report) =
            check_source(".decl EQ(a: number, b: number, c: number) eqrel");

        assert!(report.errors().any(|d| d.message.contains("must be binary")));
    }

    #[test]
    fn test_empty_relation_warns() {
        let (_, report) = check_source(".decl Lonely(x: number)");

        assert!(report.warnings().any(|d| d.message.contains("Lonely")));
    }

    #[test]
    fn test_aggregate_via_equality_is_accepted() {
        let (_, report) = check_source(
            ".decl R(x: number)
             .decl N(n: number)
             R(1). R(2).
             N(n) :- n = count : R(_).",
        );

        assert!(!report.has_errors(), "{}", report);
    }
}
