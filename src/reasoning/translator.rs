use std::collections::{BTreeSet, HashMap};

use crate::io::profile::escape_event_column;
use crate::misc::string_interning::SymbolTable;
use crate::models::datalog::{AggregateOp, Argument, Atom, Clause, ConstraintOp, Literal, Program};
use crate::models::index::{column_mask, SearchColumns};
use crate::models::ram::{
    RamCondition, RamOperation, RamProgram, RamRelation, RamStatement, RamValue, RangePattern,
};
use crate::reasoning::algorithms::index_selection::minimal_orders;
use crate::reasoning::algorithms::scheduling::schedule;
use crate::reasoning::algorithms::stratification::{stratify, Stratum};
use crate::reasoning::checker::{clause_bindings, TypeInfo};

pub fn delta_name(relation: &str) -> String {
    format!("@delta_{}", relation)
}

pub fn new_name(relation: &str) -> String {
    format!("@new_{}", relation)
}

/// Compiles a checked program into a relational-algebra plan. The checker
/// must have passed without errors; translation is total afterwards.
pub fn translate(program: &Program, info: &TypeInfo, symbols: &SymbolTable) -> RamProgram {
    Translator::new(program, info, symbols).run()
}

struct Translator<'t> {
    program: &'t Program,
    info: &'t TypeInfo,
    symbols: &'t SymbolTable,
    /// Static size estimates feeding the clause scheduler.
    sizes: HashMap<String, usize>,
    /// Bound-column sets demanded per relation, for index selection.
    demands: HashMap<String, BTreeSet<SearchColumns>>,
}

impl<'t> Translator<'t> {
    fn new(program: &'t Program, info: &'t TypeInfo, symbols: &'t SymbolTable) -> Self {
        let mut sizes: HashMap<String, usize> = HashMap::new();
        for clause in &program.clauses {
            if clause.is_fact() {
                *sizes.entry(clause.head.name.clone()).or_insert(0) += 1;
            }
        }
        Self {
            program,
            info,
            symbols,
            sizes,
            demands: HashMap::new(),
        }
    }

    fn size_estimate(&self, relation: &str) -> usize {
        // Fact counts where known; derived and input relations get a flat
        // guess, which is enough to push small enumerable atoms inward.
        self.sizes.get(relation).copied().unwrap_or(1_000).max(1)
    }

    fn demand(&mut self, relation: &str, columns: SearchColumns) {
        if columns != 0 {
            self.demands
                .entry(relation.to_string())
                .or_default()
                .insert(columns);
        }
    }

    fn run(mut self) -> RamProgram {
        let program = self.program;
        let strata =
            stratify(&program.clauses).expect("stratification must hold for a checked program");

        let mut rules_by_relation: HashMap<&str, Vec<&Clause>> = HashMap::new();
        let mut facts = vec![];
        for clause in &program.clauses {
            if clause.is_fact() {
                facts.push(clause);
            } else {
                rules_by_relation
                    .entry(clause.head.name.as_str())
                    .or_default()
                    .push(clause);
            }
        }

        // Translate stratum bodies first so that index demands are known
        // before the create statements are emitted.
        let mut stratum_statements = vec![];
        for stratum in &strata {
            if let Some(statement) = self.translate_stratum(stratum, &rules_by_relation) {
                stratum_statements.push(statement);
            }
        }

        let mut statements = vec![];
        for decl in &program.relations {
            statements.push(self.create_statement(&decl.name));
        }
        for decl in &program.relations {
            let schema = &self.info.relations[&decl.name];
            if schema.input {
                statements.push(RamStatement::Load {
                    relation: decl.name.clone(),
                    options: schema.input_options.clone(),
                });
            }
        }
        for fact in facts {
            statements.push(self.translate_fact(fact));
        }
        statements.extend(stratum_statements);
        for decl in &program.relations {
            let schema = &self.info.relations[&decl.name];
            if schema.output {
                statements.push(RamStatement::Store {
                    relation: decl.name.clone(),
                    options: schema.output_options.clone(),
                });
            }
        }

        RamProgram::new(RamStatement::Sequence(statements))
    }

    fn create_statement(&self, relation: &str) -> RamStatement {
        let schema = &self.info.relations[relation];
        let orders = minimal_orders(
            schema.arity(),
            self.demands.get(relation).unwrap_or(&BTreeSet::new()),
        );
        RamStatement::Create(RamRelation {
            name: relation.to_string(),
            attributes: schema.attribute_names.clone(),
            kinds: schema.kinds.clone(),
            equivalence: schema.equivalence,
            orders,
        })
    }

    fn create_auxiliary(&self, relation: &str, auxiliary: &str) -> RamStatement {
        let schema = &self.info.relations[relation];
        let orders = minimal_orders(
            schema.arity(),
            self.demands.get(auxiliary).unwrap_or(&BTreeSet::new()),
        );
        RamStatement::Create(RamRelation {
            name: auxiliary.to_string(),
            attributes: schema.attribute_names.clone(),
            kinds: schema.kinds.clone(),
            // Delta and new views of an equivalence relation close over
            // their own tuples as well, keeping iteration sound.
            equivalence: schema.equivalence,
            orders,
        })
    }

    fn translate_fact(&mut self, fact: &Clause) -> RamStatement {
        let empty = ClauseScope::default();
        let values = fact
            .head
            .args
            .iter()
            .map(|arg| self.translate_argument(arg, &empty))
            .collect();
        RamStatement::Fact {
            relation: fact.head.name.clone(),
            values,
        }
    }

    fn translate_stratum(
        &mut self,
        stratum: &Stratum,
        rules: &HashMap<&str, Vec<&Clause>>,
    ) -> Option<RamStatement> {
        let members: Vec<&str> = stratum
            .relations
            .iter()
            .map(|relation| relation.as_str())
            .filter(|relation| rules.contains_key(relation))
            .collect();
        if members.is_empty() {
            return None;
        }

        if !stratum.recursive {
            let mut groups = vec![];
            for relation in &members {
                groups.push(self.nonrecursive_relation(relation, &rules[relation]));
            }
            return Some(RamStatement::Sequence(groups));
        }

        Some(self.recursive_stratum(&members, rules))
    }

    fn nonrecursive_relation(&mut self, relation: &str, clauses: &[&Clause]) -> RamStatement {
        let mut queries = vec![];
        for clause in clauses {
            let query = self.translate_clause(clause, &clause.head.name, None, &HashMap::new());
            queries.push(self.logged_rule(
                clause,
                relation,
                None,
                query,
                "@t-nonrecursive-rule",
                "@n-nonrecursive-rule",
                relation,
            ));
        }

        let location = clauses
            .first()
            .map(|clause| clause.location)
            .unwrap_or_default();
        RamStatement::LogTimer {
            message: format!(
                "@t-nonrecursive-relation;{};{}",
                escape_event_column(relation),
                escape_event_column(&location.to_string())
            ),
            nested: Box::new(RamStatement::Sequence(vec![
                RamStatement::Parallel(queries),
                RamStatement::LogSize {
                    message: format!(
                        "@n-nonrecursive-relation;{};{}",
                        escape_event_column(relation),
                        escape_event_column(&location.to_string())
                    ),
                    relation: relation.to_string(),
                },
            ])),
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn logged_rule(
        &self,
        clause: &Clause,
        relation: &str,
        version: Option<usize>,
        query: RamStatement,
        timer_event: &str,
        size_event: &str,
        sized_relation: &str,
    ) -> RamStatement {
        let rule = clause.to_string();
        let location = clause.location.to_string();
        let (timer_message, size_message) = match version {
            Some(version) => (
                format!(
                    "{};{};{};{};{}",
                    timer_event,
                    escape_event_column(relation),
                    version,
                    escape_event_column(&location),
                    escape_event_column(&rule)
                ),
                format!(
                    "{};{};{};{};{}",
                    size_event,
                    escape_event_column(relation),
                    version,
                    escape_event_column(&location),
                    escape_event_column(&rule)
                ),
            ),
            None => (
                format!(
                    "{};{};{};{}",
                    timer_event,
                    escape_event_column(relation),
                    escape_event_column(&location),
                    escape_event_column(&rule)
                ),
                format!(
                    "{};{};{};{}",
                    size_event,
                    escape_event_column(relation),
                    escape_event_column(&location),
                    escape_event_column(&rule)
                ),
            ),
        };

        RamStatement::DebugInfo {
            message: rule,
            nested: Box::new(RamStatement::Sequence(vec![
                RamStatement::LogTimer {
                    message: timer_message,
                    nested: Box::new(query),
                },
                RamStatement::LogSize {
                    message: size_message,
                    relation: sized_relation.to_string(),
                },
            ])),
        }
    }

    fn recursive_stratum(
        &mut self,
        members: &[&str],
        rules: &HashMap<&str, Vec<&Clause>>,
    ) -> RamStatement {
        let in_stratum: BTreeSet<&str> = members.iter().copied().collect();

        // Split every relation's clauses into exit rules and recursive
        // rules.
        let mut exit_rules: Vec<(&str, &Clause)> = vec![];
        let mut recursive_rules: Vec<(&str, &Clause, Vec<usize>)> = vec![];
        for &relation in members {
            for &clause in &rules[relation] {
                let recursive_positions: Vec<usize> = clause
                    .positive_atoms()
                    .iter()
                    .enumerate()
                    .filter(|(_, atom)| in_stratum.contains(atom.name.as_str()))
                    .map(|(position, _)| position)
                    .collect();
                if recursive_positions.is_empty() {
                    exit_rules.push((relation, clause));
                } else {
                    recursive_rules.push((relation, clause, recursive_positions));
                }
            }
        }

        let mut statements = vec![];

        // Delta-version queries first: their translation registers the
        // index demands the auxiliary relations need at creation.
        let mut iteration = vec![];
        for (relation, clause, positions) in &recursive_rules {
            for (version, position) in positions.iter().enumerate() {
                let recursive_atom = clause.positive_atoms()[*position].name.clone();
                let mut overrides = HashMap::new();
                overrides.insert(*position, delta_name(&recursive_atom));
                let query = self.translate_clause(
                    clause,
                    &new_name(relation),
                    Some(relation.to_string()),
                    &overrides,
                );
                iteration.push(self.logged_rule(
                    clause,
                    relation,
                    Some(version),
                    query,
                    "@t-recursive-rule",
                    "@n-recursive-rule",
                    &new_name(relation),
                ));
            }
        }

        let mut exit_queries = vec![];
        for (relation, clause) in &exit_rules {
            let query = self.translate_clause(clause, &clause.head.name, None, &HashMap::new());
            exit_queries.push(self.logged_rule(
                clause,
                relation,
                None,
                query,
                "@t-nonrecursive-rule",
                "@n-nonrecursive-rule",
                relation,
            ));
        }

        for &relation in members {
            statements.push(self.create_auxiliary(relation, &delta_name(relation)));
            statements.push(self.create_auxiliary(relation, &new_name(relation)));
        }
        if !exit_queries.is_empty() {
            statements.push(RamStatement::Parallel(exit_queries));
        }
        for &relation in members {
            statements.push(RamStatement::Merge {
                source: relation.to_string(),
                target: delta_name(relation),
            });
        }

        let exit_condition = members
            .iter()
            .map(|relation| RamCondition::Empty(new_name(relation)))
            .reduce(|lhs, rhs| RamCondition::And(Box::new(lhs), Box::new(rhs)))
            .expect("recursive stratum has at least one member");

        let mut body = vec![RamStatement::Parallel(iteration)];
        body.push(RamStatement::Exit(exit_condition));
        for &relation in members {
            let location = rules[relation]
                .first()
                .map(|clause| clause.location)
                .unwrap_or_default();
            body.push(RamStatement::LogSize {
                message: format!(
                    "@n-recursive-relation;{};{}",
                    escape_event_column(relation),
                    escape_event_column(&location.to_string())
                ),
                relation: new_name(relation),
            });
            body.push(RamStatement::LogTimer {
                message: format!(
                    "@c-recursive-relation;{};{}",
                    escape_event_column(relation),
                    escape_event_column(&location.to_string())
                ),
                nested: Box::new(RamStatement::Sequence(vec![
                    RamStatement::Merge {
                        source: new_name(relation),
                        target: relation.to_string(),
                    },
                    RamStatement::Swap(delta_name(relation), new_name(relation)),
                    RamStatement::Clear(new_name(relation)),
                ])),
            });
        }
        statements.push(RamStatement::Loop(Box::new(RamStatement::Sequence(body))));

        for &relation in members {
            statements.push(RamStatement::Drop(delta_name(relation)));
            statements.push(RamStatement::Drop(new_name(relation)));
        }

        RamStatement::Sequence(statements)
    }

    /// Lowers one rule into an insert-query: nested scans per body atom in
    /// scheduled order, lookups for record patterns, aggregate levels,
    /// filters at the earliest level where they are ground, and a final
    /// projection into `target`.
    fn translate_clause(
        &mut self,
        clause: &Clause,
        target: &str,
        project_filter: Option<String>,
        overrides: &HashMap<usize, String>,
    ) -> RamStatement {
        let atoms = clause.positive_atoms();
        let order = schedule(
            &atoms,
            &|relation| self.size_estimate(relation),
            clause.plan.as_deref(),
        );

        let mut scope = ClauseScope::default();
        scope.definitions = clause_bindings(clause).definitions;

        // Entries in nesting order; each one consumes the next level.
        let mut entries: Vec<LevelEntry> = vec![];

        for &atom_position in &order {
            let atom = atoms[atom_position];
            let relation = overrides
                .get(&atom_position)
                .cloned()
                .unwrap_or_else(|| atom.name.clone());
            self.enter_atom(atom, &relation, &mut entries, &mut scope);
        }

        self.enter_aggregates(clause, &mut entries, &mut scope);

        // Columns that had to wait for a later binding or an aggregate
        // become equality filters at the innermost level involved.
        let deferred = std::mem::take(&mut scope.deferred);
        for (level, position, argument) in deferred {
            let condition = RamCondition::Constraint {
                op: ConstraintOp::Eq,
                lhs: RamValue::TupleElement { level, position },
                rhs: self.translate_argument(&argument, &scope),
            };
            let at = condition_level(&condition).unwrap_or(level).max(level);
            entries[at].filters.push(condition);
        }

        // Negations and constraints become filters once their operands
        // are bound.
        let mut outer_filters = vec![];
        for literal in &clause.body {
            let condition = match literal {
                Literal::Negation(atom) => Some(self.negation_condition(atom, &scope)),
                Literal::BinaryConstraint { op, lhs, rhs, .. } => {
                    self.constraint_condition(*op, lhs, rhs, &scope)
                }
                Literal::BooleanConstraint { value: false, .. } => Some(RamCondition::Constraint {
                    op: ConstraintOp::Eq,
                    lhs: RamValue::Number(0),
                    rhs: RamValue::Number(1),
                }),
                _ => None,
            };
            if let Some(condition) = condition {
                match condition_level(&condition) {
                    Some(level) => entries[level].filters.push(condition),
                    None => outer_filters.push(condition),
                }
            }
        }

        // Projection of the head.
        let values = clause
            .head
            .args
            .iter()
            .map(|arg| self.translate_argument(arg, &scope))
            .collect();
        let mut operation = RamOperation::Project {
            relation: target.to_string(),
            values,
            filter: project_filter,
        };

        // Wrap entries inside-out.
        for entry in entries.into_iter().rev() {
            for condition in entry.filters.into_iter().rev() {
                operation = RamOperation::Filter {
                    condition,
                    nested: Box::new(operation),
                };
            }
            operation = entry.kind.into_operation(operation);
        }
        for condition in outer_filters.into_iter().rev() {
            operation = RamOperation::Filter {
                condition,
                nested: Box::new(operation),
            };
        }

        mark_pure_existence(&mut operation);

        RamStatement::Query(operation)
    }

    /// Adds the scan for one body atom, plus lookup levels for record
    /// patterns among its arguments.
    fn enter_atom(
        &mut self,
        atom: &Atom,
        relation: &str,
        entries: &mut Vec<LevelEntry>,
        scope: &mut ClauseScope,
    ) {
        let level = entries.len();
        let mut pattern: RangePattern = vec![None; atom.args.len()];
        let mut filters = vec![];
        let mut pending_lookups: Vec<(usize, Vec<Argument>)> = vec![];

        for (position, arg) in atom.args.iter().enumerate() {
            match arg {
                Argument::Variable(name) => match scope.bindings.get(name) {
                    Some(&(bound_level, bound_position)) if bound_level < level => {
                        pattern[position] = Some(RamValue::TupleElement {
                            level: bound_level,
                            position: bound_position,
                        });
                    }
                    Some(&(bound_level, bound_position)) => {
                        // Bound at this same level: an in-atom repeat.
                        filters.push(RamCondition::Constraint {
                            op: ConstraintOp::Eq,
                            lhs: RamValue::TupleElement { level, position },
                            rhs: RamValue::TupleElement {
                                level: bound_level,
                                position: bound_position,
                            },
                        });
                    }
                    None if scope.definitions.contains_key(name) => {
                        // Defined by an equality; equate the column once
                        // the definition is materialized.
                        if self.is_ground(arg, scope) {
                            pattern[position] = Some(self.translate_argument(arg, scope));
                        } else {
                            scope.deferred.push((level, position, arg.clone()));
                        }
                    }
                    None => {
                        scope.bindings.insert(name.clone(), (level, position));
                    }
                },
                Argument::UnnamedVariable => {}
                Argument::RecordInit { fields }
                    if fields.iter().any(|field| !self.is_ground(field, scope)) =>
                {
                    pending_lookups.push((position, fields.clone()));
                }
                other if self.is_ground(other, scope) => {
                    pattern[position] = Some(self.translate_argument(other, scope));
                }
                other => {
                    // Ground later in the nesting order; equate then.
                    scope.deferred.push((level, position, other.clone()));
                }
            }
        }

        let columns = pattern
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.is_some())
            .fold(0, |mask, (position, _)| mask | (1 << position));
        self.demand(relation, columns);

        entries.push(LevelEntry {
            kind: LevelKind::Scan {
                relation: relation.to_string(),
                level,
                columns,
                pattern,
            },
            filters,
        });

        for (position, fields) in pending_lookups {
            self.enter_lookup(level, position, &fields, entries, scope);
        }
    }

    fn enter_lookup(
        &mut self,
        ref_level: usize,
        ref_position: usize,
        fields: &[Argument],
        entries: &mut Vec<LevelEntry>,
        scope: &mut ClauseScope,
    ) {
        let level = entries.len();
        let mut filters = vec![];
        let mut pending: Vec<(usize, Vec<Argument>)> = vec![];

        for (position, field) in fields.iter().enumerate() {
            match field {
                Argument::Variable(name) => match scope.bindings.get(name) {
                    Some(&(bound_level, bound_position)) => {
                        filters.push(RamCondition::Constraint {
                            op: ConstraintOp::Eq,
                            lhs: RamValue::TupleElement { level, position },
                            rhs: RamValue::TupleElement {
                                level: bound_level,
                                position: bound_position,
                            },
                        });
                    }
                    None => {
                        scope.bindings.insert(name.clone(), (level, position));
                    }
                },
                Argument::UnnamedVariable => {}
                Argument::RecordInit { fields }
                    if fields.iter().any(|field| !self.is_ground(field, scope)) =>
                {
                    pending.push((position, fields.clone()));
                }
                other => {
                    let rhs = self.translate_argument(other, scope);
                    filters.push(RamCondition::Constraint {
                        op: ConstraintOp::Eq,
                        lhs: RamValue::TupleElement { level, position },
                        rhs,
                    });
                }
            }
        }

        entries.push(LevelEntry {
            kind: LevelKind::Lookup {
                ref_level,
                ref_position,
                level,
                arity: fields.len(),
            },
            filters,
        });

        for (position, nested_fields) in pending {
            self.enter_lookup(level, position, &nested_fields, entries, scope);
        }
    }

    /// Materializes one aggregate level per aggregate definition. A
    /// worklist pass covers aggregates whose range pattern depends on an
    /// earlier aggregate's result.
    fn enter_aggregates(
        &mut self,
        clause: &Clause,
        entries: &mut Vec<LevelEntry>,
        scope: &mut ClauseScope,
    ) {
        let mut pending: Vec<(String, Argument)> = vec![];
        for literal in &clause.body {
            if let Literal::BinaryConstraint {
                op: ConstraintOp::Eq,
                lhs,
                rhs,
                ..
            } = literal
            {
                for (var_side, expr_side) in [(lhs, rhs), (rhs, lhs)] {
                    if let (Argument::Variable(name), Argument::Aggregate { .. }) =
                        (var_side, expr_side)
                    {
                        if !scope.bindings.contains_key(name) {
                            pending.push((name.clone(), (*expr_side).clone()));
                        }
                    }
                }
            }
        }

        while !pending.is_empty() {
            let mut progressed = false;
            let mut still_pending = vec![];

            for (name, aggregate) in pending {
                let (op, target, atom) = match &aggregate {
                    Argument::Aggregate { op, target, atom } => (*op, target, atom),
                    _ => unreachable!(),
                };

                let ready = atom.args.iter().all(|arg| match arg {
                    Argument::Variable(var) => {
                        scope.bindings.contains_key(var)
                            || !scope.definitions.contains_key(var)
                            || self.is_ground(arg, scope)
                    }
                    Argument::UnnamedVariable => true,
                    other => self.is_ground(other, scope),
                });
                if !ready {
                    still_pending.push((name, aggregate.clone()));
                    continue;
                }

                let level = entries.len();
                let mut pattern: RangePattern = vec![None; atom.args.len()];
                let mut locals: Vec<(String, usize)> = vec![];
                for (position, arg) in atom.args.iter().enumerate() {
                    match arg {
                        Argument::Variable(var)
                            if !scope.bindings.contains_key(var)
                                && !scope.definitions.contains_key(var) =>
                        {
                            locals.push((var.clone(), position));
                        }
                        Argument::UnnamedVariable => {}
                        other => {
                            pattern[position] = Some(self.translate_argument(other, scope));
                        }
                    }
                }
                let columns = pattern
                    .iter()
                    .enumerate()
                    .filter(|(_, entry)| entry.is_some())
                    .fold(0, |mask, (position, _)| mask | (1 << position));
                self.demand(&atom.name, columns);

                // Range-local variables are visible to the target
                // expression only.
                for (local, position) in &locals {
                    scope.bindings.insert(local.clone(), (level, *position));
                }
                let target_value = match op {
                    AggregateOp::Count => None,
                    _ => target
                        .as_ref()
                        .map(|target| self.translate_argument(target, scope)),
                };
                for (local, _) in &locals {
                    scope.bindings.remove(local);
                }

                scope.bindings.insert(name.clone(), (level, 0));

                entries.push(LevelEntry {
                    kind: LevelKind::Aggregate {
                        op,
                        target: target_value,
                        relation: atom.name.clone(),
                        columns,
                        pattern,
                        level,
                    },
                    filters: vec![],
                });
                progressed = true;
            }

            assert!(
                progressed || still_pending.is_empty(),
                "aggregate definitions do not resolve after checking"
            );
            pending = still_pending;
        }
    }

    fn negation_condition(&mut self, atom: &Atom, scope: &ClauseScope) -> RamCondition {
        let arity = atom.args.len();
        let mut pattern: RangePattern = vec![None; arity];
        for (position, arg) in atom.args.iter().enumerate() {
            if !matches!(arg, Argument::UnnamedVariable) {
                pattern[position] = Some(self.translate_argument(arg, scope));
            }
        }
        let columns = pattern
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.is_some())
            .fold(0, |mask, (position, _)| mask | (1 << position));
        let total = columns == column_mask(&(0..arity).collect::<Vec<_>>()) || arity == 0;
        if !total {
            self.demand(&atom.name, columns);
        }
        RamCondition::NotExists {
            relation: atom.name.clone(),
            columns,
            pattern,
            total,
        }
    }

    /// Constraints that merely define a variable vanish; the rest become
    /// filter conditions.
    fn constraint_condition(
        &mut self,
        op: ConstraintOp,
        lhs: &Argument,
        rhs: &Argument,
        scope: &ClauseScope,
    ) -> Option<RamCondition> {
        if op == ConstraintOp::Eq {
            for (var_side, expr_side) in [(lhs, rhs), (rhs, lhs)] {
                if let Argument::Variable(name) = var_side {
                    let definitional = scope.definitions.contains_key(name)
                        || matches!(expr_side, Argument::Aggregate { .. });
                    if definitional {
                        return None;
                    }
                }
            }
        }
        Some(RamCondition::Constraint {
            op,
            lhs: self.translate_argument(lhs, scope),
            rhs: self.translate_argument(rhs, scope),
        })
    }

    /// Whether the argument can be translated right now: every variable is
    /// scan-bound or expands to a materialized definition. Aggregates only
    /// materialize at their own level, so they are never ground here.
    fn is_ground(&self, argument: &Argument, scope: &ClauseScope) -> bool {
        match argument {
            Argument::Variable(name) => {
                scope.bindings.contains_key(name)
                    || scope
                        .definitions
                        .get(name)
                        .map(|definition| self.is_ground(definition, scope))
                        .unwrap_or(false)
            }
            Argument::UnnamedVariable => false,
            Argument::Counter
            | Argument::NumberConstant(_)
            | Argument::SymbolConstant(_)
            | Argument::NullConstant => true,
            Argument::UnaryOp { arg, .. } => self.is_ground(arg, scope),
            Argument::BinaryOp { lhs, rhs, .. } => {
                self.is_ground(lhs, scope) && self.is_ground(rhs, scope)
            }
            Argument::TernaryOp { args, .. } => args.iter().all(|arg| self.is_ground(arg, scope)),
            Argument::RecordInit { fields } => {
                fields.iter().all(|field| self.is_ground(field, scope))
            }
            Argument::Aggregate { .. } => false,
        }
    }

    fn translate_argument(&mut self, argument: &Argument, scope: &ClauseScope) -> RamValue {
        match argument {
            Argument::Variable(name) => match scope.bindings.get(name) {
                Some(&(level, position)) => RamValue::TupleElement { level, position },
                None => {
                    let definition = scope
                        .definitions
                        .get(name)
                        .cloned()
                        .unwrap_or_else(|| panic!("unbound variable {} after checking", name));
                    self.translate_argument(&definition, scope)
                }
            },
            Argument::UnnamedVariable => {
                panic!("wildcard has no value after checking")
            }
            Argument::Counter => RamValue::AutoIncrement,
            Argument::NumberConstant(value) => RamValue::Number(*value),
            Argument::SymbolConstant(symbol) => RamValue::Number(self.symbols.intern(symbol)),
            Argument::NullConstant => RamValue::Number(0),
            Argument::UnaryOp { op, arg } => RamValue::UnaryOp {
                op: *op,
                arg: Box::new(self.translate_argument(arg, scope)),
            },
            Argument::BinaryOp { op, lhs, rhs } => RamValue::BinaryOp {
                op: *op,
                lhs: Box::new(self.translate_argument(lhs, scope)),
                rhs: Box::new(self.translate_argument(rhs, scope)),
            },
            Argument::TernaryOp { op, args } => RamValue::TernaryOp {
                op: *op,
                args: Box::new([
                    self.translate_argument(&args[0], scope),
                    self.translate_argument(&args[1], scope),
                    self.translate_argument(&args[2], scope),
                ]),
            },
            Argument::RecordInit { fields } => RamValue::Pack(
                fields
                    .iter()
                    .map(|field| self.translate_argument(field, scope))
                    .collect(),
            ),
            Argument::Aggregate { .. } => {
                panic!("aggregate outside a definition after checking")
            }
        }
    }
}

#[derive(Default)]
struct ClauseScope {
    /// First binding site of each variable: (level, position).
    bindings: HashMap<String, (usize, usize)>,
    /// Ground defining expressions for equality-bound variables.
    definitions: HashMap<String, Argument>,
    /// Scan columns to equate with an expression once it is materialized:
    /// (scan level, column, expression).
    deferred: Vec<(usize, usize, Argument)>,
}

struct LevelEntry {
    kind: LevelKind,
    filters: Vec<RamCondition>,
}

enum LevelKind {
    Scan {
        relation: String,
        level: usize,
        columns: SearchColumns,
        pattern: RangePattern,
    },
    Lookup {
        ref_level: usize,
        ref_position: usize,
        level: usize,
        arity: usize,
    },
    Aggregate {
        op: AggregateOp,
        target: Option<RamValue>,
        relation: String,
        columns: SearchColumns,
        pattern: RangePattern,
        level: usize,
    },
}

impl LevelKind {
    fn into_operation(self, nested: RamOperation) -> RamOperation {
        match self {
            LevelKind::Scan {
                relation,
                level,
                columns,
                pattern,
            } => RamOperation::Scan {
                relation,
                level,
                columns,
                pattern,
                pure_existence: false,
                nested: Box::new(nested),
            },
            LevelKind::Lookup {
                ref_level,
                ref_position,
                level,
                arity,
            } => RamOperation::Lookup {
                ref_level,
                ref_position,
                level,
                arity,
                nested: Box::new(nested),
            },
            LevelKind::Aggregate {
                op,
                target,
                relation,
                columns,
                pattern,
                level,
            } => RamOperation::Aggregate {
                op,
                target,
                relation,
                columns,
                pattern,
                level,
                condition: None,
                nested: Box::new(nested),
            },
        }
    }
}

fn value_max_level(value: &RamValue, max: &mut Option<usize>) {
    match value {
        RamValue::TupleElement { level, .. } => {
            *max = Some(max.map_or(*level, |current| current.max(*level)))
        }
        RamValue::UnaryOp { arg, .. } => value_max_level(arg, max),
        RamValue::BinaryOp { lhs, rhs, .. } => {
            value_max_level(lhs, max);
            value_max_level(rhs, max);
        }
        RamValue::TernaryOp { args, .. } => args.iter().for_each(|arg| value_max_level(arg, max)),
        RamValue::Pack(values) => values.iter().for_each(|value| value_max_level(value, max)),
        _ => {}
    }
}

/// The innermost level a condition reads; the filter belongs just inside
/// that level's binding. `None` means the condition is level-free.
fn condition_level(condition: &RamCondition) -> Option<usize> {
    let mut max = None;
    match condition {
        RamCondition::And(lhs, rhs) => {
            for side in [condition_level(lhs), condition_level(rhs)] {
                if let Some(level) = side {
                    max = Some(max.map_or(level, |current: usize| current.max(level)));
                }
            }
        }
        RamCondition::Constraint { lhs, rhs, .. } => {
            value_max_level(lhs, &mut max);
            value_max_level(rhs, &mut max);
        }
        RamCondition::NotExists { pattern, .. } => pattern
            .iter()
            .flatten()
            .for_each(|value| value_max_level(value, &mut max)),
        RamCondition::Empty(_) => {}
    }
    max
}

fn operation_references_level(operation: &RamOperation, level: usize) -> bool {
    match operation {
        RamOperation::Scan { pattern, nested, .. } => {
            pattern
                .iter()
                .flatten()
                .any(|value| values_contain_level(value, level))
                || operation_references_level(nested, level)
        }
        RamOperation::Lookup {
            ref_level, nested, ..
        } => *ref_level == level || operation_references_level(nested, level),
        RamOperation::Aggregate {
            target,
            pattern,
            condition,
            nested,
            ..
        } => {
            target
                .as_ref()
                .map(|target| values_contain_level(target, level))
                .unwrap_or(false)
                || pattern
                    .iter()
                    .flatten()
                    .any(|value| values_contain_level(value, level))
                || condition
                    .as_ref()
                    .map(|condition| condition_references_level(condition, level))
                    .unwrap_or(false)
                || operation_references_level(nested, level)
        }
        RamOperation::Filter { condition, nested } => {
            condition_references_level(condition, level)
                || operation_references_level(nested, level)
        }
        RamOperation::Project { values, .. } => {
            values.iter().any(|value| values_contain_level(value, level))
        }
        RamOperation::Return { values } => values
            .iter()
            .flatten()
            .any(|value| values_contain_level(value, level)),
    }
}

fn values_contain_level(value: &RamValue, level: usize) -> bool {
    match value {
        RamValue::TupleElement { level: at, .. } => *at == level,
        RamValue::UnaryOp { arg, .. } => values_contain_level(arg, level),
        RamValue::BinaryOp { lhs, rhs, .. } => {
            values_contain_level(lhs, level) || values_contain_level(rhs, level)
        }
        RamValue::TernaryOp { args, .. } => {
            args.iter().any(|arg| values_contain_level(arg, level))
        }
        RamValue::Pack(values) => values.iter().any(|value| values_contain_level(value, level)),
        _ => false,
    }
}

fn condition_references_level(condition: &RamCondition, level: usize) -> bool {
    match condition {
        RamCondition::And(lhs, rhs) => {
            condition_references_level(lhs, level) || condition_references_level(rhs, level)
        }
        RamCondition::Constraint { lhs, rhs, .. } => {
            values_contain_level(lhs, level) || values_contain_level(rhs, level)
        }
        RamCondition::NotExists { pattern, .. } => pattern
            .iter()
            .flatten()
            .any(|value| values_contain_level(value, level)),
        RamCondition::Empty(_) => false,
    }
}

/// Scans whose bound tuple no inner operation ever reads become plain
/// existence checks.
fn mark_pure_existence(operation: &mut RamOperation) {
    if let RamOperation::Scan {
        level,
        pure_existence,
        nested,
        ..
    } = operation
    {
        if !operation_references_level(nested, *level) {
            *pure_existence = true;
        }
    }
    match operation {
        RamOperation::Scan { nested, .. }
        | RamOperation::Lookup { nested, .. }
        | RamOperation::Aggregate { nested, .. }
        | RamOperation::Filter { nested, .. } => mark_pure_existence(nested),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::{delta_name, new_name, translate};
    use crate::misc::string_interning::SymbolTable;
    use crate::models::datalog::Program;
    use crate::models::ram::{RamOperation, RamProgram, RamStatement};
    use crate::reasoning::checker::check;

    fn translate_source(source: &str) -> RamProgram {
        let program = Program::from(source);
        let (info, report) = check(&program);
        assert!(!report.has_errors(), "{}", report);
        let symbols = SymbolTable::new();
        translate(&program, &info, &symbols)
    }

    fn flatten<'a>(statement: &'a RamStatement, out: &mut Vec<&'a RamStatement>) {
        out.push(statement);
        match statement {
            RamStatement::Sequence(statements) | RamStatement::Parallel(statements) => {
                statements.iter().for_each(|statement| flatten(statement, out))
            }
            RamStatement::Loop(body) => flatten(body, out),
            RamStatement::DebugInfo { nested, .. } | RamStatement::LogTimer { nested, .. } => {
                flatten(nested, out)
            }
            _ => {}
        }
    }

    fn statements(program: &RamProgram) -> Vec<&RamStatement> {
        let mut out = vec![];
        flatten(&program.main, &mut out);
        out
    }

    #[test]
    fn test_transitive_closure_gets_a_semi_naive_loop() {
        let ram = translate_source(
            ".decl E(a: number, b: number)
             .decl T(a: number, b: number)
             .output T
             E(1, 2). E(2, 3).
             T(x, y) :- E(x, y).
             T(x, z) :- T(x, y), E(y, z).",
        );

        let all = statements(&ram);
        assert!(all.iter().any(|s| matches!(s, RamStatement::Loop(_))));
        assert!(all.iter().any(
            |s| matches!(s, RamStatement::Create(relation) if relation.name == delta_name("T"))
        ));
        assert!(all.iter().any(
            |s| matches!(s, RamStatement::Create(relation) if relation.name == new_name("T"))
        ));
        assert!(all
            .iter()
            .any(|s| matches!(s, RamStatement::Swap(a, b) if a == &delta_name("T") && b == &new_name("T"))));
        assert!(all
            .iter()
            .any(|s| matches!(s, RamStatement::Drop(name) if name == &delta_name("T"))));
        assert!(all
            .iter()
            .any(|s| matches!(s, RamStatement::Store { relation, .. } if relation == "T")));
    }

    #[test]
    fn test_delta_rule_projects_with_filter() {
        let ram = translate_source(
            ".decl E(a: number, b: number)
             .decl T(a: number, b: number)
             E(1, 2).
             T(x, y) :- E(x, y).
             T(x, z) :- T(x, y), E(y, z).",
        );

        fn find_filtered_project(operation: &RamOperation) -> bool {
            match operation {
                RamOperation::Project { relation, filter, .. } => {
                    relation == &new_name("T") && filter.as_deref() == Some("T")
                }
                RamOperation::Scan { nested, .. }
                | RamOperation::Lookup { nested, .. }
                | RamOperation::Aggregate { nested, .. }
                | RamOperation::Filter { nested, .. } => find_filtered_project(nested),
                _ => false,
            }
        }

        let found = statements(&ram).iter().any(|statement| match statement {
            RamStatement::Query(operation) => find_filtered_project(operation),
            _ => false,
        });
        assert!(found);
    }

    #[test]
    fn test_bound_columns_become_index_scans() {
        let ram = translate_source(
            ".decl E(a: number, b: number)
             .decl T(a: number, b: number)
             E(1, 2).
             T(x, z) :- E(x, y), E(y, z).",
        );

        fn has_ranged_scan(operation: &RamOperation) -> bool {
            match operation {
                RamOperation::Scan { columns, nested, .. } => {
                    *columns != 0 || has_ranged_scan(nested)
                }
                RamOperation::Lookup { nested, .. }
                | RamOperation::Aggregate { nested, .. }
                | RamOperation::Filter { nested, .. } => has_ranged_scan(nested),
                _ => false,
            }
        }

        let found = statements(&ram).iter().any(|statement| match statement {
            RamStatement::Query(operation) => has_ranged_scan(operation),
            _ => false,
        });
        assert!(found);

        // The demanded search also shows up as a pre-chosen index order.
        let created_with_order = statements(&ram).iter().any(|statement| {
            matches!(statement, RamStatement::Create(relation)
                if relation.name == "E" && !relation.orders.is_empty())
        });
        assert!(created_with_order);
    }

    #[test]
    fn test_negation_becomes_not_exists_filter() {
        let ram = translate_source(
            ".decl E(x: number)
             .decl R(x: number)
             .decl Q(x: number)
             E(1). R(1).
             Q(x) :- E(x), !R(x).",
        );

        fn has_not_exists(operation: &RamOperation) -> bool {
            match operation {
                RamOperation::Filter { condition, nested } => {
                    matches!(
                        condition,
                        crate::models::ram::RamCondition::NotExists { relation, total, .. }
                            if relation == "R" && *total
                    ) || has_not_exists(nested)
                }
                RamOperation::Scan { nested, .. }
                | RamOperation::Lookup { nested, .. }
                | RamOperation::Aggregate { nested, .. } => has_not_exists(nested),
                _ => false,
            }
        }

        let found = statements(&ram).iter().any(|statement| match statement {
            RamStatement::Query(operation) => has_not_exists(operation),
            _ => false,
        });
        assert!(found);
    }

    #[test]
    fn test_facts_become_fact_statements() {
        let ram = translate_source(
            ".decl E(a: number, b: symbol)
             E(1, \"one\").",
        );

        let found = statements(&ram)
            .iter()
            .any(|statement| matches!(statement, RamStatement::Fact { relation, .. } if relation == "E"));
        assert!(found);
    }

    #[test]
    fn test_existence_only_scans_are_marked() {
        let ram = translate_source(
            ".decl A(x: number)
             .decl B(x: number)
             .decl C(x: number)
             A(1). B(2).
             C(x) :- A(x), B(_).",
        );

        fn find_existence(operation: &RamOperation) -> bool {
            match operation {
                RamOperation::Scan {
                    pure_existence,
                    nested,
                    ..
                } => *pure_existence || find_existence(nested),
                RamOperation::Lookup { nested, .. }
                | RamOperation::Aggregate { nested, .. }
                | RamOperation::Filter { nested, .. } => find_existence(nested),
                _ => false,
            }
        }

        let found = statements(&ram).iter().any(|statement| match statement {
            RamStatement::Query(operation) => find_existence(operation),
            _ => false,
        });
        assert!(found);
    }
}
