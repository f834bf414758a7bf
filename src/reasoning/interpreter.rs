use rayon::prelude::*;
use regex::Regex;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::PathBuf;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex};

use crate::data_structures::record_pool::{RecordPool, NULL_RECORD};
use crate::io::csv::{self, CsvConfig, CsvError};
use crate::io::profile::ProfileSink;
use crate::misc::string_interning::SymbolTable;
use crate::models::datalog::{
    AggregateOp, BinaryOp, ConstraintOp, Row, TernaryOp, UnaryOp, Value, MAX_VALUE, MIN_VALUE,
};
use crate::models::ram::{
    RamCondition, RamOperation, RamProgram, RamStatement, RamValue, RangePattern,
};
use crate::models::relation::Relation;

/// Full scans below this size are not worth partitioning across workers.
const PARALLEL_SCAN_THRESHOLD: usize = 1024;

#[derive(Debug, thiserror::Error)]
pub enum EvalError {
    #[error("division by zero")]
    DivisionByZero,
    #[error("modulo by zero")]
    ModuloByZero,
    #[error("unknown relation {0}")]
    UnknownRelation(String),
    #[error("unknown subroutine {0}")]
    UnknownSubroutine(String),
    #[error("{source}, while evaluating {rule}")]
    InRule {
        rule: String,
        #[source]
        source: Box<EvalError>,
    },
    #[error("loading {path}: {source}")]
    Load {
        path: String,
        #[source]
        source: CsvError,
    },
    #[error("storing {path}: {source}")]
    Store {
        path: String,
        #[source]
        source: CsvError,
    },
}

impl EvalError {
    fn in_rule(self, rule: &str) -> EvalError {
        EvalError::InRule {
            rule: rule.to_string(),
            source: Box::new(self),
        }
    }
}

/// Per-operation evaluation context: one tuple per nesting level, plus
/// the arguments of the current subroutine invocation.
pub struct OpContext {
    frames: Vec<Row>,
    args: Vec<Value>,
}

impl OpContext {
    pub fn new(depth: usize, args: Vec<Value>) -> Self {
        Self {
            frames: vec![Row::from(vec![]); depth],
            args,
        }
    }

    fn set(&mut self, level: usize, row: Row) {
        self.frames[level] = row;
    }

    fn frame(&self, level: usize) -> &Row {
        &self.frames[level]
    }
}

/// Rows produced by one insert-query evaluation, applied to the store
/// after the operation tree finishes.
#[derive(Default)]
pub struct QueryBuffer {
    inserts: Vec<(String, Row)>,
    returns: Vec<Value>,
    errors: Vec<bool>,
}

enum ParallelStep {
    Inserts(Vec<(String, Row)>),
    Timer {
        message: String,
        start: f64,
        end: f64,
    },
    Size {
        message: String,
        relation: String,
    },
}

/// Tree-walking evaluator over the relational-algebra plan: maintains the
/// relation store, drives loops to their exit condition, and executes
/// insert-queries with partitioned scans across workers.
pub struct Interpreter {
    relations: HashMap<String, Relation>,
    attribute_names: HashMap<String, Vec<String>>,
    symbols: Arc<SymbolTable>,
    records: Arc<RecordPool>,
    counter: AtomicI32,
    regexes: Mutex<HashMap<String, Option<Regex>>>,
    profile: Option<ProfileSink>,
    input_dir: PathBuf,
    output_dir: PathBuf,
    jobs: usize,
}

impl Interpreter {
    pub fn new(symbols: Arc<SymbolTable>, records: Arc<RecordPool>) -> Self {
        Self {
            relations: HashMap::new(),
            attribute_names: HashMap::new(),
            symbols,
            records,
            counter: AtomicI32::new(0),
            regexes: Mutex::new(HashMap::new()),
            profile: None,
            input_dir: PathBuf::from("."),
            output_dir: PathBuf::from("."),
            jobs: 1,
        }
    }

    pub fn set_dirs(&mut self, input_dir: PathBuf, output_dir: PathBuf) {
        self.input_dir = input_dir;
        self.output_dir = output_dir;
    }

    pub fn set_jobs(&mut self, jobs: usize) {
        self.jobs = jobs.max(1);
    }

    pub fn set_profile(&mut self, sink: ProfileSink) {
        self.profile = Some(sink);
    }

    pub fn relation(&self, name: &str) -> Result<&Relation, EvalError> {
        self.relations
            .get(name)
            .ok_or_else(|| EvalError::UnknownRelation(name.to_string()))
    }

    pub fn relations(&self) -> impl Iterator<Item = &Relation> {
        self.relations.values()
    }

    /// Runs the main statement to completion.
    pub fn run(&mut self, program: &RamProgram) -> Result<(), EvalError> {
        let result = self.run_statement(&program.main).map(|_| ());
        if let Some(profile) = &self.profile {
            profile.timer_event("@runtime", 0.0, profile.elapsed());
        }
        result
    }

    /// Executes a named subroutine with argument values; returns the flat
    /// output values and a parallel list of error flags.
    pub fn run_subroutine(
        &mut self,
        program: &RamProgram,
        name: &str,
        args: &[Value],
    ) -> Result<(Vec<Value>, Vec<bool>), EvalError> {
        let statement = program
            .subroutines
            .get(name)
            .ok_or_else(|| EvalError::UnknownSubroutine(name.to_string()))?;

        let mut inner = statement;
        while let RamStatement::DebugInfo { nested, .. } = inner {
            inner = nested;
        }
        match inner {
            RamStatement::Query(operation) => {
                let buffer = self.eval_query(operation, args)?;
                self.apply_inserts(buffer.inserts)?;
                Ok((buffer.returns, buffer.errors))
            }
            other => {
                self.run_statement(other)?;
                Ok((vec![], vec![]))
            }
        }
    }

    // --- values ---

    fn eval_value(&self, value: &RamValue, ctxt: &OpContext) -> Result<Value, EvalError> {
        match value {
            RamValue::Number(constant) => Ok(*constant),
            RamValue::TupleElement { level, position } => Ok(ctxt.frame(*level)[*position]),
            RamValue::AutoIncrement => Ok(self.counter.fetch_add(1, Ordering::Relaxed)),
            RamValue::UnaryOp { op, arg } => {
                let operand = self.eval_value(arg, ctxt)?;
                Ok(match op {
                    UnaryOp::Neg => operand.wrapping_neg(),
                    UnaryOp::Bnot => !operand,
                    UnaryOp::Lnot => (operand == 0) as Value,
                    UnaryOp::Ord => operand,
                    UnaryOp::Strlen => self.symbols.resolve(operand).len() as Value,
                    UnaryOp::Sin => (operand as f64).sin() as Value,
                    UnaryOp::Cos => (operand as f64).cos() as Value,
                    UnaryOp::Tan => (operand as f64).tan() as Value,
                    UnaryOp::Exp => (operand as f64).exp() as Value,
                    UnaryOp::Log => (operand as f64).ln() as Value,
                })
            }
            RamValue::BinaryOp { op, lhs, rhs } => {
                let left = self.eval_value(lhs, ctxt)?;
                let right = self.eval_value(rhs, ctxt)?;
                Ok(match op {
                    BinaryOp::Add => left.wrapping_add(right),
                    BinaryOp::Sub => left.wrapping_sub(right),
                    BinaryOp::Mul => left.wrapping_mul(right),
                    BinaryOp::Div => {
                        if right == 0 {
                            return Err(EvalError::DivisionByZero);
                        }
                        left.wrapping_div(right)
                    }
                    BinaryOp::Mod => {
                        if right == 0 {
                            return Err(EvalError::ModuloByZero);
                        }
                        left.wrapping_rem(right)
                    }
                    BinaryOp::Pow => (left as f64).powf(right as f64) as Value,
                    BinaryOp::Band => left & right,
                    BinaryOp::Bor => left | right,
                    BinaryOp::Bxor => left ^ right,
                    BinaryOp::Land => ((left != 0) && (right != 0)) as Value,
                    BinaryOp::Lor => ((left != 0) || (right != 0)) as Value,
                    BinaryOp::Min => left.min(right),
                    BinaryOp::Max => left.max(right),
                    BinaryOp::Cat => {
                        let joined = format!(
                            "{}{}",
                            self.symbols.resolve(left),
                            self.symbols.resolve(right)
                        );
                        self.symbols.intern(&joined)
                    }
                })
            }
            RamValue::TernaryOp {
                op: TernaryOp::Substr,
                args,
            } => {
                let symbol = self.eval_value(&args[0], ctxt)?;
                let start = self.eval_value(&args[1], ctxt)?;
                let length = self.eval_value(&args[2], ctxt)?;
                let text = self.symbols.resolve(symbol);
                let sub = if start < 0 || length < 0 || start as usize > text.chars().count() {
                    log::warn!(
                        "substr({:?}, {}, {}) out of range",
                        text,
                        start,
                        length
                    );
                    String::new()
                } else {
                    text.chars()
                        .skip(start as usize)
                        .take(length as usize)
                        .collect()
                };
                Ok(self.symbols.intern(&sub))
            }
            RamValue::Pack(values) => {
                let mut tuple = Vec::with_capacity(values.len());
                for value in values {
                    tuple.push(self.eval_value(value, ctxt)?);
                }
                Ok(self.records.pack(&tuple))
            }
            RamValue::Argument(index) => Ok(ctxt.args[*index]),
        }
    }

    // --- conditions ---

    fn eval_condition(&self, condition: &RamCondition, ctxt: &OpContext) -> Result<bool, EvalError> {
        match condition {
            RamCondition::And(lhs, rhs) => {
                Ok(self.eval_condition(lhs, ctxt)? && self.eval_condition(rhs, ctxt)?)
            }
            RamCondition::Empty(relation) => Ok(self.relation(relation)?.is_empty()),
            RamCondition::NotExists {
                relation,
                columns,
                pattern,
                total,
            } => {
                let relation = self.relation(relation)?;
                if *total {
                    let mut key = Vec::with_capacity(pattern.len());
                    for entry in pattern {
                        key.push(match entry {
                            Some(value) => self.eval_value(value, ctxt)?,
                            None => MIN_VALUE,
                        });
                    }
                    Ok(!relation.contains(&key))
                } else {
                    let (lower, upper) = self.bounds(pattern, ctxt)?;
                    Ok(relation.is_range_empty(*columns, &lower, &upper))
                }
            }
            RamCondition::Constraint { op, lhs, rhs } => {
                let left = self.eval_value(lhs, ctxt)?;
                let right = self.eval_value(rhs, ctxt)?;
                Ok(match op {
                    ConstraintOp::Eq => left == right,
                    ConstraintOp::Ne => left != right,
                    ConstraintOp::Lt => left < right,
                    ConstraintOp::Le => left <= right,
                    ConstraintOp::Gt => left > right,
                    ConstraintOp::Ge => left >= right,
                    // A broken pattern warns and makes the constraint
                    // false, negated or not.
                    ConstraintOp::Match => {
                        self.regex_matches(left, right).unwrap_or(false)
                    }
                    ConstraintOp::NotMatch => self
                        .regex_matches(left, right)
                        .map(|matched| !matched)
                        .unwrap_or(false),
                    ConstraintOp::Contains => {
                        let needle = self.symbols.resolve(left);
                        self.symbols.resolve(right).contains(needle)
                    }
                    ConstraintOp::NotContains => {
                        let needle = self.symbols.resolve(left);
                        !self.symbols.resolve(right).contains(needle)
                    }
                })
            }
        }
    }

    fn compiled_regex(&self, pattern_id: Value) -> Option<Regex> {
        let pattern = self.symbols.resolve(pattern_id);
        let mut cache = self.regexes.lock().unwrap();
        let entry = cache
            .entry(pattern.to_string())
            .or_insert_with(|| Regex::new(&format!("^(?:{})$", pattern)).ok());
        entry.clone()
    }

    /// `None` means the pattern does not parse; every occurrence warns.
    fn regex_matches(&self, pattern_id: Value, text_id: Value) -> Option<bool> {
        match self.compiled_regex(pattern_id) {
            Some(regex) => Some(regex.is_match(self.symbols.resolve(text_id))),
            None => {
                log::warn!(
                    "cannot parse pattern {:?} in match constraint",
                    self.symbols.resolve(pattern_id)
                );
                None
            }
        }
    }

    fn bounds(
        &self,
        pattern: &RangePattern,
        ctxt: &OpContext,
    ) -> Result<(Vec<Value>, Vec<Value>), EvalError> {
        let mut lower = vec![MIN_VALUE; pattern.len()];
        let mut upper = vec![MAX_VALUE; pattern.len()];
        for (position, entry) in pattern.iter().enumerate() {
            if let Some(value) = entry {
                let value = self.eval_value(value, ctxt)?;
                lower[position] = value;
                upper[position] = value;
            }
        }
        Ok((lower, upper))
    }

    // --- operations ---

    fn eval_operation(
        &self,
        operation: &RamOperation,
        ctxt: &mut OpContext,
        out: &mut QueryBuffer,
    ) -> Result<(), EvalError> {
        match operation {
            RamOperation::Scan {
                relation,
                level,
                columns,
                pattern,
                pure_existence,
                nested,
            } => {
                let relation = self.relation(relation)?;
                if *columns == 0 {
                    if *pure_existence {
                        if !relation.is_empty() {
                            self.eval_operation(nested, ctxt, out)?;
                        }
                        return Ok(());
                    }
                    // The borrow of the relation outlives the context
                    // mutation, so copy the rows out up front.
                    let rows: Vec<Row> = relation.scan().cloned().collect();
                    for row in rows {
                        ctxt.set(*level, row);
                        self.eval_operation(nested, ctxt, out)?;
                    }
                    return Ok(());
                }

                let (lower, upper) = self.bounds(pattern, ctxt)?;
                if *pure_existence {
                    if !relation.is_range_empty(*columns, &lower, &upper) {
                        self.eval_operation(nested, ctxt, out)?;
                    }
                    return Ok(());
                }
                for row in relation.range(*columns, &lower, &upper) {
                    ctxt.set(*level, row);
                    self.eval_operation(nested, ctxt, out)?;
                }
                Ok(())
            }
            RamOperation::Lookup {
                ref_level,
                ref_position,
                level,
                arity,
                nested,
            } => {
                let reference = ctxt.frame(*ref_level)[*ref_position];
                if reference == NULL_RECORD {
                    return Ok(());
                }
                if let Some(tuple) = self.records.unpack(reference, *arity) {
                    ctxt.set(*level, tuple);
                    self.eval_operation(nested, ctxt, out)?;
                }
                Ok(())
            }
            RamOperation::Aggregate {
                op,
                target,
                relation,
                columns,
                pattern,
                level,
                condition,
                nested,
            } => {
                let store = self.relation(relation)?;
                let rows: Vec<Row> = if *columns == 0 {
                    store.scan().cloned().collect()
                } else {
                    let (lower, upper) = self.bounds(pattern, ctxt)?;
                    store.range(*columns, &lower, &upper)
                };

                // min and max over an empty range derive nothing; count
                // and sum still produce their zero.
                if rows.is_empty() && matches!(op, AggregateOp::Min | AggregateOp::Max) {
                    return Ok(());
                }

                let mut result: Value = match op {
                    AggregateOp::Min => MAX_VALUE,
                    AggregateOp::Max => MIN_VALUE,
                    AggregateOp::Count | AggregateOp::Sum => 0,
                };
                for row in rows {
                    if *op == AggregateOp::Count {
                        result += 1;
                        continue;
                    }
                    ctxt.set(*level, row);
                    let target = target
                        .as_ref()
                        .expect("non-count aggregate carries a target");
                    let current = self.eval_value(target, ctxt)?;
                    result = match op {
                        AggregateOp::Min => result.min(current),
                        AggregateOp::Max => result.max(current),
                        AggregateOp::Sum => result.wrapping_add(current),
                        AggregateOp::Count => result,
                    };
                }

                ctxt.set(*level, vec![result].into_boxed_slice());
                if let Some(condition) = condition {
                    if !self.eval_condition(condition, ctxt)? {
                        return Ok(());
                    }
                }
                self.eval_operation(nested, ctxt, out)
            }
            RamOperation::Filter { condition, nested } => {
                if self.eval_condition(condition, ctxt)? {
                    self.eval_operation(nested, ctxt, out)?;
                }
                Ok(())
            }
            RamOperation::Project {
                relation,
                values,
                filter,
            } => {
                let mut row = Vec::with_capacity(values.len());
                for value in values {
                    row.push(self.eval_value(value, ctxt)?);
                }
                if let Some(filter) = filter {
                    if self.relation(filter)?.contains(&row) {
                        return Ok(());
                    }
                }
                out.inserts.push((relation.clone(), row.into_boxed_slice()));
                Ok(())
            }
            RamOperation::Return { values } => {
                for value in values {
                    match value {
                        Some(value) => {
                            out.returns.push(self.eval_value(value, ctxt)?);
                            out.errors.push(false);
                        }
                        None => {
                            out.returns.push(0);
                            out.errors.push(true);
                        }
                    }
                }
                Ok(())
            }
        }
    }

    /// Evaluates one insert-query. An unrestricted outermost scan over a
    /// large relation is partitioned across the worker pool.
    fn eval_query(
        &self,
        operation: &RamOperation,
        args: &[Value],
    ) -> Result<QueryBuffer, EvalError> {
        let depth = operation.depth();

        if let RamOperation::Scan {
            relation,
            level,
            columns: 0,
            pattern: _,
            pure_existence: false,
            nested,
        } = operation
        {
            let store = self.relation(relation)?;
            if self.jobs > 1 && store.len() >= PARALLEL_SCAN_THRESHOLD {
                let buffers = store
                    .partition(self.jobs * 4)
                    .into_par_iter()
                    .map(|part| {
                        let mut ctxt = OpContext::new(depth, args.to_vec());
                        let mut out = QueryBuffer::default();
                        for row in part {
                            ctxt.set(*level, row.clone());
                            self.eval_operation(nested, &mut ctxt, &mut out)?;
                        }
                        Ok(out)
                    })
                    .collect::<Result<Vec<_>, EvalError>>()?;

                let mut merged = QueryBuffer::default();
                for buffer in buffers {
                    merged.inserts.extend(buffer.inserts);
                    merged.returns.extend(buffer.returns);
                    merged.errors.extend(buffer.errors);
                }
                return Ok(merged);
            }
        }

        let mut ctxt = OpContext::new(depth, args.to_vec());
        let mut out = QueryBuffer::default();
        self.eval_operation(operation, &mut ctxt, &mut out)?;
        Ok(out)
    }

    fn apply_inserts(&mut self, inserts: Vec<(String, Row)>) -> Result<(), EvalError> {
        for (name, row) in inserts {
            let relation = self
                .relations
                .get_mut(&name)
                .ok_or(EvalError::UnknownRelation(name))?;
            relation.insert(&row);
        }
        Ok(())
    }

    // --- statements ---

    /// Returns false when an exit condition fired; sequences stop early
    /// on false and loops terminate on it.
    pub fn run_statement(&mut self, statement: &RamStatement) -> Result<bool, EvalError> {
        match statement {
            RamStatement::Create(decl) => {
                let mut relation = if decl.equivalence {
                    Relation::new_equivalence(&decl.name, decl.kinds[0])
                } else {
                    Relation::new(&decl.name, decl.kinds.clone())
                };
                for order in &decl.orders {
                    relation.ensure_order(order.clone());
                }
                self.attribute_names
                    .insert(decl.name.clone(), decl.attributes.clone());
                self.relations.insert(decl.name.clone(), relation);
                Ok(true)
            }
            RamStatement::Fact { relation, values } => {
                let ctxt = OpContext::new(0, vec![]);
                let mut row = Vec::with_capacity(values.len());
                for value in values {
                    row.push(self.eval_value(value, &ctxt)?);
                }
                let relation = self
                    .relations
                    .get_mut(relation)
                    .ok_or_else(|| EvalError::UnknownRelation(relation.clone()))?;
                relation.insert(&row);
                Ok(true)
            }
            RamStatement::Load { relation, options } => {
                self.load_relation(relation, options)?;
                Ok(true)
            }
            RamStatement::Store { relation, options } => {
                self.store_relation(relation, options)?;
                Ok(true)
            }
            RamStatement::Clear(relation) => {
                self.relations
                    .get_mut(relation)
                    .ok_or_else(|| EvalError::UnknownRelation(relation.clone()))?
                    .purge();
                Ok(true)
            }
            RamStatement::Drop(relation) => {
                self.relations.remove(relation);
                self.attribute_names.remove(relation);
                Ok(true)
            }
            RamStatement::Merge { source, target } => {
                // Merging into an equivalence relation first folds the
                // target's knowledge back into the source, so that a delta
                // read in the next iteration sees the implied pairs.
                if self.relation(target)?.is_equivalence()
                    && self.relation(source)?.is_equivalence()
                {
                    let known: Vec<Row> = self.relation(target)?.scan().cloned().collect();
                    let source = self
                        .relations
                        .get_mut(source)
                        .ok_or_else(|| EvalError::UnknownRelation(source.clone()))?;
                    for row in known {
                        source.insert(&row);
                    }
                }

                let rows: Vec<Row> = self.relation(source)?.scan().cloned().collect();
                let target = self
                    .relations
                    .get_mut(target)
                    .ok_or_else(|| EvalError::UnknownRelation(target.clone()))?;
                for row in rows {
                    target.insert(&row);
                }
                Ok(true)
            }
            RamStatement::Swap(left, right) => {
                let mut first = self
                    .relations
                    .remove(left)
                    .ok_or_else(|| EvalError::UnknownRelation(left.clone()))?;
                let mut second = self
                    .relations
                    .remove(right)
                    .ok_or_else(|| EvalError::UnknownRelation(right.clone()))?;
                first.swap_contents(&mut second);
                self.relations.insert(left.clone(), first);
                self.relations.insert(right.clone(), second);
                Ok(true)
            }
            RamStatement::Query(operation) => {
                let buffer = self.eval_query(operation, &[])?;
                self.apply_inserts(buffer.inserts)?;
                Ok(true)
            }
            RamStatement::Sequence(statements) => {
                for statement in statements {
                    if !self.run_statement(statement)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
            RamStatement::Parallel(statements) => self.run_parallel(statements),
            RamStatement::Loop(body) => {
                while self.run_statement(body)? {}
                Ok(true)
            }
            RamStatement::Exit(condition) => {
                let ctxt = OpContext::new(0, vec![]);
                Ok(!self.eval_condition(condition, &ctxt)?)
            }
            RamStatement::DebugInfo { message, nested } => self
                .run_statement(nested)
                .map_err(|error| error.in_rule(message)),
            RamStatement::LogTimer { message, nested } => {
                if self.profile.is_none() {
                    return self.run_statement(nested);
                }
                let start = self.profile.as_ref().unwrap().elapsed();
                let result = self.run_statement(nested);
                let profile = self.profile.as_ref().unwrap();
                profile.timer_event(message, start, profile.elapsed());
                result
            }
            RamStatement::LogSize { message, relation } => {
                if let Some(profile) = &self.profile {
                    profile.size_event(message, self.relation(relation)?.len());
                }
                Ok(true)
            }
        }
    }

    /// Children that are pure insert-queries (possibly wrapped in debug
    /// and profile markers) evaluate concurrently against the store and
    /// apply their insertions at the join; anything else falls back to
    /// program order.
    fn run_parallel(&mut self, children: &[RamStatement]) -> Result<bool, EvalError> {
        let parallelizable =
            self.jobs > 1 && children.len() > 1 && children.iter().all(parallel_shape);
        if !parallelizable {
            for child in children {
                if !self.run_statement(child)? {
                    return Ok(false);
                }
            }
            return Ok(true);
        }

        let this: &Interpreter = self;
        let plans = children
            .par_iter()
            .map(|child| this.plan_parallel_child(child))
            .collect::<Result<Vec<_>, EvalError>>()?;

        for steps in plans {
            for step in steps {
                match step {
                    ParallelStep::Inserts(inserts) => self.apply_inserts(inserts)?,
                    ParallelStep::Timer {
                        message,
                        start,
                        end,
                    } => {
                        if let Some(profile) = &self.profile {
                            profile.timer_event(&message, start, end);
                        }
                    }
                    ParallelStep::Size { message, relation } => {
                        if let Some(profile) = &self.profile {
                            profile.size_event(&message, self.relation(&relation)?.len());
                        }
                    }
                }
            }
        }
        Ok(true)
    }

    fn plan_parallel_child(
        &self,
        statement: &RamStatement,
    ) -> Result<Vec<ParallelStep>, EvalError> {
        match statement {
            RamStatement::Query(operation) => {
                let buffer = self.eval_query(operation, &[])?;
                Ok(vec![ParallelStep::Inserts(buffer.inserts)])
            }
            RamStatement::Sequence(statements) => {
                let mut steps = vec![];
                for statement in statements {
                    steps.extend(self.plan_parallel_child(statement)?);
                }
                Ok(steps)
            }
            RamStatement::DebugInfo { message, nested } => self
                .plan_parallel_child(nested)
                .map_err(|error| error.in_rule(message)),
            RamStatement::LogTimer { message, nested } => {
                let start = self.profile.as_ref().map(|p| p.elapsed()).unwrap_or(0.0);
                let mut steps = self.plan_parallel_child(nested)?;
                let end = self.profile.as_ref().map(|p| p.elapsed()).unwrap_or(0.0);
                if self.profile.is_some() {
                    steps.push(ParallelStep::Timer {
                        message: message.clone(),
                        start,
                        end,
                    });
                }
                Ok(steps)
            }
            RamStatement::LogSize { message, relation } => Ok(vec![ParallelStep::Size {
                message: message.clone(),
                relation: relation.clone(),
            }]),
            _ => unreachable!("non-query statement under a parallel evaluation"),
        }
    }

    // --- input/output ---

    fn load_relation(
        &mut self,
        name: &str,
        options: &[(String, String)],
    ) -> Result<(), EvalError> {
        let config = CsvConfig::from_options(options);
        let path = options
            .iter()
            .find(|(key, _)| key == "filename")
            .map(|(_, value)| self.input_dir.join(value))
            .unwrap_or_else(|| self.input_dir.join(format!("{}.facts", name)));
        let display = path.display().to_string();

        let kinds = self.relation(name)?.kinds().to_vec();
        let symbols = Arc::clone(&self.symbols);
        let file = File::open(&path).map_err(|error| EvalError::Load {
            path: display.clone(),
            source: error.into(),
        })?;
        let rows = csv::read_rows(BufReader::new(file), &kinds, &symbols, &config).map_err(
            |error| EvalError::Load {
                path: display,
                source: error,
            },
        )?;

        let relation = self
            .relations
            .get_mut(name)
            .ok_or_else(|| EvalError::UnknownRelation(name.to_string()))?;
        for row in rows {
            relation.insert(&row);
        }
        Ok(())
    }

    fn store_relation(&self, name: &str, options: &[(String, String)]) -> Result<(), EvalError> {
        let config = CsvConfig::from_options(options);
        let path = options
            .iter()
            .find(|(key, _)| key == "filename")
            .map(|(_, value)| self.output_dir.join(value))
            .unwrap_or_else(|| self.output_dir.join(format!("{}.csv", name)));
        let display = path.display().to_string();

        let relation = self.relation(name)?;
        let names = self
            .attribute_names
            .get(name)
            .cloned()
            .unwrap_or_default();
        let file = File::create(&path).map_err(|error| EvalError::Store {
            path: display.clone(),
            source: error.into(),
        })?;
        let mut writer = BufWriter::new(file);
        csv::write_rows(
            &mut writer,
            relation.scan(),
            &names,
            relation.kinds(),
            &self.symbols,
            &config,
        )
        .map_err(|error| EvalError::Store {
            path: display,
            source: error,
        })?;
        Ok(())
    }
}

fn parallel_shape(statement: &RamStatement) -> bool {
    match statement {
        RamStatement::Query(_) | RamStatement::LogSize { .. } => true,
        RamStatement::DebugInfo { nested, .. } | RamStatement::LogTimer { nested, .. } => {
            parallel_shape(nested)
        }
        RamStatement::Sequence(statements) => statements.iter().all(parallel_shape),
        _ => false,
    }
}
