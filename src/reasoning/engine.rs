use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::data_structures::record_pool::RecordPool;
use crate::io::profile::ProfileSink;
use crate::misc::string_interning::SymbolTable;
use crate::models::datalog::Program;
use crate::models::ram::RamProgram;
use crate::parsers::datalog::{parse_program, ParseError};
use crate::reasoning::checker::{check, ErrorReport, TypeInfo};
use crate::reasoning::interpreter::{EvalError, Interpreter};
use crate::reasoning::translator::translate;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("semantic errors:\n{0}")]
    Check(#[from] ErrorReport),
    #[error(transparent)]
    Eval(#[from] EvalError),
    #[error("{0}")]
    Io(#[from] std::io::Error),
}

/// Run configuration. Pragmas from the source program merge in at compile
/// time; values set up front (e.g. from the command line) win.
#[derive(Clone, Debug)]
pub struct Config {
    pub jobs: usize,
    pub fact_dir: PathBuf,
    pub output_dir: PathBuf,
    pub profile: Option<PathBuf>,
    pub pragmas: HashMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            jobs: 1,
            fact_dir: PathBuf::from("."),
            output_dir: PathBuf::from("."),
            profile: None,
            pragmas: HashMap::new(),
        }
    }
}

impl Config {
    pub fn apply_pragmas(&mut self, pragmas: &[(String, String)]) {
        for (key, value) in pragmas {
            if self.pragmas.contains_key(key) {
                continue;
            }
            self.pragmas.insert(key.clone(), value.clone());
            match key.as_str() {
                "jobs" => {
                    if let Ok(jobs) = value.parse() {
                        self.jobs = jobs;
                    }
                }
                "fact-dir" => self.fact_dir = PathBuf::from(value),
                "output-dir" => self.output_dir = PathBuf::from(value),
                "profile" => self.profile = Some(PathBuf::from(value)),
                _ => {}
            }
        }
    }
}

/// The compilation pipeline in one value: parse, check, translate to the
/// relational-algebra plan, evaluate. The symbol table and record pool
/// live here and are shared with every run.
pub struct Engine {
    pub config: Config,
    symbols: Arc<SymbolTable>,
    records: Arc<RecordPool>,
}

impl Engine {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        Self {
            config,
            symbols: Arc::new(SymbolTable::new()),
            records: Arc::new(RecordPool::new()),
        }
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    /// Parses and checks a source program, then compiles it into a plan.
    /// Warnings go to the log; errors refuse to produce a program.
    pub fn compile(&mut self, source: &str) -> Result<(Program, TypeInfo, RamProgram), EngineError> {
        let program = parse_program(source)?;
        self.config.apply_pragmas(&program.pragmas);

        let (info, report) = check(&program);
        for warning in report.warnings() {
            log::warn!("{}", warning);
        }
        if report.has_errors() {
            return Err(EngineError::Check(report));
        }

        let ram = translate(&program, &info, &self.symbols);
        Ok((program, info, ram))
    }

    fn interpreter(&self) -> Result<Interpreter, EngineError> {
        let mut interpreter =
            Interpreter::new(Arc::clone(&self.symbols), Arc::clone(&self.records));
        interpreter.set_jobs(self.config.jobs);
        interpreter.set_dirs(self.config.fact_dir.clone(), self.config.output_dir.clone());
        if let Some(path) = &self.config.profile {
            interpreter.set_profile(ProfileSink::to_path(path)?);
        }
        Ok(interpreter)
    }

    /// Compiles and evaluates a program; the returned interpreter holds
    /// the final relation store.
    pub fn run(&mut self, source: &str) -> Result<Interpreter, EngineError> {
        let (_, _, ram) = self.compile(source)?;
        let mut interpreter = self.interpreter()?;
        interpreter.run(&ram)?;
        Ok(interpreter)
    }

    /// Compiles, evaluates, and then invokes a named subroutine of the
    /// plan with the given argument values.
    pub fn run_subroutine(
        &mut self,
        source: &str,
        name: &str,
        args: &[crate::models::datalog::Value],
    ) -> Result<(Vec<crate::models::datalog::Value>, Vec<bool>), EngineError> {
        let (_, _, ram) = self.compile(source)?;
        let mut interpreter = self.interpreter()?;
        interpreter.run(&ram)?;
        Ok(interpreter.run_subroutine(&ram, name, args)?)
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}
