use std::fs;
use std::path::PathBuf;

use anyhow::Context;
use clap::{Arg, Command};
use colored::Colorize;

use tarski::io::converter::convert_file;
use tarski::reasoning::engine::{Config, Engine, EngineError};

const EXIT_FAILURE: i32 = 1;
const EXIT_USAGE: i32 = 2;

/// Invalid arguments exit with a distinct code from runtime failures.
enum CliError {
    Usage(anyhow::Error),
    Failure(anyhow::Error),
}

impl CliError {
    fn code(&self) -> i32 {
        match self {
            CliError::Usage(_) => EXIT_USAGE,
            CliError::Failure(_) => EXIT_FAILURE,
        }
    }

    fn message(&self) -> &anyhow::Error {
        match self {
            CliError::Usage(error) | CliError::Failure(error) => error,
        }
    }
}

impl From<anyhow::Error> for CliError {
    fn from(error: anyhow::Error) -> Self {
        CliError::Failure(error)
    }
}

fn parse_option_list(options: &str) -> Vec<(String, String)> {
    options
        .split(',')
        .filter(|entry| !entry.is_empty())
        .map(|entry| match entry.split_once('=') {
            Some((key, value)) => (key.to_string(), value.to_string()),
            None => (entry.to_string(), String::new()),
        })
        .collect()
}

fn run() -> Result<(), CliError> {
    let matches = Command::new("tarski")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Evaluates Datalog programs bottom-up; converts profile logs to CSV")
        .arg(
            Arg::new("PATH")
                .help("Program to evaluate, or profile log with -o")
                .required(true)
                .index(1),
        )
        .arg(
            Arg::new("FACT_DIR")
                .short('F')
                .long("fact-dir")
                .takes_value(true)
                .help("Directory for input fact files"),
        )
        .arg(
            Arg::new("OUTPUT_DIR")
                .short('D')
                .long("output-dir")
                .takes_value(true)
                .help("Directory for output relation files"),
        )
        .arg(
            Arg::new("JOBS")
                .short('j')
                .long("jobs")
                .takes_value(true)
                .help("Number of worker threads"),
        )
        .arg(
            Arg::new("PROFILE")
                .short('p')
                .long("profile")
                .takes_value(true)
                .help("Write an evaluation profile log to this file"),
        )
        .arg(
            Arg::new("OUTPUT_CSV")
                .short('o')
                .long("output-csv")
                .takes_value(true)
                .help("Convert the given profile log to CSV at this path"),
        )
        .arg(
            Arg::new("CSV_OPTIONS")
                .short('s')
                .long("csv-options")
                .takes_value(true)
                .requires("OUTPUT_CSV")
                .help("Converter options, e.g. headers=,quotes="),
        )
        .get_matches();

    let path = PathBuf::from(matches.value_of("PATH").unwrap());

    if let Some(csv_path) = matches.value_of("OUTPUT_CSV") {
        let options = matches
            .value_of("CSV_OPTIONS")
            .map(parse_option_list)
            .unwrap_or_default();
        convert_file(&path, &PathBuf::from(csv_path), &options)
            .with_context(|| format!("converting {}", path.display()))?;
        return Ok(());
    }

    let mut config = Config::default();
    // Command-line settings shadow any matching pragma in the program.
    if let Some(dir) = matches.value_of("FACT_DIR") {
        config.fact_dir = PathBuf::from(dir);
        config.pragmas.insert("fact-dir".to_string(), dir.to_string());
    }
    if let Some(dir) = matches.value_of("OUTPUT_DIR") {
        config.output_dir = PathBuf::from(dir);
        config.pragmas.insert("output-dir".to_string(), dir.to_string());
    }
    if let Some(jobs) = matches.value_of("JOBS") {
        config.jobs = jobs
            .parse()
            .map_err(|_| CliError::Usage(anyhow::anyhow!("invalid -j value {:?}", jobs)))?;
        config.pragmas.insert("jobs".to_string(), jobs.to_string());
    }
    if let Some(profile) = matches.value_of("PROFILE") {
        config.profile = Some(PathBuf::from(profile));
        config.pragmas.insert("profile".to_string(), profile.to_string());
    }

    let source = fs::read_to_string(&path)
        .with_context(|| format!("reading {}", path.display()))?;

    let mut engine = Engine::with_config(config);
    match engine.run(&source) {
        Ok(_) => Ok(()),
        Err(EngineError::Check(report)) => {
            for diagnostic in &report.diagnostics {
                eprintln!("{}", diagnostic);
            }
            Err(CliError::Failure(anyhow::anyhow!(
                "{} did not pass the checker",
                path.display()
            )))
        }
        Err(error) => Err(CliError::Failure(error.into())),
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    if let Err(error) = run() {
        eprintln!("{} {:#}", "error:".red().bold(), error.message());
        std::process::exit(error.code());
    }
}
