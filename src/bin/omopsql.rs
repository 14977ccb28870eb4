//! omopsql — validate and transpile SQL for OMOP CDM warehouses
//!
//! # Usage
//!
//! ```bash
//! # Validate a query against the default policy
//! omopsql validate "SELECT person_id FROM person"
//!
//! # Validate a file, machine-readable output
//! omopsql validate --file query.sql --json
//!
//! # Transpile Postgres SQL to Databricks
//! omopsql transpile "SELECT 1 FROM visit_occurrence WHERE (visit_end_date - visit_start_date) > 7"
//!
//! # Show the CDM table vocabulary
//! omopsql tables
//! ```

use std::io::Read;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use colored::*;
use omopsql::prelude::*;

#[derive(Parser)]
#[command(name = "omopsql")]
#[command(version)]
#[command(about = "SQL safety layer for OMOP CDM warehouses", long_about = None)]
#[command(after_help = "EXAMPLES:
    omopsql validate 'SELECT person_id, gender_concept_id FROM person'
    omopsql validate --file query.sql --config omopsql.toml
    omopsql transpile 'SELECT DATERANGE(a, b) FROM drug_era' --to databricks
    omopsql tables")]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(short, long, env = "OMOPSQL_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check a query against the access policy and report every violation
    Validate {
        /// The SQL to validate (reads stdin if neither this nor --file is given)
        sql: Option<String>,

        /// Read the SQL from a file
        #[arg(short, long, conflicts_with = "sql")]
        file: Option<PathBuf>,

        /// Emit violations as JSON instead of colored text
        #[arg(long)]
        json: bool,
    },
    /// Rewrite a query from one dialect to another
    Transpile {
        /// The SQL to transpile (reads stdin if neither this nor --file is given)
        sql: Option<String>,

        /// Read the SQL from a file
        #[arg(short, long, conflicts_with = "sql")]
        file: Option<PathBuf>,

        /// Source dialect
        #[arg(long, default_value = "postgres", value_parser = parse_dialect)]
        from: Dialect,

        /// Target dialect
        #[arg(long, default_value = "databricks", value_parser = parse_dialect)]
        to: Dialect,
    },
    /// List the OMOP CDM tables visible under the current policy
    Tables,
}

fn parse_dialect(s: &str) -> Result<Dialect, String> {
    s.parse().map_err(|e: TranspileError| e.message)
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                tracing_subscriber::EnvFilter::new(if cli.verbose {
                    "omopsql=debug"
                } else {
                    "omopsql=warn"
                })
            }),
        )
        .with_writer(std::io::stderr)
        .init();

    match run(&cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {:#}", "Error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> anyhow::Result<ExitCode> {
    let config = match &cli.config {
        Some(path) => Config::load(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => Config::default(),
    };

    match &cli.command {
        Commands::Validate { sql, file, json } => {
            let sql = read_input(sql.as_deref(), file.as_deref())?;
            Ok(validate(&sql, &config, *json))
        }
        Commands::Transpile { sql, file, from, to } => {
            let sql = read_input(sql.as_deref(), file.as_deref())?;
            let out = transpile(&sql, *from, *to)?;
            println!("{}", out);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Tables => {
            for table in config.policy().visible_tables() {
                println!("{}", table);
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn validate(sql: &str, config: &Config, json: bool) -> ExitCode {
    let validator = Validator::new(config.policy());
    let violations = validator.validate(sql);

    if json {
        let report = serde_json::json!({
            "valid": violations.is_empty(),
            "violations": violations
                .iter()
                .map(|v| serde_json::json!({
                    "kind": v.kind(),
                    "message": v.to_string(),
                }))
                .collect::<Vec<_>>(),
        });
        println!("{}", report);
        return if violations.is_empty() {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        };
    }

    if violations.is_empty() {
        println!("{} query passes all policy checks", "✓".green());
        return ExitCode::SUCCESS;
    }

    println!(
        "{} {} violation(s) found",
        "✗".red().bold(),
        violations.len()
    );
    for violation in &violations {
        println!(
            "  {} {}",
            format!("[{}]", violation.kind()).yellow(),
            violation
        );
    }
    ExitCode::FAILURE
}

fn read_input(sql: Option<&str>, file: Option<&std::path::Path>) -> anyhow::Result<String> {
    match (sql, file) {
        (Some(sql), _) => Ok(sql.to_string()),
        (None, Some(path)) => std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display())),
        (None, None) => {
            let mut buffer = String::new();
            std::io::stdin()
                .read_to_string(&mut buffer)
                .context("reading stdin")?;
            Ok(buffer)
        }
    }
}
