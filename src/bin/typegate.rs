//! typegate CLI
//!
//! Generates TypeScript bindings from an interface schema, checks that they
//! compile, and validates recorded contract interactions against them.
//!
//! Usage:
//!   typegate --schema api/openapi.json --out-dir web/src/generated --contracts contracts
//!   typegate --ci --strict
//!   typegate --permissive --write-config typegate.toml
//!   typegate --help
//!
//! Exit codes: 0 success, 1 validation failed, 2 pipeline crashed, 3 cancelled.

use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;

use anyhow::{anyhow, Context};
use clap::{ArgAction, Parser};
use tracing_subscriber::EnvFilter;
use typegate::compatibility::Strictness;
use typegate::config::ConfigOverrides;
use typegate::pipeline::{EXIT_CRASHED, EXIT_SUCCESS, EXIT_VALIDATION_FAILED};
use typegate::report::RunReport;
use typegate::{FileStateStore, Outcome, Pipeline, PipelineConfig, PipelineRun, RunStatus};

#[derive(Parser)]
#[command(name = "typegate")]
#[command(about = "Generate TypeScript bindings from a schema and validate contracts against them")]
#[command(version)]
struct Cli {
    /// Interface schema document
    #[arg(long)]
    schema: Option<PathBuf>,

    /// Output directory for generated artifacts
    #[arg(long)]
    out_dir: Option<PathBuf>,

    /// Directory of recorded contract interactions
    #[arg(long)]
    contracts: Option<PathBuf>,

    /// Output directory for report.json and report.md
    #[arg(long)]
    report_dir: Option<PathBuf>,

    /// Persisted run-state file
    #[arg(long)]
    state_file: Option<PathBuf>,

    /// Configuration file (in addition to typegate.toml lookup)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Treat compatibility findings as build-breaking
    #[arg(long, conflicts_with = "permissive")]
    strict: bool,

    /// Report compatibility findings as warnings only
    #[arg(long)]
    permissive: bool,

    /// Validate without writing artifacts or run state
    #[arg(long)]
    dry_run: bool,

    /// Regenerate even if the schema is unchanged
    #[arg(long)]
    force: bool,

    /// CI mode: always regenerate, JSON logs
    #[arg(long)]
    ci: bool,

    /// Skip the static checker
    #[arg(long)]
    no_check: bool,

    /// Write the effective configuration to this file and exit without running
    #[arg(long, value_name = "PATH")]
    write_config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

impl Cli {
    fn overrides(&self) -> ConfigOverrides {
        let mode = if self.strict {
            Some(Strictness::Strict)
        } else if self.permissive {
            Some(Strictness::Permissive)
        } else {
            None
        };
        ConfigOverrides {
            schema: self.schema.clone(),
            out_dir: self.out_dir.clone(),
            contracts_dir: self.contracts.clone(),
            report_dir: self.report_dir.clone(),
            state_file: self.state_file.clone(),
            mode,
            dry_run: self.dry_run,
            force: self.force,
            ci: self.ci,
            no_check: self.no_check,
        }
    }
}

fn main() {
    let cli = Cli::parse();

    let code = match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("❌ Error: {:#}", e);
            EXIT_CRASHED
        }
    };
    std::process::exit(code);
}

fn run(cli: Cli) -> anyhow::Result<i32> {
    let config_path = match &cli.config {
        Some(path) => Some(
            path.to_str()
                .with_context(|| format!("config path is not valid UTF-8: {:?}", path))?,
        ),
        None => None,
    };
    let mut config = match PipelineConfig::load_from(config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ Configuration error: {}", e);
            return Ok(EXIT_VALIDATION_FAILED);
        }
    };
    config.apply(cli.overrides());

    if let Some(path) = &cli.write_config {
        config
            .save(path)
            .with_context(|| format!("failed to write configuration to {}", path.display()))?;
        println!("✅ Configuration written to {}", path.display());
        return Ok(EXIT_SUCCESS);
    }

    init_logging(config.pipeline.ci, cli.verbose)?;

    let store = FileStateStore::new(config.pipeline.state_file.clone());
    let pipeline = Pipeline::new(config, Box::new(store));

    let run = match panic::catch_unwind(AssertUnwindSafe(|| pipeline.run())) {
        Ok(run) => run,
        Err(_) => {
            eprintln!("❌ Pipeline crashed unexpectedly");
            return Ok(EXIT_CRASHED);
        }
    };

    print_summary(&run);
    Ok(run.exit_code())
}

fn init_logging(ci: bool, verbose: u8) -> anyhow::Result<()> {
    let default_level = match (ci, verbose) {
        (true, _) | (false, 0) => "info",
        (false, 1) => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    let installed = if ci {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    installed.map_err(|e| anyhow!("failed to install logger: {}", e))
}

fn print_summary(run: &PipelineRun) {
    let report = RunReport::from_run(run);

    println!("\n🔍 typegate run {}", run.run_id);
    if let Some(fp) = &run.fingerprint {
        println!("   Schema fingerprint: {}", fp.short());
    }
    if let Some(reason) = run.change_reason {
        println!("   Change check: {}", reason);
    }
    for change in &run.artifact_changes {
        println!(
            "   {:?} {} (+{} -{})",
            change.status, change.file_name, change.lines_added, change.lines_removed
        );
    }
    if run.contract_summary.total_interactions > 0 {
        println!(
            "   Contracts: {} validated, {} incompatible, {} skipped",
            run.contract_summary.validated_interactions,
            run.findings.len(),
            run.contract_summary.skipped_interactions
        );
    }
    for path in &run.report_paths {
        println!("   Report: {}", path.display());
    }

    match (run.status, report.outcome) {
        (RunStatus::Skipped, _) => eprintln!("\n✅ Schema unchanged - nothing to regenerate"),
        (RunStatus::Cancelled, _) => eprintln!("\n⚠️  Run cancelled"),
        (RunStatus::Failed, _) => {
            if let Some(fatal) = &run.fatal_error {
                eprintln!("\n❌ Run failed during {}: {}", fatal.stage, fatal.message);
            }
        }
        (_, Outcome::Clean) => eprintln!("\n✅ Bindings generated and validated"),
        (_, Outcome::WarningsOnly) => eprintln!(
            "\n⚠️  Passed with {} warning(s) and {} non-blocking error(s)",
            report.warning_count, report.error_count
        ),
        (_, Outcome::Blocking) => eprintln!(
            "\n❌ Validation failed: {} error(s), {} warning(s)",
            report.error_count, report.warning_count
        ),
    }
}
