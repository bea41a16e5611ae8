//! Pipeline orchestration
//!
//! Drives one run through its stages:
//!
//! ```text
//! Idle -> Loading -> ChangeCheck -> (SkipIfUnchanged | Emitting) -> Validating
//!      -> ContractChecking -> Reporting -> Done | Failed | Cancelled
//! ```
//!
//! Stages run sequentially. Diagnostics and findings accumulate in the run;
//! the verdict is computed once at the end. A fatal error stops the stage
//! sequence and jumps to reporting. Cancellation is observed only between
//! stages.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::TempDir;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::change::{ChangeDetector, ChangeReason, CurrentInputs};
use crate::checksum::Fingerprint;
use crate::codegen::{write_artifacts, ArtifactChange, EmittedArtifact, TypeEmitter};
use crate::compatibility::{
    CompatibilityFinding, ContractCompatibilityChecker, ContractSummary, Strictness,
};
use crate::compiler::CompilationValidator;
use crate::config::PipelineConfig;
use crate::contracts::{load_fixtures, RouteTable};
use crate::diagnostics::{codes, Diagnostics, Severity, Stage, ValidationDiagnostic};
use crate::error::PipelineError;
use crate::report::ReportGenerator;
use crate::schema::SchemaLoader;
use crate::state::{PersistedRunState, RunOutcome, RunStateStore, StateLock};

/// Exit code for a successful run
pub const EXIT_SUCCESS: i32 = 0;
/// Exit code when validation failed or the inputs were unusable
pub const EXIT_VALIDATION_FAILED: i32 = 1;
/// Exit code when the pipeline itself broke
pub const EXIT_CRASHED: i32 = 2;
/// Exit code for a cancelled run
pub const EXIT_CANCELLED: i32 = 3;

/// Orchestrator states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Idle,
    Loading,
    ChangeCheck,
    SkipIfUnchanged,
    Emitting,
    Validating,
    ContractChecking,
    Reporting,
    Done,
    Failed,
    Cancelled,
}

impl PipelineState {
    /// Diagnostic stage attributed to work done in this state
    pub fn stage(&self) -> Stage {
        match self {
            Self::Idle | Self::Loading => Stage::Loading,
            Self::ChangeCheck | Self::SkipIfUnchanged => Stage::ChangeCheck,
            Self::Emitting => Stage::Emitting,
            Self::Validating => Stage::Validating,
            Self::ContractChecking => Stage::ContractChecking,
            Self::Reporting | Self::Done | Self::Failed | Self::Cancelled => Stage::Reporting,
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Loading => "loading",
            Self::ChangeCheck => "change_check",
            Self::SkipIfUnchanged => "skip_if_unchanged",
            Self::Emitting => "emitting",
            Self::Validating => "validating",
            Self::ContractChecking => "contract_checking",
            Self::Reporting => "reporting",
            Self::Done => "done",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Terminal status of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// All stages ran
    Done,
    /// Inputs unchanged; nothing regenerated
    Skipped,
    /// A fatal error stopped the run
    Failed,
    Cancelled,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Done => "done",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Cooperative cancellation flag shared with the caller
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// The error that stopped a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FatalError {
    pub stage: Stage,
    pub code: String,
    pub message: String,
    /// Caused by the inputs rather than a pipeline malfunction
    pub input_error: bool,
}

/// Everything observed during one run
#[derive(Debug, Clone)]
pub struct PipelineRun {
    pub run_id: Uuid,
    pub mode: Strictness,
    pub dry_run: bool,
    pub fingerprint: Option<Fingerprint>,
    pub change_reason: Option<ChangeReason>,
    pub artifacts: Vec<EmittedArtifact>,
    pub artifact_changes: Vec<ArtifactChange>,
    pub diagnostics: Diagnostics,
    pub findings: Vec<CompatibilityFinding>,
    pub contract_summary: ContractSummary,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub state_trace: Vec<PipelineState>,
    pub status: RunStatus,
    pub success: bool,
    pub fatal_error: Option<FatalError>,
    pub report_paths: Vec<PathBuf>,
}

impl PipelineRun {
    fn start(config: &PipelineConfig) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            mode: config.pipeline.mode,
            dry_run: config.pipeline.dry_run,
            fingerprint: None,
            change_reason: None,
            artifacts: Vec::new(),
            artifact_changes: Vec::new(),
            diagnostics: Diagnostics::new(),
            findings: Vec::new(),
            contract_summary: ContractSummary::default(),
            started_at: Utc::now(),
            finished_at: None,
            state_trace: vec![PipelineState::Idle],
            status: RunStatus::Done,
            success: false,
            fatal_error: None,
            report_paths: Vec::new(),
        }
    }

    fn enter(&mut self, state: PipelineState) {
        info!(run_id = %self.run_id, state = %state, "Pipeline stage");
        self.state_trace.push(state);
    }

    /// Most recently entered state
    pub fn current_state(&self) -> PipelineState {
        self.state_trace.last().copied().unwrap_or(PipelineState::Idle)
    }

    /// Whether the run visited `state`
    pub fn visited(&self, state: PipelineState) -> bool {
        self.state_trace.contains(&state)
    }

    /// Process exit code for this run
    pub fn exit_code(&self) -> i32 {
        if self.status == RunStatus::Cancelled {
            EXIT_CANCELLED
        } else if self.fatal_error.as_ref().is_some_and(|e| !e.input_error) {
            EXIT_CRASHED
        } else if self.success {
            EXIT_SUCCESS
        } else {
            EXIT_VALIDATION_FAILED
        }
    }

    fn record_fatal(&mut self, stage: Stage, err: &PipelineError) {
        self.diagnostics.push(ValidationDiagnostic::new(
            stage,
            Severity::Critical,
            codes::PIPELINE_FATAL,
            err.to_string(),
        ));
        if self.fatal_error.is_none() {
            self.fatal_error = Some(FatalError {
                stage,
                code: err.code().to_string(),
                message: err.to_string(),
                input_error: err.is_input_error(),
            });
        }
    }

    /// Success: no critical diagnostics, and no findings unless permissive
    fn verdict(&self) -> bool {
        match self.status {
            RunStatus::Failed | RunStatus::Cancelled => false,
            RunStatus::Skipped => true,
            RunStatus::Done => {
                !self.diagnostics.has_critical()
                    && (self.mode == Strictness::Permissive || self.findings.is_empty())
            }
        }
    }
}

enum Flow {
    Completed,
    Skipped,
    Cancelled,
}

/// Per-run resources released when the run ends
#[derive(Default)]
struct RunContext {
    lock: Option<Box<dyn StateLock>>,
    prior: Option<PersistedRunState>,
    contracts_fingerprint: Option<Fingerprint>,
    config_fingerprint: Option<Fingerprint>,
    /// Artifacts were written to the output directory
    written: bool,
    /// Dry-run emission target, removed on drop
    scratch: Option<TempDir>,
}

/// Runs the stages against a configuration and a state store
pub struct Pipeline {
    config: PipelineConfig,
    store: Box<dyn RunStateStore>,
    cancel: CancellationToken,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, store: Box<dyn RunStateStore>) -> Self {
        Self {
            config,
            store,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Execute one run. Never fails: errors are recorded in the returned run.
    pub fn run(&self) -> PipelineRun {
        let mut run = PipelineRun::start(&self.config);
        let mut ctx = RunContext::default();
        info!(
            run_id = %run.run_id,
            schema = %self.config.pipeline.schema.display(),
            mode = ?run.mode,
            dry_run = run.dry_run,
            "Starting pipeline run"
        );

        run.status = match self.stages(&mut run, &mut ctx) {
            Ok(Flow::Completed) => RunStatus::Done,
            Ok(Flow::Skipped) => RunStatus::Skipped,
            Ok(Flow::Cancelled) => {
                warn!(run_id = %run.run_id, after = %run.current_state(), "Run cancelled");
                RunStatus::Cancelled
            }
            Err(e) => {
                let stage = run.current_state().stage();
                error!(run_id = %run.run_id, stage = %stage, error = %e, "Pipeline failed");
                run.record_fatal(stage, &e);
                RunStatus::Failed
            }
        };
        run.success = run.verdict();

        if run.status != RunStatus::Skipped {
            self.persist(&mut run, &mut ctx);
            run.finished_at = Some(Utc::now());
            run.enter(PipelineState::Reporting);
            let generator = ReportGenerator::new(&self.config.pipeline.report_dir);
            match generator.write(&run) {
                Ok(paths) => run.report_paths = paths,
                Err(e) => warn!(error = %e, "Failed to write report"),
            }
        } else {
            run.finished_at = Some(Utc::now());
        }

        run.enter(match run.status {
            RunStatus::Done | RunStatus::Skipped => PipelineState::Done,
            RunStatus::Failed => PipelineState::Failed,
            RunStatus::Cancelled => PipelineState::Cancelled,
        });
        info!(
            run_id = %run.run_id,
            status = %run.status,
            success = run.success,
            errors = run.diagnostics.error_count(),
            findings = run.findings.len(),
            "Pipeline run finished"
        );

        // Lock and scratch directory are released here on every path
        drop(ctx);
        run
    }

    fn cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn stages(&self, run: &mut PipelineRun, ctx: &mut RunContext) -> Result<Flow, PipelineError> {
        let settings = &self.config.pipeline;

        if self.cancelled() {
            return Ok(Flow::Cancelled);
        }
        run.enter(PipelineState::Loading);
        let loaded = SchemaLoader::load(&settings.schema)?;
        run.fingerprint = Some(loaded.fingerprint.clone());
        info!(
            entities = loaded.document.entities.len(),
            operations = loaded.document.operations.len(),
            fingerprint = %loaded.fingerprint.short(),
            "Schema loaded"
        );

        let fixtures = match &self.config.contracts.dir {
            Some(dir) => Some(load_fixtures(dir)?),
            None => None,
        };
        if let Some(fixtures) = &fixtures {
            run.diagnostics.extend(fixtures.diagnostics.iter().cloned());
            ctx.contracts_fingerprint = fixtures.fingerprint.clone();
        }

        let mut routes = RouteTable::new(
            self.config
                .contracts
                .routes
                .iter()
                .map(|(path, entity)| (path.as_str(), entity.as_str())),
        )?;
        if self.config.contracts.derive_routes_from_schema {
            run.diagnostics.extend(routes.merge_schema_routes(&loaded.document));
        }
        debug!(routes = routes.len(), "Route table ready");

        if self.cancelled() {
            return Ok(Flow::Cancelled);
        }
        run.enter(PipelineState::ChangeCheck);
        ctx.lock = Some(self.store.lock()?);
        ctx.prior = self.store.load()?;
        ctx.config_fingerprint = Some(self.config.fingerprint());
        let decision = ChangeDetector::needs_regeneration(
            CurrentInputs {
                fingerprint: &loaded.fingerprint,
                contracts_fingerprint: ctx.contracts_fingerprint.as_ref(),
                config_fingerprint: ctx.config_fingerprint.as_ref(),
                artifact_dir: &settings.out_dir,
            },
            ctx.prior.as_ref(),
            self.config.forces_regeneration() || settings.dry_run,
        );
        run.change_reason = Some(decision.reason);
        info!(regenerate = decision.needs_regeneration, reason = %decision.reason, "Change check");
        if !decision.needs_regeneration {
            run.enter(PipelineState::SkipIfUnchanged);
            return Ok(Flow::Skipped);
        }

        if self.cancelled() {
            return Ok(Flow::Cancelled);
        }
        run.enter(PipelineState::Emitting);
        let output = TypeEmitter::new(self.config.emit.clone()).emit(&loaded.document, &loaded.fingerprint)?;
        info!(
            entities = output.entity_count,
            degraded = output.degraded_count,
            "Emission complete"
        );
        run.diagnostics.merge(output.diagnostics);

        let target = if settings.dry_run {
            let scratch = tempfile::tempdir()?;
            let path = scratch.path().to_path_buf();
            ctx.scratch = Some(scratch);
            path
        } else {
            settings.out_dir.clone()
        };
        let previous: Vec<String> = match (&ctx.prior, settings.dry_run) {
            (Some(prior), false) => prior.artifacts.clone(),
            _ => Vec::new(),
        };
        run.artifact_changes = write_artifacts(&target, &output.artifacts, &previous)?;
        ctx.written = !settings.dry_run;
        run.artifacts = output.artifacts;
        for change in &run.artifact_changes {
            debug!(
                file = %change.file_name,
                status = ?change.status,
                added = change.lines_added,
                removed = change.lines_removed,
                "Artifact"
            );
        }

        if self.cancelled() {
            return Ok(Flow::Cancelled);
        }
        run.enter(PipelineState::Validating);
        let validator = CompilationValidator::new(self.config.checker.clone())
            .with_source_root(absolute(&settings.out_dir));
        run.diagnostics.merge(validator.validate(&target, &run.artifacts));

        if self.cancelled() {
            return Ok(Flow::Cancelled);
        }
        run.enter(PipelineState::ContractChecking);
        match fixtures {
            Some(fixtures) => {
                let checker = ContractCompatibilityChecker::new(&loaded.document, &routes, settings.mode);
                let report = checker.check_all(&fixtures.interactions);
                run.diagnostics.extend(report.diagnostics);
                run.findings = report.findings;
                run.contract_summary = report.summary;
            }
            None => debug!("No contracts directory configured; skipping contract check"),
        }

        Ok(Flow::Completed)
    }

    /// Write the run record. Dry runs and runs without a fingerprint leave state untouched.
    fn persist(&self, run: &mut PipelineRun, ctx: &mut RunContext) {
        if run.dry_run {
            return;
        }
        let Some(fingerprint) = run.fingerprint.clone() else {
            return;
        };

        if ctx.lock.is_none() {
            match self.store.lock() {
                Ok(lock) => ctx.lock = Some(lock),
                Err(e) => {
                    warn!(error = %e, "Cannot lock run state; record not written");
                    return;
                }
            }
        }

        let outcome = match run.status {
            RunStatus::Cancelled => RunOutcome::Cancelled,
            _ if run.success => RunOutcome::Success,
            _ => RunOutcome::Failure,
        };
        let artifacts = if ctx.written {
            run.artifacts.iter().map(|a| a.file_name.clone()).collect()
        } else {
            ctx.prior.as_ref().map(|p| p.artifacts.clone()).unwrap_or_default()
        };
        let record = PersistedRunState {
            fingerprint,
            contracts_fingerprint: ctx.contracts_fingerprint.clone(),
            config_fingerprint: Some(self.config.fingerprint()),
            recorded_at: Utc::now(),
            outcome,
            artifacts,
        };

        if let Err(e) = self.store.save(&record) {
            let err = PipelineError::from(e);
            error!(error = %err, "Failed to save run state");
            run.record_fatal(Stage::Reporting, &err);
            run.success = false;
        } else {
            debug!(outcome = ?outcome, "Run state saved");
        }
    }
}

/// `path` made absolute against the current directory when possible
fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    match std::env::current_dir() {
        Ok(cwd) => cwd.join(path),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Cannot resolve working directory");
            path.to_path_buf()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::MemoryStateStore;

    const SCHEMA: &str = r##"{
        "openapi": "3.1.0",
        "info": {"title": "Forecast API"},
        "paths": {},
        "components": {"schemas": {
            "ForecastResponse": {
                "type": "object",
                "properties": {"horizon": {"type": "string"}},
                "required": ["horizon"]
            }
        }}
    }"##;

    fn config(root: &Path) -> PipelineConfig {
        std::fs::write(root.join("openapi.json"), SCHEMA).unwrap();
        let mut config = PipelineConfig::default();
        config.pipeline.schema = root.join("openapi.json");
        config.pipeline.out_dir = root.join("out");
        config.pipeline.report_dir = root.join("reports");
        config.pipeline.state_file = root.join("state.json");
        config.checker.enabled = false;
        config
    }

    #[test]
    fn test_full_run_trace() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStateStore::new();
        let run = Pipeline::new(config(dir.path()), Box::new(store.clone())).run();

        assert_eq!(run.status, RunStatus::Done);
        assert!(run.success);
        assert_eq!(run.exit_code(), EXIT_SUCCESS);
        assert_eq!(
            run.state_trace,
            vec![
                PipelineState::Idle,
                PipelineState::Loading,
                PipelineState::ChangeCheck,
                PipelineState::Emitting,
                PipelineState::Validating,
                PipelineState::ContractChecking,
                PipelineState::Reporting,
                PipelineState::Done,
            ]
        );
        assert_eq!(store.record().unwrap().outcome, RunOutcome::Success);
        assert!(!store.is_locked());
        assert!(dir.path().join("reports").join("report.json").exists());
    }

    #[test]
    fn test_second_run_skips() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStateStore::new();
        let config = config(dir.path());
        Pipeline::new(config.clone(), Box::new(store.clone())).run();
        let second = Pipeline::new(config, Box::new(store.clone())).run();

        assert_eq!(second.status, RunStatus::Skipped);
        assert!(second.success);
        assert_eq!(second.change_reason, Some(ChangeReason::Unchanged));
        assert!(second.visited(PipelineState::SkipIfUnchanged));
        assert!(!second.visited(PipelineState::Emitting));
        assert_eq!(second.current_state(), PipelineState::Done);
    }

    #[cfg(unix)]
    #[test]
    fn test_dry_run_finds_extra_sources_next_to_output() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        std::fs::create_dir_all(dir.path().join("out")).unwrap();
        std::fs::write(dir.path().join("out").join("shims.d.ts"), "export {};\n").unwrap();
        config.pipeline.dry_run = true;
        config.checker.enabled = true;
        config.checker.extra_sources = vec![PathBuf::from("shims.d.ts")];
        config.checker.command = vec![
            "sh".into(),
            "-c".into(),
            "for f in \"$@\"; do test -f \"$f\" || { echo \"error TS6053: File '$f' not found.\"; exit 1; }; done".into(),
            "checker".into(),
        ];

        let run = Pipeline::new(config, Box::new(MemoryStateStore::new())).run();
        assert!(run.success, "{:?}", run.diagnostics);
        assert_eq!(run.diagnostics.by_stage(Stage::Validating).count(), 0);
    }

    #[test]
    fn test_changed_settings_regenerate() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStateStore::new();
        let mut config = config(dir.path());
        config.pipeline.mode = Strictness::Permissive;
        Pipeline::new(config.clone(), Box::new(store.clone())).run();
        assert_eq!(store.record().unwrap().config_fingerprint, Some(config.fingerprint()));

        config.pipeline.mode = Strictness::Strict;
        let second = Pipeline::new(config, Box::new(store.clone())).run();
        assert_eq!(second.status, RunStatus::Done);
        assert_eq!(second.change_reason, Some(ChangeReason::ConfigChanged));
        assert!(second.visited(PipelineState::Emitting));
    }

    #[test]
    fn test_cancelled_before_start() {
        let dir = tempfile::tempdir().unwrap();
        let token = CancellationToken::new();
        token.cancel();
        let store = MemoryStateStore::new();
        let run = Pipeline::new(config(dir.path()), Box::new(store.clone()))
            .with_cancellation(token)
            .run();

        assert_eq!(run.status, RunStatus::Cancelled);
        assert_eq!(run.exit_code(), EXIT_CANCELLED);
        assert!(!run.visited(PipelineState::Loading));
        assert_eq!(run.current_state(), PipelineState::Cancelled);
        // No fingerprint was computed, so there is nothing to record
        assert!(store.record().is_none());
    }

    #[test]
    fn test_missing_schema_is_input_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        config.pipeline.schema = dir.path().join("absent.json");
        let run = Pipeline::new(config, Box::new(MemoryStateStore::new())).run();

        assert_eq!(run.status, RunStatus::Failed);
        assert!(!run.success);
        assert_eq!(run.exit_code(), EXIT_VALIDATION_FAILED);
        let fatal = run.fatal_error.as_ref().unwrap();
        assert_eq!(fatal.stage, Stage::Loading);
        assert_eq!(fatal.code, "configuration-error");
        assert!(run.visited(PipelineState::Reporting));
        assert_eq!(run.diagnostics.with_code(codes::PIPELINE_FATAL).count(), 1);
    }

    #[test]
    fn test_report_failure_keeps_outcome() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, "file").unwrap();
        config.pipeline.report_dir = blocker.join("reports");
        let run = Pipeline::new(config, Box::new(MemoryStateStore::new())).run();

        assert!(run.success);
        assert!(run.report_paths.is_empty());
        assert_eq!(run.exit_code(), EXIT_SUCCESS);
    }

    #[test]
    fn test_dry_run_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        config.pipeline.dry_run = true;
        let store = MemoryStateStore::new();
        let run = Pipeline::new(config, Box::new(store.clone())).run();

        assert!(run.success);
        assert_eq!(run.artifacts.len(), 2);
        assert!(!dir.path().join("out").exists());
        assert!(store.record().is_none());
    }
}
