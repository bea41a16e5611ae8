//! Run reports
//!
//! Produces `report.json` (machine-readable) and `report.md` (narrative)
//! from a finished run. Rendering is deterministic for identical runs apart
//! from the timestamp; the per-invocation run id stays in the logs. Failing to write a report never changes
//! the run's outcome.

use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::change::ChangeReason;
use crate::checksum::Fingerprint;
use crate::compatibility::{CompatibilityFinding, ContractSummary, FindingSeverity, Strictness};
use crate::diagnostics::{codes, Severity, ValidationDiagnostic};
use crate::error::ReportingError;
use crate::pipeline::{PipelineRun, RunStatus};

pub const JSON_REPORT: &str = "report.json";
pub const NARRATIVE_REPORT: &str = "report.md";

/// Graded overall outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Clean,
    WarningsOnly,
    Blocking,
}

impl Outcome {
    fn label(&self) -> &'static str {
        match self {
            Self::Clean => "clean",
            Self::WarningsOnly => "warnings only",
            Self::Blocking => "blocking",
        }
    }
}

/// Artifact entry in a report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactSummary {
    pub file_name: String,
    pub fingerprint: Fingerprint,
    pub lines: usize,
}

/// Serialized form of `report.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub timestamp: DateTime<Utc>,
    pub status: RunStatus,
    pub outcome: Outcome,
    pub success: bool,
    pub mode: Strictness,
    pub dry_run: bool,
    pub change_reason: Option<ChangeReason>,
    pub fingerprint: Option<Fingerprint>,
    pub error_count: usize,
    pub warning_count: usize,
    pub diagnostics: Vec<ValidationDiagnostic>,
    pub compatibility_findings: Vec<CompatibilityFinding>,
    pub contract_summary: ContractSummary,
    pub artifacts: Vec<ArtifactSummary>,
}

impl RunReport {
    pub fn from_run(run: &PipelineRun) -> Self {
        let breaking = run
            .findings
            .iter()
            .filter(|f| f.severity == FindingSeverity::BuildBreaking)
            .count();
        let error_count = run.diagnostics.error_count() + breaking;
        let warning_count = run.diagnostics.warning_count() + (run.findings.len() - breaking);

        let outcome = if !run.success {
            Outcome::Blocking
        } else if error_count + warning_count > 0 {
            Outcome::WarningsOnly
        } else {
            Outcome::Clean
        };

        Self {
            timestamp: run.finished_at.unwrap_or(run.started_at),
            status: run.status,
            outcome,
            success: run.success,
            mode: run.mode,
            dry_run: run.dry_run,
            change_reason: run.change_reason,
            fingerprint: run.fingerprint.clone(),
            error_count,
            warning_count,
            diagnostics: run.diagnostics.all().to_vec(),
            compatibility_findings: run.findings.clone(),
            contract_summary: run.contract_summary.clone(),
            artifacts: run
                .artifacts
                .iter()
                .map(|a| ArtifactSummary {
                    file_name: a.file_name.clone(),
                    fingerprint: Fingerprint::from_bytes(a.content.as_bytes()),
                    lines: a.content.lines().count(),
                })
                .collect(),
        }
    }
}

/// Remediation hint for a diagnostic code: exact match, then checker code family, then generic
pub fn remediation_hint(code: &str) -> &'static str {
    let exact = match code {
        codes::EMIT_DEGRADED_UNION => {
            Some("Add a `discriminator` to the union in the schema so it can be emitted precisely.")
        }
        codes::EMIT_DEGRADED_RECURSION => {
            Some("Break the reference cycle or accept the permissive type for the recursive field.")
        }
        codes::EMIT_DEGRADED_UNSUPPORTED => {
            Some("Replace the construct with a named entity or a supported primitive type.")
        }
        codes::EMIT_DEGRADED_FALLBACK => {
            Some("Define the referenced entity in the schema or remove the dangling `$ref`.")
        }
        codes::CHECKER_UNAVAILABLE => {
            Some("Install the static checker or set `[checker] command` to a working invocation.")
        }
        codes::CHECKER_CRASHED => Some("Run the checker command by hand in the output directory to see its failure."),
        codes::CHECKER_TIMEOUT => Some("Raise `[checker] timeout_secs` or reduce the checked sources."),
        codes::CHECKER_SKIPPED => Some("Enable `[checker]` to verify the generated bindings compile."),
        codes::CONTRACT_UNMATCHED_PATH => Some("Add a `[contracts.routes]` entry for the request path."),
        codes::CONTRACT_UNKNOWN_ENTITY => Some("Point the route at an entity the schema defines."),
        codes::CONTRACT_MISSING_BODY => Some("Re-record the interaction with its response body."),
        codes::CONTRACT_FIXTURE_MALFORMED => Some("Fix the JSON syntax of the fixture file."),
        codes::CONTRACT_ROUTE_CONFLICT => {
            Some("Declare the intended mapping explicitly in `[contracts.routes]`.")
        }
        codes::PIPELINE_FATAL => Some("Fix the reported input problem and re-run."),
        "TS2304" => Some("A referenced name is not declared; check the entity is emitted and imported."),
        "TS2305" | "TS2614" => Some("The module does not export this name; regenerate both artifacts together."),
        "TS2307" => Some("A module cannot be resolved; check the artifact file names and import paths."),
        "TS2322" => Some("A value is not assignable to its declared type; compare the schema field types."),
        "TS2339" => Some("A property does not exist on the type; the schema may have dropped the field."),
        "TS2741" => Some("A required property is missing; check `required` in the schema."),
        "TS7006" => Some("A parameter implicitly has type `any`; annotate it."),
        _ => None,
    };
    if let Some(hint) = exact {
        return hint;
    }

    let family = code
        .strip_prefix("TS")
        .and_then(|n| n.parse::<u32>().ok())
        .map(|n| n / 1000);
    match family {
        Some(1) => "Syntax error in generated code; regenerate and report the schema construct that caused it.",
        Some(2) => "Type error in generated or consuming code; compare it with the schema definition.",
        Some(7) => "Strict-mode violation; add explicit types where `any` is inferred.",
        Some(18) => "Possibly null or undefined value; narrow it before use.",
        _ => "Review the message above and the schema construct it points to.",
    }
}

/// Writes reports for finished runs
pub struct ReportGenerator {
    dir: PathBuf,
}

impl ReportGenerator {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// Write both reports for a run, returning their paths
    pub fn write(&self, run: &PipelineRun) -> Result<Vec<PathBuf>, ReportingError> {
        self.write_report(&RunReport::from_run(run))
    }

    pub fn write_report(&self, report: &RunReport) -> Result<Vec<PathBuf>, ReportingError> {
        fs::create_dir_all(&self.dir).map_err(|source| ReportingError::Write {
            path: self.dir.clone(),
            source,
        })?;

        let json_path = self.dir.join(JSON_REPORT);
        let mut json = serde_json::to_string_pretty(report)?;
        json.push('\n');
        write_file(&json_path, &json)?;

        let md_path = self.dir.join(NARRATIVE_REPORT);
        write_file(&md_path, &render_markdown(report))?;

        info!(
            dir = %self.dir.display(),
            outcome = report.outcome.label(),
            errors = report.error_count,
            warnings = report.warning_count,
            "Reports written"
        );
        Ok(vec![json_path, md_path])
    }
}

fn write_file(path: &Path, content: &str) -> Result<(), ReportingError> {
    fs::write(path, content).map_err(|source| ReportingError::Write {
        path: path.to_path_buf(),
        source,
    })
}

/// Render the narrative report
pub fn render_markdown(report: &RunReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# typegate report");
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "**Outcome: {}** ({}, {})",
        report.outcome.label(),
        report.status,
        if report.success { "success" } else { "failure" }
    );
    let _ = writeln!(out);
    let _ = writeln!(out, "- Timestamp: {}", report.timestamp.to_rfc3339());
    if let Some(fp) = &report.fingerprint {
        let _ = writeln!(out, "- Schema fingerprint: `{}`", fp);
    }
    let mode = match report.mode {
        Strictness::Strict => "strict",
        Strictness::Permissive => "permissive",
    };
    let _ = writeln!(out, "- Mode: {}{}", mode, if report.dry_run { " (dry run)" } else { "" });
    if let Some(reason) = report.change_reason {
        let _ = writeln!(out, "- Regeneration: {}", reason);
    }
    let _ = writeln!(
        out,
        "- Errors: {}, warnings: {}",
        report.error_count, report.warning_count
    );

    for severity in Severity::DESCENDING {
        let items: Vec<&ValidationDiagnostic> = report
            .diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .collect();
        if items.is_empty() {
            continue;
        }
        let _ = writeln!(out);
        let _ = writeln!(out, "## {} ({})", capitalize(&severity.to_string()), items.len());
        let _ = writeln!(out);
        for diag in items {
            match &diag.location {
                Some(loc) => {
                    let _ = writeln!(out, "- `{}` {} [{}]: {}", diag.code, loc, diag.stage, diag.message);
                }
                None => {
                    let _ = writeln!(out, "- `{}` [{}]: {}", diag.code, diag.stage, diag.message);
                }
            }
            let _ = writeln!(out, "  - Hint: {}", remediation_hint(&diag.code));
        }
    }

    if !report.compatibility_findings.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "## Compatibility findings ({})", report.compatibility_findings.len());
        for finding in &report.compatibility_findings {
            let _ = writeln!(out);
            let _ = writeln!(
                out,
                "### `{}` vs `{}` [{}]",
                finding.interaction_id, finding.entity, finding.severity
            );
            if !finding.description.is_empty() {
                let _ = writeln!(out);
                let _ = writeln!(out, "{}", finding.description);
            }
            let _ = writeln!(out);
            for issue in &finding.issues {
                let _ = writeln!(out, "- {}", issue);
            }
        }
    }

    let summary = &report.contract_summary;
    if summary.total_interactions > 0 {
        let _ = writeln!(out);
        let _ = writeln!(out, "## Contracts");
        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "{} interactions: {} validated, {} incompatible, {} skipped.",
            summary.total_interactions,
            summary.validated_interactions,
            summary.incompatible.len(),
            summary.skipped_interactions
        );
    }

    if !report.artifacts.is_empty() {
        let _ = writeln!(out);
        let _ = writeln!(out, "## Artifacts");
        let _ = writeln!(out);
        for artifact in &report.artifacts {
            let _ = writeln!(
                out,
                "- `{}` ({} lines, `{}`)",
                artifact.file_name,
                artifact.lines,
                artifact.fingerprint.short()
            );
        }
    }

    out
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compatibility::{IncompatibleInteraction, StructuralIssue};
    use crate::diagnostics::{Diagnostics, Location, Stage};

    fn sample() -> RunReport {
        let mut diagnostics = Diagnostics::new();
        diagnostics.push(ValidationDiagnostic::new(
            Stage::ContractChecking,
            Severity::Low,
            codes::CONTRACT_UNMATCHED_PATH,
            "no entity mapped for path '/x'",
        ));
        diagnostics.push(
            ValidationDiagnostic::new(Stage::Validating, Severity::Critical, "TS2304", "Cannot find name 'Foo'.")
                .with_location(Location::at("types.generated.ts", 3, 5)),
        );
        RunReport {
            timestamp: DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z").unwrap().with_timezone(&Utc),
            status: RunStatus::Done,
            outcome: Outcome::Blocking,
            success: false,
            mode: Strictness::Strict,
            dry_run: false,
            change_reason: Some(ChangeReason::Forced),
            fingerprint: Some(Fingerprint::from_bytes(b"schema")),
            error_count: 2,
            warning_count: 1,
            diagnostics: diagnostics.all().to_vec(),
            compatibility_findings: vec![CompatibilityFinding {
                interaction_id: "forecast.json#0".into(),
                description: "calm day".into(),
                entity: "ForecastResponse".into(),
                issues: vec![StructuralIssue::MissingField { path: "riskLevel".into() }],
                severity: FindingSeverity::BuildBreaking,
            }],
            contract_summary: ContractSummary {
                total_interactions: 2,
                validated_interactions: 0,
                skipped_interactions: 1,
                incompatible: vec![IncompatibleInteraction {
                    interaction_id: "forecast.json#0".into(),
                    severity: FindingSeverity::BuildBreaking,
                }],
            },
            artifacts: Vec::new(),
        }
    }

    #[test]
    fn test_hint_lookup_order() {
        assert!(remediation_hint(codes::CHECKER_TIMEOUT).contains("timeout_secs"));
        assert!(remediation_hint("TS2304").contains("not declared"));
        assert!(remediation_hint("TS2589").starts_with("Type error"));
        assert!(remediation_hint("TS7017").starts_with("Strict-mode"));
        assert!(remediation_hint("something-else").starts_with("Review"));
    }

    #[test]
    fn test_markdown_groups_by_severity() {
        let md = render_markdown(&sample());
        let critical = md.find("## Critical (1)").unwrap();
        let low = md.find("## Low (1)").unwrap();
        assert!(critical < low);
        assert!(md.contains("**Outcome: blocking** (done, failure)"));
        assert!(md.contains("`TS2304` types.generated.ts:3:5 [validating]"));
        assert!(md.contains("### `forecast.json#0` vs `ForecastResponse` [build-breaking]"));
        assert!(md.contains("- required field 'riskLevel' is missing"));
        assert!(md.contains("2 interactions: 0 validated, 1 incompatible, 1 skipped."));
    }

    #[test]
    fn test_json_field_names() {
        let value = serde_json::to_value(sample()).unwrap();
        let keys: Vec<_> = value.as_object().unwrap().keys().cloned().collect();
        for key in [
            "timestamp",
            "status",
            "outcome",
            "success",
            "fingerprint",
            "error_count",
            "warning_count",
            "diagnostics",
            "compatibility_findings",
            "contract_summary",
            "artifacts",
        ] {
            assert!(keys.iter().any(|k| k == key), "missing {}", key);
        }
        assert!(!keys.iter().any(|k| k == "run_id"));
        assert_eq!(value["outcome"], "blocking");
        assert_eq!(value["compatibility_findings"][0]["severity"], "build_breaking");
        assert_eq!(value["compatibility_findings"][0]["issues"][0]["kind"], "missing_field");
        assert_eq!(value["diagnostics"][1]["severity"], "critical");
    }

    #[test]
    fn test_write_failure_is_reporting_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, "file").unwrap();
        let generator = ReportGenerator::new(blocker.join("reports"));
        assert!(matches!(
            generator.write_report(&sample()),
            Err(ReportingError::Write { .. })
        ));
    }

    #[test]
    fn test_write_both_files() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ReportGenerator::new(dir.path()).write_report(&sample()).unwrap();
        assert_eq!(paths.len(), 2);
        let json = std::fs::read_to_string(&paths[0]).unwrap();
        let parsed: RunReport = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, sample());
        assert!(json.ends_with("}\n"));
    }
}
