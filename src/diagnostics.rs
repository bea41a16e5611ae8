//! Diagnostics
//!
//! Non-fatal findings from every stage are collected here and only influence
//! the run verdict at aggregation time.

use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// Stage
// =============================================================================

/// Pipeline stage that produced a diagnostic
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Loading,
    ChangeCheck,
    Emitting,
    Validating,
    ContractChecking,
    Reporting,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Loading => "loading",
            Self::ChangeCheck => "change_check",
            Self::Emitting => "emitting",
            Self::Validating => "validating",
            Self::ContractChecking => "contract_checking",
            Self::Reporting => "reporting",
        };
        f.write_str(s)
    }
}

// =============================================================================
// Severity
// =============================================================================

/// Diagnostic severity level, ordered from least to most severe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// All severities, most severe first
    pub const DESCENDING: [Severity; 4] = [
        Severity::Critical,
        Severity::High,
        Severity::Medium,
        Severity::Low,
    ];

    /// Critical and high count as errors in reports
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Critical | Self::High)
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

// =============================================================================
// Well-known codes
// =============================================================================

/// Diagnostic codes produced by the pipeline itself.
///
/// Checker diagnostics keep the checker's own code (e.g. `TS2304`).
pub mod codes {
    pub const EMIT_DEGRADED_UNION: &str = "emit-degraded-union";
    pub const EMIT_DEGRADED_RECURSION: &str = "emit-degraded-recursion";
    pub const EMIT_DEGRADED_UNSUPPORTED: &str = "emit-degraded-unsupported";
    pub const EMIT_DEGRADED_FALLBACK: &str = "emit-degraded-fallback";
    pub const CHECKER_UNAVAILABLE: &str = "checker-unavailable";
    pub const CHECKER_CRASHED: &str = "checker-crashed";
    pub const CHECKER_TIMEOUT: &str = "checker-timeout";
    pub const CHECKER_SKIPPED: &str = "checker-skipped";
    pub const CONTRACT_UNMATCHED_PATH: &str = "contract-unmatched-path";
    pub const CONTRACT_UNKNOWN_ENTITY: &str = "contract-unknown-entity";
    pub const CONTRACT_MISSING_BODY: &str = "contract-missing-body";
    pub const CONTRACT_FIXTURE_MALFORMED: &str = "contract-fixture-malformed";
    pub const CONTRACT_ROUTE_CONFLICT: &str = "contract-route-conflict";
    pub const PIPELINE_FATAL: &str = "pipeline-fatal";
}

// =============================================================================
// Diagnostic Item
// =============================================================================

/// Source location of a diagnostic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub file: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<u32>,
}

impl Location {
    pub fn file(file: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            line: None,
            column: None,
        }
    }

    pub fn at(file: impl Into<String>, line: u32, column: u32) -> Self {
        Self {
            file: file.into(),
            line: Some(line),
            column: Some(column),
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.line, self.column) {
            (Some(l), Some(c)) => write!(f, "{}:{}:{}", self.file, l, c),
            (Some(l), None) => write!(f, "{}:{}", self.file, l),
            _ => write!(f, "{}", self.file),
        }
    }
}

/// A single diagnostic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationDiagnostic {
    pub stage: Stage,
    pub severity: Severity,
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
}

impl ValidationDiagnostic {
    pub fn new(
        stage: Stage,
        severity: Severity,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            stage,
            severity,
            code: code.into(),
            message: message.into(),
            location: None,
        }
    }

    pub fn with_location(mut self, location: Location) -> Self {
        self.location = Some(location);
        self
    }
}

impl fmt::Display for ValidationDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {} ({}): {}", self.code, self.severity, self.stage, self.message)?;
        if let Some(loc) = &self.location {
            write!(f, " at {}", loc)?;
        }
        Ok(())
    }
}

// =============================================================================
// Diagnostics Collection
// =============================================================================

/// Collection of diagnostics accumulated across stages
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Diagnostics {
    items: Vec<ValidationDiagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, item: ValidationDiagnostic) {
        self.items.push(item);
    }

    pub fn extend(&mut self, items: impl IntoIterator<Item = ValidationDiagnostic>) {
        self.items.extend(items);
    }

    /// Number of diagnostics with exactly this severity
    pub fn count(&self, severity: Severity) -> usize {
        self.items.iter().filter(|d| d.severity == severity).count()
    }

    pub fn has_critical(&self) -> bool {
        self.count(Severity::Critical) > 0
    }

    /// Critical + high
    pub fn error_count(&self) -> usize {
        self.items.iter().filter(|d| d.severity.is_error()).count()
    }

    /// Medium + low
    pub fn warning_count(&self) -> usize {
        self.items.len() - self.error_count()
    }

    pub fn by_severity(&self, severity: Severity) -> impl Iterator<Item = &ValidationDiagnostic> {
        self.items.iter().filter(move |d| d.severity == severity)
    }

    pub fn by_stage(&self, stage: Stage) -> impl Iterator<Item = &ValidationDiagnostic> {
        self.items.iter().filter(move |d| d.stage == stage)
    }

    pub fn with_code<'a>(&'a self, code: &'a str) -> impl Iterator<Item = &'a ValidationDiagnostic> {
        self.items.iter().filter(move |d| d.code == code)
    }

    pub fn all(&self) -> &[ValidationDiagnostic] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn merge(&mut self, other: Diagnostics) {
        self.items.extend(other.items);
    }
}

impl IntoIterator for Diagnostics {
    type Item = ValidationDiagnostic;
    type IntoIter = std::vec::IntoIter<ValidationDiagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.into_iter()
    }
}

impl<'a> IntoIterator for &'a Diagnostics {
    type Item = &'a ValidationDiagnostic;
    type IntoIter = std::slice::Iter<'a, ValidationDiagnostic>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

impl FromIterator<ValidationDiagnostic> for Diagnostics {
    fn from_iter<T: IntoIterator<Item = ValidationDiagnostic>>(iter: T) -> Self {
        Self {
            items: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Medium > Severity::Low);
        assert!(Severity::High.is_error());
        assert!(!Severity::Medium.is_error());
    }

    #[test]
    fn test_diagnostics_collection() {
        let mut diags = Diagnostics::new();
        diags.push(ValidationDiagnostic::new(
            Stage::Validating,
            Severity::Critical,
            "TS2304",
            "Cannot find name 'Foo'.",
        ));
        diags.push(ValidationDiagnostic::new(
            Stage::ContractChecking,
            Severity::Low,
            codes::CONTRACT_MISSING_BODY,
            "no body",
        ));

        assert!(diags.has_critical());
        assert_eq!(diags.error_count(), 1);
        assert_eq!(diags.warning_count(), 1);
        assert_eq!(diags.by_stage(Stage::Validating).count(), 1);
        assert_eq!(diags.with_code(codes::CONTRACT_MISSING_BODY).count(), 1);
    }

    #[test]
    fn test_serialized_field_names_are_stable() {
        let diag = ValidationDiagnostic::new(Stage::Emitting, Severity::Medium, "emit-degraded-union", "m")
            .with_location(Location::at("types.generated.ts", 3, 5));
        let value = serde_json::to_value(&diag).unwrap();
        assert_eq!(value["stage"], "emitting");
        assert_eq!(value["severity"], "medium");
        assert_eq!(value["location"]["line"], 3);
    }
}
