//! Contract compatibility checking
//!
//! Validates recorded response bodies against the schema's entities
//! using structural subtyping: every required field must be present with a
//! compatible JSON category, declared values must match, and undeclared
//! extra fields are tolerated.

use std::fmt;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::contracts::{ContractInteraction, RouteTable};
use crate::diagnostics::{codes, Location, Severity, Stage, ValidationDiagnostic};
use crate::schema::{EntityDef, EntityKind, JsonCategory, SchemaDocument, TypeRef};

/// Nesting limit for recursive validation through references
const MAX_DEPTH: usize = 32;

/// How findings are graded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Strictness {
    /// Findings break the build
    #[default]
    Strict,
    /// Findings are reported as warnings
    Permissive,
}

/// Severity of a compatibility finding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingSeverity {
    BuildBreaking,
    Warning,
}

impl From<Strictness> for FindingSeverity {
    fn from(mode: Strictness) -> Self {
        match mode {
            Strictness::Strict => Self::BuildBreaking,
            Strictness::Permissive => Self::Warning,
        }
    }
}

impl fmt::Display for FindingSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BuildBreaking => f.write_str("build-breaking"),
            Self::Warning => f.write_str("warning"),
        }
    }
}

/// One structural mismatch inside a response body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StructuralIssue {
    MissingField {
        path: String,
    },
    TypeMismatch {
        path: String,
        expected: JsonCategory,
        actual: JsonCategory,
    },
    EnumValueNotAllowed {
        path: String,
        value: String,
        allowed: Vec<String>,
    },
    NullNotAllowed {
        path: String,
    },
}

impl StructuralIssue {
    pub fn path(&self) -> &str {
        match self {
            Self::MissingField { path }
            | Self::TypeMismatch { path, .. }
            | Self::EnumValueNotAllowed { path, .. }
            | Self::NullNotAllowed { path } => path,
        }
    }
}

impl fmt::Display for StructuralIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingField { path } => write!(f, "required field '{}' is missing", path),
            Self::TypeMismatch { path, expected, actual } => {
                write!(f, "'{}' expected {}, got {}", path, expected, actual)
            }
            Self::EnumValueNotAllowed { path, value, allowed } => {
                write!(f, "'{}' has value '{}', allowed: {}", path, value, allowed.join(", "))
            }
            Self::NullNotAllowed { path } => write!(f, "required field '{}' is null", path),
        }
    }
}

/// A detected mismatch between an interaction and the schema
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompatibilityFinding {
    pub interaction_id: String,
    pub description: String,
    pub entity: String,
    pub issues: Vec<StructuralIssue>,
    pub severity: FindingSeverity,
}

/// Interaction ids and grades of incompatible interactions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncompatibleInteraction {
    pub interaction_id: String,
    pub severity: FindingSeverity,
}

/// Aggregate over all interactions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractSummary {
    pub total_interactions: usize,
    pub validated_interactions: usize,
    pub skipped_interactions: usize,
    pub incompatible: Vec<IncompatibleInteraction>,
}

/// Result of checking a batch of interactions
#[derive(Debug, Clone, Default)]
pub struct CompatibilityReport {
    pub findings: Vec<CompatibilityFinding>,
    pub diagnostics: Vec<ValidationDiagnostic>,
    pub summary: ContractSummary,
}

enum Outcome {
    Validated,
    Skipped(ValidationDiagnostic),
    Incompatible(CompatibilityFinding),
}

/// Checks recorded interactions against schema entities
pub struct ContractCompatibilityChecker<'a> {
    doc: &'a SchemaDocument,
    routes: &'a RouteTable,
    mode: Strictness,
}

impl<'a> ContractCompatibilityChecker<'a> {
    pub fn new(doc: &'a SchemaDocument, routes: &'a RouteTable, mode: Strictness) -> Self {
        Self { doc, routes, mode }
    }

    /// Check every interaction.
    ///
    /// Interactions are validated in parallel; results are merged in input
    /// order so identical inputs always produce identical reports.
    pub fn check_all(&self, interactions: &[ContractInteraction]) -> CompatibilityReport {
        let outcomes: Vec<Outcome> = interactions
            .par_iter()
            .map(|interaction| self.check_one(interaction))
            .collect();

        let mut report = CompatibilityReport::default();
        report.summary.total_interactions = interactions.len();

        for outcome in outcomes {
            match outcome {
                Outcome::Validated => report.summary.validated_interactions += 1,
                Outcome::Skipped(diag) => {
                    warn!(code = %diag.code, "{}", diag.message);
                    report.summary.skipped_interactions += 1;
                    report.diagnostics.push(diag);
                }
                Outcome::Incompatible(finding) => {
                    debug!(
                        interaction = %finding.interaction_id,
                        issues = finding.issues.len(),
                        "Contract drift"
                    );
                    report.summary.incompatible.push(IncompatibleInteraction {
                        interaction_id: finding.interaction_id.clone(),
                        severity: finding.severity,
                    });
                    report.findings.push(finding);
                }
            }
        }

        info!(
            total = report.summary.total_interactions,
            validated = report.summary.validated_interactions,
            incompatible = report.findings.len(),
            skipped = report.summary.skipped_interactions,
            "Contract check complete"
        );
        report
    }

    fn check_one(&self, interaction: &ContractInteraction) -> Outcome {
        let skip = |severity: Severity, code: &str, message: String| {
            Outcome::Skipped(
                ValidationDiagnostic::new(Stage::ContractChecking, severity, code, message)
                    .with_location(Location::file(interaction.id.clone())),
            )
        };

        let Some(route) = self.routes.resolve(&interaction.request.path) else {
            return skip(
                Severity::Low,
                codes::CONTRACT_UNMATCHED_PATH,
                format!("no entity mapped for path '{}'; interaction skipped", interaction.request.path),
            );
        };
        let Some(entity) = self.doc.entity(&route.entity) else {
            return skip(
                Severity::Medium,
                codes::CONTRACT_UNKNOWN_ENTITY,
                format!(
                    "path '{}' maps to '{}', which the schema does not define",
                    interaction.request.path, route.entity
                ),
            );
        };
        let Some(body) = interaction.body() else {
            return skip(
                Severity::Low,
                codes::CONTRACT_MISSING_BODY,
                "interaction has no recorded response body; cannot validate".to_string(),
            );
        };

        let issues = if route.list {
            let mut issues = Vec::new();
            match body {
                Value::Array(items) => {
                    for (i, item) in items.iter().enumerate() {
                        issues.extend(self.validate_entity(entity, item, &format!("[{}]", i)));
                    }
                }
                other => issues.push(StructuralIssue::TypeMismatch {
                    path: "$".to_string(),
                    expected: JsonCategory::Array,
                    actual: JsonCategory::of(other),
                }),
            }
            issues
        } else {
            self.validate_entity(entity, body, "")
        };

        if issues.is_empty() {
            Outcome::Validated
        } else {
            Outcome::Incompatible(CompatibilityFinding {
                interaction_id: interaction.id.clone(),
                description: interaction.description.clone(),
                entity: entity.name.clone(),
                issues,
                severity: self.mode.into(),
            })
        }
    }

    /// Validate a value against an entity, collecting issues under `path`
    pub fn validate_entity(&self, entity: &EntityDef, value: &Value, path: &str) -> Vec<StructuralIssue> {
        let mut issues = Vec::new();
        self.entity_into(entity, value, path, 0, &mut issues);
        issues
    }

    fn entity_into(
        &self,
        entity: &EntityDef,
        value: &Value,
        path: &str,
        depth: usize,
        issues: &mut Vec<StructuralIssue>,
    ) {
        if depth > MAX_DEPTH {
            return;
        }
        match &entity.kind {
            EntityKind::Object { fields } => {
                let Value::Object(obj) = value else {
                    issues.push(mismatch(path, JsonCategory::Object, value));
                    return;
                };
                for field in fields {
                    let field_path = join(path, &field.name);
                    match obj.get(&field.name) {
                        None if field.required => {
                            issues.push(StructuralIssue::MissingField { path: field_path })
                        }
                        None => {}
                        Some(Value::Null) if !self.accepts_null(&field.ty, depth) => {
                            if field.required {
                                issues.push(StructuralIssue::NullNotAllowed { path: field_path });
                            }
                        }
                        Some(v) => self.type_into(&field.ty, v, &field_path, depth + 1, issues),
                    }
                }
            }
            EntityKind::Enum { values } => enum_into(values, value, path, issues),
            EntityKind::Alias { target } => self.type_into(target, value, path, depth + 1, issues),
        }
    }

    fn type_into(
        &self,
        ty: &TypeRef,
        value: &Value,
        path: &str,
        depth: usize,
        issues: &mut Vec<StructuralIssue>,
    ) {
        if depth > MAX_DEPTH {
            return;
        }
        let display = if path.is_empty() { "$" } else { path };
        match ty {
            TypeRef::Any | TypeRef::Union { .. } => {}
            TypeRef::Nullable(inner) => {
                if !value.is_null() {
                    self.type_into(inner, value, path, depth, issues);
                }
            }
            TypeRef::InlineEnum(values) => enum_into(values, value, display, issues),
            TypeRef::Array(inner) => match value {
                Value::Array(items) => {
                    for (i, item) in items.iter().enumerate() {
                        self.type_into(inner, item, &format!("{}[{}]", path, i), depth + 1, issues);
                    }
                }
                other => issues.push(mismatch(display, JsonCategory::Array, other)),
            },
            TypeRef::Map(inner) => match value {
                Value::Object(entries) => {
                    for (key, item) in entries {
                        self.type_into(inner, item, &join(path, key), depth + 1, issues);
                    }
                }
                other => issues.push(mismatch(display, JsonCategory::Object, other)),
            },
            TypeRef::Ref { target, fallback } => match self.doc.entity(target) {
                Some(entity) => self.entity_into(entity, value, path, depth + 1, issues),
                None => {
                    if let Some(fallback) = fallback {
                        self.type_into(fallback, value, path, depth + 1, issues);
                    }
                }
            },
            TypeRef::Integer => match value {
                Value::Number(n) if n.is_i64() || n.is_u64() => {}
                // 3.0 is an integer in JSON Schema terms
                Value::Number(n) if n.as_f64().is_some_and(|f| f.fract() == 0.0) => {}
                other => issues.push(mismatch(display, JsonCategory::Number, other)),
            },
            other => {
                if let Some(expected) = self.doc.category_of(other) {
                    if JsonCategory::of(value) != expected {
                        issues.push(mismatch(display, expected, value));
                    }
                }
            }
        }
    }

    /// Whether `null` is a valid value for `ty`, following references through aliases
    fn accepts_null(&self, ty: &TypeRef, depth: usize) -> bool {
        if depth > MAX_DEPTH {
            return true;
        }
        match ty {
            TypeRef::Nullable(_) | TypeRef::Null | TypeRef::Any | TypeRef::Union { .. } => true,
            TypeRef::Ref { target, fallback } => match self.doc.entity(target) {
                Some(EntityDef {
                    kind: EntityKind::Alias { target },
                    ..
                }) => self.accepts_null(target, depth + 1),
                Some(_) => false,
                None => fallback
                    .as_deref()
                    .is_some_and(|fallback| self.accepts_null(fallback, depth + 1)),
            },
            _ => false,
        }
    }
}


fn enum_into(allowed: &[String], value: &Value, path: &str, issues: &mut Vec<StructuralIssue>) {
    let display = if path.is_empty() { "$" } else { path };
    match value {
        Value::String(s) if allowed.iter().any(|a| a == s) => {}
        Value::String(s) => issues.push(StructuralIssue::EnumValueNotAllowed {
            path: display.to_string(),
            value: s.clone(),
            allowed: allowed.to_vec(),
        }),
        other => issues.push(mismatch(display, JsonCategory::String, other)),
    }
}

fn mismatch(path: &str, expected: JsonCategory, actual: &Value) -> StructuralIssue {
    StructuralIssue::TypeMismatch {
        path: if path.is_empty() { "$".to_string() } else { path.to_string() },
        expected,
        actual: JsonCategory::of(actual),
    }
}

fn join(base: &str, field: &str) -> String {
    if base.is_empty() {
        field.to_string()
    } else {
        format!("{}.{}", base, field)
    }
}
