//! Code Generation
//!
//! Converts a [`SchemaDocument`] into two TypeScript artifacts: a primary
//! types file and a utilities file holding guards and value lists.
//!
//! Architecture:
//! - CodegenContext: immutable analysis results (names, reference cycles)
//! - EntityEmission: per-entity tagged result (ok, degraded, fatal)
//! - Artifacts are assembled only when no entity is fatal, so a failed run
//!   never leaves a partial artifact set behind.

pub mod names;
pub mod typescript;

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use petgraph::algo::kosaraju_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};
use similar::{ChangeTag, TextDiff};
use tracing::{debug, error, info, warn};

use crate::checksum::Fingerprint;
use crate::diagnostics::{Diagnostics, ValidationDiagnostic};
use crate::error::EmissionError;
use crate::schema::{EntityKind, SchemaDocument};

use names::NameResolver;
use typescript::EntityCode;

// =============================================================================
// Options
// =============================================================================

/// Artifact file names
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmitOptions {
    #[serde(default = "default_types_file")]
    pub types_file: String,
    #[serde(default = "default_utils_file")]
    pub utils_file: String,
}

fn default_types_file() -> String {
    "types.generated.ts".to_string()
}

fn default_utils_file() -> String {
    "utils.generated.ts".to_string()
}

impl Default for EmitOptions {
    fn default() -> Self {
        Self {
            types_file: default_types_file(),
            utils_file: default_utils_file(),
        }
    }
}

impl EmitOptions {
    /// Module specifier the utilities file imports types from
    fn types_module(&self) -> String {
        let stem = self
            .types_file
            .strip_suffix(".ts")
            .unwrap_or(&self.types_file);
        format!("./{}", stem)
    }
}

// =============================================================================
// Reference cycles
// =============================================================================

/// Entities that take part in multi-entity reference cycles.
///
/// A direct self-reference (`Node.children: Node[]`) is one level and is
/// emitted normally; a reference between two members of the same
/// strongly connected component is not.
#[derive(Debug, Clone, Default)]
pub struct CycleInfo {
    component: HashMap<String, usize>,
}

impl CycleInfo {
    pub fn analyze(doc: &SchemaDocument) -> Self {
        let mut graph = DiGraph::<&str, ()>::new();
        let nodes: HashMap<&str, NodeIndex> = doc
            .entity_names()
            .map(|name| (name, graph.add_node(name)))
            .collect();

        for entity in &doc.entities {
            let from = nodes[entity.name.as_str()];
            let refs: Vec<&str> = match &entity.kind {
                EntityKind::Object { fields } => fields.iter().flat_map(|f| f.ty.references()).collect(),
                EntityKind::Alias { target } => target.references(),
                EntityKind::Enum { .. } => Vec::new(),
            };
            for target in refs {
                if let Some(&to) = nodes.get(target) {
                    graph.add_edge(from, to, ());
                }
            }
        }

        let mut component = HashMap::new();
        for (id, scc) in kosaraju_scc(&graph).into_iter().enumerate() {
            if scc.len() > 1 {
                for node in scc {
                    component.insert(graph[node].to_string(), id);
                }
            }
        }
        Self { component }
    }

    /// Whether `from -> to` closes a cycle through at least one other entity
    pub fn is_indirect(&self, from: &str, to: &str) -> bool {
        from != to
            && matches!(
                (self.component.get(from), self.component.get(to)),
                (Some(a), Some(b)) if a == b
            )
    }

    pub fn cyclic_entities(&self) -> usize {
        self.component.len()
    }
}

// =============================================================================
// CodegenContext
// =============================================================================

/// Immutable codegen context shared by the per-entity emitters
pub struct CodegenContext<'a> {
    pub doc: &'a SchemaDocument,
    pub names: &'a NameResolver,
    pub cycles: &'a CycleInfo,
    pub options: &'a EmitOptions,
}

// =============================================================================
// Emission results
// =============================================================================

/// Outcome of emitting a single entity
#[derive(Debug, Clone)]
pub enum EntityEmission {
    Ok(EntityCode),
    Degraded(EntityCode, Vec<ValidationDiagnostic>),
    Fatal(EmissionError),
}

/// A generated source unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmittedArtifact {
    pub file_name: String,
    pub content: String,
    pub derived_from: BTreeSet<String>,
}

/// Output from a successful emission
#[derive(Debug, Clone)]
pub struct EmitOutput {
    pub artifacts: Vec<EmittedArtifact>,
    pub diagnostics: Diagnostics,
    pub entity_count: usize,
    pub degraded_count: usize,
}

// =============================================================================
// TypeEmitter
// =============================================================================

/// Converts schema documents into TypeScript artifacts
pub struct TypeEmitter {
    options: EmitOptions,
}

impl TypeEmitter {
    pub fn new(options: EmitOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &EmitOptions {
        &self.options
    }

    /// Emit every entity and assemble the artifacts.
    ///
    /// Returns the first fatal error if any entity is structurally
    /// unrecoverable; degraded entities only add warnings.
    pub fn emit(&self, doc: &SchemaDocument, fingerprint: &Fingerprint) -> Result<EmitOutput, EmissionError> {
        let names = NameResolver::resolve(doc)?;
        let cycles = CycleInfo::analyze(doc);
        if cycles.cyclic_entities() > 0 {
            debug!(entities = cycles.cyclic_entities(), "Multi-entity reference cycles found");
        }
        let ctx = CodegenContext {
            doc,
            names: &names,
            cycles: &cycles,
            options: &self.options,
        };

        let mut taken: HashSet<String> = HashSet::new();
        for entity in &doc.entities {
            let type_name = names.type_name(&entity.name);
            if matches!(entity.kind, EntityKind::Enum { .. }) {
                taken.insert(names.values_name(&type_name));
            }
            taken.insert(type_name);
        }

        let emissions: Vec<(&str, EntityEmission)> = doc
            .entities
            .iter()
            .map(|entity| {
                let mut warnings = Vec::new();
                let emission = match typescript::emit_entity(entity, &ctx, &mut taken, &mut warnings) {
                    Err(e) => EntityEmission::Fatal(e),
                    Ok(code) if warnings.is_empty() => EntityEmission::Ok(code),
                    Ok(code) => EntityEmission::Degraded(code, warnings),
                };
                (entity.name.as_str(), emission)
            })
            .collect();

        let mut fatal: Vec<EmissionError> = Vec::new();
        let mut diagnostics = Diagnostics::new();
        let mut codes: Vec<EntityCode> = Vec::with_capacity(emissions.len());
        let mut degraded_count = 0;

        for (name, emission) in emissions {
            match emission {
                EntityEmission::Ok(code) => codes.push(code),
                EntityEmission::Degraded(code, warnings) => {
                    for w in &warnings {
                        warn!(entity = name, code = %w.code, "{}", w.message);
                    }
                    degraded_count += 1;
                    diagnostics.extend(warnings);
                    codes.push(code);
                }
                EntityEmission::Fatal(e) => {
                    error!(entity = name, "{}", e);
                    fatal.push(e);
                }
            }
        }

        if let Some(first) = fatal.into_iter().next() {
            return Err(first);
        }

        let derived_from: BTreeSet<String> = doc.entity_names().map(str::to_string).collect();
        let header = self.header(doc, fingerprint);

        let mut types = header.clone();
        let mut utils = header;
        let imports: Vec<&str> = codes
            .iter()
            .flat_map(|c| c.imports.iter().map(String::as_str))
            .collect();
        utils.push_str(&render_import(&imports, &self.options.types_module()));

        for code in &codes {
            types.push_str(&code.declarations);
            utils.push_str(&code.utilities);
        }

        info!(
            entities = doc.entities.len(),
            degraded = degraded_count,
            "Emitted TypeScript artifacts"
        );

        Ok(EmitOutput {
            artifacts: vec![
                EmittedArtifact {
                    file_name: self.options.types_file.clone(),
                    content: finish(types),
                    derived_from: derived_from.clone(),
                },
                EmittedArtifact {
                    file_name: self.options.utils_file.clone(),
                    content: finish(utils),
                    derived_from,
                },
            ],
            diagnostics,
            entity_count: doc.entities.len(),
            degraded_count,
        })
    }

    fn header(&self, doc: &SchemaDocument, fingerprint: &Fingerprint) -> String {
        let title = doc.title.as_deref().unwrap_or("schema");
        format!(
            "// Generated by typegate from {} (schema {}) - DO NOT EDIT\n// Fingerprint: {}\n\n",
            title, doc.version, fingerprint
        )
    }
}

fn render_import(imports: &[&str], module: &str) -> String {
    if imports.is_empty() {
        return String::new();
    }
    let mut out = String::from("import type {\n");
    for name in imports {
        out.push_str("  ");
        out.push_str(name);
        out.push_str(",\n");
    }
    out.push_str(&format!("}} from \"{}\";\n\n", module));
    out
}

/// Exactly one trailing newline
fn finish(mut content: String) -> String {
    let trimmed = content.trim_end().len();
    content.truncate(trimmed);
    content.push('\n');
    content
}

// =============================================================================
// Artifact writing
// =============================================================================

/// What happened to an artifact file on disk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactStatus {
    Created,
    Updated,
    Unchanged,
    Removed,
}

/// Per-file change summary against the previously emitted artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactChange {
    pub file_name: String,
    pub status: ArtifactStatus,
    pub lines_added: usize,
    pub lines_removed: usize,
}

/// Write artifacts into `dir`.
///
/// Files whose content is unchanged are not touched. Changed files are first
/// staged as temp files in `dir`; nothing is renamed into place until every
/// file has been staged, and a failed rename puts back the files already
/// replaced. Artifacts listed in `previous` that are no longer produced are
/// removed.
pub fn write_artifacts(
    dir: &Path,
    artifacts: &[EmittedArtifact],
    previous: &[String],
) -> std::io::Result<Vec<ArtifactChange>> {
    fs::create_dir_all(dir)?;

    let mut changes = Vec::with_capacity(artifacts.len());
    let mut staged = Vec::new();

    for artifact in artifacts {
        let target = dir.join(&artifact.file_name);
        let old = match fs::read_to_string(&target) {
            Ok(old) => Some(old),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(e),
        };

        let change = diff_artifact(&artifact.file_name, old.as_deref(), &artifact.content);
        if change.status != ArtifactStatus::Unchanged {
            let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
            tmp.write_all(artifact.content.as_bytes())?;
            tmp.as_file().sync_all()?;
            staged.push(StagedArtifact {
                tmp,
                target,
                previous: old,
            });
        }
        changes.push(change);
    }

    commit_staged(staged)?;

    let produced: HashSet<&str> = artifacts.iter().map(|a| a.file_name.as_str()).collect();
    for stale in previous.iter().filter(|p| !produced.contains(p.as_str())) {
        let path = dir.join(stale);
        if path.exists() {
            fs::remove_file(&path)?;
            changes.push(ArtifactChange {
                file_name: stale.clone(),
                status: ArtifactStatus::Removed,
                lines_added: 0,
                lines_removed: 0,
            });
        }
    }

    for change in &changes {
        debug!(
            file = %change.file_name,
            status = ?change.status,
            added = change.lines_added,
            removed = change.lines_removed,
            "Artifact"
        );
    }
    Ok(changes)
}

/// A fully written temp file waiting to replace `target`
struct StagedArtifact {
    tmp: tempfile::NamedTempFile,
    target: PathBuf,
    /// Content `target` had before, `None` if it did not exist
    previous: Option<String>,
}

/// Rename every staged file into place, or none of them.
///
/// On a failed rename the targets already replaced get their previous
/// content back (new ones are removed) and the rename error is returned.
fn commit_staged(staged: Vec<StagedArtifact>) -> std::io::Result<()> {
    let mut committed: Vec<(PathBuf, Option<String>)> = Vec::with_capacity(staged.len());
    for StagedArtifact { tmp, target, previous } in staged {
        if let Err(e) = tmp.persist(&target) {
            for (path, old) in committed.iter().rev() {
                let restored = match old {
                    Some(content) => fs::write(path, content),
                    None => fs::remove_file(path),
                };
                if let Err(restore_err) = restored {
                    error!(file = %path.display(), error = %restore_err, "Failed to restore artifact");
                }
            }
            return Err(e.error);
        }
        committed.push((target, previous));
    }
    Ok(())
}

/// Compare new artifact content with what was emitted before
pub fn diff_artifact(file_name: &str, old: Option<&str>, new: &str) -> ArtifactChange {
    let Some(old) = old else {
        return ArtifactChange {
            file_name: file_name.to_string(),
            status: ArtifactStatus::Created,
            lines_added: new.lines().count(),
            lines_removed: 0,
        };
    };
    if old == new {
        return ArtifactChange {
            file_name: file_name.to_string(),
            status: ArtifactStatus::Unchanged,
            lines_added: 0,
            lines_removed: 0,
        };
    }

    let diff = TextDiff::from_lines(old, new);
    let (mut added, mut removed) = (0, 0);
    for change in diff.iter_all_changes() {
        match change.tag() {
            ChangeTag::Insert => added += 1,
            ChangeTag::Delete => removed += 1,
            ChangeTag::Equal => {}
        }
    }
    ArtifactChange {
        file_name: file_name.to_string(),
        status: ArtifactStatus::Updated,
        lines_added: added,
        lines_removed: removed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::SchemaLoader;
    use std::io::Write;

    fn load(json: &str) -> (Fingerprint, SchemaDocument) {
        SchemaLoader::parse(json.as_bytes(), "test.json").unwrap()
    }

    const FORECAST: &str = r##"{
        "openapi": "3.1.0",
        "info": {"title": "Forecast API"},
        "paths": {},
        "components": {"schemas": {
            "ForecastResponse": {
                "type": "object",
                "description": "Short-range forecast",
                "properties": {
                    "horizon": {"type": "string"},
                    "narrative": {"type": "string"},
                    "riskLevel": {"type": "string", "enum": ["low", "high"]},
                    "tags": {"type": "array", "items": {"type": "string"}},
                    "region": {"$ref": "#/components/schemas/Region"}
                },
                "required": ["horizon", "narrative", "riskLevel"]
            },
            "Region": {"type": "string", "enum": ["north", "south"]}
        }}
    }"##;

    #[test]
    fn test_emits_types_and_guards_in_declaration_order() {
        let (fp, doc) = load(FORECAST);
        let out = TypeEmitter::new(EmitOptions::default()).emit(&doc, &fp).unwrap();
        assert!(out.diagnostics.is_empty());
        assert_eq!(out.artifacts.len(), 2);

        let types = &out.artifacts[0].content;
        assert!(types.contains("export type ForecastResponseRiskLevel = \"low\" | \"high\";"));
        assert!(types.contains("/** Short-range forecast */\nexport interface ForecastResponse {"));
        let horizon = types.find("  horizon: string;").unwrap();
        let narrative = types.find("  narrative: string;").unwrap();
        let risk = types.find("  riskLevel: ForecastResponseRiskLevel;").unwrap();
        let tags = types.find("  tags?: Array<string>;").unwrap();
        assert!(horizon < narrative && narrative < risk && risk < tags);
        assert!(types.find("interface ForecastResponse").unwrap() < types.find("export type Region").unwrap());

        let utils = &out.artifacts[1].content;
        assert!(utils.contains("from \"./types.generated\";"));
        assert!(utils.contains(
            "export const FORECAST_RESPONSE_RISK_LEVEL_VALUES: readonly ForecastResponseRiskLevel[] = [\"low\", \"high\"];"
        ));
        assert!(utils.contains("export function isForecastResponse(value: unknown): value is ForecastResponse {"));
        assert!(utils.contains("if (!(typeof v.horizon === \"string\")) {"));
        assert!(utils.contains(
            "(FORECAST_RESPONSE_RISK_LEVEL_VALUES as readonly string[]).indexOf(v.riskLevel) !== -1"
        ));
        // optional fields are not checked by the guard
        assert!(!utils.contains("v.tags"));
        assert!(utils.contains("export function isRegion(value: unknown): value is Region {"));
    }

    #[test]
    fn test_inline_enum_names_are_unique_across_entities() {
        let (fp, doc) = load(r#"{"openapi": "3.1.0", "paths": {}, "components": {"schemas": {
            "Forecast": {"type": "object", "properties": {
                "riskLevel": {"type": "string", "enum": ["low", "high"]}
            }},
            "ForecastRisk": {"type": "object", "properties": {
                "level": {"type": "string", "enum": ["minor", "major"]}
            }},
            "ForecastRiskLevelItem": {"type": "string", "enum": ["a"]}
        }}}"#);
        let out = TypeEmitter::new(EmitOptions::default()).emit(&doc, &fp).unwrap();
        let types = &out.artifacts[0].content;
        let utils = &out.artifacts[1].content;

        assert!(types.contains("export type ForecastRiskLevel = \"low\" | \"high\";"));
        assert!(types.contains("export type ForecastRiskLevel2 = \"minor\" | \"major\";"));
        assert!(types.contains("  level?: ForecastRiskLevel2;"));
        for name in ["ForecastRiskLevel", "ForecastRiskLevel2", "ForecastRiskLevelItem"] {
            let decl = format!("export type {} =", name);
            assert_eq!(types.matches(&decl).count(), 1, "{}", name);
        }
        for name in ["FORECAST_RISK_LEVEL_VALUES", "FORECAST_RISK_LEVEL2_VALUES"] {
            let decl = format!("export const {}:", name);
            assert_eq!(utils.matches(&decl).count(), 1, "{}", name);
        }
    }

    #[test]
    fn test_entities_named_like_builtins_do_not_shadow_them() {
        let (fp, doc) = load(r##"{"openapi": "3.1.0", "paths": {}, "components": {"schemas": {
            "Record": {"type": "object", "properties": {"id": {"type": "string"}}, "required": ["id"]},
            "Ledger": {"type": "object", "properties": {
                "records": {"type": "array", "items": {"$ref": "#/components/schemas/Record"}},
                "meta": {"type": "object", "additionalProperties": {"type": "string"}}
            }, "required": ["records"]}
        }}}"##);
        let out = TypeEmitter::new(EmitOptions::default()).emit(&doc, &fp).unwrap();
        let types = &out.artifacts[0].content;
        let utils = &out.artifacts[1].content;

        assert!(types.contains("export interface Record_ {"));
        assert!(types.contains("  records: Array<Record_>;"));
        assert!(types.contains("  meta?: Record<string, string>;"));
        assert!(!types.contains("interface Record {"));
        assert!(utils.contains("export function isRecord_(value: unknown): value is Record_ {"));
        assert!(utils.contains("  const v = value as Record<string, unknown>;"));
    }

    #[test]
    fn test_emission_is_deterministic() {
        let (fp, doc) = load(FORECAST);
        let emitter = TypeEmitter::new(EmitOptions::default());
        let a = emitter.emit(&doc, &fp).unwrap();
        let b = emitter.emit(&doc, &fp).unwrap();
        assert_eq!(a.artifacts, b.artifacts);
    }

    #[test]
    fn test_undiscriminated_union_degrades() {
        let (fp, doc) = load(r#"{"openapi": "3.1.0", "paths": {}, "components": {"schemas": {
            "Value": {"type": "object", "properties": {
                "v": {"oneOf": [{"type": "string"}, {"type": "number"}]}
            }, "required": ["v"]}
        }}}"#);
        let out = TypeEmitter::new(EmitOptions::default()).emit(&doc, &fp).unwrap();
        assert_eq!(out.degraded_count, 1);
        assert_eq!(out.diagnostics.with_code("emit-degraded-union").count(), 1);
        assert!(out.artifacts[0].content.contains("  v: unknown;"));
        assert!(out.artifacts[1].content.contains("if (!(\"v\" in v)) {"));
    }

    #[test]
    fn test_indirect_recursion_degrades_but_self_reference_does_not() {
        let (fp, doc) = load(r##"{"openapi": "3.1.0", "paths": {}, "components": {"schemas": {
            "Tree": {"type": "object", "properties": {
                "children": {"type": "array", "items": {"$ref": "#/components/schemas/Tree"}}
            }},
            "Author": {"type": "object", "properties": {
                "latest": {"$ref": "#/components/schemas/Post"}
            }, "required": ["latest"]},
            "Post": {"type": "object", "properties": {
                "author": {"$ref": "#/components/schemas/Author"}
            }}
        }}}"##);
        let out = TypeEmitter::new(EmitOptions::default()).emit(&doc, &fp).unwrap();
        let types = &out.artifacts[0].content;
        assert!(types.contains("children?: Array<Tree>;"));
        assert!(types.contains("latest: Record<string, unknown>;"));
        assert!(types.contains("author?: Record<string, unknown>;"));
        assert_eq!(out.diagnostics.with_code("emit-degraded-recursion").count(), 2);
    }

    #[test]
    fn test_unresolved_reference_is_fatal() {
        let (fp, doc) = load(r##"{"openapi": "3.1.0", "paths": {}, "components": {"schemas": {
            "Order": {"type": "object", "properties": {
                "customer": {"$ref": "#/components/schemas/Customer"}
            }}
        }}}"##);
        let err = TypeEmitter::new(EmitOptions::default()).emit(&doc, &fp).unwrap_err();
        assert_eq!(
            err,
            EmissionError::UnresolvedReference {
                entity: "Order".into(),
                field: "customer".into(),
                target: "Customer".into(),
            }
        );
    }

    #[test]
    fn test_unresolved_reference_with_fallback_degrades() {
        let (fp, doc) = load(r##"{"openapi": "3.1.0", "paths": {}, "components": {"schemas": {
            "Order": {"type": "object", "properties": {
                "customer": {"$ref": "#/components/schemas/Customer", "type": "object"}
            }, "required": ["customer"]}
        }}}"##);
        let out = TypeEmitter::new(EmitOptions::default()).emit(&doc, &fp).unwrap();
        assert_eq!(out.diagnostics.with_code("emit-degraded-fallback").count(), 1);
        assert!(out.artifacts[0].content.contains("customer: Record<string, unknown>;"));
    }

    #[test]
    fn test_write_artifacts_skips_unchanged_and_removes_stale() {
        let dir = tempfile::tempdir().unwrap();
        let (fp, doc) = load(FORECAST);
        let out = TypeEmitter::new(EmitOptions::default()).emit(&doc, &fp).unwrap();

        let first = write_artifacts(dir.path(), &out.artifacts, &[]).unwrap();
        assert!(first.iter().all(|c| c.status == ArtifactStatus::Created));

        fs::write(dir.path().join("old.generated.ts"), "// stale\n").unwrap();
        let previous = vec!["types.generated.ts".to_string(), "old.generated.ts".to_string()];
        let second = write_artifacts(dir.path(), &out.artifacts, &previous).unwrap();
        assert_eq!(second[0].status, ArtifactStatus::Unchanged);
        assert_eq!(second[1].status, ArtifactStatus::Unchanged);
        assert_eq!(second[2].status, ArtifactStatus::Removed);
        assert!(!dir.path().join("old.generated.ts").exists());
    }

    #[test]
    fn test_failed_rename_restores_replaced_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let existing = dir.path().join("types.generated.ts");
        let created = dir.path().join("utils.generated.ts");
        fs::write(&existing, "// old types\n").unwrap();

        let stage = |content: &str, target: PathBuf, previous: Option<&str>| {
            let mut tmp = tempfile::NamedTempFile::new_in(dir.path()).unwrap();
            tmp.write_all(content.as_bytes()).unwrap();
            StagedArtifact {
                tmp,
                target,
                previous: previous.map(str::to_string),
            }
        };
        let staged = vec![
            stage("// new types\n", existing.clone(), Some("// old types\n")),
            stage("// new utils\n", created.clone(), None),
            // renaming into a missing directory fails
            stage("// extra\n", dir.path().join("missing").join("extra.ts"), None),
        ];

        assert!(commit_staged(staged).is_err());
        assert_eq!(fs::read_to_string(&existing).unwrap(), "// old types\n");
        assert!(!created.exists());
        let leftovers: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(leftovers.len(), 1);
    }

    #[test]
    fn test_diff_counts_lines() {
        let change = diff_artifact("a.ts", Some("a\nb\nc\n"), "a\nx\nc\nd\n");
        assert_eq!(change.status, ArtifactStatus::Updated);
        assert_eq!(change.lines_added, 2);
        assert_eq!(change.lines_removed, 1);
    }
}
