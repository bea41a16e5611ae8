//! Contract fixtures and route mapping
//!
//! Recorded interactions are loaded from a fixtures directory and converted
//! into typed records at load time. Each request path is mapped to the
//! entity its response must conform to through an explicit [`RouteTable`].

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::checksum::Fingerprint;
use crate::diagnostics::{codes, Location, Severity, Stage, ValidationDiagnostic};
use crate::error::ConfigurationError;
use crate::schema::{ResponseShape, SchemaDocument};

// =============================================================================
// Interactions
// =============================================================================

/// Recorded request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    pub path: String,
}

/// Recorded response. The body stays untyped: it is the data under test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

/// One recorded request/response exchange
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContractInteraction {
    /// `<fixture file>#<index>`, assigned at load time
    #[serde(default, skip_deserializing)]
    pub id: String,
    #[serde(default)]
    pub description: String,
    pub request: RecordedRequest,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<RecordedResponse>,
}

impl ContractInteraction {
    pub fn body(&self) -> Option<&Value> {
        self.response.as_ref().and_then(|r| r.body.as_ref())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum FixtureFile {
    List(Vec<ContractInteraction>),
    Wrapped { interactions: Vec<ContractInteraction> },
}

/// Interactions loaded from a fixtures directory
#[derive(Debug, Clone, Default)]
pub struct LoadedFixtures {
    pub interactions: Vec<ContractInteraction>,
    pub diagnostics: Vec<ValidationDiagnostic>,
    /// Fingerprint over every fixture file (relative path and bytes)
    pub fingerprint: Option<Fingerprint>,
    pub files: usize,
}

/// Load every `*.json` fixture under `dir`, sorted by path.
///
/// A malformed file is reported and skipped; a missing directory is a
/// configuration error.
pub fn load_fixtures(dir: &Path) -> Result<LoadedFixtures, ConfigurationError> {
    if !dir.is_dir() {
        return Err(ConfigurationError::ContractsDirMissing(dir.to_path_buf()));
    }

    let mut files: Vec<(String, Vec<u8>)> = Vec::new();
    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!("Skipping unreadable fixture entry: {}", e);
                continue;
            }
        };
        let path = entry.path();
        if !entry.file_type().is_file() || path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let rel = path
            .strip_prefix(dir)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/");
        let bytes = fs::read(path).map_err(|source| ConfigurationError::Unreadable {
            path: path.to_path_buf(),
            source,
        })?;
        files.push((rel, bytes));
    }

    let fingerprint = Fingerprint::from_parts(files.iter().map(|(n, b)| (n.as_str(), b.as_slice())));
    let mut loaded = LoadedFixtures {
        fingerprint: Some(fingerprint),
        files: files.len(),
        ..Default::default()
    };

    for (rel, bytes) in &files {
        match serde_json::from_slice::<FixtureFile>(bytes) {
            Ok(fixture) => {
                let list = match fixture {
                    FixtureFile::List(list) | FixtureFile::Wrapped { interactions: list } => list,
                };
                debug!(file = %rel, interactions = list.len(), "Loaded fixture");
                for (i, mut interaction) in list.into_iter().enumerate() {
                    interaction.id = format!("{}#{}", rel, i);
                    loaded.interactions.push(interaction);
                }
            }
            Err(e) => {
                warn!(file = %rel, "Malformed contract fixture: {}", e);
                loaded.diagnostics.push(
                    ValidationDiagnostic::new(
                        Stage::ContractChecking,
                        Severity::High,
                        codes::CONTRACT_FIXTURE_MALFORMED,
                        format!("fixture is not an array of interactions: {}", e),
                    )
                    .with_location(Location::file(rel.clone())),
                );
            }
        }
    }

    Ok(loaded)
}

// =============================================================================
// Route table
// =============================================================================

/// Expected response shape for a route
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteTarget {
    pub entity: String,
    pub list: bool,
}

impl RouteTarget {
    /// Parse a config value: `Entity` or `Entity[]`
    pub fn parse(value: &str) -> Self {
        match value.trim().strip_suffix("[]") {
            Some(entity) => Self {
                entity: entity.trim().to_string(),
                list: true,
            },
            None => Self {
                entity: value.trim().to_string(),
                list: false,
            },
        }
    }

    fn label(&self) -> String {
        if self.list {
            format!("{}[]", self.entity)
        } else {
            self.entity.clone()
        }
    }
}

impl From<&ResponseShape> for RouteTarget {
    fn from(shape: &ResponseShape) -> Self {
        Self {
            entity: shape.entity().to_string(),
            list: shape.is_list(),
        }
    }
}

/// Deterministic path -> entity mapping.
///
/// Keys are normalized paths in which every templated segment (`{id}`,
/// `:id`) is the wildcard `{}` matching any one segment. Lookup prefers a
/// route covering every segment of the request, then the route matching the
/// longest segment prefix, then the one with more literal segments. Ties go
/// to the lexically first key, so a lookup always has one answer.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: BTreeMap<String, RouteTarget>,
}

impl RouteTable {
    /// Build from explicit `(path, target)` entries; duplicate normalized paths are rejected
    pub fn new<'a, I>(entries: I) -> Result<Self, ConfigurationError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut routes: BTreeMap<String, RouteTarget> = BTreeMap::new();
        for (path, target) in entries {
            let key = normalize_path(path);
            let target = RouteTarget::parse(target);
            if let Some(existing) = routes.get(&key) {
                return Err(ConfigurationError::DuplicateRoute {
                    path: key,
                    first: existing.label(),
                    second: target.label(),
                });
            }
            routes.insert(key, target);
        }
        Ok(Self { routes })
    }

    /// Add routes declared by the schema's operations without overriding explicit ones.
    ///
    /// A derived route that collides with a different target is dropped and
    /// reported instead of guessed.
    pub fn merge_schema_routes(&mut self, doc: &SchemaDocument) -> Vec<ValidationDiagnostic> {
        let mut diagnostics = Vec::new();
        let mut derived: BTreeMap<String, RouteTarget> = BTreeMap::new();
        let mut conflicted: Vec<String> = Vec::new();

        for op in &doc.operations {
            let Some(shape) = &op.response else { continue };
            let key = normalize_path(&op.path);
            let target = RouteTarget::from(shape);
            match derived.get(&key) {
                Some(existing) if *existing != target => {
                    diagnostics.push(ValidationDiagnostic::new(
                        Stage::ContractChecking,
                        Severity::Low,
                        codes::CONTRACT_ROUTE_CONFLICT,
                        format!(
                            "operations under '{}' respond with both {} and {}; add an explicit route",
                            key,
                            existing.label(),
                            target.label()
                        ),
                    ));
                    conflicted.push(key);
                }
                Some(_) => {}
                None => {
                    derived.insert(key, target);
                }
            }
        }

        for key in conflicted {
            derived.remove(&key);
        }
        for (key, target) in derived {
            self.routes.entry(key).or_insert(target);
        }
        diagnostics
    }

    /// Resolve a request path
    pub fn resolve(&self, request_path: &str) -> Option<&RouteTarget> {
        let path = normalize_path(request_path);
        let request: Vec<&str> = segments(&path).collect();

        let mut best: Option<((bool, usize, usize), &RouteTarget)> = None;
        for (key, target) in &self.routes {
            let route: Vec<&str> = segments(key).collect();
            if route.len() > request.len() {
                continue;
            }
            let mut literals = 0;
            let covers = route.iter().zip(&request).all(|(r, q)| {
                if *r == WILDCARD {
                    true
                } else {
                    literals += 1;
                    r == q
                }
            });
            if !covers {
                continue;
            }
            let score = (route.len() == request.len(), route.len(), literals);
            if best.as_ref().map_or(true, |(top, _)| score > *top) {
                best = Some((score, target));
            }
        }
        best.map(|(_, target)| target)
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

/// Segment standing for any single templated path segment
const WILDCARD: &str = "{}";

/// Drop the query string, replace templated segments with `{}` and trim trailing `/`
pub fn normalize_path(path: &str) -> String {
    let path = path.split(['?', '#']).next().unwrap_or("");
    let normalized: Vec<&str> = segments(path)
        .map(|segment| {
            if segment.starts_with('{') || segment.starts_with(':') {
                WILDCARD
            } else {
                segment
            }
        })
        .collect();
    format!("/{}", normalized.join("/"))
}

fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}
