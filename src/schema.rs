//! Schema loading
//!
//! Reads the interface schema, fingerprints its raw bytes and converts the
//! JSON into a typed [`SchemaDocument`] at the ingestion boundary. Nothing
//! downstream of this module looks at untyped schema JSON.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};
use tracing::debug;

use crate::checksum::Fingerprint;
use crate::error::ConfigurationError;

const LOCAL_REF_PREFIXES: [&str; 2] = ["#/components/schemas/", "#/definitions/"];
const HTTP_METHODS: [&str; 8] = ["get", "put", "post", "delete", "options", "head", "patch", "trace"];

// =============================================================================
// Type references
// =============================================================================

/// Primitive JSON category used by guards and the compatibility checker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JsonCategory {
    String,
    Number,
    Boolean,
    Object,
    Array,
    Null,
}

impl JsonCategory {
    /// Category of an observed JSON value
    pub fn of(value: &Value) -> Self {
        match value {
            Value::String(_) => Self::String,
            Value::Number(_) => Self::Number,
            Value::Bool(_) => Self::Boolean,
            Value::Object(_) => Self::Object,
            Value::Array(_) => Self::Array,
            Value::Null => Self::Null,
        }
    }
}

impl fmt::Display for JsonCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Object => "object",
            Self::Array => "array",
            Self::Null => "null",
        };
        f.write_str(s)
    }
}

/// Type of a field or alias target
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeRef {
    String,
    Number,
    Integer,
    Boolean,
    Null,
    /// `{}`: anything goes
    Any,
    /// Free-form object without declared properties
    Object,
    Array(Box<TypeRef>),
    /// Object with `additionalProperties` of one type
    Map(Box<TypeRef>),
    /// Reference to another entity; `fallback` is the sibling `type`, if any
    Ref {
        target: String,
        fallback: Option<Box<TypeRef>>,
    },
    /// Closed string union declared inline on a field
    InlineEnum(Vec<String>),
    Union {
        members: Vec<TypeRef>,
        discriminator: Option<String>,
    },
    Nullable(Box<TypeRef>),
    /// A construct the emitter cannot express faithfully
    Unsupported {
        reason: String,
        category: Option<JsonCategory>,
    },
}

impl TypeRef {
    /// Entity names this type refers to, in order of appearance
    pub fn references(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_refs(&mut out);
        out
    }

    fn collect_refs<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            TypeRef::Ref { target, .. } => out.push(target),
            TypeRef::Array(inner) | TypeRef::Map(inner) | TypeRef::Nullable(inner) => {
                inner.collect_refs(out)
            }
            TypeRef::Union { members, .. } => {
                for m in members {
                    m.collect_refs(out);
                }
            }
            _ => {}
        }
    }
}

// =============================================================================
// Entities
// =============================================================================

/// A declared field of an object entity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDef {
    pub name: String,
    pub ty: TypeRef,
    pub required: bool,
    pub description: Option<String>,
}

/// Shape of an entity
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityKind {
    Object { fields: Vec<FieldDef> },
    Enum { values: Vec<String> },
    Alias { target: TypeRef },
}

/// A named schema entity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityDef {
    pub name: String,
    pub kind: EntityKind,
    pub description: Option<String>,
}

impl EntityDef {
    pub fn fields(&self) -> &[FieldDef] {
        match &self.kind {
            EntityKind::Object { fields } => fields,
            _ => &[],
        }
    }

    pub fn required_fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.fields().iter().filter(|f| f.required)
    }
}

/// What a successful response of an operation carries
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseShape {
    Entity(String),
    List(String),
}

impl ResponseShape {
    pub fn entity(&self) -> &str {
        match self {
            ResponseShape::Entity(e) | ResponseShape::List(e) => e,
        }
    }

    pub fn is_list(&self) -> bool {
        matches!(self, ResponseShape::List(_))
    }
}

/// An operation declared under `paths`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationDef {
    pub path: String,
    pub method: String,
    pub response: Option<ResponseShape>,
}

// =============================================================================
// Document
// =============================================================================

/// Typed schema document, entities in declaration order
#[derive(Debug, Clone)]
pub struct SchemaDocument {
    pub version: String,
    pub title: Option<String>,
    pub entities: Vec<EntityDef>,
    pub operations: Vec<OperationDef>,
    index: HashMap<String, usize>,
}

impl SchemaDocument {
    pub fn new(
        version: impl Into<String>,
        title: Option<String>,
        entities: Vec<EntityDef>,
        operations: Vec<OperationDef>,
    ) -> Self {
        let index = entities
            .iter()
            .enumerate()
            .map(|(i, e)| (e.name.clone(), i))
            .collect();
        Self {
            version: version.into(),
            title,
            entities,
            operations,
            index,
        }
    }

    pub fn entity(&self, name: &str) -> Option<&EntityDef> {
        self.index.get(name).map(|&i| &self.entities[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn entity_names(&self) -> impl Iterator<Item = &str> {
        self.entities.iter().map(|e| e.name.as_str())
    }

    /// Resolve the JSON category a type ultimately has.
    ///
    /// Returns `None` when any category is acceptable. Alias chains are
    /// followed with a hop limit.
    pub fn category_of(&self, ty: &TypeRef) -> Option<JsonCategory> {
        self.category_of_bounded(ty, 0)
    }

    fn category_of_bounded(&self, ty: &TypeRef, hops: usize) -> Option<JsonCategory> {
        if hops > 16 {
            return None;
        }
        match ty {
            TypeRef::String | TypeRef::InlineEnum(_) => Some(JsonCategory::String),
            TypeRef::Number | TypeRef::Integer => Some(JsonCategory::Number),
            TypeRef::Boolean => Some(JsonCategory::Boolean),
            TypeRef::Null => Some(JsonCategory::Null),
            TypeRef::Object | TypeRef::Map(_) => Some(JsonCategory::Object),
            TypeRef::Array(_) => Some(JsonCategory::Array),
            TypeRef::Any | TypeRef::Union { .. } | TypeRef::Nullable(_) => None,
            TypeRef::Unsupported { category, .. } => *category,
            TypeRef::Ref { target, fallback } => match self.entity(target) {
                Some(entity) => match &entity.kind {
                    EntityKind::Object { .. } => Some(JsonCategory::Object),
                    EntityKind::Enum { .. } => Some(JsonCategory::String),
                    EntityKind::Alias { target } => self.category_of_bounded(target, hops + 1),
                },
                None => fallback
                    .as_deref()
                    .and_then(|f| self.category_of_bounded(f, hops + 1)),
            },
        }
    }
}

/// A schema loaded from disk together with its fingerprint
#[derive(Debug, Clone)]
pub struct LoadedSchema {
    pub path: PathBuf,
    pub fingerprint: Fingerprint,
    pub document: SchemaDocument,
}

// =============================================================================
// Loader
// =============================================================================

/// Reads and fingerprints schema documents
pub struct SchemaLoader;

impl SchemaLoader {
    /// Load a schema file
    pub fn load(path: impl AsRef<Path>) -> Result<LoadedSchema, ConfigurationError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigurationError::Missing(path.to_path_buf()));
        }
        let bytes = std::fs::read(path).map_err(|source| ConfigurationError::Unreadable {
            path: path.to_path_buf(),
            source,
        })?;

        let (fingerprint, document) = Self::parse(&bytes, &path.display().to_string())?;
        debug!(
            path = %path.display(),
            fingerprint = fingerprint.short(),
            entities = document.entities.len(),
            operations = document.operations.len(),
            "Loaded schema"
        );

        Ok(LoadedSchema {
            path: path.to_path_buf(),
            fingerprint,
            document,
        })
    }

    /// Fingerprint and parse raw schema bytes
    pub fn parse(bytes: &[u8], name: &str) -> Result<(Fingerprint, SchemaDocument), ConfigurationError> {
        let fingerprint = Fingerprint::from_bytes(bytes);
        let root: Value = serde_json::from_slice(bytes).map_err(|e| ConfigurationError::Malformed {
            document: name.to_string(),
            line: e.line(),
            column: e.column(),
            message: e.to_string(),
        })?;
        let document = parse_document(&root)?;
        Ok((fingerprint, document))
    }
}

fn parse_document(root: &Value) -> Result<SchemaDocument, ConfigurationError> {
    let root = root
        .as_object()
        .ok_or(ConfigurationError::MissingSection("root object"))?;

    let version = ["openapi", "swagger", "version"]
        .iter()
        .find_map(|k| root.get(*k).and_then(Value::as_str))
        .ok_or(ConfigurationError::MissingSection("version marker"))?
        .to_string();

    let title = root
        .get("info")
        .and_then(|i| i.get("title"))
        .and_then(Value::as_str)
        .map(str::to_string);

    let definitions = root
        .get("components")
        .and_then(|c| c.get("schemas"))
        .or_else(|| root.get("definitions"))
        .and_then(Value::as_object)
        .filter(|m| !m.is_empty())
        .ok_or(ConfigurationError::MissingSection("entity definitions"))?;

    let paths = root
        .get("paths")
        .and_then(Value::as_object)
        .ok_or(ConfigurationError::MissingSection("operation paths"))?;

    let entities = definitions
        .iter()
        .map(|(name, def)| parse_entity(name, def))
        .collect::<Result<Vec<_>, _>>()?;

    let operations = parse_operations(paths);

    Ok(SchemaDocument::new(version, title, entities, operations))
}

fn parse_entity(name: &str, def: &Value) -> Result<EntityDef, ConfigurationError> {
    let obj = def.as_object().ok_or_else(|| ConfigurationError::InvalidEntity {
        name: name.to_string(),
        reason: "definition is not an object".to_string(),
    })?;
    let description = description_of(obj);

    if let Some(values) = string_enum(obj) {
        return Ok(EntityDef {
            name: name.to_string(),
            kind: EntityKind::Enum { values },
            description,
        });
    }

    let is_object = obj.contains_key("properties")
        || (obj.get("type").and_then(Value::as_str) == Some("object")
            && !obj.contains_key("additionalProperties"));

    let kind = if is_object {
        EntityKind::Object {
            fields: parse_fields(name, obj)?,
        }
    } else {
        EntityKind::Alias {
            target: parse_type(def),
        }
    };

    Ok(EntityDef {
        name: name.to_string(),
        kind,
        description,
    })
}

fn parse_fields(entity: &str, obj: &Map<String, Value>) -> Result<Vec<FieldDef>, ConfigurationError> {
    let invalid = |reason: String| ConfigurationError::InvalidEntity {
        name: entity.to_string(),
        reason,
    };

    let properties = match obj.get("properties") {
        None => return Ok(Vec::new()),
        Some(Value::Object(p)) => p,
        Some(_) => return Err(invalid("'properties' is not an object".to_string())),
    };

    let required: Vec<&str> = match obj.get("required") {
        None => Vec::new(),
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| v.as_str().ok_or_else(|| invalid("'required' must list strings".to_string())))
            .collect::<Result<_, _>>()?,
        Some(_) => return Err(invalid("'required' is not an array".to_string())),
    };

    if let Some(unknown) = required.iter().find(|r| !properties.contains_key(**r)) {
        return Err(invalid(format!("required field '{}' is not declared", unknown)));
    }

    Ok(properties
        .iter()
        .map(|(field, schema)| FieldDef {
            name: field.clone(),
            ty: parse_type(schema),
            required: required.contains(&field.as_str()),
            description: schema.as_object().and_then(description_of),
        })
        .collect())
}

/// Convert a property schema into a [`TypeRef`]
pub fn parse_type(schema: &Value) -> TypeRef {
    let obj = match schema {
        Value::Object(obj) => obj,
        Value::Bool(true) => return TypeRef::Any,
        _ => {
            return TypeRef::Unsupported {
                reason: format!("schema is not an object: {}", schema),
                category: None,
            }
        }
    };

    let ty = parse_type_inner(obj);
    if obj.get("nullable").and_then(Value::as_bool) == Some(true) {
        TypeRef::Nullable(Box::new(ty))
    } else {
        ty
    }
}

fn parse_type_inner(obj: &Map<String, Value>) -> TypeRef {
    if let Some(reference) = obj.get("$ref").and_then(Value::as_str) {
        return match local_ref_target(reference) {
            Some(target) => {
                let fallback = obj
                    .get("type")
                    .map(|t| Box::new(parse_type(&Value::Object(single_entry("type", t.clone())))));
                TypeRef::Ref {
                    target: target.to_string(),
                    fallback,
                }
            }
            None => TypeRef::Unsupported {
                reason: format!("non-local reference '{}'", reference),
                category: None,
            },
        };
    }

    if obj.contains_key("enum") {
        return match string_enum(obj) {
            Some(values) => TypeRef::InlineEnum(values),
            None => TypeRef::Unsupported {
                reason: "enum with non-string values".to_string(),
                category: None,
            },
        };
    }

    for key in ["oneOf", "anyOf"] {
        if let Some(Value::Array(members)) = obj.get(key) {
            return parse_union(obj, members);
        }
    }

    if let Some(Value::Array(parts)) = obj.get("allOf") {
        return match parts.as_slice() {
            [single] => parse_type(single),
            _ => TypeRef::Unsupported {
                reason: "allOf composition of several schemas".to_string(),
                category: Some(JsonCategory::Object),
            },
        };
    }

    match obj.get("type") {
        Some(Value::String(t)) => parse_named_type(t, obj),
        Some(Value::Array(types)) => {
            let non_null: Vec<&str> = types
                .iter()
                .filter_map(Value::as_str)
                .filter(|t| *t != "null")
                .collect();
            match non_null.as_slice() {
                [single] if non_null.len() < types.len() => {
                    TypeRef::Nullable(Box::new(parse_named_type(single, obj)))
                }
                [single] => parse_named_type(single, obj),
                _ => TypeRef::Unsupported {
                    reason: format!("multi-type declaration {:?}", non_null),
                    category: None,
                },
            }
        }
        Some(other) => TypeRef::Unsupported {
            reason: format!("invalid type declaration {}", other),
            category: None,
        },
        None => TypeRef::Any,
    }
}

fn parse_named_type(name: &str, obj: &Map<String, Value>) -> TypeRef {
    match name {
        "string" => TypeRef::String,
        "number" => TypeRef::Number,
        "integer" => TypeRef::Integer,
        "boolean" => TypeRef::Boolean,
        "null" => TypeRef::Null,
        "array" => TypeRef::Array(Box::new(obj.get("items").map(parse_type).unwrap_or(TypeRef::Any))),
        "object" => {
            if obj.get("properties").and_then(Value::as_object).is_some_and(|p| !p.is_empty()) {
                TypeRef::Unsupported {
                    reason: "inline object with declared properties".to_string(),
                    category: Some(JsonCategory::Object),
                }
            } else {
                match obj.get("additionalProperties") {
                    Some(Value::Object(inner)) => {
                        TypeRef::Map(Box::new(parse_type(&Value::Object(inner.clone()))))
                    }
                    _ => TypeRef::Object,
                }
            }
        }
        other => TypeRef::Unsupported {
            reason: format!("unknown type '{}'", other),
            category: None,
        },
    }
}

fn parse_union(obj: &Map<String, Value>, members: &[Value]) -> TypeRef {
    let mut parsed: Vec<TypeRef> = members.iter().map(parse_type).collect();

    // `oneOf: [X, {type: null}]` is just a nullable X
    let had_null = parsed.iter().any(|m| *m == TypeRef::Null);
    parsed.retain(|m| *m != TypeRef::Null);
    if had_null && parsed.len() == 1 {
        return TypeRef::Nullable(Box::new(parsed.remove(0)));
    }

    let discriminator = obj
        .get("discriminator")
        .and_then(|d| d.get("propertyName"))
        .and_then(Value::as_str)
        .map(str::to_string);

    let union = TypeRef::Union {
        members: parsed,
        discriminator,
    };
    if had_null {
        TypeRef::Nullable(Box::new(union))
    } else {
        union
    }
}

fn parse_operations(paths: &Map<String, Value>) -> Vec<OperationDef> {
    let mut operations = Vec::new();
    for (path, item) in paths {
        let Some(item) = item.as_object() else { continue };
        for (method, op) in item {
            if !HTTP_METHODS.contains(&method.as_str()) {
                continue;
            }
            operations.push(OperationDef {
                path: path.clone(),
                method: method.to_uppercase(),
                response: success_response(op),
            });
        }
    }
    operations
}

fn success_response(op: &Value) -> Option<ResponseShape> {
    let responses = op.get("responses")?.as_object()?;
    let (_, response) = responses
        .iter()
        .find(|(status, _)| status.starts_with('2'))?;
    let content = response.get("content")?.as_object()?;
    let (_, media) = content.iter().find(|(media_type, _)| media_type.contains("json"))?;

    match parse_type(media.get("schema")?) {
        TypeRef::Ref { target, .. } => Some(ResponseShape::Entity(target)),
        TypeRef::Array(inner) => match *inner {
            TypeRef::Ref { target, .. } => Some(ResponseShape::List(target)),
            _ => None,
        },
        _ => None,
    }
}

fn local_ref_target(reference: &str) -> Option<&str> {
    LOCAL_REF_PREFIXES
        .iter()
        .find_map(|prefix| reference.strip_prefix(prefix))
        .filter(|name| !name.is_empty() && !name.contains('/'))
}

fn string_enum(obj: &Map<String, Value>) -> Option<Vec<String>> {
    let values = obj.get("enum")?.as_array()?;
    values
        .iter()
        .map(|v| v.as_str().map(str::to_string))
        .collect::<Option<Vec<_>>>()
        .filter(|v| !v.is_empty())
}

fn description_of(obj: &Map<String, Value>) -> Option<String> {
    obj.get("description").and_then(Value::as_str).map(str::to_string)
}

fn single_entry(key: &str, value: Value) -> Map<String, Value> {
    let mut map = Map::new();
    map.insert(key.to_string(), value);
    map
}
