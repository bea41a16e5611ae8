//! Name Resolution
//!
//! Maps schema entity names to TypeScript identifiers and detects collisions
//! before any code is rendered.
//!
//! Schema names that are already valid PascalCase identifiers are preserved
//! exactly; anything else is split on separators and re-cased.

use std::collections::HashMap;

use crate::error::EmissionError;
use crate::schema::SchemaDocument;

/// Words that cannot be used as type names in TypeScript
const RESERVED: &[&str] = &[
    "any", "boolean", "break", "case", "catch", "class", "const", "continue", "debugger",
    "default", "delete", "do", "else", "enum", "export", "extends", "false", "finally", "for",
    "function", "if", "import", "in", "instanceof", "never", "new", "null", "number", "object",
    "return", "string", "super", "switch", "symbol", "this", "throw", "true", "try", "typeof",
    "undefined", "unknown", "var", "void", "while", "with",
];

/// Global types the emitted code refers to; an entity may not shadow them
const BUILTINS: &[&str] = &[
    "Array", "Boolean", "Date", "Error", "Function", "Map", "Number", "Object", "Partial",
    "Promise", "Readonly", "ReadonlyArray", "Record", "RegExp", "Set", "String", "Symbol",
];

/// Resolved identifiers for every entity of a document
#[derive(Debug, Clone)]
pub struct NameResolver {
    resolved: HashMap<String, String>,
}

impl NameResolver {
    /// Resolve all entity names.
    ///
    /// Two entities mapping to the same identifier is fatal: the emitted file
    /// would not compile and the guards would shadow each other.
    pub fn resolve(doc: &SchemaDocument) -> Result<Self, EmissionError> {
        let mut resolved = HashMap::new();
        let mut owners: HashMap<String, &str> = HashMap::new();

        for name in doc.entity_names() {
            let ident = type_name(name);
            if let Some(first) = owners.get(&ident) {
                return Err(EmissionError::NameCollision {
                    first: first.to_string(),
                    second: name.to_string(),
                    identifier: ident,
                });
            }
            owners.insert(ident.clone(), name);
            resolved.insert(name.to_string(), ident);
        }

        Ok(Self { resolved })
    }

    /// TypeScript type name for an entity (falls back to re-casing unknown names)
    pub fn type_name(&self, entity: &str) -> String {
        self.resolved
            .get(entity)
            .cloned()
            .unwrap_or_else(|| type_name(entity))
    }

    /// Guard function name, e.g. `isForecastResponse`
    pub fn guard_name(&self, entity: &str) -> String {
        format!("is{}", self.type_name(entity))
    }

    /// Constant list name for a closed union, e.g. `RISK_LEVEL_VALUES`
    pub fn values_name(&self, type_name: &str) -> String {
        format!("{}_VALUES", to_screaming_snake(type_name))
    }
}

/// Convert an arbitrary schema name into a PascalCase type identifier
pub fn type_name(raw: &str) -> String {
    let mut name = if is_pascal_identifier(raw) {
        raw.to_string()
    } else {
        to_pascal_case(raw)
    };
    if name.is_empty() {
        name.push_str("Unnamed");
    }
    if name.starts_with(|c: char| c.is_ascii_digit()) {
        name.insert(0, '_');
    }
    if RESERVED.contains(&name.as_str()) || BUILTINS.contains(&name.as_str()) {
        name.push('_');
    }
    name
}

/// Synthesized name for an inline enum on a field, e.g. `ForecastResponseRiskLevel`
pub fn inline_enum_name(entity_type: &str, field: &str) -> String {
    format!("{}{}", entity_type, to_pascal_case(field))
}

/// `risk_level`, `risk-level`, `riskLevel` -> `RiskLevel`
pub fn to_pascal_case(raw: &str) -> String {
    raw.split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_ascii_uppercase().to_string() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect()
}

/// `ForecastResponseRiskLevel` -> `FORECAST_RESPONSE_RISK_LEVEL`
pub fn to_screaming_snake(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len() + 8);
    let chars: Vec<char> = raw.chars().collect();
    for (i, &c) in chars.iter().enumerate() {
        if !c.is_ascii_alphanumeric() {
            if !out.ends_with('_') && !out.is_empty() {
                out.push('_');
            }
            continue;
        }
        if c.is_ascii_uppercase() && i > 0 {
            let prev = chars[i - 1];
            let next_is_lower = chars.get(i + 1).is_some_and(|n| n.is_ascii_lowercase());
            if (prev.is_ascii_lowercase() || prev.is_ascii_digit() || (prev.is_ascii_uppercase() && next_is_lower))
                && !out.ends_with('_')
            {
                out.push('_');
            }
        }
        out.push(c.to_ascii_uppercase());
    }
    out.trim_end_matches('_').to_string()
}

/// Property key as it must appear in an interface or a property access
pub fn property_key(name: &str) -> String {
    if is_identifier(name) {
        name.to_string()
    } else {
        string_literal(name)
    }
}

/// Property access expression on `base`
pub fn property_access(base: &str, name: &str) -> String {
    if is_identifier(name) {
        format!("{}.{}", base, name)
    } else {
        format!("{}[{}]", base, string_literal(name))
    }
}

/// Double-quoted TypeScript string literal
pub fn string_literal(value: &str) -> String {
    // JSON string escaping is valid TypeScript string escaping
    serde_json::Value::String(value.to_string()).to_string()
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

fn is_pascal_identifier(name: &str) -> bool {
    name.starts_with(|c: char| c.is_ascii_uppercase())
        && name.chars().all(|c| c.is_ascii_alphanumeric())
}
