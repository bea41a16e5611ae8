//! TypeScript Emitter
//!
//! Lowers schema types into TypeScript type expressions plus the runtime
//! check each guard performs, then renders declarations and guards.
//!
//! Key constraints:
//! - Output depends only on the document (no clocks, no hash-map order)
//! - Guards return `false` on mismatch and never throw

use std::collections::HashSet;
use std::fmt::Write as _;

use crate::diagnostics::{codes, Location, Severity, Stage, ValidationDiagnostic};
use crate::error::EmissionError;
use crate::schema::{EntityDef, EntityKind, FieldDef, JsonCategory, TypeRef};

use super::names::{self, NameResolver};
use super::CodegenContext;

// =============================================================================
// Lowered representation
// =============================================================================

/// Runtime check a guard performs for one value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Check {
    /// Only presence is verified
    Present,
    Category(JsonCategory),
    /// String contained in the named `*_VALUES` list
    OneOf(String),
    Nullable(Box<Check>),
}

/// A type lowered to TypeScript
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lowered {
    pub ts: String,
    pub check: Check,
}

impl Lowered {
    fn new(ts: impl Into<String>, check: Check) -> Self {
        Self { ts: ts.into(), check }
    }

    fn unknown() -> Self {
        Self::new("unknown", Check::Present)
    }

    fn permissive(category: Option<JsonCategory>) -> Self {
        match category {
            Some(JsonCategory::String) => Self::new("string", Check::Category(JsonCategory::String)),
            Some(JsonCategory::Number) => Self::new("number", Check::Category(JsonCategory::Number)),
            Some(JsonCategory::Boolean) => Self::new("boolean", Check::Category(JsonCategory::Boolean)),
            Some(JsonCategory::Object) => {
                Self::new("Record<string, unknown>", Check::Category(JsonCategory::Object))
            }
            Some(JsonCategory::Array) => Self::new("unknown[]", Check::Category(JsonCategory::Array)),
            Some(JsonCategory::Null) => Self::new("null", Check::Category(JsonCategory::Null)),
            None => Self::unknown(),
        }
    }
}

/// A closed string union found while lowering
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumSet {
    pub type_name: String,
    pub values: Vec<String>,
}

/// Rendered output for one entity
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityCode {
    pub declarations: String,
    pub utilities: String,
    /// Type names the utilities file must import
    pub imports: Vec<String>,
}

// =============================================================================
// Entity emission
// =============================================================================

/// Lower and render a single entity. Warnings are pushed for degraded constructs.
///
/// `taken` holds every exported identifier so far; synthesized enum names
/// are added to it so no two entities export the same name.
pub fn emit_entity(
    entity: &EntityDef,
    ctx: &CodegenContext<'_>,
    taken: &mut HashSet<String>,
    warnings: &mut Vec<ValidationDiagnostic>,
) -> Result<EntityCode, EmissionError> {
    let type_name = ctx.names.type_name(&entity.name);
    let mut lowerer = Lowerer {
        ctx,
        entity,
        enums: Vec::new(),
        taken,
        warnings,
    };

    let mut code = EntityCode::default();
    match &entity.kind {
        EntityKind::Enum { values } => {
            let set = EnumSet {
                type_name: type_name.clone(),
                values: values.clone(),
            };
            push_doc(&mut code.declarations, entity.description.as_deref(), "");
            render_enum_type(&mut code.declarations, &set);
            render_values(&mut code.utilities, &set, ctx.names);
            render_enum_guard(&mut code.utilities, &set, ctx.names);
            code.imports.push(type_name);
        }
        EntityKind::Alias { target } => {
            let lowered = lowerer.lower(target, None, &type_name)?;
            render_enum_sets(&mut code, &lowerer.enums, ctx.names);
            push_doc(&mut code.declarations, entity.description.as_deref(), "");
            let _ = writeln!(code.declarations, "export type {} = {};\n", type_name, lowered.ts);
            render_alias_guard(&mut code.utilities, &type_name, &lowered.check, ctx.names);
            code.imports.push(type_name);
        }
        EntityKind::Object { fields } => {
            let mut lowered_fields = Vec::with_capacity(fields.len());
            for field in fields {
                let hint = names::inline_enum_name(&type_name, &field.name);
                let lowered = lowerer.lower(&field.ty, Some(&field.name), &hint)?;
                lowered_fields.push((field, lowered));
            }
            render_enum_sets(&mut code, &lowerer.enums, ctx.names);
            push_doc(&mut code.declarations, entity.description.as_deref(), "");
            render_interface(&mut code.declarations, &type_name, &lowered_fields);
            render_object_guard(&mut code.utilities, &type_name, &lowered_fields, ctx.names);
            code.imports.push(type_name);
        }
    }

    Ok(code)
}

struct Lowerer<'a, 'b> {
    ctx: &'a CodegenContext<'a>,
    entity: &'a EntityDef,
    enums: Vec<EnumSet>,
    taken: &'b mut HashSet<String>,
    warnings: &'b mut Vec<ValidationDiagnostic>,
}

impl Lowerer<'_, '_> {
    fn lower(&mut self, ty: &TypeRef, field: Option<&str>, hint: &str) -> Result<Lowered, EmissionError> {
        Ok(match ty {
            TypeRef::String => Lowered::new("string", Check::Category(JsonCategory::String)),
            TypeRef::Number | TypeRef::Integer => {
                Lowered::new("number", Check::Category(JsonCategory::Number))
            }
            TypeRef::Boolean => Lowered::new("boolean", Check::Category(JsonCategory::Boolean)),
            TypeRef::Null => Lowered::new("null", Check::Category(JsonCategory::Null)),
            TypeRef::Any => Lowered::unknown(),
            TypeRef::Object => Lowered::permissive(Some(JsonCategory::Object)),
            TypeRef::Array(inner) => {
                let inner = self.lower(inner, field, &format!("{}Item", hint))?;
                Lowered::new(format!("Array<{}>", inner.ts), Check::Category(JsonCategory::Array))
            }
            TypeRef::Map(inner) => {
                let inner = self.lower(inner, field, &format!("{}Value", hint))?;
                Lowered::new(
                    format!("Record<string, {}>", inner.ts),
                    Check::Category(JsonCategory::Object),
                )
            }
            TypeRef::Nullable(inner) => {
                let inner = self.lower(inner, field, hint)?;
                let check = match inner.check {
                    Check::Present => Check::Present,
                    other => Check::Nullable(Box::new(other)),
                };
                Lowered::new(format!("{} | null", inner.ts), check)
            }
            TypeRef::InlineEnum(values) => {
                let type_name = self.unique_enum_name(hint);
                let values_name = self.ctx.names.values_name(&type_name);
                self.taken.insert(type_name.clone());
                self.taken.insert(values_name.clone());
                self.enums.push(EnumSet {
                    type_name: type_name.clone(),
                    values: values.clone(),
                });
                Lowered::new(type_name, Check::OneOf(values_name))
            }
            TypeRef::Union { members, discriminator } => match discriminator {
                Some(_) if !members.is_empty() => {
                    let mut parts = Vec::with_capacity(members.len());
                    for (i, m) in members.iter().enumerate() {
                        parts.push(self.lower(m, field, &format!("{}Option{}", hint, i + 1))?.ts);
                    }
                    Lowered::new(parts.join(" | "), Check::Category(JsonCategory::Object))
                }
                _ => {
                    self.degrade(
                        codes::EMIT_DEGRADED_UNION,
                        field,
                        "undiscriminated union emitted as 'unknown'".to_string(),
                    );
                    Lowered::unknown()
                }
            },
            TypeRef::Unsupported { reason, category } => {
                self.degrade(
                    codes::EMIT_DEGRADED_UNSUPPORTED,
                    field,
                    format!("unsupported construct ({}) emitted permissively", reason),
                );
                Lowered::permissive(*category)
            }
            TypeRef::Ref { target, fallback } => self.lower_ref(target, fallback.as_deref(), field, hint)?,
        })
    }

    fn lower_ref(
        &mut self,
        target: &str,
        fallback: Option<&TypeRef>,
        field: Option<&str>,
        hint: &str,
    ) -> Result<Lowered, EmissionError> {
        let doc = self.ctx.doc;
        let Some(target_def) = doc.entity(target) else {
            return match fallback {
                Some(fallback) => {
                    self.degrade(
                        codes::EMIT_DEGRADED_FALLBACK,
                        field,
                        format!("reference to undefined entity '{}' replaced by its declared type", target),
                    );
                    self.lower(fallback, field, hint)
                }
                None => Err(match field {
                    Some(field) => EmissionError::UnresolvedReference {
                        entity: self.entity.name.clone(),
                        field: field.to_string(),
                        target: target.to_string(),
                    },
                    None => EmissionError::UnresolvedAlias {
                        entity: self.entity.name.clone(),
                        target: target.to_string(),
                    },
                }),
            };
        };

        let category = doc.category_of(&TypeRef::Ref {
            target: target.to_string(),
            fallback: None,
        });

        if self.ctx.cycles.is_indirect(&self.entity.name, target) {
            self.degrade(
                codes::EMIT_DEGRADED_RECURSION,
                field,
                format!("recursive reference to '{}' through another entity emitted permissively", target),
            );
            return Ok(Lowered::permissive(category));
        }

        let type_name = self.ctx.names.type_name(target);
        let check = match &target_def.kind {
            EntityKind::Enum { .. } => Check::OneOf(self.ctx.names.values_name(&type_name)),
            _ => match category {
                Some(c) => Check::Category(c),
                None => Check::Present,
            },
        };
        Ok(Lowered::new(type_name, check))
    }

    fn unique_enum_name(&self, hint: &str) -> String {
        let taken = |name: &str| {
            self.taken.contains(name)
                || self.taken.contains(&self.ctx.names.values_name(name))
                || self.ctx.doc.contains(name)
        };
        if !taken(hint) {
            return hint.to_string();
        }
        let mut n = 2;
        loop {
            let candidate = format!("{}{}", hint, n);
            if !taken(&candidate) {
                return candidate;
            }
            n += 1;
        }
    }

    fn degrade(&mut self, code: &str, field: Option<&str>, message: String) {
        let subject = match field {
            Some(f) => format!("{}.{}", self.entity.name, f),
            None => self.entity.name.clone(),
        };
        self.warnings.push(
            ValidationDiagnostic::new(
                Stage::Emitting,
                Severity::Medium,
                code,
                format!("{}: {}", subject, message),
            )
            .with_location(Location::file(self.ctx.options.types_file.clone())),
        );
    }
}

// =============================================================================
// Rendering
// =============================================================================

fn push_doc(out: &mut String, description: Option<&str>, indent: &str) {
    let Some(text) = description.map(str::trim).filter(|d| !d.is_empty()) else {
        return;
    };
    let text = text.replace("*/", "*\\/");
    let lines: Vec<&str> = text.lines().collect();
    if lines.len() == 1 {
        let _ = writeln!(out, "{}/** {} */", indent, lines[0]);
    } else {
        let _ = writeln!(out, "{}/**", indent);
        for line in lines {
            let _ = writeln!(out, "{} * {}", indent, line.trim_end());
        }
        let _ = writeln!(out, "{} */", indent);
    }
}

fn render_enum_sets(code: &mut EntityCode, sets: &[EnumSet], names: &NameResolver) {
    for set in sets {
        render_enum_type(&mut code.declarations, set);
        render_values(&mut code.utilities, set, names);
        code.imports.push(set.type_name.clone());
    }
}

fn render_enum_type(out: &mut String, set: &EnumSet) {
    let members: Vec<String> = set.values.iter().map(|v| names::string_literal(v)).collect();
    let _ = writeln!(out, "export type {} = {};\n", set.type_name, members.join(" | "));
}

fn render_values(out: &mut String, set: &EnumSet, names: &NameResolver) {
    let members: Vec<String> = set.values.iter().map(|v| names::string_literal(v)).collect();
    let _ = writeln!(
        out,
        "export const {}: readonly {}[] = [{}];\n",
        names.values_name(&set.type_name),
        set.type_name,
        members.join(", ")
    );
}

fn render_interface(out: &mut String, type_name: &str, fields: &[(&FieldDef, Lowered)]) {
    if fields.is_empty() {
        let _ = writeln!(out, "export interface {} {{}}\n", type_name);
        return;
    }
    let _ = writeln!(out, "export interface {} {{", type_name);
    for (field, lowered) in fields {
        push_doc(out, field.description.as_deref(), "  ");
        let _ = writeln!(
            out,
            "  {}{}: {};",
            names::property_key(&field.name),
            if field.required { "" } else { "?" },
            lowered.ts
        );
    }
    out.push_str("}\n\n");
}

fn render_enum_guard(out: &mut String, set: &EnumSet, names: &NameResolver) {
    let expr = check_expr(&Check::OneOf(names.values_name(&set.type_name)), "value");
    let _ = writeln!(
        out,
        "export function is{}(value: unknown): value is {} {{\n  return {};\n}}\n",
        set.type_name, set.type_name, expr
    );
}

fn render_alias_guard(out: &mut String, type_name: &str, check: &Check, names: &NameResolver) {
    let expr = match check {
        Check::Present => "value !== undefined".to_string(),
        other => check_expr(other, "value"),
    };
    let _ = writeln!(
        out,
        "export function {}(value: unknown): value is {} {{\n  return {};\n}}\n",
        names.guard_name(type_name),
        type_name,
        expr
    );
}

fn render_object_guard(out: &mut String, type_name: &str, fields: &[(&FieldDef, Lowered)], names: &NameResolver) {
    let _ = writeln!(
        out,
        "export function {}(value: unknown): value is {} {{",
        names.guard_name(type_name),
        type_name
    );
    out.push_str("  if (typeof value !== \"object\" || value === null || Array.isArray(value)) {\n");
    out.push_str("    return false;\n  }\n");

    let required: Vec<_> = fields.iter().filter(|(f, _)| f.required).collect();
    if !required.is_empty() {
        out.push_str("  const v = value as Record<string, unknown>;\n");
    }
    for (field, lowered) in required {
        let expr = match &lowered.check {
            Check::Present => format!("{} in v", names::string_literal(&field.name)),
            other => check_expr(other, &names::property_access("v", &field.name)),
        };
        let _ = writeln!(out, "  if (!({})) {{\n    return false;\n  }}", expr);
    }
    out.push_str("  return true;\n}\n\n");
}

/// Boolean TypeScript expression that holds when `subject` passes `check`
pub fn check_expr(check: &Check, subject: &str) -> String {
    match check {
        Check::Present => format!("{} !== undefined", subject),
        Check::Category(category) => match category {
            JsonCategory::String => format!("typeof {} === \"string\"", subject),
            JsonCategory::Number => format!("typeof {} === \"number\"", subject),
            JsonCategory::Boolean => format!("typeof {} === \"boolean\"", subject),
            JsonCategory::Object => format!(
                "typeof {s} === \"object\" && {s} !== null && !Array.isArray({s})",
                s = subject
            ),
            JsonCategory::Array => format!("Array.isArray({})", subject),
            JsonCategory::Null => format!("{} === null", subject),
        },
        Check::OneOf(values) => format!(
            "typeof {s} === \"string\" && ({values} as readonly string[]).indexOf({s}) !== -1",
            s = subject,
            values = values
        ),
        Check::Nullable(inner) => format!("{} === null || ({})", subject, check_expr(inner, subject)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_expressions() {
        assert_eq!(
            check_expr(&Check::Category(JsonCategory::String), "v.horizon"),
            "typeof v.horizon === \"string\""
        );
        assert_eq!(
            check_expr(&Check::OneOf("RISK_VALUES".into()), "v.risk"),
            "typeof v.risk === \"string\" && (RISK_VALUES as readonly string[]).indexOf(v.risk) !== -1"
        );
        assert_eq!(
            check_expr(&Check::Nullable(Box::new(Check::Category(JsonCategory::Array))), "v.xs"),
            "v.xs === null || (Array.isArray(v.xs))"
        );
    }

    #[test]
    fn test_doc_comments() {
        let mut out = String::new();
        push_doc(&mut out, Some("Forecast horizon"), "  ");
        assert_eq!(out, "  /** Forecast horizon */\n");

        let mut out = String::new();
        push_doc(&mut out, Some("line one\nline two */ sneaky"), "");
        assert!(out.contains(" * line two *\\/ sneaky"));
    }
}
