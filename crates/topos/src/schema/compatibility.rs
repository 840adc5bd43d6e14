//! Schema evolution checks
//!
//! Used by the in-memory registry to answer compatibility questions the way
//! a Confluent-compatible registry would. Avro follows the reader/writer
//! resolution rules, JSON Schema compares `required` and property types.
//! Protobuf evolution is left to the registry and always passes here.

use super::{CompatibilityMode, ParsedSchema, SchemaType};
use serde_json::Value as JsonValue;

/// Outcome of a compatibility check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompatibilityResult {
    pub is_compatible: bool,
    pub messages: Vec<String>,
}

impl CompatibilityResult {
    pub fn compatible() -> Self {
        Self {
            is_compatible: true,
            messages: Vec::new(),
        }
    }

    pub fn incompatible(messages: Vec<String>) -> Self {
        Self {
            is_compatible: false,
            messages,
        }
    }
}

/// Checks a candidate schema against registered versions under one mode
pub struct CompatibilityChecker {
    mode: CompatibilityMode,
}

impl CompatibilityChecker {
    pub fn new(mode: CompatibilityMode) -> Self {
        Self { mode }
    }

    /// `existing` is ordered oldest first
    pub fn check(&self, new: &ParsedSchema, existing: &[ParsedSchema]) -> CompatibilityResult {
        if self.mode == CompatibilityMode::None || existing.is_empty() {
            return CompatibilityResult::compatible();
        }

        let to_check: &[ParsedSchema] = if self.mode.is_transitive() {
            existing
        } else {
            &existing[existing.len() - 1..]
        };

        let mut messages = Vec::new();
        for (i, old) in to_check.iter().enumerate() {
            if old.schema_type != new.schema_type {
                messages.push(format!(
                    "Version {}: schema type changed from {} to {}",
                    i + 1,
                    old.schema_type,
                    new.schema_type
                ));
                continue;
            }
            let pair = match new.schema_type {
                SchemaType::Avro => self.check_avro_pair(&new.raw, &old.raw),
                SchemaType::Json => self.check_json_pair(&new.raw, &old.raw),
                SchemaType::Protobuf => Vec::new(),
            };
            messages.extend(pair.into_iter().map(|m| format!("Version {}: {}", i + 1, m)));
        }

        if messages.is_empty() {
            CompatibilityResult::compatible()
        } else {
            CompatibilityResult::incompatible(messages)
        }
    }

    fn check_avro_pair(&self, new: &str, old: &str) -> Vec<String> {
        let (new, old) = match (
            apache_avro::Schema::parse_str(new),
            apache_avro::Schema::parse_str(old),
        ) {
            (Ok(new), Ok(old)) => (new, old),
            (Err(e), _) | (_, Err(e)) => return vec![format!("unparseable Avro schema: {}", e)],
        };

        let mut messages = Vec::new();
        if self.mode.is_backward() {
            if let Err(e) = avro_can_read(&old, &new) {
                messages.push(format!("BACKWARD incompatible: {}", e));
            }
        }
        if self.mode.is_forward() {
            if let Err(e) = avro_can_read(&new, &old) {
                messages.push(format!("FORWARD incompatible: {}", e));
            }
        }
        messages
    }

    fn check_json_pair(&self, new: &str, old: &str) -> Vec<String> {
        let (new, old) = match (
            serde_json::from_str::<JsonValue>(new),
            serde_json::from_str::<JsonValue>(old),
        ) {
            (Ok(new), Ok(old)) => (new, old),
            (Err(e), _) | (_, Err(e)) => return vec![format!("unparseable JSON schema: {}", e)],
        };

        let new_required = json_required(&new);
        let old_required = json_required(&old);
        let (Some(new_props), Some(old_props)) = (
            new.get("properties").and_then(|p| p.as_object()),
            old.get("properties").and_then(|p| p.as_object()),
        ) else {
            return Vec::new();
        };

        let mut messages = Vec::new();
        if self.mode.is_backward() {
            for field in &new_required {
                if !old_required.contains(field) && !old_props.contains_key(*field) {
                    messages.push(format!(
                        "BACKWARD incompatible: new required field '{}' not in old schema",
                        field
                    ));
                }
            }
            for (name, old_def) in old_props {
                if let Some(new_def) = new_props.get(name) {
                    if !json_types_compatible(old_def, new_def) {
                        messages.push(format!(
                            "BACKWARD incompatible: field '{}' type changed",
                            name
                        ));
                    }
                }
            }
        }
        if self.mode.is_forward() {
            for field in &old_required {
                if !new_props.contains_key(*field) {
                    messages.push(format!(
                        "FORWARD incompatible: required field '{}' removed",
                        field
                    ));
                }
            }
            for (name, old_def) in old_props {
                if let Some(new_def) = new_props.get(name) {
                    if !json_types_compatible(new_def, old_def) {
                        messages.push(format!(
                            "FORWARD incompatible: field '{}' type changed",
                            name
                        ));
                    }
                }
            }
        }
        messages
    }
}

/// Whether data written with `writer` resolves under `reader`
fn avro_can_read(writer: &apache_avro::Schema, reader: &apache_avro::Schema) -> Result<(), String> {
    use apache_avro::Schema;

    match (writer, reader) {
        (Schema::Int, Schema::Long | Schema::Float | Schema::Double)
        | (Schema::Long, Schema::Float | Schema::Double)
        | (Schema::Float, Schema::Double)
        | (Schema::String, Schema::Bytes)
        | (Schema::Bytes, Schema::String) => Ok(()),

        (Schema::Array(w), Schema::Array(r)) => avro_can_read(&w.items, &r.items),
        (Schema::Map(w), Schema::Map(r)) => avro_can_read(&w.types, &r.types),

        (Schema::Enum(w), Schema::Enum(r)) => match w.symbols.iter().find(|s| !r.symbols.contains(s)) {
            Some(symbol) => Err(format!("enum symbol '{}' missing from reader", symbol)),
            None => Ok(()),
        },

        (Schema::Record(w), Schema::Record(r)) => {
            for r_field in &r.fields {
                match w.fields.iter().find(|wf| wf.name == r_field.name) {
                    Some(w_field) => avro_can_read(&w_field.schema, &r_field.schema)
                        .map_err(|e| format!("field '{}': {}", r_field.name, e))?,
                    None if r_field.default.is_none() => {
                        return Err(format!(
                            "reader field '{}' has no writer field and no default",
                            r_field.name
                        ))
                    }
                    None => {}
                }
            }
            Ok(())
        }

        _ if writer.canonical_form() == reader.canonical_form() => Ok(()),
        _ => Err(format!(
            "{} cannot be read as {}",
            writer.canonical_form(),
            reader.canonical_form()
        )),
    }
}

fn json_required(schema: &JsonValue) -> Vec<&str> {
    schema
        .get("required")
        .and_then(|r| r.as_array())
        .map(|arr| arr.iter().filter_map(|v| v.as_str()).collect())
        .unwrap_or_default()
}

fn json_types_compatible(from: &JsonValue, to: &JsonValue) -> bool {
    let from = from.get("type").and_then(|t| t.as_str());
    let to = to.get("type").and_then(|t| t.as_str());
    match (from, to) {
        (Some(a), Some(b)) => a == b || (a == "integer" && b == "number"),
        (None, None) => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::parse_schema;

    fn avro(fields: &str) -> ParsedSchema {
        let raw = format!(
            r#"{{"type": "record", "name": "Order", "fields": [{}]}}"#,
            fields
        );
        parse_schema(SchemaType::Avro, &raw).unwrap()
    }

    #[test]
    fn test_none_and_empty_history_always_pass() {
        let v1 = avro(r#"{"name": "id", "type": "long"}"#);
        let v2 = avro(r#"{"name": "name", "type": "string"}"#);
        assert!(CompatibilityChecker::new(CompatibilityMode::None)
            .check(&v2, &[v1.clone()])
            .is_compatible);
        assert!(CompatibilityChecker::new(CompatibilityMode::Full)
            .check(&v2, &[])
            .is_compatible);
    }

    #[test]
    fn test_avro_backward() {
        let v1 = avro(r#"{"name": "id", "type": "long"}"#);
        let with_default = avro(
            r#"{"name": "id", "type": "long"}, {"name": "note", "type": "string", "default": ""}"#,
        );
        let without_default =
            avro(r#"{"name": "id", "type": "long"}, {"name": "note", "type": "string"}"#);

        let checker = CompatibilityChecker::new(CompatibilityMode::Backward);
        assert!(checker.check(&with_default, &[v1.clone()]).is_compatible);

        let result = checker.check(&without_default, &[v1]);
        assert!(!result.is_compatible);
        assert!(result.messages[0].contains("note"));
    }

    #[test]
    fn test_avro_promotion_and_forward() {
        let int_id = avro(r#"{"name": "id", "type": "int"}"#);
        let long_id = avro(r#"{"name": "id", "type": "long"}"#);

        assert!(CompatibilityChecker::new(CompatibilityMode::Backward)
            .check(&long_id, &[int_id.clone()])
            .is_compatible);
        assert!(!CompatibilityChecker::new(CompatibilityMode::Forward)
            .check(&long_id, &[int_id])
            .is_compatible);
    }

    #[test]
    fn test_transitive_checks_every_version() {
        let v1 = avro(r#"{"name": "id", "type": "long"}"#);
        let v2 = avro(r#"{"name": "id", "type": "long"}, {"name": "a", "type": "int", "default": 0}"#);
        let v3 = avro(r#"{"name": "id", "type": "long"}, {"name": "a", "type": "int"}"#);

        assert!(CompatibilityChecker::new(CompatibilityMode::Backward)
            .check(&v3, &[v1.clone(), v2.clone()])
            .is_compatible);
        assert!(!CompatibilityChecker::new(CompatibilityMode::BackwardTransitive)
            .check(&v3, &[v1, v2])
            .is_compatible);
    }

    #[test]
    fn test_json_required_fields() {
        let old = parse_schema(
            SchemaType::Json,
            r#"{"type": "object", "properties": {"id": {"type": "integer"}}, "required": ["id"]}"#,
        )
        .unwrap();
        let new = parse_schema(
            SchemaType::Json,
            r#"{"type": "object", "properties": {"id": {"type": "number"}, "sku": {"type": "string"}}, "required": ["id", "sku"]}"#,
        )
        .unwrap();

        let result = CompatibilityChecker::new(CompatibilityMode::Backward).check(&new, &[old]);
        assert!(!result.is_compatible);
        assert_eq!(result.messages.len(), 1);
        assert!(result.messages[0].contains("sku"));
    }
}
