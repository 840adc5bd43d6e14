//! Protobuf schema parsing.
//!
//! A line-oriented reader builds a `FileDescriptorProto` for the top-level
//! messages and enums of a `.proto` file and loads it into a
//! `prost_reflect::DescriptorPool`, which rejects duplicate field numbers,
//! unresolved types and similar structural errors. Nested declarations,
//! `oneof` and `map` fields are not descended into.

use prost_reflect::DescriptorPool;
use prost_types::field_descriptor_proto::{Label, Type};
use prost_types::{
    DescriptorProto, EnumDescriptorProto, EnumValueDescriptorProto, FieldDescriptorProto,
    FileDescriptorProto,
};
use std::collections::HashSet;

/// Validate `.proto` content and return its normalised text
pub(super) fn canonical_form(content: &str) -> Result<String, String> {
    let lines = significant_lines(content);
    if lines.is_empty() {
        return Err("Empty protobuf schema".to_string());
    }

    let file = build_file_descriptor(&lines)?;
    if file.message_type.is_empty() {
        return Err("Protobuf schema declares no message".to_string());
    }

    let mut pool = DescriptorPool::new();
    pool.add_file_descriptor_proto(file)
        .map_err(|e| format!("Invalid protobuf schema: {}", e))?;

    Ok(lines.join("\n"))
}

/// Trimmed lines with comments and blank lines removed
fn significant_lines(content: &str) -> Vec<String> {
    content
        .lines()
        .map(|line| match line.find("//") {
            Some(pos) => &line[..pos],
            None => line,
        })
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

fn build_file_descriptor(lines: &[String]) -> Result<FileDescriptorProto, String> {
    let syntax = if lines.iter().any(|l| l.contains("\"proto2\"")) {
        "proto2"
    } else {
        "proto3"
    };
    let package = lines
        .iter()
        .find_map(|l| l.strip_prefix("package "))
        .map(|p| p.trim_end_matches(';').trim().to_string());

    let declared = declared_type_names(lines);
    let qualify = |name: &str| match &package {
        Some(pkg) => format!(".{}.{}", pkg, name),
        None => format!(".{}", name),
    };

    let mut messages = Vec::new();
    let mut enums = Vec::new();
    let mut depth = 0usize;
    let mut current_message: Option<DescriptorProto> = None;
    let mut current_enum: Option<EnumDescriptorProto> = None;

    for line in lines {
        if line.ends_with('{') {
            if depth == 0 {
                if let Some(name) = block_name(line, "message ") {
                    current_message = Some(DescriptorProto {
                        name: Some(name),
                        ..Default::default()
                    });
                } else if let Some(name) = block_name(line, "enum ") {
                    current_enum = Some(EnumDescriptorProto {
                        name: Some(name),
                        ..Default::default()
                    });
                }
            }
            depth += 1;
            continue;
        }

        if line.starts_with('}') {
            depth = depth
                .checked_sub(1)
                .ok_or_else(|| "Unbalanced braces in protobuf schema".to_string())?;
            if depth == 0 {
                messages.extend(current_message.take());
                enums.extend(current_enum.take());
            }
            continue;
        }

        if depth != 1 {
            continue;
        }

        if let Some(message) = current_message.as_mut() {
            if let Some(field) = parse_field(line, &declared, &qualify)? {
                message.field.push(field);
            }
        } else if let Some(enumeration) = current_enum.as_mut() {
            if let Some(value) = parse_enum_value(line)? {
                enumeration.value.push(value);
            }
        }
    }

    if depth != 0 {
        return Err("Unbalanced braces in protobuf schema".to_string());
    }

    Ok(FileDescriptorProto {
        name: Some("schema.proto".to_string()),
        syntax: Some(syntax.to_string()),
        package,
        message_type: messages,
        enum_type: enums,
        ..Default::default()
    })
}

fn block_name(line: &str, keyword: &str) -> Option<String> {
    line.strip_prefix(keyword)
        .and_then(|s| s.strip_suffix('{'))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Top-level message and enum names, each tagged with its kind
fn declared_type_names(lines: &[String]) -> HashSet<(String, bool)> {
    let mut names = HashSet::new();
    let mut depth = 0usize;
    for line in lines {
        if line.ends_with('{') {
            if depth == 0 {
                if let Some(name) = block_name(line, "message ") {
                    names.insert((name, true));
                } else if let Some(name) = block_name(line, "enum ") {
                    names.insert((name, false));
                }
            }
            depth += 1;
        } else if line.starts_with('}') {
            depth = depth.saturating_sub(1);
        }
    }
    names
}

fn parse_field(
    line: &str,
    declared: &HashSet<(String, bool)>,
    qualify: &dyn Fn(&str) -> String,
) -> Result<Option<FieldDescriptorProto>, String> {
    let line = line.trim_end_matches(';');
    if ["reserved", "option", "map<", "extensions"]
        .iter()
        .any(|p| line.starts_with(p))
    {
        return Ok(None);
    }

    let parts: Vec<&str> = line.split_whitespace().collect();
    let (label, rest) = match parts.first() {
        Some(&"repeated") => (Label::Repeated, &parts[1..]),
        Some(&"optional") => (Label::Optional, &parts[1..]),
        Some(&"required") => (Label::Required, &parts[1..]),
        _ => (Label::Optional, &parts[..]),
    };

    // type name = number [options]
    let [type_str, name, "=", number, ..] = rest else {
        return Err(format!("Invalid field definition: '{}'", line));
    };
    let number: i32 = number
        .parse()
        .map_err(|_| format!("Invalid field number in '{}'", line))?;

    let mut field = FieldDescriptorProto {
        name: Some(name.to_string()),
        number: Some(number),
        label: Some(label as i32),
        ..Default::default()
    };

    match scalar_type(type_str) {
        Some(t) => field.r#type = Some(t as i32),
        None => {
            let kind = if declared.contains(&(type_str.to_string(), true)) {
                Type::Message
            } else if declared.contains(&(type_str.to_string(), false)) {
                Type::Enum
            } else {
                return Err(format!("Unresolved type '{}' in field '{}'", type_str, name));
            };
            field.r#type = Some(kind as i32);
            field.type_name = Some(qualify(type_str));
        }
    }

    Ok(Some(field))
}

fn parse_enum_value(line: &str) -> Result<Option<EnumValueDescriptorProto>, String> {
    let line = line.trim_end_matches(';');
    if line.starts_with("option") || line.starts_with("reserved") {
        return Ok(None);
    }
    let parts: Vec<&str> = line.split_whitespace().collect();
    let [name, "=", number, ..] = parts.as_slice() else {
        return Err(format!("Invalid enum value: '{}'", line));
    };
    let number: i32 = number
        .parse()
        .map_err(|_| format!("Invalid enum number in '{}'", line))?;
    Ok(Some(EnumValueDescriptorProto {
        name: Some(name.to_string()),
        number: Some(number),
        ..Default::default()
    }))
}

fn scalar_type(type_str: &str) -> Option<Type> {
    match type_str {
        "double" => Some(Type::Double),
        "float" => Some(Type::Float),
        "int64" => Some(Type::Int64),
        "uint64" => Some(Type::Uint64),
        "int32" => Some(Type::Int32),
        "fixed64" => Some(Type::Fixed64),
        "fixed32" => Some(Type::Fixed32),
        "bool" => Some(Type::Bool),
        "string" => Some(Type::String),
        "bytes" => Some(Type::Bytes),
        "uint32" => Some(Type::Uint32),
        "sfixed32" => Some(Type::Sfixed32),
        "sfixed64" => Some(Type::Sfixed64),
        "sint32" => Some(Type::Sint32),
        "sint64" => Some(Type::Sint64),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ORDER_PROTO: &str = r#"
        syntax = "proto3";
        package shop.orders;

        // An order
        message Order {
            int64 id = 1;
            string customer = 2;
            repeated Line lines = 3;
            Status status = 4;
        }

        message Line {
            string sku = 1;
            uint32 quantity = 2;
        }

        enum Status {
            UNKNOWN = 0;
            PLACED = 1;
        }
    "#;

    #[test]
    fn test_parse_valid_proto() {
        let canonical = canonical_form(ORDER_PROTO).unwrap();
        assert!(canonical.starts_with("syntax = \"proto3\";"));
        assert!(!canonical.contains("An order"));
    }

    #[test]
    fn test_reject_duplicate_field_numbers() {
        let proto = r#"
            syntax = "proto3";
            message Order {
                int64 id = 1;
                string customer = 1;
            }
        "#;
        assert!(canonical_form(proto).is_err());
    }

    #[test]
    fn test_reject_unresolved_type() {
        let proto = r#"
            syntax = "proto3";
            message Order {
                Missing thing = 1;
            }
        "#;
        let err = canonical_form(proto).unwrap_err();
        assert!(err.contains("Missing"));
    }

    #[test]
    fn test_reject_empty_and_unbalanced() {
        assert!(canonical_form("   \n // nothing\n").is_err());
        assert!(canonical_form("message Order {\n int64 id = 1;\n").is_err());
        assert!(canonical_form("syntax = \"proto3\";").is_err());
    }
}
