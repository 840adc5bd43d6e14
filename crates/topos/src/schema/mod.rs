//! Schema formats and compatibility modes
//!
//! Local schema files are parsed before anything is sent to the registry.
//! Parsing dispatches on [`SchemaType`], one case per format:
//!
//! | Type | Extension | Parser |
//! |------|-----------|--------|
//! | `avro` | `.avsc` | `apache_avro::Schema::parse_str` |
//! | `json` | `.json` | `serde_json`, must be an object |
//! | `protobuf` | `.proto` | descriptor pool via `prost-reflect` |

mod compatibility;
mod protobuf;

pub use compatibility::{CompatibilityChecker, CompatibilityResult};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Schema format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SchemaType {
    #[default]
    #[serde(alias = "AVRO")]
    Avro,

    #[serde(alias = "PROTOBUF")]
    Protobuf,

    #[serde(alias = "JSON")]
    Json,
}

impl SchemaType {
    /// Registry wire name (`AVRO`, `PROTOBUF`, `JSON`)
    pub fn as_str(&self) -> &'static str {
        match self {
            SchemaType::Avro => "AVRO",
            SchemaType::Protobuf => "PROTOBUF",
            SchemaType::Json => "JSON",
        }
    }

    /// Local file extension
    pub fn extension(&self) -> &'static str {
        match self {
            SchemaType::Avro => "avsc",
            SchemaType::Protobuf => "proto",
            SchemaType::Json => "json",
        }
    }
}

impl fmt::Display for SchemaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SchemaType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "AVRO" => Ok(SchemaType::Avro),
            "JSON" | "JSONSCHEMA" | "JSON_SCHEMA" => Ok(SchemaType::Json),
            "PROTOBUF" | "PROTO" => Ok(SchemaType::Protobuf),
            _ => Err(format!("Unknown schema type: {}", s)),
        }
    }
}

/// Registry compatibility level for a subject
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CompatibilityMode {
    /// New schema can read data written by the previous one
    #[default]
    Backward,
    BackwardTransitive,
    Forward,
    ForwardTransitive,
    Full,
    FullTransitive,
    None,
}

impl CompatibilityMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Backward => "BACKWARD",
            Self::BackwardTransitive => "BACKWARD_TRANSITIVE",
            Self::Forward => "FORWARD",
            Self::ForwardTransitive => "FORWARD_TRANSITIVE",
            Self::Full => "FULL",
            Self::FullTransitive => "FULL_TRANSITIVE",
            Self::None => "NONE",
        }
    }

    /// New schema must read data written with the old one
    pub fn is_backward(&self) -> bool {
        matches!(
            self,
            Self::Backward | Self::BackwardTransitive | Self::Full | Self::FullTransitive
        )
    }

    /// Old schema must read data written with the new one
    pub fn is_forward(&self) -> bool {
        matches!(
            self,
            Self::Forward | Self::ForwardTransitive | Self::Full | Self::FullTransitive
        )
    }

    /// Checked against every registered version rather than the latest
    pub fn is_transitive(&self) -> bool {
        matches!(
            self,
            Self::BackwardTransitive | Self::ForwardTransitive | Self::FullTransitive
        )
    }
}

impl fmt::Display for CompatibilityMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CompatibilityMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "BACKWARD" => Ok(Self::Backward),
            "BACKWARD_TRANSITIVE" => Ok(Self::BackwardTransitive),
            "FORWARD" => Ok(Self::Forward),
            "FORWARD_TRANSITIVE" => Ok(Self::ForwardTransitive),
            "FULL" => Ok(Self::Full),
            "FULL_TRANSITIVE" => Ok(Self::FullTransitive),
            "NONE" => Ok(Self::None),
            _ => Err(format!("Unknown compatibility level: {}", s)),
        }
    }
}

/// A schema that parsed under its declared type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedSchema {
    pub schema_type: SchemaType,
    /// Content as read from disk; this is what gets registered
    pub raw: String,
    /// Normalised form used to detect identical versions
    pub canonical: String,
}

/// Parse schema content under its declared type
pub fn parse_schema(schema_type: SchemaType, content: &str) -> Result<ParsedSchema, String> {
    let canonical = match schema_type {
        SchemaType::Avro => apache_avro::Schema::parse_str(content)
            .map_err(|e| format!("Invalid Avro schema: {}", e))?
            .canonical_form(),
        SchemaType::Json => {
            let value: serde_json::Value =
                serde_json::from_str(content).map_err(|e| format!("Invalid JSON: {}", e))?;
            if !value.is_object() {
                return Err("JSON schema must be an object".to_string());
            }
            serde_json::to_string(&value).map_err(|e| e.to_string())?
        }
        SchemaType::Protobuf => protobuf::canonical_form(content)?,
    };

    Ok(ParsedSchema {
        schema_type,
        raw: content.to_string(),
        canonical,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_type_parse() {
        assert_eq!("avro".parse::<SchemaType>().unwrap(), SchemaType::Avro);
        assert_eq!("PROTO".parse::<SchemaType>().unwrap(), SchemaType::Protobuf);
        assert_eq!("json".parse::<SchemaType>().unwrap(), SchemaType::Json);
        assert!("xml".parse::<SchemaType>().is_err());
        assert_eq!(SchemaType::Protobuf.extension(), "proto");
    }

    #[test]
    fn test_compatibility_mode_serde() {
        let mode: CompatibilityMode = serde_yaml::from_str("BACKWARD_TRANSITIVE").unwrap();
        assert_eq!(mode, CompatibilityMode::BackwardTransitive);
        assert_eq!(mode.to_string(), "BACKWARD_TRANSITIVE");
        assert_eq!(
            "full".parse::<CompatibilityMode>().unwrap(),
            CompatibilityMode::Full
        );
    }

    #[test]
    fn test_parse_avro() {
        let schema = r#"{"type": "record", "name": "Order", "fields": [{"name": "id", "type": "long"}]}"#;
        let parsed = parse_schema(SchemaType::Avro, schema).unwrap();
        assert!(parsed.canonical.contains("Order"));

        let spaced = r#"{ "type" : "record", "name" : "Order",
            "fields" : [ { "name" : "id", "type" : "long" } ] }"#;
        let reparsed = parse_schema(SchemaType::Avro, spaced).unwrap();
        assert_eq!(parsed.canonical, reparsed.canonical);

        assert!(parse_schema(SchemaType::Avro, r#"{"type": "recordz"}"#).is_err());
    }

    #[test]
    fn test_parse_json() {
        assert!(parse_schema(SchemaType::Json, r#"{"type": "object"}"#).is_ok());
        assert!(parse_schema(SchemaType::Json, "[1, 2]").is_err());
        assert!(parse_schema(SchemaType::Json, "not json").is_err());
    }
}
