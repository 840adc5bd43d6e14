//! Declarative topology model
//!
//! One [`Domain`] per document. The YAML shape mirrors these types with
//! camelCase keys:
//!
//! ```yaml
//! name: a.b.c
//! description: Order management
//! principal: "User:100"
//! maintainer:
//!   name: Order Team
//!   email: orders@example.com
//! visibilities:
//!   - type: public
//!     consumers:
//!       - principal: "User:200"
//!     topics:
//!       - name: orders
//!         numPartitions: 6
//!         replicationFactor: 3
//!         config:
//!           cleanupPolicy: compact
//!           minCompactionLagMs: 100
//!         consumers:
//!           - principal: "User:300"
//!             domain: x.y.z
//!         valueSchema:
//!           subject: a.b.c.public.orders-value
//!           type: avro
//!           compatibilityMode: BACKWARD
//! ```
//!
//! Field-level rules are declared with `validator`; cross-document and
//! cluster-aware rules live in [`crate::validation`].

use crate::naming::{self, SchemaRole, DOMAIN_REGEX, PRINCIPAL_REGEX, TOPIC_REGEX};
use crate::schema::{CompatibilityMode, SchemaType};
use regex::Regex;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::LazyLock;
use validator::{Validate, ValidationError};

/// Protocol config keys: dotted lower-case tokens (`min.compaction.lag.ms`)
static PROTOCOL_KEY_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9]*(\.[a-z][a-z0-9]*)*$").unwrap());

/// Maximum partitions a topic may declare
pub const MAX_PARTITIONS: i32 = 20;

/// Top-level ownership unit; one per document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct Domain {
    /// Dotted three-segment identifier, e.g. `a.b.c`
    #[validate(custom(function = "validate_domain_name"))]
    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Owner identity, `User:<numeric id>`
    #[validate(custom(function = "validate_principal"))]
    pub principal: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maintainer: Option<Maintainer>,

    #[serde(default)]
    pub visibilities: Vec<Visibility>,
}

/// Contact for a domain
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct Maintainer {
    #[validate(length(min = 1, message = "maintainer name must not be empty"))]
    pub name: String,

    #[validate(email(message = "maintainer email is not a valid address"))]
    pub email: String,
}

/// Access tier within a domain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VisibilityType {
    Public,
    Protected,
    Private,
    Test,
}

impl VisibilityType {
    pub fn as_str(&self) -> &'static str {
        match self {
            VisibilityType::Public => "public",
            VisibilityType::Protected => "protected",
            VisibilityType::Private => "private",
            VisibilityType::Test => "test",
        }
    }
}

impl fmt::Display for VisibilityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for VisibilityType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "public" => Ok(VisibilityType::Public),
            "protected" => Ok(VisibilityType::Protected),
            "private" => Ok(VisibilityType::Private),
            "test" => Ok(VisibilityType::Test),
            _ => Err(format!("Unknown visibility type: {}", s)),
        }
    }
}

/// Group of topics sharing a consumer allow-list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Visibility {
    #[serde(rename = "type")]
    pub visibility_type: VisibilityType,

    #[serde(default)]
    pub consumers: Vec<Consumer>,

    #[serde(default)]
    pub topics: Vec<Topic>,
}

impl Visibility {
    pub fn new(visibility_type: VisibilityType) -> Self {
        Self {
            visibility_type,
            consumers: Vec::new(),
            topics: Vec::new(),
        }
    }

    /// `<domain>.<type>`
    pub fn full_name(&self, domain: &str) -> String {
        naming::visibility_full_name(domain, self.visibility_type)
    }

    /// `<domain>.<type>.`
    pub fn resource_name(&self, domain: &str) -> String {
        naming::visibility_resource_name(domain, self.visibility_type)
    }

    pub fn consumer_principals(&self) -> BTreeSet<&str> {
        self.consumers.iter().map(|c| c.principal.as_str()).collect()
    }
}

/// A principal allowed to read from a visibility or topic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct Consumer {
    #[validate(custom(function = "validate_principal"))]
    pub principal: String,

    /// Free-form label
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Domain whose principal this consumer refers to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
}

impl Consumer {
    pub fn new(principal: impl Into<String>) -> Self {
        Self {
            principal: principal.into(),
            name: None,
            domain: None,
        }
    }
}

/// A partitioned topic with configuration and optional schemas
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct Topic {
    #[validate(custom(function = "validate_topic_name"))]
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[validate(range(
        min = 1,
        max = MAX_PARTITIONS,
        message = "numPartitions must be between 1 and 20"
    ))]
    pub num_partitions: i32,

    #[validate(range(min = 1, message = "replicationFactor must be at least 1"))]
    pub replication_factor: i32,

    /// Config entries keyed by normalised (`cleanupPolicy`) or protocol
    /// (`cleanup.policy`) names
    #[serde(default, deserialize_with = "deserialize_config")]
    #[validate(custom(function = "validate_topic_config"))]
    pub config: BTreeMap<String, String>,

    #[serde(default)]
    pub consumers: Vec<Consumer>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_schema: Option<SchemaRef>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_schema: Option<SchemaRef>,
}

impl Topic {
    pub fn new(name: impl Into<String>, num_partitions: i32, replication_factor: i32) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            num_partitions,
            replication_factor,
            config: BTreeMap::new(),
            consumers: Vec::new(),
            key_schema: None,
            value_schema: None,
        }
    }

    pub fn consumer_principals(&self) -> BTreeSet<&str> {
        self.consumers.iter().map(|c| c.principal.as_str()).collect()
    }

    /// Config translated to protocol keys
    pub fn protocol_config(&self) -> BTreeMap<String, String> {
        self.config
            .iter()
            .map(|(k, v)| (protocol_config_key(k), v.clone()))
            .collect()
    }

    /// Declared key and value schemas
    pub fn schemas(&self) -> impl Iterator<Item = (SchemaRole, &SchemaRef)> {
        self.key_schema
            .iter()
            .map(|s| (SchemaRole::Key, s))
            .chain(self.value_schema.iter().map(|s| (SchemaRole::Value, s)))
    }
}

/// Reference from a topic to its registry subject
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaRef {
    pub subject: String,

    #[serde(rename = "type")]
    pub schema_type: SchemaType,

    #[serde(default)]
    pub compatibility_mode: CompatibilityMode,
}

/// A topic together with the visibility and domain that own it
#[derive(Debug, Clone, Copy)]
pub struct TopicRef<'a> {
    pub domain: &'a Domain,
    pub visibility: &'a Visibility,
    pub topic: &'a Topic,
}

impl TopicRef<'_> {
    /// `<domain>.<type>.<topic>`
    pub fn full_name(&self) -> String {
        naming::topic_full_name(
            &self.domain.name,
            self.visibility.visibility_type,
            &self.topic.name,
        )
    }

    /// Subject a schema of the given role must be registered under
    pub fn subject(&self, role: SchemaRole) -> String {
        naming::subject_name(&self.full_name(), role)
    }
}

impl Domain {
    /// `<domain>.`
    pub fn resource_name(&self) -> String {
        naming::domain_resource_name(&self.name)
    }

    pub fn visibility(&self, visibility_type: VisibilityType) -> Option<&Visibility> {
        self.visibilities
            .iter()
            .find(|v| v.visibility_type == visibility_type)
    }

    /// Every topic declared in this domain
    pub fn topics(&self) -> impl Iterator<Item = TopicRef<'_>> {
        self.visibilities.iter().flat_map(move |visibility| {
            visibility.topics.iter().map(move |topic| TopicRef {
                domain: self,
                visibility,
                topic,
            })
        })
    }
}

/// Translate a config key to the protocol's dotted lower-case form.
///
/// `minCompactionLagMs` becomes `min.compaction.lag.ms`; keys that already
/// contain a dot are only lower-cased.
pub fn protocol_config_key(key: &str) -> String {
    if key.contains('.') {
        return key.to_ascii_lowercase();
    }
    let mut out = String::with_capacity(key.len() + 4);
    for (i, ch) in key.chars().enumerate() {
        if ch.is_ascii_uppercase() {
            if i > 0 {
                out.push('.');
            }
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

/// Translate a protocol config key to the normalised camelCase form
pub fn internal_config_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    let mut upper_next = false;
    for ch in key.chars() {
        if ch == '.' {
            upper_next = true;
        } else if upper_next {
            out.push(ch.to_ascii_uppercase());
            upper_next = false;
        } else {
            out.push(ch);
        }
    }
    out
}

fn deserialize_config<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = BTreeMap::<String, serde_yaml::Value>::deserialize(deserializer)?;
    raw.into_iter()
        .map(|(key, value)| {
            let value = match value {
                serde_yaml::Value::String(s) => s,
                serde_yaml::Value::Number(n) => n.to_string(),
                serde_yaml::Value::Bool(b) => b.to_string(),
                _ => {
                    return Err(D::Error::custom(format!(
                        "config value for '{}' must be a scalar",
                        key
                    )))
                }
            };
            Ok((key, value))
        })
        .collect()
}

fn validate_domain_name(name: &str) -> Result<(), ValidationError> {
    if DOMAIN_REGEX.is_match(name) {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_domain_name").with_message(
            format!(
                "'{}' must be three dot-separated lower-case segments (e.g. a.b.c)",
                name
            )
            .into(),
        ))
    }
}

fn validate_topic_name(name: &str) -> Result<(), ValidationError> {
    if TOPIC_REGEX.is_match(name) {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_topic_name").with_message(
            format!(
                "'{}' must be a lower-case token of letters, digits and underscores",
                name
            )
            .into(),
        ))
    }
}

fn validate_principal(principal: &str) -> Result<(), ValidationError> {
    if PRINCIPAL_REGEX.is_match(principal) {
        Ok(())
    } else {
        Err(ValidationError::new("invalid_principal")
            .with_message(format!("'{}' must match User:<numeric id>", principal).into()))
    }
}

fn validate_topic_config(config: &BTreeMap<String, String>) -> Result<(), ValidationError> {
    if config.len() > 50 {
        return Err(ValidationError::new("too_many_configs")
            .with_message("maximum 50 config entries allowed".into()));
    }
    for (key, value) in config {
        if value.len() > 4096 {
            return Err(ValidationError::new("config_too_long")
                .with_message(format!("value of '{}' exceeds 4096 characters", key).into()));
        }
        let protocol = protocol_config_key(key);
        if !PROTOCOL_KEY_REGEX.is_match(&protocol) {
            return Err(ValidationError::new("invalid_config_key")
                .with_message(format!("'{}' is not a valid config key", key).into()));
        }
    }
    Ok(())
}
