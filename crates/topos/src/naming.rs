//! Naming conventions for managed resources
//!
//! Every managed resource name is derived from the
//! `domain → visibility → topic` hierarchy:
//!
//! | Entity | Resource name | Example |
//! |--------|---------------|---------|
//! | Domain | `<domain>.` (prefixed) | `a.b.c.` |
//! | Visibility | `<domain>.<type>.` (prefixed) | `a.b.c.public.` |
//! | Topic | `<domain>.<type>.<topic>` (literal) | `a.b.c.public.orders` |
//! | Subject | `<topic>-key` / `<topic>-value` | `a.b.c.public.orders-value` |
//!
//! Names that do not follow the convention are not managed. Parsers return
//! `None` for them and callers skip them.

use crate::model::VisibilityType;
use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

/// Domain names: three dotted lower-case segments
pub static DOMAIN_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z]+\.[a-z]+\.[a-z]+$").unwrap());

/// Topic names (the last segment of a full topic name)
pub static TOPIC_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z][a-z0-9_]*$").unwrap());

/// Principals: `User:<numeric id>`
pub static PRINCIPAL_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^User:[0-9]+$").unwrap());

static FULL_TOPIC_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([a-z]+\.[a-z]+\.[a-z]+)\.(public|protected|private|test)\.([a-z][a-z0-9_]*)$")
        .unwrap()
});

static SUBJECT_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^([a-z]+\.[a-z]+\.[a-z]+)\.(public|protected|private|test)\.([a-z][a-z0-9_]*)-(key|value)$",
    )
    .unwrap()
});

static MANAGED_NAME_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^([a-z]+\.[a-z]+\.[a-z]+)\.(?:(?:public|protected|private|test)\.(?:[a-z][a-z0-9_]*)?)?$",
    )
    .unwrap()
});

/// Prefixed resource name of a domain (`a.b.c.`)
pub fn domain_resource_name(domain: &str) -> String {
    format!("{}.", domain)
}

/// Full name of a visibility (`a.b.c.public`)
pub fn visibility_full_name(domain: &str, visibility: VisibilityType) -> String {
    format!("{}.{}", domain, visibility)
}

/// Prefixed resource name of a visibility (`a.b.c.public.`)
pub fn visibility_resource_name(domain: &str, visibility: VisibilityType) -> String {
    format!("{}.", visibility_full_name(domain, visibility))
}

/// Full (literal) name of a topic (`a.b.c.public.orders`)
pub fn topic_full_name(domain: &str, visibility: VisibilityType, topic: &str) -> String {
    format!("{}.{}", visibility_full_name(domain, visibility), topic)
}

/// Registry subject for a topic's key or value schema
pub fn subject_name(topic_full_name: &str, role: SchemaRole) -> String {
    format!("{}-{}", topic_full_name, role)
}

/// Whether a schema describes the record key or the record value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SchemaRole {
    Key,
    Value,
}

impl SchemaRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            SchemaRole::Key => "key",
            SchemaRole::Value => "value",
        }
    }
}

impl fmt::Display for SchemaRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A managed topic name split into its hierarchy levels
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TopicPath {
    pub domain: String,
    pub visibility: VisibilityType,
    pub topic: String,
}

impl TopicPath {
    /// Parse a flat cluster topic name; `None` if the name is not managed
    pub fn parse(name: &str) -> Option<Self> {
        let caps = FULL_TOPIC_REGEX.captures(name)?;
        Some(Self {
            domain: caps[1].to_string(),
            visibility: caps[2].parse().ok()?,
            topic: caps[3].to_string(),
        })
    }

    pub fn full_name(&self) -> String {
        topic_full_name(&self.domain, self.visibility, &self.topic)
    }

    pub fn visibility_resource_name(&self) -> String {
        visibility_resource_name(&self.domain, self.visibility)
    }
}

/// A managed registry subject split into topic path and schema role
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubjectPath {
    pub topic: TopicPath,
    pub role: SchemaRole,
}

impl SubjectPath {
    /// Parse a registry subject; `None` if the subject is not managed
    pub fn parse(subject: &str) -> Option<Self> {
        let caps = SUBJECT_REGEX.captures(subject)?;
        let role = match &caps[4] {
            "key" => SchemaRole::Key,
            _ => SchemaRole::Value,
        };
        Some(Self {
            topic: TopicPath {
                domain: caps[1].to_string(),
                visibility: caps[2].parse().ok()?,
                topic: caps[3].to_string(),
            },
            role,
        })
    }
}

/// Owning domain of a resource name in one of the managed forms.
///
/// Only a domain prefix (`a.b.c.`), a visibility prefix (`a.b.c.public.`)
/// or a full topic name (`a.b.c.public.orders`) qualify. Other dotted names
/// such as `payments.ledger.events.v2` return `None`.
pub fn managed_domain(resource_name: &str) -> Option<&str> {
    MANAGED_NAME_REGEX
        .captures(resource_name)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}
