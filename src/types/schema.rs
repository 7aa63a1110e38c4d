//! Schema entity definitions.
//!
//! The declarative model served by the registry: versions, object types
//! with typed properties, directed links, governed actions. All
//! cross-references between entities are name-based and resolved through
//! the registry; definitions carry no back-pointers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Lifecycle state of a schema version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaStatus {
    /// Freshly loaded, mutable until published.
    Draft,
    /// Under review.
    Review,
    /// Published and immutable. At most one published version is active.
    Published,
    /// Superseded; kept for lookups by explicit version.
    Deprecated,
}

impl SchemaStatus {
    /// Parse status from string.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "draft" => Some(Self::Draft),
            "review" => Some(Self::Review),
            "published" => Some(Self::Published),
            "deprecated" => Some(Self::Deprecated),
            _ => None,
        }
    }
}

impl fmt::Display for SchemaStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Draft => write!(f, "draft"),
            Self::Review => write!(f, "review"),
            Self::Published => write!(f, "published"),
            Self::Deprecated => write!(f, "deprecated"),
        }
    }
}

impl Default for SchemaStatus {
    fn default() -> Self {
        Self::Draft
    }
}

/// A versioned schema with its lifecycle metadata.
///
/// Invariant: at most one version has `is_active == true` at any instant.
/// The flip happens atomically inside the store's publish transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaVersion {
    /// Store-assigned identifier.
    pub id: i64,
    /// Semantic-version string, unique across all versions.
    pub version: String,
    /// Schema namespace (e.g., "nhl.analytics").
    pub namespace: String,
    /// Free-form description.
    pub description: String,
    /// Who loaded this version.
    pub created_by: String,
    /// Lifecycle status.
    pub status: SchemaStatus,
    /// Whether this is the single active version.
    pub is_active: bool,
    /// Raw document snapshot as loaded.
    pub schema_snapshot: Option<serde_json::Value>,
    /// Changelog entries from the document metadata.
    pub changelog: Option<serde_json::Value>,
    /// Creation instant.
    pub created_at: DateTime<Utc>,
    /// Publication instant, set when the version is published.
    pub published_at: Option<DateTime<Utc>>,
}

/// Closed set of property types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropertyType {
    /// UTF-8 string.
    String,
    /// 64-bit integer.
    Integer,
    /// 64-bit float.
    Float,
    /// Boolean.
    Boolean,
    /// Calendar date.
    Date,
    /// Date with time.
    Datetime,
    /// Long-form text.
    Text,
    /// Nested object.
    Object,
    /// Homogeneous array.
    Array,
}

impl PropertyType {
    /// Parse a property type from its document spelling.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "string" => Some(Self::String),
            "integer" => Some(Self::Integer),
            "float" => Some(Self::Float),
            "boolean" => Some(Self::Boolean),
            "date" => Some(Self::Date),
            "datetime" => Some(Self::Datetime),
            "text" => Some(Self::Text),
            "object" => Some(Self::Object),
            "array" => Some(Self::Array),
            _ => None,
        }
    }

    /// All valid document spellings, for validator suggestions.
    pub fn valid_names() -> &'static [&'static str] {
        &[
            "string", "integer", "float", "boolean", "date", "datetime", "text", "object",
            "array",
        ]
    }
}

impl fmt::Display for PropertyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Boolean => "boolean",
            Self::Date => "date",
            Self::Datetime => "datetime",
            Self::Text => "text",
            Self::Object => "object",
            Self::Array => "array",
        };
        write!(f, "{s}")
    }
}

/// Typed attribute of an object type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyDef {
    /// Property name, unique within its object type.
    pub name: String,
    /// Value type.
    pub property_type: PropertyType,
    /// Whether the property is required.
    pub required: bool,
    /// Free-form description.
    pub description: String,
    /// Enumerated allowed values; non-empty when present.
    pub enum_values: Option<Vec<String>>,
    /// Default value as a document string.
    pub default_value: Option<String>,
    /// Free-form constraint map.
    pub constraints: Option<serde_json::Value>,
}

impl PropertyDef {
    /// Create a minimal property of the given type.
    pub fn new(name: impl Into<String>, property_type: PropertyType) -> Self {
        Self {
            name: name.into(),
            property_type,
            required: false,
            description: String::new(),
            enum_values: None,
            default_value: None,
            constraints: None,
        }
    }
}

/// Backend tag for an object type's resolver descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolverBackend {
    /// Relational warehouse tables.
    Bigquery,
    /// Column-oriented files under the data root.
    Parquet,
    /// External API collaborator.
    Api,
    /// Derived at query time by analytical compute.
    Computed,
}

impl ResolverBackend {
    /// Parse backend tag from its document spelling.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "bigquery" => Some(Self::Bigquery),
            "parquet" => Some(Self::Parquet),
            "api" => Some(Self::Api),
            "computed" => Some(Self::Computed),
            _ => None,
        }
    }
}

impl fmt::Display for ResolverBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Bigquery => "bigquery",
            Self::Parquet => "parquet",
            Self::Api => "api",
            Self::Computed => "computed",
        };
        write!(f, "{s}")
    }
}

/// Resolver descriptor attached to an object type.
///
/// `backend` selects the resolver implementation; `config` carries
/// backend-specific keys (table, view, path, ...) verbatim from the
/// document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolverDescriptor {
    /// Backend tag as written in the document (unknown tags are preserved).
    pub backend: String,
    /// Backend-specific configuration map.
    pub config: BTreeMap<String, serde_json::Value>,
}

impl ResolverDescriptor {
    /// Create a descriptor with an empty config.
    pub fn new(backend: impl Into<String>) -> Self {
        Self {
            backend: backend.into(),
            config: BTreeMap::new(),
        }
    }

    /// Look up a string-valued config key.
    pub fn config_str(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(|v| v.as_str())
    }
}

/// Named business entity with a primary key and typed properties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectTypeDef {
    /// Object type name, unique within a schema version.
    pub name: String,
    /// Free-form description.
    pub description: String,
    /// Name of the primary-key property; must appear among `properties`.
    pub primary_key: String,
    /// Resolver descriptor, when the type is backed by a store.
    pub resolver: Option<ResolverDescriptor>,
    /// Name of the governing security policy, when any.
    pub security_policy: Option<String>,
    /// Owned properties (cascade on delete).
    pub properties: Vec<PropertyDef>,
}

impl ObjectTypeDef {
    /// Look up a property by name.
    pub fn property(&self, name: &str) -> Option<&PropertyDef> {
        self.properties.iter().find(|p| p.name == name)
    }

    /// Whether the primary key is declared among the properties.
    pub fn primary_key_declared(&self) -> bool {
        self.property(&self.primary_key).is_some()
    }
}

/// Directed relation cardinality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    /// 1:1.
    OneToOne,
    /// 1:N.
    OneToMany,
    /// N:1.
    ManyToOne,
    /// N:M, resolved via a join table.
    ManyToMany,
}

impl Cardinality {
    /// Parse cardinality from its document spelling.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "one_to_one" => Some(Self::OneToOne),
            "one_to_many" => Some(Self::OneToMany),
            "many_to_one" => Some(Self::ManyToOne),
            "many_to_many" => Some(Self::ManyToMany),
            _ => None,
        }
    }

    /// All valid document spellings.
    pub fn valid_names() -> &'static [&'static str] {
        &["one_to_one", "one_to_many", "many_to_one", "many_to_many"]
    }
}

impl fmt::Display for Cardinality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::OneToOne => "one_to_one",
            Self::OneToMany => "one_to_many",
            Self::ManyToOne => "many_to_one",
            Self::ManyToMany => "many_to_many",
        };
        write!(f, "{s}")
    }
}

/// How a link is resolved against the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkResolverKind {
    /// Target rows carry a foreign key back to the source.
    ForeignKey,
    /// Relation rows live in a dedicated join table.
    JoinTable,
}

impl LinkResolverKind {
    /// Parse resolver kind from its document spelling.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "foreign_key" => Some(Self::ForeignKey),
            "join_table" => Some(Self::JoinTable),
            _ => None,
        }
    }
}

impl fmt::Display for LinkResolverKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ForeignKey => write!(f, "foreign_key"),
            Self::JoinTable => write!(f, "join_table"),
        }
    }
}

/// Link resolver configuration.
///
/// `foreign_key` requires `to_field`; `join_table` requires `table`,
/// `from_field`, and `to_field`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkResolverConfig {
    /// Resolution strategy.
    pub kind: LinkResolverKind,
    /// Join-table name (join_table only).
    pub table: Option<String>,
    /// Source-side field in the join table.
    pub from_field: Option<String>,
    /// Target-side field (FK column, or join-table column).
    pub to_field: Option<String>,
}

impl LinkResolverConfig {
    /// Foreign-key config pointing at `to_field` on the target.
    pub fn foreign_key(to_field: impl Into<String>) -> Self {
        Self {
            kind: LinkResolverKind::ForeignKey,
            table: None,
            from_field: None,
            to_field: Some(to_field.into()),
        }
    }

    /// Join-table config.
    pub fn join_table(
        table: impl Into<String>,
        from_field: impl Into<String>,
        to_field: impl Into<String>,
    ) -> Self {
        Self {
            kind: LinkResolverKind::JoinTable,
            table: Some(table.into()),
            from_field: Some(from_field.into()),
            to_field: Some(to_field.into()),
        }
    }
}

/// Directed relation between two object types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkTypeDef {
    /// Link name, unique within a schema version.
    pub name: String,
    /// Free-form description.
    pub description: String,
    /// Source object type name.
    pub from_object: String,
    /// Target object type name.
    pub to_object: String,
    /// Relation cardinality.
    pub cardinality: Cardinality,
    /// Resolution config; absent links cannot be traversed.
    pub resolver: Option<LinkResolverConfig>,
    /// Name of the governing security policy, when any.
    pub security_policy: Option<String>,
}

/// Governed write or side-effectful operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionTypeDef {
    /// Action name, unique within a schema version.
    pub name: String,
    /// Free-form description.
    pub description: String,
    /// Input parameter schema: parameter name -> property-style definition.
    pub input_schema: serde_json::Value,
    /// Precondition expressions evaluated before execution.
    pub preconditions: Vec<String>,
    /// Documented effects.
    pub effects: Vec<String>,
    /// Mandatory policy reference.
    pub security_policy: String,
    /// Execution deadline in seconds (1..=300).
    pub timeout_seconds: u32,
    /// Whether repeated execution with identical inputs is safe.
    pub is_idempotent: bool,
}

impl ActionTypeDef {
    /// Clamp a document-supplied timeout into the valid range.
    pub fn clamp_timeout(seconds: i64) -> u32 {
        seconds.clamp(1, 300) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip() {
        for s in ["draft", "review", "published", "deprecated"] {
            let status = SchemaStatus::parse(s).unwrap();
            assert_eq!(status.to_string(), s);
        }
        assert!(SchemaStatus::parse("live").is_none());
    }

    #[test]
    fn test_property_type_closed_set() {
        assert_eq!(PropertyType::parse("integer"), Some(PropertyType::Integer));
        assert_eq!(PropertyType::parse("uuid"), None);
        assert_eq!(PropertyType::valid_names().len(), 9);
    }

    #[test]
    fn test_primary_key_declared() {
        let obj = ObjectTypeDef {
            name: "Player".into(),
            description: String::new(),
            primary_key: "playerId".into(),
            resolver: None,
            security_policy: None,
            properties: vec![
                PropertyDef::new("playerId", PropertyType::String),
                PropertyDef::new("name", PropertyType::String),
            ],
        };
        assert!(obj.primary_key_declared());

        let mut missing = obj.clone();
        missing.primary_key = "id".into();
        assert!(!missing.primary_key_declared());
    }

    #[test]
    fn test_cardinality_parse() {
        assert_eq!(
            Cardinality::parse("many_to_many"),
            Some(Cardinality::ManyToMany)
        );
        assert!(Cardinality::parse("1:n").is_none());
    }

    #[test]
    fn test_action_timeout_clamp() {
        assert_eq!(ActionTypeDef::clamp_timeout(0), 1);
        assert_eq!(ActionTypeDef::clamp_timeout(30), 30);
        assert_eq!(ActionTypeDef::clamp_timeout(10_000), 300);
    }

    #[test]
    fn test_link_config_constructors() {
        let fk = LinkResolverConfig::foreign_key("teamId");
        assert_eq!(fk.kind, LinkResolverKind::ForeignKey);
        assert_eq!(fk.to_field.as_deref(), Some("teamId"));

        let jt = LinkResolverConfig::join_table("team_rosters", "teamId", "playerId");
        assert_eq!(jt.kind, LinkResolverKind::JoinTable);
        assert_eq!(jt.table.as_deref(), Some("team_rosters"));
    }
}
