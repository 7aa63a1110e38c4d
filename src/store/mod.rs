//! Metadata storage backends.

pub mod memory;

#[cfg(feature = "postgres")]
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::document::SchemaBundle;
use crate::types::{
    ActionTypeDef, LinkTypeDef, ObjectTypeDef, SchemaVersion, SecurityPolicyDef,
};

/// Inputs for creating a schema version.
#[derive(Debug, Clone)]
pub struct NewSchemaVersion {
    /// Semantic-version string, unique across versions.
    pub version: String,
    /// Schema namespace.
    pub namespace: String,
    /// Free-form description.
    pub description: String,
    /// Who loaded this version.
    pub created_by: String,
    /// Raw document snapshot.
    pub schema_snapshot: Option<serde_json::Value>,
    /// Changelog entries from the document metadata.
    pub changelog: Option<serde_json::Value>,
}

/// Outcome of a publish attempt.
#[derive(Debug, Clone)]
pub enum PublishOutcome {
    /// Published and activated; the previous active version was deactivated
    /// in the same transaction.
    Published(SchemaVersion),
    /// No version with the given string exists.
    VersionNotFound,
    /// The version exists but is not in draft state.
    NotDraft(String),
}

/// Trait for metadata storage backends.
///
/// Implementations must make `insert_schema` and `publish_version` atomic:
/// either the whole bundle lands or none of it does, and the active flag
/// flips in one transaction.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    /// Error type for store operations.
    type Error: std::error::Error + Send + Sync;

    /// Write a version and all owned entities in a single transaction,
    /// leaving the version in draft state.
    async fn insert_schema(
        &self,
        version: NewSchemaVersion,
        bundle: SchemaBundle,
    ) -> Result<SchemaVersion, Self::Error>;

    /// Fetch a version by its version string.
    async fn get_version(&self, version: &str) -> Result<Option<SchemaVersion>, Self::Error>;

    /// Fetch the single active version, if any.
    async fn get_active_version(&self) -> Result<Option<SchemaVersion>, Self::Error>;

    /// All versions, newest first.
    async fn list_versions(&self) -> Result<Vec<SchemaVersion>, Self::Error>;

    /// Atomically deactivate the current active version and publish this
    /// one, stamping the publication time.
    async fn publish_version(
        &self,
        version: &str,
        published_at: DateTime<Utc>,
    ) -> Result<PublishOutcome, Self::Error>;

    /// Fetch an object type by name within a version.
    async fn get_object_type(
        &self,
        version_id: i64,
        name: &str,
    ) -> Result<Option<ObjectTypeDef>, Self::Error>;

    /// All object types of a version, ordered by name.
    async fn get_all_object_types(&self, version_id: i64)
        -> Result<Vec<ObjectTypeDef>, Self::Error>;

    /// Fetch a link type by name within a version.
    async fn get_link_type(
        &self,
        version_id: i64,
        name: &str,
    ) -> Result<Option<LinkTypeDef>, Self::Error>;

    /// All link types of a version, ordered by name.
    async fn get_all_link_types(&self, version_id: i64) -> Result<Vec<LinkTypeDef>, Self::Error>;

    /// Fetch an action type by name within a version.
    async fn get_action_type(
        &self,
        version_id: i64,
        name: &str,
    ) -> Result<Option<ActionTypeDef>, Self::Error>;

    /// Fetch a security policy by name within a version.
    async fn get_security_policy(
        &self,
        version_id: i64,
        name: &str,
    ) -> Result<Option<SecurityPolicyDef>, Self::Error>;
}

pub use memory::InMemoryMetadataStore;

#[cfg(feature = "postgres")]
pub use postgres::{PostgresAuditSink, PostgresConfig, PostgresMetadataStore};
