//! Schema registry service.
//!
//! Manages schema loading, versioning, and metadata lookups. Lookups
//! default to the single active version; a small in-process cache of the
//! active version identifier is invalidated on every publish and never
//! changes behavior, only latency.

use chrono::Utc;
use parking_lot::RwLock;
use std::sync::Arc;

use crate::document::SchemaDocument;
use crate::error::CoreError;
use crate::store::{MetadataStore, NewSchemaVersion, PublishOutcome};
use crate::types::{
    ActionTypeDef, LinkTypeDef, ObjectTypeDef, SchemaVersion, SecurityPolicyDef,
};
use crate::validator::{count_severity, SchemaValidator, Severity, ValidationIssue};

/// Schema registry over a metadata store.
pub struct SchemaRegistry<S: MetadataStore> {
    store: Arc<S>,
    active_version: RwLock<Option<SchemaVersion>>,
}

impl<S: MetadataStore> SchemaRegistry<S> {
    /// Create a registry backed by the given store.
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            active_version: RwLock::new(None),
        }
    }

    /// Get a reference to the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Validate a document without persisting anything.
    pub fn validate_document(&self, document: &SchemaDocument) -> Vec<ValidationIssue> {
        SchemaValidator::new().validate(document.value())
    }

    /// Validate and persist a schema document as a new draft version.
    ///
    /// Rejects documents with validation errors and duplicate version
    /// strings. The version and all owned entities are written in a single
    /// transaction.
    pub async fn load_from_document(
        &self,
        document: &SchemaDocument,
        created_by: &str,
    ) -> Result<SchemaVersion, CoreError> {
        let issues = self.validate_document(document);
        let errors = count_severity(&issues, Severity::Error);
        let warnings = count_severity(&issues, Severity::Warning);

        for issue in issues.iter().filter(|i| i.severity == Severity::Warning) {
            tracing::warn!(location = %issue.location, "{}", issue.message);
        }

        if errors > 0 {
            let first = issues
                .iter()
                .find(|i| i.severity == Severity::Error)
                .map(|i| format!("[{}] {}", i.location, i.message))
                .unwrap_or_default();
            return Err(CoreError::InvalidRequest(format!(
                "Schema validation failed with {errors} errors; first: {first}"
            )));
        }

        let version_str = document.version();
        if self
            .store
            .get_version(&version_str)
            .await
            .map_err(CoreError::from_store)?
            .is_some()
        {
            return Err(CoreError::Conflict(format!(
                "Schema version {version_str} already exists"
            )));
        }

        let new_version = NewSchemaVersion {
            version: version_str.clone(),
            namespace: document.namespace(),
            description: document.description(),
            created_by: created_by.to_string(),
            schema_snapshot: Some(document.value().clone()),
            changelog: document.changelog(),
        };

        let bundle = document.to_bundle();
        let object_types = bundle.object_types.len();
        let link_types = bundle.link_types.len();

        let version = self
            .store
            .insert_schema(new_version, bundle)
            .await
            .map_err(CoreError::from_store)?;

        tracing::info!(
            version = %version.version,
            object_types,
            link_types,
            warnings,
            created_by,
            "Schema loaded as draft"
        );

        Ok(version)
    }

    /// Publish a draft version, atomically deactivating the previous
    /// active version.
    pub async fn publish(
        &self,
        version: &str,
        published_by: &str,
    ) -> Result<SchemaVersion, CoreError> {
        let outcome = self
            .store
            .publish_version(version, Utc::now())
            .await
            .map_err(CoreError::from_store)?;

        match outcome {
            PublishOutcome::Published(published) => {
                *self.active_version.write() = Some(published.clone());
                tracing::info!(version, published_by, "Schema published and activated");
                Ok(published)
            }
            PublishOutcome::VersionNotFound => Err(CoreError::NotFound(format!(
                "Schema version {version} not found"
            ))),
            PublishOutcome::NotDraft(status) => Err(CoreError::Conflict(format!(
                "Schema version {version} is not in draft status (currently {status})"
            ))),
        }
    }

    /// Currently active schema version, if any.
    pub async fn get_active(&self) -> Result<Option<SchemaVersion>, CoreError> {
        if let Some(cached) = self.active_version.read().clone() {
            return Ok(Some(cached));
        }

        let active = self
            .store
            .get_active_version()
            .await
            .map_err(CoreError::from_store)?;
        if let Some(ref v) = active {
            *self.active_version.write() = Some(v.clone());
        }
        Ok(active)
    }

    /// All versions, newest first.
    pub async fn list_versions(&self) -> Result<Vec<SchemaVersion>, CoreError> {
        self.store
            .list_versions()
            .await
            .map_err(CoreError::from_store)
    }

    /// A specific version by version string.
    pub async fn get_version(&self, version: &str) -> Result<Option<SchemaVersion>, CoreError> {
        self.store
            .get_version(version)
            .await
            .map_err(CoreError::from_store)
    }

    /// Object type lookup; uses the active version when none is given.
    pub async fn get_object_type(
        &self,
        name: &str,
        version: Option<&str>,
    ) -> Result<Option<ObjectTypeDef>, CoreError> {
        let Some(v) = self.resolve_version(version).await? else {
            return Ok(None);
        };
        self.store
            .get_object_type(v.id, name)
            .await
            .map_err(CoreError::from_store)
    }

    /// All object types of a version (active by default).
    pub async fn get_all_object_types(
        &self,
        version: Option<&str>,
    ) -> Result<Vec<ObjectTypeDef>, CoreError> {
        let Some(v) = self.resolve_version(version).await? else {
            return Ok(Vec::new());
        };
        self.store
            .get_all_object_types(v.id)
            .await
            .map_err(CoreError::from_store)
    }

    /// Link type lookup; uses the active version when none is given.
    pub async fn get_link_type(
        &self,
        name: &str,
        version: Option<&str>,
    ) -> Result<Option<LinkTypeDef>, CoreError> {
        let Some(v) = self.resolve_version(version).await? else {
            return Ok(None);
        };
        self.store
            .get_link_type(v.id, name)
            .await
            .map_err(CoreError::from_store)
    }

    /// All link types of a version (active by default).
    pub async fn get_all_link_types(
        &self,
        version: Option<&str>,
    ) -> Result<Vec<LinkTypeDef>, CoreError> {
        let Some(v) = self.resolve_version(version).await? else {
            return Ok(Vec::new());
        };
        self.store
            .get_all_link_types(v.id)
            .await
            .map_err(CoreError::from_store)
    }

    /// Action type lookup; uses the active version when none is given.
    pub async fn get_action_type(
        &self,
        name: &str,
        version: Option<&str>,
    ) -> Result<Option<ActionTypeDef>, CoreError> {
        let Some(v) = self.resolve_version(version).await? else {
            return Ok(None);
        };
        self.store
            .get_action_type(v.id, name)
            .await
            .map_err(CoreError::from_store)
    }

    /// Security policy lookup; uses the active version when none is given.
    pub async fn get_security_policy(
        &self,
        name: &str,
        version: Option<&str>,
    ) -> Result<Option<SecurityPolicyDef>, CoreError> {
        let Some(v) = self.resolve_version(version).await? else {
            return Ok(None);
        };
        self.store
            .get_security_policy(v.id, name)
            .await
            .map_err(CoreError::from_store)
    }

    async fn resolve_version(
        &self,
        version: Option<&str>,
    ) -> Result<Option<SchemaVersion>, CoreError> {
        match version {
            Some(v) => self.get_version(v).await,
            None => self.get_active().await,
        }
    }
}
