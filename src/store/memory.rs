//! In-memory metadata store for testing and local development.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::BTreeMap;

use super::{MetadataStore, NewSchemaVersion, PublishOutcome};
use crate::document::SchemaBundle;
use crate::types::{
    ActionTypeDef, LinkTypeDef, ObjectTypeDef, SchemaStatus, SchemaVersion, SecurityPolicyDef,
};

/// Error type for the in-memory store.
#[derive(Debug, Clone, thiserror::Error)]
pub enum InMemoryError {
    /// Duplicate version string.
    #[error("Schema version already exists: {0}")]
    DuplicateVersion(String),
}

#[derive(Debug, Default)]
struct Inner {
    next_id: i64,
    versions: BTreeMap<i64, SchemaVersion>,
    object_types: BTreeMap<(i64, String), ObjectTypeDef>,
    link_types: BTreeMap<(i64, String), LinkTypeDef>,
    action_types: BTreeMap<(i64, String), ActionTypeDef>,
    policies: BTreeMap<(i64, String), SecurityPolicyDef>,
}

/// In-memory metadata store.
///
/// Uses BTreeMap for deterministic iteration order. All mutation happens
/// under a single `RwLock`, which makes the publish flip atomic by
/// construction.
#[derive(Debug, Default)]
pub struct InMemoryMetadataStore {
    inner: RwLock<Inner>,
}

impl InMemoryMetadataStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored versions.
    pub fn num_versions(&self) -> usize {
        self.inner.read().versions.len()
    }
}

#[async_trait]
impl MetadataStore for InMemoryMetadataStore {
    type Error = InMemoryError;

    async fn insert_schema(
        &self,
        version: NewSchemaVersion,
        bundle: SchemaBundle,
    ) -> Result<SchemaVersion, Self::Error> {
        let mut inner = self.inner.write();

        if inner
            .versions
            .values()
            .any(|v| v.version == version.version)
        {
            return Err(InMemoryError::DuplicateVersion(version.version));
        }

        inner.next_id += 1;
        let id = inner.next_id;

        let schema_version = SchemaVersion {
            id,
            version: version.version,
            namespace: version.namespace,
            description: version.description,
            created_by: version.created_by,
            status: SchemaStatus::Draft,
            is_active: false,
            schema_snapshot: version.schema_snapshot,
            changelog: version.changelog,
            created_at: Utc::now(),
            published_at: None,
        };

        for obj in bundle.object_types {
            inner.object_types.insert((id, obj.name.clone()), obj);
        }
        for link in bundle.link_types {
            inner.link_types.insert((id, link.name.clone()), link);
        }
        for action in bundle.action_types {
            inner.action_types.insert((id, action.name.clone()), action);
        }
        for policy in bundle.security_policies {
            inner.policies.insert((id, policy.name.clone()), policy);
        }

        inner.versions.insert(id, schema_version.clone());
        Ok(schema_version)
    }

    async fn get_version(&self, version: &str) -> Result<Option<SchemaVersion>, Self::Error> {
        Ok(self
            .inner
            .read()
            .versions
            .values()
            .find(|v| v.version == version)
            .cloned())
    }

    async fn get_active_version(&self) -> Result<Option<SchemaVersion>, Self::Error> {
        Ok(self
            .inner
            .read()
            .versions
            .values()
            .find(|v| v.is_active)
            .cloned())
    }

    async fn list_versions(&self) -> Result<Vec<SchemaVersion>, Self::Error> {
        let mut versions: Vec<_> = self.inner.read().versions.values().cloned().collect();
        versions.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(versions)
    }

    async fn publish_version(
        &self,
        version: &str,
        published_at: DateTime<Utc>,
    ) -> Result<PublishOutcome, Self::Error> {
        let mut inner = self.inner.write();

        let Some(id) = inner
            .versions
            .values()
            .find(|v| v.version == version)
            .map(|v| v.id)
        else {
            return Ok(PublishOutcome::VersionNotFound);
        };

        let Some(status) = inner.versions.get(&id).map(|v| v.status) else {
            return Ok(PublishOutcome::VersionNotFound);
        };
        if status != SchemaStatus::Draft {
            return Ok(PublishOutcome::NotDraft(status.to_string()));
        }

        // Deactivate the current active version, then flip this one.
        for v in inner.versions.values_mut() {
            v.is_active = false;
        }
        match inner.versions.get_mut(&id) {
            Some(v) => {
                v.status = SchemaStatus::Published;
                v.is_active = true;
                v.published_at = Some(published_at);
                Ok(PublishOutcome::Published(v.clone()))
            }
            None => Ok(PublishOutcome::VersionNotFound),
        }
    }

    async fn get_object_type(
        &self,
        version_id: i64,
        name: &str,
    ) -> Result<Option<ObjectTypeDef>, Self::Error> {
        Ok(self
            .inner
            .read()
            .object_types
            .get(&(version_id, name.to_string()))
            .cloned())
    }

    async fn get_all_object_types(
        &self,
        version_id: i64,
    ) -> Result<Vec<ObjectTypeDef>, Self::Error> {
        Ok(self
            .inner
            .read()
            .object_types
            .range((version_id, String::new())..(version_id + 1, String::new()))
            .map(|(_, v)| v.clone())
            .collect())
    }

    async fn get_link_type(
        &self,
        version_id: i64,
        name: &str,
    ) -> Result<Option<LinkTypeDef>, Self::Error> {
        Ok(self
            .inner
            .read()
            .link_types
            .get(&(version_id, name.to_string()))
            .cloned())
    }

    async fn get_all_link_types(&self, version_id: i64) -> Result<Vec<LinkTypeDef>, Self::Error> {
        Ok(self
            .inner
            .read()
            .link_types
            .range((version_id, String::new())..(version_id + 1, String::new()))
            .map(|(_, v)| v.clone())
            .collect())
    }

    async fn get_action_type(
        &self,
        version_id: i64,
        name: &str,
    ) -> Result<Option<ActionTypeDef>, Self::Error> {
        Ok(self
            .inner
            .read()
            .action_types
            .get(&(version_id, name.to_string()))
            .cloned())
    }

    async fn get_security_policy(
        &self,
        version_id: i64,
        name: &str,
    ) -> Result<Option<SecurityPolicyDef>, Self::Error> {
        Ok(self
            .inner
            .read()
            .policies
            .get(&(version_id, name.to_string()))
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PropertyDef, PropertyType};

    fn sample_version(version: &str) -> NewSchemaVersion {
        NewSchemaVersion {
            version: version.to_string(),
            namespace: "nhl.analytics".to_string(),
            description: String::new(),
            created_by: "tests".to_string(),
            schema_snapshot: None,
            changelog: None,
        }
    }

    fn sample_bundle() -> SchemaBundle {
        SchemaBundle {
            object_types: vec![ObjectTypeDef {
                name: "Player".into(),
                description: String::new(),
                primary_key: "playerId".into(),
                resolver: None,
                security_policy: None,
                properties: vec![PropertyDef::new("playerId", PropertyType::String)],
            }],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_insert_and_lookup() {
        let store = InMemoryMetadataStore::new();
        let v = store
            .insert_schema(sample_version("0.1"), sample_bundle())
            .await
            .unwrap();
        assert_eq!(v.status, SchemaStatus::Draft);
        assert!(!v.is_active);

        let obj = store.get_object_type(v.id, "Player").await.unwrap();
        assert!(obj.is_some());
        assert!(store.get_object_type(v.id, "Team").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_version_rejected() {
        let store = InMemoryMetadataStore::new();
        store
            .insert_schema(sample_version("0.1"), SchemaBundle::default())
            .await
            .unwrap();
        let err = store
            .insert_schema(sample_version("0.1"), SchemaBundle::default())
            .await
            .unwrap_err();
        assert!(matches!(err, InMemoryError::DuplicateVersion(_)));
    }

    #[tokio::test]
    async fn test_publish_flips_single_active_flag() {
        let store = InMemoryMetadataStore::new();
        store
            .insert_schema(sample_version("0.1"), SchemaBundle::default())
            .await
            .unwrap();
        store
            .insert_schema(sample_version("0.2"), SchemaBundle::default())
            .await
            .unwrap();

        let outcome = store.publish_version("0.1", Utc::now()).await.unwrap();
        assert!(matches!(outcome, PublishOutcome::Published(_)));

        let outcome = store.publish_version("0.2", Utc::now()).await.unwrap();
        assert!(matches!(outcome, PublishOutcome::Published(_)));

        // Exactly one active version.
        let active: Vec<_> = store
            .list_versions()
            .await
            .unwrap()
            .into_iter()
            .filter(|v| v.is_active)
            .collect();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].version, "0.2");
    }

    #[tokio::test]
    async fn test_publish_requires_draft() {
        let store = InMemoryMetadataStore::new();
        store
            .insert_schema(sample_version("0.1"), SchemaBundle::default())
            .await
            .unwrap();
        store.publish_version("0.1", Utc::now()).await.unwrap();

        let outcome = store.publish_version("0.1", Utc::now()).await.unwrap();
        assert!(matches!(outcome, PublishOutcome::NotDraft(_)));

        let outcome = store.publish_version("9.9", Utc::now()).await.unwrap();
        assert!(matches!(outcome, PublishOutcome::VersionNotFound));
    }
}
