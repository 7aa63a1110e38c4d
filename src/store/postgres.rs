//! PostgreSQL metadata store for production use.
//!
//! ## Configuration
//!
//! All settings can be configured via environment variables:
//! - `DATABASE_URL`: PostgreSQL connection string (required; startup fails
//!   if absent)
//! - `DB_MAX_CONNECTIONS`: Maximum pool size (default: 10)
//! - `DB_MIN_CONNECTIONS`: Minimum idle connections (default: 2)
//! - `DB_CONNECT_TIMEOUT_SECS`: Connection timeout (default: 10)
//! - `DB_IDLE_TIMEOUT_SECS`: Idle connection timeout (default: 300)
//! - `DB_MAX_LIFETIME_SECS`: Max connection lifetime (default: 1800)
//!
//! All OMS tables live in a dedicated `oms` schema namespace. Versioned
//! entities carry a foreign key to their schema version with
//! `ON DELETE CASCADE`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use std::collections::BTreeMap;
use std::time::Duration;

use super::{MetadataStore, NewSchemaVersion, PublishOutcome};
use crate::document::SchemaBundle;
use crate::types::audit::{AuditError, AuditRecord, AuditSink, AUDIT_TABLE_SCHEMA};
use crate::types::{
    AccessLevel, ActionTypeDef, Cardinality, LinkResolverConfig, LinkResolverKind, LinkTypeDef,
    ObjectTypeDef, PolicyRuleDef, PolicyTargetKind, PropertyDef, PropertyType, ResolverDescriptor,
    SchemaStatus, SchemaVersion, ScopeKind, SecurityPolicyDef,
};

/// SQL schema for the OMS metadata tables.
pub const OMS_TABLE_SCHEMA: &str = r#"
CREATE SCHEMA IF NOT EXISTS oms;

CREATE TABLE IF NOT EXISTS oms.schema_versions (
    id BIGSERIAL PRIMARY KEY,
    version TEXT NOT NULL UNIQUE,
    namespace TEXT NOT NULL DEFAULT 'nhl.analytics',
    description TEXT,
    created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    created_by TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'draft',
    changelog JSONB,
    schema_snapshot JSONB,
    is_active BOOLEAN NOT NULL DEFAULT FALSE,
    published_at TIMESTAMPTZ,

    CONSTRAINT ck_schema_version_status
        CHECK (status IN ('draft', 'review', 'published', 'deprecated'))
);

CREATE INDEX IF NOT EXISTS ix_schema_version_active
    ON oms.schema_versions(is_active, version);

CREATE TABLE IF NOT EXISTS oms.object_types (
    id BIGSERIAL PRIMARY KEY,
    schema_version_id BIGINT NOT NULL
        REFERENCES oms.schema_versions(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    description TEXT,
    primary_key TEXT NOT NULL,
    resolver_backend TEXT,
    resolver_config JSONB,
    security_policy_ref TEXT,

    CONSTRAINT uq_object_type_version_name UNIQUE (schema_version_id, name)
);

CREATE INDEX IF NOT EXISTS ix_object_type_resolver
    ON oms.object_types(resolver_backend);

CREATE TABLE IF NOT EXISTS oms.properties (
    id BIGSERIAL PRIMARY KEY,
    object_type_id BIGINT NOT NULL
        REFERENCES oms.object_types(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    property_type TEXT NOT NULL,
    required BOOLEAN NOT NULL DEFAULT FALSE,
    description TEXT,
    enum_values TEXT[],
    default_value TEXT,
    constraints JSONB,

    CONSTRAINT uq_property_object_name UNIQUE (object_type_id, name),
    CONSTRAINT ck_property_type_valid CHECK (property_type IN
        ('string', 'integer', 'float', 'boolean', 'date', 'datetime',
         'text', 'object', 'array'))
);

CREATE TABLE IF NOT EXISTS oms.link_types (
    id BIGSERIAL PRIMARY KEY,
    schema_version_id BIGINT NOT NULL
        REFERENCES oms.schema_versions(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    description TEXT,
    from_object TEXT NOT NULL,
    to_object TEXT NOT NULL,
    cardinality TEXT NOT NULL,
    resolver_type TEXT,
    resolver_table TEXT,
    resolver_from_field TEXT,
    resolver_to_field TEXT,
    security_policy_ref TEXT,

    CONSTRAINT uq_link_type_version_name UNIQUE (schema_version_id, name),
    CONSTRAINT ck_link_cardinality_valid CHECK (cardinality IN
        ('one_to_one', 'one_to_many', 'many_to_one', 'many_to_many'))
);

CREATE INDEX IF NOT EXISTS ix_link_type_objects
    ON oms.link_types(from_object, to_object);

CREATE TABLE IF NOT EXISTS oms.action_types (
    id BIGSERIAL PRIMARY KEY,
    schema_version_id BIGINT NOT NULL
        REFERENCES oms.schema_versions(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    description TEXT,
    input_schema JSONB NOT NULL,
    preconditions JSONB,
    effects JSONB,
    security_policy_ref TEXT NOT NULL,
    timeout_seconds INTEGER NOT NULL DEFAULT 30,
    is_idempotent BOOLEAN NOT NULL DEFAULT FALSE,

    CONSTRAINT uq_action_type_version_name UNIQUE (schema_version_id, name),
    CONSTRAINT ck_action_timeout_range
        CHECK (timeout_seconds > 0 AND timeout_seconds <= 300)
);

CREATE TABLE IF NOT EXISTS oms.security_policies (
    id BIGSERIAL PRIMARY KEY,
    schema_version_id BIGINT NOT NULL
        REFERENCES oms.schema_versions(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    description TEXT,
    target_type TEXT NOT NULL,
    target_ref TEXT,

    CONSTRAINT uq_policy_version_name UNIQUE (schema_version_id, name),
    CONSTRAINT ck_policy_target_type CHECK (target_type IN
        ('object', 'link', 'action', 'property', 'global'))
);

CREATE INDEX IF NOT EXISTS ix_policy_target
    ON oms.security_policies(target_type, target_ref);

CREATE TABLE IF NOT EXISTS oms.policy_rules (
    id BIGSERIAL PRIMARY KEY,
    policy_id BIGINT NOT NULL
        REFERENCES oms.security_policies(id) ON DELETE CASCADE,
    role TEXT NOT NULL,
    access_level TEXT NOT NULL,
    scope TEXT,
    column_filters JSONB,
    row_filter_expr TEXT,
    conditions JSONB,
    priority INTEGER NOT NULL DEFAULT 100,

    CONSTRAINT ck_rule_access_level CHECK (access_level IN
        ('none', 'read', 'full', 'execute', 'self_only')),
    CONSTRAINT ck_rule_scope CHECK
        (scope IN ('all', 'team_scoped', 'self_only') OR scope IS NULL)
);

CREATE INDEX IF NOT EXISTS ix_rule_role_access
    ON oms.policy_rules(role, access_level);
"#;

/// Configuration for the PostgreSQL connection pool.
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    /// Database connection URL.
    pub database_url: String,
    /// Maximum connections in pool (default: 10).
    pub max_connections: u32,
    /// Minimum idle connections to keep warm (default: 2).
    pub min_connections: u32,
    /// Connection acquire timeout in seconds (default: 10).
    pub connect_timeout_secs: u64,
    /// Idle connection timeout in seconds (default: 300 = 5 min).
    pub idle_timeout_secs: u64,
    /// Maximum connection lifetime in seconds (default: 1800 = 30 min).
    pub max_lifetime_secs: u64,
}

impl PostgresConfig {
    /// Load configuration from environment variables.
    ///
    /// Fails when `DATABASE_URL` is absent; the OMS requires a relational
    /// store and must not start without one.
    pub fn from_env() -> Result<Self, PostgresError> {
        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| PostgresError::MissingDatabaseUrl)?;

        fn env_u64(key: &str, default: u64) -> u64 {
            std::env::var(key)
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(default)
        }

        Ok(Self {
            database_url,
            max_connections: env_u64("DB_MAX_CONNECTIONS", 10) as u32,
            min_connections: env_u64("DB_MIN_CONNECTIONS", 2) as u32,
            connect_timeout_secs: env_u64("DB_CONNECT_TIMEOUT_SECS", 10),
            idle_timeout_secs: env_u64("DB_IDLE_TIMEOUT_SECS", 300),
            max_lifetime_secs: env_u64("DB_MAX_LIFETIME_SECS", 1800),
        })
    }
}

/// Error type for the PostgreSQL store.
#[derive(Debug, thiserror::Error)]
pub enum PostgresError {
    /// `DATABASE_URL` not set.
    #[error("DATABASE_URL not set; the OMS requires a PostgreSQL connection string")]
    MissingDatabaseUrl,
    /// Database error.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// PostgreSQL metadata store.
///
/// Uses connection pooling with production-tuned settings; all writes run
/// inside transactions.
pub struct PostgresMetadataStore {
    pool: PgPool,
}

impl PostgresMetadataStore {
    /// Create a new store with the given configuration.
    pub async fn new(config: PostgresConfig) -> Result<Self, PostgresError> {
        tracing::info!(
            max_connections = config.max_connections,
            min_connections = config.min_connections,
            connect_timeout_secs = config.connect_timeout_secs,
            "Initializing PostgreSQL connection pool"
        );

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .idle_timeout(Duration::from_secs(config.idle_timeout_secs))
            .max_lifetime(Duration::from_secs(config.max_lifetime_secs))
            .test_before_acquire(true)
            .connect(&config.database_url)
            .await?;

        Ok(Self { pool })
    }

    /// Create a store from environment variables.
    pub async fn from_env() -> Result<Self, PostgresError> {
        Self::new(PostgresConfig::from_env()?).await
    }

    /// Get the connection pool for health checks.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create all OMS tables and indexes if they do not exist.
    pub async fn init_schema(&self) -> Result<(), PostgresError> {
        for statement in split_statements(OMS_TABLE_SCHEMA) {
            sqlx::query(&statement).execute(&self.pool).await?;
        }
        for statement in split_statements(AUDIT_TABLE_SCHEMA) {
            sqlx::query(&statement).execute(&self.pool).await?;
        }
        tracing::info!("OMS database schema initialized");
        Ok(())
    }

    /// Check if the database is reachable.
    pub async fn is_healthy(&self) -> bool {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await.is_ok()
    }

    fn parse_version_row(row: &PgRow) -> Result<SchemaVersion, sqlx::Error> {
        let status: String = row.try_get("status")?;
        Ok(SchemaVersion {
            id: row.try_get("id")?,
            version: row.try_get("version")?,
            namespace: row.try_get("namespace")?,
            description: row
                .try_get::<Option<String>, _>("description")?
                .unwrap_or_default(),
            created_by: row.try_get("created_by")?,
            status: SchemaStatus::parse(&status).unwrap_or_default(),
            is_active: row.try_get("is_active")?,
            schema_snapshot: row.try_get("schema_snapshot")?,
            changelog: row.try_get("changelog")?,
            created_at: row.try_get("created_at")?,
            published_at: row.try_get("published_at")?,
        })
    }

    async fn load_properties(
        &self,
        object_type_id: i64,
    ) -> Result<Vec<PropertyDef>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT name, property_type, required, description,
                   enum_values, default_value, constraints
            FROM oms.properties
            WHERE object_type_id = $1
            ORDER BY id
            "#,
        )
        .bind(object_type_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                let type_str: String = row.try_get("property_type")?;
                Ok(PropertyDef {
                    name: row.try_get("name")?,
                    property_type: PropertyType::parse(&type_str)
                        .unwrap_or(PropertyType::String),
                    required: row.try_get("required")?,
                    description: row
                        .try_get::<Option<String>, _>("description")?
                        .unwrap_or_default(),
                    enum_values: row.try_get("enum_values")?,
                    default_value: row.try_get("default_value")?,
                    constraints: row.try_get("constraints")?,
                })
            })
            .collect()
    }

    async fn parse_object_type_row(&self, row: &PgRow) -> Result<ObjectTypeDef, sqlx::Error> {
        let id: i64 = row.try_get("id")?;
        let backend: Option<String> = row.try_get("resolver_backend")?;
        let config: Option<serde_json::Value> = row.try_get("resolver_config")?;

        let resolver = backend.map(|backend| ResolverDescriptor {
            backend,
            config: config
                .and_then(|v| v.as_object().cloned())
                .map(|obj| obj.into_iter().collect::<BTreeMap<_, _>>())
                .unwrap_or_default(),
        });

        Ok(ObjectTypeDef {
            name: row.try_get("name")?,
            description: row
                .try_get::<Option<String>, _>("description")?
                .unwrap_or_default(),
            primary_key: row.try_get("primary_key")?,
            resolver,
            security_policy: row.try_get("security_policy_ref")?,
            properties: self.load_properties(id).await?,
        })
    }

    fn parse_link_type_row(row: &PgRow) -> Result<LinkTypeDef, sqlx::Error> {
        let cardinality: String = row.try_get("cardinality")?;
        let resolver_type: Option<String> = row.try_get("resolver_type")?;

        let resolver = resolver_type
            .as_deref()
            .and_then(LinkResolverKind::parse)
            .map(|kind| -> Result<LinkResolverConfig, sqlx::Error> {
                Ok(LinkResolverConfig {
                    kind,
                    table: row.try_get("resolver_table")?,
                    from_field: row.try_get("resolver_from_field")?,
                    to_field: row.try_get("resolver_to_field")?,
                })
            })
            .transpose()?;

        Ok(LinkTypeDef {
            name: row.try_get("name")?,
            description: row
                .try_get::<Option<String>, _>("description")?
                .unwrap_or_default(),
            from_object: row.try_get("from_object")?,
            to_object: row.try_get("to_object")?,
            cardinality: Cardinality::parse(&cardinality).unwrap_or(Cardinality::OneToMany),
            resolver,
            security_policy: row.try_get("security_policy_ref")?,
        })
    }
}

fn split_statements(schema: &str) -> Vec<String> {
    schema
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| format!("{s};"))
        .collect()
}

fn json_string_list(value: Option<serde_json::Value>) -> Vec<String> {
    value
        .and_then(|v| v.as_array().cloned())
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl MetadataStore for PostgresMetadataStore {
    type Error = PostgresError;

    async fn insert_schema(
        &self,
        version: NewSchemaVersion,
        bundle: SchemaBundle,
    ) -> Result<SchemaVersion, Self::Error> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            INSERT INTO oms.schema_versions
                (version, namespace, description, created_by, status,
                 changelog, schema_snapshot)
            VALUES ($1, $2, $3, $4, 'draft', $5, $6)
            RETURNING id, version, namespace, description, created_by,
                      status, is_active, schema_snapshot, changelog,
                      created_at, published_at
            "#,
        )
        .bind(&version.version)
        .bind(&version.namespace)
        .bind(&version.description)
        .bind(&version.created_by)
        .bind(&version.changelog)
        .bind(&version.schema_snapshot)
        .fetch_one(&mut *tx)
        .await?;

        let schema_version = Self::parse_version_row(&row)?;
        let version_id = schema_version.id;

        for obj in &bundle.object_types {
            let resolver_config = obj.resolver.as_ref().map(|r| {
                serde_json::Value::Object(
                    r.config
                        .iter()
                        .map(|(k, v)| (k.clone(), v.clone()))
                        .collect(),
                )
            });
            let object_row = sqlx::query(
                r#"
                INSERT INTO oms.object_types
                    (schema_version_id, name, description, primary_key,
                     resolver_backend, resolver_config, security_policy_ref)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                RETURNING id
                "#,
            )
            .bind(version_id)
            .bind(&obj.name)
            .bind(&obj.description)
            .bind(&obj.primary_key)
            .bind(obj.resolver.as_ref().map(|r| r.backend.clone()))
            .bind(resolver_config)
            .bind(&obj.security_policy)
            .fetch_one(&mut *tx)
            .await?;
            let object_type_id: i64 = object_row.try_get("id")?;

            for prop in &obj.properties {
                sqlx::query(
                    r#"
                    INSERT INTO oms.properties
                        (object_type_id, name, property_type, required,
                         description, enum_values, default_value, constraints)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                    "#,
                )
                .bind(object_type_id)
                .bind(&prop.name)
                .bind(prop.property_type.to_string())
                .bind(prop.required)
                .bind(&prop.description)
                .bind(&prop.enum_values)
                .bind(&prop.default_value)
                .bind(&prop.constraints)
                .execute(&mut *tx)
                .await?;
            }
        }

        for link in &bundle.link_types {
            sqlx::query(
                r#"
                INSERT INTO oms.link_types
                    (schema_version_id, name, description, from_object,
                     to_object, cardinality, resolver_type, resolver_table,
                     resolver_from_field, resolver_to_field,
                     security_policy_ref)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                "#,
            )
            .bind(version_id)
            .bind(&link.name)
            .bind(&link.description)
            .bind(&link.from_object)
            .bind(&link.to_object)
            .bind(link.cardinality.to_string())
            .bind(link.resolver.as_ref().map(|r| r.kind.to_string()))
            .bind(link.resolver.as_ref().and_then(|r| r.table.clone()))
            .bind(link.resolver.as_ref().and_then(|r| r.from_field.clone()))
            .bind(link.resolver.as_ref().and_then(|r| r.to_field.clone()))
            .bind(&link.security_policy)
            .execute(&mut *tx)
            .await?;
        }

        for action in &bundle.action_types {
            sqlx::query(
                r#"
                INSERT INTO oms.action_types
                    (schema_version_id, name, description, input_schema,
                     preconditions, effects, security_policy_ref,
                     timeout_seconds, is_idempotent)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            )
            .bind(version_id)
            .bind(&action.name)
            .bind(&action.description)
            .bind(&action.input_schema)
            .bind(serde_json::json!(action.preconditions))
            .bind(serde_json::json!(action.effects))
            .bind(&action.security_policy)
            .bind(action.timeout_seconds as i32)
            .bind(action.is_idempotent)
            .execute(&mut *tx)
            .await?;
        }

        for policy in &bundle.security_policies {
            let policy_row = sqlx::query(
                r#"
                INSERT INTO oms.security_policies
                    (schema_version_id, name, description, target_type,
                     target_ref)
                VALUES ($1, $2, $3, $4, $5)
                RETURNING id
                "#,
            )
            .bind(version_id)
            .bind(&policy.name)
            .bind(&policy.description)
            .bind(policy.target_type.to_string())
            .bind(&policy.target_ref)
            .fetch_one(&mut *tx)
            .await?;
            let policy_id: i64 = policy_row.try_get("id")?;

            for rule in &policy.rules {
                sqlx::query(
                    r#"
                    INSERT INTO oms.policy_rules
                        (policy_id, role, access_level, scope, column_filters,
                         row_filter_expr, conditions, priority)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                    "#,
                )
                .bind(policy_id)
                .bind(&rule.role)
                .bind(rule.access.to_string())
                .bind(rule.scope.map(|s| s.to_string()))
                .bind(serde_json::json!(rule.column_filters))
                .bind(&rule.row_filter)
                .bind(serde_json::json!(rule.conditions))
                .bind(rule.priority)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;

        tracing::info!(
            version = %schema_version.version,
            object_types = bundle.object_types.len(),
            link_types = bundle.link_types.len(),
            "Schema version loaded"
        );

        Ok(schema_version)
    }

    async fn get_version(&self, version: &str) -> Result<Option<SchemaVersion>, Self::Error> {
        let row = sqlx::query(
            r#"
            SELECT id, version, namespace, description, created_by, status,
                   is_active, schema_snapshot, changelog, created_at,
                   published_at
            FROM oms.schema_versions
            WHERE version = $1
            "#,
        )
        .bind(version)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref()
            .map(Self::parse_version_row)
            .transpose()
            .map_err(PostgresError::from)
    }

    async fn get_active_version(&self) -> Result<Option<SchemaVersion>, Self::Error> {
        let row = sqlx::query(
            r#"
            SELECT id, version, namespace, description, created_by, status,
                   is_active, schema_snapshot, changelog, created_at,
                   published_at
            FROM oms.schema_versions
            WHERE is_active = TRUE
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref()
            .map(Self::parse_version_row)
            .transpose()
            .map_err(PostgresError::from)
    }

    async fn list_versions(&self) -> Result<Vec<SchemaVersion>, Self::Error> {
        let rows = sqlx::query(
            r#"
            SELECT id, version, namespace, description, created_by, status,
                   is_active, schema_snapshot, changelog, created_at,
                   published_at
            FROM oms.schema_versions
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(Self::parse_version_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(PostgresError::from)
    }

    async fn publish_version(
        &self,
        version: &str,
        published_at: DateTime<Utc>,
    ) -> Result<PublishOutcome, Self::Error> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            "SELECT id, status FROM oms.schema_versions WHERE version = $1 FOR UPDATE",
        )
        .bind(version)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            return Ok(PublishOutcome::VersionNotFound);
        };
        let status: String = row.try_get("status")?;
        if status != "draft" {
            return Ok(PublishOutcome::NotDraft(status));
        }

        sqlx::query("UPDATE oms.schema_versions SET is_active = FALSE WHERE is_active = TRUE")
            .execute(&mut *tx)
            .await?;

        let row = sqlx::query(
            r#"
            UPDATE oms.schema_versions
            SET status = 'published', is_active = TRUE, published_at = $2
            WHERE version = $1
            RETURNING id, version, namespace, description, created_by,
                      status, is_active, schema_snapshot, changelog,
                      created_at, published_at
            "#,
        )
        .bind(version)
        .bind(published_at)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(PublishOutcome::Published(Self::parse_version_row(&row)?))
    }

    async fn get_object_type(
        &self,
        version_id: i64,
        name: &str,
    ) -> Result<Option<ObjectTypeDef>, Self::Error> {
        let row = sqlx::query(
            r#"
            SELECT id, name, description, primary_key, resolver_backend,
                   resolver_config, security_policy_ref
            FROM oms.object_types
            WHERE schema_version_id = $1 AND name = $2
            "#,
        )
        .bind(version_id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref r) => Ok(Some(self.parse_object_type_row(r).await?)),
            None => Ok(None),
        }
    }

    async fn get_all_object_types(
        &self,
        version_id: i64,
    ) -> Result<Vec<ObjectTypeDef>, Self::Error> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, description, primary_key, resolver_backend,
                   resolver_config, security_policy_ref
            FROM oms.object_types
            WHERE schema_version_id = $1
            ORDER BY name
            "#,
        )
        .bind(version_id)
        .fetch_all(&self.pool)
        .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            out.push(self.parse_object_type_row(row).await?);
        }
        Ok(out)
    }

    async fn get_link_type(
        &self,
        version_id: i64,
        name: &str,
    ) -> Result<Option<LinkTypeDef>, Self::Error> {
        let row = sqlx::query(
            r#"
            SELECT name, description, from_object, to_object, cardinality,
                   resolver_type, resolver_table, resolver_from_field,
                   resolver_to_field, security_policy_ref
            FROM oms.link_types
            WHERE schema_version_id = $1 AND name = $2
            "#,
        )
        .bind(version_id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref()
            .map(Self::parse_link_type_row)
            .transpose()
            .map_err(PostgresError::from)
    }

    async fn get_all_link_types(&self, version_id: i64) -> Result<Vec<LinkTypeDef>, Self::Error> {
        let rows = sqlx::query(
            r#"
            SELECT name, description, from_object, to_object, cardinality,
                   resolver_type, resolver_table, resolver_from_field,
                   resolver_to_field, security_policy_ref
            FROM oms.link_types
            WHERE schema_version_id = $1
            ORDER BY name
            "#,
        )
        .bind(version_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(Self::parse_link_type_row)
            .collect::<Result<Vec<_>, _>>()
            .map_err(PostgresError::from)
    }

    async fn get_action_type(
        &self,
        version_id: i64,
        name: &str,
    ) -> Result<Option<ActionTypeDef>, Self::Error> {
        let row = sqlx::query(
            r#"
            SELECT name, description, input_schema, preconditions, effects,
                   security_policy_ref, timeout_seconds, is_idempotent
            FROM oms.action_types
            WHERE schema_version_id = $1 AND name = $2
            "#,
        )
        .bind(version_id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let timeout: i32 = row.try_get("timeout_seconds")?;
        Ok(Some(ActionTypeDef {
            name: row.try_get("name")?,
            description: row
                .try_get::<Option<String>, _>("description")?
                .unwrap_or_default(),
            input_schema: row.try_get("input_schema")?,
            preconditions: json_string_list(row.try_get("preconditions")?),
            effects: json_string_list(row.try_get("effects")?),
            security_policy: row.try_get("security_policy_ref")?,
            timeout_seconds: timeout as u32,
            is_idempotent: row.try_get("is_idempotent")?,
        }))
    }

    async fn get_security_policy(
        &self,
        version_id: i64,
        name: &str,
    ) -> Result<Option<SecurityPolicyDef>, Self::Error> {
        let row = sqlx::query(
            r#"
            SELECT id, name, description, target_type, target_ref
            FROM oms.security_policies
            WHERE schema_version_id = $1 AND name = $2
            "#,
        )
        .bind(version_id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let policy_id: i64 = row.try_get("id")?;
        let target_type: String = row.try_get("target_type")?;

        let rule_rows = sqlx::query(
            r#"
            SELECT role, access_level, scope, column_filters,
                   row_filter_expr, conditions, priority
            FROM oms.policy_rules
            WHERE policy_id = $1
            ORDER BY priority DESC, id
            "#,
        )
        .bind(policy_id)
        .fetch_all(&self.pool)
        .await?;

        let rules = rule_rows
            .iter()
            .map(|r| -> Result<PolicyRuleDef, sqlx::Error> {
                let access: String = r.try_get("access_level")?;
                let scope: Option<String> = r.try_get("scope")?;
                Ok(PolicyRuleDef {
                    role: r.try_get("role")?,
                    access: AccessLevel::parse(&access).unwrap_or(AccessLevel::None),
                    scope: scope.as_deref().and_then(ScopeKind::parse),
                    column_filters: json_string_list(r.try_get("column_filters")?),
                    row_filter: r.try_get("row_filter_expr")?,
                    conditions: json_string_list(r.try_get("conditions")?),
                    priority: r.try_get("priority")?,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Some(SecurityPolicyDef {
            name: row.try_get("name")?,
            description: row
                .try_get::<Option<String>, _>("description")?
                .unwrap_or_default(),
            target_type: PolicyTargetKind::parse(&target_type)
                .unwrap_or(PolicyTargetKind::Global),
            target_ref: row.try_get("target_ref")?,
            rules,
        }))
    }
}

/// Audit sink writing to the `oms.audit_log` table.
pub struct PostgresAuditSink {
    pool: PgPool,
}

impl PostgresAuditSink {
    /// Create a sink sharing the store's pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AuditSink for PostgresAuditSink {
    async fn record(&self, record: AuditRecord) -> Result<(), AuditError> {
        sqlx::query(
            r#"
            INSERT INTO oms.audit_log
                (id, timestamp, actor_id, actor_role, operation, target_type,
                 target_id, success, error_message, execution_time_ms)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(record.id)
        .bind(record.timestamp)
        .bind(&record.actor_id)
        .bind(&record.actor_role)
        .bind(&record.operation)
        .bind(&record.target_type)
        .bind(&record.target_id)
        .bind(record.success)
        .bind(&record.error_message)
        .bind(record.execution_time_ms)
        .execute(&self.pool)
        .await
        .map_err(|e| AuditError(e.to_string()))?;
        Ok(())
    }
}
