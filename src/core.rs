//! Core context and operational configuration.
//!
//! Everything that used to be ambient state is owned here: the registry,
//! policy engine, resolvers, mediator, extractor, cutter, and index are
//! constructed once from a [`CoreConfig`] and torn down deterministically.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use crate::clip::{
    ClipCutRequest, ClipCutResult, ClipCutter, ClipCutterConfig, ClipExtractor, ClipIndex,
    ClipIndexStats, ClipJobMetadata, ClipQueryFilter, ClipRecord, ClipSearchParams, ClipSegment,
    MediaRunner, MetricsCatalog, RosterLookup, ScheduleLookup,
};
use crate::error::CoreError;
use crate::mediator::AccessMediator;
use crate::policy::PolicyEngine;
use crate::registry::SchemaRegistry;
use crate::resolver::{
    CachedResolver, ColumnarResolver, Resolver, ResolverConfig, WarehouseClient, WarehouseResolver,
};
use crate::store::MetadataStore;
use crate::types::{ActorContext, AuditRecord, AuditSink};

/// Operational configuration, settable via environment or directly.
#[derive(Debug, Clone)]
pub struct CoreConfig {
    /// Relational connection string; startup fails when absent.
    pub database_url: String,
    /// Root for column-oriented data files.
    pub data_root: PathBuf,
    /// Warehouse project identifier.
    pub warehouse_project: String,
    /// Warehouse dataset identifier.
    pub warehouse_dataset: String,
    /// Root of the per-game period video library.
    pub clips_root: PathBuf,
    /// Root of the per-game analytics exports.
    pub metrics_root: PathBuf,
    /// Output root for generated clips.
    pub clip_output_root: PathBuf,
    /// Clip index database path.
    pub clip_index_path: PathBuf,
    /// Worker-pool size for the cutter.
    pub clip_workers: usize,
    /// Soft cap on clip duration in seconds.
    pub max_clip_duration_s: u32,
    /// Whether to package HLS after cutting.
    pub hls_enabled: bool,
    /// HLS segment length in seconds.
    pub hls_segment_time: u32,
    /// Resolver cache TTL in seconds.
    pub resolver_cache_ttl_s: u64,
    /// Resolver hard row cap.
    pub resolver_max_rows: usize,
}

impl CoreConfig {
    /// Load configuration from environment variables.
    ///
    /// `DATABASE_URL` is required; everything else has production
    /// defaults.
    pub fn from_env() -> Result<Self, CoreError> {
        let database_url = std::env::var("DATABASE_URL").map_err(|_| {
            CoreError::InvalidRequest(
                "DATABASE_URL not set; the OMS requires a PostgreSQL connection string"
                    .to_string(),
            )
        })?;

        fn env_path(key: &str, default: &str) -> PathBuf {
            std::env::var(key)
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(default))
        }
        fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
            std::env::var(key)
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(default)
        }

        Ok(Self {
            database_url,
            data_root: env_path("DATA_ROOT", "data/processed"),
            warehouse_project: std::env::var("WAREHOUSE_PROJECT")
                .unwrap_or_else(|_| "analytics".to_string()),
            warehouse_dataset: std::env::var("WAREHOUSE_DATASET")
                .unwrap_or_else(|_| "ontology".to_string()),
            clips_root: env_path("CLIPS_ROOT", "data/clips"),
            metrics_root: env_path("METRICS_ROOT", "data/processed/extracted_metrics"),
            clip_output_root: env_path("CLIP_OUTPUT_ROOT", "data/clips/generated"),
            clip_index_path: env_path("CLIP_INDEX_PATH", "data/clips/clip_index.db"),
            clip_workers: env_parse("CLIP_WORKERS", 2),
            max_clip_duration_s: env_parse("MAX_CLIP_DURATION_S", 120),
            hls_enabled: env_parse("HLS_ENABLED", true),
            hls_segment_time: env_parse("HLS_SEGMENT_TIME", 2),
            resolver_cache_ttl_s: env_parse("RESOLVER_CACHE_TTL_S", 300),
            resolver_max_rows: env_parse("RESOLVER_MAX_ROWS", 10_000),
        })
    }

    fn resolver_config(&self) -> ResolverConfig {
        ResolverConfig {
            cache_ttl_seconds: self.resolver_cache_ttl_s,
            max_rows: self.resolver_max_rows,
            ..Default::default()
        }
    }
}

/// External collaborators the core composes but does not own.
pub struct CoreCollaborators {
    /// Warehouse query execution.
    pub warehouse_client: Arc<dyn WarehouseClient>,
    /// Player-name lookups.
    pub roster: Arc<dyn RosterLookup>,
    /// Schedule lookups.
    pub schedule: Arc<dyn ScheduleLookup>,
    /// Subprocess runner for the cutter.
    pub media_runner: Arc<dyn MediaRunner>,
    /// Audit destination.
    pub audit: Arc<dyn AuditSink>,
}

/// The assembled core: one owner for all long-running state.
pub struct Core<S: MetadataStore> {
    /// Schema registry.
    pub registry: Arc<SchemaRegistry<S>>,
    /// Policy engine.
    pub policy_engine: Arc<PolicyEngine>,
    /// Access mediator for object/link/action operations.
    pub mediator: Arc<AccessMediator<S>>,
    /// Clip extractor.
    pub extractor: Arc<ClipExtractor>,
    /// Clip cutter.
    pub cutter: Arc<ClipCutter>,
    /// Clip index.
    pub clip_index: Arc<ClipIndex>,
    warehouse: Arc<CachedResolver<WarehouseResolver>>,
    audit: Arc<dyn AuditSink>,
    config: CoreConfig,
}

impl<S: MetadataStore> Core<S> {
    /// Assemble the core from a config, a metadata store, and the
    /// external collaborators.
    pub fn new(
        config: CoreConfig,
        store: Arc<S>,
        collaborators: CoreCollaborators,
    ) -> Result<Self, CoreError> {
        let registry = Arc::new(SchemaRegistry::new(store));
        let policy_engine = Arc::new(PolicyEngine::new());

        let warehouse = Arc::new(CachedResolver::new(
            Arc::new(WarehouseResolver::new(
                &config.warehouse_project,
                &config.warehouse_dataset,
                Arc::clone(&collaborators.warehouse_client),
                config.resolver_config(),
            )),
            config.resolver_config(),
        ));
        let columnar = Arc::new(CachedResolver::new(
            Arc::new(ColumnarResolver::new(
                config.data_root.clone(),
                config.resolver_config(),
            )),
            config.resolver_config(),
        ));

        let mut resolvers: BTreeMap<String, Arc<dyn Resolver>> = BTreeMap::new();
        resolvers.insert("bigquery".to_string(), Arc::clone(&warehouse) as Arc<dyn Resolver>);
        resolvers.insert("parquet".to_string(), columnar as Arc<dyn Resolver>);

        let mediator = Arc::new(AccessMediator::new(
            Arc::clone(&registry),
            Arc::clone(&policy_engine),
            resolvers,
            Arc::clone(&collaborators.audit),
        ));

        let clip_index = Arc::new(ClipIndex::open(&config.clip_index_path)?);
        let catalog = MetricsCatalog::new(&config.metrics_root, &config.clips_root);
        let extractor = Arc::new(ClipExtractor::new(
            catalog,
            Arc::clone(&collaborators.roster),
            Arc::clone(&collaborators.schedule),
        ));

        let cutter_config = ClipCutterConfig {
            output_base_dir: config.clip_output_root.clone(),
            max_workers: config.clip_workers,
            max_clip_duration_s: config.max_clip_duration_s,
            enable_hls: config.hls_enabled,
            hls_segment_time: config.hls_segment_time,
            ..Default::default()
        };
        let cutter = Arc::new(ClipCutter::new(
            cutter_config,
            Arc::clone(&clip_index),
            Arc::clone(&collaborators.media_runner),
        ));

        tracing::info!("Core assembled");
        Ok(Self {
            registry,
            policy_engine,
            mediator,
            extractor,
            cutter,
            clip_index,
            warehouse,
            audit: collaborators.audit,
            config,
        })
    }

    /// The configuration the core was assembled from.
    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    /// Register warehouse table bindings from the active schema's
    /// resolver configs. Call after startup and after every publish.
    pub async fn register_warehouse_bindings(&self) -> Result<usize, CoreError> {
        let object_types = self.registry.get_all_object_types(None).await?;
        let mut count = 0;

        for obj in &object_types {
            let Some(resolver) = &obj.resolver else {
                continue;
            };
            let table = resolver
                .config_str("table")
                .or_else(|| resolver.config_str("view"));
            if let Some(table) = table {
                if !obj.primary_key.is_empty() {
                    self.warehouse
                        .inner()
                        .register_object_mapping(&obj.name, table, &obj.primary_key);
                    count += 1;
                }
            }
        }

        tracing::info!(count, "Registered warehouse object mappings");
        Ok(count)
    }

    /// Search clip segments (no media touched).
    pub fn search_segments(
        &self,
        params: &ClipSearchParams,
    ) -> Result<Vec<ClipSegment>, CoreError> {
        self.extractor.query(params)
    }

    /// Extract segments for the query and cut them all.
    ///
    /// Output paths follow `<output_root>/<game_id>/p<period>/<clip_id>.mp4`.
    pub async fn cut_clips(
        &self,
        actor: &ActorContext,
        params: &ClipSearchParams,
    ) -> Result<Vec<ClipCutResult>, CoreError> {
        let started = Instant::now();
        let result = self.cut_clips_inner(params).await;
        self.audit_clip_op(actor, "cut_clips", &result, started).await;
        result
    }

    async fn cut_clips_inner(
        &self,
        params: &ClipSearchParams,
    ) -> Result<Vec<ClipCutResult>, CoreError> {
        let segments = self.extractor.query(params)?;

        let mut requests = Vec::new();
        for segment in &segments {
            let Some(source) = &segment.period_video_path else {
                tracing::warn!(clip_id = %segment.clip_id, "No period video, skipping segment");
                continue;
            };
            let output_path = self
                .config
                .clip_output_root
                .join(&segment.game_id)
                .join(format!("p{}", segment.period))
                .join(format!("{}.mp4", segment.clip_id));

            requests.push(ClipCutRequest {
                source_video: source.clone(),
                start_seconds: segment.start_timecode_s,
                end_seconds: segment.end_timecode_s,
                output_path,
                clip_id: segment.clip_id.clone(),
                metadata: ClipJobMetadata::from_segment(segment),
            });
        }

        Ok(self.cutter.cut_parallel(requests).await)
    }

    /// Query the clip index.
    pub async fn query_clips(
        &self,
        actor: &ActorContext,
        filter: &ClipQueryFilter,
        limit: usize,
    ) -> Result<Vec<ClipRecord>, CoreError> {
        let started = Instant::now();
        let index = Arc::clone(&self.clip_index);
        let filter = filter.clone();
        let result = tokio::task::spawn_blocking(move || index.query_clips(&filter, limit))
            .await
            .map_err(|e| CoreError::Internal(format!("Index reader panicked: {e}")))?;
        self.audit_clip_op(actor, "query_clips", &result, started).await;
        result
    }

    /// Clip index statistics.
    pub fn clip_stats(&self) -> Result<ClipIndexStats, CoreError> {
        self.clip_index.get_stats()
    }

    /// Tear down: drop caches and flush nothing; all stores are
    /// write-through.
    pub fn shutdown(&self) {
        self.policy_engine.clear_cache();
        self.warehouse.clear_cache(None);
        tracing::info!("Core shut down");
    }

    async fn audit_clip_op<T>(
        &self,
        actor: &ActorContext,
        operation: &str,
        result: &Result<T, CoreError>,
        started: Instant,
    ) {
        let record = AuditRecord::new(
            actor.actor_id.clone(),
            actor.role.clone(),
            operation,
            "clip",
            None,
            result.is_ok(),
            result.as_ref().err().map(|e| e.to_string()),
            started.elapsed().as_millis() as i64,
        );
        if let Err(e) = self.audit.record(record).await {
            tracing::error!(operation, error = %e, "Failed to record audit entry");
        }
    }
}
