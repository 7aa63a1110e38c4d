//! Data resolver backends.
//!
//! A resolver answers the uniform object/link access contract for one
//! storage backend. `CachedResolver` composes TTL caching and metrics
//! around any implementation.

pub mod columnar;
pub mod warehouse;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Instant;

use crate::types::{LinkResolverConfig, Record};

pub use columnar::ColumnarResolver;
pub use warehouse::{QueryParam, QueryParamValue, WarehouseClient, WarehouseResolver};

/// Filter conditions: field name -> scalar or list value.
pub type FilterMap = BTreeMap<String, serde_json::Value>;

/// Error produced by any resolver backend.
///
/// Backend-specific failures are wrapped here with the originating message
/// preserved; callers see one error kind regardless of backend.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{backend} resolver error: {message}")]
pub struct ResolverError {
    /// Backend name.
    pub backend: &'static str,
    /// Originating error message.
    pub message: String,
}

impl ResolverError {
    /// Wrap a backend failure.
    pub fn new(backend: &'static str, message: impl Into<String>) -> Self {
        Self {
            backend,
            message: message.into(),
        }
    }
}

/// Configuration for resolver behavior.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Whether `get_by_id_cached` consults the cache.
    pub cache_enabled: bool,
    /// Cache entry time-to-live in seconds.
    pub cache_ttl_seconds: u64,
    /// Per-query timeout in seconds.
    pub timeout_seconds: u64,
    /// Maximum retries for transient backend failures.
    pub max_retries: u32,
    /// Delay between retries in seconds.
    pub retry_delay_seconds: f64,
    /// Hard cap on rows returned by any query.
    pub max_rows: usize,
    /// Maximum batch size for multi-row operations.
    pub max_batch_size: usize,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            cache_enabled: true,
            cache_ttl_seconds: 300,
            timeout_seconds: 30,
            max_retries: 3,
            retry_delay_seconds: 1.0,
            max_rows: 10_000,
            max_batch_size: 1_000,
        }
    }
}

impl ResolverConfig {
    /// Clamp a requested limit/offset pair to the configured maximum.
    pub fn apply_row_limit(&self, limit: Option<usize>, offset: Option<usize>) -> (usize, usize) {
        let final_limit = limit.unwrap_or(self.max_rows).min(self.max_rows);
        (final_limit, offset.unwrap_or(0))
    }
}

/// Performance sample for one resolver operation.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ResolverMetrics {
    /// Query duration in milliseconds.
    pub query_time_ms: i64,
    /// Rows returned.
    pub rows_returned: usize,
    /// Whether the result came from cache.
    pub cache_hit: bool,
    /// Backend name.
    pub backend: &'static str,
    /// Sample timestamp.
    pub timestamp: DateTime<Utc>,
}

/// Trait for ontology data resolvers.
///
/// All methods are async; implementations wrap backend failures in
/// [`ResolverError`] and must honor the configured row caps.
#[async_trait]
pub trait Resolver: Send + Sync {
    /// Backend name for metrics and resolver selection.
    fn backend_name(&self) -> &'static str;

    /// Retrieve a single record by primary key.
    async fn get_by_id(
        &self,
        object_type: &str,
        object_id: &str,
        properties: Option<&[String]>,
    ) -> Result<Option<Record>, ResolverError>;

    /// Retrieve records matching equality filters.
    ///
    /// List-valued filters become membership tests. `row_filter` is a
    /// backend-interpretable predicate from the policy engine; backends
    /// that cannot push it down apply it as a post-filter.
    async fn get_by_filter(
        &self,
        object_type: &str,
        filters: &FilterMap,
        properties: Option<&[String]>,
        limit: Option<usize>,
        offset: Option<usize>,
        row_filter: Option<&str>,
    ) -> Result<Vec<Record>, ResolverError>;

    /// Traverse a link from a source object to its related records.
    #[allow(clippy::too_many_arguments)]
    async fn traverse_link(
        &self,
        from_object_type: &str,
        from_object_id: &str,
        link_type: &str,
        to_object_type: &str,
        link_config: &LinkResolverConfig,
        properties: Option<&[String]>,
        limit: Option<usize>,
    ) -> Result<Vec<Record>, ResolverError>;

    /// `get_by_id` with caching. The default implementation is a plain
    /// pass-through; [`CachedResolver`] overrides it.
    async fn get_by_id_cached(
        &self,
        object_type: &str,
        object_id: &str,
        properties: Option<&[String]>,
    ) -> Result<Option<Record>, ResolverError> {
        self.get_by_id(object_type, object_id, properties).await
    }
}

struct CacheState {
    entries: HashMap<String, (Record, Instant)>,
}

/// Caching and metrics wrapper around any resolver.
///
/// TTL expiry is lazy on read. Eviction runs opportunistically when the
/// map exceeds `max_rows * 10` entries: expired entries go first, then the
/// oldest tenth. At most the most recent 1000 metric samples are kept.
pub struct CachedResolver<R: Resolver> {
    inner: Arc<R>,
    config: ResolverConfig,
    cache: Mutex<CacheState>,
    metrics: Mutex<VecDeque<ResolverMetrics>>,
}

/// Maximum retained metric samples.
const METRICS_CAPACITY: usize = 1000;

impl<R: Resolver> CachedResolver<R> {
    /// Wrap a resolver with the given configuration.
    pub fn new(inner: Arc<R>, config: ResolverConfig) -> Self {
        tracing::info!(
            backend = inner.backend_name(),
            cache_ttl = config.cache_ttl_seconds,
            "Resolver cache initialized"
        );
        Self {
            inner,
            config,
            cache: Mutex::new(CacheState {
                entries: HashMap::new(),
            }),
            metrics: Mutex::new(VecDeque::with_capacity(METRICS_CAPACITY)),
        }
    }

    /// The wrapped resolver.
    pub fn inner(&self) -> &R {
        &self.inner
    }

    /// Snapshot of retained metric samples.
    pub fn metrics(&self) -> Vec<ResolverMetrics> {
        self.metrics.lock().iter().cloned().collect()
    }

    /// Drop retained metric samples.
    pub fn clear_metrics(&self) {
        self.metrics.lock().clear();
    }

    /// Clear cache entries, optionally only those of one object type.
    pub fn clear_cache(&self, object_type: Option<&str>) {
        let mut cache = self.cache.lock();
        match object_type {
            Some(prefix) => {
                let needle = format!("{prefix}:");
                let before = cache.entries.len();
                cache.entries.retain(|k, _| !k.starts_with(&needle));
                tracing::info!(
                    object_type = prefix,
                    removed = before - cache.entries.len(),
                    "Cleared resolver cache entries"
                );
            }
            None => {
                let count = cache.entries.len();
                cache.entries.clear();
                tracing::info!(removed = count, "Cleared all resolver cache entries");
            }
        }
    }

    /// Current number of cached entries.
    pub fn cache_len(&self) -> usize {
        self.cache.lock().entries.len()
    }

    fn cache_key(object_type: &str, object_id: &str, properties: Option<&[String]>) -> String {
        let props_key = match properties {
            Some(props) if !props.is_empty() => {
                let mut sorted: Vec<&str> = props.iter().map(String::as_str).collect();
                sorted.sort_unstable();
                sorted.join(",")
            }
            _ => "all".to_string(),
        };
        format!("{object_type}:{object_id}:{props_key}")
    }

    fn record_metric(&self, query_time_ms: i64, rows_returned: usize, cache_hit: bool) {
        let mut metrics = self.metrics.lock();
        if metrics.len() >= METRICS_CAPACITY {
            metrics.pop_front();
        }
        metrics.push_back(ResolverMetrics {
            query_time_ms,
            rows_returned,
            cache_hit,
            backend: self.inner.backend_name(),
            timestamp: Utc::now(),
        });
    }

    fn evict_if_needed(cache: &mut CacheState, bound: usize, ttl_secs: u64) {
        if cache.entries.len() < bound {
            return;
        }
        let ttl = std::time::Duration::from_secs(ttl_secs);
        cache.entries.retain(|_, (_, at)| at.elapsed() < ttl);
        if cache.entries.len() < bound {
            return;
        }
        // Still over: shed the oldest tenth.
        let mut stamps: Vec<Instant> = cache.entries.values().map(|(_, at)| *at).collect();
        stamps.sort_unstable();
        let cutoff = stamps[stamps.len() / 10];
        cache.entries.retain(|_, (_, at)| *at > cutoff);
    }
}

#[async_trait]
impl<R: Resolver> Resolver for CachedResolver<R> {
    fn backend_name(&self) -> &'static str {
        self.inner.backend_name()
    }

    async fn get_by_id(
        &self,
        object_type: &str,
        object_id: &str,
        properties: Option<&[String]>,
    ) -> Result<Option<Record>, ResolverError> {
        self.inner.get_by_id(object_type, object_id, properties).await
    }

    async fn get_by_filter(
        &self,
        object_type: &str,
        filters: &FilterMap,
        properties: Option<&[String]>,
        limit: Option<usize>,
        offset: Option<usize>,
        row_filter: Option<&str>,
    ) -> Result<Vec<Record>, ResolverError> {
        self.inner
            .get_by_filter(object_type, filters, properties, limit, offset, row_filter)
            .await
    }

    async fn traverse_link(
        &self,
        from_object_type: &str,
        from_object_id: &str,
        link_type: &str,
        to_object_type: &str,
        link_config: &LinkResolverConfig,
        properties: Option<&[String]>,
        limit: Option<usize>,
    ) -> Result<Vec<Record>, ResolverError> {
        self.inner
            .traverse_link(
                from_object_type,
                from_object_id,
                link_type,
                to_object_type,
                link_config,
                properties,
                limit,
            )
            .await
    }

    async fn get_by_id_cached(
        &self,
        object_type: &str,
        object_id: &str,
        properties: Option<&[String]>,
    ) -> Result<Option<Record>, ResolverError> {
        if !self.config.cache_enabled {
            return self.inner.get_by_id(object_type, object_id, properties).await;
        }

        let key = Self::cache_key(object_type, object_id, properties);
        let ttl = std::time::Duration::from_secs(self.config.cache_ttl_seconds);

        {
            let mut cache = self.cache.lock();
            match cache.entries.get(&key) {
                Some((record, cached_at)) if cached_at.elapsed() < ttl => {
                    let record = record.clone();
                    drop(cache);
                    tracing::debug!(key = %key, "Resolver cache hit");
                    self.record_metric(0, 1, true);
                    return Ok(Some(record));
                }
                Some(_) => {
                    // Expired entry, lazy removal.
                    cache.entries.remove(&key);
                }
                None => {}
            }
        }

        let started = Instant::now();
        let result = self.inner.get_by_id(object_type, object_id, properties).await?;
        let query_time_ms = started.elapsed().as_millis() as i64;

        if let Some(record) = &result {
            let mut cache = self.cache.lock();
            Self::evict_if_needed(&mut cache, self.config.max_rows * 10, self.config.cache_ttl_seconds);
            cache.entries.insert(key, (record.clone(), Instant::now()));
        }

        self.record_metric(query_time_ms, usize::from(result.is_some()), false);
        Ok(result)
    }
}

/// Evaluate a policy-generated row predicate against a record.
///
/// Understands the conjunctive shapes the policy engine emits:
/// `field = 'literal'` and `field IN ('a', 'b')`, joined with `AND` and
/// optionally parenthesized. Clauses outside this grammar evaluate to
/// true with a warning, mirroring the engine's condition handling.
pub fn record_matches_row_filter(record: &Record, row_filter: &str) -> bool {
    row_filter
        .split(" AND ")
        .all(|clause| clause_matches(record, clause))
}

fn clause_matches(record: &Record, clause: &str) -> bool {
    let clause = clause.trim().trim_start_matches('(').trim_end_matches(')').trim();
    if clause.is_empty() {
        return true;
    }

    if let Some((field, rest)) = clause.split_once(" IN ") {
        let field = field.trim();
        let values: Vec<String> = rest
            .trim()
            .trim_start_matches('(')
            .trim_end_matches(')')
            .split(',')
            .map(|v| v.trim().trim_matches('\'').to_string())
            .collect();
        return match record.get_str(field) {
            Some(actual) => values.iter().any(|v| v == &actual),
            None => false,
        };
    }

    if let Some((field, value)) = clause.split_once('=') {
        let field = field.trim();
        let expected = value.trim().trim_matches('\'');
        return match record.get_str(field) {
            Some(actual) => actual == expected,
            None => false,
        };
    }

    tracing::warn!(clause, "Unsupported row filter clause, not filtering");
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    struct CountingResolver {
        calls: Mutex<usize>,
    }

    #[async_trait]
    impl Resolver for CountingResolver {
        fn backend_name(&self) -> &'static str {
            "counting"
        }

        async fn get_by_id(
            &self,
            _object_type: &str,
            object_id: &str,
            _properties: Option<&[String]>,
        ) -> Result<Option<Record>, ResolverError> {
            *self.calls.lock() += 1;
            Ok(Some(Record::new().with("playerId", object_id)))
        }

        async fn get_by_filter(
            &self,
            _object_type: &str,
            _filters: &FilterMap,
            _properties: Option<&[String]>,
            _limit: Option<usize>,
            _offset: Option<usize>,
            _row_filter: Option<&str>,
        ) -> Result<Vec<Record>, ResolverError> {
            Ok(Vec::new())
        }

        async fn traverse_link(
            &self,
            _from_object_type: &str,
            _from_object_id: &str,
            _link_type: &str,
            _to_object_type: &str,
            _link_config: &LinkResolverConfig,
            _properties: Option<&[String]>,
            _limit: Option<usize>,
        ) -> Result<Vec<Record>, ResolverError> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_cached_get_by_id_hits_cache() {
        let inner = Arc::new(CountingResolver {
            calls: Mutex::new(0),
        });
        let cached = CachedResolver::new(Arc::clone(&inner), ResolverConfig::default());

        cached.get_by_id_cached("Player", "P1", None).await.unwrap();
        cached.get_by_id_cached("Player", "P1", None).await.unwrap();

        assert_eq!(*inner.calls.lock(), 1);

        let metrics = cached.metrics();
        assert_eq!(metrics.len(), 2);
        assert!(!metrics[0].cache_hit);
        assert!(metrics[1].cache_hit);
    }

    #[tokio::test]
    async fn test_cache_disabled_always_fetches() {
        let inner = Arc::new(CountingResolver {
            calls: Mutex::new(0),
        });
        let config = ResolverConfig {
            cache_enabled: false,
            ..Default::default()
        };
        let cached = CachedResolver::new(Arc::clone(&inner), config);

        cached.get_by_id_cached("Player", "P1", None).await.unwrap();
        cached.get_by_id_cached("Player", "P1", None).await.unwrap();
        assert_eq!(*inner.calls.lock(), 2);
    }

    #[tokio::test]
    async fn test_projection_order_does_not_split_cache() {
        let inner = Arc::new(CountingResolver {
            calls: Mutex::new(0),
        });
        let cached = CachedResolver::new(Arc::clone(&inner), ResolverConfig::default());

        let ab = vec!["a".to_string(), "b".to_string()];
        let ba = vec!["b".to_string(), "a".to_string()];
        cached
            .get_by_id_cached("Player", "P1", Some(&ab))
            .await
            .unwrap();
        cached
            .get_by_id_cached("Player", "P1", Some(&ba))
            .await
            .unwrap();
        assert_eq!(*inner.calls.lock(), 1);
    }

    #[tokio::test]
    async fn test_clear_cache_per_object_type() {
        let inner = Arc::new(CountingResolver {
            calls: Mutex::new(0),
        });
        let cached = CachedResolver::new(Arc::clone(&inner), ResolverConfig::default());

        cached.get_by_id_cached("Player", "P1", None).await.unwrap();
        cached.get_by_id_cached("Team", "T1", None).await.unwrap();
        assert_eq!(cached.cache_len(), 2);

        cached.clear_cache(Some("Player"));
        assert_eq!(cached.cache_len(), 1);

        cached.clear_cache(None);
        assert_eq!(cached.cache_len(), 0);
    }

    #[test]
    fn test_row_limit_clamps_to_max() {
        let config = ResolverConfig::default();
        assert_eq!(config.apply_row_limit(Some(50), None), (50, 0));
        assert_eq!(config.apply_row_limit(Some(1_000_000), Some(5)), (10_000, 5));
        assert_eq!(config.apply_row_limit(None, None), (10_000, 0));
    }

    #[test]
    fn test_row_filter_equality_and_membership() {
        let record = Record::new().with("teamId", "MTL").with("playerId", "P1");
        assert!(record_matches_row_filter(&record, "teamId IN ('MTL', 'TOR')"));
        assert!(!record_matches_row_filter(&record, "teamId IN ('BOS')"));
        assert!(record_matches_row_filter(
            &record,
            "teamId IN ('MTL') AND (playerId = 'P1')"
        ));
        assert!(!record_matches_row_filter(&record, "playerId = 'P2'"));
    }

    #[test]
    fn test_row_filter_unknown_clause_passes() {
        let record = Record::new().with("a", 1);
        assert!(record_matches_row_filter(&record, "a LIKE '%x%'"));
    }
}
