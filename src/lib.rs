//! # rink-oms
//!
//! Ontology metadata service and clip pipeline for hockey analytics.
//!
//! The core answers two questions:
//!
//! > Given a business entity and an actor, **what may they see, and
//! > through which backend?**
//!
//! > Given a moment in a game, **which video segment shows it?**
//!
//! ## Architecture
//!
//! ```text
//! Caller → AccessMediator → PolicyEngine → Resolver (warehouse|columnar)
//!              ↓                 ↓
//!         SchemaRegistry    column/row filters → AuditSink
//!
//! ClipSearchParams → ClipExtractor → ClipCutter (worker pool) → ClipIndex
//! ```
//!
//! ## Guarantees
//!
//! - At most one schema version is active at any instant; the publish
//!   flip is atomic.
//! - Policy decisions are deterministic given (role, operation, target
//!   kind, policy identity).
//! - Identical (source, start, end) triples yield one physical clip file.
//! - `cut_parallel` preserves input order in its output.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod clip;
pub mod core;
pub mod document;
pub mod error;
pub mod mediator;
pub mod policy;
pub mod registry;
pub mod resolver;
pub mod store;
pub mod types;
pub mod validator;

// Re-exports
pub use clip::{
    clip_fingerprint, ClipCutRequest, ClipCutResult, ClipCutter, ClipCutterConfig, ClipExtractor,
    ClipIndex, ClipIndexStats, ClipMode, ClipQueryFilter, ClipRecord, ClipSearchParams,
    ClipSegment, FfmpegRunner, MediaRunner, MetricsCatalog, PlayerRef, RosterLookup,
    ScheduleLookup, StaticRoster, StaticSchedule, Timeframe,
};
pub use crate::core::{Core, CoreCollaborators, CoreConfig};
pub use document::{SchemaBundle, SchemaDocument, DEFAULT_NAMESPACE};
pub use error::CoreError;
pub use mediator::{AccessMediator, ActionHandler, ActionOutcome};
pub use policy::{PolicyDecision, PolicyEngine};
pub use registry::SchemaRegistry;
pub use resolver::{
    CachedResolver, ColumnarResolver, FilterMap, QueryParam, QueryParamValue, Resolver,
    ResolverConfig, ResolverError, ResolverMetrics, WarehouseClient, WarehouseResolver,
};
pub use store::{InMemoryMetadataStore, MetadataStore, NewSchemaVersion, PublishOutcome};
#[cfg(feature = "postgres")]
pub use store::{PostgresAuditSink, PostgresConfig, PostgresMetadataStore};
pub use types::{
    AccessLevel, ActionTypeDef, ActorContext, AuditRecord, AuditSink, Cardinality,
    InMemoryAuditSink, LinkResolverConfig, LinkResolverKind, LinkTypeDef, ObjectTypeDef,
    PolicyRuleDef, PolicyTargetKind, PropertyDef, PropertyType, Record, ResolverBackend,
    ResolverDescriptor, SchemaStatus, SchemaVersion, ScopeKind, SecurityPolicyDef,
};
pub use validator::{SchemaValidator, Severity, ValidationIssue};

/// Schema version for the core's own wire/data formats.
/// Increment on breaking changes to any persisted shape.
pub const OMS_SCHEMA_VERSION: &str = "1.0.0";
