//! Core types for the ontology metadata service.

pub mod actor;
pub mod audit;
pub mod policy;
pub mod record;
pub mod schema;

pub use actor::ActorContext;
pub use audit::{AuditError, AuditRecord, AuditSink, InMemoryAuditSink, AUDIT_TABLE_SCHEMA};
pub use policy::{AccessLevel, PolicyRuleDef, PolicyTargetKind, ScopeKind, SecurityPolicyDef};
pub use record::{coerce_record, coerce_value, Record};
pub use schema::{
    ActionTypeDef, Cardinality, LinkResolverConfig, LinkResolverKind, LinkTypeDef, ObjectTypeDef,
    PropertyDef, PropertyType, ResolverBackend, ResolverDescriptor, SchemaStatus, SchemaVersion,
};
