//! Access mediator.
//!
//! Composes registry lookups, policy evaluation, resolver dispatch, column
//! filtering, and audit into single end-to-end operations. This is the
//! only funnel through which callers touch governed data, and the only
//! place backend errors are translated into the core taxonomy.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use crate::error::CoreError;
use crate::policy::{PolicyDecision, PolicyEngine};
use crate::registry::SchemaRegistry;
use crate::resolver::{FilterMap, Resolver};
use crate::store::MetadataStore;
use crate::types::{
    coerce_record, ActionTypeDef, ActorContext, AuditRecord, AuditSink, ObjectTypeDef, Record,
    SecurityPolicyDef,
};

/// Default backend tag when an object type declares no resolver.
const DEFAULT_BACKEND: &str = "bigquery";

/// Outcome of a governed action execution.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ActionOutcome {
    /// Whether the handler completed successfully.
    pub success: bool,
    /// Action name.
    pub action: String,
    /// Handler result payload.
    pub result: Option<serde_json::Value>,
    /// Human-readable message.
    pub message: String,
    /// Wall-clock duration.
    pub execution_time_ms: i64,
}

/// Handler invoked when a governed action executes.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    /// Execute the action with validated inputs.
    async fn execute(
        &self,
        actor: &ActorContext,
        action: &ActionTypeDef,
        inputs: &serde_json::Value,
    ) -> Result<serde_json::Value, CoreError>;
}

/// Mediates every access to governed data.
pub struct AccessMediator<S: MetadataStore> {
    registry: Arc<SchemaRegistry<S>>,
    policy_engine: Arc<PolicyEngine>,
    resolvers: BTreeMap<String, Arc<dyn Resolver>>,
    audit: Arc<dyn AuditSink>,
    action_handlers: RwLock<BTreeMap<String, Arc<dyn ActionHandler>>>,
}

impl<S: MetadataStore> AccessMediator<S> {
    /// Create a mediator over the given components.
    pub fn new(
        registry: Arc<SchemaRegistry<S>>,
        policy_engine: Arc<PolicyEngine>,
        resolvers: BTreeMap<String, Arc<dyn Resolver>>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            registry,
            policy_engine,
            resolvers,
            audit,
            action_handlers: RwLock::new(BTreeMap::new()),
        }
    }

    /// Register a handler for an action name.
    pub fn register_action_handler(
        &self,
        action_name: impl Into<String>,
        handler: Arc<dyn ActionHandler>,
    ) {
        self.action_handlers
            .write()
            .insert(action_name.into(), handler);
    }

    /// The policy engine, for callers that evaluate out-of-band.
    pub fn policy_engine(&self) -> &PolicyEngine {
        &self.policy_engine
    }

    /// Read a single object by primary key.
    pub async fn get_object(
        &self,
        actor: &ActorContext,
        object_type: &str,
        object_id: &str,
        properties: Option<&[String]>,
    ) -> Result<Record, CoreError> {
        let started = Instant::now();
        let result = self
            .get_object_inner(actor, object_type, object_id, properties)
            .await;
        self.audit_outcome(
            actor,
            "get_object",
            object_type,
            Some(object_id.to_string()),
            &result,
            started,
        )
        .await;
        result
    }

    async fn get_object_inner(
        &self,
        actor: &ActorContext,
        object_type: &str,
        object_id: &str,
        properties: Option<&[String]>,
    ) -> Result<Record, CoreError> {
        let (object_def, decision) = self
            .authorize_object(actor, object_type, "read", Some(object_id))
            .await?;

        let resolver = self.resolver_for(&object_def)?;
        let record = resolver
            .get_by_id_cached(object_type, object_id, properties)
            .await?
            .ok_or_else(|| {
                CoreError::NotFound(format!("{object_type} '{object_id}' not found"))
            })?;

        let record = coerce_record(&record, &object_def.properties);
        Ok(self
            .policy_engine
            .apply_column_filters(&record, &decision.column_filters))
    }

    /// List objects matching equality filters.
    pub async fn query_objects(
        &self,
        actor: &ActorContext,
        object_type: &str,
        filters: &FilterMap,
        properties: Option<&[String]>,
        limit: Option<usize>,
        offset: Option<usize>,
    ) -> Result<Vec<Record>, CoreError> {
        let started = Instant::now();
        let result = self
            .query_objects_inner(actor, object_type, filters, properties, limit, offset)
            .await;
        self.audit_outcome(actor, "query_objects", object_type, None, &result, started)
            .await;
        result
    }

    async fn query_objects_inner(
        &self,
        actor: &ActorContext,
        object_type: &str,
        filters: &FilterMap,
        properties: Option<&[String]>,
        limit: Option<usize>,
        offset: Option<usize>,
    ) -> Result<Vec<Record>, CoreError> {
        let (object_def, decision) = self
            .authorize_object(actor, object_type, "list", None)
            .await?;

        let resolver = self.resolver_for(&object_def)?;
        let records = resolver
            .get_by_filter(
                object_type,
                filters,
                properties,
                limit,
                offset,
                decision.row_filter.as_deref(),
            )
            .await?;

        Ok(records
            .iter()
            .map(|r| coerce_record(r, &object_def.properties))
            .map(|r| {
                self.policy_engine
                    .apply_column_filters(&r, &decision.column_filters)
            })
            .collect())
    }

    /// Traverse a link from a source object to its related records.
    pub async fn traverse_link(
        &self,
        actor: &ActorContext,
        object_type: &str,
        object_id: &str,
        link_type: &str,
        properties: Option<&[String]>,
        limit: Option<usize>,
    ) -> Result<Vec<Record>, CoreError> {
        let started = Instant::now();
        let result = self
            .traverse_link_inner(actor, object_type, object_id, link_type, properties, limit)
            .await;
        self.audit_outcome(
            actor,
            "traverse_link",
            &format!("{object_type}:{link_type}"),
            Some(object_id.to_string()),
            &result,
            started,
        )
        .await;
        result
    }

    async fn traverse_link_inner(
        &self,
        actor: &ActorContext,
        object_type: &str,
        object_id: &str,
        link_type: &str,
        properties: Option<&[String]>,
        limit: Option<usize>,
    ) -> Result<Vec<Record>, CoreError> {
        let link_def = self
            .registry
            .get_link_type(link_type, None)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("Link type '{link_type}' not found")))?;

        let link_config = link_def.resolver.clone().ok_or_else(|| {
            CoreError::InvalidRequest(format!(
                "Link type '{link_type}' has no resolver configuration"
            ))
        })?;

        // Policy: the link's own policy wins, else the target object's.
        let policy = match &link_def.security_policy {
            Some(name) => self.registry.get_security_policy(name, None).await?,
            None => {
                let target = self
                    .registry
                    .get_object_type(&link_def.to_object, None)
                    .await?;
                match target.as_ref().and_then(|t| t.security_policy.as_ref()) {
                    Some(name) => self.registry.get_security_policy(name, None).await?,
                    None => None,
                }
            }
        };

        let decision = self.policy_engine.evaluate_access(
            actor,
            "read",
            "link",
            Some(object_id),
            policy.as_ref(),
        );
        if !decision.allowed {
            return Err(CoreError::Forbidden(decision.reason));
        }

        let target_def = self
            .registry
            .get_object_type(&link_def.to_object, None)
            .await?
            .ok_or_else(|| {
                CoreError::NotFound(format!(
                    "Object type '{}' not found",
                    link_def.to_object
                ))
            })?;

        let resolver = self.resolver_for(&target_def)?;
        let records = resolver
            .traverse_link(
                object_type,
                object_id,
                link_type,
                &link_def.to_object,
                &link_config,
                properties,
                limit,
            )
            .await?;

        Ok(records
            .iter()
            .map(|r| coerce_record(r, &target_def.properties))
            .map(|r| {
                self.policy_engine
                    .apply_column_filters(&r, &decision.column_filters)
            })
            .collect())
    }

    /// Execute a governed action through its registered handler.
    pub async fn execute_action(
        &self,
        actor: &ActorContext,
        action_name: &str,
        inputs: &serde_json::Value,
    ) -> Result<ActionOutcome, CoreError> {
        let started = Instant::now();
        let result = self.execute_action_inner(actor, action_name, inputs).await;
        self.audit_outcome(actor, "execute_action", action_name, None, &result, started)
            .await;
        result
    }

    async fn execute_action_inner(
        &self,
        actor: &ActorContext,
        action_name: &str,
        inputs: &serde_json::Value,
    ) -> Result<ActionOutcome, CoreError> {
        let started = Instant::now();

        let action = self
            .registry
            .get_action_type(action_name, None)
            .await?
            .ok_or_else(|| CoreError::NotFound(format!("Action '{action_name}' not found")))?;

        let policy = self
            .registry
            .get_security_policy(&action.security_policy, None)
            .await?;
        let decision =
            self.policy_engine
                .evaluate_access(actor, "execute", "action", None, policy.as_ref());
        if !decision.allowed {
            return Err(CoreError::Forbidden(decision.reason));
        }

        self.policy_engine
            .check_action_preconditions(&action.preconditions, actor)
            .map_err(CoreError::Forbidden)?;

        validate_action_inputs(&action, inputs)?;

        let handler = self
            .action_handlers
            .read()
            .get(action_name)
            .cloned()
            .ok_or_else(|| {
                CoreError::NotFound(format!("No handler registered for action '{action_name}'"))
            })?;

        let timeout = std::time::Duration::from_secs(action.timeout_seconds as u64);
        let result = tokio::time::timeout(timeout, handler.execute(actor, &action, inputs))
            .await
            .map_err(|_| {
                CoreError::Timeout(format!(
                    "Action '{action_name}' exceeded {}s deadline",
                    action.timeout_seconds
                ))
            })??;

        Ok(ActionOutcome {
            success: true,
            action: action_name.to_string(),
            result: Some(result),
            message: format!("Action '{action_name}' executed"),
            execution_time_ms: started.elapsed().as_millis() as i64,
        })
    }

    /// Look up the object type, resolve its policy, and evaluate access.
    async fn authorize_object(
        &self,
        actor: &ActorContext,
        object_type: &str,
        operation: &str,
        target_id: Option<&str>,
    ) -> Result<(ObjectTypeDef, PolicyDecision), CoreError> {
        let object_def = self
            .registry
            .get_object_type(object_type, None)
            .await?
            .ok_or_else(|| {
                CoreError::NotFound(format!("Object type '{object_type}' not found"))
            })?;

        let policy: Option<SecurityPolicyDef> = match &object_def.security_policy {
            Some(name) => self.registry.get_security_policy(name, None).await?,
            None => None,
        };

        let decision = self.policy_engine.evaluate_access(
            actor,
            operation,
            "object",
            target_id,
            policy.as_ref(),
        );
        if !decision.allowed {
            return Err(CoreError::Forbidden(decision.reason));
        }

        Ok((object_def, decision))
    }

    fn resolver_for(&self, object_def: &ObjectTypeDef) -> Result<Arc<dyn Resolver>, CoreError> {
        let backend = object_def
            .resolver
            .as_ref()
            .map(|r| r.backend.as_str())
            .filter(|b| !b.is_empty())
            .unwrap_or(DEFAULT_BACKEND);

        self.resolvers.get(backend).cloned().ok_or_else(|| {
            CoreError::InvalidRequest(format!("Unsupported backend: {backend}"))
        })
    }

    async fn audit_outcome<T>(
        &self,
        actor: &ActorContext,
        operation: &str,
        target_type: &str,
        target_id: Option<String>,
        result: &Result<T, CoreError>,
        started: Instant,
    ) {
        let record = AuditRecord::new(
            actor.actor_id.clone(),
            actor.role.clone(),
            operation,
            target_type,
            target_id,
            result.is_ok(),
            result.as_ref().err().map(|e| e.to_string()),
            started.elapsed().as_millis() as i64,
        );

        if let Err(e) = self.audit.record(record).await {
            // Audit failures must not mask the operation's outcome.
            tracing::error!(operation, error = %e, "Failed to record audit entry");
        }
    }
}

fn validate_action_inputs(
    action: &ActionTypeDef,
    inputs: &serde_json::Value,
) -> Result<(), CoreError> {
    let Some(schema) = action.input_schema.as_object() else {
        return Ok(());
    };
    let inputs_map = inputs.as_object();

    for (param, param_def) in schema {
        let required = param_def
            .get("required")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        let present = inputs_map.map(|m| m.contains_key(param)).unwrap_or(false);
        if required && !present {
            return Err(CoreError::InvalidRequest(format!(
                "Missing required action input: {param}"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::SchemaDocument;
    use crate::resolver::ResolverError;
    use crate::store::InMemoryMetadataStore;
    use crate::types::{InMemoryAuditSink, LinkResolverConfig};

    const SCHEMA: &str = r#"
version: "0.1"
metadata: {author: staff, created: "2025-10-01", status: draft}
object_types:
  Player:
    primary_key: playerId
    security_policy: player_policy
    resolver:
      backend: bigquery
      table: players
    properties:
      playerId: {type: string, required: true}
      name: {type: string}
      salary: {type: integer}
action_types:
  refresh_roster:
    input_schema:
      teamId: {type: string, required: true}
    preconditions: ["User has role Admin"]
    security_policy: admin_policy
    timeout_seconds: 5
security_policies:
  player_policy:
    rules:
      - role: scout
        access: read
        column_filters: [salary]
  admin_policy:
    rules:
      - role: admin
        access: execute
"#;

    struct StubResolver {
        rows: Vec<Record>,
    }

    #[async_trait]
    impl Resolver for StubResolver {
        fn backend_name(&self) -> &'static str {
            "bigquery"
        }

        async fn get_by_id(
            &self,
            _object_type: &str,
            _object_id: &str,
            _properties: Option<&[String]>,
        ) -> Result<Option<Record>, ResolverError> {
            Ok(self.rows.first().cloned())
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
            Ok(self.rows.clone())
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
            Ok(self.rows.clone())
        }
    }

    async fn mediator_with_rows(
        rows: Vec<Record>,
    ) -> (AccessMediator<InMemoryMetadataStore>, Arc<InMemoryAuditSink>) {
        let registry = Arc::new(SchemaRegistry::new(Arc::new(InMemoryMetadataStore::new())));
        let doc = SchemaDocument::from_yaml_str(SCHEMA).unwrap();
        registry.load_from_document(&doc, "tests").await.unwrap();
        registry.publish("0.1", "tests").await.unwrap();

        let audit = Arc::new(InMemoryAuditSink::new());
        let mut resolvers: BTreeMap<String, Arc<dyn Resolver>> = BTreeMap::new();
        resolvers.insert("bigquery".to_string(), Arc::new(StubResolver { rows }));

        let mediator = AccessMediator::new(
            registry,
            Arc::new(PolicyEngine::new()),
            resolvers,
            Arc::clone(&audit) as Arc<dyn AuditSink>,
        );
        (mediator, audit)
    }

    fn player_row() -> Record {
        Record::new()
            .with("playerId", "P1")
            .with("name", "A")
            .with("salary", 1000)
    }

    #[tokio::test]
    async fn test_denied_read_writes_failure_audit() {
        let (mediator, audit) = mediator_with_rows(vec![player_row()]).await;
        let actor = ActorContext::new("u-2", "player");

        let err = mediator
            .get_object(&actor, "Player", "P1", None)
            .await
            .unwrap_err();
        match err {
            CoreError::Forbidden(reason) => {
                assert_eq!(reason, "no rule found for role player")
            }
            other => panic!("expected Forbidden, got {other:?}"),
        }

        let records = audit.records_for_operation("get_object");
        assert_eq!(records.len(), 1);
        assert!(!records[0].success);
        assert!(audit.records().iter().all(|r| !r.success));
    }

    #[tokio::test]
    async fn test_column_filters_applied_to_read() {
        let (mediator, audit) = mediator_with_rows(vec![player_row()]).await;
        let actor = ActorContext::new("u-1", "scout");

        let record = mediator
            .get_object(&actor, "Player", "P1", None)
            .await
            .unwrap();
        assert_eq!(record.get_str("playerId").as_deref(), Some("P1"));
        assert_eq!(record.get_str("name").as_deref(), Some("A"));
        assert!(!record.contains("salary"));

        let records = audit.records_for_operation("get_object");
        assert_eq!(records.len(), 1);
        assert!(records[0].success);
    }

    #[tokio::test]
    async fn test_unknown_object_type_is_not_found() {
        let (mediator, _) = mediator_with_rows(vec![]).await;
        let actor = ActorContext::new("u-1", "scout");
        let err = mediator
            .get_object(&actor, "Ghost", "G1", None)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_query_objects_filters_every_record() {
        let (mediator, _) = mediator_with_rows(vec![player_row(), player_row()]).await;
        let actor = ActorContext::new("u-1", "scout");

        let records = mediator
            .query_objects(&actor, "Player", &FilterMap::new(), None, None, None)
            .await
            .unwrap();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| !r.contains("salary")));
    }

    struct EchoHandler;

    #[async_trait]
    impl ActionHandler for EchoHandler {
        async fn execute(
            &self,
            _actor: &ActorContext,
            _action: &ActionTypeDef,
            inputs: &serde_json::Value,
        ) -> Result<serde_json::Value, CoreError> {
            Ok(inputs.clone())
        }
    }

    #[tokio::test]
    async fn test_execute_action_happy_path() {
        let (mediator, audit) = mediator_with_rows(vec![]).await;
        mediator.register_action_handler("refresh_roster", Arc::new(EchoHandler));

        let admin = ActorContext::new("u-0", "admin");
        let outcome = mediator
            .execute_action(&admin, "refresh_roster", &serde_json::json!({"teamId": "MTL"}))
            .await
            .unwrap();
        assert!(outcome.success);
        assert_eq!(
            outcome.result,
            Some(serde_json::json!({"teamId": "MTL"}))
        );

        let records = audit.records_for_operation("execute_action");
        assert_eq!(records.len(), 1);
        assert!(records[0].success);
    }

    #[tokio::test]
    async fn test_execute_action_missing_required_input() {
        let (mediator, _) = mediator_with_rows(vec![]).await;
        mediator.register_action_handler("refresh_roster", Arc::new(EchoHandler));

        let admin = ActorContext::new("u-0", "admin");
        let err = mediator
            .execute_action(&admin, "refresh_roster", &serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_execute_action_denied_for_wrong_role() {
        let (mediator, _) = mediator_with_rows(vec![]).await;
        mediator.register_action_handler("refresh_roster", Arc::new(EchoHandler));

        let scout = ActorContext::new("u-1", "scout");
        let err = mediator
            .execute_action(&scout, "refresh_roster", &serde_json::json!({"teamId": "MTL"}))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Forbidden(_)));
    }
}
