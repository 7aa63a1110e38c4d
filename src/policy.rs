//! Policy enforcement engine.
//!
//! RBAC/ABAC evaluation for ontology operations with row- and
//! column-level filtering. Decisions are deterministic given
//! (role, operation, target kind, policy identity); a bounded LRU memo
//! keyed by that tuple is kept and invalidated when policies are
//! reloaded.

use lru::LruCache;
use parking_lot::RwLock;
use std::num::NonZeroUsize;
use xxhash_rust::xxh64::xxh64;

use crate::types::{AccessLevel, ActorContext, PolicyRuleDef, ScopeKind, SecurityPolicyDef};

/// Default bound on memoized decisions.
const DECISION_CACHE_ENTRIES: usize = 4096;

/// Result of policy evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyDecision {
    /// Whether the operation is allowed.
    pub allowed: bool,
    /// Access level of the matched rule.
    pub access_level: AccessLevel,
    /// Row scope of the matched rule.
    pub scope: Option<ScopeKind>,
    /// Field names to strip from any result.
    pub column_filters: Vec<String>,
    /// Backend-interpretable row predicate.
    pub row_filter: Option<String>,
    /// Human-readable reason for audit.
    pub reason: String,
}

impl PolicyDecision {
    fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            access_level: AccessLevel::None,
            scope: None,
            column_filters: Vec::new(),
            row_filter: None,
            reason: reason.into(),
        }
    }
}

/// Policy enforcement engine for OMS operations.
pub struct PolicyEngine {
    decisions: RwLock<LruCache<u64, PolicyDecision>>,
}

impl Default for PolicyEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PolicyEngine {
    /// Create an engine with the default decision memo size.
    pub fn new() -> Self {
        let size = NonZeroUsize::new(DECISION_CACHE_ENTRIES).unwrap_or(NonZeroUsize::MIN);
        Self {
            decisions: RwLock::new(LruCache::new(size)),
        }
    }

    /// Evaluate actor access for an operation.
    ///
    /// With no policy supplied the operation is denied outright; schema
    /// authors opt types into access by attaching a policy.
    pub fn evaluate_access(
        &self,
        actor: &ActorContext,
        operation: &str,
        target_kind: &str,
        _target_id: Option<&str>,
        policy: Option<&SecurityPolicyDef>,
    ) -> PolicyDecision {
        let Some(policy) = policy else {
            tracing::warn!(target_kind, "No policy provided, denying access");
            return PolicyDecision::deny("No policy defined");
        };

        let cache_key = decision_cache_key(&actor.role, operation, target_kind, &policy.name);
        if let Some(cached) = self.decisions.write().get(&cache_key) {
            return cached.clone();
        }

        let decision = match find_matching_rule(policy, &actor.role) {
            None => PolicyDecision::deny(format!("no rule found for role {}", actor.role)),
            Some(rule) => evaluate_rule(rule, actor, operation),
        };

        if !decision.allowed {
            tracing::debug!(
                role = %actor.role,
                operation,
                policy = %policy.name,
                reason = %decision.reason,
                "Access denied"
            );
        }

        self.decisions.write().put(cache_key, decision.clone());
        decision
    }

    /// Remove a copy of each listed field from the record.
    ///
    /// Fields not present are ignored; the output keys are always a subset
    /// of the input keys.
    pub fn apply_column_filters(
        &self,
        record: &crate::types::Record,
        column_filters: &[String],
    ) -> crate::types::Record {
        if column_filters.is_empty() {
            return record.clone();
        }
        let mut filtered = record.clone();
        for field in column_filters {
            filtered.0.remove(field);
        }
        filtered
    }

    /// Check action preconditions against the actor context.
    ///
    /// Returns the first unmet precondition as the error message.
    pub fn check_action_preconditions(
        &self,
        preconditions: &[String],
        actor: &ActorContext,
    ) -> Result<(), String> {
        for precondition in preconditions {
            if !evaluate_condition(precondition, actor) {
                return Err(format!("Precondition not met: {precondition}"));
            }
        }
        Ok(())
    }

    /// Clear the decision memo. Must be called when policies are reloaded.
    pub fn clear_cache(&self) {
        self.decisions.write().clear();
        tracing::info!("Policy decision cache cleared");
    }
}

fn decision_cache_key(role: &str, operation: &str, target_kind: &str, policy_name: &str) -> u64 {
    xxh64(
        format!("{role}:{operation}:{target_kind}:{policy_name}").as_bytes(),
        0,
    )
}

/// Find the rule matching the actor's role.
///
/// Rules are tried by priority descending; an exact role match wins over
/// the wildcard `*`.
fn find_matching_rule<'a>(policy: &'a SecurityPolicyDef, role: &str) -> Option<&'a PolicyRuleDef> {
    if policy.rules.is_empty() {
        return None;
    }

    let mut sorted: Vec<&PolicyRuleDef> = policy.rules.iter().collect();
    sorted.sort_by(|a, b| b.priority.cmp(&a.priority));

    sorted
        .iter()
        .find(|r| r.role == role)
        .or_else(|| sorted.iter().find(|r| r.is_wildcard()))
        .copied()
}

fn evaluate_rule(rule: &PolicyRuleDef, actor: &ActorContext, operation: &str) -> PolicyDecision {
    if !rule.access.allows(operation) {
        return PolicyDecision {
            allowed: false,
            access_level: rule.access,
            scope: None,
            column_filters: Vec::new(),
            row_filter: None,
            reason: format!(
                "Operation '{operation}' not allowed for access level '{}'",
                rule.access
            ),
        };
    }

    let scope = rule.scope.unwrap_or(ScopeKind::All);

    if !rule.conditions.is_empty() {
        let conditions_met = rule.conditions.iter().all(|c| evaluate_condition(c, actor));
        if !conditions_met {
            return PolicyDecision {
                allowed: false,
                access_level: rule.access,
                scope: Some(scope),
                column_filters: Vec::new(),
                row_filter: None,
                reason: "Rule conditions not met".to_string(),
            };
        }
    }

    PolicyDecision {
        allowed: true,
        access_level: rule.access,
        scope: Some(scope),
        column_filters: rule.column_filters.clone(),
        row_filter: build_row_filter(rule, actor, scope),
        reason: format!("Access granted via rule for role {}", rule.role),
    }
}

/// Build the row-level predicate for the backend.
///
/// Scope clauses come first, then the rule's own expression with
/// `{user_id}`/`{team_id}` placeholders substituted. Clauses are conjoined
/// with AND.
fn build_row_filter(rule: &PolicyRuleDef, actor: &ActorContext, scope: ScopeKind) -> Option<String> {
    let mut filters: Vec<String> = Vec::new();

    match scope {
        ScopeKind::TeamScoped => {
            if !actor.team_access.is_empty() {
                let team_ids = actor.team_access.join("', '");
                filters.push(format!("teamId IN ('{team_ids}')"));
            }
        }
        ScopeKind::SelfOnly => {
            filters.push(format!("playerId = '{}'", actor.actor_id));
        }
        ScopeKind::All => {}
    }

    if let Some(expr) = &rule.row_filter {
        let team_id = actor
            .team_access
            .first()
            .map(|t| format!("'{t}'"))
            .unwrap_or_else(|| "''".to_string());
        let expr = expr
            .replace("{user_id}", &format!("'{}'", actor.actor_id))
            .replace("{team_id}", &team_id);
        filters.push(format!("({expr})"));
    }

    if filters.is_empty() {
        None
    } else {
        Some(filters.join(" AND "))
    }
}

/// Evaluate a single condition expression.
///
/// Supported forms: "User has role X" (case-insensitive) and
/// `lhs == 'literal'`. Unknown forms evaluate to true with a warning;
/// callers depend on this for forward compatibility.
fn evaluate_condition(condition: &str, actor: &ActorContext) -> bool {
    let condition = condition.trim();

    if let Some(role_name) = condition.strip_prefix("User has role") {
        return actor.role.eq_ignore_ascii_case(role_name.trim());
    }

    if let Some((left, right)) = condition.split_once("==") {
        let left = left.trim();
        let right = right.trim().trim_matches(|c| c == '\'' || c == '"');
        // Property equality is resolved against the target record by the
        // backend; here only the shape is checked.
        tracing::debug!(left, right, "Condition evaluation");
        return true;
    }

    tracing::warn!(condition, "Unknown condition format, defaulting to allow");
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Record;

    fn scout_policy() -> SecurityPolicyDef {
        let mut rule = PolicyRuleDef::new("scout", AccessLevel::Read);
        rule.column_filters = vec!["salary".to_string()];
        SecurityPolicyDef::global("player_policy", vec![rule])
    }

    fn actor(role: &str) -> ActorContext {
        ActorContext::new("u-1", role)
    }

    #[test]
    fn test_no_policy_denies() {
        let engine = PolicyEngine::new();
        let decision = engine.evaluate_access(&actor("scout"), "read", "object", None, None);
        assert!(!decision.allowed);
        assert_eq!(decision.reason, "No policy defined");
    }

    #[test]
    fn test_unmatched_role_denies_with_reason() {
        let engine = PolicyEngine::new();
        let policy = scout_policy();
        let decision =
            engine.evaluate_access(&actor("player"), "read", "object", None, Some(&policy));
        assert!(!decision.allowed);
        assert_eq!(decision.reason, "no rule found for role player");
    }

    #[test]
    fn test_matched_role_carries_column_filters() {
        let engine = PolicyEngine::new();
        let policy = scout_policy();
        let decision =
            engine.evaluate_access(&actor("scout"), "read", "object", None, Some(&policy));
        assert!(decision.allowed);
        assert_eq!(decision.column_filters, vec!["salary".to_string()]);
    }

    #[test]
    fn test_operation_not_allowed_for_level() {
        let engine = PolicyEngine::new();
        let policy = scout_policy();
        let decision =
            engine.evaluate_access(&actor("scout"), "execute", "object", None, Some(&policy));
        assert!(!decision.allowed);
        assert!(decision.reason.contains("not allowed for access level"));
    }

    #[test]
    fn test_wildcard_rule_applies_to_any_role() {
        let engine = PolicyEngine::new();
        let policy =
            SecurityPolicyDef::global("open", vec![PolicyRuleDef::new("*", AccessLevel::Read)]);
        let decision =
            engine.evaluate_access(&actor("anyone"), "list", "object", None, Some(&policy));
        assert!(decision.allowed);
    }

    #[test]
    fn test_exact_role_wins_over_wildcard() {
        let mut wildcard = PolicyRuleDef::new("*", AccessLevel::None);
        wildcard.priority = 100;
        let mut exact = PolicyRuleDef::new("coach", AccessLevel::Full);
        exact.priority = 50;
        let policy = SecurityPolicyDef::global("p", vec![wildcard, exact]);

        let engine = PolicyEngine::new();
        let decision =
            engine.evaluate_access(&actor("coach"), "write", "object", None, Some(&policy));
        assert!(decision.allowed);
    }

    #[test]
    fn test_priority_orders_rules() {
        let mut low = PolicyRuleDef::new("scout", AccessLevel::None);
        low.priority = 10;
        let mut high = PolicyRuleDef::new("scout", AccessLevel::Read);
        high.priority = 90;
        let policy = SecurityPolicyDef::global("p", vec![low, high]);

        let engine = PolicyEngine::new();
        let decision =
            engine.evaluate_access(&actor("scout"), "read", "object", None, Some(&policy));
        assert!(decision.allowed);
    }

    #[test]
    fn test_team_scoped_row_filter() {
        let mut rule = PolicyRuleDef::new("coach", AccessLevel::Read);
        rule.scope = Some(ScopeKind::TeamScoped);
        let policy = SecurityPolicyDef::global("p", vec![rule]);

        let engine = PolicyEngine::new();
        let coach = ActorContext::new("u-9", "coach")
            .with_teams(vec!["MTL".to_string(), "TOR".to_string()]);
        let decision = engine.evaluate_access(&coach, "read", "object", None, Some(&policy));
        assert_eq!(
            decision.row_filter.as_deref(),
            Some("teamId IN ('MTL', 'TOR')")
        );
    }

    #[test]
    fn test_self_only_row_filter_and_placeholder_substitution() {
        let mut rule = PolicyRuleDef::new("player", AccessLevel::SelfOnly);
        rule.scope = Some(ScopeKind::SelfOnly);
        rule.row_filter = Some("season = '2025-2026' AND ownerId = {user_id}".to_string());
        let policy = SecurityPolicyDef::global("p", vec![rule]);

        let engine = PolicyEngine::new();
        let player = ActorContext::new("8478463", "player");
        let decision = engine.evaluate_access(&player, "read", "object", None, Some(&policy));
        let filter = decision.row_filter.unwrap();
        assert!(filter.starts_with("playerId = '8478463' AND ("));
        assert!(filter.contains("ownerId = '8478463'"));
    }

    #[test]
    fn test_conditions_role_check() {
        let mut rule = PolicyRuleDef::new("scout", AccessLevel::Read);
        rule.conditions = vec!["User has role Scout".to_string()];
        let policy = SecurityPolicyDef::global("p", vec![rule.clone()]);

        let engine = PolicyEngine::new();
        let decision =
            engine.evaluate_access(&actor("scout"), "read", "object", None, Some(&policy));
        assert!(decision.allowed);

        rule.conditions = vec!["User has role Manager".to_string()];
        let policy = SecurityPolicyDef::global("p2", vec![rule]);
        let decision =
            engine.evaluate_access(&actor("scout"), "read", "object", None, Some(&policy));
        assert!(!decision.allowed);
        assert_eq!(decision.reason, "Rule conditions not met");
    }

    #[test]
    fn test_unknown_condition_defaults_to_allow() {
        let mut rule = PolicyRuleDef::new("scout", AccessLevel::Read);
        rule.conditions = vec!["the moon is full".to_string()];
        let policy = SecurityPolicyDef::global("p", vec![rule]);

        let engine = PolicyEngine::new();
        let decision =
            engine.evaluate_access(&actor("scout"), "read", "object", None, Some(&policy));
        assert!(decision.allowed);
    }

    #[test]
    fn test_decisions_are_deterministic() {
        let engine = PolicyEngine::new();
        let policy = scout_policy();
        let d1 = engine.evaluate_access(&actor("scout"), "read", "object", None, Some(&policy));
        let d2 = engine.evaluate_access(&actor("scout"), "read", "object", None, Some(&policy));
        assert_eq!(d1, d2);
    }

    #[test]
    fn test_column_filters_never_introduce_fields() {
        let engine = PolicyEngine::new();
        let record = Record::new()
            .with("playerId", "P1")
            .with("name", "A")
            .with("salary", 1000);

        let filtered =
            engine.apply_column_filters(&record, &["salary".to_string(), "ghost".to_string()]);
        assert_eq!(filtered.len(), 2);
        assert!(!filtered.contains("salary"));
        assert!(filtered.keys().all(|k| record.contains(k)));
    }

    #[test]
    fn test_preconditions() {
        let engine = PolicyEngine::new();
        let coach = actor("coach");
        assert!(engine
            .check_action_preconditions(&["User has role Coach".to_string()], &coach)
            .is_ok());
        let err = engine
            .check_action_preconditions(&["User has role Manager".to_string()], &coach)
            .unwrap_err();
        assert!(err.contains("Precondition not met"));
    }
}
