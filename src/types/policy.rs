//! Security policy and rule definitions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Access level granted by a policy rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessLevel {
    /// No operations permitted.
    None,
    /// Read-style operations: read, list, get.
    Read,
    /// Every operation.
    Full,
    /// Action execution: execute, invoke.
    Execute,
    /// Reads restricted to the actor's own rows: read, get (not list).
    SelfOnly,
}

impl AccessLevel {
    /// Parse access level from its document spelling.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "none" => Some(Self::None),
            "read" => Some(Self::Read),
            "full" => Some(Self::Full),
            "execute" => Some(Self::Execute),
            "self_only" => Some(Self::SelfOnly),
            _ => None,
        }
    }

    /// All valid document spellings.
    pub fn valid_names() -> &'static [&'static str] {
        &["none", "read", "full", "execute", "self_only"]
    }

    /// Whether this level permits the named operation.
    ///
    /// `self_only` maps to `{read, get}` only; `list` is excluded, matching
    /// the behavior callers already depend on.
    pub fn allows(&self, operation: &str) -> bool {
        match self {
            Self::None => false,
            Self::Full => true,
            Self::Read => matches!(operation, "read" | "list" | "get"),
            Self::Execute => matches!(operation, "execute" | "invoke"),
            Self::SelfOnly => matches!(operation, "read" | "get"),
        }
    }
}

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::None => "none",
            Self::Read => "read",
            Self::Full => "full",
            Self::Execute => "execute",
            Self::SelfOnly => "self_only",
        };
        write!(f, "{s}")
    }
}

/// Row scope attached to a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeKind {
    /// All rows.
    All,
    /// Rows belonging to the actor's teams.
    TeamScoped,
    /// Rows belonging to the actor alone.
    SelfOnly,
}

impl ScopeKind {
    /// Parse scope from its document spelling.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "all" => Some(Self::All),
            "team_scoped" => Some(Self::TeamScoped),
            "self_only" => Some(Self::SelfOnly),
            _ => None,
        }
    }

    /// All valid document spellings.
    pub fn valid_names() -> &'static [&'static str] {
        &["all", "team_scoped", "self_only"]
    }
}

impl fmt::Display for ScopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::All => "all",
            Self::TeamScoped => "team_scoped",
            Self::SelfOnly => "self_only",
        };
        write!(f, "{s}")
    }
}

/// Target category a policy governs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyTargetKind {
    /// An object type.
    Object,
    /// A link type.
    Link,
    /// An action type.
    Action,
    /// A single property.
    Property,
    /// The whole schema.
    Global,
}

impl PolicyTargetKind {
    /// Parse target kind from its document spelling.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "object" => Some(Self::Object),
            "link" => Some(Self::Link),
            "action" => Some(Self::Action),
            "property" => Some(Self::Property),
            "global" => Some(Self::Global),
            _ => None,
        }
    }
}

impl fmt::Display for PolicyTargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Object => "object",
            Self::Link => "link",
            Self::Action => "action",
            Self::Property => "property",
            Self::Global => "global",
        };
        write!(f, "{s}")
    }
}

/// A rule within a security policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyRuleDef {
    /// Role the rule applies to; `*` matches any role.
    pub role: String,
    /// Granted access level.
    pub access: AccessLevel,
    /// Optional row scope.
    pub scope: Option<ScopeKind>,
    /// Field names stripped from every returned record.
    pub column_filters: Vec<String>,
    /// Backend-interpretable row predicate with `{user_id}`/`{team_id}`
    /// placeholders.
    pub row_filter: Option<String>,
    /// Condition expressions evaluated against the actor context.
    pub conditions: Vec<String>,
    /// Higher priority is tried first.
    pub priority: i32,
}

impl PolicyRuleDef {
    /// Create a rule with defaults matching the document loader.
    pub fn new(role: impl Into<String>, access: AccessLevel) -> Self {
        Self {
            role: role.into(),
            access,
            scope: None,
            column_filters: Vec::new(),
            row_filter: None,
            conditions: Vec::new(),
            priority: 100,
        }
    }

    /// Whether this rule matches any role.
    pub fn is_wildcard(&self) -> bool {
        self.role == "*"
    }
}

/// Named collection of rules over a target category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityPolicyDef {
    /// Policy name, unique within a schema version.
    pub name: String,
    /// Free-form description.
    pub description: String,
    /// Target category.
    pub target_type: PolicyTargetKind,
    /// Optional target reference (object/link/action/property name).
    pub target_ref: Option<String>,
    /// Owned rules (cascade on delete).
    pub rules: Vec<PolicyRuleDef>,
}

impl SecurityPolicyDef {
    /// Create a global policy with the given rules.
    pub fn global(name: impl Into<String>, rules: Vec<PolicyRuleDef>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            target_type: PolicyTargetKind::Global,
            target_ref: None,
            rules,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_access_level_operation_mapping() {
        assert!(AccessLevel::Full.allows("write"));
        assert!(AccessLevel::Read.allows("list"));
        assert!(!AccessLevel::Read.allows("execute"));
        assert!(AccessLevel::Execute.allows("invoke"));
        assert!(!AccessLevel::Execute.allows("read"));
        assert!(!AccessLevel::None.allows("read"));
    }

    #[test]
    fn test_self_only_excludes_list() {
        assert!(AccessLevel::SelfOnly.allows("read"));
        assert!(AccessLevel::SelfOnly.allows("get"));
        assert!(!AccessLevel::SelfOnly.allows("list"));
    }

    #[test]
    fn test_wildcard_rule() {
        let rule = PolicyRuleDef::new("*", AccessLevel::Read);
        assert!(rule.is_wildcard());
        assert!(!PolicyRuleDef::new("scout", AccessLevel::Read).is_wildcard());
    }

    #[test]
    fn test_scope_parse() {
        assert_eq!(ScopeKind::parse("team_scoped"), Some(ScopeKind::TeamScoped));
        assert!(ScopeKind::parse("org_scoped").is_none());
    }
}
