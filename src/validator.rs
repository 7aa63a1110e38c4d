//! Schema document validation.
//!
//! The validator never fails on malformed input: it walks the raw document
//! and returns an ordered issue list. Callers decide whether any error
//! terminates processing.

use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;

use crate::types::{AccessLevel, Cardinality, PropertyType, ResolverBackend, ScopeKind};

/// Severity of a validation issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// The document cannot be loaded as written.
    Error,
    /// Suspicious but loadable.
    Warning,
    /// Informational note.
    Info,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
            Self::Info => write!(f, "info"),
        }
    }
}

/// A single validation issue.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ValidationIssue {
    /// Issue severity.
    pub severity: Severity,
    /// Dotted path to the offending location.
    pub location: String,
    /// Human-readable message.
    pub message: String,
    /// Optional fix suggestion.
    pub suggestion: Option<String>,
}

/// Validates ontology schema documents.
#[derive(Debug, Default)]
pub struct SchemaValidator {
    issues: Vec<ValidationIssue>,
    object_types: BTreeSet<String>,
}

impl SchemaValidator {
    /// Create a validator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate a complete schema document, returning all issues found.
    pub fn validate(&mut self, schema: &Value) -> Vec<ValidationIssue> {
        self.issues.clear();
        self.object_types.clear();

        self.validate_metadata(schema.get("metadata"));

        match schema.get("object_types") {
            Some(object_types) => self.validate_object_types(object_types),
            None => self.error("schema", "Missing required 'object_types' section", None),
        }

        match schema.get("link_types") {
            Some(link_types) => self.validate_link_types(link_types),
            None => self.warning("schema", "No 'link_types' defined", None),
        }

        match schema.get("action_types") {
            Some(action_types) => self.validate_action_types(action_types),
            None => self.warning("schema", "No 'action_types' defined", None),
        }

        match schema.get("security_policies") {
            Some(policies) => self.validate_security_policies(policies),
            None => self.warning("schema", "No 'security_policies' defined", None),
        }

        std::mem::take(&mut self.issues)
    }

    fn validate_metadata(&mut self, metadata: Option<&Value>) {
        for field in ["author", "created", "status"] {
            let present = metadata
                .and_then(|m| m.get(field))
                .map(|v| !v.is_null())
                .unwrap_or(false);
            if !present {
                self.warning(
                    "metadata",
                    &format!("Missing recommended metadata field: {field}"),
                    None,
                );
            }
        }
    }

    fn validate_object_types(&mut self, object_types: &Value) {
        let Some(map) = object_types.as_object() else {
            self.error("object_types", "'object_types' must be a mapping", None);
            return;
        };
        // First pass collects names so links can reference forward.
        for name in map.keys() {
            self.object_types.insert(name.clone());
        }
        for (name, def) in map {
            self.validate_object_type(name, def);
        }
    }

    fn validate_object_type(&mut self, name: &str, def: &Value) {
        let location = format!("object_types.{name}");

        if def.get("primary_key").is_none() {
            self.error(&location, "Missing required 'primary_key' field", None);
        }

        let Some(properties) = def.get("properties") else {
            self.error(&location, "Missing required 'properties' field", None);
            return;
        };

        let primary_key = def.get("primary_key").and_then(|v| v.as_str());
        if let (Some(pk), Some(props)) = (primary_key, properties.as_object()) {
            if !props.contains_key(pk) {
                self.error(
                    &location,
                    &format!("Primary key '{pk}' not found in properties"),
                    Some(format!("Add property definition for '{pk}'")),
                );
            }
        }

        if let Some(props) = properties.as_object() {
            for (prop_name, prop_def) in props {
                self.validate_property(&format!("{location}.properties.{prop_name}"), prop_def);
            }
        }

        if let Some(resolver) = def.get("resolver") {
            self.validate_resolver(&format!("{location}.resolver"), resolver);
        }
    }

    fn validate_property(&mut self, location: &str, def: &Value) {
        let Some(prop_type) = def.get("type") else {
            self.error(location, "Missing required 'type' field", None);
            return;
        };

        let type_name = prop_type.as_str().unwrap_or("");
        if PropertyType::parse(type_name).is_none() {
            self.error(
                location,
                &format!("Invalid property type: {type_name}"),
                Some(format!("Valid types: {}", PropertyType::valid_names().join(", "))),
            );
        }

        if let Some(enum_field) = def.get("enum") {
            match enum_field.as_array() {
                None => self.error(location, "Property 'enum' must be a list", None),
                Some(values) if values.is_empty() => {
                    self.warning(location, "Empty enum list", None)
                }
                Some(_) => {}
            }
        }
    }

    fn validate_resolver(&mut self, location: &str, resolver: &Value) {
        let Some(backend) = resolver.get("backend").and_then(|v| v.as_str()) else {
            self.error(location, "Missing required 'backend' field in resolver", None);
            return;
        };

        if ResolverBackend::parse(backend).is_none() {
            self.warning(
                location,
                &format!("Unknown backend type: {backend}"),
                Some("Valid backends: bigquery, parquet, api, computed".to_string()),
            );
        }

        if backend == "bigquery" && resolver.get("table").is_none() {
            self.error(location, "BigQuery resolver missing 'table' field", None);
        }
        if backend == "parquet" && resolver.get("path").is_none() {
            self.error(location, "Parquet resolver missing 'path' field", None);
        }
    }

    fn validate_link_types(&mut self, link_types: &Value) {
        let Some(map) = link_types.as_object() else {
            self.error("link_types", "'link_types' must be a mapping", None);
            return;
        };
        for (name, def) in map {
            self.validate_link_type(name, def);
        }
    }

    fn validate_link_type(&mut self, name: &str, def: &Value) {
        let location = format!("link_types.{name}");

        for field in ["from_object", "to_object", "cardinality"] {
            if def.get(field).is_none() {
                self.error(&location, &format!("Missing required field: {field}"), None);
            }
        }

        for side in ["from_object", "to_object"] {
            if let Some(obj) = def.get(side).and_then(|v| v.as_str()) {
                if !self.object_types.contains(obj) {
                    self.error(
                        &location,
                        &format!("Link references unknown object type: {obj}"),
                        Some(format!("Define object type '{obj}' before referencing it")),
                    );
                }
            }
        }

        if let Some(cardinality) = def.get("cardinality").and_then(|v| v.as_str()) {
            if Cardinality::parse(cardinality).is_none() {
                self.error(
                    &location,
                    &format!("Invalid cardinality: {cardinality}"),
                    Some(format!(
                        "Valid cardinalities: {}",
                        Cardinality::valid_names().join(", ")
                    )),
                );
            }
        }

        match def.get("resolver") {
            None => self.warning(&location, "Link type missing resolver configuration", None),
            Some(resolver) => self.validate_link_resolver(&format!("{location}.resolver"), resolver),
        }
    }

    fn validate_link_resolver(&mut self, location: &str, resolver: &Value) {
        let Some(resolver_type) = resolver.get("type").and_then(|v| v.as_str()) else {
            self.error(location, "Missing required 'type' field", None);
            return;
        };

        match resolver_type {
            "foreign_key" => {
                if resolver.get("from_field").is_none() || resolver.get("to_field").is_none() {
                    self.error(
                        location,
                        "Foreign key resolver requires 'from_field' and 'to_field'",
                        None,
                    );
                }
            }
            "join_table" => {
                if resolver.get("table").is_none() {
                    self.error(location, "Join table resolver requires 'table' field", None);
                }
            }
            other => {
                self.warning(location, &format!("Unknown resolver type: {other}"), None)
            }
        }
    }

    fn validate_action_types(&mut self, action_types: &Value) {
        let Some(map) = action_types.as_object() else {
            self.error("action_types", "'action_types' must be a mapping", None);
            return;
        };
        for (name, def) in map {
            let location = format!("action_types.{name}");

            if def.get("input_schema").is_none() {
                self.warning(&location, "Action missing 'input_schema' definition", None);
            }
            if def.get("preconditions").is_none() {
                self.warning(&location, "Action missing 'preconditions' (security risk)", None);
            }
            if def.get("effects").is_none() {
                self.info(&location, "Action missing 'effects' documentation", None);
            }

            if let Some(params) = def.get("input_schema").and_then(|v| v.as_object()) {
                for (param_name, param_def) in params {
                    self.validate_property(
                        &format!("{location}.input_schema.{param_name}"),
                        param_def,
                    );
                }
            }
        }
    }

    fn validate_security_policies(&mut self, policies: &Value) {
        let Some(map) = policies.as_object() else {
            self.error("security_policies", "'security_policies' must be a mapping", None);
            return;
        };
        for (name, def) in map {
            let location = format!("security_policies.{name}");

            let Some(rules) = def.get("rules") else {
                self.error(&location, "Policy missing 'rules' field", None);
                continue;
            };
            let Some(rules) = rules.as_array() else {
                self.error(&location, "Policy 'rules' must be a list", None);
                continue;
            };

            for (idx, rule) in rules.iter().enumerate() {
                let rule_location = format!("{location}.rules[{idx}]");

                if rule.get("role").is_none() {
                    self.error(&rule_location, "Rule missing 'role' field", None);
                }

                match rule.get("access").and_then(|v| v.as_str()) {
                    None => self.error(&rule_location, "Rule missing 'access' field", None),
                    Some(access) if AccessLevel::parse(access).is_none() => {
                        self.error(
                            &rule_location,
                            &format!("Invalid access level: {access}"),
                            Some(format!(
                                "Valid levels: {}",
                                AccessLevel::valid_names().join(", ")
                            )),
                        );
                    }
                    Some(_) => {}
                }

                if let Some(scope) = rule.get("scope").and_then(|v| v.as_str()) {
                    if ScopeKind::parse(scope).is_none() {
                        self.warning(
                            &rule_location,
                            &format!("Unknown scope: {scope}"),
                            Some(format!(
                                "Valid scopes: {}",
                                ScopeKind::valid_names().join(", ")
                            )),
                        );
                    }
                }
            }
        }
    }

    fn error(&mut self, location: &str, message: &str, suggestion: Option<String>) {
        self.push(Severity::Error, location, message, suggestion);
    }

    fn warning(&mut self, location: &str, message: &str, suggestion: Option<String>) {
        self.push(Severity::Warning, location, message, suggestion);
    }

    fn info(&mut self, location: &str, message: &str, suggestion: Option<String>) {
        self.push(Severity::Info, location, message, suggestion);
    }

    fn push(&mut self, severity: Severity, location: &str, message: &str, suggestion: Option<String>) {
        self.issues.push(ValidationIssue {
            severity,
            location: location.to_string(),
            message: message.to_string(),
            suggestion,
        });
    }
}

/// Count issues of a given severity.
pub fn count_severity(issues: &[ValidationIssue], severity: Severity) -> usize {
    issues.iter().filter(|i| i.severity == severity).count()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn validate(value: serde_json::Value) -> Vec<ValidationIssue> {
        SchemaValidator::new().validate(&value)
    }

    fn errors(issues: &[ValidationIssue]) -> Vec<&ValidationIssue> {
        issues.iter().filter(|i| i.severity == Severity::Error).collect()
    }

    #[test]
    fn test_missing_object_types_is_error() {
        let issues = validate(json!({}));
        assert!(errors(&issues)
            .iter()
            .any(|i| i.message.contains("object_types")));
    }

    #[test]
    fn test_missing_optional_sections_warn() {
        let issues = validate(json!({
            "object_types": {}
        }));
        let warnings: Vec<_> = issues
            .iter()
            .filter(|i| i.severity == Severity::Warning)
            .collect();
        assert!(warnings.iter().any(|i| i.message.contains("link_types")));
        assert!(warnings.iter().any(|i| i.message.contains("action_types")));
        assert!(warnings.iter().any(|i| i.message.contains("security_policies")));
    }

    #[test]
    fn test_primary_key_must_be_declared() {
        let issues = validate(json!({
            "object_types": {
                "Player": {
                    "primary_key": "playerId",
                    "properties": {
                        "name": {"type": "string"}
                    }
                }
            }
        }));
        assert!(errors(&issues)
            .iter()
            .any(|i| i.message.contains("Primary key 'playerId' not found")));
    }

    #[test]
    fn test_unknown_property_type_is_error() {
        let issues = validate(json!({
            "object_types": {
                "Player": {
                    "primary_key": "playerId",
                    "properties": {
                        "playerId": {"type": "uuid"}
                    }
                }
            }
        }));
        let errs = errors(&issues);
        assert!(errs.iter().any(|i| i.message.contains("Invalid property type: uuid")));
        assert!(errs[0].suggestion.is_some() || errs.iter().any(|i| i.suggestion.is_some()));
    }

    #[test]
    fn test_empty_enum_warns() {
        let issues = validate(json!({
            "object_types": {
                "Player": {
                    "primary_key": "playerId",
                    "properties": {
                        "playerId": {"type": "string", "enum": []}
                    }
                }
            }
        }));
        assert!(issues
            .iter()
            .any(|i| i.severity == Severity::Warning && i.message.contains("Empty enum")));
    }

    #[test]
    fn test_bigquery_resolver_requires_table() {
        let issues = validate(json!({
            "object_types": {
                "Player": {
                    "primary_key": "playerId",
                    "properties": {"playerId": {"type": "string"}},
                    "resolver": {"backend": "bigquery"}
                }
            }
        }));
        assert!(errors(&issues)
            .iter()
            .any(|i| i.message.contains("missing 'table'")));
    }

    #[test]
    fn test_link_to_unknown_object_is_error() {
        let issues = validate(json!({
            "object_types": {
                "Player": {
                    "primary_key": "playerId",
                    "properties": {"playerId": {"type": "string"}}
                }
            },
            "link_types": {
                "player_contracts": {
                    "from_object": "Player",
                    "to_object": "Contract",
                    "cardinality": "one_to_many",
                    "resolver": {"type": "foreign_key", "from_field": "playerId", "to_field": "playerId"}
                }
            }
        }));
        assert!(errors(&issues)
            .iter()
            .any(|i| i.message.contains("unknown object type: Contract")));
    }

    #[test]
    fn test_join_table_resolver_requires_table() {
        let issues = validate(json!({
            "object_types": {
                "Player": {"primary_key": "playerId", "properties": {"playerId": {"type": "string"}}},
                "Team": {"primary_key": "teamId", "properties": {"teamId": {"type": "string"}}}
            },
            "link_types": {
                "team_players": {
                    "from_object": "Team",
                    "to_object": "Player",
                    "cardinality": "many_to_many",
                    "resolver": {"type": "join_table"}
                }
            }
        }));
        assert!(errors(&issues)
            .iter()
            .any(|i| i.message.contains("requires 'table'")));
    }

    #[test]
    fn test_policy_rules_closed_sets() {
        let issues = validate(json!({
            "object_types": {},
            "security_policies": {
                "p": {
                    "rules": [
                        {"role": "scout", "access": "superuser"},
                        {"role": "coach", "access": "read", "scope": "galaxy"}
                    ]
                }
            }
        }));
        assert!(errors(&issues)
            .iter()
            .any(|i| i.message.contains("Invalid access level: superuser")));
        assert!(issues
            .iter()
            .any(|i| i.severity == Severity::Warning && i.message.contains("Unknown scope: galaxy")));
    }

    #[test]
    fn test_clean_schema_has_no_errors() {
        let issues = validate(json!({
            "metadata": {"author": "staff", "created": "2025-10-01", "status": "draft"},
            "object_types": {
                "Player": {
                    "primary_key": "playerId",
                    "properties": {"playerId": {"type": "string"}},
                    "resolver": {"backend": "parquet", "path": "analytics/players.parquet"}
                }
            },
            "link_types": {},
            "action_types": {},
            "security_policies": {}
        }));
        assert_eq!(count_severity(&issues, Severity::Error), 0);
    }
}
