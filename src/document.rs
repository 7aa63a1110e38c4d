//! Human-authored schema documents.
//!
//! The ingestion contract is a YAML document with `object_types`,
//! `link_types`, `action_types`, and `security_policies` sections. The
//! document is parsed into a JSON value first so the validator can inspect
//! missing or malformed sections without failing, then converted into the
//! typed definitions the store persists.

use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::CoreError;
use crate::types::{
    AccessLevel, ActionTypeDef, Cardinality, LinkResolverConfig, LinkResolverKind, LinkTypeDef,
    ObjectTypeDef, PolicyRuleDef, PolicyTargetKind, PropertyDef, PropertyType, ResolverDescriptor,
    ScopeKind, SecurityPolicyDef,
};

/// Default namespace when the document omits one.
pub const DEFAULT_NAMESPACE: &str = "nhl.analytics";

/// A parsed schema document.
///
/// Wraps the raw value; accessors are lenient because validation is the
/// validator's job, not the parser's.
#[derive(Debug, Clone)]
pub struct SchemaDocument(Value);

impl SchemaDocument {
    /// Wrap an already-parsed document value.
    pub fn from_value(value: Value) -> Self {
        Self(value)
    }

    /// Parse a YAML document.
    pub fn from_yaml_str(text: &str) -> Result<Self, CoreError> {
        let value: Value = serde_yaml::from_str(text)
            .map_err(|e| CoreError::InvalidRequest(format!("Malformed schema document: {e}")))?;
        Ok(Self(value))
    }

    /// Read and parse a YAML document from disk.
    pub fn from_yaml_file(path: &Path) -> Result<Self, CoreError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            CoreError::InvalidRequest(format!("Cannot read schema file {}: {e}", path.display()))
        })?;
        Self::from_yaml_str(&text)
    }

    /// Raw document value.
    pub fn value(&self) -> &Value {
        &self.0
    }

    /// Declared version string, defaulting to "0.0.0".
    pub fn version(&self) -> String {
        self.str_field("version").unwrap_or("0.0.0").to_string()
    }

    /// Declared namespace, defaulting to [`DEFAULT_NAMESPACE`].
    pub fn namespace(&self) -> String {
        self.str_field("namespace")
            .unwrap_or(DEFAULT_NAMESPACE)
            .to_string()
    }

    /// Declared description, defaulting to empty.
    pub fn description(&self) -> String {
        self.str_field("description").unwrap_or("").to_string()
    }

    /// Document metadata section.
    pub fn metadata(&self) -> Option<&Value> {
        self.0.get("metadata")
    }

    /// Changelog entries from the metadata section.
    pub fn changelog(&self) -> Option<Value> {
        self.metadata().and_then(|m| m.get("changelog")).cloned()
    }

    fn str_field(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v| v.as_str())
    }

    /// Convert the document into typed definitions.
    ///
    /// Callers should validate first; conversion is forgiving and applies
    /// the loader defaults (type `string`, cardinality `one_to_many`,
    /// target `global`, rule priority `100 - index`).
    pub fn to_bundle(&self) -> SchemaBundle {
        SchemaBundle {
            object_types: self.parse_object_types(),
            link_types: self.parse_link_types(),
            action_types: self.parse_action_types(),
            security_policies: self.parse_security_policies(),
        }
    }

    fn parse_object_types(&self) -> Vec<ObjectTypeDef> {
        let mut out = Vec::new();
        let Some(section) = self.0.get("object_types").and_then(|v| v.as_object()) else {
            return out;
        };
        for (name, def) in section {
            let properties = def
                .get("properties")
                .and_then(|v| v.as_object())
                .map(|props| {
                    props
                        .iter()
                        .map(|(prop_name, prop_def)| parse_property(prop_name, prop_def))
                        .collect()
                })
                .unwrap_or_default();

            out.push(ObjectTypeDef {
                name: name.clone(),
                description: str_or_empty(def, "description"),
                primary_key: str_or_empty(def, "primary_key"),
                resolver: def.get("resolver").and_then(parse_resolver_descriptor),
                security_policy: opt_str(def, "security_policy"),
                properties,
            });
        }
        out
    }

    fn parse_link_types(&self) -> Vec<LinkTypeDef> {
        let mut out = Vec::new();
        let Some(section) = self.0.get("link_types").and_then(|v| v.as_object()) else {
            return out;
        };
        for (name, def) in section {
            out.push(LinkTypeDef {
                name: name.clone(),
                description: str_or_empty(def, "description"),
                from_object: str_or_empty(def, "from_object"),
                to_object: str_or_empty(def, "to_object"),
                cardinality: def
                    .get("cardinality")
                    .and_then(|v| v.as_str())
                    .and_then(Cardinality::parse)
                    .unwrap_or(Cardinality::OneToMany),
                resolver: def.get("resolver").and_then(parse_link_resolver),
                security_policy: opt_str(def, "security_policy"),
            });
        }
        out
    }

    fn parse_action_types(&self) -> Vec<ActionTypeDef> {
        let mut out = Vec::new();
        let Some(section) = self.0.get("action_types").and_then(|v| v.as_object()) else {
            return out;
        };
        for (name, def) in section {
            out.push(ActionTypeDef {
                name: name.clone(),
                description: str_or_empty(def, "description"),
                input_schema: def
                    .get("input_schema")
                    .cloned()
                    .unwrap_or_else(|| Value::Object(Default::default())),
                preconditions: str_list(def, "preconditions"),
                effects: str_list(def, "effects"),
                security_policy: str_or_empty(def, "security_policy"),
                timeout_seconds: ActionTypeDef::clamp_timeout(
                    def.get("timeout_seconds").and_then(|v| v.as_i64()).unwrap_or(30),
                ),
                is_idempotent: def
                    .get("is_idempotent")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false),
            });
        }
        out
    }

    fn parse_security_policies(&self) -> Vec<SecurityPolicyDef> {
        let mut out = Vec::new();
        let Some(section) = self.0.get("security_policies").and_then(|v| v.as_object()) else {
            return out;
        };
        for (name, def) in section {
            let rules = def
                .get("rules")
                .and_then(|v| v.as_array())
                .map(|rules| {
                    rules
                        .iter()
                        .enumerate()
                        .map(|(idx, rule)| parse_rule(rule, idx))
                        .collect()
                })
                .unwrap_or_default();

            out.push(SecurityPolicyDef {
                name: name.clone(),
                description: str_or_empty(def, "description"),
                target_type: def
                    .get("target_type")
                    .and_then(|v| v.as_str())
                    .and_then(PolicyTargetKind::parse)
                    .unwrap_or(PolicyTargetKind::Global),
                target_ref: opt_str(def, "target_ref"),
                rules,
            });
        }
        out
    }
}

/// All typed definitions from one document, written in one transaction.
#[derive(Debug, Clone, Default)]
pub struct SchemaBundle {
    /// Object type definitions.
    pub object_types: Vec<ObjectTypeDef>,
    /// Link type definitions.
    pub link_types: Vec<LinkTypeDef>,
    /// Action type definitions.
    pub action_types: Vec<ActionTypeDef>,
    /// Security policy definitions.
    pub security_policies: Vec<SecurityPolicyDef>,
}

fn parse_property(name: &str, def: &Value) -> PropertyDef {
    PropertyDef {
        name: name.to_string(),
        property_type: def
            .get("type")
            .and_then(|v| v.as_str())
            .and_then(PropertyType::parse)
            .unwrap_or(PropertyType::String),
        required: def.get("required").and_then(|v| v.as_bool()).unwrap_or(false),
        description: str_or_empty(def, "description"),
        enum_values: def.get("enum").and_then(|v| v.as_array()).map(|values| {
            values
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        }),
        default_value: def
            .get("default")
            .map(|v| v.as_str().map(str::to_string).unwrap_or_else(|| v.to_string())),
        constraints: def.get("constraints").cloned(),
    }
}

fn parse_resolver_descriptor(resolver: &Value) -> Option<ResolverDescriptor> {
    let obj = resolver.as_object()?;
    let mut config: BTreeMap<String, Value> = BTreeMap::new();
    for (k, v) in obj {
        config.insert(k.clone(), v.clone());
    }
    Some(ResolverDescriptor {
        backend: obj
            .get("backend")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string(),
        config,
    })
}

fn parse_link_resolver(resolver: &Value) -> Option<LinkResolverConfig> {
    let obj = resolver.as_object()?;
    let kind = obj
        .get("type")
        .and_then(|v| v.as_str())
        .and_then(LinkResolverKind::parse)?;
    Some(LinkResolverConfig {
        kind,
        table: obj.get("table").and_then(|v| v.as_str()).map(str::to_string),
        from_field: obj
            .get("from_field")
            .and_then(|v| v.as_str())
            .map(str::to_string),
        to_field: obj
            .get("to_field")
            .and_then(|v| v.as_str())
            .map(str::to_string),
    })
}

fn parse_rule(rule: &Value, index: usize) -> PolicyRuleDef {
    PolicyRuleDef {
        role: str_or_empty(rule, "role"),
        access: rule
            .get("access")
            .and_then(|v| v.as_str())
            .and_then(AccessLevel::parse)
            .unwrap_or(AccessLevel::None),
        scope: rule
            .get("scope")
            .and_then(|v| v.as_str())
            .and_then(ScopeKind::parse),
        column_filters: str_list(rule, "column_filters"),
        row_filter: opt_str(rule, "row_filter"),
        conditions: str_list(rule, "conditions"),
        // Earlier rules win: priority descends with document order.
        priority: 100 - index as i32,
    }
}

fn str_or_empty(value: &Value, key: &str) -> String {
    value
        .get(key)
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string()
}

fn opt_str(value: &Value, key: &str) -> Option<String> {
    value.get(key).and_then(|v| v.as_str()).map(str::to_string)
}

fn str_list(value: &Value, key: &str) -> Vec<String> {
    value
        .get(key)
        .and_then(|v| v.as_array())
        .map(|items| {
            items
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}
