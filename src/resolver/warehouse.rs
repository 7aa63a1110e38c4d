//! Warehouse resolver for relational analytics tables.
//!
//! Builds parameterised SQL against `project.dataset.table` qualified
//! names and executes it through the [`WarehouseClient`] seam; the actual
//! warehouse driver lives outside the core and appears here only by its
//! shape.
//!
//! Naming conventions when no explicit binding is registered:
//! - table: `snake_case(object_type)` + `s` (Player -> players)
//! - primary key: `camelCase(object_type)` + `Id` (Player -> playerId)

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::{FilterMap, Resolver, ResolverConfig, ResolverError};
use crate::types::{LinkResolverConfig, LinkResolverKind, Record};

/// Typed value for a named query parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryParamValue {
    /// Boolean parameter.
    Bool(bool),
    /// 64-bit integer parameter.
    Int(i64),
    /// 64-bit float parameter.
    Float(f64),
    /// String parameter.
    Str(String),
    /// String-array parameter, expanded via `IN UNNEST(@name)`.
    StrArray(Vec<String>),
}

impl QueryParamValue {
    /// Infer the parameter type from a JSON value, defaulting to string.
    pub fn infer(value: &serde_json::Value) -> Self {
        match value {
            serde_json::Value::Bool(b) => Self::Bool(*b),
            serde_json::Value::Number(n) if n.is_i64() => Self::Int(n.as_i64().unwrap_or(0)),
            serde_json::Value::Number(n) => Self::Float(n.as_f64().unwrap_or(0.0)),
            serde_json::Value::Array(items) => Self::StrArray(
                items
                    .iter()
                    .map(|v| match v {
                        serde_json::Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect(),
            ),
            serde_json::Value::String(s) => Self::Str(s.clone()),
            other => Self::Str(other.to_string()),
        }
    }
}

/// Named query parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryParam {
    /// Parameter name without the `@` prefix.
    pub name: String,
    /// Typed value.
    pub value: QueryParamValue,
}

impl QueryParam {
    /// Create a parameter.
    pub fn new(name: impl Into<String>, value: QueryParamValue) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }
}

/// Execution seam for the external warehouse driver.
#[async_trait]
pub trait WarehouseClient: Send + Sync {
    /// Run a parameterised query and return the result rows.
    async fn execute(
        &self,
        query: &str,
        params: &[QueryParam],
    ) -> Result<Vec<Record>, ResolverError>;
}

#[derive(Debug, Clone)]
struct TableBinding {
    table: String,
    primary_key: String,
}

/// Resolver for relational warehouse tables.
pub struct WarehouseResolver {
    project_id: String,
    dataset_id: String,
    client: Arc<dyn WarehouseClient>,
    config: ResolverConfig,
    bindings: RwLock<BTreeMap<String, TableBinding>>,
}

impl WarehouseResolver {
    /// Create a resolver for the given project/dataset.
    pub fn new(
        project_id: impl Into<String>,
        dataset_id: impl Into<String>,
        client: Arc<dyn WarehouseClient>,
        config: ResolverConfig,
    ) -> Self {
        let project_id = project_id.into();
        let dataset_id = dataset_id.into();
        tracing::info!(project = %project_id, dataset = %dataset_id, "Warehouse resolver initialized");
        Self {
            project_id,
            dataset_id,
            client,
            config,
            bindings: RwLock::new(BTreeMap::new()),
        }
    }

    /// Register an explicit table/primary-key binding for an object type,
    /// overriding the naming conventions.
    pub fn register_object_mapping(
        &self,
        object_type: impl Into<String>,
        table: impl Into<String>,
        primary_key: impl Into<String>,
    ) {
        let object_type = object_type.into();
        self.bindings.write().insert(
            object_type.clone(),
            TableBinding {
                table: table.into(),
                primary_key: primary_key.into(),
            },
        );
        tracing::debug!(object_type = %object_type, "Registered warehouse object mapping");
    }

    /// Number of registered bindings.
    pub fn num_bindings(&self) -> usize {
        self.bindings.read().len()
    }

    fn table_and_pk(&self, object_type: &str) -> (String, String) {
        if let Some(binding) = self.bindings.read().get(object_type) {
            return (binding.table.clone(), binding.primary_key.clone());
        }
        (
            format!("{}s", to_snake_case(object_type)),
            default_pk_column(object_type),
        )
    }

    fn qualified_table(&self, table: &str) -> String {
        format!("`{}.{}.{}`", self.project_id, self.dataset_id, table)
    }

    fn column_list(properties: Option<&[String]>, table_alias: Option<&str>) -> String {
        match properties {
            None | Some([]) => match table_alias {
                Some(alias) => format!("{alias}.*"),
                None => "*".to_string(),
            },
            Some(props) => props
                .iter()
                .map(|p| match table_alias {
                    Some(alias) => format!("{alias}.{p}"),
                    None => p.clone(),
                })
                .collect::<Vec<_>>()
                .join(", "),
        }
    }

    fn build_where_clause(filters: &FilterMap) -> (String, Vec<QueryParam>) {
        let mut conditions = Vec::new();
        let mut params = Vec::new();

        for (idx, (field, value)) in filters.iter().enumerate() {
            let param_name = format!("param_{idx}");
            let param_value = QueryParamValue::infer(value);
            match param_value {
                QueryParamValue::StrArray(_) => {
                    conditions.push(format!("{field} IN UNNEST(@{param_name})"));
                }
                _ => {
                    conditions.push(format!("{field} = @{param_name}"));
                }
            }
            params.push(QueryParam::new(param_name, param_value));
        }

        (conditions.join(" AND "), params)
    }

    async fn traverse_foreign_key(
        &self,
        from_object_id: &str,
        to_object_type: &str,
        link_config: &LinkResolverConfig,
        properties: Option<&[String]>,
        limit: Option<usize>,
    ) -> Result<Vec<Record>, ResolverError> {
        let to_field = link_config.to_field.as_deref().ok_or_else(|| {
            ResolverError::new("bigquery", "Foreign key link missing 'to_field' in config")
        })?;

        let mut filters = FilterMap::new();
        filters.insert(
            to_field.to_string(),
            serde_json::Value::String(from_object_id.to_string()),
        );
        self.get_by_filter(to_object_type, &filters, properties, limit, None, None)
            .await
    }

    async fn traverse_join_table(
        &self,
        from_object_id: &str,
        to_object_type: &str,
        link_config: &LinkResolverConfig,
        properties: Option<&[String]>,
        limit: Option<usize>,
    ) -> Result<Vec<Record>, ResolverError> {
        let (join_table, from_field, to_field) = match (
            link_config.table.as_deref(),
            link_config.from_field.as_deref(),
            link_config.to_field.as_deref(),
        ) {
            (Some(t), Some(f), Some(to)) => (t, f, to),
            _ => {
                return Err(ResolverError::new(
                    "bigquery",
                    "Join table link missing required config: table, from_field, to_field",
                ))
            }
        };

        let (to_table, to_pk) = self.table_and_pk(to_object_type);
        let columns = Self::column_list(properties, Some("t"));
        let (final_limit, _) = self.config.apply_row_limit(limit, None);

        let query = format!(
            "SELECT {columns}\nFROM {} t\nINNER JOIN {} j\n    ON t.{to_pk} = j.{to_field}\nWHERE j.{from_field} = @from_id\nLIMIT {final_limit}",
            self.qualified_table(&to_table),
            self.qualified_table(join_table),
        );

        let params = vec![QueryParam::new(
            "from_id",
            QueryParamValue::Str(from_object_id.to_string()),
        )];

        self.client.execute(&query, &params).await
    }
}

#[async_trait]
impl Resolver for WarehouseResolver {
    fn backend_name(&self) -> &'static str {
        "bigquery"
    }

    async fn get_by_id(
        &self,
        object_type: &str,
        object_id: &str,
        properties: Option<&[String]>,
    ) -> Result<Option<Record>, ResolverError> {
        let (table, pk) = self.table_and_pk(object_type);
        let columns = Self::column_list(properties, None);

        let query = format!(
            "SELECT {columns}\nFROM {}\nWHERE {pk} = @object_id\nLIMIT 1",
            self.qualified_table(&table),
        );
        let params = vec![QueryParam::new(
            "object_id",
            QueryParamValue::Str(object_id.to_string()),
        )];

        let rows = self.client.execute(&query, &params).await?;
        Ok(rows.into_iter().next())
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
        let (table, _) = self.table_and_pk(object_type);
        let columns = Self::column_list(properties, None);
        let (where_clause, params) = Self::build_where_clause(filters);
        let (final_limit, final_offset) = self.config.apply_row_limit(limit, offset);

        let mut query = format!("SELECT {columns}\nFROM {}", self.qualified_table(&table));

        let mut predicates = Vec::new();
        if !where_clause.is_empty() {
            predicates.push(where_clause);
        }
        if let Some(row_filter) = row_filter {
            // Policy-authored predicate, pushed down verbatim.
            predicates.push(format!("({row_filter})"));
        }
        if !predicates.is_empty() {
            query.push_str(&format!("\nWHERE {}", predicates.join(" AND ")));
        }

        query.push_str(&format!("\nLIMIT {final_limit}"));
        if final_offset > 0 {
            query.push_str(&format!("\nOFFSET {final_offset}"));
        }

        self.client.execute(&query, &params).await
    }

    async fn traverse_link(
        &self,
        _from_object_type: &str,
        from_object_id: &str,
        link_type: &str,
        to_object_type: &str,
        link_config: &LinkResolverConfig,
        properties: Option<&[String]>,
        limit: Option<usize>,
    ) -> Result<Vec<Record>, ResolverError> {
        match link_config.kind {
            LinkResolverKind::ForeignKey => {
                self.traverse_foreign_key(
                    from_object_id,
                    to_object_type,
                    link_config,
                    properties,
                    limit,
                )
                .await
            }
            LinkResolverKind::JoinTable => {
                tracing::debug!(link_type, "Traversing join table link");
                self.traverse_join_table(
                    from_object_id,
                    to_object_type,
                    link_config,
                    properties,
                    limit,
                )
                .await
            }
        }
    }
}

/// Convert CamelCase to snake_case.
pub fn to_snake_case(text: &str) -> String {
    use std::sync::OnceLock;
    static STEP1: OnceLock<regex_lite::Regex> = OnceLock::new();
    static STEP2: OnceLock<regex_lite::Regex> = OnceLock::new();

    let step1 = STEP1
        .get_or_init(|| regex_lite::Regex::new(r"(.)([A-Z][a-z]+)").expect("static pattern"));
    let step2 = STEP2
        .get_or_init(|| regex_lite::Regex::new(r"([a-z0-9])([A-Z])").expect("static pattern"));

    let intermediate = step1.replace_all(text, "${1}_${2}");
    step2.replace_all(&intermediate, "${1}_${2}").to_lowercase()
}

/// Default primary-key column for an object type: lower-camel name + `Id`.
pub fn default_pk_column(object_type: &str) -> String {
    let mut chars = object_type.chars();
    match chars.next() {
        Some(first) => format!("{}{}Id", first.to_lowercase(), chars.as_str()),
        None => "id".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    /// Client that records queries and replies with canned rows.
    struct RecordingClient {
        queries: Mutex<Vec<(String, Vec<QueryParam>)>>,
        rows: Vec<Record>,
    }

    impl RecordingClient {
        fn new(rows: Vec<Record>) -> Arc<Self> {
            Arc::new(Self {
                queries: Mutex::new(Vec::new()),
                rows,
            })
        }

        fn last_query(&self) -> (String, Vec<QueryParam>) {
            self.queries.lock().last().cloned().expect("query recorded")
        }
    }

    #[async_trait]
    impl WarehouseClient for RecordingClient {
        async fn execute(
            &self,
            query: &str,
            params: &[QueryParam],
        ) -> Result<Vec<Record>, ResolverError> {
            self.queries
                .lock()
                .push((query.to_string(), params.to_vec()));
            Ok(self.rows.clone())
        }
    }

    fn resolver(client: Arc<RecordingClient>) -> WarehouseResolver {
        WarehouseResolver::new("proj", "analytics", client, ResolverConfig::default())
    }

    #[test]
    fn test_snake_case_conventions() {
        assert_eq!(to_snake_case("Player"), "player");
        assert_eq!(to_snake_case("TeamRoster"), "team_roster");
        assert_eq!(to_snake_case("XGModel"), "xg_model");
        assert_eq!(default_pk_column("Player"), "playerId");
        assert_eq!(default_pk_column("TeamRoster"), "teamRosterId");
    }

    #[tokio::test]
    async fn test_get_by_id_query_shape() {
        let client = RecordingClient::new(vec![Record::new().with("playerId", "P1")]);
        let resolver = resolver(Arc::clone(&client));

        let record = resolver.get_by_id("Player", "P1", None).await.unwrap();
        assert!(record.is_some());

        let (query, params) = client.last_query();
        assert!(query.contains("FROM `proj.analytics.players`"));
        assert!(query.contains("WHERE playerId = @object_id"));
        assert!(query.contains("LIMIT 1"));
        assert_eq!(
            params[0],
            QueryParam::new("object_id", QueryParamValue::Str("P1".into()))
        );
    }

    #[tokio::test]
    async fn test_registered_mapping_overrides_conventions() {
        let client = RecordingClient::new(vec![]);
        let resolver = resolver(Arc::clone(&client));
        resolver.register_object_mapping("Player", "roster_v2", "nhlPlayerId");

        resolver.get_by_id("Player", "P1", None).await.unwrap();
        let (query, _) = client.last_query();
        assert!(query.contains("`proj.analytics.roster_v2`"));
        assert!(query.contains("WHERE nhlPlayerId = @object_id"));
    }

    #[tokio::test]
    async fn test_filter_list_expands_to_unnest() {
        let client = RecordingClient::new(vec![]);
        let resolver = resolver(Arc::clone(&client));

        let mut filters = FilterMap::new();
        filters.insert("position".into(), serde_json::json!(["C", "LW"]));
        filters.insert("teamId".into(), serde_json::json!("MTL"));

        resolver
            .get_by_filter("Player", &filters, None, Some(50), Some(10), None)
            .await
            .unwrap();

        let (query, params) = client.last_query();
        assert!(query.contains("position IN UNNEST(@param_0)"));
        assert!(query.contains("teamId = @param_1"));
        assert!(query.contains("LIMIT 50"));
        assert!(query.contains("OFFSET 10"));
        assert_eq!(
            params[0].value,
            QueryParamValue::StrArray(vec!["C".into(), "LW".into()])
        );
    }

    #[tokio::test]
    async fn test_limit_clamped_to_max_rows() {
        let client = RecordingClient::new(vec![]);
        let resolver = resolver(Arc::clone(&client));

        resolver
            .get_by_filter("Player", &FilterMap::new(), None, Some(1_000_000), None, None)
            .await
            .unwrap();
        let (query, _) = client.last_query();
        assert!(query.contains("LIMIT 10000"));
    }

    #[tokio::test]
    async fn test_row_filter_pushed_into_where() {
        let client = RecordingClient::new(vec![]);
        let resolver = resolver(Arc::clone(&client));

        resolver
            .get_by_filter(
                "Player",
                &FilterMap::new(),
                None,
                None,
                None,
                Some("teamId IN ('MTL')"),
            )
            .await
            .unwrap();
        let (query, _) = client.last_query();
        assert!(query.contains("WHERE (teamId IN ('MTL'))"));
    }

    #[tokio::test]
    async fn test_join_table_traversal_query() {
        let client = RecordingClient::new(vec![Record::new().with("playerId", "P1")]);
        let resolver = resolver(Arc::clone(&client));

        let config = LinkResolverConfig::join_table("team_rosters", "teamId", "playerId");
        let rows = resolver
            .traverse_link("Team", "T1", "team_players", "Player", &config, None, None)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);

        let (query, params) = client.last_query();
        assert!(query.contains("FROM `proj.analytics.players` t"));
        assert!(query.contains("INNER JOIN `proj.analytics.team_rosters` j"));
        assert!(query.contains("ON t.playerId = j.playerId"));
        assert!(query.contains("WHERE j.teamId = @from_id"));
        assert_eq!(
            params[0],
            QueryParam::new("from_id", QueryParamValue::Str("T1".into()))
        );
    }

    #[tokio::test]
    async fn test_foreign_key_traversal_delegates_to_filter() {
        let client = RecordingClient::new(vec![]);
        let resolver = resolver(Arc::clone(&client));

        let config = LinkResolverConfig::foreign_key("teamId");
        resolver
            .traverse_link("Team", "T1", "team_players", "Player", &config, None, Some(5))
            .await
            .unwrap();

        let (query, params) = client.last_query();
        assert!(query.contains("teamId = @param_0"));
        assert_eq!(
            params[0].value,
            QueryParamValue::Str("T1".to_string())
        );
    }

    #[tokio::test]
    async fn test_join_table_missing_config_is_error() {
        let client = RecordingClient::new(vec![]);
        let resolver = resolver(Arc::clone(&client));

        let config = LinkResolverConfig {
            kind: LinkResolverKind::JoinTable,
            table: Some("team_rosters".into()),
            from_field: None,
            to_field: None,
        };
        let err = resolver
            .traverse_link("Team", "T1", "team_players", "Player", &config, None, None)
            .await
            .unwrap_err();
        assert!(err.message.contains("missing required config"));
    }
}
