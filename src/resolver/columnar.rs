//! Columnar-file resolver.
//!
//! Reads column-oriented files from a configured data root with column
//! projection and predicate pushdown via lazy scans.
//!
//! Conventions:
//! - file: `<root>/analytics/<snake_case(object_type)>.parquet`
//! - primary key: `camelCase(object_type)` + `Id`

use async_trait::async_trait;
use polars::prelude::*;
use std::path::{Path, PathBuf};

use super::warehouse::{default_pk_column, to_snake_case};
use super::{record_matches_row_filter, FilterMap, Resolver, ResolverConfig, ResolverError};
use crate::types::{LinkResolverConfig, LinkResolverKind, Record};

/// Resolver for parquet files under a data root.
pub struct ColumnarResolver {
    data_directory: PathBuf,
    config: ResolverConfig,
}

impl ColumnarResolver {
    /// Create a resolver rooted at `data_directory`.
    pub fn new(data_directory: impl Into<PathBuf>, config: ResolverConfig) -> Self {
        let data_directory = data_directory.into();
        if !data_directory.exists() {
            tracing::warn!(
                directory = %data_directory.display(),
                "Data directory does not exist"
            );
        }
        tracing::info!(directory = %data_directory.display(), "Columnar resolver initialized");
        Self {
            data_directory,
            config,
        }
    }

    fn file_path_and_pk(&self, object_type: &str) -> (PathBuf, String) {
        let file_path = self
            .data_directory
            .join("analytics")
            .join(format!("{}.parquet", to_snake_case(object_type)));
        (file_path, default_pk_column(object_type))
    }

    /// Projection to read: the requested properties plus the primary key,
    /// which is always forced in. `None` reads all columns.
    fn columns_to_read(properties: Option<&[String]>, pk_column: &str) -> Option<Vec<String>> {
        let props = properties?;
        if props.is_empty() {
            return None;
        }
        let mut columns: Vec<String> = props.to_vec();
        if !columns.iter().any(|c| c == pk_column) {
            columns.push(pk_column.to_string());
        }
        Some(columns)
    }

    fn scan(path: &Path) -> Result<LazyFrame, ResolverError> {
        LazyFrame::scan_parquet(path, ScanArgsParquet::default())
            .map_err(|e| ResolverError::new("parquet", e.to_string()))
    }

    /// Scalar equality predicates, pushed down to the scan. List-valued
    /// filters are applied over the materialized records instead.
    fn pushdown_predicate(filters: &FilterMap) -> Option<Expr> {
        let mut predicate: Option<Expr> = None;
        for (field, value) in filters {
            let expr = match value {
                serde_json::Value::Array(_) => continue,
                serde_json::Value::Bool(b) => col(field.as_str()).eq(lit(*b)),
                serde_json::Value::Number(n) if n.is_i64() => {
                    col(field.as_str()).eq(lit(n.as_i64().unwrap_or(0)))
                }
                serde_json::Value::Number(n) => col(field.as_str()).eq(lit(n.as_f64().unwrap_or(0.0))),
                serde_json::Value::String(s) => {
                    col(field.as_str()).cast(DataType::String).eq(lit(s.clone()))
                }
                other => col(field.as_str()).cast(DataType::String).eq(lit(other.to_string())),
            };
            predicate = Some(match predicate {
                Some(p) => p.and(expr),
                None => expr,
            });
        }
        predicate
    }

    fn list_post_filter(records: Vec<Record>, filters: &FilterMap) -> Vec<Record> {
        let list_filters: Vec<(&String, Vec<String>)> = filters
            .iter()
            .filter_map(|(field, value)| {
                value.as_array().map(|items| {
                    let wanted = items
                        .iter()
                        .map(|v| match v {
                            serde_json::Value::String(s) => s.clone(),
                            other => other.to_string(),
                        })
                        .collect();
                    (field, wanted)
                })
            })
            .collect();

        if list_filters.is_empty() {
            return records;
        }

        records
            .into_iter()
            .filter(|record| {
                list_filters.iter().all(|(field, wanted)| {
                    match record.get_str(field) {
                        Some(actual) => wanted.iter().any(|w| w == &actual),
                        None => false,
                    }
                })
            })
            .collect()
    }

    fn frame_to_records(df: &DataFrame) -> Result<Vec<Record>, ResolverError> {
        let columns = df.get_columns();
        let mut records = Vec::with_capacity(df.height());

        for row_idx in 0..df.height() {
            let mut record = Record::new();
            for column in columns {
                let value = column
                    .as_materialized_series()
                    .get(row_idx)
                    .map_err(|e| ResolverError::new("parquet", e.to_string()))?;
                record
                    .0
                    .insert(column.name().to_string(), any_value_to_json(&value));
            }
            records.push(record);
        }
        Ok(records)
    }
}

fn any_value_to_json(value: &AnyValue) -> serde_json::Value {
    match value {
        AnyValue::Null => serde_json::Value::Null,
        AnyValue::Boolean(b) => serde_json::Value::Bool(*b),
        AnyValue::String(s) => serde_json::Value::String((*s).to_string()),
        AnyValue::StringOwned(s) => serde_json::Value::String(s.to_string()),
        AnyValue::Int8(v) => serde_json::Value::from(*v),
        AnyValue::Int16(v) => serde_json::Value::from(*v),
        AnyValue::Int32(v) => serde_json::Value::from(*v),
        AnyValue::Int64(v) => serde_json::Value::from(*v),
        AnyValue::UInt8(v) => serde_json::Value::from(*v),
        AnyValue::UInt16(v) => serde_json::Value::from(*v),
        AnyValue::UInt32(v) => serde_json::Value::from(*v),
        AnyValue::UInt64(v) => serde_json::Value::from(*v),
        AnyValue::Float32(v) => serde_json::Value::from(*v as f64),
        AnyValue::Float64(v) => serde_json::Value::from(*v),
        other => serde_json::Value::String(format!("{other}")),
    }
}

#[async_trait]
impl Resolver for ColumnarResolver {
    fn backend_name(&self) -> &'static str {
        "parquet"
    }

    async fn get_by_id(
        &self,
        object_type: &str,
        object_id: &str,
        properties: Option<&[String]>,
    ) -> Result<Option<Record>, ResolverError> {
        let (path, pk_column) = self.file_path_and_pk(object_type);
        if !path.exists() {
            tracing::warn!(path = %path.display(), "Parquet file not found");
            return Ok(None);
        }

        let mut lf = Self::scan(&path)?
            .filter(col(pk_column.as_str()).cast(DataType::String).eq(lit(object_id.to_string())));

        if let Some(columns) = Self::columns_to_read(properties, &pk_column) {
            let exprs: Vec<Expr> = columns.iter().map(|c| col(c.as_str())).collect();
            lf = lf.select(exprs);
        }

        let df = lf
            .limit(1)
            .collect()
            .map_err(|e| ResolverError::new("parquet", e.to_string()))?;

        Ok(Self::frame_to_records(&df)?.into_iter().next())
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
        let (path, pk_column) = self.file_path_and_pk(object_type);
        if !path.exists() {
            tracing::warn!(path = %path.display(), "Parquet file not found");
            return Ok(Vec::new());
        }

        let mut lf = Self::scan(&path)?;
        if let Some(predicate) = Self::pushdown_predicate(filters) {
            lf = lf.filter(predicate);
        }
        if let Some(columns) = Self::columns_to_read(properties, &pk_column) {
            let exprs: Vec<Expr> = columns.iter().map(|c| col(c.as_str())).collect();
            lf = lf.select(exprs);
        }

        let df = lf
            .collect()
            .map_err(|e| ResolverError::new("parquet", e.to_string()))?;

        let mut records = Self::list_post_filter(Self::frame_to_records(&df)?, filters);

        if let Some(expr) = row_filter {
            // This backend cannot interpret SQL predicates; filter the
            // materialized records instead.
            records.retain(|r| record_matches_row_filter(r, expr));
        }

        let (final_limit, final_offset) = self.config.apply_row_limit(limit, offset);
        let records: Vec<Record> = records
            .into_iter()
            .skip(final_offset)
            .take(final_limit)
            .collect();

        Ok(records)
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
                let to_field = link_config.to_field.as_deref().ok_or_else(|| {
                    ResolverError::new("parquet", "Foreign key link missing 'to_field' in config")
                })?;
                let mut filters = FilterMap::new();
                filters.insert(
                    to_field.to_string(),
                    serde_json::Value::String(from_object_id.to_string()),
                );
                self.get_by_filter(to_object_type, &filters, properties, limit, None, None)
                    .await
            }
            LinkResolverKind::JoinTable => {
                // Join tables are a warehouse concern; columnar files hold
                // denormalized analytics rows.
                tracing::warn!(
                    link_type,
                    "Join table link not supported on the parquet backend"
                );
                Ok(Vec::new())
            }
        }
    }
}
