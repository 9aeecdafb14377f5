//! Mapping resolution between source headers and target columns.
//!
//! A load is driven by an ordered column mapping (target column name to
//! source header name). When no explicit mapping is supplied, the identity
//! mapping over the discovered headers is assumed. Resolution validates both
//! sides of every entry against the discovered headers and the target schema,
//! and selects each column's value-expression strategy once, so statement
//! generation never has to re-probe the schema.

use std::collections::{BTreeMap, BTreeSet};

use tracing::debug;

use crate::error::{CopyError, Result};
use crate::schema::{ColumnMeta, TableSchema};
use crate::sql::Literal;

/// Ordered mapping from target column name to source header name.
///
/// Order determines generated-statement column order; keys must be unique.
#[derive(Debug, Clone, Default)]
pub struct ColumnMapping {
    entries: Vec<(String, String)>,
}

impl ColumnMapping {
    /// Empty mapping.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry, builder-style.
    pub fn map(mut self, column: impl Into<String>, header: impl Into<String>) -> Self {
        self.insert(column, header);
        self
    }

    /// Add an entry.
    pub fn insert(&mut self, column: impl Into<String>, header: impl Into<String>) {
        self.entries.push((column.into(), header.into()));
    }

    /// Identity mapping over the discovered headers.
    fn identity(headers: &[String]) -> Self {
        Self {
            entries: headers.iter().map(|h| (h.clone(), h.clone())).collect(),
        }
    }

    /// Whether the mapping has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate entries as (target column, source header).
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(c, h)| (c.as_str(), h.as_str()))
    }
}

impl FromIterator<(String, String)> for ColumnMapping {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

/// Value-expression strategy for one mapped column, selected at resolution.
#[derive(Debug, Clone)]
pub enum ValueExpr {
    /// Plain cast of the staging column to the target type.
    Cast,
    /// SQL expression template with a `{name}` placeholder.
    Template(String),
    /// Conditional recoding of specific raw source values.
    ValueMap(Vec<(String, Literal)>),
}

/// One mapped column, ready for statement generation.
#[derive(Debug, Clone)]
pub struct ResolvedColumn {
    /// Target column descriptor.
    pub column: ColumnMeta,
    /// Source header feeding it.
    pub header: String,
    /// How the staging value becomes the inserted value.
    pub expr: ValueExpr,
}

/// Fully validated mapping: ordered columns plus static literals.
#[derive(Debug, Clone)]
pub struct ResolvedMapping {
    /// Mapped columns, in mapping order.
    pub columns: Vec<ResolvedColumn>,
    /// Static columns and their literal values, in declaration order.
    pub statics: Vec<(ColumnMeta, Literal)>,
}

/// Resolve and validate a column mapping against the schema and headers.
pub fn resolve(
    schema: &TableSchema,
    headers: &[String],
    mapping: Option<ColumnMapping>,
    static_mapping: &[(String, Literal)],
    value_maps: &BTreeMap<String, Vec<(String, Literal)>>,
    ignore_unmapped_headers: bool,
) -> Result<ResolvedMapping> {
    let mapping = match mapping {
        Some(m) if !m.is_empty() => m,
        _ => ColumnMapping::identity(headers),
    };
    debug!(
        "Resolving mapping for {} ({} entries)",
        schema.table,
        mapping.entries.len()
    );

    let mut seen = BTreeSet::new();
    for (column, _) in mapping.iter() {
        if !seen.insert(column) {
            return Err(CopyError::Config(format!(
                "duplicate mapping entry for column '{}'",
                column
            )));
        }
    }

    let mut columns = Vec::with_capacity(mapping.entries.len());
    for (column_name, header) in mapping.iter() {
        if !headers.iter().any(|h| h == header) {
            return Err(CopyError::HeaderNotFound(header.to_string()));
        }
        let column = schema
            .column(column_name)
            .ok_or_else(|| CopyError::FieldDoesNotExist(column_name.to_string()))?;

        let expr = if let Some(entries) = value_maps.get(column_name) {
            ValueExpr::ValueMap(entries.clone())
        } else if let Some(template) = schema.templates.get(column_name) {
            ValueExpr::Template(template.clone())
        } else if let Some(template) = &column.cast_template {
            ValueExpr::Template(template.clone())
        } else {
            ValueExpr::Cast
        };

        columns.push(ResolvedColumn {
            column: column.clone(),
            header: header.to_string(),
            expr,
        });
    }

    // Strict by default: a discovered header that is not mapped anywhere is
    // silent data loss, so it is an error unless the caller opts out.
    if !ignore_unmapped_headers {
        for header in headers {
            if !mapping.iter().any(|(_, h)| h == header) {
                return Err(CopyError::Config(format!(
                    "header '{}' is not mapped to any column; map it or set ignore_unmapped_headers",
                    header
                )));
            }
        }
    }

    let mut statics = Vec::with_capacity(static_mapping.len());
    for (column_name, value) in static_mapping {
        let column = schema
            .column(column_name)
            .ok_or_else(|| CopyError::FieldDoesNotExist(column_name.clone()))?;
        statics.push((column.clone(), value.clone()));
    }

    for column_name in value_maps.keys() {
        if schema.column(column_name).is_none() {
            return Err(CopyError::FieldDoesNotExist(column_name.clone()));
        }
        if !columns.iter().any(|c| &c.column.name == column_name) {
            return Err(CopyError::Config(format!(
                "value mapping for column '{}' has no mapped source header",
                column_name
            )));
        }
    }

    Ok(ResolvedMapping { columns, statics })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> TableSchema {
        TableSchema::new(
            "people",
            vec![
                ColumnMeta::new("id", "serial"),
                ColumnMeta::new("name", "text"),
                ColumnMeta::new("number", "integer"),
                ColumnMeta::new("dt", "date"),
                ColumnMeta::new("batch", "integer"),
            ],
        )
    }

    fn headers() -> Vec<String> {
        vec!["NAME".to_string(), "NUMBER".to_string(), "DATE".to_string()]
    }

    fn mapping() -> ColumnMapping {
        ColumnMapping::new()
            .map("name", "NAME")
            .map("number", "NUMBER")
            .map("dt", "DATE")
    }

    #[test]
    fn test_resolve_explicit_mapping() {
        let resolved = resolve(
            &schema(),
            &headers(),
            Some(mapping()),
            &[],
            &BTreeMap::new(),
            false,
        )
        .unwrap();
        assert_eq!(resolved.columns.len(), 3);
        assert_eq!(resolved.columns[0].column.name, "name");
        assert_eq!(resolved.columns[0].header, "NAME");
        assert!(matches!(resolved.columns[0].expr, ValueExpr::Cast));
    }

    #[test]
    fn test_resolve_identity_default() {
        let schema = TableSchema::new(
            "t",
            vec![ColumnMeta::new("a", "text"), ColumnMeta::new("b", "text")],
        );
        let headers = vec!["a".to_string(), "b".to_string()];
        let resolved = resolve(&schema, &headers, None, &[], &BTreeMap::new(), false).unwrap();
        assert_eq!(resolved.columns.len(), 2);
        assert_eq!(resolved.columns[1].header, "b");
    }

    #[test]
    fn test_header_not_found() {
        let bad = ColumnMapping::new().map("name", "MISSING");
        let err = resolve(
            &schema(),
            &headers(),
            Some(bad),
            &[],
            &BTreeMap::new(),
            true,
        )
        .unwrap_err();
        assert!(matches!(err, CopyError::HeaderNotFound(h) if h == "MISSING"));
    }

    #[test]
    fn test_field_does_not_exist() {
        let bad = mapping().map("nope", "NAME");
        let err = resolve(
            &schema(),
            &headers(),
            Some(bad),
            &[],
            &BTreeMap::new(),
            false,
        )
        .unwrap_err();
        assert!(matches!(err, CopyError::FieldDoesNotExist(f) if f == "nope"));
    }

    #[test]
    fn test_unmapped_header_is_strict_by_default() {
        let partial = ColumnMapping::new().map("name", "NAME");
        let err = resolve(
            &schema(),
            &headers(),
            Some(partial.clone()),
            &[],
            &BTreeMap::new(),
            false,
        )
        .unwrap_err();
        assert!(matches!(err, CopyError::Config(_)));

        // Opting in permits skipping.
        let resolved = resolve(
            &schema(),
            &headers(),
            Some(partial),
            &[],
            &BTreeMap::new(),
            true,
        )
        .unwrap();
        assert_eq!(resolved.columns.len(), 1);
    }

    #[test]
    fn test_duplicate_mapping_key() {
        let dup = ColumnMapping::new().map("name", "NAME").map("name", "NUMBER");
        let err = resolve(
            &schema(),
            &headers(),
            Some(dup),
            &[],
            &BTreeMap::new(),
            true,
        )
        .unwrap_err();
        assert!(matches!(err, CopyError::Config(_)));
    }

    #[test]
    fn test_static_mapping_validated() {
        let statics = vec![("missing".to_string(), Literal::from(1))];
        let err = resolve(
            &schema(),
            &headers(),
            Some(mapping()),
            &statics,
            &BTreeMap::new(),
            false,
        )
        .unwrap_err();
        assert!(matches!(err, CopyError::FieldDoesNotExist(_)));

        let statics = vec![("batch".to_string(), Literal::from(7))];
        let resolved = resolve(
            &schema(),
            &headers(),
            Some(mapping()),
            &statics,
            &BTreeMap::new(),
            false,
        )
        .unwrap();
        assert_eq!(resolved.statics.len(), 1);
        assert_eq!(resolved.statics[0].0.name, "batch");
    }

    #[test]
    fn test_value_map_selected_over_cast() {
        let mut value_maps = BTreeMap::new();
        value_maps.insert(
            "number".to_string(),
            vec![("seven".to_string(), Literal::from(7))],
        );
        let resolved = resolve(
            &schema(),
            &headers(),
            Some(mapping()),
            &[],
            &value_maps,
            false,
        )
        .unwrap();
        let number = resolved
            .columns
            .iter()
            .find(|c| c.column.name == "number")
            .unwrap();
        assert!(matches!(number.expr, ValueExpr::ValueMap(_)));
    }

    #[test]
    fn test_value_map_unknown_column() {
        let mut value_maps = BTreeMap::new();
        value_maps.insert("ghost".to_string(), vec![("x".to_string(), Literal::Null)]);
        let err = resolve(
            &schema(),
            &headers(),
            Some(mapping()),
            &[],
            &value_maps,
            false,
        )
        .unwrap_err();
        assert!(matches!(err, CopyError::FieldDoesNotExist(_)));
    }

    #[test]
    fn test_column_template_selected() {
        let mut schema = schema();
        schema
            .columns
            .iter_mut()
            .find(|c| c.name == "number")
            .unwrap()
            .cast_template = Some("CAST(\"{name}\" AS double precision)".to_string());
        let resolved = resolve(
            &schema,
            &headers(),
            Some(mapping()),
            &[],
            &BTreeMap::new(),
            false,
        )
        .unwrap();
        let number = resolved
            .columns
            .iter()
            .find(|c| c.column.name == "number")
            .unwrap();
        assert!(matches!(number.expr, ValueExpr::Template(_)));
    }

    #[test]
    fn test_table_template_beats_column_template() {
        let mut schema = schema();
        schema
            .columns
            .iter_mut()
            .find(|c| c.name == "number")
            .unwrap()
            .cast_template = Some("CAST(\"{name}\" AS double precision)".to_string());
        schema.templates.insert(
            "number".to_string(),
            "NULLIF(\"{name}\", '')::integer".to_string(),
        );
        let resolved = resolve(
            &schema,
            &headers(),
            Some(mapping()),
            &[],
            &BTreeMap::new(),
            false,
        )
        .unwrap();
        let number = resolved
            .columns
            .iter()
            .find(|c| c.column.name == "number")
            .unwrap();
        match &number.expr {
            ValueExpr::Template(t) => assert!(t.starts_with("NULLIF")),
            other => panic!("unexpected expr: {:?}", other),
        }
    }
}
