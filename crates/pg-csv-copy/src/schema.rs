//! Schema description consumed by the pipeline.
//!
//! These types are a read-only description of the target table, supplied by
//! the host mapping layer: column names and physical-name overrides, native
//! engine types, auto-increment flags, per-column SQL templates, and the
//! declared uniqueness constraints and indexes the suspension manager may
//! temporarily remove.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Description of the target table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSchema {
    /// Physical table name.
    pub table: String,

    /// Column descriptors, in declaration order.
    pub columns: Vec<ColumnMeta>,

    /// Named uniqueness constraints with their participating columns.
    #[serde(default)]
    pub unique_constraints: Vec<UniqueConstraint>,

    /// Composite uniqueness rules without an explicit constraint name.
    #[serde(default)]
    pub unique_together: Vec<Vec<String>>,

    /// Declared indexes.
    #[serde(default)]
    pub indexes: Vec<IndexMeta>,

    /// Table-level per-column SQL expression templates, keyed by logical
    /// column name. A template must contain a `{name}` placeholder that is
    /// substituted with the staging column (source header) name.
    #[serde(default)]
    pub templates: BTreeMap<String, String>,
}

impl TableSchema {
    /// Create a schema description with just a name and columns.
    pub fn new(table: impl Into<String>, columns: Vec<ColumnMeta>) -> Self {
        Self {
            table: table.into(),
            columns,
            unique_constraints: Vec::new(),
            unique_together: Vec::new(),
            indexes: Vec::new(),
            templates: BTreeMap::new(),
        }
    }

    /// Look up a column descriptor by its logical name.
    pub fn column(&self, name: &str) -> Option<&ColumnMeta> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Default staging table name derived from the target table name.
    pub fn default_staging_name(&self) -> String {
        format!("staging_{}", self.table)
    }
}

/// Column descriptor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnMeta {
    /// Logical column name, as the mapping layer knows it.
    pub name: String,

    /// Physical column name override, if it differs from the logical name.
    #[serde(default)]
    pub db_column: Option<String>,

    /// Native engine type (e.g. "integer", "text", "date", "serial").
    pub data_type: String,

    /// Whether this is an auto-incrementing primary key.
    #[serde(default)]
    pub is_auto_pk: bool,

    /// Custom SQL expression template for the merge step, with a `{name}`
    /// placeholder for the staging column name.
    #[serde(default)]
    pub cast_template: Option<String>,

    /// Explicit staging-column type overriding the default `text`, for
    /// columns whose raw source values would not survive text staging.
    #[serde(default)]
    pub copy_type: Option<String>,

    /// Whether the column allows NULL.
    #[serde(default = "default_true")]
    pub is_nullable: bool,

    /// Whether the column carries a single-column uniqueness constraint.
    #[serde(default)]
    pub unique: bool,

    /// Whether the column carries a single-column index.
    #[serde(default)]
    pub indexed: bool,
}

fn default_true() -> bool {
    true
}

impl ColumnMeta {
    /// Minimal descriptor with a name and native type.
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            db_column: None,
            data_type: data_type.into(),
            is_auto_pk: false,
            cast_template: None,
            copy_type: None,
            is_nullable: true,
            unique: false,
            indexed: false,
        }
    }

    /// Physical column name used in generated statements.
    pub fn target_column(&self) -> &str {
        self.db_column.as_deref().unwrap_or(&self.name)
    }

    /// Type the merge step casts staging text to.
    ///
    /// Serial types are replaced with their underlying integer types, since
    /// the staging column is never itself a sequence.
    pub fn merge_cast_type(&self) -> &str {
        match self.data_type.as_str() {
            "smallserial" => "smallint",
            "serial" => "integer",
            "bigserial" => "bigint",
            other => other,
        }
    }
}

/// Named uniqueness constraint metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UniqueConstraint {
    /// Constraint name.
    pub name: String,

    /// Participating column names.
    pub columns: Vec<String>,
}

/// Index metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexMeta {
    /// Index name.
    pub name: String,

    /// Indexed column names.
    pub columns: Vec<String>,

    /// Whether the index is unique.
    pub is_unique: bool,
}
