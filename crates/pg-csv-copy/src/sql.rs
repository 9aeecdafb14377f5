//! SQL statement generation for the load and unload pipelines.
//!
//! Five generators drive a run: drop-staging, create-staging, copy-in,
//! merge-insert (load), and copy-out (export). All emit complete SQL text
//! with identifiers validated and double-quoted and literal values adapted
//! through [`Literal`]; unset copy options are omitted rather than rendered
//! as defaults.

use serde::{Deserialize, Serialize};

use crate::error::{CopyError, Result};
use crate::identifier::{quote_ident, quote_literal, validate_identifier};
use crate::mapping::{ResolvedColumn, ResolvedMapping, ValueExpr};
use crate::schema::TableSchema;

/// A typed SQL literal, adapted to dialect-correct text on render.
///
/// String values are single-quoted with embedded quotes doubled; everything
/// else passes through unquoted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Literal {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Literal {
    /// Render as inline SQL.
    pub fn to_sql(&self) -> String {
        match self {
            Literal::Null => "NULL".to_string(),
            Literal::Bool(true) => "TRUE".to_string(),
            Literal::Bool(false) => "FALSE".to_string(),
            Literal::Int(v) => v.to_string(),
            Literal::Float(v) => v.to_string(),
            Literal::Text(v) => quote_literal(v),
        }
    }
}

impl From<i64> for Literal {
    fn from(v: i64) -> Self {
        Literal::Int(v)
    }
}

impl From<i32> for Literal {
    fn from(v: i32) -> Self {
        Literal::Int(v as i64)
    }
}

impl From<f64> for Literal {
    fn from(v: f64) -> Self {
        Literal::Float(v)
    }
}

impl From<bool> for Literal {
    fn from(v: bool) -> Self {
        Literal::Bool(v)
    }
}

impl From<&str> for Literal {
    fn from(v: &str) -> Self {
        Literal::Text(v.to_string())
    }
}

impl From<String> for Literal {
    fn from(v: String) -> Self {
        Literal::Text(v)
    }
}

/// Options rendered into the copy-in statement.
#[derive(Debug, Clone)]
pub struct CopyInOptions {
    /// Field delimiter (always rendered; defaults to comma).
    pub delimiter: char,
    /// Quote character.
    pub quote_character: Option<char>,
    /// Null-sentinel string.
    pub null: Option<String>,
    /// Columns for which the null sentinel is stored as literal text.
    pub force_not_null: Vec<String>,
    /// Columns for which a quoted sentinel still becomes NULL.
    pub force_null: Vec<String>,
    /// Text encoding of the source.
    pub encoding: Option<String>,
}

impl Default for CopyInOptions {
    fn default() -> Self {
        Self {
            delimiter: ',',
            quote_character: None,
            null: None,
            force_not_null: Vec::new(),
            force_null: Vec::new(),
            encoding: None,
        }
    }
}

/// Force-quote selection for the copy-out statement.
#[derive(Debug, Clone)]
pub enum ForceQuote {
    /// Quote every column.
    All,
    /// Quote the named columns.
    Columns(Vec<String>),
}

/// Options rendered into the copy-out statement.
#[derive(Debug, Clone)]
pub struct CopyOutOptions {
    /// Field delimiter (always rendered; defaults to comma).
    pub delimiter: char,
    /// Whether to emit a header row.
    pub header: bool,
    /// Null-sentinel string.
    pub null: Option<String>,
    /// Quote character.
    pub quote: Option<char>,
    /// Force-quote selection.
    pub force_quote: Option<ForceQuote>,
    /// Output text encoding.
    pub encoding: Option<String>,
    /// Escape character.
    pub escape: Option<char>,
}

impl Default for CopyOutOptions {
    fn default() -> Self {
        Self {
            delimiter: ',',
            header: true,
            null: None,
            quote: None,
            force_quote: None,
            encoding: None,
            escape: None,
        }
    }
}

/// Conflict-resolution behavior for the merge-insert statement.
#[derive(Debug, Clone)]
pub enum ConflictAction {
    /// `ON CONFLICT DO NOTHING`.
    DoNothing,
    /// `ON CONFLICT (<target columns>) DO UPDATE SET ...` over the named
    /// columns only.
    DoUpdate {
        target: ConflictTarget,
        columns: Vec<String>,
    },
}

/// The conflict target of a DO UPDATE clause.
#[derive(Debug, Clone)]
pub enum ConflictTarget {
    /// Explicit column list.
    Columns(Vec<String>),
    /// A declared uniqueness constraint; its participating columns are
    /// substituted, since the engine may silently convert the constraint
    /// declaration into an index under a different name.
    Constraint(String),
}

/// `DROP TABLE IF EXISTS` for the staging table. Idempotent; always safe to
/// run before create.
pub fn drop_staging(staging: &str) -> Result<String> {
    Ok(format!("DROP TABLE IF EXISTS {}", quote_ident(staging)?))
}

/// `CREATE TEMPORARY TABLE` with one column per discovered header, named
/// exactly as found. Columns default to `text`; a mapped column may override
/// its staging type.
pub fn create_staging(
    staging: &str,
    headers: &[String],
    mapping: &ResolvedMapping,
) -> Result<String> {
    let mut column_defs = Vec::with_capacity(headers.len());
    for header in headers {
        let copy_type = mapping
            .columns
            .iter()
            .find(|c| &c.header == header)
            .and_then(|c| c.column.copy_type.as_deref())
            .unwrap_or("text");
        column_defs.push(format!("{} {}", quote_ident(header)?, copy_type));
    }

    Ok(format!(
        "CREATE TEMPORARY TABLE {} ({})",
        quote_ident(staging)?,
        column_defs.join(", ")
    ))
}

/// Bulk-copy-from-stream statement targeting the staging table, columns in
/// discovered header order.
pub fn copy_in(staging: &str, headers: &[String], options: &CopyInOptions) -> Result<String> {
    let header_list = headers
        .iter()
        .map(|h| quote_ident(h))
        .collect::<Result<Vec<_>>>()?
        .join(", ");

    let mut sql = format!(
        "COPY {} ({}) FROM STDIN WITH CSV HEADER",
        quote_ident(staging)?,
        header_list
    );

    if let Some(quote) = options.quote_character {
        sql.push_str(&format!(" QUOTE {}", quote_literal(&quote.to_string())));
    }
    sql.push_str(&format!(
        " DELIMITER {}",
        quote_literal(&options.delimiter.to_string())
    ));
    if let Some(null) = &options.null {
        sql.push_str(&format!(" NULL {}", quote_literal(null)));
    }
    if !options.force_not_null.is_empty() {
        let cols = options
            .force_not_null
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Result<Vec<_>>>()?
            .join(", ");
        sql.push_str(&format!(" FORCE NOT NULL {}", cols));
    }
    if !options.force_null.is_empty() {
        let cols = options
            .force_null
            .iter()
            .map(|c| quote_ident(c))
            .collect::<Result<Vec<_>>>()?
            .join(", ");
        sql.push_str(&format!(" FORCE NULL {}", cols));
    }
    if let Some(encoding) = &options.encoding {
        sql.push_str(&format!(" ENCODING {}", quote_literal(encoding)));
    }

    Ok(sql)
}

/// Per-column value expression for the merge step.
fn value_expression(resolved: &ResolvedColumn) -> Result<String> {
    match &resolved.expr {
        ValueExpr::Cast => Ok(format!(
            "CAST({} AS {})",
            quote_ident(&resolved.header)?,
            resolved.column.merge_cast_type()
        )),
        ValueExpr::Template(template) => {
            if !template.contains("{name}") {
                return Err(CopyError::Config(format!(
                    "template for column '{}' is missing the {{name}} placeholder",
                    resolved.column.name
                )));
            }
            validate_identifier(&resolved.header)?;
            Ok(template.replace("{name}", &resolved.header))
        }
        ValueExpr::ValueMap(entries) => {
            if entries.is_empty() {
                return Err(CopyError::Config(format!(
                    "value mapping for column '{}' is empty",
                    resolved.column.name
                )));
            }
            let header = quote_ident(&resolved.header)?;
            let whens = entries
                .iter()
                .map(|(raw, replacement)| {
                    format!(
                        "WHEN {} = {} THEN {}",
                        header,
                        quote_literal(raw),
                        replacement.to_sql()
                    )
                })
                .collect::<Vec<_>>()
                .join(" ");
            Ok(format!("CASE {} END", whens))
        }
    }
}

/// Resolve a conflict action into its SQL clause (leading space included).
pub fn conflict_clause(schema: &TableSchema, action: &ConflictAction) -> Result<String> {
    match action {
        ConflictAction::DoNothing => Ok(" ON CONFLICT DO NOTHING".to_string()),
        ConflictAction::DoUpdate { target, columns } => {
            if columns.is_empty() {
                return Err(CopyError::config(
                    "on_conflict update requires at least one column to update",
                ));
            }

            let target_columns: Vec<String> = match target {
                ConflictTarget::Columns(cols) => {
                    if cols.is_empty() {
                        return Err(CopyError::config(
                            "on_conflict update requires a conflict target",
                        ));
                    }
                    cols.clone()
                }
                ConflictTarget::Constraint(name) => schema
                    .unique_constraints
                    .iter()
                    .find(|c| &c.name == name)
                    .map(|c| c.columns.clone())
                    .ok_or_else(|| {
                        CopyError::Config(format!(
                            "unknown uniqueness constraint '{}' on table '{}'",
                            name, schema.table
                        ))
                    })?,
            };

            let mut quoted_target = Vec::with_capacity(target_columns.len());
            for name in &target_columns {
                let column = schema
                    .column(name)
                    .ok_or_else(|| CopyError::FieldDoesNotExist(name.clone()))?;
                quoted_target.push(quote_ident(column.target_column())?);
            }

            let mut assignments = Vec::with_capacity(columns.len());
            for name in columns {
                let column = schema
                    .column(name)
                    .ok_or_else(|| CopyError::FieldDoesNotExist(name.clone()))?;
                let quoted = quote_ident(column.target_column())?;
                assignments.push(format!("{} = EXCLUDED.{}", quoted, quoted));
            }

            Ok(format!(
                " ON CONFLICT ({}) DO UPDATE SET {}",
                quoted_target.join(", "),
                assignments.join(", ")
            ))
        }
    }
}

/// Merge-insert: project the staging table into the target table, applying
/// per-column value expressions and appending static literals, with an
/// optional conflict-resolution clause.
pub fn merge_insert(
    schema: &TableSchema,
    staging: &str,
    mapping: &ResolvedMapping,
    conflict: Option<&ConflictAction>,
) -> Result<String> {
    let mut target_columns = Vec::with_capacity(mapping.columns.len() + mapping.statics.len());
    let mut select_exprs = Vec::with_capacity(target_columns.capacity());

    for resolved in &mapping.columns {
        target_columns.push(quote_ident(resolved.column.target_column())?);
        select_exprs.push(value_expression(resolved)?);
    }
    for (column, value) in &mapping.statics {
        target_columns.push(quote_ident(column.target_column())?);
        select_exprs.push(value.to_sql());
    }

    let suffix = match conflict {
        Some(action) => conflict_clause(schema, action)?,
        None => String::new(),
    };

    Ok(format!(
        "INSERT INTO {} ({}) SELECT {} FROM {}{}",
        quote_ident(&schema.table)?,
        target_columns.join(", "),
        select_exprs.join(", "),
        quote_ident(staging)?,
        suffix
    ))
}

/// Wrap a compiled select statement in a copy-out statement with CSV format
/// options. Unset options are omitted.
pub fn copy_out(select_sql: &str, options: &CopyOutOptions) -> Result<String> {
    let mut sql = format!(
        "COPY ({}) TO STDOUT DELIMITER {} CSV",
        select_sql,
        quote_literal(&options.delimiter.to_string())
    );

    if options.header {
        sql.push_str(" HEADER");
    }
    if let Some(null) = &options.null {
        sql.push_str(&format!(" NULL {}", quote_literal(null)));
    }
    if let Some(quote) = options.quote {
        sql.push_str(&format!(" QUOTE {}", quote_literal(&quote.to_string())));
    }
    if let Some(force_quote) = &options.force_quote {
        match force_quote {
            ForceQuote::All => sql.push_str(" FORCE QUOTE *"),
            ForceQuote::Columns(cols) => {
                if cols.is_empty() {
                    return Err(CopyError::config("force_quote column list is empty"));
                }
                let list = cols
                    .iter()
                    .map(|c| quote_ident(c))
                    .collect::<Result<Vec<_>>>()?
                    .join(", ");
                sql.push_str(&format!(" FORCE QUOTE {}", list));
            }
        }
    }
    if let Some(encoding) = &options.encoding {
        sql.push_str(&format!(" ENCODING {}", quote_literal(encoding)));
    }
    if let Some(escape) = options.escape {
        sql.push_str(&format!(" ESCAPE {}", quote_literal(&escape.to_string())));
    }

    Ok(sql)
}
