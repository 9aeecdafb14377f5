//! Top-level load and export entry points.
//!
//! [`load`] wires everything together: the transaction guard, the
//! server-capability check for conflict handling, constraint and index
//! suspension, and the staged copy itself. [`export`] is the much simpler
//! unload path.

use tracing::info;

use crate::copy_from::{CopyFrom, LoadHooks, LoadOptions, NoopHooks};
use crate::copy_to::{CopyDestination, CopyTo, SelectQuery};
use crate::error::{CopyError, Result};
use crate::header::CopySource;
use crate::mapping::ColumnMapping;
use crate::protocol::BulkChannel;
use crate::schema::TableSchema;
use crate::sql::CopyOutOptions;
use crate::suspension::{SuspensionManager, SuspensionPlan};

/// Whether the caller's connection currently sits inside an open transaction.
///
/// Constraint and index suspension issues DDL that must be visible to other
/// connections immediately, which an enclosing transaction would defeat, so
/// the caller has to declare its transaction state up front.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransactionState {
    /// Statements commit individually.
    #[default]
    None,
    /// An enclosing transaction is open.
    InAtomicBlock,
}

/// Detected server capabilities.
#[derive(Debug, Clone, Copy)]
pub struct Capabilities {
    pub server_version_num: i64,
}

impl Capabilities {
    /// Ask the server for its version number.
    pub async fn detect(channel: &dyn BulkChannel) -> Result<Self> {
        let raw = channel.query_scalar("SHOW server_version_num").await?;
        let server_version_num = raw.trim().parse::<i64>().map_err(|_| {
            CopyError::Config(format!("unexpected server_version_num: {:?}", raw))
        })?;
        Ok(Self { server_version_num })
    }

    /// `ON CONFLICT` arrived in 9.5.
    pub fn supports_on_conflict(&self) -> bool {
        self.server_version_num >= 90500
    }
}

/// Load a delimited-text source into the target table.
pub async fn load(
    channel: &dyn BulkChannel,
    txn: TransactionState,
    schema: &TableSchema,
    source: CopySource,
    mapping: Option<ColumnMapping>,
    options: &LoadOptions,
) -> Result<u64> {
    load_with(channel, txn, schema, source, mapping, options, &mut NoopHooks).await
}

/// [`load`] with caller-supplied hooks around the copy and insert steps.
pub async fn load_with(
    channel: &dyn BulkChannel,
    txn: TransactionState,
    schema: &TableSchema,
    source: CopySource,
    mapping: Option<ColumnMapping>,
    options: &LoadOptions,
    hooks: &mut dyn LoadHooks,
) -> Result<u64> {
    let suspends = options.drop_constraints || options.drop_indexes;
    if suspends && txn == TransactionState::InAtomicBlock {
        return Err(CopyError::TransactionManagement(
            "constraint and index suspension cannot run inside an open transaction; \
             commit first or disable drop_constraints and drop_indexes"
                .to_string(),
        ));
    }

    if options.conflict_action().is_some() {
        let capabilities = Capabilities::detect(channel).await?;
        if !capabilities.supports_on_conflict() {
            return Err(CopyError::Unsupported(format!(
                "the connected server (version {}) does not support ON CONFLICT",
                capabilities.server_version_num
            )));
        }
    }

    if !options.silent {
        info!("Loading CSV to {}", schema.table);
    }

    let mut load = CopyFrom::new(schema, source, mapping, options)?;

    let manager = if suspends {
        Some(SuspensionManager::new(SuspensionPlan::for_table(schema)?))
    } else {
        None
    };

    if let Some(manager) = &manager {
        if options.drop_constraints {
            manager.drop_constraints(channel).await?;
        }
        if options.drop_indexes {
            manager.drop_indexes(channel).await?;
        }
    }

    let rows = load.run(channel, hooks).await?;

    // Restored only after a successful load; a failed run leaves the objects
    // suspended for the operator to inspect and re-run.
    if let Some(manager) = &manager {
        if options.drop_constraints {
            manager.restore_constraints(channel).await?;
        }
        if options.drop_indexes {
            manager.restore_indexes(channel).await?;
        }
    }

    if !options.silent {
        info!("{} records loaded", format_count(rows));
    }
    Ok(rows)
}

/// Export the rows a select produces as delimited text.
///
/// With no destination the export buffers in memory and returns the bytes.
pub async fn export(
    channel: &dyn BulkChannel,
    query: &SelectQuery,
    dest: Option<CopyDestination<'_>>,
    options: &CopyOutOptions,
) -> Result<Option<Vec<u8>>> {
    let export = CopyTo::new(query, options)?;
    export
        .run(channel, dest.unwrap_or(CopyDestination::Buffer))
        .await
}

/// Render a row count with thousands separators for announcements.
pub fn format_count(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::mock::MockChannel;
    use crate::schema::ColumnMeta;
    use crate::sql::ConflictAction;
    use std::io::Cursor;

    fn schema() -> TableSchema {
        let mut name = ColumnMeta::new("name", "text");
        name.unique = true;
        TableSchema::new(
            "people",
            vec![
                ColumnMeta::new("id", "serial"),
                name,
                ColumnMeta::new("number", "integer"),
            ],
        )
    }

    fn source() -> CopySource {
        CopySource::reader(Cursor::new(
            "name,number\nBEN,1\nJOE,2\n".as_bytes().to_vec(),
        ))
    }

    fn mapping() -> ColumnMapping {
        ColumnMapping::new().map("name", "name").map("number", "number")
    }

    #[test]
    fn test_format_count() {
        assert_eq!(format_count(0), "0");
        assert_eq!(format_count(999), "999");
        assert_eq!(format_count(1000), "1,000");
        assert_eq!(format_count(1234567), "1,234,567");
    }

    #[tokio::test]
    async fn test_load_without_suspension() {
        let channel = MockChannel::new();
        let options = LoadOptions {
            drop_constraints: false,
            drop_indexes: false,
            ..LoadOptions::new()
        };
        let rows = load(
            &channel,
            TransactionState::None,
            &schema(),
            source(),
            Some(mapping()),
            &options,
        )
        .await
        .unwrap();
        assert_eq!(rows, 0);
        assert_eq!(channel.statements().len(), 5);
    }

    #[tokio::test]
    async fn test_default_load_suspends_constraints() {
        let channel = MockChannel::new();
        load(
            &channel,
            TransactionState::None,
            &schema(),
            source(),
            Some(mapping()),
            &LoadOptions::new(),
        )
        .await
        .unwrap();
        let statements = channel.statements();
        assert!(statements[0].contains("DROP CONSTRAINT \"people_name_key\""));
        assert!(statements
            .last()
            .unwrap()
            .contains("ADD CONSTRAINT \"people_name_key\""));
    }

    #[tokio::test]
    async fn test_suspension_rejected_inside_transaction() {
        let channel = MockChannel::new();
        // Default options suspend, so the guard fires without opting in.
        let err = load(
            &channel,
            TransactionState::InAtomicBlock,
            &schema(),
            source(),
            Some(mapping()),
            &LoadOptions::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, CopyError::TransactionManagement(_)));
        // Guard fires before anything touches the database.
        assert!(channel.statements().is_empty());
    }

    #[tokio::test]
    async fn test_conflict_requires_capable_server() {
        let mut channel = MockChannel::new();
        channel.scalar = "90400".to_string();
        let options = LoadOptions {
            ignore_conflicts: true,
            ..LoadOptions::new()
        };
        let err = load(
            &channel,
            TransactionState::None,
            &schema(),
            source(),
            Some(mapping()),
            &options,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, CopyError::Unsupported(_)));
    }

    #[tokio::test]
    async fn test_conflict_allowed_on_capable_server() {
        let channel = MockChannel::new(); // scalar defaults past 9.5
        let options = LoadOptions {
            on_conflict: Some(ConflictAction::DoNothing),
            ..LoadOptions::new()
        };
        load(
            &channel,
            TransactionState::None,
            &schema(),
            source(),
            Some(mapping()),
            &options,
        )
        .await
        .unwrap();
        let statements = channel.statements();
        assert_eq!(statements[0], "SHOW server_version_num");
        assert!(statements
            .iter()
            .any(|s| s.ends_with(" ON CONFLICT DO NOTHING")));
    }

    #[tokio::test]
    async fn test_suspension_wraps_the_load() {
        let channel = MockChannel::new();
        let options = LoadOptions {
            drop_constraints: true,
            drop_indexes: true,
            ..LoadOptions::new()
        };
        load(
            &channel,
            TransactionState::None,
            &schema(),
            source(),
            Some(mapping()),
            &options,
        )
        .await
        .unwrap();
        let statements = channel.statements();
        assert!(statements[0].contains("DROP CONSTRAINT \"people_name_key\""));
        assert!(statements[1].starts_with("DROP TABLE IF EXISTS"));
        assert!(statements
            .last()
            .unwrap()
            .contains("ADD CONSTRAINT \"people_name_key\""));
    }

    #[tokio::test]
    async fn test_no_restore_after_failed_merge() {
        let mut channel = MockChannel::new();
        channel.fail_matching = Some("INSERT INTO".to_string());
        let options = LoadOptions {
            drop_constraints: true,
            ..LoadOptions::new()
        };
        let result = load(
            &channel,
            TransactionState::None,
            &schema(),
            source(),
            Some(mapping()),
            &options,
        )
        .await;
        assert!(result.is_err());
        assert!(!channel
            .statements()
            .iter()
            .any(|s| s.contains("ADD CONSTRAINT")));
    }

    #[tokio::test]
    async fn test_export_defaults_to_buffer() {
        let mut channel = MockChannel::new();
        channel.copy_out_payload = b"name\nBEN\n".to_vec();
        let bytes = export(
            &channel,
            &SelectQuery::new("SELECT \"name\" FROM \"people\""),
            None,
            &CopyOutOptions::default(),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(bytes, b"name\nBEN\n");
    }
}
