//! The load pipeline: stage, bulk-copy, merge.
//!
//! A load runs a fixed statement sequence against one channel:
//!
//! 1. drop the staging table if a previous run left one behind
//! 2. create the staging table from the discovered headers
//! 3. stream the source through a copy-in statement
//! 4. merge-insert staging rows into the target table
//! 5. drop the staging table
//!
//! Hook methods fire around the copy and insert steps. All statement text is
//! prepared up front, before anything executes, so a configuration error can
//! never leave a partially staged table behind.

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::{CopyError, Result};
use crate::header::{read_headers, CopySource, SourceHandle};
use crate::identifier::validate_identifier;
use crate::mapping::{resolve, ColumnMapping, ResolvedMapping};
use crate::protocol::BulkChannel;
use crate::schema::TableSchema;
use crate::sql::{self, ConflictAction, CopyInOptions, Literal};
use std::collections::BTreeMap;

/// Configuration for a load.
pub struct LoadOptions {
    /// Copy-in format options. The declared encoding also drives header
    /// record decoding.
    pub copy: CopyInOptions,
    /// Shorthand for `ON CONFLICT DO NOTHING`.
    pub ignore_conflicts: bool,
    /// Explicit conflict-resolution behavior; takes precedence over
    /// `ignore_conflicts`.
    pub on_conflict: Option<ConflictAction>,
    /// Columns populated with a constant literal instead of source data.
    pub static_mapping: Vec<(String, Literal)>,
    /// Per-column recoding of raw source values, keyed by column name.
    pub value_maps: BTreeMap<String, Vec<(String, Literal)>>,
    /// Staging table name override.
    pub staging_table_name: Option<String>,
    /// Permit discovered headers that no mapping entry references.
    pub ignore_unmapped_headers: bool,
    /// Suspend declared uniqueness constraints around the load. On by
    /// default.
    pub drop_constraints: bool,
    /// Suspend declared indexes around the load. On by default.
    pub drop_indexes: bool,
    /// Suppress progress announcements.
    pub silent: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            copy: CopyInOptions::default(),
            ignore_conflicts: false,
            on_conflict: None,
            static_mapping: Vec::new(),
            value_maps: BTreeMap::new(),
            staging_table_name: None,
            ignore_unmapped_headers: false,
            drop_constraints: true,
            drop_indexes: true,
            silent: true,
        }
    }
}

impl LoadOptions {
    /// Defaults matching an unremarkable CSV load: comma delimiter, UTF-8,
    /// strict header mapping, constraint and index suspension on, quiet.
    pub fn new() -> Self {
        Self::default()
    }

    /// The conflict action the merge statement should carry, if any.
    pub(crate) fn conflict_action(&self) -> Option<ConflictAction> {
        match &self.on_conflict {
            Some(action) => Some(action.clone()),
            None if self.ignore_conflicts => Some(ConflictAction::DoNothing),
            None => None,
        }
    }
}

/// A fully prepared load: headers discovered, mapping resolved, every
/// statement generated. [`run`](CopyFrom::run) executes it.
pub struct CopyFrom {
    staging: String,
    headers: Vec<String>,
    mapping: ResolvedMapping,
    source: Option<SourceHandle>,
    drop_sql: String,
    create_sql: String,
    copy_sql: String,
    insert_sql: String,
}

impl CopyFrom {
    /// Prepare a load: open the source, read its headers, resolve the
    /// mapping, and generate the full statement sequence.
    pub fn new(
        schema: &TableSchema,
        source: CopySource,
        mapping: Option<ColumnMapping>,
        options: &LoadOptions,
    ) -> Result<Self> {
        let mut handle = source.open()?;
        let headers = read_headers(
            handle.reader.as_mut(),
            options.copy.delimiter,
            options.copy.encoding.as_deref(),
        )?;
        debug!("Discovered headers: {:?}", headers);

        let mapping = resolve(
            schema,
            &headers,
            mapping,
            &options.static_mapping,
            &options.value_maps,
            options.ignore_unmapped_headers,
        )?;

        let staging = options
            .staging_table_name
            .clone()
            .unwrap_or_else(|| schema.default_staging_name());
        validate_identifier(&staging)?;

        for column in options
            .copy
            .force_not_null
            .iter()
            .chain(options.copy.force_null.iter())
        {
            if !headers.iter().any(|h| h == column) {
                return Err(CopyError::Config(format!(
                    "force null option names '{}', which is not a discovered header",
                    column
                )));
            }
        }

        let drop_sql = sql::drop_staging(&staging)?;
        let create_sql = sql::create_staging(&staging, &headers, &mapping)?;
        let copy_sql = sql::copy_in(&staging, &headers, &options.copy)?;
        let insert_sql = sql::merge_insert(
            schema,
            &staging,
            &mapping,
            options.conflict_action().as_ref(),
        )?;

        Ok(Self {
            staging,
            headers,
            mapping,
            source: Some(handle),
            drop_sql,
            create_sql,
            copy_sql,
            insert_sql,
        })
    }

    /// Discovered source headers, in file order.
    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    /// Staging table name this load uses.
    pub fn staging_table(&self) -> &str {
        &self.staging
    }

    /// The resolved mapping driving statement generation.
    pub fn mapping(&self) -> &ResolvedMapping {
        &self.mapping
    }

    /// Execute the load against a channel, firing hooks around the copy and
    /// insert steps. Returns the number of rows the merge inserted.
    ///
    /// The staging table is dropped again at the end; on failure partway
    /// through, re-running the load clears any leftover staging state.
    pub async fn run(
        &mut self,
        channel: &dyn BulkChannel,
        hooks: &mut dyn LoadHooks,
    ) -> Result<u64> {
        channel.execute(&self.drop_sql).await?;
        channel.execute(&self.create_sql).await?;

        hooks.pre_copy(channel).await?;
        let mut handle = self
            .source
            .take()
            .ok_or_else(|| CopyError::config("load has already consumed its source"))?;
        let copied = channel.copy_in(&self.copy_sql, &mut handle.reader).await?;
        if handle.owned {
            // Release the file handle we opened before the merge runs.
            drop(handle);
        }
        debug!("Copied {} rows into {}", copied, self.staging);
        hooks.post_copy(channel).await?;

        hooks.pre_insert(channel).await?;
        let inserted = channel.execute(&self.insert_sql).await?;
        info!("Merged {} rows into target table", inserted);
        hooks.post_insert(channel).await?;

        channel.execute(&self.drop_sql).await?;
        Ok(inserted)
    }
}

/// Extension points around the copy and insert steps of a load.
///
/// Every method defaults to a no-op; implement only the ones needed.
#[async_trait]
pub trait LoadHooks: Send {
    async fn pre_copy(&mut self, channel: &dyn BulkChannel) -> Result<()> {
        let _ = channel;
        Ok(())
    }

    async fn post_copy(&mut self, channel: &dyn BulkChannel) -> Result<()> {
        let _ = channel;
        Ok(())
    }

    async fn pre_insert(&mut self, channel: &dyn BulkChannel) -> Result<()> {
        let _ = channel;
        Ok(())
    }

    async fn post_insert(&mut self, channel: &dyn BulkChannel) -> Result<()> {
        let _ = channel;
        Ok(())
    }
}

/// Hooks that do nothing.
pub struct NoopHooks;

#[async_trait]
impl LoadHooks for NoopHooks {}
