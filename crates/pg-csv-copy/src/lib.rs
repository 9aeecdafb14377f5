//! Bulk CSV load and export for PostgreSQL over the COPY wire protocol.
//!
//! Loads stage the raw file into a temporary table with `COPY FROM STDIN`,
//! then merge-insert into the target table with per-column casts, SQL
//! expression templates, value recoding, and optional `ON CONFLICT`
//! handling. Exports wrap an arbitrary select in `COPY TO STDOUT` and stream
//! the formatted rows to a writer, file, or in-memory buffer.
//!
//! ```no_run
//! use pg_csv_copy::{
//!     load, ColumnMapping, ColumnMeta, CopySource, LoadOptions, PgChannel,
//!     TableSchema, TransactionState,
//! };
//!
//! # async fn demo(client: &tokio_postgres::Client) -> pg_csv_copy::Result<()> {
//! let schema = TableSchema::new(
//!     "people",
//!     vec![
//!         ColumnMeta::new("id", "serial"),
//!         ColumnMeta::new("name", "text"),
//!         ColumnMeta::new("number", "integer"),
//!     ],
//! );
//! let mapping = ColumnMapping::new()
//!     .map("name", "NAME")
//!     .map("number", "NUMBER");
//!
//! let channel = PgChannel::new(client);
//! let rows = load(
//!     &channel,
//!     TransactionState::None,
//!     &schema,
//!     CopySource::path("people.csv"),
//!     Some(mapping),
//!     &LoadOptions::new(),
//! )
//! .await?;
//! println!("loaded {} rows", rows);
//! # Ok(())
//! # }
//! ```

pub mod copy_from;
pub mod copy_to;
pub mod error;
pub mod header;
pub mod identifier;
pub mod mapping;
pub mod pipeline;
pub mod protocol;
pub mod schema;
pub mod sql;
pub mod suspension;

pub use copy_from::{CopyFrom, LoadHooks, LoadOptions, NoopHooks};
pub use copy_to::{CopyDestination, CopyTo, SelectQuery};
pub use error::{CopyError, Result};
pub use header::{read_headers, CopySource};
pub use mapping::{ColumnMapping, ResolvedMapping};
pub use pipeline::{export, load, load_with, Capabilities, TransactionState};
pub use protocol::{BulkChannel, PgChannel, ProtocolKind, Utf8TextSink, COPY_BUFFER_SIZE};
pub use schema::{ColumnMeta, IndexMeta, TableSchema, UniqueConstraint};
pub use sql::{
    ConflictAction, ConflictTarget, CopyInOptions, CopyOutOptions, ForceQuote, Literal,
};
pub use suspension::{SchemaMutation, SuspensionManager, SuspensionPlan};
