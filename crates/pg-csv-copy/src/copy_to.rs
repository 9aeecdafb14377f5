//! The export pipeline: wrap a select in a copy-out statement and stream the
//! formatted rows to a destination.

use std::fs::File;
use std::io::Write;
use std::path::PathBuf;

use tracing::debug;

use crate::error::Result;
use crate::protocol::{BulkChannel, Utf8TextSink};
use crate::sql::{self, CopyOutOptions, Literal};

/// A compiled select statement with positional parameters.
///
/// The copy-out wrapper cannot carry bound parameters, so parameter values
/// are adapted through [`Literal`] and inlined before wrapping.
#[derive(Debug, Clone)]
pub struct SelectQuery {
    pub sql: String,
    pub params: Vec<Literal>,
}

impl SelectQuery {
    /// A parameterless select.
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    /// A select with positional `$N` parameters.
    pub fn with_params(sql: impl Into<String>, params: Vec<Literal>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }

    /// Substitute `$N` placeholders with adapted literal values.
    ///
    /// Highest index first, so `$1` never clobbers the prefix of `$10`.
    pub(crate) fn inline_params(&self) -> String {
        let mut sql = self.sql.clone();
        for (i, value) in self.params.iter().enumerate().rev() {
            let placeholder = format!("${}", i + 1);
            sql = sql.replace(&placeholder, &value.to_sql());
        }
        sql
    }
}

/// Where exported bytes go.
pub enum CopyDestination<'a> {
    /// A caller-provided writer.
    Writer(&'a mut (dyn Write + Send)),
    /// A file path, created (or truncated) by the export.
    Path(PathBuf),
    /// An in-memory buffer, returned to the caller.
    Buffer,
    /// Decoded UTF-8 text appended to a caller string. Multi-byte sequences
    /// split across network chunks are reassembled; output that is not valid
    /// UTF-8 fails the export.
    Text(&'a mut String),
}

/// A prepared export. [`run`](CopyTo::run) executes it; the statement can be
/// reused against multiple destinations.
pub struct CopyTo {
    sql: String,
}

impl CopyTo {
    /// Wrap a select in a copy-out statement with the given format options.
    pub fn new(query: &SelectQuery, options: &CopyOutOptions) -> Result<Self> {
        let sql = sql::copy_out(&query.inline_params(), options)?;
        Ok(Self { sql })
    }

    /// The generated copy-out statement.
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Execute the export. Returns the exported bytes only for a
    /// [`CopyDestination::Buffer`] destination.
    pub async fn run(
        &self,
        channel: &dyn BulkChannel,
        dest: CopyDestination<'_>,
    ) -> Result<Option<Vec<u8>>> {
        match dest {
            CopyDestination::Writer(writer) => {
                let written = channel.copy_out(&self.sql, writer).await?;
                debug!("Exported {} bytes to writer", written);
                Ok(None)
            }
            CopyDestination::Path(path) => {
                let mut file = File::create(&path)?;
                let written = channel.copy_out(&self.sql, &mut file).await?;
                debug!("Exported {} bytes to {}", written, path.display());
                Ok(None)
            }
            CopyDestination::Buffer => {
                let mut buffer = Vec::new();
                let written = channel.copy_out(&self.sql, &mut buffer).await?;
                debug!("Exported {} bytes to buffer", written);
                Ok(Some(buffer))
            }
            CopyDestination::Text(text) => {
                let mut sink = Utf8TextSink::new();
                let written = channel.copy_out(&self.sql, &mut sink).await?;
                text.push_str(&sink.finish()?);
                debug!("Exported {} bytes as text", written);
                Ok(None)
            }
        }
    }
}
