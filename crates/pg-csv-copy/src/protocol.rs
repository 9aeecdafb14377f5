//! Database channel abstraction over the bulk-transfer wire protocol.
//!
//! [`BulkChannel`] is the seam between statement generation and the server:
//! plain statement execution, scalar queries, and the two streaming transfer
//! directions. [`PgChannel`] implements it over a live tokio-postgres client;
//! tests drive the pipeline through a scripted in-memory channel instead.

use std::io::{Read, Write};

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio_postgres::{Client, SimpleQueryMessage};
use tracing::debug;

use crate::error::{CopyError, Result};

/// Chunk size for the chunked transfer strategy.
pub const COPY_BUFFER_SIZE: usize = 128 * 1024;

/// How source bytes are fed into the copy-in stream.
///
/// The strategy is fixed when the channel is constructed; the pipeline never
/// probes the driver at run time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProtocolKind {
    /// Buffer the whole source and hand it over in one message.
    Inline,
    /// Stream the source in fixed-size chunks.
    #[default]
    Chunked,
}

/// Execution seam between the pipeline and the database.
#[async_trait]
pub trait BulkChannel: Send + Sync {
    /// Execute a statement, returning the affected row count.
    async fn execute(&self, sql: &str) -> Result<u64>;

    /// Run a query expected to produce a single scalar value.
    async fn query_scalar(&self, sql: &str) -> Result<String>;

    /// Run a copy-in statement, feeding it bytes from `source`. Returns the
    /// number of rows the server reports as copied.
    async fn copy_in(&self, sql: &str, source: &mut (dyn Read + Send)) -> Result<u64>;

    /// Run a copy-out statement, writing server bytes to `dest`. Returns the
    /// number of bytes written.
    async fn copy_out(&self, sql: &str, dest: &mut (dyn Write + Send)) -> Result<u64>;
}

/// [`BulkChannel`] over a borrowed tokio-postgres client.
///
/// Borrowing (rather than owning) the client lets the caller wrap a load in
/// its own transaction or connection-pool lease.
pub struct PgChannel<'a> {
    client: &'a Client,
    protocol: ProtocolKind,
}

impl<'a> PgChannel<'a> {
    /// Channel with the default chunked transfer strategy.
    pub fn new(client: &'a Client) -> Self {
        Self {
            client,
            protocol: ProtocolKind::default(),
        }
    }

    /// Channel with an explicit transfer strategy.
    pub fn with_protocol(client: &'a Client, protocol: ProtocolKind) -> Self {
        Self { client, protocol }
    }
}

#[async_trait]
impl BulkChannel for PgChannel<'_> {
    async fn execute(&self, sql: &str) -> Result<u64> {
        debug!("Executing: {}", sql);
        Ok(self.client.execute(sql, &[]).await?)
    }

    async fn query_scalar(&self, sql: &str) -> Result<String> {
        let messages = self.client.simple_query(sql).await?;
        for message in messages {
            if let SimpleQueryMessage::Row(row) = message {
                if let Some(value) = row.get(0) {
                    return Ok(value.to_string());
                }
            }
        }
        Err(CopyError::Config(format!(
            "query produced no scalar result: {}",
            sql
        )))
    }

    async fn copy_in(&self, sql: &str, source: &mut (dyn Read + Send)) -> Result<u64> {
        debug!("Copy in: {}", sql);
        let sink = self.client.copy_in::<_, Bytes>(sql).await?;
        tokio::pin!(sink);

        match self.protocol {
            ProtocolKind::Inline => {
                let mut payload = Vec::new();
                source.read_to_end(&mut payload)?;
                if !payload.is_empty() {
                    sink.send(Bytes::from(payload)).await?;
                }
            }
            ProtocolKind::Chunked => {
                let mut buf = vec![0u8; COPY_BUFFER_SIZE];
                loop {
                    let n = source.read(&mut buf)?;
                    if n == 0 {
                        break;
                    }
                    sink.send(Bytes::copy_from_slice(&buf[..n])).await?;
                }
            }
        }

        let rows = sink.finish().await?;
        debug!("Copy in complete ({} rows)", rows);
        Ok(rows)
    }

    async fn copy_out(&self, sql: &str, dest: &mut (dyn Write + Send)) -> Result<u64> {
        debug!("Copy out: {}", sql);
        let stream = self.client.copy_out(sql).await?;
        tokio::pin!(stream);

        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            dest.write_all(&chunk)?;
            written += chunk.len() as u64;
        }
        dest.flush()?;
        debug!("Copy out complete ({} bytes)", written);
        Ok(written)
    }
}

/// `io::Write` adapter that accumulates UTF-8 text, tolerating multi-byte
/// sequences split across write calls.
pub struct Utf8TextSink {
    text: String,
    pending: Vec<u8>,
}

impl Utf8TextSink {
    pub fn new() -> Self {
        Self {
            text: String::new(),
            pending: Vec::new(),
        }
    }

    /// Finish accumulation, failing if a partial sequence is left dangling.
    pub fn finish(self) -> Result<String> {
        if !self.pending.is_empty() {
            return Err(CopyError::encoding(
                "output ended inside a multi-byte UTF-8 sequence",
            ));
        }
        Ok(self.text)
    }
}

impl Default for Utf8TextSink {
    fn default() -> Self {
        Self::new()
    }
}

impl Write for Utf8TextSink {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut bytes = std::mem::take(&mut self.pending);
        bytes.extend_from_slice(buf);

        match std::str::from_utf8(&bytes) {
            Ok(valid) => {
                self.text.push_str(valid);
            }
            Err(err) => {
                let valid_up_to = err.valid_up_to();
                // Already validated prefix.
                let valid = unsafe { std::str::from_utf8_unchecked(&bytes[..valid_up_to]) };
                self.text.push_str(valid);
                match err.error_len() {
                    None => {
                        // Incomplete trailing sequence; wait for more bytes.
                        self.pending = bytes[valid_up_to..].to_vec();
                    }
                    Some(_) => {
                        return Err(std::io::Error::new(
                            std::io::ErrorKind::InvalidData,
                            "output is not valid UTF-8",
                        ));
                    }
                }
            }
        }

        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
