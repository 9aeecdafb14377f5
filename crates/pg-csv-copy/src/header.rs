//! Source handling and header parsing for delimited text input.
//!
//! The first record of the source supplies the column names that drive
//! staging-table creation and mapping resolution. Sources are byte streams;
//! the declared text encoding (default UTF-8) is used to decode the header
//! record, and the stream is rewound afterwards so the same source can be
//! consumed again by the bulk transfer.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::PathBuf;

use encoding_rs::{CoderResult, Encoding, UTF_8};
use tracing::debug;

use crate::error::{CopyError, Result};

/// Seekable byte source.
pub trait ReadSeek: Read + Seek + Send {}

impl<T: Read + Seek + Send> ReadSeek for T {}

/// A delimited-text source for a load.
pub enum CopySource {
    /// A file path; the pipeline opens and closes it.
    Path(PathBuf),
    /// A caller-provided stream; the caller owns its lifecycle.
    Reader(Box<dyn ReadSeek>),
}

impl CopySource {
    /// Source backed by a file path.
    pub fn path(path: impl Into<PathBuf>) -> Self {
        CopySource::Path(path.into())
    }

    /// Source backed by a caller-owned seekable reader.
    pub fn reader(reader: impl Read + Seek + Send + 'static) -> Self {
        CopySource::Reader(Box::new(reader))
    }

    /// Open the source, validating that a path source actually exists.
    pub(crate) fn open(self) -> Result<SourceHandle> {
        match self {
            CopySource::Path(path) => {
                if !path.exists() {
                    return Err(CopyError::Config(format!(
                        "source path does not exist: {}",
                        path.display()
                    )));
                }
                debug!("Opening source file {}", path.display());
                let file = File::open(&path)?;
                Ok(SourceHandle {
                    reader: Box::new(file),
                    owned: true,
                })
            }
            CopySource::Reader(reader) => Ok(SourceHandle {
                reader,
                owned: false,
            }),
        }
    }
}

/// An opened source, tracking whether the pipeline owns the handle.
pub(crate) struct SourceHandle {
    pub reader: Box<dyn ReadSeek>,
    pub owned: bool,
}

/// Resolve a caller-declared encoding label, defaulting to UTF-8.
pub(crate) fn resolve_encoding(label: Option<&str>) -> Result<&'static Encoding> {
    match label {
        Some(value) => Encoding::for_label(value.trim().as_bytes())
            .ok_or_else(|| CopyError::Config(format!("unknown encoding '{}'", value))),
        None => Ok(UTF_8),
    }
}

/// Convert the configured delimiter to the single byte the parser needs.
pub(crate) fn delimiter_byte(delimiter: char) -> Result<u8> {
    if delimiter.is_ascii() {
        Ok(delimiter as u8)
    } else {
        Err(CopyError::Config(format!(
            "delimiter must be a single-byte character, got '{}'",
            delimiter
        )))
    }
}

/// Read the ordered column names from the first record of the source.
///
/// Bytes are decoded incrementally with the declared encoding until a full
/// record is available, then the stream is rewound to the start. A quoted
/// header field may contain embedded newlines. The declared encoding is
/// authoritative: a byte-order mark never switches the decoder, though a
/// BOM matching the declared encoding is stripped.
pub fn read_headers(
    reader: &mut dyn ReadSeek,
    delimiter: char,
    encoding: Option<&str>,
) -> Result<Vec<String>> {
    let delim = delimiter_byte(delimiter)?;
    let enc = resolve_encoding(encoding)?;
    debug!("Retrieving headers ({} encoding)", enc.name());

    let mut decoder = enc.new_decoder_with_bom_removal();
    let mut text = String::new();
    let mut buf = [0u8; 8192];

    loop {
        let n = reader.read(&mut buf)?;
        let last = n == 0;
        let mut consumed = 0;
        loop {
            text.reserve(8192);
            let (result, read, had_errors) =
                decoder.decode_to_string(&buf[consumed..n], &mut text, last);
            if had_errors {
                return Err(CopyError::encoding(format!(
                    "source bytes are not valid {}",
                    enc.name()
                )));
            }
            consumed += read;
            match result {
                CoderResult::InputEmpty => break,
                CoderResult::OutputFull => continue,
            }
        }
        // A newline only ends the header record outside quoted fields, so
        // keep reading while an opened quote is unbalanced.
        if last || (text.contains('\n') && text.matches('"').count() % 2 == 0) {
            break;
        }
    }

    // Rewind so the bulk transfer can consume the source from the start.
    reader.seek(SeekFrom::Start(0))?;

    if text.trim().is_empty() {
        return Err(CopyError::config("source file has no header record"));
    }

    let mut csv_reader = csv::ReaderBuilder::new()
        .delimiter(delim)
        .has_headers(true)
        .from_reader(text.as_bytes());
    let record = csv_reader
        .headers()
        .map_err(|e| CopyError::config(format!("failed to parse header record: {}", e)))?
        .clone();

    Ok(record.iter().map(str::to_string).collect())
}
