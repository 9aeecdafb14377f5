//! Identifier validation and quoting for generated SQL.
//!
//! Every statement this crate produces inlines identifiers (and a documented
//! set of caller-controlled literals) into SQL text, because PostgreSQL does
//! not allow identifiers to be bound as parameters. All interpolation flows
//! through this module: identifiers are validated and double-quoted, string
//! literals are single-quoted with embedded quotes doubled.

use crate::error::{CopyError, Result};

/// Maximum identifier length accepted (PostgreSQL truncates at 63 bytes;
/// anything longer is almost certainly not a real column name).
const MAX_IDENTIFIER_LENGTH: usize = 63;

/// Validate an identifier before it is interpolated into SQL.
///
/// Rejects empty names, names containing null bytes, and names exceeding the
/// PostgreSQL identifier length limit.
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(CopyError::config("Identifier cannot be empty"));
    }

    if name.contains('\0') {
        return Err(CopyError::Config(format!(
            "Identifier contains null byte: {:?}",
            name
        )));
    }

    if name.len() > MAX_IDENTIFIER_LENGTH {
        return Err(CopyError::Config(format!(
            "Identifier exceeds maximum length of {} bytes (got {} bytes): {:?}",
            MAX_IDENTIFIER_LENGTH,
            name.len(),
            name
        )));
    }

    Ok(())
}

/// Quote a PostgreSQL identifier.
///
/// Escapes double quotes by doubling them and wraps in double quotes.
/// Validates the identifier before quoting.
pub fn quote_ident(name: &str) -> Result<String> {
    validate_identifier(name)?;
    Ok(format!("\"{}\"", name.replace('"', "\"\"")))
}

/// Quote a string literal for inline use in generated SQL.
///
/// Single quotes are doubled. Values embedded this way are limited to
/// caller-controlled option strings and static/value-map literals.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
