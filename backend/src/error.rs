//! Error types for the smsbatch composition pipeline.
//!
//! This module defines a hierarchy of error types:
//!
//! - [`ParseError`] - file decoding and row extraction errors
//! - [`SchemaError`] - column plan errors
//! - [`TemplateError`] - template body validation errors
//! - [`RenderError`] - per-row rendering errors
//! - [`RegistryError`] - template registry errors
//! - [`BatchError`] - top-level batch orchestration errors
//!
//! Error conversion is automatic via `From` implementations,
//! allowing `?` to work across error boundaries. Per-row rejections
//! (length exceeded, missing URL binding, ...) are report data, not
//! errors: see [`crate::models::RejectReason`].

use thiserror::Error;

// =============================================================================
// File Parsing Errors
// =============================================================================

/// Errors while decoding a file and extracting raw rows.
#[derive(Debug, Error)]
pub enum ParseError {
    /// Failed to read file.
    #[error("Failed to read file: {0}")]
    IoError(#[from] std::io::Error),

    /// Declared encoding label is not supported.
    #[error("Unknown encoding: {0}")]
    UnknownEncoding(String),

    /// Unknown file kind label.
    #[error("Unknown file kind: {0}")]
    UnknownFileKind(String),

    /// Empty file.
    #[error("File is empty")]
    EmptyFile,

    /// Delimited input is structurally broken.
    #[error("Malformed record at line {line}: {message}")]
    Malformed { line: usize, message: String },

    /// Spreadsheet binary could not be opened or read.
    #[error("Spreadsheet error: {0}")]
    Spreadsheet(String),
}

// =============================================================================
// Schema Errors
// =============================================================================

/// Errors while resolving the column plan for a batch.
///
/// These are batch-fatal: the whole file is refused before any row
/// is mapped.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// Neither a named `tel` column nor positional column A is present.
    #[error("No phone number column: expected a 'tel' header or positional column A")]
    MissingPhoneColumn,
}

// =============================================================================
// Template Errors
// =============================================================================

/// Errors while validating a template body.
#[derive(Debug, Error)]
pub enum TemplateError {
    /// A `{URLn}` tag references an index outside 1..=4.
    #[error("URL tag index {index} is out of range (valid: 1..=4)")]
    UrlIndexOutOfRange { index: u32 },

    /// All four URL slots are already taken.
    #[error("Cannot insert another URL tag: all 4 slots are in use")]
    UrlSlotsExhausted,
}

// =============================================================================
// Rendering Errors
// =============================================================================

/// Errors while rendering a row against a template.
#[derive(Debug, Error)]
pub enum RenderError {
    /// A URL tag has no bound original URL on the send options, the row,
    /// or the template. Rejects the row in final mode only.
    #[error("URL slot {slot} has no bound original URL")]
    MissingUrlBinding { slot: u8 },

    /// The URL shortening collaborator failed at dispatch time.
    #[error("Shortening failed for URL slot {slot}: {message}")]
    Shorten { slot: u8, message: String },
}

// =============================================================================
// Registry Errors
// =============================================================================

/// Errors from the template store on disk.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// No stored template under this id.
    #[error("Template not found: {0}")]
    NotFound(String),

    /// Stored template failed validation.
    #[error("Invalid template: {0}")]
    InvalidTemplate(#[from] TemplateError),

    /// Filesystem error in the registry directory.
    #[error("Registry IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Stored template file does not parse.
    #[error("Registry JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

// =============================================================================
// Batch Errors (top-level)
// =============================================================================

/// Top-level batch orchestration errors.
///
/// This is the fatal side of [`crate::batch::BatchPipeline::run`]: when any
/// of these occur, no [`crate::models::BatchReport`] is produced at all.
/// Per-row problems never surface here; they are accounted for inside the
/// report instead.
#[derive(Debug, Error)]
pub enum BatchError {
    /// File decoding or row extraction failed.
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    /// Column plan could not be resolved.
    #[error("Schema error: {0}")]
    Schema(#[from] SchemaError),

    /// Template body failed validation.
    #[error("Template error: {0}")]
    Template(#[from] TemplateError),

    /// The file holds more rows than the configured ceiling.
    #[error("Batch of {count} rows exceeds the {limit}-row limit")]
    TooManyRows { count: usize, limit: usize },

    /// The run was cancelled at a chunk boundary.
    #[error("Batch run cancelled")]
    Cancelled,

    /// The accepted-message sink failed.
    #[error("Sink error: {0}")]
    Sink(std::io::Error),
}

// =============================================================================
// Server Errors
// =============================================================================

/// HTTP server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Batch pipeline error.
    #[error("Batch error: {0}")]
    Batch(#[from] BatchError),

    /// Registry error.
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Template body error.
    #[error("Template error: {0}")]
    Template(#[from] TemplateError),

    /// Rendering error.
    #[error("Render error: {0}")]
    Render(#[from] RenderError),

    /// Invalid request.
    #[error("Invalid request: {0}")]
    BadRequest(String),
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for parsing operations.
pub type ParseResult<T> = Result<T, ParseError>;

/// Result type for schema operations.
pub type SchemaResult<T> = Result<T, SchemaError>;

/// Result type for template operations.
pub type TemplateResult<T> = Result<T, TemplateError>;

/// Result type for rendering operations.
pub type RenderResult<T> = Result<T, RenderError>;

/// Result type for registry operations.
pub type RegistryResult<T> = Result<T, RegistryError>;

/// Result type for batch operations.
pub type BatchResult<T> = Result<T, BatchError>;

/// Result type for HTTP handlers.
pub type ServerResult<T> = Result<T, ServerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_errors_wrap_into_batch_error() {
        // ParseError -> BatchError
        let parse_err = ParseError::EmptyFile;
        let batch_err: BatchError = parse_err.into();
        assert!(batch_err.to_string().contains("empty"));

        // SchemaError -> BatchError
        let schema_err = SchemaError::MissingPhoneColumn;
        let batch_err: BatchError = schema_err.into();
        assert!(batch_err.to_string().contains("tel"));
    }

    #[test]
    fn test_too_many_rows_format() {
        let err = BatchError::TooManyRows { count: 500_001, limit: 500_000 };
        let msg = err.to_string();
        assert!(msg.contains("500001"));
        assert!(msg.contains("500000"));
    }

    #[test]
    fn test_missing_url_binding_names_slot() {
        let err = RenderError::MissingUrlBinding { slot: 3 };
        assert!(err.to_string().contains("slot 3"));
    }
}
