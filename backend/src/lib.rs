//! # smsbatch - bulk SMS composition for the marketing console
//!
//! smsbatch turns recipient files (CSV, Shift_JIS or UTF-8, or XLSX) and
//! message templates into composed, measured SMS batches, with a full
//! accounting of every accepted, skipped, and rejected row.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │ Recipient   │────▶│   Parser    │────▶│   Mapper    │────▶│   Batch     │
//! │ file        │     │ (auto-enc)  │     │ (canonical  │     │ (render +   │
//! │ (CSV/XLSX)  │     │             │     │   rows)     │     │  measure)   │
//! └─────────────┘     └─────────────┘     └─────────────┘     └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use smsbatch::batch::{BatchPipeline, CancelToken, CollectSink};
//! use smsbatch::parser::FileEncoding;
//! use smsbatch::template::{TagDefaultTable, Template};
//!
//! #[tokio::main]
//! async fn main() {
//!     let template = Template::new("t-1", "sale", "Hi {info1}, see {URL}")
//!         .unwrap()
//!         .with_url_slot(1, "https://example.com/sale");
//!     let defaults = TagDefaultTable::default();
//!     let pipeline = BatchPipeline::new(&template, &defaults);
//!
//!     let mut sink = CollectSink::default();
//!     let report = pipeline
//!         .submit_file("recipients.csv".as_ref(), FileEncoding::Auto, None, &mut sink, &CancelToken::new())
//!         .await
//!         .unwrap();
//!     println!("accepted {} of {}", report.accepted_rows, report.total_rows);
//! }
//! ```
//!
//! ## Modules
//!
//! - [`error`] - Hierarchical error types
//! - [`models`] - Domain models (CanonicalRow, OutboundMessage, BatchReport)
//! - [`segment`] - Character counting and billing segments
//! - [`template`] - Templates, tag grammar, rendering
//! - [`parser`] - Recipient file parsing with auto-detection
//! - [`mapper`] - Column schema resolution
//! - [`registry`] - File-backed template store and permissions
//! - [`batch`] - The batch composition pipeline
//! - [`api`] - HTTP API server

// Core modules
pub mod error;
pub mod models;

// Length accounting
pub mod segment;

// Templates and rendering
pub mod template;

// Parsing
pub mod parser;

// Schema mapping
pub mod mapper;

// Template store and permissions
pub mod registry;

// Batch composition
pub mod batch;

// HTTP API
pub mod api;

// =============================================================================
// Re-exports - Error types
// =============================================================================

pub use error::{
    BatchError,
    ParseError,
    RegistryError,
    RenderError,
    SchemaError,
    ServerError,
    TemplateError,
};

// =============================================================================
// Re-exports - Models
// =============================================================================

pub use models::{
    is_international,
    BatchOptions,
    BatchReport,
    CallerPermissions,
    CanonicalRow,
    OutboundMessage,
    RejectReason,
    RejectedRow,
    SendOptions,
    UrlBinding,
    UrlOverrides,
};

// =============================================================================
// Re-exports - Length Accounting
// =============================================================================

pub use segment::{
    char_count,
    measure,
    Carrier,
    SegmentationResult,
    SmsLengthOptions,
    DOCOMO_LONG_SMS_LIMIT,
    OTHER_LONG_SMS_LIMIT,
    SHORT_URL_PLACEHOLDER,
    STANDARD_SMS_LIMIT,
};

// =============================================================================
// Re-exports - Templates
// =============================================================================

pub use template::{
    append_url_tag,
    finalize_body,
    measure_text,
    next_url_index,
    normalize_url_tags,
    preview_render,
    validate_body,
    RenderMode,
    RenderedMessage,
    Renderer,
    TagDefaultTable,
    Template,
    UrlShortener,
};

// =============================================================================
// Re-exports - Parsing
// =============================================================================

pub use parser::{
    column_letter,
    decode_bytes,
    detect_delimiter,
    detect_encoding,
    parse_bytes,
    parse_file,
    FileEncoding,
    FileKind,
    ParsedFile,
    RawRow,
};

// =============================================================================
// Re-exports - Schema Mapping
// =============================================================================

pub use mapper::{is_truthy, parse_send_at, CanonicalField, SchemaPlan};

// =============================================================================
// Re-exports - Registry
// =============================================================================

pub use registry::{
    load_tag_defaults,
    permissions_for,
    FixedUrlShortener,
    Permission,
    PermissionStore,
    StaticPermissions,
    StoredTemplate,
    TemplateRegistry,
};

// =============================================================================
// Re-exports - Batch Pipeline
// =============================================================================

pub use batch::{BatchPipeline, CancelToken, CollectSink, CountSink, MessageSink};

// =============================================================================
// Re-exports - API
// =============================================================================

pub use api::types::{error_response, BatchResponse, FileMetadata, ReportBody};

// Server
pub mod server {
    pub use crate::api::server::start_server;
}
