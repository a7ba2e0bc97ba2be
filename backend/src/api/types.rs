//! REST API types for the console frontend.
//!
//! Wire shapes are camelCase mirrors of the domain types; conversion
//! happens here so handlers stay thin.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::models::{BatchReport, CanonicalRow, RejectReason, SendOptions, UrlBinding};
use crate::parser::ParsedFile;
use crate::segment::SegmentationResult;
use crate::template::RenderedMessage;

// =============================================================================
// Batch Submit
// =============================================================================

/// Response sent to the console after a batch upload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResponse {
    /// Unique job identifier
    pub job_id: String,

    /// Status: "ready", "warning", "failed"
    pub status: String,

    /// Per-batch accounting
    pub report: ReportBody,

    /// Uploaded file metadata
    pub file: FileMetadata,
}

impl BatchResponse {
    pub fn new(report: BatchReport, file: FileMetadata) -> Self {
        let status = if report.failed {
            "failed"
        } else if report.rejected_count > 0 {
            "warning"
        } else {
            "ready"
        };
        Self {
            job_id: Uuid::new_v4().to_string(),
            status: status.to_string(),
            report: report.into(),
            file,
        }
    }
}

/// Batch accounting in wire shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportBody {
    pub total_rows: usize,
    pub accepted_rows: usize,
    pub skipped_rows: usize,
    pub rejected_count: usize,
    pub rejected_rows: Vec<RejectedRowBody>,
    pub has_international_numbers: bool,
    pub truncated_at_limit: bool,
    pub failed: bool,
}

/// One rejected row in wire shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RejectedRowBody {
    pub row_index: usize,
    /// Machine token ("empty_phone_number", ...)
    pub reason: RejectReason,
    /// Human-readable label for display
    pub detail: String,
}

impl From<BatchReport> for ReportBody {
    fn from(report: BatchReport) -> Self {
        Self {
            total_rows: report.total_rows,
            accepted_rows: report.accepted_rows,
            skipped_rows: report.skipped_rows,
            rejected_count: report.rejected_count,
            rejected_rows: report
                .rejected_rows
                .into_iter()
                .map(|row| RejectedRowBody {
                    row_index: row.row_index,
                    reason: row.reason,
                    detail: row.reason.describe().to_string(),
                })
                .collect(),
            has_international_numbers: report.has_international_numbers,
            truncated_at_limit: report.truncated_at_limit,
            failed: report.failed,
        }
    }
}

/// Uploaded file metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    pub kind: String,
    pub encoding: String,
    pub delimiter: Option<String>,
    pub row_count: usize,
    pub columns: Vec<String>,
}

impl From<&ParsedFile> for FileMetadata {
    fn from(parsed: &ParsedFile) -> Self {
        Self {
            kind: parsed.kind.label().to_string(),
            encoding: parsed.encoding.clone(),
            delimiter: parsed.delimiter.map(|c| c.to_string()),
            row_count: parsed.row_count,
            columns: parsed.headers.clone(),
        }
    }
}

// =============================================================================
// Preview
// =============================================================================

/// JSON body for `POST /api/preview`.
///
/// Either `template_id` (resolved against the registry) or an inline
/// `body` must be present; `body` wins when both are.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewRequest {
    #[serde(default)]
    pub template_id: Option<String>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub sample: SampleRow,
    #[serde(default)]
    pub enable_long_sms: bool,
    #[serde(default)]
    pub sender_number: String,
}

/// Sample recipient values typed into the editor.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SampleRow {
    #[serde(default)]
    pub info1: Option<String>,
    #[serde(default)]
    pub info2: Option<String>,
    #[serde(default)]
    pub info3: Option<String>,
    #[serde(default)]
    pub info4: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub original_url: Option<String>,
}

impl SampleRow {
    /// Canonical row for the renderer, with a placeholder phone number.
    pub fn to_row(&self) -> CanonicalRow {
        CanonicalRow {
            info1: self.info1.clone(),
            info2: self.info2.clone(),
            info3: self.info3.clone(),
            info4: self.info4.clone(),
            message: self.message.clone(),
            original_url: self.original_url.clone(),
            ..Default::default()
        }
    }
}

/// Rendered preview plus its length accounting.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewResponse {
    pub text: String,
    pub dispatch_body: String,
    pub url_bindings: Vec<UrlBindingBody>,
    pub character_count: usize,
    pub segment_count: usize,
    pub limit: usize,
    pub exceeded: bool,
}

impl PreviewResponse {
    pub fn new(rendered: RenderedMessage, measured: SegmentationResult) -> Self {
        Self {
            text: rendered.text,
            dispatch_body: rendered.dispatch_body,
            url_bindings: rendered.url_bindings.into_iter().map(Into::into).collect(),
            character_count: measured.character_count,
            segment_count: measured.segment_count,
            limit: measured.limit,
            exceeded: measured.exceeded,
        }
    }
}

/// One URL slot binding in wire shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UrlBindingBody {
    pub slot: u8,
    pub original_url: String,
}

impl From<UrlBinding> for UrlBindingBody {
    fn from(binding: UrlBinding) -> Self {
        Self { slot: binding.slot, original_url: binding.original_url }
    }
}

// =============================================================================
// Measure / Normalize
// =============================================================================

/// JSON body for `POST /api/measure`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeasureRequest {
    pub text: String,
    #[serde(default)]
    pub enable_long_sms: bool,
    #[serde(default)]
    pub sender_number: String,
}

impl MeasureRequest {
    pub fn send_options(&self) -> SendOptions {
        SendOptions {
            enable_long_sms: self.enable_long_sms,
            sender_number: self.sender_number.clone(),
            ..Default::default()
        }
    }
}

/// Length accounting in wire shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MeasureResponse {
    pub character_count: usize,
    pub segment_count: usize,
    pub limit: usize,
    pub exceeded: bool,
}

impl From<SegmentationResult> for MeasureResponse {
    fn from(measured: SegmentationResult) -> Self {
        Self {
            character_count: measured.character_count,
            segment_count: measured.segment_count,
            limit: measured.limit,
            exceeded: measured.exceeded,
        }
    }
}

/// JSON body for `POST /api/normalize`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizeRequest {
    pub body: String,
}

/// Normalized body plus editor affordances.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizeResponse {
    pub body: String,
    pub changed: bool,
    /// Distinct URL slots referenced by the normalized body
    pub url_count: usize,
    /// Index the next inserted URL tag would take; absent when all
    /// four slots are in use
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_url_index: Option<u8>,
}

// =============================================================================
// Errors
// =============================================================================

/// Create an error response
pub fn error_response(error: &str) -> Value {
    json!({
        "jobId": Uuid::new_v4().to_string(),
        "status": "error",
        "error": error,
    })
}
