//! Batch composition: from uploaded file to accepted messages.
//!
//! This module drives a whole submit. It parses the uploaded file,
//! resolves the column plan, then walks the rows composing one message
//! per recipient. Rows are consumed in chunks with an await point
//! between chunks, so a server can keep streaming logs and honor
//! cancellation while a large file grinds through.
//!
//! # Example
//!
//! ```rust,ignore
//! use smsbatch::batch::{BatchPipeline, CancelToken, CollectSink};
//! use smsbatch::parser::{FileEncoding, FileKind};
//! use smsbatch::template::{TagDefaultTable, Template};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let template = Template::new("t-1", "sale", "Hi {info1}, see {URL}")?
//!         .with_url_slot(1, "https://example.com/sale");
//!     let defaults = TagDefaultTable::default();
//!     let pipeline = BatchPipeline::new(&template, &defaults);
//!
//!     let mut sink = CollectSink::default();
//!     let report = pipeline
//!         .submit_file("recipients.csv".as_ref(), FileEncoding::Auto, None, &mut sink, &CancelToken::new())
//!         .await?;
//!
//!     println!("accepted {} of {}", report.accepted_rows, report.total_rows);
//!     Ok(())
//! }
//! ```

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::api::logs::{log_error, log_info, log_info_from, log_success, log_success_from, log_warning};
use crate::error::{BatchError, BatchResult};
use crate::mapper::SchemaPlan;
use crate::models::{
    BatchOptions, BatchReport, CallerPermissions, OutboundMessage, RejectReason, RejectedRow,
    SendOptions,
};
use crate::parser::{parse_bytes, parse_file, FileEncoding, FileKind, ParsedFile};
use crate::segment;
use crate::template::{RenderMode, Renderer, TagDefaultTable, Template};

// =============================================================================
// Cancellation
// =============================================================================

/// Cooperative cancellation flag, checked at chunk boundaries.
///
/// Clones share the flag, so a handle kept by the caller cancels a run
/// already handed to a task.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. The run stops at the next chunk boundary.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

// =============================================================================
// Message Sinks
// =============================================================================

/// Receiver for composed messages.
///
/// The pipeline hands over each accepted message as soon as it is
/// composed instead of buffering the whole batch. A sink failure is
/// fatal to the run ([`BatchError::Sink`]).
pub trait MessageSink: Send {
    fn accept(&mut self, message: OutboundMessage) -> std::io::Result<()>;
}

/// Sink that buffers every message in memory. Fine for tests and small
/// CLI runs, not for ceiling-sized files.
#[derive(Debug, Default)]
pub struct CollectSink {
    pub messages: Vec<OutboundMessage>,
}

impl MessageSink for CollectSink {
    fn accept(&mut self, message: OutboundMessage) -> std::io::Result<()> {
        self.messages.push(message);
        Ok(())
    }
}

/// Sink that only counts, for dry runs where the report is the product.
#[derive(Debug, Default)]
pub struct CountSink {
    pub count: usize,
}

impl MessageSink for CountSink {
    fn accept(&mut self, _message: OutboundMessage) -> std::io::Result<()> {
        self.count += 1;
        Ok(())
    }
}

// =============================================================================
// Pipeline
// =============================================================================

/// One batch submit, frozen against a template snapshot.
///
/// The template and tag defaults are borrowed so the run sees exactly
/// the state it started with; registry edits made while a large file
/// is processing cannot leak in.
#[derive(Debug, Clone)]
pub struct BatchPipeline<'a> {
    pub template: &'a Template,
    pub defaults: &'a TagDefaultTable,
    pub send: SendOptions,
    pub permissions: CallerPermissions,
    pub options: BatchOptions,
}

impl<'a> BatchPipeline<'a> {
    /// Pipeline with default send options, no permissions, default
    /// tuning. Callers set the fields they care about.
    pub fn new(template: &'a Template, defaults: &'a TagDefaultTable) -> Self {
        Self {
            template,
            defaults,
            send: SendOptions::default(),
            permissions: CallerPermissions::default(),
            options: BatchOptions::default(),
        }
    }

    /// Parse a recipient file from disk and compose it.
    pub async fn submit_file(
        &self,
        path: &Path,
        encoding: FileEncoding,
        kind: Option<FileKind>,
        sink: &mut dyn MessageSink,
        cancel: &CancelToken,
    ) -> BatchResult<BatchReport> {
        log_info_from("parse", format!("Reading {}...", path.display()));
        let parsed = parse_file(path, encoding, kind)?;
        self.narrate_parsed(&parsed);
        self.run(parsed, sink, cancel).await
    }

    /// Parse uploaded bytes and compose them.
    pub async fn submit_bytes(
        &self,
        bytes: &[u8],
        encoding: FileEncoding,
        kind: FileKind,
        sink: &mut dyn MessageSink,
        cancel: &CancelToken,
    ) -> BatchResult<BatchReport> {
        log_info_from("parse", format!("Reading {} upload ({} bytes)...", kind.label(), bytes.len()));
        let parsed = parse_bytes(bytes, encoding, kind)?;
        self.narrate_parsed(&parsed);
        self.run(parsed, sink, cancel).await
    }

    /// Compose an already-parsed file.
    ///
    /// This is the core loop. Rows stream through in chunks of
    /// `options.chunk_size`; each boundary checks the cancel token and
    /// yields to the runtime.
    pub async fn run(
        &self,
        parsed: ParsedFile,
        sink: &mut dyn MessageSink,
        cancel: &CancelToken,
    ) -> BatchResult<BatchReport> {
        self.template.validate()?;

        if parsed.row_count > self.options.max_rows {
            log_error(format!(
                "File has {} rows, over the {}-row limit",
                parsed.row_count, self.options.max_rows
            ));
            return Err(BatchError::TooManyRows {
                count: parsed.row_count,
                limit: self.options.max_rows,
            });
        }

        let plan = SchemaPlan::from_headers(&parsed.headers)?;
        log_info(format!("Column plan: {}", plan.describe()));
        log_info(format!(
            "Composing {} rows against template \"{}\"...",
            parsed.row_count, self.template.name
        ));

        let renderer = Renderer::new(self.template, self.defaults, &self.send.url_overrides);
        let length = self.send.length_options();
        let chunk_size = self.options.chunk_size.max(1);

        let mut report = BatchReport::default();
        let mut composed = 0usize;
        let mut doomed = false;

        let mut rows = parsed.into_rows();
        'stream: loop {
            if cancel.is_cancelled() {
                log_warning("Batch run cancelled");
                return Err(BatchError::Cancelled);
            }

            for _ in 0..chunk_size {
                let Some(next) = rows.next() else { break 'stream };
                let raw = next?;
                report.total_rows += 1;

                let row = plan.map_row(&raw);

                if row.skip {
                    report.skipped_rows += 1;
                    continue;
                }

                if row.phone_number.is_empty() {
                    self.reject(&mut report, raw.index, RejectReason::EmptyPhoneNumber);
                    continue;
                }

                if row.is_international() {
                    report.has_international_numbers = true;
                    if !self.permissions.international_sms {
                        // One unpermitted international number voids the
                        // whole batch; keep scanning for the report.
                        self.reject(&mut report, raw.index, RejectReason::PermissionDenied);
                        doomed = true;
                        continue;
                    }
                }

                let rendered = match renderer.render(&row, RenderMode::Final) {
                    Ok(rendered) => rendered,
                    Err(_) => {
                        // Final-mode rendering only fails on unbound URL tags.
                        self.reject(&mut report, raw.index, RejectReason::MissingUrlBinding);
                        continue;
                    }
                };

                let measured = segment::measure(&rendered.text, &length);
                if measured.exceeded {
                    self.reject(&mut report, raw.index, RejectReason::LengthExceeded);
                    continue;
                }

                composed += 1;
                if !doomed {
                    let message = OutboundMessage {
                        row_index: raw.index,
                        phone_number: row.phone_number,
                        body: rendered.dispatch_body,
                        url_bindings: rendered.url_bindings,
                        send_at: row.send_at,
                        character_count: measured.character_count,
                        segment_count: measured.segment_count,
                    };
                    sink.accept(message).map_err(BatchError::Sink)?;
                }
            }

            tokio::task::yield_now().await;
        }

        report.truncated_at_limit = report.rejected_count > report.rejected_rows.len();
        report.failed = doomed;
        report.accepted_rows = if doomed { 0 } else { composed };
        self.narrate_report(&report);
        Ok(report)
    }

    fn reject(&self, report: &mut BatchReport, row_index: usize, reason: RejectReason) {
        report.rejected_count += 1;
        if report.rejected_rows.len() < self.options.max_rejection_details {
            report.rejected_rows.push(RejectedRow { row_index, reason });
        }
    }

    fn narrate_parsed(&self, parsed: &ParsedFile) {
        log_success_from("parse", format!("Decoded as {}", parsed.encoding));
        if let Some(delimiter) = parsed.delimiter {
            log_info_from("parse", format!("Delimiter: '{}'", format_delimiter(delimiter)));
        }
        log_success_from("parse", format!("{} data rows", parsed.row_count));
    }

    fn narrate_report(&self, report: &BatchReport) {
        if report.failed {
            log_error("Batch voided: international number(s) without permission, nothing will be sent");
        } else {
            log_success(format!(
                "Accepted {} of {} rows",
                report.accepted_rows, report.total_rows
            ));
        }
        if report.skipped_rows > 0 {
            log_info(format!("{} row(s) asked to be skipped", report.skipped_rows));
        }
        if report.rejected_count > 0 {
            log_warning(format!("{} row(s) rejected", report.rejected_count));
            for rejected in report.rejected_rows.iter().take(3) {
                log_warning(format!("• row {}: {}", rejected.row_index, rejected.reason));
            }
            if report.truncated_at_limit {
                log_warning(format!(
                    "Details kept for the first {} rejections only",
                    report.rejected_rows.len()
                ));
            }
        }
    }
}

/// Format delimiter for display
fn format_delimiter(d: char) -> &'static str {
    match d {
        ';' => ";",
        ',' => ",",
        '\t' => "TAB",
        '|' => "|",
        _ => "?",
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RejectReason;

    fn template() -> Template {
        Template::new("t-1", "campaign", "Hi {info1}, sale at {URL}")
            .unwrap()
            .with_url_slot(1, "https://example.com/sale")
    }

    async fn run_csv(
        pipeline: &BatchPipeline<'_>,
        csv: &str,
        sink: &mut dyn MessageSink,
    ) -> BatchResult<BatchReport> {
        pipeline
            .submit_bytes(
                csv.as_bytes(),
                FileEncoding::Auto,
                FileKind::Csv,
                sink,
                &CancelToken::new(),
            )
            .await
    }

    #[tokio::test]
    async fn test_accepts_simple_batch() {
        let template = template();
        let defaults = TagDefaultTable::default();
        let pipeline = BatchPipeline::new(&template, &defaults);

        let mut sink = CollectSink::default();
        let report = run_csv(
            &pipeline,
            "tel,info1\n09011111111,Alice\n09022222222,Bob\n",
            &mut sink,
        )
        .await
        .unwrap();

        assert_eq!(report.total_rows, 2);
        assert_eq!(report.accepted_rows, 2);
        assert_eq!(report.rejected_count, 0);
        assert!(!report.failed);

        let first = &sink.messages[0];
        assert_eq!(first.row_index, 0);
        assert_eq!(first.phone_number, "09011111111");
        // Dispatch body keeps the tag; shortening happens later.
        assert_eq!(first.body, "Hi Alice, sale at {URL}");
        assert_eq!(first.url_bindings.len(), 1);
        assert_eq!(first.url_bindings[0].original_url, "https://example.com/sale");
        assert_eq!(first.segment_count, 1);
    }

    #[tokio::test]
    async fn test_skip_and_empty_phone_accounting() {
        let template = template();
        let defaults = TagDefaultTable::default();
        let pipeline = BatchPipeline::new(&template, &defaults);

        let mut sink = CollectSink::default();
        let report = run_csv(
            &pipeline,
            "tel,info1,skip\n09011111111,Alice,\n09022222222,Bob,1\n,Carol,\n",
            &mut sink,
        )
        .await
        .unwrap();

        assert_eq!(report.total_rows, 3);
        assert_eq!(report.accepted_rows, 1);
        assert_eq!(report.skipped_rows, 1);
        assert_eq!(report.rejected_count, 1);
        assert_eq!(report.rejected_rows[0].row_index, 2);
        assert_eq!(report.rejected_rows[0].reason, RejectReason::EmptyPhoneNumber);
        assert_eq!(
            report.accepted_rows + report.skipped_rows + report.rejected_count,
            report.total_rows
        );
        assert_eq!(sink.messages.len(), 1);
    }

    #[tokio::test]
    async fn test_international_without_permission_voids_batch() {
        let template = template();
        let defaults = TagDefaultTable::default();
        let pipeline = BatchPipeline::new(&template, &defaults);

        let mut sink = CollectSink::default();
        let report = run_csv(
            &pipeline,
            "tel,info1\n09011111111,Alice\n+819022222222,Bob\n09033333333,Carol\n",
            &mut sink,
        )
        .await
        .unwrap();

        assert!(report.failed);
        assert!(report.has_international_numbers);
        assert_eq!(report.accepted_rows, 0);
        assert_eq!(report.total_rows, 3);
        assert_eq!(report.rejected_count, 1);
        assert_eq!(report.rejected_rows[0].row_index, 1);
        assert_eq!(report.rejected_rows[0].reason, RejectReason::PermissionDenied);
        // Only the row composed before the violation reached the sink;
        // a failed report tells the caller to discard it.
        assert_eq!(sink.messages.len(), 1);
    }

    #[tokio::test]
    async fn test_international_with_permission_composes() {
        let template = template();
        let defaults = TagDefaultTable::default();
        let mut pipeline = BatchPipeline::new(&template, &defaults);
        pipeline.permissions = CallerPermissions { international_sms: true };

        let mut sink = CollectSink::default();
        let report = run_csv(
            &pipeline,
            "tel,info1\n+819022222222,Bob\n09011111111,Alice\n",
            &mut sink,
        )
        .await
        .unwrap();

        assert!(!report.failed);
        assert!(report.has_international_numbers);
        assert_eq!(report.accepted_rows, 2);
        assert_eq!(sink.messages.len(), 2);
    }

    #[tokio::test]
    async fn test_row_cap_is_fatal() {
        let template = template();
        let defaults = TagDefaultTable::default();
        let mut pipeline = BatchPipeline::new(&template, &defaults);
        pipeline.options.max_rows = 2;

        let mut sink = CountSink::default();
        let err = run_csv(
            &pipeline,
            "tel\n09011111111\n09022222222\n09033333333\n",
            &mut sink,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, BatchError::TooManyRows { count: 3, limit: 2 }));
        assert_eq!(sink.count, 0);
    }

    #[tokio::test]
    async fn test_length_rejection() {
        let body = "a".repeat(71);
        let template = Template::new("t-long", "long", body.as_str()).unwrap();
        let defaults = TagDefaultTable::default();
        let pipeline = BatchPipeline::new(&template, &defaults);

        let mut sink = CountSink::default();
        let report = run_csv(&pipeline, "tel\n09011111111\n", &mut sink).await.unwrap();

        assert_eq!(report.rejected_count, 1);
        assert_eq!(report.rejected_rows[0].reason, RejectReason::LengthExceeded);
        assert_eq!(sink.count, 0);
    }

    #[tokio::test]
    async fn test_long_sms_lifts_the_limit() {
        let body = "a".repeat(71);
        let template = Template::new("t-long", "long", body.as_str()).unwrap();
        let defaults = TagDefaultTable::default();
        let mut pipeline = BatchPipeline::new(&template, &defaults);
        pipeline.send.enable_long_sms = true;
        pipeline.send.sender_number = "09012345678".into();

        let mut sink = CollectSink::default();
        let report = run_csv(&pipeline, "tel\n09011111111\n", &mut sink).await.unwrap();

        assert_eq!(report.accepted_rows, 1);
        assert_eq!(sink.messages[0].character_count, 71);
        assert_eq!(sink.messages[0].segment_count, 2);
    }

    #[tokio::test]
    async fn test_missing_url_binding_rejects_row() {
        let template = Template::new("t-2", "two links", "{URL1} and {URL2}")
            .unwrap()
            .with_url_slot(1, "https://example.com/one");
        let defaults = TagDefaultTable::default();
        let pipeline = BatchPipeline::new(&template, &defaults);

        let mut sink = CountSink::default();
        let report = run_csv(&pipeline, "tel\n09011111111\n", &mut sink).await.unwrap();

        assert_eq!(report.rejected_count, 1);
        assert_eq!(report.rejected_rows[0].reason, RejectReason::MissingUrlBinding);
    }

    #[tokio::test]
    async fn test_rejection_details_are_capped() {
        let template = template();
        let defaults = TagDefaultTable::default();
        let mut pipeline = BatchPipeline::new(&template, &defaults);
        pipeline.options.max_rejection_details = 2;

        let mut sink = CountSink::default();
        let report = run_csv(
            &pipeline,
            "tel,memo\n,a\n,b\n,c\n,d\n",
            &mut sink,
        )
        .await
        .unwrap();

        assert_eq!(report.rejected_count, 4);
        assert_eq!(report.rejected_rows.len(), 2);
        assert!(report.truncated_at_limit);
        // Details are kept in row order.
        assert_eq!(report.rejected_rows[0].row_index, 0);
        assert_eq!(report.rejected_rows[1].row_index, 1);
    }

    #[tokio::test]
    async fn test_cancel_stops_the_run() {
        let template = template();
        let defaults = TagDefaultTable::default();
        let pipeline = BatchPipeline::new(&template, &defaults);

        let cancel = CancelToken::new();
        cancel.cancel();

        let mut sink = CountSink::default();
        let err = pipeline
            .submit_bytes(
                b"tel\n09011111111\n",
                FileEncoding::Auto,
                FileKind::Csv,
                &mut sink,
                &cancel,
            )
            .await
            .unwrap_err();

        assert!(matches!(err, BatchError::Cancelled));
        assert_eq!(sink.count, 0);
    }

    #[tokio::test]
    async fn test_small_chunks_cover_all_rows() {
        let template = template();
        let defaults = TagDefaultTable::default();
        let mut pipeline = BatchPipeline::new(&template, &defaults);
        pipeline.options.chunk_size = 1;

        let mut sink = CountSink::default();
        let report = run_csv(
            &pipeline,
            "tel\n09011111111\n09022222222\n09033333333\n",
            &mut sink,
        )
        .await
        .unwrap();

        assert_eq!(report.accepted_rows, 3);
        assert_eq!(sink.count, 3);
    }

    #[tokio::test]
    async fn test_send_at_passes_through() {
        let template = template();
        let defaults = TagDefaultTable::default();
        let pipeline = BatchPipeline::new(&template, &defaults);

        let mut sink = CollectSink::default();
        run_csv(
            &pipeline,
            "tel,send_at\n09011111111,2026-09-01 09:30\n",
            &mut sink,
        )
        .await
        .unwrap();

        let send_at = sink.messages[0].send_at.unwrap();
        assert_eq!(send_at.to_string(), "2026-09-01 09:30:00");
    }
}
