//! Domain models for the smsbatch composition pipeline.
//!
//! This module contains the core data structures used throughout the pipeline:
//!
//! - [`CanonicalRow`] - One recipient row after schema mapping
//! - [`OutboundMessage`] - Fully composed message ready for handoff
//! - [`BatchReport`] - Per-batch accounting returned to the caller
//! - [`RejectReason`] - Why a row was refused
//! - [`SendOptions`] / [`CallerPermissions`] / [`BatchOptions`] - submit inputs

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::segment::SmsLengthOptions;

// =============================================================================
// Canonical Row
// =============================================================================

/// One recipient row in canonical shape, whatever column layout the
/// uploaded file used.
///
/// Empty cells become `None`; only the phone number keeps its raw string
/// form (an empty string when the cell was empty or the column missing),
/// because its absence is a reject reason rather than a default.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CanonicalRow {
    /// Recipient phone number, as written in the file.
    pub phone_number: String,
    /// Personalization value for `{info1}`.
    pub info1: Option<String>,
    /// Personalization value for `{info2}`.
    pub info2: Option<String>,
    /// Personalization value for `{info3}`.
    pub info3: Option<String>,
    /// Personalization value for `{info4}`.
    pub info4: Option<String>,
    /// Per-row message body, overriding the template body when present.
    pub message: Option<String>,
    /// Per-row original URL, bound to URL slot 1 when present.
    pub original_url: Option<String>,
    /// Requested send time; `None` means "send now".
    pub send_at: Option<NaiveDateTime>,
    /// Whether the row asked to be skipped.
    pub skip: bool,
    /// Operator memo, carried through untouched.
    pub memo: Option<String>,
    /// Template selector, accepted from the file but not acted upon here.
    pub template_id: Option<String>,
}

impl CanonicalRow {
    /// Personalization value for `{infoN}`, `index` in 1..=4.
    pub fn info(&self, index: u8) -> Option<&str> {
        let value = match index {
            1 => &self.info1,
            2 => &self.info2,
            3 => &self.info3,
            4 => &self.info4,
            _ => return None,
        };
        value.as_deref()
    }

    /// Whether the phone number looks international.
    pub fn is_international(&self) -> bool {
        is_international(&self.phone_number)
    }
}

/// Whether a raw phone number looks international.
///
/// Formatting characters (`-`, space, `(`, `)`, `.`) are stripped first.
/// A leading `+`, a `00` or `010` exit prefix, or a number that does not
/// start with the domestic `0` all count as international.
pub fn is_international(number: &str) -> bool {
    let stripped: String = number
        .chars()
        .filter(|c| !matches!(c, '-' | ' ' | '(' | ')' | '.'))
        .collect();
    if let Some(rest) = stripped.strip_prefix('+') {
        return !rest.is_empty();
    }
    if stripped.starts_with("00") || stripped.starts_with("010") {
        return true;
    }
    stripped
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_digit() && c != '0')
}

// =============================================================================
// URL Bindings
// =============================================================================

/// An original URL bound to one of the four URL slots.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UrlBinding {
    /// Slot index, 1..=4.
    pub slot: u8,
    /// The original (long) URL to be shortened at dispatch time.
    pub original_url: String,
}

/// Submit-level URL overrides, one optional URL per slot.
///
/// An override beats both the row's `original_url` and the template's
/// own slot bindings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct UrlOverrides([Option<String>; 4]);

impl UrlOverrides {
    /// Override for `slot` (1..=4), if any.
    pub fn get(&self, slot: u8) -> Option<&str> {
        match slot {
            1..=4 => self.0[usize::from(slot) - 1].as_deref(),
            _ => None,
        }
    }

    /// Set the override for `slot` (1..=4). Out-of-range slots are ignored.
    pub fn set(&mut self, slot: u8, url: impl Into<String>) {
        if let 1..=4 = slot {
            self.0[usize::from(slot) - 1] = Some(url.into());
        }
    }

    /// Whether no override is set at all.
    pub fn is_empty(&self) -> bool {
        self.0.iter().all(Option::is_none)
    }
}

// =============================================================================
// Submit Inputs
// =============================================================================

/// Per-submit sending options, frozen for the whole batch run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SendOptions {
    /// Whether the account sends long SMS.
    pub enable_long_sms: bool,
    /// Sender number; its prefix decides the carrier limit.
    pub sender_number: String,
    /// Submit-level URL overrides.
    #[serde(default)]
    pub url_overrides: UrlOverrides,
}

impl SendOptions {
    /// Length options derived from the toggle and sender number.
    pub fn length_options(&self) -> SmsLengthOptions {
        SmsLengthOptions::for_sender(self.enable_long_sms, &self.sender_number)
    }
}

/// Caller permissions snapshotted before the run starts.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CallerPermissions {
    /// Whether the caller may address international numbers.
    pub international_sms: bool,
}

/// Tuning knobs for a batch run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct BatchOptions {
    /// Hard ceiling on data rows per file; larger files are refused outright.
    pub max_rows: usize,
    /// Rows consumed between yield points.
    pub chunk_size: usize,
    /// Cap on detailed rejection entries kept in the report.
    pub max_rejection_details: usize,
}

/// Default ceiling on data rows per file.
pub const DEFAULT_MAX_ROWS: usize = 500_000;

/// Default rows per processing chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 2_048;

/// Default cap on detailed rejection entries.
pub const DEFAULT_MAX_REJECTION_DETAILS: usize = 1_000;

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            max_rows: DEFAULT_MAX_ROWS,
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_rejection_details: DEFAULT_MAX_REJECTION_DETAILS,
        }
    }
}

impl BatchOptions {
    /// Defaults, with the row ceiling overridable via `SMSBATCH_MAX_ROWS`.
    pub fn from_env() -> Self {
        let mut options = Self::default();
        if let Ok(raw) = std::env::var("SMSBATCH_MAX_ROWS") {
            if let Ok(value) = raw.parse() {
                options.max_rows = value;
            }
        }
        options
    }
}

// =============================================================================
// Rejections
// =============================================================================

/// Why a row was refused.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// Phone cell empty or phone column absent from the row.
    EmptyPhoneNumber,
    /// International number, caller lacks the permission. Fails the batch.
    PermissionDenied,
    /// Rendered message exceeds the selected character limit.
    LengthExceeded,
    /// A URL tag had no bound original URL anywhere.
    MissingUrlBinding,
}

impl RejectReason {
    /// Human-readable label for logs and CLI output.
    pub fn describe(&self) -> &'static str {
        match self {
            Self::EmptyPhoneNumber => "empty phone number",
            Self::PermissionDenied => "international number without permission",
            Self::LengthExceeded => "message exceeds the length limit",
            Self::MissingUrlBinding => "URL tag without a bound URL",
        }
    }
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.describe())
    }
}

/// One rejected row, identified by its data-row index (0-based).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RejectedRow {
    /// 0-based index among the file's data rows.
    pub row_index: usize,
    /// Why the row was refused.
    pub reason: RejectReason,
}

// =============================================================================
// Batch Report
// =============================================================================

/// Accounting for one batch run.
///
/// Counters always satisfy `accepted + skipped + rejected == total` except
/// when `failed` is set: a failed batch sends nothing, so `accepted_rows`
/// is reported as zero while the other counters keep describing what the
/// scan found.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BatchReport {
    /// Data rows the file yielded (all-empty rows are not counted).
    pub total_rows: usize,
    /// Rows composed and handed to the sink.
    pub accepted_rows: usize,
    /// Rows that asked to be skipped.
    pub skipped_rows: usize,
    /// Total rejected rows, detailed or not.
    pub rejected_count: usize,
    /// Detailed rejections, capped at `max_rejection_details`.
    pub rejected_rows: Vec<RejectedRow>,
    /// Whether any row carried an international number, permitted or not.
    pub has_international_numbers: bool,
    /// Whether rejection details were dropped past the cap.
    pub truncated_at_limit: bool,
    /// Whether the whole batch was voided (nothing will be sent).
    pub failed: bool,
}

// =============================================================================
// Outbound Message
// =============================================================================

/// A fully composed message for one accepted row.
///
/// The body still carries its URL tags; shortening happens at dispatch
/// time via the bindings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OutboundMessage {
    /// 0-based index of the source data row.
    pub row_index: usize,
    /// Recipient phone number.
    pub phone_number: String,
    /// Dispatch body with URL tags intact.
    pub body: String,
    /// Original URLs bound to the body's URL slots.
    pub url_bindings: Vec<UrlBinding>,
    /// Requested send time; `None` means "send now".
    #[serde(skip_serializing_if = "Option::is_none")]
    pub send_at: Option<NaiveDateTime>,
    /// Weighted character count of the measured form.
    pub character_count: usize,
    /// Billing segments of the measured form.
    pub segment_count: usize,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_international() {
        // Domestic numbers start with a single 0.
        assert!(!is_international("09012345678"));
        assert!(!is_international("090-1234-5678"));
        assert!(!is_international("03 (1234) 5678"));
        // Exit prefixes and + are international.
        assert!(is_international("+819012345678"));
        assert!(is_international("0081901234567"));
        assert!(is_international("010-81-90-1234-5678"));
        // Bare country-code numbers do not start with 0.
        assert!(is_international("819012345678"));
        // Empty is not international (it is rejected elsewhere).
        assert!(!is_international(""));
    }

    #[test]
    fn test_row_info_accessor() {
        let row = CanonicalRow {
            info1: Some("Alice".into()),
            info3: Some("Osaka".into()),
            ..Default::default()
        };
        assert_eq!(row.info(1), Some("Alice"));
        assert_eq!(row.info(2), None);
        assert_eq!(row.info(3), Some("Osaka"));
        assert_eq!(row.info(5), None);
    }

    #[test]
    fn test_url_overrides_slots() {
        let mut overrides = UrlOverrides::default();
        assert!(overrides.is_empty());
        overrides.set(2, "https://example.com/spring");
        assert_eq!(overrides.get(2), Some("https://example.com/spring"));
        assert_eq!(overrides.get(1), None);
        // Out-of-range slots are ignored on both paths.
        overrides.set(5, "https://example.com/nope");
        assert_eq!(overrides.get(5), None);
    }

    #[test]
    fn test_send_options_pick_carrier_limit() {
        let docomo = SendOptions {
            enable_long_sms: true,
            sender_number: "09012345678".into(),
            ..Default::default()
        };
        assert_eq!(docomo.length_options().limit(), 660);

        let other = SendOptions {
            enable_long_sms: true,
            sender_number: "0801234567".into(),
            ..Default::default()
        };
        assert_eq!(other.length_options().limit(), 670);

        let standard = SendOptions::default();
        assert_eq!(standard.length_options().limit(), 70);
    }

    #[test]
    fn test_reject_reason_serializes_snake_case() {
        let json = serde_json::to_string(&RejectReason::PermissionDenied).unwrap();
        assert_eq!(json, "\"permission_denied\"");
        let json = serde_json::to_string(&RejectReason::MissingUrlBinding).unwrap();
        assert_eq!(json, "\"missing_url_binding\"");
    }

    #[test]
    fn test_report_serialization_roundtrip() {
        let report = BatchReport {
            total_rows: 3,
            accepted_rows: 1,
            skipped_rows: 1,
            rejected_count: 1,
            rejected_rows: vec![RejectedRow { row_index: 2, reason: RejectReason::LengthExceeded }],
            ..Default::default()
        };
        let json = serde_json::to_string(&report).unwrap();
        let back: BatchReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back, report);
    }
}
