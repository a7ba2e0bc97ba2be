//! SMS length accounting and segmentation.
//!
//! Turns message text into billing-relevant numbers:
//!
//! - [`char_count`] - weighted character count (line breaks count as 2)
//! - [`measure`] - full [`SegmentationResult`] against a carrier limit
//! - [`SmsLengthOptions`] - long-SMS toggle plus sender carrier
//! - [`Carrier`] - carrier inferred from the sender number prefix
//!
//! Limits follow the Japanese carrier rules: 70 characters per standard
//! SMS, 660 for long SMS on docomo senders (`090` prefix), 670 elsewhere.
//! Segments are always billed in 70-character units regardless of the
//! selected limit.
//!
//! # Example
//!
//! ```
//! use smsbatch::segment::{measure, SmsLengthOptions};
//!
//! let options = SmsLengthOptions::for_sender(true, "0801234567");
//! let result = measure("hello\nworld", &options);
//! assert_eq!(result.character_count, 12); // the line break counts as 2
//! assert_eq!(result.segment_count, 1);
//! assert_eq!(result.limit, 670);
//! assert!(!result.exceeded);
//! ```

use serde::{Deserialize, Serialize};

// =============================================================================
// Limits and Constants
// =============================================================================

/// Character limit for a standard (non-long) SMS.
pub const STANDARD_SMS_LIMIT: usize = 70;

/// Character limit for long SMS on docomo sender numbers.
pub const DOCOMO_LONG_SMS_LIMIT: usize = 660;

/// Character limit for long SMS on every other sender number.
pub const OTHER_LONG_SMS_LIMIT: usize = 670;

/// Billing weight of a single line break, whatever its on-disk form.
pub const LINE_BREAK_WEIGHT: usize = 2;

/// Width every shortened URL is assumed to occupy in the message body.
pub const SHORT_URL_LEN: usize = 20;

/// Placeholder substituted for URL tags when counting or previewing.
///
/// Exactly [`SHORT_URL_LEN`] characters, and starts with `https` so
/// previews look like the dispatched message will.
pub const SHORT_URL_PLACEHOLDER: &str = "https://sms.cx/xxxxx";

// =============================================================================
// Carrier
// =============================================================================

/// Carrier bucket of a sender number, as far as length limits care.
///
/// Only the docomo long-SMS ceiling differs, so everything that is not
/// recognisably docomo collapses into [`Carrier::Other`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Carrier {
    /// Sender number with an `090` prefix.
    Docomo,
    /// Any other sender number.
    #[default]
    Other,
}

impl Carrier {
    /// Infer the carrier from a sender number.
    ///
    /// Formatting characters are ignored; only the leading digits decide.
    pub fn from_sender_number(sender: &str) -> Self {
        let digits: String = sender.chars().filter(|c| c.is_ascii_digit()).collect();
        if digits.starts_with("090") {
            Carrier::Docomo
        } else {
            Carrier::Other
        }
    }

    /// Long-SMS character limit for this carrier.
    pub fn long_sms_limit(&self) -> usize {
        match self {
            Carrier::Docomo => DOCOMO_LONG_SMS_LIMIT,
            Carrier::Other => OTHER_LONG_SMS_LIMIT,
        }
    }
}

// =============================================================================
// Length Options
// =============================================================================

/// Inputs that decide which character limit applies to a message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct SmsLengthOptions {
    /// Whether the account sends long SMS at all.
    pub enable_long_sms: bool,
    /// Carrier of the sender number.
    pub carrier: Carrier,
}

impl SmsLengthOptions {
    /// Build options from the long-SMS toggle and a raw sender number.
    pub fn for_sender(enable_long_sms: bool, sender_number: &str) -> Self {
        Self {
            enable_long_sms,
            carrier: Carrier::from_sender_number(sender_number),
        }
    }

    /// The character limit these options select.
    pub fn limit(&self) -> usize {
        if self.enable_long_sms {
            self.carrier.long_sms_limit()
        } else {
            STANDARD_SMS_LIMIT
        }
    }
}

// =============================================================================
// Segmentation Result
// =============================================================================

/// Length accounting for one message body.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct SegmentationResult {
    /// Weighted character count (line breaks count as 2).
    pub character_count: usize,
    /// Number of 70-character billing segments.
    pub segment_count: usize,
    /// The limit the text was measured against.
    pub limit: usize,
    /// Whether the count exceeds the limit.
    pub exceeded: bool,
}

// =============================================================================
// Counting
// =============================================================================

/// Weighted character count of a message body.
///
/// `\r\n`, `\r` and `\n` each count as one line break of weight
/// [`LINE_BREAK_WEIGHT`]; every other Unicode scalar counts as 1.
pub fn char_count(text: &str) -> usize {
    let mut count = 0;
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
                count += LINE_BREAK_WEIGHT;
            }
            '\n' => count += LINE_BREAK_WEIGHT,
            _ => count += 1,
        }
    }
    count
}

/// Measure a message body against the limit selected by `options`.
///
/// The segment count is always billed in [`STANDARD_SMS_LIMIT`]-character
/// units, even when a long-SMS limit applies. An empty body occupies
/// zero segments.
pub fn measure(text: &str, options: &SmsLengthOptions) -> SegmentationResult {
    let character_count = char_count(text);
    let limit = options.limit();
    SegmentationResult {
        character_count,
        segment_count: character_count.div_ceil(STANDARD_SMS_LIMIT),
        limit,
        exceeded: character_count > limit,
    }
}

// =============================================================================
// Tests
// =============================================================================
