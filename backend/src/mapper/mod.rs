//! Schema mapping: raw file columns to canonical row fields.
//!
//! Two resolution paths feed every canonical field:
//!
//! 1. A named header (`tel`, `info1`, .., case-insensitive) anywhere in
//!    the file. Named columns always win.
//! 2. The fixed positional layout used by header-less spreadsheet
//!    exports, addressed by column letter:
//!
//!    ```text
//!    A  phone_number     F  memo            K  original_url
//!    B  info1            H  template_id     Q  send_at
//!    C  info2            J  message         BZ skip
//!    D  info3
//!    E  info4
//!    ```
//!
//! The plan is resolved once per batch from the header row (or the
//! generated letters for spreadsheets) and then applied to every row.
//! A plan without a phone number source is refused outright.

use chrono::{NaiveDate, NaiveDateTime};

use crate::error::{SchemaError, SchemaResult};
use crate::models::CanonicalRow;
use crate::parser::RawRow;

// =============================================================================
// Canonical Fields
// =============================================================================

/// The canonical fields a recipient file can populate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CanonicalField {
    PhoneNumber = 0,
    Info1,
    Info2,
    Info3,
    Info4,
    Memo,
    TemplateId,
    Message,
    OriginalUrl,
    SendAt,
    Skip,
}

impl CanonicalField {
    /// All fields, in canonical order.
    pub const ALL: [CanonicalField; 11] = [
        Self::PhoneNumber,
        Self::Info1,
        Self::Info2,
        Self::Info3,
        Self::Info4,
        Self::Memo,
        Self::TemplateId,
        Self::Message,
        Self::OriginalUrl,
        Self::SendAt,
        Self::Skip,
    ];

    /// Canonical snake_case name, for logs and debug output.
    pub fn name(&self) -> &'static str {
        match self {
            Self::PhoneNumber => "phone_number",
            Self::Info1 => "info1",
            Self::Info2 => "info2",
            Self::Info3 => "info3",
            Self::Info4 => "info4",
            Self::Memo => "memo",
            Self::TemplateId => "template_id",
            Self::Message => "message",
            Self::OriginalUrl => "original_url",
            Self::SendAt => "send_at",
            Self::Skip => "skip",
        }
    }

    /// Header names (lowercased) that select this field by name.
    pub fn named_aliases(&self) -> &'static [&'static str] {
        match self {
            Self::PhoneNumber => &["tel"],
            Self::Info1 => &["info1"],
            Self::Info2 => &["info2"],
            Self::Info3 => &["info3"],
            Self::Info4 => &["info4"],
            Self::Memo => &["memo"],
            Self::TemplateId => &["template_id", "templateid"],
            Self::Message => &["message"],
            Self::OriginalUrl => &["original_url", "originalurl", "url"],
            Self::SendAt => &["send_at", "sendat", "send_datetime", "senddatetime"],
            Self::Skip => &["skip"],
        }
    }

    /// Column letter selecting this field positionally.
    pub fn positional_letter(&self) -> &'static str {
        match self {
            Self::PhoneNumber => "A",
            Self::Info1 => "B",
            Self::Info2 => "C",
            Self::Info3 => "D",
            Self::Info4 => "E",
            Self::Memo => "F",
            Self::TemplateId => "H",
            Self::Message => "J",
            Self::OriginalUrl => "K",
            Self::SendAt => "Q",
            Self::Skip => "BZ",
        }
    }
}

// =============================================================================
// Schema Plan
// =============================================================================

/// Resolved column plan: one optional source column per canonical field.
#[derive(Debug, Clone, PartialEq)]
pub struct SchemaPlan {
    sources: [Option<usize>; 11],
    headers: Vec<String>,
}

impl SchemaPlan {
    /// Resolve the plan from a file's headers.
    ///
    /// For each field, a named header (case-insensitive, first
    /// occurrence) wins; otherwise a header that *is* the field's
    /// column letter (exact, uppercase) selects it positionally.
    pub fn from_headers(headers: &[String]) -> SchemaResult<Self> {
        let lowered: Vec<String> = headers.iter().map(|h| h.trim().to_lowercase()).collect();

        let mut sources = [None; 11];
        for field in CanonicalField::ALL {
            let named = lowered
                .iter()
                .position(|h| field.named_aliases().contains(&h.as_str()));
            let positional = headers
                .iter()
                .position(|h| h.trim() == field.positional_letter());
            sources[field as usize] = named.or(positional);
        }

        if sources[CanonicalField::PhoneNumber as usize].is_none() {
            return Err(SchemaError::MissingPhoneColumn);
        }

        Ok(Self { sources, headers: headers.to_vec() })
    }

    /// Source column index for `field`, if the file provides one.
    pub fn source_of(&self, field: CanonicalField) -> Option<usize> {
        self.sources[field as usize]
    }

    /// Apply the plan to one raw row.
    ///
    /// Empty cells and unresolved fields come out as `None`; the phone
    /// number stays a (possibly empty) string so the validator can
    /// reject it with a row index attached.
    pub fn map_row(&self, raw: &RawRow) -> CanonicalRow {
        CanonicalRow {
            phone_number: self.cell(raw, CanonicalField::PhoneNumber).unwrap_or_default().to_string(),
            info1: self.owned(raw, CanonicalField::Info1),
            info2: self.owned(raw, CanonicalField::Info2),
            info3: self.owned(raw, CanonicalField::Info3),
            info4: self.owned(raw, CanonicalField::Info4),
            message: self.owned(raw, CanonicalField::Message),
            original_url: self.owned(raw, CanonicalField::OriginalUrl),
            send_at: self.cell(raw, CanonicalField::SendAt).and_then(parse_send_at),
            skip: self.cell(raw, CanonicalField::Skip).is_some_and(is_truthy),
            memo: self.owned(raw, CanonicalField::Memo),
            template_id: self.owned(raw, CanonicalField::TemplateId),
        }
    }

    /// Human-readable resolution summary, one entry per resolved field.
    pub fn describe(&self) -> String {
        CanonicalField::ALL
            .iter()
            .filter_map(|field| {
                self.source_of(*field).map(|index| {
                    format!("{} <- '{}'", field.name(), self.headers.get(index).map(String::as_str).unwrap_or("?"))
                })
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn cell<'a>(&self, raw: &'a RawRow, field: CanonicalField) -> Option<&'a str> {
        self.sources[field as usize]
            .and_then(|index| raw.cells.get(index))
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }

    fn owned(&self, raw: &RawRow, field: CanonicalField) -> Option<String> {
        self.cell(raw, field).map(str::to_string)
    }
}

// =============================================================================
// Cell Interpretation
// =============================================================================

/// Truthiness of a skip cell: `1`, `true`, `yes`, `on` (case-insensitive).
pub fn is_truthy(raw: &str) -> bool {
    matches!(raw.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

/// Parse a send-at cell in any of the common timestamp layouts.
///
/// Unparseable values come out as `None`, which means "send now";
/// a typo must not silently reschedule a campaign to a surprise time.
pub fn parse_send_at(raw: &str) -> Option<NaiveDateTime> {
    const FORMATS: [&str; 5] = [
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M",
        "%Y/%m/%d %H:%M:%S",
        "%Y/%m/%d %H:%M",
        "%Y-%m-%dT%H:%M:%S",
    ];
    let trimmed = raw.trim();
    for format in FORMATS {
        if let Ok(parsed) = NaiveDateTime::parse_from_str(trimmed, format) {
            return Some(parsed);
        }
    }
    // Date-only cells schedule for midnight.
    for format in ["%Y-%m-%d", "%Y/%m/%d"] {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, format) {
            return date.and_hms_opt(0, 0, 0);
        }
    }
    None
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::column_letter;

    fn headers(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn raw(index: usize, cells: &[&str]) -> RawRow {
        RawRow { index, cells: cells.iter().map(|s| s.to_string()).collect() }
    }

    #[test]
    fn test_named_headers_resolve() {
        let plan = SchemaPlan::from_headers(&headers(&["tel", "info1", "message"])).unwrap();
        let row = plan.map_row(&raw(0, &["09011112222", "Alice", "Hi {info1}"]));
        assert_eq!(row.phone_number, "09011112222");
        assert_eq!(row.info1.as_deref(), Some("Alice"));
        assert_eq!(row.message.as_deref(), Some("Hi {info1}"));
        assert_eq!(row.info2, None);
    }

    #[test]
    fn test_named_headers_are_case_insensitive() {
        let plan = SchemaPlan::from_headers(&headers(&["TEL", "Info1"])).unwrap();
        let row = plan.map_row(&raw(0, &["09011112222", "Alice"]));
        assert_eq!(row.phone_number, "09011112222");
        assert_eq!(row.info1.as_deref(), Some("Alice"));
    }

    #[test]
    fn test_positional_letters_resolve() {
        // Spreadsheet-style generated headers A..K.
        let letters: Vec<String> = (0..11).map(column_letter).collect();
        let plan = SchemaPlan::from_headers(&letters).unwrap();
        let row = plan.map_row(&raw(
            0,
            &[
                "09011112222", // A phone_number
                "Alice",       // B info1
                "Tokyo",       // C info2
                "",            // D info3
                "",            // E info4
                "note",        // F memo
                "",            // G unmapped
                "tpl-7",       // H template_id
                "",            // I unmapped
                "Custom body", // J message
                "",            // K original_url
            ],
        ));
        assert_eq!(row.phone_number, "09011112222");
        assert_eq!(row.info1.as_deref(), Some("Alice"));
        assert_eq!(row.info2.as_deref(), Some("Tokyo"));
        assert_eq!(row.info3, None);
        assert_eq!(row.memo.as_deref(), Some("note"));
        assert_eq!(row.template_id.as_deref(), Some("tpl-7"));
        assert_eq!(row.message.as_deref(), Some("Custom body"));
    }

    #[test]
    fn test_positional_message_and_url_columns() {
        let letters: Vec<String> = (0..17).map(column_letter).collect();
        let plan = SchemaPlan::from_headers(&letters).unwrap();
        let mut cells = vec![String::new(); 17];
        cells[0] = "09011112222".into(); // A
        cells[9] = "Custom body".into(); // J
        cells[10] = "https://example.com/x".into(); // K
        cells[16] = "2026-04-01 09:30".into(); // Q
        let row = plan.map_row(&RawRow { index: 0, cells });
        assert_eq!(row.message.as_deref(), Some("Custom body"));
        assert_eq!(row.original_url.as_deref(), Some("https://example.com/x"));
        assert_eq!(
            row.send_at,
            NaiveDate::from_ymd_opt(2026, 4, 1).unwrap().and_hms_opt(9, 30, 0)
        );
    }

    #[test]
    fn test_positional_skip_at_bz() {
        let letters: Vec<String> = (0..78).map(column_letter).collect();
        assert_eq!(letters[77], "BZ");
        let plan = SchemaPlan::from_headers(&letters).unwrap();
        let mut cells = vec![String::new(); 78];
        cells[0] = "09011112222".into();
        cells[77] = "1".into();
        let row = plan.map_row(&RawRow { index: 0, cells });
        assert!(row.skip);
    }

    #[test]
    fn test_named_column_beats_positional() {
        // Column A holds junk; a named tel column exists elsewhere.
        let plan = SchemaPlan::from_headers(&headers(&["A", "B", "tel"])).unwrap();
        let row = plan.map_row(&raw(0, &["junk", "stuff", "09011112222"]));
        assert_eq!(row.phone_number, "09011112222");
        // Positional still serves the fields without named headers.
        assert_eq!(row.info1.as_deref(), Some("stuff"));
    }

    #[test]
    fn test_missing_phone_column_is_fatal() {
        let err = SchemaPlan::from_headers(&headers(&["info1", "message"])).unwrap_err();
        assert!(matches!(err, SchemaError::MissingPhoneColumn));
    }

    #[test]
    fn test_short_rows_read_as_empty() {
        let plan = SchemaPlan::from_headers(&headers(&["tel", "info1", "info2"])).unwrap();
        let row = plan.map_row(&raw(0, &["09011112222"]));
        assert_eq!(row.phone_number, "09011112222");
        assert_eq!(row.info1, None);
        assert_eq!(row.info2, None);
    }

    #[test]
    fn test_skip_truthiness() {
        for value in ["1", "true", "TRUE", "yes", "Yes", "on", " 1 "] {
            assert!(is_truthy(value), "{value:?} should be truthy");
        }
        for value in ["", "0", "false", "no", "off", "2", "skip"] {
            assert!(!is_truthy(value), "{value:?} should be falsy");
        }
    }

    #[test]
    fn test_parse_send_at_formats() {
        let expected = NaiveDate::from_ymd_opt(2026, 4, 1).unwrap().and_hms_opt(9, 30, 0);
        assert_eq!(parse_send_at("2026-04-01 09:30:00"), expected);
        assert_eq!(parse_send_at("2026-04-01 09:30"), expected);
        assert_eq!(parse_send_at("2026/04/01 09:30"), expected);
        assert_eq!(parse_send_at("2026-04-01T09:30:00"), expected);
        assert_eq!(
            parse_send_at("2026/04/01"),
            NaiveDate::from_ymd_opt(2026, 4, 1).unwrap().and_hms_opt(0, 0, 0)
        );
        // Garbage means "send now", not an error.
        assert_eq!(parse_send_at("next tuesday"), None);
        assert_eq!(parse_send_at(""), None);
    }

    #[test]
    fn test_describe_lists_resolved_fields() {
        let plan = SchemaPlan::from_headers(&headers(&["tel", "info1"])).unwrap();
        let description = plan.describe();
        assert!(description.contains("phone_number <- 'tel'"));
        assert!(description.contains("info1 <- 'info1'"));
        assert!(!description.contains("memo"));
    }
}
