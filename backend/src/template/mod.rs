//! Message templates and the tag grammar they carry.
//!
//! A [`Template`] is a reusable message body with personalization tags:
//!
//! - `{info1}`..`{info4}` pull per-recipient values from the row
//! - `{URL}`/`{URL1}`..`{URL4}` stand for shortened links, bound to one
//!   of four original-URL slots
//!
//! Submodules:
//! - [`tags`] - tag scanning, validation, index allocation, normalization
//! - [`render`] - composing a row against a template
//!
//! # Example
//!
//! ```
//! use smsbatch::template::Template;
//!
//! let template = Template::new("t-1", "Spring sale", "Hi {info1}, see {URL}")
//!     .unwrap()
//!     .with_url_slot(1, "https://example.com/sale");
//! assert_eq!(template.url_slot(1), Some("https://example.com/sale"));
//! ```

pub mod render;
pub mod tags;

pub use render::*;
pub use tags::*;

use serde::{Deserialize, Serialize};

use crate::error::TemplateResult;

// =============================================================================
// Template
// =============================================================================

/// A reusable message template with up to four URL slot bindings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Template {
    /// Registry identifier; assigned on save when empty.
    #[serde(default)]
    pub id: String,
    /// Human-readable name.
    #[serde(default)]
    pub name: String,
    /// Message body with tags.
    pub body: String,
    /// Original URLs bound per slot, index 0 holding slot 1.
    #[serde(default)]
    pub url_slots: [Option<String>; 4],
}

impl Template {
    /// Create a template, validating the body's URL tags.
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        body: impl Into<String>,
    ) -> TemplateResult<Self> {
        let template = Self {
            id: id.into(),
            name: name.into(),
            body: body.into(),
            url_slots: Default::default(),
        };
        template.validate()?;
        Ok(template)
    }

    /// Bind an original URL to `slot` (1..=4). Out-of-range slots are ignored.
    pub fn with_url_slot(mut self, slot: u8, url: impl Into<String>) -> Self {
        if let 1..=4 = slot {
            self.url_slots[usize::from(slot) - 1] = Some(url.into());
        }
        self
    }

    /// Bound original URL for `slot` (1..=4), if any.
    pub fn url_slot(&self, slot: u8) -> Option<&str> {
        match slot {
            1..=4 => self.url_slots[usize::from(slot) - 1].as_deref(),
            _ => None,
        }
    }

    /// Validate the body's URL tag indices.
    pub fn validate(&self) -> TemplateResult<()> {
        tags::validate_body(&self.body)
    }

    /// Copy of this template with its URL tags renumbered to 1..N.
    pub fn normalized(&self) -> Self {
        Self {
            body: tags::normalize_url_tags(&self.body),
            ..self.clone()
        }
    }

    /// Parse a template from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    /// Serialize to a pretty JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TemplateError;

    #[test]
    fn test_new_rejects_out_of_range_url_tag() {
        let err = Template::new("t-1", "bad", "see {URL5}").unwrap_err();
        assert!(matches!(err, TemplateError::UrlIndexOutOfRange { index: 5 }));
    }

    #[test]
    fn test_url_slot_accessors() {
        let template = Template::new("t-1", "sale", "see {URL} and {URL2}")
            .unwrap()
            .with_url_slot(1, "https://example.com/a")
            .with_url_slot(2, "https://example.com/b");
        assert_eq!(template.url_slot(1), Some("https://example.com/a"));
        assert_eq!(template.url_slot(2), Some("https://example.com/b"));
        assert_eq!(template.url_slot(3), None);
        assert_eq!(template.url_slot(0), None);
    }

    #[test]
    fn test_normalized_renumbers_body_only() {
        let template = Template::new("t-1", "sale", "{URL3} then {URL}").unwrap();
        let normalized = template.normalized();
        assert_eq!(normalized.body, "{URL1} then {URL2}");
        assert_eq!(normalized.id, "t-1");
        // The original is untouched.
        assert_eq!(template.body, "{URL3} then {URL}");
    }

    #[test]
    fn test_json_roundtrip() {
        let template = Template::new("t-1", "sale", "Hi {info1}")
            .unwrap()
            .with_url_slot(1, "https://example.com");
        let json = template.to_json().unwrap();
        let back = Template::from_json(&json).unwrap();
        assert_eq!(back, template);
    }
}
