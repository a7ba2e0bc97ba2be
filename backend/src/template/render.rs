//! Row rendering: composing one recipient's message from a template.
//!
//! Rendering produces two coupled strings:
//!
//! - `text` - what the recipient appears to get, with every URL tag
//!   swapped for the fixed-width placeholder. This is the form that is
//!   measured and previewed.
//! - `dispatch_body` - the body handed to delivery, URL tags intact.
//!   Shortening happens per recipient at dispatch time, so the tags
//!   must survive until then ([`finalize_body`]).
//!
//! Preview mode fills empty info tags from the [`TagDefaultTable`] so
//! a template can be inspected without a recipient file. Final mode
//! renders empty info tags as empty strings and refuses rows whose URL
//! tags have no bound original URL.

use serde::{Deserialize, Serialize};

use crate::error::{RenderError, RenderResult};
use crate::models::{CanonicalRow, UrlBinding, UrlOverrides};
use crate::segment::{self, SegmentationResult, SmsLengthOptions, SHORT_URL_PLACEHOLDER};
use crate::template::{tags, Template};

// =============================================================================
// Tag Defaults
// =============================================================================

/// Placeholder shown for an unset info tag in previews.
pub const DEFAULT_INFO_PLACEHOLDER: &str = "○○○○";

/// Preview stand-ins for empty info tags, one per index.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TagDefaultTable {
    info: [String; 4],
}

impl Default for TagDefaultTable {
    fn default() -> Self {
        Self {
            info: std::array::from_fn(|_| DEFAULT_INFO_PLACEHOLDER.to_string()),
        }
    }
}

impl TagDefaultTable {
    /// Preview stand-in for `{infoN}`, `index` in 1..=4.
    pub fn info_default(&self, index: u8) -> &str {
        match index {
            1..=4 => &self.info[usize::from(index) - 1],
            _ => "",
        }
    }

    /// Replace the stand-in for `{infoN}`. Out-of-range indices are ignored.
    pub fn set_info(&mut self, index: u8, value: impl Into<String>) {
        if let 1..=4 = index {
            self.info[usize::from(index) - 1] = value.into();
        }
    }
}

// =============================================================================
// Rendering
// =============================================================================

/// How empty info tags and missing URL bindings are treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderMode {
    /// Editor preview: defaults for empty info tags, missing URL
    /// bindings tolerated.
    Preview,
    /// Batch composition: empty info tags render empty, missing URL
    /// bindings reject the row.
    Final,
}

/// One row composed against a template.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedMessage {
    /// Recipient-visible form, URL tags replaced by the placeholder.
    pub text: String,
    /// Delivery form, URL tags intact.
    pub dispatch_body: String,
    /// Original URLs resolved for the body's URL slots.
    pub url_bindings: Vec<UrlBinding>,
}

/// Renders rows against one template with frozen defaults and overrides.
///
/// Borrowing instead of owning pins the whole batch run to the template
/// state it started with; concurrent registry edits cannot leak in.
pub struct Renderer<'a> {
    template: &'a Template,
    defaults: &'a TagDefaultTable,
    overrides: &'a UrlOverrides,
}

impl<'a> Renderer<'a> {
    pub fn new(
        template: &'a Template,
        defaults: &'a TagDefaultTable,
        overrides: &'a UrlOverrides,
    ) -> Self {
        Self { template, defaults, overrides }
    }

    /// Compose `row` into a message.
    ///
    /// The row's own `message` replaces the template body when present;
    /// URL slot bindings still come from the template and options.
    pub fn render(&self, row: &CanonicalRow, mode: RenderMode) -> RenderResult<RenderedMessage> {
        let base = match row.message.as_deref() {
            Some(message) if !message.is_empty() => message,
            _ => &self.template.body,
        };

        let dispatch_body = tags::substitute_info_tags(base, |index| {
            match row.info(index).filter(|value| !value.is_empty()) {
                Some(value) => value.to_string(),
                None => match mode {
                    RenderMode::Preview => self.defaults.info_default(index).to_string(),
                    RenderMode::Final => String::new(),
                },
            }
        });

        let mut url_bindings = Vec::new();
        for slot in tags::url_indices(&dispatch_body) {
            match self.resolve_url(slot, row) {
                Some(original_url) => url_bindings.push(UrlBinding { slot, original_url }),
                None if mode == RenderMode::Final => {
                    return Err(RenderError::MissingUrlBinding { slot });
                }
                None => {}
            }
        }

        let text = tags::replace_url_tags(&dispatch_body, SHORT_URL_PLACEHOLDER);
        Ok(RenderedMessage { text, dispatch_body, url_bindings })
    }

    /// Original URL for `slot`: submit override, then the row's own URL
    /// (slot 1 only), then the template binding.
    fn resolve_url(&self, slot: u8, row: &CanonicalRow) -> Option<String> {
        if let Some(url) = self.overrides.get(slot) {
            return Some(url.to_string());
        }
        if slot == 1 {
            if let Some(url) = row.original_url.as_deref().filter(|u| !u.is_empty()) {
                return Some(url.to_string());
            }
        }
        self.template.url_slot(slot).map(str::to_string)
    }
}

/// Preview `row` against `template` without submit-level overrides.
pub fn preview_render(
    template: &Template,
    row: &CanonicalRow,
    defaults: &TagDefaultTable,
) -> RenderResult<RenderedMessage> {
    let overrides = UrlOverrides::default();
    Renderer::new(template, defaults, &overrides).render(row, RenderMode::Preview)
}

// =============================================================================
// Length Accounting over Raw Bodies
// =============================================================================

/// Measure body text that may still carry URL tags.
///
/// Every well-formed URL tag is counted as [`SHORT_URL_PLACEHOLDER`]
/// wide before the character rules apply. This backs the live counter
/// in the editor, where no row is available yet.
pub fn measure_text(text: &str, options: &SmsLengthOptions) -> SegmentationResult {
    let counted = tags::replace_url_tags(text, SHORT_URL_PLACEHOLDER);
    segment::measure(&counted, options)
}

// =============================================================================
// Dispatch-time Shortening
// =============================================================================

/// Dispatch-time collaborator that turns an original URL into the
/// short link actually sent.
pub trait UrlShortener {
    /// Shorten `original_url` for `slot`, returning the public short URL.
    fn shorten(&self, slot: u8, original_url: &str) -> RenderResult<String>;
}

/// Produce the final wire body: every URL tag replaced by the short
/// link for its slot's binding.
///
/// Tags without a binding fail with [`RenderError::MissingUrlBinding`];
/// a message that passed Final-mode rendering always has one per tag.
pub fn finalize_body(
    body: &str,
    bindings: &[UrlBinding],
    shortener: &dyn UrlShortener,
) -> RenderResult<String> {
    let mut failure: Option<RenderError> = None;
    let out = tags::replace_url_tags_with(body, |slot| {
        if failure.is_some() {
            return String::new();
        }
        let binding = bindings.iter().find(|b| b.slot == slot);
        match binding {
            Some(b) => match shortener.shorten(slot, &b.original_url) {
                Ok(short) => short,
                Err(err) => {
                    failure = Some(err);
                    String::new()
                }
            },
            None => {
                failure = Some(RenderError::MissingUrlBinding { slot });
                String::new()
            }
        }
    });
    match failure {
        Some(err) => Err(err),
        None => Ok(out),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn template() -> Template {
        Template::new("t-1", "sale", "Hi {info1}, {info2} sale at {URL}")
            .unwrap()
            .with_url_slot(1, "https://example.com/sale")
    }

    fn row(name: &str) -> CanonicalRow {
        CanonicalRow {
            phone_number: "09012345678".into(),
            info1: Some(name.into()),
            ..Default::default()
        }
    }

    #[test]
    fn test_preview_fills_empty_info_with_defaults() {
        let rendered = preview_render(&template(), &row("Alice"), &TagDefaultTable::default()).unwrap();
        assert_eq!(
            rendered.text,
            format!("Hi Alice, {} sale at {}", DEFAULT_INFO_PLACEHOLDER, SHORT_URL_PLACEHOLDER)
        );
    }

    #[test]
    fn test_final_renders_empty_info_as_empty() {
        let template = template();
        let defaults = TagDefaultTable::default();
        let overrides = UrlOverrides::default();
        let rendered = Renderer::new(&template, &defaults, &overrides)
            .render(&row("Alice"), RenderMode::Final)
            .unwrap();
        assert_eq!(rendered.text, format!("Hi Alice,  sale at {}", SHORT_URL_PLACEHOLDER));
        assert_eq!(rendered.dispatch_body, "Hi Alice,  sale at {URL}");
    }

    #[test]
    fn test_row_message_overrides_template_body() {
        let template = template();
        let defaults = TagDefaultTable::default();
        let overrides = UrlOverrides::default();
        let mut row = row("Alice");
        row.message = Some("Custom for {info1}".into());
        let rendered = Renderer::new(&template, &defaults, &overrides)
            .render(&row, RenderMode::Final)
            .unwrap();
        assert_eq!(rendered.text, "Custom for Alice");
        assert!(rendered.url_bindings.is_empty());
    }

    #[test]
    fn test_url_resolution_precedence() {
        let template = template();
        let defaults = TagDefaultTable::default();

        // Template slot is the fallback.
        let overrides = UrlOverrides::default();
        let rendered = Renderer::new(&template, &defaults, &overrides)
            .render(&row("A"), RenderMode::Final)
            .unwrap();
        assert_eq!(rendered.url_bindings[0].original_url, "https://example.com/sale");

        // The row's own URL beats the template for slot 1.
        let mut per_row = row("A");
        per_row.original_url = Some("https://example.com/row".into());
        let rendered = Renderer::new(&template, &defaults, &overrides)
            .render(&per_row, RenderMode::Final)
            .unwrap();
        assert_eq!(rendered.url_bindings[0].original_url, "https://example.com/row");

        // A submit override beats both.
        let mut with_override = UrlOverrides::default();
        with_override.set(1, "https://example.com/override");
        let rendered = Renderer::new(&template, &defaults, &with_override)
            .render(&per_row, RenderMode::Final)
            .unwrap();
        assert_eq!(rendered.url_bindings[0].original_url, "https://example.com/override");
    }

    #[test]
    fn test_row_url_binds_slot_one_only() {
        let template = Template::new("t-2", "two links", "{URL1} and {URL2}").unwrap();
        let defaults = TagDefaultTable::default();
        let overrides = UrlOverrides::default();
        let mut row = row("A");
        row.original_url = Some("https://example.com/row".into());

        let err = Renderer::new(&template, &defaults, &overrides)
            .render(&row, RenderMode::Final)
            .unwrap_err();
        assert!(matches!(err, RenderError::MissingUrlBinding { slot: 2 }));
    }

    #[test]
    fn test_preview_tolerates_missing_bindings() {
        let template = Template::new("t-2", "two links", "{URL1} and {URL2}").unwrap();
        let rendered =
            preview_render(&template, &CanonicalRow::default(), &TagDefaultTable::default())
                .unwrap();
        assert_eq!(
            rendered.text,
            format!("{0} and {0}", SHORT_URL_PLACEHOLDER)
        );
        assert!(rendered.url_bindings.is_empty());
    }

    #[test]
    fn test_measure_text_counts_url_tags_as_placeholder_width() {
        let options = SmsLengthOptions::default();
        assert_eq!(measure_text("{URL}", &options).character_count, 20);
        assert_eq!(measure_text("go: {URL2}", &options).character_count, 24);
        // Malformed lookalikes count as their literal characters.
        assert_eq!(measure_text("{URL9}", &options).character_count, 6);
    }

    struct StubShortener;

    impl UrlShortener for StubShortener {
        fn shorten(&self, slot: u8, _original_url: &str) -> RenderResult<String> {
            Ok(format!("https://s.example/{}", slot))
        }
    }

    #[test]
    fn test_finalize_body_substitutes_short_links() {
        let bindings = vec![
            UrlBinding { slot: 1, original_url: "https://example.com/a".into() },
            UrlBinding { slot: 2, original_url: "https://example.com/b".into() },
        ];
        let out = finalize_body("go {URL1} or {URL2}", &bindings, &StubShortener).unwrap();
        assert_eq!(out, "go https://s.example/1 or https://s.example/2");
    }

    #[test]
    fn test_finalize_body_requires_bindings() {
        let err = finalize_body("go {URL1}", &[], &StubShortener).unwrap_err();
        assert!(matches!(err, RenderError::MissingUrlBinding { slot: 1 }));
    }
}
