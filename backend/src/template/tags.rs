//! Tag grammar: scanning, validation, index allocation, normalization.
//!
//! Two tag families exist:
//!
//! - info tags `{info1}`..`{info4}` (exactly one digit, 1-4)
//! - URL tags `{URL}`, `{URL1}`..`{URL4}`, where `{URL}` is shorthand
//!   for `{URL1}`
//!
//! Anything else inside braces is literal text. A `{URL7}` or `{URL12}`
//! is *not* a tag at render time; it only exists for [`validate_body`],
//! which refuses to save such bodies in the first place.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{TemplateError, TemplateResult};

/// Highest URL slot index a body may reference.
pub const MAX_URL_SLOTS: u8 = 4;

/// Info tags: `{info1}`..`{info4}`.
static INFO_TAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{info([1-4])\}").unwrap());

/// Well-formed URL tags: `{URL}` and `{URL1}`..`{URL4}`.
static URL_TAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{URL([1-4]?)\}").unwrap());

/// Anything that *looks like* a URL tag, valid index or not.
static ANY_URL_TAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{URL([0-9]*)\}").unwrap());

/// Every tag, in document order.
static TAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{(?:info([1-4])|URL([1-4]?))\}").unwrap());

// =============================================================================
// Tags
// =============================================================================

/// One personalization tag occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tag {
    /// `{infoN}`, N in 1..=4.
    Info(u8),
    /// `{URLN}`, N in 1..=4 (`{URL}` parses as slot 1).
    Url(u8),
}

impl std::fmt::Display for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Tag::Info(n) => write!(f, "{{info{}}}", n),
            Tag::Url(n) => write!(f, "{{URL{}}}", n),
        }
    }
}

/// All well-formed tags in `body`, in document order, duplicates kept.
pub fn scan_tags(body: &str) -> Vec<Tag> {
    TAG_RE
        .captures_iter(body)
        .filter_map(|caps| {
            if let Some(info) = caps.get(1) {
                info.as_str().parse().ok().map(Tag::Info)
            } else {
                caps.get(2).map(|url| Tag::Url(parse_url_index(url.as_str())))
            }
        })
        .collect()
}

/// Slot index of a URL tag's digit part; the empty shorthand is slot 1.
fn parse_url_index(raw: &str) -> u8 {
    if raw.is_empty() {
        1
    } else {
        raw.parse().unwrap_or(u8::MAX)
    }
}

// =============================================================================
// Validation
// =============================================================================

/// Validate every URL-tag-shaped substring in `body`.
///
/// Scans with the permissive pattern so that `{URL5}` is reported as an
/// out-of-range index instead of silently passing as literal text.
pub fn validate_body(body: &str) -> TemplateResult<()> {
    for caps in ANY_URL_TAG_RE.captures_iter(body) {
        let digits = &caps[1];
        let index = if digits.is_empty() {
            1
        } else {
            digits.parse::<u32>().unwrap_or(u32::MAX)
        };
        if !(1..=u32::from(MAX_URL_SLOTS)).contains(&index) {
            return Err(TemplateError::UrlIndexOutOfRange { index });
        }
    }
    Ok(())
}

// =============================================================================
// URL Slot Queries
// =============================================================================

/// Unique URL slot indices referenced by `body`, in first-occurrence order.
pub fn url_indices(body: &str) -> Vec<u8> {
    let mut seen = Vec::new();
    for caps in URL_TAG_RE.captures_iter(body) {
        let index = parse_url_index(&caps[1]);
        if !seen.contains(&index) {
            seen.push(index);
        }
    }
    seen
}

/// Index the next inserted URL tag should take: highest referenced
/// index plus one, or 1 for a body without URL tags.
pub fn next_url_index(body: &str) -> TemplateResult<u8> {
    let max = url_indices(body).into_iter().max().unwrap_or(0);
    if max >= MAX_URL_SLOTS {
        return Err(TemplateError::UrlSlotsExhausted);
    }
    Ok(max + 1)
}

/// Append a fresh URL tag to `body`, returning the new body and the
/// slot index the tag took.
pub fn append_url_tag(body: &str) -> TemplateResult<(String, u8)> {
    let index = next_url_index(body)?;
    Ok((format!("{}{}", body, Tag::Url(index)), index))
}

// =============================================================================
// Normalization
// =============================================================================

/// Renumber URL tags to a contiguous 1..N sequence in first-occurrence
/// order. `{URL}` shorthand becomes explicit. Pure and idempotent;
/// malformed tag lookalikes are left untouched.
pub fn normalize_url_tags(body: &str) -> String {
    let order = url_indices(body);
    URL_TAG_RE
        .replace_all(body, |caps: &regex::Captures| {
            let old = parse_url_index(&caps[1]);
            match order.iter().position(|&i| i == old) {
                Some(position) => Tag::Url(position as u8 + 1).to_string(),
                None => caps[0].to_string(),
            }
        })
        .into_owned()
}

/// Replace every well-formed URL tag with `replacement`.
///
/// Used for length accounting and previews, where every shortened URL
/// occupies a fixed width regardless of slot.
pub fn replace_url_tags(body: &str, replacement: &str) -> String {
    URL_TAG_RE.replace_all(body, replacement).into_owned()
}

/// Replace every well-formed URL tag with the value `substitute`
/// returns for its slot index.
pub fn replace_url_tags_with<F>(body: &str, mut substitute: F) -> String
where
    F: FnMut(u8) -> String,
{
    URL_TAG_RE
        .replace_all(body, |caps: &regex::Captures| {
            substitute(parse_url_index(&caps[1]))
        })
        .into_owned()
}

/// Regex substitution over info tags, for the renderer.
pub(crate) fn substitute_info_tags<F>(body: &str, mut lookup: F) -> String
where
    F: FnMut(u8) -> String,
{
    INFO_TAG_RE
        .replace_all(body, |caps: &regex::Captures| {
            lookup(caps[1].parse().unwrap_or(0))
        })
        .into_owned()
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_tags_in_document_order() {
        let tags = scan_tags("Hi {info1}, see {URL} or {URL2}, bye {info1}");
        assert_eq!(
            tags,
            vec![Tag::Info(1), Tag::Url(1), Tag::Url(2), Tag::Info(1)]
        );
    }

    #[test]
    fn test_scan_ignores_malformed_tags() {
        assert!(scan_tags("{info5} {URL12} {url1} {INFO1}").is_empty());
    }

    #[test]
    fn test_validate_body_accepts_valid_indices() {
        assert!(validate_body("plain text").is_ok());
        assert!(validate_body("{URL} {URL1} {URL4}").is_ok());
    }

    #[test]
    fn test_validate_body_rejects_out_of_range() {
        assert!(matches!(
            validate_body("see {URL5}"),
            Err(TemplateError::UrlIndexOutOfRange { index: 5 })
        ));
        assert!(matches!(
            validate_body("see {URL0}"),
            Err(TemplateError::UrlIndexOutOfRange { index: 0 })
        ));
        assert!(matches!(
            validate_body("see {URL12}"),
            Err(TemplateError::UrlIndexOutOfRange { index: 12 })
        ));
    }

    #[test]
    fn test_url_indices_unique_first_occurrence_order() {
        assert_eq!(url_indices("{URL2} {URL} {URL2} {URL3}"), vec![2, 1, 3]);
        assert!(url_indices("no tags").is_empty());
    }

    #[test]
    fn test_empty_shorthand_is_slot_one() {
        assert_eq!(url_indices("{URL}"), vec![1]);
        assert_eq!(url_indices("{URL} {URL1}"), vec![1]);
    }

    #[test]
    fn test_next_url_index_is_max_plus_one() {
        assert_eq!(next_url_index("no tags").unwrap(), 1);
        assert_eq!(next_url_index("{URL}").unwrap(), 2);
        assert_eq!(next_url_index("{URL1}").unwrap(), 2);
        assert_eq!(next_url_index("{URL} and {URL2}").unwrap(), 3);
        // Gaps do not get re-filled; allocation is monotonic.
        assert_eq!(next_url_index("{URL3}").unwrap(), 4);
        assert!(matches!(
            next_url_index("{URL4}"),
            Err(TemplateError::UrlSlotsExhausted)
        ));
    }

    #[test]
    fn test_append_url_tag_twice() {
        let (body, index) = append_url_tag("sale: {URL1} ").unwrap();
        assert_eq!(index, 2);
        assert_eq!(body, "sale: {URL1} {URL2}");
        let (body, index) = append_url_tag(&body).unwrap();
        assert_eq!(index, 3);
        assert!(body.ends_with("{URL3}"));
    }

    #[test]
    fn test_normalize_renumbers_in_first_occurrence_order() {
        assert_eq!(normalize_url_tags("{URL3} a {URL}"), "{URL1} a {URL2}");
        assert_eq!(normalize_url_tags("{URL4} {URL2} {URL4}"), "{URL1} {URL2} {URL1}");
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let bodies = [
            "{URL3} a {URL}",
            "{URL} {URL} {URL2}",
            "plain",
            "{URL12} stays malformed",
        ];
        for body in bodies {
            let once = normalize_url_tags(body);
            assert_eq!(normalize_url_tags(&once), once);
        }
    }

    #[test]
    fn test_normalize_makes_shorthand_explicit() {
        assert_eq!(normalize_url_tags("see {URL}"), "see {URL1}");
    }

    #[test]
    fn test_replace_url_tags_fixed_replacement() {
        let out = replace_url_tags("a {URL} b {URL2}", "#");
        assert_eq!(out, "a # b #");
        // Malformed lookalikes stay literal.
        assert_eq!(replace_url_tags("{URL9}", "#"), "{URL9}");
    }
}
