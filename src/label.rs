//! Disc volume label parsing.
//!
//! Turns raw volume labels like `MARVEL_STUDIOS_GUARDIANS_VOL_3_DISC1` into
//! a searchable title. Pure string processing, no I/O.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

lazy_static! {
    static ref DISC_NUMBER_RE: Regex = Regex::new(r"^(?i)(DISC\d*|D\d+)$").unwrap();
    static ref YEAR_RE: Regex = Regex::new(r"^(19|20)\d{2}$").unwrap();
}

/// Aspect-ratio tokens that carry no title information.
const ASPECT_TOKENS: &[&str] = &["4X3", "16X9", "WS", "FS"];

/// Video format tokens that carry no title information.
const FORMAT_TOKENS: &[&str] = &["NTSC", "PAL"];

/// Token classes stripped from volume labels.
///
/// The studio and region lists are configurable because pressing plants keep
/// inventing new prefixes; the disc-number/aspect/format patterns are stable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabelRules {
    pub studio_tokens: Vec<String>,
    pub region_tokens: Vec<String>,
}

impl Default for LabelRules {
    fn default() -> Self {
        Self {
            studio_tokens: default_studio_tokens(),
            region_tokens: default_region_tokens(),
        }
    }
}

fn default_studio_tokens() -> Vec<String> {
    [
        "MARVEL", "STUDIOS", "DISNEY", "PIXAR", "WARNER", "BROS", "WB", "UNIVERSAL", "SONY",
        "COLUMBIA", "PARAMOUNT", "FOX", "LIONSGATE", "MGM", "DREAMWORKS", "HBO", "A24", "BLURAY",
        "BLU", "RAY", "DVD", "BD", "UHD", "4K",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_region_tokens() -> Vec<String> {
    [
        "US", "UK", "EU", "AU", "CA", "JP", "KR", "FR", "DE", "ES", "IT", "NL", "BR", "MX", "R1",
        "R2", "R3", "R4", "PS",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Result of parsing a volume label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedLabel {
    /// Cleaned, title-cased search string.
    pub title: String,
    /// Year embedded in the label, when one was present.
    pub year: Option<i32>,
}

/// Parse a raw volume label into a searchable title.
///
/// Tokenizes on `_`, `-` and whitespace, drops studio/region/disc-number/
/// aspect/format tokens, extracts a trailing year, joins the rest with
/// single spaces and title-cases. Falls back to the raw label when nothing
/// survives. Idempotent: `parse(parse(x).title) == parse(x)`.
pub fn parse_label(raw: &str, rules: &LabelRules) -> ParsedLabel {
    let tokens: Vec<&str> = raw
        .split(|c: char| c == '_' || c == '-' || c.is_whitespace())
        .filter(|t| !t.is_empty())
        .collect();

    let mut kept: Vec<&str> = tokens
        .iter()
        .copied()
        .filter(|t| !is_noise_token(t, rules))
        .collect();

    // A year token is pulled out for scoring, unless it is all that's left
    // (titles like "1917" exist).
    let mut year = None;
    if let Some(pos) = kept.iter().rposition(|t| YEAR_RE.is_match(t)) {
        if kept.len() > 1 {
            year = kept[pos].parse::<i32>().ok();
            kept.remove(pos);
        }
    }

    if kept.is_empty() {
        return ParsedLabel {
            title: raw.to_string(),
            year,
        };
    }

    let title = kept
        .iter()
        .map(|t| title_case(t))
        .collect::<Vec<_>>()
        .join(" ");

    ParsedLabel { title, year }
}

fn is_noise_token(token: &str, rules: &LabelRules) -> bool {
    let upper = token.to_uppercase();
    rules.studio_tokens.iter().any(|s| s.eq_ignore_ascii_case(&upper))
        || rules.region_tokens.iter().any(|r| r.eq_ignore_ascii_case(&upper))
        || DISC_NUMBER_RE.is_match(&upper)
        || ASPECT_TOKENS.contains(&upper.as_str())
        || FORMAT_TOKENS.contains(&upper.as_str())
}

fn title_case(token: &str) -> String {
    let mut chars = token.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase(),
        None => String::new(),
    }
}
