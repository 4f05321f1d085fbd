//! Size parsing, match keys and canonical formatting.
//!
//! A raw size string is run through a fixed cascade of recognizers, most
//! specific first (see [`SizeNotation::CASCADE`]). The first recognizer that
//! accepts the string wins. Nothing here fails: unrecognized input keeps
//! `diameter`/`length` empty and gets a key derived from the raw text.

use std::sync::LazyLock;

use regex::Regex;
use tracing::trace;

use crate::config::NotationRules;
use crate::matching::is_same_manufacturer_alias;
use crate::models::{ParsedSize, SizeNotation};

/// Characters used as a diameter marker across manufacturers.
const DIAMETER_SYMBOLS: &[char] = &['Φ', 'φ', 'ϕ', 'Ø', 'ø', '⌀'];

/// Letter diameter symbols fold to in normalized keys.
const FOLDED_SYMBOL: char = 'd';

/// Prefix on keys built from unparsed raw text.
const RAW_KEY_PREFIX: &str = "raw:";

static CUFF_SYMBOL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\s*(?P<cuff>[^ΦφϕØø⌀\s][^ΦφϕØø⌀]*?)\s*[ΦφϕØø⌀]\s*(?P<d>\d+(?:\.\d+)?)\s*[xX×*]\s*(?P<l>\d+(?:\.\d+)?)",
    )
    .unwrap()
});

static LABEL_D_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bD\s*(?::\s*|\s+)(\d+(?:\.\d+)?)").unwrap());

static LABEL_L_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bL\s*(?::\s*|\s+)(\d+(?:\.\d+)?)").unwrap());

static LABEL_CUFF_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bcuff\s*:?\s*([a-z]?\s*\d+(?:\.\d+)?)").unwrap());

static SYMBOL_OVER_L_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"[ΦφϕØø⌀]\s*(\d+(?:\.\d+)?)\s*/\s*[lL]\s*(\d+(?:\.\d+)?)(?:\s*([A-Za-z][A-Za-z0-9.]*))?",
    )
    .unwrap()
});

static SYMBOL_UNIT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"[ΦφϕØø⌀]\s*(\d+(?:\.\d+)?)(?:\s*[xX×*]\s*|\s+)(\d+(?:\.\d+)?)\s*(?i:mm)(?:\s*([A-Za-z])\b)?",
    )
    .unwrap()
});

static BARE_SYMBOL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"[ΦφϕØø⌀]\s*(\d+(?:\.\d+)?)\s*[xX×*]\s*(\d+(?:\.\d+)?)(?:\s*[xX×*]\s*(\d+(?:\.\d+)?))?",
    )
    .unwrap()
});

static NUMERIC_CODE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{4,6})([A-Za-z]*)$").unwrap());

static NUMERIC_PAIR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+(?:\.\d+)?)\s*[xX×*/]\s*(\d+(?:\.\d+)?)").unwrap());

static DEFAULT_PARSER: LazyLock<SizeParser> = LazyLock::new(SizeParser::default);

impl SizeNotation {
    /// Recognizer priority. Earlier entries shadow later ones.
    pub const CASCADE: [SizeNotation; 7] = [
        SizeNotation::CuffSymbol,
        SizeNotation::Labeled,
        SizeNotation::SymbolOverLength,
        SizeNotation::SymbolWithUnit,
        SizeNotation::BareSymbol,
        SizeNotation::NumericCode,
        SizeNotation::BareNumeric,
    ];
}

/// Dimensions recovered by one recognizer.
#[derive(Debug, Clone, PartialEq)]
struct Dimensions {
    diameter: f64,
    length: f64,
    cuff: Option<String>,
    suffix: Option<String>,
    notation: SizeNotation,
}

/// Parses, keys and canonicalizes size strings under a set of
/// [`NotationRules`].
#[derive(Debug, Clone, Default)]
pub struct SizeParser {
    rules: NotationRules,
}

impl SizeParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rules(rules: NotationRules) -> Self {
        Self { rules }
    }

    /// Shared parser with the default rules.
    pub fn default_parser() -> &'static SizeParser {
        &DEFAULT_PARSER
    }

    pub fn rules(&self) -> &NotationRules {
        &self.rules
    }

    pub fn is_numeric_code_manufacturer(&self, manufacturer: &str) -> bool {
        self.rules
            .numeric_code_manufacturers
            .iter()
            .any(|family| is_same_manufacturer_alias(family, manufacturer))
    }

    pub fn is_legacy_notation_manufacturer(&self, manufacturer: &str) -> bool {
        self.rules
            .legacy_notation_manufacturers
            .iter()
            .any(|family| is_same_manufacturer_alias(family, manufacturer))
    }

    /// Parse a raw size string. Never fails.
    pub fn parse(&self, raw: &str, manufacturer: Option<&str>) -> ParsedSize {
        match self.recognize(raw, manufacturer) {
            Some(dims) => {
                let match_key = build_match_key(dims.diameter, dims.length, dims.cuff.as_deref());
                ParsedSize {
                    diameter: Some(dims.diameter),
                    length: Some(dims.length),
                    cuff: dims.cuff,
                    suffix: dims.suffix,
                    raw: raw.to_string(),
                    match_key,
                    notation: Some(dims.notation),
                }
            }
            None => {
                trace!(raw, "size matched no known notation");
                ParsedSize {
                    diameter: None,
                    length: None,
                    cuff: None,
                    suffix: None,
                    raw: raw.to_string(),
                    match_key: raw_match_key(raw),
                    notation: None,
                }
            }
        }
    }

    pub fn match_key(&self, raw: &str, manufacturer: Option<&str>) -> String {
        self.parse(raw, manufacturer).match_key
    }

    /// Rewrite a size into the unified display notation where one applies.
    ///
    /// Legacy-notation manufacturers get labeled and cuff notations rewritten
    /// to `C<cuff> Φ<d> X <l>`. Numeric-code manufacturers get stray
    /// punctuation stripped when the stripped code keeps the same match key.
    /// Everything else
    /// only has its delimiter spacing normalized. Idempotent.
    pub fn to_canonical(&self, raw: &str, manufacturer: Option<&str>) -> String {
        let trimmed = raw.trim();

        if let Some(manufacturer) = manufacturer {
            if self.is_legacy_notation_manufacturer(manufacturer) && has_legacy_notation(trimmed) {
                if let Some(unified) = self.render_unified(trimmed, manufacturer) {
                    return unified;
                }
            }

            if self.is_numeric_code_manufacturer(manufacturer) {
                let cleaned = clean_numeric_code(trimmed).filter(|code| {
                    self.match_key(code, Some(manufacturer))
                        == self.match_key(trimmed, Some(manufacturer))
                });
                if let Some(code) = cleaned {
                    return code;
                }
            }
        }

        normalize_delimiter_spacing(trimmed)
    }

    fn render_unified(&self, raw: &str, manufacturer: &str) -> Option<String> {
        let dims = self.recognize(raw, Some(manufacturer))?;
        let cuff = dims.cuff.or_else(|| {
            LABEL_CUFF_RE
                .captures(raw)
                .and_then(|caps| normalize_cuff(caps.get(1)?.as_str()))
        });

        let body = format!(
            "Φ{} X {}",
            format_number(dims.diameter),
            format_number(dims.length)
        );
        Some(match cuff {
            Some(cuff) => format!("C{} {}", cuff, body),
            None => body,
        })
    }

    fn recognize(&self, raw: &str, manufacturer: Option<&str>) -> Option<Dimensions> {
        SizeNotation::CASCADE
            .iter()
            .find_map(|notation| self.recognize_as(*notation, raw, manufacturer))
    }

    fn recognize_as(
        &self,
        notation: SizeNotation,
        raw: &str,
        manufacturer: Option<&str>,
    ) -> Option<Dimensions> {
        match notation {
            SizeNotation::CuffSymbol => {
                let caps = CUFF_SYMBOL_RE.captures(raw)?;
                Some(Dimensions {
                    diameter: parse_number(caps.name("d")?.as_str())?,
                    length: parse_number(caps.name("l")?.as_str())?,
                    cuff: normalize_cuff(caps.name("cuff")?.as_str()),
                    suffix: None,
                    notation,
                })
            }
            SizeNotation::Labeled => {
                let diameter = LABEL_D_RE.captures(raw)?.get(1)?.as_str();
                let length = LABEL_L_RE.captures(raw)?.get(1)?.as_str();
                let cuff = LABEL_CUFF_RE
                    .captures(raw)
                    .and_then(|caps| normalize_cuff(caps.get(1)?.as_str()));
                Some(Dimensions {
                    diameter: parse_number(diameter)?,
                    length: parse_number(length)?,
                    cuff,
                    suffix: None,
                    notation,
                })
            }
            SizeNotation::SymbolOverLength => {
                let caps = SYMBOL_OVER_L_RE.captures(raw)?;
                let qualifier = caps
                    .get(3)
                    .map(|m| m.as_str())
                    .filter(|q| !q.eq_ignore_ascii_case("mm"));
                let cuff = qualifier.and_then(normalize_cuff);
                let suffix = match cuff {
                    Some(_) => None,
                    None => qualifier.map(str::to_string),
                };
                Some(Dimensions {
                    diameter: parse_number(caps.get(1)?.as_str())?,
                    length: parse_number(caps.get(2)?.as_str())?,
                    cuff,
                    suffix,
                    notation,
                })
            }
            SizeNotation::SymbolWithUnit => {
                let caps = SYMBOL_UNIT_RE.captures(raw)?;
                Some(Dimensions {
                    diameter: parse_number(caps.get(1)?.as_str())?,
                    length: parse_number(caps.get(2)?.as_str())?,
                    cuff: None,
                    suffix: caps.get(3).map(|m| m.as_str().to_string()),
                    notation,
                })
            }
            SizeNotation::BareSymbol => {
                let caps = BARE_SYMBOL_RE.captures(raw)?;
                let cuff = caps
                    .get(3)
                    .and_then(|m| parse_number(m.as_str()))
                    .map(format_number);
                Some(Dimensions {
                    diameter: parse_number(caps.get(1)?.as_str())?,
                    length: parse_number(caps.get(2)?.as_str())?,
                    cuff,
                    suffix: None,
                    notation,
                })
            }
            SizeNotation::NumericCode => {
                let trimmed = raw.trim();
                let lenient = manufacturer.is_some_and(|m| self.is_numeric_code_manufacturer(m));
                let candidate: String = if lenient {
                    trimmed.chars().filter(|c| c.is_ascii_alphanumeric()).collect()
                } else {
                    trimmed.to_string()
                };
                let caps = NUMERIC_CODE_RE.captures(&candidate)?;
                let (diameter, length) = self.decode_numeric_code(caps.get(1)?.as_str())?;
                let suffix = caps
                    .get(2)
                    .map(|m| m.as_str())
                    .filter(|s| !s.is_empty())
                    .map(str::to_string);
                Some(Dimensions {
                    diameter,
                    length,
                    cuff: None,
                    suffix,
                    notation,
                })
            }
            SizeNotation::BareNumeric => {
                let caps = NUMERIC_PAIR_RE.captures(raw)?;
                let diameter = parse_number(caps.get(1)?.as_str())?;
                let length = parse_number(caps.get(2)?.as_str())?;
                if !self.rules.in_range(diameter, length) {
                    return None;
                }
                Some(Dimensions {
                    diameter,
                    length,
                    cuff: None,
                    suffix: None,
                    notation,
                })
            }
        }
    }

    /// 4 digits: `DDLL`. 6 digits: `xxDDLL`. Diameter digits are tenths.
    fn decode_numeric_code(&self, digits: &str) -> Option<(f64, f64)> {
        let (d, l) = match digits.len() {
            4 => (&digits[0..2], &digits[2..4]),
            6 => (&digits[2..4], &digits[4..6]),
            _ => return None,
        };
        let diameter = d.parse::<u32>().ok()? as f64 / 10.0;
        let length = l.parse::<u32>().ok()? as f64;

        self.rules
            .in_range(diameter, length)
            .then_some((diameter, length))
    }
}

/// Build the notation-independent key `d<d>_l<l>[_c<cuff>]`.
pub fn build_match_key(diameter: f64, length: f64, cuff: Option<&str>) -> String {
    let mut key = format!("d{}_l{}", format_number(diameter), format_number(length));
    if let Some(cuff) = cuff.filter(|c| !c.is_empty()) {
        key.push_str("_c");
        key.push_str(cuff);
    }
    key
}

/// Parse with the default rules.
pub fn parse_size(raw: &str, manufacturer: Option<&str>) -> ParsedSize {
    DEFAULT_PARSER.parse(raw, manufacturer)
}

pub fn get_size_match_key(raw: &str, manufacturer: Option<&str>) -> String {
    DEFAULT_PARSER.match_key(raw, manufacturer)
}

pub fn to_canonical_size(raw: &str, manufacturer: Option<&str>) -> String {
    DEFAULT_PARSER.to_canonical(raw, manufacturer)
}

/// Replace every diameter symbol variant with a single letter.
pub fn fold_diameter_symbols(s: &str) -> String {
    s.chars()
        .map(|c| if is_diameter_symbol(c) { FOLDED_SYMBOL } else { c })
        .collect()
}

pub(crate) fn is_diameter_symbol(c: char) -> bool {
    DIAMETER_SYMBOLS.contains(&c)
}

pub(crate) fn has_diameter_symbol(s: &str) -> bool {
    s.chars().any(is_diameter_symbol)
}

pub(crate) fn is_cuff_symbol_notation(s: &str) -> bool {
    CUFF_SYMBOL_RE.is_match(s)
}

pub(crate) fn has_labeled_fields(s: &str) -> bool {
    LABEL_D_RE.is_match(s) && LABEL_L_RE.is_match(s)
}

pub(crate) fn is_symbol_over_length(s: &str) -> bool {
    SYMBOL_OVER_L_RE.is_match(s)
}

pub(crate) fn is_symbol_with_unit(s: &str) -> bool {
    SYMBOL_UNIT_RE.is_match(s)
}

pub(crate) fn is_numeric_code(s: &str) -> bool {
    NUMERIC_CODE_RE.is_match(s.trim())
}

pub(crate) fn has_numeric_pair(s: &str) -> bool {
    NUMERIC_PAIR_RE.is_match(s)
}

fn has_legacy_notation(s: &str) -> bool {
    has_labeled_fields(s) || LABEL_CUFF_RE.is_match(s) || CUFF_SYMBOL_RE.is_match(s)
}

fn parse_number(s: &str) -> Option<f64> {
    s.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Render without forced decimals: 4.0 -> "4", 3.5 -> "3.5".
fn format_number(value: f64) -> String {
    format!("{}", value)
}

/// Reduce a cuff token ("C4", "Cuff: 04", "cuff c2.5mm") to its number.
fn normalize_cuff(token: &str) -> Option<String> {
    let lowered = token.trim().to_lowercase();
    let without_label = lowered.strip_prefix("cuff").unwrap_or(&lowered);
    let rest = without_label.trim_start_matches(|c: char| c == ':' || c.is_whitespace());
    let rest = match rest.chars().next() {
        Some(c) if c.is_ascii_alphabetic() => &rest[c.len_utf8()..],
        _ => rest,
    };
    let rest = rest.trim().trim_end_matches("mm").trim_end();

    parse_number(rest)
        .filter(|v| *v >= 0.0)
        .map(format_number)
}

fn raw_match_key(raw: &str) -> String {
    let normalized: String = fold_diameter_symbols(&raw.to_lowercase())
        .chars()
        .filter(|c| c.is_alphanumeric())
        .collect();
    format!("{}{}", RAW_KEY_PREFIX, normalized)
}

/// Strip punctuation from a numeric code when the rest is a valid code.
/// Returns `None` when there is nothing to strip or the result is invalid.
fn clean_numeric_code(raw: &str) -> Option<String> {
    if raw.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    let cleaned: String = raw.chars().filter(|c| c.is_ascii_alphanumeric()).collect();
    NUMERIC_CODE_RE.is_match(&cleaned).then_some(cleaned)
}

/// Put exactly one space on each side of a delimiter that sits between two
/// numbers. Only applied to diameter-symbol notations.
fn normalize_delimiter_spacing(s: &str) -> String {
    if !has_diameter_symbol(s) {
        return s.to_string();
    }

    let chars: Vec<char> = s.chars().collect();
    let mut out = String::with_capacity(s.len() + 4);
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if matches!(c, 'x' | 'X' | '×' | '*') {
            let prev_is_digit = out
                .trim_end()
                .chars()
                .last()
                .is_some_and(|p| p.is_ascii_digit());
            let next_is_digit = chars[i + 1..]
                .iter()
                .find(|n| !n.is_whitespace())
                .is_some_and(|n| n.is_ascii_digit());

            if prev_is_digit && next_is_digit {
                let kept = out.trim_end().len();
                out.truncate(kept);
                out.push(' ');
                out.push(c);
                out.push(' ');
                i += 1;
                while i < chars.len() && chars[i].is_whitespace() {
                    i += 1;
                }
                continue;
            }
        }
        out.push(c);
        i += 1;
    }

    out
}
