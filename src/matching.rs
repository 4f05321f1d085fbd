//! Name normalization and identity keys. Deterministic, no fuzzy scoring.
//!
//! Two policies live side by side and must not be mixed:
//!
//! * **matching** ([`normalize_for_matching`]) is used when surgery records are
//!   compared against inventory. It drops category markers, so an exchange
//!   item and its ordinary counterpart normalize to the same name.
//! * **deduplication** ([`normalize_for_deduplication`]) is used when checking
//!   the inventory for duplicates. It keeps category markers so those two
//!   items stay distinct.
//!
//! [`IdentityKey`] is parameterized by the policy that built it, so a
//! matching key cannot be compared with a dedup key.

use std::fmt;
use std::hash::Hash;
use std::marker::PhantomData;

use crate::models::FixtureRecord;
use crate::size::{fold_diameter_symbols, SizeParser};

/// Marker on insurance-claim line items.
pub const INSURANCE_CLAIM_MARKER: &str = "보험임플란트";

/// Category marker for fixtures exchanged mid-surgery.
pub const EXCHANGE_MARKER: &str = "수술중교환";

/// Category marker for fixtures that failed mid-surgery.
pub const FAIL_MARKER: &str = "수술중fail";

/// Manufacturer prefix that turns an item into its exchange-category pair.
pub const EXCHANGE_PREFIX: &str = "수술중교환_";

/// Substrings dropped by the matching policy. Already lowercase.
const NOISE_MARKERS: &[&str] = &[INSURANCE_CLAIM_MARKER, EXCHANGE_MARKER, FAIL_MARKER];

/// Normalize a manufacturer or brand name for surgery-record matching.
///
/// Lowercase, drop whitespace, hyphens, underscores, periods and
/// parentheses, fold diameter symbols, then strip noise markers.
pub fn normalize_for_matching(name: &str) -> String {
    let lowered = name.to_lowercase();
    let compact: String = lowered
        .chars()
        .filter(|c| !c.is_whitespace() && !matches!(c, '-' | '_' | '.' | '(' | ')'))
        .collect();
    let mut folded = fold_diameter_symbols(&compact);

    for marker in NOISE_MARKERS {
        if folded.contains(marker) {
            folded = folded.replace(marker, "");
        }
    }

    folded
}

/// Normalize a manufacturer or brand name for inventory deduplication.
///
/// Lowercase and drop whitespace, hyphens and underscores only. Category
/// markers are kept.
pub fn normalize_for_deduplication(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .filter(|c| !c.is_whitespace() && !matches!(c, '-' | '_'))
        .collect()
}

/// Check if two manufacturer names refer to the same manufacturer.
///
/// True when the matching-policy forms are equal or one contains the
/// other. Blank names never alias. The relation is not transitive:
/// "ab" aliases "abc" and "xab" without those two aliasing each other.
pub fn is_same_manufacturer_alias(a: &str, b: &str) -> bool {
    let na = normalize_for_matching(a);
    let nb = normalize_for_matching(b);

    if na.is_empty() || nb.is_empty() {
        return false;
    }

    if na == nb {
        return true;
    }

    na.contains(&*nb) || nb.contains(&*na)
}

/// A name normalization policy usable for identity keys.
pub trait NamePolicy {
    const NAME: &'static str;

    fn normalize(name: &str) -> String;
}

/// Surgery-record matching policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Matching;

/// Inventory deduplication policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Dedup;

impl NamePolicy for Matching {
    const NAME: &'static str = "matching";

    fn normalize(name: &str) -> String {
        normalize_for_matching(name)
    }
}

impl NamePolicy for Dedup {
    const NAME: &'static str = "dedup";

    fn normalize(name: &str) -> String {
        normalize_for_deduplication(name)
    }
}

/// Composite `manufacturer|brand|size` key built under policy `P`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IdentityKey<P> {
    key: String,
    _policy: PhantomData<P>,
}

impl<P: NamePolicy> IdentityKey<P> {
    /// Build a key with the default notation rules.
    pub fn build(manufacturer: &str, brand: &str, size: &str) -> Self {
        Self::build_with(SizeParser::default_parser(), manufacturer, brand, size)
    }

    pub fn build_with(parser: &SizeParser, manufacturer: &str, brand: &str, size: &str) -> Self {
        let size_key = parser.match_key(size, Some(manufacturer));
        Self {
            key: format!("{}|{}|{}", P::normalize(manufacturer), P::normalize(brand), size_key),
            _policy: PhantomData,
        }
    }

    pub fn for_fixture(parser: &SizeParser, fixture: &FixtureRecord) -> Self {
        Self::build_with(parser, &fixture.manufacturer, &fixture.brand, &fixture.size)
    }

    pub fn as_str(&self) -> &str {
        &self.key
    }

    pub fn policy(&self) -> &'static str {
        P::NAME
    }
}

impl<P> fmt::Display for IdentityKey<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.key)
    }
}

/// Build an identity key under policy `P` with the default notation rules.
pub fn build_identity_key<P: NamePolicy>(
    manufacturer: &str,
    brand: &str,
    size: &str,
) -> IdentityKey<P> {
    IdentityKey::build(manufacturer, brand, size)
}
