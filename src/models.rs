use std::fmt;

use serde::{Deserialize, Serialize};

use crate::matching::{self, EXCHANGE_MARKER};

/// A manufacturer/brand/size triple as it appears in the inventory master.
/// This is the unit the registration coordinator inserts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct FixtureRecord {
    pub manufacturer: String,
    pub brand: String,

    /// Raw size text in whatever notation the source used
    pub size: String,
}

impl FixtureRecord {
    pub fn new(manufacturer: &str, brand: &str, size: &str) -> Self {
        Self {
            manufacturer: manufacturer.to_string(),
            brand: brand.to_string(),
            size: size.to_string(),
        }
    }

    /// All three fields carry non-blank text.
    pub fn is_complete(&self) -> bool {
        !self.manufacturer.trim().is_empty()
            && !self.brand.trim().is_empty()
            && !self.size.trim().is_empty()
    }

    /// True when the manufacturer carries the mid-surgery exchange category prefix.
    pub fn is_exchange_category(&self) -> bool {
        self.manufacturer.trim_start().starts_with(EXCHANGE_MARKER)
    }

    /// The exchange-category item paired with this one. An item that is
    /// already exchange-category is its own counterpart.
    pub fn exchange_counterpart(&self) -> FixtureRecord {
        if self.is_exchange_category() {
            return self.clone();
        }
        FixtureRecord {
            manufacturer: format!("{}{}", matching::EXCHANGE_PREFIX, self.manufacturer.trim()),
            brand: self.brand.clone(),
            size: self.size.clone(),
        }
    }
}

/// How a surgery record's fixture was entered.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EntrySource {
    /// Picked from the predefined fixture list
    ListSelected,
    /// Typed by hand
    FreeText,
}

/// One usage row from an uploaded surgery record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SurgeryRecord {
    pub manufacturer: String,
    pub brand: String,
    pub size: String,
    pub quantity: u32,
    pub source: EntrySource,
}

impl SurgeryRecord {
    pub fn new(manufacturer: &str, brand: &str, size: &str, source: EntrySource) -> Self {
        Self {
            manufacturer: manufacturer.to_string(),
            brand: brand.to_string(),
            size: size.to_string(),
            quantity: 1,
            source,
        }
    }

    pub fn with_quantity(mut self, quantity: u32) -> Self {
        self.quantity = quantity;
        self
    }

    pub fn fixture(&self) -> FixtureRecord {
        FixtureRecord::new(&self.manufacturer, &self.brand, &self.size)
    }
}

/// A pending purchase order line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderLine {
    pub manufacturer: String,
    pub brand: String,
    pub size: String,
    pub quantity: u32,
}

impl OrderLine {
    pub fn new(manufacturer: &str, brand: &str, size: &str, quantity: u32) -> Self {
        Self {
            manufacturer: manufacturer.to_string(),
            brand: brand.to_string(),
            size: size.to_string(),
            quantity,
        }
    }
}

/// Which recognizer accepted a size string.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum SizeNotation {
    /// `C4 Φ3.5 × 11`
    CuffSymbol,
    /// `D:3.5 L:11 Cuff:4`
    Labeled,
    /// `Φ4.0/L10`
    SymbolOverLength,
    /// `Φ4.0 10mm`
    SymbolWithUnit,
    /// `Φ4.0 X 10`, optionally `X 3` cuff
    BareSymbol,
    /// `3507`, `354510`
    NumericCode,
    /// first `4.0 x 10` pair anywhere
    BareNumeric,
}

/// Structured form of a raw size string.
///
/// `match_key` is always populated. When diameter or length could not be
/// recovered it holds a normalized form of `raw` instead.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ParsedSize {
    pub diameter: Option<f64>,
    pub length: Option<f64>,

    /// Numeric token without unit or letter prefix (e.g. "4", "2.5")
    pub cuff: Option<String>,

    /// Trailing qualifier letters (e.g. "S", "SH")
    pub suffix: Option<String>,

    pub raw: String,
    pub match_key: String,

    /// Recognizer that produced the dimensions, `None` on fail-through
    pub notation: Option<SizeNotation>,
}

impl ParsedSize {
    pub fn is_recognized(&self) -> bool {
        self.diameter.is_some() && self.length.is_some()
    }
}

/// Structural shape of a (canonicalized) size string, used for baselines.
///
/// Variant order is classification priority, not tie-break order; ties
/// between tags are broken on [`PatternTag::name`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PatternTag {
    Empty,
    CuffSymbol,
    LabeledDl,
    SymbolOverL,
    SymbolUnit,
    Symbol,
    NumericCode,
    BareNumeric,
    Other,
}

impl PatternTag {
    pub const ALL: [PatternTag; 9] = [
        PatternTag::Empty,
        PatternTag::CuffSymbol,
        PatternTag::LabeledDl,
        PatternTag::SymbolOverL,
        PatternTag::SymbolUnit,
        PatternTag::Symbol,
        PatternTag::NumericCode,
        PatternTag::BareNumeric,
        PatternTag::Other,
    ];

    /// Stable machine name.
    pub fn name(&self) -> &'static str {
        match self {
            PatternTag::Empty => "empty",
            PatternTag::CuffSymbol => "cuff_symbol",
            PatternTag::LabeledDl => "labeled_dl",
            PatternTag::SymbolOverL => "symbol_over_l",
            PatternTag::SymbolUnit => "symbol_unit",
            PatternTag::Symbol => "symbol",
            PatternTag::NumericCode => "numeric_code",
            PatternTag::BareNumeric => "bare_numeric",
            PatternTag::Other => "other",
        }
    }

    /// Human-readable example of the notation.
    pub fn label(&self) -> &'static str {
        match self {
            PatternTag::Empty => "(empty)",
            PatternTag::CuffSymbol => "C4 Φ3.5 X 11",
            PatternTag::LabeledDl => "D:3.5 L:11",
            PatternTag::SymbolOverL => "Φ4.0/L10",
            PatternTag::SymbolUnit => "Φ4.0 10mm",
            PatternTag::Symbol => "Φ4.0 X 10",
            PatternTag::NumericCode => "3510",
            PatternTag::BareNumeric => "4.0 X 10",
            PatternTag::Other => "(other)",
        }
    }
}

impl fmt::Display for PatternTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Dominant notation among a manufacturer+brand group's registered sizes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FormatBaseline {
    pub dominant_pattern: PatternTag,
    pub sample_count: usize,
}

/// Why a surgery-derived entry surfaced as a candidate.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CandidateReason {
    NotInInventory,
    NonListInput,
}

impl CandidateReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CandidateReason::NotInInventory => "not_in_inventory",
            CandidateReason::NonListInput => "non_list_input",
        }
    }
}

/// Why a candidate cannot be registered automatically. Checked in
/// declaration order; the first that applies wins.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BlockReason {
    Incomplete,
    NonListInput,
    NoBaseline,
    Duplicate,
    PatternMismatch {
        expected: PatternTag,
        actual: PatternTag,
    },
}

impl BlockReason {
    pub fn code(&self) -> &'static str {
        match self {
            BlockReason::Incomplete => "incomplete",
            BlockReason::NonListInput => "non_list_input",
            BlockReason::NoBaseline => "no_baseline",
            BlockReason::Duplicate => "duplicate",
            BlockReason::PatternMismatch { .. } => "pattern_mismatch",
        }
    }
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockReason::Incomplete => {
                write!(f, "Manufacturer, brand and size are required")
            }
            BlockReason::NonListInput => {
                write!(f, "Entered as free text, not selected from the fixture list")
            }
            BlockReason::NoBaseline => {
                write!(f, "No registered items for this manufacturer and brand to compare against")
            }
            BlockReason::Duplicate => write!(f, "Already registered in inventory"),
            BlockReason::PatternMismatch { expected, actual } => write!(
                f,
                "Size notation '{}' differs from the registered notation '{}'",
                actual.label(),
                expected.label()
            ),
        }
    }
}

/// A surgery-derived entry that has no inventory counterpart, together with
/// everything the classifier derived for it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnregisteredCandidate {
    pub manufacturer: String,
    pub brand: String,
    pub size: String,
    pub usage_count: u32,
    pub reason: CandidateReason,

    /// Manufacturer after alias resolution against the inventory
    pub canonical_manufacturer: String,
    pub canonical_size: String,
    pub pattern: PatternTag,
    pub baseline: Option<FormatBaseline>,
    pub is_duplicate: bool,
    pub block_reason: Option<BlockReason>,
}

impl UnregisteredCandidate {
    /// Registrability is derived from `block_reason`; it is never stored.
    pub fn can_register(&self) -> bool {
        self.block_reason.is_none()
    }

    pub fn baseline_pattern_label(&self) -> Option<&'static str> {
        self.baseline.as_ref().map(|b| b.dominant_pattern.label())
    }

    /// Whether the candidate's notation agrees with its group baseline.
    /// `None` when there is no baseline.
    pub fn is_pattern_consistent(&self) -> Option<bool> {
        self.baseline
            .as_ref()
            .map(|b| b.dominant_pattern == self.pattern)
    }

    /// The record a registration run inserts for this candidate.
    pub fn to_fixture(&self) -> FixtureRecord {
        FixtureRecord::new(&self.canonical_manufacturer, &self.brand, &self.canonical_size)
    }
}
