use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::matching::{
    is_same_manufacturer_alias, normalize_for_matching, Dedup, IdentityKey, Matching,
};
use crate::models::{
    BlockReason, CandidateReason, EntrySource, FixtureRecord, FormatBaseline, PatternTag,
    SurgeryRecord, UnregisteredCandidate,
};
use crate::size::{self, SizeParser};

/// Classify a (canonicalized) size string into its notation shape.
///
/// Checks run in [`PatternTag`] declaration order; the first hit wins.
pub fn classify_pattern(size: &str) -> PatternTag {
    let s = size.trim();
    if s.is_empty() {
        return PatternTag::Empty;
    }
    if size::has_diameter_symbol(s) && size::is_cuff_symbol_notation(s) {
        return PatternTag::CuffSymbol;
    }
    if size::has_labeled_fields(s) {
        return PatternTag::LabeledDl;
    }
    if size::is_symbol_over_length(s) {
        return PatternTag::SymbolOverL;
    }
    if size::is_symbol_with_unit(s) {
        return PatternTag::SymbolUnit;
    }
    if size::has_diameter_symbol(s) {
        return PatternTag::Symbol;
    }
    if size::is_numeric_code(s) {
        return PatternTag::NumericCode;
    }
    if size::has_numeric_pair(s) {
        return PatternTag::BareNumeric;
    }
    PatternTag::Other
}

/// Manufacturer+brand group, both under the matching policy.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupKey {
    pub manufacturer: String,
    pub brand: String,
}

impl GroupKey {
    pub fn new(manufacturer: &str, brand: &str) -> Self {
        Self {
            manufacturer: normalize_for_matching(manufacturer),
            brand: normalize_for_matching(brand),
        }
    }
}

/// Compute the dominant notation of every manufacturer+brand group in the
/// inventory snapshot. Exchange-category items are left out; they mirror
/// their ordinary counterparts.
pub fn build_baselines(
    parser: &SizeParser,
    inventory: &[FixtureRecord],
) -> HashMap<GroupKey, FormatBaseline> {
    let mut counts: HashMap<GroupKey, BTreeMap<&'static str, (PatternTag, usize)>> =
        HashMap::new();

    for item in inventory.iter().filter(|i| !i.is_exchange_category()) {
        let canonical = parser.to_canonical(&item.size, Some(&item.manufacturer));
        let tag = classify_pattern(&canonical);
        counts
            .entry(GroupKey::new(&item.manufacturer, &item.brand))
            .or_default()
            .entry(tag.name())
            .or_insert((tag, 0))
            .1 += 1;
    }

    counts
        .into_iter()
        .filter_map(|(group, tags)| {
            let sample_count: usize = tags.values().map(|(_, n)| n).sum();
            dominant_pattern(&tags).map(|dominant_pattern| {
                (
                    group,
                    FormatBaseline {
                        dominant_pattern,
                        sample_count,
                    },
                )
            })
        })
        .collect()
}

/// Highest count wins; ties go to the lexically smallest tag name.
fn dominant_pattern(tags: &BTreeMap<&'static str, (PatternTag, usize)>) -> Option<PatternTag> {
    tags.values()
        .max_by(|(ta, ca), (tb, cb)| ca.cmp(cb).then_with(|| tb.name().cmp(ta.name())))
        .map(|(tag, _)| *tag)
}

/// A surgery-derived entry before classification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateEntry {
    pub manufacturer: String,
    pub brand: String,
    pub size: String,
    pub usage_count: u32,
    pub reason: CandidateReason,
}

impl CandidateEntry {
    pub fn new(manufacturer: &str, brand: &str, size: &str, reason: CandidateReason) -> Self {
        Self {
            manufacturer: manufacturer.to_string(),
            brand: brand.to_string(),
            size: size.to_string(),
            usage_count: 1,
            reason,
        }
    }

    fn is_complete(&self) -> bool {
        FixtureRecord::new(&self.manufacturer, &self.brand, &self.size).is_complete()
    }
}

/// Decides whether unregistered entries may be added to the inventory.
/// Built once per analysis pass from an inventory snapshot.
pub struct AnomalyClassifier<'a> {
    parser: &'a SizeParser,
    baselines: HashMap<GroupKey, FormatBaseline>,
    dedup_keys: HashSet<IdentityKey<Dedup>>,

    /// normalized brand -> distinct inventory manufacturer spellings
    brand_manufacturers: HashMap<String, Vec<String>>,

    /// normalized manufacturer -> first inventory spelling
    manufacturer_spellings: HashMap<String, String>,
}

impl<'a> AnomalyClassifier<'a> {
    pub fn new(parser: &'a SizeParser, inventory: &[FixtureRecord]) -> Self {
        let baselines = build_baselines(parser, inventory);
        let dedup_keys = inventory
            .iter()
            .map(|item| IdentityKey::<Dedup>::for_fixture(parser, item))
            .collect();

        let mut brand_manufacturers: HashMap<String, Vec<String>> = HashMap::new();
        let mut manufacturer_spellings = HashMap::new();
        for item in inventory.iter().filter(|i| !i.is_exchange_category()) {
            let spellings = brand_manufacturers
                .entry(normalize_for_matching(&item.brand))
                .or_default();
            if !spellings.contains(&item.manufacturer) {
                spellings.push(item.manufacturer.clone());
            }
            manufacturer_spellings
                .entry(normalize_for_matching(&item.manufacturer))
                .or_insert_with(|| item.manufacturer.clone());
        }

        Self {
            parser,
            baselines,
            dedup_keys,
            brand_manufacturers,
            manufacturer_spellings,
        }
    }

    pub fn baseline(&self, manufacturer: &str, brand: &str) -> Option<&FormatBaseline> {
        self.baselines.get(&GroupKey::new(manufacturer, brand))
    }

    pub fn baseline_count(&self) -> usize {
        self.baselines.len()
    }

    /// Map a manufacturer onto the spelling the inventory already uses:
    /// an alias among the brand's manufacturers first, then an exact
    /// normalized match anywhere, else the input unchanged.
    pub fn resolve_manufacturer(&self, manufacturer: &str, brand: &str) -> String {
        if let Some(spellings) = self.brand_manufacturers.get(&normalize_for_matching(brand)) {
            if let Some(hit) = spellings
                .iter()
                .find(|known| is_same_manufacturer_alias(known, manufacturer))
            {
                return hit.clone();
            }
        }

        if let Some(hit) = self
            .manufacturer_spellings
            .get(&normalize_for_matching(manufacturer))
        {
            return hit.clone();
        }

        manufacturer.trim().to_string()
    }

    pub fn is_registered(&self, item: &FixtureRecord) -> bool {
        self.dedup_keys
            .contains(&IdentityKey::<Dedup>::for_fixture(self.parser, item))
    }

    pub fn classify(&self, entry: &CandidateEntry) -> UnregisteredCandidate {
        let canonical_manufacturer = self.resolve_manufacturer(&entry.manufacturer, &entry.brand);
        let canonical_size = self
            .parser
            .to_canonical(&entry.size, Some(&canonical_manufacturer));
        let pattern = classify_pattern(&canonical_size);
        let baseline = self.baseline(&canonical_manufacturer, &entry.brand).cloned();
        let is_duplicate = self.is_registered(&FixtureRecord::new(
            &canonical_manufacturer,
            &entry.brand,
            &canonical_size,
        ));

        let block_reason = if !entry.is_complete() {
            Some(BlockReason::Incomplete)
        } else if entry.reason == CandidateReason::NonListInput {
            Some(BlockReason::NonListInput)
        } else if let Some(baseline) = &baseline {
            if is_duplicate {
                Some(BlockReason::Duplicate)
            } else if baseline.dominant_pattern != pattern {
                Some(BlockReason::PatternMismatch {
                    expected: baseline.dominant_pattern,
                    actual: pattern,
                })
            } else {
                None
            }
        } else {
            Some(BlockReason::NoBaseline)
        };

        UnregisteredCandidate {
            manufacturer: entry.manufacturer.clone(),
            brand: entry.brand.clone(),
            size: entry.size.clone(),
            usage_count: entry.usage_count,
            reason: entry.reason,
            canonical_manufacturer,
            canonical_size,
            pattern,
            baseline,
            is_duplicate,
            block_reason,
        }
    }

    pub fn classify_batch(&self, entries: &[CandidateEntry]) -> Vec<UnregisteredCandidate> {
        entries.iter().map(|entry| self.classify(entry)).collect()
    }
}

/// Classify a single entry against an inventory snapshot with the default rules.
pub fn classify_candidate(
    entry: &CandidateEntry,
    inventory: &[FixtureRecord],
) -> UnregisteredCandidate {
    AnomalyClassifier::new(SizeParser::default_parser(), inventory).classify(entry)
}

/// Collect surgery rows that have no inventory counterpart.
///
/// A row counts as registered when an inventory item shares its brand and
/// size key and has an aliasing manufacturer. Unregistered rows are grouped
/// by matching-policy identity key, summing quantities. A group is
/// `not_in_inventory` when any of its rows came from the list, otherwise
/// `non_list_input`.
pub fn find_unregistered_candidates(
    parser: &SizeParser,
    rows: &[SurgeryRecord],
    inventory: &[FixtureRecord],
) -> Vec<CandidateEntry> {
    let mut index: HashMap<(String, String), Vec<&str>> = HashMap::new();
    for item in inventory {
        let size_key = parser.match_key(&item.size, Some(&item.manufacturer));
        index
            .entry((normalize_for_matching(&item.brand), size_key))
            .or_default()
            .push(&item.manufacturer);
    }

    let mut order: Vec<IdentityKey<Matching>> = Vec::new();
    let mut groups: HashMap<IdentityKey<Matching>, (CandidateEntry, bool)> = HashMap::new();

    for row in rows {
        let size_key = parser.match_key(&row.size, Some(&row.manufacturer));
        let registered = index
            .get(&(normalize_for_matching(&row.brand), size_key))
            .is_some_and(|known| {
                known
                    .iter()
                    .any(|m| is_same_manufacturer_alias(m, &row.manufacturer))
            });
        if registered {
            continue;
        }

        let key =
            IdentityKey::<Matching>::build_with(parser, &row.manufacturer, &row.brand, &row.size);
        let from_list = row.source == EntrySource::ListSelected;
        match groups.get_mut(&key) {
            Some((entry, any_from_list)) => {
                entry.usage_count = entry.usage_count.saturating_add(row.quantity);
                *any_from_list |= from_list;
            }
            None => {
                let mut entry = CandidateEntry::new(
                    &row.manufacturer,
                    &row.brand,
                    &row.size,
                    CandidateReason::NotInInventory,
                );
                entry.usage_count = row.quantity;
                order.push(key.clone());
                groups.insert(key, (entry, from_list));
            }
        }
    }

    order
        .into_iter()
        .filter_map(|key| groups.remove(&key))
        .map(|(mut entry, any_from_list)| {
            if !any_from_list {
                entry.reason = CandidateReason::NonListInput;
            }
            entry
        })
        .collect()
}

/// Counts over one analysis pass.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisSummary {
    pub total: usize,
    pub registrable: usize,
    pub blocked: BTreeMap<String, usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateAnalysis {
    pub candidates: Vec<UnregisteredCandidate>,
    pub summary: AnalysisSummary,
}

impl CandidateAnalysis {
    pub fn registrable(&self) -> impl Iterator<Item = &UnregisteredCandidate> {
        self.candidates.iter().filter(|c| c.can_register())
    }
}

/// Find and classify every unregistered surgery entry with the default rules.
pub fn analyze_candidates(
    rows: &[SurgeryRecord],
    inventory: &[FixtureRecord],
) -> CandidateAnalysis {
    analyze_candidates_with(SizeParser::default_parser(), rows, inventory)
}

/// Find and classify every unregistered surgery entry. Sorted by usage,
/// most used first.
pub fn analyze_candidates_with(
    parser: &SizeParser,
    rows: &[SurgeryRecord],
    inventory: &[FixtureRecord],
) -> CandidateAnalysis {
    let classifier = AnomalyClassifier::new(parser, inventory);
    let entries = find_unregistered_candidates(parser, rows, inventory);
    let mut candidates = classifier.classify_batch(&entries);

    candidates.sort_by(|a, b| {
        b.usage_count
            .cmp(&a.usage_count)
            .then_with(|| a.canonical_manufacturer.cmp(&b.canonical_manufacturer))
            .then_with(|| a.brand.cmp(&b.brand))
            .then_with(|| a.canonical_size.cmp(&b.canonical_size))
    });

    let mut summary = AnalysisSummary {
        total: candidates.len(),
        ..AnalysisSummary::default()
    };
    for candidate in &candidates {
        match &candidate.block_reason {
            None => summary.registrable += 1,
            Some(reason) => *summary.blocked.entry(reason.code().to_string()).or_default() += 1,
        }
    }

    debug!(
        rows = rows.len(),
        inventory = inventory.len(),
        baselines = classifier.baseline_count(),
        candidates = summary.total,
        registrable = summary.registrable,
        "candidate analysis complete"
    );

    CandidateAnalysis {
        candidates,
        summary,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dentium_inventory() -> Vec<FixtureRecord> {
        vec![
            FixtureRecord::new("Dentium", "SuperLine", "Φ3.5 X 7"),
            FixtureRecord::new("Dentium", "SuperLine", "Φ4.0 X 8"),
            FixtureRecord::new("Dentium", "SuperLine", "Φ4.5 X 10"),
            FixtureRecord::new("Dentium", "SuperLine", "4510"),
        ]
    }

    fn listed(manufacturer: &str, brand: &str, size: &str) -> CandidateEntry {
        CandidateEntry::new(manufacturer, brand, size, CandidateReason::NotInInventory)
    }

    #[test]
    fn test_classify_pattern_tags() {
        assert_eq!(classify_pattern(""), PatternTag::Empty);
        assert_eq!(classify_pattern("  "), PatternTag::Empty);
        assert_eq!(classify_pattern("C4 Φ3.5 X 11"), PatternTag::CuffSymbol);
        assert_eq!(classify_pattern("D:3.5 L:11"), PatternTag::LabeledDl);
        assert_eq!(classify_pattern("Φ4.0/L10"), PatternTag::SymbolOverL);
        assert_eq!(classify_pattern("Φ4.0 10mm"), PatternTag::SymbolUnit);
        assert_eq!(classify_pattern("Φ4.0 X 10"), PatternTag::Symbol);
        assert_eq!(classify_pattern("3507"), PatternTag::NumericCode);
        assert_eq!(classify_pattern("4.0 x 10"), PatternTag::BareNumeric);
        assert_eq!(classify_pattern("Regular"), PatternTag::Other);
    }

    #[test]
    fn test_baseline_majority() {
        let parser = SizeParser::new();
        let baselines = build_baselines(&parser, &dentium_inventory());
        let baseline = baselines.get(&GroupKey::new("Dentium", "SuperLine")).unwrap();
        assert_eq!(baseline.dominant_pattern, PatternTag::Symbol);
        assert_eq!(baseline.sample_count, 4);
    }

    #[test]
    fn test_baseline_tie_breaks_on_tag_name() {
        let parser = SizeParser::new();
        let inventory = vec![
            FixtureRecord::new("Osstem", "TS III", "Φ4.0 X 10"),
            FixtureRecord::new("Osstem", "TS III", "4.5 x 11"),
        ];
        let baselines = build_baselines(&parser, &inventory);
        let baseline = baselines.get(&GroupKey::new("OSSTEM", "ts-iii")).unwrap();
        // "bare_numeric" < "symbol"
        assert_eq!(baseline.dominant_pattern, PatternTag::BareNumeric);
    }

    #[test]
    fn test_baseline_skips_exchange_items() {
        let parser = SizeParser::new();
        let item = FixtureRecord::new("IBS", "Magicore", "C4 Φ3.5 X 11");
        let inventory = vec![item.clone(), item.exchange_counterpart()];
        let baselines = build_baselines(&parser, &inventory);
        assert_eq!(baselines.len(), 1);
        assert_eq!(baselines.values().next().unwrap().sample_count, 1);
    }

    #[test]
    fn test_numeric_candidate_inconsistent_with_symbol_baseline() {
        let candidate =
            classify_candidate(&listed("Dentium", "SuperLine", "3510"), &dentium_inventory());
        assert_eq!(candidate.pattern, PatternTag::NumericCode);
        assert_eq!(candidate.is_pattern_consistent(), Some(false));
        assert_eq!(candidate.baseline_pattern_label(), Some("Φ4.0 X 10"));
        assert_eq!(
            candidate.block_reason,
            Some(BlockReason::PatternMismatch {
                expected: PatternTag::Symbol,
                actual: PatternTag::NumericCode,
            })
        );
        assert!(!candidate.can_register());
    }

    #[test]
    fn test_consistent_candidate_can_register() {
        let candidate =
            classify_candidate(&listed("Dentium", "SuperLine", "Φ5.0x12"), &dentium_inventory());
        assert_eq!(candidate.canonical_size, "Φ5.0 x 12");
        assert_eq!(candidate.block_reason, None);
        assert!(candidate.can_register());
    }

    #[test]
    fn test_block_incomplete_first() {
        let mut entry = listed("Dentium", "", "3510");
        entry.reason = CandidateReason::NonListInput;
        let candidate = classify_candidate(&entry, &dentium_inventory());
        assert_eq!(candidate.block_reason, Some(BlockReason::Incomplete));
    }

    #[test]
    fn test_block_non_list_input_before_baseline() {
        let entry =
            CandidateEntry::new("Unknown", "Brand", "Φ4 X 10", CandidateReason::NonListInput);
        let candidate = classify_candidate(&entry, &dentium_inventory());
        assert_eq!(candidate.block_reason, Some(BlockReason::NonListInput));
    }

    #[test]
    fn test_block_no_baseline() {
        let candidate =
            classify_candidate(&listed("Neo", "IS-III", "Φ4 X 10"), &dentium_inventory());
        assert!(candidate.baseline.is_none());
        assert_eq!(candidate.is_pattern_consistent(), None);
        assert_eq!(candidate.block_reason, Some(BlockReason::NoBaseline));
    }

    #[test]
    fn test_block_duplicate_across_notations() {
        let candidate =
            classify_candidate(&listed("Dentium", "SuperLine", "Φ3.5 x 7"), &dentium_inventory());
        assert!(candidate.is_duplicate);
        assert_eq!(candidate.block_reason, Some(BlockReason::Duplicate));
    }

    #[test]
    fn test_manufacturer_alias_resolution() {
        let inventory = vec![
            FixtureRecord::new("IBS Implant", "Magicore", "C4 Φ3.5 X 11"),
            FixtureRecord::new("IBS Implant", "Magicore", "C3 Φ4 X 10"),
        ];
        let candidate =
            classify_candidate(&listed("IBS", "Magicore", "D:4.5 L:8.5 Cuff:2"), &inventory);
        assert_eq!(candidate.canonical_manufacturer, "IBS Implant");
        assert_eq!(candidate.canonical_size, "C2 Φ4.5 X 8.5");
        assert_eq!(candidate.pattern, PatternTag::CuffSymbol);
        assert!(candidate.can_register());
    }

    #[test]
    fn test_resolution_falls_back_to_raw() {
        let parser = SizeParser::new();
        let classifier = AnomalyClassifier::new(&parser, &dentium_inventory());
        assert_eq!(classifier.resolve_manufacturer(" Neo ", "IS-III"), "Neo");
        assert_eq!(classifier.resolve_manufacturer("DENTIUM", "Other"), "Dentium");
    }

    #[test]
    fn test_duplicate_detection_preserves_exchange_category() {
        let parser = SizeParser::new();
        let inventory = vec![FixtureRecord::new("IBS", "BrandX", "Φ4 X 10")];
        let classifier = AnomalyClassifier::new(&parser, &inventory);

        assert!(classifier.is_registered(&FixtureRecord::new("IBS", "BrandX", "Φ4 X 10")));
        assert!(!classifier.is_registered(&FixtureRecord::new("수술중교환_IBS", "BrandX", "Φ4 X 10")));
    }

    #[test]
    fn test_find_unregistered_aggregates_usage() {
        let parser = SizeParser::new();
        let rows = vec![
            SurgeryRecord::new("Dentium", "SuperLine", "Φ5 X 12", EntrySource::ListSelected),
            SurgeryRecord::new("dentium", "Super Line", "Φ5.0x12", EntrySource::FreeText)
                .with_quantity(2),
            SurgeryRecord::new("Dentium", "SuperLine", "Φ3.5 x 7", EntrySource::ListSelected),
        ];
        let entries = find_unregistered_candidates(&parser, &rows, &dentium_inventory());
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].usage_count, 3);
        assert_eq!(entries[0].reason, CandidateReason::NotInInventory);
    }

    #[test]
    fn test_slash_notation_duplicate_under_numeric_code_maker() {
        let inventory = vec![
            FixtureRecord::new("Dentium", "SuperLine", "Φ4.5 X 7"),
            FixtureRecord::new("Dentium", "SuperLine", "Φ4.0 X 8"),
        ];
        let candidate = classify_candidate(&listed("Dentium", "SuperLine", "4.5/7.0"), &inventory);
        assert_eq!(candidate.canonical_size, "4.5/7.0");
        assert!(candidate.is_duplicate);
        assert_eq!(candidate.block_reason, Some(BlockReason::Duplicate));
    }

    #[test]
    fn test_find_unregistered_usage_saturates() {
        let parser = SizeParser::new();
        let rows = vec![
            SurgeryRecord::new("Neo", "IS-III", "Φ4 X 10", EntrySource::ListSelected)
                .with_quantity(u32::MAX),
            SurgeryRecord::new("Neo", "IS-III", "Φ4 X 10", EntrySource::ListSelected),
        ];
        let entries = find_unregistered_candidates(&parser, &rows, &dentium_inventory());
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].usage_count, u32::MAX);
    }

    #[test]
    fn test_find_unregistered_free_text_only() {
        let parser = SizeParser::new();
        let rows = vec![SurgeryRecord::new(
            "Dentium",
            "SuperLine",
            "Φ5 X 12",
            EntrySource::FreeText,
        )];
        let entries = find_unregistered_candidates(&parser, &rows, &dentium_inventory());
        assert_eq!(entries[0].reason, CandidateReason::NonListInput);
    }

    #[test]
    fn test_find_unregistered_matches_aliases_and_exchange_rows() {
        let parser = SizeParser::new();
        let inventory = vec![FixtureRecord::new("IBS Implant", "Magicore", "C4 Φ3.5 X 11")];
        let rows = vec![
            SurgeryRecord::new("IBS", "Magicore", "D:3.5 L:11 Cuff:4", EntrySource::ListSelected),
            SurgeryRecord::new(
                "수술중교환_IBS Implant",
                "Magicore",
                "C4 Φ3.5 X 11",
                EntrySource::ListSelected,
            ),
        ];
        assert!(find_unregistered_candidates(&parser, &rows, &inventory).is_empty());
    }

    #[test]
    fn test_analyze_candidates_summary() {
        let rows = vec![
            SurgeryRecord::new("Dentium", "SuperLine", "3510", EntrySource::ListSelected)
                .with_quantity(4),
            SurgeryRecord::new("Dentium", "SuperLine", "Φ5 X 12", EntrySource::ListSelected),
            SurgeryRecord::new("Neo", "IS-III", "Φ4 X 10", EntrySource::FreeText),
        ];
        let analysis = analyze_candidates(&rows, &dentium_inventory());

        assert_eq!(analysis.summary.total, 3);
        assert_eq!(analysis.summary.registrable, 1);
        assert_eq!(analysis.summary.blocked.get("pattern_mismatch"), Some(&1));
        assert_eq!(analysis.summary.blocked.get("non_list_input"), Some(&1));
        assert_eq!(analysis.candidates[0].usage_count, 4);
        assert_eq!(analysis.registrable().count(), 1);
    }
}
