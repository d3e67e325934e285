//! Fuzzy duplicate detection across service records.
//!
//! Each pair is scored on up to three signals (name similarity,
//! organization-name similarity, city match). The confidence is
//! `matches / applicable signals`; pairs above the duplicate threshold are
//! reported. Records are blocked by normalized state before comparison so
//! only geographically compatible pairs are ever scored, and large sets are
//! further blocked by the first character of the name.

use std::collections::{BTreeSet, HashMap, HashSet};

use serde::Serialize;
use uuid::Uuid;

use crate::mapping::normalize_state;
use crate::models::{DuplicatePair, Service};

pub const FIELD_NAME: &str = "name";
pub const FIELD_ORGANIZATION: &str = "organization.name";
pub const FIELD_CITY: &str = "location.city";

/// Thresholds and blocking limits for the engine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DedupConfig {
    /// Name/org similarity must exceed this to count as a match.
    pub similarity_threshold: f64,
    /// Match tally must exceed this for a pair to be reported.
    pub duplicate_threshold: f64,
    /// Above this many records, blocks are also split by name initial.
    pub initial_blocking_above: usize,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.8,
            duplicate_threshold: 0.7,
            initial_blocking_above: 5000,
        }
    }
}

impl DedupConfig {
    pub fn with_initial_blocking_above(mut self, records: usize) -> Self {
        self.initial_blocking_above = records;
        self
    }
}

/// The comparable projection of a service. This is all the engine keeps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DedupKey {
    pub id: Uuid,
    pub name: String,
    pub organization: String,
    pub city: String,
    pub state: String,
}

impl DedupKey {
    pub fn from_service(service: &Service) -> Self {
        Self {
            id: service.id,
            name: normalize_text(&service.name),
            organization: normalize_text(&service.organization.name),
            city: service
                .location
                .city
                .as_deref()
                .map(normalize_text)
                .unwrap_or_default(),
            state: service
                .location
                .state
                .as_deref()
                .map(normalize_state)
                .unwrap_or_default(),
        }
    }

    fn initial(&self) -> Option<char> {
        self.name.chars().find(|c| c.is_alphanumeric())
    }
}

/// Score of a single compared pair.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchOutcome {
    pub confidence: f64,
    pub matched_fields: BTreeSet<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct DedupReport {
    pub duplicate_pairs: Vec<DuplicatePair>,
    /// Pairs actually scored after blocking.
    pub comparisons: usize,
}

/// Lower-case and collapse internal whitespace.
pub fn normalize_text(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// `1 - levenshtein(a, b) / max(len(a), len(b))`, in characters.
pub fn similarity(a: &str, b: &str) -> f64 {
    strsim::normalized_levenshtein(a, b)
}

/// Whether two records sit in materially different states.
pub fn states_differ(a: &DedupKey, b: &DedupKey) -> bool {
    !a.state.is_empty() && !b.state.is_empty() && a.state != b.state
}

#[derive(Debug, Clone, Default)]
pub struct DedupEngine {
    config: DedupConfig,
}

impl DedupEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: DedupConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DedupConfig {
        &self.config
    }

    /// Score one pair. Returns `None` when the state pre-filter skips it or
    /// no signal applies.
    pub fn compare(&self, a: &DedupKey, b: &DedupKey) -> Option<MatchOutcome> {
        if states_differ(a, b) {
            return None;
        }

        let mut applicable = 0u32;
        let mut matched_fields = BTreeSet::new();

        if !a.name.is_empty() && !b.name.is_empty() {
            applicable += 1;
            if similarity(&a.name, &b.name) > self.config.similarity_threshold {
                matched_fields.insert(FIELD_NAME.to_string());
            }
        }

        if !a.organization.is_empty() && !b.organization.is_empty() {
            applicable += 1;
            if similarity(&a.organization, &b.organization) > self.config.similarity_threshold {
                matched_fields.insert(FIELD_ORGANIZATION.to_string());
            }
        }

        if !a.city.is_empty() && !b.city.is_empty() {
            applicable += 1;
            if a.city == b.city {
                matched_fields.insert(FIELD_CITY.to_string());
            }
        }

        if applicable == 0 {
            return None;
        }

        Some(MatchOutcome {
            confidence: matched_fields.len() as f64 / applicable as f64,
            matched_fields,
        })
    }

    /// Find duplicate pairs among `candidates` and between `candidates` and
    /// `existing`. Pairs within `existing` are never compared.
    pub fn find_duplicates(&self, candidates: &[Service], existing: &[Service]) -> DedupReport {
        let candidates: Vec<DedupKey> = candidates.iter().map(DedupKey::from_service).collect();
        let existing: Vec<DedupKey> = existing.iter().map(DedupKey::from_service).collect();
        self.find_duplicate_keys(&candidates, &existing)
    }

    pub fn find_duplicate_keys(&self, candidates: &[DedupKey], existing: &[DedupKey]) -> DedupReport {
        let use_initials = candidates.len() + existing.len() > self.config.initial_blocking_above;
        let candidate_blocks = Blocks::build(candidates, use_initials);
        let existing_blocks = Blocks::build(existing, use_initials);

        let mut report = DedupReport::default();

        for (i, a) in candidates.iter().enumerate() {
            let initial = if use_initials { a.initial() } else { None };

            let later_candidates = candidate_blocks
                .partners(&a.state, initial)
                .filter(|&j| j > i)
                .map(|j| &candidates[j]);
            let known = existing_blocks
                .partners(&a.state, initial)
                .map(|j| &existing[j]);

            for b in later_candidates.chain(known) {
                if a.id == b.id {
                    continue;
                }
                report.comparisons += 1;
                if let Some(outcome) = self.compare(a, b)
                    && outcome.confidence > self.config.duplicate_threshold
                {
                    report.duplicate_pairs.push(DuplicatePair {
                        service_a: a.id,
                        service_b: b.id,
                        confidence: outcome.confidence,
                        matched_fields: outcome.matched_fields,
                    });
                }
            }
        }

        tracing::debug!(
            candidates = candidates.len(),
            existing = existing.len(),
            comparisons = report.comparisons,
            duplicates = report.duplicate_pairs.len(),
            use_initials,
            "Deduplication pass complete"
        );

        report
    }
}

type Initial = Option<char>;

/// Record indices bucketed by (state, name initial). Records without a
/// state are kept apart because they are compatible with every state.
struct Blocks {
    by_state: HashMap<(String, Initial), Vec<usize>>,
    stateless: HashMap<Initial, Vec<usize>>,
    by_initial: HashMap<Initial, Vec<usize>>,
}

impl Blocks {
    fn build(keys: &[DedupKey], use_initials: bool) -> Self {
        let mut blocks = Blocks {
            by_state: HashMap::new(),
            stateless: HashMap::new(),
            by_initial: HashMap::new(),
        };
        for (idx, key) in keys.iter().enumerate() {
            let initial = if use_initials { key.initial() } else { None };
            if key.state.is_empty() {
                blocks.stateless.entry(initial).or_default().push(idx);
            } else {
                blocks
                    .by_state
                    .entry((key.state.clone(), initial))
                    .or_default()
                    .push(idx);
            }
            blocks.by_initial.entry(initial).or_default().push(idx);
        }
        blocks
    }

    /// Indices of every record compatible with `state` / `initial`.
    fn partners<'a>(&'a self, state: &str, initial: Initial) -> Box<dyn Iterator<Item = usize> + 'a> {
        if state.is_empty() {
            return Box::new(self.by_initial.get(&initial).into_iter().flatten().copied());
        }
        let same_state = self
            .by_state
            .get(&(state.to_string(), initial))
            .into_iter()
            .flatten();
        let stateless = self.stateless.get(&initial).into_iter().flatten();
        Box::new(same_state.chain(stateless).copied())
    }
}

/// The growing set of records already seen during a pipeline run.
///
/// Holds only [`DedupKey`]s, never full records.
#[derive(Debug, Default)]
pub struct DedupIndex {
    keys: Vec<DedupKey>,
    ids: HashSet<Uuid>,
}

impl DedupIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn contains(&self, id: &Uuid) -> bool {
        self.ids.contains(id)
    }

    /// Compare `candidates` against each other and the committed keys.
    /// The index is left unchanged.
    pub fn find_duplicates(&self, engine: &DedupEngine, candidates: &[Service]) -> DedupReport {
        let keys: Vec<DedupKey> = candidates.iter().map(DedupKey::from_service).collect();
        engine.find_duplicate_keys(&keys, &self.keys)
    }

    /// Commit services to the index. Ids already present are skipped.
    /// Returns how many keys were added.
    pub fn insert(&mut self, services: &[Service]) -> usize {
        let before = self.keys.len();
        for service in services {
            if self.ids.insert(service.id) {
                self.keys.push(DedupKey::from_service(service));
            }
        }
        self.keys.len() - before
    }

    pub fn clear(&mut self) {
        self.keys.clear();
        self.ids.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service(id: &str, name: &str, org: &str, city: &str, state: Option<&str>) -> Service {
        let mut s = Service::new("test", id, name);
        s.organization.name = org.into();
        s.location.city = (!city.is_empty()).then(|| city.to_string());
        s.location.state = state.map(str::to_string);
        s
    }

    #[test]
    fn single_record_has_no_duplicates() {
        let s = service("1", "Youth Legal", "Legal Aid", "Brisbane", Some("QLD"));
        let report = DedupEngine::new().find_duplicates(&[s], &[]);
        assert!(report.duplicate_pairs.is_empty());
        assert_eq!(report.comparisons, 0);
    }

    #[test]
    fn identical_records_match_with_full_confidence() {
        let a = service("1", "Youth Legal", "Legal Aid", "Brisbane", Some("QLD"));
        let b = service("2", "Youth Legal", "Legal Aid", "Brisbane", Some("QLD"));
        let report = DedupEngine::new().find_duplicates(&[a.clone(), b.clone()], &[]);
        assert_eq!(report.duplicate_pairs.len(), 1);
        let pair = &report.duplicate_pairs[0];
        assert_eq!(pair.confidence, 1.0);
        assert_eq!((pair.service_a, pair.service_b), (a.id, b.id));
        assert_eq!(pair.matched_fields.len(), 3);
    }

    #[test]
    fn abbreviated_names_still_match() {
        let a = service(
            "1",
            "Brisbane Youth Legal Service",
            "Legal Aid QLD",
            "Brisbane",
            None,
        );
        let b = service(
            "2",
            "Brisbane Youth Legal Svc",
            "Legal Aid Qld",
            "Brisbane",
            None,
        );
        let report = DedupEngine::new().find_duplicates(&[a], &[b]);
        assert_eq!(report.duplicate_pairs.len(), 1);
        assert!(report.duplicate_pairs[0].confidence >= 0.8);
    }

    #[test]
    fn different_records_do_not_match() {
        let a = service("1", "Youth Legal Service", "Legal Aid", "Brisbane", None);
        let b = service("2", "Aged Care Dental", "Smile Co", "Hobart", None);
        let report = DedupEngine::new().find_duplicates(&[a, b], &[]);
        assert!(report.duplicate_pairs.is_empty());
        assert_eq!(report.comparisons, 1);
    }

    #[test]
    fn comparison_is_symmetric() {
        let engine = DedupEngine::new();
        let a = DedupKey::from_service(&service("1", "Food Bank West", "Food Bank", "Perth", None));
        let b = DedupKey::from_service(&service("2", "Foodbank Wst", "FoodBank", "perth", None));
        assert_eq!(engine.compare(&a, &b), engine.compare(&b, &a));
        assert_eq!(similarity(&a.name, &b.name), similarity(&b.name, &a.name));
    }

    #[test]
    fn different_states_are_never_compared() {
        let a = service("1", "Youth Legal", "Legal Aid", "Brisbane", Some("Queensland"));
        let b = service("2", "Youth Legal", "Legal Aid", "Brisbane", Some("VIC"));
        let report = DedupEngine::new().find_duplicates(&[a], &[b]);
        assert!(report.duplicate_pairs.is_empty());
        assert_eq!(report.comparisons, 0);
    }

    #[test]
    fn state_spellings_are_normalized() {
        let a = service("1", "Youth Legal", "Legal Aid", "Brisbane", Some("Queensland"));
        let b = service("2", "Youth Legal", "Legal Aid", "Brisbane", Some("QLD"));
        let report = DedupEngine::new().find_duplicates(&[a, b], &[]);
        assert_eq!(report.duplicate_pairs.len(), 1);
    }

    #[test]
    fn stateless_records_compare_against_every_state() {
        let a = service("1", "Youth Legal", "Legal Aid", "Brisbane", Some("QLD"));
        let b = service("2", "Youth Legal", "Legal Aid", "Brisbane", None);
        let c = service("3", "Youth Legal", "Legal Aid", "Brisbane", Some("VIC"));
        let report = DedupEngine::new().find_duplicates(&[a, b, c], &[]);
        // a-b and b-c compared, a-c blocked.
        assert_eq!(report.comparisons, 2);
        assert_eq!(report.duplicate_pairs.len(), 2);
    }

    #[test]
    fn org_signal_only_applies_when_both_present() {
        let engine = DedupEngine::new();
        let a = DedupKey::from_service(&service("1", "Youth Legal", "", "Brisbane", None));
        let b = DedupKey::from_service(&service("2", "Youth Legal", "Legal Aid", "Brisbane", None));
        let outcome = engine.compare(&a, &b).unwrap();
        assert_eq!(outcome.confidence, 1.0);
        assert!(!outcome.matched_fields.contains(FIELD_ORGANIZATION));
    }

    #[test]
    fn two_of_three_signals_is_not_enough() {
        let engine = DedupEngine::new();
        let a = DedupKey::from_service(&service("1", "Youth Legal", "Legal Aid", "Brisbane", None));
        let b = DedupKey::from_service(&service("2", "Youth Legal", "Legal Aid", "Cairns", None));
        let outcome = engine.compare(&a, &b).unwrap();
        assert!((outcome.confidence - 2.0 / 3.0).abs() < 1e-9);
        let report = engine.find_duplicates(
            &[service("1", "Youth Legal", "Legal Aid", "Brisbane", None)],
            &[service("2", "Youth Legal", "Legal Aid", "Cairns", None)],
        );
        assert!(report.duplicate_pairs.is_empty());
    }

    #[test]
    fn initial_blocking_limits_comparisons() {
        let engine = DedupEngine::with_config(DedupConfig::default().with_initial_blocking_above(2));
        let records = vec![
            service("1", "Alpha Housing", "Org A", "Perth", Some("WA")),
            service("2", "Alpha Housing", "Org A", "Perth", Some("WA")),
            service("3", "Beta Housing", "Org B", "Perth", Some("WA")),
        ];
        let report = engine.find_duplicates(&records, &[]);
        assert_eq!(report.comparisons, 1);
        assert_eq!(report.duplicate_pairs.len(), 1);
    }

    #[test]
    fn index_grows_only_on_insert() {
        let engine = DedupEngine::new();
        let mut index = DedupIndex::new();

        let first = [service("1", "Youth Legal", "Legal Aid", "Brisbane", Some("QLD"))];
        assert!(index.find_duplicates(&engine, &first).duplicate_pairs.is_empty());
        assert_eq!(index.insert(&first), 1);

        let second = [service("2", "Youth Legal", "Legal Aid", "Brisbane", Some("QLD"))];
        let report = index.find_duplicates(&engine, &second);
        assert_eq!(report.duplicate_pairs.len(), 1);
        // Comparing does not grow the index.
        assert_eq!(index.len(), 1);
        assert!(!index.contains(&second[0].id));

        assert_eq!(index.insert(&second), 1);
        assert_eq!(index.len(), 2);

        // Re-ingesting the same record neither duplicates itself nor grows the index.
        let report = index.find_duplicates(&engine, &first);
        assert_eq!(report.duplicate_pairs.len(), 1);
        assert_eq!(index.insert(&first), 0);
        assert_eq!(index.len(), 2);

        index.clear();
        assert!(index.is_empty());
    }
}
