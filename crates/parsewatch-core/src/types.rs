//! Core types for parsewatch.
//!
//! Inputs (journals, parser outputs, gold labels) are modelled leniently: every
//! constructor is total over arbitrary JSON so that bad parser output becomes a
//! finding instead of a crash. Outputs (check and drift results) are strict.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// =========================================================================
// CLOSED VOCABULARIES
// =========================================================================

/// Health domain of an extracted item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Domain {
    Symptom,
    Food,
    Emotion,
    Mind,
    /// Unrecognized raw value, kept for reporting.
    Invalid(String),
}

impl Domain {
    /// The four recognized domains, in reporting order.
    pub const ALL: [Domain; 4] = [Domain::Symptom, Domain::Food, Domain::Emotion, Domain::Mind];

    pub fn as_str(&self) -> &str {
        match self {
            Domain::Symptom => "symptom",
            Domain::Food => "food",
            Domain::Emotion => "emotion",
            Domain::Mind => "mind",
            Domain::Invalid(raw) => raw,
        }
    }

    pub fn is_valid(&self) -> bool {
        !matches!(self, Domain::Invalid(_))
    }
}

impl From<&str> for Domain {
    fn from(raw: &str) -> Self {
        match raw {
            "symptom" => Domain::Symptom,
            "food" => Domain::Food,
            "emotion" => Domain::Emotion,
            "mind" => Domain::Mind,
            other => Domain::Invalid(other.to_string()),
        }
    }
}

/// Whether the journal asserts the item happened.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Polarity {
    Present,
    Absent,
    Unknown,
    Invalid(String),
}

impl Polarity {
    pub fn as_str(&self) -> &str {
        match self {
            Polarity::Present => "present",
            Polarity::Absent => "absent",
            Polarity::Unknown => "unknown",
            Polarity::Invalid(raw) => raw,
        }
    }

    pub fn is_valid(&self) -> bool {
        !matches!(self, Polarity::Invalid(_))
    }

    /// `present`, or the legacy `positive` spelling some parser builds emit.
    pub fn is_present_like(&self) -> bool {
        match self {
            Polarity::Present => true,
            Polarity::Invalid(raw) => raw.eq_ignore_ascii_case("positive"),
            _ => false,
        }
    }

    /// `absent`, or the legacy `negative` spelling.
    pub fn is_absent_like(&self) -> bool {
        match self {
            Polarity::Absent => true,
            Polarity::Invalid(raw) => raw.eq_ignore_ascii_case("negative"),
            _ => false,
        }
    }

    /// `unknown`, or the legacy `uncertain` spelling.
    pub fn is_uncertain_like(&self) -> bool {
        match self {
            Polarity::Unknown => true,
            Polarity::Invalid(raw) => raw.eq_ignore_ascii_case("uncertain"),
            _ => false,
        }
    }
}

impl From<&str> for Polarity {
    fn from(raw: &str) -> Self {
        match raw {
            "present" => Polarity::Present,
            "absent" => Polarity::Absent,
            "unknown" => Polarity::Unknown,
            other => Polarity::Invalid(other.to_string()),
        }
    }
}

/// Reported intensity of an item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Intensity {
    Low,
    Medium,
    High,
    Unknown,
    Invalid(String),
}

impl Intensity {
    pub const ALL: [Intensity; 4] = [
        Intensity::High,
        Intensity::Medium,
        Intensity::Low,
        Intensity::Unknown,
    ];

    pub fn as_str(&self) -> &str {
        match self {
            Intensity::Low => "low",
            Intensity::Medium => "medium",
            Intensity::High => "high",
            Intensity::Unknown => "unknown",
            Intensity::Invalid(raw) => raw,
        }
    }

    pub fn is_valid(&self) -> bool {
        !matches!(self, Intensity::Invalid(_))
    }
}

impl From<&str> for Intensity {
    fn from(raw: &str) -> Self {
        match raw {
            "low" => Intensity::Low,
            "medium" => Intensity::Medium,
            "high" => Intensity::High,
            "unknown" => Intensity::Unknown,
            other => Intensity::Invalid(other.to_string()),
        }
    }
}

macro_rules! string_vocabulary {
    ($($ty:ident),*) => {
        $(
            impl From<String> for $ty {
                fn from(raw: String) -> Self {
                    Self::from(raw.as_str())
                }
            }

            impl From<$ty> for String {
                fn from(value: $ty) -> Self {
                    value.as_str().to_string()
                }
            }

            impl fmt::Display for $ty {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    f.write_str(self.as_str())
                }
            }
        )*
    };
}

string_vocabulary!(Domain, Polarity, Intensity);

/// Read a vocabulary field from raw JSON. Non-strings become `Invalid`.
fn vocabulary_field<T: From<String>>(value: &Value, key: &str) -> Option<T> {
    match value.get(key) {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) => Some(T::from(s.clone())),
        Some(other) => Some(T::from(other.to_string())),
    }
}

fn string_field(value: &Value, key: &str) -> Option<String> {
    match value.get(key) {
        Some(Value::String(s)) => Some(s.clone()),
        _ => None,
    }
}

// =========================================================================
// INPUT RECORDS
// =========================================================================

/// A free-form journal entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Journal {
    /// Unique id; canary files spell it `journal_id`
    #[serde(alias = "journal_id")]
    pub id: String,

    pub text: String,
}

/// One structured item pulled out of a journal by the parser.
///
/// Every field is optional so that a missing or mistyped field survives
/// parsing and is reported by schema validation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedItem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<Domain>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub polarity: Option<Polarity>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intensity: Option<Intensity>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence_span: Option<String>,
}

impl ExtractedItem {
    /// Build an item from arbitrary JSON. Never fails.
    pub fn from_value(value: &Value) -> Self {
        if !value.is_object() {
            return Self::default();
        }

        Self {
            domain: vocabulary_field(value, "domain"),
            item_name: string_field(value, "item_name"),
            polarity: vocabulary_field(value, "polarity"),
            intensity: vocabulary_field(value, "intensity"),
            evidence_span: string_field(value, "evidence_span"),
        }
    }

    /// Convenience constructor for a well-formed item.
    pub fn new(
        domain: Domain,
        item_name: impl Into<String>,
        polarity: Polarity,
        evidence_span: impl Into<String>,
    ) -> Self {
        Self {
            domain: Some(domain),
            item_name: Some(item_name.into()),
            polarity: Some(polarity),
            intensity: None,
            evidence_span: Some(evidence_span.into()),
        }
    }

    pub fn with_intensity(mut self, intensity: Intensity) -> Self {
        self.intensity = Some(intensity);
        self
    }

    /// Evidence text, or "" when missing.
    pub fn evidence(&self) -> &str {
        self.evidence_span.as_deref().unwrap_or("")
    }

    /// Intensity for analysis: absence reads as `unknown`.
    pub fn effective_intensity(&self) -> Intensity {
        self.intensity.clone().unwrap_or(Intensity::Unknown)
    }
}

/// All items the parser produced for one journal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParserOutputRecord {
    pub journal_id: String,

    #[serde(default)]
    pub items: Vec<ExtractedItem>,
}

/// Gold labels for one canary journal. Same shape as a parser record.
pub type CanaryGoldRecord = ParserOutputRecord;

/// A parser output line that could not be attributed to a journal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MalformedRecord {
    /// 1-based line number in the source file (0 when built in memory)
    pub line: usize,

    /// Journal id, if one could be read
    pub journal_id: Option<String>,

    /// Number of items the record appears to hold
    pub item_count: usize,

    pub reason: String,
}

impl MalformedRecord {
    /// Number of schema failures this record accounts for.
    pub fn failing_units(&self) -> usize {
        self.item_count.max(1)
    }
}

impl ParserOutputRecord {
    /// Build a record from arbitrary JSON, or explain why it is malformed.
    pub fn from_value(line: usize, value: &Value) -> Result<Self, MalformedRecord> {
        let journal_id = value
            .get("journal_id")
            .and_then(Value::as_str)
            .map(str::to_string);

        let items = value.get("items");
        let item_count = items.and_then(Value::as_array).map_or(0, Vec::len);

        let malformed = |reason: &str| MalformedRecord {
            line,
            journal_id: journal_id.clone(),
            item_count,
            reason: reason.to_string(),
        };

        if !value.is_object() {
            return Err(malformed("record is not a JSON object"));
        }

        let Some(id) = journal_id.clone().filter(|id| !id.is_empty()) else {
            return Err(malformed("missing or non-string journal_id"));
        };

        let items = match items {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(values)) => values.iter().map(ExtractedItem::from_value).collect(),
            Some(_) => return Err(malformed("items is not an array")),
        };

        Ok(Self {
            journal_id: id,
            items,
        })
    }
}

/// Every record from one parser run, keyed by journal id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParserOutputSet {
    /// Run label (e.g. "day0", "day1")
    pub label: String,

    pub records: BTreeMap<String, ParserOutputRecord>,

    #[serde(default)]
    pub malformed: Vec<MalformedRecord>,
}

impl ParserOutputSet {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            ..Default::default()
        }
    }

    /// Build a set from records. Duplicate journal ids keep the first record
    /// and file the rest as malformed.
    pub fn from_records(
        label: impl Into<String>,
        records: impl IntoIterator<Item = ParserOutputRecord>,
    ) -> Self {
        let mut set = Self::new(label);
        for record in records {
            set.insert(0, record);
        }
        set
    }

    /// Insert a record read from `line`.
    pub fn insert(&mut self, line: usize, record: ParserOutputRecord) {
        if self.records.contains_key(&record.journal_id) {
            self.malformed.push(MalformedRecord {
                line,
                journal_id: Some(record.journal_id.clone()),
                item_count: record.items.len(),
                reason: "duplicate journal_id in one run".to_string(),
            });
            return;
        }
        self.records.insert(record.journal_id.clone(), record);
    }

    /// Keep only records for the given journal ids. Malformed entries are dropped.
    pub fn restricted_to<'a>(&self, ids: impl IntoIterator<Item = &'a String>) -> Self {
        let records = ids
            .into_iter()
            .filter_map(|id| self.records.get(id).map(|r| (id.clone(), r.clone())))
            .collect();

        Self {
            label: self.label.clone(),
            records,
            malformed: Vec::new(),
        }
    }

    /// Iterate over every item of every well-formed record.
    pub fn items(&self) -> impl Iterator<Item = &ExtractedItem> {
        self.records.values().flat_map(|r| r.items.iter())
    }

    pub fn item_count(&self) -> usize {
        self.records.values().map(|r| r.items.len()).sum()
    }
}

/// Journals keyed by id.
pub type JournalSet = BTreeMap<String, Journal>;

/// Gold records keyed by journal id.
pub type GoldSet = BTreeMap<String, CanaryGoldRecord>;

/// Everything one monitoring run reads. Read-only once built.
#[derive(Debug, Clone, Default)]
pub struct MonitorInputs {
    pub journals: JournalSet,

    /// Baseline parser run (e.g. "day0")
    pub baseline: ParserOutputSet,

    /// Candidate parser run under evaluation (e.g. "day1")
    pub candidate: ParserOutputSet,

    pub canary_journals: JournalSet,

    pub gold: GoldSet,
}

// =========================================================================
// RESULTS
// =========================================================================

/// Outcome of a single pass/fail check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CheckStatus {
    Pass,
    Fail,
}

impl CheckStatus {
    pub fn from_pass(passed: bool) -> Self {
        if passed {
            CheckStatus::Pass
        } else {
            CheckStatus::Fail
        }
    }

    pub fn is_pass(&self) -> bool {
        matches!(self, CheckStatus::Pass)
    }
}

/// The atomic unit of invariant and canary reporting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckResult {
    pub name: String,
    pub status: CheckStatus,
    pub observed_value: f64,
    pub threshold: f64,
    pub detail: String,

    /// Offending examples (capped)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub samples: Vec<String>,
}

/// Which side of its threshold a check's observed value must stay on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bound {
    AtLeast,
    AtMost,
}

impl CheckResult {
    /// Whether `status` can follow from `observed_value` and `threshold`.
    ///
    /// Observed values are rounded, so a value within rounding distance of
    /// the threshold fits either status.
    pub fn status_is_plausible(&self, bound: Bound) -> bool {
        let (observed, threshold) = (self.observed_value, self.threshold);
        match (bound, self.status) {
            (Bound::AtLeast, CheckStatus::Pass) => observed >= threshold - ROUNDING_SLACK,
            (Bound::AtLeast, CheckStatus::Fail) => observed <= threshold + ROUNDING_SLACK,
            (Bound::AtMost, CheckStatus::Pass) => observed <= threshold + ROUNDING_SLACK,
            (Bound::AtMost, CheckStatus::Fail) => observed >= threshold - ROUNDING_SLACK,
        }
    }
}

/// Drift severity. Ordered: none < minor < moderate < severe.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum DriftSeverity {
    #[default]
    None,
    Minor,
    Moderate,
    Severe,
}

impl DriftSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            DriftSeverity::None => "none",
            DriftSeverity::Minor => "minor",
            DriftSeverity::Moderate => "moderate",
            DriftSeverity::Severe => "severe",
        }
    }

    /// Action a drift of this severity recommends on its own.
    pub fn recommended_action(&self) -> Action {
        match self {
            DriftSeverity::None | DriftSeverity::Minor => Action::Deploy,
            DriftSeverity::Moderate => Action::HumanReview,
            DriftSeverity::Severe => Action::Rollback,
        }
    }
}

impl fmt::Display for DriftSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Baseline vs candidate comparison of one metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftMetricResult {
    pub name: String,
    pub baseline_value: f64,
    pub candidate_value: f64,
    pub delta: f64,
    pub severity: DriftSeverity,
}

/// Deployment decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Deploy,
    HumanReview,
    Rollback,
}

impl Action {
    /// Process exit status for this action.
    pub fn exit_code(&self) -> i32 {
        match self {
            Action::Deploy => 0,
            Action::HumanReview => 1,
            Action::Rollback => 2,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Deploy => "deploy",
            Action::HumanReview => "human_review",
            Action::Rollback => "rollback",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canary alert level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertLevel {
    Pass,
    HumanReview,
    Rollback,
}

impl AlertLevel {
    pub fn action(&self) -> Action {
        match self {
            AlertLevel::Pass => Action::Deploy,
            AlertLevel::HumanReview => Action::HumanReview,
            AlertLevel::Rollback => Action::Rollback,
        }
    }
}

impl fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AlertLevel::Pass => "PASS",
            AlertLevel::HumanReview => "HUMAN_REVIEW",
            AlertLevel::Rollback => "ROLLBACK",
        })
    }
}

/// Percentage of `count` over `total`, rounded to two decimals.
///
/// Returns `vacuous` when `total` is zero.
pub fn percentage(count: usize, total: usize, vacuous: f64) -> f64 {
    if total == 0 {
        return vacuous;
    }
    round2(count as f64 / total as f64 * 100.0)
}

/// Round to two decimals.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Largest gap between a reported (two-decimal) value and the exact one.
pub const ROUNDING_SLACK: f64 = 0.005 + 1e-9;

/// Whether `count` of `total` is at least `min_percent` percent.
///
/// Decided on the exact ratio, never on the rounded percentage. An empty
/// population qualifies.
pub fn share_at_least(count: usize, total: usize, min_percent: f64) -> bool {
    total == 0 || count as f64 * 100.0 >= min_percent * total as f64
}

/// Whether `count` of `total` is at most `max_percent` percent.
pub fn share_at_most(count: usize, total: usize, max_percent: f64) -> bool {
    total == 0 || count as f64 * 100.0 <= max_percent * total as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_vocabulary_parsing_is_total() {
        assert_eq!(Domain::from("food"), Domain::Food);
        assert_eq!(Domain::from("sleep"), Domain::Invalid("sleep".to_string()));
        assert_eq!(Polarity::from("Present"), Polarity::Invalid("Present".to_string()));
        assert_eq!(Intensity::from("high"), Intensity::High);
    }

    #[test]
    fn test_legacy_polarity_spellings() {
        assert!(Polarity::from("positive").is_present_like());
        assert!(Polarity::from("negative").is_absent_like());
        assert!(Polarity::from("uncertain").is_uncertain_like());
        assert!(!Polarity::Unknown.is_present_like());
    }

    #[test]
    fn test_item_from_non_object_is_empty() {
        let item = ExtractedItem::from_value(&json!("headache"));
        assert_eq!(item, ExtractedItem::default());
    }

    #[test]
    fn test_item_from_value_keeps_mistyped_fields() {
        let item = ExtractedItem::from_value(&json!({
            "domain": 7,
            "item_name": "headache",
            "polarity": "present",
            "intensity": null,
            "evidence_span": "had a headache"
        }));

        assert_eq!(item.domain, Some(Domain::Invalid("7".to_string())));
        assert_eq!(item.polarity, Some(Polarity::Present));
        assert_eq!(item.intensity, None);
        assert_eq!(item.effective_intensity(), Intensity::Unknown);
    }

    #[test]
    fn test_record_without_journal_id_is_malformed() {
        let err = ParserOutputRecord::from_value(3, &json!({"items": [{}, {}]})).unwrap_err();
        assert_eq!(err.line, 3);
        assert_eq!(err.item_count, 2);
        assert_eq!(err.failing_units(), 2);
    }

    #[test]
    fn test_record_with_scalar_items_is_malformed() {
        let err =
            ParserOutputRecord::from_value(1, &json!({"journal_id": "j1", "items": "x"}))
                .unwrap_err();
        assert_eq!(err.journal_id.as_deref(), Some("j1"));
        assert_eq!(err.failing_units(), 1);
    }

    #[test]
    fn test_duplicate_records_are_filed_as_malformed() {
        let record = ParserOutputRecord {
            journal_id: "j1".to_string(),
            items: vec![ExtractedItem::default()],
        };
        let set = ParserOutputSet::from_records("day1", vec![record.clone(), record]);

        assert_eq!(set.records.len(), 1);
        assert_eq!(set.malformed.len(), 1);
    }

    #[test]
    fn test_item_serializes_raw_vocabulary() {
        let item =
            ExtractedItem::new(Domain::Invalid("sleep".into()), "nap", Polarity::Present, "napped");
        let value = serde_json::to_value(&item).unwrap();
        assert_eq!(value["domain"], "sleep");
        assert_eq!(value["polarity"], "present");
        assert!(value.get("intensity").is_none());
    }

    #[test]
    fn test_severity_ordering() {
        assert!(DriftSeverity::None < DriftSeverity::Minor);
        assert!(DriftSeverity::Moderate < DriftSeverity::Severe);
        assert_eq!(DriftSeverity::Moderate.recommended_action(), Action::HumanReview);
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(Action::Deploy.exit_code(), 0);
        assert_eq!(Action::HumanReview.exit_code(), 1);
        assert_eq!(Action::Rollback.exit_code(), 2);
    }

    #[test]
    fn test_percentage() {
        assert_eq!(percentage(2, 3, 0.0), 66.67);
        assert_eq!(percentage(0, 0, 100.0), 100.0);
    }

    #[test]
    fn test_shares_compare_exact_ratios() {
        // 20000 of 20001 rounds to 100.0 but is not 100%
        assert_eq!(percentage(20_000, 20_001, 100.0), 100.0);
        assert!(!share_at_least(20_000, 20_001, 100.0));
        assert!(share_at_least(20_001, 20_001, 100.0));

        assert!(!share_at_least(94_996, 100_000, 95.0));
        assert!(share_at_least(95, 100, 95.0));
        assert!(!share_at_most(5_004, 100_000, 5.0));
        assert!(share_at_most(5, 100, 5.0));

        assert!(share_at_least(0, 0, 100.0));
        assert!(share_at_most(0, 0, 0.0));
    }

    #[test]
    fn test_status_plausibility_allows_rounding_only() {
        let check = |status, observed_value, threshold| CheckResult {
            name: "check".to_string(),
            status,
            observed_value,
            threshold,
            detail: String::new(),
            samples: Vec::new(),
        };

        assert!(check(CheckStatus::Fail, 100.0, 100.0).status_is_plausible(Bound::AtLeast));
        assert!(check(CheckStatus::Pass, 100.0, 100.0).status_is_plausible(Bound::AtLeast));
        assert!(!check(CheckStatus::Pass, 94.99, 95.0).status_is_plausible(Bound::AtLeast));
        assert!(!check(CheckStatus::Fail, 96.0, 95.0).status_is_plausible(Bound::AtLeast));
        assert!(!check(CheckStatus::Pass, 3.0, 0.0).status_is_plausible(Bound::AtMost));
        assert!(!check(CheckStatus::Fail, 0.0, 1.0).status_is_plausible(Bound::AtMost));
        assert!(!check(CheckStatus::Pass, f64::NAN, 0.0).status_is_plausible(Bound::AtMost));
    }
}
