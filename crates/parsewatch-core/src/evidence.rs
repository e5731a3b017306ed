//! Evidence grounding for extracted items.
//!
//! Every item carries an `evidence_span` that must be traceable to the journal
//! it came from. Grounding puts each item into exactly one bucket, so the
//! evidence-validity and hallucination rates can never double count.

use std::collections::{BTreeMap, HashSet};

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::types::{ExtractedItem, Polarity};

lazy_static! {
    /// Word tokens used for the paraphrase test.
    static ref WORD_PATTERN: Regex = Regex::new(r"\w+").unwrap();
}

/// How well an evidence span is anchored in its source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Grounding {
    /// Normalized evidence occurs verbatim in the normalized journal.
    Grounded,

    /// Not verbatim, but every word of the evidence occurs in the journal.
    /// Counted neither as valid evidence nor as a hallucination.
    Paraphrased,

    /// Missing evidence, unknown source, or words the journal never contains.
    Fabricated,
}

/// Lowercase and collapse whitespace runs to a single space.
pub fn normalize(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

fn tokens(text: &str) -> HashSet<String> {
    WORD_PATTERN
        .find_iter(&text.to_lowercase())
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Classify `evidence` against `journal_text`.
///
/// `journal_text` is `None` when the record references an unknown journal.
pub fn ground(evidence: &str, journal_text: Option<&str>) -> Grounding {
    let evidence = normalize(evidence);
    let Some(text) = journal_text else {
        return Grounding::Fabricated;
    };
    if evidence.is_empty() {
        return Grounding::Fabricated;
    }

    let text = normalize(text);
    if text.contains(&evidence) {
        return Grounding::Grounded;
    }

    let evidence_tokens = tokens(&evidence);
    if evidence_tokens.is_empty() {
        return Grounding::Fabricated;
    }

    let journal_tokens = tokens(&text);
    if evidence_tokens.is_subset(&journal_tokens) {
        Grounding::Paraphrased
    } else {
        Grounding::Fabricated
    }
}

/// Items that share evidence but disagree on presence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contradiction {
    /// Normalized shared evidence
    pub evidence_span: String,

    /// Distinct polarities found in the group, sorted
    pub polarities: Vec<String>,

    /// Number of items in the group
    pub item_count: usize,
}

/// Group `items` by normalized evidence and report contradicting groups.
///
/// Items without evidence never join a group. The result is sorted by
/// evidence, so it does not depend on item order.
pub fn find_contradictions<'a>(
    items: impl IntoIterator<Item = &'a ExtractedItem>,
) -> (Vec<Contradiction>, usize) {
    let mut groups: BTreeMap<String, Vec<Option<&Polarity>>> = BTreeMap::new();

    for item in items {
        let key = normalize(item.evidence());
        if key.is_empty() {
            continue;
        }
        groups.entry(key).or_default().push(item.polarity.as_ref());
    }

    let group_count = groups.len();
    let contradictions = groups
        .into_iter()
        .filter_map(|(evidence_span, polarities)| {
            let present = polarities.iter().flatten().any(|p| p.is_present_like());
            let absent = polarities.iter().flatten().any(|p| p.is_absent_like());
            if !(present && absent) {
                return None;
            }

            let mut distinct: Vec<String> = polarities
                .iter()
                .flatten()
                .map(|p| p.as_str().to_lowercase())
                .collect();
            distinct.sort();
            distinct.dedup();

            Some(Contradiction {
                evidence_span,
                polarities: distinct,
                item_count: polarities.len(),
            })
        })
        .collect();

    (contradictions, group_count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Domain;
    use proptest::prelude::*;

    const JOURNAL: &str = "I had a headache this morning and felt   very tired.\nAte some oatmeal.";

    fn item(evidence: &str, polarity: Polarity) -> ExtractedItem {
        ExtractedItem::new(Domain::Symptom, "x", polarity, evidence)
    }

    #[test]
    fn test_normalize() {
        assert_eq!(normalize("  Felt\n VERY\ttired "), "felt very tired");
    }

    #[test]
    fn test_verbatim_evidence_is_grounded() {
        assert_eq!(ground("HAD A HEADACHE", Some(JOURNAL)), Grounding::Grounded);
        assert_eq!(ground("felt very tired", Some(JOURNAL)), Grounding::Grounded);
    }

    #[test]
    fn test_reordered_words_are_paraphrased() {
        assert_eq!(ground("tired felt", Some(JOURNAL)), Grounding::Paraphrased);
    }

    #[test]
    fn test_invented_words_are_fabricated() {
        assert_eq!(
            ground("scrambled eggs for breakfast", Some(JOURNAL)),
            Grounding::Fabricated
        );
    }

    #[test]
    fn test_missing_evidence_or_journal_is_fabricated() {
        assert_eq!(ground("", Some(JOURNAL)), Grounding::Fabricated);
        assert_eq!(ground("   ", Some(JOURNAL)), Grounding::Fabricated);
        assert_eq!(ground("had a headache", None), Grounding::Fabricated);
    }

    #[test]
    fn test_contradiction_is_case_insensitive() {
        let items = vec![
            item("had a headache", Polarity::Present),
            item("HAD A HEADACHE", Polarity::Absent),
        ];
        let (found, groups) = find_contradictions(&items);

        assert_eq!(groups, 1);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].polarities, vec!["absent", "present"]);
    }

    #[test]
    fn test_unknown_does_not_contradict() {
        let items = vec![
            item("had a headache", Polarity::Present),
            item("had a headache", Polarity::Unknown),
        ];
        assert!(find_contradictions(&items).0.is_empty());
    }

    #[test]
    fn test_legacy_spellings_contradict() {
        let items = vec![
            item("felt tired", Polarity::from("positive")),
            item("felt tired", Polarity::from("negative")),
        ];
        assert_eq!(find_contradictions(&items).0.len(), 1);
    }

    #[test]
    fn test_empty_evidence_is_ignored() {
        let items = vec![item("", Polarity::Present), item("", Polarity::Absent)];
        let (found, groups) = find_contradictions(&items);
        assert!(found.is_empty());
        assert_eq!(groups, 0);
    }

    proptest! {
        #[test]
        fn contradictions_do_not_depend_on_order(
            picks in proptest::collection::vec((0usize..3, 0usize..3), 0..12),
            rotate in 0usize..12,
        ) {
            let spans = ["had a headache", "HAD A  headache", "ate oatmeal"];
            let polarities = [Polarity::Present, Polarity::Absent, Polarity::Unknown];
            let items: Vec<ExtractedItem> = picks
                .iter()
                .map(|(s, p)| item(spans[*s], polarities[*p].clone()))
                .collect();

            let mut shuffled = items.clone();
            shuffled.reverse();
            if !shuffled.is_empty() {
                let k = rotate % shuffled.len();
                shuffled.rotate_left(k);
            }

            prop_assert_eq!(find_contradictions(&items), find_contradictions(&shuffled));
        }

        #[test]
        fn grounding_of_a_journal_slice_is_grounded(start in 0usize..20, len in 1usize..20) {
            let text = "Slept well last night. Had coffee and toast.";
            let end = (start + len).min(text.len());
            let slice = &text[start..end];
            prop_assume!(!slice.trim().is_empty());
            prop_assert_eq!(ground(slice, Some(text)), Grounding::Grounded);
        }
    }
}
