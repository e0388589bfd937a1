//! Merge partial records into one canonical record.
//!
//! Records are folded in the order given (completion order). For each field:
//! - the first writer wins, unless a later record has strictly higher confidence
//! - identifiers are never overwritten once set; a differing later value is logged
//! - lists are unioned, keeping first-seen order and dropping case-insensitive duplicates
//! - a value of a different type than the held one follows the confidence rule

use std::collections::{HashMap, HashSet};

use crate::models::{CanonicalRecord, FieldValue, PartialRecord};

/// Merging nothing. Carries the explicit empty record.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("no partial records to merge")]
pub struct EmptyMerge {
    pub record: CanonicalRecord,
}

pub fn merge(partials: &[PartialRecord]) -> Result<CanonicalRecord, EmptyMerge> {
    if partials.is_empty() {
        return Err(EmptyMerge {
            record: CanonicalRecord::empty(),
        });
    }

    let mut record = CanonicalRecord::empty();
    // Confidence of the source currently holding each field
    let mut held: HashMap<&str, i32> = HashMap::new();

    for partial in partials {
        record.add_source(partial.source());
        let incoming = partial.confidence();

        for (name, value) in partial.fields() {
            let step = match (record.get(name), value) {
                (None, _) => Step::Insert,
                (Some(FieldValue::List(existing)), FieldValue::List(items)) => {
                    Step::Union(dedup(existing.iter().chain(items.iter())))
                }
                (Some(FieldValue::Id(current)), FieldValue::Id(new)) => {
                    if current != new {
                        tracing::warn!(
                            "Identifier conflict on '{}': keeping {:?} from {}, ignoring {:?} from {}",
                            name,
                            current,
                            record.source_of(name).unwrap_or("?"),
                            new,
                            partial.source()
                        );
                    }
                    Step::Keep
                }
                (Some(FieldValue::Id(_)), _) => Step::Keep,
                (Some(_), _) => {
                    let current = held.get(name.as_str()).copied().unwrap_or(i32::MIN);
                    if incoming > current {
                        Step::Insert
                    } else {
                        Step::Keep
                    }
                }
            };

            match step {
                Step::Insert => {
                    let value = match value {
                        FieldValue::List(items) => FieldValue::List(dedup(items.iter())),
                        other => other.clone(),
                    };
                    record.set(name, value, partial.source());
                    held.insert(name.as_str(), incoming);
                }
                Step::Union(items) => {
                    if let Some(slot) = record.field_mut(name) {
                        *slot = FieldValue::List(items);
                    }
                }
                Step::Keep => {}
            }
        }
    }

    Ok(record)
}

/// What to do with one incoming field
enum Step {
    Insert,
    Union(Vec<String>),
    Keep,
}

fn dedup<'a>(items: impl Iterator<Item = &'a String>) -> Vec<String> {
    let mut seen = HashSet::new();
    items
        .filter(|item| seen.insert(item.to_lowercase()))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fields;

    fn partial(source: &str, confidence: i32) -> crate::models::PartialRecordBuilder {
        PartialRecord::builder(source, confidence)
    }

    #[test]
    fn test_higher_confidence_overwrites_scalar() {
        let records = vec![
            partial("openalex", 2).text(fields::TITLE, Some("Deep Learning")).build(),
            partial("crossref", 4).text(fields::TITLE, Some("Deep learning")).build(),
        ];

        let merged = merge(&records).unwrap();
        assert_eq!(merged.text(fields::TITLE), Some("Deep learning"));
        assert_eq!(merged.source_of(fields::TITLE), Some("crossref"));
        assert_eq!(merged.sources(), &["openalex".to_string(), "crossref".to_string()]);
    }

    #[test]
    fn test_equal_confidence_keeps_first_writer() {
        let records = vec![
            partial("a", 3).text(fields::VENUE, Some("Nature")).build(),
            partial("b", 3).text(fields::VENUE, Some("Nat.")).build(),
        ];

        let merged = merge(&records).unwrap();
        assert_eq!(merged.text(fields::VENUE), Some("Nature"));
        assert_eq!(merged.source_of(fields::VENUE), Some("a"));
    }

    #[test]
    fn test_lower_confidence_fills_gaps_only() {
        let records = vec![
            partial("pubchem", 5).text(fields::SMILES, Some("CCO")).build(),
            partial("other", 1)
                .text(fields::SMILES, Some("OCC"))
                .text(fields::MOLECULAR_FORMULA, Some("C2H6O"))
                .build(),
        ];

        let merged = merge(&records).unwrap();
        assert_eq!(merged.text(fields::SMILES), Some("CCO"));
        assert_eq!(merged.text(fields::MOLECULAR_FORMULA), Some("C2H6O"));
    }

    #[test]
    fn test_identifier_is_never_overwritten() {
        let records = vec![
            partial("low", 1).id(fields::DOI, Some("10.1/a")).build(),
            partial("high", 9).id(fields::DOI, Some("10.1/b")).build(),
        ];

        let merged = merge(&records).unwrap();
        assert_eq!(merged.text(fields::DOI), Some("10.1/a"));
        assert_eq!(merged.source_of(fields::DOI), Some("low"));
    }

    #[test]
    fn test_lists_are_unioned() {
        let records = vec![
            partial("x", 1).list(fields::SYNONYMS, vec!["a", "b"]).build(),
            partial("y", 5).list(fields::SYNONYMS, vec!["B", "c"]).build(),
        ];

        let merged = merge(&records).unwrap();
        assert_eq!(
            merged.list(fields::SYNONYMS),
            Some(&["a".to_string(), "b".to_string(), "c".to_string()][..])
        );
    }

    #[test]
    fn test_list_holder_keeps_field_against_equal_confidence_scalar() {
        let records = vec![
            partial("a", 1).list(fields::AUTHORS, vec!["x", "y"]).build(),
            partial("b", 1).text(fields::AUTHORS, Some("z")).build(),
            partial("c", 0).text(fields::AUTHORS, Some("w")).build(),
        ];

        let merged = merge(&records).unwrap();
        assert_eq!(
            merged.list(fields::AUTHORS),
            Some(&["x".to_string(), "y".to_string()][..])
        );
        assert_eq!(merged.source_of(fields::AUTHORS), Some("a"));
    }

    #[test]
    fn test_higher_confidence_scalar_replaces_list() {
        let records = vec![
            partial("a", 1).list(fields::AUTHORS, vec!["x"]).build(),
            partial("b", 4).text(fields::AUTHORS, Some("z")).build(),
        ];

        let merged = merge(&records).unwrap();
        assert_eq!(merged.text(fields::AUTHORS), Some("z"));
        assert_eq!(merged.source_of(fields::AUTHORS), Some("b"));
    }

    #[test]
    fn test_merge_is_deterministic_for_fixed_order() {
        let records = vec![
            partial("a", 2).text(fields::TITLE, Some("one")).build(),
            partial("b", 2).text(fields::TITLE, Some("two")).build(),
        ];
        assert_eq!(merge(&records).unwrap(), merge(&records).unwrap());

        let reversed: Vec<_> = records.iter().rev().cloned().collect();
        assert_eq!(merge(&reversed).unwrap().text(fields::TITLE), Some("two"));
    }

    #[test]
    fn test_empty_input() {
        let err = merge(&[]).unwrap_err();
        assert!(err.record.is_empty());
    }
}
