//! Partial and canonical records.
//!
//! Every adapter emits a [`PartialRecord`]: a sparse map of canonical field
//! names to typed values, tagged with the producing source and its declared
//! confidence. The merger folds partial records into one [`CanonicalRecord`].

use serde::Serialize;
use std::collections::BTreeMap;

/// Canonical field names shared by all adapters
pub mod fields {
    // Compounds
    pub const CID: &str = "cid";
    pub const IUPAC_NAME: &str = "iupac_name";
    pub const MOLECULAR_FORMULA: &str = "molecular_formula";
    pub const MOLECULAR_WEIGHT: &str = "molecular_weight";
    pub const SMILES: &str = "smiles";
    pub const INCHI: &str = "inchi";
    pub const INCHI_KEY: &str = "inchi_key";
    pub const SYNONYMS: &str = "synonyms";
    pub const IMAGE_URL: &str = "image_url";
    pub const XLOGP: &str = "xlogp";
    pub const TPSA: &str = "tpsa";
    pub const COMPLEXITY: &str = "complexity";
    pub const CHARGE: &str = "charge";
    pub const HEAVY_ATOM_COUNT: &str = "heavy_atom_count";

    // Papers
    pub const PAPER_ID: &str = "paper_id";
    pub const DOI: &str = "doi";
    pub const PMID: &str = "pmid";
    pub const OPENALEX_ID: &str = "openalex_id";
    pub const TITLE: &str = "title";
    pub const ABSTRACT: &str = "abstract";
    pub const AUTHORS: &str = "authors";
    pub const VENUE: &str = "venue";
    pub const YEAR: &str = "year";
    pub const PUBLICATION_DATE: &str = "publication_date";
    pub const URL: &str = "url";
    pub const CITATION_COUNT: &str = "citation_count";
    pub const OPEN_ACCESS_PDF: &str = "open_access_pdf";
    pub const FIELDS_OF_STUDY: &str = "fields_of_study";
}

/// A typed field value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// Scalar identifier; the first source to set it owns it
    Id(String),
    Text(String),
    Number(f64),
    Integer(i64),
    /// String array, unioned across sources
    List(Vec<String>),
}

impl FieldValue {
    pub fn is_identifier(&self) -> bool {
        matches!(self, FieldValue::Id(_))
    }

    /// String content of `Id` and `Text` values
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Id(s) | FieldValue::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            FieldValue::Number(n) => Some(*n),
            FieldValue::Integer(i) => Some(*i as f64),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            FieldValue::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[String]> {
        match self {
            FieldValue::List(items) => Some(items),
            _ => None,
        }
    }
}

/// One adapter's contribution to a lookup. Never mutated after `build()`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PartialRecord {
    source: String,
    confidence: i32,
    fields: BTreeMap<String, FieldValue>,
}

impl PartialRecord {
    /// Start a record for `source` with the adapter's declared `confidence`
    pub fn builder(source: impl Into<String>, confidence: i32) -> PartialRecordBuilder {
        PartialRecordBuilder {
            record: PartialRecord {
                source: source.into(),
                confidence,
                fields: BTreeMap::new(),
            },
        }
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn confidence(&self) -> i32 {
        self.confidence
    }

    pub fn fields(&self) -> &BTreeMap<String, FieldValue> {
        &self.fields
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Builder for [`PartialRecord`].
///
/// Blank strings, empty lists and `None` values are skipped so adapters can
/// feed provider payloads straight in.
#[derive(Debug, Clone)]
pub struct PartialRecordBuilder {
    record: PartialRecord,
}

impl PartialRecordBuilder {
    pub fn id(self, name: &str, value: Option<impl Into<String>>) -> Self {
        self.string_field(name, value, FieldValue::Id)
    }

    pub fn text(self, name: &str, value: Option<impl Into<String>>) -> Self {
        self.string_field(name, value, FieldValue::Text)
    }

    pub fn number(mut self, name: &str, value: Option<f64>) -> Self {
        if let Some(n) = value.filter(|n| n.is_finite()) {
            self.record
                .fields
                .insert(name.to_string(), FieldValue::Number(n));
        }
        self
    }

    pub fn integer(mut self, name: &str, value: Option<i64>) -> Self {
        if let Some(i) = value {
            self.record
                .fields
                .insert(name.to_string(), FieldValue::Integer(i));
        }
        self
    }

    pub fn list<I, S>(mut self, name: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let items: Vec<String> = values
            .into_iter()
            .map(Into::into)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        if !items.is_empty() {
            self.record
                .fields
                .insert(name.to_string(), FieldValue::List(items));
        }
        self
    }

    /// Insert an already-typed value
    pub fn value(mut self, name: &str, value: FieldValue) -> Self {
        self.record.fields.insert(name.to_string(), value);
        self
    }

    pub fn build(self) -> PartialRecord {
        self.record
    }

    fn string_field(
        mut self,
        name: &str,
        value: Option<impl Into<String>>,
        wrap: fn(String) -> FieldValue,
    ) -> Self {
        if let Some(value) = value {
            let value = value.into().trim().to_string();
            if !value.is_empty() {
                self.record.fields.insert(name.to_string(), wrap(value));
            }
        }
        self
    }
}

/// The merged, caller-visible result of a lookup.
///
/// Only the merger builds these; callers get read-only access.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CanonicalRecord {
    fields: BTreeMap<String, FieldValue>,
    /// Which source supplied each field
    provenance: BTreeMap<String, String>,
    /// Sources that contributed, in merge order
    sources: Vec<String>,
}

impl CanonicalRecord {
    /// An explicit record with no fields
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn fields(&self) -> &BTreeMap<String, FieldValue> {
        &self.fields
    }

    pub fn get(&self, name: &str) -> Option<&FieldValue> {
        self.fields.get(name)
    }

    pub fn text(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(FieldValue::as_str)
    }

    pub fn list(&self, name: &str) -> Option<&[String]> {
        self.get(name).and_then(FieldValue::as_list)
    }

    /// The source whose value stands for `name`
    pub fn source_of(&self, name: &str) -> Option<&str> {
        self.provenance.get(name).map(String::as_str)
    }

    pub fn sources(&self) -> &[String] {
        &self.sources
    }

    pub(crate) fn field_mut(&mut self, name: &str) -> Option<&mut FieldValue> {
        self.fields.get_mut(name)
    }

    pub(crate) fn set(&mut self, name: &str, value: FieldValue, source: &str) {
        self.fields.insert(name.to_string(), value);
        self.provenance.insert(name.to_string(), source.to_string());
    }

    pub(crate) fn add_source(&mut self, source: &str) {
        if !self.sources.iter().any(|s| s == source) {
            self.sources.push(source.to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_skips_blank_values() {
        let record = PartialRecord::builder("pubchem", 5)
            .id(fields::CID, Some("2244"))
            .text(fields::IUPAC_NAME, Some("   "))
            .text(fields::SMILES, None::<String>)
            .number(fields::MOLECULAR_WEIGHT, Some(f64::NAN))
            .list(fields::SYNONYMS, vec!["aspirin", "", " acetylsalicylic acid "])
            .build();

        assert_eq!(record.source(), "pubchem");
        assert_eq!(record.confidence(), 5);
        assert_eq!(record.len(), 2);
        assert_eq!(
            record.get(fields::CID),
            Some(&FieldValue::Id("2244".to_string()))
        );
        assert_eq!(
            record.get(fields::SYNONYMS).and_then(FieldValue::as_list),
            Some(&["aspirin".to_string(), "acetylsalicylic acid".to_string()][..])
        );
    }

    #[test]
    fn test_empty_list_is_skipped() {
        let record = PartialRecord::builder("x", 1)
            .list(fields::AUTHORS, Vec::<String>::new())
            .build();
        assert!(record.is_empty());
    }

    #[test]
    fn test_field_value_serializes_untagged() {
        let value = serde_json::to_value(FieldValue::List(vec!["a".into()])).unwrap();
        assert_eq!(value, serde_json::json!(["a"]));
        let value = serde_json::to_value(FieldValue::Integer(3)).unwrap();
        assert_eq!(value, serde_json::json!(3));
    }
}
