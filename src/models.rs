//! Entity shapes and the mapping from raw SPARQL bindings.
//!
//! Endpoint rows are decoded once at the boundary; nothing past
//! [`map_records`] sees a loosely typed row.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{Result, WikigraphError};

/// One value cell of a SPARQL JSON result row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingValue {
    pub value: String,
    /// `uri`, `literal` or `bnode`
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(rename = "xml:lang", default, skip_serializing_if = "Option::is_none")]
    pub lang: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datatype: Option<String>,
}

impl BindingValue {
    pub fn uri(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            kind: "uri".to_string(),
            lang: None,
            datatype: None,
        }
    }

    pub fn literal(value: impl Into<String>, lang: &str) -> Self {
        Self {
            value: value.into(),
            kind: "literal".to_string(),
            lang: Some(lang.to_string()),
            datatype: None,
        }
    }
}

/// A result row: variable name -> value.
pub type RawRecord = HashMap<String, BindingValue>;

/// A person of the crawled cohort.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Person {
    pub uri: String,
    pub label: String,
}

/// A directed, typed link from one person to another.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relationship {
    pub person_uri: String,
    pub person_label: String,
    pub related_person_uri: String,
    pub related_person_label: String,
    /// Bare property code, e.g. `P22`.
    pub relation_type: String,
}

/// An entity that can be built from one result row.
pub trait FromRecord: Sized {
    /// Name used in error messages.
    const SHAPE: &'static str;

    fn from_record(record: &RawRecord) -> Result<Self>;
}

impl FromRecord for Person {
    const SHAPE: &'static str = "Person";

    fn from_record(record: &RawRecord) -> Result<Self> {
        Ok(Person {
            uri: field::<Self>(record, "person")?,
            label: field::<Self>(record, "personLabel")?,
        })
    }
}

impl FromRecord for Relationship {
    const SHAPE: &'static str = "Relationship";

    fn from_record(record: &RawRecord) -> Result<Self> {
        let relationship = field::<Self>(record, "relationship")?;
        Ok(Relationship {
            person_uri: field::<Self>(record, "person")?,
            person_label: field::<Self>(record, "personLabel")?,
            related_person_uri: field::<Self>(record, "related_person")?,
            related_person_label: field::<Self>(record, "related_personLabel")?,
            relation_type: relation_code(&relationship).ok_or_else(|| {
                WikigraphError::MalformedRecord(format!(
                    "Relationship: cannot read a property code from {:?}",
                    relationship
                ))
            })?,
        })
    }
}

fn field<T: FromRecord>(record: &RawRecord, name: &str) -> Result<String> {
    match record.get(name) {
        Some(binding) if !binding.value.is_empty() => Ok(binding.value.clone()),
        Some(_) => Err(WikigraphError::MalformedRecord(format!(
            "{}: field {} is empty",
            T::SHAPE,
            name
        ))),
        None => Err(WikigraphError::MalformedRecord(format!(
            "{}: missing field {}",
            T::SHAPE,
            name
        ))),
    }
}

/// Last path segment of a property IRI (`.../prop/direct/P22` -> `P22`).
/// Bare codes pass through.
pub fn relation_code(value: &str) -> Option<String> {
    let code = value.rsplit(|c: char| c == '/' || c == '#' || c == ':').next()?;
    let valid = code.len() > 1
        && code.starts_with('P')
        && code[1..].chars().all(|c| c.is_ascii_digit());
    valid.then(|| code.to_string())
}

/// Map a whole page of rows. One bad row fails the page; no partial output.
pub fn map_records<T: FromRecord>(records: &[RawRecord]) -> Result<Vec<T>> {
    records
        .iter()
        .enumerate()
        .map(|(i, record)| {
            T::from_record(record).map_err(|e| match e {
                WikigraphError::MalformedRecord(msg) => {
                    WikigraphError::MalformedRecord(format!("row {}: {}", i, msg))
                }
                other => other,
            })
        })
        .collect()
}
