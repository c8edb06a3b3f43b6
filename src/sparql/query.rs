//! SPARQL rendering for the persons and relationships pages.

use regex::Regex;
use std::sync::OnceLock;

use crate::config::SourceConfig;
use crate::error::{Result, WikigraphError};

const PREFIXES: &str = "PREFIX wd: <http://www.wikidata.org/entity/>
PREFIX wdt: <http://www.wikidata.org/prop/direct/>
PREFIX rdfs: <http://www.w3.org/2000/01/rdf-schema#>";

fn entity_id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^Q[1-9]\d*$").expect("static regex"))
}

fn property_id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^P[1-9]\d*$").expect("static regex"))
}

/// `Q<n>` with no leading zero.
pub fn is_entity_id(id: &str) -> bool {
    entity_id_regex().is_match(id)
}

/// `P<n>` with no leading zero.
pub fn is_property_id(code: &str) -> bool {
    property_id_regex().is_match(code)
}

/// Renders the paged persons/relationships queries for one cohort.
#[derive(Debug, Clone)]
pub struct QueryBuilder {
    language: String,
    cohort_property: String,
    cohort_value: String,
}

impl QueryBuilder {
    pub fn new(
        language: impl Into<String>,
        cohort_property: impl Into<String>,
        cohort_value: impl Into<String>,
    ) -> Self {
        Self {
            language: language.into(),
            cohort_property: cohort_property.into(),
            cohort_value: cohort_value.into(),
        }
    }

    pub fn from_config(source: &SourceConfig) -> Self {
        Self::new(
            source.language.clone(),
            source.cohort_property.clone(),
            source.cohort_value.clone(),
        )
    }

    /// Persons `offset..offset+limit` of the cohort, in the endpoint's natural order.
    pub fn build_persons_query(&self, offset: i64, limit: i64) -> Result<String> {
        check_pagination(offset, limit)?;
        Ok(format!(
            "{prefixes}

SELECT ?person ?personLabel
WHERE {{
  ?person wdt:P31/wdt:P279* wd:Q5 .
  ?person wdt:{prop} wd:{value} .
  ?person rdfs:label ?personLabel .
  FILTER (LANG(?personLabel) = \"{lang}\").
}}
OFFSET {offset}
LIMIT {limit}
",
            prefixes = PREFIXES,
            prop = self.cohort_property,
            value = self.cohort_value,
            lang = self.language,
            offset = offset,
            limit = limit,
        ))
    }

    /// Relationships whose subject is one of `person_uris` and whose property is in
    /// `relation_types`, paged with the same offset/limit contract.
    pub fn build_relationships_query(
        &self,
        offset: i64,
        limit: i64,
        person_uris: &[String],
        relation_types: &[String],
    ) -> Result<String> {
        check_pagination(offset, limit)?;
        let persons = persons_clause(person_uris)?;
        let relationships = relationships_clause(relation_types)?;
        Ok(format!(
            "{prefixes}

SELECT ?person ?personLabel ?related_person ?related_personLabel ?relationship
WHERE {{
  VALUES ?person {{{persons}}}
  ?person wdt:P31/wdt:P279* wd:Q5 .
  ?person rdfs:label ?personLabel .
  FILTER (LANG(?personLabel) = \"{lang}\").

  VALUES ?relationship {{{relationships}}}
  ?person ?relationship ?related_person .
  ?related_person wdt:P31/wdt:P279* wd:Q5 .
  ?related_person rdfs:label ?related_personLabel .
  FILTER (LANG(?related_personLabel) = \"{lang}\").
}}
OFFSET {offset}
LIMIT {limit}
",
            prefixes = PREFIXES,
            persons = persons,
            relationships = relationships,
            lang = self.language,
            offset = offset,
            limit = limit,
        ))
    }
}

fn check_pagination(offset: i64, limit: i64) -> Result<()> {
    if offset < 0 {
        return Err(WikigraphError::InvalidPagination(format!(
            "offset must be >= 0, got {}",
            offset
        )));
    }
    if limit <= 0 {
        return Err(WikigraphError::InvalidPagination(format!(
            "limit must be > 0, got {}",
            limit
        )));
    }
    Ok(())
}

/// `wd:Q1 wd:Q2 ...` from full entity URIs (or bare ids).
pub fn persons_clause(person_uris: &[String]) -> Result<String> {
    if person_uris.is_empty() {
        return Err(WikigraphError::FactSourceQuery(
            "relationships query needs at least one person".to_string(),
        ));
    }
    let ids = person_uris
        .iter()
        .map(|uri| {
            let id = uri.rsplit('/').next().unwrap_or(uri);
            if is_entity_id(id) {
                Ok(format!("wd:{}", id))
            } else {
                Err(WikigraphError::FactSourceQuery(format!(
                    "not a Wikidata entity: {}",
                    uri
                )))
            }
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(ids.join(" "))
}

/// `wdt:P22 wdt:P25 ...` from bare property codes.
pub fn relationships_clause(relation_types: &[String]) -> Result<String> {
    if relation_types.is_empty() {
        return Err(WikigraphError::FactSourceQuery(
            "relationships query needs at least one relation type".to_string(),
        ));
    }
    let props = relation_types
        .iter()
        .map(|code| {
            if is_property_id(code) {
                Ok(format!("wdt:{}", code))
            } else {
                Err(WikigraphError::FactSourceQuery(format!(
                    "not a Wikidata property: {}",
                    code
                )))
            }
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(props.join(" "))
}
