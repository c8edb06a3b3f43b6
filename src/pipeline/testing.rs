//! Scripted in-memory fact source for pipeline tests.

use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;

use crate::error::{Result, WikigraphError};
use crate::models::{BindingValue, RawRecord};
use crate::sparql::FactSource;

const ENTITY: &str = "http://www.wikidata.org/entity/";
const PROP: &str = "http://www.wikidata.org/prop/direct/";

/// Injected outcome for the next `execute` call.
#[derive(Debug, Clone, Copy)]
pub enum SourceEvent {
    /// Answer from the dataset as usual.
    Answer,
    Transient,
    Rejected,
}

#[derive(Debug, Clone)]
struct Fact {
    from: String,
    to: String,
    kind: String,
}

/// Answers persons and relationships queries from a fixed dataset, paging
/// by the query's OFFSET/LIMIT and filtering by its VALUES clauses.
#[derive(Default)]
pub struct ScriptedSource {
    persons: Vec<(String, String)>,
    facts: Vec<Fact>,
    unlabelled: HashSet<String>,
    fail_offset: Option<i64>,
    ignore_allowlist: bool,
    script: Mutex<VecDeque<SourceEvent>>,
    queries: Mutex<Vec<String>>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn person(mut self, id: &str, label: &str) -> Self {
        self.persons.push((id.to_string(), label.to_string()));
        self
    }

    pub fn relationship(mut self, from: &str, to: &str, kind: &str) -> Self {
        self.facts.push(Fact {
            from: from.to_string(),
            to: to.to_string(),
            kind: kind.to_string(),
        });
        self
    }

    /// Emit `id`'s persons row without `personLabel`.
    pub fn without_label(mut self, id: &str) -> Self {
        self.unlabelled.insert(id.to_string());
        self
    }

    /// Persons queries at `offset` always fail transiently.
    pub fn fail_offset(mut self, offset: i64) -> Self {
        self.fail_offset = Some(offset);
        self
    }

    /// Return facts of any type, ignoring `VALUES ?relationship`.
    pub fn ignore_allowlist(mut self) -> Self {
        self.ignore_allowlist = true;
        self
    }

    pub fn script(self, events: Vec<SourceEvent>) -> Self {
        *self.script.lock().unwrap() = events.into();
        self
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }

    pub fn is_relationships_query(query: &str) -> bool {
        query.contains("VALUES ?person")
    }

    pub fn offset_of(query: &str) -> i64 {
        number_after(query, "OFFSET ")
    }

    fn label_of(&self, id: &str) -> String {
        self.persons
            .iter()
            .find(|(p, _)| p == id)
            .map(|(_, label)| label.clone())
            .unwrap_or_else(|| id.to_string())
    }

    fn persons_page(&self, offset: usize, limit: usize) -> Vec<RawRecord> {
        self.persons
            .iter()
            .skip(offset)
            .take(limit)
            .map(|(id, label)| {
                let mut row = RawRecord::new();
                row.insert("person".into(), BindingValue::uri(format!("{}{}", ENTITY, id)));
                if !self.unlabelled.contains(id) {
                    row.insert("personLabel".into(), BindingValue::literal(label.clone(), "en"));
                }
                row
            })
            .collect()
    }

    fn relationships_page(&self, query: &str, offset: usize, limit: usize) -> Vec<RawRecord> {
        let subjects = values_of(query, "VALUES ?person {", "wd:");
        let types = values_of(query, "VALUES ?relationship {", "wdt:");
        self.facts
            .iter()
            .filter(|f| subjects.contains(&f.from))
            .filter(|f| self.ignore_allowlist || types.contains(&f.kind))
            .skip(offset)
            .take(limit)
            .map(|f| {
                let mut row = RawRecord::new();
                row.insert("person".into(), BindingValue::uri(format!("{}{}", ENTITY, f.from)));
                row.insert("personLabel".into(), BindingValue::literal(self.label_of(&f.from), "en"));
                row.insert("relationship".into(), BindingValue::uri(format!("{}{}", PROP, f.kind)));
                row.insert("related_person".into(), BindingValue::uri(format!("{}{}", ENTITY, f.to)));
                row.insert(
                    "related_personLabel".into(),
                    BindingValue::literal(self.label_of(&f.to), "en"),
                );
                row
            })
            .collect()
    }
}

#[async_trait]
impl FactSource for ScriptedSource {
    async fn execute(&self, query: &str) -> Result<Vec<RawRecord>> {
        self.queries.lock().unwrap().push(query.to_string());

        let event = self.script.lock().unwrap().pop_front();
        match event {
            Some(SourceEvent::Transient) => {
                return Err(WikigraphError::FactSourceTransient("HTTP 503".into()))
            }
            Some(SourceEvent::Rejected) => {
                return Err(WikigraphError::FactSourceQuery("HTTP 400".into()))
            }
            Some(SourceEvent::Answer) | None => {}
        }

        let offset = Self::offset_of(query);
        let limit = number_after(query, "LIMIT ") as usize;
        if Self::is_relationships_query(query) {
            Ok(self.relationships_page(query, offset as usize, limit))
        } else if self.fail_offset == Some(offset) {
            Err(WikigraphError::FactSourceTransient("HTTP 429".into()))
        } else {
            Ok(self.persons_page(offset as usize, limit))
        }
    }
}

fn number_after(query: &str, marker: &str) -> i64 {
    query
        .split(marker)
        .nth(1)
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|n| n.parse().ok())
        .unwrap()
}

/// Ids inside `marker ... }` with `prefix` stripped.
fn values_of(query: &str, marker: &str, prefix: &str) -> HashSet<String> {
    query
        .split(marker)
        .nth(1)
        .and_then(|rest| rest.split('}').next())
        .map(|body| {
            body.split_whitespace()
                .filter_map(|v| v.strip_prefix(prefix))
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}
