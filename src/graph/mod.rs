//! In-process adjacency view of one page: person URI -> attributes + outgoing relations.
//!
//! Built fresh per page, handed to a [`crate::sink::GraphSink`] and dropped.

use std::collections::HashMap;

use crate::models::{Person, Relationship};

/// An outgoing edge as stored on its owner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphRelation {
    pub relation_type: String,
    pub related_person_uri: String,
}

/// One vertex of the adjacency view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphEntry {
    pub uri: String,
    /// `None` for a placeholder: a URI referenced by an edge but not fetched as a person.
    pub attributes: Option<Person>,
    pub relations: Vec<GraphRelation>,
}

impl GraphEntry {
    fn placeholder(uri: &str) -> Self {
        Self {
            uri: uri.to_string(),
            attributes: None,
            relations: Vec::new(),
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.attributes.is_none()
    }
}

/// Insertion-ordered adjacency map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Graph {
    entries: Vec<GraphEntry>,
    index: HashMap<String, usize>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, uri: &str) -> Option<&GraphEntry> {
        self.index.get(uri).map(|&i| &self.entries[i])
    }

    pub fn contains(&self, uri: &str) -> bool {
        self.index.contains_key(uri)
    }

    /// Entries in insertion order.
    pub fn entries(&self) -> impl Iterator<Item = &GraphEntry> {
        self.entries.iter()
    }

    /// Every edge as `(source_uri, relation)`, owners in insertion order.
    pub fn edges(&self) -> impl Iterator<Item = (&str, &GraphRelation)> {
        self.entries
            .iter()
            .flat_map(|e| e.relations.iter().map(move |r| (e.uri.as_str(), r)))
    }

    pub fn edge_count(&self) -> usize {
        self.entries.iter().map(|e| e.relations.len()).sum()
    }

    /// Insert or refresh a fetched person. A placeholder is promoted in place.
    fn upsert_person(&mut self, person: &Person) {
        match self.index.get(&person.uri) {
            Some(&i) => self.entries[i].attributes = Some(person.clone()),
            None => {
                self.index.insert(person.uri.clone(), self.entries.len());
                self.entries.push(GraphEntry {
                    uri: person.uri.clone(),
                    attributes: Some(person.clone()),
                    relations: Vec::new(),
                });
            }
        }
    }

    fn entry_mut(&mut self, uri: &str) -> &mut GraphEntry {
        let i = match self.index.get(uri) {
            Some(&i) => i,
            None => {
                let i = self.entries.len();
                self.index.insert(uri.to_string(), i);
                self.entries.push(GraphEntry::placeholder(uri));
                i
            }
        };
        &mut self.entries[i]
    }
}

/// Fold a page of persons and relationships into an adjacency view.
///
/// Persons keep their input order. Each relationship is appended to its
/// owner's list in input order. Owners and targets missing from `persons`
/// get placeholder entries, so no edge is dropped.
pub fn build_graph(persons: &[Person], relationships: &[Relationship]) -> Graph {
    let mut graph = Graph::new();

    for person in persons {
        graph.upsert_person(person);
    }

    for rel in relationships {
        graph.entry_mut(&rel.person_uri).relations.push(GraphRelation {
            relation_type: rel.relation_type.clone(),
            related_person_uri: rel.related_person_uri.clone(),
        });
        graph.entry_mut(&rel.related_person_uri);
    }

    graph
}
