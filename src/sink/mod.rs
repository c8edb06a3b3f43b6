//! Graph sink: idempotent merges of Person nodes and HAS_RELATION edges.
//!
//! Every operation is a merge keyed by URI (nodes) or by
//! `(source_uri, target_uri, relation_type)` (edges), so replaying a page, or
//! two lanes writing the same page concurrently, never duplicates anything.
//! A failed call is reported as [`WikigraphError::SinkWrite`]. Whatever it
//! already merged stays in place and is merged again on retry.

mod neo4j;
mod sqlite;

pub use neo4j::Neo4jSink;
pub use sqlite::SqliteSink;

use async_trait::async_trait;
use std::sync::Arc;

use crate::config::{Config, SinkBackend};
use crate::error::{Result, WikigraphError};
use crate::graph::Graph;
use crate::models::{Person, Relationship};

/// A directed typed edge between two node keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Edge {
    pub source_uri: String,
    pub target_uri: String,
    pub relation_type: String,
}

impl From<&Relationship> for Edge {
    fn from(rel: &Relationship) -> Self {
        Self {
            source_uri: rel.person_uri.clone(),
            target_uri: rel.related_person_uri.clone(),
            relation_type: rel.relation_type.clone(),
        }
    }
}

/// Counts reported by a sink write.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteSummary {
    pub nodes: usize,
    pub edges: usize,
}

#[async_trait]
pub trait GraphSink: Send + Sync {
    /// Merge a node per person keyed by `uri`, overwriting `label`.
    async fn upsert_persons(&self, persons: &[Person]) -> Result<usize>;

    /// Merge label-less nodes by `uri`; existing nodes are left untouched.
    async fn merge_nodes(&self, uris: &[String]) -> Result<usize>;

    /// Merge both endpoints by `uri`, then one edge per `(source, target, type)`.
    async fn merge_edges(&self, edges: &[Edge]) -> Result<usize>;

    async fn node_count(&self) -> Result<u64>;

    async fn edge_count(&self) -> Result<u64>;

    /// Merge the relationships of a page as typed edges.
    async fn upsert_relationships(&self, relationships: &[Relationship]) -> Result<usize> {
        let edges: Vec<Edge> = relationships.iter().map(Edge::from).collect();
        self.merge_edges(&edges).await
    }

    /// Merge a transformed page: labelled persons, placeholders, then edges.
    async fn write_graph(&self, graph: &Graph) -> Result<WriteSummary> {
        let persons: Vec<Person> = graph
            .entries()
            .filter_map(|e| e.attributes.clone())
            .collect();
        let placeholders: Vec<String> = graph
            .entries()
            .filter(|e| e.is_placeholder())
            .map(|e| e.uri.clone())
            .collect();
        let edges: Vec<Edge> = graph
            .edges()
            .map(|(src, r)| Edge {
                source_uri: src.to_string(),
                target_uri: r.related_person_uri.clone(),
                relation_type: r.relation_type.clone(),
            })
            .collect();

        let mut summary = WriteSummary::default();
        summary.nodes += self.upsert_persons(&persons).await?;
        summary.nodes += self.merge_nodes(&placeholders).await?;
        summary.edges += self.merge_edges(&edges).await?;
        Ok(summary)
    }
}

/// Open the sink selected by `sink.backend` and make sure its schema exists.
pub async fn connect(config: &Config) -> Result<Arc<dyn GraphSink>> {
    match config.sink.backend {
        SinkBackend::Neo4j => {
            let password = config
                .neo4j_password()
                .map_err(|e| WikigraphError::Config(e.to_string()))?;
            let sink = Neo4jSink::connect(&config.sink.neo4j_uri, &config.sink.neo4j_user, &password).await?;
            sink.initialize_schema().await?;
            Ok(Arc::new(sink))
        }
        SinkBackend::Sqlite => {
            let sink = SqliteSink::open(&config.sink.sqlite_path).await?;
            Ok(Arc::new(sink))
        }
    }
}
