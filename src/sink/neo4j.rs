//! Neo4j graph store over Bolt.

use async_trait::async_trait;
use neo4rs::{query, Graph as BoltGraph, Query};

use super::{Edge, GraphSink};
use crate::error::{Result, WikigraphError};
use crate::models::Person;

/// Required for concurrent MERGEs on the same uri to stay duplicate-free.
const UNIQUE_URI_CONSTRAINT: &str =
    "CREATE CONSTRAINT person_uri_unique IF NOT EXISTS FOR (p:Person) REQUIRE p.uri IS UNIQUE";

/// Lookup speed only; a failure is logged and ignored.
const OPTIONAL_INDEXES: &[&str] =
    &["CREATE INDEX has_relation_type_idx IF NOT EXISTS FOR ()-[r:HAS_RELATION]-() ON (r.type)"];

// One statement per batch; rows are passed as parallel lists.
const MERGE_PERSONS: &str = "UNWIND range(0, size($uris) - 1) AS i \
     MERGE (p:Person {uri: $uris[i]}) SET p.label = $labels[i]";

const MERGE_NODES: &str = "UNWIND $uris AS uri MERGE (p:Person {uri: uri})";

const MERGE_EDGES: &str = "UNWIND range(0, size($source_uris) - 1) AS i \
     MERGE (a:Person {uri: $source_uris[i]}) \
     MERGE (b:Person {uri: $target_uris[i]}) \
     MERGE (a)-[:HAS_RELATION {type: $relation_types[i]}]->(b)";

const COUNT_NODES: &str = "MATCH (p:Person) RETURN count(p) AS n";

const COUNT_EDGES: &str = "MATCH (:Person)-[r:HAS_RELATION]->(:Person) RETURN count(r) AS n";

/// Neo4j sink wrapping a neo4rs connection pool.
///
/// Each call sends one `UNWIND` statement, which runs as a single
/// transaction on one pooled connection.
pub struct Neo4jSink {
    graph: BoltGraph,
}

impl Neo4jSink {
    /// Connect and verify the connection is alive.
    pub async fn connect(uri: &str, user: &str, password: &str) -> Result<Self> {
        log::info!("Connecting to Neo4j at {}", uri);

        let graph = BoltGraph::new(uri, user, password)
            .await
            .map_err(|e| WikigraphError::SinkWrite(format!("Neo4j connection error: {}", e)))?;

        let sink = Self { graph };
        sink.health_check().await?;
        log::info!("Neo4j connection established");
        Ok(sink)
    }

    pub async fn health_check(&self) -> Result<()> {
        self.run(query("RETURN 1")).await
    }

    /// Create the uniqueness constraint and indexes. Safe on every startup.
    ///
    /// Fails when the constraint cannot be created, since concurrent lanes
    /// would otherwise be able to duplicate nodes.
    pub async fn initialize_schema(&self) -> Result<()> {
        self.graph.run(query(UNIQUE_URI_CONSTRAINT)).await.map_err(|e| {
            WikigraphError::SinkWrite(format!("Failed to create uniqueness constraint on :Person(uri): {}", e))
        })?;
        for stmt in OPTIONAL_INDEXES {
            if let Err(e) = self.graph.run(query(stmt)).await {
                log::warn!("Failed to create index ({}): {}", stmt, e);
            }
        }
        Ok(())
    }

    async fn run(&self, q: Query) -> Result<()> {
        self.graph
            .run(q)
            .await
            .map_err(|e| WikigraphError::SinkWrite(format!("Neo4j query error: {}", e)))
    }

    async fn count(&self, cypher: &str) -> Result<u64> {
        let mut stream = self
            .graph
            .execute(query(cypher))
            .await
            .map_err(|e| WikigraphError::SinkWrite(format!("Neo4j query error: {}", e)))?;
        let row = stream
            .next()
            .await
            .map_err(|e| WikigraphError::SinkWrite(format!("Neo4j stream error: {}", e)))?;
        match row {
            Some(row) => count_value(row.get::<i64>("n")),
            None => Ok(0),
        }
    }
}

/// A count that does not decode to a non-negative integer is a failed read.
fn count_value<E: std::fmt::Display>(decoded: std::result::Result<i64, E>) -> Result<u64> {
    let n = decoded.map_err(|e| WikigraphError::SinkWrite(format!("Neo4j count decode error: {}", e)))?;
    u64::try_from(n).map_err(|_| WikigraphError::SinkWrite(format!("Neo4j returned a negative count: {}", n)))
}

fn persons_query(persons: &[Person]) -> Query {
    let uris: Vec<String> = persons.iter().map(|p| p.uri.clone()).collect();
    let labels: Vec<String> = persons.iter().map(|p| p.label.clone()).collect();
    query(MERGE_PERSONS).param("uris", uris).param("labels", labels)
}

fn nodes_query(uris: &[String]) -> Query {
    query(MERGE_NODES).param("uris", uris.to_vec())
}

fn edges_query(edges: &[Edge]) -> Query {
    let sources: Vec<String> = edges.iter().map(|e| e.source_uri.clone()).collect();
    let targets: Vec<String> = edges.iter().map(|e| e.target_uri.clone()).collect();
    let types: Vec<String> = edges.iter().map(|e| e.relation_type.clone()).collect();
    query(MERGE_EDGES)
        .param("source_uris", sources)
        .param("target_uris", targets)
        .param("relation_types", types)
}

#[async_trait]
impl GraphSink for Neo4jSink {
    async fn upsert_persons(&self, persons: &[Person]) -> Result<usize> {
        if persons.is_empty() {
            return Ok(0);
        }
        self.run(persons_query(persons)).await?;
        Ok(persons.len())
    }

    async fn merge_nodes(&self, uris: &[String]) -> Result<usize> {
        if uris.is_empty() {
            return Ok(0);
        }
        self.run(nodes_query(uris)).await?;
        Ok(uris.len())
    }

    async fn merge_edges(&self, edges: &[Edge]) -> Result<usize> {
        if edges.is_empty() {
            return Ok(0);
        }
        self.run(edges_query(edges)).await?;
        Ok(edges.len())
    }

    async fn node_count(&self) -> Result<u64> {
        self.count(COUNT_NODES).await
    }

    async fn edge_count(&self) -> Result<u64> {
        self.count(COUNT_EDGES).await
    }
}
