//! Embedded SQLite graph store.

use async_trait::async_trait;
use rusqlite::params;
use std::path::Path;

use super::{Edge, GraphSink};
use crate::db::{migrate, Db};
use crate::error::{Result, WikigraphError};
use crate::models::Person;

const UPSERT_PERSON: &str = "INSERT INTO persons (uri, label) VALUES (?1, ?2) \
     ON CONFLICT(uri) DO UPDATE SET label = excluded.label, updated_at = CURRENT_TIMESTAMP";

const MERGE_NODE: &str = "INSERT INTO persons (uri) VALUES (?1) ON CONFLICT(uri) DO NOTHING";

const MERGE_EDGE: &str = "INSERT INTO relations (source_uri, target_uri, relation_type) \
     VALUES (?1, ?2, ?3) ON CONFLICT DO NOTHING";

pub struct SqliteSink {
    db: Db,
}

impl SqliteSink {
    /// Open (creating if needed) the store at `path` and apply migrations.
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = Db::new(path);
        db.with_connection(migrate::run_migrations).await?;
        log::info!("SQLite graph store ready at {}", db.path().display());
        Ok(Self { db })
    }

    /// Label of a node, `None` if absent or a placeholder.
    pub async fn label_of(&self, uri: &str) -> Result<Option<String>> {
        let uri = uri.to_string();
        self.db
            .with_connection(move |conn| {
                let mut stmt = conn.prepare("SELECT label FROM persons WHERE uri = ?1")?;
                let mut rows = stmt.query([&uri])?;
                match rows.next()? {
                    Some(row) => Ok(row.get::<_, Option<String>>(0)?),
                    None => Ok(None),
                }
            })
            .await
    }

    async fn write<F>(&self, what: &'static str, f: F) -> Result<usize>
    where
        F: FnOnce(&mut rusqlite::Connection) -> Result<usize> + Send + 'static,
    {
        self.db
            .with_connection(f)
            .await
            .map_err(|e| WikigraphError::SinkWrite(format!("{}: {}", what, e)))
    }
}

#[async_trait]
impl GraphSink for SqliteSink {
    async fn upsert_persons(&self, persons: &[Person]) -> Result<usize> {
        if persons.is_empty() {
            return Ok(0);
        }
        let persons = persons.to_vec();
        self.write("upsert persons", move |conn| {
            let mut stmt = conn.prepare_cached(UPSERT_PERSON)?;
            for p in &persons {
                stmt.execute(params![p.uri, p.label])?;
            }
            Ok(persons.len())
        })
        .await
    }

    async fn merge_nodes(&self, uris: &[String]) -> Result<usize> {
        if uris.is_empty() {
            return Ok(0);
        }
        let uris = uris.to_vec();
        self.write("merge nodes", move |conn| {
            let mut stmt = conn.prepare_cached(MERGE_NODE)?;
            for uri in &uris {
                stmt.execute(params![uri])?;
            }
            Ok(uris.len())
        })
        .await
    }

    async fn merge_edges(&self, edges: &[Edge]) -> Result<usize> {
        if edges.is_empty() {
            return Ok(0);
        }
        let edges = edges.to_vec();
        self.write("merge edges", move |conn| {
            for e in &edges {
                conn.prepare_cached(MERGE_NODE)?.execute(params![e.source_uri])?;
                conn.prepare_cached(MERGE_NODE)?.execute(params![e.target_uri])?;
                conn.prepare_cached(MERGE_EDGE)?
                    .execute(params![e.source_uri, e.target_uri, e.relation_type])?;
            }
            Ok(edges.len())
        })
        .await
    }

    async fn node_count(&self) -> Result<u64> {
        self.db
            .with_connection(|conn| {
                let n: i64 = conn.query_row("SELECT COUNT(*) FROM persons", [], |row| row.get(0))?;
                Ok(n as u64)
            })
            .await
    }

    async fn edge_count(&self) -> Result<u64> {
        self.db
            .with_connection(|conn| {
                let n: i64 = conn.query_row("SELECT COUNT(*) FROM relations", [], |row| row.get(0))?;
                Ok(n as u64)
            })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::build_graph;
    use crate::models::Relationship;
    use tempfile::TempDir;

    async fn sink(dir: &TempDir) -> SqliteSink {
        SqliteSink::open(dir.path().join("graph.db")).await.unwrap()
    }

    fn person(uri: &str, label: &str) -> Person {
        Person {
            uri: uri.to_string(),
            label: label.to_string(),
        }
    }

    fn rel(from: &str, to: &str, kind: &str) -> Relationship {
        Relationship {
            person_uri: from.to_string(),
            person_label: String::new(),
            related_person_uri: to.to_string(),
            related_person_label: String::new(),
            relation_type: kind.to_string(),
        }
    }

    #[tokio::test]
    async fn test_upsert_persons_idempotent() {
        let dir = TempDir::new().unwrap();
        let sink = sink(&dir).await;
        let persons = vec![person("Q1", "Alice"), person("Q2", "Bob")];

        sink.upsert_persons(&persons).await.unwrap();
        let once = sink.node_count().await.unwrap();
        sink.upsert_persons(&persons).await.unwrap();
        assert_eq!(sink.node_count().await.unwrap(), once);
        assert_eq!(once, 2);
    }

    #[tokio::test]
    async fn test_upsert_refreshes_label() {
        let dir = TempDir::new().unwrap();
        let sink = sink(&dir).await;
        sink.upsert_persons(&[person("Q1", "Alice")]).await.unwrap();
        sink.upsert_persons(&[person("Q1", "Alice Smith")]).await.unwrap();
        assert_eq!(sink.node_count().await.unwrap(), 1);
        assert_eq!(sink.label_of("Q1").await.unwrap().as_deref(), Some("Alice Smith"));
    }

    #[tokio::test]
    async fn test_upsert_relationships_idempotent() {
        let dir = TempDir::new().unwrap();
        let sink = sink(&dir).await;
        let rels = vec![rel("Q1", "Q2", "P22"), rel("Q1", "Q2", "P1038"), rel("Q2", "Q1", "P40")];

        sink.upsert_relationships(&rels).await.unwrap();
        let once = sink.edge_count().await.unwrap();
        sink.upsert_relationships(&rels).await.unwrap();
        assert_eq!(sink.edge_count().await.unwrap(), once);
        // same endpoints, different type or direction -> distinct edges
        assert_eq!(once, 3);
    }

    #[tokio::test]
    async fn test_edge_endpoints_created_without_label() {
        let dir = TempDir::new().unwrap();
        let sink = sink(&dir).await;
        sink.upsert_relationships(&[rel("Q1", "Q99", "P22")]).await.unwrap();
        assert_eq!(sink.node_count().await.unwrap(), 2);
        assert_eq!(sink.label_of("Q99").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_placeholder_never_erases_label() {
        let dir = TempDir::new().unwrap();
        let sink = sink(&dir).await;
        sink.upsert_persons(&[person("Q2", "Bob")]).await.unwrap();
        sink.upsert_relationships(&[rel("Q1", "Q2", "P22")]).await.unwrap();
        sink.merge_nodes(&["Q2".to_string()]).await.unwrap();
        assert_eq!(sink.label_of("Q2").await.unwrap().as_deref(), Some("Bob"));
    }

    #[tokio::test]
    async fn test_placeholder_later_labelled() {
        let dir = TempDir::new().unwrap();
        let sink = sink(&dir).await;
        sink.upsert_relationships(&[rel("Q1", "Q2", "P22")]).await.unwrap();
        sink.upsert_persons(&[person("Q2", "Bob")]).await.unwrap();
        assert_eq!(sink.node_count().await.unwrap(), 2);
        assert_eq!(sink.label_of("Q2").await.unwrap().as_deref(), Some("Bob"));
    }

    #[tokio::test]
    async fn test_write_graph_example() {
        let dir = TempDir::new().unwrap();
        let sink = sink(&dir).await;
        let graph = build_graph(
            &[person("Q1", "Alice"), person("Q2", "Bob")],
            &[rel("Q1", "Q2", "P22")],
        );
        let summary = sink.write_graph(&graph).await.unwrap();
        assert_eq!(summary.edges, 1);
        assert_eq!(sink.node_count().await.unwrap(), 2);
        assert_eq!(sink.edge_count().await.unwrap(), 1);

        sink.write_graph(&graph).await.unwrap();
        assert_eq!(sink.node_count().await.unwrap(), 2);
        assert_eq!(sink.edge_count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_merges_do_not_duplicate() {
        let dir = TempDir::new().unwrap();
        let sink = std::sync::Arc::new(sink(&dir).await);
        let rels: Vec<Relationship> = (0..20).map(|i| rel("Q1", &format!("Q{}", i + 2), "P40")).collect();

        let mut handles = Vec::new();
        for _ in 0..4 {
            let sink = std::sync::Arc::clone(&sink);
            let rels = rels.clone();
            handles.push(tokio::spawn(async move {
                sink.upsert_relationships(&rels).await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert_eq!(sink.edge_count().await.unwrap(), 20);
        assert_eq!(sink.node_count().await.unwrap(), 21);
    }

    #[tokio::test]
    async fn test_write_failure_is_sink_error() {
        let dir = TempDir::new().unwrap();
        let sink = sink(&dir).await;
        sink.db
            .with_connection(|conn| {
                conn.execute_batch("DROP TABLE relations")?;
                Ok(())
            })
            .await
            .unwrap();
        let err = sink.upsert_relationships(&[rel("Q1", "Q2", "P22")]).await.unwrap_err();
        assert!(matches!(err, WikigraphError::SinkWrite(_)));
        assert!(err.is_transient());
    }
}
