//! The two pipeline tasks and the data they hand to each other.
//!
//! Each task takes a lane cursor and answers Continue or Stop. The persons
//! task leaves its page in the [`HandOff`] store under
//! `persons_{worker_id}_{offset}_{limit}`; the relationships task picks it up
//! from there.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use crate::config::{Config, RelationshipPaging};
use crate::error::{Result, WikigraphError};
use crate::graph::build_graph;
use crate::models::{map_records, Person, Relationship};
use crate::sink::GraphSink;
use crate::sparql::{FactSource, QueryBuilder};

/// Position of one lane in the remote dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cursor {
    pub worker_id: usize,
    pub offset: i64,
    pub limit: i64,
}

impl Cursor {
    pub fn handoff_key(&self) -> String {
        format!("persons_{}_{}_{}", self.worker_id, self.offset, self.limit)
    }
}

/// What the orchestrator should do after a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Run the lane's next task; `items` were written.
    Continue { items: usize },
    /// The lane is finished.
    Stop,
}

/// Inter-task data store, keyed by [`Cursor::handoff_key`].
#[derive(Debug, Clone, Default)]
pub struct HandOff {
    inner: Arc<Mutex<HashMap<String, Vec<Person>>>>,
}

impl HandOff {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, key: String, persons: Vec<Person>) {
        self.lock().insert(key, persons);
    }

    pub fn get(&self, key: &str) -> Option<Vec<Person>> {
        self.lock().get(key).cloned()
    }

    pub fn remove(&self, key: &str) -> Option<Vec<Person>> {
        self.lock().remove(key)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<Person>>> {
        // A panic while holding this lock cannot leave the map half-updated.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Everything a task needs. Cheap to clone; one clone per lane.
#[derive(Clone)]
pub struct PipelineContext {
    pub source: Arc<dyn FactSource>,
    pub sink: Arc<dyn GraphSink>,
    pub queries: QueryBuilder,
    pub relationship_types: Arc<Vec<String>>,
    pub relationship_paging: RelationshipPaging,
    /// Only merge persons that own at least one relationship.
    pub discard_unrelated: bool,
    pub handoff: HandOff,
}

impl PipelineContext {
    pub fn new(config: &Config, source: Arc<dyn FactSource>, sink: Arc<dyn GraphSink>) -> Self {
        Self {
            source,
            sink,
            queries: QueryBuilder::from_config(&config.source),
            relationship_types: Arc::new(config.workers.relationship_types.clone()),
            relationship_paging: config.workers.relationship_paging,
            discard_unrelated: config.workers.discard_unrelated,
            handoff: HandOff::new(),
        }
    }
}

/// Fetch and map the persons page at `cursor` and hand it off. Stops the lane on an empty page.
///
/// The page is merged right away unless `discard_unrelated` is set, in which
/// case the relationships task merges only the persons that own a relationship.
pub async fn fetch_persons_task(ctx: &PipelineContext, cursor: Cursor) -> Result<TaskOutcome> {
    let query = ctx.queries.build_persons_query(cursor.offset, cursor.limit)?;
    let rows = ctx.source.execute(&query).await?;
    let persons: Vec<Person> = map_records(&rows)?;

    if persons.is_empty() {
        log::info!(
            "lane {}: no persons at offset {} limit {}, stopping",
            cursor.worker_id,
            cursor.offset,
            cursor.limit
        );
        return Ok(TaskOutcome::Stop);
    }

    if !ctx.discard_unrelated {
        let graph = build_graph(&persons, &[]);
        let summary = ctx.sink.write_graph(&graph).await?;
        log::info!(
            "lane {}: merged {} persons at offset {} limit {}",
            cursor.worker_id,
            summary.nodes,
            cursor.offset,
            cursor.limit
        );
    }

    let items = persons.len();
    ctx.handoff.put(cursor.handoff_key(), persons);
    Ok(TaskOutcome::Continue { items })
}

/// Fetch and merge the relationships of the page handed off at `cursor`.
/// Stops the lane when the page has none.
pub async fn fetch_relationships_task(ctx: &PipelineContext, cursor: Cursor) -> Result<TaskOutcome> {
    let key = cursor.handoff_key();
    let persons = ctx.handoff.get(&key).ok_or_else(|| {
        WikigraphError::Pipeline(format!("no persons handed off under {}", key))
    })?;
    let uris: Vec<String> = persons.iter().map(|p| p.uri.clone()).collect();

    let mut owners: HashSet<String> = HashSet::new();
    let mut written = 0;
    match ctx.relationship_paging {
        RelationshipPaging::Coupled => {
            let page = relationships_page(ctx, cursor.worker_id, cursor.offset, cursor.limit, &uris).await?;
            written += page.len();
            owners.extend(page.into_iter().map(|r| r.person_uri));
        }
        RelationshipPaging::Independent => {
            let mut offset = 0;
            loop {
                let page = relationships_page(ctx, cursor.worker_id, offset, cursor.limit, &uris).await?;
                let n = page.len();
                written += n;
                owners.extend(page.into_iter().map(|r| r.person_uri));
                if (n as i64) < cursor.limit {
                    break;
                }
                offset += cursor.limit;
            }
        }
    }

    if ctx.discard_unrelated && written > 0 {
        let kept: Vec<Person> = persons
            .into_iter()
            .filter(|p| owners.contains(&p.uri))
            .collect();
        ctx.sink.upsert_persons(&kept).await?;
        log::info!(
            "lane {}: merged {} persons with relationships, discarded {} at offset {} limit {}",
            cursor.worker_id,
            kept.len(),
            uris.len() - kept.len(),
            cursor.offset,
            cursor.limit
        );
    }

    ctx.handoff.remove(&key);

    if written == 0 {
        log::info!(
            "lane {}: no relationships at offset {} limit {}, stopping",
            cursor.worker_id,
            cursor.offset,
            cursor.limit
        );
        return Ok(TaskOutcome::Stop);
    }
    Ok(TaskOutcome::Continue { items: written })
}

/// One relationships query, mapped and checked before anything is written.
/// Returns the merged relationships.
async fn relationships_page(
    ctx: &PipelineContext,
    worker_id: usize,
    offset: i64,
    limit: i64,
    uris: &[String],
) -> Result<Vec<Relationship>> {
    let query = ctx
        .queries
        .build_relationships_query(offset, limit, uris, &ctx.relationship_types)?;
    let rows = ctx.source.execute(&query).await?;
    let relationships: Vec<Relationship> = map_records(&rows)?;

    if let Some(bad) = relationships
        .iter()
        .find(|r| !ctx.relationship_types.contains(&r.relation_type))
    {
        return Err(WikigraphError::MalformedRecord(format!(
            "relation type {} of {} is not in the allowlist",
            bad.relation_type, bad.person_uri
        )));
    }

    if relationships.is_empty() {
        return Ok(relationships);
    }

    ctx.sink.upsert_relationships(&relationships).await?;
    log::info!(
        "lane {}: merged {} relationships at offset {} limit {}",
        worker_id,
        relationships.len(),
        offset,
        limit
    );
    Ok(relationships)
}
