//! Job runner: N independent lanes to completion, optionally on a schedule.

mod lane;
mod tasks;
#[cfg(test)]
mod testing;

pub use lane::{Lane, LaneState, LaneStats, RetryPolicy};
pub use tasks::{
    fetch_persons_task, fetch_relationships_task, Cursor, HandOff, PipelineContext, TaskOutcome,
};

use chrono::{DateTime, Utc};
use std::time::Duration;
use uuid::Uuid;

use crate::config::{Config, LaneStride};
use crate::error::{Result, WikigraphError};

/// Lane layout and retry policy of one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JobPlan {
    pub num_workers: usize,
    pub items_per_worker: i64,
    pub stride: LaneStride,
    /// Per-lane page cap; `None` runs each lane until an empty page.
    pub max_pages: Option<usize>,
    pub retry: RetryPolicy,
}

impl JobPlan {
    pub fn from_config(config: &Config) -> Self {
        Self {
            num_workers: config.num_workers(),
            items_per_worker: config.workers.items_per_worker,
            stride: config.workers.lane_stride,
            max_pages: config.workers.max_pages,
            retry: RetryPolicy::from_config(&config.schedule),
        }
    }

    fn offset_step(&self) -> i64 {
        match self.stride {
            LaneStride::Contiguous => self.items_per_worker,
            LaneStride::Interleaved => self.items_per_worker.saturating_mul(self.num_workers as i64),
        }
    }

    pub fn lanes(&self) -> Vec<Lane> {
        (0..self.num_workers)
            .map(|worker_id| {
                Lane::new(worker_id, self.items_per_worker, self.offset_step()).with_max_pages(self.max_pages)
            })
            .collect()
    }
}

#[derive(Debug)]
pub struct LaneReport {
    pub worker_id: usize,
    pub result: Result<LaneStats>,
}

#[derive(Debug)]
pub struct JobReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// One entry per lane, ordered by worker id.
    pub lanes: Vec<LaneReport>,
}

impl JobReport {
    pub fn is_success(&self) -> bool {
        self.lanes.iter().all(|l| l.result.is_ok())
    }

    pub fn failed_lanes(&self) -> Vec<usize> {
        self.lanes
            .iter()
            .filter(|l| l.result.is_err())
            .map(|l| l.worker_id)
            .collect()
    }

    /// Stats summed over the lanes that finished.
    pub fn totals(&self) -> LaneStats {
        self.lanes
            .iter()
            .filter_map(|l| l.result.as_ref().ok())
            .fold(LaneStats::default(), |acc, s| LaneStats {
                pages: acc.pages + s.pages,
                persons: acc.persons + s.persons,
                relationships: acc.relationships + s.relationships,
                retries: acc.retries + s.retries,
            })
    }
}

/// Run every lane concurrently until each has stopped or failed.
///
/// A failing lane never cancels the others.
pub async fn run_job(ctx: &PipelineContext, plan: &JobPlan) -> JobReport {
    let run_id = Uuid::new_v4().to_string();
    let started_at = Utc::now();
    log::info!(
        "job {}: starting {} lanes of {} items",
        run_id,
        plan.num_workers,
        plan.items_per_worker
    );

    let handles: Vec<_> = plan
        .lanes()
        .into_iter()
        .map(|lane| {
            let worker_id = lane.cursor().worker_id;
            let ctx = ctx.clone();
            let retry = plan.retry;
            (worker_id, tokio::spawn(async move { lane.run(&ctx, retry).await }))
        })
        .collect();

    let mut lanes = Vec::with_capacity(handles.len());
    for (worker_id, handle) in handles {
        let result = handle.await.unwrap_or_else(|e| {
            Err(WikigraphError::Io(std::io::Error::other(format!(
                "lane {} task failed: {}",
                worker_id, e
            ))))
        });
        lanes.push(LaneReport { worker_id, result });
    }

    let report = JobReport {
        run_id,
        started_at,
        finished_at: Utc::now(),
        lanes,
    };
    let totals = report.totals();
    if report.is_success() {
        log::info!(
            "job {}: all lanes stopped ({} pages, {} persons, {} relationships, {} retries) in {}s",
            report.run_id,
            totals.pages,
            totals.persons,
            totals.relationships,
            totals.retries,
            (report.finished_at - report.started_at).num_seconds()
        );
    } else {
        log::error!(
            "job {}: lanes {:?} failed",
            report.run_id,
            report.failed_lanes()
        );
    }
    report
}

/// Jobs run by [`run_scheduled`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScheduleSummary {
    pub jobs: usize,
    pub failed_jobs: usize,
}

/// Run a job every `interval`, the first one immediately.
///
/// A job with failed lanes is logged and the next one still runs. Returns
/// after `max_runs` jobs when given; otherwise runs until the future is dropped.
pub async fn run_scheduled(
    ctx: &PipelineContext,
    plan: &JobPlan,
    interval: Duration,
    max_runs: Option<usize>,
) -> ScheduleSummary {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut summary = ScheduleSummary::default();

    loop {
        ticker.tick().await;
        let report = run_job(ctx, plan).await;
        summary.jobs += 1;
        if !report.is_success() {
            summary.failed_jobs += 1;
        }
        if max_runs.is_some_and(|max| summary.jobs >= max) {
            return summary;
        }
        log::info!("Next job in {:?}", interval);
    }
}
