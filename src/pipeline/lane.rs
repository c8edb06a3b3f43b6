//! Per-lane state machine.
//!
//! ```text
//! FetchPersons --persons--> FetchRelationships --relationships--> FetchPersons (offset += stride)
//!      |                           |
//!      +--empty--> Stopped <--empty+
//! ```

use std::time::Duration;

use super::tasks::{fetch_persons_task, fetch_relationships_task, Cursor, PipelineContext, TaskOutcome};
use crate::config::ScheduleConfig;
use crate::error::{Result, WikigraphError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaneState {
    FetchPersons,
    FetchRelationships,
    Stopped,
}

/// Step-level retry with exponential backoff, transient errors only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn from_config(schedule: &ScheduleConfig) -> Self {
        Self {
            retries: schedule.retries,
            base_delay: Duration::from_secs(schedule.retry_delay_secs),
        }
    }

    /// Delay before retry number `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LaneStats {
    pub pages: usize,
    pub persons: usize,
    pub relationships: usize,
    pub retries: u32,
}

/// One worker's cursor and state.
#[derive(Debug, Clone)]
pub struct Lane {
    cursor: Cursor,
    stride: i64,
    max_pages: Option<usize>,
    state: LaneState,
    stats: LaneStats,
}

impl Lane {
    /// Lane `worker_id` starts at `worker_id * limit` and advances by `stride`.
    pub fn new(worker_id: usize, limit: i64, stride: i64) -> Self {
        Self {
            cursor: Cursor {
                worker_id,
                offset: (worker_id as i64).saturating_mul(limit),
                limit,
            },
            stride,
            max_pages: None,
            state: LaneState::FetchPersons,
            stats: LaneStats::default(),
        }
    }

    /// Stop after `max_pages` completed pages.
    pub fn with_max_pages(mut self, max_pages: Option<usize>) -> Self {
        self.max_pages = max_pages;
        self
    }

    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    pub fn state(&self) -> LaneState {
        self.state
    }

    pub fn stats(&self) -> LaneStats {
        self.stats
    }

    /// Run the task for the current state and transition.
    ///
    /// On error the state and cursor are unchanged, so calling `step` again
    /// replays the same task.
    pub async fn step(&mut self, ctx: &PipelineContext) -> Result<LaneState> {
        self.state = match self.state {
            LaneState::FetchPersons => match fetch_persons_task(ctx, self.cursor).await? {
                TaskOutcome::Continue { items } => {
                    self.stats.persons += items;
                    LaneState::FetchRelationships
                }
                TaskOutcome::Stop => LaneState::Stopped,
            },
            LaneState::FetchRelationships => match fetch_relationships_task(ctx, self.cursor).await? {
                TaskOutcome::Continue { items } => {
                    self.stats.relationships += items;
                    self.stats.pages += 1;
                    if self.max_pages.is_some_and(|max| self.stats.pages >= max) {
                        log::info!(
                            "lane {}: reached {} pages, stopping",
                            self.cursor.worker_id,
                            self.stats.pages
                        );
                        LaneState::Stopped
                    } else {
                        self.advance()?;
                        LaneState::FetchPersons
                    }
                }
                TaskOutcome::Stop => LaneState::Stopped,
            },
            LaneState::Stopped => LaneState::Stopped,
        };
        Ok(self.state)
    }

    fn advance(&mut self) -> Result<()> {
        self.cursor.offset = self.cursor.offset.checked_add(self.stride).ok_or_else(|| {
            WikigraphError::InvalidPagination(format!(
                "lane {}: offset {} + stride {} overflows",
                self.cursor.worker_id, self.cursor.offset, self.stride
            ))
        })?;
        Ok(())
    }

    /// Drive the lane until it stops or a step fails for good.
    pub async fn run(mut self, ctx: &PipelineContext, retry: RetryPolicy) -> Result<LaneStats> {
        log::info!(
            "lane {}: starting at offset {} limit {}",
            self.cursor.worker_id,
            self.cursor.offset,
            self.cursor.limit
        );

        while self.state != LaneState::Stopped {
            let mut attempt = 0;
            loop {
                match self.step(ctx).await {
                    Ok(_) => break,
                    Err(e) if e.is_transient() && attempt < retry.retries => {
                        let delay = retry.delay_for(attempt);
                        log::warn!(
                            "lane {}: [{}] {:?} failed at offset {} limit {}, retry {}/{} in {:?}: {}",
                            self.cursor.worker_id,
                            e.log_code(),
                            self.state,
                            self.cursor.offset,
                            self.cursor.limit,
                            attempt + 1,
                            retry.retries,
                            delay,
                            e
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                        self.stats.retries += 1;
                    }
                    Err(e) => {
                        log::error!(
                            "lane {}: [{}] {:?} failed at offset {} limit {}: {}",
                            self.cursor.worker_id,
                            e.log_code(),
                            self.state,
                            self.cursor.offset,
                            self.cursor.limit,
                            e
                        );
                        ctx.handoff.remove(&self.cursor.handoff_key());
                        return Err(e);
                    }
                }
            }
        }

        log::info!(
            "lane {}: stopped at offset {} after {} pages ({} persons, {} relationships)",
            self.cursor.worker_id,
            self.cursor.offset,
            self.stats.pages,
            self.stats.persons,
            self.stats.relationships
        );
        Ok(self.stats)
    }
}
