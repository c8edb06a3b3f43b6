use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::sparql::query::{is_entity_id, is_property_id};

/// Relation codes crawled when `workers.relationship_types` is not set.
pub const DEFAULT_RELATIONSHIP_TYPES: &[&str] = &[
    "P40",   // child
    "P22",   // father
    "P25",   // mother
    "P3373", // sibling
    "P1038", // relative
    "P1037", // director / manager
    "P106",  // occupation
    "P108",  // employer
    "P1347", // military casualty classification
    "P551",  // residence
    "P1313", // office held by head of government
    "P1026", // academic thesis
    "P1441", // present in work
    "P1269", // facet of
    "P451",  // unmarried partner
];

/// Upper bounds that keep lane offsets far from i64 overflow.
pub const MAX_WORKERS: i64 = 1024;
pub const MAX_ITEMS_PER_WORKER: i64 = 100_000;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub wikigraph: WikigraphConfig,
    pub workers: WorkersConfig,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub sink: SinkConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
}

/// Run identifiers and logging
#[derive(Debug, Clone, Deserialize)]
pub struct WikigraphConfig {
    #[serde(default = "default_job_id")]
    pub job_id: String,
    #[serde(default = "default_correlation_id")]
    pub correlation_id: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_format: LogFormat,
}

impl Default for WikigraphConfig {
    fn default() -> Self {
        Self {
            job_id: default_job_id(),
            correlation_id: default_correlation_id(),
            log_level: default_log_level(),
            log_format: LogFormat::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Lane layout and relation allowlist
#[derive(Debug, Clone, Deserialize)]
pub struct WorkersConfig {
    /// Number of independent lanes.
    pub num_workers: i64,
    /// Page size of every lane.
    pub items_per_worker: i64,
    #[serde(default = "default_relationship_types")]
    pub relationship_types: Vec<String>,
    #[serde(default)]
    pub lane_stride: LaneStride,
    #[serde(default)]
    pub relationship_paging: RelationshipPaging,
    /// Merge only persons that own at least one relationship.
    #[serde(default)]
    pub discard_unrelated: bool,
    /// Stop each lane after this many pages.
    #[serde(default)]
    pub max_pages: Option<usize>,
}

/// How far a lane moves its offset after a completed page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LaneStride {
    /// Advance by `limit`. Lanes start disjoint but walk over each other's pages.
    #[default]
    Contiguous,
    /// Advance by `num_workers * limit`. Lanes never overlap.
    Interleaved,
}

/// How relationships of one person page are paged.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationshipPaging {
    /// One relationships query per person page, at the lane's own offset/limit.
    #[default]
    Coupled,
    /// Drain the page's relationships with a separate cursor starting at 0.
    Independent,
}

/// SPARQL endpoint settings
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Label language, e.g. "en".
    #[serde(default = "default_language")]
    pub language: String,
    /// Minimum delay between the starts of two requests, process-wide.
    #[serde(default = "default_min_delay_ms")]
    pub min_delay_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Persons are restricted to `?person wdt:<cohort_property> wd:<cohort_value>`.
    #[serde(default = "default_cohort_property")]
    pub cohort_property: String,
    #[serde(default = "default_cohort_value")]
    pub cohort_value: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            user_agent: default_user_agent(),
            language: default_language(),
            min_delay_ms: default_min_delay_ms(),
            timeout_secs: default_timeout_secs(),
            cohort_property: default_cohort_property(),
            cohort_value: default_cohort_value(),
        }
    }
}

/// Graph store settings
#[derive(Debug, Clone, Deserialize)]
pub struct SinkConfig {
    #[serde(default)]
    pub backend: SinkBackend,
    #[serde(default = "default_neo4j_uri")]
    pub neo4j_uri: String,
    #[serde(default = "default_neo4j_user")]
    pub neo4j_user: String,
    #[serde(default)]
    pub neo4j_password: Option<String>,
    #[serde(default = "default_neo4j_password_env")]
    pub neo4j_password_env: String,
    #[serde(default = "default_sqlite_path")]
    pub sqlite_path: PathBuf,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            backend: SinkBackend::default(),
            neo4j_uri: default_neo4j_uri(),
            neo4j_user: default_neo4j_user(),
            neo4j_password: None,
            neo4j_password_env: default_neo4j_password_env(),
            sqlite_path: default_sqlite_path(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkBackend {
    #[default]
    Neo4j,
    Sqlite,
}

/// Retry policy and periodic runs
#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleConfig {
    /// Extra attempts per failed lane step (transient errors only).
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,
    #[serde(default = "default_interval_hours")]
    pub interval_hours: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            retries: default_retries(),
            retry_delay_secs: default_retry_delay_secs(),
            interval_hours: default_interval_hours(),
        }
    }
}

fn default_job_id() -> String {
    "local_job".to_string()
}

fn default_correlation_id() -> String {
    "local_corr".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_relationship_types() -> Vec<String> {
    DEFAULT_RELATIONSHIP_TYPES.iter().map(|s| s.to_string()).collect()
}

fn default_endpoint() -> String {
    "https://query.wikidata.org/sparql".to_string()
}

fn default_user_agent() -> String {
    format!("wikigraph/{} (graph crawler)", env!("CARGO_PKG_VERSION"))
}

fn default_language() -> String {
    "en".to_string()
}

fn default_min_delay_ms() -> u64 {
    1000
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_cohort_property() -> String {
    "P102".to_string()
}

fn default_cohort_value() -> String {
    "Q7320".to_string()
}

fn default_neo4j_uri() -> String {
    "bolt://localhost:7687".to_string()
}

fn default_neo4j_user() -> String {
    "neo4j".to_string()
}

fn default_neo4j_password_env() -> String {
    "NEO4J_PASSWORD".to_string()
}

fn default_sqlite_path() -> PathBuf {
    PathBuf::from("wikigraph.db")
}

fn default_retries() -> u32 {
    1
}

fn default_retry_delay_secs() -> u64 {
    300
}

fn default_interval_hours() -> u64 {
    24
}

impl Config {
    /// Load configuration from file
    ///
    /// Loads environment variables from .env file (if present) before loading config.
    /// Looks for config file in this order:
    /// 1. Path specified in WIKIGRAPH_CONFIG environment variable
    /// 2. ./config.toml in current directory
    pub fn load() -> Result<Self> {
        // .env is optional
        let _ = dotenv::dotenv();

        let config_path = std::env::var("WIKIGRAPH_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config.toml"));

        Self::load_from(&config_path)
    }

    /// Load and validate a specific config file, applying environment overrides.
    pub fn load_from(config_path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let mut config = Self::from_toml_str(&config_str)?;
        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Parse without env overrides or validation.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).context("Failed to parse config.toml")
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("NEO4J_URI") {
            self.sink.neo4j_uri = v;
        }
        if let Ok(v) = std::env::var("NEO4J_USER") {
            self.sink.neo4j_user = v;
        }
        if let Ok(v) = std::env::var("NEO4J_PASSWORD") {
            self.sink.neo4j_password = Some(v);
        }
        if let Ok(v) = std::env::var("WIKIGRAPH_JOB_ID") {
            self.wikigraph.job_id = v;
        }
        if let Ok(v) = std::env::var("WIKIGRAPH_CORRELATION_ID") {
            self.wikigraph.correlation_id = v;
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.workers.num_workers <= 0 {
            anyhow::bail!("workers.num_workers must be greater than 0");
        }

        if self.workers.items_per_worker <= 0 {
            anyhow::bail!("workers.items_per_worker must be greater than 0");
        }

        if self.workers.num_workers > MAX_WORKERS {
            anyhow::bail!("workers.num_workers must be at most {}", MAX_WORKERS);
        }

        if self.workers.items_per_worker > MAX_ITEMS_PER_WORKER {
            anyhow::bail!("workers.items_per_worker must be at most {}", MAX_ITEMS_PER_WORKER);
        }

        if self.workers.max_pages == Some(0) {
            anyhow::bail!("workers.max_pages must be greater than 0 when set");
        }

        if self.workers.relationship_types.is_empty() {
            anyhow::bail!("workers.relationship_types must not be empty");
        }

        for code in &self.workers.relationship_types {
            if !is_property_id(code) {
                anyhow::bail!("Invalid relationship type {:?}: expected a code like \"P22\"", code);
            }
        }

        if !is_property_id(&self.source.cohort_property) {
            anyhow::bail!("source.cohort_property must look like \"P102\"");
        }

        if !is_entity_id(&self.source.cohort_value) {
            anyhow::bail!("source.cohort_value must look like \"Q7320\"");
        }

        let endpoint = url::Url::parse(&self.source.endpoint)
            .with_context(|| format!("source.endpoint is not a valid URL: {}", self.source.endpoint))?;
        if endpoint.scheme() != "http" && endpoint.scheme() != "https" {
            anyhow::bail!("source.endpoint must be http(s), got {}", endpoint.scheme());
        }

        if self.source.language.is_empty()
            || !self.source.language.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        {
            anyhow::bail!("source.language must be a language tag such as \"en\"");
        }

        if self.schedule.interval_hours == 0 {
            anyhow::bail!("schedule.interval_hours must be greater than 0");
        }

        if self.sink.backend == SinkBackend::Neo4j {
            self.neo4j_password().with_context(|| {
                format!(
                    "No Neo4j password: set sink.neo4j_password or the {} environment variable",
                    self.sink.neo4j_password_env
                )
            })?;
        }

        Ok(())
    }

    /// Resolve the Neo4j password from config, falling back to `neo4j_password_env`.
    pub fn neo4j_password(&self) -> Result<String> {
        if let Some(pw) = &self.sink.neo4j_password {
            return Ok(pw.clone());
        }
        std::env::var(&self.sink.neo4j_password_env)
            .with_context(|| format!("Environment variable {} not set", self.sink.neo4j_password_env))
    }

    /// Lane count as usize (validated positive)
    pub fn num_workers(&self) -> usize {
        self.workers.num_workers as usize
    }
}
