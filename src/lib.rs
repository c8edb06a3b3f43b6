pub mod config;
pub mod error;
pub mod logging;
pub mod db;
pub mod models;
pub mod sparql;
pub mod graph;
pub mod sink;
pub mod pipeline;

pub use config::Config;
pub use error::{Result, WikigraphError};
pub use graph::{build_graph, Graph};
pub use pipeline::{run_job, run_scheduled, JobPlan, JobReport, PipelineContext, ScheduleSummary};
