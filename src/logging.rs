//! Logger setup.
//!
//! Every line is stamped with the run's correlation id and job id so that
//! lanes of one run can be grouped in aggregated logs.

use std::io::Write;

use chrono::Utc;
use env_logger::fmt::Formatter;
use log::{LevelFilter, Record};

use crate::config::{Config, LogFormat};

const COMPONENT: &str = "wikigraph-crawler";

/// Dependencies that are far too chatty at debug level.
const QUIET_MODULES: &[&str] = &["reqwest", "hyper", "hyper_util", "neo4rs", "rustls"];

/// Fields stamped on every record.
#[derive(Debug, Clone)]
pub struct LogFields {
    pub correlation_id: String,
    pub job_id: String,
}

impl LogFields {
    pub fn from_config(config: &Config) -> Self {
        Self {
            correlation_id: config.wikigraph.correlation_id.clone(),
            job_id: config.wikigraph.job_id.clone(),
        }
    }
}

/// Install the global logger. `RUST_LOG` wins over the configured level.
///
/// Safe to call more than once; later calls are ignored.
pub fn init(config: &Config) {
    let fields = LogFields::from_config(config);
    let format = config.wikigraph.log_format;

    let mut builder = env_logger::Builder::from_env(
        env_logger::Env::default().filter_or("RUST_LOG", config.wikigraph.log_level.as_str()),
    );
    for module in QUIET_MODULES {
        builder.filter_module(module, LevelFilter::Warn);
    }
    builder.format(move |buf, record| write_record(buf, record, &fields, format));

    let _ = builder.try_init();
}

fn write_record(
    buf: &mut Formatter,
    record: &Record<'_>,
    fields: &LogFields,
    format: LogFormat,
) -> std::io::Result<()> {
    let line = render(record, fields, format);
    writeln!(buf, "{}", line)
}

fn render(record: &Record<'_>, fields: &LogFields, format: LogFormat) -> String {
    let timestamp = Utc::now().format("%Y-%m-%dT%H:%M:%S");
    match format {
        LogFormat::Text => format!(
            "[{}] {} <{}> [{}] {}",
            timestamp,
            record.level(),
            fields.correlation_id,
            record.target(),
            record.args()
        ),
        LogFormat::Json => serde_json::json!({
            "timestamp": timestamp.to_string(),
            "level": record.level().to_string(),
            "correlationId": fields.correlation_id,
            "jobId": fields.job_id,
            "component": COMPONENT,
            "name": record.target(),
            "message": record.args().to_string(),
        })
        .to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use log::Level;

    fn fields() -> LogFields {
        LogFields {
            correlation_id: "corr-1".to_string(),
            job_id: "job-1".to_string(),
        }
    }

    #[test]
    fn test_text_line_carries_correlation_id() {
        let line = render(
            &Record::builder()
                .args(format_args!("lane {} started", 3))
                .level(Level::Info)
                .target("wikigraph::pipeline")
                .build(),
            &fields(),
            LogFormat::Text,
        );
        assert!(line.contains("INFO <corr-1> [wikigraph::pipeline] lane 3 started"));
    }

    #[test]
    fn test_json_line_fields() {
        let line = render(
            &Record::builder()
                .args(format_args!("hello"))
                .level(Level::Warn)
                .target("wikigraph::sink")
                .build(),
            &fields(),
            LogFormat::Json,
        );
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["level"], "WARN");
        assert_eq!(value["correlationId"], "corr-1");
        assert_eq!(value["jobId"], "job-1");
        assert_eq!(value["component"], COMPONENT);
        assert_eq!(value["name"], "wikigraph::sink");
        assert_eq!(value["message"], "hello");
    }
}
