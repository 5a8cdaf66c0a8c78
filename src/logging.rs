//! # Structured Logging
//!
//! Initializes the tracing pipeline for the dashboard process and provides
//! severity-aware logging of error records.

use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use tracing_appender::non_blocking::NonBlocking;
use tracing_appender::rolling::RollingFileAppender;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};

use crate::types::{EngineError, ErrorRecord, Result, Severity};

// Flag to track if logging has been initialized
static LOGGING_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Configuration for the logging system
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// The log level to use (trace, debug, info, warn, error)
    pub level: String,
    /// Service name attached at initialization
    pub service_name: String,
    /// Whether to use JSON formatting
    pub json_format: bool,
    /// Whether to also write logs to a rolling file
    pub file_output: bool,
    /// Directory for log files when `file_output` is set
    pub log_dir: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            service_name: "error-recovery".to_string(),
            json_format: true,
            file_output: false,
            log_dir: None,
        }
    }
}

impl TryFrom<config::Config> for LoggingConfig {
    type Error = config::ConfigError;

    fn try_from(cfg: config::Config) -> std::result::Result<Self, Self::Error> {
        let mut base = LoggingConfig::default();

        if let Ok(level) = cfg.get::<String>("logging.level") {
            base.level = level;
        }
        if let Ok(service_name) = cfg.get::<String>("logging.service_name") {
            base.service_name = service_name;
        }
        if let Ok(json_format) = cfg.get::<bool>("logging.json_format") {
            base.json_format = json_format;
        }
        if let Ok(file_output) = cfg.get::<bool>("logging.file_output") {
            base.file_output = file_output;
        }
        if let Ok(log_dir) = cfg.get::<String>("logging.log_dir") {
            base.log_dir = Some(log_dir);
        }

        Ok(base)
    }
}

/// Initializes structured logging; safe to call more than once.
pub fn init_logging(config: Option<LoggingConfig>) -> Result<()> {
    if LOGGING_INITIALIZED.load(Ordering::SeqCst) {
        return Ok(());
    }

    let config = config.unwrap_or_default();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{},warn", config.level)));

    // Distinct optional layers for JSON vs text output rather than a single
    // concrete type; at most one of the two is present.
    let json_layer = config.json_format.then(|| {
        fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_target(true)
    });
    let text_layer = (!config.json_format).then(|| fmt::layer().with_target(true));

    let file_layer = if config.file_output {
        config.log_dir.as_ref().map(|log_dir| {
            let file_appender = RollingFileAppender::new(
                tracing_appender::rolling::Rotation::DAILY,
                log_dir,
                format!("{}.log", config.service_name),
            );
            let (non_blocking, guard) = NonBlocking::new(file_appender);
            // The guard must outlive the process for logs to flush.
            Box::leak(Box::new(guard));
            fmt::layer().with_writer(non_blocking).with_ansi(false)
        })
    } else {
        None
    };

    let subscriber = Registry::default()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .with(file_layer);

    tracing::subscriber::set_global_default(subscriber).map_err(|e| {
        EngineError::Initialization(format!("failed to set global subscriber: {}", e))
    })?;

    LOGGING_INITIALIZED.store(true, Ordering::SeqCst);

    info!(
        service = %config.service_name,
        level = %config.level,
        json = %config.json_format,
        "structured logging initialized"
    );

    Ok(())
}

/// Logs an error record at the level its severity implies
pub fn log_error_record(record: &ErrorRecord) {
    match record.severity {
        Severity::Critical => {
            error!(
                error_id = %record.id,
                error_type = %record.error_type,
                severity = %record.severity,
                message = %record.message,
                context = ?record.context,
                "critical error reported"
            );
        }
        Severity::High => {
            error!(
                error_id = %record.id,
                error_type = %record.error_type,
                severity = %record.severity,
                message = %record.message,
                "error reported"
            );
        }
        Severity::Medium => {
            warn!(
                error_id = %record.id,
                error_type = %record.error_type,
                severity = %record.severity,
                message = %record.message,
                "error reported"
            );
        }
        Severity::Low => {
            info!(
                error_id = %record.id,
                error_type = %record.error_type,
                severity = %record.severity,
                message = %record.message,
                "error reported"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LoggingConfig::default();
        assert_eq!(config.level, "info");
        assert!(config.json_format);
        assert!(!config.file_output);
    }

    #[test]
    fn test_config_overrides() {
        let cfg = config::Config::builder()
            .set_override("logging.level", "debug")
            .unwrap()
            .set_override("logging.json_format", false)
            .unwrap()
            .build()
            .unwrap();

        let logging = LoggingConfig::try_from(cfg).unwrap();
        assert_eq!(logging.level, "debug");
        assert!(!logging.json_format);
        assert_eq!(logging.service_name, "error-recovery");
    }

    #[test]
    fn test_log_error_record_does_not_panic_without_subscriber() {
        let record = ErrorRecord::new(
            crate::types::ErrorType::Network,
            Severity::Critical,
            "connection lost",
        );
        log_error_record(&record);
    }
}
