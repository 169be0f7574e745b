//! Logging infrastructure - structured tracing throughout the bridge
//!
//! Design: Uses `tracing` for structured, contextual logging with:
//! - Configurable log level and JSON output
//! - Zero-cost when disabled
//! - Span events and performance tracking on demand
//! - Optional file output through a non-blocking appender

use once_cell::sync::OnceCell;
use std::io;
use std::path::{Path, PathBuf};
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

pub use tracing::{debug, error, info, trace, warn};

use crate::config::LoggingSettings;
use crate::error::{BridgeError, RegistrationError};
use crate::handles::{MethodHandle, ModuleId};

/// Global logging state; holds the file writer guard when file output is on
static LOGGER_INITIALIZED: OnceCell<Option<WorkerGuard>> = OnceCell::new();

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Default log level
    pub level: Level,
    /// Log file path; console output when unset
    pub log_path: Option<PathBuf>,
    /// Enable JSON format (vs human-readable)
    pub json_format: bool,
    /// Show span events (enter/exit)
    pub show_spans: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            log_path: None,
            json_format: false,
            show_spans: false,
        }
    }
}

fn parse_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

impl LogConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Create config from the `[logging]` table, then apply the environment
    pub fn from_settings(settings: &LoggingSettings) -> Self {
        let mut config = Self::default();
        if let Some(level) = &settings.level {
            config.level = parse_level(level);
        }
        config.json_format = settings.json;
        config.log_path = settings.file.clone();
        config.with_env_overrides()
    }

    fn with_env_overrides(mut self) -> Self {
        // HYPERION_LOG_LEVEL: trace, debug, info, warn, error
        if let Ok(level) = std::env::var("HYPERION_LOG_LEVEL") {
            self.level = parse_level(&level);
        }

        // HYPERION_LOG_FILE: path to log file
        if let Some(path) = std::env::var_os("HYPERION_LOG_FILE") {
            self.log_path = Some(PathBuf::from(path));
        }

        if std::env::var("HYPERION_LOG_JSON").is_ok() {
            self.json_format = true;
        }
        if std::env::var("HYPERION_LOG_SPANS").is_ok() {
            self.show_spans = true;
        }
        self
    }

    /// Errors only
    pub fn quiet() -> Self {
        Self {
            level: Level::ERROR,
            ..Self::default()
        }
    }

    /// Everything, with span events
    pub fn verbose() -> Self {
        Self {
            level: Level::TRACE,
            show_spans: true,
            ..Self::default()
        }
    }
}

/// Initialize logging from the environment
pub fn init() {
    init_with_config(LogConfig::from_env());
}

/// Initialize logging with custom configuration.
///
/// Only the first call has an effect. A subscriber installed elsewhere in
/// the process is left alone.
pub fn init_with_config(config: LogConfig) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("hyperion_interop={}", config.level.as_str().to_lowercase()))
        });

        let span_events = if config.show_spans {
            FmtSpan::ENTER | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        };

        let (writer, guard) = match &config.log_path {
            Some(path) => {
                let (writer, guard) = tracing_appender::non_blocking(file_appender(path));
                (fmt::writer::BoxMakeWriter::new(writer), Some(guard))
            }
            None => (fmt::writer::BoxMakeWriter::new(io::stderr), None),
        };

        let layer = fmt::layer()
            .with_writer(writer)
            .with_span_events(span_events)
            .with_target(true)
            .with_thread_ids(cfg!(debug_assertions))
            .with_line_number(cfg!(debug_assertions));
        let layer = if config.json_format {
            layer.json().boxed()
        } else {
            layer.boxed()
        };

        let _ = tracing_subscriber::registry().with(env_filter).with(layer).try_init();
        guard
    });
}

fn file_appender(path: &Path) -> tracing_appender::rolling::RollingFileAppender {
    let directory = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
    let file_name = path.file_name().map(|n| n.to_os_string()).unwrap_or_else(|| "hyperion.log".into());
    tracing_appender::rolling::never(directory, file_name)
}

/// Check if logging is initialized
pub fn is_initialized() -> bool {
    LOGGER_INITIALIZED.get().is_some()
}

// ============================================================================
// Bridge-specific logging functions
// ============================================================================

/// Log a module becoming available
pub fn log_module_loaded(module: ModuleId, name: &str, types: usize, methods: usize, skipped: usize) {
    info!(
        event = "module_loaded",
        module = module.0,
        module_name = name,
        types,
        methods,
        skipped,
        "Module registered"
    );
}

pub fn log_module_unloaded(module: ModuleId, types: usize, methods: usize, objects: usize) {
    info!(event = "module_unloaded", module = module.0, types, methods, objects, "Module unloaded");
}

/// Log a type or method that was left out of a registration
pub fn log_registration_skipped(type_name: &str, error: &RegistrationError) {
    warn!(
        event = "registration_skipped",
        type_name,
        error = %error,
        "Skipping declaration"
    );
}

/// Log one invocation on the hot path
#[inline]
pub fn log_invoke(method: MethodHandle, name: &str, cells: usize) {
    trace!(event = "invoke", method = %method, method_name = name, cells, "Invoking method");
}

/// Log an invocation failure reported back to the native caller
pub fn log_invoke_error(method: MethodHandle, error: &BridgeError) {
    error!(
        event = "invoke_error",
        method = %method,
        status = error.status_code(),
        error = %error,
        "Invocation failed"
    );
}

/// Log an FFI entry point failure
pub fn log_ffi_error(fn_name: &str, error: &str) {
    error!(event = "ffi_error", function = fn_name, error = error, "FFI function error");
}

/// Performance tracking utilities
pub mod perf {
    use std::time::Instant;
    use tracing::debug;

    /// Track operation duration (returns guard that logs on drop)
    #[must_use]
    pub fn track(operation: &'static str) -> PerformanceGuard {
        PerformanceGuard {
            operation,
            start: Instant::now(),
        }
    }

    pub struct PerformanceGuard {
        operation: &'static str,
        start: Instant,
    }

    impl Drop for PerformanceGuard {
        fn drop(&mut self) {
            let elapsed = self.start.elapsed();
            debug!(
                operation = self.operation,
                duration_us = elapsed.as_micros() as u64,
                "operation completed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_creation() {
        let config = LogConfig::default();
        assert_eq!(config.level, Level::INFO);
        assert!(config.log_path.is_none());

        assert_eq!(LogConfig::quiet().level, Level::ERROR);
        assert!(LogConfig::verbose().show_spans);
    }

    #[test]
    fn test_config_from_settings() {
        let settings = LoggingSettings {
            level: Some("warn".into()),
            json: true,
            file: None,
        };
        let config = LogConfig::from_settings(&settings);
        if std::env::var("HYPERION_LOG_LEVEL").is_err() {
            assert_eq!(config.level, Level::WARN);
        }
        assert!(config.json_format);
    }

    #[test]
    fn test_init_idempotent() {
        init();
        init(); // Should not panic
        assert!(is_initialized());
    }
}
