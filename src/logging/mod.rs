//! Logging infrastructure - structured tracing for the proxy bridge
//!
//! Design: Uses `tracing` for structured, contextual logging with:
//! - Configurable log levels (env filter wins over config)
//! - Zero-cost when disabled
//! - Span-based performance tracking
//! - Console or file output, human-readable or JSON

use once_cell::sync::OnceCell;
use std::io;
use std::path::Path;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan, writer::BoxMakeWriter},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

pub use tracing::{debug, error, info, trace, warn};

use crate::capability::CapabilityFlags;
use crate::handle::RawHandle;

/// Global logging state
static LOGGER_INITIALIZED: OnceCell<()> = OnceCell::new();

/// Keeps the non-blocking file writer flushing for the process lifetime
static FILE_GUARD: OnceCell<WorkerGuard> = OnceCell::new();

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Default log level
    pub level: Level,
    /// Enable file logging
    pub file_output: bool,
    /// Log file path (if file_output enabled)
    pub log_path: Option<String>,
    /// Enable JSON format (vs human-readable)
    pub json_format: bool,
    /// Show span events (enter/exit)
    pub show_spans: bool,
    /// Enable performance tracking
    pub track_performance: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            file_output: false,
            log_path: None,
            json_format: false,
            show_spans: false,
            track_performance: cfg!(debug_assertions),
        }
    }
}

impl LogConfig {
    /// Create config from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        // FOREIGN_PROXY_LOG_LEVEL: trace, debug, info, warn, error
        if let Ok(level_str) = std::env::var("FOREIGN_PROXY_LOG_LEVEL") {
            config.level = parse_level(&level_str);
        }

        if let Ok(path) = std::env::var("FOREIGN_PROXY_LOG_FILE") {
            config.file_output = true;
            config.log_path = Some(path);
        }

        config.json_format = std::env::var("FOREIGN_PROXY_LOG_JSON").is_ok();
        config.show_spans = std::env::var("FOREIGN_PROXY_LOG_SPANS").is_ok();

        if let Ok(val) = std::env::var("FOREIGN_PROXY_LOG_PERF") {
            config.track_performance = val == "1" || val.to_lowercase() == "true";
        }

        config
    }

    /// Create high-performance config (minimal logging)
    pub fn performance() -> Self {
        Self {
            level: Level::ERROR,
            file_output: false,
            log_path: None,
            json_format: false,
            show_spans: false,
            track_performance: false,
        }
    }

    /// Create debug config (verbose logging)
    pub fn debug() -> Self {
        Self {
            level: Level::TRACE,
            file_output: true,
            log_path: Some("foreign_proxy.log".to_string()),
            json_format: false,
            show_spans: true,
            track_performance: true,
        }
    }
}

/// Parse a level name, falling back to INFO
pub fn parse_level(name: &str) -> Level {
    match name.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// Event targets of the bridge subsystems
///
/// All sit under the crate path so a `foreign_proxy=<level>` directive
/// covers them.
pub mod targets {
    pub const REGISTRY: &str = "foreign_proxy::registry";
    pub const FACTORY: &str = "foreign_proxy::factory";
    pub const INSPECTOR: &str = "foreign_proxy::inspector";
    pub const HANDLES: &str = "foreign_proxy::handles";
    pub const RUNTIME: &str = "foreign_proxy::runtime";
}

/// Filter used when `RUST_LOG` is unset
pub fn default_filter(level: Level) -> EnvFilter {
    EnvFilter::new(format!("foreign_proxy={}", level.as_str().to_lowercase()))
}

/// Initialize logging with configuration taken from the environment
pub fn init() {
    init_with_config(LogConfig::from_env());
}

/// Initialize logging with custom configuration
///
/// Only the first call installs a subscriber. A subscriber installed by the
/// embedding application beforehand is left in place.
pub fn init_with_config(config: LogConfig) {
    LOGGER_INITIALIZED.get_or_init(|| {
        perf::set_enabled(config.track_performance);
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(config.level));

        let span_events = if config.show_spans {
            FmtSpan::ENTER | FmtSpan::CLOSE
        } else {
            FmtSpan::NONE
        };

        let writer = match (config.file_output, config.log_path.as_deref()) {
            (true, Some(path)) => file_writer(path),
            _ => BoxMakeWriter::new(io::stdout),
        };

        let registry = tracing_subscriber::registry().with(env_filter);
        let installed = if config.json_format {
            registry
                .with(
                    fmt::layer()
                        .json()
                        .with_writer(writer)
                        .with_span_events(span_events)
                        .with_target(true),
                )
                .try_init()
        } else {
            registry
                .with(
                    fmt::layer()
                        .with_writer(writer)
                        .with_span_events(span_events)
                        .with_target(true)
                        .with_thread_ids(cfg!(debug_assertions))
                        .with_line_number(cfg!(debug_assertions)),
                )
                .try_init()
        };

        if installed.is_err() {
            debug!("global subscriber already installed, keeping it");
        }
    });
}

fn file_writer(path: &str) -> BoxMakeWriter {
    let path = Path::new(path);
    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_else(|| "foreign_proxy.log".into());

    let appender = tracing_appender::rolling::never(dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(appender);
    let _ = FILE_GUARD.set(guard);
    BoxMakeWriter::new(non_blocking)
}

/// Check if logging is initialized
pub fn is_initialized() -> bool {
    LOGGER_INITIALIZED.get().is_some()
}

// ============================================================================
// Subsystem logging functions
// ============================================================================

/// Log a freshly synthesized shape
#[inline]
pub fn log_shape_synthesized(flags: CapabilityFlags, name: &str, slot_count: usize) {
    debug!(
        target: targets::REGISTRY,
        flags = flags.bits(),
        shape = name,
        slot_count,
        "shape synthesized"
    );
}

/// Log a synthesis that lost an insertion race and was dropped
#[inline]
pub fn log_shape_race_discarded(flags: CapabilityFlags) {
    debug!(
        target: targets::REGISTRY,
        flags = flags.bits(),
        "concurrent synthesis discarded, reusing registered shape"
    );
}

/// Log the registry refusing a new shape
#[inline]
pub fn log_registry_exhausted(flags: CapabilityFlags, max_shapes: usize) {
    warn!(
        target: targets::REGISTRY,
        flags = flags.bits(),
        max_shapes,
        "shape registry exhausted"
    );
}

/// Log a proxy construction
#[inline]
pub fn log_proxy_created(shape: &str, handle: RawHandle, bound: bool) {
    trace!(
        target: targets::FACTORY,
        shape,
        handle = %handle,
        bound,
        "proxy created"
    );
}

/// Log a failed wrap
#[inline]
pub fn log_wrap_failed(handle: RawHandle, error: &str) {
    debug!(
        target: targets::FACTORY,
        handle = %handle,
        error,
        "wrap failed"
    );
}

/// Log a foreign probe that raised
#[inline]
pub fn log_probe_failed(capability: &str, handle: RawHandle, error: &str) {
    debug!(
        target: targets::INSPECTOR,
        capability,
        handle = %handle,
        error,
        "capability probe raised"
    );
}

/// Log a foreign reference release
#[inline]
pub fn log_handle_released(handle: RawHandle) {
    trace!(target: targets::HANDLES, handle = %handle, "foreign reference released");
}

/// Log a release of a handle the layer does not know
#[inline]
pub fn log_stale_release(handle: RawHandle) {
    warn!(target: targets::HANDLES, handle = %handle, "release of unknown foreign handle");
}

/// Log runtime initialization
#[inline]
pub fn log_runtime_init(prewarmed: usize) {
    info!(target: targets::RUNTIME, prewarmed, "proxy runtime initialized");
}

/// Performance tracking utilities
///
/// Off until a subscriber is installed from a config with
/// `track_performance` set.
pub mod perf {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Instant;
    use tracing::debug;

    static ENABLED: AtomicBool = AtomicBool::new(false);

    pub fn set_enabled(enabled: bool) {
        ENABLED.store(enabled, Ordering::Relaxed);
    }

    pub fn is_enabled() -> bool {
        ENABLED.load(Ordering::Relaxed)
    }

    /// Track operation duration (returns guard that logs on drop)
    #[must_use]
    pub fn track(operation: &'static str) -> PerformanceGuard {
        PerformanceGuard::new(operation, is_enabled())
    }

    pub struct PerformanceGuard {
        operation: &'static str,
        start: Option<Instant>,
    }

    impl PerformanceGuard {
        fn new(operation: &'static str, enabled: bool) -> Self {
            Self {
                operation,
                start: enabled.then(Instant::now),
            }
        }

        /// Whether this guard logs a duration when dropped
        pub fn is_active(&self) -> bool {
            self.start.is_some()
        }
    }

    impl Drop for PerformanceGuard {
        fn drop(&mut self) {
            if let Some(start) = self.start {
                debug!(
                    operation = self.operation,
                    duration_us = start.elapsed().as_micros() as u64,
                    "operation completed"
                );
            }
        }
    }

}
