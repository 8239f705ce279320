//! Runtime configuration (spec §6 "Configuration"): a plain builder, with
//! limits additionally overridable from environment variables loaded
//! through `dotenvy::dotenv()` at build time.

use std::sync::Arc;

use crate::state::{LogLevel, Limits};
use crate::vfs::Vfs;

/// Fluent configuration for one execution.
#[derive(Clone)]
pub struct RuntimeConfig {
    pub limits: Limits,
    pub log_level: LogLevel,
    /// Spec §6 `forkOnMultipleEdges`, default `true`.
    pub fork_on_multiple_edges: bool,
    pub vfs: Option<Arc<dyn Vfs>>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            limits: Limits::default(),
            log_level: LogLevel::default(),
            fork_on_multiple_edges: true,
            vfs: None,
        }
    }
}

impl RuntimeConfig {
    #[must_use]
    pub fn builder() -> RuntimeConfigBuilder {
        RuntimeConfigBuilder::new()
    }
}

pub struct RuntimeConfigBuilder {
    limits: Limits,
    log_level: LogLevel,
    fork_on_multiple_edges: bool,
    vfs: Option<Arc<dyn Vfs>>,
}

impl RuntimeConfigBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            limits: Limits::default(),
            log_level: LogLevel::default(),
            fork_on_multiple_edges: true,
            vfs: None,
        }
    }

    #[must_use]
    pub fn max_steps(mut self, max_steps: u32) -> Self {
        self.limits.max_steps = max_steps;
        self
    }

    #[must_use]
    pub fn max_node_invocations(mut self, max: u32) -> Self {
        self.limits.max_node_invocations = max;
        self
    }

    #[must_use]
    pub fn timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.limits.timeout_ms = timeout_ms;
        self
    }

    #[must_use]
    pub fn cycle_detection_window(mut self, window: usize) -> Self {
        self.limits.cycle_detection_window = window;
        self
    }

    #[must_use]
    pub fn log_level(mut self, level: LogLevel) -> Self {
        self.log_level = level;
        self
    }

    #[must_use]
    pub fn fork_on_multiple_edges(mut self, enabled: bool) -> Self {
        self.fork_on_multiple_edges = enabled;
        self
    }

    #[must_use]
    pub fn vfs(mut self, vfs: Arc<dyn Vfs>) -> Self {
        self.vfs = Some(vfs);
        self
    }

    /// Applies environment-variable overrides (via `dotenvy`) for any limit
    /// left at its struct default, then returns the finished config.
    ///
    /// Recognized variables: `DYGRAM_MAX_STEPS`, `DYGRAM_MAX_NODE_INVOCATIONS`,
    /// `DYGRAM_TIMEOUT_MS`, `DYGRAM_CYCLE_WINDOW`, `DYGRAM_LOG_LEVEL`.
    #[must_use]
    pub fn build(mut self) -> RuntimeConfig {
        dotenvy::dotenv().ok();

        if let Ok(v) = std::env::var("DYGRAM_MAX_STEPS") {
            if let Ok(n) = v.parse() {
                self.limits.max_steps = n;
            }
        }
        if let Ok(v) = std::env::var("DYGRAM_MAX_NODE_INVOCATIONS") {
            if let Ok(n) = v.parse() {
                self.limits.max_node_invocations = n;
            }
        }
        if let Ok(v) = std::env::var("DYGRAM_TIMEOUT_MS") {
            if let Ok(n) = v.parse() {
                self.limits.timeout_ms = n;
            }
        }
        if let Ok(v) = std::env::var("DYGRAM_CYCLE_WINDOW") {
            if let Ok(n) = v.parse() {
                self.limits.cycle_detection_window = n;
            }
        }
        if let Ok(v) = std::env::var("DYGRAM_LOG_LEVEL") {
            if let Some(level) = parse_log_level(&v) {
                self.log_level = level;
            }
        }

        RuntimeConfig {
            limits: self.limits,
            log_level: self.log_level,
            fork_on_multiple_edges: self.fork_on_multiple_edges,
            vfs: self.vfs,
        }
    }
}

fn parse_log_level(s: &str) -> Option<LogLevel> {
    match s.to_ascii_lowercase().as_str() {
        "debug" => Some(LogLevel::Debug),
        "info" => Some(LogLevel::Info),
        "warn" => Some(LogLevel::Warn),
        "error" => Some(LogLevel::Error),
        _ => None,
    }
}
