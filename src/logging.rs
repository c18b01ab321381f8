//! Runtime-adjustable log level
//!
//! The subscriber is built once in `main`; the returned handle is passed to
//! the reconciler so the `logVerbosity` field of the singleton can retune the
//! filter without touching any global.

use crate::crd::LogVerbosity;
use crate::error::{OperatorError, Result};
use std::sync::Mutex;
use tracing::info;
use tracing_subscriber::{
    layer::SubscriberExt, reload, util::SubscriberInitExt, EnvFilter, Registry,
};

/// Something that can change the process log level.
pub trait LogLevelControl: Send + Sync {
    /// Apply the verbosity. Returns `true` when the filter was changed.
    fn set_verbosity(&self, verbosity: LogVerbosity) -> Result<bool>;
}

/// Filter directive for a verbosity level
pub fn directive(verbosity: LogVerbosity) -> &'static str {
    match verbosity {
        LogVerbosity::Normal => "info",
        LogVerbosity::Debug => "info,multiarch_tuning_operator=debug",
        LogVerbosity::Trace => "info,multiarch_tuning_operator=trace",
        LogVerbosity::TraceAll => "trace",
    }
}

/// [`LogLevelControl`] backed by a `tracing_subscriber::reload` handle
pub struct ReloadableLogLevel {
    handle: reload::Handle<EnvFilter, Registry>,
    current: Mutex<Option<LogVerbosity>>,
}

impl ReloadableLogLevel {
    /// Install the global subscriber (JSON output) and return its level handle.
    ///
    /// `RUST_LOG` seeds the initial filter; the first reconcile replaces it.
    pub fn init() -> Self {
        let initial = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let (filter, handle) = reload::Layer::new(initial);
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
        Self {
            handle,
            current: Mutex::new(None),
        }
    }
}

impl LogLevelControl for ReloadableLogLevel {
    fn set_verbosity(&self, verbosity: LogVerbosity) -> Result<bool> {
        let mut current = self
            .current
            .lock()
            .map_err(|e| OperatorError::InvalidState(format!("log level lock poisoned: {}", e)))?;
        if *current == Some(verbosity) {
            return Ok(false);
        }
        self.handle
            .reload(EnvFilter::new(directive(verbosity)))
            .map_err(|e| OperatorError::Configuration(format!("reloading log filter: {}", e)))?;
        *current = Some(verbosity);
        info!(verbosity = ?verbosity, "Log verbosity changed");
        Ok(true)
    }
}

/// Records requested levels without touching the subscriber
#[cfg(test)]
#[derive(Default)]
pub struct RecordingLogLevel {
    pub applied: Mutex<Vec<LogVerbosity>>,
}

#[cfg(test)]
impl LogLevelControl for RecordingLogLevel {
    fn set_verbosity(&self, verbosity: LogVerbosity) -> Result<bool> {
        let mut applied = self.applied.lock().unwrap();
        if applied.last() == Some(&verbosity) {
            return Ok(false);
        }
        applied.push(verbosity);
        Ok(true)
    }
}
