//! Error types surfaced by the engine.

use pictor_registry::PathError;
use std::io;
use thiserror::Error;
use tracing::info;

/// Errors reported to load callbacks and returned by the loader facade.
///
/// Errors are `Clone` because one failed job fans its failure out to every
/// callback waiting on it.
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    /// A data fetcher failed.
    #[error("Fetch failed: {0}")]
    Fetch(String),

    /// Every decoder on a path rejected or failed on the data.
    #[error("Decode failed: {message}")]
    Decode {
        /// Description of the path that failed.
        message: String,
        /// Failures of the individual decoders or nested paths.
        causes: Vec<EngineError>,
    },

    /// No decoder/transcoder chain exists for the requested types.
    #[error("No load path: {0}")]
    NoLoadPath(String),

    /// The disk cache strategy asked for a resource to be cached but no
    /// encoder is registered for it.
    #[error("No result encoder: {0}")]
    NoResultEncoder(String),

    /// A transformation failed.
    #[error("Transformation failed: {0}")]
    Transformation(String),

    /// The load was cancelled.
    #[error("Load cancelled")]
    Cancelled,

    /// Every stage of the pipeline was exhausted without a result.
    #[error("{message}")]
    LoadFailed {
        /// Summary of the failed load.
        message: String,
        /// Everything that went wrong along the way.
        causes: Vec<EngineError>,
    },

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The loader has been shut down.
    #[error("Loader shut down")]
    Shutdown,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<io::Error> for EngineError {
    fn from(err: io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl EngineError {
    /// Convert a collected cause into an engine error, keeping nested path
    /// failures as structured causes.
    pub fn from_cause(err: &anyhow::Error) -> Self {
        if let Some(engine) = err.downcast_ref::<EngineError>() {
            return engine.clone();
        }
        if let Some(path) = err.downcast_ref::<PathError>() {
            return Self::Decode {
                message: path.message.clone(),
                causes: path.causes.iter().map(Self::from_cause).collect(),
            };
        }
        if let Some(io) = err.downcast_ref::<io::Error>() {
            return Self::Io(io.to_string());
        }
        Self::Decode { message: format!("{err:#}"), causes: Vec::new() }
    }

    /// The leaves of the cause tree, in the order they occurred.
    #[must_use]
    pub fn root_causes(&self) -> Vec<&EngineError> {
        let mut roots = Vec::new();
        self.collect_roots(&mut roots);
        roots
    }

    fn collect_roots<'a>(&'a self, roots: &mut Vec<&'a EngineError>) {
        match self {
            Self::LoadFailed { causes, .. } | Self::Decode { causes, .. } if !causes.is_empty() => {
                for cause in causes {
                    cause.collect_roots(roots);
                }
            }
            _ => roots.push(self),
        }
    }

    /// Log every root cause at info level.
    pub fn log_root_causes(&self, context: &str) {
        let roots = self.root_causes();
        for (i, cause) in roots.iter().enumerate() {
            info!("{context}: root cause ({} of {}): {cause}", i + 1, roots.len());
        }
    }

    /// Returns true if retrying the load may succeed.
    ///
    /// Fetch and I/O failures are transient; a load that failed only because
    /// of them is retryable. Missing paths, missing encoders and decode
    /// failures will fail the same way again.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Fetch(_) | Self::Io(_) | Self::Cancelled => true,
            Self::LoadFailed { causes, .. } => {
                !causes.is_empty() && self.root_causes().iter().all(|c| c.is_retryable())
            }
            _ => false,
        }
    }

    /// Returns true if this is a fatal error that should not be retried.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !self.is_retryable()
    }
}
