//! Startup-selected model capabilities and explicit fallback results.
//!
//! Every external model sits behind a trait object stored in a
//! [`Capability`] slot. The slot is decided once, when the service is
//! built: a missing model file yields [`Capability::Unavailable`], a model
//! that fails to initialise yields [`Capability::Error`]. Adapters consult
//! the slot on each call and return a [`Signal`] instead of an error, so a
//! degraded model never aborts the rest of the frame.

use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("model file not found: {0}")]
    Missing(PathBuf),
    #[error("failed to load model {path}: {reason}")]
    Load { path: PathBuf, reason: String },
    #[error("inference failed: {0}")]
    Inference(String),
    #[error("unexpected model output: {0}")]
    Output(String),
}

/// Health of one subsystem as reported by `health()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelStatus {
    Loaded,
    Unavailable,
    Error,
}

impl fmt::Display for ModelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ModelStatus::Loaded => "loaded",
            ModelStatus::Unavailable => "unavailable",
            ModelStatus::Error => "error",
        })
    }
}

/// A model binding chosen at startup.
pub enum Capability<M: ?Sized> {
    Loaded(Box<M>),
    Unavailable,
    Error(String),
}

impl<M: ?Sized> Capability<M> {
    /// Try to load the model at `path`.
    ///
    /// The outcome is logged here, once; adapters do not log again when
    /// they fall back because the model is absent.
    pub fn load<F>(name: &str, path: &Path, loader: F) -> Self
    where
        F: FnOnce(&Path) -> Result<Box<M>, ModelError>,
    {
        if !path.exists() {
            tracing::warn!(
                model = name,
                path = %path.display(),
                "model file not found, using fallback"
            );
            return Capability::Unavailable;
        }

        match loader(path) {
            Ok(model) => {
                tracing::info!(model = name, path = %path.display(), "model loaded");
                Capability::Loaded(model)
            }
            Err(ModelError::Missing(_)) => {
                tracing::warn!(model = name, path = %path.display(), "model file vanished, using fallback");
                Capability::Unavailable
            }
            Err(e) => {
                tracing::error!(model = name, error = %e, "model failed to load, using fallback");
                Capability::Error(e.to_string())
            }
        }
    }

    pub fn status(&self) -> ModelStatus {
        match self {
            Capability::Loaded(_) => ModelStatus::Loaded,
            Capability::Unavailable => ModelStatus::Unavailable,
            Capability::Error(_) => ModelStatus::Error,
        }
    }

    pub fn get(&self) -> Option<&M> {
        match self {
            Capability::Loaded(model) => Some(model.as_ref()),
            _ => None,
        }
    }
}

impl<M: ?Sized> fmt::Debug for Capability<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::Loaded(_) => f.write_str("Loaded"),
            Capability::Unavailable => f.write_str("Unavailable"),
            Capability::Error(reason) => f.debug_tuple("Error").field(reason).finish(),
        }
    }
}

/// Why an adapter returned its fallback value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackReason {
    /// The model was not available at startup.
    Unavailable,
    /// The model was available but this particular call failed.
    Failed,
    /// The model ran but produced nothing usable (e.g. no emotion result).
    Empty,
}

/// Adapter output: either a real measurement or the documented fallback.
#[derive(Debug, Clone, PartialEq)]
pub enum Signal<T> {
    Measured(T),
    Fallback(T, FallbackReason),
}

impl<T> Signal<T> {
    pub fn value(&self) -> &T {
        match self {
            Signal::Measured(v) | Signal::Fallback(v, _) => v,
        }
    }

    pub fn into_value(self) -> T {
        match self {
            Signal::Measured(v) | Signal::Fallback(v, _) => v,
        }
    }

    pub fn fallback_reason(&self) -> Option<FallbackReason> {
        match self {
            Signal::Measured(_) => None,
            Signal::Fallback(_, reason) => Some(*reason),
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Signal::Fallback(..))
    }
}
