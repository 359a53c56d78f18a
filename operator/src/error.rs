use std::time::Duration;

use kube::Error as KubeError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Kubernetes API error: {0}")]
    Kube(#[source] KubeError),

    #[error("{0} not found")]
    NotFound(String),

    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error("conflict updating {0}: object has been modified")]
    Conflict(String),

    #[error("invalid object key {0:?}")]
    InvalidKey(String),

    #[error("invalid spec for {key}: {reason}")]
    InvalidSpec { key: String, reason: String },

    #[error("timed out waiting for caches to sync")]
    CacheSync,

    #[error("reconcile timed out after {0:?}")]
    Timeout(Duration),

    #[error("reconcile panicked: {0}")]
    Panicked(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict(_))
    }

    /// Errors that cannot be fixed by trying the same key again.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Error::InvalidKey(_) | Error::InvalidSpec { .. } | Error::Config(_)
        )
    }

    /// Short label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Kube(_) => "api",
            Error::NotFound(_) => "not_found",
            Error::AlreadyExists(_) => "already_exists",
            Error::Conflict(_) => "conflict",
            Error::InvalidKey(_) => "invalid_key",
            Error::InvalidSpec { .. } => "invalid_spec",
            Error::CacheSync => "cache_sync",
            Error::Timeout(_) => "timeout",
            Error::Panicked(_) => "panic",
            Error::Config(_) => "config",
            Error::Metrics(_) => "metrics",
        }
    }

    /// Classifies an API error against the object it was issued for.
    pub fn from_kube(err: KubeError, object: impl Into<String>) -> Self {
        match &err {
            KubeError::Api(resp) if resp.code == 404 => Error::NotFound(object.into()),
            KubeError::Api(resp) if resp.code == 409 && resp.reason == "AlreadyExists" => {
                Error::AlreadyExists(object.into())
            }
            KubeError::Api(resp) if resp.code == 409 => Error::Conflict(object.into()),
            _ => Error::Kube(err),
        }
    }
}

impl From<KubeError> for Error {
    fn from(err: KubeError) -> Self {
        Error::from_kube(err, "object")
    }
}
