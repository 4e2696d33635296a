//! Error types for the COSI controller manager
//!
//! Terminal provisioning results are not errors here: they travel as
//! [`crate::provisioner::Outcome`] values. Everything in this module is
//! either retried by the notification substrate or requires a spec change.

use std::time::Duration;
use thiserror::Error;

/// Unified error type for the controller manager
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Kubernetes / Repository Errors
    // =========================================================================
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    #[error("Resource not found: {kind}/{name}")]
    ResourceNotFound { kind: String, name: String },

    #[error("Resource already exists: {kind}/{name}")]
    ResourceExists { kind: String, name: String },

    #[error("Repository unavailable: {0}")]
    RepositoryUnavailable(String),

    // =========================================================================
    // Provisioning Errors
    // =========================================================================
    #[error("Invalid request {key}: {reason}")]
    InvalidRequest { key: String, reason: String },

    #[error("Dependency not ready for {key}: {reason}")]
    DependencyNotReady { key: String, reason: String },

    #[error("Provisioning cancelled for {key}")]
    Cancelled { key: String },

    // =========================================================================
    // Metrics Errors
    // =========================================================================
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),
}

/// Action to take on error during reconciliation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Requeue with exponential backoff
    RequeueWithBackoff,
    /// Requeue after specific duration
    RequeueAfter(Duration),
    /// Don't requeue, wait for changes
    NoRequeue,
}

/// Requeue delay used while a referenced object is not ready yet
pub const DEPENDENCY_REQUEUE: Duration = Duration::from_secs(10);

impl Error {
    /// Determine what action to take for this error
    pub fn action(&self) -> ErrorAction {
        match self {
            // Waiting on another object to converge
            Error::DependencyNotReady { .. } => ErrorAction::RequeueAfter(DEPENDENCY_REQUEUE),

            // Validation errors - don't retry automatically
            Error::InvalidRequest { .. } => ErrorAction::NoRequeue,

            // Transient errors and everything else - retry with backoff
            _ => ErrorAction::RequeueWithBackoff,
        }
    }

    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        !matches!(self.action(), ErrorAction::NoRequeue)
    }

    /// Check if this error is transient
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Kube(_) | Error::RepositoryUnavailable(_) | Error::Cancelled { .. }
        )
    }

    /// Check if a create failed because the object is already there
    pub fn is_already_exists(&self) -> bool {
        match self {
            Error::ResourceExists { .. } => true,
            Error::Kube(kube::Error::Api(ae)) => ae.code == 409 || ae.reason == "AlreadyExists",
            _ => false,
        }
    }

    /// Check if a lookup failed because the object is absent
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::ResourceNotFound { .. } => true,
            Error::Kube(kube::Error::Api(ae)) => ae.code == 404,
            _ => false,
        }
    }
}

/// Result type alias for the controller manager
pub type Result<T> = std::result::Result<T, Error>;
