//! Provisioning outcomes
//!
//! Terminal results are values, never errors. An `Err` returned next to
//! these types always means "retry later".

use serde::{Deserialize, Serialize};

/// Why provisioning stopped for good
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    /// The resolved class does not exist
    ClassNotFound { class: String },
    /// The resolved class exists conceptually but cannot be used
    ClassUnavailable { class: String },
    /// The BucketRequest an access request refers to does not exist
    BucketRequestNotFound { name: String },
    /// The request itself can never be satisfied
    InvalidRequest { reason: String },
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StopReason::ClassNotFound { class } => write!(f, "class {:?} not found", class),
            StopReason::ClassUnavailable { class } => write!(f, "class {:?} is not available", class),
            StopReason::BucketRequestNotFound { name } => {
                write!(f, "bucket request {:?} not found", name)
            }
            StopReason::InvalidRequest { reason } => write!(f, "invalid request: {}", reason),
        }
    }
}

/// How a finished provisioning attempt ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Finish {
    /// This attempt created the resource
    Created { resource: String },
    /// A resource for the request was already there.
    ///
    /// `resource` is `None` when the repository reported a conflict but
    /// the winning resource is not visible yet.
    Exists { resource: Option<String> },
    /// Provisioning can never succeed for the current request
    Stopped(StopReason),
}

/// Result of one provisioning attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    /// Nothing left to do for this request
    Finished(Finish),
    /// Provisioning continues asynchronously, check again later
    InBackground,
    /// Nothing to do, keep any in-flight bookkeeping as it is
    NoChange,
}

impl Outcome {
    pub fn created(resource: impl Into<String>) -> Self {
        Outcome::Finished(Finish::Created {
            resource: resource.into(),
        })
    }

    pub fn exists(resource: Option<String>) -> Self {
        Outcome::Finished(Finish::Exists { resource })
    }

    pub fn stopped(reason: StopReason) -> Self {
        Outcome::Finished(Finish::Stopped(reason))
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, Outcome::Finished(_))
    }

    pub fn is_stopped(&self) -> bool {
        matches!(self, Outcome::Finished(Finish::Stopped(_)))
    }

    /// Name of the resource satisfying the request, when known
    pub fn resource(&self) -> Option<&str> {
        match self {
            Outcome::Finished(Finish::Created { resource }) => Some(resource),
            Outcome::Finished(Finish::Exists { resource }) => resource.as_deref(),
            _ => None,
        }
    }

    /// Short label used in metrics
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Finished(Finish::Created { .. }) => "created",
            Outcome::Finished(Finish::Exists { .. }) => "exists",
            Outcome::Finished(Finish::Stopped(_)) => "stopped",
            Outcome::InBackground => "in_background",
            Outcome::NoChange => "no_change",
        }
    }
}
