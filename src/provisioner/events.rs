//! Provisioning Events
//!
//! Emitted by the provisioner after every attempt for consumers that want
//! to react to provisioning results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::outcome::StopReason;

/// Events emitted by the provisioner
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ProvisionEvent {
    /// A resource was created for a request
    Provisioned {
        kind: String,
        request: String,
        resource: String,
        at: DateTime<Utc>,
    },

    /// A resource for the request already existed
    AlreadyProvisioned {
        kind: String,
        request: String,
        resource: Option<String>,
        at: DateTime<Utc>,
    },

    /// Provisioning stopped for good
    Stopped {
        kind: String,
        request: String,
        reason: StopReason,
        at: DateTime<Utc>,
    },

    /// The attempt failed and may be retried
    Failed {
        kind: String,
        request: String,
        error: String,
        retryable: bool,
        at: DateTime<Utc>,
    },
}

impl ProvisionEvent {
    /// `namespace/name` of the request this event is about
    pub fn request(&self) -> &str {
        match self {
            ProvisionEvent::Provisioned { request, .. } => request,
            ProvisionEvent::AlreadyProvisioned { request, .. } => request,
            ProvisionEvent::Stopped { request, .. } => request,
            ProvisionEvent::Failed { request, .. } => request,
        }
    }

    /// Kind of resource the request asks for
    pub fn kind(&self) -> &str {
        match self {
            ProvisionEvent::Provisioned { kind, .. } => kind,
            ProvisionEvent::AlreadyProvisioned { kind, .. } => kind,
            ProvisionEvent::Stopped { kind, .. } => kind,
            ProvisionEvent::Failed { kind, .. } => kind,
        }
    }

    /// Check if the request is settled after this event
    pub fn is_settled(&self) -> bool {
        !matches!(self, ProvisionEvent::Failed { .. })
    }
}
