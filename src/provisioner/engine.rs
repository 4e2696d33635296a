//! Generic provisioning engine
//!
//! Both request kinds follow the same procedure:
//!
//! ```text
//! lock request ─► existing resource? ─yes─► bind, Finished(Exists)
//!                      │ no
//!                      ▼
//!                resolve class ─missing─► Finished(Stopped)
//!                      │
//!                      ▼
//!              resolve dependency ─missing─► Finished(Stopped)
//!                      │
//!                      ▼
//!          build with fresh name ─► create ─► bind ─► Finished(Created)
//!                                     │
//!                                already exists ─► Finished(Exists)
//! ```
//!
//! The existence check always runs before a resource is built. A flow
//! supplies the kind specific lookups and construction through
//! [`ProvisionFlow`].

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::events::ProvisionEvent;
use super::inflight::InFlightRequests;
use super::metrics::ProvisionMetrics;
use super::outcome::{Finish, Outcome, StopReason};
use crate::crd::StorageRequest;
use crate::domain::ports::RequestRef;
use crate::error::{Error, Result};
use crate::util::generate_unique_id;

/// Capacity of the provisioning event channel
const EVENT_CHANNEL_CAPACITY: usize = 256;

// =============================================================================
// Flow Capability
// =============================================================================

/// Result of resolving what a request depends on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution<D> {
    Ready(D),
    Stop(StopReason),
}

/// Kind specific steps of the provisioning procedure
#[async_trait]
pub trait ProvisionFlow: Send + Sync + 'static {
    type Request: StorageRequest + Send + Sync;
    type Class: Send + Sync;
    type Dependency: Send;
    type Resource: Send + Sync;

    /// Kind of the resource this flow creates
    fn resource_kind(&self) -> &'static str;

    /// Name of a resource already provisioned for the request
    async fn find_existing(
        &self,
        request: &Self::Request,
        origin: &RequestRef,
    ) -> Result<Option<String>>;

    async fn resolve_class(&self, name: &str) -> Result<Option<Self::Class>>;

    /// Terminal reason reported when the class cannot be resolved
    fn missing_class(&self, name: &str) -> StopReason;

    /// Resolve the objects the request needs beyond its class.
    ///
    /// Return `Err` for anything that may resolve on a later attempt.
    async fn resolve_dependency(
        &self,
        request: &Self::Request,
        origin: &RequestRef,
        class: &Self::Class,
    ) -> Result<Resolution<Self::Dependency>>;

    /// Build the resource to create. Must not touch the repository.
    fn build_resource(
        &self,
        name: String,
        request: &Self::Request,
        origin: &RequestRef,
        class: &Self::Class,
        dependency: Self::Dependency,
    ) -> Self::Resource;

    /// Create the resource, returning its name
    async fn create_resource(&self, resource: &Self::Resource) -> Result<String>;

    /// Record the resource on the request
    async fn bind(&self, origin: &RequestRef, resource: &str) -> Result<()>;
}

// =============================================================================
// Provisioner
// =============================================================================

/// Provisioning engine for one request kind
pub struct Provisioner<F: ProvisionFlow> {
    flow: F,
    in_flight: InFlightRequests,
    metrics: Option<Arc<ProvisionMetrics>>,
    events: broadcast::Sender<ProvisionEvent>,
}

impl<F: ProvisionFlow> Provisioner<F> {
    pub fn new(flow: F) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            flow,
            in_flight: InFlightRequests::new(),
            metrics: None,
            events,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<ProvisionMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Subscribe to provisioning events
    pub fn subscribe(&self) -> broadcast::Receiver<ProvisionEvent> {
        self.events.subscribe()
    }

    /// Number of requests currently being provisioned
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Provision the resource for `request`.
    ///
    /// Safe to call repeatedly and concurrently for the same request.
    /// `Ok` outcomes are settled, `Err` means retry.
    #[instrument(skip(self, cancel, request), fields(kind = self.flow.resource_kind(), request = %request.request_key()))]
    pub async fn provision(
        &self,
        cancel: &CancellationToken,
        request: &F::Request,
    ) -> Result<Outcome> {
        let key = request.request_key();
        let started = Instant::now();

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(Error::Cancelled { key: key.clone() }),
            result = self.provision_locked(request) => result,
        };

        self.record(&key, &result, started.elapsed());
        result
    }

    async fn provision_locked(&self, request: &F::Request) -> Result<Outcome> {
        let origin = match request.request_ref() {
            Ok(origin) => origin,
            Err(e) => {
                warn!(error = %e, "request cannot be provisioned");
                return Ok(Outcome::stopped(StopReason::InvalidRequest {
                    reason: e.to_string(),
                }));
            }
        };

        let _guard = self.in_flight.acquire(origin.key()).await;
        let class_name = request.class_name();

        if let Some(existing) = self.flow.find_existing(request, &origin).await? {
            if request.bound_resource() != Some(existing.as_str()) {
                self.flow.bind(&origin, &existing).await?;
            }
            debug!(resource = %existing, "already provisioned");
            return Ok(Outcome::exists(Some(existing)));
        }

        let class = if class_name.is_empty() {
            None
        } else {
            self.flow.resolve_class(&class_name).await?
        };
        let Some(class) = class else {
            warn!(class = %class_name, "class not resolved, not provisioning");
            return Ok(Outcome::stopped(self.flow.missing_class(&class_name)));
        };

        let dependency = match self
            .flow
            .resolve_dependency(request, &origin, &class)
            .await?
        {
            Resolution::Ready(dependency) => dependency,
            Resolution::Stop(reason) => {
                warn!(%reason, "dependency not resolved, not provisioning");
                return Ok(Outcome::stopped(reason));
            }
        };

        let name = generate_unique_id();
        let resource = self
            .flow
            .build_resource(name.clone(), request, &origin, &class, dependency);

        match self.flow.create_resource(&resource).await {
            Ok(created) => {
                self.flow.bind(&origin, &created).await?;
                info!(resource = %created, class = %class_name, "provisioned");
                Ok(Outcome::created(created))
            }
            Err(e) if e.is_already_exists() => {
                debug!(resource = %name, "resource for request already exists");
                let existing = self.flow.find_existing(request, &origin).await?;
                if let Some(existing) = &existing {
                    self.flow.bind(&origin, existing).await?;
                }
                Ok(Outcome::exists(existing))
            }
            Err(e) => Err(e),
        }
    }

    fn record(&self, key: &str, result: &Result<Outcome>, elapsed: Duration) {
        let kind = self.flow.resource_kind();

        if let Some(metrics) = &self.metrics {
            let label = match result {
                Ok(outcome) => outcome.label(),
                Err(_) => "error",
            };
            metrics.observe(kind, label, elapsed);
        }

        let kind = kind.to_string();
        let request = key.to_string();
        let at = Utc::now();
        let event = match result {
            Ok(Outcome::Finished(Finish::Created { resource })) => ProvisionEvent::Provisioned {
                kind,
                request,
                resource: resource.clone(),
                at,
            },
            Ok(Outcome::Finished(Finish::Exists { resource })) => {
                ProvisionEvent::AlreadyProvisioned {
                    kind,
                    request,
                    resource: resource.clone(),
                    at,
                }
            }
            Ok(Outcome::Finished(Finish::Stopped(reason))) => ProvisionEvent::Stopped {
                kind,
                request,
                reason: reason.clone(),
                at,
            },
            Ok(Outcome::InBackground) | Ok(Outcome::NoChange) => return,
            Err(e) => ProvisionEvent::Failed {
                kind,
                request,
                error: e.to_string(),
                retryable: e.is_retryable(),
                at,
            },
        };

        // No subscribers is fine
        let _ = self.events.send(event);
    }
}
