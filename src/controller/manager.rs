//! Controller manager
//!
//! Owns both provisioning engines and the watch loops feeding them.

use kube::api::Api;
use kube::Client;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::retry::RetryConfig;
use super::listener::{BucketAccessRequestListener, BucketRequestListener};
use super::runner::{self, ListenerContext};
use crate::crd::{BucketAccessRequest, BucketRequest};
use crate::domain::ports::ObjectRepositoryRef;
use crate::provisioner::{BucketAccessFlow, BucketDefaults, BucketFlow, ProvisionMetrics, Provisioner};

/// Configuration for the controller manager
#[derive(Debug, Clone, Default)]
pub struct ControllerManagerConfig {
    /// Values for Bucket fields no request or class sets
    pub bucket: BucketDefaults,
    /// Retry behaviour of both watch loops
    pub retry: RetryConfig,
}

/// Runs the BucketRequest and BucketAccessRequest controllers
pub struct ControllerManager {
    bucket_requests: Arc<ListenerContext<BucketRequest>>,
    access_requests: Arc<ListenerContext<BucketAccessRequest>>,
    cancel: CancellationToken,
}

impl ControllerManager {
    pub fn new(
        config: ControllerManagerConfig,
        repo: ObjectRepositoryRef,
        metrics: Option<Arc<ProvisionMetrics>>,
        cancel: CancellationToken,
    ) -> Self {
        let mut buckets = Provisioner::new(BucketFlow::new(repo.clone(), config.bucket));
        let mut accesses = Provisioner::new(BucketAccessFlow::new(repo));
        if let Some(metrics) = metrics {
            buckets = buckets.with_metrics(metrics.clone());
            accesses = accesses.with_metrics(metrics);
        }
        let bucket_requests = Arc::new(ListenerContext::<BucketRequest>::new(
            Arc::new(BucketRequestListener::new(Arc::new(buckets))),
            config.retry.clone(),
            cancel.clone(),
        ));
        let access_requests = Arc::new(ListenerContext::<BucketAccessRequest>::new(
            Arc::new(BucketAccessRequestListener::new(Arc::new(accesses))),
            config.retry,
            cancel.clone(),
        ));

        Self {
            bucket_requests,
            access_requests,
            cancel,
        }
    }

    pub fn bucket_requests(&self) -> &Arc<ListenerContext<BucketRequest>> {
        &self.bucket_requests
    }

    pub fn bucket_access_requests(&self) -> &Arc<ListenerContext<BucketAccessRequest>> {
        &self.access_requests
    }

    /// Stop both watch loops and abort provisioning in progress
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Watch requests in every namespace until shut down
    pub async fn run(&self, client: Client) {
        info!("starting controller manager");

        tokio::join!(
            runner::run(
                Api::<BucketRequest>::all(client.clone()),
                self.bucket_requests.clone()
            ),
            runner::run(
                Api::<BucketAccessRequest>::all(client),
                self.access_requests.clone()
            ),
        );

        info!("controller manager stopped");
    }
}
