//! Request listeners
//!
//! A listener receives the add, update and delete notifications for one
//! request kind. `Ok(())` means the request is settled, `Err` asks the
//! notification substrate to redeliver it later.

use async_trait::async_trait;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::crd::StorageRequest;
use crate::error::Result;
use crate::provisioner::{BucketAccessFlow, BucketFlow, Finish, Outcome, ProvisionFlow, Provisioner};

/// Callbacks for one request kind
#[async_trait]
pub trait RequestListener<R>: Send + Sync {
    async fn add(&self, cancel: &CancellationToken, request: &R) -> Result<()>;

    async fn update(&self, cancel: &CancellationToken, old: &R, new: &R) -> Result<()>;

    async fn delete(&self, cancel: &CancellationToken, request: &R) -> Result<()>;
}

/// Translate a provisioning result into what the substrate sees
pub fn settle(result: Result<Outcome>) -> Result<()> {
    match result? {
        Outcome::Finished(Finish::Stopped(reason)) => {
            info!(%reason, "provisioning stopped");
            Ok(())
        }
        Outcome::Finished(_) => Ok(()),
        // Completion of background work is not tracked
        Outcome::InBackground => Ok(()),
        Outcome::NoChange => Ok(()),
    }
}

/// Listener that provisions a resource for every added request
pub struct ProvisioningListener<F: ProvisionFlow> {
    provisioner: Arc<Provisioner<F>>,
}

impl<F: ProvisionFlow> ProvisioningListener<F> {
    pub fn new(provisioner: Arc<Provisioner<F>>) -> Self {
        Self { provisioner }
    }
}

#[async_trait]
impl<F: ProvisionFlow> RequestListener<F::Request> for ProvisioningListener<F> {
    async fn add(&self, cancel: &CancellationToken, request: &F::Request) -> Result<()> {
        settle(self.provisioner.provision(cancel, request).await)
    }

    // Requests are not re-provisioned on spec changes.
    async fn update(
        &self,
        _cancel: &CancellationToken,
        _old: &F::Request,
        new: &F::Request,
    ) -> Result<()> {
        debug!(request = %new.request_key(), "update ignored");
        Ok(())
    }

    // Teardown of provisioned resources is owned elsewhere.
    async fn delete(&self, _cancel: &CancellationToken, request: &F::Request) -> Result<()> {
        debug!(request = %request.request_key(), "delete ignored");
        Ok(())
    }
}

pub type BucketRequestListener = ProvisioningListener<BucketFlow>;
pub type BucketAccessRequestListener = ProvisioningListener<BucketAccessFlow>;
