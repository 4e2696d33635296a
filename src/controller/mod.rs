//! Request controllers
//!
//! Adapts kube-runtime notifications to the provisioning engines.

pub mod retry;
pub mod listener;
pub mod manager;
pub mod runner;

pub use retry::{RetryConfig, RetryTracker};
pub use listener::{
    settle, BucketAccessRequestListener, BucketRequestListener, ProvisioningListener,
    RequestListener,
};
pub use manager::{ControllerManager, ControllerManagerConfig};
pub use runner::{error_policy, reconcile, Delivery, ListenerContext};
