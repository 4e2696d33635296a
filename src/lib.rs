//! COSI Controller Manager
//!
//! Provisions cluster scoped Bucket and BucketAccess objects for the
//! BucketRequest and BucketAccessRequest objects users create in their
//! namespaces. Drivers bind the resulting objects to real storage.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │              kube-runtime Controllers (per kind)             │
//! │        add / update / delete  ─►  RequestListener            │
//! ├──────────────────────────────────────────────────────────────┤
//! │                    Provisioner<F: ProvisionFlow>             │
//! │   in-flight lock ─► existing? ─► class ─► dependency ─► build│
//! │  ┌─────────────────────────┐  ┌───────────────────────────┐  │
//! │  │       BucketFlow        │  │     BucketAccessFlow      │  │
//! │  └─────────────────────────┘  └───────────────────────────┘  │
//! ├──────────────────────────────────────────────────────────────┤
//! │                      ObjectRepository                        │
//! │  ┌─────────────────────────┐  ┌───────────────────────────┐  │
//! │  │     KubeRepository      │  │    InMemoryRepository     │  │
//! │  └─────────────────────────┘  └───────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//!
//! - [`controller`]: Watch loops, request listeners and retry delays
//! - [`provisioner`]: Provisioning engine and the per-kind flows
//! - [`repository`]: Object repository implementations
//! - [`crd`]: Custom Resource Definitions
//! - [`domain`]: Ports used by the engine
//! - [`error`]: Error types and handling

pub mod controller;
pub mod crd;
pub mod domain;
pub mod error;
pub mod provisioner;
pub mod repository;
pub mod util;

// Re-export commonly used types
pub use controller::{
    ControllerManager, ControllerManagerConfig, ListenerContext, ProvisioningListener,
    RequestListener, RetryConfig,
};

pub use crd::{
    all_crds, Bucket, BucketAccess, BucketAccessClass, BucketAccessRequest, BucketClass,
    BucketRequest, Protocol, ProtocolSignature, StorageRequest,
};

pub use domain::ports::{ObjectRepository, ObjectRepositoryRef, RequestRef};

pub use error::{Error, ErrorAction, Result};

pub use provisioner::{
    BucketAccessFlow, BucketDefaults, BucketFlow, Finish, Outcome, ProvisionEvent, ProvisionFlow,
    ProvisionMetrics, Provisioner, StopReason,
};

pub use repository::{InMemoryRepository, KubeRepository};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library name
pub const NAME: &str = env!("CARGO_PKG_NAME");
