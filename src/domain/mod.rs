//! Domain layer
//!
//! Ports through which the provisioning engine reaches the cluster's
//! object store. Adapters live in [`crate::repository`].

pub mod ports;

pub use ports::*;
