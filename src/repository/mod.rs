//! Object Repository Adapters
//!
//! Implementations of [`crate::domain::ObjectRepository`]:
//! - Kubernetes API server
//! - In-memory store

pub mod kube_api;
pub mod memory;

pub use kube_api::*;
pub use memory::*;
