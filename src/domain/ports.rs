//! Domain Ports - the object store seen by the provisioning engine
//!
//! Lookups are point-in-time reads and may lag behind writes. Callers
//! must not rely on a lookup observing a create that just succeeded.

use crate::crd::{Bucket, BucketAccess, BucketAccessClass, BucketClass, BucketRequest};
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

// =============================================================================
// Request Reference
// =============================================================================

/// Identity of the request a resource is provisioned for
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestRef {
    pub namespace: String,
    pub name: String,
    pub uid: Option<String>,
}

impl RequestRef {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            uid: None,
        }
    }

    /// `namespace/name` key
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

impl std::fmt::Display for RequestRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

// =============================================================================
// Object Repository Port
// =============================================================================

/// Port for reading and creating the objects the engine works with.
///
/// `create_*` report an object that is already present as
/// [`crate::Error::ResourceExists`]. Implementations that know the
/// originating request must also report `ResourceExists` when a resource
/// for the same request is already stored.
#[async_trait]
pub trait ObjectRepository: Send + Sync {
    // -------------------------------------------------------------------------
    // Buckets
    // -------------------------------------------------------------------------

    /// Get a bucket by name
    async fn get_bucket(&self, name: &str) -> Result<Option<Bucket>>;

    /// Find the bucket created for a request, by origin labels
    async fn find_bucket_for(&self, origin: &RequestRef) -> Result<Option<Bucket>>;

    /// Create a bucket
    async fn create_bucket(&self, bucket: &Bucket) -> Result<Bucket>;

    /// Get a bucket class by name
    async fn get_bucket_class(&self, name: &str) -> Result<Option<BucketClass>>;

    /// Get a bucket request
    async fn get_bucket_request(&self, namespace: &str, name: &str)
        -> Result<Option<BucketRequest>>;

    /// Record the provisioned bucket on its request
    async fn bind_bucket_request(&self, origin: &RequestRef, bucket_name: &str) -> Result<()>;

    // -------------------------------------------------------------------------
    // Bucket accesses
    // -------------------------------------------------------------------------

    /// Get a bucket access by name
    async fn get_bucket_access(&self, name: &str) -> Result<Option<BucketAccess>>;

    /// Find the bucket access created for a request, by origin labels
    async fn find_bucket_access_for(&self, origin: &RequestRef) -> Result<Option<BucketAccess>>;

    /// Create a bucket access
    async fn create_bucket_access(&self, access: &BucketAccess) -> Result<BucketAccess>;

    /// Get a bucket access class by name
    async fn get_bucket_access_class(&self, name: &str) -> Result<Option<BucketAccessClass>>;

    /// Record the provisioned bucket access on its request
    async fn bind_bucket_access_request(
        &self,
        origin: &RequestRef,
        access_name: &str,
    ) -> Result<()>;

    // -------------------------------------------------------------------------
    // Policy documents
    // -------------------------------------------------------------------------

    /// Read the data of a ConfigMap
    async fn get_config_map_data(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, String>>>;
}

// =============================================================================
// Type Aliases for Arc'd Traits
// =============================================================================

pub type ObjectRepositoryRef = Arc<dyn ObjectRepository>;
