//! BucketRequest, BucketClass and Bucket CRDs
//!
//! A user creates a BucketRequest in their namespace. The controller
//! resolves its BucketClass and materializes a cluster scoped Bucket,
//! which an out-of-process driver binds to real storage.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::common::{ObjectReference, StorageRequest};
use super::protocol::{Protocol, ProtocolSignature};

// =============================================================================
// BucketRequest CRD
// =============================================================================

/// Request for a new bucket, submitted in the consumer's namespace
#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "objectstorage.k8s.io",
    version = "v1alpha1",
    kind = "BucketRequest",
    plural = "bucketrequests",
    shortname = "br",
    printcolumn = r#"{"name": "Class", "type": "string", "jsonPath": ".spec.bucketClassName"}"#,
    printcolumn = r#"{"name": "Bucket", "type": "string", "jsonPath": ".spec.bucketInstanceName"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#,
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct BucketRequestSpec {
    /// Prefix for the name of the backing bucket
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket_prefix: Option<String>,

    /// BucketClass to provision from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket_class_name: Option<String>,

    /// Requested protocol; the configured default is used when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<ProtocolSignature>,

    /// Bucket provisioned for this request, recorded by the controller
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket_instance_name: Option<String>,
}

impl StorageRequest for BucketRequest {
    fn spec_class_name(&self) -> Option<&str> {
        self.spec.bucket_class_name.as_deref()
    }

    fn bound_resource(&self) -> Option<&str> {
        self.spec.bucket_instance_name.as_deref()
    }
}

// =============================================================================
// BucketClass CRD
// =============================================================================

/// Administrator defined template for provisioning buckets
#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "objectstorage.k8s.io",
    version = "v1alpha1",
    kind = "BucketClass",
    plural = "bucketclasses",
    shortname = "bc",
    printcolumn = r#"{"name": "Provisioner", "type": "string", "jsonPath": ".spec.provisioner"}"#,
    printcolumn = r#"{"name": "Policy", "type": "string", "jsonPath": ".spec.releasePolicy"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct BucketClassSpec {
    /// Driver responsible for buckets of this class
    pub provisioner: String,

    /// What happens to the backing bucket once released
    #[serde(default)]
    pub release_policy: ReleasePolicy,

    /// Namespaces allowed to use buckets of this class
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_namespaces: Option<Vec<String>>,

    /// Opaque parameters handed to the driver
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<BTreeMap<String, String>>,
}

/// Release policy for a bucket
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub enum ReleasePolicy {
    #[default]
    Retain,
    Delete,
}

impl std::fmt::Display for ReleasePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReleasePolicy::Retain => write!(f, "Retain"),
            ReleasePolicy::Delete => write!(f, "Delete"),
        }
    }
}

// =============================================================================
// Bucket CRD
// =============================================================================

/// Materialized bucket descriptor, created once per satisfied BucketRequest
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "objectstorage.k8s.io",
    version = "v1alpha1",
    kind = "Bucket",
    plural = "buckets",
    printcolumn = r#"{"name": "Class", "type": "string", "jsonPath": ".spec.bucketClassName"}"#,
    printcolumn = r#"{"name": "Provisioner", "type": "string", "jsonPath": ".spec.provisioner"}"#,
    printcolumn = r#"{"name": "Protocol", "type": "string", "jsonPath": ".spec.protocol.protocolSignature"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct BucketSpec {
    pub provisioner: String,

    #[serde(default)]
    pub release_policy: ReleasePolicy,

    #[serde(default)]
    pub anonymous_access_mode: AnonymousAccessMode,

    pub bucket_class_name: String,

    /// Request this bucket was provisioned for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket_request: Option<ObjectReference>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_namespaces: Option<Vec<String>>,

    /// BucketAccess objects bound to this bucket
    #[serde(default)]
    pub bucket_access_bindings: Vec<String>,

    pub protocol: Protocol,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<BTreeMap<String, String>>,
}

/// Anonymous access granted on a bucket
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AnonymousAccessMode {
    #[serde(default)]
    pub private: bool,
    #[serde(default)]
    pub public_read_only: bool,
    #[serde(default)]
    pub public_write_only: bool,
    #[serde(default)]
    pub public_read_write: bool,
}

impl AnonymousAccessMode {
    pub fn public_read_write() -> Self {
        Self {
            public_read_write: true,
            ..Default::default()
        }
    }
}
