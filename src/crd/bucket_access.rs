//! BucketAccessRequest, BucketAccessClass and BucketAccess CRDs

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::common::{ObjectReference, StorageRequest};

// =============================================================================
// BucketAccessRequest CRD
// =============================================================================

/// Request for access to the bucket provisioned for a BucketRequest
#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "objectstorage.k8s.io",
    version = "v1alpha1",
    kind = "BucketAccessRequest",
    plural = "bucketaccessrequests",
    shortname = "bar",
    printcolumn = r#"{"name": "BucketRequest", "type": "string", "jsonPath": ".spec.bucketRequestName"}"#,
    printcolumn = r#"{"name": "Access", "type": "string", "jsonPath": ".spec.bucketAccessName"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#,
    namespaced
)]
#[serde(rename_all = "camelCase")]
pub struct BucketAccessRequestSpec {
    /// Service account the access is granted to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account_name: Option<String>,

    /// BucketRequest, in the same namespace, whose bucket is accessed
    pub bucket_request_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket_access_class_name: Option<String>,

    /// BucketAccess provisioned for this request, recorded by the controller
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket_access_name: Option<String>,
}

impl StorageRequest for BucketAccessRequest {
    fn spec_class_name(&self) -> Option<&str> {
        self.spec.bucket_access_class_name.as_deref()
    }

    fn bound_resource(&self) -> Option<&str> {
        self.spec.bucket_access_name.as_deref()
    }
}

// =============================================================================
// BucketAccessClass CRD
// =============================================================================

/// Administrator defined template for access grants
#[derive(CustomResource, Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "objectstorage.k8s.io",
    version = "v1alpha1",
    kind = "BucketAccessClass",
    plural = "bucketaccessclasses",
    shortname = "bac",
    printcolumn = r#"{"name": "Provisioner", "type": "string", "jsonPath": ".spec.provisioner"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct BucketAccessClassSpec {
    pub provisioner: String,

    /// ConfigMap holding the policy actions granted by this class
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_actions_config_map: Option<ObjectReference>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<BTreeMap<String, String>>,
}

// =============================================================================
// BucketAccess CRD
// =============================================================================

/// Materialized access grant
#[derive(CustomResource, Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
#[kube(
    group = "objectstorage.k8s.io",
    version = "v1alpha1",
    kind = "BucketAccess",
    plural = "bucketaccesses",
    printcolumn = r#"{"name": "Bucket", "type": "string", "jsonPath": ".spec.bucketInstanceName"}"#,
    printcolumn = r#"{"name": "Principal", "type": "string", "jsonPath": ".spec.principal"}"#,
    printcolumn = r#"{"name": "Age", "type": "date", "jsonPath": ".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct BucketAccessSpec {
    /// Bucket the access is granted on
    pub bucket_instance_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bucket_access_request: Option<ObjectReference>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account: Option<String>,

    /// Secret holding credentials, written by the driver
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minted_secret_name: Option<String>,

    /// Policy actions document, JSON encoded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_actions_config_map_data: Option<String>,

    pub principal: String,

    pub provisioner: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<BTreeMap<String, String>>,
}
