//! Custom Resource Definitions for the COSI controller manager
//!
//! All objects live in the `objectstorage.k8s.io/v1alpha1` API group.

pub mod bucket;
pub mod bucket_access;
pub mod common;
pub mod protocol;

pub use bucket::*;
pub use bucket_access::*;
pub use common::*;
pub use protocol::*;

use kube::CustomResourceExt;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;

/// Every CRD served by the controller manager
pub fn all_crds() -> Vec<CustomResourceDefinition> {
    vec![
        BucketRequest::crd(),
        BucketClass::crd(),
        Bucket::crd(),
        BucketAccessRequest::crd(),
        BucketAccessClass::crd(),
        BucketAccess::crd(),
    ]
}
