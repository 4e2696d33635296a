//! Types shared by the bucket and bucket access CRDs

use kube::{Resource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::domain::ports::RequestRef;
use crate::error::{Error, Result};

/// API group of every object handled by the controller manager
pub const API_GROUP: &str = "objectstorage.k8s.io";

/// Legacy class annotation, takes precedence over the spec class field
pub const BETA_CLASS_ANNOTATION: &str = "volume.beta.kubernetes.io/storage-class";

/// Label recording the namespace of the request a resource was created for
pub const REQUEST_NAMESPACE_LABEL: &str = "objectstorage.k8s.io/request-namespace";

/// Label recording the name of the request a resource was created for
pub const REQUEST_NAME_LABEL: &str = "objectstorage.k8s.io/request-name";

/// Label recording the UID of the request a resource was created for
pub const REQUEST_UID_LABEL: &str = "objectstorage.k8s.io/request-uid";

// =============================================================================
// Object Reference
// =============================================================================

/// Reference to another object in the cluster
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ObjectReference {
    /// Namespace of the referent (empty for cluster scoped objects)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,

    /// Name of the referent
    pub name: String,

    /// UID of the referent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
}

impl From<&RequestRef> for ObjectReference {
    fn from(origin: &RequestRef) -> Self {
        Self {
            namespace: Some(origin.namespace.clone()),
            name: origin.name.clone(),
            uid: origin.uid.clone(),
        }
    }
}

// =============================================================================
// Storage Request
// =============================================================================

/// Behaviour common to BucketRequest and BucketAccessRequest
pub trait StorageRequest: Resource<DynamicType = ()> + Sized {
    /// Class name set in the spec, if any
    fn spec_class_name(&self) -> Option<&str>;

    /// Name of the resource already recorded on this request, if any
    fn bound_resource(&self) -> Option<&str>;

    /// Resolve the class for this request.
    ///
    /// The beta annotation wins over the spec field. Returns an empty
    /// string when neither is set.
    fn class_name(&self) -> String {
        if let Some(class) = self
            .meta()
            .annotations
            .as_ref()
            .and_then(|a| a.get(BETA_CLASS_ANNOTATION))
        {
            return class.clone();
        }

        self.spec_class_name().unwrap_or_default().to_string()
    }

    /// `namespace/name` key identifying this request
    fn request_key(&self) -> String {
        format!(
            "{}/{}",
            self.meta().namespace.as_deref().unwrap_or_default(),
            self.name_any()
        )
    }

    /// Reference to this request, used as the origin of created resources
    fn request_ref(&self) -> Result<RequestRef> {
        let namespace = self
            .meta()
            .namespace
            .clone()
            .ok_or_else(|| Error::InvalidRequest {
                key: self.request_key(),
                reason: "request has no namespace".into(),
            })?;

        Ok(RequestRef {
            namespace,
            name: self.name_any(),
            uid: self.meta().uid.clone(),
        })
    }
}

/// Labels stamped on a resource created for `origin`
pub fn origin_labels(origin: &RequestRef) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert(REQUEST_NAMESPACE_LABEL.to_string(), origin.namespace.clone());
    labels.insert(REQUEST_NAME_LABEL.to_string(), origin.name.clone());
    if let Some(uid) = &origin.uid {
        labels.insert(REQUEST_UID_LABEL.to_string(), uid.clone());
    }
    labels
}

/// Label selector matching resources created for `origin`
pub fn origin_selector(origin: &RequestRef) -> String {
    format!(
        "{}={},{}={}",
        REQUEST_NAMESPACE_LABEL, origin.namespace, REQUEST_NAME_LABEL, origin.name
    )
}

/// Origin recorded in a resource's labels, if it has one
pub fn origin_from_labels(labels: Option<&BTreeMap<String, String>>) -> Option<RequestRef> {
    let labels = labels?;
    Some(RequestRef {
        namespace: labels.get(REQUEST_NAMESPACE_LABEL)?.clone(),
        name: labels.get(REQUEST_NAME_LABEL)?.clone(),
        uid: labels.get(REQUEST_UID_LABEL).cloned(),
    })
}

/// Check whether `labels` mark an object as created for `origin`.
///
/// UIDs are compared only when both sides carry one, so a request
/// recreated under the same name never matches the old request's resource.
pub fn matches_origin(labels: Option<&BTreeMap<String, String>>, origin: &RequestRef) -> bool {
    labels.map_or(false, |l| {
        let same_uid = match (l.get(REQUEST_UID_LABEL), origin.uid.as_ref()) {
            (Some(a), Some(b)) => a == b,
            _ => true,
        };
        l.get(REQUEST_NAMESPACE_LABEL) == Some(&origin.namespace)
            && l.get(REQUEST_NAME_LABEL) == Some(&origin.name)
            && same_uid
    })
}
