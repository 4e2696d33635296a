//! Bucket access provisioning flow
//!
//! A BucketAccessRequest grants its namespace access to the bucket of a
//! BucketRequest in the same namespace. The BucketRequest must already be
//! bound to a Bucket.

use async_trait::async_trait;
use kube::ResourceExt;
use tracing::debug;

use super::engine::{ProvisionFlow, Resolution};
use super::outcome::StopReason;
use crate::crd::{
    origin_labels, BucketAccess, BucketAccessClass, BucketAccessRequest, BucketAccessSpec,
    ObjectReference,
};
use crate::domain::ports::{ObjectRepositoryRef, RequestRef};
use crate::error::{Error, Result};
use crate::util::deep_copy_string_map;

/// What a BucketAccess is built from besides its request and class
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessDependency {
    /// Bucket bound to the referenced BucketRequest
    pub bucket_instance_name: String,
    /// Policy actions document, JSON encoded
    pub policy_actions: Option<String>,
}

/// Provisions BucketAccesses for BucketAccessRequests
pub struct BucketAccessFlow {
    repo: ObjectRepositoryRef,
}

impl BucketAccessFlow {
    pub fn new(repo: ObjectRepositoryRef) -> Self {
        Self { repo }
    }

    async fn policy_actions(
        &self,
        origin: &RequestRef,
        class: &BucketAccessClass,
    ) -> Result<Option<String>> {
        let Some(reference) = class.spec.policy_actions_config_map.as_ref() else {
            return Ok(None);
        };
        let namespace = reference.namespace.as_deref().unwrap_or(&origin.namespace);

        let data = self
            .repo
            .get_config_map_data(namespace, &reference.name)
            .await?
            .ok_or_else(|| Error::DependencyNotReady {
                key: origin.key(),
                reason: format!("policy ConfigMap {}/{} not found", namespace, reference.name),
            })?;

        Ok(Some(serde_json::to_string(&data)?))
    }
}

#[async_trait]
impl ProvisionFlow for BucketAccessFlow {
    type Request = BucketAccessRequest;
    type Class = BucketAccessClass;
    type Dependency = AccessDependency;
    type Resource = BucketAccess;

    fn resource_kind(&self) -> &'static str {
        "BucketAccess"
    }

    async fn find_existing(
        &self,
        request: &BucketAccessRequest,
        origin: &RequestRef,
    ) -> Result<Option<String>> {
        if let Some(bound) = request.spec.bucket_access_name.as_deref() {
            if let Some(access) = self.repo.get_bucket_access(bound).await? {
                return Ok(Some(access.name_any()));
            }
        }

        Ok(self
            .repo
            .find_bucket_access_for(origin)
            .await?
            .map(|access| access.name_any()))
    }

    async fn resolve_class(&self, name: &str) -> Result<Option<BucketAccessClass>> {
        self.repo.get_bucket_access_class(name).await
    }

    fn missing_class(&self, name: &str) -> StopReason {
        StopReason::ClassUnavailable {
            class: name.to_string(),
        }
    }

    async fn resolve_dependency(
        &self,
        request: &BucketAccessRequest,
        origin: &RequestRef,
        class: &BucketAccessClass,
    ) -> Result<Resolution<AccessDependency>> {
        let bucket_request_name = request.spec.bucket_request_name.as_str();
        let not_found = || {
            Resolution::Stop(StopReason::BucketRequestNotFound {
                name: bucket_request_name.to_string(),
            })
        };
        if bucket_request_name.is_empty() {
            return Ok(not_found());
        }

        let Some(bucket_request) = self
            .repo
            .get_bucket_request(&origin.namespace, bucket_request_name)
            .await?
        else {
            return Ok(not_found());
        };

        let bucket_instance_name = bucket_request
            .spec
            .bucket_instance_name
            .filter(|name| !name.is_empty())
            .ok_or_else(|| Error::DependencyNotReady {
                key: origin.key(),
                reason: format!("bucket request {} has no bucket yet", bucket_request_name),
            })?;
        debug!(bucket = %bucket_instance_name, "bucket request resolved");

        Ok(Resolution::Ready(AccessDependency {
            bucket_instance_name,
            policy_actions: self.policy_actions(origin, class).await?,
        }))
    }

    fn build_resource(
        &self,
        name: String,
        request: &BucketAccessRequest,
        origin: &RequestRef,
        class: &BucketAccessClass,
        dependency: AccessDependency,
    ) -> BucketAccess {
        let spec = BucketAccessSpec {
            bucket_instance_name: dependency.bucket_instance_name,
            bucket_access_request: Some(ObjectReference::from(origin)),
            service_account: request.spec.service_account_name.clone(),
            minted_secret_name: None,
            policy_actions_config_map_data: dependency.policy_actions,
            principal: origin.namespace.clone(),
            provisioner: class.spec.provisioner.clone(),
            parameters: deep_copy_string_map(class.spec.parameters.as_ref()),
        };

        let mut access = BucketAccess::new(&name, spec);
        access.metadata.labels = Some(origin_labels(origin));
        access
    }

    async fn create_resource(&self, access: &BucketAccess) -> Result<String> {
        Ok(self.repo.create_bucket_access(access).await?.name_any())
    }

    async fn bind(&self, origin: &RequestRef, access: &str) -> Result<()> {
        self.repo.bind_bucket_access_request(origin, access).await
    }
}
