//! Kubernetes API backed repository

use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::api::{Api, ListParams, Patch, PatchParams, PostParams};
use kube::{Client, ResourceExt};
use serde_json::json;
use std::collections::BTreeMap;
use tracing::debug;

use crate::crd::{
    origin_selector, Bucket, BucketAccess, BucketAccessClass, BucketAccessRequest, BucketClass,
    BucketRequest, ObjectReference,
};
use crate::domain::ports::{ObjectRepository, RequestRef};
use crate::error::{Error, Result};

/// Field manager used for every write
pub const FIELD_MANAGER: &str = "cosi-controller-manager";

/// Repository reading and writing objects through the API server
#[derive(Clone)]
pub struct KubeRepository {
    client: Client,
    field_manager: String,
}

impl KubeRepository {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            field_manager: FIELD_MANAGER.to_string(),
        }
    }

    pub fn with_field_manager(mut self, field_manager: impl Into<String>) -> Self {
        self.field_manager = field_manager.into();
        self
    }

    fn post_params(&self) -> PostParams {
        PostParams {
            field_manager: Some(self.field_manager.clone()),
            ..Default::default()
        }
    }

    fn patch_params(&self) -> PatchParams {
        PatchParams {
            field_manager: Some(self.field_manager.clone()),
            ..Default::default()
        }
    }
}

/// Map a 409 from the API server onto `ResourceExists`
fn classify_create(kind: &str, name: &str, err: kube::Error) -> Error {
    match err {
        kube::Error::Api(ae) if ae.code == 409 => Error::ResourceExists {
            kind: kind.to_string(),
            name: name.to_string(),
        },
        e => Error::Kube(e),
    }
}

/// A reference matches when either side lacks a uid
fn is_same_origin(reference: Option<&ObjectReference>, origin: &RequestRef) -> bool {
    match (reference.and_then(|r| r.uid.as_deref()), origin.uid.as_deref()) {
        (Some(a), Some(b)) => a == b,
        _ => true,
    }
}

#[async_trait]
impl ObjectRepository for KubeRepository {
    async fn get_bucket(&self, name: &str) -> Result<Option<Bucket>> {
        let api: Api<Bucket> = Api::all(self.client.clone());
        Ok(api.get_opt(name).await?)
    }

    async fn find_bucket_for(&self, origin: &RequestRef) -> Result<Option<Bucket>> {
        let api: Api<Bucket> = Api::all(self.client.clone());
        let list = api
            .list(&ListParams::default().labels(&origin_selector(origin)))
            .await?;

        Ok(list
            .items
            .into_iter()
            .find(|b| is_same_origin(b.spec.bucket_request.as_ref(), origin)))
    }

    async fn create_bucket(&self, bucket: &Bucket) -> Result<Bucket> {
        let api: Api<Bucket> = Api::all(self.client.clone());
        let name = bucket.name_any();
        let created = api
            .create(&self.post_params(), bucket)
            .await
            .map_err(|e| classify_create("Bucket", &name, e))?;

        debug!(bucket = %name, "bucket created");
        Ok(created)
    }

    async fn get_bucket_class(&self, name: &str) -> Result<Option<BucketClass>> {
        let api: Api<BucketClass> = Api::all(self.client.clone());
        Ok(api.get_opt(name).await?)
    }

    async fn get_bucket_request(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BucketRequest>> {
        let api: Api<BucketRequest> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn bind_bucket_request(&self, origin: &RequestRef, bucket_name: &str) -> Result<()> {
        let api: Api<BucketRequest> = Api::namespaced(self.client.clone(), &origin.namespace);
        let patch = json!({ "spec": { "bucketInstanceName": bucket_name } });

        api.patch(&origin.name, &self.patch_params(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn get_bucket_access(&self, name: &str) -> Result<Option<BucketAccess>> {
        let api: Api<BucketAccess> = Api::all(self.client.clone());
        Ok(api.get_opt(name).await?)
    }

    async fn find_bucket_access_for(&self, origin: &RequestRef) -> Result<Option<BucketAccess>> {
        let api: Api<BucketAccess> = Api::all(self.client.clone());
        let list = api
            .list(&ListParams::default().labels(&origin_selector(origin)))
            .await?;

        Ok(list
            .items
            .into_iter()
            .find(|a| is_same_origin(a.spec.bucket_access_request.as_ref(), origin)))
    }

    async fn create_bucket_access(&self, access: &BucketAccess) -> Result<BucketAccess> {
        let api: Api<BucketAccess> = Api::all(self.client.clone());
        let name = access.name_any();
        let created = api
            .create(&self.post_params(), access)
            .await
            .map_err(|e| classify_create("BucketAccess", &name, e))?;

        debug!(bucket_access = %name, "bucket access created");
        Ok(created)
    }

    async fn get_bucket_access_class(&self, name: &str) -> Result<Option<BucketAccessClass>> {
        let api: Api<BucketAccessClass> = Api::all(self.client.clone());
        Ok(api.get_opt(name).await?)
    }

    async fn bind_bucket_access_request(
        &self,
        origin: &RequestRef,
        access_name: &str,
    ) -> Result<()> {
        let api: Api<BucketAccessRequest> =
            Api::namespaced(self.client.clone(), &origin.namespace);
        let patch = json!({ "spec": { "bucketAccessName": access_name } });

        api.patch(&origin.name, &self.patch_params(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn get_config_map_data(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, String>>> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        Ok(api
            .get_opt(name)
            .await?
            .map(|cm| cm.data.unwrap_or_default()))
    }
}
