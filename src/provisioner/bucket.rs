//! Bucket provisioning flow
//!
//! Turns a BucketRequest and its BucketClass into a cluster scoped Bucket.

use async_trait::async_trait;
use kube::ResourceExt;

use super::engine::{ProvisionFlow, Resolution};
use super::outcome::StopReason;
use crate::crd::{
    origin_labels, AnonymousAccessMode, AzureProtocol, Bucket, BucketClass, BucketRequest,
    BucketSpec, GcsProtocol, ObjectReference, Protocol, ProtocolSignature, S3Protocol,
};
use crate::domain::ports::{ObjectRepositoryRef, RequestRef};
use crate::error::Result;
use crate::util::{deep_copy_string_map, deep_copy_string_slice};

/// Values used for Bucket fields no request or class sets
#[derive(Debug, Clone)]
pub struct BucketDefaults {
    pub anonymous_access_mode: AnonymousAccessMode,
    /// Protocol used when the request names none
    pub default_signature: ProtocolSignature,
    pub s3_endpoint: String,
    pub s3_region: String,
    pub s3_signature_version: String,
    pub azure_storage_account: String,
    pub gcs_project_id: String,
}

impl Default for BucketDefaults {
    fn default() -> Self {
        Self {
            anonymous_access_mode: AnonymousAccessMode::public_read_write(),
            default_signature: ProtocolSignature::S3,
            s3_endpoint: "aws.com/s3".to_string(),
            s3_region: "US".to_string(),
            s3_signature_version: "s3v2".to_string(),
            azure_storage_account: String::new(),
            gcs_project_id: String::new(),
        }
    }
}

impl BucketDefaults {
    /// Protocol descriptor for `signature`, naming the backing bucket `bucket_name`
    pub fn protocol(&self, signature: ProtocolSignature, bucket_name: &str) -> Protocol {
        let mut protocol = Protocol {
            protocol_signature: signature,
            ..Default::default()
        };
        match signature {
            ProtocolSignature::S3 => {
                protocol.s3 = Some(S3Protocol {
                    endpoint: self.s3_endpoint.clone(),
                    bucket_name: bucket_name.to_string(),
                    region: self.s3_region.clone(),
                    signature_version: self.s3_signature_version.clone(),
                })
            }
            ProtocolSignature::AzureBlob => {
                protocol.azure_blob = Some(AzureProtocol {
                    container_name: bucket_name.to_string(),
                    storage_account: self.azure_storage_account.clone(),
                })
            }
            ProtocolSignature::Gcs => {
                protocol.gcs = Some(GcsProtocol {
                    bucket_name: bucket_name.to_string(),
                    project_id: self.gcs_project_id.clone(),
                })
            }
        }
        protocol
    }
}

/// Provisions Buckets for BucketRequests
pub struct BucketFlow {
    repo: ObjectRepositoryRef,
    defaults: BucketDefaults,
}

impl BucketFlow {
    pub fn new(repo: ObjectRepositoryRef, defaults: BucketDefaults) -> Self {
        Self { repo, defaults }
    }
}

#[async_trait]
impl ProvisionFlow for BucketFlow {
    type Request = BucketRequest;
    type Class = BucketClass;
    type Dependency = ();
    type Resource = Bucket;

    fn resource_kind(&self) -> &'static str {
        "Bucket"
    }

    async fn find_existing(
        &self,
        request: &BucketRequest,
        origin: &RequestRef,
    ) -> Result<Option<String>> {
        if let Some(bound) = request.spec.bucket_instance_name.as_deref() {
            if let Some(bucket) = self.repo.get_bucket(bound).await? {
                return Ok(Some(bucket.name_any()));
            }
        }

        Ok(self
            .repo
            .find_bucket_for(origin)
            .await?
            .map(|bucket| bucket.name_any()))
    }

    async fn resolve_class(&self, name: &str) -> Result<Option<BucketClass>> {
        self.repo.get_bucket_class(name).await
    }

    fn missing_class(&self, name: &str) -> StopReason {
        StopReason::ClassNotFound {
            class: name.to_string(),
        }
    }

    async fn resolve_dependency(
        &self,
        _request: &BucketRequest,
        _origin: &RequestRef,
        _class: &BucketClass,
    ) -> Result<Resolution<()>> {
        Ok(Resolution::Ready(()))
    }

    fn build_resource(
        &self,
        name: String,
        request: &BucketRequest,
        origin: &RequestRef,
        class: &BucketClass,
        _dependency: (),
    ) -> Bucket {
        let signature = request
            .spec
            .protocol
            .unwrap_or(self.defaults.default_signature);
        let bucket_name = match request.spec.bucket_prefix.as_deref() {
            Some(prefix) if !prefix.is_empty() => format!("{}{}", prefix, name),
            _ => name.clone(),
        };

        let spec = BucketSpec {
            provisioner: class.spec.provisioner.clone(),
            release_policy: class.spec.release_policy,
            anonymous_access_mode: self.defaults.anonymous_access_mode,
            bucket_class_name: class.name_any(),
            bucket_request: Some(ObjectReference::from(origin)),
            allowed_namespaces: deep_copy_string_slice(class.spec.allowed_namespaces.as_deref()),
            bucket_access_bindings: Vec::new(),
            protocol: self.defaults.protocol(signature, &bucket_name),
            parameters: deep_copy_string_map(class.spec.parameters.as_ref()),
        };

        let mut bucket = Bucket::new(&name, spec);
        bucket.metadata.labels = Some(origin_labels(origin));
        bucket
    }

    async fn create_resource(&self, bucket: &Bucket) -> Result<String> {
        Ok(self.repo.create_bucket(bucket).await?.name_any())
    }

    async fn bind(&self, origin: &RequestRef, bucket: &str) -> Result<()> {
        self.repo.bind_bucket_request(origin, bucket).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::{ReleasePolicy, BETA_CLASS_ANNOTATION};
    use crate::provisioner::testing::*;
    use crate::provisioner::{Finish, Outcome, Provisioner};
    use crate::repository::InMemoryRepository;
    use assert_matches::assert_matches;
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn provisioner(repo: &Arc<InMemoryRepository>) -> Provisioner<BucketFlow> {
        Provisioner::new(BucketFlow::new(repo.clone(), BucketDefaults::default()))
    }

    async fn provision(
        provisioner: &Provisioner<BucketFlow>,
        request: &BucketRequest,
    ) -> crate::Result<Outcome> {
        provisioner
            .provision(&CancellationToken::new(), request)
            .await
    }

    #[tokio::test]
    async fn test_creates_bucket_from_class() {
        let repo = seeded_repo();
        let provisioner = provisioner(&repo);
        let request = bucket_request("team-a", "photos", Some("gold"));
        repo.insert_bucket_request(request.clone());

        let outcome = provision(&provisioner, &request).await.unwrap();
        let name = assert_matches!(outcome, Outcome::Finished(Finish::Created { resource }) => resource);

        let buckets = repo.buckets();
        assert_eq!(buckets.len(), 1);
        let bucket = &buckets[0];
        assert_eq!(bucket.name_any(), name);
        assert_ne!(name, "photos");
        assert_eq!(bucket.spec.bucket_class_name, "gold");
        assert_eq!(bucket.spec.provisioner, "s3.example.io");
        assert_eq!(bucket.spec.release_policy, ReleasePolicy::Delete);
        assert!(bucket.spec.bucket_access_bindings.is_empty());
        assert_eq!(
            bucket.spec.anonymous_access_mode,
            AnonymousAccessMode::public_read_write()
        );
        assert_eq!(
            bucket.spec.bucket_request.as_ref().map(|r| r.name.as_str()),
            Some("photos")
        );

        let s3 = bucket.spec.protocol.s3.as_ref().unwrap();
        assert_eq!(s3.endpoint, "aws.com/s3");
        assert_eq!(s3.region, "US");
        assert_eq!(s3.signature_version, "s3v2");
        assert_eq!(s3.bucket_name, name);

        let stored = repo.stored_bucket_request("team-a", "photos").unwrap();
        assert_eq!(stored.spec.bucket_instance_name.as_deref(), Some(name.as_str()));
    }

    #[tokio::test]
    async fn test_second_provision_is_idempotent() {
        let repo = seeded_repo();
        let provisioner = provisioner(&repo);
        let request = bucket_request("team-a", "photos", Some("gold"));
        repo.insert_bucket_request(request.clone());

        let first = provision(&provisioner, &request).await.unwrap();
        let second = provision(&provisioner, &request).await.unwrap();

        assert_matches!(second, Outcome::Finished(Finish::Exists { .. }));
        assert_eq!(first.resource(), second.resource());
        assert_eq!(repo.bucket_count(), 1);
        assert_eq!(repo.create_calls(), 1);
    }

    #[tokio::test]
    async fn test_bound_request_found_by_reference() {
        let repo = seeded_repo();
        let provisioner = provisioner(&repo);
        let request = bucket_request("team-a", "photos", Some("gold"));
        repo.insert_bucket_request(request.clone());
        provision(&provisioner, &request).await.unwrap();

        let bound = repo.stored_bucket_request("team-a", "photos").unwrap();
        let outcome = provision(&provisioner, &bound).await.unwrap();

        assert_eq!(outcome.resource(), bound.spec.bucket_instance_name.as_deref());
        assert_eq!(repo.create_calls(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_provisions_create_one_bucket() {
        let repo = seeded_repo();
        repo.set_read_delay(Duration::from_millis(10));
        let provisioner = Arc::new(provisioner(&repo));
        let request = bucket_request("team-a", "photos", Some("gold"));
        repo.insert_bucket_request(request.clone());

        let mut handles = Vec::new();
        for _ in 0..8 {
            let provisioner = provisioner.clone();
            let request = request.clone();
            handles.push(tokio::spawn(async move {
                provisioner
                    .provision(&CancellationToken::new(), &request)
                    .await
            }));
        }

        let mut resources = Vec::new();
        for handle in handles {
            let outcome = handle.await.unwrap().unwrap();
            assert!(outcome.is_finished());
            resources.push(outcome.resource().map(String::from));
        }

        assert_eq!(repo.bucket_count(), 1);
        assert_eq!(repo.create_calls(), 1);
        let name = repo.buckets()[0].name_any();
        assert!(resources.iter().all(|r| r.as_deref() == Some(name.as_str())));
        assert_eq!(provisioner.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_separate_provisioners_with_stale_reads_create_one_bucket() {
        let repo = seeded_repo();
        let request = bucket_request("team-a", "photos", Some("gold"));
        repo.insert_bucket_request(request.clone());

        let first = provisioner(&repo);
        let second = provisioner(&repo);
        provision(&first, &request).await.unwrap();

        // The second instance cannot see the first one's bucket yet
        repo.set_stale_reads(true);
        let outcome = provision(&second, &request).await.unwrap();

        assert_matches!(outcome, Outcome::Finished(Finish::Exists { resource: None }));
        assert_eq!(repo.bucket_count(), 1);
        assert_eq!(repo.create_calls(), 2);
    }

    #[tokio::test]
    async fn test_racing_provisioners_settle_on_one_bucket() {
        let repo = seeded_repo();
        repo.set_read_delay(Duration::from_millis(20));
        let request = bucket_request("team-a", "photos", Some("gold"));
        repo.insert_bucket_request(request.clone());

        let first = provisioner(&repo);
        let second = provisioner(&repo);
        let (a, b) = tokio::join!(provision(&first, &request), provision(&second, &request));
        let (a, b) = (a.unwrap(), b.unwrap());

        assert!(a.is_finished());
        assert!(b.is_finished());
        assert_eq!(repo.bucket_count(), 1);
        let name = repo.buckets()[0].name_any();
        assert_eq!(a.resource(), Some(name.as_str()));
        assert_eq!(b.resource(), Some(name.as_str()));

        let stored = repo.stored_bucket_request("team-a", "photos").unwrap();
        assert_eq!(stored.spec.bucket_instance_name.as_deref(), Some(name.as_str()));
    }

    #[tokio::test]
    async fn test_recreated_request_gets_new_bucket() {
        let repo = seeded_repo();
        let provisioner = provisioner(&repo);

        let mut original = bucket_request("team-a", "photos", Some("gold"));
        original.metadata.uid = Some("uid-a".into());
        repo.insert_bucket_request(original.clone());
        let old = provision(&provisioner, &original).await.unwrap();

        let mut recreated = bucket_request("team-a", "photos", Some("gold"));
        recreated.metadata.uid = Some("uid-b".into());
        repo.insert_bucket_request(recreated.clone());
        let outcome = provision(&provisioner, &recreated).await.unwrap();

        let name = assert_matches!(outcome, Outcome::Finished(Finish::Created { resource }) => resource);
        assert_ne!(Some(name.as_str()), old.resource());
        assert_eq!(repo.bucket_count(), 2);

        let bucket = repo
            .buckets()
            .into_iter()
            .find(|b| b.name_any() == name)
            .unwrap();
        assert_eq!(
            bucket.spec.bucket_request.as_ref().and_then(|r| r.uid.as_deref()),
            Some("uid-b")
        );
        let stored = repo.stored_bucket_request("team-a", "photos").unwrap();
        assert_eq!(stored.spec.bucket_instance_name.as_deref(), Some(name.as_str()));
    }

    #[tokio::test]
    async fn test_missing_class_never_creates() {
        let repo = seeded_repo();
        let provisioner = provisioner(&repo);

        let unknown = bucket_request("team-a", "photos", Some("platinum"));
        let outcome = provision(&provisioner, &unknown).await.unwrap();
        assert_matches!(
            outcome,
            Outcome::Finished(Finish::Stopped(StopReason::ClassNotFound { class })) if class == "platinum"
        );

        let unnamed = bucket_request("team-a", "videos", None);
        let outcome = provision(&provisioner, &unnamed).await.unwrap();
        assert_matches!(
            outcome,
            Outcome::Finished(Finish::Stopped(StopReason::ClassNotFound { class })) if class.is_empty()
        );

        assert_eq!(repo.create_calls(), 0);
        assert_eq!(repo.bucket_count(), 0);
    }

    #[tokio::test]
    async fn test_annotation_class_wins() {
        let repo = seeded_repo();
        repo.insert_bucket_class(bucket_class("legacy", "legacy.example.io", None));
        let provisioner = provisioner(&repo);

        let mut request = bucket_request("team-a", "photos", Some("gold"));
        request.metadata.annotations = Some(BTreeMap::from([(
            BETA_CLASS_ANNOTATION.to_string(),
            "legacy".to_string(),
        )]));
        repo.insert_bucket_request(request.clone());

        provision(&provisioner, &request).await.unwrap();
        let bucket = &repo.buckets()[0];
        assert_eq!(bucket.spec.bucket_class_name, "legacy");
        assert_eq!(bucket.spec.provisioner, "legacy.example.io");
    }

    #[tokio::test]
    async fn test_bucket_does_not_alias_class_fields() {
        let repo = seeded_repo();
        let provisioner = provisioner(&repo);
        let request = bucket_request("team-a", "photos", Some("gold"));
        repo.insert_bucket_request(request.clone());

        provision(&provisioner, &request).await.unwrap();
        repo.update_bucket_class("gold", |class| {
            class
                .spec
                .parameters
                .get_or_insert_with(BTreeMap::new)
                .insert("tier".into(), "changed".into());
            class
                .spec
                .allowed_namespaces
                .get_or_insert_with(Vec::new)
                .push("team-z".into());
        });

        let bucket = &repo.buckets()[0];
        let parameters = bucket.spec.parameters.as_ref().unwrap();
        assert_eq!(parameters.get("tier").map(String::as_str), Some("hot"));
        assert_eq!(
            bucket.spec.allowed_namespaces.as_deref(),
            Some(&["team-a".to_string()][..])
        );
    }

    #[tokio::test]
    async fn test_transient_create_failure_retries_cleanly() {
        let repo = seeded_repo();
        let provisioner = provisioner(&repo);
        let request = bucket_request("team-a", "photos", Some("gold"));
        repo.insert_bucket_request(request.clone());

        repo.fail_next_creates(1);
        let err = provision(&provisioner, &request).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(repo.bucket_count(), 0);

        let outcome = provision(&provisioner, &request).await.unwrap();
        assert_matches!(outcome, Outcome::Finished(Finish::Created { .. }));
        assert_eq!(repo.bucket_count(), 1);
    }

    #[tokio::test]
    async fn test_failed_bind_is_repaired_on_retry() {
        let repo = seeded_repo();
        let provisioner = provisioner(&repo);
        let request = bucket_request("team-a", "photos", Some("gold"));
        repo.insert_bucket_request(request.clone());

        repo.fail_next_binds(1);
        assert!(provision(&provisioner, &request).await.is_err());
        assert_eq!(repo.bucket_count(), 1);
        let unbound = repo.stored_bucket_request("team-a", "photos").unwrap();
        assert!(unbound.spec.bucket_instance_name.is_none());

        let outcome = provision(&provisioner, &unbound).await.unwrap();
        assert_matches!(outcome, Outcome::Finished(Finish::Exists { resource: Some(_) }));
        assert_eq!(repo.bucket_count(), 1);

        let bound = repo.stored_bucket_request("team-a", "photos").unwrap();
        assert_eq!(
            bound.spec.bucket_instance_name,
            Some(repo.buckets()[0].name_any())
        );
    }

    #[tokio::test]
    async fn test_requested_protocol_and_prefix() {
        let repo = seeded_repo();
        let provisioner = provisioner(&repo);
        let mut request = bucket_request("team-a", "photos", Some("gold"));
        request.spec.protocol = Some(ProtocolSignature::Gcs);
        request.spec.bucket_prefix = Some("media-".into());
        repo.insert_bucket_request(request.clone());

        provision(&provisioner, &request).await.unwrap();
        let bucket = &repo.buckets()[0];
        assert_eq!(bucket.spec.protocol.protocol_signature, ProtocolSignature::Gcs);
        assert!(bucket.spec.protocol.s3.is_none());

        let bucket_name = bucket.spec.protocol.bucket_name().unwrap();
        assert_eq!(bucket_name, format!("media-{}", bucket.name_any()));
    }
}
