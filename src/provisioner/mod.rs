//! Provisioning engine and its per-kind flows

pub mod bucket;
pub mod bucket_access;
pub mod engine;
pub mod events;
pub mod inflight;
pub mod metrics;
pub mod outcome;

pub use bucket::{BucketDefaults, BucketFlow};
pub use bucket_access::{AccessDependency, BucketAccessFlow};
pub use engine::{ProvisionFlow, Provisioner, Resolution};
pub use events::ProvisionEvent;
pub use inflight::{InFlightGuard, InFlightRequests};
pub use metrics::ProvisionMetrics;
pub use outcome::{Finish, Outcome, StopReason};

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::BTreeMap;
    use std::sync::Arc;

    use crate::crd::{
        BucketAccessClass, BucketAccessClassSpec, BucketAccessRequest, BucketAccessRequestSpec,
        BucketClass, BucketClassSpec, BucketRequest, BucketRequestSpec, ReleasePolicy,
    };
    use crate::repository::InMemoryRepository;

    pub fn bucket_class(
        name: &str,
        provisioner: &str,
        parameters: Option<BTreeMap<String, String>>,
    ) -> BucketClass {
        BucketClass::new(
            name,
            BucketClassSpec {
                provisioner: provisioner.to_string(),
                parameters,
                ..Default::default()
            },
        )
    }

    pub fn bucket_request(namespace: &str, name: &str, class: Option<&str>) -> BucketRequest {
        let mut request = BucketRequest::new(
            name,
            BucketRequestSpec {
                bucket_class_name: class.map(String::from),
                ..Default::default()
            },
        );
        request.metadata.namespace = Some(namespace.to_string());
        request.metadata.generation = Some(1);
        request
    }

    pub fn access_request(
        namespace: &str,
        name: &str,
        bucket_request: &str,
        class: Option<&str>,
    ) -> BucketAccessRequest {
        let mut request = BucketAccessRequest::new(
            name,
            BucketAccessRequestSpec {
                service_account_name: Some("uploader".to_string()),
                bucket_request_name: bucket_request.to_string(),
                bucket_access_class_name: class.map(String::from),
                bucket_access_name: None,
            },
        );
        request.metadata.namespace = Some(namespace.to_string());
        request.metadata.generation = Some(1);
        request
    }

    /// Repository holding bucket class `gold` and access class `read-only`
    pub fn seeded_repo() -> Arc<InMemoryRepository> {
        let repo = InMemoryRepository::new();

        let mut gold = bucket_class(
            "gold",
            "s3.example.io",
            Some(BTreeMap::from([("tier".to_string(), "hot".to_string())])),
        );
        gold.spec.release_policy = ReleasePolicy::Delete;
        gold.spec.allowed_namespaces = Some(vec!["team-a".to_string()]);
        repo.insert_bucket_class(gold);

        repo.insert_bucket_access_class(BucketAccessClass::new(
            "read-only",
            BucketAccessClassSpec {
                provisioner: "s3.example.io".to_string(),
                policy_actions_config_map: None,
                parameters: Some(BTreeMap::from([("mode".to_string(), "ro".to_string())])),
            },
        ));

        Arc::new(repo)
    }
}
