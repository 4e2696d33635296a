//! In-memory repository
//!
//! Holds every object in process memory. Used by tests and benchmarks.
//! Creates enforce one resource per originating request, which lets
//! callers exercise the already-exists path without an API server.

use async_trait::async_trait;
use kube::ResourceExt;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use crate::crd::{
    matches_origin, origin_from_labels, Bucket, BucketAccess, BucketAccessClass,
    BucketAccessRequest, BucketClass, BucketRequest,
};
use crate::domain::ports::{ObjectRepository, RequestRef};
use crate::error::{Error, Result};

type NamespacedKey = (String, String);

fn namespaced_key(namespace: &str, name: &str) -> NamespacedKey {
    (namespace.to_string(), name.to_string())
}

// =============================================================================
// In-Memory Repository
// =============================================================================

/// Object store kept in memory
#[derive(Default)]
pub struct InMemoryRepository {
    buckets: RwLock<BTreeMap<String, Bucket>>,
    bucket_classes: RwLock<BTreeMap<String, BucketClass>>,
    bucket_requests: RwLock<BTreeMap<NamespacedKey, BucketRequest>>,
    accesses: RwLock<BTreeMap<String, BucketAccess>>,
    access_classes: RwLock<BTreeMap<String, BucketAccessClass>>,
    access_requests: RwLock<BTreeMap<NamespacedKey, BucketAccessRequest>>,
    config_maps: RwLock<BTreeMap<NamespacedKey, BTreeMap<String, String>>>,

    /// Number of create calls, successful or not
    create_calls: AtomicU64,
    /// Create calls still to fail with a transient error
    failing_creates: AtomicU32,
    /// Bind calls still to fail with a transient error
    failing_binds: AtomicU32,
    /// Resource lookups return nothing, as from a lagging cache
    stale_reads: AtomicBool,
    /// Delay added to every resource lookup, in milliseconds
    read_delay_ms: AtomicU64,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    // -------------------------------------------------------------------------
    // Seeding
    // -------------------------------------------------------------------------

    pub fn insert_bucket_class(&self, class: BucketClass) {
        self.bucket_classes.write().insert(class.name_any(), class);
    }

    pub fn insert_bucket_request(&self, request: BucketRequest) {
        let key = namespaced_key(
            request.namespace().as_deref().unwrap_or_default(),
            &request.name_any(),
        );
        self.bucket_requests.write().insert(key, request);
    }

    pub fn insert_bucket_access_class(&self, class: BucketAccessClass) {
        self.access_classes.write().insert(class.name_any(), class);
    }

    pub fn insert_bucket_access_request(&self, request: BucketAccessRequest) {
        let key = namespaced_key(
            request.namespace().as_deref().unwrap_or_default(),
            &request.name_any(),
        );
        self.access_requests.write().insert(key, request);
    }

    pub fn insert_config_map(&self, namespace: &str, name: &str, data: BTreeMap<String, String>) {
        self.config_maps
            .write()
            .insert(namespaced_key(namespace, name), data);
    }

    /// Mutate a stored bucket class in place
    pub fn update_bucket_class(&self, name: &str, f: impl FnOnce(&mut BucketClass)) {
        if let Some(class) = self.bucket_classes.write().get_mut(name) {
            f(class);
        }
    }

    /// Mutate a stored bucket access class in place
    pub fn update_bucket_access_class(&self, name: &str, f: impl FnOnce(&mut BucketAccessClass)) {
        if let Some(class) = self.access_classes.write().get_mut(name) {
            f(class);
        }
    }

    // -------------------------------------------------------------------------
    // Fault injection
    // -------------------------------------------------------------------------

    /// Fail the next `count` create calls with a transient error
    pub fn fail_next_creates(&self, count: u32) {
        self.failing_creates.store(count, Ordering::SeqCst);
    }

    /// Fail the next `count` bind calls with a transient error
    pub fn fail_next_binds(&self, count: u32) {
        self.failing_binds.store(count, Ordering::SeqCst);
    }

    /// Hide stored buckets and bucket accesses from lookups
    pub fn set_stale_reads(&self, stale: bool) {
        self.stale_reads.store(stale, Ordering::SeqCst);
    }

    /// Delay every resource lookup
    pub fn set_read_delay(&self, delay: Duration) {
        self.read_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    async fn before_lookup(&self) -> bool {
        let delay = self.read_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        !self.stale_reads.load(Ordering::SeqCst)
    }

    // -------------------------------------------------------------------------
    // Inspection
    // -------------------------------------------------------------------------

    pub fn create_calls(&self) -> u64 {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.read().len()
    }

    pub fn bucket_access_count(&self) -> usize {
        self.accesses.read().len()
    }

    pub fn buckets(&self) -> Vec<Bucket> {
        self.buckets.read().values().cloned().collect()
    }

    pub fn bucket_accesses(&self) -> Vec<BucketAccess> {
        self.accesses.read().values().cloned().collect()
    }

    pub fn stored_bucket_request(&self, namespace: &str, name: &str) -> Option<BucketRequest> {
        self.bucket_requests
            .read()
            .get(&namespaced_key(namespace, name))
            .cloned()
    }

    pub fn stored_bucket_access_request(
        &self,
        namespace: &str,
        name: &str,
    ) -> Option<BucketAccessRequest> {
        self.access_requests
            .read()
            .get(&namespaced_key(namespace, name))
            .cloned()
    }

    /// Insert `object` unless its name or origin is already taken
    fn insert_unique<K: kube::Resource + Clone>(
        &self,
        store: &RwLock<BTreeMap<String, K>>,
        kind: &str,
        object: &K,
    ) -> Result<K> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        if Self::take_failure(&self.failing_creates) {
            return Err(Error::RepositoryUnavailable(format!(
                "injected create failure for {}",
                kind
            )));
        }

        let name = object.meta().name.clone().unwrap_or_default();
        let origin = origin_from_labels(object.meta().labels.as_ref());

        let mut objects = store.write();
        let taken = objects.contains_key(&name)
            || origin.as_ref().map_or(false, |o| {
                objects
                    .values()
                    .any(|existing| matches_origin(existing.meta().labels.as_ref(), o))
            });
        if taken {
            return Err(Error::ResourceExists {
                kind: kind.to_string(),
                name,
            });
        }

        objects.insert(name, object.clone());
        Ok(object.clone())
    }

    fn bind<R>(
        &self,
        store: &RwLock<BTreeMap<NamespacedKey, R>>,
        kind: &str,
        origin: &RequestRef,
        set: impl FnOnce(&mut R),
    ) -> Result<()> {
        if Self::take_failure(&self.failing_binds) {
            return Err(Error::RepositoryUnavailable(format!(
                "injected bind failure for {}",
                kind
            )));
        }

        let mut requests = store.write();
        let request = requests
            .get_mut(&namespaced_key(&origin.namespace, &origin.name))
            .ok_or_else(|| Error::ResourceNotFound {
                kind: kind.to_string(),
                name: origin.key(),
            })?;
        set(request);
        Ok(())
    }

    fn find_by_origin<K: kube::Resource + Clone>(
        store: &RwLock<BTreeMap<String, K>>,
        origin: &RequestRef,
    ) -> Option<K> {
        store
            .read()
            .values()
            .find(|k| matches_origin(k.meta().labels.as_ref(), origin))
            .cloned()
    }
}

#[async_trait]
impl ObjectRepository for InMemoryRepository {
    async fn get_bucket(&self, name: &str) -> Result<Option<Bucket>> {
        if !self.before_lookup().await {
            return Ok(None);
        }
        Ok(self.buckets.read().get(name).cloned())
    }

    async fn find_bucket_for(&self, origin: &RequestRef) -> Result<Option<Bucket>> {
        if !self.before_lookup().await {
            return Ok(None);
        }
        Ok(Self::find_by_origin(&self.buckets, origin))
    }

    async fn create_bucket(&self, bucket: &Bucket) -> Result<Bucket> {
        self.insert_unique(&self.buckets, "Bucket", bucket)
    }

    async fn get_bucket_class(&self, name: &str) -> Result<Option<BucketClass>> {
        Ok(self.bucket_classes.read().get(name).cloned())
    }

    async fn get_bucket_request(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BucketRequest>> {
        Ok(self.stored_bucket_request(namespace, name))
    }

    async fn bind_bucket_request(&self, origin: &RequestRef, bucket_name: &str) -> Result<()> {
        self.bind(&self.bucket_requests, "BucketRequest", origin, |r| {
            r.spec.bucket_instance_name = Some(bucket_name.to_string());
        })
    }

    async fn get_bucket_access(&self, name: &str) -> Result<Option<BucketAccess>> {
        if !self.before_lookup().await {
            return Ok(None);
        }
        Ok(self.accesses.read().get(name).cloned())
    }

    async fn find_bucket_access_for(&self, origin: &RequestRef) -> Result<Option<BucketAccess>> {
        if !self.before_lookup().await {
            return Ok(None);
        }
        Ok(Self::find_by_origin(&self.accesses, origin))
    }

    async fn create_bucket_access(&self, access: &BucketAccess) -> Result<BucketAccess> {
        self.insert_unique(&self.accesses, "BucketAccess", access)
    }

    async fn get_bucket_access_class(&self, name: &str) -> Result<Option<BucketAccessClass>> {
        Ok(self.access_classes.read().get(name).cloned())
    }

    async fn bind_bucket_access_request(
        &self,
        origin: &RequestRef,
        access_name: &str,
    ) -> Result<()> {
        self.bind(&self.access_requests, "BucketAccessRequest", origin, |r| {
            r.spec.bucket_access_name = Some(access_name.to_string());
        })
    }

    async fn get_config_map_data(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<BTreeMap<String, String>>> {
        Ok(self
            .config_maps
            .read()
            .get(&namespaced_key(namespace, name))
            .cloned())
    }
}
