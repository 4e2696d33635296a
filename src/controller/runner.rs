//! Request watch loop
//!
//! Drives a [`RequestListener`] from a kube-runtime `Controller`. The
//! controller only reports the current object, so this module keeps the
//! last settled version of each request to tell adds from updates.
//!
//! Requests carry no finalizer, so a deleted request is never reconciled.
//! A request recreated under the same name is recognised by its new UID,
//! and state for requests that left the watch cache is pruned periodically.

use dashmap::DashMap;
use futures::StreamExt;
use kube::api::Api;
use kube::runtime::controller::{Action, Controller};
use kube::runtime::reflector::Store;
use kube::runtime::watcher;
use serde::de::DeserializeOwned;
use std::collections::HashSet;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::retry::{RetryConfig, RetryTracker};
use super::listener::RequestListener;
use crate::crd::StorageRequest;
use crate::error::{Error, ErrorAction, Result};

/// How often state for departed requests is dropped
pub const PRUNE_INTERVAL: Duration = Duration::from_secs(60);

/// Callback a notification was delivered to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Add,
    Update,
    Delete,
    /// Already settled at this generation
    Unchanged,
}

/// Shared state of one request watch loop
pub struct ListenerContext<R> {
    listener: Arc<dyn RequestListener<R>>,
    /// Last settled version of each request, by `namespace/name`
    settled: DashMap<String, Arc<R>>,
    retries: RetryTracker,
    cancel: CancellationToken,
}

impl<R: StorageRequest + Send + Sync + 'static> ListenerContext<R> {
    pub fn new(
        listener: Arc<dyn RequestListener<R>>,
        retry: RetryConfig,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            listener,
            settled: DashMap::new(),
            retries: RetryTracker::new(retry),
            cancel,
        }
    }

    pub fn retries(&self) -> &RetryTracker {
        &self.retries
    }

    pub fn is_settled(&self, key: &str) -> bool {
        self.settled.contains_key(key)
    }

    /// Hand the current state of a request to the matching callback
    pub async fn dispatch(&self, request: Arc<R>) -> Result<Delivery> {
        let key = request.request_key();

        if request.meta().deletion_timestamp.is_some() {
            self.listener.delete(&self.cancel, &request).await?;
            self.settled.remove(&key);
            self.retries.reset(&key);
            return Ok(Delivery::Delete);
        }

        let previous = self.settled.get(&key).map(|entry| entry.value().clone());
        let delivery = match previous {
            None => {
                self.listener.add(&self.cancel, &request).await?;
                Delivery::Add
            }
            Some(old) if old.meta().uid != request.meta().uid => {
                debug!(request = %key, "request recreated under the same name");
                self.retries.reset(&key);
                self.listener.add(&self.cancel, &request).await?;
                Delivery::Add
            }
            Some(old) if old.meta().generation != request.meta().generation => {
                self.listener.update(&self.cancel, &old, &request).await?;
                Delivery::Update
            }
            Some(_) => Delivery::Unchanged,
        };

        self.settled.insert(key, request);
        Ok(delivery)
    }

    /// Forget every request whose key is not in `live`, returning how many
    /// settled requests were dropped
    pub fn prune(&self, live: &HashSet<String>) -> usize {
        let before = self.settled.len();
        self.settled.retain(|key, _| live.contains(key));
        self.retries.retain(|key| live.contains(key));
        before - self.settled.len()
    }
}

/// Reconcile one request notification
#[instrument(skip(request, ctx), fields(request = %request.request_key()))]
pub async fn reconcile<R>(request: Arc<R>, ctx: Arc<ListenerContext<R>>) -> Result<Action>
where
    R: StorageRequest + Send + Sync + 'static,
{
    let delivery = ctx.dispatch(request.clone()).await?;
    ctx.retries.reset(&request.request_key());
    debug!(?delivery, "request settled");
    Ok(Action::await_change())
}

/// Decide when a failed request is delivered again
pub fn error_policy<R>(request: Arc<R>, error: &Error, ctx: Arc<ListenerContext<R>>) -> Action
where
    R: StorageRequest + Send + Sync + 'static,
{
    let key = request.request_key();
    let action = match (error, error.action()) {
        (Error::DependencyNotReady { .. }, _) => {
            Action::requeue(ctx.retries.config().dependency_requeue)
        }
        (_, ErrorAction::RequeueAfter(delay)) => Action::requeue(delay),
        (_, ErrorAction::RequeueWithBackoff) => Action::requeue(ctx.retries.next_delay(&key)),
        (_, ErrorAction::NoRequeue) => {
            ctx.retries.reset(&key);
            Action::await_change()
        }
    };

    warn!(
        request = %key,
        error = %error,
        retryable = error.is_retryable(),
        ?action,
        "reconciliation failed"
    );
    action
}

/// Watch `api` and feed every request to the context's listener until
/// the context is cancelled
pub async fn run<R>(api: Api<R>, ctx: Arc<ListenerContext<R>>)
where
    R: StorageRequest + Clone + Debug + DeserializeOwned + Send + Sync + 'static,
{
    let kind = R::kind(&()).to_string();
    let shutdown = ctx.cancel.clone();
    info!(%kind, "starting request controller");

    let controller = Controller::new(api, watcher::Config::default());
    let pruner = tokio::spawn(prune_departed(controller.store(), ctx.clone()));

    controller
        .graceful_shutdown_on(async move { shutdown.cancelled().await })
        .run(reconcile, error_policy, ctx)
        .for_each(|result| async move {
            match result {
                Ok((object, _)) => debug!(object = %object, "reconciled"),
                Err(e) => warn!(error = %e, "reconcile loop error"),
            }
        })
        .await;

    pruner.abort();
    info!(%kind, "request controller stopped");
}

/// Periodically drop state for requests no longer in the watch cache
async fn prune_departed<R>(store: Store<R>, ctx: Arc<ListenerContext<R>>)
where
    R: StorageRequest + Clone + Send + Sync + 'static,
{
    let shutdown = ctx.cancel.clone();
    tokio::select! {
        _ = shutdown.cancelled() => return,
        ready = store.wait_until_ready() => {
            if ready.is_err() {
                return;
            }
        }
    }

    let mut ticker = tokio::time::interval(PRUNE_INTERVAL);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let live: HashSet<String> =
                    store.state().iter().map(|r| r.request_key()).collect();
                let pruned = ctx.prune(&live);
                if pruned > 0 {
                    debug!(pruned, "dropped departed requests");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::BucketRequest;
    use crate::provisioner::testing::bucket_request;
    use async_trait::async_trait;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingListener {
        calls: Mutex<Vec<&'static str>>,
        failing_adds: AtomicU32,
    }

    #[async_trait]
    impl RequestListener<BucketRequest> for RecordingListener {
        async fn add(&self, _cancel: &CancellationToken, request: &BucketRequest) -> Result<()> {
            self.calls.lock().push("add");
            if self
                .failing_adds
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(Error::RepositoryUnavailable(request.request_key()));
            }
            Ok(())
        }

        async fn update(
            &self,
            _cancel: &CancellationToken,
            _old: &BucketRequest,
            _new: &BucketRequest,
        ) -> Result<()> {
            self.calls.lock().push("update");
            Ok(())
        }

        async fn delete(&self, _cancel: &CancellationToken, _request: &BucketRequest) -> Result<()> {
            self.calls.lock().push("delete");
            Ok(())
        }
    }

    fn context(listener: Arc<RecordingListener>) -> Arc<ListenerContext<BucketRequest>> {
        Arc::new(ListenerContext::<BucketRequest>::new(
            listener,
            RetryConfig {
                initial_interval: Duration::from_secs(1),
                max_interval: Duration::from_secs(60),
                randomization_factor: 0.0,
                dependency_requeue: Duration::from_secs(7),
                ..Default::default()
            },
            CancellationToken::new(),
        ))
    }

    #[tokio::test]
    async fn test_dispatch_routes_notifications() {
        let listener = Arc::new(RecordingListener::default());
        let ctx = context(listener.clone());
        let request = bucket_request("team-a", "photos", Some("gold"));

        assert_eq!(ctx.dispatch(Arc::new(request.clone())).await.unwrap(), Delivery::Add);
        assert!(ctx.is_settled("team-a/photos"));
        assert_eq!(
            ctx.dispatch(Arc::new(request.clone())).await.unwrap(),
            Delivery::Unchanged
        );

        let mut changed = request.clone();
        changed.metadata.generation = Some(2);
        assert_eq!(ctx.dispatch(Arc::new(changed.clone())).await.unwrap(), Delivery::Update);

        let mut deleted = changed;
        deleted.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
        assert_eq!(ctx.dispatch(Arc::new(deleted)).await.unwrap(), Delivery::Delete);
        assert!(!ctx.is_settled("team-a/photos"));

        assert_eq!(*listener.calls.lock(), vec!["add", "update", "delete"]);
    }

    #[tokio::test]
    async fn test_recreated_request_is_added_again() {
        let listener = Arc::new(RecordingListener::default());
        let ctx = context(listener.clone());

        let mut original = bucket_request("team-a", "photos", Some("gold"));
        original.metadata.uid = Some("uid-a".into());
        assert_eq!(ctx.dispatch(Arc::new(original)).await.unwrap(), Delivery::Add);

        let mut recreated = bucket_request("team-a", "photos", Some("gold"));
        recreated.metadata.uid = Some("uid-b".into());
        assert_eq!(
            ctx.dispatch(Arc::new(recreated.clone())).await.unwrap(),
            Delivery::Add
        );
        assert_eq!(
            ctx.dispatch(Arc::new(recreated)).await.unwrap(),
            Delivery::Unchanged
        );

        assert_eq!(*listener.calls.lock(), vec!["add", "add"]);
    }

    #[tokio::test]
    async fn test_prune_forgets_departed_requests() {
        let listener = Arc::new(RecordingListener::default());
        let ctx = context(listener.clone());
        for name in ["photos", "videos"] {
            let request = bucket_request("team-a", name, Some("gold"));
            ctx.dispatch(Arc::new(request)).await.unwrap();
        }
        ctx.retries().next_delay("team-a/gone");

        let live = HashSet::from(["team-a/photos".to_string()]);
        assert_eq!(ctx.prune(&live), 1);
        assert!(ctx.is_settled("team-a/photos"));
        assert!(!ctx.is_settled("team-a/videos"));
        assert!(ctx.retries().is_empty());

        let request = bucket_request("team-a", "videos", Some("gold"));
        assert_eq!(ctx.dispatch(Arc::new(request)).await.unwrap(), Delivery::Add);
    }

    #[tokio::test]
    async fn test_failed_add_is_delivered_as_add_again() {
        let listener = Arc::new(RecordingListener::default());
        listener.failing_adds.store(1, Ordering::SeqCst);
        let ctx = context(listener.clone());
        let request = Arc::new(bucket_request("team-a", "photos", Some("gold")));

        assert!(ctx.dispatch(request.clone()).await.is_err());
        assert!(!ctx.is_settled("team-a/photos"));
        assert_eq!(ctx.dispatch(request).await.unwrap(), Delivery::Add);
        assert_eq!(*listener.calls.lock(), vec!["add", "add"]);
    }

    #[tokio::test]
    async fn test_reconcile_resets_backoff() {
        let listener = Arc::new(RecordingListener::default());
        listener.failing_adds.store(2, Ordering::SeqCst);
        let ctx = context(listener);
        let request = Arc::new(bucket_request("team-a", "photos", Some("gold")));

        for expected in [1, 2] {
            let err = reconcile(request.clone(), ctx.clone()).await.unwrap_err();
            let action = error_policy(request.clone(), &err, ctx.clone());
            assert_eq!(action, Action::requeue(Duration::from_secs(expected)));
        }

        let action = reconcile(request.clone(), ctx.clone()).await.unwrap();
        assert_eq!(action, Action::await_change());
        assert!(ctx.retries().is_empty());
    }

    #[test]
    fn test_error_policy_actions() {
        let ctx = context(Arc::new(RecordingListener::default()));
        let request = Arc::new(bucket_request("team-a", "photos", Some("gold")));

        let waiting = Error::DependencyNotReady {
            key: "team-a/photos".into(),
            reason: "unbound".into(),
        };
        assert_eq!(
            error_policy(request.clone(), &waiting, ctx.clone()),
            Action::requeue(Duration::from_secs(7))
        );

        let invalid = Error::InvalidRequest {
            key: "team-a/photos".into(),
            reason: "bad".into(),
        };
        assert_eq!(
            error_policy(request, &invalid, ctx.clone()),
            Action::await_change()
        );
        assert!(ctx.retries().is_empty());
    }
}
