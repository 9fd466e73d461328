/**
 * Watch sources feeding informers
 *
 * `kube::Client` is the production source. Anything else implementing
 * `WatchSource` (the in-memory source used by tests, for instance) can stand in.
 */
use super::config::{WATCH_PAGE_SIZE, WATCH_TIMEOUT_SECONDS};
use futures::stream::BoxStream;
use futures::StreamExt;
use k8s_openapi::NamespaceResourceScope;
use kube::runtime::watcher::{self, watcher};
use kube::runtime::WatchStreamExt;
use kube::{Api, Client, Resource};
use serde::de::DeserializeOwned;
use std::fmt::Debug;
use std::sync::Arc;

/// Resource types an informer can mirror
pub trait Watched:
    Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static
{
}

impl<K> Watched for K where
    K: Resource<DynamicType = ()> + Clone + DeserializeOwned + Debug + Send + Sync + 'static
{
}

/// Stream of raw watcher events for one resource kind
pub type EventStream<K> = BoxStream<'static, watcher::Result<watcher::Event<K>>>;

/// Produces list+watch streams, one per resource kind
///
/// The stream owns its retry policy; informers only log its errors.
pub trait WatchSource: Send + Sync + 'static {
    /// Open a cluster-wide watch for `K`
    fn watch<K: Watched>(&self) -> EventStream<K>;

    /// Open a watch for `K` scoped to one namespace, so only namespace-level
    /// list/watch permissions are needed
    fn watch_namespaced<K>(&self, namespace: &str) -> EventStream<K>
    where
        K: Watched + Resource<Scope = NamespaceResourceScope>;
}

impl WatchSource for Client {
    fn watch<K: Watched>(&self) -> EventStream<K> {
        let api: Api<K> = Api::all(self.clone());
        watcher(api, watch_config()).default_backoff().boxed()
    }

    fn watch_namespaced<K>(&self, namespace: &str) -> EventStream<K>
    where
        K: Watched + Resource<Scope = NamespaceResourceScope>,
    {
        let api: Api<K> = Api::namespaced(self.clone(), namespace);
        watcher(api, watch_config()).default_backoff().boxed()
    }
}

impl<S: WatchSource> WatchSource for Arc<S> {
    fn watch<K: Watched>(&self) -> EventStream<K> {
        self.as_ref().watch()
    }

    fn watch_namespaced<K>(&self, namespace: &str) -> EventStream<K>
    where
        K: Watched + Resource<Scope = NamespaceResourceScope>,
    {
        self.as_ref().watch_namespaced(namespace)
    }
}

/// Watch parameters shared by every informer
fn watch_config() -> watcher::Config {
    watcher::Config::default()
        .page_size(WATCH_PAGE_SIZE)
        .timeout(WATCH_TIMEOUT_SECONDS)
}
