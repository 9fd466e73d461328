/**
 * Informer manager
 *
 * Owns the informers of one cluster connection. Informers are created lazily
 * the first time a listener or lister asks for their kind; `start` launches
 * them and waits for the tracked caches to finish their initial list.
 */
use super::config::ManagerConfig;
use super::handler::{HandlerRegistration, ResourceEventHandler};
use super::lister::Lister;
use super::shared::{CacheSynced, InformerOptions, SharedInformer};
use super::source::{WatchSource, Watched};
use crate::error::{Error, Result};
use futures::future::join_all;
use k8s_openapi::api::core::v1::{
    ConfigMap, Namespace, Node, PersistentVolume, PersistentVolumeClaim, Pod,
};
use k8s_openapi::api::storage::v1::{CSINode, VolumeAttachment};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

/// Which cluster a manager is attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientIdentity {
    /// The cluster this process runs in
    InCluster,
    /// The remote supervisor cluster
    Supervisor,
}

impl fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InCluster => write!(f, "in-cluster"),
            Self::Supervisor => write!(f, "supervisor"),
        }
    }
}

type Slot<K> = Option<Arc<SharedInformer<K>>>;

/// Lazily created informers plus the synced predicates gating `start`
#[derive(Default)]
struct Informers {
    node: Slot<Node>,
    csi_node: Slot<CSINode>,
    pv: Slot<PersistentVolume>,
    pvc: Slot<PersistentVolumeClaim>,
    namespace: Slot<Namespace>,
    config_map: Slot<ConfigMap>,
    pod: Slot<Pod>,
    volume_attachment: Slot<VolumeAttachment>,

    pv_synced: Option<CacheSynced>,
    pvc_synced: Option<CacheSynced>,
    namespace_synced: Option<CacheSynced>,
    config_map_synced: Option<CacheSynced>,
    pod_synced: Option<CacheSynced>,
}

impl Informers {
    /// Synced predicates `start` waits on, or None if any was never registered.
    ///
    /// Namespace, node, CSI node and volume attachment caches are not part of the gate.
    fn barrier(&self) -> Option<Vec<CacheSynced>> {
        match (
            &self.pv_synced,
            &self.pvc_synced,
            &self.pod_synced,
            &self.config_map_synced,
        ) {
            (Some(pv), Some(pvc), Some(pod), Some(cm)) => {
                Some(vec![pv.clone(), pvc.clone(), pod.clone(), cm.clone()])
            }
            _ => None,
        }
    }
}

/// Mirrors selected resource kinds of one cluster and routes their events
pub struct InformerManager<S: WatchSource> {
    identity: ClientIdentity,
    source: S,
    config: ManagerConfig,
    shutdown: CancellationToken,
    informers: Mutex<Informers>,
    tasks: TaskTracker,
}

impl<S: WatchSource> InformerManager<S> {
    #[must_use]
    pub fn new(
        identity: ClientIdentity,
        source: S,
        shutdown: CancellationToken,
        config: ManagerConfig,
    ) -> Self {
        Self {
            identity,
            source,
            config,
            shutdown,
            informers: Mutex::new(Informers::default()),
            tasks: TaskTracker::new(),
        }
    }

    #[must_use]
    pub const fn identity(&self) -> ClientIdentity {
        self.identity
    }

    #[must_use]
    pub const fn source(&self) -> &S {
        &self.source
    }

    #[must_use]
    pub const fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Token shared by every informer of this manager
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Number of informer and run-loop tasks still alive
    #[must_use]
    pub fn running_tasks(&self) -> usize {
        self.tasks.len()
    }

    fn informers(&self) -> MutexGuard<'_, Informers> {
        self.informers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Get or create a factory informer under the manager lock
    fn factory_informer<K: Watched>(&self, slot: &mut Slot<K>) -> Arc<SharedInformer<K>> {
        slot.get_or_insert_with(|| {
            debug!("🆕 Creating {} informer for {} client", K::kind(&()), self.identity);
            Arc::new(SharedInformer::new(InformerOptions {
                namespace: None,
                resync_period: self.config.factory_resync_period,
            }))
        })
        .clone()
    }

    fn register<K, H>(&self, informer: &SharedInformer<K>, handler: H) -> Result<HandlerRegistration>
    where
        K: Watched,
        H: ResourceEventHandler<K> + 'static,
    {
        let result = if self.shutdown.is_cancelled() {
            Err(Error::InformerStopped {
                kind: informer.kind().to_string(),
            })
        } else {
            informer.add_event_handler(handler)
        };

        if let Err(e) = &result {
            warn!("❌ Failed to add {} event handler: {}", informer.kind(), e);
        }
        result
    }

    /// Hooks up node callbacks.
    ///
    /// # Errors
    ///
    /// Returns `Error::InformerStopped` if the manager has been shut down.
    pub fn add_node_listener<H>(&self, handler: H) -> Result<HandlerRegistration>
    where
        H: ResourceEventHandler<Node> + 'static,
    {
        let informer = {
            let mut informers = self.informers();
            self.factory_informer(&mut informers.node)
        };
        self.register(&informer, handler)
    }

    /// Hooks up CSI node callbacks.
    ///
    /// # Errors
    ///
    /// Returns `Error::InformerStopped` if the manager has been shut down.
    pub fn add_csi_node_listener<H>(&self, handler: H) -> Result<HandlerRegistration>
    where
        H: ResourceEventHandler<CSINode> + 'static,
    {
        let informer = {
            let mut informers = self.informers();
            self.factory_informer(&mut informers.csi_node)
        };
        self.register(&informer, handler)
    }

    /// Hooks up persistent volume callbacks; the PV cache gates `start`.
    ///
    /// # Errors
    ///
    /// Returns `Error::InformerStopped` if the manager has been shut down.
    pub fn add_pv_listener<H>(&self, handler: H) -> Result<HandlerRegistration>
    where
        H: ResourceEventHandler<PersistentVolume> + 'static,
    {
        let informer = {
            let mut informers = self.informers();
            let informer = self.factory_informer(&mut informers.pv);
            informers.pv_synced = Some(informer.synced());
            informer
        };
        self.register(&informer, handler)
    }

    /// Hooks up persistent volume claim callbacks; the PVC cache gates `start`.
    ///
    /// # Errors
    ///
    /// Returns `Error::InformerStopped` if the manager has been shut down.
    pub fn add_pvc_listener<H>(&self, handler: H) -> Result<HandlerRegistration>
    where
        H: ResourceEventHandler<PersistentVolumeClaim> + 'static,
    {
        let informer = {
            let mut informers = self.informers();
            let informer = self.factory_informer(&mut informers.pvc);
            informers.pvc_synced = Some(informer.synced());
            informer
        };
        self.register(&informer, handler)
    }

    /// Hooks up namespace callbacks.
    ///
    /// # Errors
    ///
    /// Returns `Error::InformerStopped` if the manager has been shut down.
    pub fn add_namespace_listener<H>(&self, handler: H) -> Result<HandlerRegistration>
    where
        H: ResourceEventHandler<Namespace> + 'static,
    {
        let informer = {
            let mut informers = self.informers();
            let informer = self.factory_informer(&mut informers.namespace);
            informers.namespace_synced = Some(informer.synced());
            informer
        };
        self.register(&informer, handler)
    }

    /// Hooks up config map callbacks for one namespace and starts the informer.
    ///
    /// The config map informer lives outside the shared factory: it watches a
    /// single namespace, resyncs periodically and is running as soon as the
    /// first listener is attached. The namespace of the first call wins.
    ///
    /// # Errors
    ///
    /// Returns `Error::InformerStopped` if the manager has been shut down.
    pub fn add_config_map_listener<H>(&self, namespace: &str, handler: H) -> Result<HandlerRegistration>
    where
        H: ResourceEventHandler<ConfigMap> + 'static,
    {
        let informer = {
            let mut informers = self.informers();
            let informer = informers
                .config_map
                .get_or_insert_with(|| {
                    debug!("🆕 Creating ConfigMap informer for namespace {}", namespace);
                    Arc::new(SharedInformer::new(InformerOptions {
                        namespace: Some(namespace.to_string()),
                        resync_period: Some(self.config.config_map_resync_period),
                    }))
                })
                .clone();
            informers.config_map_synced = Some(informer.synced());
            informer
        };

        if informer.namespace() != Some(namespace) {
            warn!(
                "ConfigMap informer already watches namespace {}, ignoring {}",
                informer.namespace().unwrap_or("all"),
                namespace
            );
        }

        let registration = self.register(&informer, handler)?;
        informer.start_namespaced(&self.source, &self.shutdown, &self.tasks);
        Ok(registration)
    }

    /// Hooks up pod callbacks; the pod cache gates `start`.
    ///
    /// # Errors
    ///
    /// Returns `Error::InformerStopped` if the manager has been shut down.
    pub fn add_pod_listener<H>(&self, handler: H) -> Result<HandlerRegistration>
    where
        H: ResourceEventHandler<Pod> + 'static,
    {
        let informer = {
            let mut informers = self.informers();
            let informer = self.factory_informer(&mut informers.pod);
            informers.pod_synced = Some(informer.synced());
            informer
        };
        self.register(&informer, handler)
    }

    /// Hooks up volume attachment callbacks.
    ///
    /// # Errors
    ///
    /// Returns `Error::InformerStopped` if the manager has been shut down.
    pub fn add_volume_attachment_listener<H>(&self, handler: H) -> Result<HandlerRegistration>
    where
        H: ResourceEventHandler<VolumeAttachment> + 'static,
    {
        let informer = {
            let mut informers = self.informers();
            self.factory_informer(&mut informers.volume_attachment)
        };
        self.register(&informer, handler)
    }

    #[must_use]
    pub fn pv_lister(&self) -> Lister<PersistentVolume> {
        let mut informers = self.informers();
        self.factory_informer(&mut informers.pv).lister()
    }

    #[must_use]
    pub fn pvc_lister(&self) -> Lister<PersistentVolumeClaim> {
        let mut informers = self.informers();
        self.factory_informer(&mut informers.pvc).lister()
    }

    #[must_use]
    pub fn pod_lister(&self) -> Lister<Pod> {
        let mut informers = self.informers();
        self.factory_informer(&mut informers.pod).lister()
    }

    /// Config maps of the watched namespace; empty until a listener is registered
    #[must_use]
    pub fn config_map_lister(&self) -> Lister<ConfigMap> {
        self.informers()
            .config_map
            .as_ref()
            .map_or_else(Lister::empty, |informer| informer.lister())
    }

    /// Whether the namespace cache has finished its initial list (false if never registered)
    #[must_use]
    pub fn namespace_synced(&self) -> bool {
        self.informers()
            .namespace_synced
            .as_ref()
            .is_some_and(CacheSynced::is_synced)
    }

    /// Start every factory informer that is not running yet; returns how many were launched
    fn start_factory(&self) -> usize {
        let informers = self.informers();
        let (source, shutdown, tasks) = (&self.source, &self.shutdown, &self.tasks);

        [
            informers.node.as_ref().map(|i| i.start(source, shutdown, tasks)),
            informers.csi_node.as_ref().map(|i| i.start(source, shutdown, tasks)),
            informers.pv.as_ref().map(|i| i.start(source, shutdown, tasks)),
            informers.pvc.as_ref().map(|i| i.start(source, shutdown, tasks)),
            informers.namespace.as_ref().map(|i| i.start(source, shutdown, tasks)),
            informers.pod.as_ref().map(|i| i.start(source, shutdown, tasks)),
            informers
                .volume_attachment
                .as_ref()
                .map(|i| i.start(source, shutdown, tasks)),
        ]
        .into_iter()
        .filter(|launched| *launched == Some(true))
        .count()
    }

    /// Start the informers and wait for the tracked caches to sync.
    ///
    /// The wait only happens when PV, PVC, pod and config map listeners were all
    /// registered; otherwise the token is returned right away.
    ///
    /// # Errors
    ///
    /// Returns `Error::CacheSyncCancelled` if shutdown fires before every tracked
    /// cache has synced.
    pub async fn start(&self) -> Result<CancellationToken> {
        let launched = self.start_factory();
        info!("🚀 Started {} informers for {} client", launched, self.identity);

        let barrier = self.informers().barrier();
        match barrier {
            Some(synced) => {
                wait_for_cache_sync(&self.shutdown, &synced).await?;
                info!("✅ Informer caches synced for {} client", self.identity);
            }
            None => debug!("Not every tracked listener is registered, skipping cache sync wait"),
        }

        Ok(self.shutdown.clone())
    }

    /// Cancel every informer of this manager and wait for their tasks to finish
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        self.tasks.close();
        self.tasks.wait().await;
        info!("🛑 Informer manager for {} client shut down", self.identity);
    }
}

impl<S: WatchSource> fmt::Debug for InformerManager<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InformerManager")
            .field("identity", &self.identity)
            .field("stopped", &self.is_stopped())
            .field("running_tasks", &self.running_tasks())
            .finish_non_exhaustive()
    }
}

/// Wait until every predicate reports synced or `shutdown` fires.
///
/// # Errors
///
/// Returns `Error::CacheSyncCancelled` naming the kinds that had not synced.
pub async fn wait_for_cache_sync(shutdown: &CancellationToken, synced: &[CacheSynced]) -> Result<()> {
    let all_synced = join_all(synced.iter().map(|s| s.wait()));

    tokio::select! {
        biased;
        _ = all_synced => Ok(()),
        () = shutdown.cancelled() => {
            let pending: Vec<String> = synced
                .iter()
                .filter(|s| !s.is_synced())
                .map(|s| s.kind().to_string())
                .collect();
            warn!("⏹️ Cache sync cancelled, pending: {:?}", pending);
            Err(Error::CacheSyncCancelled { pending })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::k8s::informer::handler::EventHandlerFns;
    use crate::k8s::informer::testing::{meta, FakeSource};
    use std::time::Duration;
    use tokio::time::timeout;

    fn manager(source: &FakeSource) -> InformerManager<FakeSource> {
        InformerManager::new(
            ClientIdentity::InCluster,
            source.clone(),
            CancellationToken::new(),
            ManagerConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_informer_created_once_per_kind() {
        let source = FakeSource::new();
        let manager = manager(&source);

        manager.add_pod_listener(EventHandlerFns::default()).unwrap();
        manager.add_pod_listener(EventHandlerFns::default()).unwrap();
        let _ = manager.pod_lister();

        let informer = manager.informers().pod.clone().unwrap();
        assert_eq!(informer.handler_count(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_registration_shares_one_informer() {
        const TASKS: usize = 16;
        let source = FakeSource::new();
        let manager = Arc::new(manager(&source));
        let gate = Arc::new(tokio::sync::Barrier::new(TASKS));

        let handles: Vec<_> = (0..TASKS)
            .map(|_| {
                let manager = Arc::clone(&manager);
                let gate = Arc::clone(&gate);
                tokio::spawn(async move {
                    gate.wait().await;
                    manager.add_pod_listener(EventHandlerFns::default())
                })
            })
            .collect();
        for handle in join_all(handles).await {
            handle.unwrap().unwrap();
        }

        let informer = manager.informers().pod.clone().unwrap();
        assert_eq!(informer.handler_count(), TASKS);

        timeout(Duration::from_secs(1), manager.start())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(source.watch_count("Pod"), 1);

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_csi_node_has_its_own_informer() {
        let source = FakeSource::new();
        let manager = manager(&source);

        manager.add_node_listener(EventHandlerFns::default()).unwrap();
        manager.add_csi_node_listener(EventHandlerFns::default()).unwrap();

        let informers = manager.informers();
        assert_eq!(informers.node.as_ref().unwrap().handler_count(), 1);
        assert_eq!(informers.csi_node.as_ref().unwrap().handler_count(), 1);
    }

    #[tokio::test]
    async fn test_start_without_tracked_listeners_returns_immediately() {
        let source = FakeSource::new();
        let manager = manager(&source);
        manager.add_node_listener(EventHandlerFns::default()).unwrap();
        manager.add_pod_listener(EventHandlerFns::default()).unwrap();

        let token = timeout(Duration::from_secs(1), manager.start())
            .await
            .unwrap()
            .unwrap();
        assert!(!token.is_cancelled());
        assert_eq!(source.watch_count("Node"), 1);
        assert_eq!(source.watch_count("Pod"), 1);

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_start_only_launches_new_informers() {
        let source = FakeSource::new();
        let manager = manager(&source);
        manager.add_pv_listener(EventHandlerFns::default()).unwrap();

        assert_eq!(manager.start_factory(), 1);
        manager.add_pvc_listener(EventHandlerFns::default()).unwrap();
        assert_eq!(manager.start_factory(), 1);
        assert_eq!(manager.start_factory(), 0);

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_config_map_listener_starts_single_namespaced_loop() {
        let source = FakeSource::new();
        let manager = manager(&source);

        manager
            .add_config_map_listener("kube-system", EventHandlerFns::default())
            .unwrap();
        manager
            .add_config_map_listener("other", EventHandlerFns::default())
            .unwrap();

        let calls = source.watch_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].kind, "ConfigMap");
        assert_eq!(calls[0].namespace.as_deref(), Some("kube-system"));

        let informer = manager.informers().config_map.clone().unwrap();
        assert_eq!(informer.handler_count(), 2);
        assert_eq!(
            informer.resync_period(),
            Some(manager.config().config_map_resync_period)
        );

        manager.shutdown().await;
        assert_eq!(manager.running_tasks(), 0);
    }

    #[tokio::test]
    async fn test_config_map_lister_empty_until_registered() {
        let source = FakeSource::new();
        let manager = manager(&source);
        assert!(manager.config_map_lister().is_empty());

        let config_maps = source.sender::<ConfigMap>();
        manager
            .add_config_map_listener("kube-system", EventHandlerFns::default())
            .unwrap();
        config_maps.init(vec![ConfigMap {
            metadata: meta(Some("kube-system"), "settings"),
            ..ConfigMap::default()
        }]);

        let synced = manager.informers().config_map_synced.clone().unwrap();
        timeout(Duration::from_secs(5), synced.wait()).await.unwrap();
        assert!(manager
            .config_map_lister()
            .get_namespaced("kube-system", "settings")
            .is_some());

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_registration_after_shutdown_fails() {
        let source = FakeSource::new();
        let manager = manager(&source);
        manager.shutdown().await;

        let result = manager.add_pod_listener(EventHandlerFns::default());
        assert!(matches!(result, Err(Error::InformerStopped { .. })));
    }

    #[tokio::test]
    async fn test_namespace_sync_is_tracked_but_not_gating() {
        let source = FakeSource::new();
        let manager = manager(&source);
        let namespaces = source.sender::<Namespace>();
        manager
            .add_namespace_listener(EventHandlerFns::default())
            .unwrap();
        assert!(!manager.namespace_synced());

        manager.start().await.unwrap();
        namespaces.init(vec![Namespace {
            metadata: meta(None, "default"),
            ..Namespace::default()
        }]);
        timeout(Duration::from_secs(5), async {
            while !manager.namespace_synced() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        manager.shutdown().await;
    }

    #[tokio::test]
    async fn test_wait_for_cache_sync_reports_pending_kinds() {
        let informer = SharedInformer::<Pod>::new(InformerOptions::default());
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        let result = wait_for_cache_sync(&shutdown, &[informer.synced()]).await;
        match result {
            Err(Error::CacheSyncCancelled { pending }) => assert_eq!(pending, vec!["Pod"]),
            other => panic!("unexpected result: {other:?}"),
        }
    }
}
