/// Manager behaviour driven through the in-memory watch source
///
/// Run with: cargo test --test `informer_manager` -- --nocapture
use k8s_openapi::api::core::v1::{ConfigMap, PersistentVolume, PersistentVolumeClaim, Pod};
use kube::ResourceExt;
use kubewatch::k8s::informer::testing::{meta, pod, FakeSender, FakeSource};
use kubewatch::k8s::informer::{
    ClientIdentity, EventHandlerFns, InformerManager, InformerRegistry, ManagerConfig,
};
use kubewatch::Error;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

type Log = Arc<Mutex<Vec<String>>>;

fn recorder(log: &Log, tag: &str) -> EventHandlerFns<Pod> {
    let (a, u, d) = (log.clone(), log.clone(), log.clone());
    let (ta, tu, td) = (tag.to_string(), tag.to_string(), tag.to_string());
    EventHandlerFns::new(
        move |p: &Pod| a.lock().unwrap().push(format!("{ta}:add:{}", p.name_any())),
        move |_: &Pod, p: &Pod| u.lock().unwrap().push(format!("{tu}:update:{}", p.name_any())),
        move |p: &Pod| d.lock().unwrap().push(format!("{td}:delete:{}", p.name_any())),
    )
}

struct Feeds {
    pvs: FakeSender<PersistentVolume>,
    pvcs: FakeSender<PersistentVolumeClaim>,
    pods: FakeSender<Pod>,
    config_maps: FakeSender<ConfigMap>,
}

/// Manager with all four tracked listeners registered
fn tracked_manager(source: &FakeSource, pod_log: &Log) -> (Arc<InformerManager<FakeSource>>, Feeds) {
    let registry = InformerRegistry::new(CancellationToken::new());
    let manager = registry.get_or_create(ClientIdentity::InCluster, source.clone());

    let feeds = Feeds {
        pvs: source.sender(),
        pvcs: source.sender(),
        pods: source.sender(),
        config_maps: source.sender(),
    };

    manager.add_pv_listener(EventHandlerFns::default()).unwrap();
    manager.add_pvc_listener(EventHandlerFns::default()).unwrap();
    manager.add_pod_listener(recorder(pod_log, "first")).unwrap();
    manager
        .add_config_map_listener("kube-system", EventHandlerFns::default())
        .unwrap();

    (manager, feeds)
}

#[tokio::test]
async fn test_start_waits_for_initial_pod_list() {
    let source = FakeSource::new();
    let log = Log::default();
    let (manager, feeds) = tracked_manager(&source, &log);

    // Injected before start; only visible once the informers run
    feeds.pods.init(vec![pod("default", "p1")]);
    feeds.pvs.init(vec![]);
    feeds.pvcs.init(vec![]);
    feeds.config_maps.init(vec![]);

    let token = timeout(Duration::from_secs(5), manager.start())
        .await
        .expect("start should not hang")
        .expect("caches should sync");
    assert!(!token.is_cancelled());

    assert_eq!(*log.lock().unwrap(), vec!["first:add:p1"]);
    assert!(manager.pod_lister().get_namespaced("default", "p1").is_some());
    assert!(manager.pv_lister().is_empty());

    manager.shutdown().await;
}

#[tokio::test]
async fn test_listers_reflect_initial_state() {
    let source = FakeSource::new();
    let log = Log::default();
    let (manager, feeds) = tracked_manager(&source, &log);

    feeds.pods.init(vec![pod("default", "p1"), pod("default", "p2")]);
    feeds.pvs.init(vec![PersistentVolume {
        metadata: meta(None, "pv-1"),
        ..PersistentVolume::default()
    }]);
    feeds.pvcs.init(vec![PersistentVolumeClaim {
        metadata: meta(Some("default"), "claim-1"),
        ..PersistentVolumeClaim::default()
    }]);
    feeds.config_maps.init(vec![ConfigMap {
        metadata: meta(Some("kube-system"), "settings"),
        ..ConfigMap::default()
    }]);

    timeout(Duration::from_secs(5), manager.start())
        .await
        .unwrap()
        .unwrap();

    assert_eq!(manager.pod_lister().len(), 2);
    assert!(manager.pv_lister().get("pv-1").is_some());
    assert!(manager
        .pvc_lister()
        .get_namespaced("default", "claim-1")
        .is_some());
    assert!(manager
        .config_map_lister()
        .get_namespaced("kube-system", "settings")
        .is_some());

    manager.shutdown().await;
}

#[tokio::test]
async fn test_listeners_are_cumulative() {
    let source = FakeSource::new();
    let log = Log::default();
    let (manager, feeds) = tracked_manager(&source, &log);
    manager.add_pod_listener(recorder(&log, "second")).unwrap();

    feeds.pods.init(vec![]);
    feeds.pvs.init(vec![]);
    feeds.pvcs.init(vec![]);
    feeds.config_maps.init(vec![]);
    timeout(Duration::from_secs(5), manager.start())
        .await
        .unwrap()
        .unwrap();

    feeds.pods.apply(pod("default", "p1"));
    feeds.pods.apply(pod("default", "p1"));
    feeds.pods.delete(pod("default", "p1"));

    timeout(Duration::from_secs(5), async {
        while log.lock().unwrap().len() < 6 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    assert_eq!(
        *log.lock().unwrap(),
        vec![
            "first:add:p1",
            "second:add:p1",
            "first:update:p1",
            "second:update:p1",
            "first:delete:p1",
            "second:delete:p1",
        ]
    );

    manager.shutdown().await;
}

#[tokio::test]
async fn test_cancellation_before_sync_fails_start() {
    let source = FakeSource::new();
    let log = Log::default();
    let (manager, feeds) = tracked_manager(&source, &log);

    // Pods never finish their initial list
    feeds.pvs.init(vec![]);
    feeds.pvcs.init(vec![]);
    feeds.config_maps.init(vec![]);

    let starter = {
        let manager = manager.clone();
        tokio::spawn(async move { manager.start().await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    manager.shutdown_token().cancel();

    let result = timeout(Duration::from_secs(5), starter)
        .await
        .unwrap()
        .unwrap();
    match result {
        Err(Error::CacheSyncCancelled { pending }) => assert_eq!(pending, vec!["Pod"]),
        other => panic!("expected cancelled sync, got {other:?}"),
    }

    manager.shutdown().await;
    assert_eq!(manager.running_tasks(), 0);
}

#[tokio::test]
async fn test_start_without_tracked_listeners_never_blocks() {
    let source = FakeSource::new();
    let manager = InformerManager::new(
        ClientIdentity::Supervisor,
        source.clone(),
        CancellationToken::new(),
        ManagerConfig::default(),
    );

    // Three of the four tracked kinds; nothing ever syncs
    manager.add_pv_listener(EventHandlerFns::default()).unwrap();
    manager.add_pvc_listener(EventHandlerFns::default()).unwrap();
    manager.add_pod_listener(EventHandlerFns::default()).unwrap();

    let token = timeout(Duration::from_secs(1), manager.start())
        .await
        .unwrap()
        .unwrap();
    assert!(!token.is_cancelled());

    // Still returns once the token has fired
    manager.shutdown().await;
    let token = timeout(Duration::from_secs(1), manager.start())
        .await
        .unwrap()
        .unwrap();
    assert!(token.is_cancelled());
}

#[tokio::test]
async fn test_config_map_run_loop_started_once() {
    let source = FakeSource::new();
    let log = Log::default();
    let (manager, _feeds) = tracked_manager(&source, &log);

    manager
        .add_config_map_listener("kube-system", EventHandlerFns::default())
        .unwrap();
    manager
        .add_config_map_listener("kube-system", EventHandlerFns::default())
        .unwrap();

    assert_eq!(source.watch_count("ConfigMap"), 1);
    // start() launches the factory informers but never the config map one again
    manager.shutdown_token().cancel();
    let _ = manager.start().await;
    assert_eq!(source.watch_count("ConfigMap"), 1);
    assert_eq!(source.watch_count("Pod"), 1);

    manager.shutdown().await;
}
