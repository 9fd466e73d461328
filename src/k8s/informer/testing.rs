/**
 * In-memory watch source for tests
 *
 * Each resource kind gets an unbounded channel. Tests push watcher events
 * through a `FakeSender`; informers read them back as their watch stream.
 */
use super::source::{EventStream, WatchSource, Watched};
use futures::StreamExt;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::NamespaceResourceScope;
use kube::Resource;
use kube::runtime::watcher::{self, Event};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

type Item<K> = watcher::Result<Event<K>>;

struct Channel<K> {
    tx: mpsc::UnboundedSender<Item<K>>,
    rx: Option<mpsc::UnboundedReceiver<Item<K>>>,
}

/// A `watch` call observed by the source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchCall {
    pub kind: String,
    pub namespace: Option<String>,
}

#[derive(Default)]
struct Inner {
    channels: HashMap<TypeId, Box<dyn Any + Send>>,
    calls: Vec<WatchCall>,
}

/// Watch source backed by in-memory channels
#[derive(Clone, Default)]
pub struct FakeSource {
    inner: Arc<Mutex<Inner>>,
}

fn lock(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

fn channel_mut<K: Watched>(inner: &mut Inner) -> Option<&mut Channel<K>> {
    inner
        .channels
        .entry(TypeId::of::<K>())
        .or_insert_with(|| {
            let (tx, rx) = mpsc::unbounded_channel::<Item<K>>();
            Box::new(Channel { tx, rx: Some(rx) }) as Box<dyn Any + Send>
        })
        .downcast_mut::<Channel<K>>()
}

impl FakeSource {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle for pushing events of kind `K`
    #[must_use]
    pub fn sender<K: Watched>(&self) -> FakeSender<K> {
        let mut inner = lock(&self.inner);
        let tx = channel_mut::<K>(&mut inner).map(|channel| channel.tx.clone());
        FakeSender { tx }
    }

    /// Every watch opened so far, in order
    #[must_use]
    pub fn watch_calls(&self) -> Vec<WatchCall> {
        lock(&self.inner).calls.clone()
    }

    #[must_use]
    pub fn watch_count(&self, kind: &str) -> usize {
        lock(&self.inner)
            .calls
            .iter()
            .filter(|call| call.kind == kind)
            .count()
    }

    /// True when both handles share the same channels
    #[must_use]
    pub fn same_as(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl FakeSource {
    fn open<K: Watched>(&self, namespace: Option<&str>) -> EventStream<K> {
        let mut inner = lock(&self.inner);
        inner.calls.push(WatchCall {
            kind: K::kind(&()).into_owned(),
            namespace: namespace.map(str::to_string),
        });

        // A second watch on the same kind never yields anything
        match channel_mut::<K>(&mut inner).and_then(|channel| channel.rx.take()) {
            Some(rx) => UnboundedReceiverStream::new(rx).boxed(),
            None => futures::stream::pending().boxed(),
        }
    }
}

impl WatchSource for FakeSource {
    fn watch<K: Watched>(&self) -> EventStream<K> {
        self.open(None)
    }

    fn watch_namespaced<K>(&self, namespace: &str) -> EventStream<K>
    where
        K: Watched + Resource<Scope = NamespaceResourceScope>,
    {
        self.open(Some(namespace))
    }
}

impl std::fmt::Debug for FakeSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FakeSource")
            .field("calls", &lock(&self.inner).calls)
            .finish_non_exhaustive()
    }
}

/// Pushes watcher events into a `FakeSource`
#[derive(Clone)]
pub struct FakeSender<K> {
    tx: Option<mpsc::UnboundedSender<Item<K>>>,
}

impl<K: Watched> FakeSender<K> {
    fn send(&self, event: Event<K>) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(Ok(event));
        }
    }

    /// Emit a complete initial list
    pub fn init(&self, objects: Vec<K>) {
        self.send(Event::Init);
        for obj in objects {
            self.send(Event::InitApply(obj));
        }
        self.send(Event::InitDone);
    }

    pub fn apply(&self, obj: K) {
        self.send(Event::Apply(obj));
    }

    pub fn delete(&self, obj: K) {
        self.send(Event::Delete(obj));
    }
}

/// Minimal named pod
#[must_use]
pub fn pod(namespace: &str, name: &str) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(namespace.to_string()),
            ..ObjectMeta::default()
        },
        ..Pod::default()
    }
}

/// Object metadata with just a name and optional namespace
#[must_use]
pub fn meta(namespace: Option<&str>, name: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: namespace.map(str::to_string),
        ..ObjectMeta::default()
    }
}
