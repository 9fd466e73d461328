/**
 * Shared informer
 *
 * One informer mirrors one resource kind. It consumes a watch stream, keeps a
 * reflector store up to date and fans every change out to its handlers.
 */
use super::handler::{HandlerRegistration, ResourceEventHandler};
use super::lister::Lister;
use super::source::{EventStream, WatchSource, Watched};
use crate::error::{Error, Result};
use futures::StreamExt;
use kube::runtime::reflector::{self, store::Writer, ObjectRef, Store};
use kube::runtime::watcher::Event;
use k8s_openapi::NamespaceResourceScope;
use kube::{Resource, ResourceExt};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval_at, Instant, Interval};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn, Instrument};

/// Construction parameters of an informer
#[derive(Debug, Clone, Default)]
pub struct InformerOptions {
    /// Restrict the watch to one namespace
    pub namespace: Option<String>,
    /// Redeliver every cached object as an update at this interval
    pub resync_period: Option<Duration>,
}

/// Synced predicate of one informer
#[derive(Debug, Clone)]
pub struct CacheSynced {
    kind: String,
    rx: watch::Receiver<bool>,
}

impl CacheSynced {
    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    #[must_use]
    pub fn is_synced(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the initial list has been applied and delivered
    pub async fn wait(&self) {
        let mut rx = self.rx.clone();
        let synced = rx.wait_for(|synced| *synced).await.is_ok();
        // The sender lives inside the informer; if it is gone nothing will ever sync.
        if !synced {
            std::future::pending::<()>().await;
        }
    }
}

struct RegisteredHandler<K> {
    id: String,
    handler: Arc<dyn ResourceEventHandler<K>>,
}

struct DispatchState<K: Watched> {
    writer: Writer<K>,
    handlers: Vec<RegisteredHandler<K>>,
}

enum Notification<K> {
    Add(Arc<K>),
    Update(Arc<K>, Arc<K>),
    Delete(Arc<K>),
}

impl<K> Notification<K> {
    fn deliver(&self, handler: &dyn ResourceEventHandler<K>) {
        match self {
            Self::Add(obj) => handler.on_add(obj),
            Self::Update(old, new) => handler.on_update(old, new),
            Self::Delete(obj) => handler.on_delete(obj),
        }
    }
}

/// Watch-backed cache of one resource kind plus its registered handlers
pub struct SharedInformer<K: Watched> {
    kind: String,
    options: InformerOptions,
    store: Store<K>,
    state: Mutex<DispatchState<K>>,
    synced_tx: watch::Sender<bool>,
    started: AtomicBool,
    stopped: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<K: Watched> SharedInformer<K> {
    #[must_use]
    pub fn new(options: InformerOptions) -> Self {
        let (store, writer) = reflector::store();
        let (synced_tx, _) = watch::channel(false);

        Self {
            kind: K::kind(&()).into_owned(),
            options,
            store,
            state: Mutex::new(DispatchState {
                writer,
                handlers: Vec::new(),
            }),
            synced_tx,
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        }
    }

    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }

    #[must_use]
    pub fn namespace(&self) -> Option<&str> {
        self.options.namespace.as_deref()
    }

    #[must_use]
    pub const fn resync_period(&self) -> Option<Duration> {
        self.options.resync_period
    }

    /// Attach a handler.
    ///
    /// Objects already in the cache are replayed to the new handler as adds
    /// before it joins the live stream.
    ///
    /// # Errors
    ///
    /// Returns `Error::InformerStopped` once the informer's run loop has exited.
    pub fn add_event_handler<H>(&self, handler: H) -> Result<HandlerRegistration>
    where
        H: ResourceEventHandler<K> + 'static,
    {
        if self.is_stopped() {
            return Err(Error::InformerStopped {
                kind: self.kind.clone(),
            });
        }

        let handler: Arc<dyn ResourceEventHandler<K>> = Arc::new(handler);
        let registration = HandlerRegistration::new(&self.kind);

        let mut state = lock(&self.state);
        for obj in self.store.state() {
            handler.on_add(&obj);
        }
        state.handlers.push(RegisteredHandler {
            id: registration.id().to_string(),
            handler,
        });
        debug!(
            "🔗 {} handler registered ({} total)",
            self.kind,
            state.handlers.len()
        );
        drop(state);

        Ok(registration)
    }

    /// Detach a handler; returns false if it was not registered here
    pub fn remove_event_handler(&self, registration: &HandlerRegistration) -> bool {
        let mut state = lock(&self.state);
        let before = state.handlers.len();
        state.handlers.retain(|h| h.id != registration.id());
        before != state.handlers.len()
    }

    #[must_use]
    pub fn handler_count(&self) -> usize {
        lock(&self.state).handlers.len()
    }

    #[must_use]
    pub fn has_synced(&self) -> bool {
        *self.synced_tx.borrow()
    }

    #[must_use]
    pub fn synced(&self) -> CacheSynced {
        CacheSynced {
            kind: self.kind.clone(),
            rx: self.synced_tx.subscribe(),
        }
    }

    #[must_use]
    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn lister(&self) -> Lister<K> {
        Lister::new(self.store.clone())
    }

    /// Launch the run loop on `tasks`.
    ///
    /// Only the first call starts a loop; later calls return false.
    pub fn start<S: WatchSource>(
        self: &Arc<Self>,
        source: &S,
        shutdown: &CancellationToken,
        tasks: &TaskTracker,
    ) -> bool {
        self.launch(|| source.watch::<K>(), shutdown, tasks)
    }

    /// Like `start`, but lists and watches inside the configured namespace
    /// when one is set.
    pub fn start_namespaced<S: WatchSource>(
        self: &Arc<Self>,
        source: &S,
        shutdown: &CancellationToken,
        tasks: &TaskTracker,
    ) -> bool
    where
        K: Resource<Scope = NamespaceResourceScope>,
    {
        let open = || match self.namespace() {
            Some(ns) => source.watch_namespaced::<K>(ns),
            None => source.watch::<K>(),
        };
        self.launch(open, shutdown, tasks)
    }

    fn launch(
        self: &Arc<Self>,
        open: impl FnOnce() -> EventStream<K>,
        shutdown: &CancellationToken,
        tasks: &TaskTracker,
    ) -> bool {
        if self
            .started
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("{} informer already running", self.kind);
            return false;
        }

        let events = open();
        let span = tracing::info_span!("informer", kind = %self.kind);
        tasks.spawn(
            Arc::clone(self)
                .run(events, shutdown.clone())
                .instrument(span),
        );
        true
    }

    async fn run(self: Arc<Self>, mut events: EventStream<K>, shutdown: CancellationToken) {
        info!(
            "🔍 Starting {} informer (namespace: {})",
            self.kind,
            self.namespace().unwrap_or("all")
        );

        let mut resync = self
            .options
            .resync_period
            .map(|period| interval_at(Instant::now() + period, period));
        let mut relisted = HashSet::new();
        let mut pending = Vec::new();

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                () = next_resync(&mut resync) => self.resync(),
                next = events.next() => match next {
                    Some(Ok(event)) => self.process(event, &mut relisted, &mut pending),
                    Some(Err(e)) => warn!("⚠️ {} watch stream error: {}", self.kind, e),
                    None => {
                        info!("{} watch stream ended, serving cache until shutdown", self.kind);
                        shutdown.cancelled().await;
                        break;
                    }
                },
            }
        }

        self.stopped.store(true, Ordering::SeqCst);
        info!("🛑 {} informer stopped", self.kind);
    }

    /// Apply one watcher event to the store, then notify handlers.
    ///
    /// A relist (`Init` .. `InitDone`) is applied atomically at `InitDone`; its
    /// notifications are held back until then.
    fn process(
        &self,
        event: Event<K>,
        relisted: &mut HashSet<ObjectRef<K>>,
        pending: &mut Vec<Notification<K>>,
    ) {
        let mut state = lock(&self.state);

        let ready = match &event {
            Event::Init => {
                relisted.clear();
                pending.clear();
                Vec::new()
            }
            Event::InitApply(obj) => {
                let key = ObjectRef::from_obj(obj);
                pending.push(self.upsert(&key, obj));
                relisted.insert(key);
                Vec::new()
            }
            Event::InitDone => {
                for old in self.store.state() {
                    if !relisted.contains(&ObjectRef::from_obj(old.as_ref())) {
                        pending.push(Notification::Delete(old));
                    }
                }
                relisted.clear();
                std::mem::take(pending)
            }
            Event::Apply(obj) => vec![self.upsert(&ObjectRef::from_obj(obj), obj)],
            Event::Delete(obj) => {
                debug!("🗑️ {} deleted: {}", self.kind, obj.name_any());
                vec![Notification::Delete(Arc::new(obj.clone()))]
            }
        };

        state.writer.apply_watcher_event(&event);

        for notification in &ready {
            for registered in &state.handlers {
                notification.deliver(registered.handler.as_ref());
            }
        }
        drop(state);

        if matches!(event, Event::InitDone) && !self.has_synced() {
            self.synced_tx.send_replace(true);
            info!("✅ {} informer synced ({} objects)", self.kind, self.store.len());
        }
    }

    fn upsert(&self, key: &ObjectRef<K>, obj: &K) -> Notification<K> {
        let new = Arc::new(obj.clone());
        match self.store.get(key) {
            Some(old) => Notification::Update(old, new),
            None => {
                debug!("➕ {} added: {}", self.kind, obj.name_any());
                Notification::Add(new)
            }
        }
    }

    /// Redeliver every cached object as an update to itself
    fn resync(&self) {
        let state = lock(&self.state);
        let objects = self.store.state();
        debug!("🔄 {} resync ({} objects)", self.kind, objects.len());
        for obj in &objects {
            for registered in &state.handlers {
                registered.handler.on_update(obj, obj);
            }
        }
    }
}

async fn next_resync(resync: &mut Option<Interval>) {
    match resync {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

impl<K: Watched> std::fmt::Debug for SharedInformer<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedInformer")
            .field("kind", &self.kind)
            .field("options", &self.options)
            .field("started", &self.is_started())
            .field("synced", &self.has_synced())
            .field("stopped", &self.is_stopped())
            .finish_non_exhaustive()
    }
}
