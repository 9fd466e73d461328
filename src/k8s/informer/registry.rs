/**
 * Informer manager registry
 *
 * Holds at most one manager per client identity. The registry is created by
 * the application's composition root and handed to whoever needs a manager.
 */
use super::config::ManagerConfig;
use super::manager::{ClientIdentity, InformerManager};
use super::source::WatchSource;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

type ManagerSlot<S> = Mutex<Option<Arc<InformerManager<S>>>>;

/// One manager per identity, each slot behind its own lock
pub struct InformerRegistry<S: WatchSource> {
    root: CancellationToken,
    config: ManagerConfig,
    in_cluster: ManagerSlot<S>,
    supervisor: ManagerSlot<S>,
}

impl<S: WatchSource> InformerRegistry<S> {
    /// Managers created here stop when `root` is cancelled
    #[must_use]
    pub fn new(root: CancellationToken) -> Self {
        Self::with_config(root, ManagerConfig::default())
    }

    #[must_use]
    pub fn with_config(root: CancellationToken, config: ManagerConfig) -> Self {
        Self {
            root,
            config,
            in_cluster: Mutex::new(None),
            supervisor: Mutex::new(None),
        }
    }

    fn slot(&self, identity: ClientIdentity) -> MutexGuard<'_, Option<Arc<InformerManager<S>>>> {
        let slot = match identity {
            ClientIdentity::InCluster => &self.in_cluster,
            ClientIdentity::Supervisor => &self.supervisor,
        };
        slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Return the manager for `identity`, creating it from `source` on first use.
    ///
    /// Once a manager exists, `source` is dropped unused.
    pub fn get_or_create(&self, identity: ClientIdentity, source: S) -> Arc<InformerManager<S>> {
        let mut slot = self.slot(identity);

        if let Some(manager) = slot.as_ref() {
            debug!("♻️ Reusing informer manager for {} client", identity);
            return Arc::clone(manager);
        }

        let manager = Arc::new(InformerManager::new(
            identity,
            source,
            self.root.child_token(),
            self.config.clone(),
        ));
        *slot = Some(Arc::clone(&manager));
        drop(slot);

        info!("Created new informer manager for {} client", identity);
        manager
    }

    #[must_use]
    pub fn get(&self, identity: ClientIdentity) -> Option<Arc<InformerManager<S>>> {
        self.slot(identity).clone()
    }

    /// Shut down every manager and wait for their informers to exit
    pub async fn shutdown_all(&self) {
        self.root.cancel();
        for identity in [ClientIdentity::InCluster, ClientIdentity::Supervisor] {
            let manager = self.get(identity);
            if let Some(manager) = manager {
                manager.shutdown().await;
            }
        }
    }
}

impl<S: WatchSource> std::fmt::Debug for InformerRegistry<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InformerRegistry")
            .field("in_cluster", &self.get(ClientIdentity::InCluster).is_some())
            .field("supervisor", &self.get(ClientIdentity::Supervisor).is_some())
            .finish_non_exhaustive()
    }
}
