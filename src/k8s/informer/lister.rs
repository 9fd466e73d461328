/**
 * Read-only access to an informer's local cache
 */
use kube::runtime::reflector::{self, ObjectRef, Store};
use kube::{Resource, ResourceExt};
use std::collections::BTreeMap;
use std::sync::Arc;

use super::source::Watched;

/// Point-in-time queries against a cached resource kind.
///
/// Reads never touch the network. They reflect whatever the watch stream has
/// applied so far, and a lookup that matches nothing is simply empty.
#[derive(Clone)]
pub struct Lister<K: Watched> {
    store: Store<K>,
}

impl<K: Watched> Lister<K> {
    pub(crate) const fn new(store: Store<K>) -> Self {
        Self { store }
    }

    /// A lister with no backing informer; every query is empty
    #[must_use]
    pub fn empty() -> Self {
        let (store, _writer) = reflector::store();
        Self { store }
    }

    #[must_use]
    pub fn list(&self) -> Vec<Arc<K>> {
        self.store.state()
    }

    /// Look up a cluster-scoped object
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<K>> {
        self.store.get(&ObjectRef::new(name))
    }

    #[must_use]
    pub fn get_namespaced(&self, namespace: &str, name: &str) -> Option<Arc<K>> {
        self.store.get(&ObjectRef::new(name).within(namespace))
    }

    #[must_use]
    pub fn list_namespaced(&self, namespace: &str) -> Vec<Arc<K>> {
        self.store
            .state()
            .into_iter()
            .filter(|obj| obj.meta().namespace.as_deref() == Some(namespace))
            .collect()
    }

    /// Equality-based label selection; an empty selector matches everything
    #[must_use]
    pub fn list_by_labels(&self, selector: &BTreeMap<String, String>) -> Vec<Arc<K>> {
        self.store
            .state()
            .into_iter()
            .filter(|obj| {
                let labels = obj.labels();
                selector
                    .iter()
                    .all(|(key, value)| labels.get(key) == Some(value))
            })
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.store.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.store.is_empty()
    }
}

impl<K: Watched> std::fmt::Debug for Lister<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lister")
            .field("kind", &K::kind(&()))
            .field("len", &self.len())
            .finish()
    }
}
