/**
 * Event handlers attached to informers
 */
use std::fmt;
use uuid::Uuid;

/// Receives add, update and delete notifications for one resource kind.
///
/// Callbacks run on the informer's task while it holds its dispatch lock.
/// They must not block and must not register handlers on the same informer.
pub trait ResourceEventHandler<K>: Send + Sync {
    fn on_add(&self, obj: &K);
    fn on_update(&self, old: &K, new: &K);
    fn on_delete(&self, obj: &K);
}

type AddFn<K> = Box<dyn Fn(&K) + Send + Sync>;
type UpdateFn<K> = Box<dyn Fn(&K, &K) + Send + Sync>;
type DeleteFn<K> = Box<dyn Fn(&K) + Send + Sync>;

/// Handler built from plain closures; missing callbacks are no-ops
pub struct EventHandlerFns<K> {
    add: Option<AddFn<K>>,
    update: Option<UpdateFn<K>>,
    delete: Option<DeleteFn<K>>,
}

impl<K> Default for EventHandlerFns<K> {
    fn default() -> Self {
        Self {
            add: None,
            update: None,
            delete: None,
        }
    }
}

impl<K> EventHandlerFns<K> {
    /// Full add/update/delete triple
    #[must_use]
    pub fn new(
        add: impl Fn(&K) + Send + Sync + 'static,
        update: impl Fn(&K, &K) + Send + Sync + 'static,
        delete: impl Fn(&K) + Send + Sync + 'static,
    ) -> Self {
        Self {
            add: Some(Box::new(add)),
            update: Some(Box::new(update)),
            delete: Some(Box::new(delete)),
        }
    }

    #[must_use]
    pub fn on_add(mut self, f: impl Fn(&K) + Send + Sync + 'static) -> Self {
        self.add = Some(Box::new(f));
        self
    }

    #[must_use]
    pub fn on_update(mut self, f: impl Fn(&K, &K) + Send + Sync + 'static) -> Self {
        self.update = Some(Box::new(f));
        self
    }

    #[must_use]
    pub fn on_delete(mut self, f: impl Fn(&K) + Send + Sync + 'static) -> Self {
        self.delete = Some(Box::new(f));
        self
    }
}

impl<K> ResourceEventHandler<K> for EventHandlerFns<K> {
    fn on_add(&self, obj: &K) {
        if let Some(add) = &self.add {
            add(obj);
        }
    }

    fn on_update(&self, old: &K, new: &K) {
        if let Some(update) = &self.update {
            update(old, new);
        }
    }

    fn on_delete(&self, obj: &K) {
        if let Some(delete) = &self.delete {
            delete(obj);
        }
    }
}

impl<K> fmt::Debug for EventHandlerFns<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventHandlerFns")
            .field("add", &self.add.is_some())
            .field("update", &self.update.is_some())
            .field("delete", &self.delete.is_some())
            .finish()
    }
}

/// Returned by a successful handler registration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerRegistration {
    id: String,
    kind: String,
}

impl HandlerRegistration {
    pub(crate) fn new(kind: &str) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind: kind.to_string(),
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn kind(&self) -> &str {
        &self.kind
    }
}
