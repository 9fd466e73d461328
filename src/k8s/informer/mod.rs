pub mod config;
pub mod handler;
pub mod lister;
pub mod manager;
pub mod registry;
pub mod shared;
pub mod shutdown;
pub mod source;
#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use config::ManagerConfig;
pub use handler::{EventHandlerFns, HandlerRegistration, ResourceEventHandler};
pub use lister::Lister;
pub use manager::{wait_for_cache_sync, ClientIdentity, InformerManager};
pub use registry::InformerRegistry;
pub use shared::{CacheSynced, InformerOptions, SharedInformer};
pub use source::{EventStream, WatchSource, Watched};
