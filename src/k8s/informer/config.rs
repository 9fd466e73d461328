/**
 * Configuration constants for informers and the informer manager
 */
use std::time::Duration;

/// Full resync interval for the config map informer.
///
/// Config map updates arrive through the watch stream right away. The resync
/// redelivers every cached config map to the handlers in case an update was
/// missed. Config maps change rarely, so half an hour is enough.
pub const CONFIG_MAP_RESYNC_PERIOD: Duration = Duration::from_secs(30 * 60);

/// Factory informers rely on the watch stream alone
pub const NO_RESYNC: Option<Duration> = None;

/// Server-side watch timeout in seconds (the API server caps this below 295)
pub const WATCH_TIMEOUT_SECONDS: u32 = 290;

/// Page size used for the initial list
pub const WATCH_PAGE_SIZE: u32 = 500;

/// Per-manager informer settings
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Resync period of the config map informer
    pub config_map_resync_period: Duration,
    /// Resync period applied to every informer created through the shared factory
    pub factory_resync_period: Option<Duration>,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            config_map_resync_period: CONFIG_MAP_RESYNC_PERIOD,
            factory_resync_period: NO_RESYNC,
        }
    }
}

/// Validate configuration constants at compile time
const _: () = {
    assert!(CONFIG_MAP_RESYNC_PERIOD.as_secs() > 0, "CONFIG_MAP_RESYNC_PERIOD must be greater than 0");
    assert!(WATCH_TIMEOUT_SECONDS > 0, "WATCH_TIMEOUT_SECONDS must be greater than 0");
    assert!(WATCH_TIMEOUT_SECONDS < 295, "WATCH_TIMEOUT_SECONDS must stay below 295");
    assert!(WATCH_PAGE_SIZE > 0, "WATCH_PAGE_SIZE must be greater than 0");
};
