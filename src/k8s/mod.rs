pub mod client;
pub mod informer;

/// Default user agent - automatically uses the package version
///
/// Can be overridden on the command line with `--user-agent`.
pub const USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));
