// Client creation with custom user-agent support for kube 2.x
use crate::error::Result;
use hyper::http::{HeaderName, HeaderValue};
use kube::config::KubeConfigOptions;
use kube::{Client, Config};
use tracing::{debug, warn};

/// Create a client for the cluster this process runs in (or the current kubeconfig context)
///
/// # Errors
///
/// Will return `Err` if no kube configuration can be inferred
pub async fn new(custom_user_agent: Option<&str>) -> Result<Client> {
    let mut config = Config::infer().await?;
    add_user_agent_header(&mut config, custom_user_agent);
    debug!("🔧 Creating client for {}", config.cluster_url);
    Ok(Client::try_from(config)?)
}

/// Create a client for a named kubeconfig context, used for the supervisor cluster
///
/// # Errors
///
/// Will return `Err` if the kubeconfig cannot be read or has no such context
pub async fn new_for_context(context: &str, custom_user_agent: Option<&str>) -> Result<Client> {
    let options = KubeConfigOptions {
        context: Some(context.to_string()),
        ..KubeConfigOptions::default()
    };
    let mut config = Config::from_kubeconfig(&options).await?;
    add_user_agent_header(&mut config, custom_user_agent);
    debug!("🔧 Creating client for context {} ({})", context, config.cluster_url);
    Ok(Client::try_from(config)?)
}

/// Add a `user-agent` header to the config.
///
/// Invalid header values are logged and skipped so the default user agent applies.
pub fn add_user_agent_header(config: &mut Config, user_agent: Option<&str>) {
    let Some(user_agent) = user_agent else {
        return;
    };

    match HeaderValue::from_str(user_agent) {
        Ok(header_value) => config
            .headers
            .push((HeaderName::from_static("user-agent"), header_value)),
        Err(e) => warn!("Ignoring invalid user agent {:?}: {}", user_agent, e),
    }
}
