use clap::{Parser, ValueEnum};
use kube::{Client, ResourceExt};
use kubewatch::error::Result;
use kubewatch::k8s::client;
use kubewatch::k8s::informer::shutdown::signal_token;
use kubewatch::k8s::informer::{
    ClientIdentity, EventHandlerFns, InformerManager, InformerRegistry, Watched,
};
use kubewatch::k8s::USER_AGENT;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Kind {
    Node,
    CsiNode,
    Pv,
    Pvc,
    Namespace,
    ConfigMap,
    Pod,
    VolumeAttachment,
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Mirror cluster resources and log their changes", long_about = None)]
struct Args {
    /// Namespace whose config maps are watched
    #[arg(long, default_value = "kube-system")]
    config_map_namespace: String,

    /// Kubeconfig context of the supervisor cluster; no supervisor manager without it
    #[arg(long)]
    supervisor_context: Option<String>,

    /// Resource kinds to watch
    #[arg(long, value_enum, value_delimiter = ',', default_value = "pv,pvc,pod,config-map")]
    kinds: Vec<Kind>,

    /// Override the user-agent sent to the API server
    #[arg(long)]
    user_agent: Option<String>,
}

fn logging_handler<K: Watched>(identity: ClientIdentity) -> EventHandlerFns<K> {
    EventHandlerFns::new(
        move |obj: &K| debug!("[{}] ➕ {} {}", identity, K::kind(&()), obj.name_any()),
        move |_: &K, obj: &K| debug!("[{}] 📝 {} {}", identity, K::kind(&()), obj.name_any()),
        move |obj: &K| debug!("[{}] 🗑️ {} {}", identity, K::kind(&()), obj.name_any()),
    )
}

fn register(manager: &InformerManager<Client>, args: &Args) -> Result<()> {
    let identity = manager.identity();
    for kind in &args.kinds {
        match kind {
            Kind::Node => manager.add_node_listener(logging_handler(identity))?,
            Kind::CsiNode => manager.add_csi_node_listener(logging_handler(identity))?,
            Kind::Pv => manager.add_pv_listener(logging_handler(identity))?,
            Kind::Pvc => manager.add_pvc_listener(logging_handler(identity))?,
            Kind::Namespace => manager.add_namespace_listener(logging_handler(identity))?,
            Kind::ConfigMap => manager
                .add_config_map_listener(&args.config_map_namespace, logging_handler(identity))?,
            Kind::Pod => manager.add_pod_listener(logging_handler(identity))?,
            Kind::VolumeAttachment => {
                manager.add_volume_attachment_listener(logging_handler(identity))?
            }
        };
    }
    Ok(())
}

async fn run(manager: &InformerManager<Client>, args: &Args) -> Result<()> {
    register(manager, args)?;
    manager.start().await?;
    info!(
        "[{}] caches ready: {} PVs, {} PVCs, {} pods, {} config maps",
        manager.identity(),
        manager.pv_lister().len(),
        manager.pvc_lister().len(),
        manager.pod_lister().len(),
        manager.config_map_lister().len()
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    let args = Args::parse();
    let user_agent = args.user_agent.as_deref().unwrap_or(USER_AGENT);
    let registry = InformerRegistry::new(signal_token());

    let in_cluster = client::new(Some(user_agent)).await?;
    let manager = registry.get_or_create(ClientIdentity::InCluster, in_cluster);
    run(&manager, &args).await?;

    if let Some(context) = &args.supervisor_context {
        let supervisor = client::new_for_context(context, Some(user_agent)).await?;
        let manager = registry.get_or_create(ClientIdentity::Supervisor, supervisor);
        run(&manager, &args).await?;
    }

    manager.shutdown_token().cancelled().await;
    registry.shutdown_all().await;
    Ok(())
}
