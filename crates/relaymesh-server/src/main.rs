//! Relaymesh Server - Clustered WebSocket Relay

use clap::{Parser, ValueEnum};
use relaymesh_server::{
    api,
    hub::{HubConfig, HubRuntime},
    network::{
        discovery::{
            resolve_seeds, spawn_rejoin_loop, EtcdRegistry, HeadlessDns, KubernetesEndpoints,
            SeedPolicy, SeedSource, StaticSeeds,
        },
        ClusterMembership, Libp2pCluster, MemoryNetwork, NetworkConfig, PeerInbox,
    },
    observability::{events, init_metrics, init_tracing, shutdown_tracing, TracingConfig},
    version,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "relaymesh-server")]
#[command(about = "Clustered WebSocket relay hub", version)]
struct Cli {
    /// HTTP listen address (WebSocket, health, metrics)
    #[arg(long, env = "BIND_ADDR", default_value = "0.0.0.0:8080")]
    bind_addr: String,

    /// Port for peer traffic
    #[arg(long, env = "P2P_PORT", default_value_t = 8081)]
    p2p_port: u16,

    /// Where to find seed peers
    #[arg(long, env = "SEED_MODE", value_enum, default_value_t = SeedMode::Static)]
    seed_mode: SeedMode,

    /// Comma-separated seeds for static mode. Empty bootstraps a new cluster.
    #[arg(long, env = "SEEDS", default_value = "")]
    seeds: String,

    #[arg(long, env = "POD_NAMESPACE", default_value = "default")]
    namespace: String,

    /// Service whose endpoints or DNS records list the peers
    #[arg(long, env = "SERVICE_NAME", default_value = "relaymesh")]
    service: String,

    /// Fully qualified headless service name, overrides `service`.`namespace`
    #[arg(long, env = "HEADLESS_SERVICE")]
    headless_service: Option<String>,

    /// Run a single node without peer networking
    #[arg(long, env = "STANDALONE")]
    standalone: bool,

    /// Print build metadata and exit
    #[arg(long)]
    build_info: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum SeedMode {
    Static,
    Kubernetes,
    Dns,
    Etcd,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    if cli.build_info {
        println!("{}", version::build_info());
        return Ok(());
    }

    // kube and etcd clients share the process-wide rustls provider
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        warn!("rustls crypto provider already installed");
    }

    init_tracing(TracingConfig::from_env()).map_err(anyhow::Error::from_boxed)?;
    info!(version = %version::full_version(), "Starting relaymesh-server");

    let metrics_state = match init_metrics() {
        Ok(state) => Some(state),
        Err(e) => {
            warn!(error = %e, "Metrics disabled");
            None
        }
    };

    let mut hub_config = HubConfig::from_env();
    let mut net_config = NetworkConfig::from_env();
    net_config.p2p_port = cli.p2p_port;
    hub_config.max_peer_frame_bytes = net_config.max_frame_bytes;
    let advertised = format!("{}:{}", net_config.advertise_ip, net_config.p2p_port);

    let (inbox, inbound) = PeerInbox::channel(hub_config.inbound_peer_capacity);
    let mut registry = None;
    let (cluster, source): (Arc<dyn ClusterMembership>, Arc<dyn SeedSource>) = if cli.standalone {
        let name = format!("standalone-{}", uuid::Uuid::new_v4());
        let cluster = MemoryNetwork::new().node(name, advertised.clone(), Arc::new(inbox));
        info!("Running standalone, peer networking disabled");
        (
            Arc::new(cluster),
            Arc::new(StaticSeeds::new(vec![advertised.clone()])),
        )
    } else {
        let cluster = Libp2pCluster::start(net_config.clone(), Arc::new(inbox))?;
        let node_name = cluster.local_name().to_string();
        let source: Arc<dyn SeedSource> = match cli.seed_mode {
            SeedMode::Static => {
                let seeds = StaticSeeds::parse(&cli.seeds);
                if seeds.is_empty() {
                    Arc::new(StaticSeeds::new(vec![advertised.clone()]))
                } else {
                    Arc::new(seeds)
                }
            }
            SeedMode::Kubernetes => Arc::new(
                KubernetesEndpoints::connect(&cli.namespace, &cli.service, net_config.p2p_port)
                    .await?,
            ),
            SeedMode::Dns => Arc::new(match &cli.headless_service {
                Some(host) => HeadlessDns::new(host.clone(), net_config.p2p_port),
                None => HeadlessDns::for_service(&cli.service, &cli.namespace, net_config.p2p_port),
            }),
            SeedMode::Etcd => {
                let etcd =
                    Arc::new(EtcdRegistry::connect(&net_config, node_name, advertised.clone()).await?);
                registry = Some(etcd.clone());
                etcd
            }
        };
        (Arc::new(cluster), source)
    };

    let runtime = HubRuntime::start(cluster.clone(), inbound, hub_config.clone());

    let seeds = resolve_seeds(source.as_ref(), &SeedPolicy::from(&net_config)).await?;
    let responded = cluster.join(&seeds).await?;
    events::cluster_joined(cluster.local_name(), seeds.len(), responded);

    let cancel = CancellationToken::new();
    let rejoin = spawn_rejoin_loop(
        cluster.clone(),
        source,
        net_config.rejoin_interval,
        cancel.clone(),
    );

    let readiness = Arc::new(AtomicBool::new(false));
    let state = api::AppState {
        hub: runtime.hub().clone(),
        cluster: cluster.clone(),
        hub_config,
        metrics_state,
        readiness: readiness.clone(),
    };
    let app = api::create_router(state);

    info!(bind_addr = %cli.bind_addr, "Starting API server");
    let listener = tokio::net::TcpListener::bind(&cli.bind_addr).await?;
    readiness.store(true, Ordering::Release);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down");
    readiness.store(false, Ordering::Release);
    cancel.cancel();
    let _ = rejoin.await;
    if let Some(registry) = registry {
        if let Err(e) = registry.deregister().await {
            warn!(error = %e, "Failed to deregister from etcd");
        }
    }
    if let Err(e) = cluster.leave().await {
        warn!(error = %e, "Failed to leave cluster cleanly");
    }
    runtime.shutdown().await;
    shutdown_tracing();

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
