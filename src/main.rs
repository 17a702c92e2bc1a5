use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context as _;
use axum::{http::StatusCode, response::IntoResponse, routing::get, Router};
use clap::Parser;
use futures::future::join_all;
use kube::Client;
use rabbitmq_topology_operator::config::{Args, OperatorConfig};
use rabbitmq_topology_operator::controller::{
    self, ClientCache, ClusterResolver, Context, KubeStore, LeaderState,
    ManagementClientFactory, ReconcileSettings, SuperStreamContext,
};
use rabbitmq_topology_operator::crd::{
    Binding, Exchange, Federation, Permission, Policy, Queue, SchemaReplication, Shovel, User,
    Vhost,
};
use rabbitmq_topology_operator::telemetry;
use tokio::task::JoinHandle;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = OperatorConfig::try_from(Args::parse())?;

    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    if telemetry::init_telemetry(config.log_json)? {
        info!("OpenTelemetry tracing initialized");
    } else {
        info!("OpenTelemetry tracing disabled (OTEL_EXPORTER_OTLP_ENDPOINT not set)");
    }

    info!(
        "Starting RabbitMQ topology operator v{}",
        env!("CARGO_PKG_VERSION")
    );

    let client = Client::try_default()
        .await
        .context("failed to create Kubernetes client")?;
    info!("Connected to Kubernetes cluster");

    let result = run(client, config).await;
    telemetry::shutdown_telemetry();
    result
}

async fn run(client: Client, config: OperatorConfig) -> anyhow::Result<()> {
    let leader = if config.leader_election {
        let identity = std::env::var("HOSTNAME").unwrap_or_else(|_| {
            hostname::get()
                .ok()
                .and_then(|h| h.into_string().ok())
                .unwrap_or_else(|| "unknown-host".to_string())
        });
        info!("Leader election using holder ID: {}", identity);
        let state = LeaderState::default();
        tokio::spawn(controller::run_leader_election(
            client.clone(),
            config.namespace.clone(),
            identity,
            state.clone(),
        ));
        state
    } else {
        info!("Leader election disabled");
        LeaderState::always_leader()
    };

    let metrics_addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
    tokio::spawn(async move {
        if let Err(e) = serve_health(metrics_addr).await {
            error!("Metrics server error: {:?}", e);
        }
    });

    #[cfg(feature = "admission-webhook")]
    {
        use rabbitmq_topology_operator::webhook::{TlsConfig, WebhookServer};

        if config.enable_webhooks {
            let addr = SocketAddr::from(([0, 0, 0, 0], config.webhook_port));
            let server = WebhookServer::new()
                .with_tls(TlsConfig::from_cert_dir(&config.webhook_cert_dir));
            tokio::spawn(async move {
                if let Err(e) = server.start(addr).await {
                    error!("Webhook server error: {:?}", e);
                }
            });
        }
    }

    let store = Arc::new(KubeStore::new(client.clone()));
    let clients = Arc::new(ClientCache::new(Arc::new(ManagementClientFactory::default())));
    let resolver = ClusterResolver::new(config.cluster_domain.clone());
    let settings = ReconcileSettings {
        resync_period: config.sync_period,
        ..Default::default()
    };
    let workers = config.workers;

    macro_rules! spawn_controller {
        ($kind:ty) => {{
            let ctx = Arc::new(Context::<$kind>::new(
                store.clone(),
                store.clone(),
                resolver.clone(),
                clients.clone(),
                leader.clone(),
                settings.clone(),
            ));
            let client = client.clone();
            tokio::spawn(async move {
                controller::run_topology_controller(client, ctx, workers).await
            })
        }};
    }

    let mut handles: Vec<JoinHandle<()>> = vec![
        spawn_controller!(Queue),
        spawn_controller!(Exchange),
        spawn_controller!(Binding),
        spawn_controller!(Vhost),
        spawn_controller!(User),
        spawn_controller!(Permission),
        spawn_controller!(Policy),
        spawn_controller!(Shovel),
        spawn_controller!(Federation),
        spawn_controller!(SchemaReplication),
    ];

    let stream_ctx = Arc::new(SuperStreamContext {
        streams: store.clone(),
        exchanges: store.clone(),
        queues: store.clone(),
        bindings: store.clone(),
        leader,
        settings,
        failures: Default::default(),
    });
    handles.push(tokio::spawn(controller::run_super_stream_controller(
        client, stream_ctx, workers,
    )));

    for result in join_all(handles).await {
        if let Err(e) = result {
            error!("Controller task failed: {:?}", e);
        }
    }
    info!("All controllers stopped");
    Ok(())
}

async fn serve_health(addr: SocketAddr) -> anyhow::Result<()> {
    let app = Router::new()
        .route("/healthz", get(|| async { (StatusCode::OK, "ok") }))
        .route("/readyz", get(|| async { (StatusCode::OK, "ok") }))
        .route("/metrics", get(metrics_handler));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind metrics server to {addr}"))?;
    info!("Serving metrics and health checks on {}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(feature = "metrics")]
async fn metrics_handler() -> impl IntoResponse {
    match controller::metrics::render() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "application/openmetrics-text; version=1.0.0; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

#[cfg(not(feature = "metrics"))]
async fn metrics_handler() -> impl IntoResponse {
    StatusCode::NOT_FOUND
}
