//! Process bootstrap: configuration, observability, bindings, shutdown.

use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use prometheus::Registry;
use tokio::sync::broadcast;
use tracing::{error, info};

use mig_core::config::normalize_addr;
use mig_core::metrics::Metrics;
use mig_core::{Config, Service, ServiceOptions};
use migd::grpc;
use migd::http::{self, AppState};
use migd::nats::NatsBinding;

/// Model Interface Gateway daemon.
///
/// All configuration comes from `MIGD_*` environment variables; the flags
/// here only override the most common ones for local runs.
#[derive(Parser, Debug)]
#[command(author, version, about = "Model Interface Gateway daemon", long_about = None)]
struct Cli {
    /// HTTP listen address (overrides MIGD_ADDR)
    #[arg(long)]
    addr: Option<String>,

    /// gRPC listen address (overrides MIGD_GRPC_ADDR)
    #[arg(long)]
    grpc_addr: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .json()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let mut cfg = match Config::from_env() {
        Ok(cfg) => cfg,
        Err(err) => {
            error!(%err, "invalid config");
            return Err(err.into());
        }
    };
    if let Some(addr) = cli.addr {
        cfg.addr = normalize_addr(&addr);
    }
    if let Some(grpc_addr) = cli.grpc_addr {
        cfg.grpc_addr = normalize_addr(&grpc_addr);
    }

    let svc = Service::with_options(ServiceOptions {
        nats_url: cfg.nats_url.clone(),
        audit_log_path: cfg.audit_log_path.clone(),
    })
    .await
    .map_err(|err| {
        error!(%err, "failed to initialize service");
        err
    })?;

    let (metrics, registry) = if cfg.enable_metrics {
        let registry = Registry::new();
        let metrics = Metrics::new(&registry)?;
        svc.set_metrics(metrics.clone());
        (Some(metrics), Some(registry))
    } else {
        (None, None)
    };

    let state = Arc::new(AppState {
        svc: svc.clone(),
        auth: cfg.auth.clone(),
        metrics,
        registry,
    });
    let app = http::router(state);

    info!(
        addr = %cfg.addr,
        grpc = %display_or_none(&cfg.grpc_addr),
        auth = ?cfg.auth.mode,
        metrics = cfg.enable_metrics,
        nats = %display_or_none(&cfg.nats_url),
        audit_log = %display_or_none(&cfg.audit_log_path),
        "migd listening"
    );

    // Shutdown fan-out: SIGINT/SIGTERM stop every binding, then the core
    // resources are closed.
    let (shutdown_tx, _) = broadcast::channel::<()>(1);
    spawn_signal_handlers(shutdown_tx.clone());

    let mut nats_binding = None;
    if !cfg.nats_url.is_empty() && cfg.enable_nats_binding {
        nats_binding = Some(NatsBinding::start(svc.clone()).await.map_err(|err| {
            error!(%err, "failed to start NATS binding");
            err
        })?);
        info!(url = %cfg.nats_url, "migd NATS request/reply binding enabled");
    }

    let mut grpc_task = None;
    if !cfg.grpc_addr.is_empty() {
        let addr: SocketAddr = cfg.grpc_addr.parse().map_err(|err| {
            error!(%err, addr = %cfg.grpc_addr, "invalid gRPC listen address");
            err
        })?;
        let svc = svc.clone();
        let auth = cfg.auth.clone();
        let mut shutdown_rx = shutdown_tx.subscribe();
        grpc_task = Some(tokio::spawn(async move {
            if let Err(err) = grpc::serve(addr, svc, auth, async move {
                let _ = shutdown_rx.recv().await;
            })
            .await
            {
                error!(%err, "gRPC server error");
            }
        }));
    }

    let listener = tokio::net::TcpListener::bind(&cfg.addr).await?;
    let mut shutdown_rx = shutdown_tx.subscribe();
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        let _ = shutdown_rx.recv().await;
    })
    .await?;

    // Staged teardown: bindings first, then the core's owned resources.
    if let Some(mut binding) = nats_binding {
        binding.close();
    }
    if let Some(task) = grpc_task {
        let _ = task.await;
    }
    svc.close();
    info!("migd stopped");
    Ok(())
}

fn spawn_signal_handlers(shutdown_tx: broadcast::Sender<()>) {
    let sigint_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received SIGINT, shutting down");
            let _ = sigint_tx.send(());
        }
    });

    #[cfg(unix)]
    tokio::spawn(async move {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
                info!("received SIGTERM, shutting down");
                let _ = shutdown_tx.send(());
            }
            Err(err) => error!(%err, "failed to listen for SIGTERM"),
        }
    });
}

fn display_or_none(value: &str) -> &str {
    if value.is_empty() {
        "<none>"
    } else {
        value
    }
}
