//! Standalone mode — the controller and a fleet of simulated invokers in
//! one process, talking over the in-memory bus.
//!
//! In this mode, the daemon:
//! 1. Opens the action store and seeds the demo actions
//! 2. Builds the dispatch gateway on top of the in-memory bus
//! 3. Runs the health sweep and the completion/heartbeat consumers
//! 4. Starts the simulated invokers
//! 5. Serves the REST API until Ctrl-C, then drains background tasks

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info};

use whisk_balancer::{DispatchGateway, InMemoryBus};
use whisk_core::{
    ActionExec, ActionLimits, ActionMetadata, COMPLETION_TOPIC, ControllerConfig, HEALTH_TOPIC,
    InvokerCapacity, InvokerId,
};
use whisk_entity::EntityStore;
use whisk_metrics::DispatchMetrics;

use crate::invoker_sim::SimulatedInvoker;

pub struct StandaloneOptions {
    pub port: u16,
    pub data_dir: PathBuf,
    pub config: Option<PathBuf>,
    pub invokers: usize,
    pub invoker_memory_mb: u64,
    pub invoker_slots: u32,
}

/// Run the controller in standalone mode.
pub async fn run_standalone(opts: StandaloneOptions) -> anyhow::Result<()> {
    info!("Whisk daemon starting in standalone mode");

    let config = match &opts.config {
        Some(path) => {
            let config = ControllerConfig::from_file(path)?;
            info!(path = ?path, "configuration loaded");
            config
        }
        None => ControllerConfig::default(),
    };

    // Ensure data directory exists.
    std::fs::create_dir_all(&opts.data_dir)?;
    let db_path = opts.data_dir.join("whisk.redb");

    // ── Initialize subsystems ──────────────────────────────────

    let store = EntityStore::open(&db_path, config.limits.clone())?;
    info!(path = ?db_path, "action store opened");
    seed_demo_actions(&store)?;

    let bus = Arc::new(InMemoryBus::new());
    let completions = bus.subscribe(COMPLETION_TOPIC)?;
    let heartbeats = bus.subscribe(HEALTH_TOPIC)?;

    let metrics = Arc::new(DispatchMetrics::new());
    let gateway = Arc::new(DispatchGateway::new(
        &config,
        Arc::new(store),
        bus.clone(),
        metrics,
    ));
    info!(
        blackbox_fraction = config.balancer.blackbox_fraction,
        over_provision_factor = config.balancer.over_provision_factor,
        "dispatch gateway initialized"
    );

    // ── Shutdown signal ────────────────────────────────────────

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut handles = Vec::new();

    // ── Start background tasks ─────────────────────────────────

    let health = Arc::clone(gateway.health());
    let health_shutdown = shutdown_rx.clone();
    handles.push(tokio::spawn(async move {
        health.run(health_shutdown).await;
    }));

    let completion_gateway = Arc::clone(&gateway);
    let completion_shutdown = shutdown_rx.clone();
    handles.push(tokio::spawn(async move {
        completion_gateway
            .run_completion_consumer(completions, completion_shutdown)
            .await;
    }));

    let heartbeat_gateway = Arc::clone(&gateway);
    let heartbeat_shutdown = shutdown_rx.clone();
    handles.push(tokio::spawn(async move {
        heartbeat_gateway
            .run_heartbeat_consumer(heartbeats, heartbeat_shutdown)
            .await;
    }));

    for ordinal in 0..opts.invokers {
        let invoker = SimulatedInvoker::new(
            InvokerId::new(ordinal),
            InvokerCapacity::new(opts.invoker_memory_mb, opts.invoker_slots),
            Arc::clone(&bus),
            config.health.heartbeat_interval,
        );
        let invoker_shutdown = shutdown_rx.clone();
        handles.push(tokio::spawn(async move {
            if let Err(e) = invoker.run(invoker_shutdown).await {
                error!(invoker = ordinal, error = %e, "simulated invoker failed");
            }
        }));
    }
    info!(count = opts.invokers, "simulated invokers started");

    // ── Start API server ───────────────────────────────────────

    let router = whisk_api::build_router(Arc::clone(&gateway));
    let addr = SocketAddr::from(([0, 0, 0, 0], opts.port));

    info!(%addr, "API server starting");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    // Graceful shutdown on Ctrl-C.
    let server = axum::serve(listener, router).with_graceful_shutdown(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl-C");
        }
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    server.await?;

    // Wait for background tasks.
    for handle in handles {
        let _ = handle.await;
    }

    info!(
        in_flight = gateway.tracker().in_flight(),
        "Whisk daemon stopped"
    );
    Ok(())
}

/// Actions available out of the box: a managed and a blackbox sleeper.
fn seed_demo_actions(store: &EntityStore) -> anyhow::Result<()> {
    let demos = [
        ActionMetadata {
            namespace: "guest".to_string(),
            name: "sleep".to_string(),
            exec: ActionExec::Managed {
                kind: "nodejs:20".to_string(),
            },
            limits: ActionLimits::default(),
            updated_at: 0,
        },
        ActionMetadata {
            namespace: "guest".to_string(),
            name: "sleep-image".to_string(),
            exec: ActionExec::Blackbox {
                image: "whisk/sleep:latest".to_string(),
            },
            limits: ActionLimits::default(),
            updated_at: 0,
        },
    ];

    for action in demos {
        if store.find_action(&action.table_key())?.is_none() {
            store.put_action(&action)?;
            info!(action = %action.fqn(), pool = %action.pool(), "demo action seeded");
        }
    }
    Ok(())
}
