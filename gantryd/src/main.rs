//! Gantry Controller Daemon
//!
//! An autoscaling controller for ephemeral GitHub Actions runner
//! containers. It watches job demand on the GitHub side and container
//! health on the Docker side, and drives both toward the configured
//! equilibrium: enough online workers to absorb queued work, never below
//! the floor, never above the ceiling, with dead workers replaced and
//! orphan registrations reaped.
//!
//! Architecture:
//! - Configuration: `CONTROLLER_*` environment variables
//! - Adapters: GitHub registry client and Docker runtime client
//! - Controller: shared state plus six periodic reconciliation tasks
//! - API: status, metrics and manual scaling triggers on one HTTP port
//!
//! On SIGINT/SIGTERM the controller stops its tasks and exits without
//! tearing down workers; they survive the restart and are re-adopted.

mod api;
mod config;
mod controller;
mod policy;
mod state;

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use gantry_docker::DockerRuntime;
use gantry_github::GithubClient;

use crate::config::Config;
use crate::controller::{tasks, Controller};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env().context("invalid configuration")?;

    init_tracing(&config);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        scope = %config.scope,
        "starting gantry controller"
    );

    // Fail fast on bad credentials; a controller that cannot reach the
    // registry can only do harm
    let github = GithubClient::new(&config.token, config.scope.clone(), &config.runner_prefix)
        .context("failed to build GitHub client")?;
    github
        .validate()
        .await
        .context("GitHub token validation failed")?;
    info!("GitHub token validated");

    let docker = DockerRuntime::new(
        &config.docker_socket,
        &config.controller_id,
        &config.runner_name_prefix,
    )
    .context("failed to connect to Docker")?;
    docker
        .ensure_network(&config.runner_network)
        .await
        .context("failed to ensure runner network")?;

    let controller = Controller::new(config.clone(), Arc::new(github), Arc::new(docker));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handles = tasks::spawn_all(controller.clone(), shutdown_rx.clone());
    info!("periodic tasks started");

    tokio::spawn(async move {
        shutdown_signal().await;
        info!("shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    let app = api::create_router(controller.clone());
    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    info!("listening on {}", config.bind_addr);

    let mut server_shutdown = shutdown_rx;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = server_shutdown.changed().await;
        })
        .await
        .context("server error")?;

    controller.mark_stopped();
    for handle in handles {
        if let Err(e) = handle.await {
            error!(error = %e, "task did not stop cleanly");
        }
    }

    info!("controller stopped; workers stay up for re-adoption");
    Ok(())
}

fn init_tracing(config: &Config) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!(
            "gantryd={level},gantry_github={level},gantry_docker={level},tower_http=info",
            level = config.log_level
        )
        .into()
    });

    if config.structured_logging {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
