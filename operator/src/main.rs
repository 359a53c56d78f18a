use std::sync::Arc;

use foo_operator::{
    cache::{Store, run_watcher},
    client::{KubeDeploymentClient, KubeFooClient},
    config::{ControllerArgs, ControllerConfig},
    controller::Controller,
    crd::Foo,
    event::{EventPublisher, KubeEventPublisher, NoopEventPublisher, make_reporter},
    metrics::Metrics,
    reconcile::Reconciler,
};
use clap::Parser;
use kube::{Api, Client};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = ControllerConfig::try_from(ControllerArgs::parse())?;
    info!(?config, "loaded configuration");

    let client = Client::try_default().await?;
    let metrics = Arc::new(Metrics::new()?);
    let store = Arc::new(Store::new());

    let events: Arc<dyn EventPublisher> = if config.record_events {
        Arc::new(KubeEventPublisher::new(client.clone(), make_reporter()))
    } else {
        Arc::new(NoopEventPublisher)
    };
    let reconciler = Reconciler::new(
        store.clone(),
        Arc::new(KubeFooClient::new(client.clone())),
        Arc::new(KubeDeploymentClient::new(client.clone())),
        events,
    );
    let controller = Arc::new(Controller::new(
        config.clone(),
        store.clone(),
        reconciler,
        metrics.clone(),
    ));

    let foos: Api<Foo> = match &config.namespace {
        Some(ns) => Api::namespaced(client.clone(), ns),
        None => Api::all(client.clone()),
    };
    let watcher = tokio::spawn(run_watcher(
        foos,
        store,
        controller.translator(),
        metrics.clone(),
        config.resync_period,
    ));

    let result = controller.run(shutdown_signal()).await;
    watcher.abort();

    match metrics.encode() {
        Ok(text) => info!(metrics = %text, "final metrics"),
        Err(err) => error!(error = %err, "failed to encode metrics"),
    }
    result?;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => {
                error!(error = %err, "failed to listen for SIGTERM");
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
