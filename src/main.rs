use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser;
use kube::Client;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

mod api;
mod cache;
mod config;
mod consts;
mod crd;
mod dispatcher;
mod error;
mod model;
mod noise;
mod reconciler;
mod selector;
mod startup;

#[cfg(test)]
mod testutil;

use api::{ClusterApi, KubeClusterApi};
use cache::StateIndex;
use config::Config;
use reconciler::ReconcilerContext;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&config.log_filter).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Runtime discovery is automatic: `Client::try_default` tries the pod's
    // in-cluster service-account credentials first, falling back to the
    // ambient kubeconfig -- no flag needed.
    let client: Client = Client::try_default()
        .await
        .context("failed to build a Kubernetes client from in-cluster or kubeconfig credentials")?;

    let kube_api = Arc::new(KubeClusterApi::new(
        client,
        config.api_timeout(),
        config.managed_by.clone(),
    ));
    let api_trait: Arc<dyn ClusterApi> = kube_api.clone();
    let cache = Arc::new(StateIndex::new());

    startup::load_initial_state(api_trait.as_ref(), &cache)
        .await
        .context("failed to load existing ClusterSecrets at startup")?;
    info!(cached = cache.len(), "startup load complete");

    let ctx = Arc::new(ReconcilerContext::new(api_trait, cache));

    let shutdown = CancellationToken::new();
    let shutdown_signal = shutdown.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("shutdown signal received; draining reconcile queue");
        shutdown_signal.cancel();
    });

    dispatcher::run(ctx, kube_api, shutdown, config.resync_interval()).await;

    info!("clean shutdown");
    Ok(())
}
