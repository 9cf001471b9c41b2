//
// Copyright (C) 2025 Pedro Henrique / phkaiser13
//
// File: src/bin/controller.rs
//
// Entry point for the upstream Fleet controller: the Bundle-Target
// Matching & Deployment Planner, Rollout Controller, and HelmOp Reconciler
// with its Polling Scheduler. Telemetry init, one `Context` per reconciler,
// then every reconciler and the metrics server run concurrently under one
// `tokio::join!`.
//
// SPDX-License-Identifier: Apache-2.0
//

use fleet_core::config::FleetConfig;
use fleet_core::content::{ContentStore, GzipContentStore};
use fleet_core::controllers::{bundle_controller, bundle_deployment_controller, cluster_controller, helmop_controller};
use fleet_core::crds::bundle::Bundle;
use fleet_core::crds::bundle_deployment::BundleDeployment;
use fleet_core::crds::cluster::Cluster;
use fleet_core::crds::helmop::HelmOp;
use fleet_core::helmop::repo::HelmRepoClient;
use fleet_core::helmop::scheduler::PollingScheduler;
use fleet_core::metrics;
use futures::stream::StreamExt;
use kube::{Api, Client};
use kube_runtime::Controller;
use opentelemetry::global;
use prometheus::{Encoder, Registry, TextEncoder};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};
use warp::Filter;

/// Initializes the OpenTelemetry pipeline for Jaeger.
fn init_telemetry() -> Result<(), Box<dyn std::error::Error>> {
    let tracer = opentelemetry_jaeger::new_agent_pipeline()
        .with_service_name("fleet-controller")
        .install_batch(opentelemetry::runtime::Tokio)?;

    let telemetry = tracing_opentelemetry::layer().with_tracer(tracer);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let fmt_layer = tracing_subscriber::fmt::layer().json();

    tracing_subscriber::registry().with(filter).with(telemetry).with(fmt_layer).try_init()?;
    Ok(())
}

async fn metrics_handler(registry: Arc<Registry>) -> Result<impl warp::Reply, warp::Rejection> {
    let encoder = TextEncoder::new();
    let mut buffer = vec![];
    encoder.encode(&registry.gather(), &mut buffer).expect("failed to encode metrics");
    let response = String::from_utf8(buffer).expect("metrics buffer was not valid utf-8");
    Ok(warp::reply::with_header(response, "Content-Type", encoder.format_type()))
}

async fn run_metrics_server(registry: Arc<Registry>, port: u16) {
    let route = warp::path("metrics").and(warp::get()).and(warp::any().map(move || Arc::clone(&registry))).and_then(metrics_handler);
    info!(port, "starting metrics server");
    warp::serve(route).run(([0, 0, 0, 0], port)).await;
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_telemetry()?;
    info!("telemetry initialized");

    let config = FleetConfig::from_env();
    let client = Client::try_default().await?;
    let registry = Arc::new(metrics::create_and_register_metrics()?);

    let content_store: Arc<dyn ContentStore> = Arc::new(GzipContentStore::new());
    let bundle_ctx = Arc::new(bundle_controller::Context { client: client.clone(), content_store });
    let bundle_deployment_ctx = Arc::new(bundle_deployment_controller::Context { client: client.clone() });
    let cluster_ctx = Arc::new(cluster_controller::Context { client: client.clone() });
    let helmop_ctx = Arc::new(helmop_controller::Context {
        client: client.clone(),
        repo_client: Arc::new(HelmRepoClient::new()?),
        scheduler: Arc::new(PollingScheduler::new()),
    });

    let bundles: Api<Bundle> = Api::all(client.clone());
    let bundle_deployments: Api<BundleDeployment> = Api::all(client.clone());
    let clusters: Api<Cluster> = Api::all(client.clone());
    let helmops: Api<HelmOp> = Api::all(client.clone());

    info!("Fleet controller starting, shard {:?}", config.shard_id);

    tokio::join!(
        run_metrics_server(registry, config.metrics_port),
        Controller::new(bundles, Default::default())
            .run(bundle_controller::reconcile, bundle_controller::on_error, bundle_ctx)
            .for_each(|res| async move {
                if let Err(e) = res {
                    tracing::error!("Bundle reconcile error: {e}");
                }
            }),
        Controller::new(bundle_deployments, Default::default())
            .run(bundle_deployment_controller::reconcile, bundle_deployment_controller::on_error, bundle_deployment_ctx)
            .for_each(|res| async move {
                if let Err(e) = res {
                    tracing::error!("BundleDeployment status rollup error: {e}");
                }
            }),
        Controller::new(clusters, Default::default())
            .run(cluster_controller::reconcile, cluster_controller::on_error, cluster_ctx)
            .for_each(|res| async move {
                if let Err(e) = res {
                    tracing::error!("Cluster reconcile error: {e}");
                }
            }),
        Controller::new(helmops, Default::default())
            .run(helmop_controller::reconcile, helmop_controller::on_error, helmop_ctx)
            .for_each(|res| async move {
                if let Err(e) = res {
                    tracing::error!("HelmOp reconcile error: {e}");
                }
            }),
    );

    info!("Fleet controller shutting down");
    global::shutdown_tracer_provider();
    Ok(())
}
