//
// Copyright (C) 2025 Pedro Henrique / phkaiser13
//
// File: src/bin/agent.rs
//
// Entry point for the downstream Fleet agent: watches `BundleDeployment`
// in its own cluster and runs the Desired-Set Planner, Helm Deployer, and
// Drift Monitor chain (`agent::runner::apply`) against each one, patching
// the computed status back. Same telemetry/metrics-server shape as
// `bin/controller.rs`.
//
// SPDX-License-Identifier: Apache-2.0
//

use fleet_core::agent::rate_limiter::ApplyRateLimiter;
use fleet_core::agent::runner::{self, RunnerContext};
use fleet_core::config::AgentConfig;
use fleet_core::content::{ContentStore, GzipContentStore};
use fleet_core::crds::bundle_deployment::BundleDeployment;
use fleet_core::errors::FleetError;
use fleet_core::metrics::{self, FLEET_AGENT_APPLY_TOTAL};
use futures::stream::StreamExt;
use kube::api::{Api, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::{Client, ResourceExt};
use kube_runtime::Controller;
use opentelemetry::global;
use prometheus::{Encoder, Registry, TextEncoder};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};
use warp::Filter;

const FIELD_MANAGER: &str = "fleet-agent";

struct Context {
    client: Client,
    runner: RunnerContext,
}

fn init_telemetry() -> Result<(), Box<dyn std::error::Error>> {
    let tracer = opentelemetry_jaeger::new_agent_pipeline()
        .with_service_name("fleet-agent")
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
    info!(port, "starting agent metrics server");
    warp::serve(route).run(([0, 0, 0, 0], port)).await;
}

async fn reconcile(bd: Arc<BundleDeployment>, ctx: Arc<Context>) -> Result<Action, FleetError> {
    if bd.spec.paused {
        return Ok(Action::requeue(Duration::from_secs(60)));
    }

    let result = runner::apply(&bd, &ctx.runner).await;
    let name = bd.name_any();
    let namespace = bd.namespace().unwrap_or_default();

    match result {
        Ok(status) => {
            FLEET_AGENT_APPLY_TOTAL.with_label_values(&[&name, "success"]).inc();
            let api: Api<BundleDeployment> = Api::namespaced(ctx.client.clone(), &namespace);
            let patch = Patch::Merge(serde_json::json!({ "status": status }));
            api.patch_status(&name, &PatchParams::apply(FIELD_MANAGER), &patch).await?;
            Ok(Action::requeue(Duration::from_secs(30)))
        }
        Err(e) => {
            FLEET_AGENT_APPLY_TOTAL.with_label_values(&[&name, "error"]).inc();
            Err(e)
        }
    }
}

fn on_error(bd: Arc<BundleDeployment>, error: &FleetError, _ctx: Arc<Context>) -> Action {
    tracing::error!(bundle_deployment = %bd.name_any(), "agent apply failed: {error}");
    if error.should_requeue() {
        Action::requeue(Duration::from_secs(15))
    } else {
        Action::await_change()
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_telemetry()?;
    info!("telemetry initialized");

    let config = AgentConfig::from_env();
    let client = Client::try_default().await?;
    let registry = Arc::new(metrics::create_and_register_metrics()?);

    let content_store: Arc<dyn ContentStore> = Arc::new(GzipContentStore::new());
    let rate_limiter = Arc::new(ApplyRateLimiter::new(config.apply_qps, config.apply_burst));
    let runner_ctx = RunnerContext { client: client.clone(), content_store, rate_limiter, agent_default_namespace: config.default_namespace.clone() };
    let ctx = Arc::new(Context { client: client.clone(), runner: runner_ctx });

    let bundle_deployments: Api<BundleDeployment> = Api::all(client.clone());

    info!("Fleet agent starting, default namespace {}", config.default_namespace);

    tokio::join!(
        run_metrics_server(registry, config.metrics_port),
        Controller::new(bundle_deployments, Default::default())
            .run(reconcile, on_error, ctx)
            .for_each(|res| async move {
                if let Err(e) = res {
                    tracing::error!("BundleDeployment apply error: {e}");
                }
            }),
    );

    info!("Fleet agent shutting down");
    global::shutdown_tracer_provider();
    Ok(())
}
