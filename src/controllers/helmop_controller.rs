//
// Copyright (C) 2025 Pedro Henrique / phkaiser13
//
// File: src/controllers/helmop_controller.rs
//
// Watches `HelmOp`, drives the reconciler through to a persisted desired
// `Bundle`, and owns the polling scheduler's job table. The decisions
// themselves live in `helmop::reconciler`/`helmop::scheduler` so this file
// stays a thin shell around `kube::Api` calls.
//
// SPDX-License-Identifier: Apache-2.0
//

use crate::crds::bundle::Bundle;
use crate::crds::helmop::{HelmOp, HelmOpStatus, CONDITION_ACCEPTED, CONDITION_POLLED};
use crate::crds::common::{merge_conditions, Condition};
use crate::errors::{FleetError, FleetResult};
use crate::helmop::reconciler::{build_desired_bundle, check_collision, handle_version, resolve_version, VersionDecision};
use crate::helmop::repo::{HelmRepoClient, RepoAuth};
use crate::helmop::scheduler::{job_description, parse_duration, uses_polling, PollingScheduler};
use crate::metrics::{FLEET_HELMOP_POLL_DURATION_SECONDS, FLEET_HELMOP_POLL_TOTAL};
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::{Client, ResourceExt};
use std::sync::Arc;
use std::time::Duration;

const FIELD_MANAGER: &str = "fleet-helmop-controller";

pub struct Context {
    pub client: Client,
    pub repo_client: Arc<HelmRepoClient>,
    pub scheduler: Arc<PollingScheduler>,
}

async fn fetch_repo_auth(client: &Client, namespace: &str, secret_name: &str, insecure: bool) -> FleetResult<RepoAuth> {
    let api: Api<Secret> = Api::namespaced(client.clone(), namespace);
    let Some(secret) = api.get_opt(secret_name).await? else {
        return Ok(RepoAuth { insecure_skip_tls_verify: insecure, ..Default::default() });
    };
    let data = secret.data.unwrap_or_default();
    let as_string = |key: &str| data.get(key).map(|b| String::from_utf8_lossy(&b.0).into_owned());
    Ok(RepoAuth {
        username: as_string("username"),
        password: as_string("password"),
        ca_bundle: data.get("cacerts").map(|b| b.0.clone()),
        insecure_skip_tls_verify: insecure,
    })
}

async fn apply_desired_bundle(client: &Client, helmop: &HelmOp, bundle: Bundle) -> FleetResult<()> {
    let namespace = helmop.namespace().unwrap_or_default();
    let api: Api<Bundle> = Api::namespaced(client.clone(), &namespace);
    api.patch(&helmop.name_any(), &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Apply(&bundle)).await?;
    Ok(())
}

async fn existing_bundle(client: &Client, helmop: &HelmOp) -> FleetResult<Option<Bundle>> {
    let namespace = helmop.namespace().unwrap_or_default();
    let api: Api<Bundle> = Api::namespaced(client.clone(), &namespace);
    Ok(api.get_opt(&helmop.name_any()).await?)
}

async fn patch_status(client: &Client, helmop: &HelmOp, status: HelmOpStatus) -> FleetResult<()> {
    let namespace = helmop.namespace().unwrap_or_default();
    let api: Api<HelmOp> = Api::namespaced(client.clone(), &namespace);
    let patch = Patch::Merge(serde_json::json!({ "status": status }));
    api.patch_status(&helmop.name_any(), &PatchParams::apply(FIELD_MANAGER), &patch).await?;
    Ok(())
}

/// Spawn (or replace) this HelmOp's polling job: a loop that re-resolves
/// the chart version against the repo index every `pollingInterval`,
/// single-flight-guarded against overlapping fires.
fn spawn_polling_job(ctx: &Context, helmop: &HelmOp, interval: Duration) {
    let namespace = helmop.namespace().unwrap_or_default();
    let name = helmop.name_any();
    let trigger_description = format!("{}s", interval.as_secs());

    if ctx.scheduler.matches(&namespace, &name, &trigger_description) {
        return;
    }

    let client = ctx.client.clone();
    let repo_client = ctx.repo_client.clone();
    let scheduler = ctx.scheduler.clone();
    let ns = namespace.clone();
    let n = name.clone();

    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let Some(guard) = scheduler.single_flight_guard(&ns, &n) else { return };
            let Ok(_permit) = guard.try_lock() else { continue };

            let api: Api<HelmOp> = Api::namespaced(client.clone(), &ns);
            let Ok(Some(current)) = api.get_opt(&n).await else { continue };

            let timer = FLEET_HELMOP_POLL_DURATION_SECONDS.start_timer();
            let auth = match current.spec.helm_secret_name.as_deref() {
                Some(secret_name) => fetch_repo_auth(&client, &ns, secret_name, current.spec.insecure_skip_tls_verify).await.ok(),
                None => None,
            };
            let resolved = resolve_version(&repo_client, &current, auth.as_ref()).await;
            timer.observe_duration();

            match resolved {
                Ok(version) => {
                    FLEET_HELMOP_POLL_TOTAL.with_label_values(&[&n, "success"]).inc();
                    let mut status = current.status.clone().unwrap_or_default();
                    status.version = Some(version);
                    status.observed_source = Some((
                        current.spec.helm.repo.clone().unwrap_or_default(),
                        current.spec.helm.chart.clone().unwrap_or_default(),
                        current.spec.helm.version.clone().unwrap_or_default(),
                    ));
                    merge_conditions(&mut status.conditions, vec![Condition::ready(true, "resolved chart version from repo index")]);
                    let _ = patch_status(&client, &current, status).await;
                }
                Err(e) => {
                    FLEET_HELMOP_POLL_TOTAL.with_label_values(&[&n, "error"]).inc();
                    tracing::warn!(helmop = %n, namespace = %ns, error = %e, "helmop polling resolve failed");
                    let mut status = current.status.clone().unwrap_or_default();
                    merge_conditions(&mut status.conditions, vec![Condition::new(CONDITION_POLLED, false, "ResolveFailed", e.to_string())]);
                    let _ = patch_status(&client, &current, status).await;
                }
            }
        }
    });

    ctx.scheduler.schedule(&namespace, &name, trigger_description, handle);
}

pub async fn reconcile(helmop: Arc<HelmOp>, ctx: Arc<Context>) -> Result<Action, FleetError> {
    let existing = existing_bundle(&ctx.client, &helmop).await?;
    let mut status = helmop.status.clone().unwrap_or_default();
    if let Err(e) = check_collision(existing.as_ref()) {
        let message = match &e {
            FleetError::Collision(msg) => msg.clone(),
            other => other.to_string(),
        };
        merge_conditions(&mut status.conditions, vec![Condition::new(CONDITION_ACCEPTED, false, "Collision", message)]);
        patch_status(&ctx.client, &helmop, status).await?;
        return Err(e);
    }

    let decision = handle_version(&helmop);
    match decision {
        VersionDecision::Literal(v) | VersionDecision::Cached(v) => {
            status.version = Some(v);
            status.observed_source = Some((
                helmop.spec.helm.repo.clone().unwrap_or_default(),
                helmop.spec.helm.chart.clone().unwrap_or_default(),
                helmop.spec.helm.version.clone().unwrap_or_default(),
            ));
        }
        VersionDecision::DeferToPolling => {
            // polling job (below) owns status.version; nothing to do here
        }
        VersionDecision::NeedsResolve => {
            let auth = match helmop.spec.helm_secret_name.as_deref() {
                Some(secret_name) => Some(fetch_repo_auth(&ctx.client, &helmop.namespace().unwrap_or_default(), secret_name, helmop.spec.insecure_skip_tls_verify).await?),
                None => None,
            };
            match resolve_version(&ctx.repo_client, &helmop, auth.as_ref()).await {
                Ok(v) => {
                    status.version = Some(v);
                    status.observed_source = Some((
                        helmop.spec.helm.repo.clone().unwrap_or_default(),
                        helmop.spec.helm.chart.clone().unwrap_or_default(),
                        helmop.spec.helm.version.clone().unwrap_or_default(),
                    ));
                }
                Err(e) => {
                    merge_conditions(&mut status.conditions, vec![Condition::new(CONDITION_ACCEPTED, false, "ResolveFailed", e.to_string())]);
                    patch_status(&ctx.client, &helmop, status).await?;
                    return Ok(Action::requeue(Duration::from_secs(30)));
                }
            }
        }
    }

    if helmop.spec.helm.version.as_deref().map(|v| status.version.as_deref() != Some(v)).unwrap_or(false) || status.version.is_some() {
        let mut resolved_op = (*helmop).clone();
        resolved_op.spec.helm.version = status.version.clone().or(resolved_op.spec.helm.version);
        let bundle = build_desired_bundle(&resolved_op)?;
        apply_desired_bundle(&ctx.client, &helmop, bundle).await?;
    }

    merge_conditions(&mut status.conditions, vec![Condition::ready(true, "HelmOp accepted")]);
    patch_status(&ctx.client, &helmop, status).await?;

    if uses_polling(&helmop.spec) {
        if let Some(interval) = helmop.spec.polling_interval.as_deref().and_then(parse_duration) {
            spawn_polling_job(&ctx, &helmop, interval);
        }
    } else {
        ctx.scheduler.delete(&helmop.namespace().unwrap_or_default(), &helmop.name_any());
    }

    Ok(Action::requeue(Duration::from_secs(60)))
}

pub fn on_error(helmop: Arc<HelmOp>, error: &FleetError, _ctx: Arc<Context>) -> Action {
    tracing::error!(helmop = %helmop.name_any(), job = %job_description(&helmop.namespace().unwrap_or_default(), &helmop.name_any()), "HelmOp reconcile failed: {error}");
    if error.should_requeue() {
        Action::requeue(Duration::from_secs(15))
    } else {
        Action::await_change()
    }
}
