//
// Copyright (C) 2025 Pedro Henrique / phkaiser13
//
// File: src/agent/runner.rs
//
// Agent Runner: the agent-side reconcile entry point, bound to a single
// downstream BundleDeployment and invoked per the host's own scheduling.
// Chains the Desired-Set Planner, Helm Deployer, and Drift Monitor; the
// only place in `agent::*` that touches `kube::Api`, the same split
// `rollout.rs`'s pure state machine draws against
// `controllers::bundle_controller`'s I/O.
//
// SPDX-License-Identifier: Apache-2.0
//

use crate::agent::desired_set::{self, Owner};
use crate::agent::drift_monitor::{self, UpdateStatusInput};
use crate::agent::helm_deployer::{self, DeployAction, ReleaseRecord, ReleaseStatus};
use crate::agent::rate_limiter::ApplyRateLimiter;
use crate::content::{ContentStore, ResourceKey};
use crate::crds::bundle_deployment::{BundleDeployment, BundleDeploymentStatus};
use crate::errors::{FleetError, FleetResult};
use k8s_openapi::api::core::v1::Secret;
use kube::api::{Api, DynamicObject, ListParams, Patch, PatchParams};
use kube::{discovery, Client, Resource, ResourceExt};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

const FIELD_MANAGER: &str = "fleet-agent";

pub struct RunnerContext {
    pub client: Client,
    pub content_store: Arc<dyn ContentStore>,
    pub rate_limiter: Arc<ApplyRateLimiter>,
    pub agent_default_namespace: String,
}

/// `apply(bd) -> Result<BundleDeploymentStatus>`.
pub async fn apply(bd: &BundleDeployment, ctx: &RunnerContext) -> FleetResult<BundleDeploymentStatus> {
    let namespace = bd.namespace().ok_or_else(|| FleetError::Validation("BundleDeployment missing namespace".to_string()))?;
    let options = bd.spec.staged_options.as_ref().unwrap_or(&bd.spec.options);
    let set_id = bd.name_any();
    let owner = Owner { gvk: "fleet.cattle.io/v1alpha1, Kind=BundleDeployment".to_string(), name: bd.name_any(), namespace: namespace.clone() };
    let status_before = bd.status.clone().unwrap_or_default();

    let manifest = ctx.content_store.read(&bd.spec.content_digest)?;
    let bundle_id = bd.spec.content_digest.clone();
    let chart = helm_deployer::synthesize_chart(&manifest, &bundle_id);
    let release_namespace = helm_deployer::resolve_namespace(options, &ctx.agent_default_namespace);
    let release_name = helm_deployer::resolve_release_name(options, &bundle_id);
    let annotations = helm_deployer::chart_annotations(&bundle_id, &release_namespace, options, None);

    let desired = helm_deployer::post_render(&chart, options, &set_id, &owner)?;
    let identity = helm_deployer::impersonated_identity(&annotations);
    tracing::debug!(bundle_deployment = %set_id, release = %release_name, identity = %identity, object_count = desired.len(), "applying bundle deployment");
    let apply_client = helm_deployer::impersonating_client(&identity, &release_namespace).await?;

    let history = fetch_release_history(&ctx.client, &release_namespace, &release_name).await?;
    let action = helm_deployer::decide_action(&history);

    let live = fetch_live_objects(&apply_client, &desired).await?;
    let predicted = dry_run_predict(&apply_client, &desired).await?;
    let prior_release_keys = prior_keys_from_status(&status_before);

    let compare_patches = &options.diff.compare_patches;
    let plan = desired_set::classify(desired.clone(), &live, &predicted, &prior_release_keys, compare_patches)?;

    let needs_deploy = options.force || matches!(action, DeployAction::Install | DeployAction::UninstallThenInstall) || !plan.create.is_empty() || !plan.update.is_empty() || !plan.delete.is_empty();

    if needs_deploy {
        execute_plan(&apply_client, &plan, &set_id, ctx.rate_limiter.as_ref()).await?;
        record_new_release(&ctx.client, &release_namespace, &release_name, &history, &manifest.digest, &chart.version, options.helm.max_history).await?;
    }

    if drift_monitor::should_skip_update(&bd.spec.deployment_id, &status_before) {
        return Ok(status_before);
    }

    let live_after = fetch_live_objects(&apply_client, &desired).await?;
    let all_live_keys: HashSet<ResourceKey> = live_after.keys().cloned().collect();
    let input = UpdateStatusInput {
        desired: &desired,
        plan: &plan,
        live_objects: &live_after,
        all_live_keys: &all_live_keys,
        ignore_conditions: &options.ignore_options.conditions,
        force_sync_generation: options.force_sync_generation,
    };
    Ok(drift_monitor::update_status(status_before, input))
}

fn prior_keys_from_status(status: &BundleDeploymentStatus) -> HashSet<ResourceKey> {
    status
        .resources
        .iter()
        .map(|r| ResourceKey { api_version: r.api_version.clone(), kind: r.kind.clone(), namespace: r.namespace.clone(), name: r.name.clone() })
        .collect()
}

async fn dynamic_api_for(client: &Client, obj: &Value) -> FleetResult<(Api<DynamicObject>, DynamicObject)> {
    let dyn_obj: DynamicObject = serde_json::from_value(obj.clone()).map_err(|e| FleetError::Validation(format!("not a valid Kubernetes object: {e}")))?;
    let gvk = dyn_obj.gvk().map_err(|_| FleetError::Validation("object missing apiVersion/kind".to_string()))?;
    let (resource, _caps) = discovery::pinned_kind(client, &gvk).await.map_err(|e| FleetError::External(format!("API discovery failed for {gvk}: {e}")))?;
    let api = match dyn_obj.namespace() {
        Some(ns) => Api::namespaced_with(client.clone(), &ns, &resource),
        None => Api::all_with(client.clone(), &resource),
    };
    Ok((api, dyn_obj))
}

/// A bare `{apiVersion, kind, metadata: {name, namespace}}` stand-in, enough
/// to resolve a `Api<DynamicObject>` for a key we only have by identity
/// (an Update or Delete entry from a `Plan`, with no full body alongside).
fn stub_for_key(key: &ResourceKey) -> Value {
    serde_json::json!({
        "apiVersion": key.api_version,
        "kind": key.kind,
        "metadata": { "name": key.name, "namespace": key.namespace },
    })
}

async fn fetch_live_objects(client: &Client, desired: &[Value]) -> FleetResult<HashMap<ResourceKey, Value>> {
    let mut live = HashMap::new();
    for obj in desired {
        let key = desired_set::object_identity(obj)?;
        let (api, dyn_obj) = dynamic_api_for(client, obj).await?;
        match api.get_opt(&dyn_obj.name_any()).await? {
            Some(found) => {
                let value = serde_json::to_value(&found).map_err(|e| FleetError::Internal(format!("failed to serialize live object: {e}")))?;
                live.insert(key, value);
            }
            None => {}
        }
    }
    Ok(live)
}

/// Server-side dry-run apply: what each desired object would look like once
/// admission webhooks and defaulters ran, without persisting anything.
async fn dry_run_predict(client: &Client, desired: &[Value]) -> FleetResult<HashMap<ResourceKey, Value>> {
    let mut predicted = HashMap::new();
    for obj in desired {
        let key = desired_set::object_identity(obj)?;
        let (api, dyn_obj) = dynamic_api_for(client, obj).await?;
        let params = PatchParams::apply(FIELD_MANAGER).dry_run();
        match api.patch(&dyn_obj.name_any(), &params, &Patch::Apply(obj)).await {
            Ok(result) => {
                let value = serde_json::to_value(&result).map_err(|e| FleetError::Internal(format!("failed to serialize dry-run result: {e}")))?;
                predicted.insert(key, value);
            }
            Err(_) => {
                // Dry-run against a kind the cluster rejects (e.g. immutable
                // field) falls back to the desired object itself; `classify`
                // already treats an absent predicted entry the same way.
            }
        }
    }
    Ok(predicted)
}

async fn execute_plan(client: &Client, plan: &desired_set::Plan, set_id: &str, rate_limiter: &ApplyRateLimiter) -> FleetResult<()> {
    let params = PatchParams::apply(FIELD_MANAGER).force();

    for obj in &plan.create {
        let key = desired_set::object_identity(obj)?;
        let gvk = format!("{}, Kind={}", key.api_version, key.kind);
        let hash = desired_set::label_hash(set_id, &gvk, &key.name, key.namespace.as_deref().unwrap_or_default());
        rate_limiter.acquire(&hash).await;
        let (api, dyn_obj) = dynamic_api_for(client, obj).await?;
        api.patch(&dyn_obj.name_any(), &params, &Patch::Apply(obj)).await?;
    }

    for update in &plan.update {
        let gvk = format!("{}, Kind={}", update.key.api_version, update.key.kind);
        let hash = desired_set::label_hash(set_id, &gvk, &update.key.name, update.key.namespace.as_deref().unwrap_or_default());
        rate_limiter.acquire(&hash).await;
        let (api, _) = dynamic_api_for(client, &stub_for_key(&update.key)).await?;
        api.patch(&update.key.name, &PatchParams::default(), &Patch::Merge(&update.merge_patch)).await?;
    }

    for key in &plan.delete {
        let (api, _) = dynamic_api_for(client, &stub_for_key(key)).await?;
        let _ = api.delete(&key.name, &Default::default()).await;
    }

    Ok(())
}

async fn fetch_release_history(client: &Client, namespace: &str, release_name: &str) -> FleetResult<Vec<ReleaseRecord>> {
    let api: Api<Secret> = Api::namespaced(client.clone(), namespace);
    let params = ListParams::default().labels(&format!("owner=helm,name={release_name}"));
    let list = api.list(&params).await?;
    let mut history = Vec::new();
    for secret in list.items {
        if let Some(bytes) = secret.data.as_ref().and_then(|d| d.get("release")) {
            if let Ok(record) = serde_json::from_slice::<ReleaseRecord>(&bytes.0) {
                history.push(record);
            }
        }
    }
    Ok(history)
}

async fn record_new_release(client: &Client, namespace: &str, release_name: &str, history: &[ReleaseRecord], content_digest: &str, chart_version: &str, options_max_history: i64) -> FleetResult<()> {
    let next_version = history.iter().map(|r| r.version).max().unwrap_or(0) + 1;
    let record = ReleaseRecord { name: release_name.to_string(), version: next_version, namespace: namespace.to_string(), status: ReleaseStatus::Deployed, content_digest: content_digest.to_string(), chart_version: chart_version.to_string() };

    let mut updated = history.to_vec();
    helm_deployer::record_release(&mut updated, record.clone(), helm_deployer::history_cap(options_max_history));

    let secret_name = helm_deployer::release_secret_name(release_name, next_version);
    let payload = serde_json::to_vec(&record).map_err(|e| FleetError::Internal(format!("failed to serialize release record: {e}")))?;

    let secret = Secret {
        metadata: kube::api::ObjectMeta {
            name: Some(secret_name.clone()),
            namespace: Some(namespace.to_string()),
            labels: Some([("owner".to_string(), "helm".to_string()), ("name".to_string(), release_name.to_string()), ("status".to_string(), "deployed".to_string())].into_iter().collect()),
            ..Default::default()
        },
        type_: Some("helm.sh/release.v1".to_string()),
        data: Some([("release".to_string(), k8s_openapi::ByteString(payload))].into_iter().collect()),
        ..Default::default()
    };

    let api: Api<Secret> = Api::namespaced(client.clone(), namespace);
    api.patch(&secret_name, &PatchParams::apply(FIELD_MANAGER), &Patch::Apply(&secret)).await?;

    let stale: Vec<&ReleaseRecord> = history.iter().filter(|r| !updated.iter().any(|u| u.version == r.version)).collect();
    for r in stale {
        let name = helm_deployer::release_secret_name(release_name, r.version);
        let _ = api.delete(&name, &Default::default()).await;
    }

    Ok(())
}
