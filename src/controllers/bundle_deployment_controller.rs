//
// Copyright (C) 2025 Pedro Henrique / phkaiser13
//
// File: src/controllers/bundle_deployment_controller.rs
//
// Status-rollup watcher: reacts to `BundleDeployment` status changes and
// refreshes the owning `Bundle`'s summary immediately, instead of waiting
// for that Bundle's own 30-second requeue in `bundle_controller`. A small,
// single-purpose controller kept separate from the primary reconcilers.
//
// SPDX-License-Identifier: Apache-2.0
//

use crate::crds::bundle::{Bundle, BundleStatus, BundleSummary};
use crate::crds::bundle_deployment::{owning_bundle, BundleDeployment, BundleDeploymentStatus, LABEL_BUNDLE_NAME, LABEL_BUNDLE_NAMESPACE};
use crate::crds::common::{merge_conditions, Condition};
use crate::errors::FleetError;
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::{Client, ResourceExt};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const FIELD_MANAGER: &str = "fleet-bundle-deployment-controller";

pub struct Context {
    pub client: Client,
}

/// Recompute a `BundleSummary` purely from the already-reported status of
/// every sibling `BundleDeployment`, without revisiting rollout decisions
/// (that remains `rollout::reconcile`'s job).
fn summarize_from_statuses(statuses: &[BundleDeploymentStatus]) -> BundleSummary {
    let mut summary = BundleSummary { desired_ready: statuses.len(), ..Default::default() };
    for status in statuses {
        if status.ready {
            summary.ready += 1;
        } else if status.applied_deployment_id.is_none() {
            summary.pending += 1;
        } else {
            summary.wait_applied += 1;
        }
        if !status.non_modified {
            summary.modified += 1;
        }
        if status.resource_counts.not_ready > 0 {
            summary.err_applied += 1;
        }
    }
    summary
}

pub async fn reconcile(bd: Arc<BundleDeployment>, ctx: Arc<Context>) -> Result<Action, FleetError> {
    let labels = bd.metadata.labels.clone().unwrap_or_default();
    let Some(owner) = owning_bundle(&labels) else {
        return Ok(Action::await_change());
    };
    let bundle_namespace = owner.namespace.unwrap_or_default();
    let bundle_name = owner.name;

    let bundles: Api<Bundle> = Api::namespaced(ctx.client.clone(), &bundle_namespace);
    let Some(bundle) = bundles.get_opt(&bundle_name).await? else {
        return Ok(Action::await_change());
    };

    let siblings: Api<BundleDeployment> = Api::all(ctx.client.clone());
    let selector = format!("{LABEL_BUNDLE_NAME}={bundle_name},{LABEL_BUNDLE_NAMESPACE}={bundle_namespace}");
    let statuses: Vec<BundleDeploymentStatus> = siblings
        .list(&ListParams::default().labels(&selector))
        .await?
        .items
        .into_iter()
        .filter_map(|d| d.status)
        .collect();

    let summary = summarize_from_statuses(&statuses);
    let ready = summary.ready == summary.desired_ready;

    let mut conditions = bundle.status.as_ref().map(|s| s.conditions.clone()).unwrap_or_default();
    merge_conditions(&mut conditions, vec![Condition::ready(ready, format!("{}/{} targets ready", summary.ready, summary.desired_ready))]);

    let patch = Patch::Merge(json!({ "status": BundleStatus { conditions, summary, ..bundle.status.clone().unwrap_or_default() } }));
    bundles.patch_status(&bundle_name, &PatchParams::apply(FIELD_MANAGER), &patch).await?;

    Ok(Action::await_change())
}

pub fn on_error(bd: Arc<BundleDeployment>, error: &FleetError, _ctx: Arc<Context>) -> Action {
    tracing::error!(bundle_deployment = %bd.name_any(), "BundleDeployment status rollup failed: {error}");
    if error.should_requeue() {
        Action::requeue(Duration::from_secs(10))
    } else {
        Action::await_change()
    }
}
