//
// Copyright (C) 2025 Pedro Henrique / phkaiser13
//
// File: src/controllers/cluster_controller.rs
//
// Maintains `Cluster.status`: resource counts rolled up from every
// BundleDeployment assigned to this cluster, and a `Ready` condition
// reflecting whether the agent has reported in at all. Thin and
// timer-driven, no state beyond what it reads each reconcile.
//
// SPDX-License-Identifier: Apache-2.0
//

use crate::crds::bundle_deployment::{BundleDeployment, ResourceCounts, LABEL_CLUSTER};
use crate::crds::cluster::Cluster;
use crate::crds::common::{merge_conditions, Condition};
use crate::errors::FleetError;
use kube::api::{Api, ListParams, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::{Client, ResourceExt};
use std::sync::Arc;
use std::time::Duration;

const FIELD_MANAGER: &str = "fleet-cluster-controller";

pub struct Context {
    pub client: Client,
}

fn sum_resource_counts(deployments: &[BundleDeployment]) -> ResourceCounts {
    let mut total = ResourceCounts::default();
    for bd in deployments {
        if let Some(status) = &bd.status {
            total.ready += status.resource_counts.ready;
            total.not_ready += status.resource_counts.not_ready;
            total.desired += status.resource_counts.desired;
        }
    }
    total
}

pub async fn reconcile(cluster: Arc<Cluster>, ctx: Arc<Context>) -> Result<Action, FleetError> {
    let namespace = cluster.namespace().unwrap_or_default();
    let name = cluster.name_any();

    let api: Api<BundleDeployment> = Api::all(ctx.client.clone());
    let selector = format!("{LABEL_CLUSTER}={name}");
    let deployments = api.list(&ListParams::default().labels(&selector)).await?.items;

    let resource_counts = sum_resource_counts(&deployments);
    let has_agent_reported = deployments.iter().any(|d| d.status.is_some());

    let clusters: Api<Cluster> = Api::namespaced(ctx.client.clone(), &namespace);
    let mut conditions = cluster.status.as_ref().map(|s| s.conditions.clone()).unwrap_or_default();
    merge_conditions(&mut conditions, vec![Condition::ready(has_agent_reported, if has_agent_reported { "agent reporting" } else { "no BundleDeployment status reported yet" })]);

    let mut status = cluster.status.clone().unwrap_or_default();
    status.resource_counts = resource_counts;
    status.conditions = conditions;
    if has_agent_reported {
        status.agent_last_seen = Some(chrono::Utc::now().to_rfc3339());
    }

    let patch = Patch::Merge(serde_json::json!({ "status": status }));
    clusters.patch_status(&name, &PatchParams::apply(FIELD_MANAGER), &patch).await?;

    Ok(Action::requeue(Duration::from_secs(60)))
}

pub fn on_error(cluster: Arc<Cluster>, error: &FleetError, _ctx: Arc<Context>) -> Action {
    tracing::error!(cluster = %cluster.name_any(), "Cluster status rollup failed: {error}");
    if error.should_requeue() {
        Action::requeue(Duration::from_secs(20))
    } else {
        Action::await_change()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crds::bundle_deployment::BundleDeploymentStatus;

    fn deployment_with_counts(ready: usize, not_ready: usize, desired: usize) -> BundleDeployment {
        BundleDeployment {
            metadata: Default::default(),
            spec: crate::crds::bundle_deployment::BundleDeploymentSpec {
                deployment_id: "s-x".to_string(),
                staged_deployment_id: None,
                options: Default::default(),
                staged_options: None,
                paused: false,
                content_digest: "s-x".to_string(),
            },
            status: Some(BundleDeploymentStatus { resource_counts: ResourceCounts { ready, not_ready, desired }, ..Default::default() }),
        }
    }

    #[test]
    fn sums_resource_counts_across_deployments() {
        let deployments = vec![deployment_with_counts(2, 1, 3), deployment_with_counts(5, 0, 5)];
        let total = sum_resource_counts(&deployments);
        assert_eq!(total.ready, 7);
        assert_eq!(total.not_ready, 1);
        assert_eq!(total.desired, 8);
    }
}
