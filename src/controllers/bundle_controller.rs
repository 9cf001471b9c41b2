//
// Copyright (C) 2025 Pedro Henrique / phkaiser13
//
// File: src/controllers/bundle_controller.rs
//
// Watches `Bundle`, drives target matching through the Rollout
// Controller: decode content, enumerate in-scope clusters, plan
// targets, reconcile the rollout, persist BundleDeployments, and roll the
// result up into `Bundle.status.summary`.
//
// SPDX-License-Identifier: Apache-2.0
//

use crate::content::{ContentStore, ResourceKey};
use crate::crds::bundle::{Bundle, BundleStatus};
use crate::crds::bundle_deployment::{BundleDeployment, BundleDeploymentSpec, LABEL_BUNDLE_NAME, LABEL_BUNDLE_NAMESPACE};
use crate::crds::bundle_namespace_mapping::BundleNamespaceMapping;
use crate::crds::cluster::{Cluster, ClusterGroup, ClusterWithGroups};
use crate::crds::common::Condition;
use crate::errors::FleetError;
use crate::{planner, rollout};
use k8s_openapi::api::core::v1::Namespace;
use kube::api::{Api, ListParams, ObjectMeta, Patch, PatchParams};
use kube::runtime::controller::Action;
use kube::{Client, Resource, ResourceExt};
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

const FIELD_MANAGER: &str = "fleet-bundle-controller";

pub struct Context {
    pub client: Client,
    pub content_store: Arc<dyn ContentStore>,
}

/// Fetch every Cluster in scope, each paired with the ClusterGroups its
/// labels put it in. Namespace scoping itself is `in_scope_namespaces`'s
/// job; here we just enumerate Clusters within the namespaces it returned.
async fn list_clusters(client: &Client, namespaces: &[String]) -> Result<Vec<ClusterWithGroups>, FleetError> {
    let mut out = Vec::new();
    for ns in namespaces {
        let clusters: Api<Cluster> = Api::namespaced(client.clone(), ns);
        let groups: Api<ClusterGroup> = Api::namespaced(client.clone(), ns);
        let group_list = groups.list(&ListParams::default()).await?.items;

        for cluster in clusters.list(&ListParams::default()).await?.items {
            let member_groups: Vec<ClusterGroup> = group_list
                .iter()
                .filter(|g| crate::crds::common::selector_matches(g.spec.selector.as_ref(), &cluster.spec.labels))
                .cloned()
                .collect();
            out.push(ClusterWithGroups { cluster, groups: member_groups });
        }
    }
    Ok(out)
}

async fn list_namespace_mappings(client: &Client) -> Result<Vec<BundleNamespaceMapping>, FleetError> {
    let api: Api<BundleNamespaceMapping> = Api::all(client.clone());
    Ok(api.list(&ListParams::default()).await?.items)
}

/// Every cluster-wide Namespace's labels, so `in_scope_namespaces` can
/// evaluate a mapping's `namespaceSelector` against namespaces the Bundle's
/// own namespace never heard of.
async fn all_namespace_labels(client: &Client) -> Result<BTreeMap<String, BTreeMap<String, String>>, FleetError> {
    let api: Api<Namespace> = Api::all(client.clone());
    let namespaces = api.list(&ListParams::default()).await?.items;
    Ok(namespaces
        .into_iter()
        .filter_map(|ns| {
            let name = ns.metadata.name?;
            Some((name, ns.metadata.labels.unwrap_or_default()))
        })
        .collect())
}

async fn list_bundle_deployments(client: &Client, bundle: &Bundle) -> Result<BTreeMap<String, BundleDeployment>, FleetError> {
    let bundle_name = bundle.name_any();
    let bundle_namespace = bundle.namespace().unwrap_or_default();
    let api: Api<BundleDeployment> = Api::all(client.clone());
    let selector = format!("{LABEL_BUNDLE_NAME}={bundle_name},{LABEL_BUNDLE_NAMESPACE}={bundle_namespace}");
    let deployments = api.list(&ListParams::default().labels(&selector)).await?.items;
    Ok(planner::index_existing_by_cluster_namespace(&deployments))
}

async fn apply_commit(client: &Client, bundle: &Bundle, manifest_digest: &str, commit: &rollout::Commit) -> Result<(), FleetError> {
    let bd = BundleDeployment {
        metadata: ObjectMeta {
            name: Some(bundle.name_any()),
            namespace: Some(commit.cluster_namespace.clone()),
            labels: Some(BTreeMap::from([
                (LABEL_BUNDLE_NAME.to_string(), bundle.name_any()),
                (LABEL_BUNDLE_NAMESPACE.to_string(), bundle.namespace().unwrap_or_default()),
                (crate::crds::bundle_deployment::LABEL_CLUSTER.to_string(), commit.cluster_name.clone()),
            ])),
            ..Default::default()
        },
        spec: BundleDeploymentSpec {
            deployment_id: commit.deployment_id.clone(),
            staged_deployment_id: None,
            options: commit.options.clone(),
            staged_options: None,
            paused: bundle.spec.paused,
            content_digest: manifest_digest.to_string(),
        },
        status: None,
    };

    let api: Api<BundleDeployment> = Api::namespaced(client.clone(), &commit.cluster_namespace);
    api.patch(&bundle.name_any(), &PatchParams::apply(FIELD_MANAGER).force(), &Patch::Apply(&bd)).await?;
    Ok(())
}

async fn update_bundle_status(api: &Api<Bundle>, bundle: &Bundle, result: &rollout::RolloutResult, digest: &str) -> Result<(), FleetError> {
    let ready = result.summary.ready == result.summary.desired_ready;
    let mut status = bundle.status.clone().unwrap_or_default();
    status.summary = result.summary.clone();
    status.content_digest = Some(digest.to_string());
    status.resource_key = result
        .resource_key
        .iter()
        .map(|k: &ResourceKey| crate::crds::common::ObjectRef { name: k.name.clone(), namespace: k.namespace.clone() })
        .collect();
    crate::crds::common::merge_conditions(&mut status.conditions, vec![Condition::ready(ready, format!("{}/{} targets ready", status.summary.ready, status.summary.desired_ready))]);

    let patch = Patch::Apply(json!({ "status": BundleStatus { conditions: status.conditions, summary: status.summary, content_digest: status.content_digest, resource_key: status.resource_key } }));
    api.patch_status(&bundle.name_any(), &PatchParams::apply(FIELD_MANAGER).force(), &patch).await?;
    Ok(())
}

pub async fn reconcile(bundle: Arc<Bundle>, ctx: Arc<Context>) -> Result<Action, FleetError> {
    let namespace = bundle.namespace().ok_or_else(|| FleetError::Validation("Bundle missing namespace".to_string()))?;
    let api: Api<Bundle> = Api::namespaced(ctx.client.clone(), &namespace);

    let manifest = crate::content::decode_resources(&bundle.spec.resources)?;
    ctx.content_store.store(&manifest)?;
    let resource_keys = crate::content::resource_keys(&manifest);

    let mappings = list_namespace_mappings(&ctx.client).await?;
    let namespace_labels = all_namespace_labels(&ctx.client).await?;
    let namespaces = planner::in_scope_namespaces(&namespace, &bundle.metadata.labels.clone().unwrap_or_default(), &mappings, &namespace_labels);

    let clusters = list_clusters(&ctx.client, &namespaces).await?;
    let existing = list_bundle_deployments(&ctx.client, &bundle).await?;

    let targets = planner::plan(&bundle, &manifest, &clusters, &existing);
    let result = rollout::reconcile(&bundle, &targets, resource_keys);

    for commit in &result.commits {
        if let Err(e) = apply_commit(&ctx.client, &bundle, &manifest.digest, commit).await {
            tracing::warn!(bundle = %bundle.name_any(), cluster = %commit.cluster_name, error = %e, "failed to persist BundleDeployment commit");
        }
    }

    update_bundle_status(&api, &bundle, &result, &manifest.digest).await?;

    Ok(Action::requeue(Duration::from_secs(30)))
}

pub fn on_error(bundle: Arc<Bundle>, error: &FleetError, _ctx: Arc<Context>) -> Action {
    tracing::error!(bundle = %bundle.name_any(), "Bundle reconcile failed: {error}");
    if error.should_requeue() {
        Action::requeue(Duration::from_secs(15))
    } else {
        Action::await_change()
    }
}
