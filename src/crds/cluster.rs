//
// Copyright (C) 2025 Pedro Henrique / phkaiser13
//
// File: src/crds/cluster.rs
//
// Cluster and ClusterGroup custom resources.
//
// SPDX-License-Identifier: Apache-2.0
//

use super::common::{Condition, LabelSelector};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "fleet.cattle.io",
    version = "v1alpha1",
    kind = "Cluster",
    namespaced,
    status = "ClusterStatus",
    printcolumn = r#"{"name":"Namespace", "type":"string", "jsonPath":".status.namespace"}"#,
    shortname = "fc"
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Reference to the Secret holding the downstream kubeconfig / agent
    /// bootstrap token; the agent's own auth mechanics are out of scope.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_ref_secret_name: Option<String>,
    #[serde(default)]
    pub paused: bool,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStatus {
    /// Namespace in the upstream cluster where this Cluster's
    /// BundleDeployments live.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_last_seen: Option<String>,
    #[serde(default)]
    pub resource_counts: super::bundle_deployment::ResourceCounts,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "fleet.cattle.io",
    version = "v1alpha1",
    kind = "ClusterGroup",
    namespaced,
    status = "ClusterGroupStatus",
    shortname = "fcg"
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterGroupSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<LabelSelector>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct ClusterGroupStatus {
    #[serde(default)]
    pub cluster_count: usize,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// A Cluster and every ClusterGroup it currently belongs to, assembled by
/// the Target Planner from independent list calls — never stored, never
/// a pointer graph.
#[derive(Clone, Debug)]
pub struct ClusterWithGroups {
    pub cluster: Cluster,
    pub groups: Vec<ClusterGroup>,
}

impl ClusterWithGroups {
    pub fn name(&self) -> &str {
        self.cluster.metadata.name.as_deref().unwrap_or_default()
    }

    pub fn namespace(&self) -> &str {
        self.cluster.metadata.namespace.as_deref().unwrap_or_default()
    }

    pub fn labels(&self) -> &BTreeMap<String, String> {
        &self.cluster.spec.labels
    }

    pub fn group_names(&self) -> Vec<&str> {
        self.groups
            .iter()
            .map(|g| g.metadata.name.as_deref().unwrap_or_default())
            .collect()
    }
}
