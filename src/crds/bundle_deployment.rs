//
// Copyright (C) 2025 Pedro Henrique / phkaiser13
//
// File: src/crds/bundle_deployment.rs
//
// BundleDeployment custom resource: one-per-(bundle,cluster) materialization.
//
// SPDX-License-Identifier: Apache-2.0
//

use super::bundle::BundleDeploymentOptions;
use super::common::{Condition, ObjectRef};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub const LABEL_BUNDLE_NAME: &str = "fleet.cattle.io/bundle-name";
pub const LABEL_BUNDLE_NAMESPACE: &str = "fleet.cattle.io/bundle-namespace";
pub const LABEL_CLUSTER: &str = "fleet.cattle.io/cluster";
pub const LABEL_CLUSTER_NAMESPACE: &str = "fleet.cattle.io/cluster-namespace";
pub const LABEL_HELMOP_NAME: &str = "fleet.cattle.io/helmop-name";

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "fleet.cattle.io",
    version = "v1alpha1",
    kind = "BundleDeployment",
    namespaced,
    status = "BundleDeploymentStatus",
    printcolumn = r#"{"name":"Ready", "type":"boolean", "jsonPath":".status.ready"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#,
    shortname = "bd"
)]
#[serde(rename_all = "camelCase")]
pub struct BundleDeploymentSpec {
    /// Desired DeploymentID; the rollout controller moves this forward one
    /// partition at a time.
    pub deployment_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub staged_deployment_id: Option<String>,
    pub options: BundleDeploymentOptions,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub staged_options: Option<BundleDeploymentOptions>,
    #[serde(default)]
    pub paused: bool,
    /// Digest of the manifest content this deployment renders.
    pub content_digest: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct BundleDeploymentStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub applied_deployment_id: Option<String>,
    #[serde(default)]
    pub ready: bool,
    #[serde(default)]
    pub non_modified: bool,
    #[serde(default)]
    pub non_ready_status: Vec<NonReadyStatus>,
    #[serde(default)]
    pub modified_status: Vec<ModifiedStatus>,
    #[serde(default)]
    pub resources: Vec<AppliedResource>,
    #[serde(default)]
    pub resource_counts: ResourceCounts,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release: Option<String>,
    #[serde(default)]
    pub sync_generation: i64,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

pub const MAX_STATUS_ENTRIES: usize = 10;

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NonReadyStatus {
    pub uid: String,
    pub api_version: String,
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub name: String,
    pub summary: String,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ModifiedStatus {
    pub api_version: String,
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub name: String,
    #[serde(default)]
    pub create: bool,
    #[serde(default)]
    pub delete: bool,
    #[serde(default)]
    pub exist: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patch: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct AppliedResource {
    pub api_version: String,
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceCounts {
    #[serde(default)]
    pub ready: usize,
    #[serde(default)]
    pub not_ready: usize,
    #[serde(default)]
    pub desired: usize,
}

/// Build the owning-Bundle `ObjectRef` from a BundleDeployment's labels, the
/// lookup the status-rollup controller needs to fan a deployment's summary
/// back up to its parent Bundle.
pub fn owning_bundle(labels: &std::collections::BTreeMap<String, String>) -> Option<ObjectRef> {
    Some(ObjectRef {
        name: labels.get(LABEL_BUNDLE_NAME)?.clone(),
        namespace: labels.get(LABEL_BUNDLE_NAMESPACE).cloned(),
    })
}
