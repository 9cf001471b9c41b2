//
// Copyright (C) 2025 Pedro Henrique / phkaiser13
//
// File: src/crds/bundle.rs
//
// Bundle custom resource: a manifest bag plus targeting spec.
//
// A `#[derive(CustomResource)]` spec struct, a companion status struct,
// and a cluster of small supporting structs for rollout/options.
//
// SPDX-License-Identifier: Apache-2.0
//

use super::common::{Condition, ObjectRef};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "fleet.cattle.io",
    version = "v1alpha1",
    kind = "Bundle",
    namespaced,
    status = "BundleStatus",
    printcolumn = r#"{"name":"Ready", "type":"string", "jsonPath":".status.summary.ready"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#,
    shortname = "bdl"
)]
#[serde(rename_all = "camelCase")]
pub struct BundleSpec {
    /// Ordered, named manifest blobs. Content is immutable once stored; an
    /// edit to this list produces a new content digest.
    #[serde(default)]
    pub resources: Vec<BundleResource>,

    /// Base options applied to every target before per-target customization.
    #[serde(default)]
    pub options: BundleDeploymentOptions,

    /// Ordered per-target customizations. First match wins.
    #[serde(default)]
    pub targets: Vec<BundleTarget>,

    /// Whitelist filters; when non-empty a candidate target must satisfy at
    /// least one restriction on top of its own predicates.
    #[serde(default)]
    pub target_restrictions: Vec<BundleTarget>,

    #[serde(default)]
    pub rollout: RolloutStrategy,

    /// Ordered dependency list; a Bundle only deploys once every entry is in
    /// one of its `accepted_states`.
    #[serde(default)]
    pub depends_on: Vec<BundleRef>,

    /// When set, resources are left on the cluster after the Bundle or a
    /// matching target is removed.
    #[serde(default)]
    pub keep_resources: bool,

    /// Freezes rollout for every target of this Bundle; a paused Cluster
    /// freezes only its own target.
    #[serde(default)]
    pub paused: bool,

    /// Set by the HelmOp reconciler on Bundles it owns; absence means
    /// this Bundle is Git-owned.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub helm_op_options: Option<HelmOpOptions>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct HelmOpOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret_name: Option<String>,
    #[serde(default)]
    pub insecure_skip_tls_verify: bool,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct BundleResource {
    pub name: String,
    /// Raw bytes, optionally gzip+base64 encoded (mirrors Fleet's on-the-wire
    /// representation so large manifests don't balloon etcd objects).
    pub content: String,
    #[serde(default)]
    pub encoding: ResourceEncoding,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum ResourceEncoding {
    #[default]
    Plain,
    Base64,
    GzipBase64,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct BundleTarget {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_group_selector: Option<super::common::LabelSelector>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_selector: Option<super::common::LabelSelector>,
    #[serde(default)]
    pub options: BundleDeploymentOptions,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct RolloutStrategy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_unavailable: Option<IntOrString>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_unavailable_partitions: Option<IntOrString>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_partition_size: Option<IntOrString>,
    #[serde(default)]
    pub partitions: Vec<Partition>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Partition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_unavailable: Option<IntOrString>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_selector: Option<super::common::LabelSelector>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cluster_group: Option<String>,
}

/// Kubernetes-style "int or percentage string" value, used for the several
/// maxUnavailable-shaped fields.
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(untagged)]
pub enum IntOrString {
    Int(i64),
    Str(String),
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct BundleRef {
    pub name: String,
    #[serde(default)]
    pub accepted_states: Vec<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct BundleDeploymentOptions {
    #[serde(default)]
    pub default_namespace: String,
    #[serde(default)]
    pub target_namespace: String,
    #[serde(default)]
    pub service_account: String,
    #[serde(default)]
    pub force: bool,
    #[serde(default)]
    pub atomic: bool,
    #[serde(default)]
    pub take_ownership: bool,
    #[serde(default)]
    pub disable_pre_process: bool,
    #[serde(default)]
    pub wait_for_jobs: bool,
    #[serde(default)]
    pub keep_resources: bool,
    /// Explicit flag gating the "never uninstall the fleet-agent" special
    /// case instead of a name-prefix match.
    #[serde(default)]
    pub agent_self_managed: bool,
    #[serde(default)]
    pub force_sync_generation: i64,
    #[serde(default)]
    pub helm: HelmOptions,
    #[serde(default)]
    pub kustomize: KustomizeOptions,
    #[serde(default)]
    pub diff: DiffOptions,
    #[serde(default)]
    pub yaml: YamlOptions,
    #[serde(default)]
    pub ignore_options: IgnoreOptions,
}

/// Drift-monitor readiness exclusions.
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct IgnoreOptions {
    /// Each entry is a partial condition (`{type, status?}`); a condition on
    /// a live object is dropped before readiness summarization when every
    /// key present here equals the condition's own value.
    #[serde(default)]
    pub conditions: Vec<BTreeMap<String, String>>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct HelmOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chart: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub release_name: Option<String>,
    #[serde(default)]
    pub values: BTreeMap<String, Value>,
    #[serde(default)]
    pub values_from: Vec<ValuesFrom>,
    #[serde(default)]
    pub timeout_seconds: i64,
    #[serde(default)]
    pub max_history: i64,
    #[serde(default)]
    pub disable_pre_process: bool,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ValuesFrom {
    pub config_map_key_ref: Option<ObjectRef>,
    pub secret_key_ref: Option<ObjectRef>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct KustomizeOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct DiffOptions {
    #[serde(default)]
    pub compare_patches: Vec<ComparePatch>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ComparePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// JSON pointers to ignore when diffing live vs. predicted state.
    #[serde(default)]
    pub json_pointers: Vec<String>,
    /// Raw JSON-Patch operations applied to the live object before diffing.
    #[serde(default)]
    pub operations: Vec<Value>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct YamlOptions {
    #[serde(default)]
    pub overlays: Vec<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct BundleStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub summary: BundleSummary,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_digest: Option<String>,
    #[serde(default)]
    pub resource_key: Vec<super::common::ObjectRef>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BundleSummary {
    #[serde(default)]
    pub desired_ready: usize,
    #[serde(default)]
    pub ready: usize,
    #[serde(default)]
    pub pending: usize,
    #[serde(default)]
    pub wait_applied: usize,
    #[serde(default)]
    pub modified: usize,
    #[serde(default)]
    pub err_applied: usize,
}
