//
// Copyright (C) 2025 Pedro Henrique / phkaiser13
//
// File: src/crds/helmop.rs
//
// HelmOp custom resource: declarative Helm deployment without Git.
//
// SPDX-License-Identifier: Apache-2.0
//

use super::bundle::BundleTarget;
use super::common::Condition;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const HELMOP_LABEL: &str = "fleet.cattle.io/helmop-name";
pub const HELMOP_FINALIZER: &str = "fleet.cattle.io/helmop-finalizer";

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "fleet.cattle.io",
    version = "v1alpha1",
    kind = "HelmOp",
    namespaced,
    status = "HelmOpStatus",
    printcolumn = r#"{"name":"Version", "type":"string", "jsonPath":".status.version"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#,
    shortname = "hop"
)]
#[serde(rename_all = "camelCase")]
pub struct HelmOpSpec {
    pub helm: HelmOpSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub helm_secret_name: Option<String>,
    #[serde(default)]
    pub insecure_skip_tls_verify: bool,
    /// Zero or absent disables polling.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub polling_interval: Option<String>,
    #[serde(default)]
    pub targets: Vec<BundleTarget>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct HelmOpSource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chart: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, Default)]
#[serde(rename_all = "camelCase")]
pub struct HelmOpStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    /// `(repo, chart, version)` observed on the last successful reconcile;
    /// used to decide whether cached `status.version` can be reused.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_source: Option<(String, String, String)>,
}

pub const CONDITION_ACCEPTED: &str = "Accepted";
pub const CONDITION_POLLED: &str = "Polled";
pub const CONDITION_READY: &str = "Ready";
