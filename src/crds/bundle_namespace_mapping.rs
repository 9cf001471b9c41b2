//
// Copyright (C) 2025 Pedro Henrique / phkaiser13
//
// File: src/crds/bundle_namespace_mapping.rs
//
// BundleNamespaceMapping: extends a Bundle's in-scope namespaces beyond its
// own.
//
// SPDX-License-Identifier: Apache-2.0
//

use super::common::LabelSelector;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, JsonSchema)]
#[kube(
    group = "fleet.cattle.io",
    version = "v1alpha1",
    kind = "BundleNamespaceMapping",
    namespaced,
    shortname = "bnm"
)]
#[serde(rename_all = "camelCase")]
pub struct BundleNamespaceMappingSpec {
    /// Selects which Bundles (by label, in this mapping's own namespace) are
    /// extended by this mapping.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bundle_selector: Option<LabelSelector>,
    /// Selects which downstream-cluster namespaces are added to scope.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace_selector: Option<LabelSelector>,
}
