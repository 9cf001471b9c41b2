//
// Copyright (C) 2025 Pedro Henrique / phkaiser13
//
// File: src/labels.rs
//
// Stable label/annotation contract, collected here since these names are
// shared across every controller and the agent.
//
// SPDX-License-Identifier: Apache-2.0
//

pub const BUNDLE_NAME: &str = "fleet.cattle.io/bundle-name";
pub const BUNDLE_NAMESPACE: &str = "fleet.cattle.io/bundle-namespace";
pub const CLUSTER: &str = "fleet.cattle.io/cluster";
pub const CLUSTER_NAMESPACE: &str = "fleet.cattle.io/cluster-namespace";

pub const REPO_NAME: &str = "fleet.cattle.io/repo-name";
pub const HELMOP_NAME: &str = "fleet.cattle.io/helmop-name";
pub const HELMAPP_NAME: &str = "fleet.cattle.io/helmapp-name";

pub const SHARD_REF: &str = "fleet.cattle.io/shard-ref";

pub const OBJECTSET_ID: &str = "objectset.rio.cattle.io/id";
pub const OBJECTSET_HASH: &str = "objectset.rio.cattle.io/hash";
pub const OBJECTSET_OWNER_GVK: &str = "objectset.rio.cattle.io/owner-gvk";
pub const OBJECTSET_OWNER_NAME: &str = "objectset.rio.cattle.io/owner-name";
pub const OBJECTSET_OWNER_NAMESPACE: &str = "objectset.rio.cattle.io/owner-namespace";
pub const OBJECTSET_APPLIED: &str = "objectset.rio.cattle.io/applied";
pub const OBJECTSET_PRUNE: &str = "objectset.rio.cattle.io/prune";

pub const CHART_BUNDLE_ID: &str = "fleet.cattle.io/bundle-id";
pub const CHART_AGENT_NAMESPACE: &str = "fleet.cattle.io/agent-namespace";
pub const CHART_SERVICE_ACCOUNT: &str = "fleet.cattle.io/service-account";
pub const CHART_COMMIT: &str = "fleet.cattle.io/commit";

/// `fleet-agent`'s own BundleDeployment is never literally uninstalled; see
/// `BundleDeploymentOptions::agent_self_managed`.
pub const FLEET_AGENT_BUNDLE_NAME: &str = "fleet-agent";
