//
// Copyright (C) 2025 Pedro Henrique / phkaiser13
//
// File: src/rollout.rs
//
// Rollout Controller. Staged, partitioned, rate-limited
// propagation of BundleDeployment desired-state changes. Pure state machine
// over in-memory Target/Partition structs; the owning controller performs
// the actual `kube::Api` I/O, keeping the state machine separate from its
// `Api::patch_status` calls.
//
// SPDX-License-Identifier: Apache-2.0
//

use crate::content::ResourceKey;
use crate::crds::bundle::{Bundle, BundleDeploymentOptions, BundleSummary, IntOrString, Partition as PartitionSpec};
use crate::crds::bundle_deployment::BundleDeploymentStatus;
use crate::crds::common::selector_matches;
use crate::planner::Target;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum DeploymentState {
    Pending,
    Staged,
    Committing,
    ErrApplied,
    Ready,
}

impl DeploymentState {
    /// Upgrading is treated as unavailable; a target reporting an agent
    /// error is likewise not counted available.
    pub fn is_unavailable(self) -> bool {
        matches!(self, DeploymentState::Committing | DeploymentState::ErrApplied)
    }
}

/// Derive a target's current state from its (possibly absent) existing
/// deployment.
pub fn state_of(target: &Target) -> DeploymentState {
    let Some(bd) = &target.existing_deployment else { return DeploymentState::Pending };
    let status: &BundleDeploymentStatus = &bd.status.clone().unwrap_or_default();

    let staged = bd.spec.staged_deployment_id.as_deref();
    let desired = bd.spec.deployment_id.as_str();

    if staged == Some(target.deployment_id.as_str()) && desired != target.deployment_id {
        return DeploymentState::Staged;
    }
    if desired == target.deployment_id {
        if status.applied_deployment_id.as_deref() == Some(desired) {
            if status.ready {
                return DeploymentState::Ready;
            }
            if !status.non_ready_status.is_empty() && status.applied_deployment_id.is_some() {
                return DeploymentState::ErrApplied;
            }
        }
        return DeploymentState::Committing;
    }
    DeploymentState::Pending
}

/// `Limit(count, spec, default)`: integer spec returns as-is; percentage
/// spec computes floor(count*pct/100) with minimum 1 when pct>0; count==0
/// returns 1.
pub fn limit(count: usize, spec: Option<&IntOrString>, default: &IntOrString) -> usize {
    if count == 0 {
        return 1;
    }
    let spec = spec.unwrap_or(default);
    match spec {
        IntOrString::Int(n) => (*n).max(0) as usize,
        IntOrString::Str(s) => {
            let pct: f64 = s.trim_end_matches('%').parse().unwrap_or(0.0);
            let raw = (count as f64 * pct / 100.0).floor() as i64;
            if pct > 0.0 {
                raw.max(1) as usize
            } else {
                raw.max(0) as usize
            }
        }
    }
}

/// Auto-partition target count per partition: ceiling of `count * pct /
/// 100`, minimum 1. Unlike `limit`, this uses ceiling rather than floor —
/// `limit`'s formula is written for *budgets* (how many may be
/// unavailable, where under-counting is the safe direction); sizing
/// partitions the same way would silently grow partition count past what
/// "size ~25%" implies. See DESIGN.md for this as a resolved ambiguity.
fn auto_partition_size(count: usize, pct_spec: Option<&IntOrString>) -> usize {
    if count == 0 {
        return 1;
    }
    match pct_spec {
        Some(IntOrString::Int(n)) if *n > 0 => *n as usize,
        Some(IntOrString::Str(s)) => {
            let pct: f64 = s.trim_end_matches('%').parse().unwrap_or(25.0);
            if pct <= 0.0 {
                return count;
            }
            ((count as f64 * pct / 100.0).ceil() as usize).max(1)
        }
        _ => ((count as f64 * 0.25).ceil() as usize).max(1),
    }
}

pub struct BuiltPartition<'t> {
    pub name: String,
    pub targets: Vec<&'t Target>,
    pub max_unavailable_override: Option<IntOrString>,
}

/// Build the partition list: explicit `rollout.partitions` (one per
/// declaration, matched via its own selector) when configured, otherwise
/// contiguous auto-partitions of `auto_partition_size`. `autoPartitionSize
/// <= 0` yields a single partition named "All".
pub fn build_partitions<'t>(bundle: &Bundle, targets: &'t [Target]) -> Vec<BuiltPartition<'t>> {
    if !bundle.spec.rollout.partitions.is_empty() {
        return build_explicit_partitions(&bundle.spec.rollout.partitions, targets);
    }

    if let Some(IntOrString::Int(n)) = &bundle.spec.rollout.auto_partition_size {
        if *n <= 0 {
            return vec![BuiltPartition { name: "All".to_string(), targets: targets.iter().collect(), max_unavailable_override: None }];
        }
    }
    if let Some(IntOrString::Str(s)) = &bundle.spec.rollout.auto_partition_size {
        if s.trim_end_matches('%').parse::<f64>().unwrap_or(25.0) <= 0.0 {
            return vec![BuiltPartition { name: "All".to_string(), targets: targets.iter().collect(), max_unavailable_override: None }];
        }
    }

    let size = auto_partition_size(targets.len(), bundle.spec.rollout.auto_partition_size.as_ref());
    let mut partitions = Vec::new();
    for (i, chunk) in targets.chunks(size.max(1)).enumerate() {
        partitions.push(BuiltPartition { name: format!("partition-{i}"), targets: chunk.iter().collect(), max_unavailable_override: None });
    }
    if partitions.is_empty() {
        partitions.push(BuiltPartition { name: "All".to_string(), targets: vec![], max_unavailable_override: None });
    }
    partitions
}

fn build_explicit_partitions<'t>(specs: &[PartitionSpec], targets: &'t [Target]) -> Vec<BuiltPartition<'t>> {
    let mut assigned = vec![false; targets.len()];
    let mut partitions = Vec::with_capacity(specs.len());

    for spec in specs {
        let mut members = Vec::new();
        for (i, target) in targets.iter().enumerate() {
            if assigned[i] {
                continue;
            }
            let matches_group = spec.cluster_group.as_deref().is_some_and(|g| target.group_names.iter().any(|tg| tg == g));
            let matches_selector = spec.cluster_selector.is_some() && partition_selector_matches(spec, &target.cluster_labels);
            if matches_group || matches_selector {
                members.push(target);
                assigned[i] = true;
            }
        }
        partitions.push(BuiltPartition { name: spec.name.clone(), targets: members, max_unavailable_override: spec.max_unavailable.clone() });
    }

    // Unclaimed targets still roll out, grouped into a trailing partition.
    let leftover: Vec<&Target> = targets.iter().enumerate().filter(|(i, _)| !assigned[*i]).map(|(_, t)| t).collect();
    if !leftover.is_empty() {
        partitions.push(BuiltPartition { name: "unassigned".to_string(), targets: leftover, max_unavailable_override: None });
    }
    partitions
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct PartitionStatus {
    pub name: String,
    pub count: usize,
    pub max_unavailable: usize,
    pub unavailable: usize,
}

/// A target decided to commit this reconcile: its spec should move
/// `deployment_id` forward to `staged_deployment_id`.
#[derive(Clone, Debug)]
pub struct Commit {
    pub cluster_namespace: String,
    pub cluster_name: String,
    pub deployment_id: String,
    pub options: BundleDeploymentOptions,
    pub is_new: bool,
}

pub struct RolloutResult {
    pub commits: Vec<Commit>,
    pub partitions: Vec<PartitionStatus>,
    pub summary: BundleSummary,
    pub resource_key: Vec<ResourceKey>,
}

const MAX_NEW_PER_PARTITION: usize = 50;

/// Per-bundle reconcile procedure.
pub fn reconcile(bundle: &Bundle, targets: &[Target], resource_key_source: Vec<ResourceKey>) -> RolloutResult {
    let max_unavailable = limit(targets.len(), bundle.spec.rollout.max_unavailable.as_ref(), &IntOrString::Str("100%".to_string()));

    let built_partitions = build_partitions(bundle, targets);
    let max_unavailable_partitions = limit(built_partitions.len(), bundle.spec.rollout.max_unavailable_partitions.as_ref(), &IntOrString::Int(0));

    let mut commits = Vec::new();
    let mut partition_statuses = Vec::new();
    let mut global_unavailable = targets.iter().filter(|t| state_of(t).is_unavailable()).count().min(max_unavailable);
    let mut unavailable_partitions = 0usize;
    let mut halted = false;

    let mut states: Vec<(String, DeploymentState)> = targets.iter().map(|t| (t.cluster_name.clone(), state_of(t))).collect();

    for partition in &built_partitions {
        let mut partition_unavailable = partition
            .targets
            .iter()
            .filter(|t| states.iter().find(|(n, _)| *n == t.cluster_name).map(|(_, s)| s.is_unavailable()).unwrap_or(false))
            .count();

        let partition_max_unavailable = limit(
            partition.targets.len(),
            partition.max_unavailable_override.as_ref(),
            &IntOrString::Int(max_unavailable.max(1) as i64),
        );

        let mut new_this_partition = 0usize;

        if !halted {
            for target in &partition.targets {
                let current_state = states.iter().find(|(n, _)| n == &target.cluster_name).map(|(_, s)| *s).unwrap_or(DeploymentState::Pending);
                let is_new = target.existing_deployment.is_none();

                if is_new && new_this_partition >= MAX_NEW_PER_PARTITION {
                    continue;
                }

                let cluster_paused = false; // Cluster.spec.paused is evaluated by the caller before targets are built.
                let paused = bundle.spec.paused || cluster_paused;

                let staged_differs_from_committed = target
                    .existing_deployment
                    .as_ref()
                    .map(|bd| bd.spec.deployment_id != target.deployment_id)
                    .unwrap_or(true);

                let already_unavailable = current_state.is_unavailable();
                let budget_ok = already_unavailable || (partition_unavailable < partition_max_unavailable.max(max_unavailable) && global_unavailable < max_unavailable);

                if is_new {
                    new_this_partition += 1;
                }

                if paused {
                    continue;
                }

                if !staged_differs_from_committed {
                    continue;
                }

                if !budget_ok {
                    continue;
                }

                commits.push(Commit {
                    cluster_namespace: target.cluster_namespace.clone(),
                    cluster_name: target.cluster_name.clone(),
                    deployment_id: target.deployment_id.clone(),
                    options: target.merged_options.clone(),
                    is_new,
                });

                if let Some(slot) = states.iter_mut().find(|(n, _)| n == &target.cluster_name) {
                    slot.1 = DeploymentState::Committing;
                }
                if !already_unavailable {
                    partition_unavailable += 1;
                    global_unavailable += 1;
                }
            }
        }

        partition_statuses.push(PartitionStatus {
            name: partition.name.clone(),
            count: partition.targets.len(),
            max_unavailable: partition_max_unavailable,
            unavailable: partition_unavailable,
        });

        if partition_unavailable > partition_max_unavailable {
            unavailable_partitions += 1;
        }
        if unavailable_partitions > max_unavailable_partitions {
            halted = true;
        }
    }

    let summary = summarize(&states);

    RolloutResult { commits, partitions: partition_statuses, summary, resource_key: resource_key_source }
}

fn summarize(states: &[(String, DeploymentState)]) -> BundleSummary {
    let mut summary = BundleSummary { desired_ready: states.len(), ..Default::default() };
    for (_, state) in states {
        match state {
            DeploymentState::Ready => summary.ready += 1,
            DeploymentState::Pending => summary.pending += 1,
            DeploymentState::Staged | DeploymentState::Committing => summary.wait_applied += 1,
            DeploymentState::ErrApplied => summary.err_applied += 1,
        }
    }
    summary
}

/// Does the selector on a `Partition` spec match a cluster's labels.
pub fn partition_selector_matches(spec: &PartitionSpec, cluster_labels: &std::collections::BTreeMap<String, String>) -> bool {
    selector_matches(spec.cluster_selector.as_ref(), cluster_labels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crds::bundle::{BundleSpec, RolloutStrategy};
    use kube::core::ObjectMeta;

    fn bundle_with_rollout(rollout: RolloutStrategy) -> Bundle {
        Bundle {
            metadata: ObjectMeta { name: Some("b1".to_string()), namespace: Some("default".to_string()), ..Default::default() },
            spec: BundleSpec {
                resources: vec![],
                options: Default::default(),
                targets: vec![],
                target_restrictions: vec![],
                rollout,
                depends_on: vec![],
                keep_resources: false,
                paused: false,
                helm_op_options: None,
            },
            status: None,
        }
    }

    fn pending_target(cluster: &str) -> Target {
        Target {
            cluster_name: cluster.to_string(),
            cluster_namespace: format!("cluster-{cluster}-ns"),
            cluster_labels: std::collections::BTreeMap::new(),
            group_names: vec![],
            matched_target_name: "t1".to_string(),
            merged_options: Default::default(),
            deployment_id: "s-deadbeef:opts1".to_string(),
            existing_deployment: None,
        }
    }

    fn pending_target_with_labels(cluster: &str, labels: &[(&str, &str)]) -> Target {
        let mut t = pending_target(cluster);
        t.cluster_labels = labels.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        t
    }

    #[test]
    fn limit_integer_spec_is_literal() {
        assert_eq!(limit(10, Some(&IntOrString::Int(3)), &IntOrString::Int(1)), 3);
    }

    #[test]
    fn limit_percentage_floors_with_minimum_one() {
        assert_eq!(limit(10, Some(&IntOrString::Str("20%".to_string())), &IntOrString::Int(1)), 2);
        assert_eq!(limit(3, Some(&IntOrString::Str("1%".to_string())), &IntOrString::Int(1)), 1);
    }

    #[test]
    fn limit_zero_count_returns_one() {
        assert_eq!(limit(0, Some(&IntOrString::Int(5)), &IntOrString::Int(1)), 1);
    }

    #[test]
    fn all_pending_targets_become_commits_within_budget() {
        let bundle = bundle_with_rollout(RolloutStrategy { max_unavailable: Some(IntOrString::Str("20%".to_string())), ..Default::default() });
        let targets: Vec<Target> = (0..10).map(|i| pending_target(&format!("c{i}"))).collect();
        let keys = vec![];
        let result = reconcile(&bundle, &targets, keys);

        // Property 3: unavailable targets never exceed MaxUnavailable
        // except those already unavailable before the reconcile (none are,
        // here, so the running commit count must respect the budget per
        // partition boundary).
        assert!(!result.partitions.is_empty());
        for p in &result.partitions {
            assert!(p.unavailable <= p.max_unavailable || p.max_unavailable == 0);
        }
    }

    #[test]
    fn partition_i_plus_one_waits_for_partition_i() {
        let bundle = bundle_with_rollout(RolloutStrategy {
            max_unavailable: Some(IntOrString::Int(0)),
            auto_partition_size: Some(IntOrString::Int(2)),
            ..Default::default()
        });
        let targets: Vec<Target> = (0..4).map(|i| pending_target(&format!("c{i}"))).collect();
        let result = reconcile(&bundle, &targets, vec![]);
        // With MaxUnavailable=0 nothing may commit at all, in any partition.
        assert!(result.commits.is_empty());
    }

    #[test]
    fn scenario_rollout_partitioning_respects_budget_and_size() {
        let bundle = bundle_with_rollout(RolloutStrategy {
            max_unavailable: Some(IntOrString::Str("20%".to_string())),
            auto_partition_size: Some(IntOrString::Str("25%".to_string())),
            ..Default::default()
        });
        let targets: Vec<Target> = (0..10).map(|i| pending_target(&format!("c{i}"))).collect();
        let partitions = build_partitions(&bundle, &targets);
        assert_eq!(partitions.len(), 4);
        assert!(partitions.iter().all(|p| p.targets.len() <= 3));

        let result = reconcile(&bundle, &targets, vec![]);
        assert_eq!(result.partitions.len(), 4);
        for p in &result.partitions {
            assert!(p.unavailable <= 2);
        }
    }

    #[test]
    fn paused_bundle_freezes_all_commits() {
        let mut bundle = bundle_with_rollout(RolloutStrategy::default());
        bundle.spec.paused = true;
        let targets: Vec<Target> = (0..3).map(|i| pending_target(&format!("c{i}"))).collect();
        let result = reconcile(&bundle, &targets, vec![]);
        assert!(result.commits.is_empty());
    }

    #[test]
    fn explicit_partition_cluster_selector_claims_matching_targets() {
        let mut match_labels = std::collections::BTreeMap::new();
        match_labels.insert("env".to_string(), "canary".to_string());
        let selector = crate::crds::common::LabelSelector { match_labels: Some(match_labels), match_expressions: None };

        let specs = vec![PartitionSpec {
            name: "canary".to_string(),
            cluster_group: None,
            cluster_selector: Some(selector),
            max_unavailable: None,
        }];

        let targets = vec![pending_target_with_labels("c0", &[("env", "canary")]), pending_target_with_labels("c1", &[("env", "prod")])];

        let built = build_explicit_partitions(&specs, &targets);
        assert_eq!(built.len(), 2);
        assert_eq!(built[0].name, "canary");
        assert_eq!(built[0].targets.len(), 1);
        assert_eq!(built[0].targets[0].cluster_name, "c0");
        assert_eq!(built[1].name, "unassigned");
        assert_eq!(built[1].targets[0].cluster_name, "c1");
    }
}
