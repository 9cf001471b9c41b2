//
// Copyright (C) 2025 Pedro Henrique / phkaiser13
//
// File: src/options.rs
//
// Options Merger: a pure function merging base
// BundleDeploymentOptions with per-target customizations, plus the
// DeploymentID hash. Free of `kube` types entirely, decoupled from CRD
// plumbing.
//
// SPDX-License-Identifier: Apache-2.0
//

use crate::crds::bundle::{BundleDeploymentOptions, ComparePatch, HelmOptions};
use sha2::{Digest, Sha256};
use serde_json::Value;

/// Field explicitly cleared by the customer-facing sentinel `"-"`.
const CLEAR_SENTINEL: &str = "-";

fn merge_string(base: &str, custom: &str) -> String {
    if custom == CLEAR_SENTINEL {
        String::new()
    } else if !custom.is_empty() {
        custom.to_string()
    } else {
        base.to_string()
    }
}

fn merge_values(base: &std::collections::BTreeMap<String, Value>, custom: &std::collections::BTreeMap<String, Value>) -> std::collections::BTreeMap<String, Value> {
    let mut merged = base.clone();
    for (k, v) in custom {
        match (merged.get(k), v) {
            (Some(Value::Object(base_map)), Value::Object(custom_map)) => {
                let base_btree: std::collections::BTreeMap<String, Value> = base_map.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
                let custom_btree: std::collections::BTreeMap<String, Value> = custom_map.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
                let merged_nested = merge_values(&base_btree, &custom_btree);
                merged.insert(k.clone(), Value::Object(merged_nested.into_iter().collect()));
            }
            _ => {
                merged.insert(k.clone(), v.clone());
            }
        }
    }
    merged
}

fn merge_helm(base: &HelmOptions, custom: &HelmOptions) -> HelmOptions {
    HelmOptions {
        repo: custom.repo.clone().or_else(|| base.repo.clone()),
        chart: custom.chart.clone().or_else(|| base.chart.clone()),
        version: custom.version.clone().or_else(|| base.version.clone()),
        release_name: custom.release_name.clone().or_else(|| base.release_name.clone()),
        values: merge_values(&base.values, &custom.values),
        values_from: base.values_from.iter().cloned().chain(custom.values_from.iter().cloned()).collect(),
        timeout_seconds: if custom.timeout_seconds > 0 {
            custom.timeout_seconds
        } else if custom.timeout_seconds < 0 {
            0
        } else {
            base.timeout_seconds
        },
        max_history: if custom.max_history > 0 { custom.max_history } else { base.max_history },
        disable_pre_process: base.disable_pre_process || custom.disable_pre_process,
    }
}

fn merge_compare_patches(base: &[ComparePatch], custom: &[ComparePatch]) -> Vec<ComparePatch> {
    base.iter().cloned().chain(custom.iter().cloned()).collect()
}

/// `Merge(base, custom) -> merged`, applying the field-level merge rules
/// in order. Pure: no clock, no randomness — `DeploymentID` depends on
/// this function's output, so it must stay deterministic.
pub fn merge(base: &BundleDeploymentOptions, custom: &BundleDeploymentOptions) -> BundleDeploymentOptions {
    BundleDeploymentOptions {
        default_namespace: merge_string(&base.default_namespace, &custom.default_namespace),
        target_namespace: merge_string(&base.target_namespace, &custom.target_namespace),
        service_account: merge_string(&base.service_account, &custom.service_account),
        force: base.force || custom.force,
        atomic: base.atomic || custom.atomic,
        take_ownership: base.take_ownership || custom.take_ownership,
        disable_pre_process: base.disable_pre_process || custom.disable_pre_process,
        wait_for_jobs: base.wait_for_jobs || custom.wait_for_jobs,
        keep_resources: base.keep_resources || custom.keep_resources,
        agent_self_managed: base.agent_self_managed || custom.agent_self_managed,
        force_sync_generation: if custom.force_sync_generation > 0 { custom.force_sync_generation } else { base.force_sync_generation },
        helm: merge_helm(&base.helm, &custom.helm),
        kustomize: if custom.kustomize.dir.is_some() { custom.kustomize.clone() } else { base.kustomize.clone() },
        diff: crate::crds::bundle::DiffOptions { compare_patches: merge_compare_patches(&base.diff.compare_patches, &custom.diff.compare_patches) },
        yaml: crate::crds::bundle::YamlOptions {
            overlays: base.yaml.overlays.iter().cloned().chain(custom.yaml.overlays.iter().cloned()).collect(),
        },
    }
}

/// Canonical JSON of options: serde_json's default `Map` is a `BTreeMap`
/// (the `preserve_order` feature is not enabled), so keys come out sorted
/// with no extra work — sorted map keys, no trailing whitespace, UTF-8,
/// straight out of `serde_json::to_string`.
pub fn canonical_options_json(opts: &BundleDeploymentOptions) -> String {
    serde_json::to_string(opts).expect("BundleDeploymentOptions always serializes")
}

pub fn options_hash(opts: &BundleDeploymentOptions) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical_options_json(opts).as_bytes());
    hex_encode(hasher.finalize())
}

fn hex_encode(bytes: impl AsRef<[u8]>) -> String {
    use std::fmt::Write;
    let mut s = String::with_capacity(bytes.as_ref().len() * 2);
    for b in bytes.as_ref() {
        write!(s, "{:02x}", b).expect("writing to a String cannot fail");
    }
    s
}

/// `DeploymentID(manifest, mergedOpts) = contentDigest ":" sha256(json(mergedOpts))`.
pub fn deployment_id(content_digest: &str, merged_opts: &BundleDeploymentOptions) -> String {
    format!("{}:{}", content_digest, options_hash(merged_opts))
}
