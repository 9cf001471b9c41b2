//
// Copyright (C) 2025 Pedro Henrique / phkaiser13
//
// File: src/planner.rs
//
// Target Planner. For a Bundle, enumerates in-scope
// clusters via namespace mappings, computes merged options, templates
// cluster labels, and emits Targets. Composes `matcher`, `options`,
// `content`, plus `tera` for the `{{ }}` substitution rather than
// reimplementing any of them inline.
//
// SPDX-License-Identifier: Apache-2.0
//

use crate::content::Manifest;
use crate::crds::bundle::{Bundle, BundleDeploymentOptions, BundleTarget};
use crate::crds::bundle_deployment::BundleDeployment;
use crate::crds::bundle_namespace_mapping::BundleNamespaceMapping;
use crate::crds::cluster::ClusterWithGroups;
use crate::crds::common::selector_matches;
use crate::errors::{FleetError, FleetResult};
use crate::matcher::{BundleMatcher, GroupView};
use crate::options;
use serde_json::Value;
use std::collections::BTreeMap;

/// Tuple `(Cluster, ClusterGroups[], Bundle, BundleTarget, mergedOptions,
/// deploymentID, existingDeployment?)` — planner-local, never persisted.
#[derive(Clone, Debug)]
pub struct Target {
    pub cluster_name: String,
    pub cluster_namespace: String,
    pub cluster_labels: BTreeMap<String, String>,
    pub group_names: Vec<String>,
    pub matched_target_name: String,
    pub merged_options: BundleDeploymentOptions,
    pub deployment_id: String,
    pub existing_deployment: Option<BundleDeployment>,
}

/// Resolve the set of namespaces a Bundle is in scope for: its own
/// namespace, plus every namespace whose labels satisfy a
/// `BundleNamespaceMapping.namespaceSelector`, for every mapping whose
/// `bundleSelector` matches this Bundle. Namespaces are de-duplicated and
/// stable-sorted.
pub fn in_scope_namespaces(
    bundle_namespace: &str,
    bundle_labels: &BTreeMap<String, String>,
    mappings: &[BundleNamespaceMapping],
    namespace_labels: &BTreeMap<String, BTreeMap<String, String>>,
) -> Vec<String> {
    let mut namespaces: Vec<String> = vec![bundle_namespace.to_string()];

    for mapping in mappings {
        if !selector_matches(mapping.spec.bundle_selector.as_ref(), bundle_labels) {
            continue;
        }
        for (ns, labels) in namespace_labels {
            if selector_matches(mapping.spec.namespace_selector.as_ref(), labels) {
                namespaces.push(ns.clone());
            }
        }
    }

    namespaces.sort();
    namespaces.dedup();
    namespaces
}

/// Cluster-label injection and templating. `disable_pre_process`
/// toggles legacy substitution off, leaving templates literal.
pub fn inject_cluster_labels(values: &BTreeMap<String, Value>, cluster_labels: &BTreeMap<String, String>, cluster_annotations: &BTreeMap<String, String>, disable_pre_process: bool) -> FleetResult<BTreeMap<String, Value>> {
    if disable_pre_process {
        return Ok(values.clone());
    }

    let mut rendered = BTreeMap::new();
    for (k, v) in values {
        rendered.insert(k.clone(), render_value(v, cluster_labels, cluster_annotations)?);
    }

    let mut global = tera::Context::new();
    let _ = &mut global;
    let mut fleet_obj = serde_json::Map::new();
    fleet_obj.insert("clusterLabels".to_string(), labels_to_value(cluster_labels));
    fleet_obj.insert("clusterAnnotations".to_string(), labels_to_value(cluster_annotations));
    let mut global_obj = serde_json::Map::new();
    global_obj.insert("fleet".to_string(), Value::Object(fleet_obj));

    let existing_global = rendered.get("global").cloned().unwrap_or(Value::Object(serde_json::Map::new()));
    let merged_global = merge_json_maps(existing_global, Value::Object(global_obj));
    rendered.insert("global".to_string(), merged_global);

    Ok(rendered)
}

fn labels_to_value(labels: &BTreeMap<String, String>) -> Value {
    Value::Object(labels.iter().map(|(k, v)| (k.clone(), Value::String(v.clone()))).collect())
}

fn merge_json_maps(base: Value, custom: Value) -> Value {
    match (base, custom) {
        (Value::Object(mut base_map), Value::Object(custom_map)) => {
            for (k, v) in custom_map {
                let merged = match base_map.remove(&k) {
                    Some(existing) => merge_json_maps(existing, v),
                    None => v,
                };
                base_map.insert(k, merged);
            }
            Value::Object(base_map)
        }
        (_, custom) => custom,
    }
}

fn render_value(value: &Value, cluster_labels: &BTreeMap<String, String>, cluster_annotations: &BTreeMap<String, String>) -> FleetResult<Value> {
    match value {
        Value::String(s) => render_string(s, cluster_labels, cluster_annotations),
        Value::Object(map) => {
            let mut out = serde_json::Map::new();
            for (k, v) in map {
                out.insert(k.clone(), render_value(v, cluster_labels, cluster_annotations)?);
            }
            Ok(Value::Object(out))
        }
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(render_value(item, cluster_labels, cluster_annotations)?);
            }
            Ok(Value::Array(out))
        }
        other => Ok(other.clone()),
    }
}

fn render_string(s: &str, cluster_labels: &BTreeMap<String, String>, cluster_annotations: &BTreeMap<String, String>) -> FleetResult<Value> {
    const PREFIX: &str = "global.fleet.clusterLabels.";
    if let Some(key) = s.strip_prefix(PREFIX) {
        return cluster_labels
            .get(key)
            .map(|v| Value::String(v.clone()))
            .ok_or_else(|| FleetError::Validation(format!("cluster label '{key}' referenced by '{s}' is not set on this cluster")));
    }

    if s.contains("{{") && s.contains("}}") {
        let mut ctx = tera::Context::new();
        let mut fleet = serde_json::Map::new();
        fleet.insert("clusterLabels".to_string(), labels_to_value(cluster_labels));
        fleet.insert("clusterAnnotations".to_string(), labels_to_value(cluster_annotations));
        let mut global = serde_json::Map::new();
        global.insert("fleet".to_string(), Value::Object(fleet));
        ctx.insert("global", &Value::Object(global));

        match tera::Tera::one_off(s, &ctx, false) {
            Ok(rendered) => return Ok(Value::String(rendered)),
            Err(e) => {
                tracing::warn!(template = %s, error = %e, "cluster-label template render failed, leaving literal");
                return Ok(Value::String(s.to_string()));
            }
        }
    }

    Ok(Value::String(s.to_string()))
}

/// Fold existing BundleDeployments into a lookup by cluster namespace, so
/// the planner can attach `Target.existing_deployment`.
pub fn index_existing_by_cluster_namespace(deployments: &[BundleDeployment]) -> BTreeMap<String, BundleDeployment> {
    deployments
        .iter()
        .filter_map(|bd| bd.metadata.namespace.clone().map(|ns| (ns, bd.clone())))
        .collect()
}

/// Run the full planning pipeline for one Bundle against the provided
/// cluster inventory (already filtered to in-scope namespaces by the
/// caller via `in_scope_namespaces`).
pub fn plan(bundle: &Bundle, manifest: &Manifest, clusters: &[ClusterWithGroups], existing: &BTreeMap<String, BundleDeployment>) -> Vec<Target> {
    let matcher = BundleMatcher::new(&bundle.spec.targets, &bundle.spec.target_restrictions);
    let mut targets = Vec::new();

    for cluster in clusters {
        let groups: Vec<GroupView> = cluster
            .groups
            .iter()
            .map(|g| GroupView {
                name: g.metadata.name.clone().unwrap_or_default(),
                labels: g.metadata.labels.clone().unwrap_or_default().into_iter().collect(),
            })
            .collect();

        let Some(matched) = matcher.match_cluster(cluster.name(), &groups, cluster.labels()) else { continue };

        let merged = merge_target_options(bundle, matched, cluster);
        let deployment_id = options::deployment_id(&manifest.digest, &merged);

        targets.push(Target {
            cluster_name: cluster.name().to_string(),
            cluster_namespace: cluster.namespace().to_string(),
            cluster_labels: cluster.labels().clone(),
            group_names: cluster.group_names().into_iter().map(str::to_string).collect(),
            matched_target_name: matched.name.clone(),
            merged_options: merged,
            deployment_id,
            existing_deployment: existing.get(cluster.namespace()).cloned(),
        });
    }

    targets.sort_by(|a, b| a.cluster_name.cmp(&b.cluster_name));
    targets
}

fn merge_target_options(bundle: &Bundle, matched: &BundleTarget, cluster: &ClusterWithGroups) -> BundleDeploymentOptions {
    let mut merged = options::merge(&bundle.spec.options, &matched.options);

    let cluster_labels = cluster.labels().clone();
    let cluster_annotations: BTreeMap<String, String> = BTreeMap::new();
    match inject_cluster_labels(&merged.helm.values, &cluster_labels, &cluster_annotations, merged.helm.disable_pre_process) {
        Ok(injected) => merged.helm.values = injected,
        Err(e) => {
            tracing::warn!(cluster = cluster.name(), error = %e, "cluster label injection failed, leaving values untemplated");
        }
    }

    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crds::bundle::{BundleSpec, BundleTarget};
    use crate::crds::cluster::{Cluster, ClusterSpec};
    use kube::core::ObjectMeta;

    fn cluster_with_groups(name: &str, namespace: &str, labels: BTreeMap<String, String>) -> ClusterWithGroups {
        ClusterWithGroups {
            cluster: Cluster {
                metadata: ObjectMeta { name: Some(name.to_string()), namespace: Some(namespace.to_string()), ..Default::default() },
                spec: ClusterSpec { labels, agent_ref_secret_name: None, paused: false },
                status: None,
            },
            groups: vec![],
        }
    }

    fn bundle_with_target(target: BundleTarget) -> Bundle {
        Bundle {
            metadata: ObjectMeta { name: Some("b1".to_string()), namespace: Some("default".to_string()), ..Default::default() },
            spec: BundleSpec {
                resources: vec![],
                options: BundleDeploymentOptions::default(),
                targets: vec![target],
                target_restrictions: vec![],
                rollout: Default::default(),
                depends_on: vec![],
                keep_resources: false,
                paused: false,
                helm_op_options: None,
            },
            status: None,
        }
    }

    #[test]
    fn scenario_s1_single_matching_cluster_produces_one_target() {
        let target = BundleTarget { name: "t1".to_string(), cluster_name: Some("local".to_string()), ..Default::default() };
        let bundle = bundle_with_target(target);
        let manifest = crate::content::decode_resources(&[crate::crds::bundle::BundleResource {
            name: "svc.yaml".to_string(),
            content: "kind: Service".to_string(),
            encoding: crate::crds::bundle::ResourceEncoding::Plain,
        }])
        .unwrap();
        let clusters = vec![cluster_with_groups("local", "cluster-local-ns", BTreeMap::new())];
        let targets = plan(&bundle, &manifest, &clusters, &BTreeMap::new());
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].cluster_name, "local");
        assert!(targets[0].deployment_id.starts_with(&manifest.digest));
    }

    #[test]
    fn scenario_s2_non_matching_selector_produces_zero_targets() {
        let selector = k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector {
            match_labels: Some(BTreeMap::from([("env".to_string(), "prod".to_string())])),
            match_expressions: None,
        };
        let target = BundleTarget { name: "t1".to_string(), cluster_selector: Some(selector), ..Default::default() };
        let bundle = bundle_with_target(target);
        let manifest = crate::content::decode_resources(&[]).unwrap();
        let clusters = vec![cluster_with_groups("dev1", "cluster-dev1-ns", BTreeMap::from([("env".to_string(), "dev".to_string())]))];
        let targets = plan(&bundle, &manifest, &clusters, &BTreeMap::new());
        assert!(targets.is_empty());
    }

    #[test]
    fn cluster_label_substitution_fails_closed_on_missing_label() {
        let mut values = BTreeMap::new();
        values.insert("region".to_string(), Value::String("global.fleet.clusterLabels.region".to_string()));
        let err = inject_cluster_labels(&values, &BTreeMap::new(), &BTreeMap::new(), false).unwrap_err();
        assert!(matches!(err, FleetError::Validation(_)));
    }

    #[test]
    fn namespace_mapping_adds_scope() {
        let mapping = BundleNamespaceMapping {
            metadata: ObjectMeta::default(),
            spec: crate::crds::bundle_namespace_mapping::BundleNamespaceMappingSpec {
                bundle_selector: None,
                namespace_selector: Some(k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector {
                    match_labels: Some(BTreeMap::from([("team".to_string(), "platform".to_string())])),
                    match_expressions: None,
                }),
            },
        };
        let mut namespace_labels = BTreeMap::new();
        namespace_labels.insert("platform-ns".to_string(), BTreeMap::from([("team".to_string(), "platform".to_string())]));
        let namespaces = in_scope_namespaces("default", &BTreeMap::new(), &[mapping], &namespace_labels);
        assert!(namespaces.contains(&"platform-ns".to_string()));
        assert!(namespaces.contains(&"default".to_string()));
    }
}
