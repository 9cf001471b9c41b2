//
// Copyright (C) 2025 Pedro Henrique / phkaiser13
//
// File: src/agent/helm_deployer.rs
//
// Helm Deployer. No Helm SDK exists in the Rust ecosystem
// pack, so release history is modeled the way Helm itself stores it: a
// Kubernetes `Secret` per revision, named `sh.helm.release.v1.<name>.v<rev>`,
// type `helm.sh/release.v1` — `agent::runner` is the only caller that reads
// or writes those Secrets via `kube::Api<Secret>`; everything here is pure
// decision logic plus the chart-synthesis/post-render pipeline (themselves
// free of I/O), mirroring how `rollout.rs` keeps the state machine separate
// from the `kube::Api` calls that execute its decisions.
//
// SPDX-License-Identifier: Apache-2.0
//

use crate::agent::desired_set::{self, Owner};
use crate::content::{DecodedResource, Manifest};
use crate::crds::bundle::BundleDeploymentOptions;
use crate::errors::{FleetError, FleetResult};
use kube::{Client, Config};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// First `options.targetNamespace`, else `options.defaultNamespace`, else
/// the agent's own default.
pub fn resolve_namespace(options: &BundleDeploymentOptions, agent_default_namespace: &str) -> String {
    if !options.target_namespace.is_empty() {
        options.target_namespace.clone()
    } else if !options.default_namespace.is_empty() {
        options.default_namespace.clone()
    } else {
        agent_default_namespace.to_string()
    }
}

/// Explicit `options.helm.releaseName`, else `bundleID` truncated to the
/// Kubernetes object-name limit of 53 characters Helm itself observes.
pub fn resolve_release_name(options: &BundleDeploymentOptions, bundle_id: &str) -> String {
    let base = options.helm.release_name.clone().unwrap_or_else(|| bundle_id.to_string());
    base.chars().take(53).collect()
}

#[derive(Clone, Debug)]
pub struct SynthesizedChart {
    pub name: String,
    pub version: String,
    /// Resources living under `chart/templates/`, already remapped from a
    /// `manifests/` prefix where the source used one.
    pub templates: Vec<DecodedResource>,
    /// Raw YAML kept alongside the chart, appended after the template
    /// render rather than run through it.
    pub raw_yaml: Vec<DecodedResource>,
}

fn parse_chart_yaml(manifest: &Manifest) -> Option<(String, String)> {
    let chart_yaml = manifest.resources.iter().find(|r| r.name == "chart/Chart.yaml")?;
    let value: serde_yaml::Value = serde_yaml::from_str(&chart_yaml.content).ok()?;
    let name = value.get("name")?.as_str()?.to_string();
    let version = value.get("version")?.as_str()?.to_string();
    Some((name, version))
}

/// Build the chart object the deploy pipeline renders: an explicit
/// `chart/Chart.yaml` wins; otherwise one is synthesized with name
/// `bundleID` and version `v0.1-<contentDigest>`.
pub fn synthesize_chart(manifest: &Manifest, bundle_id: &str) -> SynthesizedChart {
    let (name, version) = parse_chart_yaml(manifest).unwrap_or_else(|| (bundle_id.to_string(), format!("v0.1-{}", manifest.digest)));

    let mut templates = Vec::new();
    let mut raw_yaml = Vec::new();
    for r in &manifest.resources {
        if r.name == "chart/Chart.yaml" {
            continue;
        }
        if let Some(rest) = r.name.strip_prefix("manifests/") {
            templates.push(DecodedResource { name: format!("chart/templates/{rest}"), content: r.content.clone() });
        } else if r.name.starts_with("chart/") {
            templates.push(r.clone());
        } else {
            raw_yaml.push(r.clone());
        }
    }
    SynthesizedChart { name, version, templates, raw_yaml }
}

/// Whether the chart directory carries a kustomize overlay. Actual
/// kustomize execution has no pure-Rust crate in the pack; detection only,
/// the overlay passes through unrendered.
pub fn has_kustomize_overlay(chart: &SynthesizedChart) -> bool {
    chart.templates.iter().any(|r| r.name.ends_with("kustomize.yaml"))
}

#[derive(Clone, Debug)]
pub struct ChartAnnotations {
    pub bundle_id: String,
    pub agent_namespace: String,
    pub service_account: String,
    pub commit: Option<String>,
}

pub fn chart_annotations(bundle_id: &str, agent_namespace: &str, options: &BundleDeploymentOptions, commit: Option<&str>) -> ChartAnnotations {
    let service_account = if options.service_account.is_empty() { "fleet-default".to_string() } else { options.service_account.clone() };
    ChartAnnotations { bundle_id: bundle_id.to_string(), agent_namespace: agent_namespace.to_string(), service_account, commit: commit.map(str::to_string) }
}

/// The impersonated identity string a kubeconfig's `Impersonate` field
/// should carry when `options.serviceAccount` requests impersonation
/// instead of the pod's own credentials.
pub fn impersonated_identity(annotations: &ChartAnnotations) -> String {
    format!("system:serviceaccount:{}:{}", annotations.agent_namespace, annotations.service_account)
}

/// Builds a `Client` impersonating `identity` (a `system:serviceaccount:ns:name`
/// string), scoped to `annotations.agent_namespace`, so every object this
/// deployment creates, updates or deletes is attributed to the BundleDeployment's
/// own service account rather than the agent pod's.
pub async fn impersonating_client(identity: &str, namespace: &str) -> FleetResult<Client> {
    let mut config = Config::infer().await.map_err(|e| FleetError::External(format!("failed to load kube config for impersonation: {e}")))?;
    config.default_namespace = namespace.to_string();
    config.auth_info.impersonate = Some(identity.to_string());
    Client::try_from(config).map_err(|e| FleetError::External(format!("failed to build impersonating client for {identity}: {e}")))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReleaseStatus {
    Deployed,
    Uninstalling,
    Uninstalled,
    Failed,
    Superseded,
}

/// One revision of release history, the payload stored in a
/// `sh.helm.release.v1.<name>.v<rev>` Secret.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReleaseRecord {
    pub name: String,
    pub version: u32,
    pub namespace: String,
    pub status: ReleaseStatus,
    pub content_digest: String,
    pub chart_version: String,
}

pub fn release_secret_name(release_name: &str, revision: u32) -> String {
    format!("sh.helm.release.v1.{release_name}.v{revision}")
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeployAction {
    Install,
    Upgrade,
    /// The previous revision never finished uninstalling; finish that
    /// first, then install fresh.
    UninstallThenInstall,
}

pub fn decide_action(history: &[ReleaseRecord]) -> DeployAction {
    match history.iter().max_by_key(|r| r.version) {
        None => DeployAction::Install,
        Some(latest) if latest.status == ReleaseStatus::Uninstalling => DeployAction::UninstallThenInstall,
        Some(_) => DeployAction::Upgrade,
    }
}

/// `max(options.helm.maxHistory, 10)`.
pub fn history_cap(options_max_history: i64) -> usize {
    (options_max_history.max(0) as usize).max(10)
}

/// Append a new revision and prune the oldest entries past `cap`.
pub fn record_release(history: &mut Vec<ReleaseRecord>, record: ReleaseRecord, cap: usize) {
    history.push(record);
    history.sort_by_key(|r| r.version);
    if history.len() > cap {
        let excess = history.len() - cap;
        history.drain(0..excess);
    }
}

const CLUSTER_SCOPED_KINDS: &[&str] =
    &["Namespace", "ClusterRole", "ClusterRoleBinding", "CustomResourceDefinition", "PersistentVolume", "StorageClass", "Node", "APIService", "PriorityClass"];

fn is_cluster_scoped(kind: &str) -> bool {
    CLUSTER_SCOPED_KINDS.contains(&kind)
}

fn parse_yaml_docs(content: &str) -> FleetResult<Vec<Value>> {
    let mut objects = Vec::new();
    for doc in serde_yaml::Deserializer::from_str(content) {
        let value = Value::deserialize(doc).map_err(|e| FleetError::Validation(format!("invalid rendered resource: {e}")))?;
        if !value.is_null() {
            objects.push(value);
        }
    }
    Ok(objects)
}

/// PostRenderer: reject cluster-scoped objects when a
/// `targetNamespace` is set, rewrite namespace when one is set, then tag
/// every object with the Fleet setID.
pub fn post_render(chart: &SynthesizedChart, options: &BundleDeploymentOptions, set_id: &str, owner: &Owner) -> FleetResult<Vec<Value>> {
    let mut objects = Vec::new();
    for resource in chart.templates.iter().chain(chart.raw_yaml.iter()) {
        objects.extend(parse_yaml_docs(&resource.content)?);
    }

    let prune = !options.keep_resources;
    for obj in &mut objects {
        let kind = obj.get("kind").and_then(Value::as_str).unwrap_or_default().to_string();
        if !options.target_namespace.is_empty() {
            if is_cluster_scoped(&kind) {
                return Err(FleetError::Validation(format!("cluster-scoped object {kind} cannot be deployed with targetNamespace set; use defaultNamespace instead")));
            }
            if let Some(metadata) = obj.get_mut("metadata").and_then(Value::as_object_mut) {
                metadata.insert("namespace".to_string(), Value::String(options.target_namespace.clone()));
            }
        }
        desired_set::tag_object(obj, set_id, owner, prune)?;
    }
    Ok(objects)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeleteAction {
    /// Remove the release history Secrets only; resources stay on the
    /// cluster untouched.
    ForgetOnly,
    /// Run a full uninstall: delete history Secrets and the tracked
    /// resources.
    Uninstall,
}

/// "Never uninstall the fleet-agent, just forget it" — resolved via
/// `BundleDeploymentOptions::agent_self_managed`.
pub fn decide_delete_action(options: &BundleDeploymentOptions) -> DeleteAction {
    if options.agent_self_managed || options.keep_resources {
        DeleteAction::ForgetOnly
    } else {
        DeleteAction::Uninstall
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crds::bundle::HelmOptions;

    fn manifest(resources: Vec<(&str, &str)>) -> Manifest {
        let resources = resources.into_iter().map(|(n, c)| DecodedResource { name: n.to_string(), content: c.to_string() }).collect();
        let m = Manifest { resources, digest: String::new() };
        Manifest { digest: m.compute_digest(), ..m }
    }

    #[test]
    fn namespace_prefers_target_over_default() {
        let options = BundleDeploymentOptions { target_namespace: "prod".to_string(), default_namespace: "staging".to_string(), ..Default::default() };
        assert_eq!(resolve_namespace(&options, "fleet-default"), "prod");
    }

    #[test]
    fn namespace_falls_back_to_agent_default() {
        let options = BundleDeploymentOptions::default();
        assert_eq!(resolve_namespace(&options, "fleet-default"), "fleet-default");
    }

    #[test]
    fn release_name_truncates_to_53_chars() {
        let long_id = "s-".to_string() + &"a".repeat(80);
        let options = BundleDeploymentOptions::default();
        let name = resolve_release_name(&options, &long_id);
        assert_eq!(name.len(), 53);
    }

    #[test]
    fn release_name_prefers_explicit_option() {
        let options = BundleDeploymentOptions { helm: HelmOptions { release_name: Some("my-release".to_string()), ..Default::default() }, ..Default::default() };
        assert_eq!(resolve_release_name(&options, "s-whatever"), "my-release");
    }

    #[test]
    fn synthesize_chart_defaults_name_and_version_when_no_chart_yaml() {
        let m = manifest(vec![("manifests/svc.yaml", "kind: Service")]);
        let chart = synthesize_chart(&m, "my-bundle");
        assert_eq!(chart.name, "my-bundle");
        assert!(chart.version.starts_with("v0.1-"));
        assert_eq!(chart.templates[0].name, "chart/templates/svc.yaml");
    }

    #[test]
    fn synthesize_chart_uses_explicit_chart_yaml() {
        let m = manifest(vec![("chart/Chart.yaml", "name: real-chart\nversion: 2.1.0"), ("chart/templates/svc.yaml", "kind: Service")]);
        let chart = synthesize_chart(&m, "my-bundle");
        assert_eq!(chart.name, "real-chart");
        assert_eq!(chart.version, "2.1.0");
    }

    #[test]
    fn decide_action_installs_with_no_history() {
        assert_eq!(decide_action(&[]), DeployAction::Install);
    }

    #[test]
    fn decide_action_upgrades_over_deployed_release() {
        let history = vec![ReleaseRecord { name: "r".to_string(), version: 1, namespace: "ns".to_string(), status: ReleaseStatus::Deployed, content_digest: "s-a".to_string(), chart_version: "v1".to_string() }];
        assert_eq!(decide_action(&history), DeployAction::Upgrade);
    }

    #[test]
    fn decide_action_finishes_stuck_uninstall_first() {
        let history = vec![ReleaseRecord { name: "r".to_string(), version: 1, namespace: "ns".to_string(), status: ReleaseStatus::Uninstalling, content_digest: "s-a".to_string(), chart_version: "v1".to_string() }];
        assert_eq!(decide_action(&history), DeployAction::UninstallThenInstall);
    }

    #[test]
    fn record_release_prunes_to_cap() {
        let mut history = Vec::new();
        for v in 1..=15u32 {
            record_release(&mut history, ReleaseRecord { name: "r".to_string(), version: v, namespace: "ns".to_string(), status: ReleaseStatus::Deployed, content_digest: format!("s-{v}"), chart_version: "v1".to_string() }, 10);
        }
        assert_eq!(history.len(), 10);
        assert_eq!(history.first().unwrap().version, 6);
        assert_eq!(history.last().unwrap().version, 15);
    }

    #[test]
    fn post_render_rejects_cluster_scoped_with_target_namespace() {
        let chart = SynthesizedChart {
            name: "c".to_string(),
            version: "v1".to_string(),
            templates: vec![DecodedResource { name: "chart/templates/ns.yaml".to_string(), content: "apiVersion: v1\nkind: Namespace\nmetadata:\n  name: x".to_string() }],
            raw_yaml: vec![],
        };
        let options = BundleDeploymentOptions { target_namespace: "prod".to_string(), ..Default::default() };
        let owner = Owner { gvk: "g".to_string(), name: "n".to_string(), namespace: "ns".to_string() };
        assert!(post_render(&chart, &options, "s-x", &owner).is_err());
    }

    #[test]
    fn post_render_rewrites_namespace_and_tags_objects() {
        let chart = SynthesizedChart {
            name: "c".to_string(),
            version: "v1".to_string(),
            templates: vec![DecodedResource { name: "chart/templates/svc.yaml".to_string(), content: "apiVersion: v1\nkind: Service\nmetadata:\n  name: web\n  namespace: default".to_string() }],
            raw_yaml: vec![],
        };
        let options = BundleDeploymentOptions { target_namespace: "prod".to_string(), ..Default::default() };
        let owner = Owner { gvk: "g".to_string(), name: "n".to_string(), namespace: "ns".to_string() };
        let objects = post_render(&chart, &options, "s-x", &owner).unwrap();
        assert_eq!(objects[0]["metadata"]["namespace"], "prod");
        assert_eq!(objects[0]["metadata"]["labels"][crate::labels::OBJECTSET_ID], "s-x");
    }

    #[test]
    fn delete_action_is_forget_only_for_self_managed_agent() {
        let options = BundleDeploymentOptions { agent_self_managed: true, ..Default::default() };
        assert_eq!(decide_delete_action(&options), DeleteAction::ForgetOnly);
    }

    #[test]
    fn delete_action_is_forget_only_when_keep_resources_set() {
        let options = BundleDeploymentOptions { keep_resources: true, ..Default::default() };
        assert_eq!(decide_delete_action(&options), DeleteAction::ForgetOnly);
    }

    #[test]
    fn delete_action_uninstalls_by_default() {
        let options = BundleDeploymentOptions::default();
        assert_eq!(decide_delete_action(&options), DeleteAction::Uninstall);
    }
}
