//
// Copyright (C) 2025 Pedro Henrique / phkaiser13
//
// File: src/agent/drift_monitor.rs
//
// Drift Monitor. Turns a desired-set Plan plus live cluster state into a
// BundleDeploymentStatus: readiness per object (a small per-kind
// summarizer, the way kstatus composes a generic summarizer with
// domain-specific ones for Pods/Deployments/Services), the modified list
// from the desired-set classification, and the merged Ready condition.
// Pure: given the desired objects and a snapshot of live state, no
// `kube::Api` calls.
//
// SPDX-License-Identifier: Apache-2.0
//

use crate::agent::desired_set::{self, Plan};
use crate::content::ResourceKey;
use crate::crds::bundle_deployment::{AppliedResource, BundleDeploymentStatus, ModifiedStatus, NonReadyStatus, MAX_STATUS_ENTRIES};
use crate::crds::common::{merge_conditions, Condition, ConditionStatus};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};

/// A condition is ignored when every key present in an `ignoreOptions`
/// entry equals the live condition's own value.
fn should_ignore_condition(condition: &BTreeMap<String, String>, ignore_entries: &[BTreeMap<String, String>]) -> bool {
    ignore_entries.iter().any(|entry| entry.iter().all(|(k, v)| condition.get(k) == Some(v)))
}

fn extract_conditions(obj: &Value) -> Vec<BTreeMap<String, String>> {
    obj.pointer("/status/conditions")
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(|c| c.as_object())
                .map(|c| c.iter().filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string()))).collect())
                .collect()
        })
        .unwrap_or_default()
}

struct Readiness {
    ready: bool,
    message: String,
}

fn replicas_ready(obj: &Value, ready_field: &str) -> Readiness {
    let desired = obj.pointer("/spec/replicas").and_then(Value::as_i64).unwrap_or(1);
    let ready = obj.pointer(&format!("/status/{ready_field}")).and_then(Value::as_i64).unwrap_or(0);
    let kind = obj.get("kind").and_then(Value::as_str).unwrap_or("resource");
    Readiness { ready: ready >= desired, message: format!("{kind} has {ready}/{desired} ready replicas") }
}

fn pod_ready(obj: &Value, ignore_conditions: &[BTreeMap<String, String>]) -> Readiness {
    let phase = obj.pointer("/status/phase").and_then(Value::as_str).unwrap_or("Pending");
    if phase == "Succeeded" {
        return Readiness { ready: true, message: "pod succeeded".to_string() };
    }
    let conditions = extract_conditions(obj).into_iter().filter(|c| !should_ignore_condition(c, ignore_conditions));
    let ready_condition = conditions.into_iter().find(|c| c.get("type").map(String::as_str) == Some("Ready"));
    let ready = phase == "Running" && ready_condition.as_ref().and_then(|c| c.get("status")).map(String::as_str) == Some("True");
    Readiness { ready, message: format!("pod is {phase}") }
}

fn job_ready(obj: &Value) -> Readiness {
    let succeeded = obj.pointer("/status/succeeded").and_then(Value::as_i64).unwrap_or(0);
    let completions = obj.pointer("/spec/completions").and_then(Value::as_i64).unwrap_or(1);
    Readiness { ready: succeeded >= completions, message: format!("job has {succeeded}/{completions} completions") }
}

/// Generic kstatus-style fallback: look for a `Ready`/`Available` condition;
/// resources without a status subresource at all (ConfigMap, Secret, RBAC)
/// are considered ready as soon as they exist.
fn generic_ready(obj: &Value, ignore_conditions: &[BTreeMap<String, String>]) -> Readiness {
    let conditions = extract_conditions(obj);
    if conditions.is_empty() {
        return Readiness { ready: true, message: "no status conditions reported".to_string() };
    }
    let relevant = conditions.into_iter().filter(|c| !should_ignore_condition(c, ignore_conditions)).find(|c| matches!(c.get("type").map(String::as_str), Some("Ready") | Some("Available")));
    match relevant {
        Some(c) if c.get("status").map(String::as_str) == Some("True") => Readiness { ready: true, message: "ready".to_string() },
        Some(c) => Readiness { ready: false, message: c.get("message").cloned().unwrap_or_else(|| format!("condition {} not satisfied", c.get("type").cloned().unwrap_or_default())) },
        None => Readiness { ready: true, message: "ready".to_string() },
    }
}

fn summarize_readiness(obj: &Value, ignore_conditions: &[BTreeMap<String, String>]) -> Readiness {
    match obj.get("kind").and_then(Value::as_str).unwrap_or_default() {
        "Pod" => pod_ready(obj, ignore_conditions),
        "Deployment" | "StatefulSet" | "ReplicaSet" => replicas_ready(obj, "readyReplicas"),
        "DaemonSet" => replicas_ready(obj, "numberReady"),
        "Job" => job_ready(obj),
        _ => generic_ready(obj, ignore_conditions),
    }
}

/// Walk every object the bundle deployment desires, summarizing the live
/// counterpart's readiness (an object not yet applied is reported
/// not-ready: "waiting to be created").
pub fn compute_non_ready(desired: &[Value], live_objects: &HashMap<ResourceKey, Value>, ignore_conditions: &[BTreeMap<String, String>]) -> Vec<NonReadyStatus> {
    let mut entries = Vec::new();
    for obj in desired {
        let Ok(key) = desired_set::object_identity(obj) else { continue };
        let readiness = match live_objects.get(&key) {
            Some(live) => summarize_readiness(live, ignore_conditions),
            None => Readiness { ready: false, message: "waiting to be created".to_string() },
        };
        if !readiness.ready {
            let uid = live_objects.get(&key).and_then(|o| o.pointer("/metadata/uid")).and_then(Value::as_str).unwrap_or_default().to_string();
            entries.push(NonReadyStatus { uid, api_version: key.api_version, kind: key.kind, namespace: key.namespace, name: key.name, summary: readiness.message });
        }
    }
    entries.sort_by(|a, b| a.uid.cmp(&b.uid));
    entries.truncate(MAX_STATUS_ENTRIES);
    entries
}

/// Build the `modified[]` list directly from the 4.H classification:
/// creates, deletes, and the surviving post-normalization updates.
pub fn compute_modified(plan: &Plan, all_live_keys: &HashSet<ResourceKey>) -> Vec<ModifiedStatus> {
    let mut modified = Vec::new();

    for obj in &plan.create {
        if let Ok(key) = desired_set::object_identity(obj) {
            let exist = all_live_keys.contains(&key);
            modified.push(ModifiedStatus { api_version: key.api_version, kind: key.kind, namespace: key.namespace, name: key.name, create: true, delete: false, exist, patch: None });
        }
    }
    for key in &plan.delete {
        modified.push(ModifiedStatus { api_version: key.api_version.clone(), kind: key.kind.clone(), namespace: key.namespace.clone(), name: key.name.clone(), create: false, delete: true, exist: true, patch: None });
    }
    for update in &plan.update {
        modified.push(ModifiedStatus {
            api_version: update.key.api_version.clone(),
            kind: update.key.kind.clone(),
            namespace: update.key.namespace.clone(),
            name: update.key.name.clone(),
            create: false,
            delete: false,
            exist: true,
            patch: Some(update.merge_patch.to_string()),
        });
    }

    modified.sort_by(|a, b| (&a.api_version, &a.kind, &a.namespace, &a.name).cmp(&(&b.api_version, &b.kind, &b.namespace, &b.name)));
    modified.truncate(MAX_STATUS_ENTRIES);
    modified
}

pub fn resources_from_desired(desired: &[Value], live_objects: &HashMap<ResourceKey, Value>) -> Vec<AppliedResource> {
    desired
        .iter()
        .filter_map(|obj| {
            let key = desired_set::object_identity(obj).ok()?;
            let created_at = live_objects.get(&key).and_then(|o| o.pointer("/metadata/creationTimestamp")).and_then(Value::as_str).map(str::to_string);
            Some(AppliedResource { api_version: key.api_version, kind: key.kind, namespace: key.namespace, name: key.name, created_at })
        })
        .collect()
}

/// A deployment in flight, or one whose last install already failed,
/// mustn't have its status overwritten.
pub fn should_skip_update(spec_deployment_id: &str, status: &BundleDeploymentStatus) -> bool {
    if status.applied_deployment_id.as_deref() != Some(spec_deployment_id) {
        return true;
    }
    status.conditions.iter().any(|c| c.type_ == "Installed" && c.status == ConditionStatus::False)
}

pub struct UpdateStatusInput<'a> {
    pub desired: &'a [Value],
    pub plan: &'a Plan,
    pub live_objects: &'a HashMap<ResourceKey, Value>,
    pub all_live_keys: &'a HashSet<ResourceKey>,
    pub ignore_conditions: &'a [BTreeMap<String, String>],
    pub force_sync_generation: i64,
}

/// `UpdateStatus(bd, resources)`: the full pure computation, assuming the
/// caller already checked `should_skip_update`.
pub fn update_status(mut status: BundleDeploymentStatus, input: UpdateStatusInput) -> BundleDeploymentStatus {
    let non_ready = compute_non_ready(input.desired, input.live_objects, input.ignore_conditions);
    let modified = compute_modified(input.plan, input.all_live_keys);

    status.ready = non_ready.is_empty();
    status.non_modified = modified.is_empty();
    status.resources = resources_from_desired(input.desired, input.live_objects);
    status.sync_generation = input.force_sync_generation;

    let message = non_ready
        .first()
        .map(|n| n.summary.clone())
        .or_else(|| modified.first().map(|m| format!("{} {}/{} out of sync", m.kind, m.namespace.clone().unwrap_or_default(), m.name)))
        .unwrap_or_else(|| "up to date".to_string());
    let overall_ready = status.ready && status.non_modified;

    status.non_ready_status = non_ready;
    status.modified_status = modified;
    merge_conditions(&mut status.conditions, vec![Condition::ready(overall_ready, message)]);
    status
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::desired_set::KeyedPatch;
    use serde_json::json;

    fn key(name: &str) -> ResourceKey {
        ResourceKey { api_version: "apps/v1".to_string(), kind: "Deployment".to_string(), namespace: Some("default".to_string()), name: name.to_string() }
    }

    fn deployment(name: &str) -> Value {
        json!({"apiVersion": "apps/v1", "kind": "Deployment", "metadata": {"name": name, "namespace": "default"}, "spec": {"replicas": 2}})
    }

    #[test]
    fn missing_condition_ignore_entry_keeps_condition_relevant() {
        let cond = BTreeMap::from([("type".to_string(), "Ready".to_string()), ("status".to_string(), "False".to_string())]);
        assert!(!should_ignore_condition(&cond, &[BTreeMap::from([("type".to_string(), "Initialized".to_string())])]));
    }

    #[test]
    fn ignore_entry_matches_on_subset_of_keys() {
        let cond = BTreeMap::from([("type".to_string(), "DiskPressure".to_string()), ("status".to_string(), "Unknown".to_string())]);
        assert!(should_ignore_condition(&cond, &[BTreeMap::from([("type".to_string(), "DiskPressure".to_string())])]));
    }

    #[test]
    fn deployment_with_insufficient_ready_replicas_is_not_ready() {
        let mut live = deployment("web");
        live["status"] = json!({"readyReplicas": 1});
        let readiness = summarize_readiness(&live, &[]);
        assert!(!readiness.ready);
    }

    #[test]
    fn deployment_fully_ready_reports_ready() {
        let mut live = deployment("web");
        live["status"] = json!({"readyReplicas": 2});
        assert!(summarize_readiness(&live, &[]).ready);
    }

    #[test]
    fn object_not_yet_applied_is_not_ready() {
        let desired = vec![deployment("web")];
        let non_ready = compute_non_ready(&desired, &HashMap::new(), &[]);
        assert_eq!(non_ready.len(), 1);
        assert_eq!(non_ready[0].summary, "waiting to be created");
    }

    #[test]
    fn modified_list_covers_create_update_delete() {
        let plan = Plan {
            create: vec![deployment("new")],
            update: vec![KeyedPatch { key: key("changed"), merge_patch: json!({"spec": {"replicas": 3}}) }],
            delete: vec![key("removed")],
        };
        let modified = compute_modified(&plan, &HashSet::new());
        assert_eq!(modified.len(), 3);
        assert!(modified.iter().any(|m| m.name == "new" && m.create));
        assert!(modified.iter().any(|m| m.name == "changed" && m.patch.is_some()));
        assert!(modified.iter().any(|m| m.name == "removed" && m.delete));
    }

    #[test]
    fn skip_update_when_deployment_in_flight() {
        let status = BundleDeploymentStatus { applied_deployment_id: Some("s-old".to_string()), ..Default::default() };
        assert!(should_skip_update("s-new", &status));
    }

    #[test]
    fn skip_update_when_install_failed() {
        let status = BundleDeploymentStatus {
            applied_deployment_id: Some("s-new".to_string()),
            conditions: vec![Condition::new("Installed", false, "Failed", "boom")],
            ..Default::default()
        };
        assert!(should_skip_update("s-new", &status));
    }

    #[test]
    fn update_proceeds_when_deployment_id_matches_and_installed() {
        let status = BundleDeploymentStatus {
            applied_deployment_id: Some("s-new".to_string()),
            conditions: vec![Condition::new("Installed", true, "Installed", "ok")],
            ..Default::default()
        };
        assert!(!should_skip_update("s-new", &status));
    }
}
