//
// Copyright (C) 2025 Pedro Henrique / phkaiser13
//
// File: src/agent/desired_set.rs
//
// Desired-Set Planner. Tags every desired object with a
// stable setID, classifies Create/Update/Delete against live state, and
// normalizes Update diffs through two composed normalizers before deciding
// whether a drift is real. Kept free of `kube::Api` calls the way
// `rollout.rs` is: the actual dry-run apply and live list happen in
// `agent::runner`, which hands this module plain JSON values.
//
// SPDX-License-Identifier: Apache-2.0
//

use crate::content::ResourceKey;
use crate::crds::bundle::ComparePatch;
use crate::errors::{FleetError, FleetResult};
use serde_json::Value;
use std::collections::{HashMap, HashSet};

/// Identity of the object that owns a desired set — a BundleDeployment, in
/// every caller we have today.
#[derive(Clone, Debug)]
pub struct Owner {
    pub gvk: String,
    pub name: String,
    pub namespace: String,
}

pub fn object_identity(obj: &Value) -> FleetResult<ResourceKey> {
    let api_version = obj
        .get("apiVersion")
        .and_then(Value::as_str)
        .ok_or_else(|| FleetError::Validation("object missing apiVersion".to_string()))?
        .to_string();
    let kind = obj
        .get("kind")
        .and_then(Value::as_str)
        .ok_or_else(|| FleetError::Validation("object missing kind".to_string()))?
        .to_string();
    let metadata = obj.get("metadata").ok_or_else(|| FleetError::Validation("object missing metadata".to_string()))?;
    let name = metadata
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| FleetError::Validation("object missing metadata.name".to_string()))?
        .to_string();
    let namespace = metadata.get("namespace").and_then(Value::as_str).map(str::to_string);
    Ok(ResourceKey { api_version, kind, namespace, name })
}

/// `LabelHash = sha1(concat(id,gvk,name,namespace))` — the rate limiter key.
pub fn label_hash(set_id: &str, gvk: &str, name: &str, namespace: &str) -> String {
    use sha1::{Digest, Sha1};
    let mut hasher = Sha1::new();
    hasher.update(set_id.as_bytes());
    hasher.update(gvk.as_bytes());
    hasher.update(name.as_bytes());
    hasher.update(namespace.as_bytes());
    hasher.finalize().iter().map(|b| format!("{b:02x}")).collect()
}

/// Stamp the `objectset.rio.cattle.io/*` labels/annotations in place, and
/// return the object's identity key.
pub fn tag_object(obj: &mut Value, set_id: &str, owner: &Owner, prune: bool) -> FleetResult<ResourceKey> {
    let key = object_identity(obj)?;
    let gvk = format!("{}, Kind={}", key.api_version, key.kind);
    let hash = label_hash(set_id, &gvk, &key.name, key.namespace.as_deref().unwrap_or_default());

    let metadata = obj
        .get_mut("metadata")
        .and_then(Value::as_object_mut)
        .ok_or_else(|| FleetError::Validation("object missing metadata".to_string()))?;

    let labels = metadata.entry("labels").or_insert_with(|| Value::Object(Default::default()));
    let labels = labels.as_object_mut().ok_or_else(|| FleetError::Validation("metadata.labels is not an object".to_string()))?;
    labels.insert(crate::labels::OBJECTSET_ID.to_string(), Value::String(set_id.to_string()));
    labels.insert(crate::labels::OBJECTSET_HASH.to_string(), Value::String(hash));

    let annotations = metadata.entry("annotations").or_insert_with(|| Value::Object(Default::default()));
    let annotations = annotations.as_object_mut().ok_or_else(|| FleetError::Validation("metadata.annotations is not an object".to_string()))?;
    annotations.insert(crate::labels::OBJECTSET_OWNER_GVK.to_string(), Value::String(owner.gvk.clone()));
    annotations.insert(crate::labels::OBJECTSET_OWNER_NAME.to_string(), Value::String(owner.name.clone()));
    annotations.insert(crate::labels::OBJECTSET_OWNER_NAMESPACE.to_string(), Value::String(owner.namespace.clone()));
    annotations.insert(crate::labels::OBJECTSET_APPLIED.to_string(), Value::String("true".to_string()));
    annotations.insert(crate::labels::OBJECTSET_PRUNE.to_string(), Value::String(prune.to_string()));

    Ok(key)
}

fn compare_patch_matches(patch: &ComparePatch, key: &ResourceKey) -> bool {
    if let Some(av) = &patch.api_version {
        if av != &key.api_version {
            return false;
        }
    }
    if patch.kind != key.kind {
        return false;
    }
    if let Some(ns) = &patch.namespace {
        if Some(ns) != key.namespace.as_ref() {
            return false;
        }
    }
    if let Some(name) = &patch.name {
        if name != &key.name {
            return false;
        }
    }
    true
}

/// ArgoCD-style `ignoreDifferences`: drop the listed JSON pointers from a
/// value before it is diffed. Absence of the pointer is not an error — that
/// is itself "already ignored".
fn apply_ignore_pointers(value: &mut Value, patches: &[ComparePatch], key: &ResourceKey) {
    for p in patches.iter().filter(|p| compare_patch_matches(p, key)) {
        for pointer in &p.json_pointers {
            let op = serde_json::json!([{"op": "remove", "path": pointer}]);
            if let Ok(ops) = serde_json::from_value::<json_patch::Patch>(op) {
                let _ = json_patch::patch(value, &ops);
            }
        }
    }
}

/// User-declared raw JSON-Patch operations, applied to the **live** side
/// before diffing, so a field a webhook or defaulter mutates in place never
/// counts as drift.
fn apply_json_patch_ops(value: &mut Value, patches: &[ComparePatch], key: &ResourceKey) {
    for p in patches.iter().filter(|p| compare_patch_matches(p, key)) {
        if p.operations.is_empty() {
            continue;
        }
        if let Ok(ops) = serde_json::from_value::<json_patch::Patch>(Value::Array(p.operations.clone())) {
            let _ = json_patch::patch(value, &ops);
        }
    }
}

/// RFC 7386 JSON Merge Patch describing how to turn `from` into `to`.
fn compute_merge_patch(from: &Value, to: &Value) -> Value {
    match (from, to) {
        (Value::Object(from_map), Value::Object(to_map)) => {
            let mut patch = serde_json::Map::new();
            for (k, to_v) in to_map {
                match from_map.get(k) {
                    Some(from_v) if from_v == to_v => {}
                    Some(from_v) => {
                        let sub = compute_merge_patch(from_v, to_v);
                        if !is_empty_patch(&sub) {
                            patch.insert(k.clone(), sub);
                        }
                    }
                    None => {
                        patch.insert(k.clone(), to_v.clone());
                    }
                }
            }
            for k in from_map.keys() {
                if !to_map.contains_key(k) {
                    patch.insert(k.clone(), Value::Null);
                }
            }
            Value::Object(patch)
        }
        _ if from == to => Value::Object(Default::default()),
        _ => to.clone(),
    }
}

fn is_empty_patch(patch: &Value) -> bool {
    patch.as_object().map(|m| m.is_empty()).unwrap_or(false)
}

#[derive(Clone, Debug)]
pub struct KeyedPatch {
    pub key: ResourceKey,
    pub merge_patch: Value,
}

#[derive(Clone, Debug, Default)]
pub struct Plan {
    pub create: Vec<Value>,
    pub update: Vec<KeyedPatch>,
    pub delete: Vec<ResourceKey>,
}

/// Classify every desired object against live state, applying both
/// normalizers before deciding whether an Update survives.
///
/// `predicted` is the server's dry-run-apply result per key, keyed the same
/// as `live`; a key absent from `predicted` falls back to the desired
/// object itself (the caller didn't perform a dry-run for it, e.g. in
/// tests).
pub fn classify(desired: Vec<Value>, live: &HashMap<ResourceKey, Value>, predicted: &HashMap<ResourceKey, Value>, prior_release_keys: &HashSet<ResourceKey>, compare_patches: &[ComparePatch]) -> FleetResult<Plan> {
    let mut plan = Plan::default();
    let mut desired_keys = HashSet::new();

    for obj in desired {
        let key = object_identity(&obj)?;
        desired_keys.insert(key.clone());

        match live.get(&key) {
            None => plan.create.push(obj),
            Some(live_obj) => {
                let predicted_obj = predicted.get(&key).unwrap_or(&obj);

                let mut normalized_live = live_obj.clone();
                apply_ignore_pointers(&mut normalized_live, compare_patches, &key);
                apply_json_patch_ops(&mut normalized_live, compare_patches, &key);

                let mut normalized_predicted = predicted_obj.clone();
                apply_ignore_pointers(&mut normalized_predicted, compare_patches, &key);

                let patch = compute_merge_patch(&normalized_live, &normalized_predicted);
                if !is_empty_patch(&patch) {
                    plan.update.push(KeyedPatch { key, merge_patch: patch });
                }
            }
        }
    }

    plan.delete = live.keys().filter(|k| !desired_keys.contains(*k) && prior_release_keys.contains(*k)).cloned().collect();

    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn owner() -> Owner {
        Owner { gvk: "apps/v1, Kind=Deployment".to_string(), name: "my-bd".to_string(), namespace: "fleet-default".to_string() }
    }

    fn svc(name: &str) -> Value {
        json!({"apiVersion": "v1", "kind": "Service", "metadata": {"name": name, "namespace": "default"}})
    }

    #[test]
    fn tag_object_stamps_labels_and_annotations() {
        let mut obj = svc("web");
        let key = tag_object(&mut obj, "s-deadbeef", &owner(), true).unwrap();
        assert_eq!(key.name, "web");
        assert_eq!(obj["metadata"]["labels"][crate::labels::OBJECTSET_ID], "s-deadbeef");
        assert_eq!(obj["metadata"]["annotations"][crate::labels::OBJECTSET_OWNER_NAME], "my-bd");
        assert_eq!(obj["metadata"]["annotations"][crate::labels::OBJECTSET_PRUNE], "true");
    }

    #[test]
    fn label_hash_is_stable_and_distinguishes_identity() {
        let a = label_hash("s-1", "v1, Kind=Service", "web", "default");
        let b = label_hash("s-1", "v1, Kind=Service", "web", "default");
        let c = label_hash("s-1", "v1, Kind=Service", "api", "default");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn new_object_is_a_create() {
        let desired = vec![svc("web")];
        let plan = classify(desired, &HashMap::new(), &HashMap::new(), &HashSet::new(), &[]).unwrap();
        assert_eq!(plan.create.len(), 1);
        assert!(plan.update.is_empty());
    }

    #[test]
    fn unchanged_object_produces_no_update() {
        let obj = svc("web");
        let key = object_identity(&obj).unwrap();
        let mut live = HashMap::new();
        live.insert(key, obj.clone());
        let plan = classify(vec![obj], &live, &HashMap::new(), &HashSet::new(), &[]).unwrap();
        assert!(plan.update.is_empty());
    }

    #[test]
    fn drifted_field_produces_a_merge_patch() {
        let mut live_obj = svc("web");
        live_obj["spec"] = json!({"type": "ClusterIP"});
        let mut predicted_obj = svc("web");
        predicted_obj["spec"] = json!({"type": "NodePort"});

        let key = object_identity(&live_obj).unwrap();
        let mut live = HashMap::new();
        live.insert(key.clone(), live_obj);
        let mut predicted = HashMap::new();
        predicted.insert(key.clone(), predicted_obj);

        let plan = classify(vec![svc("web")], &live, &predicted, &HashSet::new(), &[]).unwrap();
        assert_eq!(plan.update.len(), 1);
        assert_eq!(plan.update[0].merge_patch["spec"]["type"], "NodePort");
    }

    #[test]
    fn scenario_replica_drift_produces_a_restoring_patch() {
        let mut live_obj = json!({"apiVersion": "apps/v1", "kind": "Deployment", "metadata": {"name": "web", "namespace": "default"}, "spec": {"replicas": 5}});
        let desired_obj = json!({"apiVersion": "apps/v1", "kind": "Deployment", "metadata": {"name": "web", "namespace": "default"}, "spec": {"replicas": 3}});

        let key = object_identity(&live_obj).unwrap();
        let mut live = HashMap::new();
        live.insert(key.clone(), std::mem::take(&mut live_obj));

        let plan = classify(vec![desired_obj], &live, &HashMap::new(), &HashSet::new(), &[]).unwrap();
        assert_eq!(plan.update.len(), 1);
        assert_eq!(plan.update[0].key, key);
        assert_eq!(plan.update[0].merge_patch["spec"]["replicas"], 3);
    }

    #[test]
    fn ignored_pointer_suppresses_the_drift() {
        let mut live_obj = svc("web");
        live_obj["spec"] = json!({"type": "ClusterIP", "clusterIP": "10.0.0.1"});
        let mut predicted_obj = svc("web");
        predicted_obj["spec"] = json!({"type": "ClusterIP", "clusterIP": "10.0.0.2"});

        let key = object_identity(&live_obj).unwrap();
        let mut live = HashMap::new();
        live.insert(key.clone(), live_obj);
        let mut predicted = HashMap::new();
        predicted.insert(key.clone(), predicted_obj);

        let ignore = ComparePatch { api_version: None, kind: "Service".to_string(), namespace: None, name: None, json_pointers: vec!["/spec/clusterIP".to_string()], operations: vec![] };
        let plan = classify(vec![svc("web")], &live, &predicted, &HashSet::new(), std::slice::from_ref(&ignore)).unwrap();
        assert!(plan.update.is_empty());
    }

    #[test]
    fn delete_only_retained_for_prior_release_keys() {
        let stale_owned = svc("old-owned");
        let stale_foreign = svc("old-foreign");
        let owned_key = object_identity(&stale_owned).unwrap();
        let foreign_key = object_identity(&stale_foreign).unwrap();

        let mut live = HashMap::new();
        live.insert(owned_key.clone(), stale_owned);
        live.insert(foreign_key, stale_foreign);

        let mut prior = HashSet::new();
        prior.insert(owned_key.clone());

        let plan = classify(vec![], &live, &HashMap::new(), &prior, &[]).unwrap();
        assert_eq!(plan.delete, vec![owned_key]);
    }
}
