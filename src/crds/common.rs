//
// Copyright (C) 2025 Pedro Henrique / phkaiser13
//
// File: src/crds/common.rs
//
// Shared substructures used across every Fleet custom resource: the
// `Condition` type common to every status struct, label selectors, and
// object references.
//
// SPDX-License-Identifier: Apache-2.0
//

use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector as K8sLabelSelector;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A richer status condition than a bare `{type, message}` pair: carries a
/// tri-state status, a short machine reason, and a transition timestamp, so
/// reconcilers can distinguish "still true" from "just flipped" without
/// re-deriving it from message text.
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: ConditionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<String>,
}

impl Condition {
    pub fn ready(ok: bool, message: impl Into<String>) -> Self {
        Self {
            type_: "Ready".to_string(),
            status: if ok { ConditionStatus::True } else { ConditionStatus::False },
            reason: None,
            message: Some(message.into()),
            last_transition_time: Some(chrono::Utc::now().to_rfc3339()),
        }
    }

    pub fn new(type_: impl Into<String>, ok: bool, reason: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            type_: type_.into(),
            status: if ok { ConditionStatus::True } else { ConditionStatus::False },
            reason: Some(reason.into()),
            message: Some(message.into()),
            last_transition_time: Some(chrono::Utc::now().to_rfc3339()),
        }
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    True,
    False,
    Unknown,
}

/// Merge `new` conditions into `existing` by `type_`, preserving any
/// condition already present but not mentioned in `new` (so a reconciler
/// that only knows about `Accepted` never clobbers `Ready`).
pub fn merge_conditions(existing: &mut Vec<Condition>, new: Vec<Condition>) {
    for cond in new {
        if let Some(slot) = existing.iter_mut().find(|c| c.type_ == cond.type_) {
            if *slot != cond {
                *slot = cond;
            }
        } else {
            existing.push(cond);
        }
    }
}

/// A `(namespace, name)` reference to another object, used by `BundleRef`,
/// ownership labels, and cross-resource lookups.
#[derive(Deserialize, Serialize, Clone, Debug, JsonSchema, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "camelCase")]
pub struct ObjectRef {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// Label selector, re-exported in our own `camelCase` shape so CRD schemas
/// read the same whether the selector targets a `Cluster` or a `ClusterGroup`.
pub type LabelSelector = K8sLabelSelector;

/// Evaluate a `LabelSelector` against a label map. `None` selector matches
/// everything (absent predicate passes, per the Bundle Matcher rules).
pub fn selector_matches(selector: Option<&LabelSelector>, labels: &BTreeMap<String, String>) -> bool {
    let Some(selector) = selector else { return true };

    if let Some(match_labels) = &selector.match_labels {
        for (k, v) in match_labels {
            if labels.get(k) != Some(v) {
                return false;
            }
        }
    }

    if let Some(expressions) = &selector.match_expressions {
        for expr in expressions {
            let value = labels.get(&expr.key);
            let ok = match expr.operator.as_str() {
                "In" => value.is_some_and(|v| expr.values.as_ref().is_some_and(|vs| vs.contains(v))),
                "NotIn" => !value.is_some_and(|v| expr.values.as_ref().is_some_and(|vs| vs.contains(v))),
                "Exists" => value.is_some(),
                "DoesNotExist" => value.is_none(),
                _ => false,
            };
            if !ok {
                return false;
            }
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_selector_matches_everything() {
        let labels = BTreeMap::new();
        assert!(selector_matches(None, &labels));
    }

    #[test]
    fn match_labels_requires_exact_value() {
        let mut labels = BTreeMap::new();
        labels.insert("env".to_string(), "prod".to_string());
        let mut match_labels = BTreeMap::new();
        match_labels.insert("env".to_string(), "prod".to_string());
        let selector = LabelSelector {
            match_labels: Some(match_labels),
            match_expressions: None,
        };
        assert!(selector_matches(Some(&selector), &labels));

        labels.insert("env".to_string(), "dev".to_string());
        assert!(!selector_matches(Some(&selector), &labels));
    }

    #[test]
    fn conditions_merge_preserves_unmentioned() {
        let mut existing = vec![Condition::new("Ready", true, "", "ok")];
        merge_conditions(&mut existing, vec![Condition::new("Accepted", false, "Invalid", "bad")]);
        assert_eq!(existing.len(), 2);
        assert!(existing.iter().any(|c| c.type_ == "Ready"));
        assert!(existing.iter().any(|c| c.type_ == "Accepted"));
    }
}
