//
// Copyright (C) 2025 Pedro Henrique / phkaiser13
//
// File: src/matcher.rs
//
// Bundle Matcher. Constructed once per Bundle; evaluates cluster/group
// selectors/restrictions against a single cluster and picks at most one
// BundleTarget. Pure: no I/O, no clock.
//
// SPDX-License-Identifier: Apache-2.0
//

use crate::crds::bundle::BundleTarget;
use crate::crds::common::selector_matches;
use std::collections::BTreeMap;

/// One cluster group as the matcher sees it: just a name and its labels.
#[derive(Clone, Debug, Default)]
pub struct GroupView {
    pub name: String,
    pub labels: BTreeMap<String, String>,
}

pub struct BundleMatcher<'a> {
    targets: &'a [BundleTarget],
    restrictions: &'a [BundleTarget],
}

impl<'a> BundleMatcher<'a> {
    pub fn new(targets: &'a [BundleTarget], restrictions: &'a [BundleTarget]) -> Self {
        Self { targets, restrictions }
    }

    /// Evaluate every configured predicate on a single target against one
    /// cluster. An absent predicate passes.
    fn target_matches(target: &BundleTarget, cluster_name: &str, groups: &[GroupView], cluster_labels: &BTreeMap<String, String>) -> bool {
        if let Some(name) = &target.cluster_name {
            if name != cluster_name {
                return false;
            }
        }
        if let Some(group) = &target.cluster_group {
            if !groups.iter().any(|g| &g.name == group) {
                return false;
            }
        }
        if let Some(selector) = &target.cluster_group_selector {
            if !groups.iter().any(|g| selector_matches(Some(selector), &g.labels)) {
                return false;
            }
        }
        if let Some(selector) = &target.cluster_selector {
            if !selector_matches(Some(selector), cluster_labels) {
                return false;
            }
        }
        true
    }

    /// Returns the first matching, non-restricted target, iterating
    /// `targets` in declaration order. `groups` is the set of ClusterGroups
    /// the cluster belongs to; pass an empty slice when the caller has no
    /// group information — matching then proceeds against a single
    /// implicit empty group.
    pub fn match_cluster(&self, cluster_name: &str, groups: &[GroupView], cluster_labels: &BTreeMap<String, String>) -> Option<&'a BundleTarget> {
        let default_groups = [GroupView::default()];
        let groups = if groups.is_empty() { &default_groups[..] } else { groups };

        for target in self.targets {
            if !Self::target_matches(target, cluster_name, groups, cluster_labels) {
                continue;
            }
            if !self.restrictions.is_empty() {
                let restricted = self
                    .restrictions
                    .iter()
                    .any(|r| Self::target_matches(r, cluster_name, groups, cluster_labels));
                if !restricted {
                    continue;
                }
            }
            return Some(target);
        }
        None
    }

    /// `MatchForTarget(name)`: returns the named target irrespective of its
    /// predicates, used by CLI dry-run (out of scope here, kept for parity
    /// with the upstream interface the planner also calls into).
    pub fn match_for_target(&self, name: &str) -> Option<&'a BundleTarget> {
        self.targets.iter().find(|t| t.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(name: &str, cluster_name: Option<&str>) -> BundleTarget {
        BundleTarget { name: name.to_string(), cluster_name: cluster_name.map(str::to_string), ..Default::default() }
    }

    #[test]
    fn exact_cluster_name_matches() {
        let targets = vec![target("t1", Some("local"))];
        let matcher = BundleMatcher::new(&targets, &[]);
        let matched = matcher.match_cluster("local", &[], &BTreeMap::new());
        assert_eq!(matched.unwrap().name, "t1");
    }

    #[test]
    fn non_matching_cluster_returns_none() {
        let targets = vec![target("t1", Some("local"))];
        let matcher = BundleMatcher::new(&targets, &[]);
        assert!(matcher.match_cluster("other", &[], &BTreeMap::new()).is_none());
    }

    #[test]
    fn first_match_wins_over_ordered_list() {
        let targets = vec![target("t1", None), target("t2", None)];
        let matcher = BundleMatcher::new(&targets, &[]);
        let matched = matcher.match_cluster("any", &[], &BTreeMap::new());
        assert_eq!(matched.unwrap().name, "t1");
    }

    #[test]
    fn restriction_suppresses_unrestricted_match() {
        let targets = vec![target("t1", None)];
        let restrictions = vec![target("r1", Some("prod-only"))];
        let matcher = BundleMatcher::new(&targets, &restrictions);
        assert!(matcher.match_cluster("dev-cluster", &[], &BTreeMap::new()).is_none());
    }

    #[test]
    fn restriction_allows_matching_candidate() {
        let targets = vec![target("t1", None)];
        let restrictions = vec![target("r1", Some("prod-only"))];
        let matcher = BundleMatcher::new(&targets, &restrictions);
        let matched = matcher.match_cluster("prod-only", &[], &BTreeMap::new());
        assert_eq!(matched.unwrap().name, "t1");
    }

    #[test]
    fn cluster_group_selector_matches_via_any_group() {
        let mut selector_labels = BTreeMap::new();
        selector_labels.insert("env".to_string(), "prod".to_string());
        let selector = k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector {
            match_labels: Some(selector_labels),
            match_expressions: None,
        };
        let t = BundleTarget { name: "t1".to_string(), cluster_group_selector: Some(selector), ..Default::default() };
        let matcher = BundleMatcher::new(std::slice::from_ref(&t), &[]);

        let mut labels = BTreeMap::new();
        labels.insert("env".to_string(), "prod".to_string());
        let groups = vec![GroupView { name: "g1".to_string(), labels }];
        assert!(matcher.match_cluster("c1", &groups, &BTreeMap::new()).is_some());
    }

    #[test]
    fn match_for_target_ignores_predicates() {
        let targets = vec![target("t1", Some("unrelated-cluster"))];
        let matcher = BundleMatcher::new(&targets, &[]);
        assert!(matcher.match_for_target("t1").is_some());
    }
}
