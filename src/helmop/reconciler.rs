//
// Copyright (C) 2025 Pedro Henrique / phkaiser13
//
// File: src/helmop/reconciler.rs
//
// HelmOp Reconciler. Validation, desired-Bundle synthesis,
// collision detection and the pure half of version resolution live here,
// free of `kube::Api` calls; `src/controllers/helmop_controller.rs` performs
// the fetch/create/patch I/O and calls into this module for decisions, the
// same split `rollout.rs` draws from the bundle controller.
//
// SPDX-License-Identifier: Apache-2.0
//

use super::repo::{is_strict_semver_literal, ChartIndex, HelmRepoClient, RepoAuth};
use super::scheduler::uses_polling;
use crate::crds::bundle::{Bundle, BundleSpec, BundleTarget, HelmOpOptions};
use crate::crds::helmop::{HelmOp, HelmOpSource};
use crate::errors::{FleetError, FleetResult};
use crate::labels::HELMOP_NAME;
use kube::core::ObjectMeta;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HelmSourceKind {
    Tarball,
    Oci,
    Indexed,
}

/// A Helm source must fall into exactly one category; anything else is
/// `InvalidHelmOptions`.
pub fn validate_source(source: &HelmOpSource) -> FleetResult<HelmSourceKind> {
    let repo = source.repo.as_deref().unwrap_or_default();
    let chart = source.chart.as_deref().unwrap_or_default();
    let version = source.version.as_deref().unwrap_or_default();

    let is_tarball = chart.ends_with(".tgz") && repo.is_empty() && version.is_empty();
    let is_oci = repo.starts_with("oci://") && chart.is_empty();
    let is_indexed = !repo.is_empty() && !chart.is_empty() && !repo.starts_with("oci://") && !chart.ends_with(".tgz");

    match (is_tarball, is_oci, is_indexed) {
        (true, false, false) => Ok(HelmSourceKind::Tarball),
        (false, true, false) => Ok(HelmSourceKind::Oci),
        (false, false, true) => Ok(HelmSourceKind::Indexed),
        _ => Err(FleetError::Validation(format!(
            "helm source must be exactly one of tarball/oci/indexed repo: repo={repo:?} chart={chart:?} version={version:?}"
        ))),
    }
}

/// Build the Bundle a HelmOp desires: same targets, a nil resource list (the
/// agent resolves the chart at deploy time), and per-target Helm coordinates
/// filled in wherever a target didn't already override them.
pub fn build_desired_bundle(helmop: &HelmOp) -> FleetResult<Bundle> {
    validate_source(&helmop.spec.helm)?;

    let name = helmop.metadata.name.clone().unwrap_or_default();
    let namespace = helmop.metadata.namespace.clone();

    let mut targets = if helmop.spec.targets.is_empty() { vec![default_target()] } else { helmop.spec.targets.clone() };
    for target in &mut targets {
        if target.options.helm.repo.is_none() {
            target.options.helm.repo = helmop.spec.helm.repo.clone();
        }
        if target.options.helm.chart.is_none() {
            target.options.helm.chart = helmop.spec.helm.chart.clone();
        }
        if target.options.helm.version.is_none() {
            target.options.helm.version = helmop.spec.helm.version.clone();
        }
    }

    let mut labels = helmop.spec.labels.clone();
    labels.insert(HELMOP_NAME.to_string(), name.clone());

    Ok(Bundle {
        metadata: ObjectMeta { name: Some(name), namespace, labels: Some(labels), ..Default::default() },
        spec: BundleSpec {
            resources: vec![],
            options: Default::default(),
            targets,
            target_restrictions: vec![],
            rollout: Default::default(),
            depends_on: vec![],
            keep_resources: false,
            paused: false,
            helm_op_options: Some(HelmOpOptions {
                secret_name: helmop.spec.helm_secret_name.clone(),
                insecure_skip_tls_verify: helmop.spec.insecure_skip_tls_verify,
            }),
        },
        status: None,
    })
}

fn default_target() -> BundleTarget {
    BundleTarget { name: "default".to_string(), cluster_group: Some("default".to_string()), ..Default::default() }
}

/// A same-named Bundle that isn't HelmOp-owned belongs to Git; the HelmOp
/// reconciler must never touch it (Invariant I3).
pub fn check_collision(existing: Option<&Bundle>) -> FleetResult<()> {
    match existing {
        Some(bundle) if bundle.spec.helm_op_options.is_none() => {
            Err(FleetError::Collision("non-helmops bundle already exists".to_string()))
        }
        _ => Ok(()),
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VersionDecision {
    /// `spec.helm.version` is itself a strict semver literal; use verbatim.
    Literal(String),
    /// The repo/chart/version triple hasn't changed since the last
    /// reconcile and a resolved version is already cached.
    Cached(String),
    /// Polling owns version assignment; leave the field untouched.
    DeferToPolling,
    /// Must fetch the repo index and resolve a version now.
    NeedsResolve,
}

/// The version decision is pure; the repo fetch it sometimes demands is
/// not — `resolve_version` performs that half separately.
pub fn handle_version(helmop: &HelmOp) -> VersionDecision {
    let version = helmop.spec.helm.version.clone().unwrap_or_default();
    if is_strict_semver_literal(&version) {
        return VersionDecision::Literal(version);
    }

    let repo = helmop.spec.helm.repo.clone().unwrap_or_default();
    let chart = helmop.spec.helm.chart.clone().unwrap_or_default();
    let current = (repo, chart, version);

    let cached = helmop.status.as_ref().and_then(|status| {
        if status.observed_source.as_ref() == Some(&current) {
            status.version.clone()
        } else {
            None
        }
    });
    if let Some(v) = cached {
        return VersionDecision::Cached(v);
    }

    if uses_polling(&helmop.spec) {
        return VersionDecision::DeferToPolling;
    }

    VersionDecision::NeedsResolve
}

/// Fetch the repo index and resolve the highest version matching
/// `spec.helm.version`'s constraint. Called only when `handle_version`
/// returns `NeedsResolve`.
pub async fn resolve_version(client: &HelmRepoClient, helmop: &HelmOp, auth: Option<&RepoAuth>) -> FleetResult<String> {
    let repo = helmop.spec.helm.repo.as_deref().ok_or_else(|| FleetError::Validation("helm.repo is required to resolve a version".to_string()))?;
    let chart = helmop.spec.helm.chart.as_deref().ok_or_else(|| FleetError::Validation("helm.chart is required to resolve a version".to_string()))?;
    let constraint = helmop.spec.helm.version.as_deref().unwrap_or_default();

    let index: ChartIndex = client.fetch_index(repo, auth).await?;
    index
        .resolve(chart, constraint)
        .map(|v| v.to_string())
        .ok_or_else(|| FleetError::Validation(format!("no version of chart {chart} in {repo} satisfies {constraint:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crds::helmop::{HelmOpSpec, HelmOpStatus};

    fn source(repo: &str, chart: &str, version: &str) -> HelmOpSource {
        HelmOpSource {
            repo: if repo.is_empty() { None } else { Some(repo.to_string()) },
            chart: if chart.is_empty() { None } else { Some(chart.to_string()) },
            version: if version.is_empty() { None } else { Some(version.to_string()) },
        }
    }

    #[test]
    fn tarball_source_is_valid() {
        assert_eq!(validate_source(&source("", "app-1.0.0.tgz", "")).unwrap(), HelmSourceKind::Tarball);
    }

    #[test]
    fn oci_source_is_valid() {
        assert_eq!(validate_source(&source("oci://registry/app", "", "1.0.0")).unwrap(), HelmSourceKind::Oci);
    }

    #[test]
    fn indexed_source_is_valid() {
        assert_eq!(validate_source(&source("http://helm", "alpine", "0.x.x")).unwrap(), HelmSourceKind::Indexed);
    }

    #[test]
    fn tarball_with_repo_is_rejected() {
        assert!(validate_source(&source("http://helm", "app-1.0.0.tgz", "")).is_err());
    }

    #[test]
    fn empty_source_is_rejected() {
        assert!(validate_source(&source("", "", "")).is_err());
    }

    fn helmop(repo: &str, chart: &str, version: &str, targets: Vec<BundleTarget>) -> HelmOp {
        HelmOp {
            metadata: ObjectMeta { name: Some("my-app".to_string()), namespace: Some("fleet-default".to_string()), ..Default::default() },
            spec: HelmOpSpec {
                helm: source(repo, chart, version),
                helm_secret_name: Some("creds".to_string()),
                insecure_skip_tls_verify: false,
                polling_interval: None,
                targets,
                labels: Default::default(),
            },
            status: None,
        }
    }

    #[test]
    fn build_desired_bundle_defaults_target_when_none_given() {
        let op = helmop("http://helm", "alpine", "0.x.x", vec![]);
        let bundle = build_desired_bundle(&op).unwrap();
        assert_eq!(bundle.spec.targets.len(), 1);
        assert_eq!(bundle.spec.targets[0].options.helm.chart.as_deref(), Some("alpine"));
        assert!(bundle.spec.resources.is_empty());
        assert_eq!(bundle.spec.helm_op_options.unwrap().secret_name.as_deref(), Some("creds"));
    }

    #[test]
    fn build_desired_bundle_preserves_explicit_target_override() {
        let mut target = BundleTarget { name: "prod".to_string(), cluster_group: Some("prod".to_string()), ..Default::default() };
        target.options.helm.chart = Some("alpine-fork".to_string());
        let op = helmop("http://helm", "alpine", "0.x.x", vec![target]);
        let bundle = build_desired_bundle(&op).unwrap();
        assert_eq!(bundle.spec.targets[0].options.helm.chart.as_deref(), Some("alpine-fork"));
        assert_eq!(bundle.spec.targets[0].options.helm.repo.as_deref(), Some("http://helm"));
    }

    #[test]
    fn collision_rejects_non_helmop_bundle() {
        let mut existing = build_desired_bundle(&helmop("http://helm", "alpine", "0.x.x", vec![])).unwrap();
        existing.spec.helm_op_options = None;
        assert!(matches!(check_collision(Some(&existing)), Err(FleetError::Collision(_))));
    }

    #[test]
    fn collision_allows_helmop_owned_bundle() {
        let existing = build_desired_bundle(&helmop("http://helm", "alpine", "0.x.x", vec![])).unwrap();
        assert!(check_collision(Some(&existing)).is_ok());
    }

    #[test]
    fn handle_version_prefers_strict_literal() {
        let op = helmop("http://helm", "alpine", "1.2.3", vec![]);
        assert_eq!(handle_version(&op), VersionDecision::Literal("1.2.3".to_string()));
    }

    #[test]
    fn handle_version_reuses_cache_when_source_unchanged() {
        let mut op = helmop("http://helm", "alpine", "0.x.x", vec![]);
        op.status = Some(HelmOpStatus {
            version: Some("0.2.0".to_string()),
            conditions: vec![],
            observed_source: Some(("http://helm".to_string(), "alpine".to_string(), "0.x.x".to_string())),
        });
        assert_eq!(handle_version(&op), VersionDecision::Cached("0.2.0".to_string()));
    }

    #[test]
    fn handle_version_defers_to_polling_when_source_changed_and_polling_enabled() {
        let mut op = helmop("http://helm", "alpine", "0.x.x", vec![]);
        op.spec.polling_interval = Some("1m".to_string());
        op.status = Some(HelmOpStatus {
            version: Some("0.2.0".to_string()),
            conditions: vec![],
            observed_source: Some(("http://helm".to_string(), "alpine".to_string(), "0.1.x".to_string())),
        });
        assert_eq!(handle_version(&op), VersionDecision::DeferToPolling);
    }

    #[test]
    fn handle_version_needs_resolve_without_polling() {
        let op = helmop("http://helm", "alpine", "0.x.x", vec![]);
        assert_eq!(handle_version(&op), VersionDecision::NeedsResolve);
    }
}
