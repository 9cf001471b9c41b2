//
// Copyright (C) 2025 Pedro Henrique / phkaiser13
//
// File: src/helmop/scheduler.rs
//
// Polling Scheduler. One job per HelmOp that needs version
// discovery against an indexed repo, living independently of the Kubernetes
// watch. A small `DashMap` table kept by the owning controller, the same
// shape as `rate_limiter`'s registry but storing
// `tokio::task::JoinHandle`s instead of rate limiters.
//
// SPDX-License-Identifier: Apache-2.0
//

use crate::crds::helmop::HelmOpSpec;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

/// A HelmOp's version is a constraint against an indexed repo and therefore
/// needs periodic out-of-band resolution, iff every one of:
/// pollingInterval is set and >0, repo is non-empty, chart is not a tarball,
/// repo is not an OCI registry, and the version is not itself a strict
/// semver literal.
pub fn uses_polling(spec: &HelmOpSpec) -> bool {
    let interval_positive = spec
        .polling_interval
        .as_deref()
        .map(parse_duration)
        .map(|d| d.map(|d| !d.is_zero()).unwrap_or(false))
        .unwrap_or(false);
    if !interval_positive {
        return false;
    }
    let repo = spec.helm.repo.as_deref().unwrap_or_default();
    if repo.is_empty() || repo.starts_with("oci://") {
        return false;
    }
    if spec.helm.chart.as_deref().unwrap_or_default().ends_with(".tgz") {
        return false;
    }
    let version = spec.helm.version.as_deref().unwrap_or_default();
    !super::repo::is_strict_semver_literal(version)
}

/// Parse a Go-style duration string (`"1m"`, `"30s"`, `"2h"`); Fleet's own
/// `pollingInterval` field follows the same convention.
pub fn parse_duration(s: &str) -> Option<std::time::Duration> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    let split_at = s.find(|c: char| !c.is_ascii_digit() && c != '.')?;
    let (number, unit) = s.split_at(split_at);
    let value: f64 = number.parse().ok()?;
    let secs = match unit {
        "ns" => value / 1_000_000_000.0,
        "us" | "\u{b5}s" => value / 1_000_000.0,
        "ms" => value / 1_000.0,
        "s" => value,
        "m" => value * 60.0,
        "h" => value * 3600.0,
        _ => return None,
    };
    Some(std::time::Duration::from_secs_f64(secs.max(0.0)))
}

pub fn job_description(namespace: &str, name: &str) -> String {
    format!("helmops-polling-{namespace}-{name}")
}

struct Job {
    description: String,
    trigger_description: String,
    single_flight: Arc<Mutex<()>>,
    handle: JoinHandle<()>,
}

/// Job table keyed by `(namespace, name)`. `schedule`/`replace`/`delete` are
/// called from `helmop_controller.rs`'s reconcile after step 8; the job
/// closure itself lives with the caller since it needs a `kube::Client` the
/// scheduler has no business holding.
#[derive(Default)]
pub struct PollingScheduler {
    jobs: DashMap<(String, String), Job>,
}

impl PollingScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn has_job(&self, namespace: &str, name: &str) -> bool {
        self.jobs.contains_key(&(namespace.to_string(), name.to_string()))
    }

    /// Whether the live job's description/trigger still matches what the
    /// current spec would produce — if not, the caller must `replace`.
    pub fn matches(&self, namespace: &str, name: &str, trigger_description: &str) -> bool {
        self.jobs
            .get(&(namespace.to_string(), name.to_string()))
            .map(|j| j.description == job_description(namespace, name) && j.trigger_description == trigger_description)
            .unwrap_or(false)
    }

    /// Register a freshly spawned job, replacing (aborting) any prior one
    /// under the same key.
    pub fn schedule(&self, namespace: &str, name: &str, trigger_description: String, handle: JoinHandle<()>) {
        let key = (namespace.to_string(), name.to_string());
        if let Some((_, old)) = self.jobs.remove(&key) {
            old.handle.abort();
        }
        self.jobs.insert(
            key,
            Job { description: job_description(namespace, name), trigger_description, single_flight: Arc::new(Mutex::new(())), handle },
        );
    }

    /// Best-effort delete; a missing job is not an error.
    pub fn delete(&self, namespace: &str, name: &str) {
        if let Some((_, job)) = self.jobs.remove(&(namespace.to_string(), name.to_string())) {
            job.handle.abort();
        }
    }

    /// A fresh `Arc<Mutex<()>>` to gate a single job fire via
    /// `try_lock` — concurrent fires of the same job no-op rather than
    /// queuing.
    pub fn single_flight_guard(&self, namespace: &str, name: &str) -> Option<Arc<Mutex<()>>> {
        self.jobs.get(&(namespace.to_string(), name.to_string())).map(|j| j.single_flight.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crds::helmop::HelmOpSource;

    fn spec(repo: &str, chart: &str, version: &str, interval: &str) -> HelmOpSpec {
        HelmOpSpec {
            helm: HelmOpSource { repo: Some(repo.to_string()), chart: Some(chart.to_string()), version: Some(version.to_string()) },
            helm_secret_name: None,
            insecure_skip_tls_verify: false,
            polling_interval: Some(interval.to_string()),
            targets: vec![],
            labels: Default::default(),
        }
    }

    #[test]
    fn indexed_repo_with_constraint_and_interval_uses_polling() {
        assert!(uses_polling(&spec("http://helm", "alpine", "0.x.x", "1m")));
    }

    #[test]
    fn strict_literal_never_polls() {
        assert!(!uses_polling(&spec("http://helm", "alpine", "0.1.0", "1m")));
    }

    #[test]
    fn oci_repo_never_polls() {
        assert!(!uses_polling(&spec("oci://registry/alpine", "", "0.x.x", "1m")));
    }

    #[test]
    fn tarball_chart_never_polls() {
        assert!(!uses_polling(&spec("http://helm", "alpine-0.1.0.tgz", "", "1m")));
    }

    #[test]
    fn zero_interval_never_polls() {
        assert!(!uses_polling(&spec("http://helm", "alpine", "0.x.x", "0s")));
    }

    #[test]
    fn duration_parses_minutes() {
        assert_eq!(parse_duration("1m"), Some(std::time::Duration::from_secs(60)));
        assert_eq!(parse_duration("30s"), Some(std::time::Duration::from_secs(30)));
    }

    #[tokio::test]
    async fn job_table_schedule_and_delete_round_trip() {
        let scheduler = PollingScheduler::new();
        let handle = tokio::spawn(async {});
        scheduler.schedule("default", "my-app", "1m".to_string(), handle);
        assert!(scheduler.has_job("default", "my-app"));
        assert!(scheduler.matches("default", "my-app", "1m"));
        assert!(!scheduler.matches("default", "my-app", "5m"));
        scheduler.delete("default", "my-app");
        assert!(!scheduler.has_job("default", "my-app"));
    }
}
