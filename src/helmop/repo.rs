//
// Copyright (C) 2025 Pedro Henrique / phkaiser13
//
// File: src/helmop/repo.rs
//
// Helm repo index fetch and version-constraint matching.
// Kept a standalone HTTP client wrapping a `reqwest::Client` with one
// narrow responsibility and nothing else.
//
// SPDX-License-Identifier: Apache-2.0
//

use crate::errors::{FleetError, FleetResult};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Deserialize, Debug)]
struct IndexFile {
    #[serde(default)]
    entries: BTreeMap<String, Vec<IndexEntry>>,
}

#[derive(Deserialize, Debug)]
struct IndexEntry {
    version: String,
}

/// Basic-auth and TLS settings read from the HelmOp's `helmSecretName` Secret
/// (parsing the Secret itself is the caller's job; this struct is the result).
#[derive(Clone, Debug, Default)]
pub struct RepoAuth {
    pub username: Option<String>,
    pub password: Option<String>,
    pub ca_bundle: Option<Vec<u8>>,
    pub insecure_skip_tls_verify: bool,
}

pub struct HelmRepoClient {
    client: reqwest::Client,
}

impl HelmRepoClient {
    pub fn new() -> FleetResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .danger_accept_invalid_certs(false)
            .build()
            .map_err(|e| FleetError::Internal(format!("building helm repo http client: {e}")))?;
        Ok(Self { client })
    }

    /// Fetch `<repo>/index.yaml`, applying basic auth and
    /// `insecureSkipTLSverify` as configured. A distinct client is built
    /// per call when `auth.insecure_skip_tls_verify` is set, since that
    /// flag is per-repo and `reqwest::Client` bakes TLS settings in at
    /// construction.
    pub async fn fetch_index(&self, repo_url: &str, auth: Option<&RepoAuth>) -> FleetResult<ChartIndex> {
        let url = format!("{}/index.yaml", repo_url.trim_end_matches('/'));

        let body = if let Some(auth) = auth.filter(|a| a.insecure_skip_tls_verify) {
            let insecure_client = reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .danger_accept_invalid_certs(true)
                .build()
                .map_err(|e| FleetError::Internal(format!("building insecure helm repo http client: {e}")))?;
            self.do_fetch(&insecure_client, &url, Some(auth)).await?
        } else {
            self.do_fetch(&self.client, &url, auth).await?
        };

        let index: IndexFile = serde_yaml::from_str(&body)
            .map_err(|e| FleetError::External(format!("parsing index.yaml from {repo_url}: {e}")))?;

        let mut entries: BTreeMap<String, Vec<semver::Version>> = BTreeMap::new();
        for (chart, versions) in index.entries {
            let mut parsed: Vec<semver::Version> = versions
                .into_iter()
                .filter_map(|v| semver::Version::parse(&v.version).ok())
                .collect();
            parsed.sort();
            entries.insert(chart, parsed);
        }
        Ok(ChartIndex { entries })
    }

    async fn do_fetch(&self, client: &reqwest::Client, url: &str, auth: Option<&RepoAuth>) -> FleetResult<String> {
        let mut req = client.get(url);
        if let Some(auth) = auth {
            if let Some(user) = &auth.username {
                req = req.basic_auth(user, auth.password.as_ref());
            }
        }
        let resp = req.send().await.map_err(|e| FleetError::External(format!("fetching {url}: {e}")))?;
        if !resp.status().is_success() {
            return Err(FleetError::External(format!("fetching {url}: status {}", resp.status())));
        }
        resp.text().await.map_err(|e| FleetError::External(format!("reading body from {url}: {e}")))
    }
}

pub struct ChartIndex {
    entries: BTreeMap<String, Vec<semver::Version>>,
}

impl ChartIndex {
    /// Highest version of `chart` satisfying `constraint`, or `None` if the
    /// chart is absent or nothing matches. An empty constraint matches
    /// anything.
    pub fn resolve(&self, chart: &str, constraint: &str) -> Option<semver::Version> {
        let versions = self.entries.get(chart)?;
        if constraint.trim().is_empty() {
            return versions.last().cloned();
        }
        let req = parse_constraint(constraint).ok()?;
        versions.iter().rev().find(|v| req.matches(v)).cloned()
    }
}

/// Translate Helm/Masterminds-style wildcards (`0.x.x`, `1.X`) into the
/// `semver` crate's `*` wildcard syntax before parsing as a `VersionReq`.
fn parse_constraint(constraint: &str) -> Result<semver::VersionReq, semver::Error> {
    let translated: String = constraint
        .split(',')
        .map(|part| {
            let part = part.trim();
            if part.chars().all(|c| c.is_ascii_digit() || c == '.' || c.eq_ignore_ascii_case(&'x') || c == '*') {
                part.chars()
                    .map(|c| if c.eq_ignore_ascii_case(&'x') { '*' } else { c })
                    .collect::<String>()
            } else {
                part.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(",");
    semver::VersionReq::parse(&translated)
}

/// `spec.helm.version` parses as an exact semver literal (no range operators,
/// no wildcards) — the condition under which both `handleVersion` and
/// `usesPolling` skip constraint resolution entirely.
pub fn is_strict_semver_literal(version: &str) -> bool {
    !version.trim().is_empty() && semver::Version::parse(version.trim()).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index(chart: &str, versions: &[&str]) -> ChartIndex {
        let mut entries = BTreeMap::new();
        entries.insert(chart.to_string(), versions.iter().map(|v| semver::Version::parse(v).unwrap()).collect());
        ChartIndex { entries }
    }

    #[test]
    fn strict_literal_is_recognized() {
        assert!(is_strict_semver_literal("1.2.3"));
        assert!(!is_strict_semver_literal("0.x.x"));
        assert!(!is_strict_semver_literal("~1.2.3"));
    }

    #[test]
    fn wildcard_constraint_picks_highest_matching() {
        let idx = index("alpine", &["0.1.0", "0.2.0", "1.0.0"]);
        let resolved = idx.resolve("alpine", "0.x.x").unwrap();
        assert_eq!(resolved, semver::Version::parse("0.2.0").unwrap());
    }

    #[test]
    fn empty_constraint_picks_latest() {
        let idx = index("alpine", &["0.1.0", "0.2.0", "1.0.0"]);
        let resolved = idx.resolve("alpine", "").unwrap();
        assert_eq!(resolved, semver::Version::parse("1.0.0").unwrap());
    }

    #[test]
    fn unknown_chart_resolves_to_none() {
        let idx = index("alpine", &["0.1.0"]);
        assert!(idx.resolve("nginx", "0.x.x").is_none());
    }

    #[test]
    fn caret_range_constraint_matches() {
        let idx = index("alpine", &["0.1.0", "0.2.0", "1.0.0"]);
        let resolved = idx.resolve("alpine", ">=0.1.0, <1.0.0").unwrap();
        assert_eq!(resolved, semver::Version::parse("0.2.0").unwrap());
    }

    #[test]
    fn scenario_polling_discovers_new_chart_version() {
        let before = index("alpine", &["0.1.0"]);
        assert_eq!(before.resolve("alpine", "0.x.x").unwrap(), semver::Version::parse("0.1.0").unwrap());

        let after = index("alpine", &["0.1.0", "0.2.0"]);
        assert_eq!(after.resolve("alpine", "0.x.x").unwrap(), semver::Version::parse("0.2.0").unwrap());
    }
}
