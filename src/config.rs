//
// Copyright (C) 2025 Pedro Henrique / phkaiser13
//
// File: src/config.rs
//
// Process configuration, loaded from environment variables at startup the
// way `main.rs` reads `PROMETHEUS_ENDPOINT` directly rather than through a
// config file or flag parser.
//
// SPDX-License-Identifier: Apache-2.0
//

use std::time::Duration;

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

#[derive(Clone, Debug)]
pub struct FleetConfig {
    /// `fleet.cattle.io/shard-ref` value this process answers to; empty
    /// means unsharded.
    pub shard_id: String,
    /// Port the `/metrics` endpoint listens on.
    pub metrics_port: u16,
    /// Per-kind `Controller` concurrency (`Config::default().concurrency(n)`).
    pub controller_concurrency: u16,
    /// Requeue delay after a reconcile error.
    pub error_requeue: Duration,
}

impl FleetConfig {
    pub fn from_env() -> Self {
        Self {
            shard_id: env_or("FLEET_SHARD_ID", ""),
            metrics_port: env_parsed("FLEET_METRICS_PORT", 9090),
            controller_concurrency: env_parsed("FLEET_CONTROLLER_CONCURRENCY", 4),
            error_requeue: Duration::from_secs(env_parsed("FLEET_ERROR_REQUEUE_SECONDS", 15)),
        }
    }
}

#[derive(Clone, Debug)]
pub struct AgentConfig {
    /// Namespace resources deploy into when a BundleDeployment sets neither
    /// `targetNamespace` nor `defaultNamespace`.
    pub default_namespace: String,
    /// Default token-bucket rate for the apply rate limiter.
    pub apply_qps: u32,
    pub apply_burst: u32,
    pub metrics_port: u16,
}

impl AgentConfig {
    pub fn from_env() -> Self {
        Self {
            default_namespace: env_or("FLEET_AGENT_DEFAULT_NAMESPACE", "fleet-default"),
            apply_qps: env_parsed("FLEET_AGENT_APPLY_QPS", 5),
            apply_burst: env_parsed("FLEET_AGENT_APPLY_BURST", 10),
            metrics_port: env_parsed("FLEET_AGENT_METRICS_PORT", 9091),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fleet_config_defaults_to_unsharded() {
        std::env::remove_var("FLEET_SHARD_ID");
        let config = FleetConfig::from_env();
        assert_eq!(config.shard_id, "");
        assert_eq!(config.metrics_port, 9090);
    }

    #[test]
    fn agent_config_defaults_match_the_helm_deployer_conventions() {
        std::env::remove_var("FLEET_AGENT_DEFAULT_NAMESPACE");
        let config = AgentConfig::from_env();
        assert_eq!(config.default_namespace, "fleet-default");
        assert_eq!(config.apply_burst, 10);
    }
}
