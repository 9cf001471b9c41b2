// Prometheus metrics for the Fleet controller and agent. Uses `lazy_static`
// so every gauge/counter is created once and shared across reconcile loops
// and the metrics HTTP server.
//
// SPDX-License-Identifier: Apache-2.0

use lazy_static::lazy_static;
use prometheus::{opts, register_histogram, register_int_counter_vec, register_int_gauge_vec, Histogram, IntCounterVec, IntGaugeVec, Registry};

lazy_static! {
    /// Current BundleDeployment count per rollout partition, labeled by
    /// Bundle and partition name.
    pub static ref FLEET_ROLLOUT_PARTITION_SIZE: IntGaugeVec =
        register_int_gauge_vec!(
            "fleet_rollout_partition_size",
            "Number of targets assigned to a rollout partition.",
            &["bundle", "partition"]
        ).unwrap();

    /// Count of unavailable BundleDeployments per partition, the same
    /// number `rollout::reconcile` checks against the budget.
    pub static ref FLEET_ROLLOUT_PARTITION_UNAVAILABLE: IntGaugeVec =
        register_int_gauge_vec!(
            "fleet_rollout_partition_unavailable",
            "Number of unavailable targets in a rollout partition.",
            &["bundle", "partition"]
        ).unwrap();

    /// HelmOp polling outcomes, labeled by HelmOp and result.
    pub static ref FLEET_HELMOP_POLL_TOTAL: IntCounterVec =
        register_int_counter_vec!(
            "fleet_helmop_poll_total",
            "Total number of HelmOp repository index polls.",
            &["helmop", "result"]
        ).unwrap();

    /// Latency of a single HelmOp index.yaml fetch + version resolution.
    pub static ref FLEET_HELMOP_POLL_DURATION_SECONDS: Histogram =
        register_histogram!(
            "fleet_helmop_poll_duration_seconds",
            "Latency of a HelmOp repository poll.",
            vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
        ).unwrap();

    /// Size of the agent's desired-set plan per BundleDeployment, labeled by
    /// plan section (create/update/delete).
    pub static ref FLEET_AGENT_PLAN_SIZE: IntGaugeVec =
        register_int_gauge_vec!(
            "fleet_agent_plan_size",
            "Number of objects in the agent's most recent desired-set plan.",
            &["bundle_deployment", "section"]
        ).unwrap();

    /// Outcomes of the agent's `runner::apply`, labeled by result.
    pub static ref FLEET_AGENT_APPLY_TOTAL: IntCounterVec =
        register_int_counter_vec!(
            "fleet_agent_apply_total",
            "Total number of agent apply cycles.",
            &["bundle_deployment", "result"]
        ).unwrap();
}

/// Creates a new Prometheus registry and registers all custom metrics.
/// Intended to be called once at startup, by both the controller and the
/// agent binary.
pub fn create_and_register_metrics() -> Result<Registry, prometheus::Error> {
    let r = Registry::new();
    r.register(Box::new(FLEET_ROLLOUT_PARTITION_SIZE.clone()))?;
    r.register(Box::new(FLEET_ROLLOUT_PARTITION_UNAVAILABLE.clone()))?;
    r.register(Box::new(FLEET_HELMOP_POLL_TOTAL.clone()))?;
    r.register(Box::new(FLEET_HELMOP_POLL_DURATION_SECONDS.clone()))?;
    r.register(Box::new(FLEET_AGENT_PLAN_SIZE.clone()))?;
    r.register(Box::new(FLEET_AGENT_APPLY_TOTAL.clone()))?;
    Ok(r)
}
