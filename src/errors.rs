//
// Copyright (C) 2025 Pedro Henrique / phkaiser13
//
// File: src/errors.rs
//
// Shared error taxonomy. Every component error enum converts
// into `FleetError` via `#[from]` so condition-writing code has one type to
// match on.
//
// SPDX-License-Identifier: Apache-2.0
//

use thiserror::Error;

#[derive(Debug, Error)]
pub enum FleetError {
    /// Fetched entity absent; reconcile returns cleanly.
    #[error("not found: {0}")]
    NotFound(String),

    /// Optimistic-concurrency failure; caller retries with backoff.
    #[error("conflict updating {0}")]
    Conflict(String),

    /// Spec inconsistent: invalid Helm triple, invalid semver, disallowed
    /// repo, missing selector. Surfaces on a `*Accepted=False` condition.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Helm repo fetch failure, OCI auth failure, registry unavailable.
    #[error("external dependency error: {0}")]
    External(String),

    /// Digest mismatch on content read. Fatal for the owning BundleDeployment.
    #[error("content corrupted: expected digest {expected}, computed {actual}")]
    ContentCorrupted { expected: String, actual: String },

    /// A HelmOp cannot adopt an existing non-HelmOp Bundle.
    #[error("bundle collision: {0}")]
    Collision(String),

    /// Unexpected programmer error; bubbles up and is retried.
    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Kube(#[from] kube::Error),
}

impl FleetError {
    /// The condition `reason` this error should be surfaced under, matching
    /// the taxonomy's one-message-form-per-kind rule.
    pub fn reason(&self) -> &'static str {
        match self {
            FleetError::NotFound(_) => "NotFound",
            FleetError::Conflict(_) => "Conflict",
            FleetError::Validation(_) => "Validation",
            FleetError::External(_) => "External",
            FleetError::ContentCorrupted { .. } => "ContentCorrupted",
            FleetError::Collision(_) => "Collision",
            FleetError::Internal(_) => "Internal",
            FleetError::Kube(_) => "Internal",
        }
    }

    /// Whether the controller-runtime workqueue should requeue this error
    /// beyond the normal watch (Validation/Collision end the generation;
    /// everything else gets the default backoff).
    pub fn should_requeue(&self) -> bool {
        !matches!(self, FleetError::Validation(_) | FleetError::Collision(_) | FleetError::NotFound(_))
    }
}

pub type FleetResult<T> = Result<T, FleetError>;
