//
// Copyright (C) 2025 Pedro Henrique / phkaiser13
//
// File: src/sharding.rs
//
// Shard predicate: filters watch events
// by the `fleet.cattle.io/shard-ref` label against this process's own
// shardID. A free function rather than a struct since it holds no state
// beyond the one label comparison.
//
// SPDX-License-Identifier: Apache-2.0
//

use std::collections::BTreeMap;

pub const LABEL_SHARD_REF: &str = "fleet.cattle.io/shard-ref";

/// An object belongs to this shard when its `shard-ref` label is absent (the
/// default, unsharded shard) or matches `shard_id` exactly.
pub fn belongs_to_shard(labels: &BTreeMap<String, String>, shard_id: &str) -> bool {
    if shard_id.is_empty() {
        return true;
    }
    match labels.get(LABEL_SHARD_REF) {
        None => shard_id == "",
        Some(v) => v == shard_id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsharded_process_accepts_everything() {
        let labels = BTreeMap::from([(LABEL_SHARD_REF.to_string(), "shard-a".to_string())]);
        assert!(belongs_to_shard(&labels, ""));
    }

    #[test]
    fn sharded_process_rejects_mismatched_label() {
        let labels = BTreeMap::from([(LABEL_SHARD_REF.to_string(), "shard-a".to_string())]);
        assert!(!belongs_to_shard(&labels, "shard-b"));
    }

    #[test]
    fn sharded_process_accepts_matching_label() {
        let labels = BTreeMap::from([(LABEL_SHARD_REF.to_string(), "shard-a".to_string())]);
        assert!(belongs_to_shard(&labels, "shard-a"));
    }

    #[test]
    fn sharded_process_rejects_unlabeled_object() {
        assert!(!belongs_to_shard(&BTreeMap::new(), "shard-a"));
    }
}
