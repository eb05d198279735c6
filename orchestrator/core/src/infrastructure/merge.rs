// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Deep merge of YAML mappings
//
// Override values win, except where both sides hold a mapping at the same
// key, in which case the two mappings are merged. Sequences and scalars are
// replaced, never concatenated. Nesting is walked with an explicit stack of
// (destination, source) pairs so descriptor depth never turns into call
// stack depth.

use serde_yaml::{Mapping, Value};

/// Merge `overrides` over a copy of `base`. Neither input is modified.
pub fn deep_merge(base: &Mapping, overrides: &Mapping) -> Mapping {
    let mut merged = base.clone();
    merge_into(&mut merged, overrides);
    merged
}

/// Merge `overrides` into `target` in place
pub fn merge_into(target: &mut Mapping, overrides: &Mapping) {
    let mut pending: Vec<(&mut Mapping, &Mapping)> = vec![(target, overrides)];

    while let Some((dst, src)) = pending.pop() {
        for (key, value) in src {
            let both_mappings = matches!(
                (dst.get(key), value),
                (Some(Value::Mapping(_)), Value::Mapping(_))
            );
            if !both_mappings {
                dst.insert(key.clone(), value.clone());
            }
        }

        // Second pass hands out disjoint &mut borrows of the nested mappings
        for (key, slot) in dst.iter_mut() {
            if let (Value::Mapping(nested_dst), Some(Value::Mapping(nested_src))) = (slot, src.get(key)) {
                pending.push((nested_dst, nested_src));
            }
        }
    }
}
