// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Identity-preserving rebinding.
//!
//! `reload_api` (and a full reload in live runtime) must hand consumers
//! the same handles they already hold: a namespace keeps its `Arc`, a
//! leaf-callable whose segment survives keeps its `Arc` and gets its body
//! swapped. This module folds a freshly built value onto the existing one,
//! reusing every handle whose shape survived.

use crate::value::Value;
use std::collections::BTreeMap;

/// Fold `fresh` onto `existing`, preserving surviving handle identity.
/// Returns the value to install (the existing handle wherever it could be
/// kept).
pub(crate) fn merge_preserving(existing: &Value, fresh: Value) -> Value {
    match (existing, fresh) {
        (Value::Function(old), Value::Function(new)) => {
            old.swap_target(new.target());

            // Props: keep old prop handles where the fresh module still
            // exports the same name, drop the rest.
            let mut props: BTreeMap<String, Value> = BTreeMap::new();
            for name in new.prop_names() {
                if let Some(fresh_prop) = new.prop(&name) {
                    let merged = match old.prop(&name) {
                        Some(old_prop) => merge_preserving(&old_prop, fresh_prop),
                        None => fresh_prop,
                    };
                    props.insert(name, merged);
                }
            }
            old.replace_props(props);
            Value::Function(old.clone())
        }
        (Value::Namespace(old), Value::Namespace(new)) => {
            let mut entries: BTreeMap<String, Value> = BTreeMap::new();
            for (key, fresh_child) in new.snapshot() {
                let merged = match old.get(&key) {
                    Some(old_child) => merge_preserving(&old_child, fresh_child),
                    None => fresh_child,
                };
                entries.insert(key, merged);
            }
            // Keys absent from the fresh build are dropped; stale entries
            // must not survive a reload.
            old.replace_entries(entries);
            Value::Namespace(old.clone())
        }
        (_, fresh) => fresh,
    }
}
