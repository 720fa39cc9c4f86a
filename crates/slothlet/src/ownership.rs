// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Ownership tracking - who bound what, and what rolls back on removal.
//!
//! Every mutated api path carries an ordered stack of owner frames; the
//! top frame is the current owner and its binding is what consumers see.
//! Adding appends (or replaces the same module's earlier frame), removing
//! the current owner re-exposes the binding underneath, removing a
//! non-current owner just drops its frame. The sentinel module id
//! [`CORE_MODULE`] marks bindings produced by the initial directory load.

use crate::value::Value;
use parking_lot::RwLock;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Owner id for bindings created by the primary directory load.
pub const CORE_MODULE: &str = "core";

/// One module's claim on a path.
#[derive(Debug, Clone)]
pub struct OwnerFrame {
    /// The claiming module.
    pub module_id: String,
    /// The binding this owner installed.
    pub binding: Value,
    /// Frozen metadata attached at add time.
    pub metadata: Option<Arc<serde_json::Value>>,
    /// Top-level keys this owner contributed (drives stale-property
    /// cleanup when the same module re-adds the path).
    pub keys: Vec<String>,
    /// True when the owner merged its entries into a shared namespace
    /// instead of replacing the binding; removal then only takes the
    /// contributed keys with it.
    pub merged: bool,
}

/// What a removal did to the stack.
#[derive(Debug)]
pub enum Removal {
    /// The module held no claim on the path.
    NotAnOwner,
    /// A non-current claim was dropped; the visible binding is unchanged.
    DroppedNonCurrent,
    /// The current owner was removed; this frame is now visible.
    Restored(OwnerFrame),
    /// The last owner was removed; the path leaves the visible tree.
    PathEmpty,
}

/// Per-instance ownership stacks.
#[derive(Debug, Default)]
pub struct OwnershipMap {
    stacks: RwLock<BTreeMap<String, Vec<OwnerFrame>>>,
}

impl OwnershipMap {
    /// Fresh empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a claim. A module re-claiming a path it already owns
    /// replaces its existing frame in place (same stack position); the
    /// replaced frame is returned so the caller can clean up properties
    /// that did not survive the re-add.
    pub fn claim(&self, path: &str, frame: OwnerFrame) -> Option<OwnerFrame> {
        let mut stacks = self.stacks.write();
        let stack = stacks.entry(path.to_string()).or_default();
        if let Some(existing) = stack
            .iter_mut()
            .find(|f| f.module_id == frame.module_id)
        {
            return Some(std::mem::replace(existing, frame));
        }
        stack.push(frame);
        None
    }

    /// The module currently on top of the stack for `path`.
    pub fn current_owner(&self, path: &str) -> Option<String> {
        self.stacks
            .read()
            .get(path)
            .and_then(|s| s.last())
            .map(|f| f.module_id.clone())
    }

    /// Every module claiming `path`.
    pub fn owners(&self, path: &str) -> BTreeSet<String> {
        self.stacks
            .read()
            .get(path)
            .map(|s| s.iter().map(|f| f.module_id.clone()).collect())
            .unwrap_or_default()
    }

    /// True when any module claims `path`.
    pub fn is_tracked(&self, path: &str) -> bool {
        self.stacks.read().contains_key(path)
    }

    /// Remove `module_id`'s claim on `path`.
    pub fn remove_owner(&self, path: &str, module_id: &str) -> Removal {
        let mut stacks = self.stacks.write();
        let Some(stack) = stacks.get_mut(path) else {
            return Removal::NotAnOwner;
        };
        let Some(pos) = stack.iter().rposition(|f| f.module_id == module_id) else {
            return Removal::NotAnOwner;
        };

        let was_current = pos == stack.len() - 1;
        stack.remove(pos);

        if !was_current {
            return Removal::DroppedNonCurrent;
        }
        match stack.last().cloned() {
            Some(frame) => Removal::Restored(frame),
            None => {
                stacks.remove(path);
                Removal::PathEmpty
            }
        }
    }

    /// Clone of `module_id`'s frame on `path`, if it holds one.
    pub fn frame_of(&self, path: &str, module_id: &str) -> Option<OwnerFrame> {
        self.stacks
            .read()
            .get(path)
            .and_then(|stack| stack.iter().find(|f| f.module_id == module_id))
            .cloned()
    }

    /// Top-level keys still claimed on `path` by modules other than
    /// `module_id`. A merged contributor's removal keeps these.
    pub fn keys_claimed_by_others(&self, path: &str, module_id: &str) -> BTreeSet<String> {
        self.stacks
            .read()
            .get(path)
            .map(|stack| {
                stack
                    .iter()
                    .filter(|f| f.module_id != module_id)
                    .flat_map(|f| f.keys.iter().cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Every path on which `module_id` holds a claim.
    pub fn paths_owned_by(&self, module_id: &str) -> Vec<String> {
        self.stacks
            .read()
            .iter()
            .filter(|(_, stack)| stack.iter().any(|f| f.module_id == module_id))
            .map(|(path, _)| path.clone())
            .collect()
    }

    /// Drop every stack for `path` (full removal by path string).
    pub fn remove_path(&self, path: &str) -> bool {
        self.stacks.write().remove(path).is_some()
    }

    /// Forget everything (full reload).
    pub fn clear(&self) {
        self.stacks.write().clear();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn frame(module_id: &str, marker: i64) -> OwnerFrame {
        OwnerFrame {
            module_id: module_id.to_string(),
            binding: Value::from(marker),
            metadata: None,
            keys: vec![],
            merged: false,
        }
    }

    #[test]
    fn test_rollback_chain() {
        let map = OwnershipMap::new();
        map.claim("feature", frame(CORE_MODULE, 0));
        map.claim("feature", frame("v1", 1));
        map.claim("feature", frame("v2", 2));
        assert_eq!(map.current_owner("feature").as_deref(), Some("v2"));

        match map.remove_owner("feature", "v2") {
            Removal::Restored(f) => assert_eq!(f.module_id, "v1"),
            other => panic!("expected Restored, got {other:?}"),
        }
        match map.remove_owner("feature", "v1") {
            Removal::Restored(f) => assert_eq!(f.module_id, CORE_MODULE),
            other => panic!("expected Restored, got {other:?}"),
        }
        match map.remove_owner("feature", CORE_MODULE) {
            Removal::PathEmpty => {}
            other => panic!("expected PathEmpty, got {other:?}"),
        }
        assert!(!map.is_tracked("feature"));
    }

    #[test]
    fn test_remove_non_current_keeps_visible_binding() {
        let map = OwnershipMap::new();
        map.claim("p", frame("a", 1));
        map.claim("p", frame("b", 2));
        map.claim("p", frame("c", 3));

        match map.remove_owner("p", "b") {
            Removal::DroppedNonCurrent => {}
            other => panic!("expected DroppedNonCurrent, got {other:?}"),
        }
        assert_eq!(map.current_owner("p").as_deref(), Some("c"));
        assert_eq!(map.owners("p").len(), 2);
    }

    #[test]
    fn test_reclaim_replaces_in_place() {
        let map = OwnershipMap::new();
        map.claim("p", frame("a", 1));
        map.claim("p", frame("b", 2));

        // "a" re-adds: its frame is replaced where it sits, "b" stays
        // current.
        let old = map.claim("p", frame("a", 10));
        assert_eq!(old.unwrap().binding, Value::from(1));
        assert_eq!(map.current_owner("p").as_deref(), Some("b"));

        // Removing "b" now exposes a's updated binding.
        match map.remove_owner("p", "b") {
            Removal::Restored(f) => assert_eq!(f.binding, Value::from(10)),
            other => panic!("expected Restored, got {other:?}"),
        }
    }

    #[test]
    fn test_remove_unknown_owner() {
        let map = OwnershipMap::new();
        map.claim("p", frame("a", 1));
        assert!(matches!(
            map.remove_owner("p", "ghost"),
            Removal::NotAnOwner
        ));
        assert!(matches!(
            map.remove_owner("missing", "a"),
            Removal::NotAnOwner
        ));
    }

    #[test]
    fn test_paths_owned_by() {
        let map = OwnershipMap::new();
        map.claim("x", frame("m", 1));
        map.claim("y", frame("m", 2));
        map.claim("z", frame("other", 3));
        let mut paths = map.paths_owned_by("m");
        paths.sort();
        assert_eq!(paths, vec!["x".to_string(), "y".to_string()]);
    }
}
