// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Per-request context - the task-local store behind `api.run` / `api.scope`.
//!
//! A context frame is pushed for the duration of one callback's future and
//! is visible to the whole continuation chain: awaited calls, hook
//! handlers, and listeners registered on instrumented emitters while the
//! frame was active. Frames are keyed by instance id so instances sharing
//! one task never observe each other's request context, and concurrent
//! tasks are isolated by construction - each `scope` call owns its frame
//! map.

use crate::config::MergeStrategy;
use serde_json::Value as Json;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use uuid::Uuid;

/// Effective request contexts, one per instance with an active `run`.
pub type ContextFrames = Arc<HashMap<Uuid, Json>>;

tokio::task_local! {
    static FRAMES: ContextFrames;
}

/// The effective request context for `instance`, if a `run`/`scope` is
/// active on the current task.
pub fn active(instance: Uuid) -> Option<Json> {
    FRAMES
        .try_with(|frames| frames.get(&instance).cloned())
        .ok()
        .flatten()
}

/// Snapshot of every active frame, for propagation into listeners
/// registered while a store is live. `None` when no `run` is active.
pub fn capture() -> Option<ContextFrames> {
    FRAMES.try_with(Arc::clone).ok()
}

/// Run `fut` with a previously captured frame snapshot restored.
pub async fn restore<F: Future>(frames: ContextFrames, fut: F) -> F::Output {
    FRAMES.scope(frames, fut).await
}

/// Run `fut` with `merged` installed as the effective request context for
/// `instance`. Frames of other instances (and the parent frame of this
/// one, already folded into `merged` by the caller) are carried along.
pub async fn enter<F: Future>(instance: Uuid, merged: Json, fut: F) -> F::Output {
    let mut frames: HashMap<Uuid, Json> = match capture() {
        Some(existing) => (*existing).clone(),
        None => HashMap::new(),
    };
    frames.insert(instance, merged);
    FRAMES.scope(Arc::new(frames), fut).await
}

/// Merge `overlay` onto `base` under the given strategy.
pub fn merge(base: &Json, overlay: &Json, strategy: MergeStrategy) -> Json {
    match strategy {
        MergeStrategy::Shallow => merge_shallow(base, overlay),
        MergeStrategy::Deep => merge_deep(base, overlay),
    }
}

/// `{...base, ...overlay}`: top-level keys replace wholesale.
fn merge_shallow(base: &Json, overlay: &Json) -> Json {
    match (base, overlay) {
        (Json::Object(b), Json::Object(o)) => {
            let mut out = b.clone();
            for (k, v) in o {
                out.insert(k.clone(), v.clone());
            }
            Json::Object(out)
        }
        _ => overlay.clone(),
    }
}

/// Recursive object-by-object merge; arrays and primitives replace whole.
fn merge_deep(base: &Json, overlay: &Json) -> Json {
    match (base, overlay) {
        (Json::Object(b), Json::Object(o)) => {
            let mut out = b.clone();
            for (k, v) in o {
                let merged = match out.get(k) {
                    Some(existing) => merge_deep(existing, v),
                    None => v.clone(),
                };
                out.insert(k.clone(), merged);
            }
            Json::Object(out)
        }
        _ => overlay.clone(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_shallow_merge_replaces_top_level() {
        let base = json!({"app": "x", "nested": {"a": 1, "b": 2}});
        let overlay = json!({"nested": {"a": 9}});
        let merged = merge(&base, &overlay, MergeStrategy::Shallow);
        assert_eq!(merged, json!({"app": "x", "nested": {"a": 9}}));
    }

    #[test]
    fn test_deep_merge_recurses_objects() {
        let base = json!({"app": "x", "nested": {"a": 1, "b": 2}});
        let overlay = json!({"nested": {"a": 9}});
        let merged = merge(&base, &overlay, MergeStrategy::Deep);
        assert_eq!(merged, json!({"app": "x", "nested": {"a": 9, "b": 2}}));
    }

    #[test]
    fn test_deep_merge_replaces_arrays_whole() {
        let base = json!({"list": [1, 2, 3]});
        let overlay = json!({"list": [9]});
        let merged = merge(&base, &overlay, MergeStrategy::Deep);
        assert_eq!(merged, json!({"list": [9]}));
    }

    #[tokio::test]
    async fn test_enter_and_active() {
        let instance = Uuid::new_v4();
        assert!(active(instance).is_none());

        enter(instance, json!({"requestId": "r1"}), async move {
            assert_eq!(active(instance), Some(json!({"requestId": "r1"})));
        })
        .await;

        assert!(active(instance).is_none());
    }

    #[tokio::test]
    async fn test_frames_isolated_per_instance() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        enter(a, json!({"who": "a"}), async move {
            assert!(active(b).is_none());
            enter(b, json!({"who": "b"}), async move {
                // Both frames visible, each under its own instance.
                assert_eq!(active(a), Some(json!({"who": "a"})));
                assert_eq!(active(b), Some(json!({"who": "b"})));
            })
            .await;
        })
        .await;
    }

    #[tokio::test]
    async fn test_concurrent_tasks_do_not_leak() {
        let instance = Uuid::new_v4();
        let t1 = tokio::spawn(enter(instance, json!({"r": 1}), async move {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            active(instance)
        }));
        let t2 = tokio::spawn(enter(instance, json!({"r": 2}), async move {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            active(instance)
        }));

        assert_eq!(t1.await.unwrap(), Some(json!({"r": 1})));
        assert_eq!(t2.await.unwrap(), Some(json!({"r": 2})));
    }

    #[tokio::test]
    async fn test_capture_restore_round_trip() {
        let instance = Uuid::new_v4();
        let captured = enter(instance, json!({"k": "v"}), async { capture() }).await;
        let captured = captured.unwrap();

        // Outside the scope nothing is active...
        assert!(active(instance).is_none());
        // ...until the captured frames are restored.
        restore(captured, async move {
            assert_eq!(active(instance), Some(json!({"k": "v"})));
        })
        .await;
    }
}
