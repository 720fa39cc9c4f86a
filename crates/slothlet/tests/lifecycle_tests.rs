// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Lifecycle: reload identity guarantees, shutdown idempotence, reference
//! sidecars, and collection surfacing.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use serde_json::json;
use slothlet::value::Value;
use slothlet::{AddApiOptions, Mode, Runtime, SlothletConfig};
use slothlet_test_utils::{
    register_collections, register_feature, register_math, FixtureDir,
};
use std::sync::Arc;

fn hot(dir: &FixtureDir) -> SlothletConfig {
    SlothletConfig::new(dir.path()).mode(Mode::Eager).hot_reload(true)
}

#[tokio::test]
async fn test_reload_api_preserves_namespace_and_leaf_identity() {
    register_math("life_reload_math");
    let fix = FixtureDir::new();
    fix.dir("math").module("math/math.module", "life_reload_math");
    let api = slothlet::load(hot(&fix)).await.unwrap();

    let ns_before = match api.get("math").await.unwrap() {
        Value::Namespace(ns) => ns,
        other => panic!("expected namespace, got {other:?}"),
    };
    let add_before = match api.get("math.add").await.unwrap() {
        Value::Function(f) => f,
        other => panic!("expected function, got {other:?}"),
    };

    // Swap the registered module body, then reload the subtree.
    slothlet::loader::native::register("life_reload_math", || {
        slothlet::loader::ExportRecord::of_named([(
            "add".to_string(),
            slothlet::loader::callable(slothlet::value::sync_fn(|ctx| {
                let a = ctx.arg(0).as_i64().unwrap_or(0);
                let b = ctx.arg(1).as_i64().unwrap_or(0);
                Ok(Value::from((a + b) * 100))
            }))
            .into_node(),
        )])
    });
    api.reload_api("math").await.unwrap();

    let ns_after = match api.get("math").await.unwrap() {
        Value::Namespace(ns) => ns,
        other => panic!("expected namespace, got {other:?}"),
    };
    let add_after = match api.get("math.add").await.unwrap() {
        Value::Function(f) => f,
        other => panic!("expected function, got {other:?}"),
    };

    assert!(Arc::ptr_eq(&ns_before, &ns_after), "namespace identity survives");
    assert!(Arc::ptr_eq(&add_before, &add_after), "leaf identity survives");
    assert!(!ns_after.has("sub"), "exports dropped by the new body are gone");

    // The held (pre-reload) handle now runs the new body.
    let result = add_before
        .invoke(vec![Value::from(2), Value::from(3)])
        .await
        .unwrap();
    assert_eq!(result, Value::from(500));

    api.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_reload_api_of_missing_path_resolves_quietly() {
    register_math("life_missing_math");
    let fix = FixtureDir::new();
    fix.dir("math").module("math/math.module", "life_missing_math");
    let api = slothlet::load(hot(&fix)).await.unwrap();

    api.reload_api("no.such.subtree").await.unwrap();

    let err = api.reload_api("   ").await.unwrap_err();
    assert!(err.to_string().contains("non-whitespace"));

    api.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_reload_api_requires_hot_reload() {
    register_math("life_cold_math");
    let fix = FixtureDir::new();
    fix.dir("math").module("math/math.module", "life_cold_math");
    let api = slothlet::load(SlothletConfig::new(fix.path()).mode(Mode::Eager))
        .await
        .unwrap();

    let err = api.reload_api("math").await.unwrap_err();
    assert!(err.to_string().contains("hotReload must be enabled"));
    let err = api.reload().await.unwrap_err();
    assert!(err.to_string().contains("hotReload must be enabled"));

    api.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_full_reload_regenerates_id_and_replays_adds() {
    register_math("life_full_math");
    register_feature("life_full_feature", "overlay");
    let fix = FixtureDir::new();
    fix.dir("math").module("math/math.module", "life_full_math");
    let overlay = FixtureDir::new();
    overlay.module("feature.module", "life_full_feature");

    let api = slothlet::load(hot(&fix)).await.unwrap();
    let root_before = api.root();
    let id_before = api.instance_id();

    api.add_api(
        "feature",
        overlay.path(),
        json!({}),
        AddApiOptions::module("overlay"),
    )
    .await
    .unwrap();
    assert!(api.has("feature.doSomething").await.unwrap());

    api.reload().await.unwrap();

    assert_ne!(api.instance_id(), id_before, "reload regenerates the id");
    assert!(
        Arc::ptr_eq(&root_before, &api.root()),
        "root identity survives a full reload"
    );
    // Primary tree and replayed adds are both back.
    assert!(api.has("math.add").await.unwrap());
    assert!(api.has("feature.doSomething").await.unwrap());

    api.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_removed_paths_stay_removed_across_reload() {
    register_math("life_removed_math");
    let fix = FixtureDir::new();
    fix.dir("math").module("math/math.module", "life_removed_math");
    fix.json("settings.json", json!({"on": true}));

    let api = slothlet::load(hot(&fix)).await.unwrap();
    assert!(api.remove_api("settings").await.unwrap());

    api.reload().await.unwrap();

    assert!(api.has("math.add").await.unwrap());
    assert_eq!(
        api.get("settings").await.unwrap(),
        Value::Null,
        "a removed path must not resurrect on reload"
    );

    api.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_live_runtime_deep_handles_track_full_reload() {
    register_math("life_live_math");
    let fix = FixtureDir::new();
    fix.dir("math").module("math/math.module", "life_live_math");

    let api = slothlet::load(hot(&fix).runtime(Runtime::Live)).await.unwrap();
    let held = match api.get("math.add").await.unwrap() {
        Value::Function(f) => f,
        other => panic!("expected function, got {other:?}"),
    };

    slothlet::loader::native::register("life_live_math", || {
        slothlet::loader::ExportRecord::of_named([(
            "add".to_string(),
            slothlet::loader::callable(slothlet::value::sync_fn(|_| {
                Ok(Value::from(-1))
            }))
            .into_node(),
        )])
    });
    api.reload().await.unwrap();

    // The pre-reload handle follows the update in live runtime.
    let now = match api.get("math.add").await.unwrap() {
        Value::Function(f) => f,
        other => panic!("expected function, got {other:?}"),
    };
    assert!(Arc::ptr_eq(&held, &now));
    assert_eq!(held.invoke(vec![]).await.unwrap(), Value::from(-1));

    api.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_double_shutdown_is_a_no_op() {
    register_math("life_shutdown_math");
    let fix = FixtureDir::new();
    fix.dir("math").module("math/math.module", "life_shutdown_math");
    let api = slothlet::load(hot(&fix)).await.unwrap();

    api.shutdown().await.unwrap();
    assert!(api.is_shut_down());
    // The second call resolves without error and changes nothing.
    api.shutdown().await.unwrap();
    assert!(api.is_shut_down());
}

#[tokio::test]
async fn test_lazy_access_after_shutdown_fails() {
    register_math("life_lazy_shutdown_math");
    let fix = FixtureDir::new();
    fix.dir("math")
        .module("math/math.module", "life_lazy_shutdown_math");
    let api = slothlet::load(SlothletConfig::new(fix.path()).mode(Mode::Lazy))
        .await
        .unwrap();

    api.shutdown().await.unwrap();

    let err = api.get("math.add").await.unwrap_err();
    assert!(err.to_string().contains("shut down"));
}

#[tokio::test]
async fn test_reference_keys_surface_including_builtin_names() {
    register_math("life_ref_math");
    let fix = FixtureDir::new();
    fix.dir("math").module("math/math.module", "life_ref_math");

    // Keys that collide with non-writable builtins must still install.
    let api = slothlet::load(hot(&fix).reference(json!({
        "name": "sidecar",
        "length": 7,
        "prototype": {"kind": "obj"},
        "constructor": true,
        "caller": "outer",
        "arguments": [1, 2]
    })))
    .await
    .unwrap();

    assert_eq!(api.get("name").await.unwrap(), Value::from("sidecar"));
    assert_eq!(api.get("length").await.unwrap(), Value::from(7));
    assert_eq!(
        api.get("prototype.kind").await.unwrap(),
        Value::from("obj")
    );

    // Replacing the sidecar swaps the surfaced keys.
    api.set_reference(json!({"release": "beta"})).unwrap();
    assert_eq!(api.get("name").await.unwrap(), Value::Null);
    assert_eq!(api.get("release").await.unwrap(), Value::from("beta"));

    api.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_map_and_set_surface_directly() {
    register_collections("life_collections");
    let fix = FixtureDir::new();
    fix.dir("gear").module("gear/gear.module", "life_collections");
    let api = slothlet::load(hot(&fix)).await.unwrap();

    let map = match api.get("gear.devices").await.unwrap() {
        Value::Map(m) => m,
        other => panic!("expected map, got {other:?}"),
    };
    assert_eq!(map.size(), 2);
    assert!(map.has("tv"));
    assert_eq!(map.get("tv"), Some(Value::from("lg")));
    assert_eq!(map.keys(), vec!["tv".to_string(), "amp".to_string()]);
    assert_eq!(map.entries().len(), 2);
    let mut walked = 0;
    map.for_each(|_, _| walked += 1);
    assert_eq!(walked, 2);

    let set = match api.get("gear.tags").await.unwrap() {
        Value::Set(s) => s,
        other => panic!("expected set, got {other:?}"),
    };
    assert_eq!(set.size(), 2);
    assert!(set.has("alpha"));
    assert_eq!(set.values(), vec!["alpha".to_string(), "beta".to_string()]);

    // Surfaced directly: repeated access yields the same handle.
    let again = match api.get("gear.devices").await.unwrap() {
        Value::Map(m) => m,
        other => panic!("expected map, got {other:?}"),
    };
    assert!(Arc::ptr_eq(&map, &again));

    api.shutdown().await.unwrap();

    // Same surface under live bindings.
    let api = slothlet::load(hot(&fix).runtime(Runtime::Live)).await.unwrap();
    let map = match api.get("gear.devices").await.unwrap() {
        Value::Map(m) => m,
        other => panic!("expected map, got {other:?}"),
    };
    assert_eq!(map.size(), 2);
    assert_eq!(map.get("amp"), Some(Value::from("denon")));
    let set = match api.get("gear.tags").await.unwrap() {
        Value::Set(s) => s,
        other => panic!("expected set, got {other:?}"),
    };
    assert!(set.has("beta"));

    api.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_describe_reports_shape() {
    register_math("life_describe_math");
    let fix = FixtureDir::new();
    fix.dir("math").module("math/math.module", "life_describe_math");
    let api = slothlet::load(hot(&fix)).await.unwrap();

    let blob = api.describe();
    assert_eq!(blob["hotReload"], json!(true));
    assert_eq!(blob["shutDown"], json!(false));
    assert!(blob["keys"]
        .as_array()
        .unwrap()
        .contains(&json!("math")));
    assert_eq!(blob["instanceId"], json!(api.instance_id().to_string()));

    api.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_mutations_rejected_after_shutdown() {
    register_math("life_dead_math");
    let fix = FixtureDir::new();
    fix.dir("math").module("math/math.module", "life_dead_math");
    let overlay = FixtureDir::new();
    overlay.json("extra.json", json!(1));

    let api = slothlet::load(hot(&fix)).await.unwrap();
    api.shutdown().await.unwrap();

    let err = api
        .add_api("extra", overlay.path(), json!({}), AddApiOptions::default())
        .await
        .unwrap_err();
    assert!(err.to_string().contains("shut down"));

    let err = api.remove_api("math").await.unwrap_err();
    assert!(err.to_string().contains("shut down"));

    // A full reload from the shutdown state re-initializes the instance.
    api.reload().await.unwrap();
    assert!(api.has("math.add").await.unwrap());
    assert!(!api.is_shut_down());

    api.shutdown().await.unwrap();
}
