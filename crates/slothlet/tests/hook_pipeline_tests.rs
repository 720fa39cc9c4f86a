// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! The invocation pipeline end to end: argument rewriting, short-circuits,
//! after-chain composition, pattern addressing, and error delivery.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use slothlet::hooks::{sync_hook, HookOptions, HookPhase, HookVerdict};
use slothlet::loader::{self, native, ExportRecord};
use slothlet::value::{sync_fn, Value};
use slothlet::{HooksConfig, Mode, SlothletConfig};
use slothlet_test_utils::{register_failing, register_math, register_string, FixtureDir};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

fn eager(dir: &FixtureDir) -> SlothletConfig {
    SlothletConfig::new(dir.path()).mode(Mode::Eager)
}

async fn math_api(key: &str) -> (slothlet::BoundApi, FixtureDir) {
    register_math(key);
    let fix = FixtureDir::new();
    fix.dir("math").module("math/math.module", key);
    let api = slothlet::load(eager(&fix)).await.unwrap();
    (api, fix)
}

#[tokio::test]
async fn test_before_hook_rewrites_arguments() {
    // S1: a before hook doubling both args turns add(2, 3) into 10.
    let (api, _fix) = math_api("hook_s1_math").await;

    api.hooks()
        .on(
            HookPhase::Before,
            sync_hook(|event| {
                let a = event.args[0].as_i64().unwrap() * 2;
                let b = event.args[1].as_i64().unwrap() * 2;
                Ok(HookVerdict::Args(vec![Value::from(a), Value::from(b)]))
            }),
            HookOptions::pattern("math.add"),
        )
        .unwrap();

    let result = api
        .call("math.add", vec![Value::from(2), Value::from(3)])
        .await
        .unwrap();
    assert_eq!(result, Value::from(10));

    api.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_before_hook_short_circuits_and_skips_target() {
    // S2: a short-circuiting before hook returns 42 and the target never
    // runs.
    let calls = Arc::new(AtomicUsize::new(0));
    let calls_in_module = calls.clone();
    native::register("hook_s2_counter", move || {
        let calls = calls_in_module.clone();
        ExportRecord::of_named([(
            "add".to_string(),
            loader::callable(sync_fn(move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(Value::from(0))
            }))
            .into_node(),
        )])
    });

    let fix = FixtureDir::new();
    fix.dir("math").module("math/math.module", "hook_s2_counter");
    let api = slothlet::load(eager(&fix)).await.unwrap();

    api.hooks()
        .on(
            HookPhase::Before,
            sync_hook(|_| Ok(HookVerdict::ShortCircuit(Value::from(42)))),
            HookOptions::pattern("math.add"),
        )
        .unwrap();

    let result = api
        .call("math.add", vec![Value::from(2), Value::from(3)])
        .await
        .unwrap();
    assert_eq!(result, Value::from(42));
    assert_eq!(calls.load(Ordering::SeqCst), 0, "target must not be called");

    api.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_after_chain_composes_in_registration_order() {
    // S3: equal-priority after hooks compose from the innermost result
    // outward: ((5 * 2) + 10) negated = -20.
    let (api, _fix) = math_api("hook_s3_math").await;

    let transforms: Vec<Box<dyn Fn(i64) -> i64 + Send + Sync>> = vec![
        Box::new(|r| r * 2),
        Box::new(|r| r + 10),
        Box::new(|r| -r),
    ];
    for f in transforms {
        api.hooks()
            .on(
                HookPhase::After,
                sync_hook(move |event| {
                    let r = event.result.as_ref().unwrap().as_i64().unwrap();
                    Ok(HookVerdict::Replace(Value::from(f(r))))
                }),
                HookOptions::pattern("math.add"),
            )
            .unwrap();
    }

    let result = api
        .call("math.add", vec![Value::from(2), Value::from(3)])
        .await
        .unwrap();
    assert_eq!(result, Value::from(-20));

    api.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_before_subset_ordering_and_priority() {
    // before -> primary -> after subset order, priority desc inside each
    // subset, registration order breaking ties.
    let (api, _fix) = math_api("hook_order_math").await;
    let order = Arc::new(Mutex::new(Vec::new()));

    let register = |tag: &'static str, subset, priority| {
        let order = order.clone();
        api.hooks()
            .on(
                HookPhase::Before,
                sync_hook(move |_| {
                    order.lock().unwrap().push(tag);
                    Ok(HookVerdict::Pass)
                }),
                HookOptions::pattern("math.*")
                    .subset(subset)
                    .priority(priority),
            )
            .unwrap();
    };
    use slothlet::hooks::HookSubset;
    register("primary-low", HookSubset::Primary, 0);
    register("primary-high", HookSubset::Primary, 10);
    register("outer", HookSubset::Before, 0);
    register("inner", HookSubset::After, 0);

    api.call("math.add", vec![Value::from(1), Value::from(1)])
        .await
        .unwrap();
    assert_eq!(
        *order.lock().unwrap(),
        vec!["outer", "primary-high", "primary-low", "inner"]
    );

    api.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_brace_and_negation_patterns() {
    // S7: `{math,string}.*` observes both modules; `!math.*` observes only
    // the string call; an 11-deep brace pattern is rejected at
    // registration.
    register_math("hook_s7_math");
    register_string("hook_s7_string");
    let fix = FixtureDir::new();
    fix.dir("math").module("math/math.module", "hook_s7_math");
    fix.dir("string").module("string/string.module", "hook_s7_string");
    let api = slothlet::load(eager(&fix)).await.unwrap();

    let both = Arc::new(Mutex::new(Vec::new()));
    let negated = Arc::new(Mutex::new(Vec::new()));

    let seen = both.clone();
    api.hooks()
        .on(
            HookPhase::Before,
            sync_hook(move |event| {
                seen.lock().unwrap().push(event.path.clone());
                Ok(HookVerdict::Pass)
            }),
            HookOptions::pattern("{math,string}.*"),
        )
        .unwrap();

    let seen = negated.clone();
    api.hooks()
        .on(
            HookPhase::Before,
            sync_hook(move |event| {
                seen.lock().unwrap().push(event.path.clone());
                Ok(HookVerdict::Pass)
            }),
            HookOptions::pattern("!math.*"),
        )
        .unwrap();

    api.call("math.add", vec![Value::from(1), Value::from(2)])
        .await
        .unwrap();
    api.call("string.upper", vec![Value::from("hi")])
        .await
        .unwrap();

    assert_eq!(
        *both.lock().unwrap(),
        vec!["math.add".to_string(), "string.upper".to_string()]
    );
    assert_eq!(*negated.lock().unwrap(), vec!["string.upper".to_string()]);

    // Depth 11 fails at hooks.on time.
    let mut deep = String::from("a");
    for _ in 0..11 {
        deep = format!("{{{deep},x}}");
    }
    let err = api
        .hooks()
        .on(
            HookPhase::Before,
            sync_hook(|_| Ok(HookVerdict::Pass)),
            HookOptions::pattern(deep),
        )
        .unwrap_err();
    assert!(err
        .to_string()
        .contains("Brace expansion exceeds maximum nesting depth of 10"));

    api.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_error_hooks_see_source_frame_and_error_rethrows() {
    register_failing("hook_err_module", "backend unavailable");
    let fix = FixtureDir::new();
    fix.dir("svc").module("svc/svc.module", "hook_err_module");
    let api = slothlet::load(eager(&fix)).await.unwrap();

    let frames = Arc::new(Mutex::new(Vec::new()));
    let seen = frames.clone();
    api.hooks()
        .on(
            HookPhase::Error,
            sync_hook(move |event| {
                let source = event.error.clone().unwrap();
                seen.lock().unwrap().push(source);
                Ok(HookVerdict::Pass)
            }),
            HookOptions::pattern("svc.**"),
        )
        .unwrap();

    let err = api.call("svc.explode", vec![]).await.unwrap_err();
    assert!(err.to_string().contains("backend unavailable"));

    let frames = frames.lock().unwrap();
    assert_eq!(frames.len(), 1);
    assert_eq!(frames[0].stage, slothlet::hooks::PipelineStage::Function);
    assert!(frames[0].message.contains("backend unavailable"));

    api.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_suppress_errors_returns_null_and_runs_always() {
    register_failing("hook_suppress_module", "boom");
    let fix = FixtureDir::new();
    fix.dir("svc").module("svc/svc.module", "hook_suppress_module");
    let api = slothlet::load(
        SlothletConfig::new(fix.path())
            .mode(Mode::Eager)
            .hooks(HooksConfig {
                enabled: true,
                pattern: None,
                suppress_errors: true,
            }),
    )
    .await
    .unwrap();

    let always_saw_error = Arc::new(Mutex::new(None));
    let seen = always_saw_error.clone();
    api.hooks()
        .on(
            HookPhase::Always,
            sync_hook(move |event| {
                *seen.lock().unwrap() = Some((event.has_error, event.errors.clone()));
                Ok(HookVerdict::Pass)
            }),
            HookOptions::pattern("svc.**"),
        )
        .unwrap();

    let result = api.call("svc.explode", vec![]).await.unwrap();
    assert_eq!(result, Value::Null, "suppressed failure yields null");

    let (has_error, errors) = always_saw_error.lock().unwrap().clone().unwrap();
    assert!(has_error);
    assert!(errors.iter().any(|m| m.contains("boom")));

    api.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_always_hooks_run_on_success_and_their_errors_stay_inside() {
    let (api, _fix) = math_api("hook_always_math").await;

    let always_runs = Arc::new(AtomicUsize::new(0));
    let error_hook_runs = Arc::new(AtomicUsize::new(0));

    let runs = always_runs.clone();
    api.hooks()
        .on(
            HookPhase::Always,
            sync_hook(move |_| {
                runs.fetch_add(1, Ordering::SeqCst);
                Err(slothlet::Error::Module("always hiccup".to_string()))
            }),
            HookOptions::pattern("math.*"),
        )
        .unwrap();

    let runs = error_hook_runs.clone();
    api.hooks()
        .on(
            HookPhase::Error,
            sync_hook(move |_| {
                runs.fetch_add(1, Ordering::SeqCst);
                Ok(HookVerdict::Pass)
            }),
            HookOptions::pattern("math.*"),
        )
        .unwrap();

    // The call succeeds even though the always hook raised; the error
    // was delivered to the error hooks instead of the caller.
    let result = api
        .call("math.add", vec![Value::from(3), Value::from(4)])
        .await
        .unwrap();
    assert_eq!(result, Value::from(7));
    assert_eq!(always_runs.load(Ordering::SeqCst), 1);
    assert_eq!(error_hook_runs.load(Ordering::SeqCst), 1);

    api.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_disable_and_enable_gate_the_pipeline() {
    let (api, _fix) = math_api("hook_gate_math").await;

    let fired = Arc::new(AtomicUsize::new(0));
    let count = fired.clone();
    api.hooks()
        .on(
            HookPhase::Before,
            sync_hook(move |_| {
                count.fetch_add(1, Ordering::SeqCst);
                Ok(HookVerdict::Pass)
            }),
            HookOptions::pattern("math.*"),
        )
        .unwrap();

    api.hooks().disable();
    api.call("math.add", vec![Value::from(1), Value::from(1)])
        .await
        .unwrap();
    assert_eq!(fired.load(Ordering::SeqCst), 0);

    // Re-enable narrowed to a pattern that does not cover math.
    api.hooks().enable(Some("string.**")).unwrap();
    api.call("math.add", vec![Value::from(1), Value::from(1)])
        .await
        .unwrap();
    assert_eq!(fired.load(Ordering::SeqCst), 0);

    api.hooks().enable(None).unwrap();
    api.call("math.add", vec![Value::from(1), Value::from(1)])
        .await
        .unwrap();
    assert_eq!(fired.load(Ordering::SeqCst), 1);

    api.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_cached_leaf_handle_still_runs_hooks() {
    // A consumer-held function handle goes through the same pipeline as a
    // path-addressed call.
    let (api, _fix) = math_api("hook_cached_math").await;

    api.hooks()
        .on(
            HookPhase::After,
            sync_hook(|event| {
                let r = event.result.as_ref().unwrap().as_i64().unwrap();
                Ok(HookVerdict::Replace(Value::from(r + 100)))
            }),
            HookOptions::pattern("math.add"),
        )
        .unwrap();

    let handle = match api.get("math.add").await.unwrap() {
        Value::Function(f) => f,
        other => panic!("expected function, got {other:?}"),
    };
    let result = handle
        .invoke(vec![Value::from(1), Value::from(1)])
        .await
        .unwrap();
    assert_eq!(result, Value::from(102));

    api.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_hook_list_reports_registrations() {
    let (api, _fix) = math_api("hook_list_math").await;

    api.hooks()
        .on(
            HookPhase::Before,
            sync_hook(|_| Ok(HookVerdict::Pass)),
            HookOptions::pattern("math.*").id("listed"),
        )
        .unwrap();

    let listing = api.hooks().list(None);
    assert_eq!(listing.registered_hooks.len(), 1);
    assert_eq!(listing.registered_hooks[0].id, "listed");
    assert_eq!(listing.registered_hooks[0].pattern, "math.*");

    assert!(api
        .hooks()
        .list(Some(HookPhase::After))
        .registered_hooks
        .is_empty());

    api.shutdown().await.unwrap();
}
