// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Shared fixtures for slothlet integration tests.
//!
//! Two pieces: [`FixtureDir`], a scratch API directory builder backed by a
//! tempdir, and a set of canned native modules (math, string ops, config,
//! feature variants) that the end-to-end scenarios mount via `.module`
//! files.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use slothlet::loader::{self, native, ExportRecord};
use slothlet::value::{sync_fn, ApiMap, ApiSet, Value};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// A scratch directory that builds up an on-disk API tree.
pub struct FixtureDir {
    tempdir: TempDir,
}

impl Default for FixtureDir {
    fn default() -> Self {
        Self::new()
    }
}

impl FixtureDir {
    /// Fresh empty fixture directory.
    pub fn new() -> Self {
        Self {
            tempdir: tempfile::tempdir().expect("create fixture tempdir"),
        }
    }

    /// Root of the fixture tree.
    pub fn path(&self) -> &Path {
        self.tempdir.path()
    }

    /// Absolute path of a relative entry.
    pub fn join(&self, rel: &str) -> PathBuf {
        self.tempdir.path().join(rel)
    }

    /// Create a (possibly nested) subdirectory.
    pub fn dir(&self, rel: &str) -> &Self {
        std::fs::create_dir_all(self.join(rel)).expect("create fixture dir");
        self
    }

    /// Write a JSON data file.
    pub fn json(&self, rel: &str, value: serde_json::Value) -> &Self {
        self.ensure_parent(rel);
        std::fs::write(self.join(rel), value.to_string()).expect("write fixture json");
        self
    }

    /// Write a TOML data file from raw source.
    pub fn toml(&self, rel: &str, source: &str) -> &Self {
        self.ensure_parent(rel);
        std::fs::write(self.join(rel), source).expect("write fixture toml");
        self
    }

    /// Write a `.module` file selecting a native registry key. Pass an
    /// empty key to select the file stem.
    pub fn module(&self, rel: &str, key: &str) -> &Self {
        self.ensure_parent(rel);
        std::fs::write(self.join(rel), key).expect("write fixture module");
        self
    }

    fn ensure_parent(&self, rel: &str) {
        if let Some(parent) = self.join(rel).parent() {
            std::fs::create_dir_all(parent).expect("create fixture parent dir");
        }
    }
}

/// Register a math module: named exports `add(a, b)` and `sub(a, b)`.
pub fn register_math(key: &str) {
    native::register(key, || {
        ExportRecord::of_named([
            (
                "add".to_string(),
                function(|ctx| {
                    let a = ctx.arg(0).as_i64().unwrap_or(0);
                    let b = ctx.arg(1).as_i64().unwrap_or(0);
                    Ok(Value::from(a + b))
                }),
            ),
            (
                "sub".to_string(),
                function(|ctx| {
                    let a = ctx.arg(0).as_i64().unwrap_or(0);
                    let b = ctx.arg(1).as_i64().unwrap_or(0);
                    Ok(Value::from(a - b))
                }),
            ),
        ])
    });
}

/// Register a string module: named exports `upper(s)` and `lower(s)`.
pub fn register_string(key: &str) {
    native::register(key, || {
        ExportRecord::of_named([
            (
                "upper".to_string(),
                function(|ctx| {
                    let s = ctx.arg(0).as_str().unwrap_or_default().to_uppercase();
                    Ok(Value::from(s))
                }),
            ),
            (
                "lower".to_string(),
                function(|ctx| {
                    let s = ctx.arg(0).as_str().unwrap_or_default().to_lowercase();
                    Ok(Value::from(s))
                }),
            ),
        ])
    });
}

/// Register a config-style module: `getConfig`, `setConfig`,
/// `validateConfig` named exports.
pub fn register_config(key: &str) {
    native::register(key, || {
        ExportRecord::of_named([
            (
                "getConfig".to_string(),
                function(|_| Ok(Value::data(serde_json::json!({"theme": "dark"})))),
            ),
            (
                "setConfig".to_string(),
                function(|_| Ok(Value::from(true))),
            ),
            (
                "validateConfig".to_string(),
                function(|_| Ok(Value::from(true))),
            ),
        ])
    });
}

/// Register a feature module whose `doSomething` reports `"<tag>-impl"`.
pub fn register_feature(key: &str, tag: &str) {
    let tag = tag.to_string();
    native::register(key, move || {
        let tag = tag.clone();
        ExportRecord::of_named([(
            "doSomething".to_string(),
            function(move |_| Ok(Value::from(format!("{tag}-impl")))),
        )])
    });
}

/// Register a callable module: a default function plus a `version` named
/// export.
pub fn register_callable(key: &str, answer: i64) {
    native::register(key, move || {
        loader::callable(sync_fn(move |_| Ok(Value::from(answer))))
            .with_named("version", Value::from("1.0"))
    });
}

/// Register a module exporting a `Map` and a `Set` as named exports.
pub fn register_collections(key: &str) {
    native::register(key, || {
        let map = ApiMap::from_pairs([
            ("tv".to_string(), Value::from("lg")),
            ("amp".to_string(), Value::from("denon")),
        ]);
        let set = ApiSet::from_items(["alpha".to_string(), "beta".to_string()]);
        ExportRecord::of_named([
            ("devices".to_string(), Value::Map(map)),
            ("tags".to_string(), Value::Set(set)),
        ])
    });
}

/// Register a module whose only export always fails with `message`.
pub fn register_failing(key: &str, message: &str) {
    let message = message.to_string();
    native::register(key, move || {
        let message = message.clone();
        ExportRecord::of_named([(
            "explode".to_string(),
            function(move |_| Err(slothlet::Error::Module(message.clone()))),
        )])
    });
}

/// Register a module that echoes the effective request context.
pub fn register_context_probe(key: &str) {
    native::register(key, || {
        ExportRecord::of_named([(
            "read".to_string(),
            function(|ctx| Ok(Value::Data(ctx.context.clone()))),
        )])
    });
}

fn function<F>(f: F) -> Value
where
    F: Fn(slothlet::value::FnCtx) -> slothlet::Result<Value> + Send + Sync + 'static,
{
    loader::callable(sync_fn(f)).into_node()
}
