// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Native module registry and its decoder.
//!
//! A statically compiled host cannot load new code from a directory, so the
//! host-native module format splits in two: code registers an
//! [`ExportRecord`] factory under a key, and a `.module` file in the loaded
//! directory selects that key. The file's trimmed contents name the key; an
//! empty file selects its own file stem. The registry is process-wide and
//! append-or-replace, mirroring how instances themselves are registered.

use super::{ExportRecord, ModuleDecoder};
use async_trait::async_trait;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use std::path::Path;
use std::sync::Arc;

/// Builds a fresh export record each time the module is (re)loaded.
pub type ModuleFactory = Arc<dyn Fn() -> ExportRecord + Send + Sync>;

static REGISTRY: Lazy<DashMap<String, ModuleFactory>> = Lazy::new(DashMap::new);

/// Register (or replace) a native module factory under `key`.
pub fn register<F>(key: impl Into<String>, factory: F)
where
    F: Fn() -> ExportRecord + Send + Sync + 'static,
{
    let key = key.into();
    tracing::debug!(key = %key, "registering native module");
    REGISTRY.insert(key, Arc::new(factory));
}

/// Remove a native module factory. Returns whether it existed.
pub fn unregister(key: &str) -> bool {
    REGISTRY.remove(key).is_some()
}

/// True when `key` has a registered factory.
pub fn is_registered(key: &str) -> bool {
    REGISTRY.contains_key(key)
}

fn resolve(key: &str) -> Option<ModuleFactory> {
    REGISTRY.get(key).map(|entry| entry.value().clone())
}

/// Decodes `.module` files by consulting the native module registry.
#[derive(Debug, Default, Clone, Copy)]
pub struct NativeDecoder;

#[async_trait]
impl ModuleDecoder for NativeDecoder {
    fn extensions(&self) -> &[&str] {
        &["module"]
    }

    async fn decode(&self, path: &Path) -> crate::Result<ExportRecord> {
        let contents = tokio::fs::read_to_string(path).await?;
        let key = match contents.trim() {
            "" => path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default()
                .to_string(),
            named => named.to_string(),
        };

        let factory = resolve(&key).ok_or_else(|| {
            crate::Error::Access(format!(
                "native module '{key}' referenced by '{}' is not registered",
                path.display()
            ))
        })?;
        Ok(factory())
    }
}
