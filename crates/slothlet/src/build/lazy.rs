// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Lazy placeholders - subtrees that materialize on first use.
//!
//! A placeholder stands in for a folder node. Its first use runs discovery
//! and loading for the folder, mounts the result, splices the real value
//! into the parent slot under the same key, and answers from it;
//! subsequent access goes straight to the materialized node. Failure
//! leaves the slot holding the placeholder so a later access can retry.
//! First-level subfolders of a materialized folder are themselves
//! placeholders, so cost stays proportional to what the consumer touches.

use crate::discovery::{discover, DiscoverOptions};
use crate::registry::InstanceCore;
use crate::value::{FunctionHandle, NamespaceHandle, Value};
use std::path::PathBuf;
use std::sync::{Arc, Weak};

/// Where a placeholder splices its materialized value.
#[derive(Clone)]
pub(crate) enum ParentSlot {
    Namespace(NamespaceHandle),
    Function(FunctionHandle),
}

impl ParentSlot {
    fn install(&self, segment: &str, value: Value) {
        match self {
            ParentSlot::Namespace(ns) => {
                ns.insert(segment, value);
            }
            ParentSlot::Function(f) => f.set_prop(segment, value),
        }
    }
}

/// An un-materialized subtree.
pub struct Placeholder {
    dir: PathBuf,
    api_path: String,
    segment: String,
    slot: ParentSlot,
    instance: Weak<InstanceCore>,
    depth: usize,
    state: tokio::sync::Mutex<Option<Value>>,
}

impl Placeholder {
    pub(crate) fn new(
        dir: PathBuf,
        api_path: String,
        segment: String,
        slot: ParentSlot,
        instance: Weak<InstanceCore>,
        depth: usize,
    ) -> Arc<Self> {
        Arc::new(Self {
            dir,
            api_path,
            segment,
            slot,
            instance,
            depth,
            state: tokio::sync::Mutex::new(None),
        })
    }

    /// The dot path this placeholder will occupy.
    pub fn api_path(&self) -> String {
        self.api_path.clone()
    }

    /// Has this placeholder already been materialized?
    pub fn is_materialized(&self) -> bool {
        self.state
            .try_lock()
            .map(|state| state.is_some())
            .unwrap_or(false)
    }

    /// Materialize the subtree (idempotent) and return the real value.
    pub async fn materialize(&self) -> crate::Result<Value> {
        let mut state = self.state.lock().await;
        if let Some(value) = state.as_ref() {
            return Ok(value.clone());
        }

        let instance = self.instance.upgrade().ok_or_else(|| {
            crate::Error::configuration(format!(
                "cannot materialize '{}': instance is shut down",
                self.api_path
            ))
        })?;
        instance.ensure_alive().map_err(|_| {
            crate::Error::configuration(format!(
                "cannot materialize '{}': instance is shut down",
                self.api_path
            ))
        })?;

        if instance.debug {
            tracing::debug!(path = %self.api_path, dir = %self.dir.display(), "materializing lazy subtree");
        }

        let value = self
            .load(&instance)
            .await
            .map_err(|source| crate::Error::Materialization {
                path: self.api_path.clone(),
                source: Box::new(source),
            })?;

        // Atomic splice: the parent slot flips from placeholder to value
        // under the parent's own lock; every later read goes direct.
        self.slot.install(&self.segment, value.clone());
        *state = Some(value.clone());
        Ok(value)
    }

    async fn load(&self, instance: &Arc<InstanceCore>) -> crate::Result<Value> {
        let options = DiscoverOptions {
            sanitize: &instance.sanitize,
            decoders: &instance.decoders,
            api_depth: instance.depth_remaining(self.depth),
        };
        let node = discover(&self.dir, &self.segment, &options)?;
        let value = super::assemble(&node, &self.api_path, instance, true, self.depth).await?;
        super::mount(&value, &self.api_path, instance);
        Ok(value)
    }
}

impl std::fmt::Debug for Placeholder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Placeholder")
            .field("api_path", &self.api_path)
            .field("dir", &self.dir)
            .field("materialized", &self.is_materialized())
            .finish()
    }
}
