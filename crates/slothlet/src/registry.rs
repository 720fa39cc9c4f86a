// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Instance state and the process-wide instance registry - the L7 layer.
//!
//! One process may host many bound APIs. Each lives in an
//! [`InstanceCore`]: the root namespace (whose identity never changes),
//! the hook manager, ownership stacks, recorded mutations for reload
//! replay, and tracked emitter listeners. The registry maps live instance
//! ids to cores; it is append-on-create, delete-on-shutdown, and it is the
//! only state shared between instances.

use crate::config::{Mode, Runtime, ScopeConfig, SlothletConfig};
use crate::emitter::EmitterInner;
use crate::hooks::HookManager;
use crate::loader::DecoderSet;
use crate::ownership::OwnershipMap;
use crate::sanitize::SanitizeRules;
use crate::value::{FunctionHandle, Namespace, NamespaceHandle};
use dashmap::DashMap;
use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};
use serde_json::Value as Json;
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use uuid::Uuid;

static INSTANCES: Lazy<DashMap<Uuid, Arc<InstanceCore>>> = Lazy::new(DashMap::new);

pub(crate) fn register(core: &Arc<InstanceCore>) {
    INSTANCES.insert(core.instance_id(), core.clone());
}

pub(crate) fn unregister(id: Uuid) {
    INSTANCES.remove(&id);
}

pub(crate) fn lookup(id: Uuid) -> Option<Arc<InstanceCore>> {
    INSTANCES.get(&id).map(|e| e.value().clone())
}

/// Number of live instances in this process.
pub fn instance_count() -> usize {
    INSTANCES.len()
}

/// One `add_api` operation, recorded so a full reload can replay it.
#[derive(Debug, Clone)]
pub(crate) struct RecordedAdd {
    pub api_path: String,
    pub dir: PathBuf,
    pub metadata: Json,
    pub options: crate::api::AddApiOptions,
}

/// Everything one bound API owns.
pub struct InstanceCore {
    id: RwLock<Uuid>,
    pub(crate) dir: PathBuf,
    pub(crate) mode: Mode,
    pub(crate) runtime: Runtime,
    pub(crate) hot_reload: bool,
    pub(crate) allow_api_overwrite: bool,
    pub(crate) api_depth: Option<usize>,
    pub(crate) scope: ScopeConfig,
    pub(crate) debug: bool,
    pub(crate) sanitize: SanitizeRules,
    pub(crate) decoders: DecoderSet,

    pub(crate) base_context: RwLock<Json>,
    pub(crate) reference: RwLock<Json>,

    /// The root of the bound tree. Identity is the consumer contract:
    /// never replaced, only mutated in place.
    pub(crate) root: NamespaceHandle,
    /// Callable the root folder itself flattened into, if any.
    pub(crate) root_callable: RwLock<Option<FunctionHandle>>,
    /// Sanitized mount segment of the root directory.
    pub(crate) root_mount: String,

    pub(crate) hooks: HookManager,
    pub(crate) ownership: OwnershipMap,

    /// api path -> source directory, for `reload_api`.
    pub(crate) sources: DashMap<String, PathBuf>,
    pub(crate) recorded_adds: Mutex<Vec<RecordedAdd>>,
    pub(crate) removed_paths: Mutex<BTreeSet<String>>,

    tracked_listeners: Mutex<Vec<(Weak<EmitterInner>, Uuid)>>,
    shut_down: AtomicBool,

    /// `reload` takes the write side; every other mutation the read side.
    pub(crate) mutation_lock: tokio::sync::RwLock<()>,
    /// Per-path in-flight serialization for add/remove/reload_api.
    path_locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
}

impl InstanceCore {
    pub(crate) fn new(config: SlothletConfig, root_mount: String) -> crate::Result<Arc<Self>> {
        let hooks = HookManager::new(&config.hooks)?;
        let core = Arc::new(Self {
            id: RwLock::new(Uuid::new_v4()),
            dir: config.dir,
            mode: config.mode,
            runtime: config.runtime,
            hot_reload: config.hot_reload,
            allow_api_overwrite: config.allow_api_overwrite,
            api_depth: config.api_depth,
            scope: config.scope,
            debug: config.debug,
            sanitize: config.sanitize,
            decoders: config.decoders,
            base_context: RwLock::new(config.context),
            reference: RwLock::new(config.reference),
            root: Namespace::new(),
            root_callable: RwLock::new(None),
            root_mount,
            hooks,
            ownership: OwnershipMap::new(),
            sources: DashMap::new(),
            recorded_adds: Mutex::new(Vec::new()),
            removed_paths: Mutex::new(BTreeSet::new()),
            tracked_listeners: Mutex::new(Vec::new()),
            shut_down: AtomicBool::new(false),
            mutation_lock: tokio::sync::RwLock::new(()),
            path_locks: DashMap::new(),
        });
        register(&core);
        Ok(core)
    }

    /// Current instance id (regenerated by a full reload).
    pub fn instance_id(&self) -> Uuid {
        *self.id.read()
    }

    /// Swap in a fresh id and move the registry entry over.
    pub(crate) fn regenerate_id(self: &Arc<Self>) -> Uuid {
        let old = *self.id.read();
        let fresh = Uuid::new_v4();
        *self.id.write() = fresh;
        unregister(old);
        register(self);
        fresh
    }

    /// Has `shutdown` completed on this instance?
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    pub(crate) fn ensure_alive(&self) -> crate::Result<()> {
        if self.is_shut_down() {
            return Err(crate::Error::configuration(format!(
                "instance {} is shut down",
                self.instance_id()
            )));
        }
        Ok(())
    }

    /// Effective context: the active request frame if one is live on this
    /// task, the base context otherwise.
    pub fn effective_context(&self) -> Json {
        crate::context::active(self.instance_id())
            .unwrap_or_else(|| self.base_context.read().clone())
    }

    pub(crate) fn track_listener(&self, emitter: Weak<EmitterInner>, listener: Uuid) {
        self.tracked_listeners.lock().push((emitter, listener));
    }

    /// Detach every listener this instance's stores wrapped.
    pub(crate) fn remove_tracked_listeners(&self) {
        let tracked = std::mem::take(&mut *self.tracked_listeners.lock());
        for (emitter, listener) in tracked {
            if let Some(emitter) = emitter.upgrade() {
                emitter.remove_listener(listener);
            }
        }
    }

    /// Mark shut down; returns whether this call did the work.
    pub(crate) fn mark_shut_down(&self) -> bool {
        !self.shut_down.swap(true, Ordering::AcqRel)
    }

    /// Bring a shut-down instance back for re-initialization (`reload`
    /// from a shutdown state is permitted).
    pub(crate) fn revive(&self) {
        self.shut_down.store(false, Ordering::Release);
    }

    pub(crate) fn path_lock(&self, path: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.path_locks
            .entry(path.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .value()
            .clone()
    }

    /// Remaining depth budget for a subtree rooted `at_depth` levels below
    /// the mount.
    pub(crate) fn depth_remaining(&self, at_depth: usize) -> Option<usize> {
        self.api_depth.map(|limit| limit.saturating_sub(at_depth))
    }
}

impl std::fmt::Debug for InstanceCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceCore")
            .field("instance_id", &self.instance_id())
            .field("dir", &self.dir)
            .field("mode", &self.mode)
            .field("runtime", &self.runtime)
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}
