// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! The bound API façade - the L4 control plane.
//!
//! [`BoundApi`] is the single handle the factory returns. Consumer-facing
//! access goes through `get`/`call`/`keys`/`has` (the dot-path rendition of
//! property access and invocation); the control plane is `hooks()`,
//! `add_api`, `remove_api`, `reload_api`, `reload`, `run`, `scope`,
//! `context`, `reference`, `describe`, `shutdown`. The handle is cheap to
//! clone and every clone addresses the same instance.

use crate::build::{self, rebind};
use crate::config::{MergeStrategy, SlothletConfig};
use crate::context;
use crate::discovery::{discover, DirNode, DiscoverOptions};
use crate::hooks::HookManager;
use crate::ownership::{OwnerFrame, Removal, CORE_MODULE};
use crate::registry::{self, InstanceCore, RecordedAdd};
use crate::sanitize::segment;
use crate::value::{FunctionHandle, Namespace, NamespaceHandle, Value};
use serde_json::Value as Json;
use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

/// Environment variable gating the private introspection surface.
const INTERNAL_TEST_MODE: &str = "SLOTHLET_INTERNAL_TEST_MODE";

/// Options accepted by [`BoundApi::add_api`].
#[derive(Debug, Clone, Default)]
pub struct AddApiOptions {
    /// Owner id recorded on the ownership stack. Requires `hotReload`.
    pub module_id: Option<String>,
    /// Replace a path another module owns. Requires `hotReload`.
    pub force_overwrite: bool,
    /// Merge into an existing namespace at the mount instead of replacing
    /// the binding; both contributors then own the path.
    pub mutate_existing: bool,
}

impl AddApiOptions {
    /// Options carrying just a module id.
    pub fn module(module_id: impl Into<String>) -> Self {
        Self {
            module_id: Some(module_id.into()),
            ..Self::default()
        }
    }

    /// Enable force overwrite.
    #[must_use]
    pub fn force_overwrite(mut self) -> Self {
        self.force_overwrite = true;
        self
    }

    /// Enable merge-into-existing.
    #[must_use]
    pub fn mutate_existing(mut self) -> Self {
        self.mutate_existing = true;
        self
    }
}

/// Target of a [`BoundApi::remove_api`] call: a path string or an owner
/// module id.
#[derive(Debug, Clone)]
pub enum RemoveSpec {
    /// Remove whatever is bound at this path.
    Path(String),
    /// Remove every claim this module holds.
    ModuleId(String),
}

impl RemoveSpec {
    /// Removal by owner module id.
    pub fn module(module_id: impl Into<String>) -> Self {
        RemoveSpec::ModuleId(module_id.into())
    }
}

impl From<&str> for RemoveSpec {
    fn from(path: &str) -> Self {
        RemoveSpec::Path(path.to_string())
    }
}

impl From<String> for RemoveSpec {
    fn from(path: String) -> Self {
        RemoveSpec::Path(path)
    }
}

/// Options for [`BoundApi::scope`], the object form of `run`.
#[derive(Debug, Clone)]
pub struct ScopeOptions {
    /// Request context to merge over the base.
    pub context: Json,
    /// Merge strategy override; the instance default applies when absent.
    pub merge: Option<MergeStrategy>,
}

impl ScopeOptions {
    /// Scope options with the instance's default merge.
    pub fn new(context: Json) -> Self {
        Self {
            context,
            merge: None,
        }
    }

    /// Override the merge strategy.
    #[must_use]
    pub fn merge(mut self, merge: MergeStrategy) -> Self {
        self.merge = Some(merge);
        self
    }
}

/// Interior container a path position can resolve to.
#[derive(Clone)]
enum Container {
    Ns(NamespaceHandle),
    Fun(FunctionHandle),
}

impl Container {
    fn get(&self, key: &str) -> Option<Value> {
        match self {
            Container::Ns(ns) => ns.get(key),
            Container::Fun(f) => f.prop(key),
        }
    }

    fn insert(&self, key: &str, value: Value) {
        match self {
            Container::Ns(ns) => {
                ns.insert(key, value);
            }
            Container::Fun(f) => f.set_prop(key, value),
        }
    }

    fn remove(&self, key: &str) -> Option<Value> {
        match self {
            Container::Ns(ns) => ns.remove(key),
            Container::Fun(f) => {
                let old = f.prop(key);
                if old.is_some() {
                    let props: BTreeMap<String, Value> = f
                        .prop_names()
                        .into_iter()
                        .filter(|n| n != key)
                        .filter_map(|n| f.prop(&n).map(|v| (n, v)))
                        .collect();
                    f.replace_props(props);
                }
                old
            }
        }
    }
}

/// The bound API.
#[derive(Clone)]
pub struct BoundApi {
    core: Arc<InstanceCore>,
}

impl std::fmt::Debug for BoundApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundApi")
            .field("instance_id", &self.core.instance_id())
            .finish()
    }
}

impl BoundApi {
    pub(crate) fn from_core(core: Arc<InstanceCore>) -> Self {
        Self { core }
    }

    /// Create, load, and register a bound API from `config`.
    pub(crate) async fn create(config: SlothletConfig) -> crate::Result<Self> {
        config.validate()?;
        if !config.dir.is_dir() {
            return Err(crate::Error::Access(format!(
                "Cannot access folder '{}'",
                config.dir.display()
            )));
        }

        let root_name = config
            .dir
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();
        let root_mount = segment(root_name, &config.sanitize);

        let core = InstanceCore::new(config, root_mount)?;
        let api = Self { core };
        if let Err(err) = api.build_root().await {
            registry::unregister(api.core.instance_id());
            return Err(err);
        }
        api.apply_reference(api.core.reference.read().clone(), &[]);
        tracing::debug!(instance = %api.core.instance_id(), dir = %api.core.dir.display(), "bound api created");
        Ok(api)
    }

    /// Current instance id. Regenerated by [`BoundApi::reload`].
    pub fn instance_id(&self) -> Uuid {
        self.core.instance_id()
    }

    /// The hook manager.
    pub fn hooks(&self) -> &HookManager {
        &self.core.hooks
    }

    /// The root namespace handle. Identity is stable for the lifetime of
    /// the consumer-visible object, including across `reload`.
    pub fn root(&self) -> NamespaceHandle {
        self.core.root.clone()
    }

    /// Callable the root folder itself flattened into, if any.
    pub fn root_callable(&self) -> Option<FunctionHandle> {
        self.core.root_callable.read().clone()
    }

    /// Has `shutdown` completed?
    pub fn is_shut_down(&self) -> bool {
        self.core.is_shut_down()
    }

    // ------------------------------------------------------------------
    // Consumer-facing access
    // ------------------------------------------------------------------

    /// Resolve a dot path to its value, materializing lazy nodes on the
    /// way. Missing paths resolve to `Value::Null`.
    pub async fn get(&self, path: &str) -> crate::Result<Value> {
        let mut current = Value::Namespace(self.core.root.clone());
        if !path.is_empty() {
            for seg in path.split('.') {
                if seg.is_empty() {
                    return Err(crate::Error::validation(format!(
                        "path '{path}' contains empty segments"
                    )));
                }
                current = self.step(current, seg).await?;
                if matches!(current, Value::Null) {
                    return Ok(Value::Null);
                }
            }
        }
        if let Value::Lazy(placeholder) = current.clone() {
            current = placeholder.materialize().await?;
        }
        Ok(current)
    }

    async fn step(&self, current: Value, seg: &str) -> crate::Result<Value> {
        let container = match current {
            Value::Lazy(placeholder) => placeholder.materialize().await?,
            other => other,
        };
        Ok(match container {
            Value::Namespace(ns) => ns.get(seg).unwrap_or(Value::Null),
            Value::Function(f) => f.prop(seg).unwrap_or(Value::Null),
            Value::Data(Json::Object(map)) => {
                map.get(seg).cloned().map(Value::Data).unwrap_or(Value::Null)
            }
            Value::Data(Json::Array(items)) => seg
                .parse::<usize>()
                .ok()
                .and_then(|i| items.get(i).cloned())
                .map(Value::Data)
                .unwrap_or(Value::Null),
            _ => Value::Null,
        })
    }

    /// Invoke the leaf-callable at `path` through the hook pipeline.
    pub async fn call(&self, path: &str, args: Vec<Value>) -> crate::Result<Value> {
        match self.get(path).await? {
            Value::Function(f) => f.invoke(args).await,
            Value::Null => Err(crate::Error::validation(format!(
                "'{path}' is not bound to a function"
            ))),
            other => Err(crate::Error::validation(format!(
                "'{path}' is a {} and cannot be invoked",
                other.type_name()
            ))),
        }
    }

    /// Child keys at `path` ("" for the root). Materializes a lazy node
    /// first, so iteration always sees the full first level.
    pub async fn keys(&self, path: &str) -> crate::Result<Vec<String>> {
        Ok(match self.get(path).await? {
            Value::Namespace(ns) => ns.keys(),
            Value::Function(f) => f.prop_names(),
            Value::Data(Json::Object(map)) => map.keys().cloned().collect(),
            _ => Vec::new(),
        })
    }

    /// Does anything exist at `path`?
    pub async fn has(&self, path: &str) -> crate::Result<bool> {
        Ok(!matches!(self.get(path).await?, Value::Null))
    }

    // ------------------------------------------------------------------
    // Context
    // ------------------------------------------------------------------

    /// The current effective context: the base merged with the active
    /// request context, or the base alone outside any `run`.
    pub fn context(&self) -> Json {
        self.core.effective_context()
    }

    /// Run `f` with `ctx` merged over the effective context (callback
    /// form). The merge uses the instance's configured default strategy;
    /// nested runs inherit and add on top.
    pub async fn run<F, Fut, T>(&self, ctx: Json, f: F) -> crate::Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let merge = self.scope_merge(None)?;
        self.enter_scope(ctx, merge, f).await
    }

    /// Run `f` under an explicit scope configuration (object form).
    pub async fn scope<F, Fut, T>(&self, options: ScopeOptions, f: F) -> crate::Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let merge = self.scope_merge(options.merge)?;
        self.enter_scope(options.context, merge, f).await
    }

    fn scope_merge(&self, explicit: Option<MergeStrategy>) -> crate::Result<MergeStrategy> {
        match self.core.scope.merge() {
            Some(default) => Ok(explicit.unwrap_or(default)),
            None => Err(crate::Error::configuration(
                "Per-request context is disabled for this instance",
            )),
        }
    }

    async fn enter_scope<F, Fut, T>(
        &self,
        ctx: Json,
        merge: MergeStrategy,
        f: F,
    ) -> crate::Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        self.core.ensure_alive()?;
        if !ctx.is_object() {
            return Err(crate::Error::validation("context must be an object"));
        }
        let effective = self.core.effective_context();
        let merged = context::merge(&effective, &ctx, merge);
        Ok(context::enter(self.core.instance_id(), merged, f()).await)
    }

    // ------------------------------------------------------------------
    // Reference sidecar
    // ------------------------------------------------------------------

    /// The reference sidecar object.
    pub fn reference(&self) -> Json {
        self.core.reference.read().clone()
    }

    /// Replace the reference sidecar. Keys surface as additional top-level
    /// entries of the bound tree; names colliding with non-writable
    /// builtins are legal because entries install with define-property
    /// semantics (a map insert), never a raw assignment.
    pub fn set_reference(&self, reference: Json) -> crate::Result<()> {
        if !reference.is_object() {
            return Err(crate::Error::validation(
                "'reference' must be an object of sidecar keys",
            ));
        }
        let old_keys: Vec<String> = match &*self.core.reference.read() {
            Json::Object(map) => map.keys().cloned().collect(),
            _ => Vec::new(),
        };
        self.apply_reference(reference.clone(), &old_keys);
        *self.core.reference.write() = reference;
        Ok(())
    }

    fn apply_reference(&self, reference: Json, old_keys: &[String]) {
        for key in old_keys {
            self.core.root.remove(key);
        }
        if let Json::Object(map) = reference {
            for (key, value) in map {
                self.core.root.insert(&key, Value::Data(value));
            }
        }
    }

    // ------------------------------------------------------------------
    // Mutation: add_api / remove_api / reload_api / reload
    // ------------------------------------------------------------------

    /// Splice a directory into the bound tree at `api_path`.
    ///
    /// A relative `folder_path` resolves against the *caller's* source
    /// file, not this crate's. `metadata` is deep-frozen and attached to
    /// every added leaf together with the source folder.
    #[track_caller]
    pub fn add_api(
        &self,
        api_path: impl Into<String>,
        folder_path: impl Into<PathBuf>,
        metadata: Json,
        options: AddApiOptions,
    ) -> impl Future<Output = crate::Result<()>> + Send + '_ {
        let caller_file = std::panic::Location::caller().file().to_string();
        let api_path = api_path.into();
        let folder = folder_path.into();
        async move {
            let folder = self.resolve_folder(folder, Some(&caller_file))?;
            self.add_api_inner(api_path, folder, metadata, options, true)
                .await
        }
    }

    fn resolve_folder(
        &self,
        folder: PathBuf,
        caller_file: Option<&str>,
    ) -> crate::Result<PathBuf> {
        if folder.as_os_str().is_empty() {
            return Err(crate::Error::validation(
                "'folderPath' must be a non-empty string",
            ));
        }
        if folder.is_absolute() {
            return Ok(folder);
        }
        let base = caller_file
            .map(Path::new)
            .filter(|p| p.exists())
            .and_then(Path::parent)
            .map(Path::to_path_buf)
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_default();
        Ok(base.join(folder))
    }

    async fn add_api_inner(
        &self,
        api_path: String,
        folder: PathBuf,
        metadata: Json,
        options: AddApiOptions,
        record: bool,
    ) -> crate::Result<()> {
        let _mutation = self.core.mutation_lock.read().await;
        self.add_api_locked(api_path, folder, metadata, options, record)
            .await
    }

    /// The body of `add_api`, run with the instance mutation lock already
    /// held (shared by `add_api` and the replay loop of `reload`, which
    /// holds the exclusive side).
    async fn add_api_locked(
        &self,
        api_path: String,
        folder: PathBuf,
        metadata: Json,
        options: AddApiOptions,
        record: bool,
    ) -> crate::Result<()> {
        self.core.ensure_alive()?;
        let segments = validate_api_path(&api_path)?;
        if !folder.is_dir() {
            return Err(crate::Error::Access(format!(
                "Cannot access folder '{}'",
                folder.display()
            )));
        }
        if !metadata.is_object() {
            return Err(crate::Error::validation("'metadata' must be an object"));
        }
        if options.force_overwrite && !self.core.hot_reload {
            return Err(crate::Error::configuration(
                "forceOverwrite requires hotReload",
            ));
        }
        if options.module_id.is_some() && !self.core.hot_reload {
            return Err(crate::Error::configuration(
                "hotReload must be enabled to use moduleId",
            ));
        }

        let path_lock = self.core.path_lock(&api_path);
        let _path_guard = path_lock.lock().await;

        let module_id = options
            .module_id
            .clone()
            .unwrap_or_else(|| format!("anonymous-{}", Uuid::new_v4()));

        // Ownership gate (Rule 12). The sentinel core claim is recorded
        // lazily the first time a tracked mutation touches the path.
        let existing = self.peek(&api_path).await?;
        if self.core.hot_reload {
            if let Some(existing_value) = existing.clone() {
                if !self.core.ownership.is_tracked(&api_path) {
                    self.core.ownership.claim(
                        &api_path,
                        OwnerFrame {
                            module_id: CORE_MODULE.to_string(),
                            binding: existing_value,
                            metadata: None,
                            keys: Vec::new(),
                            merged: false,
                        },
                    );
                }
            }
            if let Some(owner) = self.core.ownership.current_owner(&api_path) {
                if owner != module_id
                    && !options.force_overwrite
                    && !self.core.allow_api_overwrite
                {
                    return Err(crate::Error::Ownership {
                        path: api_path,
                        owner,
                    });
                }
            }
        }

        // Discover and build the added subtree (added subtrees are always
        // materialized eagerly; laziness is a property of the primary
        // tree).
        let mount_segment = segments.last().map(String::as_str).unwrap_or_default();
        let node = {
            let opts = DiscoverOptions {
                sanitize: &self.core.sanitize,
                decoders: &self.core.decoders,
                api_depth: self.core.api_depth,
            };
            discover(&folder, mount_segment, &opts)?
        };
        let value = build::assemble(&node, &api_path, &self.core, false, 0).await?;
        build::mount(&value, &api_path, &self.core);

        let frozen = Arc::new(freeze_metadata(metadata.clone(), &folder));
        build::attach_metadata(&value, &frozen);

        // A module that holds a buried (non-current) claim updates its
        // frame without disturbing the visible binding.
        let buried = self.core.hot_reload
            && self.core.ownership.owners(&api_path).contains(&module_id)
            && self.core.ownership.current_owner(&api_path).as_deref() != Some(&module_id);

        let (installed, contributed_keys, merged_install) = if buried {
            (value.clone(), top_level_keys(&value), false)
        } else {
            self.install(&api_path, &segments, value, existing, options.mutate_existing)
                .await?
        };

        if self.core.hot_reload {
            let stale = self.core.ownership.claim(
                &api_path,
                OwnerFrame {
                    module_id: module_id.clone(),
                    binding: installed.clone(),
                    metadata: Some(frozen),
                    keys: contributed_keys.clone(),
                    merged: merged_install,
                },
            );
            // Rule 13: a re-add by the same module removes the properties
            // that did not survive, so orphans never linger.
            if let Some(stale_frame) = stale {
                if merged_install {
                    if let Some(ns) = installed.as_namespace() {
                        let fresh: BTreeSet<&String> = contributed_keys.iter().collect();
                        for key in &stale_frame.keys {
                            if !fresh.contains(key) {
                                ns.remove(key);
                            }
                        }
                    }
                }
            }
        }

        if record {
            let mut adds = self.core.recorded_adds.lock();
            adds.retain(|r| {
                !(r.api_path == api_path && r.options.module_id == options.module_id)
            });
            adds.push(RecordedAdd {
                api_path: api_path.clone(),
                dir: folder,
                metadata,
                options,
            });
            self.core.removed_paths.lock().remove(&api_path);
        }

        tracing::debug!(path = %api_path, module = %module_id, "api subtree added");
        Ok(())
    }

    /// Install `value` at `api_path`, creating intermediate namespaces.
    /// Returns the installed value, its contributed top-level keys, and
    /// whether the install merged into an existing namespace.
    async fn install(
        &self,
        api_path: &str,
        segments: &[String],
        value: Value,
        existing: Option<Value>,
        mutate_existing: bool,
    ) -> crate::Result<(Value, Vec<String>, bool)> {
        if mutate_existing {
            if let (Some(Value::Namespace(target)), Value::Namespace(fresh)) =
                (&existing, &value)
            {
                let contributed: Vec<String> = fresh.keys();
                for (key, child) in fresh.snapshot() {
                    target.insert(&key, child);
                }
                return Ok((Value::Namespace(target.clone()), contributed, true));
            }
        }

        let (parent, leaf_key) = self
            .parent_container(segments, true)
            .await?
            .ok_or_else(|| {
                crate::Error::validation(format!(
                    "cannot add properties to primitive value on the way to '{api_path}'"
                ))
            })?;
        let keys = top_level_keys(&value);
        parent.insert(&leaf_key, value.clone());
        Ok((value, keys, false))
    }

    /// Walk to the parent container of the last segment, optionally
    /// creating missing namespaces. `None` when the walk dead-ends on a
    /// missing link and creation is off.
    async fn parent_container(
        &self,
        segments: &[String],
        create: bool,
    ) -> crate::Result<Option<(Container, String)>> {
        let mut container = Container::Ns(self.core.root.clone());
        let (leaf, parents) = match segments.split_last() {
            Some(split) => split,
            None => return Ok(None),
        };

        for seg in parents {
            let next = match container.get(seg) {
                Some(Value::Lazy(placeholder)) => Some(placeholder.materialize().await?),
                other => other,
            };
            container = match next {
                Some(Value::Namespace(ns)) => Container::Ns(ns),
                Some(Value::Function(f)) => Container::Fun(f),
                Some(_) => {
                    return Err(crate::Error::validation(format!(
                        "cannot add properties to primitive value at '{seg}'"
                    )))
                }
                None if create => {
                    let ns = Namespace::new();
                    container.insert(seg, Value::Namespace(ns.clone()));
                    Container::Ns(ns)
                }
                None => return Ok(None),
            };
        }
        Ok(Some((container, leaf.clone())))
    }

    /// Value currently bound at `path`, without materializing anything.
    async fn peek(&self, path: &str) -> crate::Result<Option<Value>> {
        let segments: Vec<String> = path.split('.').map(str::to_string).collect();
        match self.parent_container(&segments, false).await? {
            Some((container, leaf)) => Ok(container.get(&leaf)),
            None => Ok(None),
        }
    }

    /// Remove a binding by path or every binding a module owns. Returns
    /// whether anything was removed.
    pub async fn remove_api(&self, spec: impl Into<RemoveSpec>) -> crate::Result<bool> {
        self.core.ensure_alive()?;
        match spec.into() {
            RemoveSpec::Path(path) => self.remove_by_path(&path).await,
            RemoveSpec::ModuleId(module_id) => self.remove_by_module(&module_id).await,
        }
    }

    async fn remove_by_path(&self, path: &str) -> crate::Result<bool> {
        if path.trim().is_empty() {
            return Ok(false);
        }
        let _mutation = self.core.mutation_lock.read().await;
        let path_lock = self.core.path_lock(path);
        let _path_guard = path_lock.lock().await;

        let segments: Vec<String> = path.split('.').map(str::to_string).collect();
        let removed = match self.parent_container(&segments, false).await? {
            Some((container, leaf)) => container.remove(&leaf).is_some(),
            None => false,
        };
        if removed {
            self.core.ownership.remove_path(path);
            self.core
                .recorded_adds
                .lock()
                .retain(|r| r.api_path != path);
            self.core.removed_paths.lock().insert(path.to_string());
            tracing::debug!(path = %path, "api path removed");
        }
        Ok(removed)
    }

    async fn remove_by_module(&self, module_id: &str) -> crate::Result<bool> {
        // Without ownership tracking there is nothing to resolve a module
        // id against; this is a silent no-op by contract.
        if !self.core.hot_reload {
            return Ok(false);
        }
        let _mutation = self.core.mutation_lock.read().await;

        let paths = self.core.ownership.paths_owned_by(module_id);
        let mut removed_any = false;

        for path in paths {
            let path_lock = self.core.path_lock(&path);
            let _path_guard = path_lock.lock().await;
            let segments: Vec<String> = path.split('.').map(str::to_string).collect();

            // A merged contributor only takes its own entries with it.
            let merged_keys: Option<Vec<String>> = {
                let owners = self.core.ownership.owners(&path);
                if owners.contains(module_id) {
                    let others = self
                        .core
                        .ownership
                        .keys_claimed_by_others(&path, module_id);
                    self.merged_frame_keys(&path, module_id)
                        .map(|keys| {
                            keys.into_iter().filter(|k| !others.contains(k)).collect()
                        })
                } else {
                    None
                }
            };

            match self.core.ownership.remove_owner(&path, module_id) {
                Removal::NotAnOwner => {}
                Removal::DroppedNonCurrent => {
                    if let Some(keys) = merged_keys {
                        self.remove_merged_keys(&segments, &keys).await?;
                    }
                    removed_any = true;
                }
                Removal::Restored(frame) => {
                    if let Some(keys) = merged_keys {
                        self.remove_merged_keys(&segments, &keys).await?;
                    } else if let Some((container, leaf)) =
                        self.parent_container(&segments, false).await?
                    {
                        container.insert(&leaf, frame.binding.clone());
                        build::mount(&frame.binding, &path, &self.core);
                    }
                    removed_any = true;
                    tracing::debug!(path = %path, restored = %frame.module_id, "previous binding restored");
                }
                Removal::PathEmpty => {
                    if let Some((container, leaf)) =
                        self.parent_container(&segments, false).await?
                    {
                        container.remove(&leaf);
                    }
                    removed_any = true;
                }
            }
        }

        if removed_any {
            self.core.hooks.remove_module(module_id);
            self.core
                .recorded_adds
                .lock()
                .retain(|r| r.options.module_id.as_deref() != Some(module_id));
            tracing::debug!(module = %module_id, "module bindings removed");
        }
        Ok(removed_any)
    }

    fn merged_frame_keys(&self, path: &str, module_id: &str) -> Option<Vec<String>> {
        // Only meaningful for frames installed with mutate_existing.
        self.core
            .ownership
            .frame_of(path, module_id)
            .filter(|f| f.merged)
            .map(|f| f.keys)
    }

    async fn remove_merged_keys(
        &self,
        segments: &[String],
        keys: &[String],
    ) -> crate::Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        if let Some((container, leaf)) = self.parent_container(segments, false).await? {
            if let Some(Value::Namespace(ns)) = container.get(&leaf) {
                for key in keys {
                    ns.remove(key);
                }
            }
        }
        Ok(())
    }

    /// Re-run the loader for the subtree at `path`, swapping bodies in
    /// place so namespace and leaf identities survive. A nonexistent path
    /// resolves without error.
    pub async fn reload_api(&self, path: &str) -> crate::Result<()> {
        self.core.ensure_alive()?;
        if !self.core.hot_reload {
            return Err(crate::Error::configuration(
                "hotReload must be enabled for reloadApi",
            ));
        }
        if path.trim().is_empty() {
            return Err(crate::Error::validation(
                "'path' must be a non-empty, non-whitespace string",
            ));
        }

        let _mutation = self.core.mutation_lock.read().await;
        let path_lock = self.core.path_lock(path);
        let _path_guard = path_lock.lock().await;

        let Some(existing) = self.peek(path).await? else {
            return Ok(());
        };
        let Some(dir) = self.core.sources.get(path).map(|e| e.value().clone()) else {
            return Ok(());
        };

        let segments: Vec<String> = path.split('.').map(str::to_string).collect();
        let mount_segment = segments.last().cloned().unwrap_or_default();
        let node = {
            let opts = DiscoverOptions {
                sanitize: &self.core.sanitize,
                decoders: &self.core.decoders,
                api_depth: self.core.api_depth,
            };
            discover(&dir, &mount_segment, &opts)?
        };
        let fresh = build::assemble(&node, path, &self.core, false, 0).await?;
        build::mount(&fresh, path, &self.core);

        let rebound = rebind::merge_preserving(&existing, fresh);
        if let Some((container, leaf)) = self.parent_container(&segments, false).await? {
            container.insert(&leaf, rebound);
        }
        tracing::debug!(path = %path, "api subtree reloaded in place");
        Ok(())
    }

    /// Full reload: regenerate the instance id, tear down request-context
    /// state, re-run the primary discovery, and replay every recorded
    /// `add_api` in order. Removed paths stay removed. The root handle
    /// survives; in live runtime deep handles survive too.
    pub async fn reload(&self) -> crate::Result<()> {
        if !self.core.hot_reload {
            return Err(crate::Error::configuration(
                "hotReload must be enabled for reload",
            ));
        }

        let _mutation = self.core.mutation_lock.write().await;

        // A reload from a shutdown state re-initializes the instance.
        self.core.revive();
        self.core.regenerate_id();
        self.core.ownership.clear();
        self.core.sources.clear();

        let live = self.core.runtime == crate::config::Runtime::Live;
        let old_entries = if live {
            Some(self.core.root.snapshot())
        } else {
            None
        };

        self.core.root.replace_entries(BTreeMap::new());
        *self.core.root_callable.write() = None;
        self.build_root().await?;

        // Replay the add history against the fresh tree. The exclusive
        // mutation lock is already held.
        let adds: Vec<RecordedAdd> = self.core.recorded_adds.lock().clone();
        for add in adds {
            self.add_api_locked(
                add.api_path,
                add.dir,
                add.metadata,
                add.options,
                false,
            )
            .await?;
        }

        // Removed paths stay removed, even if the primary tree would have
        // re-created them.
        let removed: Vec<String> = self.core.removed_paths.lock().iter().cloned().collect();
        for path in removed {
            let segments: Vec<String> = path.split('.').map(str::to_string).collect();
            if let Some((container, leaf)) = self.parent_container(&segments, false).await? {
                container.remove(&leaf);
            }
        }

        if let Some(old) = old_entries {
            // Live runtime: fold fresh children onto the held handles so
            // consumer references track the update.
            let fresh = self.core.root.snapshot();
            let mut merged = BTreeMap::new();
            for (key, fresh_child) in fresh {
                let value = match old.get(&key) {
                    Some(old_child) => rebind::merge_preserving(old_child, fresh_child),
                    None => fresh_child,
                };
                merged.insert(key, value);
            }
            self.core.root.replace_entries(merged);
        }

        self.apply_reference(self.core.reference.read().clone(), &[]);
        tracing::debug!(instance = %self.core.instance_id(), "full reload complete");
        Ok(())
    }

    /// Build (or rebuild) the primary tree into the stable root handle.
    async fn build_root(&self) -> crate::Result<()> {
        let lazy = self.core.mode == crate::config::Mode::Lazy;
        let opts = DiscoverOptions {
            sanitize: &self.core.sanitize,
            decoders: &self.core.decoders,
            api_depth: self.core.api_depth,
        };
        let node = discover(&self.core.dir, &self.core.root_mount, &opts)?;
        self.core.sources.insert(String::new(), self.core.dir.clone());

        // The root level assembles directly into the stable root handle,
        // so lazy placeholders splice into the real tree.
        let base = match &node.inline {
            Some(file) => {
                let inline = self.core.decoders.load(&file.path).await?.into_node();
                match inline {
                    Value::Namespace(ns) => {
                        self.core.root.replace_entries(ns.snapshot());
                        Value::Namespace(self.core.root.clone())
                    }
                    Value::Function(f) => {
                        *self.core.root_callable.write() = Some(f.clone());
                        Value::Function(f)
                    }
                    Value::Data(Json::Object(fields)) => {
                        for (key, field) in fields {
                            self.core.root.insert(&key, Value::Data(field));
                        }
                        Value::Namespace(self.core.root.clone())
                    }
                    primitive => {
                        // A primitive cannot be the root object; keep it
                        // as a regular child under its own segment.
                        self.core.root.insert(&file.segment, primitive);
                        Value::Namespace(self.core.root.clone())
                    }
                }
            }
            None => Value::Namespace(self.core.root.clone()),
        };

        let root_node = strip_inline(node);
        build::fill_level(&base, &root_node, "", &self.core, lazy, 0).await?;
        build::mount(&base, "", &self.core);

        // A callable root mirrors its surface into the root namespace so
        // dot-path resolution and key iteration see one tree.
        if let Value::Function(f) = &base {
            for name in f.prop_names() {
                if let Some(prop) = f.prop(&name) {
                    self.core.root.insert(&name, prop);
                }
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Shut the instance down: detach tracked listeners, clear hooks, and
    /// leave the process registry. A second call is a no-op.
    pub async fn shutdown(&self) -> crate::Result<()> {
        let _mutation = self.core.mutation_lock.write().await;
        if !self.core.mark_shut_down() {
            return Ok(());
        }
        self.core.remove_tracked_listeners();
        self.core.hooks.clear();
        registry::unregister(self.core.instance_id());
        tracing::debug!(instance = %self.core.instance_id(), "instance shut down");
        Ok(())
    }

    /// Introspection blob for diagnostics.
    pub fn describe(&self) -> Json {
        let adds: Vec<Json> = self
            .core
            .recorded_adds
            .lock()
            .iter()
            .map(|a| {
                serde_json::json!({
                    "apiPath": a.api_path,
                    "sourceFolder": a.dir.display().to_string(),
                    "moduleId": a.options.module_id,
                })
            })
            .collect();
        serde_json::json!({
            "instanceId": self.core.instance_id().to_string(),
            "mode": self.core.mode,
            "runtime": self.core.runtime,
            "hotReload": self.core.hot_reload,
            "shutDown": self.core.is_shut_down(),
            "keys": self.core.root.keys(),
            "rootCallable": self.core.root_callable.read().is_some(),
            "hooks": self.core.hooks.len(),
            "additionalApis": adds,
        })
    }

    // ------------------------------------------------------------------
    // Internal test-mode introspection (not a supported surface)
    // ------------------------------------------------------------------

    /// Owner set for `path`. Requires `SLOTHLET_INTERNAL_TEST_MODE=true`.
    pub fn api_ownership(&self, path: &str) -> crate::Result<BTreeSet<String>> {
        ensure_internal_test_mode()?;
        Ok(self.core.ownership.owners(path))
    }

    /// Current owner for `path`. Requires `SLOTHLET_INTERNAL_TEST_MODE=true`.
    pub fn current_owner(&self, path: &str) -> crate::Result<Option<String>> {
        ensure_internal_test_mode()?;
        Ok(self.core.ownership.current_owner(path))
    }
}

fn ensure_internal_test_mode() -> crate::Result<()> {
    let on = std::env::var(INTERNAL_TEST_MODE)
        .map(|v| v == "true")
        .unwrap_or(false);
    if !on {
        return Err(crate::Error::configuration(
            "internal introspection requires SLOTHLET_INTERNAL_TEST_MODE=true",
        ));
    }
    Ok(())
}

fn validate_api_path(api_path: &str) -> crate::Result<Vec<String>> {
    if api_path.trim().is_empty() {
        return Err(crate::Error::validation(
            "'apiPath' must be a non-empty string",
        ));
    }
    if api_path.starts_with('.')
        || api_path.ends_with('.')
        || api_path.contains("..")
        || api_path.split('.').any(|s| s.trim().is_empty())
    {
        return Err(crate::Error::validation(format!(
            "'apiPath' '{api_path}' contains empty segments"
        )));
    }
    Ok(api_path.split('.').map(str::to_string).collect())
}

fn top_level_keys(value: &Value) -> Vec<String> {
    match value {
        Value::Namespace(ns) => ns.keys(),
        Value::Function(f) => f.prop_names(),
        _ => Vec::new(),
    }
}

fn freeze_metadata(metadata: Json, folder: &Path) -> Json {
    let mut map = match metadata {
        Json::Object(map) => map,
        _ => Default::default(),
    };
    map.insert(
        "sourceFolder".to_string(),
        Json::String(folder.display().to_string()),
    );
    Json::Object(map)
}

/// Copy of a [`DirNode`] with the inline file dropped; the root handles
/// its inline specially.
fn strip_inline(node: DirNode) -> DirNode {
    DirNode {
        inline: None,
        ..node
    }
}
