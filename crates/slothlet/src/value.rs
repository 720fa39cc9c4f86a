// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! The node model of the bound tree.
//!
//! Every vertex of a bound API is a [`Value`]:
//!
//! - **`Data`** - a plain value decoded from a data file or returned by a
//!   module function.
//! - **`Function`** - a leaf-callable. The handle carries the call target,
//!   named-export properties, its api path tag, and (for added modules) the
//!   frozen metadata record. Invoking it runs the full hook pipeline.
//! - **`Namespace`** - a folder node; an interior-mutable map of child
//!   segments. Mutability is what lets reloads preserve handle identity.
//! - **`Map`** / **`Set`** - collection values surfaced directly, never
//!   wrapped, so their accessor surface works unchanged.
//! - **`Lazy`** - an un-materialized subtree placeholder (lazy mode only).
//!
//! `Function` and `Namespace` are `Arc` handles: clones share identity, and
//! identity is the contract consumers rely on across `reload_api`.

use crate::registry::InstanceCore;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Weak};

/// Boxed future returned by module functions and hook handlers.
pub type ValueFuture = BoxFuture<'static, crate::Result<Value>>;

/// The call target of a leaf-callable.
pub type NativeFn = Arc<dyn Fn(FnCtx) -> ValueFuture + Send + Sync>;

/// What a module function receives when invoked through the bound API.
pub struct FnCtx {
    /// Positional arguments, after any before-hook rewriting.
    pub args: Vec<Value>,
    /// Effective context: base merged with the active request context.
    pub context: serde_json::Value,
    /// The leaf's api path (dot notation).
    pub path: String,
    /// The bound API the leaf belongs to, when the instance is still alive.
    pub api: Option<crate::api::BoundApi>,
}

impl FnCtx {
    /// Argument at `i`, or `Null` when absent (loose-arity calls are legal).
    pub fn arg(&self, i: usize) -> Value {
        self.args.get(i).cloned().unwrap_or(Value::Null)
    }
}

/// A vertex of the bound tree.
#[derive(Clone)]
pub enum Value {
    /// Absent/empty value.
    Null,
    /// A plain data value.
    Data(serde_json::Value),
    /// A leaf-callable with optional named-export properties.
    Function(FunctionHandle),
    /// A folder node keyed by child segment.
    Namespace(NamespaceHandle),
    /// An ordered string-keyed map, surfaced without wrapping.
    Map(Arc<ApiMap>),
    /// An ordered string set, surfaced without wrapping.
    Set(Arc<ApiSet>),
    /// A lazy-mode placeholder that materializes on first use.
    Lazy(Arc<crate::build::lazy::Placeholder>),
}

/// Shared handle to a leaf-callable.
pub type FunctionHandle = Arc<FunctionValue>;

/// Shared handle to a namespace node.
pub type NamespaceHandle = Arc<Namespace>;

impl Value {
    /// Convenience constructor for data values.
    pub fn data(v: impl Into<serde_json::Value>) -> Self {
        Value::Data(v.into())
    }

    /// Short type tag used in messages and `describe()` output.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Data(_) => "data",
            Value::Function(_) => "function",
            Value::Namespace(_) => "namespace",
            Value::Map(_) => "map",
            Value::Set(_) => "set",
            Value::Lazy(_) => "lazy",
        }
    }

    /// True for data values that cannot carry properties.
    pub fn is_primitive(&self) -> bool {
        matches!(
            self,
            Value::Null
                | Value::Data(serde_json::Value::Null)
                | Value::Data(serde_json::Value::Bool(_))
                | Value::Data(serde_json::Value::Number(_))
                | Value::Data(serde_json::Value::String(_))
        )
    }

    /// Integer view of a data value.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Data(serde_json::Value::Number(n)) => n.as_i64(),
            _ => None,
        }
    }

    /// Float view of a data value.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Data(serde_json::Value::Number(n)) => n.as_f64(),
            _ => None,
        }
    }

    /// String view of a data value.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Data(serde_json::Value::String(s)) => Some(s),
            _ => None,
        }
    }

    /// Bool view of a data value.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Data(serde_json::Value::Bool(b)) => Some(*b),
            _ => None,
        }
    }

    /// The function handle, when this is a leaf-callable.
    pub fn as_function(&self) -> Option<&FunctionHandle> {
        match self {
            Value::Function(f) => Some(f),
            _ => None,
        }
    }

    /// The namespace handle, when this is a folder node.
    pub fn as_namespace(&self) -> Option<&NamespaceHandle> {
        match self {
            Value::Namespace(ns) => Some(ns),
            _ => None,
        }
    }

    /// JSON projection for diagnostics (`describe()`); functions and
    /// collections render as tagged summaries, not their contents.
    pub fn to_json_summary(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Data(v) => v.clone(),
            Value::Function(f) => serde_json::json!({ "type": "function", "path": f.path() }),
            Value::Namespace(ns) => {
                serde_json::json!({ "type": "namespace", "keys": ns.keys() })
            }
            Value::Map(m) => serde_json::json!({ "type": "map", "size": m.size() }),
            Value::Set(s) => serde_json::json!({ "type": "set", "size": s.size() }),
            Value::Lazy(p) => serde_json::json!({ "type": "lazy", "path": p.api_path() }),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "Null"),
            Value::Data(v) => write!(f, "Data({v})"),
            Value::Function(func) => write!(f, "Function({})", func.path()),
            Value::Namespace(ns) => write!(f, "Namespace({:?})", ns.keys()),
            Value::Map(m) => write!(f, "Map(size={})", m.size()),
            Value::Set(s) => write!(f, "Set(size={})", s.size()),
            Value::Lazy(p) => write!(f, "Lazy({})", p.api_path()),
        }
    }
}

impl PartialEq for Value {
    /// Data compares by value; handles compare by identity. That is the
    /// equality consumers observe: two references to the same leaf are
    /// equal, two structurally identical namespaces are not.
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Data(a), Value::Data(b)) => a == b,
            (Value::Function(a), Value::Function(b)) => Arc::ptr_eq(a, b),
            (Value::Namespace(a), Value::Namespace(b)) => Arc::ptr_eq(a, b),
            (Value::Map(a), Value::Map(b)) => Arc::ptr_eq(a, b),
            (Value::Set(a), Value::Set(b)) => Arc::ptr_eq(a, b),
            (Value::Lazy(a), Value::Lazy(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Data(v.into())
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Data(v.into())
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Data(v.into())
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Data(v.into())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Data(v.into())
    }
}

impl From<serde_json::Value> for Value {
    fn from(v: serde_json::Value) -> Self {
        Value::Data(v)
    }
}

/// A leaf-callable: a swappable call target plus named-export properties.
///
/// The handle (not the body) is what the bound tree stores, so
/// `reload_api` can swap the target and props under the lock while every
/// consumer-held clone keeps working.
pub struct FunctionValue {
    path: RwLock<String>,
    target: RwLock<NativeFn>,
    props: RwLock<BTreeMap<String, Value>>,
    metadata: RwLock<Option<Arc<serde_json::Value>>>,
    instance: RwLock<Weak<InstanceCore>>,
}

impl FunctionValue {
    /// Build a leaf-callable from a bare target. The path tag and instance
    /// link are attached by the builder when the leaf is mounted.
    pub fn new(target: NativeFn) -> FunctionHandle {
        Arc::new(Self {
            path: RwLock::new(String::new()),
            target: RwLock::new(target),
            props: RwLock::new(BTreeMap::new()),
            metadata: RwLock::new(None),
            instance: RwLock::new(Weak::new()),
        })
    }

    /// The leaf's api path tag (dot notation).
    pub fn path(&self) -> String {
        self.path.read().clone()
    }

    pub(crate) fn set_path(&self, path: &str) {
        *self.path.write() = path.to_string();
    }

    pub(crate) fn bind_instance(&self, instance: &Arc<InstanceCore>) {
        *self.instance.write() = Arc::downgrade(instance);
    }

    pub(crate) fn instance(&self) -> Option<Arc<InstanceCore>> {
        self.instance.read().upgrade()
    }

    /// Snapshot of the current call target.
    pub(crate) fn target(&self) -> NativeFn {
        self.target.read().clone()
    }

    /// Swap the call body in place; the handle keeps its identity.
    pub(crate) fn swap_target(&self, target: NativeFn) {
        *self.target.write() = target;
    }

    /// Named-export property lookup.
    pub fn prop(&self, name: &str) -> Option<Value> {
        self.props.read().get(name).cloned()
    }

    /// Names of the attached named exports.
    pub fn prop_names(&self) -> Vec<String> {
        self.props.read().keys().cloned().collect()
    }

    pub(crate) fn set_prop(&self, name: &str, value: Value) {
        self.props.write().insert(name.to_string(), value);
    }

    pub(crate) fn replace_props(&self, props: BTreeMap<String, Value>) {
        *self.props.write() = props;
    }

    /// The frozen `__metadata` record attached by `add_api`, if any.
    pub fn metadata(&self) -> Option<Arc<serde_json::Value>> {
        self.metadata.read().clone()
    }

    pub(crate) fn set_metadata(&self, metadata: Arc<serde_json::Value>) {
        *self.metadata.write() = Some(metadata);
    }

    /// Invoke this leaf through the hook pipeline.
    ///
    /// Works from a cached handle: the instance link travels with the
    /// handle, so hooks and per-request context apply no matter how the
    /// consumer reached the function.
    pub async fn invoke(self: &Arc<Self>, args: Vec<Value>) -> crate::Result<Value> {
        crate::invoke::invoke(self.clone(), args).await
    }
}

impl fmt::Debug for FunctionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionValue")
            .field("path", &self.path())
            .field("props", &self.prop_names())
            .finish()
    }
}

/// A folder node: an interior-mutable, ordered map of child segments.
#[derive(Default)]
pub struct Namespace {
    entries: RwLock<BTreeMap<String, Value>>,
}

impl Namespace {
    /// Fresh empty namespace handle.
    pub fn new() -> NamespaceHandle {
        Arc::new(Self::default())
    }

    /// Build a namespace from an entry map.
    pub fn from_entries(entries: BTreeMap<String, Value>) -> NamespaceHandle {
        Arc::new(Self {
            entries: RwLock::new(entries),
        })
    }

    /// Child lookup.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.entries.read().get(key).cloned()
    }

    /// True when `key` is present.
    pub fn has(&self, key: &str) -> bool {
        self.entries.read().contains_key(key)
    }

    /// Insert or replace a child; returns the previous value.
    pub fn insert(&self, key: &str, value: Value) -> Option<Value> {
        self.entries.write().insert(key.to_string(), value)
    }

    /// Remove a child; returns the removed value.
    pub fn remove(&self, key: &str) -> Option<Value> {
        self.entries.write().remove(key)
    }

    /// Sorted child keys.
    pub fn keys(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }

    /// Number of children.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// True when the namespace has no children.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Clone of the full entry map.
    pub fn snapshot(&self) -> BTreeMap<String, Value> {
        self.entries.read().clone()
    }

    /// Replace the entire entry map in place, preserving handle identity.
    pub(crate) fn replace_entries(&self, entries: BTreeMap<String, Value>) {
        *self.entries.write() = entries;
    }
}

impl fmt::Debug for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Namespace").field("keys", &self.keys()).finish()
    }
}

/// An insertion-ordered string-keyed map surfaced directly through the
/// bound API. Supports the accessor surface consumers expect of a map
/// value: `size`, `has`, `get`, `keys`, `values`, `entries`, `for_each`.
#[derive(Default)]
pub struct ApiMap {
    entries: RwLock<Vec<(String, Value)>>,
}

impl ApiMap {
    /// Empty map.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Map seeded from `(key, value)` pairs, preserving order.
    pub fn from_pairs(pairs: impl IntoIterator<Item = (String, Value)>) -> Arc<Self> {
        Arc::new(Self {
            entries: RwLock::new(pairs.into_iter().collect()),
        })
    }

    /// Number of entries.
    pub fn size(&self) -> usize {
        self.entries.read().len()
    }

    /// True when `key` is present.
    pub fn has(&self, key: &str) -> bool {
        self.entries.read().iter().any(|(k, _)| k == key)
    }

    /// Value for `key`, if present.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.entries
            .read()
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }

    /// Insert or update, keeping first-insertion order.
    pub fn set(&self, key: &str, value: Value) {
        let mut entries = self.entries.write();
        match entries.iter_mut().find(|(k, _)| k == key) {
            Some((_, slot)) => *slot = value,
            None => entries.push((key.to_string(), value)),
        }
    }

    /// Remove `key`; returns whether it was present.
    pub fn delete(&self, key: &str) -> bool {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|(k, _)| k != key);
        entries.len() != before
    }

    /// Keys in insertion order.
    pub fn keys(&self) -> Vec<String> {
        self.entries.read().iter().map(|(k, _)| k.clone()).collect()
    }

    /// Values in insertion order.
    pub fn values(&self) -> Vec<Value> {
        self.entries.read().iter().map(|(_, v)| v.clone()).collect()
    }

    /// `(key, value)` pairs in insertion order.
    pub fn entries(&self) -> Vec<(String, Value)> {
        self.entries.read().clone()
    }

    /// Visit every entry in insertion order.
    pub fn for_each(&self, mut f: impl FnMut(&str, &Value)) {
        for (k, v) in self.entries.read().iter() {
            f(k, v);
        }
    }
}

impl fmt::Debug for ApiMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiMap").field("keys", &self.keys()).finish()
    }
}

/// An insertion-ordered string set surfaced directly through the bound API.
#[derive(Default)]
pub struct ApiSet {
    items: RwLock<Vec<String>>,
}

impl ApiSet {
    /// Empty set.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Set seeded from items, first occurrence wins.
    pub fn from_items(items: impl IntoIterator<Item = String>) -> Arc<Self> {
        let set = Self::new();
        for item in items {
            set.add(&item);
        }
        set
    }

    /// Number of members.
    pub fn size(&self) -> usize {
        self.items.read().len()
    }

    /// Membership test.
    pub fn has(&self, item: &str) -> bool {
        self.items.read().iter().any(|i| i == item)
    }

    /// Add a member if absent; returns whether it was added.
    pub fn add(&self, item: &str) -> bool {
        let mut items = self.items.write();
        if items.iter().any(|i| i == item) {
            return false;
        }
        items.push(item.to_string());
        true
    }

    /// Remove a member; returns whether it was present.
    pub fn delete(&self, item: &str) -> bool {
        let mut items = self.items.write();
        let before = items.len();
        items.retain(|i| i != item);
        items.len() != before
    }

    /// Members in insertion order.
    pub fn values(&self) -> Vec<String> {
        self.items.read().clone()
    }

    /// Visit every member in insertion order.
    pub fn for_each(&self, mut f: impl FnMut(&str)) {
        for item in self.items.read().iter() {
            f(item);
        }
    }
}

impl fmt::Debug for ApiSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiSet").field("items", &self.values()).finish()
    }
}

/// Wrap a synchronous closure as a module call target.
///
/// ```rust
/// use slothlet::value::{sync_fn, Value};
///
/// let add = sync_fn(|ctx| {
///     let a = ctx.arg(0).as_i64().unwrap_or(0);
///     let b = ctx.arg(1).as_i64().unwrap_or(0);
///     Ok(Value::from(a + b))
/// });
/// ```
pub fn sync_fn<F>(f: F) -> NativeFn
where
    F: Fn(FnCtx) -> crate::Result<Value> + Send + Sync + 'static,
{
    Arc::new(move |ctx| {
        let out = f(ctx);
        Box::pin(async move { out })
    })
}

/// Wrap an async closure as a module call target.
pub fn async_fn<F, Fut>(f: F) -> NativeFn
where
    F: Fn(FnCtx) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = crate::Result<Value>> + Send + 'static,
{
    Arc::new(move |ctx| Box::pin(f(ctx)))
}
