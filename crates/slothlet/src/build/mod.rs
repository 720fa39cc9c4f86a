// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Tree builders - the L3 layer.
//!
//! Both materialization strategies share one assembly routine that turns a
//! classified [`DirNode`](crate::discovery::DirNode) into a bound-tree
//! value: the inlined file (if any) forms the folder's own node, sibling
//! files attach as children, and subfolders either recurse (eager) or
//! become self-replacing placeholders (lazy). A separate mounting pass
//! tags every function with its api path and instance link.

pub mod lazy;
pub mod rebind;

use crate::discovery::DirNode;
use crate::registry::InstanceCore;
use crate::value::{Namespace, Value};
use futures::future::BoxFuture;
use futures::FutureExt;
use lazy::{ParentSlot, Placeholder};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Build the value for a classified folder.
///
/// `api_path` is the folder's own dot path ("" for the root), `depth` its
/// nesting level below the mount, `lazy` whether subfolders defer.
pub(crate) fn assemble<'a>(
    node: &'a DirNode,
    api_path: &'a str,
    instance: &'a Arc<InstanceCore>,
    lazy: bool,
    depth: usize,
) -> BoxFuture<'a, crate::Result<Value>> {
    async move {
        instance
            .sources
            .insert(api_path.to_string(), node.dir.clone());

        // The folder's own node.
        let mut base = match &node.inline {
            Some(file) => instance.decoders.load(&file.path).await?.into_node(),
            None => Value::Namespace(Namespace::new()),
        };

        let has_children = !node.files.is_empty() || !node.children.is_empty();
        if has_children {
            // A primitive folder node cannot take sibling entries.
            if base.is_primitive() || matches!(base, Value::Map(_) | Value::Set(_)) {
                return Err(crate::Error::Validation(format!(
                    "cannot add properties to primitive value at '{api_path}'"
                )));
            }
            // An object default with siblings re-forms as a namespace so
            // both surfaces merge.
            if let Value::Data(serde_json::Value::Object(fields)) = base {
                let entries: BTreeMap<String, Value> = fields
                    .into_iter()
                    .map(|(k, v)| (k, Value::Data(v)))
                    .collect();
                base = Value::Namespace(Namespace::from_entries(entries));
            }
        }

        fill_level(&base, node, api_path, instance, lazy, depth).await?;
        Ok(base)
    }
    .boxed()
}

/// Attach a classified folder's sibling files and subfolders onto an
/// existing base node. The inline file is the caller's business; this
/// routine only handles children, so the root level can reuse it against
/// the instance's stable root handle.
pub(crate) fn fill_level<'a>(
    base: &'a Value,
    node: &'a DirNode,
    api_path: &'a str,
    instance: &'a Arc<InstanceCore>,
    lazy: bool,
    depth: usize,
) -> BoxFuture<'a, crate::Result<()>> {
    async move {
        for file in &node.files {
            let child = instance.decoders.load(&file.path).await?.into_node();
            attach(base, &file.segment, child, api_path)?;
        }

        for subdir in &node.children {
            let child_path = join_path(api_path, &subdir.segment);
            let child = if lazy {
                let slot = slot_of(base, api_path)?;
                Value::Lazy(Placeholder::new(
                    subdir.dir.clone(),
                    child_path,
                    subdir.segment.clone(),
                    slot,
                    Arc::downgrade(instance),
                    depth + 1,
                ))
            } else {
                assemble(subdir, &child_path, instance, false, depth + 1).await?
            };
            attach(base, &subdir.segment, child, api_path)?;
        }
        Ok(())
    }
    .boxed()
}

fn attach(base: &Value, segment: &str, child: Value, api_path: &str) -> crate::Result<()> {
    match base {
        Value::Namespace(ns) => {
            ns.insert(segment, child);
            Ok(())
        }
        Value::Function(f) => {
            f.set_prop(segment, child);
            Ok(())
        }
        _ => Err(crate::Error::Validation(format!(
            "cannot add properties to primitive value at '{api_path}'"
        ))),
    }
}

fn slot_of(base: &Value, api_path: &str) -> crate::Result<ParentSlot> {
    match base {
        Value::Namespace(ns) => Ok(ParentSlot::Namespace(ns.clone())),
        Value::Function(f) => Ok(ParentSlot::Function(f.clone())),
        _ => Err(crate::Error::Validation(format!(
            "cannot add properties to primitive value at '{api_path}'"
        ))),
    }
}

/// Join two dot-path fragments.
pub(crate) fn join_path(prefix: &str, segment: &str) -> String {
    if prefix.is_empty() {
        segment.to_string()
    } else {
        format!("{prefix}.{segment}")
    }
}

/// Tag every function in `value` with its api path and instance link.
/// Lazy placeholders carry their own path and tag their contents when
/// they materialize.
pub(crate) fn mount(value: &Value, api_path: &str, instance: &Arc<InstanceCore>) {
    match value {
        Value::Function(f) => {
            f.set_path(api_path);
            f.bind_instance(instance);
            for name in f.prop_names() {
                if let Some(prop) = f.prop(&name) {
                    mount(&prop, &join_path(api_path, &name), instance);
                }
            }
        }
        Value::Namespace(ns) => {
            for key in ns.keys() {
                if let Some(child) = ns.get(&key) {
                    mount(&child, &join_path(api_path, &key), instance);
                }
            }
        }
        Value::Data(_) | Value::Map(_) | Value::Set(_) | Value::Lazy(_) | Value::Null => {}
    }
}

/// Attach a frozen metadata record to every leaf-callable in `value`.
pub(crate) fn attach_metadata(value: &Value, metadata: &Arc<serde_json::Value>) {
    match value {
        Value::Function(f) => {
            f.set_metadata(metadata.clone());
            for name in f.prop_names() {
                if let Some(prop) = f.prop(&name) {
                    attach_metadata(&prop, metadata);
                }
            }
        }
        Value::Namespace(ns) => {
            for key in ns.keys() {
                if let Some(child) = ns.get(&key) {
                    attach_metadata(&child, metadata);
                }
            }
        }
        _ => {}
    }
}
