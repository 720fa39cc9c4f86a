// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Module loading - the L2 layer.
//!
//! A [`ModuleDecoder`] reads one source file and produces an
//! [`ExportRecord`]: the format-agnostic surface of a module (optional
//! default export, named exports, callability). The [`DecoderSet`] routes a
//! file to its decoder by extension. Built-ins cover JSON and TOML data
//! files plus `.module` files backed by the native module registry; hosts
//! embedding another format plug in their own decoder.

mod json;
pub mod native;
mod toml_decoder;

pub use json::JsonDecoder;
pub use native::NativeDecoder;
pub use toml_decoder::TomlDecoder;

use crate::value::{FunctionValue, Namespace, Value};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// The normalized surface of one source file.
#[derive(Debug, Default, Clone)]
pub struct ExportRecord {
    /// The default export, if the module has one.
    pub default: Option<Value>,
    /// Named exports in declaration order.
    pub named: BTreeMap<String, Value>,
}

impl ExportRecord {
    /// A record with only a default export.
    pub fn of_default(value: Value) -> Self {
        Self {
            default: Some(value),
            named: BTreeMap::new(),
        }
    }

    /// A record with only named exports.
    pub fn of_named(named: impl IntoIterator<Item = (String, Value)>) -> Self {
        Self {
            default: None,
            named: named.into_iter().collect(),
        }
    }

    /// Add a named export.
    #[must_use]
    pub fn with_named(mut self, name: impl Into<String>, value: Value) -> Self {
        self.named.insert(name.into(), value);
        self
    }

    /// True when the default export is a function.
    pub fn is_callable(&self) -> bool {
        matches!(self.default, Some(Value::Function(_)))
    }

    /// Collapse the record into a single bound-tree node.
    ///
    /// - callable default + named exports: the function carries the named
    ///   exports as properties;
    /// - non-callable default, no named exports: the default value itself;
    /// - object default + named exports: a namespace holding a shallow copy
    ///   of the object's fields with the named exports merged over them;
    /// - named exports only: a namespace of the named exports.
    pub fn into_node(self) -> Value {
        match (self.default, self.named) {
            (Some(Value::Function(f)), named) => {
                for (name, value) in named {
                    f.set_prop(&name, value);
                }
                Value::Function(f)
            }
            (Some(default), named) if named.is_empty() => default,
            (Some(Value::Data(serde_json::Value::Object(fields))), named) => {
                let mut entries: BTreeMap<String, Value> = fields
                    .into_iter()
                    .map(|(k, v)| (k, Value::Data(v)))
                    .collect();
                entries.extend(named);
                Value::Namespace(Namespace::from_entries(entries))
            }
            (Some(default), _named) => {
                // A non-object, non-callable default cannot carry extra
                // properties; the named exports lose to the default.
                default
            }
            (None, named) => Value::Namespace(Namespace::from_entries(named)),
        }
    }
}

/// Decodes one module format into [`ExportRecord`]s.
#[async_trait]
pub trait ModuleDecoder: Send + Sync {
    /// Extensions (without the dot) this decoder claims.
    fn extensions(&self) -> &[&str];

    /// Read and decode the file at `path`.
    async fn decode(&self, path: &Path) -> crate::Result<ExportRecord>;
}

/// An ordered set of decoders; first extension match wins.
#[derive(Clone)]
pub struct DecoderSet {
    decoders: Vec<Arc<dyn ModuleDecoder>>,
}

impl Default for DecoderSet {
    fn default() -> Self {
        Self {
            decoders: vec![
                Arc::new(JsonDecoder),
                Arc::new(TomlDecoder),
                Arc::new(NativeDecoder),
            ],
        }
    }
}

impl fmt::Debug for DecoderSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DecoderSet")
            .field("extensions", &self.extensions())
            .finish()
    }
}

impl DecoderSet {
    /// An empty set (no formats recognized).
    pub fn empty() -> Self {
        Self { decoders: Vec::new() }
    }

    /// Append a decoder; later registrations lose extension ties.
    pub fn register(&mut self, decoder: Arc<dyn ModuleDecoder>) {
        self.decoders.push(decoder);
    }

    /// Every extension the set recognizes.
    pub fn extensions(&self) -> Vec<&str> {
        self.decoders
            .iter()
            .flat_map(|d| d.extensions().iter().copied())
            .collect()
    }

    /// True when `path` has an extension some decoder claims.
    pub fn recognizes(&self, path: &Path) -> bool {
        self.decoder_for(path).is_some()
    }

    fn decoder_for(&self, path: &Path) -> Option<&Arc<dyn ModuleDecoder>> {
        let ext = path.extension()?.to_str()?;
        self.decoders
            .iter()
            .find(|d| d.extensions().iter().any(|e| e.eq_ignore_ascii_case(ext)))
    }

    /// Decode the module at `path`.
    pub async fn load(&self, path: &Path) -> crate::Result<ExportRecord> {
        let decoder = self.decoder_for(path).ok_or_else(|| {
            crate::Error::Access(format!(
                "no decoder for module file '{}'",
                path.display()
            ))
        })?;
        tracing::trace!(path = %path.display(), "decoding module file");
        decoder.decode(path).await
    }
}

/// Build a callable export record from a bare target function.
pub fn callable(target: crate::value::NativeFn) -> ExportRecord {
    ExportRecord::of_default(Value::Function(FunctionValue::new(target)))
}
