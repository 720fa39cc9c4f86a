// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! # Slothlet
//!
//! Filesystem-driven API loader: point it at a directory of module files
//! and get back one bound API whose shape mirrors the directory tree and
//! whose leaves are the modules' exported values.
//!
//! - **Smart flattening** - a folder containing a like-named file collapses
//!   one level, so `config/config.json` binds at `config`, not
//!   `config.config`.
//! - **Eager or lazy materialization** - load everything up front, or let
//!   subtrees materialize on first access through self-replacing
//!   placeholders.
//! - **Hook pipeline** - pattern-addressed before/after/error/always hooks
//!   around every leaf invocation, with argument rewriting, result
//!   rewriting, and short-circuiting.
//! - **Live extension and hot reload** - `add_api`, `remove_api`,
//!   `reload_api`, and `reload` splice subtrees in and out under ownership
//!   tracking while consumers keep their handles.
//! - **Per-request context** - `run`/`scope` carry a task-local context
//!   through async boundaries and across instrumented emitter callbacks.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use slothlet::{SlothletConfig, value::Value};
//!
//! # #[tokio::main]
//! # async fn main() -> slothlet::Result<()> {
//! let api = slothlet::load(SlothletConfig::new("./api")).await?;
//!
//! // api/math.module -> api.math; invoke a leaf through the hook pipeline.
//! let sum = api.call("math.add", vec![Value::from(2), Value::from(3)]).await?;
//! assert_eq!(sum, Value::from(5));
//!
//! // Data files surface as values.
//! let theme = api.get("config.theme").await?;
//! # let _ = theme;
//! # Ok(())
//! # }
//! ```
//!
//! # Module formats
//!
//! The loader decodes `.json` and `.toml` data files out of the box, and
//! `.module` files that select entries from the native module registry
//! ([`loader::native::register`]). Additional formats plug in through
//! [`loader::ModuleDecoder`].

pub mod api;
pub mod build;
pub mod config;
pub mod context;
pub mod discovery;
pub mod emitter;
pub mod error;
pub mod hooks;
pub mod loader;
pub mod ownership;
pub mod registry;
pub mod sanitize;
pub mod value;

mod invoke;

pub use api::{AddApiOptions, BoundApi, RemoveSpec, ScopeOptions};
pub use config::{HooksConfig, MergeStrategy, Mode, Runtime, ScopeConfig, SlothletConfig};
pub use error::{Error, Result};
pub use registry::instance_count;

/// Load a directory as a bound API.
///
/// This is the factory: it validates `config`, discovers and builds the
/// tree under the configured materialization strategy, registers the
/// instance, and returns the [`BoundApi`] handle.
pub async fn load(config: SlothletConfig) -> Result<BoundApi> {
    BoundApi::create(config).await
}
