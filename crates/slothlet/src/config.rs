// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Instance configuration.
//!
//! [`SlothletConfig`] is accepted by [`crate::load`] and fixed for the
//! lifetime of the instance (a full `reload()` re-reads the directory, not
//! the configuration). All fields deserialize from camelCase so a JSON
//! config document reads the same as the programmatic builder.

use crate::loader::DecoderSet;
use crate::sanitize::SanitizeRules;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Materialization strategy for the bound tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Load every module up front.
    Eager,
    /// Materialize subtrees on first access.
    #[default]
    Lazy,
}

/// Binding style for leaves handed to consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Runtime {
    /// Standard bound object; deep references are rebuilt by a full reload.
    #[default]
    Async,
    /// Live bindings: consumer-held leaf references track updates across
    /// reloads via in-place body swaps.
    Live,
}

/// How a request context merges over the base context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeStrategy {
    /// Top-level keys replace wholesale.
    #[default]
    Shallow,
    /// Plain objects merge recursively; arrays and primitives replace.
    Deep,
}

/// Per-request context configuration (`api.run` / `api.scope`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ScopeConfig {
    /// `run`/`scope` are unavailable on this instance.
    Disabled,
    /// Enabled with a default merge strategy.
    Enabled {
        /// Default merge used when a call site does not override it.
        merge: MergeStrategy,
    },
}

impl Default for ScopeConfig {
    fn default() -> Self {
        ScopeConfig::Enabled {
            merge: MergeStrategy::Shallow,
        }
    }
}

impl ScopeConfig {
    /// The default merge strategy, if scoping is enabled.
    pub fn merge(&self) -> Option<MergeStrategy> {
        match self {
            ScopeConfig::Disabled => None,
            ScopeConfig::Enabled { merge } => Some(*merge),
        }
    }
}

/// Hook manager configuration.
///
/// `true`/`false` in a config document map to [`HooksConfig::enabled`] /
/// [`HooksConfig::disabled`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HooksConfig {
    /// Master switch; when false no hook ever runs.
    pub enabled: bool,
    /// Optional global pattern gate: hooks only fire for matching paths.
    pub pattern: Option<String>,
    /// Swallow pipeline errors and return null to the caller instead of
    /// rethrowing after the error hooks ran.
    pub suppress_errors: bool,
}

impl Default for HooksConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            pattern: None,
            suppress_errors: false,
        }
    }
}

impl HooksConfig {
    /// Hooks on, defaults for everything else.
    pub fn enabled() -> Self {
        Self::default()
    }

    /// Hooks fully off.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }
}

/// Configuration for one bound API instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SlothletConfig {
    /// Root directory loaded as the initial API. Required.
    pub dir: PathBuf,
    /// Materialization strategy.
    pub mode: Mode,
    /// Binding style.
    pub runtime: Runtime,
    /// Enable ownership tracking and the mutation operations (`reload`,
    /// `reloadApi`, `forceOverwrite`, `moduleId`).
    pub hot_reload: bool,
    /// Hook manager configuration.
    pub hooks: HooksConfig,
    /// Gate cross-module overwrite of paths without an owner claim.
    pub allow_api_overwrite: bool,
    /// Maximum folder-nesting depth materialized. `None` is unlimited.
    pub api_depth: Option<usize>,
    /// Base context, visible outside any `run`.
    pub context: serde_json::Value,
    /// Sidecar values surfaced as additional top-level keys.
    pub reference: serde_json::Value,
    /// Per-request context configuration.
    pub scope: ScopeConfig,
    /// Verbose instance logging.
    pub debug: bool,
    /// Filename sanitization rules.
    pub sanitize: SanitizeRules,
    /// Module format decoders. Skipped in serialized form; programmatic
    /// configs may replace the default set.
    #[serde(skip)]
    pub decoders: DecoderSet,
}

impl Default for SlothletConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::new(),
            mode: Mode::default(),
            runtime: Runtime::default(),
            hot_reload: false,
            hooks: HooksConfig::default(),
            allow_api_overwrite: true,
            api_depth: None,
            context: serde_json::Value::Object(Default::default()),
            reference: serde_json::Value::Object(Default::default()),
            scope: ScopeConfig::default(),
            debug: false,
            sanitize: SanitizeRules::default(),
            decoders: DecoderSet::default(),
        }
    }
}

impl SlothletConfig {
    /// Start a config rooted at `dir` with defaults everywhere else.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            ..Self::default()
        }
    }

    /// Set the materialization strategy.
    #[must_use]
    pub fn mode(mut self, mode: Mode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the binding style.
    #[must_use]
    pub fn runtime(mut self, runtime: Runtime) -> Self {
        self.runtime = runtime;
        self
    }

    /// Enable ownership tracking and mutation operations.
    #[must_use]
    pub fn hot_reload(mut self, on: bool) -> Self {
        self.hot_reload = on;
        self
    }

    /// Replace the hook configuration.
    #[must_use]
    pub fn hooks(mut self, hooks: HooksConfig) -> Self {
        self.hooks = hooks;
        self
    }

    /// Gate cross-module overwrites.
    #[must_use]
    pub fn allow_api_overwrite(mut self, allow: bool) -> Self {
        self.allow_api_overwrite = allow;
        self
    }

    /// Limit materialized folder depth.
    #[must_use]
    pub fn api_depth(mut self, depth: usize) -> Self {
        self.api_depth = Some(depth);
        self
    }

    /// Set the base context object.
    #[must_use]
    pub fn context(mut self, context: serde_json::Value) -> Self {
        self.context = context;
        self
    }

    /// Set the reference sidecar object.
    #[must_use]
    pub fn reference(mut self, reference: serde_json::Value) -> Self {
        self.reference = reference;
        self
    }

    /// Configure per-request scoping.
    #[must_use]
    pub fn scope(mut self, scope: ScopeConfig) -> Self {
        self.scope = scope;
        self
    }

    /// Toggle verbose logging.
    #[must_use]
    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Validate the parts of the config that must hold before any
    /// filesystem work starts.
    pub(crate) fn validate(&self) -> crate::Result<()> {
        if self.dir.as_os_str().is_empty() {
            return Err(crate::Error::validation(
                "'dir' must be a non-empty path to the root API directory",
            ));
        }
        if !self.context.is_object() {
            return Err(crate::Error::validation("context must be an object"));
        }
        if !self.reference.is_object() {
            return Err(crate::Error::validation(
                "'reference' must be an object of sidecar keys",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SlothletConfig::default();
        assert_eq!(config.mode, Mode::Lazy);
        assert_eq!(config.runtime, Runtime::Async);
        assert!(!config.hot_reload);
        assert!(config.allow_api_overwrite);
        assert_eq!(config.scope.merge(), Some(MergeStrategy::Shallow));
        assert!(config.hooks.enabled);
    }

    #[test]
    fn test_builder_chain() {
        let config = SlothletConfig::new("/tmp/api")
            .mode(Mode::Eager)
            .runtime(Runtime::Live)
            .hot_reload(true)
            .api_depth(3)
            .debug(true);
        assert_eq!(config.dir, PathBuf::from("/tmp/api"));
        assert_eq!(config.mode, Mode::Eager);
        assert_eq!(config.runtime, Runtime::Live);
        assert!(config.hot_reload);
        assert_eq!(config.api_depth, Some(3));
    }

    #[test]
    fn test_validate_rejects_non_object_context() {
        let config = SlothletConfig::new("/tmp/api").context(serde_json::json!(42));
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("context must be an object"));
    }

    #[test]
    fn test_validate_rejects_empty_dir() {
        let config = SlothletConfig::default();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_deserialize_camel_case() {
        let config: SlothletConfig = serde_json::from_value(serde_json::json!({
            "dir": "/srv/api",
            "mode": "eager",
            "hotReload": true,
            "allowApiOverwrite": false,
            "apiDepth": 2,
            "hooks": { "enabled": true, "suppressErrors": true }
        }))
        .unwrap();
        assert_eq!(config.mode, Mode::Eager);
        assert!(config.hot_reload);
        assert!(!config.allow_api_overwrite);
        assert_eq!(config.api_depth, Some(2));
        assert!(config.hooks.suppress_errors);
    }
}
