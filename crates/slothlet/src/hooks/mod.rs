// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! The hook manager - the L5 registry.
//!
//! Hooks are user callbacks that observe (and may rewrite) every leaf
//! invocation whose path matches their pattern. Four phases exist per
//! invocation - `before`, `after`, `error`, `always` - and inside each
//! phase three subsets (`before`, `primary`, `after`) give users a layering
//! knob. Ordering is deterministic:
//!
//! - before phase: subset order, then priority descending, then
//!   registration order;
//! - after phase: subset order, then priority ascending, then registration
//!   order (the after chain composes from the innermost result outward);
//! - error/always phases: like the before phase.

pub mod pattern;

use crate::value::Value;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use parking_lot::RwLock;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

pub use pattern::{compile, expand_braces, pattern_to_regex, CompiledPattern, MAX_BRACE_DEPTH};

/// The four pipeline phases a hook can attach to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HookPhase {
    /// Runs before the target; may rewrite args or short-circuit.
    Before,
    /// Runs after the target; may rewrite the result.
    After,
    /// Runs when any stage raised.
    Error,
    /// Runs unconditionally at the end of every invocation.
    Always,
}

impl HookPhase {
    /// Parse the wire spelling.
    pub fn parse(s: &str) -> crate::Result<Self> {
        match s {
            "before" => Ok(HookPhase::Before),
            "after" => Ok(HookPhase::After),
            "error" => Ok(HookPhase::Error),
            "always" => Ok(HookPhase::Always),
            other => Err(crate::Error::Validation(format!(
                "Invalid hook phase: '{other}'"
            ))),
        }
    }
}

/// Sub-ordering inside a phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HookSubset {
    /// Outermost layer.
    Before,
    /// The default layer.
    #[default]
    Primary,
    /// Innermost layer.
    After,
}

impl HookSubset {
    /// Parse the wire spelling.
    pub fn parse(s: &str) -> crate::Result<Self> {
        match s {
            "before" => Ok(HookSubset::Before),
            "primary" => Ok(HookSubset::Primary),
            "after" => Ok(HookSubset::After),
            other => Err(crate::Error::Validation(format!(
                "Invalid hook subset: '{other}'"
            ))),
        }
    }
}

/// Which stage of the pipeline produced an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineStage {
    /// A before-phase hook.
    Before,
    /// The target function itself.
    Function,
    /// An after-phase hook.
    After,
    /// An always-phase hook.
    Always,
}

/// Frame identifying where in the pipeline an error was raised.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorSource {
    /// The stage that raised.
    pub stage: PipelineStage,
    /// Subset of the offending hook, when a hook raised.
    pub subset: Option<HookSubset>,
    /// Id of the offending hook, when a hook raised.
    pub hook_id: Option<String>,
    /// When the error was captured.
    pub timestamp: DateTime<Utc>,
    /// Rendered error message.
    pub message: String,
}

/// What a hook handler observes.
#[derive(Clone)]
pub struct HookEvent {
    /// Dot path of the invoked leaf.
    pub path: String,
    /// Phase this handler is running in.
    pub phase: HookPhase,
    /// Subset this handler registered under.
    pub subset: HookSubset,
    /// Current arguments (after earlier rewrites).
    pub args: Vec<Value>,
    /// Current result, for after-phase and always-phase handlers.
    pub result: Option<Value>,
    /// Error frame, for error-phase handlers.
    pub error: Option<ErrorSource>,
    /// True when any stage of this invocation raised (always phase).
    pub has_error: bool,
    /// Messages of every error captured so far (always phase).
    pub errors: Vec<String>,
    /// Effective context of the invocation.
    pub context: serde_json::Value,
    /// The bound API, when the instance is alive.
    pub api: Option<crate::api::BoundApi>,
}

impl fmt::Debug for HookEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookEvent")
            .field("path", &self.path)
            .field("phase", &self.phase)
            .field("subset", &self.subset)
            .field("args", &self.args.len())
            .field("has_error", &self.has_error)
            .finish()
    }
}

/// What a handler's return value means to the pipeline.
///
/// The typed rendition of the loose return conventions: `Pass` leaves
/// everything unchanged, `Args` rewrites the argument vector (before
/// phase), `ShortCircuit` bypasses the target and remaining before hooks
/// (before/primary subsets of the before phase only), `Replace` rewrites
/// the result (after phase). Verdicts that make no sense for the current
/// phase are ignored.
#[derive(Debug, Clone)]
pub enum HookVerdict {
    /// No change.
    Pass,
    /// New argument vector for the rest of the before pipeline.
    Args(Vec<Value>),
    /// Bypass the target; this value is the result.
    ShortCircuit(Value),
    /// New result for the rest of the after pipeline.
    Replace(Value),
}

/// A hook handler.
pub type HookFn = Arc<dyn Fn(HookEvent) -> BoxFuture<'static, crate::Result<HookVerdict>> + Send + Sync>;

/// Wrap a synchronous closure as a hook handler.
pub fn sync_hook<F>(f: F) -> HookFn
where
    F: Fn(HookEvent) -> crate::Result<HookVerdict> + Send + Sync + 'static,
{
    Arc::new(move |event| {
        let out = f(event);
        Box::pin(async move { out })
    })
}

/// Wrap an async closure as a hook handler.
pub fn async_hook<F, Fut>(f: F) -> HookFn
where
    F: Fn(HookEvent) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = crate::Result<HookVerdict>> + Send + 'static,
{
    Arc::new(move |event| Box::pin(f(event)))
}

/// Registration options for [`HookManager::on`].
#[derive(Clone, Default)]
pub struct HookOptions {
    /// Explicit id; generated when absent.
    pub id: Option<String>,
    /// Path pattern; defaults to `**`.
    pub pattern: Option<String>,
    /// Priority; higher runs earlier in the before phase, later in the
    /// after phase. Defaults to 0.
    pub priority: i32,
    /// Subset; defaults to `primary`.
    pub subset: HookSubset,
    /// Owning module; the hook dies with the module.
    pub module_id: Option<String>,
}

impl HookOptions {
    /// Options with just a pattern.
    pub fn pattern(pattern: impl Into<String>) -> Self {
        Self {
            pattern: Some(pattern.into()),
            ..Self::default()
        }
    }

    /// Set the priority.
    #[must_use]
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Set the subset.
    #[must_use]
    pub fn subset(mut self, subset: HookSubset) -> Self {
        self.subset = subset;
        self
    }

    /// Set an explicit id.
    #[must_use]
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Set the owning module.
    #[must_use]
    pub fn module_id(mut self, module_id: impl Into<String>) -> Self {
        self.module_id = Some(module_id.into());
        self
    }
}

/// A registered hook.
pub struct Hook {
    /// Unique id within the manager.
    pub id: String,
    /// Phase the hook runs in.
    pub phase: HookPhase,
    /// Subset layering within the phase.
    pub subset: HookSubset,
    /// The registered pattern string.
    pub pattern: String,
    /// Priority.
    pub priority: i32,
    /// Owning module, if any.
    pub module_id: Option<String>,
    pub(crate) handler: HookFn,
    compiled: Arc<CompiledPattern>,
    seq: u64,
}

impl Hook {
    /// Does this hook observe `path`?
    pub fn matches(&self, path: &str) -> bool {
        self.compiled.matches(path)
    }
}

impl fmt::Debug for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Hook")
            .field("id", &self.id)
            .field("phase", &self.phase)
            .field("subset", &self.subset)
            .field("pattern", &self.pattern)
            .field("priority", &self.priority)
            .finish()
    }
}

/// Serializable entry in a hook listing.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HookInfo {
    /// Hook id.
    pub id: String,
    /// Phase.
    pub phase: HookPhase,
    /// Subset.
    pub subset: HookSubset,
    /// Pattern string as registered.
    pub pattern: String,
    /// Priority.
    pub priority: i32,
    /// Owning module.
    pub module_id: Option<String>,
}

/// The result of [`HookManager::list`].
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HookList {
    /// Every registered hook, in registration order.
    pub registered_hooks: Vec<HookInfo>,
}

/// Pattern-indexed hook registry for one instance.
pub struct HookManager {
    hooks: RwLock<Vec<Arc<Hook>>>,
    enabled: AtomicBool,
    suppress_errors: AtomicBool,
    global_pattern: RwLock<Option<Arc<CompiledPattern>>>,
    next_seq: AtomicU64,
}

impl HookManager {
    /// Build a manager from instance configuration.
    pub fn new(config: &crate::config::HooksConfig) -> crate::Result<Self> {
        let global_pattern = match &config.pattern {
            Some(p) => Some(compile(p)?),
            None => None,
        };
        Ok(Self {
            hooks: RwLock::new(Vec::new()),
            enabled: AtomicBool::new(config.enabled),
            suppress_errors: AtomicBool::new(config.suppress_errors),
            global_pattern: RwLock::new(global_pattern),
            next_seq: AtomicU64::new(0),
        })
    }

    /// Register a hook. Pattern problems (including brace depth) are
    /// rejected here, not at call time.
    pub fn on(
        &self,
        phase: HookPhase,
        handler: HookFn,
        options: HookOptions,
    ) -> crate::Result<String> {
        let pattern = options.pattern.unwrap_or_else(|| "**".to_string());
        let compiled = compile(&pattern)?;
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let id = options.id.unwrap_or_else(|| format!("hook_{seq}"));

        let hook = Arc::new(Hook {
            id: id.clone(),
            phase,
            subset: options.subset,
            pattern,
            priority: options.priority,
            module_id: options.module_id,
            handler,
            compiled,
            seq,
        });
        tracing::debug!(id = %hook.id, phase = ?phase, pattern = %hook.pattern, "hook registered");
        self.hooks.write().push(hook);
        Ok(id)
    }

    /// Remove a hook by id. Returns whether it existed.
    pub fn off(&self, id: &str) -> bool {
        let mut hooks = self.hooks.write();
        let before = hooks.len();
        hooks.retain(|h| h.id != id);
        hooks.len() != before
    }

    /// Remove every hook.
    pub fn clear(&self) {
        self.hooks.write().clear();
    }

    /// Remove every hook owned by `module_id`. Returns how many died.
    pub fn remove_module(&self, module_id: &str) -> usize {
        let mut hooks = self.hooks.write();
        let before = hooks.len();
        hooks.retain(|h| h.module_id.as_deref() != Some(module_id));
        before - hooks.len()
    }

    /// Turn the pipeline on, optionally narrowing it to a global pattern.
    pub fn enable(&self, pattern: Option<&str>) -> crate::Result<()> {
        let compiled = match pattern {
            Some(p) => Some(compile(p)?),
            None => None,
        };
        *self.global_pattern.write() = compiled;
        self.enabled.store(true, Ordering::Release);
        Ok(())
    }

    /// Turn the pipeline off entirely.
    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Release);
    }

    /// Is the pipeline globally on?
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Swallow pipeline errors instead of rethrowing them?
    pub fn suppress_errors(&self) -> bool {
        self.suppress_errors.load(Ordering::Acquire)
    }

    /// Change the suppress-errors behavior.
    pub fn set_suppress_errors(&self, on: bool) {
        self.suppress_errors.store(on, Ordering::Release);
    }

    /// Should the pipeline run at all for `path`?
    pub fn active_for(&self, path: &str) -> bool {
        if !self.is_enabled() {
            return false;
        }
        if let Some(gate) = self.global_pattern.read().as_ref() {
            if !gate.matches(path) {
                return false;
            }
        }
        self.hooks.read().iter().any(|h| h.matches(path))
    }

    /// Matching hooks for one phase, in execution order.
    pub fn matching(&self, phase: HookPhase, path: &str) -> Vec<Arc<Hook>> {
        let mut hooks: Vec<Arc<Hook>> = self
            .hooks
            .read()
            .iter()
            .filter(|h| h.phase == phase && h.matches(path))
            .cloned()
            .collect();

        hooks.sort_by(|a, b| {
            a.subset.cmp(&b.subset).then_with(|| {
                let by_priority = match phase {
                    // The after chain composes inner-to-outer: higher
                    // priority runs later.
                    HookPhase::After => a.priority.cmp(&b.priority),
                    _ => b.priority.cmp(&a.priority),
                };
                by_priority.then(a.seq.cmp(&b.seq))
            })
        });
        hooks
    }

    /// Listing for diagnostics, optionally filtered by phase.
    pub fn list(&self, phase: Option<HookPhase>) -> HookList {
        let hooks = self.hooks.read();
        let registered_hooks = hooks
            .iter()
            .filter(|h| phase.map_or(true, |p| h.phase == p))
            .map(|h| HookInfo {
                id: h.id.clone(),
                phase: h.phase,
                subset: h.subset,
                pattern: h.pattern.clone(),
                priority: h.priority,
                module_id: h.module_id.clone(),
            })
            .collect();
        HookList { registered_hooks }
    }

    /// Number of registered hooks.
    pub fn len(&self) -> usize {
        self.hooks.read().len()
    }

    /// True when nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.hooks.read().is_empty()
    }
}

impl fmt::Debug for HookManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HookManager")
            .field("hooks", &self.len())
            .field("enabled", &self.is_enabled())
            .finish()
    }
}
