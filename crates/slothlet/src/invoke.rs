// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! The invocation pipeline - every leaf call goes through here.
//!
//! Order of operations for one call:
//!
//! 1. before phase (subsets before -> primary -> after): each hook may
//!    rewrite the argument vector or short-circuit with a result;
//! 2. the target function, unless short-circuited;
//! 3. after phase: each hook may replace the result;
//! 4. always phase: unconditional, return values ignored;
//! 5. error phase: fed every captured error with a frame naming the stage
//!    that raised it. With `suppressErrors` the caller gets null instead of
//!    the rethrow; always still runs either way.
//!
//! Hooks only fire for invocations. Property reads - including the
//! control-plane surface of the bound API - never enter this pipeline.

use crate::hooks::{ErrorSource, HookEvent, HookPhase, HookSubset, HookVerdict, PipelineStage};
use crate::registry::InstanceCore;
use crate::value::{FnCtx, FunctionHandle, Value};
use chrono::Utc;
use std::sync::Arc;

/// Invoke `func` with `args` through the full pipeline.
pub(crate) async fn invoke(func: FunctionHandle, args: Vec<Value>) -> crate::Result<Value> {
    let path = func.path();
    let Some(instance) = func.instance() else {
        // Unmounted function: no instance, no hooks, empty context.
        let ctx = FnCtx {
            args,
            context: serde_json::Value::Object(Default::default()),
            path,
            api: None,
        };
        return (func.target())(ctx).await;
    };

    let context = instance.effective_context();
    let api = Some(crate::api::BoundApi::from_core(instance.clone()));

    if instance.is_shut_down() || !instance.hooks.active_for(&path) {
        let ctx = FnCtx {
            args,
            context,
            path: path.clone(),
            api,
        };
        return call_target(&func, ctx, &path).await;
    }

    Pipeline {
        func,
        instance,
        path,
        context,
        api,
    }
    .run(args)
    .await
}

struct Pipeline {
    func: FunctionHandle,
    instance: Arc<InstanceCore>,
    path: String,
    context: serde_json::Value,
    api: Option<crate::api::BoundApi>,
}

impl Pipeline {
    fn event(&self, phase: HookPhase, subset: HookSubset, args: &[Value]) -> HookEvent {
        HookEvent {
            path: self.path.clone(),
            phase,
            subset,
            args: args.to_vec(),
            result: None,
            error: None,
            has_error: false,
            errors: Vec::new(),
            context: self.context.clone(),
            api: self.api.clone(),
        }
    }

    async fn run(self, mut args: Vec<Value>) -> crate::Result<Value> {
        let mut captured: Vec<(ErrorSource, crate::Error)> = Vec::new();
        let mut result: Option<Value> = None;
        let mut short_circuited = false;

        // Before phase.
        for hook in self.instance.hooks.matching(HookPhase::Before, &self.path) {
            let event = self.event(HookPhase::Before, hook.subset, &args);
            match (hook.handler)(event).await {
                Ok(HookVerdict::Pass) | Ok(HookVerdict::Replace(_)) => {}
                Ok(HookVerdict::Args(new_args)) => args = new_args,
                Ok(HookVerdict::ShortCircuit(value)) => {
                    if hook.subset == HookSubset::After {
                        // Only the before/primary layers may bypass the
                        // target; the innermost layer sees args last.
                        if self.instance.debug {
                            tracing::debug!(
                                hook = %hook.id,
                                path = %self.path,
                                "short-circuit from after-subset before hook ignored"
                            );
                        }
                        continue;
                    }
                    if self.instance.debug {
                        tracing::debug!(hook = %hook.id, path = %self.path, "invocation short-circuited");
                    }
                    result = Some(value);
                    short_circuited = true;
                    break;
                }
                Err(err) => {
                    captured.push(self.capture_hook_error(
                        PipelineStage::Before,
                        hook.subset,
                        &hook.id,
                        err,
                    ));
                    return self.fail(captured).await;
                }
            }
        }

        // Target.
        if !short_circuited {
            let ctx = FnCtx {
                args: args.clone(),
                context: self.context.clone(),
                path: self.path.clone(),
                api: self.api.clone(),
            };
            match call_target(&self.func, ctx, &self.path).await {
                Ok(value) => result = Some(value),
                Err(err) => {
                    let source = ErrorSource {
                        stage: PipelineStage::Function,
                        subset: None,
                        hook_id: None,
                        timestamp: Utc::now(),
                        message: err.to_string(),
                    };
                    captured.push((source, err));
                    return self.fail(captured).await;
                }
            }
        }

        // After phase: each hook sees the current result and may replace
        // it; the chain composes from the innermost result outward.
        let mut current = result.unwrap_or(Value::Null);
        for hook in self.instance.hooks.matching(HookPhase::After, &self.path) {
            let mut event = self.event(HookPhase::After, hook.subset, &args);
            event.result = Some(current.clone());
            match (hook.handler)(event).await {
                Ok(HookVerdict::Replace(value)) | Ok(HookVerdict::ShortCircuit(value)) => {
                    current = value;
                }
                Ok(HookVerdict::Pass) | Ok(HookVerdict::Args(_)) => {}
                Err(err) => {
                    captured.push(self.capture_hook_error(
                        PipelineStage::After,
                        hook.subset,
                        &hook.id,
                        err,
                    ));
                    return self.fail(captured).await;
                }
            }
        }

        // Always phase: runs whatever happened; its errors feed the error
        // hooks but never the caller.
        self.run_always(&args, Some(&current), &[]).await;

        Ok(current)
    }

    fn capture_hook_error(
        &self,
        stage: PipelineStage,
        subset: HookSubset,
        hook_id: &str,
        err: crate::Error,
    ) -> (ErrorSource, crate::Error) {
        let wrapped = crate::Error::Hook {
            path: self.path.clone(),
            hook_id: hook_id.to_string(),
            source: Box::new(err),
        };
        let source = ErrorSource {
            stage,
            subset: Some(subset),
            hook_id: Some(hook_id.to_string()),
            timestamp: Utc::now(),
            message: wrapped.to_string(),
        };
        (source, wrapped)
    }

    /// The failure tail: error hooks, then always hooks, then either the
    /// rethrow or the suppressed null.
    async fn fail(self, captured: Vec<(ErrorSource, crate::Error)>) -> crate::Result<Value> {
        for (source, _) in &captured {
            self.run_error_hooks(source).await;
        }

        let messages: Vec<String> = captured.iter().map(|(s, _)| s.message.clone()).collect();
        self.run_always(&[], None, &messages).await;

        if self.instance.hooks.suppress_errors() {
            if self.instance.debug {
                tracing::debug!(path = %self.path, "pipeline error suppressed");
            }
            return Ok(Value::Null);
        }
        let (_, first) = captured
            .into_iter()
            .next()
            .unwrap_or_else(|| unreachable_error(&self.path));
        Err(first)
    }

    async fn run_error_hooks(&self, source: &ErrorSource) {
        for hook in self.instance.hooks.matching(HookPhase::Error, &self.path) {
            let mut event = self.event(HookPhase::Error, hook.subset, &[]);
            event.error = Some(source.clone());
            event.has_error = true;
            if let Err(err) = (hook.handler)(event).await {
                tracing::debug!(hook = %hook.id, path = %self.path, error = %err, "error hook raised");
            }
        }
    }

    async fn run_always(&self, args: &[Value], result: Option<&Value>, errors: &[String]) {
        for hook in self.instance.hooks.matching(HookPhase::Always, &self.path) {
            let mut event = self.event(HookPhase::Always, hook.subset, args);
            event.result = result.cloned();
            event.has_error = !errors.is_empty();
            event.errors = errors.to_vec();
            if let Err(err) = (hook.handler)(event).await {
                // Always-pipeline errors go to the error hooks, never to
                // the caller.
                let source = ErrorSource {
                    stage: PipelineStage::Always,
                    subset: Some(hook.subset),
                    hook_id: Some(hook.id.clone()),
                    timestamp: Utc::now(),
                    message: err.to_string(),
                };
                self.run_error_hooks(&source).await;
            }
        }
    }
}

async fn call_target(
    func: &FunctionHandle,
    ctx: FnCtx,
    path: &str,
) -> crate::Result<Value> {
    (func.target())(ctx).await.map_err(|err| match err {
        already @ crate::Error::Target { .. } => already,
        other => crate::Error::Target {
            path: path.to_string(),
            source: Box::new(other),
        },
    })
}

fn unreachable_error(path: &str) -> (ErrorSource, crate::Error) {
    // fail() is only entered with at least one captured error.
    (
        ErrorSource {
            stage: PipelineStage::Function,
            subset: None,
            hook_id: None,
            timestamp: Utc::now(),
            message: "pipeline failure with no captured error".to_string(),
        },
        crate::Error::Target {
            path: path.to_string(),
            source: Box::new(crate::Error::Module(
                "pipeline failure with no captured error".to_string(),
            )),
        },
    )
}
