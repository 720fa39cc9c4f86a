// Copyright 2026 Dropbox (created by Andrew Yates <ayates@dropbox.com>)

//! Event emitter with automatic context propagation.
//!
//! [`Emitter`] is the EventEmitter-compatible surface instances instrument:
//! when a listener is registered while a per-request context store is
//! active, the emitter captures the active frames at *registration* time
//! and restores them around the listener when the event later fires. The
//! instances whose frames were captured track the listener and detach it at
//! `shutdown`. Listeners registered outside any store are left untouched
//! and untracked.

use crate::context::{self, ContextFrames};
use crate::value::Value;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// A registered listener callback.
pub type ListenerFn = Arc<dyn Fn(Vec<Value>) -> BoxFuture<'static, ()> + Send + Sync>;

/// Wrap a synchronous closure as a listener.
pub fn sync_listener<F>(f: F) -> ListenerFn
where
    F: Fn(Vec<Value>) + Send + Sync + 'static,
{
    Arc::new(move |args| {
        f(args);
        Box::pin(async {})
    })
}

/// Wrap an async closure as a listener.
pub fn async_listener<F, Fut>(f: F) -> ListenerFn
where
    F: Fn(Vec<Value>) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    Arc::new(move |args| Box::pin(f(args)))
}

struct Listener {
    id: Uuid,
    event: String,
    frames: Option<ContextFrames>,
    handler: ListenerFn,
}

#[derive(Default)]
pub(crate) struct EmitterInner {
    listeners: RwLock<Vec<Listener>>,
}

impl EmitterInner {
    pub(crate) fn remove_listener(&self, id: Uuid) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|l| l.id != id);
        listeners.len() != before
    }
}

/// A string-keyed event bus whose listeners inherit the request context
/// that was active when they were registered.
#[derive(Clone, Default)]
pub struct Emitter {
    inner: Arc<EmitterInner>,
}

impl Emitter {
    /// Fresh emitter with no listeners.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener for `event`. Returns its id.
    ///
    /// If a per-request store is active, the current frames are captured
    /// and every instance participating in them tracks the listener for
    /// cleanup at shutdown.
    pub fn on(&self, event: impl Into<String>, handler: ListenerFn) -> Uuid {
        let event = event.into();
        let id = Uuid::new_v4();
        let frames = context::capture();

        if let Some(ref frames) = frames {
            for instance_id in frames.keys() {
                if let Some(instance) = crate::registry::lookup(*instance_id) {
                    instance.track_listener(Arc::downgrade(&self.inner), id);
                }
            }
        }

        self.inner.listeners.write().push(Listener {
            id,
            event,
            frames,
            handler,
        });
        id
    }

    /// Remove a listener by id. Returns whether it existed.
    pub fn off(&self, id: Uuid) -> bool {
        self.inner.remove_listener(id)
    }

    /// Number of listeners currently attached for `event`.
    pub fn listener_count(&self, event: &str) -> usize {
        self.inner
            .listeners
            .read()
            .iter()
            .filter(|l| l.event == event)
            .count()
    }

    /// Fire `event`, invoking every matching listener in registration
    /// order. Listeners registered under an active store run inside that
    /// store, whatever task `emit` happens to run on.
    pub async fn emit(&self, event: &str, args: Vec<Value>) {
        let matching: Vec<(Option<ContextFrames>, ListenerFn)> = self
            .inner
            .listeners
            .read()
            .iter()
            .filter(|l| l.event == event)
            .map(|l| (l.frames.clone(), l.handler.clone()))
            .collect();

        for (frames, handler) in matching {
            match frames {
                Some(frames) => context::restore(frames, handler(args.clone())).await,
                None => handler(args.clone()).await,
            }
        }
    }

}

impl fmt::Debug for Emitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Emitter")
            .field("listeners", &self.inner.listeners.read().len())
            .finish()
    }
}
