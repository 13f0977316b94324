//! Will → handler routing for inbound envelopes.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::{Arc, PoisonError, RwLock};

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use serde_json::Value;

use crate::fault::{HandlerResult, guard};

type Handler = Arc<dyn Fn(Option<Value>) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

/// What [`InboundRouter::dispatch`] did with an envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    /// A handler ran and returned `Ok`.
    Handled,

    /// No handler, but the will is allow-listed as outbound-only.
    Ignored,

    /// No handler and not allow-listed.
    Unhandled,

    /// The handler returned an error or panicked.
    Failed,
}

/// Maps command ids (`Will`s) to async handlers.
///
/// Lookups are case-insensitive. Registering a will that already has a
/// handler replaces it. Handlers may be registered and unregistered while
/// dispatches are running; a dispatch uses whichever handler was
/// registered when it started.
///
/// ```
/// use covenant_router::{HandlerResult, InboundRouter, RouteOutcome};
///
/// # futures_util::FutureExt::now_or_never(async {
/// let router = InboundRouter::new();
/// router.register("PING", |_obj| async { HandlerResult::Ok(()) });
///
/// assert_eq!(router.dispatch("ping", None).await, RouteOutcome::Handled);
/// assert_eq!(router.dispatch("PONG", None).await, RouteOutcome::Unhandled);
/// # });
/// ```
#[derive(Default)]
pub struct InboundRouter {
    handlers: RwLock<HashMap<String, Handler>>,
    outbound_only: RwLock<HashSet<String>>,
}

impl InboundRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for `will`. Returns `true` if it replaced an
    /// existing handler.
    pub fn register<F, Fut>(&self, will: &str, handler: F) -> bool
    where
        F: Fn(Option<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let key = will.to_lowercase();
        let handler: Handler = Arc::new(move |obj| handler(obj).boxed());
        let replaced = self
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key, handler)
            .is_some();
        if replaced {
            tracing::debug!(will, "inbound handler replaced");
        } else {
            tracing::debug!(will, "inbound handler registered");
        }
        replaced
    }

    /// Removes the handler for `will`. Returns `false` if there was none.
    pub fn unregister(&self, will: &str) -> bool {
        self.handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&will.to_lowercase())
            .is_some()
    }

    /// Marks `will` as outbound-only, so receiving it without a handler
    /// is not logged as unhandled.
    pub fn allow_unhandled(&self, will: &str) {
        self.outbound_only
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(will.to_lowercase());
    }

    /// Returns `true` if a handler is registered for `will`.
    pub fn is_registered(&self, will: &str) -> bool {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&will.to_lowercase())
    }

    /// Number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Runs the handler registered for `will` with `obj`.
    ///
    /// Never fails: handler errors and panics are logged with the will and
    /// reported as [`RouteOutcome::Failed`].
    pub async fn dispatch(&self, will: &str, obj: Option<Value>) -> RouteOutcome {
        let key = will.to_lowercase();
        let handler = self
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .cloned();

        let Some(handler) = handler else {
            let outbound_only = self
                .outbound_only
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .contains(&key);
            if outbound_only {
                tracing::trace!(will, "ignoring outbound-only will");
                return RouteOutcome::Ignored;
            }
            tracing::warn!(will, "unhandled inbound command");
            return RouteOutcome::Unhandled;
        };

        match guard(|| handler(obj)).await {
            Ok(()) => {
                tracing::trace!(will, "inbound command handled");
                RouteOutcome::Handled
            }
            Err(fault) => {
                tracing::error!(will, %fault, "inbound handler failed");
                RouteOutcome::Failed
            }
        }
    }
}

impl std::fmt::Debug for InboundRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InboundRouter")
            .field("handlers", &self.len())
            .finish()
    }
}
