//! Containment for user-supplied handlers.

use std::any::Any;
use std::error::Error;
use std::fmt;
use std::future::Future;
use std::panic::{AssertUnwindSafe, catch_unwind};

use futures_util::FutureExt;

/// Error type user handlers return.
pub type HandlerError = Box<dyn Error + Send + Sync>;

/// Result type user handlers return.
pub type HandlerResult = Result<(), HandlerError>;

/// How a guarded handler went wrong.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// The handler returned an error. Holds the rendered source chain.
    Failed(String),

    /// The handler panicked. Holds the panic message, if it had one.
    Panicked(String),
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed(chain) => write!(f, "handler failed: {chain}"),
            Self::Panicked(msg) => write!(f, "handler panicked: {msg}"),
        }
    }
}

/// Calls `call` and awaits the future it returns, catching errors and
/// panics from either step.
///
/// ```
/// # futures_util::FutureExt::now_or_never(async {
/// use covenant_router::{Fault, HandlerError, guard};
///
/// let fault = guard(|| async { Err::<(), HandlerError>("no such channel".into()) }).await;
/// assert_eq!(fault, Err(Fault::Failed("no such channel".into())));
/// # });
/// ```
pub async fn guard<F, Fut>(call: F) -> Result<(), Fault>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = HandlerResult>,
{
    let fut = catch_unwind(AssertUnwindSafe(call))
        .map_err(|payload| Fault::Panicked(panic_message(payload.as_ref())))?;

    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(Fault::Failed(error_chain(e.as_ref()))),
        Err(payload) => Err(Fault::Panicked(panic_message(payload.as_ref()))),
    }
}

/// Renders an error followed by each of its sources, `": "`-separated.
fn error_chain(err: &(dyn Error + 'static)) -> String {
    let mut out = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        out.push_str(": ");
        out.push_str(&cause.to_string());
        source = cause.source();
    }
    out
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
