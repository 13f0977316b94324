//! Inbound side of the Covenant client.
//!
//! # Key types
//!
//! - [`InboundRouter`]: maps a `Will` to the async handler that consumes it
//! - [`DedupCache`]: bounded memory of recently seen message ids
//! - [`guard`]: runs user code so that errors and panics come back as a
//!   [`Fault`] instead of unwinding into the caller

mod dedup;
mod fault;
mod router;

pub use dedup::{DEFAULT_DEDUP_CAPACITY, DedupCache};
pub use fault::{Fault, HandlerError, HandlerResult, guard};
pub use router::{InboundRouter, RouteOutcome};
