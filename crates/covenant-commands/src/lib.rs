//! Outbound side of the Covenant client: chat commands.
//!
//! A command is declared once, up front, as a [`CommandSpec`] bound to an
//! async callback, and collected into an immutable [`CommandRegistry`].
//! The [`CommandDispatcher`] turns a chat line into at most one callback
//! run, refusing with a notice when a policy check fails.
//!
//! # Key types
//!
//! - [`CommandSpec`]: trigger, aliases, owner-only flag, argument bounds,
//!   cooldown, usage hint
//! - [`CommandRegistry`]: the command table, built via
//!   [`CommandRegistry::builder`]
//! - [`CommandDispatcher`]: parsing, policy checks, invocation
//! - [`CooldownStore`]: per-user, per-command rate limiting
//! - [`ChatSink`]: where replies, sends and reactions go
//! - [`CommandContext`]: what a callback gets to work with

mod command;
mod context;
mod cooldown;
mod dispatcher;
mod error;
mod registry;

pub use command::CommandSpec;
pub use context::{ChatSink, CommandContext, IncomingMessage};
pub use cooldown::CooldownStore;
pub use covenant_router::{HandlerError, HandlerResult};
pub use dispatcher::{CommandDispatcher, DispatchOutcome, DispatcherConfig, Refusal};
pub use error::{CommandError, SinkError};
pub use registry::{CommandRegistry, CommandRegistryBuilder, RegisteredCommand};
