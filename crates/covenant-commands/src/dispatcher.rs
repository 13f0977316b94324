//! Turns a chat line into at most one command invocation.
//!
//! ```text
//! text ─► prefix? ─► resolve ─► owner? ─► min args? ─► max args? ─► cooldown? ─► run
//!          │ no        │ none     │ no      │ too few    │ too many    │ waiting
//!          ▼           ▼          ▼         ▼            ▼             ▼
//!       (silent)   "unknown"   refusal   usage       refusal       refusal
//! ```
//!
//! Every refusal is a notice sent through the [`ChatSink`]. Policy
//! violations are the caller's mistake, so they are logged at debug only.

use std::sync::Arc;
use std::time::Duration;

use covenant_router::guard;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::{ChatSink, CommandContext, CommandRegistry, CooldownStore, IncomingMessage};

/// Dispatcher settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// What a line must start with to be treated as a command.
    pub prefix: String,

    /// User id allowed to run owner-only commands. `None` means nobody.
    pub owner: Option<String>,

    /// Trigger named in "unknown command" notices. Answered with a
    /// generated listing unless a command claims it.
    pub help_trigger: String,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            prefix: "!".to_string(),
            owner: None,
            help_trigger: "help".to_string(),
        }
    }
}

/// Why a resolved command was not run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Refusal {
    /// Owner-only command, caller is not the owner.
    Unauthorized,

    /// Fewer arguments than required. Holds the usage line sent.
    Usage(String),

    /// More arguments than accepted.
    TooManyArgs { max: usize },

    /// The caller used this command too recently.
    Cooldown { remaining: Duration },
}

/// What [`CommandDispatcher::dispatch`] did with a line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The line doesn't start with the prefix. Nothing was sent.
    NotACommand,

    /// No command matches the trigger. Holds the trigger as typed.
    Unknown(String),

    /// The built-in help listing was sent.
    Help,

    /// The command was found but not run.
    Refused(Refusal),

    /// The callback ran and returned `Ok`.
    Executed,

    /// The callback returned an error or panicked.
    Failed,
}

/// Validates and runs commands from a [`CommandRegistry`].
pub struct CommandDispatcher {
    registry: Arc<CommandRegistry>,
    config: DispatcherConfig,
    cooldowns: CooldownStore,
    sink: Arc<dyn ChatSink>,
}

impl CommandDispatcher {
    pub fn new(
        registry: Arc<CommandRegistry>,
        config: DispatcherConfig,
        sink: Arc<dyn ChatSink>,
    ) -> Self {
        Self {
            registry,
            config,
            cooldowns: CooldownStore::new(),
            sink,
        }
    }

    pub fn registry(&self) -> &CommandRegistry {
        &self.registry
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    pub fn cooldowns(&self) -> &CooldownStore {
        &self.cooldowns
    }

    /// Whether `user` is the configured owner.
    pub fn is_owner(&self, user: &str) -> bool {
        self.config.owner.as_deref() == Some(user)
    }

    /// Parses `message.text`, applies every policy check in order and
    /// runs the command if they all pass.
    ///
    /// Never fails. Callback errors and panics are logged and answered
    /// with a generic notice; sink failures are logged.
    pub async fn dispatch(&self, message: &IncomingMessage) -> DispatchOutcome {
        let prefix = self.config.prefix.as_str();
        if prefix.is_empty() || !message.text.starts_with(prefix) {
            return DispatchOutcome::NotACommand;
        }

        let mut tokens = message.text.split_whitespace();
        let typed = tokens
            .next()
            .and_then(|first| first.strip_prefix(prefix))
            .unwrap_or_default();
        if typed.is_empty() {
            return DispatchOutcome::NotACommand;
        }
        let args: Vec<String> = tokens.map(str::to_owned).collect();

        let Some(command) = self.registry.resolve(typed).cloned() else {
            if typed.eq_ignore_ascii_case(&self.config.help_trigger) {
                self.notify(message, &self.registry.help_text(prefix)).await;
                return DispatchOutcome::Help;
            }
            tracing::debug!(trigger = typed, author = %message.author, "unknown command");
            let notice = format!(
                "Unknown command {prefix}{typed}. Try {prefix}{} for a list of commands.",
                self.config.help_trigger
            );
            self.notify(message, &notice).await;
            return DispatchOutcome::Unknown(typed.to_owned());
        };

        let spec = command.spec();
        let trigger = spec.trigger.as_str();
        let is_owner = self.is_owner(&message.author);

        if spec.owner_only && !is_owner {
            tracing::debug!(trigger, author = %message.author, "refused: owner only");
            let notice = format!("You are not allowed to use {prefix}{trigger}.");
            self.notify(message, &notice).await;
            return DispatchOutcome::Refused(Refusal::Unauthorized);
        }

        if args.len() < spec.min_args {
            tracing::debug!(trigger, got = args.len(), min = spec.min_args, "refused: too few arguments");
            let usage = spec.usage_line(prefix);
            self.notify(message, &usage).await;
            return DispatchOutcome::Refused(Refusal::Usage(usage));
        }

        if let Some(max) = spec.max_args {
            if args.len() > max {
                tracing::debug!(trigger, got = args.len(), max, "refused: too many arguments");
                let notice = format!(
                    "Too many arguments for {prefix}{trigger} (at most {max}). {}",
                    spec.usage_line(prefix)
                );
                self.notify(message, &notice).await;
                return DispatchOutcome::Refused(Refusal::TooManyArgs { max });
            }
        }

        if let Err(remaining) =
            self.cooldowns
                .check_and_stamp(trigger, &message.author, spec.cooldown, Instant::now())
        {
            tracing::debug!(trigger, author = %message.author, ?remaining, "refused: cooldown");
            let notice = format!(
                "{prefix}{trigger} is on cooldown, try again in {}s.",
                whole_seconds(remaining)
            );
            self.notify(message, &notice).await;
            return DispatchOutcome::Refused(Refusal::Cooldown { remaining });
        }

        let ctx = CommandContext::new(
            trigger.to_owned(),
            args,
            is_owner,
            Arc::new(message.clone()),
            Arc::clone(&self.sink),
        );

        tracing::debug!(trigger, author = %message.author, "running command");
        match guard(|| command.call(ctx)).await {
            Ok(()) => DispatchOutcome::Executed,
            Err(fault) => {
                tracing::error!(trigger, author = %message.author, %fault, "command failed");
                let notice = format!("Something went wrong while running {prefix}{trigger}.");
                self.notify(message, &notice).await;
                DispatchOutcome::Failed
            }
        }
    }

    /// Replies with a notice. Delivery failures are logged and dropped.
    async fn notify(&self, to: &IncomingMessage, text: &str) {
        if let Err(e) = self.sink.reply(to, text).await {
            tracing::warn!(channel = %to.channel, error = %e, "could not deliver notice");
        }
    }
}

impl std::fmt::Debug for CommandDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandDispatcher")
            .field("registry", &self.registry)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Remaining wait rounded up, so "0s" is never shown.
fn whole_seconds(remaining: Duration) -> u64 {
    let secs = remaining.as_secs();
    if remaining.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs.max(1)
    }
}
