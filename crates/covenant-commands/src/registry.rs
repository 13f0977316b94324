//! The immutable command table.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use covenant_router::HandlerResult;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;

use crate::{CommandContext, CommandError, CommandSpec};

type Callback = Arc<dyn Fn(CommandContext) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

/// A command declaration bound to its callback.
pub struct RegisteredCommand {
    spec: CommandSpec,
    callback: Callback,
}

impl RegisteredCommand {
    pub fn spec(&self) -> &CommandSpec {
        &self.spec
    }

    pub(crate) fn call(&self, ctx: CommandContext) -> BoxFuture<'static, HandlerResult> {
        (self.callback)(ctx)
    }
}

impl std::fmt::Debug for RegisteredCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegisteredCommand")
            .field("spec", &self.spec)
            .finish_non_exhaustive()
    }
}

/// All commands the dispatcher knows, keyed by lower-cased trigger and
/// alias.
///
/// Built once through [`CommandRegistry::builder`] and never changed
/// afterwards. When two commands claim the same key the later one wins.
///
/// ```
/// use covenant_commands::{CommandRegistry, CommandSpec, HandlerResult};
///
/// let registry = CommandRegistry::builder()
///     .command(CommandSpec::new("ping").alias("p"), |ctx| async move {
///         ctx.reply("pong").await?;
///         HandlerResult::Ok(())
///     })
///     .build()
///     .unwrap();
///
/// assert!(registry.resolve("P").is_some());
/// ```
#[derive(Debug, Default)]
pub struct CommandRegistry {
    by_key: HashMap<String, Arc<RegisteredCommand>>,
    ordered: Vec<Arc<RegisteredCommand>>,
}

impl CommandRegistry {
    pub fn builder() -> CommandRegistryBuilder {
        CommandRegistryBuilder::default()
    }

    /// Looks up a trigger or alias, case-insensitively.
    pub fn resolve(&self, trigger: &str) -> Option<&Arc<RegisteredCommand>> {
        self.by_key.get(&trigger.to_lowercase())
    }

    /// Commands still reachable through their canonical trigger, in
    /// registration order.
    pub fn commands(&self) -> impl Iterator<Item = &CommandSpec> {
        self.ordered.iter().map(|cmd| &cmd.spec)
    }

    /// Number of distinct reachable commands.
    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }

    /// One line per command: `!trigger (aliases) - description`.
    pub fn help_text(&self, prefix: &str) -> String {
        let mut lines = Vec::with_capacity(self.ordered.len() + 1);
        lines.push("Available commands:".to_string());
        for spec in self.commands() {
            let mut line = format!("{prefix}{}", spec.trigger);
            if !spec.aliases.is_empty() {
                let aliases: Vec<String> = spec
                    .aliases
                    .iter()
                    .map(|alias| format!("{prefix}{alias}"))
                    .collect();
                line.push_str(&format!(" ({})", aliases.join(", ")));
            }
            if !spec.description.is_empty() {
                line.push_str(" - ");
                line.push_str(&spec.description);
            }
            lines.push(line);
        }
        lines.join("\n")
    }
}

/// Collects command declarations; see [`CommandRegistry::builder`].
#[derive(Default)]
pub struct CommandRegistryBuilder {
    entries: Vec<RegisteredCommand>,
}

impl CommandRegistryBuilder {
    /// Adds a command. Validation happens in [`build`](Self::build).
    pub fn command<F, Fut>(mut self, spec: CommandSpec, callback: F) -> Self
    where
        F: Fn(CommandContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        let callback: Callback = Arc::new(move |ctx| callback(ctx).boxed());
        self.entries.push(RegisteredCommand { spec, callback });
        self
    }

    /// Validates every declaration and freezes the table.
    ///
    /// # Errors
    /// The first invalid declaration, in registration order.
    pub fn build(self) -> Result<CommandRegistry, CommandError> {
        let mut by_key: HashMap<String, Arc<RegisteredCommand>> = HashMap::new();
        let mut all = Vec::with_capacity(self.entries.len());

        for entry in self.entries {
            entry.spec.validate()?;
            let entry = Arc::new(entry);
            for key in entry.spec.keys() {
                if let Some(previous) = by_key.insert(key.clone(), Arc::clone(&entry)) {
                    tracing::debug!(
                        key,
                        previous = %previous.spec.trigger,
                        current = %entry.spec.trigger,
                        "command key overwritten"
                    );
                }
            }
            all.push(entry);
        }

        let ordered: Vec<_> = all
            .into_iter()
            .filter(|cmd| {
                by_key
                    .get(&cmd.spec.trigger.to_lowercase())
                    .is_some_and(|owner| Arc::ptr_eq(owner, cmd))
            })
            .collect();

        tracing::debug!(commands = ordered.len(), keys = by_key.len(), "command registry built");
        Ok(CommandRegistry { by_key, ordered })
    }
}
