//! Declarative description of a chat command.

use std::time::Duration;

use crate::CommandError;

/// Everything the dispatcher needs to know about a command before it
/// runs the callback.
///
/// Built with chained setters:
///
/// ```
/// use std::time::Duration;
/// use covenant_commands::CommandSpec;
///
/// let spec = CommandSpec::new("echo")
///     .alias("say")
///     .description("Repeats what you said")
///     .min_args(1)
///     .cooldown(Duration::from_secs(3));
///
/// assert_eq!(spec.usage_line("!"), "Usage: !echo <arg1>");
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Canonical trigger, matched case-insensitively.
    pub trigger: String,

    /// Alternative triggers sharing this command.
    pub aliases: Vec<String>,

    /// One-line description shown in the help listing.
    pub description: String,

    /// Only the configured owner may run it.
    pub owner_only: bool,

    pub min_args: usize,

    /// `None` means unbounded.
    pub max_args: Option<usize>,

    /// Per-user minimum interval between invocations. Zero disables it.
    pub cooldown: Duration,

    /// Custom usage hint, shown as `Usage: {usage}` instead of the
    /// generated one.
    pub usage: Option<String>,
}

impl CommandSpec {
    /// Starts a command with the given trigger and no restrictions.
    pub fn new(trigger: impl Into<String>) -> Self {
        Self {
            trigger: trigger.into(),
            aliases: Vec::new(),
            description: String::new(),
            owner_only: false,
            min_args: 0,
            max_args: None,
            cooldown: Duration::ZERO,
            usage: None,
        }
    }

    /// Adds an alternative trigger.
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }

    /// Adds several alternative triggers.
    pub fn aliases<I, S>(mut self, aliases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.aliases.extend(aliases.into_iter().map(Into::into));
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Restricts the command to the configured owner.
    pub fn owner_only(mut self) -> Self {
        self.owner_only = true;
        self
    }

    pub fn min_args(mut self, min: usize) -> Self {
        self.min_args = min;
        self
    }

    pub fn max_args(mut self, max: usize) -> Self {
        self.max_args = Some(max);
        self
    }

    pub fn cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn usage(mut self, usage: impl Into<String>) -> Self {
        self.usage = Some(usage.into());
        self
    }

    /// The usage notice, e.g. `Usage: !echo <arg1> <arg2>`.
    pub fn usage_line(&self, prefix: &str) -> String {
        if let Some(usage) = &self.usage {
            return format!("Usage: {usage}");
        }
        let mut line = format!("Usage: {prefix}{}", self.trigger);
        for n in 1..=self.min_args {
            line.push_str(&format!(" <arg{n}>"));
        }
        line
    }

    /// Lower-cased trigger followed by lower-cased aliases.
    pub(crate) fn keys(&self) -> impl Iterator<Item = String> + '_ {
        std::iter::once(&self.trigger)
            .chain(self.aliases.iter())
            .map(|key| key.to_lowercase())
    }

    pub(crate) fn validate(&self) -> Result<(), CommandError> {
        if self.trigger.trim().is_empty() {
            return Err(CommandError::EmptyTrigger);
        }
        for key in std::iter::once(&self.trigger).chain(self.aliases.iter()) {
            if key.is_empty() || key.chars().any(char::is_whitespace) {
                return Err(CommandError::InvalidTrigger(key.clone()));
            }
        }
        if let Some(max) = self.max_args {
            if self.min_args > max {
                return Err(CommandError::InvalidArgBounds {
                    trigger: self.trigger.clone(),
                    min: self.min_args,
                    max,
                });
            }
        }
        Ok(())
    }
}
