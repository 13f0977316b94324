//! A small agent: repeats what it's told, answers pings, and lets its
//! owner shut it down from chat.
//!
//! ```text
//! cargo run -p echo-bot -- bot.json
//! COVENANT_ADDRESS=chat.example.net:7000 COVENANT_CREDENTIAL=... cargo run -p echo-bot
//! ```

use std::sync::Arc;
use std::time::Duration;

use covenant::prelude::*;
use tokio::sync::Notify;

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

fn commands(quit: Arc<Notify>) -> Result<CommandRegistry, CovenantError> {
    let registry = CommandRegistry::builder()
        .command(
            CommandSpec::new("echo")
                .alias("say")
                .description("Repeats you")
                .min_args(1)
                .usage("!echo <text>"),
            |ctx| async move {
                ctx.reply(&ctx.rest()).await?;
                HandlerResult::Ok(())
            },
        )
        .command(
            CommandSpec::new("ping")
                .description("Checks the bot is alive")
                .max_args(0)
                .cooldown(Duration::from_secs(5)),
            |ctx| async move {
                ctx.react("🏓").await?;
                ctx.reply("pong").await?;
                HandlerResult::Ok(())
            },
        )
        .command(
            CommandSpec::new("quit")
                .description("Disconnects the bot")
                .owner_only()
                .max_args(0),
            move |ctx| {
                let quit = Arc::clone(&quit);
                async move {
                    ctx.reply("bye").await?;
                    quit.notify_one();
                    HandlerResult::Ok(())
                }
            },
        )
        .build()?;
    Ok(registry)
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// A JSON file named on the command line, then environment overrides.
async fn load_config() -> Result<ClientConfig, Box<dyn std::error::Error>> {
    let mut config = match std::env::args().nth(1) {
        Some(path) => ClientConfig::from_json(&tokio::fs::read_to_string(&path).await?)?,
        None => ClientConfig::default(),
    };
    if let Ok(address) = std::env::var("COVENANT_ADDRESS") {
        config.address = address;
    }
    if let Ok(credential) = std::env::var("COVENANT_CREDENTIAL") {
        config.credential = credential;
    }
    if let Ok(owner) = std::env::var("COVENANT_OWNER") {
        config.dispatcher.owner = Some(owner);
    }
    Ok(config.validated())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    covenant::logging::init();

    let config = load_config().await?;
    tracing::info!(address = %config.address, transport = ?config.transport, "starting echo-bot");

    let quit = Arc::new(Notify::new());
    let client = Arc::new(CovenantClient::from_config(&config, commands(Arc::clone(&quit))?));

    let stopper = Arc::clone(&client);
    tokio::spawn(async move {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => tracing::info!("interrupted"),
            _ = quit.notified() => tracing::info!("owner asked to quit"),
        }
        stopper.shutdown();
    });

    client.run().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commands_register_with_aliases() {
        let registry = commands(Arc::new(Notify::new())).unwrap();
        assert_eq!(registry.len(), 3);
        assert_eq!(registry.resolve("SAY").unwrap().spec().trigger, "echo");
        assert!(registry.resolve("quit").unwrap().spec().owner_only);
        assert!(registry.help_text("!").contains("!ping - Checks the bot is alive"));
    }
}
