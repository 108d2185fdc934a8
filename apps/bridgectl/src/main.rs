use std::{path::PathBuf, sync::Arc};

use anyhow::{Context, Result};
use bridge_core::{
    load_settings, Bridge, BridgeSettings, CommandName, ErrorDisplay, LogNotifier,
    ProcessTransport,
};
use clap::{Parser, Subcommand};
use serde_json::Value;
use shared::protocol::EventKind;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "bridgectl", about = "Drive a mod-manager backend from the terminal")]
struct Cli {
    /// TOML settings file; `BRIDGE__*` environment variables override it.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Backend executable, overriding `backend_program`.
    #[arg(long)]
    backend: Option<String>,
    /// Argument passed to the backend; repeat for several.
    #[arg(long = "backend-arg", allow_hyphen_values = true)]
    backend_args: Vec<String>,
    /// Print backend log records alongside our own.
    #[arg(long)]
    forward_logs: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List every command the bridge knows.
    Commands,
    /// Run one command and print its JSON response.
    Invoke {
        name: String,
        #[arg(long)]
        payload: Option<String>,
    },
    /// Print events as they arrive until Ctrl-C; all events if none named.
    Watch { events: Vec<String> },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();
    let settings = load_settings(cli.config.as_deref()).context("failed to load settings")?;

    match cli.command {
        Command::Commands => {
            for name in CommandName::ALL {
                let quiet = name.is_quiet() || settings.is_quiet(name.as_str());
                println!("{name}{}", if quiet { " (quiet)" } else { "" });
            }
        }
        Command::Invoke {
            ref name,
            ref payload,
        } => {
            let name: CommandName = name.parse()?;
            let payload = match payload {
                Some(raw) => serde_json::from_str(raw).context("--payload is not valid JSON")?,
                None => Value::Null,
            };
            let bridge = connect(&cli, settings)?;
            let _logs = forward_logs(&cli, &bridge).await?;
            let response = bridge
                .invoker()
                .invoke_raw(name, payload, ErrorDisplay::Silent)
                .await
                .with_context(|| format!("{name} failed"))?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Command::Watch { ref events } => {
            let kinds = if events.is_empty() {
                EventKind::ALL.to_vec()
            } else {
                events
                    .iter()
                    .map(|raw| raw.parse::<EventKind>())
                    .collect::<Result<Vec<_>, _>>()?
            };
            let bridge = connect(&cli, settings)?;
            let _logs = forward_logs(&cli, &bridge).await?;

            let mut subscriptions = Vec::with_capacity(kinds.len());
            for kind in kinds {
                let subscription = bridge
                    .listen(kind, |event| match serde_json::to_string(event) {
                        Ok(line) => println!("{line}"),
                        Err(err) => eprintln!("unprintable event: {err}"),
                    })
                    .await
                    .with_context(|| format!("failed to subscribe to {kind}"))?;
                subscriptions.push(subscription);
            }
            info!(count = subscriptions.len(), "watching events; Ctrl-C to stop");

            tokio::signal::ctrl_c()
                .await
                .context("failed to wait for Ctrl-C")?;
            bridge.shutdown();
        }
    }

    Ok(())
}

fn connect(cli: &Cli, settings: BridgeSettings) -> Result<Bridge> {
    let program = cli
        .backend
        .clone()
        .or_else(|| settings.backend_program.clone())
        .context("no backend configured; pass --backend or set backend_program")?;
    let args = if cli.backend_args.is_empty() {
        settings.backend_args.clone()
    } else {
        cli.backend_args.clone()
    };
    let transport = ProcessTransport::spawn(&program, &args, settings.request_timeout())
        .with_context(|| format!("failed to start backend {program}"))?;
    Ok(Bridge::new(
        Arc::new(transport),
        settings,
        Arc::new(LogNotifier),
    ))
}

async fn forward_logs(cli: &Cli, bridge: &Bridge) -> Result<Option<bridge_core::LogForwarder>> {
    if !cli.forward_logs {
        return Ok(None);
    }
    let forwarder = bridge
        .forward_logs()
        .await
        .context("failed to subscribe to backend logs")?;
    Ok(Some(forwarder))
}
