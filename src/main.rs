use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use mrc_client::config::DEFAULT_CONFIG_FILE;
use mrc_client::{
    logging, CallbackState, ClientConfig, MrcClient, RemoteInterface, RunMode, ScriptRequest,
    SimulatedServer, StatusKind, StopValueKind,
};

// ============================================================================
// CLI Types
// ============================================================================

/// Command-line client for MetroPro Remote Control servers
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_FILE, global = true)]
    config: PathBuf,

    /// Use the in-process simulated server instead of the native library
    #[arg(long, global = true)]
    simulate: bool,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the effective configuration as TOML
    Config,

    #[command(flatten)]
    Remote(RemoteCommand),
}

/// Commands that talk to a server
#[derive(Subcommand, Debug)]
enum RemoteCommand {
    /// Check that the server is reachable
    Ping,

    /// Print the GUID of the RPC interface
    Guid,

    /// Print the server control state
    State,

    /// Change the server control state
    Control {
        #[command(subcommand)]
        action: ControlAction,
    },

    /// Run a script file or script text
    Run {
        /// Script text to run
        #[arg(long, conflicts_with = "file", required_unless_present = "file")]
        text: Option<String>,

        /// Script file on the server computer
        #[arg(long)]
        file: Option<String>,

        /// Poll for completion every N milliseconds instead of blocking
        #[arg(long, value_name = "MS", conflicts_with = "detach")]
        poll: Option<u64>,

        /// Start the script and return immediately
        #[arg(long)]
        detach: bool,
    },

    /// Wait until the interface is idle
    WaitIdle {
        /// Give up after N milliseconds (0 waits forever)
        #[arg(long, value_name = "MS", default_value_t = 0)]
        timeout: u64,
    },

    /// Run script text and print every status notification it raises
    Watch {
        /// Script text to run
        #[arg(long)]
        text: String,
    },
}

#[derive(Subcommand, Debug)]
enum ControlAction {
    /// Put the server into the active state
    Request,
    /// Return the server to the idle state
    Release,
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = ClientConfig::load_from(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    logging::init(&config.logging);

    let command = match cli.command {
        Commands::Config => {
            let rendered =
                toml::to_string_pretty(&config).context("Failed to render the configuration")?;
            print!("{rendered}");
            return Ok(());
        }
        Commands::Remote(command) => command,
    };

    let client = MrcClient::connect(&config, transport(cli.simulate))
        .context("Failed to connect to the MRC server")?;

    let outcome = execute(&client, command, cli.json).await;
    let closed = client.close().context("Failed to close the client");
    outcome.and(closed)
}

fn transport(simulate: bool) -> Arc<dyn RemoteInterface> {
    #[cfg(feature = "native")]
    if !simulate {
        return Arc::new(mrc_client::NativeInterface::new());
    }
    #[cfg(not(feature = "native"))]
    if !simulate {
        warn!("Built without the `native` feature; using the simulated server");
    }
    info!("Using the simulated MRC server");
    Arc::new(SimulatedServer::new())
}

async fn execute(client: &MrcClient, command: RemoteCommand, json: bool) -> Result<()> {
    match command {
        RemoteCommand::Ping => {
            client.ping().context("Ping failed")?;
            println!("ok");
        }
        RemoteCommand::Guid => println!("{}", client.interface_guid()),
        RemoteCommand::State => {
            let state = client.server_state()?;
            if json {
                println!("{}", serde_json::json!({ "state": state }));
            } else {
                println!("{state}");
            }
        }
        RemoteCommand::Control { action } => match action {
            ControlAction::Request => client.request_control()?,
            ControlAction::Release => client.release_control()?,
        },
        RemoteCommand::Run {
            text,
            file,
            poll,
            detach,
        } => {
            let request = match (file, text) {
                (Some(file), _) => ScriptRequest::FileReference(file),
                (None, Some(text)) => ScriptRequest::InlineText(text),
                (None, None) => bail!("either --text or --file is required"),
            };
            let output = match (poll, detach) {
                (Some(ms), _) => {
                    client
                        .run_script_polled(request, Duration::from_millis(ms.max(1)))
                        .await?
                }
                (None, true) => client.run_script(request, RunMode::Detached)?,
                (None, false) => client.run_script(request, RunMode::Blocking)?,
            };
            if json {
                println!("{}", serde_json::to_string(&output)?);
            } else if output.completed {
                print!("{}", output.text);
                if let Ok(stop) = client.script_stop_value(StopValueKind::Text) {
                    info!(?stop, "Script stop value");
                }
            } else {
                println!("started");
            }
        }
        RemoteCommand::WaitIdle { timeout } => {
            let timeout = (timeout > 0).then(|| Duration::from_millis(timeout));
            client.wait_idle(timeout)?;
            println!("idle");
        }
        RemoteCommand::Watch { text } => watch(client, text, json).await?,
    }
    Ok(())
}

async fn watch(client: &MrcClient, text: String, json: bool) -> Result<()> {
    if client.session().callback_state() == CallbackState::Disabled {
        bail!("status callbacks are disabled in the configuration");
    }
    if !client.session().callback_mask().contains(StatusKind::ScriptEnd) {
        bail!("callbacks.mask must include script_end to watch a script");
    }

    let mut events = client.events();
    client.run_script(ScriptRequest::InlineText(text), RunMode::Detached)?;

    while let Some(event) = events.recv().await {
        if json {
            println!("{}", serde_json::to_string(&event)?);
        } else {
            println!("{} {}", event.received_at.to_rfc3339(), event.kind);
        }
        if event.kind == StatusKind::ScriptEnd {
            break;
        }
    }

    client.wait_idle(None)?;
    print!("{}", client.session().result()?.output);
    Ok(())
}
