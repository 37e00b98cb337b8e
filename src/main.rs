mod bluez;
mod config;
mod connection;
mod registry;
mod switcher;

use a2dp_switcher_core::{
    Collaborators, ConnectionWorkflow, DeviceAddress, NdefMessage, TagPayload, TagVersion,
    WorkflowEvent,
};
use anyhow::{bail, Context, Result};
use bluez::{BluerBackend, BluezHost, Monitor};
use clap::{ArgGroup, Parser, Subcommand};
use config::Config;
use connection::{RunOutcome, RunnerConfig, WorkflowRunner};
use registry::DeviceStore;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use switcher::{Status, Switcher, ToggleAction};
use tokio::sync::mpsc;

use tracing::{debug, error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Switch the active Bluetooth audio sink
#[derive(Parser)]
#[command(name = "a2dp-switcher", version, about)]
struct Cli {
    /// Config file to use instead of the default location
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory for the device registry
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Bring a device up to a connected audio profile
    #[command(group(ArgGroup::new("target").required(true).args(["uri", "address", "ndef"])))]
    Connect {
        /// Tag URI, e.g. a2dp://connect?version=1&address=AA:BB:CC:DD:EE:FF
        uri: Option<String>,
        /// Device address
        #[arg(long)]
        address: Option<String>,
        /// Display name to store for the device
        #[arg(long, requires = "address")]
        name: Option<String>,
        /// NDEF message file read from a tag
        #[arg(long)]
        ndef: Option<PathBuf>,
    },
    /// List audio sinks
    List {
        /// Include hidden devices
        #[arg(long)]
        all: bool,
    },
    /// Connect a disconnected sink, otherwise disconnect it
    Toggle { address: String },
    /// Disconnect every connected sink
    DisconnectAll,
    /// Show the connected device
    Status,
    /// Set a custom display name; an empty name restores the device's own
    Rename { address: String, name: String },
    /// Hide a device from the list
    Hide { address: String },
    /// Show a hidden device again
    Show { address: String },
    /// Encode and decode tag payloads
    Tag {
        #[command(subcommand)]
        command: TagCommand,
    },
}

#[derive(Subcommand)]
enum TagCommand {
    /// Print the tag URI for a device
    Encode {
        address: String,
        /// Display name instead of the stored one
        #[arg(long)]
        name: Option<String>,
    },
    /// Write an NDEF message for a device to a file
    Write {
        address: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        out: PathBuf,
    },
    /// Decode an NDEF message file
    Read { file: PathBuf },
}

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(tracing::Level::INFO.into()))
        .init();

    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = match (&cli.config, cli.data_dir) {
        (Some(path), data_dir) => {
            Config::load_from(path, data_dir.unwrap_or_else(Config::default_data_dir))?
        }
        (None, Some(data_dir)) => Config::load_from(&Config::default_path(), data_dir)?,
        (None, None) => Config::load()?,
    };
    debug!("Config: {:?}", config);

    match cli.command {
        Command::Connect {
            uri,
            address,
            name,
            ndef,
        } => {
            let payload = match (uri, address, ndef) {
                (Some(uri), _, _) => TagPayload::parse(&uri)?,
                (_, Some(address), _) => TagPayload {
                    address: DeviceAddress::parse(&address)?,
                    name,
                    version: TagVersion::Query,
                },
                (_, _, Some(path)) => {
                    let data = std::fs::read(&path)
                        .with_context(|| format!("Failed to read {}", path.display()))?;
                    TagPayload::from_ndef(&data)?
                }
                _ => bail!("Nothing to connect: give a tag URI, --address or --ndef"),
            };
            connect(&config, &payload).await
        }
        Command::List { all } => {
            let switcher = open_switcher(&config).await?;
            for entry in switcher.list(all) {
                let mut line = format!(
                    "{}  {:<13}  {}",
                    entry.address.to_canonical(),
                    entry.state,
                    entry.display_name
                );
                if let Some(real) = entry.real_name.as_deref() {
                    if real != entry.display_name {
                        line.push_str(&format!(" ({})", real));
                    }
                }
                if !entry.visible {
                    line.push_str(" [hidden]");
                }
                println!("{}", line);
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Toggle { address } => {
            let address = DeviceAddress::parse(&address)?;
            let switcher = open_switcher(&config).await?;
            match switcher.toggle(&address).await? {
                ToggleAction::Connected => println!("Connected {}", address),
                ToggleAction::Disconnected => println!("Disconnected {}", address),
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::DisconnectAll => {
            let switcher = open_switcher(&config).await?;
            let count = switcher.disconnect_all().await?;
            println!("Disconnected {} device(s)", count);
            Ok(ExitCode::SUCCESS)
        }
        Command::Status => {
            let status = match open_switcher(&config).await {
                Ok(switcher) => switcher.status(),
                Err(e) => {
                    debug!("No adapter: {:#}", e);
                    Status::NoAdapter
                }
            };
            println!("{}", status);
            Ok(ExitCode::SUCCESS)
        }
        Command::Rename { address, name } => {
            let address = DeviceAddress::parse(&address)?;
            let switcher = open_switcher(&config).await?;
            switcher.rename(&address, &name)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Hide { address } => {
            let address = DeviceAddress::parse(&address)?;
            let switcher = open_switcher(&config).await?;
            switcher.hide(&address)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Show { address } => {
            let address = DeviceAddress::parse(&address)?;
            let switcher = open_switcher(&config).await?;
            switcher.show(&address)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Tag { command } => tag(&config, command).await,
    }
}

async fn tag(config: &Config, command: TagCommand) -> Result<ExitCode> {
    match command {
        TagCommand::Encode { address, name } => {
            let payload = tag_payload(config, &address, name).await?;
            println!("{}", payload.to_uri());
        }
        TagCommand::Write { address, name, out } => {
            let payload = tag_payload(config, &address, name).await?;
            let message = NdefMessage::for_tag(&payload, config.tag.app_package())?;
            let data = message.encode()?;
            std::fs::write(&out, &data)
                .with_context(|| format!("Failed to write {}", out.display()))?;
            info!("Wrote {} bytes to {}", data.len(), out.display());
            println!("{}", payload.to_uri());
        }
        TagCommand::Read { file } => {
            let data = std::fs::read(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let payload = TagPayload::from_ndef(&data)?;
            println!("address: {}", payload.address);
            println!("name:    {}", payload.name.as_deref().unwrap_or("-"));
            println!("version: {}", payload.version.as_u8());
        }
    }
    Ok(ExitCode::SUCCESS)
}

/// Payload for a device, with an optional display name override
async fn tag_payload(config: &Config, address: &str, name: Option<String>) -> Result<TagPayload> {
    let address = DeviceAddress::parse(address)?;
    let switcher = open_switcher(config).await?;
    switcher.tag_for(&address, name.as_deref())
}

async fn open_host(
    config: &Config,
) -> Result<(BluezHost, mpsc::Receiver<WorkflowEvent>, Arc<BluerBackend>)> {
    let registry = Arc::new(DeviceStore::open(&config.data_dir)?);
    debug!(
        "[REGISTRY] {} ({} records)",
        registry.path().display(),
        registry.records().len()
    );
    let backend = Arc::new(BluerBackend::open(config.bluetooth.adapter.as_deref()).await?);
    let (tx, rx) = mpsc::channel(100);
    let host = BluezHost::open(backend.clone(), registry, tx).await?;
    info!("[BT] Using adapter {}", host.adapter_name());
    Ok((host, rx, backend))
}

/// Switcher commands run no workflow, so their events are dropped rather than queued
async fn open_switcher(config: &Config) -> Result<Switcher> {
    let (host, events, _backend) = open_host(config).await?;
    drop(events);
    Ok(Switcher::new(host))
}

async fn connect(config: &Config, payload: &TagPayload) -> Result<ExitCode> {
    let (host, mut events, backend) = open_host(config).await?;
    let _monitor = Monitor::new(backend.adapter().clone(), host.clone()).spawn();

    let collaborators = Collaborators::new(Arc::new(host.clone()), Arc::new(host));
    let mut workflow =
        ConnectionWorkflow::for_tag(payload, collaborators, config.workflow.policy());

    let runner = WorkflowRunner::new(RunnerConfig {
        timeout: config.workflow.connect_timeout(),
        linger: config.workflow.linger,
    });
    let outcome = runner.run(&mut workflow, &mut events).await;

    match &outcome {
        RunOutcome::Finished(state) => println!("{}", state),
        RunOutcome::TimedOut(state) => println!("Timed out: {}", state),
        RunOutcome::ChannelClosed(state) => println!("Interrupted: {}", state),
    }

    Ok(if outcome.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
