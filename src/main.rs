//! Binary entrypoint for the Meshgram CLI.
//!
//! Commands:
//! - `start [--device <path|host:port>]` - run the bridge
//! - `init` - write a starter `config.toml`
//! - `check` - validate the configuration and print a redacted summary
//! - `probe [--device <path|host:port>] [--timeout <s>]` - ask the radio who it is
//!
//! See the library crate docs for module-level details: `meshgram::`.
use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use log::{error, info, warn};
use std::sync::Arc;
use std::time::Duration;

use meshgram::bridge::{BridgeServer, Command};
use meshgram::config::Config;
use meshgram::logutil::redact_secrets;
use meshgram::meshtastic::{MeshtasticRadio, RadioInterface};
use meshgram::telegram::TelegramClient;

/// Capacity of the chat event queue between the poller and the bridge.
const CHAT_QUEUE: usize = 256;

#[derive(Parser)]
#[command(name = "meshgram")]
#[command(about = "A bridge between Meshtastic mesh networks and Telegram")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (can be used before or after subcommand)
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: String,

    /// Verbose logging (-v, -vv for more; may appear before or after subcommand)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the bridge
    Start {
        /// Serial device path or host:port, overriding meshtastic.device
        #[arg(short, long)]
        device: Option<String>,
    },
    /// Write a default configuration file
    Init,
    /// Validate the configuration and print a summary
    Check,
    /// Connect to the radio and print its node info as JSON
    Probe {
        /// Serial device path or host:port, overriding meshtastic.device
        #[arg(short, long)]
        device: Option<String>,
        /// Seconds to wait before giving up
        #[arg(short, long, default_value_t = 15)]
        timeout: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start { device } => {
            let mut config = Config::load(&cli.config).await?;
            init_logging(&Some(config.clone()), cli.verbose);
            if let Some(device) = device {
                config.meshtastic.device = device;
            }
            config.validate()?;
            info!("Starting Meshgram v{}", env!("CARGO_PKG_VERSION"));

            let (radio, radio_rx) = MeshtasticRadio::connect(&config.meshtastic).await?;
            info!(
                "Connected to Meshtastic device on {}",
                config.meshtastic.device
            );

            let chat = Arc::new(TelegramClient::new(&config.telegram)?);
            let me = chat.get_me().await?;
            info!("Telegram bot @{} ready", me.display_name());
            let menu: Vec<(&str, &str)> = Command::ALL
                .iter()
                .map(|c| (c.name(), c.description()))
                .collect();
            if let Err(e) = chat.set_my_commands(&menu).await {
                warn!("Could not publish command menu: {}", e);
            }

            let (chat_tx, chat_rx) = tokio::sync::mpsc::channel(CHAT_QUEUE);
            let poller = tokio::spawn(chat.clone().poll_updates(chat_tx));

            let mut server = BridgeServer::new(&config, Arc::new(radio), radio_rx, chat, chat_rx)?;
            server.add_task(poller);
            info!("Bridge starting...");
            server.run().await?;
        }
        Commands::Init => {
            init_logging(&None, cli.verbose);
            if tokio::fs::try_exists(&cli.config).await.unwrap_or(false) {
                return Err(anyhow!(
                    "{} already exists; remove it first to write a fresh one",
                    cli.config
                ));
            }
            Config::create_default(&cli.config).await?;
            info!("Configuration file created at {}", cli.config);
        }
        Commands::Check => {
            let config = Config::load(&cli.config).await?;
            init_logging(&Some(config.clone()), cli.verbose);
            config.validate()?;
            println!("{}", summarize(&config));
            println!("Configuration OK");
        }
        Commands::Probe { device, timeout } => {
            let mut config = Config::load(&cli.config).await?;
            init_logging(&Some(config.clone()), cli.verbose);
            if let Some(device) = device {
                config.meshtastic.device = device;
            }
            let (radio, _radio_rx) = MeshtasticRadio::connect(&config.meshtastic).await?;
            let deadline = tokio::time::Instant::now() + Duration::from_secs(timeout);
            let info = loop {
                match radio.my_node_info().await {
                    Ok(info) => break Some(info),
                    Err(_) if tokio::time::Instant::now() < deadline => {
                        tokio::time::sleep(Duration::from_millis(250)).await;
                    }
                    Err(e) => {
                        error!("No node info after {}s: {}", timeout, e);
                        break None;
                    }
                }
            };
            let _ = radio.close().await;
            match info {
                Some(info) => println!("{}", serde_json::to_string_pretty(&info)?),
                None => std::process::exit(1),
            }
        }
    }

    Ok(())
}

/// Human-readable configuration summary with the bot token redacted.
fn summarize(config: &Config) -> String {
    let t = &config.telegram;
    let m = &config.meshtastic;
    let b = &config.bridge;
    let lines = [
        format!("telegram.bot_token = {}", redact_secrets(&t.bot_token)),
        format!("telegram.chat_id = {}", t.chat_id),
        format!("telegram.authorized_users = {:?}", t.authorized_users),
        format!(
            "telegram.rate_limit = {} calls / {}s",
            t.rate_limit_calls(),
            t.rate_limit_period().as_secs()
        ),
        format!("meshtastic.connection_type = {:?}", m.connection_type),
        format!("meshtastic.device = {}", m.device),
        format!(
            "meshtastic.default_node_id = {}",
            m.default_node_id.as_deref().unwrap_or("(broadcast)")
        ),
        format!("meshtastic.local_nodes = {:?}", m.local_nodes),
        format!(
            "bridge.retry = {} attempts every {}s",
            b.max_attempts(),
            b.retry_interval().as_secs()
        ),
        format!("bridge.ack_timeout = {}s", b.ack_timeout().as_secs()),
        format!(
            "bridge.inactivity_timeout = {}s",
            b.inactivity_timeout().as_secs()
        ),
    ];
    lines.join("\n")
}

fn init_logging(config: &Option<Config>, verbosity: u8) {
    use std::io::Write;
    let mut builder = env_logger::Builder::new();
    // CLI verbosity overrides the configured level
    let configured = config
        .as_ref()
        .and_then(|c| c.logging.level.parse::<log::LevelFilter>().ok())
        .unwrap_or(log::LevelFilter::Info);
    let base_level = match verbosity {
        0 => configured,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };
    builder.filter_level(base_level);

    let file = config
        .as_ref()
        .and_then(|c| c.logging.file.as_ref())
        .and_then(|path| {
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .ok()
        });
    let security_path = config.as_ref().and_then(|c| c.logging.security_file.clone());

    match file {
        Some(f) => {
            let write_mutex = Arc::new(std::sync::Mutex::new(f));
            // foreground: mirror to console as well
            let is_tty = atty::is(atty::Stream::Stdout);
            builder.format(move |fmt, record| {
                let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
                let line = redact_secrets(&format!("{} [{}] {}", ts, record.level(), record.args()));

                if let Ok(mut guard) = write_mutex.lock() {
                    let _ = writeln!(guard, "{}", line);
                }
                if record.target() == "security" {
                    if let Some(ref sec_path) = security_path {
                        if let Ok(mut sf) = std::fs::OpenOptions::new()
                            .create(true)
                            .append(true)
                            .open(sec_path)
                        {
                            let _ = writeln!(sf, "{}", line);
                        }
                    }
                }
                if is_tty {
                    writeln!(fmt, "{}", line)
                } else {
                    Ok(())
                }
            });
        }
        None => {
            builder.format(|fmt, record| {
                let ts = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%SZ");
                let line = format!("{} [{}] {}", ts, record.level(), record.args());
                writeln!(fmt, "{}", redact_secrets(&line))
            });
        }
    }
    let _ = builder.try_init();
}
