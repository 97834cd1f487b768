use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use switchboard_channels::{ChannelRouter, SlackChannel, SlackOptions};
use switchboard_core::types::{InboundEvent, RegisteredGroupsFn};
use switchboard_core::{sanitize, transcript};
use tokio::signal;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

mod config;

use config::SwitchboardConfig;

#[derive(Parser)]
#[command(name = "switchboard")]
#[command(version)]
#[command(about = "Bridge chat platforms to an agent and route its replies back")]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect all channels and print inbound traffic until Ctrl+C
    Start,

    /// Sanitize and send one message to a destination JID
    Send {
        /// Destination, e.g. slack:C0123456789
        jid: String,
        /// Raw text; internal blocks are stripped before sending
        text: String,
    },

    /// Print what would be sent for the given agent output
    Sanitize {
        text: String,
    },

    /// Initialize config directory and default config
    Init,

    /// Show current configuration
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let filter = if cli.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match cli.command {
        Commands::Init => cmd_init().await,
        Commands::Config => cmd_config(&cli.config),
        Commands::Sanitize { text } => {
            cmd_sanitize(&text);
            Ok(())
        }
        Commands::Send { jid, text } => cmd_send(&cli.config, &jid, &text).await,
        Commands::Start => cmd_start(&cli.config).await,
    }
}

async fn cmd_init() -> Result<()> {
    let config_dir = config::config_dir();
    tokio::fs::create_dir_all(&config_dir)
        .await
        .with_context(|| format!("Failed to create config dir: {}", config_dir.display()))?;

    let config_path = config_dir.join("config.toml");
    if config_path.exists() {
        warn!("Config already exists at {}", config_path.display());
    } else {
        tokio::fs::write(&config_path, config::DEFAULT_CONFIG).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&config_path, std::fs::Permissions::from_mode(0o600))
                .await?;
        }
        info!("Created default config at {}", config_path.display());
    }

    println!("Switchboard initialized at {}", config_dir.display());
    println!(
        "Edit {} to configure your channels and registered groups.",
        config_path.display()
    );
    Ok(())
}

fn cmd_config(config_path: &Option<PathBuf>) -> Result<()> {
    let cfg = SwitchboardConfig::load(config_path)?;
    println!("{:#?}", cfg);
    Ok(())
}

fn cmd_sanitize(text: &str) {
    if let Some(out) = sanitize::format_outbound(text) {
        println!("{}", out);
    }
}

/// Register every enabled channel, in a fixed order
fn build_router(
    cfg: &SwitchboardConfig,
    inbound: mpsc::Sender<InboundEvent>,
    registered_groups: RegisteredGroupsFn,
) -> ChannelRouter {
    let mut router = ChannelRouter::new();

    if cfg.channels.slack.enabled {
        let slack_cfg = &cfg.channels.slack;
        let mut opts = SlackOptions::new(
            slack_cfg.bot_token.clone(),
            cfg.bridge.assistant_name.clone(),
        );
        opts.base_url = slack_cfg.base_url.clone();
        opts.poll_interval = std::time::Duration::from_secs(slack_cfg.poll_interval_secs.max(1));
        opts.prefix_bot_name = slack_cfg.prefix_bot_name;
        router.register(Arc::new(SlackChannel::new(
            opts,
            inbound,
            registered_groups,
        )));
        info!("Slack channel registered");
    }

    if router.channel_count() == 0 {
        warn!("No channels enabled in config");
    }
    router
}

fn registered_groups_fn(cfg: &SwitchboardConfig) -> RegisteredGroupsFn {
    let groups = cfg.registered_groups();
    Arc::new(move || groups.clone())
}

async fn cmd_send(config_path: &Option<PathBuf>, jid: &str, text: &str) -> Result<()> {
    let cfg = SwitchboardConfig::load(config_path)?;
    let (tx, mut rx) = mpsc::channel(cfg.bridge.inbound_buffer.max(1));

    // Nobody consumes inbound traffic here; keep the queue from filling up
    tokio::spawn(async move { while rx.recv().await.is_some() {} });

    let router = build_router(&cfg, tx, registered_groups_fn(&cfg));
    router.connect_all().await?;

    let result = router.deliver(jid, text).await;
    router.disconnect_all().await;

    if result? {
        println!("Sent to {}", jid);
    } else {
        println!("Nothing to send after sanitizing");
    }
    Ok(())
}

async fn cmd_start(config_path: &Option<PathBuf>) -> Result<()> {
    let cfg = SwitchboardConfig::load(config_path)?;
    info!(
        "Loaded config with {} registered groups",
        cfg.groups.len()
    );

    let (tx, mut rx) = mpsc::channel(cfg.bridge.inbound_buffer.max(1));
    let registered = registered_groups_fn(&cfg);
    let router = build_router(&cfg, tx, registered.clone());

    router.connect_all().await?;
    println!("Switchboard is running. Press Ctrl+C to stop.");

    loop {
        tokio::select! {
            _ = signal::ctrl_c() => {
                info!("Shutdown signal received");
                break;
            }
            event = rx.recv() => {
                let Some(event) = event else {
                    info!("All channels closed their inbound queues");
                    break;
                };
                debug!("Inbound event for {}", event.chat_jid());

                match event {
                    InboundEvent::Message { chat_jid, message } => {
                        if !registered().contains_key(&chat_jid) {
                            debug!("Ignoring message for unregistered chat {}", chat_jid);
                            continue;
                        }
                        if message.is_from_me {
                            continue;
                        }
                        info!(
                            "Message from {} in {}: {}",
                            message.sender_name,
                            chat_jid,
                            message.content.chars().take(100).collect::<String>()
                        );
                        println!("{}", transcript::format_message(&message));
                    }
                    InboundEvent::ChatMetadata(meta) => {
                        debug!(
                            "Chat metadata: {} on {} active at {}",
                            meta.name.as_deref().unwrap_or("unnamed"),
                            meta.channel,
                            meta.timestamp
                        );
                    }
                }
            }
        }
    }

    router.disconnect_all().await;
    info!("Switchboard stopped");
    Ok(())
}
