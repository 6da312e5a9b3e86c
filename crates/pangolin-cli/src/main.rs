//! Pangolin tunnel backend CLI
//!
//! Drives the tunnel control surface from a terminal the way the mobile
//! platform layer does: session init, tunnel start on a descriptor, device
//! registration and settings polling.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio::sync::watch;

use pangolin_core::codec;
use pangolin_core::settings::SettingsSnapshot;
use pangolin_core::{Backend, SettingsPoller};

/// Pangolin - tunnel control surface harness
#[derive(Parser)]
#[command(name = "pangolin")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a tunnel configuration file
    CheckConfig {
        /// Tunnel configuration (JSON)
        #[arg(required = true)]
        config: PathBuf,
    },

    /// Start a tunnel and print every settings update until interrupted
    Run {
        /// Tunnel configuration (JSON)
        #[arg(short, long)]
        config: PathBuf,

        /// Session init configuration (JSON); defaults apply when omitted
        #[arg(short, long)]
        init: Option<PathBuf>,

        /// Descriptor backing the tunnel
        #[arg(long, default_value_t = 3)]
        fd: i32,

        /// Additional device descriptors to register once running
        #[arg(long = "device")]
        devices: Vec<i32>,

        /// Power mode ("normal" or "low")
        #[arg(long, default_value = "normal")]
        power: String,

        /// Append backend logs to this file
        #[arg(long)]
        log_file: Option<PathBuf>,

        /// Stop after this many seconds instead of waiting for Ctrl+C
        #[arg(long)]
        duration: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let backend = Arc::new(Backend::new());
    backend.install_tracing_with_default(if cli.verbose { "debug" } else { "info" });

    match cli.command {
        Commands::CheckConfig { config } => check_config(&config)?,
        Commands::Run {
            config,
            init,
            fd,
            devices,
            power,
            log_file,
            duration,
        } => {
            let options = RunOptions {
                config,
                init,
                fd,
                devices,
                power,
                log_file,
                duration: duration.map(Duration::from_secs),
            };
            run(backend, options).await?;
        }
    }

    Ok(())
}

fn read_json(path: &Path) -> anyhow::Result<String> {
    std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

/// Turn a boundary error string into an `anyhow` error
fn check(result: Option<String>, what: &str) -> anyhow::Result<()> {
    match result {
        None => Ok(()),
        Some(err) => anyhow::bail!("{what} failed: {err}"),
    }
}

/// Decode a tunnel configuration and print what the backend would use
fn check_config(path: &Path) -> anyhow::Result<()> {
    let raw = read_json(path)?;
    let config = codec::decode_tunnel_config(&raw)?;

    println!("Endpoint: {}", config.endpoint);
    println!("Client ID: {}", config.id);
    println!("MTU: {}", config.mtu);
    println!(
        "Ping: every {:?}, timeout {:?}",
        config.ping_interval(),
        config.ping_timeout()
    );
    println!("Holepunch: {}", config.holepunch);
    let dns = config.effective_dns_servers();
    if dns.is_empty() {
        println!("DNS: system resolvers");
    } else {
        println!("DNS: {}", dns.join(", "));
    }
    tracing::debug!("Decoded config: {:?}", config);
    Ok(())
}

struct RunOptions {
    config: PathBuf,
    init: Option<PathBuf>,
    fd: i32,
    devices: Vec<i32>,
    power: String,
    log_file: Option<PathBuf>,
    duration: Option<Duration>,
}

async fn run(backend: Arc<Backend>, options: RunOptions) -> anyhow::Result<()> {
    if let Some(path) = &options.log_file {
        let path = path.to_str().context("Log file path is not valid UTF-8")?;
        check(backend.enable_file_logging(path), "Enabling file logging")?;
    }
    check(backend.set_power_mode(&options.power), "Setting power mode")?;

    let init = match &options.init {
        Some(path) => read_json(path)?,
        None => String::from("{}"),
    };
    check(backend.init_session(&init), "Session init")?;

    let config = read_json(&options.config)?;
    check(backend.start_tunnel(options.fd, &config), "Tunnel start")?;
    for fd in &options.devices {
        check(backend.add_device(*fd), "Adding device")?;
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let poller = tokio::spawn(SettingsPoller::new().run(
        Arc::clone(backend.controller().settings()),
        backend.diagnostics().power_state(),
        shutdown_rx,
        |snapshot: &SettingsSnapshot| -> Result<(), serde_json::Error> {
            let json = serde_json::to_string_pretty(&snapshot.settings)?;
            println!("Network settings v{}:\n{}", snapshot.version, json);
            Ok(())
        },
    ));

    match options.duration {
        Some(duration) => tokio::time::sleep(duration).await,
        None => {
            println!("Tunnel running, press Ctrl+C to stop");
            tokio::signal::ctrl_c().await?;
        }
    }

    let status = backend.controller().status();
    tracing::info!(
        "Stopping tunnel ({} device(s), settings v{})",
        status.device_count,
        status.settings_version
    );
    check(backend.stop_tunnel(), "Tunnel stop")?;

    let _ = shutdown_tx.send(true);
    let exit = poller.await?;
    tracing::debug!("Settings poller exited: {:?}", exit);

    check(backend.disable_file_logging(), "Disabling file logging")?;
    Ok(())
}
