//! driftsync: keep a local tree and a remote SFTP tree identical
//!
//! The watcher connects once, prints the server fingerprint, then runs
//! until Ctrl-C, streaming one line per synced change.

use std::path::PathBuf;

use clap::builder::styling::{AnsiColor, Effects};
use clap::{builder::Styles, Parser, Subcommand};
use color_eyre::eyre::{bail, eyre};
use color_eyre::Result;
use tracing::{error, info, warn};

use driftsync_core::{TransferKind, WatchEvent, WatcherConfig};
use driftsync_watcher::Watcher;

const STYLES: Styles = Styles::styled()
    .header(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .usage(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .literal(AnsiColor::Cyan.on_default().effects(Effects::BOLD))
    .placeholder(AnsiColor::Cyan.on_default())
    .valid(AnsiColor::Green.on_default())
    .invalid(AnsiColor::Red.on_default());

#[derive(Parser)]
#[command(name = "driftsync")]
#[command(version)]
#[command(styles = STYLES)]
#[command(about = "Continuous bidirectional directory sync over SFTP")]
#[command(long_about = r#"
driftsync keeps one local directory and one remote SFTP directory identical.

A worker walks both trees on a fixed cadence, diffs them against the last
known in-sync state, and uploads, downloads or deletes whatever diverged.
When both sides changed the same file, the remote copy wins.

Examples:
  driftsync watch --profile sync.toml          Watch using a TOML profile
  driftsync watch --host files.example.com --username sync \
      --remote /srv/data --local ~/data --privkey ~/.ssh/id_ed25519 \
      --pubkey ~/.ssh/id_ed25519.pub
  driftsync check --profile sync.toml          Connect once, print the fingerprint
"#)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args)]
struct ConnectionArgs {
    /// TOML profile with the watcher configuration
    #[arg(long)]
    profile: Option<PathBuf>,

    /// Remote host name or address
    #[arg(long)]
    host: Option<String>,

    /// SSH port
    #[arg(long)]
    port: Option<u16>,

    /// Remote account name
    #[arg(long)]
    username: Option<String>,

    /// Absolute remote root directory
    #[arg(long)]
    remote: Option<String>,

    /// Absolute local root directory
    #[arg(long)]
    local: Option<String>,

    /// Public key path (requires --privkey)
    #[arg(long)]
    pubkey: Option<String>,

    /// Private key path (requires --pubkey)
    #[arg(long)]
    privkey: Option<String>,

    /// Environment variable holding the password or key passphrase
    #[arg(long, default_value = "DRIFTSYNC_PASSWORD")]
    password_env: String,

    /// Milliseconds between passes
    #[arg(long)]
    delay_ms: Option<u64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch and continuously sync the configured root pair
    Watch {
        #[command(flatten)]
        connection: ConnectionArgs,
    },

    /// Connect, print the server fingerprint, and exit
    Check {
        #[command(flatten)]
        connection: ConnectionArgs,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match cli.command {
        Commands::Watch { connection } => watch_command(connection).await,
        Commands::Check { connection } => check_command(connection).await,
    }
}

async fn watch_command(connection: ConnectionArgs) -> Result<()> {
    let config = build_config(connection)?;
    info!(
        "watching {} <-> {}@{}:{}",
        config.local_path, config.username, config.host, config.remote_path
    );

    let mut watcher = Watcher::new(config)?;
    watcher.connect().await?;
    if let Some(fp) = watcher.fingerprint() {
        info!("server fingerprint: {}", hex_fingerprint(&fp));
    }

    let mut events = watcher.start()?;
    info!("syncing (Ctrl-C to stop)");

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Some(event) => print_event(&event),
                    // channel closed: the worker is done
                    None => break,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("stopping...");
                watcher.stop().await;
            }
        }
    }

    if let Some(err) = watcher.last_error() {
        warn!("last recorded error: {err}");
    }
    info!("stopped");
    Ok(())
}

async fn check_command(connection: ConnectionArgs) -> Result<()> {
    let config = build_config(connection)?;

    let mut watcher = Watcher::new(config)?;
    watcher.connect().await?;

    match watcher.fingerprint() {
        Some(fp) => info!("server fingerprint: {}", hex_fingerprint(&fp)),
        None => warn!("no fingerprint captured"),
    }
    info!("status: {:?}", watcher.status());

    watcher.disconnect().await?;
    Ok(())
}

/// Assemble the watcher configuration from a profile, flags, and the
/// password environment variable. Flags override profile values.
fn build_config(args: ConnectionArgs) -> Result<WatcherConfig> {
    let mut config = match &args.profile {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .map_err(|e| eyre!("cannot read profile {}: {e}", path.display()))?;
            toml::from_str::<WatcherConfig>(&raw)
                .map_err(|e| eyre!("cannot parse profile {}: {e}", path.display()))?
        }
        None => {
            let (Some(host), Some(username), Some(remote), Some(local)) =
                (&args.host, &args.username, &args.remote, &args.local)
            else {
                bail!("either --profile or --host, --username, --remote and --local are required");
            };
            WatcherConfig {
                host: host.clone(),
                port: 22,
                username: username.clone(),
                remote_path: remote.clone(),
                local_path: local.clone(),
                pubkey: None,
                privkey: None,
                password: None,
                use_keyboard: true,
                delay_ms: 1000,
                timeout_sec: 60,
                max_err_count: 3,
                stable_poll_ms: 250,
            }
        }
    };

    if let Some(host) = args.host {
        config.host = host;
    }
    if let Some(port) = args.port {
        config.port = port;
    }
    if let Some(username) = args.username {
        config.username = username;
    }
    if let Some(remote) = args.remote {
        config.remote_path = remote;
    }
    if let Some(local) = args.local {
        config.local_path = local;
    }
    if let Some(pubkey) = args.pubkey {
        config.pubkey = Some(pubkey);
    }
    if let Some(privkey) = args.privkey {
        config.privkey = Some(privkey);
    }
    if let Some(delay_ms) = args.delay_ms {
        config.delay_ms = delay_ms;
    }
    if let Ok(password) = std::env::var(&args.password_env) {
        if !password.is_empty() {
            config.password = Some(password);
        }
    }

    config.local_path = expand_tilde(&config.local_path);
    if let Some(pubkey) = config.pubkey.take() {
        config.pubkey = Some(expand_tilde(&pubkey));
    }
    if let Some(privkey) = config.privkey.take() {
        config.privkey = Some(expand_tilde(&privkey));
    }

    config.validate()?;
    Ok(config)
}

fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest).to_string_lossy().into_owned();
        }
    }
    path.to_string()
}

fn print_event(event: &WatchEvent) {
    match event {
        WatchEvent::File { item, kind, done } => {
            let verb = match kind {
                TransferKind::Download => "download",
                TransferKind::Upload => "upload",
                TransferKind::LocalDelete => "delete remote",
                TransferKind::RemoteDelete => "delete local",
            };
            if *done {
                info!("{verb} {} ({} bytes)", item.name, item.attrs.size);
            } else {
                info!("{verb} {} ...", item.name);
            }
        }
        WatchEvent::Error(err) => match err.path() {
            Some(path) => error!("{err} [{path}]"),
            None => error!("{err}"),
        },
    }
}

fn hex_fingerprint(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(":")
}
