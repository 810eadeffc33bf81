//! Dialin CLI - prints an SSH connection string for a tunneled port
//!
//! This binary waits for a local tunneling agent to report a tunnel of the
//! requested protocol, resolves the tunnel's public endpoint to a dialable
//! address, and prints `<user>@<host> -p <port>` on stdout. All diagnostics
//! go to stderr so the connection string stays machine-consumable.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use dialin_resolver::{EndpointResolver, TunnelProtocol};

mod config;
use config::{ConfigFile, Overrides, Settings};

/// Dialin - resolve a tunneled SSH endpoint and print the connection string
#[derive(Parser, Debug)]
#[command(name = "dialin")]
#[command(about = "Resolve a tunneled SSH endpoint and print the connection string")]
#[command(version)]
#[command(long_version = concat!(
    env!("CARGO_PKG_VERSION"),
    "\nCommit: ", env!("GIT_HASH"),
    "\nBuilt: ", env!("BUILD_TIME")
))]
#[command(long_about = r#"
Dialin polls a local tunneling agent's status API until it reports a tunnel
of the requested protocol, resolves the tunnel's public host to a numeric
address, and prints the SSH connection string on stdout.

EXAMPLES:
  # Wait for the agent's TCP tunnel and print `root@<ip> -p <port>`
  dialin

  # Different agent port, user and polling budget
  dialin --api-url http://127.0.0.1:4041/api/tunnels \
    --user runner --attempts 60 --poll-interval 1

  # Keep the process (and the CI runner around it) alive for a day
  dialin --hold 86400

ENVIRONMENT VARIABLES:
  DIALIN_AGENT_API   Agent status API URL
  DIALIN_PROTOCOL    Tunnel protocol to wait for
  DIALIN_SSH_USER    User name in the printed connection string
"#)]
struct Args {
    /// Agent status API URL
    #[arg(long, env = "DIALIN_AGENT_API")]
    api_url: Option<String>,

    /// Tunnel protocol to wait for (tcp, tls, http, https)
    #[arg(long, env = "DIALIN_PROTOCOL")]
    protocol: Option<TunnelProtocol>,

    /// User name in the printed connection string
    #[arg(long, short = 'u', env = "DIALIN_SSH_USER")]
    user: Option<String>,

    /// Maximum number of status polls before giving up
    #[arg(long)]
    attempts: Option<u32>,

    /// Seconds to wait between polls
    #[arg(long)]
    poll_interval: Option<u64>,

    /// Per-request HTTP timeout in seconds
    #[arg(long)]
    request_timeout: Option<u64>,

    /// Seconds to keep the process alive after printing the endpoint
    #[arg(long)]
    hold: Option<u64>,

    /// Configuration file (YAML)
    #[arg(long, short = 'c')]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

/// Setup logging with the specified log level.
///
/// Logs go to stderr; stdout is reserved for the connection string.
fn setup_logging(log_level: &str) -> Result<()> {
    let filter = EnvFilter::try_new(log_level)
        .with_context(|| format!("Invalid log level: {}", log_level))?;

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
        .with(filter)
        .init();

    Ok(())
}

fn build_settings(args: Args) -> Result<Settings> {
    let file = match &args.config {
        Some(path) => {
            info!("Loading configuration from: {}", path.display());
            config::load_config_file(path)?
        }
        None => ConfigFile::default(),
    };

    Settings::resolve(
        Overrides {
            api_url: args.api_url,
            protocol: args.protocol,
            user: args.user,
            attempts: args.attempts,
            poll_interval_secs: args.poll_interval,
            request_timeout_secs: args.request_timeout,
            hold_secs: args.hold,
        },
        file,
    )
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    setup_logging(&args.log_level)?;

    let settings = build_settings(args)?;
    debug!("Settings: {:?}", settings);

    let cancel = CancellationToken::new();
    let canceller = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl+C, cancelling");
            canceller.cancel();
        }
    });

    let resolver = EndpointResolver::new()
        .with_max_attempts(settings.attempts)
        .with_poll_interval(settings.poll_interval)
        .with_request_timeout(settings.request_timeout);

    info!(
        "Waiting for a {} tunnel at {}",
        settings.protocol, settings.api_url
    );

    let endpoint = resolver
        .resolve(&settings.api_url, settings.protocol, &cancel)
        .await
        .context("Tunnel endpoint resolution failed")?;

    info!(
        "Connect with: ssh {}@{} -p {}",
        settings.user, endpoint.host, endpoint.port
    );

    // The connection string is the tool's one product on stdout
    println!("{}@{} -p {}", settings.user, endpoint.host, endpoint.port);

    if !settings.hold.is_zero() {
        info!(
            "Holding for {}s, Ctrl+C to exit early",
            settings.hold.as_secs()
        );
        tokio::select! {
            _ = cancel.cancelled() => info!("Cancelled, ending hold"),
            _ = tokio::time::sleep(settings.hold) => info!("Hold window elapsed"),
        }
    }

    Ok(())
}
