//! Cloudlet CLI
//!
//! Command-line front end for the cloudlet launcher. Discovers a cloudlet
//! for the given application through the central registry, brings up the
//! VPN tunnel to it, and relays status events to the console until
//! interrupted.

use clap::Parser;
use cloudlet_core::config::LauncherConfig;
use cloudlet_core::events::StdoutCallback;
use cloudlet_core::launcher::{CloudletLauncher, LauncherMode};
use cloudlet_core::registry::HttpRegistryClient;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod vpn_process;

use vpn_process::ProcessVpnClient;

/// Cloudlet - discover a nearby cloudlet and connect to it over VPN
#[derive(Parser, Debug)]
#[command(name = "cloudlet")]
#[command(version, about, long_about = None)]
struct Args {
    /// Application identifier to request a cloudlet for
    app_id: String,

    /// Path to the launcher configuration file (JSON)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the registry endpoint from the configuration
    #[arg(long)]
    registry_url: Option<String>,

    /// Override the device/user identifier from the configured id file
    #[arg(long)]
    user_id: Option<String>,

    /// External VPN management command; the rendered client
    /// configuration is written to its stdin
    #[arg(long, default_value = "openvpn --config /dev/stdin")]
    vpn_command: String,

    /// Output format: text or json
    #[arg(short, long, default_value = "text")]
    format: OutputFormat,

    /// Run in testing mode: connect the VPN but never report the
    /// assigned tunnel address
    #[arg(long)]
    testing: bool,
}

#[derive(Debug, Clone, clap::ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => match LauncherConfig::from_file(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Error loading config {}: {e}", path.display());
                return ExitCode::FAILURE;
            }
        },
        None => LauncherConfig::new(),
    };

    if let Some(url) = args.registry_url {
        config.registry.base_url = url;
    }

    let registry = match HttpRegistryClient::new(&config.registry) {
        Ok(client) => client,
        Err(e) => {
            eprintln!("Error building registry client: {e}");
            return ExitCode::FAILURE;
        }
    };

    let vpn = match ProcessVpnClient::new(&args.vpn_command) {
        Ok(client) => client,
        Err(e) => {
            eprintln!("Error in VPN command: {e}");
            return ExitCode::FAILURE;
        }
    };

    let mode = if args.testing {
        LauncherMode::Testing
    } else {
        LauncherMode::Standard
    };

    tracing::info!(
        "Connecting to registry {} for app '{}'",
        config.registry.base_url,
        args.app_id
    );

    let user_id = args.user_id.unwrap_or_else(|| config.load_user_id());

    let handle = CloudletLauncher::spawn(
        config.polling.clone(),
        user_id,
        config.load_vpn_template(),
        Arc::new(registry),
        Arc::new(vpn),
        mode,
    );

    let json_output = matches!(args.format, OutputFormat::Json);
    if handle
        .register_callback(Arc::new(StdoutCallback::new(json_output)))
        .await
        .is_err()
    {
        eprintln!("Error: launcher stopped before startup completed");
        return ExitCode::FAILURE;
    }

    if let Err(e) = handle.find_cloudlet(&args.app_id) {
        eprintln!("Error: {e}");
        return ExitCode::FAILURE;
    }

    // Relay events until interrupted, then release the session
    if let Err(e) = tokio::signal::ctrl_c().await {
        eprintln!("Error waiting for interrupt: {e}");
    }

    tracing::info!("Interrupted, releasing cloudlet session");
    let _ = handle.disconnect_cloudlet(&args.app_id);
    let _ = handle.shutdown();
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;

    ExitCode::SUCCESS
}
