//! ovsnetd - Open vSwitch network driver daemon
//!
//! Connects to the switch database, restores persisted endpoints and then
//! serves the driver until interrupted.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};

use ovsdb_client::{InMemoryOvsdb, OvsdbTransport, UnixSocketClient};
use ovsnetd::{
    build_driver, EndpointStore, FileEndpointStore, IpCommandLink, LinkConfig,
    MemoryEndpointStore, NoNetworkLookup, OvsnetConfig, DEFAULT_CONFIG_PATH,
};

/// Open vSwitch network driver
#[derive(Parser, Debug)]
#[command(name = "ovsnetd")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file
    #[arg(short = 'c', long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Enable debug logging
    #[arg(short = 'd', long)]
    debug: bool,

    /// Use an in-memory switch database and record link commands
    /// instead of running them
    #[arg(long)]
    dry_run: bool,
}

/// Initializes tracing; RUST_LOG overrides the level unless --debug is set
fn init_logging(debug: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = if debug {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .init();
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = OvsnetConfig::load_or_default(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    info!(
        bridge = %config.switch.bridge,
        socket = %config.switch.socket_path,
        veth = config.driver.use_veth,
        "Configuration loaded"
    );

    let transport: Arc<dyn OvsdbTransport>;
    let links: Arc<dyn LinkConfig>;
    let store: Arc<dyn EndpointStore>;
    if args.dry_run {
        warn!("Dry run: switch database and links are simulated");
        transport = Arc::new(InMemoryOvsdb::with_bridge(&config.switch.bridge));
        links = Arc::new(IpCommandLink::new().with_mock_mode());
        store = Arc::new(MemoryEndpointStore::new());
    } else {
        let client = UnixSocketClient::connect(&config.switch.socket_path)
            .await
            .context("connecting to the switch database")?;
        transport = Arc::new(client);
        links = Arc::new(IpCommandLink::new());
        store = Arc::new(FileEndpointStore::open(&config.store.path)?);
    }

    let driver = build_driver(&config, transport, links, store).await?;

    let report = driver.restore(Arc::new(NoNetworkLookup)).await?;
    if !report.is_clean() {
        warn!(
            failures = report.failures.len(),
            "Some endpoints could not be restored"
        );
    }

    info!(scope = %driver.capabilities().scope, "ovsnetd ready");
    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("Shutting down");
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.debug);

    info!("--- Starting ovsnetd ---");

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("ovsnetd failed: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
