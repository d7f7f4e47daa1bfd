use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use core_oob::{
    AckResponder, HandshakeSource, OobClient, OobServer, OverlayTransport, PeerProber,
    PendingTable, TcpOverlay, TlsCapture,
};
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use sni_camo::check::{run_check, DEFAULT_CHECK_HOSTNAME};
use sni_camo::relay::{Relay, TlsDialer};
use sni_camo::{logging, Config};

const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(name = "sni-camo", version, about = "SNI camouflage proxy with an out-of-band peer channel")]
struct Cli {
    /// Path to the JSON configuration
    #[arg(long, global = true, default_value = "config.json")]
    config: PathBuf,
    /// Write logs to a daily rotating file in this directory instead of stderr
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the relay and a co-located OOB server
    Run(ServeArgs),
    /// Run only the OOB server, answering requests from remote relays
    ServeOob(ServeArgs),
    /// Probe configured peers and send one test request
    Check(CheckArgs),
}

#[derive(Parser, Debug)]
struct ServeArgs {
    /// Answer OOB requests with "ACK: <hostname>" instead of contacting the destination
    #[arg(long, default_value_t = false)]
    ack_only: bool,
}

#[derive(Parser, Debug)]
struct CheckArgs {
    /// Host name sent in the test request
    #[arg(long, default_value = DEFAULT_CHECK_HOSTNAME)]
    hostname: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _guard = logging::init(cli.log_dir.as_deref()).context("initialising logging")?;

    let config = Config::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    info!(
        local = %config.local_proxy_addr,
        oob_port = config.oob_port,
        peers = config.oob_peers.len(),
        fake_sni = ?config.fake_sni,
        "config loaded"
    );

    match cli.command {
        Commands::Run(args) => run(config, args).await,
        Commands::ServeOob(args) => serve_oob(config, args).await,
        Commands::Check(args) => check(config, args).await,
    }
}

fn handshake_source(ack_only: bool) -> Arc<dyn HandshakeSource> {
    if ack_only {
        info!("OOB server in ACK-only mode");
        Arc::new(AckResponder)
    } else {
        Arc::new(TlsCapture::new())
    }
}

async fn spawn_oob_server(
    config: &Config,
    server: OobServer,
) -> Result<JoinHandle<std::io::Result<()>>> {
    let addr = config.oob_listen_socket()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind OOB listener {}", addr))?;
    Ok(tokio::spawn(Arc::new(server).serve(listener)))
}

async fn run(config: Config, args: ServeArgs) -> Result<()> {
    let table = PendingTable::new();
    let transport: Arc<dyn OverlayTransport> = Arc::new(TcpOverlay::new(config.oob_port));

    let server = OobServer::new(handshake_source(args.ack_only))
        .with_handshake_timeout(config.handshake_timeout())
        .with_colocated_table(table.clone());
    let oob_task = spawn_oob_server(&config, server).await?;

    let prober = PeerProber::new(Arc::clone(&transport)).with_timeout(config.probe_timeout());
    let peer = prober
        .first_reachable(&config.oob_peers)
        .await
        .context("startup peer probe")?;
    info!(%peer, "startup probe succeeded");

    let client = OobClient::new(transport, table.clone()).with_timeout(config.oob_timeout());
    let relay = Relay::new(
        config.oob_peers.clone(),
        prober,
        client,
        Arc::new(TlsDialer::new(config.fake_sni.clone())),
    )
    .with_max_handshake(config.max_handshake_bytes);

    let addr = config.local_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind relay listener {}", addr))?;
    let relay_task = tokio::spawn(relay.serve(listener));

    let sweeper = tokio::spawn(async move {
        let mut tick = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            tick.tick().await;
            table.sweep_expired();
        }
    });

    let outcome = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
            Ok(())
        }
        j = oob_task => task_exit("OOB server", j),
        j = relay_task => task_exit("relay", j),
    };
    sweeper.abort();
    outcome
}

async fn serve_oob(config: Config, args: ServeArgs) -> Result<()> {
    let server = OobServer::new(handshake_source(args.ack_only))
        .with_handshake_timeout(config.handshake_timeout());
    let oob_task = spawn_oob_server(&config, server).await?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown signal received");
            Ok(())
        }
        j = oob_task => task_exit("OOB server", j),
    }
}

async fn check(config: Config, args: CheckArgs) -> Result<()> {
    let transport: Arc<dyn OverlayTransport> = Arc::new(TcpOverlay::new(config.oob_port));
    let report = run_check(&config, transport, &args.hostname).await?;

    for status in &report.probed {
        println!(
            "{:<40} {}",
            status.peer,
            if status.reachable { "reachable" } else { "unreachable" }
        );
    }
    println!("selected peer: {}", report.selected);
    println!("artifact ({} bytes): {}", report.artifact.len(), hex::encode(&report.artifact));
    if let Ok(text) = std::str::from_utf8(&report.artifact) {
        println!("artifact text: {}", text);
    }
    Ok(())
}

fn task_exit(
    name: &str,
    joined: std::result::Result<std::io::Result<()>, tokio::task::JoinError>,
) -> Result<()> {
    match joined {
        Ok(Ok(())) => bail!("{} stopped unexpectedly", name),
        Ok(Err(e)) => {
            warn!(error = %e, "{} failed", name);
            Err(anyhow!(e).context(format!("{} failed", name)))
        }
        Err(e) => Err(anyhow!("{} task aborted: {}", name, e)),
    }
}
