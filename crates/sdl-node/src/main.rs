// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// SCALE-OUT LEDGER (SDL) - NODE BINARY
//
// Runs one node until SIGINT/SIGTERM, then stops transacting, drains the
// transaction sender, deregisters from the tracker and shuts down.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use clap::Parser;
use ed25519_dalek::SigningKey;
use log::{info, warn};
use sdl_mainchain::{ClientConfig, TendermintChain, TendermintClient};
use sdl_node::config::PeerConfig;
use sdl_node::net::{TcpTransport, TransactionReceiver};
use sdl_node::{
    Application, GenesisBlock, NodeConfig, NodeServices, OwnNode, TrackerClient,
    UniformRandomPattern,
};
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook::flag;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

const DRAIN_PATTERN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Parser)]
#[command(name = "sdl-node")]
#[command(about = "Scale-out ledger node anchoring into a Tendermint main chain", long_about = None)]
#[command(version)]
struct Cli {
    /// TOML config file (defaults come from SDL_* env vars otherwise)
    #[arg(short, long, env = "SDL_CONFIG")]
    config: Option<PathBuf>,

    /// Node id
    #[arg(long)]
    node_id: Option<u32>,

    /// Port on which the node accepts connections
    #[arg(short, long)]
    port: Option<u16>,

    /// Tracker address (host:port)
    #[arg(long)]
    tracker: Option<String>,

    /// Tendermint RPC address (host:port)
    #[arg(long)]
    tendermint: Option<String>,

    /// Peer as ID=HOST:PORT, repeatable
    #[arg(long = "peer", value_parser = parse_peer)]
    peers: Vec<PeerConfig>,

    /// Stop the transaction pattern after this many transactions
    #[arg(long)]
    transactions: Option<u64>,

    /// Genesis block contents shared by all nodes
    #[arg(long, default_value = "sdl-genesis")]
    genesis: String,

    /// 32-byte hex seed for the node key (random if omitted)
    #[arg(long, env = "SDL_KEY_SEED")]
    key_seed: Option<String>,
}

fn parse_peer(text: &str) -> Result<PeerConfig, String> {
    let (id, address) = text
        .split_once('=')
        .ok_or_else(|| format!("expected ID=HOST:PORT, got {:?}", text))?;
    Ok(PeerConfig {
        id: id.trim().parse().map_err(|e| format!("bad peer id {:?}: {}", id, e))?,
        address: address.trim().to_string(),
    })
}

fn signing_key(seed: Option<&str>) -> Result<SigningKey, Box<dyn std::error::Error>> {
    match seed {
        Some(seed) => {
            let bytes: [u8; 32] = hex::decode(seed)?
                .try_into()
                .map_err(|_| "key seed must be 32 bytes")?;
            Ok(SigningKey::from_bytes(&bytes))
        }
        None => Ok(SigningKey::generate(&mut rand::rngs::OsRng)),
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => NodeConfig::load_from_file(path)?,
        None => NodeConfig::load_from_env()?,
    };
    if let Some(id) = cli.node_id {
        config.node_id = id;
    }
    if let Some(port) = cli.port {
        config.node_port = port;
    }
    if let Some(tracker) = cli.tracker {
        config.tracker_address = tracker;
    }
    if let Some(tendermint) = cli.tendermint {
        config.tendermint_address = Some(tendermint);
    }
    if !cli.peers.is_empty() {
        config.peers = cli.peers;
    }
    if cli.transactions.is_some() {
        config.pattern.limit = cli.transactions;
    }
    config.validate()?;

    let client = TendermintClient::new(
        ClientConfig::new(config.tendermint_address()).with_timeout(config.request_timeout()),
    )?;
    let services = NodeServices {
        registry: Arc::new(TrackerClient::new(
            config.tracker_address.clone(),
            config.request_timeout(),
        )?),
        main_chain: Arc::new(TendermintChain::new(client)),
        transport: Arc::new(TcpTransport::new(
            config.peers.iter().map(|p| (p.id, p.address.clone())),
        )),
        handler: Arc::new(TransactionReceiver::new(config.node_id)),
    };

    let app = Application::new(services);
    let own_node = OwnNode::new(config.node_id).with_peers(config.peers.iter().map(|p| p.id));
    app.init(
        config.node_port,
        GenesisBlock::new(cli.genesis.into_bytes()),
        signing_key(cli.key_seed.as_deref())?,
        own_node,
    )?;

    if config.peers.is_empty() {
        info!("No peers configured, node {} will only accept connections", config.node_id);
    } else {
        app.set_transaction_pattern(Arc::new(UniformRandomPattern::from_config(&config.pattern)?))?;
        app.start_transacting()?;
    }

    let shutdown = Arc::new(AtomicBool::new(false));
    for signal in [SIGINT, SIGTERM] {
        if let Err(e) = flag::register(signal, Arc::clone(&shutdown)) {
            warn!("Failed to register signal {} handler: {}", signal, e);
        }
    }

    while !shutdown.load(Ordering::Relaxed) {
        std::thread::sleep(Duration::from_millis(200));
    }

    info!("Shutting down node {}", config.node_id);
    app.stop_transacting();
    if !app.wait_for_pattern(DRAIN_PATTERN_TIMEOUT) {
        warn!("Transaction pattern did not stop within {:?}", DRAIN_PATTERN_TIMEOUT);
    }
    app.finish_transaction_sending();
    app.kill();
    app.wait_for_listener(DRAIN_PATTERN_TIMEOUT);

    eprintln!("✅ Clean shutdown complete");
    Ok(())
}
