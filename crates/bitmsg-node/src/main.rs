//! bitmsg node -- single binary peer-to-peer node.
//!
//! Usage:
//!   bitmsg-node                        # Run with default config
//!   bitmsg-node --config path.toml     # Run with custom config
//!   bitmsg-node handshake HOST:PORT    # One version exchange, then exit
//!   bitmsg-node keygen [--publish]     # Generate signing/encryption keys
//!   bitmsg-node getpubkey RIPE_HEX     # Ask the network for a ripe's keys

use std::net::{SocketAddr, SocketAddrV4};
use std::time::Duration;

use clap::{Parser, Subcommand};

use bitmsg_crypto::{ripe_hash, KeyPair};
use bitmsg_node::config::NodeConfig;
use bitmsg_node::node::{Node, NodeSettings};
use bitmsg_node::peer_book::PeerBook;
use bitmsg_node::{expand_tilde, open_inventory};
use bitmsg_protocol::{now_secs, AddressRecord, GetPubKey, NetAddress, ObjectPayload, PubKey};

/// How often expired objects are pruned from the inventory.
const PRUNE_INTERVAL: Duration = Duration::from_secs(600);

/// Pubkey behavior bit: the owner sends acknowledgements.
const BEHAVIOR_DOES_ACK: u32 = 1;

#[derive(Parser)]
#[command(name = "bitmsg-node", about = "bitmsg peer-to-peer node")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "~/.bitmsg/config.toml")]
    config: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the node (default)
    Run,
    /// Perform one outbound version exchange and print what the peer sent
    Handshake {
        /// Peer address, HOST:PORT
        addr: String,
    },
    /// Generate a signing and an encryption key pair
    Keygen {
        /// Announce the new public keys to the bootstrap peers
        #[arg(long)]
        publish: bool,
    },
    /// Request the public keys behind a ripe hash from the bootstrap peers
    Getpubkey {
        /// 20-byte ripe hash, hex
        ripe: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bitmsg_node=info".into()),
        )
        .init();

    let cli = Cli::parse();
    let config_path = expand_tilde(&cli.config);
    let cfg = NodeConfig::load_or_default(&config_path)?;

    match cli.command {
        Some(Commands::Run) | None => run_node(cfg).await?,
        Some(Commands::Handshake { addr }) => handshake_once(cfg, &addr).await?,
        Some(Commands::Keygen { publish }) => keygen(cfg, publish).await?,
        Some(Commands::Getpubkey { ripe }) => getpubkey(cfg, &ripe).await?,
    }

    Ok(())
}

async fn run_node(cfg: NodeConfig) -> anyhow::Result<()> {
    let inventory = open_inventory(&cfg.storage.inventory)?;

    let listener = tokio::net::TcpListener::bind(&cfg.node.listen_addr).await?;
    let SocketAddr::V4(listen) = listener.local_addr()? else {
        anyhow::bail!("listen_addr must be IPv4: {}", cfg.node.listen_addr);
    };
    let settings = NodeSettings::from_config(&cfg, listen)?;

    let bootstrap = resolve_bootstrap(&cfg).await;
    let (node, mut objects) = Node::new(settings, inventory, bootstrap_book(&bootstrap));
    tracing::info!(
        addr = %node.settings().local_addr,
        protocol = %node.settings().protocol,
        bootstrap = bootstrap.len(),
        "node starting"
    );

    // Shutdown broadcast channel
    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    // Accept loop
    let serve_handle = {
        let node = node.clone();
        let shutdown = shutdown_tx.subscribe();
        tokio::spawn(async move {
            if let Err(e) = node.serve(listener, shutdown).await {
                tracing::error!(error = %e, "accept loop failed");
            }
        })
    };

    // Version exchange with bootstrap peers, then fetch what they have
    let bootstrap_handle = {
        let node = node.clone();
        tokio::spawn(async move {
            for addr in bootstrap {
                let addr = SocketAddr::V4(addr);
                let outcome = match node.version_exchange(addr).await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        tracing::warn!(peer = %addr, error = %e, "bootstrap handshake failed");
                        continue;
                    }
                };
                let wanted = match node.missing(&outcome.peer_inventory) {
                    Ok(wanted) => wanted,
                    Err(e) => {
                        tracing::error!(error = %e, "inventory lookup failed");
                        continue;
                    }
                };
                if let Err(e) = node.get_data(addr, &wanted).await {
                    tracing::warn!(peer = %addr, error = %e, "getdata failed");
                }
            }
        })
    };

    // Received objects: log and pass them on
    let objects_handle = {
        let node = node.clone();
        let mut shutdown = shutdown_tx.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    received = objects.recv() => {
                        let Some(received) = received else { break };
                        tracing::info!(
                            peer = %received.from,
                            hash = %received.hash,
                            command = %received.object.command(),
                            "object received"
                        );
                        match node.inventory().get(&received.hash) {
                            Ok(Some(stored)) => match stored.to_wire() {
                                Ok(msg) => {
                                    let node = node.clone();
                                    tokio::spawn(async move { node.relay(msg).await });
                                }
                                Err(e) => tracing::warn!(error = %e, "stored object unframeable"),
                            },
                            Ok(None) => {}
                            Err(e) => tracing::error!(error = %e, "inventory read failed"),
                        }
                    }
                    _ = shutdown.recv() => break,
                }
            }
        })
    };

    // Periodic inventory pruning
    let prune_handle = {
        let node = node.clone();
        let ttl = Duration::from_secs(cfg.network.object_ttl_secs);
        let mut shutdown = shutdown_tx.subscribe();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(PRUNE_INTERVAL);
            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        if let Err(e) = node.prune(ttl) {
                            tracing::error!(error = %e, "inventory prune failed");
                        }
                    }
                    _ = shutdown.recv() => break,
                }
            }
        })
    };

    tracing::info!("all tasks spawned, press Ctrl-C to stop");

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down...");
    let _ = shutdown_tx.send(());
    bootstrap_handle.abort();

    let _ = tokio::join!(serve_handle, objects_handle, prune_handle);

    tracing::info!("shutdown complete");
    Ok(())
}

async fn handshake_once(cfg: NodeConfig, addr: &str) -> anyhow::Result<()> {
    let peer = resolve_v4(addr).await?;
    let listen: SocketAddrV4 = cfg.node.listen_addr.parse()?;
    let settings = NodeSettings::from_config(&cfg, listen)?;
    let inventory = open_inventory(&cfg.storage.inventory)?;
    let (node, _objects) = Node::new(settings, inventory, PeerBook::new());

    let outcome = node.version_exchange(SocketAddr::V4(peer)).await?;
    let version = &outcome.peer_version;
    println!("Peer:       {peer}");
    if let Some(protocol) = version.protocol() {
        println!("Protocol:   {protocol}");
    }
    println!("User agent: {}", version.user_agent);
    println!("Services:   {}", version.services);
    println!("Streams:    {:?}", version.streams);
    println!("Declared:   {}", version.from_addr);
    println!("Sees us as: {}", version.to_addr);
    println!("Addresses:  {}", outcome.peer_addresses.len());
    for record in &outcome.peer_addresses {
        println!("  {} (stream {}, time {})", record.socket_addr(), record.stream, record.time);
    }
    println!("Inventory:  {}", outcome.peer_inventory.len());
    Ok(())
}

async fn keygen(cfg: NodeConfig, publish: bool) -> anyhow::Result<()> {
    let sign_key = KeyPair::generate();
    let encrypt_key = KeyPair::generate();
    for (label, key) in [("Signing", &sign_key), ("Encryption", &encrypt_key)] {
        println!("{label} public key:  {}", hex::encode(key.encode_public()));
        if let Some(secret) = key.secret_bytes() {
            println!("{label} private key: {}", hex::encode(secret));
        }
    }
    println!("Ripe hash: {}", hex::encode(ripe_hash(&sign_key, &encrypt_key)));

    if publish {
        let stream = cfg.node.streams.first().copied().unwrap_or(1);
        let pubkey = PubKey::for_keys(stream, BEHAVIOR_DOES_ACK, &sign_key, &encrypt_key)?;
        publish_once(cfg, ObjectPayload::from(pubkey)).await?;
    }
    Ok(())
}

async fn getpubkey(cfg: NodeConfig, ripe: &str) -> anyhow::Result<()> {
    let bytes = hex::decode(ripe)?;
    let ripe: [u8; 20] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| anyhow::anyhow!("ripe hash must be 20 bytes, got {}", bytes.len()))?;
    let stream = cfg.node.streams.first().copied().unwrap_or(1);
    publish_once(cfg, ObjectPayload::from(GetPubKey::for_ripe(stream, ripe))).await
}

/// Mine `object`, store it, and hand it to the bootstrap peers.
async fn publish_once(cfg: NodeConfig, object: ObjectPayload) -> anyhow::Result<()> {
    let listen: SocketAddrV4 = cfg.node.listen_addr.parse()?;
    let settings = NodeSettings::from_config(&cfg, listen)?;
    let inventory = open_inventory(&cfg.storage.inventory)?;
    let bootstrap = resolve_bootstrap(&cfg).await;
    let (node, _objects) = Node::new(settings, inventory, bootstrap_book(&bootstrap));

    println!("Mining {} ...", object.command());
    let (hash, report) = node.publish(object).await?;
    println!("Inventory hash: {hash}");
    println!("Delivered:      {}", report.delivered);
    println!("Failed:         {}", report.failed);
    Ok(())
}

async fn resolve_bootstrap(cfg: &NodeConfig) -> Vec<SocketAddrV4> {
    let mut bootstrap = Vec::new();
    for entry in &cfg.network.bootstrap {
        match resolve_v4(&entry.addr).await {
            Ok(addr) => bootstrap.push(addr),
            Err(e) => tracing::warn!(addr = %entry.addr, error = %e, "bootstrap peer skipped"),
        }
    }
    bootstrap
}

fn bootstrap_book(bootstrap: &[SocketAddrV4]) -> PeerBook {
    PeerBook::with_peers(
        bootstrap
            .iter()
            .map(|a| AddressRecord::from_net(NetAddress::new(1, *a), now_secs(), 1))
            .collect(),
    )
}

/// Resolve `HOST:PORT` to its first IPv4 address.
async fn resolve_v4(addr: &str) -> anyhow::Result<SocketAddrV4> {
    tokio::net::lookup_host(addr)
        .await?
        .find_map(|a| match a {
            SocketAddr::V4(v4) => Some(v4),
            SocketAddr::V6(_) => None,
        })
        .ok_or_else(|| anyhow::anyhow!("no IPv4 address for {addr}"))
}
