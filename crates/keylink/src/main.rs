use clap::{Parser, Subcommand};
use rand::RngCore;
use std::path::{Path, PathBuf};
use tracing::{error, info};

use keylink::{Node, NodeConfig, NodeError};
use keylink_core::{ContractState, ExternalId, Participant, TxId, WireTransaction};
use keylink_flows::SchemeKind;

/// keylink: attested confidential identities between peers.
#[derive(Parser, Debug)]
#[command(name = "keylink", version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write a configuration file with a fresh identity seed
    Init {
        /// Name of this node's well-known party
        #[arg(long)]
        node_name: Option<String>,

        /// Challenge scheme: single or double
        #[arg(long)]
        scheme: Option<SchemeKind>,
    },

    /// Print the effective configuration and node identity
    ShowConfig,

    /// Run attestation and sync between two in-process nodes
    Demo,
}

fn init_tracing(verbose: bool, config: &NodeConfig) {
    use tracing_subscriber::EnvFilter;

    let filter = if verbose {
        EnvFilter::new("keylink=debug,keylink_flows=debug,keylink_vault=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_filter))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn config_path(path: Option<&PathBuf>) -> PathBuf {
    path.cloned().unwrap_or_else(NodeConfig::default_config_path)
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let config = match NodeConfig::load(&config_path(cli.config.as_ref())) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(1);
        }
    };
    init_tracing(cli.verbose, &config);

    if let Err(e) = run(cli, config).await {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli, config: NodeConfig) -> Result<(), NodeError> {
    match cli.command {
        Commands::Init { node_name, scheme } => {
            cmd_init(&config_path(cli.config.as_ref()), config, node_name, scheme)
        }
        Commands::ShowConfig => cmd_show_config(config),
        Commands::Demo => cmd_demo(config).await,
    }
}

fn cmd_init(
    path: &Path,
    mut config: NodeConfig,
    node_name: Option<String>,
    scheme: Option<SchemeKind>,
) -> Result<(), NodeError> {
    if let Some(name) = node_name {
        config.node_name = name;
    }
    if let Some(scheme) = scheme {
        config.attestation.scheme = scheme;
    }
    if config.identity_seed.is_none() {
        let mut seed = [0u8; 32];
        rand::rngs::OsRng
            .try_fill_bytes(&mut seed)
            .map_err(|e| NodeError::Config(format!("cannot generate identity seed: {}", e)))?;
        config.identity_seed = Some(hex::encode(seed));
    }
    config.validate()?;
    config.save(path)?;

    let node = Node::new(config)?;
    info!(path = %path.display(), "configuration written");
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "config": path.display().to_string(),
            "party": node.party().name,
            "legal_key": node.party().owning_key.to_string(),
            "scheme": node.config().attestation.scheme,
        }))?
    );
    Ok(())
}

fn cmd_show_config(config: NodeConfig) -> Result<(), NodeError> {
    let node = Node::new(config)?;
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "node_name": node.config().node_name,
            "legal_key": node.party().owning_key.to_string(),
            "fingerprint": node.party().owning_key.fingerprint(),
            "seeded": node.config().identity_seed.is_some(),
            "log_filter": node.config().log_filter,
            "scheme": node.config().attestation.scheme,
        }))?
    );
    Ok(())
}

/// Two nodes in one process: the configured node plays Alice, a generated
/// peer plays Bob. Alice obtains two fresh keys from Bob for the same
/// external id, then Bob syncs a transaction so Alice learns a key only Bob
/// has attested so far.
async fn cmd_demo(config: NodeConfig) -> Result<(), NodeError> {
    let scheme = config.attestation.scheme;
    let alice = Node::new(config)?;
    let bob = Node::new(NodeConfig {
        node_name: "O=Demo Peer".into(),
        identity_seed: None,
        log_filter: alice.config().log_filter.clone(),
        attestation: alice.config().attestation.clone(),
    })?;
    alice.introduce(&bob)?;

    let external_id = ExternalId::new_random();
    let mut fresh_keys = Vec::new();
    for _ in 0..2 {
        let (mut a, mut b) = alice.connect(&bob);
        let (attested, responded) = tokio::join!(
            alice.request_fresh_key(&mut a, external_id),
            bob.respond_to_key_request(&mut b)
        );
        responded?;
        fresh_keys.push(attested?.key);
    }

    let known = bob.new_confidential_key(&ExternalId::new_random())?;
    let unknown = bob.new_confidential_key(&ExternalId::new_random())?;
    {
        let (mut a, mut b) = alice.connect(&bob);
        let (attested, responded) = tokio::join!(
            alice.request_key(&mut a, keylink_flows::KeyRequest::KnownKey(known)),
            bob.respond_to_key_request(&mut b)
        );
        responded?;
        attested?;
    }

    let tx = WireTransaction {
        id: TxId(rand::random()),
        inputs: vec![],
        outputs: vec![ContractState::new(vec![
            Participant::Anonymous(known),
            Participant::Anonymous(unknown),
            Participant::WellKnown(alice.party().clone()),
        ])],
    };
    bob.record_transaction(&tx)?;
    let (mut b, mut a) = bob.connect(&alice);
    let (sent, received) = tokio::join!(
        bob.sync_transaction(&mut b, &tx),
        alice.respond_to_sync(&mut a)
    );
    let sent = sent?;
    let received = received?;

    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "scheme": scheme,
            "alice": alice.party().name,
            "bob": bob.party().name,
            "fresh_keys_for_external_id": {
                "external_id": external_id.to_string(),
                "keys": fresh_keys.iter().map(|k| k.to_string()).collect::<Vec<_>>(),
            },
            "sync": {
                "offered": sent.candidates.len(),
                "requested": received.requested.iter().map(|k| k.fingerprint()).collect::<Vec<_>>(),
                "registered": received.synced.len(),
                "failed": received.failed_keys().len(),
            },
            "alice_mappings": alice.mapping_audit()?,
        }))?
    );
    Ok(())
}
