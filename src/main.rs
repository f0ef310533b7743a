use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use log::info;

use threshold_party::common::random_chain_code_hex;
use threshold_party::engine::sim::SimEngine;
use threshold_party::engine::{Curve, MpcEngine};
use threshold_party::reconstruct::export_root_key;
use threshold_party::state::FileStateStore;
use threshold_party::vault::Vault;
use threshold_party::MpcService;

#[derive(Parser)]
#[command(name = "threshold-party")]
#[command(version, about = "Relay-coordinated threshold MPC participant", long_about = None)]
struct Cli {
    /// Relay server address
    #[arg(short, long, global = true, default_value = "http://127.0.0.1:9090")]
    server: String,

    /// Identifier of the local party, unique within the committee
    #[arg(short, long, global = true)]
    key: Option<String>,

    /// Comma-separated committee party identifiers
    #[arg(short, long, global = true, value_delimiter = ',')]
    parties: Vec<String>,

    /// Communication session identifier, agreed out-of-band
    #[arg(long, global = true)]
    session: Option<String>,

    /// Act as the leader: wait for all parties, publish the setup
    /// message and kick off the run
    #[arg(long, global = true)]
    leader: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run distributed key generation
    Keygen {
        /// Hex encoded 32-byte chain code (generated when omitted)
        #[arg(long, alias = "cc")]
        chaincode: Option<String>,

        /// Use the EdDSA engine instead of ECDSA
        #[arg(long)]
        eddsa: bool,
    },

    /// Sign a message with a threshold quorum
    Keysign {
        /// Hex compressed public key of the key to sign with
        #[arg(long)]
        pubkey: String,

        /// Message to sign
        #[arg(long)]
        message: String,

        /// Derivation path for the signature
        #[arg(long, default_value = "m/44/931/0/0/0")]
        derivepath: String,

        #[arg(long)]
        eddsa: bool,
    },

    /// Reshare a key onto a new committee (old committee required)
    Reshare {
        #[arg(long)]
        pubkey: String,

        /// Comma-separated old committee; --parties names the new one
        #[arg(long, value_delimiter = ',')]
        old_parties: Vec<String>,

        #[arg(long)]
        eddsa: bool,
    },

    /// Refresh the shares of a key over an unchanged committee
    Refresh {
        /// Public key of the share to refresh (omit when joining without one)
        #[arg(long, default_value = "")]
        pubkey: String,

        #[arg(long)]
        eddsa: bool,
    },

    /// Migrate a legacy vault key into an engine share
    Migrate {
        /// Path to the legacy vault file
        #[arg(long)]
        vault: PathBuf,

        #[arg(long)]
        eddsa: bool,
    },

    /// Reconstruct the root key offline from a quorum of share files
    Export {
        /// Comma-separated share files; the first holder receives
        #[arg(long, value_delimiter = ',')]
        part: Vec<PathBuf>,

        #[arg(long)]
        eddsa: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match &cli.command {
        Commands::Keygen { chaincode, eddsa } => {
            let (service, party) = service_for(&cli, *eddsa)?;
            let chain_code = match chaincode {
                Some(chain_code) => chain_code.clone(),
                None => {
                    let chain_code = random_chain_code_hex();
                    info!("generated chain code {}", chain_code);
                    chain_code
                }
            };
            let public_key = service
                .keygen(
                    session(&cli)?,
                    &chain_code,
                    &party,
                    &cli.parties,
                    cli.leader,
                )
                .await?;
            println!("public key: {}", public_key);
        }

        Commands::Keysign {
            pubkey,
            message,
            derivepath,
            eddsa,
        } => {
            let (service, party) = service_for(&cli, *eddsa)?;
            let outcome = service
                .keysign(
                    session(&cli)?,
                    pubkey,
                    message,
                    derivepath,
                    &party,
                    &cli.parties,
                    cli.leader,
                )
                .await?;
            println!("signature: {}", hex::encode(&outcome.signature));
            println!(
                "verification: {}",
                if outcome.verified { "ok" } else { "FAILED" }
            );
        }

        Commands::Reshare {
            pubkey,
            old_parties,
            eddsa,
        } => {
            let (service, party) = service_for(&cli, *eddsa)?;
            let public_key = service
                .reshare(
                    session(&cli)?,
                    pubkey,
                    &party,
                    old_parties,
                    &cli.parties,
                    cli.leader,
                )
                .await?;
            println!("public key: {}", public_key);
        }

        Commands::Refresh { pubkey, eddsa } => {
            let (service, party) = service_for(&cli, *eddsa)?;
            let public_key = service
                .refresh(session(&cli)?, pubkey, &party, &cli.parties, cli.leader)
                .await?;
            println!("public key: {}", public_key);
        }

        Commands::Migrate { vault, eddsa } => {
            let vault = Vault::from_file(vault).context("failed to load vault")?;
            let engine = engine_for(*eddsa);
            let state = Arc::new(FileStateStore::new(Path::new("."), &vault.local_party_id));
            let service = MpcService::new(&cli.server, engine, state);
            let public_key = service
                .migrate(session(&cli)?, &vault, &cli.parties, cli.leader)
                .await?;
            println!("public key: {}", public_key);
        }

        Commands::Export { part, eddsa } => {
            let engine = engine_for(*eddsa);
            let secret = export_root_key(engine.as_ref(), part)?;
            println!("root key: {}", hex::encode(secret.as_slice()));
        }
    }

    Ok(())
}

fn engine_for(eddsa: bool) -> Arc<dyn MpcEngine> {
    Arc::new(SimEngine::new(Curve::from_eddsa_flag(eddsa)))
}

fn service_for(cli: &Cli, eddsa: bool) -> Result<(MpcService, String)> {
    let party = match &cli.key {
        Some(key) if !key.is_empty() => key.clone(),
        _ => bail!("--key is required"),
    };
    let state = Arc::new(FileStateStore::new(Path::new("."), &party));
    Ok((
        MpcService::new(&cli.server, engine_for(eddsa), state),
        party,
    ))
}

fn session(cli: &Cli) -> Result<&str> {
    match &cli.session {
        Some(session) if !session.is_empty() => Ok(session),
        _ => bail!("--session is required"),
    }
}
