//! TSS Party CLI
//!
//! Runs one party of a threshold ECDSA cluster over HTTP:
//! - serves `/v1/msg` for its peers
//! - runs keygen with every configured party and saves its key material
//! - signs the configured message if it belongs to the signing subset

mod config;
mod store;

use anyhow::{bail, Result};
use clap::Parser;
use config::NodeConfig;
use std::path::PathBuf;
use std::sync::Arc;
use store::FileKeyStore;
use tracing::{info, Level};
use tss_core::{Orchestrator, ReferenceEngine};
use tss_http::HttpTransport;

/// TSS Party - threshold signing node
#[derive(Parser)]
#[command(name = "tss-party")]
#[command(about = "Threshold ECDSA party node")]
#[command(version)]
struct Cli {
    /// Party ID
    #[arg(short, long, env = "PARTY_ID")]
    party_id: String,

    /// Cluster config (JSON); defaults to four local parties
    #[arg(short, long, env = "TSS_CONFIG")]
    config: Option<PathBuf>,

    /// Message to sign
    #[arg(short, long, default_value = "hey this is a test")]
    message: String,

    /// Data directory for key shares
    #[arg(short, long, env = "DEST", default_value = "./data")]
    dest: PathBuf,

    /// Listen address; defaults to this party's configured address
    #[arg(short, long)]
    listen: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();
    let config = NodeConfig::load(cli.config.as_deref())?;
    let directory = Arc::new(config.directory()?);
    let orchestrator_config = config.orchestrator();

    let listen = match cli.listen.as_deref().or(directory.address(&cli.party_id)) {
        Some(listen) => listen.to_string(),
        None => bail!("no listen address for party {}", cli.party_id),
    };

    let store = Arc::new(FileKeyStore::new(&cli.dest)?);
    let transport = Arc::new(HttpTransport::new(&directory));
    let node = Arc::new(
        Orchestrator::new(
            Arc::clone(&directory),
            &cli.party_id,
            orchestrator_config.clone(),
            Arc::new(ReferenceEngine::new()),
            transport.clone(),
        )?
        .with_key_store(store.clone()),
    );

    info!(
        party = %node.local(),
        parties = directory.len(),
        threshold = orchestrator_config.threshold,
        signer = node.is_signer(),
        "Starting party"
    );

    let listener = tokio::net::TcpListener::bind(&listen).await?;
    info!(address = %listen, "Listening");
    let app = tss_http::router(Arc::clone(&node));
    let server = tokio::spawn(async move { axum::serve(listener, app).await });

    transport
        .wait_for_peers(&cli.party_id, orchestrator_config.readiness_retry)
        .await;

    let key = node.keygen().await?;
    info!(
        public_key = hex::encode(&key.public_key),
        path = ?store.path(&cli.party_id),
        "Keygen completed, key share saved"
    );
    println!("Public Key: {}", hex::encode(&key.public_key));

    if node.is_signer() {
        let signature = node.sign(cli.message.as_bytes()).await?;

        println!("Signature:");
        println!("  r: {}", hex::encode(signature.r));
        println!("  s: {}", hex::encode(signature.s));
        println!("  valid: {}", signature.valid);
        println!("  DER: {}", hex::encode(signature.to_der()?));

        if !signature.valid {
            bail!("signature does not verify against the group public key");
        }
    } else {
        info!("Not in the signing subset, skipping signing");
    }

    // Peers may still be finishing and sending to us.
    info!("Done, serving until interrupted");
    tokio::select! {
        result = server => result??,
        result = tokio::signal::ctrl_c() => result?,
    }

    Ok(())
}
