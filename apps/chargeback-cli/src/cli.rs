use std::path::PathBuf;
use std::time::Duration;

use chargeback_client::{ClientConfig, TransactionAttributes};
use chargeback_proto::ClaimId;
use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(
    name = "chargeback",
    author,
    version,
    about = "Talk to a chargeback claim service from the terminal"
)]
pub struct Cli {
    /// Endpoint root for HTTP calls and the socket.io handshake.
    #[arg(long, env = "CHARGEBACK_BASE_URL", global = true)]
    pub base_url: Option<String>,

    /// Seconds to wait for the connect acknowledgement; 0 waits forever.
    #[arg(long, env = "CHARGEBACK_HANDSHAKE_TIMEOUT_SECS", global = true)]
    pub handshake_timeout_secs: Option<u64>,

    /// Upload chunk size in bytes.
    #[arg(long, env = "CHARGEBACK_CHUNK_BYTES", global = true)]
    pub chunk_bytes: Option<usize>,

    /// Path the socket.io server is mounted on.
    #[arg(long, env = "CHARGEBACK_SOCKET_PATH", global = true)]
    pub socket_path: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start or resume a server session and print its id.
    Login {
        #[arg(long)]
        uuid: Option<String>,
    },
    /// Create a claim from `key=value` transaction attributes.
    StartClaim {
        #[arg(long = "attr", value_parser = parse_attr)]
        attrs: Vec<(String, String)>,
    },
    /// Print a claim's message history.
    History { claim: ClaimId },
    /// Print the merchant view of a claim.
    MerchantView { claim: ClaimId },
    /// Fetch and print the claim summary.
    Summary { claim: ClaimId },
    /// Join the claim conversation; stdin lines are sent as responses.
    Chat {
        claim: ClaimId,
        /// Transaction details (JSON) passed with the handshake.
        #[arg(long)]
        details: Option<String>,
    },
    /// Upload a file to a claim.
    Upload { claim: ClaimId, path: PathBuf },
    /// Answer a claim as the merchant.
    Merchant {
        claim: ClaimId,
        #[arg(long)]
        text: String,
    },
}

impl Cli {
    /// Environment-derived config with explicit flags applied on top.
    pub fn client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::from_env();
        if let Some(base_url) = &self.base_url {
            config.base_url = base_url.clone();
        }
        if let Some(secs) = self.handshake_timeout_secs {
            config.handshake_timeout = (secs > 0).then(|| Duration::from_secs(secs));
        }
        if let Some(bytes) = self.chunk_bytes.filter(|bytes| *bytes > 0) {
            config.chunk_bytes = bytes;
        }
        if let Some(path) = &self.socket_path {
            config.socket_path = path.clone();
        }
        config
    }
}

pub fn attributes(pairs: &[(String, String)]) -> TransactionAttributes {
    pairs
        .iter()
        .fold(TransactionAttributes::new(), |attrs, (key, value)| {
            attrs.with(key.clone(), value.clone())
        })
}

fn parse_attr(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got `{raw}`"))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty key in `{raw}`"));
    }
    Ok((key.to_string(), value.to_string()))
}
