use crate::{
    LINEA_SEPOLIA_CHAIN_ID,
    chain::ConfirmationPolicy,
    error::WagerError,
    wallets::resolve_wallet_dir,
};
use clap::{
    ArgGroup,
    Parser,
    Subcommand,
};
use std::{
    path::PathBuf,
    time::Duration,
};
use thiserror::Error;
use url::Url;

pub const DEFAULT_LINEA_SEPOLIA_RPC_URL: &str = "https://rpc.sepolia.linea.build";
pub const DEFAULT_LOCAL_RPC_URL: &str = "http://localhost:8545";

#[derive(Parser, Debug)]
#[command(
    name = "lucky-digit",
    about = "Wager on the lucky digit contract: guess 0-9, stake ETH, see if you won",
    version,
    group(ArgGroup::new("network").args(["linea_sepolia", "local"]))
)]
pub struct Cli {
    /// Play on Linea Sepolia (default)
    #[arg(long)]
    pub linea_sepolia: bool,

    /// Play against a local EVM node
    #[arg(long)]
    pub local: bool,

    /// Override RPC URL for the selected network
    #[arg(long)]
    pub rpc_url: Option<String>,

    /// Keystore name to sign with (required for `play`)
    #[arg(long)]
    pub wallet: Option<String>,

    /// Override keystore directory (defaults to ~/.foundry/keystores)
    #[arg(long)]
    pub wallet_dir: Option<String>,

    /// Blocks the receipt must be buried under before events are read
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u64).range(1..))]
    pub confirmations: u64,

    /// Give up waiting for a receipt after this many seconds
    #[arg(long, default_value_t = 180)]
    pub receipt_timeout_secs: u64,

    /// Sign without asking for confirmation
    #[arg(short, long)]
    pub yes: bool,

    /// Print the final attempt as JSON
    #[arg(long)]
    pub json: bool,

    /// Also write logs to a daily rolling file in this directory
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Clone, Debug, PartialEq, Eq)]
pub enum Command {
    /// Print the house balance
    Balance,
    /// Place one wager and wait for its outcome
    Play {
        /// Digit to bet on, 0 to 9
        #[arg(allow_hyphen_values = true)]
        prediction: String,
        /// Stake in ETH, e.g. 0.01
        #[arg(allow_hyphen_values = true)]
        stake_eth: String,
    },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid RPC URL '{url}': {source}")]
    InvalidRpcUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("specify --wallet <name> to select a keystore for playing")]
    MissingWallet,
    #[error(transparent)]
    WalletDir(#[from] WagerError),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum NetworkTarget {
    LineaSepolia { url: Url },
    Local { url: Url },
}

impl NetworkTarget {
    pub fn url(&self) -> &Url {
        match self {
            NetworkTarget::LineaSepolia { url } | NetworkTarget::Local { url } => url,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            NetworkTarget::LineaSepolia { .. } => "linea-sepolia",
            NetworkTarget::Local { .. } => "local",
        }
    }

    /// Local nodes pick their own chain id.
    pub fn expected_chain_id(&self) -> Option<u64> {
        match self {
            NetworkTarget::LineaSepolia { .. } => Some(LINEA_SEPOLIA_CHAIN_ID),
            NetworkTarget::Local { .. } => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WalletConfig {
    pub name: String,
    pub dir: PathBuf,
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub network: NetworkTarget,
    pub wallet: Option<WalletConfig>,
    pub policy: ConfirmationPolicy,
    pub auto_approve: bool,
    pub json: bool,
    pub log_dir: Option<PathBuf>,
    pub command: Command,
}

impl Cli {
    pub fn into_config(self) -> Result<AppConfig, ConfigError> {
        let network = self.network()?;
        let wallet = match self.wallet {
            Some(name) => Some(WalletConfig {
                name,
                dir: resolve_wallet_dir(self.wallet_dir.as_deref())?,
            }),
            None => None,
        };
        if wallet.is_none() && matches!(self.command, Command::Play { .. }) {
            return Err(ConfigError::MissingWallet);
        }
        let policy = ConfirmationPolicy {
            confirmations: self.confirmations,
            timeout: Duration::from_secs(self.receipt_timeout_secs),
            ..ConfirmationPolicy::default()
        };
        Ok(AppConfig {
            network,
            wallet,
            policy,
            auto_approve: self.yes,
            json: self.json,
            log_dir: self.log_dir,
            command: self.command,
        })
    }

    fn network(&self) -> Result<NetworkTarget, ConfigError> {
        let default_url = if self.local {
            DEFAULT_LOCAL_RPC_URL
        } else {
            DEFAULT_LINEA_SEPOLIA_RPC_URL
        };
        let raw = self.rpc_url.as_deref().unwrap_or(default_url);
        let url = Url::parse(raw).map_err(|source| ConfigError::InvalidRpcUrl {
            url: raw.to_string(),
            source,
        })?;
        Ok(if self.local {
            NetworkTarget::Local { url }
        } else {
            NetworkTarget::LineaSepolia { url }
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("lucky-digit").chain(args.iter().copied()))
            .unwrap()
    }

    #[test]
    fn into_config__defaults_to_linea_sepolia() {
        // given
        let cli = parse(&["balance"]);

        // when
        let config = cli.into_config().unwrap();

        // then
        assert_eq!(
            config.network,
            NetworkTarget::LineaSepolia {
                url: Url::parse(DEFAULT_LINEA_SEPOLIA_RPC_URL).unwrap()
            }
        );
        assert_eq!(config.network.expected_chain_id(), Some(LINEA_SEPOLIA_CHAIN_ID));
        assert_eq!(config.policy, ConfirmationPolicy::default());
        assert!(config.wallet.is_none());
        assert!(!config.auto_approve);
    }

    #[test]
    fn into_config__local_with_rpc_override() {
        let config = parse(&["--local", "--rpc-url", "http://127.0.0.1:9545", "balance"])
            .into_config()
            .unwrap();
        assert_eq!(config.network.url().as_str(), "http://127.0.0.1:9545/");
        assert_eq!(config.network.label(), "local");
        assert_eq!(config.network.expected_chain_id(), None);
    }

    #[test]
    fn into_config__play_requires_a_wallet() {
        let result = parse(&["play", "5", "0.01"]).into_config();
        assert!(matches!(result, Err(ConfigError::MissingWallet)));
    }

    #[test]
    fn into_config__play_keeps_raw_form_values() {
        // given
        let cli = parse(&[
            "--wallet",
            "alice",
            "--wallet-dir",
            "/tmp/keys",
            "--confirmations",
            "3",
            "--receipt-timeout-secs",
            "30",
            "--yes",
            "play",
            "-1",
            "0.01",
        ]);

        // when
        let config = cli.into_config().unwrap();

        // then
        assert_eq!(
            config.command,
            Command::Play {
                prediction: "-1".into(),
                stake_eth: "0.01".into()
            }
        );
        assert_eq!(
            config.wallet,
            Some(WalletConfig {
                name: "alice".into(),
                dir: PathBuf::from("/tmp/keys"),
            })
        );
        assert_eq!(config.policy.confirmations, 3);
        assert_eq!(config.policy.timeout, Duration::from_secs(30));
        assert!(config.auto_approve);
    }

    #[test]
    fn parse__rejects_both_networks_and_zero_confirmations() {
        let args = ["lucky-digit", "--local", "--linea-sepolia", "balance"];
        assert!(Cli::try_parse_from(args).is_err());
        let args = ["lucky-digit", "--confirmations", "0", "balance"];
        assert!(Cli::try_parse_from(args).is_err());
    }

    #[test]
    fn into_config__bad_rpc_url_is_reported() {
        let result = parse(&["--rpc-url", "not a url", "balance"]).into_config();
        assert!(matches!(result, Err(ConfigError::InvalidRpcUrl { .. })));
    }
}
