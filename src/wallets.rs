use crate::{
    error::WagerError,
    wager::CallPlan,
};
use alloy::{
    network::EthereumWallet,
    primitives::{
        Address,
        TxHash,
        utils::format_ether,
    },
    providers::{
        DynProvider,
        Provider,
        ProviderBuilder,
    },
    signers::local::PrivateKeySigner,
};
use eth_keystore::{
    KeystoreError,
    decrypt_key,
};
use rpassword::prompt_password;
use std::{
    fs,
    io::{
        self,
        BufRead,
        Write,
    },
    path::{
        Path,
        PathBuf,
    },
};
use tracing::{
    info,
    warn,
};
use url::Url;

/// Grants a [`WalletSession`] once the user has authorized access.
pub trait WalletProvider {
    type Session: WalletSession;

    fn connect(&self) -> impl Future<Output = Result<Self::Session, WagerError>> + Send;
}

/// An authorized signer.
pub trait WalletSession {
    fn account(&self) -> Address;

    /// Signs and broadcasts exactly the given plan.
    fn submit(&self, plan: &CallPlan)
    -> impl Future<Output = Result<TxHash, WagerError>> + Send;
}

#[derive(Clone, Debug)]
pub struct WalletDescriptor {
    pub name: String,
    pub path: PathBuf,
}

impl WalletDescriptor {
    pub fn new(name: impl Into<String>, path: PathBuf) -> Self {
        Self {
            name: name.into(),
            path,
        }
    }
}

pub fn default_wallet_dir() -> Result<PathBuf, WagerError> {
    let home = std::env::var("HOME").map_err(|_| {
        WagerError::ProviderUnavailable("HOME environment variable not set".into())
    })?;
    Ok(PathBuf::from(home).join(".foundry").join("keystores"))
}

pub fn resolve_wallet_dir(dir: Option<&str>) -> Result<PathBuf, WagerError> {
    match dir {
        Some(raw) => {
            let expanded = shellexpand::tilde(raw);
            Ok(PathBuf::from(expanded.into_owned()))
        }
        None => default_wallet_dir(),
    }
}

/// Keystores are plain files named after the account, optionally with a `.json`
/// extension.
pub fn list_wallets(dir: &Path) -> Result<Vec<WalletDescriptor>, WagerError> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let entries = fs::read_dir(dir).map_err(|e| {
        WagerError::ProviderUnavailable(format!(
            "failed to read wallet directory {}: {e}",
            dir.display()
        ))
    })?;
    let mut wallets = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| {
            WagerError::ProviderUnavailable(format!("failed to read wallet entry: {e}"))
        })?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let name = match path.extension().and_then(|ext| ext.to_str()) {
            None => path.file_name(),
            Some("json") => path.file_stem(),
            Some(_) => continue,
        };
        let Some(name) = name.and_then(|n| n.to_str()) else {
            continue;
        };
        if name.starts_with('.') {
            continue;
        }
        wallets.push(WalletDescriptor::new(name, path.clone()));
    }
    wallets.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(wallets)
}

pub fn find_wallet(dir: &Path, name: &str) -> Result<WalletDescriptor, WagerError> {
    let wallets = list_wallets(dir)?;
    wallets.into_iter().find(|w| w.name == name).ok_or_else(|| {
        WagerError::ProviderUnavailable(format!(
            "wallet '{name}' not found in {}",
            dir.to_string_lossy()
        ))
    })
}

/// A wrong password counts as the user declining; anything else means the
/// keystore itself is unusable.
pub fn decrypt_signer(
    descriptor: &WalletDescriptor,
    password: &str,
) -> Result<PrivateKeySigner, WagerError> {
    let secret = decrypt_key(&descriptor.path, password.as_bytes()).map_err(|e| match e {
        KeystoreError::MacMismatch => WagerError::UserRejected(format!(
            "invalid password for wallet '{}'",
            descriptor.name
        )),
        other => WagerError::ProviderUnavailable(format!(
            "wallet '{}' could not be read: {other}",
            descriptor.name
        )),
    })?;
    PrivateKeySigner::from_slice(&secret).map_err(|_| {
        WagerError::ProviderUnavailable(format!(
            "wallet '{}' contained unsupported key material",
            descriptor.name
        ))
    })
}

/// Maps a transport error raised while broadcasting. Remote signers report a
/// declined request as an error message, so the text is inspected.
pub fn classify_broadcast_error(message: &str) -> WagerError {
    let lowered = message.to_ascii_lowercase();
    if lowered.contains("user rejected")
        || lowered.contains("user denied")
        || lowered.contains("rejected by user")
    {
        WagerError::UserRejected(message.to_string())
    } else {
        WagerError::BroadcastError(message.to_string())
    }
}

#[derive(Clone, Debug)]
pub struct KeystoreWallet {
    dir: PathBuf,
    name: String,
    rpc_url: Url,
    auto_approve: bool,
}

impl KeystoreWallet {
    pub fn new(dir: PathBuf, name: impl Into<String>, rpc_url: Url, auto_approve: bool) -> Self {
        Self {
            dir,
            name: name.into(),
            rpc_url,
            auto_approve,
        }
    }
}

impl WalletProvider for KeystoreWallet {
    type Session = KeystoreSession;

    async fn connect(&self) -> Result<KeystoreSession, WagerError> {
        let descriptor = find_wallet(&self.dir, &self.name)?;
        let prompt = format!("Enter password for wallet '{}': ", descriptor.name);
        let password = tokio::task::spawn_blocking(move || prompt_password(prompt))
            .await
            .map_err(|e| WagerError::ProviderUnavailable(format!("password prompt: {e}")))?
            .map_err(|e| WagerError::UserRejected(format!("password prompt: {e}")))?;

        let signer = decrypt_signer(&descriptor, &password)?;
        let account = signer.address();
        info!(%account, wallet = %descriptor.name, "wallet unlocked");

        let provider = ProviderBuilder::new()
            .wallet(EthereumWallet::from(signer))
            .connect_http(self.rpc_url.clone())
            .erased();
        Ok(KeystoreSession {
            account,
            provider,
            auto_approve: self.auto_approve,
        })
    }
}

#[derive(Clone, Debug)]
pub struct KeystoreSession {
    account: Address,
    provider: DynProvider,
    auto_approve: bool,
}

impl KeystoreSession {
    async fn confirm_signature(&self, plan: &CallPlan) -> Result<(), WagerError> {
        let question = format!(
            "Sign wager of {} ETH on {} from {}? [y/N] ",
            format_ether(plan.request().stake_wei()),
            plan.request().prediction(),
            self.account,
        );
        if confirm(question, self.auto_approve).await? {
            Ok(())
        } else {
            Err(WagerError::UserRejected("signature declined".into()))
        }
    }
}

impl WalletSession for KeystoreSession {
    fn account(&self) -> Address {
        self.account
    }

    async fn submit(&self, plan: &CallPlan) -> Result<TxHash, WagerError> {
        if plan.account() != self.account {
            return Err(WagerError::BroadcastError(format!(
                "plan was simulated for {} but the wallet is {}",
                plan.account(),
                self.account
            )));
        }
        self.confirm_signature(plan).await?;
        let pending = self
            .provider
            .send_transaction(plan.transaction().clone())
            .await
            .map_err(|e| {
                warn!(%e, "broadcast failed");
                classify_broadcast_error(&e.to_string())
            })?;
        let tx_hash = *pending.tx_hash();
        info!(%tx_hash, "wager transaction broadcast");
        Ok(tx_hash)
    }
}

/// Asks a y/N question on the terminal; anything but yes is a no. With
/// `auto_approve` the question is not shown.
pub async fn confirm(question: String, auto_approve: bool) -> Result<bool, WagerError> {
    if auto_approve {
        return Ok(true);
    }
    tokio::task::spawn_blocking(move || ask_yes_no(&question))
        .await
        .map_err(|e| WagerError::UserRejected(format!("prompt: {e}")))?
        .map_err(|e| WagerError::UserRejected(format!("prompt: {e}")))
}

fn ask_yes_no(question: &str) -> io::Result<bool> {
    let mut stdout = io::stdout();
    stdout.write_all(question.as_bytes())?;
    stdout.flush()?;
    let mut answer = String::new();
    io::stdin().lock().read_line(&mut answer)?;
    Ok(is_affirmative(&answer))
}

fn is_affirmative(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}
