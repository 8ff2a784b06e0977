use clap::Parser;
use color_eyre::eyre::{
    Result,
    WrapErr,
    eyre,
};
use lucky_digit::{
    WagerError,
    chain::{
        AlloyChainClient,
        ChainClient,
    },
    config::{
        AppConfig,
        Cli,
        Command,
        NetworkTarget,
    },
    controller::WagerController,
    view::{
        HouseBalance,
        ViewState,
    },
    wager::{
        Outcome,
        WagerAttempt,
    },
    wallets::{
        KeystoreWallet,
        confirm,
    },
};
use std::{
    path::Path,
    sync::Arc,
};
use tokio::sync::watch;
use tracing::{
    info,
    warn,
};
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling,
};
use tracing_subscriber::{
    EnvFilter,
    fmt,
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

const LOG_FILE_PREFIX: &str = "lucky-digit.log";

fn init_tracing(log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let stderr_layer = fmt::layer().with_writer(std::io::stderr);
    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let (writer, guard) = tracing_appender::non_blocking(rolling::daily(dir, LOG_FILE_PREFIX));
            (Some(fmt::layer().with_ansi(false).with_writer(writer)), Some(guard))
        }
        None => (None, None),
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .wrap_err("installing tracing subscriber")?;
    Ok(guard)
}

async fn check_chain_id(chain: &AlloyChainClient, network: &NetworkTarget) {
    let Some(expected) = network.expected_chain_id() else {
        return;
    };
    match chain.chain_id().await {
        Ok(actual) if actual == expected => {}
        Ok(actual) => warn!(
            expected,
            actual,
            network = network.label(),
            "RPC endpoint reports an unexpected chain id"
        ),
        Err(err) => warn!(%err, "could not verify chain id"),
    }
}

async fn print_balance(chain: &AlloyChainClient) -> Result<()> {
    let balance = chain.house_balance().await.map_err(|err| {
        eprintln!("{}", err.user_message());
        eyre!(err)
    })?;
    println!("{}", HouseBalance::Known(balance).display_eth());
    Ok(())
}

async fn print_progress(mut view: watch::Receiver<ViewState>) {
    let mut last = view.borrow_and_update().clone();
    while view.changed().await.is_ok() {
        let current = view.borrow_and_update().clone();
        if current.state != last.state {
            println!("> {}", current.state);
        }
        if current.house_balance != last.house_balance {
            println!("{}", current.house_balance.display_eth());
        }
        last = current;
    }
}

fn print_attempt(attempt: &WagerAttempt, view: &ViewState) {
    if let Some(tx_hash) = attempt.tx_hash {
        println!("Transaction: {tx_hash}");
    }
    if attempt.outcome != Outcome::Unknown
        && let Some(summary) = &attempt.summary
    {
        println!("{summary}");
    }
    if let Some(text) = view.result_text() {
        println!("{text}");
    }
}

async fn play(
    chain: Arc<AlloyChainClient>,
    config: &AppConfig,
    prediction: &str,
    stake_eth: &str,
) -> Result<()> {
    let wallet_config = config
        .wallet
        .as_ref()
        .ok_or_else(|| eyre!("specify --wallet <name> to play"))?;
    let wallet = KeystoreWallet::new(
        wallet_config.dir.clone(),
        wallet_config.name.clone(),
        config.network.url().clone(),
        config.auto_approve,
    );
    let controller = Arc::new(WagerController::new(chain, wallet));
    let printer = tokio::spawn(print_progress(controller.subscribe()));

    let result = match controller.connect().await {
        Ok(account) => {
            println!("Connected as {account}");
            let mut result = tokio::select! {
                result = controller.submit_form(prediction, stake_eth) => result,
                _ = tokio::signal::ctrl_c() => {
                    return report_interrupt(&controller.view());
                }
            };
            // The parked attempt lives only as long as this process, so offer
            // the retry before exiting.
            if let Err(err) = &result
                && err.leaves_attempt_parked()
            {
                let question = format!("{} Retry now? [y/N] ", err.user_message());
                if confirm(question, config.auto_approve).await? {
                    info!(%err, "retrying resolution");
                    result = controller.retry_resolution().await;
                }
            }
            result
        }
        Err(err) => Err(err),
    };

    let view = controller.view();
    drop(controller);
    printer.await.ok();

    if config.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&view).wrap_err("serializing wager state")?
        );
    }
    match result {
        Ok(attempt) => {
            print_attempt(&attempt, &view);
            Ok(())
        }
        Err(err) => report_failure(err, &view),
    }
}

fn report_interrupt(view: &ViewState) -> Result<()> {
    warn!(state = %view.state, "interrupted while the wager was in progress");
    if let Some(tx_hash) = view.attempt.as_ref().and_then(|a| a.tx_hash) {
        eprintln!("Transaction {tx_hash} was broadcast; check it before wagering again.");
    }
    Err(eyre!("interrupted"))
}

fn report_failure(err: WagerError, view: &ViewState) -> Result<()> {
    eprintln!("{}", err.user_message());
    if err.leaves_attempt_parked()
        && let Some(tx_hash) = view.attempt.as_ref().and_then(|a| a.tx_hash)
    {
        eprintln!("Transaction {tx_hash} was broadcast; its outcome is still unknown.");
    }
    Err(err).wrap_err("wager failed")
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let config = Cli::parse().into_config()?;
    let _log_guard = init_tracing(config.log_dir.as_deref())?;
    info!(
        network = config.network.label(),
        url = %config.network.url(),
        "starting lucky-digit client"
    );

    let chain = Arc::new(AlloyChainClient::connect_http(
        config.network.url().clone(),
        config.policy,
    ));
    check_chain_id(&chain, &config.network).await;

    match &config.command {
        Command::Balance => print_balance(&chain).await,
        Command::Play {
            prediction,
            stake_eth,
        } => play(chain, &config, prediction, stake_eth).await,
    }
}
