use crate::{
    chain::ChainClient,
    error::WagerError,
    outcome::{
        BlockEvents,
        Resolution,
    },
    view::{
        HouseBalance,
        ViewState,
        WagerState,
    },
    wager::{
        BlockRange,
        EventKind,
        Receipt,
        WagerAttempt,
        WagerRequest,
    },
    wallets::{
        WalletProvider,
        WalletSession,
    },
};
use alloy::primitives::{
    Address,
    I256,
    TxHash,
    U256,
};
use chrono::{
    DateTime,
    Utc,
};
use std::{
    mem,
    sync::{
        Arc,
        Mutex,
        PoisonError,
    },
};
use tokio::sync::watch;
use tracing::{
    debug,
    info,
    warn,
};

#[derive(Clone, Debug)]
struct Started {
    id: u64,
    request: WagerRequest,
    started_at: DateTime<Utc>,
}

#[derive(Clone, Debug)]
struct Signed {
    started: Started,
    tx_hash: TxHash,
}

#[derive(Clone, Debug)]
struct Confirmed {
    signed: Signed,
    receipt: Receipt,
}

#[derive(Clone, Debug)]
struct Finished {
    confirmed: Confirmed,
    resolution: Resolution,
}

#[derive(Clone, Debug)]
enum Parked {
    Signed(Signed),
    Confirmed(Confirmed),
}

/// Progress of the current attempt. Each step carries exactly the data it has
/// earned, so a submitted attempt without a hash cannot exist.
#[derive(Clone, Debug, Default)]
enum AttemptState {
    #[default]
    None,
    Simulating(Started),
    AwaitingSignature(Started),
    Submitted(Signed),
    Confirming(Signed),
    Resolving(Confirmed),
    Unresolved(Parked),
    Resolved(Finished),
}

impl Started {
    fn snapshot(&self) -> WagerAttempt {
        WagerAttempt::new(self.request, self.started_at)
    }
}

impl Signed {
    fn snapshot(&self) -> WagerAttempt {
        let mut attempt = self.started.snapshot();
        attempt.tx_hash = Some(self.tx_hash);
        attempt
    }
}

impl Confirmed {
    fn snapshot(&self) -> WagerAttempt {
        let mut attempt = self.signed.snapshot();
        attempt.block_number = Some(self.receipt.block_number);
        attempt.receipt_success = Some(self.receipt.success);
        attempt
    }
}

impl Finished {
    fn snapshot(&self) -> WagerAttempt {
        let mut attempt = self.confirmed.snapshot();
        attempt.outcome = self.resolution.outcome;
        attempt.summary = self.resolution.summary.clone();
        attempt
    }
}

impl Parked {
    fn id(&self) -> u64 {
        match self {
            Parked::Signed(signed) => signed.started.id,
            Parked::Confirmed(confirmed) => confirmed.signed.started.id,
        }
    }
}

impl AttemptState {
    fn id(&self) -> Option<u64> {
        match self {
            AttemptState::None => None,
            AttemptState::Simulating(started) | AttemptState::AwaitingSignature(started) => {
                Some(started.id)
            }
            AttemptState::Submitted(signed) | AttemptState::Confirming(signed) => {
                Some(signed.started.id)
            }
            AttemptState::Resolving(confirmed) => Some(confirmed.signed.started.id),
            AttemptState::Unresolved(parked) => Some(parked.id()),
            AttemptState::Resolved(finished) => Some(finished.confirmed.signed.started.id),
        }
    }

    fn wager_state(&self) -> WagerState {
        match self {
            AttemptState::None => WagerState::Connected,
            AttemptState::Simulating(_) => WagerState::Simulating,
            AttemptState::AwaitingSignature(_) => WagerState::AwaitingSignature,
            AttemptState::Submitted(_) => WagerState::Submitted,
            AttemptState::Confirming(_) => WagerState::Confirming,
            AttemptState::Resolving(_) => WagerState::Resolving,
            AttemptState::Unresolved(_) => WagerState::Unresolved,
            AttemptState::Resolved(finished) => WagerState::Resolved(finished.resolution.outcome),
        }
    }

    fn snapshot(&self) -> Option<WagerAttempt> {
        match self {
            AttemptState::None => None,
            AttemptState::Simulating(started) | AttemptState::AwaitingSignature(started) => {
                Some(started.snapshot())
            }
            AttemptState::Submitted(signed) | AttemptState::Confirming(signed) => {
                Some(signed.snapshot())
            }
            AttemptState::Resolving(confirmed) => Some(confirmed.snapshot()),
            AttemptState::Unresolved(Parked::Signed(signed)) => Some(signed.snapshot()),
            AttemptState::Unresolved(Parked::Confirmed(confirmed)) => Some(confirmed.snapshot()),
            AttemptState::Resolved(finished) => Some(finished.snapshot()),
        }
    }

    /// Blocks a new submission: anything running, or a submitted attempt that
    /// still has no outcome.
    fn blocks_new_attempt(&self) -> bool {
        self.wager_state().is_in_flight() || matches!(self, AttemptState::Unresolved(_))
    }

    /// What is left when the future driving this attempt goes away.
    fn abandoned(self) -> AttemptState {
        match self {
            AttemptState::Simulating(_) | AttemptState::AwaitingSignature(_) => AttemptState::None,
            AttemptState::Submitted(signed) | AttemptState::Confirming(signed) => {
                AttemptState::Unresolved(Parked::Signed(signed))
            }
            AttemptState::Resolving(confirmed) => {
                AttemptState::Unresolved(Parked::Confirmed(confirmed))
            }
            settled => settled,
        }
    }
}

struct Connected<S> {
    wallet: Arc<S>,
    account: Address,
    attempt: AttemptState,
}

enum SessionState<S> {
    Idle,
    Connecting,
    Connected(Connected<S>),
}

struct Inner<S> {
    session: SessionState<S>,
    house_balance: HouseBalance,
    last_error: Option<WagerError>,
    attempt_seq: u64,
}

impl<S> Inner<S> {
    fn project(&self) -> ViewState {
        let (state, account, attempt) = match &self.session {
            SessionState::Idle => (WagerState::Idle, None, None),
            SessionState::Connecting => (WagerState::Connecting, None, None),
            SessionState::Connected(connected) => (
                connected.attempt.wager_state(),
                Some(connected.account),
                connected.attempt.snapshot(),
            ),
        };
        ViewState {
            state,
            account,
            house_balance: self.house_balance,
            attempt,
            last_error: self.last_error.clone(),
        }
    }

    fn connected_mut(&mut self) -> Option<&mut Connected<S>> {
        match &mut self.session {
            SessionState::Connected(connected) => Some(connected),
            _ => None,
        }
    }
}

/// Drives wager attempts for one wallet session.
///
/// Operations take `&self`; share the controller behind an `Arc` to refresh the
/// balance or observe state while an attempt runs. State changes are published
/// on a watch channel, see [`WagerController::subscribe`].
pub struct WagerController<C, W: WalletProvider> {
    chain: Arc<C>,
    wallet: W,
    inner: Mutex<Inner<W::Session>>,
    view: watch::Sender<ViewState>,
}

/// Parks or releases the attempt if its driving future is dropped mid-step.
struct AttemptGuard<'a, C, W: WalletProvider> {
    controller: &'a WagerController<C, W>,
    id: u64,
}

impl<C, W: WalletProvider> Drop for AttemptGuard<'_, C, W> {
    fn drop(&mut self) {
        self.controller.abandon(self.id);
    }
}

/// Returns to `Idle` if a connect future is dropped while authorizing.
struct ConnectGuard<'a, C, W: WalletProvider> {
    controller: &'a WagerController<C, W>,
}

impl<C, W: WalletProvider> Drop for ConnectGuard<'_, C, W> {
    fn drop(&mut self) {
        self.controller.update(|inner| {
            if matches!(inner.session, SessionState::Connecting) {
                inner.session = SessionState::Idle;
            }
        });
    }
}

impl<C, W: WalletProvider> WagerController<C, W> {
    pub fn new(chain: Arc<C>, wallet: W) -> Self {
        let inner = Inner {
            session: SessionState::Idle,
            house_balance: HouseBalance::NotLoaded,
            last_error: None,
            attempt_seq: 0,
        };
        let (view, _) = watch::channel(inner.project());
        Self {
            chain,
            wallet,
            inner: Mutex::new(inner),
            view,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ViewState> {
        self.view.subscribe()
    }

    pub fn view(&self) -> ViewState {
        self.view.borrow().clone()
    }

    pub fn state(&self) -> WagerState {
        self.view.borrow().state
    }

    /// Back to `Idle`, forgetting account, balance and any settled or parked
    /// attempt. Refused while a step is running.
    pub fn disconnect(&self) -> Result<(), WagerError> {
        self.update(|inner| {
            match &inner.session {
                SessionState::Connecting => return Err(WagerError::AttemptInProgress),
                SessionState::Connected(connected)
                    if connected.attempt.wager_state().is_in_flight() =>
                {
                    return Err(WagerError::AttemptInProgress);
                }
                _ => {}
            }
            inner.session = SessionState::Idle;
            inner.house_balance = HouseBalance::NotLoaded;
            inner.last_error = None;
            Ok(())
        })?;
        info!("wallet disconnected");
        Ok(())
    }

    fn update<R>(&self, f: impl FnOnce(&mut Inner<W::Session>) -> R) -> R {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let result = f(&mut inner);
        self.view.send_replace(inner.project());
        result
    }

    /// Replaces the attempt state if attempt `id` is still the current one.
    fn set_attempt(&self, id: u64, next: AttemptState) {
        self.update(|inner| {
            if let Some(connected) = inner.connected_mut()
                && connected.attempt.id() == Some(id)
            {
                connected.attempt = next;
            }
        });
    }

    /// Failure before anything was broadcast: drop the attempt, stay connected.
    fn release(&self, id: u64, err: WagerError) -> WagerError {
        warn!(attempt = id, %err, "wager attempt failed before submission");
        self.update(|inner| {
            if let Some(connected) = inner.connected_mut()
                && connected.attempt.id() == Some(id)
            {
                connected.attempt = AttemptState::None;
            }
            inner.last_error = Some(err.clone());
        });
        err
    }

    /// Failure after broadcast: keep what is known so resolution can be retried.
    fn park(&self, id: u64, parked: Parked, err: WagerError) -> WagerError {
        warn!(attempt = id, %err, "wager attempt parked as unresolved");
        self.update(|inner| {
            if let Some(connected) = inner.connected_mut()
                && connected.attempt.id() == Some(id)
            {
                connected.attempt = AttemptState::Unresolved(parked);
                inner.last_error = Some(err.clone());
            }
        });
        err
    }

    fn abandon(&self, id: u64) {
        self.update(|inner| {
            if let Some(connected) = inner.connected_mut()
                && connected.attempt.id() == Some(id)
                && connected.attempt.wager_state().is_in_flight()
            {
                debug!(attempt = id, "attempt future dropped mid-step");
                connected.attempt = mem::take(&mut connected.attempt).abandoned();
            }
        });
    }
}

impl<C, W> WagerController<C, W>
where
    C: ChainClient + Send + Sync,
    W: WalletProvider + Send + Sync,
    W::Session: Send + Sync,
{
    /// Requests wallet authorization. Already connected sessions return their
    /// account without prompting again.
    pub async fn connect(&self) -> Result<Address, WagerError> {
        let existing = self.update(|inner| {
            match &inner.session {
                SessionState::Connecting => return Err(WagerError::AttemptInProgress),
                SessionState::Connected(connected) => return Ok(Some(connected.account)),
                SessionState::Idle => {}
            }
            inner.session = SessionState::Connecting;
            inner.last_error = None;
            Ok(None)
        })?;
        if let Some(account) = existing {
            return Ok(account);
        }

        let _guard = ConnectGuard { controller: self };
        info!("requesting wallet authorization");
        let result = self.wallet.connect().await;
        let account = match result {
            Ok(session) => {
                let account = session.account();
                self.update(|inner| {
                    inner.session = SessionState::Connected(Connected {
                        wallet: Arc::new(session),
                        account,
                        attempt: AttemptState::None,
                    });
                    inner.house_balance = HouseBalance::NotLoaded;
                });
                account
            }
            Err(err) => {
                warn!(%err, "wallet connection failed");
                self.update(|inner| {
                    inner.session = SessionState::Idle;
                    inner.last_error = Some(err.clone());
                });
                return Err(err);
            }
        };
        info!(%account, "wallet connected");

        if let Err(err) = self.refresh_house_balance().await {
            warn!(%err, "house balance unavailable after connect");
        }
        Ok(account)
    }

    /// Reads the house balance. A failed read marks the balance `Unknown`
    /// rather than zero.
    pub async fn refresh_house_balance(&self) -> Result<U256, WagerError> {
        let result = self.chain.house_balance().await;
        self.update(|inner| {
            if !matches!(inner.session, SessionState::Connected(_)) {
                return;
            }
            inner.house_balance = match &result {
                Ok(balance) => HouseBalance::Known(*balance),
                Err(_) => HouseBalance::Unknown,
            };
        });
        result
    }

    /// Runs one wager end to end from raw values.
    pub async fn submit_wager(
        &self,
        prediction: i64,
        stake_wei: I256,
    ) -> Result<WagerAttempt, WagerError> {
        self.run_attempt(move || WagerRequest::new(prediction, stake_wei))
            .await
    }

    /// Same as [`Self::submit_wager`] for the two form fields, stake in ETH.
    pub async fn submit_form(
        &self,
        prediction: &str,
        stake_eth: &str,
    ) -> Result<WagerAttempt, WagerError> {
        self.run_attempt(move || WagerRequest::from_form(prediction, stake_eth))
            .await
    }

    /// Completes a parked attempt by waiting for its receipt again (if it had
    /// none) and re-querying its events. Never resubmits.
    pub async fn retry_resolution(&self) -> Result<WagerAttempt, WagerError> {
        let parked = self.update(|inner| {
            let Some(connected) = inner.connected_mut() else {
                return Err(WagerError::NotConnected);
            };
            let parked = match &connected.attempt {
                AttemptState::Unresolved(parked) => parked.clone(),
                running if running.wager_state().is_in_flight() => {
                    return Err(WagerError::AttemptInProgress);
                }
                _ => return Err(WagerError::NothingToResolve),
            };
            connected.attempt = match parked.clone() {
                Parked::Signed(signed) => AttemptState::Confirming(signed),
                Parked::Confirmed(confirmed) => AttemptState::Resolving(confirmed),
            };
            inner.last_error = None;
            Ok(parked)
        })?;

        let id = parked.id();
        let _guard = AttemptGuard {
            controller: self,
            id,
        };
        info!(attempt = id, "retrying wager resolution");
        match parked {
            Parked::Signed(signed) => self.confirm_and_resolve(signed).await,
            Parked::Confirmed(confirmed) => self.resolve(confirmed).await,
        }
    }

    async fn run_attempt(
        &self,
        validate: impl FnOnce() -> Result<WagerRequest, WagerError>,
    ) -> Result<WagerAttempt, WagerError> {
        let (started, wallet, account) = self.update(|inner| {
            if !matches!(inner.session, SessionState::Connected(_)) {
                inner.last_error = Some(WagerError::NotConnected);
                return Err(WagerError::NotConnected);
            }
            let Some(connected) = inner.connected_mut() else {
                return Err(WagerError::NotConnected);
            };
            if connected.attempt.blocks_new_attempt() {
                return Err(WagerError::AttemptInProgress);
            }
            let request = match validate() {
                Ok(request) => request,
                Err(err) => {
                    connected.attempt = AttemptState::None;
                    inner.last_error = Some(err.clone());
                    return Err(err);
                }
            };
            inner.attempt_seq += 1;
            let started = Started {
                id: inner.attempt_seq,
                request,
                started_at: Utc::now(),
            };
            let Some(connected) = inner.connected_mut() else {
                return Err(WagerError::NotConnected);
            };
            connected.attempt = AttemptState::Simulating(started.clone());
            let wallet = connected.wallet.clone();
            let account = connected.account;
            inner.last_error = None;
            Ok((started, wallet, account))
        })?;

        let id = started.id;
        let _guard = AttemptGuard {
            controller: self,
            id,
        };
        info!(
            attempt = id,
            prediction = started.request.prediction(),
            stake_wei = %started.request.stake_wei(),
            "simulating wager"
        );
        let plan = match self.chain.simulate(account, started.request).await {
            Ok(plan) => plan,
            Err(err) => return Err(self.release(id, err)),
        };

        self.set_attempt(id, AttemptState::AwaitingSignature(started.clone()));
        info!(attempt = id, "awaiting wallet signature");
        let tx_hash = match wallet.submit(&plan).await {
            Ok(tx_hash) => tx_hash,
            Err(err) => return Err(self.release(id, err)),
        };

        let signed = Signed { started, tx_hash };
        self.set_attempt(id, AttemptState::Submitted(signed.clone()));
        info!(attempt = id, %tx_hash, "wager submitted");
        self.confirm_and_resolve(signed).await
    }

    async fn confirm_and_resolve(&self, signed: Signed) -> Result<WagerAttempt, WagerError> {
        let id = signed.started.id;
        let tx_hash = signed.tx_hash;
        self.set_attempt(id, AttemptState::Confirming(signed.clone()));
        let receipt = match self.chain.wait_for_receipt(tx_hash).await {
            Ok(receipt) => receipt,
            Err(err) => return Err(self.park(id, Parked::Signed(signed), err)),
        };
        if !receipt.success {
            warn!(attempt = id, %tx_hash, "wager transaction reverted on-chain");
        }
        info!(attempt = id, block = receipt.block_number, "wager confirmed");
        self.resolve(Confirmed { signed, receipt }).await
    }

    async fn resolve(&self, confirmed: Confirmed) -> Result<WagerAttempt, WagerError> {
        let id = confirmed.signed.started.id;
        self.set_attempt(id, AttemptState::Resolving(confirmed.clone()));
        let blocks = BlockRange::single(confirmed.receipt.block_number);
        let mut events = BlockEvents::default();
        for kind in EventKind::RESOLUTION_ORDER {
            match self.chain.query_events(kind, blocks).await {
                Ok(found) => {
                    debug!(attempt = id, %kind, count = found.len(), "events queried");
                    events.record(kind, found);
                }
                Err(err) => return Err(self.park(id, Parked::Confirmed(confirmed), err)),
            }
        }

        let finished = Finished {
            confirmed,
            resolution: events.resolve(),
        };
        let attempt = finished.snapshot();
        self.set_attempt(id, AttemptState::Resolved(finished));
        info!(attempt = id, outcome = %attempt.outcome, "wager resolved");
        Ok(attempt)
    }
}
