//! Scripted stand-ins for the chain and the wallet, used by the controller
//! tests.

use crate::{
    CONTRACT_ADDRESS,
    chain::ChainClient,
    controller::WagerController,
    error::WagerError,
    wager::{
        BlockRange,
        CallPlan,
        EventKind,
        GameEvent,
        GameEventData,
        GamePlayedRecord,
        Receipt,
        WagerRequest,
    },
    wallets::{
        WalletProvider,
        WalletSession,
    },
};
use alloy::{
    network::TransactionBuilder,
    primitives::{
        Address,
        TxHash,
        U256,
        address,
    },
    rpc::types::TransactionRequest,
};
use std::{
    collections::{
        HashMap,
        VecDeque,
    },
    sync::{
        Arc,
        Mutex,
        MutexGuard,
        PoisonError,
    },
};
use tokio::sync::Notify;

pub const DEFAULT_RECEIPT_BLOCK: u64 = 1_000;
pub const PLAYER: Address = address!("00000000000000000000000000000000000a11ce");
pub const OTHER_PLAYER: Address = address!("0000000000000000000000000000000000000b0b");

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ChainCall {
    HouseBalance,
    Simulate {
        account: Address,
        request: WagerRequest,
    },
    WaitForReceipt(TxHash),
    QueryEvents(EventKind, BlockRange),
}

struct FakeChainState {
    house_balance: Result<U256, WagerError>,
    simulate_failures: VecDeque<WagerError>,
    simulate_gate: Option<Arc<Notify>>,
    receipt_gate: Option<Arc<Notify>>,
    receipt_block: u64,
    receipt_success: bool,
    receipt_failures: VecDeque<WagerError>,
    events: HashMap<(EventKind, u64), Vec<GameEvent>>,
    query_failures: HashMap<EventKind, VecDeque<WagerError>>,
    plans_issued: u64,
    calls: Vec<ChainCall>,
}

impl Default for FakeChainState {
    fn default() -> Self {
        Self {
            house_balance: Ok(U256::ZERO),
            simulate_failures: VecDeque::new(),
            simulate_gate: None,
            receipt_gate: None,
            receipt_block: DEFAULT_RECEIPT_BLOCK,
            receipt_success: true,
            receipt_failures: VecDeque::new(),
            events: HashMap::new(),
            query_failures: HashMap::new(),
            plans_issued: 0,
            calls: Vec::new(),
        }
    }
}

/// In-memory [`ChainClient`] with scripted answers. Cloning shares the script.
#[derive(Clone, Default)]
pub struct FakeChain {
    state: Arc<Mutex<FakeChainState>>,
}

impl FakeChain {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, FakeChainState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn set_house_balance(&self, wei: U256) {
        self.lock().house_balance = Ok(wei);
    }

    pub fn fail_house_balance(&self, err: WagerError) {
        self.lock().house_balance = Err(err);
    }

    pub fn fail_next_simulation(&self, err: WagerError) {
        self.lock().simulate_failures.push_back(err);
    }

    /// Holds every following simulation until the returned handle is notified.
    pub fn gate_simulation(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.lock().simulate_gate = Some(gate.clone());
        gate
    }

    /// Holds every following receipt wait until the returned handle is notified.
    pub fn gate_receipt(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.lock().receipt_gate = Some(gate.clone());
        gate
    }

    pub fn set_receipt_block(&self, block: u64) {
        self.lock().receipt_block = block;
    }

    pub fn set_receipt_success(&self, success: bool) {
        self.lock().receipt_success = success;
    }

    pub fn fail_next_receipt(&self, err: WagerError) {
        self.lock().receipt_failures.push_back(err);
    }

    pub fn fail_next_query(&self, kind: EventKind, err: WagerError) {
        self.lock()
            .query_failures
            .entry(kind)
            .or_default()
            .push_back(err);
    }

    pub fn emit(&self, block: u64, data: GameEventData) {
        let mut state = self.lock();
        let mut event = GameEvent {
            block_number: block,
            log_index: 0,
            data,
        };
        let events = state.events.entry((event.kind(), block)).or_default();
        event.log_index = events.len() as u64;
        events.push(event);
    }

    pub fn emit_played(&self, block: u64, player: Address, prediction: u64, house_number: u64) {
        self.emit(
            block,
            GameEventData::Played(GamePlayedRecord {
                player,
                amount: U256::from(10_000_000_000_000_000u64),
                prediction: U256::from(prediction),
                house_number: U256::from(house_number),
            }),
        );
    }

    pub fn calls(&self) -> Vec<ChainCall> {
        self.lock().calls.clone()
    }

    pub fn simulation_count(&self) -> usize {
        self.lock()
            .calls
            .iter()
            .filter(|call| matches!(call, ChainCall::Simulate { .. }))
            .count()
    }

    pub fn queried_kinds(&self) -> Vec<EventKind> {
        self.lock()
            .calls
            .iter()
            .filter_map(|call| match call {
                ChainCall::QueryEvents(kind, _) => Some(*kind),
                _ => None,
            })
            .collect()
    }
}

impl ChainClient for FakeChain {
    async fn house_balance(&self) -> Result<U256, WagerError> {
        let mut state = self.lock();
        state.calls.push(ChainCall::HouseBalance);
        state.house_balance.clone()
    }

    async fn simulate(
        &self,
        account: Address,
        request: WagerRequest,
    ) -> Result<CallPlan, WagerError> {
        let gate = {
            let mut state = self.lock();
            state.calls.push(ChainCall::Simulate { account, request });
            state.simulate_gate.clone()
        };
        if let Some(gate) = gate {
            gate.notified().await;
        }
        let mut state = self.lock();
        if let Some(err) = state.simulate_failures.pop_front() {
            return Err(err);
        }
        state.plans_issued += 1;
        let tx = TransactionRequest::default()
            .with_from(account)
            .with_to(CONTRACT_ADDRESS)
            .with_value(request.stake_wei())
            .with_gas_limit(50_000 + state.plans_issued);
        Ok(CallPlan::new(account, request, tx))
    }

    async fn wait_for_receipt(&self, tx_hash: TxHash) -> Result<Receipt, WagerError> {
        let gate = {
            let mut state = self.lock();
            state.calls.push(ChainCall::WaitForReceipt(tx_hash));
            state.receipt_gate.clone()
        };
        if let Some(gate) = gate {
            gate.notified().await;
        }
        let mut state = self.lock();
        if let Some(err) = state.receipt_failures.pop_front() {
            return Err(err);
        }
        Ok(Receipt {
            tx_hash,
            block_number: state.receipt_block,
            success: state.receipt_success,
        })
    }

    async fn query_events(
        &self,
        kind: EventKind,
        blocks: BlockRange,
    ) -> Result<Vec<GameEvent>, WagerError> {
        let mut state = self.lock();
        state.calls.push(ChainCall::QueryEvents(kind, blocks));
        if let Some(err) = state
            .query_failures
            .get_mut(&kind)
            .and_then(VecDeque::pop_front)
        {
            return Err(err);
        }
        let events = (blocks.from..=blocks.to)
            .flat_map(|block| {
                state
                    .events
                    .get(&(kind, block))
                    .cloned()
                    .unwrap_or_default()
            })
            .collect();
        Ok(events)
    }
}

struct FakeWalletState {
    account: Address,
    available: bool,
    connect_failures: VecDeque<WagerError>,
    connect_calls: usize,
    submit_failures: VecDeque<WagerError>,
    submitted: Vec<CallPlan>,
    signature_requests: usize,
}

/// Scripted [`WalletProvider`]; sessions it hands out share its script.
#[derive(Clone)]
pub struct FakeWallet {
    state: Arc<Mutex<FakeWalletState>>,
}

impl FakeWallet {
    pub fn new(account: Address) -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeWalletState {
                account,
                available: true,
                connect_failures: VecDeque::new(),
                connect_calls: 0,
                submit_failures: VecDeque::new(),
                submitted: Vec::new(),
                signature_requests: 0,
            })),
        }
    }

    /// No provider present in the environment.
    pub fn unavailable() -> Self {
        let wallet = Self::new(Address::ZERO);
        wallet.lock().available = false;
        wallet
    }

    fn lock(&self) -> MutexGuard<'_, FakeWalletState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn fail_next_connect(&self, err: WagerError) {
        self.lock().connect_failures.push_back(err);
    }

    pub fn reject_next_signature(&self) {
        self.lock()
            .submit_failures
            .push_back(WagerError::UserRejected("signature declined".into()));
    }

    pub fn fail_next_submit(&self, err: WagerError) {
        self.lock().submit_failures.push_back(err);
    }

    pub fn connect_calls(&self) -> usize {
        self.lock().connect_calls
    }

    pub fn signature_requests(&self) -> usize {
        self.lock().signature_requests
    }

    pub fn submitted_plans(&self) -> Vec<CallPlan> {
        self.lock().submitted.clone()
    }
}

impl WalletProvider for FakeWallet {
    type Session = FakeSession;

    async fn connect(&self) -> Result<FakeSession, WagerError> {
        let mut state = self.lock();
        state.connect_calls += 1;
        if !state.available {
            return Err(WagerError::ProviderUnavailable(
                "no wallet provider installed".into(),
            ));
        }
        if let Some(err) = state.connect_failures.pop_front() {
            return Err(err);
        }
        Ok(FakeSession {
            account: state.account,
            state: self.state.clone(),
        })
    }
}

pub struct FakeSession {
    account: Address,
    state: Arc<Mutex<FakeWalletState>>,
}

impl WalletSession for FakeSession {
    fn account(&self) -> Address {
        self.account
    }

    async fn submit(&self, plan: &CallPlan) -> Result<TxHash, WagerError> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.signature_requests += 1;
        if let Some(err) = state.submit_failures.pop_front() {
            return Err(err);
        }
        state.submitted.push(plan.clone());
        let seq = state.submitted.len() as u8;
        Ok(TxHash::with_last_byte(seq))
    }
}

/// A controller wired to fresh fakes, with handles to script them.
pub struct TestContext {
    pub chain: FakeChain,
    pub wallet: FakeWallet,
    pub controller: Arc<WagerController<FakeChain, FakeWallet>>,
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}

impl TestContext {
    pub fn new() -> Self {
        Self::with_wallet(FakeWallet::new(PLAYER))
    }

    pub fn with_wallet(wallet: FakeWallet) -> Self {
        let chain = FakeChain::new();
        let controller = Arc::new(WagerController::new(
            Arc::new(chain.clone()),
            wallet.clone(),
        ));
        Self {
            chain,
            wallet,
            controller,
        }
    }

    /// A context whose wallet is already authorized.
    pub async fn connected() -> Result<Self, WagerError> {
        let ctx = Self::new();
        ctx.controller.connect().await?;
        Ok(ctx)
    }

    /// Scripts the events a `play` by [`PLAYER`] emits in the receipt block.
    pub fn script_game(&self, prediction: u64, house_number: u64) {
        self.chain
            .emit_played(DEFAULT_RECEIPT_BLOCK, PLAYER, prediction, house_number);
        let result = if prediction == house_number {
            GameEventData::Won
        } else {
            GameEventData::Lost
        };
        self.chain.emit(DEFAULT_RECEIPT_BLOCK, result);
    }
}
