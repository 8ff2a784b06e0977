use crate::{
    error::WagerError,
    lucky_digit_types::LuckyDigit,
};
use alloy::{
    primitives::{
        Address,
        B256,
        I256,
        TxHash,
        U256,
        utils::parse_ether,
    },
    rpc::types::TransactionRequest,
    sol_types::SolEvent,
};
use chrono::{
    DateTime,
    Utc,
};
use serde::Serialize;
use std::fmt;

pub const MAX_PREDICTION: u8 = 9;

/// A validated wager: prediction in `0..=9` and a strictly positive stake.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct WagerRequest {
    prediction: u8,
    stake_wei: U256,
}

impl WagerRequest {
    /// Validates raw user input. Signed types so that out of range values can be
    /// rejected here rather than silently wrapped by a conversion.
    pub fn new(prediction: i64, stake_wei: I256) -> Result<Self, WagerError> {
        let prediction = u8::try_from(prediction)
            .ok()
            .filter(|p| *p <= MAX_PREDICTION)
            .ok_or_else(|| {
                WagerError::invalid_input(format!(
                    "prediction {prediction} is outside 0..={MAX_PREDICTION}"
                ))
            })?;
        if !stake_wei.is_positive() {
            return Err(WagerError::invalid_input(format!(
                "stake {stake_wei} wei is not positive"
            )));
        }
        Ok(Self {
            prediction,
            stake_wei: stake_wei.into_raw(),
        })
    }

    /// Parses the two form fields: a whole number prediction and a stake in ETH.
    pub fn from_form(prediction: &str, stake_eth: &str) -> Result<Self, WagerError> {
        let prediction_raw = prediction.trim();
        let prediction = prediction_raw.parse::<i64>().map_err(|_| {
            WagerError::invalid_input(format!(
                "prediction '{prediction_raw}' is not a whole number"
            ))
        })?;

        let stake_raw = stake_eth.trim();
        if stake_raw.starts_with('-') {
            return Err(WagerError::invalid_input(format!(
                "stake '{stake_raw}' is negative"
            )));
        }
        let stake_wei = parse_ether(stake_raw).map_err(|e| {
            WagerError::invalid_input(format!("stake '{stake_raw}' is not an ETH amount: {e}"))
        })?;
        let stake_wei = I256::try_from(stake_wei).map_err(|_| {
            WagerError::invalid_input(format!("stake '{stake_raw}' is too large"))
        })?;

        Self::new(prediction, stake_wei)
    }

    pub fn prediction(&self) -> u8 {
        self.prediction
    }

    pub fn stake_wei(&self) -> U256 {
        self.stake_wei
    }
}

/// The simulated `play` call, ready for signing.
///
/// Only a chain client produces plans; the wallet signs the embedded request as is.
#[derive(Clone, Debug)]
pub struct CallPlan {
    account: Address,
    request: WagerRequest,
    tx: TransactionRequest,
}

impl CallPlan {
    pub fn new(account: Address, request: WagerRequest, tx: TransactionRequest) -> Self {
        Self {
            account,
            request,
            tx,
        }
    }

    pub fn account(&self) -> Address {
        self.account
    }

    pub fn request(&self) -> &WagerRequest {
        &self.request
    }

    pub fn transaction(&self) -> &TransactionRequest {
        &self.tx
    }

    pub fn gas_limit(&self) -> Option<u64> {
        self.tx.gas
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Receipt {
    pub tx_hash: TxHash,
    pub block_number: u64,
    pub success: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct BlockRange {
    pub from: u64,
    pub to: u64,
}

impl BlockRange {
    pub fn single(block: u64) -> Self {
        Self {
            from: block,
            to: block,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
pub enum EventKind {
    GamePlayed,
    GameWon,
    GameLost,
}

impl EventKind {
    /// Query order used when resolving an attempt.
    pub const RESOLUTION_ORDER: [EventKind; 3] =
        [EventKind::GamePlayed, EventKind::GameWon, EventKind::GameLost];

    pub fn name(self) -> &'static str {
        match self {
            EventKind::GamePlayed => "GamePlayed",
            EventKind::GameWon => "GameWon",
            EventKind::GameLost => "GameLost",
        }
    }

    pub fn signature_hash(self) -> B256 {
        match self {
            EventKind::GamePlayed => LuckyDigit::GamePlayed::SIGNATURE_HASH,
            EventKind::GameWon => LuckyDigit::GameWon::SIGNATURE_HASH,
            EventKind::GameLost => LuckyDigit::GameLost::SIGNATURE_HASH,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct GamePlayedRecord {
    pub player: Address,
    pub amount: U256,
    pub prediction: U256,
    pub house_number: U256,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub enum GameEventData {
    Played(GamePlayedRecord),
    Won,
    Lost,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct GameEvent {
    pub block_number: u64,
    pub log_index: u64,
    pub data: GameEventData,
}

impl GameEvent {
    pub fn kind(&self) -> EventKind {
        match self.data {
            GameEventData::Played(_) => EventKind::GamePlayed,
            GameEventData::Won => EventKind::GameWon,
            GameEventData::Lost => EventKind::GameLost,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub enum Outcome {
    #[default]
    Pending,
    Won,
    Lost,
    Unknown,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Outcome::Pending => "pending",
            Outcome::Won => "won",
            Outcome::Lost => "lost",
            Outcome::Unknown => "unknown",
        };
        f.write_str(text)
    }
}

/// Snapshot of one wager attempt as seen by observers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct WagerAttempt {
    pub request: WagerRequest,
    pub tx_hash: Option<TxHash>,
    pub block_number: Option<u64>,
    pub receipt_success: Option<bool>,
    pub outcome: Outcome,
    pub summary: Option<String>,
    pub started_at: DateTime<Utc>,
}

impl WagerAttempt {
    pub fn new(request: WagerRequest, started_at: DateTime<Utc>) -> Self {
        Self {
            request,
            tx_hash: None,
            block_number: None,
            receipt_success: None,
            outcome: Outcome::Pending,
            summary: None,
            started_at,
        }
    }
}
