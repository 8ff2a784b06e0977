use crate::{
    CONTRACT_ADDRESS,
    error::WagerError,
    lucky_digit_types::LuckyDigit,
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
};
use alloy::{
    network::{
        ReceiptResponse,
        TransactionBuilder,
    },
    primitives::{
        Address,
        TxHash,
        U256,
    },
    providers::{
        DynProvider,
        Provider,
        ProviderBuilder,
    },
    rpc::types::{
        Filter,
        Log,
    },
    transports::TransportError,
};
use std::time::Duration;
use tokio::time::{
    self,
    Instant,
};
use tracing::{
    debug,
    info,
    warn,
};
use url::Url;

pub const DEFAULT_CONFIRMATIONS: u64 = 1;
pub const DEFAULT_RECEIPT_TIMEOUT: Duration = Duration::from_secs(180);
const INITIAL_RECEIPT_BACKOFF: Duration = Duration::from_millis(500);
const MAX_RECEIPT_BACKOFF: Duration = Duration::from_secs(8);

/// Read, simulate and query access to the game contract. Never signs.
pub trait ChainClient {
    fn house_balance(&self) -> impl Future<Output = Result<U256, WagerError>> + Send;

    /// Dry-runs `play` for `account` and returns the plan the wallet must sign.
    fn simulate(
        &self,
        account: Address,
        request: WagerRequest,
    ) -> impl Future<Output = Result<CallPlan, WagerError>> + Send;

    fn wait_for_receipt(
        &self,
        tx_hash: TxHash,
    ) -> impl Future<Output = Result<Receipt, WagerError>> + Send;

    /// Decoded contract events of one kind, ordered by log index.
    fn query_events(
        &self,
        kind: EventKind,
        blocks: BlockRange,
    ) -> impl Future<Output = Result<Vec<GameEvent>, WagerError>> + Send;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ConfirmationPolicy {
    pub confirmations: u64,
    pub timeout: Duration,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for ConfirmationPolicy {
    fn default() -> Self {
        Self {
            confirmations: DEFAULT_CONFIRMATIONS,
            timeout: DEFAULT_RECEIPT_TIMEOUT,
            initial_backoff: INITIAL_RECEIPT_BACKOFF,
            max_backoff: MAX_RECEIPT_BACKOFF,
        }
    }
}

impl ConfirmationPolicy {
    pub fn backoff(&self) -> Backoff {
        Backoff {
            next: self.initial_backoff,
            max: self.max_backoff,
        }
    }
}

/// Doubling delay, capped.
#[derive(Clone, Debug)]
pub struct Backoff {
    next: Duration,
    max: Duration,
}

impl Iterator for Backoff {
    type Item = Duration;

    fn next(&mut self) -> Option<Duration> {
        let current = self.next.min(self.max);
        self.next = current.saturating_mul(2).min(self.max);
        Some(current)
    }
}

/// A receipt mined at `receipt_block` is final enough once the head is
/// `confirmations - 1` blocks past it.
pub fn has_confirmations(head: u64, receipt_block: u64, confirmations: u64) -> bool {
    if confirmations == 0 {
        return true;
    }
    head >= receipt_block && head - receipt_block + 1 >= confirmations
}

#[derive(Clone, Debug)]
pub struct AlloyChainClient {
    provider: DynProvider,
    contract: Address,
    policy: ConfirmationPolicy,
}

impl AlloyChainClient {
    pub fn new(provider: DynProvider, policy: ConfirmationPolicy) -> Self {
        Self {
            provider,
            contract: CONTRACT_ADDRESS,
            policy,
        }
    }

    pub fn connect_http(url: Url, policy: ConfirmationPolicy) -> Self {
        info!(%url, "opening read-only chain connection");
        let provider = ProviderBuilder::new().connect_http(url).erased();
        Self::new(provider, policy)
    }

    pub async fn chain_id(&self) -> Result<u64, WagerError> {
        self.provider
            .get_chain_id()
            .await
            .map_err(|e| WagerError::ReadError(format!("chain id: {e}")))
    }

    async fn confirmed_receipt(
        &self,
        tx_hash: TxHash,
    ) -> Result<Option<Receipt>, TransportError> {
        let Some(receipt) = self.provider.get_transaction_receipt(tx_hash).await? else {
            return Ok(None);
        };
        let Some(block_number) = receipt.block_number() else {
            return Ok(None);
        };
        let head = self.provider.get_block_number().await?;
        if !has_confirmations(head, block_number, self.policy.confirmations) {
            debug!(
                %tx_hash,
                block_number,
                head,
                "receipt seen, waiting for {} confirmations",
                self.policy.confirmations
            );
            return Ok(None);
        }
        Ok(Some(Receipt {
            tx_hash,
            block_number,
            success: receipt.status(),
        }))
    }
}

impl ChainClient for AlloyChainClient {
    async fn house_balance(&self) -> Result<U256, WagerError> {
        let contract = LuckyDigit::new(self.contract, self.provider.clone());
        let balance = contract
            .houseBalance()
            .call()
            .await
            .map_err(|e| WagerError::ReadError(e.to_string()))?;
        debug!(%balance, "house balance read");
        Ok(balance)
    }

    async fn simulate(
        &self,
        account: Address,
        request: WagerRequest,
    ) -> Result<CallPlan, WagerError> {
        let contract = LuckyDigit::new(self.contract, self.provider.clone());
        let call = contract
            .play(U256::from(request.prediction()))
            .from(account)
            .value(request.stake_wei());
        call.call()
            .await
            .map_err(|e| WagerError::SimulationError(e.to_string()))?;
        let gas = call
            .estimate_gas()
            .await
            .map_err(|e| WagerError::SimulationError(format!("gas estimation: {e}")))?;
        debug!(%account, gas, "play simulation succeeded");
        let tx = call.into_transaction_request().with_gas_limit(gas);
        Ok(CallPlan::new(account, request, tx))
    }

    async fn wait_for_receipt(&self, tx_hash: TxHash) -> Result<Receipt, WagerError> {
        let deadline = Instant::now() + self.policy.timeout;
        let mut backoff = self.policy.backoff();
        loop {
            match self.confirmed_receipt(tx_hash).await {
                Ok(Some(receipt)) => return Ok(receipt),
                Ok(None) => {}
                Err(err) => warn!(%tx_hash, %err, "receipt poll failed"),
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(WagerError::ConfirmationTimeout(format!(
                    "{tx_hash} not confirmed within {:?}",
                    self.policy.timeout
                )));
            }
            let delay = backoff.next().unwrap_or(self.policy.max_backoff);
            time::sleep(delay.min(deadline - now)).await;
        }
    }

    async fn query_events(
        &self,
        kind: EventKind,
        blocks: BlockRange,
    ) -> Result<Vec<GameEvent>, WagerError> {
        let filter = Filter::new()
            .address(self.contract)
            .event_signature(kind.signature_hash())
            .from_block(blocks.from)
            .to_block(blocks.to);
        let logs = self
            .provider
            .get_logs(&filter)
            .await
            .map_err(|e| WagerError::QueryError(format!("{kind}: {e}")))?;
        debug!(%kind, from = blocks.from, to = blocks.to, count = logs.len(), "event logs fetched");
        decode_logs(kind, logs)
    }
}

/// Drops removed logs and logs of another event, then decodes the rest in log
/// index order.
pub fn decode_logs(kind: EventKind, mut logs: Vec<Log>) -> Result<Vec<GameEvent>, WagerError> {
    let signature = kind.signature_hash();
    logs.retain(|log| !log.removed && log.topic0() == Some(&signature));
    logs.sort_by_key(|log| (log.block_number, log.log_index));
    logs.into_iter()
        .map(|log| {
            let block_number = log.block_number.unwrap_or_default();
            let log_index = log.log_index.unwrap_or_default();
            let data = match kind {
                EventKind::GamePlayed => {
                    let decoded = log
                        .log_decode::<LuckyDigit::GamePlayed>()
                        .map_err(|e| WagerError::QueryError(format!("{kind}: {e}")))?;
                    let event = decoded.inner.data;
                    GameEventData::Played(GamePlayedRecord {
                        player: event.player,
                        amount: event.amount,
                        prediction: event.prediction,
                        house_number: event.houseNumber,
                    })
                }
                EventKind::GameWon => GameEventData::Won,
                EventKind::GameLost => GameEventData::Lost,
            };
            Ok(GameEvent {
                block_number,
                log_index,
                data,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]
    use super::*;
    use alloy::{
        primitives::{
            B256,
            Bytes,
            LogData,
        },
        providers::mock::Asserter,
        sol_types::SolEvent,
    };
    use serde_json::{
        Value,
        json,
    };

    fn mocked_client(asserter: &Asserter, policy: ConfirmationPolicy) -> AlloyChainClient {
        let provider = ProviderBuilder::new()
            .connect_mocked_client(asserter.clone())
            .erased();
        AlloyChainClient::new(provider, policy)
    }

    fn receipt_json(tx_hash: TxHash, block: u64) -> Value {
        json!({
            "type": "0x2",
            "status": "0x1",
            "cumulativeGasUsed": "0x5208",
            "logs": [],
            "logsBloom": format!("0x{}", "00".repeat(256)),
            "transactionHash": tx_hash,
            "transactionIndex": "0x0",
            "blockHash": B256::repeat_byte(0x22),
            "blockNumber": format!("{block:#x}"),
            "gasUsed": "0x5208",
            "effectiveGasPrice": "0x3b9aca00",
            "from": Address::repeat_byte(0x11),
            "to": CONTRACT_ADDRESS,
            "contractAddress": null,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_receipt__gives_up_after_the_timeout() {
        // given
        let asserter = Asserter::new();
        for _ in 0..200 {
            asserter.push_success(&Value::Null);
        }
        let client = mocked_client(
            &asserter,
            ConfirmationPolicy {
                timeout: Duration::from_secs(20),
                ..ConfirmationPolicy::default()
            },
        );

        // when
        let result = client.wait_for_receipt(TxHash::repeat_byte(0xab)).await;

        // then
        assert!(matches!(result, Err(WagerError::ConfirmationTimeout(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_receipt__polls_until_enough_confirmations() {
        // given
        let tx_hash = TxHash::repeat_byte(0xcd);
        let asserter = Asserter::new();
        asserter.push_success(&Value::Null);
        asserter.push_success(&receipt_json(tx_hash, 100));
        asserter.push_success(&"0x64");
        asserter.push_success(&receipt_json(tx_hash, 100));
        asserter.push_success(&"0x66");
        let client = mocked_client(
            &asserter,
            ConfirmationPolicy {
                confirmations: 3,
                ..ConfirmationPolicy::default()
            },
        );

        // when
        let receipt = client.wait_for_receipt(tx_hash).await.unwrap();

        // then
        assert_eq!(
            receipt,
            Receipt {
                tx_hash,
                block_number: 100,
                success: true,
            }
        );
    }

    #[tokio::test]
    async fn simulate__reverted_call_is_a_simulation_error() {
        // given
        let asserter = Asserter::new();
        asserter.push_failure_msg("execution reverted: house cannot cover");
        let client = mocked_client(&asserter, ConfirmationPolicy::default());
        let request = WagerRequest::new(5, alloy::primitives::I256::try_from(1_000i64).unwrap())
            .unwrap();

        // when
        let result = client.simulate(Address::repeat_byte(0x11), request).await;

        // then
        assert!(matches!(result, Err(WagerError::SimulationError(_))));
    }

    #[tokio::test]
    async fn query_events__rpc_failure_is_a_query_error() {
        // given
        let asserter = Asserter::new();
        asserter.push_failure_msg("query returned more than 10000 results");
        let client = mocked_client(&asserter, ConfirmationPolicy::default());

        // when
        let result = client
            .query_events(EventKind::GameWon, BlockRange::single(100))
            .await;

        // then
        assert!(matches!(result, Err(WagerError::QueryError(_))));
    }

    fn rpc_log(data: LogData, block: u64, index: u64) -> Log {
        Log {
            inner: alloy::primitives::Log {
                address: CONTRACT_ADDRESS,
                data,
            },
            block_number: Some(block),
            log_index: Some(index),
            ..Default::default()
        }
    }

    fn played_log(house_number: u64, block: u64, index: u64) -> Log {
        let event = LuckyDigit::GamePlayed {
            player: Address::repeat_byte(0x11),
            amount: U256::from(10_000u64),
            prediction: U256::from(5u64),
            houseNumber: U256::from(house_number),
        };
        rpc_log(event.encode_log_data(), block, index)
    }

    fn marker_log(kind: EventKind, block: u64, index: u64) -> Log {
        let data = LogData::new_unchecked(vec![kind.signature_hash()], Bytes::new());
        rpc_log(data, block, index)
    }

    #[test]
    fn backoff__doubles_until_capped() {
        // given
        let policy = ConfirmationPolicy {
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(3),
            ..ConfirmationPolicy::default()
        };

        // when
        let delays: Vec<_> = policy.backoff().take(5).collect();

        // then
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(500),
                Duration::from_secs(1),
                Duration::from_secs(2),
                Duration::from_secs(3),
                Duration::from_secs(3),
            ]
        );
    }

    #[test]
    fn has_confirmations__counts_the_receipt_block() {
        assert!(has_confirmations(10, 10, 1));
        assert!(!has_confirmations(10, 10, 2));
        assert!(has_confirmations(11, 10, 2));
        assert!(!has_confirmations(9, 10, 1));
        assert!(has_confirmations(9, 10, 0));
    }

    #[test]
    fn decode_logs__orders_by_log_index_and_decodes_game_played() {
        // given
        let logs = vec![played_log(8, 7, 3), played_log(2, 7, 1)];

        // when
        let events = decode_logs(EventKind::GamePlayed, logs).unwrap();

        // then
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].log_index, 1);
        assert_eq!(events[1].log_index, 3);
        let GameEventData::Played(record) = &events[0].data else {
            panic!("expected GamePlayed");
        };
        assert_eq!(record.house_number, U256::from(2u64));
        assert_eq!(record.prediction, U256::from(5u64));
        assert_eq!(record.player, Address::repeat_byte(0x11));
    }

    #[test]
    fn decode_logs__skips_removed_and_foreign_logs() {
        // given
        let mut removed = marker_log(EventKind::GameWon, 7, 0);
        removed.removed = true;
        let foreign = marker_log(EventKind::GameLost, 7, 1);
        let kept = marker_log(EventKind::GameWon, 7, 2);

        // when
        let events = decode_logs(EventKind::GameWon, vec![removed, foreign, kept]).unwrap();

        // then
        assert_eq!(
            events,
            vec![GameEvent {
                block_number: 7,
                log_index: 2,
                data: GameEventData::Won,
            }]
        );
    }

    #[test]
    fn decode_logs__empty_is_not_an_error() {
        let events = decode_logs(EventKind::GameLost, Vec::new()).unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn decode_logs__malformed_game_played_is_a_query_error() {
        // given
        let data = LogData::new_unchecked(
            vec![EventKind::GamePlayed.signature_hash()],
            Bytes::from(vec![0u8; 3]),
        );
        let log = rpc_log(data, 7, 0);

        // when
        let result = decode_logs(EventKind::GamePlayed, vec![log]);

        // then
        assert!(matches!(result, Err(WagerError::QueryError(_))));
    }
}
