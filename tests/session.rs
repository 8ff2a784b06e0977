#![allow(non_snake_case)]
use alloy::primitives::{
    I256,
    U256,
    utils::parse_ether,
};
use lucky_digit::{
    WagerError,
    test_helpers::{
        ChainCall,
        FakeWallet,
        PLAYER,
        TestContext,
    },
    view::{
        HouseBalance,
        WagerState,
    },
    wager::Outcome,
};

#[tokio::test]
async fn connect__without_provider_stays_idle() {
    let ctx = TestContext::with_wallet(FakeWallet::unavailable());

    // when
    let result = ctx.controller.connect().await;

    // then
    assert!(matches!(result, Err(WagerError::ProviderUnavailable(_))));
    let view = ctx.controller.view();
    assert_eq!(view.state, WagerState::Idle);
    assert_eq!(view.account, None);
    assert!(matches!(
        view.last_error,
        Some(WagerError::ProviderUnavailable(_))
    ));
}

#[tokio::test]
async fn connect__declined_authorization_can_be_retried() {
    let ctx = TestContext::new();
    // given
    ctx.wallet
        .fail_next_connect(WagerError::UserRejected("closed the prompt".into()));

    // when
    let declined = ctx.controller.connect().await;
    let state_after_decline = ctx.controller.state();
    let accepted = ctx.controller.connect().await;

    // then
    assert!(matches!(declined, Err(WagerError::UserRejected(_))));
    assert_eq!(state_after_decline, WagerState::Idle);
    assert_eq!(accepted, Ok(PLAYER));
    assert_eq!(ctx.controller.state(), WagerState::Connected);
    assert_eq!(ctx.controller.view().last_error, None);
}

#[tokio::test]
async fn connect__loads_house_balance() {
    let ctx = TestContext::new();
    // given
    let wei = parse_ether("12.5").unwrap();
    ctx.chain.set_house_balance(wei);

    // when
    let account = ctx.controller.connect().await.unwrap();

    // then
    let view = ctx.controller.view();
    assert_eq!(account, PLAYER);
    assert_eq!(view.account, Some(PLAYER));
    assert!(view.connected());
    assert_eq!(view.house_balance, HouseBalance::Known(wei));
}

#[tokio::test]
async fn connect__balance_failure_does_not_fail_connection() {
    let ctx = TestContext::new();
    // given
    ctx.chain
        .fail_house_balance(WagerError::ReadError("rpc timeout".into()));

    // when
    let result = ctx.controller.connect().await;

    // then
    assert_eq!(result, Ok(PLAYER));
    let view = ctx.controller.view();
    assert_eq!(view.state, WagerState::Connected);
    assert_eq!(view.house_balance, HouseBalance::Unknown);
    assert_eq!(
        view.house_balance.display_eth(),
        "House Balance: unavailable"
    );
}

#[tokio::test]
async fn connect__when_connected_does_not_prompt_again() {
    let ctx = TestContext::connected().await.unwrap();

    // when
    let account = ctx.controller.connect().await.unwrap();

    // then
    assert_eq!(account, PLAYER);
    assert_eq!(ctx.wallet.connect_calls(), 1);
}

#[tokio::test]
async fn refresh_house_balance__failure_is_unknown_not_zero() {
    let ctx = TestContext::connected().await.unwrap();
    // given
    ctx.chain.set_house_balance(U256::from(5u64));
    ctx.controller.refresh_house_balance().await.unwrap();
    ctx.chain
        .fail_house_balance(WagerError::ReadError("node unreachable".into()));

    // when
    let result = ctx.controller.refresh_house_balance().await;

    // then
    assert!(matches!(result, Err(WagerError::ReadError(_))));
    assert_eq!(ctx.controller.view().house_balance, HouseBalance::Unknown);
}

#[tokio::test]
async fn refresh_house_balance__before_connect_is_not_stored() {
    let ctx = TestContext::new();
    // given
    ctx.chain.set_house_balance(U256::from(9u64));

    // when
    let result = ctx.controller.refresh_house_balance().await;

    // then
    assert_eq!(result, Ok(U256::from(9u64)));
    assert_eq!(ctx.controller.view().house_balance, HouseBalance::NotLoaded);
}

#[tokio::test]
async fn disconnect__clears_account_balance_and_attempt() {
    let ctx = TestContext::connected().await.unwrap();
    // given
    ctx.script_game(5, 5);
    let stake = I256::try_from(parse_ether("0.01").unwrap()).unwrap();
    ctx.controller.submit_wager(5, stake).await.unwrap();

    // when
    ctx.controller.disconnect().unwrap();

    // then
    let view = ctx.controller.view();
    assert_eq!(view.state, WagerState::Idle);
    assert_eq!(view.account, None);
    assert_eq!(view.attempt, None);
    assert_eq!(view.house_balance, HouseBalance::NotLoaded);
    assert_eq!(
        ctx.controller.submit_wager(5, stake).await,
        Err(WagerError::NotConnected)
    );
}

#[tokio::test]
async fn disconnect__refused_while_an_attempt_runs() {
    let ctx = TestContext::connected().await.unwrap();
    // given
    ctx.script_game(5, 5);
    let gate = ctx.chain.gate_simulation();
    let controller = ctx.controller.clone();
    let stake = I256::try_from(parse_ether("0.01").unwrap()).unwrap();
    let task = tokio::spawn(async move { controller.submit_wager(5, stake).await });
    let mut view = ctx.controller.subscribe();
    view.wait_for(|v| v.state.is_in_flight()).await.unwrap();

    // when
    let result = ctx.controller.disconnect();

    // then
    assert_eq!(result, Err(WagerError::AttemptInProgress));
    gate.notify_one();
    assert_eq!(task.await.unwrap().unwrap().outcome, Outcome::Won);
}

#[tokio::test]
async fn subscribe__observes_every_step_of_an_attempt() {
    let ctx = TestContext::connected().await.unwrap();
    // given
    ctx.script_game(1, 1);
    let gate = ctx.chain.gate_receipt();
    let controller = ctx.controller.clone();
    let stake = I256::try_from(parse_ether("0.01").unwrap()).unwrap();
    let task = tokio::spawn(async move { controller.submit_wager(1, stake).await });
    let mut view = ctx.controller.subscribe();

    // when
    view.wait_for(|v| v.state == WagerState::Confirming)
        .await
        .unwrap();
    let confirming = view.borrow().clone();
    gate.notify_one();
    task.await.unwrap().unwrap();
    view.wait_for(|v| v.state == WagerState::Resolved(Outcome::Won))
        .await
        .unwrap();

    // then
    let attempt = confirming.attempt.unwrap();
    assert!(attempt.tx_hash.is_some());
    assert_eq!(attempt.outcome, Outcome::Pending);
    assert!(
        ctx.chain
            .calls()
            .iter()
            .any(|call| matches!(call, ChainCall::HouseBalance))
    );
}
