use liquid_lpd::domain::trade::{SwapAccept, SwapComplete, SwapRequest, Trade, TradeStatus};
use liquid_lpd::error::DomainError;

const QUOTE_ASSET: &str = "d090c403610fe8a9e31967355929833bc8a8fe08429e630162d1ecbf29fdf28b";

fn request() -> SwapRequest {
    SwapRequest {
        id: "req-1".to_string(),
        asset_to_send: "aa".repeat(32),
        amount_to_send: 30_000_000,
        asset_to_receive: QUOTE_ASSET.to_string(),
        amount_to_receive: 20_000_000,
        psbt_base64: String::new(),
        input_blinding_keys: Default::default(),
        output_blinding_keys: Default::default(),
    }
}

fn accept() -> SwapAccept {
    SwapAccept {
        id: "acc-1".to_string(),
        request_id: "req-1".to_string(),
        psbt_base64: String::new(),
        input_blinding_keys: Default::default(),
        output_blinding_keys: Default::default(),
    }
}

fn complete() -> SwapComplete {
    SwapComplete {
        id: "com-1".to_string(),
        accept_id: "acc-1".to_string(),
        psbt_base64: String::new(),
    }
}

#[test]
fn full_lifecycle_reaches_settled() {
    let mut trade = Trade::new("t-1".to_string());
    assert_eq!(trade.status, TradeStatus::Empty);

    trade.propose(request(), QUOTE_ASSET, 100).expect("propose");
    assert_eq!(trade.status, TradeStatus::Proposal);
    assert_eq!(trade.market_quote_asset, QUOTE_ASSET);
    assert_eq!(trade.timestamp_request, Some(100));

    trade.accept(accept(), 110).expect("accept");
    assert_eq!(trade.status, TradeStatus::Accepted);

    trade
        .complete(complete(), "deadbeef", 120)
        .expect("complete");
    assert_eq!(trade.status, TradeStatus::Completed);
    assert_eq!(trade.txid.as_deref(), Some("deadbeef"));

    trade.settle().expect("settle");
    assert_eq!(trade.status, TradeStatus::Settled);
    assert!(trade.status.is_terminal());
}

#[test]
fn accepted_trades_expire() {
    let mut trade = Trade::new("t-2".to_string());
    trade.propose(request(), QUOTE_ASSET, 100).expect("propose");
    trade.accept(accept(), 110).expect("accept");

    assert!(!trade.is_expired_at(300, 300));
    assert!(trade.is_expired_at(411, 300));

    trade.expire(411).expect("expire");
    assert_eq!(trade.status, TradeStatus::Expired);
    assert_eq!(trade.timestamp_expire, Some(411));
    assert!(trade.status.is_terminal());
}

#[test]
fn any_live_trade_can_fail_with_a_reason() {
    let mut trade = Trade::new("t-3".to_string());
    trade.propose(request(), QUOTE_ASSET, 100).expect("propose");

    let fail = trade
        .fail(&DomainError::InsufficientLiquidity)
        .expect("fail");
    assert_eq!(trade.status, TradeStatus::Failed);
    assert_eq!(fail.message_id, "req-1");
    assert_eq!(
        fail.failure_code,
        DomainError::InsufficientLiquidity.failure_code()
    );
    assert!(trade.swap_fail.is_some());
}

#[test]
fn transitions_out_of_order_are_rejected() {
    let mut trade = Trade::new("t-4".to_string());

    // Cannot accept or complete before a proposal.
    assert!(trade.accept(accept(), 100).is_err());
    assert!(trade.complete(complete(), "deadbeef", 100).is_err());
    assert!(trade.settle().is_err());

    trade.propose(request(), QUOTE_ASSET, 100).expect("propose");
    // Cannot complete or expire a bare proposal.
    assert!(trade.complete(complete(), "deadbeef", 110).is_err());
    assert!(trade.expire(110).is_err());
}

#[test]
fn terminal_states_have_no_outgoing_transitions() {
    let mut trade = Trade::new("t-5".to_string());
    trade.propose(request(), QUOTE_ASSET, 100).expect("propose");
    trade.accept(accept(), 110).expect("accept");
    trade.expire(500).expect("expire");

    assert!(trade.complete(complete(), "deadbeef", 600).is_err());
    assert!(trade.settle().is_err());
    assert!(trade.fail(&DomainError::InsufficientLiquidity).is_err());
    assert_eq!(trade.status, TradeStatus::Expired);
}

#[test]
fn proposing_twice_is_rejected() {
    let mut trade = Trade::new("t-6".to_string());
    trade.propose(request(), QUOTE_ASSET, 100).expect("propose");
    let err = trade.propose(request(), QUOTE_ASSET, 101).unwrap_err();
    assert!(matches!(err, DomainError::InvalidTradeTransition { .. }));
}
