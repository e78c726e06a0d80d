mod support;

use anyhow::{Context as _, Result};
use liquid_lpd::application::sweep_once;
use liquid_lpd::domain::trade::{SwapAccept, SwapRequest};
use liquid_lpd::domain::{MarketPrice, Strategy, Trade, TradeStatus};
use liquid_lpd::engine::Side;
use liquid_lpd::error::{DomainError, ServiceError};
use liquid_lpd::storage::{trade_repo, unspent_repo};
use rust_decimal_macros::dec;
use support::{TEST_QUOTE_ASSET, harness, init_wallet, seed_unspent};

fn domain_err(err: ServiceError) -> DomainError {
    match err {
        ServiceError::Domain(e) => e,
        ServiceError::Infra(e) => panic!("expected domain error, got: {e:#}"),
    }
}

/// Derive a fee deposit address and fund it with 1 L-BTC so markets can
/// open.
fn fund_fee_account(h: &support::Harness) -> Result<()> {
    let (address, _key) = h
        .operator
        .deposit_fee_account()
        .map_err(|e| anyhow::anyhow!("deposit fee account: {e}"))?;
    seed_unspent(h, &address, &h.base_asset, 100_000_000, 0xf0)?;
    Ok(())
}

/// Create a market account and fund it with the balanced-pool fixture:
/// 1 L-BTC and 6500 units of the quote asset.
fn fund_market_account(h: &support::Harness) -> Result<String> {
    let (address, _key) = h
        .operator
        .deposit_market("", "")
        .map_err(|e| anyhow::anyhow!("deposit market: {e}"))?;
    seed_unspent(h, &address, &h.base_asset, 100_000_000, 0xa0)?;
    seed_unspent(h, &address, TEST_QUOTE_ASSET, 650_000_000_000, 0xa1)?;
    Ok(address)
}

#[tokio::test]
async fn list_market_is_empty_without_markets() -> Result<()> {
    let h = harness()?;
    init_wallet(&h)?;

    let markets = h
        .operator
        .list_market()
        .map_err(|e| anyhow::anyhow!("list market: {e}"))?;
    assert!(markets.is_empty());
    Ok(())
}

#[tokio::test]
async fn deposit_market_rejects_invalid_assets() -> Result<()> {
    let h = harness()?;
    init_wallet(&h)?;

    let err = h
        .operator
        .deposit_market("", TEST_QUOTE_ASSET)
        .unwrap_err();
    assert_eq!(domain_err(err), DomainError::InvalidBaseAsset);

    let err = h.operator.deposit_market(&h.base_asset, "").unwrap_err();
    assert_eq!(domain_err(err), DomainError::InvalidQuoteAsset);

    let err = h
        .operator
        .deposit_market(&h.base_asset, "ldjbwjkbfjksdbjkvcsbdjkbcdsjkb")
        .unwrap_err();
    assert_eq!(domain_err(err), DomainError::InvalidQuoteAsset);

    // A valid pair without a market behind it is unknown.
    let err = h
        .operator
        .deposit_market(&h.base_asset, TEST_QUOTE_ASSET)
        .unwrap_err();
    assert_eq!(domain_err(err), DomainError::MarketNotExist);
    Ok(())
}

#[tokio::test]
async fn deposit_market_with_empty_pair_creates_an_account() -> Result<()> {
    let h = harness()?;
    init_wallet(&h)?;

    let (address, blinding_key) = h
        .operator
        .deposit_market("", "")
        .map_err(|e| anyhow::anyhow!("deposit market: {e}"))?;
    assert!(address.starts_with("el1"));
    assert_eq!(blinding_key.len(), 64);

    let markets = h
        .operator
        .list_market()
        .map_err(|e| anyhow::anyhow!("list market: {e}"))?;
    assert_eq!(markets.len(), 1);
    assert!(!markets[0].is_funded());
    assert!(!markets[0].tradable);
    Ok(())
}

#[tokio::test]
async fn open_market_requires_a_funded_fee_account() -> Result<()> {
    let h = harness()?;
    init_wallet(&h)?;
    fund_market_account(&h)?;

    let err = h
        .operator
        .open_market(&h.base_asset, TEST_QUOTE_ASSET)
        .unwrap_err();
    assert_eq!(domain_err(err), DomainError::InsufficientFunds);
    Ok(())
}

#[tokio::test]
async fn open_market_binds_the_quote_asset_and_goes_tradable() -> Result<()> {
    let h = harness()?;
    init_wallet(&h)?;
    fund_fee_account(&h)?;
    fund_market_account(&h)?;

    h.operator
        .open_market(&h.base_asset, TEST_QUOTE_ASSET)
        .map_err(|e| anyhow::anyhow!("open market: {e}"))?;

    let markets = h
        .operator
        .list_market()
        .map_err(|e| anyhow::anyhow!("list market: {e}"))?;
    assert_eq!(markets.len(), 1);
    assert_eq!(markets[0].quote_asset, TEST_QUOTE_ASSET);
    assert!(markets[0].tradable);

    let tradable = h
        .trade
        .get_tradable_markets()
        .map_err(|e| anyhow::anyhow!("tradable markets: {e}"))?;
    assert_eq!(tradable.len(), 1);

    let (balance, fee_bps) = h
        .trade
        .get_market_balance(&h.base_asset, TEST_QUOTE_ASSET)
        .map_err(|e| anyhow::anyhow!("balance: {e}"))?;
    assert_eq!(balance.base, 100_000_000);
    assert_eq!(balance.quote, 650_000_000_000);
    assert_eq!(fee_bps, 25);
    Ok(())
}

#[tokio::test]
async fn balanced_previews_match_the_pool() -> Result<()> {
    let h = harness()?;
    init_wallet(&h)?;
    fund_fee_account(&h)?;
    fund_market_account(&h)?;
    h.operator
        .open_market(&h.base_asset, TEST_QUOTE_ASSET)
        .map_err(|e| anyhow::anyhow!("open market: {e}"))?;

    let buy = h
        .trade
        .get_market_price(&h.base_asset, TEST_QUOTE_ASSET, Side::Buy, 10_000)
        .map_err(|e| anyhow::anyhow!("buy preview: {e}"))?;
    assert_eq!(buy.amount, 65_169_016);

    let sell = h
        .trade
        .get_market_price(&h.base_asset, TEST_QUOTE_ASSET, Side::Sell, 10_000)
        .map_err(|e| anyhow::anyhow!("sell preview: {e}"))?;
    assert_eq!(sell.amount, 65_155_984);
    assert_eq!(sell.price.quote_price, dec!(6500));
    Ok(())
}

#[tokio::test]
async fn preview_on_a_closed_market_is_refused() -> Result<()> {
    let h = harness()?;
    init_wallet(&h)?;
    fund_fee_account(&h)?;
    fund_market_account(&h)?;
    h.operator
        .open_market(&h.base_asset, TEST_QUOTE_ASSET)
        .map_err(|e| anyhow::anyhow!("open market: {e}"))?;
    h.operator
        .close_market(&h.base_asset, TEST_QUOTE_ASSET)
        .map_err(|e| anyhow::anyhow!("close market: {e}"))?;

    let err = h
        .trade
        .get_market_price(&h.base_asset, TEST_QUOTE_ASSET, Side::Sell, 10_000)
        .unwrap_err();
    assert_eq!(domain_err(err), DomainError::MarketIsClosed);
    Ok(())
}

#[tokio::test]
async fn price_updates_are_bounded() -> Result<()> {
    let h = harness()?;
    init_wallet(&h)?;
    fund_fee_account(&h)?;
    fund_market_account(&h)?;
    h.operator
        .open_market(&h.base_asset, TEST_QUOTE_ASSET)
        .map_err(|e| anyhow::anyhow!("open market: {e}"))?;

    // In-range prices are accepted and visible through the market list.
    let price = MarketPrice::new(dec!(0.4), dec!(1)).expect("price in range");
    h.operator
        .update_market_price(&h.base_asset, TEST_QUOTE_ASSET, price)
        .map_err(|e| anyhow::anyhow!("update price: {e}"))?;
    let markets = h
        .operator
        .list_market()
        .map_err(|e| anyhow::anyhow!("list market: {e}"))?;
    assert_eq!(markets[0].price.base_price, dec!(0.4));
    assert_eq!(markets[0].price.quote_price, dec!(1));

    // Out-of-range prices never construct.
    assert_eq!(
        MarketPrice::new(dec!(1), dec!(2099999997690001)).unwrap_err(),
        DomainError::PriceOutOfRange
    );
    assert_eq!(
        MarketPrice::new(dec!(102.1293), dec!(0)).unwrap_err(),
        DomainError::PriceOutOfRange
    );
    assert_eq!(
        MarketPrice::new(dec!(-1), dec!(10000)).unwrap_err(),
        DomainError::PriceOutOfRange
    );
    Ok(())
}

#[tokio::test]
async fn strategy_updates_require_a_closed_market() -> Result<()> {
    let h = harness()?;
    init_wallet(&h)?;
    fund_fee_account(&h)?;
    fund_market_account(&h)?;
    h.operator
        .open_market(&h.base_asset, TEST_QUOTE_ASSET)
        .map_err(|e| anyhow::anyhow!("open market: {e}"))?;

    let err = h
        .operator
        .update_market_strategy(&h.base_asset, TEST_QUOTE_ASSET, Strategy::Pluggable)
        .unwrap_err();
    assert_eq!(domain_err(err), DomainError::MarketIsClosed);

    h.operator
        .close_market(&h.base_asset, TEST_QUOTE_ASSET)
        .map_err(|e| anyhow::anyhow!("close market: {e}"))?;
    h.operator
        .update_market_strategy(&h.base_asset, TEST_QUOTE_ASSET, Strategy::Pluggable)
        .map_err(|e| anyhow::anyhow!("update strategy: {e}"))?;

    // Reopening a pluggable market without prices is refused.
    let err = h
        .operator
        .open_market(&h.base_asset, TEST_QUOTE_ASSET)
        .unwrap_err();
    assert_eq!(domain_err(err), DomainError::PriceOutOfRange);

    let price = MarketPrice::new(dec!(0.00015385), dec!(6500)).expect("price");
    h.operator
        .update_market_price(&h.base_asset, TEST_QUOTE_ASSET, price)
        .map_err(|e| anyhow::anyhow!("update price: {e}"))?;
    h.operator
        .open_market(&h.base_asset, TEST_QUOTE_ASSET)
        .map_err(|e| anyhow::anyhow!("reopen market: {e}"))?;

    let buy = h
        .trade
        .get_market_price(&h.base_asset, TEST_QUOTE_ASSET, Side::Buy, 10_000)
        .map_err(|e| anyhow::anyhow!("buy preview: {e}"))?;
    assert_eq!(buy.amount, 81_250_000);

    let sell = h
        .trade
        .get_market_price(&h.base_asset, TEST_QUOTE_ASSET, Side::Sell, 10_000)
        .map_err(|e| anyhow::anyhow!("sell preview: {e}"))?;
    assert_eq!(sell.amount, 48_750_000);
    Ok(())
}

#[tokio::test]
async fn fee_account_balance_sums_available_base_coins() -> Result<()> {
    let h = harness()?;
    init_wallet(&h)?;
    fund_fee_account(&h)?;

    let balance = h
        .operator
        .fee_account_balance()
        .map_err(|e| anyhow::anyhow!("fee balance: {e}"))?;
    assert_eq!(balance, 100_000_000);
    Ok(())
}

#[tokio::test]
async fn external_addresses_are_listed_per_market() -> Result<()> {
    let h = harness()?;
    init_wallet(&h)?;
    fund_fee_account(&h)?;
    let deposit_address = fund_market_account(&h)?;
    h.operator
        .open_market(&h.base_asset, TEST_QUOTE_ASSET)
        .map_err(|e| anyhow::anyhow!("open market: {e}"))?;

    let addresses = h
        .operator
        .list_market_external_addresses(&h.base_asset, TEST_QUOTE_ASSET)
        .map_err(|e| anyhow::anyhow!("external addresses: {e}"))?;
    assert_eq!(addresses, vec![deposit_address]);
    Ok(())
}

#[tokio::test]
async fn list_swaps_reflects_recorded_trades() -> Result<()> {
    let h = harness()?;
    init_wallet(&h)?;

    let swaps = h
        .operator
        .list_swaps()
        .map_err(|e| anyhow::anyhow!("list swaps: {e}"))?;
    assert!(swaps.is_empty());

    let mut trade = Trade::new("t-1".to_string());
    trade
        .propose(
            SwapRequest {
                id: "req-1".to_string(),
                asset_to_send: h.base_asset.clone(),
                amount_to_send: 30_000_000,
                asset_to_receive: TEST_QUOTE_ASSET.to_string(),
                amount_to_receive: 20_000_000,
                psbt_base64: String::new(),
                input_blinding_keys: Default::default(),
                output_blinding_keys: Default::default(),
            },
            TEST_QUOTE_ASSET,
            100,
        )
        .expect("propose");
    h.ctx
        .db
        .run_main(false, |tx| Ok(trade_repo::upsert(tx, &trade)?))
        .map_err(|e| anyhow::anyhow!("persist trade: {e}"))?;

    let swaps = h
        .operator
        .list_swaps()
        .map_err(|e| anyhow::anyhow!("list swaps: {e}"))?;
    assert_eq!(swaps.len(), 1);
    assert_eq!(swaps[0].id, "t-1");
    Ok(())
}

#[tokio::test]
async fn sweeper_expires_stale_trades_and_releases_their_locks() -> Result<()> {
    let h = harness()?;
    init_wallet(&h)?;
    let address = fund_market_account(&h)?;

    let mut trade = Trade::new("t-stale".to_string());
    trade
        .propose(
            SwapRequest {
                id: "req-stale".to_string(),
                asset_to_send: h.base_asset.clone(),
                amount_to_send: 30_000_000,
                asset_to_receive: TEST_QUOTE_ASSET.to_string(),
                amount_to_receive: 20_000_000,
                psbt_base64: String::new(),
                input_blinding_keys: Default::default(),
                output_blinding_keys: Default::default(),
            },
            TEST_QUOTE_ASSET,
            1_000,
        )
        .expect("propose");
    trade
        .accept(
            SwapAccept {
                id: "acc-stale".to_string(),
                request_id: "req-stale".to_string(),
                psbt_base64: String::new(),
                input_blinding_keys: Default::default(),
                output_blinding_keys: Default::default(),
            },
            1_000,
        )
        .expect("accept");
    h.ctx
        .db
        .run_main(false, |tx| Ok(trade_repo::upsert(tx, &trade)?))
        .map_err(|e| anyhow::anyhow!("persist trade: {e}"))?;

    // Reserve one of the market coins under the stale trade.
    let seeded = seed_unspent(&h, &address, &h.base_asset, 42_000, 0xcc)?;
    h.ctx
        .db
        .run_unspents(false, |tx| {
            let mut u = unspent_repo::get(tx, &seeded.txid, seeded.vout)?
                .expect("seeded unspent present");
            u.lock("t-stale")?;
            unspent_repo::upsert(tx, &u)?;
            Ok(())
        })
        .map_err(|e| anyhow::anyhow!("lock unspent: {e}"))?;

    // Well past the expiry window.
    sweep_once(&h.ctx, 1_000 + h.ctx.config.trade_expiry_secs + 60)
        .map_err(|e| anyhow::anyhow!("sweep: {e}"))?;

    let stored = h
        .ctx
        .db
        .run_main(true, |tx| Ok(trade_repo::get(tx, "t-stale")?))
        .map_err(|e| anyhow::anyhow!("get trade: {e}"))?
        .context("trade present")?;
    assert_eq!(stored.status, TradeStatus::Expired);

    let unlocked = h
        .ctx
        .db
        .run_unspents(true, |tx| Ok(unspent_repo::get(tx, &seeded.txid, seeded.vout)?))
        .map_err(|e| anyhow::anyhow!("get unspent: {e}"))?
        .context("unspent present")?;
    assert!(!unlocked.locked);
    assert!(unlocked.locked_by.is_none());
    Ok(())
}
