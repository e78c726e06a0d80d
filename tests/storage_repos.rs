use anyhow::{Context as _, Result};
use liquid_lpd::domain::trade::{SwapAccept, SwapRequest};
use liquid_lpd::domain::{Market, MarketPrice, Trade, TradeStatus, Unspent};
use liquid_lpd::error::DomainError;
use liquid_lpd::storage::{DbManager, market_repo, price_repo, trade_repo, unspent_repo};
use rust_decimal_macros::dec;

const BASE_ASSET: &str = "5ac9f65c0efcc4775e0baec4ec03abdde22473cd3cf33c0419ca290e0751b225";
const QUOTE_ASSET: &str = "d090c403610fe8a9e31967355929833bc8a8fe08429e630162d1ecbf29fdf28b";

fn open_db() -> Result<(tempfile::TempDir, DbManager)> {
    let tmp = tempfile::tempdir().context("create tempdir")?;
    let db = DbManager::open(tmp.path()).context("open stores")?;
    Ok((tmp, db))
}

fn funded_market(account_index: u32) -> Market {
    let mut market = Market::new(account_index, BASE_ASSET, 25).expect("market");
    market
        .fund(&[BASE_ASSET.to_string(), QUOTE_ASSET.to_string()])
        .expect("fund");
    market
}

fn sample_unspent(txid_byte: u8, vout: u32) -> Unspent {
    Unspent {
        txid: hex::encode([txid_byte; 32]),
        vout,
        value: 100_000_000,
        asset: BASE_ASSET.to_string(),
        value_commitment: String::new(),
        asset_commitment: String::new(),
        script: "0014".to_string() + &"11".repeat(20),
        nonce: vec![2; 33],
        range_proof: vec![3; 64],
        surjection_proof: vec![4; 64],
        address: "el1qsample".to_string(),
        confirmed: true,
        spent: false,
        locked: false,
        locked_by: None,
    }
}

fn sample_trade(id: &str) -> Trade {
    let mut trade = Trade::new(id.to_string());
    trade
        .propose(
            SwapRequest {
                id: format!("req-{id}"),
                asset_to_send: BASE_ASSET.to_string(),
                amount_to_send: 30_000_000,
                asset_to_receive: QUOTE_ASSET.to_string(),
                amount_to_receive: 20_000_000,
                psbt_base64: String::new(),
                input_blinding_keys: Default::default(),
                output_blinding_keys: Default::default(),
            },
            QUOTE_ASSET,
            100,
        )
        .expect("propose");
    trade
}

#[test]
fn markets_roundtrip_and_resolve_by_quote() -> Result<()> {
    let (_tmp, db) = open_db()?;

    let market = funded_market(5);
    db.run_main(false, |tx| Ok(market_repo::upsert(tx, &market)?))
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    let by_account = db
        .run_main(true, |tx| Ok(market_repo::by_account(tx, 5)?))
        .map_err(|e| anyhow::anyhow!("{e}"))?
        .context("market by account")?;
    assert_eq!(by_account, market);

    let by_quote = db
        .run_main(true, |tx| Ok(market_repo::by_quote_asset(tx, QUOTE_ASSET)?))
        .map_err(|e| anyhow::anyhow!("{e}"))?
        .context("market by quote")?;
    assert_eq!(by_quote.account_index, 5);

    let all = db
        .run_main(true, |tx| Ok(market_repo::all(tx)?))
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    assert_eq!(all.len(), 1);
    Ok(())
}

#[test]
fn trades_are_indexed_by_status_accept_id_and_txid() -> Result<()> {
    let (_tmp, db) = open_db()?;

    let mut trade = sample_trade("t-1");
    trade
        .accept(
            SwapAccept {
                id: "acc-1".to_string(),
                request_id: "req-t-1".to_string(),
                psbt_base64: String::new(),
                input_blinding_keys: Default::default(),
                output_blinding_keys: Default::default(),
            },
            110,
        )
        .expect("accept");
    db.run_main(false, |tx| Ok(trade_repo::upsert(tx, &trade)?))
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    let accepted = db
        .run_main(true, |tx| Ok(trade_repo::by_status(tx, TradeStatus::Accepted)?))
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    assert_eq!(accepted.len(), 1);

    let by_accept = db
        .run_main(true, |tx| Ok(trade_repo::by_accept_id(tx, "acc-1")?))
        .map_err(|e| anyhow::anyhow!("{e}"))?
        .context("trade by accept id")?;
    assert_eq!(by_accept.id, "t-1");

    trade
        .complete(
            liquid_lpd::domain::trade::SwapComplete {
                id: "com-1".to_string(),
                accept_id: "acc-1".to_string(),
                psbt_base64: String::new(),
            },
            "feedface",
            120,
        )
        .expect("complete");
    db.run_main(false, |tx| Ok(trade_repo::upsert(tx, &trade)?))
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    let by_txid = db
        .run_main(true, |tx| Ok(trade_repo::by_txid(tx, "feedface")?))
        .map_err(|e| anyhow::anyhow!("{e}"))?
        .context("trade by txid")?;
    assert_eq!(by_txid.status, TradeStatus::Completed);
    assert_eq!(by_txid, trade);
    Ok(())
}

#[test]
fn unspent_locks_and_spends_keep_their_invariants() -> Result<()> {
    let (_tmp, db) = open_db()?;

    let mut unspent = sample_unspent(0xaa, 1);
    unspent.lock("t-1").expect("lock");
    db.run_unspents(false, |tx| Ok(unspent_repo::upsert(tx, &unspent)?))
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    let locked = db
        .run_unspents(true, |tx| Ok(unspent_repo::locked_by_trade(tx, "t-1")?))
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    assert_eq!(locked.len(), 1);
    assert_eq!(locked[0].locked_by.as_deref(), Some("t-1"));

    // Locking twice or after spending is refused.
    let mut relock = locked[0].clone();
    assert!(relock.lock("t-2").is_err());
    relock.mark_spent();
    assert!(!relock.locked);
    assert!(relock.locked_by.is_none());
    assert!(relock.lock("t-2").is_err());

    db.run_unspents(false, |tx| Ok(unspent_repo::upsert(tx, &relock)?))
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    let stored = db
        .run_unspents(true, |tx| {
            Ok(unspent_repo::get(tx, &relock.txid, relock.vout)?)
        })
        .map_err(|e| anyhow::anyhow!("{e}"))?
        .context("unspent present")?;
    assert!(stored.spent);
    assert!(!stored.locked);
    Ok(())
}

#[test]
fn prices_live_in_their_own_scope() -> Result<()> {
    let (_tmp, db) = open_db()?;

    let price = MarketPrice::new(dec!(0.00015385), dec!(6500)).expect("price");
    db.run_prices(false, |tx| Ok(price_repo::set(tx, 5, &price)?))
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    let stored = db
        .run_prices(true, |tx| Ok(price_repo::get(tx, 5)?))
        .map_err(|e| anyhow::anyhow!("{e}"))?
        .context("price present")?;
    assert_eq!(stored.base_price, dec!(0.00015385));
    assert_eq!(stored.quote_price, dec!(6500));

    let missing = db
        .run_prices(true, |tx| Ok(price_repo::get(tx, 6)?))
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    assert!(missing.is_none());
    Ok(())
}

#[test]
fn failed_transactions_persist_nothing() -> Result<()> {
    let (_tmp, db) = open_db()?;

    let market = funded_market(7);
    let result = db.run_main(false, |tx| {
        market_repo::upsert(tx, &market)?;
        Err::<(), _>(DomainError::MarketAlreadyExists.into())
    });
    assert!(result.is_err());

    let stored = db
        .run_main(true, |tx| Ok(market_repo::by_account(tx, 7)?))
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    assert!(stored.is_none());
    Ok(())
}

#[test]
fn read_only_transactions_discard_writes() -> Result<()> {
    let (_tmp, db) = open_db()?;

    let market = funded_market(8);
    db.run_main(true, |tx| Ok(market_repo::upsert(tx, &market)?))
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    let stored = db
        .run_main(true, |tx| Ok(market_repo::by_account(tx, 8)?))
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    assert!(stored.is_none());
    Ok(())
}
