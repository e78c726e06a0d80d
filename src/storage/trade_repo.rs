use anyhow::{Context as _, Result};
use rusqlite::{OptionalExtension as _, Transaction, params};

use crate::domain::{Trade, TradeStatus};

pub fn upsert(tx: &Transaction, trade: &Trade) -> Result<()> {
    let record = serde_json::to_string(trade).context("encode trade record")?;
    let accept_id = trade.swap_accept.as_ref().map(|a| a.id.clone());
    tx.execute(
        "INSERT INTO trades (id, quote_asset, status, accept_id, txid, record)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(id) DO UPDATE SET
           quote_asset = excluded.quote_asset,
           status = excluded.status,
           accept_id = excluded.accept_id,
           txid = excluded.txid,
           record = excluded.record",
        params![
            &trade.id,
            &trade.market_quote_asset,
            trade.status.as_str(),
            accept_id,
            trade.txid,
            record
        ],
    )
    .with_context(|| format!("upsert trade {}", trade.id))?;
    Ok(())
}

pub fn get(tx: &Transaction, id: &str) -> Result<Option<Trade>> {
    tx.query_row(
        "SELECT record FROM trades WHERE id = ?1",
        params![id],
        decode_row,
    )
    .optional()
    .with_context(|| format!("get trade {id}"))
}

pub fn by_accept_id(tx: &Transaction, accept_id: &str) -> Result<Option<Trade>> {
    tx.query_row(
        "SELECT record FROM trades WHERE accept_id = ?1",
        params![accept_id],
        decode_row,
    )
    .optional()
    .with_context(|| format!("get trade by accept id {accept_id}"))
}

pub fn by_txid(tx: &Transaction, txid: &str) -> Result<Option<Trade>> {
    tx.query_row(
        "SELECT record FROM trades WHERE txid = ?1",
        params![txid],
        decode_row,
    )
    .optional()
    .with_context(|| format!("get trade by txid {txid}"))
}

pub fn by_status(tx: &Transaction, status: TradeStatus) -> Result<Vec<Trade>> {
    collect(
        tx,
        "SELECT record FROM trades WHERE status = ?1 ORDER BY id",
        params![status.as_str()],
    )
}

pub fn by_market(tx: &Transaction, quote_asset: &str) -> Result<Vec<Trade>> {
    collect(
        tx,
        "SELECT record FROM trades WHERE quote_asset = ?1 ORDER BY id",
        params![quote_asset],
    )
}

pub fn all(tx: &Transaction) -> Result<Vec<Trade>> {
    collect(tx, "SELECT record FROM trades ORDER BY id", params![])
}

fn collect(
    tx: &Transaction,
    sql: &str,
    params: impl rusqlite::Params,
) -> Result<Vec<Trade>> {
    let mut stmt = tx.prepare(sql).context("prepare trade query")?;
    let rows = stmt.query_map(params, decode_row).context("query trades")?;

    let mut out = Vec::new();
    for row in rows {
        out.push(row.context("read trade row")?);
    }
    Ok(out)
}

fn decode_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Trade> {
    let record: String = row.get(0)?;
    serde_json::from_str(&record).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            format!("invalid trade record: {e}").into(),
        )
    })
}
