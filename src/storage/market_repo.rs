use anyhow::{Context as _, Result};
use rusqlite::{OptionalExtension as _, Transaction, params};

use crate::domain::Market;

pub fn upsert(tx: &Transaction, market: &Market) -> Result<()> {
    let record = serde_json::to_string(market).context("encode market record")?;
    tx.execute(
        "INSERT INTO markets (account_index, quote_asset, record) VALUES (?1, ?2, ?3)
         ON CONFLICT(account_index) DO UPDATE SET
           quote_asset = excluded.quote_asset,
           record = excluded.record",
        params![market.account_index, &market.quote_asset, record],
    )
    .with_context(|| format!("upsert market account {}", market.account_index))?;
    Ok(())
}

pub fn by_account(tx: &Transaction, account_index: u32) -> Result<Option<Market>> {
    tx.query_row(
        "SELECT record FROM markets WHERE account_index = ?1",
        params![account_index],
        decode_row,
    )
    .optional()
    .with_context(|| format!("get market account {account_index}"))
}

/// Quote asset is unique per market, so this resolves a trading pair.
pub fn by_quote_asset(tx: &Transaction, quote_asset: &str) -> Result<Option<Market>> {
    tx.query_row(
        "SELECT record FROM markets WHERE quote_asset = ?1",
        params![quote_asset],
        decode_row,
    )
    .optional()
    .with_context(|| format!("get market with quote {quote_asset}"))
}

pub fn all(tx: &Transaction) -> Result<Vec<Market>> {
    let mut stmt = tx
        .prepare("SELECT record FROM markets ORDER BY account_index")
        .context("prepare list markets")?;
    let rows = stmt.query_map([], decode_row).context("query markets")?;

    let mut out = Vec::new();
    for row in rows {
        out.push(row.context("read market row")?);
    }
    Ok(out)
}

fn decode_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Market> {
    let record: String = row.get(0)?;
    serde_json::from_str(&record).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(
            0,
            rusqlite::types::Type::Text,
            format!("invalid market record: {e}").into(),
        )
    })
}
