use std::str::FromStr as _;

use anyhow::{Context as _, Result};
use rusqlite::{OptionalExtension as _, Transaction, params};
use rust_decimal::Decimal;

use crate::domain::MarketPrice;

pub fn get(tx: &Transaction, account_index: u32) -> Result<Option<MarketPrice>> {
    tx.query_row(
        "SELECT base_price, quote_price FROM prices WHERE account_index = ?1",
        params![account_index],
        |row| {
            let base: String = row.get(0)?;
            let quote: String = row.get(1)?;
            Ok((base, quote))
        },
    )
    .optional()
    .with_context(|| format!("get price for account {account_index}"))?
    .map(|(base, quote)| {
        Ok(MarketPrice {
            base_price: Decimal::from_str(&base).context("decode base price")?,
            quote_price: Decimal::from_str(&quote).context("decode quote price")?,
        })
    })
    .transpose()
}

pub fn set(tx: &Transaction, account_index: u32, price: &MarketPrice) -> Result<()> {
    tx.execute(
        "INSERT INTO prices (account_index, base_price, quote_price) VALUES (?1, ?2, ?3)
         ON CONFLICT(account_index) DO UPDATE SET
           base_price = excluded.base_price,
           quote_price = excluded.quote_price",
        params![
            account_index,
            price.base_price.to_string(),
            price.quote_price.to_string()
        ],
    )
    .with_context(|| format!("set price for account {account_index}"))?;
    Ok(())
}
