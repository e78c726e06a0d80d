use anyhow::{Context as _, Result};
use rusqlite::{OptionalExtension as _, Transaction, params};

use crate::domain::Unspent;

pub fn upsert(tx: &Transaction, unspent: &Unspent) -> Result<()> {
    tx.execute(
        "INSERT INTO unspents (
           txid, vout, value, asset, value_commitment, asset_commitment,
           script, nonce, range_proof, surjection_proof, address,
           confirmed, spent, locked, locked_by
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
         ON CONFLICT(txid, vout) DO UPDATE SET
           value = excluded.value,
           asset = excluded.asset,
           value_commitment = excluded.value_commitment,
           asset_commitment = excluded.asset_commitment,
           script = excluded.script,
           nonce = excluded.nonce,
           range_proof = excluded.range_proof,
           surjection_proof = excluded.surjection_proof,
           address = excluded.address,
           confirmed = excluded.confirmed,
           spent = excluded.spent,
           locked = excluded.locked,
           locked_by = excluded.locked_by",
        params![
            &unspent.txid,
            unspent.vout,
            unspent.value,
            &unspent.asset,
            &unspent.value_commitment,
            &unspent.asset_commitment,
            &unspent.script,
            &unspent.nonce,
            &unspent.range_proof,
            &unspent.surjection_proof,
            &unspent.address,
            unspent.confirmed,
            unspent.spent,
            unspent.locked,
            unspent.locked_by,
        ],
    )
    .with_context(|| format!("upsert unspent {}:{}", unspent.txid, unspent.vout))?;
    Ok(())
}

pub fn get(tx: &Transaction, txid: &str, vout: u32) -> Result<Option<Unspent>> {
    tx.query_row(
        &format!("SELECT {COLUMNS} FROM unspents WHERE txid = ?1 AND vout = ?2"),
        params![txid, vout],
        row_to_unspent,
    )
    .optional()
    .with_context(|| format!("get unspent {txid}:{vout}"))
}

pub fn by_address(tx: &Transaction, address: &str) -> Result<Vec<Unspent>> {
    let mut stmt = tx
        .prepare(&format!(
            "SELECT {COLUMNS} FROM unspents WHERE address = ?1 ORDER BY txid, vout"
        ))
        .context("prepare unspents by address")?;
    let rows = stmt
        .query_map(params![address], row_to_unspent)
        .context("query unspents by address")?;

    let mut out = Vec::new();
    for row in rows {
        out.push(row.context("read unspent row")?);
    }
    Ok(out)
}

pub fn by_addresses(tx: &Transaction, addresses: &[String]) -> Result<Vec<Unspent>> {
    let mut out = Vec::new();
    for address in addresses {
        out.extend(by_address(tx, address)?);
    }
    Ok(out)
}

pub fn locked_by_trade(tx: &Transaction, trade_id: &str) -> Result<Vec<Unspent>> {
    let mut stmt = tx
        .prepare(&format!(
            "SELECT {COLUMNS} FROM unspents WHERE locked = 1 AND locked_by = ?1"
        ))
        .context("prepare unspents by lock owner")?;
    let rows = stmt
        .query_map(params![trade_id], row_to_unspent)
        .context("query unspents by lock owner")?;

    let mut out = Vec::new();
    for row in rows {
        out.push(row.context("read unspent row")?);
    }
    Ok(out)
}

pub fn all_locked(tx: &Transaction) -> Result<Vec<Unspent>> {
    let mut stmt = tx
        .prepare(&format!("SELECT {COLUMNS} FROM unspents WHERE locked = 1"))
        .context("prepare locked unspents")?;
    let rows = stmt
        .query_map([], row_to_unspent)
        .context("query locked unspents")?;

    let mut out = Vec::new();
    for row in rows {
        out.push(row.context("read unspent row")?);
    }
    Ok(out)
}

const COLUMNS: &str = "txid, vout, value, asset, value_commitment, asset_commitment, \
                       script, nonce, range_proof, surjection_proof, address, \
                       confirmed, spent, locked, locked_by";

fn row_to_unspent(row: &rusqlite::Row<'_>) -> rusqlite::Result<Unspent> {
    Ok(Unspent {
        txid: row.get(0)?,
        vout: row.get(1)?,
        value: row.get(2)?,
        asset: row.get(3)?,
        value_commitment: row.get(4)?,
        asset_commitment: row.get(5)?,
        script: row.get(6)?,
        nonce: row.get(7)?,
        range_proof: row.get(8)?,
        surjection_proof: row.get(9)?,
        address: row.get(10)?,
        confirmed: row.get(11)?,
        spent: row.get(12)?,
        locked: row.get(13)?,
        locked_by: row.get(14)?,
    })
}
