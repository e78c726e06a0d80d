use anyhow::{Context as _, Result};
use rusqlite::{OptionalExtension as _, Transaction, params};

use crate::domain::Vault;

pub fn get(tx: &Transaction) -> Result<Option<Vault>> {
    let record: Option<String> = tx
        .query_row("SELECT record FROM vault WHERE id = 0", [], |row| {
            row.get(0)
        })
        .optional()
        .context("get vault")?;

    record
        .map(|r| serde_json::from_str(&r).context("decode vault record"))
        .transpose()
}

/// The persisted form never contains the clear mnemonic: `Vault` skips it on
/// serialization.
pub fn put(tx: &Transaction, vault: &Vault) -> Result<()> {
    let record = serde_json::to_string(vault).context("encode vault record")?;
    tx.execute(
        "INSERT INTO vault (id, record) VALUES (0, ?1)
         ON CONFLICT(id) DO UPDATE SET record = excluded.record",
        params![record],
    )
    .context("put vault")?;
    Ok(())
}
