pub mod market_repo;
pub mod price_repo;
pub mod trade_repo;
pub mod unspent_repo;
pub mod vault_repo;

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Context as _, Result};
use rusqlite::{Connection, Transaction, TransactionBehavior};

use crate::error::{DomainError, ServiceError};

const SCHEMA_VERSION: i32 = 1;

/// The three independent transaction scopes of the daemon.
///
/// Vault, market and trade records share the main scope so a swap commits
/// atomically; unspents and prices each get their own store because the
/// crawler and the price feed write at high frequency and must not contend
/// with swap commits.
pub struct DbManager {
    main: Mutex<Connection>,
    unspents: Mutex<Connection>,
    prices: Mutex<Connection>,
}

impl DbManager {
    pub fn open(datadir: &Path) -> Result<Self> {
        std::fs::create_dir_all(datadir)
            .with_context(|| format!("create datadir {}", datadir.display()))?;

        let main = open_db(&datadir.join("main.sqlite3"))?;
        migrate(&main, MAIN_SCHEMA).context("migrate main store")?;

        let unspents = open_db(&datadir.join("unspents.sqlite3"))?;
        migrate(&unspents, UNSPENTS_SCHEMA).context("migrate unspents store")?;

        let prices = open_db(&datadir.join("prices.sqlite3"))?;
        migrate(&prices, PRICES_SCHEMA).context("migrate prices store")?;

        Ok(Self {
            main: Mutex::new(main),
            unspents: Mutex::new(unspents),
            prices: Mutex::new(prices),
        })
    }

    /// Run `f` inside a transaction on the main scope: committed on Ok,
    /// rolled back on Err or when read-only.
    pub fn run_main<T>(
        &self,
        read_only: bool,
        f: impl FnOnce(&Transaction) -> Result<T, ServiceError>,
    ) -> Result<T, ServiceError> {
        run(&self.main, read_only, f)
    }

    pub fn run_unspents<T>(
        &self,
        read_only: bool,
        f: impl FnOnce(&Transaction) -> Result<T, ServiceError>,
    ) -> Result<T, ServiceError> {
        run(&self.unspents, read_only, f)
    }

    pub fn run_prices<T>(
        &self,
        read_only: bool,
        f: impl FnOnce(&Transaction) -> Result<T, ServiceError>,
    ) -> Result<T, ServiceError> {
        run(&self.prices, read_only, f)
    }
}

fn run<T>(
    conn: &Mutex<Connection>,
    read_only: bool,
    f: impl FnOnce(&Transaction) -> Result<T, ServiceError>,
) -> Result<T, ServiceError> {
    let mut conn = conn.lock().expect("db mutex poisoned");
    let behavior = if read_only {
        TransactionBehavior::Deferred
    } else {
        TransactionBehavior::Immediate
    };
    let tx = conn
        .transaction_with_behavior(behavior)
        .map_err(|e| conflict_or_infra(e, "begin transaction"))?;

    match f(&tx) {
        Ok(out) => {
            if read_only {
                tx.rollback().context("end read-only transaction")?;
            } else {
                tx.commit()
                    .map_err(|e| conflict_or_infra(e, "commit transaction"))?;
            }
            Ok(out)
        }
        Err(err) => {
            // Dropping the transaction rolls it back; no state is persisted.
            drop(tx);
            Err(err)
        }
    }
}

/// A busy database is a lost race with a concurrent writer and retryable;
/// everything else is an infrastructure failure.
fn conflict_or_infra(err: rusqlite::Error, what: &'static str) -> ServiceError {
    if let rusqlite::Error::SqliteFailure(failure, _) = &err
        && failure.code == rusqlite::ErrorCode::DatabaseBusy
    {
        return DomainError::StorageConflict.into();
    }
    ServiceError::Infra(anyhow::Error::new(err).context(what))
}

fn open_db(path: &Path) -> Result<Connection> {
    let conn =
        Connection::open(path).with_context(|| format!("open sqlite {}", path.display()))?;
    conn.busy_timeout(Duration::from_secs(5))
        .context("set sqlite busy_timeout")?;
    conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA foreign_keys = ON;")
        .context("configure sqlite pragmas")?;
    Ok(conn)
}

fn migrate(conn: &Connection, schema: &str) -> Result<()> {
    let version: i32 = conn
        .query_row("PRAGMA user_version", [], |row| row.get(0))
        .context("read user_version")?;
    anyhow::ensure!(
        version <= SCHEMA_VERSION,
        "store schema version {version} is newer than supported {SCHEMA_VERSION}"
    );

    conn.execute_batch(schema).context("create tables")?;
    conn.execute_batch(&format!("PRAGMA user_version = {SCHEMA_VERSION}"))
        .context("set user_version")?;
    Ok(())
}

const MAIN_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS vault (
  id INTEGER PRIMARY KEY CHECK (id = 0),
  record TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS markets (
  account_index INTEGER PRIMARY KEY,
  quote_asset TEXT NOT NULL,
  record TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS markets_quote_asset_idx ON markets(quote_asset);

CREATE TABLE IF NOT EXISTS trades (
  id TEXT PRIMARY KEY,
  quote_asset TEXT NOT NULL,
  status TEXT NOT NULL,
  accept_id TEXT,
  txid TEXT,
  record TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS trades_status_idx ON trades(status);
CREATE INDEX IF NOT EXISTS trades_quote_asset_idx ON trades(quote_asset);
CREATE INDEX IF NOT EXISTS trades_accept_id_idx ON trades(accept_id);
CREATE INDEX IF NOT EXISTS trades_txid_idx ON trades(txid);
"#;

const UNSPENTS_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS unspents (
  txid TEXT NOT NULL,
  vout INTEGER NOT NULL,
  value INTEGER NOT NULL,
  asset TEXT NOT NULL,
  value_commitment TEXT NOT NULL,
  asset_commitment TEXT NOT NULL,
  script TEXT NOT NULL,
  nonce BLOB NOT NULL,
  range_proof BLOB NOT NULL,
  surjection_proof BLOB NOT NULL,
  address TEXT NOT NULL,
  confirmed INTEGER NOT NULL,
  spent INTEGER NOT NULL,
  locked INTEGER NOT NULL,
  locked_by TEXT,
  PRIMARY KEY (txid, vout)
);
CREATE INDEX IF NOT EXISTS unspents_address_idx ON unspents(address);
CREATE INDEX IF NOT EXISTS unspents_asset_idx ON unspents(asset);
CREATE INDEX IF NOT EXISTS unspents_spent_idx ON unspents(spent);
"#;

const PRICES_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS prices (
  account_index INTEGER PRIMARY KEY,
  base_price TEXT NOT NULL,
  quote_price TEXT NOT NULL
);
"#;
