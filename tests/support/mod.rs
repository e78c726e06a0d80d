use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context as _, Result};
use async_trait::async_trait;
use liquid_lpd::application::{AppContext, OperatorService, TradeService, WalletService};
use liquid_lpd::config::Config;
use liquid_lpd::crawler::Crawler;
use liquid_lpd::domain::Unspent;
use liquid_lpd::explorer::{Explorer, ExplorerUtxo};
use liquid_lpd::storage::{DbManager, unspent_repo};
use tempfile::TempDir;
use tokio::sync::watch;

pub const TEST_MNEMONIC: &str = "abandon abandon abandon abandon abandon abandon abandon \
                                 abandon abandon abandon abandon about";
pub const TEST_PASSPHRASE: &str = "Sup3rS3cr3tP4ssw0rd!";

/// A quote asset used across tests.
pub const TEST_QUOTE_ASSET: &str =
    "d090c403610fe8a9e31967355929833bc8a8fe08429e630162d1ecbf29fdf28b";

/// In-process explorer double; the crawler and broadcast paths read from it.
#[derive(Default)]
pub struct MockExplorer {
    pub utxos: Mutex<HashMap<String, Vec<ExplorerUtxo>>>,
    pub broadcasts: Mutex<Vec<String>>,
}

#[async_trait]
impl Explorer for MockExplorer {
    async fn faucet(&self, _address: &str) -> Result<String> {
        Ok("00".repeat(32))
    }

    async fn mint(&self, _address: &str, _amount: u64) -> Result<(String, String)> {
        Ok(("11".repeat(32), TEST_QUOTE_ASSET.to_string()))
    }

    async fn get_unspents(&self, address: &str) -> Result<Vec<ExplorerUtxo>> {
        Ok(self
            .utxos
            .lock()
            .expect("utxos mutex poisoned")
            .get(address)
            .cloned()
            .unwrap_or_default())
    }

    async fn get_transaction_hex(&self, txid: &str) -> Result<String> {
        anyhow::bail!("no transaction {txid} in mock explorer")
    }

    async fn broadcast(&self, tx_hex: &str) -> Result<String> {
        self.broadcasts
            .lock()
            .expect("broadcasts mutex poisoned")
            .push(tx_hex.to_string());
        Ok("22".repeat(32))
    }
}

pub struct Harness {
    pub ctx: AppContext,
    pub wallet: WalletService,
    pub operator: OperatorService,
    pub trade: TradeService,
    pub explorer: Arc<MockExplorer>,
    pub base_asset: String,
    _stop: watch::Sender<bool>,
    _tmp: TempDir,
}

pub fn harness() -> Result<Harness> {
    let tmp = tempfile::tempdir().context("create tempdir")?;
    let mut config = Config::regtest(tmp.path().join("db"));
    // Keep crawler ticks out of the way; tests seed the stores directly.
    config.crawler_interval_ms = 3_600_000;
    let config = Arc::new(config);

    let db = Arc::new(DbManager::open(&config.datadir).context("open stores")?);
    let explorer = Arc::new(MockExplorer::default());
    let (stop_tx, stop_rx) = watch::channel(false);
    let crawler = Crawler::new(
        db.clone(),
        explorer.clone(),
        Duration::from_millis(config.crawler_interval_ms),
        stop_rx,
    );

    let ctx = AppContext::load(db, explorer.clone(), crawler, config.clone())
        .map_err(|e| anyhow::anyhow!("load context: {e}"))?;
    let base_asset = config.base_asset.clone();

    Ok(Harness {
        wallet: WalletService::new(ctx.clone()),
        operator: OperatorService::new(ctx.clone()),
        trade: TradeService::new(ctx.clone()),
        ctx,
        explorer,
        base_asset,
        _stop: stop_tx,
        _tmp: tmp,
    })
}

pub fn init_wallet(h: &Harness) -> Result<()> {
    h.wallet
        .init_or_restore_wallet(TEST_MNEMONIC, TEST_PASSPHRASE)
        .map_err(|e| anyhow::anyhow!("init wallet: {e}"))
}

/// Store a confirmed, already unblinded unspent on an address the vault
/// derived.
pub fn seed_unspent(
    h: &Harness,
    address: &str,
    asset: &str,
    value: u64,
    txid_byte: u8,
) -> Result<Unspent> {
    let script = {
        let guard = h.ctx.vault.lock().expect("vault mutex poisoned");
        let vault = guard.as_ref().context("vault not initialized")?;
        vault
            .address_info(address)
            .context("address not derived by vault")?
            .script_hex
            .clone()
    };

    let unspent = Unspent {
        txid: hex::encode([txid_byte; 32]),
        vout: 0,
        value,
        asset: asset.to_string(),
        value_commitment: String::new(),
        asset_commitment: String::new(),
        script,
        nonce: Vec::new(),
        range_proof: Vec::new(),
        surjection_proof: Vec::new(),
        address: address.to_string(),
        confirmed: true,
        spent: false,
        locked: false,
        locked_by: None,
    };

    h.ctx
        .db
        .run_unspents(false, |tx| Ok(unspent_repo::upsert(tx, &unspent)?))
        .map_err(|e| anyhow::anyhow!("seed unspent: {e}"))?;
    Ok(unspent)
}
