use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context as _, Result};
use lwk_wollet::elements::secp256k1_zkp;
use lwk_wollet::elements::{Transaction, encode};
use tokio::sync::watch;

use crate::domain::Unspent;
use crate::explorer::{Explorer, ExplorerUtxo};
use crate::storage::{DbManager, trade_repo, unspent_repo};

/// An address the crawler watches, with the blinding key needed to reveal
/// amounts of outputs received on it.
#[derive(Debug, Clone)]
pub struct Observable {
    pub address: String,
    pub blinding_key: String,
}

/// Maintains the unspent set as ground truth over an eventually consistent
/// explorer. One polling task per observable; writes to the unspent store
/// are serialized per observable, and readers only ever see committed ticks.
pub struct Crawler {
    db: Arc<DbManager>,
    explorer: Arc<dyn Explorer>,
    interval: Duration,
    stop: watch::Receiver<bool>,
    observed: Mutex<HashSet<String>>,
}

/// Backoff cap: transient explorer failures double the poll delay up to this
/// many intervals.
const MAX_BACKOFF_INTERVALS: u32 = 32;

impl Crawler {
    pub fn new(
        db: Arc<DbManager>,
        explorer: Arc<dyn Explorer>,
        interval: Duration,
        stop: watch::Receiver<bool>,
    ) -> Arc<Self> {
        Arc::new(Self {
            db,
            explorer,
            interval,
            stop,
            observed: Mutex::new(HashSet::new()),
        })
    }

    /// Start watching an address. Observing the same address twice is a
    /// no-op.
    pub fn observe(self: &Arc<Self>, observable: Observable) {
        {
            let mut observed = self.observed.lock().expect("observed mutex poisoned");
            if !observed.insert(observable.address.clone()) {
                return;
            }
        }
        let crawler = self.clone();
        tokio::spawn(async move {
            crawler.run_observable(observable).await;
        });
    }

    async fn run_observable(self: Arc<Self>, observable: Observable) {
        let mut stop = self.stop.clone();
        let mut failures: u32 = 0;
        let mut unblind_warned = false;

        tracing::debug!(address = %observable.address, "observing address");

        loop {
            let backoff = 2u32.saturating_pow(failures.min(5)).min(MAX_BACKOFF_INTERVALS);
            let delay = self.interval * backoff;

            tokio::select! {
                _ = stop.changed() => {
                    if *stop.borrow() {
                        tracing::debug!(address = %observable.address, "stopping observable");
                        return;
                    }
                }
                _ = tokio::time::sleep(delay) => {}
            }
            if *stop.borrow() {
                return;
            }

            match self.tick(&observable, &mut unblind_warned).await {
                Ok(()) => failures = 0,
                Err(err) => {
                    failures = failures.saturating_add(1);
                    tracing::warn!(
                        address = %observable.address,
                        error = %format!("{err:#}"),
                        failures,
                        "crawler tick failed"
                    );
                }
            }
        }
    }

    async fn tick(&self, observable: &Observable, unblind_warned: &mut bool) -> Result<()> {
        let fetched = self
            .explorer
            .get_unspents(&observable.address)
            .await
            .context("fetch unspents")?;

        // Diff against the store to find outputs we have not seen yet and
        // stored outputs that disappeared (spent).
        let db = self.db.clone();
        let address = observable.address.clone();
        let fetched_for_diff = fetched.clone();
        let (new_utxos, spent_keys) = tokio::task::spawn_blocking(move || {
            db.run_unspents(true, |tx| {
                let stored = unspent_repo::by_address(tx, &address)?;
                let fetched_keys: HashSet<(String, u32)> = fetched_for_diff
                    .iter()
                    .map(|u| (u.txid.clone(), u.vout))
                    .collect();
                let stored_keys: HashSet<(String, u32)> =
                    stored.iter().map(|u| (u.txid.clone(), u.vout)).collect();

                let new_utxos: Vec<ExplorerUtxo> = fetched_for_diff
                    .iter()
                    .filter(|u| !stored_keys.contains(&(u.txid.clone(), u.vout)))
                    .cloned()
                    .collect();
                let spent_keys: Vec<(String, u32)> = stored
                    .iter()
                    .filter(|u| !u.spent && !fetched_keys.contains(&(u.txid.clone(), u.vout)))
                    .map(|u| (u.txid.clone(), u.vout))
                    .collect();
                Ok((new_utxos, spent_keys))
            })
        })
        .await
        .context("join diff task")?
        .map_err(|e| anyhow::anyhow!("diff unspents: {e}"))?;

        // Attribute and unblind the new outputs.
        let mut attributed = Vec::new();
        for utxo in new_utxos {
            let tx_hex = self
                .explorer
                .get_transaction_hex(&utxo.txid)
                .await
                .with_context(|| format!("fetch tx {}", utxo.txid))?;
            match attribute_utxo(&utxo, &tx_hex, observable) {
                Ok(unspent) => attributed.push(unspent),
                Err(err) => {
                    if !*unblind_warned {
                        *unblind_warned = true;
                        tracing::warn!(
                            address = %observable.address,
                            txid = %utxo.txid,
                            vout = utxo.vout,
                            error = %format!("{err:#}"),
                            "skipping output that cannot be unblinded"
                        );
                    }
                }
            }
        }

        let db = self.db.clone();
        let settle_txids: Vec<String> = fetched.iter().map(|u| u.txid.clone()).collect();
        tokio::task::spawn_blocking(move || -> Result<(), crate::error::ServiceError> {
            db.run_unspents(false, |tx| {
                for unspent in &attributed {
                    unspent_repo::upsert(tx, unspent)?;
                }
                for (txid, vout) in &spent_keys {
                    if let Some(mut u) = unspent_repo::get(tx, txid, *vout)?
                        && !u.spent
                    {
                        u.mark_spent();
                        unspent_repo::upsert(tx, &u)?;
                    }
                }
                Ok(())
            })?;

            // Seeing a completed trade's transaction among the observed
            // outputs is the settlement signal.
            db.run_main(false, |tx| {
                for txid in &settle_txids {
                    if let Some(mut trade) = trade_repo::by_txid(tx, txid)?
                        && trade.status == crate::domain::TradeStatus::Completed
                    {
                        trade.settle()?;
                        trade_repo::upsert(tx, &trade)?;
                        tracing::info!(trade_id = %trade.id, txid = %txid, "trade settled");
                    }
                }
                Ok(())
            })?;

            Ok(())
        })
        .await
        .context("join store task")?
        .map_err(|e| anyhow::anyhow!("store tick results: {e}"))?;

        Ok(())
    }
}

/// Build the stored unspent for an observed output, unblinding it with the
/// observable's key when it is confidential.
fn attribute_utxo(
    utxo: &ExplorerUtxo,
    tx_hex: &str,
    observable: &Observable,
) -> Result<Unspent> {
    let tx_bytes = hex::decode(tx_hex).context("decode tx hex")?;
    let tx: Transaction = encode::deserialize(&tx_bytes).context("decode transaction")?;
    let prevout = tx
        .output
        .get(utxo.vout as usize)
        .with_context(|| format!("tx {} has no output {}", utxo.txid, utxo.vout))?;

    let script_hex = hex::encode(prevout.script_pubkey.as_bytes());

    let mut unspent = Unspent {
        txid: utxo.txid.clone(),
        vout: utxo.vout,
        value: 0,
        asset: String::new(),
        value_commitment: String::new(),
        asset_commitment: String::new(),
        script: script_hex,
        nonce: Vec::new(),
        range_proof: Vec::new(),
        surjection_proof: Vec::new(),
        address: observable.address.clone(),
        confirmed: utxo.confirmed,
        spent: false,
        locked: false,
        locked_by: None,
    };

    match (prevout.asset, prevout.value) {
        (
            lwk_wollet::elements::confidential::Asset::Explicit(asset),
            lwk_wollet::elements::confidential::Value::Explicit(value),
        ) => {
            unspent.asset = asset.to_string();
            unspent.value = value;
        }
        _ => {
            let asset_comm = prevout
                .asset
                .commitment()
                .context("confidential output without asset commitment")?;
            let value_comm = prevout
                .value
                .commitment()
                .context("confidential output without value commitment")?;
            let nonce_comm = prevout
                .nonce
                .commitment()
                .context("confidential output without nonce")?;

            unspent.asset_commitment = hex::encode(asset_comm.serialize());
            unspent.value_commitment = hex::encode(value_comm.serialize());
            unspent.nonce = nonce_comm.serialize().to_vec();
            unspent.range_proof = prevout
                .witness
                .rangeproof
                .as_ref()
                .map(|p| p.serialize())
                .unwrap_or_default();
            unspent.surjection_proof = prevout
                .witness
                .surjection_proof
                .as_ref()
                .map(|p| p.serialize())
                .unwrap_or_default();

            let key_bytes =
                hex::decode(&observable.blinding_key).context("decode blinding key")?;
            let blinding_key = secp256k1_zkp::SecretKey::from_slice(&key_bytes)
                .context("parse blinding key")?;
            let secp = secp256k1_zkp::Secp256k1::new();
            let secrets = prevout
                .unblind(&secp, blinding_key)
                .context("unblind output")?;

            unspent.asset = secrets.asset.to_string();
            unspent.value = secrets.value;
        }
    }

    Ok(unspent)
}
