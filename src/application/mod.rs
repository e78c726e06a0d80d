pub mod operator_service;
pub mod trade_service;
pub mod wallet_service;

use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::watch;

use lwk_wollet::elements::secp256k1_zkp;
use lwk_wollet::elements::Script;

use crate::config::Config;
use crate::crawler::{Crawler, Observable};
use crate::domain::asset::is_valid_asset;
use crate::domain::{Market, TradeStatus, Unspent, Vault};
use crate::engine::MarketFunds;
use crate::error::{DomainError, ServiceError};
use crate::explorer::Explorer;
use crate::storage::{DbManager, market_repo, price_repo, trade_repo, unspent_repo, vault_repo};
use crate::swap::DaemonInput;

pub use operator_service::OperatorService;
pub use trade_service::TradeService;
pub use wallet_service::WalletService;

/// Everything the services share. The vault is the only piece of state held
/// in memory: its clear mnemonic must never touch the stores.
#[derive(Clone)]
pub struct AppContext {
    pub db: Arc<DbManager>,
    pub explorer: Arc<dyn Explorer>,
    pub crawler: Arc<Crawler>,
    pub config: Arc<Config>,
    pub vault: Arc<Mutex<Option<Vault>>>,
}

impl AppContext {
    /// Build the context, loading the (locked) vault if one was persisted.
    pub fn load(
        db: Arc<DbManager>,
        explorer: Arc<dyn Explorer>,
        crawler: Arc<Crawler>,
        config: Arc<Config>,
    ) -> Result<Self, ServiceError> {
        let vault = db.run_main(true, |tx| Ok(vault_repo::get(tx)?))?;
        Ok(Self {
            db,
            explorer,
            crawler,
            config,
            vault: Arc::new(Mutex::new(vault)),
        })
    }

    /// Register crawler observables for every address the vault has ever
    /// derived.
    pub fn observe_known_addresses(&self) {
        let vault = self.vault.lock().expect("vault mutex poisoned");
        if let Some(vault) = vault.as_ref() {
            for (address, info) in &vault.account_and_key_by_address {
                self.crawler.observe(Observable {
                    address: address.clone(),
                    blinding_key: info.blinding_key.clone(),
                });
            }
        }
    }

    /// Run `f` with the initialized vault.
    pub(crate) fn with_vault<T>(
        &self,
        f: impl FnOnce(&Vault) -> Result<T, ServiceError>,
    ) -> Result<T, ServiceError> {
        let guard = self.vault.lock().expect("vault mutex poisoned");
        let vault = guard.as_ref().ok_or(DomainError::WalletLocked)?;
        f(vault)
    }

    /// Run `f` with the vault mutably and persist it afterwards.
    pub(crate) fn with_vault_mut<T>(
        &self,
        f: impl FnOnce(&mut Vault) -> Result<T, ServiceError>,
    ) -> Result<T, ServiceError> {
        let mut guard = self.vault.lock().expect("vault mutex poisoned");
        let vault = guard.as_mut().ok_or(DomainError::WalletLocked)?;
        let out = f(vault)?;
        let snapshot = vault.clone();
        drop(guard);
        self.db.run_main(false, |tx| Ok(vault_repo::put(tx, &snapshot)?))?;
        Ok(out)
    }

    /// Derive the next address of an account, persist the vault and start
    /// observing the address.
    pub(crate) fn derive_and_observe(
        &self,
        account_index: u32,
        change: crate::domain::vault::Change,
    ) -> Result<crate::domain::vault::DerivedAddress, ServiceError> {
        let params = self.config.address_params();
        let derived =
            self.with_vault_mut(|vault| vault.derive_next_address(account_index, change, params))?;
        self.crawler.observe(Observable {
            address: derived.address.clone(),
            blinding_key: derived.blinding_private_key.clone(),
        });
        Ok(derived)
    }

    /// Sum of confirmed, unlocked, unspent values per market side.
    pub(crate) fn market_funds(&self, market: &Market) -> Result<MarketFunds, ServiceError> {
        let addresses =
            self.with_vault(|vault| Ok(vault.all_derived_addresses(market.account_index)))?;
        let unspents = self
            .db
            .run_unspents(true, |tx| Ok(unspent_repo::by_addresses(tx, &addresses)?))?;

        let mut funds = MarketFunds::default();
        for u in unspents.iter().filter(|u| u.is_available()) {
            if u.asset == market.base_asset {
                funds.base += u.value;
            } else if u.asset == market.quote_asset {
                funds.quote += u.value;
            }
        }
        Ok(funds)
    }

    /// Available balance of one asset on one account.
    pub(crate) fn account_balance(
        &self,
        account_index: u32,
        asset: &str,
    ) -> Result<u64, ServiceError> {
        let addresses = self.with_vault(|vault| Ok(vault.all_derived_addresses(account_index)))?;
        let unspents = self
            .db
            .run_unspents(true, |tx| Ok(unspent_repo::by_addresses(tx, &addresses)?))?;
        Ok(unspents
            .iter()
            .filter(|u| u.is_available() && u.asset == asset)
            .map(|u| u.value)
            .sum())
    }

    pub(crate) fn validate_pair(
        &self,
        base_asset: &str,
        quote_asset: &str,
    ) -> Result<(), DomainError> {
        if !is_valid_asset(base_asset) || base_asset != self.config.base_asset {
            return Err(DomainError::InvalidBaseAsset);
        }
        if !is_valid_asset(quote_asset) {
            return Err(DomainError::InvalidQuoteAsset);
        }
        Ok(())
    }

    /// Resolve a validated pair to its market, with the stored price
    /// overlaid from the price scope.
    pub(crate) fn market_by_pair(
        &self,
        base_asset: &str,
        quote_asset: &str,
    ) -> Result<Market, ServiceError> {
        self.validate_pair(base_asset, quote_asset)?;
        let market = self
            .db
            .run_main(true, |tx| Ok(market_repo::by_quote_asset(tx, quote_asset)?))?
            .ok_or(DomainError::MarketNotExist)?;
        self.overlay_price(market)
    }

    pub(crate) fn overlay_price(&self, mut market: Market) -> Result<Market, ServiceError> {
        if let Some(price) = self
            .db
            .run_prices(true, |tx| Ok(price_repo::get(tx, market.account_index)?))?
        {
            market.price = price;
        }
        Ok(market)
    }

    /// Pair each selected unspent with its blinding and signing keys.
    pub(crate) fn daemon_inputs(
        &self,
        selected: &[Unspent],
    ) -> Result<Vec<DaemonInput>, ServiceError> {
        self.with_vault(|vault| {
            let mut inputs = Vec::with_capacity(selected.len());
            for u in selected {
                let info = vault.address_info(&u.address).cloned().ok_or_else(|| {
                    ServiceError::Infra(anyhow::anyhow!("no vault entry for address {}", u.address))
                })?;
                let signing_key = vault.signing_key_by_script(&u.script)?.ok_or_else(|| {
                    ServiceError::Infra(anyhow::anyhow!("no signing key for script {}", u.script))
                })?;
                let blinding_bytes = hex::decode(&info.blinding_key).map_err(|e| {
                    ServiceError::Infra(anyhow::anyhow!("decode blinding key: {e}"))
                })?;
                let blinding_key = secp256k1_zkp::SecretKey::from_slice(&blinding_bytes)
                    .map_err(|e| ServiceError::Infra(anyhow::anyhow!("parse blinding key: {e}")))?;
                inputs.push(DaemonInput {
                    unspent: u.clone(),
                    blinding_key,
                    signing_key,
                });
            }
            Ok(inputs)
        })
    }
}

pub(crate) fn script_from_hex(script_hex: &str) -> Result<Script, ServiceError> {
    let bytes = hex::decode(script_hex)
        .map_err(|e| ServiceError::Infra(anyhow::anyhow!("decode script: {e}")))?;
    Ok(Script::from(bytes))
}

pub(crate) fn blinding_pubkey_from_hex(
    blinding_private_key: &str,
) -> Result<secp256k1_zkp::PublicKey, ServiceError> {
    let bytes = hex::decode(blinding_private_key)
        .map_err(|e| ServiceError::Infra(anyhow::anyhow!("decode blinding key: {e}")))?;
    let sk = secp256k1_zkp::SecretKey::from_slice(&bytes)
        .map_err(|e| ServiceError::Infra(anyhow::anyhow!("parse blinding key: {e}")))?;
    let secp = secp256k1_zkp::Secp256k1::new();
    Ok(secp256k1_zkp::PublicKey::from_secret_key(&secp, &sk))
}

pub fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_secs()
}

/// Background worker expiring accepted trades that outlived the completion
/// window and releasing unspent locks held by terminal trades.
pub fn spawn_trade_sweeper(ctx: AppContext, mut stop: watch::Receiver<bool>) {
    let poll = Duration::from_secs((ctx.config.trade_expiry_secs / 10).max(1));
    tokio::spawn(async move {
        loop {
            let sweep_ctx = ctx.clone();
            let result =
                tokio::task::spawn_blocking(move || sweep_once(&sweep_ctx, now_unix())).await;
            match result {
                Ok(Ok(())) => {}
                Ok(Err(err)) => {
                    tracing::warn!(error = %format!("{err:#}"), "trade sweeper failed")
                }
                Err(err) => tracing::warn!(error = %err, "trade sweeper join failed"),
            }

            tokio::select! {
                _ = stop.changed() => {
                    if *stop.borrow() {
                        return;
                    }
                }
                _ = tokio::time::sleep(poll) => {}
            }
            if *stop.borrow() {
                return;
            }
        }
    });
}

pub fn sweep_once(ctx: &AppContext, now: u64) -> Result<(), ServiceError> {
    let expiry_secs = ctx.config.trade_expiry_secs;

    let expired: Vec<String> = ctx.db.run_main(false, |tx| {
        let mut expired = Vec::new();
        for mut trade in trade_repo::by_status(tx, TradeStatus::Accepted)? {
            if trade.is_expired_at(now, expiry_secs) {
                trade.expire(now)?;
                trade_repo::upsert(tx, &trade)?;
                tracing::info!(trade_id = %trade.id, "trade expired");
                expired.push(trade.id);
            }
        }
        Ok(expired)
    })?;

    // Locks belong to live trades only: release everything held by a trade
    // that expired above or already reached a terminal state.
    let lock_owners: Vec<(String, u32, String)> = ctx.db.run_unspents(true, |tx| {
        Ok(unspent_repo::all_locked(tx)?
            .into_iter()
            .filter_map(|u| {
                u.locked_by
                    .clone()
                    .map(|owner| (u.txid.clone(), u.vout, owner))
            })
            .collect())
    })?;

    let mut to_unlock = Vec::new();
    for (txid, vout, owner) in lock_owners {
        let release = if expired.contains(&owner) {
            true
        } else {
            ctx.db.run_main(true, |tx| {
                Ok(trade_repo::get(tx, &owner)?
                    .map(|t| t.status.is_terminal())
                    .unwrap_or(true))
            })?
        };
        if release {
            to_unlock.push((txid, vout));
        }
    }

    if !to_unlock.is_empty() {
        ctx.db.run_unspents(false, |tx| {
            for (txid, vout) in &to_unlock {
                if let Some(mut u) = unspent_repo::get(tx, txid, *vout)?
                    && u.locked
                {
                    u.unlock();
                    unspent_repo::upsert(tx, &u)?;
                }
            }
            Ok(())
        })?;
    }

    Ok(())
}
