use std::str::FromStr as _;

use lwk_wollet::elements::{Address, AssetId};

use crate::application::{AppContext, blinding_pubkey_from_hex, script_from_hex};
use crate::domain::vault::{Change, FEE_ACCOUNT};
use crate::domain::{Market, MarketPrice, Strategy, Trade, TradeStatus};
use crate::error::{DomainError, ServiceError};
use crate::explorer::coin::select_unspents;
use crate::storage::{market_repo, price_repo, trade_repo, unspent_repo};
use crate::swap::{Recipient, build_transfer, finalize_and_extract, tx_hex};

/// Opening a market requires the fee account to hold at least this much of
/// the base asset to pay network fees with.
const MIN_FEE_ACCOUNT_BALANCE: u64 = 100_000_000;

/// Flat network fee used when the caller does not supply a fee rate.
const DEFAULT_WITHDRAW_FEE_SATS: u64 = 500;

/// Rough size of a two-in four-out confidential transaction, used to turn a
/// millisat/byte rate into a flat fee.
const WITHDRAW_TX_SIZE_ESTIMATE: u64 = 2_500;

#[derive(Debug, Clone)]
pub struct WithdrawMarketReq {
    pub base_asset: String,
    pub quote_asset: String,
    pub base_amount: u64,
    pub quote_amount: u64,
    pub millisat_per_byte: u64,
    pub address: String,
    pub push: bool,
}

#[derive(Debug, Clone)]
pub struct CollectedFee {
    pub trade_id: String,
    pub amount: u64,
    pub asset: String,
    pub fee_bps: u32,
}

/// Operator-facing market administration.
#[derive(Clone)]
pub struct OperatorService {
    ctx: AppContext,
}

impl OperatorService {
    pub fn new(ctx: AppContext) -> Self {
        Self { ctx }
    }

    /// Derive a deposit address. With an empty pair a brand new market
    /// account is created; with a valid pair the existing market account is
    /// extended by one address.
    pub fn deposit_market(
        &self,
        base_asset: &str,
        quote_asset: &str,
    ) -> Result<(String, String), ServiceError> {
        let account_index = if base_asset.is_empty() && quote_asset.is_empty() {
            let account = self.ctx.with_vault(|v| Ok(v.next_market_account()))?;
            let market = Market::new(
                account,
                &self.ctx.config.base_asset,
                self.ctx.config.default_fee_bps,
            )?;
            self.ctx
                .db
                .run_main(false, |tx| Ok(market_repo::upsert(tx, &market)?))?;
            account
        } else {
            self.ctx.market_by_pair(base_asset, quote_asset)?.account_index
        };

        let derived = self.ctx.derive_and_observe(account_index, Change::External)?;
        Ok((derived.address, derived.blinding_private_key))
    }

    pub fn deposit_fee_account(&self) -> Result<(String, String), ServiceError> {
        let derived = self.ctx.derive_and_observe(FEE_ACCOUNT, Change::External)?;
        Ok((derived.address, derived.blinding_private_key))
    }

    /// Make a market tradable. The market is funded from the unspents
    /// observed on its account if the quote asset is not yet bound.
    pub fn open_market(&self, base_asset: &str, quote_asset: &str) -> Result<(), ServiceError> {
        self.ctx.validate_pair(base_asset, quote_asset)?;

        let fee_balance = self
            .ctx
            .account_balance(FEE_ACCOUNT, &self.ctx.config.base_asset)?;
        if fee_balance < MIN_FEE_ACCOUNT_BALANCE {
            return Err(DomainError::InsufficientFunds.into());
        }

        let existing = self
            .ctx
            .db
            .run_main(true, |tx| Ok(market_repo::by_quote_asset(tx, quote_asset)?))?;

        let mut market = match existing {
            Some(market) => market,
            None => self
                .find_fundable_market(quote_asset)?
                .ok_or(DomainError::MarketNotExist)?,
        };

        if !market.is_funded() {
            let assets = self.account_assets(market.account_index)?;
            market.fund(&assets)?;
            if market.quote_asset != quote_asset {
                return Err(DomainError::MarketNotExist.into());
            }
        }

        market = self.ctx.overlay_price(market)?;
        market.make_tradable()?;
        self.ctx
            .db
            .run_main(false, |tx| Ok(market_repo::upsert(tx, &market)?))?;
        tracing::info!(quote_asset = %market.quote_asset, account = market.account_index, "market opened");
        Ok(())
    }

    /// Newest market account that has no quote asset bound yet but holds
    /// deposits of the base asset and exactly one other.
    fn find_fundable_market(&self, quote_asset: &str) -> Result<Option<Market>, ServiceError> {
        let markets = self.ctx.db.run_main(true, |tx| Ok(market_repo::all(tx)?))?;
        for market in markets.into_iter().rev().filter(|m| !m.is_funded()) {
            let assets = self.account_assets(market.account_index)?;
            if assets.iter().any(|a| a == quote_asset)
                && assets.iter().any(|a| *a == self.ctx.config.base_asset)
            {
                return Ok(Some(market));
            }
        }
        Ok(None)
    }

    fn account_assets(&self, account_index: u32) -> Result<Vec<String>, ServiceError> {
        let addresses = self
            .ctx
            .with_vault(|v| Ok(v.all_derived_addresses(account_index)))?;
        let unspents = self
            .ctx
            .db
            .run_unspents(true, |tx| Ok(unspent_repo::by_addresses(tx, &addresses)?))?;
        let mut assets: Vec<String> = unspents
            .iter()
            .filter(|u| u.is_available())
            .map(|u| u.asset.clone())
            .collect();
        assets.sort();
        assets.dedup();
        Ok(assets)
    }

    pub fn close_market(&self, base_asset: &str, quote_asset: &str) -> Result<(), ServiceError> {
        let mut market = self.ctx.market_by_pair(base_asset, quote_asset)?;
        market.make_not_tradable();
        self.ctx
            .db
            .run_main(false, |tx| Ok(market_repo::upsert(tx, &market)?))?;
        tracing::info!(quote_asset = %market.quote_asset, "market closed");
        Ok(())
    }

    pub fn update_market_price(
        &self,
        base_asset: &str,
        quote_asset: &str,
        price: MarketPrice,
    ) -> Result<(), ServiceError> {
        let market = self.ctx.market_by_pair(base_asset, quote_asset)?;
        // Bounds were enforced by MarketPrice::new on construction.
        self.ctx
            .db
            .run_prices(false, |tx| Ok(price_repo::set(tx, market.account_index, &price)?))?;
        Ok(())
    }

    pub fn update_market_strategy(
        &self,
        base_asset: &str,
        quote_asset: &str,
        strategy: Strategy,
    ) -> Result<(), ServiceError> {
        let mut market = self.ctx.market_by_pair(base_asset, quote_asset)?;
        market.change_strategy(strategy)?;
        self.ctx
            .db
            .run_main(false, |tx| Ok(market_repo::upsert(tx, &market)?))?;
        Ok(())
    }

    pub fn update_market_fee(
        &self,
        base_asset: &str,
        quote_asset: &str,
        fee_bps: u32,
    ) -> Result<Market, ServiceError> {
        let mut market = self.ctx.market_by_pair(base_asset, quote_asset)?;
        market.change_fee(fee_bps)?;
        self.ctx
            .db
            .run_main(false, |tx| Ok(market_repo::upsert(tx, &market)?))?;
        Ok(market)
    }

    pub fn list_market(&self) -> Result<Vec<Market>, ServiceError> {
        let markets = self.ctx.db.run_main(true, |tx| Ok(market_repo::all(tx)?))?;
        markets
            .into_iter()
            .map(|m| self.ctx.overlay_price(m))
            .collect()
    }

    pub fn list_swaps(&self) -> Result<Vec<Trade>, ServiceError> {
        // Only trades that made it past Empty are swaps worth reporting.
        Ok(self
            .ctx
            .db
            .run_main(true, |tx| Ok(trade_repo::all(tx)?))?
            .into_iter()
            .filter(|t| t.swap_request.is_some())
            .collect())
    }

    pub fn fee_account_balance(&self) -> Result<i64, ServiceError> {
        let balance = self
            .ctx
            .account_balance(FEE_ACCOUNT, &self.ctx.config.base_asset)?;
        Ok(balance as i64)
    }

    pub fn get_collected_market_fee(
        &self,
        base_asset: &str,
        quote_asset: &str,
    ) -> Result<Vec<CollectedFee>, ServiceError> {
        let market = self.ctx.market_by_pair(base_asset, quote_asset)?;
        let trades = self
            .ctx
            .db
            .run_main(true, |tx| Ok(trade_repo::by_market(tx, &market.quote_asset)?))?;

        Ok(trades
            .into_iter()
            .filter(|t| matches!(t.status, TradeStatus::Completed | TradeStatus::Settled))
            .map(|t| CollectedFee {
                trade_id: t.id.clone(),
                amount: t.fee_amount,
                asset: t.fee_asset.clone(),
                fee_bps: t.market_fee_bps,
            })
            .collect())
    }

    pub fn list_market_external_addresses(
        &self,
        base_asset: &str,
        quote_asset: &str,
    ) -> Result<Vec<String>, ServiceError> {
        let market = self.ctx.market_by_pair(base_asset, quote_asset)?;
        self.ctx
            .with_vault(|v| Ok(v.all_derived_external_addresses(market.account_index)))
    }

    /// Move funds out of a market to an external address. The transaction is
    /// returned as hex and optionally pushed through the explorer.
    pub async fn withdraw_market_funds(
        &self,
        req: WithdrawMarketReq,
    ) -> Result<(String, Option<String>), ServiceError> {
        let market = self.ctx.market_by_pair(&req.base_asset, &req.quote_asset)?;
        if req.base_amount == 0 && req.quote_amount == 0 {
            return Err(DomainError::InvalidAmount.into());
        }

        let params = self.ctx.config.address_params();
        let destination = Address::parse_with_params(&req.address, params)
            .map_err(|e| ServiceError::Infra(anyhow::anyhow!("parse address: {e}")))?;

        let fee = if req.millisat_per_byte == 0 {
            DEFAULT_WITHDRAW_FEE_SATS
        } else {
            (req.millisat_per_byte * WITHDRAW_TX_SIZE_ESTIMATE) / 1_000
        };

        let market_addresses = self
            .ctx
            .with_vault(|v| Ok(v.all_derived_addresses(market.account_index)))?;
        let fee_addresses = self.ctx.with_vault(|v| Ok(v.all_derived_addresses(FEE_ACCOUNT)))?;
        let (market_unspents, fee_unspents) = self.ctx.db.run_unspents(true, |tx| {
            Ok((
                unspent_repo::by_addresses(tx, &market_addresses)?,
                unspent_repo::by_addresses(tx, &fee_addresses)?,
            ))
        })?;

        let mut selected = Vec::new();
        let mut recipients = Vec::new();

        let dest_blinder = destination.blinding_pubkey;
        let base_id = AssetId::from_str(&market.base_asset)
            .map_err(|e| ServiceError::Infra(anyhow::anyhow!("parse base asset: {e}")))?;
        let quote_id = AssetId::from_str(&market.quote_asset)
            .map_err(|e| ServiceError::Infra(anyhow::anyhow!("parse quote asset: {e}")))?;

        for (asset_id, asset, amount) in [
            (base_id, market.base_asset.clone(), req.base_amount),
            (quote_id, market.quote_asset.clone(), req.quote_amount),
        ] {
            if amount == 0 {
                continue;
            }
            let (coins, change) = select_unspents(&market_unspents, amount, &asset)?;
            selected.extend(coins);
            recipients.push(Recipient {
                script: destination.script_pubkey(),
                blinding_pubkey: dest_blinder,
                asset: asset_id,
                amount,
            });
            if change > 0 {
                let change_addr = self
                    .ctx
                    .derive_and_observe(market.account_index, Change::Internal)?;
                recipients.push(Recipient {
                    script: script_from_hex(&change_addr.script_hex)?,
                    blinding_pubkey: Some(blinding_pubkey_from_hex(
                        &change_addr.blinding_private_key,
                    )?),
                    asset: asset_id,
                    amount: change,
                });
            }
        }

        // Network fee comes out of the fee account.
        let (fee_coins, fee_change) =
            select_unspents(&fee_unspents, fee, &self.ctx.config.base_asset)?;
        selected.extend(fee_coins);
        if fee_change > 0 {
            let change_addr = self.ctx.derive_and_observe(FEE_ACCOUNT, Change::Internal)?;
            recipients.push(Recipient {
                script: script_from_hex(&change_addr.script_hex)?,
                blinding_pubkey: Some(blinding_pubkey_from_hex(
                    &change_addr.blinding_private_key,
                )?),
                asset: base_id,
                amount: fee_change,
            });
        }

        let inputs = self.ctx.daemon_inputs(&selected)?;
        let mut pset = build_transfer(&inputs, &recipients, fee, base_id)
            .map_err(ServiceError::Infra)?;
        let tx = finalize_and_extract(&mut pset).map_err(ServiceError::Infra)?;
        let hex = tx_hex(&tx);

        let txid = if req.push {
            let txid = self
                .explorer_broadcast(&hex)
                .await
                .map_err(|e| DomainError::ExplorerUnavailable(format!("{e:#}")))?;
            self.ctx.db.run_unspents(false, |dbtx| {
                for u in &selected {
                    if let Some(mut stored) = unspent_repo::get(dbtx, &u.txid, u.vout)? {
                        stored.mark_spent();
                        unspent_repo::upsert(dbtx, &stored)?;
                    }
                }
                Ok(())
            })?;
            tracing::info!(%txid, "withdraw transaction broadcast");
            Some(txid)
        } else {
            None
        };

        Ok((hex, txid))
    }

    async fn explorer_broadcast(&self, hex: &str) -> anyhow::Result<String> {
        self.ctx.explorer.broadcast(hex).await
    }
}
