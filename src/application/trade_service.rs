use std::str::FromStr as _;

use lwk_wollet::elements::AssetId;
use uuid::Uuid;

use crate::application::{AppContext, blinding_pubkey_from_hex, now_unix, script_from_hex};
use crate::domain::trade::{BlindingKeyMap, SwapAccept, SwapComplete, SwapFail, SwapRequest};
use crate::domain::vault::{Change, FEE_ACCOUNT};
use crate::domain::{Market, Trade, TradeStatus, Unspent};
use crate::engine::{self, Side};
use crate::error::{DomainError, ServiceError};
use crate::explorer::coin::select_unspents;
use crate::storage::{market_repo, trade_repo, unspent_repo};
use crate::swap::{self, Recipient};

/// Flat network fee the daemon attaches to a swap transaction, paid from
/// the fee account.
const SWAP_FEE_SATS: u64 = 500;

/// Result of a proposal: either the counter-signed acceptance with its
/// completion deadline, or the in-band failure payload.
pub enum ProposeOutcome {
    Accept { accept: SwapAccept, expiry_unix: u64 },
    Fail(SwapFail),
}

pub enum CompleteOutcome {
    Txid(String),
    Fail(SwapFail),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarketBalance {
    pub base: u64,
    pub quote: u64,
}

/// Trader-facing swap negotiation.
#[derive(Clone)]
pub struct TradeService {
    ctx: AppContext,
}

impl TradeService {
    pub fn new(ctx: AppContext) -> Self {
        Self { ctx }
    }

    pub fn get_tradable_markets(&self) -> Result<Vec<Market>, ServiceError> {
        let markets = self.ctx.db.run_main(true, |tx| Ok(market_repo::all(tx)?))?;
        markets
            .into_iter()
            .filter(|m| m.tradable)
            .map(|m| self.ctx.overlay_price(m))
            .collect()
    }

    pub fn get_market_balance(
        &self,
        base_asset: &str,
        quote_asset: &str,
    ) -> Result<(MarketBalance, u32), ServiceError> {
        let market = self.ctx.market_by_pair(base_asset, quote_asset)?;
        let funds = self.ctx.market_funds(&market)?;
        Ok((
            MarketBalance {
                base: funds.base,
                quote: funds.quote,
            },
            market.fee_bps,
        ))
    }

    /// Preview the quote-side amount for a base-denominated trade.
    pub fn get_market_price(
        &self,
        base_asset: &str,
        quote_asset: &str,
        side: Side,
        amount: u64,
    ) -> Result<engine::Preview, ServiceError> {
        let market = self.ctx.market_by_pair(base_asset, quote_asset)?;
        if !market.tradable {
            return Err(DomainError::MarketIsClosed.into());
        }
        let funds = self.ctx.market_funds(&market)?;
        Ok(engine::preview(&market, &funds, side, amount)?)
    }

    /// Negotiate a swap: verify the economics and the proposer transaction,
    /// lock funding, counter-sign, and accept. Verification failures come
    /// back in-band as SwapFail and leave the trade Failed; infrastructure
    /// failures abort without persisting.
    pub fn trade_propose(
        &self,
        base_asset: &str,
        quote_asset: &str,
        side: Side,
        request: SwapRequest,
    ) -> Result<ProposeOutcome, ServiceError> {
        let market = self.ctx.market_by_pair(base_asset, quote_asset)?;
        let now = now_unix();

        let mut trade = Trade::new(Uuid::new_v4().to_string());
        trade.propose(request.clone(), &market.quote_asset, now)?;
        trade.market_fee_bps = market.fee_bps;
        trade.fee_asset = market.fee_asset.clone();

        match self.try_accept(&market, side, &request, &trade.id) {
            Ok((accept, fee_amount)) => {
                trade.fee_amount = fee_amount;
                trade.accept(accept.clone(), now_unix())?;
                self.ctx
                    .db
                    .run_main(false, |tx| Ok(trade_repo::upsert(tx, &trade)?))?;
                tracing::info!(trade_id = %trade.id, accept_id = %accept.id, "trade accepted");
                Ok(ProposeOutcome::Accept {
                    accept,
                    expiry_unix: now_unix() + self.ctx.config.trade_expiry_secs,
                })
            }
            Err(ServiceError::Domain(reason)) => {
                self.unlock_trade(&trade.id)?;
                let fail = trade.fail(&reason)?;
                self.ctx
                    .db
                    .run_main(false, |tx| Ok(trade_repo::upsert(tx, &trade)?))?;
                tracing::info!(trade_id = %trade.id, reason = %reason, "trade proposal rejected");
                Ok(ProposeOutcome::Fail(fail))
            }
            Err(infra) => {
                self.unlock_trade(&trade.id)?;
                Err(infra)
            }
        }
    }

    fn try_accept(
        &self,
        market: &Market,
        side: Side,
        request: &SwapRequest,
        trade_id: &str,
    ) -> Result<(SwapAccept, u64), ServiceError> {
        if !market.tradable {
            return Err(DomainError::MarketIsClosed.into());
        }

        // The request's asset pair must be the market pair, oriented by the
        // declared trade side.
        let expected = match side {
            Side::Sell => (market.base_asset.as_str(), market.quote_asset.as_str()),
            Side::Buy => (market.quote_asset.as_str(), market.base_asset.as_str()),
        };
        if (request.asset_to_send.as_str(), request.asset_to_receive.as_str()) != expected {
            return Err(DomainError::SwapFailed(
                "asset pair does not match the trade type for this market".to_string(),
            )
            .into());
        }

        let base_amount = match side {
            Side::Sell => request.amount_to_send,
            Side::Buy => request.amount_to_receive,
        };
        let proposed_quote = match side {
            Side::Sell => request.amount_to_receive,
            Side::Buy => request.amount_to_send,
        };

        let funds = self.ctx.market_funds(market)?;
        let preview = engine::preview(market, &funds, side, base_amount)?;

        let deviation = engine::slippage_bps(preview.amount, proposed_quote);
        if deviation > self.ctx.config.slippage_bps as u64 {
            return Err(DomainError::SwapFailed(format!(
                "proposed price deviates {deviation} bps from the market price"
            ))
            .into());
        }

        let mut pset = swap::parse_pset(&request.psbt_base64)?;
        swap::verify_proposal(&pset, request)?;

        // Fund the daemon side and reserve the coins under this trade.
        let (selected, change, fee_selected, fee_change) = self.select_and_lock(
            market,
            &request.asset_to_receive,
            request.amount_to_receive,
            trade_id,
        )?;

        let receive_addr = self
            .ctx
            .derive_and_observe(market.account_index, Change::External)?;
        let send_asset = AssetId::from_str(&request.asset_to_send)
            .map_err(|e| ServiceError::Infra(anyhow::anyhow!("parse asset: {e}")))?;
        let receive_back_asset = AssetId::from_str(&request.asset_to_receive)
            .map_err(|e| ServiceError::Infra(anyhow::anyhow!("parse asset: {e}")))?;
        let policy_asset = AssetId::from_str(&self.ctx.config.base_asset)
            .map_err(|e| ServiceError::Infra(anyhow::anyhow!("parse base asset: {e}")))?;

        let mut recipients = vec![Recipient {
            script: script_from_hex(&receive_addr.script_hex)?,
            blinding_pubkey: Some(blinding_pubkey_from_hex(
                &receive_addr.blinding_private_key,
            )?),
            asset: send_asset,
            amount: request.amount_to_send,
        }];
        if change > 0 {
            let change_addr = self
                .ctx
                .derive_and_observe(market.account_index, Change::Internal)?;
            recipients.push(Recipient {
                script: script_from_hex(&change_addr.script_hex)?,
                blinding_pubkey: Some(blinding_pubkey_from_hex(
                    &change_addr.blinding_private_key,
                )?),
                asset: receive_back_asset,
                amount: change,
            });
        }
        if fee_change > 0 {
            let fee_change_addr = self.ctx.derive_and_observe(FEE_ACCOUNT, Change::Internal)?;
            recipients.push(Recipient {
                script: script_from_hex(&fee_change_addr.script_hex)?,
                blinding_pubkey: Some(blinding_pubkey_from_hex(
                    &fee_change_addr.blinding_private_key,
                )?),
                asset: policy_asset,
                amount: fee_change,
            });
        }

        let mut all_selected = selected;
        all_selected.extend(fee_selected);
        let inputs = self.ctx.daemon_inputs(&all_selected)?;

        swap::complete_transfer(
            &mut pset,
            &inputs,
            &recipients,
            SWAP_FEE_SATS,
            policy_asset,
            &request.input_blinding_keys,
        )
        .map_err(ServiceError::Infra)?;

        let mut input_blinding_keys = BlindingKeyMap::new();
        for input in &inputs {
            input_blinding_keys.insert(
                input.unspent.script.clone(),
                hex::encode(input.blinding_key.secret_bytes()),
            );
        }
        let mut output_blinding_keys = BlindingKeyMap::new();
        for recipient in &recipients {
            let script_hex = hex::encode(recipient.script.as_bytes());
            if let Some(key) = self
                .ctx
                .with_vault(|v| Ok(v.blinding_key_by_script(&script_hex)))?
            {
                output_blinding_keys.insert(script_hex, key);
            }
        }

        let accept = SwapAccept {
            id: Uuid::new_v4().to_string(),
            request_id: request.id.clone(),
            psbt_base64: swap::pset_to_base64(&pset),
            input_blinding_keys,
            output_blinding_keys,
        };

        Ok((accept, preview.fee_amount))
    }

    /// Coin-select the daemon funding plus the network fee and lock both
    /// sets atomically under the trade id. Contending proposals serialize on
    /// the unspents scope; the loser sees the winner's locks.
    fn select_and_lock(
        &self,
        market: &Market,
        asset: &str,
        amount: u64,
        trade_id: &str,
    ) -> Result<(Vec<Unspent>, u64, Vec<Unspent>, u64), ServiceError> {
        let market_addresses = self
            .ctx
            .with_vault(|v| Ok(v.all_derived_addresses(market.account_index)))?;
        let fee_addresses = self
            .ctx
            .with_vault(|v| Ok(v.all_derived_addresses(FEE_ACCOUNT)))?;
        let base_asset = self.ctx.config.base_asset.clone();
        let asset = asset.to_string();
        let trade_id = trade_id.to_string();

        self.ctx.db.run_unspents(false, |tx| {
            let market_unspents = unspent_repo::by_addresses(tx, &market_addresses)?;
            let (mut selected, change) = select_unspents(&market_unspents, amount, &asset)?;

            let fee_unspents = unspent_repo::by_addresses(tx, &fee_addresses)?;
            let (mut fee_selected, fee_change) =
                select_unspents(&fee_unspents, SWAP_FEE_SATS, &base_asset)?;

            for u in selected.iter_mut().chain(fee_selected.iter_mut()) {
                u.lock(&trade_id)?;
                unspent_repo::upsert(tx, u)?;
            }

            Ok((selected, change, fee_selected, fee_change))
        })
    }

    fn unlock_trade(&self, trade_id: &str) -> Result<(), ServiceError> {
        self.ctx.db.run_unspents(false, |tx| {
            for mut u in unspent_repo::locked_by_trade(tx, trade_id)? {
                u.unlock();
                unspent_repo::upsert(tx, &u)?;
            }
            Ok(())
        })
    }

    /// Finalize an accepted swap: all inputs must be signed; the transaction
    /// is extracted, optionally broadcast, and the locked coins become
    /// spent.
    pub async fn trade_complete(
        &self,
        complete: SwapComplete,
        push: bool,
    ) -> Result<CompleteOutcome, ServiceError> {
        let trade = self
            .ctx
            .db
            .run_main(true, |tx| Ok(trade_repo::by_accept_id(tx, &complete.accept_id)?))?;

        let Some(mut trade) = trade else {
            return Ok(CompleteOutcome::Fail(SwapFail {
                id: Uuid::new_v4().to_string(),
                message_id: complete.id.clone(),
                failure_code: DomainError::SwapFailed(String::new()).failure_code(),
                failure_message: "no accepted trade for this swap".to_string(),
            }));
        };

        if trade.status != TradeStatus::Accepted {
            let reason = DomainError::SwapFailed(format!(
                "trade is {} and cannot complete",
                trade.status.as_str()
            ));
            return self.fail_trade(trade, reason);
        }

        let mut pset = match swap::parse_pset(&complete.psbt_base64) {
            Ok(pset) => pset,
            Err(reason) => return self.fail_trade(trade, reason),
        };
        if let Err(reason) = swap::verify_inputs_signed(&pset) {
            return self.fail_trade(trade, reason);
        }

        let tx = swap::finalize_and_extract(&mut pset).map_err(ServiceError::Infra)?;
        let txid = tx.txid().to_string();

        if push {
            self.ctx
                .explorer
                .broadcast(&swap::tx_hex(&tx))
                .await
                .map_err(|e| DomainError::ExplorerUnavailable(format!("{e:#}")))?;
        }

        let trade_id = trade.id.clone();
        self.ctx.db.run_unspents(false, |dbtx| {
            for mut u in unspent_repo::locked_by_trade(dbtx, &trade_id)? {
                u.mark_spent();
                unspent_repo::upsert(dbtx, &u)?;
            }
            Ok(())
        })?;

        trade.complete(complete, &txid, now_unix())?;
        self.ctx
            .db
            .run_main(false, |tx| Ok(trade_repo::upsert(tx, &trade)?))?;
        tracing::info!(trade_id = %trade.id, %txid, push, "trade completed");

        Ok(CompleteOutcome::Txid(txid))
    }

    fn fail_trade(
        &self,
        mut trade: Trade,
        reason: DomainError,
    ) -> Result<CompleteOutcome, ServiceError> {
        self.unlock_trade(&trade.id)?;
        let fail = trade.fail(&reason)?;
        self.ctx
            .db
            .run_main(false, |tx| Ok(trade_repo::upsert(tx, &trade)?))?;
        tracing::info!(trade_id = %trade.id, reason = %reason, "trade failed");
        Ok(CompleteOutcome::Fail(fail))
    }
}
