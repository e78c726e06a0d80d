use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Maps script hex -> blinding private key hex for the inputs/outputs a
/// party contributed to the swap transaction.
pub type BlindingKeyMap = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapRequest {
    pub id: String,
    pub asset_to_send: String,
    pub amount_to_send: u64,
    pub asset_to_receive: String,
    pub amount_to_receive: u64,
    pub psbt_base64: String,
    pub input_blinding_keys: BlindingKeyMap,
    pub output_blinding_keys: BlindingKeyMap,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapAccept {
    pub id: String,
    pub request_id: String,
    pub psbt_base64: String,
    pub input_blinding_keys: BlindingKeyMap,
    pub output_blinding_keys: BlindingKeyMap,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapComplete {
    pub id: String,
    pub accept_id: String,
    pub psbt_base64: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwapFail {
    pub id: String,
    pub message_id: String,
    pub failure_code: u32,
    pub failure_message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeStatus {
    Empty,
    Proposal,
    Accepted,
    Completed,
    Settled,
    Expired,
    Failed,
}

impl TradeStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TradeStatus::Settled | TradeStatus::Expired | TradeStatus::Failed
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TradeStatus::Empty => "empty",
            TradeStatus::Proposal => "proposal",
            TradeStatus::Accepted => "accepted",
            TradeStatus::Completed => "completed",
            TradeStatus::Settled => "settled",
            TradeStatus::Expired => "expired",
            TradeStatus::Failed => "failed",
        }
    }
}

/// One swap negotiation, retained for audit after reaching a terminal state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub id: String,
    pub market_quote_asset: String,
    pub proposer_pubkey: Option<String>,
    pub status: TradeStatus,
    pub swap_request: Option<SwapRequest>,
    pub swap_accept: Option<SwapAccept>,
    pub swap_complete: Option<SwapComplete>,
    pub swap_fail: Option<SwapFail>,
    pub psbt_base64: String,
    pub txid: Option<String>,
    /// Fee collected by the market on this swap, in the market's fee asset.
    pub fee_amount: u64,
    pub fee_asset: String,
    pub market_fee_bps: u32,
    pub timestamp_request: Option<u64>,
    pub timestamp_accept: Option<u64>,
    pub timestamp_complete: Option<u64>,
    pub timestamp_expire: Option<u64>,
}

impl Trade {
    pub fn new(id: String) -> Self {
        Self {
            id,
            market_quote_asset: String::new(),
            proposer_pubkey: None,
            status: TradeStatus::Empty,
            swap_request: None,
            swap_accept: None,
            swap_complete: None,
            swap_fail: None,
            psbt_base64: String::new(),
            txid: None,
            fee_amount: 0,
            fee_asset: String::new(),
            market_fee_bps: 0,
            timestamp_request: None,
            timestamp_accept: None,
            timestamp_complete: None,
            timestamp_expire: None,
        }
    }

    fn transition(&self, from: TradeStatus, to: TradeStatus) -> Result<(), DomainError> {
        if self.status != from {
            return Err(DomainError::InvalidTradeTransition {
                from: self.status.as_str().to_string(),
                to: to.as_str().to_string(),
            });
        }
        Ok(())
    }

    pub fn propose(
        &mut self,
        request: SwapRequest,
        market_quote_asset: &str,
        now: u64,
    ) -> Result<(), DomainError> {
        self.transition(TradeStatus::Empty, TradeStatus::Proposal)?;
        self.market_quote_asset = market_quote_asset.to_string();
        self.psbt_base64 = request.psbt_base64.clone();
        self.swap_request = Some(request);
        self.timestamp_request = Some(now);
        self.status = TradeStatus::Proposal;
        Ok(())
    }

    pub fn accept(&mut self, accept: SwapAccept, now: u64) -> Result<(), DomainError> {
        self.transition(TradeStatus::Proposal, TradeStatus::Accepted)?;
        self.psbt_base64 = accept.psbt_base64.clone();
        self.swap_accept = Some(accept);
        self.timestamp_accept = Some(now);
        self.status = TradeStatus::Accepted;
        Ok(())
    }

    pub fn complete(
        &mut self,
        complete: SwapComplete,
        txid: &str,
        now: u64,
    ) -> Result<(), DomainError> {
        self.transition(TradeStatus::Accepted, TradeStatus::Completed)?;
        self.psbt_base64 = complete.psbt_base64.clone();
        self.swap_complete = Some(complete);
        self.txid = Some(txid.to_string());
        self.timestamp_complete = Some(now);
        self.status = TradeStatus::Completed;
        Ok(())
    }

    /// Record on-chain inclusion of the swap transaction.
    pub fn settle(&mut self) -> Result<(), DomainError> {
        self.transition(TradeStatus::Completed, TradeStatus::Settled)?;
        self.status = TradeStatus::Settled;
        Ok(())
    }

    pub fn expire(&mut self, now: u64) -> Result<(), DomainError> {
        self.transition(TradeStatus::Accepted, TradeStatus::Expired)?;
        self.timestamp_expire = Some(now);
        self.status = TradeStatus::Expired;
        Ok(())
    }

    /// Any non-terminal trade can fail; the reason is kept on the record and
    /// mirrored to the proposer as a SwapFail payload.
    pub fn fail(&mut self, reason: &DomainError) -> Result<SwapFail, DomainError> {
        if self.status.is_terminal() {
            return Err(DomainError::InvalidTradeTransition {
                from: self.status.as_str().to_string(),
                to: TradeStatus::Failed.as_str().to_string(),
            });
        }
        let message_id = self
            .swap_request
            .as_ref()
            .map(|r| r.id.clone())
            .unwrap_or_default();
        let fail = SwapFail {
            id: uuid::Uuid::new_v4().to_string(),
            message_id,
            failure_code: reason.failure_code(),
            failure_message: reason.to_string(),
        };
        self.swap_fail = Some(fail.clone());
        self.status = TradeStatus::Failed;
        Ok(fail)
    }

    /// Whether an accepted trade has outlived the completion window.
    pub fn is_expired_at(&self, now: u64, expiry_secs: u64) -> bool {
        self.status == TradeStatus::Accepted
            && self
                .timestamp_accept
                .is_some_and(|accepted| now.saturating_sub(accepted) > expiry_secs)
    }
}
