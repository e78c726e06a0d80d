use std::time::Instant;

use tonic::{Request, Response, Status};

use crate::application::trade_service::{CompleteOutcome, ProposeOutcome};
use crate::application::TradeService;
use crate::domain::trade::{SwapAccept, SwapComplete, SwapFail, SwapRequest};
use crate::domain::Market;
use crate::engine::Side;
use crate::error::DomainError;
use crate::grpc::reply;
use crate::proto::v1 as pb;

pub struct TradeHandler {
    svc: TradeService,
}

impl TradeHandler {
    pub fn new(svc: TradeService) -> Self {
        Self { svc }
    }
}

fn required_market(market: Option<pb::Market>) -> Result<pb::Market, Status> {
    market.ok_or_else(|| Status::invalid_argument("market is required"))
}

fn side_from_proto(trade_type: i32) -> Result<Side, Status> {
    match pb::TradeType::try_from(trade_type) {
        Ok(pb::TradeType::Buy) => Ok(Side::Buy),
        Ok(pb::TradeType::Sell) => Ok(Side::Sell),
        _ => Err(Status::invalid_argument("type must be BUY or SELL")),
    }
}

pub(crate) fn market_info(market: &Market) -> pb::MarketInfo {
    pb::MarketInfo {
        market: Some(pb::Market {
            base_asset: market.base_asset.clone(),
            quote_asset: market.quote_asset.clone(),
        }),
        fee_bps: market.fee_bps,
        tradable: market.tradable,
        strategy_type: match market.strategy {
            crate::domain::Strategy::Balanced => pb::StrategyType::Balanced as i32,
            crate::domain::Strategy::Pluggable => pb::StrategyType::Pluggable as i32,
        },
    }
}

fn swap_request_from_proto(msg: pb::SwapRequest) -> SwapRequest {
    SwapRequest {
        id: msg.id,
        asset_to_send: msg.asset_to_send,
        amount_to_send: msg.amount_to_send,
        asset_to_receive: msg.asset_to_receive,
        amount_to_receive: msg.amount_to_receive,
        psbt_base64: msg.psbt_base64,
        input_blinding_keys: msg.input_blinding_keys.into_iter().collect(),
        output_blinding_keys: msg.output_blinding_keys.into_iter().collect(),
    }
}

fn swap_accept_to_proto(msg: SwapAccept) -> pb::SwapAccept {
    pb::SwapAccept {
        id: msg.id,
        request_id: msg.request_id,
        psbt_base64: msg.psbt_base64,
        input_blinding_keys: msg.input_blinding_keys.into_iter().collect(),
        output_blinding_keys: msg.output_blinding_keys.into_iter().collect(),
    }
}

pub(crate) fn swap_fail_to_proto(msg: SwapFail) -> pb::SwapFail {
    pb::SwapFail {
        id: msg.id,
        message_id: msg.message_id,
        failure_code: msg.failure_code,
        failure_message: msg.failure_message,
    }
}

#[tonic::async_trait]
impl pb::trade_service_server::TradeService for TradeHandler {
    async fn markets(
        &self,
        _request: Request<pb::MarketsRequest>,
    ) -> Result<Response<pb::MarketsReply>, Status> {
        let started = Instant::now();
        let result = self.svc.get_tradable_markets().map(|markets| pb::MarketsReply {
            markets: markets.iter().map(market_info).collect(),
        });
        reply("Markets", started, result)
    }

    async fn balances(
        &self,
        request: Request<pb::BalancesRequest>,
    ) -> Result<Response<pb::BalancesReply>, Status> {
        let started = Instant::now();
        let market = required_market(request.into_inner().market)?;
        let result = self
            .svc
            .get_market_balance(&market.base_asset, &market.quote_asset)
            .map(|(balance, fee_bps)| pb::BalancesReply {
                balance: Some(pb::Balance {
                    base_amount: balance.base,
                    quote_amount: balance.quote,
                }),
                fee_bps,
            });
        reply("Balances", started, result)
    }

    async fn market_price(
        &self,
        request: Request<pb::MarketPriceRequest>,
    ) -> Result<Response<pb::MarketPriceReply>, Status> {
        let started = Instant::now();
        let req = request.into_inner();
        let market = required_market(req.market)?;
        let side = side_from_proto(req.r#type)?;
        let result = self
            .svc
            .get_market_price(&market.base_asset, &market.quote_asset, side, req.amount)
            .map(|preview| pb::MarketPriceReply {
                price: Some(pb::Price {
                    base_price: preview.price.base_price.to_string(),
                    quote_price: preview.price.quote_price.to_string(),
                }),
                amount: preview.amount,
                asset: preview.asset,
            });
        reply("MarketPrice", started, result)
    }

    async fn trade_propose(
        &self,
        request: Request<pb::TradeProposeRequest>,
    ) -> Result<Response<pb::TradeProposeReply>, Status> {
        let started = Instant::now();
        let req = request.into_inner();
        let market = required_market(req.market)?;
        let side = side_from_proto(req.r#type)?;
        let swap_request = req
            .swap_request
            .map(swap_request_from_proto)
            .ok_or_else(|| Status::invalid_argument("swap_request is required"))?;

        // Counter-signing and blinding are CPU-bound; keep them off the
        // async executor.
        let svc = self.svc.clone();
        let result = tokio::task::spawn_blocking(move || {
            svc.trade_propose(&market.base_asset, &market.quote_asset, side, swap_request)
        })
        .await
        .map_err(|e| Status::internal(format!("join: {e}")))?;

        let result = result.map(|outcome| match outcome {
            ProposeOutcome::Accept { accept, expiry_unix } => pb::TradeProposeReply {
                swap_accept: Some(swap_accept_to_proto(accept)),
                swap_fail: None,
                expiry_time_unix: expiry_unix,
            },
            ProposeOutcome::Fail(fail) => pb::TradeProposeReply {
                swap_accept: None,
                swap_fail: Some(swap_fail_to_proto(fail)),
                expiry_time_unix: 0,
            },
        });
        reply("TradePropose", started, result)
    }

    async fn trade_complete(
        &self,
        request: Request<pb::TradeCompleteRequest>,
    ) -> Result<Response<pb::TradeCompleteReply>, Status> {
        let started = Instant::now();
        let req = request.into_inner();
        let complete = req
            .swap_complete
            .ok_or_else(|| Status::invalid_argument("swap_complete is required"))?;
        if complete.psbt_base64.is_empty() {
            return Err(status_invalid_swap_complete());
        }

        let complete = SwapComplete {
            id: complete.id,
            accept_id: complete.accept_id,
            psbt_base64: complete.psbt_base64,
        };
        let result = self
            .svc
            .trade_complete(complete, req.push)
            .await
            .map(|outcome| match outcome {
                CompleteOutcome::Txid(txid) => pb::TradeCompleteReply {
                    txid,
                    swap_fail: None,
                },
                CompleteOutcome::Fail(fail) => pb::TradeCompleteReply {
                    txid: String::new(),
                    swap_fail: Some(swap_fail_to_proto(fail)),
                },
            });
        reply("TradeComplete", started, result)
    }
}

fn status_invalid_swap_complete() -> Status {
    let err = DomainError::SwapFailed("swap_complete carries no transaction".to_string());
    Status::invalid_argument(err.to_string())
}
