use std::str::FromStr as _;
use std::time::Instant;

use rust_decimal::Decimal;
use tonic::{Request, Response, Status};

use crate::application::OperatorService;
use crate::application::operator_service::WithdrawMarketReq;
use crate::domain::{MarketPrice, Strategy, Trade};
use crate::grpc::reply;
use crate::proto::v1 as pb;

pub struct OperatorHandler {
    svc: OperatorService,
}

impl OperatorHandler {
    pub fn new(svc: OperatorService) -> Self {
        Self { svc }
    }
}

fn required_market(market: Option<pb::Market>) -> Result<pb::Market, Status> {
    market.ok_or_else(|| Status::invalid_argument("market is required"))
}

fn strategy_from_proto(strategy_type: i32) -> Result<Strategy, Status> {
    match pb::StrategyType::try_from(strategy_type) {
        Ok(pb::StrategyType::Balanced) => Ok(Strategy::Balanced),
        Ok(pb::StrategyType::Pluggable) => Ok(Strategy::Pluggable),
        _ => Err(Status::failed_precondition("strategy not supported")),
    }
}

fn decimal_field(value: &str, field: &str) -> Result<Decimal, Status> {
    Decimal::from_str(value)
        .map_err(|_| Status::invalid_argument(format!("{field} is not a valid decimal")))
}

fn swap_info(trade: &Trade) -> pb::SwapInfo {
    let (amount_p, asset_p, amount_r, asset_r) = trade
        .swap_request
        .as_ref()
        .map(|r| {
            (
                r.amount_to_send,
                r.asset_to_send.clone(),
                r.amount_to_receive,
                r.asset_to_receive.clone(),
            )
        })
        .unwrap_or_default();

    // The quote side is recorded on the trade; the base side is whichever
    // other asset the swap moves.
    let base_asset = if asset_p == trade.market_quote_asset {
        asset_r.clone()
    } else {
        asset_p.clone()
    };

    pb::SwapInfo {
        trade_id: trade.id.clone(),
        status: trade.status.as_str().to_string(),
        amount_p,
        asset_p,
        amount_r,
        asset_r,
        market: Some(pb::Market {
            base_asset,
            quote_asset: trade.market_quote_asset.clone(),
        }),
        market_fee_bps: trade.market_fee_bps,
        request_time_unix: trade.timestamp_request.unwrap_or_default(),
        accept_time_unix: trade.timestamp_accept.unwrap_or_default(),
        complete_time_unix: trade.timestamp_complete.unwrap_or_default(),
        expiry_time_unix: trade.timestamp_expire.unwrap_or_default(),
    }
}

#[tonic::async_trait]
impl pb::operator_service_server::OperatorService for OperatorHandler {
    async fn deposit_market(
        &self,
        request: Request<pb::DepositMarketRequest>,
    ) -> Result<Response<pb::DepositMarketReply>, Status> {
        let started = Instant::now();
        let market = request.into_inner().market.unwrap_or_default();
        let result = self
            .svc
            .deposit_market(&market.base_asset, &market.quote_asset)
            .map(|(address, blinding_key)| pb::DepositMarketReply {
                address,
                blinding_key,
            });
        reply("DepositMarket", started, result)
    }

    async fn deposit_fee_account(
        &self,
        _request: Request<pb::DepositFeeAccountRequest>,
    ) -> Result<Response<pb::DepositFeeAccountReply>, Status> {
        let started = Instant::now();
        let result = self
            .svc
            .deposit_fee_account()
            .map(|(address, blinding_key)| pb::DepositFeeAccountReply {
                address,
                blinding_key,
            });
        reply("DepositFeeAccount", started, result)
    }

    async fn open_market(
        &self,
        request: Request<pb::OpenMarketRequest>,
    ) -> Result<Response<pb::OpenMarketReply>, Status> {
        let started = Instant::now();
        let market = required_market(request.into_inner().market)?;
        let result = self
            .svc
            .open_market(&market.base_asset, &market.quote_asset)
            .map(|()| pb::OpenMarketReply {});
        reply("OpenMarket", started, result)
    }

    async fn close_market(
        &self,
        request: Request<pb::CloseMarketRequest>,
    ) -> Result<Response<pb::CloseMarketReply>, Status> {
        let started = Instant::now();
        let market = required_market(request.into_inner().market)?;
        let result = self
            .svc
            .close_market(&market.base_asset, &market.quote_asset)
            .map(|()| pb::CloseMarketReply {});
        reply("CloseMarket", started, result)
    }

    async fn update_market_price(
        &self,
        request: Request<pb::UpdateMarketPriceRequest>,
    ) -> Result<Response<pb::UpdateMarketPriceReply>, Status> {
        let started = Instant::now();
        let req = request.into_inner();
        let market = required_market(req.market)?;
        let price = req
            .price
            .ok_or_else(|| Status::invalid_argument("price is required"))?;
        let base_price = decimal_field(&price.base_price, "base_price")?;
        let quote_price = decimal_field(&price.quote_price, "quote_price")?;
        let price = match MarketPrice::new(base_price, quote_price) {
            Ok(price) => price,
            Err(e) => return reply("UpdateMarketPrice", started, Err(e.into())),
        };

        let result = self
            .svc
            .update_market_price(&market.base_asset, &market.quote_asset, price)
            .map(|()| pb::UpdateMarketPriceReply {});
        reply("UpdateMarketPrice", started, result)
    }

    async fn update_market_strategy(
        &self,
        request: Request<pb::UpdateMarketStrategyRequest>,
    ) -> Result<Response<pb::UpdateMarketStrategyReply>, Status> {
        let started = Instant::now();
        let req = request.into_inner();
        let market = required_market(req.market)?;
        let strategy = strategy_from_proto(req.strategy_type)?;
        let result = self
            .svc
            .update_market_strategy(&market.base_asset, &market.quote_asset, strategy)
            .map(|()| pb::UpdateMarketStrategyReply {});
        reply("UpdateMarketStrategy", started, result)
    }

    async fn update_market_fee(
        &self,
        request: Request<pb::UpdateMarketFeeRequest>,
    ) -> Result<Response<pb::UpdateMarketFeeReply>, Status> {
        let started = Instant::now();
        let req = request.into_inner();
        let market = required_market(req.market)?;
        let result = self
            .svc
            .update_market_fee(&market.base_asset, &market.quote_asset, req.fee_bps)
            .map(|updated| pb::UpdateMarketFeeReply {
                market: Some(pb::Market {
                    base_asset: updated.base_asset,
                    quote_asset: updated.quote_asset,
                }),
                fee_bps: updated.fee_bps,
            });
        reply("UpdateMarketFee", started, result)
    }

    async fn list_market(
        &self,
        _request: Request<pb::ListMarketRequest>,
    ) -> Result<Response<pb::ListMarketReply>, Status> {
        let started = Instant::now();
        let result = self.svc.list_market().map(|markets| pb::ListMarketReply {
            markets: markets
                .iter()
                .map(crate::grpc::trade::market_info)
                .collect(),
        });
        reply("ListMarket", started, result)
    }

    async fn list_swaps(
        &self,
        _request: Request<pb::ListSwapsRequest>,
    ) -> Result<Response<pb::ListSwapsReply>, Status> {
        let started = Instant::now();
        let result = self.svc.list_swaps().map(|trades| pb::ListSwapsReply {
            swaps: trades.iter().map(swap_info).collect(),
        });
        reply("ListSwaps", started, result)
    }

    async fn fee_account_balance(
        &self,
        _request: Request<pb::FeeAccountBalanceRequest>,
    ) -> Result<Response<pb::FeeAccountBalanceReply>, Status> {
        let started = Instant::now();
        let result = self
            .svc
            .fee_account_balance()
            .map(|balance| pb::FeeAccountBalanceReply { balance });
        reply("FeeAccountBalance", started, result)
    }

    async fn withdraw_market(
        &self,
        request: Request<pb::WithdrawMarketRequest>,
    ) -> Result<Response<pb::WithdrawMarketReply>, Status> {
        let started = Instant::now();
        let req = request.into_inner();
        let market = required_market(req.market)?;
        let balance = req.balance_to_withdraw.unwrap_or_default();
        let result = self
            .svc
            .withdraw_market_funds(WithdrawMarketReq {
                base_asset: market.base_asset,
                quote_asset: market.quote_asset,
                base_amount: balance.base_amount,
                quote_amount: balance.quote_amount,
                millisat_per_byte: req.millisat_per_byte,
                address: req.address,
                push: req.push,
            })
            .await
            .map(|(tx_hex, txid)| pb::WithdrawMarketReply {
                tx_hex,
                txid: txid.unwrap_or_default(),
            });
        reply("WithdrawMarket", started, result)
    }

    async fn get_collected_market_fee(
        &self,
        request: Request<pb::GetCollectedMarketFeeRequest>,
    ) -> Result<Response<pb::GetCollectedMarketFeeReply>, Status> {
        let started = Instant::now();
        let market = required_market(request.into_inner().market)?;
        let result = self
            .svc
            .get_collected_market_fee(&market.base_asset, &market.quote_asset)
            .map(|fees| pb::GetCollectedMarketFeeReply {
                collected_fees: fees
                    .into_iter()
                    .map(|f| pb::CollectedFee {
                        trade_id: f.trade_id,
                        amount: f.amount,
                        asset: f.asset,
                        fee_bps: f.fee_bps,
                    })
                    .collect(),
            });
        reply("GetCollectedMarketFee", started, result)
    }

    async fn list_market_external_addresses(
        &self,
        request: Request<pb::ListMarketExternalAddressesRequest>,
    ) -> Result<Response<pb::ListMarketExternalAddressesReply>, Status> {
        let started = Instant::now();
        let market = required_market(request.into_inner().market)?;
        let result = self
            .svc
            .list_market_external_addresses(&market.base_asset, &market.quote_asset)
            .map(|addresses| pb::ListMarketExternalAddressesReply { addresses });
        reply("ListMarketExternalAddresses", started, result)
    }
}
