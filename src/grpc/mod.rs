pub mod operator;
pub mod trade;
pub mod wallet;

use std::time::Instant;

use tonic::{Response, Status};

use crate::error::{DomainError, ServiceError};

pub use operator::OperatorHandler;
pub use trade::TradeHandler;
pub use wallet::WalletHandler;

pub fn status_from(err: ServiceError) -> Status {
    match err {
        ServiceError::Domain(e) => {
            let message = e.to_string();
            match e {
                DomainError::InvalidBaseAsset
                | DomainError::InvalidQuoteAsset
                | DomainError::InvalidAmount
                | DomainError::PriceOutOfRange => Status::invalid_argument(message),
                DomainError::MarketNotExist => Status::not_found(message),
                DomainError::WrongPassphrase => Status::unauthenticated(message),
                DomainError::MarketAlreadyExists | DomainError::MnemonicAlreadySet => {
                    Status::already_exists(message)
                }
                DomainError::StorageConflict | DomainError::ExplorerUnavailable(_) => {
                    Status::unavailable(message)
                }
                DomainError::MarketIsClosed
                | DomainError::WalletLocked
                | DomainError::InsufficientFunds
                | DomainError::InsufficientLiquidity
                | DomainError::AmountTooLow
                | DomainError::NumericOverflow
                | DomainError::StrategyNotSupported
                | DomainError::InvalidTradeTransition { .. }
                | DomainError::SwapFailed(_) => Status::failed_precondition(message),
            }
        }
        ServiceError::Infra(e) => Status::internal(format!("{e:#}")),
    }
}

/// Wrap a service result into a gRPC reply, logging method, elapsed time
/// and status the way the daemon logs every unary call.
pub(crate) fn reply<T>(
    method: &'static str,
    started: Instant,
    result: Result<T, ServiceError>,
) -> Result<Response<T>, Status> {
    let elapsed_ms = started.elapsed().as_millis() as u64;
    match result {
        Ok(value) => {
            tracing::info!(method, elapsed_ms, code = "Ok", "rpc");
            Ok(Response::new(value))
        }
        Err(err) => {
            let status = status_from(err);
            tracing::warn!(method, elapsed_ms, code = ?status.code(), message = status.message(), "rpc");
            Err(status)
        }
    }
}
