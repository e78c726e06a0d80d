use thiserror::Error;

/// Domain failures that surface to callers with a stable reason. Anything
/// infrastructural (storage, explorer I/O, cryptography plumbing) travels as
/// `anyhow::Error` and aborts the enclosing transaction instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    #[error("invalid base asset")]
    InvalidBaseAsset,
    #[error("invalid quote asset")]
    InvalidQuoteAsset,
    #[error("market does not exist")]
    MarketNotExist,
    #[error("market is closed")]
    MarketIsClosed,
    #[error("market already exists")]
    MarketAlreadyExists,
    #[error("wallet is locked")]
    WalletLocked,
    #[error("wrong passphrase")]
    WrongPassphrase,
    #[error("mnemonic is already set")]
    MnemonicAlreadySet,
    #[error("insufficient funds")]
    InsufficientFunds,
    #[error("insufficient liquidity")]
    InsufficientLiquidity,
    #[error("invalid amount")]
    InvalidAmount,
    #[error("amount is below the dust threshold")]
    AmountTooLow,
    #[error("numeric overflow")]
    NumericOverflow,
    #[error("strategy not supported")]
    StrategyNotSupported,
    #[error("price is out of range")]
    PriceOutOfRange,
    #[error("trade transition not allowed: {from} -> {to}")]
    InvalidTradeTransition { from: String, to: String },
    #[error("swap failed: {0}")]
    SwapFailed(String),
    /// A store transaction lost to a concurrent writer; safe to retry.
    #[error("storage conflict, retry the operation")]
    StorageConflict,
    /// The explorer could not be reached; safe to retry.
    #[error("explorer unavailable: {0}")]
    ExplorerUnavailable(String),
}

impl DomainError {
    /// Stable numeric code carried by SwapFail payloads.
    pub fn failure_code(&self) -> u32 {
        match self {
            DomainError::InvalidBaseAsset => 1,
            DomainError::InvalidQuoteAsset => 2,
            DomainError::MarketNotExist => 3,
            DomainError::MarketIsClosed => 4,
            DomainError::MarketAlreadyExists => 5,
            DomainError::WalletLocked => 10,
            DomainError::WrongPassphrase => 11,
            DomainError::MnemonicAlreadySet => 12,
            DomainError::InsufficientFunds => 20,
            DomainError::InsufficientLiquidity => 21,
            DomainError::InvalidAmount => 22,
            DomainError::AmountTooLow => 23,
            DomainError::NumericOverflow => 24,
            DomainError::StrategyNotSupported => 30,
            DomainError::PriceOutOfRange => 31,
            DomainError::InvalidTradeTransition { .. } => 40,
            DomainError::SwapFailed(_) => 41,
            DomainError::StorageConflict => 50,
            DomainError::ExplorerUnavailable(_) => 51,
        }
    }
}

/// Error type returned by the application services: either a typed domain
/// failure or an opaque infrastructure error.
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Infra(#[from] anyhow::Error),
}

impl ServiceError {
    pub fn as_domain(&self) -> Option<&DomainError> {
        match self {
            ServiceError::Domain(e) => Some(e),
            ServiceError::Infra(_) => None,
        }
    }
}
