use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::asset::{MAX_SATOSHI_PRICE, is_valid_asset};
use crate::error::DomainError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Constant-product pricing over the market's two-asset pool.
    Balanced,
    /// Operator-supplied fixed prices.
    Pluggable,
}

/// Prices of one unit of each side in terms of the other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct MarketPrice {
    pub base_price: Decimal,
    pub quote_price: Decimal,
}

impl MarketPrice {
    pub fn new(base_price: Decimal, quote_price: Decimal) -> Result<Self, DomainError> {
        let max = Decimal::from(MAX_SATOSHI_PRICE);
        for p in [base_price, quote_price] {
            if p <= Decimal::ZERO || p > max {
                return Err(DomainError::PriceOutOfRange);
            }
        }
        Ok(Self {
            base_price,
            quote_price,
        })
    }

    pub fn is_set(&self) -> bool {
        self.base_price > Decimal::ZERO && self.quote_price > Decimal::ZERO
    }
}

/// A trading pair funded by one vault account.
///
/// The quote asset is discovered from the first deposit: a market record is
/// created with only its account index and the process base asset, and is
/// funded once outputs of exactly one other asset are observed on the
/// account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Market {
    pub account_index: u32,
    pub base_asset: String,
    pub quote_asset: String,
    pub fee_bps: u32,
    /// Asset in which the market fee is accounted. Always the quote asset:
    /// previews are quote-denominated in both directions.
    pub fee_asset: String,
    pub tradable: bool,
    pub strategy: Strategy,
    /// Stored prices, authoritative for the Pluggable strategy. Kept in the
    /// high-frequency price scope, not on the market record itself.
    #[serde(default)]
    pub price: MarketPrice,
}

impl Market {
    pub fn new(account_index: u32, base_asset: &str, fee_bps: u32) -> Result<Self, DomainError> {
        if !is_valid_asset(base_asset) {
            return Err(DomainError::InvalidBaseAsset);
        }
        Ok(Self {
            account_index,
            base_asset: base_asset.to_string(),
            quote_asset: String::new(),
            fee_bps,
            fee_asset: String::new(),
            tradable: false,
            strategy: Strategy::Balanced,
            price: MarketPrice::default(),
        })
    }

    pub fn is_funded(&self) -> bool {
        !self.quote_asset.is_empty()
    }

    /// Bind the quote asset from the assets deposited on the market account.
    pub fn fund(&mut self, deposited_assets: &[String]) -> Result<(), DomainError> {
        if self.is_funded() {
            return Ok(());
        }
        let mut quote = None;
        for asset in deposited_assets {
            if !is_valid_asset(asset) {
                return Err(DomainError::InvalidQuoteAsset);
            }
            if *asset == self.base_asset {
                continue;
            }
            match &quote {
                None => quote = Some(asset.clone()),
                Some(q) if q == asset => {}
                Some(_) => return Err(DomainError::InvalidQuoteAsset),
            }
        }
        let quote = quote.ok_or(DomainError::InvalidQuoteAsset)?;
        if !deposited_assets.iter().any(|a| *a == self.base_asset) {
            return Err(DomainError::InvalidBaseAsset);
        }
        self.fee_asset = quote.clone();
        self.quote_asset = quote;
        Ok(())
    }

    pub fn make_tradable(&mut self) -> Result<(), DomainError> {
        if !self.is_funded() {
            return Err(DomainError::MarketNotExist);
        }
        if self.strategy == Strategy::Pluggable && !self.price.is_set() {
            return Err(DomainError::PriceOutOfRange);
        }
        self.tradable = true;
        Ok(())
    }

    pub fn make_not_tradable(&mut self) {
        self.tradable = false;
    }

    /// Strategy changes are only allowed while the market is closed.
    pub fn change_strategy(&mut self, strategy: Strategy) -> Result<(), DomainError> {
        if self.tradable {
            return Err(DomainError::MarketIsClosed);
        }
        self.strategy = strategy;
        Ok(())
    }

    pub fn change_fee(&mut self, fee_bps: u32) -> Result<(), DomainError> {
        if self.tradable {
            return Err(DomainError::MarketIsClosed);
        }
        if fee_bps >= 10_000 {
            return Err(DomainError::InvalidAmount);
        }
        self.fee_bps = fee_bps;
        Ok(())
    }

    pub fn change_price(&mut self, price: MarketPrice) -> Result<(), DomainError> {
        // MarketPrice::new has already validated the bounds.
        self.price = price;
        Ok(())
    }
}
