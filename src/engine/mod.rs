use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive as _;

use crate::domain::asset::DUST_AMOUNT;
use crate::domain::market::{Market, MarketPrice, Strategy};
use crate::error::DomainError;

/// Trade direction from the trader's perspective on the base asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    /// Trader buys base, paying quote.
    Buy,
    /// Trader sells base, receiving quote.
    Sell,
}

/// Confirmed, spendable funding of a market account, summed per asset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MarketFunds {
    pub base: u64,
    pub quote: u64,
}

/// Result of a preview: the quote-denominated amount the trader pays (buy)
/// or receives (sell) for the given base amount, fees included.
#[derive(Debug, Clone, PartialEq)]
pub struct Preview {
    pub amount: u64,
    pub asset: String,
    pub fee_amount: u64,
    pub price: MarketPrice,
}

/// Pure pricing over a market and its funding. Amount arithmetic is 128-bit
/// satoshi math; prices are decimals rounded half-even to 8 places.
pub fn preview(
    market: &Market,
    funds: &MarketFunds,
    side: Side,
    amount: u64,
) -> Result<Preview, DomainError> {
    if amount == 0 {
        return Err(DomainError::InvalidAmount);
    }

    match market.strategy {
        Strategy::Balanced => balanced_preview(market, funds, side, amount),
        Strategy::Pluggable => pluggable_preview(market, side, amount),
    }
}

fn balanced_preview(
    market: &Market,
    funds: &MarketFunds,
    side: Side,
    amount: u64,
) -> Result<Preview, DomainError> {
    let b = funds.base as u128;
    let q = funds.quote as u128;
    if b == 0 || q == 0 {
        return Err(DomainError::InsufficientLiquidity);
    }
    let x = amount as u128;

    let pool = b.checked_mul(q).ok_or(DomainError::NumericOverflow)?;

    // The fee is folded into the quoted amount on both sides of the book.
    let (fee, total) = match side {
        // Trader pays quote to take base out of the pool:
        // y = B*Q/(B - x) - Q, charged y + fee(y).
        Side::Buy => {
            if x >= b {
                return Err(DomainError::InsufficientLiquidity);
            }
            let y = pool / (b - x) - q;
            let fee = fee_amount(y, market.fee_bps)?;
            let total = y.checked_add(fee).ok_or(DomainError::NumericOverflow)?;
            (fee, total)
        }
        // Trader sends base into the pool and receives quote:
        // y = Q - B*Q/(B + x), quoted y + fee(y).
        Side::Sell => {
            let divisor = b.checked_add(x).ok_or(DomainError::NumericOverflow)?;
            let y = q - pool / divisor;
            if y >= q {
                return Err(DomainError::InsufficientLiquidity);
            }
            let fee = fee_amount(y, market.fee_bps)?;
            let total = y.checked_add(fee).ok_or(DomainError::NumericOverflow)?;
            (fee, total)
        }
    };

    let amount_out = u64::try_from(total).map_err(|_| DomainError::NumericOverflow)?;
    if amount_out <= DUST_AMOUNT {
        return Err(DomainError::AmountTooLow);
    }

    Ok(Preview {
        amount: amount_out,
        asset: market.quote_asset.clone(),
        fee_amount: u64::try_from(fee).map_err(|_| DomainError::NumericOverflow)?,
        price: pool_price(funds.base, funds.quote)?,
    })
}

fn pluggable_preview(
    market: &Market,
    side: Side,
    amount: u64,
) -> Result<Preview, DomainError> {
    if !market.price.is_set() {
        return Err(DomainError::PriceOutOfRange);
    }

    let scaled = Decimal::from(amount)
        .checked_mul(market.price.quote_price)
        .ok_or(DomainError::NumericOverflow)?;
    let gross = scaled
        .trunc()
        .to_u128()
        .ok_or(DomainError::NumericOverflow)?;

    // With a fixed price the fee field reads as a percentage of the scaled
    // amount, added to what the trader pays and taken from what the trader
    // receives.
    let fee = gross
        .checked_mul(market.fee_bps as u128)
        .map(|v| v / 100)
        .ok_or(DomainError::NumericOverflow)?;
    let total = match side {
        Side::Buy => gross.checked_add(fee).ok_or(DomainError::NumericOverflow)?,
        Side::Sell => gross.saturating_sub(fee),
    };

    let amount_out = u64::try_from(total).map_err(|_| DomainError::NumericOverflow)?;
    if amount_out <= DUST_AMOUNT {
        return Err(DomainError::AmountTooLow);
    }

    Ok(Preview {
        amount: amount_out,
        asset: market.quote_asset.clone(),
        fee_amount: u64::try_from(fee).map_err(|_| DomainError::NumericOverflow)?,
        price: market.price,
    })
}

fn fee_amount(amount: u128, fee_bps: u32) -> Result<u128, DomainError> {
    amount
        .checked_mul(fee_bps as u128)
        .map(|v| v / 10_000)
        .ok_or(DomainError::NumericOverflow)
}

/// Spot prices implied by the pool balances, rounded half-even to 8 places.
pub fn pool_price(base: u64, quote: u64) -> Result<MarketPrice, DomainError> {
    let b = Decimal::from(base);
    let q = Decimal::from(quote);
    if b.is_zero() || q.is_zero() {
        return Err(DomainError::InsufficientLiquidity);
    }
    let base_price = b
        .checked_div(q)
        .ok_or(DomainError::NumericOverflow)?
        .round_dp(8);
    let quote_price = q
        .checked_div(b)
        .ok_or(DomainError::NumericOverflow)?
        .round_dp(8);
    Ok(MarketPrice {
        base_price,
        quote_price,
    })
}

/// Deviation of the proposer's implied price from the engine preview, in
/// basis points of the engine amount.
pub fn slippage_bps(engine_amount: u64, proposed_amount: u64) -> u64 {
    if engine_amount == 0 {
        return u64::MAX;
    }
    let diff = engine_amount.abs_diff(proposed_amount) as u128;
    ((diff * 10_000) / engine_amount as u128) as u64
}
