use liquid_lpd::domain::{Market, MarketPrice, Strategy};
use liquid_lpd::engine::{self, MarketFunds, Side};
use liquid_lpd::error::DomainError;
use rust_decimal_macros::dec;

const BASE_ASSET: &str = "5ac9f65c0efcc4775e0baec4ec03abdde22473cd3cf33c0419ca290e0751b225";
const QUOTE_ASSET: &str = "d090c403610fe8a9e31967355929833bc8a8fe08429e630162d1ecbf29fdf28b";

fn balanced_market(fee_bps: u32) -> Market {
    let mut market = Market::new(5, BASE_ASSET, fee_bps).expect("valid base asset");
    market
        .fund(&[BASE_ASSET.to_string(), QUOTE_ASSET.to_string()])
        .expect("fund market");
    market
}

fn pluggable_market(fee_bps: u32, base_price: &str, quote_price: &str) -> Market {
    let mut market = balanced_market(fee_bps);
    market
        .change_strategy(Strategy::Pluggable)
        .expect("change strategy");
    let price = MarketPrice::new(
        base_price.parse().expect("base price"),
        quote_price.parse().expect("quote price"),
    )
    .expect("price in range");
    market.change_price(price).expect("change price");
    market
}

fn pool() -> MarketFunds {
    MarketFunds {
        base: 100_000_000,
        quote: 650_000_000_000,
    }
}

#[test]
fn balanced_buy_charges_constant_product_amount_plus_fee() {
    let market = balanced_market(25);
    let preview = engine::preview(&market, &pool(), Side::Buy, 10_000).expect("preview");

    assert_eq!(preview.amount, 65_169_016);
    assert_eq!(preview.fee_amount, 162_516);
    assert_eq!(preview.asset, QUOTE_ASSET);
}

#[test]
fn balanced_sell_folds_the_fee_into_the_quoted_amount() {
    let market = balanced_market(25);
    let preview = engine::preview(&market, &pool(), Side::Sell, 10_000).expect("preview");

    assert_eq!(preview.amount, 65_155_984);
    assert_eq!(preview.fee_amount, 162_483);
}

#[test]
fn balanced_preview_reports_pool_prices_rounded_to_eight_places() {
    let market = balanced_market(25);
    let preview = engine::preview(&market, &pool(), Side::Sell, 10_000).expect("preview");

    assert_eq!(preview.price.base_price, dec!(0.00015385));
    assert_eq!(preview.price.quote_price, dec!(6500));
}

#[test]
fn pluggable_preview_scales_by_stored_quote_price() {
    let market = pluggable_market(25, "0.00015385", "6500");

    let buy = engine::preview(&market, &pool(), Side::Buy, 10_000).expect("buy preview");
    assert_eq!(buy.amount, 81_250_000);
    assert_eq!(buy.fee_amount, 16_250_000);

    let sell = engine::preview(&market, &pool(), Side::Sell, 10_000).expect("sell preview");
    assert_eq!(sell.amount, 48_750_000);
    assert_eq!(sell.price.quote_price, dec!(6500));
}

#[test]
fn zero_amount_is_rejected() {
    let market = balanced_market(25);
    let err = engine::preview(&market, &pool(), Side::Sell, 0).unwrap_err();
    assert_eq!(err, DomainError::InvalidAmount);
}

#[test]
fn empty_pool_has_no_liquidity() {
    let market = balanced_market(25);
    let funds = MarketFunds { base: 0, quote: 0 };
    let err = engine::preview(&market, &funds, Side::Sell, 10_000).unwrap_err();
    assert_eq!(err, DomainError::InsufficientLiquidity);
}

#[test]
fn buying_the_whole_base_side_is_rejected() {
    let market = balanced_market(25);
    let err = engine::preview(&market, &pool(), Side::Buy, pool().base).unwrap_err();
    assert_eq!(err, DomainError::InsufficientLiquidity);
}

#[test]
fn dust_output_is_rejected() {
    let market = balanced_market(0);
    let funds = MarketFunds {
        base: 100_000_000,
        quote: 100_000_000,
    };
    let err = engine::preview(&market, &funds, Side::Sell, 300).unwrap_err();
    assert_eq!(err, DomainError::AmountTooLow);
}

#[test]
fn pluggable_overflow_is_reported() {
    let market = pluggable_market(25, "0.00015385", "6500");
    let err = engine::preview(&market, &pool(), Side::Buy, u64::MAX).unwrap_err();
    assert_eq!(err, DomainError::NumericOverflow);
}

#[test]
fn slippage_is_measured_in_basis_points_of_the_engine_amount() {
    assert_eq!(engine::slippage_bps(65_000_000, 65_000_000), 0);
    assert_eq!(engine::slippage_bps(65_000_000, 64_900_000), 15);
    assert_eq!(engine::slippage_bps(65_000_000, 65_100_000), 15);
    assert_eq!(engine::slippage_bps(0, 1), u64::MAX);
}

#[test]
fn pool_price_requires_both_sides() {
    let err = engine::pool_price(0, 650_000_000_000).unwrap_err();
    assert_eq!(err, DomainError::InsufficientLiquidity);
}
