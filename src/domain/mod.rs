pub mod asset;
pub mod market;
pub mod trade;
pub mod unspent;
pub mod vault;

pub use asset::{DUST_AMOUNT, MAX_SATOSHI_PRICE, is_valid_asset};
pub use market::{Market, MarketPrice, Strategy};
pub use trade::{Trade, TradeStatus};
pub use unspent::{Unspent, UnspentKey};
pub use vault::{FEE_ACCOUNT, MARKET_ACCOUNT_START, Account, Vault};
