use std::str::FromStr as _;

use lwk_wollet::elements::AssetId;

/// Outputs at or below this value are uneconomical to spend.
pub const DUST_AMOUNT: u64 = 546;

/// Upper bound on any single amount or price expressed in satoshi.
pub const MAX_SATOSHI_PRICE: u64 = 2_099_999_997_690_000;

/// An asset identifier is the 32-byte issuance hash, hex encoded.
pub fn is_valid_asset(asset: &str) -> bool {
    asset.len() == 64 && asset.chars().all(|c| c.is_ascii_hexdigit())
}

pub fn parse_asset(asset: &str) -> Option<AssetId> {
    if !is_valid_asset(asset) {
        return None;
    }
    AssetId::from_str(asset).ok()
}
