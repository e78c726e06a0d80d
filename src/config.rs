use std::path::PathBuf;

use lwk_wollet::ElementsNetwork;
use lwk_wollet::elements::AddressParams;

/// Process-wide configuration, injected at construction everywhere it is
/// needed. There is deliberately no global config registry.
#[derive(Debug, Clone)]
pub struct Config {
    /// The distinguished base asset every market trades against (L-BTC).
    pub base_asset: String,
    /// Esplora-style explorer endpoint.
    pub explorer_endpoint: String,
    /// Optional mnemonic used to restore the vault on first init.
    pub mnemonic: Option<String>,
    /// Poll period of each crawler observable.
    pub crawler_interval_ms: u64,
    /// Accept-to-Complete timeout after which a trade expires.
    pub trade_expiry_secs: u64,
    /// Fee applied to newly created markets, in basis points.
    pub default_fee_bps: u32,
    /// Max deviation of a proposed price from the engine price, in basis
    /// points.
    pub slippage_bps: u32,
    /// Directory holding the daemon databases.
    pub datadir: PathBuf,
    pub network: ElementsNetwork,
}

impl Config {
    pub fn address_params(&self) -> &'static AddressParams {
        self.network.address_params()
    }

    /// Regtest defaults used by the test harness and local development.
    pub fn regtest(datadir: PathBuf) -> Self {
        let network = ElementsNetwork::default_regtest();
        Self {
            base_asset: network.policy_asset().to_string(),
            explorer_endpoint: "http://127.0.0.1:3001".to_string(),
            mnemonic: None,
            crawler_interval_ms: 1_000,
            trade_expiry_secs: 300,
            default_fee_bps: 25,
            slippage_bps: 50,
            datadir,
            network,
        }
    }
}
