pub mod coin;
pub mod esplora;

use async_trait::async_trait;

pub use esplora::EsploraClient;

/// An output reported by the explorer for a watched address. Confidential
/// outputs carry commitments; proofs and the nonce are recovered from the
/// raw transaction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExplorerUtxo {
    pub txid: String,
    pub vout: u32,
    pub value: u64,
    pub asset: String,
    pub value_commitment: String,
    pub asset_commitment: String,
    pub confirmed: bool,
}

impl ExplorerUtxo {
    pub fn is_confidential(&self) -> bool {
        !self.value_commitment.is_empty() && !self.asset_commitment.is_empty()
    }
}

/// The blockchain observation boundary. Implementations are eventually
/// consistent and may reorder or repeat results; callers reconcile against
/// their own store.
#[async_trait]
pub trait Explorer: Send + Sync {
    /// Regtest helper: send some L-BTC to `address`.
    async fn faucet(&self, address: &str) -> anyhow::Result<String>;

    /// Regtest helper: issue `amount` units of a fresh asset to `address`.
    /// Returns (txid, asset id).
    async fn mint(&self, address: &str, amount: u64) -> anyhow::Result<(String, String)>;

    async fn get_unspents(&self, address: &str) -> anyhow::Result<Vec<ExplorerUtxo>>;

    async fn get_transaction_hex(&self, txid: &str) -> anyhow::Result<String>;

    async fn broadcast(&self, tx_hex: &str) -> anyhow::Result<String>;
}
