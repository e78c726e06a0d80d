use async_trait::async_trait;
use anyhow::{Context as _, Result};
use serde::Deserialize;

use super::{Explorer, ExplorerUtxo};

/// Client for an Esplora-style HTTP explorer (electrs on regtest via the
/// nigiri chopsticks proxy, which also serves the faucet/mint endpoints).
#[derive(Debug, Clone)]
pub struct EsploraClient {
    endpoint: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct UtxoEntry {
    txid: String,
    vout: u32,
    #[serde(default)]
    value: u64,
    #[serde(default)]
    asset: String,
    #[serde(default)]
    valuecommitment: String,
    #[serde(default)]
    assetcommitment: String,
    status: UtxoStatus,
}

#[derive(Debug, Deserialize)]
struct UtxoStatus {
    #[serde(default)]
    confirmed: bool,
}

#[derive(Debug, Deserialize)]
struct FaucetReply {
    txid: String,
}

#[derive(Debug, Deserialize)]
struct MintReply {
    txid: String,
    asset: String,
}

impl EsploraClient {
    pub fn new(endpoint: &str) -> Self {
        Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Explorer for EsploraClient {
    async fn faucet(&self, address: &str) -> Result<String> {
        let reply: FaucetReply = self
            .client
            .post(format!("{}/faucet", self.endpoint))
            .json(&serde_json::json!({ "address": address }))
            .send()
            .await
            .context("faucet request")?
            .error_for_status()
            .context("faucet status")?
            .json()
            .await
            .context("decode faucet reply")?;
        Ok(reply.txid)
    }

    async fn mint(&self, address: &str, amount: u64) -> Result<(String, String)> {
        let reply: MintReply = self
            .client
            .post(format!("{}/mint", self.endpoint))
            .json(&serde_json::json!({ "address": address, "quantity": amount }))
            .send()
            .await
            .context("mint request")?
            .error_for_status()
            .context("mint status")?
            .json()
            .await
            .context("decode mint reply")?;
        Ok((reply.txid, reply.asset))
    }

    async fn get_unspents(&self, address: &str) -> Result<Vec<ExplorerUtxo>> {
        let entries: Vec<UtxoEntry> = self
            .client
            .get(format!("{}/address/{}/utxo", self.endpoint, address))
            .send()
            .await
            .context("utxo request")?
            .error_for_status()
            .context("utxo status")?
            .json()
            .await
            .context("decode utxo reply")?;

        Ok(entries
            .into_iter()
            .map(|e| ExplorerUtxo {
                txid: e.txid,
                vout: e.vout,
                value: e.value,
                asset: e.asset,
                value_commitment: e.valuecommitment,
                asset_commitment: e.assetcommitment,
                confirmed: e.status.confirmed,
            })
            .collect())
    }

    async fn get_transaction_hex(&self, txid: &str) -> Result<String> {
        let hex = self
            .client
            .get(format!("{}/tx/{}/hex", self.endpoint, txid))
            .send()
            .await
            .context("tx hex request")?
            .error_for_status()
            .context("tx hex status")?
            .text()
            .await
            .context("read tx hex")?;
        Ok(hex.trim().to_string())
    }

    async fn broadcast(&self, tx_hex: &str) -> Result<String> {
        let txid = self
            .client
            .post(format!("{}/tx", self.endpoint))
            .body(tx_hex.to_string())
            .send()
            .await
            .context("broadcast request")?
            .error_for_status()
            .context("broadcast status")?
            .text()
            .await
            .context("read broadcast reply")?;
        Ok(txid.trim().to_string())
    }
}
