use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Identity of an unspent output.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UnspentKey {
    pub txid: String,
    pub vout: u32,
}

/// An output observed by the crawler on one of the vault's addresses.
///
/// A confidential unspent carries the value and asset commitments plus the
/// proofs of the on-chain output; once unblinded with the address blinding
/// key, `value` and `asset` hold the revealed amounts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Unspent {
    pub txid: String,
    pub vout: u32,
    pub value: u64,
    pub asset: String,
    pub value_commitment: String,
    pub asset_commitment: String,
    /// Output script, hex encoded.
    pub script: String,
    pub nonce: Vec<u8>,
    pub range_proof: Vec<u8>,
    pub surjection_proof: Vec<u8>,
    pub address: String,
    pub confirmed: bool,
    pub spent: bool,
    pub locked: bool,
    pub locked_by: Option<String>,
}

impl Unspent {
    pub fn key(&self) -> UnspentKey {
        UnspentKey {
            txid: self.txid.clone(),
            vout: self.vout,
        }
    }

    pub fn is_confidential(&self) -> bool {
        !self.value_commitment.is_empty() && !self.asset_commitment.is_empty()
    }

    /// Spendable by the daemon right now.
    pub fn is_available(&self) -> bool {
        self.confirmed && !self.spent && !self.locked
    }

    /// Reserve this output for a trade. An output is never both spent and
    /// locked, and `locked_by` is set exactly while locked.
    pub fn lock(&mut self, trade_id: &str) -> Result<(), DomainError> {
        if self.spent {
            return Err(DomainError::SwapFailed(format!(
                "unspent {}:{} is already spent",
                self.txid, self.vout
            )));
        }
        if self.locked {
            return Err(DomainError::SwapFailed(format!(
                "unspent {}:{} is already locked",
                self.txid, self.vout
            )));
        }
        self.locked = true;
        self.locked_by = Some(trade_id.to_string());
        Ok(())
    }

    pub fn unlock(&mut self) {
        self.locked = false;
        self.locked_by = None;
    }

    /// Spent is write-once; spending releases any lock.
    pub fn mark_spent(&mut self) {
        self.spent = true;
        self.locked = false;
        self.locked_by = None;
    }
}
