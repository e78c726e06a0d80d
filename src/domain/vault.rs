use std::collections::BTreeMap;

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use anyhow::Result;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use lwk_common::Signer as _;
use lwk_signer::SwSigner;
use lwk_wollet::elements::bitcoin::bip32::{ChildNumber, DerivationPath};
use lwk_wollet::elements::bitcoin::hashes::{Hash as _, hash160};
use lwk_wollet::elements::bitcoin::secp256k1::Secp256k1 as BitcoinSecp256k1;
use lwk_wollet::elements::bitcoin::secp256k1::SecretKey as BitcoinSecretKey;
use lwk_wollet::elements::secp256k1_zkp;
use lwk_wollet::elements::{Address, AddressParams, Script};
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, ServiceError};

/// Account funding on-chain network fees.
pub const FEE_ACCOUNT: u32 = 0;
/// First account index assigned to markets; lower non-zero indices are
/// reserved.
pub const MARKET_ACCOUNT_START: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Change {
    External,
    Internal,
}

impl Change {
    fn as_u32(self) -> u32 {
        match self {
            Change::External => 0,
            Change::Internal => 1,
        }
    }
}

/// One derivation account of the hierarchical wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub index: u32,
    pub last_external_index: u32,
    pub last_internal_index: u32,
    /// script hex -> derivation path ("<account>'/<change>/<index>").
    pub derivation_by_script: BTreeMap<String, String>,
}

impl Account {
    fn new(index: u32) -> Self {
        Self {
            index,
            last_external_index: 0,
            last_internal_index: 0,
            derivation_by_script: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressInfo {
    pub account_index: u32,
    /// Blinding private key hex for the address, usable while locked so the
    /// crawler can keep unblinding observed outputs.
    pub blinding_key: String,
    pub change: Change,
    pub script_hex: String,
}

/// A freshly derived receive or change address.
#[derive(Debug, Clone)]
pub struct DerivedAddress {
    pub address: String,
    pub script_hex: String,
    pub blinding_private_key: String,
    pub derivation_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct EncryptedMnemonic {
    salt: String,
    nonce: String,
    ciphertext: String,
}

/// The encrypted hierarchical-deterministic wallet.
///
/// The clear mnemonic lives in memory only while unlocked and is never
/// serialized; the encrypted form and the passphrase hash always are.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vault {
    #[serde(skip)]
    mnemonic: Option<String>,
    encrypted_mnemonic: EncryptedMnemonic,
    passphrase_hash: Vec<u8>,
    is_mainnet: bool,
    pub accounts: BTreeMap<u32, Account>,
    pub account_and_key_by_address: BTreeMap<String, AddressInfo>,
}

impl Vault {
    /// Create a vault from seed words, leaving it unlocked.
    pub fn new(mnemonic: &str, passphrase: &str, is_mainnet: bool) -> Result<Self> {
        SwSigner::new(mnemonic, is_mainnet).map_err(|e| anyhow::anyhow!("invalid mnemonic: {e}"))?;

        let encrypted_mnemonic = encrypt_mnemonic(mnemonic, passphrase)?;
        Ok(Self {
            mnemonic: Some(mnemonic.to_string()),
            encrypted_mnemonic,
            passphrase_hash: passphrase_hash(passphrase),
            is_mainnet,
            accounts: BTreeMap::new(),
            account_and_key_by_address: BTreeMap::new(),
        })
    }

    pub fn is_locked(&self) -> bool {
        self.mnemonic.is_none()
    }

    pub fn lock(&mut self) {
        self.mnemonic = None;
    }

    pub fn unlock(&mut self, passphrase: &str) -> Result<(), DomainError> {
        if passphrase_hash(passphrase) != self.passphrase_hash {
            return Err(DomainError::WrongPassphrase);
        }
        let mnemonic = decrypt_mnemonic(&self.encrypted_mnemonic, passphrase)?;
        self.mnemonic = Some(mnemonic);
        Ok(())
    }

    /// Check restore credentials against the stored vault.
    pub fn matches(&self, mnemonic: &str, passphrase: &str) -> bool {
        if passphrase_hash(passphrase) != self.passphrase_hash {
            return false;
        }
        decrypt_mnemonic(&self.encrypted_mnemonic, passphrase)
            .map(|m| m == mnemonic)
            .unwrap_or(false)
    }

    pub fn signer(&self) -> Result<SwSigner, ServiceError> {
        let mnemonic = self
            .mnemonic
            .as_deref()
            .ok_or(DomainError::WalletLocked)?;
        SwSigner::new(mnemonic, self.is_mainnet)
            .map_err(|e| ServiceError::Infra(anyhow::anyhow!("create signer: {e}")))
    }

    pub fn get_or_create_account(&mut self, account_index: u32) -> &mut Account {
        self.accounts
            .entry(account_index)
            .or_insert_with(|| Account::new(account_index))
    }

    /// Next market account index after the ones already derived.
    pub fn next_market_account(&self) -> u32 {
        self.accounts
            .keys()
            .copied()
            .filter(|i| *i >= MARKET_ACCOUNT_START)
            .max()
            .map(|i| i + 1)
            .unwrap_or(MARKET_ACCOUNT_START)
    }

    pub fn derive_next_address(
        &mut self,
        account_index: u32,
        change: Change,
        params: &'static AddressParams,
    ) -> Result<DerivedAddress, ServiceError> {
        let signer = self.signer()?;
        let account = self.get_or_create_account(account_index);
        let index = match change {
            Change::External => account.last_external_index,
            Change::Internal => account.last_internal_index,
        };

        let derived = derive_address(&signer, account_index, change, index, params)?;

        account
            .derivation_by_script
            .insert(derived.script_hex.clone(), derived.derivation_path.clone());
        match change {
            Change::External => account.last_external_index += 1,
            Change::Internal => account.last_internal_index += 1,
        }
        self.account_and_key_by_address.insert(
            derived.address.clone(),
            AddressInfo {
                account_index,
                blinding_key: derived.blinding_private_key.clone(),
                change,
                script_hex: derived.script_hex.clone(),
            },
        );

        Ok(derived)
    }

    pub fn all_derived_addresses(&self, account_index: u32) -> Vec<String> {
        self.account_and_key_by_address
            .iter()
            .filter(|(_, info)| info.account_index == account_index)
            .map(|(addr, _)| addr.clone())
            .collect()
    }

    pub fn all_derived_external_addresses(&self, account_index: u32) -> Vec<String> {
        self.account_and_key_by_address
            .iter()
            .filter(|(_, info)| {
                info.account_index == account_index && info.change == Change::External
            })
            .map(|(addr, _)| addr.clone())
            .collect()
    }

    pub fn all_derived_addresses_and_blinding_keys(
        &self,
        account_index: u32,
    ) -> Vec<(String, String)> {
        self.account_and_key_by_address
            .iter()
            .filter(|(_, info)| info.account_index == account_index)
            .map(|(addr, info)| (addr.clone(), info.blinding_key.clone()))
            .collect()
    }

    pub fn address_info(&self, address: &str) -> Option<&AddressInfo> {
        self.account_and_key_by_address.get(address)
    }

    /// Blinding private key registered for a script, across all accounts.
    pub fn blinding_key_by_script(&self, script_hex: &str) -> Option<String> {
        self.account_and_key_by_address
            .values()
            .find(|info| info.script_hex == script_hex)
            .map(|info| info.blinding_key.clone())
    }

    pub fn derivation_path_by_script(
        &self,
        account_index: u32,
        script_hex: &str,
    ) -> Option<String> {
        self.accounts
            .get(&account_index)
            .and_then(|a| a.derivation_by_script.get(script_hex))
            .cloned()
    }

    /// Private key for a script owned by one of the vault accounts.
    pub fn signing_key_by_script(
        &self,
        script_hex: &str,
    ) -> Result<Option<BitcoinSecretKey>, ServiceError> {
        let Some(info) = self
            .account_and_key_by_address
            .values()
            .find(|info| info.script_hex == script_hex)
        else {
            return Ok(None);
        };
        let Some(path) = self.derivation_path_by_script(info.account_index, script_hex) else {
            return Ok(None);
        };
        let signer = self.signer()?;
        let path: DerivationPath = path
            .parse()
            .map_err(|e| ServiceError::Infra(anyhow::anyhow!("parse derivation path: {e}")))?;
        let xprv = signer
            .derive_xprv(&path)
            .map_err(|e| ServiceError::Infra(anyhow::anyhow!("derive xprv: {e}")))?;
        Ok(Some(xprv.private_key))
    }
}

fn derive_address(
    signer: &SwSigner,
    account_index: u32,
    change: Change,
    index: u32,
    params: &'static AddressParams,
) -> Result<DerivedAddress, ServiceError> {
    let path = DerivationPath::from(vec![
        ChildNumber::from_hardened_idx(account_index)
            .map_err(|e| ServiceError::Infra(anyhow::anyhow!("account index: {e}")))?,
        ChildNumber::from_normal_idx(change.as_u32())
            .map_err(|e| ServiceError::Infra(anyhow::anyhow!("change index: {e}")))?,
        ChildNumber::from_normal_idx(index)
            .map_err(|e| ServiceError::Infra(anyhow::anyhow!("address index: {e}")))?,
    ]);
    let xprv = signer
        .derive_xprv(&path)
        .map_err(|e| ServiceError::Infra(anyhow::anyhow!("derive xprv: {e}")))?;

    let secp = BitcoinSecp256k1::new();
    let pubkey = lwk_wollet::elements::bitcoin::PublicKey::new(xprv.private_key.public_key(&secp));

    let script = Address::p2wpkh(&pubkey, None, params).script_pubkey();
    let blinding_sk = blinding_private_key(signer, &script)?;
    let zkp_secp = secp256k1_zkp::Secp256k1::new();
    let blinding_pk = secp256k1_zkp::PublicKey::from_secret_key(&zkp_secp, &blinding_sk);

    let address = Address::p2wpkh(&pubkey, Some(blinding_pk), params);

    Ok(DerivedAddress {
        address: address.to_string(),
        script_hex: hex::encode(script.as_bytes()),
        blinding_private_key: hex::encode(blinding_sk.secret_bytes()),
        derivation_path: path.to_string(),
    })
}

fn blinding_private_key(
    signer: &SwSigner,
    script: &Script,
) -> Result<secp256k1_zkp::SecretKey, ServiceError> {
    let master = signer
        .slip77_master_blinding_key()
        .map_err(|e| ServiceError::Infra(anyhow::anyhow!("slip77 master key: {e}")))?;
    Ok(master.blinding_private_key(script))
}

fn passphrase_hash(passphrase: &str) -> Vec<u8> {
    hash160::Hash::hash(passphrase.as_bytes())
        .to_byte_array()
        .to_vec()
}

fn encrypt_mnemonic(mnemonic: &str, passphrase: &str) -> Result<EncryptedMnemonic> {
    let salt: [u8; 16] = rand::random();

    let mut key_bytes = [0u8; 32];
    argon2::Argon2::default()
        .hash_password_into(passphrase.as_bytes(), &salt, &mut key_bytes)
        .map_err(|e| anyhow::anyhow!("stretch passphrase: {e}"))?;

    let cipher = Aes256Gcm::new_from_slice(&key_bytes)
        .map_err(|e| anyhow::anyhow!("build cipher: {e}"))?;
    let nonce_bytes: [u8; 12] = rand::random();
    let nonce = Nonce::from_slice(&nonce_bytes);
    let ciphertext = cipher
        .encrypt(nonce, mnemonic.as_bytes())
        .map_err(|e| anyhow::anyhow!("encrypt mnemonic: {e}"))?;

    Ok(EncryptedMnemonic {
        salt: BASE64.encode(salt),
        nonce: BASE64.encode(nonce_bytes),
        ciphertext: BASE64.encode(ciphertext),
    })
}

fn decrypt_mnemonic(
    encrypted: &EncryptedMnemonic,
    passphrase: &str,
) -> Result<String, DomainError> {
    let salt = BASE64
        .decode(&encrypted.salt)
        .map_err(|_| DomainError::WrongPassphrase)?;
    let nonce_bytes = BASE64
        .decode(&encrypted.nonce)
        .map_err(|_| DomainError::WrongPassphrase)?;
    let ciphertext = BASE64
        .decode(&encrypted.ciphertext)
        .map_err(|_| DomainError::WrongPassphrase)?;

    let mut key_bytes = [0u8; 32];
    argon2::Argon2::default()
        .hash_password_into(passphrase.as_bytes(), &salt, &mut key_bytes)
        .map_err(|_| DomainError::WrongPassphrase)?;

    let cipher =
        Aes256Gcm::new_from_slice(&key_bytes).map_err(|_| DomainError::WrongPassphrase)?;
    let nonce = Nonce::from_slice(&nonce_bytes);
    let plaintext = cipher
        .decrypt(nonce, ciphertext.as_ref())
        .map_err(|_| DomainError::WrongPassphrase)?;

    String::from_utf8(plaintext).map_err(|_| DomainError::WrongPassphrase)
}
