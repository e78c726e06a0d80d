use std::collections::HashMap;
use std::str::FromStr as _;

use anyhow::{Context as _, Result};
use lwk_wollet::elements::bitcoin::hashes::Hash as _;
use lwk_wollet::elements::bitcoin::secp256k1::Message as BitcoinMessage;
use lwk_wollet::elements::bitcoin::secp256k1::PublicKey as BitcoinPublicKey;
use lwk_wollet::elements::bitcoin::secp256k1::Secp256k1 as BitcoinSecp256k1;
use lwk_wollet::elements::bitcoin::secp256k1::SecretKey as BitcoinSecretKey;
use lwk_wollet::elements::bitcoin::secp256k1::ecdsa::Signature as BitcoinEcdsaSignature;
use lwk_wollet::elements::confidential::{Asset, Nonce, Value};
use lwk_wollet::elements::pset::PartiallySignedTransaction;
use lwk_wollet::elements::pset::{Input as PsetInput, Output as PsetOutput};
use lwk_wollet::elements::script::Builder;
use lwk_wollet::elements::secp256k1_zkp;
use lwk_wollet::elements::sighash::SighashCache;
use lwk_wollet::elements::{
    AssetId, EcdsaSighashType, LockTime, OutPoint, Script, Sequence, Transaction, TxIn,
    TxInWitness, TxOut, TxOutSecrets, TxOutWitness, Txid, encode, opcodes,
};

use crate::domain::Unspent;
use crate::domain::trade::{BlindingKeyMap, SwapRequest};
use crate::error::DomainError;

/// A vault-owned input being added to a swap or withdraw transaction.
pub struct DaemonInput {
    pub unspent: Unspent,
    pub blinding_key: secp256k1_zkp::SecretKey,
    pub signing_key: BitcoinSecretKey,
}

/// One output the daemon adds. A blinding pubkey makes the output
/// confidential; without one it stays explicit.
pub struct Recipient {
    pub script: Script,
    pub blinding_pubkey: Option<secp256k1_zkp::PublicKey>,
    pub asset: AssetId,
    pub amount: u64,
}

pub fn parse_pset(psbt_base64: &str) -> Result<PartiallySignedTransaction, DomainError> {
    psbt_base64
        .parse()
        .map_err(|e| DomainError::SwapFailed(format!("invalid psbt: {e}")))
}

pub fn pset_to_base64(pset: &PartiallySignedTransaction) -> String {
    pset.to_string()
}

pub fn tx_hex(tx: &Transaction) -> String {
    encode::serialize_hex(tx)
}

/// Rebuild the on-chain output a stored unspent refers to.
pub fn txout_from_unspent(unspent: &Unspent) -> Result<TxOut> {
    let script_bytes = hex::decode(&unspent.script).context("decode unspent script")?;
    let script = Script::from(script_bytes);

    if unspent.is_confidential() {
        let asset_bytes =
            hex::decode(&unspent.asset_commitment).context("decode asset commitment")?;
        let value_bytes =
            hex::decode(&unspent.value_commitment).context("decode value commitment")?;
        let asset = Asset::from_commitment(&asset_bytes).context("parse asset commitment")?;
        let value = Value::from_commitment(&value_bytes).context("parse value commitment")?;
        let nonce = Nonce::from_commitment(&unspent.nonce).context("parse nonce")?;
        let rangeproof = secp256k1_zkp::RangeProof::from_slice(&unspent.range_proof)
            .context("parse range proof")?;
        let surjection_proof =
            secp256k1_zkp::SurjectionProof::from_slice(&unspent.surjection_proof)
                .context("parse surjection proof")?;

        Ok(TxOut {
            asset,
            value,
            nonce,
            script_pubkey: script,
            witness: TxOutWitness {
                surjection_proof: Some(Box::new(surjection_proof)),
                rangeproof: Some(Box::new(rangeproof)),
            },
        })
    } else {
        let asset_id = AssetId::from_str(&unspent.asset).context("parse unspent asset")?;
        Ok(TxOut {
            asset: Asset::Explicit(asset_id),
            value: Value::Explicit(unspent.value),
            nonce: Nonce::Null,
            script_pubkey: script,
            witness: TxOutWitness::default(),
        })
    }
}

/// Secrets of every input currently in the pset, recovered either from
/// explicit amounts or by unblinding the witness utxo with the key provided
/// for its script.
fn input_secrets(
    pset: &PartiallySignedTransaction,
    keys_by_script: &BlindingKeyMap,
) -> Result<HashMap<usize, TxOutSecrets>> {
    let secp = secp256k1_zkp::Secp256k1::new();
    let mut secrets = HashMap::new();

    for (index, input) in pset.inputs().iter().enumerate() {
        let utxo = input
            .witness_utxo
            .as_ref()
            .with_context(|| format!("input {index} is missing its witness utxo"))?;

        let secret = match (utxo.asset, utxo.value) {
            (Asset::Explicit(asset), Value::Explicit(value)) => TxOutSecrets::new(
                asset,
                lwk_wollet::elements::confidential::AssetBlindingFactor::zero(),
                value,
                lwk_wollet::elements::confidential::ValueBlindingFactor::zero(),
            ),
            _ => {
                let script_hex = hex::encode(utxo.script_pubkey.as_bytes());
                let key_hex = keys_by_script
                    .get(&script_hex)
                    .with_context(|| format!("no blinding key for input script {script_hex}"))?;
                let key_bytes = hex::decode(key_hex).context("decode input blinding key")?;
                let key = secp256k1_zkp::SecretKey::from_slice(&key_bytes)
                    .context("parse input blinding key")?;
                utxo.unblind(&secp, key)
                    .with_context(|| format!("unblind input {index}"))?
            }
        };
        secrets.insert(index, secret);
    }

    Ok(secrets)
}

/// Check the proposer's side of a swap before the daemon adds its own: the
/// transaction must fund the declared send amount and pay the declared
/// receive amount back to the proposer.
pub fn verify_proposal(
    pset: &PartiallySignedTransaction,
    request: &SwapRequest,
) -> Result<(), DomainError> {
    if request.amount_to_send == 0 || request.amount_to_receive == 0 {
        return Err(DomainError::InvalidAmount);
    }

    let secrets = input_secrets(pset, &request.input_blinding_keys)
        .map_err(|e| DomainError::SwapFailed(format!("{e:#}")))?;

    let sent: u64 = secrets
        .values()
        .filter(|s| s.asset.to_string() == request.asset_to_send)
        .map(|s| s.value)
        .sum();
    if sent < request.amount_to_send {
        return Err(DomainError::SwapFailed(format!(
            "inputs fund {sent} of asset {}, request declares {}",
            request.asset_to_send, request.amount_to_send
        )));
    }

    let received: u64 = pset
        .outputs()
        .iter()
        .filter(|o| {
            o.asset.map(|a| a.to_string()).as_deref() == Some(request.asset_to_receive.as_str())
                && !o.script_pubkey.is_empty()
        })
        .filter_map(|o| o.amount)
        .sum();
    if received < request.amount_to_receive {
        return Err(DomainError::SwapFailed(format!(
            "outputs pay {received} of asset {}, request declares {}",
            request.asset_to_receive, request.amount_to_receive
        )));
    }

    Ok(())
}

/// Append the daemon's side to a proposer transaction: funding inputs, the
/// daemon outputs, the network fee output; then blind every pending output
/// and sign the daemon inputs.
pub fn complete_transfer(
    pset: &mut PartiallySignedTransaction,
    inputs: &[DaemonInput],
    recipients: &[Recipient],
    fee: u64,
    policy_asset: AssetId,
    external_input_keys: &BlindingKeyMap,
) -> Result<()> {
    anyhow::ensure!(!inputs.is_empty(), "a transfer needs at least one input");
    let first_own_input = pset.inputs().len() as u32;

    for own in inputs {
        let txid = Txid::from_str(&own.unspent.txid).context("parse unspent txid")?;
        let mut input = PsetInput::from_prevout(OutPoint {
            txid,
            vout: own.unspent.vout,
        });
        input.witness_utxo = Some(txout_from_unspent(&own.unspent)?);
        pset.add_input(input);
    }

    for recipient in recipients {
        let blinder = recipient
            .blinding_pubkey
            .map(|pk| {
                lwk_wollet::elements::bitcoin::PublicKey::from_slice(&pk.serialize())
                    .context("convert blinding pubkey")
            })
            .transpose()?;
        let mut output = PsetOutput::new_explicit(
            recipient.script.clone(),
            recipient.amount,
            recipient.asset,
            blinder,
        );
        if output.blinding_key.is_some() {
            output.blinder_index = Some(first_own_input);
        }
        pset.add_output(output);
    }

    if fee > 0 {
        pset.add_output(PsetOutput::new_explicit(
            Script::new(),
            fee,
            policy_asset,
            None,
        ));
    }

    // Proposer outputs carrying a blinding key but no blinder assignment are
    // blinded together with ours.
    for output in pset.outputs_mut() {
        if output.blinding_key.is_some()
            && output.amount_comm.is_none()
            && output.blinder_index.is_none()
        {
            output.blinder_index = Some(0);
        }
    }

    let mut all_keys = external_input_keys.clone();
    for own in inputs {
        all_keys.insert(
            own.unspent.script.clone(),
            hex::encode(own.blinding_key.secret_bytes()),
        );
    }
    let secrets = input_secrets(pset, &all_keys)?;

    let secp = secp256k1_zkp::Secp256k1::new();
    let mut rng = rand::thread_rng();
    pset.blind_last(&mut rng, &secp, &secrets)
        .map_err(|e| anyhow::anyhow!("blind transaction: {e}"))?;

    let mut keys_by_script = HashMap::new();
    for own in inputs {
        keys_by_script.insert(own.unspent.script.clone(), own.signing_key);
    }
    sign_owned_inputs(pset, &keys_by_script)?;

    Ok(())
}

/// Build a transfer funded and signed entirely by the daemon (withdrawals).
pub fn build_transfer(
    inputs: &[DaemonInput],
    recipients: &[Recipient],
    fee: u64,
    policy_asset: AssetId,
) -> Result<PartiallySignedTransaction> {
    let mut pset = PartiallySignedTransaction::new_v2();
    complete_transfer(
        &mut pset,
        inputs,
        recipients,
        fee,
        policy_asset,
        &BlindingKeyMap::new(),
    )?;
    Ok(pset)
}

/// Sign every pset input whose prevout script we hold a key for. All daemon
/// addresses are native segwit p2wpkh.
pub fn sign_owned_inputs(
    pset: &mut PartiallySignedTransaction,
    keys_by_script: &HashMap<String, BitcoinSecretKey>,
) -> Result<usize> {
    let tx = unsigned_tx(pset)?;
    let secp = BitcoinSecp256k1::new();
    let sighash_type = EcdsaSighashType::All;
    let mut cache = SighashCache::new(&tx);

    let mut signed = 0;
    for (index, input) in pset.inputs_mut().iter_mut().enumerate() {
        let Some(utxo) = input.witness_utxo.as_ref() else {
            continue;
        };
        let script_hex = hex::encode(utxo.script_pubkey.as_bytes());
        let Some(secret_key) = keys_by_script.get(&script_hex) else {
            continue;
        };

        let script_code = p2wpkh_script_code(&utxo.script_pubkey)?;
        let sighash = cache.segwitv0_sighash(index, &script_code, utxo.value, sighash_type);
        let msg = BitcoinMessage::from_digest_slice(&sighash.to_byte_array())
            .context("create sighash message")?;
        let sig: BitcoinEcdsaSignature = secp.sign_ecdsa(&msg, secret_key);
        let mut sig_bytes = sig.serialize_der().to_vec();
        sig_bytes.push(sighash_type.as_u32() as u8);

        let pubkey = lwk_wollet::elements::bitcoin::PublicKey::new(
            BitcoinPublicKey::from_secret_key(&secp, secret_key),
        );
        input.partial_sigs.insert(pubkey, sig_bytes);
        signed += 1;
    }

    Ok(signed)
}

/// Every input must carry either a final witness or at least one partial
/// signature before the swap can complete.
pub fn verify_inputs_signed(pset: &PartiallySignedTransaction) -> Result<(), DomainError> {
    for (index, input) in pset.inputs().iter().enumerate() {
        if input.final_script_witness.is_none() && input.partial_sigs.is_empty() {
            return Err(DomainError::SwapFailed(format!(
                "input {index} is not signed"
            )));
        }
    }
    Ok(())
}

/// Promote partial p2wpkh signatures to final witnesses and extract the
/// network transaction.
pub fn finalize_and_extract(pset: &mut PartiallySignedTransaction) -> Result<Transaction> {
    for (index, input) in pset.inputs_mut().iter_mut().enumerate() {
        if input.final_script_witness.is_some() {
            continue;
        }
        let (pubkey, sig) = input
            .partial_sigs
            .iter()
            .next()
            .map(|(pk, sig)| (*pk, sig.clone()))
            .with_context(|| format!("input {index} has no signature to finalize"))?;
        input.final_script_witness = Some(vec![sig, pubkey.to_bytes()]);
        input.partial_sigs.clear();
    }

    pset.extract_tx().context("extract transaction")
}

/// The unsigned network transaction implied by the pset, used for sighash
/// computation. Outputs reflect their blinded form when present.
fn unsigned_tx(pset: &PartiallySignedTransaction) -> Result<Transaction> {
    let mut inputs = Vec::with_capacity(pset.inputs().len());
    for input in pset.inputs() {
        inputs.push(TxIn {
            previous_output: OutPoint {
                txid: input.previous_txid,
                vout: input.previous_output_index,
            },
            is_pegin: false,
            script_sig: Script::new(),
            sequence: input.sequence.unwrap_or(Sequence::MAX),
            asset_issuance: Default::default(),
            witness: TxInWitness::default(),
        });
    }

    let mut outputs = Vec::with_capacity(pset.outputs().len());
    for output in pset.outputs() {
        outputs.push(txout_from_pset_output(output)?);
    }

    Ok(Transaction {
        version: 2,
        lock_time: LockTime::ZERO,
        input: inputs,
        output: outputs,
    })
}

fn txout_from_pset_output(output: &PsetOutput) -> Result<TxOut> {
    let asset = match (output.asset_comm, output.asset) {
        (Some(comm), _) => Asset::Confidential(comm),
        (None, Some(asset)) => Asset::Explicit(asset),
        (None, None) => anyhow::bail!("pset output has no asset"),
    };
    let value = match (output.amount_comm, output.amount) {
        (Some(comm), _) => Value::Confidential(comm),
        (None, Some(amount)) => Value::Explicit(amount),
        (None, None) => anyhow::bail!("pset output has no amount"),
    };
    let nonce = match &output.ecdh_pubkey {
        Some(pk) => Nonce::Confidential(
            secp256k1_zkp::PublicKey::from_slice(&pk.to_bytes()).context("pset ecdh pubkey")?,
        ),
        None => Nonce::Null,
    };

    Ok(TxOut {
        asset,
        value,
        nonce,
        script_pubkey: output.script_pubkey.clone(),
        witness: TxOutWitness {
            surjection_proof: output.asset_surjection_proof.clone(),
            rangeproof: output.value_rangeproof.clone(),
        },
    })
}

fn p2wpkh_script_code(script_pubkey: &Script) -> Result<Script> {
    let bytes = script_pubkey.as_bytes();
    anyhow::ensure!(
        bytes.len() == 22 && bytes[0] == 0x00 && bytes[1] == 0x14,
        "expected P2WPKH script_pubkey (0x0014..), got {script_pubkey:?}"
    );
    Ok(Builder::new()
        .push_opcode(opcodes::all::OP_DUP)
        .push_opcode(opcodes::all::OP_HASH160)
        .push_slice(&bytes[2..22])
        .push_opcode(opcodes::all::OP_EQUALVERIFY)
        .push_opcode(opcodes::all::OP_CHECKSIG)
        .into_script())
}
