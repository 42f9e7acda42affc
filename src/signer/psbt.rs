//! PSBT signing.
//!
//! Signs requested inputs of a partially signed transaction. Every input
//! goes through the same pipeline: reject script-path material, determine
//! the spent script, resolve the signing key (explicit path wins over
//! explicit address wins over script-derived address), verify the resolved
//! key actually produces the spent script, then sign with the
//! script-appropriate sighash algorithm. Finalization is per-input opt-in
//! and best-effort.
//!
//! Supported spend types: P2PKH, P2SH-P2WPKH, P2WPKH and P2TR key-path.
//! Taproot script-path spending is rejected outright.

use std::str::FromStr;

use bitcoin::hashes::Hash;
use bitcoin::key::{CompressedPublicKey, Keypair, PublicKey as BitcoinPublicKey, TapTweak};
use bitcoin::psbt::{Psbt, PsbtSighashType};
use bitcoin::script::{Builder, PushBytesBuf};
use bitcoin::secp256k1::Message;
use bitcoin::sighash::{EcdsaSighashType, Prevouts, SighashCache, TapSighashType};
use bitcoin::{Address, ScriptBuf, TxOut, Witness};

use crate::error::{WalletError, WalletResult};
use crate::keychain::KeyChain;
use crate::types::{DerivedAddress, ScriptType, SignInputRequest};

use super::normalize_even_y;

/// Sign the requested inputs of a base64-encoded PSBT and return the
/// updated PSBT, base64-encoded again.
pub fn sign_psbt_base64(
    keychain: &mut KeyChain,
    psbt_base64: &str,
    requests: &[SignInputRequest],
) -> WalletResult<String> {
    let mut psbt = Psbt::from_str(psbt_base64.trim())
        .map_err(|e| WalletError::PsbtInvalid(e.to_string()))?;
    sign_psbt(keychain, &mut psbt, requests)?;
    Ok(psbt.to_string())
}

/// Sign the requested inputs of a PSBT in place.
///
/// Inputs not named in `requests` are left untouched. Any per-input error
/// aborts the whole call; the PSBT may then carry signatures for inputs
/// processed before the failing one, but the failing input itself is
/// never partially modified.
pub fn sign_psbt(
    keychain: &mut KeyChain,
    psbt: &mut Psbt,
    requests: &[SignInputRequest],
) -> WalletResult<()> {
    for request in requests {
        sign_input(keychain, psbt, request)?;
    }
    Ok(())
}

fn sign_input(
    keychain: &mut KeyChain,
    psbt: &mut Psbt,
    request: &SignInputRequest,
) -> WalletResult<()> {
    let index = request.index;
    if index >= psbt.inputs.len() || index >= psbt.unsigned_tx.input.len() {
        return Err(WalletError::PsbtInvalid(format!(
            "input index {} out of range ({} inputs)",
            index,
            psbt.inputs.len()
        )));
    }

    // Script-path material, whether supplied by the caller or embedded in
    // the PSBT, is unsupported.
    if request.tap_merkle_root.is_some() || request.tap_leaf_hash.is_some() {
        return Err(WalletError::TaprootScriptPathUnsupported(index));
    }
    {
        let input = &psbt.inputs[index];
        if input.tap_merkle_root.is_some()
            || !input.tap_scripts.is_empty()
            || !input.tap_script_sigs.is_empty()
        {
            return Err(WalletError::TaprootScriptPathUnsupported(index));
        }
    }

    let spent = spent_txout(psbt, index)?;
    let resolved = resolve_key(keychain, request, &spent.script_pubkey)?;

    let node = keychain.derive_node(&resolved.path)?;
    let public_key = node.private_key.public_key(keychain.secp());

    // The resolved key must reproduce the spent script exactly; signing
    // with the wrong key would burn the input.
    let expected = keychain
        .address_for_key(resolved.script_type, &public_key)?
        .script_pubkey();
    if expected != spent.script_pubkey {
        return Err(WalletError::PsbtInputMismatch(index));
    }

    match resolved.script_type {
        ScriptType::Taproot => sign_taproot_input(keychain, psbt, request, &resolved),
        script_type => sign_ecdsa_input(keychain, psbt, request, &spent, &resolved, script_type),
    }
}

/// The output being spent by input `index`: the witness UTXO when present,
/// otherwise the referenced output of the embedded previous transaction.
fn spent_txout(psbt: &Psbt, index: usize) -> WalletResult<TxOut> {
    let input = &psbt.inputs[index];

    if let Some(utxo) = &input.witness_utxo {
        return Ok(utxo.clone());
    }

    if let Some(prev_tx) = &input.non_witness_utxo {
        let outpoint = psbt.unsigned_tx.input[index].previous_output;
        if prev_tx.compute_txid() != outpoint.txid {
            return Err(WalletError::PsbtInvalid(format!(
                "non-witness utxo txid mismatch on input {}",
                index
            )));
        }
        return prev_tx
            .output
            .get(outpoint.vout as usize)
            .cloned()
            .ok_or(WalletError::CannotDetermineScript(index));
    }

    Err(WalletError::CannotDetermineScript(index))
}

/// Resolve which of our keys signs this input.
fn resolve_key(
    keychain: &mut KeyChain,
    request: &SignInputRequest,
    spent_script: &ScriptBuf,
) -> WalletResult<DerivedAddress> {
    if let Some(path) = &request.path {
        return keychain.derive_address_from_path(path);
    }

    if let Some(address) = &request.address {
        return keychain
            .find_address_path(address)?
            .ok_or_else(|| WalletError::AddressNotFound(address.clone()));
    }

    let address = Address::from_script(spent_script, keychain.network())
        .map_err(|_| WalletError::CannotDetermineScript(request.index))?
        .to_string();
    keychain
        .find_address_path(&address)?
        .ok_or(WalletError::AddressNotFound(address))
}

fn sign_taproot_input(
    keychain: &mut KeyChain,
    psbt: &mut Psbt,
    request: &SignInputRequest,
    resolved: &DerivedAddress,
) -> WalletResult<()> {
    let index = request.index;

    let sighash_type = match request.sighash_types.as_deref() {
        Some([]) | None => match psbt.inputs[index].sighash_type {
            Some(declared) => declared
                .taproot_hash_ty()
                .map_err(|e| WalletError::PsbtInvalid(e.to_string()))?,
            None => TapSighashType::Default,
        },
        Some([single]) => PsbtSighashType::from_u32(*single)
            .taproot_hash_ty()
            .map_err(|e| WalletError::PsbtInvalid(e.to_string()))?,
        Some(_) => return Err(WalletError::TaprootMultiSighashUnsupported),
    };

    let node = keychain.derive_node(&resolved.path)?;
    let (secret, x_only) = normalize_even_y(keychain.secp(), node.private_key);

    // A declared internal key that disagrees with ours means the PSBT was
    // built for a different signer.
    if let Some(declared) = psbt.inputs[index].tap_internal_key {
        if declared != x_only {
            return Err(WalletError::PsbtInputMismatch(index));
        }
    }

    // Taproot sighashes commit to every spent output, so all inputs must
    // carry a resolvable UTXO.
    let mut prevouts = Vec::with_capacity(psbt.inputs.len());
    for i in 0..psbt.inputs.len() {
        prevouts.push(spent_txout(psbt, i)?);
    }

    let unsigned_tx = psbt.unsigned_tx.clone();
    let mut sighasher = SighashCache::new(&unsigned_tx);
    let sighash =
        sighasher.taproot_key_spend_signature_hash(index, &Prevouts::All(&prevouts), sighash_type)?;
    let msg = Message::from_digest_slice(sighash.as_byte_array())?;

    let keypair = Keypair::from_secret_key(keychain.secp(), &secret);
    let tweaked = keypair.tap_tweak(keychain.secp(), None);
    let signature = keychain
        .secp()
        .sign_schnorr_no_aux_rand(&msg, &tweaked.to_keypair());

    let taproot_sig = bitcoin::taproot::Signature {
        signature,
        sighash_type,
    };

    let input = &mut psbt.inputs[index];
    input.tap_internal_key = Some(x_only);
    input.tap_key_sig = Some(taproot_sig);

    if request.finalize {
        finalize_taproot(input, &taproot_sig);
    }

    Ok(())
}

fn sign_ecdsa_input(
    keychain: &mut KeyChain,
    psbt: &mut Psbt,
    request: &SignInputRequest,
    spent: &TxOut,
    resolved: &DerivedAddress,
    script_type: ScriptType,
) -> WalletResult<()> {
    let index = request.index;

    let sighash_type = match psbt.inputs[index].sighash_type {
        Some(declared) => declared
            .ecdsa_hash_ty()
            .map_err(|e| WalletError::PsbtInvalid(e.to_string()))?,
        None => EcdsaSighashType::All,
    };

    // An allowed-set filter: a caller that pins sighash types refuses to
    // sign anything outside the list.
    if let Some(allowed) = &request.sighash_types {
        if !allowed.contains(&(sighash_type as u32)) {
            return Err(WalletError::PsbtInvalid(format!(
                "sighash type {} not in allowed set for input {}",
                sighash_type, index
            )));
        }
    }

    let node = keychain.derive_node(&resolved.path)?;
    let public_key = node.private_key.public_key(keychain.secp());
    let compressed = CompressedPublicKey::try_from(BitcoinPublicKey::new(public_key))
        .map_err(|_| WalletError::DerivedInvalidPublicKey)?;

    let unsigned_tx = psbt.unsigned_tx.clone();
    let mut sighasher = SighashCache::new(&unsigned_tx);

    let msg = match script_type {
        ScriptType::NativeSegwit => {
            let sighash = sighasher.p2wpkh_signature_hash(
                index,
                &spent.script_pubkey,
                spent.value,
                sighash_type,
            )?;
            Message::from_digest_slice(sighash.as_byte_array())?
        }
        ScriptType::NestedSegwit => {
            // The segwit v0 algorithm runs over the inner witness program,
            // not the wrapping P2SH script.
            let inner = ScriptBuf::new_p2wpkh(&compressed.wpubkey_hash());
            let sighash =
                sighasher.p2wpkh_signature_hash(index, &inner, spent.value, sighash_type)?;
            Message::from_digest_slice(sighash.as_byte_array())?
        }
        ScriptType::Legacy => {
            let sighash = sighasher
                .legacy_signature_hash(index, &spent.script_pubkey, sighash_type as u32)
                .map_err(|e| WalletError::PsbtInvalid(e.to_string()))?;
            Message::from_digest_slice(sighash.as_byte_array())?
        }
        ScriptType::Taproot => unreachable!("taproot inputs take the schnorr branch"),
    };

    let signature = bitcoin::ecdsa::Signature {
        signature: keychain.secp().sign_ecdsa(&msg, &node.private_key),
        sighash_type,
    };

    let input = &mut psbt.inputs[index];
    if script_type == ScriptType::NestedSegwit && input.redeem_script.is_none() {
        input.redeem_script = Some(ScriptBuf::new_p2wpkh(&compressed.wpubkey_hash()));
    }
    input
        .partial_sigs
        .insert(BitcoinPublicKey::new(public_key), signature);

    if request.finalize {
        finalize_ecdsa(input, &signature, &compressed, script_type);
    }

    Ok(())
}

fn finalize_taproot(input: &mut bitcoin::psbt::Input, signature: &bitcoin::taproot::Signature) {
    let mut witness = Witness::new();
    witness.push(signature.to_vec());
    input.final_script_witness = Some(witness);
    clear_signing_fields(input);
}

/// Attach the final witness / scriptSig for a single-key ECDSA spend.
///
/// Best-effort: a redeem script too large to push (cannot happen for the
/// scripts we build) is silently skipped, leaving the partial signature in
/// place for an external finalizer.
fn finalize_ecdsa(
    input: &mut bitcoin::psbt::Input,
    signature: &bitcoin::ecdsa::Signature,
    compressed: &CompressedPublicKey,
    script_type: ScriptType,
) {
    match script_type {
        ScriptType::NativeSegwit | ScriptType::NestedSegwit => {
            let mut witness = Witness::new();
            witness.push(signature.to_vec());
            witness.push(compressed.to_bytes());
            input.final_script_witness = Some(witness);

            if script_type == ScriptType::NestedSegwit {
                let redeem = ScriptBuf::new_p2wpkh(&compressed.wpubkey_hash());
                match PushBytesBuf::try_from(redeem.into_bytes()) {
                    Ok(push) => {
                        input.final_script_sig =
                            Some(Builder::new().push_slice(push).into_script());
                    }
                    Err(_) => {
                        input.final_script_witness = None;
                        return;
                    }
                }
            }
        }
        ScriptType::Legacy => {
            let sig_push = match PushBytesBuf::try_from(signature.to_vec()) {
                Ok(push) => push,
                Err(_) => return,
            };
            let key_push = match PushBytesBuf::try_from(compressed.to_bytes().to_vec()) {
                Ok(push) => push,
                Err(_) => return,
            };
            input.final_script_sig = Some(
                Builder::new()
                    .push_slice(sig_push)
                    .push_slice(key_push)
                    .into_script(),
            );
        }
        ScriptType::Taproot => unreachable!("taproot finalization has its own path"),
    }
    clear_signing_fields(input);
}

fn clear_signing_fields(input: &mut bitcoin::psbt::Input) {
    input.partial_sigs.clear();
    input.sighash_type = None;
    input.redeem_script = None;
    input.witness_script = None;
    input.bip32_derivation.clear();
    input.tap_internal_key = None;
    input.tap_key_sig = None;
    input.tap_key_origins.clear();
}

#[cfg(test)]
mod tests {
    use bitcoin::absolute::LockTime;
    use bitcoin::transaction::Version;
    use bitcoin::{
        Amount, Network, OutPoint, Sequence, Transaction, TxIn, Txid,
    };

    use super::*;

    const TEST_PHRASE: &str =
        "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    fn unlocked() -> KeyChain {
        let mut kc = KeyChain::new(Network::Bitcoin);
        kc.unlock(TEST_PHRASE, "").unwrap();
        kc
    }

    fn script_of(derived: &DerivedAddress) -> ScriptBuf {
        Address::from_str(&derived.address)
            .unwrap()
            .require_network(Network::Bitcoin)
            .unwrap()
            .script_pubkey()
    }

    /// One-input unsigned transaction paying back to `destination`.
    fn unsigned_tx(destination: ScriptBuf) -> Transaction {
        Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: vec![TxIn {
                previous_output: OutPoint::new(Txid::all_zeros(), 0),
                script_sig: ScriptBuf::new(),
                sequence: Sequence::ENABLE_RBF_NO_LOCKTIME,
                witness: Witness::default(),
            }],
            output: vec![TxOut {
                value: Amount::from_sat(9_000),
                script_pubkey: destination,
            }],
        }
    }

    fn witness_psbt(spent_script: ScriptBuf, destination: ScriptBuf) -> Psbt {
        let mut psbt = Psbt::from_unsigned_tx(unsigned_tx(destination)).unwrap();
        psbt.inputs[0].witness_utxo = Some(TxOut {
            value: Amount::from_sat(10_000),
            script_pubkey: spent_script,
        });
        psbt
    }

    #[test]
    fn test_sign_p2wpkh_input() {
        let mut kc = unlocked();
        let ours = kc.derive_address(ScriptType::NativeSegwit, 0, 0, 0).unwrap();
        let spk = script_of(&ours);
        let mut psbt = witness_psbt(spk.clone(), spk);

        sign_psbt(&mut kc, &mut psbt, &[SignInputRequest::for_index(0)]).unwrap();

        assert_eq!(psbt.inputs[0].partial_sigs.len(), 1);
        let (pk, sig) = psbt.inputs[0].partial_sigs.iter().next().unwrap();
        assert_eq!(hex::encode(pk.to_bytes()), ours.public_key);
        assert_eq!(sig.sighash_type, EcdsaSighashType::All);
        assert!(psbt.inputs[0].final_script_witness.is_none());
    }

    #[test]
    fn test_explicit_path_beats_address() {
        let mut kc = unlocked();
        let a = kc.derive_address(ScriptType::NativeSegwit, 0, 0, 0).unwrap();
        let b = kc.derive_address(ScriptType::NativeSegwit, 0, 0, 1).unwrap();
        let spk = script_of(&b);
        let mut psbt = witness_psbt(spk.clone(), spk);

        // The address points at key A but the path pins key B, and only
        // key B matches the spent script.
        let request = SignInputRequest {
            index: 0,
            address: Some(a.address.clone()),
            path: Some(b.path.clone()),
            ..Default::default()
        };
        sign_psbt(&mut kc, &mut psbt, &[request]).unwrap();
        let (pk, _) = psbt.inputs[0].partial_sigs.iter().next().unwrap();
        assert_eq!(hex::encode(pk.to_bytes()), b.public_key);
    }

    #[test]
    fn test_mismatched_key_leaves_input_untouched() {
        let mut kc = unlocked();
        let ours = kc.derive_address(ScriptType::NativeSegwit, 0, 0, 0).unwrap();
        let other = kc.derive_address(ScriptType::NativeSegwit, 0, 0, 1).unwrap();
        let spk = script_of(&ours);
        let mut psbt = witness_psbt(spk.clone(), spk);

        let request = SignInputRequest {
            index: 0,
            path: Some(other.path.clone()),
            ..Default::default()
        };
        let err = sign_psbt(&mut kc, &mut psbt, &[request]).unwrap_err();
        assert_eq!(err, WalletError::PsbtInputMismatch(0));
        assert!(psbt.inputs[0].partial_sigs.is_empty());
        assert!(psbt.inputs[0].final_script_witness.is_none());
    }

    #[test]
    fn test_sign_taproot_key_path() {
        let mut kc = unlocked();
        let ours = kc.derive_address(ScriptType::Taproot, 0, 0, 0).unwrap();
        let spk = script_of(&ours);
        let mut psbt = witness_psbt(spk.clone(), spk);

        sign_psbt(&mut kc, &mut psbt, &[SignInputRequest::for_index(0)]).unwrap();

        let sig = psbt.inputs[0].tap_key_sig.expect("key-path signature");
        assert_eq!(sig.sighash_type, TapSighashType::Default);
        assert!(psbt.inputs[0].tap_internal_key.is_some());
        assert!(psbt.inputs[0].partial_sigs.is_empty());
    }

    #[test]
    fn test_taproot_rejects_multiple_sighash_types() {
        let mut kc = unlocked();
        let ours = kc.derive_address(ScriptType::Taproot, 0, 0, 0).unwrap();
        let spk = script_of(&ours);
        let mut psbt = witness_psbt(spk.clone(), spk);

        let request = SignInputRequest {
            index: 0,
            sighash_types: Some(vec![0, 1]),
            ..Default::default()
        };
        let err = sign_psbt(&mut kc, &mut psbt, &[request]).unwrap_err();
        assert_eq!(err, WalletError::TaprootMultiSighashUnsupported);
    }

    #[test]
    fn test_script_path_hints_rejected() {
        let mut kc = unlocked();
        let ours = kc.derive_address(ScriptType::Taproot, 0, 0, 0).unwrap();
        let spk = script_of(&ours);
        let mut psbt = witness_psbt(spk.clone(), spk);

        let request = SignInputRequest {
            index: 0,
            tap_merkle_root: Some("00".repeat(32)),
            ..Default::default()
        };
        let err = sign_psbt(&mut kc, &mut psbt, &[request]).unwrap_err();
        assert_eq!(err, WalletError::TaprootScriptPathUnsupported(0));
    }

    #[test]
    fn test_missing_utxo_cannot_determine_script() {
        let mut kc = unlocked();
        let ours = kc.derive_address(ScriptType::NativeSegwit, 0, 0, 0).unwrap();
        let spk = script_of(&ours);
        let mut psbt = Psbt::from_unsigned_tx(unsigned_tx(spk)).unwrap();

        let err = sign_psbt(&mut kc, &mut psbt, &[SignInputRequest::for_index(0)]).unwrap_err();
        assert_eq!(err, WalletError::CannotDetermineScript(0));
    }

    #[test]
    fn test_out_of_range_index() {
        let mut kc = unlocked();
        let ours = kc.derive_address(ScriptType::NativeSegwit, 0, 0, 0).unwrap();
        let spk = script_of(&ours);
        let mut psbt = witness_psbt(spk.clone(), spk);

        let err = sign_psbt(&mut kc, &mut psbt, &[SignInputRequest::for_index(5)]).unwrap_err();
        assert!(matches!(err, WalletError::PsbtInvalid(_)));
    }

    #[test]
    fn test_finalize_p2wpkh() {
        let mut kc = unlocked();
        let ours = kc.derive_address(ScriptType::NativeSegwit, 0, 0, 0).unwrap();
        let spk = script_of(&ours);
        let mut psbt = witness_psbt(spk.clone(), spk);

        let request = SignInputRequest {
            index: 0,
            finalize: true,
            ..Default::default()
        };
        sign_psbt(&mut kc, &mut psbt, &[request]).unwrap();

        let witness = psbt.inputs[0].final_script_witness.as_ref().unwrap();
        assert_eq!(witness.len(), 2);
        assert_eq!(witness.nth(1).unwrap().len(), 33);
        assert!(psbt.inputs[0].partial_sigs.is_empty());
    }

    #[test]
    fn test_finalize_nested_segwit_sets_script_sig() {
        let mut kc = unlocked();
        let ours = kc.derive_address(ScriptType::NestedSegwit, 0, 0, 0).unwrap();
        let spk = script_of(&ours);
        let mut psbt = witness_psbt(spk.clone(), spk);

        let request = SignInputRequest {
            index: 0,
            finalize: true,
            ..Default::default()
        };
        sign_psbt(&mut kc, &mut psbt, &[request]).unwrap();

        let input = &psbt.inputs[0];
        assert!(input.final_script_witness.is_some());
        // The scriptSig is a single push of the p2wpkh redeem script.
        let script_sig = input.final_script_sig.as_ref().unwrap();
        assert_eq!(script_sig.len(), 23);
    }

    #[test]
    fn test_legacy_input_via_non_witness_utxo() {
        let mut kc = unlocked();
        let ours = kc.derive_address(ScriptType::Legacy, 0, 0, 0).unwrap();
        let spk = script_of(&ours);

        let prev_tx = Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: vec![TxIn {
                previous_output: OutPoint::new(Txid::all_zeros(), 7),
                script_sig: ScriptBuf::new(),
                sequence: Sequence::MAX,
                witness: Witness::default(),
            }],
            output: vec![TxOut {
                value: Amount::from_sat(25_000),
                script_pubkey: spk.clone(),
            }],
        };

        let mut tx = unsigned_tx(spk);
        tx.input[0].previous_output = OutPoint::new(prev_tx.compute_txid(), 0);
        let mut psbt = Psbt::from_unsigned_tx(tx).unwrap();
        psbt.inputs[0].non_witness_utxo = Some(prev_tx);

        let request = SignInputRequest {
            index: 0,
            finalize: true,
            ..Default::default()
        };
        sign_psbt(&mut kc, &mut psbt, &[request]).unwrap();

        let script_sig = psbt.inputs[0].final_script_sig.as_ref().unwrap();
        assert!(!script_sig.is_empty());
        assert!(psbt.inputs[0].final_script_witness.is_none());
    }

    #[test]
    fn test_base64_roundtrip() {
        let mut kc = unlocked();
        let ours = kc.derive_address(ScriptType::NativeSegwit, 0, 0, 0).unwrap();
        let spk = script_of(&ours);
        let psbt = witness_psbt(spk.clone(), spk);

        let signed =
            sign_psbt_base64(&mut kc, &psbt.to_string(), &[SignInputRequest::for_index(0)])
                .unwrap();
        let parsed = Psbt::from_str(&signed).unwrap();
        assert_eq!(parsed.inputs[0].partial_sigs.len(), 1);

        assert!(matches!(
            sign_psbt_base64(&mut kc, "not a psbt", &[]),
            Err(WalletError::PsbtInvalid(_))
        ));
    }
}
