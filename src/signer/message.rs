//! Message signing.
//!
//! Non-Taproot addresses sign with recoverable ECDSA over the Bitcoin
//! signed-message hash (the prefixed double-SHA256 scheme, which is not
//! malleable across messages). Taproot addresses sign with BIP322-simple:
//! a Schnorr key-path signature over the virtual to_spend/to_sign
//! transaction pair, serialized as the base64 witness stack.

use bitcoin::absolute::LockTime;
use bitcoin::hashes::Hash;
use bitcoin::key::{Keypair, TapTweak};
use bitcoin::opcodes::all::OP_RETURN;
use bitcoin::script::Builder;
use bitcoin::secp256k1::Message;
use bitcoin::sighash::{Prevouts, SighashCache, TapSighashType};
use bitcoin::sign_message::{signed_msg_hash, MessageSignature};
use bitcoin::transaction::Version;
use bitcoin::{
    Amount, OutPoint, ScriptBuf, Sequence, Transaction, TxIn, TxOut, Txid, Witness,
};

use crate::error::{WalletError, WalletResult};
use crate::keychain::KeyChain;
use crate::types::{ScriptType, SigningProtocol};

use super::{normalize_even_y, tagged_hash};

const BIP322_TAG: &str = "BIP0322-signed-message";

/// Sign a message with the key behind `address`.
///
/// With no explicit protocol, non-Taproot addresses default to ECDSA and
/// Taproot addresses default to (and require) BIP322-simple. The result
/// is base64: a 65-byte recoverable signature for ECDSA, a serialized
/// witness stack for BIP322.
pub fn sign_message(
    keychain: &mut KeyChain,
    message: &str,
    address: &str,
    protocol: Option<SigningProtocol>,
) -> WalletResult<String> {
    let resolved = keychain
        .find_address_path(address)?
        .ok_or_else(|| WalletError::AddressNotFound(address.to_string()))?;

    let is_taproot = resolved.script_type == ScriptType::Taproot;
    let effective = protocol.unwrap_or(if is_taproot {
        SigningProtocol::Bip322Simple
    } else {
        SigningProtocol::Ecdsa
    });

    match (effective, is_taproot) {
        (SigningProtocol::Ecdsa, true) => Err(WalletError::TaprootRequiresBip322),
        (SigningProtocol::Bip322Simple, false) => Err(WalletError::Bip322RequiresTaproot),
        (SigningProtocol::Ecdsa, false) => sign_ecdsa(keychain, message, &resolved.path),
        (SigningProtocol::Bip322Simple, true) => {
            sign_bip322_simple(keychain, message, &resolved.path)
        }
    }
}

fn sign_ecdsa(keychain: &mut KeyChain, message: &str, path: &str) -> WalletResult<String> {
    let node = keychain.derive_node(path)?;

    let hash = signed_msg_hash(message);
    let msg = Message::from_digest_slice(hash.as_byte_array())?;
    let signature = keychain
        .secp()
        .sign_ecdsa_recoverable(&msg, &node.private_key);

    let encoded = MessageSignature::new(signature, true);
    Ok(base64_encode(&encoded.serialize()))
}

fn sign_bip322_simple(keychain: &mut KeyChain, message: &str, path: &str) -> WalletResult<String> {
    let node = keychain.derive_node(path)?;
    let (secret, x_only) = normalize_even_y(keychain.secp(), node.private_key);

    let challenge = keychain
        .address_for_key(ScriptType::Taproot, &node.private_key.public_key(keychain.secp()))?
        .script_pubkey();

    let to_spend = bip322_to_spend(message, challenge.clone());
    let to_sign = bip322_to_sign(&to_spend);

    let prevouts = [to_spend.output[0].clone()];
    let mut sighasher = SighashCache::new(&to_sign);
    let sighash =
        sighasher.taproot_key_spend_signature_hash(0, &Prevouts::All(&prevouts), TapSighashType::All)?;
    let msg = Message::from_digest_slice(sighash.as_byte_array())?;

    let keypair = Keypair::from_secret_key(keychain.secp(), &secret);
    debug_assert_eq!(keypair.x_only_public_key().0, x_only);
    let tweaked = keypair.tap_tweak(keychain.secp(), None);
    let signature = keychain
        .secp()
        .sign_schnorr_no_aux_rand(&msg, &tweaked.to_keypair());

    // Witness for a key-path spend: signature plus the sighash byte
    // (TapSighashType::All is explicit in BIP322 signatures).
    let mut sig_vec = signature.as_ref().to_vec();
    sig_vec.push(TapSighashType::All as u8);
    let mut witness = Witness::new();
    witness.push(sig_vec);

    Ok(base64_encode(&bitcoin::consensus::encode::serialize(
        &witness,
    )))
}

/// The BIP322 virtual transaction committing to the message.
fn bip322_to_spend(message: &str, message_challenge: ScriptBuf) -> Transaction {
    let message_hash = tagged_hash(BIP322_TAG, message.as_bytes());

    Transaction {
        version: Version(0),
        lock_time: LockTime::ZERO,
        input: vec![TxIn {
            previous_output: OutPoint {
                txid: Txid::all_zeros(),
                vout: 0xFFFF_FFFF,
            },
            script_sig: Builder::new()
                .push_int(0)
                .push_slice(message_hash)
                .into_script(),
            sequence: Sequence::ZERO,
            witness: Witness::default(),
        }],
        output: vec![TxOut {
            value: Amount::ZERO,
            script_pubkey: message_challenge,
        }],
    }
}

/// The BIP322 transaction that actually gets signed: spends to_spend:0
/// into an OP_RETURN output.
fn bip322_to_sign(to_spend: &Transaction) -> Transaction {
    Transaction {
        version: Version(0),
        lock_time: LockTime::ZERO,
        input: vec![TxIn {
            previous_output: OutPoint::new(to_spend.compute_txid(), 0),
            script_sig: ScriptBuf::new(),
            sequence: Sequence::ZERO,
            witness: Witness::default(),
        }],
        output: vec![TxOut {
            value: Amount::ZERO,
            script_pubkey: Builder::new().push_opcode(OP_RETURN).into_script(),
        }],
    }
}

fn base64_encode(data: &[u8]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(data)
}
