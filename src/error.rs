//! Unified error types for the wallet core.
//!
//! Every fallible operation in the crate returns [`WalletResult`]. The error
//! enum is closed: callers can match exhaustively and map each variant to a
//! stable category at the FFI or UI boundary.

use thiserror::Error;

/// Categorical errors for all wallet-core operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WalletError {
    /// An operation needed key material but the wallet is locked.
    #[error("wallet is locked")]
    WalletLocked,

    /// The seed phrase failed BIP39 checksum or word-list validation.
    #[error("invalid seed phrase")]
    InvalidSeedPhrase,

    /// A derived public key was not a valid secp256k1 curve point.
    #[error("derivation produced an invalid public key")]
    DerivedInvalidPublicKey,

    /// Derivation path purpose outside the supported set {44, 49, 84, 86}.
    #[error("unsupported derivation purpose: {0}")]
    UnsupportedDerivationPurpose(u32),

    /// Derivation path string is syntactically invalid.
    #[error("invalid derivation path: {0}")]
    InvalidDerivationPath(String),

    /// The address could not be resolved to any known derivation path.
    #[error("address not found in wallet: {0}")]
    AddressNotFound(String),

    /// A PSBT input carried neither a witness UTXO nor a usable
    /// non-witness transaction, so the spent script is unknown.
    #[error("cannot determine script for input {0}")]
    CannotDetermineScript(usize),

    /// Taproot script-path (Merkle-leaf) spending is not supported.
    #[error("taproot script-path spending is unsupported (input {0})")]
    TaprootScriptPathUnsupported(usize),

    /// More than one sighash type was requested for a Taproot input.
    #[error("taproot inputs accept at most one sighash type")]
    TaprootMultiSighashUnsupported,

    /// ECDSA was explicitly requested for a Taproot address.
    #[error("taproot addresses must sign messages with BIP322")]
    TaprootRequiresBip322,

    /// BIP322 was explicitly requested for a non-Taproot address.
    #[error("BIP322 message signing requires a taproot address")]
    Bip322RequiresTaproot,

    /// The script recomputed from the resolved key disagrees with the
    /// script the PSBT actually spends.
    #[error("input {0} does not match the resolved signing key")]
    PsbtInputMismatch(usize),

    /// The PSBT could not be parsed or a request referenced it incorrectly.
    #[error("invalid PSBT: {0}")]
    PsbtInvalid(String),

    /// The store is password-protected and no password was supplied.
    #[error("a password is required to open this wallet")]
    PasswordRequired,

    /// The supplied store password is wrong.
    #[error("wrong wallet password")]
    WrongPassword,

    /// Authenticated decryption of a storage slot failed.
    #[error("decryption failed")]
    DecryptionFailed,

    /// The backup envelope MAC did not verify.
    #[error("backup integrity check failed")]
    BackupIntegrityFailure,

    /// The backup envelope or its payload is structurally invalid.
    #[error("invalid backup format: {0}")]
    BackupFormatInvalid(String),

    /// Exporting a backup requires the live wallet to have a password.
    #[error("a wallet password must be set before exporting a backup")]
    BackupRequiresPassword,

    /// An import would overwrite an existing wallet without `overwrite`.
    #[error("a wallet already exists; pass overwrite to replace it")]
    WalletExists,

    /// No wallet has been installed in the store yet.
    #[error("no wallet installed")]
    NoWallet,

    /// The store was opened read-only and a write was attempted.
    #[error("store is read-only")]
    ReadOnlyStore,

    /// Low-level cryptographic failure (secp256k1, BIP32, AEAD).
    #[error("crypto error: {0}")]
    Crypto(String),

    /// Storage backend failure.
    #[error("storage error: {0}")]
    Storage(String),
}

/// Result type alias for wallet-core operations.
pub type WalletResult<T> = Result<T, WalletError>;

// Conversions from library error types.

impl From<bitcoin::bip32::Error> for WalletError {
    fn from(e: bitcoin::bip32::Error) -> Self {
        WalletError::Crypto(format!("BIP32 error: {}", e))
    }
}

impl From<bitcoin::secp256k1::Error> for WalletError {
    fn from(e: bitcoin::secp256k1::Error) -> Self {
        WalletError::Crypto(format!("Secp256k1 error: {}", e))
    }
}

impl From<bip39::Error> for WalletError {
    fn from(_: bip39::Error) -> Self {
        WalletError::InvalidSeedPhrase
    }
}

impl From<bitcoin::psbt::Error> for WalletError {
    fn from(e: bitcoin::psbt::Error) -> Self {
        WalletError::PsbtInvalid(e.to_string())
    }
}

impl From<bitcoin::sighash::TaprootError> for WalletError {
    fn from(e: bitcoin::sighash::TaprootError) -> Self {
        WalletError::Crypto(format!("taproot sighash error: {}", e))
    }
}

impl From<bitcoin::sighash::P2wpkhError> for WalletError {
    fn from(e: bitcoin::sighash::P2wpkhError) -> Self {
        WalletError::Crypto(format!("segwit sighash error: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_is_stable() {
        assert_eq!(
            WalletError::UnsupportedDerivationPurpose(45).to_string(),
            "unsupported derivation purpose: 45"
        );
        assert_eq!(WalletError::WalletLocked.to_string(), "wallet is locked");
    }

    #[test]
    fn test_bip39_error_maps_to_invalid_seed_phrase() {
        let err = bip39::Mnemonic::parse("not a mnemonic").unwrap_err();
        assert_eq!(WalletError::from(err), WalletError::InvalidSeedPhrase);
    }
}
