//! btcvault Core Library
//!
//! Cryptographic core of a self-custodial Bitcoin wallet.
//!
//! # Architecture
//!
//! This crate provides:
//! - **keychain**: BIP39 seed handling, BIP32 derivation, address
//!   construction for legacy, nested-segwit, native-segwit and taproot
//!   script types, and reverse address lookup
//! - **signer**: message signing (recoverable ECDSA and BIP322-simple)
//!   and PSBT signing with taproot key-path support
//! - **vault**: authenticated-encrypted slot storage over a platform
//!   backend, plus MAC-protected backup export/import
//! - **wallet**: the caller-owned facade tying the engines together
//! - **global**: an optional process-wide wallet instance for hosts that
//!   cannot carry a handle across calls
//!
//! # Security
//!
//! This crate uses `zeroize` to securely clear sensitive data from memory.
//! Seeds, mnemonics, passphrases and derived keys are wiped when dropped
//! or when the wallet locks. At-rest data is AES-256-GCM encrypted with
//! slot-name binding; backups are integrity-checked before decryption.
//!
//! # Example
//!
//! ```rust,ignore
//! use btcvault::types::AddressPurpose;
//! use btcvault::vault::MemoryBackend;
//! use btcvault::wallet::Wallet;
//!
//! let mut wallet = Wallet::open(Box::new(MemoryBackend::new()), None, false)?;
//! wallet.install_seed("abandon abandon ... about", "", false)?;
//! let addresses = wallet.get_addresses(&[AddressPurpose::Payment])?;
//! println!("Payment address: {}", addresses[0].address);
//! ```

pub mod error;
pub mod global;
pub mod keychain;
pub mod logging;
pub mod signer;
pub mod types;
pub mod vault;
pub mod wallet;

pub use error::{WalletError, WalletResult};
pub use keychain::{generate_seed_phrase, KeyChain, WordCount};
pub use types::{
    AddressLookupConfig, AddressLookupUpdate, AddressPurpose, CustomPaths, DerivedAddress,
    ScriptType, SignInputRequest, SigningProtocol,
};
pub use vault::{BackupEnvelope, EncryptedStore, MemoryBackend, StorageBackend};
pub use wallet::Wallet;
