//! Shared data types for the wallet core.
//!
//! Script types, address purposes, lookup configuration and the records
//! exchanged between the derivation and signing engines.

use bitcoin::Network;
use serde::{Deserialize, Serialize};

use crate::error::{WalletError, WalletResult};

/// The four supported script conventions, each bound to a fixed BIP
/// purpose number and one script-construction rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptType {
    /// P2PKH, purpose 44.
    Legacy,
    /// P2SH-wrapped P2WPKH, purpose 49.
    NestedSegwit,
    /// P2WPKH, purpose 84.
    NativeSegwit,
    /// P2TR key-path only, purpose 86.
    Taproot,
}

impl ScriptType {
    /// All script types, in reverse-lookup scan order.
    pub const ALL: [ScriptType; 4] = [
        ScriptType::NativeSegwit,
        ScriptType::Taproot,
        ScriptType::NestedSegwit,
        ScriptType::Legacy,
    ];

    /// The BIP purpose number bound to this script type.
    pub fn purpose(self) -> u32 {
        match self {
            ScriptType::Legacy => 44,
            ScriptType::NestedSegwit => 49,
            ScriptType::NativeSegwit => 84,
            ScriptType::Taproot => 86,
        }
    }

    /// Map a path purpose number back to a script type.
    pub fn from_purpose(purpose: u32) -> WalletResult<Self> {
        match purpose {
            44 => Ok(ScriptType::Legacy),
            49 => Ok(ScriptType::NestedSegwit),
            84 => Ok(ScriptType::NativeSegwit),
            86 => Ok(ScriptType::Taproot),
            other => Err(WalletError::UnsupportedDerivationPurpose(other)),
        }
    }

    /// Canonical path `m/purpose'/coin'/account'/change/index` for this
    /// script type on the given network.
    pub fn derivation_path(self, network: Network, account: u32, change: u32, index: u32) -> String {
        format!(
            "m/{}'/{}'/{}'/{}/{}",
            self.purpose(),
            coin_type(network),
            account,
            change,
            index
        )
    }
}

/// SLIP-0044 coin type for the active network.
pub fn coin_type(network: Network) -> u32 {
    match network {
        Network::Bitcoin => 0,
        _ => 1,
    }
}

/// Wire name of a network, as recorded in backup envelopes and config.
pub fn network_name(network: Network) -> &'static str {
    match network {
        Network::Bitcoin => "mainnet",
        _ => "testnet",
    }
}

/// Parse a network wire name back into a [`Network`].
pub fn network_from_name(name: &str) -> WalletResult<Network> {
    match name {
        "mainnet" => Ok(Network::Bitcoin),
        "testnet" => Ok(Network::Testnet),
        other => Err(WalletError::BackupFormatInvalid(format!(
            "unknown network: {}",
            other
        ))),
    }
}

/// The two wallet-level address purposes callers ask for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressPurpose {
    Payment,
    Ordinals,
}

impl AddressPurpose {
    /// Default script type when no custom path overrides the purpose.
    pub fn default_script_type(self) -> ScriptType {
        match self {
            AddressPurpose::Payment => ScriptType::NativeSegwit,
            AddressPurpose::Ordinals => ScriptType::Taproot,
        }
    }
}

/// Optional per-purpose derivation path overrides, e.g. to match a
/// third-party wallet's non-standard scheme. When present for a purpose
/// the override wins over the default path and is checked first during
/// reverse lookup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomPaths {
    pub payment: Option<String>,
    pub ordinals: Option<String>,
}

impl CustomPaths {
    pub fn get(&self, purpose: AddressPurpose) -> Option<&str> {
        match purpose {
            AddressPurpose::Payment => self.payment.as_deref(),
            AddressPurpose::Ordinals => self.ordinals.as_deref(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.payment.is_none() && self.ordinals.is_none()
    }
}

/// Hard ceilings keeping worst-case reverse lookup cost bounded.
pub const MAX_ACCOUNT_CEILING: u32 = 100;
pub const MAX_WINDOW_CEILING: u32 = 200;

/// Bounds for the reverse address lookup scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressLookupConfig {
    /// Accounts 0..=max_account_index are scanned.
    pub max_account_index: u32,
    /// Receive-chain indices 0..receive_window are scanned.
    pub receive_window: u32,
    /// Change-chain indices 0..change_window are scanned.
    pub change_window: u32,
}

impl Default for AddressLookupConfig {
    fn default() -> Self {
        Self {
            max_account_index: 1,
            receive_window: 20,
            change_window: 10,
        }
    }
}

/// Partial update for [`AddressLookupConfig`]; unset fields keep their
/// current value, set fields are clamped to the hard ceilings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressLookupUpdate {
    pub max_account_index: Option<u32>,
    pub receive_window: Option<u32>,
    pub change_window: Option<u32>,
}

impl AddressLookupConfig {
    /// Apply a partial update, clamping each provided field.
    pub fn apply(&mut self, update: AddressLookupUpdate) {
        if let Some(v) = update.max_account_index {
            self.max_account_index = v.min(MAX_ACCOUNT_CEILING);
        }
        if let Some(v) = update.receive_window {
            self.receive_window = v.min(MAX_WINDOW_CEILING);
        }
        if let Some(v) = update.change_window {
            self.change_window = v.min(MAX_WINDOW_CEILING);
        }
    }
}

/// A fully derived address record. Pure derived data: never persisted,
/// always recomputable from seed + path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivedAddress {
    pub address: String,
    /// Compressed SEC public key (33 bytes), hex-encoded.
    pub public_key: String,
    pub path: String,
    pub script_type: ScriptType,
}

/// Message signing protocols exposed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SigningProtocol {
    Ecdsa,
    Bip322Simple,
}

/// Per-input signing instructions for [`crate::signer::sign_psbt`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignInputRequest {
    /// Index into the PSBT's inputs.
    pub index: usize,
    /// Resolve the signing key from this address.
    pub address: Option<String>,
    /// Explicit derivation path; always wins over address resolution.
    pub path: Option<String>,
    /// Allowed sighash types (raw PSBT encoding). For Taproot inputs at
    /// most one entry is accepted and used as the signing type.
    pub sighash_types: Option<Vec<u32>>,
    /// Script-path hint: rejected, script-path spending is unsupported.
    pub tap_merkle_root: Option<String>,
    /// Script-path hint: rejected, script-path spending is unsupported.
    pub tap_leaf_hash: Option<String>,
    /// Attach the final witness / scriptSig after signing (best-effort).
    pub finalize: bool,
}

impl SignInputRequest {
    /// Minimal request: sign input `index`, resolving the key from the
    /// spent script.
    pub fn for_index(index: usize) -> Self {
        Self {
            index,
            ..Default::default()
        }
    }
}
