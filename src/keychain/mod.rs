//! Hierarchical key derivation.
//!
//! [`KeyChain`] turns a BIP39 seed phrase into a master key node, derives
//! child nodes along BIP32 paths, caches derived nodes for the lifetime of
//! an unlock session, and constructs addresses for the four supported
//! script types.
//!
//! SECURITY: the master key exists only while unlocked and is erased on
//! `lock()`. Seeds are wrapped in `Zeroizing` so they are wiped on every
//! exit path.

pub mod lookup;
pub mod path;

use std::collections::HashMap;
use std::str::FromStr;

use bip39::Mnemonic;
use bitcoin::bip32::{DerivationPath, Xpriv};
use bitcoin::key::{CompressedPublicKey, PublicKey as BitcoinPublicKey};
use bitcoin::secp256k1::{All, PublicKey, Secp256k1};
use bitcoin::{Address, Network};
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroizing;

use crate::error::{WalletError, WalletResult};
use crate::types::{
    AddressLookupConfig, AddressLookupUpdate, AddressPurpose, CustomPaths, DerivedAddress,
    ScriptType,
};

/// Seed phrase strengths supported for wallet creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WordCount {
    /// 128 bits of entropy.
    Words12,
    /// 256 bits of entropy.
    Words24,
}

/// Generate a fresh seed phrase from OS entropy.
///
/// SECURITY: the entropy buffer is zeroized after mnemonic generation.
pub fn generate_seed_phrase(words: WordCount) -> WalletResult<String> {
    let len = match words {
        WordCount::Words12 => 16,
        WordCount::Words24 => 32,
    };
    let mut entropy = Zeroizing::new(vec![0u8; len]);
    OsRng.fill_bytes(entropy.as_mut());

    let mnemonic = Mnemonic::from_entropy(entropy.as_ref())
        .map_err(|e| WalletError::Crypto(format!("failed to create mnemonic: {}", e)))?;
    Ok(mnemonic.to_string())
}

/// The derivation engine: master key, derived-node cache, custom path
/// overrides and reverse-lookup bounds for one unlock session.
pub struct KeyChain {
    secp: Secp256k1<All>,
    network: Network,
    master: Option<Xpriv>,
    cache: HashMap<String, Xpriv>,
    custom_paths: CustomPaths,
    lookup: AddressLookupConfig,
}

impl KeyChain {
    /// Create a locked keychain for the given network.
    pub fn new(network: Network) -> Self {
        Self {
            secp: Secp256k1::new(),
            network,
            master: None,
            cache: HashMap::new(),
            custom_paths: CustomPaths::default(),
            lookup: AddressLookupConfig::default(),
        }
    }

    /// Unlock with a seed phrase and optional BIP39 passphrase.
    ///
    /// Validates the phrase checksum, derives the 512-bit seed and builds
    /// the master key node. Any prior cache and master key are discarded,
    /// so this can re-unlock with a different seed after `lock()`.
    pub fn unlock(&mut self, seed_phrase: &str, passphrase: &str) -> WalletResult<()> {
        let mnemonic = Mnemonic::parse(seed_phrase).map_err(|_| WalletError::InvalidSeedPhrase)?;
        let seed = Zeroizing::new(mnemonic.to_seed(passphrase));

        self.lock();
        self.master = Some(Xpriv::new_master(self.network, seed.as_ref())?);
        Ok(())
    }

    /// Erase the master key and clear the derived-node cache.
    pub fn lock(&mut self) {
        if let Some(mut master) = self.master.take() {
            master.private_key.non_secure_erase();
        }
        for (_, mut node) in self.cache.drain() {
            node.private_key.non_secure_erase();
        }
    }

    pub fn is_unlocked(&self) -> bool {
        self.master.is_some()
    }

    pub fn network(&self) -> Network {
        self.network
    }

    /// Switch the active network. The cache is cleared because canonical
    /// paths embed the coin type.
    pub fn set_network(&mut self, network: Network) {
        if network != self.network {
            self.network = network;
            for (_, mut node) in self.cache.drain() {
                node.private_key.non_secure_erase();
            }
        }
    }

    pub fn custom_paths(&self) -> &CustomPaths {
        &self.custom_paths
    }

    pub fn set_custom_paths(&mut self, custom_paths: CustomPaths) {
        self.custom_paths = custom_paths;
    }

    pub fn lookup_config(&self) -> AddressLookupConfig {
        self.lookup
    }

    /// Apply a partial lookup-config update, clamping each field to its
    /// hard ceiling. Does not affect the cache.
    pub fn set_lookup_config(&mut self, update: AddressLookupUpdate) {
        self.lookup.apply(update);
    }

    pub(crate) fn secp(&self) -> &Secp256k1<All> {
        &self.secp
    }

    /// Derive (or fetch from cache) the key node at a canonical path.
    ///
    /// For a fixed seed and network the same path always yields the same
    /// node, so the cache is purely a performance optimization.
    pub(crate) fn derive_node(&mut self, path: &str) -> WalletResult<Xpriv> {
        let master = self.master.ok_or(WalletError::WalletLocked)?;

        if let Some(node) = self.cache.get(path) {
            return Ok(*node);
        }

        let parsed = DerivationPath::from_str(path)
            .map_err(|e| WalletError::InvalidDerivationPath(format!("{}: {}", path, e)))?;
        let node = master.derive_priv(&self.secp, &parsed)?;
        self.cache.insert(path.to_string(), node);
        Ok(node)
    }

    /// Derive the address at `m/purpose'/coin'/account'/change/index`.
    pub fn derive_address(
        &mut self,
        script_type: ScriptType,
        account: u32,
        change: u32,
        index: u32,
    ) -> WalletResult<DerivedAddress> {
        let path = script_type.derivation_path(self.network, account, change, index);
        self.derive_address_at(script_type, &path)
    }

    /// Derive the address at an explicit path, inferring the script type
    /// from the path's purpose field.
    pub fn derive_address_from_path(&mut self, path: &str) -> WalletResult<DerivedAddress> {
        let parsed = path::parse_path(path)?;
        let script_type = ScriptType::from_purpose(parsed.require_purpose()?)?;
        self.derive_address_at(script_type, path)
    }

    /// The single address for a wallet purpose: the custom override when
    /// configured, the default account-0 path otherwise.
    pub fn address_for_purpose(&mut self, purpose: AddressPurpose) -> WalletResult<DerivedAddress> {
        if let Some(custom) = self.custom_paths.get(purpose).map(str::to_owned) {
            return self.derive_address_from_path(&custom);
        }
        self.derive_address(purpose.default_script_type(), 0, 0, 0)
    }

    fn derive_address_at(
        &mut self,
        script_type: ScriptType,
        path: &str,
    ) -> WalletResult<DerivedAddress> {
        let node = self.derive_node(path)?;
        let public_key = node.private_key.public_key(&self.secp);

        // Defensive re-validation: a corrupt derivation must never reach
        // script construction.
        let encoded = public_key.serialize();
        PublicKey::from_slice(&encoded).map_err(|_| WalletError::DerivedInvalidPublicKey)?;

        let address = self.address_for_key(script_type, &public_key)?;

        Ok(DerivedAddress {
            address: address.to_string(),
            public_key: hex::encode(encoded),
            path: path.to_string(),
            script_type,
        })
    }

    /// Construct the script-type-appropriate address for a public key.
    pub(crate) fn address_for_key(
        &self,
        script_type: ScriptType,
        public_key: &PublicKey,
    ) -> WalletResult<Address> {
        let compressed = CompressedPublicKey::try_from(BitcoinPublicKey::new(*public_key))
            .map_err(|_| WalletError::DerivedInvalidPublicKey)?;

        Ok(match script_type {
            ScriptType::Legacy => Address::p2pkh(compressed.pubkey_hash(), self.network),
            ScriptType::NestedSegwit => Address::p2shwpkh(&compressed, self.network),
            ScriptType::NativeSegwit => Address::p2wpkh(&compressed, self.network),
            ScriptType::Taproot => {
                // Key-path only: the x-only form of the public key is the
                // internal key, no script tree.
                let (x_only, _parity) = public_key.x_only_public_key();
                Address::p2tr(&self.secp, x_only, None, self.network)
            }
        })
    }
}

impl Drop for KeyChain {
    fn drop(&mut self) {
        self.lock();
    }
}
