//! The wallet facade.
//!
//! [`Wallet`] ties the derivation engine, signing engine and encrypted
//! store into one caller-owned handle: install or restore a seed, unlock,
//! derive addresses, sign, manage the store password and move backups in
//! and out. All key material lives in the keychain while unlocked and in
//! encrypted slots at rest.

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use bitcoin::psbt::Psbt;
use bitcoin::Network;

use crate::error::{WalletError, WalletResult};
use crate::log_info;
use crate::keychain::KeyChain;
use crate::signer;
use crate::types::{
    network_from_name, network_name, AddressLookupUpdate, AddressPurpose, CustomPaths,
    DerivedAddress, SignInputRequest, SigningProtocol,
};
use crate::vault::{BackupEnvelope, BackupPayload, EncryptedStore, StorageBackend};

const MNEMONIC_SLOT: &str = "mnemonic";
const PASSPHRASE_SLOT: &str = "passphrase";
const CONFIG_SLOT: &str = "config";

/// Non-secret wallet configuration persisted in its own slot.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct WalletConfig {
    network: Option<String>,
    #[serde(default)]
    custom_paths: CustomPaths,
}

/// A self-custodial wallet over an encrypted store.
pub struct Wallet {
    store: EncryptedStore,
    keychain: KeyChain,
}

impl Wallet {
    /// Open a wallet over `backend`.
    ///
    /// Password rules are the store's: `PasswordRequired` when one is
    /// needed, `WrongPassword` when it does not verify. The keychain
    /// starts locked; call [`Wallet::unlock`] to load key material.
    pub fn open(
        backend: Box<dyn StorageBackend>,
        password: Option<&str>,
        read_only: bool,
    ) -> WalletResult<Self> {
        let store = EncryptedStore::open(backend, password, read_only)?;

        let config = match store.get(CONFIG_SLOT)? {
            Some(raw) => serde_json::from_slice::<WalletConfig>(&raw)
                .map_err(|e| WalletError::Storage(format!("corrupt wallet config: {}", e)))?,
            None => WalletConfig::default(),
        };

        let network = match &config.network {
            Some(name) => network_from_name(name)?,
            None => Network::Bitcoin,
        };

        let mut keychain = KeyChain::new(network);
        keychain.set_custom_paths(config.custom_paths);

        Ok(Self { store, keychain })
    }

    /// Whether a seed has been installed in this store.
    pub fn exists(&self) -> WalletResult<bool> {
        Ok(self.store.get(MNEMONIC_SLOT)?.is_some())
    }

    /// Install a seed phrase (and optional BIP39 passphrase), validating
    /// it before anything is written.
    pub fn install_seed(
        &mut self,
        mnemonic: &str,
        passphrase: &str,
        overwrite: bool,
    ) -> WalletResult<()> {
        if self.exists()? && !overwrite {
            return Err(WalletError::WalletExists);
        }

        // Unlocking doubles as validation; a bad phrase never reaches
        // storage.
        self.keychain.unlock(mnemonic, passphrase)?;

        self.store.set(MNEMONIC_SLOT, mnemonic.as_bytes())?;
        self.store.set(PASSPHRASE_SLOT, passphrase.as_bytes())?;
        self.persist_config()?;
        log_info!("wallet", "seed installed on {}", network_name(self.network()));
        Ok(())
    }

    /// Load key material from the store into the keychain.
    pub fn unlock(&mut self) -> WalletResult<()> {
        let mnemonic = Zeroizing::new(
            self.store
                .get(MNEMONIC_SLOT)?
                .ok_or(WalletError::NoWallet)?,
        );
        let passphrase = Zeroizing::new(self.store.get(PASSPHRASE_SLOT)?.unwrap_or_default());

        let mnemonic = std::str::from_utf8(&mnemonic)
            .map_err(|_| WalletError::Storage("mnemonic slot is not UTF-8".into()))?;
        let passphrase = std::str::from_utf8(&passphrase)
            .map_err(|_| WalletError::Storage("passphrase slot is not UTF-8".into()))?;

        self.keychain.unlock(mnemonic, passphrase)
    }

    /// Erase key material from memory. The store stays open.
    pub fn lock(&mut self) {
        self.keychain.lock();
    }

    pub fn is_unlocked(&self) -> bool {
        self.keychain.is_unlocked()
    }

    pub fn network(&self) -> Network {
        self.keychain.network()
    }

    /// Switch networks; derivation paths and addresses change with the
    /// coin type.
    pub fn set_network(&mut self, network: Network) -> WalletResult<()> {
        self.keychain.set_network(network);
        self.persist_config()
    }

    pub fn set_custom_paths(&mut self, custom_paths: CustomPaths) -> WalletResult<()> {
        self.keychain.set_custom_paths(custom_paths);
        self.persist_config()
    }

    pub fn set_lookup_config(&mut self, update: AddressLookupUpdate) {
        self.keychain.set_lookup_config(update);
    }

    /// Direct access to the derivation engine.
    pub fn keychain(&mut self) -> &mut KeyChain {
        &mut self.keychain
    }

    /// The wallet's address for each requested purpose.
    pub fn get_addresses(
        &mut self,
        purposes: &[AddressPurpose],
    ) -> WalletResult<Vec<DerivedAddress>> {
        purposes
            .iter()
            .map(|purpose| self.keychain.address_for_purpose(*purpose))
            .collect()
    }

    pub fn sign_message(
        &mut self,
        message: &str,
        address: &str,
        protocol: Option<SigningProtocol>,
    ) -> WalletResult<String> {
        signer::sign_message(&mut self.keychain, message, address, protocol)
    }

    pub fn sign_psbt(
        &mut self,
        psbt: &mut Psbt,
        requests: &[SignInputRequest],
    ) -> WalletResult<()> {
        signer::sign_psbt(&mut self.keychain, psbt, requests)
    }

    pub fn sign_psbt_base64(
        &mut self,
        psbt_base64: &str,
        requests: &[SignInputRequest],
    ) -> WalletResult<String> {
        signer::sign_psbt_base64(&mut self.keychain, psbt_base64, requests)
    }

    // Password lifecycle, delegated to the store.

    pub fn has_password(&self) -> bool {
        self.store.has_password()
    }

    pub fn set_password(&mut self, password: &str) -> WalletResult<()> {
        self.store.set_password(password)
    }

    pub fn change_password(&mut self, new_password: &str) -> WalletResult<()> {
        self.store.change_password(new_password)
    }

    pub fn remove_password(&mut self) -> WalletResult<()> {
        self.store.remove_password()
    }

    /// Export the wallet as a MAC-protected envelope (JSON string).
    ///
    /// Only password-protected wallets may be exported: a backup of an
    /// unprotected wallet would silently downgrade its at-rest security
    /// expectations.
    pub fn export_backup(&self, backup_password: &str) -> WalletResult<String> {
        if !self.store.has_password() {
            return Err(WalletError::BackupRequiresPassword);
        }

        let mnemonic = Zeroizing::new(
            self.store
                .get(MNEMONIC_SLOT)?
                .ok_or(WalletError::NoWallet)?,
        );
        let passphrase = Zeroizing::new(self.store.get(PASSPHRASE_SLOT)?.unwrap_or_default());

        let payload = BackupPayload::new(
            String::from_utf8(mnemonic.to_vec())
                .map_err(|_| WalletError::Storage("mnemonic slot is not UTF-8".into()))?,
            String::from_utf8(passphrase.to_vec())
                .map_err(|_| WalletError::Storage("passphrase slot is not UTF-8".into()))?,
            network_name(self.network()),
        );

        BackupEnvelope::seal(&payload, backup_password)?.to_json()
    }

    /// Restore a wallet from a backup envelope.
    ///
    /// Verification is strictly ordered before destruction: parse, MAC
    /// check, decrypt and payload validation all happen first, so any
    /// failure leaves the existing wallet untouched. Replacing an existing
    /// wallet requires `overwrite`.
    pub fn import_backup(
        &mut self,
        raw: &str,
        backup_password: &str,
        new_wallet_password: Option<&str>,
        overwrite: bool,
    ) -> WalletResult<()> {
        let envelope = BackupEnvelope::parse(raw)?;
        let payload = envelope.open(backup_password)?;
        let network = network_from_name(&payload.network)?;

        // The payload mnemonic must derive before we touch anything.
        let mut probe = KeyChain::new(network);
        probe.unlock(&payload.mnemonic, &payload.passphrase)?;
        drop(probe);

        if self.exists()? && !overwrite {
            return Err(WalletError::WalletExists);
        }

        self.keychain.lock();
        self.keychain.set_network(network);
        self.store.set(MNEMONIC_SLOT, payload.mnemonic.as_bytes())?;
        self.store
            .set(PASSPHRASE_SLOT, payload.passphrase.as_bytes())?;
        self.persist_config()?;

        // Without a new password the current protection level is kept.
        match (self.store.has_password(), new_wallet_password) {
            (false, Some(password)) => self.store.set_password(password)?,
            (true, Some(password)) => self.store.change_password(password)?,
            (_, None) => {}
        }

        // Re-derive from the restored seed so the wallet is immediately
        // usable and the payload is proven end to end.
        self.keychain.unlock(&payload.mnemonic, &payload.passphrase)?;
        self.keychain.address_for_purpose(AddressPurpose::Payment)?;
        log_info!("wallet", "backup imported on {}", payload.network);
        Ok(())
    }

    /// Remove the wallet from storage entirely and lock the keychain.
    pub fn destroy(&mut self) -> WalletResult<()> {
        self.keychain.lock();
        self.store.destroy()
    }

    fn persist_config(&mut self) -> WalletResult<()> {
        let config = WalletConfig {
            network: Some(network_name(self.keychain.network()).to_string()),
            custom_paths: self.keychain.custom_paths().clone(),
        };
        let encoded = serde_json::to_vec(&config)
            .map_err(|e| WalletError::Storage(format!("config encoding: {}", e)))?;
        self.store.set(CONFIG_SLOT, &encoded)
    }
}

#[cfg(test)]
mod tests {
    use crate::types::ScriptType;
    use crate::vault::MemoryBackend;

    use super::*;

    const TEST_PHRASE: &str =
        "abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon abandon about";

    fn fresh_wallet() -> Wallet {
        Wallet::open(Box::new(MemoryBackend::new()), None, false).unwrap()
    }

    fn installed_wallet() -> Wallet {
        let mut wallet = fresh_wallet();
        wallet.install_seed(TEST_PHRASE, "", false).unwrap();
        wallet
    }

    #[test]
    fn test_install_unlock_addresses() {
        let mut wallet = installed_wallet();
        assert!(wallet.exists().unwrap());
        assert!(wallet.is_unlocked());

        let addresses = wallet
            .get_addresses(&[AddressPurpose::Payment, AddressPurpose::Ordinals])
            .unwrap();
        assert_eq!(addresses.len(), 2);
        assert_eq!(
            addresses[0].address,
            "bc1qcr8te4kr609gcawutmrza0j4xv80jy8z306fyu"
        );
        assert_eq!(addresses[1].script_type, ScriptType::Taproot);
    }

    #[test]
    fn test_locked_wallet_refuses_key_operations() {
        let mut wallet = installed_wallet();
        wallet.lock();
        assert!(!wallet.is_unlocked());
        assert_eq!(
            wallet.get_addresses(&[AddressPurpose::Payment]).unwrap_err(),
            WalletError::WalletLocked
        );

        wallet.unlock().unwrap();
        assert!(wallet.is_unlocked());
    }

    #[test]
    fn test_install_twice_requires_overwrite() {
        let mut wallet = installed_wallet();
        let err = wallet.install_seed(TEST_PHRASE, "", false).unwrap_err();
        assert_eq!(err, WalletError::WalletExists);
        wallet.install_seed(TEST_PHRASE, "TREZOR", true).unwrap();
    }

    #[test]
    fn test_unlock_without_seed_is_no_wallet() {
        let mut wallet = fresh_wallet();
        assert_eq!(wallet.unlock().unwrap_err(), WalletError::NoWallet);
    }

    #[test]
    fn test_invalid_seed_never_persisted() {
        let mut wallet = fresh_wallet();
        let err = wallet.install_seed("not a valid phrase", "", false).unwrap_err();
        assert_eq!(err, WalletError::InvalidSeedPhrase);
        assert!(!wallet.exists().unwrap());
    }

    #[test]
    fn test_backup_requires_password() {
        let wallet = installed_wallet();
        assert_eq!(
            wallet.export_backup("backup-pw").unwrap_err(),
            WalletError::BackupRequiresPassword
        );
    }

    #[test]
    fn test_backup_roundtrip_into_fresh_wallet() {
        let mut source = installed_wallet();
        source.set_password("wallet-pw").unwrap();
        let backup = source.export_backup("backup-pw").unwrap();

        let mut restored = fresh_wallet();
        restored
            .import_backup(&backup, "backup-pw", Some("new-pw"), false)
            .unwrap();
        assert!(restored.is_unlocked());
        assert!(restored.has_password());

        let addresses = restored.get_addresses(&[AddressPurpose::Payment]).unwrap();
        assert_eq!(
            addresses[0].address,
            "bc1qcr8te4kr609gcawutmrza0j4xv80jy8z306fyu"
        );
    }

    #[test]
    fn test_import_does_not_clobber_without_overwrite() {
        let mut source = installed_wallet();
        source.set_password("wallet-pw").unwrap();
        let backup = source.export_backup("backup-pw").unwrap();

        let mut target = installed_wallet();
        let err = target
            .import_backup(&backup, "backup-pw", None, false)
            .unwrap_err();
        assert_eq!(err, WalletError::WalletExists);

        // Bad password fails before any destructive step too.
        let err = target
            .import_backup(&backup, "wrong-pw", None, true)
            .unwrap_err();
        assert_eq!(err, WalletError::BackupIntegrityFailure);
        assert!(target.exists().unwrap());
    }

    #[test]
    fn test_network_switch_persists() {
        let mut wallet = installed_wallet();
        wallet.set_network(Network::Testnet).unwrap();
        let addr = wallet.get_addresses(&[AddressPurpose::Payment]).unwrap();
        assert!(addr[0].address.starts_with("tb1q"));
        assert_eq!(addr[0].path, "m/84'/1'/0'/0/0");
    }

    #[test]
    fn test_destroy_removes_everything() {
        let mut wallet = installed_wallet();
        wallet.destroy().unwrap();
        assert!(!wallet.is_unlocked());
        assert!(!wallet.exists().unwrap());
    }
}
