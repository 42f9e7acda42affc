//! Encrypted key-value storage.
//!
//! [`EncryptedStore`] wraps a [`StorageBackend`] and encrypts every slot
//! with AES-256-GCM, using the slot name as associated data so ciphertexts
//! cannot be swapped between slots. Without a password the store key comes
//! from the backend's device key; with one it is derived via
//! PBKDF2-HMAC-SHA256 with a per-store random salt.
//!
//! Two bookkeeping slots are stored alongside the data: a plaintext
//! metadata slot recording the KDF parameters (there is nothing secret in
//! them) and an encrypted verifier slot that lets `open` distinguish a
//! wrong password from an absent one.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::error::{WalletError, WalletResult};
use crate::{log_debug, log_info, log_warn};

use super::crypto::{
    random_bytes, Aes256Gcm, AeadCipher, KeyDerivationFunction, Pbkdf2Sha256,
    DEFAULT_PBKDF2_ITERATIONS, KEY_LEN, NONCE_LEN, SALT_LEN,
};

const META_SLOT: &str = "__meta";
const VERIFIER_SLOT: &str = "__verifier";
const VERIFIER_PLAINTEXT: &[u8] = b"btcvault-key-check-v1";

/// Write-ahead copies parked during a key rotation, named
/// `__staged.<slot>`. Bookkeeping slots all share the `__` prefix.
const STAGED_PREFIX: &str = "__staged.";

fn staged_name(slot: &str) -> String {
    format!("{}{}", STAGED_PREFIX, slot)
}

/// Persistence capability the host platform provides.
///
/// `Send` is part of the contract: stores travel into the process-wide
/// wallet slot, which is shared across threads.
pub trait StorageBackend: Send {
    fn get(&self, slot: &str) -> WalletResult<Option<Vec<u8>>>;
    fn set(&mut self, slot: &str, value: Vec<u8>) -> WalletResult<()>;
    fn remove(&mut self, slot: &str) -> WalletResult<()>;
    fn clear(&mut self) -> WalletResult<()>;
    /// Names of all stored slots, bookkeeping included.
    fn slots(&self) -> WalletResult<Vec<String>>;
    /// A platform-held symmetric key protecting passwordless stores.
    fn device_key(&self) -> WalletResult<[u8; KEY_LEN]>;
}

/// In-memory backend for tests and ephemeral wallets.
pub struct MemoryBackend {
    slots: HashMap<String, Vec<u8>>,
    device_key: [u8; KEY_LEN],
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self {
            slots: HashMap::new(),
            device_key: random_bytes(),
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl StorageBackend for MemoryBackend {
    fn get(&self, slot: &str) -> WalletResult<Option<Vec<u8>>> {
        Ok(self.slots.get(slot).cloned())
    }

    fn set(&mut self, slot: &str, value: Vec<u8>) -> WalletResult<()> {
        self.slots.insert(slot.to_string(), value);
        Ok(())
    }

    fn remove(&mut self, slot: &str) -> WalletResult<()> {
        self.slots.remove(slot);
        Ok(())
    }

    fn clear(&mut self) -> WalletResult<()> {
        self.slots.clear();
        Ok(())
    }

    fn slots(&self) -> WalletResult<Vec<String>> {
        Ok(self.slots.keys().cloned().collect())
    }

    fn device_key(&self) -> WalletResult<[u8; KEY_LEN]> {
        Ok(self.device_key)
    }
}

/// KDF parameters persisted in the plaintext metadata slot. Absent when
/// the store is protected by the device key alone.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct KdfParams {
    iterations: u32,
    /// Hex-encoded random salt.
    salt: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoreMeta {
    version: u32,
    kdf: Option<KdfParams>,
}

/// Authenticated-encrypted slot store.
pub struct EncryptedStore {
    backend: Box<dyn StorageBackend>,
    cipher: Aes256Gcm,
    key: Zeroizing<[u8; KEY_LEN]>,
    meta: StoreMeta,
    read_only: bool,
}

impl std::fmt::Debug for EncryptedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // No backend contents and no key material.
        f.debug_struct("EncryptedStore")
            .field("has_password", &self.has_password())
            .field("read_only", &self.read_only)
            .finish_non_exhaustive()
    }
}

impl EncryptedStore {
    /// Open (or initialize) a store over `backend`.
    ///
    /// A store that was created with a password refuses to open without
    /// one (`PasswordRequired`) or with the wrong one (`WrongPassword`).
    /// Supplying a password to a passwordless store is also rejected as
    /// `WrongPassword`: the caller's expectation of protection is not met.
    pub fn open(
        backend: Box<dyn StorageBackend>,
        password: Option<&str>,
        read_only: bool,
    ) -> WalletResult<Self> {
        let meta = match backend.get(META_SLOT)? {
            Some(raw) => Some(
                serde_json::from_slice::<StoreMeta>(&raw)
                    .map_err(|e| WalletError::Storage(format!("corrupt store metadata: {}", e)))?,
            ),
            None => None,
        };

        let store = match meta {
            Some(meta) => Self::open_existing(backend, password, read_only, meta)?,
            None => Self::initialize(backend, password, read_only)?,
        };
        log_debug!(
            "vault",
            "store opened (password: {}, read-only: {})",
            store.has_password(),
            store.read_only
        );
        Ok(store)
    }

    fn open_existing(
        backend: Box<dyn StorageBackend>,
        password: Option<&str>,
        read_only: bool,
        meta: StoreMeta,
    ) -> WalletResult<Self> {
        let key = match (&meta.kdf, password) {
            (Some(kdf), Some(password)) => derive_store_key(password, kdf)?,
            (Some(_), None) => return Err(WalletError::PasswordRequired),
            (None, None) => Zeroizing::new(backend.device_key()?),
            (None, Some(_)) => return Err(WalletError::WrongPassword),
        };

        let mut store = Self {
            backend,
            cipher: Aes256Gcm,
            key,
            meta,
            read_only,
        };
        store.check_verifier()?;
        if !store.read_only {
            store.recover_staged()?;
        }
        Ok(store)
    }

    fn initialize(
        backend: Box<dyn StorageBackend>,
        password: Option<&str>,
        read_only: bool,
    ) -> WalletResult<Self> {
        if read_only {
            return Err(WalletError::Storage("cannot initialize a read-only store".into()));
        }

        let (key, kdf) = match password {
            Some(password) => {
                let kdf = fresh_kdf_params();
                (derive_store_key(password, &kdf)?, Some(kdf))
            }
            None => (Zeroizing::new(backend.device_key()?), None),
        };

        let mut store = Self {
            backend,
            cipher: Aes256Gcm,
            key,
            meta: StoreMeta { version: 1, kdf },
            read_only,
        };
        store.persist_meta()?;
        store.write_verifier()?;
        Ok(store)
    }

    /// Decrypt a slot. `Ok(None)` when absent; `DecryptionFailed` on any
    /// integrity failure.
    pub fn get(&self, slot: &str) -> WalletResult<Option<Vec<u8>>> {
        let raw = match self.backend.get(slot)? {
            Some(raw) => raw,
            None => return Ok(None),
        };
        self.decrypt_slot(slot, &raw).map(Some)
    }

    /// Encrypt and persist a slot under a fresh random nonce.
    pub fn set(&mut self, slot: &str, value: &[u8]) -> WalletResult<()> {
        self.ensure_writable()?;
        if slot.starts_with("__") {
            return Err(WalletError::Storage(format!("slot name {} is reserved", slot)));
        }
        let encrypted = self.encrypt_slot(slot, value)?;
        self.backend.set(slot, encrypted)
    }

    pub fn remove(&mut self, slot: &str) -> WalletResult<()> {
        self.ensure_writable()?;
        self.backend.remove(slot)
    }

    /// Remove every slot, bookkeeping included. The store cannot be used
    /// afterwards until reopened.
    pub fn destroy(&mut self) -> WalletResult<()> {
        self.ensure_writable()?;
        self.backend.clear()
    }

    pub fn has_password(&self) -> bool {
        self.meta.kdf.is_some()
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Protect a passwordless store with a password.
    pub fn set_password(&mut self, password: &str) -> WalletResult<()> {
        if self.has_password() {
            return Err(WalletError::WrongPassword);
        }
        let kdf = fresh_kdf_params();
        let key = derive_store_key(password, &kdf)?;
        self.rewrap(key, Some(kdf))
    }

    /// Replace the password on an already-protected store.
    pub fn change_password(&mut self, new_password: &str) -> WalletResult<()> {
        if !self.has_password() {
            return Err(WalletError::PasswordRequired);
        }
        let kdf = fresh_kdf_params();
        let key = derive_store_key(new_password, &kdf)?;
        self.rewrap(key, Some(kdf))
    }

    /// Drop password protection, falling back to the device key.
    pub fn remove_password(&mut self) -> WalletResult<()> {
        if !self.has_password() {
            return Err(WalletError::PasswordRequired);
        }
        let key = Zeroizing::new(self.backend.device_key()?);
        self.rewrap(key, None)
    }

    /// Re-encrypt every data slot under `new_key`.
    ///
    /// Write-ahead ordering: re-encrypted copies are parked under staged
    /// names first, then the new metadata and verifier are persisted (the
    /// commit point), then the staged copies are promoted over their
    /// targets. A failure before the commit leaves the old state fully
    /// intact; a failure after it is finished by [`Self::recover_staged`]
    /// on the next open.
    fn rewrap(
        &mut self,
        new_key: Zeroizing<[u8; KEY_LEN]>,
        new_kdf: Option<KdfParams>,
    ) -> WalletResult<()> {
        self.ensure_writable()?;

        let mut staged: Vec<(String, Vec<u8>)> = Vec::new();
        for slot in self.backend.slots()? {
            if slot.starts_with("__") {
                continue;
            }
            let raw = self
                .backend
                .get(&slot)?
                .ok_or_else(|| WalletError::Storage(format!("slot {} vanished", slot)))?;
            let plaintext = Zeroizing::new(self.decrypt_slot(&slot, &raw)?);
            let reencrypted =
                encrypt_with_key(&self.cipher, &new_key, slot.as_bytes(), &plaintext)?;
            staged.push((slot, reencrypted));
        }

        for (slot, value) in &staged {
            self.backend.set(&staged_name(slot), value.clone())?;
        }

        // Commit point.
        self.key = new_key;
        self.meta.kdf = new_kdf;
        self.persist_meta()?;
        self.write_verifier()?;

        for (slot, value) in staged {
            self.backend.set(&slot, value)?;
            self.backend.remove(&staged_name(&slot))?;
        }
        Ok(())
    }

    /// Finish or roll back a key rotation interrupted between staging and
    /// promotion. A staged copy that decrypts under the current key was
    /// written for a committed rotation and replaces its target; anything
    /// else predates the commit and is dropped.
    fn recover_staged(&mut self) -> WalletResult<()> {
        for slot in self.backend.slots()? {
            let target = match slot.strip_prefix(STAGED_PREFIX) {
                Some(target) => target.to_string(),
                None => continue,
            };
            let raw = match self.backend.get(&slot)? {
                Some(raw) => raw,
                None => continue,
            };
            if self.decrypt_slot(&target, &raw).is_ok() {
                log_info!("vault", "promoting staged copy of slot {}", target);
                self.backend.set(&target, raw)?;
            } else {
                log_warn!("vault", "dropping stale staged copy of slot {}", target);
            }
            self.backend.remove(&slot)?;
        }
        Ok(())
    }

    fn ensure_writable(&self) -> WalletResult<()> {
        if self.read_only {
            return Err(WalletError::ReadOnlyStore);
        }
        Ok(())
    }

    fn encrypt_slot(&self, slot: &str, plaintext: &[u8]) -> WalletResult<Vec<u8>> {
        encrypt_with_key(&self.cipher, &self.key, slot.as_bytes(), plaintext)
    }

    fn decrypt_slot(&self, slot: &str, raw: &[u8]) -> WalletResult<Vec<u8>> {
        if raw.len() < NONCE_LEN {
            return Err(WalletError::DecryptionFailed);
        }
        let (nonce, ciphertext) = raw.split_at(NONCE_LEN);
        let nonce: [u8; NONCE_LEN] = nonce.try_into().map_err(|_| WalletError::DecryptionFailed)?;
        self.cipher
            .decrypt(&self.key, &nonce, slot.as_bytes(), ciphertext)
    }

    fn persist_meta(&mut self) -> WalletResult<()> {
        let encoded = serde_json::to_vec(&self.meta)
            .map_err(|e| WalletError::Storage(format!("metadata encoding: {}", e)))?;
        self.backend.set(META_SLOT, encoded)
    }

    fn write_verifier(&mut self) -> WalletResult<()> {
        let encrypted = encrypt_with_key(
            &self.cipher,
            &self.key,
            VERIFIER_SLOT.as_bytes(),
            VERIFIER_PLAINTEXT,
        )?;
        self.backend.set(VERIFIER_SLOT, encrypted)
    }

    fn check_verifier(&self) -> WalletResult<()> {
        let raw = self
            .backend
            .get(VERIFIER_SLOT)?
            .ok_or_else(|| WalletError::Storage("missing key verifier".into()))?;
        match self.decrypt_slot(VERIFIER_SLOT, &raw) {
            Ok(plaintext) if plaintext == VERIFIER_PLAINTEXT => Ok(()),
            _ if self.has_password() => Err(WalletError::WrongPassword),
            _ => Err(WalletError::DecryptionFailed),
        }
    }
}

fn fresh_kdf_params() -> KdfParams {
    KdfParams {
        iterations: DEFAULT_PBKDF2_ITERATIONS,
        salt: hex::encode(random_bytes::<SALT_LEN>()),
    }
}

fn derive_store_key(password: &str, kdf: &KdfParams) -> WalletResult<Zeroizing<[u8; KEY_LEN]>> {
    let salt = hex::decode(&kdf.salt)
        .map_err(|e| WalletError::Storage(format!("corrupt kdf salt: {}", e)))?;
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    Pbkdf2Sha256.derive(password.as_bytes(), &salt, kdf.iterations, key.as_mut());
    Ok(key)
}

fn encrypt_with_key(
    cipher: &Aes256Gcm,
    key: &[u8; KEY_LEN],
    aad: &[u8],
    plaintext: &[u8],
) -> WalletResult<Vec<u8>> {
    let nonce: [u8; NONCE_LEN] = random_bytes();
    let ciphertext = cipher.encrypt(key, &nonce, aad, plaintext)?;
    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}
