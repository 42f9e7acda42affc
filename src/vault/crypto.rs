//! Crypto capabilities for the vault.
//!
//! The store and the backup envelope talk to small capability traits
//! instead of concrete crates, so tests can count invocations and future
//! algorithm migrations stay local to this module. Production
//! implementations: AES-256-GCM, PBKDF2-HMAC-SHA256 and HMAC-SHA256.

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm as Aes256GcmImpl, Nonce};
use hmac::{Hmac, Mac as _};
use pbkdf2::pbkdf2_hmac;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::{WalletError, WalletResult};

pub const KEY_LEN: usize = 32;
pub const NONCE_LEN: usize = 12;
pub const SALT_LEN: usize = 16;

/// OWASP floor for PBKDF2-HMAC-SHA256; recorded in every envelope so
/// imports honor whatever the exporter used.
pub const DEFAULT_PBKDF2_ITERATIONS: u32 = 600_000;

/// Authenticated encryption with associated data.
pub trait AeadCipher {
    fn encrypt(
        &self,
        key: &[u8; KEY_LEN],
        nonce: &[u8; NONCE_LEN],
        aad: &[u8],
        plaintext: &[u8],
    ) -> WalletResult<Vec<u8>>;

    fn decrypt(
        &self,
        key: &[u8; KEY_LEN],
        nonce: &[u8; NONCE_LEN],
        aad: &[u8],
        ciphertext: &[u8],
    ) -> WalletResult<Vec<u8>>;
}

/// Password-based key derivation.
pub trait KeyDerivationFunction {
    fn derive(&self, password: &[u8], salt: &[u8], iterations: u32, output: &mut [u8]);
}

/// Keyed message authentication.
pub trait MessageAuthenticator {
    fn compute(&self, key: &[u8], data: &[u8]) -> Vec<u8>;

    /// Constant-time tag comparison.
    fn verify(&self, key: &[u8], data: &[u8], tag: &[u8]) -> bool {
        let expected = self.compute(key, data);
        expected.ct_eq(tag).into()
    }
}

/// AES-256-GCM via the `aes-gcm` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct Aes256Gcm;

impl AeadCipher for Aes256Gcm {
    fn encrypt(
        &self,
        key: &[u8; KEY_LEN],
        nonce: &[u8; NONCE_LEN],
        aad: &[u8],
        plaintext: &[u8],
    ) -> WalletResult<Vec<u8>> {
        let cipher = Aes256GcmImpl::new_from_slice(key)
            .map_err(|e| WalletError::Crypto(format!("cipher init: {}", e)))?;
        cipher
            .encrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: plaintext,
                    aad,
                },
            )
            .map_err(|e| WalletError::Crypto(format!("encryption failed: {}", e)))
    }

    fn decrypt(
        &self,
        key: &[u8; KEY_LEN],
        nonce: &[u8; NONCE_LEN],
        aad: &[u8],
        ciphertext: &[u8],
    ) -> WalletResult<Vec<u8>> {
        let cipher = Aes256GcmImpl::new_from_slice(key)
            .map_err(|e| WalletError::Crypto(format!("cipher init: {}", e)))?;
        // AEAD failure is deliberately opaque: tampered data and a wrong
        // key are indistinguishable.
        cipher
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad,
                },
            )
            .map_err(|_| WalletError::DecryptionFailed)
    }
}

/// PBKDF2-HMAC-SHA256 via the `pbkdf2` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct Pbkdf2Sha256;

impl KeyDerivationFunction for Pbkdf2Sha256 {
    fn derive(&self, password: &[u8], salt: &[u8], iterations: u32, output: &mut [u8]) {
        pbkdf2_hmac::<Sha256>(password, salt, iterations, output);
    }
}

/// HMAC-SHA256 via the `hmac` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct HmacSha256;

impl MessageAuthenticator for HmacSha256 {
    fn compute(&self, key: &[u8], data: &[u8]) -> Vec<u8> {
        // Qualified: `aes_gcm::aead::KeyInit` is also in scope and offers
        // a `new_from_slice` for this type. HMAC accepts any key length.
        let mut mac = <Hmac<Sha256> as hmac::Mac>::new_from_slice(key)
            .expect("hmac accepts any key length");
        mac.update(data);
        mac.finalize().into_bytes().to_vec()
    }
}

/// Fresh random bytes from the OS.
pub fn random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    OsRng.fill_bytes(&mut bytes);
    bytes
}
