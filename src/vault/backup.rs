//! Versioned, MAC-protected backup envelopes.
//!
//! An envelope carries the wallet payload encrypted with AES-256-GCM and
//! authenticated with HMAC-SHA256 over every envelope field (MAC excluded).
//! Both keys come from one 64-byte PBKDF2-HMAC-SHA256 stretch of the backup
//! password: first half encryption, second half MAC. The KDF parameters
//! ride in the envelope so imports honor whatever the exporter used.
//!
//! The wire form is camelCase JSON, optionally base64-wrapped. The MAC is
//! verified in constant time before any decryption is attempted.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::{WalletError, WalletResult};

use super::crypto::{
    random_bytes, Aes256Gcm, AeadCipher, HmacSha256, KeyDerivationFunction, MessageAuthenticator,
    Pbkdf2Sha256, DEFAULT_PBKDF2_ITERATIONS, KEY_LEN, NONCE_LEN, SALT_LEN,
};

pub const BACKUP_VERSION: u32 = 1;

const CIPHER_NAME: &str = "aes-256-gcm";
const KDF_NAME: &str = "PBKDF2";
const KDF_HASH: &str = "SHA-256";
const MAC_ALGO: &str = "HMAC-SHA256";

/// KDF descriptor recorded next to the ciphertext.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KdfDescriptor {
    pub name: String,
    pub hash: String,
    pub iterations: u32,
    /// Base64-encoded random salt.
    pub salt: String,
}

/// The exported backup document. Immutable once sealed: the MAC covers
/// every other field, so any mutation invalidates it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BackupEnvelope {
    pub version: u32,
    pub cipher: String,
    pub kdf: KdfDescriptor,
    /// Base64-encoded AES-GCM nonce.
    pub iv: String,
    /// Base64-encoded ciphertext (GCM tag included).
    pub ciphertext: String,
    /// Unix timestamp (seconds).
    pub created_at: i64,
    pub network: String,
    /// Base64-encoded HMAC over the canonical field serialization.
    pub mac: String,
    pub mac_algo: String,
}

/// What actually gets encrypted. Secrets are wiped when the payload is
/// dropped.
#[derive(Debug, Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(rename_all = "camelCase")]
pub struct BackupPayload {
    pub version: u32,
    pub mnemonic: String,
    #[zeroize(skip)]
    pub network: String,
    /// Unix timestamp (seconds).
    #[zeroize(skip)]
    pub created_at: i64,
    pub passphrase: String,
}

impl BackupEnvelope {
    /// Encrypt and authenticate a payload under a backup password.
    pub fn seal(payload: &BackupPayload, password: &str) -> WalletResult<Self> {
        let salt: [u8; SALT_LEN] = random_bytes();
        let iterations = DEFAULT_PBKDF2_ITERATIONS;
        let keys = derive_backup_keys(password, &salt, iterations);

        let plaintext = Zeroizing::new(
            serde_json::to_vec(payload)
                .map_err(|e| WalletError::Crypto(format!("payload encoding: {}", e)))?,
        );

        let nonce: [u8; NONCE_LEN] = random_bytes();
        let ciphertext = Aes256Gcm.encrypt(&keys.encryption, &nonce, &[], &plaintext)?;

        let mut envelope = Self {
            version: BACKUP_VERSION,
            cipher: CIPHER_NAME.to_string(),
            kdf: KdfDescriptor {
                name: KDF_NAME.to_string(),
                hash: KDF_HASH.to_string(),
                iterations,
                salt: base64_encode(&salt),
            },
            iv: base64_encode(&nonce),
            ciphertext: base64_encode(&ciphertext),
            created_at: payload.created_at,
            network: payload.network.clone(),
            mac: String::new(),
            mac_algo: MAC_ALGO.to_string(),
        };
        envelope.mac = base64_encode(&HmacSha256.compute(&keys.mac, &envelope.mac_preimage()));
        Ok(envelope)
    }

    /// Parse an envelope from its wire form: JSON, or base64-wrapped JSON.
    pub fn parse(raw: &str) -> WalletResult<Self> {
        let trimmed = raw.trim();

        let json = if trimmed.starts_with('{') {
            trimmed.as_bytes().to_vec()
        } else {
            base64_decode(trimmed)
                .map_err(|_| WalletError::BackupFormatInvalid("neither JSON nor base64".into()))?
        };

        let envelope: Self = serde_json::from_slice(&json)
            .map_err(|e| WalletError::BackupFormatInvalid(e.to_string()))?;

        if envelope.version != BACKUP_VERSION {
            return Err(WalletError::BackupFormatInvalid(format!(
                "unsupported version {}",
                envelope.version
            )));
        }
        if envelope.cipher != CIPHER_NAME
            || envelope.kdf.name != KDF_NAME
            || envelope.kdf.hash != KDF_HASH
            || envelope.mac_algo != MAC_ALGO
        {
            return Err(WalletError::BackupFormatInvalid(
                "unsupported algorithm suite".into(),
            ));
        }
        Ok(envelope)
    }

    /// Verify the MAC and decrypt the payload.
    ///
    /// Integrity is checked before any decryption; a wrong password is
    /// indistinguishable from tampering and reports the same failure.
    pub fn open(&self, password: &str) -> WalletResult<BackupPayload> {
        let salt = base64_decode(&self.kdf.salt)
            .map_err(|_| WalletError::BackupFormatInvalid("corrupt salt".into()))?;
        let keys = derive_backup_keys(password, &salt, self.kdf.iterations);

        let mac = base64_decode(&self.mac)
            .map_err(|_| WalletError::BackupFormatInvalid("corrupt mac".into()))?;
        if !HmacSha256.verify(&keys.mac, &self.mac_preimage(), &mac) {
            return Err(WalletError::BackupIntegrityFailure);
        }

        let nonce_bytes = base64_decode(&self.iv)
            .map_err(|_| WalletError::BackupFormatInvalid("corrupt iv".into()))?;
        let nonce: [u8; NONCE_LEN] = nonce_bytes
            .as_slice()
            .try_into()
            .map_err(|_| WalletError::BackupFormatInvalid("bad iv length".into()))?;
        let ciphertext = base64_decode(&self.ciphertext)
            .map_err(|_| WalletError::BackupFormatInvalid("corrupt ciphertext".into()))?;

        let plaintext =
            Zeroizing::new(Aes256Gcm.decrypt(&keys.encryption, &nonce, &[], &ciphertext)?);
        serde_json::from_slice(&plaintext)
            .map_err(|e| WalletError::BackupFormatInvalid(format!("payload: {}", e)))
    }

    pub fn to_json(&self) -> WalletResult<String> {
        serde_json::to_string(self).map_err(|e| WalletError::Crypto(format!("encoding: {}", e)))
    }

    /// Canonical byte serialization the MAC covers: every field except the
    /// MAC itself, in fixed order, joined with '|'.
    fn mac_preimage(&self) -> Vec<u8> {
        format!(
            "{}|{}|{}|{}|{}|{}|{}|{}|{}|{}|{}",
            self.version,
            self.cipher,
            self.kdf.name,
            self.kdf.hash,
            self.kdf.iterations,
            self.kdf.salt,
            self.iv,
            self.ciphertext,
            self.created_at,
            self.network,
            self.mac_algo,
        )
        .into_bytes()
    }
}

impl BackupPayload {
    pub fn new(mnemonic: String, passphrase: String, network: &str) -> Self {
        Self {
            version: BACKUP_VERSION,
            mnemonic,
            network: network.to_string(),
            created_at: Utc::now().timestamp(),
            passphrase,
        }
    }
}

struct BackupKeys {
    encryption: [u8; KEY_LEN],
    mac: [u8; KEY_LEN],
}

impl Drop for BackupKeys {
    fn drop(&mut self) {
        self.encryption.zeroize();
        self.mac.zeroize();
    }
}

/// One 64-byte stretch split into independent encryption and MAC keys.
fn derive_backup_keys(password: &str, salt: &[u8], iterations: u32) -> BackupKeys {
    let mut okm = Zeroizing::new([0u8; KEY_LEN * 2]);
    Pbkdf2Sha256.derive(password.as_bytes(), salt, iterations, okm.as_mut());

    let mut keys = BackupKeys {
        encryption: [0u8; KEY_LEN],
        mac: [0u8; KEY_LEN],
    };
    keys.encryption.copy_from_slice(&okm[..KEY_LEN]);
    keys.mac.copy_from_slice(&okm[KEY_LEN..]);
    keys
}

fn base64_encode(data: &[u8]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(data)
}

fn base64_decode(data: &str) -> Result<Vec<u8>, base64::DecodeError> {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.decode(data)
}
