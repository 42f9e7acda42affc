//! Message and PSBT signing.
//!
//! The signing engine consumes derived key nodes from a [`crate::keychain::KeyChain`];
//! it never touches storage. Every signing call is a pure function of the
//! unlocked key material and the request; the only state touched is the
//! read-through derivation cache.

pub mod message;
pub mod psbt;

pub use message::sign_message;
pub use psbt::{sign_psbt, sign_psbt_base64};

use bitcoin::secp256k1::{All, Keypair, Parity, Secp256k1, SecretKey, XOnlyPublicKey};
use sha2::{Digest, Sha256};

/// Normalize a private key to even-Y form per BIP340: negate the scalar
/// mod the curve order when the public key's Y is odd, then recompute the
/// x-only public key from the normalized key.
pub(crate) fn normalize_even_y(
    secp: &Secp256k1<All>,
    secret: SecretKey,
) -> (SecretKey, XOnlyPublicKey) {
    let (_, parity) = Keypair::from_secret_key(secp, &secret).x_only_public_key();
    let secret = if parity == Parity::Odd {
        secret.negate()
    } else {
        secret
    };
    let (x_only, _parity) = Keypair::from_secret_key(secp, &secret).x_only_public_key();
    (secret, x_only)
}

/// BIP-340 style tagged hash: SHA256(SHA256(tag) || SHA256(tag) || msg).
pub(crate) fn tagged_hash(tag: &str, msg: &[u8]) -> [u8; 32] {
    let tag_hash = {
        let mut hasher = Sha256::new();
        hasher.update(tag.as_bytes());
        hasher.finalize()
    };

    let mut hasher = Sha256::new();
    hasher.update(tag_hash);
    hasher.update(tag_hash);
    hasher.update(msg);

    let mut output = [0u8; 32];
    output.copy_from_slice(&hasher.finalize());
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tagged_hash_domain_separation() {
        let msg = [0u8; 32];
        let a = tagged_hash("BIP0322-signed-message", &msg);
        let b = tagged_hash("TapTweak", &msg);
        assert_ne!(a, b);
        assert_eq!(a, tagged_hash("BIP0322-signed-message", &msg));
    }

    #[test]
    fn test_normalize_even_y_is_stable() {
        let secp = Secp256k1::new();
        let secret = SecretKey::from_slice(&[7u8; 32]).unwrap();
        let (normalized, x_only) = normalize_even_y(&secp, secret);

        // Normalizing twice is a no-op.
        let (again, x_only2) = normalize_even_y(&secp, normalized);
        assert_eq!(normalized, again);
        assert_eq!(x_only, x_only2);

        // The normalized key always has even parity.
        let (_, parity) = Keypair::from_secret_key(&secp, &normalized).x_only_public_key();
        assert_eq!(parity, Parity::Even);

        // And the x-only key matches the original key's x coordinate.
        let (orig_x, _) = Keypair::from_secret_key(&secp, &secret).x_only_public_key();
        assert_eq!(x_only, orig_x);
    }
}
