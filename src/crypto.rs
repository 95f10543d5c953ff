// Copyright (c) Meta Platforms, Inc. and affiliates.
//
// This source code is dual-licensed under either the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree or the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree. You may select, at your option, one of the above-listed licenses.

//! The symmetric encryption seam used to seal blocks for the untrusted store.

use crate::OramError;
use aes_gcm::{
    aead::{Aead, AeadCore, OsRng},
    Aes256Gcm, KeyInit,
};
use generic_array::GenericArray;
use sha2::{Digest, Sha256};

/// The key width in bytes.
pub const KEY_SIZE: usize = 32;
/// The nonce width in bytes. A fresh random nonce prefixes every ciphertext.
pub const NONCE_SIZE: usize = 12;
/// The authentication tag width in bytes.
pub const TAG_SIZE: usize = 16;

/// Symmetric encryption of block fields.
///
/// Every call to `encrypt` must draw a fresh random IV, so that re-encrypting
/// unchanged plaintext still yields fresh ciphertext; Trivial ORAM depends on
/// this to hide which block of a scan was modified.
pub trait Crypto {
    /// Encrypts `plaintext` under the session key with a fresh random IV.
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, OramError>;

    /// Decrypts a ciphertext produced by [`Crypto::encrypt`].
    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, OramError>;

    /// Ciphertext expansion in bytes. Every ciphertext is exactly this much
    /// longer than its plaintext, which the block codec relies on to locate
    /// section boundaries inside a packed payload.
    fn overhead(&self) -> usize {
        NONCE_SIZE + TAG_SIZE
    }
}

/// AES-256-GCM with a SHA-256-derived session key.
///
/// Output format: `[nonce (12 bytes) | ciphertext | tag (16 bytes)]`.
pub struct AesGcmCrypto {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for AesGcmCrypto {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("AesGcmCrypto")
    }
}

impl AesGcmCrypto {
    /// Derives the session key as SHA-256 of `seed`.
    pub fn derive(seed: &[u8]) -> Self {
        let key = Sha256::digest(seed);
        Self {
            cipher: Aes256Gcm::new(GenericArray::from_slice(key.as_slice())),
        }
    }
}

impl Crypto for AesGcmCrypto {
    fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, OramError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext)
            .map_err(|_| OramError::Crypto("encryption failed".to_string()))?;
        let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        sealed.extend_from_slice(nonce.as_slice());
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, OramError> {
        if ciphertext.len() < NONCE_SIZE + TAG_SIZE {
            return Err(OramError::Crypto(
                "ciphertext shorter than nonce and tag".to_string(),
            ));
        }
        let nonce = GenericArray::from_slice(&ciphertext[..NONCE_SIZE]);
        self.cipher
            .decrypt(nonce, &ciphertext[NONCE_SIZE..])
            .map_err(|_| OramError::Crypto("decryption failed".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use static_assertions::const_assert_eq;

    const_assert_eq!(KEY_SIZE, 32);

    #[test]
    fn round_trip() {
        let crypto = AesGcmCrypto::derive(b"seed");
        let plaintext = b"some block bytes".to_vec();
        let sealed = crypto.encrypt(&plaintext).unwrap();
        assert_eq!(sealed.len(), plaintext.len() + crypto.overhead());
        assert_eq!(crypto.decrypt(&sealed).unwrap(), plaintext);
    }

    #[test]
    fn fresh_iv_per_call() {
        let crypto = AesGcmCrypto::derive(b"seed");
        let a = crypto.encrypt(b"same plaintext").unwrap();
        let b = crypto.encrypt(b"same plaintext").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn wrong_key_fails() {
        let sealed = AesGcmCrypto::derive(b"seed one").encrypt(b"data").unwrap();
        assert!(matches!(
            AesGcmCrypto::derive(b"seed two").decrypt(&sealed),
            Err(OramError::Crypto(_))
        ));
    }

    #[test]
    fn tampered_ciphertext_fails() {
        let crypto = AesGcmCrypto::derive(b"seed");
        let mut sealed = crypto.encrypt(b"data").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 1;
        assert!(matches!(crypto.decrypt(&sealed), Err(OramError::Crypto(_))));
    }

    #[test]
    fn truncated_ciphertext_fails() {
        let crypto = AesGcmCrypto::derive(b"seed");
        assert!(matches!(
            crypto.decrypt(&[0u8; NONCE_SIZE + TAG_SIZE - 1]),
            Err(OramError::Crypto(_))
        ));
    }
}
