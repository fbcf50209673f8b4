// Copyright 2025 rewarm Project Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::hash::Hasher;

use sha2::{Digest, Sha256};
use twox_hash::XxHash64;

/// Failure while undoing the at-rest transform.
#[derive(thiserror::Error, Debug)]
pub enum CryptoError {
    /// Ciphertext too short or structurally invalid.
    #[error("malformed ciphertext")]
    Malformed,
    /// Integrity tag did not match; wrong key material or corrupted bytes.
    #[error("integrity check failed, expected: {expected}, get: {get}")]
    IntegrityMismatch {
        /// Tag recorded at encryption time.
        expected: u64,
        /// Tag recomputed from the decrypted bytes.
        get: u64,
    },
}

/// Byte-level transform applied to a record's serialized payload at rest.
///
/// Key material is supplied per logical provider group, not per call. The
/// engine only invokes the gateway on payload bytes headed for, or recovered
/// from, durable storage.
pub trait EncryptionGateway: Send + Sync + 'static {
    /// Transform plaintext payload bytes for durable storage.
    fn encrypt(&self, plain: &[u8], key_material: &str) -> Vec<u8>;

    /// Undo [`Self::encrypt`]. Fails if the key material or the bytes do not
    /// match what was written.
    fn decrypt(&self, cipher: &[u8], key_material: &str) -> Result<Vec<u8>, CryptoError>;
}

const NONCE_LEN: usize = 8;
const TAG_LEN: usize = 8;

/// Built-in [`EncryptionGateway`]: a SHA-256 keystream over the payload with
/// an XxHash64 integrity tag, sealed under a random per-record nonce.
///
/// Decrypting with different key material yields a different keystream, so the
/// integrity check fails instead of producing garbage payload bytes.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeystreamGateway;

impl KeystreamGateway {
    fn keystream(key_material: &str, nonce: &[u8], len: usize) -> Vec<u8> {
        let mut out = Vec::with_capacity(len + 32);
        let mut counter = 0u64;
        while out.len() < len {
            let mut hasher = Sha256::new();
            hasher.update(key_material.as_bytes());
            hasher.update(nonce);
            hasher.update(counter.to_le_bytes());
            out.extend_from_slice(&hasher.finalize());
            counter += 1;
        }
        out.truncate(len);
        out
    }

    fn tag(bytes: &[u8]) -> u64 {
        let mut hasher = XxHash64::with_seed(0);
        hasher.write(bytes);
        hasher.finish()
    }
}

impl EncryptionGateway for KeystreamGateway {
    fn encrypt(&self, plain: &[u8], key_material: &str) -> Vec<u8> {
        let nonce: [u8; NONCE_LEN] = rand::random();
        let mut body = Vec::with_capacity(TAG_LEN + plain.len());
        body.extend_from_slice(&Self::tag(plain).to_le_bytes());
        body.extend_from_slice(plain);
        let keystream = Self::keystream(key_material, &nonce, body.len());
        for (b, k) in body.iter_mut().zip(keystream) {
            *b ^= k;
        }
        let mut out = Vec::with_capacity(NONCE_LEN + body.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&body);
        out
    }

    fn decrypt(&self, cipher: &[u8], key_material: &str) -> Result<Vec<u8>, CryptoError> {
        if cipher.len() < NONCE_LEN + TAG_LEN {
            return Err(CryptoError::Malformed);
        }
        let (nonce, body) = cipher.split_at(NONCE_LEN);
        let keystream = Self::keystream(key_material, nonce, body.len());
        let mut body: Vec<u8> = body.iter().zip(keystream).map(|(b, k)| b ^ k).collect();
        let plain = body.split_off(TAG_LEN);
        let expected = u64::from_le_bytes(body.try_into().map_err(|_| CryptoError::Malformed)?);
        let get = Self::tag(&plain);
        if expected != get {
            return Err(CryptoError::IntegrityMismatch { expected, get });
        }
        Ok(plain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "myStrongKey-1234";

    #[test]
    fn round_trip() {
        let gateway = KeystreamGateway;
        let plain = b"the quick brown fox".to_vec();
        let cipher = gateway.encrypt(&plain, KEY);
        assert_ne!(&cipher[NONCE_LEN..], plain.as_slice());
        let back = gateway.decrypt(&cipher, KEY).unwrap();
        assert_eq!(back, plain);
    }

    #[test]
    fn wrong_key_fails_integrity() {
        let gateway = KeystreamGateway;
        let cipher = gateway.encrypt(b"payload", KEY);
        let err = gateway.decrypt(&cipher, "otherKey").unwrap_err();
        assert!(matches!(err, CryptoError::IntegrityMismatch { .. }));
    }

    #[test]
    fn truncated_ciphertext_is_malformed() {
        let gateway = KeystreamGateway;
        let err = gateway.decrypt(&[0u8; 7], KEY).unwrap_err();
        assert!(matches!(err, CryptoError::Malformed));
    }

    #[test]
    fn nonce_randomizes_ciphertext() {
        let gateway = KeystreamGateway;
        let a = gateway.encrypt(b"same payload", KEY);
        let b = gateway.encrypt(b"same payload", KEY);
        assert_ne!(a, b);
        assert_eq!(gateway.decrypt(&a, KEY).unwrap(), gateway.decrypt(&b, KEY).unwrap());
    }

    #[test]
    fn empty_payload_round_trips() {
        let gateway = KeystreamGateway;
        let cipher = gateway.encrypt(b"", KEY);
        assert_eq!(gateway.decrypt(&cipher, KEY).unwrap(), Vec::<u8>::new());
    }
}
