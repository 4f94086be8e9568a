// Copyright (c) Facebook, Inc. and its affiliates.
// Modifications Copyright (c) 2022-2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! Resource payload protection.
//!
//! A resource is protected by AES-256-GCM under a key derived from a curve
//! point. Ciphertexts are laid out as `nonce || ciphertext || tag` with a
//! fresh 12-byte nonce per call.

use crate::{
    curve::{CurveTrait, FIELD_BYTES},
    errors::{InternalError, Result},
};
use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use rand::{CryptoRng, RngCore};
use std::fmt::Debug;
use tracing::error;
use zeroize::Zeroizing;

/// Width of a symmetric key.
pub const SYMMETRIC_KEY_BYTES: usize = FIELD_BYTES;

/// Width of the nonce prepended to every ciphertext.
pub const NONCE_BYTES: usize = 12;

/// A 256-bit AES key, wiped on drop.
#[derive(Clone, PartialEq, Eq)]
pub struct SymmetricKey(Zeroizing<[u8; SYMMETRIC_KEY_BYTES]>);

impl Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SymmetricKey([redacted])")
    }
}

impl SymmetricKey {
    pub fn from_bytes(bytes: [u8; SYMMETRIC_KEY_BYTES]) -> Self {
        Self(Zeroizing::new(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; SYMMETRIC_KEY_BYTES] {
        &self.0
    }
}

/// The big-endian X coordinate of `point`, left-padded with zeros to 32
/// bytes. Never truncates.
pub fn derive_symmetric_key<C: CurveTrait>(point: &C) -> SymmetricKey {
    SymmetricKey::from_bytes(point.x_coordinate())
}

/// Encrypt `plaintext` under `key`, returning `nonce || ciphertext || tag`.
pub fn encrypt_symmetric<R: RngCore + CryptoRng>(
    plaintext: &[u8],
    key: &SymmetricKey,
    rng: &mut R,
) -> Result<Vec<u8>> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));
    let mut nonce = [0u8; NONCE_BYTES];
    rng.fill_bytes(&mut nonce);

    let sealed = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| {
            error!("AES-GCM encryption failed");
            InternalError::InternalInvariantFailed
        })?;

    let mut out = Vec::with_capacity(NONCE_BYTES + sealed.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&sealed);
    Ok(out)
}

/// Reverse [`encrypt_symmetric`].
///
/// Fails with `AuthenticationFailed` if the input is shorter than a nonce or
/// the tag does not verify (wrong key, tampered data).
pub fn decrypt_symmetric(ciphertext: &[u8], key: &SymmetricKey) -> Result<Vec<u8>> {
    if ciphertext.len() < NONCE_BYTES {
        error!(
            "Symmetric ciphertext has {} bytes, shorter than the nonce",
            ciphertext.len()
        );
        Err(InternalError::AuthenticationFailed)?;
    }
    let (nonce, sealed) = ciphertext.split_at(NONCE_BYTES);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));
    cipher
        .decrypt(Nonce::from_slice(nonce), sealed)
        .map_err(|_| {
            error!("AES-GCM tag did not verify");
            InternalError::AuthenticationFailed
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{curve::TestCurve, utils::testing::init_testing};

    #[test]
    fn encryption_round_trips() {
        let rng = &mut init_testing();
        let key = derive_symmetric_key(&TestCurve::random(rng));
        for len in [0, 1, 16, 1000] {
            let mut plaintext = vec![0u8; len];
            rng.fill_bytes(&mut plaintext);
            let ct = encrypt_symmetric(&plaintext, &key, rng).unwrap();
            assert_eq!(ct.len(), NONCE_BYTES + len + 16);
            assert_eq!(decrypt_symmetric(&ct, &key).unwrap(), plaintext);
        }
    }

    #[test]
    fn nonces_are_fresh() {
        let rng = &mut init_testing();
        let key = derive_symmetric_key(&TestCurve::random(rng));
        let a = encrypt_symmetric(b"same message", &key, rng).unwrap();
        let b = encrypt_symmetric(b"same message", &key, rng).unwrap();
        assert_ne!(a[..NONCE_BYTES], b[..NONCE_BYTES]);
        assert_ne!(a, b);
    }

    #[test]
    fn wrong_key_and_tampering_fail_authentication() {
        let rng = &mut init_testing();
        let key = derive_symmetric_key(&TestCurve::random(rng));
        let other = derive_symmetric_key(&TestCurve::random(rng));
        let mut ct = encrypt_symmetric(b"resource payload", &key, rng).unwrap();

        assert_eq!(
            decrypt_symmetric(&ct, &other),
            Err(InternalError::AuthenticationFailed)
        );

        let last = ct.len() - 1;
        ct[last] ^= 0x80;
        assert_eq!(
            decrypt_symmetric(&ct, &key),
            Err(InternalError::AuthenticationFailed)
        );
    }

    #[test]
    fn short_inputs_fail_authentication() {
        let rng = &mut init_testing();
        let key = derive_symmetric_key(&TestCurve::random(rng));
        for len in [0, 5, NONCE_BYTES, NONCE_BYTES + 15] {
            assert_eq!(
                decrypt_symmetric(&vec![0u8; len], &key),
                Err(InternalError::AuthenticationFailed)
            );
        }
    }

    #[test]
    fn key_is_padded_x_coordinate() {
        let rng = &mut init_testing();
        let point = TestCurve::random(rng);
        let key = derive_symmetric_key(&point);
        assert_eq!(key.as_bytes(), &point.to_coordinates()[..32]);
        assert_eq!(format!("{key:?}"), "SymmetricKey([redacted])");
    }
}
