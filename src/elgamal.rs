// Copyright (c) Facebook, Inc. and its affiliates.
// Modifications Copyright (c) 2022-2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! ElGamal encryption of curve points.
//!
//! A point `M` is encrypted under a public key `Q` as `(K, C) = (r·G, M +
//! r·Q)` for a fresh scalar `r`, and decrypted with the matching private key
//! `x` as `C - x·K`.

use crate::{
    ciphertext::CipherText,
    curve::{CurveTrait, ScalarTrait},
    errors::{InternalError, Result},
    keys::{PrivateKey, PublicKey},
};
use rand::{CryptoRng, RngCore};
use tracing::error;

/// A fresh random point, used as the key material of a single resource.
pub fn generate_point<C: CurveTrait, R: RngCore + CryptoRng>(rng: &mut R) -> C {
    loop {
        let point = C::scale_generator(&C::Scalar::random(rng));
        if !point.is_identity() {
            return point;
        }
    }
}

/// Encrypt `message` under `pk`.
pub fn point_encrypt<C: CurveTrait, R: RngCore + CryptoRng>(
    pk: &PublicKey<C>,
    message: &C,
    rng: &mut R,
) -> CipherText<C> {
    let r = C::Scalar::random(rng);
    let k = C::scale_generator(&r);
    let c = *message + pk.as_point().mul(&r);
    CipherText::new(k, c)
}

/// Decrypt `ct` with `sk`.
///
/// A key that does not match the encryption key yields an unrelated point
/// rather than an error; callers detect this when the derived symmetric key
/// fails to authenticate.
pub fn point_decrypt<C: CurveTrait>(ct: &CipherText<C>, sk: &PrivateKey<C>) -> C {
    *ct.c() - ct.k().mul(sk.scalar())
}

/// Decode a 128-byte ciphertext and decrypt it.
///
/// Fails with `DecryptionError` if the encoding is malformed.
pub fn point_decrypt_bytes<C: CurveTrait>(ct: &[u8], sk: &PrivateKey<C>) -> Result<C> {
    let ct = CipherText::try_from_bytes(ct).map_err(|e| {
        error!("Cannot decrypt a malformed ciphertext: {e}");
        InternalError::DecryptionError
    })?;
    Ok(point_decrypt(&ct, sk))
}
