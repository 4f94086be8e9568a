// Copyright (c) Facebook, Inc. and its affiliates.
// Modifications Copyright (c) 2022-2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

use crate::{
    ciphertext::{CipherText, Share},
    curve::{CurveTrait, ScalarTrait},
    errors::{InternalError, Result},
    keys::{PrivateKey, PublicKey},
};
use rand::{CryptoRng, RngCore};
use std::fmt::Debug;
use tracing::{error, instrument, trace};
use zeroize::ZeroizeOnDrop;

/// The fresh scalar `s_i` behind a share. It is needed once more to prove the
/// share and must be dropped afterwards.
#[derive(Clone, ZeroizeOnDrop)]
pub struct ShareRandomness<C: CurveTrait> {
    s: C::Scalar,
}

impl<C: CurveTrait> Debug for ShareRandomness<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ShareRandomness([redacted])")
    }
}

impl<C: CurveTrait> ShareRandomness<C> {
    pub(crate) fn scalar(&self) -> &C::Scalar {
        &self.s
    }
}

/// Compute a participant's share of the key switch of `encrypted_k` towards
/// `target`.
///
/// With `x_i` the participant's private key and `s_i` fresh, the share is
/// `(s_i·G, s_i·T - x_i·K)`.
#[instrument(skip_all)]
pub fn share_cal<C: CurveTrait, R: RngCore + CryptoRng>(
    target: &PublicKey<C>,
    encrypted_k: &C,
    sk: &PrivateKey<C>,
    rng: &mut R,
) -> (Share<C>, ShareRandomness<C>) {
    let s = C::Scalar::random(rng);
    let k_i = C::scale_generator(&s);
    let c_i = target.as_point().mul(&s) - encrypted_k.mul(sk.scalar());
    trace!("Computed key-switch share on {}", C::NAME);
    (CipherText::new(k_i, c_i), ShareRandomness { s })
}

/// Fold every participant's share into the original encrypted key.
///
/// Returns `(ΣK_i, C + ΣC_i)`, which decrypts under the target's private key
/// to the original point only when all participants' shares are present.
/// Share order does not matter.
pub fn share_replace<C: CurveTrait>(
    shares: &[Share<C>],
    encrypted_key: &CipherText<C>,
) -> Result<CipherText<C>> {
    if shares.is_empty() {
        error!("Cannot replace an encrypted key without any shares");
        Err(InternalError::invalid_input("no shares to combine"))?;
    }
    let (k, c) = shares.iter().fold(
        (C::IDENTITY, *encrypted_key.c()),
        |(k, c), share| (k + *share.k(), c + *share.c()),
    );
    Ok(CipherText::new(k, c))
}
