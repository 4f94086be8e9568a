// Copyright (c) Facebook, Inc. and its affiliates.
// Modifications Copyright (c) 2022-2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! Proof that a key-switch share was computed honestly.
//!
//! For a participant with public key `P = x·G`, a share `(K_i, C_i)`, a target
//! key `T` and the encrypted-key component `K`, the prover shows knowledge of
//! `x` and `s` such that
//!
//! ```text
//!     P   = x·G
//!     K_i = s·G
//!     C_i = s·T - x·K
//! ```
//!
//! The proof is a Chaum-Pedersen style sigma protocol made non-interactive
//! with a [`Transcript`]:
//!
//! 1. The prover samples `w1, w2` and commits to `A1 = w1·G`, `A2 = w2·G` and
//!    `A3 = w2·T - w1·K`.
//! 2. The challenge `c` is derived from the statement and the commitments.
//! 3. The prover answers `z1 = w1 + c·x` and `z2 = w2 + c·s`.
//!
//! Only `(c, z1, z2)` is sent. The verifier rebuilds the commitments as
//! `z1·G - c·P`, `z2·G - c·K_i` and `z2·T - z1·K - c·C_i` and checks that they
//! hash to `c`.

use crate::{
    ciphertext::Share,
    curve::{CurveTrait, ScalarTrait, FIELD_BYTES},
    errors::Result,
    keys::{PrivateKey, PublicKey},
    keyswitch::share::ShareRandomness,
    utils::{
        append_point, decode_base64, encode_base64, scalar_challenge_from_transcript, ParseBytes,
    },
};
use merlin::Transcript;
use rand::{CryptoRng, RngCore};
use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};
use tracing::{instrument, warn};

/// Width of an encoded [`ShareProof`]: `c || z1 || z2`.
pub const SHARE_PROOF_BYTES: usize = 3 * FIELD_BYTES;

/// Non-interactive proof attached to a key-switch share.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShareProof<C: CurveTrait> {
    challenge: C::Scalar,
    z1: C::Scalar,
    z2: C::Scalar,
}

/// Public values both the prover and the verifier know.
#[derive(Debug, Clone, Copy)]
pub struct CommonInput<'a, C: CurveTrait> {
    participant_pk: &'a PublicKey<C>,
    share: &'a Share<C>,
    target_pk: &'a PublicKey<C>,
    encrypted_k: &'a C,
}

impl<'a, C: CurveTrait> CommonInput<'a, C> {
    /// Collect the statement for proving or verifying a [`ShareProof`].
    pub fn new(
        participant_pk: &'a PublicKey<C>,
        share: &'a Share<C>,
        target_pk: &'a PublicKey<C>,
        encrypted_k: &'a C,
    ) -> Self {
        Self {
            participant_pk,
            share,
            target_pk,
            encrypted_k,
        }
    }
}

impl<C: CurveTrait> ShareProof<C> {
    fn new_transcript() -> Transcript {
        Transcript::new(b"KeySwitchShareProof")
    }

    fn append_statement(transcript: &mut Transcript, input: &CommonInput<C>) {
        transcript.append_message(b"curve", C::NAME.as_bytes());
        append_point(transcript, b"participant pk", input.participant_pk.as_point());
        append_point(transcript, b"share K", input.share.k());
        append_point(transcript, b"share C", input.share.c());
        append_point(transcript, b"target pk", input.target_pk.as_point());
        append_point(transcript, b"encrypted K", input.encrypted_k);
    }

    fn challenge(input: &CommonInput<C>, a1: &C, a2: &C, a3: &C) -> Result<C::Scalar> {
        let mut transcript = Self::new_transcript();
        Self::append_statement(&mut transcript, input);
        append_point(&mut transcript, b"A1", a1);
        append_point(&mut transcript, b"A2", a2);
        append_point(&mut transcript, b"A3", a3);
        scalar_challenge_from_transcript::<C>(&mut transcript)
    }

    /// Prove that `input.share` was computed from `sk` and `randomness`.
    #[instrument(skip_all, err(Debug))]
    pub fn prove<R: RngCore + CryptoRng>(
        input: &CommonInput<C>,
        sk: &PrivateKey<C>,
        randomness: &ShareRandomness<C>,
        rng: &mut R,
    ) -> Result<Self> {
        let w1 = C::Scalar::random(rng);
        let w2 = C::Scalar::random(rng);
        let a1 = C::scale_generator(&w1);
        let a2 = C::scale_generator(&w2);
        let a3 = input.target_pk.as_point().mul(&w2) - input.encrypted_k.mul(&w1);

        let challenge = Self::challenge(input, &a1, &a2, &a3)?;
        let z1 = w1.add(&challenge.mul(sk.scalar()));
        let z2 = w2.add(&challenge.mul(randomness.scalar()));
        Ok(Self { challenge, z1, z2 })
    }

    /// Check the proof against `input`.
    ///
    /// A proof that does not verify is an expected outcome, so this returns
    /// `false` instead of an error.
    #[instrument(skip_all)]
    pub fn verify(&self, input: &CommonInput<C>) -> bool {
        let c = &self.challenge;
        let a1 = C::scale_generator(&self.z1) - input.participant_pk.as_point().mul(c);
        let a2 = C::scale_generator(&self.z2) - input.share.k().mul(c);
        let a3 = input.target_pk.as_point().mul(&self.z2)
            - input.encrypted_k.mul(&self.z1)
            - input.share.c().mul(c);

        match Self::challenge(input, &a1, &a2, &a3) {
            Ok(expected) if expected == self.challenge => true,
            Ok(_) => {
                warn!(
                    "Share proof from {} does not verify",
                    input.participant_pk.fingerprint()
                );
                false
            }
            Err(e) => {
                warn!("Could not derive share proof challenge: {e}");
                false
            }
        }
    }

    pub fn to_bytes(&self) -> [u8; SHARE_PROOF_BYTES] {
        let mut bytes = [0u8; SHARE_PROOF_BYTES];
        bytes[..FIELD_BYTES].copy_from_slice(&self.challenge.to_be_bytes());
        bytes[FIELD_BYTES..2 * FIELD_BYTES].copy_from_slice(&self.z1.to_be_bytes());
        bytes[2 * FIELD_BYTES..].copy_from_slice(&self.z2.to_be_bytes());
        bytes
    }

    /// Fails with `InvalidLength` unless `bytes` is exactly 96 bytes long,
    /// and with `InvalidScalar` if a field is not below the group order.
    pub fn try_from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut parser = ParseBytes::new(bytes, SHARE_PROOF_BYTES)?;
        let challenge = parser.take_scalar::<C>()?;
        let z1 = parser.take_scalar::<C>()?;
        let z2 = parser.take_scalar::<C>()?;
        Ok(Self { challenge, z1, z2 })
    }
}

impl<C: CurveTrait> Serialize for ShareProof<C> {
    fn serialize<S: Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.serialize_str(&encode_base64(&self.to_bytes()))
    }
}

impl<'de, C: CurveTrait> Deserialize<'de> for ShareProof<C> {
    fn deserialize<D: Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let encoded = String::deserialize(d)?;
        let bytes = decode_base64(&encoded).map_err(D::Error::custom)?;
        ShareProof::try_from_bytes(&bytes).map_err(D::Error::custom)
    }
}

/// Generate the proof for a share produced by
/// [`share_cal`](crate::keyswitch::share_cal).
pub fn share_proof_gen<C: CurveTrait, R: RngCore + CryptoRng>(
    randomness: &ShareRandomness<C>,
    sk: &PrivateKey<C>,
    share: &Share<C>,
    target_pk: &PublicKey<C>,
    encrypted_k: &C,
    rng: &mut R,
) -> Result<ShareProof<C>> {
    let participant_pk = sk.public_key();
    let input = CommonInput::new(&participant_pk, share, target_pk, encrypted_k);
    ShareProof::prove(&input, sk, randomness, rng)
}

/// Verify a share against the claimed participant public key.
pub fn share_proof_verify<C: CurveTrait>(
    proof: &ShareProof<C>,
    share: &Share<C>,
    participant_pk: &PublicKey<C>,
    target_pk: &PublicKey<C>,
    encrypted_k: &C,
) -> bool {
    proof.verify(&CommonInput::new(participant_pk, share, target_pk, encrypted_k))
}
