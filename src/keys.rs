// Copyright (c) Facebook, Inc. and its affiliates.
// Modifications Copyright (c) 2022-2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! Participant, requester and collective key material.

use crate::{
    curve::{CurveTrait, ScalarTrait, FIELD_BYTES, POINT_BYTES},
    errors::{CallerError, InternalError, Result},
    utils::{decode_base64, encode_base64},
};
use itertools::Itertools;
use rand::{CryptoRng, RngCore};
use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};
use std::{
    fmt::Debug,
    hash::{Hash, Hasher},
};
use tracing::error;
use zeroize::{ZeroizeOnDrop, Zeroizing};

/// A non-zero secret scalar.
///
/// The scalar is overwritten when the key is dropped and is never printed.
/// There is deliberately no `Serialize` implementation; use
/// [`PrivateKey::to_bytes`] when a key has to be persisted.
#[derive(Clone, PartialEq, Eq, ZeroizeOnDrop)]
pub struct PrivateKey<C: CurveTrait> {
    x: C::Scalar,
}

impl<C: CurveTrait> Debug for PrivateKey<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PrivateKey([redacted])")
    }
}

impl<C: CurveTrait> PrivateKey<C> {
    /// Sample a private key uniformly from `[1, q)`.
    pub fn random<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        loop {
            let x = C::Scalar::random(rng);
            if !x.is_zero() {
                return Self { x };
            }
        }
    }

    /// Parse a 32-byte big-endian scalar. Zero and values `>= q` are rejected.
    pub fn try_from_bytes(bytes: &[u8; FIELD_BYTES]) -> Result<Self> {
        match C::Scalar::from_be_bytes(bytes) {
            Some(x) if !x.is_zero() => Ok(Self { x }),
            _ => {
                error!("Private key bytes are zero or not a canonical scalar");
                Err(CallerError::InvalidScalar)?
            }
        }
    }

    /// Big-endian encoding of the secret scalar, wiped when dropped.
    pub fn to_bytes(&self) -> Zeroizing<[u8; FIELD_BYTES]> {
        Zeroizing::new(self.x.to_be_bytes())
    }

    /// The public key `x·G`.
    pub fn public_key(&self) -> PublicKey<C> {
        PublicKey(C::scale_generator(&self.x))
    }

    pub(crate) fn scalar(&self) -> &C::Scalar {
        &self.x
    }

    pub(crate) fn from_scalar(x: C::Scalar) -> Result<Self> {
        if x.is_zero() {
            error!("Refusing to build a private key from the zero scalar");
            Err(InternalError::InternalInvariantFailed)?;
        }
        Ok(Self { x })
    }
}

/// A validated curve point used as a public key.
///
/// The identity point is never a valid public key. On the wire a public key
/// is the 64-byte `X || Y` encoding, base64-encoded inside JSON.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PublicKey<C: CurveTrait>(C);

impl<C: CurveTrait> PublicKey<C> {
    /// Wrap a point, rejecting the identity.
    pub fn from_point(point: C) -> Result<Self> {
        if point.is_identity() {
            error!("The identity point is not a valid public key");
            Err(CallerError::InvalidPoint)?;
        }
        Ok(Self(point))
    }

    /// The underlying curve point.
    pub fn as_point(&self) -> &C {
        &self.0
    }

    /// `X || Y` encoding.
    pub fn to_bytes(&self) -> [u8; POINT_BYTES] {
        self.0.to_coordinates()
    }

    /// Decode an `X || Y` encoding of exactly 64 bytes.
    pub fn try_from_bytes(bytes: &[u8]) -> Result<Self> {
        let bytes: &[u8; POINT_BYTES] = bytes.try_into().map_err(|_| {
            error!(
                "Public key encoding has {} bytes, expected {POINT_BYTES}",
                bytes.len()
            );
            CallerError::InvalidLength {
                expected: POINT_BYTES,
                actual: bytes.len(),
            }
        })?;
        Self::from_point(C::try_from_coordinates(bytes)?)
    }

    /// Short hex prefix of the encoding, for log lines.
    pub(crate) fn fingerprint(&self) -> String {
        self.to_bytes()[..4]
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect()
    }
}

impl<C: CurveTrait> Hash for PublicKey<C> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.to_bytes().hash(state);
    }
}

impl<C: CurveTrait> AsRef<C> for PublicKey<C> {
    fn as_ref(&self) -> &C {
        &self.0
    }
}

impl<C: CurveTrait> Serialize for PublicKey<C> {
    fn serialize<S: Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.serialize_str(&encode_base64(&self.to_bytes()))
    }
}

impl<'de, C: CurveTrait> Deserialize<'de> for PublicKey<C> {
    fn deserialize<D: Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let encoded = String::deserialize(d)?;
        let bytes = decode_base64(&encoded).map_err(D::Error::custom)?;
        PublicKey::try_from_bytes(&bytes).map_err(D::Error::custom)
    }
}

/// A private key together with its public key.
#[derive(Debug, Clone)]
pub struct KeyPair<C: CurveTrait> {
    private: PrivateKey<C>,
    public: PublicKey<C>,
}

impl<C: CurveTrait> KeyPair<C> {
    /// Generate a fresh key pair.
    pub fn generate<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        Self::from_private(PrivateKey::random(rng))
    }

    /// Complete a key pair from its private half.
    pub fn from_private(private: PrivateKey<C>) -> Self {
        let public = private.public_key();
        Self { private, public }
    }

    pub fn public(&self) -> &PublicKey<C> {
        &self.public
    }

    pub fn private(&self) -> &PrivateKey<C> {
        &self.private
    }
}

/// Sum of a set of public keys.
///
/// The sum is independent of input order. An empty input is rejected, since
/// its sum is the identity.
pub fn combine_public_keys<C: CurveTrait>(keys: &[PublicKey<C>]) -> Result<PublicKey<C>> {
    if keys.is_empty() {
        error!("Cannot combine an empty set of public keys");
        Err(InternalError::invalid_input("no public keys to combine"))?;
    }
    let sum = keys.iter().fold(C::IDENTITY, |sum, pk| sum + pk.0);
    PublicKey::from_point(sum)
}

/// The key under which resource keys are encrypted, together with the
/// roster of participants whose keys it was built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectivePublicKey<C: CurveTrait> {
    key: PublicKey<C>,
    roster: Vec<PublicKey<C>>,
}

impl<C: CurveTrait> CollectivePublicKey<C> {
    /// Build the collective key from every participant's public key.
    ///
    /// Fails with `InvalidInput` if the roster is empty or lists a key twice.
    pub fn new(roster: Vec<PublicKey<C>>) -> Result<Self> {
        if !roster.iter().all_unique() {
            error!("Participant roster contains a duplicate public key");
            Err(InternalError::invalid_input("duplicate participant key"))?;
        }
        let key = combine_public_keys(&roster)?;
        Ok(Self { key, roster })
    }

    pub fn public_key(&self) -> &PublicKey<C> {
        &self.key
    }

    pub fn roster(&self) -> &[PublicKey<C>] {
        &self.roster
    }

    /// Number of participants, i.e. the number of shares a session needs.
    pub fn participants(&self) -> usize {
        self.roster.len()
    }

    /// Whether `pk` belongs to one of the participants.
    pub fn contains(&self, pk: &PublicKey<C>) -> bool {
        self.roster.contains(pk)
    }
}

/// Sum of every participant's private key, matching
/// [`combine_public_keys`] on the public side.
///
/// Only regulator or development setups should ever hold this value.
pub fn collective_private_key<C: CurveTrait>(keys: &[&PrivateKey<C>]) -> Result<PrivateKey<C>> {
    if keys.is_empty() {
        error!("Cannot combine an empty set of private keys");
        Err(InternalError::invalid_input("no private keys to combine"))?;
    }
    let mut sum = C::Scalar::zero();
    for key in keys {
        sum.add_assign(key.scalar());
    }
    PrivateKey::from_scalar(sum)
}
