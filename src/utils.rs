// Copyright (c) Facebook, Inc. and its affiliates.
// Modifications Copyright (c) 2022-2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

use crate::{
    curve::{CurveTrait, ScalarTrait, FIELD_BYTES, POINT_BYTES},
    errors::{CallerError, InternalError, Result},
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use merlin::Transcript;
use tracing::error;

pub(crate) const CRYPTOGRAPHIC_RETRY_MAX: usize = 500usize;

/// Helper type for parsing fixed-width byte layouts into fields.
///
/// Every layout in this crate is a concatenation of 32-byte big-endian
/// fields with no length prefix; the total width is checked up front.
pub(crate) struct ParseBytes<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> ParseBytes<'a> {
    /// Start parsing `bytes`, which must be exactly `expected` bytes long.
    pub(crate) fn new(bytes: &'a [u8], expected: usize) -> Result<Self> {
        if bytes.len() != expected {
            error!(
                "Fixed-width encoding has {} bytes, expected {}",
                bytes.len(),
                expected
            );
            Err(CallerError::InvalidLength {
                expected,
                actual: bytes.len(),
            })?;
        }
        Ok(ParseBytes { bytes, offset: 0 })
    }

    /// Take next `N` bytes from array.
    pub(crate) fn take_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let slice = self
            .bytes
            .get(self.offset..self.offset + N)
            .ok_or(InternalError::InternalInvariantFailed)?;
        self.offset += N;
        let mut array = [0u8; N];
        array.copy_from_slice(slice);
        Ok(array)
    }

    /// Parse the next 64 bytes as an `X || Y` curve point.
    pub(crate) fn take_point<C: CurveTrait>(&mut self) -> Result<C> {
        let bytes = self.take_array::<POINT_BYTES>()?;
        C::try_from_coordinates(&bytes)
    }

    /// Parse the next 32 bytes as a canonical big-endian scalar.
    pub(crate) fn take_scalar<C: CurveTrait>(&mut self) -> Result<C::Scalar> {
        let bytes = self.take_array::<FIELD_BYTES>()?;
        C::Scalar::from_be_bytes(&bytes).ok_or_else(|| {
            error!("Scalar encoding is not in the range [0, q)");
            InternalError::from(CallerError::InvalidScalar)
        })
    }
}

/// Append a curve point to the transcript under `label`.
pub(crate) fn append_point<C: CurveTrait>(
    transcript: &mut Transcript,
    label: &'static [u8],
    point: &C,
) {
    transcript.append_message(label, &point.to_coordinates());
}

/// Encode bytes for embedding in a JSON wire object.
pub(crate) fn encode_base64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decode a base64 field of a JSON wire object.
pub(crate) fn decode_base64(encoded: &str) -> Result<Vec<u8>> {
    STANDARD.decode(encoded).map_err(|_| {
        error!("Byte field is not valid base64");
        InternalError::from(CallerError::DeserializationFailed)
    })
}

/// `serde(with = ...)` adapter for `Vec<u8>` fields carried as base64 strings.
pub(crate) mod base64_bytes {
    use serde::{de::Error as _, Deserialize, Deserializer, Serializer};

    pub(crate) fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&super::encode_base64(bytes))
    }

    pub(crate) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(d)?;
        super::decode_base64(&encoded).map_err(D::Error::custom)
    }
}

/// Derive a deterministic pseudorandom scalar in `[0, q)` from the
/// [`Transcript`].
pub(crate) fn scalar_challenge_from_transcript<C: CurveTrait>(
    transcript: &mut Transcript,
) -> Result<C::Scalar> {
    // To avoid sample bias, we can't reduce `t mod q`. Instead, we re-sample a
    // new value (different because the transcript state advances).
    let mut t = [0u8; FIELD_BYTES];
    for _ in 0..CRYPTOGRAPHIC_RETRY_MAX {
        transcript.challenge_bytes(b"sampling randomness", t.as_mut_slice());
        if let Some(c) = C::Scalar::from_be_bytes(&t) {
            return Ok(c);
        }
    }
    Err(CallerError::RetryFailed)?
}


////////////////////////////
// Test Utility Functions //
////////////////////////////
