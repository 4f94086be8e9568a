// Copyright (c) Facebook, Inc. and its affiliates.
// Modifications Copyright (c) 2022-2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

use crate::{
    curve::{CurveTrait, POINT_BYTES},
    errors::Result,
    utils::{decode_base64, encode_base64, ParseBytes},
};
use serde::{de::Error as _, Deserialize, Deserializer, Serialize, Serializer};

/// Width of an encoded [`CipherText`].
pub const CIPHERTEXT_BYTES: usize = 2 * POINT_BYTES;

/// An ElGamal-style encryption of a curve point: the mask component `K` and
/// the masked payload `C`.
///
/// Encoded as `K.X || K.Y || C.X || C.Y`, each a 32-byte big-endian integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CipherText<C: CurveTrait> {
    k: C,
    c: C,
}

/// One participant's partial re-encryption. Same shape and encoding as a
/// [`CipherText`].
pub type Share<C> = CipherText<C>;

impl<C: CurveTrait> CipherText<C> {
    pub fn new(k: C, c: C) -> Self {
        Self { k, c }
    }

    /// The mask component.
    pub fn k(&self) -> &C {
        &self.k
    }

    /// The masked payload component.
    pub fn c(&self) -> &C {
        &self.c
    }

    pub fn to_bytes(&self) -> [u8; CIPHERTEXT_BYTES] {
        let mut bytes = [0u8; CIPHERTEXT_BYTES];
        bytes[..POINT_BYTES].copy_from_slice(&self.k.to_coordinates());
        bytes[POINT_BYTES..].copy_from_slice(&self.c.to_coordinates());
        bytes
    }

    /// Fails with `InvalidLength` unless `bytes` is exactly 128 bytes long,
    /// and with `InvalidPoint` if either point is off the curve.
    pub fn try_from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut parser = ParseBytes::new(bytes, CIPHERTEXT_BYTES)?;
        let k = parser.take_point()?;
        let c = parser.take_point()?;
        Ok(Self { k, c })
    }
}

impl<C: CurveTrait> Serialize for CipherText<C> {
    fn serialize<S: Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.serialize_str(&encode_base64(&self.to_bytes()))
    }
}

impl<'de, C: CurveTrait> Deserialize<'de> for CipherText<C> {
    fn deserialize<D: Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let encoded = String::deserialize(d)?;
        let bytes = decode_base64(&encoded).map_err(D::Error::custom)?;
        CipherText::try_from_bytes(&bytes).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        curve::TestCurve,
        errors::{CallerError, InternalError},
        utils::testing::init_testing,
    };

    fn random_ciphertext(rng: &mut rand::rngs::StdRng) -> CipherText<TestCurve> {
        CipherText::new(TestCurve::random(rng), TestCurve::random(rng))
    }

    #[test]
    fn codec_round_trips() {
        let rng = &mut init_testing();
        for _ in 0..20 {
            let ct = random_ciphertext(rng);
            let bytes = ct.to_bytes();
            assert_eq!(bytes.len(), 128);
            assert_eq!(CipherText::try_from_bytes(&bytes).unwrap(), ct);
        }
    }

    #[test]
    fn layout_is_k_then_c() {
        let rng = &mut init_testing();
        let ct = random_ciphertext(rng);
        let bytes = ct.to_bytes();
        assert_eq!(&bytes[..32], &ct.k().x_coordinate());
        assert_eq!(&bytes[64..96], &ct.c().x_coordinate());
        assert_eq!(&bytes[32..64], &ct.k().to_coordinates()[32..]);
        assert_eq!(&bytes[96..], &ct.c().to_coordinates()[32..]);
    }

    #[test]
    fn wrong_lengths_are_rejected() {
        let rng = &mut init_testing();
        let bytes = random_ciphertext(rng).to_bytes();
        for len in [0, 64, 127, 129] {
            let mut input = bytes.to_vec();
            input.resize(len, 0);
            assert_eq!(
                CipherText::<TestCurve>::try_from_bytes(&input),
                Err(InternalError::CallingApplicationMistake(
                    CallerError::InvalidLength {
                        expected: 128,
                        actual: len
                    }
                ))
            );
        }
    }

    #[test]
    fn off_curve_points_are_rejected() {
        let rng = &mut init_testing();
        let mut bytes = random_ciphertext(rng).to_bytes();
        bytes[127] ^= 0x01;
        assert_eq!(
            CipherText::<TestCurve>::try_from_bytes(&bytes),
            Err(InternalError::CallingApplicationMistake(
                CallerError::InvalidPoint
            ))
        );
    }

    #[test]
    fn json_encoding_is_base64_of_layout() {
        let rng = &mut init_testing();
        let ct = random_ciphertext(rng);
        let json = serde_json::to_string(&ct).unwrap();
        assert_eq!(json, format!("\"{}\"", encode_base64(&ct.to_bytes())));
        let back: CipherText<TestCurve> = serde_json::from_str(&json).unwrap();
        assert_eq!(back, ct);
    }
}
