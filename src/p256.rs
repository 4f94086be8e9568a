//! P256 functions

use crate::{
    curve::{CurveTrait, ScalarTrait, FIELD_BYTES, POINT_BYTES},
    errors::{CallerError, Result},
};
use p256::{
    elliptic_curve::{
        group::{Curve as _, Group},
        sec1::{FromEncodedPoint, ToEncodedPoint},
        Field, PrimeField,
    },
    AffinePoint, EncodedPoint, FieldBytes, ProjectivePoint, Scalar as P256_Scalar,
};
use rand::{CryptoRng, RngCore};
use std::ops::{Add, Neg, Sub};
use tracing::error;

/// Wrapper around p256::ProjectivePoint so that we can define our own
/// fixed-width encoding for it.
///
/// Note that this type derives [`Debug`]; if a [`P256`] is used in a
/// private type, `Debug` should be manually implemented with the field of this
/// type explicitly redacted!
#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub struct P256(pub p256::ProjectivePoint);

impl AsRef<P256> for P256 {
    fn as_ref(&self) -> &P256 {
        self
    }
}

impl P256 {
    pub(crate) const GENERATOR: Self = P256(p256::ProjectivePoint::GENERATOR);
    /// The identity point, used to initialize the aggregation of public keys.
    pub const IDENTITY: Self = P256(p256::ProjectivePoint::IDENTITY);

    pub(crate) fn multiply_by_scalar(&self, scalar: &P256_Scalar) -> Self {
        Self(self.0 * scalar)
    }

    /// Serialize the point as uncompressed `X || Y` affine coordinates.
    pub(crate) fn to_bytes(self) -> [u8; POINT_BYTES] {
        let mut bytes = [0u8; POINT_BYTES];
        let encoded = self.0.to_affine().to_encoded_point(false);
        if let (Some(x), Some(y)) = (encoded.x(), encoded.y()) {
            bytes[..FIELD_BYTES].copy_from_slice(x);
            bytes[FIELD_BYTES..].copy_from_slice(y);
        }
        bytes
    }

    pub(crate) fn try_from_bytes(bytes: &[u8; POINT_BYTES]) -> Result<Self> {
        if bytes.iter().all(|b| *b == 0) {
            return Ok(Self::IDENTITY);
        }

        let encoded = EncodedPoint::from_affine_coordinates(
            FieldBytes::from_slice(&bytes[..FIELD_BYTES]),
            FieldBytes::from_slice(&bytes[FIELD_BYTES..]),
            false,
        );
        let point: Option<AffinePoint> = AffinePoint::from_encoded_point(&encoded).into();

        match point {
            Some(point) => Ok(Self(point.into())),
            None => {
                error!("Failed to decode bytes as a P256 curve point");
                Err(CallerError::InvalidPoint)?
            }
        }
    }
}

impl Add for P256 {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl Sub for P256 {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

impl Neg for P256 {
    type Output = Self;

    fn neg(self) -> Self::Output {
        Self(self.0.neg())
    }
}

impl From<p256::ProjectivePoint> for P256 {
    fn from(p: p256::ProjectivePoint) -> Self {
        Self(p)
    }
}

impl CurveTrait for P256 {
    const GENERATOR: Self = P256::GENERATOR;
    const IDENTITY: Self = P256::IDENTITY;
    const NAME: &'static str = "p256";
    type Scalar = P256_Scalar;

    fn mul(&self, scalar: &Self::Scalar) -> Self {
        self.multiply_by_scalar(scalar)
    }

    fn to_coordinates(&self) -> [u8; POINT_BYTES] {
        self.to_bytes()
    }

    fn try_from_coordinates(bytes: &[u8; POINT_BYTES]) -> Result<Self> {
        P256::try_from_bytes(bytes)
    }

    // Random point.
    fn random<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        P256(<ProjectivePoint as Group>::random(rng))
    }
}

impl ScalarTrait for P256_Scalar {
    fn zero() -> Self {
        <P256_Scalar as Field>::ZERO
    }

    fn one() -> Self {
        <P256_Scalar as Field>::ONE
    }

    fn from_u64(x: u64) -> Self {
        <P256_Scalar as From<u64>>::from(x)
    }

    fn add(&self, other: &Self) -> Self {
        Add::add(*self, *other)
    }

    fn sub(&self, other: &Self) -> Self {
        Sub::sub(*self, *other)
    }

    fn negate(&self) -> Self {
        Neg::neg(*self)
    }

    fn mul(&self, other: &Self) -> Self {
        *self * *other
    }

    fn random<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        <P256_Scalar as Field>::random(rng)
    }

    fn to_be_bytes(&self) -> [u8; FIELD_BYTES] {
        let mut bytes = [0u8; FIELD_BYTES];
        bytes.copy_from_slice(&<P256_Scalar as PrimeField>::to_repr(self));
        bytes
    }

    fn from_be_bytes(bytes: &[u8; FIELD_BYTES]) -> Option<Self> {
        <P256_Scalar as PrimeField>::from_repr(*FieldBytes::from_slice(bytes)).into()
    }

    fn inverse(&self) -> Option<Self> {
        <P256_Scalar as Field>::invert(self).into()
    }
}
