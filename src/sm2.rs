//! SM2 functions

use crate::{
    curve::{CurveTrait, ScalarTrait, FIELD_BYTES, POINT_BYTES},
    errors::{CallerError, Result},
};
use rand::{CryptoRng, RngCore};
use sm2::{
    elliptic_curve::{
        group::{Curve as _, Group},
        sec1::{FromEncodedPoint, ToEncodedPoint},
        Field, PrimeField,
    },
    AffinePoint, EncodedPoint, FieldBytes, ProjectivePoint, Scalar as Sm2Scalar,
};
use tracing::error;

/// Wrapper around sm2::ProjectivePoint so that we can define our own
/// fixed-width encoding for it.
///
/// Note that this type derives [`Debug`]; if a [`Sm2`] point is used in a
/// private type, `Debug` should be manually implemented with the field of this
/// type explicitly redacted!
#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub struct Sm2(pub sm2::ProjectivePoint);

impl AsRef<Sm2> for Sm2 {
    fn as_ref(&self) -> &Sm2 {
        self
    }
}

impl Sm2 {
    pub(crate) const GENERATOR: Self = Sm2(ProjectivePoint::GENERATOR);
    /// The identity point, used to initialize the aggregation of public keys.
    pub const IDENTITY: Self = Sm2(ProjectivePoint::IDENTITY);

    pub(crate) fn multiply_by_scalar(&self, scalar: &Sm2Scalar) -> Self {
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
                error!("Failed to decode bytes as an SM2 curve point");
                Err(CallerError::InvalidPoint)?
            }
        }
    }
}

impl std::ops::Add for Sm2 {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl std::ops::Sub for Sm2 {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0 - rhs.0)
    }
}

impl std::ops::Neg for Sm2 {
    type Output = Self;

    fn neg(self) -> Self::Output {
        Self(-self.0)
    }
}

impl From<sm2::ProjectivePoint> for Sm2 {
    fn from(p: sm2::ProjectivePoint) -> Self {
        Self(p)
    }
}

impl CurveTrait for Sm2 {
    const GENERATOR: Self = Sm2::GENERATOR;
    const IDENTITY: Self = Sm2::IDENTITY;
    const NAME: &'static str = "sm2";
    type Scalar = Sm2Scalar;

    fn mul(&self, scalar: &Self::Scalar) -> Self {
        self.multiply_by_scalar(scalar)
    }

    fn to_coordinates(&self) -> [u8; POINT_BYTES] {
        self.to_bytes()
    }

    fn try_from_coordinates(bytes: &[u8; POINT_BYTES]) -> Result<Self> {
        Sm2::try_from_bytes(bytes)
    }

    fn random<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        Sm2(<ProjectivePoint as Group>::random(rng))
    }
}

impl ScalarTrait for Sm2Scalar {
    fn zero() -> Self {
        <Sm2Scalar as Field>::ZERO
    }

    fn one() -> Self {
        <Sm2Scalar as Field>::ONE
    }

    fn from_u64(x: u64) -> Self {
        <Sm2Scalar as From<u64>>::from(x)
    }

    fn add(&self, other: &Self) -> Self {
        *self + *other
    }

    fn sub(&self, other: &Self) -> Self {
        *self - *other
    }

    fn negate(&self) -> Self {
        -*self
    }

    fn mul(&self, other: &Self) -> Self {
        *self * *other
    }

    fn random<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        <Sm2Scalar as Field>::random(rng)
    }

    fn to_be_bytes(&self) -> [u8; FIELD_BYTES] {
        let mut bytes = [0u8; FIELD_BYTES];
        bytes.copy_from_slice(&<Sm2Scalar as PrimeField>::to_repr(self));
        bytes
    }

    fn from_be_bytes(bytes: &[u8; FIELD_BYTES]) -> Option<Self> {
        <Sm2Scalar as PrimeField>::from_repr(*FieldBytes::from_slice(bytes)).into()
    }

    fn inverse(&self) -> Option<Self> {
        <Sm2Scalar as Field>::invert(self).into()
    }
}
