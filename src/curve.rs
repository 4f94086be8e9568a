//! Elliptic Curve abstraction
use crate::{errors::Result, sm2::Sm2};
use rand::{CryptoRng, RngCore};
use std::{
    fmt::Debug,
    ops::{Add, Neg, Sub},
};
use zeroize::Zeroize;

/// Width in bytes of a field element or scalar of every supported curve.
pub const FIELD_BYTES: usize = 32;

/// Width in bytes of an uncompressed `X || Y` point encoding.
pub const POINT_BYTES: usize = 2 * FIELD_BYTES;

/// Generic elliptic curve point.
pub trait CurveTrait:
    'static
    + Clone
    + Copy
    + Debug
    + Send
    + Sync
    + Eq
    + PartialEq
    + Add<Output = Self>
    + Sub<Output = Self>
    + Neg<Output = Self>
    + AsRef<Self>
{
    /// A generator point.
    const GENERATOR: Self;

    /// The identity point, used to initialize sums of points.
    const IDENTITY: Self;

    /// Human readable name of the curve, used in logs.
    const NAME: &'static str;

    /// The type of scalars.
    type Scalar: ScalarTrait;

    /// Multiply `self` by a [`Self::Scalar`].
    fn mul(&self, scalar: &Self::Scalar) -> Self;

    /// Multiply the generator by a [`Self::Scalar`].
    fn scale_generator(scalar: &Self::Scalar) -> Self {
        Self::GENERATOR.mul(scalar)
    }

    /// Whether this is the point at infinity.
    fn is_identity(&self) -> bool {
        *self == Self::IDENTITY
    }

    /// Encode the point as `X || Y`, each coordinate a 32-byte big-endian
    /// integer. The identity is encoded as all zeros.
    fn to_coordinates(&self) -> [u8; POINT_BYTES];

    /// Decode an `X || Y` encoding, checking that the point lies on the curve.
    fn try_from_coordinates(bytes: &[u8; POINT_BYTES]) -> Result<Self>;

    /// The big-endian X coordinate of the point (all zeros for the identity).
    fn x_coordinate(&self) -> [u8; FIELD_BYTES] {
        let mut x = [0u8; FIELD_BYTES];
        x.copy_from_slice(&self.to_coordinates()[..FIELD_BYTES]);
        x
    }

    /// Random point.
    fn random<R: RngCore + CryptoRng>(rng: &mut R) -> Self;
}

/// Scalar trait.
pub trait ScalarTrait:
    'static + Sync + Send + Clone + Copy + Debug + PartialEq + Eq + Zeroize
{
    /// Return the zero scalar.
    fn zero() -> Self;

    /// Return the one scalar.
    fn one() -> Self;

    /// Convert a u64 to a scalar.
    fn from_u64(x: u64) -> Self;

    /// Add two scalars.
    fn add(&self, other: &Self) -> Self;

    /// Addition operator such that we can use += syntax.
    fn add_assign(&mut self, other: &Self) {
        *self = ScalarTrait::add(self, other);
    }

    /// Sub two scalars.
    fn sub(&self, other: &Self) -> Self;

    /// Negate
    fn negate(&self) -> Self;

    /// Multiply two scalars.
    fn mul(&self, other: &Self) -> Self;

    /// Random scalar.
    fn random<R: RngCore + CryptoRng>(rng: &mut R) -> Self;

    /// Whether this is the zero scalar.
    fn is_zero(&self) -> bool {
        *self == Self::zero()
    }

    /// Convert to 32 big-endian bytes.
    fn to_be_bytes(&self) -> [u8; FIELD_BYTES];

    /// Convert from 32 big-endian bytes. Returns `None` if the encoding is not
    /// in the range `[0, q)`.
    fn from_be_bytes(bytes: &[u8; FIELD_BYTES]) -> Option<Self>;

    /// Invert the scalar.
    fn inverse(&self) -> Option<Self>;
}

/// The curve every key-switch deployment uses unless configured otherwise.
pub type DefaultCurve = Sm2;

/// Default curve type for tests.
pub type TestCurve = Sm2;
