use crate::*;
use lazy_static::lazy_static;
use num_bigint::{BigInt, BigUint, Sign};
use num_traits::{One, Zero};
use rand::{CryptoRng, RngCore};
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use std::ops::{Add, Mul, Neg, Sub};

pub const FIELD_BYTES: usize = 32;

lazy_static! {
    /// p = 2^256 - 2^32 - 977
    static ref MODULUS: BigUint = {
        let two_256: BigUint = BigUint::one() << 256usize;
        let two_32: BigUint = BigUint::one() << 32usize;
        two_256 - two_32 - BigUint::from(977u32)
    };
}

/// An element of the prime field used for secret sharing.
///
/// Always held reduced, so equality is equality of residues.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct FieldElement(BigUint);

impl FieldElement {
    pub fn modulus() -> &'static BigUint {
        &MODULUS
    }

    pub fn zero() -> Self {
        FieldElement(BigUint::zero())
    }

    pub fn one() -> Self {
        FieldElement(BigUint::one())
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Parse a 32-byte big-endian value; values at or above the modulus are refused, not reduced.
    pub fn from_bytes_be(bytes: &[u8]) -> Result<Self, Error> {
        if bytes.len() != FIELD_BYTES {
            return Err(Error::InvalidInputLength {
                expected: FIELD_BYTES,
                found: bytes.len(),
            });
        }
        let value = BigUint::from_bytes_be(bytes);
        if value >= *MODULUS {
            return Err(Error::NotAFieldElement);
        }
        Ok(FieldElement(value))
    }

    /// Fixed-width big-endian encoding.
    pub fn to_bytes_be(&self) -> [u8; FIELD_BYTES] {
        let raw = self.0.to_bytes_be();
        let mut out = [0u8; FIELD_BYTES];
        out[FIELD_BYTES - raw.len()..].copy_from_slice(&raw);
        out
    }

    /// Uniform element by rejection sampling.
    pub fn random<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        let mut bytes = [0u8; FIELD_BYTES];
        loop {
            rng.fill_bytes(&mut bytes);
            if let Ok(element) = FieldElement::from_bytes_be(&bytes) {
                return element;
            }
        }
    }

    /// Multiplicative inverse by the extended Euclidean algorithm.
    pub fn inverse(&self) -> Result<Self, Error> {
        mod_inverse(&self.0, &MODULUS)
            .map(FieldElement)
            .ok_or(Error::NonInvertibleElement)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes_be())
    }
}

/// Inverse of `a` modulo `m`, or `None` when `gcd(a, m) != 1`.
fn mod_inverse(a: &BigUint, m: &BigUint) -> Option<BigUint> {
    let m_int = BigInt::from_biguint(Sign::Plus, m.clone());
    let (mut old_r, mut r) = (BigInt::from_biguint(Sign::Plus, a % m), m_int.clone());
    let (mut old_s, mut s) = (BigInt::one(), BigInt::zero());

    while !r.is_zero() {
        let quotient = &old_r / &r;
        let next_r = &old_r - &quotient * &r;
        old_r = std::mem::replace(&mut r, next_r);
        let next_s = &old_s - &quotient * &s;
        old_s = std::mem::replace(&mut s, next_s);
    }

    if !old_r.is_one() {
        return None;
    }
    let reduced = ((old_s % &m_int) + &m_int) % &m_int;
    reduced.to_biguint()
}

impl From<u64> for FieldElement {
    fn from(value: u64) -> Self {
        // Every u64 is below the modulus
        FieldElement(BigUint::from(value))
    }
}

impl From<u32> for FieldElement {
    fn from(value: u32) -> Self {
        FieldElement::from(value as u64)
    }
}

impl<'a, 'b> Add<&'b FieldElement> for &'a FieldElement {
    type Output = FieldElement;

    fn add(self, other: &'b FieldElement) -> FieldElement {
        FieldElement((&self.0 + &other.0) % &*MODULUS)
    }
}

impl<'a, 'b> Sub<&'b FieldElement> for &'a FieldElement {
    type Output = FieldElement;

    fn sub(self, other: &'b FieldElement) -> FieldElement {
        FieldElement((&self.0 + &*MODULUS - &other.0) % &*MODULUS)
    }
}

impl<'a, 'b> Mul<&'b FieldElement> for &'a FieldElement {
    type Output = FieldElement;

    fn mul(self, other: &'b FieldElement) -> FieldElement {
        FieldElement((&self.0 * &other.0) % &*MODULUS)
    }
}

impl<'a> Neg for &'a FieldElement {
    type Output = FieldElement;

    fn neg(self) -> FieldElement {
        &FieldElement::zero() - self
    }
}

impl Add for FieldElement {
    type Output = FieldElement;

    fn add(self, other: FieldElement) -> FieldElement {
        &self + &other
    }
}

impl Sub for FieldElement {
    type Output = FieldElement;

    fn sub(self, other: FieldElement) -> FieldElement {
        &self - &other
    }
}

impl Mul for FieldElement {
    type Output = FieldElement;

    fn mul(self, other: FieldElement) -> FieldElement {
        &self * &other
    }
}

impl std::fmt::Debug for FieldElement {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "FieldElement({})", self.to_hex())
    }
}

impl std::fmt::Display for FieldElement {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl Serialize for FieldElement {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for FieldElement {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(de::Error::custom)?;
        FieldElement::from_bytes_be(&bytes).map_err(de::Error::custom)
    }
}
