//! Shamir (k, n) secret sharing over the prime field.

use crate::*;
use rand::{CryptoRng, RngCore};
use std::collections::{BTreeMap, BTreeSet};

/// Encoded share length: 4-byte big-endian index followed by the 32-byte value.
pub const SHARE_BYTES: usize = 4 + FIELD_BYTES;

/// One point `(index, f(index))` on a dealer's polynomial. Index 0 is never issued: it is where
/// the secret lives.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Share {
    pub index: u32,
    pub value: FieldElement,
    pub threshold: u32,
}

impl Share {
    /// Degree of the polynomial this share was taken from.
    pub fn degree(&self) -> u32 {
        self.threshold.saturating_sub(1)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(SHARE_BYTES);
        bytes.extend_from_slice(&self.index.to_be_bytes());
        bytes.extend_from_slice(&self.value.to_bytes_be());
        bytes
    }

    pub fn from_bytes(bytes: &[u8], threshold: u32) -> Result<Self, Error> {
        if bytes.len() != SHARE_BYTES {
            return Err(Error::InvalidInputLength {
                expected: SHARE_BYTES,
                found: bytes.len(),
            });
        }
        // OK to unwrap - length checked above
        let index = u32::from_be_bytes(bytes[..4].try_into().unwrap());
        if index == 0 {
            return Err(Error::InvalidShareIndex);
        }
        Ok(Share {
            index,
            value: FieldElement::from_bytes_be(&bytes[4..])?,
            threshold,
        })
    }
}

/// Random polynomial with a fixed constant term.
struct Polynomial {
    coefficients: Vec<FieldElement>,
}

impl Polynomial {
    fn random<R: RngCore + CryptoRng>(secret: &FieldElement, degree: u32, rng: &mut R) -> Self {
        let mut coefficients = Vec::with_capacity(degree as usize + 1);
        coefficients.push(secret.clone());
        for _ in 0..degree {
            coefficients.push(FieldElement::random(rng));
        }
        Polynomial { coefficients }
    }

    /// Horner evaluation.
    fn evaluate(&self, x: &FieldElement) -> FieldElement {
        self.coefficients
            .iter()
            .rev()
            .fold(FieldElement::zero(), |acc, c| &(&acc * x) + c)
    }
}

fn check_threshold(threshold: u32, total: u32) -> Result<(), Error> {
    if threshold == 0 || threshold > total {
        return Err(Error::InvalidThreshold { threshold, total });
    }
    Ok(())
}

/// Split `secret` into shares at indices `1..=total`, any `threshold` of which reconstruct it.
pub fn split<R: RngCore + CryptoRng>(
    secret: &FieldElement,
    threshold: u32,
    total: u32,
    rng: &mut R,
) -> Result<Vec<Share>, Error> {
    let indices: Vec<u32> = (1..=total).collect();
    split_at(secret, threshold, &indices, rng)
}

/// Split `secret` into one share per given index.
///
/// Indices must be non-zero and distinct.
pub fn split_at<R: RngCore + CryptoRng>(
    secret: &FieldElement,
    threshold: u32,
    indices: &[u32],
    rng: &mut R,
) -> Result<Vec<Share>, Error> {
    check_threshold(threshold, indices.len() as u32)?;

    let mut seen = BTreeSet::new();
    for index in indices {
        if *index == 0 {
            return Err(Error::InvalidShareIndex);
        }
        if !seen.insert(*index) {
            return Err(Error::DuplicateAuthorityIndex(*index));
        }
    }

    let polynomial = Polynomial::random(secret, threshold - 1, rng);
    Ok(indices
        .iter()
        .map(|index| Share {
            index: *index,
            value: polynomial.evaluate(&FieldElement::from(*index)),
            threshold,
        })
        .collect())
}

/// Lagrange interpolation of the given points, evaluated at zero.
///
/// No validation: a repeated x-coordinate surfaces as `NonInvertibleElement`, and too few points
/// silently produce an unrelated value.
pub fn interpolate_at_zero(points: &[(u32, FieldElement)]) -> Result<FieldElement, Error> {
    let mut result = FieldElement::zero();
    for (j, (x_j, y_j)) in points.iter().enumerate() {
        let x_j = FieldElement::from(*x_j);
        let mut numerator = FieldElement::one();
        let mut denominator = FieldElement::one();
        for (m, (x_m, _)) in points.iter().enumerate() {
            if m == j {
                continue;
            }
            let x_m = FieldElement::from(*x_m);
            // L_j(0) = prod x_m / (x_m - x_j)
            numerator = &numerator * &x_m;
            denominator = &denominator * &(&x_m - &x_j);
        }
        let basis = &numerator * &denominator.inverse()?;
        result = &result + &(y_j * &basis);
    }
    Ok(result)
}

/// Reconstruct the secret from at least `threshold` shares of one dealing.
///
/// Identical shares count once. Two shares with the same index but different values fail with
/// `NonInvertibleElement`.
pub fn combine(shares: &[Share]) -> Result<FieldElement, Error> {
    let threshold = match shares.first() {
        Some(share) => share.threshold,
        None => return Err(Error::InsufficientQuorum { have: 0, need: 1 }),
    };
    if shares.iter().any(|s| s.threshold != threshold) {
        return Err(Error::MismatchedThreshold);
    }
    if shares.iter().any(|s| s.index == 0) {
        return Err(Error::InvalidShareIndex);
    }

    // Exact repeats collapse; two values at one index cannot lie on one polynomial
    let mut points: BTreeMap<u32, &FieldElement> = BTreeMap::new();
    for share in shares {
        match points.get(&share.index) {
            Some(value) if **value != share.value => return Err(Error::NonInvertibleElement),
            Some(_) => {}
            None => {
                points.insert(share.index, &share.value);
            }
        }
    }
    if points.len() < threshold as usize {
        return Err(Error::InsufficientQuorum {
            have: points.len(),
            need: threshold as usize,
        });
    }

    // Any `threshold` distinct points fix the polynomial
    let points: Vec<(u32, FieldElement)> = points
        .into_iter()
        .take(threshold as usize)
        .map(|(index, value)| (index, value.clone()))
        .collect();
    interpolate_at_zero(&points)
}

/// Deal a 32-byte secret into `num_shares` encoded shares.
pub fn deal_secret_shares(
    threshold: u32,
    num_shares: u32,
    secret: &[u8],
) -> Result<Vec<Vec<u8>>, Error> {
    let secret = FieldElement::from_bytes_be(secret)?;
    let shares = split(&secret, threshold, num_shares, &mut rand::rngs::OsRng)?;
    Ok(shares.iter().map(Share::to_bytes).collect())
}

/// Recover a 32-byte secret from encoded shares.
pub fn recover_secret_shares(threshold: u32, shares: Vec<Vec<u8>>) -> Result<Vec<u8>, Error> {
    let shares = shares
        .iter()
        .map(|bytes| Share::from_bytes(bytes, threshold))
        .collect::<Result<Vec<Share>, Error>>()?;
    if shares.is_empty() {
        return Err(Error::InsufficientQuorum {
            have: 0,
            need: threshold as usize,
        });
    }
    Ok(combine(&shares)?.to_bytes_be().to_vec())
}
