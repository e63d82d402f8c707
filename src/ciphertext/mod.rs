//! Additively homomorphic ElGamal over a prime-order curve group.
//!
//! A ciphertext of the integer `m` under public key `pk` is
//! `(K, C) = (r·G, m·G + r·pk)`. Adding ciphertexts component-wise adds the
//! plaintexts, which is what every protocol in this crate builds on.

mod dlog;

pub use dlog::DiscreteLogTable;

use std::fmt;
use std::ops::{Add, AddAssign, Deref, Neg, Sub};

use ark_ec::CurveGroup;
use ark_ff::{PrimeField, UniformRand, Zero};
use ark_serialize::{CanonicalDeserialize, CanonicalSerialize};
use ark_std::rand::Rng;
use serde::{Deserialize, Serialize};
use zeroize::Zeroize;

use crate::error::{ProtocolError, Result};

const LOG_TARGET: &str = "unlynx::ciphertext";

/// Maps a signed integer onto the scalar field (negatives wrap around the group order).
pub fn int_to_scalar<F: PrimeField>(value: i64) -> F {
    if value >= 0 {
        F::from(value as u64)
    } else {
        -F::from(value.unsigned_abs())
    }
}

/// `value·G` for the group generator.
pub fn int_to_point<C: CurveGroup>(value: i64) -> C {
    C::generator() * int_to_scalar::<C::ScalarField>(value)
}

#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    CanonicalSerialize,
    CanonicalDeserialize,
)]
#[serde(bound(
    serialize = "C: CanonicalSerialize",
    deserialize = "C: CanonicalDeserialize"
))]
pub struct CipherText<C: CurveGroup> {
    /// Ephemeral point `r·G`.
    #[serde(with = "crate::crypto_serde::curve")]
    pub k: C,
    /// Masked point `m·G + r·pk`.
    #[serde(with = "crate::crypto_serde::curve")]
    pub c: C,
}

impl<C: CurveGroup> CipherText<C> {
    pub fn new(k: C, c: C) -> Self {
        Self { k, c }
    }

    /// The identity pair, a randomness-free encryption of zero under any key.
    pub fn zero() -> Self {
        Self::new(C::zero(), C::zero())
    }

    pub fn is_zero(&self) -> bool {
        self.k.is_zero() && self.c.is_zero()
    }

    /// Encrypt a message point with explicit randomness.
    pub fn encrypt_point_with_randomness(
        public_key: C,
        message: C,
        randomness: C::ScalarField,
    ) -> Self {
        Self::new(C::zero(), message).re_encrypt(C::generator(), public_key, randomness)
    }

    /// Encrypt a message point with fresh randomness.
    pub fn encrypt_point<R: Rng>(public_key: C, message: C, rng: &mut R) -> Self {
        let randomness = C::ScalarField::rand(rng);
        Self::encrypt_point_with_randomness(public_key, message, randomness)
    }

    /// Encrypt an integer as `m·G` with fresh randomness.
    pub fn encrypt_int<R: Rng>(public_key: C, value: i64, rng: &mut R) -> Self {
        Self::encrypt_point(public_key, int_to_point::<C>(value), rng)
    }

    /// Adds `beta·g` to the ephemeral part and `beta·public_key` to the masked part.
    pub fn re_encrypt(&self, g: C, public_key: C, beta: C::ScalarField) -> Self {
        Self {
            k: self.k + g * beta,
            c: self.c + public_key * beta,
        }
    }

    /// Multiplies both components by `scalar`.
    pub fn scale(&self, scalar: C::ScalarField) -> Self {
        Self::new(self.k * scalar, self.c * scalar)
    }

    /// `C - sk·K`, i.e. the message point.
    pub fn decrypt_point(&self, secret: &C::ScalarField) -> C {
        self.c - self.k * *secret
    }

    /// Decrypts and maps the message point back to an integer through `table`.
    pub fn decrypt_int(
        &self,
        secret: &C::ScalarField,
        table: &DiscreteLogTable<C>,
    ) -> Result<i64> {
        table.lookup(&self.decrypt_point(secret))
    }
}

impl<C: CurveGroup> Add for CipherText<C> {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self::new(self.k + rhs.k, self.c + rhs.c)
    }
}

impl<C: CurveGroup> AddAssign for CipherText<C> {
    fn add_assign(&mut self, rhs: Self) {
        self.k += rhs.k;
        self.c += rhs.c;
    }
}

impl<C: CurveGroup> Sub for CipherText<C> {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self::new(self.k - rhs.k, self.c - rhs.c)
    }
}

impl<C: CurveGroup> Neg for CipherText<C> {
    type Output = Self;

    fn neg(self) -> Self {
        Self::new(-self.k, -self.c)
    }
}

impl<C: CurveGroup> std::iter::Sum for CipherText<C> {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::zero(), |acc, next| acc + next)
    }
}

/// Ordered ciphertext sequence; position `i` of one vector is aligned with
/// position `i` of every other vector it is combined with.
#[derive(
    Clone,
    Debug,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    CanonicalSerialize,
    CanonicalDeserialize,
)]
#[serde(bound(
    serialize = "C: CanonicalSerialize",
    deserialize = "C: CanonicalDeserialize"
))]
#[serde(transparent)]
pub struct CipherVector<C: CurveGroup>(Vec<CipherText<C>>);

impl<C: CurveGroup> CipherVector<C> {
    pub fn new(ciphertexts: Vec<CipherText<C>>) -> Self {
        Self(ciphertexts)
    }

    /// `len` identity ciphertexts.
    pub fn zeros(len: usize) -> Self {
        Self(vec![CipherText::zero(); len])
    }

    #[tracing::instrument(target = LOG_TARGET, skip_all, fields(len = values.len()))]
    pub fn encrypt_ints<R: Rng>(public_key: C, values: &[i64], rng: &mut R) -> Self {
        values
            .iter()
            .map(|value| CipherText::encrypt_int(public_key, *value, rng))
            .collect()
    }

    pub fn into_inner(self) -> Vec<CipherText<C>> {
        self.0
    }

    /// Pointwise homomorphic addition.
    pub fn try_add(&self, other: &Self) -> Result<Self> {
        if self.len() != other.len() {
            return Err(ProtocolError::length_mismatch(self.len(), other.len()));
        }
        Ok(self
            .iter()
            .zip(other.iter())
            .map(|(a, b)| *a + *b)
            .collect())
    }

    /// Homomorphic sum of every component; the identity pair when empty.
    pub fn sum(&self) -> CipherText<C> {
        self.iter().copied().sum()
    }

    /// Re-randomizes every component with the same `beta`.
    pub fn re_encrypt(&self, g: C, public_key: C, beta: C::ScalarField) -> Self {
        self.iter()
            .map(|ct| ct.re_encrypt(g, public_key, beta))
            .collect()
    }

    pub fn decrypt_ints(
        &self,
        secret: &C::ScalarField,
        table: &DiscreteLogTable<C>,
    ) -> Result<Vec<i64>> {
        self.iter().map(|ct| ct.decrypt_int(secret, table)).collect()
    }

    pub fn ephemeral_points(&self) -> Vec<C> {
        self.iter().map(|ct| ct.k).collect()
    }

    /// Copies `[start, start + len)` into a new vector.
    pub fn slice(&self, start: usize, len: usize) -> Result<Self> {
        let end = start
            .checked_add(len)
            .filter(|end| *end <= self.len())
            .ok_or_else(|| ProtocolError::length_mismatch(start.saturating_add(len), self.len()))?;
        Ok(Self(self.0[start..end].to_vec()))
    }
}

impl<C: CurveGroup> Deref for CipherVector<C> {
    type Target = [CipherText<C>];

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl<C: CurveGroup> From<Vec<CipherText<C>>> for CipherVector<C> {
    fn from(value: Vec<CipherText<C>>) -> Self {
        Self(value)
    }
}

impl<C: CurveGroup> FromIterator<CipherText<C>> for CipherVector<C> {
    fn from_iter<I: IntoIterator<Item = CipherText<C>>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl<C: CurveGroup> IntoIterator for CipherVector<C> {
    type Item = CipherText<C>;
    type IntoIter = std::vec::IntoIter<CipherText<C>>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a, C: CurveGroup> IntoIterator for &'a CipherVector<C> {
    type Item = &'a CipherText<C>;
    type IntoIter = std::slice::Iter<'a, CipherText<C>>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl<C: CurveGroup> Extend<CipherText<C>> for CipherVector<C> {
    fn extend<I: IntoIterator<Item = CipherText<C>>>(&mut self, iter: I) {
        self.0.extend(iter)
    }
}

/// A node's ElGamal key pair. The secret never leaves this struct except
/// through crate-internal protocol steps and is wiped on drop.
#[derive(Clone)]
pub struct KeyPair<C: CurveGroup> {
    secret: C::ScalarField,
    public: C,
}

impl<C: CurveGroup> KeyPair<C> {
    pub fn from_secret(secret: C::ScalarField) -> Self {
        let public = C::generator() * secret;
        Self { secret, public }
    }

    pub fn generate<R: Rng>(rng: &mut R) -> Self {
        Self::from_secret(C::ScalarField::rand(rng))
    }

    pub fn public_key(&self) -> C {
        self.public
    }

    pub(crate) fn secret(&self) -> &C::ScalarField {
        &self.secret
    }

    pub fn decrypt_point(&self, ciphertext: &CipherText<C>) -> C {
        ciphertext.decrypt_point(&self.secret)
    }

    pub fn decrypt_int(
        &self,
        ciphertext: &CipherText<C>,
        table: &DiscreteLogTable<C>,
    ) -> Result<i64> {
        ciphertext.decrypt_int(&self.secret, table)
    }

    pub fn decrypt_ints(
        &self,
        vector: &CipherVector<C>,
        table: &DiscreteLogTable<C>,
    ) -> Result<Vec<i64>> {
        vector.decrypt_ints(&self.secret, table)
    }
}

impl<C: CurveGroup> Drop for KeyPair<C> {
    fn drop(&mut self) {
        self.secret.zeroize();
    }
}

impl<C: CurveGroup> fmt::Debug for KeyPair<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &self.public)
            .finish_non_exhaustive()
    }
}

/// Sum of public keys, the collective key of a roster.
pub fn aggregate_public_keys<C: CurveGroup>(public_keys: impl IntoIterator<Item = C>) -> C {
    public_keys.into_iter().fold(C::zero(), |acc, pk| acc + pk)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::serde::assert_round_trip_eq;
    use ark_bn254::G1Projective;
    use ark_ec::PrimeGroup;
    use ark_std::test_rng;

    type Curve = G1Projective;

    fn table() -> DiscreteLogTable<Curve> {
        DiscreteLogTable::new(200).unwrap()
    }

    #[test]
    fn encrypt_then_decrypt_recovers_integer() {
        let mut rng = test_rng();
        let keys = KeyPair::<Curve>::generate(&mut rng);
        let table = table();
        for value in [0i64, 1, 17, -5, 200, -200] {
            let ct = CipherText::encrypt_int(keys.public_key(), value, &mut rng);
            assert_eq!(keys.decrypt_int(&ct, &table).unwrap(), value);
        }
    }

    #[test]
    fn addition_is_homomorphic() {
        let mut rng = test_rng();
        let keys = KeyPair::<Curve>::generate(&mut rng);
        let table = table();
        let a = CipherText::encrypt_int(keys.public_key(), 12, &mut rng);
        let b = CipherText::encrypt_int(keys.public_key(), -30, &mut rng);
        assert_eq!(keys.decrypt_int(&(a + b), &table).unwrap(), -18);
        assert_eq!(
            keys.decrypt_point(&(a + b)),
            keys.decrypt_point(&a) + keys.decrypt_point(&b)
        );
    }

    #[test]
    fn vector_sum_matches_plaintext_sum() {
        let mut rng = test_rng();
        let keys = KeyPair::<Curve>::generate(&mut rng);
        let values = [3i64, 9, 0, 14, -2, 40];
        let vector = CipherVector::encrypt_ints(keys.public_key(), &values, &mut rng);
        let total = keys.decrypt_int(&vector.sum(), &table()).unwrap();
        assert_eq!(total, values.iter().sum::<i64>());
    }

    #[test]
    fn empty_vector_sums_to_identity() {
        let empty = CipherVector::<Curve>::default();
        assert!(empty.sum().is_zero());
    }

    #[test]
    fn vector_addition_requires_equal_lengths() {
        let mut rng = test_rng();
        let keys = KeyPair::<Curve>::generate(&mut rng);
        let a = CipherVector::encrypt_ints(keys.public_key(), &[1, 2, 3], &mut rng);
        let b = CipherVector::encrypt_ints(keys.public_key(), &[1, 2], &mut rng);
        assert_eq!(
            a.try_add(&b),
            Err(ProtocolError::LengthMismatch {
                expected: 3,
                actual: 2
            })
        );

        let c = CipherVector::encrypt_ints(keys.public_key(), &[10, 20, 30], &mut rng);
        let sum = a.try_add(&c).unwrap();
        assert_eq!(keys.decrypt_ints(&sum, &table()).unwrap(), vec![11, 22, 33]);
    }

    #[test]
    fn out_of_range_plaintext_is_not_found() {
        let mut rng = test_rng();
        let keys = KeyPair::<Curve>::generate(&mut rng);
        let ct = CipherText::encrypt_int(keys.public_key(), 201, &mut rng);
        assert_eq!(keys.decrypt_int(&ct, &table()), Err(ProtocolError::NotFound));
    }

    #[test]
    fn re_encryption_keeps_plaintext_and_changes_ciphertext() {
        let mut rng = test_rng();
        let keys = KeyPair::<Curve>::generate(&mut rng);
        let ct = CipherText::encrypt_int(keys.public_key(), 7, &mut rng);
        let beta = <Curve as PrimeGroup>::ScalarField::rand(&mut rng);
        let fresh = ct.re_encrypt(Curve::generator(), keys.public_key(), beta);
        assert_ne!(fresh, ct);
        assert_eq!(keys.decrypt_int(&fresh, &table()).unwrap(), 7);
    }

    #[test]
    fn independent_encryptions_differ() {
        let mut rng = test_rng();
        let keys = KeyPair::<Curve>::generate(&mut rng);
        let a = CipherText::encrypt_int(keys.public_key(), 5, &mut rng);
        let b = CipherText::encrypt_int(keys.public_key(), 5, &mut rng);
        assert_ne!(a, b);
    }

    #[test]
    fn slice_rejects_out_of_bounds_ranges() {
        let vector = CipherVector::<Curve>::zeros(4);
        assert_eq!(vector.slice(1, 3).unwrap().len(), 3);
        assert!(vector.slice(2, 3).is_err());
    }

    #[test]
    fn algebra_is_generic_over_the_curve() {
        type Grumpkin = ark_grumpkin::Projective;
        let mut rng = test_rng();
        let keys = KeyPair::<Grumpkin>::generate(&mut rng);
        let table = DiscreteLogTable::<Grumpkin>::new(50).unwrap();
        let vector = CipherVector::encrypt_ints(keys.public_key(), &[4, 5, 6], &mut rng);
        assert_eq!(keys.decrypt_int(&vector.sum(), &table).unwrap(), 15);
    }

    #[test]
    fn ciphertext_round_trips_with_serde() {
        let mut rng = test_rng();
        let keys = KeyPair::<Curve>::generate(&mut rng);
        let vector = CipherVector::encrypt_ints(keys.public_key(), &[1, 2], &mut rng);
        assert_round_trip_eq(&vector[0]);
        assert_round_trip_eq(&vector);
    }

    #[test]
    fn key_pair_debug_hides_the_secret() {
        let keys = KeyPair::<Curve>::from_secret(ark_bn254::Fr::from(99u64));
        let rendered = format!("{keys:?}");
        assert!(rendered.contains("public"));
        assert!(!rendered.contains("secret"));
    }
}
