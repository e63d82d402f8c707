//! Shared fixtures for unit tests.

use ark_bn254::G1Projective;
use ark_std::rand::{rngs::StdRng, SeedableRng};

use crate::ciphertext::{CipherVector, DiscreteLogTable, KeyPair};
use crate::overlay::LocalTree;
use crate::records::ClientRecord;

pub type TestCurve = G1Projective;

pub fn seeded_rng(seed: u64) -> StdRng {
    StdRng::seed_from_u64(seed)
}

pub fn small_table() -> DiscreteLogTable<TestCurve> {
    DiscreteLogTable::new(1_000).expect("table construction")
}

/// A tree of `nodes` freshly keyed nodes laid out as a line rooted at node 0.
pub fn keyed_line(nodes: usize, rng: &mut StdRng) -> LocalTree<TestCurve> {
    LocalTree::line((0..nodes).map(|_| KeyPair::generate(rng)).collect())
}

pub fn keyed_star(nodes: usize, rng: &mut StdRng) -> LocalTree<TestCurve> {
    LocalTree::star((0..nodes).map(|_| KeyPair::generate(rng)).collect())
}

/// Encrypts `grouping`, `where_attrs` and `aggregating` under `public_key`.
pub fn encrypted_record(
    public_key: TestCurve,
    grouping: &[i64],
    where_attrs: &[i64],
    aggregating: &[i64],
    rng: &mut StdRng,
) -> ClientRecord<TestCurve> {
    ClientRecord {
        grouping: CipherVector::encrypt_ints(public_key, grouping, rng),
        non_deterministic: CipherVector::encrypt_ints(public_key, where_attrs, rng),
        aggregating: CipherVector::encrypt_ints(public_key, aggregating, rng),
    }
}

/// Helpers shared across test modules.
pub mod serde {
    use std::fmt::Debug;

    /// Assert that a value survives a serde_json round-trip using structural equality.
    pub fn assert_round_trip_eq<T>(value: &T)
    where
        T: ::serde::Serialize + ::serde::de::DeserializeOwned + PartialEq + Debug,
    {
        let json = serde_json::to_string(value)
            .expect("serialization should succeed during round-trip testing");
        let restored: T = serde_json::from_str(&json)
            .expect("deserialization should succeed during round-trip testing");
        assert_eq!(restored, *value, "serde_json round-trip altered the value");
    }

    /// Assert that a canonical binary round-trip restores the value.
    pub fn assert_canonical_round_trip<T>(value: &T)
    where
        T: ark_serialize::CanonicalSerialize
            + ark_serialize::CanonicalDeserialize
            + PartialEq
            + Debug,
    {
        let bytes = crate::crypto_serde::to_canonical_bytes(value)
            .expect("canonical serialization should succeed");
        let restored: T = crate::crypto_serde::from_canonical_bytes(&bytes)
            .expect("canonical deserialization should succeed");
        assert_eq!(restored, *value, "canonical round-trip altered the value");
    }
}
