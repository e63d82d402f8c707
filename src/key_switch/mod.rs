//! Collective key switching.
//!
//! A vector encrypted under the collective key `A = Σ k_i·G` is moved to a
//! target key `U` without decrypting it. The switch starts from
//! `(0, C)` for every input `(K, C)`; each node `i` then adds
//!
//! ```text
//! (v_i·G, −k_i·K + v_i·U)
//! ```
//!
//! with fresh `v_i`. Once every share is removed the result is
//! `(Σv_i·G, m·G + Σv_i·U)`, a fresh encryption of `m` under `U`.

use ark_ec::CurveGroup;
use ark_ff::UniformRand;
use ark_serialize::{CanonicalDeserialize, CanonicalSerialize};
use ark_std::rand::Rng;
use zeroize::Zeroize;

use crate::chaum_pedersen::{ChaumPedersenProof, LinearStatement};
use crate::ciphertext::{CipherText, CipherVector, KeyPair};
use crate::error::{ProtocolError, Result};

const LOG_TARGET: &str = "unlynx::key_switch";

const KEY_SWITCH_DOMAIN: &str = "unlynx/key_switch/v1";

/// Splits `vector` into its ephemeral points and the `(0, C)` seeds the
/// contributions are accumulated onto.
pub fn seed_key_switch<C: CurveGroup>(vector: &CipherVector<C>) -> (Vec<C>, CipherVector<C>) {
    let seeds = vector
        .iter()
        .map(|ct| CipherText::new(C::zero(), ct.c))
        .collect();
    (vector.ephemeral_points(), seeds)
}

/// One node's contribution for every ephemeral point, with the fresh
/// randomness used for each.
pub fn key_switch_sequence<C: CurveGroup, R: Rng>(
    target_key: C,
    ephemerals: &[C],
    secret: &C::ScalarField,
    rng: &mut R,
) -> (CipherVector<C>, Vec<C::ScalarField>) {
    let g = C::generator();
    ephemerals
        .iter()
        .map(|ephemeral| {
            let v = C::ScalarField::rand(rng);
            (CipherText::new(g * v, target_key * v - *ephemeral * *secret), v)
        })
        .unzip()
}

#[derive(Clone, Debug, PartialEq, Eq, CanonicalSerialize, CanonicalDeserialize)]
pub struct KeySwitchEntry<C: CurveGroup> {
    /// `(v·G, −k·K + v·U)`.
    pub contribution: CipherText<C>,
    pub proof: ChaumPedersenProof<C>,
}

/// Witnesses are `[k, v]`.
fn entry_statement<C: CurveGroup>(
    public_key: C,
    target_key: C,
    ephemeral: C,
    contribution: &CipherText<C>,
) -> LinearStatement<C> {
    let g = C::generator();
    LinearStatement::new(2)
        .equation(vec![(0, g)], public_key)
        .equation(vec![(1, g)], contribution.k)
        .equation(vec![(0, -ephemeral), (1, target_key)], contribution.c)
}

/// One node's proof for a whole key-switched vector. Entry `i` refers to
/// `ephemerals[i]`.
#[derive(Clone, Debug, PartialEq, Eq, CanonicalSerialize, CanonicalDeserialize)]
pub struct KeySwitchListProof<C: CurveGroup> {
    pub public_key: C,
    pub target_key: C,
    pub ephemerals: Vec<C>,
    pub entries: Vec<KeySwitchEntry<C>>,
}

impl<C: CurveGroup> KeySwitchListProof<C> {
    pub fn validate(&self) -> Result<()> {
        if self.ephemerals.len() != self.entries.len() {
            return Err(ProtocolError::MalformedProof(format!(
                "key switch proof has {} ephemeral points but {} entries",
                self.ephemerals.len(),
                self.entries.len()
            )));
        }
        for (index, (ephemeral, entry)) in self.ephemerals.iter().zip(&self.entries).enumerate() {
            entry_statement(self.public_key, self.target_key, *ephemeral, &entry.contribution)
                .check_shape(&entry.proof)
                .map_err(|err| match err {
                    ProtocolError::MalformedProof(reason) => {
                        ProtocolError::MalformedProof(format!("entry {index}: {reason}"))
                    }
                    other => other,
                })?;
        }
        Ok(())
    }

    /// Verifies every entry on its own.
    pub fn verify_entries(&self) -> Result<Vec<bool>> {
        self.validate()?;
        Ok(self
            .ephemerals
            .iter()
            .zip(&self.entries)
            .map(|(ephemeral, entry)| {
                let statement =
                    entry_statement(self.public_key, self.target_key, *ephemeral, &entry.contribution);
                entry.proof.verify(KEY_SWITCH_DOMAIN, &statement)
            })
            .collect())
    }

    pub fn verify(&self) -> Result<bool> {
        Ok(self.verify_entries()?.into_iter().all(|ok| ok))
    }

    pub fn contributions(&self) -> CipherVector<C> {
        self.entries.iter().map(|entry| entry.contribution).collect()
    }
}

#[tracing::instrument(target = LOG_TARGET, skip_all, fields(len = ephemerals.len()))]
pub fn key_switch_list_proof_creation<C: CurveGroup, R: Rng>(
    public_key: C,
    target_key: C,
    secret: &C::ScalarField,
    ephemerals: &[C],
    contributions: &CipherVector<C>,
    randomness: &[C::ScalarField],
    rng: &mut R,
) -> Result<KeySwitchListProof<C>> {
    if contributions.len() != ephemerals.len() {
        return Err(ProtocolError::length_mismatch(ephemerals.len(), contributions.len()));
    }
    if randomness.len() != ephemerals.len() {
        return Err(ProtocolError::length_mismatch(ephemerals.len(), randomness.len()));
    }
    let entries = ephemerals
        .iter()
        .zip(contributions.iter())
        .zip(randomness)
        .map(|((ephemeral, contribution), v)| {
            let statement = entry_statement(public_key, target_key, *ephemeral, contribution);
            let proof =
                ChaumPedersenProof::prove(KEY_SWITCH_DOMAIN, &statement, &[*secret, *v], rng)?;
            Ok(KeySwitchEntry {
                contribution: *contribution,
                proof,
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(KeySwitchListProof {
        public_key,
        target_key,
        ephemerals: ephemerals.to_vec(),
        entries,
    })
}

/// Applies `key_pair`'s contribution to `accumulator`.
#[tracing::instrument(target = LOG_TARGET, skip_all, fields(len = ephemerals.len(), proofs))]
pub fn key_switch_step<C: CurveGroup, R: Rng>(
    key_pair: &KeyPair<C>,
    target_key: C,
    ephemerals: &[C],
    accumulator: &CipherVector<C>,
    proofs: bool,
    rng: &mut R,
) -> Result<(CipherVector<C>, Option<KeySwitchListProof<C>>)> {
    let (contributions, mut randomness) =
        key_switch_sequence(target_key, ephemerals, key_pair.secret(), rng);
    let switched = accumulator.try_add(&contributions)?;
    let proof = if proofs {
        Some(key_switch_list_proof_creation(
            key_pair.public_key(),
            target_key,
            key_pair.secret(),
            ephemerals,
            &contributions,
            &randomness,
            rng,
        )?)
    } else {
        None
    };
    randomness.zeroize();
    tracing::debug!(target: LOG_TARGET, "applied key switch contribution");
    Ok((switched, proof))
}

/// Switches `vector` from the key of `key_pair` alone to `target_key`.
pub fn key_switch<C: CurveGroup, R: Rng>(
    key_pair: &KeyPair<C>,
    target_key: C,
    vector: &CipherVector<C>,
    rng: &mut R,
) -> Result<CipherVector<C>> {
    let (ephemerals, seeds) = seed_key_switch(vector);
    let (switched, _) = key_switch_step(key_pair, target_key, &ephemerals, &seeds, false, rng)?;
    Ok(switched)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ciphertext::{aggregate_public_keys, DiscreteLogTable};
    use crate::test_utils::serde::assert_canonical_round_trip;
    use ark_bn254::G1Projective;
    use ark_ec::PrimeGroup;
    use ark_std::test_rng;

    type Curve = G1Projective;

    #[test]
    fn round_trip_between_two_keys() {
        let mut rng = test_rng();
        let table = DiscreteLogTable::<Curve>::new(100).unwrap();
        let a = KeyPair::<Curve>::generate(&mut rng);
        let b = KeyPair::<Curve>::generate(&mut rng);
        let values = [7i64, -3, 0, 42];
        let original = CipherVector::encrypt_ints(a.public_key(), &values, &mut rng);

        let under_b = key_switch(&a, b.public_key(), &original, &mut rng).unwrap();
        assert_eq!(b.decrypt_ints(&under_b, &table).unwrap(), values);

        let back = key_switch(&b, a.public_key(), &under_b, &mut rng).unwrap();
        assert_eq!(a.decrypt_ints(&back, &table).unwrap(), values);
    }

    #[test]
    fn collective_switch_with_proofs() {
        let mut rng = test_rng();
        let table = DiscreteLogTable::<Curve>::new(100).unwrap();
        let nodes: Vec<_> = (0..3).map(|_| KeyPair::<Curve>::generate(&mut rng)).collect();
        let collective = aggregate_public_keys(nodes.iter().map(KeyPair::public_key));
        let client = KeyPair::<Curve>::generate(&mut rng);

        let values = [11i64, 12];
        let vector = CipherVector::encrypt_ints(collective, &values, &mut rng);
        let (ephemerals, mut accumulator) = seed_key_switch(&vector);
        for node in &nodes {
            let (next, proof) = key_switch_step(
                node,
                client.public_key(),
                &ephemerals,
                &accumulator,
                true,
                &mut rng,
            )
            .unwrap();
            let proof = proof.unwrap();
            assert_eq!(proof.verify_entries().unwrap(), vec![true, true]);
            accumulator = next;
        }
        assert_eq!(client.decrypt_ints(&accumulator, &table).unwrap(), values);
    }

    #[test]
    fn one_bad_entry_does_not_hide_the_others() {
        let mut rng = test_rng();
        let node = KeyPair::<Curve>::generate(&mut rng);
        let target = KeyPair::<Curve>::generate(&mut rng).public_key();
        let vector = CipherVector::encrypt_ints(node.public_key(), &[1, 2, 3], &mut rng);
        let (ephemerals, seeds) = seed_key_switch(&vector);
        let (_, proof) =
            key_switch_step(&node, target, &ephemerals, &seeds, true, &mut rng).unwrap();
        let mut proof = proof.unwrap();
        proof.entries[1].contribution.c += Curve::generator();
        assert_eq!(proof.verify_entries().unwrap(), vec![true, false, true]);
        assert!(!proof.verify().unwrap());
        assert_canonical_round_trip(&proof);
    }

    #[test]
    fn entry_count_mismatch_is_malformed() {
        let mut rng = test_rng();
        let node = KeyPair::<Curve>::generate(&mut rng);
        let vector = CipherVector::encrypt_ints(node.public_key(), &[1, 2], &mut rng);
        let (ephemerals, seeds) = seed_key_switch(&vector);
        let (_, proof) =
            key_switch_step(&node, node.public_key(), &ephemerals, &seeds, true, &mut rng)
                .unwrap();
        let mut proof = proof.unwrap();
        let mut short_response = proof.clone();
        short_response.entries[0].proof.responses.pop();
        assert!(matches!(
            short_response.validate(),
            Err(ProtocolError::MalformedProof(_))
        ));
        proof.entries.pop();
        assert!(matches!(
            proof.verify_entries(),
            Err(ProtocolError::MalformedProof(_))
        ));
    }

    #[test]
    fn mismatched_accumulator_is_rejected() {
        let mut rng = test_rng();
        let node = KeyPair::<Curve>::generate(&mut rng);
        let vector = CipherVector::encrypt_ints(node.public_key(), &[1, 2], &mut rng);
        let (ephemerals, _) = seed_key_switch(&vector);
        let short = CipherVector::zeros(1);
        assert!(matches!(
            key_switch_step(&node, node.public_key(), &ephemerals, &short, false, &mut rng),
            Err(ProtocolError::LengthMismatch { .. })
        ));
    }
}
