//! The bundle of proofs handed to the verification protocol.

use std::ops::Range;

use ark_ec::CurveGroup;
use ark_serialize::{CanonicalDeserialize, CanonicalSerialize};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::aggregation::AggregationProof;
use crate::deterministic_tag::{TagAdditionListProof, TagCreationListProof};
use crate::error::{ProtocolError, Result};
use crate::key_switch::KeySwitchListProof;
use crate::shuffle::PublishedShuffleProof;

const LOG_TARGET: &str = "unlynx::proofs";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProofKind {
    KeySwitching,
    DetTagCreation,
    DetTagAddition,
    Aggregation,
    Shuffling,
    /// Aggregation proofs emitted while folding up the tree.
    CollectiveAggregation,
}

impl ProofKind {
    /// The order verdicts appear in.
    pub const ORDER: [ProofKind; 6] = [
        ProofKind::KeySwitching,
        ProofKind::DetTagCreation,
        ProofKind::DetTagAddition,
        ProofKind::Aggregation,
        ProofKind::Shuffling,
        ProofKind::CollectiveAggregation,
    ];

    /// Position in [`ProofKind::ORDER`].
    pub fn index(self) -> usize {
        self as usize
    }
}

/// One ordered list per proof kind. The verdict vector follows the kinds in
/// [`ProofKind::ORDER`] and the caller's order inside each list.
#[derive(Clone, Debug, PartialEq, Eq, CanonicalSerialize, CanonicalDeserialize)]
pub struct ProofsToVerify<C: CurveGroup> {
    pub key_switching: Vec<KeySwitchListProof<C>>,
    pub det_tag_creation: Vec<TagCreationListProof<C>>,
    pub det_tag_addition: Vec<TagAdditionListProof<C>>,
    pub aggregation: Vec<AggregationProof<C>>,
    pub shuffling: Vec<PublishedShuffleProof<C>>,
    pub collective_aggregation: Vec<AggregationProof<C>>,
}

impl<C: CurveGroup> Default for ProofsToVerify<C> {
    fn default() -> Self {
        Self {
            key_switching: Vec::new(),
            det_tag_creation: Vec::new(),
            det_tag_addition: Vec::new(),
            aggregation: Vec::new(),
            shuffling: Vec::new(),
            collective_aggregation: Vec::new(),
        }
    }
}

/// A borrowed proof of any kind.
#[derive(Clone, Copy, Debug)]
pub enum ProofRef<'a, C: CurveGroup> {
    KeySwitching(&'a KeySwitchListProof<C>),
    DetTagCreation(&'a TagCreationListProof<C>),
    DetTagAddition(&'a TagAdditionListProof<C>),
    Aggregation(&'a AggregationProof<C>),
    Shuffling(&'a PublishedShuffleProof<C>),
    CollectiveAggregation(&'a AggregationProof<C>),
}

impl<'a, C: CurveGroup> ProofRef<'a, C> {
    pub fn kind(&self) -> ProofKind {
        match self {
            ProofRef::KeySwitching(_) => ProofKind::KeySwitching,
            ProofRef::DetTagCreation(_) => ProofKind::DetTagCreation,
            ProofRef::DetTagAddition(_) => ProofKind::DetTagAddition,
            ProofRef::Aggregation(_) => ProofKind::Aggregation,
            ProofRef::Shuffling(_) => ProofKind::Shuffling,
            ProofRef::CollectiveAggregation(_) => ProofKind::CollectiveAggregation,
        }
    }

    /// A list proof holds iff every entry does. Structural defects count as
    /// a rejection here; [`ProofsToVerify::validate`] reports them as errors.
    pub fn verify(&self) -> bool {
        match self {
            ProofRef::KeySwitching(proof) => match proof.verify_entries() {
                Ok(entries) => entries.into_iter().all(|ok| ok),
                Err(err) => {
                    tracing::warn!(target: LOG_TARGET, error = %err, "rejecting malformed key switch proof");
                    false
                }
            },
            ProofRef::DetTagCreation(proof) => proof.verify(),
            ProofRef::DetTagAddition(proof) => proof.verify(),
            ProofRef::Aggregation(proof) | ProofRef::CollectiveAggregation(proof) => {
                proof.verify()
            }
            ProofRef::Shuffling(proof) => match proof.verify() {
                Ok(valid) => valid,
                Err(err) => {
                    tracing::warn!(target: LOG_TARGET, error = %err, "rejecting malformed shuffle proof");
                    false
                }
            },
        }
    }
}

impl<C: CurveGroup> ProofsToVerify<C> {
    pub fn len_of(&self, kind: ProofKind) -> usize {
        match kind {
            ProofKind::KeySwitching => self.key_switching.len(),
            ProofKind::DetTagCreation => self.det_tag_creation.len(),
            ProofKind::DetTagAddition => self.det_tag_addition.len(),
            ProofKind::Aggregation => self.aggregation.len(),
            ProofKind::Shuffling => self.shuffling.len(),
            ProofKind::CollectiveAggregation => self.collective_aggregation.len(),
        }
    }

    pub fn len(&self) -> usize {
        ProofKind::ORDER.iter().map(|kind| self.len_of(*kind)).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, kind: ProofKind, index: usize) -> Option<ProofRef<'_, C>> {
        match kind {
            ProofKind::KeySwitching => self.key_switching.get(index).map(ProofRef::KeySwitching),
            ProofKind::DetTagCreation => {
                self.det_tag_creation.get(index).map(ProofRef::DetTagCreation)
            }
            ProofKind::DetTagAddition => {
                self.det_tag_addition.get(index).map(ProofRef::DetTagAddition)
            }
            ProofKind::Aggregation => self.aggregation.get(index).map(ProofRef::Aggregation),
            ProofKind::Shuffling => self.shuffling.get(index).map(ProofRef::Shuffling),
            ProofKind::CollectiveAggregation => self
                .collective_aggregation
                .get(index)
                .map(ProofRef::CollectiveAggregation),
        }
    }

    /// Structural checks only; no group arithmetic. Aggregation proofs have
    /// no shape to get wrong: any list of terms and a single claimed sum.
    pub fn validate(&self) -> Result<()> {
        for (index, proof) in self.key_switching.iter().enumerate() {
            proof.validate().map_err(|err| tagged(ProofKind::KeySwitching, index, err))?;
        }
        for (index, proof) in self.det_tag_creation.iter().enumerate() {
            proof.validate().map_err(|err| tagged(ProofKind::DetTagCreation, index, err))?;
        }
        for (index, proof) in self.det_tag_addition.iter().enumerate() {
            proof.validate().map_err(|err| tagged(ProofKind::DetTagAddition, index, err))?;
        }
        for (index, proof) in self.shuffling.iter().enumerate() {
            proof.validate().map_err(|err| tagged(ProofKind::Shuffling, index, err))?;
        }
        Ok(())
    }

    /// Verifies `range` of the `kind` list in parallel; verdicts keep the
    /// list order.
    pub fn verify_range(&self, kind: ProofKind, range: Range<usize>) -> Vec<bool> {
        range
            .into_par_iter()
            .map(|index| self.get(kind, index).is_some_and(|proof| proof.verify()))
            .collect()
    }

    /// Every verdict in kind order, on this node alone.
    pub fn verify_all(&self) -> Vec<bool> {
        ProofKind::ORDER
            .iter()
            .flat_map(|kind| self.verify_range(*kind, 0..self.len_of(*kind)))
            .collect()
    }
}

fn tagged(kind: ProofKind, index: usize, err: ProtocolError) -> ProtocolError {
    match err {
        ProtocolError::MalformedProof(reason) => {
            ProtocolError::MalformedProof(format!("{kind:?} proof {index}: {reason}"))
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::aggregation_proof_creation;
    use crate::ciphertext::{CipherVector, KeyPair};
    use crate::key_switch::{key_switch_step, seed_key_switch};
    use crate::test_utils::{seeded_rng, TestCurve};

    fn key_switch_proof(seed: u64) -> KeySwitchListProof<TestCurve> {
        let mut rng = seeded_rng(seed);
        let keys = KeyPair::<TestCurve>::generate(&mut rng);
        let target = KeyPair::<TestCurve>::generate(&mut rng);
        let vector = CipherVector::encrypt_ints(keys.public_key(), &[1, 2], &mut rng);
        let (ephemerals, seeds) = seed_key_switch(&vector);
        let (_, proof) =
            key_switch_step(&keys, target.public_key(), &ephemerals, &seeds, true, &mut rng)
                .unwrap();
        proof.unwrap()
    }

    #[test]
    fn empty_bundle_has_no_verdicts() {
        let bundle = ProofsToVerify::<TestCurve>::default();
        assert!(bundle.is_empty());
        assert!(bundle.validate().is_ok());
        assert!(bundle.verify_all().is_empty());
    }

    #[test]
    fn verdicts_follow_kind_then_list_order() {
        let mut rng = seeded_rng(11);
        let keys = KeyPair::<TestCurve>::generate(&mut rng);
        let terms = CipherVector::encrypt_ints(keys.public_key(), &[3, 4], &mut rng);
        let bundle = ProofsToVerify {
            key_switching: vec![key_switch_proof(12)],
            aggregation: vec![
                aggregation_proof_creation(&terms, terms[0]),
                aggregation_proof_creation(&terms, terms.sum()),
            ],
            collective_aggregation: vec![aggregation_proof_creation(&terms, terms.sum())],
            ..ProofsToVerify::default()
        };
        assert_eq!(bundle.len(), 4);
        assert_eq!(bundle.verify_all(), vec![true, false, true, true]);
        assert_eq!(bundle.verify_range(ProofKind::Aggregation, 1..2), vec![true]);
        assert_eq!(
            bundle.get(ProofKind::CollectiveAggregation, 0).map(|proof| proof.kind()),
            Some(ProofKind::CollectiveAggregation)
        );
        assert!(bundle.get(ProofKind::Shuffling, 0).is_none());
    }

    #[test]
    fn truncated_key_switch_proof_is_malformed() {
        let mut proof = key_switch_proof(13);
        proof.entries.pop();
        let bundle = ProofsToVerify {
            key_switching: vec![proof],
            ..ProofsToVerify::default()
        };
        assert!(matches!(bundle.validate(), Err(ProtocolError::MalformedProof(_))));
        assert_eq!(bundle.verify_all(), vec![false]);
    }

    #[test]
    fn tag_proofs_with_missing_parts_are_malformed() {
        use crate::deterministic_tag::TaggingNode;
        let mut rng = seeded_rng(15);
        let tagger = TaggingNode::generate(KeyPair::<TestCurve>::generate(&mut rng), &mut rng);
        let vector = CipherVector::encrypt_ints(tagger.public_key(), &[6, 7], &mut rng);
        let step = tagger.tag_step(&vector, true, &mut rng).unwrap();

        let mut creation = step.creation_proof.unwrap();
        creation.entries[0].proof.responses.pop();
        creation.entries[0].proof.commitments.clear();
        let bundle = ProofsToVerify {
            det_tag_creation: vec![creation],
            ..ProofsToVerify::default()
        };
        match bundle.validate() {
            Err(ProtocolError::MalformedProof(reason)) => {
                assert!(reason.starts_with("DetTagCreation proof 0"), "{reason}")
            }
            other => panic!("expected a malformed proof, got {other:?}"),
        }
        assert_eq!(bundle.verify_all(), vec![false]);

        let mut addition = step.addition_proof.unwrap();
        addition.entries[1].proof.responses.clear();
        let bundle = ProofsToVerify {
            det_tag_addition: vec![addition],
            ..ProofsToVerify::default()
        };
        assert!(matches!(bundle.validate(), Err(ProtocolError::MalformedProof(_))));
    }

    #[test]
    fn bundle_has_a_canonical_encoding() {
        let bundle = ProofsToVerify {
            key_switching: vec![key_switch_proof(14)],
            ..ProofsToVerify::default()
        };
        crate::test_utils::serde::assert_canonical_round_trip(&bundle);
    }
}
