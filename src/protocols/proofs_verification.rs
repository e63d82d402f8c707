use std::ops::Range;
use std::time::Duration;

use ark_ec::CurveGroup;
use serde::{Deserialize, Serialize};

use super::{Armed, ProtocolContext};
use crate::error::{ProtocolError, Result};
use crate::overlay::TreePosition;
use crate::proofs::{ProofKind, ProofsToVerify};
use crate::protocol::{feedback_channel, spawn_tree_round, Feedback, ProtocolState};

const LOG_TARGET: &str = "unlynx::protocols::proofs_verification";

/// Verdicts for `results.len()` consecutive proofs of `kind`, starting at
/// `offset` in that list.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartialResult {
    pub kind: ProofKind,
    pub offset: usize,
    pub results: Vec<bool>,
}

/// Verifies a [`ProofsToVerify`] bundle across the tree and delivers one
/// verdict per proof in kind order.
pub struct ProofsVerificationProtocol<C: CurveGroup> {
    context: ProtocolContext<C>,
    slot: Armed<ProofsToVerify<C>>,
}

impl<C: CurveGroup> ProofsVerificationProtocol<C> {
    pub const NAME: &'static str = "proofs_verification";

    pub fn new(context: ProtocolContext<C>) -> Self {
        Self {
            context,
            slot: Armed::new(Self::NAME),
        }
    }

    pub fn state(&self) -> ProtocolState {
        self.slot.lifecycle.state()
    }

    /// A structurally broken bundle is refused and the instance stays idle.
    pub fn arm(&self, bundle: ProofsToVerify<C>) -> Result<()> {
        bundle.validate()?;
        self.slot.arm(bundle)
    }

    pub fn start(&self) -> Result<Feedback<Vec<bool>>> {
        let bundle = self.slot.take()?;
        let shape = self.context.tree().shape();
        let order = self.context.tree().traversal_order();
        tracing::info!(
            target: LOG_TARGET,
            proofs = bundle.len(),
            nodes = order.len(),
            "starting proofs verification"
        );

        let lengths = ProofKind::ORDER.map(|kind| bundle.len_of(kind));
        let locals = partition(&lengths, &order, shape.node_count())
            .into_iter()
            .enumerate()
            .map(|(node, assignment)| {
                let position = self.context.tree().position(node);
                move |bundle: &ProofsToVerify<C>| -> Result<Vec<PartialResult>> {
                    let partials: Vec<PartialResult> = assignment
                        .into_iter()
                        .map(|(kind, range)| PartialResult {
                            kind,
                            offset: range.start,
                            results: bundle.verify_range(kind, range),
                        })
                        .collect();
                    tracing::debug!(
                        target: LOG_TARGET,
                        node = position.index(),
                        root = position.is_root(),
                        verified = partials.iter().map(|p| p.results.len()).sum::<usize>(),
                        "verified assigned proofs"
                    );
                    Ok(partials)
                }
            })
            .collect();
        let (sender, feedback) = feedback_channel(&self.slot.lifecycle);
        spawn_tree_round(
            Self::NAME,
            &shape,
            bundle,
            locals,
            |_, mut own: Vec<PartialResult>, children: Vec<Vec<PartialResult>>| {
                own.extend(children.into_iter().flatten());
                Ok(own)
            },
            move |partials| assemble(&lengths, partials),
            sender,
        );
        Ok(feedback)
    }

    /// Arms, starts and waits for the verdicts.
    pub async fn run(
        context: ProtocolContext<C>,
        bundle: ProofsToVerify<C>,
        timeout: Duration,
    ) -> Result<Vec<bool>> {
        let protocol = Self::new(context);
        protocol.arm(bundle)?;
        protocol.start()?.recv_timeout(timeout).await
    }
}

/// Splits every list into contiguous chunks, one per node in traversal
/// order. Nodes later in the order may receive nothing for short lists.
fn partition(
    lengths: &[usize; 6],
    order: &[usize],
    node_count: usize,
) -> Vec<Vec<(ProofKind, Range<usize>)>> {
    let mut assignment = vec![Vec::new(); node_count];
    let parts = order.len();
    for kind in ProofKind::ORDER {
        let len = lengths[kind.index()];
        for (position, node) in order.iter().enumerate() {
            let range = position * len / parts..(position + 1) * len / parts;
            if !range.is_empty() {
                assignment[*node].push((kind, range));
            }
        }
    }
    assignment
}

/// Places every partial verdict in its slot; a slot left empty or written
/// out of range fails the whole run.
fn assemble(lengths: &[usize; 6], partials: Vec<PartialResult>) -> Result<Vec<bool>> {
    let mut slots: Vec<Vec<Option<bool>>> = lengths.iter().map(|len| vec![None; *len]).collect();
    for partial in partials {
        let list = &mut slots[partial.kind.index()];
        for (step, verdict) in partial.results.into_iter().enumerate() {
            match list.get_mut(partial.offset + step) {
                Some(slot) => *slot = Some(verdict),
                None => {
                    return Err(ProtocolError::MalformedProof(format!(
                        "verdict for {:?} proof {} is out of range",
                        partial.kind,
                        partial.offset + step
                    )))
                }
            }
        }
    }

    let mut verdicts = Vec::with_capacity(lengths.iter().sum());
    for kind in ProofKind::ORDER {
        for (index, slot) in slots[kind.index()].iter().enumerate() {
            match slot {
                Some(verdict) => verdicts.push(*verdict),
                None => {
                    return Err(ProtocolError::MalformedProof(format!(
                        "no verdict for {kind:?} proof {index}"
                    )))
                }
            }
        }
    }
    let rejected = verdicts.iter().filter(|verdict| !**verdict).count();
    if rejected > 0 {
        tracing::warn!(target: LOG_TARGET, rejected, total = verdicts.len(), "proofs rejected");
    }
    Ok(verdicts)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::aggregation_proof_creation;
    use crate::ciphertext::{CipherVector, KeyPair};
    use crate::test_utils::{keyed_line, keyed_star, seeded_rng, TestCurve};
    use std::sync::Arc;

    fn aggregation_bundle(pattern: &[bool]) -> ProofsToVerify<TestCurve> {
        let mut rng = seeded_rng(61);
        let keys = KeyPair::<TestCurve>::generate(&mut rng);
        let terms = CipherVector::encrypt_ints(keys.public_key(), &[1, 2, 3], &mut rng);
        let proofs = pattern
            .iter()
            .map(|valid| {
                let claimed = if *valid { terms.sum() } else { terms[1] };
                aggregation_proof_creation(&terms, claimed)
            })
            .collect();
        ProofsToVerify {
            aggregation: proofs,
            ..ProofsToVerify::default()
        }
    }

    #[tokio::test]
    async fn verdicts_keep_order_across_nodes() {
        let mut rng = seeded_rng(62);
        let context = ProtocolContext::new(Arc::new(keyed_star(3, &mut rng)), false, [7u8; 32]);
        let pattern = [true, false, false, true, true, false, true];
        let mut bundle = aggregation_bundle(&pattern);
        bundle.collective_aggregation = bundle.aggregation[..2].to_vec();

        let protocol = ProofsVerificationProtocol::new(context);
        protocol.arm(bundle.clone()).unwrap();
        assert_eq!(protocol.state(), ProtocolState::Armed);
        let verdicts = protocol.start().unwrap().recv().await.unwrap();

        assert_eq!(verdicts, bundle.verify_all());
        assert_eq!(&verdicts[..7], &pattern);
        assert_eq!(&verdicts[7..], &[true, false]);
        assert_eq!(protocol.state(), ProtocolState::Done);
        assert!(protocol.start().is_err());
    }

    #[tokio::test]
    async fn empty_bundle_yields_no_verdicts() {
        let mut rng = seeded_rng(63);
        let context = ProtocolContext::new(Arc::new(keyed_line(4, &mut rng)), false, [7u8; 32]);
        let verdicts = ProofsVerificationProtocol::run(
            context,
            ProofsToVerify::default(),
            Duration::from_secs(5),
        )
        .await
        .unwrap();
        assert!(verdicts.is_empty());
    }

    #[test]
    fn malformed_bundle_is_refused_at_arm() {
        use crate::key_switch::{key_switch_step, seed_key_switch};
        let mut rng = seeded_rng(64);
        let context = ProtocolContext::new(Arc::new(keyed_line(2, &mut rng)), false, [7u8; 32]);
        let keys = KeyPair::<TestCurve>::generate(&mut rng);
        let vector = CipherVector::encrypt_ints(keys.public_key(), &[1], &mut rng);
        let (ephemerals, seeds) = seed_key_switch(&vector);
        let (_, proof) =
            key_switch_step(&keys, keys.public_key(), &ephemerals, &seeds, true, &mut rng)
                .unwrap();
        let mut proof = proof.unwrap();
        proof.ephemerals.push(TestCurve::default());

        let protocol = ProofsVerificationProtocol::new(context);
        let bundle = ProofsToVerify {
            key_switching: vec![proof],
            ..ProofsToVerify::default()
        };
        assert!(matches!(protocol.arm(bundle), Err(ProtocolError::MalformedProof(_))));
        assert_eq!(protocol.state(), ProtocolState::Idle);
    }

    #[test]
    fn partition_covers_every_proof_once() {
        let lengths = [5, 0, 1, 2, 3, 7];
        let assignment = partition(&lengths, &[0, 2, 1], 3);
        for kind in ProofKind::ORDER {
            let mut covered: Vec<usize> = assignment
                .iter()
                .flatten()
                .filter(|(k, _)| *k == kind)
                .flat_map(|(_, range)| range.clone())
                .collect();
            covered.sort_unstable();
            assert_eq!(covered, (0..lengths[kind.index()]).collect::<Vec<_>>());
        }
        // Node 2 comes second in the traversal and takes the middle chunk.
        assert!(assignment[2].contains(&(ProofKind::KeySwitching, 1..3)));
    }

    #[test]
    fn missing_verdict_fails_the_run() {
        let lengths = [2, 0, 0, 0, 0, 0];
        let partial = PartialResult {
            kind: ProofKind::KeySwitching,
            offset: 0,
            results: vec![true],
        };
        assert!(assemble(&lengths, vec![partial.clone()]).is_err());
        let complete = PartialResult {
            offset: 1,
            results: vec![false],
            ..partial.clone()
        };
        assert_eq!(assemble(&lengths, vec![complete, partial]).unwrap(), vec![true, false]);
        let stray = PartialResult {
            kind: ProofKind::Shuffling,
            offset: 0,
            results: vec![true],
        };
        assert!(assemble(&lengths, vec![stray]).is_err());
    }
}
