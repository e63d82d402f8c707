use std::sync::Arc;
use std::time::Duration;

use ark_bn254::G1Projective as Curve;
use ark_ec::PrimeGroup;
use rand::{rngs::StdRng, SeedableRng};

use unlynx::aggregation::aggregation_proof_creation;
use unlynx::deterministic_tag::TaggingNode;
use unlynx::key_switch::{key_switch_step, seed_key_switch};
use unlynx::protocols::{ProofsVerificationProtocol, ProtocolContext};
use unlynx::shuffle::{shuffle_sequence, PublishedShuffleProof};
use unlynx::{
    CipherVector, KeyPair, LocalTree, ProofKind, ProofsToVerify, ProtocolError, ProtocolState,
};

const TIMEOUT: Duration = Duration::from_secs(60);

fn verifier_context(rng: &mut StdRng) -> ProtocolContext<Curve> {
    let keys = (0..3).map(|_| KeyPair::generate(rng)).collect();
    ProtocolContext::new(Arc::new(LocalTree::star(keys)), true, [42u8; 32])
}

fn mixed_bundle(rng: &mut StdRng) -> ProofsToVerify<Curve> {
    let g = Curve::generator();
    let keys = KeyPair::<Curve>::generate(rng);
    let querier = KeyPair::<Curve>::generate(rng);
    let vector = CipherVector::encrypt_ints(keys.public_key(), &[10, 10], rng);

    let (ephemerals, seeds) = seed_key_switch(&vector);
    let (_, key_switch_proof) =
        key_switch_step(&keys, querier.public_key(), &ephemerals, &seeds, true, rng).unwrap();

    let tagger = TaggingNode::generate(KeyPair::<Curve>::generate(rng), rng);
    let step = tagger.tag_step(&vector, true, rng).unwrap();
    let mut wrong_addition = step.addition_proof.unwrap();
    wrong_addition.entries[0].result += g;

    let wrong_sum = aggregation_proof_creation(&vector, vector[0]);

    let records: Vec<_> = [[1, 2], [3, 4], [5, 6]]
        .iter()
        .map(|values| CipherVector::encrypt_ints(keys.public_key(), values, rng))
        .collect();
    let sequence = shuffle_sequence(&records, g, keys.public_key(), rng).unwrap();
    let honest_shuffle =
        PublishedShuffleProof::create(&sequence, g, keys.public_key(), rng).unwrap();
    let wrong_key_shuffle =
        PublishedShuffleProof::create(&sequence, g, querier.public_key(), rng).unwrap();

    ProofsToVerify {
        key_switching: vec![key_switch_proof.unwrap()],
        det_tag_creation: vec![step.creation_proof.unwrap()],
        det_tag_addition: vec![wrong_addition],
        aggregation: vec![wrong_sum],
        shuffling: vec![honest_shuffle, wrong_key_shuffle],
        collective_aggregation: Vec::new(),
    }
}

#[tokio::test]
async fn mixed_bundle_yields_verdicts_in_kind_order() {
    let mut rng = StdRng::seed_from_u64(2024);
    let bundle = mixed_bundle(&mut rng);
    let context = verifier_context(&mut rng);

    let verdicts = ProofsVerificationProtocol::run(context, bundle.clone(), TIMEOUT)
        .await
        .unwrap();

    assert_eq!(verdicts, vec![true, true, false, false, true, false]);
    assert_eq!(verdicts, bundle.verify_all());
}

#[tokio::test]
async fn empty_bundle_yields_an_empty_sequence() {
    let mut rng = StdRng::seed_from_u64(7);
    let context = verifier_context(&mut rng);
    let verdicts = ProofsVerificationProtocol::run(context, ProofsToVerify::default(), TIMEOUT)
        .await
        .unwrap();
    assert!(verdicts.is_empty());
}

#[tokio::test]
async fn verdicts_do_not_depend_on_tree_shape() {
    let mut rng = StdRng::seed_from_u64(99);
    let bundle = mixed_bundle(&mut rng);
    for nodes in [1, 2, 5] {
        let keys = (0..nodes).map(|_| KeyPair::generate(&mut rng)).collect();
        let context = ProtocolContext::new(Arc::new(LocalTree::line(keys)), false, [1u8; 32]);
        let verdicts = ProofsVerificationProtocol::run(context, bundle.clone(), TIMEOUT)
            .await
            .unwrap();
        assert_eq!(verdicts, vec![true, true, false, false, true, false]);
    }
}

/// Breaks the shape of the first proof of `kind` in an otherwise valid bundle.
fn with_malformed(kind: ProofKind, rng: &mut StdRng) -> ProofsToVerify<Curve> {
    let mut bundle = mixed_bundle(rng);
    match kind {
        ProofKind::KeySwitching => {
            bundle.key_switching[0].entries[0].proof.responses.pop();
        }
        ProofKind::DetTagCreation => {
            bundle.det_tag_creation[0].entries[0].proof.commitments.clear();
        }
        ProofKind::DetTagAddition => {
            bundle.det_tag_addition[0].entries[1].proof.responses.push(Default::default());
        }
        ProofKind::Shuffling => {
            bundle.shuffling[1].proof.responses.k_b.pop();
        }
        ProofKind::Aggregation | ProofKind::CollectiveAggregation => {
            unreachable!("aggregation proofs have no structure to break")
        }
    }
    bundle
}

#[tokio::test]
async fn malformed_proof_of_each_kind_fails_the_run() {
    let mut rng = StdRng::seed_from_u64(404);
    for kind in [
        ProofKind::KeySwitching,
        ProofKind::DetTagCreation,
        ProofKind::DetTagAddition,
        ProofKind::Shuffling,
    ] {
        let bundle = with_malformed(kind, &mut rng);
        let context = verifier_context(&mut rng);
        let outcome = ProofsVerificationProtocol::run(context, bundle, TIMEOUT).await;
        assert!(
            matches!(&outcome, Err(ProtocolError::MalformedProof(_))),
            "{kind:?}: {outcome:?}"
        );
    }
}

#[test]
fn malformed_bundle_leaves_the_instance_idle() {
    let mut rng = StdRng::seed_from_u64(405);
    let bundle = with_malformed(ProofKind::DetTagCreation, &mut rng);
    let protocol = ProofsVerificationProtocol::new(verifier_context(&mut rng));
    assert!(matches!(protocol.arm(bundle), Err(ProtocolError::MalformedProof(_))));
    assert_eq!(protocol.state(), ProtocolState::Idle);
    assert!(protocol.start().is_err());
}
