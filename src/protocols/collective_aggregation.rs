use ark_ec::CurveGroup;

use super::{Armed, ProtocolContext};
use crate::aggregation::{aggregation_proof_creation, AggregationProof};
use crate::ciphertext::CipherVector;
use crate::error::{ProtocolError, Result};
use crate::overlay::TreePosition;
use crate::protocol::{feedback_channel, spawn_tree_round, Feedback, ProtocolState};
use crate::records::{merge_response, GroupedData};

const LOG_TARGET: &str = "unlynx::protocols::collective_aggregation";

#[derive(Clone, Debug)]
pub struct AggregationOutput<C: CurveGroup> {
    pub grouped: GroupedData<C>,
    /// Proofs from every fold, deepest folds first.
    pub proofs: Vec<AggregationProof<C>>,
}

/// Folds every node's grouped data up the tree, summing the aggregating
/// attributes of equal grouping keys.
pub struct CollectiveAggregationProtocol<C: CurveGroup> {
    context: ProtocolContext<C>,
    slot: Armed<Vec<GroupedData<C>>>,
}

impl<C: CurveGroup> CollectiveAggregationProtocol<C> {
    pub const NAME: &'static str = "collective_aggregation";

    pub fn new(context: ProtocolContext<C>) -> Self {
        Self {
            context,
            slot: Armed::new(Self::NAME),
        }
    }

    pub fn state(&self) -> ProtocolState {
        self.slot.lifecycle.state()
    }

    /// `local[i]` is node `i`'s grouped data.
    pub fn arm(&self, local: Vec<GroupedData<C>>) -> Result<()> {
        let nodes = self.context.tree().node_count();
        if local.len() != nodes {
            return Err(ProtocolError::length_mismatch(nodes, local.len()));
        }
        self.slot.arm(local)
    }

    pub fn start(&self) -> Result<Feedback<AggregationOutput<C>>> {
        let local = self.slot.take()?;
        let shape = self.context.tree().shape();
        let proofs = self.context.proofs_enabled();
        tracing::info!(
            target: LOG_TARGET,
            nodes = shape.node_count(),
            proofs,
            "starting collective aggregation"
        );

        let locals = local
            .into_iter()
            .enumerate()
            .map(|(node, grouped)| {
                let position = self.context.tree().position(node);
                move |_: &bool| -> Result<AggregationOutput<C>> {
                    tracing::debug!(
                        target: LOG_TARGET,
                        node = position.index(),
                        leaf = position.is_leaf(),
                        groups = grouped.len(),
                        "contributing local groups"
                    );
                    Ok(AggregationOutput {
                        grouped,
                        proofs: Vec::new(),
                    })
                }
            })
            .collect();
        let (sender, feedback) = feedback_channel(&self.slot.lifecycle);
        spawn_tree_round(
            Self::NAME,
            &shape,
            proofs,
            locals,
            move |node, own, children| fold(node, own, children, proofs),
            Ok,
            sender,
        );
        Ok(feedback)
    }
}

fn fold<C: CurveGroup>(
    node: usize,
    own: AggregationOutput<C>,
    children: Vec<AggregationOutput<C>>,
    proofs: bool,
) -> Result<AggregationOutput<C>> {
    if children.is_empty() {
        return Ok(own);
    }
    let mut collected: Vec<AggregationProof<C>> = Vec::new();
    let mut inputs = Vec::with_capacity(children.len() + 1);
    for child in children {
        collected.extend(child.proofs);
        inputs.push(child.grouped);
    }
    collected.extend(own.proofs);
    inputs.insert(0, own.grouped);

    let mut grouped = GroupedData::new();
    for input in &inputs {
        for (key, response) in input {
            merge_response(&mut grouped, *key, response.clone())?;
        }
    }

    if proofs {
        for (key, merged) in &grouped {
            let contributions: Vec<&CipherVector<C>> = inputs
                .iter()
                .filter_map(|input| input.get(key).map(|response| &response.aggregating))
                .collect();
            for (attribute, sum) in merged.aggregating.iter().enumerate() {
                let terms: CipherVector<C> = contributions
                    .iter()
                    .map(|aggregating| aggregating[attribute])
                    .collect();
                collected.push(aggregation_proof_creation(&terms, *sum));
            }
        }
    }

    tracing::debug!(
        target: LOG_TARGET,
        node,
        groups = grouped.len(),
        proofs = collected.len(),
        "folded child results"
    );
    Ok(AggregationOutput {
        grouped,
        proofs: collected,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deterministic_tag::GroupingKey;
    use crate::records::{retrieve_simple_data, FilteredResponse};
    use crate::test_utils::{keyed_line, keyed_star, seeded_rng, small_table, TestCurve};
    use ark_std::rand::rngs::StdRng;
    use std::sync::Arc;

    fn response(
        pk: TestCurve,
        aggregating: &[i64],
        rng: &mut StdRng,
    ) -> FilteredResponse<TestCurve> {
        FilteredResponse {
            grouping: CipherVector::encrypt_ints(pk, &[1], rng),
            aggregating: CipherVector::encrypt_ints(pk, aggregating, rng),
        }
    }

    #[tokio::test]
    async fn groups_are_summed_up_the_tree() {
        let mut rng = seeded_rng(51);
        let tree = keyed_star(3, &mut rng);
        let shared = crate::ciphertext::KeyPair::<TestCurve>::from_secret(
            (0..3).map(|node| *tree.key_pair(node).secret()).sum(),
        );
        let pk = tree.roster().aggregate();
        let context = ProtocolContext::new(Arc::new(tree), true, [2u8; 32]);
        let a = GroupingKey::from([1u8; 32]);
        let b = GroupingKey::from([2u8; 32]);

        let local = vec![
            GroupedData::from([(a, response(pk, &[1, 10], &mut rng))]),
            GroupedData::from([
                (a, response(pk, &[2, 20], &mut rng)),
                (b, response(pk, &[5, 50], &mut rng)),
            ]),
            GroupedData::from([(a, response(pk, &[3, 30], &mut rng))]),
        ];
        let protocol = CollectiveAggregationProtocol::new(context);
        protocol.arm(local).unwrap();
        let output = protocol.start().unwrap().recv().await.unwrap();

        let table = small_table();
        assert_eq!(
            shared.decrypt_ints(&output.grouped[&a].aggregating, &table).unwrap(),
            vec![6, 60]
        );
        assert_eq!(
            shared.decrypt_ints(&output.grouped[&b].aggregating, &table).unwrap(),
            vec![5, 50]
        );
        // One fold at the root: two keys with two attributes each.
        assert_eq!(output.proofs.len(), 4);
        assert!(output.proofs.iter().all(AggregationProof::verify));
        assert_eq!(output.proofs[0].terms.len(), 3);
    }

    #[tokio::test]
    async fn ungrouped_result_is_retrievable() {
        let mut rng = seeded_rng(52);
        let tree = keyed_line(3, &mut rng);
        let pk = tree.roster().aggregate();
        let context = ProtocolContext::new(Arc::new(tree), true, [4u8; 32]);
        let empty = GroupingKey::empty();
        let local = (0..3)
            .map(|value| GroupedData::from([(empty, response(pk, &[value], &mut rng))]))
            .collect();

        let protocol = CollectiveAggregationProtocol::new(context);
        protocol.arm(local).unwrap();
        let output = protocol.start().unwrap().recv().await.unwrap();
        assert_eq!(retrieve_simple_data(&output.grouped).unwrap().len(), 1);
        // Folds at node 1 and at the root, one attribute each.
        assert_eq!(output.proofs.len(), 2);
        assert_eq!(output.proofs[0].terms.len(), 2);
        assert_eq!(output.proofs[1].terms.len(), 2);
    }

    #[test]
    fn local_data_must_cover_every_node() {
        let mut rng = seeded_rng(53);
        let context = ProtocolContext::new(Arc::new(keyed_star(3, &mut rng)), false, [0u8; 32]);
        let protocol = CollectiveAggregationProtocol::<TestCurve>::new(context);
        assert!(matches!(
            protocol.arm(vec![GroupedData::new()]),
            Err(ProtocolError::LengthMismatch { expected: 3, actual: 1 })
        ));
    }
}
