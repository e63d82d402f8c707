use std::sync::Arc;

use ark_ec::CurveGroup;
use rand::Rng;

use super::{Armed, ProtocolContext};
use crate::ciphertext::{CipherVector, KeyPair};
use crate::deterministic_tag::{TagAdditionListProof, TagCreationListProof, TaggingNode};
use crate::error::{ProtocolError, Result};
use crate::overlay::LocalTree;
use crate::protocol::{feedback_channel, spawn_chain_round, Feedback, ProtocolState};

const LOG_TARGET: &str = "unlynx::protocols::deterministic_tagging";

/// Tagged vector plus, with proofs enabled, one addition and one creation
/// list proof per node in traversal order.
#[derive(Clone, Debug)]
pub struct TaggingOutput<C: CurveGroup> {
    pub tagged: CipherVector<C>,
    pub addition_proofs: Vec<TagAdditionListProof<C>>,
    pub creation_proofs: Vec<TagCreationListProof<C>>,
}

/// Fresh tag secrets for every node of `tree`, one entry per node index.
/// Tags are only comparable between runs that share the same nodes.
pub fn generate_tagging_nodes<C: CurveGroup, R: Rng>(
    tree: &LocalTree<C>,
    rng: &mut R,
) -> Vec<Arc<TaggingNode<C>>> {
    (0..tree.node_count())
        .map(|node| {
            let key_pair = KeyPair::clone(&tree.key_pair(node));
            Arc::new(TaggingNode::generate(key_pair, rng))
        })
        .collect()
}

pub struct DeterministicTaggingProtocol<C: CurveGroup> {
    context: ProtocolContext<C>,
    nodes: Vec<Arc<TaggingNode<C>>>,
    slot: Armed<CipherVector<C>>,
}

impl<C: CurveGroup> DeterministicTaggingProtocol<C> {
    pub const NAME: &'static str = "deterministic_tagging";

    /// `nodes[i]` holds node `i`'s tagging secrets. The tagging node must
    /// use the same share of the collective key as the tree's node `i`.
    pub fn new(context: ProtocolContext<C>, nodes: Vec<Arc<TaggingNode<C>>>) -> Result<Self> {
        let tree = context.tree();
        if nodes.len() != tree.node_count() {
            return Err(ProtocolError::length_mismatch(tree.node_count(), nodes.len()));
        }
        if let Some(node) = (0..nodes.len())
            .find(|node| nodes[*node].public_key() != tree.roster().public_keys()[*node])
        {
            return Err(ProtocolError::InvalidInput(format!(
                "tagging node {node} does not hold the tree's key for that node"
            )));
        }
        Ok(Self {
            context,
            nodes,
            slot: Armed::new(Self::NAME),
        })
    }

    pub fn state(&self) -> ProtocolState {
        self.slot.lifecycle.state()
    }

    /// `vector` must be encrypted under the roster's aggregate key.
    pub fn arm(&self, vector: CipherVector<C>) -> Result<()> {
        self.slot.arm(vector)
    }

    pub fn start(&self) -> Result<Feedback<TaggingOutput<C>>> {
        let vector = self.slot.take()?;
        let order = self.context.tree().traversal_order();
        tracing::info!(
            target: LOG_TARGET,
            components = vector.len(),
            nodes = order.len(),
            proofs = self.context.proofs_enabled(),
            "starting deterministic tagging"
        );

        let (sender, feedback) = feedback_channel(&self.slot.lifecycle);
        let initial = TaggingOutput {
            tagged: vector,
            addition_proofs: Vec::new(),
            creation_proofs: Vec::new(),
        };
        let steps = self
            .context
            .nodes_in(&order)
            .into_iter()
            .map(|(node, handle)| {
                let tagger = Arc::clone(&self.nodes[node]);
                let step = move |mut state: TaggingOutput<C>| -> Result<TaggingOutput<C>> {
                    let step = handle
                        .with_rng(|rng| tagger.tag_step(&state.tagged, handle.proofs, rng))?;
                    state.tagged = step.vector;
                    state.addition_proofs.extend(step.addition_proof);
                    state.creation_proofs.extend(step.creation_proof);
                    Ok(state)
                };
                (node, step)
            })
            .collect();
        spawn_chain_round(Self::NAME, steps, initial, sender);
        Ok(feedback)
    }
}
