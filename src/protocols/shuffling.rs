use ark_ec::CurveGroup;

use super::{Armed, ProtocolContext};
use crate::ciphertext::CipherVector;
use crate::error::{ProtocolError, Result};
use crate::overlay::TreePosition;
use crate::protocol::{feedback_channel, spawn_chain_round, Feedback, ProtocolState};
use crate::shuffle::{record_width, shuffle_sequence, PublishedShuffleProof};

const LOG_TARGET: &str = "unlynx::protocols::shuffling";

#[derive(Clone, Debug)]
pub struct ShuffleOutput<C: CurveGroup> {
    /// Records after every node's shuffle; a single input record comes
    /// back with its zero companion.
    pub records: Vec<CipherVector<C>>,
    /// One proof per node, in traversal order.
    pub proofs: Vec<PublishedShuffleProof<C>>,
}

/// Mix-net over the tree: each node in turn shuffles the records under the
/// roster's aggregate key.
pub struct ShufflingProtocol<C: CurveGroup> {
    context: ProtocolContext<C>,
    slot: Armed<Vec<CipherVector<C>>>,
}

impl<C: CurveGroup> ShufflingProtocol<C> {
    pub const NAME: &'static str = "shuffling";

    pub fn new(context: ProtocolContext<C>) -> Self {
        Self {
            context,
            slot: Armed::new(Self::NAME),
        }
    }

    pub fn state(&self) -> ProtocolState {
        self.slot.lifecycle.state()
    }

    /// Rejects an empty list or records of unequal width up front.
    pub fn arm(&self, records: Vec<CipherVector<C>>) -> Result<()> {
        if records.is_empty() {
            return Err(ProtocolError::InvalidInput("cannot shuffle an empty list".into()));
        }
        record_width(&records)?;
        self.slot.arm(records)
    }

    pub fn start(&self) -> Result<Feedback<ShuffleOutput<C>>> {
        let records = self.slot.take()?;
        let order = self.context.tree().traversal_order();
        tracing::info!(
            target: LOG_TARGET,
            records = records.len(),
            nodes = order.len(),
            proofs = self.context.proofs_enabled(),
            "starting shuffle"
        );

        let (sender, feedback) = feedback_channel(&self.slot.lifecycle);
        let initial = ShuffleOutput {
            records,
            proofs: Vec::new(),
        };
        let steps = self
            .context
            .nodes_in(&order)
            .into_iter()
            .map(|(node, handle)| {
                let step = move |mut state: ShuffleOutput<C>| -> Result<ShuffleOutput<C>> {
                    let g = C::generator();
                    let public_key = handle.position.aggregate_key();
                    let (records, proof) = handle.with_rng(|rng| {
                        let sequence = shuffle_sequence(&state.records, g, public_key, rng)?;
                        let proof = if handle.proofs {
                            Some(PublishedShuffleProof::create(&sequence, g, public_key, rng)?)
                        } else {
                            None
                        };
                        Ok::<_, ProtocolError>((sequence.outputs, proof))
                    })?;
                    state.records = records;
                    state.proofs.extend(proof);
                    Ok(state)
                };
                (node, step)
            })
            .collect();
        spawn_chain_round(Self::NAME, steps, initial, sender);
        Ok(feedback)
    }
}
