//! Tree protocol instances.
//!
//! Each instance is single use: create it over a [`ProtocolContext`], arm it
//! with its input, start it and await the returned [`Feedback`]. Node
//! secrets stay with the node's task; only public values cross nodes.
//!
//! [`Feedback`]: crate::protocol::Feedback

mod collective_aggregation;
mod deterministic_tagging;
mod key_switching;
mod proofs_verification;
mod shuffling;

pub use collective_aggregation::{AggregationOutput, CollectiveAggregationProtocol};
pub use deterministic_tagging::{
    generate_tagging_nodes, DeterministicTaggingProtocol, TaggingOutput,
};
pub use key_switching::{KeySwitchOutput, KeySwitchingProtocol};
pub use proofs_verification::{PartialResult, ProofsVerificationProtocol};
pub use shuffling::{ShuffleOutput, ShufflingProtocol};

use std::sync::Arc;

use ark_ec::CurveGroup;
use parking_lot::Mutex;
use rand::{rngs::StdRng, Rng, SeedableRng};

use crate::ciphertext::KeyPair;
use crate::error::{ProtocolError, Result};
use crate::overlay::{LocalTree, NodePosition};
use crate::protocol::Lifecycle;

/// What every protocol instance runs over: the tree, one RNG per node and
/// whether steps produce proofs.
#[derive(Clone)]
pub struct ProtocolContext<C: CurveGroup> {
    tree: Arc<LocalTree<C>>,
    rngs: Vec<Arc<Mutex<StdRng>>>,
    proofs: bool,
}

impl<C: CurveGroup> ProtocolContext<C> {
    /// Node RNGs are derived from `rng_seed` in node order.
    pub fn new(tree: Arc<LocalTree<C>>, proofs: bool, rng_seed: [u8; 32]) -> Self {
        let mut master = StdRng::from_seed(rng_seed);
        let rngs = (0..tree.node_count())
            .map(|_| Arc::new(Mutex::new(StdRng::from_seed(master.gen()))))
            .collect();
        Self { tree, rngs, proofs }
    }

    pub fn tree(&self) -> &Arc<LocalTree<C>> {
        &self.tree
    }

    pub fn proofs_enabled(&self) -> bool {
        self.proofs
    }

    /// The handle node `node`'s step is given. It carries that node's key
    /// pair and RNG and nothing of any other node.
    pub(crate) fn node(&self, node: usize) -> NodeHandle<C> {
        NodeHandle {
            position: self.tree.position(node),
            key_pair: self.tree.key_pair(node),
            rng: Arc::clone(&self.rngs[node]),
            proofs: self.proofs,
        }
    }

    /// One handle per node of `order`, ready to be moved into the steps of a
    /// chain round.
    pub(crate) fn nodes_in(&self, order: &[usize]) -> Vec<(usize, NodeHandle<C>)> {
        order.iter().map(|node| (*node, self.node(*node))).collect()
    }
}

impl<C: CurveGroup> std::fmt::Debug for ProtocolContext<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolContext")
            .field("nodes", &self.tree.node_count())
            .field("proofs", &self.proofs)
            .finish()
    }
}

pub(crate) struct NodeHandle<C: CurveGroup> {
    pub(crate) position: NodePosition<C>,
    pub(crate) key_pair: Arc<KeyPair<C>>,
    rng: Arc<Mutex<StdRng>>,
    pub(crate) proofs: bool,
}

impl<C: CurveGroup> NodeHandle<C> {
    pub(crate) fn with_rng<T>(&self, f: impl FnOnce(&mut StdRng) -> T) -> T {
        let mut rng = self.rng.lock();
        f(&mut rng)
    }
}

/// Input slot shared by every protocol: filled on arm, emptied on start.
struct Armed<I> {
    lifecycle: Lifecycle,
    input: Mutex<Option<I>>,
}

impl<I> Armed<I> {
    fn new(name: &'static str) -> Self {
        Self {
            lifecycle: Lifecycle::new(name),
            input: Mutex::new(None),
        }
    }

    fn arm(&self, input: I) -> Result<()> {
        self.lifecycle.arm()?;
        *self.input.lock() = Some(input);
        Ok(())
    }

    fn take(&self) -> Result<I> {
        self.lifecycle.start()?;
        self.input.lock().take().ok_or(ProtocolError::InvalidState {
            expected: crate::protocol::ProtocolState::Armed,
            actual: self.lifecycle.state(),
        })
    }
}
