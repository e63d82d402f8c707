//! In-process processing tree.
//!
//! Protocols only see a node through [`TreePosition`]; [`LocalTree`] wires a
//! set of keyed nodes into a rooted tree and fixes the pre-order traversal
//! every sequential round follows.

use std::sync::Arc;

use ark_ec::CurveGroup;

use crate::ciphertext::{aggregate_public_keys, KeyPair};
use crate::error::{ProtocolError, Result};

const LOG_TARGET: &str = "unlynx::overlay";

/// What a protocol instance may ask about its place in the tree.
pub trait TreePosition<C: CurveGroup> {
    fn index(&self) -> usize;
    fn is_root(&self) -> bool;
    fn is_leaf(&self) -> bool;
    /// Sum of every roster member's public key.
    fn aggregate_key(&self) -> C;
    fn node_count(&self) -> usize;
}

/// The public keys of every node, in index order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Roster<C: CurveGroup> {
    public_keys: Vec<C>,
    aggregate: C,
}

impl<C: CurveGroup> Roster<C> {
    pub fn new(public_keys: Vec<C>) -> Self {
        let aggregate = aggregate_public_keys(public_keys.iter().copied());
        Self {
            public_keys,
            aggregate,
        }
    }

    pub fn public_keys(&self) -> &[C] {
        &self.public_keys
    }

    pub fn aggregate(&self) -> C {
        self.aggregate
    }

    pub fn len(&self) -> usize {
        self.public_keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.public_keys.is_empty()
    }
}

#[derive(Clone, Debug)]
pub struct NodePosition<C: CurveGroup> {
    index: usize,
    parent: Option<usize>,
    children: Vec<usize>,
    node_count: usize,
    aggregate_key: C,
}

impl<C: CurveGroup> NodePosition<C> {
    pub fn parent(&self) -> Option<usize> {
        self.parent
    }

    pub fn children(&self) -> &[usize] {
        &self.children
    }
}

impl<C: CurveGroup> TreePosition<C> for NodePosition<C> {
    fn index(&self) -> usize {
        self.index
    }

    fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    fn aggregate_key(&self) -> C {
        self.aggregate_key
    }

    fn node_count(&self) -> usize {
        self.node_count
    }
}

/// Parent and child links only, for runners that move messages along the
/// tree without touching keys.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TreeShape {
    pub parents: Vec<Option<usize>>,
    pub children: Vec<Vec<usize>>,
}

impl TreeShape {
    pub fn node_count(&self) -> usize {
        self.parents.len()
    }
}

/// A rooted tree over keyed nodes; node 0 is the root.
#[derive(Clone, Debug)]
pub struct LocalTree<C: CurveGroup> {
    keys: Vec<Arc<KeyPair<C>>>,
    parents: Vec<Option<usize>>,
    children: Vec<Vec<usize>>,
    roster: Roster<C>,
}

impl<C: CurveGroup> LocalTree<C> {
    /// `parents[i]` is the parent of node `i`; only node 0 may have none.
    pub fn from_parents(keys: Vec<KeyPair<C>>, parents: Vec<Option<usize>>) -> Result<Self> {
        if keys.is_empty() {
            return Err(ProtocolError::InvalidInput("a tree needs at least one node".into()));
        }
        if keys.len() != parents.len() {
            return Err(ProtocolError::length_mismatch(keys.len(), parents.len()));
        }
        let mut children = vec![Vec::new(); keys.len()];
        for (node, parent) in parents.iter().enumerate() {
            match (node, parent) {
                (0, None) => {}
                (0, Some(_)) => {
                    return Err(ProtocolError::InvalidInput("the root cannot have a parent".into()))
                }
                (_, Some(parent)) if *parent < node => children[*parent].push(node),
                _ => {
                    return Err(ProtocolError::InvalidInput(format!(
                        "node {node} must have a parent with a smaller index"
                    )))
                }
            }
        }
        let roster = Roster::new(keys.iter().map(KeyPair::public_key).collect());
        tracing::debug!(target: LOG_TARGET, nodes = keys.len(), "built local tree");
        Ok(Self {
            keys: keys.into_iter().map(Arc::new).collect(),
            parents,
            children,
            roster,
        })
    }

    /// Every node hangs directly off the root.
    pub fn star(keys: Vec<KeyPair<C>>) -> Self {
        let parents = (0..keys.len())
            .map(|i| if i == 0 { None } else { Some(0) })
            .collect();
        Self::from_parents_unchecked(keys, parents)
    }

    /// Node `i` is the parent of node `i + 1`.
    pub fn line(keys: Vec<KeyPair<C>>) -> Self {
        let parents = (0..keys.len()).map(|i| i.checked_sub(1)).collect();
        Self::from_parents_unchecked(keys, parents)
    }

    fn from_parents_unchecked(keys: Vec<KeyPair<C>>, parents: Vec<Option<usize>>) -> Self {
        let mut children = vec![Vec::new(); keys.len()];
        for (node, parent) in parents.iter().enumerate() {
            if let Some(parent) = parent {
                children[*parent].push(node);
            }
        }
        let roster = Roster::new(keys.iter().map(KeyPair::public_key).collect());
        Self {
            keys: keys.into_iter().map(Arc::new).collect(),
            parents,
            children,
            roster,
        }
    }

    pub fn node_count(&self) -> usize {
        self.keys.len()
    }

    pub fn roster(&self) -> &Roster<C> {
        &self.roster
    }

    /// Node `index`'s own key pair; handed only to that node's steps.
    pub(crate) fn key_pair(&self, index: usize) -> Arc<KeyPair<C>> {
        Arc::clone(&self.keys[index])
    }

    pub fn parent(&self, index: usize) -> Option<usize> {
        self.parents[index]
    }

    pub fn children(&self, index: usize) -> &[usize] {
        &self.children[index]
    }

    pub fn shape(&self) -> TreeShape {
        TreeShape {
            parents: self.parents.clone(),
            children: self.children.clone(),
        }
    }

    pub fn position(&self, index: usize) -> NodePosition<C> {
        NodePosition {
            index,
            parent: self.parents[index],
            children: self.children[index].clone(),
            node_count: self.node_count(),
            aggregate_key: self.roster.aggregate(),
        }
    }

    /// Pre-order from the root, children in index order. Identical for every
    /// run over the same tree.
    pub fn traversal_order(&self) -> Vec<usize> {
        let mut order = Vec::with_capacity(self.node_count());
        if self.keys.is_empty() {
            return order;
        }
        let mut stack = vec![0];
        while let Some(node) = stack.pop() {
            order.push(node);
            stack.extend(self.children[node].iter().rev());
        }
        order
    }
}
