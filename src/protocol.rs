//! Protocol instance plumbing: lifecycle, single-shot feedback and the two
//! round shapes every tree protocol is built from.
//!
//! A *chain round* visits nodes one after the other in a fixed order, each
//! node transforming the message it receives and handing the result to the
//! next. A *tree round* announces a value from the root down to every node,
//! computes a local result on each node and folds the results back up,
//! children before parents.
//!
//! Every node runs as its own task connected to its neighbours by bounded
//! channels and owns the closure it runs; CPU-heavy work runs on the
//! blocking pool.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};

use crate::error::{ProtocolError, Result};
use crate::overlay::TreeShape;
use crate::tokio_tools::{run_blocking, spawn_named_task};

const LOG_TARGET: &str = "unlynx::protocol";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProtocolState {
    /// Created, nothing to work on yet.
    Idle,
    /// Holds its input and may be started.
    Armed,
    Running,
    /// Result delivered; the instance cannot be reused.
    Done,
}

/// Forward-only state shared between a protocol handle and its tasks.
#[derive(Clone, Debug)]
pub struct Lifecycle {
    name: &'static str,
    state: Arc<Mutex<ProtocolState>>,
}

impl Lifecycle {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            state: Arc::new(Mutex::new(ProtocolState::Idle)),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn state(&self) -> ProtocolState {
        *self.state.lock()
    }

    fn advance(&self, from: ProtocolState, to: ProtocolState) -> Result<()> {
        let mut state = self.state.lock();
        if *state != from {
            return Err(ProtocolError::InvalidState {
                expected: from,
                actual: *state,
            });
        }
        *state = to;
        tracing::info!(target: LOG_TARGET, protocol = self.name, ?from, ?to, "protocol state changed");
        Ok(())
    }

    pub fn arm(&self) -> Result<()> {
        self.advance(ProtocolState::Idle, ProtocolState::Armed)
    }

    pub fn start(&self) -> Result<()> {
        self.advance(ProtocolState::Armed, ProtocolState::Running)
    }

    fn finish(&self) -> Result<()> {
        self.advance(ProtocolState::Running, ProtocolState::Done)
    }
}

/// Receiving half of a protocol run's result.
#[derive(Debug)]
pub struct Feedback<T> {
    rx: oneshot::Receiver<Result<T>>,
}

impl<T> Feedback<T> {
    pub async fn recv(self) -> Result<T> {
        match self.rx.await {
            Ok(result) => result,
            Err(_) => Err(ProtocolError::ChannelClosed),
        }
    }

    /// Gives up after `timeout`. A result that arrives later is discarded.
    pub async fn recv_timeout(self, timeout: Duration) -> Result<T> {
        match tokio::time::timeout(timeout, self.recv()).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(target: LOG_TARGET, ?timeout, "abandoning protocol run");
                Err(ProtocolError::Timeout)
            }
        }
    }
}

/// Sending half, consumed by the single delivery.
#[derive(Debug)]
pub struct FeedbackSender<T> {
    tx: oneshot::Sender<Result<T>>,
    lifecycle: Lifecycle,
}

impl<T> FeedbackSender<T> {
    pub fn deliver(self, result: Result<T>) {
        if let Err(err) = self.lifecycle.finish() {
            tracing::warn!(target: LOG_TARGET, protocol = self.lifecycle.name(), error = %err, "delivering from an unexpected state");
        }
        if self.tx.send(result).is_err() {
            tracing::debug!(
                target: LOG_TARGET,
                protocol = self.lifecycle.name(),
                "feedback receiver gone, result discarded"
            );
        }
    }
}

pub fn feedback_channel<T>(lifecycle: &Lifecycle) -> (FeedbackSender<T>, Feedback<T>) {
    let (tx, rx) = oneshot::channel();
    (
        FeedbackSender {
            tx,
            lifecycle: lifecycle.clone(),
        },
        Feedback { rx },
    )
}

enum Downstream<M> {
    Next(mpsc::Sender<Result<M>>),
    Feedback(FeedbackSender<M>),
}

/// Runs `steps` one after the other, starting from `initial`. Each step is
/// moved into the task of the node it belongs to, so whatever it captures
/// stays with that node. The first error skips the remaining steps and is
/// delivered as the result.
pub fn spawn_chain_round<M, S>(
    name: &'static str,
    steps: Vec<(usize, S)>,
    initial: M,
    feedback: FeedbackSender<M>,
) where
    M: Send + 'static,
    S: FnOnce(M) -> Result<M> + Send + 'static,
{
    if steps.is_empty() {
        feedback.deliver(Ok(initial));
        return;
    }

    let (senders, receivers): (Vec<_>, Vec<_>) =
        steps.iter().map(|_| mpsc::channel::<Result<M>>(1)).unzip();
    let first = senders[0].clone();
    let mut downstreams: Vec<Downstream<M>> =
        senders.into_iter().skip(1).map(Downstream::Next).collect();
    downstreams.push(Downstream::Feedback(feedback));

    for (((node, step), mut inbox), downstream) in
        steps.into_iter().zip(receivers).zip(downstreams)
    {
        spawn_named_task(format!("{name}/node-{node}"), async move {
            let Some(message) = inbox.recv().await else {
                tracing::debug!(target: LOG_TARGET, node, "chain closed before this node ran");
                return;
            };
            let outcome = match message {
                Ok(value) => run_blocking(move || step(value)).await,
                Err(err) => Err(err),
            };
            if let Err(err) = &outcome {
                tracing::debug!(target: LOG_TARGET, node, error = %err, "chain step failed");
            }
            match downstream {
                Downstream::Next(next) => {
                    if next.send(outcome).await.is_err() {
                        tracing::debug!(target: LOG_TARGET, node, "next node is gone");
                    }
                }
                Downstream::Feedback(feedback) => feedback.deliver(outcome),
            }
        });
    }

    if first.try_send(Ok(initial)).is_err() {
        tracing::error!(target: LOG_TARGET, protocol = name, "could not seed the chain");
    }
}

/// Announces `announcement` from the root, runs `locals[i]` on node `i` and
/// folds results upwards with `fold(node, own, children)`, children in index
/// order. `finish` turns the root's fold into the round's result.
pub fn spawn_tree_round<A, R, T, L, F, G>(
    name: &'static str,
    shape: &TreeShape,
    announcement: A,
    locals: Vec<L>,
    fold: F,
    finish: G,
    feedback: FeedbackSender<T>,
) where
    A: Send + Sync + 'static,
    R: Send + 'static,
    T: Send + 'static,
    L: FnOnce(&A) -> Result<R> + Send + 'static,
    F: Fn(usize, R, Vec<R>) -> Result<R> + Send + Sync + 'static,
    G: FnOnce(R) -> Result<T> + Send + 'static,
{
    let count = shape.node_count();
    if count == 0 {
        feedback.deliver(Err(ProtocolError::InvalidInput("empty tree".into())));
        return;
    }
    if locals.len() != count {
        feedback.deliver(Err(ProtocolError::length_mismatch(count, locals.len())));
        return;
    }

    let fold = Arc::new(fold);
    let (announce_txs, announce_rxs): (Vec<_>, Vec<_>) =
        (0..count).map(|_| mpsc::channel::<Arc<A>>(1)).unzip();
    let (result_txs, result_rxs): (Vec<_>, Vec<_>) = shape
        .children
        .iter()
        .map(|children| mpsc::channel::<(usize, Result<R>)>(children.len().max(1)))
        .unzip();

    let mut root = Some((feedback, finish));
    for (node, ((mut announce_rx, mut result_rx), local)) in announce_rxs
        .into_iter()
        .zip(result_rxs)
        .zip(locals)
        .enumerate()
    {
        let children = shape.children[node].clone();
        let child_announcers: Vec<_> = children
            .iter()
            .map(|child| announce_txs[*child].clone())
            .collect();
        let upstream = match shape.parents[node] {
            Some(parent) => Some(result_txs[parent].clone()),
            None => None,
        };
        let root_delivery = if upstream.is_none() { root.take() } else { None };
        let fold = Arc::clone(&fold);

        spawn_named_task(format!("{name}/node-{node}"), async move {
            let Some(announcement) = announce_rx.recv().await else {
                tracing::debug!(target: LOG_TARGET, node, "tree closed before announcement");
                return;
            };
            for announcer in &child_announcers {
                if announcer.send(Arc::clone(&announcement)).await.is_err() {
                    tracing::debug!(target: LOG_TARGET, node, "child is gone");
                }
            }
            drop(child_announcers);

            let own = run_blocking(move || local(announcement.as_ref())).await;

            let mut collected = Vec::with_capacity(children.len());
            while collected.len() < children.len() {
                match result_rx.recv().await {
                    Some(message) => collected.push(message),
                    None => break,
                }
            }
            collected.sort_by_key(|(child, _)| *child);

            let outcome = match (own, collected.len() == children.len()) {
                (Err(err), _) => Err(err),
                (Ok(_), false) => Err(ProtocolError::ChannelClosed),
                (Ok(own), true) => {
                    match collected
                        .into_iter()
                        .map(|(_, result)| result)
                        .collect::<Result<Vec<R>>>()
                    {
                        Ok(child_results) => {
                            run_blocking(move || fold(node, own, child_results)).await
                        }
                        Err(err) => Err(err),
                    }
                }
            };

            match (upstream, root_delivery) {
                (Some(upstream), _) => {
                    if upstream.send((node, outcome)).await.is_err() {
                        tracing::debug!(target: LOG_TARGET, node, "parent is gone");
                    }
                }
                (None, Some((feedback, finish))) => feedback.deliver(outcome.and_then(finish)),
                (None, None) => {
                    tracing::error!(target: LOG_TARGET, node, "second root in tree shape");
                }
            }
        });
    }

    if announce_txs[0].try_send(Arc::new(announcement)).is_err() {
        tracing::error!(target: LOG_TARGET, protocol = name, "could not announce to the root");
    }
}
