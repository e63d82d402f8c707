use std::sync::Arc;

use ark_ec::CurveGroup;

use super::{Armed, ProtocolContext};
use crate::ciphertext::CipherVector;
use crate::error::Result;
use crate::overlay::TreePosition;
use crate::key_switch::{key_switch_step, seed_key_switch, KeySwitchListProof};
use crate::protocol::{feedback_channel, spawn_chain_round, Feedback, ProtocolState};

const LOG_TARGET: &str = "unlynx::protocols::key_switching";

#[derive(Clone, Debug)]
pub struct KeySwitchOutput<C: CurveGroup> {
    /// The input re-encrypted under the target key.
    pub switched: CipherVector<C>,
    /// One list proof per node, in traversal order.
    pub proofs: Vec<KeySwitchListProof<C>>,
}

/// Switches a vector encrypted under the roster's aggregate key to a target
/// key: the root seeds `(0, C)` and every node adds its contribution.
pub struct KeySwitchingProtocol<C: CurveGroup> {
    context: ProtocolContext<C>,
    slot: Armed<(C, CipherVector<C>)>,
}

impl<C: CurveGroup> KeySwitchingProtocol<C> {
    pub const NAME: &'static str = "key_switching";

    pub fn new(context: ProtocolContext<C>) -> Self {
        Self {
            context,
            slot: Armed::new(Self::NAME),
        }
    }

    pub fn state(&self) -> ProtocolState {
        self.slot.lifecycle.state()
    }

    pub fn arm(&self, target_key: C, vector: CipherVector<C>) -> Result<()> {
        self.slot.arm((target_key, vector))
    }

    pub fn start(&self) -> Result<Feedback<KeySwitchOutput<C>>> {
        let (target_key, vector) = self.slot.take()?;
        let order = self.context.tree().traversal_order();
        tracing::info!(
            target: LOG_TARGET,
            ciphertexts = vector.len(),
            nodes = order.len(),
            proofs = self.context.proofs_enabled(),
            "starting key switch"
        );

        let ephemerals = Arc::new(vector.ephemeral_points());
        let (sender, feedback) = feedback_channel(&self.slot.lifecycle);
        let initial = KeySwitchOutput {
            switched: vector,
            proofs: Vec::new(),
        };
        let steps = self
            .context
            .nodes_in(&order)
            .into_iter()
            .map(|(node, handle)| {
                let ephemerals = Arc::clone(&ephemerals);
                let step = move |mut state: KeySwitchOutput<C>| -> Result<KeySwitchOutput<C>> {
                    if handle.position.is_root() {
                        state.switched = seed_key_switch(&state.switched).1;
                        tracing::debug!(target: LOG_TARGET, node, "root seeded the switch");
                    }
                    let (switched, proof) = handle.with_rng(|rng| {
                        key_switch_step(
                            &handle.key_pair,
                            target_key,
                            &ephemerals,
                            &state.switched,
                            handle.proofs,
                            rng,
                        )
                    })?;
                    state.switched = switched;
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ciphertext::KeyPair;
    use crate::test_utils::{keyed_star, seeded_rng, small_table, TestCurve};
    use std::time::Duration;

    async fn switch(
        context: &ProtocolContext<TestCurve>,
        target: TestCurve,
        vector: CipherVector<TestCurve>,
    ) -> KeySwitchOutput<TestCurve> {
        let protocol = KeySwitchingProtocol::new(context.clone());
        protocol.arm(target, vector).unwrap();
        protocol
            .start()
            .unwrap()
            .recv_timeout(Duration::from_secs(30))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn collective_key_switch_decrypts_under_target() {
        let mut rng = seeded_rng(31);
        let tree = Arc::new(keyed_star(3, &mut rng));
        let context = ProtocolContext::new(Arc::clone(&tree), true, [5u8; 32]);
        let client = KeyPair::<TestCurve>::generate(&mut rng);
        let table = small_table();

        let vector =
            CipherVector::encrypt_ints(tree.roster().aggregate(), &[7, -2, 0], &mut rng);
        let output = switch(&context, client.public_key(), vector.clone()).await;

        assert_eq!(client.decrypt_ints(&output.switched, &table).unwrap(), vec![7, -2, 0]);
        assert_eq!(output.proofs.len(), 3);
        for (node, proof) in output.proofs.iter().enumerate() {
            assert_eq!(proof.public_key, tree.key_pair(node).public_key());
            assert_eq!(proof.ephemerals, vector.ephemeral_points());
            assert!(proof.verify().unwrap());
        }
    }

    #[tokio::test]
    async fn empty_vector_switches_to_empty() {
        let mut rng = seeded_rng(32);
        let context = ProtocolContext::new(Arc::new(keyed_star(2, &mut rng)), false, [6u8; 32]);
        let output = switch(&context, TestCurve::default(), CipherVector::default()).await;
        assert!(output.switched.is_empty());
        assert!(output.proofs.is_empty());
    }
}
