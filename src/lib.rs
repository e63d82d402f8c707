pub mod aggregation;
pub mod chaum_pedersen;
pub mod ciphertext;
pub mod config;
pub mod crypto_serde;
pub mod deterministic_tag;
pub mod error;
pub mod key_switch;
pub mod overlay;
pub mod proofs;
pub mod protocol;
pub mod protocols;
pub mod records;
pub mod shuffle;
pub mod tokio_tools;
pub mod transcript;

#[cfg(test)]
pub mod test_utils;

pub use ciphertext::{CipherText, CipherVector, DiscreteLogTable, KeyPair};
pub use config::RunConfig;
pub use error::{ProtocolError, Result};
pub use overlay::{LocalTree, Roster, TreePosition};
pub use proofs::{ProofKind, ProofsToVerify};
pub use protocol::{Feedback, ProtocolState};
