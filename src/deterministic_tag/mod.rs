//! Deterministic tagging.
//!
//! Every node `i` holds an ElGamal share `k_i` of the collective key and a
//! tag secret `s_i` committed as `S_i = s_i·G`. Visiting the nodes in a fixed
//! order, each node
//!
//! 1. adds `S_i` to the masked component of every ciphertext, then
//! 2. replaces `(K, C)` with `(s_i·K, s_i·(C − k_i·K))`.
//!
//! Once every share has been stripped, the masked component no longer
//! depends on the encryption randomness, only on the plaintext and the node
//! secrets, so its canonical encoding is a stable tag.

use ark_ec::CurveGroup;
use ark_ff::{UniformRand, Zero};
use ark_serialize::{CanonicalDeserialize, CanonicalSerialize};
use ark_std::rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::Zeroize;

use crate::chaum_pedersen::{ChaumPedersenProof, LinearStatement};
use crate::ciphertext::{CipherText, CipherVector, KeyPair};
use crate::crypto_serde::to_canonical_bytes;
use crate::error::{ProtocolError, Result};

const LOG_TARGET: &str = "unlynx::deterministic_tag";

const ADDITION_DOMAIN: &str = "unlynx/det_tag/addition/v1";
const CREATION_DOMAIN: &str = "unlynx/det_tag/creation/v1";
const GROUPING_KEY_DOMAIN: &[u8] = b"unlynx/grouping_key/v1";

/// Canonical encoding of a fully tagged masked point.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeterministicTag(#[serde(with = "crate::crypto_serde::hex_bytes")] Vec<u8>);

impl DeterministicTag {
    pub fn from_ciphertext<C: CurveGroup>(ciphertext: &CipherText<C>) -> Result<Self> {
        Ok(Self(to_canonical_bytes(&ciphertext.c)?))
    }

    /// One tag per component, in order.
    pub fn from_vector<C: CurveGroup>(vector: &CipherVector<C>) -> Result<Vec<Self>> {
        vector.iter().map(Self::from_ciphertext).collect()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

/// Fixed-size key identifying a group of records with equal grouping
/// attributes.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct GroupingKey(#[serde(with = "crate::crypto_serde::hex_bytes")] [u8; 32]);

impl GroupingKey {
    pub fn from_tags(tags: &[DeterministicTag]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(GROUPING_KEY_DOMAIN);
        hasher.update((tags.len() as u32).to_be_bytes());
        for tag in tags {
            hasher.update((tag.0.len() as u32).to_be_bytes());
            hasher.update(&tag.0);
        }
        let digest = hasher.finalize();
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&digest);
        Self(bytes)
    }

    /// The key of a record with no grouping attributes.
    pub fn empty() -> Self {
        Self::from_tags(&[])
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl From<[u8; 32]> for GroupingKey {
    fn from(value: [u8; 32]) -> Self {
        Self(value)
    }
}

/// Proof that `result = original + to_add` where `to_add = s·G` for a secret
/// `s` the prover knows.
#[derive(Clone, Debug, PartialEq, Eq, CanonicalSerialize, CanonicalDeserialize)]
pub struct TagAdditionProof<C: CurveGroup> {
    pub original: C,
    pub to_add: C,
    pub result: C,
    pub proof: ChaumPedersenProof<C>,
}

fn addition_statement<C: CurveGroup>(to_add: C) -> LinearStatement<C> {
    LinearStatement::new(1).equation(vec![(0, C::generator())], to_add)
}

pub fn tag_addition_proof_creation<C: CurveGroup, R: Rng>(
    original: C,
    tag_secret: &C::ScalarField,
    to_add: C,
    result: C,
    rng: &mut R,
) -> Result<TagAdditionProof<C>> {
    let proof = ChaumPedersenProof::prove(
        ADDITION_DOMAIN,
        &addition_statement(to_add),
        &[*tag_secret],
        rng,
    )?;
    Ok(TagAdditionProof {
        original,
        to_add,
        result,
        proof,
    })
}

impl<C: CurveGroup> TagAdditionProof<C> {
    pub fn verify(&self) -> bool {
        if self.original + self.to_add != self.result {
            tracing::warn!(target: LOG_TARGET, "tag addition result is not original + contribution");
            return false;
        }
        self.proof
            .verify(ADDITION_DOMAIN, &addition_statement(self.to_add))
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, CanonicalSerialize, CanonicalDeserialize)]
pub struct TagAdditionListProof<C: CurveGroup> {
    pub entries: Vec<TagAdditionProof<C>>,
}

impl<C: CurveGroup> TagAdditionListProof<C> {
    /// Structural checks only: every entry's proof fits its statement.
    pub fn validate(&self) -> Result<()> {
        for (index, entry) in self.entries.iter().enumerate() {
            addition_statement(entry.to_add)
                .check_shape(&entry.proof)
                .map_err(|err| at_entry(index, err))?;
        }
        Ok(())
    }

    pub fn verify_entries(&self) -> Vec<bool> {
        self.entries.iter().map(TagAdditionProof::verify).collect()
    }

    pub fn verify(&self) -> bool {
        self.entries.iter().all(TagAdditionProof::verify)
    }
}

/// One proof per component that `results[i].c = originals[i].c + to_add`.
#[tracing::instrument(target = LOG_TARGET, skip_all, fields(len = originals.len()))]
pub fn tag_addition_list_proof_creation<C: CurveGroup, R: Rng>(
    originals: &CipherVector<C>,
    tag_secret: &C::ScalarField,
    to_add: C,
    results: &CipherVector<C>,
    rng: &mut R,
) -> Result<TagAdditionListProof<C>> {
    if originals.len() != results.len() {
        return Err(ProtocolError::length_mismatch(originals.len(), results.len()));
    }
    let entries = originals
        .iter()
        .zip(results.iter())
        .map(|(original, result)| {
            tag_addition_proof_creation(original.c, tag_secret, to_add, result.c, rng)
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(TagAdditionListProof { entries })
}

/// Proof that a tag creation step `(K, C) → (s·K, s·(C − k·K))` used the
/// secret behind `commitment = s·G` and the share behind `public_key = k·G`.
#[derive(Clone, Debug, PartialEq, Eq, CanonicalSerialize, CanonicalDeserialize)]
pub struct TagCreationProof<C: CurveGroup> {
    pub original: CipherText<C>,
    pub result: CipherText<C>,
    pub proof: ChaumPedersenProof<C>,
}

// Witnesses are [s, k, s·k]; the last equation ties the product to the
// first two so that `C' = s·C − (s·k)·K` cannot be satisfied with a
// different share.
fn creation_statement<C: CurveGroup>(
    public_key: C,
    commitment: C,
    original: &CipherText<C>,
    result: &CipherText<C>,
) -> LinearStatement<C> {
    let g = C::generator();
    LinearStatement::new(3)
        .equation(vec![(0, g)], commitment)
        .equation(vec![(1, g)], public_key)
        .equation(vec![(0, original.k)], result.k)
        .equation(vec![(0, original.c), (2, -original.k)], result.c)
        .equation(vec![(0, public_key), (2, -g)], C::zero())
}

#[derive(Clone, Debug, PartialEq, Eq, CanonicalSerialize, CanonicalDeserialize)]
pub struct TagCreationListProof<C: CurveGroup> {
    /// `k·G`, the prover's share of the collective key.
    pub public_key: C,
    /// `s·G`, the prover's tag commitment.
    pub commitment: C,
    pub entries: Vec<TagCreationProof<C>>,
}

impl<C: CurveGroup> TagCreationListProof<C> {
    /// Structural checks only: every entry's proof fits its statement.
    pub fn validate(&self) -> Result<()> {
        for (index, entry) in self.entries.iter().enumerate() {
            creation_statement(self.public_key, self.commitment, &entry.original, &entry.result)
                .check_shape(&entry.proof)
                .map_err(|err| at_entry(index, err))?;
        }
        Ok(())
    }

    pub fn verify_entries(&self) -> Vec<bool> {
        self.entries.iter().map(|entry| self.verify_entry(entry)).collect()
    }

    pub fn verify(&self) -> bool {
        self.entries.iter().all(|entry| self.verify_entry(entry))
    }

    fn verify_entry(&self, entry: &TagCreationProof<C>) -> bool {
        let statement =
            creation_statement(self.public_key, self.commitment, &entry.original, &entry.result);
        entry.proof.verify(CREATION_DOMAIN, &statement)
    }
}

fn at_entry(index: usize, err: ProtocolError) -> ProtocolError {
    match err {
        ProtocolError::MalformedProof(reason) => {
            ProtocolError::MalformedProof(format!("entry {index}: {reason}"))
        }
        other => other,
    }
}

/// `(K, C) → (s·K, s·(C − k·K))` for every component.
pub fn deterministic_tag_sequence<C: CurveGroup>(
    vector: &CipherVector<C>,
    secret_key: &C::ScalarField,
    tag_secret: &C::ScalarField,
) -> CipherVector<C> {
    vector
        .iter()
        .map(|ct| CipherText::new(ct.k * *tag_secret, (ct.c - ct.k * *secret_key) * *tag_secret))
        .collect()
}

#[tracing::instrument(target = LOG_TARGET, skip_all, fields(len = originals.len()))]
pub fn tag_creation_list_proof_creation<C: CurveGroup, R: Rng>(
    originals: &CipherVector<C>,
    results: &CipherVector<C>,
    public_key: C,
    secret_key: &C::ScalarField,
    tag_secret: &C::ScalarField,
    rng: &mut R,
) -> Result<TagCreationListProof<C>> {
    if originals.len() != results.len() {
        return Err(ProtocolError::length_mismatch(originals.len(), results.len()));
    }
    let commitment = C::generator() * *tag_secret;
    let mut product = *tag_secret * secret_key;
    let witnesses = [*tag_secret, *secret_key, product];
    let entries = originals
        .iter()
        .zip(results.iter())
        .map(|(original, result)| {
            let statement = creation_statement(public_key, commitment, original, result);
            let proof = ChaumPedersenProof::prove(CREATION_DOMAIN, &statement, &witnesses, rng)?;
            Ok(TagCreationProof {
                original: *original,
                result: *result,
                proof,
            })
        })
        .collect::<Result<Vec<_>>>();
    product.zeroize();
    Ok(TagCreationListProof {
        public_key,
        commitment,
        entries: entries?,
    })
}

/// Output of one node's tagging step.
#[derive(Clone, Debug)]
pub struct TaggingStep<C: CurveGroup> {
    pub vector: CipherVector<C>,
    pub addition_proof: Option<TagAdditionListProof<C>>,
    pub creation_proof: Option<TagCreationListProof<C>>,
}

/// A node's tagging secrets: its share of the collective key and its tag
/// secret. Neither ever leaves the node.
pub struct TaggingNode<C: CurveGroup> {
    key_pair: KeyPair<C>,
    tag_secret: C::ScalarField,
}

impl<C: CurveGroup> TaggingNode<C> {
    pub fn new(key_pair: KeyPair<C>, tag_secret: C::ScalarField) -> Self {
        Self {
            key_pair,
            tag_secret,
        }
    }

    pub fn generate<R: Rng>(key_pair: KeyPair<C>, rng: &mut R) -> Self {
        let mut tag_secret = C::ScalarField::rand(rng);
        while tag_secret.is_zero() {
            tag_secret = C::ScalarField::rand(rng);
        }
        Self::new(key_pair, tag_secret)
    }

    pub fn public_key(&self) -> C {
        self.key_pair.public_key()
    }

    pub fn tag_commitment(&self) -> C {
        C::generator() * self.tag_secret
    }

    /// Adds the tag commitment to every masked component.
    pub fn add_contribution(&self, vector: &CipherVector<C>) -> CipherVector<C> {
        let to_add = self.tag_commitment();
        vector
            .iter()
            .map(|ct| CipherText::new(ct.k, ct.c + to_add))
            .collect()
    }

    pub fn create_tags(&self, vector: &CipherVector<C>) -> CipherVector<C> {
        deterministic_tag_sequence(vector, self.key_pair.secret(), &self.tag_secret)
    }

    /// Runs both phases over `vector`, producing proofs when requested.
    #[tracing::instrument(target = LOG_TARGET, skip_all, fields(len = vector.len(), proofs))]
    pub fn tag_step<R: Rng>(
        &self,
        vector: &CipherVector<C>,
        proofs: bool,
        rng: &mut R,
    ) -> Result<TaggingStep<C>> {
        let added = self.add_contribution(vector);
        let tagged = self.create_tags(&added);

        let (addition_proof, creation_proof) = if proofs {
            let addition = tag_addition_list_proof_creation(
                vector,
                &self.tag_secret,
                self.tag_commitment(),
                &added,
                rng,
            )?;
            let creation = tag_creation_list_proof_creation(
                &added,
                &tagged,
                self.public_key(),
                self.key_pair.secret(),
                &self.tag_secret,
                rng,
            )?;
            (Some(addition), Some(creation))
        } else {
            (None, None)
        };

        tracing::debug!(target: LOG_TARGET, "applied tagging step");
        Ok(TaggingStep {
            vector: tagged,
            addition_proof,
            creation_proof,
        })
    }
}

impl<C: CurveGroup> Drop for TaggingNode<C> {
    fn drop(&mut self) {
        self.tag_secret.zeroize();
    }
}
