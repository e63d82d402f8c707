//! Verifiable shuffling of ciphertext records.
//!
//! A shuffle permutes a list of records (each a [`CipherVector`] of the same
//! width) and re-randomizes every record with one scalar shared by all of its
//! components, so columns stay aligned inside a record while records become
//! unlinkable to their origin.

mod proof;

pub use proof::{ShuffleCommitments, ShuffleProof, ShuffleResponses};

use ark_ec::{AffineRepr, CurveGroup};
use ark_ff::{UniformRand, Zero};
use ark_serialize::{CanonicalDeserialize, CanonicalSerialize};
use ark_std::rand::seq::SliceRandom;
use ark_std::rand::Rng;
use rayon::prelude::*;
use sha2::{Digest, Sha256};

use crate::ciphertext::CipherVector;
use crate::error::{ProtocolError, Result};

const LOG_TARGET: &str = "unlynx::shuffle";

const GENERATOR_DOMAIN: &[u8] = b"unlynx/shuffle/generators/v1";

/// Derives `count` group elements with no known discrete log relation to
/// the generator or to each other (try-and-increment over SHA-256).
pub fn derive_generators<C: CurveGroup>(count: usize, context: &[u8]) -> Result<Vec<C>> {
    (0..count)
        .into_par_iter()
        .map(|index| {
            for counter in 0u32..1024 {
                let mut hasher = Sha256::new();
                hasher.update(GENERATOR_DOMAIN);
                hasher.update((context.len() as u32).to_be_bytes());
                hasher.update(context);
                hasher.update((index as u64).to_be_bytes());
                hasher.update(counter.to_be_bytes());
                let digest = hasher.finalize();
                if let Some(point) = C::Affine::from_random_bytes(&digest) {
                    let point = point.clear_cofactor().into_group();
                    if !point.is_zero() {
                        return Ok(point);
                    }
                }
            }
            Err(ProtocolError::InvalidInput(format!(
                "could not derive generator {index}"
            )))
        })
        .collect()
}

/// Width shared by every record, or `LengthMismatch` for the first record
/// that differs.
pub fn record_width<C: CurveGroup>(records: &[CipherVector<C>]) -> Result<usize> {
    let width = records.first().map_or(0, |record| record.len());
    match records.iter().find(|record| record.len() != width) {
        Some(record) => Err(ProtocolError::length_mismatch(width, record.len())),
        None => Ok(width),
    }
}

pub fn random_permutation<R: Rng>(n: usize, rng: &mut R) -> Vec<usize> {
    let mut permutation: Vec<usize> = (0..n).collect();
    permutation.shuffle(rng);
    permutation
}

/// Pads a single record with an all-zero record of the same width; the
/// shuffle argument needs at least two records. Other sizes are returned
/// unchanged.
pub fn pad_for_shuffle<C: CurveGroup>(records: &[CipherVector<C>]) -> Vec<CipherVector<C>> {
    let mut padded = records.to_vec();
    if let [only] = records {
        padded.push(CipherVector::zeros(only.len()));
    }
    padded
}

/// The secret and public outcome of one shuffle.
#[derive(Clone, Debug)]
pub struct ShuffleSequence<C: CurveGroup> {
    /// The inputs actually shuffled (after padding).
    pub inputs: Vec<CipherVector<C>>,
    pub outputs: Vec<CipherVector<C>>,
    /// `outputs[permutation[i]]` comes from `inputs[i]`.
    pub permutation: Vec<usize>,
    pub betas: Vec<C::ScalarField>,
}

/// Permutes and re-randomizes `records` under `(g, public_key)`.
#[tracing::instrument(target = LOG_TARGET, skip_all, fields(records = records.len()))]
pub fn shuffle_sequence<C: CurveGroup, R: Rng>(
    records: &[CipherVector<C>],
    g: C,
    public_key: C,
    rng: &mut R,
) -> Result<ShuffleSequence<C>> {
    if records.is_empty() {
        return Err(ProtocolError::InvalidInput("cannot shuffle an empty list".into()));
    }
    record_width(records)?;
    let inputs = pad_for_shuffle(records);
    let n = inputs.len();

    let permutation = random_permutation(n, rng);
    let betas: Vec<C::ScalarField> = (0..n).map(|_| C::ScalarField::rand(rng)).collect();

    let mut outputs = vec![CipherVector::default(); n];
    let re_encrypted: Vec<CipherVector<C>> = inputs
        .par_iter()
        .zip(betas.par_iter())
        .map(|(record, beta)| record.re_encrypt(g, public_key, *beta))
        .collect();
    for (i, record) in re_encrypted.into_iter().enumerate() {
        outputs[permutation[i]] = record;
    }

    tracing::debug!(target: LOG_TARGET, records = n, "shuffled records");
    Ok(ShuffleSequence {
        inputs,
        outputs,
        permutation,
        betas,
    })
}

/// A shuffle proof together with everything needed to check it.
#[derive(Clone, Debug, PartialEq, Eq, CanonicalSerialize, CanonicalDeserialize)]
pub struct PublishedShuffleProof<C: CurveGroup> {
    pub g: C,
    pub public_key: C,
    pub inputs: Vec<CipherVector<C>>,
    pub outputs: Vec<CipherVector<C>>,
    pub proof: ShuffleProof<C>,
}

impl<C: CurveGroup> PublishedShuffleProof<C> {
    /// Proves `sequence` against `public_key`. A key other than the one the
    /// sequence was built with still yields a proof, one that fails
    /// verification.
    pub fn create<R: Rng>(
        sequence: &ShuffleSequence<C>,
        g: C,
        public_key: C,
        rng: &mut R,
    ) -> Result<Self> {
        let proof = ShuffleProof::prove(
            g,
            public_key,
            &sequence.inputs,
            &sequence.outputs,
            &sequence.permutation,
            &sequence.betas,
            rng,
        )?;
        Ok(Self {
            g,
            public_key,
            inputs: sequence.inputs.clone(),
            outputs: sequence.outputs.clone(),
            proof,
        })
    }

    /// Checks the list shapes without any group arithmetic.
    pub fn validate(&self) -> Result<()> {
        if self.inputs.is_empty() {
            return Err(ProtocolError::MalformedProof("shuffle proof without records".into()));
        }
        if self.inputs.len() != self.outputs.len() {
            return Err(ProtocolError::length_mismatch(self.inputs.len(), self.outputs.len()));
        }
        let width = record_width(&self.inputs)?;
        let output_width = record_width(&self.outputs)?;
        if width != output_width {
            return Err(ProtocolError::length_mismatch(width, output_width));
        }
        let n = self.inputs.len();
        let commitments = &self.proof.commitments;
        if commitments.permutation.len() != n
            || commitments.bridging.len() != n
            || commitments.b_prime.len() != n
            || commitments.f_prime.len() != width
            || self.proof.responses.k_b.len() != n
            || self.proof.responses.k_e.len() != n
        {
            return Err(ProtocolError::MalformedProof(
                "shuffle proof lengths do not match its records".into(),
            ));
        }
        Ok(())
    }

    pub fn verify(&self) -> Result<bool> {
        self.validate()?;
        self.proof
            .verify(self.g, self.public_key, &self.inputs, &self.outputs)
    }
}
