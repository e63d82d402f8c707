//! Generalised Chaum-Pedersen proofs.
//!
//! A [`LinearStatement`] is a set of equations `Σ_j x_{w_j}·B_j = T` over a
//! shared witness vector `x`. The prover commits `R_e = Σ_j ω_{w_j}·B_j` for
//! every equation, derives the challenge `c` from the statement and the
//! commitments, and answers `z_w = ω_w + c·x_w`. The verifier checks
//! `Σ_j z_{w_j}·B_j = R_e + c·T_e` for every equation.
//!
//! Discrete-log equality (`A = x·G`, `B = x·H`) is the two-equation,
//! one-witness case; the tagging and key switching proofs are larger
//! instances.

use ark_ec::CurveGroup;
use ark_ff::UniformRand;
use ark_serialize::{CanonicalDeserialize, CanonicalSerialize};
use ark_std::rand::Rng;
use zeroize::Zeroize;

use crate::error::{ProtocolError, Result};
use crate::transcript::ProofTranscript;

const LOG_TARGET: &str = "unlynx::chaum_pedersen";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Equation<C: CurveGroup> {
    /// `(witness index, base)` pairs.
    pub terms: Vec<(usize, C)>,
    pub target: C,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinearStatement<C: CurveGroup> {
    witness_count: usize,
    equations: Vec<Equation<C>>,
}

impl<C: CurveGroup> LinearStatement<C> {
    pub fn new(witness_count: usize) -> Self {
        Self {
            witness_count,
            equations: Vec::new(),
        }
    }

    /// Adds `Σ x_w·base = target`.
    pub fn equation(mut self, terms: Vec<(usize, C)>, target: C) -> Self {
        self.equations.push(Equation { terms, target });
        self
    }

    /// `a = x·g` and `b = x·h`.
    pub fn dleq(g: C, a: C, h: C, b: C) -> Self {
        Self::new(1).equation(vec![(0, g)], a).equation(vec![(0, h)], b)
    }

    pub fn witness_count(&self) -> usize {
        self.witness_count
    }

    pub fn equations(&self) -> &[Equation<C>] {
        &self.equations
    }

    fn write_transcript(&self, transcript: &mut ProofTranscript) -> Result<()> {
        transcript.append_u64(b"witnesses", self.witness_count as u64);
        transcript.append_u64(b"equations", self.equations.len() as u64);
        for equation in &self.equations {
            transcript.append_u64(b"terms", equation.terms.len() as u64);
            for (index, base) in &equation.terms {
                transcript.append_u64(b"index", *index as u64);
                transcript.append_point(b"base", base)?;
            }
            transcript.append_point(b"target", &equation.target)?;
        }
        Ok(())
    }

    fn challenge(&self, domain: &'static str, commitments: &[C]) -> Result<C::ScalarField> {
        let mut transcript = ProofTranscript::new(domain);
        self.write_transcript(&mut transcript)?;
        transcript.append_points(b"commitments", commitments)?;
        Ok(transcript.challenge_scalar(b"challenge"))
    }

    /// Fails with `MalformedProof` unless `proof` carries one commitment per
    /// equation and one response per witness.
    pub fn check_shape(&self, proof: &ChaumPedersenProof<C>) -> Result<()> {
        if proof.commitments.len() != self.equations.len()
            || proof.responses.len() != self.witness_count
        {
            return Err(ProtocolError::MalformedProof(format!(
                "expected {} commitments and {} responses, found {} and {}",
                self.equations.len(),
                self.witness_count,
                proof.commitments.len(),
                proof.responses.len()
            )));
        }
        Ok(())
    }

    fn has_valid_indices(&self) -> bool {
        self.equations
            .iter()
            .flat_map(|equation| equation.terms.iter())
            .all(|(index, _)| *index < self.witness_count)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, CanonicalSerialize, CanonicalDeserialize)]
pub struct ChaumPedersenProof<C: CurveGroup> {
    pub commitments: Vec<C>,
    pub responses: Vec<C::ScalarField>,
}

impl<C: CurveGroup> ChaumPedersenProof<C> {
    /// Proves knowledge of `witnesses` satisfying `statement`.
    ///
    /// The witnesses are not checked against the statement: a false
    /// statement yields a proof that fails verification.
    pub fn prove<R: Rng>(
        domain: &'static str,
        statement: &LinearStatement<C>,
        witnesses: &[C::ScalarField],
        rng: &mut R,
    ) -> Result<Self> {
        if witnesses.len() != statement.witness_count {
            return Err(ProtocolError::length_mismatch(
                statement.witness_count,
                witnesses.len(),
            ));
        }
        if !statement.has_valid_indices() {
            return Err(ProtocolError::InvalidInput(
                "equation references a witness outside the statement".into(),
            ));
        }

        let mut nonces: Vec<C::ScalarField> = (0..statement.witness_count)
            .map(|_| C::ScalarField::rand(rng))
            .collect();
        let commitments: Vec<C> = statement
            .equations
            .iter()
            .map(|equation| {
                equation
                    .terms
                    .iter()
                    .fold(C::zero(), |acc, (index, base)| acc + *base * nonces[*index])
            })
            .collect();

        let challenge = statement.challenge(domain, &commitments)?;
        let responses = nonces
            .iter()
            .zip(witnesses)
            .map(|(nonce, witness)| *nonce + challenge * witness)
            .collect();
        nonces.zeroize();

        Ok(Self {
            commitments,
            responses,
        })
    }

    pub fn verify(&self, domain: &'static str, statement: &LinearStatement<C>) -> bool {
        if self.commitments.len() != statement.equations.len()
            || self.responses.len() != statement.witness_count
            || !statement.has_valid_indices()
        {
            tracing::warn!(
                target: LOG_TARGET,
                domain,
                commitments = self.commitments.len(),
                responses = self.responses.len(),
                "proof shape does not match its statement"
            );
            return false;
        }

        let challenge = match statement.challenge(domain, &self.commitments) {
            Ok(challenge) => challenge,
            Err(err) => {
                tracing::warn!(target: LOG_TARGET, domain, error = %err, "could not rebuild the challenge");
                return false;
            }
        };
        let valid = statement
            .equations
            .iter()
            .zip(&self.commitments)
            .all(|(equation, commitment)| {
                let lhs = equation.terms.iter().fold(C::zero(), |acc, (index, base)| {
                    acc + *base * self.responses[*index]
                });
                lhs == *commitment + equation.target * challenge
            });
        tracing::debug!(target: LOG_TARGET, domain, valid, "verified linear relation proof");
        valid
    }
}
