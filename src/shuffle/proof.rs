//! Terelius-Wikström proof of shuffle over records of equal width.
//!
//! Notation: inputs `w_i`, outputs `w'_j`, permutation `π` with
//! `w'_{π(i)} = ReEnc(w_i, β_i)`, independent generators `h_j`.
//!
//! The prover commits to `π` with `u_i = r_i·g + h_{π(i)}`, receives
//! challenges `e_i`, and shows with a single sigma protocol that
//!
//! - `Σ e_i·u_i` opens to `Σ e'_j·h_j` where `e'_{π(i)} = e_i`,
//! - the bridging chain `B_j = b_j·g + e'_j·B_{j−1}` ends at `Π e_i·h_0`,
//! - `Σ u_i − Σ h_j` is a multiple of `g` (so the committed matrix is
//!   a permutation matrix),
//! - `Σ e_i·w_i = Σ e'_j·w'_j − f·(g, pk)`.

use ark_ec::CurveGroup;
use ark_ff::{Field, One, UniformRand, Zero};
use ark_serialize::{CanonicalDeserialize, CanonicalSerialize};
use ark_std::rand::Rng;
use rayon::prelude::*;
use zeroize::Zeroize;

use crate::ciphertext::{CipherText, CipherVector};
use crate::error::{ProtocolError, Result};
use crate::transcript::ProofTranscript;

use super::{derive_generators, record_width};

const LOG_TARGET: &str = "unlynx::shuffle::proof";

const SHUFFLE_DOMAIN: &str = "unlynx/shuffle/v1";

#[derive(Clone, Debug, PartialEq, Eq, CanonicalSerialize, CanonicalDeserialize)]
pub struct ShuffleCommitments<C: CurveGroup> {
    /// Permutation commitments `u_i`.
    pub permutation: Vec<C>,
    /// Bridging commitments `B_j`.
    pub bridging: Vec<C>,
    pub a_prime: C,
    pub b_prime: Vec<C>,
    pub c_prime: C,
    pub d_prime: C,
    /// One ciphertext per record column.
    pub f_prime: CipherVector<C>,
}

#[derive(Clone, Debug, PartialEq, Eq, CanonicalSerialize, CanonicalDeserialize)]
pub struct ShuffleResponses<F: Field> {
    pub k_a: F,
    pub k_b: Vec<F>,
    pub k_c: F,
    pub k_d: F,
    pub k_e: Vec<F>,
    pub k_f: F,
}

#[derive(Clone, Debug, PartialEq, Eq, CanonicalSerialize, CanonicalDeserialize)]
pub struct ShuffleProof<C: CurveGroup> {
    pub commitments: ShuffleCommitments<C>,
    pub responses: ShuffleResponses<C::ScalarField>,
}

/// `Σ weight_i · vectors_i`, column by column.
fn weighted_sum<C: CurveGroup>(
    vectors: &[CipherVector<C>],
    weights: &[C::ScalarField],
    width: usize,
) -> CipherVector<C> {
    vectors
        .par_iter()
        .zip(weights.par_iter())
        .map(|(vector, weight)| vector.iter().map(|ct| ct.scale(*weight)).collect::<Vec<_>>())
        .reduce(
            || vec![CipherText::zero(); width],
            |mut acc, next| {
                acc.iter_mut().zip(next).for_each(|(a, b)| *a += b);
                acc
            },
        )
        .into()
}

fn multi_scalar<C: CurveGroup>(bases: &[C], scalars: &[C::ScalarField]) -> C {
    bases
        .par_iter()
        .zip(scalars.par_iter())
        .map(|(base, scalar)| *base * scalar)
        .reduce(C::zero, |acc, next| acc + next)
}

struct ShuffleStatement<'a, C: CurveGroup> {
    g: C,
    public_key: C,
    generators: Vec<C>,
    inputs: &'a [CipherVector<C>],
    outputs: &'a [CipherVector<C>],
    width: usize,
}

impl<'a, C: CurveGroup> ShuffleStatement<'a, C> {
    fn new(
        g: C,
        public_key: C,
        inputs: &'a [CipherVector<C>],
        outputs: &'a [CipherVector<C>],
    ) -> Result<Self> {
        if inputs.is_empty() {
            return Err(ProtocolError::InvalidInput("cannot prove an empty shuffle".into()));
        }
        if inputs.len() != outputs.len() {
            return Err(ProtocolError::length_mismatch(inputs.len(), outputs.len()));
        }
        let width = record_width(inputs)?;
        let output_width = record_width(outputs)?;
        if width != output_width {
            return Err(ProtocolError::length_mismatch(width, output_width));
        }
        Ok(Self {
            g,
            public_key,
            generators: derive_generators(inputs.len(), b"shuffle")?,
            inputs,
            outputs,
            width,
        })
    }

    fn len(&self) -> usize {
        self.inputs.len()
    }

    fn transcript(&self, permutation_commitments: &[C]) -> Result<ProofTranscript> {
        let mut transcript = ProofTranscript::new(SHUFFLE_DOMAIN);
        transcript.append_point(b"g", &self.g)?;
        transcript.append_point(b"pk", &self.public_key)?;
        transcript.append_points(b"h", &self.generators)?;
        transcript.append_u64(b"width", self.width as u64);
        for input in self.inputs {
            transcript.append_ciphertexts(b"w", input)?;
        }
        for output in self.outputs {
            transcript.append_ciphertexts(b"w_prime", output)?;
        }
        transcript.append_points(b"u", permutation_commitments)?;
        Ok(transcript)
    }

    fn challenge_v(
        transcript: &mut ProofTranscript,
        commitments: &ShuffleCommitments<C>,
    ) -> Result<C::ScalarField> {
        transcript.append_points(b"bridging", &commitments.bridging)?;
        transcript.append_point(b"a_prime", &commitments.a_prime)?;
        transcript.append_points(b"b_prime", &commitments.b_prime)?;
        transcript.append_point(b"c_prime", &commitments.c_prime)?;
        transcript.append_point(b"d_prime", &commitments.d_prime)?;
        transcript.append_ciphertexts(b"f_prime", &commitments.f_prime)?;
        Ok(transcript.challenge_scalar(b"v"))
    }
}

fn is_permutation(permutation: &[usize]) -> bool {
    let mut seen = vec![false; permutation.len()];
    permutation.iter().all(|&target| {
        target < seen.len() && !std::mem::replace(&mut seen[target], true)
    })
}

impl<C: CurveGroup> ShuffleProof<C> {
    /// Builds a proof that `outputs[permutation[i]]` re-encrypts `inputs[i]`
    /// with `betas[i]` under `(g, public_key)`.
    ///
    /// Only the shapes are checked; wrong secrets or a wrong key produce a
    /// proof that fails verification.
    #[tracing::instrument(target = LOG_TARGET, skip_all, fields(records = inputs.len()))]
    pub fn prove<R: Rng>(
        g: C,
        public_key: C,
        inputs: &[CipherVector<C>],
        outputs: &[CipherVector<C>],
        permutation: &[usize],
        betas: &[C::ScalarField],
        rng: &mut R,
    ) -> Result<Self> {
        let statement = ShuffleStatement::new(g, public_key, inputs, outputs)?;
        let n = statement.len();
        if permutation.len() != n {
            return Err(ProtocolError::length_mismatch(n, permutation.len()));
        }
        if betas.len() != n {
            return Err(ProtocolError::length_mismatch(n, betas.len()));
        }
        if !is_permutation(permutation) {
            return Err(ProtocolError::InvalidInput("not a permutation".into()));
        }
        let h = &statement.generators;

        let mut r: Vec<C::ScalarField> = (0..n).map(|_| C::ScalarField::rand(rng)).collect();
        let u: Vec<C> = (0..n).map(|i| g * r[i] + h[permutation[i]]).collect();

        let mut transcript = statement.transcript(&u)?;
        let e: Vec<C::ScalarField> = transcript.challenge_scalars(b"e", n);
        let mut e_prime = vec![C::ScalarField::zero(); n];
        for (i, target) in permutation.iter().enumerate() {
            e_prime[*target] = e[i];
        }

        // Bridging chain, anchored at h_0.
        let mut b: Vec<C::ScalarField> = (0..n).map(|_| C::ScalarField::rand(rng)).collect();
        let mut bridging = Vec::with_capacity(n);
        let mut previous = h[0];
        for j in 0..n {
            let current = g * b[j] + previous * e_prime[j];
            bridging.push(current);
            previous = current;
        }

        let alpha = C::ScalarField::rand(rng);
        let mut beta_prime: Vec<C::ScalarField> =
            (0..n).map(|_| C::ScalarField::rand(rng)).collect();
        let mut epsilon: Vec<C::ScalarField> = (0..n).map(|_| C::ScalarField::rand(rng)).collect();
        let gamma = C::ScalarField::rand(rng);
        let delta = C::ScalarField::rand(rng);
        let phi = C::ScalarField::rand(rng);

        let a_prime = g * alpha + multi_scalar(h, &epsilon);
        let b_prime: Vec<C> = (0..n)
            .map(|j| {
                let previous = if j == 0 { h[0] } else { bridging[j - 1] };
                g * beta_prime[j] + previous * epsilon[j]
            })
            .collect();
        let blind = CipherText::new(g * phi, public_key * phi);
        let f_prime: CipherVector<C> = weighted_sum(outputs, &epsilon, statement.width)
            .into_iter()
            .map(|ct| ct - blind)
            .collect();

        let commitments = ShuffleCommitments {
            permutation: u,
            bridging,
            a_prime,
            b_prime,
            c_prime: g * gamma,
            d_prime: g * delta,
            f_prime,
        };
        let v = ShuffleStatement::challenge_v(&mut transcript, &commitments)?;

        let a: C::ScalarField = r.iter().zip(&e).map(|(r, e)| *r * e).sum();
        let c: C::ScalarField = r.iter().sum();
        let f: C::ScalarField = betas.iter().zip(&e).map(|(beta, e)| *beta * e).sum();
        let mut d = b[0];
        for j in 1..n {
            d = b[j] + e_prime[j] * d;
        }

        let responses = ShuffleResponses {
            k_a: v * a + alpha,
            k_b: b.iter().zip(&beta_prime).map(|(b, bp)| v * b + bp).collect(),
            k_c: v * c + gamma,
            k_d: v * d + delta,
            k_e: e_prime.iter().zip(&epsilon).map(|(e, eps)| v * e + eps).collect(),
            k_f: v * f + phi,
        };

        r.zeroize();
        b.zeroize();
        beta_prime.zeroize();
        epsilon.zeroize();

        Ok(Self {
            commitments,
            responses,
        })
    }

    fn check_shape(&self, n: usize, width: usize) -> Result<()> {
        let commitments = &self.commitments;
        let responses = &self.responses;
        let lengths = [
            commitments.permutation.len(),
            commitments.bridging.len(),
            commitments.b_prime.len(),
            responses.k_b.len(),
            responses.k_e.len(),
        ];
        if lengths.iter().any(|len| *len != n) || commitments.f_prime.len() != width {
            return Err(ProtocolError::MalformedProof(format!(
                "shuffle proof does not match {n} records of width {width}"
            )));
        }
        Ok(())
    }

    /// Structural problems are errors; a proof that does not establish the
    /// shuffle is `Ok(false)`.
    #[tracing::instrument(target = LOG_TARGET, skip_all, fields(records = inputs.len()))]
    pub fn verify(
        &self,
        g: C,
        public_key: C,
        inputs: &[CipherVector<C>],
        outputs: &[CipherVector<C>],
    ) -> Result<bool> {
        let statement = ShuffleStatement::new(g, public_key, inputs, outputs)?;
        let n = statement.len();
        self.check_shape(n, statement.width)?;

        let commitments = &self.commitments;
        let responses = &self.responses;
        let h = &statement.generators;

        let mut transcript = statement.transcript(&commitments.permutation)?;
        let e: Vec<C::ScalarField> = transcript.challenge_scalars(b"e", n);
        let v = ShuffleStatement::challenge_v(&mut transcript, commitments)?;

        let big_a = multi_scalar(&commitments.permutation, &e);
        let big_c = commitments.permutation.iter().fold(C::zero(), |acc, u| acc + u)
            - h.iter().fold(C::zero(), |acc, h| acc + h);
        let e_product = e.iter().fold(C::ScalarField::one(), |acc, e| acc * e);
        let big_d = commitments.bridging[n - 1] - h[0] * e_product;
        let big_f = weighted_sum(inputs, &e, statement.width);

        let check_a = big_a * v + commitments.a_prime
            == g * responses.k_a + multi_scalar(h, &responses.k_e);

        let check_b = (0..n).into_par_iter().all(|j| {
            let previous = if j == 0 { h[0] } else { commitments.bridging[j - 1] };
            commitments.bridging[j] * v + commitments.b_prime[j]
                == g * responses.k_b[j] + previous * responses.k_e[j]
        });

        let check_c = big_c * v + commitments.c_prime == g * responses.k_c;
        let check_d = big_d * v + commitments.d_prime == g * responses.k_d;

        let blind = CipherText::new(g * responses.k_f, public_key * responses.k_f);
        let rhs_f = weighted_sum(outputs, &responses.k_e, statement.width);
        let check_f = big_f
            .iter()
            .zip(commitments.f_prime.iter())
            .zip(rhs_f.iter())
            .all(|((big_f, f_prime), rhs)| big_f.scale(v) + *f_prime == *rhs - blind);

        let valid = check_a && check_b && check_c && check_d && check_f;
        if !valid {
            tracing::warn!(
                target: LOG_TARGET,
                check_a,
                check_b,
                check_c,
                check_d,
                check_f,
                "shuffle proof rejected"
            );
        }
        Ok(valid)
    }
}
