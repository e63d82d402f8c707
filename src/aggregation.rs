//! Proofs that a ciphertext is the homomorphic sum of a list of terms.
//!
//! Creating a proof never fails and never checks the claim; verification
//! recomputes the sum and is the only place a wrong claim is caught.

use ark_ec::CurveGroup;
use ark_serialize::{CanonicalDeserialize, CanonicalSerialize};

use crate::ciphertext::{CipherText, CipherVector};
use crate::error::{ProtocolError, Result};

const LOG_TARGET: &str = "unlynx::aggregation";

#[derive(Clone, Debug, PartialEq, Eq, CanonicalSerialize, CanonicalDeserialize)]
pub struct AggregationProof<C: CurveGroup> {
    pub terms: CipherVector<C>,
    pub claimed_sum: CipherText<C>,
}

pub fn aggregation_proof_creation<C: CurveGroup>(
    terms: &CipherVector<C>,
    claimed_sum: CipherText<C>,
) -> AggregationProof<C> {
    AggregationProof {
        terms: terms.clone(),
        claimed_sum,
    }
}

impl<C: CurveGroup> AggregationProof<C> {
    pub fn verify(&self) -> bool {
        let valid = self.terms.sum() == self.claimed_sum;
        if !valid {
            tracing::warn!(
                target: LOG_TARGET,
                terms = self.terms.len(),
                "claimed sum does not match the terms"
            );
        }
        valid
    }
}

/// One proof per column of `records`: column `j` sums to `sums[j]`.
#[tracing::instrument(target = LOG_TARGET, skip_all, fields(records = records.len()))]
pub fn aggregation_list_proof_creation<C: CurveGroup>(
    records: &[CipherVector<C>],
    sums: &CipherVector<C>,
) -> Result<Vec<AggregationProof<C>>> {
    if let Some(record) = records.iter().find(|record| record.len() != sums.len()) {
        return Err(ProtocolError::length_mismatch(sums.len(), record.len()));
    }
    Ok((0..sums.len())
        .map(|column| {
            let terms: CipherVector<C> = records.iter().map(|record| record[column]).collect();
            aggregation_proof_creation(&terms, sums[column])
        })
        .collect())
}

/// Column-wise sums of `records`, the identity vector of `width` when empty.
pub fn column_sums<C: CurveGroup>(records: &[CipherVector<C>], width: usize) -> Result<CipherVector<C>> {
    records
        .iter()
        .try_fold(CipherVector::zeros(width), |acc, record| acc.try_add(record))
}
