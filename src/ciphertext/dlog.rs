use std::collections::HashMap;

use ark_ec::CurveGroup;

use crate::crypto_serde::to_canonical_bytes;
use crate::error::{ProtocolError, Result};

const LOG_TARGET: &str = "unlynx::ciphertext::dlog";

/// Precomputed `i·G` for `i ∈ [0, bound]`, used to map decrypted points back
/// to integers in `[-bound, bound]`.
#[derive(Clone, Debug)]
pub struct DiscreteLogTable<C: CurveGroup> {
    bound: u64,
    points: HashMap<Vec<u8>, i64>,
    _curve: std::marker::PhantomData<C>,
}

impl<C: CurveGroup> DiscreteLogTable<C> {
    /// `bound` must fit a signed 64-bit integer and an in-memory table.
    #[tracing::instrument(target = LOG_TARGET, skip_all, fields(bound))]
    pub fn new(bound: u64) -> Result<Self> {
        let last = i64::try_from(bound).map_err(|_| {
            ProtocolError::InvalidInput(format!("table bound {bound} exceeds i64::MAX"))
        })?;
        let too_large =
            || ProtocolError::InvalidInput(format!("table bound {bound} does not fit in memory"));
        let capacity = usize::try_from(bound)
            .ok()
            .and_then(|bound| bound.checked_add(1))
            .ok_or_else(too_large)?;
        let mut points = HashMap::new();
        points.try_reserve(capacity).map_err(|_| too_large())?;
        let generator = C::generator();
        let mut current = C::zero();
        for i in 0..=last {
            points.insert(to_canonical_bytes(&current)?, i);
            current += generator;
        }
        tracing::debug!(target: LOG_TARGET, entries = points.len(), "built discrete log table");
        Ok(Self {
            bound,
            points,
            _curve: std::marker::PhantomData,
        })
    }

    pub fn bound(&self) -> u64 {
        self.bound
    }

    /// Returns `m` such that `point = m·G`, or `NotFound` when `|m| > bound`.
    pub fn lookup(&self, point: &C) -> Result<i64> {
        if let Some(value) = self.points.get(&to_canonical_bytes(point)?) {
            return Ok(*value);
        }
        match self.points.get(&to_canonical_bytes(&-*point)?) {
            Some(value) => Ok(-*value),
            None => Err(ProtocolError::NotFound),
        }
    }
}
