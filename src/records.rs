//! Client records and the reshaping each protocol needs.
//!
//! Every flattening returns the per-record component counts, and the inverse
//! re-slices with exactly those counts.

use std::collections::BTreeMap;

use ark_ec::CurveGroup;
use ark_serialize::{CanonicalDeserialize, CanonicalSerialize};
use serde::{Deserialize, Serialize};

use crate::ciphertext::CipherVector;
use crate::deterministic_tag::{DeterministicTag, GroupingKey};
use crate::error::{ProtocolError, Result};

#[derive(
    Clone,
    Debug,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    CanonicalSerialize,
    CanonicalDeserialize,
)]
#[serde(bound(
    serialize = "C: CanonicalSerialize",
    deserialize = "C: CanonicalDeserialize"
))]
#[serde(rename_all = "camelCase")]
pub struct ClientRecord<C: CurveGroup> {
    pub grouping: CipherVector<C>,
    /// "Where" attributes, tagged but never grouped on.
    pub non_deterministic: CipherVector<C>,
    pub aggregating: CipherVector<C>,
}

/// `[len(grouping), len(non_deterministic), len(aggregating)]` of one record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordLayout {
    pub grouping: usize,
    pub non_deterministic: usize,
    pub aggregating: usize,
}

impl RecordLayout {
    pub fn of<C: CurveGroup>(record: &ClientRecord<C>) -> Self {
        Self {
            grouping: record.grouping.len(),
            non_deterministic: record.non_deterministic.len(),
            aggregating: record.aggregating.len(),
        }
    }

    pub fn width(&self) -> usize {
        self.grouping + self.non_deterministic + self.aggregating
    }
}

impl<C: CurveGroup> ClientRecord<C> {
    pub fn layout(&self) -> RecordLayout {
        RecordLayout::of(self)
    }

    /// grouping ‖ non-deterministic ‖ aggregating.
    pub fn to_vector(&self) -> CipherVector<C> {
        self.grouping
            .iter()
            .chain(self.non_deterministic.iter())
            .chain(self.aggregating.iter())
            .copied()
            .collect()
    }

    pub fn from_vector(vector: &CipherVector<C>, layout: &RecordLayout) -> Result<Self> {
        if vector.len() != layout.width() {
            return Err(ProtocolError::length_mismatch(layout.width(), vector.len()));
        }
        Ok(Self {
            grouping: vector.slice(0, layout.grouping)?,
            non_deterministic: vector.slice(layout.grouping, layout.non_deterministic)?,
            aggregating: vector.slice(
                layout.grouping + layout.non_deterministic,
                layout.aggregating,
            )?,
        })
    }
}

pub fn flatten_records<C: CurveGroup>(
    records: &[ClientRecord<C>],
) -> (CipherVector<C>, Vec<RecordLayout>) {
    let mut flat = CipherVector::default();
    let mut layouts = Vec::with_capacity(records.len());
    for record in records {
        flat.extend(record.to_vector());
        layouts.push(record.layout());
    }
    (flat, layouts)
}

pub fn unflatten_records<C: CurveGroup>(
    flat: &CipherVector<C>,
    layouts: &[RecordLayout],
) -> Result<Vec<ClientRecord<C>>> {
    let total: usize = layouts.iter().map(RecordLayout::width).sum();
    if total != flat.len() {
        return Err(ProtocolError::length_mismatch(total, flat.len()));
    }
    let mut position = 0;
    layouts
        .iter()
        .map(|layout| {
            let record = ClientRecord::from_vector(&flat.slice(position, layout.width())?, layout)?;
            position += layout.width();
            Ok(record)
        })
        .collect()
}

/// One row per record for the shuffle. A lone record gets a companion with
/// the same grouping and where attributes and zero aggregating attributes.
pub fn to_shuffle_matrix<C: CurveGroup>(
    records: &[ClientRecord<C>],
) -> (Vec<CipherVector<C>>, Vec<RecordLayout>) {
    let mut padded = records.to_vec();
    if let [only] = records {
        padded.push(ClientRecord {
            grouping: only.grouping.clone(),
            non_deterministic: only.non_deterministic.clone(),
            aggregating: CipherVector::zeros(only.aggregating.len()),
        });
    }
    padded
        .iter()
        .map(|record| (record.to_vector(), record.layout()))
        .unzip()
}

pub fn from_shuffle_matrix<C: CurveGroup>(
    matrix: &[CipherVector<C>],
    layouts: &[RecordLayout],
) -> Result<Vec<ClientRecord<C>>> {
    if matrix.len() != layouts.len() {
        return Err(ProtocolError::length_mismatch(layouts.len(), matrix.len()));
    }
    matrix
        .iter()
        .zip(layouts)
        .map(|(row, layout)| ClientRecord::from_vector(row, layout))
        .collect()
}

/// Where attributes first, then grouping attributes, record after record.
pub fn tagging_input<C: CurveGroup>(records: &[ClientRecord<C>]) -> CipherVector<C> {
    records
        .iter()
        .flat_map(|record| record.non_deterministic.iter().chain(record.grouping.iter()))
        .copied()
        .collect()
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TaggedRecord<C: CurveGroup> {
    pub record: ClientRecord<C>,
    pub group_key: GroupingKey,
    pub where_tags: Vec<DeterministicTag>,
}

/// Splits a tagged [`tagging_input`] back over `records`.
pub fn attach_tags<C: CurveGroup>(
    tagged: &CipherVector<C>,
    records: &[ClientRecord<C>],
) -> Result<Vec<TaggedRecord<C>>> {
    let expected: usize = records
        .iter()
        .map(|record| record.non_deterministic.len() + record.grouping.len())
        .sum();
    if expected != tagged.len() {
        return Err(ProtocolError::length_mismatch(expected, tagged.len()));
    }
    let tags = DeterministicTag::from_vector(tagged)?;
    let mut position = 0;
    Ok(records
        .iter()
        .map(|record| {
            let where_len = record.non_deterministic.len();
            let group_len = record.grouping.len();
            let where_tags = tags[position..position + where_len].to_vec();
            let group_tags = &tags[position + where_len..position + where_len + group_len];
            position += where_len + group_len;
            TaggedRecord {
                record: record.clone(),
                group_key: GroupingKey::from_tags(group_tags),
                where_tags,
            }
        })
        .collect())
}

/// A group's encrypted grouping attributes and aggregated values.
#[derive(
    Clone,
    Debug,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    CanonicalSerialize,
    CanonicalDeserialize,
)]
#[serde(bound(
    serialize = "C: CanonicalSerialize",
    deserialize = "C: CanonicalDeserialize"
))]
pub struct FilteredResponse<C: CurveGroup> {
    pub grouping: CipherVector<C>,
    pub aggregating: CipherVector<C>,
}

impl<C: CurveGroup> FilteredResponse<C> {
    /// Sums the aggregating attributes; the grouping attributes of `self`
    /// are kept.
    pub fn try_add(&self, other: &Self) -> Result<Self> {
        Ok(Self {
            grouping: self.grouping.clone(),
            aggregating: self.aggregating.try_add(&other.aggregating)?,
        })
    }
}

pub type GroupedData<C> = BTreeMap<GroupingKey, FilteredResponse<C>>;

/// Sums the aggregating attributes of records that share a grouping key.
pub fn group_records<C: CurveGroup>(tagged: &[TaggedRecord<C>]) -> Result<GroupedData<C>> {
    let mut grouped = GroupedData::new();
    for entry in tagged {
        let response = FilteredResponse {
            grouping: entry.record.grouping.clone(),
            aggregating: entry.record.aggregating.clone(),
        };
        merge_response(&mut grouped, entry.group_key, response)?;
    }
    Ok(grouped)
}

pub fn merge_response<C: CurveGroup>(
    grouped: &mut GroupedData<C>,
    key: GroupingKey,
    response: FilteredResponse<C>,
) -> Result<()> {
    match grouped.get(&key) {
        Some(existing) => {
            let merged = existing.try_add(&response)?;
            grouped.insert(key, merged);
        }
        None => {
            grouped.insert(key, response);
        }
    }
    Ok(())
}

/// `[len(grouping), len(aggregating)]` of one filtered response.
pub type ResponseLayout = [usize; 2];

/// grouping ‖ aggregating for every response, for key switching.
pub fn responses_to_vector<C: CurveGroup>(
    responses: &[FilteredResponse<C>],
) -> (CipherVector<C>, Vec<ResponseLayout>) {
    let mut flat = CipherVector::default();
    let mut layouts = Vec::with_capacity(responses.len());
    for response in responses {
        flat.extend(response.grouping.iter().copied());
        flat.extend(response.aggregating.iter().copied());
        layouts.push([response.grouping.len(), response.aggregating.len()]);
    }
    (flat, layouts)
}

pub fn vector_to_responses<C: CurveGroup>(
    flat: &CipherVector<C>,
    layouts: &[ResponseLayout],
) -> Result<Vec<FilteredResponse<C>>> {
    let total: usize = layouts.iter().map(|[g, a]| g + a).sum();
    if total != flat.len() {
        return Err(ProtocolError::length_mismatch(total, flat.len()));
    }
    let mut position = 0;
    layouts
        .iter()
        .map(|[grouping, aggregating]| {
            let response = FilteredResponse {
                grouping: flat.slice(position, *grouping)?,
                aggregating: flat.slice(position + grouping, *aggregating)?,
            };
            position += grouping + aggregating;
            Ok(response)
        })
        .collect()
}

/// The aggregating attributes of a result with no grouping, i.e. a map
/// holding only [`GroupingKey::empty`].
pub fn retrieve_simple_data<C: CurveGroup>(grouped: &GroupedData<C>) -> Result<CipherVector<C>> {
    if grouped.len() != 1 {
        return Err(ProtocolError::InvalidInput(format!(
            "expected exactly one group, found {}",
            grouped.len()
        )));
    }
    grouped
        .get(&GroupingKey::empty())
        .map(|response| response.aggregating.clone())
        .ok_or(ProtocolError::NotFound)
}
