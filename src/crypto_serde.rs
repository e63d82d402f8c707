use ark_serialize::{CanonicalDeserialize, CanonicalSerialize};
use serde::de::Error as DeError;
use serde::ser::Error as SerError;
use serde::{Deserialize, Deserializer, Serializer};

use crate::error::ProtocolError;

/// Canonical compressed encoding of any arkworks value.
///
/// Points are normalized to affine form before encoding, so two projective
/// representations of the same point produce identical bytes.
pub fn to_canonical_bytes<T: CanonicalSerialize>(value: &T) -> Result<Vec<u8>, ProtocolError> {
    let mut bytes = Vec::with_capacity(value.compressed_size());
    value.serialize_compressed(&mut bytes)?;
    Ok(bytes)
}

/// Inverse of [`to_canonical_bytes`], with full subgroup validation.
pub fn from_canonical_bytes<T: CanonicalDeserialize>(bytes: &[u8]) -> Result<T, ProtocolError> {
    Ok(T::deserialize_compressed(bytes)?)
}

pub fn canonical_serialize_hex<T: CanonicalSerialize>(value: &T) -> Result<String, ProtocolError> {
    Ok(format!("0x{}", hex::encode(to_canonical_bytes(value)?)))
}

pub fn canonical_deserialize_hex<T: CanonicalDeserialize>(value: &str) -> Result<T, ProtocolError> {
    let bytes = decode_prefixed_hex(value)?;
    from_canonical_bytes(&bytes)
}

pub(crate) fn decode_prefixed_hex(value: &str) -> Result<Vec<u8>, ProtocolError> {
    let trimmed = value.strip_prefix("0x").unwrap_or(value);
    hex::decode(trimmed).map_err(|err| ProtocolError::Serialization(err.to_string()))
}

/// Serde helpers for encoding curve points as 0x-prefixed hex strings.
pub mod curve {
    use super::*;

    pub fn serialize<C, S>(value: &C, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        C: CanonicalSerialize,
        S: Serializer,
    {
        let hex = canonical_serialize_hex(value).map_err(SerError::custom)?;
        serializer.serialize_str(&hex)
    }

    pub fn deserialize<'de, C, D>(deserializer: D) -> std::result::Result<C, D::Error>
    where
        C: CanonicalDeserialize,
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        canonical_deserialize_hex(&s).map_err(DeError::custom)
    }
}

/// Serde helpers for raw byte strings rendered as 0x-prefixed hex.
pub mod hex_bytes {
    use super::*;

    pub fn serialize<B, S>(value: &B, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        B: AsRef<[u8]>,
        S: Serializer,
    {
        serializer.serialize_str(&format!("0x{}", hex::encode(value.as_ref())))
    }

    pub fn deserialize<'de, B, D>(deserializer: D) -> std::result::Result<B, D::Error>
    where
        B: TryFrom<Vec<u8>>,
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let bytes = decode_prefixed_hex(&s).map_err(DeError::custom)?;
        let len = bytes.len();
        B::try_from(bytes)
            .map_err(|_| DeError::custom(format!("unexpected byte length {len}")))
    }
}
