//! Base64 + msgpack memo helpers shared by every memo type.

use std::fmt;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::de::{self, DeserializeOwned, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::error::ProtocolError;

/// Maximum encoded (pre-base64) memo size accepted by the settlement network.
pub const MAX_MEMO_BYTES: usize = 140;

/// Encode a value as a named msgpack map and base64 it.
pub fn pack<T: Serialize>(value: &T) -> Result<String, ProtocolError> {
    let bytes = rmp_serde::to_vec_named(value)?;
    if bytes.len() > MAX_MEMO_BYTES {
        return Err(ProtocolError::TooLarge {
            size: bytes.len(),
            limit: MAX_MEMO_BYTES,
        });
    }
    Ok(STANDARD.encode(bytes))
}

/// Decode a base64 msgpack memo.
pub fn unpack<T: DeserializeOwned>(memo: &str) -> Result<T, ProtocolError> {
    let bytes = STANDARD.decode(memo.trim())?;
    Ok(rmp_serde::from_slice(&bytes)?)
}

/// Uuid carried as a 16-byte msgpack bin.
///
/// Decoding also accepts the textual form and a plain byte array, since peers
/// differ in how they pack ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct WireUuid(pub Uuid);

impl WireUuid {
    /// `None` for the nil uuid, which peers use for "absent".
    pub(crate) fn present(self) -> Option<Uuid> {
        (!self.0.is_nil()).then_some(self.0)
    }
}

impl Serialize for WireUuid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(self.0.as_bytes())
    }
}

impl<'de> Deserialize<'de> for WireUuid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(WireUuidVisitor)
    }
}

struct WireUuidVisitor;

impl<'de> Visitor<'de> for WireUuidVisitor {
    type Value = WireUuid;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("a uuid as 16 bytes or a string")
    }

    fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<Self::Value, E> {
        Uuid::from_slice(v).map(WireUuid).map_err(E::custom)
    }

    fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
        if v.is_empty() {
            return Ok(WireUuid(Uuid::nil()));
        }
        Uuid::parse_str(v).map(WireUuid).map_err(E::custom)
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
        let mut bytes = Vec::with_capacity(16);
        while let Some(b) = seq.next_element::<u8>()? {
            bytes.push(b);
        }
        self.visit_bytes(&bytes)
    }
}

/// Filter the empty strings some peers write for unset fields.
pub(crate) fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Sample {
        #[serde(rename = "O")]
        order: WireUuid,
    }

    #[test]
    fn uuid_travels_as_bytes() {
        let id = Uuid::from_u128(0x235266a4_f012_3bed_bb94_194f81c37965);
        let memo = pack(&Sample { order: WireUuid(id) }).unwrap();
        let raw = STANDARD.decode(&memo).unwrap();
        // fixmap(1), fixstr "O", bin8 of 16 bytes
        assert_eq!(&raw[..5], &[0x81, 0xa1, b'O', 0xc4, 16]);
        assert_eq!(unpack::<Sample>(&memo).unwrap().order.0, id);
    }

    #[test]
    fn uuid_accepts_text_form() {
        #[derive(Serialize)]
        struct Text {
            #[serde(rename = "O")]
            order: String,
        }
        let id = Uuid::from_u128(7);
        let memo = pack(&Text { order: id.to_string() }).unwrap();
        assert_eq!(unpack::<Sample>(&memo).unwrap().order.0, id);
    }

    #[test]
    fn nil_uuid_is_absent() {
        assert_eq!(WireUuid(Uuid::nil()).present(), None);
        assert_eq!(WireUuid(Uuid::from_u128(1)).present(), Some(Uuid::from_u128(1)));
    }

    #[test]
    fn oversized_memo_is_rejected() {
        #[derive(Serialize)]
        struct Big {
            blob: String,
        }
        let err = pack(&Big { blob: "x".repeat(200) }).unwrap_err();
        assert!(matches!(err, ProtocolError::TooLarge { limit: 140, .. }));
    }

    #[test]
    fn bad_base64_is_rejected() {
        let err = unpack::<Sample>("%%%").unwrap_err();
        assert!(matches!(err, ProtocolError::Base64(_)));
    }
}
