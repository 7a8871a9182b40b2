//! Request identifier: either a 16-byte UUID or an unsigned 64-bit integer.

use ciborium::value::{Integer, Value};

use crate::error::ProtoError;

/// A request/flow identifier carried in `id` and `routingId`.
///
/// The two variants are never equal to one another, even if their byte
/// patterns would coincide numerically — a `Uuid` and a `Uint` are
/// distinct kinds of identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageId {
    /// 16 raw bytes.
    Uuid([u8; 16]),
    /// Big-endian-significant 64-bit integer.
    Uint(u64),
}

impl MessageId {
    /// `id = uint(0)`, used by RELAY_NOTIFY and RELAY_STATE frames.
    pub const ZERO: Self = Self::Uint(0);

    pub(crate) fn to_cbor(self) -> Value {
        match self {
            Self::Uuid(bytes) => Value::Bytes(bytes.to_vec()),
            Self::Uint(n) => Value::Integer(Integer::from(n)),
        }
    }

    pub(crate) fn from_cbor(value: &Value) -> Result<Self, ProtoError> {
        match value {
            Value::Bytes(bytes) if bytes.len() == 16 => {
                let mut arr = [0u8; 16];
                arr.copy_from_slice(bytes);
                Ok(Self::Uuid(arr))
            },
            Value::Bytes(bytes) => Err(ProtoError::InvalidFrame(format!(
                "id byte string has invalid length {} (expected 16)",
                bytes.len()
            ))),
            Value::Integer(int) => {
                let n: i128 = (*int).into();
                let n = u64::try_from(n)
                    .map_err(|_| ProtoError::InvalidFrame("id integer out of range".into()))?;
                Ok(Self::Uint(n))
            },
            _ => Err(ProtoError::InvalidFrame("id is neither bytes nor an integer".into())),
        }
    }
}

impl From<[u8; 16]> for MessageId {
    fn from(bytes: [u8; 16]) -> Self {
        Self::Uuid(bytes)
    }
}

impl From<u64> for MessageId {
    fn from(n: u64) -> Self {
        Self::Uint(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uuid_and_uint_never_equal() {
        let uuid = MessageId::Uuid([0u8; 16]);
        let uint = MessageId::Uint(0);
        assert_ne!(uuid, uint);
    }

    #[test]
    fn uuid_equality_is_byte_exact() {
        assert_eq!(MessageId::Uuid([7u8; 16]), MessageId::Uuid([7u8; 16]));
        assert_ne!(MessageId::Uuid([7u8; 16]), MessageId::Uuid([8u8; 16]));
    }

    #[test]
    fn uint_roundtrips_through_cbor() {
        let id = MessageId::Uint(0xdead_beef);
        let value = id.to_cbor();
        assert_eq!(MessageId::from_cbor(&value).unwrap(), id);
    }

    #[test]
    fn uuid_roundtrips_through_cbor() {
        let id = MessageId::Uuid([9u8; 16]);
        let value = id.to_cbor();
        assert_eq!(MessageId::from_cbor(&value).unwrap(), id);
    }

    #[test]
    fn rejects_wrong_length_bytes() {
        let value = Value::Bytes(vec![1, 2, 3]);
        assert!(MessageId::from_cbor(&value).is_err());
    }
}
