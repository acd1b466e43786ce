//! §3 Index Metadata — the 8-byte generic key (integer or double
//! encoded) used by every B+Tree node regardless of the indexed column's
//! declared type.

use std::cmp::Ordering;

use crate::types::{TypeId, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GenericKey {
    bytes: [u8; 8],
}

impl GenericKey {
    pub const ZERO: GenericKey = GenericKey { bytes: [0u8; 8] };

    pub fn from_bytes(bytes: [u8; 8]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> [u8; 8] {
        self.bytes
    }

    /// Encodes a value per `key_type`. Integers and timestamps store
    /// their `i64` little-endian; decimals store their `f64` bits.
    /// Everything else (varchar keys are out of scope for this generic
    /// key) is rejected by the caller before reaching here.
    pub fn from_value(value: &Value, key_type: TypeId) -> Self {
        let mut bytes = [0u8; 8];
        match (value, key_type) {
            (Value::Integer(v), TypeId::Integer) => bytes.copy_from_slice(&v.to_le_bytes()),
            (Value::Timestamp(v), TypeId::Timestamp) => bytes.copy_from_slice(&v.to_le_bytes()),
            (Value::Decimal(v), TypeId::Decimal) => bytes.copy_from_slice(&v.to_le_bytes()),
            _ => bytes.copy_from_slice(&0i64.to_le_bytes()),
        }
        Self { bytes }
    }

    pub fn compare(&self, other: &Self, key_type: TypeId) -> Ordering {
        match key_type {
            TypeId::Decimal => {
                let a = f64::from_le_bytes(self.bytes);
                let b = f64::from_le_bytes(other.bytes);
                a.partial_cmp(&b).unwrap_or(Ordering::Equal)
            }
            _ => {
                let a = i64::from_le_bytes(self.bytes);
                let b = i64::from_le_bytes(other.bytes);
                a.cmp(&b)
            }
        }
    }
}
