//! §3 Tuple — byte image of a row: fixed-width columns at their schema
//! offset, `Varchar` columns stored as `[heap_offset, length]` in the
//! fixed region with their bytes appended after it.

use crate::common::Rid;
use crate::error::{EngineError, Result};
use crate::types::{TypeId, Value};

use super::schema::Schema;

#[derive(Debug, Clone)]
pub struct Tuple {
    pub data: Vec<u8>,
    pub rid: Option<Rid>,
}

impl Tuple {
    pub fn from_bytes(data: Vec<u8>) -> Self {
        Self { data, rid: None }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Serializes `values` positionally against `schema`.
    pub fn from_values(schema: &Schema, values: &[Value]) -> Result<Self> {
        if values.len() != schema.columns.len() {
            return Err(EngineError::Execution(format!(
                "expected {} values, got {}",
                schema.columns.len(),
                values.len()
            )));
        }

        let mut fixed = vec![0u8; schema.fixed_len];
        let mut heap = Vec::new();

        for (i, (col, value)) in schema.columns.iter().zip(values).enumerate() {
            if value.is_null() {
                if !col.nullable {
                    return Err(EngineError::Execution(format!(
                        "column {} is not nullable",
                        col.name
                    )));
                }
                set_null_bit(&mut fixed, i, true);
                continue;
            }
            if value.type_id() != Some(col.type_id) {
                return Err(EngineError::Execution(format!(
                    "column {} expects {:?}, got {:?}",
                    col.name,
                    col.type_id,
                    value.type_id()
                )));
            }
            encode_value(&mut fixed, &mut heap, schema.fixed_len, col.offset, value);
        }

        fixed.extend_from_slice(&heap);
        Ok(Self {
            data: fixed,
            rid: None,
        })
    }

    pub fn value_at(&self, schema: &Schema, index: usize) -> Value {
        let col = &schema.columns[index];
        if get_null_bit(&self.data, index) {
            return Value::Null;
        }
        decode_value(&self.data, col.offset, col.type_id)
    }

    pub fn values(&self, schema: &Schema) -> Vec<Value> {
        (0..schema.columns.len())
            .map(|i| self.value_at(schema, i))
            .collect()
    }

    pub fn with_rid(mut self, rid: Rid) -> Self {
        self.rid = Some(rid);
        self
    }
}

fn set_null_bit(fixed: &mut [u8], index: usize, is_null: bool) {
    let byte = index / 8;
    let bit = index % 8;
    if is_null {
        fixed[byte] |= 1 << bit;
    } else {
        fixed[byte] &= !(1 << bit);
    }
}

fn get_null_bit(data: &[u8], index: usize) -> bool {
    let byte = index / 8;
    let bit = index % 8;
    data[byte] & (1 << bit) != 0
}

fn encode_value(fixed: &mut [u8], heap: &mut Vec<u8>, fixed_len: usize, offset: usize, value: &Value) {
    match value {
        Value::Integer(v) => fixed[offset..offset + 8].copy_from_slice(&v.to_le_bytes()),
        Value::Timestamp(v) => fixed[offset..offset + 8].copy_from_slice(&v.to_le_bytes()),
        Value::Decimal(v) => fixed[offset..offset + 8].copy_from_slice(&v.to_le_bytes()),
        Value::Boolean(v) => fixed[offset] = *v as u8,
        Value::Varchar(s) => {
            let bytes = s.as_bytes();
            let heap_offset = (fixed_len + heap.len()) as u32;
            fixed[offset..offset + 4].copy_from_slice(&heap_offset.to_le_bytes());
            fixed[offset + 4..offset + 8].copy_from_slice(&(bytes.len() as u32).to_le_bytes());
            heap.extend_from_slice(bytes);
        }
        Value::Null => unreachable!("null handled by caller via the bitmap"),
    }
}

fn decode_value(data: &[u8], offset: usize, type_id: TypeId) -> Value {
    match type_id {
        TypeId::Integer => Value::Integer(i64::from_le_bytes(
            data[offset..offset + 8].try_into().unwrap(),
        )),
        TypeId::Timestamp => Value::Timestamp(i64::from_le_bytes(
            data[offset..offset + 8].try_into().unwrap(),
        )),
        TypeId::Decimal => Value::Decimal(f64::from_le_bytes(
            data[offset..offset + 8].try_into().unwrap(),
        )),
        TypeId::Boolean => Value::Boolean(data[offset] != 0),
        TypeId::Varchar => {
            let heap_offset =
                u32::from_le_bytes(data[offset..offset + 4].try_into().unwrap()) as usize;
            let len = u32::from_le_bytes(data[offset + 4..offset + 8].try_into().unwrap()) as usize;
            let bytes = &data[heap_offset..heap_offset + len];
            Value::Varchar(String::from_utf8_lossy(bytes).into_owned())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::schema::Column;

    fn schema() -> Schema {
        Schema::new(vec![
            Column::new("id", TypeId::Integer).primary_key(),
            Column::new("name", TypeId::Varchar).with_max_len(50),
            Column::new("age", TypeId::Integer),
        ])
    }

    #[test]
    fn round_trips_mixed_columns() {
        let schema = schema();
        let values = vec![
            Value::Integer(1),
            Value::Varchar("Alice".to_string()),
            Value::Integer(25),
        ];
        let tuple = Tuple::from_values(&schema, &values).unwrap();
        assert_eq!(tuple.value_at(&schema, 0), Value::Integer(1));
        assert_eq!(tuple.value_at(&schema, 1), Value::Varchar("Alice".to_string()));
        assert_eq!(tuple.value_at(&schema, 2), Value::Integer(25));
    }

    #[test]
    fn null_values_round_trip() {
        let schema = Schema::new(vec![Column::new("n", TypeId::Integer)]);
        let tuple = Tuple::from_values(&schema, &[Value::Null]).unwrap();
        assert!(tuple.value_at(&schema, 0).is_null());
    }

    #[test]
    fn rejects_non_nullable_null() {
        let schema = schema();
        let values = vec![Value::Null, Value::Varchar("x".into()), Value::Integer(1)];
        assert!(Tuple::from_values(&schema, &values).is_err());
    }
}
