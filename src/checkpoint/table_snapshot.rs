//! §4.10 Table Snapshot — one table's full row set at a checkpoint.
//!
//! Values are encoded in the same tagged-binary scheme the catalog page
//! uses for column defaults (see `catalog::catalog::put_default`), not as
//! text: a decimal round-tripped through a string loses precision, and a
//! binary encoding costs nothing extra here since this format has no
//! prior on-disk version to stay compatible with (see DESIGN.md).

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::common::Lsn;
use crate::error::{EngineError, Result};
use crate::table::{Column, Schema};
use crate::types::{TypeId, Value};

const MAGIC: u32 = 0x534E_4150; // "SNAP"
const VERSION: u32 = 1;

#[derive(Debug, Clone)]
pub struct TableSnapshot {
    pub checkpoint_lsn: Lsn,
    pub timestamp_us: i64,
    pub table_name: String,
    pub schema: Schema,
    pub rows: Vec<Vec<Value>>,
}

impl TableSnapshot {
    pub fn new(
        table_name: impl Into<String>,
        schema: Schema,
        checkpoint_lsn: Lsn,
        timestamp_us: i64,
        rows: Vec<Vec<Value>>,
    ) -> Self {
        Self {
            checkpoint_lsn,
            timestamp_us,
            table_name: table_name.into(),
            schema,
            rows,
        }
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Atomic tmp-then-rename write; creates the parent checkpoint
    /// directory if this is the first table snapshotted at this LSN.
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut buf = Vec::new();
        buf.extend_from_slice(&MAGIC.to_le_bytes());
        buf.extend_from_slice(&VERSION.to_le_bytes());
        buf.extend_from_slice(&self.checkpoint_lsn.to_le_bytes());
        buf.extend_from_slice(&(self.timestamp_us as u64).to_le_bytes());
        put_string(&mut buf, &self.table_name);

        buf.extend_from_slice(&(self.schema.columns.len() as u32).to_le_bytes());
        for col in &self.schema.columns {
            put_string(&mut buf, &col.name);
            buf.push(type_tag(col.type_id));
        }

        buf.extend_from_slice(&(self.rows.len() as u32).to_le_bytes());
        for row in &self.rows {
            for value in row {
                put_value(&mut buf, value);
            }
        }

        let tmp = tmp_path(path);
        {
            let mut f = fs::File::create(&tmp)?;
            f.write_all(&buf)?;
            f.sync_data()?;
        }
        fs::rename(&tmp, path)?;
        Ok(())
    }

    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let buf = fs::read(path.as_ref())?;
        let mut cur = 0usize;
        let magic = read_u32(&buf, &mut cur)?;
        if magic != MAGIC {
            return Err(EngineError::corruption(-1, "bad table snapshot magic"));
        }
        let version = read_u32(&buf, &mut cur)?;
        if version != VERSION {
            return Err(EngineError::corruption(
                -1,
                format!("unsupported table snapshot version {version}"),
            ));
        }
        let checkpoint_lsn = read_u64(&buf, &mut cur)?;
        let timestamp_us = read_u64(&buf, &mut cur)? as i64;
        let table_name = read_string(&buf, &mut cur)?;

        let col_count = read_u32(&buf, &mut cur)? as usize;
        let mut columns = Vec::with_capacity(col_count);
        for _ in 0..col_count {
            let name = read_string(&buf, &mut cur)?;
            let type_id = type_from_tag(read_u8(&buf, &mut cur)?)?;
            columns.push(Column::new(name, type_id));
        }
        let schema = Schema::new(columns);

        let row_count = read_u32(&buf, &mut cur)? as usize;
        let mut rows = Vec::with_capacity(row_count);
        for _ in 0..row_count {
            let mut row = Vec::with_capacity(schema.columns.len());
            for _ in 0..schema.columns.len() {
                row.push(read_value(&buf, &mut cur)?);
            }
            rows.push(row);
        }

        Ok(Self {
            checkpoint_lsn,
            timestamp_us,
            table_name,
            schema,
            rows,
        })
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut s = path.as_os_str().to_os_string();
    s.push(".tmp");
    PathBuf::from(s)
}

fn type_tag(t: TypeId) -> u8 {
    match t {
        TypeId::Integer => 0,
        TypeId::Boolean => 1,
        TypeId::Decimal => 2,
        TypeId::Timestamp => 3,
        TypeId::Varchar => 4,
    }
}

fn type_from_tag(tag: u8) -> Result<TypeId> {
    Ok(match tag {
        0 => TypeId::Integer,
        1 => TypeId::Boolean,
        2 => TypeId::Decimal,
        3 => TypeId::Timestamp,
        4 => TypeId::Varchar,
        other => return Err(EngineError::corruption(-1, format!("bad type tag {other}"))),
    })
}

fn put_string(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(&(s.len() as u32).to_le_bytes());
    buf.extend_from_slice(s.as_bytes());
}

fn put_value(buf: &mut Vec<u8>, value: &Value) {
    match value {
        Value::Null => buf.push(0),
        Value::Integer(v) => {
            buf.push(1);
            buf.extend_from_slice(&v.to_le_bytes());
        }
        Value::Boolean(v) => {
            buf.push(2);
            buf.push(*v as u8);
        }
        Value::Decimal(v) => {
            buf.push(3);
            buf.extend_from_slice(&v.to_le_bytes());
        }
        Value::Timestamp(v) => {
            buf.push(4);
            buf.extend_from_slice(&v.to_le_bytes());
        }
        Value::Varchar(s) => {
            buf.push(5);
            put_string(buf, s);
        }
    }
}

fn read_value(buf: &[u8], cur: &mut usize) -> Result<Value> {
    let tag = read_u8(buf, cur)?;
    Ok(match tag {
        0 => Value::Null,
        1 => Value::Integer(read_u64(buf, cur)? as i64),
        2 => Value::Boolean(read_u8(buf, cur)? != 0),
        3 => Value::Decimal(f64::from_bits(read_u64(buf, cur)?)),
        4 => Value::Timestamp(read_u64(buf, cur)? as i64),
        5 => Value::Varchar(read_string(buf, cur)?),
        other => return Err(EngineError::corruption(-1, format!("bad value tag {other}"))),
    })
}

fn read_u8(buf: &[u8], cur: &mut usize) -> Result<u8> {
    if *cur + 1 > buf.len() {
        return Err(EngineError::corruption(-1, "truncated table snapshot"));
    }
    let v = buf[*cur];
    *cur += 1;
    Ok(v)
}

fn read_u32(buf: &[u8], cur: &mut usize) -> Result<u32> {
    if *cur + 4 > buf.len() {
        return Err(EngineError::corruption(-1, "truncated table snapshot"));
    }
    let v = u32::from_le_bytes(buf[*cur..*cur + 4].try_into().unwrap());
    *cur += 4;
    Ok(v)
}

fn read_u64(buf: &[u8], cur: &mut usize) -> Result<u64> {
    if *cur + 8 > buf.len() {
        return Err(EngineError::corruption(-1, "truncated table snapshot"));
    }
    let v = u64::from_le_bytes(buf[*cur..*cur + 8].try_into().unwrap());
    *cur += 8;
    Ok(v)
}

fn read_string(buf: &[u8], cur: &mut usize) -> Result<String> {
    let len = read_u32(buf, cur)? as usize;
    if *cur + len > buf.len() {
        return Err(EngineError::corruption(-1, "truncated table snapshot string"));
    }
    let s = String::from_utf8_lossy(&buf[*cur..*cur + len]).into_owned();
    *cur += len;
    Ok(s)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn schema() -> Schema {
        Schema::new(vec![
            Column::new("id", TypeId::Integer).primary_key(),
            Column::new("price", TypeId::Decimal),
            Column::new("name", TypeId::Varchar).with_max_len(32),
        ])
    }

    #[test]
    fn save_then_load_round_trips_rows_and_schema() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("widgets.snap");
        let rows = vec![
            vec![Value::Integer(1), Value::Decimal(19.999999), Value::Varchar("a".into())],
            vec![Value::Integer(2), Value::Null, Value::Varchar("b".into())],
        ];
        let snap = TableSnapshot::new("widgets", schema(), 42, 1000, rows.clone());
        snap.save_to_file(&path).unwrap();

        let reloaded = TableSnapshot::load_from_file(&path).unwrap();
        assert_eq!(reloaded.checkpoint_lsn, 42);
        assert_eq!(reloaded.table_name, "widgets");
        assert_eq!(reloaded.row_count(), 2);
        match &reloaded.rows[0][1] {
            Value::Decimal(v) => assert_eq!(*v, 19.999999),
            other => panic!("expected decimal, got {other:?}"),
        }
        assert!(reloaded.rows[1][1].is_null());
    }
}
