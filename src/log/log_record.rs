//! §3/§4.7 Log Record — the typed WAL payload written after the common
//! `[lsn|prev_lsn|undo_next_lsn|txn_id|timestamp|type]` prefix.

use crate::common::{Lsn, PageId, Rid, TxnId, INVALID_LSN};
use crate::error::{EngineError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LogRecordType {
    Insert = 0,
    Update = 1,
    ApplyDelete = 2,
    Begin = 3,
    Commit = 4,
    Abort = 5,
    Clr = 6,
    CheckpointBegin = 7,
    CheckpointEnd = 8,
}

impl LogRecordType {
    fn from_u8(b: u8) -> Result<Self> {
        Ok(match b {
            0 => Self::Insert,
            1 => Self::Update,
            2 => Self::ApplyDelete,
            3 => Self::Begin,
            4 => Self::Commit,
            5 => Self::Abort,
            6 => Self::Clr,
            7 => Self::CheckpointBegin,
            8 => Self::CheckpointEnd,
            other => {
                return Err(EngineError::corruption(
                    -1,
                    format!("unknown log record type tag {other}"),
                ))
            }
        })
    }
}

/// The physical action a `Clr` replays during redo, independent of
/// whichever record type it originally compensated for.
#[derive(Debug, Clone)]
pub enum CompensationOp {
    Reinsert(Vec<u8>),
    Delete,
}

#[derive(Debug, Clone)]
pub enum LogRecordBody {
    Insert {
        rid: Rid,
        table_oid: u32,
        after: Vec<u8>,
    },
    Update {
        rid: Rid,
        table_oid: u32,
        before: Vec<u8>,
        after: Vec<u8>,
    },
    ApplyDelete {
        rid: Rid,
        table_oid: u32,
        before: Vec<u8>,
    },
    Begin,
    Commit,
    Abort,
    /// Compensation record: undoes `compensates` (the LSN of the record
    /// being undone); `undo_next_lsn` on the envelope points further
    /// back in the original transaction's chain. `op` carries the
    /// physical action itself so the redo pass can replay it without
    /// needing to know what kind of record it is compensating for.
    Clr {
        compensates: Lsn,
        rid: Rid,
        table_oid: u32,
        op: CompensationOp,
    },
    CheckpointBegin,
    CheckpointEnd {
        active_txns: Vec<TxnId>,
    },
}

impl LogRecordBody {
    pub fn record_type(&self) -> LogRecordType {
        match self {
            Self::Insert { .. } => LogRecordType::Insert,
            Self::Update { .. } => LogRecordType::Update,
            Self::ApplyDelete { .. } => LogRecordType::ApplyDelete,
            Self::Begin => LogRecordType::Begin,
            Self::Commit => LogRecordType::Commit,
            Self::Abort => LogRecordType::Abort,
            Self::Clr { .. } => LogRecordType::Clr,
            Self::CheckpointBegin => LogRecordType::CheckpointBegin,
            Self::CheckpointEnd { .. } => LogRecordType::CheckpointEnd,
        }
    }

    /// Page this record is about, if any — used by recovery to index
    /// the dirty page table.
    pub fn page_id(&self) -> Option<PageId> {
        match self {
            Self::Insert { rid, .. } | Self::Update { rid, .. } | Self::ApplyDelete { rid, .. } => {
                Some(rid.page_id)
            }
            Self::Clr { rid, .. } => Some(rid.page_id),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LogRecord {
    pub lsn: Lsn,
    pub prev_lsn: Lsn,
    pub undo_next_lsn: Lsn,
    pub txn_id: TxnId,
    pub timestamp_us: i64,
    pub body: LogRecordBody,
}

impl LogRecord {
    pub fn new(prev_lsn: Lsn, txn_id: TxnId, timestamp_us: i64, body: LogRecordBody) -> Self {
        Self {
            lsn: INVALID_LSN,
            prev_lsn,
            undo_next_lsn: prev_lsn,
            txn_id,
            timestamp_us,
            body,
        }
    }

    /// Encodes the body (without the outer `[size][...][crc]` framing,
    /// which the Log Manager owns).
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(64);
        buf.extend_from_slice(&self.lsn.to_le_bytes());
        buf.extend_from_slice(&self.prev_lsn.to_le_bytes());
        buf.extend_from_slice(&self.undo_next_lsn.to_le_bytes());
        buf.extend_from_slice(&self.txn_id.to_le_bytes());
        buf.extend_from_slice(&self.timestamp_us.to_le_bytes());
        buf.push(self.body.record_type() as u8);
        encode_body(&self.body, &mut buf);
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < 33 {
            return Err(EngineError::corruption(-1, "log record shorter than header"));
        }
        let lsn = u64::from_le_bytes(buf[0..8].try_into().unwrap());
        let prev_lsn = u64::from_le_bytes(buf[8..16].try_into().unwrap());
        let undo_next_lsn = u64::from_le_bytes(buf[16..24].try_into().unwrap());
        let txn_id = u64::from_le_bytes(buf[24..32].try_into().unwrap());
        let timestamp_us = i64::from_le_bytes(buf[32..40].try_into().unwrap());
        let record_type = LogRecordType::from_u8(buf[40])?;
        let body = decode_body(record_type, &buf[41..])?;
        Ok(Self {
            lsn,
            prev_lsn,
            undo_next_lsn,
            txn_id,
            timestamp_us,
            body,
        })
    }
}

fn put_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    buf.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    buf.extend_from_slice(bytes);
}

fn take_bytes<'a>(buf: &'a [u8], pos: &mut usize) -> Result<&'a [u8]> {
    if buf.len() < *pos + 4 {
        return Err(EngineError::corruption(-1, "truncated length prefix"));
    }
    let len = u32::from_le_bytes(buf[*pos..*pos + 4].try_into().unwrap()) as usize;
    *pos += 4;
    if buf.len() < *pos + len {
        return Err(EngineError::corruption(-1, "truncated payload"));
    }
    let out = &buf[*pos..*pos + len];
    *pos += len;
    Ok(out)
}

fn put_rid(buf: &mut Vec<u8>, rid: &Rid) {
    buf.extend_from_slice(&rid.page_id.to_le_bytes());
    buf.extend_from_slice(&rid.slot.to_le_bytes());
}

fn take_rid(buf: &[u8], pos: &mut usize) -> Rid {
    let page_id = i32::from_le_bytes(buf[*pos..*pos + 4].try_into().unwrap());
    let slot = u32::from_le_bytes(buf[*pos + 4..*pos + 8].try_into().unwrap());
    *pos += 8;
    Rid::new(page_id, slot)
}

fn encode_body(body: &LogRecordBody, buf: &mut Vec<u8>) {
    match body {
        LogRecordBody::Insert {
            rid,
            table_oid,
            after,
        } => {
            put_rid(buf, rid);
            buf.extend_from_slice(&table_oid.to_le_bytes());
            put_bytes(buf, after);
        }
        LogRecordBody::Update {
            rid,
            table_oid,
            before,
            after,
        } => {
            put_rid(buf, rid);
            buf.extend_from_slice(&table_oid.to_le_bytes());
            put_bytes(buf, before);
            put_bytes(buf, after);
        }
        LogRecordBody::ApplyDelete {
            rid,
            table_oid,
            before,
        } => {
            put_rid(buf, rid);
            buf.extend_from_slice(&table_oid.to_le_bytes());
            put_bytes(buf, before);
        }
        LogRecordBody::Begin | LogRecordBody::Commit | LogRecordBody::Abort | LogRecordBody::CheckpointBegin => {}
        LogRecordBody::Clr {
            compensates,
            rid,
            table_oid,
            op,
        } => {
            buf.extend_from_slice(&compensates.to_le_bytes());
            put_rid(buf, rid);
            buf.extend_from_slice(&table_oid.to_le_bytes());
            match op {
                CompensationOp::Reinsert(bytes) => {
                    buf.push(0);
                    put_bytes(buf, bytes);
                }
                CompensationOp::Delete => buf.push(1),
            }
        }
        LogRecordBody::CheckpointEnd { active_txns } => {
            buf.extend_from_slice(&(active_txns.len() as u32).to_le_bytes());
            for txn in active_txns {
                buf.extend_from_slice(&txn.to_le_bytes());
            }
        }
    }
}

fn decode_body(record_type: LogRecordType, buf: &[u8]) -> Result<LogRecordBody> {
    let mut pos = 0usize;
    Ok(match record_type {
        LogRecordType::Insert => {
            let rid = take_rid(buf, &mut pos);
            let table_oid = u32::from_le_bytes(buf[pos..pos + 4].try_into().unwrap());
            pos += 4;
            let after = take_bytes(buf, &mut pos)?.to_vec();
            LogRecordBody::Insert {
                rid,
                table_oid,
                after,
            }
        }
        LogRecordType::Update => {
            let rid = take_rid(buf, &mut pos);
            let table_oid = u32::from_le_bytes(buf[pos..pos + 4].try_into().unwrap());
            pos += 4;
            let before = take_bytes(buf, &mut pos)?.to_vec();
            let after = take_bytes(buf, &mut pos)?.to_vec();
            LogRecordBody::Update {
                rid,
                table_oid,
                before,
                after,
            }
        }
        LogRecordType::ApplyDelete => {
            let rid = take_rid(buf, &mut pos);
            let table_oid = u32::from_le_bytes(buf[pos..pos + 4].try_into().unwrap());
            pos += 4;
            let before = take_bytes(buf, &mut pos)?.to_vec();
            LogRecordBody::ApplyDelete {
                rid,
                table_oid,
                before,
            }
        }
        LogRecordType::Begin => LogRecordBody::Begin,
        LogRecordType::Commit => LogRecordBody::Commit,
        LogRecordType::Abort => LogRecordBody::Abort,
        LogRecordType::Clr => {
            let compensates = u64::from_le_bytes(buf[pos..pos + 8].try_into().unwrap());
            pos += 8;
            let rid = take_rid(buf, &mut pos);
            let table_oid = u32::from_le_bytes(buf[pos..pos + 4].try_into().unwrap());
            pos += 4;
            let tag = buf[pos];
            pos += 1;
            let op = if tag == 0 {
                CompensationOp::Reinsert(take_bytes(buf, &mut pos)?.to_vec())
            } else {
                CompensationOp::Delete
            };
            LogRecordBody::Clr {
                compensates,
                rid,
                table_oid,
                op,
            }
        }
        LogRecordType::CheckpointBegin => LogRecordBody::CheckpointBegin,
        LogRecordType::CheckpointEnd => {
            let n = u32::from_le_bytes(buf[pos..pos + 4].try_into().unwrap()) as usize;
            pos += 4;
            let mut active_txns = Vec::with_capacity(n);
            for _ in 0..n {
                active_txns.push(u64::from_le_bytes(buf[pos..pos + 8].try_into().unwrap()));
                pos += 8;
            }
            LogRecordBody::CheckpointEnd { active_txns }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_record_round_trips() {
        let mut rec = LogRecord::new(
            0,
            7,
            1234,
            LogRecordBody::Insert {
                rid: Rid::new(3, 1),
                table_oid: 1,
                after: b"hello".to_vec(),
            },
        );
        rec.lsn = 100;
        let encoded = rec.encode();
        let decoded = LogRecord::decode(&encoded).unwrap();
        assert_eq!(decoded.lsn, 100);
        assert_eq!(decoded.txn_id, 7);
        match decoded.body {
            LogRecordBody::Insert { rid, after, .. } => {
                assert_eq!(rid, Rid::new(3, 1));
                assert_eq!(after, b"hello");
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn checkpoint_end_round_trips() {
        let mut rec = LogRecord::new(
            0,
            0,
            1,
            LogRecordBody::CheckpointEnd {
                active_txns: vec![1, 2, 3],
            },
        );
        rec.lsn = 50;
        let decoded = LogRecord::decode(&rec.encode()).unwrap();
        match decoded.body {
            LogRecordBody::CheckpointEnd { active_txns } => assert_eq!(active_txns, vec![1, 2, 3]),
            _ => panic!("wrong variant"),
        }
    }
}
