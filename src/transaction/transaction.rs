//! §3/§4.9 Transaction — id, state machine, prev-LSN undo chain.

use crate::common::{Lsn, Rid, TxnId, INVALID_LSN};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnState {
    Growing,
    Shrinking,
    Committed,
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    ReadCommitted,
    RepeatableRead,
    Serializable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UndoOp {
    Insert,
    ApplyDelete,
    Update,
}

/// One entry in a transaction's undo list: enough to reverse the change
/// without consulting the log (the log is still written; this is the
/// in-memory fast path abort uses before recovery ever gets involved).
#[derive(Debug, Clone)]
pub struct UndoEntry {
    pub rid: Rid,
    pub table_oid: u32,
    pub before_image: Vec<u8>,
    pub op: UndoOp,
    pub lsn: Lsn,
}

pub struct Transaction {
    pub id: TxnId,
    pub state: TxnState,
    pub isolation_level: IsolationLevel,
    pub prev_lsn: Lsn,
    pub undo_list: Vec<UndoEntry>,
    pub locks_held: Vec<LockRef>,
    pub aborts_count: u32,
    pub started_at_us: i64,
}

#[derive(Debug, Clone)]
pub enum LockRef {
    Row(Rid),
    Table(u32),
}

impl Transaction {
    pub fn new(id: TxnId, started_at_us: i64) -> Self {
        Self {
            id,
            state: TxnState::Growing,
            isolation_level: IsolationLevel::ReadCommitted,
            prev_lsn: INVALID_LSN,
            undo_list: Vec::new(),
            locks_held: Vec::new(),
            aborts_count: 0,
            started_at_us,
        }
    }

    pub fn push_undo(&mut self, entry: UndoEntry) {
        self.prev_lsn = entry.lsn;
        self.undo_list.push(entry);
    }

    pub fn is_active(&self) -> bool {
        matches!(self.state, TxnState::Growing | TxnState::Shrinking)
    }

    pub fn begin_shrinking(&mut self) {
        if self.state == TxnState::Growing {
            self.state = TxnState::Shrinking;
        }
    }
}
