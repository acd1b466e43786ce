//! §4.7/§4.9 Recovery Manager — ARIES analysis/redo/undo replay over the
//! write-ahead log, run once at startup before the server accepts
//! connections.

pub mod recovery_manager;

pub use recovery_manager::{RecoveryManager, RecoverySummary};
