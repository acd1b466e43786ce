//! §4.2 — the buffer pool: frames, eviction policy, RAII page guards.

pub mod buffer_pool;
pub mod frame;
pub mod page_guard;
pub mod replacer;

pub use buffer_pool::{BufferPool, BufferPoolStats, WalSink};
pub use frame::Frame;
pub use page_guard::{ReadPageGuard, WritePageGuard};
pub use replacer::{ClockReplacer, LruReplacer, Replacer};
