//! §3/§4.6 B+Tree Index — generic 8-byte key, latch-crabbing search, and
//! a two-phase split-propagating insert.

pub mod btree;
pub mod generic_key;
pub mod internal_node;
pub mod leaf_node;
pub mod node;

pub use btree::{BTreeIndex, BTreeIndexIterator, DEFAULT_FAN_OUT};
pub use generic_key::GenericKey;
