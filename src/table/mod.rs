//! §4.5, §3 — Schema/Tuple/Value wiring and the table heap built on top
//! of slotted pages.

pub mod schema;
pub mod table_heap;
pub mod table_iterator;
pub mod tuple;

pub use schema::{Column, Schema};
pub use table_heap::TableHeap;
pub use table_iterator::TableIterator;
pub use tuple::Tuple;
