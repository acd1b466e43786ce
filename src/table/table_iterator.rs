//! §4.5 Table Iterator — forward scan over a heap's pages, caching the
//! current tuple by value and holding no latches between steps.

use crate::common::PageId;
use crate::storage::TablePage;

use super::table_heap::TableHeap;
use super::tuple::Tuple;

pub struct TableIterator {
    heap: TableHeap,
    page_id: PageId,
    slot: u32,
    cached: Option<Tuple>,
    done: bool,
}

impl TableIterator {
    pub fn new(heap: TableHeap) -> Self {
        let page_id = heap.first_page_id;
        let mut it = Self {
            heap,
            page_id,
            slot: 0,
            cached: None,
            done: false,
        };
        it.advance_to_next_visible();
        it
    }

    fn advance_to_next_visible(&mut self) {
        loop {
            if self.done {
                return;
            }
            let page = match self.heap.buffer_pool().fetch_page_read(self.page_id) {
                Ok(guard) => TablePage::from_bytes(self.page_id, *guard),
                Err(_) => {
                    self.done = true;
                    return;
                }
            };
            if self.slot < page.tuple_count() {
                if let Some(tuple) = page.tuple_at(self.slot) {
                    self.cached = Some(tuple);
                    return;
                }
                self.slot += 1;
                continue;
            }
            let next = page.next_page_id();
            if next == crate::common::INVALID_PAGE_ID {
                self.done = true;
                self.cached = None;
                return;
            }
            self.page_id = next;
            self.slot = 0;
        }
    }

    /// Advances past the cached tuple and returns `true` if a new one
    /// is now cached.
    pub fn advance(&mut self) -> bool {
        if self.done {
            return false;
        }
        self.slot += 1;
        self.advance_to_next_visible();
        self.cached.is_some()
    }

    pub fn current(&self) -> Option<&Tuple> {
        self.cached.as_ref()
    }

    /// Moves the cached tuple to the caller, avoiding a copy.
    pub fn extract(&mut self) -> Option<Tuple> {
        self.cached.take()
    }
}

impl Iterator for TableIterator {
    type Item = Tuple;

    fn next(&mut self) -> Option<Tuple> {
        let tuple = self.extract();
        if tuple.is_some() {
            self.advance();
        }
        tuple
    }
}
