//! §3 Schema / Column — ordered column list with byte offsets into a
//! tuple's fixed region.

use crate::types::{TypeId, Value};

#[derive(Debug, Clone)]
pub struct Column {
    pub name: String,
    pub type_id: TypeId,
    /// Declared max length for `Varchar`; ignored for other types.
    pub max_len: usize,
    /// Byte offset of this column's fixed-region slot, assigned by `Schema::new`.
    pub offset: usize,
    pub primary_key: bool,
    pub nullable: bool,
    pub unique: bool,
    pub default: Option<Value>,
}

impl Column {
    pub fn new(name: impl Into<String>, type_id: TypeId) -> Self {
        Self {
            name: name.into(),
            type_id,
            max_len: 255,
            offset: 0,
            primary_key: false,
            nullable: true,
            unique: false,
            default: None,
        }
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self.nullable = false;
        self
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn with_max_len(mut self, len: usize) -> Self {
        self.max_len = len;
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }
}

/// A tuple's fixed region is `[null_bitmap][col0][col1]...`; variable
/// columns store an 8-byte `[heap_offset, length]` pair in their slot
/// and the actual bytes in the heap region that follows.
#[derive(Debug, Clone)]
pub struct Schema {
    pub columns: Vec<Column>,
    pub null_bitmap_len: usize,
    pub fixed_len: usize,
}

impl Schema {
    pub fn new(mut columns: Vec<Column>) -> Self {
        let null_bitmap_len = columns.len().div_ceil(8);
        let mut offset = null_bitmap_len;
        for col in &mut columns {
            col.offset = offset;
            offset += col.type_id.fixed_width();
        }
        Self {
            columns,
            null_bitmap_len,
            fixed_len: offset,
        }
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn primary_key_index(&self) -> Option<usize> {
        self.columns.iter().position(|c| c.primary_key)
    }
}
