//! §3 Catalog — two maps (name → OID, OID → owned metadata) behind a
//! single mutex. The OID counter is monotonic and OIDs are never reused
//! within a process lifetime.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use log::info;

use crate::buffer::BufferPool;
use crate::common::{Oid, PageId, INVALID_PAGE_ID, PAGE_SIZE};
use crate::error::{EngineError, Result};
use crate::log::LogManager;
use crate::storage::{FreePageMap, TablePage};
use crate::table::{Column, Schema, TableHeap};
use crate::types::{TypeId, Value};

use super::foreign_key::ForeignKey;
use super::table_metadata::{IndexMetadata, TableMetadata};

/// Reserved name for the private users/roles table (B.3); never visible
/// through `list_tables` and rejected from `CREATE TABLE`.
pub const SYSTEM_TABLE_NAME: &str = "__system";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Root,
    User,
}

impl Role {
    fn as_str(&self) -> &'static str {
        match self {
            Role::Root => "root",
            Role::User => "user",
        }
    }

    fn from_str(s: &str) -> Self {
        if s == "root" {
            Role::Root
        } else {
            Role::User
        }
    }
}

struct Inner {
    next_oid: Oid,
    name_to_oid: HashMap<String, Oid>,
    tables: HashMap<Oid, TableMetadata>,
    indexes: HashMap<String, IndexMetadata>,
}

pub struct Catalog {
    inner: Mutex<Inner>,
    buffer_pool: Arc<BufferPool>,
    free_map: Arc<Mutex<FreePageMap>>,
    log_manager: Arc<LogManager>,
}

impl Catalog {
    pub fn new(
        buffer_pool: Arc<BufferPool>,
        free_map: Arc<Mutex<FreePageMap>>,
        log_manager: Arc<LogManager>,
    ) -> Self {
        Self {
            inner: Mutex::new(Inner {
                next_oid: 1,
                name_to_oid: HashMap::new(),
                tables: HashMap::new(),
                indexes: HashMap::new(),
            }),
            buffer_pool,
            free_map,
            log_manager,
        }
    }

    /// Allocates the first heap page and registers the table. Fails if
    /// the name is already taken or reserved.
    pub fn create_table(
        &self,
        name: &str,
        schema: Schema,
        foreign_keys: Vec<ForeignKey>,
    ) -> Result<Oid> {
        self.create_table_inner(name, schema, foreign_keys, false)
    }

    fn create_table_inner(
        &self,
        name: &str,
        schema: Schema,
        foreign_keys: Vec<ForeignKey>,
        allow_reserved: bool,
    ) -> Result<Oid> {
        if !allow_reserved && name == SYSTEM_TABLE_NAME {
            return Err(EngineError::Catalog(format!("{name} is a reserved table name")));
        }
        // Reserve the name and OID up front so a concurrent create of the
        // same name fails fast instead of racing on the heap allocation.
        let oid = {
            let mut inner = self.inner.lock().unwrap();
            if inner.name_to_oid.contains_key(name) {
                return Err(EngineError::Catalog(format!("table {name} already exists")));
            }
            let oid = inner.next_oid;
            inner.next_oid += 1;
            inner.name_to_oid.insert(name.to_string(), oid);
            oid
        };

        let heap = match TableHeap::create(
            oid,
            Arc::clone(&self.buffer_pool),
            Arc::clone(&self.free_map),
            Arc::clone(&self.log_manager),
        ) {
            Ok(heap) => heap,
            Err(e) => {
                self.inner.lock().unwrap().name_to_oid.remove(name);
                return Err(e);
            }
        };
        let mut meta = TableMetadata::new(name, oid, schema, heap.first_page_id);
        meta.foreign_keys = foreign_keys;

        self.inner.lock().unwrap().tables.insert(oid, meta);
        info!("created table {name} (oid {oid})");
        Ok(oid)
    }

    pub fn get_table(&self, oid: Oid) -> Option<TableMetadata> {
        self.inner.lock().unwrap().tables.get(&oid).cloned()
    }

    pub fn table_oid(&self, name: &str) -> Option<Oid> {
        self.inner.lock().unwrap().name_to_oid.get(name).copied()
    }

    pub fn get_table_by_name(&self, name: &str) -> Option<TableMetadata> {
        let inner = self.inner.lock().unwrap();
        let oid = *inner.name_to_oid.get(name)?;
        inner.tables.get(&oid).cloned()
    }

    /// Every user table name, excluding the private `__system` table.
    pub fn list_tables(&self) -> Vec<String> {
        self.inner
            .lock()
            .unwrap()
            .name_to_oid
            .keys()
            .filter(|n| n.as_str() != SYSTEM_TABLE_NAME)
            .cloned()
            .collect()
    }

    /// Frees every page in the heap's chain via the free-page bitmap and
    /// erases the catalog entries.
    pub fn drop_table(&self, name: &str) -> Result<()> {
        let meta = {
            let mut inner = self.inner.lock().unwrap();
            let oid = inner
                .name_to_oid
                .remove(name)
                .ok_or_else(|| EngineError::Catalog(format!("unknown table {name}")))?;
            inner.tables.remove(&oid)
        };
        if let Some(meta) = meta {
            self.free_heap_pages(meta.first_page_id)?;
        }
        let dropped_indexes: Vec<String> = {
            let inner = self.inner.lock().unwrap();
            inner
                .indexes
                .values()
                .filter(|ix| ix.table_name == name)
                .map(|ix| ix.name.clone())
                .collect()
        };
        for ix_name in dropped_indexes {
            self.drop_index(&ix_name)?;
        }
        info!("dropped table {name}");
        Ok(())
    }

    fn free_heap_pages(&self, first_page_id: PageId) -> Result<()> {
        let mut page_id = first_page_id;
        while page_id != INVALID_PAGE_ID {
            let guard = self.buffer_pool.fetch_page_read(page_id)?;
            let page = TablePage::from_bytes(page_id, *guard);
            let next = page.next_page_id();
            drop(guard);
            self.free_map.lock().unwrap().deallocate(page_id);
            page_id = next;
        }
        Ok(())
    }

    /// Registers an index whose root page has already been allocated and
    /// initialized by the B+Tree module (the catalog does not know how
    /// to shape a tree node).
    pub fn register_index(
        &self,
        name: &str,
        table_name: &str,
        indexed_column: &str,
        root_page_id: PageId,
        key_type: TypeId,
    ) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if inner.indexes.contains_key(name) {
            return Err(EngineError::Catalog(format!("index {name} already exists")));
        }
        inner.indexes.insert(
            name.to_string(),
            IndexMetadata::new(name, table_name, indexed_column, root_page_id, key_type),
        );
        Ok(())
    }

    pub fn get_index(&self, name: &str) -> Option<IndexMetadata> {
        self.inner.lock().unwrap().indexes.get(name).cloned()
    }

    /// Every index registered against `table_name`, in no particular order
    /// — used by the executor to fan an insert/delete out to all of a
    /// table's indexes at once.
    pub fn indexes_for_table(&self, table_name: &str) -> Vec<IndexMetadata> {
        self.inner
            .lock()
            .unwrap()
            .indexes
            .values()
            .filter(|ix| ix.table_name == table_name)
            .cloned()
            .collect()
    }

    pub fn index_for_column(&self, table_name: &str, column: &str) -> Option<IndexMetadata> {
        self.inner
            .lock()
            .unwrap()
            .indexes
            .values()
            .find(|ix| ix.table_name == table_name && ix.indexed_column == column)
            .cloned()
    }

    /// Removes the directory entry and returns it so the caller can walk
    /// and free the tree's own pages.
    pub fn drop_index(&self, name: &str) -> Result<Option<IndexMetadata>> {
        Ok(self.inner.lock().unwrap().indexes.remove(name))
    }

    /// A root split replaces the tree's root page; the B+Tree itself has
    /// no way to reach the catalog, so the caller pushes the new id here.
    pub fn update_index_root(&self, name: &str, new_root_page_id: PageId) {
        if let Some(ix) = self.inner.lock().unwrap().indexes.get_mut(name) {
            ix.root_page_id = new_root_page_id;
        }
    }

    pub fn update_checkpoint(&self, oid: Oid, lsn: crate::common::Lsn, snapshot_page_id: PageId) {
        if let Some(meta) = self.inner.lock().unwrap().tables.get_mut(&oid) {
            meta.last_checkpoint_lsn = lsn;
            meta.checkpoint_snapshot_page_id = snapshot_page_id;
        }
    }

    /// Idempotent: creates the private users table on first call, opens
    /// it on every later call.
    pub fn ensure_system_table(&self) -> Result<TableMetadata> {
        if let Some(meta) = self.get_table_by_name(SYSTEM_TABLE_NAME) {
            return Ok(meta);
        }
        let oid = self.create_table_inner(
            SYSTEM_TABLE_NAME,
            system_table_schema(),
            Vec::new(),
            true,
        )?;
        Ok(self.get_table(oid).expect("just inserted"))
    }

    /// Serializes the whole catalog for page 1 of the main paged file.
    pub fn to_bytes(&self) -> Result<[u8; PAGE_SIZE]> {
        let inner = self.inner.lock().unwrap();
        let mut buf = Vec::with_capacity(PAGE_SIZE);
        buf.extend_from_slice(&inner.next_oid.to_le_bytes());
        buf.extend_from_slice(&(inner.tables.len() as u32).to_le_bytes());
        let mut tables: Vec<&TableMetadata> = inner.tables.values().collect();
        tables.sort_by_key(|t| t.oid);
        for meta in tables {
            encode_table_metadata(&mut buf, meta);
        }
        buf.extend_from_slice(&(inner.indexes.len() as u32).to_le_bytes());
        let mut indexes: Vec<&IndexMetadata> = inner.indexes.values().collect();
        indexes.sort_by(|a, b| a.name.cmp(&b.name));
        for ix in indexes {
            encode_index_metadata(&mut buf, ix);
        }
        if buf.len() > PAGE_SIZE {
            return Err(EngineError::Catalog(
                "serialized catalog does not fit in page 1; spills are not yet supported".into(),
            ));
        }
        let mut page = [0u8; PAGE_SIZE];
        page[..buf.len()].copy_from_slice(&buf);
        Ok(page)
    }

    /// Rebuilds the in-memory catalog from page 1's bytes.
    pub fn from_bytes(
        buf: &[u8; PAGE_SIZE],
        buffer_pool: Arc<BufferPool>,
        free_map: Arc<Mutex<FreePageMap>>,
        log_manager: Arc<LogManager>,
    ) -> Result<Self> {
        let mut cur = 0usize;
        let next_oid = read_u32(buf, &mut cur)?;
        let table_count = read_u32(buf, &mut cur)?;
        let mut tables = HashMap::new();
        let mut name_to_oid = HashMap::new();
        for _ in 0..table_count {
            let meta = decode_table_metadata(buf, &mut cur)?;
            name_to_oid.insert(meta.name.clone(), meta.oid);
            tables.insert(meta.oid, meta);
        }
        let index_count = read_u32(buf, &mut cur)?;
        let mut indexes = HashMap::new();
        for _ in 0..index_count {
            let ix = decode_index_metadata(buf, &mut cur)?;
            indexes.insert(ix.name.clone(), ix);
        }
        Ok(Self {
            inner: Mutex::new(Inner {
                next_oid,
                name_to_oid,
                tables,
                indexes,
            }),
            buffer_pool,
            free_map,
            log_manager,
        })
    }
}

fn system_table_schema() -> Schema {
    Schema::new(vec![
        Column::new("username", TypeId::Varchar)
            .primary_key()
            .with_max_len(64),
        Column::new("password_hash", TypeId::Varchar)
            .not_null()
            .with_max_len(128),
        Column::new("role", TypeId::Varchar).not_null().with_max_len(16),
    ])
}

pub fn role_to_value(role: Role) -> Value {
    Value::Varchar(role.as_str().to_string())
}

pub fn role_from_value(value: &Value) -> Role {
    match value {
        Value::Varchar(s) => Role::from_str(s),
        _ => Role::User,
    }
}

// --- catalog-page binary encoding -----------------------------------

fn put_string(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(&(s.len() as u32).to_le_bytes());
    buf.extend_from_slice(s.as_bytes());
}

fn read_u32(buf: &[u8], cur: &mut usize) -> Result<u32> {
    if *cur + 4 > buf.len() {
        return Err(EngineError::corruption(
            crate::common::CATALOG_PAGE_ID,
            "truncated catalog page",
        ));
    }
    let v = u32::from_le_bytes(buf[*cur..*cur + 4].try_into().unwrap());
    *cur += 4;
    Ok(v)
}

fn read_i32(buf: &[u8], cur: &mut usize) -> Result<i32> {
    Ok(read_u32(buf, cur)? as i32)
}

fn read_u64(buf: &[u8], cur: &mut usize) -> Result<u64> {
    if *cur + 8 > buf.len() {
        return Err(EngineError::corruption(
            crate::common::CATALOG_PAGE_ID,
            "truncated catalog page",
        ));
    }
    let v = u64::from_le_bytes(buf[*cur..*cur + 8].try_into().unwrap());
    *cur += 8;
    Ok(v)
}

fn read_u8(buf: &[u8], cur: &mut usize) -> Result<u8> {
    if *cur + 1 > buf.len() {
        return Err(EngineError::corruption(
            crate::common::CATALOG_PAGE_ID,
            "truncated catalog page",
        ));
    }
    let v = buf[*cur];
    *cur += 1;
    Ok(v)
}

fn read_string(buf: &[u8], cur: &mut usize) -> Result<String> {
    let len = read_u32(buf, cur)? as usize;
    if *cur + len > buf.len() {
        return Err(EngineError::corruption(
            crate::common::CATALOG_PAGE_ID,
            "truncated catalog string",
        ));
    }
    let s = String::from_utf8_lossy(&buf[*cur..*cur + len]).into_owned();
    *cur += len;
    Ok(s)
}

fn type_id_tag(t: TypeId) -> u8 {
    match t {
        TypeId::Integer => 0,
        TypeId::Boolean => 1,
        TypeId::Decimal => 2,
        TypeId::Timestamp => 3,
        TypeId::Varchar => 4,
    }
}

fn type_id_from_tag(tag: u8) -> Result<TypeId> {
    Ok(match tag {
        0 => TypeId::Integer,
        1 => TypeId::Boolean,
        2 => TypeId::Decimal,
        3 => TypeId::Timestamp,
        4 => TypeId::Varchar,
        other => {
            return Err(EngineError::corruption(
                crate::common::CATALOG_PAGE_ID,
                format!("bad type tag {other}"),
            ))
        }
    })
}

fn put_default(buf: &mut Vec<u8>, default: &Option<Value>) {
    match default {
        None => buf.push(0),
        Some(Value::Integer(v)) => {
            buf.push(1);
            buf.extend_from_slice(&v.to_le_bytes());
        }
        Some(Value::Boolean(v)) => {
            buf.push(2);
            buf.push(*v as u8);
        }
        Some(Value::Decimal(v)) => {
            buf.push(3);
            buf.extend_from_slice(&v.to_le_bytes());
        }
        Some(Value::Timestamp(v)) => {
            buf.push(4);
            buf.extend_from_slice(&v.to_le_bytes());
        }
        Some(Value::Varchar(s)) => {
            buf.push(5);
            put_string(buf, s);
        }
        Some(Value::Null) => buf.push(0),
    }
}

fn read_default(buf: &[u8], cur: &mut usize) -> Result<Option<Value>> {
    let tag = read_u8(buf, cur)?;
    Ok(match tag {
        0 => None,
        1 => Some(Value::Integer(read_u64(buf, cur)? as i64)),
        2 => Some(Value::Boolean(read_u8(buf, cur)? != 0)),
        3 => Some(Value::Decimal(f64::from_bits(read_u64(buf, cur)?))),
        4 => Some(Value::Timestamp(read_u64(buf, cur)? as i64)),
        5 => Some(Value::Varchar(read_string(buf, cur)?)),
        other => {
            return Err(EngineError::corruption(
                crate::common::CATALOG_PAGE_ID,
                format!("bad default tag {other}"),
            ))
        }
    })
}

fn encode_table_metadata(buf: &mut Vec<u8>, meta: &TableMetadata) {
    buf.extend_from_slice(&meta.oid.to_le_bytes());
    put_string(buf, &meta.name);
    buf.extend_from_slice(&meta.first_page_id.to_le_bytes());
    buf.extend_from_slice(&meta.last_checkpoint_lsn.to_le_bytes());
    buf.extend_from_slice(&meta.checkpoint_snapshot_page_id.to_le_bytes());

    buf.extend_from_slice(&(meta.foreign_keys.len() as u32).to_le_bytes());
    for fk in &meta.foreign_keys {
        put_string(buf, &fk.column);
        put_string(buf, &fk.ref_table);
        put_string(buf, &fk.ref_column);
    }

    buf.extend_from_slice(&(meta.schema.columns.len() as u32).to_le_bytes());
    for col in &meta.schema.columns {
        put_string(buf, &col.name);
        buf.push(type_id_tag(col.type_id));
        buf.extend_from_slice(&(col.max_len as u32).to_le_bytes());
        buf.push(col.primary_key as u8);
        buf.push(col.nullable as u8);
        buf.push(col.unique as u8);
        put_default(buf, &col.default);
    }
}

fn decode_table_metadata(buf: &[u8], cur: &mut usize) -> Result<TableMetadata> {
    let oid = read_u32(buf, cur)?;
    let name = read_string(buf, cur)?;
    let first_page_id = read_i32(buf, cur)?;
    let last_checkpoint_lsn = read_u64(buf, cur)?;
    let checkpoint_snapshot_page_id = read_i32(buf, cur)?;

    let fk_count = read_u32(buf, cur)?;
    let mut foreign_keys = Vec::with_capacity(fk_count as usize);
    for _ in 0..fk_count {
        let column = read_string(buf, cur)?;
        let ref_table = read_string(buf, cur)?;
        let ref_column = read_string(buf, cur)?;
        foreign_keys.push(ForeignKey::new(column, ref_table, ref_column));
    }

    let col_count = read_u32(buf, cur)?;
    let mut columns = Vec::with_capacity(col_count as usize);
    for _ in 0..col_count {
        let name = read_string(buf, cur)?;
        let type_id = type_id_from_tag(read_u8(buf, cur)?)?;
        let max_len = read_u32(buf, cur)? as usize;
        let primary_key = read_u8(buf, cur)? != 0;
        let nullable = read_u8(buf, cur)? != 0;
        let unique = read_u8(buf, cur)? != 0;
        let default = read_default(buf, cur)?;
        let mut col = Column::new(name, type_id).with_max_len(max_len);
        col.primary_key = primary_key;
        col.nullable = nullable;
        col.unique = unique;
        col.default = default;
        columns.push(col);
    }

    let mut meta = TableMetadata::new(name, oid, Schema::new(columns), first_page_id);
    meta.foreign_keys = foreign_keys;
    meta.last_checkpoint_lsn = last_checkpoint_lsn;
    meta.checkpoint_snapshot_page_id = checkpoint_snapshot_page_id;
    Ok(meta)
}

fn encode_index_metadata(buf: &mut Vec<u8>, ix: &IndexMetadata) {
    put_string(buf, &ix.name);
    put_string(buf, &ix.table_name);
    put_string(buf, &ix.indexed_column);
    buf.extend_from_slice(&ix.root_page_id.to_le_bytes());
    buf.push(type_id_tag(ix.key_type));
}

fn decode_index_metadata(buf: &[u8], cur: &mut usize) -> Result<IndexMetadata> {
    let name = read_string(buf, cur)?;
    let table_name = read_string(buf, cur)?;
    let indexed_column = read_string(buf, cur)?;
    let root_page_id = read_i32(buf, cur)?;
    let key_type = type_id_from_tag(read_u8(buf, cur)?)?;
    Ok(IndexMetadata::new(
        name,
        table_name,
        indexed_column,
        root_page_id,
        key_type,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::DiskManager;
    use tempfile::tempdir;

    fn fixture() -> (Arc<BufferPool>, Arc<Mutex<FreePageMap>>, Arc<LogManager>, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let disk = Arc::new(DiskManager::open(dir.path().join("t.francodb"), None).unwrap());
        let pool = Arc::new(BufferPool::new(16, Arc::clone(&disk)));
        let free_map = Arc::new(Mutex::new(FreePageMap::from_page_bytes(&[0u8; PAGE_SIZE])));
        let log = Arc::new(LogManager::open(dir.path().join("wal.log")).unwrap());
        (pool, free_map, log, dir)
    }

    #[test]
    fn create_then_lookup_round_trips() {
        let (pool, free_map, log, _dir) = fixture();
        let catalog = Catalog::new(pool, free_map, log);
        let schema = Schema::new(vec![Column::new("id", TypeId::Integer).primary_key()]);
        let oid = catalog.create_table("users", schema, Vec::new()).unwrap();
        assert_eq!(catalog.table_oid("users"), Some(oid));
        assert!(catalog.get_table_by_name("users").is_some());
        assert!(catalog.create_table(
            "users",
            Schema::new(vec![Column::new("id", TypeId::Integer)]),
            Vec::new()
        )
        .is_err());
    }

    #[test]
    fn reserved_name_is_rejected() {
        let (pool, free_map, log, _dir) = fixture();
        let catalog = Catalog::new(pool, free_map, log);
        let schema = Schema::new(vec![Column::new("a", TypeId::Integer)]);
        assert!(catalog.create_table(SYSTEM_TABLE_NAME, schema, Vec::new()).is_err());
    }

    #[test]
    fn serialize_then_deserialize_preserves_schema() {
        let (pool, free_map, log, _dir) = fixture();
        let catalog = Catalog::new(Arc::clone(&pool), Arc::clone(&free_map), Arc::clone(&log));
        let schema = Schema::new(vec![
            Column::new("id", TypeId::Integer).primary_key(),
            Column::new("name", TypeId::Varchar).with_max_len(32),
        ]);
        catalog.create_table("widgets", schema, Vec::new()).unwrap();
        let bytes = catalog.to_bytes().unwrap();

        let restored = Catalog::from_bytes(&bytes, pool, free_map, log).unwrap();
        let meta = restored.get_table_by_name("widgets").unwrap();
        assert_eq!(meta.schema.columns.len(), 2);
        assert_eq!(meta.schema.columns[1].name, "name");
    }

    #[test]
    fn ensure_system_table_is_idempotent() {
        let (pool, free_map, log, _dir) = fixture();
        let catalog = Catalog::new(pool, free_map, log);
        let first = catalog.ensure_system_table().unwrap();
        let second = catalog.ensure_system_table().unwrap();
        assert_eq!(first.oid, second.oid);
        assert!(catalog.list_tables().is_empty());
    }
}
