//! B.1 Foreign-key checks — `RESTRICT`-only referential integrity,
//! checked by the Insert/Update/Delete executors. The original's
//! `ForeignKeyManager` left `ReferencedRowExists`/`GetReferencingForeignKeys`
//! as stubs that always answered "yes"/"none"; here they actually walk
//! the referenced or referencing table so the constraint is load-bearing.

use crate::error::{EngineError, Result};
use crate::table::TableHeap;
use crate::types::Value;

use super::ExecutionContext;

/// `value` must be `NULL` or present as `ref_column` in `ref_table`.
fn referenced_row_exists(
    ctx: &ExecutionContext<'_>,
    ref_table: &str,
    ref_column: &str,
    value: &Value,
) -> Result<bool> {
    if value.is_null() {
        return Ok(true);
    }
    let meta = ctx
        .catalog
        .get_table_by_name(ref_table)
        .ok_or_else(|| EngineError::Catalog(format!("unknown table {ref_table}")))?;
    let Some(col_idx) = meta.schema.column_index(ref_column) else {
        return Ok(false);
    };
    let heap = ctx.open_heap(meta.oid, meta.first_page_id);
    Ok(scan_for_value(&heap, &meta.schema, col_idx, value))
}

fn scan_for_value(
    heap: &TableHeap,
    schema: &crate::table::Schema,
    col_idx: usize,
    value: &Value,
) -> bool {
    heap.iter().any(|t| &t.value_at(schema, col_idx) == value)
}

/// Checked on `INSERT`/on an `UPDATE` that changes an FK column: every
/// foreign key on `table_name` must reference an existing row.
pub fn validate_insert(ctx: &ExecutionContext<'_>, table_name: &str, values: &[Value]) -> Result<()> {
    let meta = ctx
        .catalog
        .get_table_by_name(table_name)
        .ok_or_else(|| EngineError::Catalog(format!("unknown table {table_name}")))?;
    for fk in &meta.foreign_keys {
        let Some(col_idx) = meta.schema.column_index(&fk.column) else {
            continue;
        };
        if !referenced_row_exists(ctx, &fk.ref_table, &fk.ref_column, &values[col_idx])? {
            return Err(EngineError::Execution(format!(
                "foreign key violation: no row in {} ({}) matching {}",
                fk.ref_table, fk.ref_column, values[col_idx]
            )));
        }
    }
    Ok(())
}

/// Checked on `UPDATE`: only columns whose value actually changed are
/// re-validated, matching the original's `ValidateUpdate`.
pub fn validate_update(
    ctx: &ExecutionContext<'_>,
    table_name: &str,
    old_values: &[Value],
    new_values: &[Value],
) -> Result<()> {
    let meta = ctx
        .catalog
        .get_table_by_name(table_name)
        .ok_or_else(|| EngineError::Catalog(format!("unknown table {table_name}")))?;
    for fk in &meta.foreign_keys {
        let Some(col_idx) = meta.schema.column_index(&fk.column) else {
            continue;
        };
        if old_values[col_idx] == new_values[col_idx] {
            continue;
        }
        if !referenced_row_exists(ctx, &fk.ref_table, &fk.ref_column, &new_values[col_idx])? {
            return Err(EngineError::Execution(format!(
                "foreign key violation on update: no row in {} ({}) matching {}",
                fk.ref_table, fk.ref_column, new_values[col_idx]
            )));
        }
    }
    Ok(())
}

/// Checked on `DELETE`: `RESTRICT` semantics — reject the delete if any
/// other table's foreign key still points at this row.
pub fn validate_delete(ctx: &ExecutionContext<'_>, table_name: &str, deleted: &[Value]) -> Result<()> {
    let Some(pk_idx) = ctx
        .catalog
        .get_table_by_name(table_name)
        .and_then(|m| m.schema.primary_key_index())
    else {
        return Ok(());
    };
    let key = &deleted[pk_idx];
    for other_name in ctx.catalog.list_tables() {
        if other_name == table_name {
            continue;
        }
        let Some(other_meta) = ctx.catalog.get_table_by_name(&other_name) else {
            continue;
        };
        for fk in &other_meta.foreign_keys {
            if fk.ref_table != table_name {
                continue;
            }
            let Some(col_idx) = other_meta.schema.column_index(&fk.column) else {
                continue;
            };
            let heap = ctx.open_heap(other_meta.oid, other_meta.first_page_id);
            if scan_for_value(&heap, &other_meta.schema, col_idx, key) {
                return Err(EngineError::Execution(format!(
                    "cannot delete: referenced by {}.{}",
                    other_name, fk.column
                )));
            }
        }
    }
    Ok(())
}
