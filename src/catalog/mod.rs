//! §3/§4 Catalog — name/OID/table-metadata mapping, plus the private
//! `__system` table used by authentication (B.3).

pub mod catalog;
pub mod foreign_key;
pub mod table_metadata;

pub use catalog::{role_from_value, role_to_value, Catalog, Role, SYSTEM_TABLE_NAME};
pub use foreign_key::ForeignKey;
pub use table_metadata::{IndexMetadata, TableMetadata};
