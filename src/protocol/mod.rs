//! §6 External interfaces — the wire codec and connection string. Thin
//! by design: the engine's contract is a statement AST (see `sql`), not
//! a network stack, so this module only frames bytes.

pub mod connection_string;
pub mod frame;

pub use connection_string::ConnectionString;
pub use frame::{Frame, FrameKind};
