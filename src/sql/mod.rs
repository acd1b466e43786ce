//! §6/SPEC_FULL §D SQL surface — a tagged `Statement` AST plus a narrow
//! reader over the literal SQL used by clients. Not a general dialect
//! parser: that dialect is the out-of-scope Parser collaborator.

pub mod ast;
pub mod parser;

pub use ast::*;
pub use parser::parse;
