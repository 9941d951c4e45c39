//! The bytecode data model: value types, function/memory/table/global
//! types, phantom-tagged index spaces, and the `Module` that a
//! parsed-but-not-yet-validated binary becomes.

pub mod instr;
mod module;
mod types;

pub use instr::{BlockResultType, Instruction};
pub use module::*;
pub use types::*;
