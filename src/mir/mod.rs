//! The middle intermediate representation: an SSA graph with explicit
//! `Phi` nodes, a module-level ownership model, and cross-entity
//! use-site tracking.

pub mod function;
pub mod instr;
mod module;
mod types;
mod use_sites;

pub use function::{BasicBlock, Function};
pub use instr::{Cast, ConstValue, Instruction, MemArg, MemoryWidth, Terminator};
pub use module::{
    DataSegment, ElementSegment, Export, ExportKind, FuncDecl, GlobalDecl, InitializerExpr,
    MemoryDecl, Module, TableDecl,
};
pub use types::{Block, Local, MirData, MirElem, MirFunc, MirGlobal, MirMemory, MirTable, Type, Value};
pub use use_sites::{Referrer, UseSiteTracker};
