//! The bytecode-level `Module`: ordered entity sequences, imports/exports,
//! and the element/data segments, as the streaming parser builds them.
//!
//! Each per-kind index space (`function_types`, `tables`, `memories`,
//! `globals`) is unified: imports occupy the low indices in the order they
//! appear in the import section, locally-defined entities follow in the
//! order their section declares them. A function's *body*, however, only
//! exists for the local tail of the function index space, so it lives in
//! the separate `functions` vector, addressed by
//! `idx - num_imported_functions()`.

use super::instr::Instruction;
use super::{FuncIdx, FunctionType, GlobalIdx, GlobalType, MemIdx, MemoryType, TableIdx, TableType};

/// A restricted constant expression: either a literal or a read of an
/// already-defined immutable global. Used for segment offsets and global
/// initializers.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum ConstExpr {
    I32(i32),
    I64(i64),
    F32(u32),
    F64(u64),
    GlobalGet(GlobalIdx),
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ElementSegment {
    pub table: TableIdx,
    pub offset: ConstExpr,
    pub func_indices: Vec<FuncIdx>,
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct DataSegment {
    pub memory: MemIdx,
    pub offset: ConstExpr,
    pub bytes: Vec<u8>,
}

/// A locally-defined function body: the run-length-decoded local
/// declarations followed by its body expression. The signature is looked
/// up via the unified function index space (`Module::function_type`),
/// not stored redundantly here.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Function {
    pub locals: Vec<super::ValueType>,
    pub body: Vec<Instruction>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ImportExportDescriptor {
    Type(super::TypeIdx),
    Table(TableIdx),
    Memory(MemIdx),
    Global(GlobalIdx),
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Import {
    pub module: String,
    pub name: String,
    pub descriptor: ImportExportDescriptor,
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Export {
    pub name: String,
    pub descriptor: ImportExportDescriptor,
}

/// A module as built by the streaming parser.
#[derive(Clone, Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct Module {
    pub types: Vec<FunctionType>,

    /// Unified function index space: one type index per function, imports
    /// first.
    pub function_types: Vec<super::TypeIdx>,
    /// Local function bodies only, in declaration order. Entry `i`
    /// corresponds to function index `num_imported_functions() + i`.
    pub functions: Vec<Function>,

    /// Unified table index space.
    pub tables: Vec<TableType>,
    /// Unified memory index space.
    pub memories: Vec<MemoryType>,
    /// Unified global index space (type only; local initializers live in
    /// `global_inits`, one per locally-defined global).
    pub globals: Vec<GlobalType>,
    pub global_inits: Vec<ConstExpr>,

    pub elements: Vec<ElementSegment>,
    pub data: Vec<DataSegment>,
    pub start: Option<FuncIdx>,
    pub imports: Vec<Import>,
    pub exports: Vec<Export>,

    /// How many of the low indices in each space are imports, tracked as
    /// the parser appends import entries ahead of the corresponding
    /// section's locals.
    pub num_imported_functions: usize,
    pub num_imported_tables: usize,
    pub num_imported_memories: usize,
    pub num_imported_globals: usize,

    /// Raw custom sections not claimed by a registered handler, in file
    /// order.
    pub custom_sections: Vec<(String, Vec<u8>)>,
}

impl Module {
    pub fn empty() -> Self {
        Module::default()
    }

    pub fn function_type(&self, idx: FuncIdx) -> Option<&FunctionType> {
        let index = crate::entity::EntityRef::index(idx);
        let type_idx = *self.function_types.get(index)?;
        self.types.get(crate::entity::EntityRef::index(type_idx))
    }

    pub fn function_is_imported(&self, idx: FuncIdx) -> bool {
        crate::entity::EntityRef::index(idx) < self.num_imported_functions
    }

    /// The locally-defined body for a function index, or `None` if it names
    /// an import.
    pub fn local_function(&self, idx: FuncIdx) -> Option<&Function> {
        let index = crate::entity::EntityRef::index(idx);
        index
            .checked_sub(self.num_imported_functions)
            .and_then(|local| self.functions.get(local))
    }

    pub fn table_type(&self, idx: TableIdx) -> Option<TableType> {
        self.tables.get(crate::entity::EntityRef::index(idx)).copied()
    }

    pub fn memory_type(&self, idx: MemIdx) -> Option<MemoryType> {
        self.memories.get(crate::entity::EntityRef::index(idx)).copied()
    }

    pub fn global_type(&self, idx: GlobalIdx) -> Option<GlobalType> {
        self.globals.get(crate::entity::EntityRef::index(idx)).copied()
    }

    pub fn num_tables(&self) -> usize {
        self.tables.len()
    }

    pub fn num_memories(&self) -> usize {
        self.memories.len()
    }

    pub fn num_globals(&self) -> usize {
        self.globals.len()
    }

    pub fn num_functions(&self) -> usize {
        self.function_types.len()
    }
}
