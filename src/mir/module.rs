//! The MIR-level `Module`: the lifted shells for every module-level
//! entity, with import/export annotations and materialized initializer
//! expressions, as the translator requires before it can build any
//! function body.

use crate::bytecode::{GlobalType, MemoryType, TableType, ValueType};
use crate::entity::EntityVec;

use super::function::Function;
use super::{MirData, MirElem, MirFunc, MirGlobal, MirMemory, MirTable};

/// A restricted constant expression materialized at lift time: either a
/// literal or a read of an already-defined immutable global.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum InitializerExpr {
    Constant(super::instr::ConstValue),
    GlobalGet(MirGlobal),
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub enum FuncDecl {
    Import { module: String, name: String, params: Vec<ValueType>, results: Vec<ValueType> },
    Local(Function),
}

impl FuncDecl {
    pub fn params(&self) -> &[ValueType] {
        match self {
            FuncDecl::Import { params, .. } => params,
            FuncDecl::Local(f) => &f.params,
        }
    }

    pub fn results(&self) -> &[ValueType] {
        match self {
            FuncDecl::Import { results, .. } => results,
            FuncDecl::Local(f) => &f.results,
        }
    }

    pub fn body(&self) -> Option<&Function> {
        match self {
            FuncDecl::Local(f) => Some(f),
            FuncDecl::Import { .. } => None,
        }
    }

    pub fn body_mut(&mut self) -> Option<&mut Function> {
        match self {
            FuncDecl::Local(f) => Some(f),
            FuncDecl::Import { .. } => None,
        }
    }
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct GlobalDecl {
    pub ty: GlobalType,
    pub import: Option<(String, String)>,
    pub init: Option<InitializerExpr>,
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct MemoryDecl {
    pub ty: MemoryType,
    pub import: Option<(String, String)>,
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct TableDecl {
    pub ty: TableType,
    pub import: Option<(String, String)>,
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct DataSegment {
    pub memory: MirMemory,
    pub offset: InitializerExpr,
    pub bytes: Vec<u8>,
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct ElementSegment {
    pub table: MirTable,
    pub offset: InitializerExpr,
    pub func_indices: Vec<MirFunc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ExportKind {
    Func(MirFunc),
    Table(MirTable),
    Memory(MirMemory),
    Global(MirGlobal),
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct Export {
    pub name: String,
    pub kind: ExportKind,
}

#[derive(Clone, Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct Module {
    pub funcs: EntityVec<MirFunc, FuncDecl>,
    pub globals: EntityVec<MirGlobal, GlobalDecl>,
    pub memories: EntityVec<MirMemory, MemoryDecl>,
    pub tables: EntityVec<MirTable, TableDecl>,
    pub data: EntityVec<MirData, DataSegment>,
    pub elements: EntityVec<MirElem, ElementSegment>,
    pub start: Option<MirFunc>,
    pub exports: Vec<Export>,
}

impl Module {
    pub fn empty() -> Self {
        Module::default()
    }

    pub fn for_each_function<F: FnMut(MirFunc, &Function)>(&self, mut f: F) {
        for (idx, decl) in self.funcs.entries() {
            if let FuncDecl::Local(body) = decl {
                f(idx, body);
            }
        }
    }

    pub fn for_each_function_mut<F: FnMut(MirFunc, &mut Function)>(&mut self, mut f: F) {
        for (idx, decl) in self.funcs.entries_mut() {
            if let FuncDecl::Local(body) = decl {
                f(idx, body);
            }
        }
    }
}
