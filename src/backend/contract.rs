//! The native instance layout every backend's emitted code assumes.
//! This crate does not allocate or lay out real memory for it — that is
//! the codegen backend's job — but it models the contract as data so
//! `lower::lower_module` has something concrete to populate and a
//! backend implementation has something concrete to consume.

use crate::bytecode::ValueType;
use crate::error::BackendResult;

/// `(size, import_size, export_size)` plus the entity/import/export
/// arrays a metadata block carries, for one entity kind.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MetadataBlock<Entity> {
    pub entities: Vec<Entity>,
    pub imports: Vec<ImportDescriptor>,
    pub exports: Vec<ExportDescriptor>,
}

impl<Entity> MetadataBlock<Entity> {
    pub fn size(&self) -> usize {
        self.entities.len()
    }
    pub fn import_size(&self) -> usize {
        self.imports.len()
    }
    pub fn export_size(&self) -> usize {
        self.exports.len()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ImportDescriptor {
    pub index: u32,
    pub module_name: String,
    pub entity_name: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ExportDescriptor {
    pub index: u32,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MemoryRecord {
    pub min_pages: u32,
    /// Runtime sentinel for "no maximum", bridged via [`bound_to_runtime`].
    pub max_pages: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TableRecord {
    pub min_entries: u32,
    pub max_entries: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct GlobalRecord {
    pub type_char: char,
    pub mutable: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct FunctionRecord {
    pub signature: String,
}

/// A function-slot pair: an imported function's `(instance_t*, function_t*)`
/// entry. `foreign_instance` is `None` when the callee lives in the same
/// instance; a non-null instance pointer here means call into a foreign
/// instance.
#[derive(Clone, Debug, PartialEq)]
pub struct ImportedFunctionSlot {
    pub foreign_instance: Option<String>,
    pub function: FunctionRecord,
}

/// The fixed-order instance layout. `num_imported_functions` is
/// `function_slots.len()`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct InstanceLayout {
    pub memories: MetadataBlock<MemoryRecord>,
    pub tables: MetadataBlock<TableRecord>,
    pub globals: MetadataBlock<GlobalRecord>,
    pub functions: MetadataBlock<FunctionRecord>,
    pub function_slots: Vec<ImportedFunctionSlot>,
}

/// The reference runtime's "no maximum" sentinel: `Option::None` in the
/// bytecode layer becomes `u32::MAX` at this single lowering seam, and
/// nowhere else in the pipeline.
pub fn bound_to_runtime(bound: Option<u32>) -> u32 {
    bound.unwrap_or(u32::MAX)
}

pub fn runtime_to_bound(raw: u32) -> Option<u32> {
    if raw == u32::MAX {
        None
    } else {
        Some(raw)
    }
}

pub fn global_type_char(ty: ValueType) -> BackendResult<char> {
    super::signature::type_char(ty)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn bound_bridge_round_trips_through_the_sentinel() {
        assert_eq!(bound_to_runtime(None), u32::MAX);
        assert_eq!(bound_to_runtime(Some(4)), 4);
        assert_eq!(runtime_to_bound(u32::MAX), None);
        assert_eq!(runtime_to_bound(4), Some(4));
    }
}
