//! Lowers `mir::Module` into the fixed instruction/metadata shapes a
//! native codegen backend consumes. This crate does not emit machine
//! code; it produces a fully-described `LoweredModule` and leaves final
//! codegen to an external `NativeCodegenBackend`, treating that crate as
//! the one external dependency called at the very last step.

use anyhow::Result;

use crate::bytecode::instr::ConvertOp;
use crate::bytecode::ValueType;
use crate::config::TranslationOptions;
use crate::entity::EntityRef;
use crate::mir::{self, Block, FuncDecl, Instruction, MirFunc, Terminator, Value};

use super::contract::{
    self, ExportDescriptor, FunctionRecord, GlobalRecord, ImportDescriptor, ImportedFunctionSlot,
    InstanceLayout, MemoryRecord, TableRecord,
};
use super::signature::signature_string;

/// `Convert`'s five lowering shapes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CastMode {
    Conversion,
    ConversionSigned,
    ConversionUnsigned,
    Reinterpret,
    SatConversionSigned,
    SatConversionUnsigned,
}

pub fn cast_mode(op: ConvertOp) -> CastMode {
    use ConvertOp::*;
    match op {
        I32WrapI64 | F32DemoteF64 | F64PromoteF32 => CastMode::Conversion,
        I32ReinterpretF32 | I64ReinterpretF64 | F32ReinterpretI32 | F64ReinterpretI64 => CastMode::Reinterpret,
        I64ExtendI32S | I32TruncF32S | I32TruncF64S | I64TruncF32S | I64TruncF64S | F32ConvertI32S
        | F32ConvertI64S | F64ConvertI32S | F64ConvertI64S => CastMode::ConversionSigned,
        I64ExtendI32U | I32TruncF32U | I32TruncF64U | I64TruncF32U | I64TruncF64U | F32ConvertI32U
        | F32ConvertI64U | F64ConvertI32U | F64ConvertI64U => CastMode::ConversionUnsigned,
        I32TruncSatF32S | I32TruncSatF64S | I64TruncSatF32S | I64TruncSatF64S => CastMode::SatConversionSigned,
        I32TruncSatF32U | I32TruncSatF64U | I64TruncSatF32U | I64TruncSatF64U => CastMode::SatConversionUnsigned,
    }
}

/// One MIR op's lowered shape. Most instructions carry straight through
/// (`Mir`); the ones needing a guard check or multi-step address/call
/// sequence get an explicit, expanded variant so a backend never has to
/// re-derive that sequence itself.
#[derive(Clone, Debug)]
pub enum NativeOp {
    Mir(Instruction),
    /// `address = base_of_memory + zext(offset)`, computed once and fed
    /// to both the guard call and the load/store.
    EffectiveAddress { memory: mir::MirMemory, base: Value, offset: u32 },
    /// Guards `address`, the value the preceding `EffectiveAddress` step in
    /// this instruction's lowering computed — never the raw pre-offset base.
    MemoryGuardCall { memory: mir::MirMemory, address: Value, width_bytes: u32 },
    LoadAt { address: Value, width: mir::MemoryWidth, result_type: ValueType, aligned: bool },
    StoreAt { address: Value, width: mir::MemoryWidth, value: Value, aligned: bool },
    CallWithInstance { func: MirFunc, args: Vec<Value> },
    TableGuardCall { table: mir::MirTable, index: Value },
    CallIndirectLowered { table: mir::MirTable, index: Value, signature: String, args: Vec<Value> },
    CastLowered { mode: CastMode, op: ConvertOp, operand: Value },
}

#[derive(Clone, Debug)]
pub struct NativeInstr {
    pub value: Value,
    pub op: NativeOp,
}

#[derive(Clone, Debug)]
pub struct NativeBlock {
    pub instrs: Vec<NativeInstr>,
    pub terminator: Terminator,
}

#[derive(Clone, Debug)]
pub struct NativeFunction {
    pub name: String,
    pub signature: String,
    pub entry: Block,
    pub exit: Block,
    pub blocks: Vec<(Block, NativeBlock)>,
}

#[derive(Clone, Debug, Default)]
pub struct LoweredModule {
    pub layout: InstanceLayout,
    pub functions: Vec<NativeFunction>,
}

/// An external machine-code emitter consuming a `LoweredModule`; nothing
/// in this crate implements it beyond the no-op test stub below.
pub trait NativeCodegenBackend {
    fn emit(&self, module: &LoweredModule) -> Result<Vec<u8>>;
}

/// Accepts any `LoweredModule` and emits nothing; used to exercise the
/// lowering pass end-to-end without a real codegen dependency.
pub struct NullBackend;

impl NativeCodegenBackend for NullBackend {
    fn emit(&self, _module: &LoweredModule) -> Result<Vec<u8>> {
        Ok(Vec::new())
    }
}

pub fn lower_module(module: &mir::Module, options: &TranslationOptions) -> Result<LoweredModule> {
    let layout = lower_layout(module)?;
    let mut functions = Vec::new();
    for decl in module.funcs.values() {
        if let FuncDecl::Local(f) = decl {
            functions.push(lower_function(f, options)?);
        }
    }
    Ok(LoweredModule { layout, functions })
}

fn lower_layout(module: &mir::Module) -> Result<InstanceLayout> {
    let mut function_slots = Vec::new();
    let mut function_records = Vec::new();
    for decl in module.funcs.values() {
        match decl {
            FuncDecl::Import { params, results, .. } => {
                let record = FunctionRecord { signature: signature_string(params, results)? };
                function_slots.push(ImportedFunctionSlot { foreign_instance: None, function: record.clone() });
                function_records.push(record);
            }
            FuncDecl::Local(f) => {
                function_records.push(FunctionRecord { signature: signature_string(&f.params, &f.results)? });
            }
        }
    }

    let memories = module
        .memories
        .values()
        .map(|m| MemoryRecord {
            min_pages: m.ty.limits.min,
            max_pages: contract::bound_to_runtime(m.ty.limits.max),
        })
        .collect();
    let tables = module
        .tables
        .values()
        .map(|t| TableRecord {
            min_entries: t.ty.limits.min,
            max_entries: contract::bound_to_runtime(t.ty.limits.max),
        })
        .collect();
    let mut globals = Vec::new();
    for g in module.globals.values() {
        globals.push(GlobalRecord {
            type_char: contract::global_type_char(g.ty.value_type)?,
            mutable: g.ty.mutability.is_mutable(),
        });
    }

    let mut exports = Vec::new();
    for export in &module.exports {
        if let mir::ExportKind::Func(f) = export.kind {
            exports.push(ExportDescriptor { index: f.index() as u32, name: export.name.clone() });
        }
    }

    let imports: Vec<ImportDescriptor> = module
        .funcs
        .values()
        .enumerate()
        .filter_map(|(i, decl)| match decl {
            FuncDecl::Import { module, name, .. } => {
                Some(ImportDescriptor { index: i as u32, module_name: module.clone(), entity_name: name.clone() })
            }
            FuncDecl::Local(_) => None,
        })
        .collect();

    Ok(InstanceLayout {
        memories: contract::MetadataBlock { entities: memories, imports: vec![], exports: vec![] },
        tables: contract::MetadataBlock { entities: tables, imports: vec![], exports: vec![] },
        globals: contract::MetadataBlock { entities: globals, imports: vec![], exports: vec![] },
        functions: contract::MetadataBlock { entities: function_records, imports, exports },
        function_slots,
    })
}

fn lower_function(f: &mir::Function, options: &TranslationOptions) -> Result<NativeFunction> {
    let signature = signature_string(&f.params, &f.results)?;
    let mut blocks = Vec::new();
    for block in f.blocks.iter() {
        blocks.push((block, lower_block(f, block, options)?));
    }
    Ok(NativeFunction { name: f.name.clone(), signature, entry: f.entry, exit: f.exit, blocks })
}

fn lower_block(f: &mir::Function, block: Block, options: &TranslationOptions) -> Result<NativeBlock> {
    let mut instrs = Vec::new();
    for &value in &f.blocks[block].insts {
        lower_instruction(f, value, options, &mut instrs)?;
    }
    Ok(NativeBlock { instrs, terminator: f.blocks[block].terminator.clone() })
}

fn lower_instruction(
    f: &mir::Function,
    value: Value,
    options: &TranslationOptions,
    out: &mut Vec<NativeInstr>,
) -> Result<()> {
    match &f.values[value] {
        Instruction::Load { memarg, width, result_type, addr } => {
            out.push(NativeInstr {
                value,
                op: NativeOp::EffectiveAddress { memory: memarg.memory, base: *addr, offset: memarg.offset },
            });
            if !options.skip_mem_boundary_check {
                out.push(NativeInstr {
                    value,
                    op: NativeOp::MemoryGuardCall { memory: memarg.memory, address: value, width_bytes: width.bytes() },
                });
            }
            out.push(NativeInstr {
                value,
                op: NativeOp::LoadAt {
                    address: value,
                    width: *width,
                    result_type: *result_type,
                    aligned: options.assume_mem_rw_aligned,
                },
            });
        }
        Instruction::Store { memarg, width, addr, value: stored } => {
            out.push(NativeInstr {
                value,
                op: NativeOp::EffectiveAddress { memory: memarg.memory, base: *addr, offset: memarg.offset },
            });
            if !options.skip_mem_boundary_check {
                out.push(NativeInstr {
                    value,
                    op: NativeOp::MemoryGuardCall { memory: memarg.memory, address: value, width_bytes: width.bytes() },
                });
            }
            out.push(NativeInstr {
                value,
                op: NativeOp::StoreAt {
                    address: value,
                    width: *width,
                    value: *stored,
                    aligned: options.assume_mem_rw_aligned,
                },
            });
        }
        Instruction::Call { func, args } => {
            out.push(NativeInstr { value, op: NativeOp::CallWithInstance { func: *func, args: args.clone() } });
        }
        Instruction::CallIndirect { table, type_params, type_results, index, args } => {
            if !options.skip_tbl_boundary_check {
                out.push(NativeInstr { value, op: NativeOp::TableGuardCall { table: *table, index: *index } });
            }
            let signature = signature_string(type_params, type_results)?;
            out.push(NativeInstr {
                value,
                op: NativeOp::CallIndirectLowered { table: *table, index: *index, signature, args: args.clone() },
            });
        }
        Instruction::Convert(op, operand) => {
            out.push(NativeInstr { value, op: NativeOp::CastLowered { mode: cast_mode(*op), op: *op, operand: *operand } });
        }
        other => out.push(NativeInstr { value, op: NativeOp::Mir(other.clone()) }),
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mir::{ConstValue, Function};

    #[test]
    fn load_expands_into_guard_address_and_load() {
        let mut f = Function::new("f".into(), vec![ValueType::I32], vec![ValueType::I32]);
        let addr = f.push_instruction(f.entry, Instruction::LocalGet(mir::Local::new(0)));
        let load = f.push_instruction(
            f.entry,
            Instruction::Load {
                memarg: mir::MemArg { memory: mir::MirMemory::new(0), offset: 4, align: 2 },
                width: mir::MemoryWidth::B4,
                result_type: ValueType::I32,
                addr,
            },
        );
        let _ = ConstValue::I32(0);
        f.set_terminator(f.entry, Terminator::Return(vec![load]));

        let native = lower_function(&f, &TranslationOptions::default()).unwrap();
        let block = &native.blocks.iter().find(|(b, _)| *b == f.entry).unwrap().1;
        let ops: Vec<&NativeOp> = block.instrs.iter().filter(|i| i.value == load).map(|i| &i.op).collect();
        assert!(matches!(ops[0], NativeOp::EffectiveAddress { .. }));
        assert!(matches!(ops[1], NativeOp::MemoryGuardCall { .. }));
        assert!(matches!(ops[2], NativeOp::LoadAt { .. }));
    }

    #[test]
    fn skip_mem_boundary_check_drops_the_guard() {
        let mut f = Function::new("f".into(), vec![ValueType::I32], vec![ValueType::I32]);
        let addr = f.push_instruction(f.entry, Instruction::LocalGet(mir::Local::new(0)));
        let load = f.push_instruction(
            f.entry,
            Instruction::Load {
                memarg: mir::MemArg { memory: mir::MirMemory::new(0), offset: 0, align: 0 },
                width: mir::MemoryWidth::B4,
                result_type: ValueType::I32,
                addr,
            },
        );
        f.set_terminator(f.entry, Terminator::Return(vec![load]));

        let options = TranslationOptions { skip_mem_boundary_check: true, ..TranslationOptions::default() };
        let native = lower_function(&f, &options).unwrap();
        let block = &native.blocks.iter().find(|(b, _)| *b == f.entry).unwrap().1;
        assert!(!block.instrs.iter().any(|i| matches!(i.op, NativeOp::MemoryGuardCall { .. })));
    }

    #[test]
    fn v128_signature_fails_lowering_instead_of_panicking() {
        let f = Function::new("f".into(), vec![ValueType::V128], vec![]);
        assert!(lower_function(&f, &TranslationOptions::default()).is_err());
    }
}
