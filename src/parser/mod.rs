//! The streaming bytecode parser: drives section ordering over a
//! `Reader` and builds an in-memory `bytecode::Module`.

use std::collections::HashMap;

use crate::bytecode::instr::{
    BlockResultType, ConvertOp, FloatBinaryOp, FloatCompareOp, FloatUnaryOp, FloatWidth, Instruction,
    IntBinaryOp, IntCompareOp, IntUnaryOp, IntWidth, LoadOp, MemArg, SignExtendOp,
    SimdBinaryOp, SimdInstruction, SimdLaneType, SimdUnaryOp, StoreOp,
};
use crate::bytecode::{
    ConstExpr, DataSegment, ElementSegment, Export, FuncIdx, Function, FunctionType,
    GlobalIdx, GlobalType, Import, ImportExportDescriptor, Limits, MemIdx, MemoryType, Module,
    Mutability, TableIdx, TableType, TypeIdx, ValueType,
};
use crate::entity::EntityRef;
use crate::error::{ParseError, ParseResult};
use crate::reader::Reader;

const MAGIC: [u8; 4] = *b"\0asm";
const VERSION: [u8; 4] = [0x01, 0x00, 0x00, 0x00];

/// A registered custom-section handler: given the section's raw payload
/// (reader already barriered to the section's declared size, positioned
/// right after the name), may inspect or reject it. Errors are re-raised
/// at the payload offset where they occurred.
pub trait CustomSectionHandler {
    fn handle(&mut self, payload: &[u8]) -> anyhow::Result<()>;
}

#[derive(Default)]
pub struct ParserOptions {
    pub custom_section_handlers: HashMap<String, Box<dyn CustomSectionHandler>>,
}

/// Parses a complete binary module, dispatching any recognized custom
/// sections to `options.custom_section_handlers`.
pub fn parse_module(bytes: &[u8], options: &mut ParserOptions) -> ParseResult<Module> {
    let mut reader = Reader::new(bytes);
    parse_magic_and_version(&mut reader)?;

    let mut module = Module::empty();
    let mut last_section_id: Option<u8> = None;

    while reader.has_more_bytes() {
        let section_offset = reader.num_bytes_consumed();
        let id = reader.read()?;
        let size = reader.read_uleb128_u32()? as usize;

        if id != 0 {
            if let Some(last) = last_section_id {
                if id <= last {
                    return Err(ParseError::SectionOutOfOrder {
                        offset: section_offset,
                        prev: last,
                        next: id,
                    });
                }
            }
            if id > 11 {
                return Err(ParseError::SectionIdOutOfRange {
                    offset: section_offset,
                    id,
                });
            }
            last_section_id = Some(id);
        }

        let barrier = reader.backup_barrier();
        reader.set_barrier(size);
        let start = reader.num_bytes_consumed();

        match id {
            0 => parse_custom_section(&mut reader, &mut module, options)?,
            1 => parse_type_section(&mut reader, &mut module)?,
            2 => parse_import_section(&mut reader, &mut module)?,
            3 => parse_function_section(&mut reader, &mut module)?,
            4 => parse_table_section(&mut reader, &mut module)?,
            5 => parse_memory_section(&mut reader, &mut module)?,
            6 => parse_global_section(&mut reader, &mut module)?,
            7 => parse_export_section(&mut reader, &mut module)?,
            8 => parse_start_section(&mut reader, &mut module)?,
            9 => parse_element_section(&mut reader, &mut module)?,
            10 => parse_code_section(&mut reader, &mut module)?,
            11 => parse_data_section(&mut reader, &mut module)?,
            _ => return Err(ParseError::SectionIdOutOfRange { offset: section_offset, id }),
        }

        let consumed = reader.num_bytes_consumed() - start;
        if consumed != size {
            return Err(ParseError::UnconsumedSectionBytes {
                offset: reader.num_bytes_consumed(),
                section: id,
            });
        }
        reader.reset_barrier();
        reader.restore_barrier(barrier);
    }

    Ok(module)
}

fn parse_magic_and_version(reader: &mut Reader) -> ParseResult<()> {
    let offset = reader.num_bytes_consumed();
    let magic = reader.read_bytes(4)?;
    if magic != MAGIC {
        return Err(ParseError::BadMagic { offset });
    }
    let offset = reader.num_bytes_consumed();
    let version = reader.read_bytes(4)?;
    if version != VERSION {
        return Err(ParseError::BadVersion { offset });
    }
    Ok(())
}

fn parse_value_type(reader: &mut Reader) -> ParseResult<ValueType> {
    let offset = reader.num_bytes_consumed();
    let byte = reader.read()?;
    ValueType::from_byte(byte).ok_or(ParseError::InvalidValueType { offset, byte })
}

fn parse_limits(reader: &mut Reader) -> ParseResult<Limits> {
    let offset = reader.num_bytes_consumed();
    let tag = reader.read()?;
    let min = reader.read_uleb128_u32()?;
    let max = match tag {
        0x00 => None,
        0x01 => Some(reader.read_uleb128_u32()?),
        _ => return Err(ParseError::InvalidLimitsTag { offset, byte: tag }),
    };
    if let Some(max) = max {
        if min > max {
            return Err(ParseError::InvalidLimits {
                offset,
                min: min as u64,
                max: max as u64,
            });
        }
    }
    Ok(Limits::new(min, max))
}

fn parse_table_type(reader: &mut Reader) -> ParseResult<TableType> {
    let offset = reader.num_bytes_consumed();
    let byte = reader.read()?;
    if byte != 0x70 {
        return Err(ParseError::InvalidValueType { offset, byte });
    }
    let limits = parse_limits(reader)?;
    Ok(TableType {
        element: ValueType::I32, // funcref's natural native width; only tag byte 0x70 is supported.
        limits,
    })
}

fn parse_mutability(reader: &mut Reader) -> ParseResult<Mutability> {
    let offset = reader.num_bytes_consumed();
    let byte = reader.read()?;
    Mutability::from_byte(byte).ok_or(ParseError::InvalidMutability { offset, byte })
}

fn parse_const_expr(reader: &mut Reader) -> ParseResult<ConstExpr> {
    let offset = reader.num_bytes_consumed();
    let opcode = reader.read()?;
    let expr = match opcode {
        0x41 => ConstExpr::I32(reader.read_sleb128_i32()?),
        0x42 => ConstExpr::I64(reader.read_sleb128_i64()?),
        0x43 => ConstExpr::F32(reader.read_f32_bits()?),
        0x44 => ConstExpr::F64(reader.read_f64_bits()?),
        0x23 => ConstExpr::GlobalGet(GlobalIdx::new(reader.read_uleb128_u32()? as usize)),
        _ => return Err(ParseError::UnknownOpcode { offset, byte: opcode }),
    };
    let end_offset = reader.num_bytes_consumed();
    let end = reader.read()?;
    if end != 0x0B {
        return Err(ParseError::UnknownOpcode { offset: end_offset, byte: end });
    }
    Ok(expr)
}

fn parse_type_section(reader: &mut Reader, module: &mut Module) -> ParseResult<()> {
    let count = reader.read_uleb128_u32()?;
    for _ in 0..count {
        let offset = reader.num_bytes_consumed();
        let tag = reader.read()?;
        if tag != 0x60 {
            return Err(ParseError::InvalidValueType { offset, byte: tag });
        }
        let param_count = reader.read_uleb128_u32()?;
        let mut params = Vec::with_capacity(param_count as usize);
        for _ in 0..param_count {
            params.push(parse_value_type(reader)?);
        }
        let result_count = reader.read_uleb128_u32()?;
        let mut results = Vec::with_capacity(result_count as usize);
        for _ in 0..result_count {
            results.push(parse_value_type(reader)?);
        }
        module.types.push(FunctionType::new(params, results));
    }
    Ok(())
}

fn parse_import_section(reader: &mut Reader, module: &mut Module) -> ParseResult<()> {
    let count = reader.read_uleb128_u32()?;
    for _ in 0..count {
        let module_name = reader.read_utf8_string_vector()?.to_owned();
        let name = reader.read_utf8_string_vector()?.to_owned();
        let offset = reader.num_bytes_consumed();
        let desc_tag = reader.read()?;
        let descriptor = match desc_tag {
            0x00 => {
                let type_index = TypeIdx::new(reader.read_uleb128_u32()? as usize);
                module.function_types.push(type_index);
                module.num_imported_functions += 1;
                ImportExportDescriptor::Type(type_index)
            }
            0x01 => {
                let ty = parse_table_type(reader)?;
                module.tables.push(ty);
                let idx = TableIdx::new(module.tables.len() - 1);
                module.num_imported_tables += 1;
                ImportExportDescriptor::Table(idx)
            }
            0x02 => {
                let limits = parse_limits(reader)?;
                module.memories.push(MemoryType { limits });
                let idx = MemIdx::new(module.memories.len() - 1);
                module.num_imported_memories += 1;
                ImportExportDescriptor::Memory(idx)
            }
            0x03 => {
                let value_type = parse_value_type(reader)?;
                let mutability = parse_mutability(reader)?;
                module.globals.push(GlobalType { mutability, value_type });
                let idx = GlobalIdx::new(module.globals.len() - 1);
                module.num_imported_globals += 1;
                ImportExportDescriptor::Global(idx)
            }
            _ => return Err(ParseError::InvalidDescriptorTag { offset, byte: desc_tag }),
        };
        module.imports.push(Import {
            module: module_name,
            name,
            descriptor,
        });
    }
    Ok(())
}

fn parse_function_section(reader: &mut Reader, module: &mut Module) -> ParseResult<()> {
    let count = reader.read_uleb128_u32()?;
    for _ in 0..count {
        let type_index = TypeIdx::new(reader.read_uleb128_u32()? as usize);
        module.function_types.push(type_index);
    }
    Ok(())
}

fn parse_table_section(reader: &mut Reader, module: &mut Module) -> ParseResult<()> {
    let count = reader.read_uleb128_u32()?;
    for _ in 0..count {
        let ty = parse_table_type(reader)?;
        module.tables.push(ty);
    }
    Ok(())
}

fn parse_memory_section(reader: &mut Reader, module: &mut Module) -> ParseResult<()> {
    let count = reader.read_uleb128_u32()?;
    for _ in 0..count {
        let limits = parse_limits(reader)?;
        module.memories.push(MemoryType { limits });
    }
    Ok(())
}

fn parse_global_section(reader: &mut Reader, module: &mut Module) -> ParseResult<()> {
    let count = reader.read_uleb128_u32()?;
    for _ in 0..count {
        let value_type = parse_value_type(reader)?;
        let mutability = parse_mutability(reader)?;
        let init = parse_const_expr(reader)?;
        module.globals.push(GlobalType { mutability, value_type });
        module.global_inits.push(init);
    }
    Ok(())
}

fn parse_export_section(reader: &mut Reader, module: &mut Module) -> ParseResult<()> {
    let count = reader.read_uleb128_u32()?;
    for _ in 0..count {
        let name = reader.read_utf8_string_vector()?.to_owned();
        let offset = reader.num_bytes_consumed();
        let desc_tag = reader.read()?;
        let index = reader.read_uleb128_u32()?;
        let descriptor = match desc_tag {
            0x00 => ImportExportDescriptor::Type(TypeIdx::new(index as usize)),
            0x01 => ImportExportDescriptor::Table(TableIdx::new(index as usize)),
            0x02 => ImportExportDescriptor::Memory(MemIdx::new(index as usize)),
            0x03 => ImportExportDescriptor::Global(GlobalIdx::new(index as usize)),
            _ => return Err(ParseError::InvalidDescriptorTag { offset, byte: desc_tag }),
        };
        module.exports.push(Export { name, descriptor });
    }
    Ok(())
}

fn parse_start_section(reader: &mut Reader, module: &mut Module) -> ParseResult<()> {
    module.start = Some(FuncIdx::new(reader.read_uleb128_u32()? as usize));
    Ok(())
}

fn parse_element_section(reader: &mut Reader, module: &mut Module) -> ParseResult<()> {
    let count = reader.read_uleb128_u32()?;
    for _ in 0..count {
        let table = TableIdx::new(reader.read_uleb128_u32()? as usize);
        let offset = parse_const_expr(reader)?;
        let func_count = reader.read_uleb128_u32()?;
        let mut func_indices = Vec::with_capacity(func_count as usize);
        for _ in 0..func_count {
            func_indices.push(FuncIdx::new(reader.read_uleb128_u32()? as usize));
        }
        module.elements.push(ElementSegment {
            table,
            offset,
            func_indices,
        });
    }
    Ok(())
}

fn parse_data_section(reader: &mut Reader, module: &mut Module) -> ParseResult<()> {
    let count = reader.read_uleb128_u32()?;
    for _ in 0..count {
        let memory = MemIdx::new(reader.read_uleb128_u32()? as usize);
        let offset = parse_const_expr(reader)?;
        let byte_count = reader.read_uleb128_u32()? as usize;
        let bytes = reader.read_bytes(byte_count)?.to_vec();
        module.data.push(DataSegment { memory, offset, bytes });
    }
    Ok(())
}

fn parse_custom_section(
    reader: &mut Reader,
    module: &mut Module,
    options: &mut ParserOptions,
) -> ParseResult<()> {
    let name = reader.read_utf8_string_vector()?.to_owned();
    let payload_offset = reader.num_bytes_consumed();
    let rest = {
        let mut bytes = Vec::new();
        while reader.has_more_bytes() {
            bytes.push(reader.read()?);
        }
        bytes
    };
    if let Some(handler) = options.custom_section_handlers.get_mut(&name) {
        handler.handle(&rest).map_err(|source| ParseError::CustomSectionHandler {
            name: name.clone(),
            offset: payload_offset,
            source,
        })?;
    }
    module.custom_sections.push((name, rest));
    Ok(())
}

fn parse_block_result_type(reader: &mut Reader) -> ParseResult<BlockResultType> {
    let offset = reader.num_bytes_consumed();
    let byte = reader.peek()?;
    if byte == 0x40 {
        reader.skip(1)?;
        return Ok(BlockResultType::Unit);
    }
    if let Some(vt) = ValueType::from_byte(byte) {
        reader.skip(1)?;
        return Ok(BlockResultType::Value(vt));
    }
    let raw = reader.read_sleb128_s33()?;
    if raw < 0 {
        return Err(ParseError::InvalidValueType { offset, byte });
    }
    Ok(BlockResultType::TypeIndex(TypeIdx::new(raw as usize)))
}

fn parse_mem_arg(reader: &mut Reader) -> ParseResult<MemArg> {
    let align = reader.read_uleb128_u32()?;
    let offset = reader.read_uleb128_u32()?;
    Ok(MemArg { align, offset })
}

/// Recursive-descent expression parser: reads instructions until an `end`
/// (0x0B) byte, which it consumes. If `allow_else` is set and an `else`
/// (0x05) is seen first, parsing stops there (the `0x05` is consumed) so
/// the caller can parse the else-arm separately.
fn parse_expr(reader: &mut Reader, allow_else: bool) -> ParseResult<(Vec<Instruction>, bool)> {
    let mut instrs = Vec::new();
    loop {
        let offset = reader.num_bytes_consumed();
        let opcode = reader.read()?;
        match opcode {
            0x0B => return Ok((instrs, false)),
            0x05 if allow_else => return Ok((instrs, true)),
            0x00 => instrs.push(Instruction::Unreachable),
            0x01 => instrs.push(Instruction::Nop),
            0x02 => {
                let block_type = parse_block_result_type(reader)?;
                let (body, _) = parse_expr(reader, false)?;
                instrs.push(Instruction::Block { block_type, body });
            }
            0x03 => {
                let block_type = parse_block_result_type(reader)?;
                let (body, _) = parse_expr(reader, false)?;
                instrs.push(Instruction::Loop { block_type, body });
            }
            0x04 => {
                let block_type = parse_block_result_type(reader)?;
                let (then_body, has_else) = parse_expr(reader, true)?;
                let else_body = if has_else {
                    let (body, _) = parse_expr(reader, false)?;
                    Some(body)
                } else {
                    None
                };
                instrs.push(Instruction::If {
                    block_type,
                    then_body,
                    else_body,
                });
            }
            0x0C => instrs.push(Instruction::Br(label(reader)?)),
            0x0D => instrs.push(Instruction::BrIf(label(reader)?)),
            0x0E => {
                let count = reader.read_uleb128_u32()?;
                let mut targets = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    targets.push(label(reader)?);
                }
                let default = label(reader)?;
                instrs.push(Instruction::BrTable { targets, default });
            }
            0x0F => instrs.push(Instruction::Return),
            0x10 => instrs.push(Instruction::Call(FuncIdx::new(reader.read_uleb128_u32()? as usize))),
            0x11 => {
                let type_index = TypeIdx::new(reader.read_uleb128_u32()? as usize);
                let table_index = TableIdx::new(reader.read_uleb128_u32()? as usize);
                instrs.push(Instruction::CallIndirect { type_index, table_index });
            }
            0x1A => instrs.push(Instruction::Drop),
            0x1B => instrs.push(Instruction::Select),
            0x20 => instrs.push(Instruction::LocalGet(local(reader)?)),
            0x21 => instrs.push(Instruction::LocalSet(local(reader)?)),
            0x22 => instrs.push(Instruction::LocalTee(local(reader)?)),
            0x23 => instrs.push(Instruction::GlobalGet(GlobalIdx::new(reader.read_uleb128_u32()? as usize))),
            0x24 => instrs.push(Instruction::GlobalSet(GlobalIdx::new(reader.read_uleb128_u32()? as usize))),

            0x28..=0x35 => instrs.push(parse_load(opcode, reader)?),
            0x36..=0x3E => instrs.push(parse_store(opcode, reader)?),
            0x3F => {
                reader.skip(1)?; // reserved
                instrs.push(Instruction::MemorySize);
            }
            0x40 => {
                reader.skip(1)?; // reserved
                instrs.push(Instruction::MemoryGrow);
            }

            0x41 => instrs.push(Instruction::I32Const(reader.read_sleb128_i32()?)),
            0x42 => instrs.push(Instruction::I64Const(reader.read_sleb128_i64()?)),
            0x43 => instrs.push(Instruction::F32Const(reader.read_f32_bits()?)),
            0x44 => instrs.push(Instruction::F64Const(reader.read_f64_bits()?)),

            0x45..=0xBF => instrs.push(parse_numeric(opcode)?),
            0xC0..=0xC4 => instrs.push(Instruction::SignExtend(sign_extend_op(opcode))),

            0xFC => {
                let sub = reader.read_uleb128_u32()?;
                instrs.push(parse_misc_prefixed(sub, reader, offset)?);
            }
            0xFD => {
                let sub = reader.read_uleb128_u32()?;
                instrs.push(Instruction::Simd(parse_simd(sub, reader, offset)?));
            }
            _ => return Err(ParseError::UnknownOpcode { offset, byte: opcode }),
        }
    }
}

fn label(reader: &mut Reader) -> ParseResult<crate::bytecode::LabelIdx> {
    Ok(crate::bytecode::LabelIdx::new(reader.read_uleb128_u32()? as usize))
}

fn local(reader: &mut Reader) -> ParseResult<crate::bytecode::LocalIdx> {
    Ok(crate::bytecode::LocalIdx::new(reader.read_uleb128_u32()? as usize))
}

fn parse_load(opcode: u8, reader: &mut Reader) -> ParseResult<Instruction> {
    let op = match opcode {
        0x28 => LoadOp::I32Load,
        0x29 => LoadOp::I64Load,
        0x2A => LoadOp::F32Load,
        0x2B => LoadOp::F64Load,
        0x2C => LoadOp::I32Load8S,
        0x2D => LoadOp::I32Load8U,
        0x2E => LoadOp::I32Load16S,
        0x2F => LoadOp::I32Load16U,
        0x30 => LoadOp::I64Load8S,
        0x31 => LoadOp::I64Load8U,
        0x32 => LoadOp::I64Load16S,
        0x33 => LoadOp::I64Load16U,
        0x34 => LoadOp::I64Load32S,
        0x35 => LoadOp::I64Load32U,
        _ => unreachable!("caller matched 0x28..=0x35"),
    };
    let memarg = parse_mem_arg(reader)?;
    Ok(Instruction::Load { op, memarg })
}

fn parse_store(opcode: u8, reader: &mut Reader) -> ParseResult<Instruction> {
    let op = match opcode {
        0x36 => StoreOp::I32Store,
        0x37 => StoreOp::I64Store,
        0x38 => StoreOp::F32Store,
        0x39 => StoreOp::F64Store,
        0x3A => StoreOp::I32Store8,
        0x3B => StoreOp::I32Store16,
        0x3C => StoreOp::I64Store8,
        0x3D => StoreOp::I64Store16,
        0x3E => StoreOp::I64Store32,
        _ => unreachable!("caller matched 0x36..=0x3E"),
    };
    let memarg = parse_mem_arg(reader)?;
    Ok(Instruction::Store { op, memarg })
}

fn sign_extend_op(opcode: u8) -> SignExtendOp {
    match opcode {
        0xC0 => SignExtendOp::I32Extend8S,
        0xC1 => SignExtendOp::I32Extend16S,
        0xC2 => SignExtendOp::I64Extend8S,
        0xC3 => SignExtendOp::I64Extend16S,
        0xC4 => SignExtendOp::I64Extend32S,
        _ => unreachable!("caller matched 0xC0..=0xC4"),
    }
}

fn parse_numeric(opcode: u8) -> ParseResult<Instruction> {
    use Instruction as I;
    Ok(match opcode {
        0x45 => I::IntCompare { width: IntWidth::I32, op: IntCompareOp::Eqz },
        0x46 => I::IntCompare { width: IntWidth::I32, op: IntCompareOp::Eq },
        0x47 => I::IntCompare { width: IntWidth::I32, op: IntCompareOp::Ne },
        0x48 => I::IntCompare { width: IntWidth::I32, op: IntCompareOp::LtS },
        0x49 => I::IntCompare { width: IntWidth::I32, op: IntCompareOp::LtU },
        0x4A => I::IntCompare { width: IntWidth::I32, op: IntCompareOp::GtS },
        0x4B => I::IntCompare { width: IntWidth::I32, op: IntCompareOp::GtU },
        0x4C => I::IntCompare { width: IntWidth::I32, op: IntCompareOp::LeS },
        0x4D => I::IntCompare { width: IntWidth::I32, op: IntCompareOp::LeU },
        0x4E => I::IntCompare { width: IntWidth::I32, op: IntCompareOp::GeS },
        0x4F => I::IntCompare { width: IntWidth::I32, op: IntCompareOp::GeU },

        0x50 => I::IntCompare { width: IntWidth::I64, op: IntCompareOp::Eqz },
        0x51 => I::IntCompare { width: IntWidth::I64, op: IntCompareOp::Eq },
        0x52 => I::IntCompare { width: IntWidth::I64, op: IntCompareOp::Ne },
        0x53 => I::IntCompare { width: IntWidth::I64, op: IntCompareOp::LtS },
        0x54 => I::IntCompare { width: IntWidth::I64, op: IntCompareOp::LtU },
        0x55 => I::IntCompare { width: IntWidth::I64, op: IntCompareOp::GtS },
        0x56 => I::IntCompare { width: IntWidth::I64, op: IntCompareOp::GtU },
        0x57 => I::IntCompare { width: IntWidth::I64, op: IntCompareOp::LeS },
        0x58 => I::IntCompare { width: IntWidth::I64, op: IntCompareOp::LeU },
        0x59 => I::IntCompare { width: IntWidth::I64, op: IntCompareOp::GeS },
        0x5A => I::IntCompare { width: IntWidth::I64, op: IntCompareOp::GeU },

        0x5B => I::FloatCompare { width: FloatWidth::F32, op: FloatCompareOp::Eq },
        0x5C => I::FloatCompare { width: FloatWidth::F32, op: FloatCompareOp::Ne },
        0x5D => I::FloatCompare { width: FloatWidth::F32, op: FloatCompareOp::Lt },
        0x5E => I::FloatCompare { width: FloatWidth::F32, op: FloatCompareOp::Gt },
        0x5F => I::FloatCompare { width: FloatWidth::F32, op: FloatCompareOp::Le },
        0x60 => I::FloatCompare { width: FloatWidth::F32, op: FloatCompareOp::Ge },
        0x61 => I::FloatCompare { width: FloatWidth::F64, op: FloatCompareOp::Eq },
        0x62 => I::FloatCompare { width: FloatWidth::F64, op: FloatCompareOp::Ne },
        0x63 => I::FloatCompare { width: FloatWidth::F64, op: FloatCompareOp::Lt },
        0x64 => I::FloatCompare { width: FloatWidth::F64, op: FloatCompareOp::Gt },
        0x65 => I::FloatCompare { width: FloatWidth::F64, op: FloatCompareOp::Le },
        0x66 => I::FloatCompare { width: FloatWidth::F64, op: FloatCompareOp::Ge },

        0x67 => I::IntUnary { width: IntWidth::I32, op: IntUnaryOp::Clz },
        0x68 => I::IntUnary { width: IntWidth::I32, op: IntUnaryOp::Ctz },
        0x69 => I::IntUnary { width: IntWidth::I32, op: IntUnaryOp::Popcnt },
        0x6A => I::IntBinary { width: IntWidth::I32, op: IntBinaryOp::Add },
        0x6B => I::IntBinary { width: IntWidth::I32, op: IntBinaryOp::Sub },
        0x6C => I::IntBinary { width: IntWidth::I32, op: IntBinaryOp::Mul },
        0x6D => I::IntBinary { width: IntWidth::I32, op: IntBinaryOp::DivS },
        0x6E => I::IntBinary { width: IntWidth::I32, op: IntBinaryOp::DivU },
        0x6F => I::IntBinary { width: IntWidth::I32, op: IntBinaryOp::RemS },
        0x70 => I::IntBinary { width: IntWidth::I32, op: IntBinaryOp::RemU },
        0x71 => I::IntBinary { width: IntWidth::I32, op: IntBinaryOp::And },
        0x72 => I::IntBinary { width: IntWidth::I32, op: IntBinaryOp::Or },
        0x73 => I::IntBinary { width: IntWidth::I32, op: IntBinaryOp::Xor },
        0x74 => I::IntBinary { width: IntWidth::I32, op: IntBinaryOp::Shl },
        0x75 => I::IntBinary { width: IntWidth::I32, op: IntBinaryOp::ShrS },
        0x76 => I::IntBinary { width: IntWidth::I32, op: IntBinaryOp::ShrU },
        0x77 => I::IntBinary { width: IntWidth::I32, op: IntBinaryOp::Rotl },
        0x78 => I::IntBinary { width: IntWidth::I32, op: IntBinaryOp::Rotr },

        0x79 => I::IntUnary { width: IntWidth::I64, op: IntUnaryOp::Clz },
        0x7A => I::IntUnary { width: IntWidth::I64, op: IntUnaryOp::Ctz },
        0x7B => I::IntUnary { width: IntWidth::I64, op: IntUnaryOp::Popcnt },
        0x7C => I::IntBinary { width: IntWidth::I64, op: IntBinaryOp::Add },
        0x7D => I::IntBinary { width: IntWidth::I64, op: IntBinaryOp::Sub },
        0x7E => I::IntBinary { width: IntWidth::I64, op: IntBinaryOp::Mul },
        0x7F => I::IntBinary { width: IntWidth::I64, op: IntBinaryOp::DivS },
        0x80 => I::IntBinary { width: IntWidth::I64, op: IntBinaryOp::DivU },
        0x81 => I::IntBinary { width: IntWidth::I64, op: IntBinaryOp::RemS },
        0x82 => I::IntBinary { width: IntWidth::I64, op: IntBinaryOp::RemU },
        0x83 => I::IntBinary { width: IntWidth::I64, op: IntBinaryOp::And },
        0x84 => I::IntBinary { width: IntWidth::I64, op: IntBinaryOp::Or },
        0x85 => I::IntBinary { width: IntWidth::I64, op: IntBinaryOp::Xor },
        0x86 => I::IntBinary { width: IntWidth::I64, op: IntBinaryOp::Shl },
        0x87 => I::IntBinary { width: IntWidth::I64, op: IntBinaryOp::ShrS },
        0x88 => I::IntBinary { width: IntWidth::I64, op: IntBinaryOp::ShrU },
        0x89 => I::IntBinary { width: IntWidth::I64, op: IntBinaryOp::Rotl },
        0x8A => I::IntBinary { width: IntWidth::I64, op: IntBinaryOp::Rotr },

        0x8B => I::FloatUnary { width: FloatWidth::F32, op: FloatUnaryOp::Abs },
        0x8C => I::FloatUnary { width: FloatWidth::F32, op: FloatUnaryOp::Neg },
        0x8D => I::FloatUnary { width: FloatWidth::F32, op: FloatUnaryOp::Ceil },
        0x8E => I::FloatUnary { width: FloatWidth::F32, op: FloatUnaryOp::Floor },
        0x8F => I::FloatUnary { width: FloatWidth::F32, op: FloatUnaryOp::Trunc },
        0x90 => I::FloatUnary { width: FloatWidth::F32, op: FloatUnaryOp::Nearest },
        0x91 => I::FloatUnary { width: FloatWidth::F32, op: FloatUnaryOp::Sqrt },
        0x92 => I::FloatBinary { width: FloatWidth::F32, op: FloatBinaryOp::Add },
        0x93 => I::FloatBinary { width: FloatWidth::F32, op: FloatBinaryOp::Sub },
        0x94 => I::FloatBinary { width: FloatWidth::F32, op: FloatBinaryOp::Mul },
        0x95 => I::FloatBinary { width: FloatWidth::F32, op: FloatBinaryOp::Div },
        0x96 => I::FloatBinary { width: FloatWidth::F32, op: FloatBinaryOp::Min },
        0x97 => I::FloatBinary { width: FloatWidth::F32, op: FloatBinaryOp::Max },
        0x98 => I::FloatBinary { width: FloatWidth::F32, op: FloatBinaryOp::Copysign },

        0x99 => I::FloatUnary { width: FloatWidth::F64, op: FloatUnaryOp::Abs },
        0x9A => I::FloatUnary { width: FloatWidth::F64, op: FloatUnaryOp::Neg },
        0x9B => I::FloatUnary { width: FloatWidth::F64, op: FloatUnaryOp::Ceil },
        0x9C => I::FloatUnary { width: FloatWidth::F64, op: FloatUnaryOp::Floor },
        0x9D => I::FloatUnary { width: FloatWidth::F64, op: FloatUnaryOp::Trunc },
        0x9E => I::FloatUnary { width: FloatWidth::F64, op: FloatUnaryOp::Nearest },
        0x9F => I::FloatUnary { width: FloatWidth::F64, op: FloatUnaryOp::Sqrt },
        0xA0 => I::FloatBinary { width: FloatWidth::F64, op: FloatBinaryOp::Add },
        0xA1 => I::FloatBinary { width: FloatWidth::F64, op: FloatBinaryOp::Sub },
        0xA2 => I::FloatBinary { width: FloatWidth::F64, op: FloatBinaryOp::Mul },
        0xA3 => I::FloatBinary { width: FloatWidth::F64, op: FloatBinaryOp::Div },
        0xA4 => I::FloatBinary { width: FloatWidth::F64, op: FloatBinaryOp::Min },
        0xA5 => I::FloatBinary { width: FloatWidth::F64, op: FloatBinaryOp::Max },
        0xA6 => I::FloatBinary { width: FloatWidth::F64, op: FloatBinaryOp::Copysign },

        0xA7 => I::Convert(ConvertOp::I32WrapI64),
        0xA8 => I::Convert(ConvertOp::I32TruncF32S),
        0xA9 => I::Convert(ConvertOp::I32TruncF32U),
        0xAA => I::Convert(ConvertOp::I32TruncF64S),
        0xAB => I::Convert(ConvertOp::I32TruncF64U),
        0xAC => I::Convert(ConvertOp::I64ExtendI32S),
        0xAD => I::Convert(ConvertOp::I64ExtendI32U),
        0xAE => I::Convert(ConvertOp::I64TruncF32S),
        0xAF => I::Convert(ConvertOp::I64TruncF32U),
        0xB0 => I::Convert(ConvertOp::I64TruncF64S),
        0xB1 => I::Convert(ConvertOp::I64TruncF64U),
        0xB2 => I::Convert(ConvertOp::F32ConvertI32S),
        0xB3 => I::Convert(ConvertOp::F32ConvertI32U),
        0xB4 => I::Convert(ConvertOp::F32ConvertI64S),
        0xB5 => I::Convert(ConvertOp::F32ConvertI64U),
        0xB6 => I::Convert(ConvertOp::F32DemoteF64),
        0xB7 => I::Convert(ConvertOp::F64ConvertI32S),
        0xB8 => I::Convert(ConvertOp::F64ConvertI32U),
        0xB9 => I::Convert(ConvertOp::F64ConvertI64S),
        0xBA => I::Convert(ConvertOp::F64ConvertI64U),
        0xBB => I::Convert(ConvertOp::F64PromoteF32),
        0xBC => I::Convert(ConvertOp::I32ReinterpretF32),
        0xBD => I::Convert(ConvertOp::I64ReinterpretF64),
        0xBE => I::Convert(ConvertOp::F32ReinterpretI32),
        0xBF => I::Convert(ConvertOp::F64ReinterpretI64),

        _ => return Err(ParseError::UnknownOpcode { offset: 0, byte: opcode }),
    })
}

fn parse_misc_prefixed(sub: u32, reader: &mut Reader, offset: usize) -> ParseResult<Instruction> {
    let op = match sub {
        0x00 => ConvertOp::I32TruncSatF32S,
        0x01 => ConvertOp::I32TruncSatF32U,
        0x02 => ConvertOp::I32TruncSatF64S,
        0x03 => ConvertOp::I32TruncSatF64U,
        0x04 => ConvertOp::I64TruncSatF32S,
        0x05 => ConvertOp::I64TruncSatF32U,
        0x06 => ConvertOp::I64TruncSatF64S,
        0x07 => ConvertOp::I64TruncSatF64U,
        _ => return Err(ParseError::UnknownOpcode { offset, byte: 0xFC }),
    };
    let _ = reader;
    Ok(Instruction::Convert(op))
}

fn parse_simd(sub: u32, reader: &mut Reader, offset: usize) -> ParseResult<SimdInstruction> {
    Ok(match sub {
        0x00 => SimdInstruction::V128Load { memarg: parse_mem_arg(reader)? },
        0x0B => SimdInstruction::V128Store { memarg: parse_mem_arg(reader)? },
        0x0C => {
            let bytes = reader.read_bytes(16)?;
            let mut arr = [0u8; 16];
            arr.copy_from_slice(bytes);
            SimdInstruction::V128Const { bytes: arr }
        }
        0x0D => {
            let bytes = reader.read_bytes(16)?;
            let mut arr = [0u8; 16];
            arr.copy_from_slice(bytes);
            SimdInstruction::Shuffle { indices: arr }
        }
        0x0F => SimdInstruction::Splat { lane: SimdLaneType::I8x16 },
        0x10 => SimdInstruction::Splat { lane: SimdLaneType::I16x8 },
        0x11 => SimdInstruction::Splat { lane: SimdLaneType::I32x4 },
        0x12 => SimdInstruction::Splat { lane: SimdLaneType::I64x2 },
        0x13 => SimdInstruction::Splat { lane: SimdLaneType::F32x4 },
        0x14 => SimdInstruction::Splat { lane: SimdLaneType::F64x2 },
        0x15 => SimdInstruction::ExtractLane {
            lane: SimdLaneType::I8x16,
            index: reader.read()?,
            signed: Some(true),
        },
        0x16 => SimdInstruction::ExtractLane {
            lane: SimdLaneType::I8x16,
            index: reader.read()?,
            signed: Some(false),
        },
        0x17 => SimdInstruction::ReplaceLane {
            lane: SimdLaneType::I8x16,
            index: reader.read()?,
        },
        0x21 => SimdInstruction::ExtractLane {
            lane: SimdLaneType::I32x4,
            index: reader.read()?,
            signed: None,
        },
        0x22 => SimdInstruction::ReplaceLane {
            lane: SimdLaneType::I32x4,
            index: reader.read()?,
        },
        0x6E => SimdInstruction::Binary { lane: SimdLaneType::I32x4, op: SimdBinaryOp::Add },
        0x71 => SimdInstruction::Binary { lane: SimdLaneType::I32x4, op: SimdBinaryOp::Sub },
        0x75 => SimdInstruction::Binary { lane: SimdLaneType::I32x4, op: SimdBinaryOp::Mul },
        0x60 => SimdInstruction::Unary { lane: SimdLaneType::I32x4, op: SimdUnaryOp::Abs },
        0x61 => SimdInstruction::Unary { lane: SimdLaneType::I32x4, op: SimdUnaryOp::Neg },
        _ => return Err(ParseError::UnknownOpcode { offset, byte: 0xFD }),
    })
}

/// Parses the locals run-length prefix, then the function body expression,
/// as one barriered code-section entry.
fn parse_code_entry(reader: &mut Reader, index: u32) -> ParseResult<Function> {
    let body_size = reader.read_uleb128_u32()? as usize;
    let barrier = reader.backup_barrier();
    reader.set_barrier(body_size);
    let start = reader.num_bytes_consumed();

    let local_run_count = reader.read_uleb128_u32()?;
    let mut locals = Vec::new();
    for _ in 0..local_run_count {
        let run = reader.read_uleb128_u32()?;
        let ty = parse_value_type(reader)?;
        for _ in 0..run {
            locals.push(ty);
        }
    }
    let (body, _) = parse_expr(reader, false)?;

    let consumed = reader.num_bytes_consumed() - start;
    if consumed != body_size {
        return Err(ParseError::UnconsumedCodeBytes {
            offset: reader.num_bytes_consumed(),
            index,
        });
    }
    reader.reset_barrier();
    reader.restore_barrier(barrier);
    Ok(Function { locals, body })
}

fn parse_code_section(reader: &mut Reader, module: &mut Module) -> ParseResult<()> {
    let count = reader.read_uleb128_u32()?;
    for i in 0..count {
        module.functions.push(parse_code_entry(reader, i)?);
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    fn leb(mut v: u32) -> Vec<u8> {
        let mut out = vec![];
        loop {
            let mut byte = (v & 0x7f) as u8;
            v >>= 7;
            if v != 0 {
                byte |= 0x80;
            }
            out.push(byte);
            if v == 0 {
                break;
            }
        }
        out
    }

    fn empty_module_bytes() -> Vec<u8> {
        let mut bytes = MAGIC.to_vec();
        bytes.extend(VERSION);
        bytes
    }

    #[test]
    fn parses_empty_module() {
        let bytes = empty_module_bytes();
        let mut options = ParserOptions::default();
        let module = parse_module(&bytes, &mut options).unwrap();
        assert_eq!(module.types.len(), 0);
        assert_eq!(module.num_functions(), 0);
    }

    #[test]
    fn rejects_bad_magic() {
        let bytes = vec![0, 0, 0, 0, 1, 0, 0, 0];
        let mut options = ParserOptions::default();
        assert!(matches!(
            parse_module(&bytes, &mut options),
            Err(ParseError::BadMagic { .. })
        ));
    }

    #[test]
    fn parses_single_function_returning_constant() {
        let mut bytes = empty_module_bytes();
        // type section: one type, () -> i32
        bytes.push(1);
        let mut type_section = vec![1u8, 0x60, 0, 1, 0x7F];
        bytes.push(type_section.len() as u8);
        bytes.append(&mut type_section);
        // function section: one function, using type 0
        bytes.push(3);
        let function_section = vec![1u8, 0];
        bytes.push(function_section.len() as u8);
        bytes.extend(function_section);
        // code section: one body, i32.const 42; end
        bytes.push(10);
        let body = vec![0x41, 42, 0x0B];
        let mut entry = vec![0u8]; // zero local-decl runs
        entry.extend(body);
        let mut code_section = leb(1);
        code_section.extend(leb(entry.len() as u32));
        code_section.extend(entry);
        bytes.push(code_section.len() as u8);
        bytes.extend(code_section);

        let mut options = ParserOptions::default();
        let module = parse_module(&bytes, &mut options).unwrap();
        assert_eq!(module.num_functions(), 1);
        assert_eq!(module.functions[0].body, vec![Instruction::I32Const(42)]);
    }

    #[test]
    fn section_out_of_order_is_rejected() {
        let mut bytes = empty_module_bytes();
        bytes.push(3); // function section
        let function_section = vec![1u8, 0];
        bytes.push(function_section.len() as u8);
        bytes.extend(function_section);
        bytes.push(1); // type section, after function: out of order
        let type_section = vec![1u8, 0x60, 0, 0];
        bytes.push(type_section.len() as u8);
        bytes.extend(type_section);
        let mut options = ParserOptions::default();
        assert!(matches!(
            parse_module(&bytes, &mut options),
            Err(ParseError::SectionOutOfOrder { .. })
        ));
    }
}
