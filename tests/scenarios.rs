//! End-to-end scenarios exercising the full pipeline (parse, validate,
//! translate, passes) against hand-assembled binary modules.

use sable::bytecode::ValueType;
use sable::entity::EntityRef;
use sable::error::{ParseError, ValidationErrorKind};
use sable::mir::Instruction as MirInstr;
use sable::parser::{self, ParserOptions};
use sable::validator;
use sable::{compile_to_mir, CompilerOptions};

const MAGIC_AND_VERSION: [u8; 8] = [0x00, 0x61, 0x73, 0x6D, 0x01, 0x00, 0x00, 0x00];

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

fn section(bytes: &mut Vec<u8>, id: u8, payload: &[u8]) {
    bytes.push(id);
    bytes.extend(leb(payload.len() as u32));
    bytes.extend(payload);
}

/// Builds a one-function module whose single local function has the
/// given `(params) -> results` type and raw expression body (no trailing
/// `end` needed, it is appended here), with `num_memories` zero-max
/// memories and `num_tables` zero-max funcref tables declared.
fn one_function_module(
    params: &[ValueType],
    results: &[ValueType],
    body: &[u8],
    num_memories: u32,
    num_tables: u32,
) -> Vec<u8> {
    let mut bytes = MAGIC_AND_VERSION.to_vec();

    let mut type_section = leb(1);
    type_section.push(0x60);
    type_section.extend(leb(params.len() as u32));
    for &p in params {
        type_section.push(value_type_byte(p));
    }
    type_section.extend(leb(results.len() as u32));
    for &r in results {
        type_section.push(value_type_byte(r));
    }
    section(&mut bytes, 1, &type_section);

    if num_tables > 0 {
        let mut table_section = leb(num_tables);
        for _ in 0..num_tables {
            table_section.push(0x70); // funcref
            table_section.push(0x00); // min-only limits
            table_section.extend(leb(0));
        }
        section(&mut bytes, 4, &table_section);
    }

    if num_memories > 0 {
        let mut memory_section = leb(num_memories);
        for _ in 0..num_memories {
            memory_section.push(0x00); // min-only limits
            memory_section.extend(leb(1));
        }
        section(&mut bytes, 5, &memory_section);
    }

    let mut function_section = leb(1);
    function_section.extend(leb(0)); // type index 0
    section(&mut bytes, 3, &function_section);

    let mut entry = vec![0u8]; // zero local-decl runs
    entry.extend(body);
    entry.push(0x0B); // end

    let mut code_section = leb(1);
    code_section.extend(leb(entry.len() as u32));
    code_section.extend(entry);
    section(&mut bytes, 10, &code_section);

    bytes
}

fn value_type_byte(ty: ValueType) -> u8 {
    match ty {
        ValueType::I32 => 0x7F,
        ValueType::I64 => 0x7E,
        ValueType::F32 => 0x7D,
        ValueType::F64 => 0x7C,
        ValueType::V128 => 0x7B,
    }
}

#[test]
fn scenario_a_minimal_module_has_no_functions() {
    let mut options = ParserOptions::default();
    let module = parser::parse_module(&MAGIC_AND_VERSION, &mut options).unwrap();
    assert_eq!(module.types.len(), 0);
    assert_eq!(module.num_functions(), 0);

    let mir_module = compile_to_mir(&MAGIC_AND_VERSION, &mut ParserOptions::default(), &CompilerOptions::default()).unwrap();
    assert_eq!(mir_module.funcs.len(), 0);
}

#[test]
fn scenario_c_i32_add_of_two_constants() {
    // i32.const 1; i32.const 2; i32.add
    let body = [0x41, 1, 0x41, 2, 0x6A];
    let bytes = one_function_module(&[], &[ValueType::I32], &body, 0, 0);

    let mir_module = compile_to_mir(&bytes, &mut ParserOptions::default(), &CompilerOptions::default()).unwrap();
    assert_eq!(mir_module.funcs.len(), 1);

    let f = mir_module.funcs[sable::mir::MirFunc::new(0)]
        .body()
        .expect("locally-defined function has a body");

    let entry_insts: Vec<_> = f.blocks[f.entry]
        .insts
        .iter()
        .map(|&v| f.values[v].clone())
        .collect();
    let constants = entry_insts.iter().filter(|i| matches!(i, MirInstr::Constant(_))).count();
    assert_eq!(constants, 2);
    assert!(entry_insts.iter().any(|i| matches!(
        i,
        MirInstr::IntBinary {
            op: sable::bytecode::instr::IntBinaryOp::Add,
            ..
        }
    )));

    let exit_phi = f.values[f.blocks[f.exit].insts[0]].clone();
    assert!(matches!(exit_phi, MirInstr::Phi { .. }));
}

#[test]
fn scenario_d_br_out_of_block_carries_its_value() {
    // block (result i32) i32.const 42; br 0; end
    let body = [0x02, 0x7F, 0x41, 42, 0x0C, 0, 0x0B];
    let bytes = one_function_module(&[], &[ValueType::I32], &body, 0, 0);

    let mir_module = compile_to_mir(&bytes, &mut ParserOptions::default(), &CompilerOptions::default()).unwrap();
    let f = mir_module.funcs[sable::mir::MirFunc::new(0)].body().unwrap();

    let has_phi_with_candidate = f
        .values
        .iter()
        .any(|v| matches!(&f.values[v], MirInstr::Phi { incoming, .. } if !incoming.is_empty()));
    assert!(has_phi_with_candidate);
}

#[test]
fn scenario_e_misaligned_i32_load_is_rejected() {
    // i32.load align=3 offset=0; drop
    let body = [0x28, 3, 0, 0x1A];
    let bytes = one_function_module(&[], &[], &body, 1, 0);

    let mut options = ParserOptions::default();
    let module = parser::parse_module(&bytes, &mut options).unwrap();
    let err = validator::validate_module(&module).unwrap_err();
    assert!(matches!(err.kind, ValidationErrorKind::InvalidAlign { align: 3, width: 4 }));
}

#[test]
fn scenario_f_call_indirect_with_bad_type_index_is_rejected() {
    // call_indirect type_index=1 (only type 0 exists) table_index=0
    let body = [0x11, 1, 0];
    let bytes = one_function_module(&[], &[], &body, 0, 1);

    let mut options = ParserOptions::default();
    let module = parser::parse_module(&bytes, &mut options).unwrap();
    let err = validator::validate_module(&module).unwrap_err();
    assert!(matches!(
        err.kind,
        ValidationErrorKind::TypeIndexOutOfBound(idx) if idx == sable::bytecode::TypeIdx::new(1)
    ));

    let result = compile_to_mir(&bytes, &mut ParserOptions::default(), &CompilerOptions::default());
    assert!(result.is_err());
}

#[test]
fn bad_magic_is_rejected() {
    let bytes = [0, 0, 0, 0, 1, 0, 0, 0];
    let mut options = ParserOptions::default();
    assert!(matches!(
        parser::parse_module(&bytes, &mut options),
        Err(ParseError::BadMagic { .. })
    ));
}
