//! `TypeInfer`: assigns every SSA value its `mir::Type` by walking the
//! function in dominator preorder, so a value's definition is always
//! visited before any of its uses.
//!
//! `LocalGet`/`GlobalGet` need the enclosing module's local/global types;
//! `Call`/`CallIndirect` need the callee's result arity. Both are supplied
//! by the caller as flat tables indexed by the bytecode module's unified
//! index spaces, since a per-function pass has no access to sibling
//! functions or the global section.

use crate::bytecode::ValueType;
use crate::entity::EntityRef;
use crate::mir::{Function, Instruction, Type};

use super::dominator;

/// One callee's signature, keyed by `MirFunc`/table-call type index.
pub struct Signature {
    pub params: Vec<ValueType>,
    pub results: Vec<ValueType>,
}

pub fn infer_types(f: &mut Function, global_types: &[ValueType], func_signatures: &[Signature]) {
    let dom = dominator::compute(f);
    let preorder: Vec<_> = dom.preorder().to_vec();

    for block in preorder {
        for &value in f.blocks[block].insts.clone().iter() {
            let ty = infer_one(f, value, global_types, func_signatures);
            f.value_types[value] = ty;
        }
    }
}

fn infer_one(
    f: &Function,
    value: crate::mir::Value,
    global_types: &[ValueType],
    func_signatures: &[Signature],
) -> Type {
    match &f.values[value] {
        Instruction::Constant(c) => Type::Primitive(const_value_type(c)),
        Instruction::LocalGet(local) => Type::Primitive(f.locals[*local]),
        Instruction::GlobalGet(global) => global_types
            .get(global.index())
            .map(|&ty| Type::Primitive(ty))
            .unwrap_or(Type::Bottom),

        Instruction::Call { func, .. } => func_signatures
            .get(func.index())
            .map(|sig| result_type(&sig.results))
            .unwrap_or(Type::Bottom),
        Instruction::CallIndirect { type_results, .. } => result_type(type_results),

        Instruction::Select { if_true, if_false, .. } => {
            let a = f.value_types[*if_true].clone();
            let b = f.value_types[*if_false].clone();
            if a == b {
                a
            } else {
                Type::Bottom
            }
        }

        Instruction::IntCompare { .. } | Instruction::FloatCompare { .. } => Type::Primitive(ValueType::I32),
        Instruction::IntUnary { operand, .. } | Instruction::FloatUnary { operand, .. } => {
            f.value_types[*operand].clone()
        }
        Instruction::IntBinary { lhs, .. } | Instruction::FloatBinary { lhs, .. } => f.value_types[*lhs].clone(),

        Instruction::Load { result_type, .. } => Type::Primitive(*result_type),
        Instruction::MemorySize(_) => Type::Primitive(ValueType::I32),
        Instruction::MemoryGrow { .. } => Type::Primitive(ValueType::I32),

        Instruction::Convert(op, _) => Type::Primitive(op.result_type()),
        Instruction::SignExtend(_, v) => f.value_types[*v].clone(),
        Instruction::Cast(cast, _) => Type::Primitive(match cast.to {
            crate::bytecode::instr::IntWidth::I32 => ValueType::I32,
            crate::bytecode::instr::IntWidth::I64 => ValueType::I64,
        }),

        Instruction::Pack(values) => {
            Type::Aggregate(values.iter().map(|&v| primitive_of(&f.value_types[v])).collect())
        }
        Instruction::Unpack { aggregate, index } => match &f.value_types[*aggregate] {
            Type::Aggregate(members) => members.get(*index as usize).map(|&t| Type::Primitive(t)).unwrap_or(Type::Bottom),
            _ => Type::Bottom,
        },

        Instruction::Phi { ty, .. } => Type::Primitive(*ty),

        Instruction::Splat { operand, .. } => {
            let _ = operand;
            Type::Primitive(ValueType::V128)
        }
        Instruction::ExtractLane { .. } => Type::Primitive(ValueType::I32),
        Instruction::InsertLane { .. } | Instruction::Shuffle { .. } | Instruction::SimdUnary { .. } | Instruction::SimdBinary { .. } => {
            Type::Primitive(ValueType::V128)
        }

        Instruction::LocalSet(..)
        | Instruction::GlobalSet(..)
        | Instruction::Store { .. }
        | Instruction::MemoryGuard { .. } => Type::Unit,
    }
}

fn const_value_type(c: &crate::mir::ConstValue) -> ValueType {
    use crate::mir::ConstValue::*;
    match c {
        I32(_) => ValueType::I32,
        I64(_) => ValueType::I64,
        F32(_) => ValueType::F32,
        F64(_) => ValueType::F64,
        V128(_) => ValueType::V128,
    }
}

fn result_type(results: &[ValueType]) -> Type {
    match results.len() {
        0 => Type::Unit,
        1 => Type::Primitive(results[0]),
        _ => Type::Aggregate(results.to_vec()),
    }
}

fn primitive_of(ty: &Type) -> ValueType {
    match ty {
        Type::Primitive(v) => *v,
        _ => ValueType::I32,
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::mir::{ConstValue, Terminator};

    #[test]
    fn constant_and_phi_types_resolve() {
        let mut f = Function::new("f".into(), vec![], vec![ValueType::I32]);
        let c = f.push_instruction(f.entry, Instruction::Constant(ConstValue::I32(3)));
        f.add_edge(f.entry, f.exit);
        let phi = f.push_instruction(f.exit, Instruction::Phi { ty: ValueType::I32, incoming: vec![] });
        f.add_phi_candidate(phi, f.entry, c);
        f.set_terminator(f.entry, Terminator::Unconditional(f.exit));

        infer_types(&mut f, &[], &[]);

        assert_eq!(f.value_types[c], Type::Primitive(ValueType::I32));
        assert_eq!(f.value_types[phi], Type::Primitive(ValueType::I32));
    }
}
