//! The stack-polymorphic structural+type validator.
//!
//! The operand stack carries `OperandStackElement`s rather than plain
//! `ValueType`s so that a handful of generic opcodes (`select`, `drop`)
//! can be checked without special-casing them outside the `apply`
//! machinery: a `TypeVar` unifies with whatever concrete type it first
//! meets on the stack.

use crate::bytecode::instr::{
    BlockResultType, ConvertOp, FloatBinaryOp, FloatCompareOp, FloatUnaryOp, FloatWidth,
    Instruction, IntBinaryOp, IntCompareOp, IntUnaryOp, IntWidth, LoadOp, Opcode, SignExtendOp,
    SimdInstruction, StoreOp,
};
use crate::bytecode::{FunctionType, Module, Mutability, ValueType};
use crate::entity::EntityRef;
use crate::error::{ValidationError, ValidationErrorKind, ValidationResult};

/// An element of the validator's operand stack: either a concrete value
/// type or an as-yet-unconstrained type variable introduced while in
/// epsilon mode.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum OperandStackElement {
    Concrete(ValueType),
    TypeVar(u32),
}

impl std::fmt::Display for OperandStackElement {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            OperandStackElement::Concrete(t) => write!(f, "{t}"),
            OperandStackElement::TypeVar(id) => write!(f, "?{id}"),
        }
    }
}

impl From<ValueType> for OperandStackElement {
    fn from(t: ValueType) -> Self {
        OperandStackElement::Concrete(t)
    }
}

/// One labeled block's entry on the label stack: its result arity (what
/// `br` to this label must supply) and the offset into the flat label
/// value-type storage where its segment begins.
#[derive(Clone, Debug)]
struct LabelFrame {
    result_types: Vec<ValueType>,
    segment_start: usize,
}

/// The per-function validation visitor: an operand stack plus outstanding
/// epsilon requirements, and a label stack for branch targets.
pub struct FuncValidator<'m> {
    module: &'m Module,
    func_index: u32,
    locals: Vec<ValueType>,
    result_types: Vec<ValueType>,

    stack: Vec<OperandStackElement>,
    requirements: Vec<OperandStackElement>,
    epsilon: bool,
    next_type_var: u32,

    labels: Vec<LabelFrame>,
    enclosing_opcodes: Vec<Opcode>,
}

impl<'m> FuncValidator<'m> {
    pub fn new(module: &'m Module, func_index: u32, locals: Vec<ValueType>, result_types: Vec<ValueType>) -> Self {
        FuncValidator {
            module,
            func_index,
            locals,
            result_types,
            stack: Vec::new(),
            requirements: Vec::new(),
            epsilon: false,
            next_type_var: 0,
            labels: Vec::new(),
            enclosing_opcodes: Vec::new(),
        }
    }

    fn err(&self, kind: ValidationErrorKind) -> ValidationError {
        ValidationError {
            func_index: self.func_index,
            enclosing_opcodes: self.enclosing_opcodes.clone(),
            kind,
        }
    }

    fn fresh_type_var(&mut self) -> u32 {
        let id = self.next_type_var;
        self.next_type_var += 1;
        id
    }

    /// `apply(ensures, promises)`: matches `ensures` right-to-left against
    /// the top of the stack, unifying type variables as it goes, then
    /// truncates and pushes `promises` left-to-right.
    fn apply(
        &mut self,
        ensures: &[OperandStackElement],
        promises: &[OperandStackElement],
    ) -> ValidationResult<()> {
        let mut cursor = self.stack.len();
        for &want in ensures.iter().rev() {
            if cursor == 0 {
                if self.epsilon {
                    self.requirements.push(want);
                    continue;
                }
                return Err(self.err(ValidationErrorKind::TypeMismatch {
                    expecting: ensures.to_vec(),
                    actual: self.stack.clone(),
                    epsilon: self.epsilon,
                }));
            }
            let have = self.stack[cursor - 1];
            match (want, have) {
                (OperandStackElement::Concrete(w), OperandStackElement::Concrete(h)) if w == h => {
                    cursor -= 1;
                }
                (OperandStackElement::TypeVar(id), _) => {
                    self.unify(id, have);
                    cursor -= 1;
                }
                (_, OperandStackElement::TypeVar(id)) => {
                    self.unify(id, want);
                    cursor -= 1;
                }
                _ => {
                    return Err(self.err(ValidationErrorKind::TypeMismatch {
                        expecting: ensures.to_vec(),
                        actual: self.stack.clone(),
                        epsilon: self.epsilon,
                    }));
                }
            }
        }
        self.stack.truncate(cursor);
        for &p in promises {
            self.stack.push(p);
        }
        Ok(())
    }

    /// Rewrites every occurrence of type variable `id` on the stack and in
    /// outstanding `requirements` to the concrete type `to`.
    fn unify(&mut self, id: u32, to: OperandStackElement) {
        for elem in self.stack.iter_mut() {
            if *elem == OperandStackElement::TypeVar(id) {
                *elem = to;
            }
        }
        for elem in self.requirements.iter_mut() {
            if *elem == OperandStackElement::TypeVar(id) {
                *elem = to;
            }
        }
    }

    fn set_epsilon(&mut self) {
        self.stack.clear();
        self.requirements.clear();
        self.epsilon = true;
    }

    fn push_label(&mut self, result_types: Vec<ValueType>) {
        self.labels.push(LabelFrame {
            result_types,
            segment_start: self.stack.len(),
        });
    }

    fn pop_label(&mut self) {
        self.labels.pop();
    }

    /// Label `i` is the topmost frame rewound by `i`.
    fn label(&self, i: u32) -> Option<&LabelFrame> {
        let n = self.labels.len();
        let idx = n.checked_sub(1)?.checked_sub(i as usize)?;
        self.labels.get(idx)
    }

    fn block_function_type(&self, bt: BlockResultType) -> ValidationResult<FunctionType> {
        match bt {
            BlockResultType::Unit => Ok(FunctionType::new(vec![], vec![])),
            BlockResultType::Value(t) => Ok(FunctionType::new(vec![], vec![t])),
            BlockResultType::TypeIndex(idx) => self
                .module
                .types
                .get(idx.index())
                .cloned()
                .ok_or_else(|| self.err(ValidationErrorKind::TypeIndexOutOfBound(idx))),
        }
    }

    fn concrete(types: &[ValueType]) -> Vec<OperandStackElement> {
        types.iter().copied().map(OperandStackElement::from).collect()
    }

    /// Validates a whole function body: every instruction, followed by an
    /// implicit `return` check against the declared result types.
    pub fn validate_body(&mut self, body: &[Instruction]) -> ValidationResult<()> {
        self.push_label(self.result_types.clone());
        self.validate_sequence(body)?;
        let ensures = Self::concrete(&self.result_types.clone());
        self.apply(&ensures, &[])?;
        self.pop_label();
        Ok(())
    }

    fn validate_sequence(&mut self, body: &[Instruction]) -> ValidationResult<()> {
        for instr in body {
            self.validate_one(instr)?;
        }
        Ok(())
    }

    fn local_type(&self, idx: crate::bytecode::LocalIdx) -> ValidationResult<ValueType> {
        let index = idx.index();
        let n_params = self
            .module
            .function_type(crate::bytecode::FuncIdx::new(self.func_index as usize))
            .map(|ft| ft.params.len())
            .unwrap_or(0);
        if index < n_params {
            self.module
                .function_type(crate::bytecode::FuncIdx::new(self.func_index as usize))
                .and_then(|ft| ft.params.get(index).copied())
                .ok_or_else(|| self.err(ValidationErrorKind::LocalIndexOutOfBound(idx)))
        } else {
            self.locals
                .get(index - n_params)
                .copied()
                .ok_or_else(|| self.err(ValidationErrorKind::LocalIndexOutOfBound(idx)))
        }
    }

    fn validate_one(&mut self, instr: &Instruction) -> ValidationResult<()> {
        use Instruction as I;
        match instr {
            I::Unreachable => {
                self.set_epsilon();
            }
            I::Nop => {}

            I::Block { block_type, body } => {
                let ft = self.block_function_type(*block_type)?;
                self.apply(&Self::concrete(&ft.params), &[])?;
                self.enclosing_opcodes.push(Opcode::Block);
                self.push_label(ft.results.clone());
                self.stack.extend(Self::concrete(&ft.params));
                self.validate_sequence(body)?;
                let ensures = Self::concrete(&ft.results.clone());
                self.apply(&ensures, &[])?;
                self.pop_label();
                self.enclosing_opcodes.pop();
                self.stack.extend(Self::concrete(&ft.results));
            }
            I::Loop { block_type, body } => {
                let ft = self.block_function_type(*block_type)?;
                self.apply(&Self::concrete(&ft.params), &[])?;
                self.enclosing_opcodes.push(Opcode::Loop);
                // loop's label arity is its parameter types: a `br` back to
                // the loop re-enters with the loop's inputs, not its result.
                self.push_label(ft.params.clone());
                self.stack.extend(Self::concrete(&ft.params));
                self.validate_sequence(body)?;
                let ensures = Self::concrete(&ft.results.clone());
                self.apply(&ensures, &[])?;
                self.pop_label();
                self.enclosing_opcodes.pop();
                self.stack.extend(Self::concrete(&ft.results));
            }
            I::If {
                block_type,
                then_body,
                else_body,
            } => {
                let ft = self.block_function_type(*block_type)?;
                let mut ensures = Self::concrete(&ft.params);
                ensures.push(ValueType::I32.into());
                self.apply(&ensures, &[])?;
                self.enclosing_opcodes.push(Opcode::If);

                let stack_before = self.stack.clone();
                let requirements_before = self.requirements.clone();
                let epsilon_before = self.epsilon;

                self.push_label(ft.results.clone());
                self.stack.extend(Self::concrete(&ft.params));
                self.validate_sequence(then_body)?;
                let then_ensures = Self::concrete(&ft.results.clone());
                self.apply(&then_ensures, &[])?;
                self.pop_label();

                self.stack = stack_before;
                self.requirements = requirements_before;
                self.epsilon = epsilon_before;

                self.push_label(ft.results.clone());
                self.stack.extend(Self::concrete(&ft.params));
                if let Some(else_body) = else_body {
                    self.validate_sequence(else_body)?;
                } else if ft.params != ft.results {
                    // No else arm: the implicit else is identity, so the
                    // block type must describe a no-op transformation.
                    return Err(self.err(ValidationErrorKind::InvalidBranchTable));
                }
                let else_ensures = Self::concrete(&ft.results.clone());
                self.apply(&else_ensures, &[])?;
                self.pop_label();

                self.enclosing_opcodes.pop();
                self.stack.extend(Self::concrete(&ft.results));
            }

            I::Br(label) => {
                let frame = self
                    .label(label.index() as u32)
                    .ok_or_else(|| self.err(ValidationErrorKind::LabelIndexOutOfBound(*label)))?;
                let ensures = Self::concrete(&frame.result_types.clone());
                self.apply(&ensures, &[])?;
                self.set_epsilon();
            }
            I::BrIf(label) => {
                let frame = self
                    .label(label.index() as u32)
                    .ok_or_else(|| self.err(ValidationErrorKind::LabelIndexOutOfBound(*label)))?;
                let mut ensures = Self::concrete(&frame.result_types.clone());
                ensures.push(ValueType::I32.into());
                let promises = Self::concrete(&frame.result_types.clone());
                self.apply(&ensures, &promises)?;
            }
            I::BrTable { targets, default } => {
                let default_frame = self
                    .label(default.index() as u32)
                    .ok_or_else(|| self.err(ValidationErrorKind::LabelIndexOutOfBound(*default)))?;
                let default_types = default_frame.result_types.clone();
                for target in targets {
                    let frame = self
                        .label(target.index() as u32)
                        .ok_or_else(|| self.err(ValidationErrorKind::LabelIndexOutOfBound(*target)))?;
                    if frame.result_types != default_types {
                        return Err(self.err(ValidationErrorKind::InvalidBranchTable));
                    }
                }
                let mut ensures = Self::concrete(&default_types);
                ensures.push(ValueType::I32.into());
                self.apply(&ensures, &[])?;
                self.set_epsilon();
            }
            I::Return => {
                let ensures = Self::concrete(&self.result_types.clone());
                self.apply(&ensures, &[])?;
                self.set_epsilon();
            }

            I::Call(func) => {
                let ft = self
                    .module
                    .function_type(*func)
                    .ok_or_else(|| self.err(ValidationErrorKind::FuncIndexOutOfBound(*func)))?
                    .clone();
                self.apply(&Self::concrete(&ft.params), &Self::concrete(&ft.results))?;
            }
            I::CallIndirect { type_index, table_index } => {
                self.module
                    .table_type(*table_index)
                    .ok_or_else(|| self.err(ValidationErrorKind::TableIndexOutOfBound(*table_index)))?;
                let ft = self
                    .module
                    .types
                    .get(type_index.index())
                    .cloned()
                    .ok_or_else(|| self.err(ValidationErrorKind::TypeIndexOutOfBound(*type_index)))?;
                let mut ensures = Self::concrete(&ft.params);
                ensures.push(ValueType::I32.into());
                self.apply(&ensures, &Self::concrete(&ft.results))?;
            }

            I::Drop => {
                let var = self.fresh_type_var();
                self.apply(&[OperandStackElement::TypeVar(var)], &[])?;
            }
            I::Select => {
                let var = self.fresh_type_var();
                let t = OperandStackElement::TypeVar(var);
                self.apply(&[t, t, ValueType::I32.into()], &[t])?;
            }

            I::LocalGet(idx) => {
                let t = self.local_type(*idx)?;
                self.apply(&[], &[t.into()])?;
            }
            I::LocalSet(idx) => {
                let t = self.local_type(*idx)?;
                self.apply(&[t.into()], &[])?;
            }
            I::LocalTee(idx) => {
                let t = self.local_type(*idx)?;
                self.apply(&[t.into()], &[t.into()])?;
            }
            I::GlobalGet(idx) => {
                let gt = self
                    .module
                    .global_type(*idx)
                    .ok_or_else(|| self.err(ValidationErrorKind::GlobalIndexOutOfBound(*idx)))?;
                self.apply(&[], &[gt.value_type.into()])?;
            }
            I::GlobalSet(idx) => {
                let gt = self
                    .module
                    .global_type(*idx)
                    .ok_or_else(|| self.err(ValidationErrorKind::GlobalIndexOutOfBound(*idx)))?;
                if !matches!(gt.mutability, Mutability::Var) {
                    return Err(self.err(ValidationErrorKind::GlobalMustBeMut));
                }
                self.apply(&[gt.value_type.into()], &[])?;
            }

            I::Load { op, memarg } => {
                self.check_memory(0)?;
                self.check_align(memarg.align, op.memory_width_bytes())?;
                self.apply(&[ValueType::I32.into()], &[op.result_type().into()])?;
            }
            I::Store { op, memarg } => {
                self.check_memory(0)?;
                self.check_align(memarg.align, op.memory_width_bytes())?;
                self.apply(&[ValueType::I32.into(), op.value_type().into()], &[])?;
            }
            I::MemorySize => {
                self.check_memory(0)?;
                self.apply(&[], &[ValueType::I32.into()])?;
            }
            I::MemoryGrow => {
                self.check_memory(0)?;
                self.apply(&[ValueType::I32.into()], &[ValueType::I32.into()])?;
            }

            I::I32Const(_) => self.apply(&[], &[ValueType::I32.into()])?,
            I::I64Const(_) => self.apply(&[], &[ValueType::I64.into()])?,
            I::F32Const(_) => self.apply(&[], &[ValueType::F32.into()])?,
            I::F64Const(_) => self.apply(&[], &[ValueType::F64.into()])?,

            I::IntUnary { width, op: _ } => {
                let t = int_width_type(*width);
                self.apply(&[t.into()], &[t.into()])?;
            }
            I::IntBinary { width, op } => {
                let t = int_width_type(*width);
                let _ = op;
                self.apply(&[t.into(), t.into()], &[t.into()])?;
            }
            I::IntCompare { width, op } => {
                let t = int_width_type(*width);
                if matches!(op, IntCompareOp::Eqz) {
                    self.apply(&[t.into()], &[ValueType::I32.into()])?;
                } else {
                    self.apply(&[t.into(), t.into()], &[ValueType::I32.into()])?;
                }
            }
            I::FloatUnary { width, op: _ } => {
                let t = float_width_type(*width);
                self.apply(&[t.into()], &[t.into()])?;
            }
            I::FloatBinary { width, op: _ } => {
                let t = float_width_type(*width);
                self.apply(&[t.into(), t.into()], &[t.into()])?;
            }
            I::FloatCompare { width, op: _ } => {
                let t = float_width_type(*width);
                self.apply(&[t.into(), t.into()], &[ValueType::I32.into()])?;
            }

            I::Convert(op) => {
                self.apply(&[op.operand_type().into()], &[op.result_type().into()])?;
            }
            I::SignExtend(op) => {
                let t = sign_extend_type(*op);
                self.apply(&[t.into()], &[t.into()])?;
            }

            I::Simd(simd) => self.validate_simd(simd)?,
        }
        Ok(())
    }

    fn check_memory(&self, idx: u32) -> ValidationResult<()> {
        let idx = crate::bytecode::MemIdx::new(idx as usize);
        self.module
            .memory_type(idx)
            .map(|_| ())
            .ok_or_else(|| self.err(ValidationErrorKind::MemIndexOutOfBound(idx)))
    }

    fn check_align(&self, align: u32, width_bytes: u32) -> ValidationResult<()> {
        if (1u32 << align) > width_bytes {
            return Err(self.err(ValidationErrorKind::InvalidAlign {
                align,
                width: width_bytes,
            }));
        }
        Ok(())
    }

    fn validate_simd(&mut self, simd: &SimdInstruction) -> ValidationResult<()> {
        use SimdInstruction as S;
        let v128 = OperandStackElement::Concrete(ValueType::V128);
        match simd {
            S::V128Load { memarg } => {
                self.check_memory(0)?;
                self.check_align(memarg.align, 16)?;
                self.apply(&[ValueType::I32.into()], &[v128])?;
            }
            S::V128Store { memarg } => {
                self.check_memory(0)?;
                self.check_align(memarg.align, 16)?;
                self.apply(&[ValueType::I32.into(), v128], &[])?;
            }
            S::V128Const { .. } => self.apply(&[], &[v128])?,
            S::Splat { lane } => {
                let t = lane_scalar_type(*lane);
                self.apply(&[t.into()], &[v128])?;
            }
            S::ExtractLane { lane, .. } => {
                let t = lane_scalar_type(*lane);
                self.apply(&[v128], &[t.into()])?;
            }
            S::ReplaceLane { lane, .. } => {
                let t = lane_scalar_type(*lane);
                self.apply(&[v128, t.into()], &[v128])?;
            }
            S::Shuffle { .. } => self.apply(&[v128, v128], &[v128])?,
            S::Unary { .. } => self.apply(&[v128], &[v128])?,
            S::Binary { .. } => self.apply(&[v128, v128], &[v128])?,
        }
        Ok(())
    }
}

fn int_width_type(width: IntWidth) -> ValueType {
    match width {
        IntWidth::I32 => ValueType::I32,
        IntWidth::I64 => ValueType::I64,
    }
}

fn float_width_type(width: FloatWidth) -> ValueType {
    match width {
        FloatWidth::F32 => ValueType::F32,
        FloatWidth::F64 => ValueType::F64,
    }
}

fn sign_extend_type(op: SignExtendOp) -> ValueType {
    match op {
        SignExtendOp::I32Extend8S | SignExtendOp::I32Extend16S => ValueType::I32,
        SignExtendOp::I64Extend8S | SignExtendOp::I64Extend16S | SignExtendOp::I64Extend32S => {
            ValueType::I64
        }
    }
}

fn lane_scalar_type(lane: crate::bytecode::instr::SimdLaneType) -> ValueType {
    use crate::bytecode::instr::SimdLaneType as L;
    match lane {
        L::I8x16 | L::I16x8 | L::I32x4 => ValueType::I32,
        L::I64x2 => ValueType::I64,
        L::F32x4 => ValueType::F32,
        L::F64x2 => ValueType::F64,
    }
}

/// Validates every locally-defined function body in `module`, looking up
/// each function's declared parameter/result types and its raw local
/// declarations from the parsed `Function` entry.
pub fn validate_module(module: &Module) -> ValidationResult<()> {
    for (i, function) in module.functions.iter().enumerate() {
        let func_index = (module.num_imported_functions + i) as u32;
        let func_idx = crate::bytecode::FuncIdx::new(func_index as usize);
        let ft = module
            .function_type(func_idx)
            .ok_or_else(|| ValidationError {
                func_index,
                enclosing_opcodes: vec![],
                kind: ValidationErrorKind::FuncIndexOutOfBound(func_idx),
            })?
            .clone();
        let mut validator =
            FuncValidator::new(module, func_index, function.locals.clone(), ft.results.clone());
        validator.validate_body(&function.body)?;
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::bytecode::{FuncIdx, Function, FunctionType, TypeIdx};

    fn module_with(func_type: FunctionType, locals: Vec<ValueType>, body: Vec<Instruction>) -> Module {
        let mut m = Module::empty();
        m.types.push(func_type);
        m.function_types.push(TypeIdx::new(0));
        m.functions.push(Function { locals, body });
        m
    }

    #[test]
    fn simple_add_validates() {
        let ft = FunctionType::new(vec![ValueType::I32, ValueType::I32], vec![ValueType::I32]);
        let body = vec![
            Instruction::LocalGet(crate::bytecode::LocalIdx::new(0)),
            Instruction::LocalGet(crate::bytecode::LocalIdx::new(1)),
            Instruction::IntBinary {
                width: IntWidth::I32,
                op: IntBinaryOp::Add,
            },
        ];
        let module = module_with(ft, vec![], body);
        assert!(validate_module(&module).is_ok());
    }

    #[test]
    fn type_mismatch_is_rejected() {
        let ft = FunctionType::new(vec![], vec![ValueType::I32]);
        let body = vec![Instruction::F32Const(0)];
        let module = module_with(ft, vec![], body);
        let err = validate_module(&module).unwrap_err();
        assert!(matches!(err.kind, ValidationErrorKind::TypeMismatch { .. }));
    }

    #[test]
    fn unreachable_makes_following_code_polymorphic() {
        let ft = FunctionType::new(vec![], vec![ValueType::I32]);
        let body = vec![Instruction::Unreachable, Instruction::I32Const(0)];
        let module = module_with(ft, vec![], body);
        assert!(validate_module(&module).is_ok());
    }

    #[test]
    fn br_table_requires_matching_arities() {
        let ft = FunctionType::new(vec![], vec![]);
        let body = vec![Instruction::Block {
            block_type: BlockResultType::Unit,
            body: vec![Instruction::Block {
                block_type: BlockResultType::Value(ValueType::I32),
                body: vec![
                    Instruction::I32Const(0),
                    Instruction::I32Const(0),
                    Instruction::BrTable {
                        targets: vec![crate::bytecode::LabelIdx::new(0)],
                        default: crate::bytecode::LabelIdx::new(1),
                    },
                ],
            }],
        }];
        let module = module_with(ft, vec![], body);
        let err = validate_module(&module).unwrap_err();
        assert!(matches!(err.kind, ValidationErrorKind::InvalidBranchTable));
    }

    #[test]
    fn select_unifies_both_arms() {
        let ft = FunctionType::new(vec![], vec![ValueType::I64]);
        let body = vec![
            Instruction::I64Const(1),
            Instruction::I64Const(2),
            Instruction::I32Const(1),
            Instruction::Select,
        ];
        let module = module_with(ft, vec![], body);
        assert!(validate_module(&module).is_ok());
    }

    #[test]
    fn global_set_on_immutable_global_fails() {
        let ft = FunctionType::new(vec![], vec![]);
        let mut module = module_with(ft, vec![], vec![]);
        module.globals.push(crate::bytecode::GlobalType {
            mutability: Mutability::Const,
            value_type: ValueType::I32,
        });
        module.global_inits.push(crate::bytecode::ConstExpr::I32(0));
        module.functions[0].body = vec![
            Instruction::I32Const(1),
            Instruction::GlobalSet(crate::bytecode::GlobalIdx::new(0)),
        ];
        let err = validate_module(&module).unwrap_err();
        assert!(matches!(err.kind, ValidationErrorKind::GlobalMustBeMut));
    }
}
