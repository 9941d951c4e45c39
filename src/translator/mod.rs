//! Lowers a validated `bytecode::Module` into `mir::Module`.
//!
//! Translation assumes the module already passed `validator::validate_module`:
//! it does not re-check types, only tracks enough of the operand stack to
//! wire SSA values together.

use crate::bytecode::instr::{self as bc_instr, BlockResultType, LoadOp, StoreOp};
use crate::bytecode::{self, ConstExpr, FuncIdx, Instruction as BcInstr, ValueType};
use crate::config::TranslationOptions;
use crate::entity::EntityRef;
use crate::mir::{
    self, Block, Cast, ConstValue, DataSegment, ElementSegment, Export, ExportKind, FuncDecl,
    GlobalDecl, InitializerExpr, Instruction as MirInstr, MemArg, MemoryDecl, MemoryWidth,
    TableDecl, Terminator, Value,
};

/// One control-flow label: where `br` to this depth should jump, and how
/// many values it carries across the branch.
#[derive(Clone)]
struct LabelFrame {
    merge: Block,
    arity: usize,
    phis: Vec<Value>,
}

struct FuncTranslator<'m> {
    module: &'m bytecode::Module,
    func: mir::Function,
    stack: Vec<Value>,
    labels: Vec<LabelFrame>,
    current: Block,
    terminated: bool,
    options: &'m TranslationOptions,
}

/// Lowers every locally-defined function and lifts module-level shells
/// (imports, exports, segments, globals) into a `mir::Module`.
pub fn translate_module(module: &bytecode::Module, options: &TranslationOptions) -> mir::Module {
    let mut out = mir::Module::empty();

    for import in &module.imports {
        match import.descriptor {
            bytecode::ImportExportDescriptor::Type(type_idx) => {
                let ty = &module.types[type_idx.index()];
                out.funcs.push(FuncDecl::Import {
                    module: import.module.clone(),
                    name: import.name.clone(),
                    params: ty.params.clone(),
                    results: ty.results.clone(),
                });
            }
            bytecode::ImportExportDescriptor::Table(idx) => {
                out.tables.push(TableDecl {
                    ty: module.tables[idx.index()],
                    import: Some((import.module.clone(), import.name.clone())),
                });
            }
            bytecode::ImportExportDescriptor::Memory(idx) => {
                out.memories.push(MemoryDecl {
                    ty: module.memories[idx.index()],
                    import: Some((import.module.clone(), import.name.clone())),
                });
            }
            bytecode::ImportExportDescriptor::Global(idx) => {
                out.globals.push(GlobalDecl {
                    ty: module.globals[idx.index()],
                    import: Some((import.module.clone(), import.name.clone())),
                    init: None,
                });
            }
        }
    }

    for (i, func_type_idx) in module
        .function_types
        .iter()
        .enumerate()
        .skip(module.num_imported_functions)
    {
        let func_idx = FuncIdx::new(i);
        let ty = &module.types[func_type_idx.index()];
        let body = &module.functions[i - module.num_imported_functions];
        let translated = translate_function(module, func_idx, ty, body, options);
        out.funcs.push(FuncDecl::Local(translated));
    }

    for idx in module.num_imported_tables..module.tables.len() {
        out.tables.push(TableDecl { ty: module.tables[idx], import: None });
    }
    for idx in module.num_imported_memories..module.memories.len() {
        out.memories.push(MemoryDecl { ty: module.memories[idx], import: None });
    }
    for (i, global_init) in module.global_inits.iter().enumerate() {
        let idx = module.num_imported_globals + i;
        out.globals.push(GlobalDecl {
            ty: module.globals[idx],
            import: None,
            init: Some(lift_const_expr(global_init)),
        });
    }

    for elem in &module.elements {
        out.elements.push(ElementSegment {
            table: mir::MirTable::new(elem.table.index()),
            offset: lift_const_expr(&elem.offset),
            func_indices: elem.func_indices.iter().map(|f| mir::MirFunc::new(f.index())).collect(),
        });
    }
    for data in &module.data {
        out.data.push(DataSegment {
            memory: mir::MirMemory::new(data.memory.index()),
            offset: lift_const_expr(&data.offset),
            bytes: data.bytes.clone(),
        });
    }

    out.start = module.start.map(|f| mir::MirFunc::new(f.index()));

    for export in &module.exports {
        let kind = match export.descriptor {
            bytecode::ImportExportDescriptor::Type(type_idx) => {
                ExportKind::Func(mir::MirFunc::new(function_index_for_type_descriptor(module, type_idx)))
            }
            bytecode::ImportExportDescriptor::Table(idx) => ExportKind::Table(mir::MirTable::new(idx.index())),
            bytecode::ImportExportDescriptor::Memory(idx) => ExportKind::Memory(mir::MirMemory::new(idx.index())),
            bytecode::ImportExportDescriptor::Global(idx) => ExportKind::Global(mir::MirGlobal::new(idx.index())),
        };
        out.exports.push(Export { name: export.name.clone(), kind });
    }

    out
}

/// The wire format reuses the `Type` descriptor tag (`0x00`) for function
/// exports, carrying a function index rather than a type index; this
/// recovers it without adding a separate descriptor variant to the
/// bytecode layer.
fn function_index_for_type_descriptor(module: &bytecode::Module, raw: crate::bytecode::TypeIdx) -> usize {
    let idx = raw.index();
    debug_assert!(idx < module.num_functions());
    idx
}

fn lift_const_expr(expr: &ConstExpr) -> InitializerExpr {
    match expr {
        ConstExpr::I32(v) => InitializerExpr::Constant(ConstValue::I32(*v)),
        ConstExpr::I64(v) => InitializerExpr::Constant(ConstValue::I64(*v)),
        ConstExpr::F32(v) => InitializerExpr::Constant(ConstValue::F32(*v)),
        ConstExpr::F64(v) => InitializerExpr::Constant(ConstValue::F64(*v)),
        ConstExpr::GlobalGet(idx) => InitializerExpr::GlobalGet(mir::MirGlobal::new(idx.index())),
    }
}

fn translate_function(
    module: &bytecode::Module,
    func_idx: FuncIdx,
    ty: &bytecode::FunctionType,
    body: &bytecode::Function,
    options: &TranslationOptions,
) -> mir::Function {
    let name = format!("func{}", func_idx.index());
    let mut func = mir::Function::new(name, ty.params.clone(), ty.results.clone());
    for &local_ty in &body.locals {
        func.add_local(local_ty);
    }

    let entry = func.entry;
    let exit = func.exit;
    let result_phis: Vec<Value> = ty
        .results
        .iter()
        .map(|&rt| func.push_instruction(exit, MirInstr::Phi { ty: rt, incoming: Vec::new() }))
        .collect();
    func.set_terminator(exit, Terminator::Return(result_phis.clone()));

    let mut t = FuncTranslator {
        module,
        func,
        stack: Vec::new(),
        labels: vec![LabelFrame { merge: exit, arity: ty.results.len(), phis: result_phis }],
        current: entry,
        terminated: false,
        options,
    };

    t.translate_sequence(&body.body);
    if !t.terminated {
        let arity = t.labels[0].arity;
        let values = t.pop_n(arity);
        let phis = t.labels[0].phis.clone();
        t.merge_into(&phis, &values);
        t.func.add_edge(t.current, exit);
        t.set_terminator_here(Terminator::Unconditional(exit));
    }

    t.func
}

impl<'m> FuncTranslator<'m> {
    fn switch_to(&mut self, block: Block) {
        self.current = block;
        self.terminated = false;
    }

    fn set_terminator_here(&mut self, terminator: Terminator) {
        self.func.set_terminator(self.current, terminator);
        self.terminated = true;
    }

    fn push(&mut self, v: Value) {
        self.stack.push(v);
    }

    fn pop(&mut self) -> Value {
        self.stack.pop().expect("operand stack underflow in a validated module")
    }

    fn pop_n(&mut self, n: usize) -> Vec<Value> {
        let at = self.stack.len() - n;
        self.stack.split_off(at)
    }

    fn peek_n(&self, n: usize) -> Vec<Value> {
        let len = self.stack.len();
        self.stack[len - n..].to_vec()
    }

    fn emit(&mut self, inst: MirInstr) -> Value {
        self.func.push_instruction(self.current, inst)
    }

    fn merge_into(&mut self, phis: &[Value], values: &[Value]) {
        let from = self.current;
        for (&phi, &value) in phis.iter().zip(values.iter()) {
            self.func.add_phi_candidate(phi, from, value);
        }
    }

    fn new_block(&mut self) -> Block {
        self.func.add_block()
    }

    /// Records the control-flow edge and phi candidates for branching `n`
    /// levels out from the current block, without yet terminating it.
    /// Returns the target merge block. Used by `br`/`br_if`/`br_table`,
    /// which differ only in how many times and under what terminator this
    /// target is reached.
    fn merge_edge_to_label(&mut self, depth: u32) -> Block {
        let idx = self.labels.len() - 1 - depth as usize;
        let frame = self.labels[idx].clone();
        let values = self.peek_n(frame.arity);
        self.func.add_edge(self.current, frame.merge);
        self.merge_into(&frame.phis, &values);
        frame.merge
    }

    fn translate_sequence(&mut self, body: &[BcInstr]) {
        for instr in body {
            if self.terminated {
                break;
            }
            self.translate_one(instr);
        }
    }

    fn block_arity(&self, bt: BlockResultType) -> (Vec<ValueType>, Vec<ValueType>) {
        match bt {
            BlockResultType::Unit => (vec![], vec![]),
            BlockResultType::Value(v) => (vec![], vec![v]),
            BlockResultType::TypeIndex(idx) => {
                let ft = &self.module.types[idx.index()];
                (ft.params.clone(), ft.results.clone())
            }
        }
    }

    fn push_phis(&mut self, block: Block, types: &[ValueType]) -> Vec<Value> {
        types
            .iter()
            .map(|&ty| self.func.push_instruction(block, MirInstr::Phi { ty, incoming: Vec::new() }))
            .collect()
    }

    fn translate_one(&mut self, instr: &BcInstr) {
        match instr {
            BcInstr::Unreachable => self.set_terminator_here(Terminator::Unreachable),
            BcInstr::Nop => {}

            BcInstr::Block { block_type, body } => {
                let (_params, results) = self.block_arity(*block_type);
                let merge = self.new_block();
                let phis = self.push_phis(merge, &results);
                self.labels.push(LabelFrame { merge, arity: results.len(), phis: phis.clone() });
                self.translate_sequence(body);
                if !self.terminated {
                    let values = self.pop_n(results.len());
                    self.func.add_edge(self.current, merge);
                    self.merge_into(&phis, &values);
                    self.set_terminator_here(Terminator::Unconditional(merge));
                }
                self.labels.pop();
                self.switch_to(merge);
                for &v in &phis {
                    self.push(v);
                }
            }

            BcInstr::Loop { block_type, body } => {
                let (params, results) = self.block_arity(*block_type);
                let header = self.new_block();
                let header_phis = self.push_phis(header, &params);
                let entry_values = self.pop_n(params.len());
                self.func.add_edge(self.current, header);
                self.merge_into(&header_phis, &entry_values);
                self.set_terminator_here(Terminator::Unconditional(header));

                let merge = self.new_block();
                let merge_phis = self.push_phis(merge, &results);

                self.switch_to(header);
                for &v in &header_phis {
                    self.push(v);
                }
                self.labels.push(LabelFrame { merge: header, arity: params.len(), phis: header_phis });
                self.translate_sequence(body);
                if !self.terminated {
                    let values = self.pop_n(results.len());
                    self.func.add_edge(self.current, merge);
                    self.merge_into(&merge_phis, &values);
                    self.set_terminator_here(Terminator::Unconditional(merge));
                }
                self.labels.pop();
                self.switch_to(merge);
                for &v in &merge_phis {
                    self.push(v);
                }
            }

            BcInstr::If { block_type, then_body, else_body } => {
                let (params, results) = self.block_arity(*block_type);
                let cond = self.pop();
                let param_values = self.pop_n(params.len());

                let then_block = self.new_block();
                let else_block = self.new_block();
                let merge = self.new_block();
                let phis = self.push_phis(merge, &results);

                self.func.add_edge(self.current, then_block);
                self.func.add_edge(self.current, else_block);
                self.set_terminator_here(Terminator::Conditional { cond, if_true: then_block, if_false: else_block });

                self.switch_to(then_block);
                for &v in &param_values {
                    self.push(v);
                }
                self.labels.push(LabelFrame { merge, arity: results.len(), phis: phis.clone() });
                self.translate_sequence(then_body);
                if !self.terminated {
                    let values = self.pop_n(results.len());
                    self.func.add_edge(self.current, merge);
                    self.merge_into(&phis, &values);
                    self.set_terminator_here(Terminator::Unconditional(merge));
                }
                self.labels.pop();

                self.switch_to(else_block);
                for &v in &param_values {
                    self.push(v);
                }
                self.labels.push(LabelFrame { merge, arity: results.len(), phis: phis.clone() });
                if let Some(body) = else_body {
                    self.translate_sequence(body);
                }
                if !self.terminated {
                    let values = self.pop_n(results.len());
                    self.func.add_edge(self.current, merge);
                    self.merge_into(&phis, &values);
                    self.set_terminator_here(Terminator::Unconditional(merge));
                }
                self.labels.pop();

                self.switch_to(merge);
                for &v in &phis {
                    self.push(v);
                }
            }

            BcInstr::Br(idx) => {
                let target = self.merge_edge_to_label(idx.index() as u32);
                self.set_terminator_here(Terminator::Unconditional(target));
            }
            BcInstr::BrIf(idx) => {
                let cond = self.pop();
                let target = self.merge_edge_to_label(idx.index() as u32);
                let fallthrough = self.new_block();
                self.func.add_edge(self.current, fallthrough);
                self.set_terminator_here(Terminator::Conditional { cond, if_true: target, if_false: fallthrough });
                self.switch_to(fallthrough);
            }
            BcInstr::BrTable { targets, default } => {
                let index = self.pop();
                let target_blocks: Vec<Block> =
                    targets.iter().map(|l| self.merge_edge_to_label(l.index() as u32)).collect();
                let default_block = self.merge_edge_to_label(default.index() as u32);
                self.set_terminator_here(Terminator::Switch { index, targets: target_blocks, default: default_block });
            }
            BcInstr::Return => {
                let arity = self.labels[0].arity;
                let values = self.pop_n(arity);
                let phis = self.labels[0].phis.clone();
                self.merge_into(&phis, &values);
                let exit = self.func.exit;
                self.func.add_edge(self.current, exit);
                self.set_terminator_here(Terminator::Unconditional(exit));
            }

            BcInstr::Call(func_idx) => {
                let (params, results) = self.callee_signature_by_func(*func_idx);
                let args = self.pop_n(params.len());
                let target = mir::MirFunc::new(func_idx.index());
                let value = self.emit(MirInstr::Call { func: target, args });
                self.unpack_results(value, &results);
            }
            BcInstr::CallIndirect { type_index, table_index } => {
                let ft = self.module.types[type_index.index()].clone();
                let table_entry = self.pop();
                let args = self.pop_n(ft.params.len());
                let table = mir::MirTable::new(table_index.index());
                let value = self.emit(MirInstr::CallIndirect {
                    table,
                    type_params: ft.params,
                    type_results: ft.results.clone(),
                    index: table_entry,
                    args,
                });
                self.unpack_results(value, &ft.results);
            }

            BcInstr::Drop => {
                self.pop();
            }
            BcInstr::Select => {
                let cond = self.pop();
                let if_false = self.pop();
                let if_true = self.pop();
                let value = self.emit(MirInstr::Select { cond, if_true, if_false });
                self.push(value);
            }

            BcInstr::LocalGet(idx) => {
                let local = mir::Local::new(idx.index());
                let value = self.emit(MirInstr::LocalGet(local));
                self.push(value);
            }
            BcInstr::LocalSet(idx) => {
                let local = mir::Local::new(idx.index());
                let value = self.pop();
                self.emit(MirInstr::LocalSet(local, value));
            }
            BcInstr::LocalTee(idx) => {
                let local = mir::Local::new(idx.index());
                let value = self.pop();
                self.emit(MirInstr::LocalSet(local, value));
                self.push(value);
            }
            BcInstr::GlobalGet(idx) => {
                let global = mir::MirGlobal::new(idx.index());
                let value = self.emit(MirInstr::GlobalGet(global));
                self.push(value);
            }
            BcInstr::GlobalSet(idx) => {
                let global = mir::MirGlobal::new(idx.index());
                let value = self.pop();
                self.emit(MirInstr::GlobalSet(global, value));
            }

            BcInstr::Load { op, memarg } => {
                let addr = self.pop();
                let width = load_width(*op);
                if !self.options.skip_mem_boundary_check {
                    self.emit(MirInstr::MemoryGuard {
                        memory: mir::MirMemory::new(0),
                        addr,
                        offset: memarg.offset,
                        width_bytes: op.memory_width_bytes(),
                    });
                }
                let loaded = self.emit(MirInstr::Load {
                    memarg: MemArg { memory: mir::MirMemory::new(0), offset: memarg.offset, align: memarg.align },
                    width,
                    result_type: op.result_type(),
                    addr,
                });
                let value = match op.sign_extends() {
                    Some(signed) => self.emit(MirInstr::Cast(
                        Cast { from_width: width, to: int_width_of(op.result_type()), signed },
                        loaded,
                    )),
                    None => loaded,
                };
                self.push(value);
            }
            BcInstr::Store { op, memarg } => {
                let value = self.pop();
                let addr = self.pop();
                let width = store_width(*op);
                if !self.options.skip_mem_boundary_check {
                    self.emit(MirInstr::MemoryGuard {
                        memory: mir::MirMemory::new(0),
                        addr,
                        offset: memarg.offset,
                        width_bytes: op.memory_width_bytes(),
                    });
                }
                self.emit(MirInstr::Store {
                    memarg: MemArg { memory: mir::MirMemory::new(0), offset: memarg.offset, align: memarg.align },
                    width,
                    addr,
                    value,
                });
            }
            BcInstr::MemorySize => {
                let value = self.emit(MirInstr::MemorySize(mir::MirMemory::new(0)));
                self.push(value);
            }
            BcInstr::MemoryGrow => {
                let delta = self.pop();
                let value = self.emit(MirInstr::MemoryGrow { memory: mir::MirMemory::new(0), delta });
                self.push(value);
            }

            BcInstr::I32Const(v) => self.push_const(ConstValue::I32(*v)),
            BcInstr::I64Const(v) => self.push_const(ConstValue::I64(*v)),
            BcInstr::F32Const(v) => self.push_const(ConstValue::F32(*v)),
            BcInstr::F64Const(v) => self.push_const(ConstValue::F64(*v)),

            BcInstr::IntUnary { width, op } => {
                let operand = self.pop();
                let result = self.emit(MirInstr::IntUnary { width: *width, op: *op, operand });
                self.push(result);
            }
            BcInstr::IntBinary { width, op } => {
                let rhs = self.pop();
                let lhs = self.pop();
                let result = self.emit(MirInstr::IntBinary { width: *width, op: *op, lhs, rhs });
                self.push(result);
            }
            BcInstr::IntCompare { width, op } => {
                let rhs = if *op == bc_instr::IntCompareOp::Eqz { None } else { Some(self.pop()) };
                let lhs = self.pop();
                let result = self.emit(MirInstr::IntCompare { width: *width, op: *op, lhs, rhs });
                self.push(result);
            }
            BcInstr::FloatUnary { width, op } => {
                let operand = self.pop();
                let result = self.emit(MirInstr::FloatUnary { width: *width, op: *op, operand });
                self.push(result);
            }
            BcInstr::FloatBinary { width, op } => {
                let rhs = self.pop();
                let lhs = self.pop();
                let result = self.emit(MirInstr::FloatBinary { width: *width, op: *op, lhs, rhs });
                self.push(result);
            }
            BcInstr::FloatCompare { width, op } => {
                let rhs = self.pop();
                let lhs = self.pop();
                let result = self.emit(MirInstr::FloatCompare { width: *width, op: *op, lhs, rhs });
                self.push(result);
            }

            BcInstr::Convert(op) => {
                let value = self.pop();
                let result = self.emit(MirInstr::Convert(*op, value));
                self.push(result);
            }
            BcInstr::SignExtend(op) => {
                let value = self.pop();
                let result = self.emit(MirInstr::SignExtend(*op, value));
                self.push(result);
            }

            BcInstr::Simd(simd) => self.translate_simd(simd),
        }
    }

    fn push_const(&mut self, c: ConstValue) {
        let value = self.emit(MirInstr::Constant(c));
        self.push(value);
    }

    fn unpack_results(&mut self, aggregate: Value, results: &[ValueType]) {
        match results.len() {
            0 => {}
            1 => self.push(aggregate),
            n => {
                for i in 0..n {
                    let v = self.emit(MirInstr::Unpack { aggregate, index: i as u32 });
                    self.push(v);
                }
            }
        }
    }

    fn callee_signature_by_func(&self, idx: FuncIdx) -> (Vec<ValueType>, Vec<ValueType>) {
        let ft = self.module.function_type(idx).expect("validated module has a type for every function");
        (ft.params.clone(), ft.results.clone())
    }

    fn translate_simd(&mut self, simd: &bc_instr::SimdInstruction) {
        use bc_instr::SimdInstruction as S;
        match simd {
            S::V128Load { memarg } => {
                let addr = self.pop();
                let loaded = self.emit(MirInstr::Load {
                    memarg: MemArg { memory: mir::MirMemory::new(0), offset: memarg.offset, align: memarg.align },
                    width: MemoryWidth::B16,
                    result_type: ValueType::V128,
                    addr,
                });
                self.push(loaded);
            }
            S::V128Store { memarg } => {
                let value = self.pop();
                let addr = self.pop();
                self.emit(MirInstr::Store {
                    memarg: MemArg { memory: mir::MirMemory::new(0), offset: memarg.offset, align: memarg.align },
                    width: MemoryWidth::B16,
                    addr,
                    value,
                });
            }
            S::V128Const { bytes } => self.push_const(ConstValue::V128(*bytes)),
            S::Splat { lane } => {
                let operand = self.pop();
                let result = self.emit(MirInstr::Splat { lane: *lane, operand });
                self.push(result);
            }
            S::ExtractLane { lane, index, signed } => {
                let operand = self.pop();
                let result = self.emit(MirInstr::ExtractLane { lane: *lane, index: *index, signed: *signed, operand });
                self.push(result);
            }
            S::ReplaceLane { lane, index } => {
                let scalar = self.pop();
                let vector = self.pop();
                let result = self.emit(MirInstr::InsertLane { lane: *lane, index: *index, vector, scalar });
                self.push(result);
            }
            S::Shuffle { indices } => {
                let rhs = self.pop();
                let lhs = self.pop();
                let result = self.emit(MirInstr::Shuffle { lhs, rhs, indices: *indices });
                self.push(result);
            }
            S::Unary { lane, op } => {
                let operand = self.pop();
                let result = self.emit(MirInstr::SimdUnary { lane: *lane, op: *op, operand });
                self.push(result);
            }
            S::Binary { lane, op } => {
                let rhs = self.pop();
                let lhs = self.pop();
                let result = self.emit(MirInstr::SimdBinary { lane: *lane, op: *op, lhs, rhs });
                self.push(result);
            }
        }
    }
}

fn int_width_of(ty: ValueType) -> bc_instr::IntWidth {
    match ty {
        ValueType::I32 => bc_instr::IntWidth::I32,
        ValueType::I64 => bc_instr::IntWidth::I64,
        _ => panic!("sign-extending cast applies only to integer loads"),
    }
}

fn load_width(op: LoadOp) -> MemoryWidth {
    MemoryWidth::from_bytes(op.memory_width_bytes())
}

fn store_width(op: StoreOp) -> MemoryWidth {
    MemoryWidth::from_bytes(op.memory_width_bytes())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::bytecode::{FunctionType, Module};

    fn single_function_module(params: Vec<ValueType>, results: Vec<ValueType>, body: Vec<BcInstr>) -> Module {
        let mut module = Module::empty();
        module.types.push(FunctionType::new(params, results));
        module.function_types.push(crate::bytecode::TypeIdx::new(0));
        module.functions.push(bytecode::Function { locals: vec![], body });
        module
    }

    #[test]
    fn constant_return_lowers_to_a_single_phi_incoming() {
        let module = single_function_module(vec![], vec![ValueType::I32], vec![BcInstr::I32Const(7)]);
        let out = translate_module(&module, &TranslationOptions::default());
        let f = match &out.funcs[mir::MirFunc::new(0)] {
            FuncDecl::Local(f) => f,
            _ => panic!("expected a local function"),
        };
        let exit_phi_value = f.blocks[f.exit].insts[0];
        match &f.values[exit_phi_value] {
            MirInstr::Phi { incoming, .. } => assert_eq!(incoming.len(), 1),
            _ => panic!("expected the exit block's result slot to be a Phi"),
        }
        assert!(matches!(f.blocks[f.exit].terminator, Terminator::Return(_)));
    }

    #[test]
    fn if_without_else_merges_both_arms() {
        let module = single_function_module(
            vec![ValueType::I32],
            vec![ValueType::I32],
            vec![
                BcInstr::LocalGet(crate::bytecode::LocalIdx::new(0)),
                BcInstr::LocalGet(crate::bytecode::LocalIdx::new(0)),
                BcInstr::If {
                    block_type: BlockResultType::Value(ValueType::I32),
                    then_body: vec![BcInstr::I32Const(1)],
                    else_body: None,
                },
            ],
        );
        let out = translate_module(&module, &TranslationOptions::default());
        match &out.funcs[mir::MirFunc::new(0)] {
            FuncDecl::Local(f) => assert!(f.blocks.len() >= 4),
            _ => panic!("expected a local function"),
        }
    }
}
