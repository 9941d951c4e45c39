//! The closed MIR instruction set: numeric, memory, control, and vector
//! operations over SSA `Value`s. Terminators (`Branch`,
//! `Return`, `Unreachable`-as-terminator) are kept in `BasicBlock`
//! alongside the straight-line instruction list, mirroring how basic
//! blocks are actually walked; everything else is an `Instruction`.

use super::{Block, Local, MirFunc, MirGlobal, MirMemory, MirTable, Value};
use crate::bytecode::instr::{
    ConvertOp, FloatBinaryOp, FloatCompareOp, FloatUnaryOp, FloatWidth, IntBinaryOp, IntCompareOp,
    IntUnaryOp, IntWidth, SignExtendOp, SimdBinaryOp, SimdLaneType, SimdUnaryOp,
};
use crate::bytecode::ValueType;

#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum ConstValue {
    I32(i32),
    I64(i64),
    F32(u32),
    F64(u64),
    V128([u8; 16]),
}

/// A basic block's control-flow exit. `Phi` candidates for the targeted
/// block(s) are recorded separately on the `Phi` instructions themselves,
/// not here; a terminator only names *where* control goes.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Terminator {
    Unreachable,
    Unconditional(Block),
    Conditional {
        cond: Value,
        if_true: Block,
        if_false: Block,
    },
    Switch {
        index: Value,
        targets: Vec<Block>,
        default: Block,
    },
    Return(Vec<Value>),
}

impl Terminator {
    pub fn successors(&self) -> Vec<Block> {
        match self {
            Terminator::Unreachable | Terminator::Return(_) => vec![],
            Terminator::Unconditional(b) => vec![*b],
            Terminator::Conditional { if_true, if_false, .. } => vec![*if_true, *if_false],
            Terminator::Switch { targets, default, .. } => {
                let mut v = targets.clone();
                v.push(*default);
                v
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum MemoryWidth {
    B1,
    B2,
    B4,
    B8,
    B16,
}

impl MemoryWidth {
    pub fn from_bytes(n: u32) -> MemoryWidth {
        match n {
            1 => MemoryWidth::B1,
            2 => MemoryWidth::B2,
            4 => MemoryWidth::B4,
            8 => MemoryWidth::B8,
            16 => MemoryWidth::B16,
            _ => panic!("unsupported memory access width {n}"),
        }
    }

    pub fn bytes(self) -> u32 {
        match self {
            MemoryWidth::B1 => 1,
            MemoryWidth::B2 => 2,
            MemoryWidth::B4 => 4,
            MemoryWidth::B8 => 8,
            MemoryWidth::B16 => 16,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct MemArg {
    pub memory: MirMemory,
    pub offset: u32,
    pub align: u32,
}

/// Sign/zero-extending widening of an integer already narrowed by a
/// sub-word load.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Cast {
    pub from_width: MemoryWidth,
    pub to: IntWidth,
    pub signed: bool,
}

/// The non-terminator operations a `Value` may be defined by. Every
/// variant is a `Value`'s sole definition, even ones with no result
/// (`Store`, `MemoryGuard`, `LocalSet`, `GlobalSet`) — they still occupy a
/// slot in `Function::values` so use-site tracking has a uniform key.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Instruction {
    Constant(ConstValue),

    Call {
        func: MirFunc,
        args: Vec<Value>,
    },
    CallIndirect {
        table: MirTable,
        type_params: Vec<ValueType>,
        type_results: Vec<ValueType>,
        index: Value,
        args: Vec<Value>,
    },
    Select {
        cond: Value,
        if_true: Value,
        if_false: Value,
    },

    LocalGet(Local),
    LocalSet(Local, Value),
    GlobalGet(MirGlobal),
    GlobalSet(MirGlobal, Value),

    IntCompare {
        width: IntWidth,
        op: IntCompareOp,
        lhs: Value,
        rhs: Option<Value>,
    },
    FloatCompare {
        width: FloatWidth,
        op: FloatCompareOp,
        lhs: Value,
        rhs: Value,
    },
    IntUnary {
        width: IntWidth,
        op: IntUnaryOp,
        operand: Value,
    },
    IntBinary {
        width: IntWidth,
        op: IntBinaryOp,
        lhs: Value,
        rhs: Value,
    },
    FloatUnary {
        width: FloatWidth,
        op: FloatUnaryOp,
        operand: Value,
    },
    FloatBinary {
        width: FloatWidth,
        op: FloatBinaryOp,
        lhs: Value,
        rhs: Value,
    },

    Load {
        memarg: MemArg,
        width: MemoryWidth,
        result_type: ValueType,
        addr: Value,
    },
    Store {
        memarg: MemArg,
        width: MemoryWidth,
        addr: Value,
        value: Value,
    },
    MemorySize(MirMemory),
    MemoryGrow {
        memory: MirMemory,
        delta: Value,
    },
    /// Emitted immediately before a `Load`/`Store` whose effective address
    /// (`addr + offset`) may exceed the memory's current bound.
    MemoryGuard {
        memory: MirMemory,
        addr: Value,
        offset: u32,
        width_bytes: u32,
    },

    Convert(ConvertOp, Value),
    SignExtend(SignExtendOp, Value),
    Cast(Cast, Value),

    /// Bundles a multi-value result (a `call`'s aggregate) into one SSA
    /// value so it can be passed around before being taken apart.
    Pack(Vec<Value>),
    /// Projects one component out of an aggregate produced by `Pack` or a
    /// multi-value `Call`.
    Unpack {
        aggregate: Value,
        index: u32,
    },

    /// Chooses its value by the predecessor block through which control
    /// reached the containing block. Candidates are appended as the
    /// translator discovers each predecessor; a candidate whose source
    /// block is no longer live is pruned by `SimplifyCFG`.
    Phi {
        ty: ValueType,
        incoming: Vec<(Block, Value)>,
    },

    Splat {
        lane: SimdLaneType,
        operand: Value,
    },
    ExtractLane {
        lane: SimdLaneType,
        index: u8,
        signed: Option<bool>,
        operand: Value,
    },
    InsertLane {
        lane: SimdLaneType,
        index: u8,
        vector: Value,
        scalar: Value,
    },
    Shuffle {
        indices: [u8; 16],
        lhs: Value,
        rhs: Value,
    },
    SimdUnary {
        lane: SimdLaneType,
        op: SimdUnaryOp,
        operand: Value,
    },
    SimdBinary {
        lane: SimdLaneType,
        op: SimdBinaryOp,
        lhs: Value,
        rhs: Value,
    },
}

impl Instruction {
    /// The `Value` operands this instruction reads, for use-site
    /// registration and for passes that need to walk def-use edges
    /// uniformly regardless of opcode.
    pub fn operands(&self) -> Vec<Value> {
        use Instruction::*;
        match self {
            Constant(_) | LocalGet(_) | GlobalGet(_) | MemorySize(_) => vec![],
            Call { args, .. } => args.clone(),
            CallIndirect { index, args, .. } => {
                let mut v = vec![*index];
                v.extend(args.iter().copied());
                v
            }
            Select { cond, if_true, if_false } => vec![*cond, *if_true, *if_false],
            LocalSet(_, v) | GlobalSet(_, v) => vec![*v],
            IntCompare { lhs, rhs, .. } => {
                let mut v = vec![*lhs];
                v.extend(*rhs);
                v
            }
            FloatCompare { lhs, rhs, .. } => vec![*lhs, *rhs],
            IntUnary { operand, .. } | FloatUnary { operand, .. } => vec![*operand],
            IntBinary { lhs, rhs, .. } | FloatBinary { lhs, rhs, .. } => vec![*lhs, *rhs],
            Load { addr, .. } => vec![*addr],
            Store { addr, value, .. } => vec![*addr, *value],
            MemoryGrow { delta, .. } => vec![*delta],
            MemoryGuard { addr, .. } => vec![*addr],
            Convert(_, v) | SignExtend(_, v) | Cast(_, v) => vec![*v],
            Pack(vs) => vs.clone(),
            Unpack { aggregate, .. } => vec![*aggregate],
            Phi { incoming, .. } => incoming.iter().map(|(_, v)| *v).collect(),
            Splat { operand, .. } => vec![*operand],
            ExtractLane { operand, .. } => vec![*operand],
            InsertLane { vector, scalar, .. } => vec![*vector, *scalar],
            Shuffle { lhs, rhs, .. } => vec![*lhs, *rhs],
            SimdUnary { operand, .. } => vec![*operand],
            SimdBinary { lhs, rhs, .. } => vec![*lhs, *rhs],
        }
    }

    pub fn is_phi(&self) -> bool {
        matches!(self, Instruction::Phi { .. })
    }
}
