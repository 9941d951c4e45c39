//! A single MIR function: its basic blocks, locals, and the SSA value
//! arena. A `Function` owns an intrusive list of `BasicBlock`s and an
//! intrusive list of `Local`s.

use crate::bytecode::ValueType;
use crate::entity::{EntityRef, EntityVec, PerEntity};

use super::instr::{Instruction, Terminator};
use super::use_sites::{Referrer, UseSiteTracker};
use super::{Block, Local, Type, Value};

#[derive(Clone, Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct BasicBlock {
    /// Instructions in this block, in order. `Phi` instructions, if any,
    /// come first.
    pub insts: Vec<Value>,
    pub terminator: Terminator,
    pub preds: Vec<Block>,
}

impl Default for Terminator {
    fn default() -> Self {
        Terminator::Unreachable
    }
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
pub struct Function {
    pub name: String,
    pub params: Vec<ValueType>,
    pub results: Vec<ValueType>,

    pub entry: Block,
    pub exit: Block,
    pub blocks: EntityVec<Block, BasicBlock>,
    pub locals: EntityVec<Local, ValueType>,
    pub values: EntityVec<Value, Instruction>,

    pub value_blocks: PerEntity<Value, Block>,
    pub value_types: PerEntity<Value, Type>,

    pub use_sites: UseSiteTracker,
}

impl Function {
    /// A new function with just its entry and exit blocks; the exit
    /// block's `Phi`s (one per result type) and its `Return` terminator
    /// are wired up by the translator once it knows the incoming values.
    pub fn new(name: String, params: Vec<ValueType>, results: Vec<ValueType>) -> Self {
        let mut blocks = EntityVec::default();
        let entry = blocks.push(BasicBlock::default());
        let exit = blocks.push(BasicBlock::default());
        let mut locals = EntityVec::default();
        for &p in &params {
            locals.push(p);
        }
        Function {
            name,
            params,
            results,
            entry,
            exit,
            blocks,
            locals,
            values: EntityVec::default(),
            value_blocks: PerEntity::default(),
            value_types: PerEntity::default(),
            use_sites: UseSiteTracker::new(),
        }
    }

    pub fn add_block(&mut self) -> Block {
        let id = self.blocks.push(BasicBlock::default());
        log::trace!("{}: add_block {}", self.name, id);
        id
    }

    pub fn add_local(&mut self, ty: ValueType) -> Local {
        self.locals.push(ty)
    }

    /// Appends a new instruction to `block`, registering its operand
    /// use-sites, and returns the `Value` that names it.
    pub fn push_instruction(&mut self, block: Block, inst: Instruction) -> Value {
        let operands = inst.operands();
        let value = self.values.push(inst);
        self.value_blocks[value] = block;
        self.blocks[block].insts.push(value);
        for operand in operands {
            self.use_sites.add_value_use(operand, Referrer::Instruction(value));
        }
        value
    }

    /// Adds one more incoming `(predecessor, value)` candidate to an
    /// existing `Phi` instruction.
    pub fn add_phi_candidate(&mut self, phi: Value, from: Block, value: Value) {
        if let Instruction::Phi { incoming, .. } = &mut self.values[phi] {
            incoming.push((from, value));
        } else {
            panic!("add_phi_candidate on non-Phi value {phi}");
        }
        self.use_sites.add_value_use(value, Referrer::Instruction(phi));
    }

    pub fn set_terminator(&mut self, block: Block, terminator: Terminator) {
        for succ in terminator.successors() {
            self.use_sites.add_block_use(succ, Referrer::Terminator(block));
        }
        for value in terminator_operands(&terminator) {
            self.use_sites.add_value_use(value, Referrer::Terminator(block));
        }
        self.blocks[block].terminator = terminator;
    }

    pub fn add_edge(&mut self, from: Block, to: Block) {
        self.blocks[to].preds.push(from);
        log::trace!("{}: add_edge {} -> {}", self.name, from, to);
    }

    /// Every block reachable from `entry` by walking successors, in
    /// preorder. Used by passes that don't need the full dominator tree.
    pub fn reachable_blocks(&self) -> Vec<Block> {
        let mut seen = vec![false; self.blocks.len()];
        let mut order = Vec::new();
        let mut stack = vec![self.entry];
        while let Some(block) = stack.pop() {
            if seen[block.index()] {
                continue;
            }
            seen[block.index()] = true;
            order.push(block);
            stack.extend(self.blocks[block].terminator.successors());
        }
        order
    }
}

fn terminator_operands(terminator: &Terminator) -> Vec<Value> {
    match terminator {
        Terminator::Unreachable | Terminator::Unconditional(_) => vec![],
        Terminator::Conditional { cond, .. } => vec![*cond],
        Terminator::Switch { index, .. } => vec![*index],
        Terminator::Return(values) => values.clone(),
    }
}
