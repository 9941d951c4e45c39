//! `IsWellFormed`: verifies the invariants every other pass is allowed
//! to assume hold. A violation here means the translator or an earlier
//! pass has a bug: the caller panics on it in debug builds and skips the
//! check entirely in release.

use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::entity::EntityRef;
use crate::mir::{Block, Function, Instruction, Referrer, Terminator, Value};

use super::dominator;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WellFormedError {
    /// A value's recorded use-site set disagrees with what actually reads
    /// it.
    UseSiteAsymmetry { value: Value },
    /// An operand's definition does not dominate the instruction reading
    /// it (or, within the same block, does not precede it).
    DefDoesNotDominateUse { def: Value, user: Value },
    /// A `Phi`'s incoming-candidate count does not match its block's
    /// predecessor count.
    PhiArityMismatch { phi: Value, candidates: usize, predecessors: usize },
}

impl fmt::Display for WellFormedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WellFormedError::UseSiteAsymmetry { value } => {
                write!(f, "use-site bookkeeping for {value} is out of sync")
            }
            WellFormedError::DefDoesNotDominateUse { def, user } => {
                write!(f, "definition {def} does not dominate its use in {user}")
            }
            WellFormedError::PhiArityMismatch { phi, candidates, predecessors } => {
                write!(f, "phi {phi} has {candidates} incoming values but {predecessors} predecessors")
            }
        }
    }
}

impl std::error::Error for WellFormedError {}

pub fn check(f: &Function) -> Result<(), WellFormedError> {
    check_use_site_symmetry(f)?;
    check_dominance(f)?;
    check_phi_arity(f)?;
    Ok(())
}

fn check_use_site_symmetry(f: &Function) -> Result<(), WellFormedError> {
    let mut expected: HashMap<Value, HashSet<Referrer>> = HashMap::new();
    for block in f.blocks.iter() {
        for &value in &f.blocks[block].insts {
            for operand in f.values[value].operands() {
                expected.entry(operand).or_default().insert(Referrer::Instruction(value));
            }
        }
        for operand in terminator_value_operands(&f.blocks[block].terminator) {
            expected.entry(operand).or_default().insert(Referrer::Terminator(block));
        }
    }

    for idx in 0..f.values.len() {
        let value = Value::new(idx);
        let actual: HashSet<Referrer> = f.use_sites.value_use_sites(value).copied().collect();
        let expect = expected.remove(&value).unwrap_or_default();
        if actual != expect {
            return Err(WellFormedError::UseSiteAsymmetry { value });
        }
    }
    Ok(())
}

fn terminator_value_operands(terminator: &Terminator) -> Vec<Value> {
    match terminator {
        Terminator::Unreachable | Terminator::Unconditional(_) => vec![],
        Terminator::Conditional { cond, .. } => vec![*cond],
        Terminator::Switch { index, .. } => vec![*index],
        Terminator::Return(values) => values.clone(),
    }
}

/// Every operand's definition must dominate its use, except a `Phi`
/// candidate's value, which need only be dominated by the predecessor
/// block the candidate names (a loop's back-edge candidate is expected to
/// come from a block the header itself dominates).
fn check_dominance(f: &Function) -> Result<(), WellFormedError> {
    let dom = dominator::compute(f);

    for block in f.blocks.iter() {
        for (pos, &value) in f.blocks[block].insts.iter().enumerate() {
            match &f.values[value] {
                Instruction::Phi { incoming, .. } => {
                    for &(from, operand) in incoming {
                        if !def_dominates(f, &dom, operand, from, usize::MAX) {
                            return Err(WellFormedError::DefDoesNotDominateUse { def: operand, user: value });
                        }
                    }
                }
                inst => {
                    for operand in inst.operands() {
                        if !def_dominates(f, &dom, operand, block, pos) {
                            return Err(WellFormedError::DefDoesNotDominateUse { def: operand, user: value });
                        }
                    }
                }
            }
        }
    }
    Ok(())
}

fn def_dominates(
    f: &Function,
    dom: &dominator::DominatorTree,
    operand: Value,
    use_block: Block,
    use_pos: usize,
) -> bool {
    let def_block = f.value_blocks[operand];
    if def_block.is_invalid() {
        return false;
    }
    if def_block == use_block {
        if use_pos == usize::MAX {
            return true;
        }
        return f.blocks[def_block]
            .insts
            .iter()
            .position(|&v| v == operand)
            .map_or(false, |def_pos| def_pos < use_pos);
    }
    dom.dominates(def_block, use_block)
}

fn check_phi_arity(f: &Function) -> Result<(), WellFormedError> {
    for block in f.blocks.iter() {
        let predecessors = f.blocks[block].preds.len();
        for &value in &f.blocks[block].insts {
            if let Instruction::Phi { incoming, .. } = &f.values[value] {
                if incoming.len() != predecessors {
                    return Err(WellFormedError::PhiArityMismatch {
                        phi: value,
                        candidates: incoming.len(),
                        predecessors,
                    });
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::bytecode::ValueType;
    use crate::mir::ConstValue;

    #[test]
    fn freshly_translated_exit_block_is_well_formed() {
        let mut f = Function::new("f".into(), vec![], vec![ValueType::I32]);
        let c = f.push_instruction(f.entry, Instruction::Constant(ConstValue::I32(1)));
        f.add_edge(f.entry, f.exit);
        let phi = f.push_instruction(f.exit, Instruction::Phi { ty: ValueType::I32, incoming: vec![] });
        f.add_phi_candidate(phi, f.entry, c);
        f.set_terminator(f.entry, Terminator::Unconditional(f.exit));
        f.set_terminator(f.exit, Terminator::Return(vec![phi]));

        assert!(check(&f).is_ok());
    }

    #[test]
    fn phi_with_too_few_candidates_is_rejected() {
        let mut f = Function::new("f".into(), vec![], vec![ValueType::I32]);
        let other_pred = f.add_block();
        let c = f.push_instruction(f.entry, Instruction::Constant(ConstValue::I32(1)));
        f.add_edge(f.entry, f.exit);
        f.add_edge(other_pred, f.exit);
        let phi = f.push_instruction(f.exit, Instruction::Phi { ty: ValueType::I32, incoming: vec![] });
        f.add_phi_candidate(phi, f.entry, c);
        f.set_terminator(f.entry, Terminator::Unconditional(f.exit));
        f.set_terminator(other_pred, Terminator::Unconditional(f.exit));
        f.set_terminator(f.exit, Terminator::Return(vec![phi]));

        assert!(matches!(check(&f), Err(WellFormedError::PhiArityMismatch { .. })));
    }
}
