//! `SimplifyCFG`: prunes dead predecessor edges left behind by branch
//! lowering, collapses `Phi`s that no longer carry more than one
//! distinct value, and folds empty forwarding blocks into their successor.
//! Runs after translation and after any later pass that deletes edges.

use std::collections::HashSet;

use crate::entity::EntityRef;
use crate::mir::{Block, Function, Instruction, Referrer, Terminator, Value};

pub fn simplify(f: &mut Function) {
    prune_unreachable_preds(f);
    fold_forwarding_blocks(f);
    collapse_trivial_phis(f);
}

/// Drops predecessor-list and `Phi` incoming entries naming a block no
/// longer reachable from `entry` (e.g. a `br_table` arm whose edge a later
/// pass removed).
fn prune_unreachable_preds(f: &mut Function) {
    let reachable: HashSet<Block> = f.reachable_blocks().into_iter().collect();
    for block in f.blocks.iter() {
        let live_preds: Vec<Block> =
            f.blocks[block].preds.iter().copied().filter(|p| reachable.contains(p)).collect();
        f.blocks[block].preds = live_preds;

        for &value in f.blocks[block].insts.clone().iter() {
            if let Instruction::Phi { incoming, .. } = &mut f.values[value] {
                incoming.retain(|(from, _)| reachable.contains(from));
            }
        }
    }
}

/// Blocks with no instructions of their own and an unconditional jump are
/// pure forwarding: redirect every predecessor straight to the target and
/// drop the forwarder.
fn fold_forwarding_blocks(f: &mut Function) {
    loop {
        let candidates: Vec<(Block, Block)> = f
            .blocks
            .iter()
            .filter(|&b| b != f.entry && b != f.exit)
            .filter(|&b| f.blocks[b].insts.is_empty())
            .filter_map(|b| match f.blocks[b].terminator {
                Terminator::Unconditional(target) if target != b => Some((b, target)),
                _ => None,
            })
            .collect();
        if candidates.is_empty() {
            return;
        }
        for (dead, target) in candidates {
            if f.blocks[dead].insts.is_empty() {
                retarget_block(f, dead, target);
            }
        }
    }
}

fn retarget_block(f: &mut Function, dead: Block, target: Block) {
    let preds = f.blocks[dead].preds.clone();
    for &p in &preds {
        redirect_terminator(&mut f.blocks[p].terminator, dead, target);
        f.use_sites.remove_block_use(dead, Referrer::Terminator(p));
        f.use_sites.add_block_use(target, Referrer::Terminator(p));
    }
    f.use_sites.remove_block_use(target, Referrer::Terminator(dead));
    retarget_phi_sources(f, dead, target);

    f.blocks[target].preds.retain(|&p| p != dead);
    for &p in &preds {
        if !f.blocks[target].preds.contains(&p) {
            f.blocks[target].preds.push(p);
        }
    }
    f.blocks[dead].preds.clear();
    f.blocks[dead].terminator = Terminator::Unreachable;
}

/// Any downstream `Phi` naming `dead` as an incoming block now receives
/// control from whichever of `dead`'s former predecessors actually runs;
/// since `dead` held no instructions, the value flowing through is
/// unchanged, only its source block's name needs to move to `target`.
fn retarget_phi_sources(f: &mut Function, dead: Block, target: Block) {
    for block in f.blocks.iter() {
        for &value in f.blocks[block].insts.clone().iter() {
            if let Instruction::Phi { incoming, .. } = &mut f.values[value] {
                for pair in incoming.iter_mut() {
                    if pair.0 == dead {
                        pair.0 = target;
                    }
                }
            }
        }
    }
}

fn redirect_terminator(term: &mut Terminator, dead: Block, target: Block) {
    match term {
        Terminator::Unconditional(b) => {
            if *b == dead {
                *b = target;
            }
        }
        Terminator::Conditional { if_true, if_false, .. } => {
            if *if_true == dead {
                *if_true = target;
            }
            if *if_false == dead {
                *if_false = target;
            }
        }
        Terminator::Switch { targets, default, .. } => {
            for t in targets.iter_mut() {
                if *t == dead {
                    *t = target;
                }
            }
            if *default == dead {
                *default = target;
            }
        }
        Terminator::Unreachable | Terminator::Return(_) => {}
    }
}

/// Repeatedly replaces any `Phi` whose incoming set names at most one
/// distinct value (after dropping self-references) with that value, until
/// a fixpoint; loop headers with a single live predecessor collapse this
/// way once `prune_unreachable_preds` has removed their dead back edges.
fn collapse_trivial_phis(f: &mut Function) {
    loop {
        let mut replaced_any = false;
        let candidates: Vec<(Value, Value)> = f
            .blocks
            .iter()
            .flat_map(|b| f.blocks[b].insts.clone())
            .filter_map(|value| match &f.values[value] {
                Instruction::Phi { incoming, .. } => {
                    let mut distinct: Vec<Value> = Vec::new();
                    for &(_, v) in incoming {
                        if v != value && !distinct.contains(&v) {
                            distinct.push(v);
                        }
                    }
                    match distinct.len() {
                        0 => None,
                        1 => Some((value, distinct[0])),
                        _ => None,
                    }
                }
                _ => None,
            })
            .collect();

        for (old, new) in candidates {
            if old == new {
                continue;
            }
            replace_value(f, old, new);
            replaced_any = true;
        }

        if !replaced_any {
            return;
        }
    }
}

/// Rewrites every recorded use of `old` to read `new` instead, keeping the
/// use-site side table in sync with every definition it tracks.
fn replace_value(f: &mut Function, old: Value, new: Value) {
    let referrers: Vec<Referrer> = f.use_sites.value_use_sites(old).copied().collect();
    for referrer in referrers {
        match referrer {
            Referrer::Instruction(user) => {
                if user == old {
                    continue;
                }
                rewrite_instruction_operand(&mut f.values[user], old, new);
            }
            Referrer::Terminator(block) => {
                rewrite_terminator_operand(&mut f.blocks[block].terminator, old, new);
            }
        }
        f.use_sites.remove_value_use(old, referrer);
        f.use_sites.add_value_use(new, referrer);
    }
}

fn rewrite_instruction_operand(inst: &mut Instruction, old: Value, new: Value) {
    let replace = |v: &mut Value| {
        if *v == old {
            *v = new;
        }
    };
    match inst {
        Instruction::Constant(_)
        | Instruction::LocalGet(_)
        | Instruction::GlobalGet(_)
        | Instruction::MemorySize(_) => {}
        Instruction::Call { args, .. } => args.iter_mut().for_each(replace),
        Instruction::CallIndirect { index, args, .. } => {
            replace(index);
            args.iter_mut().for_each(replace);
        }
        Instruction::Select { cond, if_true, if_false } => {
            replace(cond);
            replace(if_true);
            replace(if_false);
        }
        Instruction::LocalSet(_, v) | Instruction::GlobalSet(_, v) => replace(v),
        Instruction::IntCompare { lhs, rhs, .. } => {
            replace(lhs);
            if let Some(rhs) = rhs {
                replace(rhs);
            }
        }
        Instruction::FloatCompare { lhs, rhs, .. } => {
            replace(lhs);
            replace(rhs);
        }
        Instruction::IntUnary { operand, .. } | Instruction::FloatUnary { operand, .. } => replace(operand),
        Instruction::IntBinary { lhs, rhs, .. } | Instruction::FloatBinary { lhs, rhs, .. } => {
            replace(lhs);
            replace(rhs);
        }
        Instruction::Load { addr, .. } => replace(addr),
        Instruction::Store { addr, value, .. } => {
            replace(addr);
            replace(value);
        }
        Instruction::MemoryGrow { delta, .. } => replace(delta),
        Instruction::MemoryGuard { addr, .. } => replace(addr),
        Instruction::Convert(_, v) | Instruction::SignExtend(_, v) | Instruction::Cast(_, v) => replace(v),
        Instruction::Pack(vs) => vs.iter_mut().for_each(replace),
        Instruction::Unpack { aggregate, .. } => replace(aggregate),
        Instruction::Phi { incoming, .. } => incoming.iter_mut().for_each(|(_, v)| replace(v)),
        Instruction::Splat { operand, .. } => replace(operand),
        Instruction::ExtractLane { operand, .. } => replace(operand),
        Instruction::InsertLane { vector, scalar, .. } => {
            replace(vector);
            replace(scalar);
        }
        Instruction::Shuffle { lhs, rhs, .. } => {
            replace(lhs);
            replace(rhs);
        }
        Instruction::SimdUnary { operand, .. } => replace(operand),
        Instruction::SimdBinary { lhs, rhs, .. } => {
            replace(lhs);
            replace(rhs);
        }
    }
}

fn rewrite_terminator_operand(term: &mut Terminator, old: Value, new: Value) {
    match term {
        Terminator::Unreachable | Terminator::Unconditional(_) => {}
        Terminator::Conditional { cond, .. } => {
            if *cond == old {
                *cond = new;
            }
        }
        Terminator::Switch { index, .. } => {
            if *index == old {
                *index = new;
            }
        }
        Terminator::Return(values) => {
            for v in values.iter_mut() {
                if *v == old {
                    *v = new;
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::bytecode::ValueType;
    use crate::mir::ConstValue;

    #[test]
    fn trivial_phi_with_one_distinct_incoming_collapses() {
        let mut f = Function::new("f".into(), vec![], vec![ValueType::I32]);
        let header = f.add_block();
        let c = f.push_instruction(f.entry, Instruction::Constant(ConstValue::I32(9)));
        f.add_edge(f.entry, header);
        f.set_terminator(f.entry, Terminator::Unconditional(header));

        let phi = f.push_instruction(header, Instruction::Phi { ty: ValueType::I32, incoming: vec![] });
        f.add_phi_candidate(phi, f.entry, c);
        f.add_phi_candidate(phi, header, phi);

        let using = f.push_instruction(header, Instruction::IntUnary {
            width: crate::bytecode::instr::IntWidth::I32,
            op: crate::bytecode::instr::IntUnaryOp::Clz,
            operand: phi,
        });
        f.add_edge(header, f.exit);
        let result_phi = f.push_instruction(f.exit, Instruction::Phi { ty: ValueType::I32, incoming: vec![] });
        f.add_phi_candidate(result_phi, header, using);
        f.set_terminator(header, Terminator::Unconditional(f.exit));

        simplify(&mut f);

        match &f.values[using] {
            Instruction::IntUnary { operand, .. } => assert_eq!(*operand, c),
            _ => panic!("expected the unary op to remain"),
        }
    }

    #[test]
    fn empty_forwarding_block_is_folded_away() {
        let mut f = Function::new("f".into(), vec![], vec![]);
        let forward = f.add_block();
        f.add_edge(f.entry, forward);
        f.set_terminator(f.entry, Terminator::Unconditional(forward));
        f.add_edge(forward, f.exit);
        f.set_terminator(forward, Terminator::Unconditional(f.exit));

        simplify(&mut f);

        assert!(matches!(f.blocks[f.entry].terminator, Terminator::Unconditional(b) if b == f.exit));
        assert!(f.blocks[f.exit].preds.contains(&f.entry));
    }
}
