//! Dominator tree construction. The contract downstream passes rely on
//! is the tree shape, not the method used to build it; this implements
//! the Cooper/Harvey/Kennedy iterative dataflow algorithm over the
//! function's reverse postorder.

use crate::entity::{EntityRef, PerEntity};
use crate::mir::{Block, Function};

/// A function's dominator tree, plus a cached dominator-tree preorder
/// (used by `TypeInfer`, which must see defs before uses).
pub struct DominatorTree {
    idom: PerEntity<Block, Block>,
    children: PerEntity<Block, Vec<Block>>,
    preorder: Vec<Block>,
}

impl DominatorTree {
    pub fn immediate_dominator(&self, block: Block) -> Option<Block> {
        let idom = self.idom[block];
        if idom.is_valid() && idom != block {
            Some(idom)
        } else {
            None
        }
    }

    /// Whether `a` dominates `b` (every path from entry to `b` passes
    /// through `a`); a block trivially dominates itself.
    pub fn dominates(&self, a: Block, b: Block) -> bool {
        if a == b {
            return true;
        }
        let mut cur = b;
        loop {
            let idom = self.idom[cur];
            if !idom.is_valid() || idom == cur {
                return false;
            }
            if idom == a {
                return true;
            }
            cur = idom;
        }
    }

    pub fn dom_children(&self, block: Block) -> &[Block] {
        &self.children[block]
    }

    /// Basic blocks in dominator-tree preorder: entry first, and every
    /// block precedes every block it dominates.
    pub fn preorder(&self) -> &[Block] {
        &self.preorder
    }
}

pub fn compute(f: &Function) -> DominatorTree {
    let rpo = reverse_postorder(f);
    let mut rpo_number: PerEntity<Block, u32> = PerEntity::default();
    for (i, &b) in rpo.iter().enumerate() {
        rpo_number[b] = i as u32;
    }

    let mut idom: PerEntity<Block, Block> = PerEntity::default();
    idom[f.entry] = f.entry;

    let mut changed = true;
    while changed {
        changed = false;
        for &b in rpo.iter().skip(1) {
            let mut new_idom: Option<Block> = None;
            for &p in &f.blocks[b].preds {
                if p != f.entry && idom[p].is_invalid() {
                    continue;
                }
                new_idom = Some(match new_idom {
                    None => p,
                    Some(cur) => intersect(&idom, &rpo_number, cur, p),
                });
            }
            if let Some(new_idom) = new_idom {
                if idom[b] != new_idom {
                    idom[b] = new_idom;
                    changed = true;
                }
            }
        }
    }

    let mut children: PerEntity<Block, Vec<Block>> = PerEntity::default();
    for &b in &rpo {
        if b == f.entry {
            continue;
        }
        let p = idom[b];
        if p.is_valid() {
            children[p].push(b);
        }
    }

    let mut preorder = Vec::new();
    preorder_visit(f.entry, &children, &mut preorder);

    DominatorTree { idom, children, preorder }
}

fn reverse_postorder(f: &Function) -> Vec<Block> {
    let mut order = Vec::new();
    let mut visited = vec![false; f.blocks.len()];
    post_visit(f, f.entry, &mut visited, &mut order);
    order.reverse();
    order
}

fn post_visit(f: &Function, block: Block, visited: &mut Vec<bool>, order: &mut Vec<Block>) {
    stacker::maybe_grow(32 * 1024, 1024 * 1024, || {
        if visited[block.index()] {
            return;
        }
        visited[block.index()] = true;
        for succ in f.blocks[block].terminator.successors() {
            post_visit(f, succ, visited, order);
        }
        order.push(block);
    })
}

fn preorder_visit(block: Block, children: &PerEntity<Block, Vec<Block>>, out: &mut Vec<Block>) {
    stacker::maybe_grow(32 * 1024, 1024 * 1024, || {
        out.push(block);
        for &child in &children[block] {
            preorder_visit(child, children, out);
        }
    })
}

fn intersect(
    idom: &PerEntity<Block, Block>,
    rpo_number: &PerEntity<Block, u32>,
    mut a: Block,
    mut b: Block,
) -> Block {
    while a != b {
        while rpo_number[a] > rpo_number[b] {
            a = idom[a];
        }
        while rpo_number[b] > rpo_number[a] {
            b = idom[b];
        }
    }
    a
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::bytecode::ValueType;
    use crate::mir::{Instruction, Terminator};

    #[test]
    fn straight_line_function_dominates_linearly() {
        let mut f = Function::new("f".into(), vec![], vec![ValueType::I32]);
        let mid = f.add_block();
        f.add_edge(f.entry, mid);
        f.set_terminator(f.entry, Terminator::Unconditional(mid));
        f.add_edge(mid, f.exit);
        let v = f.push_instruction(mid, Instruction::Constant(crate::mir::ConstValue::I32(0)));
        let phi = f.push_instruction(f.exit, Instruction::Phi { ty: ValueType::I32, incoming: vec![] });
        f.add_phi_candidate(phi, mid, v);
        f.set_terminator(mid, Terminator::Unconditional(f.exit));

        let dom = compute(&f);
        assert!(dom.dominates(f.entry, mid));
        assert!(dom.dominates(mid, f.exit));
        assert!(!dom.dominates(f.exit, f.entry));
    }

    #[test]
    fn diamond_join_is_dominated_by_branch_point() {
        let mut f = Function::new("f".into(), vec![], vec![]);
        let then_block = f.add_block();
        let else_block = f.add_block();
        let join = f.add_block();
        let cond = f.push_instruction(f.entry, Instruction::Constant(crate::mir::ConstValue::I32(1)));
        f.add_edge(f.entry, then_block);
        f.add_edge(f.entry, else_block);
        f.set_terminator(
            f.entry,
            Terminator::Conditional { cond, if_true: then_block, if_false: else_block },
        );
        f.add_edge(then_block, join);
        f.set_terminator(then_block, Terminator::Unconditional(join));
        f.add_edge(else_block, join);
        f.set_terminator(else_block, Terminator::Unconditional(join));
        f.add_edge(join, f.exit);
        f.set_terminator(join, Terminator::Unconditional(f.exit));

        let dom = compute(&f);
        assert!(dom.dominates(f.entry, join));
        assert!(!dom.dominates(then_block, join));
        assert!(!dom.dominates(else_block, join));
        assert_eq!(dom.immediate_dominator(join), Some(f.entry));
    }
}
