//! Bidirectional reference bookkeeping across the MIR graph: keeping
//! every value's definition and use sites symmetric under rewrites.
//!
//! Every MIR entity is addressed by a stable arena index rather than a
//! pointer, so a use-site set is just a side table keyed by that index:
//! `replace`/`detach` become plain rewrites of small vectors instead of
//! pointer surgery.

use fxhash::FxHashSet;

use crate::entity::{EntityRef, PerEntity};

use super::{Block, Value};

/// A non-owning referrer of a `Value` or `Block`: either another `Value`'s
/// instruction (by operand), or a block's terminator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Referrer {
    Instruction(Value),
    Terminator(Block),
}

#[derive(Clone, Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct UseSiteTracker {
    value_uses: PerEntity<Value, FxHashSet<Referrer>>,
    block_uses: PerEntity<Block, FxHashSet<Referrer>>,
}

impl UseSiteTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_value_use(&mut self, target: Value, referrer: Referrer) {
        if target.is_valid() {
            self.value_uses[target].insert(referrer);
        }
    }

    pub fn remove_value_use(&mut self, target: Value, referrer: Referrer) {
        if target.is_valid() {
            self.value_uses[target].remove(&referrer);
        }
    }

    pub fn add_block_use(&mut self, target: Block, referrer: Referrer) {
        if target.is_valid() {
            self.block_uses[target].insert(referrer);
        }
    }

    pub fn remove_block_use(&mut self, target: Block, referrer: Referrer) {
        if target.is_valid() {
            self.block_uses[target].remove(&referrer);
        }
    }

    pub fn value_use_sites(&self, target: Value) -> impl Iterator<Item = &Referrer> {
        self.value_uses[target].iter()
    }

    pub fn block_use_sites(&self, target: Block) -> impl Iterator<Item = &Referrer> {
        self.block_uses[target].iter()
    }
}
