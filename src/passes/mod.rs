//! MIR transformation and verification passes, run by `compile_to_mir`
//! once per function after translation.

pub mod dominator;
pub mod simplify_cfg;
pub mod type_infer;
pub mod well_formed;
