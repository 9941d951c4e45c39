//! The native backend lowering contract: the fixed instance layout and
//! instruction map a codegen library consumes to emit machine code from
//! MIR.

pub mod contract;
pub mod lower;
pub mod signature;

pub use lower::{lower_module, LoweredModule, NativeCodegenBackend, NullBackend};
