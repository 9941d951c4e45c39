//! Structured, located errors for the front end and validator.
//!
//! Parse and validation failures are surfaced to the caller and stop the
//! pipeline: nothing here is recovered locally, and no partial MIR is
//! ever handed back on failure.

use thiserror::Error;

use crate::bytecode::{FuncIdx, GlobalIdx, LabelIdx, LocalIdx, MemIdx, TableIdx, TypeIdx};
use crate::bytecode::instr::Opcode;
use crate::validator::OperandStackElement;

/// Errors raised while walking the byte stream: bad magic/version, section
/// ordering, truncated reads, malformed LEB128, invalid UTF-8, and so on.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("read of {requested} byte(s) at offset {offset} crosses the section barrier")]
    BeyondBarrier { offset: usize, requested: usize },

    #[error("read of {requested} byte(s) at offset {offset} crosses the end of input")]
    BeyondEnd { offset: usize, requested: usize },

    #[error("LEB128 decoding at offset {offset} exceeded its maximum width")]
    Leb128Overflow { offset: usize },

    #[error("invalid UTF-8 in string at offset {offset}, first bad byte at in-string offset {bad_offset}")]
    InvalidUtf8 { offset: usize, bad_offset: usize },

    #[error("bad magic number at offset {offset}")]
    BadMagic { offset: usize },

    #[error("unsupported version at offset {offset}")]
    BadVersion { offset: usize },

    #[error("section id {id} out of range at offset {offset}")]
    SectionIdOutOfRange { offset: usize, id: u8 },

    #[error("section {next} at offset {offset} is out of order (previous section was {prev})")]
    SectionOutOfOrder { offset: usize, prev: u8, next: u8 },

    #[error("section at offset {offset} declared size {declared} but {actual} byte(s) were consumed")]
    SectionSizeMismatch {
        offset: usize,
        declared: usize,
        actual: usize,
    },

    #[error("invalid value type byte 0x{byte:02x} at offset {offset}")]
    InvalidValueType { offset: usize, byte: u8 },

    #[error("invalid limits tag 0x{byte:02x} at offset {offset}")]
    InvalidLimitsTag { offset: usize, byte: u8 },

    #[error("invalid import/export descriptor tag 0x{byte:02x} at offset {offset}")]
    InvalidDescriptorTag { offset: usize, byte: u8 },

    #[error("invalid mutability byte 0x{byte:02x} at offset {offset}")]
    InvalidMutability { offset: usize, byte: u8 },

    #[error("limits at offset {offset} have min {min} greater than max {max}")]
    InvalidLimits { offset: usize, min: u64, max: u64 },

    #[error("unknown opcode 0x{byte:02x} at offset {offset}")]
    UnknownOpcode { offset: usize, byte: u8 },

    #[error("unconsumed bytes in section id {section} at offset {offset}")]
    UnconsumedSectionBytes { offset: usize, section: u8 },

    #[error("unconsumed bytes in code entry #{index} at offset {offset}")]
    UnconsumedCodeBytes { offset: usize, index: u32 },

    #[error("custom section \"{name}\" handler failed at payload offset {offset}: {source}")]
    CustomSectionHandler {
        name: String,
        offset: usize,
        #[source]
        source: anyhow::Error,
    },
}

pub type ParseResult<T> = Result<T, ParseError>;

/// The malformed-module error kinds the validator can raise, plus `TypeMismatch`.
#[derive(Debug, Error)]
pub enum ValidationErrorKind {
    #[error("no enclosing function to return from")]
    MissingContextReturn,
    #[error("malformed function type")]
    MalformedFunctionType,
    #[error("malformed value type")]
    MalformedValueType,
    #[error("malformed memory type")]
    MalformedMemoryType,
    #[error("malformed table type")]
    MalformedTableType,
    #[error("type index {0:?} out of bounds")]
    TypeIndexOutOfBound(TypeIdx),
    #[error("label index {0:?} out of bounds")]
    LabelIndexOutOfBound(LabelIdx),
    #[error("function index {0:?} out of bounds")]
    FuncIndexOutOfBound(FuncIdx),
    #[error("table index {0:?} out of bounds")]
    TableIndexOutOfBound(TableIdx),
    #[error("memory index {0:?} out of bounds")]
    MemIndexOutOfBound(MemIdx),
    #[error("local index {0:?} out of bounds")]
    LocalIndexOutOfBound(LocalIdx),
    #[error("global index {0:?} out of bounds")]
    GlobalIndexOutOfBound(GlobalIdx),
    #[error("invalid branch table: target arities/types disagree with the default target")]
    InvalidBranchTable,
    #[error("alignment 2^{align} exceeds natural width of {width} byte(s)")]
    InvalidAlign { align: u32, width: u32 },
    #[error("global must be mutable to be the target of global.set")]
    GlobalMustBeMut,
    #[error("type mismatch: expecting {expecting:?}, found {actual:?} (epsilon={epsilon})")]
    TypeMismatch {
        expecting: Vec<OperandStackElement>,
        actual: Vec<OperandStackElement>,
        epsilon: bool,
    },
}

/// A validation failure, located by the enclosing module/function index
/// and the stack of structured instructions (block/loop/if) the failing
/// instruction is nested within.
#[derive(Debug, Error)]
#[error("validation error in function #{func_index}: {kind}")]
pub struct ValidationError {
    pub func_index: u32,
    pub enclosing_opcodes: Vec<Opcode>,
    #[source]
    pub kind: ValidationErrorKind,
}

pub type ValidationResult<T> = Result<T, ValidationError>;

/// Errors raised while lowering validated MIR to the native backend
/// contract. Reachable from an otherwise well-formed module (e.g. a
/// function whose signature carries a `v128`), so it is a `Result`
/// rather than a panic, unlike the MIR well-formedness assertions in
/// `passes::well_formed`.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("v128 has no character in the call_indirect signature alphabet")]
    SignatureTypeUnrepresentable,
}

pub type BackendResult<T> = Result<T, BackendError>;
