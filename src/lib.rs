//! `sable`: an ahead-of-time WebAssembly-to-native compiler front end, SSA
//! middle IR, and native backend lowering contract.
//!
//! The pipeline is `parser::parse_module` → `validator::validate_module` →
//! `translator::translate_module` → `passes::*` → `backend::lower_module`,
//! each stage documented in its own module.

pub mod backend;
pub mod bytecode;
pub mod config;
#[macro_use]
pub mod entity;
pub mod error;
pub mod mir;
pub mod parser;
pub mod passes;
pub mod reader;
pub mod runtime;
pub mod translator;
pub mod validator;

pub use config::{CompilerOptions, TranslationOptions};
pub use error::{ParseError, ParseResult, ValidationError, ValidationResult};

/// Runs the full pipeline over a binary module: parse, validate, translate,
/// then the standard pass sequence (type inference, CFG simplification,
/// well-formedness check). Does not invoke the native codegen backend; that
/// step is left to the embedder via `backend::lower_module`.
pub fn compile_to_mir(
    bytes: &[u8],
    parser_options: &mut parser::ParserOptions,
    compiler_options: &CompilerOptions,
) -> anyhow::Result<mir::Module> {
    let module = parser::parse_module(bytes, parser_options)?;
    validator::validate_module(&module)?;
    let mut mir_module = translator::translate_module(&module, &compiler_options.translation);

    let global_types: Vec<bytecode::ValueType> =
        mir_module.globals.values().map(|g| g.ty.value_type).collect();
    let func_signatures: Vec<passes::type_infer::Signature> = mir_module
        .funcs
        .values()
        .map(|decl| passes::type_infer::Signature {
            params: decl.params().to_vec(),
            results: decl.results().to_vec(),
        })
        .collect();

    mir_module.for_each_function_mut(|_, f| {
        passes::type_infer::infer_types(f, &global_types, &func_signatures);
        passes::simplify_cfg::simplify(f);
        if cfg!(debug_assertions) {
            passes::well_formed::check(f).expect("translator produced malformed MIR");
        }
    });

    Ok(mir_module)
}
