//! Command-line driver: reads a `.wasm` module, runs it through parsing,
//! validation, translation to MIR, and the MIR-level passes, then either
//! reports success or prints the failure that stopped the pipeline.
//! Parse and validation errors are fatal; nothing partial is handed back.

use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

use structopt::StructOpt;

use sable::backend::{lower_module, NativeCodegenBackend, NullBackend};
use sable::{CompilerOptions, TranslationOptions};

#[derive(StructOpt)]
#[structopt(name = "sablec", about = "Ahead-of-time WebAssembly-to-native compiler")]
struct Opt {
    /// Input WebAssembly binary module.
    #[structopt(parse(from_os_str))]
    input: PathBuf,

    /// Skip memory bounds checks before loads and stores.
    #[structopt(long)]
    skip_mem_boundary_check: bool,

    /// Skip bounds checks on `call_indirect` table lookups.
    #[structopt(long)]
    skip_tbl_boundary_check: bool,

    /// Assume every memory access is naturally aligned.
    #[structopt(long)]
    assume_mem_rw_aligned: bool,

    /// Print the lowered native IR to stdout instead of discarding it.
    #[structopt(long)]
    dump_lowered: bool,
}

fn main() -> ExitCode {
    env_logger::init();
    let opt = Opt::from_args();

    match run(&opt) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("sablec: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(opt: &Opt) -> anyhow::Result<()> {
    let bytes = fs::read(&opt.input)?;

    let compiler_options = CompilerOptions {
        translation: TranslationOptions {
            skip_mem_boundary_check: opt.skip_mem_boundary_check,
            skip_tbl_boundary_check: opt.skip_tbl_boundary_check,
            assume_mem_rw_aligned: opt.assume_mem_rw_aligned,
        },
        ..CompilerOptions::default()
    };

    let mut parser_options = sable::parser::ParserOptions::default();
    let module = sable::compile_to_mir(&bytes, &mut parser_options, &compiler_options)?;

    log::info!(
        "translated {} function(s), {} memor(y/ies), {} table(s)",
        module.funcs.len(),
        module.memories.len(),
        module.tables.len()
    );

    let lowered = lower_module(&module, &compiler_options.translation)?;
    let backend = NullBackend;
    let emitted = backend.emit(&lowered)?;

    if opt.dump_lowered {
        println!("{lowered:#?}");
    }

    log::info!("emitted {} byte(s) from the null backend stub", emitted.len());
    Ok(())
}
