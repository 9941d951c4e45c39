//! Compiler-wide and per-translation options.

/// Toggles that trade the default safety guarantees for speed. Each
/// defaults to `false`: the translator emits the full guarded, unaligned-safe
/// lowering unless the embedder opts out.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TranslationOptions {
    /// Skip `MemoryGuard` bounds checks before loads/stores. Sound only when
    /// the embedder has independently proven every access in range.
    pub skip_mem_boundary_check: bool,
    /// Skip bounds checks on `call_indirect` table lookups.
    pub skip_tbl_boundary_check: bool,
    /// Assume every memory access is naturally aligned, permitting the
    /// backend to lower loads/stores without an alignment fixup path.
    pub assume_mem_rw_aligned: bool,
}

impl Default for TranslationOptions {
    fn default() -> Self {
        TranslationOptions {
            skip_mem_boundary_check: false,
            skip_tbl_boundary_check: false,
            assume_mem_rw_aligned: false,
        }
    }
}

/// Top-level driver options: translation toggles plus the stack-depth bound
/// under which the dominator pass (and any other recursive pass) switches
/// to a heap-allocated stack via `stacker::maybe_grow`.
#[derive(Clone, Copy, Debug)]
pub struct CompilerOptions {
    pub translation: TranslationOptions,
    /// Bytes of native stack headroom the dominator/CFG passes require
    /// before growing the stack via their `stacker::maybe_grow` call sites.
    pub trace_limit: usize,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        CompilerOptions {
            translation: TranslationOptions::default(),
            trace_limit: 32 * 1024,
        }
    }
}
