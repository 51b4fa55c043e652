//! Ambient configuration for the compiler and VM.
//!
//! There is no project manifest or config file — the language has no
//! module/import system, so there is nothing to point a config file at —
//! but the knobs the spec documents as having defaults (stack capacity,
//! frame capacity, GC growth factor, GC-stress mode) are gathered into
//! small `Default`-able structs rather than scattered constants, the way
//! the teacher's `atlas-runtime::api::config` gathers runtime knobs.

/// VM-side tunables.
#[derive(Debug, Clone, Copy)]
pub struct VmConfig {
    /// Value-stack capacity. Spec default: 64 * 256 slots.
    pub stack_capacity: usize,
    /// Call-frame capacity; also the recursion depth limit.
    pub frame_capacity: usize,
    /// Initial GC watermark, in bytes, before the first collection can run.
    pub initial_gc_threshold: usize,
    /// Multiplier applied to `bytes_allocated` after each collection to
    /// compute the next watermark.
    pub gc_growth_factor: usize,
    /// When `true`, every allocation runs a full GC cycle regardless of
    /// the watermark (used by the stress-test harness to validate that
    /// program output is unaffected by collection timing).
    pub gc_stress: bool,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            stack_capacity: 64 * 256,
            frame_capacity: 64,
            initial_gc_threshold: 1024 * 1024,
            gc_growth_factor: 2,
            gc_stress: false,
        }
    }
}

/// Compiler-side tunables. Presently just the optional optimizer toggle
/// slot — kept as its own struct, in the teacher's style, so compiler
/// knobs don't have to be threaded through [`VmConfig`].
#[derive(Debug, Clone, Copy, Default)]
pub struct CompilerConfig {
    /// Reserved for future constant-folding/peephole passes; this core
    /// emits bytecode directly with no optimization pipeline (see
    /// Non-goals: no ahead-of-time optimization passes).
    pub optimize: bool,
}
