#![forbid(unsafe_code)]

//! texgraph evaluation engine.
//!
//! [`Evaluation`] owns the stage collection and walks an externally supplied
//! evaluation order, dispatching each stage to the backend(s) selected by its
//! evaluation mask. Backends are registered behind the [`Backend`] trait keyed
//! by [`BackendKind`]; GPU resource lifetime goes through the [`TextureStore`]
//! seam so hosts (and tests) choose the implementation.
//!
//! This crate contains no GL code. The glow implementation of the store and
//! the GLSL backend live in `texgraph-runtime-glow`.
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(missing_debug_implementations)]

pub mod backend;
pub mod graph;
pub mod jobs;
pub mod native;
pub mod script;
pub mod stage;
pub mod store;

pub use backend::{error_image, Backend, BackendKind, BackendRun, EvalCtx, EvalRequest, ERROR_PIXEL};
pub use graph::Evaluation;
pub use jobs::{JobStatus, JobSystem};
pub use native::NativeBackend;
pub use script::{ScriptBackend, ScriptHost};
pub use stage::{EvaluationStage, FilterMode, InputSampler, Mouse, StageId, StageOutput, WrapMode};
pub use store::{CpuStore, TexId, TextureCache, TextureStore};

pub use texgraph_core::{EngineError, ExternalHandle};

/// Number of input slots every stage carries, regardless of node arity.
/// Unused slots are unconnected and skipped by every backend.
pub const MAX_INPUTS: usize = 8;

/// Output size a stage gets before any explicit resize.
pub const DEFAULT_TARGET_SIZE: u32 = 256;

/// Bitset selecting which backend(s) evaluate a stage.
///
/// Bits are not mutually exclusive: a stage may combine e.g. a compute pass
/// with a fragment-shader pass, or native preprocessing with a GLSL render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EvalMask(pub u32);

impl EvalMask {
    pub const NATIVE: EvalMask = EvalMask(1 << 0);
    pub const GLSL: EvalMask = EvalMask(1 << 1);
    pub const SCRIPT: EvalMask = EvalMask(1 << 2);
    pub const GLSL_COMPUTE: EvalMask = EvalMask(1 << 3);

    pub const fn empty() -> Self {
        EvalMask(0)
    }

    pub const fn contains(self, other: EvalMask) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn union(self, other: EvalMask) -> Self {
        EvalMask(self.0 | other.0)
    }
}

impl Default for EvalMask {
    fn default() -> Self {
        EvalMask::GLSL
    }
}

/// Blend factors applied when a stage's output is composited over its previous
/// contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendFactor {
    Zero,
    One,
    SrcColor,
    OneMinusSrcColor,
    DstColor,
    OneMinusDstColor,
    SrcAlpha,
    OneMinusSrcAlpha,
    DstAlpha,
    OneMinusDstAlpha,
    ConstantColor,
    OneMinusConstantColor,
    ConstantAlpha,
    OneMinusConstantAlpha,
    SrcAlphaSaturate,
}

impl BlendFactor {
    pub const COUNT: usize = 15;
}
