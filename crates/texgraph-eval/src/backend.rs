//! Backend dispatch contract.
//!
//! One registered [`Backend`] per [`BackendKind`]; a stage's evaluation mask
//! selects which of them run. Every backend sees the same request shape and
//! writes into the stage's [`StageOutput`], so the walk does not care whether
//! pixels came from a shader, a native kernel, or a script host.

use std::sync::{Arc, Mutex};

use texgraph_core::EngineError;
use texgraph_image::{Image, PixelFormat};

use crate::{
    jobs::{JobStatus, JobSystem},
    stage::{InputSampler, Mouse, StageOutput},
    store::TextureStore,
    BlendFactor, MAX_INPUTS,
};

/// Execution strategies a stage can select via its evaluation mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BackendKind {
    Native,
    Glsl,
    Script,
    GlslCompute,
}

impl BackendKind {
    /// Dispatch order when a stage combines backends: native preprocessing
    /// first, then compute, then fragment, then script.
    pub const DISPATCH_ORDER: [BackendKind; 4] = [
        BackendKind::Native,
        BackendKind::GlslCompute,
        BackendKind::Glsl,
        BackendKind::Script,
    ];
}

/// One resolved input: the producing stage's current output.
#[derive(Debug, Clone, Copy)]
pub struct InputRef<'a> {
    pub tex: Option<crate::store::TexId>,
    pub image: &'a Image,
}

/// Everything a backend needs to evaluate one stage.
#[derive(Debug)]
pub struct EvalRequest<'a> {
    pub node_type: usize,
    /// Generated call expression; identical strings across walks must
    /// short-circuit recompilation inside the backend.
    pub call: &'a str,
    pub parameters: &'a [u8],
    pub inputs: [Option<InputRef<'a>>; MAX_INPUTS],
    pub samplers: &'a [InputSampler; MAX_INPUTS],
    pub blend: (BlendFactor, BlendFactor),
    pub depth_buffer: bool,
    pub width: u32,
    pub height: u32,
    pub cube: bool,
    pub local_time: i32,
    pub mouse: Mouse,
}

/// Shared services handed to a backend per dispatch.
pub struct EvalCtx<'a> {
    pub store: &'a mut dyn TextureStore,
    pub jobs: &'a JobSystem,
}

impl std::fmt::Debug for EvalCtx<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvalCtx").finish_non_exhaustive()
    }
}

/// An image still being produced on the background worker.
#[derive(Debug)]
pub struct PendingImage {
    pub(crate) status: JobStatus,
    pub(crate) slot: Arc<Mutex<Option<Image>>>,
}

impl PendingImage {
    /// Pairs the status of a submitted job with the slot that job writes its
    /// result into.
    pub fn new(status: JobStatus, slot: Arc<Mutex<Option<Image>>>) -> Self {
        Self { status, slot }
    }

    /// Blocks until the producing job finished, then takes the image.
    pub fn wait(self, jobs: &JobSystem) -> Option<Image> {
        jobs.drain_main();
        self.status.wait();
        self.slot.lock().ok().and_then(|mut s| s.take())
    }
}

/// Result of one backend dispatch.
#[derive(Debug)]
pub enum BackendRun {
    /// The stage's output was fully written before returning.
    Done,
    /// Work continues on the background worker; the orchestrator blocks on
    /// this at the stage boundary before any downstream stage runs.
    Pending(PendingImage),
}

pub trait Backend {
    /// Evaluates one stage, writing into `out` (CPU image mirror and/or GPU
    /// texture via `ctx.store`). Unconnected input slots are `None` and must
    /// be skipped.
    fn evaluate(
        &mut self,
        ctx: &mut EvalCtx<'_>,
        req: &EvalRequest<'_>,
        out: &mut StageOutput,
    ) -> Result<BackendRun, EngineError>;
}

/// Pixel signature of the error-indicator render (magenta).
pub const ERROR_PIXEL: [u8; 4] = [255, 0, 255, 255];

/// The designated error-indicator image: a magenta/black 8-pixel checker.
///
/// A failing stage publishes this instead of tearing down the walk, so
/// downstream stages still receive a well-formed input.
pub fn error_image(width: u32, height: u32) -> Image {
    let mut img = Image::new(width.max(1), height.max(1), PixelFormat::Rgba8);
    let w = img.width() as usize;
    for (i, px) in img.bytes_mut().chunks_exact_mut(4).enumerate() {
        let (x, y) = (i % w, i / w);
        if ((x / 8) + (y / 8)) % 2 == 0 {
            px.copy_from_slice(&ERROR_PIXEL);
        } else {
            px.copy_from_slice(&[0, 0, 0, 255]);
        }
    }
    img
}
