//! Evaluation stages and the generational arena that owns them.
//!
//! A stage is a passive record: it stores everything a backend needs but runs
//! nothing itself, except [`EvaluationStage::decode_image`] for video-backed
//! stages. The public graph API speaks dense indices; internally links are
//! generation-checked [`StageId`] handles, so deleting a stage never rewrites
//! another stage's stored links.

use texgraph_core::{EngineError, ExternalHandle};
use texgraph_image::Image;
use texgraph_input_video::VideoStream;

use crate::{store::TexId, BlendFactor, EvalMask, MAX_INPUTS};

/// Stable handle to a stage. Indices are reused; the generation catches stale
/// handles after reuse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StageId {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

/// Texture wrap mode for one input slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WrapMode {
    #[default]
    Repeat,
    ClampToEdge,
    MirroredRepeat,
}

/// Texture filter mode for one input slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterMode {
    #[default]
    Linear,
    Nearest,
}

/// Per-input sampling state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InputSampler {
    pub wrap_u: WrapMode,
    pub wrap_v: WrapMode,
    pub filter_min: FilterMode,
    pub filter_mag: FilterMode,
}

/// Interactive pointer state recorded against a stage.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Mouse {
    pub rx: f32,
    pub ry: f32,
    pub left_down: bool,
    pub right_down: bool,
}

/// A stage's materialized output: the GPU texture (when a GPU backend ran)
/// plus the CPU image mirror used for readback and caching.
#[derive(Debug, Clone, Default)]
pub struct StageOutput {
    pub tex: Option<TexId>,
    pub image: Image,
}

/// One node's executable record.
#[derive(Debug)]
pub struct EvaluationStage {
    pub node_type: usize,
    pub parameters: Vec<u8>,
    pub(crate) inputs: [Option<StageId>; MAX_INPUTS],
    pub samplers: [InputSampler; MAX_INPUTS],
    pub mask: EvalMask,
    pub blend_src: BlendFactor,
    pub blend_dst: BlendFactor,
    pub depth_buffer: bool,
    /// Frame index for animated sources.
    pub local_time: i32,
    pub mouse: Mouse,
    /// How many other stages currently reference this one as an input.
    pub use_count_by_others: u32,
    pub decoder: Option<VideoStream>,
    /// Externally-owned handles the engine forwards but never interprets.
    pub scene: Option<ExternalHandle>,
    pub renderer: Option<ExternalHandle>,
    /// Host-visible marker for in-flight async work on this stage.
    pub processing: bool,

    /// Output target dimensions (edge length for cube targets).
    pub target_width: u32,
    pub target_height: u32,
    pub target_is_cube: bool,

    /// Mandatory re-evaluation on the next walk, regardless of cache state.
    pub forced_dirty: bool,
    /// Call string of the last successful evaluation; the dirtiness-carrying
    /// artifact. `None` until the stage has been evaluated once.
    pub(crate) last_call: Option<String>,
}

impl EvaluationStage {
    pub fn new(node_type: usize, parameters: Vec<u8>) -> Self {
        Self {
            node_type,
            parameters,
            inputs: [None; MAX_INPUTS],
            samplers: [InputSampler::default(); MAX_INPUTS],
            mask: EvalMask::default(),
            blend_src: BlendFactor::One,
            blend_dst: BlendFactor::Zero,
            depth_buffer: false,
            local_time: 0,
            mouse: Mouse::default(),
            use_count_by_others: 0,
            decoder: None,
            scene: None,
            renderer: None,
            processing: false,
            target_width: crate::DEFAULT_TARGET_SIZE,
            target_height: crate::DEFAULT_TARGET_SIZE,
            target_is_cube: false,
            forced_dirty: true,
            last_call: None,
        }
    }

    /// Resets transient per-frame state (pointer, forced-dirty) without
    /// discarding configuration.
    pub fn clear_transient(&mut self) {
        self.mouse = Mouse::default();
        self.forced_dirty = false;
    }

    /// Decodes the frame at `local_time` from the attached video source.
    ///
    /// Only meaningful for stages with a decoder; the seek happens at most
    /// once per requested frame (the stream caches the current index).
    pub fn decode_image(&mut self) -> Result<Image, EngineError> {
        let local_time = self.local_time;
        let dec = self
            .decoder
            .as_mut()
            .ok_or_else(|| EngineError::other("decode_image: stage has no video decoder"))?;
        dec.seek_frame(local_time as i64)
            .map_err(|e| EngineError::Decode(e.to_string()))?;
        let frame = dec
            .decode_current()
            .map_err(|e| EngineError::Decode(e.to_string()))?;

        let mut img = Image::new(frame.width, frame.height, texgraph_image::PixelFormat::Rgba8);
        img.set_bytes(&frame.bytes)?;
        Ok(img)
    }

    /// Duration in frames: the decoder's frame count for video-backed stages,
    /// 1 otherwise.
    pub fn duration(&self) -> u32 {
        self.decoder.as_ref().map(|d| d.duration_frames()).unwrap_or(1)
    }
}

#[derive(Debug, Default)]
struct Slot {
    generation: u32,
    stage: Option<EvaluationStage>,
}

/// Slot-map of stages with free-list reuse. Removal is O(1) and invalidates
/// only the removed handle.
#[derive(Debug, Default)]
pub struct StageArena {
    slots: Vec<Slot>,
    free: Vec<u32>,
}

impl StageArena {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, stage: EvaluationStage) -> StageId {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.stage = Some(stage);
            StageId {
                index,
                generation: slot.generation,
            }
        } else {
            let index = self.slots.len() as u32;
            self.slots.push(Slot {
                generation: 0,
                stage: Some(stage),
            });
            StageId {
                index,
                generation: 0,
            }
        }
    }

    pub fn remove(&mut self, id: StageId) -> Option<EvaluationStage> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation || slot.stage.is_none() {
            return None;
        }
        let stage = slot.stage.take();
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        stage
    }

    pub fn get(&self, id: StageId) -> Option<&EvaluationStage> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.stage.as_ref()
    }

    pub fn get_mut(&mut self, id: StageId) -> Option<&mut EvaluationStage> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.stage.as_mut()
    }

    pub fn contains(&self, id: StageId) -> bool {
        self.get(id).is_some()
    }
}
