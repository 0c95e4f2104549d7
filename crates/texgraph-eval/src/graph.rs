//! Stage collection and the ordered evaluation walk.
//!
//! [`Evaluation`] is the engine's front door. Hosts address stages by dense
//! index; deleting a stage shifts every later index down by one, exactly like
//! removing an element from a list. Internally stages live in a generational
//! arena and inter-stage links are [`StageId`] handles, so a deletion is O(1)
//! on the links themselves: a link to a deleted stage simply resolves to
//! "unconnected" instead of being rewritten.
//!
//! The walk re-evaluates a stage when its generated call string differs from
//! the one recorded at its last successful evaluation, when it was explicitly
//! forced dirty, when it has no output yet, or when any of its inputs was
//! re-evaluated earlier in the same walk.

use std::collections::{HashMap, HashSet};

use tracing::warn;

use texgraph_core::{EngineError, ExternalHandle};
use texgraph_image::Image;
use texgraph_input_video::VideoStream;
use texgraph_nodes::{apply_pointer, call_string, node_desc, zeroed_params};

use crate::{
    backend::{error_image, Backend, BackendKind, BackendRun, EvalCtx, EvalRequest, InputRef},
    jobs::JobSystem,
    stage::{EvaluationStage, InputSampler, Mouse, StageId, StageOutput},
    store::{TexId, TextureCache, TextureStore},
    BlendFactor, EvalMask, MAX_INPUTS,
};

fn mask_bit(kind: BackendKind) -> EvalMask {
    match kind {
        BackendKind::Native => EvalMask::NATIVE,
        BackendKind::Glsl => EvalMask::GLSL,
        BackendKind::Script => EvalMask::SCRIPT,
        BackendKind::GlslCompute => EvalMask::GLSL_COMPUTE,
    }
}

/// The evaluation engine: stage storage, per-stage outputs, registered
/// backends, and the ordered walk.
pub struct Evaluation {
    arena: crate::stage::StageArena,
    /// Dense list defining the host-visible stage indices.
    stages: Vec<StageId>,
    /// Evaluation order as indices into `stages`, host-supplied.
    order: Vec<usize>,
    backends: HashMap<BackendKind, Box<dyn Backend>>,
    outputs: HashMap<StageId, StageOutput>,
    cache: TextureCache,
    jobs: JobSystem,
}

impl std::fmt::Debug for Evaluation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Evaluation")
            .field("stages", &self.stages.len())
            .field("order", &self.order)
            .field("backends", &self.backends.len())
            .finish_non_exhaustive()
    }
}

impl Default for Evaluation {
    fn default() -> Self {
        Self::new()
    }
}

impl Evaluation {
    pub fn new() -> Self {
        Self {
            arena: crate::stage::StageArena::new(),
            stages: Vec::new(),
            order: Vec::new(),
            backends: HashMap::new(),
            outputs: HashMap::new(),
            cache: TextureCache::new(),
            jobs: JobSystem::new(),
        }
    }

    /// Registers (or replaces) the backend handling `kind`.
    pub fn register_backend(&mut self, kind: BackendKind, backend: Box<dyn Backend>) {
        self.backends.insert(kind, backend);
    }

    pub fn jobs(&self) -> &JobSystem {
        &self.jobs
    }

    pub fn texture_cache(&mut self) -> &mut TextureCache {
        &mut self.cache
    }

    fn id_at(&self, index: usize) -> Result<StageId, EngineError> {
        self.stages
            .get(index)
            .copied()
            .ok_or(EngineError::StageOutOfRange {
                index,
                count: self.stages.len(),
            })
    }

    fn stage(&self, index: usize) -> Result<&EvaluationStage, EngineError> {
        let id = self.id_at(index)?;
        self.arena.get(id).ok_or(EngineError::StageOutOfRange {
            index,
            count: self.stages.len(),
        })
    }

    fn stage_mut(&mut self, index: usize) -> Result<&mut EvaluationStage, EngineError> {
        let id = self.id_at(index)?;
        let count = self.stages.len();
        self.arena
            .get_mut(id)
            .ok_or(EngineError::StageOutOfRange { index, count })
    }

    // ---- graph editing ------------------------------------------------

    /// Appends a stage of `node_type` with zeroed parameters; returns its
    /// index.
    pub fn add_evaluation(&mut self, node_type: usize) -> Result<usize, EngineError> {
        let params = zeroed_params(node_type)?;
        let id = self.arena.insert(EvaluationStage::new(node_type, params));
        self.stages.push(id);
        Ok(self.stages.len() - 1)
    }

    /// Deletes the stage at `target`. Every stage after it shifts down by one
    /// index; links other stages held to it now resolve as unconnected, and
    /// those consumers are forced dirty. Its GPU output is released.
    pub fn del_evaluation(
        &mut self,
        target: usize,
        store: &mut dyn TextureStore,
    ) -> Result<(), EngineError> {
        let id = self.id_at(target)?;

        // Producers feeding the deleted stage lose a consumer.
        let inputs = self.stage(target)?.inputs;
        for input in inputs.into_iter().flatten() {
            if let Some(producer) = self.arena.get_mut(input) {
                producer.use_count_by_others = producer.use_count_by_others.saturating_sub(1);
            }
        }

        // Consumers of the deleted stage keep their (now dead) link but must
        // re-evaluate with the slot unconnected.
        for &other in &self.stages {
            if other == id {
                continue;
            }
            if let Some(stage) = self.arena.get_mut(other) {
                if stage.inputs.iter().any(|i| *i == Some(id)) {
                    stage.forced_dirty = true;
                }
            }
        }

        if let Some(out) = self.outputs.remove(&id) {
            if let Some(tex) = out.tex {
                store.free(tex);
            }
        }
        self.arena.remove(id);
        self.stages.remove(target);

        // Remap the evaluation order around the removed index.
        self.order.retain(|&i| i != target);
        for i in &mut self.order {
            if *i > target {
                *i -= 1;
            }
        }
        Ok(())
    }

    /// Replaces the stage's parameter buffer. The size must match the node
    /// type's declared block size exactly.
    pub fn set_evaluation_parameters(
        &mut self,
        index: usize,
        parameters: &[u8],
    ) -> Result<(), EngineError> {
        let stage = self.stage_mut(index)?;
        let desc = node_desc(stage.node_type)?;
        if parameters.len() != desc.param_block_size() {
            return Err(EngineError::ParameterSizeMismatch {
                node_type: desc.name,
                expected: desc.param_block_size(),
                got: parameters.len(),
            });
        }
        stage.parameters.clear();
        stage.parameters.extend_from_slice(parameters);
        Ok(())
    }

    /// Connects `source`'s output into `target`'s input slot. Replacing an
    /// existing connection transfers the consumer count.
    pub fn add_evaluation_input(
        &mut self,
        target: usize,
        slot: usize,
        source: usize,
    ) -> Result<(), EngineError> {
        if slot >= MAX_INPUTS {
            return Err(EngineError::InputSlotOutOfRange { slot });
        }
        let source_id = self.id_at(source)?;
        let target_id = self.id_at(target)?;
        let previous = {
            let stage = self
                .arena
                .get_mut(target_id)
                .ok_or(EngineError::StageOutOfRange {
                    index: target,
                    count: self.stages.len(),
                })?;
            let previous = stage.inputs[slot].take();
            stage.inputs[slot] = Some(source_id);
            stage.forced_dirty = true;
            previous
        };
        if let Some(prev) = previous {
            if let Some(p) = self.arena.get_mut(prev) {
                p.use_count_by_others = p.use_count_by_others.saturating_sub(1);
            }
        }
        if let Some(src) = self.arena.get_mut(source_id) {
            src.use_count_by_others += 1;
        }
        Ok(())
    }

    /// Disconnects `target`'s input slot.
    pub fn del_evaluation_input(&mut self, target: usize, slot: usize) -> Result<(), EngineError> {
        if slot >= MAX_INPUTS {
            return Err(EngineError::InputSlotOutOfRange { slot });
        }
        let stage = self.stage_mut(target)?;
        let previous = stage.inputs[slot].take();
        stage.forced_dirty = true;
        if let Some(prev) = previous {
            if let Some(p) = self.arena.get_mut(prev) {
                p.use_count_by_others = p.use_count_by_others.saturating_sub(1);
            }
        }
        Ok(())
    }

    /// Replaces the evaluation order. Entries are indices into the dense
    /// stage list; every producer must appear before its consumers for the
    /// walk to be meaningful, which is the caller's contract.
    pub fn set_evaluation_order(&mut self, order: Vec<usize>) {
        self.order = order;
    }

    pub fn evaluation_order(&self) -> &[usize] {
        &self.order
    }

    // ---- per-stage state ----------------------------------------------

    pub fn set_evaluation_mask(&mut self, index: usize, mask: EvalMask) -> Result<(), EngineError> {
        let stage = self.stage_mut(index)?;
        stage.mask = mask;
        stage.forced_dirty = true;
        Ok(())
    }

    pub fn set_evaluation_sampler(
        &mut self,
        index: usize,
        slot: usize,
        sampler: InputSampler,
    ) -> Result<(), EngineError> {
        if slot >= MAX_INPUTS {
            return Err(EngineError::InputSlotOutOfRange { slot });
        }
        let stage = self.stage_mut(index)?;
        stage.samplers[slot] = sampler;
        stage.forced_dirty = true;
        Ok(())
    }

    /// Sets the stage's frame index. Video-backed stages become dirty when
    /// the frame actually changed; with `update_decoder` the attached decoder
    /// seeks synchronously instead of waiting for the next walk.
    pub fn set_stage_local_time(
        &mut self,
        index: usize,
        local_time: i32,
        update_decoder: bool,
    ) -> Result<(), EngineError> {
        let stage = self.stage_mut(index)?;
        if stage.local_time != local_time {
            stage.local_time = local_time;
            if stage.decoder.is_some() {
                stage.forced_dirty = true;
            }
        }
        if update_decoder {
            if let Some(dec) = stage.decoder.as_mut() {
                dec.seek_frame(local_time as i64)
                    .map_err(|e| EngineError::Decode(e.to_string()))?;
            }
        }
        Ok(())
    }

    /// Records pointer state against a stage. While the primary button is
    /// down, ranged parameters track the pointer position.
    pub fn set_mouse(
        &mut self,
        index: usize,
        rx: f32,
        ry: f32,
        left_down: bool,
        right_down: bool,
    ) -> Result<(), EngineError> {
        let stage = self.stage_mut(index)?;
        stage.mouse = Mouse {
            rx,
            ry,
            left_down,
            right_down,
        };
        if left_down {
            let node_type = stage.node_type;
            if apply_pointer(node_type, &mut stage.parameters, rx, ry)? {
                stage.forced_dirty = true;
            }
        }
        Ok(())
    }

    pub fn set_blending_mode(
        &mut self,
        index: usize,
        src: BlendFactor,
        dst: BlendFactor,
    ) -> Result<(), EngineError> {
        let stage = self.stage_mut(index)?;
        stage.blend_src = src;
        stage.blend_dst = dst;
        stage.forced_dirty = true;
        Ok(())
    }

    pub fn enable_depth_buffer(&mut self, index: usize, enable: bool) -> Result<(), EngineError> {
        let stage = self.stage_mut(index)?;
        if stage.depth_buffer != enable {
            stage.depth_buffer = enable;
            stage.forced_dirty = true;
        }
        Ok(())
    }

    /// Sets the stage's 2D output size. Takes effect (and reallocates the
    /// target) on the next walk.
    pub fn set_evaluation_size(
        &mut self,
        index: usize,
        width: u32,
        height: u32,
    ) -> Result<(), EngineError> {
        let stage = self.stage_mut(index)?;
        if (stage.target_width, stage.target_height) != (width, height) || stage.target_is_cube {
            stage.target_width = width;
            stage.target_height = height;
            stage.target_is_cube = false;
            stage.forced_dirty = true;
        }
        Ok(())
    }

    /// Switches the stage to a cube target with the given edge length.
    pub fn set_evaluation_cube_size(&mut self, index: usize, size: u32) -> Result<(), EngineError> {
        let stage = self.stage_mut(index)?;
        if (stage.target_width, stage.target_is_cube) != (size, true) {
            stage.target_width = size;
            stage.target_height = size;
            stage.target_is_cube = true;
            stage.forced_dirty = true;
        }
        Ok(())
    }

    pub fn attach_decoder(&mut self, index: usize, decoder: VideoStream) -> Result<(), EngineError> {
        let stage = self.stage_mut(index)?;
        stage.decoder = Some(decoder);
        stage.forced_dirty = true;
        Ok(())
    }

    pub fn set_scene(&mut self, index: usize, scene: Option<ExternalHandle>) -> Result<(), EngineError> {
        self.stage_mut(index)?.scene = scene;
        Ok(())
    }

    pub fn scene(&self, index: usize) -> Result<Option<ExternalHandle>, EngineError> {
        Ok(self.stage(index)?.scene)
    }

    pub fn set_renderer(
        &mut self,
        index: usize,
        renderer: Option<ExternalHandle>,
    ) -> Result<(), EngineError> {
        self.stage_mut(index)?.renderer = renderer;
        Ok(())
    }

    pub fn renderer(&self, index: usize) -> Result<Option<ExternalHandle>, EngineError> {
        Ok(self.stage(index)?.renderer)
    }

    /// Marks/unmarks host-visible async work in flight on a stage.
    pub fn set_processing(&mut self, index: usize, processing: bool) -> Result<(), EngineError> {
        self.stage_mut(index)?.processing = processing;
        Ok(())
    }

    pub fn is_processing(&self, index: usize) -> Result<bool, EngineError> {
        Ok(self.stage(index)?.processing)
    }

    /// Resets the stage's transient per-frame state (pointer, forced-dirty)
    /// without touching its configuration or parameters.
    pub fn clear_stage_transient(&mut self, index: usize) -> Result<(), EngineError> {
        self.stage_mut(index)?.clear_transient();
        Ok(())
    }

    // ---- queries -------------------------------------------------------

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    pub fn stage_type(&self, index: usize) -> Result<usize, EngineError> {
        Ok(self.stage(index)?.node_type)
    }

    pub fn stage_parameters(&self, index: usize) -> Result<&[u8], EngineError> {
        Ok(&self.stage(index)?.parameters)
    }

    pub fn use_count(&self, index: usize) -> Result<u32, EngineError> {
        Ok(self.stage(index)?.use_count_by_others)
    }

    /// Duration in frames (1 for non-animated stages).
    pub fn evaluation_duration(&self, index: usize) -> Result<u32, EngineError> {
        Ok(self.stage(index)?.duration())
    }

    /// The stage's current input connections as dense indices, -1 for
    /// unconnected slots (including links to since-deleted stages).
    pub fn stage_inputs(&self, index: usize) -> Result<[i32; MAX_INPUTS], EngineError> {
        let stage = self.stage(index)?;
        let mut out = [-1i32; MAX_INPUTS];
        for (slot, link) in stage.inputs.iter().enumerate() {
            if let Some(id) = link {
                if let Some(pos) = self.stages.iter().position(|s| s == id) {
                    out[slot] = pos as i32;
                }
            }
        }
        Ok(out)
    }

    /// The stage's GPU output texture, if a walk has produced one.
    pub fn output_texture(&self, index: usize) -> Result<Option<TexId>, EngineError> {
        let id = self.id_at(index)?;
        Ok(self.outputs.get(&id).and_then(|o| o.tex))
    }

    /// Reads the stage's current output. Prefers a GPU readback when a
    /// texture exists, falling back to the CPU mirror.
    pub fn get_evaluation_image(
        &self,
        index: usize,
        store: &dyn TextureStore,
    ) -> Result<Image, EngineError> {
        let id = self.id_at(index)?;
        let out = self
            .outputs
            .get(&id)
            .ok_or_else(|| EngineError::other(format!("stage {index} has no output yet")))?;
        match out.tex {
            Some(tex) => store.readback(tex),
            None => Ok(out.image.clone()),
        }
    }

    /// Replaces the stage's output with host-provided pixels, allocating the
    /// GPU target on demand (cube images get cube targets).
    pub fn set_evaluation_image(
        &mut self,
        index: usize,
        image: &Image,
        store: &mut dyn TextureStore,
    ) -> Result<(), EngineError> {
        let id = self.id_at(index)?;
        let mut out = self.outputs.remove(&id).unwrap_or_default();
        if out.tex.is_none() {
            let tex = if image.is_cube() {
                store.alloc_cube(image.width(), image.format())?
            } else {
                store.alloc_2d(image.width(), image.height(), image.format(), false)?
            };
            out.tex = Some(tex);
        }
        if let Some(tex) = out.tex {
            store.upload(tex, image, None)?;
        }
        out.image = image.clone();
        self.outputs.insert(id, out);

        let stage = self.stage_mut(index)?;
        stage.target_width = image.width();
        stage.target_height = image.height();
        stage.target_is_cube = image.is_cube();
        Ok(())
    }

    /// Replaces one face of the stage's cube output with host-provided
    /// pixels. The target (and the CPU mirror) become a cube of the face's
    /// edge length on first use; an existing 2D or mismatched target is
    /// released and reallocated.
    pub fn set_evaluation_image_cube(
        &mut self,
        index: usize,
        image: &Image,
        face: u8,
        store: &mut dyn TextureStore,
    ) -> Result<(), EngineError> {
        if face >= 6 {
            return Err(EngineError::other(format!("cube face {face} out of range")));
        }
        if image.is_cube() {
            return Err(EngineError::other(
                "set_evaluation_image_cube takes a single face, not a cube image",
            ));
        }
        let id = self.id_at(index)?;
        let mut out = self.outputs.remove(&id).unwrap_or_default();
        if let Some(tex) = out.tex {
            match store.describe(tex) {
                Some((edge, _, true)) if edge == image.width() => {}
                _ => {
                    store.free(tex);
                    out.tex = None;
                }
            }
        }
        if out.tex.is_none() {
            out.tex = Some(store.alloc_cube(image.width(), image.format())?);
        }
        if let Some(tex) = out.tex {
            store.upload(tex, image, Some(face))?;
        }
        if !out.image.is_cube()
            || out.image.width() != image.width()
            || out.image.format() != image.format()
        {
            out.image = Image::with_layout(image.width(), image.width(), image.format(), 1, 6);
        }
        let off = out.image.face_mip_offset(face, 0);
        let len = image.bytes().len();
        out.image.bytes_mut()[off..off + len].copy_from_slice(image.bytes());
        self.outputs.insert(id, out);

        let stage = self.stage_mut(index)?;
        stage.target_width = image.width();
        stage.target_height = image.width();
        stage.target_is_cube = true;
        Ok(())
    }

    /// Releases every stage, output and cached resource.
    pub fn clear(&mut self, store: &mut dyn TextureStore) {
        for (_, out) in self.outputs.drain() {
            if let Some(tex) = out.tex {
                store.free(tex);
            }
        }
        while let Some(id) = self.stages.pop() {
            self.arena.remove(id);
        }
        self.cache.clear(store);
        self.order.clear();
    }

    // ---- the walk ------------------------------------------------------

    /// Walks the evaluation order once, re-evaluating exactly the dirty
    /// stages. Backend failures produce the error-indicator image for that
    /// stage and the walk continues; main-pinned jobs are drained at every
    /// stage boundary.
    pub fn evaluate_all(&mut self, store: &mut dyn TextureStore) -> Result<(), EngineError> {
        let mut evaluated: HashSet<StageId> = HashSet::new();

        for oi in 0..self.order.len() {
            let entry = self.order[oi];
            if entry >= self.stages.len() {
                debug_assert!(false, "stale evaluation-order entry {entry}");
                warn!(entry, stages = self.stages.len(), "skipping stale evaluation-order entry");
                continue;
            }
            let id = self.stages[entry];

            let (call, dirty, target_size) = {
                let stage = match self.arena.get(id) {
                    Some(s) => s,
                    None => {
                        warn!(entry, "skipping order entry for a dead stage");
                        continue;
                    }
                };
                let call = call_string(stage.node_type, &stage.parameters)?;
                let inputs_dirty = stage
                    .inputs
                    .iter()
                    .flatten()
                    .any(|i| evaluated.contains(i));
                let out = self.outputs.get(&id);
                let dirty = stage.forced_dirty
                    || inputs_dirty
                    || out.is_none()
                    || stage.last_call.as_deref() != Some(call.as_str());
                let target_size = (stage.target_width.max(1), stage.target_height.max(1));
                (call, dirty, target_size)
            };
            if !dirty {
                continue;
            }

            let mut failed = false;

            // Video-backed stages refresh their CPU frame before dispatch so
            // backends see current pixels. A decode failure degrades this
            // stage only.
            let decoded = {
                let stage = self.arena.get_mut(id).ok_or(EngineError::StageOutOfRange {
                    index: entry,
                    count: self.stages.len(),
                })?;
                if stage.decoder.is_some() {
                    match stage.decode_image() {
                        Ok(frame) => Some(frame),
                        Err(err) => {
                            warn!(entry, %err, "video decode failed");
                            failed = true;
                            None
                        }
                    }
                } else {
                    None
                }
            };

            let mut out = self.outputs.remove(&id).unwrap_or_default();
            if let Some(frame) = decoded {
                out.image = frame;
            }

            {
                let stage = self.arena.get(id).ok_or(EngineError::StageOutOfRange {
                    index: entry,
                    count: self.stages.len(),
                })?;
                if !failed {
                    if let Err(err) = ensure_target(store, stage, &mut out) {
                        warn!(entry, %err, "render target allocation failed");
                        failed = true;
                    }
                }

                let mut inputs: [Option<InputRef<'_>>; MAX_INPUTS] = [None; MAX_INPUTS];
                for (slot, link) in stage.inputs.iter().enumerate() {
                    if let Some(src) = link {
                        if let Some(src_out) = self.outputs.get(src) {
                            inputs[slot] = Some(InputRef {
                                tex: src_out.tex,
                                image: &src_out.image,
                            });
                        }
                    }
                }
                let req = EvalRequest {
                    node_type: stage.node_type,
                    call: &call,
                    parameters: &stage.parameters,
                    inputs,
                    samplers: &stage.samplers,
                    blend: (stage.blend_src, stage.blend_dst),
                    depth_buffer: stage.depth_buffer,
                    width: stage.target_width,
                    height: stage.target_height,
                    cube: stage.target_is_cube,
                    local_time: stage.local_time,
                    mouse: stage.mouse,
                };

                for kind in BackendKind::DISPATCH_ORDER {
                    if failed || !stage.mask.contains(mask_bit(kind)) {
                        continue;
                    }
                    let backend = match self.backends.get_mut(&kind) {
                        Some(b) => b,
                        None => {
                            warn!(?kind, node = stage.node_type, "no backend registered");
                            continue;
                        }
                    };
                    let mut ctx = EvalCtx {
                        store: &mut *store,
                        jobs: &self.jobs,
                    };
                    match backend.evaluate(&mut ctx, &req, &mut out) {
                        Ok(BackendRun::Done) => {}
                        Ok(BackendRun::Pending(pending)) => {
                            // Suspension point: nothing downstream runs until
                            // the background result landed.
                            match pending.wait(&self.jobs) {
                                Some(img) => {
                                    if let Some(tex) = out.tex {
                                        if let Err(err) = store.upload(tex, &img, None) {
                                            warn!(entry, %err, "background result upload failed");
                                            failed = true;
                                        }
                                    }
                                    out.image = img;
                                }
                                None => failed = true,
                            }
                        }
                        Err(err) => {
                            warn!(?kind, node = stage.node_type, %err, "stage evaluation failed");
                            failed = true;
                        }
                    }
                }
            }

            if failed {
                let img = error_image(target_size.0, target_size.1);
                if let Some(tex) = out.tex {
                    if let Err(err) = store.upload(tex, &img, None) {
                        warn!(entry, %err, "error indicator upload failed");
                    }
                }
                out.image = img;
            }
            self.outputs.insert(id, out);

            {
                let stage = self.arena.get_mut(id).ok_or(EngineError::StageOutOfRange {
                    index: entry,
                    count: self.stages.len(),
                })?;
                // A failed stage carries no cache key, so it retries on the
                // next walk.
                stage.last_call = if failed { None } else { Some(call) };
                stage.forced_dirty = false;
            }

            evaluated.insert(id);
            self.jobs.drain_main();
        }
        Ok(())
    }
}

/// Allocates or resizes the stage's render target to its declared dimensions.
///
/// 2D and cube setups are distinct: a same-topology size change resizes in
/// place, a topology change releases the texture and allocates the other
/// kind. Dimensions come from the store's metadata query, never a readback.
fn ensure_target(
    store: &mut dyn TextureStore,
    stage: &EvaluationStage,
    out: &mut StageOutput,
) -> Result<(), EngineError> {
    let (w, h) = (stage.target_width.max(1), stage.target_height.max(1));
    if let Some(tex) = out.tex {
        match store.describe(tex) {
            Some((cw, ch, cube)) if cube == stage.target_is_cube => {
                if (cw, ch) != (w, h) {
                    store.resize(tex, w, h)?;
                }
                return Ok(());
            }
            Some(_) => {
                store.free(tex);
                out.tex = None;
            }
            None => {
                out.tex = None;
            }
        }
    }
    let tex = if stage.target_is_cube {
        store.alloc_cube(w, texgraph_image::PixelFormat::Rgba8)?
    } else {
        store.alloc_2d(w, h, texgraph_image::PixelFormat::Rgba8, stage.depth_buffer)?
    };
    out.tex = Some(tex);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        backend::ERROR_PIXEL, native::NativeBackend, store::CpuStore, EvalMask,
    };
    use std::sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    };
    use texgraph_image::PixelFormat;
    use texgraph_nodes::find_node_type;

    fn native_graph() -> (Evaluation, CpuStore) {
        let mut eval = Evaluation::new();
        eval.register_backend(BackendKind::Native, Box::new(NativeBackend::new()));
        (eval, CpuStore::new())
    }

    fn add_native(eval: &mut Evaluation, name: &str) -> usize {
        let ty = find_node_type(name).unwrap();
        let index = eval.add_evaluation(ty).unwrap();
        eval.set_evaluation_mask(index, EvalMask::NATIVE).unwrap();
        index
    }

    /// Counts dispatches and fills the output with a constant.
    struct CountingBackend {
        calls: Arc<AtomicU32>,
        fail: bool,
    }

    impl Backend for CountingBackend {
        fn evaluate(
            &mut self,
            _ctx: &mut EvalCtx<'_>,
            req: &EvalRequest<'_>,
            out: &mut StageOutput,
        ) -> Result<BackendRun, EngineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(EngineError::FragmentCompile("boom".into()));
            }
            let mut img = Image::new(req.width, req.height, PixelFormat::Rgba8);
            img.bytes_mut().fill(10);
            out.image = img;
            Ok(BackendRun::Done)
        }
    }

    #[test]
    fn delete_renumbers_following_stages() {
        let (mut eval, mut store) = native_graph();
        let a = add_native(&mut eval, "Circle");
        let b = add_native(&mut eval, "Transform");
        let c = add_native(&mut eval, "Invert");
        eval.add_evaluation_input(b, 0, a).unwrap();
        eval.add_evaluation_input(c, 0, b).unwrap();

        eval.del_evaluation(a, &mut store).unwrap();
        assert_eq!(eval.stage_count(), 2);
        // Transform is now index 0, its first input is unconnected.
        assert_eq!(eval.stage_type(0).unwrap(), find_node_type("Transform").unwrap());
        assert_eq!(eval.stage_inputs(0).unwrap()[0], -1);
        // Invert is now index 1 and still points at Transform (index 0).
        assert_eq!(eval.stage_inputs(1).unwrap()[0], 0);
    }

    #[test]
    fn delete_remaps_evaluation_order() {
        let (mut eval, mut store) = native_graph();
        let a = add_native(&mut eval, "Circle");
        let b = add_native(&mut eval, "Transform");
        let c = add_native(&mut eval, "Invert");
        eval.set_evaluation_order(vec![a, b, c]);

        eval.del_evaluation(b, &mut store).unwrap();
        assert_eq!(eval.evaluation_order(), &[0, 1]);
    }

    #[test]
    fn cube_switch_reallocates_the_target_topology() {
        let (mut eval, mut store) = native_graph();
        let a = add_native(&mut eval, "Circle");
        eval.set_evaluation_order(vec![a]);
        eval.set_evaluation_size(a, 32, 32).unwrap();
        eval.evaluate_all(&mut store).unwrap();
        let tex = eval.output_texture(a).unwrap().unwrap();
        assert_eq!(store.describe(tex), Some((32, 32, false)));

        eval.set_evaluation_cube_size(a, 16).unwrap();
        eval.evaluate_all(&mut store).unwrap();
        let tex = eval.output_texture(a).unwrap().unwrap();
        assert_eq!(store.describe(tex), Some((16, 16, true)));

        eval.set_evaluation_size(a, 8, 8).unwrap();
        eval.evaluate_all(&mut store).unwrap();
        let tex = eval.output_texture(a).unwrap().unwrap();
        assert_eq!(store.describe(tex), Some((8, 8, false)));
        // Each switch released the old target.
        assert_eq!(
            store.allocated_total() - store.freed_total(),
            store.live_count() as u64
        );
    }

    #[test]
    fn host_can_inject_individual_cube_faces() {
        let (mut eval, mut store) = native_graph();
        let a = add_native(&mut eval, "Checker");
        for face in 0..6u8 {
            let mut img = Image::new(4, 4, PixelFormat::Rgba8);
            img.bytes_mut().fill(face * 10 + 1);
            eval.set_evaluation_image_cube(a, &img, face, &mut store)
                .unwrap();
        }
        let tex = eval.output_texture(a).unwrap().unwrap();
        assert_eq!(store.describe(tex), Some((4, 4, true)));
        let all = store.readback(tex).unwrap();
        assert!(all.is_cube());
        for face in 0..6u8 {
            let off = all.face_mip_offset(face, 0);
            assert!(all.bytes()[off..off + 64].iter().all(|&b| b == face * 10 + 1));
        }

        let img = Image::new(4, 4, PixelFormat::Rgba8);
        assert!(eval
            .set_evaluation_image_cube(a, &img, 6, &mut store)
            .is_err());
    }

    #[test]
    fn clearing_transient_state_cancels_a_forced_walk() {
        let (mut eval, mut store) = native_graph();
        let calls = Arc::new(AtomicU32::new(0));
        eval.register_backend(
            BackendKind::Native,
            Box::new(CountingBackend {
                calls: Arc::clone(&calls),
                fail: false,
            }),
        );
        let a = add_native(&mut eval, "Circle");
        eval.set_evaluation_order(vec![a]);
        eval.evaluate_all(&mut store).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // A sampler change forces a re-walk without touching the call string.
        eval.set_evaluation_sampler(a, 0, InputSampler::default())
            .unwrap();
        eval.evaluate_all(&mut store).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        // The same edit followed by a transient clear does not.
        eval.set_evaluation_sampler(a, 0, InputSampler::default())
            .unwrap();
        eval.clear_stage_transient(a).unwrap();
        eval.evaluate_all(&mut store).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn use_count_tracks_connections() {
        let (mut eval, mut store) = native_graph();
        let a = add_native(&mut eval, "Circle");
        let b = add_native(&mut eval, "Blend");
        let c = add_native(&mut eval, "Blend");
        eval.add_evaluation_input(b, 0, a).unwrap();
        eval.add_evaluation_input(c, 0, a).unwrap();
        assert_eq!(eval.use_count(a).unwrap(), 2);

        eval.del_evaluation_input(b, 0).unwrap();
        assert_eq!(eval.use_count(a).unwrap(), 1);

        eval.del_evaluation(c, &mut store).unwrap();
        assert_eq!(eval.use_count(a).unwrap(), 0);
    }

    #[test]
    fn replacing_a_connection_transfers_use_count() {
        let (mut eval, _) = native_graph();
        let a = add_native(&mut eval, "Circle");
        let b = add_native(&mut eval, "Square");
        let c = add_native(&mut eval, "Invert");
        eval.add_evaluation_input(c, 0, a).unwrap();
        eval.add_evaluation_input(c, 0, b).unwrap();
        assert_eq!(eval.use_count(a).unwrap(), 0);
        assert_eq!(eval.use_count(b).unwrap(), 1);
    }

    #[test]
    fn parameter_size_is_enforced() {
        let (mut eval, _) = native_graph();
        let a = add_native(&mut eval, "Circle");
        assert!(eval.set_evaluation_parameters(a, &[0u8; 8]).is_ok());
        assert!(matches!(
            eval.set_evaluation_parameters(a, &[0u8; 7]),
            Err(EngineError::ParameterSizeMismatch { .. })
        ));
    }

    #[test]
    fn input_slot_bounds_are_enforced() {
        let (mut eval, _) = native_graph();
        let a = add_native(&mut eval, "Circle");
        let b = add_native(&mut eval, "Invert");
        assert!(matches!(
            eval.add_evaluation_input(b, MAX_INPUTS, a),
            Err(EngineError::InputSlotOutOfRange { .. })
        ));
    }

    #[test]
    fn walk_produces_outputs_and_caches_clean_stages() {
        let mut eval = Evaluation::new();
        let calls = Arc::new(AtomicU32::new(0));
        eval.register_backend(
            BackendKind::Native,
            Box::new(CountingBackend {
                calls: Arc::clone(&calls),
                fail: false,
            }),
        );
        let mut store = CpuStore::new();
        let a = add_native(&mut eval, "Circle");
        let b = add_native(&mut eval, "Invert");
        eval.add_evaluation_input(b, 0, a).unwrap();
        eval.set_evaluation_order(vec![a, b]);

        eval.evaluate_all(&mut store).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(eval.output_texture(a).unwrap().is_some());

        // Nothing changed: second walk is a no-op.
        eval.evaluate_all(&mut store).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);

        // Touching the producer's parameters re-evaluates it and its consumer.
        let ty = find_node_type("Circle").unwrap();
        let mut params = eval.stage_parameters(a).unwrap().to_vec();
        texgraph_nodes::ParamBlockMut::new(node_desc(ty).unwrap(), &mut params)
            .unwrap()
            .set_float(0, 0, 0.9);
        eval.set_evaluation_parameters(a, &params).unwrap();
        eval.evaluate_all(&mut store).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn failing_stage_gets_error_indicator_and_walk_continues() {
        let mut eval = Evaluation::new();
        let fail_calls = Arc::new(AtomicU32::new(0));
        eval.register_backend(
            BackendKind::Native,
            Box::new(CountingBackend {
                calls: Arc::clone(&fail_calls),
                fail: true,
            }),
        );
        let ok_calls = Arc::new(AtomicU32::new(0));
        eval.register_backend(
            BackendKind::Script,
            Box::new(CountingBackend {
                calls: Arc::clone(&ok_calls),
                fail: false,
            }),
        );
        let mut store = CpuStore::new();
        let a = add_native(&mut eval, "Circle");
        let b = add_native(&mut eval, "Invert");
        eval.set_evaluation_mask(b, EvalMask::SCRIPT).unwrap();
        eval.add_evaluation_input(b, 0, a).unwrap();
        eval.set_evaluation_order(vec![a, b]);

        eval.evaluate_all(&mut store).unwrap();

        // The failing stage shows the error indicator...
        let img = eval.get_evaluation_image(a, &store).unwrap();
        assert_eq!(&img.bytes()[..4], &ERROR_PIXEL);
        // ...and its consumer still evaluated.
        assert_eq!(ok_calls.load(Ordering::SeqCst), 1);

        // No cache key was recorded, so the failed stage retries.
        eval.evaluate_all(&mut store).unwrap();
        assert_eq!(fail_calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn native_walk_circle_into_transform() {
        let (mut eval, mut store) = native_graph();
        let a = add_native(&mut eval, "Circle");
        let b = add_native(&mut eval, "Transform");
        let ty = find_node_type("Circle").unwrap();
        let desc = node_desc(ty).unwrap();
        let mut params = zeroed_params(ty).unwrap();
        texgraph_nodes::ParamBlockMut::new(desc, &mut params)
            .unwrap()
            .set_float(0, 0, 0.9);
        eval.set_evaluation_parameters(a, &params).unwrap();
        eval.add_evaluation_input(b, 0, a).unwrap();
        eval.set_evaluation_size(a, 32, 32).unwrap();
        eval.set_evaluation_size(b, 32, 32).unwrap();
        eval.set_evaluation_order(vec![a, b]);

        eval.evaluate_all(&mut store).unwrap();
        let img = eval.get_evaluation_image(b, &store).unwrap();
        assert_eq!((img.width(), img.height()), (32, 32));
        // Identity-ish transform (scale defaults to 1): center is inside the
        // circle.
        let off = ((16 * 32 + 16) * 4) as usize;
        assert_eq!(img.bytes()[off], 255);
    }

    #[test]
    fn resize_keeps_allocation_balanced() {
        let (mut eval, mut store) = native_graph();
        let a = add_native(&mut eval, "Circle");
        eval.set_evaluation_order(vec![a]);
        eval.evaluate_all(&mut store).unwrap();
        let live = store.live_count();

        for size in [64, 128, 64, 256] {
            eval.set_evaluation_size(a, size, size).unwrap();
            eval.evaluate_all(&mut store).unwrap();
        }
        assert_eq!(store.live_count(), live);

        eval.del_evaluation(a, &mut store).unwrap();
        assert_eq!(store.live_count(), live - 1);
    }

    #[test]
    fn clear_releases_everything() {
        let (mut eval, mut store) = native_graph();
        let a = add_native(&mut eval, "Circle");
        let b = add_native(&mut eval, "Checker");
        eval.set_evaluation_order(vec![a, b]);
        eval.evaluate_all(&mut store).unwrap();
        assert_eq!(store.live_count(), 2);

        eval.clear(&mut store);
        assert_eq!(eval.stage_count(), 0);
        assert_eq!(store.live_count(), 0);
    }

    #[test]
    fn set_image_allocates_and_reads_back() {
        let (mut eval, mut store) = native_graph();
        let a = add_native(&mut eval, "Circle");
        let mut img = Image::new(8, 8, PixelFormat::Rgba8);
        img.bytes_mut().fill(42);
        eval.set_evaluation_image(a, &img, &mut store).unwrap();
        let back = eval.get_evaluation_image(a, &store).unwrap();
        assert_eq!(back, img);
    }

    #[test]
    fn pointer_drag_edits_ranged_parameters() {
        let (mut eval, _) = native_graph();
        let a = add_native(&mut eval, "Circle");
        eval.set_mouse(a, 0.75, 0.0, true, false).unwrap();
        let ty = find_node_type("Circle").unwrap();
        let desc = node_desc(ty).unwrap();
        let block =
            texgraph_nodes::ParamBlock::new(desc, eval.stage_parameters(a).unwrap()).unwrap();
        assert_eq!(block.float(0, 0), 0.75);
    }

    #[test]
    fn out_of_range_index_is_reported() {
        let (mut eval, _) = native_graph();
        assert!(matches!(
            eval.stage_type(0),
            Err(EngineError::StageOutOfRange { .. })
        ));
        assert!(matches!(
            eval.set_evaluation_parameters(3, &[]),
            Err(EngineError::StageOutOfRange { .. })
        ));
    }
}
