//! Native (CPU) backend.
//!
//! A fixed table of kernel functions, one per node type that has a CPU
//! implementation. Kernels are pure: `(parameters, resolved inputs, target
//! size) -> Image`, always RGBA8, so their output is bit-stable across runs
//! and platforms and can be compared against reference renders.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use texgraph_core::EngineError;
use texgraph_image::{Image, PixelFormat};
use texgraph_nodes::{node_desc, ParamBlock};

use crate::{
    backend::{Backend, BackendRun, EvalCtx, EvalRequest, PendingImage},
    stage::{FilterMode, InputSampler, StageOutput, WrapMode},
    MAX_INPUTS,
};

/// Everything a kernel sees. Inputs are cloned so the same arguments can be
/// moved onto the background worker unchanged.
#[derive(Debug)]
pub struct KernelArgs {
    pub node_type: usize,
    pub parameters: Vec<u8>,
    pub inputs: Vec<Option<Image>>,
    pub samplers: [InputSampler; MAX_INPUTS],
    pub width: u32,
    pub height: u32,
    pub local_time: i32,
}

pub type KernelFn = fn(&KernelArgs) -> Result<Image, EngineError>;

/// CPU backend with an optional background-worker execution mode.
///
/// In background mode every kernel runs on the job worker and the dispatch
/// returns [`BackendRun::Pending`]; the orchestrator blocks on it before any
/// consumer of the stage runs.
#[derive(Debug)]
pub struct NativeBackend {
    kernels: HashMap<&'static str, KernelFn>,
    background: bool,
}

impl Default for NativeBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl NativeBackend {
    pub fn new() -> Self {
        let mut kernels: HashMap<&'static str, KernelFn> = HashMap::new();
        kernels.insert("Circle", kernel_circle as KernelFn);
        kernels.insert("Square", kernel_square);
        kernels.insert("Checker", kernel_checker);
        kernels.insert("Color", kernel_color);
        kernels.insert("Transform", kernel_transform);
        kernels.insert("Invert", kernel_invert);
        kernels.insert("MADD", kernel_madd);
        kernels.insert("Blend", kernel_blend);
        Self {
            kernels,
            background: false,
        }
    }

    /// Moves kernel execution onto the background worker.
    pub fn with_background(mut self, background: bool) -> Self {
        self.background = background;
        self
    }

    /// True if a CPU kernel exists for `node_type`.
    pub fn supports(&self, node_type: usize) -> bool {
        node_desc(node_type)
            .map(|d| self.kernels.contains_key(d.name))
            .unwrap_or(false)
    }
}

impl Backend for NativeBackend {
    fn evaluate(
        &mut self,
        ctx: &mut EvalCtx<'_>,
        req: &EvalRequest<'_>,
        out: &mut StageOutput,
    ) -> Result<BackendRun, EngineError> {
        let desc = node_desc(req.node_type)?;
        let kernel = *self
            .kernels
            .get(desc.name)
            .ok_or_else(|| EngineError::UnknownNodeType(desc.name.to_string()))?;

        let args = KernelArgs {
            node_type: req.node_type,
            parameters: req.parameters.to_vec(),
            inputs: req
                .inputs
                .iter()
                .map(|i| i.map(|r| r.image.clone()))
                .collect(),
            samplers: *req.samplers,
            width: req.width,
            height: req.height,
            local_time: req.local_time,
        };

        if self.background {
            let slot = Arc::new(Mutex::new(None));
            let job_slot = Arc::clone(&slot);
            let status = ctx.jobs.submit(move || {
                if let Ok(img) = kernel(&args) {
                    if let Ok(mut s) = job_slot.lock() {
                        *s = Some(img);
                    }
                }
            });
            return Ok(BackendRun::Pending(PendingImage::new(status, slot)));
        }

        let img = kernel(&args)?;
        if let Some(tex) = out.tex {
            ctx.store.upload(tex, &img, None)?;
        }
        out.image = img;
        Ok(BackendRun::Done)
    }
}

fn wrap(coord: f32, mode: WrapMode) -> f32 {
    match mode {
        WrapMode::Repeat => coord.rem_euclid(1.0),
        WrapMode::ClampToEdge => coord.clamp(0.0, 1.0),
        WrapMode::MirroredRepeat => {
            let t = coord.rem_euclid(2.0);
            if t > 1.0 {
                2.0 - t
            } else {
                t
            }
        }
    }
}

fn texel(img: &Image, x: i64, y: i64) -> [f32; 4] {
    let (w, h) = (img.width() as i64, img.height() as i64);
    if w == 0 || h == 0 {
        return [0.0; 4];
    }
    let x = x.clamp(0, w - 1) as usize;
    let y = y.clamp(0, h - 1) as usize;
    let off = (y * w as usize + x) * 4;
    let b = &img.bytes()[off..off + 4];
    [
        b[0] as f32 / 255.0,
        b[1] as f32 / 255.0,
        b[2] as f32 / 255.0,
        b[3] as f32 / 255.0,
    ]
}

/// Samples an optional input at normalized `(u, v)`. Unconnected inputs read
/// as transparent black.
pub fn sample(input: Option<&Image>, sampler: &InputSampler, u: f32, v: f32) -> [f32; 4] {
    let img = match input {
        Some(img) if img.format() == PixelFormat::Rgba8 => img,
        _ => return [0.0; 4],
    };
    let u = wrap(u, sampler.wrap_u);
    let v = wrap(v, sampler.wrap_v);
    let (w, h) = (img.width() as f32, img.height() as f32);
    match sampler.filter_mag {
        FilterMode::Nearest => texel(img, (u * w) as i64, (v * h) as i64),
        FilterMode::Linear => {
            let fx = u * w - 0.5;
            let fy = v * h - 0.5;
            let x0 = fx.floor();
            let y0 = fy.floor();
            let tx = fx - x0;
            let ty = fy - y0;
            let (x0, y0) = (x0 as i64, y0 as i64);
            let mut px = [0.0f32; 4];
            for c in 0..4 {
                let a = texel(img, x0, y0)[c] * (1.0 - tx) + texel(img, x0 + 1, y0)[c] * tx;
                let b =
                    texel(img, x0, y0 + 1)[c] * (1.0 - tx) + texel(img, x0 + 1, y0 + 1)[c] * tx;
                px[c] = a * (1.0 - ty) + b * ty;
            }
            px
        }
    }
}

fn render<F: FnMut(f32, f32) -> [f32; 4]>(width: u32, height: u32, mut shade: F) -> Image {
    let mut img = Image::new(width, height, PixelFormat::Rgba8);
    let (w, h) = (width as usize, height as usize);
    for (i, px) in img.bytes_mut().chunks_exact_mut(4).enumerate() {
        // Sample at the texel center.
        let u = ((i % w) as f32 + 0.5) / w as f32;
        let v = ((i / w) as f32 + 0.5) / h as f32;
        let c = shade(u, v);
        for (dst, src) in px.iter_mut().zip(c) {
            *dst = (src.clamp(0.0, 1.0) * 255.0).round() as u8;
        }
    }
    img
}

fn block<'a>(args: &'a KernelArgs) -> Result<ParamBlock<'a>, EngineError> {
    ParamBlock::new(node_desc(args.node_type)?, &args.parameters)
}

fn kernel_circle(args: &KernelArgs) -> Result<Image, EngineError> {
    let p = block(args)?;
    let radius = p.float(0, 0) * 0.5;
    Ok(render(args.width, args.height, |u, v| {
        let d = ((u - 0.5).powi(2) + (v - 0.5).powi(2)).sqrt();
        let s = if d <= radius { 1.0 } else { 0.0 };
        [s, s, s, 1.0]
    }))
}

fn kernel_square(args: &KernelArgs) -> Result<Image, EngineError> {
    let p = block(args)?;
    let half = p.float(0, 0) * 0.5;
    Ok(render(args.width, args.height, |u, v| {
        let s = if (u - 0.5).abs().max((v - 0.5).abs()) <= half {
            1.0
        } else {
            0.0
        };
        [s, s, s, 1.0]
    }))
}

fn kernel_checker(args: &KernelArgs) -> Result<Image, EngineError> {
    Ok(render(args.width, args.height, |u, v| {
        let s = (((u * 2.0).floor() + (v * 2.0).floor()) as i64).rem_euclid(2) as f32;
        [s, s, s, 1.0]
    }))
}

fn kernel_color(args: &KernelArgs) -> Result<Image, EngineError> {
    let p = block(args)?;
    let c = [p.float(0, 0), p.float(0, 1), p.float(0, 2), p.float(0, 3)];
    Ok(render(args.width, args.height, |_, _| c))
}

/// Samples the input at `R(-rotation) * (uv - translate) / scale`, i.e. the
/// output appears translated, rotated and scaled. A zero scale degenerates to
/// scale 1 so default parameter blocks stay usable.
fn kernel_transform(args: &KernelArgs) -> Result<Image, EngineError> {
    let p = block(args)?;
    let (tx, ty) = (p.float(0, 0), p.float(0, 1));
    let rot = p.float(1, 0);
    let mut scale = p.float(2, 0);
    if scale == 0.0 {
        scale = 1.0;
    }
    let (sin, cos) = rot.sin_cos();
    let input = args.inputs[0].as_ref();
    let sampler = args.samplers[0];
    Ok(render(args.width, args.height, |u, v| {
        let (x, y) = (u - 0.5 - tx, v - 0.5 - ty);
        let rx = (x * cos + y * sin) / scale + 0.5;
        let ry = (-x * sin + y * cos) / scale + 0.5;
        sample(input, &sampler, rx, ry)
    }))
}

fn kernel_invert(args: &KernelArgs) -> Result<Image, EngineError> {
    let input = args.inputs[0].as_ref();
    let sampler = args.samplers[0];
    Ok(render(args.width, args.height, |u, v| {
        let c = sample(input, &sampler, u, v);
        [1.0 - c[0], 1.0 - c[1], 1.0 - c[2], c[3]]
    }))
}

fn kernel_madd(args: &KernelArgs) -> Result<Image, EngineError> {
    let p = block(args)?;
    let mul = [p.float(0, 0), p.float(0, 1), p.float(0, 2), p.float(0, 3)];
    let add = [p.float(1, 0), p.float(1, 1), p.float(1, 2), p.float(1, 3)];
    let input = args.inputs[0].as_ref();
    let sampler = args.samplers[0];
    Ok(render(args.width, args.height, |u, v| {
        let c = sample(input, &sampler, u, v);
        [
            c[0] * mul[0] + add[0],
            c[1] * mul[1] + add[1],
            c[2] * mul[2] + add[2],
            c[3] * mul[3] + add[3],
        ]
    }))
}

fn kernel_blend(args: &KernelArgs) -> Result<Image, EngineError> {
    let p = block(args)?;
    let wa = [p.float(0, 0), p.float(0, 1), p.float(0, 2), p.float(0, 3)];
    let wb = [p.float(1, 0), p.float(1, 1), p.float(1, 2), p.float(1, 3)];
    let op = p.int(2);
    let (in_a, in_b) = (args.inputs[0].as_ref(), args.inputs[1].as_ref());
    let (sa, sb) = (args.samplers[0], args.samplers[1]);
    Ok(render(args.width, args.height, |u, v| {
        let a = sample(in_a, &sa, u, v);
        let b = sample(in_b, &sb, u, v);
        let mut out = [0.0f32; 4];
        for c in 0..4 {
            let (x, y) = (a[c] * wa[c], b[c] * wb[c]);
            out[c] = match op {
                1 => x * y,
                2 => x.min(y),
                3 => x.max(y),
                _ => x + y,
            };
        }
        out
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{jobs::JobSystem, store::CpuStore, BlendFactor, EvalMask, Mouse};
    use texgraph_nodes::{call_string, find_node_type, zeroed_params, ParamBlockMut};

    fn request<'a>(
        node_type: usize,
        call: &'a str,
        parameters: &'a [u8],
        samplers: &'a [InputSampler; MAX_INPUTS],
        inputs: [Option<crate::backend::InputRef<'a>>; MAX_INPUTS],
    ) -> EvalRequest<'a> {
        EvalRequest {
            node_type,
            call,
            parameters,
            inputs,
            samplers,
            blend: (BlendFactor::One, BlendFactor::Zero),
            depth_buffer: false,
            width: 16,
            height: 16,
            cube: false,
            local_time: 0,
            mouse: Mouse::default(),
        }
    }

    fn run(node: &str, parameters: &[u8], inputs: [Option<&Image>; 2]) -> Image {
        let ty = find_node_type(node).unwrap();
        let call = call_string(ty, parameters).unwrap();
        let samplers = [InputSampler::default(); MAX_INPUTS];
        let mut req_inputs: [Option<crate::backend::InputRef<'_>>; MAX_INPUTS] =
            [None; MAX_INPUTS];
        for (slot, img) in inputs.iter().enumerate() {
            req_inputs[slot] = img.map(|image| crate::backend::InputRef { tex: None, image });
        }
        let req = request(ty, &call, parameters, &samplers, req_inputs);

        let mut store = CpuStore::new();
        let jobs = JobSystem::new();
        let mut ctx = EvalCtx {
            store: &mut store,
            jobs: &jobs,
        };
        let mut out = StageOutput::default();
        let mut backend = NativeBackend::new();
        match backend.evaluate(&mut ctx, &req, &mut out).unwrap() {
            BackendRun::Done => out.image,
            BackendRun::Pending(_) => panic!("sync backend returned pending"),
        }
    }

    fn pixel(img: &Image, x: u32, y: u32) -> [u8; 4] {
        let off = ((y * img.width() + x) * 4) as usize;
        img.bytes()[off..off + 4].try_into().unwrap()
    }

    #[test]
    fn circle_covers_center_not_corners() {
        let ty = find_node_type("Circle").unwrap();
        let mut params = zeroed_params(ty).unwrap();
        ParamBlockMut::new(node_desc(ty).unwrap(), &mut params)
            .unwrap()
            .set_float(0, 0, 0.8);
        let img = run("Circle", &params, [None, None]);
        assert_eq!(pixel(&img, 8, 8), [255, 255, 255, 255]);
        assert_eq!(pixel(&img, 0, 0), [0, 0, 0, 255]);
    }

    #[test]
    fn invert_flips_color_keeps_alpha() {
        let mut input = Image::new(16, 16, PixelFormat::Rgba8);
        for px in input.bytes_mut().chunks_exact_mut(4) {
            px.copy_from_slice(&[255, 0, 255, 128]);
        }
        let ty = find_node_type("Invert").unwrap();
        let params = zeroed_params(ty).unwrap();
        let img = run("Invert", &params, [Some(&input), None]);
        assert_eq!(pixel(&img, 8, 8), [0, 255, 0, 128]);
    }

    #[test]
    fn blend_add_saturates() {
        let mut a = Image::new(16, 16, PixelFormat::Rgba8);
        a.bytes_mut().fill(200);
        let b = a.clone();
        let ty = find_node_type("Blend").unwrap();
        let mut params = zeroed_params(ty).unwrap();
        {
            let mut w = ParamBlockMut::new(node_desc(ty).unwrap(), &mut params).unwrap();
            for lane in 0..4 {
                w.set_float(0, lane, 1.0);
                w.set_float(1, lane, 1.0);
            }
        }
        let img = run("Blend", &params, [Some(&a), Some(&b)]);
        assert_eq!(pixel(&img, 4, 4), [255, 255, 255, 255]);
    }

    #[test]
    fn transform_translates_content() {
        // A white column at the left edge, translated half a turn to the
        // middle.
        let mut input = Image::new(16, 16, PixelFormat::Rgba8);
        for y in 0..16u32 {
            let off = ((y * 16) * 4) as usize;
            input.bytes_mut()[off..off + 4].copy_from_slice(&[255, 255, 255, 255]);
        }
        let ty = find_node_type("Transform").unwrap();
        let mut params = zeroed_params(ty).unwrap();
        {
            let mut w = ParamBlockMut::new(node_desc(ty).unwrap(), &mut params).unwrap();
            w.set_float(0, 0, 0.5); // Translate.x
            w.set_float(2, 0, 1.0); // Scale
        }
        let mut sampler = InputSampler::default();
        sampler.filter_mag = FilterMode::Nearest;
        // Run through the kernel directly so we control the sampler.
        let args = KernelArgs {
            node_type: ty,
            parameters: params,
            inputs: vec![Some(input), None, None, None, None, None, None, None],
            samplers: [sampler; MAX_INPUTS],
            width: 16,
            height: 16,
            local_time: 0,
        };
        let img = kernel_transform(&args).unwrap();
        assert_eq!(pixel(&img, 8, 8), [255, 255, 255, 255]);
        assert_eq!(pixel(&img, 4, 8), [0, 0, 0, 0]);
    }

    #[test]
    fn unconnected_input_reads_as_black() {
        let ty = find_node_type("Invert").unwrap();
        let params = zeroed_params(ty).unwrap();
        let img = run("Invert", &params, [None, None]);
        // 1 - 0 = 1 on color, alpha stays 0.
        assert_eq!(pixel(&img, 0, 0), [255, 255, 255, 0]);
    }

    #[test]
    fn node_without_kernel_is_rejected() {
        let ty = find_node_type("Blur").unwrap();
        let backend = NativeBackend::new();
        assert!(!backend.supports(ty));
    }

    #[test]
    fn background_mode_returns_pending_then_image() {
        let ty = find_node_type("Checker").unwrap();
        let params = zeroed_params(ty).unwrap();
        let call = call_string(ty, &params).unwrap();
        let samplers = [InputSampler::default(); MAX_INPUTS];
        let req = request(ty, &call, &params, &samplers, [None; MAX_INPUTS]);

        let mut store = CpuStore::new();
        let jobs = JobSystem::new();
        let mut ctx = EvalCtx {
            store: &mut store,
            jobs: &jobs,
        };
        let mut out = StageOutput::default();
        let mut backend = NativeBackend::new().with_background(true);
        match backend.evaluate(&mut ctx, &req, &mut out).unwrap() {
            BackendRun::Pending(pending) => {
                let img = pending.wait(&jobs).expect("kernel produced an image");
                assert_eq!((img.width(), img.height()), (16, 16));
            }
            BackendRun::Done => panic!("background backend completed synchronously"),
        }
    }

    #[test]
    fn default_mask_is_not_native() {
        assert_eq!(EvalMask::default(), EvalMask::GLSL);
    }
}
