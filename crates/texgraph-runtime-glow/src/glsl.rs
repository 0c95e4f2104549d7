//! GLSL fragment and compute backends.
//!
//! The generated call string from the node layer is spliced into a fixed
//! shader scaffold around [`NODE_LIBRARY_GLSL`]; the compiled program is
//! cached by source hash, so an unchanged call string never recompiles.

use glow::HasContext;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use texgraph_core::EngineError;
use texgraph_eval::{
    Backend, BackendRun, BlendFactor, EvalCtx, EvalRequest, FilterMode, InputSampler, StageOutput,
    WrapMode, MAX_INPUTS,
};

use crate::{
    compile_compute_program, compile_program, hash_str, readback_pixels, FullscreenTriangle,
    GlTargetHandle, Targets,
};

pub const FULLSCREEN_VERT: &str = r#"#version 330 core
layout (location = 0) in vec2 a_pos;
layout (location = 1) in vec2 a_uv;
out vec2 v_uv;
void main() {
    v_uv = a_uv;
    gl_Position = vec4(a_pos, 0.0, 1.0);
}
"#;

/// GLSL implementations of the stock node library. Function names and
/// signatures line up with the generated call strings.
pub const NODE_LIBRARY_GLSL: &str = r#"
uniform sampler2D uInput0;
uniform sampler2D uInput1;
uniform sampler2D uInput2;
uniform sampler2D uInput3;
uniform sampler2D uInput4;
uniform sampler2D uInput5;
uniform sampler2D uInput6;
uniform sampler2D uInput7;
uniform float uTime;
uniform vec4 uMouse;
uniform int uFace;

vec4 Circle(vec2 vUV, float radius, float t)
{
    float d = length(vUV - 0.5);
    float r = radius * 0.5;
    float v = 1.0 - smoothstep(r - max(t, 1e-5), r, d);
    return vec4(v, v, v, 1.0);
}

vec4 Square(vec2 vUV, float width)
{
    vec2 d = abs(vUV - 0.5);
    float v = max(d.x, d.y) <= width * 0.5 ? 1.0 : 0.0;
    return vec4(v, v, v, 1.0);
}

vec4 Checker(vec2 vUV)
{
    float v = mod(floor(vUV.x * 2.0) + floor(vUV.y * 2.0), 2.0);
    return vec4(v, v, v, 1.0);
}

vec4 Transform(vec2 vUV, vec2 translate, float rotation, float scale)
{
    float s = scale == 0.0 ? 1.0 : scale;
    vec2 p = vUV - 0.5 - translate;
    vec2 q = vec2(
        p.x * cos(rotation) + p.y * sin(rotation),
        -p.x * sin(rotation) + p.y * cos(rotation)) / s + 0.5;
    return texture(uInput0, q);
}

vec4 Sine(vec2 vUV, float frequency, float angle)
{
    vec2 dir = vec2(cos(angle), sin(angle));
    float v = sin(dot(vUV, dir) * frequency * 6.2831853) * 0.5 + 0.5;
    return vec4(v, v, v, 1.0);
}

vec4 SmoothStep(vec2 vUV, float low, float high)
{
    vec4 c = texture(uInput0, vUV);
    return vec4(smoothstep(low, high, c.rgb), c.a);
}

vec4 Pixelize(vec2 vUV, float scale)
{
    float s = max(scale, 1.0);
    return texture(uInput0, floor(vUV * s) / s);
}

vec4 Blur(vec2 vUV, float angle, float strength)
{
    vec2 dir = vec2(cos(angle), sin(angle)) * strength;
    vec4 acc = vec4(0.0);
    for (int i = -4; i <= 4; i++)
        acc += texture(uInput0, vUV + dir * (float(i) / 4.0));
    return acc / 9.0;
}

vec4 NormalMap(vec2 vUV, float spread)
{
    vec2 texel = vec2(1.0) / vec2(textureSize(uInput0, 0));
    float l = texture(uInput0, vUV - vec2(texel.x, 0.0)).r;
    float r = texture(uInput0, vUV + vec2(texel.x, 0.0)).r;
    float b = texture(uInput0, vUV - vec2(0.0, texel.y)).r;
    float t = texture(uInput0, vUV + vec2(0.0, texel.y)).r;
    vec3 n = normalize(vec3((l - r) * spread, (b - t) * spread, 1.0));
    return vec4(n * 0.5 + 0.5, 1.0);
}

vec4 LambertMaterial(vec2 vUV, vec2 view)
{
    vec4 diffuse = texture(uInput0, vUV);
    vec3 n = texture(uInput1, vUV).xyz * 2.0 - 1.0;
    vec3 l = normalize(vec3(view - 0.5, 1.0));
    return vec4(diffuse.rgb * max(dot(n, l), 0.0), diffuse.a);
}

vec4 MADD(vec2 vUV, vec4 mulColor, vec4 addColor)
{
    return texture(uInput0, vUV) * mulColor + addColor;
}

vec4 Hexagon(vec2 vUV)
{
    vec2 p = vUV * vec2(6.0, 6.0 / 1.1547);
    p.x += mod(floor(p.y), 2.0) * 0.5;
    p = abs(fract(p) - 0.5);
    float v = abs(max(p.x * 1.5 + p.y, p.y * 2.0) - 1.0);
    return vec4(v, v, v, 1.0);
}

vec4 Blend(vec2 vUV, vec4 A, vec4 B, int op)
{
    vec4 a = texture(uInput0, vUV) * A;
    vec4 b = texture(uInput1, vUV) * B;
    if (op == 1) return a * b;
    if (op == 2) return min(a, b);
    if (op == 3) return max(a, b);
    return a + b;
}

vec4 Invert(vec2 vUV)
{
    vec4 c = texture(uInput0, vUV);
    return vec4(1.0 - c.rgb, c.a);
}

vec4 CircleSplatter(vec2 vUV, vec2 dist, vec2 radius, vec2 angle, float count)
{
    float v = 0.0;
    int n = int(max(count, 1.0));
    for (int i = 0; i < 64; i++)
    {
        if (i >= n) break;
        float t = float(i) / max(float(n - 1), 1.0);
        float a = mix(angle.x, angle.y, t);
        float d = mix(dist.x, dist.y, t);
        float r = mix(radius.x, radius.y, t);
        vec2 c = 0.5 + vec2(cos(a), sin(a)) * d;
        v = max(v, 1.0 - smoothstep(r - 0.01, r, length(vUV - c)));
    }
    return vec4(v, v, v, 1.0);
}

vec4 Ramp(vec2 vUV, vec2 ramp[8])
{
    float v = texture(uInput0, vUV).r;
    float g = ramp[0].y;
    for (int i = 0; i < 7; i++)
    {
        if (v >= ramp[i].x && v <= ramp[i + 1].x)
        {
            float t = (v - ramp[i].x) / max(ramp[i + 1].x - ramp[i].x, 1e-5);
            g = mix(ramp[i].y, ramp[i + 1].y, t);
        }
    }
    return vec4(g, g, g, 1.0);
}

vec4 Tile(vec2 vUV, float scale, vec2 offset0, vec2 offset1, vec2 overlap)
{
    float s = max(scale, 1.0);
    vec2 p = vUV * s;
    vec2 cell = floor(p);
    vec2 off = mod(cell.y, 2.0) > 0.5 ? offset0 : offset1;
    return texture(uInput0, fract(p + off) * (1.0 + overlap) - overlap * 0.5);
}

vec4 Color(vec2 vUV, vec4 color)
{
    return color;
}
"#;

/// Wraps a generated call expression into a complete fragment shader.
pub fn assemble_fragment(library: &str, call: &str) -> String {
    format!(
        "#version 330 core\nin vec2 v_uv;\nout vec4 FragColor;\n{library}\nvoid main() {{\n    vec2 vUV = v_uv;\n    FragColor = {call};\n}}\n"
    )
}

/// Wraps a generated call expression into a compute shader writing the target
/// image directly.
pub fn assemble_compute(library: &str, call: &str) -> String {
    format!(
        "#version 430 core\nlayout(local_size_x = 16, local_size_y = 16) in;\nlayout(rgba8, binding = 0) uniform writeonly image2D uImage;\n{library}\nvoid main() {{\n    ivec2 size = imageSize(uImage);\n    ivec2 px = ivec2(gl_GlobalInvocationID.xy);\n    if (px.x >= size.x || px.y >= size.y) return;\n    vec2 vUV = (vec2(px) + 0.5) / vec2(size);\n    imageStore(uImage, px, {call});\n}}\n"
    )
}

pub fn blend_factor_gl(factor: BlendFactor) -> u32 {
    match factor {
        BlendFactor::Zero => glow::ZERO,
        BlendFactor::One => glow::ONE,
        BlendFactor::SrcColor => glow::SRC_COLOR,
        BlendFactor::OneMinusSrcColor => glow::ONE_MINUS_SRC_COLOR,
        BlendFactor::DstColor => glow::DST_COLOR,
        BlendFactor::OneMinusDstColor => glow::ONE_MINUS_DST_COLOR,
        BlendFactor::SrcAlpha => glow::SRC_ALPHA,
        BlendFactor::OneMinusSrcAlpha => glow::ONE_MINUS_SRC_ALPHA,
        BlendFactor::DstAlpha => glow::DST_ALPHA,
        BlendFactor::OneMinusDstAlpha => glow::ONE_MINUS_DST_ALPHA,
        BlendFactor::ConstantColor => glow::CONSTANT_COLOR,
        BlendFactor::OneMinusConstantColor => glow::ONE_MINUS_CONSTANT_COLOR,
        BlendFactor::ConstantAlpha => glow::CONSTANT_ALPHA,
        BlendFactor::OneMinusConstantAlpha => glow::ONE_MINUS_CONSTANT_ALPHA,
        BlendFactor::SrcAlphaSaturate => glow::SRC_ALPHA_SATURATE,
    }
}

fn wrap_gl(mode: WrapMode) -> i32 {
    (match mode {
        WrapMode::Repeat => glow::REPEAT,
        WrapMode::ClampToEdge => glow::CLAMP_TO_EDGE,
        WrapMode::MirroredRepeat => glow::MIRRORED_REPEAT,
    }) as i32
}

fn filter_gl(mode: FilterMode) -> i32 {
    (match mode {
        FilterMode::Linear => glow::LINEAR,
        FilterMode::Nearest => glow::NEAREST,
    }) as i32
}

/// Fragment-shader backend. One cached program per distinct assembled source.
pub struct GlslBackend {
    gl: Rc<glow::Context>,
    targets: Rc<RefCell<Targets>>,
    fs_tri: FullscreenTriangle,
    cache: HashMap<u64, glow::NativeProgram>,
    library: String,
}

impl std::fmt::Debug for GlslBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GlslBackend")
            .field("cached_programs", &self.cache.len())
            .finish_non_exhaustive()
    }
}

impl GlslBackend {
    pub fn new(gl: Rc<glow::Context>, handle: GlTargetHandle) -> Result<Self, EngineError> {
        let fs_tri = unsafe { FullscreenTriangle::new(&gl)? };
        Ok(Self {
            gl,
            targets: handle.targets,
            fs_tri,
            cache: HashMap::new(),
            library: NODE_LIBRARY_GLSL.to_string(),
        })
    }

    /// Replaces the node function library (hosts with custom node GLSL).
    /// Cached programs built against the old library stay valid for their
    /// sources; new call strings compile against the new library.
    pub fn set_library(&mut self, library: String) {
        self.library = library;
    }

    pub fn destroy(&mut self) {
        unsafe {
            for (_, p) in self.cache.drain() {
                self.gl.delete_program(p);
            }
            self.fs_tri.destroy(&self.gl);
        }
    }

    fn program_for(&mut self, frag: &str) -> Result<glow::NativeProgram, EngineError> {
        let key = hash_str(frag);
        if let Some(p) = self.cache.get(&key) {
            return Ok(*p);
        }
        tracing::debug!(cached = self.cache.len(), "compiling fragment program");
        let p = unsafe { compile_program(&self.gl, FULLSCREEN_VERT, frag)? };
        self.cache.insert(key, p);
        Ok(p)
    }

    unsafe fn bind_inputs(&self, program: glow::NativeProgram, req: &EvalRequest<'_>) {
        let gl = &self.gl;
        let targets = self.targets.borrow();
        for slot in 0..MAX_INPUTS {
            let Some(input) = &req.inputs[slot] else {
                continue;
            };
            let Some(tex) = input.tex else { continue };
            let Some(t) = targets.map.get(&tex.0) else {
                continue;
            };
            gl.active_texture(glow::TEXTURE0 + slot as u32);
            gl.bind_texture(glow::TEXTURE_2D, Some(t.tex));
            apply_sampler(gl, &req.samplers[slot]);
            if let Some(loc) = gl.get_uniform_location(program, &format!("uInput{slot}")) {
                gl.uniform_1_i32(Some(&loc), slot as i32);
            }
        }
    }
}

unsafe fn apply_sampler(gl: &glow::Context, sampler: &InputSampler) {
    gl.tex_parameter_i32(
        glow::TEXTURE_2D,
        glow::TEXTURE_WRAP_S,
        wrap_gl(sampler.wrap_u),
    );
    gl.tex_parameter_i32(
        glow::TEXTURE_2D,
        glow::TEXTURE_WRAP_T,
        wrap_gl(sampler.wrap_v),
    );
    gl.tex_parameter_i32(
        glow::TEXTURE_2D,
        glow::TEXTURE_MIN_FILTER,
        filter_gl(sampler.filter_min),
    );
    gl.tex_parameter_i32(
        glow::TEXTURE_2D,
        glow::TEXTURE_MAG_FILTER,
        filter_gl(sampler.filter_mag),
    );
}

unsafe fn set_common_uniforms(
    gl: &glow::Context,
    program: glow::NativeProgram,
    req: &EvalRequest<'_>,
    face: i32,
) {
    if let Some(loc) = gl.get_uniform_location(program, "uTime") {
        gl.uniform_1_f32(Some(&loc), req.local_time as f32);
    }
    if let Some(loc) = gl.get_uniform_location(program, "uMouse") {
        gl.uniform_4_f32(
            Some(&loc),
            req.mouse.rx,
            req.mouse.ry,
            if req.mouse.left_down { 1.0 } else { 0.0 },
            if req.mouse.right_down { 1.0 } else { 0.0 },
        );
    }
    if let Some(loc) = gl.get_uniform_location(program, "uFace") {
        gl.uniform_1_i32(Some(&loc), face);
    }
}

impl Backend for GlslBackend {
    fn evaluate(
        &mut self,
        _ctx: &mut EvalCtx<'_>,
        req: &EvalRequest<'_>,
        out: &mut StageOutput,
    ) -> Result<BackendRun, EngineError> {
        let tex = out
            .tex
            .ok_or_else(|| EngineError::other("glsl backend: stage has no render target"))?;

        let frag = assemble_fragment(&self.library, req.call);
        let program = self.program_for(&frag)?;

        let gl = Rc::clone(&self.gl);
        unsafe {
            let targets = self.targets.borrow();
            let t = targets
                .map
                .get(&tex.0)
                .ok_or_else(|| EngineError::other("glsl backend: target not in GL registry"))?;

            let faces = if t.cube { 6 } else { 1 };
            gl.bind_framebuffer(glow::FRAMEBUFFER, Some(t.fbo));
            gl.viewport(0, 0, t.w, t.h);
            if req.depth_buffer && t.depth.is_some() {
                gl.enable(glow::DEPTH_TEST);
            } else {
                gl.disable(glow::DEPTH_TEST);
            }
            gl.enable(glow::BLEND);
            gl.blend_func(blend_factor_gl(req.blend.0), blend_factor_gl(req.blend.1));
            gl.use_program(Some(program));
            drop(targets);

            self.bind_inputs(program, req);

            let targets = self.targets.borrow();
            let t = targets
                .map
                .get(&tex.0)
                .ok_or_else(|| EngineError::other("glsl backend: target not in GL registry"))?;
            for face in 0..faces {
                if t.cube {
                    gl.framebuffer_texture_2d(
                        glow::FRAMEBUFFER,
                        glow::COLOR_ATTACHMENT0,
                        glow::TEXTURE_CUBE_MAP_POSITIVE_X + face as u32,
                        Some(t.tex),
                        0,
                    );
                }
                set_common_uniforms(&gl, program, req, face);
                gl.clear_color(0.0, 0.0, 0.0, 0.0);
                gl.clear(glow::COLOR_BUFFER_BIT | glow::DEPTH_BUFFER_BIT);
                self.fs_tri.draw(&gl);
            }
            gl.disable(glow::BLEND);
            gl.bind_framebuffer(glow::FRAMEBUFFER, None);

            // Keep the CPU mirror current for readers that never touch GL.
            out.image = readback_pixels(&gl, t)?;
        }
        Ok(BackendRun::Done)
    }
}

/// Compute-shader backend: writes the target image directly via image
/// load/store. 2D targets only.
pub struct GlslComputeBackend {
    gl: Rc<glow::Context>,
    targets: Rc<RefCell<Targets>>,
    cache: HashMap<u64, glow::NativeProgram>,
    library: String,
}

impl std::fmt::Debug for GlslComputeBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GlslComputeBackend")
            .field("cached_programs", &self.cache.len())
            .finish_non_exhaustive()
    }
}

impl GlslComputeBackend {
    pub fn new(gl: Rc<glow::Context>, handle: GlTargetHandle) -> Self {
        Self {
            gl,
            targets: handle.targets,
            cache: HashMap::new(),
            library: NODE_LIBRARY_GLSL.to_string(),
        }
    }

    pub fn set_library(&mut self, library: String) {
        self.library = library;
    }

    pub fn destroy(&mut self) {
        unsafe {
            for (_, p) in self.cache.drain() {
                self.gl.delete_program(p);
            }
        }
    }

    fn program_for(&mut self, src: &str) -> Result<glow::NativeProgram, EngineError> {
        let key = hash_str(src);
        if let Some(p) = self.cache.get(&key) {
            return Ok(*p);
        }
        tracing::debug!(cached = self.cache.len(), "compiling compute program");
        let p = unsafe { compile_compute_program(&self.gl, src)? };
        self.cache.insert(key, p);
        Ok(p)
    }
}

impl Backend for GlslComputeBackend {
    fn evaluate(
        &mut self,
        _ctx: &mut EvalCtx<'_>,
        req: &EvalRequest<'_>,
        out: &mut StageOutput,
    ) -> Result<BackendRun, EngineError> {
        if req.cube {
            return Err(EngineError::other("compute backend: cube targets unsupported"));
        }
        let tex = out
            .tex
            .ok_or_else(|| EngineError::other("compute backend: stage has no render target"))?;

        let src = assemble_compute(&self.library, req.call);
        let program = self.program_for(&src)?;

        let gl = Rc::clone(&self.gl);
        unsafe {
            let targets = self.targets.borrow();
            let t = targets
                .map
                .get(&tex.0)
                .ok_or_else(|| EngineError::other("compute backend: target not in GL registry"))?;

            gl.use_program(Some(program));
            gl.bind_image_texture(0, t.tex, 0, false, 0, glow::WRITE_ONLY, glow::RGBA8);
            for slot in 0..MAX_INPUTS {
                let Some(input) = &req.inputs[slot] else {
                    continue;
                };
                let Some(itex) = input.tex else { continue };
                let Some(it) = targets.map.get(&itex.0) else {
                    continue;
                };
                gl.active_texture(glow::TEXTURE0 + slot as u32);
                gl.bind_texture(glow::TEXTURE_2D, Some(it.tex));
                apply_sampler(&gl, &req.samplers[slot]);
                if let Some(loc) = gl.get_uniform_location(program, &format!("uInput{slot}")) {
                    gl.uniform_1_i32(Some(&loc), slot as i32);
                }
            }
            set_common_uniforms(&gl, program, req, 0);

            let groups_x = (t.w as u32).div_ceil(16);
            let groups_y = (t.h as u32).div_ceil(16);
            gl.dispatch_compute(groups_x, groups_y, 1);
            gl.memory_barrier(glow::SHADER_IMAGE_ACCESS_BARRIER_BIT);

            out.image = readback_pixels(&gl, t)?;
        }
        Ok(BackendRun::Done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fragment_scaffold_splices_the_call() {
        let src = assemble_fragment(NODE_LIBRARY_GLSL, "Circle(vUV,0.500000,0.000000)");
        assert!(src.starts_with("#version 330 core"));
        assert!(src.contains("FragColor = Circle(vUV,0.500000,0.000000);"));
        assert!(src.contains("vec4 Circle(vec2 vUV, float radius, float t)"));
    }

    #[test]
    fn identical_calls_assemble_identical_sources() {
        let a = assemble_fragment(NODE_LIBRARY_GLSL, "Checker(vUV)");
        let b = assemble_fragment(NODE_LIBRARY_GLSL, "Checker(vUV)");
        assert_eq!(a, b);
        assert_eq!(crate::hash_str(&a), crate::hash_str(&b));
    }

    #[test]
    fn compute_scaffold_writes_through_image_store() {
        let src = assemble_compute(NODE_LIBRARY_GLSL, "Color(vUV,vec4(1.0, 0.0, 0.0, 1.0))");
        assert!(src.starts_with("#version 430 core"));
        assert!(src.contains("imageStore(uImage, px, Color(vUV,vec4(1.0, 0.0, 0.0, 1.0)));"));
    }

    #[test]
    fn library_covers_every_stock_node() {
        for desc in texgraph_nodes::NODE_TYPES {
            assert!(
                NODE_LIBRARY_GLSL.contains(&format!("vec4 {}(vec2 vUV", desc.name)),
                "missing GLSL for {}",
                desc.name
            );
        }
    }

    #[test]
    fn blend_factors_map_one_to_one() {
        use std::collections::HashSet;
        let all = [
            BlendFactor::Zero,
            BlendFactor::One,
            BlendFactor::SrcColor,
            BlendFactor::OneMinusSrcColor,
            BlendFactor::DstColor,
            BlendFactor::OneMinusDstColor,
            BlendFactor::SrcAlpha,
            BlendFactor::OneMinusSrcAlpha,
            BlendFactor::DstAlpha,
            BlendFactor::OneMinusDstAlpha,
            BlendFactor::ConstantColor,
            BlendFactor::OneMinusConstantColor,
            BlendFactor::ConstantAlpha,
            BlendFactor::OneMinusConstantAlpha,
            BlendFactor::SrcAlphaSaturate,
        ];
        assert_eq!(all.len(), BlendFactor::COUNT);
        let mapped: HashSet<u32> = all.iter().map(|f| blend_factor_gl(*f)).collect();
        assert_eq!(mapped.len(), all.len());
    }
}
