//! texgraph runtime (glow/OpenGL backend)
//
// This crate contains only the GL side of the engine:
// - compile/link shaders
// - manage render targets (FBO + texture, 2D and cube)
// - the GLSL fragment and compute backends
//
// It does NOT contain windowing, scheduling, or graph policy; those live in
// `texgraph-eval`, and the host owns the GL context lifecycle.
#![allow(clippy::missing_safety_doc)]

use glow::HasContext;
use std::cell::RefCell;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use texgraph_eval::{TexId, TextureStore};
use texgraph_image::{Image, PixelFormat};

pub use texgraph_core::EngineError;

pub mod glsl;
pub mod prefilter;

pub use glsl::{GlslBackend, GlslComputeBackend, NODE_LIBRARY_GLSL};
pub use prefilter::{prefilter_cube, LightingModel, PrefilterParams};

/// GL upload/storage triple for a [`PixelFormat`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GlFormat {
    pub internal: i32,
    pub format: u32,
    pub ty: u32,
}

/// Maps every engine pixel format onto a GL storage layout.
///
/// RGBE and RGBM have no dedicated GL formats; they travel as plain RGBA8 and
/// the decode happens in shader code.
pub fn gl_format(format: PixelFormat) -> GlFormat {
    match format {
        PixelFormat::Bgr8 => GlFormat {
            internal: glow::RGB8 as i32,
            format: glow::BGR,
            ty: glow::UNSIGNED_BYTE,
        },
        PixelFormat::Rgb8 => GlFormat {
            internal: glow::RGB8 as i32,
            format: glow::RGB,
            ty: glow::UNSIGNED_BYTE,
        },
        PixelFormat::Rgb16 => GlFormat {
            internal: glow::RGB16 as i32,
            format: glow::RGB,
            ty: glow::UNSIGNED_SHORT,
        },
        PixelFormat::Rgb16F => GlFormat {
            internal: glow::RGB16F as i32,
            format: glow::RGB,
            ty: glow::HALF_FLOAT,
        },
        PixelFormat::Rgb32F => GlFormat {
            internal: glow::RGB32F as i32,
            format: glow::RGB,
            ty: glow::FLOAT,
        },
        PixelFormat::Rgbe | PixelFormat::Rgbm | PixelFormat::Rgba8 => GlFormat {
            internal: glow::RGBA8 as i32,
            format: glow::RGBA,
            ty: glow::UNSIGNED_BYTE,
        },
        PixelFormat::Bgra8 => GlFormat {
            internal: glow::RGBA8 as i32,
            format: glow::BGRA,
            ty: glow::UNSIGNED_BYTE,
        },
        PixelFormat::Rgba16 => GlFormat {
            internal: glow::RGBA16 as i32,
            format: glow::RGBA,
            ty: glow::UNSIGNED_SHORT,
        },
        PixelFormat::Rgba16F => GlFormat {
            internal: glow::RGBA16F as i32,
            format: glow::RGBA,
            ty: glow::HALF_FLOAT,
        },
        PixelFormat::Rgba32F => GlFormat {
            internal: glow::RGBA32F as i32,
            format: glow::RGBA,
            ty: glow::FLOAT,
        },
    }
}

/// One allocated GL target: texture + FBO, optionally a depth renderbuffer
/// (2D only; cube targets never take the depth path).
#[derive(Debug)]
pub struct GlTarget {
    pub fbo: glow::NativeFramebuffer,
    pub tex: glow::NativeTexture,
    pub depth: Option<glow::NativeRenderbuffer>,
    pub w: i32,
    pub h: i32,
    pub format: PixelFormat,
    pub cube: bool,
}

#[derive(Debug, Default)]
pub(crate) struct Targets {
    pub(crate) map: HashMap<u64, GlTarget>,
}

/// [`TextureStore`] over a glow context.
///
/// The target registry is shared (via `Rc<RefCell<_>>`) with the GL backends
/// so they can resolve a [`TexId`] to FBO/texture handles without widening the
/// store trait.
pub struct GlowStore {
    gl: Rc<glow::Context>,
    targets: Rc<RefCell<Targets>>,
    next: u64,
}

impl std::fmt::Debug for GlowStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GlowStore")
            .field("live", &self.targets.borrow().map.len())
            .finish_non_exhaustive()
    }
}

impl GlowStore {
    pub fn new(gl: Rc<glow::Context>) -> Self {
        Self {
            gl,
            targets: Rc::new(RefCell::new(Targets::default())),
            next: 1,
        }
    }

    pub(crate) fn shared_targets(&self) -> Rc<RefCell<Targets>> {
        Rc::clone(&self.targets)
    }

    /// The shared registry handle the GL backends are constructed from.
    pub fn backend_handle(&self) -> GlTargetHandle {
        GlTargetHandle {
            targets: self.shared_targets(),
        }
    }

    /// Releases every live target. Call before dropping the GL context.
    pub fn destroy(&mut self) {
        let gl = &self.gl;
        let mut targets = self.targets.borrow_mut();
        for (_, t) in targets.map.drain() {
            unsafe {
                gl.delete_framebuffer(t.fbo);
                gl.delete_texture(t.tex);
                if let Some(rb) = t.depth {
                    gl.delete_renderbuffer(rb);
                }
            }
        }
    }
}

/// Opaque capability handle for constructing GL backends against a
/// [`GlowStore`]'s registry.
pub struct GlTargetHandle {
    pub(crate) targets: Rc<RefCell<Targets>>,
}

impl std::fmt::Debug for GlTargetHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GlTargetHandle").finish_non_exhaustive()
    }
}

impl TextureStore for GlowStore {
    fn alloc_2d(
        &mut self,
        width: u32,
        height: u32,
        format: PixelFormat,
        depth: bool,
    ) -> Result<TexId, EngineError> {
        let target =
            unsafe { create_render_target(&self.gl, width as i32, height as i32, format, depth)? };
        let id = self.next;
        self.next += 1;
        self.targets.borrow_mut().map.insert(id, target);
        Ok(TexId(id))
    }

    fn alloc_cube(&mut self, size: u32, format: PixelFormat) -> Result<TexId, EngineError> {
        let target = unsafe { create_cube_target(&self.gl, size as i32, format)? };
        let id = self.next;
        self.next += 1;
        self.targets.borrow_mut().map.insert(id, target);
        Ok(TexId(id))
    }

    fn resize(&mut self, tex: TexId, width: u32, height: u32) -> Result<(), EngineError> {
        let gl = &self.gl;
        let mut targets = self.targets.borrow_mut();
        let t = targets
            .map
            .get_mut(&tex.0)
            .ok_or_else(|| EngineError::other(format!("resize: unknown texture {:?}", tex)))?;
        unsafe { resize_target(gl, t, width as i32, height as i32) }
    }

    fn upload(
        &mut self,
        tex: TexId,
        image: &Image,
        cube_face: Option<u8>,
    ) -> Result<(), EngineError> {
        let gl = &self.gl;
        let targets = self.targets.borrow();
        let t = targets
            .map
            .get(&tex.0)
            .ok_or_else(|| EngineError::other(format!("upload: unknown texture {:?}", tex)))?;
        unsafe { upload_pixels(gl, t, image, cube_face) }
    }

    fn readback(&self, tex: TexId) -> Result<Image, EngineError> {
        let gl = &self.gl;
        let targets = self.targets.borrow();
        let t = targets
            .map
            .get(&tex.0)
            .ok_or_else(|| EngineError::other(format!("readback: unknown texture {:?}", tex)))?;
        unsafe { readback_pixels(gl, t) }
    }

    fn free(&mut self, tex: TexId) {
        let gl = &self.gl;
        if let Some(t) = self.targets.borrow_mut().map.remove(&tex.0) {
            unsafe {
                gl.delete_framebuffer(t.fbo);
                gl.delete_texture(t.tex);
                if let Some(rb) = t.depth {
                    gl.delete_renderbuffer(rb);
                }
            }
        }
    }

    fn native_handle(&self, tex: TexId) -> Option<u64> {
        self.targets
            .borrow()
            .map
            .get(&tex.0)
            .map(|t| t.tex.0.get() as u64)
    }

    fn describe(&self, tex: TexId) -> Option<(u32, u32, bool)> {
        self.targets
            .borrow()
            .map
            .get(&tex.0)
            .map(|t| (t.w as u32, t.h as u32, t.cube))
    }
}

unsafe fn tex_storage_2d(gl: &glow::Context, fmt: GlFormat, w: i32, h: i32) {
    gl.tex_image_2d(
        glow::TEXTURE_2D,
        0,
        fmt.internal,
        w,
        h,
        0,
        fmt.format,
        fmt.ty,
        None,
    );
}

pub unsafe fn create_render_target(
    gl: &glow::Context,
    w: i32,
    h: i32,
    format: PixelFormat,
    depth: bool,
) -> Result<GlTarget, EngineError> {
    let fmt = gl_format(format);
    let fbo = gl
        .create_framebuffer()
        .map_err(|e| EngineError::GlCreate(format!("create_framebuffer failed: {e:?}")))?;
    let tex = gl
        .create_texture()
        .map_err(|e| EngineError::GlCreate(format!("create_texture failed: {e:?}")))?;

    let (ww, hh) = (w.max(1), h.max(1));
    gl.bind_texture(glow::TEXTURE_2D, Some(tex));
    gl.tex_parameter_i32(
        glow::TEXTURE_2D,
        glow::TEXTURE_MIN_FILTER,
        glow::LINEAR as i32,
    );
    gl.tex_parameter_i32(
        glow::TEXTURE_2D,
        glow::TEXTURE_MAG_FILTER,
        glow::LINEAR as i32,
    );
    gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_WRAP_S, glow::REPEAT as i32);
    gl.tex_parameter_i32(glow::TEXTURE_2D, glow::TEXTURE_WRAP_T, glow::REPEAT as i32);
    tex_storage_2d(gl, fmt, ww, hh);

    gl.bind_framebuffer(glow::FRAMEBUFFER, Some(fbo));
    gl.framebuffer_texture_2d(
        glow::FRAMEBUFFER,
        glow::COLOR_ATTACHMENT0,
        glow::TEXTURE_2D,
        Some(tex),
        0,
    );

    let depth_rb = if depth {
        let rb = gl
            .create_renderbuffer()
            .map_err(|e| EngineError::GlCreate(format!("create_renderbuffer failed: {e:?}")))?;
        gl.bind_renderbuffer(glow::RENDERBUFFER, Some(rb));
        gl.renderbuffer_storage(glow::RENDERBUFFER, glow::DEPTH_COMPONENT24, ww, hh);
        gl.framebuffer_renderbuffer(
            glow::FRAMEBUFFER,
            glow::DEPTH_ATTACHMENT,
            glow::RENDERBUFFER,
            Some(rb),
        );
        gl.bind_renderbuffer(glow::RENDERBUFFER, None);
        Some(rb)
    } else {
        None
    };

    let status = gl.check_framebuffer_status(glow::FRAMEBUFFER);
    if status != glow::FRAMEBUFFER_COMPLETE {
        gl.bind_framebuffer(glow::FRAMEBUFFER, None);
        gl.bind_texture(glow::TEXTURE_2D, None);
        gl.delete_framebuffer(fbo);
        gl.delete_texture(tex);
        if let Some(rb) = depth_rb {
            gl.delete_renderbuffer(rb);
        }
        return Err(EngineError::GlCreate(format!(
            "framebuffer incomplete: 0x{status:x}"
        )));
    }

    gl.bind_framebuffer(glow::FRAMEBUFFER, None);
    gl.bind_texture(glow::TEXTURE_2D, None);

    Ok(GlTarget {
        fbo,
        tex,
        depth: depth_rb,
        w: ww,
        h: hh,
        format,
        cube: false,
    })
}

/// Cube targets allocate all six faces up front; the FBO gets its face
/// attachment swapped at render time.
pub unsafe fn create_cube_target(
    gl: &glow::Context,
    size: i32,
    format: PixelFormat,
) -> Result<GlTarget, EngineError> {
    let fmt = gl_format(format);
    let fbo = gl
        .create_framebuffer()
        .map_err(|e| EngineError::GlCreate(format!("create_framebuffer failed: {e:?}")))?;
    let tex = gl
        .create_texture()
        .map_err(|e| EngineError::GlCreate(format!("create_texture failed: {e:?}")))?;

    let s = size.max(1);
    gl.bind_texture(glow::TEXTURE_CUBE_MAP, Some(tex));
    gl.tex_parameter_i32(
        glow::TEXTURE_CUBE_MAP,
        glow::TEXTURE_MIN_FILTER,
        glow::LINEAR as i32,
    );
    gl.tex_parameter_i32(
        glow::TEXTURE_CUBE_MAP,
        glow::TEXTURE_MAG_FILTER,
        glow::LINEAR as i32,
    );
    gl.tex_parameter_i32(
        glow::TEXTURE_CUBE_MAP,
        glow::TEXTURE_WRAP_S,
        glow::CLAMP_TO_EDGE as i32,
    );
    gl.tex_parameter_i32(
        glow::TEXTURE_CUBE_MAP,
        glow::TEXTURE_WRAP_T,
        glow::CLAMP_TO_EDGE as i32,
    );
    for face in 0..6 {
        gl.tex_image_2d(
            glow::TEXTURE_CUBE_MAP_POSITIVE_X + face,
            0,
            fmt.internal,
            s,
            s,
            0,
            fmt.format,
            fmt.ty,
            None,
        );
    }

    gl.bind_framebuffer(glow::FRAMEBUFFER, Some(fbo));
    gl.framebuffer_texture_2d(
        glow::FRAMEBUFFER,
        glow::COLOR_ATTACHMENT0,
        glow::TEXTURE_CUBE_MAP_POSITIVE_X,
        Some(tex),
        0,
    );
    let status = gl.check_framebuffer_status(glow::FRAMEBUFFER);
    if status != glow::FRAMEBUFFER_COMPLETE {
        gl.bind_framebuffer(glow::FRAMEBUFFER, None);
        gl.bind_texture(glow::TEXTURE_CUBE_MAP, None);
        gl.delete_framebuffer(fbo);
        gl.delete_texture(tex);
        return Err(EngineError::GlCreate(format!(
            "cube framebuffer incomplete: 0x{status:x}"
        )));
    }
    gl.bind_framebuffer(glow::FRAMEBUFFER, None);
    gl.bind_texture(glow::TEXTURE_CUBE_MAP, None);

    Ok(GlTarget {
        fbo,
        tex,
        depth: None,
        w: s,
        h: s,
        format,
        cube: true,
    })
}

/// Reallocates the target's storage at a new size, keeping the same GL ids so
/// interactive resizes never accumulate dead handles.
pub unsafe fn resize_target(
    gl: &glow::Context,
    t: &mut GlTarget,
    w: i32,
    h: i32,
) -> Result<(), EngineError> {
    let fmt = gl_format(t.format);
    t.w = w.max(1);
    t.h = if t.cube { t.w } else { h.max(1) };
    if t.cube {
        gl.bind_texture(glow::TEXTURE_CUBE_MAP, Some(t.tex));
        for face in 0..6 {
            gl.tex_image_2d(
                glow::TEXTURE_CUBE_MAP_POSITIVE_X + face,
                0,
                fmt.internal,
                t.w,
                t.w,
                0,
                fmt.format,
                fmt.ty,
                None,
            );
        }
        gl.bind_texture(glow::TEXTURE_CUBE_MAP, None);
    } else {
        gl.bind_texture(glow::TEXTURE_2D, Some(t.tex));
        tex_storage_2d(gl, fmt, t.w, t.h);
        gl.bind_texture(glow::TEXTURE_2D, None);
        if let Some(rb) = t.depth {
            gl.bind_renderbuffer(glow::RENDERBUFFER, Some(rb));
            gl.renderbuffer_storage(glow::RENDERBUFFER, glow::DEPTH_COMPONENT24, t.w, t.h);
            gl.bind_renderbuffer(glow::RENDERBUFFER, None);
        }
    }
    Ok(())
}

unsafe fn upload_pixels(
    gl: &glow::Context,
    t: &GlTarget,
    image: &Image,
    cube_face: Option<u8>,
) -> Result<(), EngineError> {
    let fmt = gl_format(image.format());
    match (t.cube, cube_face, image.is_cube()) {
        (false, None, false) => {
            gl.bind_texture(glow::TEXTURE_2D, Some(t.tex));
            gl.tex_image_2d(
                glow::TEXTURE_2D,
                0,
                fmt.internal,
                image.width() as i32,
                image.height() as i32,
                0,
                fmt.format,
                fmt.ty,
                Some(image.bytes()),
            );
            gl.bind_texture(glow::TEXTURE_2D, None);
            Ok(())
        }
        (true, Some(face), false) if face < 6 => {
            gl.bind_texture(glow::TEXTURE_CUBE_MAP, Some(t.tex));
            gl.tex_image_2d(
                glow::TEXTURE_CUBE_MAP_POSITIVE_X + face as u32,
                0,
                fmt.internal,
                image.width() as i32,
                image.height() as i32,
                0,
                fmt.format,
                fmt.ty,
                Some(image.bytes()),
            );
            gl.bind_texture(glow::TEXTURE_CUBE_MAP, None);
            Ok(())
        }
        (true, None, true) => {
            gl.bind_texture(glow::TEXTURE_CUBE_MAP, Some(t.tex));
            for face in 0..6u8 {
                for mip in 0..image.num_mips() {
                    let (w, h) = image.mip_dimensions(mip);
                    let off = image.face_mip_offset(face, mip);
                    let len = (w as usize) * (h as usize) * image.format().bytes_per_pixel();
                    gl.tex_image_2d(
                        glow::TEXTURE_CUBE_MAP_POSITIVE_X + face as u32,
                        mip as i32,
                        fmt.internal,
                        w as i32,
                        h as i32,
                        0,
                        fmt.format,
                        fmt.ty,
                        Some(&image.bytes()[off..off + len]),
                    );
                }
            }
            gl.bind_texture(glow::TEXTURE_CUBE_MAP, None);
            Ok(())
        }
        _ => Err(EngineError::other(
            "upload: image layout does not match target (2D vs cube)",
        )),
    }
}

unsafe fn readback_pixels(gl: &glow::Context, t: &GlTarget) -> Result<Image, EngineError> {
    let fmt = gl_format(t.format);
    if t.cube {
        let mut img = Image::with_layout(t.w as u32, t.h as u32, t.format, 1, 6);
        let face_len = (t.w as usize) * (t.h as usize) * t.format.bytes_per_pixel();
        gl.bind_framebuffer(glow::FRAMEBUFFER, Some(t.fbo));
        for face in 0..6u8 {
            gl.framebuffer_texture_2d(
                glow::FRAMEBUFFER,
                glow::COLOR_ATTACHMENT0,
                glow::TEXTURE_CUBE_MAP_POSITIVE_X + face as u32,
                Some(t.tex),
                0,
            );
            let off = img.face_mip_offset(face, 0);
            let buf = &mut img.bytes_mut()[off..off + face_len];
            gl.read_pixels(
                0,
                0,
                t.w,
                t.h,
                fmt.format,
                fmt.ty,
                glow::PixelPackData::Slice(buf),
            );
        }
        gl.bind_framebuffer(glow::FRAMEBUFFER, None);
        Ok(img)
    } else {
        let mut img = Image::new(t.w as u32, t.h as u32, t.format);
        gl.bind_framebuffer(glow::FRAMEBUFFER, Some(t.fbo));
        gl.read_pixels(
            0,
            0,
            t.w,
            t.h,
            fmt.format,
            fmt.ty,
            glow::PixelPackData::Slice(img.bytes_mut()),
        );
        gl.bind_framebuffer(glow::FRAMEBUFFER, None);
        Ok(img)
    }
}

pub unsafe fn compile_program(
    gl: &glow::Context,
    vert_src: &str,
    frag_src: &str,
) -> Result<glow::NativeProgram, EngineError> {
    let vs = gl
        .create_shader(glow::VERTEX_SHADER)
        .map_err(|e| EngineError::GlCreate(format!("create_shader(VS) failed: {e:?}")))?;
    gl.shader_source(vs, vert_src);
    gl.compile_shader(vs);
    if !gl.get_shader_compile_status(vs) {
        let log = gl.get_shader_info_log(vs);
        gl.delete_shader(vs);
        return Err(EngineError::VertexCompile(log));
    }

    let fs = gl
        .create_shader(glow::FRAGMENT_SHADER)
        .map_err(|e| EngineError::GlCreate(format!("create_shader(FS) failed: {e:?}")))?;
    gl.shader_source(fs, frag_src);
    gl.compile_shader(fs);
    if !gl.get_shader_compile_status(fs) {
        let log = gl.get_shader_info_log(fs);
        gl.delete_shader(vs);
        gl.delete_shader(fs);
        return Err(EngineError::FragmentCompile(log));
    }

    let program = gl
        .create_program()
        .map_err(|e| EngineError::GlCreate(format!("create_program failed: {e:?}")))?;
    gl.attach_shader(program, vs);
    gl.attach_shader(program, fs);
    gl.link_program(program);

    gl.detach_shader(program, vs);
    gl.detach_shader(program, fs);
    gl.delete_shader(vs);
    gl.delete_shader(fs);

    if !gl.get_program_link_status(program) {
        let log = gl.get_program_info_log(program);
        gl.delete_program(program);
        return Err(EngineError::Link(log));
    }

    Ok(program)
}

pub unsafe fn compile_compute_program(
    gl: &glow::Context,
    src: &str,
) -> Result<glow::NativeProgram, EngineError> {
    let cs = gl
        .create_shader(glow::COMPUTE_SHADER)
        .map_err(|e| EngineError::GlCreate(format!("create_shader(CS) failed: {e:?}")))?;
    gl.shader_source(cs, src);
    gl.compile_shader(cs);
    if !gl.get_shader_compile_status(cs) {
        let log = gl.get_shader_info_log(cs);
        gl.delete_shader(cs);
        return Err(EngineError::ComputeCompile(log));
    }
    let program = gl
        .create_program()
        .map_err(|e| EngineError::GlCreate(format!("create_program failed: {e:?}")))?;
    gl.attach_shader(program, cs);
    gl.link_program(program);
    gl.detach_shader(program, cs);
    gl.delete_shader(cs);
    if !gl.get_program_link_status(program) {
        let log = gl.get_program_info_log(program);
        gl.delete_program(program);
        return Err(EngineError::Link(log));
    }
    Ok(program)
}

// --- Fullscreen draw helper ---
#[derive(Debug)]
pub struct FullscreenTriangle {
    vao: glow::NativeVertexArray,
    vbo: glow::NativeBuffer,
}

impl FullscreenTriangle {
    pub unsafe fn new(gl: &glow::Context) -> Result<Self, EngineError> {
        let verts: [f32; 12] = [
            -1.0, -1.0, 0.0, 0.0, 3.0, -1.0, 2.0, 0.0, -1.0, 3.0, 0.0, 2.0,
        ];

        let vao = gl
            .create_vertex_array()
            .map_err(|e| EngineError::GlCreate(format!("create_vertex_array: {e}")))?;
        let vbo = gl
            .create_buffer()
            .map_err(|e| EngineError::GlCreate(format!("create_buffer: {e}")))?;

        gl.bind_vertex_array(Some(vao));
        gl.bind_buffer(glow::ARRAY_BUFFER, Some(vbo));
        gl.buffer_data_u8_slice(
            glow::ARRAY_BUFFER,
            bytemuck::cast_slice(&verts),
            glow::STATIC_DRAW,
        );

        gl.enable_vertex_attrib_array(0);
        gl.vertex_attrib_pointer_f32(0, 2, glow::FLOAT, false, 4 * 4, 0);
        gl.enable_vertex_attrib_array(1);
        gl.vertex_attrib_pointer_f32(1, 2, glow::FLOAT, false, 4 * 4, 2 * 4);

        gl.bind_buffer(glow::ARRAY_BUFFER, None);
        gl.bind_vertex_array(None);

        Ok(Self { vao, vbo })
    }

    pub unsafe fn draw(&self, gl: &glow::Context) {
        gl.bind_vertex_array(Some(self.vao));
        gl.draw_arrays(glow::TRIANGLES, 0, 3);
        gl.bind_vertex_array(None);
    }

    pub unsafe fn destroy(&mut self, gl: &glow::Context) {
        gl.delete_vertex_array(self.vao);
        gl.delete_buffer(self.vbo);
    }
}

pub(crate) fn hash_str(s: &str) -> u64 {
    let mut h = std::collections::hash_map::DefaultHasher::new();
    s.hash(&mut h);
    h.finish()
}
