//! Cube-map gloss prefiltering.
//!
//! Builds a mip chain on a cube target where each level holds a rougher
//! filtered version of the level above it, face by face. Consumers pick a
//! gloss level by sampling with an explicit LOD. The host controls the
//! lighting model, the gloss-to-specular-power mapping, and whether the base
//! level is left untouched.

use glow::HasContext;

use texgraph_core::EngineError;

use crate::{compile_program, glsl::FULLSCREEN_VERT, FullscreenTriangle, GlTarget};

/// Weighting model used when accumulating filter taps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LightingModel {
    Phong,
    PhongBrdf,
    Blinn,
    BlinnBrdf,
}

impl LightingModel {
    fn shader_index(self) -> i32 {
        match self {
            LightingModel::Phong => 0,
            LightingModel::PhongBrdf => 1,
            LightingModel::Blinn => 2,
            LightingModel::BlinnBrdf => 3,
        }
    }
}

/// Host-facing knobs for [`prefilter_cube`].
///
/// Per-mip gloss runs linearly from 1 at the base to 0 at the last level and
/// maps to a specular power as `2^(gloss_scale * gloss + gloss_bias)`. With
/// `exclude_base` the base level is left exactly as rendered.
#[derive(Debug, Clone, Copy)]
pub struct PrefilterParams {
    pub lighting_model: LightingModel,
    pub exclude_base: bool,
    pub gloss_scale: f32,
    pub gloss_bias: f32,
}

impl Default for PrefilterParams {
    fn default() -> Self {
        Self {
            lighting_model: LightingModel::Blinn,
            exclude_base: true,
            gloss_scale: 10.0,
            gloss_bias: 1.0,
        }
    }
}

fn specular_power(gloss: f32, scale: f32, bias: f32) -> f32 {
    (scale * gloss + bias).exp2().min(2048.0)
}

const PREFILTER_FRAG: &str = r#"#version 330 core
in vec2 v_uv;
out vec4 FragColor;
uniform samplerCube uSource;
uniform int uFace;
uniform int uModel;
uniform float uSpread;
uniform float uSpecularPower;
uniform float uSourceLod;

vec3 face_direction(vec2 uv, int face)
{
    vec2 c = uv * 2.0 - 1.0;
    if (face == 0) return vec3( 1.0, -c.y, -c.x);
    if (face == 1) return vec3(-1.0, -c.y,  c.x);
    if (face == 2) return vec3( c.x,  1.0,  c.y);
    if (face == 3) return vec3( c.x, -1.0, -c.y);
    if (face == 4) return vec3( c.x, -c.y,  1.0);
    return vec3(-c.x, -c.y, -1.0);
}

float sample_weight(vec3 n, vec3 dir)
{
    float nd = max(dot(n, dir), 0.0);
    // Blinn variants weight by the half vector, Phong by the direction; the
    // Brdf variants fold in the cosine term.
    float base = (uModel >= 2) ? max(dot(n, normalize(n + dir)), 0.0) : nd;
    float w = pow(base, uSpecularPower);
    if (uModel == 1 || uModel == 3) w *= nd;
    return w;
}

void main()
{
    vec3 n = normalize(face_direction(v_uv, uFace));
    vec3 up = abs(n.y) < 0.99 ? vec3(0.0, 1.0, 0.0) : vec3(1.0, 0.0, 0.0);
    vec3 tx = normalize(cross(up, n));
    vec3 ty = cross(n, tx);

    vec4 acc = vec4(0.0);
    float total = 0.0;
    for (int i = -3; i <= 3; i++)
    {
        for (int j = -3; j <= 3; j++)
        {
            vec3 dir = normalize(n + (tx * float(i) + ty * float(j)) * uSpread);
            float w = sample_weight(n, dir);
            acc += textureLod(uSource, dir, uSourceLod) * w;
            total += w;
        }
    }
    FragColor = acc / max(total, 1e-5);
}
"#;

/// Prefilters `target` (a cube target) into `mips` gloss levels.
///
/// Levels are filtered coarse-from-fine, each sampling the level above it so
/// no level reads the storage it writes. With `params.exclude_base` the base
/// level stays as rendered and filtering starts at level 1; otherwise the
/// base is re-filtered from its generated mip. The target must have been
/// allocated as a cube.
pub unsafe fn prefilter_cube(
    gl: &glow::Context,
    fs_tri: &FullscreenTriangle,
    target: &GlTarget,
    mips: u8,
    params: PrefilterParams,
) -> Result<(), EngineError> {
    if !target.cube {
        return Err(EngineError::other("prefilter_cube: target is not a cube"));
    }
    let mips = mips.max(1);
    let program = compile_program(gl, FULLSCREEN_VERT, PREFILTER_FRAG)?;

    // Allocate mip storage and let LOD sampling work across the chain.
    gl.bind_texture(glow::TEXTURE_CUBE_MAP, Some(target.tex));
    gl.generate_mipmap(glow::TEXTURE_CUBE_MAP);
    gl.tex_parameter_i32(
        glow::TEXTURE_CUBE_MAP,
        glow::TEXTURE_MIN_FILTER,
        glow::LINEAR_MIPMAP_LINEAR as i32,
    );

    gl.use_program(Some(program));
    gl.bind_framebuffer(glow::FRAMEBUFFER, Some(target.fbo));
    gl.disable(glow::DEPTH_TEST);
    gl.disable(glow::BLEND);

    gl.active_texture(glow::TEXTURE0);
    gl.bind_texture(glow::TEXTURE_CUBE_MAP, Some(target.tex));
    if let Some(loc) = gl.get_uniform_location(program, "uSource") {
        gl.uniform_1_i32(Some(&loc), 0);
    }
    if let Some(loc) = gl.get_uniform_location(program, "uModel") {
        gl.uniform_1_i32(Some(&loc), params.lighting_model.shader_index());
    }

    let first_mip = if params.exclude_base { 1 } else { 0 };
    for mip in first_mip..mips {
        let size = (target.w >> mip).max(1);
        let gloss = 1.0 - mip as f32 / (mips - 1).max(1) as f32;
        let power = specular_power(gloss, params.gloss_scale, params.gloss_bias);
        let spread = (1.0 - gloss) * 0.15;
        // The base level (when included) filters from its generated mip.
        let source_lod = if mip == 0 { 1.0 } else { f32::from(mip - 1) };
        gl.viewport(0, 0, size, size);
        if let Some(loc) = gl.get_uniform_location(program, "uSpecularPower") {
            gl.uniform_1_f32(Some(&loc), power);
        }
        if let Some(loc) = gl.get_uniform_location(program, "uSpread") {
            gl.uniform_1_f32(Some(&loc), spread);
        }
        if let Some(loc) = gl.get_uniform_location(program, "uSourceLod") {
            gl.uniform_1_f32(Some(&loc), source_lod);
        }
        for face in 0..6 {
            gl.framebuffer_texture_2d(
                glow::FRAMEBUFFER,
                glow::COLOR_ATTACHMENT0,
                glow::TEXTURE_CUBE_MAP_POSITIVE_X + face,
                Some(target.tex),
                mip as i32,
            );
            if let Some(loc) = gl.get_uniform_location(program, "uFace") {
                gl.uniform_1_i32(Some(&loc), face as i32);
            }
            fs_tri.draw(gl);
        }
    }

    // Restore the base-level attachment.
    gl.framebuffer_texture_2d(
        glow::FRAMEBUFFER,
        glow::COLOR_ATTACHMENT0,
        glow::TEXTURE_CUBE_MAP_POSITIVE_X,
        Some(target.tex),
        0,
    );
    gl.bind_framebuffer(glow::FRAMEBUFFER, None);
    gl.bind_texture(glow::TEXTURE_CUBE_MAP, None);
    gl.delete_program(program);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefilter_shader_is_complete_glsl() {
        assert!(PREFILTER_FRAG.starts_with("#version 330 core"));
        assert!(PREFILTER_FRAG.contains("uniform samplerCube uSource"));
        for uniform in ["uModel", "uSpread", "uSpecularPower", "uSourceLod"] {
            assert!(PREFILTER_FRAG.contains(uniform), "{uniform}");
        }
        for face in 0..5 {
            assert!(PREFILTER_FRAG.contains(&format!("face == {face}")));
        }
    }

    #[test]
    fn gloss_maps_exponentially_to_specular_power() {
        assert_eq!(specular_power(0.0, 10.0, 1.0), 2.0);
        assert_eq!(specular_power(1.0, 10.0, 1.0), 2048.0);
        let mid = specular_power(0.5, 10.0, 1.0);
        assert!(mid > 2.0 && mid < 2048.0);
    }

    #[test]
    fn default_params_leave_the_base_level_alone() {
        let p = PrefilterParams::default();
        assert!(p.exclude_base);
        assert_eq!(p.lighting_model, LightingModel::Blinn);
    }
}
