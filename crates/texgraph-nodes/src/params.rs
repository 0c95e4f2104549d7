//! Parameter-block access and call-string generation.
//!
//! A parameter block is a flat byte buffer whose layout is dictated entirely
//! by the node's descriptor: fields packed in declaration order, each with the
//! fixed width of its kind. The generated call string is the textual backend
//! invocation and doubles as the recompilation cache key, so it must be a pure
//! deterministic function of `(node type, bytes)`.

use std::fmt::Write as _;

use texgraph_core::EngineError;

use crate::{node_desc, NodeDesc, ParamKind};

/// Allocates a zero-initialized parameter buffer for a node type.
pub fn zeroed_params(node_type: usize) -> Result<Vec<u8>, EngineError> {
    Ok(vec![0; node_desc(node_type)?.param_block_size()])
}

/// Read-only typed view over a parameter buffer.
#[derive(Debug, Clone, Copy)]
pub struct ParamBlock<'a> {
    desc: &'static NodeDesc,
    bytes: &'a [u8],
}

impl<'a> ParamBlock<'a> {
    pub fn new(desc: &'static NodeDesc, bytes: &'a [u8]) -> Result<Self, EngineError> {
        if bytes.len() != desc.param_block_size() {
            return Err(EngineError::ParameterSizeMismatch {
                node_type: desc.name,
                expected: desc.param_block_size(),
                got: bytes.len(),
            });
        }
        Ok(Self { desc, bytes })
    }

    pub fn desc(&self) -> &'static NodeDesc {
        self.desc
    }

    /// Float lane `lane` of field `field`. Stored value (radians for angles).
    pub fn float(&self, field: usize, lane: usize) -> f32 {
        let off = self.desc.field_offset(field) + lane * 4;
        bytemuck::pod_read_unaligned(&self.bytes[off..off + 4])
    }

    pub fn int(&self, field: usize) -> i32 {
        let off = self.desc.field_offset(field);
        bytemuck::pod_read_unaligned(&self.bytes[off..off + 4])
    }

    /// Angle lane presented in degrees (the editing boundary).
    pub fn angle_degrees(&self, field: usize, lane: usize) -> f32 {
        self.float(field, lane).to_degrees()
    }
}

/// Mutable typed view over a parameter buffer.
#[derive(Debug)]
pub struct ParamBlockMut<'a> {
    desc: &'static NodeDesc,
    bytes: &'a mut [u8],
}

impl<'a> ParamBlockMut<'a> {
    pub fn new(desc: &'static NodeDesc, bytes: &'a mut [u8]) -> Result<Self, EngineError> {
        if bytes.len() != desc.param_block_size() {
            return Err(EngineError::ParameterSizeMismatch {
                node_type: desc.name,
                expected: desc.param_block_size(),
                got: bytes.len(),
            });
        }
        Ok(Self { desc, bytes })
    }

    pub fn set_float(&mut self, field: usize, lane: usize, value: f32) {
        let off = self.desc.field_offset(field) + lane * 4;
        self.bytes[off..off + 4].copy_from_slice(bytemuck::bytes_of(&value));
    }

    pub fn set_int(&mut self, field: usize, value: i32) {
        let off = self.desc.field_offset(field);
        self.bytes[off..off + 4].copy_from_slice(bytemuck::bytes_of(&value));
    }

    /// Writes an angle lane given in degrees; radians are what gets stored.
    pub fn set_angle_degrees(&mut self, field: usize, lane: usize, degrees: f32) {
        self.set_float(field, lane, degrees.to_radians());
    }
}

/// Generates the backend call expression for a stage's current parameters.
///
/// Shape: `Name(vUV, field1, field2, ...)`. Fields serialize per kind: scalar
/// literals, `vecN(...)` literals, integer literals, or the fixed 8-point
/// `vec2[](...)` array for ramps. Floats print with 6 fractional digits so
/// identical buffers always produce identical strings.
pub fn call_string(node_type: usize, params: &[u8]) -> Result<String, EngineError> {
    let desc = node_desc(node_type)?;
    let block = ParamBlock::new(desc, params)?;

    let mut call = String::with_capacity(64);
    call.push_str(desc.name);
    call.push_str("(vUV");
    for (i, p) in desc.params.iter().enumerate() {
        match p.kind {
            ParamKind::Float | ParamKind::Angle => {
                let _ = write!(call, ",{:.6}", block.float(i, 0));
            }
            ParamKind::Float2 | ParamKind::Angle2 => {
                let _ = write!(
                    call,
                    ",vec2({:.6}, {:.6})",
                    block.float(i, 0),
                    block.float(i, 1)
                );
            }
            ParamKind::Float3 | ParamKind::Angle3 => {
                let _ = write!(
                    call,
                    ",vec3({:.6}, {:.6}, {:.6})",
                    block.float(i, 0),
                    block.float(i, 1),
                    block.float(i, 2)
                );
            }
            ParamKind::Float4 | ParamKind::Color4 | ParamKind::Angle4 => {
                let _ = write!(
                    call,
                    ",vec4({:.6}, {:.6}, {:.6}, {:.6})",
                    block.float(i, 0),
                    block.float(i, 1),
                    block.float(i, 2),
                    block.float(i, 3)
                );
            }
            ParamKind::Int | ParamKind::Enum => {
                let _ = write!(call, ",{}", block.int(i));
            }
            ParamKind::Ramp => {
                call.push_str(",vec2[](");
                for k in 0..8 {
                    if k > 0 {
                        call.push(',');
                    }
                    let _ = write!(
                        call,
                        "vec2({:.6},{:.6})",
                        block.float(i, k * 2),
                        block.float(i, k * 2 + 1)
                    );
                }
                call.push(')');
            }
        }
    }
    call.push(')');
    Ok(call)
}

/// Applies a normalized pointer position to every ranged field.
///
/// For each field with a declared X range, lane 0 becomes
/// `min + rx * (max - min)`; likewise lane 1 for the Y range. Unranged fields
/// are untouched. Returns true if anything was written.
pub fn apply_pointer(
    node_type: usize,
    params: &mut [u8],
    rx: f32,
    ry: f32,
) -> Result<bool, EngineError> {
    let desc = node_desc(node_type)?;
    let mut block = ParamBlockMut::new(desc, params)?;
    let mut touched = false;
    for (i, p) in desc.params.iter().enumerate() {
        if p.kind.float_lanes() == 0 {
            continue;
        }
        if p.has_range_x() {
            let (lo, hi) = p.range_x;
            block.set_float(i, 0, lo + rx * (hi - lo));
            touched = true;
        }
        if p.has_range_y() && p.kind.float_lanes() > 1 {
            let (lo, hi) = p.range_y;
            block.set_float(i, 1, lo + ry * (hi - lo));
            touched = true;
        }
    }
    Ok(touched)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::find_node_type;

    #[test]
    fn typed_round_trip() {
        let ty = find_node_type("Transform").unwrap();
        let desc = node_desc(ty).unwrap();
        let mut bytes = zeroed_params(ty).unwrap();
        {
            let mut w = ParamBlockMut::new(desc, &mut bytes).unwrap();
            w.set_float(0, 0, 0.25);
            w.set_float(0, 1, -0.5);
            w.set_float(1, 0, 1.5);
            w.set_float(2, 0, 2.0);
        }
        let r = ParamBlock::new(desc, &bytes).unwrap();
        assert_eq!(r.float(0, 0), 0.25);
        assert_eq!(r.float(0, 1), -0.5);
        assert_eq!(r.float(1, 0), 1.5);
        assert_eq!(r.float(2, 0), 2.0);
    }

    #[test]
    fn call_string_is_deterministic_and_byte_sensitive() {
        let ty = find_node_type("Circle").unwrap();
        let mut a = zeroed_params(ty).unwrap();
        let b = zeroed_params(ty).unwrap();
        assert_eq!(call_string(ty, &a).unwrap(), call_string(ty, &b).unwrap());

        // Sign-bit flip: 0.000000 becomes -0.000000 in the rendered call.
        a[3] ^= 0x80;
        assert_ne!(call_string(ty, &a).unwrap(), call_string(ty, &b).unwrap());
    }

    #[test]
    fn call_string_shape() {
        let ty = find_node_type("Circle").unwrap();
        let desc = node_desc(ty).unwrap();
        let mut bytes = zeroed_params(ty).unwrap();
        ParamBlockMut::new(desc, &mut bytes)
            .unwrap()
            .set_float(0, 0, 0.5);
        assert_eq!(
            call_string(ty, &bytes).unwrap(),
            "Circle(vUV,0.500000,0.000000)"
        );
    }

    #[test]
    fn enum_serializes_as_integer() {
        let ty = find_node_type("Blend").unwrap();
        let desc = node_desc(ty).unwrap();
        let mut bytes = zeroed_params(ty).unwrap();
        ParamBlockMut::new(desc, &mut bytes).unwrap().set_int(2, 3);
        let call = call_string(ty, &bytes).unwrap();
        assert!(call.ends_with(",3)"), "{call}");
    }

    #[test]
    fn ramp_serializes_all_eight_points() {
        let ty = find_node_type("Ramp").unwrap();
        let bytes = zeroed_params(ty).unwrap();
        let call = call_string(ty, &bytes).unwrap();
        assert_eq!(call.matches("vec2(").count(), 8);
        assert!(call.starts_with("Ramp(vUV,vec2[]("));
    }

    #[test]
    fn angle_degree_round_trip() {
        let ty = find_node_type("Transform").unwrap();
        let desc = node_desc(ty).unwrap();
        let mut bytes = zeroed_params(ty).unwrap();
        ParamBlockMut::new(desc, &mut bytes)
            .unwrap()
            .set_angle_degrees(1, 0, 90.0);
        let r = ParamBlock::new(desc, &bytes).unwrap();
        assert!((r.float(1, 0) - std::f32::consts::FRAC_PI_2).abs() < 1e-5);
        assert!((r.angle_degrees(1, 0) - 90.0).abs() < 1e-4);
    }

    #[test]
    fn pointer_hits_range_bounds_exactly() {
        let ty = find_node_type("Circle").unwrap();
        let desc = node_desc(ty).unwrap();
        let mut bytes = zeroed_params(ty).unwrap();

        apply_pointer(ty, &mut bytes, 0.0, 0.0).unwrap();
        assert_eq!(ParamBlock::new(desc, &bytes).unwrap().float(0, 0), 0.0);

        apply_pointer(ty, &mut bytes, 1.0, 0.0).unwrap();
        assert_eq!(ParamBlock::new(desc, &bytes).unwrap().float(0, 0), 1.0);

        apply_pointer(ty, &mut bytes, 0.25, 0.0).unwrap();
        assert_eq!(ParamBlock::new(desc, &bytes).unwrap().float(0, 0), 0.25);
    }

    #[test]
    fn pointer_respects_reversed_ranges() {
        // Transform's Translate range runs 1 -> 0 on both axes.
        let ty = find_node_type("Transform").unwrap();
        let desc = node_desc(ty).unwrap();
        let mut bytes = zeroed_params(ty).unwrap();
        apply_pointer(ty, &mut bytes, 0.0, 1.0).unwrap();
        let r = ParamBlock::new(desc, &bytes).unwrap();
        assert_eq!(r.float(0, 0), 1.0);
        assert_eq!(r.float(0, 1), 0.0);
    }

    #[test]
    fn unranged_fields_are_untouched_by_pointer() {
        let ty = find_node_type("Circle").unwrap();
        let desc = node_desc(ty).unwrap();
        let mut bytes = zeroed_params(ty).unwrap();
        ParamBlockMut::new(desc, &mut bytes)
            .unwrap()
            .set_float(1, 0, 7.0);
        apply_pointer(ty, &mut bytes, 0.5, 0.5).unwrap();
        assert_eq!(ParamBlock::new(desc, &bytes).unwrap().float(1, 0), 7.0);
    }
}
