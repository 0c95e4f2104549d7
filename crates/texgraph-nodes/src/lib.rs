#![forbid(unsafe_code)]

//! texgraph node-type vocabulary.
//!
//! This crate is **contract-only**: it declares what each node type looks like
//! (inputs, typed parameter fields) and how a raw parameter buffer translates
//! into a backend call expression. It knows nothing about GL or scheduling.
//!
//! The descriptor table drives three things with one source of truth:
//! - parameter buffer sizing and typed access,
//! - the generated call string (which doubles as the recompile cache key),
//! - interactive ranged-parameter editing.
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(missing_debug_implementations)]

pub mod params;
mod stock;

pub use params::{apply_pointer, call_string, zeroed_params, ParamBlock, ParamBlockMut};
pub use stock::NODE_TYPES;

use serde::{Deserialize, Serialize};
use texgraph_core::EngineError;

/// Typed field kinds a node parameter block can contain.
///
/// Angle kinds store radians; degree conversion happens only at the editing
/// boundary (see [`ParamBlock::angle_degrees`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParamKind {
    Float,
    Float2,
    Float3,
    Float4,
    Color4,
    Int,
    Enum,
    /// 8 control points, each a 2-vector.
    Ramp,
    Angle,
    Angle2,
    Angle3,
    Angle4,
}

impl ParamKind {
    /// Fixed byte width of one field of this kind.
    pub fn byte_len(self) -> usize {
        match self {
            ParamKind::Float | ParamKind::Angle | ParamKind::Int | ParamKind::Enum => 4,
            ParamKind::Float2 | ParamKind::Angle2 => 8,
            ParamKind::Float3 | ParamKind::Angle3 => 12,
            ParamKind::Float4 | ParamKind::Color4 | ParamKind::Angle4 => 16,
            ParamKind::Ramp => 64,
        }
    }

    /// Number of f32 lanes, 0 for integer kinds.
    pub fn float_lanes(self) -> usize {
        match self {
            ParamKind::Int | ParamKind::Enum => 0,
            ParamKind::Float | ParamKind::Angle => 1,
            ParamKind::Float2 | ParamKind::Angle2 => 2,
            ParamKind::Float3 | ParamKind::Angle3 => 3,
            ParamKind::Float4 | ParamKind::Color4 | ParamKind::Angle4 => 4,
            ParamKind::Ramp => 16,
        }
    }

    pub fn is_angle(self) -> bool {
        matches!(
            self,
            ParamKind::Angle | ParamKind::Angle2 | ParamKind::Angle3 | ParamKind::Angle4
        )
    }
}

/// One typed field in a node's parameter block.
///
/// `range_x`/`range_y` of `(0.0, 0.0)` mean "unranged"; anything else enables
/// pointer-driven editing over that axis (min and max may be reversed).
#[derive(Debug, Clone, Copy)]
pub struct ParamDesc {
    pub name: &'static str,
    pub kind: ParamKind,
    pub range_x: (f32, f32),
    pub range_y: (f32, f32),
    pub enum_labels: &'static [&'static str],
}

impl ParamDesc {
    pub const fn new(name: &'static str, kind: ParamKind) -> Self {
        Self {
            name,
            kind,
            range_x: (0.0, 0.0),
            range_y: (0.0, 0.0),
            enum_labels: &[],
        }
    }

    pub const fn ranged(
        name: &'static str,
        kind: ParamKind,
        range_x: (f32, f32),
        range_y: (f32, f32),
    ) -> Self {
        Self {
            name,
            kind,
            range_x,
            range_y,
            enum_labels: &[],
        }
    }

    pub const fn enumeration(name: &'static str, labels: &'static [&'static str]) -> Self {
        Self {
            name,
            kind: ParamKind::Enum,
            range_x: (0.0, 0.0),
            range_y: (0.0, 0.0),
            enum_labels: labels,
        }
    }

    pub fn has_range_x(&self) -> bool {
        self.range_x != (0.0, 0.0)
    }

    pub fn has_range_y(&self) -> bool {
        self.range_y != (0.0, 0.0)
    }
}

/// A node type: its name (also the generated GLSL function name), input slot
/// names, and ordered parameter fields. Field order is fixed and never
/// reordered at runtime.
#[derive(Debug, Clone, Copy)]
pub struct NodeDesc {
    pub name: &'static str,
    pub inputs: &'static [&'static str],
    pub params: &'static [ParamDesc],
}

impl NodeDesc {
    /// Total parameter buffer size: the sum of per-field sizes, in order.
    pub fn param_block_size(&self) -> usize {
        self.params.iter().map(|p| p.kind.byte_len()).sum()
    }

    /// Byte offset of field `index` within the block.
    pub fn field_offset(&self, index: usize) -> usize {
        self.params[..index].iter().map(|p| p.kind.byte_len()).sum()
    }
}

/// Looks up a node type descriptor by type index.
pub fn node_desc(node_type: usize) -> Result<&'static NodeDesc, EngineError> {
    NODE_TYPES
        .get(node_type)
        .ok_or_else(|| EngineError::UnknownNodeType(format!("#{node_type}")))
}

/// Resolves a node type index from its name.
pub fn find_node_type(name: &str) -> Option<usize> {
    NODE_TYPES.iter().position(|d| d.name == name)
}
