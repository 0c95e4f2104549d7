//! The stock procedural node library.
//!
//! Type indices are stable: persisted graphs reference nodes by position in
//! this table. Append only.

use crate::{NodeDesc, ParamDesc, ParamKind};

pub const NODE_TYPES: &[NodeDesc] = &[
    NodeDesc {
        name: "Circle",
        inputs: &[],
        params: &[
            ParamDesc::ranged("Radius", ParamKind::Float, (0.0, 1.0), (0.0, 0.0)),
            ParamDesc::new("T", ParamKind::Float),
        ],
    },
    NodeDesc {
        name: "Transform",
        inputs: &["In"],
        params: &[
            ParamDesc::ranged("Translate", ParamKind::Float2, (1.0, 0.0), (1.0, 0.0)),
            ParamDesc::new("Rotation", ParamKind::Angle),
            ParamDesc::new("Scale", ParamKind::Float),
        ],
    },
    NodeDesc {
        name: "Square",
        inputs: &[],
        params: &[ParamDesc::new("Width", ParamKind::Float)],
    },
    NodeDesc {
        name: "Checker",
        inputs: &[],
        params: &[],
    },
    NodeDesc {
        name: "Sine",
        inputs: &["In"],
        params: &[
            ParamDesc::new("Frequency", ParamKind::Float),
            ParamDesc::new("Angle", ParamKind::Angle),
        ],
    },
    NodeDesc {
        name: "SmoothStep",
        inputs: &["In"],
        params: &[
            ParamDesc::new("Low", ParamKind::Float),
            ParamDesc::new("High", ParamKind::Float),
        ],
    },
    NodeDesc {
        name: "Pixelize",
        inputs: &["In"],
        params: &[ParamDesc::new("scale", ParamKind::Float)],
    },
    NodeDesc {
        name: "Blur",
        inputs: &["In"],
        params: &[
            ParamDesc::new("angle", ParamKind::Angle),
            ParamDesc::new("strength", ParamKind::Float),
        ],
    },
    NodeDesc {
        name: "NormalMap",
        inputs: &["In"],
        params: &[ParamDesc::new("spread", ParamKind::Float)],
    },
    NodeDesc {
        name: "LambertMaterial",
        inputs: &["Diffuse", "Normal"],
        params: &[ParamDesc::ranged(
            "view",
            ParamKind::Float2,
            (1.0, 0.0),
            (0.0, 1.0),
        )],
    },
    NodeDesc {
        name: "MADD",
        inputs: &["In"],
        params: &[
            ParamDesc::new("Mul Color", ParamKind::Color4),
            ParamDesc::new("Add Color", ParamKind::Color4),
        ],
    },
    NodeDesc {
        name: "Hexagon",
        inputs: &["In"],
        params: &[],
    },
    NodeDesc {
        name: "Blend",
        inputs: &["A", "B"],
        params: &[
            ParamDesc::new("A", ParamKind::Float4),
            ParamDesc::new("B", ParamKind::Float4),
            ParamDesc::enumeration("Operation", &["Add", "Mul", "Min", "Max"]),
        ],
    },
    NodeDesc {
        name: "Invert",
        inputs: &["In"],
        params: &[],
    },
    NodeDesc {
        name: "CircleSplatter",
        inputs: &["In"],
        params: &[
            ParamDesc::new("Distance", ParamKind::Float2),
            ParamDesc::new("Radius", ParamKind::Float2),
            ParamDesc::new("Angle", ParamKind::Angle2),
            ParamDesc::new("Count", ParamKind::Float),
        ],
    },
    NodeDesc {
        name: "Ramp",
        inputs: &["In"],
        params: &[ParamDesc::new("Ramp", ParamKind::Ramp)],
    },
    NodeDesc {
        name: "Tile",
        inputs: &["In"],
        params: &[
            ParamDesc::new("Scale", ParamKind::Float),
            ParamDesc::new("Offset 0", ParamKind::Float2),
            ParamDesc::new("Offset 1", ParamKind::Float2),
            ParamDesc::new("Overlap", ParamKind::Float2),
        ],
    },
    NodeDesc {
        name: "Color",
        inputs: &[],
        params: &[ParamDesc::new("Color", ParamKind::Color4)],
    },
];
