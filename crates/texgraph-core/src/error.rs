use std::fmt;
use std::path::PathBuf;

/// Engine-level errors used across texgraph crates.
///
/// Contract rule: this type lives in `texgraph-core` and is re-exported by the
/// evaluation and runtime crates.
#[derive(Debug)]
pub enum EngineError {
    // ---- Configuration (caller contract; graph state left unchanged) ----
    UnknownNodeType(String),

    ParameterSizeMismatch {
        node_type: &'static str,
        expected: usize,
        got: usize,
    },

    InputSlotOutOfRange {
        slot: usize,
    },

    StageOutOfRange {
        index: usize,
        count: usize,
    },

    // ---- Backend compile/link (non-fatal per stage) ----
    VertexCompile(String),
    FragmentCompile(String),
    ComputeCompile(String),
    Link(String),

    // ---- Resources ----
    GlCreate(String),

    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    Decode(String),
    Encode(String),

    // ---- Fallback ----
    Other(String),
}

impl EngineError {
    pub fn other<T: Into<String>>(s: T) -> Self {
        EngineError::Other(s.into())
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::UnknownNodeType(name) => write!(f, "unknown node type '{name}'"),
            EngineError::ParameterSizeMismatch {
                node_type,
                expected,
                got,
            } => write!(
                f,
                "parameter buffer for '{node_type}' must be {expected} bytes, got {got}"
            ),
            EngineError::InputSlotOutOfRange { slot } => {
                write!(f, "input slot {slot} out of range (0..8)")
            }
            EngineError::StageOutOfRange { index, count } => {
                write!(f, "stage index {index} out of range ({count} stages)")
            }

            EngineError::VertexCompile(msg) => write!(f, "vertex shader compile error: {msg}"),
            EngineError::FragmentCompile(msg) => write!(f, "fragment shader compile error: {msg}"),
            EngineError::ComputeCompile(msg) => write!(f, "compute shader compile error: {msg}"),
            EngineError::Link(msg) => write!(f, "program link error: {msg}"),

            EngineError::GlCreate(msg) => write!(f, "backend object creation failed: {msg}"),
            EngineError::Io { path, source } => {
                write!(f, "io error at {}: {}", path.display(), source)
            }
            EngineError::Decode(msg) => write!(f, "image decode error: {msg}"),
            EngineError::Encode(msg) => write!(f, "image encode error: {msg}"),

            EngineError::Other(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}
