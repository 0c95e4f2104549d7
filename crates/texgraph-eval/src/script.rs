//! Script backend.
//!
//! The engine never embeds an interpreter; hosts plug one in behind
//! [`ScriptHost`] and the backend adapts it to the common dispatch contract.
//! A script invocation receives the same generated call string the GPU
//! backends key their caches on, so scripted stages participate in the same
//! dirtiness scheme.

use texgraph_core::EngineError;
use texgraph_image::Image;

use crate::backend::{Backend, BackendRun, EvalCtx, EvalRequest};
use crate::stage::StageOutput;

/// One scripted-stage invocation.
#[derive(Debug, Clone, Copy)]
pub struct ScriptCall<'a> {
    /// Node type name; the host maps it to a script entry point.
    pub node: &'a str,
    /// Full generated call expression, parameters serialized.
    pub call: &'a str,
    pub width: u32,
    pub height: u32,
    pub local_time: i32,
}

pub trait ScriptHost {
    /// Executes the script for one stage. Returning an image replaces the
    /// stage's output; returning `None` leaves it untouched (side-effect-only
    /// scripts).
    fn run(&mut self, call: &ScriptCall<'_>) -> Result<Option<Image>, EngineError>;
}

/// Adapts a [`ScriptHost`] to the backend dispatch contract.
pub struct ScriptBackend {
    host: Box<dyn ScriptHost>,
}

impl std::fmt::Debug for ScriptBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptBackend").finish_non_exhaustive()
    }
}

impl ScriptBackend {
    pub fn new(host: Box<dyn ScriptHost>) -> Self {
        Self { host }
    }
}

impl Backend for ScriptBackend {
    fn evaluate(
        &mut self,
        ctx: &mut EvalCtx<'_>,
        req: &EvalRequest<'_>,
        out: &mut StageOutput,
    ) -> Result<BackendRun, EngineError> {
        let desc = texgraph_nodes::node_desc(req.node_type)?;
        let call = ScriptCall {
            node: desc.name,
            call: req.call,
            width: req.width,
            height: req.height,
            local_time: req.local_time,
        };
        if let Some(img) = self.host.run(&call)? {
            if let Some(tex) = out.tex {
                ctx.store.upload(tex, &img, None)?;
            }
            out.image = img;
        }
        Ok(BackendRun::Done)
    }
}
