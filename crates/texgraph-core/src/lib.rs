#![forbid(unsafe_code)]

//! texgraph shared vocabulary.
//!
//! This crate is **contract-only**: no GL handles, no OS policy. It defines the
//! engine-wide error type and the opaque handle used to forward externally-owned
//! objects (scene/renderer) through the engine without interpreting them.
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(missing_debug_implementations)]

pub mod error;

pub use error::EngineError;

/// A capability handle for an object owned by an external subsystem.
///
/// The engine stores and returns these but never dereferences them; the host
/// that minted the handle is the only party that can resolve it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ExternalHandle(pub u64);
