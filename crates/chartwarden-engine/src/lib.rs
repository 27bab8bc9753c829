//! Chartwarden Engine - template rendering for charts
//!
//! Renders a chart's MiniJinja templates (with subchart conditions and
//! value imports) into Kubernetes manifests. The `Renderer` trait is the
//! seam other layers compose on, e.g. to inject owner references.

pub mod engine;
pub mod error;
mod filters;
mod functions;

pub use engine::{Engine, RenderedChart, Renderer};
pub use error::{EngineError, Result};
