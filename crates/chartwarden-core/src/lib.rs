//! Chartwarden Core - foundational types for the chart operator
//!
//! This crate provides the types shared by the rendering engine and the
//! release machinery:
//! - `Chart`: the package definition loaded from a chart directory
//! - `Values`: configuration values with deep merge and subchart scoping
//! - `ReleaseInfo`: release facts exposed to templates
//! - `TemplateContext`: the full rendering context

pub mod chart;
pub mod context;
pub mod error;
pub mod release;
pub mod values;

pub use chart::{Chart, ChartMetadata, Dependency, LoadedChart};
pub use context::TemplateContext;
pub use error::{CoreError, Result};
pub use release::ReleaseInfo;
pub use values::Values;
