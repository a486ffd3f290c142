//! # PCIForge Codegen
//!
//! Turns an immutable donor profile into a self-consistent tree of hardware
//! sources, constraint files and build scripts. Rendering is deterministic:
//! identical profile, board, options and template set produce byte-identical
//! output trees.

pub mod context;
pub mod orchestrator;
pub mod renderer;
pub mod repo_cache;
pub mod templates;

pub use context::{build_context, donor_identity_hash, RenderContext, Value};
pub use orchestrator::{BuildReport, Orchestrator};
pub use renderer::Template;
pub use repo_cache::{PinoutConstraints, RepoCache};
pub use templates::{build_plan, load_template, PlanEntry};
