//! BomDoc Core - Kit BOM Document Assembler
//!
//! # Stages
//! 1. Validate the kit record and its assets
//! 2. Bind the record into each page template
//! 3. Render every page in its own context of one engine session
//! 4. Compose the rendered pages, cover first, into one document
//! 5. Persist atomically; a failed run leaves the old artifact alone

pub mod assets;
pub mod binder;
#[cfg(feature = "chromium")]
pub mod chromium;
pub mod compose;
pub mod config;
pub mod error;
pub mod hashing;
pub mod kit;
pub mod pipeline;
pub mod print;
pub mod render;
pub mod templates;
pub mod validation;

pub use assets::{AssetSet, EmbeddedAsset};
pub use binder::{BindingData, TemplateBinder};
pub use compose::{compose, AssembledDocument, LopdfAssembler, PageAssembler, PageSelection};
pub use config::{EngineSettings, PipelineConfig};
pub use error::{PipelineError, ResourceKind, Result};
pub use hashing::{canonical_json, compute_job_hash, sha256_hex};
pub use kit::{KitCatalog, KitDescriptor, LineItem};
pub use pipeline::{AssemblyReport, Pipeline, PipelineState, StateTrace};
pub use print::{Margins, PaperFormat, PrintSpec};
pub use render::{
    EngineError, EngineResult, LifecycleEvent, LifecycleTracker, PageRenderer, RenderContext,
    RenderEngine, RenderSession, RenderedPage, StabilityCondition,
};
pub use templates::{Template, TemplateRegistry};
pub use validation::{ValidationResult, ValidationRule, ValidationViolation, ViolationSeverity};

pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");
