//! Assembly Pipeline - Single Entry Point
//!
//! CRITICAL: `assemble` validates and binds before the engine starts, and the
//! artifact is only written once composition has succeeded. A failed run never
//! touches the destination path.

use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use uuid::Uuid;

use crate::assets::AssetSet;
use crate::binder::{BindingData, TemplateBinder};
use crate::compose::{compose, AssembledDocument, LopdfAssembler, PageSelection};
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::hashing::{compute_job_hash, sha256_hex};
use crate::kit::KitDescriptor;
use crate::render::{PageRenderer, RenderEngine, RenderSession, RenderedPage};
use crate::templates::TemplateRegistry;
use crate::validation::{BindingInput, FailureMode, ValidationResult, Validator};
use crate::ENGINE_VERSION;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Idle,
    SessionStarted,
    Rendering(String),
    Composed,
    Persisted,
    Done,
    Failed,
}

impl PipelineState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Failed)
    }

    pub fn can_transition_to(&self, next: &PipelineState) -> bool {
        use PipelineState::*;
        match (self, next) {
            (Done | Failed, _) => false,
            (_, Failed) => true,
            (Idle, SessionStarted) => true,
            (SessionStarted, Rendering(_)) => true,
            (Rendering(_), Rendering(_) | Composed) => true,
            (Composed, Persisted) => true,
            (Persisted, Done) => true,
            _ => false,
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::SessionStarted => f.write_str("session_started"),
            Self::Rendering(page) => write!(f, "rendering({page})"),
            Self::Composed => f.write_str("composed"),
            Self::Persisted => f.write_str("persisted"),
            Self::Done => f.write_str("done"),
            Self::Failed => f.write_str("failed"),
        }
    }
}

/// States visited by one run, starting at `Idle`.
#[derive(Debug, Clone)]
pub struct StateTrace {
    states: Vec<PipelineState>,
}

impl StateTrace {
    pub fn new() -> Self {
        Self {
            states: vec![PipelineState::Idle],
        }
    }

    pub fn current(&self) -> &PipelineState {
        // never empty: starts at Idle and only grows
        &self.states[self.states.len() - 1]
    }

    pub fn states(&self) -> &[PipelineState] {
        &self.states
    }

    fn advance(&mut self, next: PipelineState) {
        let current = self.current();
        debug_assert!(
            current.can_transition_to(&next),
            "illegal transition {current} -> {next}"
        );
        log::info!("Pipeline: {current} -> {next}");
        self.states.push(next);
    }

    fn fail(&mut self, err: &PipelineError) {
        if !self.current().is_terminal() {
            log::info!("Pipeline: {} -> failed ({err})", self.current());
            self.states.push(PipelineState::Failed);
        }
    }
}

impl Default for StateTrace {
    fn default() -> Self {
        Self::new()
    }
}

/// Outcome of a persisted run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssemblyReport {
    pub run_id: String,
    pub kit_id: String,
    pub output: PathBuf,
    pub page_count: usize,
    pub page_order: Vec<String>,
    pub bytes: usize,
    pub sha256: String,
    pub job_hash: String,
    pub engine_version: String,
    pub created_at: DateTime<Utc>,
    pub validation: ValidationResult,
    pub states: Vec<PipelineState>,
}

struct BoundPage {
    template_id: String,
    markup: String,
}

/// The assembly pipeline - kit in, one composed document out
pub struct Pipeline<E: RenderEngine> {
    binder: TemplateBinder,
    validator: Validator,
    config: PipelineConfig,
    engine_config: E::Config,
}

impl<E: RenderEngine> Pipeline<E> {
    /// Builds a pipeline over the templates `config` points at.
    pub fn new(config: PipelineConfig, engine_config: E::Config) -> Result<Self> {
        let registry = config.template_registry()?;
        Self::with_registry(config, &registry, engine_config)
    }

    pub fn with_registry(
        config: PipelineConfig,
        registry: &TemplateRegistry,
        engine_config: E::Config,
    ) -> Result<Self> {
        config.print.check()?;
        Ok(Self {
            binder: TemplateBinder::new(registry)?,
            validator: Validator::new(config.validation.failure_mode.clone()),
            config,
            engine_config,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Validate a kit and its assets
    ///
    /// This is the ONLY validation entry point.
    pub fn validate(&self, kit: &KitDescriptor, assets: &AssetSet) -> ValidationResult {
        let result = self.validator.validate(&BindingInput { kit, assets });
        for v in &result.violations {
            match self.config.validation.failure_mode {
                FailureMode::Log => log::info!("{}: {}", v.rule, v.message),
                FailureMode::Block | FailureMode::Warn => log::warn!("{}: {}", v.rule, v.message),
            }
        }
        result
    }

    /// Bound markup for one template.
    pub fn bind(&self, template_id: &str, kit: &KitDescriptor, assets: &AssetSet) -> Result<String> {
        self.binder.bind(template_id, &BindingData::new(kit, assets))
    }

    /// Loads assets from the configured directory, assembles, and writes the
    /// document to the configured output.
    pub async fn run(&self, kit: &KitDescriptor) -> Result<AssemblyReport> {
        let mut trace = StateTrace::new();
        self.run_traced(kit, &mut trace).await
    }

    /// `run`, recording visited states into `trace` on every exit path.
    pub async fn run_traced(
        &self,
        kit: &KitDescriptor,
        trace: &mut StateTrace,
    ) -> Result<AssemblyReport> {
        let result = self.run_inner(kit, trace).await;
        if let Err(e) = &result {
            trace.fail(e);
        }
        result
    }

    async fn run_inner(&self, kit: &KitDescriptor, trace: &mut StateTrace) -> Result<AssemblyReport> {
        let assets = AssetSet::load_from_dir(&self.config.assets_dir)?;
        let (document, validation) = self.assemble_inner(kit, &assets, trace).await?;

        let output = self.config.output.clone();
        let sha256 = sha256_hex(&document.bytes);
        let bytes = document.bytes.len();
        // Nothing fallible may follow the write.
        let job_hash = compute_job_hash(kit, &self.config.page_plan(), &assets, ENGINE_VERSION)?;
        persist(document.bytes, output.clone()).await?;
        trace.advance(PipelineState::Persisted);
        log::info!("Wrote {} ({} bytes, sha256 {})", output.display(), bytes, sha256);
        trace.advance(PipelineState::Done);

        Ok(AssemblyReport {
            run_id: Uuid::new_v4().to_string(),
            kit_id: kit.id.clone(),
            output,
            page_count: document.page_order.len(),
            page_order: document.page_order,
            bytes,
            sha256,
            job_hash,
            engine_version: ENGINE_VERSION.to_string(),
            created_at: Utc::now(),
            validation,
            states: trace.states().to_vec(),
        })
    }

    /// Validates, binds, renders every planned page in one engine session and
    /// composes them, cover first. Nothing is written.
    pub async fn assemble(&self, kit: &KitDescriptor, assets: &AssetSet) -> Result<AssembledDocument> {
        let mut trace = StateTrace::new();
        match self.assemble_inner(kit, assets, &mut trace).await {
            Ok((document, _)) => Ok(document),
            Err(e) => {
                trace.fail(&e);
                Err(e)
            }
        }
    }

    async fn assemble_inner(
        &self,
        kit: &KitDescriptor,
        assets: &AssetSet,
        trace: &mut StateTrace,
    ) -> Result<(AssembledDocument, ValidationResult)> {
        // MANDATORY: validation runs before anything is bound or launched.
        let validation = self.validate(kit, assets);
        if !validation.valid {
            return Err(PipelineError::Validation(validation.summary()));
        }

        let data = BindingData::new(kit, assets);
        let [cover_id, table_id] = self.config.page_plan();
        let cover = BoundPage {
            template_id: cover_id.to_string(),
            markup: self.binder.bind(cover_id, &data)?,
        };
        let table = BoundPage {
            template_id: table_id.to_string(),
            markup: self.binder.bind(table_id, &data)?,
        };

        let session = RenderSession::<E>::start(&self.engine_config).await?;
        trace.advance(PipelineState::SessionStarted);

        let rendered = self.render_pages(&session, [cover, table], trace).await;
        // The session is released on every path; a shutdown hiccup after a
        // successful render does not invalidate the pages.
        if let Err(e) = session.stop().await {
            log::warn!("{e}");
        }
        let pages = rendered?;

        let selections = pages.into_iter().map(PageSelection::sole_page).collect();
        let document = compose(&LopdfAssembler, selections)?;
        trace.advance(PipelineState::Composed);

        Ok((document, validation))
    }

    async fn render_pages(
        &self,
        session: &RenderSession<E>,
        [cover, table]: [BoundPage; 2],
        trace: &mut StateTrace,
    ) -> Result<Vec<RenderedPage>> {
        let renderer = PageRenderer::new(
            session,
            self.config.print,
            self.config.stability.clone(),
        );

        if self.config.concurrent_render {
            trace.advance(PipelineState::Rendering(cover.template_id.clone()));
            trace.advance(PipelineState::Rendering(table.template_id.clone()));
            // join, not try_join: both renders run to completion so each
            // context gets closed before the first error is reported
            let (first, second) = tokio::join!(
                renderer.render(&cover.template_id, &cover.markup),
                renderer.render(&table.template_id, &table.markup),
            );
            Ok(vec![first?, second?])
        } else {
            let mut pages = Vec::with_capacity(2);
            for page in [cover, table] {
                trace.advance(PipelineState::Rendering(page.template_id.clone()));
                pages.push(renderer.render(&page.template_id, &page.markup).await?);
            }
            Ok(pages)
        }
    }
}

/// Writes `bytes` next to `output` and renames over it.
async fn persist(bytes: Vec<u8>, output: PathBuf) -> Result<()> {
    tokio::task::spawn_blocking(move || write_atomic(&bytes, &output))
        .await
        .map_err(|e| PipelineError::Io {
            path: PathBuf::new(),
            source: std::io::Error::other(e),
        })?
}

fn write_atomic(bytes: &[u8], output: &Path) -> Result<()> {
    let dir = match output.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let io_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source| PipelineError::Io { path, source }
    };

    std::fs::create_dir_all(dir).map_err(io_err(dir))?;
    let mut tmp = NamedTempFile::new_in(dir).map_err(io_err(dir))?;
    tmp.write_all(bytes).map_err(io_err(tmp.path()))?;
    tmp.as_file().sync_all().map_err(io_err(tmp.path()))?;
    tmp.persist(output).map_err(|e| PipelineError::Io {
        path: output.to_path_buf(),
        source: e.error,
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        use PipelineState::*;
        let path = [
            Idle,
            SessionStarted,
            Rendering("cover".into()),
            Rendering("table".into()),
            Composed,
            Persisted,
            Done,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(&pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_failed_reachable_from_non_terminal_only() {
        use PipelineState::*;
        assert!(Idle.can_transition_to(&Failed));
        assert!(Rendering("table".into()).can_transition_to(&Failed));
        assert!(Persisted.can_transition_to(&Failed));
        assert!(!Done.can_transition_to(&Failed));
        assert!(!Failed.can_transition_to(&Idle));
    }

    #[test]
    fn test_no_skipping_stages() {
        use PipelineState::*;
        assert!(!Idle.can_transition_to(&Rendering("cover".into())));
        assert!(!SessionStarted.can_transition_to(&Composed));
        assert!(!Composed.can_transition_to(&Done));
    }

    #[test]
    fn test_trace_fail_is_idempotent() {
        let mut trace = StateTrace::new();
        let err = PipelineError::Validation("x".into());
        trace.fail(&err);
        trace.fail(&err);
        assert_eq!(trace.states(), &[PipelineState::Idle, PipelineState::Failed]);
    }

    #[test]
    fn test_state_serializes_snake_case() {
        let json = serde_json::to_string(&PipelineState::Rendering("cover".into())).unwrap();
        assert_eq!(json, r#"{"rendering":"cover"}"#);
        assert_eq!(PipelineState::SessionStarted.to_string(), "session_started");
    }

    #[test]
    fn test_write_atomic_replaces_existing() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("out").join("bom.pdf");
        write_atomic(b"first", &output).unwrap();
        write_atomic(b"second", &output).unwrap();
        assert_eq!(std::fs::read(&output).unwrap(), b"second");
        // no temp files left behind
        assert_eq!(std::fs::read_dir(output.parent().unwrap()).unwrap().count(), 1);
    }
}
