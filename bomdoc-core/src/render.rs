//! Page Renderer - Markup -> Single-Page PDF
//!
//! One engine session per run, one isolated context per page. A context is
//! closed on every exit path, and the session is stopped by its owner even
//! when a later stage fails. Dropping a session without stopping it drops the
//! engine, which tears the engine process down.

use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{PipelineError, Result};
use crate::print::PrintSpec;

/// Failure reported by an engine implementation. The renderer decides which
/// pipeline error it becomes.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct EngineError(pub String);

impl EngineError {
    pub fn new(message: impl std::fmt::Display) -> Self {
        Self(message.to_string())
    }
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Load signals a page must have emitted before it is captured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleEvent {
    /// Structural load (`DOMContentLoaded`).
    DomContentLoaded,
    /// Full resource load (`load`).
    Load,
    /// No network connections for at least 500ms.
    NetworkIdle,
}

impl LifecycleEvent {
    pub const ALL: [LifecycleEvent; 3] = [Self::DomContentLoaded, Self::Load, Self::NetworkIdle];

    /// Name of the event in the browser's page lifecycle.
    pub fn lifecycle_name(&self) -> &'static str {
        match self {
            Self::DomContentLoaded => "DOMContentLoaded",
            Self::Load => "load",
            Self::NetworkIdle => "networkIdle",
        }
    }
}

/// Render-completion heuristic: every listed event has fired, whichever is
/// last, within `timeout_ms`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StabilityCondition {
    pub events: Vec<LifecycleEvent>,
    pub timeout_ms: u64,
}

impl StabilityCondition {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for StabilityCondition {
    fn default() -> Self {
        Self {
            events: LifecycleEvent::ALL.to_vec(),
            timeout_ms: 30_000,
        }
    }
}

/// Folds a page's lifecycle events into "stable yet?".
///
/// Only events of the awaited document count: those carrying its loader id,
/// starting from its `init`. Events a previous document fired, including the
/// replay a browser sends when lifecycle reporting is switched on, are
/// ignored. Without a loader id any `init` starts a fresh document.
#[derive(Debug, Clone)]
pub struct LifecycleTracker {
    loader: Option<String>,
    expected: HashSet<&'static str>,
    pending: HashSet<&'static str>,
    started: bool,
}

impl LifecycleTracker {
    pub fn new(condition: &StabilityCondition, loader: Option<String>) -> Self {
        let expected: HashSet<_> = condition.events.iter().map(|e| e.lifecycle_name()).collect();
        Self {
            loader,
            pending: expected.clone(),
            expected,
            started: false,
        }
    }

    /// Records one main-frame event and reports whether the condition holds.
    pub fn observe(&mut self, loader: &str, name: &str) -> bool {
        if self.loader.as_deref().is_some_and(|awaited| awaited != loader) {
            return self.is_stable();
        }
        if name == "init" {
            self.started = true;
            self.pending = self.expected.clone();
        } else if self.started {
            self.pending.remove(name);
        }
        self.is_stable()
    }

    pub fn is_stable(&self) -> bool {
        self.started && self.pending.is_empty()
    }
}

/// A headless layout engine that can print markup to page-accurate PDF.
pub trait RenderEngine: Sized + Send + Sync {
    type Config: Send + Sync;
    type Context: RenderContext;

    fn launch(config: &Self::Config) -> impl Future<Output = EngineResult<Self>> + Send;

    /// Opens a fresh context sharing nothing with other contexts.
    fn open_context(&self) -> impl Future<Output = EngineResult<Self::Context>> + Send;

    fn shutdown(self) -> impl Future<Output = EngineResult<()>> + Send;
}

/// One isolated page inside an engine session.
pub trait RenderContext: Send {
    fn load(&mut self, markup: &str) -> impl Future<Output = EngineResult<()>> + Send;

    fn wait_until_stable(
        &mut self,
        condition: &StabilityCondition,
    ) -> impl Future<Output = EngineResult<()>> + Send;

    fn print(&mut self, spec: &PrintSpec) -> impl Future<Output = EngineResult<Vec<u8>>> + Send;

    fn close(self) -> impl Future<Output = EngineResult<()>> + Send;
}

/// Explicitly owned engine session.
#[derive(Debug)]
pub struct RenderSession<E: RenderEngine> {
    engine: Option<E>,
}

impl<E: RenderEngine> RenderSession<E> {
    /// Launches the engine. Failure is `EngineLaunch`.
    pub async fn start(config: &E::Config) -> Result<Self> {
        let engine = E::launch(config)
            .await
            .map_err(|e| PipelineError::EngineLaunch(e.0))?;
        log::debug!("Rendering session started");
        Ok(Self {
            engine: Some(engine),
        })
    }

    fn engine(&self) -> Result<&E> {
        self.engine
            .as_ref()
            .ok_or_else(|| PipelineError::EngineLaunch("session already stopped".into()))
    }

    /// Shuts the engine down. Safe to call exactly once; consumes the session.
    pub async fn stop(mut self) -> Result<()> {
        match self.engine.take() {
            Some(engine) => {
                engine.shutdown().await.map_err(|e| {
                    PipelineError::EngineLaunch(format!("engine shutdown failed: {e}"))
                })?;
                log::debug!("Rendering session stopped");
                Ok(())
            }
            None => Ok(()),
        }
    }
}

impl<E: RenderEngine> Drop for RenderSession<E> {
    fn drop(&mut self) {
        if self.engine.is_some() {
            log::warn!("Rendering session dropped without stop; tearing engine down");
        }
    }
}

/// Output of one render call: a PDF whose first page is the logical page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedPage {
    pub template_id: String,
    pub bytes: Vec<u8>,
}

/// Renders bound markup through a session's engine.
#[derive(Debug)]
pub struct PageRenderer<'s, E: RenderEngine> {
    session: &'s RenderSession<E>,
    print: PrintSpec,
    stability: StabilityCondition,
}

impl<'s, E: RenderEngine> PageRenderer<'s, E> {
    pub fn new(session: &'s RenderSession<E>, print: PrintSpec, stability: StabilityCondition) -> Self {
        Self {
            session,
            print,
            stability,
        }
    }

    /// Renders `markup` in its own context. The context is closed whether or
    /// not capture succeeds.
    pub async fn render(&self, template_id: &str, markup: &str) -> Result<RenderedPage> {
        let engine = self.session.engine()?;
        let mut context = engine
            .open_context()
            .await
            .map_err(|e| PipelineError::navigation(template_id, e))?;
        log::debug!("Opened rendering context for '{template_id}'");

        let captured = self.capture(&mut context, template_id, markup).await;
        let closed = context.close().await;

        match (captured, closed) {
            (Ok(bytes), Ok(())) => {
                log::debug!("Captured '{}' ({} bytes)", template_id, bytes.len());
                Ok(RenderedPage {
                    template_id: template_id.to_string(),
                    bytes,
                })
            }
            (Ok(_), Err(e)) => Err(PipelineError::navigation(
                template_id,
                format!("context close failed: {e}"),
            )),
            (Err(err), closed) => {
                if let Err(e) = closed {
                    log::warn!("Closing context for '{template_id}' also failed: {e}");
                }
                Err(err)
            }
        }
    }

    async fn capture(
        &self,
        context: &mut E::Context,
        template_id: &str,
        markup: &str,
    ) -> Result<Vec<u8>> {
        let waited = self.stability.timeout();
        let stable = tokio::time::timeout(waited, async {
            context.load(markup).await?;
            context.wait_until_stable(&self.stability).await
        })
        .await;

        match stable {
            Err(_) => {
                return Err(PipelineError::RenderTimeout {
                    page: template_id.to_string(),
                    waited,
                })
            }
            Ok(Err(e)) => return Err(PipelineError::navigation(template_id, e)),
            Ok(Ok(())) => log::debug!("'{template_id}' reached stability"),
        }

        context
            .print(&self.print)
            .await
            .map_err(|e| PipelineError::navigation(template_id, e))
    }
}
