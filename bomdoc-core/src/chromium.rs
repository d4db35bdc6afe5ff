//! Headless Chromium engine.
//!
//! Each context is a separate browser context (own cookies, storage and
//! script globals) holding a single page. Markup is written to a temporary
//! file and navigated to, so the full page lifecycle fires and the document
//! size is not bounded by URL length.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::browser::BrowserContextId;
use chromiumoxide::cdp::browser_protocol::network::LoaderId;
use chromiumoxide::cdp::browser_protocol::page::{
    EventLifecycleEvent, NavigateParams, PrintToPdfParams, SetLifecycleEventsEnabledParams,
};
use chromiumoxide::cdp::browser_protocol::target::{
    CreateBrowserContextParams, CreateTargetParams, DisposeBrowserContextParams,
};
use chromiumoxide::listeners::EventStream;
use chromiumoxide::Page;
use futures::StreamExt;
use tempfile::NamedTempFile;
use tokio::task::JoinHandle;

use crate::config::EngineSettings;
use crate::print::PrintSpec;
use crate::render::{
    EngineError, EngineResult, LifecycleTracker, RenderContext, RenderEngine, StabilityCondition,
};

/// Resolves every host to NOTFOUND so bound markup cannot reach the network.
const OFFLINE_RESOLVER_RULES: &str = "--host-resolver-rules=MAP * ~NOTFOUND, EXCLUDE localhost";

pub struct ChromiumEngine {
    browser: Option<Arc<Browser>>,
    handler: Option<JoinHandle<()>>,
}

pub struct ChromiumContext {
    browser: Arc<Browser>,
    context_id: BrowserContextId,
    page: Page,
    lifecycle: EventStream<EventLifecycleEvent>,
    /// Loader of the navigated document, once `load` ran.
    loader: Option<String>,
    /// Backing file of the loaded markup; removed on drop.
    document: Option<NamedTempFile>,
}

fn engine_err(err: impl std::fmt::Display) -> EngineError {
    EngineError::new(err)
}

fn loader_key(id: &LoaderId) -> String {
    let key: &str = id.as_ref();
    key.to_owned()
}

/// `file://` URL for an absolute path, percent-encoding everything outside
/// the unreserved set.
fn file_url(path: &Path) -> String {
    let mut url = String::from("file://");
    for byte in path.to_string_lossy().bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' | b'/' => {
                url.push(byte as char)
            }
            _ => url.push_str(&format!("%{byte:02X}")),
        }
    }
    url
}

fn print_params(spec: &PrintSpec) -> PrintToPdfParams {
    let (width, height) = spec.format.size_inches();
    let [top, right, bottom, left] = spec.margins.inches();
    PrintToPdfParams {
        paper_width: Some(width),
        paper_height: Some(height),
        margin_top: Some(top),
        margin_right: Some(right),
        margin_bottom: Some(bottom),
        margin_left: Some(left),
        print_background: Some(spec.print_background),
        prefer_css_page_size: Some(false),
        ..Default::default()
    }
}

async fn enable_lifecycle(page: &Page) -> EngineResult<EventStream<EventLifecycleEvent>> {
    page.execute(SetLifecycleEventsEnabledParams::new(true))
        .await
        .map_err(engine_err)?;
    page.event_listener::<EventLifecycleEvent>()
        .await
        .map_err(engine_err)
}

impl ChromiumEngine {
    fn browser(&self) -> EngineResult<&Arc<Browser>> {
        self.browser
            .as_ref()
            .ok_or_else(|| EngineError::new("browser already shut down"))
    }
}

impl RenderEngine for ChromiumEngine {
    type Config = EngineSettings;
    type Context = ChromiumContext;

    async fn launch(settings: &EngineSettings) -> EngineResult<Self> {
        let mut builder = BrowserConfig::builder()
            .new_headless_mode()
            .request_timeout(Duration::from_millis(settings.request_timeout_ms));
        if let Some(executable) = &settings.executable {
            builder = builder.chrome_executable(executable);
        }
        if !settings.sandbox {
            builder = builder.no_sandbox();
        }
        if settings.offline {
            builder = builder.arg(OFFLINE_RESOLVER_RULES);
        }
        let config = builder.build().map_err(engine_err)?;

        let (browser, mut handler) = Browser::launch(config).await.map_err(engine_err)?;
        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    log::debug!("Browser handler stopped: {e}");
                    break;
                }
            }
        });

        match browser.version().await {
            Ok(version) => log::info!("Launched {}", version.product),
            Err(e) => log::debug!("Could not query browser version: {e}"),
        }

        Ok(Self {
            browser: Some(Arc::new(browser)),
            handler: Some(handler),
        })
    }

    async fn open_context(&self) -> EngineResult<ChromiumContext> {
        let browser = self.browser()?.clone();
        let context_id = browser
            .execute(CreateBrowserContextParams::default())
            .await
            .map_err(engine_err)?
            .result
            .browser_context_id;

        let target = CreateTargetParams::builder()
            .url("about:blank")
            .browser_context_id(context_id.clone())
            .build()
            .map_err(engine_err)?;
        let page = match browser.new_page(target).await {
            Ok(page) => page,
            Err(e) => {
                let _ = browser
                    .execute(DisposeBrowserContextParams::new(context_id))
                    .await;
                return Err(engine_err(e));
            }
        };

        let lifecycle = match enable_lifecycle(&page).await {
            Ok(lifecycle) => lifecycle,
            Err(e) => {
                let _ = page.close().await;
                let _ = browser
                    .execute(DisposeBrowserContextParams::new(context_id))
                    .await;
                return Err(e);
            }
        };

        Ok(ChromiumContext {
            browser,
            context_id,
            page,
            lifecycle,
            loader: None,
            document: None,
        })
    }

    async fn shutdown(mut self) -> EngineResult<()> {
        let handler = self.handler.take();
        if let Some(browser) = self.browser.take() {
            match Arc::try_unwrap(browser) {
                Ok(mut browser) => {
                    browser.close().await.map_err(engine_err)?;
                    browser.wait().await.map_err(engine_err)?;
                }
                // a context outlived the session; dropping kills the process
                Err(shared) => drop(shared),
            }
        }
        if let Some(handler) = handler {
            handler.abort();
        }
        Ok(())
    }
}

impl Drop for ChromiumEngine {
    fn drop(&mut self) {
        if let Some(handler) = self.handler.take() {
            handler.abort();
        }
    }
}

impl RenderContext for ChromiumContext {
    async fn load(&mut self, markup: &str) -> EngineResult<()> {
        let mut document = tempfile::Builder::new()
            .prefix("bomdoc-")
            .suffix(".html")
            .tempfile()
            .map_err(engine_err)?;
        document.write_all(markup.as_bytes()).map_err(engine_err)?;
        document.flush().map_err(engine_err)?;

        let navigated = self
            .page
            .execute(NavigateParams::new(file_url(document.path())))
            .await
            .map_err(engine_err)?
            .result;
        if let Some(error) = navigated.error_text {
            return Err(EngineError::new(error));
        }
        self.loader = navigated.loader_id.as_ref().map(loader_key);
        self.document = Some(document);
        Ok(())
    }

    async fn wait_until_stable(&mut self, condition: &StabilityCondition) -> EngineResult<()> {
        let main_frame = self.page.mainframe().await.map_err(engine_err)?;
        let mut tracker = LifecycleTracker::new(condition, self.loader.clone());

        while !tracker.is_stable() {
            let event = self
                .lifecycle
                .next()
                .await
                .ok_or_else(|| EngineError::new("lifecycle event stream closed"))?;
            if main_frame.as_ref().is_some_and(|id| *id != event.frame_id) {
                continue;
            }
            tracker.observe(event.loader_id.as_ref(), &event.name);
        }
        Ok(())
    }

    async fn print(&mut self, spec: &PrintSpec) -> EngineResult<Vec<u8>> {
        self.page.pdf(print_params(spec)).await.map_err(engine_err)
    }

    async fn close(self) -> EngineResult<()> {
        let closed = self.page.close().await.map_err(engine_err);
        self.browser
            .execute(DisposeBrowserContextParams::new(self.context_id))
            .await
            .map_err(engine_err)?;
        closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::print::{Margins, PaperFormat};

    #[test]
    fn test_file_url_escapes_reserved_bytes() {
        assert_eq!(
            file_url(Path::new("/tmp/bom doc/#1/page.html")),
            "file:///tmp/bom%20doc/%231/page.html"
        );
        assert_eq!(file_url(Path::new("/tmp/ü.html")), "file:///tmp/%C3%BC.html");
    }

    #[test]
    fn test_default_print_params_are_a4_full_bleed() {
        let params = print_params(&PrintSpec::default());
        assert!((params.paper_width.unwrap() - 8.2677).abs() < 1e-3);
        assert!((params.paper_height.unwrap() - 11.6929).abs() < 1e-3);
        for margin in [
            params.margin_top,
            params.margin_right,
            params.margin_bottom,
            params.margin_left,
        ] {
            assert_eq!(margin, Some(0.0));
        }
        assert_eq!(params.print_background, Some(true));
        assert_eq!(params.prefer_css_page_size, Some(false));
    }

    #[test]
    fn test_print_params_convert_margins() {
        let spec = PrintSpec {
            format: PaperFormat::Letter,
            margins: Margins::uniform(25.4),
            print_background: false,
        };
        let params = print_params(&spec);
        assert_eq!(params.paper_width, Some(8.5));
        assert_eq!(params.margin_left, Some(1.0));
        assert_eq!(params.print_background, Some(false));
    }
}
