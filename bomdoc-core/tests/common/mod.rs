//! Stub rendering engine for contract tests.
//!
//! Prints the visible text of the markup one line per block element, with
//! table cells joined by " | ". Text that does not fit the page height flows
//! onto further pages, the way a browser paginates.

#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::NaiveDate;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Document, Object, Stream};

use bomdoc_core::{
    EngineError, EngineResult, KitCatalog, KitDescriptor, PipelineConfig, PrintSpec,
    RenderContext, RenderEngine, StabilityCondition,
};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Fault {
    #[default]
    None,
    Launch,
    Hang,
    Navigation,
}

#[derive(Debug, Default)]
pub struct Counters {
    pub launches: AtomicUsize,
    pub shutdowns: AtomicUsize,
    pub opened: AtomicUsize,
    pub closed: AtomicUsize,
}

impl Counters {
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Default)]
pub struct StubConfig {
    pub counters: Arc<Counters>,
    pub fault: Fault,
}

impl StubConfig {
    pub fn with_fault(fault: Fault) -> Self {
        Self {
            fault,
            ..Self::default()
        }
    }
}

pub struct StubEngine {
    config: StubConfig,
}

pub struct StubContext {
    config: StubConfig,
    markup: String,
}

impl RenderEngine for StubEngine {
    type Config = StubConfig;
    type Context = StubContext;

    async fn launch(config: &StubConfig) -> EngineResult<Self> {
        config.counters.launches.fetch_add(1, Ordering::SeqCst);
        if config.fault == Fault::Launch {
            return Err(EngineError::new("no browser executable found"));
        }
        Ok(Self {
            config: config.clone(),
        })
    }

    async fn open_context(&self) -> EngineResult<StubContext> {
        self.config.counters.opened.fetch_add(1, Ordering::SeqCst);
        Ok(StubContext {
            config: self.config.clone(),
            markup: String::new(),
        })
    }

    async fn shutdown(self) -> EngineResult<()> {
        self.config.counters.shutdowns.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl RenderContext for StubContext {
    async fn load(&mut self, markup: &str) -> EngineResult<()> {
        if self.config.fault == Fault::Navigation {
            return Err(EngineError::new("net::ERR_ABORTED"));
        }
        self.markup = markup.to_string();
        Ok(())
    }

    async fn wait_until_stable(&mut self, _condition: &StabilityCondition) -> EngineResult<()> {
        if self.config.fault == Fault::Hang {
            std::future::pending::<()>().await;
        }
        Ok(())
    }

    async fn print(&mut self, spec: &PrintSpec) -> EngineResult<Vec<u8>> {
        let (width, height) = spec.format.size_points();
        text_pdf(&markup_lines(&self.markup), width as i64, height as i64)
            .map_err(EngineError::new)
    }

    async fn close(self) -> EngineResult<()> {
        self.config.counters.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Visible text of `markup`, one entry per block.
pub fn markup_lines(markup: &str) -> Vec<String> {
    let body = markup.split("<body>").nth(1).unwrap_or(markup);
    let mut flat = body.replace('\n', " ");
    for cell_end in ["</td>", "</th>"] {
        flat = flat.replace(cell_end, " | ");
    }
    for block_end in ["</tr>", "</h1>", "</div>", "</p>", "<br>"] {
        flat = flat.replace(block_end, "\n");
    }

    let mut text = String::new();
    let mut in_tag = false;
    for c in flat.chars() {
        match c {
            '<' => in_tag = true,
            '>' => in_tag = false,
            c if !in_tag => text.push(c),
            _ => {}
        }
    }

    text.lines()
        .map(|line| line.split_whitespace().collect::<Vec<_>>().join(" "))
        .map(|line| line.trim_matches(|c| c == ' ' || c == '|').to_string())
        .filter(|line| !line.is_empty())
        .collect()
}

const MARGIN: i64 = 36;
const LEADING: i64 = 12;

fn text_pdf(lines: &[String], width: i64, height: i64) -> lopdf::Result<Vec<u8>> {
    let mut doc = Document::with_version("1.7");
    let pages_id = doc.new_object_id();
    let font_id = doc.add_object(dictionary! {
        "Type" => "Font",
        "Subtype" => "Type1",
        "BaseFont" => "Helvetica",
    });

    let per_page = ((height - 2 * MARGIN) / LEADING).max(1) as usize;
    let chunks: Vec<&[String]> = if lines.is_empty() {
        vec![lines]
    } else {
        lines.chunks(per_page).collect()
    };

    let mut kids = Vec::with_capacity(chunks.len());
    for chunk in chunks {
        let mut operations = vec![
            Operation::new("BT", vec![]),
            Operation::new("Tf", vec!["F1".into(), Object::Integer(10)]),
            Operation::new("TL", vec![Object::Integer(LEADING)]),
            Operation::new("Td", vec![Object::Integer(MARGIN), Object::Integer(height - MARGIN)]),
        ];
        for line in chunk {
            operations.push(Operation::new("Tj", vec![Object::string_literal(line.as_str())]));
            operations.push(Operation::new("T*", vec![]));
        }
        operations.push(Operation::new("ET", vec![]));

        let content_id = doc.add_object(Stream::new(
            dictionary! {},
            Content { operations }.encode()?,
        ));
        let page_id = doc.add_object(dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "Resources" => dictionary! { "Font" => dictionary! { "F1" => font_id } },
            "MediaBox" => vec![
                Object::Integer(0),
                Object::Integer(0),
                Object::Integer(width),
                Object::Integer(height),
            ],
        });
        kids.push(Object::Reference(page_id));
    }
    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => Object::Integer(count),
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    doc.save_to(&mut bytes)?;
    Ok(bytes)
}

/// Text lines of every page of a PDF, in page order.
pub fn pdf_page_lines(bytes: &[u8]) -> Vec<Vec<String>> {
    let doc = Document::load_mem(bytes).unwrap();
    doc.get_pages()
        .values()
        .map(|page_id| {
            let content = Content::decode(&doc.get_page_content(*page_id).unwrap()).unwrap();
            content
                .operations
                .iter()
                .filter(|op| op.operator == "Tj")
                .filter_map(|op| match op.operands.first() {
                    Some(Object::String(bytes, _)) => Some(String::from_utf8_lossy(bytes).into_owned()),
                    _ => None,
                })
                .collect()
        })
        .collect()
}

/// Lines that look like BOM rows: "<index> | ...".
pub fn bom_rows(lines: &[String]) -> Vec<String> {
    lines
        .iter()
        .filter(|line| {
            line.split(" | ")
                .next()
                .is_some_and(|first| first.parse::<u32>().is_ok())
                && line.contains(" | ")
        })
        .cloned()
        .collect()
}

pub fn kit(id: &str) -> KitDescriptor {
    KitCatalog::builtin()
        .unwrap()
        .get(id)
        .unwrap()
        .clone()
        .with_generation_date(NaiveDate::from_ymd_opt(2024, 3, 9).unwrap())
}

/// Config writing into `dir`, with both assets present.
pub fn config_in(dir: &Path) -> PipelineConfig {
    std::fs::write(dir.join("logo.png"), b"\x89PNG\r\n\x1a\nlogo").unwrap();
    std::fs::write(dir.join("qr-code.png"), b"\x89PNG\r\n\x1a\nqr").unwrap();

    let mut config = PipelineConfig::default();
    config.assets_dir = dir.to_path_buf();
    config.output = dir.join("bom.pdf");
    config.stability.timeout_ms = 2_000;
    config
}
