//! Template System - Named Page Templates

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{PipelineError, ResourceKind, Result};

pub type TemplateId = String;

pub const COVER_TEMPLATE: &str = "cover";
pub const TABLE_TEMPLATE: &str = "table";

const EMBEDDED: [(&str, &str); 2] = [
    (COVER_TEMPLATE, include_str!("../templates/cover.html")),
    (TABLE_TEMPLATE, include_str!("../templates/table.html")),
];

const TEMPLATE_EXTENSIONS: [&str; 3] = ["html", "hbs", "handlebars"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateOrigin {
    Embedded,
    File(PathBuf),
}

#[derive(Debug, Clone)]
pub struct Template {
    pub id: TemplateId,
    pub source: String,
    pub origin: TemplateOrigin,
}

/// Template registry - loads and holds template sources by id
#[derive(Debug, Clone)]
pub struct TemplateRegistry {
    templates: HashMap<TemplateId, Template>,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        Self {
            templates: HashMap::new(),
        }
    }

    /// Registry holding the cover and table templates shipped with the crate.
    pub fn embedded() -> Self {
        let mut registry = Self::new();
        for (id, source) in EMBEDDED {
            registry.register(Template {
                id: id.to_string(),
                source: source.to_string(),
                origin: TemplateOrigin::Embedded,
            });
        }
        registry
    }

    /// Loads every `*.html` / `*.hbs` file in `dir`, keyed by file stem.
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        let entries = fs::read_dir(dir)
            .map_err(|e| PipelineError::from_read(ResourceKind::Template, dir, e))?;

        let mut registry = Self::new();
        for entry in entries {
            let path = entry
                .map_err(|e| PipelineError::Io {
                    path: dir.to_path_buf(),
                    source: e,
                })?
                .path();

            let is_template = path
                .extension()
                .and_then(|e| e.to_str())
                .map_or(false, |e| TEMPLATE_EXTENSIONS.contains(&e));
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if !is_template || !path.is_file() {
                continue;
            }

            let source = fs::read_to_string(&path)
                .map_err(|e| PipelineError::from_read(ResourceKind::Template, &path, e))?;
            log::debug!("Registered template '{}' from {}", stem, path.display());
            registry.register(Template {
                id: stem.to_string(),
                source,
                origin: TemplateOrigin::File(path.clone()),
            });
        }
        Ok(registry)
    }

    pub fn get(&self, id: &str) -> Option<&Template> {
        self.templates.get(id)
    }

    pub fn list(&self) -> Vec<&Template> {
        let mut list: Vec<_> = self.templates.values().collect();
        list.sort_by(|a, b| a.id.cmp(&b.id));
        list
    }

    pub fn register(&mut self, template: Template) {
        self.templates.insert(template.id.clone(), template);
    }
}

impl Default for TemplateRegistry {
    fn default() -> Self {
        Self::embedded()
    }
}
