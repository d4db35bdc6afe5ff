//! Pipeline Configuration
//!
//! Every field has a default, so an empty JSON object is a valid config.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::print::PrintSpec;
use crate::render::StabilityCondition;
use crate::templates::{TemplateRegistry, COVER_TEMPLATE, TABLE_TEMPLATE};
use crate::validation::FailureMode;

pub const DEFAULT_OUTPUT: &str = "bom.pdf";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineConfig {
    #[serde(default = "default_output")]
    pub output: PathBuf,
    /// Templates directory; embedded templates when unset.
    #[serde(default)]
    pub templates_dir: Option<PathBuf>,
    #[serde(default = "default_assets_dir")]
    pub assets_dir: PathBuf,
    #[serde(default = "default_cover")]
    pub cover_template: String,
    #[serde(default = "default_table")]
    pub table_template: String,
    #[serde(default)]
    pub print: PrintSpec,
    #[serde(default)]
    pub stability: StabilityCondition,
    #[serde(default = "default_true")]
    pub concurrent_render: bool,
    #[serde(default)]
    pub validation: ValidationSettings,
    #[serde(default)]
    pub engine: EngineSettings,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationSettings {
    #[serde(default)]
    pub failure_mode: FailureMode,
}

/// Settings for launching the headless browser.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineSettings {
    /// Browser executable; auto-detected when unset.
    #[serde(default)]
    pub executable: Option<PathBuf>,
    #[serde(default = "default_true")]
    pub sandbox: bool,
    /// Refuse all network name resolution inside the browser.
    #[serde(default)]
    pub offline: bool,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

fn default_output() -> PathBuf {
    PathBuf::from(DEFAULT_OUTPUT)
}
fn default_assets_dir() -> PathBuf {
    PathBuf::from(".")
}
fn default_cover() -> String {
    COVER_TEMPLATE.to_string()
}
fn default_table() -> String {
    TABLE_TEMPLATE.to_string()
}
fn default_true() -> bool {
    true
}
fn default_request_timeout_ms() -> u64 {
    30_000
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            executable: None,
            sandbox: true,
            offline: false,
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            output: default_output(),
            templates_dir: None,
            assets_dir: default_assets_dir(),
            cover_template: default_cover(),
            table_template: default_table(),
            print: PrintSpec::default(),
            stability: StabilityCondition::default(),
            concurrent_render: true,
            validation: ValidationSettings::default(),
            engine: EngineSettings::default(),
        }
    }
}

impl PipelineConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| PipelineError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;
        let config: Self = serde_json::from_str(&content)?;
        config.print.check()?;
        Ok(config)
    }

    /// Template ids in page order: cover first.
    pub fn page_plan(&self) -> [&str; 2] {
        [self.cover_template.as_str(), self.table_template.as_str()]
    }

    /// Registry for the configured template source.
    pub fn template_registry(&self) -> Result<TemplateRegistry> {
        match &self.templates_dir {
            Some(dir) => TemplateRegistry::load_from_dir(dir),
            None => Ok(TemplateRegistry::embedded()),
        }
    }
}
