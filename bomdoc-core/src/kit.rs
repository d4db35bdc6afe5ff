//! Kit Data Model - Descriptors and Bill of Materials
//!
//! Kits are immutable once selected. BOM order is display order.

use std::fs;
use std::path::Path;

use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, ResourceKind, Result};

const BUILTIN_CATALOG: &str = include_str!("../kits/catalog.json");

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KitDescriptor {
    pub id: String,
    #[serde(rename = "name")]
    pub display_name: String,
    pub sku: String,
    pub revision: String,
    #[serde(default = "today", alias = "date")]
    pub generation_date: NaiveDate,
    #[serde(default)]
    pub bom: Vec<LineItem>,
}

fn today() -> NaiveDate {
    Local::now().date_naive()
}

/// One BOM row. Serialized with the `qty` name templates expect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub index: u32,
    pub component: String,
    pub value: String,
    #[serde(rename = "qty", alias = "quantity")]
    pub quantity: u32,
    #[serde(default)]
    pub notes: String,
}

impl KitDescriptor {
    /// ISO 8601 calendar date, as bound into templates.
    pub fn iso_date(&self) -> String {
        self.generation_date.format("%Y-%m-%d").to_string()
    }

    pub fn with_generation_date(self, generation_date: NaiveDate) -> Self {
        Self {
            generation_date,
            ..self
        }
    }
}

impl LineItem {
    pub fn new(index: u32, component: &str, value: &str, quantity: u32, notes: &str) -> Self {
        Self {
            index,
            component: component.to_string(),
            value: value.to_string(),
            quantity,
            notes: notes.to_string(),
        }
    }
}

/// Ordered set of selectable kits.
#[derive(Debug, Clone)]
pub struct KitCatalog {
    kits: Vec<KitDescriptor>,
}

impl KitCatalog {
    pub fn new(kits: Vec<KitDescriptor>) -> Self {
        Self { kits }
    }

    /// The catalog compiled into the binary.
    pub fn builtin() -> Result<Self> {
        Self::from_json(BUILTIN_CATALOG)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let kits: Vec<KitDescriptor> = serde_json::from_str(json)?;
        Ok(Self::new(kits))
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| PipelineError::from_read(ResourceKind::Kit, path, e))?;
        Self::from_json(&content)
    }

    pub fn get(&self, id: &str) -> Result<&KitDescriptor> {
        self.kits
            .iter()
            .find(|k| k.id == id)
            .ok_or_else(|| PipelineError::not_found(ResourceKind::Kit, id))
    }

    /// Choice used when nobody is there to answer a prompt.
    pub fn default_kit(&self) -> Result<&KitDescriptor> {
        self.kits
            .first()
            .ok_or_else(|| PipelineError::not_found(ResourceKind::Kit, "<empty catalog>"))
    }

    pub fn list(&self) -> &[KitDescriptor] {
        &self.kits
    }

    pub fn len(&self) -> usize {
        self.kits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.kits.is_empty()
    }
}
