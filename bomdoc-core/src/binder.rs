//! Template Binder - Data Record + Template -> Markup
//!
//! Substitution is non-strict: a variable the record does not supply renders
//! as empty text. Required fields are checked by the validator before binding.

use handlebars::Handlebars;
use serde::Serialize;

use crate::assets::AssetSet;
use crate::error::{PipelineError, ResourceKind, Result};
use crate::kit::{KitDescriptor, LineItem};
use crate::templates::TemplateRegistry;

/// The variable contract every page template is written against.
#[derive(Debug, Clone, Serialize)]
pub struct BindingData {
    #[serde(rename = "KIT_NAME")]
    pub kit_name: String,
    #[serde(rename = "SKU")]
    pub sku: String,
    #[serde(rename = "DATE")]
    pub date: String,
    #[serde(rename = "REV")]
    pub rev: String,
    #[serde(rename = "QR_URL")]
    pub qr_url: String,
    #[serde(rename = "LOGO_URL")]
    pub logo_url: String,
    #[serde(rename = "BOM")]
    pub bom: Vec<LineItem>,
}

impl BindingData {
    pub fn new(kit: &KitDescriptor, assets: &AssetSet) -> Self {
        Self {
            kit_name: kit.display_name.clone(),
            sku: kit.sku.clone(),
            date: kit.iso_date(),
            rev: kit.revision.clone(),
            qr_url: assets.qr.data_uri(),
            logo_url: assets.logo.data_uri(),
            bom: kit.bom.clone(),
        }
    }
}

/// Compiled templates ready for binding.
pub struct TemplateBinder {
    engine: Handlebars<'static>,
}

impl std::fmt::Debug for TemplateBinder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut ids: Vec<_> = self.engine.get_templates().keys().collect();
        ids.sort();
        f.debug_struct("TemplateBinder").field("templates", &ids).finish()
    }
}

impl TemplateBinder {
    /// Compiles every template in the registry. Syntax errors surface here.
    pub fn new(registry: &TemplateRegistry) -> Result<Self> {
        let mut engine = Handlebars::new();
        engine.set_strict_mode(false);

        for template in registry.list() {
            engine
                .register_template_string(&template.id, &template.source)
                .map_err(|e| PipelineError::Template {
                    name: template.id.clone(),
                    message: e.to_string(),
                })?;
        }

        Ok(Self { engine })
    }

    pub fn has_template(&self, template_id: &str) -> bool {
        self.engine.has_template(template_id)
    }

    /// Binds `data` into the named template. Pure apart from template content.
    pub fn bind<T: Serialize>(&self, template_id: &str, data: &T) -> Result<String> {
        if !self.has_template(template_id) {
            return Err(PipelineError::not_found(ResourceKind::Template, template_id));
        }
        self.engine
            .render(template_id, data)
            .map_err(|e| PipelineError::Template {
                name: template_id.to_string(),
                message: e.to_string(),
            })
    }
}
