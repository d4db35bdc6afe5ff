//! Validation System - Rule/Policy Separation
//!
//! Rules inspect the kit record and its assets before binding and produce
//! structured violations. Policy maps violations to block/pass.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::assets::AssetSet;
use crate::kit::KitDescriptor;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ViolationSeverity {
    Error,
    Warning,
    Info,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FailureMode {
    #[default]
    Block,
    Warn,
    Log,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationViolation {
    pub rule: String,
    pub severity: ViolationSeverity,
    pub message: String,
    pub expected: Option<String>,
    pub actual: Option<String>,
    pub remediation: Vec<String>,
}

impl ValidationViolation {
    fn error(rule: &str, message: impl Into<String>) -> Self {
        Self {
            rule: rule.to_string(),
            severity: ViolationSeverity::Error,
            message: message.into(),
            expected: None,
            actual: None,
            remediation: vec![],
        }
    }

    fn expected(mut self, expected: impl Into<String>, actual: impl Into<String>) -> Self {
        self.expected = Some(expected.into());
        self.actual = Some(actual.into());
        self
    }

    fn remedy(mut self, remediation: &str) -> Self {
        self.remediation.push(remediation.to_string());
        self
    }

    fn severity(mut self, severity: ViolationSeverity) -> Self {
        self.severity = severity;
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub violations: Vec<ValidationViolation>,
    pub kit_id: String,
}

impl ValidationResult {
    pub fn has_errors(&self) -> bool {
        self.violations
            .iter()
            .any(|v| v.severity == ViolationSeverity::Error)
    }

    /// One line per blocking violation, for error reporting.
    pub fn summary(&self) -> String {
        self.violations
            .iter()
            .filter(|v| v.severity == ViolationSeverity::Error)
            .map(|v| format!("{}: {}", v.rule, v.message))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// What a rule gets to look at.
#[derive(Debug, Clone, Copy)]
pub struct BindingInput<'a> {
    pub kit: &'a KitDescriptor,
    pub assets: &'a AssetSet,
}

/// Validation rule trait - produces violations
pub trait ValidationRule: Send + Sync {
    fn name(&self) -> &'static str;
    fn validate(&self, input: &BindingInput<'_>) -> Vec<ValidationViolation>;
}

// --- Concrete Rules ---

pub struct RequiredFieldsRule;

impl ValidationRule for RequiredFieldsRule {
    fn name(&self) -> &'static str {
        "required_fields"
    }

    fn validate(&self, input: &BindingInput<'_>) -> Vec<ValidationViolation> {
        let kit = input.kit;
        [
            ("KIT_NAME", &kit.display_name),
            ("SKU", &kit.sku),
            ("REV", &kit.revision),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(field, _)| {
            ValidationViolation::error(self.name(), format!("{field} is empty"))
                .remedy("Fill in the kit record before generating")
        })
        .collect()
    }
}

pub struct BomPresentRule;

impl ValidationRule for BomPresentRule {
    fn name(&self) -> &'static str {
        "bom_present"
    }

    fn validate(&self, input: &BindingInput<'_>) -> Vec<ValidationViolation> {
        if input.kit.bom.is_empty() {
            vec![ValidationViolation::error(self.name(), "BOM has no line items")
                .severity(ViolationSeverity::Warning)
                .remedy("The table page will render with no rows")]
        } else {
            vec![]
        }
    }
}

pub struct LineItemIndexRule;

impl ValidationRule for LineItemIndexRule {
    fn name(&self) -> &'static str {
        "line_item_index"
    }

    fn validate(&self, input: &BindingInput<'_>) -> Vec<ValidationViolation> {
        let mut violations = vec![];
        let mut seen = HashSet::new();
        let mut previous = 0u32;

        for item in &input.kit.bom {
            if item.index == 0 {
                violations.push(
                    ValidationViolation::error(self.name(), "Line item index must be positive")
                        .expected(">= 1", "0")
                        .remedy("Indexes are 1-based"),
                );
            }
            if !seen.insert(item.index) {
                violations.push(
                    ValidationViolation::error(
                        self.name(),
                        format!("Duplicate line item index {}", item.index),
                    )
                    .remedy("Give every line item a unique index"),
                );
            } else if item.index < previous {
                violations.push(
                    ValidationViolation::error(self.name(), "Line item indexes are not ascending")
                        .expected(format!("> {previous}"), item.index.to_string())
                        .remedy("Reorder the BOM in the data source"),
                );
            }
            previous = previous.max(item.index);
        }
        violations
    }
}

pub struct QuantityRule;

impl ValidationRule for QuantityRule {
    fn name(&self) -> &'static str {
        "quantity"
    }

    fn validate(&self, input: &BindingInput<'_>) -> Vec<ValidationViolation> {
        input
            .kit
            .bom
            .iter()
            .filter(|item| item.quantity == 0)
            .map(|item| {
                ValidationViolation::error(
                    self.name(),
                    format!("Line item {} ({}) has zero quantity", item.index, item.component),
                )
                .expected(">= 1", "0")
            })
            .collect()
    }
}

pub struct AssetRule;

impl ValidationRule for AssetRule {
    fn name(&self) -> &'static str {
        "assets"
    }

    fn validate(&self, input: &BindingInput<'_>) -> Vec<ValidationViolation> {
        let mut violations = vec![];
        for (label, asset) in [("logo", &input.assets.logo), ("qr", &input.assets.qr)] {
            if asset.bytes.is_empty() {
                violations.push(
                    ValidationViolation::error(self.name(), format!("{label} asset is empty"))
                        .remedy("Replace the image file"),
                );
            }
            if !asset.is_image() {
                violations.push(
                    ValidationViolation::error(self.name(), format!("{label} asset is not an image"))
                        .expected("image/*", asset.mime_type.clone())
                        .severity(ViolationSeverity::Warning),
                );
            }
        }
        violations
    }
}

/// Validator orchestrates rules and applies policy
pub struct Validator {
    rules: Vec<Box<dyn ValidationRule>>,
    failure_mode: FailureMode,
}

impl std::fmt::Debug for Validator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<_> = self.rules.iter().map(|r| r.name()).collect();
        f.debug_struct("Validator")
            .field("rules", &names)
            .field("failure_mode", &self.failure_mode)
            .finish()
    }
}

impl Validator {
    pub fn new(failure_mode: FailureMode) -> Self {
        Self {
            rules: vec![
                Box::new(RequiredFieldsRule),
                Box::new(BomPresentRule),
                Box::new(LineItemIndexRule),
                Box::new(QuantityRule),
                Box::new(AssetRule),
            ],
            failure_mode,
        }
    }

    pub fn validate(&self, input: &BindingInput<'_>) -> ValidationResult {
        let violations: Vec<_> = self
            .rules
            .iter()
            .flat_map(|rule| rule.validate(input))
            .collect();

        let has_errors = violations
            .iter()
            .any(|v| v.severity == ViolationSeverity::Error);

        // Warnings never block; Warn/Log never block at all
        let valid = match self.failure_mode {
            FailureMode::Block => !has_errors,
            FailureMode::Warn | FailureMode::Log => true,
        };

        ValidationResult {
            valid,
            violations,
            kit_id: input.kit.id.clone(),
        }
    }
}

impl Default for Validator {
    fn default() -> Self {
        Self::new(FailureMode::Block)
    }
}
