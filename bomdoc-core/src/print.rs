//! Print Specification
//!
//! The page format handed to the rendering engine. Defaults to A4, zero
//! margins and backgrounds on; a config file may override any of it.

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

/// Largest margin, in millimetres, a configured print spec may ask for.
pub const MAX_MARGIN_MM: f64 = 50.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaperFormat {
    #[default]
    A4,
    Letter,
}

impl PaperFormat {
    /// Physical size in inches, portrait.
    pub fn size_inches(&self) -> (f64, f64) {
        match self {
            Self::A4 => (210.0 / MM_PER_INCH, 297.0 / MM_PER_INCH),
            Self::Letter => (8.5, 11.0),
        }
    }

    /// Physical size in PDF points, portrait.
    pub fn size_points(&self) -> (f64, f64) {
        let (w, h) = self.size_inches();
        (w * 72.0, h * 72.0)
    }
}

const MM_PER_INCH: f64 = 25.4;

/// Page margins in millimetres.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Margins {
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
    pub left: f64,
}

impl Margins {
    pub fn uniform(mm: f64) -> Self {
        Self {
            top: mm,
            right: mm,
            bottom: mm,
            left: mm,
        }
    }

    /// Top, right, bottom and left, converted to inches.
    pub fn inches(&self) -> [f64; 4] {
        [self.top, self.right, self.bottom, self.left].map(|mm| mm / MM_PER_INCH)
    }

    pub fn is_zero(&self) -> bool {
        [self.top, self.right, self.bottom, self.left]
            .iter()
            .all(|m| *m == 0.0)
    }
}

/// Print specifications for physical output
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PrintSpec {
    pub format: PaperFormat,
    pub margins: Margins,
    pub print_background: bool,
}

impl Default for PrintSpec {
    fn default() -> Self {
        Self {
            format: PaperFormat::A4,
            margins: Margins::default(),
            print_background: true,
        }
    }
}

impl PrintSpec {
    /// Rejects margins outside 0..=50 mm before they reach the engine.
    pub fn check(&self) -> Result<()> {
        let m = &self.margins;
        let sides = [
            ("top", m.top),
            ("right", m.right),
            ("bottom", m.bottom),
            ("left", m.left),
        ];
        for (side, mm) in sides {
            if !(0.0..=MAX_MARGIN_MM).contains(&mm) {
                return Err(PipelineError::Validation(format!(
                    "print.margins.{side} is {mm} mm; must be between 0 and {MAX_MARGIN_MM} mm"
                )));
            }
        }
        Ok(())
    }

    pub fn is_full_bleed(&self) -> bool {
        self.margins.is_zero()
    }
}
