use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;

/// Top-level knobs for one analysis run. Every field has a default so a
/// config file only needs to list what it changes.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    pub anchor: AnchorConfig,
    pub columns: ColumnConfig,
    pub spatial: SpatialConfig,
    pub validation: ValidationConfig,
    pub correction: CorrectionConfig,
    pub detectors: DetectorConfig,
}

/// Confidence fusion (detector + OCR + pattern tier) and fallback scan.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AnchorConfig {
    pub detector_weight: f32,
    pub ocr_weight: f32,
    pub pattern_weight: f32,
    pub accept_threshold: f32,
    pub fallback_min_ocr_confidence: f32,
    pub fallback_min_score: f32,
    /// Vertical tolerance when correlating a fallback anchor with a box.
    pub fallback_y_tolerance: f32,
}

impl Default for AnchorConfig {
    fn default() -> Self {
        Self {
            detector_weight: 0.5,
            ocr_weight: 0.3,
            pattern_weight: 0.2,
            accept_threshold: 0.70,
            fallback_min_ocr_confidence: 0.5,
            fallback_min_score: 0.4,
            fallback_y_tolerance: 10.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ColumnConfig {
    pub enabled: bool,
    /// A gap between anchor X clusters wider than this share of the page
    /// width starts a new column.
    pub gap_fraction: f32,
}

impl Default for ColumnConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            gap_fraction: 0.25,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SpatialConfig {
    pub weight_x: f32,
    pub weight_y: f32,
    pub below_discount: f32,
    pub radius_factor: f32,
    pub min_radius: f32,
    pub max_radius: f32,
    pub large_area: f32,
    pub large_radius_factor: f32,
    pub parallel_threshold: usize,
    pub parallel: bool,
}

impl Default for SpatialConfig {
    fn default() -> Self {
        Self {
            weight_x: 0.5,
            weight_y: 1.0,
            below_discount: 0.9,
            radius_factor: 0.6,
            min_radius: 60.0,
            max_radius: 400.0,
            large_area: 40_000.0,
            large_radius_factor: 2.0,
            parallel_threshold: 100,
            parallel: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ValidationConfig {
    pub max_gap_span: u32,
    pub overlap_tolerance: f32,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_gap_span: 5,
            overlap_tolerance: 10.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CorrectionConfig {
    pub enabled: bool,
    pub max_edit_distance: usize,
}

impl Default for CorrectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_edit_distance: 1,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DetectorConfig {
    /// Per-call timeout for the external detectors, in milliseconds.
    pub timeout_ms: Option<u64>,
}

impl DetectorConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

impl PipelineConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let config: PipelineConfig =
            serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
                path: path.display().to_string(),
                source,
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let a = &self.anchor;
        for (field, w) in [
            ("anchor.detector_weight", a.detector_weight),
            ("anchor.ocr_weight", a.ocr_weight),
            ("anchor.pattern_weight", a.pattern_weight),
        ] {
            if !(w >= 0.0) {
                return Err(invalid(field, format!("weight must be >= 0, got {w}")));
            }
        }
        if !(0.0..=1.0).contains(&a.accept_threshold) {
            return Err(invalid(
                "anchor.accept_threshold",
                format!("must be within [0, 1], got {}", a.accept_threshold),
            ));
        }

        let g = self.columns.gap_fraction;
        if !(g > 0.0 && g <= 1.0) {
            return Err(invalid(
                "columns.gap_fraction",
                format!("must be within (0, 1], got {g}"),
            ));
        }

        let s = &self.spatial;
        if !(s.weight_x > 0.0 && s.weight_y > 0.0) {
            return Err(invalid("spatial.weight_x", "weights must be positive".into()));
        }
        if !(s.min_radius > 0.0) || s.min_radius > s.max_radius {
            return Err(invalid(
                "spatial.min_radius",
                format!(
                    "need 0 < min_radius <= max_radius, got {} / {}",
                    s.min_radius, s.max_radius
                ),
            ));
        }
        if !(s.below_discount > 0.0 && s.below_discount <= 1.0) {
            return Err(invalid(
                "spatial.below_discount",
                format!("must be within (0, 1], got {}", s.below_discount),
            ));
        }
        if !(s.large_radius_factor >= 1.0) {
            return Err(invalid(
                "spatial.large_radius_factor",
                format!("must be >= 1, got {}", s.large_radius_factor),
            ));
        }
        if self.validation.overlap_tolerance < 0.0 {
            return Err(invalid(
                "validation.overlap_tolerance",
                "must not be negative".into(),
            ));
        }
        Ok(())
    }
}

fn invalid(field: &'static str, reason: String) -> ConfigError {
    ConfigError::Invalid { field, reason }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let config: PipelineConfig =
            serde_json::from_str(r#"{"spatial": {"max_radius": 250.0}}"#).unwrap();
        assert_eq!(config.spatial.max_radius, 250.0);
        assert_eq!(config.spatial.min_radius, 60.0);
        assert_eq!(config.anchor, AnchorConfig::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn inverted_radius_bounds_rejected() {
        let mut config = PipelineConfig::default();
        config.spatial.min_radius = 500.0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid {
                field: "spatial.min_radius",
                ..
            })
        ));
    }
}
