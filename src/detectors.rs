//! Seams for the external detectors the pipeline consumes, and replay
//! implementations that serve recorded detector output from JSON.

use anyhow::Context;
use async_trait::async_trait;
use dashmap::DashMap;
use image::DynamicImage;
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;

use crate::error::AnalysisError;
use crate::layout::{DescriptionObservation, DetectedElement, TextObservation};
use crate::logging::PIPELINE;

/// The decoded page plus a per-run cache of element crops. Cloning shares
/// both.
#[derive(Clone, Default)]
pub struct PageImage {
    image: Option<Arc<DynamicImage>>,
    crops: Arc<DashMap<u32, Arc<DynamicImage>>>,
}

impl std::fmt::Debug for PageImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageImage")
            .field("dimensions", &self.dimensions())
            .field("cached_crops", &self.crops.len())
            .finish()
    }
}

impl PageImage {
    /// A page known only through recorded detector output.
    pub fn blank() -> Self {
        Self::default()
    }

    pub fn from_image(image: DynamicImage) -> Self {
        Self {
            image: Some(Arc::new(image)),
            crops: Arc::default(),
        }
    }

    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, AnalysisError> {
        let image = image::open(path.as_ref())?;
        tracing::debug!(
            target: PIPELINE,
            path = %path.as_ref().display(),
            width = image.width(),
            height = image.height(),
            "page image decoded"
        );
        Ok(Self::from_image(image))
    }

    pub fn dimensions(&self) -> Option<(u32, u32)> {
        self.image.as_ref().map(|i| (i.width(), i.height()))
    }

    /// Crop of one element's box, decoded once per run.
    pub fn crop(&self, element: &DetectedElement) -> Option<Arc<DynamicImage>> {
        let image = self.image.as_ref()?;
        if let Some(hit) = self.crops.get(&element.id) {
            return Some(Arc::clone(hit.value()));
        }

        let b = &element.bbox;
        let x = b.x1.max(0.0).floor() as u32;
        let y = b.y1.max(0.0).floor() as u32;
        if x >= image.width() || y >= image.height() {
            return None;
        }
        let w = (b.x2.ceil() as u32).min(image.width()).saturating_sub(x);
        let h = (b.y2.ceil() as u32).min(image.height()).saturating_sub(y);
        if w == 0 || h == 0 {
            return None;
        }

        let crop = Arc::new(image.crop_imm(x, y, w, h));
        self.crops.insert(element.id, Arc::clone(&crop));
        Some(crop)
    }

    pub fn cached_crops(&self) -> usize {
        self.crops.len()
    }

    pub fn release_cache(&self) {
        self.crops.clear();
    }
}

/// Layout detector output for one page.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LayoutOutput {
    #[serde(default)]
    pub width: Option<f32>,
    #[serde(default)]
    pub height: Option<f32>,
    pub elements: Vec<DetectedElement>,
}

#[async_trait]
pub trait LayoutDetector: Send + Sync {
    fn name(&self) -> &str;

    async fn detect(&self, page: &PageImage) -> anyhow::Result<LayoutOutput>;
}

#[async_trait]
pub trait OcrEngine: Send + Sync {
    fn name(&self) -> &str;

    async fn recognize(
        &self,
        page: &PageImage,
        elements: &[DetectedElement],
    ) -> anyhow::Result<Vec<TextObservation>>;
}

#[async_trait]
pub trait DescriptionService: Send + Sync {
    fn name(&self) -> &str;

    async fn describe(
        &self,
        page: &PageImage,
        elements: &[DetectedElement],
    ) -> anyhow::Result<Vec<DescriptionObservation>>;
}

/// Recorded layout files come either as a bare element list or wrapped with
/// the page size.
#[derive(Deserialize)]
#[serde(untagged)]
enum LayoutFile {
    Page(LayoutOutput),
    Elements(Vec<DetectedElement>),
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path, what: &str) -> anyhow::Result<T> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading {what} from {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {what} in {}", path.display()))
}

#[derive(Debug, Clone, Default)]
pub struct RecordedLayout {
    output: LayoutOutput,
}

impl RecordedLayout {
    pub fn new(output: LayoutOutput) -> Self {
        Self { output }
    }

    pub fn from_json(raw: &str) -> anyhow::Result<Self> {
        let file: LayoutFile = serde_json::from_str(raw).context("parsing layout json")?;
        Ok(Self::new(file.into_output()))
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let file: LayoutFile = read_json(path.as_ref(), "layout")?;
        Ok(Self::new(file.into_output()))
    }

    /// Override the page width, e.g. when the recording lacks it.
    pub fn with_width(mut self, width: f32) -> Self {
        self.output.width = Some(width);
        self
    }
}

impl LayoutFile {
    fn into_output(self) -> LayoutOutput {
        match self {
            LayoutFile::Page(page) => page,
            LayoutFile::Elements(elements) => LayoutOutput {
                elements,
                ..Default::default()
            },
        }
    }
}

#[async_trait]
impl LayoutDetector for RecordedLayout {
    fn name(&self) -> &str {
        "recorded-layout"
    }

    async fn detect(&self, page: &PageImage) -> anyhow::Result<LayoutOutput> {
        let mut output = self.output.clone();
        if let Some((w, h)) = page.dimensions() {
            output.width.get_or_insert(w as f32);
            output.height.get_or_insert(h as f32);
        }
        Ok(output)
    }
}

#[derive(Debug, Clone, Default)]
pub struct RecordedOcr {
    texts: Vec<TextObservation>,
}

impl RecordedOcr {
    pub fn new(texts: Vec<TextObservation>) -> Self {
        Self { texts }
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        Ok(Self::new(read_json(path.as_ref(), "OCR results")?))
    }
}

#[async_trait]
impl OcrEngine for RecordedOcr {
    fn name(&self) -> &str {
        "recorded-ocr"
    }

    async fn recognize(
        &self,
        _page: &PageImage,
        elements: &[DetectedElement],
    ) -> anyhow::Result<Vec<TextObservation>> {
        Ok(self
            .texts
            .iter()
            .filter(|t| elements.iter().any(|e| e.id == t.element_id))
            .cloned()
            .collect())
    }
}

#[derive(Debug, Clone, Default)]
pub struct RecordedDescriptions {
    descriptions: Vec<DescriptionObservation>,
}

impl RecordedDescriptions {
    pub fn new(descriptions: Vec<DescriptionObservation>) -> Self {
        Self { descriptions }
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        Ok(Self::new(read_json(path.as_ref(), "AI descriptions")?))
    }
}

#[async_trait]
impl DescriptionService for RecordedDescriptions {
    fn name(&self) -> &str {
        "recorded-descriptions"
    }

    async fn describe(
        &self,
        _page: &PageImage,
        elements: &[DetectedElement],
    ) -> anyhow::Result<Vec<DescriptionObservation>> {
        Ok(self
            .descriptions
            .iter()
            .filter(|d| elements.iter().any(|e| e.id == d.element_id))
            .cloned()
            .collect())
    }
}
