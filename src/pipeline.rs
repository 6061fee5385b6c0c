use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::Instrument;
use uuid::Uuid;

use crate::anchor::AnchorExtractor;
use crate::config::PipelineConfig;
use crate::correction::{CorrectionEngine, CorrectionLog};
use crate::detectors::{DescriptionService, LayoutDetector, OcrEngine, PageImage};
use crate::error::{AnalysisError, Result};
use crate::layout::{DescriptionObservation, PageData, PageInput, TextObservation};
use crate::logging::PIPELINE;
use crate::spatial::{AssignmentStats, PageAssignment, SpatialAssigner};
use crate::structure::{CimDocument, StructureBuilder, StructureDocument};
use crate::validator::{ContextValidator, ValidationReport};

/// Everything one page analysis produces.
#[derive(Debug, Clone, Serialize)]
pub struct AnalysisResult {
    pub structure: StructureDocument,
    pub cim: CimDocument,
    pub report: ValidationReport,
    pub corrections: CorrectionLog,
    pub stats: AssignmentStats,
    pub assignment: PageAssignment,
}

/// The recovery pipeline over one page, with every stage injected.
#[derive(Debug, Clone)]
pub struct PageAnalyzer {
    extractor: AnchorExtractor,
    assigner: SpatialAssigner,
    corrector: CorrectionEngine,
    builder: StructureBuilder,
}

impl PageAnalyzer {
    pub fn new(
        extractor: AnchorExtractor,
        assigner: SpatialAssigner,
        corrector: CorrectionEngine,
        builder: StructureBuilder,
    ) -> Self {
        Self {
            extractor,
            assigner,
            corrector,
            builder,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        let assigner = SpatialAssigner::from_config(config);
        let corrector = CorrectionEngine::new(
            config.correction.clone(),
            ContextValidator::new(config.validation.clone()),
            assigner.distance_model(),
        );
        Self::new(
            AnchorExtractor::new(config.anchor.clone()),
            assigner,
            corrector,
            StructureBuilder::new(),
        )
    }

    /// Fails only when the page has no layout elements at all.
    pub fn analyze(&self, input: PageInput) -> Result<AnalysisResult> {
        if input.elements.is_empty() {
            return Err(AnalysisError::NoLayoutDetected);
        }
        Ok(self.analyze_page(&PageData::from_input(input)))
    }

    pub fn analyze_page(&self, page: &PageData) -> AnalysisResult {
        let started = Instant::now();

        let anchors = self.extractor.extract(page);
        let assignment = self.assigner.assign(page, anchors);
        let (assignment, report, corrections) = self.corrector.run(assignment);
        let structure = self.builder.build(&assignment);
        let cim = self.builder.build_cim(&assignment, &structure);
        let stats = self.assigner.stats(&assignment.elements);

        tracing::info!(
            target: PIPELINE,
            elements = assignment.elements.len(),
            questions = stats.questions.len(),
            unassigned = stats.unassigned,
            corrections = corrections.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "page analyzed"
        );

        AnalysisResult {
            structure,
            cim,
            report,
            corrections,
            stats,
            assignment,
        }
    }
}

/// Admits at most one in-flight run per job id.
#[derive(Debug, Default)]
pub struct JobRegistry {
    active: DashMap<Uuid, Instant>,
}

impl JobRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn begin(self: &Arc<Self>, id: Uuid, image: PageImage) -> Result<JobGuard> {
        match self.active.entry(id) {
            Entry::Occupied(_) => Err(AnalysisError::JobInFlight(id)),
            Entry::Vacant(slot) => {
                slot.insert(Instant::now());
                tracing::debug!(target: PIPELINE, job_id = %id, "job admitted");
                Ok(JobGuard {
                    id,
                    registry: Arc::clone(self),
                    image,
                })
            }
        }
    }

    pub fn is_active(&self, id: &Uuid) -> bool {
        self.active.contains_key(id)
    }

    pub fn active_count(&self) -> usize {
        self.active.len()
    }
}

/// Holds a job's registry slot and its page-local image cache; both are
/// released on drop, whichever way the run ends.
#[derive(Debug)]
pub struct JobGuard {
    id: Uuid,
    registry: Arc<JobRegistry>,
    image: PageImage,
}

impl JobGuard {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn image(&self) -> &PageImage {
        &self.image
    }
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        self.image.release_cache();
        if let Some((_, started)) = self.registry.active.remove(&self.id) {
            tracing::debug!(
                target: PIPELINE,
                job_id = %self.id,
                held_ms = started.elapsed().as_millis() as u64,
                "job released"
            );
        }
    }
}

/// Runs the detectors for one page and feeds their joined output to the
/// analyzer. Layout must succeed; OCR and descriptions only degrade.
pub struct JobRunner {
    analyzer: Arc<PageAnalyzer>,
    layout: Arc<dyn LayoutDetector>,
    ocr: Option<Arc<dyn OcrEngine>>,
    descriptions: Option<Arc<dyn DescriptionService>>,
    registry: Arc<JobRegistry>,
    timeout: Option<Duration>,
}

impl JobRunner {
    pub fn new(analyzer: Arc<PageAnalyzer>, layout: Arc<dyn LayoutDetector>) -> Self {
        Self {
            analyzer,
            layout,
            ocr: None,
            descriptions: None,
            registry: JobRegistry::new(),
            timeout: None,
        }
    }

    pub fn with_ocr(mut self, ocr: Arc<dyn OcrEngine>) -> Self {
        self.ocr = Some(ocr);
        self
    }

    pub fn with_descriptions(mut self, descriptions: Arc<dyn DescriptionService>) -> Self {
        self.descriptions = Some(descriptions);
        self
    }

    pub fn with_registry(mut self, registry: Arc<JobRegistry>) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    pub async fn run(&self, job_id: Uuid, image: PageImage) -> Result<AnalysisResult> {
        let guard = self.registry.begin(job_id, image)?;
        let span = tracing::info_span!(target: PIPELINE, "job", job_id = %job_id);
        self.run_guarded(&guard).instrument(span).await
    }

    async fn run_guarded(&self, guard: &JobGuard) -> Result<AnalysisResult> {
        let image = guard.image();

        let layout = self
            .bounded(self.layout.detect(image))
            .await
            .map_err(|e| AnalysisError::Detector {
                detector: "layout",
                reason: format!("{e:#}"),
            })?;
        if layout.elements.is_empty() {
            return Err(AnalysisError::NoLayoutDetected);
        }
        tracing::info!(
            target: PIPELINE,
            detector = self.layout.name(),
            elements = layout.elements.len(),
            "layout detected"
        );

        let (texts, descriptions) = tokio::join!(
            self.recognize(image, &layout.elements),
            self.describe(image, &layout.elements)
        );

        let input = PageInput {
            width: layout.width,
            height: layout.height,
            elements: layout.elements,
            texts,
            descriptions,
        };
        self.analyzer.analyze(input)
    }

    async fn recognize(
        &self,
        image: &PageImage,
        elements: &[crate::layout::DetectedElement],
    ) -> Vec<TextObservation> {
        let Some(ocr) = &self.ocr else {
            tracing::warn!(target: PIPELINE, "no OCR engine configured, continuing without text");
            return Vec::new();
        };
        match self.bounded(ocr.recognize(image, elements)).await {
            Ok(texts) => texts,
            Err(e) => {
                tracing::warn!(
                    target: PIPELINE,
                    engine = ocr.name(),
                    error = %format!("{e:#}"),
                    "OCR failed, continuing without text"
                );
                Vec::new()
            }
        }
    }

    async fn describe(
        &self,
        image: &PageImage,
        elements: &[crate::layout::DetectedElement],
    ) -> Vec<DescriptionObservation> {
        let Some(service) = &self.descriptions else {
            return Vec::new();
        };
        match self.bounded(service.describe(image, elements)).await {
            Ok(descriptions) => descriptions,
            Err(e) => {
                tracing::warn!(
                    target: PIPELINE,
                    service = service.name(),
                    error = %format!("{e:#}"),
                    "AI description failed, continuing without descriptions"
                );
                Vec::new()
            }
        }
    }

    async fn bounded<T, F>(&self, call: F) -> anyhow::Result<T>
    where
        F: Future<Output = anyhow::Result<T>>,
    {
        match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(result) => result,
                Err(_) => Err(anyhow::anyhow!("timed out after {limit:?}")),
            },
            None => call.await,
        }
    }
}
