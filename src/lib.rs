pub mod anchor;
pub mod columns;
pub mod config;
pub mod correction;
pub mod detectors;
pub mod error;
pub mod layout;
pub mod logging;
pub mod pattern;
pub mod pipeline;
pub mod spatial;
pub mod structure;
pub mod validator;

pub use config::PipelineConfig;
pub use error::{AnalysisError, Result};
pub use layout::{PageData, PageInput};
pub use pipeline::{AnalysisResult, JobRegistry, JobRunner, PageAnalyzer};
pub use structure::{CimDocument, StructureDocument};

/// Analyze one page of recorded detector output with the default
/// configuration.
///
/// # Arguments
/// * `input` - Layout boxes plus any OCR texts and AI descriptions, joined by
///   element id
///
/// # Returns
/// * `Result<AnalysisResult>` - The question structure, its CIM rendering and
///   the validation/correction trail. Fails only on a page without layout.
pub fn analyze_page(input: PageInput) -> Result<AnalysisResult> {
    PageAnalyzer::from_config(&PipelineConfig::default()).analyze(input)
}
