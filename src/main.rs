use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, ValueEnum};
use uuid::Uuid;

use delver_exam::detectors::{PageImage, RecordedDescriptions, RecordedLayout, RecordedOcr};
use delver_exam::logging::{self, ElementTraceStore, PIPELINE};
use delver_exam::{AnalysisResult, JobRunner, PageAnalyzer, PipelineConfig};

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Hierarchical question document
    Structure,
    /// Flattened element/question interchange map
    Cim,
    /// Everything, including validation and corrections
    Full,
}

#[derive(Parser, Debug)]
#[clap(
    author,
    version,
    about,
    long_about = "Recover question structure from recorded exam-page detector output.",
    arg_required_else_help = true
)]
pub struct Args {
    /// Layout detector output (JSON element list or page object)
    pub layout_path: PathBuf,

    /// OCR results as JSON
    #[clap(long)]
    pub ocr: Option<PathBuf>,

    /// AI image descriptions as JSON
    #[clap(long)]
    pub ai: Option<PathBuf>,

    /// Page image, used for its size and element crops
    #[clap(long)]
    pub image: Option<PathBuf>,

    /// Page width in pixels when neither the layout nor an image gives one
    #[clap(long)]
    pub page_width: Option<f32>,

    /// Pipeline configuration file (JSON)
    #[clap(short, long)]
    pub config: Option<String>,

    #[clap(short, long, value_enum, default_value_t = OutputFormat::Structure)]
    pub format: OutputFormat,

    /// Optional output file path. If omitted, writes to stdout.
    #[clap(short, long)]
    pub output: Option<PathBuf>,

    /// Optional pretty print output.
    #[clap(short, long)]
    pub pretty: bool,

    /// Job id for this run; a random one is generated when omitted
    #[clap(long)]
    pub job_id: Option<Uuid>,

    /// Treat the page as a single column
    #[clap(long)]
    pub no_columns: bool,

    /// Never take the parallel assignment path
    #[clap(long)]
    pub sequential: bool,

    /// Print the decision trail for one element id to stderr
    #[clap(long)]
    pub explain: Option<u32>,

    /// Enable per-stage debug logging
    #[clap(long)]
    pub debug_ops: bool,

    /// Directory for the run log file
    #[clap(long)]
    pub log_dir: Option<PathBuf>,

    /// Hierarchical span output on stderr
    #[clap(long)]
    pub tree: bool,
}

impl Args {
    pub fn parse_args() -> Self {
        Args::parse()
    }

    fn pipeline_config(&self) -> anyhow::Result<PipelineConfig> {
        let mut config = match &self.config {
            Some(raw) => {
                let path = shellexpand::full(raw)
                    .with_context(|| format!("expanding config path {raw}"))?;
                PipelineConfig::from_file(PathBuf::from(path.into_owned()))?
            }
            None => PipelineConfig::default(),
        };
        if self.no_columns {
            config.columns.enabled = false;
        }
        if self.sequential {
            config.spatial.parallel = false;
        }
        Ok(config)
    }
}

fn render(result: &AnalysisResult, format: OutputFormat, pretty: bool) -> anyhow::Result<String> {
    let json = match (format, pretty) {
        (OutputFormat::Structure, false) => serde_json::to_string(&result.structure)?,
        (OutputFormat::Structure, true) => serde_json::to_string_pretty(&result.structure)?,
        (OutputFormat::Cim, false) => serde_json::to_string(&result.cim)?,
        (OutputFormat::Cim, true) => serde_json::to_string_pretty(&result.cim)?,
        (OutputFormat::Full, false) => serde_json::to_string(result)?,
        (OutputFormat::Full, true) => serde_json::to_string_pretty(result)?,
    };
    Ok(json)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse_args();

    let trace_store = args.explain.map(|_| ElementTraceStore::default());

    // Keep the guard alive so buffered file output is flushed on exit
    let _guard = match &args.log_dir {
        Some(dir) => Some(
            logging::init_logging_with_dir(args.debug_ops, dir.clone(), trace_store.clone())
                .with_context(|| format!("creating log directory {}", dir.display()))?,
        ),
        None => {
            logging::init_logging(args.debug_ops, args.tree, trace_store.clone());
            None
        }
    };

    let config = args.pipeline_config()?;

    let mut layout = RecordedLayout::from_file(&args.layout_path)?;
    if let Some(width) = args.page_width {
        layout = layout.with_width(width);
    }
    let image = match &args.image {
        Some(path) => PageImage::open(path)?,
        None => PageImage::blank(),
    };

    let analyzer = Arc::new(PageAnalyzer::from_config(&config));
    let mut runner = JobRunner::new(analyzer, Arc::new(layout))
        .with_timeout(config.detectors.timeout());
    if let Some(path) = &args.ocr {
        runner = runner.with_ocr(Arc::new(RecordedOcr::from_file(path)?));
    }
    if let Some(path) = &args.ai {
        runner = runner.with_descriptions(Arc::new(RecordedDescriptions::from_file(path)?));
    }

    let job_id = args.job_id.unwrap_or_else(Uuid::new_v4);
    let result = runner.run(job_id, image).await?;

    if let (Some(id), Some(store)) = (args.explain, &trace_store) {
        let events = store.events_for(id);
        if events.is_empty() {
            eprintln!("no recorded decisions for element {id}");
        }
        for event in events {
            eprintln!("{id}: {event}");
        }
    }

    let json = render(&result, args.format, args.pretty)?;
    match &args.output {
        Some(path) => {
            fs::write(path, json).with_context(|| format!("writing {}", path.display()))?;
            tracing::info!(target: PIPELINE, path = %path.display(), "output written");
        }
        None => println!("{json}"),
    }

    Ok(())
}
