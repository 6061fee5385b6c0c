use dashmap::DashMap;
use std::fmt::Write;
use std::path::PathBuf;
use std::sync::{Arc, Once};
use tracing::field::{Field, Visit};
use tracing::Level;
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling::{RollingFileAppender, Rotation},
};
use tracing_subscriber::{
    filter::EnvFilter, fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt, Layer,
};

// Log targets, one per pipeline stage
pub const ANCHOR: &str = "exam_anchor";
pub const COLUMNS: &str = "exam_columns";
pub const SPATIAL: &str = "exam_spatial";
pub const VALIDATE: &str = "exam_validate";
pub const CORRECT: &str = "exam_correct";
pub const STRUCTURE: &str = "exam_structure";
pub const PIPELINE: &str = "exam_pipeline";

static INIT: Once = Once::new();

const STAGE_TARGETS: &[&str] = &[ANCHOR, COLUMNS, SPATIAL, VALIDATE, CORRECT, STRUCTURE];

/// Every event that mentions an `element_id`, grouped per element. Lets a
/// caller explain afterwards why an element ended up in its question.
#[derive(Clone, Default)]
pub struct ElementTraceStore {
    events: Arc<DashMap<u64, Vec<String>>>,
}

impl ElementTraceStore {
    fn record(&self, element_id: u64, message: String) {
        self.events.entry(element_id).or_default().push(message);
    }

    pub fn events_for(&self, element_id: u32) -> Vec<String> {
        self.events
            .get(&(element_id as u64))
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    pub fn element_count(&self) -> usize {
        self.events.len()
    }
}

pub struct ElementTraceLayer {
    store: ElementTraceStore,
}

impl ElementTraceLayer {
    pub fn new(store: ElementTraceStore) -> Self {
        Self { store }
    }
}

impl<S> Layer<S> for ElementTraceLayer
where
    S: tracing::Subscriber + for<'a> tracing_subscriber::registry::LookupSpan<'a>,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        let mut ids = IdVisitor::default();
        event.record(&mut ids);
        let Some(element_id) = ids.element_id else {
            return;
        };

        let mut message = format!("[{}] ", event.metadata().target());
        event.record(&mut MessageVisitor(&mut message));
        self.store.record(element_id, message.trim_end().to_string());
    }
}

#[derive(Debug, Default)]
struct IdVisitor {
    element_id: Option<u64>,
}

impl Visit for IdVisitor {
    fn record_u64(&mut self, field: &Field, value: u64) {
        if field.name() == "element_id" {
            self.element_id = Some(value);
        }
    }

    fn record_i64(&mut self, field: &Field, value: i64) {
        if field.name() == "element_id" && value >= 0 {
            self.element_id = Some(value as u64);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "element_id" {
            self.element_id = format!("{:?}", value).parse().ok();
        }
    }
}

struct MessageVisitor<'a>(&'a mut String);

impl Visit for MessageVisitor<'_> {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.0, "{:?} ", value);
        } else if field.name() != "element_id" {
            let _ = write!(self.0, "{}={:?} ", field.name(), value);
        }
    }
}

fn stage_filter(debug_ops: bool) -> EnvFilter {
    let level = if debug_ops { "debug" } else { "info" };
    STAGE_TARGETS.iter().fold(
        EnvFilter::from_default_env().add_directive(Level::INFO.into()),
        |filter, target| match format!("{target}={level}").parse() {
            Ok(directive) => filter.add_directive(directive),
            Err(_) => filter,
        },
    )
}

fn trace_filter() -> EnvFilter {
    STAGE_TARGETS
        .iter()
        .chain(std::iter::once(&PIPELINE))
        .fold(EnvFilter::new("off"), |filter, target| {
            match format!("{target}=debug").parse() {
                Ok(directive) => filter.add_directive(directive),
                Err(_) => filter,
            }
        })
}

/// Console logging. `tree` switches to an indented span hierarchy.
pub fn init_logging(debug_ops: bool, tree: bool, store: Option<ElementTraceStore>) {
    INIT.call_once(|| {
        let trace_layer = store.map(|s| ElementTraceLayer::new(s).with_filter(trace_filter()));
        let registry = tracing_subscriber::registry().with(trace_layer);

        if tree {
            registry
                .with(
                    tracing_tree::HierarchicalLayer::new(2)
                        .with_targets(true)
                        .with_writer(std::io::stderr)
                        .with_filter(stage_filter(debug_ops)),
                )
                .init();
        } else {
            registry
                .with(
                    tracing_subscriber::fmt::layer()
                        .with_target(true)
                        .with_writer(std::io::stderr)
                        .with_filter(stage_filter(debug_ops)),
                )
                .init();
        }
    });
}

/// Console logging plus a per-run file under `log_dir`. Keep the returned
/// guard alive until the process exits or buffered lines are lost.
pub fn init_logging_with_dir(
    debug_ops: bool,
    log_dir: PathBuf,
    store: Option<ElementTraceStore>,
) -> std::io::Result<WorkerGuard> {
    std::fs::create_dir_all(&log_dir)?;

    let file_appender = RollingFileAppender::new(Rotation::NEVER, log_dir, "exam-analysis.log");
    let (non_blocking_appender, guard) = tracing_appender::non_blocking(file_appender);

    INIT.call_once(|| {
        let file_layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .with_ansi(false)
            .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE)
            .with_writer(non_blocking_appender)
            .with_filter(stage_filter(true));

        let stderr_layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_writer(std::io::stderr)
            .with_filter(stage_filter(debug_ops));

        let trace_layer = store.map(|s| ElementTraceLayer::new(s).with_filter(trace_filter()));

        tracing_subscriber::registry()
            .with(trace_layer)
            .with(file_layer)
            .with(stderr_layer)
            .init();
    });

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::prelude::*;

    #[test]
    fn trace_layer_groups_events_by_element() {
        let store = ElementTraceStore::default();
        let subscriber = tracing_subscriber::registry().with(ElementTraceLayer::new(store.clone()));

        tracing::subscriber::with_default(subscriber, || {
            tracing::debug!(target: SPATIAL, element_id = 7u32, question = "3", "assigned");
            tracing::debug!(target: CORRECT, element_id = 7u32, "moved");
            tracing::debug!(target: SPATIAL, "no element here");
        });

        let events = store.events_for(7);
        assert_eq!(events.len(), 2);
        assert!(events[0].starts_with("[exam_spatial]"));
        assert!(events[0].contains("question=\"3\""));
        assert_eq!(store.element_count(), 1);
    }
}
