use serde::Serialize;

use crate::anchor::Anchor;
use crate::config::ColumnConfig;
use crate::logging::COLUMNS;

/// A vertical band of the page, `[start_x, end_x)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Column {
    pub index: usize,
    pub start_x: i32,
    pub end_x: i32,
}

impl Column {
    pub fn contains(&self, x: f32) -> bool {
        x >= self.start_x as f32 && x < self.end_x as f32
    }

    pub fn width(&self) -> i32 {
        self.end_x - self.start_x
    }
}

/// Ordered, non-overlapping columns whose union is `[0, page_width)`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnLayout {
    pub page_width: i32,
    pub columns: Vec<Column>,
}

impl ColumnLayout {
    pub fn single(page_width: i32) -> Self {
        let page_width = page_width.max(0);
        ColumnLayout {
            page_width,
            columns: vec![Column {
                index: 0,
                start_x: 0,
                end_x: page_width,
            }],
        }
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Point-in-range lookup.
    pub fn column_for(&self, x: f32) -> Option<&Column> {
        let idx = self.columns.partition_point(|c| c.end_x as f32 <= x);
        self.columns.get(idx).filter(|c| c.contains(x))
    }

    /// Column index for an anchor, clamped into the page so that anchors
    /// placed on the margin still belong somewhere.
    pub fn column_index_of(&self, anchor: &Anchor) -> usize {
        let x = anchor.x.clamp(0, (self.page_width - 1).max(0)) as f32;
        self.column_for(x).map(|c| c.index).unwrap_or(0)
    }
}

/// Splits the page into columns by clustering anchor X positions.
#[derive(Debug, Clone, Default)]
pub struct ColumnDetector {
    config: ColumnConfig,
}

impl ColumnDetector {
    pub fn new(config: ColumnConfig) -> Self {
        Self { config }
    }

    pub fn detect<'a, I>(&self, anchors: I, page_width: i32) -> ColumnLayout
    where
        I: IntoIterator<Item = &'a Anchor>,
    {
        if page_width <= 0 {
            return ColumnLayout::single(page_width);
        }

        let mut xs: Vec<i32> = anchors
            .into_iter()
            .map(|a| a.x.clamp(0, page_width - 1))
            .collect();
        xs.sort_unstable();

        let gap_threshold = self.config.gap_fraction * page_width as f32;
        let clusters = cluster_1d(&xs, gap_threshold);
        if clusters.len() <= 1 {
            tracing::debug!(target: COLUMNS, page_width, "single column layout");
            return ColumnLayout::single(page_width);
        }

        let mut boundaries = Vec::with_capacity(clusters.len() + 1);
        boundaries.push(0);
        for pair in clusters.windows(2) {
            let (left_max, right_min) = (pair[0].1, pair[1].0);
            // ceil of the midpoint keeps every column non-empty
            boundaries.push(left_max + (right_min - left_max + 1) / 2);
        }
        boundaries.push(page_width);

        let columns: Vec<Column> = boundaries
            .windows(2)
            .enumerate()
            .map(|(index, w)| Column {
                index,
                start_x: w[0],
                end_x: w[1],
            })
            .collect();

        tracing::info!(
            target: COLUMNS,
            page_width,
            columns = columns.len(),
            bounds = ?columns.iter().map(|c| (c.start_x, c.end_x)).collect::<Vec<_>>(),
            "multi-column layout detected"
        );

        ColumnLayout {
            page_width,
            columns,
        }
    }
}

/// Gap-based clustering of sorted values; returns `(min, max)` per cluster.
fn cluster_1d(sorted: &[i32], gap_threshold: f32) -> Vec<(i32, i32)> {
    let mut clusters: Vec<(i32, i32)> = Vec::new();
    for &x in sorted {
        match clusters.last_mut() {
            Some(last) if ((x - last.1) as f32) <= gap_threshold => last.1 = x,
            _ => clusters.push((x, x)),
        }
    }
    clusters
}
