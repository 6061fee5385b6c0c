use serde::Serialize;
use std::collections::BTreeMap;

use crate::config::ValidationConfig;
use crate::logging::VALIDATE;
use crate::pattern::{natural_cmp, numeric_identifier};
use crate::spatial::{top_level, PageAssignment};

/// Advisory findings about an assignment. Never acted on here.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub sequence_gaps: Vec<u32>,
    pub range_conflicts: Vec<(String, String)>,
    pub unassigned_count: usize,
}

impl ValidationReport {
    pub fn is_clean(&self) -> bool {
        self.sequence_gaps.is_empty() && self.range_conflicts.is_empty()
    }
}

/// Vertical extent of one top-level question.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct YRange {
    pub min_y: f32,
    pub max_y: f32,
}

impl YRange {
    pub fn overlap(&self, other: &YRange) -> Option<YRange> {
        let min_y = self.min_y.max(other.min_y);
        let max_y = self.max_y.min(other.max_y);
        (max_y >= min_y).then_some(YRange { min_y, max_y })
    }

    pub fn span(&self) -> f32 {
        self.max_y - self.min_y
    }

    pub fn contains(&self, y: f32) -> bool {
        y >= self.min_y && y <= self.max_y
    }
}

#[derive(Debug, Clone, Default)]
pub struct ContextValidator {
    config: ValidationConfig,
}

impl ContextValidator {
    pub fn new(config: ValidationConfig) -> Self {
        Self { config }
    }

    pub fn validate(&self, page: &PageAssignment) -> ValidationReport {
        let report = ValidationReport {
            sequence_gaps: self.sequence_gaps(page),
            range_conflicts: self.range_conflicts(page),
            unassigned_count: page.unassigned().count(),
        };

        if report.is_clean() {
            tracing::debug!(
                target: VALIDATE,
                unassigned = report.unassigned_count,
                "assignment consistent"
            );
        } else {
            tracing::info!(
                target: VALIDATE,
                gaps = ?report.sequence_gaps,
                conflicts = ?report.range_conflicts,
                unassigned = report.unassigned_count,
                "structural anomalies found"
            );
        }
        report
    }

    /// Missing integers between consecutive numeric question identifiers.
    pub fn sequence_gaps(&self, page: &PageAssignment) -> Vec<u32> {
        let mut numbers: Vec<u32> = page
            .anchors
            .main_anchors()
            .filter_map(|a| numeric_identifier(&a.identifier))
            .collect();
        numbers.sort_unstable();
        numbers.dedup();

        let mut gaps = Vec::new();
        for pair in numbers.windows(2) {
            let hole = pair[1] - pair[0] - 1;
            if hole == 0 {
                continue;
            }
            if hole > self.config.max_gap_span {
                tracing::debug!(
                    target: VALIDATE,
                    from = pair[0],
                    to = pair[1],
                    "hole too wide to be a missed question"
                );
                continue;
            }
            gaps.extend(pair[0] + 1..pair[1]);
        }
        gaps
    }

    /// Y range of every top-level question over its own and its
    /// sub-questions' elements.
    pub fn question_ranges(page: &PageAssignment) -> BTreeMap<String, YRange> {
        let mut ranges: BTreeMap<String, YRange> = BTreeMap::new();
        for element in &page.elements {
            let Some(question) = element.assignment.question() else {
                continue;
            };
            let b = element.bbox();
            ranges
                .entry(top_level(question).to_string())
                .and_modify(|r| {
                    r.min_y = r.min_y.min(b.y1);
                    r.max_y = r.max_y.max(b.y2);
                })
                .or_insert(YRange {
                    min_y: b.y1,
                    max_y: b.y2,
                });
        }
        ranges
    }

    pub fn range_conflicts(&self, page: &PageAssignment) -> Vec<(String, String)> {
        let ranges = Self::question_ranges(page);
        let mut ids: Vec<&String> = ranges.keys().collect();
        ids.sort_by(|a, b| natural_cmp(a, b));

        let column_of = |id: &str| page.anchors.get(id).map(|a| page.columns.column_index_of(a));

        let mut conflicts = Vec::new();
        for (i, a) in ids.iter().enumerate() {
            for b in &ids[i + 1..] {
                let (Some(col_a), Some(col_b)) = (column_of(a), column_of(b)) else {
                    continue;
                };
                if col_a != col_b {
                    continue;
                }
                let overlap = ranges[*a].overlap(&ranges[*b]);
                if let Some(o) = overlap.filter(|o| o.span() > self.config.overlap_tolerance) {
                    tracing::debug!(
                        target: VALIDATE,
                        first = %a,
                        second = %b,
                        overlap = o.span(),
                        "question ranges overlap"
                    );
                    conflicts.push(((*a).clone(), (*b).clone()));
                }
            }
        }
        conflicts
    }
}
