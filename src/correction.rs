//! Best-effort repair of validation findings.
//!
//! Each finding is handled once: sequence gaps first (OCR digit correction,
//! then missing-question recovery), then range conflicts (element
//! re-assignment). Findings that cannot be resolved leave no trace in the
//! log, so running the engine over its own output is a no-op.

use ordered_float::OrderedFloat;
use rstar::{RTree, RTreeObject, AABB};
use serde::Serialize;
use std::collections::HashMap;

use crate::anchor::{Anchor, AnchorKind, Provenance};
use crate::config::CorrectionConfig;
use crate::layout::{AssignedElement, Assignment};
use crate::logging::CORRECT;
use crate::pattern::{natural_cmp, numeric_identifier};
use crate::spatial::{DistanceModel, PageAssignment};
use crate::validator::{ContextValidator, ValidationReport};

/// Digit pairs OCR engines commonly confuse on printed question numbers.
const CONFUSIONS: &[(char, char)] = &[
    ('0', '6'),
    ('0', '8'),
    ('0', '9'),
    ('1', '4'),
    ('1', '7'),
    ('2', '7'),
    ('3', '8'),
    ('5', '6'),
    ('5', '8'),
    ('6', '8'),
    ('8', '9'),
];

fn confusable_digits(a: char, b: char) -> bool {
    CONFUSIONS
        .iter()
        .any(|&(x, y)| (x, y) == (a, b) || (y, x) == (a, b))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum CorrectionKind {
    OcrCorrection,
    MissingRecovery,
    Reassignment,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CorrectionEntry {
    #[serde(rename = "type")]
    pub kind: CorrectionKind,
    pub before: String,
    pub after: String,
    pub reason: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub element_id: Option<u32>,
}

/// Everything the engine changed, in the order it changed it.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct CorrectionLog {
    entries: Vec<CorrectionEntry>,
}

impl CorrectionLog {
    fn push(&mut self, entry: CorrectionEntry) {
        tracing::info!(
            target: CORRECT,
            kind = ?entry.kind,
            before = %entry.before,
            after = %entry.after,
            element_id = entry.element_id,
            reason = %entry.reason,
            "correction applied"
        );
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[CorrectionEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn count(&self, kind: CorrectionKind) -> usize {
        self.entries.iter().filter(|e| e.kind == kind).count()
    }
}

/// True when `candidate` could be an OCR misreading of `target`.
pub fn is_ocr_confusion(candidate: &str, target: &str, max_edit_distance: usize) -> bool {
    if candidate == target {
        return false;
    }
    if candidate.len() == target.len() {
        if strsim::hamming(candidate, target) != Ok(1) {
            return false;
        }
        return candidate
            .chars()
            .zip(target.chars())
            .find(|(a, b)| a != b)
            .is_some_and(|(a, b)| confusable_digits(a, b));
    }
    candidate.len() == target.len() + 1
        && strsim::levenshtein(candidate, target) <= max_edit_distance
}

type Position = (usize, OrderedFloat<f32>);

/// An unassigned element's top-left corner, indexed for region queries.
struct UnassignedPoint {
    element_id: u32,
    x: f32,
    y: f32,
}

impl RTreeObject for UnassignedPoint {
    type Envelope = AABB<[f32; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point([self.x, self.y])
    }
}

#[derive(Debug, Clone)]
pub struct CorrectionEngine {
    config: CorrectionConfig,
    validator: ContextValidator,
    distance: DistanceModel,
}

impl CorrectionEngine {
    pub fn new(config: CorrectionConfig, validator: ContextValidator, distance: DistanceModel) -> Self {
        Self {
            config,
            validator,
            distance,
        }
    }

    pub fn validator(&self) -> &ContextValidator {
        &self.validator
    }

    /// Validate, correct, and validate again. The returned report describes
    /// the corrected assignment.
    pub fn run(&self, page: PageAssignment) -> (PageAssignment, ValidationReport, CorrectionLog) {
        let initial = self.validator.validate(&page);
        if initial.is_clean() {
            return (page, initial, CorrectionLog::default());
        }
        let (page, log) = self.correct(page, &initial);
        let report = if log.is_empty() {
            initial
        } else {
            self.validator.validate(&page)
        };
        (page, report, log)
    }

    /// Apply every finding of `report` once. Never fails.
    pub fn correct(
        &self,
        mut page: PageAssignment,
        report: &ValidationReport,
    ) -> (PageAssignment, CorrectionLog) {
        let mut log = CorrectionLog::default();
        if !self.config.enabled {
            return (page, log);
        }

        let mut renamed: HashMap<String, String> = HashMap::new();
        let mut gaps = report.sequence_gaps.clone();
        gaps.sort_unstable();
        gaps.dedup();

        let unassigned = unassigned_index(&page);
        for gap in gaps {
            if let Some((from, to)) = self.correct_ocr(&mut page, gap, &mut log) {
                renamed.insert(from, to);
                continue;
            }
            self.recover_missing(&mut page, gap, &unassigned, &mut log);
        }

        // Moves can open new overlaps. Elements only ever move to a strictly
        // tighter anchor, so repeating until nothing moves terminates.
        let mut conflicts: Vec<(String, String)> = report
            .range_conflicts
            .iter()
            .map(|(a, b)| {
                (
                    renamed.get(a).unwrap_or(a).clone(),
                    renamed.get(b).unwrap_or(b).clone(),
                )
            })
            .collect();
        for _ in 0..=page.elements.len() {
            let moved: usize = conflicts
                .iter()
                .map(|(a, b)| self.reassign(&mut page, a, b, &mut log))
                .sum();
            if moved == 0 {
                break;
            }
            conflicts = self.validator.range_conflicts(&page);
        }

        tracing::info!(
            target: CORRECT,
            corrections = log.len(),
            "correction pass finished"
        );
        (page, log)
    }

    fn position_of(&self, page: &PageAssignment, anchor: &Anchor) -> Position {
        let (column, y) = page.reading_position(anchor);
        (column, OrderedFloat(y as f32))
    }

    /// Predecessor and successor anchors of a missing number.
    fn bracket<'p>(&self, page: &'p PageAssignment, gap: u32) -> Option<(&'p Anchor, &'p Anchor)> {
        let numbered = || {
            page.anchors
                .main_anchors()
                .filter_map(|a| numeric_identifier(&a.identifier).map(|n| (n, a)))
        };
        let before = numbered().filter(|(n, _)| *n < gap).max_by_key(|(n, _)| *n)?;
        let after = numbered().filter(|(n, _)| *n > gap).min_by_key(|(n, _)| *n)?;
        Some((before.1, after.1))
    }

    fn correct_ocr(
        &self,
        page: &mut PageAssignment,
        gap: u32,
        log: &mut CorrectionLog,
    ) -> Option<(String, String)> {
        let target = gap.to_string();
        if page.anchors.contains(&target) {
            return None;
        }
        let (before, after) = self.bracket(page, gap)?;
        let (lo, hi) = (self.position_of(page, before), self.position_of(page, after));

        let mut candidates: Vec<&Anchor> = page
            .anchors
            .main_anchors()
            .filter(|a| numeric_identifier(&a.identifier).is_some())
            .filter(|a| is_ocr_confusion(&a.identifier, &target, self.config.max_edit_distance))
            .filter(|a| {
                let pos = self.position_of(page, a);
                pos > lo && pos < hi
            })
            .collect();
        candidates.sort_by(|a, b| natural_cmp(&a.identifier, &b.identifier));

        let from = candidates.first()?.identifier.clone();
        let reason = format!(
            "\"{from}\" sits between \"{}\" and \"{}\" and reads as {target} with one OCR confusion",
            before.identifier, after.identifier
        );
        if !page.rename_question(&from, &target) {
            return None;
        }
        log.push(CorrectionEntry {
            kind: CorrectionKind::OcrCorrection,
            before: from.clone(),
            after: target.clone(),
            reason,
            element_id: page.anchors.get(&target).and_then(|a| a.source_element_id),
        });
        Some((from, target))
    }

    fn recover_missing(
        &self,
        page: &mut PageAssignment,
        gap: u32,
        unassigned: &RTree<UnassignedPoint>,
        log: &mut CorrectionLog,
    ) {
        let target = gap.to_string();
        if page.anchors.contains(&target) {
            return;
        }
        let Some((before, after)) = self.bracket(page, gap) else {
            return;
        };
        let (lo, hi) = (self.position_of(page, before), self.position_of(page, after));
        let (before_id, after_id) = (before.identifier.clone(), after.identifier.clone());

        // Every column band between the two anchors, clipped at both ends.
        let mut region: Vec<&UnassignedPoint> = Vec::new();
        for column in page.columns.columns.iter().filter(|c| c.index >= lo.0 && c.index <= hi.0) {
            let top = if column.index == lo.0 { lo.1 .0 } else { 0.0 };
            let bottom = if column.index == hi.0 { hi.1 .0 } else { page.page_height };
            let envelope = AABB::from_corners(
                [column.start_x as f32, top],
                [column.end_x as f32, bottom],
            );
            region.extend(unassigned.locate_in_envelope(&envelope));
        }

        let first = region
            .into_iter()
            .filter_map(|p| {
                let column = page.columns.column_for(p.x)?;
                let pos: Position = (column.index, OrderedFloat(p.y));
                (pos > lo && pos < hi).then_some((pos, p.element_id))
            })
            .min();
        let Some((_, element_id)) = first else {
            tracing::debug!(
                target: CORRECT,
                gap,
                "no unassigned content where the missing question should be"
            );
            return;
        };
        let Some(seed) = page.element(element_id) else {
            return;
        };

        let b = *seed.bbox();
        page.anchors.insert(Anchor {
            identifier: target.clone(),
            kind: AnchorKind::QuestionNumber,
            x: b.x1.round() as i32,
            y: b.y1.round() as i32,
            width: b.width().round() as i32,
            height: b.height().round() as i32,
            confidence: 0.0,
            source_element_id: None,
            provenance: Provenance::Recovered,
            parent: None,
        });
        page.anchors.sort();

        log.push(CorrectionEntry {
            kind: CorrectionKind::MissingRecovery,
            before: Assignment::Unassigned.label().to_string(),
            after: target,
            reason: format!(
                "unassigned content between \"{before_id}\" and \"{after_id}\" where the number is missing"
            ),
            element_id: None,
        });
    }

    /// Moves the elements inside the overlap of `a` and `b` to their tighter
    /// anchor. Returns how many moved.
    fn reassign(
        &self,
        page: &mut PageAssignment,
        a: &str,
        b: &str,
        log: &mut CorrectionLog,
    ) -> usize {
        let (Some(anchor_a), Some(anchor_b)) = (page.anchors.get(a), page.anchors.get(b)) else {
            return 0;
        };
        let ranges = ContextValidator::question_ranges(page);
        let (Some(range_a), Some(range_b)) = (ranges.get(a), ranges.get(b)) else {
            return 0;
        };
        let Some(overlap) = range_a.overlap(range_b) else {
            return 0;
        };

        let sources = page.anchors.source_index();
        let pair = [anchor_a, anchor_b];
        let moves: Vec<(u32, String, String)> = page
            .elements
            .iter()
            .filter(|e| matches!(e.assignment.question(), Some(q) if q == a || q == b))
            .filter(|e| !sources.contains_key(&e.id()))
            .filter(|e| overlap.contains(e.bbox().y1))
            .filter_map(|e| {
                let current = e.assignment.question()?;
                let best = self.tighter(e, &pair)?;
                (best != current).then(|| (e.id(), current.to_string(), best.to_string()))
            })
            .collect();

        let moved = moves.len();
        for (element_id, from, to) in moves {
            page.reassign(element_id, Assignment::Assigned(to.clone()));
            log.push(CorrectionEntry {
                kind: CorrectionKind::Reassignment,
                before: from,
                after: to.clone(),
                reason: format!("reading order places the element under \"{to}\""),
                element_id: Some(element_id),
            });
        }
        moved
    }

    /// Reading-order nearest: anchors above the element win over anchors
    /// below it, then the weighted distance decides.
    fn tighter<'a>(&self, element: &AssignedElement, anchors: &[&'a Anchor]) -> Option<&'a str> {
        let y = element.bbox().y1;
        anchors
            .iter()
            .copied()
            .min_by(|x, z| {
                let key = |a: &Anchor| {
                    (
                        a.y as f32 > y,
                        OrderedFloat(self.distance.planar(element.bbox(), a)),
                    )
                };
                key(*x)
                    .cmp(&key(*z))
                    .then_with(|| natural_cmp(&x.identifier, &z.identifier))
            })
            .map(|a| a.identifier.as_str())
    }
}

fn unassigned_index(page: &PageAssignment) -> RTree<UnassignedPoint> {
    RTree::bulk_load(
        page.unassigned()
            .map(|e| UnassignedPoint {
                element_id: e.id(),
                x: e.bbox().x1,
                y: e.bbox().y1,
            })
            .collect(),
    )
}
