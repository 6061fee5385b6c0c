//! Spatial assignment of detected elements to question anchors.
//!
//! Every element is matched to the nearest anchor by a weighted 2D distance
//! in which vertical offset dominates, searched within an adaptive radius
//! derived from how densely the anchors of the element's column are packed.

use dashmap::DashMap;
use rayon::prelude::*;
use serde::Serialize;
use smallvec::SmallVec;
use std::collections::{BTreeMap, HashMap};
use std::fmt::Debug;
use std::sync::Arc;

use crate::anchor::{Anchor, AnchorSet};
use crate::columns::{ColumnDetector, ColumnLayout};
use crate::config::{PipelineConfig, SpatialConfig};
use crate::layout::{
    AssignedElement, Assignment, BBox, ContentCategory, DetectedElement, PageData,
};
use crate::logging::SPATIAL;
use crate::pattern::{natural_cmp, parent_identifier};

/// Anchors that share a column, with the search radius derived from them.
#[derive(Debug, Clone)]
pub struct AnchorLane<'a> {
    pub anchors: SmallVec<[&'a Anchor; 16]>,
    pub radius: f32,
}

impl<'a> AnchorLane<'a> {
    fn new(anchors: SmallVec<[&'a Anchor; 16]>, config: &SpatialConfig) -> Self {
        let ys: Vec<i32> = anchors.iter().map(|a| a.y).collect();
        let radius = adaptive_radius(&ys, config);
        AnchorLane { anchors, radius }
    }
}

/// Per-page lookup structure shared by every strategy.
#[derive(Debug, Clone)]
pub struct AnchorIndex<'a> {
    pub layout: ColumnLayout,
    lanes: Vec<AnchorLane<'a>>,
    global: AnchorLane<'a>,
}

impl<'a> AnchorIndex<'a> {
    pub fn build(anchors: &'a AnchorSet, layout: ColumnLayout, config: &SpatialConfig) -> Self {
        let mut per_column: Vec<SmallVec<[&'a Anchor; 16]>> = vec![SmallVec::new(); layout.len()];
        for anchor in anchors.iter() {
            let idx = layout.column_index_of(anchor);
            if let Some(lane) = per_column.get_mut(idx) {
                lane.push(anchor);
            }
        }

        let lanes = per_column
            .into_iter()
            .map(|lane| AnchorLane::new(lane, config))
            .collect();
        let global = AnchorLane::new(anchors.iter().collect(), config);

        AnchorIndex {
            layout,
            lanes,
            global,
        }
    }

    pub fn lane_at(&self, x: f32) -> Option<&AnchorLane<'a>> {
        self.layout
            .column_for(x)
            .and_then(|column| self.lanes.get(column.index))
    }

    pub fn global_lane(&self) -> &AnchorLane<'a> {
        &self.global
    }

    pub fn radius_of_column(&self, index: usize) -> Option<f32> {
        self.lanes.get(index).map(|l| l.radius)
    }
}

/// `clamp(factor × median gap between consecutive anchor Y, min, max)`.
/// Fewer than two distinct anchor rows fall back to the upper bound.
pub fn adaptive_radius(ys: &[i32], config: &SpatialConfig) -> f32 {
    let mut sorted = ys.to_vec();
    sorted.sort_unstable();
    let mut gaps: Vec<i32> = sorted
        .windows(2)
        .map(|w| w[1] - w[0])
        .filter(|gap| *gap > 0)
        .collect();
    if gaps.is_empty() {
        return config.max_radius.max(config.min_radius);
    }
    gaps.sort_unstable();

    let mid = gaps.len() / 2;
    let median = if gaps.len() % 2 == 0 {
        (gaps[mid - 1] + gaps[mid]) as f32 / 2.0
    } else {
        gaps[mid] as f32
    };

    (config.radius_factor * median)
        .max(config.min_radius)
        .min(config.max_radius)
}

/// Weighted distance between an element's top-left corner and an anchor.
#[derive(Debug, Clone, Copy)]
pub struct DistanceModel {
    pub weight_x: f32,
    pub weight_y: f32,
    pub below_discount: f32,
}

impl DistanceModel {
    pub fn from_config(config: &SpatialConfig) -> Self {
        DistanceModel {
            weight_x: config.weight_x,
            weight_y: config.weight_y,
            below_discount: config.below_discount,
        }
    }

    pub fn planar(&self, element: &BBox, anchor: &Anchor) -> f32 {
        let dx = (element.x1 - anchor.x as f32) * self.weight_x;
        let dy = (element.y1 - anchor.y as f32) * self.weight_y;
        let d = (dx * dx + dy * dy).sqrt();
        self.discounted(d, element, anchor)
    }

    pub fn vertical(&self, element: &BBox, anchor: &Anchor) -> f32 {
        let d = (element.y1 - anchor.y as f32).abs() * self.weight_y;
        self.discounted(d, element, anchor)
    }

    fn discounted(&self, d: f32, element: &BBox, anchor: &Anchor) -> f32 {
        // questions read downwards from their number
        if element.y1 >= anchor.y as f32 {
            d * self.below_discount
        } else {
            d
        }
    }
}

/// The anchor an element would join, with the radius it had to fall within.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub identifier: String,
    pub distance: f32,
    pub radius: f32,
}

impl Candidate {
    pub fn within_radius(&self) -> bool {
        self.distance <= self.radius
    }
}

/// Pluggable nearest-anchor rule.
pub trait AssignmentStrategy: Send + Sync + Debug {
    fn name(&self) -> &'static str;

    /// Whether column detection should run before assignment.
    fn uses_columns(&self) -> bool;

    fn nearest(&self, element: &DetectedElement, index: &AnchorIndex<'_>) -> Option<Candidate>;
}

fn closest<'a, F>(anchors: &[&'a Anchor], mut distance: F) -> Option<(&'a Anchor, f32)>
where
    F: FnMut(&Anchor) -> f32,
{
    anchors
        .iter()
        .map(|a| (*a, distance(a)))
        .min_by(|(a, da), (b, db)| {
            da.total_cmp(db)
                .then_with(|| natural_cmp(&a.identifier, &b.identifier))
        })
}

fn widened(radius: f32, element: &DetectedElement, config: &SpatialConfig) -> f32 {
    if element.bbox.area() >= config.large_area {
        radius * config.large_radius_factor
    } else {
        radius
    }
}

/// Column lookup, then weighted 2D distance within the column.
#[derive(Debug, Clone)]
pub struct ColumnAware2d {
    distance: DistanceModel,
    config: SpatialConfig,
}

impl ColumnAware2d {
    pub fn new(config: SpatialConfig) -> Self {
        Self {
            distance: DistanceModel::from_config(&config),
            config,
        }
    }
}

impl AssignmentStrategy for ColumnAware2d {
    fn name(&self) -> &'static str {
        "column_aware_2d"
    }

    fn uses_columns(&self) -> bool {
        true
    }

    fn nearest(&self, element: &DetectedElement, index: &AnchorIndex<'_>) -> Option<Candidate> {
        let lane = index.lane_at(element.bbox.x1)?;
        let (anchor, distance) =
            closest(&lane.anchors, |a| self.distance.planar(&element.bbox, a))?;
        Some(Candidate {
            identifier: anchor.identifier.clone(),
            distance,
            radius: widened(lane.radius, element, &self.config),
        })
    }
}

/// Y-only proximity over every anchor on the page; used when column
/// detection is disabled.
#[derive(Debug, Clone)]
pub struct Proximity1d {
    distance: DistanceModel,
    config: SpatialConfig,
}

impl Proximity1d {
    pub fn new(config: SpatialConfig) -> Self {
        Self {
            distance: DistanceModel::from_config(&config),
            config,
        }
    }
}

impl AssignmentStrategy for Proximity1d {
    fn name(&self) -> &'static str {
        "proximity_1d"
    }

    fn uses_columns(&self) -> bool {
        false
    }

    fn nearest(&self, element: &DetectedElement, index: &AnchorIndex<'_>) -> Option<Candidate> {
        let lane = index.global_lane();
        let (anchor, distance) =
            closest(&lane.anchors, |a| self.distance.vertical(&element.bbox, a))?;
        Some(Candidate {
            identifier: anchor.identifier.clone(),
            distance,
            radius: widened(lane.radius, element, &self.config),
        })
    }
}

/// The assignment state handed from stage to stage.
#[derive(Debug, Clone, Serialize)]
pub struct PageAssignment {
    pub page_width: f32,
    pub page_height: f32,
    pub anchors: AnchorSet,
    pub columns: ColumnLayout,
    /// One entry per detected element, ordered by element id.
    pub elements: Vec<AssignedElement>,
}

impl PageAssignment {
    pub fn element(&self, element_id: u32) -> Option<&AssignedElement> {
        self.elements
            .binary_search_by_key(&element_id, |e| e.id())
            .ok()
            .map(|idx| &self.elements[idx])
    }

    /// Elements assigned exactly to `identifier`.
    pub fn members_of<'s>(
        &'s self,
        identifier: &'s str,
    ) -> impl Iterator<Item = &'s AssignedElement> + 's {
        self.elements
            .iter()
            .filter(move |e| e.assignment.question() == Some(identifier))
    }

    /// Elements of a top-level question including its sub-questions.
    pub fn family_of<'s>(
        &'s self,
        identifier: &'s str,
    ) -> impl Iterator<Item = &'s AssignedElement> + 's {
        self.elements.iter().filter(move |e| match e.assignment.question() {
            Some(q) => top_level(q) == identifier,
            None => false,
        })
    }

    pub fn unassigned(&self) -> impl Iterator<Item = &AssignedElement> {
        self.elements.iter().filter(|e| !e.assignment.is_assigned())
    }

    /// Identifier -> members, natural order. Unassigned elements are skipped.
    pub fn groups(&self) -> Vec<(String, Vec<&AssignedElement>)> {
        let mut groups: HashMap<&str, Vec<&AssignedElement>> = HashMap::new();
        for anchor in self.anchors.iter() {
            groups.entry(anchor.identifier.as_str()).or_default();
        }
        for element in &self.elements {
            if let Some(q) = element.assignment.question() {
                groups.entry(q).or_default().push(element);
            }
        }
        let mut out: Vec<(String, Vec<&AssignedElement>)> = groups
            .into_iter()
            .map(|(id, members)| (id.to_string(), members))
            .collect();
        out.sort_by(|a, b| natural_cmp(&a.0, &b.0));
        out
    }

    pub fn reassign(&mut self, element_id: u32, to: Assignment) -> Option<Assignment> {
        let idx = self
            .elements
            .binary_search_by_key(&element_id, |e| e.id())
            .ok()?;
        Some(std::mem::replace(&mut self.elements[idx].assignment, to))
    }

    /// Rename a question (and its sub-questions) everywhere.
    pub fn rename_question(&mut self, from: &str, to: &str) -> bool {
        if !self.anchors.rename(from, to) {
            return false;
        }
        let prefix = format!("{from}-");
        for element in &mut self.elements {
            let renamed = match element.assignment.question() {
                Some(q) if q == from => Some(to.to_string()),
                Some(q) => q.strip_prefix(&prefix).map(|rest| format!("{to}-{rest}")),
                None => None,
            };
            if let Some(id) = renamed {
                element.assignment = Assignment::Assigned(id);
            }
        }
        true
    }

    /// Reading-order position of an anchor: column first, then Y.
    pub fn reading_position(&self, anchor: &Anchor) -> (usize, i32) {
        (self.columns.column_index_of(anchor), anchor.y)
    }
}

/// `"4-1"` -> `"4"`, `"4"` -> `"4"`.
pub fn top_level(identifier: &str) -> &str {
    let mut current = identifier;
    while let Some(parent) = parent_identifier(current) {
        current = parent;
    }
    current
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QuestionStats {
    pub elements: usize,
    pub classes: BTreeMap<String, usize>,
}

/// Per-question element counts, identical whichever path produced them.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AssignmentStats {
    pub questions: BTreeMap<String, QuestionStats>,
    pub unassigned: usize,
}

impl AssignmentStats {
    pub fn sequential(elements: &[AssignedElement]) -> Self {
        let mut stats = AssignmentStats::default();
        for element in elements {
            match element.assignment.question() {
                Some(q) => {
                    let entry = stats.questions.entry(q.to_string()).or_default();
                    entry.elements += 1;
                    *entry
                        .classes
                        .entry(element.element.class.to_string())
                        .or_insert(0) += 1;
                }
                None => stats.unassigned += 1,
            }
        }
        stats
    }

    pub fn parallel(elements: &[AssignedElement]) -> Self {
        let acc: DashMap<(String, String), usize> = DashMap::new();
        elements.par_iter().for_each(|element| {
            let key = (
                element.assignment.label().to_string(),
                element.element.class.to_string(),
            );
            *acc.entry(key).or_insert(0) += 1;
        });

        let mut stats = AssignmentStats::default();
        for ((question, class), count) in acc.into_iter() {
            if question == crate::layout::UNASSIGNED_LABEL {
                stats.unassigned += count;
                continue;
            }
            let entry = stats.questions.entry(question).or_default();
            entry.elements += count;
            *entry.classes.entry(class).or_insert(0) += count;
        }
        stats
    }
}

/// Builds the per-page anchor index and assigns every element.
#[derive(Debug, Clone)]
pub struct SpatialAssigner {
    strategy: Arc<dyn AssignmentStrategy>,
    columns: ColumnDetector,
    config: SpatialConfig,
}

impl SpatialAssigner {
    pub fn new(
        strategy: Arc<dyn AssignmentStrategy>,
        columns: ColumnDetector,
        config: SpatialConfig,
    ) -> Self {
        Self {
            strategy,
            columns,
            config,
        }
    }

    /// Column-aware 2D unless columns are disabled, then Y-only proximity.
    pub fn from_config(config: &PipelineConfig) -> Self {
        let strategy: Arc<dyn AssignmentStrategy> = if config.columns.enabled {
            Arc::new(ColumnAware2d::new(config.spatial.clone()))
        } else {
            Arc::new(Proximity1d::new(config.spatial.clone()))
        };
        Self::new(
            strategy,
            ColumnDetector::new(config.columns.clone()),
            config.spatial.clone(),
        )
    }

    pub fn strategy(&self) -> &dyn AssignmentStrategy {
        self.strategy.as_ref()
    }

    pub fn config(&self) -> &SpatialConfig {
        &self.config
    }

    pub fn distance_model(&self) -> DistanceModel {
        DistanceModel::from_config(&self.config)
    }

    pub fn layout_for(&self, anchors: &AnchorSet, page_width: f32) -> ColumnLayout {
        let width = page_width.ceil() as i32;
        if self.strategy.uses_columns() {
            self.columns.detect(anchors.main_anchors(), width)
        } else {
            ColumnLayout::single(width)
        }
    }

    fn use_parallel(&self, count: usize) -> bool {
        self.config.parallel && count > self.config.parallel_threshold
    }

    pub fn assign(&self, page: &PageData, anchors: AnchorSet) -> PageAssignment {
        let layout = self.layout_for(&anchors, page.width);
        let elements = {
            let index = AnchorIndex::build(&anchors, layout.clone(), &self.config);
            let sources = anchors.source_index();
            let assign_one =
                |element: &DetectedElement| self.assign_element(page, element, &index, &sources);

            if self.use_parallel(page.elements.len()) {
                tracing::debug!(
                    target: SPATIAL,
                    elements = page.elements.len(),
                    "parallel assignment path"
                );
                page.elements.par_iter().map(assign_one).collect::<Vec<_>>()
            } else {
                page.elements.iter().map(assign_one).collect::<Vec<_>>()
            }
        };

        let assignment = PageAssignment {
            page_width: page.width,
            page_height: page.height,
            anchors,
            columns: layout,
            elements,
        };

        tracing::info!(
            target: SPATIAL,
            strategy = self.strategy.name(),
            elements = assignment.elements.len(),
            unassigned = assignment.unassigned().count(),
            "spatial assignment finished"
        );
        assignment
    }

    pub fn stats(&self, elements: &[AssignedElement]) -> AssignmentStats {
        if self.use_parallel(elements.len()) {
            AssignmentStats::parallel(elements)
        } else {
            AssignmentStats::sequential(elements)
        }
    }

    fn assign_element(
        &self,
        page: &PageData,
        element: &DetectedElement,
        index: &AnchorIndex<'_>,
        sources: &HashMap<u32, String>,
    ) -> AssignedElement {
        let assignment = match sources.get(&element.id) {
            Some(identifier) => Assignment::Assigned(identifier.clone()),
            None => match self.strategy.nearest(element, index) {
                Some(candidate) if candidate.within_radius() => {
                    tracing::debug!(
                        target: SPATIAL,
                        element_id = element.id,
                        question = %candidate.identifier,
                        distance = candidate.distance,
                        radius = candidate.radius,
                        "assigned to nearest anchor"
                    );
                    Assignment::Assigned(candidate.identifier)
                }
                Some(candidate) => {
                    tracing::debug!(
                        target: SPATIAL,
                        element_id = element.id,
                        nearest = %candidate.identifier,
                        distance = candidate.distance,
                        radius = candidate.radius,
                        "nearest anchor out of radius"
                    );
                    Assignment::Unassigned
                }
                None => {
                    tracing::debug!(
                        target: SPATIAL,
                        element_id = element.id,
                        "no candidate anchor"
                    );
                    Assignment::Unassigned
                }
            },
        };

        AssignedElement {
            element: element.clone(),
            text: page.texts.get(&element.id).cloned(),
            description: page.descriptions.get(&element.id).cloned(),
            assignment,
            category: ContentCategory::for_class(&element.class),
        }
    }
}
