use indexmap::IndexMap;
use serde::Serialize;
use std::collections::HashMap;

use crate::config::AnchorConfig;
use crate::layout::{DetectedElement, ElementClass, PageData};
use crate::logging::ANCHOR;
use crate::pattern::{
    match_question_identifier, match_sub_marker, natural_cmp, normalize_text, MatchTier,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnchorKind {
    QuestionNumber,
    QuestionType,
    Unit,
}

/// How an anchor came to exist, kept for auditing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    /// Accepted by the fused detector/OCR/pattern score.
    Fused,
    /// Found by scanning every OCR result after the fused pass found nothing.
    Fallback,
    /// Materialized by the correction engine for a missing number.
    Recovered,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Anchor {
    pub identifier: String,
    pub kind: AnchorKind,
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
    pub confidence: f32,
    pub source_element_id: Option<u32>,
    pub provenance: Provenance,
    pub parent: Option<String>,
}

impl Anchor {
    pub fn from_element(
        identifier: String,
        kind: AnchorKind,
        element: &DetectedElement,
        confidence: f32,
        provenance: Provenance,
    ) -> Self {
        let b = &element.bbox;
        Anchor {
            identifier,
            kind,
            x: b.x1.round() as i32,
            y: b.y1.round() as i32,
            width: b.width().round() as i32,
            height: b.height().round() as i32,
            confidence,
            source_element_id: Some(element.id),
            provenance,
            parent: None,
        }
    }

    pub fn is_sub_question(&self) -> bool {
        self.parent.is_some()
    }
}

/// All anchors found on one page.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AnchorSet {
    /// Question and sub-question anchors keyed by identifier, natural order.
    pub questions: IndexMap<String, Anchor>,
    /// Question-type and unit headers in top-to-bottom order.
    pub headers: Vec<Anchor>,
}

impl AnchorSet {
    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.questions.len()
    }

    pub fn get(&self, identifier: &str) -> Option<&Anchor> {
        self.questions.get(identifier)
    }

    pub fn contains(&self, identifier: &str) -> bool {
        self.questions.contains_key(identifier)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Anchor> {
        self.questions.values()
    }

    /// Top-level question anchors only.
    pub fn main_anchors(&self) -> impl Iterator<Item = &Anchor> {
        self.questions.values().filter(|a| !a.is_sub_question())
    }

    /// Insert, keeping the higher-confidence anchor on an identifier clash.
    pub fn insert(&mut self, anchor: Anchor) -> bool {
        match self.questions.get(&anchor.identifier) {
            Some(existing) if existing.confidence >= anchor.confidence => {
                tracing::debug!(
                    target: ANCHOR,
                    identifier = %anchor.identifier,
                    kept = existing.confidence,
                    dropped = anchor.confidence,
                    "duplicate anchor resolved"
                );
                false
            }
            _ => {
                self.questions.insert(anchor.identifier.clone(), anchor);
                true
            }
        }
    }

    pub fn sort(&mut self) {
        self.questions.sort_by(|a, _, b, _| natural_cmp(a, b));
        self.headers.sort_by(|a, b| a.y.cmp(&b.y).then_with(|| a.x.cmp(&b.x)));
    }

    /// Rename a question and every sub-question below it. Returns false when
    /// `from` is unknown or `to` is taken.
    pub fn rename(&mut self, from: &str, to: &str) -> bool {
        if !self.contains(from) || self.contains(to) {
            return false;
        }
        let prefix = format!("{from}-");
        let renamed: Vec<Anchor> = self
            .questions
            .drain(..)
            .map(|(_, mut anchor)| {
                if anchor.identifier == from {
                    anchor.identifier = to.to_string();
                } else if let Some(rest) = anchor.identifier.strip_prefix(&prefix) {
                    anchor.identifier = format!("{to}-{rest}");
                    anchor.parent = Some(to.to_string());
                }
                anchor
            })
            .collect();
        self.questions = renamed
            .into_iter()
            .map(|a| (a.identifier.clone(), a))
            .collect();
        self.sort();
        true
    }

    /// Element id -> identifier for every anchor backed by a detected box.
    pub fn source_index(&self) -> HashMap<u32, String> {
        self.questions
            .values()
            .filter_map(|a| a.source_element_id.map(|id| (id, a.identifier.clone())))
            .collect()
    }
}

/// A sub-question marker waiting for its parent to be known.
struct SubCandidate<'a> {
    element: &'a DetectedElement,
    parent: Option<String>,
    number: u32,
    score: f32,
}

/// CBHLS: fuse detector confidence, OCR confidence and pattern tier into one
/// anchor score per question-identifying box.
#[derive(Debug, Clone, Default)]
pub struct AnchorExtractor {
    config: AnchorConfig,
}

impl AnchorExtractor {
    pub fn new(config: AnchorConfig) -> Self {
        Self { config }
    }

    pub fn fused_score(&self, detector: f32, ocr: f32, tier: MatchTier) -> f32 {
        self.config.detector_weight * detector
            + self.config.ocr_weight * ocr
            + self.config.pattern_weight * tier.score()
    }

    pub fn extract(&self, page: &PageData) -> AnchorSet {
        let mut set = AnchorSet::default();
        let mut subs = Vec::new();

        for element in page.elements.iter().filter(|e| e.class.is_identifier()) {
            let Some(obs) = page.text_of(element.id) else {
                continue;
            };
            if obs.text.trim().is_empty() {
                continue;
            }

            if let Some(sub) = self.sub_candidate(element, &obs.text, obs.confidence) {
                subs.push(sub);
                continue;
            }
            if element.class == ElementClass::SubQuestionNumber {
                continue;
            }

            let Some(found) = match_question_identifier(&obs.text) else {
                tracing::debug!(
                    target: ANCHOR,
                    element_id = element.id,
                    text = %obs.text,
                    "no identifier in question-number box"
                );
                continue;
            };

            let score = self.fused_score(element.confidence, obs.confidence, found.tier);
            if score < self.config.accept_threshold {
                tracing::debug!(
                    target: ANCHOR,
                    element_id = element.id,
                    identifier = %found.identifier,
                    score,
                    "anchor rejected below threshold"
                );
                continue;
            }

            if let Some((parent, child)) = found.identifier.split_once('-') {
                if let Ok(number) = child.parse() {
                    subs.push(SubCandidate {
                        element,
                        parent: Some(parent.to_string()),
                        number,
                        score,
                    });
                }
                continue;
            }

            tracing::debug!(
                target: ANCHOR,
                element_id = element.id,
                identifier = %found.identifier,
                score,
                "anchor accepted"
            );
            set.insert(Anchor::from_element(
                found.identifier,
                AnchorKind::QuestionNumber,
                element,
                score,
                Provenance::Fused,
            ));
        }

        if set.is_empty() {
            self.fallback_scan(page, &mut set);
        }

        self.attach_sub_questions(subs, &mut set);
        self.collect_headers(page, &mut set);
        set.sort();

        tracing::info!(
            target: ANCHOR,
            anchors = set.len(),
            headers = set.headers.len(),
            "anchor extraction finished"
        );
        set
    }

    fn sub_candidate<'a>(
        &self,
        element: &'a DetectedElement,
        text: &str,
        ocr_confidence: f32,
    ) -> Option<SubCandidate<'a>> {
        let explicit_sub = element.class == ElementClass::SubQuestionNumber;
        let normalized = normalize_text(text);
        let looks_parenthesized = normalized.starts_with('(')
            || text
                .trim_start()
                .chars()
                .next()
                .is_some_and(|c| ('①'..='⑳').contains(&c));
        if !explicit_sub && !looks_parenthesized {
            return None;
        }

        let (parent, number) = match match_sub_marker(text) {
            Some(n) => (None, n),
            None if explicit_sub => {
                let found = match_question_identifier(text)?;
                match found.identifier.split_once('-') {
                    Some((p, c)) => (Some(p.to_string()), c.parse().ok()?),
                    None => (None, found.identifier.parse().ok()?),
                }
            }
            None => return None,
        };

        let score = self.fused_score(element.confidence, ocr_confidence, MatchTier::Dotted);
        if score < self.config.accept_threshold {
            return None;
        }
        Some(SubCandidate {
            element,
            parent,
            number,
            score,
        })
    }

    fn fallback_scan(&self, page: &PageData, set: &mut AnchorSet) {
        let cfg = &self.config;
        for (element_id, obs) in &page.texts {
            if obs.confidence < cfg.fallback_min_ocr_confidence {
                continue;
            }
            let Some(found) = match_question_identifier(&obs.text) else {
                continue;
            };
            if found.identifier.contains('-') {
                continue;
            }
            let score = obs.confidence * found.score();
            if score < cfg.fallback_min_score {
                continue;
            }
            let Some(element) = page.element(*element_id) else {
                continue;
            };

            let y = element.bbox.y1;
            let x = page
                .elements
                .iter()
                .filter(|e| e.class.is_identifier())
                .filter(|e| (e.bbox.y1 - y).abs() <= cfg.fallback_y_tolerance)
                .min_by(|a, b| {
                    (a.bbox.y1 - y)
                        .abs()
                        .total_cmp(&(b.bbox.y1 - y).abs())
                        .then_with(|| a.id.cmp(&b.id))
                })
                .map(|e| e.bbox.x1.round() as i32)
                .unwrap_or(0);

            let mut anchor = Anchor::from_element(
                found.identifier,
                AnchorKind::QuestionNumber,
                element,
                score,
                Provenance::Fallback,
            );
            anchor.x = x;

            tracing::debug!(
                target: ANCHOR,
                element_id = element.id,
                identifier = %anchor.identifier,
                score,
                provenance = "fallback",
                "anchor accepted"
            );
            set.insert(anchor);
        }
    }

    fn attach_sub_questions(&self, mut subs: Vec<SubCandidate<'_>>, set: &mut AnchorSet) {
        subs.sort_by_key(|s| s.element.id);
        for sub in subs {
            let parent = sub
                .parent
                .clone()
                .or_else(|| nearest_parent_above(sub.element, set));
            let Some(parent) = parent else {
                tracing::debug!(
                    target: ANCHOR,
                    element_id = sub.element.id,
                    "sub-question marker without a parent question, dropped"
                );
                continue;
            };

            let mut anchor = Anchor::from_element(
                format!("{parent}-{}", sub.number),
                AnchorKind::QuestionNumber,
                sub.element,
                sub.score,
                Provenance::Fused,
            );
            anchor.parent = Some(parent);
            set.insert(anchor);
        }
    }

    fn collect_headers(&self, page: &PageData, set: &mut AnchorSet) {
        for element in &page.elements {
            let kind = match element.class {
                ElementClass::QuestionType => AnchorKind::QuestionType,
                ElementClass::Unit => AnchorKind::Unit,
                _ => continue,
            };
            let Some(text) = page
                .text_of(element.id)
                .map(|t| normalize_text(&t.text))
                .filter(|t| !t.is_empty())
            else {
                continue;
            };
            set.headers.push(Anchor::from_element(
                text,
                kind,
                element,
                element.confidence,
                Provenance::Fused,
            ));
        }
    }
}

/// Nearest top-level anchor at or above the element, horizontal offset
/// counting half as much as vertical.
fn nearest_parent_above(element: &DetectedElement, set: &AnchorSet) -> Option<String> {
    let ex = element.bbox.x1;
    let ey = element.bbox.y1;
    set.main_anchors()
        .filter(|a| a.y as f32 <= ey)
        .min_by(|a, b| {
            let da = (ey - a.y as f32) + 0.5 * (ex - a.x as f32).abs();
            let db = (ey - b.y as f32) + 0.5 * (ex - b.x as f32).abs();
            da.total_cmp(&db)
                .then_with(|| natural_cmp(&a.identifier, &b.identifier))
        })
        .map(|a| a.identifier.clone())
}
