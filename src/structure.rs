//! Final output models: the hierarchical question document and the
//! flattened CIM interchange map.

use indexmap::IndexMap;
use serde::Serialize;

use crate::anchor::{Anchor, AnchorKind};
use crate::layout::{reading_order, AssignedElement, BBox, ContentCategory};
use crate::logging::STRUCTURE;
use crate::pattern::natural_cmp;
use crate::spatial::{top_level, PageAssignment};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub question_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContentElement {
    #[serde(rename = "type")]
    pub kind: String,
    pub content: String,
}

impl ContentElement {
    fn new(kind: &str, content: &str) -> Self {
        Self {
            kind: kind.to_string(),
            content: content.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionGroup {
    pub number: String,
    pub metadata: QuestionMetadata,
    pub content_elements: Vec<ContentElement>,
    pub sub_questions: Vec<QuestionGroup>,
    /// Ids of every element assigned to this exact identifier.
    #[serde(skip)]
    pub elements: Vec<u32>,
}

impl QuestionGroup {
    fn empty(number: &str) -> Self {
        QuestionGroup {
            number: number.to_string(),
            ..Default::default()
        }
    }

    /// This group followed by its sub-questions, depth first.
    pub fn flatten(&self) -> Vec<&QuestionGroup> {
        let mut out = vec![self];
        for sub in &self.sub_questions {
            out.extend(sub.flatten());
        }
        out
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StructureDocument {
    pub questions: Vec<QuestionGroup>,
    /// Elements that belong to no question, by id.
    pub unassigned: Vec<u32>,
}

impl StructureDocument {
    pub fn question(&self, number: &str) -> Option<&QuestionGroup> {
        self.questions
            .iter()
            .flat_map(|q| q.flatten())
            .find(|q| q.number == number)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CimElement {
    pub id: u32,
    pub class: String,
    pub bbox: BBox,
    pub confidence: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_description: Option<String>,
    pub question_number: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CimQuestion {
    pub question_number: String,
    pub question_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_description: Option<String>,
    pub content: Vec<ContentElement>,
}

/// Flattened element and question lists for downstream exporters.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CimDocument {
    pub elements: Vec<CimElement>,
    pub questions: Vec<CimQuestion>,
}

/// Role an element plays inside its question, or `None` when it is a
/// structural marker rather than content. Number boxes never are; a text box
/// that a fallback anchor was read from still is.
fn content_of(element: &AssignedElement) -> Option<ContentElement> {
    match element.category {
        ContentCategory::QuestionNumber | ContentCategory::QuestionType | ContentCategory::Unit => {
            None
        }
        category if category.is_visual() => element
            .description()
            .or_else(|| element.text())
            .map(|content| ContentElement::new(category.as_str(), content)),
        ContentCategory::Choice => element.text().map(|t| ContentElement::new("choice", t)),
        _ => element.text().map(|t| ContentElement::new("text", t)),
    }
}

#[derive(Debug, Clone, Default)]
pub struct StructureBuilder;

impl StructureBuilder {
    pub fn new() -> Self {
        StructureBuilder
    }

    pub fn build(&self, page: &PageAssignment) -> StructureDocument {
        let mut top: IndexMap<String, QuestionGroup> = IndexMap::new();
        let mut subs: Vec<(String, QuestionGroup)> = Vec::new();

        for (identifier, mut members) in page.groups() {
            members.sort_by(|a, b| reading_order(a.bbox(), b.bbox()).then(a.id().cmp(&b.id())));

            let group = QuestionGroup {
                number: identifier.clone(),
                metadata: self.metadata_for(page, &identifier),
                content_elements: members.iter().filter_map(|e| content_of(e)).collect(),
                sub_questions: Vec::new(),
                elements: members.iter().map(|e| e.id()).collect(),
            };

            let root = top_level(&identifier);
            let is_sub = root != identifier
                || page
                    .anchors
                    .get(&identifier)
                    .is_some_and(|a| a.is_sub_question());
            if is_sub {
                subs.push((root.to_string(), group));
            } else {
                top.insert(identifier, group);
            }
        }

        for (parent, group) in subs {
            if !top.contains_key(&parent) {
                tracing::debug!(
                    target: STRUCTURE,
                    parent = %parent,
                    child = %group.number,
                    "creating empty parent for orphaned sub-question"
                );
            }
            top.entry(parent.clone())
                .or_insert_with(|| QuestionGroup::empty(&parent))
                .sub_questions
                .push(group);
        }

        let mut questions: Vec<QuestionGroup> = top.into_values().collect();
        questions.sort_by(|a, b| natural_cmp(&a.number, &b.number));
        for q in &mut questions {
            q.sub_questions.sort_by(|a, b| natural_cmp(&a.number, &b.number));
        }

        let unassigned: Vec<u32> = page.unassigned().map(|e| e.id()).collect();

        tracing::info!(
            target: STRUCTURE,
            questions = questions.len(),
            unassigned = unassigned.len(),
            "structure built"
        );

        StructureDocument {
            questions,
            unassigned,
        }
    }

    /// Most recent question-type and unit header preceding the question in
    /// reading order.
    fn metadata_for(&self, page: &PageAssignment, identifier: &str) -> QuestionMetadata {
        let Some(anchor) = page.anchors.get(identifier) else {
            return QuestionMetadata::default();
        };
        let position = page.reading_position(anchor);
        let latest = |kind: AnchorKind| -> Option<String> {
            page.anchors
                .headers
                .iter()
                .filter(|h| h.kind == kind)
                .filter(|h| page.reading_position(h) <= position)
                .max_by_key(|h| (page.reading_position(h), h.x))
                .map(|h: &Anchor| h.identifier.clone())
        };
        QuestionMetadata {
            question_type: latest(AnchorKind::QuestionType),
            unit: latest(AnchorKind::Unit),
        }
    }

    pub fn build_cim(&self, page: &PageAssignment, document: &StructureDocument) -> CimDocument {
        let elements = page
            .elements
            .iter()
            .map(|e| CimElement {
                id: e.id(),
                class: e.element.class.to_string(),
                bbox: *e.bbox(),
                confidence: e.element.confidence,
                text: e.text().map(str::to_string),
                ai_description: e.description().map(str::to_string),
                question_number: e.assignment.label().to_string(),
            })
            .collect();

        let questions = document
            .questions
            .iter()
            .flat_map(|q| q.flatten())
            .map(|q| {
                let texts: Vec<&str> = q
                    .content_elements
                    .iter()
                    .filter(|c| c.kind == "text")
                    .map(|c| c.content.as_str())
                    .collect();
                let descriptions: Vec<&str> = q
                    .elements
                    .iter()
                    .filter_map(|id| page.element(*id))
                    .filter(|e| e.category.is_visual())
                    .filter_map(|e| e.description())
                    .collect();
                CimQuestion {
                    question_number: q.number.clone(),
                    question_text: texts.join("\n"),
                    ai_description: (!descriptions.is_empty()).then(|| descriptions.join("\n")),
                    content: q.content_elements.clone(),
                }
            })
            .collect();

        CimDocument {
            elements,
            questions,
        }
    }
}
