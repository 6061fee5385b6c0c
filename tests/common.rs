#![allow(dead_code)]

use delver_exam::anchor::AnchorExtractor;
use delver_exam::config::PipelineConfig;
use delver_exam::layout::{
    BBox, DescriptionObservation, DetectedElement, PageData, PageInput, TextObservation,
};
use delver_exam::spatial::{PageAssignment, SpatialAssigner};
use delver_exam::structure::{ContentElement, QuestionGroup};
use delver_exam::AnalysisResult;

pub const NUMBER_BOX: (f32, f32) = (40.0, 30.0);

/// Builds a page of detector output element by element, assigning ids in
/// insertion order.
#[derive(Debug, Clone, Default)]
pub struct PageBuilder {
    next_id: u32,
    width: Option<f32>,
    height: Option<f32>,
    elements: Vec<DetectedElement>,
    texts: Vec<TextObservation>,
    descriptions: Vec<DescriptionObservation>,
}

impl PageBuilder {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            ..Default::default()
        }
    }

    pub fn with_size(mut self, width: f32, height: f32) -> Self {
        self.width = Some(width);
        self.height = Some(height);
        self
    }

    pub fn add_element(&mut self, class: &str, bbox: BBox, confidence: f32) -> u32 {
        let id = self.next_id;
        self.next_id += 1;
        self.elements
            .push(DetectedElement::new(id, class, bbox, confidence));
        id
    }

    pub fn add_ocr(&mut self, id: u32, text: &str, confidence: f32) {
        self.texts.push(TextObservation {
            element_id: id,
            text: text.to_string(),
            confidence,
        });
    }

    pub fn add_description(&mut self, id: u32, description: &str) {
        self.descriptions.push(DescriptionObservation {
            element_id: id,
            description: description.to_string(),
        });
    }

    /// A confidently detected question-number box with its top-left at (x, y).
    pub fn add_question(&mut self, text: &str, x: f32, y: f32) -> u32 {
        let id = self.add_element(
            "question_number",
            BBox::new(x, y, x + NUMBER_BOX.0, y + NUMBER_BOX.1),
            0.95,
        );
        self.add_ocr(id, text, 0.95);
        id
    }

    pub fn add_sub_question(&mut self, text: &str, x: f32, y: f32) -> u32 {
        let id = self.add_element(
            "sub_question_number",
            BBox::new(x, y, x + NUMBER_BOX.0, y + NUMBER_BOX.1),
            0.95,
        );
        self.add_ocr(id, text, 0.95);
        id
    }

    pub fn add_text(&mut self, text: &str, x: f32, y: f32, width: f32, height: f32) -> u32 {
        let id = self.add_element("text", BBox::new(x, y, x + width, y + height), 0.9);
        self.add_ocr(id, text, 0.9);
        id
    }

    pub fn add_choice(&mut self, text: &str, x: f32, y: f32) -> u32 {
        let id = self.add_element("choice", BBox::new(x, y, x + 200.0, y + 25.0), 0.9);
        self.add_ocr(id, text, 0.9);
        id
    }

    pub fn add_figure(&mut self, description: Option<&str>, bbox: BBox) -> u32 {
        let id = self.add_element("figure", bbox, 0.9);
        if let Some(d) = description {
            self.add_description(id, d);
        }
        id
    }

    pub fn add_header(&mut self, class: &str, text: &str, x: f32, y: f32) -> u32 {
        let id = self.add_element(class, BBox::new(x, y, x + 120.0, y + 25.0), 0.9);
        self.add_ocr(id, text, 0.9);
        id
    }

    pub fn elements(&self) -> &[DetectedElement] {
        &self.elements
    }

    pub fn texts(&self) -> &[TextObservation] {
        &self.texts
    }

    pub fn descriptions(&self) -> &[DescriptionObservation] {
        &self.descriptions
    }

    pub fn build(&self) -> PageInput {
        PageInput {
            width: self.width,
            height: self.height,
            elements: self.elements.clone(),
            texts: self.texts.clone(),
            descriptions: self.descriptions.clone(),
        }
    }

    pub fn page(&self) -> PageData {
        PageData::from_input(self.build())
    }

    /// Anchors plus spatial assignment, before validation and correction.
    pub fn assign(&self, config: &PipelineConfig) -> PageAssignment {
        let page = self.page();
        let anchors = AnchorExtractor::new(config.anchor.clone()).extract(&page);
        SpatialAssigner::from_config(config).assign(&page, anchors)
    }
}

/// A column of `count` numbered questions starting at 1, each followed by
/// one line of text.
pub fn question_column(builder: &mut PageBuilder, x: f32, first_y: f32, spacing: f32, count: u32) {
    for n in 1..=count {
        let y = first_y + spacing * (n - 1) as f32;
        builder.add_question(&format!("{n}."), x, y);
        builder.add_text(&format!("Question {n} body"), x, y + 40.0, 380.0, 30.0);
    }
}

pub struct PageAssertions;

impl PageAssertions {
    pub fn assert_assigned(page: &PageAssignment, element_id: u32, question: &str) {
        let element = page
            .element(element_id)
            .unwrap_or_else(|| panic!("element {element_id} missing from assignment"));
        assert_eq!(
            element.assignment.question(),
            Some(question),
            "element {element_id} should belong to question {question}"
        );
    }

    pub fn assert_unassigned(page: &PageAssignment, element_id: u32) {
        let element = page
            .element(element_id)
            .unwrap_or_else(|| panic!("element {element_id} missing from assignment"));
        assert!(
            !element.assignment.is_assigned(),
            "element {element_id} should be unassigned, got {:?}",
            element.assignment
        );
    }

    pub fn assert_content(group: &QuestionGroup, expected: &[(&str, &str)]) {
        let expected: Vec<ContentElement> = expected
            .iter()
            .map(|(kind, content)| ContentElement {
                kind: kind.to_string(),
                content: content.to_string(),
            })
            .collect();
        pretty_assertions::assert_eq!(group.content_elements, expected);
    }

    /// Every element lands in exactly one question or in the unassigned bucket.
    pub fn assert_partitioned(result: &AnalysisResult) {
        let mut seen: Vec<u32> = result
            .structure
            .questions
            .iter()
            .flat_map(|q| q.flatten())
            .flat_map(|q| q.elements.iter().copied())
            .chain(result.structure.unassigned.iter().copied())
            .collect();
        seen.sort_unstable();

        let all: Vec<u32> = result.assignment.elements.iter().map(|e| e.id()).collect();
        pretty_assertions::assert_eq!(seen, all);
    }
}
