use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

use crate::logging::PIPELINE;

/// Axis-aligned box in page pixels, `y` growing downwards.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f32; 4]", into = "[f32; 4]")]
pub struct BBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl From<[f32; 4]> for BBox {
    fn from(b: [f32; 4]) -> Self {
        // Detectors occasionally emit flipped corners.
        BBox {
            x1: b[0].min(b[2]),
            y1: b[1].min(b[3]),
            x2: b[0].max(b[2]),
            y2: b[1].max(b[3]),
        }
    }
}

impl From<BBox> for [f32; 4] {
    fn from(b: BBox) -> Self {
        [b.x1, b.y1, b.x2, b.y2]
    }
}

impl BBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        [x1, y1, x2, y2].into()
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> f32 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    pub fn center_x(&self) -> f32 {
        (self.x1 + self.x2) / 2.0
    }

    /// Horizontal overlap in pixels, zero when disjoint.
    pub fn horizontal_overlap(&self, other: &BBox) -> f32 {
        (self.x2.min(other.x2) - self.x1.max(other.x1)).max(0.0)
    }
}

/// Semantic class of a layout box, parsed from the detector's label.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ElementClass {
    QuestionNumber,
    SubQuestionNumber,
    QuestionType,
    Unit,
    Choice,
    Figure,
    Table,
    Chart,
    Equation,
    Diagram,
    Text,
    Title,
    Other(String),
}

impl ElementClass {
    pub fn from_label(label: &str) -> Self {
        let normalized = label.trim().to_lowercase().replace(['-', ' '], "_");
        match normalized.as_str() {
            "question_number" => ElementClass::QuestionNumber,
            "sub_question_number" | "second_question_number" => ElementClass::SubQuestionNumber,
            "question_type" => ElementClass::QuestionType,
            "unit" => ElementClass::Unit,
            "choice" | "choices" => ElementClass::Choice,
            "figure" => ElementClass::Figure,
            "table" => ElementClass::Table,
            "chart" => ElementClass::Chart,
            "equation" | "formula" => ElementClass::Equation,
            "diagram" => ElementClass::Diagram,
            "text" | "plain_text" | "paragraph" => ElementClass::Text,
            "title" => ElementClass::Title,
            _ => ElementClass::Other(normalized),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ElementClass::QuestionNumber => "question_number",
            ElementClass::SubQuestionNumber => "sub_question_number",
            ElementClass::QuestionType => "question_type",
            ElementClass::Unit => "unit",
            ElementClass::Choice => "choice",
            ElementClass::Figure => "figure",
            ElementClass::Table => "table",
            ElementClass::Chart => "chart",
            ElementClass::Equation => "equation",
            ElementClass::Diagram => "diagram",
            ElementClass::Text => "text",
            ElementClass::Title => "title",
            ElementClass::Other(label) => label,
        }
    }

    /// Boxes whose text names a question.
    pub fn is_identifier(&self) -> bool {
        matches!(
            self,
            ElementClass::QuestionNumber | ElementClass::SubQuestionNumber
        )
    }

    /// Boxes whose content is better described by the AI service than by OCR.
    pub fn is_visual(&self) -> bool {
        matches!(
            self,
            ElementClass::Figure
                | ElementClass::Table
                | ElementClass::Chart
                | ElementClass::Equation
                | ElementClass::Diagram
        )
    }
}

impl fmt::Display for ElementClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ElementClass {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ElementClass {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let label = String::deserialize(deserializer)?;
        Ok(ElementClass::from_label(&label))
    }
}

fn default_confidence() -> f32 {
    1.0
}

/// One box from the layout detector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectedElement {
    pub id: u32,
    #[serde(rename = "class", alias = "class_label", alias = "classLabel")]
    pub class: ElementClass,
    #[serde(alias = "box")]
    pub bbox: BBox,
    #[serde(default = "default_confidence")]
    pub confidence: f32,
}

impl DetectedElement {
    pub fn new(id: u32, class: &str, bbox: BBox, confidence: f32) -> Self {
        Self {
            id,
            class: ElementClass::from_label(class),
            bbox,
            confidence,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextObservation {
    #[serde(rename = "id", alias = "element_id", alias = "elementId")]
    pub element_id: u32,
    pub text: String,
    #[serde(default)]
    pub confidence: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DescriptionObservation {
    #[serde(rename = "id", alias = "element_id", alias = "elementId")]
    pub element_id: u32,
    pub description: String,
}

/// Where an element ended up. Replaces the `"unknown"` string sentinel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Assignment {
    Assigned(String),
    Unassigned,
}

pub const UNASSIGNED_LABEL: &str = "unknown";

impl Assignment {
    pub fn question(&self) -> Option<&str> {
        match self {
            Assignment::Assigned(id) => Some(id),
            Assignment::Unassigned => None,
        }
    }

    pub fn is_assigned(&self) -> bool {
        matches!(self, Assignment::Assigned(_))
    }

    pub fn label(&self) -> &str {
        self.question().unwrap_or(UNASSIGNED_LABEL)
    }
}

impl Serialize for Assignment {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.label())
    }
}

/// Semantic role of an element inside a question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentCategory {
    QuestionNumber,
    QuestionType,
    Unit,
    Text,
    Choice,
    Figure,
    Table,
    Chart,
    Equation,
    Diagram,
    Other,
}

impl ContentCategory {
    pub fn for_class(class: &ElementClass) -> Self {
        match class {
            ElementClass::QuestionNumber | ElementClass::SubQuestionNumber => {
                ContentCategory::QuestionNumber
            }
            ElementClass::QuestionType => ContentCategory::QuestionType,
            ElementClass::Unit => ContentCategory::Unit,
            ElementClass::Choice => ContentCategory::Choice,
            ElementClass::Figure => ContentCategory::Figure,
            ElementClass::Table => ContentCategory::Table,
            ElementClass::Chart => ContentCategory::Chart,
            ElementClass::Equation => ContentCategory::Equation,
            ElementClass::Diagram => ContentCategory::Diagram,
            ElementClass::Text | ElementClass::Title => ContentCategory::Text,
            ElementClass::Other(_) => ContentCategory::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ContentCategory::QuestionNumber => "question_number",
            ContentCategory::QuestionType => "question_type",
            ContentCategory::Unit => "unit",
            ContentCategory::Text => "text",
            ContentCategory::Choice => "choice",
            ContentCategory::Figure => "figure",
            ContentCategory::Table => "table",
            ContentCategory::Chart => "chart",
            ContentCategory::Equation => "equation",
            ContentCategory::Diagram => "diagram",
            ContentCategory::Other => "other",
        }
    }

    pub fn is_visual(&self) -> bool {
        matches!(
            self,
            ContentCategory::Figure
                | ContentCategory::Table
                | ContentCategory::Chart
                | ContentCategory::Equation
                | ContentCategory::Diagram
        )
    }
}

/// The central working unit: one detected box plus everything known about it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssignedElement {
    #[serde(flatten)]
    pub element: DetectedElement,
    pub text: Option<TextObservation>,
    pub description: Option<DescriptionObservation>,
    pub assignment: Assignment,
    pub category: ContentCategory,
}

impl AssignedElement {
    pub fn id(&self) -> u32 {
        self.element.id
    }

    pub fn bbox(&self) -> &BBox {
        &self.element.bbox
    }

    pub fn text(&self) -> Option<&str> {
        self.text
            .as_ref()
            .map(|t| t.text.trim())
            .filter(|t| !t.is_empty())
    }

    pub fn description(&self) -> Option<&str> {
        self.description
            .as_ref()
            .map(|d| d.description.trim())
            .filter(|d| !d.is_empty())
    }
}

/// Raw detector output for one page, before any analysis.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PageInput {
    #[serde(default)]
    pub width: Option<f32>,
    #[serde(default)]
    pub height: Option<f32>,
    pub elements: Vec<DetectedElement>,
    #[serde(default)]
    pub texts: Vec<TextObservation>,
    #[serde(default)]
    pub descriptions: Vec<DescriptionObservation>,
}

/// Detector outputs joined by element id, sorted by id.
#[derive(Debug, Clone)]
pub struct PageData {
    pub width: f32,
    pub height: f32,
    pub elements: Vec<DetectedElement>,
    pub texts: BTreeMap<u32, TextObservation>,
    pub descriptions: BTreeMap<u32, DescriptionObservation>,
}

impl PageData {
    pub fn from_input(input: PageInput) -> Self {
        let mut elements = input.elements;
        elements.sort_by_key(|e| e.id);
        elements.dedup_by(|later, kept| {
            let duplicate = later.id == kept.id;
            if duplicate {
                tracing::warn!(
                    target: PIPELINE,
                    element_id = later.id,
                    "duplicate element id, keeping the first box"
                );
            }
            duplicate
        });

        let known: std::collections::BTreeSet<u32> = elements.iter().map(|e| e.id).collect();

        let mut texts: BTreeMap<u32, TextObservation> = BTreeMap::new();
        for obs in input.texts {
            if !known.contains(&obs.element_id) {
                tracing::warn!(
                    target: PIPELINE,
                    element_id = obs.element_id,
                    "OCR result references unknown element, ignoring"
                );
                continue;
            }
            match texts.get(&obs.element_id) {
                Some(existing) if existing.confidence >= obs.confidence => {}
                _ => {
                    texts.insert(obs.element_id, obs);
                }
            }
        }

        let mut descriptions: BTreeMap<u32, DescriptionObservation> = BTreeMap::new();
        for obs in input.descriptions {
            if known.contains(&obs.element_id) {
                descriptions.entry(obs.element_id).or_insert(obs);
            } else {
                tracing::warn!(
                    target: PIPELINE,
                    element_id = obs.element_id,
                    "AI description references unknown element, ignoring"
                );
            }
        }

        let extent_x = elements.iter().map(|e| e.bbox.x2).fold(0.0_f32, f32::max);
        let extent_y = elements.iter().map(|e| e.bbox.y2).fold(0.0_f32, f32::max);
        let width = input.width.filter(|w| *w > 0.0).unwrap_or(extent_x.ceil());
        let height = input.height.filter(|h| *h > 0.0).unwrap_or(extent_y.ceil());

        PageData {
            width,
            height,
            elements,
            texts,
            descriptions,
        }
    }

    pub fn text_of(&self, element_id: u32) -> Option<&TextObservation> {
        self.texts.get(&element_id)
    }

    pub fn element(&self, element_id: u32) -> Option<&DetectedElement> {
        self.elements
            .binary_search_by_key(&element_id, |e| e.id)
            .ok()
            .map(|idx| &self.elements[idx])
    }
}

/// Reading order for boxes on one column: top to bottom, then left to right.
pub fn reading_order(a: &BBox, b: &BBox) -> std::cmp::Ordering {
    a.y1.total_cmp(&b.y1).then_with(|| a.x1.total_cmp(&b.x1))
}
