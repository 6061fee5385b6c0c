use delver_exam::config::{PipelineConfig, ValidationConfig};
use delver_exam::layout::BBox;
use delver_exam::validator::ContextValidator;

mod common;
use common::PageBuilder;

/// Questions with the given numbers stacked 200 px apart at x = 20, each with
/// one line of body text.
fn numbered_page(numbers: &[u32]) -> PageBuilder {
    let mut doc = PageBuilder::new();
    for (i, n) in numbers.iter().enumerate() {
        let y = 100.0 + 200.0 * i as f32;
        doc.add_question(&format!("{n}."), 20.0, y);
        doc.add_text(&format!("Question {n} body"), 20.0, y + 40.0, 380.0, 30.0);
    }
    doc
}

#[cfg(test)]
mod sequence_tests {
    use super::*;

    fn gaps(numbers: &[u32]) -> Vec<u32> {
        let page = numbered_page(numbers).assign(&PipelineConfig::default());
        ContextValidator::new(ValidationConfig::default()).sequence_gaps(&page)
    }

    #[test]
    fn test_single_missing_number() {
        assert_eq!(gaps(&[1, 2, 4, 5]), vec![3]);
    }

    #[test]
    fn test_complete_sequence_has_no_gaps() {
        assert!(gaps(&[1, 2, 3]).is_empty());
    }

    #[test]
    fn test_multi_number_hole() {
        assert_eq!(gaps(&[1, 4]), vec![2, 3]);
        assert_eq!(gaps(&[1, 7]), vec![2, 3, 4, 5, 6]);
    }

    #[test]
    fn test_wide_hole_is_not_a_gap() {
        // A page that starts mid-exam, not eight missed questions
        assert!(gaps(&[1, 10]).is_empty());
    }

    #[test]
    fn test_sub_questions_do_not_count() {
        let mut doc = numbered_page(&[1, 2]);
        doc.add_sub_question("(3)", 40.0, 150.0);
        let page = doc.assign(&PipelineConfig::default());
        assert!(page.anchors.contains("1-3"));

        let validator = ContextValidator::new(ValidationConfig::default());
        assert!(validator.sequence_gaps(&page).is_empty());
    }
}

#[cfg(test)]
mod range_tests {
    use super::*;

    #[test]
    fn test_overlapping_questions_in_one_column_conflict() {
        let mut doc = PageBuilder::new();
        doc.add_question("1.", 20.0, 100.0);
        doc.add_question("2.", 20.0, 300.0);
        // A tall figure under "1" that reaches past the next number
        doc.add_figure(Some("삼각형 ABC"), BBox::new(20.0, 130.0, 400.0, 330.0));
        doc.add_text("ambiguous line", 20.0, 290.0, 380.0, 30.0);
        doc.add_text("second body", 20.0, 340.0, 380.0, 30.0);

        let page = doc.assign(&PipelineConfig::default());
        let report = ContextValidator::new(ValidationConfig::default()).validate(&page);

        assert_eq!(report.range_conflicts, vec![("1".to_string(), "2".to_string())]);
        assert!(report.sequence_gaps.is_empty());
        assert!(!report.is_clean());
    }

    #[test]
    fn test_touching_ranges_within_tolerance() {
        let mut doc = PageBuilder::new();
        doc.add_question("1.", 20.0, 100.0);
        doc.add_question("2.", 20.0, 300.0);
        // ends 5 px below the top of "2"
        doc.add_text("first body", 20.0, 140.0, 380.0, 165.0);

        let page = doc.assign(&PipelineConfig::default());
        let report = ContextValidator::new(ValidationConfig::default()).validate(&page);
        assert!(report.range_conflicts.is_empty());
    }

    #[test]
    fn test_side_by_side_columns_do_not_conflict() {
        let mut doc = PageBuilder::new().with_size(1200.0, 800.0);
        doc.add_question("1.", 20.0, 100.0);
        doc.add_text("left body", 20.0, 140.0, 380.0, 200.0);
        doc.add_question("2.", 620.0, 100.0);
        doc.add_text("right body", 620.0, 140.0, 380.0, 200.0);

        let page = doc.assign(&PipelineConfig::default());
        assert_eq!(page.columns.len(), 2);

        let report = ContextValidator::new(ValidationConfig::default()).validate(&page);
        assert!(report.is_clean(), "{report:?}");
    }

    #[test]
    fn test_ranges_cover_sub_questions() {
        let mut doc = PageBuilder::new();
        doc.add_question("1.", 20.0, 100.0);
        doc.add_sub_question("(1)", 40.0, 160.0);
        doc.add_text("sub body", 40.0, 200.0, 300.0, 30.0);

        let page = doc.assign(&PipelineConfig::default());
        let ranges = ContextValidator::question_ranges(&page);
        assert_eq!(ranges.len(), 1);
        assert_eq!((ranges["1"].min_y, ranges["1"].max_y), (100.0, 230.0));
    }
}

#[cfg(test)]
mod report_tests {
    use super::*;

    #[test]
    fn test_unassigned_elements_are_counted() {
        let mut doc = numbered_page(&[1, 2, 3]);
        doc.add_text("page footer", 20.0, 1400.0, 380.0, 30.0);

        let page = doc.assign(&PipelineConfig::default());
        let report = ContextValidator::new(ValidationConfig::default()).validate(&page);
        assert_eq!(report.unassigned_count, 1);
        // unassigned content alone is not an anomaly
        assert!(report.is_clean());
    }

    #[test]
    fn test_report_serializes_camel_case() {
        let page = numbered_page(&[1, 3]).assign(&PipelineConfig::default());
        let report = ContextValidator::new(ValidationConfig::default()).validate(&page);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["sequenceGaps"], serde_json::json!([2]));
        assert_eq!(json["unassignedCount"], serde_json::json!(0));
        assert!(json["rangeConflicts"].as_array().unwrap().is_empty());
    }
}
