use delver_exam::anchor::{AnchorExtractor, AnchorKind, Provenance};
use delver_exam::config::AnchorConfig;
use delver_exam::layout::BBox;
use delver_exam::pattern::MatchTier;

mod common;
use common::PageBuilder;

#[cfg(test)]
mod anchor_extraction_tests {
    use super::*;

    fn extractor() -> AnchorExtractor {
        AnchorExtractor::new(AnchorConfig::default())
    }

    #[test]
    fn test_fused_score_weights() {
        let score = extractor().fused_score(1.0, 1.0, MatchTier::Exact);
        assert!((score - 1.0).abs() < 1e-6);

        let score = extractor().fused_score(0.9, 0.9, MatchTier::Dotted);
        assert!((score - 0.88).abs() < 1e-5);
    }

    #[test]
    fn test_confident_question_box_becomes_anchor() {
        let mut doc = PageBuilder::new();
        let q1 = doc.add_question("1.", 10.0, 10.0);
        doc.add_text("What is X?", 10.0, 50.0, 300.0, 30.0);

        let anchors = extractor().extract(&doc.page());
        assert_eq!(anchors.len(), 1);

        let anchor = anchors.get("1").expect("anchor 1");
        assert_eq!((anchor.x, anchor.y), (10, 10));
        assert_eq!(anchor.kind, AnchorKind::QuestionNumber);
        assert_eq!(anchor.provenance, Provenance::Fused);
        assert_eq!(anchor.source_element_id, Some(q1));
        assert!(anchor.confidence >= 0.70);
    }

    #[test]
    fn test_low_score_is_rejected_without_fallback_hit() {
        let mut doc = PageBuilder::new();
        let id = doc.add_element("question_number", BBox::new(10.0, 10.0, 40.0, 30.0), 0.4);
        doc.add_ocr(id, "5", 0.5);

        assert!(extractor().extract(&doc.page()).is_empty());
    }

    #[test]
    fn test_answer_count_text_yields_no_anchor() {
        let mut doc = PageBuilder::new();
        doc.add_question("정답 2개", 10.0, 10.0);
        doc.add_text("정답 2개", 10.0, 60.0, 200.0, 30.0);

        assert!(extractor().extract(&doc.page()).is_empty());
    }

    #[test]
    fn test_duplicate_identifier_keeps_higher_confidence() {
        let mut doc = PageBuilder::new();
        let weak = doc.add_element("question_number", BBox::new(10.0, 10.0, 40.0, 30.0), 0.8);
        doc.add_ocr(weak, "2.", 0.9);
        let strong = doc.add_question("2.", 10.0, 400.0);

        let anchors = extractor().extract(&doc.page());
        assert_eq!(anchors.len(), 1);
        assert_eq!(anchors.get("2").unwrap().source_element_id, Some(strong));
    }

    #[test]
    fn test_box_without_text_is_skipped() {
        let mut doc = PageBuilder::new();
        doc.add_element("question_number", BBox::new(10.0, 10.0, 40.0, 30.0), 0.99);
        doc.add_question("2.", 10.0, 200.0);

        let anchors = extractor().extract(&doc.page());
        assert_eq!(anchors.iter().map(|a| a.identifier.as_str()).collect::<Vec<_>>(), vec!["2"]);
    }

    #[test]
    fn test_fallback_scan_correlates_x_with_identifier_box() {
        let mut doc = PageBuilder::new();
        // A number box the OCR engine returned nothing for
        doc.add_element("question_number", BBox::new(30.0, 102.0, 60.0, 130.0), 0.9);
        let text = doc.add_text("3. 다음을 계산하시오", 80.0, 100.0, 400.0, 30.0);
        doc.add_text("정답 2개", 80.0, 160.0, 200.0, 30.0);

        let anchors = extractor().extract(&doc.page());
        assert_eq!(anchors.len(), 1);

        let anchor = anchors.get("3").expect("fallback anchor");
        assert_eq!(anchor.provenance, Provenance::Fallback);
        assert_eq!((anchor.x, anchor.y), (30, 100));
        assert_eq!(anchor.source_element_id, Some(text));
    }

    #[test]
    fn test_fallback_without_identifier_box_uses_left_margin() {
        let mut doc = PageBuilder::new();
        doc.add_text("4. 빈칸을 채우시오", 80.0, 300.0, 400.0, 30.0);

        let anchors = extractor().extract(&doc.page());
        assert_eq!(anchors.get("4").map(|a| a.x), Some(0));
    }

    #[test]
    fn test_fallback_skipped_when_fused_anchor_exists() {
        let mut doc = PageBuilder::new();
        doc.add_question("1.", 10.0, 10.0);
        doc.add_text("7. 이 줄은 본문입니다", 10.0, 60.0, 400.0, 30.0);

        let anchors = extractor().extract(&doc.page());
        assert!(anchors.contains("1"));
        assert!(!anchors.contains("7"));
    }

    #[test]
    fn test_sub_questions_nest_under_nearest_parent_above() {
        let mut doc = PageBuilder::new();
        doc.add_question("1.", 20.0, 100.0);
        doc.add_sub_question("(1)", 40.0, 150.0);
        doc.add_sub_question("(2)", 40.0, 250.0);
        doc.add_question("2.", 20.0, 400.0);
        doc.add_sub_question("①", 40.0, 450.0);

        let anchors = extractor().extract(&doc.page());
        let ids: Vec<&str> = anchors.iter().map(|a| a.identifier.as_str()).collect();
        assert_eq!(ids, vec!["1", "1-1", "1-2", "2", "2-1"]);
        assert_eq!(anchors.get("1-2").unwrap().parent.as_deref(), Some("1"));
        assert_eq!(anchors.get("2-1").unwrap().parent.as_deref(), Some("2"));
        assert_eq!(anchors.main_anchors().count(), 2);
    }

    #[test]
    fn test_parenthesized_question_box_is_a_sub_question() {
        let mut doc = PageBuilder::new();
        doc.add_question("3.", 20.0, 100.0);
        doc.add_question("(2)", 40.0, 180.0);

        let anchors = extractor().extract(&doc.page());
        assert!(anchors.contains("3-2"));
        assert!(!anchors.contains("2"));
    }

    #[test]
    fn test_hyphenated_identifier_nests_directly() {
        let mut doc = PageBuilder::new();
        doc.add_question("5.", 20.0, 100.0);
        doc.add_sub_question("4-1", 40.0, 150.0);

        let anchors = extractor().extract(&doc.page());
        let sub = anchors.get("4-1").expect("explicit parent kept");
        assert_eq!(sub.parent.as_deref(), Some("4"));
    }

    #[test]
    fn test_sub_marker_without_parent_is_dropped() {
        let mut doc = PageBuilder::new();
        doc.add_sub_question("(1)", 40.0, 50.0);
        doc.add_question("1.", 20.0, 100.0);

        let anchors = extractor().extract(&doc.page());
        let ids: Vec<&str> = anchors.iter().map(|a| a.identifier.as_str()).collect();
        assert_eq!(ids, vec!["1"]);
    }

    #[test]
    fn test_headers_are_collected_in_reading_order() {
        let mut doc = PageBuilder::new();
        doc.add_header("question_type", "주관식", 20.0, 500.0);
        doc.add_header("unit", "분수의 덧셈", 20.0, 20.0);
        doc.add_header("question_type", "객관식", 20.0, 60.0);
        doc.add_header("question_type", "   ", 20.0, 80.0);
        doc.add_question("1.", 20.0, 100.0);

        let anchors = extractor().extract(&doc.page());
        let headers: Vec<(AnchorKind, &str)> = anchors
            .headers
            .iter()
            .map(|h| (h.kind, h.identifier.as_str()))
            .collect();
        assert_eq!(
            headers,
            vec![
                (AnchorKind::Unit, "분수의 덧셈"),
                (AnchorKind::QuestionType, "객관식"),
                (AnchorKind::QuestionType, "주관식"),
            ]
        );
    }
}
