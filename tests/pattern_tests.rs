use delver_exam::pattern::{
    is_choice_marker, match_question_identifier, match_sub_marker, natural_cmp, MatchTier,
};

#[cfg(test)]
mod pattern_matching_tests {
    use super::*;

    fn identify(text: &str) -> Option<(String, MatchTier)> {
        match_question_identifier(text).map(|m| (m.identifier, m.tier))
    }

    #[test]
    fn test_exact_forms() {
        for text in ["3번", "[3]", "【3】", "<3>", "문제 3", "문제3"] {
            assert_eq!(
                identify(text),
                Some(("3".to_string(), MatchTier::Exact)),
                "{text}"
            );
        }
    }

    #[test]
    fn test_prefixed_forms() {
        assert_eq!(identify("Q5"), Some(("5".into(), MatchTier::Prefixed)));
        assert_eq!(identify("q. 6"), Some(("6".into(), MatchTier::Prefixed)));
        assert_eq!(identify("문7"), Some(("7".into(), MatchTier::Prefixed)));
        assert_eq!(
            identify("문제 1. 다음 중 옳은 것은?"),
            Some(("1".into(), MatchTier::Prefixed))
        );
    }

    #[test]
    fn test_dotted_and_hyphenated() {
        assert_eq!(identify("8."), Some(("8".into(), MatchTier::Dotted)));
        assert_eq!(
            identify("12. 다음을 계산하시오"),
            Some(("12".into(), MatchTier::Dotted))
        );
        assert_eq!(identify("4-2"), Some(("4-2".into(), MatchTier::Dotted)));
        assert_eq!(identify("12 ."), Some(("12".into(), MatchTier::Dotted)));
    }

    #[test]
    fn test_contained_forms() {
        assert_eq!(
            identify("아래 보기를 보고 7번을 푸시오"),
            Some(("7".into(), MatchTier::Contained))
        );
        assert_eq!(
            identify("see [9] below"),
            Some(("9".into(), MatchTier::Contained))
        );
    }

    #[test]
    fn test_decimal_is_not_a_dotted_number() {
        let found = identify("3.14").map(|(_, tier)| tier);
        assert_ne!(found, Some(MatchTier::Dotted));
        assert_ne!(found, Some(MatchTier::Contained));
    }

    #[test]
    fn test_bare_numbers_and_disqualifiers() {
        assert_eq!(identify("11"), Some(("11".into(), MatchTier::Bare)));
        assert_eq!(identify("정답 2개"), None);
        assert_eq!(identify("page 12"), None);
        assert_eq!(identify("3학년"), None);
        assert_eq!(identify("5점"), None);
    }

    #[test]
    fn test_number_normalization() {
        assert_eq!(identify("１２번"), Some(("12".into(), MatchTier::Exact)));
        assert_eq!(identify("012."), Some(("12".into(), MatchTier::Dotted)));
        assert_eq!(identify("299..."), Some(("299".into(), MatchTier::Dotted)));
        assert_eq!(identify("0."), None);
        assert_eq!(identify("1234"), None);
        assert_eq!(identify("   "), None);
    }

    #[test]
    fn test_sub_markers() {
        assert_eq!(match_sub_marker("(1)"), Some(1));
        assert_eq!(match_sub_marker("( 2 ) 다음을"), Some(2));
        assert_eq!(match_sub_marker("3)"), Some(3));
        assert_eq!(match_sub_marker("② 풀이"), Some(2));
        assert_eq!(match_sub_marker("⑳"), Some(20));
        assert_eq!(match_sub_marker("1."), None);
    }

    #[test]
    fn test_choice_markers() {
        assert!(is_choice_marker("① 10"));
        assert!(is_choice_marker("(3) 20"));
        assert!(is_choice_marker("ㄱ. 참"));
        assert!(is_choice_marker("A. apple"));
        assert!(is_choice_marker("b) banana"));
        assert!(!is_choice_marker("⑥ 60"));
        assert!(!is_choice_marker("(6) 60"));
        assert!(!is_choice_marker("다음 중"));
    }

    #[test]
    fn test_natural_order_across_depths() {
        let mut ids = vec!["12", "1-2", "3", "1", "1-10", "2"];
        ids.sort_by(|a, b| natural_cmp(a, b));
        assert_eq!(ids, vec!["1", "1-2", "1-10", "2", "3", "12"]);
    }
}
