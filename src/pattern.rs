//! Question-number and choice-marker recognition over raw OCR text.
//!
//! Matching is tiered: the more a token looks like a printed question number
//! the higher its tier, and the first tier that matches wins.

use once_cell::sync::Lazy;
use regex::Regex;
use std::cmp::Ordering;
use unicode_normalization::UnicodeNormalization;

/// Match quality, highest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MatchTier {
    Bare,
    Contained,
    Dotted,
    Prefixed,
    Exact,
}

impl MatchTier {
    pub fn score(self) -> f32 {
        match self {
            MatchTier::Exact => 1.0,
            MatchTier::Prefixed => 0.9,
            MatchTier::Dotted => 0.8,
            MatchTier::Contained => 0.5,
            MatchTier::Bare => 0.3,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PatternMatch {
    pub identifier: String,
    pub tier: MatchTier,
}

impl PatternMatch {
    pub fn score(&self) -> f32 {
        self.tier.score()
    }
}

const NUM: &str = r"(\d{1,3})";

fn compile(pattern: &str) -> Regex {
    Regex::new(&pattern.replace("{N}", NUM)).expect("static pattern must compile")
}

static EXACT: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"^{N}\s*번$",
        r"^\[\s*{N}\s*\]$",
        r"^【\s*{N}\s*】$",
        r"^<\s*{N}\s*>$",
        r"^문제\s*{N}$",
    ]
    .iter()
    .map(|p| compile(p))
    .collect()
});

static PREFIXED: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"^[Qq]\s*\.?\s*{N}(?:\D|$)",
        r"^문제\s*{N}(?:\D|$)",
        r"^문\s*{N}(?:\D|$)",
    ]
    .iter()
    .map(|p| compile(p))
    .collect()
});

static DOTTED: Lazy<Regex> = Lazy::new(|| compile(r"^{N}\.(?:\D.*)?$"));
static HYPHENATED: Lazy<Regex> = Lazy::new(|| compile(r"^{N}\s*-\s*(\d{1,2})(?:\D|$)"));

static CONTAINED: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?:^|\D){N}\s*번",
        r"\[\s*{N}\s*\]",
        r"(?:^|[^\d.]){N}\.(?:[^\d]|$)",
    ]
    .iter()
    .map(|p| compile(p))
    .collect()
});

static BARE: Lazy<Regex> = Lazy::new(|| compile(r"(?:^|\D){N}(?:\D|$)"));

/// Words that mark a number as a count, page or grade rather than a question.
const DISQUALIFIERS: &[&str] = &[
    "정답", "답", "개", "쪽", "페이지", "page", "p.", "학년", "grade", "점",
];

static DIGIT_SPACE_DOT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d)\s+\.").expect("static"));
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("static"));

static SUB_MARKER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\(\s*(\d{1,2})\s*\)|^(\d{1,2})\)").expect("static"));

static CHOICE_MARKER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:\(\s*[1-5]\s*\)|[ㄱㄴㄷㄹㅁ]\s*\.|[A-Ea-e]\s*[.)])").expect("static")
});

/// NFKC, collapse repeated punctuation and whitespace, glue `N .` into `N.`.
pub fn normalize_text(text: &str) -> String {
    let nfkc: String = text.nfkc().collect();

    let mut collapsed = String::with_capacity(nfkc.len());
    let mut prev: Option<char> = None;
    for c in nfkc.chars() {
        if c.is_ascii_punctuation() && prev == Some(c) {
            continue;
        }
        collapsed.push(c);
        prev = Some(c);
    }

    let glued = DIGIT_SPACE_DOT.replace_all(&collapsed, "$1.");
    WHITESPACE.replace_all(&glued, " ").trim().to_string()
}

fn number(raw: &str) -> Option<u32> {
    raw.parse::<u32>().ok().filter(|n| *n > 0)
}

fn first_capture(re: &Regex, text: &str) -> Option<u32> {
    re.captures(text)
        .and_then(|c| c.get(1))
        .and_then(|m| number(m.as_str()))
}

fn is_disqualified(text: &str) -> bool {
    let lower = text.to_lowercase();
    DISQUALIFIERS.iter().any(|w| lower.contains(w))
}

/// Extract a question identifier from text, if it carries one.
pub fn match_question_identifier(text: &str) -> Option<PatternMatch> {
    let text = normalize_text(text);
    if text.is_empty() {
        return None;
    }

    let found = |n: u32, tier: MatchTier| {
        Some(PatternMatch {
            identifier: n.to_string(),
            tier,
        })
    };

    if let Some(n) = EXACT.iter().find_map(|re| first_capture(re, &text)) {
        return found(n, MatchTier::Exact);
    }
    if let Some(n) = PREFIXED.iter().find_map(|re| first_capture(re, &text)) {
        return found(n, MatchTier::Prefixed);
    }
    if let Some(caps) = HYPHENATED.captures(&text) {
        let parent = caps.get(1).and_then(|m| number(m.as_str()));
        let child = caps.get(2).and_then(|m| number(m.as_str()));
        if let (Some(p), Some(c)) = (parent, child) {
            return Some(PatternMatch {
                identifier: format!("{p}-{c}"),
                tier: MatchTier::Dotted,
            });
        }
    }
    if let Some(n) = first_capture(&DOTTED, &text) {
        return found(n, MatchTier::Dotted);
    }
    if let Some(n) = CONTAINED.iter().find_map(|re| first_capture(re, &text)) {
        return found(n, MatchTier::Contained);
    }
    if let Some(n) = first_capture(&BARE, &text) {
        if is_disqualified(&text) {
            tracing::trace!(target: crate::logging::ANCHOR, text = %text, "bare number suppressed");
            return None;
        }
        return found(n, MatchTier::Bare);
    }
    None
}

/// Sub-question marker such as `(2)`, `2)` or `②`, returning its number.
pub fn match_sub_marker(text: &str) -> Option<u32> {
    // NFKC folds circled digits into plain ones, so check them first.
    if let Some(n) = leading_circled(text) {
        return Some(n);
    }
    let text = normalize_text(text);
    SUB_MARKER.captures(&text).and_then(|caps| {
        caps.get(1)
            .or_else(|| caps.get(2))
            .and_then(|m| number(m.as_str()))
    })
}

fn leading_circled(text: &str) -> Option<u32> {
    match text.trim_start().chars().next()? {
        c @ '①'..='⑳' => Some(c as u32 - '①' as u32 + 1),
        _ => None,
    }
}

/// True when the text opens with a multiple-choice marker.
pub fn is_choice_marker(text: &str) -> bool {
    // NFKC also rewrites compatibility jamo such as ㄱ, so try the raw text too.
    matches!(leading_circled(text), Some(1..=5))
        || CHOICE_MARKER.is_match(text.trim_start())
        || CHOICE_MARKER.is_match(&normalize_text(text))
}

/// Split an identifier such as `"12-3"` into its numeric segments.
fn segments(identifier: &str) -> Vec<Result<u64, &str>> {
    identifier
        .split('-')
        .map(|s| s.trim().parse::<u64>().map_err(|_| s))
        .collect()
}

/// Numeric-aware identifier ordering: `"2" < "10"`, `"4" < "4-1" < "5"`.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let (sa, sb) = (segments(a), segments(b));
    for (x, y) in sa.iter().zip(sb.iter()) {
        let ord = match (x, y) {
            (Ok(x), Ok(y)) => x.cmp(y),
            (Ok(_), Err(_)) => Ordering::Less,
            (Err(_), Ok(_)) => Ordering::Greater,
            (Err(x), Err(y)) => x.cmp(y),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    sa.len().cmp(&sb.len()).then_with(|| a.cmp(b))
}

/// Parent of a hierarchical identifier: `"4-1"` -> `"4"`.
pub fn parent_identifier(identifier: &str) -> Option<&str> {
    identifier.rsplit_once('-').map(|(parent, _)| parent)
}

/// Purely numeric top-level identifier.
pub fn numeric_identifier(identifier: &str) -> Option<u32> {
    if identifier.chars().all(|c| c.is_ascii_digit()) {
        identifier.parse().ok()
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalization_collapses_noise() {
        assert_eq!(normalize_text("299..."), "299.");
        assert_eq!(normalize_text("  12 .  다음  중 "), "12. 다음 중");
        assert_eq!(normalize_text("１２번"), "12번");
    }

    #[test]
    fn natural_order_is_numeric() {
        let mut ids = vec!["10", "2", "4-1", "4", "1", "4-10", "4-2"];
        ids.sort_by(|a, b| natural_cmp(a, b));
        assert_eq!(ids, vec!["1", "2", "4", "4-1", "4-2", "4-10", "10"]);
    }

    #[test]
    fn sub_marker_forms() {
        assert_eq!(match_sub_marker("(3) 다음을 구하시오"), Some(3));
        assert_eq!(match_sub_marker("④"), Some(4));
        assert_eq!(match_sub_marker("2) 답을 쓰시오"), Some(2));
        assert_eq!(match_sub_marker("문제"), None);
    }
}
