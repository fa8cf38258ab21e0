//! Text overlap heuristics shared by aggregation and synthesis.

use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;

static WORD_RE: OnceLock<Regex> = OnceLock::new();
static SENTENCE_END_RE: OnceLock<Regex> = OnceLock::new();

/// Keyword pairs whose co-occurrence across two texts signals a contradiction
pub const OPPOSITE_PAIRS: &[(&str, &str)] = &[
    ("increase", "decrease"),
    ("increases", "decreases"),
    ("increased", "decreased"),
    ("positive", "negative"),
    ("rise", "fall"),
    ("rises", "falls"),
    ("higher", "lower"),
    ("growth", "decline"),
    ("support", "oppose"),
    ("supports", "opposes"),
    ("effective", "ineffective"),
];

const STOPWORDS: &[&str] = &[
    "about", "after", "also", "been", "before", "being", "between", "does", "each", "from",
    "have", "into", "more", "most", "other", "over", "same", "some", "such", "than", "that",
    "their", "them", "then", "there", "these", "they", "this", "those", "through", "under",
    "very", "were", "what", "when", "where", "which", "while", "with", "within", "would",
    "your", "assess", "determine", "evaluate", "identify", "analyze", "analyse", "understand",
    "investigate", "examine", "review",
];

const TRACKING_PARAMS: &[&str] = &["fbclid", "gclid", "ref", "mc_cid", "mc_eid"];

fn word_re() -> &'static Regex {
    WORD_RE.get_or_init(|| Regex::new(r"[\p{L}\p{N}]+").expect("valid regex"))
}

fn sentence_end_re() -> &'static Regex {
    SENTENCE_END_RE.get_or_init(|| Regex::new(r"[.!?]+(?:\s+|$)").expect("valid regex"))
}

/// Lowercase words in order of appearance
pub fn words(text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    word_re()
        .find_iter(&lower)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Bag-of-words tokens: lowercase words longer than 2 chars
pub fn tokens(text: &str) -> HashSet<String> {
    words(text)
        .into_iter()
        .filter(|w| w.chars().count() > 2)
        .collect()
}

/// Tokens longer than 3 chars that are not stopwords
pub fn significant_tokens(text: &str) -> HashSet<String> {
    words(text)
        .into_iter()
        .filter(|w| is_significant(w))
        .collect()
}

pub fn is_significant(word: &str) -> bool {
    word.chars().count() > 3 && !STOPWORDS.contains(&word)
}

/// First significant word of `text`, in reading order
pub fn first_keyword(text: &str) -> Option<String> {
    words(text).into_iter().find(|w| is_significant(w))
}

pub fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.union(b).count();
    intersection as f64 / union as f64
}

pub fn text_similarity(a: &str, b: &str) -> f64 {
    jaccard(&tokens(a), &tokens(b))
}

pub fn shared_count(a: &HashSet<String>, b: &HashSet<String>) -> usize {
    a.intersection(b).count()
}

/// Split on `.`, `!`, `?` boundaries; trims and drops empties.
pub fn split_sentences(text: &str) -> Vec<String> {
    sentence_end_re()
        .split(text)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}

/// For every contradiction keyword present in `words`, the opposite keyword.
pub fn opposite_keywords(words: &HashSet<String>) -> Vec<(&'static str, &'static str)> {
    let mut found = Vec::new();
    for (a, b) in OPPOSITE_PAIRS {
        if words.contains(*a) {
            found.push((*a, *b));
        }
        if words.contains(*b) {
            found.push((*b, *a));
        }
    }
    found
}

/// Lowercase, no `www.`, no trailing slash, tracking parameters removed.
///
/// Unparsable input falls back to a trimmed lowercase string.
pub fn normalize_url(raw: &str) -> String {
    let trimmed = raw.trim();
    let Ok(mut url) = url::Url::parse(trimmed) else {
        return trimmed
            .to_lowercase()
            .trim_end_matches('/')
            .trim_start_matches("www.")
            .to_string();
    };

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| {
            let key = key.to_lowercase();
            !key.starts_with("utm_") && !TRACKING_PARAMS.contains(&key.as_str())
        })
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept);
    }
    url.set_fragment(None);

    let host = url
        .host_str()
        .map(|h| h.trim_start_matches("www.").to_string())
        .unwrap_or_default();
    let path = url.path().trim_end_matches('/').to_string();
    let query = url.query().map(|q| format!("?{q}")).unwrap_or_default();
    let port = url.port().map(|p| format!(":{p}")).unwrap_or_default();
    format!("{}://{host}{port}{path}{query}", url.scheme()).to_lowercase()
}

/// Lowercase words joined by single spaces
pub fn normalize_title(raw: &str) -> String {
    words(raw).join(" ")
}
