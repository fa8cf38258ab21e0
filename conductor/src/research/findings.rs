//! Finding extraction from opaque worker payloads.
//!
//! Extractors run in a fixed order and the first one that yields findings wins:
//! 1. `findings` array
//! 2. `results[*].findings`
//! 3. a single finding-shaped object (has `claim`)
//! 4. free text (string payload or `summary` / `content` / `text`)
//! 5. `metadata.findings`

use serde_json::{Map, Value};
use shared_types::{Finding, FindingCategory, StepResult};

use super::text::{normalize_url, split_sentences};

const MIN_SENTENCE_CHARS: usize = 20;
const MAX_TEXT_FINDINGS: usize = 5;
const DEFAULT_CONFIDENCE: f64 = 0.5;

type Extractor = fn(&Value, &StepResult) -> Vec<Finding>;

const EXTRACTORS: &[(&str, Extractor)] = &[
    ("findings-array", from_findings_array),
    ("nested-results", from_nested_results),
    ("single-object", from_single_object),
    ("free-text", from_free_text),
    ("metadata", from_metadata),
];

/// Findings of one step result; `sources` index into `result.sources`.
pub fn extract_findings(result: &StepResult) -> Vec<Finding> {
    for (name, extractor) in EXTRACTORS {
        let findings = extractor(&result.data, result);
        if !findings.is_empty() {
            tracing::trace!(step_id = %result.step_id, extractor = *name, count = findings.len(), "Extracted findings");
            return findings;
        }
    }
    Vec::new()
}

fn from_findings_array(data: &Value, result: &StepResult) -> Vec<Finding> {
    data.get("findings")
        .map(|raw| parse_finding_list(raw, result))
        .unwrap_or_default()
}

fn from_nested_results(data: &Value, result: &StepResult) -> Vec<Finding> {
    data.get("results")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.get("findings"))
                .flat_map(|raw| parse_finding_list(raw, result))
                .collect()
        })
        .unwrap_or_default()
}

fn from_single_object(data: &Value, result: &StepResult) -> Vec<Finding> {
    match data {
        Value::Object(obj) if obj.contains_key("claim") => {
            parse_finding(data, result).into_iter().collect()
        }
        _ => Vec::new(),
    }
}

fn from_free_text(data: &Value, _result: &StepResult) -> Vec<Finding> {
    let text = match data {
        Value::String(s) => Some(s.as_str()),
        Value::Object(obj) => ["summary", "content", "text"]
            .iter()
            .find_map(|key| obj.get(*key).and_then(Value::as_str)),
        _ => None,
    };
    let Some(text) = text else {
        return Vec::new();
    };

    split_sentences(text)
        .into_iter()
        .filter(|sentence| sentence.chars().count() > MIN_SENTENCE_CHARS)
        .take(MAX_TEXT_FINDINGS)
        .map(|sentence| Finding {
            claim: sentence,
            evidence: Vec::new(),
            confidence: DEFAULT_CONFIDENCE,
            sources: Vec::new(),
            category: FindingCategory::Analytical,
        })
        .collect()
}

fn from_metadata(data: &Value, result: &StepResult) -> Vec<Finding> {
    data.get("metadata")
        .and_then(|meta| meta.get("findings"))
        .map(|raw| parse_finding_list(raw, result))
        .unwrap_or_default()
}

fn parse_finding_list(raw: &Value, result: &StepResult) -> Vec<Finding> {
    raw.as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| parse_finding(item, result))
                .collect()
        })
        .unwrap_or_default()
}

fn parse_finding(raw: &Value, result: &StepResult) -> Option<Finding> {
    let obj = match raw {
        Value::String(claim) if !claim.trim().is_empty() => {
            return Some(Finding {
                claim: claim.trim().to_string(),
                evidence: Vec::new(),
                confidence: DEFAULT_CONFIDENCE,
                sources: Vec::new(),
                category: FindingCategory::Factual,
            })
        }
        Value::Object(obj) => obj,
        _ => return None,
    };

    let claim = field(obj, &["claim", "statement", "finding", "text"])
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|c| !c.is_empty())?
        .to_string();

    let evidence = match field(obj, &["evidence", "support"]) {
        Some(Value::String(s)) if !s.trim().is_empty() => vec![s.trim().to_string()],
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(ToString::to_string)
            .collect(),
        _ => Vec::new(),
    };

    Some(Finding {
        claim,
        evidence,
        confidence: field(obj, &["confidence", "confidenceScore"])
            .and_then(Value::as_f64)
            .unwrap_or(DEFAULT_CONFIDENCE),
        sources: resolve_source_refs(field(obj, &["sources", "sourceIndices", "source_indices"]), result),
        category: field(obj, &["category", "type"])
            .and_then(Value::as_str)
            .and_then(FindingCategory::parse)
            .unwrap_or(FindingCategory::Factual),
    })
}

/// Map index or URL references onto positions in `result.sources`.
fn resolve_source_refs(raw: Option<&Value>, result: &StepResult) -> Vec<usize> {
    let Some(Value::Array(items)) = raw else {
        return Vec::new();
    };
    let mut resolved = Vec::new();
    for item in items {
        let index = match item {
            Value::Number(n) => n
                .as_u64()
                .map(|i| i as usize)
                .filter(|i| *i < result.sources.len()),
            Value::String(url) => {
                let wanted = normalize_url(url);
                result
                    .sources
                    .iter()
                    .position(|source| normalize_url(&source.url) == wanted)
            }
            Value::Object(obj) => obj.get("url").and_then(Value::as_str).and_then(|url| {
                let wanted = normalize_url(url);
                result
                    .sources
                    .iter()
                    .position(|source| normalize_url(&source.url) == wanted)
            }),
            _ => None,
        };
        if let Some(index) = index {
            if !resolved.contains(&index) {
                resolved.push(index);
            }
        }
    }
    resolved
}

fn field<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|key| obj.get(*key))
}
