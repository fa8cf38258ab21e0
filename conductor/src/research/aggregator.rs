//! Result aggregation
//!
//! Pure function of completed step results and the plan. Degenerate numeric
//! inputs (NaN, infinities) propagate into the output instead of being zeroed.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use shared_types::{
    Finding, ResearchPlan, ResearchResult, SourceCitation, StepResult, StepResultStatus,
    WorkerType,
};
use std::collections::{BTreeSet, HashMap, HashSet};

use super::findings::extract_findings;
use super::text::{
    jaccard, normalize_title, normalize_url, opposite_keywords, text_similarity, tokens,
};

const CONSOLIDATION_THRESHOLD: f64 = 0.4;
const EVIDENCE_DUPLICATE_THRESHOLD: f64 = 0.8;
const LOW_CONFIDENCE: f64 = 0.3;
const MIN_SOURCE_TYPES: usize = 2;

/// Sources deduplicated by normalized URL + title, remembering where each input landed.
#[derive(Debug, Default)]
struct SourceIndex {
    sources: Vec<SourceCitation>,
    by_key: HashMap<(String, String), usize>,
}

impl SourceIndex {
    /// Insert and return the deduplicated position; collisions keep the max credibility.
    fn insert(&mut self, source: &SourceCitation) -> usize {
        let key = (normalize_url(&source.url), normalize_title(&source.title));
        if let Some(&index) = self.by_key.get(&key) {
            let existing = &mut self.sources[index];
            if source.credibility_score > existing.credibility_score {
                *existing = source.clone();
            }
            return index;
        }
        let index = self.sources.len();
        self.sources.push(source.clone());
        self.by_key.insert(key, index);
        index
    }
}

pub fn deduplicate_sources(sources: &[SourceCitation]) -> Vec<SourceCitation> {
    let mut index = SourceIndex::default();
    for source in sources {
        index.insert(source);
    }
    index.sources
}

/// Merge `results` into a single `ResearchResult`.
pub fn aggregate(research_id: &str, plan: &ResearchPlan, results: &[StepResult]) -> ResearchResult {
    let mut index = SourceIndex::default();
    let mut findings = Vec::new();

    for result in results {
        let local_to_global: Vec<usize> = result.sources.iter().map(|s| index.insert(s)).collect();
        for mut finding in extract_findings(result) {
            finding.sources = finding
                .sources
                .iter()
                .filter_map(|local| local_to_global.get(*local).copied())
                .collect();
            findings.push(finding);
        }
    }

    let findings = consolidate_findings(findings);
    let sources = index.sources;
    let confidence = calculate_confidence(results, &sources);

    let mut agent_types: Vec<WorkerType> = Vec::new();
    for result in results {
        let agent_type = result
            .agent_type
            .or_else(|| plan.step(&result.step_id).and_then(|s| s.worker_type()));
        if let Some(agent_type) = agent_type {
            if !agent_types.contains(&agent_type) {
                agent_types.push(agent_type);
            }
        }
    }

    let count = |status: StepResultStatus| results.iter().filter(|r| r.status == status).count();

    tracing::debug!(
        research_id = %research_id,
        results = results.len(),
        findings = findings.len(),
        sources = sources.len(),
        "Aggregated step results"
    );

    ResearchResult {
        research_id: research_id.to_string(),
        topic: plan.topic.clone(),
        findings,
        sources,
        confidence,
        processing_time_ms: results.iter().map(|r| r.processing_time_ms).sum(),
        total_steps: plan.steps.len(),
        successful_steps: count(StepResultStatus::Success),
        partial_steps: count(StepResultStatus::Partial),
        failed_steps: count(StepResultStatus::Failure),
        agent_types,
        generated_at: Utc::now(),
    }
}

/// Greedy grouping of near-duplicate claims (token Jaccard > 0.4 against the group seed).
pub fn consolidate_findings(findings: Vec<Finding>) -> Vec<Finding> {
    let mut groups: Vec<(HashSet<String>, Vec<Finding>)> = Vec::new();
    for finding in findings {
        let claim_tokens = tokens(&finding.claim);
        let slot = groups
            .iter_mut()
            .find(|(seed, _)| jaccard(seed, &claim_tokens) > CONSOLIDATION_THRESHOLD);
        match slot {
            Some((_, members)) => members.push(finding),
            None => groups.push((claim_tokens, vec![finding])),
        }
    }

    groups
        .into_iter()
        .filter_map(|(_, members)| merge_group(members))
        .collect()
}

fn merge_group(members: Vec<Finding>) -> Option<Finding> {
    let best = members
        .iter()
        .enumerate()
        .fold(None::<(usize, f64)>, |best, (i, f)| match best {
            Some((_, c)) if !(f.confidence > c) => best,
            _ => Some((i, f.confidence)),
        })
        .map(|(i, _)| i)?;

    let mut evidence: Vec<String> = Vec::new();
    let mut sources = BTreeSet::new();
    for member in &members {
        for item in &member.evidence {
            let duplicate = evidence
                .iter()
                .any(|kept| kept == item || text_similarity(kept, item) > EVIDENCE_DUPLICATE_THRESHOLD);
            if !duplicate {
                evidence.push(item.clone());
            }
        }
        sources.extend(member.sources.iter().copied());
    }

    let lead = &members[best];
    Some(Finding {
        claim: lead.claim.clone(),
        evidence,
        confidence: lead.confidence,
        sources: sources.into_iter().collect(),
        category: lead.category,
    })
}

/// `min(0.7 * mean + consistency + diversity, 1.0)`; zero results give 0.
pub fn calculate_confidence(results: &[StepResult], sources: &[SourceCitation]) -> f64 {
    if results.is_empty() {
        return 0.0;
    }
    let n = results.len() as f64;
    let mean = results.iter().map(|r| r.quality_score).sum::<f64>() / n;
    let variance = results
        .iter()
        .map(|r| (r.quality_score - mean).powi(2))
        .sum::<f64>()
        / n;
    let std_dev = variance.sqrt();

    // comparisons written so NaN flows through instead of being swallowed by min()
    let spread = std_dev / 0.5;
    let spread = if spread > 1.0 { 1.0 } else { spread };
    let consistency = 0.2 * (1.0 - spread);

    let distinct_types = sources
        .iter()
        .map(|s| s.source_type.clone())
        .collect::<HashSet<_>>()
        .len() as f64;
    let diversity = 0.1 * (distinct_types / 4.0).min(1.0);

    let total = 0.7 * mean + consistency + diversity;
    if total > 1.0 {
        1.0
    } else {
        total
    }
}

// ============================================================================
// Integrity validation
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IntegrityIssue {
    NoFindings,
    NoSources,
    LowConfidenceMajority { low: usize, total: usize },
    InsufficientSourceDiversity { distinct_types: usize },
    Contradiction {
        first: usize,
        second: usize,
        keyword: String,
        opposite: String,
    },
}

impl std::fmt::Display for IntegrityIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IntegrityIssue::NoFindings => f.write_str("no findings"),
            IntegrityIssue::NoSources => f.write_str("no sources"),
            IntegrityIssue::LowConfidenceMajority { low, total } => {
                write!(f, "{low} of {total} findings have confidence below {LOW_CONFIDENCE}")
            }
            IntegrityIssue::InsufficientSourceDiversity { distinct_types } => {
                write!(f, "only {distinct_types} distinct source type(s)")
            }
            IntegrityIssue::Contradiction {
                first,
                second,
                keyword,
                opposite,
            } => write!(
                f,
                "findings {first} and {second} contradict ('{keyword}' vs '{opposite}')"
            ),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IntegrityReport {
    pub valid: bool,
    pub issues: Vec<IntegrityIssue>,
}

pub fn validate_integrity(result: &ResearchResult) -> IntegrityReport {
    let mut issues = Vec::new();

    if result.findings.is_empty() {
        issues.push(IntegrityIssue::NoFindings);
    }
    if result.sources.is_empty() {
        issues.push(IntegrityIssue::NoSources);
    }

    let low = result
        .findings
        .iter()
        .filter(|f| f.confidence < LOW_CONFIDENCE)
        .count();
    if !result.findings.is_empty() && low * 2 > result.findings.len() {
        issues.push(IntegrityIssue::LowConfidenceMajority {
            low,
            total: result.findings.len(),
        });
    }

    let distinct_types = result
        .sources
        .iter()
        .map(|s| s.source_type.clone())
        .collect::<HashSet<_>>()
        .len();
    if distinct_types < MIN_SOURCE_TYPES {
        issues.push(IntegrityIssue::InsufficientSourceDiversity { distinct_types });
    }

    issues.extend(find_contradictions(&result.findings));

    IntegrityReport {
        valid: issues.is_empty(),
        issues,
    }
}

fn find_contradictions(findings: &[Finding]) -> Vec<IntegrityIssue> {
    let texts: Vec<HashSet<String>> = findings
        .iter()
        .map(|f| tokens(&format!("{} {}", f.claim, f.evidence.join(" "))))
        .collect();

    let mut found = Vec::new();
    for (i, first) in texts.iter().enumerate() {
        for (j, second) in texts.iter().enumerate().skip(i + 1) {
            if let Some((keyword, opposite)) = opposite_keywords(first)
                .into_iter()
                .find(|(_, opposite)| second.contains(*opposite))
            {
                found.push(IntegrityIssue::Contradiction {
                    first: i,
                    second: j,
                    keyword: keyword.to_string(),
                    opposite: opposite.to_string(),
                });
            }
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use shared_types::{FindingCategory, ResearchMethodology, SourceType};

    fn source(url: &str, title: &str, credibility: f64, source_type: SourceType) -> SourceCitation {
        SourceCitation {
            title: title.to_string(),
            url: url.to_string(),
            source_type,
            credibility_score: credibility,
            accessed_at: Utc::now(),
        }
    }

    fn finding(claim: &str, confidence: f64, evidence: &[&str], sources: &[usize]) -> Finding {
        Finding {
            claim: claim.to_string(),
            evidence: evidence.iter().map(|e| e.to_string()).collect(),
            confidence,
            sources: sources.to_vec(),
            category: FindingCategory::Factual,
        }
    }

    #[test]
    fn test_dedup_keeps_max_credibility_in_first_position() {
        let deduped = deduplicate_sources(&[
            source("https://www.example.com/a/", "Annual Report", 0.7, SourceType::Web),
            source("https://other.org", "Other", 0.5, SourceType::News),
            source("https://example.com/a?utm_source=feed", "annual   report", 0.9, SourceType::Web),
        ]);
        assert_eq!(deduped.len(), 2);
        assert_eq!(deduped[0].credibility_score, 0.9);
        assert_eq!(deduped[1].title, "Other");
    }

    #[test]
    fn test_consolidation_merges_similar_claims() {
        let merged = consolidate_findings(vec![
            finding("Battery prices fell sharply in 2023", 0.6, &["BNEF survey data"], &[0]),
            finding("Battery prices fell sharply during 2023", 0.9, &["BNEF survey data"], &[2, 0]),
            finding("Grid storage deployments doubled", 0.7, &[], &[1]),
        ]);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].claim, "Battery prices fell sharply during 2023");
        assert_eq!(merged[0].confidence, 0.9);
        assert_eq!(merged[0].evidence.len(), 1);
        assert_eq!(merged[0].sources, vec![0, 2]);
    }

    #[test]
    fn test_nan_quality_propagates_to_confidence() {
        let mut a = StepResult::new("a", StepResultStatus::Success);
        a.quality_score = 0.8;
        let b = StepResult::new("b", StepResultStatus::Success);
        assert!(calculate_confidence(&[a, b], &[]).is_nan());
    }

    #[test]
    fn test_confidence_components() {
        let mut a = StepResult::new("a", StepResultStatus::Success);
        a.quality_score = 1.0;
        let mut b = StepResult::new("b", StepResultStatus::Success);
        b.quality_score = 1.0;
        let sources = vec![
            source("https://a", "a", 0.5, SourceType::Web),
            source("https://b", "b", 0.5, SourceType::Academic),
        ];
        // 0.7 * 1.0 + 0.2 + 0.1 * 0.5 = 0.95
        assert!((calculate_confidence(&[a, b], &sources) - 0.95).abs() < 1e-9);
    }

    #[test]
    fn test_integrity_flags_contradictions_and_diversity() {
        let result = ResearchResult {
            research_id: "r".to_string(),
            topic: "t".to_string(),
            findings: vec![
                finding("Remote work productivity shows an increase", 0.8, &[], &[]),
                finding("Remote work productivity shows a decrease", 0.2, &[], &[]),
            ],
            sources: vec![source("https://a", "a", 0.5, SourceType::Web)],
            confidence: 0.5,
            processing_time_ms: 0.0,
            total_steps: 2,
            successful_steps: 2,
            partial_steps: 0,
            failed_steps: 0,
            agent_types: vec![],
            generated_at: Utc::now(),
        };
        let report = validate_integrity(&result);
        assert!(!report.valid);
        assert!(report
            .issues
            .contains(&IntegrityIssue::InsufficientSourceDiversity { distinct_types: 1 }));
        assert!(report.issues.iter().any(|i| matches!(
            i,
            IntegrityIssue::Contradiction { keyword, .. } if keyword == "increase"
        )));
    }

    #[test]
    fn test_aggregate_remaps_sources_across_results() {
        let plan = ResearchPlan {
            topic: "EV adoption".to_string(),
            objectives: vec![],
            methodology: ResearchMethodology::default(),
            steps: vec![],
        };
        let mut a = StepResult::new("a", StepResultStatus::Success);
        a.sources = vec![source("https://x.org", "X", 0.6, SourceType::Government)];
        a.data = json!({"findings": [{"claim": "EV sales grew forty percent", "sources": [0]}]});
        let mut b = StepResult::new("b", StepResultStatus::Partial);
        b.sources = vec![
            source("https://y.org", "Y", 0.6, SourceType::News),
            source("https://x.org/", "X", 0.8, SourceType::Government),
        ];
        b.data = json!({"findings": [{"claim": "Charging networks expanded", "sources": [1]}]});

        let result = aggregate("r1", &plan, &[a, b]);
        assert_eq!(result.sources.len(), 2);
        assert_eq!(result.sources[0].credibility_score, 0.8);
        assert_eq!(result.findings[0].sources, vec![0]);
        assert_eq!(result.findings[1].sources, vec![0]);
        assert_eq!(result.partial_steps, 1);
    }
}
