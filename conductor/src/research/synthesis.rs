//! Synthesis engine
//!
//! Groups step results by dimension, cross-validates every extracted finding
//! against the whole result corpus and assembles a structured report.

use chrono::Utc;
use shared_types::{
    Finding, MethodologySummary, ObjectiveConclusion, ObjectiveVerdict, ReportSection,
    ResearchPlan, SourceType, StepResult, SynthesisResult, ValidatedFinding, ValidationStatus,
    WorkerType,
};
use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt::Write as _;

use super::aggregator::deduplicate_sources;
use super::findings::extract_findings;
use super::text::{
    first_keyword, jaccard, opposite_keywords, shared_count, significant_tokens,
    split_sentences, tokens,
};

const SUPPORT_SIMILARITY: f64 = 0.3;
const MIN_SHARED_SIGNIFICANT: usize = 2;
const CONFIRMED_CONSENSUS: f64 = 0.8;
const PARTIAL_CONSENSUS: f64 = 0.5;
const WELL_SUPPORTED: f64 = 0.7;
const MODERATELY_SUPPORTED: f64 = 0.4;
const SUMMARY_KEY_FINDINGS: usize = 3;

/// Pre-tokenised view of one step result.
struct Corpus<'a> {
    result: &'a StepResult,
    findings: Vec<Finding>,
    claim_tokens: Vec<HashSet<String>>,
    significant: HashSet<String>,
    sentences: Vec<Sentence>,
    weight: usize,
}

struct Sentence {
    significant: HashSet<String>,
    tokens: HashSet<String>,
}

impl<'a> Corpus<'a> {
    fn new(result: &'a StepResult) -> Self {
        let findings = extract_findings(result);
        let text = findings
            .iter()
            .flat_map(|f| std::iter::once(f.claim.as_str()).chain(f.evidence.iter().map(String::as_str)))
            .collect::<Vec<_>>()
            .join(". ");
        let sentences = split_sentences(&text)
            .iter()
            .map(|s| Sentence {
                significant: significant_tokens(s),
                tokens: tokens(s),
            })
            .collect();
        Self {
            result,
            claim_tokens: findings.iter().map(|f| tokens(&f.claim)).collect(),
            significant: significant_tokens(&text),
            sentences,
            weight: result.sources.len().max(1),
            findings,
        }
    }

    fn dimension(&self) -> &str {
        self.result.dimension_or_default()
    }
}

/// Build the full report for `results` under `plan`.
pub fn synthesize(research_id: &str, plan: &ResearchPlan, results: &[StepResult]) -> SynthesisResult {
    let validated = cross_validate(results);
    let sections = build_sections(&validated);
    let overall_confidence = mean(validated.iter().map(|v| v.adjusted_confidence));
    let conclusions = plan
        .objectives
        .iter()
        .map(|objective| conclude(objective, &validated))
        .collect();

    tracing::info!(
        research_id = %research_id,
        results = results.len(),
        findings = validated.len(),
        sections = sections.len(),
        "Synthesized research report"
    );

    SynthesisResult {
        research_id: research_id.to_string(),
        topic: plan.topic.clone(),
        executive_summary: executive_summary(&plan.topic, &validated, sections.len(), overall_confidence),
        methodology: methodology(plan, results),
        sections,
        conclusions,
        overall_confidence,
        generated_at: Utc::now(),
    }
}

/// Validate every finding of every result against the rest of the corpus.
pub fn cross_validate(results: &[StepResult]) -> Vec<ValidatedFinding> {
    let corpus: Vec<Corpus<'_>> = results.iter().map(Corpus::new).collect();
    let mut validated = Vec::new();

    for (origin_index, origin) in corpus.iter().enumerate() {
        for (finding, claim_tokens) in origin.findings.iter().zip(&origin.claim_tokens) {
            let claim_significant = significant_tokens(&finding.claim);

            let mut relevant = 0;
            let mut supporting = 0;
            for (index, other) in corpus.iter().enumerate() {
                let is_relevant = index == origin_index
                    || other.dimension() == origin.dimension()
                    || shared_count(&other.significant, &claim_significant) >= MIN_SHARED_SIGNIFICANT;
                if !is_relevant {
                    continue;
                }
                relevant += other.weight;
                let supports = index == origin_index
                    || other
                        .claim_tokens
                        .iter()
                        .any(|t| jaccard(t, claim_tokens) >= SUPPORT_SIMILARITY);
                if supports {
                    supporting += other.weight;
                }
            }

            let consensus_level = supporting as f64 / relevant as f64;
            let contradicted = is_contradicted(origin_index, claim_tokens, &claim_significant, &corpus);
            let status = if contradicted {
                ValidationStatus::Contradicted
            } else if consensus_level >= CONFIRMED_CONSENSUS {
                ValidationStatus::Confirmed
            } else if consensus_level >= PARTIAL_CONSENSUS {
                ValidationStatus::PartiallyConfirmed
            } else {
                ValidationStatus::Unconfirmed
            };

            validated.push(ValidatedFinding {
                finding: finding.clone(),
                dimension: origin.dimension().to_string(),
                step_id: origin.result.step_id.clone(),
                status,
                consensus_level,
                adjusted_confidence: finding.confidence * consensus_level,
                supporting_sources: supporting,
                relevant_sources: relevant,
            });
        }
    }
    validated
}

fn is_contradicted(
    origin_index: usize,
    claim_tokens: &HashSet<String>,
    claim_significant: &HashSet<String>,
    corpus: &[Corpus<'_>],
) -> bool {
    let opposites = opposite_keywords(claim_tokens);
    if opposites.is_empty() {
        return false;
    }
    corpus
        .iter()
        .enumerate()
        .filter(|(index, _)| *index != origin_index)
        .flat_map(|(_, other)| &other.sentences)
        .any(|sentence| {
            shared_count(&sentence.significant, claim_significant) >= MIN_SHARED_SIGNIFICANT
                && opposites
                    .iter()
                    .any(|(_, opposite)| sentence.tokens.contains(*opposite))
        })
}

fn build_sections(validated: &[ValidatedFinding]) -> Vec<ReportSection> {
    let mut dimensions: Vec<&str> = Vec::new();
    for v in validated {
        if !dimensions.contains(&v.dimension.as_str()) {
            dimensions.push(&v.dimension);
        }
    }

    dimensions
        .into_iter()
        .map(|dimension| {
            let mut findings: Vec<ValidatedFinding> = validated
                .iter()
                .filter(|v| v.dimension == dimension)
                .cloned()
                .collect();
            findings.sort_by(|a, b| {
                b.adjusted_confidence
                    .partial_cmp(&a.adjusted_confidence)
                    .unwrap_or(Ordering::Equal)
            });

            let confirmed = findings
                .iter()
                .filter(|f| f.status == ValidationStatus::Confirmed)
                .count();
            let contradicted = findings
                .iter()
                .filter(|f| f.status == ValidationStatus::Contradicted)
                .count();
            let mut content = format!(
                "{} finding(s), {confirmed} confirmed, {contradicted} contradicted. Average adjusted confidence {}.",
                findings.len(),
                percent(mean(findings.iter().map(|f| f.adjusted_confidence))),
            );
            for f in &findings {
                let _ = write!(
                    content,
                    "\n{} {} ({} confidence, consensus {})",
                    f.status.glyph(),
                    f.finding.claim,
                    percent(f.adjusted_confidence),
                    percent(f.consensus_level),
                );
            }

            ReportSection {
                title: title_case(dimension),
                dimension: dimension.to_string(),
                content,
                findings,
            }
        })
        .collect()
}

fn executive_summary(
    topic: &str,
    validated: &[ValidatedFinding],
    dimensions: usize,
    overall_confidence: f64,
) -> String {
    if validated.is_empty() {
        return format!("Research on {topic} produced no findings.");
    }

    let mut ranked: Vec<&ValidatedFinding> = validated
        .iter()
        .filter(|v| v.status != ValidationStatus::Contradicted)
        .collect();
    ranked.sort_by(|a, b| {
        b.adjusted_confidence
            .partial_cmp(&a.adjusted_confidence)
            .unwrap_or(Ordering::Equal)
    });

    let mut summary = format!(
        "Research on {topic} produced {} finding(s) across {dimensions} dimension(s) with overall confidence {}.",
        validated.len(),
        percent(overall_confidence),
    );
    if !ranked.is_empty() {
        summary.push_str(" Key findings:");
        for v in ranked.iter().take(SUMMARY_KEY_FINDINGS) {
            let _ = write!(summary, " {}.", v.finding.claim.trim_end_matches('.'));
        }
    }
    let contradicted = validated.len() - ranked.len();
    if contradicted > 0 {
        let _ = write!(summary, " {contradicted} finding(s) are contradicted by other results.");
    }
    summary
}

fn methodology(plan: &ResearchPlan, results: &[StepResult]) -> MethodologySummary {
    let all_sources: Vec<_> = results.iter().flat_map(|r| r.sources.iter().cloned()).collect();
    let sources = deduplicate_sources(&all_sources);

    let mut source_types: Vec<SourceType> = Vec::new();
    for source in &sources {
        if !source_types.contains(&source.source_type) {
            source_types.push(source.source_type.clone());
        }
    }
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

    let approach = if plan.methodology.approach.trim().is_empty() {
        "multi-agent research".to_string()
    } else {
        plan.methodology.approach.clone()
    };
    let content = format!(
        "Approach: {approach}. {} result(s) from {} worker type(s) ({}) drawing on {} unique source(s) of type(s): {}.",
        results.len(),
        agent_types.len(),
        join(agent_types.iter().map(WorkerType::as_str)),
        sources.len(),
        join(source_types.iter().map(SourceType::as_str)),
    );

    MethodologySummary {
        approach,
        source_types,
        agent_types,
        total_sources: sources.len(),
        total_results: results.len(),
        content,
    }
}

fn conclude(objective: &str, validated: &[ValidatedFinding]) -> ObjectiveConclusion {
    let keyword = first_keyword(objective);
    let relevant: Vec<&ValidatedFinding> = match &keyword {
        Some(keyword) => validated
            .iter()
            .filter(|v| tokens(&v.finding.claim).contains(keyword))
            .collect(),
        None => Vec::new(),
    };

    let verdict = if relevant.is_empty() {
        ObjectiveVerdict::NoRelevantFindings
    } else {
        let score = mean(relevant.iter().map(|v| v.adjusted_confidence));
        if score >= WELL_SUPPORTED {
            ObjectiveVerdict::WellSupported
        } else if score >= MODERATELY_SUPPORTED {
            ObjectiveVerdict::ModeratelySupported
        } else {
            ObjectiveVerdict::LimitedEvidence
        }
    };

    ObjectiveConclusion {
        objective: objective.to_string(),
        keyword,
        verdict,
        relevant_findings: relevant.len(),
    }
}

// ============================================================================
// Markdown
// ============================================================================

pub fn render_markdown(report: &SynthesisResult) -> String {
    let mut md = String::new();
    let _ = writeln!(md, "# Research Report: {}\n", report.topic);
    let _ = writeln!(md, "## Executive Summary\n\n{}\n", report.executive_summary);

    for section in &report.sections {
        let _ = writeln!(md, "## {}\n", section.title);
        for f in &section.findings {
            let _ = writeln!(
                md,
                "- {} {} _(confidence {}, consensus {})_",
                f.status.glyph(),
                f.finding.claim,
                percent(f.adjusted_confidence),
                percent(f.consensus_level),
            );
            for evidence in &f.finding.evidence {
                let _ = writeln!(md, "  - {evidence}");
            }
        }
        md.push('\n');
    }

    let _ = writeln!(md, "## Methodology\n\n{}\n", report.methodology.content);

    if !report.conclusions.is_empty() {
        md.push_str("## Conclusions\n\n");
        for c in &report.conclusions {
            let _ = writeln!(
                md,
                "- **{}**: {} ({} relevant finding(s))",
                c.objective,
                c.verdict.label(),
                c.relevant_findings
            );
        }
        md.push('\n');
    }

    let _ = writeln!(
        md,
        "_Overall confidence {}. Generated {}._",
        percent(report.overall_confidence),
        report.generated_at.to_rfc3339()
    );
    md
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    if count == 0 {
        0.0
    } else {
        sum / count as f64
    }
}

fn percent(value: f64) -> String {
    format!("{:.0}%", value * 100.0)
}

fn join<'a>(items: impl Iterator<Item = &'a str>) -> String {
    let joined = items.collect::<Vec<_>>().join(", ");
    if joined.is_empty() {
        "none".to_string()
    } else {
        joined
    }
}

fn title_case(dimension: &str) -> String {
    dimension
        .split(|c: char| c == '-' || c == '_' || c.is_whitespace())
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use shared_types::{ResearchMethodology, SourceCitation, StepResultStatus};

    fn sources(n: usize) -> Vec<SourceCitation> {
        (0..n)
            .map(|i| SourceCitation {
                title: format!("Source {i}"),
                url: format!("https://example.org/{i}"),
                source_type: if i % 2 == 0 { SourceType::Web } else { SourceType::Academic },
                credibility_score: 0.7,
                accessed_at: Utc::now(),
            })
            .collect()
    }

    fn result(step_id: &str, dimension: &str, claim: &str, confidence: f64, n_sources: usize) -> StepResult {
        let mut r = StepResult::new(step_id, StepResultStatus::Success);
        r.dimension = Some(dimension.to_string());
        r.data = json!({"findings": [{"claim": claim, "confidence": confidence}]});
        r.sources = sources(n_sources);
        r
    }

    fn plan(objectives: &[&str]) -> ResearchPlan {
        ResearchPlan {
            topic: "Energy transition".to_string(),
            objectives: objectives.iter().map(|o| o.to_string()).collect(),
            methodology: ResearchMethodology::default(),
            steps: vec![],
        }
    }

    #[test]
    fn test_opposite_sentence_elsewhere_contradicts() {
        let results = vec![
            result("s1", "market", "Electric vehicle sales increase rapidly in Europe", 0.8, 2),
            result("s2", "market", "Electric vehicle sales increase rapidly across Europe", 0.6, 1),
            result("s3", "policy", "Electric vehicle sales show a decrease in Europe this year", 0.5, 0),
        ];
        let validated = cross_validate(&results);
        assert_eq!(validated.len(), 3);
        assert_eq!(validated[0].status, ValidationStatus::Contradicted);
        assert_eq!(validated[2].status, ValidationStatus::Contradicted);
    }

    #[test]
    fn test_consensus_weighted_by_sources() {
        let results = vec![
            result("a", "energy", "Solar capacity tripled in India", 0.8, 1),
            result("b", "energy", "Coffee consumption remains stable worldwide", 0.9, 3),
        ];
        let validated = cross_validate(&results);
        assert_eq!(validated[0].relevant_sources, 4);
        assert_eq!(validated[0].supporting_sources, 1);
        assert_eq!(validated[0].status, ValidationStatus::Unconfirmed);
        assert!((validated[0].adjusted_confidence - 0.2).abs() < 1e-9);
        assert_eq!(validated[1].status, ValidationStatus::PartiallyConfirmed);
    }

    #[test]
    fn test_conclusions_use_first_keyword() {
        let results = vec![
            result("a", "energy", "Solar capacity tripled in India", 0.8, 1),
            result("b", "energy", "Coffee consumption remains stable worldwide", 0.9, 3),
        ];
        let report = synthesize(
            "r1",
            &plan(&["Assess solar capacity growth", "Understand hydrogen prices"]),
            &results,
        );
        assert_eq!(report.conclusions[0].keyword.as_deref(), Some("solar"));
        assert_eq!(report.conclusions[0].verdict, ObjectiveVerdict::LimitedEvidence);
        assert_eq!(report.conclusions[1].verdict, ObjectiveVerdict::NoRelevantFindings);
        assert_eq!(report.sections.len(), 1);
        assert_eq!(report.sections[0].title, "Energy");
        assert_eq!(report.sections[0].findings[0].step_id, "b");
        assert_eq!(report.methodology.total_sources, 3);
    }

    #[test]
    fn test_markdown_contains_sections_and_glyphs() {
        let results = vec![result("a", "grid-storage", "Battery storage deployments doubled", 0.9, 2)];
        let report = synthesize("r1", &plan(&["Evaluate battery deployments"]), &results);
        let md = render_markdown(&report);
        assert!(md.starts_with("# Research Report: Energy transition"));
        assert!(md.contains("## Grid Storage"));
        assert!(md.contains("✓ Battery storage deployments doubled"));
        assert!(md.contains("Well supported"));
    }

    #[test]
    fn test_empty_results() {
        let report = synthesize("r1", &plan(&["Assess demand"]), &[]);
        assert!(report.sections.is_empty());
        assert_eq!(report.overall_confidence, 0.0);
        assert!(report.executive_summary.contains("no findings"));
    }
}
