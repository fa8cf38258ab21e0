//! Result aggregation, integrity validation and synthesis over plain step results.
//!
//! Run:
//!   cargo test -p conductor --test aggregation_test

mod support;

use serde_json::json;
use shared_types::{SourceType, StepResultStatus, ValidationStatus, WorkerType};

use conductor::research::{
    aggregate, deduplicate_sources, render_markdown, synthesize, validate_integrity,
    IntegrityIssue,
};

use support::{plan, result, source, step};

#[test]
fn test_duplicate_sources_keep_max_credibility() {
    let deduped = deduplicate_sources(&[
        source("https://www.example.com/study/", "Heat Study", 0.7, SourceType::Academic),
        source("https://example.com/study?utm_campaign=x", "heat study", 0.9, SourceType::Academic),
    ]);
    assert_eq!(deduped.len(), 1);
    assert_eq!(deduped[0].credibility_score, 0.9);
}

#[test]
fn test_empty_aggregate() {
    let p = plan(vec![step("a", "web-research", &[], 1)]);
    let aggregated = aggregate("research-1", &p, &[]);
    assert_eq!(aggregated.confidence, 0.0);
    assert!(aggregated.findings.is_empty());
    assert!(aggregated.sources.is_empty());
    assert_eq!(aggregated.total_steps, 1);
    assert_eq!(aggregated.processing_time_ms, 0.0);
}

#[test]
fn test_processing_time_is_summed() {
    let p = plan(vec![
        step("a", "web-research", &[], 1),
        step("b", "academic-research", &[], 1),
    ]);
    let aggregated = aggregate(
        "research-1",
        &p,
        &[result("a", 0.8, 2000.0), result("b", 0.6, 1500.0)],
    );
    assert_eq!(aggregated.processing_time_ms, 3500.0);
    assert_eq!(
        aggregated.agent_types,
        vec![WorkerType::WebResearch, WorkerType::AcademicResearch]
    );
    assert_eq!(aggregated.successful_steps, 2);
}

#[test]
fn test_degenerate_numbers_propagate() {
    let p = plan(vec![step("a", "web-research", &[], 1)]);
    let aggregated = aggregate("research-1", &p, &[result("a", f64::NAN, f64::INFINITY)]);
    assert!(aggregated.confidence.is_nan());
    assert!(aggregated.processing_time_ms.is_infinite());
}

#[test]
fn test_findings_consolidated_across_results() {
    let p = plan(vec![
        step("a", "web-research", &[], 1),
        step("b", "academic-research", &[], 1),
    ]);
    let mut a = result("a", 0.8, 10.0);
    a.sources = vec![source("https://a.org/1", "One", 0.6, SourceType::Web)];
    a.data = json!({"findings": [{"claim": "Green roofs reduce building cooling demand", "evidence": "pilot data", "confidence": 0.6, "sources": [0]}]});
    let mut b = result("b", 0.8, 10.0);
    b.sources = vec![source("https://b.org/2", "Two", 0.8, SourceType::Academic)];
    b.data = json!({"findings": [{"claim": "Green roofs reduce building cooling demand in summer", "evidence": ["field study"], "confidence": 0.85, "sources": [0]}]});

    let aggregated = aggregate("research-1", &p, &[a, b]);
    assert_eq!(aggregated.findings.len(), 1);
    let finding = &aggregated.findings[0];
    assert_eq!(finding.confidence, 0.85);
    assert_eq!(finding.sources, vec![0, 1]);
    assert_eq!(finding.evidence.len(), 2);

    let report = validate_integrity(&aggregated);
    assert!(report.valid, "unexpected issues: {:?}", report.issues);
}

#[test]
fn test_integrity_rejects_empty_result() {
    let p = plan(vec![step("a", "web-research", &[], 1)]);
    let mut partial = result("a", 0.2, 10.0);
    partial.status = StepResultStatus::Partial;
    let report = validate_integrity(&aggregate("research-1", &p, &[partial]));
    assert!(!report.valid);
    assert!(report.issues.contains(&IntegrityIssue::NoFindings));
    assert!(report.issues.contains(&IntegrityIssue::NoSources));
}

#[test]
fn test_synthesis_report_structure() {
    let p = plan(vec![
        step("a", "web-research", &[], 1),
        step("b", "academic-research", &[], 1),
    ]);
    let mut a = result("a", 0.8, 10.0);
    a.dimension = Some("cooling".to_string());
    a.sources = vec![source("https://a.org", "A", 0.8, SourceType::Web)];
    a.data = json!({"findings": [{"claim": "Tree canopy cooling lowers street temperatures", "confidence": 0.9}]});
    let mut b = result("b", 0.8, 10.0);
    b.dimension = Some("cooling".to_string());
    b.sources = vec![source("https://b.org", "B", 0.8, SourceType::Academic)];
    b.data = json!({"findings": [{"claim": "Tree canopy cooling lowers street temperatures at night", "confidence": 0.7}]});

    let report = synthesize("research-1", &p, &[a, b]);
    assert_eq!(report.sections.len(), 1);
    assert!(report
        .sections[0]
        .findings
        .iter()
        .all(|f| f.status == ValidationStatus::Confirmed));
    assert_eq!(report.methodology.total_sources, 2);
    assert_eq!(report.conclusions.len(), 2);
    assert_eq!(report.conclusions[0].keyword.as_deref(), Some("tree"));
    assert_eq!(report.conclusions[0].relevant_findings, 2);

    let md = render_markdown(&report);
    assert!(md.contains("## Cooling"));
    assert!(md.contains("## Conclusions"));
}
