//! Shared fixtures for conductor integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};
use shared_types::{
    ResearchMethodology, ResearchPlan, ResearchStep, SourceCitation, SourceType, StepResult,
    StepResultStatus, WorkerType,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use conductor::actors::conductor::delegator::DelegationRequest;
use conductor::{AgentTransport, TransportFailure};

pub fn step(id: &str, agent_type: &str, deps: &[&str], priority: i32) -> ResearchStep {
    ResearchStep {
        id: id.to_string(),
        description: format!("Search for {id}"),
        agent_type: agent_type.to_string(),
        dependencies: deps.iter().map(|d| d.to_string()).collect(),
        priority,
        fallback_strategies: Vec::new(),
        timeout_ms: None,
    }
}

pub fn plan(steps: Vec<ResearchStep>) -> ResearchPlan {
    ResearchPlan {
        topic: "Urban heat islands".to_string(),
        objectives: vec![
            "Assess tree canopy cooling effects".to_string(),
            "Identify reflective roofing programs".to_string(),
        ],
        methodology: ResearchMethodology {
            approach: "mixed-methods review".to_string(),
            phases: Vec::new(),
        },
        steps,
    }
}

pub fn source(url: &str, title: &str, credibility: f64, source_type: SourceType) -> SourceCitation {
    SourceCitation {
        title: title.to_string(),
        url: url.to_string(),
        source_type,
        credibility_score: credibility,
        accessed_at: Utc::now(),
    }
}

pub fn result(step_id: &str, quality: f64, processing_ms: f64) -> StepResult {
    let mut r = StepResult::new(step_id, StepResultStatus::Success);
    r.quality_score = quality;
    r.processing_time_ms = processing_ms;
    r
}

/// Answers every step with a worker-specific canned payload after a short delay.
#[derive(Default)]
pub struct CannedTransport {
    pub calls: Mutex<Vec<(WorkerType, String)>>,
}

impl CannedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn called_steps(&self) -> Vec<String> {
        self.calls.lock().unwrap().iter().map(|(_, s)| s.clone()).collect()
    }
}

#[async_trait]
impl AgentTransport for CannedTransport {
    async fn send(
        &self,
        worker_type: WorkerType,
        request: &DelegationRequest,
    ) -> Result<Value, TransportFailure> {
        self.calls
            .lock()
            .unwrap()
            .push((worker_type, request.step_id.clone()));
        tokio::time::sleep(Duration::from_millis(5)).await;

        let payload = match worker_type {
            WorkerType::AcademicResearch => json!({
                "stepId": request.step_id,
                "status": "success",
                "dimension": "cooling",
                "data": {"findings": [{
                    "claim": "Tree canopy cover lowers summer street temperatures",
                    "evidence": ["Meta-analysis of 40 cities"],
                    "confidence": 0.9,
                    "sources": [0]
                }]},
                "sources": [{"url": "https://journals.example.org/canopy", "title": "Canopy cooling", "type": "academic", "credibilityScore": 0.9}],
                "qualityScore": 0.9,
                "processingTime": 1200
            }),
            WorkerType::NewsResearch => json!({
                "summary": "City councils expand reflective roofing programs.",
                "findings": [{"claim": "Reflective roofing programs expanded in three cities", "confidence": 0.6}],
                "sources": [{"url": "https://news.example.com/roofs?utm_source=rss", "title": "Cool roofs", "type": "news"}],
                "qualityScore": 0.7
            }),
            _ => json!({
                "stepId": request.step_id,
                "status": "success",
                "dimension": "cooling",
                "data": {"findings": [{
                    "claim": "Tree canopy cover lowers summer street temperatures significantly",
                    "confidence": 0.8,
                    "sources": ["https://www.journals.example.org/canopy/"]
                }]},
                "sources": [{"url": "https://journals.example.org/canopy", "title": "Canopy Cooling", "type": "academic", "credibilityScore": 0.7}],
                "qualityScore": 0.8,
                "processingTime": 800
            }),
        };
        Ok(payload)
    }

    async fn cancel(&self, _step_id: &str) -> bool {
        false
    }
}
