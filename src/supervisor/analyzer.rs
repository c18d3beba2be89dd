//! Issue analyzers
//!
//! An analyzer turns an issue plus the current context into a diagnosis and a
//! confidence score. The score decides how aggressive the chosen strategy is.

use super::context::ContextSnapshot;
use super::intervention::{Analysis, IssueContext, IssueType};
use crate::quota::ModelDescriptor;
use crate::routing::{ModelRouter, TaskProfile};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// Confidence given to a model answer that is not the requested JSON
pub const UNSTRUCTURED_CONFIDENCE: u8 = 75;

/// Which analyzer the supervisor uses
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalyzerKind {
    #[default]
    Heuristic,
    Model,
}

#[async_trait]
pub trait IssueAnalyzer: Send + Sync {
    async fn analyze(&self, issue: &IssueContext, context: &ContextSnapshot) -> Analysis;
}

/// Rule-based analysis from the issue payload alone
#[derive(Debug, Clone, Default)]
pub struct HeuristicAnalyzer;

#[async_trait]
impl IssueAnalyzer for HeuristicAnalyzer {
    async fn analyze(&self, issue: &IssueContext, _context: &ContextSnapshot) -> Analysis {
        match issue.issue_type {
            IssueType::AgentError => {
                let errors = issue
                    .detail
                    .get("error_count")
                    .and_then(Value::as_u64)
                    .unwrap_or(1);
                if errors <= 2 {
                    Analysis::new("Isolated agent failure, likely transient", 85)
                        .with_recommendation("Return the agent to service")
                } else {
                    Analysis::new(format!("Agent failed {} times", errors), 60)
                        .with_recommendation("Replace the agent with a fresh instance")
                }
            }
            IssueType::AgentStuck => Analysis::new("Busy agent stopped reporting", 70)
                .with_recommendation("Restart the agent"),
            IssueType::SystemPerformance => {
                Analysis::new("Response times above threshold", 80)
                    .with_recommendation("Release idle capacity")
            }
            IssueType::MemoryLeak => Analysis::new("Memory growth reported", 90)
                .with_recommendation("Trim supervisor projections"),
            IssueType::SystemAlert => {
                let level = issue
                    .detail
                    .get("level")
                    .and_then(Value::as_str)
                    .unwrap_or("error");
                Analysis::new(format!("System alert at level {}", level), 60)
                    .with_recommendation("Collect diagnostics for review")
            }
            IssueType::Unknown => Analysis::new("Unrecognized issue", 30),
        }
    }
}

/// Analysis by asking a model through the router
pub struct ModelAnalyzer {
    router: Arc<ModelRouter>,
    candidates: Arc<Vec<ModelDescriptor>>,
}

impl ModelAnalyzer {
    pub fn new(router: Arc<ModelRouter>, candidates: Arc<Vec<ModelDescriptor>>) -> Self {
        Self { router, candidates }
    }

    fn prompt(issue: &IssueContext, context: &ContextSnapshot) -> String {
        let issue_json = serde_json::to_string_pretty(issue).unwrap_or_default();
        let agents_json = serde_json::to_string(&context.active_agents).unwrap_or_default();
        let health_json = serde_json::to_string(&context.system_health).unwrap_or_default();

        format!(
            "Analyze this system issue and reply with JSON only, shaped as \
             {{\"diagnosis\": string, \"confidence\": 0-100, \"recommendations\": [string]}}.\n\n\
             Issue:\n{}\n\nActive agents: {}\nSystem health: {}\n",
            issue_json, agents_json, health_json
        )
    }
}

#[async_trait]
impl IssueAnalyzer for ModelAnalyzer {
    async fn analyze(&self, issue: &IssueContext, context: &ContextSnapshot) -> Analysis {
        let profile = TaskProfile::from_prompt(Self::prompt(issue, context)).requiring_reasoning();
        match self.router.route(&profile, &self.candidates).await {
            Ok(result) => {
                debug!(model = %result.model_used, "Issue analyzed by model");
                parse_analysis(&result.content)
            }
            Err(e) => {
                warn!(error = %e, issue_type = %issue.issue_type, "Model analysis unavailable");
                Analysis::new(format!("Analysis unavailable: {}", e), 0)
            }
        }
    }
}

#[derive(Deserialize)]
struct RawAnalysis {
    diagnosis: String,
    confidence: f64,
    #[serde(default)]
    recommendations: Vec<String>,
}

/// Parse a model answer; text that is not the expected JSON is kept as the diagnosis
pub fn parse_analysis(text: &str) -> Analysis {
    let json = match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if start < end => &text[start..=end],
        _ => text,
    };

    match serde_json::from_str::<RawAnalysis>(json) {
        Ok(raw) => Analysis {
            diagnosis: raw.diagnosis,
            confidence: raw.confidence.clamp(0.0, 100.0).round() as u8,
            recommendations: raw.recommendations,
        },
        Err(_) => {
            let diagnosis: String = text.trim().chars().take(500).collect();
            Analysis::new(diagnosis, UNSTRUCTURED_CONFIDENCE)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::quota::{QuotaLedger, QuotaPolicy};
    use crate::routing::testing::ScriptedClient;
    use crate::routing::{InvokeOutcome, RouterConfig};
    use serde_json::json;
    use std::collections::BTreeMap;

    fn snapshot() -> ContextSnapshot {
        ContextSnapshot {
            current_page: None,
            session_id: None,
            recent_events: vec![],
            recent_journey: vec![],
            active_agents: vec![],
            system_health: BTreeMap::new(),
        }
    }

    fn issue(issue_type: IssueType, detail: Value) -> IssueContext {
        IssueContext {
            issue_type,
            agent_id: Some("coder-1".to_string()),
            page_id: None,
            trigger_event_id: None,
            detail,
        }
    }

    #[test]
    fn test_parse_structured_answer() {
        let analysis = parse_analysis(
            "Here you go:\n{\"diagnosis\": \"model overloaded\", \"confidence\": 91.6, \"recommendations\": [\"wait\"]}",
        );
        assert_eq!(analysis.diagnosis, "model overloaded");
        assert_eq!(analysis.confidence, 92);
        assert_eq!(analysis.recommendations, vec!["wait".to_string()]);
    }

    #[test]
    fn test_parse_unstructured_answer() {
        let analysis = parse_analysis("The agent probably ran out of memory.");
        assert_eq!(analysis.confidence, UNSTRUCTURED_CONFIDENCE);
        assert!(analysis.diagnosis.contains("out of memory"));
    }

    #[tokio::test]
    async fn test_heuristic_agent_error_confidence() {
        let analyzer = HeuristicAnalyzer;
        let first = analyzer
            .analyze(&issue(IssueType::AgentError, json!({"error_count": 1})), &snapshot())
            .await;
        assert!(first.confidence > 80);

        let repeated = analyzer
            .analyze(&issue(IssueType::AgentError, json!({"error_count": 4})), &snapshot())
            .await;
        assert!(repeated.confidence <= 80);
    }

    fn model_analyzer(client: Arc<ScriptedClient>, candidates: Vec<ModelDescriptor>) -> ModelAnalyzer {
        let clock: crate::clock::SharedClock = Arc::new(ManualClock::new());
        let router = ModelRouter::new(
            QuotaLedger::new(QuotaPolicy::default(), clock),
            client,
            &RouterConfig::default(),
        );
        ModelAnalyzer::new(Arc::new(router), Arc::new(candidates))
    }

    #[tokio::test(start_paused = true)]
    async fn test_model_analyzer_uses_router() {
        let client = Arc::new(ScriptedClient::new());
        client.push(
            "gemini-2.5-pro",
            InvokeOutcome::Ok(r#"{"diagnosis": "bad deploy", "confidence": 88}"#.to_string()),
        );
        let analyzer = model_analyzer(
            client.clone(),
            vec![ModelDescriptor::new("primary", "gemini-2.5-pro", 1)],
        );

        let analysis = analyzer
            .analyze(&issue(IssueType::AgentError, json!({})), &snapshot())
            .await;
        assert_eq!(analysis.diagnosis, "bad deploy");
        assert_eq!(analysis.confidence, 88);
        assert_eq!(client.calls(), vec!["gemini-2.5-pro@primary"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_model_analyzer_without_candidates() {
        let analyzer = model_analyzer(Arc::new(ScriptedClient::new()), vec![]);
        let analysis = analyzer
            .analyze(&issue(IssueType::MemoryLeak, json!({})), &snapshot())
            .await;
        assert_eq!(analysis.confidence, 0);
    }
}
