//! 改进分析
//!
//! 输入本轮执行产物与上一轮迭代记录，输出失败用例、证据、改进建议、下一轮计划与趋势对比。
//! `analyze` 从不返回错误：内部失败时返回空但结构完整的分析结果。
//! 建议来源：分析后端可用且本轮有失败时请求 LLM，否则（或 LLM 输出不可用时）按规则生成。

use std::sync::Arc;

use chrono::Local;
use serde::Deserialize;
use thiserror::Error;

use crate::integration::payload::{array_field, normalize, Payload, PayloadError};
use crate::llm::{LlmClient, LlmError};
use crate::model::{
    Category, Effort, Evidence, ExecutionArtifact, ExecutionStatus, FailedTest, ImprovementAnalysis,
    ImprovementSuggestion, IterationRecord, NextIterationPlan, Priority, StepStatus, TrendComparison,
};

#[derive(Error, Debug)]
pub enum AnalysisError {
    #[error("execution artifact is inconsistent: {0}")]
    Inconsistent(String),

    #[error("analysis backend failed: {0}")]
    Backend(#[from] LlmError),

    #[error("analysis backend returned malformed payload: {0}")]
    Payload(#[from] PayloadError),
}

#[derive(Debug, Deserialize)]
struct LooseSuggestion {
    #[serde(default)]
    category: String,
    #[serde(default)]
    priority: String,
    description: String,
    #[serde(default)]
    implementation_suggestion: String,
    #[serde(default)]
    test_strategy: String,
}

pub struct ImprovementAnalyzer {
    llm: Option<Arc<dyn LlmClient>>,
}

impl ImprovementAnalyzer {
    pub fn new(llm: Option<Arc<dyn LlmClient>>) -> Self {
        Self { llm }
    }

    /// `use_backend` 为 false 时（集成级别 basic）不调用分析后端
    pub async fn analyze(
        &self,
        execution: &ExecutionArtifact,
        previous: Option<&IterationRecord>,
        use_backend: bool,
    ) -> ImprovementAnalysis {
        match self.try_analyze(execution, previous, use_backend).await {
            Ok(analysis) => analysis,
            Err(e) => {
                tracing::warn!(error = %e, "improvement analysis failed, returning empty analysis");
                ImprovementAnalysis::empty()
            }
        }
    }

    async fn try_analyze(
        &self,
        execution: &ExecutionArtifact,
        previous: Option<&IterationRecord>,
        use_backend: bool,
    ) -> Result<ImprovementAnalysis, AnalysisError> {
        if execution.total_tests != execution.execution_results.len() {
            return Err(AnalysisError::Inconsistent(format!(
                "total_tests = {} but {} results",
                execution.total_tests,
                execution.execution_results.len()
            )));
        }

        let failed_tests = extract_failed_tests(execution);
        let evidence = collect_evidence(execution);
        let trend = previous.map(|p| TrendComparison {
            previous_iteration: p.loop_number,
            previous_failures: p.failure_count(),
            current_failures: failed_tests.len(),
        });

        let mut suggestions = match (&self.llm, use_backend && !failed_tests.is_empty()) {
            (Some(llm), true) => match self.suggest_with_llm(llm.as_ref(), &failed_tests, &evidence, trend).await {
                Ok(s) if !s.is_empty() => s,
                Ok(_) => rule_based_suggestions(execution, &failed_tests, trend),
                Err(e) => {
                    tracing::warn!(error = %e, "falling back to rule-based suggestions");
                    rule_based_suggestions(execution, &failed_tests, trend)
                }
            },
            _ => rule_based_suggestions(execution, &failed_tests, trend),
        };
        // 高优先级在前（稳定排序，保持同级原顺序）
        suggestions.sort_by_key(|s| s.priority);

        let next_loop_plan = plan_next_iteration(&suggestions);
        Ok(ImprovementAnalysis {
            failed_tests,
            evidence,
            improvement_suggestions: suggestions,
            next_loop_plan,
            trend,
            analysis_timestamp: Local::now(),
        })
    }

    async fn suggest_with_llm(
        &self,
        llm: &dyn LlmClient,
        failed_tests: &[FailedTest],
        evidence: &Evidence,
        trend: Option<TrendComparison>,
    ) -> Result<Vec<ImprovementSuggestion>, AnalysisError> {
        let failed_json = serde_json::to_string_pretty(failed_tests).unwrap_or_default();
        let previous = match trend {
            Some(t) => format!(
                "iteration {} had {} failure(s); this iteration has {}",
                t.previous_iteration, t.previous_failures, t.current_failures
            ),
            None => "first iteration".to_string(),
        };
        let prompt = format!(
            "Propose improvements based on the following failed tests and evidence.\n\n\
             Failed tests:\n{}\n\nEvidence: {} screenshot(s), {} log(s), {} error trace(s)\n\
             Previous iteration: {}\n\n\
             Answer with JSON only:\n\
             {{\"improvements\": [{{\"category\": \"functional|performance|ui|security\", \
             \"priority\": \"high|medium|low\", \"description\": \"\", \
             \"implementation_suggestion\": \"\", \"test_strategy\": \"\"}}]}}",
            failed_json,
            evidence.screenshots.len(),
            evidence.logs.len(),
            evidence.error_traces.len(),
            previous
        );

        let raw = llm.complete(&prompt).await?;
        let map = normalize(Payload::Text(raw))?;
        let items: Vec<LooseSuggestion> = array_field(&map, "improvements")?;
        Ok(items
            .into_iter()
            .filter(|s| !s.description.trim().is_empty())
            .map(|s| ImprovementSuggestion {
                category: Category::parse_lenient(&s.category).unwrap_or(Category::Functional),
                priority: Priority::parse_lenient(&s.priority).unwrap_or(Priority::Medium),
                description: s.description,
                implementation_suggestion: s.implementation_suggestion,
                test_strategy: s.test_strategy,
            })
            .collect())
    }
}

/// 状态为 failed 或 error 的用例
pub fn extract_failed_tests(execution: &ExecutionArtifact) -> Vec<FailedTest> {
    execution
        .execution_results
        .iter()
        .filter(|r| r.status.is_failure())
        .map(|r| FailedTest {
            test_case_id: r.test_case_id.clone(),
            test_name: r.test_name.clone(),
            failure_reason: r.failure_reason.clone().unwrap_or_else(|| "unknown".to_string()),
        })
        .collect()
}

/// 证据：失败原因作为错误轨迹，失败步骤的备注与导出文件位置作为日志。
/// 不做浏览器自动化，因此没有截图
pub fn collect_evidence(execution: &ExecutionArtifact) -> Evidence {
    let mut evidence = Evidence::default();
    for r in &execution.execution_results {
        if let (true, Some(reason)) = (r.status.is_failure(), &r.failure_reason) {
            evidence.error_traces.push(format!("{}: {}", r.test_case_id, reason));
        }
        for step in r.step_results.iter().filter(|s| s.status == StepStatus::Failed) {
            evidence.logs.push(format!(
                "{} step {}: {}{}",
                r.test_case_id,
                step.step_index + 1,
                step.result,
                step.notes.as_deref().map(|n| format!(" ({})", n)).unwrap_or_default()
            ));
        }
        if let Some(path) = &r.export_path {
            evidence.logs.push(format!("{} export: {}", r.test_case_id, path.display()));
        }
    }
    evidence
}

pub fn rule_based_suggestions(
    execution: &ExecutionArtifact,
    failed_tests: &[FailedTest],
    trend: Option<TrendComparison>,
) -> Vec<ImprovementSuggestion> {
    let mut suggestions = Vec::new();
    if failed_tests.is_empty() {
        return suggestions;
    }

    suggestions.push(ImprovementSuggestion {
        category: Category::Functional,
        priority: Priority::High,
        description: format!("Basic fix for {} failed test(s)", failed_tests.len()),
        implementation_suggestion: "Check the failure details and fix the affected functions".to_string(),
        test_strategy: "Re-test the failed test cases intensively".to_string(),
    });

    let errored = execution
        .execution_results
        .iter()
        .filter(|r| r.status == ExecutionStatus::Error)
        .count();
    if errored > 0 {
        suggestions.push(ImprovementSuggestion {
            category: Category::Functional,
            priority: Priority::Medium,
            description: format!("Stabilise test execution: {} case(s) ended in error", errored),
            implementation_suggestion: "Check execution service connectivity and the case definitions".to_string(),
            test_strategy: "Re-run the errored cases once the environment is stable".to_string(),
        });
    }

    if let Some(t) = trend.filter(|t| !t.improved()) {
        suggestions.push(ImprovementSuggestion {
            category: Category::Functional,
            priority: Priority::Medium,
            description: format!(
                "Failures did not decrease since iteration {} ({} -> {})",
                t.previous_iteration, t.previous_failures, t.current_failures
            ),
            implementation_suggestion: "Review whether the previous iteration's fixes were applied".to_string(),
            test_strategy: "Compare the failing cases across iterations".to_string(),
        });
    }

    suggestions
}

pub fn plan_next_iteration(suggestions: &[ImprovementSuggestion]) -> NextIterationPlan {
    let mut focus_areas: Vec<Category> = Vec::new();
    for s in suggestions {
        if !focus_areas.contains(&s.category) {
            focus_areas.push(s.category);
        }
    }
    NextIterationPlan {
        focus_areas,
        priority_improvements: suggestions
            .iter()
            .filter(|s| s.priority == Priority::High)
            .cloned()
            .collect(),
        test_strategy_updates: suggestions
            .iter()
            .filter(|s| !s.test_strategy.is_empty())
            .map(|s| s.test_strategy.clone())
            .collect(),
        estimated_effort: if suggestions.len() <= 3 { Effort::Medium } else { Effort::High },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;
    use crate::model::ExecutionResult;

    fn result(id: &str, status: ExecutionStatus) -> ExecutionResult {
        ExecutionResult {
            test_case_id: id.to_string(),
            test_name: format!("name {}", id),
            status,
            failure_reason: status.is_failure().then(|| "boom".to_string()),
            step_results: Vec::new(),
            execution_id: None,
            export_path: None,
        }
    }

    fn artifact(statuses: &[ExecutionStatus]) -> ExecutionArtifact {
        let results = statuses
            .iter()
            .enumerate()
            .map(|(i, s)| result(&format!("TC-{:03}", i + 1), *s))
            .collect();
        ExecutionArtifact::from_results(results, true, true)
    }

    #[tokio::test]
    async fn test_clean_run_has_no_suggestions() {
        let analyzer = ImprovementAnalyzer::new(None);
        let a = analyzer
            .analyze(&artifact(&[ExecutionStatus::Passed, ExecutionStatus::Passed]), None, true)
            .await;
        assert!(a.failed_tests.is_empty());
        assert!(a.improvement_suggestions.is_empty());
        assert!(a.trend.is_none());
    }

    #[tokio::test]
    async fn test_failures_and_errors_are_extracted() {
        let analyzer = ImprovementAnalyzer::new(None);
        let a = analyzer
            .analyze(
                &artifact(&[ExecutionStatus::Passed, ExecutionStatus::Failed, ExecutionStatus::Error]),
                None,
                true,
            )
            .await;
        assert_eq!(a.failed_tests.len(), 2);
        assert_eq!(a.improvement_suggestions.len(), 2);
        assert_eq!(a.improvement_suggestions[0].priority, Priority::High);
        assert_eq!(a.next_loop_plan.priority_improvements.len(), 1);
        assert_eq!(a.next_loop_plan.focus_areas, vec![Category::Functional]);
        assert_eq!(a.next_loop_plan.estimated_effort, Effort::Medium);
        assert_eq!(a.evidence.error_traces.len(), 2);
    }

    #[tokio::test]
    async fn test_inconsistent_artifact_yields_empty_analysis() {
        let mut broken = artifact(&[ExecutionStatus::Failed]);
        broken.total_tests = 7;
        let a = ImprovementAnalyzer::new(None).analyze(&broken, None, true).await;
        assert!(a.failed_tests.is_empty());
        assert!(a.improvement_suggestions.is_empty());
    }

    #[tokio::test]
    async fn test_llm_suggestions_are_used_and_sorted() {
        let llm: Arc<dyn LlmClient> = Arc::new(MockLlmClient::with_responses([r#"{"improvements": [
            {"category": "UI改善", "priority": "低", "description": "Tweak layout"},
            {"category": "performance", "priority": "high", "description": "Cache responses", "test_strategy": "load test"}
        ]}"#]));
        let a = ImprovementAnalyzer::new(Some(llm))
            .analyze(&artifact(&[ExecutionStatus::Failed]), None, true)
            .await;
        assert_eq!(a.improvement_suggestions.len(), 2);
        assert_eq!(a.improvement_suggestions[0].description, "Cache responses");
        assert_eq!(a.improvement_suggestions[0].category, Category::Performance);
        assert_eq!(a.improvement_suggestions[1].category, Category::Ui);
        assert_eq!(a.next_loop_plan.test_strategy_updates, vec!["load test"]);
    }

    #[tokio::test]
    async fn test_backend_skipped_at_basic_level() {
        let mock = Arc::new(MockLlmClient::with_responses([r#"{"improvements": []}"#]));
        let llm: Arc<dyn LlmClient> = mock.clone();
        let a = ImprovementAnalyzer::new(Some(llm))
            .analyze(&artifact(&[ExecutionStatus::Failed]), None, false)
            .await;
        assert!(mock.prompts().is_empty());
        assert_eq!(a.improvement_suggestions.len(), 1);
    }

    #[tokio::test]
    async fn test_llm_garbage_falls_back_to_rules() {
        let llm: Arc<dyn LlmClient> = Arc::new(MockLlmClient::with_responses(["no idea"]));
        let a = ImprovementAnalyzer::new(Some(llm))
            .analyze(&artifact(&[ExecutionStatus::Failed]), None, true)
            .await;
        assert_eq!(a.improvement_suggestions.len(), 1);
        assert!(a.improvement_suggestions[0].description.contains("1 failed test"));
    }

    #[test]
    fn test_stalled_trend_adds_suggestion() {
        let exec = artifact(&[ExecutionStatus::Failed]);
        let failed = extract_failed_tests(&exec);
        let trend = Some(TrendComparison {
            previous_iteration: 1,
            previous_failures: 1,
            current_failures: 1,
        });
        let s = rule_based_suggestions(&exec, &failed, trend);
        assert_eq!(s.len(), 2);
        assert!(s[1].description.contains("iteration 1"));
    }

    #[test]
    fn test_effort_scales_with_suggestions() {
        let s = ImprovementSuggestion {
            category: Category::Security,
            priority: Priority::Low,
            description: "x".to_string(),
            implementation_suggestion: String::new(),
            test_strategy: String::new(),
        };
        assert_eq!(plan_next_iteration(&vec![s.clone(); 3]).estimated_effort, Effort::Medium);
        assert_eq!(plan_next_iteration(&vec![s; 4]).estimated_effort, Effort::High);
    }
}
