//! 最终报告
//!
//! 由已完成的迭代记录汇总得到；循环因致命错误中止时也照常生成，只包含中止前完成的迭代。

use std::fmt::Write as _;
use std::path::PathBuf;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

use crate::model::{IntegrationLevel, IterationRecord};

const STABLE_RECOMMENDATION: &str = "The system is broadly stable; continued monitoring is recommended.";
const MAX_RECOMMENDATIONS: usize = 3;

/// 循环结束方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopOutcome {
    /// 继续判定给出停止
    Stable,
    /// 达到最大迭代次数
    MaxIterations,
    /// 操作员中断
    Cancelled,
    /// 迭代内部致命错误
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImprovementTrend {
    pub failure_trend: Vec<usize>,
    pub improvement_detected: bool,
    pub stability_achieved: bool,
}

impl ImprovementTrend {
    pub fn from_failures(failure_trend: Vec<usize>) -> Self {
        let (improvement_detected, stability_achieved) = match (failure_trend.first(), failure_trend.last()) {
            (Some(first), Some(last)) => (failure_trend.len() > 1 && last < first, *last == 0),
            _ => (false, false),
        };
        Self {
            failure_trend,
            improvement_detected,
            stability_achieved,
        }
    }
}

/// 每轮迭代在报告中的摘要行
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationSummary {
    pub loop_number: usize,
    pub loop_directory: PathBuf,
    pub integration_level: IntegrationLevel,
    pub total_tests: usize,
    pub passed_tests: usize,
    pub failures: usize,
    pub design_fallback_used: bool,
    pub execution_fallback_used: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalReport {
    pub target_url: String,
    pub total_iterations_executed: usize,
    pub total_tests_run: usize,
    pub total_failures_identified: usize,
    /// 通过用例占比（百分比）；未执行任何用例时为 0
    pub success_rate: f64,
    pub improvement_trend: ImprovementTrend,
    pub final_recommendations: Vec<String>,
    pub iterations: Vec<IterationSummary>,
    pub outcome: LoopOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub abort_reason: Option<String>,
    pub generated_at: DateTime<Local>,
    /// 报告落盘位置（写入成功后回填，不进入 JSON）
    #[serde(skip)]
    pub report_path: Option<PathBuf>,
}

impl FinalReport {
    pub fn build(
        target_url: &str,
        history: &[IterationRecord],
        outcome: LoopOutcome,
        abort_reason: Option<String>,
    ) -> Self {
        let total_tests_run: usize = history.iter().map(|r| r.test_execution.total_tests).sum();
        let total_passed: usize = history.iter().map(|r| r.test_execution.passed_tests).sum();
        let total_failures_identified: usize = history.iter().map(|r| r.failure_count()).sum();
        let success_rate = if total_tests_run == 0 {
            0.0
        } else {
            total_passed as f64 * 100.0 / total_tests_run as f64
        };

        Self {
            target_url: target_url.to_string(),
            total_iterations_executed: history.len(),
            total_tests_run,
            total_failures_identified,
            success_rate,
            improvement_trend: ImprovementTrend::from_failures(
                history.iter().map(|r| r.failure_count()).collect(),
            ),
            final_recommendations: recommendations(history.last()),
            iterations: history.iter().map(summarize).collect(),
            outcome,
            abort_reason,
            generated_at: Local::now(),
            report_path: None,
        }
    }

    /// 面向终端的可读摘要
    pub fn render_summary(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Target: {}", self.target_url);
        for it in &self.iterations {
            let _ = writeln!(
                out,
                "  Iteration {}: {} tests, {} failures [{}{}{}]",
                it.loop_number,
                it.total_tests,
                it.failures,
                it.integration_level,
                if it.design_fallback_used { ", design fallback" } else { "" },
                if it.execution_fallback_used { ", simulated execution" } else { "" },
            );
        }
        let _ = writeln!(
            out,
            "Iterations: {}  Tests: {}  Failures: {}  Success rate: {:.1}%",
            self.total_iterations_executed, self.total_tests_run, self.total_failures_identified, self.success_rate
        );
        let _ = writeln!(out, "Failure trend: {:?}", self.improvement_trend.failure_trend);
        let _ = writeln!(
            out,
            "Improvement detected: {}  Stability achieved: {}",
            self.improvement_trend.improvement_detected, self.improvement_trend.stability_achieved
        );
        for r in &self.final_recommendations {
            let _ = writeln!(out, "  - {}", r);
        }
        if let Some(reason) = &self.abort_reason {
            let _ = writeln!(out, "Aborted: {}", reason);
        }
        if let Some(path) = &self.report_path {
            let _ = writeln!(out, "Report: {}", path.display());
        }
        out
    }
}

fn summarize(record: &IterationRecord) -> IterationSummary {
    IterationSummary {
        loop_number: record.loop_number,
        loop_directory: record.loop_directory.clone(),
        integration_level: record.integration_level,
        total_tests: record.test_execution.total_tests,
        passed_tests: record.test_execution.passed_tests,
        failures: record.failure_count(),
        design_fallback_used: record.test_design.fallback_used,
        execution_fallback_used: record.test_execution.fallback_used,
    }
}

/// 最后一轮的前三条建议（分析器已按优先级排序）
fn recommendations(last: Option<&IterationRecord>) -> Vec<String> {
    let recs: Vec<String> = last
        .map(|r| {
            r.improvement_analysis
                .improvement_suggestions
                .iter()
                .take(MAX_RECOMMENDATIONS)
                .map(|s| format!("{} improvement: {}", s.category, s.description))
                .collect()
        })
        .unwrap_or_default();
    if recs.is_empty() {
        vec![STABLE_RECOMMENDATION.to_string()]
    } else {
        recs
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trend_rules() {
        let t = ImprovementTrend::from_failures(vec![3, 1, 0]);
        assert!(t.improvement_detected);
        assert!(t.stability_achieved);

        let flat = ImprovementTrend::from_failures(vec![1, 1, 1]);
        assert!(!flat.improvement_detected);
        assert!(!flat.stability_achieved);

        // 单轮迭代不判定改进
        let single = ImprovementTrend::from_failures(vec![0]);
        assert!(!single.improvement_detected);
        assert!(single.stability_achieved);

        let empty = ImprovementTrend::from_failures(vec![]);
        assert!(!empty.improvement_detected);
        assert!(!empty.stability_achieved);
    }

    #[test]
    fn test_empty_history_report() {
        let report = FinalReport::build("https://example.com", &[], LoopOutcome::Aborted, Some("disk full".into()));
        assert_eq!(report.total_iterations_executed, 0);
        assert_eq!(report.success_rate, 0.0);
        assert_eq!(report.final_recommendations, vec![STABLE_RECOMMENDATION.to_string()]);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["outcome"], "aborted");
        assert!(json.get("report_path").is_none());
        assert!(report.render_summary().contains("Aborted: disk full"));
    }
}
