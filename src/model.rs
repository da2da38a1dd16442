//! 数据模型：规格产物、测试用例、执行结果、改进建议、迭代记录
//!
//! 所有产物都可序列化为 JSON 并落盘到迭代目录；字段名沿用协作服务的接口约定
//! （如 `test_case_id`、`test_steps`），以便直接与其 JSON 互通。

use std::path::PathBuf;

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};

/// 检测到的 UI 组件
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum UiComponent {
    Form {
        action: String,
        method: String,
        inputs: usize,
    },
    Navigation {
        links: usize,
    },
    Button {
        text: String,
    },
    Table {
        rows: usize,
        columns: usize,
    },
}

impl UiComponent {
    pub fn kind(&self) -> &'static str {
        match self {
            UiComponent::Form { .. } => "form",
            UiComponent::Navigation { .. } => "navigation",
            UiComponent::Button { .. } => "button",
            UiComponent::Table { .. } => "table",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

impl Priority {
    /// 宽松解析：接受英文与原系统使用的「高/中/低」
    pub fn parse_lenient(raw: &str) -> Option<Self> {
        match raw.trim().to_lowercase().as_str() {
            "high" | "高" => Some(Priority::High),
            "medium" | "mid" | "中" => Some(Priority::Medium),
            "low" | "低" => Some(Priority::Low),
            _ => None,
        }
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Priority::High => write!(f, "high"),
            Priority::Medium => write!(f, "medium"),
            Priority::Low => write!(f, "low"),
        }
    }
}

/// 推定的功能
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feature {
    pub name: String,
    pub description: String,
    pub category: String,
    pub priority: Priority,
    /// 推定依据
    pub evidence: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserScenario {
    pub scenario: String,
    pub steps: Vec<String>,
    pub expected_outcome: String,
}

/// 规格产物：每次迭代由 SpecExtractor 产出一次，下游只读
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpecificationArtifact {
    pub target_url: String,
    pub ui_components: Vec<UiComponent>,
    pub estimated_features: Vec<Feature>,
    pub user_scenarios: Vec<UserScenario>,
    /// 六段式规格文档（Markdown）
    pub specification_document: String,
    pub extraction_timestamp: DateTime<Local>,
    pub fallback_used: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// 测试用例；迭代内 `id` 唯一
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCase {
    #[serde(rename = "test_case_id")]
    pub id: String,
    #[serde(default)]
    pub requirement_id: String,
    #[serde(rename = "test_name")]
    pub name: String,
    #[serde(rename = "test_objective", default)]
    pub objective: String,
    #[serde(default)]
    pub preconditions: Vec<String>,
    #[serde(rename = "test_steps", default)]
    pub steps: Vec<String>,
    #[serde(default)]
    pub expected_results: Vec<String>,
    #[serde(default)]
    pub test_data: String,
    #[serde(rename = "test_environment", default)]
    pub environment: String,
}

impl TestCase {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        steps: Vec<String>,
        expected_results: Vec<String>,
    ) -> Self {
        Self {
            id: id.into(),
            requirement_id: String::new(),
            name: name.into(),
            objective: String::new(),
            preconditions: Vec::new(),
            steps,
            expected_results,
            test_data: String::new(),
            environment: String::new(),
        }
    }
}

/// 测试设计产物。`fallback_used` 为 true 时用例来自本地回退生成器，而非协作服务
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestDesignArtifact {
    pub success: bool,
    pub fallback_used: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub requirements: Vec<serde_json::Value>,
    pub risks: Vec<serde_json::Value>,
    pub test_cases: Vec<TestCase>,
    pub requirements_count: usize,
    pub test_cases_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Passed,
    Failed,
    Error,
}

impl ExecutionStatus {
    pub fn is_failure(self) -> bool {
        !matches!(self, ExecutionStatus::Passed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Passed,
    Failed,
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepStatus::Passed => write!(f, "passed"),
            StepStatus::Failed => write!(f, "failed"),
        }
    }
}

/// 单步执行结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub step_index: usize,
    pub description: String,
    pub result: String,
    pub status: StepStatus,
    pub timestamp: DateTime<Local>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// 单个测试用例在一次迭代中的执行结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub test_case_id: String,
    pub test_name: String,
    pub status: ExecutionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    #[serde(default)]
    pub step_results: Vec<StepResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub export_path: Option<PathBuf>,
}

/// 测试执行产物。`simulated` 为 true 表示结果由伪随机模拟产生，不代表真实执行
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionArtifact {
    pub success: bool,
    pub fallback_used: bool,
    pub simulated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub execution_results: Vec<ExecutionResult>,
    pub total_tests: usize,
    pub passed_tests: usize,
    pub failed_tests: usize,
}

impl ExecutionArtifact {
    pub fn from_results(results: Vec<ExecutionResult>, fallback_used: bool, simulated: bool) -> Self {
        let total_tests = results.len();
        let passed_tests = results
            .iter()
            .filter(|r| r.status == ExecutionStatus::Passed)
            .count();
        Self {
            success: true,
            fallback_used,
            simulated,
            error: None,
            execution_results: results,
            total_tests,
            passed_tests,
            failed_tests: total_tests - passed_tests,
        }
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Functional,
    Performance,
    Ui,
    Security,
}

impl Category {
    pub fn parse_lenient(raw: &str) -> Option<Self> {
        let raw = raw.trim().to_lowercase();
        if raw.starts_with("functional") || raw.starts_with("機能") || raw.starts_with("功能") {
            Some(Category::Functional)
        } else if raw.starts_with("performance") || raw.starts_with("性能") {
            Some(Category::Performance)
        } else if raw.starts_with("ui") {
            Some(Category::Ui)
        } else if raw.starts_with("security") || raw.starts_with("セキュリティ") || raw.starts_with("安全") {
            Some(Category::Security)
        } else {
            None
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Category::Functional => write!(f, "Functional"),
            Category::Performance => write!(f, "Performance"),
            Category::Ui => write!(f, "UI"),
            Category::Security => write!(f, "Security"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImprovementSuggestion {
    pub category: Category,
    pub priority: Priority,
    pub description: String,
    #[serde(default)]
    pub implementation_suggestion: String,
    /// 建议的验证策略
    #[serde(default)]
    pub test_strategy: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedTest {
    pub test_case_id: String,
    pub test_name: String,
    pub failure_reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evidence {
    pub screenshots: Vec<String>,
    pub logs: Vec<String>,
    pub error_traces: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Effort {
    Low,
    Medium,
    High,
}

/// 下一轮迭代计划
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NextIterationPlan {
    pub focus_areas: Vec<Category>,
    pub priority_improvements: Vec<ImprovementSuggestion>,
    pub test_strategy_updates: Vec<String>,
    pub estimated_effort: Effort,
}

impl Default for NextIterationPlan {
    fn default() -> Self {
        Self {
            focus_areas: Vec::new(),
            priority_improvements: Vec::new(),
            test_strategy_updates: Vec::new(),
            estimated_effort: Effort::Low,
        }
    }
}

/// 与上一轮迭代的失败数对比
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrendComparison {
    pub previous_iteration: usize,
    pub previous_failures: usize,
    pub current_failures: usize,
}

impl TrendComparison {
    pub fn improved(&self) -> bool {
        self.current_failures < self.previous_failures
    }
}

/// 改进分析产物
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImprovementAnalysis {
    pub failed_tests: Vec<FailedTest>,
    pub evidence: Evidence,
    pub improvement_suggestions: Vec<ImprovementSuggestion>,
    pub next_loop_plan: NextIterationPlan,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trend: Option<TrendComparison>,
    pub analysis_timestamp: DateTime<Local>,
}

impl ImprovementAnalysis {
    /// 空但结构完整的分析结果（分析器内部失败时返回）
    pub fn empty() -> Self {
        Self {
            failed_tests: Vec::new(),
            evidence: Evidence::default(),
            improvement_suggestions: Vec::new(),
            next_loop_plan: NextIterationPlan::default(),
            trend: None,
            analysis_timestamp: Local::now(),
        }
    }
}

/// 集成级别：每次迭代开始时重新计算，不跨迭代缓存
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntegrationLevel {
    /// 两个协作服务与分析后端均可达
    Full,
    /// 至少一个协作服务不可达
    Partial,
    /// 分析后端不可达
    Basic,
}

impl std::fmt::Display for IntegrationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IntegrationLevel::Full => write!(f, "full"),
            IntegrationLevel::Partial => write!(f, "partial"),
            IntegrationLevel::Basic => write!(f, "basic"),
        }
    }
}

/// 迭代记录：写入历史后不再修改
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationRecord {
    /// 从 1 开始，单调递增
    pub loop_number: usize,
    pub loop_directory: PathBuf,
    pub integration_level: IntegrationLevel,
    pub spec_extraction: SpecificationArtifact,
    pub test_design: TestDesignArtifact,
    pub test_execution: ExecutionArtifact,
    pub improvement_analysis: ImprovementAnalysis,
    pub timestamp: DateTime<Local>,
}

impl IterationRecord {
    /// 本轮失败（failed 或 error）的用例数，直接取自执行结果；
    /// 分析阶段回退为空结果时也不会把失败漏掉
    pub fn failure_count(&self) -> usize {
        self.test_execution
            .execution_results
            .iter()
            .filter(|r| r.status.is_failure())
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_test_case_uses_collaborator_field_names() {
        let raw = r#"{
            "test_case_id": "TC-001",
            "test_name": "Login",
            "test_steps": ["open", "submit"],
            "expected_results": ["ok"]
        }"#;
        let tc: TestCase = serde_json::from_str(raw).unwrap();
        assert_eq!(tc.id, "TC-001");
        assert_eq!(tc.steps, vec!["open", "submit"]);
        assert!(tc.preconditions.is_empty());

        let back = serde_json::to_value(&tc).unwrap();
        assert_eq!(back["test_case_id"], "TC-001");
        assert_eq!(back["test_name"], "Login");
    }

    #[test]
    fn test_priority_ordering_high_first() {
        let mut p = vec![Priority::Low, Priority::High, Priority::Medium];
        p.sort();
        assert_eq!(p, vec![Priority::High, Priority::Medium, Priority::Low]);
    }

    #[test]
    fn test_lenient_parsing() {
        assert_eq!(Priority::parse_lenient("高"), Some(Priority::High));
        assert_eq!(Priority::parse_lenient(" Medium "), Some(Priority::Medium));
        assert_eq!(Priority::parse_lenient("urgent"), None);
        assert_eq!(Category::parse_lenient("機能改善"), Some(Category::Functional));
        assert_eq!(Category::parse_lenient("UI improvement"), Some(Category::Ui));
        assert_eq!(Category::parse_lenient("docs"), None);
    }

    #[test]
    fn test_execution_artifact_counts() {
        let result = |id: &str, status| ExecutionResult {
            test_case_id: id.to_string(),
            test_name: id.to_string(),
            status,
            failure_reason: None,
            step_results: Vec::new(),
            execution_id: None,
            export_path: None,
        };
        let artifact = ExecutionArtifact::from_results(
            vec![
                result("a", ExecutionStatus::Passed),
                result("b", ExecutionStatus::Failed),
                result("c", ExecutionStatus::Error),
            ],
            true,
            true,
        );
        assert_eq!(artifact.total_tests, 3);
        assert_eq!(artifact.passed_tests, 1);
        assert_eq!(artifact.failed_tests, 2);
    }

    #[test]
    fn test_ui_component_tagged_serialization() {
        let c = UiComponent::Table { rows: 3, columns: 2 };
        let v = serde_json::to_value(&c).unwrap();
        assert_eq!(v["type"], "table");
        assert_eq!(c.kind(), "table");
    }
}
