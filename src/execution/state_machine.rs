//! 单个测试用例的执行状态机
//!
//! `pending → running → (completed | failed)`。
//! - 只有步骤完成会推动状态：每完成一步游标加一，游标等于声明步数时进入 completed
//! - failed 由上层执行逻辑在步骤失败后决定终止时设置（见 StepFailurePolicy）
//! - 人工介入记录与状态正交：进入 running 之后随时可追加，不触发任何迁移
//! - 终态之后不再有迁移

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::integration::tabular::into_string;
use crate::model::{ExecutionStatus, StepResult, StepStatus, TestCase};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionState {
    Pending,
    Running,
    Completed,
    Failed,
}

impl ExecutionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ExecutionState::Completed | ExecutionState::Failed)
    }
}

impl std::fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionState::Pending => write!(f, "pending"),
            ExecutionState::Running => write!(f, "running"),
            ExecutionState::Completed => write!(f, "completed"),
            ExecutionState::Failed => write!(f, "failed"),
        }
    }
}

/// 执行风格（人工参与方式）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ExecutionStyle {
    #[serde(rename = "Human-in-the-Loop Driven")]
    HumanInTheLoop,
    #[serde(rename = "Manual Trigger Driven")]
    ManualTrigger,
    #[serde(rename = "Observer Driven")]
    Observer,
    #[default]
    #[serde(rename = "Semi-Automated BDD")]
    SemiAutomatedBdd,
}

impl ExecutionStyle {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionStyle::HumanInTheLoop => "Human-in-the-Loop Driven",
            ExecutionStyle::ManualTrigger => "Manual Trigger Driven",
            ExecutionStyle::Observer => "Observer Driven",
            ExecutionStyle::SemiAutomatedBdd => "Semi-Automated BDD",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        [
            ExecutionStyle::HumanInTheLoop,
            ExecutionStyle::ManualTrigger,
            ExecutionStyle::Observer,
            ExecutionStyle::SemiAutomatedBdd,
        ]
        .into_iter()
        .find(|s| s.as_str().eq_ignore_ascii_case(raw.trim()))
    }
}

/// 人工介入记录：原样保留到导出结果中
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterventionEntry {
    #[serde(rename = "type")]
    pub kind: String,
    pub description: String,
    pub result: String,
    pub timestamp: DateTime<Local>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("cannot {action} while {state}")]
    InvalidState {
        action: &'static str,
        state: ExecutionState,
    },

    #[error("all {declared} steps already completed")]
    StepOverflow { declared: usize },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestExecution {
    pub test_case_id: String,
    pub test_name: String,
    pub test_steps: Vec<String>,
    pub expected_results: Vec<String>,
    pub execution_style: ExecutionStyle,
    state: ExecutionState,
    current_step: usize,
    results: Vec<StepResult>,
    human_interventions: Vec<InterventionEntry>,
    start_time: Option<DateTime<Local>>,
    end_time: Option<DateTime<Local>>,
    failure_reason: Option<String>,
}

impl TestExecution {
    pub fn new(case: &TestCase, style: ExecutionStyle) -> Self {
        Self {
            test_case_id: case.id.clone(),
            test_name: case.name.clone(),
            test_steps: case.steps.clone(),
            expected_results: case.expected_results.clone(),
            execution_style: style,
            state: ExecutionState::Pending,
            current_step: 0,
            results: Vec::new(),
            human_interventions: Vec::new(),
            start_time: None,
            end_time: None,
            failure_reason: None,
        }
    }

    pub fn state(&self) -> ExecutionState {
        self.state
    }

    pub fn current_step(&self) -> usize {
        self.current_step
    }

    pub fn step_results(&self) -> &[StepResult] {
        &self.results
    }

    pub fn interventions(&self) -> &[InterventionEntry] {
        &self.human_interventions
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }

    /// pending → running；没有步骤的用例直接进入 completed
    pub fn start(&mut self) -> Result<(), TransitionError> {
        self.require(ExecutionState::Pending, "start")?;
        let now = Local::now();
        self.start_time = Some(now);
        self.state = ExecutionState::Running;
        if self.test_steps.is_empty() {
            self.state = ExecutionState::Completed;
            self.end_time = Some(now);
        }
        Ok(())
    }

    /// 记录一步结果并推进游标；游标到达声明步数时进入 completed
    pub fn complete_step(
        &mut self,
        result: impl Into<String>,
        status: StepStatus,
        notes: Option<String>,
    ) -> Result<ExecutionState, TransitionError> {
        self.require(ExecutionState::Running, "complete a step")?;
        let declared = self.test_steps.len();
        if self.current_step >= declared {
            return Err(TransitionError::StepOverflow { declared });
        }

        let now = Local::now();
        self.results.push(StepResult {
            step_index: self.current_step,
            description: self.test_steps[self.current_step].clone(),
            result: result.into(),
            status,
            timestamp: now,
            notes,
        });
        self.current_step += 1;

        if self.current_step == declared {
            self.state = ExecutionState::Completed;
            self.end_time = Some(now);
        }
        Ok(self.state)
    }

    /// running → failed（上层决定不再继续剩余步骤）
    pub fn fail(&mut self, reason: impl Into<String>) -> Result<(), TransitionError> {
        self.require(ExecutionState::Running, "fail")?;
        self.state = ExecutionState::Failed;
        self.failure_reason = Some(reason.into());
        self.end_time = Some(Local::now());
        Ok(())
    }

    /// 追加人工介入记录；pending 时拒绝，其余状态均可
    pub fn add_intervention(
        &mut self,
        kind: impl Into<String>,
        description: impl Into<String>,
        result: impl Into<String>,
    ) -> Result<(), TransitionError> {
        if self.state == ExecutionState::Pending {
            return Err(TransitionError::InvalidState {
                action: "record an intervention",
                state: self.state,
            });
        }
        self.human_interventions.push(InterventionEntry {
            kind: kind.into(),
            description: description.into(),
            result: result.into(),
            timestamp: Local::now(),
        });
        Ok(())
    }

    pub fn failed_steps(&self) -> impl Iterator<Item = &StepResult> {
        self.results.iter().filter(|r| r.status == StepStatus::Failed)
    }

    /// 报告用的最终判定：completed 且无失败步骤为 passed；有失败步骤或 failed 为 failed；
    /// 未进入终态（执行被中途放弃）为 error
    pub fn outcome(&self) -> ExecutionStatus {
        match self.state {
            ExecutionState::Completed if self.failed_steps().next().is_none() => ExecutionStatus::Passed,
            ExecutionState::Completed | ExecutionState::Failed => ExecutionStatus::Failed,
            ExecutionState::Pending | ExecutionState::Running => ExecutionStatus::Error,
        }
    }

    /// 汇总失败原因：显式原因优先，否则列出失败步骤
    pub fn summarize_failure(&self) -> Option<String> {
        if let Some(reason) = &self.failure_reason {
            return Some(reason.clone());
        }
        let failed: Vec<String> = self
            .failed_steps()
            .map(|r| format!("step {} failed: {}", r.step_index + 1, r.description))
            .collect();
        match (failed.is_empty(), self.state.is_terminal()) {
            (false, _) => Some(failed.join("; ")),
            (true, false) => Some(format!("execution stopped while {}", self.state)),
            (true, true) => None,
        }
    }

    /// 导出表格：表头摘要、步骤结果、（若有）人工介入记录，三段之间空行分隔
    pub fn export_csv(&self) -> Result<String, csv::Error> {
        let mut w = csv::WriterBuilder::new()
            .flexible(true)
            .from_writer(Vec::new());

        w.write_record([
            "Test Case ID",
            "Test Name",
            "Status",
            "Execution Style",
            "Start Time",
            "End Time",
            "Total Steps",
            "Completed Steps",
        ])?;
        w.write_record([
            self.test_case_id.clone(),
            self.test_name.clone(),
            self.state.to_string(),
            self.execution_style.as_str().to_string(),
            self.start_time.map(|t| t.to_rfc3339()).unwrap_or_default(),
            self.end_time.map(|t| t.to_rfc3339()).unwrap_or_default(),
            self.test_steps.len().to_string(),
            self.current_step.to_string(),
        ])?;

        w.write_record([""])?;
        w.write_record(["Step", "Result", "Status", "Timestamp", "Notes"])?;
        for r in &self.results {
            w.write_record([
                (r.step_index + 1).to_string(),
                r.result.clone(),
                r.status.to_string(),
                r.timestamp.to_rfc3339(),
                r.notes.clone().unwrap_or_default(),
            ])?;
        }

        if !self.human_interventions.is_empty() {
            w.write_record([""])?;
            w.write_record(["Human Interventions"])?;
            w.write_record(["Type", "Description", "Result", "Timestamp"])?;
            for i in &self.human_interventions {
                w.write_record([
                    i.kind.clone(),
                    i.description.clone(),
                    i.result.clone(),
                    i.timestamp.to_rfc3339(),
                ])?;
            }
        }

        into_string(w)
    }

    fn require(&self, expected: ExecutionState, action: &'static str) -> Result<(), TransitionError> {
        if self.state != expected {
            return Err(TransitionError::InvalidState {
                action,
                state: self.state,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn execution(steps: usize) -> TestExecution {
        let case = TestCase::new(
            "TC-001",
            "Checkout",
            (1..=steps).map(|i| format!("step {i}")).collect(),
            vec!["ok".to_string()],
        );
        TestExecution::new(&case, ExecutionStyle::SemiAutomatedBdd)
    }

    #[test]
    fn test_pending_is_initial() {
        let exec = execution(2);
        assert_eq!(exec.state(), ExecutionState::Pending);
        assert_eq!(exec.current_step(), 0);
        assert_eq!(exec.outcome(), ExecutionStatus::Error);
    }

    #[test]
    fn test_steps_drive_completion() {
        let mut exec = execution(3);
        exec.start().unwrap();
        assert_eq!(exec.state(), ExecutionState::Running);
        assert_eq!(exec.complete_step("r1", StepStatus::Passed, None).unwrap(), ExecutionState::Running);
        assert_eq!(exec.complete_step("r2", StepStatus::Passed, None).unwrap(), ExecutionState::Running);
        assert_eq!(exec.complete_step("r3", StepStatus::Passed, None).unwrap(), ExecutionState::Completed);
        assert_eq!(exec.current_step(), 3);
        assert_eq!(exec.outcome(), ExecutionStatus::Passed);
        assert_eq!(exec.step_results()[2].description, "step 3");
    }

    #[test]
    fn test_no_transition_out_of_terminal() {
        let mut exec = execution(1);
        exec.start().unwrap();
        exec.complete_step("r", StepStatus::Passed, None).unwrap();
        assert!(exec.complete_step("again", StepStatus::Passed, None).is_err());
        assert!(exec.fail("late").is_err());
        assert!(exec.start().is_err());
        assert_eq!(exec.state(), ExecutionState::Completed);
        assert_eq!(exec.current_step(), 1);

        let mut failed = execution(2);
        failed.start().unwrap();
        failed.fail("stop").unwrap();
        assert!(failed.complete_step("x", StepStatus::Passed, None).is_err());
        assert_eq!(failed.state(), ExecutionState::Failed);
    }

    #[test]
    fn test_step_before_start_rejected() {
        let mut exec = execution(1);
        let err = exec.complete_step("r", StepStatus::Passed, None).unwrap_err();
        assert_eq!(
            err,
            TransitionError::InvalidState {
                action: "complete a step",
                state: ExecutionState::Pending
            }
        );
    }

    #[test]
    fn test_zero_step_case_completes_on_start() {
        let mut exec = execution(0);
        exec.start().unwrap();
        assert_eq!(exec.state(), ExecutionState::Completed);
        assert_eq!(exec.current_step(), 0);
        assert_eq!(exec.outcome(), ExecutionStatus::Passed);
    }

    #[test]
    fn test_failed_step_with_continuation_still_completes() {
        let mut exec = execution(2);
        exec.start().unwrap();
        exec.complete_step("r1", StepStatus::Failed, None).unwrap();
        exec.complete_step("r2", StepStatus::Passed, None).unwrap();
        assert_eq!(exec.state(), ExecutionState::Completed);
        assert_eq!(exec.outcome(), ExecutionStatus::Failed);
        assert_eq!(exec.summarize_failure().unwrap(), "step 1 failed: step 1");
    }

    #[test]
    fn test_interventions_do_not_change_state() {
        let mut exec = execution(2);
        assert!(exec.add_intervention("manual", "too early", "").is_err());
        exec.start().unwrap();
        exec.add_intervention("judgement", "Layout looks broken", "rejected").unwrap();
        assert_eq!(exec.state(), ExecutionState::Running);
        exec.complete_step("r1", StepStatus::Passed, None).unwrap();
        exec.complete_step("r2", StepStatus::Passed, None).unwrap();
        exec.add_intervention("review", "After completion", "accepted").unwrap();
        assert_eq!(exec.state(), ExecutionState::Completed);
        assert_eq!(exec.interventions().len(), 2);
        assert_eq!(exec.outcome(), ExecutionStatus::Passed);
    }

    #[test]
    fn test_export_contains_all_sections() {
        let mut exec = execution(2);
        exec.start().unwrap();
        exec.complete_step("opened", StepStatus::Passed, Some("fine".to_string())).unwrap();
        exec.add_intervention("judgement", "Color, contrast", "ok").unwrap();
        exec.complete_step("clicked", StepStatus::Failed, None).unwrap();

        let csv_text = exec.export_csv().unwrap();
        let lines: Vec<&str> = csv_text.lines().collect();
        assert!(lines[0].starts_with("Test Case ID,Test Name,Status"));
        assert!(lines[1].starts_with("TC-001,Checkout,completed,Semi-Automated BDD"));
        assert!(lines[1].ends_with(",2,2"));
        assert!(csv_text.contains("1,opened,passed"));
        assert!(csv_text.contains("2,clicked,failed"));
        assert!(csv_text.contains("Human Interventions"));
        assert!(csv_text.contains("judgement,\"Color, contrast\",ok"));
    }

    #[test]
    fn test_export_without_interventions_omits_section() {
        let mut exec = execution(1);
        exec.start().unwrap();
        exec.complete_step("done", StepStatus::Passed, None).unwrap();
        assert!(!exec.export_csv().unwrap().contains("Human Interventions"));
    }

    #[test]
    fn test_style_parse() {
        assert_eq!(ExecutionStyle::parse("observer driven"), Some(ExecutionStyle::Observer));
        assert_eq!(ExecutionStyle::parse("nope"), None);
    }
}
