//! 迭代循环编排
//!
//! 每轮严格顺序执行：分配存储 → 规格提取 → 可用性探测 → 测试设计 → 测试执行 → 改进分析，
//! 各阶段产物落盘后才进入下一阶段。协作服务不可达或返回不可用内容时走本地回退；
//! 只有迭代内部的意外失败（存储、序列化）会以 LoopError 中止整个循环，
//! 此时仍基于已完成的迭代生成最终报告。取消只在阶段之间检查。

use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use tokio_util::sync::CancellationToken;

use crate::analysis::ImprovementAnalyzer;
use crate::config::{AppConfig, LoopSection};
use crate::core::{LoopError, LoopResult};
use crate::execution::ExecutionStore;
use crate::integration::tabular::export_test_cases;
use crate::integration::{
    fallback_execution, fallback_test_design, AvailabilityProbe, DesignAdapter, ExecutionAdapter,
    OutcomeSimulator, RandomSimulator,
};
use crate::llm::LlmClient;
use crate::model::{IntegrationLevel, IterationRecord};
use crate::orchestrator::policy::ContinuationPolicy;
use crate::orchestrator::report::{FinalReport, LoopOutcome};
use crate::orchestrator::storage::{
    ArtifactStore, EXECUTION_RESULTS_FILE, IMPROVEMENT_ANALYSIS_FILE, REQUIREMENTS_FILE,
    SPEC_EXTRACTION_FILE, TEST_CASES_FILE, TEST_DESIGN_FILE,
};
use crate::spec::SpecExtractor;

pub struct LoopOrchestrator {
    settings: LoopSection,
    store: ArtifactStore,
    policy: ContinuationPolicy,
    probe: AvailabilityProbe,
    extractor: SpecExtractor,
    design: DesignAdapter,
    execution: ExecutionAdapter,
    analyzer: ImprovementAnalyzer,
    simulator: Box<dyn OutcomeSimulator>,
    cancel: CancellationToken,
    history: Vec<IterationRecord>,
}

impl LoopOrchestrator {
    pub fn new(cfg: &AppConfig, llm: Option<Arc<dyn LlmClient>>, cancel: CancellationToken) -> Self {
        let settings = cfg.loop_.clone();
        let simulator = RandomSimulator::new(
            settings.rng_seed,
            settings.simulated_case_failure_rate,
            settings.simulated_step_failure_rate,
        );
        Self {
            store: ArtifactStore::new(&settings.storage_root),
            policy: ContinuationPolicy::new(settings.max_suggestions_to_stop),
            probe: AvailabilityProbe::new(&cfg.services),
            extractor: SpecExtractor::new(cfg.services.probe_timeout_secs, llm.clone()),
            design: DesignAdapter::new(&cfg.services),
            execution: ExecutionAdapter::new(&cfg.services, settings.step_failure_policy),
            analyzer: ImprovementAnalyzer::new(llm),
            simulator: Box::new(simulator),
            cancel,
            history: Vec::new(),
            settings,
        }
    }

    /// 替换通过/失败判定来源（回放或测试用）
    pub fn with_simulator(mut self, simulator: Box<dyn OutcomeSimulator>) -> Self {
        self.simulator = simulator;
        self
    }

    pub fn history(&self) -> &[IterationRecord] {
        &self.history
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    /// 运行至多 `max_iterations` 轮并返回最终报告。
    /// 仅参数非法时返回 Err；迭代中的致命错误体现在报告的 outcome 中
    pub async fn run(&mut self, target_url: &str, max_iterations: usize) -> LoopResult<FinalReport> {
        if max_iterations == 0 {
            return Err(LoopError::Config("max_iterations must be at least 1".to_string()));
        }
        if target_url.trim().is_empty() {
            return Err(LoopError::Config("target url is empty".to_string()));
        }

        self.history.clear();
        tracing::info!(target = %target_url, max_iterations, "loop started");

        let mut outcome = LoopOutcome::MaxIterations;
        let mut abort_reason = None;

        for loop_number in 1..=max_iterations {
            if self.cancel.is_cancelled() {
                outcome = LoopOutcome::Cancelled;
                break;
            }

            tracing::info!(iteration = loop_number, "===== iteration {} started =====", loop_number);
            let record = match self.run_iteration(loop_number, target_url).await {
                Ok(record) => record,
                Err(LoopError::Cancelled) => {
                    tracing::info!(iteration = loop_number, "iteration interrupted, artifacts written so far are kept");
                    outcome = LoopOutcome::Cancelled;
                    break;
                }
                Err(e) => {
                    tracing::error!(iteration = loop_number, error = %e, "iteration failed, aborting loop");
                    outcome = LoopOutcome::Aborted;
                    abort_reason = Some(e.to_string());
                    break;
                }
            };

            let stop = self.policy.should_stop_after(&record);
            tracing::info!(
                iteration = loop_number,
                tests = record.test_execution.total_tests,
                failures = record.failure_count(),
                suggestions = record.improvement_analysis.improvement_suggestions.len(),
                "iteration completed"
            );
            self.history.push(record);

            if stop {
                tracing::info!(iteration = loop_number, "improvement target reached, stopping");
                outcome = LoopOutcome::Stable;
                break;
            }
            if loop_number == max_iterations {
                break;
            }
            if !self.pause().await {
                outcome = LoopOutcome::Cancelled;
                break;
            }
        }

        let mut report = FinalReport::build(target_url, &self.history, outcome, abort_reason);
        match self.store.write_report(&report, Local::now()).await {
            Ok(path) => {
                tracing::info!(path = %path.display(), "final report written");
                report.report_path = Some(path);
            }
            Err(e) => tracing::warn!(error = %e, "could not write final report"),
        }
        tracing::info!(
            iterations = report.total_iterations_executed,
            outcome = ?report.outcome,
            "loop finished"
        );
        Ok(report)
    }

    async fn run_iteration(&mut self, loop_number: usize, target_url: &str) -> LoopResult<IterationRecord> {
        let scope = self.store.allocate(loop_number, Local::now()).await?;

        // 1. 规格提取
        let spec = self.extractor.extract(target_url).await;
        scope.write_json(SPEC_EXTRACTION_FILE, &spec).await?;
        scope.write_text(REQUIREMENTS_FILE, &spec.specification_document).await?;
        tracing::info!(
            iteration = loop_number,
            features = spec.estimated_features.len(),
            fallback = spec.fallback_used,
            "specification extracted"
        );
        self.checkpoint()?;

        // 2. 可用性探测（每轮重新计算，不缓存）
        let availability = self.probe.probe_all().await;
        let level = availability.level();
        tracing::info!(
            iteration = loop_number,
            level = %level,
            design = availability.design.available,
            execution = availability.execution.available,
            analysis = availability.analysis.available,
            "integration level"
        );

        // 3. 测试设计
        let design = if availability.design.available {
            match self.design.design(&spec.specification_document).await {
                Ok(out) => out,
                Err(e) => {
                    tracing::warn!(iteration = loop_number, error = %e, "design collaborator failed, using fallback cases");
                    fallback_test_design(&spec, Some(e.to_string()))
                }
            }
        } else {
            fallback_test_design(&spec, Some("design collaborator unavailable".to_string()))
        };
        scope.write_json(TEST_DESIGN_FILE, &design.artifact).await?;
        let cases_csv = match design.cases_csv {
            Some(text) => text,
            None => export_test_cases(&design.artifact.test_cases)?,
        };
        let cases_path = scope.write_text(TEST_CASES_FILE, &cases_csv).await?;
        let design = design.artifact;
        tracing::info!(
            iteration = loop_number,
            cases = design.test_cases_count,
            fallback = design.fallback_used,
            "test design completed"
        );
        self.checkpoint()?;

        // 4. 测试执行
        let cases_written = tokio::fs::try_exists(&cases_path).await.unwrap_or(false);
        let execution = if availability.execution.available && cases_written {
            let mut executions = ExecutionStore::new();
            match self
                .execution
                .execute_test_cases(&cases_path, &scope.results_dir(), &mut executions, self.simulator.as_mut())
                .await
            {
                Ok(artifact) => artifact,
                Err(e) => {
                    tracing::warn!(iteration = loop_number, error = %e, "execution collaborator failed, simulating");
                    fallback_execution(&design.test_cases, self.simulator.as_mut(), Some(e.to_string()))
                }
            }
        } else {
            fallback_execution(
                &design.test_cases,
                self.simulator.as_mut(),
                Some("execution collaborator unavailable".to_string()),
            )
        };
        scope.write_json(EXECUTION_RESULTS_FILE, &execution).await?;
        tracing::info!(
            iteration = loop_number,
            total = execution.total_tests,
            passed = execution.passed_tests,
            failed = execution.failed_tests,
            simulated = execution.simulated,
            "test execution completed"
        );
        self.checkpoint()?;

        // 5. 改进分析
        let analysis = self
            .analyzer
            .analyze(&execution, self.history.last(), level != IntegrationLevel::Basic)
            .await;
        scope.write_json(IMPROVEMENT_ANALYSIS_FILE, &analysis).await?;
        tracing::info!(
            iteration = loop_number,
            failed = analysis.failed_tests.len(),
            suggestions = analysis.improvement_suggestions.len(),
            "improvement analysis completed"
        );

        Ok(IterationRecord {
            loop_number,
            loop_directory: scope.dir().to_path_buf(),
            integration_level: level,
            spec_extraction: spec,
            test_design: design,
            test_execution: execution,
            improvement_analysis: analysis,
            timestamp: Local::now(),
        })
    }

    fn checkpoint(&self) -> LoopResult<()> {
        if self.cancel.is_cancelled() {
            Err(LoopError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// 迭代间固定等待；被取消时返回 false
    async fn pause(&self) -> bool {
        let delay = Duration::from_millis(self.settings.iteration_delay_ms);
        if delay.is_zero() {
            return !self.cancel.is_cancelled();
        }
        tokio::select! {
            _ = tokio::time::sleep(delay) => true,
            _ = self.cancel.cancelled() => false,
        }
    }
}
