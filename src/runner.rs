//! 运行入口：前置检查、协作服务自动启动、循环执行、清理
//!
//! 返回 RunOutcome 而不是错误：调用方（main）只负责打印摘要并映射退出码。

use std::sync::Arc;

use crate::config::AppConfig;
use crate::core::{ShutdownCoordinator, ShutdownManager};
use crate::integration::{ensure_collaborators, AvailabilityProbe};
use crate::llm::create_llm_from_config;
use crate::orchestrator::{ArtifactStore, FinalReport, LoopOrchestrator, LoopOutcome};

pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_ERROR: i32 = 1;
pub const EXIT_CANCELLED: i32 = 130;

#[derive(Debug)]
pub enum RunOutcome {
    Completed(FinalReport),
    Cancelled(FinalReport),
    /// 前置检查失败（无报告），或循环因致命错误中止（附带中止前的报告）
    Failed {
        error: String,
        report: Option<FinalReport>,
    },
}

impl RunOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            RunOutcome::Completed(_) => EXIT_SUCCESS,
            RunOutcome::Cancelled(_) => EXIT_CANCELLED,
            RunOutcome::Failed { .. } => EXIT_ERROR,
        }
    }

    pub fn report(&self) -> Option<&FinalReport> {
        match self {
            RunOutcome::Completed(r) | RunOutcome::Cancelled(r) => Some(r),
            RunOutcome::Failed { report, .. } => report.as_ref(),
        }
    }
}

/// 运行完整的迭代循环
pub async fn run(
    cfg: &AppConfig,
    target_url: &str,
    max_iterations: usize,
    auto_start: bool,
    shutdown: &ShutdownManager,
) -> RunOutcome {
    if let Err(error) = check_prerequisites(cfg, target_url, max_iterations).await {
        return RunOutcome::Failed { error, report: None };
    }

    let mut coordinator = ShutdownCoordinator::new();
    let probe = AvailabilityProbe::new(&cfg.services);
    if auto_start {
        let launched = Arc::new(ensure_collaborators(&cfg.services, &probe).await);
        coordinator.register(launched);
    }

    let availability = probe.probe_all().await;
    tracing::info!(
        level = %availability.level(),
        design = availability.design.available,
        execution = availability.execution.available,
        analysis = availability.analysis.available,
        "initial integration level"
    );

    let llm = create_llm_from_config(&cfg.llm);
    let mut orchestrator = LoopOrchestrator::new(cfg, llm, shutdown.token());
    let result = orchestrator.run(target_url, max_iterations).await;

    for outcome in coordinator.run_cleanup().await {
        tracing::debug!(?outcome, "cleanup finished");
    }
    if let Some(reason) = shutdown.reason() {
        tracing::info!(reason = %reason, "run stopped early");
    }

    match result {
        Ok(report) => match report.outcome {
            LoopOutcome::Stable | LoopOutcome::MaxIterations => RunOutcome::Completed(report),
            LoopOutcome::Cancelled => RunOutcome::Cancelled(report),
            LoopOutcome::Aborted => RunOutcome::Failed {
                error: report
                    .abort_reason
                    .clone()
                    .unwrap_or_else(|| "iteration aborted".to_string()),
                report: Some(report),
            },
        },
        Err(e) => RunOutcome::Failed {
            error: e.to_string(),
            report: None,
        },
    }
}

async fn check_prerequisites(cfg: &AppConfig, target_url: &str, max_iterations: usize) -> Result<(), String> {
    let target = target_url.trim();
    if !(target.starts_with("http://") || target.starts_with("https://")) {
        return Err(format!("target url must start with http:// or https://: '{}'", target_url));
    }
    if max_iterations == 0 {
        return Err("max iterations must be at least 1".to_string());
    }
    cfg.loop_.validate()?;
    ArtifactStore::new(&cfg.loop_.storage_root)
        .ensure_root()
        .await
        .map_err(|e| e.to_string())
}
