//! 测试执行协作服务适配器
//!
//! 协议（执行服务默认 5001 端口）：
//! 1. `POST /upload_test_cases`，multipart 字段 `test_cases_file` → `{success, test_cases}`
//! 2. 每个用例依次：`POST /create_execution` → `POST /start_execution/{id}` →
//!    每步 `POST /complete_step/{id}` → `GET /get_execution/{id}` → `GET /export_results/{id}`
//!
//! 用例之间严格顺序执行。本地 ExecutionStore 中的状态机与远端同步推进，
//! 最终判定与导出表格都以本地状态机为准。

use std::path::{Path, PathBuf};

use reqwest::multipart;
use serde_json::json;

use crate::config::{ServicesSection, StepFailurePolicy};
use crate::execution::{ExecutionStore, ExecutionStyle};
use crate::integration::error::IntegrationError;
use crate::integration::payload::{array_field, str_field, PayloadError};
use crate::integration::simulator::OutcomeSimulator;
use crate::integration::{join_url, read_envelope, read_object, BoundedClient};
use crate::model::{ExecutionArtifact, ExecutionResult, ExecutionStatus, StepStatus, TestCase};

pub struct ExecutionAdapter {
    client: BoundedClient,
    base_url: String,
    style: ExecutionStyle,
    policy: StepFailurePolicy,
}

impl ExecutionAdapter {
    pub fn new(services: &ServicesSection, policy: StepFailurePolicy) -> Self {
        let style = ExecutionStyle::parse(&services.execution_style).unwrap_or_else(|| {
            tracing::warn!(
                style = %services.execution_style,
                "unknown execution style, using {}",
                ExecutionStyle::default().as_str()
            );
            ExecutionStyle::default()
        });
        Self {
            client: BoundedClient::new(services.request_timeout_secs, None),
            base_url: services.execution_url.clone(),
            style,
            policy,
        }
    }

    /// 上传用例表格并逐个驱动执行。上传失败返回 Err（整体转入回退）；
    /// 单个用例失败只体现在该用例的结果里
    pub async fn execute_test_cases(
        &self,
        csv_path: &Path,
        results_dir: &Path,
        store: &mut ExecutionStore,
        simulator: &mut dyn OutcomeSimulator,
    ) -> Result<ExecutionArtifact, IntegrationError> {
        let cases = self.upload_cases(csv_path).await?;
        tracing::info!("Execution service accepted {} test cases", cases.len());

        let mut results = Vec::with_capacity(cases.len());
        for case in &cases {
            let result = self.execute_case(case, results_dir, store, simulator).await;
            tracing::info!(
                case = %result.test_case_id,
                status = ?result.status,
                "test case finished"
            );
            results.push(result);
        }

        Ok(ExecutionArtifact::from_results(results, false, false))
    }

    async fn upload_cases(&self, csv_path: &Path) -> Result<Vec<TestCase>, IntegrationError> {
        let bytes = tokio::fs::read(csv_path).await?;
        let file_name = csv_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "test_cases.csv".to_string());
        let part = multipart::Part::bytes(bytes)
            .file_name(file_name)
            .mime_str("text/csv")?;
        let form = multipart::Form::new().part("test_cases_file", part);

        let resp = self
            .client
            .post(join_url(&self.base_url, "upload_test_cases"))
            .multipart(form)
            .send()
            .await?;
        let map = read_envelope(resp).await?;
        let cases: Vec<TestCase> = array_field(&map, "test_cases")?;
        if cases.is_empty() {
            return Err(PayloadError::InvalidField {
                field: "test_cases".to_string(),
                reason: "no test cases accepted".to_string(),
            }
            .into());
        }
        Ok(cases)
    }

    async fn execute_case(
        &self,
        case: &TestCase,
        results_dir: &Path,
        store: &mut ExecutionStore,
        simulator: &mut dyn OutcomeSimulator,
    ) -> ExecutionResult {
        let errored = |reason: String| ExecutionResult {
            test_case_id: case.id.clone(),
            test_name: case.name.clone(),
            status: ExecutionStatus::Error,
            failure_reason: Some(reason),
            step_results: Vec::new(),
            execution_id: None,
            export_path: None,
        };

        let execution_id = match self.create_execution(case).await {
            Ok(id) => id,
            Err(e) => return errored(format!("create execution failed: {}", e)),
        };
        if let Err(e) = store.create(&execution_id, case, self.style) {
            return errored(e.to_string());
        }
        if let Err(e) = store.start(&execution_id) {
            return errored(e.to_string());
        }
        if let Err(e) = self.post_empty(&format!("start_execution/{}", execution_id)).await {
            tracing::warn!(execution = %execution_id, error = %e, "remote start failed");
            if let Err(fail_err) = store.fail(&execution_id, format!("start execution failed: {}", e)) {
                tracing::debug!(execution = %execution_id, error = %fail_err, "could not mark execution failed");
            }
        } else {
            self.drive_steps(case, &execution_id, store, simulator).await;
        }

        match self.get_execution(&execution_id).await {
            Ok(remote_status) => {
                tracing::debug!(execution = %execution_id, remote_status = %remote_status, "remote execution state")
            }
            Err(e) => tracing::debug!(execution = %execution_id, error = %e, "could not read remote execution"),
        }
        match self.export_remote(&execution_id).await {
            Ok(path) => tracing::debug!(execution = %execution_id, path = %path, "remote export written"),
            Err(e) => tracing::warn!(execution = %execution_id, error = %e, "remote export failed"),
        }

        let export_path = self.write_local_export(&execution_id, results_dir, store).await;

        match store.get(&execution_id) {
            Some(exec) => {
                let status = exec.outcome();
                ExecutionResult {
                    test_case_id: case.id.clone(),
                    test_name: case.name.clone(),
                    status,
                    failure_reason: status.is_failure().then(|| exec.summarize_failure()).flatten(),
                    step_results: exec.step_results().to_vec(),
                    execution_id: Some(execution_id),
                    export_path,
                }
            }
            None => errored(format!("execution {} missing from store", execution_id)),
        }
    }

    async fn drive_steps(
        &self,
        case: &TestCase,
        execution_id: &str,
        store: &mut ExecutionStore,
        simulator: &mut dyn OutcomeSimulator,
    ) {
        for (index, step) in case.steps.iter().enumerate() {
            let mut status = if simulator.step_passes(case, index) {
                StepStatus::Passed
            } else {
                StepStatus::Failed
            };
            let result = format!("Step {} result", index + 1);
            let mut notes = format!("Executed step: {}", step);

            let body = json!({
                "result": result,
                "status": status.to_string(),
                "notes": notes,
            });
            if let Err(e) = self
                .post_json(&format!("complete_step/{}", execution_id), &body)
                .await
            {
                status = StepStatus::Failed;
                notes = format!("{} (remote error: {})", notes, e);
            }

            if let Err(e) = store.complete_step(execution_id, result, status, Some(notes)) {
                tracing::warn!(execution = %execution_id, error = %e, "local step update rejected");
                return;
            }

            if status == StepStatus::Failed && self.policy == StepFailurePolicy::Abort {
                let reason = format!("step {} failed: {}", index + 1, step);
                // 最后一步失败时用例已 completed，fail 会被拒绝，结果同样判为 failed
                if let Err(e) = store.fail(execution_id, reason) {
                    tracing::debug!(execution = %execution_id, error = %e, "case already terminal");
                }
                return;
            }
        }
    }

    async fn create_execution(&self, case: &TestCase) -> Result<String, IntegrationError> {
        let body = json!({
            "test_case_id": case.id,
            "execution_style": self.style.as_str(),
        });
        let map = self.post_json("create_execution", &body).await?;
        Ok(str_field(&map, "execution_id")?.to_string())
    }

    async fn get_execution(&self, execution_id: &str) -> Result<String, IntegrationError> {
        let resp = self
            .client
            .get(join_url(&self.base_url, &format!("get_execution/{}", execution_id)))
            .send()
            .await?;
        let map = read_object(resp).await?;
        Ok(map
            .get("status")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string())
    }

    async fn export_remote(&self, execution_id: &str) -> Result<String, IntegrationError> {
        let resp = self
            .client
            .get(join_url(&self.base_url, &format!("export_results/{}", execution_id)))
            .send()
            .await?;
        let map = read_envelope(resp).await?;
        Ok(str_field(&map, "filepath")?.to_string())
    }

    async fn write_local_export(
        &self,
        execution_id: &str,
        results_dir: &Path,
        store: &ExecutionStore,
    ) -> Option<PathBuf> {
        let text = match store.export(execution_id) {
            Ok(Some(text)) => text,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(execution = %execution_id, error = %e, "local export failed");
                return None;
            }
        };
        let path = results_dir.join(format!("{}.csv", sanitize(execution_id)));
        match tokio::fs::write(&path, text).await {
            Ok(()) => Some(path),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "could not write execution export");
                None
            }
        }
    }

    async fn post_json(
        &self,
        path: &str,
        body: &serde_json::Value,
    ) -> Result<serde_json::Map<String, serde_json::Value>, IntegrationError> {
        let resp = self
            .client
            .post(join_url(&self.base_url, path))
            .json(body)
            .send()
            .await?;
        read_envelope(resp).await
    }

    async fn post_empty(&self, path: &str) -> Result<(), IntegrationError> {
        let resp = self.client.post(join_url(&self.base_url, path)).send().await?;
        read_envelope(resp).await.map(|_| ())
    }
}

fn sanitize(raw: &str) -> String {
    raw.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

/// 本地回退：按固定失败概率模拟每个用例的通过/失败，结果标记为模拟
pub fn fallback_execution(
    cases: &[TestCase],
    simulator: &mut dyn OutcomeSimulator,
    error: Option<String>,
) -> ExecutionArtifact {
    let results = cases
        .iter()
        .map(|case| {
            let passed = simulator.case_passes(case);
            ExecutionResult {
                test_case_id: case.id.clone(),
                test_name: case.name.clone(),
                status: if passed { ExecutionStatus::Passed } else { ExecutionStatus::Failed },
                failure_reason: (!passed).then(|| "Unexpected result (simulated)".to_string()),
                step_results: Vec::new(),
                execution_id: None,
                export_path: None,
            }
        })
        .collect();

    let artifact = ExecutionArtifact::from_results(results, true, true);
    match error {
        Some(e) => artifact.with_error(e),
        None => artifact,
    }
}
