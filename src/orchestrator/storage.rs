//! 产物存储
//!
//! 每次迭代独占一个目录 `loop-{NNN}_{YYYYmmdd_HHMMSS}`（含 `evidence/` 与 `test_results/`），
//! 由迭代序号 + 时间戳保证唯一；同一秒内重名时追加 `_2`、`_3` 后缀，从不复用已有目录。
//! 最终报告写在存储根目录下。

use std::future::Future;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use serde::Serialize;
use tokio::io::AsyncWriteExt;

use crate::core::{LoopError, LoopResult};

pub const SPEC_EXTRACTION_FILE: &str = "spec_extraction.json";
pub const REQUIREMENTS_FILE: &str = "requirements.md";
pub const TEST_DESIGN_FILE: &str = "test_design_result.json";
pub const TEST_CASES_FILE: &str = "test_cases.csv";
pub const EXECUTION_RESULTS_FILE: &str = "execution_results.json";
pub const IMPROVEMENT_ANALYSIS_FILE: &str = "improvement_analysis.json";

const EVIDENCE_DIR: &str = "evidence";
const RESULTS_DIR: &str = "test_results";
const MAX_NAME_ATTEMPTS: usize = 100;

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn ensure_root(&self) -> LoopResult<()> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| LoopError::storage(&self.root, e))
    }

    /// 为第 `loop_number` 次迭代分配新目录
    pub async fn allocate(&self, loop_number: usize, now: DateTime<Local>) -> LoopResult<IterationScope> {
        self.ensure_root().await?;
        let base = format!("loop-{:03}_{}", loop_number, now.format("%Y%m%d_%H%M%S"));
        let dir = self
            .create_unique(&base, |name| self.root.join(name), |p| async move {
                tokio::fs::create_dir(&p).await
            })
            .await?;

        for sub in [EVIDENCE_DIR, RESULTS_DIR] {
            let path = dir.join(sub);
            tokio::fs::create_dir(&path)
                .await
                .map_err(|e| LoopError::storage(&path, e))?;
        }
        tracing::debug!(dir = %dir.display(), "iteration scope allocated");
        Ok(IterationScope { dir })
    }

    /// 写入运行级最终报告 `final_report_{YYYYmmdd_HHMMSS}.json`
    pub async fn write_report<T: Serialize>(&self, report: &T, now: DateTime<Local>) -> LoopResult<PathBuf> {
        self.ensure_root().await?;
        let json = serde_json::to_string_pretty(report)?;
        let base = format!("final_report_{}", now.format("%Y%m%d_%H%M%S"));
        self.create_unique(
            &base,
            |name| self.root.join(format!("{}.json", name)),
            |p| {
                let bytes = json.clone().into_bytes();
                async move {
                    let mut file = tokio::fs::OpenOptions::new()
                        .write(true)
                        .create_new(true)
                        .open(&p)
                        .await?;
                    file.write_all(&bytes).await?;
                    file.flush().await
                }
            },
        )
        .await
    }

    /// 依次尝试 `base`、`base_2`、`base_3`…，直到 `create` 不再报 AlreadyExists
    async fn create_unique<P, C, F>(&self, base: &str, path_for: P, create: C) -> LoopResult<PathBuf>
    where
        P: Fn(&str) -> PathBuf,
        C: Fn(PathBuf) -> F,
        F: Future<Output = std::io::Result<()>>,
    {
        for attempt in 1..=MAX_NAME_ATTEMPTS {
            let name = if attempt == 1 {
                base.to_string()
            } else {
                format!("{}_{}", base, attempt)
            };
            let path = path_for(&name);
            match create(path.clone()).await {
                Ok(()) => return Ok(path),
                Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(LoopError::storage(path, e)),
            }
        }
        Err(LoopError::storage(
            path_for(base),
            std::io::Error::new(ErrorKind::AlreadyExists, "no free name left"),
        ))
    }
}

/// 单次迭代的存储作用域
#[derive(Debug, Clone)]
pub struct IterationScope {
    dir: PathBuf,
}

impl IterationScope {
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    pub fn results_dir(&self) -> PathBuf {
        self.dir.join(RESULTS_DIR)
    }

    pub async fn write_json<T: Serialize>(&self, name: &str, value: &T) -> LoopResult<PathBuf> {
        let json = serde_json::to_string_pretty(value)?;
        self.write_text(name, &json).await
    }

    pub async fn write_text(&self, name: &str, text: &str) -> LoopResult<PathBuf> {
        let path = self.path(name);
        tokio::fs::write(&path, text)
            .await
            .map_err(|e| LoopError::storage(&path, e))?;
        Ok(path)
    }
}
