//! 循环错误类型
//!
//! 只有「迭代内部的意外失败」会以 LoopError 形式越过阶段边界；
//! 协作服务不可达、响应格式错误等都在调用点转为回退，不会出现在这里。

use std::path::PathBuf;

use thiserror::Error;

/// 致命错误：终止整个循环，但已完成的迭代仍会进入最终报告
#[derive(Error, Debug)]
pub enum LoopError {
    #[error("Storage error at {path}: {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Tabular export error: {0}")]
    Tabular(#[from] csv::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Cancelled by user")]
    Cancelled,
}

impl LoopError {
    pub fn storage(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Storage {
            path: path.into(),
            source,
        }
    }
}

pub type LoopResult<T> = Result<T, LoopError>;
