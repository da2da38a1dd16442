//! 协作服务调用错误
//!
//! 所有远程调用失败（网络、非 2xx、格式错误、服务自报失败）都落到 IntegrationError，
//! 调用方只按 Ok / Err 分支，从不区分底层异常类型。

use thiserror::Error;

use crate::integration::payload::PayloadError;

#[derive(Error, Debug)]
pub enum IntegrationError {
    #[error("Request failed: {0}")]
    Network(String),

    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Malformed payload: {0}")]
    Payload(#[from] PayloadError),

    /// 服务返回了结构正确但 success=false 的响应
    #[error("Collaborator rejected request: {0}")]
    Rejected(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Tabular data error: {0}")]
    Tabular(#[from] csv::Error),
}

impl From<reqwest::Error> for IntegrationError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            IntegrationError::Network(format!("timeout: {}", e))
        } else {
            IntegrationError::Network(e.to_string())
        }
    }
}
