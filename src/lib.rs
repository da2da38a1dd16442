//! testloop - Web 应用自动化测试迭代循环
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 致命错误类型、中断与清理
//! - **llm**: 分析后端客户端抽象与实现（OpenAI 兼容 / Mock）
//! - **model**: 规格、用例、执行结果、改进分析、迭代记录
//! - **spec**: 规格提取与六段式规格文档
//! - **integration**: 协作服务探测、适配器、本地回退、自动启动
//! - **execution**: 人工参与式执行状态机与执行存储
//! - **analysis**: 改进分析
//! - **orchestrator**: 迭代循环、继续判定、产物存储、最终报告
//! - **runner**: 运行入口

pub mod analysis;
pub mod config;
pub mod core;
pub mod execution;
pub mod integration;
pub mod llm;
pub mod model;
pub mod observability;
pub mod orchestrator;
pub mod runner;
pub mod spec;

pub use orchestrator::{FinalReport, LoopOrchestrator};
pub use runner::{run, RunOutcome};
