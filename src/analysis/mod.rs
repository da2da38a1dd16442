//! 改进分析：失败提取、证据收集、改进建议与下一轮计划

pub mod analyzer;

pub use analyzer::{AnalysisError, ImprovementAnalyzer};
