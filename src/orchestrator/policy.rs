//! 继续 / 终止判定
//!
//! 仅依据刚完成的这一轮：失败数为 0 且改进建议数不超过阈值时停止。
//! 最大迭代次数由编排器单独检查。

use crate::model::IterationRecord;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContinuationPolicy {
    pub max_suggestions: usize,
}

impl Default for ContinuationPolicy {
    fn default() -> Self {
        Self { max_suggestions: 1 }
    }
}

impl ContinuationPolicy {
    pub fn new(max_suggestions: usize) -> Self {
        Self { max_suggestions }
    }

    pub fn should_stop(&self, failures: usize, suggestions: usize) -> bool {
        failures == 0 && suggestions <= self.max_suggestions
    }

    pub fn should_stop_after(&self, record: &IterationRecord) -> bool {
        self.should_stop(
            record.failure_count(),
            record.improvement_analysis.improvement_suggestions.len(),
        )
    }
}
