//! 通过/失败判定来源
//!
//! 本系统不做真实浏览器自动化：步骤与用例的判定来自 OutcomeSimulator。
//! 默认实现是带固定失败概率的伪随机数（可设种子复现），仅用于让下游流程跑通与演示。

use std::collections::HashSet;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::model::TestCase;

pub trait OutcomeSimulator: Send {
    /// 回退模拟执行：整个用例是否通过
    fn case_passes(&mut self, case: &TestCase) -> bool;

    /// 协作执行服务驱动步骤时：单步是否通过
    fn step_passes(&mut self, case: &TestCase, step_index: usize) -> bool;
}

/// 伪随机判定
pub struct RandomSimulator {
    rng: StdRng,
    case_failure_rate: f64,
    step_failure_rate: f64,
}

impl RandomSimulator {
    pub fn new(seed: Option<u64>, case_failure_rate: f64, step_failure_rate: f64) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            rng,
            case_failure_rate: bounded_rate(case_failure_rate),
            step_failure_rate: bounded_rate(step_failure_rate),
        }
    }
}

/// 截断到 [0, 1]；NaN 视为从不失败（gen_bool 对 NaN 会 panic）
fn bounded_rate(rate: f64) -> f64 {
    if rate.is_nan() {
        tracing::warn!("failure rate is NaN, treating it as 0");
        0.0
    } else {
        rate.clamp(0.0, 1.0)
    }
}

impl OutcomeSimulator for RandomSimulator {
    fn case_passes(&mut self, _case: &TestCase) -> bool {
        !self.rng.gen_bool(self.case_failure_rate)
    }

    fn step_passes(&mut self, _case: &TestCase, _step_index: usize) -> bool {
        !self.rng.gen_bool(self.step_failure_rate)
    }
}

/// 脚本化判定：列出的用例 / 步骤失败，其余通过。用于回放与测试
#[derive(Debug, Clone, Default)]
pub struct ScriptedSimulator {
    failing_cases: HashSet<String>,
    failing_steps: HashSet<(String, usize)>,
}

impl ScriptedSimulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_case(mut self, case_id: impl Into<String>) -> Self {
        self.failing_cases.insert(case_id.into());
        self
    }

    pub fn fail_step(mut self, case_id: impl Into<String>, step_index: usize) -> Self {
        self.failing_steps.insert((case_id.into(), step_index));
        self
    }
}

impl OutcomeSimulator for ScriptedSimulator {
    fn case_passes(&mut self, case: &TestCase) -> bool {
        !self.failing_cases.contains(&case.id)
    }

    fn step_passes(&mut self, case: &TestCase, step_index: usize) -> bool {
        !self.failing_cases.contains(&case.id)
            && !self.failing_steps.contains(&(case.id.clone(), step_index))
    }
}
