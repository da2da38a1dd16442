//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `TESTLOOP__*` 覆盖（双下划线表示嵌套，如 `TESTLOOP__LOOP__MAX_ITERATIONS=3`）。

use std::path::PathBuf;

use serde::Deserialize;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    #[serde(rename = "loop")]
    pub loop_: LoopSection,
    pub services: ServicesSection,
    pub llm: LlmSection,
}

/// 单个测试步骤失败后的处理策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StepFailurePolicy {
    /// 继续执行剩余步骤，全部步骤结束后再判定用例失败
    #[default]
    Continue,
    /// 首个失败步骤后立即终止该用例
    Abort,
}

/// [loop] 段：迭代次数、间隔、存储目录、继续判定阈值、模拟参数
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoopSection {
    pub max_iterations: usize,
    /// 两次迭代之间的固定等待（毫秒），用于对协作服务限流
    pub iteration_delay_ms: u64,
    pub storage_root: PathBuf,
    /// 失败数为 0 且改进建议数不超过该值时停止循环
    pub max_suggestions_to_stop: usize,
    pub step_failure_policy: StepFailurePolicy,
    /// 回退模拟执行时单个用例的失败概率
    pub simulated_case_failure_rate: f64,
    /// 协作执行服务驱动步骤时单步失败概率
    pub simulated_step_failure_rate: f64,
    /// 固定随机种子；未设置时每次运行结果不同
    pub rng_seed: Option<u64>,
}

impl LoopSection {
    /// 失败概率必须是 [0, 1] 内的有限数
    pub fn validate(&self) -> Result<(), String> {
        for (key, rate) in [
            ("loop.simulated_case_failure_rate", self.simulated_case_failure_rate),
            ("loop.simulated_step_failure_rate", self.simulated_step_failure_rate),
        ] {
            if !(0.0..=1.0).contains(&rate) {
                return Err(format!("{} must be between 0 and 1, got {}", key, rate));
            }
        }
        Ok(())
    }
}

impl Default for LoopSection {
    fn default() -> Self {
        Self {
            max_iterations: 5,
            iteration_delay_ms: 2000,
            storage_root: PathBuf::from("loops"),
            max_suggestions_to_stop: 1,
            step_failure_policy: StepFailurePolicy::Continue,
            simulated_case_failure_rate: 0.3,
            simulated_step_failure_rate: 0.2,
            rng_seed: None,
        }
    }
}

/// [services] 段：两个协作服务与分析后端的地址、超时、自动启动命令
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServicesSection {
    pub design_url: String,
    pub execution_url: String,
    /// 分析后端（LLM）健康检查地址
    pub analysis_url: String,
    pub probe_timeout_secs: u64,
    pub request_timeout_secs: u64,
    /// 测试设计较慢，单独给一个更长的超时
    pub design_timeout_secs: u64,
    pub execution_style: String,
    /// 自动启动设计服务的命令（argv），为空则不启动
    pub design_command: Vec<String>,
    pub execution_command: Vec<String>,
    pub startup_wait_secs: u64,
}

impl Default for ServicesSection {
    fn default() -> Self {
        Self {
            design_url: "http://localhost:5003".to_string(),
            execution_url: "http://localhost:5001".to_string(),
            analysis_url: "http://localhost:11434/api/tags".to_string(),
            probe_timeout_secs: 10,
            request_timeout_secs: 30,
            design_timeout_secs: 60,
            execution_style: "Semi-Automated BDD".to_string(),
            design_command: Vec::new(),
            execution_command: Vec::new(),
            startup_wait_secs: 30,
        }
    }
}

/// [llm] 段：分析后端选择与超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmSection {
    /// 后端：openai（任意 OpenAI 兼容端点，如 Ollama）/ mock / none
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    pub timeout_secs: u64,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "llama3.2".to_string(),
            base_url: Some("http://localhost:11434/v1".to_string()),
            timeout_secs: 60,
        }
    }
}

/// 从 config 目录加载配置，环境变量 TESTLOOP__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 TESTLOOP__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    for name in ["config/default", "default"] {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("TESTLOOP")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    let cfg: AppConfig = c.try_deserialize()?;
    cfg.loop_.validate().map_err(config::ConfigError::Message)?;
    Ok(cfg)
}
