//! testloop - Web 应用自动化测试迭代循环
//!
//! 入口：解析参数、加载配置、初始化日志，运行循环并打印摘要。

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use testloop::{config::load_config, core::ShutdownManager, observability, runner, RunOutcome};

#[derive(Parser, Debug)]
#[command(name = "testloop", version, about = "Iterative spec → design → execution → analysis loop for a web application")]
struct Args {
    /// 目标 Web 应用 URL
    #[arg(short = 'u', long)]
    url: String,

    /// 最大迭代次数（覆盖配置中的 loop.max_iterations）
    #[arg(short = 'm', long)]
    max_iterations: Option<usize>,

    /// 额外的配置文件
    #[arg(long, env = "TESTLOOP_CONFIG")]
    config: Option<PathBuf>,

    /// 不自动启动协作服务
    #[arg(long)]
    no_auto_start: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    observability::init();

    let cfg = load_config(args.config.clone()).context("Failed to load configuration")?;
    let max_iterations = args.max_iterations.unwrap_or(cfg.loop_.max_iterations);

    let shutdown = ShutdownManager::new();
    shutdown.install_signal_handlers();

    println!("🔄 Starting test loop for {}", args.url);
    println!("   max iterations: {}  storage: {}", max_iterations, cfg.loop_.storage_root.display());

    let outcome = runner::run(&cfg, &args.url, max_iterations, !args.no_auto_start, &shutdown).await;

    if let Some(report) = outcome.report() {
        println!("\n📈 Loop summary");
        print!("{}", report.render_summary());
    }
    match &outcome {
        RunOutcome::Completed(_) => println!("\n✅ Loop completed"),
        RunOutcome::Cancelled(_) => println!("\n⚠️ Loop cancelled by user; artifacts written so far are kept"),
        RunOutcome::Failed { error, .. } => println!("\n❌ Loop failed: {}", error),
    }

    std::process::exit(outcome.exit_code());
}
