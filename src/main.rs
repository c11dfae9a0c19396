use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use exam_grader::utils::logging;
use exam_grader::{Config, ExamImage, GradingApp, Submission, TaskStatus};
use tracing::info;

/// 多模型试卷批改
#[derive(Debug, Parser)]
#[command(name = "exam_grader", version, about)]
struct Args {
    /// 试卷图片，多页时按顺序上下拼接
    #[arg(required_unless_present = "list_providers")]
    images: Vec<PathBuf>,

    /// 标准答案文件（txt / md / docx）
    #[arg(long)]
    answer: Option<PathBuf>,

    /// 题目数量（指定后跳过结构分析）
    #[arg(long)]
    count: Option<usize>,

    /// 每题默认满分
    #[arg(long)]
    max_score: Option<f64>,

    /// 使用的模型 id，可重复；不指定时使用全部可用模型
    #[arg(long = "provider")]
    providers: Vec<String>,

    /// 列出模型及其可用性后退出
    #[arg(long)]
    list_providers: bool,

    /// 显示详细日志
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    // 加载配置
    let config = Config::load()?;
    logging::init(args.verbose || config.verbose_logging);

    let app = GradingApp::initialize(config).await?;

    if args.list_providers {
        for info in app.list_available_providers() {
            match info.reason_if_unavailable {
                Some(reason) => println!("❌ {:<14} {} ({})", info.id, info.display_name, reason),
                None => println!("✅ {:<14} {}", info.id, info.display_name),
            }
        }
        return Ok(());
    }

    let image = ExamImage::open_pages(&args.images)
        .await
        .context("试卷图片无法读取")?;
    info!("🖼️ 已加载试卷 {} ({}x{})", image.name(), image.width(), image.height());

    let task_id = app
        .submit(Submission {
            image,
            question_count: args.count,
            default_max_score: args.max_score,
            provider_ids: args.providers,
            answer_key_path: args.answer,
        })
        .await;

    let task = app
        .wait_for(&task_id, Duration::from_millis(500))
        .await
        .context("任务状态丢失")?;

    if task.status == TaskStatus::Error {
        bail!("{}", task.error.unwrap_or(task.message));
    }

    let report_path = task.report_path.context("任务未返回报告路径")?;
    print_summary(&report_path)?;
    println!("\n💾 报告: {}", report_path);
    Ok(())
}

/// 按题输出得分
fn print_summary(report_path: &str) -> Result<()> {
    let content = std::fs::read_to_string(report_path)
        .with_context(|| format!("读取报告失败: {}", report_path))?;
    let report: serde_json::Value = serde_json::from_str(&content)?;

    println!("\n{}", "=".repeat(60));
    if let Some(details) = report["details"].as_object() {
        for (id, detail) in details {
            println!(
                "题目 {:<12} {:>5}/{:<5} {}",
                id, detail["final_score"], detail["max_score"], detail["comment"].as_str().unwrap_or("")
            );
        }
    }
    println!("{}", "=".repeat(60));
    println!(
        "总分: {}/{}  正确: {}/{}  得分率: {:.1}%",
        report["total_score"],
        report["max_total_score"],
        report["correct_count"],
        report["total_count"],
        report["accuracy"].as_f64().unwrap_or(0.0) * 100.0
    );
    Ok(())
}
