use anyhow::Result;
/// 日志工具模块
///
/// 提供日志初始化、日志文件写入和格式化输出的辅助函数
use std::fs::{self, OpenOptions};
use std::io::Write;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::models::{BatchReport, ItemOutcome};

/// 初始化 tracing 日志
///
/// 优先使用 `RUST_LOG`，否则默认 info；`verbose` 时默认 debug。
/// 重复调用是安全的（测试里会多次调用）。
pub fn init(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// 初始化日志文件
///
/// # 参数
/// - `log_file_path`: 日志文件路径
pub fn init_log_file(log_file_path: &str) -> Result<()> {
    let log_header = format!(
        "{}\n批量注册日志 - {}\n{}\n\n",
        "=".repeat(60),
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
        "=".repeat(60)
    );
    fs::write(log_file_path, log_header)?;
    Ok(())
}

/// 把批次报告追加到日志文件
///
/// # 参数
/// - `log_file_path`: 日志文件路径
/// - `batch_name`: 批次名称
/// - `report`: 批次报告
pub fn append_report(log_file_path: &str, batch_name: &str, report: &BatchReport) -> Result<()> {
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_file_path)?;

    writeln!(file, "批次: {}", batch_name)?;
    writeln!(
        file,
        "总计 {} | 成功 {} | 跳过 {} | 失败 {} | 耗时 {} ms",
        report.total, report.succeeded, report.skipped, report.failed, report.duration_ms
    )?;
    for result in &report.results {
        writeln!(
            file,
            "  #{} {} | {} | 尝试 {} 次 | {}",
            result.index + 1,
            result.item.label,
            result.outcome,
            result.attempts,
            result.diagnostic.as_deref().unwrap_or("-")
        )?;
    }
    if let Some(cutoff) = report.cutoff {
        writeln!(
            file,
            "  ⚠ 批次在第 {} 个条目处终止: {}",
            cutoff.index + 1,
            cutoff.reason
        )?;
    }
    writeln!(file)?;
    Ok(())
}

/// 记录程序启动信息
///
/// # 参数
/// - `max_concurrent`: 高风险操作并发上限
pub fn log_startup(max_concurrent: usize) {
    info!("{}", "=".repeat(60));
    info!("🚀 程序启动 - 批量注册模式");
    info!("📊 高风险操作并发上限: {}", max_concurrent);
    info!("{}", "=".repeat(60));
}

/// 记录批次加载信息
pub fn log_batches_loaded(batches: usize, items: usize) {
    info!("✓ 找到 {} 个待处理的批次，共 {} 个条目", batches, items);
    info!("💡 批次按顺序处理，每个批次复用同一个会话\n");
}

/// 记录批次开始信息
///
/// # 参数
/// - `batch_num`: 批次编号
/// - `total_batches`: 批次总数
/// - `name`: 批次名称
/// - `items`: 条目数
pub fn log_batch_start(batch_num: usize, total_batches: usize, name: &str, items: usize) {
    info!("\n{}", "=".repeat(60));
    info!("📦 开始处理第 {}/{} 批: {}", batch_num, total_batches, name);
    info!("📄 本批条目: {} 个", items);
    info!("{}", "=".repeat(60));
}

/// 记录条目开始处理
pub fn log_item_start(ctx: &impl std::fmt::Display) {
    info!("{} ▶ 开始处理", ctx);
}

/// 记录批次完成信息
pub fn log_batch_complete(batch_num: usize, report: &BatchReport) {
    info!("\n{}", "─".repeat(60));
    info!(
        "✓ 第 {} 批完成: 成功 {} / 跳过 {} / 失败 {} (共 {})",
        batch_num, report.succeeded, report.skipped, report.failed, report.total
    );
    if let Some(cutoff) = report.cutoff {
        warn!(
            "⚠️ 批次提前终止于第 {} 个条目: {}（可从此处续跑）",
            cutoff.index + 1,
            cutoff.reason
        );
    }
    info!("{}", "─".repeat(60));
}

/// 打印单个批次的逐条结果
pub fn print_report_details(report: &BatchReport) {
    for result in &report.results {
        let icon = match result.outcome {
            ItemOutcome::Success => "✅",
            ItemOutcome::Duplicate => "⏭️",
            ItemOutcome::Error => "❌",
        };
        info!(
            "{} #{} {} - {} (尝试 {} 次, {} ms){}",
            icon,
            result.index + 1,
            truncate_text(&result.item.label, 30),
            result.outcome,
            result.attempts,
            result.elapsed_ms,
            result
                .diagnostic
                .as_deref()
                .map(|d| format!(" | {}", truncate_text(d, 80)))
                .unwrap_or_default()
        );
    }
}

/// 打印最终统计信息
///
/// # 参数
/// - `succeeded`: 成功数量
/// - `skipped`: 跳过数量
/// - `failed`: 失败数量
/// - `total`: 总数
/// - `log_file_path`: 日志文件路径
pub fn print_final_stats(
    succeeded: usize,
    skipped: usize,
    failed: usize,
    total: usize,
    log_file_path: &str,
) {
    info!("\n{}", "=".repeat(60));
    info!("📊 全部处理完成统计");
    info!(
        "完成时间: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    info!("{}", "=".repeat(60));
    info!("✅ 成功: {}/{}", succeeded, total);
    info!("⏭️ 跳过: {}", skipped);
    info!("❌ 失败: {}", failed);
    info!("{}", "=".repeat(60));
    info!("\n日志已保存至: {}", log_file_path);
}

/// 截断长文本用于日志显示
///
/// # 参数
/// - `text`: 原始文本
/// - `max_len`: 最大长度
///
/// # 返回
/// 返回截断后的文本
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() > max_len {
        text.chars().take(max_len).collect::<String>() + "..."
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Item, ItemResult};
    use std::time::Duration;

    #[test]
    fn test_truncate_text_counts_chars() {
        assert_eq!(truncate_text("注册成功", 2), "注册...");
        assert_eq!(truncate_text("ok", 5), "ok");
    }

    #[test]
    fn test_append_report_writes_each_item() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("output.txt");
        let path = path.to_str().unwrap();
        init_log_file(path).unwrap();

        let mut report = BatchReport::new(1);
        report.push(
            ItemResult::new(
                0,
                Item::new("张三"),
                ItemOutcome::Duplicate,
                1,
                Duration::from_millis(3),
            )
            .with_diagnostic("用户已存在"),
        );
        append_report(path, "春季注册", &report).unwrap();

        let content = std::fs::read_to_string(path).unwrap();
        assert!(content.contains("批次: 春季注册"));
        assert!(content.contains("张三"));
        assert!(content.contains("用户已存在"));
    }
}
