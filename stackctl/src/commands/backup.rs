use crate::app::CliApp;
use crate::utils::{format_bytes, print_json};
use stack_core::{
    Result,
    backup::{BackupRecord, BackupStatus},
    config::RetentionConfig,
    error::exit_code,
};
use tracing::{error, info, warn};

/// 创建备份，可选标签写入元数据
pub async fn run_backup(app: &CliApp, tag: Option<&str>) -> Result<i32> {
    info!("💾 创建备份");
    info!("==========");
    info!("   配置目录: {}", app.backup_manager.get_config_root().display());
    info!("   备份目录: {}", app.backup_manager.get_storage_dir().display());
    if let Some(tag) = tag {
        info!("   标签: {}", tag);
    }

    let record = app.backup_manager.create_tagged_backup(tag).await?;
    show_record(&record);

    match record.effective_status() {
        BackupStatus::Success => {
            info!("✅ 备份创建成功: {}", record.id);
            Ok(exit_code::SUCCESS)
        }
        BackupStatus::Partial => {
            warn!("⚠️  备份部分成功，以下产物采集失败:");
            for failure in &record.failures {
                warn!("   - {}: {}", failure.artifact, failure.reason);
            }
            Ok(exit_code::ATTENTION)
        }
        _ => {
            error!("❌ 备份失败: {}", record.id);
            for failure in &record.failures {
                error!("   - {}: {}", failure.artifact, failure.reason);
            }
            Ok(exit_code::FAILED)
        }
    }
}

/// 列出备份
pub fn run_list_backups(app: &CliApp, all: bool, json: bool) -> Result<i32> {
    let listing = if all {
        app.backup_manager.list_all_backups()?
    } else {
        app.backup_manager.list_backups()?
    };

    if json {
        let records: Vec<BackupRecord> = listing.iter().collect();
        print_json(&records)?;
        return Ok(exit_code::SUCCESS);
    }

    info!("📦 备份列表 ({})", app.backup_manager.get_storage_dir().display());
    let mut count = 0;
    for record in listing.iter() {
        count += 1;
        info!(
            "   {} {}  {:>10}  {}  {}{}",
            status_icon(record.effective_status()),
            record.id,
            format_bytes(record.size_bytes),
            record.effective_status().display_name(),
            record.artifact_names().join(", "),
            record
                .source
                .tag
                .as_deref()
                .map(|t| format!("  [{t}]"))
                .unwrap_or_default()
        );
    }

    if count == 0 {
        info!("   (没有备份)");
        info!("💡 使用 'stackctl backup' 创建第一个备份");
    } else if !all && listing.candidate_count() > count {
        info!(
            "💡 另有 {} 个失败或中断的备份，使用 --all 查看",
            listing.candidate_count() - count
        );
    }

    Ok(exit_code::SUCCESS)
}

/// 校验备份完整性
pub async fn run_validate_backup(app: &CliApp, backup_id: &str) -> Result<i32> {
    info!("🔍 校验备份: {}", backup_id);
    let report = app.backup_manager.validate_backup(backup_id).await?;

    if report.issues.is_empty() {
        info!("✅ 备份完整，可以用于回滚");
        return Ok(exit_code::SUCCESS);
    }

    for issue in report.problems() {
        error!(
            "   ❌ {}{}",
            issue.artifact.as_deref().map(|a| format!("[{a}] ")).unwrap_or_default(),
            issue.message
        );
    }
    for issue in report.warnings() {
        warn!(
            "   ⚠️  {}{}",
            issue.artifact.as_deref().map(|a| format!("[{a}] ")).unwrap_or_default(),
            issue.message
        );
    }

    if !report.passed() {
        error!("❌ 备份不可用");
        return Ok(exit_code::FAILED);
    }

    let damaged = report.damaged_artifacts();
    if damaged.is_empty() {
        info!("✅ 备份可用（有 {} 条提示）", report.warnings().len());
    } else {
        warn!("⚠️  备份可用，但回滚时将跳过: {}", damaged.join(", "));
    }
    Ok(exit_code::ATTENTION)
}

/// 按保留策略清理备份；命令行参数优先于配置文件
pub async fn run_prune_backups(
    app: &CliApp,
    keep: Option<usize>,
    max_age_days: Option<u64>,
) -> Result<i32> {
    let policy = if keep.is_some() || max_age_days.is_some() {
        RetentionConfig {
            keep_last: keep,
            max_age_days,
        }
    } else {
        app.config.backup.retention.clone()
    };

    info!(
        "🧹 清理备份 (保留最新: {}, 最长保留天数: {})",
        policy.keep_last.map_or("-".to_string(), |n| n.to_string()),
        policy.max_age_days.map_or("-".to_string(), |d| d.to_string())
    );

    let removed = app.backup_manager.prune_backups(&policy).await?;
    if removed.is_empty() {
        info!("✅ 没有需要清理的备份");
    } else {
        info!("✅ 已清理 {} 个备份:", removed.len());
        for id in &removed {
            info!("   - {}", id);
        }
    }
    Ok(exit_code::SUCCESS)
}

fn show_record(record: &BackupRecord) {
    match &record.source.tag {
        Some(tag) => info!("📋 备份 {} [{}]", record.id, tag),
        None => info!("📋 备份 {}", record.id),
    }
    for artifact in &record.artifacts {
        info!(
            "   - {} ({}) {}",
            artifact.name,
            format_bytes(artifact.size_bytes),
            artifact.file
        );
    }
    if let Some(commit) = &record.source.git_commit {
        info!(
            "   来源: {}@{}",
            record.source.git_branch.as_deref().unwrap_or("?"),
            commit
        );
    }
    info!("   总大小: {}", format_bytes(record.size_bytes));
}

pub(crate) fn status_icon(status: BackupStatus) -> &'static str {
    match status {
        BackupStatus::Success => "✅",
        BackupStatus::Partial => "⚠️ ",
        BackupStatus::InProgress | BackupStatus::Failed => "❌",
    }
}
