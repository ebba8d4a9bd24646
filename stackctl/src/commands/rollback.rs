use crate::app::CliApp;
use crate::cli::RollbackTarget;
use crate::utils::confirm;
use stack_core::{
    Result, StackError,
    error::exit_code,
    groups::Tier,
    rollback::{RollbackPlan, RollbackRun, StageStatus, list_runs},
};
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// 从备份回滚
pub async fn run_rollback(
    app: &CliApp,
    target: RollbackTarget,
    yes: bool,
    dry_run: bool,
) -> Result<i32> {
    if target.list {
        return show_runs(app);
    }

    let backup_id = match (target.backup_id, target.latest) {
        (Some(id), _) => id,
        (None, true) => match app.backup_manager.latest_backup()? {
            Some(record) => {
                info!("使用最新备份: {}", record.id);
                record.id
            }
            None => return Err(StackError::precondition("没有可用的备份")),
        },
        (None, false) => {
            return Err(StackError::precondition(
                "需要指定备份ID，或使用 --latest / --list",
            ));
        }
    };

    info!("🔄 回滚到备份: {}", backup_id);
    info!("================================");

    let plan = app.rollback.plan(&backup_id).await?;
    show_plan(&plan);

    if dry_run {
        info!("🧪 试运行结束，没有做任何修改");
        return Ok(exit_code::SUCCESS);
    }

    if !yes {
        warn!("⚠️  回滚会停止所有服务并覆盖当前配置和数据卷");
        if !confirm("确认回滚？")? {
            warn!("❌ 用户取消回滚");
            return Err(StackError::precondition("用户取消回滚"));
        }
    }

    let cancel = CancellationToken::new();
    let signal_token = cancel.clone();
    let signal_task = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("收到中断信号，停止服务之前将取消回滚，之后的中断会被忽略");
            signal_token.cancel();
        }
    });

    let run = app.rollback.execute(&backup_id, &cancel).await;
    signal_task.abort();

    show_run(&run);
    run.into_result().map(|_| exit_code::SUCCESS)
}

fn show_plan(plan: &RollbackPlan) {
    info!("📋 执行计划");
    info!(
        "   备份: {} ({}, 创建于 {})",
        plan.backup.id,
        plan.backup.effective_status().display_name(),
        plan.backup.created_at.format("%Y-%m-%d %H:%M:%S")
    );
    info!("   停止顺序: {}", format_tiers(&plan.stop_order));
    info!("   恢复配置: {}", plan.backup.config_artifact().is_some());
    if !plan.volumes_to_restore.is_empty() {
        info!("   恢复数据卷: {}", plan.volumes_to_restore.join(", "));
    }
    if !plan.volumes_skipped.is_empty() {
        warn!("   ⚠️  跳过损坏的数据卷: {}", plan.volumes_skipped.join(", "));
    }
    info!("   启动顺序: {}", format_tiers(&plan.start_order));
    info!("   验证: 至少 {} 个服务进入运行状态", plan.required_running);

    for issue in plan.report.warnings() {
        warn!("   ⚠️  {}", issue.message);
    }
}

fn format_tiers(tiers: &[Tier]) -> String {
    tiers
        .iter()
        .map(|t| format!("{}[{}]", t.group, t.services.join(" ")))
        .collect::<Vec<_>>()
        .join(" → ")
}

fn show_run(run: &RollbackRun) {
    info!("📊 回滚结果: {}", run.outcome.display_name());
    for record in &run.stages {
        let icon = match record.status {
            StageStatus::Success => "✅",
            StageStatus::Failed => "❌",
            StageStatus::Skipped => "⏭️ ",
            StageStatus::Pending => "⏸️ ",
        };
        match &record.detail {
            Some(detail) => info!("   {} {}: {}", icon, record.stage.display_name(), detail),
            None => info!("   {} {}", icon, record.stage.display_name()),
        }
        if !record.skipped_artifacts.is_empty() {
            warn!("      跳过: {}", record.skipped_artifacts.join(", "));
        }
    }

    if let Some(safety) = &run.safety_copy {
        info!("   当前配置的安全副本: {}", safety);
    }
    if let Some(log_path) = &run.log_path {
        info!("   运行记录: {}", log_path);
    }
    if let Some(reason) = &run.reason {
        error!("   原因: {}", reason);
        if let Some(stage) = run.furthest_completed() {
            info!("💡 最后完成的阶段: {}，可以从下一阶段手动继续", stage.display_name());
        }
    }
}

fn show_runs(app: &CliApp) -> Result<i32> {
    let runs = list_runs(Path::new(&app.config.rollback.runs_dir))?;
    info!("📜 回滚记录 ({})", app.config.rollback.runs_dir);
    if runs.is_empty() {
        info!("   (没有回滚记录)");
    }
    for run in &runs {
        info!(
            "   {}  备份 {}  {}",
            run.started_at.format("%Y-%m-%d %H:%M:%S"),
            run.backup_id,
            run.outcome.display_name()
        );
    }
    Ok(exit_code::SUCCESS)
}
