use crate::app::CliApp;
use crate::utils::confirm;
use stack_core::{
    Result,
    error::exit_code,
    groups::{ResolvedTarget, TargetKind},
    service_group::{GroupOutcome, RemovalApproval},
};
use tracing::{error, info, warn};

pub async fn start_group(app: &CliApp, group: &str) -> Result<i32> {
    let target = resolve(app, group)?;
    info!("▶️  启动 {}", describe(&target));
    finish(app.group_manager.start(&target).await)
}

pub async fn stop_group(app: &CliApp, group: &str) -> Result<i32> {
    let target = resolve(app, group)?;
    info!("⏹️  停止 {}", describe(&target));
    finish(app.group_manager.stop(&target).await)
}

pub async fn restart_group(app: &CliApp, group: &str) -> Result<i32> {
    let target = resolve(app, group)?;
    info!("🔄 重启 {}", describe(&target));
    finish(app.group_manager.restart(&target).await)
}

/// 删除容器；没有 --force 时交互确认
pub async fn remove_group(app: &CliApp, group: &str, force: bool) -> Result<i32> {
    let target = resolve(app, group)?;
    info!("🗑️  删除 {}", describe(&target));

    let approval = if force {
        RemovalApproval::Forced
    } else {
        info!("   将删除以下服务的容器: {}", target.services().join(", "));
        info!("   持久化数据卷和备份不受影响");
        if confirm("确认删除？")? {
            RemovalApproval::Confirmed
        } else {
            warn!("❌ 用户取消删除");
            RemovalApproval::Missing
        }
    };

    finish(app.group_manager.remove(&target, approval).await?)
}

pub async fn scale_service(app: &CliApp, service: &str, replicas: u32) -> Result<i32> {
    info!("📐 调整 {} 的副本数为 {}", service, replicas);
    app.group_manager.scale(service, replicas).await?;
    info!("✅ 已调整");
    Ok(exit_code::SUCCESS)
}

fn resolve(app: &CliApp, tag: &str) -> Result<ResolvedTarget> {
    app.group_manager.resolve(tag).inspect_err(|_| {
        let registry = app.group_manager.registry();
        info!("💡 可用分组: {}", registry.group_names().join(", "));
        for (alias, group) in registry.aliases() {
            info!("   {} → {}", alias, group);
        }
    })
}

fn describe(target: &ResolvedTarget) -> String {
    match target.kind {
        TargetKind::Service | TargetKind::Literal => format!("服务 {}", target.tag),
        TargetKind::All | TargetKind::Group => format!(
            "分组 {} ({} 个服务)",
            target.tag,
            target.len()
        ),
    }
}

/// 打印每个成员的结果，有失败时返回 PartialFailure
fn finish(outcome: GroupOutcome) -> Result<i32> {
    for member in &outcome.members {
        match &member.error {
            None => info!("   ✅ {} ({} ms)", member.service, member.elapsed_ms),
            Some(reason) => error!("   ❌ {}: {}", member.service, reason),
        }
    }

    let operation = outcome.operation.display_name();
    let total = outcome.members.len();
    let outcome = outcome.into_result()?;
    info!("✅ {}完成: {}/{}", operation, outcome.succeeded().len(), total);
    Ok(exit_code::SUCCESS)
}
