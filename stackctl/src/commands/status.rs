use crate::app::CliApp;
use crate::commands::backup::status_icon;
use crate::utils::{format_bytes, print_json};
use serde::Serialize;
use stack_core::{
    Result,
    backup::BackupRecord,
    container::{ContainerState, Orchestrator},
    error::exit_code,
    rollback::{RollbackRun, list_runs},
};
use std::path::Path;
use tracing::{info, warn};

/// status 命令的完整快照，也是 --json 的输出格式
#[derive(Debug, Serialize)]
struct StatusReport {
    version: &'static str,
    compose_file: String,
    compose_file_exists: bool,
    containers: Vec<ContainerState>,
    container_error: Option<String>,
    /// compose 中声明但没有容器的常驻服务
    missing_services: Vec<String>,
    backup_count: usize,
    latest_backup: Option<BackupRecord>,
    last_rollback: Option<RollbackRun>,
}

pub async fn run_status(app: &CliApp, json: bool) -> Result<i32> {
    let report = collect(app).await?;

    if json {
        print_json(&report)?;
    } else {
        show(&report);
    }
    Ok(exit_code::SUCCESS)
}

async fn collect(app: &CliApp) -> Result<StatusReport> {
    let compose_file_exists = app.docker_manager.compose_file_exists();
    let (containers, container_error) = if compose_file_exists {
        match app.docker_manager.list_containers().await {
            Ok(containers) => (containers, None),
            Err(e) => (Vec::new(), Some(e.to_string())),
        }
    } else {
        (Vec::new(), Some("Docker Compose 文件不存在".to_string()))
    };

    let missing_services = if container_error.is_none() {
        missing_services(app, &containers).await
    } else {
        Vec::new()
    };

    let listing = app.backup_manager.list_backups()?;
    let backup_count = listing.iter().count();
    let latest_backup = listing.iter().next();

    // 运行记录读取失败不影响状态展示
    let last_rollback = list_runs(Path::new(&app.config.rollback.runs_dir))
        .unwrap_or_default()
        .into_iter()
        .next();

    Ok(StatusReport {
        version: env!("CARGO_PKG_VERSION"),
        compose_file: app.config.docker.compose_file.clone(),
        compose_file_exists,
        containers,
        container_error,
        missing_services,
        backup_count,
        latest_backup,
        last_rollback,
    })
}

async fn missing_services(app: &CliApp, containers: &[ContainerState]) -> Vec<String> {
    let compose = match app.docker_manager.read_compose_file().await {
        Ok(compose) => compose,
        Err(e) => {
            warn!("无法解析 compose 文件: {}", e);
            return Vec::new();
        }
    };

    compose
        .services
        .into_iter()
        .filter(|(name, service)| {
            !service.is_oneshot() && !containers.iter().any(|c| &c.service == name)
        })
        .map(|(name, _)| name)
        .collect()
}

fn show(report: &StatusReport) {
    info!("📊 stackctl 状态");
    info!("================");
    info!("   版本: v{}", report.version);
    if report.compose_file_exists {
        info!("   ✅ Docker Compose 文件: {}", report.compose_file);
    } else {
        info!("   ❌ Docker Compose 文件: {} (不存在)", report.compose_file);
    }

    info!("🐳 容器:");
    if let Some(e) = &report.container_error {
        warn!("   ⚠️  无法获取容器状态: {}", e);
    } else if report.containers.is_empty() {
        info!("   (没有容器)");
    } else {
        let running = report.containers.iter().filter(|c| c.is_running()).count();
        for container in &report.containers {
            let icon = if container.is_running() { "🟢" } else { "🔴" };
            info!(
                "   {} {:<28} {:<10} {}",
                icon,
                container.service,
                container.run_state().display_name(),
                container.status
            );
        }
        info!("   运行中: {}/{}", running, report.containers.len());
    }
    if !report.missing_services.is_empty() {
        warn!("   ⚠️  未创建容器: {}", report.missing_services.join(", "));
    }

    info!("💾 备份: {} 个可用", report.backup_count);
    match &report.latest_backup {
        Some(record) => info!(
            "   最新: {} {} ({}, {})",
            status_icon(record.effective_status()),
            record.id,
            record.effective_status().display_name(),
            format_bytes(record.size_bytes)
        ),
        None => info!("   💡 还没有备份，建议执行 'stackctl backup'"),
    }

    if let Some(run) = &report.last_rollback {
        info!("🔄 最近一次回滚:");
        info!(
            "   {} 备份 {}: {}",
            run.started_at.format("%Y-%m-%d %H:%M:%S"),
            run.backup_id,
            run.outcome.display_name()
        );
    }
}
