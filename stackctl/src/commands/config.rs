use crate::app::CliApp;
use stack_core::{Result, env_check::check_env};
use std::path::Path;
use tracing::{error, info, warn};

/// 检查部署环境变量文件；错误返回 FAILED，只有警告返回 ATTENTION
pub fn run_validate_config(app: &CliApp) -> Result<i32> {
    info!("🔍 校验部署配置");
    let report = check_env(
        &app.config.env_check,
        Path::new(&app.config.backup.config_root),
        Path::new(&app.config.docker.compose_file),
    )?;
    info!("   环境变量文件: {}", report.env_file.display());
    info!("   Compose 文件: {}", report.compose_file.display());

    let label = |key: &Option<String>| key.as_deref().map(|k| format!("[{k}] ")).unwrap_or_default();
    let errors: Vec<_> = report.errors().collect();
    let warnings: Vec<_> = report.warnings().collect();

    if !errors.is_empty() {
        error!("❌ 发现 {} 个错误:", errors.len());
        for issue in &errors {
            error!("   - {}{}", label(&issue.key), issue.message);
        }
    }
    if !warnings.is_empty() {
        warn!("⚠️  发现 {} 个警告:", warnings.len());
        for issue in &warnings {
            warn!("   - {}{}", label(&issue.key), issue.message);
        }
    }
    if report.issues.is_empty() {
        info!("✅ 所有检查通过");
    }

    Ok(report.exit_code())
}
