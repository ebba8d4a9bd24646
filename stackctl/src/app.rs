use stack_core::{
    Result,
    backup::BackupManager,
    config::AppConfig,
    container::{DockerManager, Orchestrator},
    groups::ServiceGroupRegistry,
    health::HealthAggregator,
    rollback::RollbackOrchestrator,
    service_group::ServiceGroupManager,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::cli::{Commands, GroupCommand};
use crate::commands;

/// 由配置装配出的各个管理器
pub struct CliApp {
    pub config: AppConfig,
    pub docker_manager: DockerManager,
    pub backup_manager: BackupManager,
    pub group_manager: ServiceGroupManager,
    pub health: HealthAggregator,
    pub rollback: RollbackOrchestrator,
}

impl CliApp {
    /// 加载配置（显式路径优先，否则自动查找）并初始化
    pub async fn new_with_config(config_path: Option<&Path>) -> Result<Self> {
        let config = AppConfig::find_and_load_config(config_path)?;
        Self::from_config(config)
    }

    pub fn from_config(config: AppConfig) -> Result<Self> {
        config.validate()?;

        let docker_manager = DockerManager::new(&config.docker.compose_file)?
            .with_project_name(config.docker.project_name.clone());
        let orchestrator: Arc<dyn Orchestrator> = Arc::new(docker_manager.clone());

        let backup_manager = BackupManager::new(&config.backup)?;
        let group_manager = ServiceGroupManager::new(
            Arc::clone(&orchestrator),
            ServiceGroupRegistry::from_config(&config),
        )
        .with_concurrency(config.health.concurrency)
        .with_stop_grace(Duration::from_secs(config.rollback.stop_grace_secs));
        let health = HealthAggregator::new(orchestrator, config.health.clone())?;
        let rollback = RollbackOrchestrator::new(
            backup_manager.clone(),
            group_manager.clone(),
            config.rollback.clone(),
        );

        debug!(
            "初始化完成: compose={}, 备份目录={}",
            config.docker.compose_file, config.backup.storage_dir
        );

        Ok(Self {
            config,
            docker_manager,
            backup_manager,
            group_manager,
            health,
            rollback,
        })
    }

    /// 运行命令，返回进程退出码
    pub async fn run_command(&self, command: Commands) -> Result<i32> {
        match command {
            Commands::Backup { tag } => commands::run_backup(self, tag.as_deref()).await,
            Commands::ValidateConfig => commands::run_validate_config(self),
            Commands::ListBackups { all, json } => commands::run_list_backups(self, all, json),
            Commands::ValidateBackup { backup_id } => {
                commands::run_validate_backup(self, &backup_id).await
            }
            Commands::PruneBackups { keep, max_age_days } => {
                commands::run_prune_backups(self, keep, max_age_days).await
            }
            Commands::Rollback {
                target,
                yes,
                dry_run,
            } => commands::run_rollback(self, target, yes, dry_run).await,
            Commands::Group(group_cmd) => self.run_group_command(group_cmd).await,
            Commands::Status { json } => commands::run_status(self, json).await,
            Commands::Logs {
                service,
                lines,
                follow,
            } => commands::run_logs(self, service.as_deref(), lines, follow).await,
            Commands::Health {
                sections,
                watch,
                interval,
                json,
            } => {
                if watch {
                    commands::run_health_watch(self, sections, interval, json).await
                } else {
                    commands::run_health(self, sections, json).await
                }
            }
        }
    }

    async fn run_group_command(&self, cmd: GroupCommand) -> Result<i32> {
        match cmd {
            GroupCommand::Start { group } => commands::start_group(self, &group).await,
            GroupCommand::Stop { group } => commands::stop_group(self, &group).await,
            GroupCommand::Restart { group } => commands::restart_group(self, &group).await,
            GroupCommand::Remove { group, force } => {
                commands::remove_group(self, &group, force).await
            }
            GroupCommand::Scale { service, replicas } => {
                commands::scale_service(self, &service, replicas).await
            }
        }
    }
}
