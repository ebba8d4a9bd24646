//! 在临时目录中搭建一套小型部署：配置文件、数据卷、备份目录

use super::mock_orchestrator::MockOrchestrator;
use stack_core::backup::{BackupManager, BackupRecord};
use stack_core::config::{AppConfig, BackupConfig, GroupsConfig, RetentionConfig, VolumeConfig};
use stack_core::container::Orchestrator;
use stack_core::groups::ServiceGroupRegistry;
use stack_core::health::{Probe, ServiceDescriptor};
use stack_core::rollback::RollbackOrchestrator;
use stack_core::service_group::ServiceGroupManager;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

pub const INFRA: [&str; 2] = ["mysql", "redis"];
pub const PLATFORM: [&str; 2] = ["agent-core", "agent-workflow"];
pub const PROXY: [&str; 1] = ["nginx"];

pub fn all_services() -> Vec<&'static str> {
    INFRA.iter().chain(PLATFORM.iter()).chain(PROXY.iter()).copied().collect()
}

pub struct TestStack {
    pub dir: TempDir,
    pub config: AppConfig,
}

impl TestStack {
    pub fn new() -> Self {
        let dir = TempDir::new().expect("创建临时目录失败");
        let root = dir.path();

        let config_root = root.join("docker");
        fs::create_dir_all(config_root.join("config")).unwrap();
        fs::write(config_root.join("docker-compose.yml"), "services:\n  mysql:\n    image: mysql:8.4\n").unwrap();
        fs::write(config_root.join(".env"), "MYSQL_ROOT_PASSWORD=root\nREDIS_PORT=6379\n").unwrap();
        fs::write(config_root.join("config/nginx.conf"), "upstream agent { server agent-core:8000; }\n").unwrap();

        for (volume, file, content) in [
            ("mysql", "ibdata1", "mysql pages v1"),
            ("redis", "dump.rdb", "REDIS0011 v1"),
        ] {
            let path = root.join("data").join(volume);
            fs::create_dir_all(&path).unwrap();
            fs::write(path.join(file), content).unwrap();
        }

        let path_str = |p: PathBuf| p.to_string_lossy().to_string();
        let mut config = AppConfig::default();
        config.backup = BackupConfig {
            storage_dir: path_str(root.join("backups")),
            config_root: path_str(config_root.clone()),
            config_files: vec![
                "docker-compose.yml".to_string(),
                ".env".to_string(),
                "config".to_string(),
            ],
            safety_dir: path_str(root.join("backups/.rollback-safety")),
            compression_level: 1,
            volumes: vec![
                VolumeConfig::new("mysql-data", path_str(root.join("data/mysql"))),
                VolumeConfig::new("redis-data", path_str(root.join("data/redis"))),
            ],
            retention: RetentionConfig::default(),
        };

        let mut members = BTreeMap::new();
        members.insert("infrastructure".to_string(), INFRA.map(String::from).to_vec());
        members.insert("platform-a".to_string(), PLATFORM.map(String::from).to_vec());
        members.insert("proxy".to_string(), PROXY.map(String::from).to_vec());
        let mut aliases = BTreeMap::new();
        aliases.insert("infra".to_string(), "infrastructure".to_string());
        config.groups = GroupsConfig {
            order: vec![
                "infrastructure".to_string(),
                "platform-a".to_string(),
                "proxy".to_string(),
            ],
            allow_unknown_services: false,
            members,
            aliases,
        };

        config.health.services = all_services()
            .into_iter()
            .map(ServiceDescriptor::new)
            .collect();
        config.health.integration = Vec::new();
        config.health.probe_timeout_secs = 1;

        config.rollback.stage_timeout_secs = 30;
        config.rollback.verify_timeout_secs = 2;
        config.rollback.verify_interval_secs = 1;
        config.rollback.stop_grace_secs = 1;
        config.rollback.runs_dir = path_str(root.join("backups/.rollback-runs"));

        config.validate().expect("测试配置无效");
        Self { dir, config }
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn config_root(&self) -> PathBuf {
        self.root().join("docker")
    }

    pub fn volume_dir(&self, volume: &str) -> PathBuf {
        self.root().join("data").join(volume)
    }

    pub fn backups(&self) -> BackupManager {
        BackupManager::new(&self.config.backup).unwrap()
    }

    pub fn group_manager(&self, mock: &Arc<MockOrchestrator>) -> ServiceGroupManager {
        let orchestrator: Arc<dyn Orchestrator> = mock.clone();
        ServiceGroupManager::new(orchestrator, ServiceGroupRegistry::from_config(&self.config))
            .with_concurrency(2)
    }

    pub fn rollback(&self, mock: &Arc<MockOrchestrator>) -> RollbackOrchestrator {
        RollbackOrchestrator::new(
            self.backups(),
            self.group_manager(mock),
            self.config.rollback.clone(),
        )
    }

    /// 给服务配置 HTTP 探测
    pub fn with_http_probe(mut self, service: &str, url: String) -> Self {
        if let Some(d) = self.config.health.services.iter_mut().find(|d| d.name == service) {
            d.probe = Some(Probe::Http(url));
        }
        self
    }

    /// 把备份改名为固定ID，同步修改元数据
    pub fn pin_backup_id(&self, record: &BackupRecord, id: &str) -> String {
        let backups = self.backups();
        let from = backups.backup_dir(&record.id);
        let to = backups.backup_dir(id);
        fs::rename(&from, &to).unwrap();

        let metadata = to.join("metadata.json");
        let mut value: serde_json::Value =
            serde_json::from_slice(&fs::read(&metadata).unwrap()).unwrap();
        value["id"] = serde_json::Value::String(id.to_string());
        fs::write(&metadata, serde_json::to_vec_pretty(&value).unwrap()).unwrap();
        id.to_string()
    }

    pub fn corrupt_volume_archive(&self, backup_id: &str, volume: &str) {
        let path = self
            .backups()
            .backup_dir(backup_id)
            .join("volumes")
            .join(format!("{volume}.tar.gz"));
        fs::write(path, b"\x1f\x8b not really gzip").unwrap();
    }
}
