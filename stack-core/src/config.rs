use crate::constants::{backup, docker, env, groups, health, timeout};
use crate::error::{Result, StackError};
use crate::health::types::{IntegrationPair, Probe, ServiceDescriptor};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::Path;

/// 配置文件查找顺序
pub const CONFIG_FILE_CANDIDATES: [&str; 3] = ["stackctl.toml", "config.toml", ".stackctl.toml"];

/// 应用配置结构
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub docker: DockerConfig,
    #[serde(default)]
    pub backup: BackupConfig,
    #[serde(default)]
    pub groups: GroupsConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub rollback: RollbackConfig,
    #[serde(default)]
    pub env_check: EnvCheckConfig,
}

/// Docker相关配置
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DockerConfig {
    pub compose_file: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_name: Option<String>,
}

impl Default for DockerConfig {
    fn default() -> Self {
        Self {
            compose_file: docker::get_compose_file_path_str(),
            project_name: None,
        }
    }
}

/// 持久化卷声明
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct VolumeConfig {
    pub name: String,
    pub path: String,
    /// 必需卷缺失时校验报告为问题，非必需卷缺失只警告
    #[serde(default = "default_true")]
    pub required: bool,
}

impl VolumeConfig {
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            required: true,
        }
    }
}

/// 备份保留策略（仅在显式执行清理时生效）
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct RetentionConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keep_last: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_age_days: Option<u64>,
}

/// 备份相关配置
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BackupConfig {
    pub storage_dir: String,
    /// 配置文件所在根目录
    pub config_root: String,
    /// 需要快照的配置文件（相对 config_root，可以是目录）
    pub config_files: Vec<String>,
    /// 回滚前保存当前配置的安全副本目录
    pub safety_dir: String,
    #[serde(default = "default_compression_level")]
    pub compression_level: u32,
    #[serde(default)]
    pub volumes: Vec<VolumeConfig>,
    #[serde(default)]
    pub retention: RetentionConfig,
}

impl Default for BackupConfig {
    fn default() -> Self {
        let data_dir = docker::get_docker_work_dir().join("data");
        let volume = |name: &str| {
            VolumeConfig::new(
                format!("{name}-data"),
                data_dir.join(name).to_string_lossy().to_string(),
            )
        };

        Self {
            storage_dir: backup::get_default_storage_dir()
                .to_string_lossy()
                .to_string(),
            config_root: docker::get_docker_work_dir().to_string_lossy().to_string(),
            config_files: vec![
                docker::COMPOSE_FILE_NAME.to_string(),
                ".env".to_string(),
                "config".to_string(),
            ],
            safety_dir: backup::get_default_safety_dir()
                .to_string_lossy()
                .to_string(),
            compression_level: backup::DEFAULT_COMPRESSION_LEVEL,
            volumes: vec![volume("mysql"), volume("redis"), volume("minio")],
            retention: RetentionConfig::default(),
        }
    }
}

/// 服务分组配置
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GroupsConfig {
    /// `all` 展开时的分层顺序，启动按此顺序，停止按逆序
    pub order: Vec<String>,
    /// 允许把未知分组名当作单个服务名（默认关闭，避免拼写错误被静默接受）
    #[serde(default)]
    pub allow_unknown_services: bool,
    pub members: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub aliases: BTreeMap<String, String>,
}

impl Default for GroupsConfig {
    fn default() -> Self {
        let members = default_topology()
            .into_iter()
            .fold(BTreeMap::new(), |mut acc: BTreeMap<String, Vec<String>>, d| {
                for group in &d.groups {
                    acc.entry(group.clone()).or_default().push(d.name.clone());
                }
                acc
            });

        let mut aliases = BTreeMap::new();
        aliases.insert("infra".to_string(), groups::INFRASTRUCTURE.to_string());
        aliases.insert("agent".to_string(), groups::PLATFORM_A.to_string());
        aliases.insert("rpa".to_string(), groups::PLATFORM_B.to_string());

        Self {
            order: vec![
                groups::INFRASTRUCTURE.to_string(),
                groups::PLATFORM_A.to_string(),
                groups::PLATFORM_B.to_string(),
                groups::PROXY.to_string(),
            ],
            allow_unknown_services: false,
            members,
            aliases,
        }
    }
}

/// 健康检查配置
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct HealthConfig {
    pub probe_timeout_secs: u64,
    pub concurrency: usize,
    /// 不健康服务占比不超过该百分比时整体判定为降级，否则为不健康
    pub degraded_threshold_percent: u8,
    pub error_patterns: Vec<String>,
    pub log_window_minutes: u64,
    #[serde(default)]
    pub services: Vec<ServiceDescriptor>,
    #[serde(default)]
    pub integration: Vec<IntegrationPair>,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            probe_timeout_secs: timeout::PROBE_TIMEOUT,
            concurrency: health::DEFAULT_CONCURRENCY,
            degraded_threshold_percent: health::DEFAULT_DEGRADED_THRESHOLD_PERCENT,
            error_patterns: vec![health::DEFAULT_ERROR_PATTERN.to_string()],
            log_window_minutes: health::DEFAULT_LOG_WINDOW_MINUTES,
            services: default_topology(),
            integration: vec![
                IntegrationPair {
                    caller: "astron-agent-core".to_string(),
                    dependency: "astron-rpa-openapi".to_string(),
                    url: "http://astron-rpa-openapi:8082/actuator/health".to_string(),
                    command: None,
                },
                IntegrationPair {
                    caller: "astron-agent-core".to_string(),
                    dependency: "astron-agent-knowledge".to_string(),
                    url: "http://astron-agent-knowledge:8002/health".to_string(),
                    command: None,
                },
                IntegrationPair {
                    caller: "astron-rpa-resource".to_string(),
                    dependency: "minio".to_string(),
                    url: "http://minio:9000/minio/health/live".to_string(),
                    command: None,
                },
            ],
        }
    }
}

/// 回滚配置
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RollbackConfig {
    pub stop_grace_secs: u64,
    pub stage_timeout_secs: u64,
    pub verify_timeout_secs: u64,
    pub verify_interval_secs: u64,
    /// 验证阶段要求进入运行状态的最少服务数，缺省为所有常驻服务
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_running_services: Option<usize>,
    pub runs_dir: String,
}

impl Default for RollbackConfig {
    fn default() -> Self {
        Self {
            stop_grace_secs: timeout::SERVICE_STOP_GRACE,
            stage_timeout_secs: timeout::ROLLBACK_STAGE_TIMEOUT,
            verify_timeout_secs: timeout::VERIFY_TIMEOUT,
            verify_interval_secs: timeout::SERVICE_CHECK_INTERVAL,
            min_running_services: None,
            runs_dir: backup::get_default_runs_dir().to_string_lossy().to_string(),
        }
    }
}

/// validate-config 的检查规则
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct EnvCheckConfig {
    /// 相对 backup.config_root 的路径
    pub env_file: String,
    pub required_keys: Vec<String>,
    pub placeholder_prefixes: Vec<String>,
    pub secret_markers: Vec<String>,
    pub min_password_len: usize,
}

impl Default for EnvCheckConfig {
    fn default() -> Self {
        let owned = |items: &[&str]| -> Vec<String> { items.iter().map(|s| s.to_string()).collect() };
        Self {
            env_file: env::ENV_FILE_NAME.to_string(),
            required_keys: owned(&env::REQUIRED_KEYS),
            placeholder_prefixes: owned(&env::PLACEHOLDER_PREFIXES),
            secret_markers: owned(&env::SECRET_MARKERS),
            min_password_len: env::MIN_PASSWORD_LEN,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_compression_level() -> u32 {
    backup::DEFAULT_COMPRESSION_LEVEL
}

/// 默认部署拓扑
fn default_topology() -> Vec<ServiceDescriptor> {
    let http = |url: &str| Probe::Http(url.to_string());
    let tcp = |addr: &str| Probe::Tcp(addr.to_string());
    let svc = |name: &str, group: &str, probe: Probe| {
        ServiceDescriptor::new(name).with_group(group).with_probe(probe)
    };

    vec![
        svc("mysql", groups::INFRASTRUCTURE, tcp("127.0.0.1:3306")),
        svc("redis", groups::INFRASTRUCTURE, tcp("127.0.0.1:6379")),
        svc(
            "minio",
            groups::INFRASTRUCTURE,
            http("http://127.0.0.1:19000/minio/health/live"),
        ),
        svc(
            "astron-agent-core",
            groups::PLATFORM_A,
            http("http://127.0.0.1:8000/health"),
        ),
        svc(
            "astron-agent-workflow",
            groups::PLATFORM_A,
            http("http://127.0.0.1:8001/health"),
        ),
        svc(
            "astron-agent-knowledge",
            groups::PLATFORM_A,
            http("http://127.0.0.1:8002/health"),
        ),
        svc(
            "astron-agent-console",
            groups::PLATFORM_A,
            http("http://127.0.0.1:8080/actuator/health"),
        ),
        svc(
            "astron-agent-tenant",
            groups::PLATFORM_A,
            http("http://127.0.0.1:9000/health"),
        ),
        svc(
            "astron-rpa-engine",
            groups::PLATFORM_B,
            http("http://127.0.0.1:19999/health"),
        ),
        svc(
            "astron-rpa-ai-service",
            groups::PLATFORM_B,
            http("http://127.0.0.1:8081/actuator/health"),
        ),
        svc(
            "astron-rpa-openapi",
            groups::PLATFORM_B,
            http("http://127.0.0.1:8082/actuator/health"),
        ),
        svc(
            "astron-rpa-resource",
            groups::PLATFORM_B,
            http("http://127.0.0.1:8083/actuator/health"),
        ),
        svc(
            "astron-rpa-robot",
            groups::PLATFORM_B,
            http("http://127.0.0.1:8084/actuator/health"),
        ),
        svc("nginx", groups::PROXY, http("http://127.0.0.1:80/")),
    ]
}

impl AppConfig {
    /// 加载配置：优先使用显式指定的文件，否则按候选顺序查找
    pub fn find_and_load_config(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            if !path.exists() {
                return Err(StackError::ConfigNotFound);
            }
            tracing::info!("使用配置文件: {}", path.display());
            return Self::load_from_file(path);
        }

        for config_file in &CONFIG_FILE_CANDIDATES {
            if Path::new(config_file).exists() {
                tracing::info!("找到配置文件: {}", config_file);
                return Self::load_from_file(config_file);
            }
        }

        // 如果没找到配置文件，创建默认配置
        tracing::warn!("未找到配置文件，创建默认配置: {}", CONFIG_FILE_CANDIDATES[0]);
        let default_config = Self::default();
        default_config.save_to_file(CONFIG_FILE_CANDIDATES[0])?;
        Ok(default_config)
    }

    /// 从指定文件加载配置
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// 保存配置到文件
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let body = toml::to_string_pretty(self)?;
        let content = format!("# stackctl 配置文件\n# 修改后无需重启，下次执行命令时生效\n\n{body}");
        fs::write(&path, content)?;
        Ok(())
    }

    /// 校验配置的一致性
    pub fn validate(&self) -> Result<()> {
        if self.health.concurrency == 0 {
            return Err(StackError::invalid_config("health.concurrency 必须大于 0"));
        }
        if self.health.degraded_threshold_percent > 100 {
            return Err(StackError::invalid_config(
                "health.degraded_threshold_percent 必须在 0-100 之间",
            ));
        }
        if self.backup.compression_level > 9 {
            return Err(StackError::invalid_config(
                "backup.compression_level 必须在 0-9 之间",
            ));
        }
        if self.rollback.verify_interval_secs == 0 {
            return Err(StackError::invalid_config(
                "rollback.verify_interval_secs 必须大于 0",
            ));
        }

        for descriptor in &self.health.services {
            if descriptor.name.trim().is_empty() {
                return Err(StackError::invalid_config("health.services 中存在空服务名"));
            }
        }

        for (group, members) in &self.groups.members {
            let mut seen = HashSet::new();
            for member in members {
                if !seen.insert(member) {
                    return Err(StackError::invalid_config(format!(
                        "分组 {group} 中服务 {member} 重复"
                    )));
                }
            }
        }

        for group in &self.groups.order {
            if !self.groups.members.contains_key(group) {
                return Err(StackError::invalid_config(format!(
                    "groups.order 引用了未定义的分组: {group}"
                )));
            }
        }

        let mut volume_names = HashSet::new();
        for volume in &self.backup.volumes {
            if !volume_names.insert(&volume.name) {
                return Err(StackError::invalid_config(format!(
                    "备份卷名称重复: {}",
                    volume.name
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.groups.order.len(), 4);
        assert_eq!(config.groups.members["infrastructure"].len(), 3);
        assert_eq!(config.health.degraded_threshold_percent, 20);
    }

    #[test]
    fn test_save_and_reload_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stackctl.toml");

        let config = AppConfig::default();
        config.save_to_file(&path).unwrap();

        let loaded = AppConfig::load_from_file(&path).unwrap();
        assert_eq!(loaded.health.services, config.health.services);
        assert_eq!(loaded.groups.members, config.groups.members);
        assert_eq!(loaded.backup.volumes, config.backup.volumes);
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config = AppConfig::from_toml_str(
            r#"
[docker]
compose_file = "/srv/stack/docker-compose.yml"

[health]
probe_timeout_secs = 2
concurrency = 4
degraded_threshold_percent = 30
error_patterns = ["ERROR"]
log_window_minutes = 5

[[health.services]]
name = "api"
groups = ["platform-a"]
probe = { http = "http://127.0.0.1:8000/health" }
"#,
        );
        let config = config.unwrap();
        assert_eq!(config.docker.compose_file, "/srv/stack/docker-compose.yml");
        assert_eq!(config.health.services.len(), 1);
        assert_eq!(
            config.health.services[0].probe,
            Some(Probe::Http("http://127.0.0.1:8000/health".to_string()))
        );
        assert_eq!(config.rollback.stop_grace_secs, timeout::SERVICE_STOP_GRACE);
    }

    #[test]
    fn test_invalid_threshold_rejected() {
        let mut config = AppConfig::default();
        config.health.degraded_threshold_percent = 150;
        assert!(matches!(
            config.validate(),
            Err(StackError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_order_must_reference_defined_groups() {
        let mut config = AppConfig::default();
        config.groups.order.push("monitoring".to_string());
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("monitoring"));
    }

    #[test]
    fn test_explicit_missing_config_is_not_found() {
        let result = AppConfig::find_and_load_config(Some(Path::new("/nonexistent/stackctl.toml")));
        assert!(matches!(result, Err(StackError::ConfigNotFound)));
    }
}
