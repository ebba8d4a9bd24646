use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};

/// 容器运行状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Running,
    Exited,
    Restarting,
    Paused,
    Created,
    Dead,
    Unknown,
}

impl RunState {
    /// 从运行时状态字符串解析
    pub fn parse(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "running" | "up" => RunState::Running,
            "exited" | "stopped" | "down" => RunState::Exited,
            "restarting" => RunState::Restarting,
            "paused" => RunState::Paused,
            "created" => RunState::Created,
            "dead" | "removing" => RunState::Dead,
            _ => RunState::Unknown,
        }
    }

    /// 获取状态的中文显示名称
    pub fn display_name(&self) -> &'static str {
        match self {
            RunState::Running => "运行中",
            RunState::Exited => "已停止",
            RunState::Restarting => "重启中",
            RunState::Paused => "已暂停",
            RunState::Created => "已创建",
            RunState::Dead => "已失效",
            RunState::Unknown => "未知",
        }
    }
}

/// 运行时报告的健康指示（仅当镜像定义了 HEALTHCHECK 时存在）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeHealth {
    Healthy,
    Unhealthy,
    Starting,
}

impl RuntimeHealth {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "healthy" => Some(RuntimeHealth::Healthy),
            "unhealthy" => Some(RuntimeHealth::Unhealthy),
            "starting" => Some(RuntimeHealth::Starting),
            _ => None,
        }
    }
}

/// `docker compose ps --format json` 的单条记录
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerState {
    #[serde(rename = "Name", default)]
    pub name: String,
    #[serde(rename = "Service", default)]
    pub service: String,
    #[serde(rename = "State", default)]
    pub state: String,
    #[serde(rename = "Health", default)]
    pub health: String,
    #[serde(rename = "Image", default)]
    pub image: String,
    #[serde(rename = "Status", default)]
    pub status: String,
    #[serde(rename = "ExitCode", default)]
    pub exit_code: i64,
}

impl ContainerState {
    pub fn run_state(&self) -> RunState {
        RunState::parse(&self.state)
    }

    pub fn runtime_health(&self) -> Option<RuntimeHealth> {
        RuntimeHealth::parse(&self.health)
    }

    pub fn is_running(&self) -> bool {
        self.run_state() == RunState::Running
    }
}

/// `docker stats --no-stream --format json` 的单条记录
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResourceUsage {
    #[serde(rename = "Name", default)]
    pub name: String,
    #[serde(rename = "CPUPerc", default)]
    pub cpu_percent: String,
    #[serde(rename = "MemUsage", default)]
    pub mem_usage: String,
    #[serde(rename = "MemPerc", default)]
    pub mem_percent: String,
}

impl ResourceUsage {
    /// "12.5%" -> 12.5
    pub fn cpu(&self) -> Option<f64> {
        parse_percent(&self.cpu_percent)
    }

    pub fn memory(&self) -> Option<f64> {
        parse_percent(&self.mem_percent)
    }
}

fn parse_percent(value: &str) -> Option<f64> {
    value.trim().trim_end_matches('%').trim().parse().ok()
}

/// 在容器内执行命令的结果
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

impl From<std::process::Output> for CommandOutput {
    fn from(output: std::process::Output) -> Self {
        Self {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        }
    }
}

/// 基于 docker compose 的编排客户端
#[derive(Debug, Clone)]
pub struct DockerManager {
    pub(crate) compose_file: PathBuf,
    pub(crate) project_name: Option<String>,
    /// 每个服务一把锁，同一服务上的变更操作串行执行
    pub(crate) service_locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
    pub(crate) prerequisites: Arc<OnceCell<ComposeFlavor>>,
}

/// 可用的 compose 命令形式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComposeFlavor {
    /// `docker compose`（新语法）
    Plugin,
    /// `docker-compose`（旧语法）
    Standalone,
}
