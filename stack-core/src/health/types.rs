//! 健康检查的数据模型：服务描述、探测结果、判定结果

use crate::error::exit_code;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 可达性探测方式
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Probe {
    /// HTTP 探测，2xx/3xx 视为成功
    Http(String),
    /// TCP 探测，格式 host:port
    Tcp(String),
}

impl Probe {
    pub fn target(&self) -> &str {
        match self {
            Probe::Http(url) => url,
            Probe::Tcp(addr) => addr,
        }
    }
}

/// 服务稳定后期望的容器状态
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpectedState {
    /// 常驻服务
    #[default]
    Running,
    /// 一次性任务（初始化、迁移），正常退出即可
    Exited,
}

/// 服务描述
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceDescriptor {
    pub name: String,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default)]
    pub expected_state: ExpectedState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub probe: Option<Probe>,
}

impl ServiceDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            groups: Vec::new(),
            expected_state: ExpectedState::Running,
            probe: None,
        }
    }

    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.groups.push(group.into());
        self
    }

    pub fn with_probe(mut self, probe: Probe) -> Self {
        self.probe = Some(probe);
        self
    }
}

/// 服务间依赖连通性检查：caller 容器内部能否访问 dependency 的地址
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrationPair {
    pub caller: String,
    pub dependency: String,
    pub url: String,
    /// 自定义检查命令，`{url}` 会被替换；默认使用 curl
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<Vec<String>>,
}

/// 健康判定
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Healthy,
    Degraded,
    Unhealthy,
    Unknown,
}

impl Verdict {
    pub fn display_name(&self) -> &'static str {
        match self {
            Verdict::Healthy => "健康",
            Verdict::Degraded => "降级",
            Verdict::Unhealthy => "不健康",
            Verdict::Unknown => "未知",
        }
    }

    pub fn icon(&self) -> &'static str {
        match self {
            Verdict::Healthy => "✅",
            Verdict::Degraded => "⚠️",
            Verdict::Unhealthy => "❌",
            Verdict::Unknown => "❓",
        }
    }

    pub fn is_healthy(&self) -> bool {
        matches!(self, Verdict::Healthy)
    }

    /// 健康检查命令的进程退出码
    pub fn exit_code(&self) -> i32 {
        match self {
            Verdict::Healthy => exit_code::SUCCESS,
            Verdict::Degraded | Verdict::Unknown => exit_code::ATTENTION,
            Verdict::Unhealthy => exit_code::UNHEALTHY,
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.display_name())
    }
}

/// 单个服务的容器级检查结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerCheck {
    pub service: String,
    /// 观察到的运行状态，容器不存在时为 None
    pub state: Option<String>,
    /// 运行时报告的健康指示（healthy / unhealthy / starting）
    pub runtime_health: Option<String>,
    pub verdict: Verdict,
    pub detail: Option<String>,
}

/// 探测结果分类：超时和拒绝连接都算不健康，但需要区分以便排查
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProbeStatus {
    Reachable { http_status: Option<u16> },
    BadStatus { http_status: u16 },
    Refused,
    Timeout,
    Error { message: String },
}

impl ProbeStatus {
    pub fn is_reachable(&self) -> bool {
        matches!(self, ProbeStatus::Reachable { .. })
    }

    pub fn describe(&self) -> String {
        match self {
            ProbeStatus::Reachable {
                http_status: Some(code),
            } => format!("可达 (HTTP {code})"),
            ProbeStatus::Reachable { http_status: None } => "可达".to_string(),
            ProbeStatus::BadStatus { http_status } => format!("异常状态码 HTTP {http_status}"),
            ProbeStatus::Refused => "连接被拒绝".to_string(),
            ProbeStatus::Timeout => "超时".to_string(),
            ProbeStatus::Error { message } => format!("错误: {message}"),
        }
    }
}

/// 单个服务的探测结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeResult {
    pub service: String,
    pub target: String,
    pub status: ProbeStatus,
    pub latency_ms: u64,
}

impl ProbeResult {
    pub fn verdict(&self) -> Verdict {
        if self.status.is_reachable() {
            Verdict::Healthy
        } else {
            Verdict::Unhealthy
        }
    }
}

/// 服务间连通性检查结果
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrationResult {
    pub caller: String,
    pub dependency: String,
    pub url: String,
    pub reachable: bool,
    pub detail: Option<String>,
    pub latency_ms: u64,
}

/// 合并后的单服务健康状况
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceHealth {
    pub service: String,
    pub container: Option<ContainerCheck>,
    pub probe: Option<ProbeResult>,
    pub verdict: Verdict,
}

impl ServiceHealth {
    /// 合并容器检查和探测结果：任意一项不健康即不健康，两项都缺失为未知
    pub fn combine(
        service: impl Into<String>,
        container: Option<ContainerCheck>,
        probe: Option<ProbeResult>,
    ) -> Self {
        let verdicts: Vec<Verdict> = container
            .iter()
            .map(|c| c.verdict)
            .chain(probe.iter().map(|p| p.verdict()))
            .collect();

        let verdict = if verdicts.is_empty() {
            Verdict::Unknown
        } else if verdicts.iter().all(Verdict::is_healthy) {
            Verdict::Healthy
        } else if verdicts.contains(&Verdict::Unknown)
            && !verdicts.contains(&Verdict::Unhealthy)
        {
            Verdict::Unknown
        } else {
            Verdict::Unhealthy
        };

        Self {
            service: service.into(),
            container,
            probe,
            verdict,
        }
    }
}

/// 系统整体健康状况
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemHealth {
    pub verdict: Verdict,
    pub healthy: usize,
    pub total: usize,
    pub unhealthy_services: Vec<String>,
    pub services: Vec<ServiceHealth>,
    pub checked_at: DateTime<Utc>,
}

impl SystemHealth {
    /// 头部指标，例如 "9/11"
    pub fn headline(&self) -> String {
        format!("{}/{}", self.healthy, self.total)
    }
}

/// 日志错误扫描结果（软信号，不参与判定）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorScan {
    pub service: String,
    pub window_minutes: u64,
    pub matches: usize,
    /// 最近几条匹配行
    pub samples: Vec<String>,
}
