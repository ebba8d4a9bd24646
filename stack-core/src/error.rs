use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, StackError>;

/// 进程退出码
pub mod exit_code {
    /// 成功 / 健康
    pub const SUCCESS: i32 = 0;
    /// 操作已执行但失败
    pub const FAILED: i32 = 1;
    /// 操作被拒绝（前置条件不满足，未产生任何副作用）
    pub const REFUSED: i32 = 2;
    /// 需要人工关注（降级 / 验证超时）
    pub const ATTENTION: i32 = 3;
    /// 系统不健康
    pub const UNHEALTHY: i32 = 4;
}

/// 扇出操作中单个成员的失败信息
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberFailure {
    pub service: String,
    pub reason: String,
}

impl fmt::Display for MemberFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.service, self.reason)
    }
}

fn join_failures(failures: &[MemberFailure]) -> String {
    failures
        .iter()
        .map(|f| f.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

fn stage_or_none(stage: &Option<String>) -> &str {
    stage.as_deref().unwrap_or("无")
}

fn yes_no(flag: &bool) -> &'static str {
    if *flag { "是" } else { "否" }
}

#[derive(Error, Debug)]
pub enum StackError {
    #[error("配置解析错误: {0}")]
    Config(#[from] toml::de::Error),

    #[error("配置序列化错误: {0}")]
    ConfigSerialize(#[from] toml::ser::Error),

    #[error("配置无效: {0}")]
    InvalidConfig(String),

    #[error("配置文件未找到")]
    ConfigNotFound,

    #[error("HTTP 请求错误: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO 错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("序列化错误: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("YAML 解析错误: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("正则表达式错误: {0}")]
    Regex(#[from] regex::Error),

    #[error("任务执行错误: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("目录遍历错误: {0}")]
    WalkDir(#[from] walkdir::Error),

    #[error("路径错误: {0}")]
    StripPrefix(#[from] std::path::StripPrefixError),

    #[error("Docker 命令执行失败: {0}")]
    Docker(String),

    #[error("备份操作失败: {0}")]
    Backup(String),

    #[error("探测失败: {0}")]
    Probe(String),

    /// 操作在产生任何副作用之前被拒绝
    #[error("操作被拒绝: {0}")]
    Precondition(String),

    /// 扇出操作部分成员失败
    #[error(
        "{operation} 部分失败 ({} 个成功, {} 个失败): {}",
        .succeeded.len(),
        .failures.len(),
        join_failures(.failures)
    )]
    PartialFailure {
        operation: String,
        succeeded: Vec<String>,
        failures: Vec<MemberFailure>,
    },

    /// 回滚阶段失败，之前的阶段可能已修改系统状态
    #[error(
        "回滚阶段 {stage} 失败 (最后完成阶段: {}, 状态已修改: {}): {reason}",
        stage_or_none(.furthest_completed),
        yes_no(.state_mutated)
    )]
    StageFailed {
        stage: String,
        furthest_completed: Option<String>,
        state_mutated: bool,
        reason: String,
    },

    /// 副作用已全部应用，但系统未在期限内证明自身健康
    #[error("验证超时: {waited_secs} 秒内仅 {running}/{required} 个服务进入运行状态")]
    VerificationTimeout {
        running: usize,
        required: usize,
        waited_secs: u64,
    },

    #[error("自定义错误: {0}")]
    Custom(String),
}

impl StackError {
    pub fn custom(msg: impl Into<String>) -> Self {
        Self::Custom(msg.into())
    }

    pub fn docker(msg: impl Into<String>) -> Self {
        Self::Docker(msg.into())
    }

    pub fn backup(msg: impl Into<String>) -> Self {
        Self::Backup(msg.into())
    }

    pub fn precondition(msg: impl Into<String>) -> Self {
        Self::Precondition(msg.into())
    }

    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// 该错误是否在任何副作用之前发生
    pub fn is_refusal(&self) -> bool {
        matches!(
            self,
            Self::Precondition(_) | Self::InvalidConfig(_) | Self::ConfigNotFound
        )
    }

    /// 映射到进程退出码
    pub fn exit_code(&self) -> i32 {
        match self {
            e if e.is_refusal() => exit_code::REFUSED,
            Self::VerificationTimeout { .. } => exit_code::ATTENTION,
            _ => exit_code::FAILED,
        }
    }
}
