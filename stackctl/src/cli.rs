use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// 分组操作
#[derive(Subcommand, Debug)]
pub enum GroupCommand {
    /// 按依赖顺序启动分组
    Start {
        /// 分组名、别名、all 或单个服务名
        group: String,
    },
    /// 按依赖逆序停止分组
    Stop { group: String },
    /// 重启分组
    Restart { group: String },
    /// 删除分组的容器（持久化卷和备份不受影响）
    Remove {
        group: String,
        /// 跳过确认
        #[arg(long)]
        force: bool,
    },
    /// 调整单个服务的副本数
    Scale {
        service: String,
        replicas: u32,
    },
}

/// 回滚目标：备份ID、--latest 或 --list 三选一
#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
pub struct RollbackTarget {
    /// 备份 ID，例如 2024-01-01T00-00-00
    pub backup_id: Option<String>,

    /// 使用最新的可用备份
    #[arg(long)]
    pub latest: bool,

    /// 列出历史回滚记录
    #[arg(long)]
    pub list: bool,
}

/// 健康检查范围，不指定时执行完整检查
#[derive(Args, Debug, Default, Clone, Copy)]
pub struct HealthSections {
    /// 只检查容器状态
    #[arg(long)]
    pub containers: bool,
    /// 只探测服务端点
    #[arg(long)]
    pub services: bool,
    /// 显示资源占用
    #[arg(long)]
    pub resources: bool,
    /// 扫描最近的错误日志
    #[arg(long)]
    pub logs: bool,
    /// 检查服务间连通性
    #[arg(long)]
    pub integration: bool,
}

impl HealthSections {
    pub fn is_full(&self) -> bool {
        !(self.containers || self.services || self.resources || self.logs || self.integration)
    }
}

/// stackctl - Docker Compose 部署的备份、回滚与健康检查工具
#[derive(Parser)]
#[command(name = "stackctl")]
#[command(about = "Docker Compose 部署的备份、回滚、分组运维和健康检查工具")]
#[command(version)]
pub struct Cli {
    /// 配置文件路径（默认依次查找 stackctl.toml、config.toml、.stackctl.toml）
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// 详细输出
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// 创建备份（配置快照 + 数据卷）
    Backup {
        /// 备份标签，如 pre-update
        #[arg(long)]
        tag: Option<String>,
    },
    /// 检查 .env 中的必需变量、占位值和弱密码
    ValidateConfig,
    /// 列出备份，从新到旧
    ListBackups {
        /// 包括失败的备份
        #[arg(long)]
        all: bool,
        /// 输出 JSON
        #[arg(long)]
        json: bool,
    },
    /// 校验备份完整性
    ValidateBackup {
        backup_id: String,
    },
    /// 按保留策略清理旧备份
    PruneBackups {
        /// 保留最新的 N 个备份
        #[arg(long)]
        keep: Option<usize>,
        /// 删除早于 D 天的备份
        #[arg(long)]
        max_age_days: Option<u64>,
    },
    /// 从备份回滚
    Rollback {
        #[command(flatten)]
        target: RollbackTarget,
        /// 跳过确认
        #[arg(long, short = 'y')]
        yes: bool,
        /// 只校验并打印执行计划
        #[arg(long)]
        dry_run: bool,
    },
    /// 服务分组操作
    #[command(subcommand)]
    Group(GroupCommand),
    /// 显示容器、备份和最近一次回滚的状态
    Status {
        #[arg(long)]
        json: bool,
    },
    /// 查看服务日志
    Logs {
        /// 服务名，不指定时显示所有服务
        service: Option<String>,
        /// 显示最后多少行
        #[arg(default_value_t = 100)]
        lines: u32,
        /// 持续输出新日志直到 Ctrl-C
        #[arg(long, short = 'f')]
        follow: bool,
    },
    /// 健康检查
    Health {
        #[command(flatten)]
        sections: HealthSections,
        /// 持续检查直到 Ctrl-C
        #[arg(long)]
        watch: bool,
        /// watch 模式的检查间隔（秒）
        #[arg(long, default_value_t = stack_core::constants::health::DEFAULT_WATCH_INTERVAL)]
        interval: u64,
        #[arg(long)]
        json: bool,
    },
}
