/// Docker相关路径常量
pub mod docker {
    use std::path::{Path, PathBuf};

    /// docker-compose.yml文件名
    pub const COMPOSE_FILE_NAME: &str = "docker-compose.yml";

    /// Docker工作目录名
    pub const DOCKER_DIR_NAME: &str = "docker";

    /// 获取默认的docker-compose.yml文件路径（跨平台）
    pub fn get_compose_file_path() -> PathBuf {
        Path::new(".").join(DOCKER_DIR_NAME).join(COMPOSE_FILE_NAME)
    }

    /// 获取Docker工作目录路径（跨平台）
    pub fn get_docker_work_dir() -> PathBuf {
        Path::new(".").join(DOCKER_DIR_NAME)
    }

    /// 获取默认compose文件路径的字符串表示
    pub fn get_compose_file_path_str() -> String {
        get_compose_file_path().to_string_lossy().to_string()
    }
}

/// 备份存储相关常量
pub mod backup {
    use std::path::{Path, PathBuf};

    /// 备份根目录名
    pub const BACKUP_DIR_NAME: &str = "backups";

    /// 元数据文件名
    pub const METADATA_FILE: &str = "metadata.json";

    /// 配置快照归档文件名
    pub const CONFIG_ARCHIVE: &str = "config.tar.gz";

    /// 卷归档所在子目录
    pub const VOLUMES_DIR: &str = "volumes";

    /// 卷归档扩展名
    pub const ARCHIVE_EXTENSION: &str = ".tar.gz";

    /// 备份ID的时间格式（字典序即时间序）
    pub const ID_TIME_FORMAT: &str = "%Y-%m-%dT%H-%M-%S";

    /// 同一秒内允许的最大备份数（ID后缀 -01 .. -99）
    pub const MAX_SAME_SECOND_BACKUPS: u32 = 99;

    /// 备份标签的最大长度
    pub const MAX_TAG_LEN: usize = 64;

    /// 默认压缩级别
    pub const DEFAULT_COMPRESSION_LEVEL: u32 = 6;

    /// 回滚安全副本目录名（以点开头，列表时跳过）
    pub const SAFETY_DIR_NAME: &str = ".rollback-safety";

    /// 回滚运行记录目录名
    pub const RUNS_DIR_NAME: &str = ".rollback-runs";

    /// 获取默认备份目录路径（跨平台）
    pub fn get_default_storage_dir() -> PathBuf {
        Path::new(".").join(BACKUP_DIR_NAME)
    }

    /// 获取默认回滚安全副本目录
    pub fn get_default_safety_dir() -> PathBuf {
        get_default_storage_dir().join(SAFETY_DIR_NAME)
    }

    /// 获取默认回滚运行记录目录
    pub fn get_default_runs_dir() -> PathBuf {
        get_default_storage_dir().join(RUNS_DIR_NAME)
    }

    /// 卷归档文件名
    pub fn volume_archive_name(volume: &str) -> String {
        format!("{volume}{ARCHIVE_EXTENSION}")
    }
}

/// 服务分组相关常量
pub mod groups {
    pub const INFRASTRUCTURE: &str = "infrastructure";
    pub const PLATFORM_A: &str = "platform-a";
    pub const PLATFORM_B: &str = "platform-b";
    pub const PROXY: &str = "proxy";

    /// 所有分组的并集
    pub const ALL: &str = "all";
}

/// 超时相关常量（秒）
pub mod timeout {
    /// 停止服务时的优雅等待时间，超时后强制终止
    pub const SERVICE_STOP_GRACE: u64 = 30;

    /// 单个回滚阶段的最长执行时间
    pub const ROLLBACK_STAGE_TIMEOUT: u64 = 300;

    /// 回滚后等待服务进入运行状态的超时时间
    pub const VERIFY_TIMEOUT: u64 = 120;

    /// Docker服务状态检查间隔时间
    pub const SERVICE_CHECK_INTERVAL: u64 = 2;

    /// 单个探测请求的超时时间
    pub const PROBE_TIMEOUT: u64 = 5;

    /// 读取源码版本等辅助命令的超时时间
    pub const AUX_COMMAND_TIMEOUT: u64 = 5;
}

/// 健康检查相关常量
pub mod health {
    /// 并发探测上限
    pub const DEFAULT_CONCURRENCY: usize = 8;

    /// 降级阈值：不健康服务占比不超过该百分比时判定为降级
    pub const DEFAULT_DEGRADED_THRESHOLD_PERCENT: u8 = 20;

    /// 日志扫描的默认时间窗口（分钟）
    pub const DEFAULT_LOG_WINDOW_MINUTES: u64 = 10;

    /// 默认的错误日志匹配模式
    pub const DEFAULT_ERROR_PATTERN: &str = r"(?i)\b(error|exception|fatal|panic|traceback)\b";

    /// watch 模式默认刷新间隔（秒）
    pub const DEFAULT_WATCH_INTERVAL: u64 = 10;
}

/// 日志相关常量
pub mod logs {
    /// logs --follow 的轮询间隔（秒）
    pub const FOLLOW_INTERVAL_SECS: u64 = 2;

    /// 每次轮询窗口比间隔多出的秒数，`--since` 只精确到秒
    pub const FOLLOW_OVERLAP_SECS: u64 = 2;
}

/// 环境变量文件检查相关常量
pub mod env {
    /// 相对配置根目录的环境变量文件
    pub const ENV_FILE_NAME: &str = ".env";

    /// 必需的环境变量
    pub const REQUIRED_KEYS: [&str; 4] = ["MYSQL_ROOT_PASSWORD", "MYSQL_PASSWORD", "SECRET_KEY", "JWT_SECRET"];

    /// 视为占位值的前缀（不区分大小写）
    pub const PLACEHOLDER_PREFIXES: [&str; 4] = ["your", "example", "changeme", "<"];

    /// 变量名包含这些片段时按密码检查强度
    pub const SECRET_MARKERS: [&str; 1] = ["PASSWORD"];

    /// 密码最短长度
    pub const MIN_PASSWORD_LEN: usize = 12;
}
