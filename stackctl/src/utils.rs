use stack_core::Result;
use std::io::{self, Write};

/// # stackctl 日志
///
/// 库代码只使用 `tracing` 宏，日志输出行为在 `main.rs` 中通过 `setup_logging()` 配置。
///
/// - `-v, --verbose`：DEBUG 级别
/// - `RUST_LOG`：覆盖默认级别，例如 `RUST_LOG=stack_core::rollback=debug`
/// - `STACKCTL_LOG_FILE`：设置后日志追加到该文件，包含模块路径、线程名和行号
///
/// 终端输出不显示时间戳和模块路径；`--json` 的结果写到 stdout，不与日志混在一起。
pub fn setup_logging(verbose: bool) {
    use tracing_subscriber::{EnvFilter, fmt};

    let default_level = if verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let log_file = std::env::var("STACKCTL_LOG_FILE").ok().and_then(|path| {
        match std::fs::OpenOptions::new().create(true).append(true).open(&path) {
            Ok(file) => Some(file),
            Err(e) => {
                eprintln!("无法打开日志文件 {path}: {e}，改为输出到终端");
                None
            }
        }
    });

    if let Some(file) = log_file {
        fmt()
            .with_env_filter(env_filter)
            .with_writer(file)
            .with_target(true)
            .with_thread_names(true)
            .with_line_number(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_writer(io::stderr)
            .with_target(false)
            .with_thread_names(false)
            .with_line_number(false)
            .without_time()
            .compact()
            .init();
    }
}

/// 交互确认，只有输入 yes/y 才返回 true
pub fn confirm(prompt: &str) -> Result<bool> {
    print!("{prompt} (输入 'yes' 继续): ");
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(is_affirmative(&input))
}

fn is_affirmative(input: &str) -> bool {
    matches!(input.trim().to_lowercase().as_str(), "yes" | "y")
}

/// 字节数格式化为可读的大小
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KB", "MB", "GB", "TB"];

    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }

    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{size:.1} {}", UNITS[unit])
    }
}

/// 以 JSON 形式输出到 stdout
pub fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
