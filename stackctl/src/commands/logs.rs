use crate::app::CliApp;
use stack_core::{Result, StackError, constants::logs as consts, container::Orchestrator, error::exit_code};
use std::time::Duration;
use tracing::{debug, info, warn};

/// 输出服务日志到 stdout；`follow` 时持续输出直到 Ctrl-C
pub async fn run_logs(app: &CliApp, service: Option<&str>, lines: u32, follow: bool) -> Result<i32> {
    let service = service.map(|tag| log_target(app, tag)).transpose()?;
    let service = service.as_deref();

    debug!("读取日志: {:?}, 最后 {} 行", service, lines);
    let logs = app.docker_manager.logs(service, Some(lines), None).await?;
    print!("{logs}");

    if follow {
        follow_logs(app, service, &logs).await?;
    }
    Ok(exit_code::SUCCESS)
}

/// logs 只接受单个服务；分组需要逐个查看
fn log_target(app: &CliApp, tag: &str) -> Result<String> {
    let tag = tag.trim();
    if app.group_manager.registry().is_known_service(tag) {
        return Ok(tag.to_string());
    }

    let target = app.group_manager.resolve(tag)?;
    if !target.is_single_service() {
        return Err(StackError::precondition(format!(
            "{tag} 是一个分组，logs 只能查看单个服务"
        )));
    }
    target
        .services()
        .into_iter()
        .next()
        .ok_or_else(|| StackError::precondition(format!("{tag} 没有对应的服务")))
}

/// 轮询 `--since` 窗口；窗口比轮询间隔长，重叠部分按上一次的输出去重
async fn follow_logs(app: &CliApp, service: Option<&str>, initial: &str) -> Result<()> {
    let interval = Duration::from_secs(consts::FOLLOW_INTERVAL_SECS);
    let window = interval + Duration::from_secs(consts::FOLLOW_OVERLAP_SECS);
    info!("👀 持续输出日志，Ctrl-C 退出");

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut previous: Vec<String> = initial.lines().map(str::to_string).collect();
    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            _ = tokio::time::sleep(interval) => {}
        }

        let current = match app.docker_manager.logs(service, None, Some(window)).await {
            Ok(current) => current,
            Err(e) => {
                warn!("读取日志失败，稍后重试: {}", e);
                continue;
            }
        };
        for line in fresh_lines(&previous, &current) {
            println!("{line}");
        }
        previous = current.lines().map(str::to_string).collect();
    }

    Ok(())
}

/// `current` 中不属于 `previous` 末尾重叠部分的行
fn fresh_lines<'a>(previous: &[String], current: &'a str) -> Vec<&'a str> {
    let current: Vec<&str> = current.lines().collect();
    let max_overlap = previous.len().min(current.len());
    let overlap = (0..=max_overlap)
        .rev()
        .find(|&k| {
            previous[previous.len() - k..]
                .iter()
                .zip(&current[..k])
                .all(|(a, b)| a == b)
        })
        .unwrap_or(0);
    current[overlap..].to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owned(lines: &[&str]) -> Vec<String> {
        lines.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_overlapping_window_is_not_repeated() {
        let previous = owned(&["a 1", "b 2", "c 3"]);
        assert_eq!(fresh_lines(&previous, "b 2\nc 3\nd 4\n"), vec!["d 4"]);
    }

    #[test]
    fn test_disjoint_window_prints_everything() {
        let previous = owned(&["a 1"]);
        assert_eq!(fresh_lines(&previous, "x 9\ny 10"), vec!["x 9", "y 10"]);
        assert!(fresh_lines(&previous, "").is_empty());
        assert_eq!(fresh_lines(&[], "z"), vec!["z"]);
    }

    #[test]
    fn test_repeated_lines_use_longest_overlap() {
        let previous = owned(&["ping", "ping"]);
        assert_eq!(fresh_lines(&previous, "ping\nping\nping"), vec!["ping"]);
        // 没有新输出
        assert!(fresh_lines(&previous, "ping\nping").is_empty());
    }
}
