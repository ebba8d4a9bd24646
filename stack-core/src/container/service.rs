use super::Orchestrator;
use super::types::{CommandOutput, ContainerState, DockerManager, ResourceUsage};
use crate::{Result, StackError};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::time::Duration;
use tracing::{debug, info, warn};

#[async_trait]
impl Orchestrator for DockerManager {
    async fn start(&self, service: &str) -> Result<()> {
        let _guard = self.lock_service(service).await;
        info!("启动服务: {}", service);
        // up -d 可以拉起已被删除的容器，start 不行
        self.run_compose_checked(&format!("启动服务 {service} "), &["up", "-d", service])
            .await?;
        Ok(())
    }

    async fn stop(&self, service: &str, grace: Duration) -> Result<()> {
        let _guard = self.lock_service(service).await;
        info!("停止服务: {} (优雅等待 {} 秒)", service, grace.as_secs());
        let grace_secs = grace.as_secs().to_string();
        self.run_compose_checked(
            &format!("停止服务 {service} "),
            &["stop", "-t", &grace_secs, service],
        )
        .await?;
        Ok(())
    }

    async fn restart(&self, service: &str) -> Result<()> {
        let _guard = self.lock_service(service).await;
        info!("重启服务: {}", service);
        self.run_compose_checked(&format!("重启服务 {service} "), &["restart", service])
            .await?;
        Ok(())
    }

    async fn remove(&self, service: &str) -> Result<()> {
        let _guard = self.lock_service(service).await;
        info!("删除服务容器: {}", service);
        // -s 先停止，-v 同时删除匿名卷（临时状态），具名卷和备份不受影响
        self.run_compose_checked(
            &format!("删除服务 {service} "),
            &["rm", "-f", "-s", "-v", service],
        )
        .await?;
        Ok(())
    }

    async fn scale(&self, service: &str, replicas: u32) -> Result<()> {
        let _guard = self.lock_service(service).await;
        info!("调整服务副本数: {} -> {}", service, replicas);
        let scale_arg = format!("{service}={replicas}");
        self.run_compose_checked(
            &format!("调整服务 {service} 副本数"),
            &["up", "-d", "--no-recreate", "--scale", &scale_arg, service],
        )
        .await?;
        Ok(())
    }

    async fn exec(&self, service: &str, command: &[String]) -> Result<CommandOutput> {
        let mut args = vec!["exec", "-T", service];
        args.extend(command.iter().map(String::as_str));
        let output = self.run_compose_command(&args).await?;
        Ok(output.into())
    }

    async fn logs(
        &self,
        service: Option<&str>,
        tail: Option<u32>,
        since: Option<Duration>,
    ) -> Result<String> {
        let mut args = vec!["logs", "--no-color"];
        let tail_str;
        if let Some(n) = tail {
            tail_str = n.to_string();
            args.extend(["--tail", tail_str.as_str()]);
        }
        let since_str;
        if let Some(window) = since {
            since_str = format!("{}s", window.as_secs());
            args.extend(["--since", since_str.as_str()]);
        }
        if let Some(service) = service {
            args.push(service);
        }

        let output = self.run_compose_checked("获取日志", &args).await?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    async fn list_containers(&self) -> Result<Vec<ContainerState>> {
        let output = self
            .run_compose_checked("获取服务状态", &["ps", "--all", "--format", "json"])
            .await?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_json_records(&stdout)
    }

    async fn resource_usage(&self) -> Result<Vec<ResourceUsage>> {
        self.check_prerequisites().await?;
        let output = self
            .run_docker_command(&["stats", "--no-stream", "--format", "{{json .}}"])
            .await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(StackError::Docker(format!("获取资源使用失败: {}", stderr.trim())));
        }
        let stdout = String::from_utf8_lossy(&output.stdout);
        parse_json_records(&stdout)
    }
}

/// 解析运行时输出的 JSON：兼容整段数组和逐行 JSON 两种格式
pub(crate) fn parse_json_records<T: DeserializeOwned>(output: &str) -> Result<Vec<T>> {
    let trimmed = output.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }

    if trimmed.starts_with('[') {
        return Ok(serde_json::from_str(trimmed)?);
    }

    let mut records = Vec::new();
    for line in trimmed.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<T>(line) {
            Ok(record) => records.push(record),
            Err(e) => {
                warn!("解析运行时 JSON 失败: {}, 内容: {}", e, line);
            }
        }
    }

    debug!("解析到 {} 条记录", records.len());
    Ok(records)
}
