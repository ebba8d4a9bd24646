use super::types::{ComposeFlavor, DockerManager};
use crate::{Result, StackError};
use std::process::Stdio;
use tokio::process::Command;

impl DockerManager {
    /// 检查 Docker 状态
    pub async fn check_docker_status(&self) -> Result<()> {
        // 检查 docker 命令
        if which::which("docker").is_err() {
            return Err(StackError::Docker("Docker 未安装或不在 PATH 中".to_string()));
        }

        // 检查 Docker 服务是否运行
        let output = self.run_docker_command(&["info"]).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(StackError::Docker(format!("Docker 服务未运行: {stderr}")));
        }

        Ok(())
    }

    /// 检查 Docker 和 Docker Compose 是否可用，结果在进程内缓存
    pub async fn check_prerequisites(&self) -> Result<ComposeFlavor> {
        let flavor = self
            .prerequisites
            .get_or_try_init(|| async {
                // 首先检查 Docker Compose 文件是否存在
                if !self.compose_file.exists() {
                    return Err(StackError::Docker(format!(
                        "Docker Compose 文件不存在: {}",
                        self.compose_file.display()
                    )));
                }

                self.check_docker_status().await?;

                // 优先 docker compose，回退到 docker-compose
                let plugin = self.run_docker_command(&["compose", "version"]).await;
                if matches!(plugin, Ok(ref output) if output.status.success()) {
                    return Ok(ComposeFlavor::Plugin);
                }
                if which::which("docker-compose").is_ok() {
                    return Ok(ComposeFlavor::Standalone);
                }

                Err(StackError::Docker(
                    "Docker Compose 未安装或不可用".to_string(),
                ))
            })
            .await?;

        Ok(*flavor)
    }

    /// 执行 docker compose 命令
    pub(crate) async fn run_compose_command(&self, args: &[&str]) -> Result<std::process::Output> {
        let flavor = self.check_prerequisites().await?;
        let compose_path = self.compose_file.to_string_lossy().to_string();

        let mut cmd_args: Vec<&str> = Vec::new();
        let program = match flavor {
            ComposeFlavor::Plugin => {
                cmd_args.push("compose");
                "docker"
            }
            ComposeFlavor::Standalone => "docker-compose",
        };
        cmd_args.extend(["-f", compose_path.as_str()]);
        if let Some(project) = &self.project_name {
            cmd_args.extend(["-p", project.as_str()]);
        }
        cmd_args.extend(args);

        tracing::debug!("执行: {} {}", program, cmd_args.join(" "));

        let output = Command::new(program)
            .args(&cmd_args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;

        Ok(output)
    }

    /// 执行 compose 命令，非零退出码视为失败
    pub(crate) async fn run_compose_checked(
        &self,
        action: &str,
        args: &[&str],
    ) -> Result<std::process::Output> {
        let output = self.run_compose_command(args).await?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(StackError::Docker(format!("{action}失败: {}", stderr.trim())));
        }
        Ok(output)
    }

    /// 执行 docker 命令
    pub(crate) async fn run_docker_command(&self, args: &[&str]) -> Result<std::process::Output> {
        let output = Command::new("docker")
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await?;

        Ok(output)
    }
}
