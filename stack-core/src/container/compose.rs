use super::types::DockerManager;
use crate::{Result, StackError};
use serde::Deserialize;
use std::collections::BTreeMap;

/// compose 文件中与本工具相关的部分
#[derive(Debug, Default, Deserialize)]
pub struct ComposeFile {
    #[serde(default)]
    pub services: BTreeMap<String, ComposeService>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ComposeService {
    #[serde(default)]
    pub restart: Option<String>,
    #[serde(default)]
    pub image: Option<String>,
}

impl ComposeService {
    /// restart: "no" 表示不自动重启，通常是一次性任务
    pub fn is_oneshot(&self) -> bool {
        matches!(self.restart.as_deref(), Some("no") | Some("false"))
    }
}

impl ComposeFile {
    pub fn parse(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }
}

impl DockerManager {
    /// 解析 docker-compose.yml
    pub async fn read_compose_file(&self) -> Result<ComposeFile> {
        let content = tokio::fs::read_to_string(&self.compose_file)
            .await
            .map_err(|e| StackError::Docker(format!("读取compose文件失败: {e}")))?;
        ComposeFile::parse(&content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_compose_services() {
        let compose = ComposeFile::parse(
            r#"
services:
  mysql:
    image: mysql:8.4
    restart: always
  db-init:
    image: busybox
    restart: "no"
volumes:
  mysql-data: {}
"#,
        )
        .unwrap();

        assert_eq!(compose.services.len(), 2);
        assert!(compose.services["db-init"].is_oneshot());
        assert!(!compose.services["mysql"].is_oneshot());
        assert_eq!(compose.services["mysql"].image.as_deref(), Some("mysql:8.4"));
    }
}
