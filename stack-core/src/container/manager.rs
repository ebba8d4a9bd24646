use super::types::DockerManager;
use crate::Result;
use dashmap::DashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell, OwnedMutexGuard};

impl DockerManager {
    /// 创建新的 Docker 管理器
    pub fn new<P: AsRef<Path>>(compose_file: P) -> Result<Self> {
        let compose_file = compose_file.as_ref().to_path_buf();

        // 不在初始化时检查文件存在性，而是在实际执行命令时检查
        Ok(Self {
            compose_file,
            project_name: None,
            service_locks: Arc::new(DashMap::new()),
            prerequisites: Arc::new(OnceCell::new()),
        })
    }

    /// 指定 compose 项目名
    pub fn with_project_name(mut self, project_name: Option<String>) -> Self {
        self.project_name = project_name;
        self
    }

    /// 检查 Docker Compose 文件是否存在
    pub fn compose_file_exists(&self) -> bool {
        self.compose_file.exists()
    }

    /// 获取 Docker Compose 文件路径
    pub fn get_compose_file(&self) -> &Path {
        &self.compose_file
    }

    /// 获取 Docker Compose 工作目录
    pub fn get_working_directory(&self) -> Option<&Path> {
        self.compose_file.parent()
    }

    /// 获取服务级操作锁，持有期间同一服务上的其他变更操作会等待
    pub(crate) async fn lock_service(&self, service: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .service_locks
            .entry(service.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }
}
