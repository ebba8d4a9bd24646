//! 编排客户端：对容器运行时生命周期操作的抽象

// 模块声明
mod command;
mod compose;
mod manager;
mod service;
mod types;

use crate::Result;
use async_trait::async_trait;
use std::time::Duration;

// 重新导出公共API
pub use compose::{ComposeFile, ComposeService};
pub use types::{
    CommandOutput, ComposeFlavor, ContainerState, DockerManager, ResourceUsage, RunState,
    RuntimeHealth,
};

/// 容器运行时的生命周期操作。
///
/// 实现方需要保证同一服务上的变更操作（start/stop/restart/remove/scale）串行执行；
/// 非零退出码一律作为错误返回。
#[async_trait]
pub trait Orchestrator: Send + Sync {
    async fn start(&self, service: &str) -> Result<()>;

    /// 停止服务，超过 grace 后强制终止
    async fn stop(&self, service: &str, grace: Duration) -> Result<()>;

    async fn restart(&self, service: &str) -> Result<()>;

    /// 删除容器及其临时状态（匿名卷），不影响持久化卷和备份
    async fn remove(&self, service: &str) -> Result<()>;

    async fn scale(&self, service: &str, replicas: u32) -> Result<()>;

    /// 在运行中的服务容器内执行命令
    async fn exec(&self, service: &str, command: &[String]) -> Result<CommandOutput>;

    async fn logs(
        &self,
        service: Option<&str>,
        tail: Option<u32>,
        since: Option<Duration>,
    ) -> Result<String>;

    /// 当前项目下所有容器（包括已退出的）
    async fn list_containers(&self) -> Result<Vec<ContainerState>>;

    async fn resource_usage(&self) -> Result<Vec<ResourceUsage>>;
}
