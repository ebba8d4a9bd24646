//! 服务分组管理：把分组级操作扇出到每个成员服务

use crate::constants::timeout;
use crate::container::Orchestrator;
use crate::error::MemberFailure;
use crate::groups::{ResolvedTarget, ServiceGroupRegistry, Tier};
use crate::{Result, StackError};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// 分组级操作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupOperation {
    Start,
    Stop,
    Restart,
    Remove,
}

impl GroupOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            GroupOperation::Start => "start",
            GroupOperation::Stop => "stop",
            GroupOperation::Restart => "restart",
            GroupOperation::Remove => "remove",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            GroupOperation::Start => "启动",
            GroupOperation::Stop => "停止",
            GroupOperation::Restart => "重启",
            GroupOperation::Remove => "删除",
        }
    }
}

/// 删除操作的授权方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalApproval {
    /// --force，跳过确认
    Forced,
    /// 用户已交互确认
    Confirmed,
    /// 未确认
    Missing,
}

/// 单个成员的执行结果
#[derive(Debug, Clone, Serialize)]
pub struct MemberResult {
    pub service: String,
    pub success: bool,
    pub error: Option<String>,
    pub elapsed_ms: u64,
}

/// 扇出操作的汇总结果
#[derive(Debug, Clone, Serialize)]
pub struct GroupOutcome {
    pub operation: GroupOperation,
    pub target: String,
    pub members: Vec<MemberResult>,
}

impl GroupOutcome {
    pub fn success(&self) -> bool {
        self.members.iter().all(|m| m.success)
    }

    pub fn succeeded(&self) -> Vec<String> {
        self.members
            .iter()
            .filter(|m| m.success)
            .map(|m| m.service.clone())
            .collect()
    }

    pub fn failures(&self) -> Vec<MemberFailure> {
        self.members
            .iter()
            .filter(|m| !m.success)
            .map(|m| MemberFailure {
                service: m.service.clone(),
                reason: m.error.clone().unwrap_or_default(),
            })
            .collect()
    }

    /// 有成员失败时转换为 PartialFailure，保留每个成员的信息
    pub fn into_result(self) -> Result<Self> {
        if self.success() {
            return Ok(self);
        }
        Err(StackError::PartialFailure {
            operation: format!("{} {}", self.operation.as_str(), self.target),
            succeeded: self.succeeded(),
            failures: self.failures(),
        })
    }
}

/// 服务分组管理器
#[derive(Clone)]
pub struct ServiceGroupManager {
    orchestrator: Arc<dyn Orchestrator>,
    registry: ServiceGroupRegistry,
    concurrency: usize,
    stop_grace: Duration,
}

impl ServiceGroupManager {
    pub fn new(orchestrator: Arc<dyn Orchestrator>, registry: ServiceGroupRegistry) -> Self {
        Self {
            orchestrator,
            registry,
            concurrency: crate::constants::health::DEFAULT_CONCURRENCY,
            stop_grace: Duration::from_secs(timeout::SERVICE_STOP_GRACE),
        }
    }

    /// 同一层内的最大并发数
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }

    pub fn registry(&self) -> &ServiceGroupRegistry {
        &self.registry
    }

    pub fn orchestrator(&self) -> Arc<dyn Orchestrator> {
        Arc::clone(&self.orchestrator)
    }

    pub fn resolve(&self, tag: &str) -> Result<ResolvedTarget> {
        self.registry.resolve(tag)
    }

    /// 按层顺序启动
    pub async fn start(&self, target: &ResolvedTarget) -> GroupOutcome {
        self.fan_out(GroupOperation::Start, target, target.tiers.clone())
            .await
    }

    /// 按层逆序停止
    pub async fn stop(&self, target: &ResolvedTarget) -> GroupOutcome {
        self.fan_out(GroupOperation::Stop, target, target.stop_tiers())
            .await
    }

    pub async fn restart(&self, target: &ResolvedTarget) -> GroupOutcome {
        self.fan_out(GroupOperation::Restart, target, target.tiers.clone())
            .await
    }

    /// 删除容器及临时状态；必须确认或强制
    pub async fn remove(
        &self,
        target: &ResolvedTarget,
        approval: RemovalApproval,
    ) -> Result<GroupOutcome> {
        if approval == RemovalApproval::Missing {
            return Err(StackError::precondition(format!(
                "删除 {} 需要确认，使用 --force 跳过确认",
                target.tag
            )));
        }

        warn!("⚠️  删除 {} 的容器: {}", target.tag, target.services().join(", "));
        Ok(self
            .fan_out(GroupOperation::Remove, target, target.stop_tiers())
            .await)
    }

    /// 调整副本数，只能作用于单个服务
    pub async fn scale(&self, tag: &str, replicas: u32) -> Result<()> {
        let target = self.registry.resolve(tag)?;
        if !target.is_single_service() {
            return Err(StackError::precondition(format!(
                "scale 只能作用于单个服务，{tag} 是一个分组"
            )));
        }

        let service = target.services().remove(0);
        self.orchestrator.scale(&service, replicas).await
    }

    /// 逐层执行，层内并发；成员失败不影响其余成员
    async fn fan_out(
        &self,
        operation: GroupOperation,
        target: &ResolvedTarget,
        tiers: Vec<Tier>,
    ) -> GroupOutcome {
        info!(
            "{} {} ({} 个服务)",
            operation.display_name(),
            target.tag,
            target.len()
        );

        let mut members = Vec::with_capacity(target.len());
        for tier in tiers {
            let mut results: Vec<(usize, MemberResult)> =
                stream::iter(tier.services.into_iter().enumerate())
                    .map(|(index, service)| async move {
                        (index, self.run_member(operation, service).await)
                    })
                    .buffer_unordered(self.concurrency)
                    .collect()
                    .await;
            results.sort_by_key(|(index, _)| *index);
            members.extend(results.into_iter().map(|(_, result)| result));
        }

        let outcome = GroupOutcome {
            operation,
            target: target.tag.clone(),
            members,
        };

        let failed = outcome.members.iter().filter(|m| !m.success).count();
        if failed == 0 {
            info!("✅ {} {} 完成", operation.display_name(), target.tag);
        } else {
            error!(
                "❌ {} {}: {}/{} 个服务失败",
                operation.display_name(),
                target.tag,
                failed,
                outcome.members.len()
            );
        }
        outcome
    }

    async fn run_member(&self, operation: GroupOperation, service: String) -> MemberResult {
        let started = Instant::now();
        let result = match operation {
            GroupOperation::Start => self.orchestrator.start(&service).await,
            GroupOperation::Stop => self.orchestrator.stop(&service, self.stop_grace).await,
            GroupOperation::Restart => self.orchestrator.restart(&service).await,
            GroupOperation::Remove => self.orchestrator.remove(&service).await,
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(()) => MemberResult {
                service,
                success: true,
                error: None,
                elapsed_ms,
            },
            Err(e) => {
                warn!("{} {} 失败: {}", operation.display_name(), service, e);
                MemberResult {
                    service,
                    success: false,
                    error: Some(e.to_string()),
                    elapsed_ms,
                }
            }
        }
    }
}
