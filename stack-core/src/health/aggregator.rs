use super::probe::Prober;
use super::types::{
    ContainerCheck, ErrorScan, ExpectedState, IntegrationPair, IntegrationResult, Probe,
    ProbeResult, ServiceDescriptor, ServiceHealth, SystemHealth, Verdict,
};
use crate::config::HealthConfig;
use crate::container::{ContainerState, Orchestrator, ResourceUsage, RunState, RuntimeHealth};
use crate::Result;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, warn};

/// 每个服务保留的日志匹配样例数
const MAX_ERROR_SAMPLES: usize = 5;

/// 健康检查聚合器
///
/// 容器状态来自编排客户端，可达性来自配置中的探测表。所有检查相互独立，
/// 在 `concurrency` 限制下并发执行，结果收集完成后再聚合。
#[derive(Clone)]
pub struct HealthAggregator {
    orchestrator: Arc<dyn Orchestrator>,
    prober: Prober,
    config: HealthConfig,
    error_patterns: Vec<Regex>,
}

impl HealthAggregator {
    pub fn new(orchestrator: Arc<dyn Orchestrator>, config: HealthConfig) -> Result<Self> {
        let prober = Prober::new(Duration::from_secs(config.probe_timeout_secs))?;
        let error_patterns = config
            .error_patterns
            .iter()
            .map(|p| Regex::new(p))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(Self {
            orchestrator,
            prober,
            config,
            error_patterns,
        })
    }

    /// 配置中的服务描述
    pub fn descriptors(&self) -> &[ServiceDescriptor] {
        &self.config.services
    }

    pub fn integration_pairs(&self) -> &[IntegrationPair] {
        &self.config.integration
    }

    /// 容器级检查：一次读取全部容器状态，再逐个分类
    pub async fn check_containers(
        &self,
        descriptors: &[ServiceDescriptor],
    ) -> Result<Vec<ContainerCheck>> {
        let containers = self.orchestrator.list_containers().await?;

        let mut by_service: HashMap<&str, Vec<&ContainerState>> = HashMap::new();
        for container in &containers {
            by_service
                .entry(container.service.as_str())
                .or_default()
                .push(container);
        }

        Ok(descriptors
            .iter()
            .map(|d| {
                let replicas = by_service.get(d.name.as_str()).map(Vec::as_slice).unwrap_or(&[]);
                classify_container(d, replicas)
            })
            .collect())
    }

    /// 同 `check_containers`，但运行时不可达时每个服务都记为 Unknown，错误写入 detail
    pub async fn check_containers_or_unknown(
        &self,
        descriptors: &[ServiceDescriptor],
    ) -> Vec<ContainerCheck> {
        match self.check_containers(descriptors).await {
            Ok(checks) => checks,
            Err(e) => {
                warn!("无法读取容器状态: {}", e);
                let detail = format!("无法读取容器状态: {e}");
                descriptors
                    .iter()
                    .map(|d| ContainerCheck {
                        service: d.name.clone(),
                        state: None,
                        runtime_health: None,
                        verdict: Verdict::Unknown,
                        detail: Some(detail.clone()),
                    })
                    .collect()
            }
        }
    }

    /// 端点探测；没有配置探测的服务不参与
    pub async fn check_endpoints(&self, descriptors: &[ServiceDescriptor]) -> Vec<ProbeResult> {
        let targets: Vec<(&str, &Probe)> = descriptors
            .iter()
            .filter_map(|d| d.probe.as_ref().map(|p| (d.name.as_str(), p)))
            .collect();

        let mut results: Vec<ProbeResult> = stream::iter(targets)
            .map(|(service, probe)| self.prober.probe(service, probe))
            .buffer_unordered(self.config.concurrency)
            .collect()
            .await;

        results.sort_by(|a, b| a.service.cmp(&b.service));
        results
    }

    /// 服务间连通性：在调用方容器内访问依赖方地址
    pub async fn check_integration(&self, pairs: &[IntegrationPair]) -> Vec<IntegrationResult> {
        stream::iter(pairs)
            .map(|pair| self.check_pair(pair))
            .buffered(self.config.concurrency)
            .collect()
            .await
    }

    async fn check_pair(&self, pair: &IntegrationPair) -> IntegrationResult {
        let command = integration_command(pair, self.prober.timeout());
        // 容器内命令自身有超时，这里多留一点余量
        let deadline = self.prober.timeout() + Duration::from_secs(2);
        let started = Instant::now();

        let (reachable, detail) =
            match timeout(deadline, self.orchestrator.exec(&pair.caller, &command)).await {
                Err(_) => (false, Some("超时".to_string())),
                Ok(Err(e)) => (false, Some(e.to_string())),
                Ok(Ok(output)) if output.success() => (true, None),
                Ok(Ok(output)) => {
                    let stderr = output.stderr.trim();
                    let detail = if stderr.is_empty() {
                        format!("退出码 {:?}", output.exit_code)
                    } else {
                        stderr.to_string()
                    };
                    (false, Some(detail))
                }
            };

        debug!(
            "连通性 {} -> {}: {}",
            pair.caller,
            pair.dependency,
            if reachable { "可达" } else { "不可达" }
        );

        IntegrationResult {
            caller: pair.caller.clone(),
            dependency: pair.dependency.clone(),
            url: pair.url.clone(),
            reachable,
            detail,
            latency_ms: started.elapsed().as_millis() as u64,
        }
    }

    /// 完整检查：容器状态 + 端点探测，合并后聚合
    pub async fn check(&self) -> Result<SystemHealth> {
        let descriptors = self.descriptors();
        let (containers, probes) = tokio::join!(
            self.check_containers_or_unknown(descriptors),
            self.check_endpoints(descriptors)
        );

        let mut containers: HashMap<String, ContainerCheck> = containers
            .into_iter()
            .map(|c| (c.service.clone(), c))
            .collect();
        let mut probes: HashMap<String, ProbeResult> = probes
            .into_iter()
            .map(|p| (p.service.clone(), p))
            .collect();

        let services: Vec<ServiceHealth> = descriptors
            .iter()
            .map(|d| ServiceHealth::combine(&d.name, containers.remove(&d.name), probes.remove(&d.name)))
            .collect();

        Ok(aggregate(services, self.config.degraded_threshold_percent))
    }

    /// 统计服务在时间窗口内的错误日志行数（软信号）
    pub async fn recent_errors(&self, service: &str, window: Duration) -> Result<ErrorScan> {
        let logs = self
            .orchestrator
            .logs(Some(service), None, Some(window))
            .await?;
        Ok(scan_log_errors(
            service,
            &logs,
            &self.error_patterns,
            window.as_secs() / 60,
        ))
    }

    /// 对所有服务扫描日志；单个服务读取失败只记录警告
    pub async fn scan_errors(&self, descriptors: &[ServiceDescriptor]) -> Vec<ErrorScan> {
        let window = Duration::from_secs(self.config.log_window_minutes * 60);
        let results: Vec<(String, Result<ErrorScan>)> = stream::iter(descriptors)
            .map(|d| async move { (d.name.clone(), self.recent_errors(&d.name, window).await) })
            .buffered(self.config.concurrency)
            .collect()
            .await;

        results
            .into_iter()
            .filter_map(|(service, result)| match result {
                Ok(scan) => Some(scan),
                Err(e) => {
                    warn!("读取 {} 的日志失败: {}", service, e);
                    None
                }
            })
            .collect()
    }

    pub async fn resources(&self) -> Result<Vec<ResourceUsage>> {
        self.orchestrator.resource_usage().await
    }
}

/// 容器状态分类：常驻服务需要运行且运行时健康指示不为异常
pub fn classify_container(
    descriptor: &ServiceDescriptor,
    replicas: &[&ContainerState],
) -> ContainerCheck {
    let mut check = ContainerCheck {
        service: descriptor.name.clone(),
        state: None,
        runtime_health: None,
        verdict: Verdict::Unhealthy,
        detail: None,
    };

    if replicas.is_empty() {
        check.detail = Some("容器不存在".to_string());
        return check;
    }

    // 多副本时以最差的副本为准
    let worst = replicas
        .iter()
        .max_by_key(|c| container_rank(descriptor.expected_state, c))
        .copied()
        .unwrap_or(replicas[0]);

    check.state = Some(worst.state.clone());
    check.runtime_health = worst.runtime_health().map(|h| format!("{h:?}").to_lowercase());

    let (verdict, detail) = match descriptor.expected_state {
        ExpectedState::Running => match (worst.run_state(), worst.runtime_health()) {
            (RunState::Running, None | Some(RuntimeHealth::Healthy)) => (Verdict::Healthy, None),
            (RunState::Running, Some(RuntimeHealth::Starting)) => {
                (Verdict::Unhealthy, Some("启动中".to_string()))
            }
            (RunState::Running, Some(RuntimeHealth::Unhealthy)) => {
                (Verdict::Unhealthy, Some("运行时报告不健康".to_string()))
            }
            (state, _) => (Verdict::Unhealthy, Some(state.display_name().to_string())),
        },
        ExpectedState::Exited => match worst.run_state() {
            RunState::Exited if worst.exit_code == 0 => (Verdict::Healthy, None),
            RunState::Running => (Verdict::Unknown, Some("一次性任务仍在运行".to_string())),
            RunState::Exited => (
                Verdict::Unhealthy,
                Some(format!("退出码 {}", worst.exit_code)),
            ),
            state => (Verdict::Unhealthy, Some(state.display_name().to_string())),
        },
    };

    check.verdict = verdict;
    check.detail = detail;
    check
}

/// 越大越差
fn container_rank(expected: ExpectedState, container: &ContainerState) -> u8 {
    match expected {
        ExpectedState::Running => match (container.run_state(), container.runtime_health()) {
            (RunState::Running, None | Some(RuntimeHealth::Healthy)) => 0,
            (RunState::Running, Some(RuntimeHealth::Starting)) => 1,
            (RunState::Running, Some(RuntimeHealth::Unhealthy)) => 2,
            _ => 3,
        },
        ExpectedState::Exited => match container.run_state() {
            RunState::Exited if container.exit_code == 0 => 0,
            RunState::Running => 1,
            _ => 2,
        },
    }
}

/// 聚合：全部健康为健康；不健康占比不超过阈值为降级，否则不健康
///
/// 判定为 Unknown 的服务按不健康计数；没有任何服务或全部未知时整体为 Unknown。
pub fn aggregate(services: Vec<ServiceHealth>, threshold_percent: u8) -> SystemHealth {
    let total = services.len();
    let healthy = services.iter().filter(|s| s.verdict.is_healthy()).count();
    let unknown = services
        .iter()
        .filter(|s| s.verdict == Verdict::Unknown)
        .count();
    let unhealthy = total - healthy;

    let verdict = if total == 0 || unknown == total {
        Verdict::Unknown
    } else if unhealthy == 0 {
        Verdict::Healthy
    } else if unhealthy * 100 <= threshold_percent as usize * total {
        Verdict::Degraded
    } else {
        Verdict::Unhealthy
    };

    SystemHealth {
        verdict,
        healthy,
        total,
        unhealthy_services: services
            .iter()
            .filter(|s| !s.verdict.is_healthy())
            .map(|s| s.service.clone())
            .collect(),
        services,
        checked_at: Utc::now(),
    }
}

/// 统计匹配任意模式的日志行
pub fn scan_log_errors(
    service: &str,
    logs: &str,
    patterns: &[Regex],
    window_minutes: u64,
) -> ErrorScan {
    let matched: Vec<&str> = logs
        .lines()
        .filter(|line| patterns.iter().any(|p| p.is_match(line)))
        .collect();

    let samples = matched
        .iter()
        .rev()
        .take(MAX_ERROR_SAMPLES)
        .rev()
        .map(|line| line.trim().to_string())
        .collect();

    ErrorScan {
        service: service.to_string(),
        window_minutes,
        matches: matched.len(),
        samples,
    }
}

/// 连通性检查命令，`{url}` 替换为目标地址
fn integration_command(pair: &IntegrationPair, probe_timeout: Duration) -> Vec<String> {
    match &pair.command {
        Some(template) => template.iter().map(|arg| arg.replace("{url}", &pair.url)).collect(),
        None => vec![
            "curl".to_string(),
            "-fsS".to_string(),
            "-o".to_string(),
            "/dev/null".to_string(),
            "--max-time".to_string(),
            probe_timeout.as_secs().max(1).to_string(),
            pair.url.clone(),
        ],
    }
}
