use crate::app::CliApp;
use crate::cli::HealthSections;
use crate::utils::print_json;
use serde::Serialize;
use stack_core::{
    Result,
    container::ResourceUsage,
    error::exit_code,
    health::{
        ErrorScan, IntegrationResult, ServiceDescriptor, ServiceHealth, SystemHealth, aggregate,
    },
};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{error, info, warn};

/// 一次健康检查的输出，未请求的部分为空
#[derive(Debug, Default, Serialize)]
struct HealthReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<SystemHealth>,
    #[serde(skip_serializing_if = "Option::is_none")]
    resources: Option<Vec<ResourceUsage>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_logs: Option<Vec<ErrorScan>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    integration: Option<Vec<IntegrationResult>>,
    exit_code: i32,
}

/// 执行一次健康检查
pub async fn run_health(app: &CliApp, sections: HealthSections, json: bool) -> Result<i32> {
    let report = collect(app, sections).await?;
    if json {
        print_json(&report)?;
    } else {
        show(&report);
    }
    Ok(report.exit_code)
}

/// 持续检查直到 Ctrl-C，返回最后一次检查的退出码
pub async fn run_health_watch(
    app: &CliApp,
    sections: HealthSections,
    interval: u64,
    json: bool,
) -> Result<i32> {
    let interval = Duration::from_secs(interval.max(1));
    info!("👀 持续健康检查，每 {} 秒一次，Ctrl-C 退出", interval.as_secs());

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut last = exit_code::SUCCESS;
    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            result = run_health(app, sections, json) => {
                last = result.unwrap_or_else(|e| {
                    error!("❌ 健康检查失败: {}", e);
                    e.exit_code()
                });
            }
        }

        tokio::select! {
            _ = &mut ctrl_c => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }

    info!("停止健康检查");
    Ok(last)
}

async fn collect(app: &CliApp, sections: HealthSections) -> Result<HealthReport> {
    let mut report = HealthReport::default();

    if sections.is_full() {
        report.system = Some(app.health.check().await?);
    } else if sections.containers || sections.services {
        report.system = Some(partial_check(app, sections).await);
    }

    if sections.resources {
        match app.health.resources().await {
            Ok(usage) => report.resources = Some(usage),
            Err(e) => warn!("⚠️  无法获取资源占用: {}", e),
        }
    }

    if sections.logs {
        report.error_logs = Some(app.health.scan_errors(app.health.descriptors()).await);
    }

    if sections.integration {
        report.integration = Some(
            app.health
                .check_integration(app.health.integration_pairs())
                .await,
        );
    }

    report.exit_code = exit_code_of(&report);
    Ok(report)
}

/// 只检查容器或只探测端点时，按请求的部分合并后聚合
async fn partial_check(app: &CliApp, sections: HealthSections) -> SystemHealth {
    // 只探测端点时，没有配置探测的服务不参与统计
    let descriptors: Vec<ServiceDescriptor> = app
        .health
        .descriptors()
        .iter()
        .filter(|d| sections.containers || d.probe.is_some())
        .cloned()
        .collect();

    let mut containers: HashMap<String, _> = if sections.containers {
        app.health
            .check_containers_or_unknown(&descriptors)
            .await
            .into_iter()
            .map(|c| (c.service.clone(), c))
            .collect()
    } else {
        HashMap::new()
    };
    let mut probes: HashMap<String, _> = if sections.services {
        app.health
            .check_endpoints(&descriptors)
            .await
            .into_iter()
            .map(|p| (p.service.clone(), p))
            .collect()
    } else {
        HashMap::new()
    };

    let services: Vec<ServiceHealth> = descriptors
        .iter()
        .map(|d| ServiceHealth::combine(&d.name, containers.remove(&d.name), probes.remove(&d.name)))
        .collect();
    aggregate(services, app.config.health.degraded_threshold_percent)
}

/// 判定决定退出码；连通性失败需要关注；日志错误和资源占用只做展示
fn exit_code_of(report: &HealthReport) -> i32 {
    let mut code = report
        .system
        .as_ref()
        .map_or(exit_code::SUCCESS, |s| s.verdict.exit_code());

    let integration_failed = report
        .integration
        .as_ref()
        .is_some_and(|results| results.iter().any(|r| !r.reachable));
    if integration_failed && code == exit_code::SUCCESS {
        code = exit_code::ATTENTION;
    }
    code
}

fn show(report: &HealthReport) {
    if let Some(system) = &report.system {
        show_system(system);
    }
    if let Some(resources) = &report.resources {
        show_resources(resources);
    }
    if let Some(scans) = &report.error_logs {
        show_error_logs(scans);
    }
    if let Some(results) = &report.integration {
        show_integration(results);
    }
}

fn show_system(system: &SystemHealth) {
    info!(
        "{} 系统状态: {} ({} 个服务健康)",
        system.verdict.icon(),
        system.verdict.display_name(),
        system.headline()
    );
    for service in &system.services {
        let mut details = Vec::new();
        if let Some(container) = &service.container {
            details.push(format!(
                "容器 {}",
                container.state.as_deref().unwrap_or("不存在")
            ));
            if let Some(health) = &container.runtime_health {
                details.push(format!("运行时 {health}"));
            }
            if let Some(detail) = &container.detail {
                details.push(detail.clone());
            }
        }
        if let Some(probe) = &service.probe {
            details.push(format!(
                "{} {} ({} ms)",
                probe.target,
                probe.status.describe(),
                probe.latency_ms
            ));
        }
        info!(
            "   {} {:<28} {}",
            service.verdict.icon(),
            service.service,
            details.join(", ")
        );
    }
    if !system.unhealthy_services.is_empty() {
        warn!("   需要关注: {}", system.unhealthy_services.join(", "));
    }
}

fn show_resources(resources: &[ResourceUsage]) {
    info!("📈 资源占用:");
    for usage in resources {
        info!(
            "   {:<36} CPU {:>8}  内存 {:>8} ({})",
            usage.name, usage.cpu_percent, usage.mem_percent, usage.mem_usage
        );
    }
}

fn show_error_logs(scans: &[ErrorScan]) {
    let noisy: Vec<&ErrorScan> = scans.iter().filter(|s| s.matches > 0).collect();
    if noisy.is_empty() {
        info!("📝 最近的日志中没有错误");
        return;
    }
    info!("📝 最近 {} 分钟的错误日志:", noisy[0].window_minutes);
    for scan in noisy {
        warn!("   {} : {} 条", scan.service, scan.matches);
        for sample in &scan.samples {
            info!("      {}", sample);
        }
    }
}

fn show_integration(results: &[IntegrationResult]) {
    info!("🔗 服务间连通性:");
    for result in results {
        if result.reachable {
            info!(
                "   ✅ {} → {} ({} ms)",
                result.caller, result.dependency, result.latency_ms
            );
        } else {
            error!(
                "   ❌ {} → {}: {}",
                result.caller,
                result.dependency,
                result.detail.as_deref().unwrap_or("不可达")
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stack_core::health::Verdict;

    fn system(verdict: Verdict) -> SystemHealth {
        SystemHealth {
            verdict,
            healthy: 0,
            total: 0,
            unhealthy_services: Vec::new(),
            services: Vec::new(),
            checked_at: chrono::Utc::now(),
        }
    }

    fn pair(reachable: bool) -> IntegrationResult {
        IntegrationResult {
            caller: "astron-agent-core".to_string(),
            dependency: "minio".to_string(),
            url: "http://minio:9000/minio/health/live".to_string(),
            reachable,
            detail: None,
            latency_ms: 3,
        }
    }

    #[test]
    fn test_verdict_drives_exit_code() {
        let report = HealthReport {
            system: Some(system(Verdict::Unhealthy)),
            ..Default::default()
        };
        assert_eq!(exit_code_of(&report), exit_code::UNHEALTHY);

        let report = HealthReport {
            system: Some(system(Verdict::Healthy)),
            ..Default::default()
        };
        assert_eq!(exit_code_of(&report), exit_code::SUCCESS);
    }

    #[test]
    fn test_unreachable_dependency_needs_attention() {
        let report = HealthReport {
            system: Some(system(Verdict::Healthy)),
            integration: Some(vec![pair(true), pair(false)]),
            ..Default::default()
        };
        assert_eq!(exit_code_of(&report), exit_code::ATTENTION);

        // 不健康优先
        let report = HealthReport {
            system: Some(system(Verdict::Unhealthy)),
            integration: Some(vec![pair(false)]),
            ..Default::default()
        };
        assert_eq!(exit_code_of(&report), exit_code::UNHEALTHY);
    }

    #[test]
    fn test_error_logs_do_not_change_exit_code() {
        let report = HealthReport {
            error_logs: Some(vec![ErrorScan {
                service: "nginx".to_string(),
                window_minutes: 10,
                matches: 42,
                samples: vec!["[error] upstream timed out".to_string()],
            }]),
            ..Default::default()
        };
        assert_eq!(exit_code_of(&report), exit_code::SUCCESS);
    }
}
