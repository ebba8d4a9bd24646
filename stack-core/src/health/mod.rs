//! 健康检查：容器状态、端点探测、服务间连通性、日志错误扫描和整体判定

mod aggregator;
mod probe;
pub mod types;

pub use aggregator::{HealthAggregator, aggregate, classify_container, scan_log_errors};
pub use probe::Prober;
pub use types::{
    ContainerCheck, ErrorScan, ExpectedState, IntegrationPair, IntegrationResult, Probe,
    ProbeResult, ProbeStatus, ServiceDescriptor, ServiceHealth, SystemHealth, Verdict,
};
