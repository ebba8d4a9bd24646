//! 回滚编排：校验 → 停止 → 恢复配置 → 恢复数据卷 → 启动 → 验证
//!
//! 各阶段严格按顺序执行，前一阶段失败后不会进入下一阶段。已完成的阶段不会自动撤销，
//! 失败时报告最后完成的阶段，由运维人员决定从哪里继续。

use crate::backup::{BackupManager, BackupRecord, ValidationReport};
use crate::config::RollbackConfig;
use crate::constants::groups::ALL;
use crate::groups::{ResolvedTarget, Tier};
use crate::service_group::ServiceGroupManager;
use crate::{Result, StackError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// 回滚阶段，声明顺序即执行顺序
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    Validate,
    Stop,
    RestoreConfig,
    RestoreVolumes,
    Start,
    Verify,
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Stage::Validate,
        Stage::Stop,
        Stage::RestoreConfig,
        Stage::RestoreVolumes,
        Stage::Start,
        Stage::Verify,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Validate => "validate",
            Stage::Stop => "stop",
            Stage::RestoreConfig => "restore-config",
            Stage::RestoreVolumes => "restore-volumes",
            Stage::Start => "start",
            Stage::Verify => "verify",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Stage::Validate => "校验备份",
            Stage::Stop => "停止服务",
            Stage::RestoreConfig => "恢复配置",
            Stage::RestoreVolumes => "恢复数据卷",
            Stage::Start => "启动服务",
            Stage::Verify => "验证服务",
        }
    }

    /// 进入该阶段是否会修改系统状态
    pub fn mutates_state(&self) -> bool {
        !matches!(self, Stage::Validate | Stage::Verify)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageStatus {
    Pending,
    Success,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageRecord {
    pub stage: Stage,
    pub status: StageStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub detail: Option<String>,
    /// 本阶段跳过的产物（仅数据卷恢复阶段使用）
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skipped_artifacts: Vec<String>,
}

impl StageRecord {
    fn pending(stage: Stage) -> Self {
        Self {
            stage,
            status: StageStatus::Pending,
            started_at: None,
            finished_at: None,
            detail: None,
            skipped_artifacts: Vec::new(),
        }
    }

    fn is_completed(&self) -> bool {
        matches!(self.status, StageStatus::Success | StageStatus::Skipped)
    }
}

/// 回滚的最终结果
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    InProgress,
    Success,
    /// 在停止服务之前中止，没有任何修改
    Aborted,
    /// 停止阶段失败，服务处于混合状态
    StopFailed,
    /// 之后的阶段失败，状态已被部分修改
    Failed,
    /// 所有修改都已应用，但服务没有在期限内就绪
    VerificationFailed,
}

impl RunOutcome {
    pub fn display_name(&self) -> &'static str {
        match self {
            RunOutcome::InProgress => "进行中",
            RunOutcome::Success => "回滚成功",
            RunOutcome::Aborted => "已中止，未做任何修改",
            RunOutcome::StopFailed => "已中止，服务处于混合状态",
            RunOutcome::Failed => "回滚失败，需要人工介入",
            RunOutcome::VerificationFailed => "回滚已完成，但服务验证未通过",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationSummary {
    pub running: usize,
    pub required: usize,
    pub waited_secs: u64,
}

/// 一次回滚运行的记录，逐阶段更新并持久化到运行记录目录
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RollbackRun {
    pub run_id: String,
    pub backup_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub stages: Vec<StageRecord>,
    pub outcome: RunOutcome,
    pub reason: Option<String>,
    /// 回滚前当前配置的安全副本
    pub safety_copy: Option<String>,
    pub verification: Option<VerificationSummary>,
    /// 运行记录文件
    pub log_path: Option<String>,
}

impl RollbackRun {
    pub fn new(backup_id: &str, runs_dir: Option<&Path>) -> Self {
        let started_at = Utc::now();
        let run_id = format!("{}-{}", started_at.format("%Y%m%dT%H%M%S%3f"), backup_id);
        let log_path = runs_dir.map(|dir| {
            dir.join(format!("{run_id}.json"))
                .to_string_lossy()
                .to_string()
        });

        Self {
            run_id,
            backup_id: backup_id.to_string(),
            started_at,
            finished_at: None,
            stages: Stage::ALL.iter().map(|s| StageRecord::pending(*s)).collect(),
            outcome: RunOutcome::InProgress,
            reason: None,
            safety_copy: None,
            verification: None,
            log_path,
        }
    }

    pub fn stage(&self, stage: Stage) -> &StageRecord {
        &self.stages[stage as usize]
    }

    fn stage_mut(&mut self, stage: Stage) -> &mut StageRecord {
        &mut self.stages[stage as usize]
    }

    fn begin(&mut self, stage: Stage) {
        info!("▶️  {}", stage.display_name());
        let record = self.stage_mut(stage);
        record.started_at = Some(Utc::now());
    }

    fn finish_stage(&mut self, stage: Stage, status: StageStatus, detail: Option<String>) {
        let record = self.stage_mut(stage);
        record.status = status;
        record.finished_at = Some(Utc::now());
        record.detail = detail;
    }

    fn finish(&mut self, outcome: RunOutcome, reason: Option<String>) {
        self.outcome = outcome;
        self.reason = reason;
        self.finished_at = Some(Utc::now());
    }

    /// 最后一个完成（成功或跳过）的阶段
    pub fn furthest_completed(&self) -> Option<Stage> {
        self.stages
            .iter()
            .take_while(|s| s.is_completed())
            .last()
            .map(|s| s.stage)
    }

    pub fn failed_stage(&self) -> Option<Stage> {
        self.stages
            .iter()
            .find(|s| s.status == StageStatus::Failed)
            .map(|s| s.stage)
    }

    /// 是否进入过会修改状态的阶段
    pub fn state_mutated(&self) -> bool {
        self.stages
            .iter()
            .any(|s| s.stage.mutates_state() && s.started_at.is_some())
    }

    /// 转换为错误分类，便于调用方映射退出码
    pub fn into_result(self) -> Result<Self> {
        let reason = self.reason.clone().unwrap_or_default();
        match self.outcome {
            RunOutcome::Success => Ok(self),
            RunOutcome::Aborted => Err(StackError::precondition(reason)),
            RunOutcome::VerificationFailed => {
                let summary = self.verification.unwrap_or(VerificationSummary {
                    running: 0,
                    required: 0,
                    waited_secs: 0,
                });
                Err(StackError::VerificationTimeout {
                    running: summary.running,
                    required: summary.required,
                    waited_secs: summary.waited_secs,
                })
            }
            RunOutcome::StopFailed | RunOutcome::Failed => Err(StackError::StageFailed {
                stage: self
                    .failed_stage()
                    .map(|s| s.as_str().to_string())
                    .unwrap_or_default(),
                furthest_completed: self.furthest_completed().map(|s| s.as_str().to_string()),
                state_mutated: self.state_mutated(),
                reason,
            }),
            RunOutcome::InProgress => Err(StackError::custom("回滚尚未结束")),
        }
    }
}

/// 试运行结果：校验并列出将要执行的动作，不做任何修改
#[derive(Debug, Clone, Serialize)]
pub struct RollbackPlan {
    pub backup: BackupRecord,
    pub report: ValidationReport,
    pub stop_order: Vec<Tier>,
    pub start_order: Vec<Tier>,
    pub volumes_to_restore: Vec<String>,
    pub volumes_skipped: Vec<String>,
    pub required_running: usize,
}

/// 回滚编排器
pub struct RollbackOrchestrator {
    backups: BackupManager,
    groups: ServiceGroupManager,
    settings: RollbackConfig,
}

impl RollbackOrchestrator {
    pub fn new(backups: BackupManager, groups: ServiceGroupManager, settings: RollbackConfig) -> Self {
        Self {
            backups,
            groups,
            settings,
        }
    }

    fn runs_dir(&self) -> PathBuf {
        PathBuf::from(&self.settings.runs_dir)
    }

    /// 校验并生成执行计划；校验不通过视为前置条件错误
    pub async fn plan(&self, backup_id: &str) -> Result<RollbackPlan> {
        let (backup, report, target) = self.preflight(backup_id).await?;
        let damaged = report.damaged_artifacts();

        let (volumes_skipped, volumes_to_restore): (Vec<String>, Vec<String>) = backup
            .volume_artifacts()
            .map(|a| a.name.clone())
            .partition(|name| damaged.contains(name));

        Ok(RollbackPlan {
            stop_order: target.stop_tiers(),
            start_order: target.tiers.clone(),
            required_running: self.required_running(&target),
            backup,
            report,
            volumes_to_restore,
            volumes_skipped,
        })
    }

    /// 执行回滚。总是返回运行记录，调用方通过 `into_result` 获取错误分类
    ///
    /// 取消只在停止服务之前生效；越过停止阶段后部分完成是不安全的，取消请求会被忽略。
    pub async fn execute(&self, backup_id: &str, cancel: &CancellationToken) -> RollbackRun {
        let runs_dir = self.runs_dir();
        let mut run = RollbackRun::new(backup_id, Some(&runs_dir));
        info!("开始回滚到备份: {} (运行记录: {})", backup_id, run.run_id);

        if cancel.is_cancelled() {
            return self.abort(run, Stage::Validate, "回滚已取消");
        }

        // 1. 校验
        run.begin(Stage::Validate);
        self.persist(&run);
        let (record, report, target) = match self
            .within_stage(Stage::Validate, self.preflight(backup_id))
            .await
        {
            Ok(v) => v,
            Err(e) => {
                error!("❌ 备份校验失败，未做任何修改: {}", e);
                run.finish_stage(Stage::Validate, StageStatus::Failed, Some(e.to_string()));
                run.finish(RunOutcome::Aborted, Some(e.to_string()));
                self.persist(&run);
                return run;
            }
        };
        let warnings = report.warnings().len();
        run.finish_stage(
            Stage::Validate,
            StageStatus::Success,
            (!report.issues.is_empty()).then(|| report.summary()),
        );
        if warnings > 0 {
            warn!("备份校验通过，但有 {} 条警告", warnings);
        }

        if cancel.is_cancelled() {
            return self.abort(run, Stage::Stop, "回滚已取消");
        }

        // 2. 停止（按依赖逆序）
        run.begin(Stage::Stop);
        self.persist(&run);
        let stopped = self
            .within_stage(Stage::Stop, async {
                self.groups.stop(&target).await.into_result().map(|_| ())
            })
            .await;
        if let Err(e) = stopped {
            error!("❌ 停止服务失败，服务处于混合状态: {}", e);
            run.finish_stage(Stage::Stop, StageStatus::Failed, Some(e.to_string()));
            run.finish(
                RunOutcome::StopFailed,
                Some(format!("停止服务失败，服务处于混合状态: {e}")),
            );
            self.persist(&run);
            return run;
        }
        run.finish_stage(Stage::Stop, StageStatus::Success, None);
        self.persist(&run);

        let mut cancel_noted = false;
        let mut note_cancel = |stage: Stage| {
            if cancel.is_cancelled() && !cancel_noted {
                warn!("已越过停止阶段，忽略取消请求，继续执行: {}", stage.display_name());
                cancel_noted = true;
            }
        };

        // 3. 恢复配置
        note_cancel(Stage::RestoreConfig);
        run.begin(Stage::RestoreConfig);
        self.persist(&run);
        let restored = self
            .within_stage(Stage::RestoreConfig, async {
                let safety = self.backups.save_safety_copy().await?;
                self.backups.restore_config(&record).await?;
                Ok::<_, StackError>(safety)
            })
            .await;
        match restored {
            Ok(safety) => {
                let safety = safety.to_string_lossy().to_string();
                run.finish_stage(
                    Stage::RestoreConfig,
                    StageStatus::Success,
                    Some(format!("安全副本: {safety}")),
                );
                run.safety_copy = Some(safety);
            }
            Err(e) => {
                return self.fail(
                    run,
                    Stage::RestoreConfig,
                    format!("恢复配置失败，当前配置可能已被部分覆盖: {e}"),
                );
            }
        }
        self.persist(&run);

        // 4. 恢复数据卷
        note_cancel(Stage::RestoreVolumes);
        run.begin(Stage::RestoreVolumes);
        self.persist(&run);
        let damaged = report.damaged_artifacts();
        let volumes = self
            .within_stage(Stage::RestoreVolumes, self.restore_volumes(&record, &damaged))
            .await;
        match volumes {
            Ok((restored, skipped)) => {
                let status = if restored.is_empty() && !skipped.is_empty() {
                    StageStatus::Skipped
                } else {
                    StageStatus::Success
                };
                let mut detail = format!("已恢复 {} 个卷", restored.len());
                if !skipped.is_empty() {
                    detail.push_str(&format!(", 跳过: {}", skipped.join(", ")));
                }
                run.finish_stage(Stage::RestoreVolumes, status, Some(detail));
                run.stage_mut(Stage::RestoreVolumes).skipped_artifacts = skipped;
            }
            Err(e) => {
                return self.fail(run, Stage::RestoreVolumes, format!("解压数据卷失败: {e}"));
            }
        }
        self.persist(&run);

        // 5. 启动（按依赖顺序）
        note_cancel(Stage::Start);
        run.begin(Stage::Start);
        self.persist(&run);
        let started = self
            .within_stage(Stage::Start, async {
                self.groups.start(&target).await.into_result().map(|_| ())
            })
            .await;
        if let Err(e) = started {
            return self.fail(
                run,
                Stage::Start,
                format!("卷和配置已恢复，但服务未能启动，需要人工处理: {e}"),
            );
        }
        run.finish_stage(Stage::Start, StageStatus::Success, None);
        self.persist(&run);

        // 6. 验证
        note_cancel(Stage::Verify);
        run.begin(Stage::Verify);
        self.persist(&run);
        let summary = self.verify(&target).await;
        run.verification = Some(summary);
        let detail = format!("{}/{} 个服务运行中", summary.running, summary.required);

        if summary.running >= summary.required {
            run.finish_stage(Stage::Verify, StageStatus::Success, Some(detail));
            run.finish(RunOutcome::Success, None);
            info!("✅ 回滚完成: {}", backup_id);
        } else {
            warn!(
                "⚠️  回滚已应用，但 {} 秒内只有 {}/{} 个服务进入运行状态",
                summary.waited_secs, summary.running, summary.required
            );
            run.finish_stage(Stage::Verify, StageStatus::Failed, Some(detail.clone()));
            run.finish(
                RunOutcome::VerificationFailed,
                Some(format!("验证超时: {detail}")),
            );
        }
        self.persist(&run);
        run
    }

    /// 预检：校验备份并解析 `all` 目标
    async fn preflight(&self, backup_id: &str) -> Result<(BackupRecord, ValidationReport, ResolvedTarget)> {
        let report = self.backups.validate_backup(backup_id).await?;
        if !report.passed() {
            return Err(StackError::precondition(format!(
                "备份 {backup_id} 校验失败: {}",
                report.summary()
            )));
        }
        let record = self.backups.get_backup(backup_id)?;
        let target = self.groups.resolve(ALL)?;
        Ok((record, report, target))
    }

    /// 损坏或缺失的卷归档跳过；已通过校验的归档解压出错则整体失败
    async fn restore_volumes(
        &self,
        record: &BackupRecord,
        damaged: &[String],
    ) -> Result<(Vec<String>, Vec<String>)> {
        let mut restored = Vec::new();
        let mut skipped = Vec::new();

        for artifact in record.volume_artifacts() {
            let archive = self.backups.backup_dir(&record.id).join(&artifact.file);
            if damaged.contains(&artifact.name) || !archive.exists() {
                warn!("⚠️  跳过数据卷 {}: 归档缺失或已损坏", artifact.name);
                skipped.push(artifact.name.clone());
                continue;
            }

            info!("恢复数据卷: {}", artifact.name);
            self.backups.restore_volume(record, artifact).await?;
            restored.push(artifact.name.clone());
        }

        for failure in &record.failures {
            warn!(
                "备份创建时未能采集 {}，该数据保持现状: {}",
                failure.artifact, failure.reason
            );
        }

        Ok((restored, skipped))
    }

    fn required_running(&self, target: &ResolvedTarget) -> usize {
        self.settings
            .min_running_services
            .unwrap_or_else(|| target.len())
    }

    /// 轮询直到足够多的服务进入运行状态或超时
    async fn verify(&self, target: &ResolvedTarget) -> VerificationSummary {
        let required = self.required_running(target);
        let expected: HashSet<String> = target.services().into_iter().collect();
        let orchestrator = self.groups.orchestrator();
        let timeout = Duration::from_secs(self.settings.verify_timeout_secs);
        let interval = Duration::from_secs(self.settings.verify_interval_secs.max(1));
        let started = Instant::now();

        loop {
            let running = match orchestrator.list_containers().await {
                Ok(containers) => containers
                    .iter()
                    .filter(|c| c.is_running() && expected.contains(&c.service))
                    .map(|c| c.service.as_str())
                    .collect::<HashSet<_>>()
                    .len(),
                Err(e) => {
                    warn!("读取容器状态失败: {}", e);
                    0
                }
            };

            let waited_secs = started.elapsed().as_secs();
            if running >= required || started.elapsed() >= timeout {
                return VerificationSummary {
                    running,
                    required,
                    waited_secs,
                };
            }

            info!("等待服务启动: {}/{}", running, required);
            tokio::time::sleep(interval).await;
        }
    }

    async fn within_stage<T>(&self, stage: Stage, fut: impl Future<Output = Result<T>>) -> Result<T> {
        let limit = Duration::from_secs(self.settings.stage_timeout_secs);
        tokio::time::timeout(limit, fut).await.map_err(|_| {
            StackError::custom(format!(
                "{} 超时 ({} 秒)",
                stage.display_name(),
                limit.as_secs()
            ))
        })?
    }

    fn abort(&self, mut run: RollbackRun, at: Stage, reason: &str) -> RollbackRun {
        warn!("{}，在 {} 之前中止，未做任何修改", reason, at.display_name());
        run.finish(RunOutcome::Aborted, Some(reason.to_string()));
        self.persist(&run);
        run
    }

    fn fail(&self, mut run: RollbackRun, stage: Stage, reason: String) -> RollbackRun {
        error!("❌ {}: {}", stage.display_name(), reason);
        error!(
            "最后完成的阶段: {}",
            run.furthest_completed().map(|s| s.display_name()).unwrap_or("无")
        );
        run.finish_stage(stage, StageStatus::Failed, Some(reason.clone()));
        run.finish(RunOutcome::Failed, Some(reason));
        self.persist(&run);
        run
    }

    /// 写入运行记录；失败只记录警告，不影响回滚本身
    fn persist(&self, run: &RollbackRun) {
        let Some(path) = &run.log_path else {
            return;
        };
        let result = std::fs::create_dir_all(self.runs_dir())
            .map_err(StackError::from)
            .and_then(|_| Ok(serde_json::to_vec_pretty(run)?))
            .and_then(|body| Ok(std::fs::write(path, body)?));
        if let Err(e) = result {
            warn!("写入回滚运行记录失败: {}", e);
        }
    }
}

/// 读取运行记录目录中的历史回滚，按时间从新到旧
pub fn list_runs(runs_dir: &Path) -> Result<Vec<RollbackRun>> {
    if !runs_dir.exists() {
        return Ok(Vec::new());
    }
    let mut runs = Vec::new();
    for entry in std::fs::read_dir(runs_dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        match std::fs::read(&path)
            .map_err(StackError::from)
            .and_then(|body| Ok(serde_json::from_slice::<RollbackRun>(&body)?))
        {
            Ok(run) => runs.push(run),
            Err(e) => warn!("无法解析回滚运行记录 {}: {}", path.display(), e),
        }
    }
    runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
    Ok(runs)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run_through(completed: &[Stage], failed: Option<Stage>) -> RollbackRun {
        let mut run = RollbackRun::new("2024-01-01T00-00-00", None);
        for stage in completed {
            run.begin(*stage);
            run.finish_stage(*stage, StageStatus::Success, None);
        }
        if let Some(stage) = failed {
            run.begin(stage);
            run.finish_stage(stage, StageStatus::Failed, Some("boom".to_string()));
        }
        run
    }

    #[test]
    fn test_stage_order_matches_declaration() {
        let mut sorted = Stage::ALL;
        sorted.sort();
        assert_eq!(sorted, Stage::ALL);
        for (index, stage) in Stage::ALL.iter().enumerate() {
            assert_eq!(*stage as usize, index);
        }
    }

    #[test]
    fn test_new_run_is_all_pending() {
        let run = RollbackRun::new("2024-01-01T00-00-00", Some(Path::new("/tmp/runs")));
        assert!(run.stages.iter().all(|s| s.status == StageStatus::Pending));
        assert!(run.furthest_completed().is_none());
        assert!(!run.state_mutated());
        assert!(run.log_path.unwrap().ends_with("-2024-01-01T00-00-00.json"));
    }

    #[test]
    fn test_validation_failure_is_refusal() {
        let mut run = run_through(&[], Some(Stage::Validate));
        run.finish(RunOutcome::Aborted, Some("备份不存在".to_string()));
        assert!(!run.state_mutated());

        let err = run.into_result().unwrap_err();
        assert!(err.is_refusal());
    }

    #[test]
    fn test_start_failure_reports_furthest_stage() {
        let mut run = run_through(
            &[Stage::Validate, Stage::Stop, Stage::RestoreConfig, Stage::RestoreVolumes],
            Some(Stage::Start),
        );
        run.finish(RunOutcome::Failed, Some("mysql 启动失败".to_string()));
        assert_eq!(run.furthest_completed(), Some(Stage::RestoreVolumes));

        match run.into_result().unwrap_err() {
            StackError::StageFailed {
                stage,
                furthest_completed,
                state_mutated,
                ..
            } => {
                assert_eq!(stage, "start");
                assert_eq!(furthest_completed.as_deref(), Some("restore-volumes"));
                assert!(state_mutated);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_stop_failure_counts_as_mutated() {
        let mut run = run_through(&[Stage::Validate], Some(Stage::Stop));
        run.finish(RunOutcome::StopFailed, Some("混合状态".to_string()));
        assert!(run.state_mutated());
        assert_eq!(run.furthest_completed(), Some(Stage::Validate));
    }

    #[test]
    fn test_verification_timeout_is_attention_not_failure() {
        let mut run = run_through(&Stage::ALL[..5], Some(Stage::Verify));
        run.verification = Some(VerificationSummary {
            running: 3,
            required: 5,
            waited_secs: 120,
        });
        run.finish(RunOutcome::VerificationFailed, None);

        let err = run.into_result().unwrap_err();
        assert!(matches!(err, StackError::VerificationTimeout { running: 3, .. }));
        assert_eq!(err.exit_code(), crate::error::exit_code::ATTENTION);
    }

    #[test]
    fn test_skipped_stage_counts_as_completed() {
        let mut run = run_through(&[Stage::Validate, Stage::Stop, Stage::RestoreConfig], None);
        run.begin(Stage::RestoreVolumes);
        run.finish_stage(Stage::RestoreVolumes, StageStatus::Skipped, None);
        assert_eq!(run.furthest_completed(), Some(Stage::RestoreVolumes));
    }

    #[test]
    fn test_run_record_round_trips_through_json() {
        let run = run_through(&[Stage::Validate], None);
        let body = serde_json::to_string(&run).unwrap();
        assert!(body.contains("\"restore-volumes\""));
        let parsed: RollbackRun = serde_json::from_str(&body).unwrap();
        assert_eq!(parsed.stage(Stage::Validate).status, StageStatus::Success);
    }
}
