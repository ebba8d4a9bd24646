use crate::{
    StackError, Result,
    config::{BackupConfig, RetentionConfig, VolumeConfig},
    constants::{backup as consts, timeout},
};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use walkdir::WalkDir;

/// 备份状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupStatus {
    /// 正在创建；中断后残留的该状态视为失败
    InProgress,
    Success,
    /// 部分产物采集失败，仍可用于仅恢复配置
    Partial,
    Failed,
}

impl BackupStatus {
    pub fn display_name(&self) -> &'static str {
        match self {
            BackupStatus::InProgress => "创建中",
            BackupStatus::Success => "成功",
            BackupStatus::Partial => "部分成功",
            BackupStatus::Failed => "失败",
        }
    }
}

/// 备份产物类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Config,
    Volume,
}

/// 单个备份产物
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRecord {
    pub name: String,
    pub kind: ArtifactKind,
    /// 相对备份目录的文件路径
    pub file: String,
    /// 采集来源路径
    pub source_path: String,
    pub size_bytes: u64,
    pub sha256: String,
    pub required: bool,
}

/// 采集失败的产物
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureFailure {
    pub artifact: String,
    pub reason: String,
}

/// 来源信息
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceInfo {
    pub git_commit: Option<String>,
    pub git_branch: Option<String>,
    pub docker_version: Option<String>,
    pub tool_version: String,
    /// 创建时指定的标签，如 pre-update
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tag: Option<String>,
}

/// 备份记录，即备份目录中的 metadata.json
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupRecord {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: BackupStatus,
    pub size_bytes: u64,
    pub artifacts: Vec<ArtifactRecord>,
    #[serde(default)]
    pub failures: Vec<CaptureFailure>,
    pub source: SourceInfo,
}

impl BackupRecord {
    fn in_progress(id: String, created_at: DateTime<Utc>, source: SourceInfo) -> Self {
        Self {
            id,
            created_at,
            finished_at: None,
            status: BackupStatus::InProgress,
            size_bytes: 0,
            artifacts: Vec::new(),
            failures: Vec::new(),
            source,
        }
    }

    /// 元数据缺失或损坏的目录，按失败记录呈现
    fn unreadable(id: &str) -> Self {
        Self {
            id: id.to_string(),
            created_at: parse_id_time(id).unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
            finished_at: None,
            status: BackupStatus::Failed,
            size_bytes: 0,
            artifacts: Vec::new(),
            failures: vec![CaptureFailure {
                artifact: consts::METADATA_FILE.to_string(),
                reason: "元数据缺失或无法解析".to_string(),
            }],
            source: SourceInfo::default(),
        }
    }

    /// 中断的采集（仍为 InProgress）按失败处理
    pub fn effective_status(&self) -> BackupStatus {
        match self.status {
            BackupStatus::InProgress => BackupStatus::Failed,
            status => status,
        }
    }

    pub fn is_usable(&self) -> bool {
        matches!(
            self.effective_status(),
            BackupStatus::Success | BackupStatus::Partial
        )
    }

    pub fn artifact_names(&self) -> Vec<&str> {
        self.artifacts.iter().map(|a| a.name.as_str()).collect()
    }

    pub fn config_artifact(&self) -> Option<&ArtifactRecord> {
        self.artifacts.iter().find(|a| a.kind == ArtifactKind::Config)
    }

    pub fn volume_artifacts(&self) -> impl Iterator<Item = &ArtifactRecord> {
        self.artifacts.iter().filter(|a| a.kind == ArtifactKind::Volume)
    }
}

/// 校验问题的严重程度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueSeverity {
    /// 整个备份不可用
    Fatal,
    /// 单个卷产物损坏，其余部分仍可恢复
    Artifact,
    /// 仅提示
    Warning,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub severity: IssueSeverity,
    pub artifact: Option<String>,
    pub message: String,
}

/// 备份校验报告，包含检测到的全部问题
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReport {
    pub backup_id: String,
    pub issues: Vec<ValidationIssue>,
}

impl ValidationReport {
    fn new(backup_id: &str) -> Self {
        Self {
            backup_id: backup_id.to_string(),
            issues: Vec::new(),
        }
    }

    fn push(&mut self, severity: IssueSeverity, artifact: Option<&str>, message: impl Into<String>) {
        self.issues.push(ValidationIssue {
            severity,
            artifact: artifact.map(str::to_string),
            message: message.into(),
        });
    }

    /// 是否可以作为回滚源（没有致命问题）
    pub fn passed(&self) -> bool {
        !self.issues.iter().any(|i| i.severity == IssueSeverity::Fatal)
    }

    /// 致命问题和产物问题
    pub fn problems(&self) -> Vec<&ValidationIssue> {
        self.issues
            .iter()
            .filter(|i| i.severity != IssueSeverity::Warning)
            .collect()
    }

    pub fn warnings(&self) -> Vec<&ValidationIssue> {
        self.issues
            .iter()
            .filter(|i| i.severity == IssueSeverity::Warning)
            .collect()
    }

    /// 损坏的卷产物名称，回滚时跳过
    pub fn damaged_artifacts(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .issues
            .iter()
            .filter(|i| i.severity == IssueSeverity::Artifact)
            .filter_map(|i| i.artifact.clone())
            .collect();
        names.dedup();
        names
    }

    pub fn summary(&self) -> String {
        self.issues
            .iter()
            .map(|i| match &i.artifact {
                Some(artifact) => format!("[{artifact}] {}", i.message),
                None => i.message.clone(),
            })
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// 备份列表，按创建时间从新到旧。迭代是惰性的，可以多次调用 `iter()` 重新开始
#[derive(Debug, Clone)]
pub struct BackupListing {
    storage_dir: PathBuf,
    ids: Vec<String>,
    include_failed: bool,
}

impl BackupListing {
    pub fn iter(&self) -> impl Iterator<Item = BackupRecord> + '_ {
        self.ids
            .iter()
            .map(|id| read_metadata(&self.storage_dir.join(id)).unwrap_or_else(|_| BackupRecord::unreadable(id)))
            .filter(|record| self.include_failed || record.is_usable())
    }

    /// 目录数量（包括可能被过滤掉的失败备份）
    pub fn candidate_count(&self) -> usize {
        self.ids.len()
    }
}

/// 备份管理器
#[derive(Debug, Clone)]
pub struct BackupManager {
    storage_dir: PathBuf,
    config_root: PathBuf,
    config_files: Vec<String>,
    safety_dir: PathBuf,
    volumes: Vec<VolumeConfig>,
    compression_level: u32,
}

impl BackupManager {
    /// 创建新的备份管理器
    pub fn new(config: &BackupConfig) -> Result<Self> {
        let storage_dir = PathBuf::from(&config.storage_dir);
        if !storage_dir.exists() {
            std::fs::create_dir_all(&storage_dir)?;
        }

        Ok(Self {
            storage_dir,
            config_root: PathBuf::from(&config.config_root),
            config_files: config.config_files.clone(),
            safety_dir: PathBuf::from(&config.safety_dir),
            volumes: config.volumes.clone(),
            compression_level: config.compression_level,
        })
    }

    /// 获取存储目录
    pub fn get_storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    pub fn get_config_root(&self) -> &Path {
        &self.config_root
    }

    pub fn backup_dir(&self, id: &str) -> PathBuf {
        self.storage_dir.join(id)
    }

    /// 创建备份：配置快照 + 每个持久化卷一个归档 + 元数据
    ///
    /// 单个产物失败不会中断其余采集，最终状态为 Partial；元数据写入失败则整个调用失败。
    pub async fn create_backup(&self) -> Result<BackupRecord> {
        self.create_tagged_backup(None).await
    }

    /// 同 `create_backup`，标签写入元数据的来源信息，不影响备份ID
    pub async fn create_tagged_backup(&self, tag: Option<&str>) -> Result<BackupRecord> {
        if let Some(tag) = tag {
            check_tag(tag)?;
        }
        let created_at = Utc::now();
        let (id, backup_dir) = self.allocate_backup_dir(created_at)?;
        tracing::info!("开始创建备份: {}", backup_dir.display());

        let mut source = collect_source_info(&self.config_root).await;
        source.tag = tag.map(str::to_string);
        let mut record = BackupRecord::in_progress(id.clone(), created_at, source);

        if let Err(e) = write_metadata(&backup_dir, &record) {
            tracing::error!("写入备份元数据失败: {}", e);
            let _ = std::fs::remove_dir_all(&backup_dir);
            return Err(StackError::backup(format!("写入备份元数据失败: {e}")));
        }

        // 1. 配置快照
        match self.capture_config(&backup_dir).await {
            Ok(artifact) => {
                tracing::info!("✅ 配置快照完成 ({} 字节)", artifact.size_bytes);
                record.artifacts.push(artifact);
            }
            Err(e) => {
                tracing::error!("❌ 配置快照失败: {}", e);
                record.failures.push(CaptureFailure {
                    artifact: "config".to_string(),
                    reason: e.to_string(),
                });
            }
        }

        // 2. 持久化卷
        for volume in &self.volumes {
            let source_path = PathBuf::from(&volume.path);
            if !source_path.exists() {
                if volume.required {
                    tracing::error!("❌ 卷目录不存在: {} ({})", volume.name, volume.path);
                    record.failures.push(CaptureFailure {
                        artifact: volume.name.clone(),
                        reason: format!("卷目录不存在: {}", volume.path),
                    });
                } else {
                    tracing::warn!("⚠️  可选卷目录不存在，跳过: {}", volume.name);
                }
                continue;
            }

            match self.capture_volume(&backup_dir, volume).await {
                Ok(artifact) => {
                    tracing::info!("✅ 卷 {} 归档完成 ({} 字节)", volume.name, artifact.size_bytes);
                    record.artifacts.push(artifact);
                }
                Err(e) => {
                    tracing::error!("❌ 卷 {} 归档失败: {}", volume.name, e);
                    record.failures.push(CaptureFailure {
                        artifact: volume.name.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        record.status = if record.failures.is_empty() {
            BackupStatus::Success
        } else if record.artifacts.is_empty() {
            BackupStatus::Failed
        } else {
            BackupStatus::Partial
        };
        record.size_bytes = record.artifacts.iter().map(|a| a.size_bytes).sum();
        record.finished_at = Some(Utc::now());

        write_metadata(&backup_dir, &record)
            .map_err(|e| StackError::backup(format!("写入最终备份元数据失败: {e}")))?;

        match record.status {
            BackupStatus::Success => tracing::info!("备份创建成功: {}", id),
            BackupStatus::Partial => tracing::warn!(
                "备份部分成功: {} ({} 个产物失败)",
                id,
                record.failures.len()
            ),
            _ => tracing::error!("备份失败: {}", id),
        }

        Ok(record)
    }

    /// 分配备份目录；同一秒内的重复创建使用 -NN 后缀，保证字典序与时间序一致
    fn allocate_backup_dir(&self, created_at: DateTime<Utc>) -> Result<(String, PathBuf)> {
        std::fs::create_dir_all(&self.storage_dir)?;
        let base = created_at.format(consts::ID_TIME_FORMAT).to_string();

        let candidates = std::iter::once(base.clone()).chain(
            (1..=consts::MAX_SAME_SECOND_BACKUPS).map(|n| format!("{base}-{n:02}")),
        );

        for id in candidates {
            let dir = self.storage_dir.join(&id);
            match std::fs::create_dir(&dir) {
                Ok(()) => return Ok((id, dir)),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(e) => return Err(e.into()),
            }
        }

        Err(StackError::backup(format!("同一秒内创建的备份过多: {base}")))
    }

    async fn capture_config(&self, backup_dir: &Path) -> Result<ArtifactRecord> {
        if !self.config_root.exists() {
            return Err(StackError::backup(format!(
                "配置目录不存在: {}",
                self.config_root.display()
            )));
        }

        let present: Vec<String> = self
            .config_files
            .iter()
            .filter(|rel| {
                let exists = self.config_root.join(rel.as_str()).exists();
                if !exists {
                    tracing::warn!("配置文件不存在，跳过: {}", rel);
                }
                exists
            })
            .cloned()
            .collect();

        if present.is_empty() {
            return Err(StackError::backup("没有找到任何配置文件"));
        }

        let dest = backup_dir.join(consts::CONFIG_ARCHIVE);
        let (size_bytes, sha256) = archive_into(
            self.config_root.clone(),
            Some(present),
            dest,
            self.compression_level,
        )
        .await?;

        Ok(ArtifactRecord {
            name: "config".to_string(),
            kind: ArtifactKind::Config,
            file: consts::CONFIG_ARCHIVE.to_string(),
            source_path: self.config_root.to_string_lossy().to_string(),
            size_bytes,
            sha256,
            required: true,
        })
    }

    async fn capture_volume(&self, backup_dir: &Path, volume: &VolumeConfig) -> Result<ArtifactRecord> {
        let file = format!(
            "{}/{}",
            consts::VOLUMES_DIR,
            consts::volume_archive_name(&volume.name)
        );
        let dest = backup_dir.join(&file);
        tokio::fs::create_dir_all(backup_dir.join(consts::VOLUMES_DIR)).await?;

        let result = archive_into(
            PathBuf::from(&volume.path),
            None,
            dest.clone(),
            self.compression_level,
        )
        .await;

        let (size_bytes, sha256) = match result {
            Ok(v) => v,
            Err(e) => {
                // 不保留写了一半的归档
                let _ = tokio::fs::remove_file(&dest).await;
                return Err(e);
            }
        };

        Ok(ArtifactRecord {
            name: volume.name.clone(),
            kind: ArtifactKind::Volume,
            file,
            source_path: volume.path.clone(),
            size_bytes,
            sha256,
            required: volume.required,
        })
    }

    /// 列出可用备份（成功和部分成功），从新到旧
    pub fn list_backups(&self) -> Result<BackupListing> {
        self.listing(false)
    }

    /// 列出所有备份，包括失败和中断的
    pub fn list_all_backups(&self) -> Result<BackupListing> {
        self.listing(true)
    }

    fn listing(&self, include_failed: bool) -> Result<BackupListing> {
        let mut ids = Vec::new();
        if self.storage_dir.exists() {
            for entry in std::fs::read_dir(&self.storage_dir)? {
                let entry = entry?;
                let name = entry.file_name().to_string_lossy().to_string();
                // 以点开头的是安全副本、运行记录等内部目录
                if name.starts_with('.') || !entry.file_type()?.is_dir() {
                    continue;
                }
                // 名称不是备份ID格式的目录不归本工具管理
                if parse_id_time(&name).is_none() {
                    tracing::debug!("跳过非备份目录: {}", name);
                    continue;
                }
                ids.push(name);
            }
        }
        ids.sort_unstable_by(|a, b| b.cmp(a));

        Ok(BackupListing {
            storage_dir: self.storage_dir.clone(),
            ids,
            include_failed,
        })
    }

    /// 最新的可用备份
    pub fn latest_backup(&self) -> Result<Option<BackupRecord>> {
        Ok(self.list_backups()?.iter().next())
    }

    /// 读取备份记录；备份不存在视为前置条件错误
    pub fn get_backup(&self, id: &str) -> Result<BackupRecord> {
        check_backup_id(id)?;
        let dir = self.backup_dir(id);
        if !dir.is_dir() {
            return Err(StackError::precondition(format!("备份不存在: {id}")));
        }
        read_metadata(&dir)
    }

    /// 校验备份：目录、元数据、必需产物、归档完整性。返回全部问题而不是第一个
    pub async fn validate_backup(&self, id: &str) -> Result<ValidationReport> {
        let mut report = ValidationReport::new(id);

        if let Err(e) = check_backup_id(id) {
            report.push(IssueSeverity::Fatal, None, e.to_string());
            return Ok(report);
        }

        let dir = self.backup_dir(id);
        if !dir.is_dir() {
            report.push(IssueSeverity::Fatal, None, format!("备份目录不存在: {}", dir.display()));
            return Ok(report);
        }

        let record = match read_metadata(&dir) {
            Ok(record) => record,
            Err(e) => {
                report.push(
                    IssueSeverity::Fatal,
                    Some(consts::METADATA_FILE),
                    format!("元数据无法解析: {e}"),
                );
                return Ok(report);
            }
        };

        if record.id != id {
            report.push(
                IssueSeverity::Fatal,
                Some(consts::METADATA_FILE),
                format!("元数据中的备份ID不匹配: {}", record.id),
            );
        }

        match record.effective_status() {
            BackupStatus::Failed => {
                report.push(IssueSeverity::Fatal, None, "备份未成功完成");
            }
            BackupStatus::Partial => {
                for failure in &record.failures {
                    report.push(
                        IssueSeverity::Warning,
                        Some(&failure.artifact),
                        format!("创建时采集失败: {}", failure.reason),
                    );
                }
            }
            _ => {}
        }

        if record.config_artifact().is_none() {
            report.push(IssueSeverity::Fatal, Some("config"), "缺少配置快照");
        }

        for artifact in &record.artifacts {
            // 已采集的卷归档损坏时无论是否必需都不能恢复
            let severity = match artifact.kind {
                ArtifactKind::Config => IssueSeverity::Fatal,
                ArtifactKind::Volume => IssueSeverity::Artifact,
            };
            for message in check_artifact(&dir, artifact).await? {
                report.push(severity, Some(&artifact.name), message);
            }
        }

        // 当前声明但备份中没有的卷
        for volume in &self.volumes {
            let captured = record.volume_artifacts().any(|a| a.name == volume.name);
            let reported = record.failures.iter().any(|f| f.artifact == volume.name);
            if !captured && !reported {
                report.push(
                    IssueSeverity::Warning,
                    Some(&volume.name),
                    "备份中不包含该卷，回滚时将保持现状",
                );
            }
        }

        if report.issues.is_empty() {
            tracing::info!("✅ 备份校验通过: {}", id);
        } else {
            tracing::warn!("备份 {} 校验发现 {} 个问题", id, report.issues.len());
        }

        Ok(report)
    }

    /// 回滚前把当前配置保存为带时间戳的安全副本
    pub async fn save_safety_copy(&self) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.safety_dir).await?;
        let name = format!(
            "config-{}{}",
            Utc::now().format("%Y-%m-%dT%H-%M-%S-%3f"),
            consts::ARCHIVE_EXTENSION
        );
        let dest = self.safety_dir.join(name);

        let present: Vec<String> = self
            .config_files
            .iter()
            .filter(|rel| self.config_root.join(rel.as_str()).exists())
            .cloned()
            .collect();

        archive_into(
            self.config_root.clone(),
            Some(present),
            dest.clone(),
            self.compression_level,
        )
        .await?;

        tracing::info!("当前配置已保存为安全副本: {}", dest.display());
        Ok(dest)
    }

    /// 用备份中的配置快照覆盖当前配置（非原子）
    pub async fn restore_config(&self, record: &BackupRecord) -> Result<()> {
        let artifact = record
            .config_artifact()
            .ok_or_else(|| StackError::backup(format!("备份 {} 不包含配置快照", record.id)))?;
        let archive = self.backup_dir(&record.id).join(&artifact.file);

        tokio::fs::create_dir_all(&self.config_root).await?;
        unpack_into(archive, self.config_root.clone()).await?;
        tracing::info!("配置已恢复到: {}", self.config_root.display());
        Ok(())
    }

    /// 恢复单个卷：先解压到同级临时目录，成功后再替换当前卷目录
    ///
    /// 解压失败时当前卷目录保持原样。
    pub async fn restore_volume(&self, record: &BackupRecord, artifact: &ArtifactRecord) -> Result<()> {
        let archive = self.backup_dir(&record.id).join(&artifact.file);
        if !archive.exists() {
            return Err(StackError::backup(format!(
                "卷归档不存在: {}",
                archive.display()
            )));
        }

        let target = self.volume_target(artifact);
        let staging = sibling_path(&target, "restoring")?;
        let replaced = sibling_path(&target, "replaced")?;
        for leftover in [&staging, &replaced] {
            if leftover.exists() {
                tokio::fs::remove_dir_all(leftover).await?;
            }
        }
        tokio::fs::create_dir_all(&staging).await?;

        if let Err(e) = unpack_into(archive, staging.clone()).await {
            tracing::error!("卷 {} 解压失败，保留当前数据: {}", artifact.name, e);
            let _ = tokio::fs::remove_dir_all(&staging).await;
            return Err(e);
        }

        if target.exists() {
            tokio::fs::rename(&target, &replaced).await?;
        }
        if let Err(e) = tokio::fs::rename(&staging, &target).await {
            // 换入失败时把原目录放回去
            if replaced.exists() {
                let _ = tokio::fs::rename(&replaced, &target).await;
            }
            return Err(e.into());
        }
        if replaced.exists() {
            tokio::fs::remove_dir_all(&replaced).await?;
        }

        tracing::info!("卷 {} 已恢复到: {}", artifact.name, target.display());
        Ok(())
    }

    /// 卷恢复目标：优先使用当前配置中的路径，否则使用备份时的来源路径
    pub fn volume_target(&self, artifact: &ArtifactRecord) -> PathBuf {
        self.volumes
            .iter()
            .find(|v| v.name == artifact.name)
            .map(|v| PathBuf::from(&v.path))
            .unwrap_or_else(|| PathBuf::from(&artifact.source_path))
    }

    /// 按保留策略清理备份（只在显式调用时执行）
    pub async fn prune_backups(&self, policy: &RetentionConfig) -> Result<Vec<String>> {
        if policy.keep_last.is_none() && policy.max_age_days.is_none() {
            return Err(StackError::precondition(
                "未指定保留策略（keep_last 或 max_age_days）",
            ));
        }

        let now = Utc::now();
        let listing = self.list_all_backups()?;
        let mut removed = Vec::new();

        for (index, record) in listing.iter().enumerate() {
            let over_count = policy.keep_last.is_some_and(|keep| index >= keep);
            let too_old = policy
                .max_age_days
                .is_some_and(|days| now - record.created_at > chrono::Duration::days(days as i64));

            if over_count || too_old {
                tracing::info!("清理备份: {} (创建于 {})", record.id, record.created_at);
                self.delete_backup(&record.id).await?;
                removed.push(record.id);
            }
        }

        Ok(removed)
    }

    /// 删除指定备份
    pub async fn delete_backup(&self, id: &str) -> Result<()> {
        check_backup_id(id)?;
        let dir = self.backup_dir(id);
        if !dir.is_dir() {
            return Err(StackError::precondition(format!("备份不存在: {id}")));
        }
        tokio::fs::remove_dir_all(&dir).await?;
        tracing::debug!("删除备份目录: {}", dir.display());
        Ok(())
    }
}

/// 备份ID只能是单级目录名
fn check_backup_id(id: &str) -> Result<()> {
    if id.is_empty() || id.starts_with('.') || id.contains(['/', '\\']) {
        return Err(StackError::precondition(format!("无效的备份ID: {id}")));
    }
    Ok(())
}

/// 标签只允许字母、数字和 `._-`
fn check_tag(tag: &str) -> Result<()> {
    let valid = !tag.is_empty()
        && tag.len() <= consts::MAX_TAG_LEN
        && tag
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if !valid {
        return Err(StackError::precondition(format!(
            "无效的备份标签: {tag} (只允许字母、数字和 ._-，最长 {} 个字符)",
            consts::MAX_TAG_LEN
        )));
    }
    Ok(())
}

/// 与 path 同目录的隐藏临时路径，如 `.mysql.restoring`
fn sibling_path(path: &Path, suffix: &str) -> Result<PathBuf> {
    let name = path
        .file_name()
        .ok_or_else(|| StackError::backup(format!("无效的卷目录: {}", path.display())))?;
    Ok(path.with_file_name(format!(".{}.{suffix}", name.to_string_lossy())))
}

/// 解析备份ID中的时间；只接受 `时间` 或 `时间-NN` 两种形式
fn parse_id_time(id: &str) -> Option<DateTime<Utc>> {
    let prefix = id.get(..19)?;
    let suffix = id.get(19..)?;
    let valid_suffix = suffix.is_empty()
        || (suffix.len() == 3
            && suffix.starts_with('-')
            && suffix[1..].bytes().all(|b| b.is_ascii_digit()));
    if !valid_suffix {
        return None;
    }
    NaiveDateTime::parse_from_str(prefix, consts::ID_TIME_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

fn read_metadata(dir: &Path) -> Result<BackupRecord> {
    let content = std::fs::read(dir.join(consts::METADATA_FILE))?;
    Ok(serde_json::from_slice(&content)?)
}

/// 先写临时文件再重命名，避免留下半截元数据
fn write_metadata(dir: &Path, record: &BackupRecord) -> Result<()> {
    let tmp = dir.join(format!("{}.tmp", consts::METADATA_FILE));
    std::fs::write(&tmp, serde_json::to_vec_pretty(record)?)?;
    std::fs::rename(&tmp, dir.join(consts::METADATA_FILE))?;
    Ok(())
}

/// 读取来源信息，任何一项失败都只记为空
async fn collect_source_info(config_root: &Path) -> SourceInfo {
    let root = config_root.to_string_lossy().to_string();
    SourceInfo {
        git_commit: run_aux_command("git", &["-C", &root, "rev-parse", "HEAD"]).await,
        git_branch: run_aux_command("git", &["-C", &root, "rev-parse", "--abbrev-ref", "HEAD"]).await,
        docker_version: run_aux_command("docker", &["--version"]).await,
        tool_version: env!("CARGO_PKG_VERSION").to_string(),
        tag: None,
    }
}

async fn run_aux_command(program: &str, args: &[&str]) -> Option<String> {
    let output = tokio::time::timeout(
        Duration::from_secs(timeout::AUX_COMMAND_TIMEOUT),
        Command::new(program).args(args).output(),
    )
    .await
    .ok()?
    .ok()?;

    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!text.is_empty()).then_some(text)
}

/// 检查单个产物：存在、大小、摘要、归档目录可读
async fn check_artifact(dir: &Path, artifact: &ArtifactRecord) -> Result<Vec<String>> {
    let path = dir.join(&artifact.file);
    let artifact = artifact.clone();

    let problems = tokio::task::spawn_blocking(move || {
        let mut problems = Vec::new();

        let metadata = match std::fs::metadata(&path) {
            Ok(m) => m,
            Err(_) => {
                problems.push(format!("归档文件不存在: {}", artifact.file));
                return problems;
            }
        };

        if metadata.len() != artifact.size_bytes {
            problems.push(format!(
                "归档大小不一致: 期望 {} 字节, 实际 {} 字节",
                artifact.size_bytes,
                metadata.len()
            ));
        }

        match sha256_file(&path) {
            Ok(actual) if !actual.eq_ignore_ascii_case(&artifact.sha256) => {
                problems.push("归档摘要不一致".to_string());
            }
            Ok(_) => {}
            Err(e) => problems.push(format!("读取归档失败: {e}")),
        }

        if let Err(e) = list_archive_entries(&path) {
            problems.push(format!("归档目录无法读取: {e}"));
        }

        problems
    })
    .await?;

    Ok(problems)
}

fn sha256_file(path: &Path) -> std::io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    std::io::copy(&mut file, &mut hasher)?;
    let hash = hasher.finalize();
    Ok(format!("{hash:x}"))
}

/// 遍历归档所有条目，验证 gzip 流和 tar 头完整
fn list_archive_entries(path: &Path) -> Result<usize> {
    use flate2::read::GzDecoder;
    use tar::Archive;

    let file = File::open(path)?;
    let mut archive = Archive::new(GzDecoder::new(file));
    let mut count = 0;
    for entry in archive.entries()? {
        let mut entry = entry?;
        std::io::copy(&mut entry, &mut std::io::sink())?;
        count += 1;
    }
    Ok(count)
}

/// 把 root 下的文件打包为 tar.gz；`entries` 为 None 时打包整个目录。返回 (大小, sha256)
async fn archive_into(
    root: PathBuf,
    entries: Option<Vec<String>>,
    dest: PathBuf,
    compression_level: u32,
) -> Result<(u64, String)> {
    // 在后台线程中执行压缩操作，避免阻塞异步运行时
    tokio::task::spawn_blocking(move || {
        use flate2::Compression;
        use flate2::write::GzEncoder;
        use tar::Builder;

        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = File::create(&dest)?;
        let encoder = GzEncoder::new(file, Compression::new(compression_level));
        let mut archive = Builder::new(encoder);
        archive.follow_symlinks(false);

        let sources: Vec<PathBuf> = match &entries {
            Some(list) => list.iter().map(|rel| root.join(rel)).collect(),
            None => vec![root.clone()],
        };

        for source in sources {
            for entry in WalkDir::new(&source) {
                let entry = entry?;
                let path = entry.path();
                let relative = path.strip_prefix(&root)?;
                if relative.as_os_str().is_empty() {
                    continue;
                }

                // tar归档内部使用Unix风格路径
                let archive_path = relative.to_string_lossy().replace('\\', "/");

                if entry.file_type().is_dir() {
                    archive
                        .append_dir(&archive_path, path)
                        .map_err(|e| StackError::backup(format!("添加目录到归档失败: {e}")))?;
                } else {
                    archive
                        .append_path_with_name(path, &archive_path)
                        .map_err(|e| StackError::backup(format!("添加文件到归档失败: {e}")))?;
                }
            }
        }

        let encoder = archive
            .into_inner()
            .map_err(|e| StackError::backup(format!("完成归档失败: {e}")))?;
        encoder
            .finish()
            .map_err(|e| StackError::backup(format!("完成压缩失败: {e}")))?;

        let size = std::fs::metadata(&dest)?.len();
        let sha256 = sha256_file(&dest)?;
        Ok::<(u64, String), StackError>((size, sha256))
    })
    .await?
}

/// 解压 tar.gz 到目标目录（覆盖已有文件）
async fn unpack_into(archive_path: PathBuf, target_dir: PathBuf) -> Result<()> {
    tokio::task::spawn_blocking(move || {
        use flate2::read::GzDecoder;
        use tar::Archive;

        let file = File::open(&archive_path)?;
        let mut archive = Archive::new(GzDecoder::new(file));
        archive.set_overwrite(true);
        archive
            .unpack(&target_dir)
            .map_err(|e| StackError::backup(format!("解压归档失败: {e}")))?;

        Ok::<(), StackError>(())
    })
    .await?
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{TempDir, tempdir};

    struct Fixture {
        _dir: TempDir,
        root: PathBuf,
        manager: BackupManager,
    }

    fn fixture() -> Fixture {
        fixture_with(|_| {})
    }

    fn fixture_with(adjust: impl FnOnce(&mut BackupConfig)) -> Fixture {
        let dir = tempdir().unwrap();
        let root = dir.path().to_path_buf();

        let config_root = root.join("docker");
        std::fs::create_dir_all(config_root.join("config")).unwrap();
        std::fs::write(config_root.join("docker-compose.yml"), "services:\n  mysql: {}\n").unwrap();
        std::fs::write(config_root.join(".env"), "MYSQL_PASSWORD=secret\n").unwrap();
        std::fs::write(config_root.join("config/nginx.conf"), "server { listen 80; }\n").unwrap();

        let mysql = root.join("data/mysql");
        std::fs::create_dir_all(mysql.join("db")).unwrap();
        std::fs::write(mysql.join("db/ibdata1"), vec![7u8; 4096]).unwrap();
        let redis = root.join("data/redis");
        std::fs::create_dir_all(&redis).unwrap();
        std::fs::write(redis.join("dump.rdb"), b"REDIS0011").unwrap();

        let config = BackupConfig {
            storage_dir: root.join("backups").to_string_lossy().to_string(),
            config_root: config_root.to_string_lossy().to_string(),
            config_files: vec![
                "docker-compose.yml".to_string(),
                ".env".to_string(),
                "config".to_string(),
            ],
            safety_dir: root.join("backups/.rollback-safety").to_string_lossy().to_string(),
            compression_level: 6,
            volumes: vec![
                VolumeConfig::new("mysql-data", mysql.to_string_lossy()),
                VolumeConfig::new("redis-data", redis.to_string_lossy()),
            ],
            retention: RetentionConfig::default(),
        };
        let mut config = config;
        adjust(&mut config);

        Fixture {
            _dir: dir,
            root,
            manager: BackupManager::new(&config).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_create_backup_captures_all_artifacts() {
        let fx = fixture();
        let record = fx.manager.create_backup().await.unwrap();

        assert_eq!(record.status, BackupStatus::Success);
        assert_eq!(record.artifact_names(), vec!["config", "mysql-data", "redis-data"]);
        assert!(record.size_bytes > 0);
        assert_eq!(record.source.tool_version, env!("CARGO_PKG_VERSION"));

        let dir = fx.manager.backup_dir(&record.id);
        assert!(dir.join(consts::METADATA_FILE).exists());
        assert!(dir.join("volumes/mysql-data.tar.gz").exists());
    }

    #[tokio::test]
    async fn test_fresh_backup_validates_without_problems() {
        let fx = fixture();
        let record = fx.manager.create_backup().await.unwrap();

        let report = fx.manager.validate_backup(&record.id).await.unwrap();
        assert!(report.passed());
        assert!(report.issues.is_empty(), "{}", report.summary());
    }

    #[tokio::test]
    async fn test_missing_required_volume_yields_partial_backup() {
        let fx = fixture();
        std::fs::remove_dir_all(fx.root.join("data/redis")).unwrap();

        let record = fx.manager.create_backup().await.unwrap();
        assert_eq!(record.status, BackupStatus::Partial);
        assert_eq!(record.failures.len(), 1);
        assert_eq!(record.failures[0].artifact, "redis-data");
        // 其余产物照常采集
        assert_eq!(record.artifact_names(), vec!["config", "mysql-data"]);

        let report = fx.manager.validate_backup(&record.id).await.unwrap();
        assert!(report.passed());
        assert!(report.problems().is_empty());
        assert_eq!(report.warnings().len(), 1);
    }

    #[tokio::test]
    async fn test_list_backups_newest_first() {
        let fx = fixture();
        assert_eq!(fx.manager.list_backups().unwrap().iter().count(), 0);

        let mut ids = Vec::new();
        for _ in 0..3 {
            ids.push(fx.manager.create_backup().await.unwrap().id);
        }

        let listing = fx.manager.list_backups().unwrap();
        let listed: Vec<BackupRecord> = listing.iter().collect();
        assert_eq!(listed.len(), 3);
        for pair in listed.windows(2) {
            assert!(pair[0].created_at > pair[1].created_at);
            assert!(pair[0].id > pair[1].id);
        }
        ids.reverse();
        assert_eq!(listed.iter().map(|r| r.id.clone()).collect::<Vec<_>>(), ids);

        // 可以重新开始迭代
        assert_eq!(listing.iter().count(), 3);
    }

    #[tokio::test]
    async fn test_interrupted_capture_excluded_from_default_listing() {
        let fx = fixture();
        let good = fx.manager.create_backup().await.unwrap();

        // 模拟中断：只有 InProgress 元数据的目录
        let interrupted = fx.manager.backup_dir("2099-01-01T00-00-00");
        std::fs::create_dir_all(&interrupted).unwrap();
        let record = BackupRecord::in_progress(
            "2099-01-01T00-00-00".to_string(),
            Utc::now(),
            SourceInfo::default(),
        );
        write_metadata(&interrupted, &record).unwrap();

        // 元数据缺失的目录
        std::fs::create_dir_all(fx.manager.backup_dir("2098-01-01T00-00-00")).unwrap();

        let default: Vec<_> = fx.manager.list_backups().unwrap().iter().collect();
        assert_eq!(default.len(), 1);
        assert_eq!(default[0].id, good.id);

        let all: Vec<_> = fx.manager.list_all_backups().unwrap().iter().collect();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].effective_status(), BackupStatus::Failed);
        assert_eq!(all[1].status, BackupStatus::Failed);

        let report = fx.manager.validate_backup("2099-01-01T00-00-00").await.unwrap();
        assert!(!report.passed());
    }

    #[tokio::test]
    async fn test_validate_reports_every_problem() {
        let fx = fixture();
        let record = fx.manager.create_backup().await.unwrap();
        let dir = fx.manager.backup_dir(&record.id);

        // 损坏一个卷、删除另一个
        std::fs::write(dir.join("volumes/mysql-data.tar.gz"), b"garbage").unwrap();
        std::fs::remove_file(dir.join("volumes/redis-data.tar.gz")).unwrap();

        let report = fx.manager.validate_backup(&record.id).await.unwrap();
        // 配置快照完好，整体仍可用于回滚
        assert!(report.passed());
        assert_eq!(
            report.damaged_artifacts(),
            vec!["mysql-data".to_string(), "redis-data".to_string()]
        );
        assert!(report.problems().len() >= 2);
    }

    #[tokio::test]
    async fn test_corrupted_config_snapshot_is_fatal() {
        let fx = fixture();
        let record = fx.manager.create_backup().await.unwrap();
        let dir = fx.manager.backup_dir(&record.id);
        std::fs::write(dir.join(consts::CONFIG_ARCHIVE), b"broken").unwrap();

        let report = fx.manager.validate_backup(&record.id).await.unwrap();
        assert!(!report.passed());
    }

    #[tokio::test]
    async fn test_validate_unknown_or_malformed_backup() {
        let fx = fixture();

        let report = fx.manager.validate_backup("1999-01-01T00-00-00").await.unwrap();
        assert!(!report.passed());

        let report = fx.manager.validate_backup("../etc").await.unwrap();
        assert!(!report.passed());

        let dir = fx.manager.backup_dir("2020-01-01T00-00-00");
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join(consts::METADATA_FILE), "{ not json").unwrap();
        let report = fx.manager.validate_backup("2020-01-01T00-00-00").await.unwrap();
        assert!(!report.passed());
        assert_eq!(report.issues[0].artifact.as_deref(), Some(consts::METADATA_FILE));
    }

    #[tokio::test]
    async fn test_restore_config_round_trip_is_byte_exact() {
        let fx = fixture();
        let config_root = fx.root.join("docker");
        let original_env = std::fs::read(config_root.join(".env")).unwrap();
        let original_nginx = std::fs::read(config_root.join("config/nginx.conf")).unwrap();

        let record = fx.manager.create_backup().await.unwrap();

        std::fs::write(config_root.join(".env"), "MYSQL_PASSWORD=changed\n").unwrap();
        std::fs::write(config_root.join("config/nginx.conf"), "garbage").unwrap();

        let safety = fx.manager.save_safety_copy().await.unwrap();
        assert!(safety.exists());

        fx.manager.restore_config(&record).await.unwrap();
        assert_eq!(std::fs::read(config_root.join(".env")).unwrap(), original_env);
        assert_eq!(
            std::fs::read(config_root.join("config/nginx.conf")).unwrap(),
            original_nginx
        );
    }

    #[tokio::test]
    async fn test_restore_volume_replaces_contents() {
        let fx = fixture();
        let record = fx.manager.create_backup().await.unwrap();

        let mysql = fx.root.join("data/mysql");
        std::fs::write(mysql.join("db/ibdata1"), b"corrupted").unwrap();
        std::fs::write(mysql.join("stray.log"), b"new file").unwrap();

        let artifact = record
            .volume_artifacts()
            .find(|a| a.name == "mysql-data")
            .unwrap()
            .clone();
        fx.manager.restore_volume(&record, &artifact).await.unwrap();

        assert_eq!(std::fs::read(mysql.join("db/ibdata1")).unwrap(), vec![7u8; 4096]);
        assert!(!mysql.join("stray.log").exists());
    }

    #[tokio::test]
    async fn test_prune_keeps_newest() {
        let fx = fixture();
        for _ in 0..4 {
            fx.manager.create_backup().await.unwrap();
        }

        let policy = RetentionConfig {
            keep_last: Some(2),
            max_age_days: None,
        };
        let removed = fx.manager.prune_backups(&policy).await.unwrap();
        assert_eq!(removed.len(), 2);
        assert_eq!(fx.manager.list_backups().unwrap().iter().count(), 2);

        let err = fx
            .manager
            .prune_backups(&RetentionConfig::default())
            .await
            .unwrap_err();
        assert!(err.is_refusal());
    }

    #[tokio::test]
    async fn test_tag_is_recorded_in_metadata() {
        let fx = fixture();
        let record = fx.manager.create_tagged_backup(Some("pre-update")).await.unwrap();
        assert_eq!(record.source.tag.as_deref(), Some("pre-update"));
        assert!(parse_id_time(&record.id).is_some());

        let stored = fx.manager.get_backup(&record.id).unwrap();
        assert_eq!(stored.source.tag.as_deref(), Some("pre-update"));

        let untagged = fx.manager.create_backup().await.unwrap();
        assert!(untagged.source.tag.is_none());
        let raw = std::fs::read_to_string(
            fx.manager.backup_dir(&untagged.id).join(consts::METADATA_FILE),
        )
        .unwrap();
        assert!(!raw.contains("\"tag\""));
    }

    #[tokio::test]
    async fn test_invalid_tag_creates_nothing() {
        let fx = fixture();
        let long = "x".repeat(65);
        for tag in ["", "../escape", "with space", long.as_str()] {
            let err = fx.manager.create_tagged_backup(Some(tag)).await.unwrap_err();
            assert!(err.is_refusal(), "{tag}");
        }
        assert_eq!(fx.manager.list_all_backups().unwrap().iter().count(), 0);
    }

    #[tokio::test]
    async fn test_corrupted_optional_volume_is_damaged() {
        let fx = fixture_with(|config| {
            for volume in &mut config.volumes {
                volume.required = false;
            }
        });
        let record = fx.manager.create_backup().await.unwrap();
        assert!(record.artifacts.iter().any(|a| a.name == "redis-data" && !a.required));

        let dir = fx.manager.backup_dir(&record.id);
        std::fs::write(dir.join("volumes/redis-data.tar.gz"), b"garbage").unwrap();

        let report = fx.manager.validate_backup(&record.id).await.unwrap();
        assert!(report.passed());
        assert_eq!(report.damaged_artifacts(), vec!["redis-data".to_string()]);
        assert!(!report.problems().is_empty());
    }

    #[tokio::test]
    async fn test_failed_volume_unpack_keeps_live_data() {
        let fx = fixture();
        let record = fx.manager.create_backup().await.unwrap();
        let dir = fx.manager.backup_dir(&record.id);
        std::fs::write(dir.join("volumes/mysql-data.tar.gz"), b"not a gzip stream").unwrap();

        let mysql = fx.root.join("data/mysql");
        std::fs::write(mysql.join("db/ibdata1"), b"live pages").unwrap();

        let artifact = record
            .volume_artifacts()
            .find(|a| a.name == "mysql-data")
            .unwrap()
            .clone();
        assert!(fx.manager.restore_volume(&record, &artifact).await.is_err());

        assert_eq!(std::fs::read(mysql.join("db/ibdata1")).unwrap(), b"live pages");
        assert!(!fx.root.join("data/.mysql.restoring").exists());
        assert!(!fx.root.join("data/.mysql.replaced").exists());
    }

    #[tokio::test]
    async fn test_foreign_directories_are_not_backups() {
        let fx = fixture();
        let record = fx.manager.create_backup().await.unwrap();

        let foreign = fx.root.join("backups/manual-export");
        std::fs::create_dir_all(&foreign).unwrap();
        std::fs::write(foreign.join("important.sql"), b"INSERT INTO t VALUES (1);").unwrap();
        let lookalike = fx.root.join("backups/2001-01-01T00-00-00-export");
        std::fs::create_dir_all(&lookalike).unwrap();

        let all: Vec<_> = fx
            .manager
            .list_all_backups()
            .unwrap()
            .iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(all, vec![record.id.clone()]);

        let removed = fx
            .manager
            .prune_backups(&RetentionConfig {
                keep_last: Some(1),
                max_age_days: Some(30),
            })
            .await
            .unwrap();
        assert!(removed.is_empty());
        assert!(foreign.join("important.sql").exists());
        assert!(lookalike.exists());
        assert_eq!(fx.manager.list_backups().unwrap().iter().count(), 1);
    }

    #[test]
    fn test_parse_id_time_with_suffix() {
        let t = parse_id_time("2024-01-01T00-00-00-03").unwrap();
        assert_eq!(t.to_rfc3339(), "2024-01-01T00:00:00+00:00");
        assert!(parse_id_time("garbage").is_none());
        assert!(parse_id_time("2024-01-01T00-00-00-export").is_none());
        assert!(parse_id_time("2024-01-01T00-00-00-1").is_none());
    }
}
