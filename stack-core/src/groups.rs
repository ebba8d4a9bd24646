//! 服务分组：把分组名解析为有序的具体服务列表

use crate::config::{AppConfig, GroupsConfig};
use crate::constants::groups::ALL;
use crate::{Result, StackError};
use serde::Serialize;
use std::collections::{BTreeSet, HashSet};

/// 同一层内的服务互不依赖，可以并发操作
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Tier {
    pub group: String,
    pub services: Vec<String>,
}

/// 解析结果的来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    All,
    Group,
    Service,
    /// 未知标签按字面服务名处理（需显式开启）
    Literal,
}

/// 解析后的操作目标
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedTarget {
    /// 用户输入的标签
    pub tag: String,
    pub kind: TargetKind,
    /// 按启动顺序排列的层
    pub tiers: Vec<Tier>,
}

impl ResolvedTarget {
    /// 按启动顺序展开的全部服务
    pub fn services(&self) -> Vec<String> {
        self.tiers
            .iter()
            .flat_map(|t| t.services.iter().cloned())
            .collect()
    }

    /// 停止顺序：层逆序
    pub fn stop_tiers(&self) -> Vec<Tier> {
        self.tiers.iter().rev().cloned().collect()
    }

    pub fn is_single_service(&self) -> bool {
        matches!(self.kind, TargetKind::Service | TargetKind::Literal)
    }

    pub fn len(&self) -> usize {
        self.tiers.iter().map(|t| t.services.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// 分组注册表，纯查找，不持有运行时状态
#[derive(Debug, Clone)]
pub struct ServiceGroupRegistry {
    config: GroupsConfig,
    /// 已知的服务名（分组成员 + 健康检查描述）
    known_services: BTreeSet<String>,
}

impl ServiceGroupRegistry {
    pub fn new(config: GroupsConfig, extra_services: impl IntoIterator<Item = String>) -> Self {
        let mut known_services: BTreeSet<String> =
            config.members.values().flatten().cloned().collect();
        known_services.extend(extra_services);
        Self {
            config,
            known_services,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            config.groups.clone(),
            config.health.services.iter().map(|d| d.name.clone()),
        )
    }

    /// 可用的分组名（含 all），按 `all` 的展开顺序
    pub fn group_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.ordered_groups();
        names.push(ALL.to_string());
        names
    }

    pub fn aliases(&self) -> impl Iterator<Item = (&String, &String)> {
        self.config.aliases.iter()
    }

    /// 名称是否为分组成员或健康检查中声明的服务（不含分组名和别名）
    pub fn is_known_service(&self, name: &str) -> bool {
        self.known_services.contains(name)
    }

    /// 先按 order，再补上未出现在 order 中的分组
    fn ordered_groups(&self) -> Vec<String> {
        let mut groups: Vec<String> = self.config.order.clone();
        for name in self.config.members.keys() {
            if !groups.contains(name) {
                groups.push(name.clone());
            }
        }
        groups
    }

    /// 解析标签：all / 分组名 / 别名 / 已知服务名；未知标签默认拒绝
    pub fn resolve(&self, tag: &str) -> Result<ResolvedTarget> {
        let tag = tag.trim();
        if tag.is_empty() {
            return Err(StackError::precondition("分组名不能为空"));
        }

        let canonical = self
            .config
            .aliases
            .get(tag)
            .map(String::as_str)
            .unwrap_or(tag);

        if canonical == ALL {
            return Ok(ResolvedTarget {
                tag: tag.to_string(),
                kind: TargetKind::All,
                tiers: self.all_tiers(),
            });
        }

        if let Some(members) = self.config.members.get(canonical) {
            return Ok(ResolvedTarget {
                tag: tag.to_string(),
                kind: TargetKind::Group,
                tiers: vec![Tier {
                    group: canonical.to_string(),
                    services: members.clone(),
                }],
            });
        }

        let kind = if self.known_services.contains(canonical) {
            TargetKind::Service
        } else if self.config.allow_unknown_services {
            tracing::warn!("⚠️  未知的分组或服务 '{}'，按单个服务名处理", canonical);
            TargetKind::Literal
        } else {
            return Err(StackError::precondition(format!(
                "未知的分组或服务: {canonical} (可用分组: {})",
                self.group_names().join(", ")
            )));
        };

        Ok(ResolvedTarget {
            tag: tag.to_string(),
            kind,
            tiers: vec![Tier {
                group: canonical.to_string(),
                services: vec![canonical.to_string()],
            }],
        })
    }

    /// `all` 的分层展开；同一服务属于多个分组时只出现在最早的一层
    fn all_tiers(&self) -> Vec<Tier> {
        let mut seen = HashSet::new();
        self.ordered_groups()
            .into_iter()
            .filter_map(|group| {
                let services: Vec<String> = self
                    .config
                    .members
                    .get(&group)?
                    .iter()
                    .filter(|s| seen.insert(s.to_string()))
                    .cloned()
                    .collect();
                (!services.is_empty()).then_some(Tier { group, services })
            })
            .collect()
    }
}
