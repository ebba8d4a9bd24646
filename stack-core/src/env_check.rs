//! 部署环境变量文件检查：必需变量、占位值、弱密码
//!
//! 只读检查，不修改任何文件。

use crate::config::EnvCheckConfig;
use crate::error::exit_code;
use crate::Result;
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvIssueKind {
    MissingFile,
    MissingKey,
    EmptyValue,
    Placeholder,
    WeakPassword,
}

impl EnvIssueKind {
    /// 缺文件、缺变量、空值是错误；占位值和弱密码是警告
    pub fn is_error(&self) -> bool {
        matches!(
            self,
            EnvIssueKind::MissingFile | EnvIssueKind::MissingKey | EnvIssueKind::EmptyValue
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnvIssue {
    pub kind: EnvIssueKind,
    pub key: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct EnvReport {
    pub env_file: PathBuf,
    pub compose_file: PathBuf,
    pub issues: Vec<EnvIssue>,
}

impl EnvReport {
    pub fn errors(&self) -> impl Iterator<Item = &EnvIssue> {
        self.issues.iter().filter(|i| i.kind.is_error())
    }

    pub fn warnings(&self) -> impl Iterator<Item = &EnvIssue> {
        self.issues.iter().filter(|i| !i.kind.is_error())
    }

    /// 有错误为 FAILED，只有警告为 ATTENTION
    pub fn exit_code(&self) -> i32 {
        if self.errors().next().is_some() {
            exit_code::FAILED
        } else if self.issues.is_empty() {
            exit_code::SUCCESS
        } else {
            exit_code::ATTENTION
        }
    }

    fn push(&mut self, kind: EnvIssueKind, key: Option<&str>, message: impl Into<String>) {
        self.issues.push(EnvIssue {
            kind,
            key: key.map(str::to_string),
            message: message.into(),
        });
    }
}

/// 检查 `config_root` 下的环境变量文件和 compose 文件
pub fn check_env(rules: &EnvCheckConfig, config_root: &Path, compose_file: &Path) -> Result<EnvReport> {
    let env_file = config_root.join(&rules.env_file);
    let mut report = EnvReport {
        env_file: env_file.clone(),
        compose_file: compose_file.to_path_buf(),
        issues: Vec::new(),
    };

    if !compose_file.exists() {
        report.push(
            EnvIssueKind::MissingFile,
            None,
            format!("compose 文件不存在: {}", compose_file.display()),
        );
    }

    if !env_file.exists() {
        report.push(
            EnvIssueKind::MissingFile,
            None,
            format!("环境变量文件不存在: {}", env_file.display()),
        );
        return Ok(report);
    }

    let content = std::fs::read_to_string(&env_file)?;
    let vars = parse_env(&content)?;
    tracing::debug!("读取到 {} 个环境变量: {}", vars.len(), env_file.display());

    for key in &rules.required_keys {
        match vars.get(key) {
            None => report.push(EnvIssueKind::MissingKey, Some(key.as_str()), "缺少必需变量"),
            Some(value) if value.is_empty() => {
                report.push(EnvIssueKind::EmptyValue, Some(key.as_str()), "必需变量的值为空")
            }
            Some(_) => {}
        }
    }

    for (key, value) in &vars {
        if value.is_empty() {
            continue;
        }
        let required = rules.required_keys.contains(key);
        let secret = is_secret(key, &rules.secret_markers);

        if (required || secret) && is_placeholder(value, &rules.placeholder_prefixes) {
            report.push(EnvIssueKind::Placeholder, Some(key.as_str()), "仍是示例占位值");
        } else if secret && value.chars().count() < rules.min_password_len {
            report.push(
                EnvIssueKind::WeakPassword,
                Some(key.as_str()),
                format!("密码长度少于 {} 个字符", rules.min_password_len),
            );
        }
    }

    Ok(report)
}

/// 解析 `KEY=VALUE` 行：跳过空行和注释，支持 `export` 前缀和引号
pub fn parse_env(content: &str) -> Result<BTreeMap<String, String>> {
    let line_re = Regex::new(r"^\s*(?:export\s+)?([A-Za-z_][A-Za-z0-9_]*)\s*=\s*(.*?)\s*$")?;

    let mut vars = BTreeMap::new();
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let Some(caps) = line_re.captures(line) else {
            tracing::debug!("忽略无法解析的行: {}", trimmed);
            continue;
        };
        vars.insert(caps[1].to_string(), unquote(&caps[2]));
    }
    Ok(vars)
}

fn unquote(raw: &str) -> String {
    for quote in ['"', '\''] {
        if raw.len() >= 2 && raw.starts_with(quote) && raw.ends_with(quote) {
            return raw[1..raw.len() - 1].to_string();
        }
    }
    // 未加引号时 ` #` 之后是行内注释
    match raw.find(" #") {
        Some(pos) => raw[..pos].trim_end().to_string(),
        None => raw.to_string(),
    }
}

fn is_secret(key: &str, markers: &[String]) -> bool {
    let upper = key.to_ascii_uppercase();
    markers.iter().any(|m| upper.contains(&m.to_ascii_uppercase()))
}

fn is_placeholder(value: &str, prefixes: &[String]) -> bool {
    let lower = value.to_lowercase();
    prefixes.iter().any(|p| lower.starts_with(&p.to_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_stack(env: &str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempdir().unwrap();
        let compose = dir.path().join("docker-compose.yml");
        std::fs::write(&compose, "services: {}\n").unwrap();
        std::fs::write(dir.path().join(".env"), env).unwrap();
        (dir, compose)
    }

    fn kinds(report: &EnvReport) -> Vec<(EnvIssueKind, Option<&str>)> {
        report
            .issues
            .iter()
            .map(|i| (i.kind, i.key.as_deref()))
            .collect()
    }

    #[test]
    fn test_parse_env_handles_comments_quotes_and_export() {
        let vars = parse_env(
            "# 数据库\nexport MYSQL_PASSWORD=\"s3cret value\"\nREDIS_PORT = 6379 # 默认端口\n\nNOT A VAR\nEMPTY=\nJWT_SECRET='a#b'\n",
        )
        .unwrap();
        assert_eq!(vars["MYSQL_PASSWORD"], "s3cret value");
        assert_eq!(vars["REDIS_PORT"], "6379");
        assert_eq!(vars["EMPTY"], "");
        assert_eq!(vars["JWT_SECRET"], "a#b");
        assert_eq!(vars.len(), 4);
    }

    #[test]
    fn test_clean_env_passes() {
        let (dir, compose) = write_stack(
            "MYSQL_ROOT_PASSWORD=Very-Long-Root-Pass\nMYSQL_PASSWORD=Another-Long-Pass\nSECRET_KEY=9f8e7d6c5b4a\nJWT_SECRET=0a1b2c3d4e5f\n",
        );
        let report = check_env(&EnvCheckConfig::default(), dir.path(), &compose).unwrap();
        assert!(report.issues.is_empty(), "{:?}", report.issues);
        assert_eq!(report.exit_code(), exit_code::SUCCESS);
    }

    #[test]
    fn test_missing_and_empty_keys_are_errors() {
        let (dir, compose) = write_stack(
            "MYSQL_ROOT_PASSWORD=Very-Long-Root-Pass\nMYSQL_PASSWORD=\nSECRET_KEY=9f8e7d6c5b4a\n",
        );
        let report = check_env(&EnvCheckConfig::default(), dir.path(), &compose).unwrap();
        assert_eq!(
            kinds(&report),
            vec![
                (EnvIssueKind::EmptyValue, Some("MYSQL_PASSWORD")),
                (EnvIssueKind::MissingKey, Some("JWT_SECRET")),
            ]
        );
        assert_eq!(report.exit_code(), exit_code::FAILED);
    }

    #[test]
    fn test_placeholders_and_weak_passwords_are_warnings() {
        let (dir, compose) = write_stack(
            "MYSQL_ROOT_PASSWORD=root\nMYSQL_PASSWORD=your_password_here\nSECRET_KEY=Example-Key\nJWT_SECRET=0a1b2c3d4e5f\nMINIO_PASSWORD=minio123\nAPP_NAME=your-app\n",
        );
        let report = check_env(&EnvCheckConfig::default(), dir.path(), &compose).unwrap();
        assert_eq!(
            kinds(&report),
            vec![
                (EnvIssueKind::WeakPassword, Some("MINIO_PASSWORD")),
                (EnvIssueKind::Placeholder, Some("MYSQL_PASSWORD")),
                (EnvIssueKind::WeakPassword, Some("MYSQL_ROOT_PASSWORD")),
                (EnvIssueKind::Placeholder, Some("SECRET_KEY")),
            ]
        );
        assert_eq!(report.errors().count(), 0);
        assert_eq!(report.exit_code(), exit_code::ATTENTION);
    }

    #[test]
    fn test_missing_files_are_errors() {
        let dir = tempdir().unwrap();
        let compose = dir.path().join("docker-compose.yml");
        let report = check_env(&EnvCheckConfig::default(), dir.path(), &compose).unwrap();
        assert_eq!(report.errors().count(), 2);
        assert!(report.issues.iter().all(|i| i.kind == EnvIssueKind::MissingFile));
        assert_eq!(report.exit_code(), exit_code::FAILED);
    }

    #[test]
    fn test_rules_are_configurable() {
        let (dir, compose) = write_stack("API_TOKEN=short\n");
        let rules = EnvCheckConfig {
            required_keys: vec!["API_TOKEN".to_string()],
            secret_markers: vec!["token".to_string()],
            min_password_len: 8,
            ..EnvCheckConfig::default()
        };
        let report = check_env(&rules, dir.path(), &compose).unwrap();
        assert_eq!(kinds(&report), vec![(EnvIssueKind::WeakPassword, Some("API_TOKEN"))]);
    }
}
