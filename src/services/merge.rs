//! 模板上游合并
//!
//! 对应原模板仓库的 merge-from-raw.sh：从上游模板仓库（约定 remote 名
//! 为 raw）拉取更新并合并。冲突按两条启发式处理：workflow 文件保留
//! 本地版本；合并后恢复 mxcp-user-config.yml 的 profile 行。其余冲突
//! 中止合并交给人工处理。

use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::env::constants::GIT_TIMEOUT_SECS;
use crate::config::env::{parse_env_file, CONFIG_ENV_PATH};
use crate::domain::deploy::LogLine;
use crate::infra::command::{CommandError, CommandRunner};

/// 合并参数
#[derive(Clone, Debug)]
pub struct MergeOptions {
    /// 上游 remote 名称
    pub remote: String,
    /// 上游分支
    pub branch: String,
    /// 项目根目录
    pub root: PathBuf,
}

/// 合并错误
#[derive(Debug, Error)]
pub enum MergeError {
    #[error("{0} is not a git repository")]
    NotARepo(String),

    #[error("working tree has uncommitted changes; commit or stash before merging")]
    DirtyTree,

    #[error("remote '{0}' is not configured; add it with: git remote add {0} <template-repo-url>")]
    MissingRemote(String),

    #[error("merge aborted, unresolved conflicts in: {}", .0.join(", "))]
    UnresolvedConflicts(Vec<String>),

    #[error("git {operation} failed: {stderr}")]
    GitFailed { operation: String, stderr: String },

    #[error("failed to rewrite {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Command(#[from] CommandError),
}

/// 合并结果
#[derive(Debug, Default)]
pub struct MergeOutcome {
    /// 按启发式保留本地版本的 workflow 文件
    pub kept_local_workflows: Vec<String>,
    /// 是否恢复了 profile 行
    pub profile_restored: bool,
}

/// 执行上游合并
pub async fn run(options: &MergeOptions) -> Result<MergeOutcome, MergeError> {
    let root = &options.root;

    // 必须在干净的 git 仓库里执行
    let inside = git_raw(root, &["rev-parse", "--is-inside-work-tree"]).await?;
    if !inside.status.success() {
        return Err(MergeError::NotARepo(root.display().to_string()));
    }

    let status = git_capture(root, &["status", "--porcelain"]).await?;
    if !status.trim().is_empty() {
        return Err(MergeError::DirtyTree);
    }

    let remotes = git_capture(root, &["remote"]).await?;
    if !remotes.lines().any(|r| r.trim() == options.remote) {
        return Err(MergeError::MissingRemote(options.remote.clone()));
    }

    fetch(root, &options.remote).await?;

    let merge_ref = format!("{}/{}", options.remote, options.branch);
    info!(merge_ref = %merge_ref, "merging template updates");
    let merge = git_raw(root, &["merge", "--no-edit", &merge_ref]).await?;

    let mut outcome = MergeOutcome::default();

    if !merge.status.success() {
        let conflicted = git_capture(root, &["diff", "--name-only", "--diff-filter=U"]).await?;
        let conflicted: Vec<String> = conflicted
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect();

        if conflicted.is_empty() {
            // 没有冲突却失败：fetch 的 ref 不存在之类
            return Err(MergeError::GitFailed {
                operation: "merge".to_string(),
                stderr: String::from_utf8_lossy(&merge.stderr).trim().to_string(),
            });
        }

        let (workflows, rest): (Vec<String>, Vec<String>) =
            conflicted.into_iter().partition(|p| is_workflow_path(p));

        if !rest.is_empty() {
            // 启发式覆盖不了的冲突：中止合并交给人工
            let _ = git_raw(root, &["merge", "--abort"]).await;
            return Err(MergeError::UnresolvedConflicts(rest));
        }

        for path in &workflows {
            git_capture(root, &["checkout", "--ours", path]).await?;
            git_capture(root, &["add", path]).await?;
            info!(path = %path, "kept local workflow over template version");
        }
        git_capture(root, &["commit", "--no-edit"]).await?;
        outcome.kept_local_workflows = workflows;
    }

    // 合并可能把 profile 行打回模板占位符，恢复为项目名。
    // 改动留在工作区，由 operator 审阅提交
    outcome.profile_restored = restore_profile(root)?;

    info!(
        kept_local = outcome.kept_local_workflows.len(),
        profile_restored = outcome.profile_restored,
        "template merge finished"
    );
    Ok(outcome)
}

/// git fetch，进度行流式打到 debug 日志
async fn fetch(root: &Path, remote: &str) -> Result<(), MergeError> {
    let (tx, mut rx) = broadcast::channel::<LogLine>(64);
    let printer = tokio::spawn(async move {
        while let Ok(line) = rx.recv().await {
            debug!(stream = %line.stream, "{}", line.content);
        }
    });

    let result = CommandRunner::run_with_streaming(
        "git",
        &["fetch", "--prune", remote],
        root,
        tx,
        CancellationToken::new(),
        Duration::from_secs(GIT_TIMEOUT_SECS),
    )
    .await?;
    let _ = printer.await;

    if !result.status.success() {
        return Err(MergeError::GitFailed {
            operation: "fetch".to_string(),
            stderr: format!("git fetch {} exited non-zero", remote),
        });
    }
    Ok(())
}

/// 捕获输出的 git 调用，非零退出转为 GitFailed
async fn git_capture(root: &Path, args: &[&str]) -> Result<String, MergeError> {
    CommandRunner::run_capture("git", args, root, Duration::from_secs(GIT_TIMEOUT_SECS))
        .await
        .map_err(|e| match e {
            CommandError::NonZeroExit { stderr, .. } => MergeError::GitFailed {
                operation: args.first().copied().unwrap_or("git").to_string(),
                stderr,
            },
            other => MergeError::Command(other),
        })
}

/// 允许失败的 git 调用，返回完整 Output
async fn git_raw(root: &Path, args: &[&str]) -> Result<std::process::Output, MergeError> {
    Ok(CommandRunner::run_output("git", args, root, Duration::from_secs(GIT_TIMEOUT_SECS)).await?)
}

/// workflow 路径判定
fn is_workflow_path(path: &str) -> bool {
    path.starts_with(".github/workflows/")
}

/// 恢复 mxcp-user-config.yml 的 profile 行
fn restore_profile(root: &Path) -> Result<bool, MergeError> {
    let path = root.join("deployment/mxcp-user-config.yml");
    let content = match std::fs::read_to_string(&path) {
        Ok(content) => content,
        Err(_) => return Ok(false),
    };
    let Some(project) = project_profile_name(root) else {
        return Ok(false);
    };

    let (patched, changed) = restore_profile_line(&content, &project);
    if changed {
        std::fs::write(&path, patched).map_err(|source| MergeError::Io {
            path: path.display().to_string(),
            source,
        })?;
        info!(profile = %project, "restored profile in mxcp-user-config.yml");
    }
    Ok(changed)
}

/// 从 config.env 推导 profile 名
///
/// PROJECT_NAME 优先；否则用 SERVICE_NAME 去掉 -mxcp 后缀
fn project_profile_name(root: &Path) -> Option<String> {
    let vars = parse_env_file(&root.join(CONFIG_ENV_PATH)).ok()?;
    if let Some(name) = vars.get("PROJECT_NAME").filter(|v| !v.is_empty()) {
        return Some(name.clone());
    }
    vars.get("SERVICE_NAME")
        .filter(|v| !v.is_empty())
        .map(|v| v.trim_end_matches("-mxcp").to_string())
}

/// 纯函数部分：profile 行被打回占位符时替换为项目名
///
/// 只动占位符残留（值里含 `{{`），手工定制的 profile 不碰
fn restore_profile_line(content: &str, project: &str) -> (String, bool) {
    let mut changed = false;
    let mut lines: Vec<String> = Vec::with_capacity(content.lines().count());

    for line in content.lines() {
        let trimmed = line.trim_start();
        if let Some(value) = trimmed.strip_prefix("profile:") {
            if value.contains("{{") {
                let indent = &line[..line.len() - trimmed.len()];
                lines.push(format!("{}profile: {}", indent, project));
                changed = true;
                continue;
            }
        }
        lines.push(line.to_string());
    }

    let mut patched = lines.join("\n");
    if content.ends_with('\n') {
        patched.push('\n');
    }
    (patched, changed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_workflow_path() {
        assert!(is_workflow_path(".github/workflows/deploy.yml"));
        assert!(!is_workflow_path("deployment/Dockerfile"));
        assert!(!is_workflow_path("github/workflows/deploy.yml"));
    }

    #[test]
    fn test_restore_profile_line_replaces_placeholder() {
        let content = "mxcp: config\n  profile: {{PROJECT_NAME}}\n  port: 8000\n";
        let (patched, changed) = restore_profile_line(content, "demo");
        assert!(changed);
        assert_eq!(patched, "mxcp: config\n  profile: demo\n  port: 8000\n");
    }

    #[test]
    fn test_restore_profile_line_keeps_custom_value() {
        let content = "profile: my-custom-profile\n";
        let (patched, changed) = restore_profile_line(content, "demo");
        assert!(!changed);
        assert_eq!(patched, content);
    }

    #[test]
    fn test_project_profile_name_prefers_project_name() {
        let dir = tempfile::TempDir::new().unwrap();
        let deployment = dir.path().join("deployment");
        std::fs::create_dir_all(&deployment).unwrap();
        std::fs::write(
            deployment.join("config.env"),
            "PROJECT_NAME=demo\nSERVICE_NAME=other-mxcp\n",
        )
        .unwrap();
        assert_eq!(project_profile_name(dir.path()).unwrap(), "demo");

        std::fs::write(deployment.join("config.env"), "SERVICE_NAME=demo-mxcp\n").unwrap();
        assert_eq!(project_profile_name(dir.path()).unwrap(), "demo");
    }

    #[tokio::test]
    async fn test_run_outside_git_repo() {
        let dir = tempfile::TempDir::new().unwrap();
        let options = MergeOptions {
            remote: "raw".to_string(),
            branch: "main".to_string(),
            root: dir.path().to_path_buf(),
        };
        let result = run(&options).await;
        assert!(matches!(result, Err(MergeError::NotARepo(_))));
    }
}
