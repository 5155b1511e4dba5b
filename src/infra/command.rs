//! 命令执行器
//!
//! aws / git 子进程的统一执行入口，支持：
//! - 捕获 stdout（JSON 输出解析场景）
//! - 实时日志流式输出（git fetch 等长时间操作）
//! - 超时控制与取消

use std::path::Path;
use std::process::ExitStatus;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::domain::deploy::LogLine;

/// 命令执行器
pub struct CommandRunner;

/// 命令执行错误
#[derive(Debug, Error)]
pub enum CommandError {
    #[error("failed to spawn '{program}': {source}")]
    SpawnFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{program}' timed out after {timeout:?}")]
    Timeout { program: String, timeout: Duration },

    #[error("command was cancelled")]
    Cancelled,

    #[error("'{program}' exited with {code}: {stderr}")]
    NonZeroExit {
        program: String,
        code: i32,
        stderr: String,
    },

    #[error("failed to wait for '{program}': {source}")]
    WaitFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },
}

/// 流式执行结果
pub struct CommandResult {
    /// 退出状态
    pub status: ExitStatus,
    /// 是否因超时而终止
    pub timed_out: bool,
}

impl CommandRunner {
    /// 执行命令并捕获 stdout
    ///
    /// 非零退出码转换为 `NonZeroExit` 错误，stderr 附在错误里。
    /// 用于 aws CLI 等输出 JSON 的调用
    pub async fn run_capture(
        program: &str,
        args: &[&str],
        work_dir: &Path,
        timeout: Duration,
    ) -> Result<String, CommandError> {
        let output = Self::run_output(program, args, work_dir, timeout).await?;

        if !output.status.success() {
            return Err(CommandError::NonZeroExit {
                program: program.to_string(),
                code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// 执行命令并返回完整 Output，不检查退出码
    ///
    /// 用于预期可能失败且需要自行分支的调用（git merge、describe 不存在的服务）
    pub async fn run_output(
        program: &str,
        args: &[&str],
        work_dir: &Path,
        timeout: Duration,
    ) -> Result<std::process::Output, CommandError> {
        let child = Command::new(program)
            .args(args)
            .current_dir(work_dir)
            .output();

        tokio::select! {
            result = child => {
                result.map_err(|source| CommandError::SpawnFailed {
                    program: program.to_string(),
                    source,
                })
            }
            _ = tokio::time::sleep(timeout) => {
                Err(CommandError::Timeout {
                    program: program.to_string(),
                    timeout,
                })
            }
        }
    }

    /// 执行命令并流式输出日志
    ///
    /// stdout/stderr 按行发送到 `log_tx`，支持取消和超时
    pub async fn run_with_streaming(
        program: &str,
        args: &[&str],
        work_dir: &Path,
        log_tx: broadcast::Sender<LogLine>,
        cancel: CancellationToken,
        timeout: Duration,
    ) -> Result<CommandResult, CommandError> {
        let mut child = Command::new(program)
            .args(args)
            .current_dir(work_dir)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .spawn()
            .map_err(|source| CommandError::SpawnFailed {
                program: program.to_string(),
                source,
            })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        // stdout 读取任务
        let stdout_tx = log_tx.clone();
        let stdout_task = tokio::spawn(async move {
            if let Some(stdout) = stdout {
                let reader = BufReader::new(stdout);
                let mut lines = reader.lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let _ = stdout_tx.send(LogLine::new("stdout", line));
                }
            }
        });

        // stderr 读取任务
        let stderr_tx = log_tx.clone();
        let stderr_task = tokio::spawn(async move {
            if let Some(stderr) = stderr {
                let reader = BufReader::new(stderr);
                let mut lines = reader.lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    let _ = stderr_tx.send(LogLine::new("stderr", line));
                }
            }
        });

        // 等待命令完成，支持超时和取消
        let result = tokio::select! {
            _ = cancel.cancelled() => {
                warn!(program, "command cancelled, killing process");
                let _ = child.kill().await;
                Err(CommandError::Cancelled)
            }
            _ = tokio::time::sleep(timeout) => {
                error!(program, ?timeout, "command timed out");
                let _ = child.kill().await;
                // 等待进程实际终止
                let status = child.wait().await.map_err(|source| CommandError::WaitFailed {
                    program: program.to_string(),
                    source,
                })?;
                Ok(CommandResult { status, timed_out: true })
            }
            status = child.wait() => {
                let status = status.map_err(|source| CommandError::WaitFailed {
                    program: program.to_string(),
                    source,
                })?;
                Ok(CommandResult { status, timed_out: false })
            }
        };

        // 等待日志读取完成
        let _ = stdout_task.await;
        let _ = stderr_task.await;

        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[tokio::test]
    async fn test_run_capture_success() {
        let result = CommandRunner::run_capture(
            "echo",
            &["hello"],
            &PathBuf::from("/tmp"),
            Duration::from_secs(5),
        )
        .await;

        assert!(result.unwrap().contains("hello"));
    }

    #[tokio::test]
    async fn test_run_capture_nonzero_exit() {
        let result = CommandRunner::run_capture(
            "sh",
            &["-c", "echo boom >&2; exit 3"],
            &PathBuf::from("/tmp"),
            Duration::from_secs(5),
        )
        .await;

        match result {
            Err(CommandError::NonZeroExit { code, stderr, .. }) => {
                assert_eq!(code, 3);
                assert_eq!(stderr, "boom");
            }
            other => panic!("expected NonZeroExit, got {:?}", other.map(|_| ())),
        }
    }

    #[tokio::test]
    async fn test_run_capture_not_found() {
        let result = CommandRunner::run_capture(
            "nonexistent_command_12345",
            &[],
            &PathBuf::from("/tmp"),
            Duration::from_secs(5),
        )
        .await;

        assert!(matches!(result, Err(CommandError::SpawnFailed { .. })));
    }

    #[tokio::test]
    async fn test_run_with_streaming_collects_lines() {
        let (tx, mut rx) = broadcast::channel(16);
        let result = CommandRunner::run_with_streaming(
            "sh",
            &["-c", "echo one; echo two >&2"],
            &PathBuf::from("/tmp"),
            tx,
            CancellationToken::new(),
            Duration::from_secs(5),
        )
        .await
        .unwrap();

        assert!(result.status.success());
        assert!(!result.timed_out);

        let mut streams = Vec::new();
        while let Ok(line) = rx.try_recv() {
            streams.push((line.stream, line.content));
        }
        assert!(streams.contains(&("stdout".to_string(), "one".to_string())));
        assert!(streams.contains(&("stderr".to_string(), "two".to_string())));
    }
}
