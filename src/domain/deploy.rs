//! 部署相关领域模型

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 部署整体状态
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DeployStatus {
    Running,
    Success,
    Failed,
}

impl DeployStatus {
    /// 转换为字符串
    pub fn as_str(&self) -> &'static str {
        match self {
            DeployStatus::Running => "running",
            DeployStatus::Success => "success",
            DeployStatus::Failed => "failed",
        }
    }

    /// 是否为终态
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeployStatus::Success | DeployStatus::Failed)
    }
}

/// 阶段状态
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Running,
    Success,
    Failed,
    Skipped,
}

/// 部署阶段
///
/// App Runner 部署的阶段序列：resolve → cleanup → apply → start → wait → health。
/// cleanup 仅在失败态服务需要重建时执行，其余情况 skip
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeployStage {
    /// 阶段标识（如 "resolve", "cleanup", "apply"）
    pub name: String,
    /// 显示名称（如 "Resolve Service"）
    pub display_name: String,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub status: StageStatus,
    /// 附加信息（失败原因、跳过原因等）
    pub message: Option<String>,
}

impl DeployStage {
    /// 创建新的待执行阶段
    pub fn new(name: &str, display_name: &str) -> Self {
        Self {
            name: name.to_string(),
            display_name: display_name.to_string(),
            started_at: None,
            finished_at: None,
            duration_ms: None,
            status: StageStatus::Pending,
            message: None,
        }
    }

    /// 开始执行阶段
    pub fn start(&mut self) {
        self.started_at = Some(Utc::now());
        self.status = StageStatus::Running;
    }

    /// 完成阶段
    pub fn finish(&mut self, success: bool, message: Option<String>) {
        let now = Utc::now();
        self.finished_at = Some(now);
        self.status = if success {
            StageStatus::Success
        } else {
            StageStatus::Failed
        };
        self.message = message;
        if let Some(started) = self.started_at {
            self.duration_ms = Some((now - started).num_milliseconds());
        }
    }

    /// 跳过阶段
    pub fn skip(&mut self, reason: Option<String>) {
        self.status = StageStatus::Skipped;
        self.message = reason;
    }
}

/// 部署执行报告
#[derive(Clone, Debug, Serialize)]
pub struct DeployReport {
    /// 部署 ID
    pub deploy_id: String,
    pub service_name: String,
    /// 部署的镜像引用
    pub image: String,
    pub status: DeployStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub stages: Vec<DeployStage>,
    /// 创建/更新后的服务 ARN
    pub service_arn: Option<String>,
    /// 服务的公网 URL（不带 scheme）
    pub service_url: Option<String>,
}

impl DeployReport {
    /// 创建新报告
    pub fn new(deploy_id: String, service_name: String, image: String) -> Self {
        Self {
            deploy_id,
            service_name,
            image,
            status: DeployStatus::Running,
            started_at: Utc::now(),
            finished_at: None,
            stages: Vec::new(),
            service_arn: None,
            service_url: None,
        }
    }

    /// 结束报告
    pub fn complete(&mut self, status: DeployStatus) {
        self.status = status;
        self.finished_at = Some(Utc::now());
    }

    /// 渲染阶段摘要（每阶段一行）
    pub fn render_summary(&self) -> String {
        let mut out = String::new();
        for stage in &self.stages {
            let duration = stage
                .duration_ms
                .map(|ms| format!("{:.1}s", ms as f64 / 1000.0))
                .unwrap_or_else(|| "-".to_string());
            out.push_str(&format!(
                "  {:<10} {:<22} {:>8}  {}\n",
                format!("{:?}", stage.status).to_lowercase(),
                stage.display_name,
                duration,
                stage.message.as_deref().unwrap_or("")
            ));
        }
        out
    }
}

/// 日志行（子进程输出的流式单元）
#[derive(Clone, Debug, Serialize)]
pub struct LogLine {
    pub timestamp: DateTime<Utc>,
    pub stream: String, // stdout | stderr
    pub content: String,
}

impl LogLine {
    /// 创建新日志行
    pub fn new(stream: &str, content: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            stream: stream.to_string(),
            content: content.into(),
        }
    }
}
