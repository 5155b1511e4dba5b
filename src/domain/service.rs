//! App Runner 服务领域模型
//!
//! describe-service / list-services 的 JSON 映射，以及部署前的
//! 服务存在性判定

use serde::{Deserialize, Serialize};

/// App Runner 服务状态（API 返回的 Status 字段）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServiceStatus {
    CreateFailed,
    Running,
    Deleted,
    DeleteFailed,
    Paused,
    OperationInProgress,
    #[serde(other)]
    Unknown,
}

impl ServiceStatus {
    /// 转换为字符串
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceStatus::CreateFailed => "CREATE_FAILED",
            ServiceStatus::Running => "RUNNING",
            ServiceStatus::Deleted => "DELETED",
            ServiceStatus::DeleteFailed => "DELETE_FAILED",
            ServiceStatus::Paused => "PAUSED",
            ServiceStatus::OperationInProgress => "OPERATION_IN_PROGRESS",
            ServiceStatus::Unknown => "UNKNOWN",
        }
    }

    /// 服务是否已不存在（删除轮询的终点）
    pub fn is_gone(&self) -> bool {
        matches!(self, ServiceStatus::Deleted)
    }
}

/// 服务摘要
///
/// list-services 的 ServiceSummaryList 元素和 describe-service 的 Service
/// 对象共享这些字段（AWS JSON 为 PascalCase）
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "PascalCase")]
pub struct ServiceSummary {
    pub service_name: String,
    pub service_arn: String,
    #[serde(default)]
    pub service_url: Option<String>,
    pub status: ServiceStatus,
}

/// 服务存在性判定结果，决定部署走哪条分支
#[derive(Clone, Debug, PartialEq)]
pub enum ServiceState {
    /// 服务不存在：create-service
    Absent,
    /// 服务健康运行：update-service + start-deployment
    Healthy(ServiceSummary),
    /// 服务处于失败态，无法接收部署：delete-service 后重建
    NeedsCleanup(ServiceSummary),
    /// 服务已有操作进行中：阻塞本次部署
    Busy(ServiceSummary),
}

impl ServiceState {
    /// 根据 list-services / describe-service 的结果分类
    ///
    /// PAUSED 的服务无法 update，按失败态处理（删除重建）；
    /// 未知状态一律按 Busy 处理，不碰服务
    pub fn classify(summary: Option<ServiceSummary>) -> Self {
        match summary {
            None => ServiceState::Absent,
            Some(s) => match s.status {
                ServiceStatus::Running => ServiceState::Healthy(s),
                ServiceStatus::Deleted => ServiceState::Absent,
                ServiceStatus::CreateFailed
                | ServiceStatus::DeleteFailed
                | ServiceStatus::Paused => ServiceState::NeedsCleanup(s),
                ServiceStatus::OperationInProgress | ServiceStatus::Unknown => {
                    ServiceState::Busy(s)
                }
            },
        }
    }

    /// 分支名称（用于日志）
    pub fn name(&self) -> &'static str {
        match self {
            ServiceState::Absent => "absent",
            ServiceState::Healthy(_) => "healthy",
            ServiceState::NeedsCleanup(_) => "needs_cleanup",
            ServiceState::Busy(_) => "busy",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(status: ServiceStatus) -> ServiceSummary {
        ServiceSummary {
            service_name: "demo-mxcp".to_string(),
            service_arn: "arn:aws:apprunner:us-east-1:123456789012:service/demo-mxcp/abc"
                .to_string(),
            service_url: Some("demo.awsapprunner.com".to_string()),
            status,
        }
    }

    #[test]
    fn test_status_deserializes_from_aws_spelling() {
        let status: ServiceStatus = serde_json::from_str("\"OPERATION_IN_PROGRESS\"").unwrap();
        assert_eq!(status, ServiceStatus::OperationInProgress);

        let status: ServiceStatus = serde_json::from_str("\"CREATE_FAILED\"").unwrap();
        assert_eq!(status, ServiceStatus::CreateFailed);

        // 未收录的状态落到 Unknown 而不是解析失败
        let status: ServiceStatus = serde_json::from_str("\"SOME_NEW_STATUS\"").unwrap();
        assert_eq!(status, ServiceStatus::Unknown);
    }

    #[test]
    fn test_summary_deserializes_pascal_case() {
        let json = r#"{
            "ServiceName": "demo-mxcp",
            "ServiceArn": "arn:aws:apprunner:us-east-1:123456789012:service/demo-mxcp/abc",
            "ServiceUrl": "demo.awsapprunner.com",
            "Status": "RUNNING",
            "CreatedAt": "2025-11-02T10:00:00Z"
        }"#;
        let summary: ServiceSummary = serde_json::from_str(json).unwrap();
        assert_eq!(summary.service_name, "demo-mxcp");
        assert_eq!(summary.status, ServiceStatus::Running);
    }

    #[test]
    fn test_classify_four_way_branch() {
        assert_eq!(ServiceState::classify(None), ServiceState::Absent);

        let s = summary(ServiceStatus::Running);
        assert_eq!(
            ServiceState::classify(Some(s.clone())),
            ServiceState::Healthy(s)
        );

        let s = summary(ServiceStatus::CreateFailed);
        assert_eq!(
            ServiceState::classify(Some(s.clone())),
            ServiceState::NeedsCleanup(s)
        );

        let s = summary(ServiceStatus::OperationInProgress);
        assert_eq!(
            ServiceState::classify(Some(s.clone())),
            ServiceState::Busy(s)
        );

        // 残留的 DELETED 记录等同不存在
        let s = summary(ServiceStatus::Deleted);
        assert_eq!(ServiceState::classify(Some(s)), ServiceState::Absent);
    }
}
