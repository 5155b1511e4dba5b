//! AWS CLI 封装
//!
//! 通过 aws 子进程驱动 App Runner 控制面。凭证解析（profile、SSO、
//! 实例角色）完全交给 aws CLI 本身，和 operator 在 shell 里的行为一致。
//! JSON 输出用 serde 解析成领域模型。

use std::path::PathBuf;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::env::constants::AWS_CALL_TIMEOUT_SECS;
use crate::config::DeployConfig;
use crate::domain::service::ServiceSummary;
use crate::infra::command::{CommandError, CommandRunner};

/// aws CLI 错误
#[derive(Debug, Error)]
pub enum AwsError {
    #[error("aws CLI not found on PATH; install it first (https://docs.aws.amazon.com/cli/latest/userguide/getting-started-install.html)")]
    CliMissing,

    #[error("aws apprunner {operation} failed: {stderr}")]
    OperationFailed { operation: String, stderr: String },

    #[error("failed to parse aws apprunner {operation} output: {source}")]
    Parse {
        operation: String,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Command(#[from] CommandError),
}

/// list-services 响应
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ListServicesResponse {
    service_summary_list: Vec<ServiceSummary>,
}

/// describe/create/update/delete-service 响应
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ServiceResponse {
    service: ServiceSummary,
}

/// start-deployment 响应
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StartDeploymentResponse {
    operation_id: String,
}

/// App Runner CLI 客户端
#[derive(Clone, Debug)]
pub struct AppRunnerCli {
    region: String,
    work_dir: PathBuf,
}

impl AppRunnerCli {
    /// 创建客户端
    pub fn new(region: impl Into<String>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            region: region.into(),
            work_dir: work_dir.into(),
        }
    }

    /// 预检：aws CLI 是否可用
    pub async fn preflight(&self) -> Result<(), AwsError> {
        let version = CommandRunner::run_capture(
            "aws",
            &["--version"],
            &self.work_dir,
            Duration::from_secs(10),
        )
        .await
        .map_err(|e| match e {
            CommandError::SpawnFailed { .. } => AwsError::CliMissing,
            other => AwsError::Command(other),
        })?;
        debug!(version = version.trim(), "aws CLI found");
        Ok(())
    }

    /// 按服务名查找服务
    pub async fn find_service(&self, name: &str) -> Result<Option<ServiceSummary>, AwsError> {
        let output = self.call("list-services", &[]).await?;
        let response: ListServicesResponse = parse("list-services", &output)?;
        Ok(response
            .service_summary_list
            .into_iter()
            .find(|s| s.service_name == name))
    }

    /// 查询服务详情；服务不存在返回 None
    pub async fn describe_service(&self, arn: &str) -> Result<Option<ServiceSummary>, AwsError> {
        match self.call("describe-service", &["--service-arn", arn]).await {
            Ok(output) => {
                let response: ServiceResponse = parse("describe-service", &output)?;
                Ok(Some(response.service))
            }
            Err(AwsError::OperationFailed { stderr, .. })
                if stderr.contains("ResourceNotFoundException") =>
            {
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// 创建服务
    pub async fn create_service(
        &self,
        config: &DeployConfig,
        image: &str,
    ) -> Result<ServiceSummary, AwsError> {
        info!(service = %config.service_name, image, "creating App Runner service");
        let source = source_configuration(config, image).to_string();
        let instance = instance_configuration(config).to_string();
        let health = health_check_configuration(config).to_string();
        let output = self
            .call(
                "create-service",
                &[
                    "--service-name",
                    &config.service_name,
                    "--source-configuration",
                    &source,
                    "--instance-configuration",
                    &instance,
                    "--health-check-configuration",
                    &health,
                ],
            )
            .await?;
        let response: ServiceResponse = parse("create-service", &output)?;
        Ok(response.service)
    }

    /// 更新服务的镜像与实例配置
    pub async fn update_service(
        &self,
        arn: &str,
        config: &DeployConfig,
        image: &str,
    ) -> Result<ServiceSummary, AwsError> {
        info!(service = %config.service_name, image, "updating App Runner service");
        let source = source_configuration(config, image).to_string();
        let instance = instance_configuration(config).to_string();
        let output = self
            .call(
                "update-service",
                &[
                    "--service-arn",
                    arn,
                    "--source-configuration",
                    &source,
                    "--instance-configuration",
                    &instance,
                ],
            )
            .await?;
        let response: ServiceResponse = parse("update-service", &output)?;
        Ok(response.service)
    }

    /// 删除服务（返回后服务进入删除流程，需轮询确认）
    pub async fn delete_service(&self, arn: &str) -> Result<ServiceSummary, AwsError> {
        info!(arn, "deleting App Runner service");
        let output = self.call("delete-service", &["--service-arn", arn]).await?;
        let response: ServiceResponse = parse("delete-service", &output)?;
        Ok(response.service)
    }

    /// 触发一次新部署（拉取镜像引用指向的最新内容）
    pub async fn start_deployment(&self, arn: &str) -> Result<String, AwsError> {
        let output = self
            .call("start-deployment", &["--service-arn", arn])
            .await?;
        let response: StartDeploymentResponse = parse("start-deployment", &output)?;
        info!(operation_id = %response.operation_id, "deployment started");
        Ok(response.operation_id)
    }

    /// 调用 aws apprunner 子命令
    async fn call(&self, operation: &str, args: &[&str]) -> Result<String, AwsError> {
        let mut full: Vec<&str> = vec!["apprunner", operation];
        full.extend_from_slice(args);
        full.extend_from_slice(&[
            "--region",
            self.region.as_str(),
            "--output",
            "json",
            "--no-cli-pager",
        ]);

        debug!(operation, "invoking aws CLI");
        CommandRunner::run_capture(
            "aws",
            &full,
            &self.work_dir,
            Duration::from_secs(AWS_CALL_TIMEOUT_SECS),
        )
        .await
        .map_err(|e| match e {
            CommandError::SpawnFailed { .. } => AwsError::CliMissing,
            CommandError::NonZeroExit { stderr, .. } => AwsError::OperationFailed {
                operation: operation.to_string(),
                stderr,
            },
            other => AwsError::Command(other),
        })
    }
}

/// 解析 aws CLI 的 JSON 输出
fn parse<T: DeserializeOwned>(operation: &str, payload: &str) -> Result<T, AwsError> {
    serde_json::from_str(payload).map_err(|source| AwsError::Parse {
        operation: operation.to_string(),
        source,
    })
}

/// --source-configuration 载荷
///
/// ECR 拉取走模板约定的 AppRunnerECRAccessRole；AutoDeploymentsEnabled
/// 关闭，由 start-deployment 显式触发
fn source_configuration(config: &DeployConfig, image: &str) -> serde_json::Value {
    let env: serde_json::Map<String, serde_json::Value> = config
        .runtime_env
        .iter()
        .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
        .collect();

    json!({
        "ImageRepository": {
            "ImageIdentifier": image,
            "ImageRepositoryType": "ECR",
            "ImageConfiguration": {
                "Port": config.port.to_string(),
                "RuntimeEnvironmentVariables": env,
            }
        },
        "AuthenticationConfiguration": {
            "AccessRoleArn": format!(
                "arn:aws:iam::{}:role/AppRunnerECRAccessRole",
                config.aws_account_id
            )
        },
        "AutoDeploymentsEnabled": false
    })
}

/// --instance-configuration 载荷
fn instance_configuration(config: &DeployConfig) -> serde_json::Value {
    json!({
        "Cpu": config.cpu_size,
        "Memory": config.memory_size,
    })
}

/// --health-check-configuration 载荷
fn health_check_configuration(config: &DeployConfig) -> serde_json::Value {
    json!({
        "Protocol": "HTTP",
        "Path": config.health_path,
        "Interval": 10,
        "Timeout": 5,
        "HealthyThreshold": 1,
        "UnhealthyThreshold": 5,
    })
}
