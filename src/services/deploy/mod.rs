//! App Runner 部署编排
//!
//! 对应原模板仓库的 deploy-app-runner.sh。核心是服务存在性检查的
//! 四路分支：不存在 → create；健康 → update + start-deployment；
//! 失败态 → delete 并轮询到删除完成后重建；操作进行中 → 阻塞退出。
//!
//! 整个流程在统一超时下执行，Ctrl-C 触发取消。

pub mod health;

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::env::constants::{
    DELETE_POLL_INTERVAL_SECS, DELETE_POLL_TIMEOUT_SECS, DEPLOY_TIMEOUT_SECS,
    HEALTH_POLL_INTERVAL_SECS, HEALTH_TIMEOUT_SECS, READY_POLL_INTERVAL_SECS,
};
use crate::config::env::ConfigError;
use crate::config::DeployConfig;
use crate::domain::deploy::{DeployReport, DeployStage, DeployStatus};
use crate::domain::service::{ServiceState, ServiceStatus, ServiceSummary};
use crate::infra::aws::{AppRunnerCli, AwsError};

use health::{HealthChecker, HealthError};

/// 部署参数
#[derive(Clone, Debug)]
pub struct DeployOptions {
    /// 项目根目录
    pub root: PathBuf,
    /// config.env 路径覆盖
    pub config_path: Option<PathBuf>,
    /// 镜像 tag 覆盖（CI 通常传 commit sha）
    pub image_tag: Option<String>,
    /// 是否等待服务就绪并做健康检查
    pub wait: bool,
}

/// 部署错误
#[derive(Debug, Error)]
pub enum DeployError {
    #[error("another operation is already in progress on service '{service}' (status {status}); retry after it settles")]
    OperationInProgress { service: String, status: String },

    #[error("service '{service}' was still being deleted after {timeout_secs}s")]
    DeleteTimedOut { service: String, timeout_secs: u64 },

    #[error("service '{service}' did not reach RUNNING (last status: {status})")]
    NeverReady { service: String, status: String },

    #[error("deployment timed out after {0}s")]
    TimedOut(u64),

    #[error("deployment cancelled")]
    Cancelled,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Aws(#[from] AwsError),

    #[error(transparent)]
    Health(#[from] HealthError),
}

/// 执行部署
pub async fn run(options: DeployOptions) -> Result<DeployReport, DeployError> {
    let mut config = DeployConfig::load(&options.root, options.config_path.as_deref())?;
    if let Some(tag) = &options.image_tag {
        config.image_tag = tag.clone();
    }

    let aws = AppRunnerCli::new(config.aws_region.clone(), options.root.clone());
    aws.preflight().await?;

    let image = config.image_reference();
    let deploy_id = uuid::Uuid::new_v4().to_string();
    let mut report =
        DeployReport::new(deploy_id.clone(), config.service_name.clone(), image.clone());

    info!(
        deploy_id = %deploy_id,
        service = %config.service_name,
        image = %image,
        "starting deployment"
    );

    // Ctrl-C 触发取消
    let cancel = CancellationToken::new();
    let interrupt_cancel = cancel.clone();
    let interrupt_task = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling deployment");
            interrupt_cancel.cancel();
        }
    });

    // 整体超时保护
    let result = tokio::time::timeout(
        Duration::from_secs(DEPLOY_TIMEOUT_SECS),
        execute(&aws, &config, &image, options.wait, &cancel, &mut report),
    )
    .await
    .unwrap_or(Err(DeployError::TimedOut(DEPLOY_TIMEOUT_SECS)));

    interrupt_task.abort();

    match result {
        Ok(()) => {
            report.complete(DeployStatus::Success);
            info!(deploy_id = %deploy_id, "deployment finished");
            Ok(report)
        }
        Err(e) => {
            report.complete(DeployStatus::Failed);
            error!(deploy_id = %deploy_id, "deployment failed:\n{}", report.render_summary());
            Err(e)
        }
    }
}

/// 部署主流程（阶段顺序：resolve → cleanup → apply → start → wait → health）
async fn execute(
    aws: &AppRunnerCli,
    config: &DeployConfig,
    image: &str,
    wait: bool,
    cancel: &CancellationToken,
    report: &mut DeployReport,
) -> Result<(), DeployError> {
    // Stage: resolve
    let mut stage = DeployStage::new("resolve", "Resolve Service");
    stage.start();
    let found = match aws.find_service(&config.service_name).await {
        Ok(found) => found,
        Err(e) => {
            stage.finish(false, Some(e.to_string()));
            report.stages.push(stage);
            return Err(e.into());
        }
    };
    let state = ServiceState::classify(found);
    stage.finish(true, Some(state.name().to_string()));
    report.stages.push(stage);
    info!(branch = state.name(), service = %config.service_name, "service state resolved");

    let mut cleanup = DeployStage::new("cleanup", "Delete Failed Service");
    let mut apply = DeployStage::new("apply", "Apply Service Configuration");
    let mut start = DeployStage::new("start", "Start Deployment");

    let service = match state {
        ServiceState::Busy(s) => {
            cleanup.skip(None);
            apply.skip(Some("service is busy".to_string()));
            report.stages.push(cleanup);
            report.stages.push(apply);
            return Err(DeployError::OperationInProgress {
                service: s.service_name,
                status: s.status.as_str().to_string(),
            });
        }

        ServiceState::Healthy(s) => {
            cleanup.skip(Some("service is healthy".to_string()));
            report.stages.push(cleanup);
            check_cancelled(cancel)?;

            // 更新镜像引用与实例配置
            apply.start();
            let updated = match aws.update_service(&s.service_arn, config, image).await {
                Ok(updated) => updated,
                Err(e) => {
                    apply.finish(false, Some(e.to_string()));
                    report.stages.push(apply);
                    return Err(e.into());
                }
            };
            apply.finish(true, Some("update-service".to_string()));
            report.stages.push(apply);

            // update 让服务进入 OPERATION_IN_PROGRESS，必须等它稳定才能
            // start-deployment（强制拉取可变 tag 指向的最新镜像内容）
            start.start();
            let result = match wait_for_running(aws, &updated, cancel).await {
                Ok(_) => aws
                    .start_deployment(&s.service_arn)
                    .await
                    .map(|_| ())
                    .map_err(DeployError::from),
                Err(e) => Err(e),
            };
            if let Err(e) = result {
                start.finish(false, Some(e.to_string()));
                report.stages.push(start);
                return Err(e);
            }
            start.finish(true, None);
            report.stages.push(start);
            updated
        }

        ServiceState::NeedsCleanup(s) => {
            // 失败态的服务无法接收部署，删除后重建
            cleanup.start();
            warn!(
                service = %s.service_name,
                status = s.status.as_str(),
                "service is in a failed state, deleting before recreate"
            );
            let result = match aws.delete_service(&s.service_arn).await {
                Ok(_) => wait_until_gone(aws, &s, cancel).await,
                Err(e) => Err(e.into()),
            };
            if let Err(e) = result {
                cleanup.finish(false, Some(e.to_string()));
                report.stages.push(cleanup);
                return Err(e);
            }
            cleanup.finish(true, None);
            report.stages.push(cleanup);
            check_cancelled(cancel)?;

            apply.start();
            let created = match aws.create_service(config, image).await {
                Ok(created) => created,
                Err(e) => {
                    apply.finish(false, Some(e.to_string()));
                    report.stages.push(apply);
                    return Err(e.into());
                }
            };
            apply.finish(true, Some("create-service".to_string()));
            report.stages.push(apply);
            // create-service 自带首次部署
            start.skip(Some("create-service deploys implicitly".to_string()));
            report.stages.push(start);
            created
        }

        ServiceState::Absent => {
            cleanup.skip(Some("service does not exist".to_string()));
            report.stages.push(cleanup);
            check_cancelled(cancel)?;

            apply.start();
            let created = match aws.create_service(config, image).await {
                Ok(created) => created,
                Err(e) => {
                    apply.finish(false, Some(e.to_string()));
                    report.stages.push(apply);
                    return Err(e.into());
                }
            };
            apply.finish(true, Some("create-service".to_string()));
            report.stages.push(apply);
            start.skip(Some("create-service deploys implicitly".to_string()));
            report.stages.push(start);
            created
        }
    };

    report.service_arn = Some(service.service_arn.clone());
    report.service_url = service.service_url.clone();

    // Stage: wait
    let mut wait_stage = DeployStage::new("wait", "Wait For RUNNING");
    if !wait {
        wait_stage.skip(Some("--no-wait".to_string()));
        report.stages.push(wait_stage);
        return Ok(());
    }
    wait_stage.start();
    let ready = match wait_for_running(aws, &service, cancel).await {
        Ok(ready) => ready,
        Err(e) => {
            wait_stage.finish(false, Some(e.to_string()));
            report.stages.push(wait_stage);
            return Err(e);
        }
    };
    wait_stage.finish(true, None);
    report.stages.push(wait_stage);
    report.service_url = ready.service_url.clone();

    // Stage: health
    let mut health_stage = DeployStage::new("health", "Health Check");
    let Some(service_url) = ready.service_url.as_deref() else {
        health_stage.skip(Some("service URL unknown".to_string()));
        report.stages.push(health_stage);
        return Ok(());
    };
    health_stage.start();
    let checker = HealthChecker::new();
    let result = checker
        .wait_healthy(
            service_url,
            &config.health_path,
            Duration::from_secs(HEALTH_TIMEOUT_SECS),
            Duration::from_secs(HEALTH_POLL_INTERVAL_SECS),
            cancel,
        )
        .await;
    match result {
        Ok(()) => {
            health_stage.finish(true, None);
            report.stages.push(health_stage);
            Ok(())
        }
        Err(e) => {
            health_stage.finish(false, Some(e.to_string()));
            report.stages.push(health_stage);
            Err(e.into())
        }
    }
}

/// 轮询 describe-service 直到删除完成
async fn wait_until_gone(
    aws: &AppRunnerCli,
    service: &ServiceSummary,
    cancel: &CancellationToken,
) -> Result<(), DeployError> {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(DELETE_POLL_TIMEOUT_SECS);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Err(DeployError::Cancelled),
            _ = tokio::time::sleep(Duration::from_secs(DELETE_POLL_INTERVAL_SECS)) => {}
        }

        match aws.describe_service(&service.service_arn).await? {
            None => return Ok(()),
            Some(s) if s.status.is_gone() => return Ok(()),
            Some(s) => {
                debug!(status = s.status.as_str(), "waiting for service deletion");
            }
        }

        if tokio::time::Instant::now() >= deadline {
            return Err(DeployError::DeleteTimedOut {
                service: service.service_name.clone(),
                timeout_secs: DELETE_POLL_TIMEOUT_SECS,
            });
        }
    }
}

/// 轮询 describe-service 直到 RUNNING
///
/// 观察到失败态立即报错；整体时长由外层部署超时兜底
async fn wait_for_running(
    aws: &AppRunnerCli,
    service: &ServiceSummary,
    cancel: &CancellationToken,
) -> Result<ServiceSummary, DeployError> {
    loop {
        match aws.describe_service(&service.service_arn).await? {
            Some(s) if s.status == ServiceStatus::Running => return Ok(s),
            Some(s)
                if matches!(
                    s.status,
                    ServiceStatus::CreateFailed
                        | ServiceStatus::DeleteFailed
                        | ServiceStatus::Deleted
                ) =>
            {
                return Err(DeployError::NeverReady {
                    service: s.service_name,
                    status: s.status.as_str().to_string(),
                });
            }
            Some(s) => {
                debug!(status = s.status.as_str(), "waiting for service to settle");
            }
            None => {
                return Err(DeployError::NeverReady {
                    service: service.service_name.clone(),
                    status: "NOT_FOUND".to_string(),
                });
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => return Err(DeployError::Cancelled),
            _ = tokio::time::sleep(Duration::from_secs(READY_POLL_INTERVAL_SECS)) => {}
        }
    }
}

/// 阶段之间的取消检查
fn check_cancelled(cancel: &CancellationToken) -> Result<(), DeployError> {
    if cancel.is_cancelled() {
        Err(DeployError::Cancelled)
    } else {
        Ok(())
    }
}
