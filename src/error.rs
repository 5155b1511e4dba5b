//! 统一错误处理
//!
//! 各模块定义自己的错误类型，这里聚合为顶层 `Error` 并映射到进程退出码

use thiserror::Error;

use crate::config::env::ConfigError;
use crate::infra::aws::AwsError;
use crate::infra::command::CommandError;
use crate::services::deploy::DeployError;
use crate::services::merge::MergeError;
use crate::services::setup::SetupError;

/// 顶层错误类型
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error(transparent)]
    Aws(#[from] AwsError),

    #[error(transparent)]
    Setup(#[from] SetupError),

    #[error(transparent)]
    Deploy(#[from] DeployError),

    #[error(transparent)]
    Merge(#[from] MergeError),

    /// 环境校验未通过
    #[error("environment validation failed with {errors} error(s)")]
    Validation { errors: usize },
}

impl Error {
    /// 映射到进程退出码
    ///
    /// 服务已有操作进行中时返回 2（调用方可选择稍后重试），其余错误返回 1
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::Deploy(DeployError::OperationInProgress { .. }) => 2,
            _ => 1,
        }
    }
}

/// 便捷类型别名
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_code_blocked_deploy() {
        let err = Error::Deploy(DeployError::OperationInProgress {
            service: "demo-mxcp".to_string(),
            status: "OPERATION_IN_PROGRESS".to_string(),
        });
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_exit_code_generic() {
        let err = Error::Validation { errors: 3 };
        assert_eq!(err.exit_code(), 1);
    }
}
