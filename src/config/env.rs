//! 部署配置加载
//!
//! 配置来源优先级：进程环境变量 > `deployment/config.env` > 内置默认值。
//! config.env 是 shell 语法子集的 KEY=value 文件（空行与 # 注释忽略，
//! 值两侧的引号剥离，不做变量插值）。

use std::collections::HashMap;
use std::env;
use std::path::Path;

use thiserror::Error;
use tracing::warn;

/// config.env 在项目内的约定路径
pub const CONFIG_ENV_PATH: &str = "deployment/config.env";

/// 会被转发给 App Runner 运行时的密钥变量
///
/// 这些变量从不写入 config.env（见 validate 的密钥检查），只从进程环境读取
pub const RUNTIME_SECRET_VARS: &[&str] = &[
    "OPENAI_API_KEY",
    "ANTHROPIC_API_KEY",
    "MXCP_DATA_ACCESS_KEY_ID",
    "MXCP_DATA_SECRET_ACCESS_KEY",
];

/// 配置错误
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("AWS_ACCOUNT_ID is not set; add it to {CONFIG_ENV_PATH} or export it")]
    MissingAccountId,

    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// 部署配置
#[derive(Clone, Debug)]
pub struct DeployConfig {
    /// AWS 账户 ID（必填，缺失为硬错误）
    pub aws_account_id: String,
    /// AWS 区域
    pub aws_region: String,
    /// App Runner 服务名（兼容旧名称 APP_RUNNER_SERVICE）
    pub service_name: String,
    /// ECR 仓库名
    pub ecr_repository: String,
    /// 实例 CPU（App Runner 单位，如 "1024"）
    pub cpu_size: String,
    /// 实例内存（如 "2048"）
    pub memory_size: String,
    /// 容器监听端口
    pub port: u16,
    /// 健康检查路径
    pub health_path: String,
    /// 镜像 tag
    pub image_tag: String,
    /// 转发给服务运行时的环境变量（按 RUNTIME_SECRET_VARS 从进程环境收集）
    pub runtime_env: Vec<(String, String)>,
}

impl DeployConfig {
    /// 从项目根目录加载配置
    ///
    /// `config_path` 可覆盖默认的 config.env 位置。文件缺失不是错误：
    /// 打印警告并退回环境变量与默认值。
    pub fn load(project_root: &Path, config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let file = match config_path {
            Some(p) => p.to_path_buf(),
            None => project_root.join(CONFIG_ENV_PATH),
        };

        let file_vars = if file.exists() {
            parse_env_file(&file)?
        } else {
            warn!(path = %file.display(), "config file not found, using environment and defaults");
            HashMap::new()
        };

        Self::resolve(&file_vars, |key| env::var(key).ok())
    }

    /// 按来源优先级解析配置
    ///
    /// `env_lookup` 注入进程环境，便于测试
    pub fn resolve(
        file_vars: &HashMap<String, String>,
        env_lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let get = |key: &str| -> Option<String> {
            env_lookup(key)
                .filter(|v| !v.is_empty())
                .or_else(|| file_vars.get(key).cloned().filter(|v| !v.is_empty()))
        };

        let aws_account_id = get("AWS_ACCOUNT_ID").ok_or(ConfigError::MissingAccountId)?;

        // 服务名支持旧名称兼容
        let service_name = get("SERVICE_NAME").or_else(|| get("APP_RUNNER_SERVICE"));
        if service_name.is_none() {
            warn!("SERVICE_NAME not set, using default '{}'", defaults::SERVICE_NAME);
        } else if get("SERVICE_NAME").is_none() {
            warn!("APP_RUNNER_SERVICE is deprecated, please rename it to SERVICE_NAME");
        }
        let service_name = service_name.unwrap_or_else(|| defaults::SERVICE_NAME.to_string());

        let ecr_repository = get("ECR_REPOSITORY").unwrap_or_else(|| service_name.clone());

        let port = get("PORT")
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults::PORT);

        let runtime_env = RUNTIME_SECRET_VARS
            .iter()
            .copied()
            .filter_map(|key| {
                env_lookup(key)
                    .filter(|v| !v.is_empty())
                    .map(|v| (key.to_string(), v))
            })
            .collect();

        Ok(Self {
            aws_account_id,
            aws_region: get("AWS_REGION").unwrap_or_else(|| defaults::AWS_REGION.to_string()),
            service_name,
            ecr_repository,
            cpu_size: get("CPU_SIZE").unwrap_or_else(|| defaults::CPU_SIZE.to_string()),
            memory_size: get("MEMORY_SIZE").unwrap_or_else(|| defaults::MEMORY_SIZE.to_string()),
            port,
            health_path: get("HEALTH_PATH").unwrap_or_else(|| defaults::HEALTH_PATH.to_string()),
            image_tag: get("IMAGE_TAG").unwrap_or_else(|| defaults::IMAGE_TAG.to_string()),
            runtime_env,
        })
    }

    /// 完整的 ECR 镜像引用
    pub fn image_reference(&self) -> String {
        format!(
            "{}.dkr.ecr.{}.amazonaws.com/{}:{}",
            self.aws_account_id, self.aws_region, self.ecr_repository, self.image_tag
        )
    }
}

/// 解析 KEY=value 配置文件
///
/// 空行和 # 注释忽略；没有 '=' 的行跳过并打印警告；值两侧的成对引号剥离；
/// 行首的 `export ` 前缀容忍（operator 习惯把文件 source 进 shell）
pub fn parse_env_file(path: &Path) -> Result<HashMap<String, String>, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    Ok(parse_env_content(&content))
}

/// 解析配置文件内容（纯函数部分）
pub fn parse_env_content(content: &str) -> HashMap<String, String> {
    let mut vars = HashMap::new();
    for (lineno, raw) in content.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let line = line.strip_prefix("export ").unwrap_or(line).trim_start();
        match line.split_once('=') {
            Some((key, value)) => {
                let key = key.trim();
                if key.is_empty() {
                    warn!(line = lineno + 1, "skipping malformed config line");
                    continue;
                }
                vars.insert(key.to_string(), strip_quotes(value.trim()).to_string());
            }
            None => {
                warn!(line = lineno + 1, content = line, "skipping malformed config line");
            }
        }
    }
    vars
}

/// 剥离值两侧成对的单引号或双引号
fn strip_quotes(value: &str) -> &str {
    let bytes = value.as_bytes();
    if bytes.len() >= 2 {
        let (first, last) = (bytes[0], bytes[bytes.len() - 1]);
        if first == last && (first == b'"' || first == b'\'') {
            return &value[1..value.len() - 1];
        }
    }
    value
}

/// 常量
pub mod constants {
    /// 整体部署超时（秒）
    pub const DEPLOY_TIMEOUT_SECS: u64 = 1800; // 30 分钟

    /// 删除轮询间隔（秒）
    pub const DELETE_POLL_INTERVAL_SECS: u64 = 10;

    /// 删除轮询最大时长（秒）
    pub const DELETE_POLL_TIMEOUT_SECS: u64 = 600;

    /// 服务就绪轮询间隔（秒）
    pub const READY_POLL_INTERVAL_SECS: u64 = 10;

    /// 健康检查轮询间隔（秒）
    pub const HEALTH_POLL_INTERVAL_SECS: u64 = 5;

    /// 健康检查最大时长（秒）
    pub const HEALTH_TIMEOUT_SECS: u64 = 300;

    /// aws CLI 单次调用超时（秒）
    pub const AWS_CALL_TIMEOUT_SECS: u64 = 120;

    /// git 调用超时（秒）
    pub const GIT_TIMEOUT_SECS: u64 = 300;

    /// 版本号
    pub const VERSION: &str = env!("CARGO_PKG_VERSION");
}

/// 默认值
pub mod defaults {
    pub const AWS_REGION: &str = "us-east-1";
    pub const SERVICE_NAME: &str = "mxcp-server";
    pub const CPU_SIZE: &str = "1024";
    pub const MEMORY_SIZE: &str = "2048";
    pub const PORT: u16 = 8000;
    pub const HEALTH_PATH: &str = "/health";
    pub const IMAGE_TAG: &str = "latest";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_env_content() {
        let content = r#"
# deployment settings
AWS_ACCOUNT_ID=123456789012
AWS_REGION="eu-west-1"
SERVICE_NAME='demo-mxcp'
export CPU_SIZE=2048

this line is malformed
MEMORY_SIZE = 4096
"#;
        let vars = parse_env_content(content);
        assert_eq!(vars.get("AWS_ACCOUNT_ID").unwrap(), "123456789012");
        assert_eq!(vars.get("AWS_REGION").unwrap(), "eu-west-1");
        assert_eq!(vars.get("SERVICE_NAME").unwrap(), "demo-mxcp");
        assert_eq!(vars.get("CPU_SIZE").unwrap(), "2048");
        assert_eq!(vars.get("MEMORY_SIZE").unwrap(), "4096");
        assert!(!vars.contains_key("this line is malformed"));
    }

    #[test]
    fn test_strip_quotes() {
        assert_eq!(strip_quotes("\"abc\""), "abc");
        assert_eq!(strip_quotes("'abc'"), "abc");
        assert_eq!(strip_quotes("abc"), "abc");
        // 不成对的引号保留
        assert_eq!(strip_quotes("\"abc'"), "\"abc'");
        assert_eq!(strip_quotes("\""), "\"");
    }

    #[test]
    fn test_resolve_env_overrides_file() {
        let mut file_vars = HashMap::new();
        file_vars.insert("AWS_ACCOUNT_ID".to_string(), "111111111111".to_string());
        file_vars.insert("AWS_REGION".to_string(), "us-east-1".to_string());
        file_vars.insert("SERVICE_NAME".to_string(), "demo-mxcp".to_string());

        let config = DeployConfig::resolve(&file_vars, |key| match key {
            "AWS_REGION" => Some("ap-southeast-1".to_string()),
            _ => None,
        })
        .unwrap();

        assert_eq!(config.aws_account_id, "111111111111");
        assert_eq!(config.aws_region, "ap-southeast-1");
        assert_eq!(config.service_name, "demo-mxcp");
        // ECR 仓库默认跟随服务名
        assert_eq!(config.ecr_repository, "demo-mxcp");
    }

    #[test]
    fn test_resolve_missing_account_id() {
        let file_vars = HashMap::new();
        let result = DeployConfig::resolve(&file_vars, |_| None);
        assert!(matches!(result, Err(ConfigError::MissingAccountId)));
    }

    #[test]
    fn test_resolve_legacy_service_name() {
        let mut file_vars = HashMap::new();
        file_vars.insert("AWS_ACCOUNT_ID".to_string(), "111111111111".to_string());
        file_vars.insert("APP_RUNNER_SERVICE".to_string(), "legacy-mxcp".to_string());

        let config = DeployConfig::resolve(&file_vars, |_| None).unwrap();
        assert_eq!(config.service_name, "legacy-mxcp");
    }

    #[test]
    fn test_resolve_collects_runtime_secrets() {
        let mut file_vars = HashMap::new();
        file_vars.insert("AWS_ACCOUNT_ID".to_string(), "111111111111".to_string());

        let config = DeployConfig::resolve(&file_vars, |key| match key {
            "OPENAI_API_KEY" => Some("sk-test".to_string()),
            _ => None,
        })
        .unwrap();

        assert_eq!(
            config.runtime_env,
            vec![("OPENAI_API_KEY".to_string(), "sk-test".to_string())]
        );
    }

    #[test]
    fn test_image_reference() {
        let mut file_vars = HashMap::new();
        file_vars.insert("AWS_ACCOUNT_ID".to_string(), "123456789012".to_string());
        file_vars.insert("SERVICE_NAME".to_string(), "demo-mxcp".to_string());
        file_vars.insert("IMAGE_TAG".to_string(), "v42".to_string());

        let config = DeployConfig::resolve(&file_vars, |_| None).unwrap();
        assert_eq!(
            config.image_reference(),
            "123456789012.dkr.ecr.us-east-1.amazonaws.com/demo-mxcp:v42"
        );
    }
}
