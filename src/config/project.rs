//! 项目类型
//!
//! 项目类型决定部署所需的环境变量清单，以及脚手架的默认资源命名

use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// MXCP 项目类型
///
/// - `data`: 本地数据集打包进镜像
/// - `remote_data`: 数据存放在 S3，运行时通过 MXCP_DATA_* 凭证访问
/// - `api`: 纯 API 代理，无数据集
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectType {
    Data,
    RemoteData,
    Api,
}

impl ProjectType {
    /// 转换为字符串
    pub fn as_str(&self) -> &'static str {
        match self {
            ProjectType::Data => "data",
            ProjectType::RemoteData => "remote_data",
            ProjectType::Api => "api",
        }
    }

    /// 部署时必须存在的变量清单
    ///
    /// 基础变量 + 运行时密钥对所有类型都要求；remote_data 额外要求数据访问凭证
    pub fn required_vars(&self) -> Vec<&'static str> {
        let mut vars = vec![
            "AWS_ACCOUNT_ID",
            "AWS_REGION",
            "SERVICE_NAME",
            "ECR_REPOSITORY",
            "OPENAI_API_KEY",
            "ANTHROPIC_API_KEY",
        ];
        if matches!(self, ProjectType::RemoteData) {
            vars.push("MXCP_DATA_ACCESS_KEY_ID");
            vars.push("MXCP_DATA_SECRET_ACCESS_KEY");
        }
        vars
    }
}

impl FromStr for ProjectType {
    type Err = String;

    // CLI 同时接受下划线和连字符拼写
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "data" => Ok(ProjectType::Data),
            "remote_data" | "remote-data" => Ok(ProjectType::RemoteData),
            "api" => Ok(ProjectType::Api),
            other => Err(format!(
                "unknown project type '{}' (expected: data, remote-data, api)",
                other
            )),
        }
    }
}

impl std::fmt::Display for ProjectType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_accepts_both_spellings() {
        assert_eq!("data".parse::<ProjectType>().unwrap(), ProjectType::Data);
        assert_eq!(
            "remote_data".parse::<ProjectType>().unwrap(),
            ProjectType::RemoteData
        );
        assert_eq!(
            "remote-data".parse::<ProjectType>().unwrap(),
            ProjectType::RemoteData
        );
        assert_eq!("api".parse::<ProjectType>().unwrap(), ProjectType::Api);
        assert!("dbt".parse::<ProjectType>().is_err());
    }

    #[test]
    fn test_required_vars_by_type() {
        let base = ProjectType::Data.required_vars();
        assert!(base.contains(&"AWS_ACCOUNT_ID"));
        assert!(base.contains(&"ANTHROPIC_API_KEY"));
        assert!(!base.contains(&"MXCP_DATA_ACCESS_KEY_ID"));

        let remote = ProjectType::RemoteData.required_vars();
        assert!(remote.contains(&"MXCP_DATA_ACCESS_KEY_ID"));
        assert!(remote.contains(&"MXCP_DATA_SECRET_ACCESS_KEY"));

        assert_eq!(ProjectType::Api.required_vars(), base);
    }
}
