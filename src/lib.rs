//! mxcp-deploy - MXCP 项目的 AWS App Runner 部署工具
//!
//! 把部署模板的四个脚本收敛为一个 CLI：
//! - `setup`: 模板占位符替换与项目脚手架
//! - `deploy`: App Runner 服务创建/更新/重建
//! - `validate-env`: 环境变量与部署文件一致性校验
//! - `merge-from-raw`: 从上游模板仓库合并更新

pub mod config;
pub mod domain;
pub mod error;
pub mod infra;
pub mod services;
