//! 子命令实现
//!
//! 每个模块对应原模板仓库的一个脚本

pub mod deploy;
pub mod merge;
pub mod setup;
pub mod validate;
