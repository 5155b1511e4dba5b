//! Environment validation
//!
//! Presence check of deploy-time variables, plus consistency checks that
//! keep the deployment files honest with each other: Docker `LABEL env.*`
//! declarations, the workflow `env:` block, `${VAR}` references in
//! mxcp-user-config.yml, and the no-secrets rule for config.env.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

use crate::config::env::{parse_env_content, CONFIG_ENV_PATH};
use crate::config::ProjectType;

/// 校验参数
#[derive(Clone, Debug)]
pub struct ValidateOptions {
    pub project_type: ProjectType,
    /// warning 也视为失败
    pub strict: bool,
    pub root: PathBuf,
}

/// 校验报告
#[derive(Clone, Debug, Default, Serialize)]
pub struct ValidationReport {
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    /// 是否通过
    pub fn passed(&self, strict: bool) -> bool {
        self.errors.is_empty() && (!strict || self.warnings.is_empty())
    }

    fn error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    fn warning(&mut self, message: impl Into<String>) {
        self.warnings.push(message.into());
    }
}

/// Docker LABEL env.* 声明
#[derive(Debug, Default)]
struct DockerLabels {
    runtime: HashMap<String, serde_json::Value>,
    cicd: HashMap<String, serde_json::Value>,
}

/// 执行校验（进程环境从 std::env 读取）
pub fn run(options: &ValidateOptions) -> ValidationReport {
    run_with_env(options, |key| std::env::var(key).ok())
}

/// 执行校验，注入环境查询便于测试
pub fn run_with_env(
    options: &ValidateOptions,
    env_lookup: impl Fn(&str) -> Option<String>,
) -> ValidationReport {
    let mut report = ValidationReport::default();

    let config_vars = read_config_env(&options.root, &mut report);

    // 1. presence check per project type
    for var in options.project_type.required_vars() {
        let present = env_lookup(var).is_some_and(|v| !v.is_empty())
            || config_vars.get(var).is_some_and(|v| !v.is_empty());
        if !present {
            report.error(format!(
                "required variable {} is not set (project type: {})",
                var,
                options.project_type.as_str()
            ));
        }
    }

    // 2. Docker labels are the documentation of record for runtime/cicd vars
    let labels = match std::fs::read_to_string(options.root.join("deployment/Dockerfile")) {
        Ok(content) => extract_docker_labels(&content, &mut report),
        Err(_) => {
            report.warning("deployment/Dockerfile not found, skipping label checks".to_string());
            DockerLabels::default()
        }
    };

    // 3. every ${VAR} used by mxcp-user-config.yml must be a documented runtime var
    if let Some(content) = read_with_template_fallback(
        &options.root.join("deployment/mxcp-user-config.yml"),
        &mut report,
    ) {
        for var in extract_var_refs(&content) {
            if !labels.runtime.contains_key(&var) {
                report.error(format!(
                    "variable ${{{}}} used in mxcp-user-config.yml but not documented as a runtime requirement",
                    var
                ));
            }
        }
    }

    // 4. CI/CD-looking vars in the workflow env block must be documented as cicd vars
    match std::fs::read_to_string(options.root.join(".github/workflows/deploy.yml")) {
        Ok(content) => match extract_workflow_env(&content) {
            Some(keys) => {
                for var in keys {
                    let cicd_looking = var.starts_with("AWS_")
                        || var.ends_with("_ACCESS_KEY_ID")
                        || var.ends_with("_SECRET_ACCESS_KEY");
                    if cicd_looking && !labels.cicd.contains_key(&var) {
                        report.warning(format!(
                            "CI/CD variable {} used in workflow but not documented in Docker labels",
                            var
                        ));
                    }
                }
            }
            None => report.warning(
                ".github/workflows/deploy.yml has no env: block or is not valid YAML".to_string(),
            ),
        },
        Err(_) => {
            report.warning(
                ".github/workflows/deploy.yml not found, skipping workflow checks".to_string(),
            );
        }
    }

    // 5. config.env must never contain secrets (those belong in GitHub Secrets)
    for var in config_vars.keys() {
        if var.contains("KEY") || var.contains("SECRET") || var.contains("TOKEN") {
            report.error(format!(
                "potential secret {} found in config.env (move it to GitHub Secrets)",
                var
            ));
        }
    }

    report
}

/// 读取 config.env，渲染文件优先，模板兜底
fn read_config_env(root: &Path, report: &mut ValidationReport) -> HashMap<String, String> {
    let rendered = root.join(CONFIG_ENV_PATH);
    let template = root.join(format!("{}.template", CONFIG_ENV_PATH));

    if let Ok(content) = std::fs::read_to_string(&rendered) {
        return parse_env_content(&content);
    }
    if let Ok(content) = std::fs::read_to_string(&template) {
        report.warning(
            "using config.env.template - run setup first for accurate validation".to_string(),
        );
        return parse_env_content(&content);
    }
    report.warning(format!("{} not found", CONFIG_ENV_PATH));
    HashMap::new()
}

/// 渲染文件优先、.template 兜底的读取
fn read_with_template_fallback(path: &Path, report: &mut ValidationReport) -> Option<String> {
    if let Ok(content) = std::fs::read_to_string(path) {
        return Some(content);
    }
    let template = PathBuf::from(format!("{}.template", path.display()));
    if let Ok(content) = std::fs::read_to_string(&template) {
        report.warning(format!(
            "using {} - run setup first for accurate validation",
            template
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default()
        ));
        return Some(content);
    }
    report.warning(format!("{} not found, skipping its checks", path.display()));
    None
}

/// 提取 `LABEL env.{runtime|cicd}.{VAR}='{json}'` 声明
fn extract_docker_labels(content: &str, report: &mut ValidationReport) -> DockerLabels {
    static LABEL_RE: OnceLock<Regex> = OnceLock::new();
    let re = LABEL_RE
        .get_or_init(|| Regex::new(r"LABEL\s+env\.(runtime|cicd)\.(\w+)='(\{.*?\})'").unwrap());

    let mut labels = DockerLabels::default();
    for captures in re.captures_iter(content) {
        let phase = &captures[1];
        let var = captures[2].to_string();
        match serde_json::from_str::<serde_json::Value>(&captures[3]) {
            Ok(value) => {
                if phase == "runtime" {
                    labels.runtime.insert(var, value);
                } else {
                    labels.cicd.insert(var, value);
                }
            }
            Err(_) => report.error(format!("invalid JSON in Docker label for {}", var)),
        }
    }
    labels
}

/// 提取 `${VAR}` 引用（仅大写变量，排除模板占位符）
fn extract_var_refs(content: &str) -> Vec<String> {
    static REF_RE: OnceLock<Regex> = OnceLock::new();
    let re = REF_RE.get_or_init(|| Regex::new(r"\$\{(\w+)\}").unwrap());

    let mut vars: Vec<String> = re
        .captures_iter(content)
        .map(|c| c[1].to_string())
        .filter(|v| !v.is_empty() && *v == v.to_uppercase())
        .collect();
    vars.sort();
    vars.dedup();
    vars
}

/// 提取 workflow 顶层 env: 块的键
fn extract_workflow_env(content: &str) -> Option<Vec<String>> {
    let value: serde_yaml::Value = serde_yaml::from_str(content).ok()?;
    let env = value.get("env")?;
    let mapping = env.as_mapping()?;
    Some(
        mapping
            .keys()
            .filter_map(|k| k.as_str().map(str::to_string))
            .collect(),
    )
}
