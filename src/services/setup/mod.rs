//! 项目脚手架
//!
//! 对应原模板仓库的 setup-project.sh：
//! 占位符替换 → 覆盖确认 → .gitignore 修补 → 模板清理

pub mod gitignore;
pub mod template;

use std::io::{self, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{info, warn};
use walkdir::WalkDir;

use crate::config::ProjectType;

/// 脚手架参数
#[derive(Clone, Debug)]
pub struct SetupOptions {
    /// 项目名，会嵌入 AWS 资源命名
    pub name: String,
    pub region: String,
    pub project_type: ProjectType,
    /// 跳过覆盖确认
    pub force: bool,
    /// 项目根目录
    pub root: PathBuf,
}

/// 脚手架错误
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("invalid project name '{0}': expected [a-z0-9][a-z0-9-]*, at most 40 chars")]
    InvalidName(String),

    #[error("failed to {action} {path}: {source}")]
    Io {
        action: &'static str,
        path: String,
        #[source]
        source: io::Error,
    },
}

/// 脚手架执行结果
#[derive(Debug, Default)]
pub struct SetupOutcome {
    /// 渲染写出的文件
    pub written: Vec<PathBuf>,
    /// 用户拒绝覆盖而跳过的文件
    pub skipped: Vec<PathBuf>,
    /// 清理掉的模板文件
    pub removed_templates: Vec<PathBuf>,
    /// .gitignore 新增条目
    pub gitignore_added: Vec<String>,
}

/// 执行脚手架
pub fn run(options: &SetupOptions) -> Result<SetupOutcome, SetupError> {
    if !is_valid_name(&options.name) {
        return Err(SetupError::InvalidName(options.name.clone()));
    }

    let placeholders = placeholder_map(options);
    let templates = discover_templates(&options.root);
    if templates.is_empty() {
        warn!(root = %options.root.display(), "no *.template files found, nothing to render");
    }

    let mut outcome = SetupOutcome::default();

    for template_path in templates {
        let content = std::fs::read_to_string(&template_path).map_err(|source| SetupError::Io {
            action: "read",
            path: template_path.display().to_string(),
            source,
        })?;

        let rendered = template::substitute(&content, &placeholders);
        for token in template::unresolved_tokens(&rendered) {
            warn!(
                template = %template_path.display(),
                token = %token,
                "placeholder left unsubstituted"
            );
        }

        // config.env.template → config.env
        let dest = template_path.with_extension("");

        if dest.exists() && !options.force {
            let overwrite = confirm_overwrite(&dest).map_err(|source| SetupError::Io {
                action: "prompt for",
                path: dest.display().to_string(),
                source,
            })?;
            if !overwrite {
                info!(path = %dest.display(), "kept existing file");
                outcome.skipped.push(dest);
                continue;
            }
        }

        std::fs::write(&dest, rendered).map_err(|source| SetupError::Io {
            action: "write",
            path: dest.display().to_string(),
            source,
        })?;
        info!(path = %dest.display(), "rendered");
        outcome.written.push(dest);

        // 模板清理：已消费的模板移除，避免二次渲染覆盖手工修改
        std::fs::remove_file(&template_path).map_err(|source| SetupError::Io {
            action: "remove",
            path: template_path.display().to_string(),
            source,
        })?;
        outcome.removed_templates.push(template_path);
    }

    let patch = gitignore::patch_gitignore(&options.root).map_err(|source| SetupError::Io {
        action: "patch",
        path: options.root.join(".gitignore").display().to_string(),
        source,
    })?;
    if !patch.added.is_empty() {
        info!(entries = ?patch.added, ".gitignore patched");
    }
    outcome.gitignore_added = patch.added;

    Ok(outcome)
}

/// 构建占位符映射
///
/// 服务名与 ECR 仓库默认 `<name>-mxcp`，和 config.env 的默认推导一致
pub fn placeholder_map(options: &SetupOptions) -> Vec<(String, String)> {
    vec![
        ("PROJECT_NAME".to_string(), options.name.clone()),
        ("AWS_REGION".to_string(), options.region.clone()),
        ("SERVICE_NAME".to_string(), format!("{}-mxcp", options.name)),
        ("ECR_REPOSITORY".to_string(), format!("{}-mxcp", options.name)),
        (
            "PROJECT_TYPE".to_string(),
            options.project_type.as_str().to_string(),
        ),
    ]
}

/// 项目名校验：[a-z0-9][a-z0-9-]*，最长 40
fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    let valid_first = chars
        .next()
        .map(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        .unwrap_or(false);
    valid_first
        && name.len() <= 40
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

/// 在 deployment/ 和 .github/workflows/ 下查找 *.template 文件
fn discover_templates(root: &Path) -> Vec<PathBuf> {
    let mut templates = Vec::new();
    for dir in [root.join("deployment"), root.join(".github/workflows")] {
        if !dir.is_dir() {
            continue;
        }
        for entry in WalkDir::new(&dir).into_iter().filter_map(Result::ok) {
            if entry.file_type().is_file()
                && entry.path().extension().is_some_and(|e| e == "template")
            {
                templates.push(entry.path().to_path_buf());
            }
        }
    }
    templates.sort();
    templates
}

/// 覆盖确认，默认拒绝
fn confirm_overwrite(path: &Path) -> io::Result<bool> {
    print!("{} already exists, overwrite? [y/N] ", path.display());
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().read_line(&mut answer)?;
    let answer = answer.trim().to_ascii_lowercase();
    Ok(answer == "y" || answer == "yes")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn options(root: &Path) -> SetupOptions {
        SetupOptions {
            name: "demo".to_string(),
            region: "eu-west-1".to_string(),
            project_type: ProjectType::Data,
            force: true,
            root: root.to_path_buf(),
        }
    }

    #[test]
    fn test_is_valid_name() {
        assert!(is_valid_name("demo"));
        assert!(is_valid_name("demo-2"));
        assert!(is_valid_name("0day"));
        assert!(!is_valid_name(""));
        assert!(!is_valid_name("-demo"));
        assert!(!is_valid_name("Demo"));
        assert!(!is_valid_name("demo_2"));
        assert!(!is_valid_name(&"x".repeat(41)));
    }

    #[test]
    fn test_placeholder_map_derives_resource_names() {
        let dir = TempDir::new().unwrap();
        let map = placeholder_map(&options(dir.path()));
        let get = |key: &str| {
            map.iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.clone())
                .unwrap()
        };
        assert_eq!(get("PROJECT_NAME"), "demo");
        assert_eq!(get("SERVICE_NAME"), "demo-mxcp");
        assert_eq!(get("ECR_REPOSITORY"), "demo-mxcp");
        assert_eq!(get("PROJECT_TYPE"), "data");
    }

    #[test]
    fn test_run_renders_and_cleans_templates() {
        let dir = TempDir::new().unwrap();
        let deployment = dir.path().join("deployment");
        std::fs::create_dir_all(&deployment).unwrap();
        std::fs::write(
            deployment.join("config.env.template"),
            "SERVICE_NAME={{SERVICE_NAME}}\nAWS_REGION={{AWS_REGION}}\n",
        )
        .unwrap();

        let outcome = run(&options(dir.path())).unwrap();

        let rendered = std::fs::read_to_string(deployment.join("config.env")).unwrap();
        assert_eq!(rendered, "SERVICE_NAME=demo-mxcp\nAWS_REGION=eu-west-1\n");
        assert!(!deployment.join("config.env.template").exists());
        assert_eq!(outcome.written.len(), 1);
        assert_eq!(outcome.removed_templates.len(), 1);
        assert!(!outcome.gitignore_added.is_empty());
    }

    #[test]
    fn test_run_rejects_bad_name() {
        let dir = TempDir::new().unwrap();
        let mut opts = options(dir.path());
        opts.name = "Bad_Name".to_string();
        assert!(matches!(run(&opts), Err(SetupError::InvalidName(_))));
    }

    #[test]
    fn test_discover_templates_only_under_known_dirs() {
        let dir = TempDir::new().unwrap();
        let deployment = dir.path().join("deployment");
        let workflows = dir.path().join(".github/workflows");
        std::fs::create_dir_all(&deployment).unwrap();
        std::fs::create_dir_all(&workflows).unwrap();
        std::fs::write(deployment.join("Dockerfile.template"), "").unwrap();
        std::fs::write(workflows.join("deploy.yml.template"), "").unwrap();
        std::fs::write(dir.path().join("stray.template"), "").unwrap();

        let found = discover_templates(dir.path());
        assert_eq!(found.len(), 2);
        assert!(found.iter().all(|p| !p.ends_with("stray.template")));
    }
}
