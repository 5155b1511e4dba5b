//! .gitignore 幂等修补
//!
//! 确保渲染后的配置文件（可能含本地覆盖）和密钥文件不会被提交。
//! 重复运行 setup 不会产生重复条目。

use std::io;
use std::path::Path;

/// 必须被忽略的路径模式
pub const MANAGED_ENTRIES: &[&str] = &[
    "deployment/config.env",
    "deployment/mxcp-user-config.yml",
    ".env",
    "*.secrets",
];

/// 管理块标记行
const MARKER: &str = "# mxcp deployment (managed)";

/// 修补结果
#[derive(Debug, Default, PartialEq)]
pub struct GitignorePatch {
    /// 本次新增的条目
    pub added: Vec<String>,
}

/// 幂等修补 .gitignore
///
/// 缺失的条目追加到文件末尾的管理块；全部已存在时不写文件
pub fn patch_gitignore(project_root: &Path) -> io::Result<GitignorePatch> {
    let path = project_root.join(".gitignore");
    let existing = match std::fs::read_to_string(&path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e),
    };

    let (patched, added) = apply(&existing);
    if !added.is_empty() {
        std::fs::write(&path, patched)?;
    }
    Ok(GitignorePatch { added })
}

/// 纯函数部分：计算修补后的内容和新增条目
fn apply(existing: &str) -> (String, Vec<String>) {
    let present: Vec<&str> = existing.lines().map(str::trim).collect();
    let missing: Vec<String> = MANAGED_ENTRIES
        .iter()
        .filter(|entry| !present.contains(&**entry))
        .map(|entry| entry.to_string())
        .collect();

    if missing.is_empty() {
        return (existing.to_string(), missing);
    }

    let mut patched = existing.to_string();
    if !patched.is_empty() && !patched.ends_with('\n') {
        patched.push('\n');
    }
    if !present.contains(&MARKER) {
        if !patched.is_empty() {
            patched.push('\n');
        }
        patched.push_str(MARKER);
        patched.push('\n');
    }
    for entry in &missing {
        patched.push_str(entry);
        patched.push('\n');
    }
    (patched, missing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_patch_empty_file_adds_all() {
        let (patched, added) = apply("");
        assert_eq!(added.len(), MANAGED_ENTRIES.len());
        assert!(patched.contains(MARKER));
        for entry in MANAGED_ENTRIES {
            assert!(patched.lines().any(|l| l == *entry));
        }
    }

    #[test]
    fn test_patch_is_idempotent() {
        let (first, added) = apply("");
        assert!(!added.is_empty());

        let (second, added) = apply(&first);
        assert!(added.is_empty());
        assert_eq!(first, second);
    }

    #[test]
    fn test_patch_keeps_existing_entries() {
        let existing = "target/\n.env\n";
        let (patched, added) = apply(existing);
        assert!(!added.contains(&".env".to_string()));
        assert!(added.contains(&"deployment/config.env".to_string()));
        // 原有内容不动
        assert!(patched.starts_with("target/\n.env\n"));
        // .env 不重复
        assert_eq!(patched.lines().filter(|l| *l == ".env").count(), 1);
    }

    #[test]
    fn test_patch_gitignore_roundtrip() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(".gitignore"), "target/\n").unwrap();

        let patch = patch_gitignore(dir.path()).unwrap();
        assert!(!patch.added.is_empty());

        let patch = patch_gitignore(dir.path()).unwrap();
        assert!(patch.added.is_empty());
    }

    #[test]
    fn test_patch_gitignore_creates_file() {
        let dir = TempDir::new().unwrap();
        let patch = patch_gitignore(dir.path()).unwrap();
        assert_eq!(patch.added.len(), MANAGED_ENTRIES.len());
        assert!(dir.path().join(".gitignore").exists());
    }
}
