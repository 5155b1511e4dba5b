//! Placeholder substitution
//!
//! Templates carry `{{KEY}}` tokens. Substitution is literal string
//! replacement: no escaping, no recursion, unknown tokens are left in
//! place and reported by `unresolved_tokens`.

use regex::Regex;
use std::sync::OnceLock;

/// 替换所有 `{{KEY}}` 占位符
pub fn substitute(input: &str, placeholders: &[(String, String)]) -> String {
    let mut output = input.to_string();
    for (key, value) in placeholders {
        output = output.replace(&format!("{{{{{}}}}}", key), value);
    }
    output
}

/// 找出内容里残留的 `{{...}}` 占位符
pub fn unresolved_tokens(content: &str) -> Vec<String> {
    static TOKEN_RE: OnceLock<Regex> = OnceLock::new();
    let re = TOKEN_RE.get_or_init(|| Regex::new(r"\{\{([A-Z][A-Z0-9_]*)\}\}").unwrap());

    let mut tokens: Vec<String> = re
        .captures_iter(content)
        .map(|c| c[1].to_string())
        .collect();
    tokens.sort();
    tokens.dedup();
    tokens
}
