//! 脚本加载错误类型定义

use rhai::Position;

/// 脚本加载错误
#[derive(Debug, thiserror::Error)]
pub enum ScriptError {
    /// 路径无法得到模块标识
    #[error("invalid script path: {0}")]
    InvalidPath(String),

    /// 给定路径与搜索路径中都找不到脚本
    #[error("script not found: {0}")]
    NotFound(String),

    /// 读取脚本文件失败
    #[error("io error reading script {script}: {source}")]
    Io {
        script: String,
        #[source]
        source: std::io::Error,
    },

    /// 语法错误
    #[error("syntax error in script {script}: {detail}")]
    Syntax { script: String, detail: String },

    /// 顶层代码执行失败
    #[error("script {script} failed while loading: {detail}")]
    Runtime { script: String, detail: String },

    /// 缺少入口函数 convert
    #[error("script {0} does not define the convert function")]
    MissingEntryPoint(String),

    /// convert 存在但无法以 (message, topic) 调用
    #[error("convert in script {script} takes {arity} parameters, expected (message, topic)")]
    EntryPointNotCallable { script: String, arity: usize },
}

/// 尽力从错误位置提取行号与源码行，提取不到时返回原始错误文本。
pub(crate) fn describe_at(message: &str, raw: &str, position: Position, source: &str) -> String {
    let Some(line) = position.line() else {
        return raw.to_string();
    };
    let column = position.position().unwrap_or(0);
    match source.lines().nth(line.saturating_sub(1)) {
        Some(text) => format!(
            "{} (line {}, column {}): `{}`",
            message,
            line,
            column,
            text.trim()
        ),
        None => format!("{} (line {}, column {})", message, line, column),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describe_includes_offending_line() {
        let source = "fn convert(message, topic) {\n    if a < b return 2;\n}";
        let detail = describe_at("Expecting '{'", "raw", Position::new(2, 14), source);
        assert_eq!(
            detail,
            "Expecting '{' (line 2, column 14): `if a < b return 2;`"
        );
    }

    #[test]
    fn describe_falls_back_to_raw_error() {
        let detail = describe_at("boom", "Runtime error: boom", Position::NONE, "");
        assert_eq!(detail, "Runtime error: boom");
    }
}
