//! 改写引擎与配置的错误类型

use thiserror::Error;

/// 改写错误
///
/// 单个节点上的错误会被改写流程记录并跳过，不会中断整个流程。
#[derive(Error, Debug)]
pub enum RewriteError {
    #[error("无法编译替换表达式: {0}")]
    Regex(#[from] regex::Error),

    #[error("节点处理失败: {0}")]
    Node(String),
}

/// 配置加载错误
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("配置构建失败: {0}")]
    Build(#[from] config::ConfigError),

    #[error("配置无效: {0}")]
    Invalid(String),

    #[error("环境变量无效: {0}")]
    Env(#[from] crate::env::EnvError),
}
