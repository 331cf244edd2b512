//! # Rubymap Library
//!
//! 把电子表格中维护的替换表应用到 HTML 文档上，替换结果以注音（ruby）的形式
//! 与原文并排显示，并且可以随时完整还原。
//!
//! ## 模块组织
//!
//! - `core` - 文档处理流程和错误类型
//! - `env` - 类型化环境变量
//! - `mapping` - 替换映射及其构建策略
//! - `parsers` - 表格与 HTML 解析
//! - `network` - 映射获取、缓存与消息
//! - `rewrite` - DOM 改写引擎、变更跟踪与页面会话

pub mod core;
pub mod env;
pub mod mapping;
pub mod network;
pub mod parsers;
pub mod rewrite;

// Re-export commonly used items for convenience
pub use crate::core::*;
pub use mapping::{build_mapping, Mapping, MappingError};
pub use network::*;
pub use parsers::*;
pub use rewrite::{
    AppConfig, ConfigError, ConfigManager, ContentSession, DomainPolicy, Notice, PageContext,
    PassReport, Replacer, RewriteEngine, RewriteError, Settings,
};
