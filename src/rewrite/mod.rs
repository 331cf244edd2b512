//! # 页面改写模块
//!
//! 把映射应用到 DOM 上：
//!
//! - `replacer` - 最长匹配优先的单遍替换
//! - `engine` - 文本单元、注音包装元素和表单字段的改写与还原
//! - `units` - 按节点身份索引的单元状态表
//! - `filters` - 可改写内容的判定
//! - `tracker` - 变更跟踪与重入保护
//! - `session` - 把以上部分组合为一个页面会话
//! - `notice` - 失败或替换过少时的提示条
//! - `config` - 设置快照、域名白名单与配置加载
//! - `error` - 改写与配置错误

pub mod config;
pub mod engine;
pub mod error;
pub mod filters;
pub mod notice;
pub mod replacer;
pub mod session;
pub mod tracker;
pub mod units;

pub use config::{AppConfig, ConfigManager, DomainPolicy, PageContext, Settings};
pub use engine::{PassReport, RewriteEngine, Sample};
pub use error::{ConfigError, RewriteError};
pub use notice::{clear_notice, show_notice, Notice};
pub use replacer::Replacer;
pub use session::{ContentSession, RETRY_DELAYS_MS};
pub use tracker::{MutationLog, MutationRecord, MutationSink, MutationTracker, Notification};
pub use units::{UnitKind, UnitState, UnitTable, MARKER_ATTR, UNIT_CLASS};
