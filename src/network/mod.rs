//! # 网络模块
//!
//! 映射的获取、缓存和跨组件传递：
//!
//! - `source` - 远程端点获取与响应校验
//! - `storage` - 键值存储（内存、JSON 文件）
//! - `cache` - 单条缓存记录与刷新协议
//! - `messaging` - `getMapping` / `refreshMapping` 请求处理
//! - `error` - 获取、存储和消息错误

pub mod cache;
pub mod error;
pub mod messaging;
pub mod source;
pub mod storage;

// Re-export commonly used items for convenience
pub use cache::{CacheRecord, FailureInfo, MappingCache, MappingSnapshot, RefreshOutcome};
pub use error::{MessagingError, SourceError, StorageError};
pub use messaging::{fetch_cache_record, handle_message, DisconnectedChannel, MessageChannel};
pub use source::{Endpoint, Fetcher, HttpFetcher, MappingSource};
pub use storage::{JsonFileStorage, MemoryStorage, Storage};
