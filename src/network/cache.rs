//! 映射缓存与刷新协议
//!
//! 任意时刻只存在一条缓存记录：成功时携带映射和来源信息，失败时携带错误描述。
//! 每次刷新尝试都会整体覆盖这条记录，从不部分更新。刷新边界内的所有失败都被
//! 转换为失败记录，不会传播给调用方。

use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::mapping::{build_mapping, sanitize_overrides, Mapping};
use crate::parsers::table::parse_table;

use super::error::SourceError;
use super::source::MappingSource;
use super::storage::{Storage, CACHE_KEY, OVERRIDES_KEY};

/// 尚未成功获取过映射时的错误描述
pub const NO_MAPPING_YET: &str = "no mapping yet";

/// 没有配置任何端点时的错误描述
pub const NO_ENDPOINTS: &str = "no mapping source configured";

/// 成功获取的映射及其来源
#[derive(Debug, Clone, PartialEq)]
pub struct MappingSnapshot {
    pub mapping: Mapping,
    pub fetched_at: DateTime<Utc>,
    pub source: String,
    pub duration_ms: u64,
    pub entry_count: usize,
}

/// 失败描述
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FailureInfo {
    pub error: String,
    pub status: Option<u16>,
    /// 是否可能需要授权（401/403）
    pub auth_required: Option<bool>,
    pub body_excerpt: Option<String>,
    /// 按尝试顺序排列的端点标识
    pub attempted: Vec<String>,
    pub fetched_at: Option<DateTime<Utc>>,
}

impl FailureInfo {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            ..Default::default()
        }
    }

    fn from_source_error(error: &SourceError) -> Self {
        Self {
            error: error.to_string(),
            status: error.status(),
            auth_required: error.is_auth_required().then_some(true),
            body_excerpt: error.body_excerpt().map(str::to_string),
            ..Default::default()
        }
    }
}

/// 缓存记录
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(into = "RecordWire", try_from = "RecordWire")]
pub enum CacheRecord {
    Success(MappingSnapshot),
    Failure(FailureInfo),
}

impl CacheRecord {
    pub fn is_ok(&self) -> bool {
        matches!(self, CacheRecord::Success(_))
    }

    pub fn mapping(&self) -> Option<&Mapping> {
        match self {
            CacheRecord::Success(snapshot) => Some(&snapshot.mapping),
            CacheRecord::Failure(_) => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            CacheRecord::Success(_) => None,
            CacheRecord::Failure(failure) => Some(&failure.error),
        }
    }
}

impl Default for CacheRecord {
    fn default() -> Self {
        CacheRecord::Failure(FailureInfo::new(NO_MAPPING_YET))
    }
}

/// 存储和消息中使用的扁平 JSON 形态，`ok` 字段区分成功与失败
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecordWire {
    ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    mapping: Option<Mapping>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    fetched_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    entry_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    status: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    auth_required: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    body_excerpt: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    attempted: Vec<String>,
}

impl From<CacheRecord> for RecordWire {
    fn from(record: CacheRecord) -> Self {
        match record {
            CacheRecord::Success(snapshot) => RecordWire {
                ok: true,
                mapping: Some(snapshot.mapping),
                fetched_at: Some(snapshot.fetched_at),
                source: Some(snapshot.source),
                duration_ms: Some(snapshot.duration_ms),
                entry_count: Some(snapshot.entry_count),
                error: None,
                status: None,
                auth_required: None,
                body_excerpt: None,
                attempted: Vec::new(),
            },
            CacheRecord::Failure(failure) => RecordWire {
                ok: false,
                mapping: None,
                fetched_at: failure.fetched_at,
                source: None,
                duration_ms: None,
                entry_count: None,
                error: Some(failure.error),
                status: failure.status,
                auth_required: failure.auth_required,
                body_excerpt: failure.body_excerpt,
                attempted: failure.attempted,
            },
        }
    }
}

impl TryFrom<RecordWire> for CacheRecord {
    type Error = String;

    fn try_from(wire: RecordWire) -> Result<Self, Self::Error> {
        if wire.ok {
            let mapping = wire.mapping.ok_or("成功记录缺少 mapping 字段")?;
            let fetched_at = wire.fetched_at.ok_or("成功记录缺少 fetchedAt 字段")?;
            Ok(CacheRecord::Success(MappingSnapshot {
                entry_count: wire.entry_count.unwrap_or(mapping.len()),
                mapping,
                fetched_at,
                source: wire.source.unwrap_or_default(),
                duration_ms: wire.duration_ms.unwrap_or_default(),
            }))
        } else {
            Ok(CacheRecord::Failure(FailureInfo {
                error: wire.error.unwrap_or_else(|| NO_MAPPING_YET.to_string()),
                status: wire.status,
                auth_required: wire.auth_required,
                body_excerpt: wire.body_excerpt,
                attempted: wire.attempted,
                fetched_at: wire.fetched_at,
            }))
        }
    }
}

/// 刷新结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshOutcome {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entry_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RefreshOutcome {
    fn success(entry_count: usize) -> Self {
        Self {
            ok: true,
            entry_count: Some(entry_count),
            error: None,
        }
    }

    fn failure(error: impl Into<String>) -> Self {
        Self {
            ok: false,
            entry_count: None,
            error: Some(error.into()),
        }
    }
}

/// 映射缓存
pub struct MappingCache {
    source: MappingSource,
    storage: Box<dyn Storage>,
}

impl MappingCache {
    pub fn new(source: MappingSource, storage: Box<dyn Storage>) -> Self {
        Self { source, storage }
    }

    /// 读取当前缓存记录
    ///
    /// 从未写入或无法解析时返回默认的 `no mapping yet` 失败记录。
    pub fn get(&self) -> CacheRecord {
        match self.storage.get(CACHE_KEY) {
            Ok(Some(value)) => serde_json::from_value(value).unwrap_or_else(|e| {
                tracing::warn!("缓存记录无法解析，视为不存在: {}", e);
                CacheRecord::default()
            }),
            Ok(None) => CacheRecord::default(),
            Err(e) => {
                tracing::warn!("读取缓存记录失败: {}", e);
                CacheRecord::default()
            }
        }
    }

    /// 读取并清理用户覆盖映射
    pub fn overrides(&self) -> Mapping {
        match self.storage.get(OVERRIDES_KEY) {
            Ok(Some(value)) => sanitize_overrides(&value),
            Ok(None) => Mapping::new(),
            Err(e) => {
                tracing::warn!("读取用户映射失败: {}", e);
                Mapping::new()
            }
        }
    }

    pub fn endpoints(&self) -> &[super::source::Endpoint] {
        self.source.endpoints()
    }

    /// 保存用户覆盖映射
    pub fn set_overrides(&mut self, overrides: &Mapping) -> Result<(), super::error::StorageError> {
        let value = serde_json::to_value(overrides)?;
        self.storage.set(OVERRIDES_KEY, value)
    }

    /// 获取、解析、构建并合并映射，写入新的缓存记录
    pub fn refresh(&mut self) -> RefreshOutcome {
        let started = Instant::now();
        let overrides = self.overrides();

        let mut attempted = Vec::new();
        let mut failure: Option<FailureInfo> = None;
        let mut success: Option<MappingSnapshot> = None;

        for endpoint in self.source.endpoints() {
            attempted.push(endpoint.id.clone());

            match self.source.fetch_text(endpoint) {
                Ok(text) => {
                    let table = parse_table(&text);
                    let (mut mapping, _report) = build_mapping(&table);
                    mapping.merge_overrides(&overrides);

                    let mapping = match mapping.into_non_empty() {
                        Ok(mapping) => mapping,
                        Err(e) => {
                            tracing::warn!("端点 {} 没有产生任何映射条目", endpoint.id);
                            failure = Some(FailureInfo::new(e.to_string()));
                            continue;
                        }
                    };

                    success = Some(MappingSnapshot {
                        entry_count: mapping.len(),
                        mapping,
                        fetched_at: Utc::now(),
                        source: endpoint.id.clone(),
                        duration_ms: started.elapsed().as_millis() as u64,
                    });
                    break;
                }
                Err(e) => {
                    tracing::warn!("端点 {} 获取失败: {}", endpoint.id, e);
                    failure = Some(FailureInfo::from_source_error(&e));
                }
            }
        }

        let (record, outcome) = match success {
            Some(snapshot) => {
                tracing::info!(
                    "映射已刷新: {} 个条目，来源 {}，耗时 {}ms",
                    snapshot.entry_count,
                    snapshot.source,
                    snapshot.duration_ms
                );
                let outcome = RefreshOutcome::success(snapshot.entry_count);
                (CacheRecord::Success(snapshot), outcome)
            }
            None => {
                let mut failure = failure.unwrap_or_else(|| FailureInfo::new(NO_ENDPOINTS));
                failure.attempted = attempted;
                failure.fetched_at = Some(Utc::now());
                let outcome = RefreshOutcome::failure(failure.error.clone());
                (CacheRecord::Failure(failure), outcome)
            }
        };

        match self.persist(&record) {
            Ok(()) => outcome,
            Err(e) => {
                tracing::error!("写入缓存记录失败: {}", e);
                RefreshOutcome::failure(format!("failed to store mapping: {e}"))
            }
        }
    }

    fn persist(&mut self, record: &CacheRecord) -> Result<(), super::error::StorageError> {
        let value = serde_json::to_value(record)?;
        self.storage.set(CACHE_KEY, value)
    }
}
