//! # 映射模块
//!
//! 替换映射（源字符串 → 替换字符串）及其构建逻辑：
//!
//! - `Mapping` - 保持插入顺序的扁平字符串映射
//! - `builder` - 从表格行推导映射的三种策略

pub mod builder;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use builder::{build_mapping, BuildReport};

/// 映射错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MappingError {
    /// 表格中没有任何可用条目
    #[error("mapping is empty")]
    EmptyMapping,
}

/// 扁平的字符串替换表
///
/// 键在修剪后非空且唯一；值在修剪后永不为空（空值表示“尚未翻译”，直接省略）。
/// 覆盖写入保留键最初出现的位置。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Mapping {
    entries: IndexMap<String, String>,
}

impl Mapping {
    pub fn new() -> Self {
        Self::default()
    }

    /// 插入一个条目，修剪后为空的键或值会被忽略
    ///
    /// 返回条目是否被写入。
    pub fn insert(&mut self, key: &str, value: &str) -> bool {
        let key = key.trim();
        let value = value.trim();
        if key.is_empty() || value.is_empty() {
            return false;
        }
        self.entries.insert(key.to_string(), value.to_string());
        true
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 空映射视为错误
    pub fn into_non_empty(self) -> Result<Self, MappingError> {
        if self.is_empty() {
            Err(MappingError::EmptyMapping)
        } else {
            Ok(self)
        }
    }

    /// 按首次出现顺序遍历条目
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// 合并用户覆盖映射，键冲突时覆盖条目优先
    pub fn merge_overrides(&mut self, overrides: &Mapping) {
        for (key, value) in overrides.iter() {
            self.insert(key, value);
        }
    }
}

impl<K: AsRef<str>, V: AsRef<str>> FromIterator<(K, V)> for Mapping {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut mapping = Mapping::new();
        for (key, value) in iter {
            mapping.insert(key.as_ref(), value.as_ref());
        }
        mapping
    }
}

/// 清理存储中读取的用户覆盖映射
///
/// 键和值均被修剪，空键或空值条目被丢弃；非字符串值同样丢弃。
pub fn sanitize_overrides(raw: &serde_json::Value) -> Mapping {
    let mut mapping = Mapping::new();
    if let Some(object) = raw.as_object() {
        for (key, value) in object {
            if let Some(value) = value.as_str() {
                mapping.insert(key, value);
            }
        }
    }
    mapping
}
