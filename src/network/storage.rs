//! 键值存储
//!
//! 缓存记录和用户覆盖映射各自保存在一个约定的键下。写入是整值覆盖，
//! 读取方永远只会看到最后一次完整写入的值。

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

use super::error::StorageError;

/// 缓存记录所在的键
pub const CACHE_KEY: &str = "mappingCache";

/// 用户覆盖映射所在的键
pub const OVERRIDES_KEY: &str = "userMapping";

/// 键值存储接口
pub trait Storage {
    fn get(&self, key: &str) -> Result<Option<Value>, StorageError>;
    fn set(&mut self, key: &str, value: Value) -> Result<(), StorageError>;
}

/// 进程内存储
#[derive(Debug, Default, Clone)]
pub struct MemoryStorage {
    values: HashMap<String, Value>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        Ok(self.values.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: Value) -> Result<(), StorageError> {
        self.values.insert(key.to_string(), value);
        Ok(())
    }
}

/// 单个 JSON 对象文件存储
///
/// 写入时先写临时文件再重命名，避免读到写了一半的文件。
#[derive(Debug, Clone)]
pub struct JsonFileStorage {
    path: PathBuf,
}

impl JsonFileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_all(&self) -> Result<Map<String, Value>, StorageError> {
        if !self.path.exists() {
            return Ok(Map::new());
        }

        let data = fs::read_to_string(&self.path)?;
        if data.trim().is_empty() {
            return Ok(Map::new());
        }

        match serde_json::from_str::<Value>(&data)? {
            Value::Object(map) => Ok(map),
            other => Err(StorageError::InvalidFormat(format!(
                "{} 的顶层不是对象: {}",
                self.path.display(),
                other
            ))),
        }
    }
}

impl Storage for JsonFileStorage {
    fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        Ok(self.read_all()?.remove(key))
    }

    fn set(&mut self, key: &str, value: Value) -> Result<(), StorageError> {
        let mut all = self.read_all()?;
        all.insert(key.to_string(), value);

        if let Some(dir) = self.path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }

        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, serde_json::to_vec_pretty(&Value::Object(all))?)?;
        fs::rename(&tmp_path, &self.path)?;

        Ok(())
    }
}
