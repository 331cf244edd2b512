//! 后台组件与页面组件之间的请求/响应消息
//!
//! 消息是 JSON 对象，`type` 字段决定请求种类：
//!
//! - `{"type":"getMapping"}` 返回当前缓存记录
//! - `{"type":"refreshMapping"}` 先刷新再返回新的缓存记录
//!
//! 其他任何消息都得到 `{"ok":false,"error":"unknown message"}`。

use serde_json::{json, Value};

use super::cache::{CacheRecord, MappingCache};
use super::error::MessagingError;

pub const GET_MAPPING: &str = "getMapping";
pub const REFRESH_MAPPING: &str = "refreshMapping";
pub const UNKNOWN_MESSAGE: &str = "unknown message";

/// 处理一条消息并返回响应
pub fn handle_message(message: &Value, cache: &mut MappingCache) -> Value {
    let kind = message.get("type").and_then(Value::as_str);

    let record = match kind {
        Some(GET_MAPPING) => cache.get(),
        Some(REFRESH_MAPPING) => {
            let outcome = cache.refresh();
            tracing::debug!("刷新请求完成: ok={}", outcome.ok);
            cache.get()
        }
        _ => {
            tracing::debug!("收到未知消息: {}", message);
            return json!({ "ok": false, "error": UNKNOWN_MESSAGE });
        }
    };

    serde_json::to_value(&record).unwrap_or_else(|e| {
        tracing::error!("缓存记录序列化失败: {}", e);
        json!({ "ok": false, "error": e.to_string() })
    })
}

/// 向后台组件发送请求的通道
pub trait MessageChannel {
    fn send(&mut self, message: &Value) -> Result<Value, MessagingError>;
}

impl MessageChannel for MappingCache {
    fn send(&mut self, message: &Value) -> Result<Value, MessagingError> {
        Ok(handle_message(message, self))
    }
}

/// 没有后台组件可用时的通道，所有请求都失败
#[derive(Debug, Default, Clone, Copy)]
pub struct DisconnectedChannel;

impl MessageChannel for DisconnectedChannel {
    fn send(&mut self, _message: &Value) -> Result<Value, MessagingError> {
        Err(MessagingError::Unavailable(
            "no background component connected".to_string(),
        ))
    }
}

/// 通过通道请求缓存记录
///
/// `refresh` 为真时发送刷新请求。
pub fn fetch_cache_record(
    channel: &mut dyn MessageChannel,
    refresh: bool,
) -> Result<CacheRecord, MessagingError> {
    let kind = if refresh { REFRESH_MAPPING } else { GET_MAPPING };
    let response = channel.send(&json!({ "type": kind }))?;

    if response.get("error").and_then(Value::as_str) == Some(UNKNOWN_MESSAGE) {
        return Err(MessagingError::InvalidResponse(UNKNOWN_MESSAGE.to_string()));
    }

    serde_json::from_value(response).map_err(|e| MessagingError::InvalidResponse(e.to_string()))
}
