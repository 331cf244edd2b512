//! 映射获取与存储的错误类型

use thiserror::Error;

/// 映射源获取错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SourceError {
    /// 非 2xx 响应
    #[error("HTTP {status} from {url}")]
    Http {
        status: u16,
        url: String,
        body_excerpt: String,
    },

    /// 响应体为空或只有空白
    #[error("empty response from {url}")]
    EmptyResponse { url: String },

    /// 响应体是 HTML 页面（通常是登录页或中间页）而不是表格数据
    #[error("unexpected markup response from {url}")]
    UnexpectedFormat { url: String, body_excerpt: String },

    /// 连接失败、读取响应体失败等传输层错误
    #[error("network error for {url}: {message}")]
    Network { url: String, message: String },
}

impl SourceError {
    /// 类 HTTP 状态码
    pub fn status(&self) -> Option<u16> {
        match self {
            SourceError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// 401/403 通常意味着表格未公开共享
    pub fn is_auth_required(&self) -> bool {
        matches!(self.status(), Some(401) | Some(403))
    }

    pub fn body_excerpt(&self) -> Option<&str> {
        match self {
            SourceError::Http { body_excerpt, .. }
            | SourceError::UnexpectedFormat { body_excerpt, .. } => Some(body_excerpt),
            _ => None,
        }
    }

    pub fn url(&self) -> &str {
        match self {
            SourceError::Http { url, .. }
            | SourceError::EmptyResponse { url }
            | SourceError::UnexpectedFormat { url, .. }
            | SourceError::Network { url, .. } => url,
        }
    }
}

/// 键值存储错误
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("存储读写失败: {0}")]
    Io(#[from] std::io::Error),

    #[error("存储序列化失败: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("存储内容格式无效: {0}")]
    InvalidFormat(String),
}

/// 跨组件消息错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MessagingError {
    /// 请求无法送达（后台组件不存在或未响应）
    #[error("messaging unavailable: {0}")]
    Unavailable(String),

    /// 收到的响应不是缓存记录
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}
