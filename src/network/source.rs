//! 映射源
//!
//! 从远程端点获取表格文本并校验响应形态。每次请求都禁用缓存；默认没有超时，
//! 挂起的请求只会无限推迟失败报告。

use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, CACHE_CONTROL, PRAGMA};
use serde::{Deserialize, Serialize};

use super::error::SourceError;

/// 检查 HTML 标记时扫描的前缀长度（字符）
const MARKUP_SNIFF_CHARS: usize = 2000;

/// 错误记录中保留的响应体摘录长度（字符）
const BODY_EXCERPT_CHARS: usize = 200;

/// 原始 HTTP 响应
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchResponse {
    pub status: u16,
    pub body: String,
}

/// 单次 GET 请求的执行者
pub trait Fetcher {
    fn fetch(&self, url: &str) -> Result<FetchResponse, SourceError>;
}

/// 基于 reqwest 阻塞客户端的获取器
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(user_agent: Option<&str>, timeout: Option<Duration>) -> Result<Self, SourceError> {
        let mut headers = HeaderMap::new();
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));

        let mut builder = Client::builder().default_headers(headers).timeout(timeout);
        if let Some(user_agent) = user_agent {
            builder = builder.user_agent(user_agent.to_string());
        }

        let client = builder.build().map_err(|e| SourceError::Network {
            url: String::new(),
            message: format!("无法创建 HTTP 客户端: {e}"),
        })?;

        Ok(Self { client })
    }
}

impl Fetcher for HttpFetcher {
    fn fetch(&self, url: &str) -> Result<FetchResponse, SourceError> {
        let network_error = |e: reqwest::Error| SourceError::Network {
            url: url.to_string(),
            message: e.to_string(),
        };

        let response = self.client.get(url).send().map_err(network_error)?;
        let status = response.status().as_u16();
        let body = response.text().map_err(network_error)?;

        Ok(FetchResponse { status, body })
    }
}

/// 映射端点描述
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    /// 写入缓存记录的来源标识
    pub id: String,
    pub url: String,
}

impl Endpoint {
    pub fn new(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
        }
    }
}

/// 按顺序尝试的端点列表及其获取器
pub struct MappingSource {
    fetcher: Box<dyn Fetcher>,
    endpoints: Vec<Endpoint>,
}

impl MappingSource {
    pub fn new(fetcher: Box<dyn Fetcher>, endpoints: Vec<Endpoint>) -> Self {
        Self { fetcher, endpoints }
    }

    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    /// 获取一个端点的表格文本
    pub fn fetch_text(&self, endpoint: &Endpoint) -> Result<String, SourceError> {
        tracing::debug!("获取映射表: {} ({})", endpoint.id, endpoint.url);
        let response = self.fetcher.fetch(&endpoint.url)?;
        classify_response(&endpoint.url, response)
    }

    /// 依次尝试所有端点，返回第一个成功的结果
    pub fn fetch_first(&self) -> Result<(&Endpoint, String), Vec<SourceError>> {
        let mut errors = Vec::new();
        for endpoint in &self.endpoints {
            match self.fetch_text(endpoint) {
                Ok(text) => return Ok((endpoint, text)),
                Err(e) => errors.push(e),
            }
        }
        Err(errors)
    }
}

/// 校验响应形态，返回表格文本
pub fn classify_response(url: &str, response: FetchResponse) -> Result<String, SourceError> {
    if !(200..300).contains(&response.status) {
        return Err(SourceError::Http {
            status: response.status,
            url: url.to_string(),
            body_excerpt: excerpt(&response.body),
        });
    }

    if response.body.trim().is_empty() {
        return Err(SourceError::EmptyResponse {
            url: url.to_string(),
        });
    }

    if looks_like_markup(&response.body) {
        return Err(SourceError::UnexpectedFormat {
            url: url.to_string(),
            body_excerpt: excerpt(&response.body),
        });
    }

    Ok(response.body)
}

/// 响应开头是否像 HTML 文档
pub fn looks_like_markup(body: &str) -> bool {
    let head: String = body
        .chars()
        .take(MARKUP_SNIFF_CHARS)
        .collect::<String>()
        .to_lowercase();
    head.contains("<html") || head.contains("<!doctype html")
}

fn excerpt(body: &str) -> String {
    body.trim().chars().take(BODY_EXCERPT_CHARS).collect()
}
