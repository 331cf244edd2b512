// 集成测试公共模块
//
// 提供测试辅助工具和共享功能

use std::cell::RefCell;
use std::collections::HashMap;

use chrono::Utc;
use markup5ever_rcdom::{Handle, RcDom};

use rubymap::mapping::Mapping;
use rubymap::network::cache::{CacheRecord, MappingCache, MappingSnapshot};
use rubymap::network::error::SourceError;
use rubymap::network::source::{Endpoint, FetchResponse, Fetcher, MappingSource};
use rubymap::network::storage::MemoryStorage;
use rubymap::parsers::html::{find_nodes, html_to_dom, serialize_children};

/// 按地址返回固定响应的获取器
pub struct StaticFetcher {
    responses: HashMap<String, (u16, String)>,
    pub calls: RefCell<Vec<String>>,
}

impl StaticFetcher {
    pub fn new(responses: &[(&str, u16, &str)]) -> Self {
        Self {
            responses: responses
                .iter()
                .map(|(url, status, body)| (url.to_string(), (*status, body.to_string())))
                .collect(),
            calls: RefCell::new(Vec::new()),
        }
    }
}

impl Fetcher for StaticFetcher {
    fn fetch(&self, url: &str) -> Result<FetchResponse, SourceError> {
        self.calls.borrow_mut().push(url.to_string());
        match self.responses.get(url) {
            Some((status, body)) => Ok(FetchResponse {
                status: *status,
                body: body.clone(),
            }),
            None => Err(SourceError::Network {
                url: url.to_string(),
                message: "connection refused".to_string(),
            }),
        }
    }
}

/// 用固定响应创建内存缓存，端点按给出的顺序尝试
pub fn cache_with(responses: &[(&str, u16, &str)]) -> MappingCache {
    let endpoints = responses
        .iter()
        .enumerate()
        .map(|(i, (url, _, _))| Endpoint::new(format!("endpoint-{i}"), *url))
        .collect();
    let source = MappingSource::new(Box::new(StaticFetcher::new(responses)), endpoints);
    MappingCache::new(source, Box::new(MemoryStorage::new()))
}

pub fn mapping(pairs: &[(&str, &str)]) -> Mapping {
    pairs.iter().copied().collect()
}

pub fn success_record(pairs: &[(&str, &str)]) -> CacheRecord {
    let mapping = mapping(pairs);
    CacheRecord::Success(MappingSnapshot {
        entry_count: mapping.len(),
        mapping,
        fetched_at: Utc::now(),
        source: "test".to_string(),
        duration_ms: 0,
    })
}

/// 解析 HTML，返回 DOM（调用方需要持有它）和 body 元素
pub fn parse_body(html: &str) -> (RcDom, Handle) {
    let dom = html_to_dom(html.as_bytes(), "utf-8").unwrap();
    let body = find_nodes(&dom.document, &["html", "body"]).remove(0);
    (dom, body)
}

pub fn inner_html(node: &Handle) -> String {
    serialize_children(node).unwrap()
}

/// 生成 `prefix1 prefix2 ... prefixN`
pub fn packed_tokens(prefix: &str, count: usize) -> String {
    (1..=count)
        .map(|i| format!("{prefix}{i}"))
        .collect::<Vec<_>>()
        .join(" ")
}
