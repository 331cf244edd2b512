use std::fs;
use std::io::{self, Read};
use std::path::Path;
use std::time::Instant;

use chrono::Utc;
use encoding_rs::Encoding;
use markup5ever_rcdom::RcDom;
use thiserror::Error;

use crate::env::EnvError;
use crate::mapping::{build_mapping, Mapping, MappingError};
use crate::network::cache::{CacheRecord, MappingCache, MappingSnapshot};
use crate::network::error::{MessagingError, SourceError, StorageError};
use crate::network::messaging::fetch_cache_record;
use crate::network::source::{Endpoint, HttpFetcher, MappingSource};
use crate::network::storage::JsonFileStorage;
use crate::parsers::html::{get_charset, get_document_url, html_to_dom, serialize_document};
use crate::parsers::table::parse_table;
use crate::rewrite::config::{AppConfig, DomainPolicy, PageContext, Settings};
use crate::rewrite::engine::Sample;
use crate::rewrite::error::{ConfigError, RewriteError};
use crate::rewrite::notice::Notice;
use crate::rewrite::session::ContentSession;

/// 处理过程中可能出现的错误
#[derive(Error, Debug)]
pub enum RubymapError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("{0}")]
    Source(#[from] SourceError),

    #[error("{0}")]
    Storage(#[from] StorageError),

    #[error("{0}")]
    Messaging(#[from] MessagingError),

    #[error("{0}")]
    Mapping(#[from] MappingError),

    #[error("{0}")]
    Rewrite(#[from] RewriteError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("{0}")]
    Env(#[from] EnvError),

    #[error("unknown encoding \"{0}\"")]
    Encoding(String),

    #[error("substitution mapping unavailable: {0}")]
    Unavailable(String),
}

/// 文档处理选项
#[derive(Debug, Default, Clone)]
pub struct RubymapOptions {
    /// 输入文档的编码，不设置时从文档声明中推断
    pub encoding: Option<String>,
    /// 页面地址，不设置时从文档中推断
    pub page_url: Option<String>,
    pub top_url: Option<String>,
    pub referrer: Option<String>,
    pub settings: Settings,
    pub allowed_hosts: Vec<String>,
    /// 只还原之前改写过的文档
    pub restore: bool,
    /// 不向文档插入提示条
    pub no_notice: bool,
}

/// 一次文档处理的结果
#[derive(Debug, Default)]
pub struct ProcessedDocument {
    pub data: Vec<u8>,
    pub changed: usize,
    pub restored: usize,
    pub samples: Vec<Sample>,
    pub notice: Option<Notice>,
}

const ANSI_COLOR_RED: &str = "\x1b[31m";
const ANSI_COLOR_RESET: &str = "\x1b[0m";

/// 读取输入文档，`-` 表示标准输入
pub fn read_input(target: &str) -> Result<Vec<u8>, RubymapError> {
    if target == "-" {
        let mut data = Vec::new();
        io::stdin().read_to_end(&mut data)?;
        return Ok(data);
    }

    let path = Path::new(target);
    if !path.exists() {
        return Err(RubymapError::Io(io::Error::new(
            io::ErrorKind::NotFound,
            format!("file not found: {target}"),
        )));
    }
    Ok(fs::read(path)?)
}

/// 从表格导出文本构建映射
pub fn mapping_from_table_text(text: &str) -> Result<Mapping, RubymapError> {
    let (mapping, _report) = build_mapping(&parse_table(text));
    Ok(mapping.into_non_empty()?)
}

/// 把本地表格文件包装为成功的缓存记录
pub fn record_from_table_file(path: &Path) -> Result<CacheRecord, RubymapError> {
    let started = Instant::now();
    let text = fs::read_to_string(path)?;
    let mapping = mapping_from_table_text(&text)?;

    Ok(CacheRecord::Success(MappingSnapshot {
        entry_count: mapping.len(),
        mapping,
        fetched_at: Utc::now(),
        source: path.display().to_string(),
        duration_ms: started.elapsed().as_millis() as u64,
    }))
}

/// 按配置创建映射缓存（HTTP 获取 + JSON 文件存储）
pub fn open_cache(config: &AppConfig) -> Result<MappingCache, RubymapError> {
    let fetcher = HttpFetcher::new(Some(config.user_agent.as_str()), config.fetch_timeout())?;
    let source = MappingSource::new(Box::new(fetcher), config.endpoints.clone());
    let storage = JsonFileStorage::new(config.storage_path());
    Ok(MappingCache::new(source, Box::new(storage)))
}

/// 用单个表格地址替换配置中的端点
pub fn sheet_endpoints(url: &str) -> Vec<Endpoint> {
    vec![Endpoint::new("sheet", url)]
}

/// 通过消息通道获取缓存记录，没有可用记录且配置了端点时先刷新
pub fn obtain_record(cache: &mut MappingCache, force_refresh: bool) -> Result<CacheRecord, RubymapError> {
    let has_endpoints = !cache.endpoints().is_empty();
    let mut record = fetch_cache_record(cache, force_refresh && has_endpoints)?;

    if !record.is_ok() && !force_refresh && has_endpoints {
        tracing::info!("没有可用的缓存映射，开始刷新");
        record = fetch_cache_record(cache, true)?;
    }

    Ok(record)
}

/// 文档处理器
pub struct DocumentProcessor {
    options: RubymapOptions,
}

impl DocumentProcessor {
    pub fn new(options: RubymapOptions) -> Self {
        Self { options }
    }

    /// 处理文档数据并返回最终结果
    pub fn process_document(
        &self,
        input_data: &[u8],
        record: &CacheRecord,
    ) -> Result<ProcessedDocument, RubymapError> {
        // 1. 解析文档并确定编码
        let (dom, document_encoding) = self.parse_document(input_data)?;

        // 2. 确定页面来源
        let page = self.page_context(&dom);

        // 3. 执行改写或还原
        let policy = DomainPolicy::new(&self.options.allowed_hosts);
        let mut session =
            ContentSession::new(dom.document.clone(), page, policy, self.options.settings);

        let mut result = ProcessedDocument::default();
        if self.options.restore {
            result.restored = session.restore();
            tracing::info!("已还原 {} 个单元", result.restored);
        } else {
            let report = session.start(record)?;
            result.changed = report.changed;
            result.samples = report.samples;
            result.notice = session.notice().cloned();
            if !self.options.no_notice {
                session.render_notice();
            }
        }

        // 4. 序列化
        result.data = serialize_document(&dom, &document_encoding)?;
        Ok(result)
    }

    fn parse_document(&self, input_data: &[u8]) -> Result<(RcDom, String), RubymapError> {
        if let Some(label) = &self.options.encoding {
            let encoding = Encoding::for_label_no_replacement(label.as_bytes())
                .ok_or_else(|| RubymapError::Encoding(label.clone()))?;
            let dom = html_to_dom(input_data, encoding.name())?;
            return Ok((dom, encoding.name().to_string()));
        }

        let mut document_encoding = "utf-8".to_string();
        let mut dom = html_to_dom(input_data, &document_encoding)?;

        if let Some(html_charset) = get_charset(&dom.document) {
            if let Some(charset) = Encoding::for_label_no_replacement(html_charset.as_bytes()) {
                if charset != encoding_rs::UTF_8 {
                    document_encoding = charset.name().to_string();
                    dom = html_to_dom(input_data, &document_encoding)?;
                }
            }
        }

        Ok((dom, document_encoding))
    }

    fn page_context(&self, dom: &RcDom) -> PageContext {
        let url = self
            .options
            .page_url
            .clone()
            .or_else(|| get_document_url(&dom.document));

        if url.is_none() && self.options.settings.domain_only {
            tracing::warn!("无法确定页面地址，域名限制下不会改写");
        }

        PageContext {
            url,
            top_url: self.options.top_url.clone(),
            referrer: self.options.referrer.clone(),
        }
    }
}

/// Prints an error message to stderr
pub fn print_error_message(msg: &str) {
    eprintln!("{ANSI_COLOR_RED}{msg}{ANSI_COLOR_RESET}");
}

/// Prints an info message to stderr
pub fn print_info_message(msg: &str) {
    eprintln!("{msg}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::cache::FailureInfo;

    fn record(pairs: &[(&str, &str)]) -> CacheRecord {
        let mapping: Mapping = pairs.iter().copied().collect();
        CacheRecord::Success(MappingSnapshot {
            entry_count: mapping.len(),
            mapping,
            fetched_at: Utc::now(),
            source: "test".to_string(),
            duration_ms: 0,
        })
    }

    fn open_options() -> RubymapOptions {
        RubymapOptions {
            settings: Settings {
                domain_only: false,
                ..Settings::default()
            },
            no_notice: true,
            ..Default::default()
        }
    }

    #[test]
    fn test_mapping_from_table_text() {
        let mapping = mapping_from_table_text("猫,ねこ\n犬,いぬ\n").unwrap();
        assert_eq!(mapping.get("犬"), Some("いぬ"));
        assert!(matches!(
            mapping_from_table_text(""),
            Err(RubymapError::Mapping(MappingError::EmptyMapping))
        ));
    }

    #[test]
    fn test_process_and_restore_roundtrip() {
        let input = "<html><body><p>猫がいる</p></body></html>";
        let processor = DocumentProcessor::new(open_options());
        let processed = processor
            .process_document(input.as_bytes(), &record(&[("猫", "ねこ")]))
            .unwrap();
        let output = String::from_utf8(processed.data).unwrap();
        assert_eq!(processed.changed, 1);
        assert!(output.contains("data-rubymap-original=\"猫がいる\""));

        let restorer = DocumentProcessor::new(RubymapOptions {
            restore: true,
            ..open_options()
        });
        let restored = restorer
            .process_document(output.as_bytes(), &CacheRecord::default())
            .unwrap();
        assert_eq!(restored.restored, 1);
        assert_eq!(
            String::from_utf8(restored.data).unwrap(),
            "<html><head></head><body><p>猫がいる</p></body></html>"
        );
    }

    #[test]
    fn test_domain_policy_uses_document_url() {
        let input = "<html><head><link rel=\"canonical\" href=\"https://www.example.jp/a\"></head>\
                     <body><p>猫</p></body></html>";
        let processor = DocumentProcessor::new(RubymapOptions {
            allowed_hosts: vec!["example.jp".to_string()],
            no_notice: true,
            ..Default::default()
        });
        let processed = processor
            .process_document(input.as_bytes(), &record(&[("猫", "ねこ")]))
            .unwrap();
        assert_eq!(processed.changed, 1);

        let blocked = DocumentProcessor::new(RubymapOptions {
            allowed_hosts: vec!["other.org".to_string()],
            no_notice: true,
            ..Default::default()
        });
        let processed = blocked
            .process_document(input.as_bytes(), &record(&[("猫", "ねこ")]))
            .unwrap();
        assert_eq!(processed.changed, 0);
    }

    #[test]
    fn test_failure_record_injects_notice() {
        let processor = DocumentProcessor::new(RubymapOptions {
            no_notice: false,
            ..open_options()
        });
        let failure = CacheRecord::Failure(FailureInfo::new("mapping is empty"));
        let processed = processor
            .process_document("<p>猫</p>".as_bytes(), &failure)
            .unwrap();
        let output = String::from_utf8(processed.data).unwrap();
        assert!(matches!(processed.notice, Some(Notice::Failure(_))));
        assert!(output.contains("id=\"rubymap-notice\""));
        assert!(output.contains("<p>猫</p>"));
    }

    #[test]
    fn test_unknown_encoding_is_rejected() {
        let processor = DocumentProcessor::new(RubymapOptions {
            encoding: Some("no-such-encoding".to_string()),
            ..open_options()
        });
        assert!(matches!(
            processor.process_document(b"<p></p>", &CacheRecord::default()),
            Err(RubymapError::Encoding(_))
        ));
    }

    #[test]
    fn test_read_missing_input() {
        assert!(read_input("/nonexistent/page.html").is_err());
    }
}
