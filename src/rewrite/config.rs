//! 设置快照、域名白名单与配置加载
//!
//! 设置是不可变快照：变更时整体替换，进行中的改写始终看到一致的一组开关。

use std::path::Path;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::network::source::Endpoint;

use super::error::ConfigError;

/// 按顺序查找的配置文件
pub const CONFIG_PATHS: &[&str] = &[
    "./rubymap.toml",
    "./.rubymap.toml",
    "~/.config/rubymap/config.toml",
    "~/.rubymap.toml",
];

/// 默认的本地存储文件
pub const DEFAULT_STORAGE_PATH: &str = "~/.cache/rubymap/storage.json";

/// 默认的 User-Agent
pub const DEFAULT_USER_AGENT: &str = concat!("rubymap/", env!("CARGO_PKG_VERSION"));

/// 三个独立开关
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub enabled: bool,
    /// 为真时主文本显示原文、注音显示替换结果
    pub ruby_swap: bool,
    pub domain_only: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            enabled: true,
            ruby_swap: false,
            domain_only: true,
        }
    }
}

/// 页面来源信息
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageContext {
    pub url: Option<String>,
    /// 顶层页面地址（只有同源时宿主才能提供）
    pub top_url: Option<String>,
    pub referrer: Option<String>,
}

impl PageContext {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Default::default()
        }
    }
}

/// 域名白名单
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DomainPolicy {
    hosts: Vec<String>,
}

impl DomainPolicy {
    pub fn new<I, S>(hosts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let hosts = hosts
            .into_iter()
            .map(|host| host.as_ref().trim().trim_matches('.').to_ascii_lowercase())
            .filter(|host| !host.is_empty())
            .collect();
        Self { hosts }
    }

    pub fn hosts(&self) -> &[String] {
        &self.hosts
    }

    /// 主机名是否在白名单中（完全相同或为其子域名）
    pub fn host_allowed(&self, host: &str) -> bool {
        let host = host.trim_end_matches('.').to_ascii_lowercase();
        self.hosts.iter().any(|allowed| {
            host == *allowed
                || host
                    .strip_suffix(allowed.as_str())
                    .is_some_and(|prefix| prefix.ends_with('.'))
        })
    }

    fn url_allowed(&self, url: &str) -> bool {
        Url::parse(url)
            .ok()
            .and_then(|url| url.host_str().map(|host| self.host_allowed(host)))
            .unwrap_or(false)
    }

    /// 页面自身、同源的顶层页面或来源页面任一在白名单中即允许
    pub fn allows(&self, page: &str, top: Option<&str>, referrer: Option<&str>) -> bool {
        if self.url_allowed(page) {
            return true;
        }

        if let Some(top) = top {
            let same_origin = match (Url::parse(page), Url::parse(top)) {
                (Ok(page), Ok(top)) => page.origin() == top.origin(),
                _ => false,
            };
            if same_origin && self.url_allowed(top) {
                return true;
            }
        }

        referrer.is_some_and(|referrer| self.url_allowed(referrer))
    }

    /// 按页面来源判断，缺少页面地址时不允许
    pub fn allows_page(&self, page: &PageContext) -> bool {
        match page.url.as_deref() {
            Some(url) => self.allows(url, page.top_url.as_deref(), page.referrer.as_deref()),
            None => false,
        }
    }
}

/// 应用配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub settings: Settings,
    /// 按顺序尝试的映射端点
    pub endpoints: Vec<Endpoint>,
    pub allowed_hosts: Vec<String>,
    pub storage_path: String,
    /// 获取超时（秒），不设置时无限等待
    pub fetch_timeout_secs: Option<u64>,
    pub user_agent: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            settings: Settings::default(),
            endpoints: Vec::new(),
            allowed_hosts: Vec::new(),
            storage_path: DEFAULT_STORAGE_PATH.to_string(),
            fetch_timeout_secs: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl AppConfig {
    /// 验证配置
    pub fn validate(&self) -> Result<(), ConfigError> {
        for endpoint in &self.endpoints {
            if endpoint.id.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "端点 {} 缺少标识",
                    endpoint.url
                )));
            }
            let scheme_ok = Url::parse(&endpoint.url)
                .map(|url| matches!(url.scheme(), "http" | "https"))
                .unwrap_or(false);
            if !scheme_ok {
                return Err(ConfigError::Invalid(format!(
                    "端点 {} 的地址无效: {}",
                    endpoint.id, endpoint.url
                )));
            }
        }

        if self.fetch_timeout_secs == Some(0) {
            return Err(ConfigError::Invalid("获取超时必须大于0".to_string()));
        }

        if self.storage_path.trim().is_empty() {
            return Err(ConfigError::Invalid("存储路径不能为空".to_string()));
        }

        Ok(())
    }

    /// 应用环境变量覆盖，只覆盖显式设置的变量
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        use crate::env::{core, settings, source, EnvVar};

        if let Some(url) = source::SheetUrl::get_set()? {
            tracing::info!("环境变量覆盖映射端点: {}", url);
            self.endpoints = vec![Endpoint::new("env", url)];
        }
        if let Some(timeout) = source::FetchTimeout::get_set()? {
            self.fetch_timeout_secs = Some(timeout.as_secs());
        }
        if let Some(path) = core::StoragePath::get_set()? {
            self.storage_path = path;
        }

        if let Some(enabled) = settings::Enabled::get_set()? {
            self.settings.enabled = enabled;
        }
        if let Some(ruby_swap) = settings::RubySwap::get_set()? {
            self.settings.ruby_swap = ruby_swap;
        }
        if let Some(domain_only) = settings::DomainOnly::get_set()? {
            self.settings.domain_only = domain_only;
        }

        Ok(())
    }

    /// 展开 `~` 后的存储路径
    pub fn storage_path(&self) -> String {
        shellexpand::tilde(&self.storage_path).into_owned()
    }

    pub fn fetch_timeout(&self) -> Option<std::time::Duration> {
        self.fetch_timeout_secs.map(std::time::Duration::from_secs)
    }

    pub fn domain_policy(&self) -> DomainPolicy {
        DomainPolicy::new(&self.allowed_hosts)
    }
}

/// 配置管理器
pub struct ConfigManager {
    config: AppConfig,
    config_path: Option<String>,
}

impl ConfigManager {
    /// 依次合并默认值、配置文件、`RUBYMAP__` 环境变量和类型化环境变量
    pub fn new() -> Result<Self, ConfigError> {
        Self::load_dotenv();

        let config_path = CONFIG_PATHS
            .iter()
            .map(|path| shellexpand::tilde(path).into_owned())
            .find(|path| Path::new(path).exists());

        Self::load(config_path.as_deref())
    }

    /// 从指定文件加载（文件不存在时报错）
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let expanded = shellexpand::tilde(path).into_owned();
        if !Path::new(&expanded).exists() {
            return Err(ConfigError::Invalid(format!("配置文件不存在: {}", expanded)));
        }
        Self::load(Some(&expanded))
    }

    fn load(config_path: Option<&str>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder().add_source(Config::try_from(&AppConfig::default())?);

        if let Some(path) = config_path {
            tracing::info!("加载配置文件: {}", path);
            builder = builder.add_source(File::with_name(path));
        } else {
            tracing::debug!("未找到配置文件，使用默认配置");
        }

        builder = builder.add_source(
            Environment::with_prefix("RUBYMAP")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let mut config: AppConfig = builder.build()?.try_deserialize()?;
        config.apply_env_overrides()?;
        config.validate()?;

        Ok(Self {
            config,
            config_path: config_path.map(str::to_string),
        })
    }

    /// 加载 .env 文件
    fn load_dotenv() {
        let env_files = [".env.local", ".env"];

        for env_file in &env_files {
            if Path::new(env_file).exists() && dotenv::from_filename(env_file).is_ok() {
                tracing::info!("已加载环境变量文件: {}", env_file);
                break;
            }
        }
    }

    pub fn get_config(&self) -> &AppConfig {
        &self.config
    }

    pub fn into_config(self) -> AppConfig {
        self.config
    }

    pub fn config_path(&self) -> Option<&str> {
        self.config_path.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_settings_defaults() {
        let settings = Settings::default();
        assert!(settings.enabled);
        assert!(!settings.ruby_swap);
        assert!(settings.domain_only);

        let partial: Settings = serde_json::from_str(r#"{"ruby_swap": true}"#).unwrap();
        assert!(partial.enabled);
        assert!(partial.ruby_swap);
    }

    #[test]
    fn test_host_matching() {
        let policy = DomainPolicy::new(["Example.jp", ".news.example.com"]);
        assert!(policy.host_allowed("example.jp"));
        assert!(policy.host_allowed("www.example.jp"));
        assert!(!policy.host_allowed("badexample.jp"));
        assert!(policy.host_allowed("a.news.example.com"));
        assert!(!policy.host_allowed("example.com"));
    }

    #[test]
    fn test_allows_page_top_and_referrer() {
        let policy = DomainPolicy::new(["example.jp"]);
        assert!(policy.allows("https://example.jp/a", None, None));
        assert!(!policy.allows("https://other.org/", None, None));
        assert!(policy.allows("https://other.org/", None, Some("https://www.example.jp/list")));
        assert!(!policy.allows("https://other.org/", Some("https://example.jp/"), None));
        assert!(!policy.allows("not a url", None, None));
        assert!(!policy.allows_page(&PageContext::default()));
    }

    #[test]
    fn test_validate_rejects_bad_endpoint() {
        let mut config = AppConfig::default();
        assert!(config.validate().is_ok());

        config.endpoints = vec![Endpoint::new("main", "file:///etc/passwd")];
        assert!(config.validate().is_err());

        config.endpoints = vec![Endpoint::new("main", "https://docs.example.com/export")];
        config.fetch_timeout_secs = Some(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rubymap.toml");
        fs::write(
            &path,
            r#"
allowed_hosts = ["example.jp"]
storage_path = "/tmp/rubymap-test.json"

[[endpoints]]
id = "primary"
url = "https://docs.example.com/export?format=csv"
"#,
        )
        .unwrap();

        let manager = ConfigManager::from_file(path.to_str().unwrap()).unwrap();
        let config = manager.get_config();
        assert_eq!(config.allowed_hosts, vec!["example.jp".to_string()]);
        assert_eq!(config.endpoints[0].id, "primary");
        assert!(config.domain_policy().host_allowed("example.jp"));
        assert!(manager.config_path().is_some());
    }

    #[test]
    fn test_env_overrides_explicit_variables() {
        std::env::set_var("RUBYMAP_RUBY_SWAP", "yes");
        std::env::set_var("RUBYMAP_FETCH_TIMEOUT", "30");

        let mut config = AppConfig::default();
        config.apply_env_overrides().unwrap();
        assert!(config.settings.ruby_swap);
        assert!(config.settings.enabled);
        assert_eq!(config.fetch_timeout_secs, Some(30));

        std::env::remove_var("RUBYMAP_RUBY_SWAP");
        std::env::remove_var("RUBYMAP_FETCH_TIMEOUT");
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(ConfigManager::from_file("/nonexistent/rubymap.toml").is_err());
    }
}
