//! 统一的环境变量管理系统
//!
//! 提供类型安全、可验证的环境变量访问，所有变量都以 `RUBYMAP_` 为前缀

use std::env;
use std::fmt;
use std::time::Duration;

/// 环境变量解析错误
#[derive(Debug, Clone)]
pub struct EnvError {
    pub variable: String,
    pub message: String,
}

impl fmt::Display for EnvError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Environment variable '{}': {}", self.variable, self.message)
    }
}

impl std::error::Error for EnvError {}

pub type EnvResult<T> = Result<T, EnvError>;

/// 环境变量访问器特性
pub trait EnvVar<T> {
    const NAME: &'static str;
    const DEFAULT: Option<T>;
    const DESCRIPTION: &'static str;

    fn parse(value: &str) -> EnvResult<T>;

    fn get() -> EnvResult<T> {
        match env::var(Self::NAME) {
            Ok(value) => Self::parse(&value),
            Err(_) => {
                if let Some(default) = Self::DEFAULT {
                    Ok(default)
                } else {
                    Err(EnvError {
                        variable: Self::NAME.to_string(),
                        message: "Required environment variable not set".to_string(),
                    })
                }
            }
        }
    }

    /// 只有变量被显式设置时才返回值，不回落到默认值
    fn get_set() -> EnvResult<Option<T>> {
        match env::var(Self::NAME) {
            Ok(value) => Self::parse(&value).map(Some),
            Err(_) => Ok(None),
        }
    }

    fn get_or_default(default: T) -> T {
        Self::get().unwrap_or(default)
    }
}

/// 核心环境变量定义
pub mod core {
    use super::*;

    /// 日志级别
    pub struct LogLevel;
    impl EnvVar<String> for LogLevel {
        const NAME: &'static str = "RUBYMAP_LOG_LEVEL";
        const DEFAULT: Option<String> = None;

        fn get() -> EnvResult<String> {
            match env::var(Self::NAME) {
                Ok(value) => Self::parse(&value),
                Err(_) => Ok("info".to_string()),
            }
        }
        const DESCRIPTION: &'static str = "Log level: trace, debug, info, warn, error";

        fn parse(value: &str) -> EnvResult<String> {
            match value.to_lowercase().as_str() {
                "trace" | "debug" | "info" | "warn" | "error" => Ok(value.to_lowercase()),
                _ => Err(EnvError {
                    variable: Self::NAME.to_string(),
                    message: format!(
                        "Invalid log level '{}'. Use: trace, debug, info, warn, error",
                        value
                    ),
                }),
            }
        }
    }

    /// 本地存储文件路径
    pub struct StoragePath;
    impl EnvVar<String> for StoragePath {
        const NAME: &'static str = "RUBYMAP_STORAGE_PATH";
        const DEFAULT: Option<String> = None;
        const DESCRIPTION: &'static str = "Path of the JSON file holding the cache record and user mapping";

        fn parse(value: &str) -> EnvResult<String> {
            let path = value.trim();
            if path.is_empty() {
                return Err(EnvError {
                    variable: Self::NAME.to_string(),
                    message: "Path cannot be empty".to_string(),
                });
            }
            Ok(shellexpand::tilde(path).into_owned())
        }
    }
}

/// 映射源相关环境变量
pub mod source {
    use super::*;

    /// 表格导出地址
    pub struct SheetUrl;
    impl EnvVar<String> for SheetUrl {
        const NAME: &'static str = "RUBYMAP_SHEET_URL";
        const DEFAULT: Option<String> = None;
        const DESCRIPTION: &'static str = "Spreadsheet export URL the mapping is fetched from";

        fn parse(value: &str) -> EnvResult<String> {
            let url = value.trim();
            if url.starts_with("http://") || url.starts_with("https://") {
                Ok(url.to_string())
            } else {
                Err(EnvError {
                    variable: Self::NAME.to_string(),
                    message: "Sheet URL must start with http:// or https://".to_string(),
                })
            }
        }
    }

    /// 获取超时
    pub struct FetchTimeout;
    impl EnvVar<Duration> for FetchTimeout {
        const NAME: &'static str = "RUBYMAP_FETCH_TIMEOUT";
        const DEFAULT: Option<Duration> = None; // 默认不设超时
        const DESCRIPTION: &'static str = "Fetch timeout in seconds (unset: wait indefinitely)";

        fn parse(value: &str) -> EnvResult<Duration> {
            let seconds: u64 = value.trim().parse().map_err(|_| EnvError {
                variable: Self::NAME.to_string(),
                message: "Must be a valid number of seconds".to_string(),
            })?;

            if seconds == 0 {
                return Err(EnvError {
                    variable: Self::NAME.to_string(),
                    message: "Timeout must be greater than 0".to_string(),
                });
            }

            Ok(Duration::from_secs(seconds))
        }
    }
}

/// 页面改写开关
pub mod settings {
    use super::*;

    /// 改写总开关
    pub struct Enabled;
    impl EnvVar<bool> for Enabled {
        const NAME: &'static str = "RUBYMAP_ENABLED";
        const DEFAULT: Option<bool> = Some(true);
        const DESCRIPTION: &'static str = "Enable page rewriting";

        fn parse(value: &str) -> EnvResult<bool> {
            parse_bool(value, Self::NAME)
        }
    }

    /// 注音方向
    pub struct RubySwap;
    impl EnvVar<bool> for RubySwap {
        const NAME: &'static str = "RUBYMAP_RUBY_SWAP";
        const DEFAULT: Option<bool> = Some(false);
        const DESCRIPTION: &'static str = "Show the original as ruby base and the replacement as annotation";

        fn parse(value: &str) -> EnvResult<bool> {
            parse_bool(value, Self::NAME)
        }
    }

    /// 域名限制
    pub struct DomainOnly;
    impl EnvVar<bool> for DomainOnly {
        const NAME: &'static str = "RUBYMAP_DOMAIN_ONLY";
        const DEFAULT: Option<bool> = Some(true);
        const DESCRIPTION: &'static str = "Only rewrite pages on allow-listed hosts";

        fn parse(value: &str) -> EnvResult<bool> {
            parse_bool(value, Self::NAME)
        }
    }
}

/// 辅助函数
fn parse_bool(value: &str, var_name: &str) -> EnvResult<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" | "enabled" => Ok(true),
        "false" | "0" | "no" | "off" | "disabled" => Ok(false),
        _ => Err(EnvError {
            variable: var_name.to_string(),
            message: format!(
                "Invalid boolean value '{}'. Use: true/false, 1/0, yes/no, on/off, enabled/disabled",
                value
            ),
        }),
    }
}

/// 环境变量文档生成器
pub fn generate_env_docs() -> String {
    let mut docs = String::new();
    docs.push_str("# Environment Variables\n\n");

    let entries: [(&str, &str); 7] = [
        (core::LogLevel::NAME, core::LogLevel::DESCRIPTION),
        (core::StoragePath::NAME, core::StoragePath::DESCRIPTION),
        (source::SheetUrl::NAME, source::SheetUrl::DESCRIPTION),
        (source::FetchTimeout::NAME, source::FetchTimeout::DESCRIPTION),
        (settings::Enabled::NAME, settings::Enabled::DESCRIPTION),
        (settings::RubySwap::NAME, settings::RubySwap::DESCRIPTION),
        (settings::DomainOnly::NAME, settings::DomainOnly::DESCRIPTION),
    ];

    for (name, description) in entries {
        docs.push_str(&format!("- `{}`: {}\n", name, description));
    }

    docs
}
