//! 最长匹配替换器
//!
//! 所有键按字符长度降序排列（同长度保持出现顺序），转义后拼成一个
//! leftmost-first 的选择表达式。同一起点上先列出的分支胜出，因此较长的键
//! 总是先于它的前缀被匹配。

use std::borrow::Cow;
use std::collections::HashMap;

use regex::{Captures, Regex, RegexBuilder};

use crate::mapping::Mapping;

use super::error::RewriteError;

/// 编译后表达式的大小上限，大映射表会超过 regex 的默认值
const REGEX_SIZE_LIMIT: usize = 256 * (1 << 20);

/// 编译好的替换函数
#[derive(Debug, Clone)]
pub struct Replacer {
    matcher: Regex,
    table: HashMap<String, String>,
}

impl Replacer {
    /// 编译映射，空映射返回 `None`
    pub fn compile(mapping: &Mapping) -> Result<Option<Self>, RewriteError> {
        if mapping.is_empty() {
            return Ok(None);
        }

        let mut keys: Vec<&str> = mapping.iter().map(|(key, _)| key).collect();
        keys.sort_by_key(|key| std::cmp::Reverse(key.chars().count()));

        let pattern = keys
            .iter()
            .map(|key| regex::escape(key))
            .collect::<Vec<_>>()
            .join("|");

        let matcher = RegexBuilder::new(&pattern)
            .size_limit(REGEX_SIZE_LIMIT)
            .dfa_size_limit(REGEX_SIZE_LIMIT)
            .build()?;

        let table = mapping
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();

        tracing::debug!("替换器已编译: {} 个键", keys.len());

        Ok(Some(Self { matcher, table }))
    }

    /// 从左到右一次替换所有不重叠的匹配
    pub fn apply<'t>(&self, text: &'t str) -> Cow<'t, str> {
        self.matcher.replace_all(text, |caps: &Captures| {
            let matched = &caps[0];
            self.table
                .get(matched)
                .cloned()
                .unwrap_or_else(|| matched.to_string())
        })
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}
