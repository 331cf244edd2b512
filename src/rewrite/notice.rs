//! 页面提示条
//!
//! 只在映射获取失败或替换次数过少时向页面插入一条提示，正常运行时不插入任何内容。
//! 再次显示时替换旧的提示条。

use markup5ever_rcdom::Handle;

use crate::network::cache::{CacheRecord, FailureInfo};
use crate::parsers::html::dom::{
    append_child, create_element, create_text, detach, get_node_attr, prepend_child,
};
use crate::parsers::html::metadata::find_nodes;

/// 提示条元素的 id
pub const NOTICE_ID: &str = "rubymap-notice";

/// 低于该替换次数时给出提示
pub const LOW_REPLACEMENT_THRESHOLD: usize = 3;

/// 提示内容
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    /// 映射不可用
    Failure(String),
    /// 映射可用，但页面上的替换很少
    Warning(String),
}

impl Notice {
    /// 失败记录对应的提示，成功记录返回 `None`
    pub fn from_record(record: &CacheRecord) -> Option<Self> {
        match record {
            CacheRecord::Success(_) => None,
            CacheRecord::Failure(failure) => Some(Notice::Failure(failure_message(failure))),
        }
    }

    /// 初始改写替换过少时的提示
    pub fn low_replacements(changed: usize) -> Option<Self> {
        if changed >= LOW_REPLACEMENT_THRESHOLD {
            return None;
        }
        Some(Notice::Warning(format!(
            "Mapping loaded, but only {changed} replacement(s) were made on this page."
        )))
    }

    pub fn level(&self) -> &'static str {
        match self {
            Notice::Failure(_) => "error",
            Notice::Warning(_) => "warning",
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Notice::Failure(message) | Notice::Warning(message) => message,
        }
    }
}

fn failure_message(failure: &FailureInfo) -> String {
    let mut message = format!("Substitution mapping unavailable: {}", failure.error);
    if failure.auth_required == Some(true) {
        message.push_str(" (the sheet is probably not shared publicly)");
    }
    message
}

/// 在 body 开头插入提示条，返回插入的元素
///
/// 文档没有 body 时不插入。
pub fn show_notice(document: &Handle, notice: &Notice) -> Option<Handle> {
    clear_notice(document);

    let body = find_nodes(document, &["html", "body"]).into_iter().next()?;
    let banner = create_element(
        "div",
        &[("id", NOTICE_ID), ("role", "status"), ("data-level", notice.level())],
    );
    append_child(&banner, create_text(notice.message()));

    prepend_child(&body, banner.clone());

    Some(banner)
}

/// 移除已有的提示条，返回是否移除了元素
pub fn clear_notice(document: &Handle) -> bool {
    let Some(body) = find_nodes(document, &["html", "body"]).into_iter().next() else {
        return false;
    };

    let existing: Vec<Handle> = body
        .children
        .borrow()
        .iter()
        .filter(|child| get_node_attr(child, "id").as_deref() == Some(NOTICE_ID))
        .cloned()
        .collect();

    for banner in &existing {
        detach(banner);
    }

    !existing.is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsers::html::dom::{html_to_dom, text_content};

    #[test]
    fn test_low_replacement_threshold() {
        assert!(Notice::low_replacements(0).is_some());
        assert!(Notice::low_replacements(2).is_some());
        assert!(Notice::low_replacements(3).is_none());
    }

    #[test]
    fn test_failure_notice_mentions_auth() {
        let record = CacheRecord::Failure(FailureInfo {
            error: "HTTP 403 from https://sheet".to_string(),
            status: Some(403),
            auth_required: Some(true),
            ..Default::default()
        });
        let notice = Notice::from_record(&record).unwrap();
        assert_eq!(notice.level(), "error");
        assert!(notice.message().contains("not shared publicly"));
    }

    #[test]
    fn test_show_replaces_previous_banner() {
        let dom = html_to_dom(b"<p>text</p>", "utf-8").unwrap();
        show_notice(&dom.document, &Notice::Warning("first".to_string())).unwrap();
        show_notice(&dom.document, &Notice::Failure("second".to_string())).unwrap();

        let banners = find_nodes(&dom.document, &["html", "body", "div"]);
        assert_eq!(banners.len(), 1);
        assert_eq!(text_content(&banners[0]), "second");

        assert!(clear_notice(&dom.document));
        assert!(find_nodes(&dom.document, &["html", "body", "div"]).is_empty());
    }
}
