//! 改写资格判定

use std::rc::Rc;

use markup5ever_rcdom::Handle;

use crate::parsers::html::dom::{ancestors, get_node_attr, get_node_name, is_html_element};

use super::notice::NOTICE_ID;
use super::units::MARKER_ATTR;

/// 内容不作为可见文本处理的元素
pub const SKIPPED_ELEMENTS: &[&str] = &[
    "script", "style", "noscript", "template", "textarea", "input", "select", "iframe", "object",
    "embed", "canvas", "svg", "math", "code", "pre", "rt", "rp",
];

/// 不能容纳包装元素的父元素，其中的文本只能原地改写
pub const NO_WRAPPER_PARENTS: &[&str] = &["title", "option", "optgroup", "ruby"];

/// 参与改写的 input 类型（缺省类型视为 text）
pub const TEXT_INPUT_TYPES: &[&str] = &["text", "search", "url", "email", "tel"];

/// 表单字段的值所在位置
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// `input` 的 `value` 属性
    ValueAttr,
    /// `textarea` 的文本内容
    TextContent,
}

/// 元素本身及其内容都不参与改写
pub fn is_skipped_element(node: &Handle) -> bool {
    match get_node_name(node) {
        Some(name) => {
            SKIPPED_ELEMENTS.contains(&name)
                || get_node_attr(node, "id").as_deref() == Some(NOTICE_ID)
        }
        None => false,
    }
}

/// 节点是否位于被跳过的元素之内
pub fn has_skipped_ancestor(node: &Handle) -> bool {
    ancestors(node).any(|ancestor| is_skipped_element(&ancestor))
}

/// 是否为改写产生的结构化包装元素
pub fn is_wrapper(node: &Handle) -> bool {
    get_node_name(node) == Some("span") && get_node_attr(node, MARKER_ATTR).is_some()
}

/// 最近的包装元素祖先（含自身）
pub fn enclosing_wrapper(node: &Handle) -> Option<Handle> {
    if is_wrapper(node) {
        return Some(node.clone());
    }
    ancestors(node).find(is_wrapper)
}

/// 节点是否处于改写产生的结构之内
///
/// 只有包装元素内部的 `ruby`/`rt` 属于改写结果，页面自带的注音不算。
pub fn is_inside_generated(node: &Handle) -> bool {
    enclosing_wrapper(node).is_some()
}

/// 父元素能否容纳包装元素
pub fn can_host_wrapper(parent: &Handle) -> bool {
    match get_node_name(parent) {
        Some(name) => is_html_element(parent) && !NO_WRAPPER_PARENTS.contains(&name),
        None => false,
    }
}

/// 只含空白的文本
pub fn is_blank(text: &str) -> bool {
    text.trim().is_empty()
}

/// 判定表单字段类型
pub fn field_kind(node: &Handle) -> Option<FieldKind> {
    if !is_html_element(node) {
        return None;
    }
    match get_node_name(node)? {
        "textarea" => Some(FieldKind::TextContent),
        "input" => {
            let input_type = get_node_attr(node, "type")
                .map(|t| t.trim().to_ascii_lowercase())
                .unwrap_or_default();
            if input_type.is_empty() || TEXT_INPUT_TYPES.contains(&input_type.as_str()) {
                Some(FieldKind::ValueAttr)
            } else {
                None
            }
        }
        _ => None,
    }
}

fn is_content_editable(node: &Handle) -> bool {
    match get_node_attr(node, "contenteditable") {
        Some(value) => !value.trim().eq_ignore_ascii_case("false"),
        None => false,
    }
}

/// 节点是否处于用户正在编辑的区域
///
/// 焦点在节点自身（或其祖先字段）上，或者节点所在的可编辑区域包含焦点节点。
pub fn is_in_focused_editable(node: &Handle, focused: Option<&Handle>) -> bool {
    let Some(focused) = focused else {
        return false;
    };

    let mut chain = std::iter::once(node.clone()).chain(ancestors(node));
    chain.any(|candidate| {
        if Rc::ptr_eq(&candidate, focused) {
            return true;
        }
        is_content_editable(&candidate)
            && std::iter::once(focused.clone())
                .chain(ancestors(focused))
                .any(|f| Rc::ptr_eq(&f, &candidate))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsers::html::dom::{append_child, create_element, html_to_dom};
    use markup5ever_rcdom::RcDom;

    // 文档被释放时会清空所有后代，测试期间必须持有 RcDom
    fn body(html: &str) -> (RcDom, Handle) {
        let dom = html_to_dom(html.as_bytes(), "utf-8").unwrap();
        let root = dom.document.children.borrow()[0].clone();
        let body = root.children.borrow()[1].clone();
        (dom, body)
    }

    #[test]
    fn test_skipped_elements() {
        assert!(is_skipped_element(&create_element("script", &[])));
        assert!(is_skipped_element(&create_element("rt", &[])));
        assert!(is_skipped_element(&create_element("div", &[("id", NOTICE_ID)])));
        assert!(!is_skipped_element(&create_element("p", &[])));
    }

    #[test]
    fn test_wrapper_hosting() {
        assert!(can_host_wrapper(&create_element("p", &[])));
        assert!(!can_host_wrapper(&create_element("title", &[])));
        assert!(!can_host_wrapper(&create_element("option", &[])));

        let (_dom, body) = body("<svg><text>x</text></svg>");
        let svg = body.children.borrow()[0].clone();
        let svg_text = svg.children.borrow()[0].clone();
        assert!(!can_host_wrapper(&svg));
        assert!(!can_host_wrapper(&svg_text));
    }

    #[test]
    fn test_field_kinds() {
        assert_eq!(
            field_kind(&create_element("input", &[])),
            Some(FieldKind::ValueAttr)
        );
        assert_eq!(
            field_kind(&create_element("input", &[("type", "Search")])),
            Some(FieldKind::ValueAttr)
        );
        assert_eq!(field_kind(&create_element("input", &[("type", "password")])), None);
        assert_eq!(
            field_kind(&create_element("textarea", &[])),
            Some(FieldKind::TextContent)
        );
    }

    #[test]
    fn test_focused_editable_region() {
        let (_dom, body) = body("<div contenteditable><p>a</p><b>b</b></div><p>c</p>");
        let editor = body.children.borrow()[0].clone();
        let para = editor.children.borrow()[0].clone();
        let bold = editor.children.borrow()[1].clone();
        let outside = body.children.borrow()[1].clone();
        let text = para.children.borrow()[0].clone();

        assert!(is_in_focused_editable(&text, Some(&bold)));
        assert!(!is_in_focused_editable(&outside, Some(&bold)));
        assert!(!is_in_focused_editable(&text, None));
        assert!(is_in_focused_editable(&outside, Some(&outside)));
    }

    #[test]
    fn test_generated_structure_detection() {
        let wrapper = create_element("span", &[(MARKER_ATTR, "a")]);
        assert!(is_wrapper(&wrapper));
        assert!(is_inside_generated(&wrapper));
        assert!(!is_wrapper(&create_element("span", &[])));

        let ruby = create_element("ruby", &[]);
        let rt = create_element("rt", &[]);
        append_child(&ruby, rt.clone());
        assert!(!is_inside_generated(&ruby));
        assert!(!is_inside_generated(&rt));

        append_child(&wrapper, ruby.clone());
        assert!(is_inside_generated(&rt));
    }
}
