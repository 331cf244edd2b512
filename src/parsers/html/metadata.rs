//! HTML 文档元数据
//!
//! 读取文档自身声明的字符编码和来源地址。来源地址供域名白名单判断使用，
//! 当调用方没有提供页面地址时从文档中推断。

use markup5ever_rcdom::Handle;

use super::dom::{get_node_attr, get_node_name};

/// 查找指定路径的DOM节点
pub fn find_nodes(node: &Handle, node_names: &[&str]) -> Vec<Handle> {
    let mut found_nodes = Vec::new();
    let Some((first, rest)) = node_names.split_first() else {
        return found_nodes;
    };

    if get_node_name(node) == Some(*first) {
        if rest.is_empty() {
            found_nodes.push(node.clone());
        } else {
            for child_node in node.children.borrow().iter() {
                found_nodes.append(&mut find_nodes(child_node, rest));
            }
            return found_nodes;
        }
    }

    for child_node in node.children.borrow().iter() {
        found_nodes.append(&mut find_nodes(child_node, node_names));
    }

    found_nodes
}

/// 获取文档字符编码
///
/// 支持 `<meta charset>` 和 `<meta http-equiv="content-type">` 两种写法。
pub fn get_charset(node: &Handle) -> Option<String> {
    for meta_node in find_nodes(node, &["html", "head", "meta"]).iter() {
        if let Some(charset) = get_node_attr(meta_node, "charset") {
            return Some(charset);
        }

        let is_content_type = get_node_attr(meta_node, "http-equiv")
            .unwrap_or_default()
            .eq_ignore_ascii_case("content-type");
        if is_content_type {
            if let Some(content) = get_node_attr(meta_node, "content") {
                return content.split(';').skip(1).find_map(|part| {
                    part.trim()
                        .strip_prefix("charset=")
                        .map(|charset| charset.trim_matches('"').to_string())
                });
            }
        }
    }

    None
}

/// 推断文档来源地址
///
/// 依次查找 `<base href>`、`<link rel="canonical">` 和 `<meta property="og:url">`。
pub fn get_document_url(handle: &Handle) -> Option<String> {
    if let Some(href) = find_nodes(handle, &["html", "head", "base"])
        .first()
        .and_then(|base| get_node_attr(base, "href"))
    {
        return Some(href);
    }

    for link in find_nodes(handle, &["html", "head", "link"]).iter() {
        let is_canonical = get_node_attr(link, "rel")
            .is_some_and(|rel| rel.split_whitespace().any(|r| r.eq_ignore_ascii_case("canonical")));
        if is_canonical {
            if let Some(href) = get_node_attr(link, "href") {
                return Some(href);
            }
        }
    }

    find_nodes(handle, &["html", "head", "meta"])
        .iter()
        .find(|meta| get_node_attr(meta, "property").as_deref() == Some("og:url"))
        .and_then(|meta| get_node_attr(meta, "content"))
}
