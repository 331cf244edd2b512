use std::cell::RefCell;
use std::io;
use std::rc::Rc;

use encoding_rs::Encoding;
use html5ever::interface::{Attribute, QualName};
use html5ever::parse_document;
use html5ever::tendril::{StrTendril, TendrilSink};
use html5ever::{namespace_url, ns, LocalName};
use markup5ever_rcdom::{Handle, Node, NodeData, RcDom};

/// 将 HTML 字节转换为 DOM
pub fn html_to_dom(data: &[u8], document_encoding: &str) -> io::Result<RcDom> {
    let s = match Encoding::for_label(document_encoding.as_bytes()) {
        Some(encoding) => encoding.decode(data).0.into_owned(),
        None => String::from_utf8_lossy(data).into_owned(),
    };

    parse_document(RcDom::default(), Default::default())
        .from_utf8()
        .read_from(&mut s.as_bytes())
}

/// 获取节点名称
pub fn get_node_name(node: &Handle) -> Option<&'_ str> {
    match &node.data {
        NodeData::Element { name, .. } => Some(name.local.as_ref()),
        _ => None,
    }
}

/// 节点是否为 HTML 命名空间内的元素
pub fn is_html_element(node: &Handle) -> bool {
    match &node.data {
        NodeData::Element { name, .. } => name.ns == ns!(html),
        _ => false,
    }
}

/// 获取节点属性值
pub fn get_node_attr(node: &Handle, attr_name: &str) -> Option<String> {
    match &node.data {
        NodeData::Element { attrs, .. } => attrs
            .borrow()
            .iter()
            .find(|attr| &*attr.name.local == attr_name)
            .map(|attr| attr.value.to_string()),
        _ => None,
    }
}

/// 设置节点属性，`None` 表示移除属性
pub fn set_node_attr(node: &Handle, attr_name: &str, attr_value: Option<&str>) {
    if let NodeData::Element { attrs, .. } = &node.data {
        let mut attrs = attrs.borrow_mut();
        let existing = attrs.iter().position(|attr| &*attr.name.local == attr_name);

        match (existing, attr_value) {
            (Some(i), Some(value)) => attrs[i].value = StrTendril::from_slice(value),
            (Some(i), None) => {
                attrs.remove(i);
            }
            (None, Some(value)) => attrs.push(Attribute {
                name: QualName::new(None, ns!(), LocalName::from(attr_name)),
                value: StrTendril::from_slice(value),
            }),
            (None, None) => {}
        }
    }
}

/// 获取父节点
pub fn get_parent_node(child: &Handle) -> Option<Handle> {
    let weak = child.parent.take();
    let parent = weak.as_ref().and_then(|node| node.upgrade());
    child.parent.set(weak);
    parent
}

/// 从父节点（含）向上遍历所有祖先
pub fn ancestors(node: &Handle) -> impl Iterator<Item = Handle> {
    std::iter::successors(get_parent_node(node), get_parent_node)
}

/// `node` 是否为 `ancestor` 本身或其后代
pub fn is_inclusive_descendant(node: &Handle, ancestor: &Handle) -> bool {
    Rc::ptr_eq(node, ancestor) || ancestors(node).any(|a| Rc::ptr_eq(&a, ancestor))
}

/// 节点是否仍挂在某个文档节点之下
pub fn is_attached(node: &Handle) -> bool {
    let root = ancestors(node).last().unwrap_or_else(|| node.clone());
    matches!(root.data, NodeData::Document)
}

/// 读取文本节点内容
pub fn get_text(node: &Handle) -> Option<String> {
    match &node.data {
        NodeData::Text { contents } => Some(contents.borrow().to_string()),
        _ => None,
    }
}

/// 覆写文本节点内容，非文本节点被忽略
pub fn set_text(node: &Handle, text: &str) {
    if let NodeData::Text { contents } = &node.data {
        *contents.borrow_mut() = StrTendril::from_slice(text);
    }
}

/// 所有后代文本节点内容的拼接
pub fn text_content(node: &Handle) -> String {
    let mut out = String::new();
    collect_text(node, &mut out);
    out
}

fn collect_text(node: &Handle, out: &mut String) {
    match &node.data {
        NodeData::Text { contents } => out.push_str(&contents.borrow()),
        _ => {
            for child in node.children.borrow().iter() {
                collect_text(child, out);
            }
        }
    }
}

/// 创建 HTML 元素节点
pub fn create_element(local_name: &str, attributes: &[(&str, &str)]) -> Handle {
    let attrs = attributes
        .iter()
        .map(|(name, value)| Attribute {
            name: QualName::new(None, ns!(), LocalName::from(*name)),
            value: StrTendril::from_slice(value),
        })
        .collect();

    Node::new(NodeData::Element {
        name: QualName::new(None, ns!(html), LocalName::from(local_name)),
        attrs: RefCell::new(attrs),
        template_contents: RefCell::new(None),
        mathml_annotation_xml_integration_point: false,
    })
}

/// 创建文本节点
pub fn create_text(text: &str) -> Handle {
    Node::new(NodeData::Text {
        contents: RefCell::new(StrTendril::from_slice(text)),
    })
}

/// 将子节点追加到父节点末尾
pub fn append_child(parent: &Handle, child: Handle) {
    detach(&child);
    child.parent.set(Some(Rc::downgrade(parent)));
    parent.children.borrow_mut().push(child);
}

/// 将子节点插入到父节点开头
pub fn prepend_child(parent: &Handle, child: Handle) {
    detach(&child);
    child.parent.set(Some(Rc::downgrade(parent)));
    parent.children.borrow_mut().insert(0, child);
}

/// 用新的子节点序列替换父节点的全部子节点，返回被移除的子节点
pub fn replace_children(parent: &Handle, children: Vec<Handle>) -> Vec<Handle> {
    let removed: Vec<Handle> = parent.children.borrow_mut().drain(..).collect();
    for child in &removed {
        child.parent.set(None);
    }
    for child in children {
        append_child(parent, child);
    }
    removed
}

/// 在原位置用 `replacements` 替换 `node`
///
/// 节点没有父节点时返回 `None`，否则返回父节点。
pub fn replace_node(node: &Handle, replacements: Vec<Handle>) -> Option<Handle> {
    let parent = get_parent_node(node)?;
    for replacement in &replacements {
        detach(replacement);
    }
    let index = parent
        .children
        .borrow()
        .iter()
        .position(|child| Rc::ptr_eq(child, node))?;

    for replacement in &replacements {
        replacement.parent.set(Some(Rc::downgrade(&parent)));
    }

    parent
        .children
        .borrow_mut()
        .splice(index..=index, replacements);
    node.parent.set(None);

    Some(parent)
}

/// 将节点从其父节点中移除
pub fn detach(node: &Handle) {
    if let Some(parent) = get_parent_node(node) {
        parent
            .children
            .borrow_mut()
            .retain(|child| !Rc::ptr_eq(child, node));
    }
    node.parent.set(None);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(dom: &RcDom) -> Handle {
        let html = dom.document.children.borrow()[0].clone();
        let body = html.children.borrow()[1].clone();
        body
    }

    #[test]
    fn test_parse_and_read_attrs() {
        let dom = html_to_dom(b"<p lang=\"ja\">hi</p>", "utf-8").unwrap();
        let p = body(&dom).children.borrow()[0].clone();
        assert_eq!(get_node_name(&p), Some("p"));
        assert!(is_html_element(&p));
        assert_eq!(get_node_attr(&p, "lang"), Some("ja".to_string()));
        assert_eq!(text_content(&p), "hi");
    }

    #[test]
    fn test_set_and_remove_attr() {
        let span = create_element("span", &[]);
        set_node_attr(&span, "title", Some("a"));
        set_node_attr(&span, "title", Some("b"));
        assert_eq!(get_node_attr(&span, "title"), Some("b".to_string()));
        set_node_attr(&span, "title", None);
        assert_eq!(get_node_attr(&span, "title"), None);
    }

    #[test]
    fn test_parent_lookup_does_not_detach() {
        let dom = html_to_dom(b"<p>hi</p>", "utf-8").unwrap();
        let p = body(&dom).children.borrow()[0].clone();
        let text = p.children.borrow()[0].clone();
        assert!(get_parent_node(&text).is_some());
        assert!(get_parent_node(&text).is_some());
        assert!(is_attached(&text));
        assert!(is_inclusive_descendant(&text, &dom.document));
    }

    #[test]
    fn test_replace_node_keeps_position() {
        let dom = html_to_dom(b"<p>a<b>b</b>c</p>", "utf-8").unwrap();
        let p = body(&dom).children.borrow()[0].clone();
        let first = p.children.borrow()[0].clone();

        replace_node(&first, vec![create_text("x"), create_text("y")]);

        assert_eq!(text_content(&p), "xybc");
        assert!(!is_attached(&first));
        let second = p.children.borrow()[1].clone();
        assert!(Rc::ptr_eq(&get_parent_node(&second).unwrap(), &p));
    }

    #[test]
    fn test_replace_children() {
        let parent = create_element("span", &[]);
        append_child(&parent, create_text("old"));
        let removed = replace_children(&parent, vec![create_text("new")]);
        assert_eq!(removed.len(), 1);
        assert!(get_parent_node(&removed[0]).is_none());
        assert_eq!(text_content(&parent), "new");
    }
}
