//! HTML解析和处理模块
//!
//! - `dom`: 基础DOM读写与结构操作
//! - `metadata`: 文档元数据（编码、来源地址）
//! - `serializer`: 序列化功能

pub mod dom;
pub mod metadata;
pub mod serializer;

pub use dom::{
    ancestors, append_child, create_element, create_text, detach, get_node_attr, get_node_name,
    get_parent_node, get_text, html_to_dom, is_attached, is_html_element,
    is_inclusive_descendant, prepend_child, replace_children, replace_node, set_node_attr, set_text,
    text_content,
};
pub use metadata::{find_nodes, get_charset, get_document_url};
pub use serializer::{serialize_children, serialize_document};
