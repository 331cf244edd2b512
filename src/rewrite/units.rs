//! 改写单元的状态表
//!
//! 以节点身份为键、弱引用持有节点。DOM 上的标记属性只是这份状态的序列化形式，
//! 用于在重新读取文档后恢复状态；状态本身以这张表为准。

use std::collections::HashMap;
use std::rc::{Rc, Weak};

use markup5ever_rcdom::{Handle, Node};

use crate::parsers::html::dom::is_attached;

/// 结构化包装元素上保存原文的属性
pub const MARKER_ATTR: &str = "data-rubymap-original";

/// 结构化包装元素的类名
pub const UNIT_CLASS: &str = "rubymap-unit";

/// 单元的呈现方式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitKind {
    /// 原地改写的文本节点
    Inline,
    /// 带注音结构的包装元素
    Ruby,
    /// 表单字段的值
    Field,
}

/// 单元状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitState {
    Untranslated,
    Translated {
        /// 改写前的原文，永远不是替换的输出
        original: String,
        /// 最近一次写入的呈现文本
        rendered: String,
        kind: UnitKind,
    },
}

impl UnitState {
    pub fn translated(original: impl Into<String>, rendered: impl Into<String>, kind: UnitKind) -> Self {
        UnitState::Translated {
            original: original.into(),
            rendered: rendered.into(),
            kind,
        }
    }

    pub fn original(&self) -> Option<&str> {
        match self {
            UnitState::Untranslated => None,
            UnitState::Translated { original, .. } => Some(original),
        }
    }
}

struct Entry {
    node: Weak<Node>,
    state: UnitState,
}

/// 节点身份到单元状态的映射
#[derive(Default)]
pub struct UnitTable {
    entries: HashMap<usize, Entry>,
}

impl UnitTable {
    pub fn new() -> Self {
        Self::default()
    }

    // 弱引用保证分配不被回收，地址在条目存在期间不会被复用
    fn key(node: &Handle) -> usize {
        Rc::as_ptr(node) as usize
    }

    /// 读取节点状态，未记录的节点为 `Untranslated`
    pub fn state(&self, node: &Handle) -> UnitState {
        self.entries
            .get(&Self::key(node))
            .filter(|entry| entry.node.upgrade().is_some())
            .map(|entry| entry.state.clone())
            .unwrap_or(UnitState::Untranslated)
    }

    pub fn contains(&self, node: &Handle) -> bool {
        self.entries.contains_key(&Self::key(node))
    }

    /// 写入状态，`Untranslated` 等同于移除
    pub fn set(&mut self, node: &Handle, state: UnitState) {
        if state == UnitState::Untranslated {
            self.remove(node);
            return;
        }
        self.entries.insert(
            Self::key(node),
            Entry {
                node: Rc::downgrade(node),
                state,
            },
        );
    }

    pub fn remove(&mut self, node: &Handle) -> Option<UnitState> {
        self.entries.remove(&Self::key(node)).map(|entry| entry.state)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 所有仍存活的节点及其状态
    pub fn live_units(&self) -> Vec<(Handle, UnitState)> {
        self.entries
            .values()
            .filter_map(|entry| entry.node.upgrade().map(|node| (node, entry.state.clone())))
            .collect()
    }

    /// 移除节点已释放或已脱离文档的条目，返回移除数量
    pub fn evict_detached(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| match entry.node.upgrade() {
            Some(node) => is_attached(&node),
            None => false,
        });
        let evicted = before - self.entries.len();
        if evicted > 0 {
            tracing::debug!("清理了 {} 个脱离文档的单元", evicted);
        }
        evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsers::html::dom::{create_text, detach, html_to_dom};

    #[test]
    fn test_untracked_node_is_untranslated() {
        let table = UnitTable::new();
        assert_eq!(table.state(&create_text("a")), UnitState::Untranslated);
    }

    #[test]
    fn test_set_and_remove() {
        let mut table = UnitTable::new();
        let node = create_text("x");
        table.set(&node, UnitState::translated("a", "x", UnitKind::Inline));
        assert_eq!(table.state(&node).original(), Some("a"));
        assert_eq!(table.len(), 1);

        table.set(&node, UnitState::Untranslated);
        assert!(table.is_empty());
    }

    #[test]
    fn test_evict_dropped_and_detached() {
        let dom = html_to_dom(b"<p>one</p><p>two</p>", "utf-8").unwrap();
        let html = dom.document.children.borrow()[0].clone();
        let body = html.children.borrow()[1].clone();
        let first = body.children.borrow()[0].clone();
        let second = body.children.borrow()[1].clone();

        let mut table = UnitTable::new();
        table.set(&first, UnitState::translated("one", "1", UnitKind::Inline));
        table.set(&second, UnitState::translated("two", "2", UnitKind::Inline));
        {
            let orphan = create_text("gone");
            table.set(&orphan, UnitState::translated("gone", "g", UnitKind::Inline));
        }

        detach(&second);
        assert_eq!(table.evict_detached(), 2);
        assert_eq!(table.len(), 1);
        assert!(table.contains(&first));
    }
}
