//! 变更跟踪
//!
//! 宿主把观察到的 DOM 变更以 `MutationRecord` 的形式交给跟踪器。跟踪器把受影响的
//! 区域收集到待处理集合中，每个微任务周期最多请求一次改写。改写进行期间收到的
//! 所有通知都被忽略，改写自身产生的结构也不会进入待处理集合。

use std::cell::RefCell;
use std::rc::Rc;

use markup5ever_rcdom::{Handle, NodeData};

use crate::parsers::html::dom::{get_parent_node, is_inclusive_descendant};

use super::filters::is_inside_generated;

/// 一条 DOM 变更记录
#[derive(Debug, Clone)]
pub enum MutationRecord {
    /// 子节点插入或移除
    ChildList {
        target: Handle,
        added: Vec<Handle>,
        removed: Vec<Handle>,
    },
    /// 文本节点内容变化
    CharacterData { target: Handle },
    /// 属性变化（只用于报告改写引擎自己的写入）
    Attribute { target: Handle, name: String },
}

/// 改写引擎报告自身写入的接收端
pub trait MutationSink {
    fn record(&mut self, record: MutationRecord);
}

/// 共享的变更记录缓冲区
#[derive(Debug, Clone, Default)]
pub struct MutationLog {
    records: Rc<RefCell<Vec<MutationRecord>>>,
}

impl MutationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn drain(&self) -> Vec<MutationRecord> {
        std::mem::take(&mut *self.records.borrow_mut())
    }

    pub fn len(&self) -> usize {
        self.records.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.borrow().is_empty()
    }
}

impl MutationSink for MutationLog {
    fn record(&mut self, record: MutationRecord) {
        self.records.borrow_mut().push(record);
    }
}

/// 一次通知的处理结果
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Notification {
    /// 宿主需要安排一次微任务来执行改写
    pub schedule_pass: bool,
    /// 有节点被移除，状态表需要清理
    pub nodes_removed: bool,
}

/// 待处理区域集合与重入保护
#[derive(Debug, Default)]
pub struct MutationTracker {
    pending: Vec<Handle>,
    scheduled: bool,
    applying: bool,
}

impl MutationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// 接收一批变更记录
    pub fn notify(&mut self, records: Vec<MutationRecord>) -> Notification {
        let mut notification = Notification::default();
        if self.applying {
            return notification;
        }

        for record in records {
            match record {
                MutationRecord::ChildList { target, added, removed } => {
                    if !removed.is_empty() {
                        notification.nodes_removed = true;
                    }
                    for node in added {
                        let region = if matches!(node.data, NodeData::Text { .. }) {
                            target.clone()
                        } else {
                            node
                        };
                        self.add_region(region);
                    }
                }
                MutationRecord::CharacterData { target } => {
                    if let Some(parent) = get_parent_node(&target) {
                        self.add_region(parent);
                    }
                }
                MutationRecord::Attribute { .. } => {}
            }
        }

        if !self.pending.is_empty() && !self.scheduled {
            self.scheduled = true;
            notification.schedule_pass = true;
        }

        notification
    }

    fn add_region(&mut self, region: Handle) {
        if is_inside_generated(&region) {
            return;
        }
        if self
            .pending
            .iter()
            .any(|existing| is_inclusive_descendant(&region, existing))
        {
            return;
        }
        self.pending
            .retain(|existing| !is_inclusive_descendant(existing, &region));
        self.pending.push(region);
    }

    /// 开始一次改写：取出全部待处理区域并进入重入保护
    pub fn begin_pass(&mut self) -> Vec<Handle> {
        self.applying = true;
        std::mem::take(&mut self.pending)
    }

    /// 改写完全结束后解除保护
    pub fn end_pass(&mut self) {
        self.applying = false;
        self.scheduled = false;
    }

    pub fn is_applying(&self) -> bool {
        self.applying
    }

    pub fn is_scheduled(&self) -> bool {
        self.scheduled
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }
}
