//! DOM 改写引擎
//!
//! 每个文本单元只改写一次。已改写的单元总是从保存的原文重新推导，
//! 从不把替换结果再次送入替换器，因此重复执行不会叠加替换。
//!
//! 三种单元：
//!
//! - 能容纳包装元素的文本被替换为
//!   `<span data-rubymap-original="原文" class="rubymap-unit">` 包装，
//!   其中每个有变化的片段是一组 `<ruby>主文本<rt>注音</rt></ruby>`
//! - 不能容纳包装元素的文本（`title`、`option` 等）原地改写
//! - 文本类表单字段改写其值，获得焦点时跳过

use std::rc::{Rc, Weak};

use markup5ever_rcdom::{Handle, Node, NodeData};

use crate::parsers::html::dom::{
    append_child, create_element, create_text, get_node_attr, get_parent_node, get_text,
    is_inclusive_descendant, replace_children, replace_node, set_node_attr, set_text,
    text_content,
};
use crate::parsers::html::serializer::serialize_children;

use super::config::Settings;
use super::error::RewriteError;
use super::filters::{
    can_host_wrapper, enclosing_wrapper, field_kind, has_skipped_ancestor, is_blank,
    is_in_focused_editable, is_skipped_element, is_wrapper, FieldKind,
};
use super::replacer::Replacer;
use super::tracker::{MutationRecord, MutationSink};
use super::units::{UnitKind, UnitState, UnitTable, MARKER_ATTR, UNIT_CLASS};

/// 每次改写保留的样例数量
const MAX_SAMPLES: usize = 3;

/// 样例文本的最大字符数
const SAMPLE_CHARS: usize = 80;

/// 改写前后的文本样例
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sample {
    pub before: String,
    pub after: String,
}

/// 一次改写的统计
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    /// 呈现发生变化的单元数
    pub changed: usize,
    pub samples: Vec<Sample>,
}

impl PassReport {
    fn record(&mut self, before: &str, after: &str) {
        self.changed += 1;
        if self.samples.len() < MAX_SAMPLES {
            self.samples.push(Sample {
                before: truncate(before),
                after: truncate(after),
            });
        }
    }

    /// 合并另一次改写的统计
    pub fn merge(&mut self, other: PassReport) {
        self.changed += other.changed;
        let room = MAX_SAMPLES.saturating_sub(self.samples.len());
        self.samples.extend(other.samples.into_iter().take(room));
    }
}

fn truncate(text: &str) -> String {
    text.chars().take(SAMPLE_CHARS).collect()
}

enum Target {
    Wrapper(Handle),
    Text(Handle),
    Field(Handle, FieldKind),
}

type UnitResult = Result<Option<(String, String)>, RewriteError>;

/// 改写引擎，持有单元状态表
#[derive(Default)]
pub struct RewriteEngine {
    units: UnitTable,
    focused: Option<Weak<Node>>,
    sink: Option<Box<dyn MutationSink>>,
}

impl RewriteEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// 创建会报告自身 DOM 写入的引擎
    pub fn with_sink(sink: Box<dyn MutationSink>) -> Self {
        Self {
            sink: Some(sink),
            ..Self::default()
        }
    }

    pub fn set_sink(&mut self, sink: Option<Box<dyn MutationSink>>) {
        self.sink = sink;
    }

    /// 设置当前获得焦点的节点
    pub fn set_focus(&mut self, node: Option<&Handle>) {
        self.focused = node.map(Rc::downgrade);
    }

    fn focused(&self) -> Option<Handle> {
        self.focused.as_ref().and_then(Weak::upgrade)
    }

    pub fn units(&self) -> &UnitTable {
        &self.units
    }

    /// 清理已脱离文档的单元
    pub fn evict_detached(&mut self) -> usize {
        self.units.evict_detached()
    }

    fn emit(&mut self, record: MutationRecord) {
        if let Some(sink) = self.sink.as_mut() {
            sink.record(record);
        }
    }

    /// 对 `root` 子树执行一次改写（包括表单字段）
    pub fn run_pass(&mut self, root: &Handle, replacer: &Replacer, settings: &Settings) -> PassReport {
        let mut report = PassReport::default();
        let focused = self.focused();
        let swap = settings.ruby_swap;

        for target in collect_targets(root) {
            let result = match &target {
                Target::Wrapper(wrapper) => {
                    self.refresh_wrapper(wrapper, replacer, swap, focused.as_ref())
                }
                Target::Text(text) => self.rewrite_text(text, replacer, swap, focused.as_ref()),
                Target::Field(field, kind) => {
                    self.rewrite_field(field, *kind, replacer, focused.as_ref())
                }
            };

            match result {
                Ok(Some((before, after))) => report.record(&before, &after),
                Ok(None) => {}
                Err(e) => tracing::warn!("跳过无法改写的节点: {}", e),
            }
        }

        tracing::debug!("改写完成: {} 个单元发生变化", report.changed);
        report
    }

    fn rewrite_text(
        &mut self,
        text: &Handle,
        replacer: &Replacer,
        swap: bool,
        focused: Option<&Handle>,
    ) -> UnitResult {
        let Some(current) = get_text(text) else {
            return Ok(None);
        };
        if is_blank(&current) || is_in_focused_editable(text, focused) {
            return Ok(None);
        }
        let Some(parent) = get_parent_node(text) else {
            return Ok(None);
        };

        let original = self.live_original(text, &current);
        let replaced = replacer.apply(&original).into_owned();

        if can_host_wrapper(&parent) {
            if let Some(children) = ruby_children(&original, replacer, swap) {
                let wrapper = build_wrapper(&original, children);
                replace_node(text, vec![wrapper.clone()])
                    .ok_or_else(|| RewriteError::Node("文本节点不在父节点中".to_string()))?;

                self.units.remove(text);
                self.units.set(
                    &wrapper,
                    UnitState::translated(original.as_str(), text_content(&wrapper), UnitKind::Ruby),
                );
                let rendered = text_content(&wrapper);
                self.emit(MutationRecord::ChildList {
                    target: parent,
                    added: vec![wrapper],
                    removed: vec![text.clone()],
                });
                return Ok(Some((current, rendered)));
            }
        }

        if replaced == current {
            return Ok(None);
        }

        set_text(text, &replaced);
        if replaced == original {
            self.units.remove(text);
        } else {
            self.units.set(
                text,
                UnitState::translated(original.as_str(), replaced.as_str(), UnitKind::Inline),
            );
        }
        self.emit(MutationRecord::CharacterData {
            target: text.clone(),
        });

        Ok(Some((current, replaced)))
    }

    fn refresh_wrapper(
        &mut self,
        wrapper: &Handle,
        replacer: &Replacer,
        swap: bool,
        focused: Option<&Handle>,
    ) -> UnitResult {
        if is_in_focused_editable(wrapper, focused) {
            return Ok(None);
        }
        let Some(parent) = get_parent_node(wrapper) else {
            return Ok(None);
        };
        let Some(original) = self.wrapper_original(wrapper) else {
            return Ok(None);
        };
        let before = text_content(wrapper);

        let Some(children) = ruby_children(&original, replacer, swap) else {
            // 没有片段需要注音，还原为文本后按普通文本处理
            let plain = create_text(&original);
            replace_node(wrapper, vec![plain.clone()])
                .ok_or_else(|| RewriteError::Node("包装元素不在父节点中".to_string()))?;
            self.units.remove(wrapper);
            self.emit(MutationRecord::ChildList {
                target: parent,
                added: vec![plain.clone()],
                removed: vec![wrapper.clone()],
            });

            let after = self
                .rewrite_text(&plain, replacer, swap, focused)?
                .map(|(_, after)| after)
                .unwrap_or_else(|| original.clone());
            return Ok(Some((before, after)));
        };

        if get_node_attr(wrapper, MARKER_ATTR).as_deref() != Some(original.as_str()) {
            set_node_attr(wrapper, MARKER_ATTR, Some(&original));
        }

        let fresh = build_wrapper(&original, children);
        let unchanged = serialize_children(wrapper)
            .and_then(|current| serialize_children(&fresh).map(|next| current == next))
            .map_err(|e| RewriteError::Node(format!("无法序列化包装元素: {e}")))?;

        if unchanged {
            self.units.set(
                wrapper,
                UnitState::translated(original.as_str(), before, UnitKind::Ruby),
            );
            return Ok(None);
        }

        let added: Vec<Handle> = fresh.children.borrow().clone();
        let removed = replace_children(wrapper, added.clone());
        self.units.set(
            wrapper,
            UnitState::translated(original.as_str(), text_content(wrapper), UnitKind::Ruby),
        );
        self.emit(MutationRecord::ChildList {
            target: wrapper.clone(),
            added,
            removed,
        });

        Ok(Some((before, text_content(wrapper))))
    }

    fn rewrite_field(
        &mut self,
        field: &Handle,
        kind: FieldKind,
        replacer: &Replacer,
        focused: Option<&Handle>,
    ) -> UnitResult {
        if is_in_focused_editable(field, focused) {
            return Ok(None);
        }

        let current = read_field(field, kind);
        if is_blank(&current) {
            return Ok(None);
        }

        let original = self.live_original(field, &current);
        let replaced = replacer.apply(&original).into_owned();
        if replaced == current {
            return Ok(None);
        }

        self.write_field(field, kind, &replaced);
        if replaced == original {
            self.units.remove(field);
        } else {
            self.units.set(
                field,
                UnitState::translated(original.as_str(), replaced.as_str(), UnitKind::Field),
            );
        }

        Ok(Some((current, replaced)))
    }

    fn write_field(&mut self, field: &Handle, kind: FieldKind, value: &str) {
        match kind {
            FieldKind::ValueAttr => {
                set_node_attr(field, "value", Some(value));
                self.emit(MutationRecord::Attribute {
                    target: field.clone(),
                    name: "value".to_string(),
                });
            }
            FieldKind::TextContent => {
                let text = create_text(value);
                let removed = replace_children(field, vec![text.clone()]);
                self.emit(MutationRecord::ChildList {
                    target: field.clone(),
                    added: vec![text],
                    removed,
                });
            }
        }
    }

    /// 原地单元和字段的原文
    ///
    /// 当前内容与上次写入的不同说明页面自己改了它，此时当前内容就是新的原文。
    fn live_original(&self, node: &Handle, current: &str) -> String {
        match self.units.state(node) {
            UnitState::Translated {
                original, rendered, ..
            } if rendered == current => original,
            _ => current.to_string(),
        }
    }

    fn wrapper_original(&self, wrapper: &Handle) -> Option<String> {
        match self.units.state(wrapper) {
            UnitState::Translated { original, .. } => Some(original),
            UnitState::Untranslated => get_node_attr(wrapper, MARKER_ATTR),
        }
    }

    /// 从标记属性恢复子树中包装元素的状态，返回恢复的数量
    pub fn hydrate(&mut self, root: &Handle) -> usize {
        let mut hydrated = 0;
        for wrapper in collect_wrappers(root) {
            if self.units.contains(&wrapper) {
                continue;
            }
            if let Some(original) = get_node_attr(&wrapper, MARKER_ATTR) {
                let rendered = text_content(&wrapper);
                self.units
                    .set(&wrapper, UnitState::translated(original, rendered, UnitKind::Ruby));
                hydrated += 1;
            }
        }
        if hydrated > 0 {
            tracing::debug!("从文档恢复了 {} 个包装元素的状态", hydrated);
        }
        hydrated
    }

    /// 把子树中的所有单元还原为原文，返回还原的数量
    pub fn restore(&mut self, root: &Handle) -> usize {
        let mut restored = 0;

        for wrapper in collect_wrappers(root) {
            let original = self.wrapper_original(&wrapper);
            self.units.remove(&wrapper);
            let Some(original) = original else {
                continue;
            };

            let plain = create_text(&original);
            if let Some(parent) = replace_node(&wrapper, vec![plain.clone()]) {
                self.emit(MutationRecord::ChildList {
                    target: parent,
                    added: vec![plain],
                    removed: vec![wrapper],
                });
                restored += 1;
            }
        }

        for (node, state) in self.units.live_units() {
            if !is_inclusive_descendant(&node, root) {
                continue;
            }
            self.units.remove(&node);

            let UnitState::Translated {
                original,
                rendered,
                kind,
            } = state
            else {
                continue;
            };

            match kind {
                UnitKind::Inline => {
                    if get_text(&node).as_deref() == Some(rendered.as_str()) {
                        set_text(&node, &original);
                        self.emit(MutationRecord::CharacterData { target: node });
                        restored += 1;
                    }
                }
                UnitKind::Field => {
                    if let Some(field) = field_kind(&node) {
                        if read_field(&node, field) == rendered {
                            self.write_field(&node, field, &original);
                            restored += 1;
                        }
                    }
                }
                UnitKind::Ruby => {}
            }
        }

        tracing::debug!("还原了 {} 个单元", restored);
        restored
    }
}

fn read_field(field: &Handle, kind: FieldKind) -> String {
    match kind {
        FieldKind::ValueAttr => get_node_attr(field, "value").unwrap_or_default(),
        FieldKind::TextContent => text_content(field),
    }
}

fn collect_targets(root: &Handle) -> Vec<Target> {
    let mut targets = Vec::new();
    if has_skipped_ancestor(root) {
        return targets;
    }
    if let Some(wrapper) = enclosing_wrapper(root) {
        targets.push(Target::Wrapper(wrapper));
        return targets;
    }
    walk_targets(root, &mut targets);
    targets
}

fn walk_targets(node: &Handle, targets: &mut Vec<Target>) {
    match node.data {
        NodeData::Text { .. } => targets.push(Target::Text(node.clone())),
        NodeData::Element { .. } => {
            if is_wrapper(node) {
                targets.push(Target::Wrapper(node.clone()));
            } else if let Some(kind) = field_kind(node) {
                targets.push(Target::Field(node.clone(), kind));
            } else if !is_skipped_element(node) {
                for child in node.children.borrow().iter() {
                    walk_targets(child, targets);
                }
            }
        }
        NodeData::Document => {
            for child in node.children.borrow().iter() {
                walk_targets(child, targets);
            }
        }
        _ => {}
    }
}

fn collect_wrappers(root: &Handle) -> Vec<Handle> {
    fn walk(node: &Handle, found: &mut Vec<Handle>) {
        if is_wrapper(node) {
            found.push(node.clone());
            return;
        }
        for child in node.children.borrow().iter() {
            walk(child, found);
        }
    }

    let mut found = Vec::new();
    walk(root, &mut found);
    found
}

/// 按空白拆分文本，空白段原样保留
fn split_segments(text: &str) -> Vec<&str> {
    let mut segments = Vec::new();
    let mut start = 0;
    let mut in_space: Option<bool> = None;

    for (i, c) in text.char_indices() {
        let space = c.is_whitespace();
        if in_space.is_some_and(|prev| prev != space) {
            segments.push(&text[start..i]);
            start = i;
        }
        in_space = Some(space);
    }
    if start < text.len() {
        segments.push(&text[start..]);
    }

    segments
}

/// 构建包装元素的子节点，没有任何片段发生变化时返回 `None`
fn ruby_children(original: &str, replacer: &Replacer, swap: bool) -> Option<Vec<Handle>> {
    let mut nodes = Vec::new();
    let mut plain = String::new();
    let mut paired = false;

    for segment in split_segments(original) {
        let mapped = replacer.apply(segment);
        if segment.trim().is_empty() || mapped == segment {
            plain.push_str(segment);
            continue;
        }

        if !plain.is_empty() {
            nodes.push(create_text(&plain));
            plain.clear();
        }

        let (base, annotation) = if swap {
            (segment, mapped.as_ref())
        } else {
            (mapped.as_ref(), segment)
        };
        nodes.push(ruby_pair(base, annotation));
        paired = true;
    }

    if !plain.is_empty() {
        nodes.push(create_text(&plain));
    }

    paired.then_some(nodes)
}

fn ruby_pair(base: &str, annotation: &str) -> Handle {
    let ruby = create_element("ruby", &[]);
    append_child(&ruby, create_text(base));
    let rt = create_element("rt", &[]);
    append_child(&rt, create_text(annotation));
    append_child(&ruby, rt);
    ruby
}

fn build_wrapper(original: &str, children: Vec<Handle>) -> Handle {
    let wrapper = create_element("span", &[(MARKER_ATTR, original), ("class", UNIT_CLASS)]);
    for child in children {
        append_child(&wrapper, child);
    }
    wrapper
}
