//! 页面会话
//!
//! 把改写引擎、变更跟踪器、设置快照和当前替换器组合在一起，对应页面内的
//! 内容组件。宿主负责计时器和微任务调度，会话只暴露对应的回调：
//!
//! - `start` 执行初始改写，宿主随后按 `RETRY_DELAYS_MS` 调用 `on_retry_timer`
//! - `on_mutations` 接收变更记录，返回是否需要安排微任务
//! - `run_microtask` 执行本周期唯一的一次增量改写

use markup5ever_rcdom::Handle;

use crate::mapping::Mapping;
use crate::network::cache::CacheRecord;
use crate::parsers::html::dom::is_attached;

use super::config::{DomainPolicy, PageContext, Settings};
use super::engine::{PassReport, RewriteEngine};
use super::error::RewriteError;
use super::notice::{clear_notice, show_notice, Notice};
use super::replacer::Replacer;
use super::tracker::{MutationLog, MutationRecord, MutationTracker};

/// 初始改写之后的重试延迟（毫秒），用于捕捉异步渲染的内容
pub const RETRY_DELAYS_MS: [u64; 3] = [500, 1500, 3000];

/// 一个文档上的改写会话
pub struct ContentSession {
    document: Handle,
    page: PageContext,
    policy: DomainPolicy,
    settings: Settings,
    replacer: Option<Replacer>,
    engine: RewriteEngine,
    tracker: MutationTracker,
    log: MutationLog,
    notice: Option<Notice>,
    initial_changes: usize,
}

impl ContentSession {
    pub fn new(document: Handle, page: PageContext, policy: DomainPolicy, settings: Settings) -> Self {
        let log = MutationLog::new();
        let engine = RewriteEngine::with_sink(Box::new(log.clone()));

        Self {
            document,
            page,
            policy,
            settings,
            replacer: None,
            engine,
            tracker: MutationTracker::new(),
            log,
            notice: None,
            initial_changes: 0,
        }
    }

    pub fn document(&self) -> &Handle {
        &self.document
    }

    pub fn settings(&self) -> Settings {
        self.settings
    }

    pub fn engine(&self) -> &RewriteEngine {
        &self.engine
    }

    pub fn tracker(&self) -> &MutationTracker {
        &self.tracker
    }

    pub fn notice(&self) -> Option<&Notice> {
        self.notice.as_ref()
    }

    /// 域名限制是否允许当前页面
    pub fn domain_allowed(&self) -> bool {
        !self.settings.domain_only || self.policy.allows_page(&self.page)
    }

    /// 会话当前是否会改写页面
    pub fn is_active(&self) -> bool {
        self.settings.enabled && self.replacer.is_some() && self.domain_allowed()
    }

    pub fn set_focus(&mut self, node: Option<&Handle>) {
        self.engine.set_focus(node);
    }

    /// 使用缓存记录启动会话
    ///
    /// 失败记录只产生提示，不改写页面。
    pub fn start(&mut self, record: &CacheRecord) -> Result<PassReport, RewriteError> {
        self.engine.hydrate(&self.document);

        let Some(mapping) = record.mapping() else {
            self.notice = Notice::from_record(record);
            tracing::warn!("映射不可用: {}", record.error().unwrap_or_default());
            return Ok(PassReport::default());
        };

        self.replacer = Replacer::compile(mapping)?;
        let report = self.full_pass();
        self.initial_changes = report.changed;

        if self.is_active() {
            self.notice = Notice::low_replacements(report.changed);
            if self.notice.is_some() {
                tracing::warn!("页面替换过少: {} 处", report.changed);
            }
        }

        tracing::info!(
            "初始改写完成: {} 处替换，{} 个键",
            report.changed,
            self.replacer.as_ref().map_or(0, Replacer::len)
        );
        Ok(report)
    }

    /// 宿主的重试计时器到期
    pub fn on_retry_timer(&mut self) -> PassReport {
        let report = self.full_pass();
        self.initial_changes += report.changed;
        if self.initial_changes >= super::notice::LOW_REPLACEMENT_THRESHOLD
            && matches!(self.notice, Some(Notice::Warning(_)))
        {
            self.notice = None;
        }
        report
    }

    /// 接收宿主观察到的变更，返回是否需要安排一次微任务
    pub fn on_mutations(&mut self, records: Vec<MutationRecord>) -> bool {
        let notification = self.tracker.notify(records);
        if notification.nodes_removed {
            self.engine.evict_detached();
        }
        notification.schedule_pass
    }

    /// 执行本周期的增量改写
    pub fn run_microtask(&mut self) -> PassReport {
        let regions = self.tracker.begin_pass();
        let mut report = PassReport::default();

        if self.is_active() {
            if let Some(replacer) = self.replacer.as_ref() {
                for region in regions.iter().filter(|region| is_attached(region)) {
                    report.merge(self.engine.run_pass(region, replacer, &self.settings));
                }
            }
        }

        self.release_guard();
        report
    }

    /// 整体替换设置快照
    ///
    /// 停用时还原页面；其他变化都从原文重新推导一遍。
    pub fn apply_settings(&mut self, settings: Settings) -> PassReport {
        let was_active = self.is_active();
        self.settings = settings;

        if !self.is_active() {
            if was_active {
                self.restore();
            }
            return PassReport::default();
        }

        self.full_pass()
    }

    /// 换用新的映射，所有单元从原文重新推导
    pub fn apply_mapping(&mut self, mapping: &Mapping) -> Result<PassReport, RewriteError> {
        self.replacer = Replacer::compile(mapping)?;
        if self.replacer.is_none() {
            self.restore();
            return Ok(PassReport::default());
        }
        Ok(self.full_pass())
    }

    /// 还原整个文档
    pub fn restore(&mut self) -> usize {
        self.tracker.begin_pass();
        let restored = self.engine.restore(&self.document);
        self.release_guard();
        restored
    }

    /// 把当前提示写入文档，没有提示时移除旧的提示条
    pub fn render_notice(&mut self) -> Option<Handle> {
        self.tracker.begin_pass();
        let banner = match &self.notice {
            Some(notice) => show_notice(&self.document, notice),
            None => {
                clear_notice(&self.document);
                None
            }
        };
        self.release_guard();
        banner
    }

    fn full_pass(&mut self) -> PassReport {
        if !self.is_active() {
            if self.settings.enabled && !self.domain_allowed() {
                tracing::debug!("页面不在域名白名单中，跳过改写");
            }
            return PassReport::default();
        }

        // 全量改写覆盖所有待处理区域
        self.tracker.begin_pass();
        let report = match self.replacer.as_ref() {
            Some(replacer) => self
                .engine
                .run_pass(&self.document, replacer, &self.settings),
            None => PassReport::default(),
        };
        self.release_guard();
        report
    }

    /// 把引擎自身的写入交给跟踪器（此时处于保护状态，全部忽略），然后解除保护
    fn release_guard(&mut self) {
        let own_writes = self.log.drain();
        self.tracker.notify(own_writes);
        self.tracker.end_pass();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::cache::{FailureInfo, MappingSnapshot};
    use crate::parsers::html::dom::{append_child, create_element, create_text, html_to_dom};
    use crate::parsers::html::metadata::find_nodes;
    use crate::parsers::html::serializer::serialize_children;
    use chrono::Utc;
    use markup5ever_rcdom::RcDom;

    fn record(pairs: &[(&str, &str)]) -> CacheRecord {
        let mapping: Mapping = pairs.iter().copied().collect();
        CacheRecord::Success(MappingSnapshot {
            entry_count: mapping.len(),
            mapping,
            fetched_at: Utc::now(),
            source: "test".to_string(),
            duration_ms: 0,
        })
    }

    fn open(html: &str, settings: Settings) -> (RcDom, ContentSession) {
        let dom = html_to_dom(html.as_bytes(), "utf-8").unwrap();
        let session = ContentSession::new(
            dom.document.clone(),
            PageContext::new("https://example.jp/page"),
            DomainPolicy::new(["example.jp"]),
            settings,
        );
        (dom, session)
    }

    fn body(dom: &RcDom) -> Handle {
        find_nodes(&dom.document, &["html", "body"]).remove(0)
    }

    #[test]
    fn test_start_rewrites_and_warns_on_few_replacements() {
        let (dom, mut session) = open("<p>猫</p>", Settings::default());
        let report = session.start(&record(&[("猫", "ねこ")])).unwrap();
        assert_eq!(report.changed, 1);
        assert!(matches!(session.notice(), Some(Notice::Warning(_))));
        assert!(serialize_children(&body(&dom)).unwrap().contains("<ruby>"));

        let banner = session.render_notice().unwrap();
        assert!(!session.tracker().is_scheduled());
        assert!(is_attached(&banner));
    }

    #[test]
    fn test_failure_record_only_notifies() {
        let (dom, mut session) = open("<p>猫</p>", Settings::default());
        let failure = CacheRecord::Failure(FailureInfo::new("mapping is empty"));
        let report = session.start(&failure).unwrap();
        assert_eq!(report, PassReport::default());
        assert!(matches!(session.notice(), Some(Notice::Failure(_))));
        assert_eq!(serialize_children(&body(&dom)).unwrap(), "<p>猫</p>");
    }

    #[test]
    fn test_domain_restriction() {
        let dom = html_to_dom("<p>猫</p>".as_bytes(), "utf-8").unwrap();
        let mut session = ContentSession::new(
            dom.document.clone(),
            PageContext::new("https://elsewhere.org/"),
            DomainPolicy::new(["example.jp"]),
            Settings::default(),
        );
        let report = session.start(&record(&[("猫", "ねこ")])).unwrap();
        assert_eq!(report.changed, 0);
        assert!(!session.is_active());

        let report = session.apply_settings(Settings {
            domain_only: false,
            ..Settings::default()
        });
        assert_eq!(report.changed, 1);
    }

    #[test]
    fn test_page_mutation_triggers_one_pass() {
        let (dom, mut session) = open("<p>猫</p><div id=\"feed\"></div>", Settings::default());
        session.start(&record(&[("猫", "ねこ"), ("犬", "いぬ")])).unwrap();
        let feed = find_nodes(&dom.document, &["html", "body", "div"]).remove(0);

        let first = create_element("p", &[]);
        append_child(&first, create_text("犬"));
        append_child(&feed, first.clone());
        let second = create_element("p", &[]);
        append_child(&second, create_text("猫"));
        append_child(&feed, second.clone());

        let scheduled = session.on_mutations(vec![MutationRecord::ChildList {
            target: feed.clone(),
            added: vec![first],
            removed: vec![],
        }]);
        let again = session.on_mutations(vec![MutationRecord::ChildList {
            target: feed.clone(),
            added: vec![second],
            removed: vec![],
        }]);
        assert!(scheduled);
        assert!(!again);

        let report = session.run_microtask();
        assert_eq!(report.changed, 2);
        assert!(!session.tracker().is_applying());
        assert!(!session.tracker().is_scheduled());
    }

    #[test]
    fn test_page_ruby_insertion_is_rewritten() {
        let (dom, mut session) = open(
            "<p><ruby>猫<rt>x</rt></ruby></p><div id=\"feed\"></div>",
            Settings::default(),
        );
        session.start(&record(&[("猫", "ねこ")])).unwrap();
        assert!(serialize_children(&body(&dom))
            .unwrap()
            .contains("<ruby>ねこ<rt>x</rt></ruby>"));
        let feed = find_nodes(&dom.document, &["html", "body", "div"]).remove(0);

        let ruby = create_element("ruby", &[]);
        append_child(&ruby, create_text("猫"));
        append_child(&feed, ruby.clone());
        assert!(session.on_mutations(vec![MutationRecord::ChildList {
            target: feed.clone(),
            added: vec![ruby],
            removed: vec![],
        }]));

        let report = session.run_microtask();
        assert_eq!(report.changed, 1);
        assert_eq!(serialize_children(&feed).unwrap(), "<ruby>ねこ</ruby>");
    }

    #[test]
    fn test_engine_output_does_not_reschedule() {
        let (dom, mut session) = open("<div id=\"feed\"></div>", Settings::default());
        session.start(&record(&[("猫", "ねこ")])).unwrap();
        let feed = find_nodes(&dom.document, &["html", "body", "div"]).remove(0);

        let para = create_element("p", &[]);
        append_child(&para, create_text("猫"));
        append_child(&feed, para.clone());
        assert!(session.on_mutations(vec![MutationRecord::ChildList {
            target: feed,
            added: vec![para.clone()],
            removed: vec![],
        }]));
        session.run_microtask();

        // 宿主观察到引擎插入的包装元素
        let wrapper = para.children.borrow()[0].clone();
        let scheduled = session.on_mutations(vec![MutationRecord::ChildList {
            target: para,
            added: vec![wrapper],
            removed: vec![],
        }]);
        assert!(!scheduled);
        assert_eq!(session.tracker().pending_len(), 0);
    }

    #[test]
    fn test_disable_restores_and_reenable_rewrites() {
        let (dom, mut session) = open("<p>猫</p>", Settings::default());
        session.start(&record(&[("猫", "ねこ")])).unwrap();

        session.apply_settings(Settings {
            enabled: false,
            ..Settings::default()
        });
        assert_eq!(serialize_children(&body(&dom)).unwrap(), "<p>猫</p>");

        let report = session.apply_settings(Settings::default());
        assert_eq!(report.changed, 1);
    }

    #[test]
    fn test_apply_mapping_rederives_from_original() {
        let (dom, mut session) = open("<p>猫</p>", Settings::default());
        session.start(&record(&[("猫", "ねこ")])).unwrap();

        let updated: Mapping = [("猫", "ネコ")].into_iter().collect();
        session.apply_mapping(&updated).unwrap();
        assert!(serialize_children(&body(&dom))
            .unwrap()
            .contains("<ruby>ネコ<rt>猫</rt></ruby>"));

        session.apply_mapping(&Mapping::new()).unwrap();
        assert_eq!(serialize_children(&body(&dom)).unwrap(), "<p>猫</p>");
    }

    #[test]
    fn test_retry_clears_warning_once_enough_replacements() {
        let (dom, mut session) = open("<p>猫</p>", Settings::default());
        session.start(&record(&[("猫", "ねこ")])).unwrap();
        assert!(session.notice().is_some());

        let late = body(&dom);
        for _ in 0..2 {
            let para = create_element("p", &[]);
            append_child(&para, create_text("猫"));
            append_child(&late, para);
        }
        let report = session.on_retry_timer();
        assert_eq!(report.changed, 2);
        assert!(session.notice().is_none());
    }
}
