use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt;

mod dom;
mod enhance;
mod files;
mod html;
mod numeric;
mod selector;
mod slug;

pub use files::PendingRead;
pub use slug::slugify;

use dom::{Dom, NodeId};
use enhance::{Behavior, FormSession};
use files::{FileSelection, PendingFileRead};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    HtmlParse(String),
    Runtime(String),
    SelectorNotFound(String),
    UnsupportedSelector(String),
    TypeMismatch {
        selector: String,
        expected: String,
        actual: String,
    },
    AssertionFailed {
        selector: String,
        expected: String,
        actual: String,
        dom_snippet: String,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::HtmlParse(msg) => write!(f, "html parse error: {msg}"),
            Self::Runtime(msg) => write!(f, "runtime error: {msg}"),
            Self::SelectorNotFound(selector) => write!(f, "selector not found: {selector}"),
            Self::UnsupportedSelector(selector) => write!(f, "unsupported selector: {selector}"),
            Self::TypeMismatch {
                selector,
                expected,
                actual,
            } => write!(
                f,
                "type mismatch for {selector}: expected {expected}, actual {actual}"
            ),
            Self::AssertionFailed {
                selector,
                expected,
                actual,
                dom_snippet,
            } => write!(
                f,
                "assertion failed for {selector}: expected {expected}, actual {actual}, snippet {dom_snippet}"
            ),
        }
    }
}

impl StdError for Error {}

#[derive(Debug, Default)]
struct ListenerStore {
    map: HashMap<NodeId, HashMap<String, Vec<Behavior>>>,
}

impl ListenerStore {
    fn add(&mut self, node_id: NodeId, event: &str, behavior: Behavior) {
        self.map
            .entry(node_id)
            .or_default()
            .entry(event.to_string())
            .or_default()
            .push(behavior);
    }

    fn get(&self, node_id: NodeId, event: &str) -> Vec<Behavior> {
        self.map
            .get(&node_id)
            .and_then(|events| events.get(event))
            .cloned()
            .unwrap_or_default()
    }
}

/// Drives a product-edit page deterministically. Enhancement behaviors
/// are wired once at construction and exercised through the user-action
/// methods; the pending-read queue stands in for the page's only
/// asynchronous operation.
pub struct Harness {
    dom: Dom,
    listeners: ListenerStore,
    session: FormSession,
    read_queue: Vec<PendingFileRead>,
    active_element: Option<NodeId>,
    next_read_id: i64,
    trace: bool,
    trace_events: bool,
    trace_reads: bool,
    trace_logs: Vec<String>,
    trace_log_limit: usize,
    trace_to_stderr: bool,
}

impl Harness {
    const DISPATCH_STACK_RED_ZONE: usize = 64 * 1024;
    const DISPATCH_STACK_SIZE: usize = 4 * 1024 * 1024;

    pub fn from_html(html: &str) -> Result<Self> {
        let dom = html::parse_html(html)?;
        let mut harness = Self {
            dom,
            listeners: ListenerStore::default(),
            session: FormSession::default(),
            read_queue: Vec::new(),
            active_element: None,
            next_read_id: 1,
            trace: false,
            trace_events: true,
            trace_reads: true,
            trace_logs: Vec::new(),
            trace_log_limit: 10_000,
            trace_to_stderr: true,
        };
        harness.install_enhancements()?;
        Ok(harness)
    }

    pub fn enable_trace(&mut self, enabled: bool) {
        self.trace = enabled;
    }

    pub fn take_trace_logs(&mut self) -> Vec<String> {
        std::mem::take(&mut self.trace_logs)
    }

    pub fn set_trace_stderr(&mut self, enabled: bool) {
        self.trace_to_stderr = enabled;
    }

    pub fn set_trace_events(&mut self, enabled: bool) {
        self.trace_events = enabled;
    }

    pub fn set_trace_reads(&mut self, enabled: bool) {
        self.trace_reads = enabled;
    }

    pub fn set_trace_log_limit(&mut self, max_entries: usize) -> Result<()> {
        if max_entries == 0 {
            return Err(Error::Runtime(
                "set_trace_log_limit requires at least 1 entry".into(),
            ));
        }
        self.trace_log_limit = max_entries;
        while self.trace_logs.len() > self.trace_log_limit {
            self.trace_logs.remove(0);
        }
        Ok(())
    }

    /// Replaces the target's value and fires `input`, the way typing
    /// does. Disabled and readonly controls swallow the keystrokes.
    pub fn type_text(&mut self, selector: &str, text: &str) -> Result<()> {
        let target = self.select_one(selector)?;
        if self.dom.disabled(target) || self.dom.readonly(target) {
            return Ok(());
        }

        let tag = self
            .dom
            .tag_name(target)
            .ok_or_else(|| Error::TypeMismatch {
                selector: selector.to_string(),
                expected: "input or textarea".into(),
                actual: "non-element".into(),
            })?
            .to_ascii_lowercase();
        if tag != "input" && tag != "textarea" {
            return Err(Error::TypeMismatch {
                selector: selector.to_string(),
                expected: "input or textarea".into(),
                actual: tag,
            });
        }

        self.dom.set_value(target, text)?;
        self.dispatch_event(target, "input")
    }

    pub fn focus(&mut self, selector: &str) -> Result<()> {
        let target = self.select_one(selector)?;
        if self.dom.disabled(target) {
            return Ok(());
        }
        if self.active_element == Some(target) {
            return Ok(());
        }
        if let Some(current) = self.active_element {
            self.dispatch_event(current, "blur")?;
        }
        self.active_element = Some(target);
        self.dispatch_event(target, "focus")
    }

    pub fn blur(&mut self, selector: &str) -> Result<()> {
        let target = self.select_one(selector)?;
        if self.active_element != Some(target) {
            return Ok(());
        }
        self.dispatch_event(target, "blur")?;
        self.active_element = None;
        Ok(())
    }

    pub fn dispatch(&mut self, selector: &str, event: &str) -> Result<()> {
        let target = self.select_one(selector)?;
        self.dispatch_event(target, event)
    }

    /// Replaces the file input's selection with a single file and fires
    /// `change`, which queues an asynchronous preview read.
    pub fn select_file(
        &mut self,
        selector: &str,
        name: &str,
        media_type: &str,
        bytes: &[u8],
    ) -> Result<()> {
        let target = self.file_input(selector)?;
        if self.dom.disabled(target) {
            return Ok(());
        }
        self.dom.set_files(
            target,
            vec![FileSelection {
                name: name.to_string(),
                media_type: media_type.to_string(),
                bytes: bytes.to_vec(),
            }],
        )?;
        self.dispatch_event(target, "change")
    }

    pub fn clear_file_selection(&mut self, selector: &str) -> Result<()> {
        let target = self.file_input(selector)?;
        if self.dom.disabled(target) {
            return Ok(());
        }
        self.dom.set_files(target, Vec::new())?;
        self.dispatch_event(target, "change")
    }

    /// Queued preview reads, oldest first. Reads stay queued until the
    /// caller completes them; completion order is the caller's choice.
    pub fn pending_file_reads(&self) -> Vec<PendingRead> {
        let mut reads: Vec<PendingRead> = self
            .read_queue
            .iter()
            .map(|read| PendingRead {
                id: read.id,
                token: read.token,
                file_name: read.file.name.clone(),
            })
            .collect();
        reads.sort_by_key(|read| read.id);
        reads
    }

    pub fn complete_file_read(&mut self, read_id: i64) -> Result<bool> {
        let pos = self.read_queue.iter().position(|read| read.id == read_id);
        let Some(pos) = pos else {
            self.trace_read_line(format!("[read] complete id={read_id} not pending"));
            return Ok(false);
        };
        let read = self.read_queue.remove(pos);
        self.apply_file_read(read)?;
        Ok(true)
    }

    pub fn complete_next_file_read(&mut self) -> Result<bool> {
        let Some(pos) = self
            .read_queue
            .iter()
            .enumerate()
            .min_by_key(|(_, read)| read.id)
            .map(|(idx, _)| idx)
        else {
            return Ok(false);
        };
        let read = self.read_queue.remove(pos);
        self.apply_file_read(read)?;
        Ok(true)
    }

    pub fn flush(&mut self) -> Result<usize> {
        let mut completed = 0usize;
        while self.complete_next_file_read()? {
            completed += 1;
        }
        self.trace_read_line(format!("[read] flush completed={completed}"));
        Ok(completed)
    }

    /// Replaces the target's children with freshly parsed markup.
    /// Enhancement wiring is not re-run: fields injected this way stay
    /// inert, matching a page whose script ran once at load.
    pub fn set_inner_html(&mut self, selector: &str, html: &str) -> Result<()> {
        let target = self.select_one(selector)?;
        self.dom.set_inner_html(target, html)
    }

    pub fn value(&self, selector: &str) -> Result<String> {
        let target = self.select_one(selector)?;
        self.dom.value(target)
    }

    pub fn attr(&self, selector: &str, name: &str) -> Result<Option<String>> {
        let target = self.select_one(selector)?;
        Ok(self.dom.attr(target, name))
    }

    pub fn assert_text(&self, selector: &str, expected: &str) -> Result<()> {
        let target = self.select_one(selector)?;
        let actual = self.dom.text_content(target);
        if actual != expected {
            return Err(Error::AssertionFailed {
                selector: selector.to_string(),
                expected: expected.to_string(),
                actual,
                dom_snippet: self.node_snippet(target),
            });
        }
        Ok(())
    }

    pub fn assert_value(&self, selector: &str, expected: &str) -> Result<()> {
        let target = self.select_one(selector)?;
        let actual = self.dom.value(target)?;
        if actual != expected {
            return Err(Error::AssertionFailed {
                selector: selector.to_string(),
                expected: expected.to_string(),
                actual,
                dom_snippet: self.node_snippet(target),
            });
        }
        Ok(())
    }

    pub fn assert_class(&self, selector: &str, class_name: &str, expected: bool) -> Result<()> {
        let target = self.select_one(selector)?;
        let actual = self.dom.class_contains(target, class_name)?;
        if actual != expected {
            return Err(Error::AssertionFailed {
                selector: selector.to_string(),
                expected: format!("class {class_name:?} present: {expected}"),
                actual: format!("class {class_name:?} present: {actual}"),
                dom_snippet: self.node_snippet(target),
            });
        }
        Ok(())
    }

    pub fn assert_attr(&self, selector: &str, name: &str, expected: &str) -> Result<()> {
        let target = self.select_one(selector)?;
        let actual = self.dom.attr(target, name);
        if actual.as_deref() != Some(expected) {
            return Err(Error::AssertionFailed {
                selector: selector.to_string(),
                expected: format!("{name}={expected:?}"),
                actual: actual
                    .map(|value| format!("{name}={value:?}"))
                    .unwrap_or_else(|| format!("{name} missing")),
                dom_snippet: self.node_snippet(target),
            });
        }
        Ok(())
    }

    pub fn assert_exists(&self, selector: &str) -> Result<()> {
        let _ = self.select_one(selector)?;
        Ok(())
    }

    pub fn dump_dom(&self, selector: &str) -> Result<String> {
        let target = self.select_one(selector)?;
        Ok(self.dom.dump_node(target))
    }

    fn select_one(&self, selector: &str) -> Result<NodeId> {
        self.dom
            .query_selector(selector)?
            .ok_or_else(|| Error::SelectorNotFound(selector.to_string()))
    }

    fn file_input(&self, selector: &str) -> Result<NodeId> {
        let target = self.select_one(selector)?;
        let tag = self
            .dom
            .tag_name(target)
            .unwrap_or_default()
            .to_ascii_lowercase();
        let kind = self
            .dom
            .attr(target, "type")
            .unwrap_or_else(|| "text".into())
            .to_ascii_lowercase();
        if tag != "input" || kind != "file" {
            let actual = if tag == "input" {
                format!("input[type={kind}]")
            } else {
                tag
            };
            return Err(Error::TypeMismatch {
                selector: selector.to_string(),
                expected: "input[type=file]".into(),
                actual,
            });
        }
        Ok(target)
    }

    fn node_snippet(&self, node_id: NodeId) -> String {
        truncate_chars(&self.dom.dump_node(node_id), 200)
    }

    // Derived slug writes re-enter dispatch from inside a listener;
    // nested chains run with extra stack headroom.
    fn dispatch_event(&mut self, target: NodeId, event_type: &str) -> Result<()> {
        stacker::maybe_grow(Self::DISPATCH_STACK_RED_ZONE, Self::DISPATCH_STACK_SIZE, || {
            self.dispatch_event_inner(target, event_type)
        })
    }

    fn dispatch_event_inner(&mut self, target: NodeId, event_type: &str) -> Result<()> {
        let mut cursor = Some(target);
        while let Some(node) = cursor {
            for behavior in self.listeners.get(node, event_type) {
                if self.trace {
                    let target_label = self.trace_node_label(target);
                    let current_label = self.trace_node_label(node);
                    self.trace_event_line(format!(
                        "[event] {event_type} target={target_label} current={current_label} behavior={behavior:?}"
                    ));
                }
                self.run_behavior(behavior, node)?;
            }
            cursor = self.dom.parent(node);
        }
        Ok(())
    }

    pub(crate) fn trace_event_line(&mut self, line: String) {
        if self.trace && self.trace_events {
            self.trace_line(line);
        }
    }

    pub(crate) fn trace_read_line(&mut self, line: String) {
        if self.trace && self.trace_reads {
            self.trace_line(line);
        }
    }

    fn trace_line(&mut self, line: String) {
        if self.trace {
            if self.trace_to_stderr {
                eprintln!("{line}");
            }
            if self.trace_logs.len() >= self.trace_log_limit {
                self.trace_logs.remove(0);
            }
            self.trace_logs.push(line);
        }
    }

    pub(crate) fn trace_node_label(&self, node: NodeId) -> String {
        if let Some(id) = self.dom.attr(node, "id") {
            if !id.is_empty() {
                return format!("#{id}");
            }
        }
        self.dom
            .tag_name(node)
            .map(ToOwned::to_owned)
            .unwrap_or_else(|| format!("node-{}", node.0))
    }
}

fn truncate_chars(src: &str, max_chars: usize) -> String {
    let mut out = String::new();
    for (taken, ch) in src.chars().enumerate() {
        if taken >= max_chars {
            out.push('…');
            return out;
        }
        out.push(ch);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADMIN_FORM_HTML: &str = r#"
        <form id="product_form">
          <div class="field-name"><input id="id_name" value="Gift Box"></div>
          <div class="field-slug"><input id="id_slug"></div>
          <div class="field-price"><input id="id_price" value="12.5"></div>
          <div class="field-stock"><input id="id_stock" value="5"></div>
          <div class="field-image"><input id="id_image" type="file"></div>
          <div class="field-image_preview"><img id="id_preview" src="/media/placeholder.png"></div>
        </form>
        "#;

    #[test]
    fn stock_warning_is_evaluated_at_attach_time() -> Result<()> {
        let harness = Harness::from_html(ADMIN_FORM_HTML)?;
        harness.assert_class("#id_stock", "low-stock", true)?;
        Ok(())
    }

    #[test]
    fn stock_warning_follows_edits() -> Result<()> {
        let mut harness = Harness::from_html(ADMIN_FORM_HTML)?;

        harness.type_text("#id_stock", "12")?;
        harness.assert_class("#id_stock", "low-stock", false)?;

        harness.type_text("#id_stock", "3")?;
        harness.assert_class("#id_stock", "low-stock", true)?;

        harness.type_text("#id_stock", "plenty")?;
        harness.assert_class("#id_stock", "low-stock", false)?;

        harness.type_text("#id_stock", "9 crates")?;
        harness.assert_class("#id_stock", "low-stock", true)?;
        Ok(())
    }

    #[test]
    fn price_blur_formats_parseable_values() -> Result<()> {
        let mut harness = Harness::from_html(ADMIN_FORM_HTML)?;
        harness.focus("#id_price")?;
        harness.type_text("#id_price", "19.999")?;
        harness.blur("#id_price")?;
        harness.assert_value("#id_price", "20.00")?;
        Ok(())
    }

    #[test]
    fn price_blur_leaves_unparseable_values_untouched() -> Result<()> {
        let mut harness = Harness::from_html(ADMIN_FORM_HTML)?;
        for raw in ["gratis", "", "Infinity"] {
            harness.focus("#id_price")?;
            harness.type_text("#id_price", raw)?;
            harness.blur("#id_price")?;
            harness.assert_value("#id_price", raw)?;
        }
        Ok(())
    }

    #[test]
    fn blur_without_focus_is_inert() -> Result<()> {
        let mut harness = Harness::from_html(ADMIN_FORM_HTML)?;
        harness.type_text("#id_price", "19.999")?;
        harness.blur("#id_price")?;
        harness.assert_value("#id_price", "19.999")?;
        Ok(())
    }

    #[test]
    fn slug_follows_name_until_manual_edit() -> Result<()> {
        let mut harness = Harness::from_html(ADMIN_FORM_HTML)?;

        harness.type_text("#id_name", "Holiday Gift")?;
        harness.assert_value("#id_slug", "holiday-gift")?;

        harness.type_text("#id_slug", "custom-slug")?;
        harness.type_text("#id_name", "Renamed Box")?;
        harness.assert_value("#id_slug", "custom-slug")?;
        Ok(())
    }

    #[test]
    fn derived_slug_updates_keep_following_the_name() -> Result<()> {
        let mut harness = Harness::from_html(ADMIN_FORM_HTML)?;

        harness.type_text("#id_name", "Gift Basket")?;
        harness.assert_value("#id_slug", "gift-basket")?;

        harness.type_text("#id_name", "Gift Basket Deluxe")?;
        harness.assert_value("#id_slug", "gift-basket-deluxe")?;
        Ok(())
    }

    #[test]
    fn selecting_an_image_updates_the_preview_after_the_read_completes() -> Result<()> {
        let mut harness = Harness::from_html(ADMIN_FORM_HTML)?;
        harness.select_file("#id_image", "gift.png", "image/png", &[0x89, 0x50, 0x4E, 0x47])?;

        harness.assert_attr("#id_preview", "src", "/media/placeholder.png")?;
        assert_eq!(harness.pending_file_reads().len(), 1);

        assert_eq!(harness.flush()?, 1);
        harness.assert_attr("#id_preview", "src", "data:image/png;base64,iVBORw==")?;
        Ok(())
    }

    #[test]
    fn empty_file_selection_leaves_the_preview_alone() -> Result<()> {
        let mut harness = Harness::from_html(ADMIN_FORM_HTML)?;
        harness.clear_file_selection("#id_image")?;
        assert!(harness.pending_file_reads().is_empty());
        harness.assert_attr("#id_preview", "src", "/media/placeholder.png")?;
        Ok(())
    }

    #[test]
    fn pages_without_enhanced_fields_construct_fine() -> Result<()> {
        let mut harness = Harness::from_html("<form><input id='plain'></form>")?;
        harness.type_text("#plain", "anything")?;
        harness.assert_value("#plain", "anything")?;
        Ok(())
    }

    #[test]
    fn disabled_and_readonly_inputs_swallow_typing() -> Result<()> {
        let mut harness = Harness::from_html(
            "<div class='field-stock'><input id='locked' value='50' disabled></div>\
             <div class='field-price'><input id='fixed' value='1' readonly></div>",
        )?;
        harness.type_text("#locked", "2")?;
        harness.assert_value("#locked", "50")?;
        harness.assert_class("#locked", "low-stock", false)?;
        harness.type_text("#fixed", "2")?;
        harness.assert_value("#fixed", "1")?;
        Ok(())
    }

    #[test]
    fn type_text_rejects_non_form_targets() -> Result<()> {
        let mut harness = Harness::from_html("<p id='text'>hi</p>")?;
        match harness.type_text("#text", "nope") {
            Err(Error::TypeMismatch { actual, .. }) => assert_eq!(actual, "p"),
            other => panic!("expected type mismatch, got: {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn select_file_rejects_non_file_inputs() -> Result<()> {
        let mut harness = Harness::from_html("<input id='name'>")?;
        match harness.select_file("#name", "a.png", "image/png", &[]) {
            Err(Error::TypeMismatch { actual, .. }) => assert_eq!(actual, "input[type=text]"),
            other => panic!("expected type mismatch, got: {other:?}"),
        }
        Ok(())
    }

    #[test]
    fn missing_selectors_are_reported() {
        let harness = Harness::from_html("<p>empty</p>").expect("page should parse");
        assert!(matches!(
            harness.assert_exists("#id_stock"),
            Err(Error::SelectorNotFound(_))
        ));
    }

    #[test]
    fn trace_captures_enhancement_activity() -> Result<()> {
        let mut harness = Harness::from_html(ADMIN_FORM_HTML)?;
        harness.enable_trace(true);
        harness.set_trace_stderr(false);

        harness.type_text("#id_stock", "2")?;
        harness.select_file("#id_image", "gift.png", "image/png", &[1, 2, 3])?;
        harness.flush()?;

        let logs = harness.take_trace_logs();
        assert!(logs.iter().any(|line| line.starts_with("[event]")));
        assert!(logs.iter().any(|line| line.starts_with("[enhance]")));
        assert!(logs.iter().any(|line| line.starts_with("[read]")));
        Ok(())
    }

    #[test]
    fn trace_log_limit_keeps_the_newest_entries() -> Result<()> {
        let mut harness = Harness::from_html(ADMIN_FORM_HTML)?;
        harness.enable_trace(true);
        harness.set_trace_stderr(false);
        harness.set_trace_log_limit(2)?;

        for stock in ["1", "2", "3", "4"] {
            harness.type_text("#id_stock", stock)?;
        }
        let logs = harness.take_trace_logs();
        assert_eq!(logs.len(), 2);

        assert!(matches!(
            harness.set_trace_log_limit(0),
            Err(Error::Runtime(_))
        ));
        Ok(())
    }
}
