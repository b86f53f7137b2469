use super::*;

// Structural contract with the rendered admin page: each field lives in
// a container marked with a field-specific class.
pub(crate) const STOCK_INPUT_SELECTOR: &str = ".field-stock input";
pub(crate) const PRICE_INPUT_SELECTOR: &str = ".field-price input";
pub(crate) const IMAGE_INPUT_SELECTOR: &str = ".field-image input[type=file]";
pub(crate) const IMAGE_PREVIEW_SELECTOR: &str = ".field-image_preview img";
pub(crate) const NAME_INPUT_SELECTOR: &str = ".field-name input";
pub(crate) const SLUG_INPUT_SELECTOR: &str = ".field-slug input";

pub(crate) const LOW_STOCK_CLASS: &str = "low-stock";
pub(crate) const LOW_STOCK_THRESHOLD: i64 = 10;

/// One enhancement behavior, attached to a specific node and event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Behavior {
    StockThreshold,
    PriceFormat,
    ImagePreview,
    SlugFollow,
    SlugManualMark,
}

/// Page-scoped enhancement state. Lives exactly as long as the harness;
/// nothing here is persisted.
#[derive(Debug, Default)]
pub(crate) struct FormSession {
    pub(crate) slug_manual_override: bool,
    pub(crate) derived_slug_write: bool,
    pub(crate) preview_token: u64,
    pub(crate) slug_input: Option<NodeId>,
}

impl Harness {
    /// Wires every enhancement whose target fields are present. Runs
    /// once per page; fields injected later are never wired. A missing
    /// field silently disables its behavior.
    pub(crate) fn install_enhancements(&mut self) -> Result<()> {
        for node in self.dom.query_selector_all(STOCK_INPUT_SELECTOR)? {
            self.listeners.add(node, "input", Behavior::StockThreshold);
            self.apply_stock_threshold(node)?;
        }

        for node in self.dom.query_selector_all(PRICE_INPUT_SELECTOR)? {
            self.listeners.add(node, "blur", Behavior::PriceFormat);
        }

        if let Some(node) = self.dom.query_selector(IMAGE_INPUT_SELECTOR)? {
            self.listeners.add(node, "change", Behavior::ImagePreview);
        }

        let name_input = self.dom.query_selector(NAME_INPUT_SELECTOR)?;
        let slug_input = self.dom.query_selector(SLUG_INPUT_SELECTOR)?;
        if let (Some(name), Some(slug)) = (name_input, slug_input) {
            self.listeners.add(name, "input", Behavior::SlugFollow);
            self.listeners.add(slug, "input", Behavior::SlugManualMark);
            self.session.slug_input = Some(slug);
        }

        Ok(())
    }

    pub(crate) fn run_behavior(&mut self, behavior: Behavior, node: NodeId) -> Result<()> {
        match behavior {
            Behavior::StockThreshold => self.apply_stock_threshold(node),
            Behavior::PriceFormat => self.apply_price_format(node),
            Behavior::ImagePreview => self.queue_preview_read(node),
            Behavior::SlugFollow => self.apply_slug_follow(node),
            Behavior::SlugManualMark => self.mark_slug_manual(),
        }
    }

    fn apply_stock_threshold(&mut self, node: NodeId) -> Result<()> {
        let value = self.dom.value(node)?;
        let low = matches!(
            numeric::parse_int_prefix(&value),
            Some(count) if count < LOW_STOCK_THRESHOLD
        );
        if low {
            self.dom.class_add(node, LOW_STOCK_CLASS)?;
        } else {
            self.dom.class_remove(node, LOW_STOCK_CLASS)?;
        }
        let label = self.trace_node_label(node);
        self.trace_event_line(format!("[enhance] stock target={label} low={low}"));
        Ok(())
    }

    fn apply_price_format(&mut self, node: NodeId) -> Result<()> {
        let raw = self.dom.value(node)?;
        let Some(parsed) = numeric::parse_float_prefix(&raw) else {
            return Ok(());
        };
        if !parsed.is_finite() {
            return Ok(());
        }
        let formatted = format!("{parsed:.2}");
        self.dom.set_value(node, &formatted)?;
        let label = self.trace_node_label(node);
        self.trace_event_line(format!(
            "[enhance] price target={label} raw={raw:?} formatted={formatted:?}"
        ));
        Ok(())
    }

    fn queue_preview_read(&mut self, node: NodeId) -> Result<()> {
        let first_file = self.dom.files(node)?.first().cloned();
        let Some(file) = first_file else {
            self.trace_read_line("[read] empty selection, nothing queued".into());
            return Ok(());
        };

        self.session.preview_token += 1;
        let id = self.next_read_id;
        self.next_read_id += 1;
        self.trace_read_line(format!(
            "[read] queue id={id} token={} file={:?}",
            self.session.preview_token, file.name
        ));
        self.read_queue.push(PendingFileRead {
            id,
            token: self.session.preview_token,
            file,
        });
        Ok(())
    }

    pub(crate) fn apply_file_read(&mut self, read: PendingFileRead) -> Result<()> {
        if read.token != self.session.preview_token {
            self.trace_read_line(format!(
                "[read] drop id={} token={} current={}",
                read.id, read.token, self.session.preview_token
            ));
            return Ok(());
        }

        let preview = self.dom.query_selector(IMAGE_PREVIEW_SELECTOR)?;
        let Some(preview) = preview else {
            self.trace_read_line(format!("[read] no preview element, id={} dropped", read.id));
            return Ok(());
        };

        let uri = files::data_uri(&read.file.media_type, &read.file.bytes);
        self.dom.set_attr(preview, "src", &uri)?;
        self.trace_read_line(format!(
            "[read] apply id={} file={:?} bytes={}",
            read.id,
            read.file.name,
            read.file.bytes.len()
        ));
        Ok(())
    }

    fn apply_slug_follow(&mut self, name_input: NodeId) -> Result<()> {
        if self.session.slug_manual_override {
            self.trace_event_line("[enhance] slug follow skipped, manual override".into());
            return Ok(());
        }
        let Some(slug_input) = self.session.slug_input else {
            return Ok(());
        };

        let derived = slug::slugify(&self.dom.value(name_input)?);
        self.dom.set_value(slug_input, &derived)?;
        let label = self.trace_node_label(slug_input);
        self.trace_event_line(format!("[enhance] slug target={label} derived={derived:?}"));

        // The derived write dispatches input on the slug field like any
        // other edit, but must not count as a manual override.
        self.session.derived_slug_write = true;
        let outcome = self.dispatch_event(slug_input, "input");
        self.session.derived_slug_write = false;
        outcome
    }

    fn mark_slug_manual(&mut self) -> Result<()> {
        if self.session.derived_slug_write {
            self.trace_event_line("[enhance] slug input from deriver, override unchanged".into());
            return Ok(());
        }
        if !self.session.slug_manual_override {
            self.trace_event_line("[enhance] slug manual override set".into());
        }
        self.session.slug_manual_override = true;
        Ok(())
    }
}
