use super::*;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SelectorAttrCondition {
    Exists { key: String },
    Eq { key: String, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SelectorCombinator {
    Descendant,
    Child,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct SelectorStep {
    pub(crate) tag: Option<String>,
    pub(crate) universal: bool,
    pub(crate) id: Option<String>,
    pub(crate) classes: Vec<String>,
    pub(crate) attrs: Vec<SelectorAttrCondition>,
}

impl SelectorStep {
    pub(crate) fn id_only(&self) -> Option<&str> {
        if !self.universal && self.tag.is_none() && self.classes.is_empty() && self.attrs.is_empty()
        {
            self.id.as_deref()
        } else {
            None
        }
    }

    fn is_empty(&self) -> bool {
        !self.universal
            && self.tag.is_none()
            && self.id.is_none()
            && self.classes.is_empty()
            && self.attrs.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SelectorPart {
    pub(crate) step: SelectorStep,
    // Relation to the previous (left) part; None on the first part.
    pub(crate) combinator: Option<SelectorCombinator>,
}

pub(crate) fn parse_selector_groups(selector: &str) -> Result<Vec<Vec<SelectorPart>>> {
    let mut groups = Vec::new();
    for group in selector.split(',') {
        groups.push(parse_selector_chain(group)?);
    }
    Ok(groups)
}

pub(crate) fn parse_selector_chain(selector: &str) -> Result<Vec<SelectorPart>> {
    let selector = selector.trim();
    if selector.is_empty() {
        return Err(Error::UnsupportedSelector(selector.into()));
    }

    let mut parts: Vec<SelectorPart> = Vec::new();
    let mut pending_combinator: Option<SelectorCombinator> = None;

    for token in tokenize_selector(selector) {
        if token == ">" {
            if pending_combinator.is_some() || parts.is_empty() {
                return Err(Error::UnsupportedSelector(selector.into()));
            }
            pending_combinator = Some(SelectorCombinator::Child);
            continue;
        }

        let step = parse_selector_step(&token, selector)?;
        let combinator = if parts.is_empty() {
            None
        } else {
            Some(pending_combinator.unwrap_or(SelectorCombinator::Descendant))
        };
        pending_combinator = None;
        parts.push(SelectorPart { step, combinator });
    }

    if pending_combinator.is_some() || parts.is_empty() {
        return Err(Error::UnsupportedSelector(selector.into()));
    }
    Ok(parts)
}

fn tokenize_selector(selector: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut in_brackets = false;

    for ch in selector.chars() {
        match ch {
            '[' => {
                in_brackets = true;
                current.push(ch);
            }
            ']' => {
                in_brackets = false;
                current.push(ch);
            }
            '>' if !in_brackets => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
                tokens.push(">".to_string());
            }
            _ if ch.is_whitespace() && !in_brackets => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            _ => current.push(ch),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

fn parse_selector_step(token: &str, selector: &str) -> Result<SelectorStep> {
    let unsupported = || Error::UnsupportedSelector(selector.to_string());
    let mut step = SelectorStep::default();
    let mut chars = token.chars().peekable();

    if let Some(&first) = chars.peek() {
        if first == '*' {
            step.universal = true;
            chars.next();
        } else if is_ident_char(first) {
            let mut tag = String::new();
            while let Some(&ch) = chars.peek() {
                if !is_ident_char(ch) {
                    break;
                }
                tag.push(ch);
                chars.next();
            }
            step.tag = Some(tag.to_ascii_lowercase());
        }
    }

    while let Some(ch) = chars.next() {
        match ch {
            '#' => {
                let name = take_ident(&mut chars);
                if name.is_empty() || step.id.is_some() {
                    return Err(unsupported());
                }
                step.id = Some(name);
            }
            '.' => {
                let name = take_ident(&mut chars);
                if name.is_empty() {
                    return Err(unsupported());
                }
                step.classes.push(name);
            }
            '[' => {
                let mut body = String::new();
                let mut closed = false;
                for inner in chars.by_ref() {
                    if inner == ']' {
                        closed = true;
                        break;
                    }
                    body.push(inner);
                }
                if !closed {
                    return Err(unsupported());
                }
                step.attrs.push(parse_attr_condition(&body, selector)?);
            }
            _ => return Err(unsupported()),
        }
    }

    if step.is_empty() {
        return Err(unsupported());
    }
    Ok(step)
}

fn parse_attr_condition(body: &str, selector: &str) -> Result<SelectorAttrCondition> {
    let body = body.trim();
    match body.split_once('=') {
        None => {
            if body.is_empty() || !body.chars().all(is_ident_char) {
                return Err(Error::UnsupportedSelector(selector.to_string()));
            }
            Ok(SelectorAttrCondition::Exists {
                key: body.to_ascii_lowercase(),
            })
        }
        Some((key, value)) => {
            let key = key.trim();
            if key.is_empty() || !key.chars().all(is_ident_char) {
                return Err(Error::UnsupportedSelector(selector.to_string()));
            }
            let value = value.trim();
            let value = value
                .strip_prefix('"')
                .and_then(|rest| rest.strip_suffix('"'))
                .or_else(|| {
                    value
                        .strip_prefix('\'')
                        .and_then(|rest| rest.strip_suffix('\''))
                })
                .unwrap_or(value);
            Ok(SelectorAttrCondition::Eq {
                key: key.to_ascii_lowercase(),
                value: value.to_string(),
            })
        }
    }
}

fn take_ident(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> String {
    let mut out = String::new();
    while let Some(&ch) = chars.peek() {
        if !is_ident_char(ch) {
            break;
        }
        out.push(ch);
        chars.next();
    }
    out
}

fn is_ident_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '-' || ch == '_'
}

pub(crate) fn matches_selector_chain(dom: &Dom, node: NodeId, parts: &[SelectorPart]) -> bool {
    let Some((last, rest)) = parts.split_last() else {
        return false;
    };
    if !matches_step(dom, node, &last.step) {
        return false;
    }
    if rest.is_empty() {
        return true;
    }

    match last.combinator {
        Some(SelectorCombinator::Child) => dom
            .parent_element(node)
            .map(|parent| matches_selector_chain(dom, parent, rest))
            .unwrap_or(false),
        Some(SelectorCombinator::Descendant) | None => {
            let mut cursor = dom.parent_element(node);
            while let Some(ancestor) = cursor {
                if matches_selector_chain(dom, ancestor, rest) {
                    return true;
                }
                cursor = dom.parent_element(ancestor);
            }
            false
        }
    }
}

pub(crate) fn matches_step(dom: &Dom, node: NodeId, step: &SelectorStep) -> bool {
    let Some(element) = dom.element(node) else {
        return false;
    };

    if let Some(tag) = &step.tag {
        if !element.tag_name.eq_ignore_ascii_case(tag) {
            return false;
        }
    }
    if let Some(id) = &step.id {
        if element.attrs.get("id") != Some(id) {
            return false;
        }
    }
    for class_name in &step.classes {
        if !dom::has_class(element, class_name) {
            return false;
        }
    }
    for condition in &step.attrs {
        let matched = match condition {
            SelectorAttrCondition::Exists { key } => element.attrs.contains_key(key),
            SelectorAttrCondition::Eq { key, value } => {
                element.attrs.get(key) == Some(value)
            }
        };
        if !matched {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chain(selector: &str) -> Vec<SelectorPart> {
        parse_selector_chain(selector).expect("selector should parse")
    }

    #[test]
    fn parses_compound_steps() {
        let parts = chain("div.field-stock input[type=file]");
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].step.tag.as_deref(), Some("div"));
        assert_eq!(parts[0].step.classes, vec!["field-stock".to_string()]);
        assert_eq!(parts[1].step.tag.as_deref(), Some("input"));
        assert_eq!(
            parts[1].step.attrs,
            vec![SelectorAttrCondition::Eq {
                key: "type".into(),
                value: "file".into(),
            }]
        );
        assert_eq!(parts[1].combinator, Some(SelectorCombinator::Descendant));
    }

    #[test]
    fn parses_quoted_attribute_values() {
        let parts = chain(r#"input[type="file"]"#);
        assert_eq!(
            parts[0].step.attrs,
            vec![SelectorAttrCondition::Eq {
                key: "type".into(),
                value: "file".into(),
            }]
        );
    }

    #[test]
    fn parses_child_combinator() {
        let parts = chain("form > input");
        assert_eq!(parts[1].combinator, Some(SelectorCombinator::Child));
    }

    #[test]
    fn id_only_fast_path_detection() {
        assert_eq!(chain("#id_slug")[0].step.id_only(), Some("id_slug"));
        assert_eq!(chain("input#id_slug")[0].step.id_only(), None);
    }

    #[test]
    fn rejects_unsupported_syntax() {
        for selector in ["", "   ", ">", "input >", "p:first-child", "[href^=x]", "a[]"] {
            assert!(
                matches!(
                    parse_selector_chain(selector),
                    Err(Error::UnsupportedSelector(_))
                ),
                "expected unsupported selector error for {selector:?}"
            );
        }
    }
}
