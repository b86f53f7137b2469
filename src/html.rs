use std::collections::HashMap;

use super::*;

const VOID_TAGS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

const RAW_TEXT_TAGS: &[&str] = &["script", "style"];

pub(crate) fn parse_html(html: &str) -> Result<Dom> {
    let mut dom = Dom::new();
    let mut stack = vec![dom.root()];
    let bytes = html.as_bytes();
    let mut i = 0usize;

    while i < bytes.len() {
        if starts_with_at(bytes, i, b"<!--") {
            let end = find_subslice(bytes, i + 4, b"-->")
                .ok_or_else(|| Error::HtmlParse("unclosed HTML comment".into()))?;
            i = end + 3;
            continue;
        }

        if starts_with_at(bytes, i, b"<!") {
            // Doctype or other declaration: skip to the closing angle.
            let end = find_byte(bytes, i + 2, b'>')
                .ok_or_else(|| Error::HtmlParse("unclosed declaration".into()))?;
            i = end + 1;
            continue;
        }

        if starts_with_at(bytes, i, b"</") {
            let (tag, next) = parse_end_tag(html, i)?;
            i = next;
            while stack.len() > 1 {
                let top = *stack
                    .last()
                    .ok_or_else(|| Error::HtmlParse("invalid open-element stack".into()))?;
                let top_tag = dom.tag_name(top).unwrap_or("");
                let closes = top_tag.eq_ignore_ascii_case(&tag);
                stack.pop();
                if closes {
                    break;
                }
            }
            continue;
        }

        if bytes[i] == b'<' {
            let (tag, attrs, self_closing, next) = parse_start_tag(html, i)?;
            i = next;

            let parent = *stack
                .last()
                .ok_or_else(|| Error::HtmlParse("missing parent element".into()))?;
            let node = dom.create_element(parent, tag.clone(), attrs);

            if RAW_TEXT_TAGS.contains(&tag.as_str()) {
                let close = find_case_insensitive_end_tag(bytes, i, tag.as_bytes())
                    .ok_or_else(|| Error::HtmlParse(format!("unclosed <{tag}>")))?;
                if let Some(body) = html.get(i..close) {
                    if !body.is_empty() {
                        dom.create_text(node, body.to_string());
                    }
                }
                let (_, after_end) = parse_end_tag(html, close)?;
                i = after_end;
                continue;
            }

            if !self_closing && !VOID_TAGS.contains(&tag.as_str()) {
                stack.push(node);
            }
            continue;
        }

        let text_start = i;
        while i < bytes.len() && bytes[i] != b'<' {
            i += 1;
        }
        if let Some(text) = html.get(text_start..i) {
            if !text.is_empty() {
                let parent = *stack
                    .last()
                    .ok_or_else(|| Error::HtmlParse("missing parent element".into()))?;
                dom.create_text(parent, text.to_string());
            }
        }
    }

    dom.initialize_form_control_values();
    Ok(dom)
}

fn parse_start_tag(html: &str, at: usize) -> Result<(String, HashMap<String, String>, bool, usize)> {
    let bytes = html.as_bytes();
    let mut i = at + 1;

    let tag_start = i;
    while i < bytes.len() && is_tag_char(bytes[i]) {
        i += 1;
    }
    let tag = html
        .get(tag_start..i)
        .ok_or_else(|| Error::HtmlParse("invalid tag name".into()))?
        .to_ascii_lowercase();
    if tag.is_empty() {
        return Err(Error::HtmlParse("empty tag name".into()));
    }

    let mut attrs = HashMap::new();
    let mut self_closing = false;

    loop {
        skip_ws(bytes, &mut i);
        match bytes.get(i) {
            None => return Err(Error::HtmlParse(format!("unclosed <{tag}> start tag"))),
            Some(b'>') => {
                i += 1;
                break;
            }
            Some(b'/') if bytes.get(i + 1) == Some(&b'>') => {
                self_closing = true;
                i += 2;
                break;
            }
            Some(_) => {}
        }

        let name_start = i;
        while i < bytes.len() && is_attr_name_char(bytes[i]) {
            i += 1;
        }
        let name = html
            .get(name_start..i)
            .ok_or_else(|| Error::HtmlParse("invalid attribute name".into()))?
            .to_ascii_lowercase();
        if name.is_empty() {
            return Err(Error::HtmlParse(format!(
                "invalid attribute name in <{tag}>"
            )));
        }

        skip_ws(bytes, &mut i);
        let value = if bytes.get(i) == Some(&b'=') {
            i += 1;
            skip_ws(bytes, &mut i);
            parse_attr_value(html, &mut i)?
        } else {
            "true".to_string()
        };
        attrs.insert(name, value);
    }

    Ok((tag, attrs, self_closing, i))
}

fn parse_end_tag(html: &str, at: usize) -> Result<(String, usize)> {
    let bytes = html.as_bytes();
    let mut i = at;
    if !starts_with_at(bytes, i, b"</") {
        return Err(Error::HtmlParse("expected end tag".into()));
    }
    i += 2;
    skip_ws(bytes, &mut i);

    let tag_start = i;
    while i < bytes.len() && is_tag_char(bytes[i]) {
        i += 1;
    }
    let tag = html
        .get(tag_start..i)
        .ok_or_else(|| Error::HtmlParse("invalid end tag name".into()))?
        .to_ascii_lowercase();
    if tag.is_empty() {
        return Err(Error::HtmlParse("empty end tag name".into()));
    }

    skip_ws(bytes, &mut i);
    if bytes.get(i) != Some(&b'>') {
        return Err(Error::HtmlParse(format!("unclosed </{tag}> end tag")));
    }
    Ok((tag, i + 1))
}

fn parse_attr_value(html: &str, i: &mut usize) -> Result<String> {
    let bytes = html.as_bytes();
    match bytes.get(*i).copied() {
        Some(quote @ (b'"' | b'\'')) => {
            *i += 1;
            let value_start = *i;
            while *i < bytes.len() && bytes[*i] != quote {
                *i += 1;
            }
            if *i >= bytes.len() {
                return Err(Error::HtmlParse("unclosed attribute value".into()));
            }
            let value = html
                .get(value_start..*i)
                .ok_or_else(|| Error::HtmlParse("invalid attribute value".into()))?
                .to_string();
            *i += 1;
            Ok(value)
        }
        Some(_) => {
            let value_start = *i;
            while *i < bytes.len() && !bytes[*i].is_ascii_whitespace() && bytes[*i] != b'>' {
                *i += 1;
            }
            Ok(html
                .get(value_start..*i)
                .ok_or_else(|| Error::HtmlParse("invalid attribute value".into()))?
                .to_string())
        }
        None => Err(Error::HtmlParse("missing attribute value".into())),
    }
}

fn skip_ws(bytes: &[u8], i: &mut usize) {
    while *i < bytes.len() && bytes[*i].is_ascii_whitespace() {
        *i += 1;
    }
}

fn is_tag_char(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'-'
}

fn is_attr_name_char(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' || byte == b':'
}

fn starts_with_at(bytes: &[u8], at: usize, needle: &[u8]) -> bool {
    bytes.len() >= at + needle.len() && &bytes[at..at + needle.len()] == needle
}

fn find_byte(bytes: &[u8], from: usize, needle: u8) -> Option<usize> {
    (from..bytes.len()).find(|&i| bytes[i] == needle)
}

fn find_subslice(bytes: &[u8], from: usize, needle: &[u8]) -> Option<usize> {
    if from > bytes.len() {
        return None;
    }
    (from..=bytes.len().saturating_sub(needle.len()))
        .find(|&i| &bytes[i..i + needle.len()] == needle)
}

fn find_case_insensitive_end_tag(bytes: &[u8], from: usize, tag: &[u8]) -> Option<usize> {
    let mut i = from;
    while i + 2 + tag.len() <= bytes.len() {
        if starts_with_at(bytes, i, b"</")
            && bytes[i + 2..i + 2 + tag.len()].eq_ignore_ascii_case(tag)
        {
            return Some(i);
        }
        i += 1;
    }
    None
}
