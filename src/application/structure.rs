//! Structural-completeness checking and deterministic repair of generated
//! slide markup.
//!
//! The check is strict and non-recovering: every opening tag must be
//! closed, and the `html`/`head`/`body` skeleton must be present and
//! ordered. Missing boilerplate (doctype, charset, title, viewport) is
//! collected as warnings, never errors, so cosmetic omissions do not burn
//! generation retries.

use quick_xml::Reader;
use quick_xml::events::Event;

use crate::domain::outline::ValidationError;

/// Elements that are self-closing in HTML and never produce an end tag.
const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

/// Elements whose raw content may legally contain `<` without opening a tag.
const RAW_TEXT_ELEMENTS: &[&str] = &["script", "style"];

#[derive(Debug, Clone, Default)]
pub struct StructureReport {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<String>,
}

impl StructureReport {
    pub fn is_acceptable(&self) -> bool {
        self.errors.is_empty()
    }
}

fn is_void(name: &str) -> bool {
    VOID_ELEMENTS.contains(&name)
}

fn is_raw_text(name: &str) -> bool {
    RAW_TEXT_ELEMENTS.contains(&name)
}

/// Strict structural check. Script and style bodies are opaque to the XML
/// reader, so they are blanked before parsing; tag structure is unaffected.
pub fn check(markup: &str) -> StructureReport {
    let mut report = StructureReport::default();
    let masked = mask_raw_text(markup);

    let mut reader = Reader::from_str(&masked);
    reader.config_mut().check_end_names = false;

    let mut stack: Vec<String> = Vec::new();
    let mut seen_doctype = false;
    let mut first_seen: Vec<(String, usize)> = Vec::new();
    let mut order = 0usize;

    loop {
        match reader.read_event() {
            Ok(Event::Start(tag)) => {
                let name = String::from_utf8_lossy(tag.name().as_ref()).to_lowercase();
                if matches!(name.as_str(), "html" | "head" | "body")
                    && !first_seen.iter().any(|(seen, _)| seen == &name)
                {
                    first_seen.push((name.clone(), order));
                    order += 1;
                }
                if !is_void(&name) {
                    stack.push(name);
                }
            }
            Ok(Event::End(tag)) => {
                let name = String::from_utf8_lossy(tag.name().as_ref()).to_lowercase();
                if is_void(&name) {
                    continue;
                }
                match stack.last() {
                    Some(top) if *top == name => {
                        stack.pop();
                    }
                    Some(top) => {
                        report.errors.push(ValidationError::new(format!(
                            "mismatched closing tag </{name}>, expected </{top}>"
                        )));
                        stack.pop();
                    }
                    None => {
                        report.errors.push(ValidationError::new(format!(
                            "orphan closing tag </{name}> with no open element"
                        )));
                    }
                }
            }
            Ok(Event::DocType(_)) => seen_doctype = true,
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(err) => {
                report.errors.push(ValidationError::new(format!(
                    "markup is not parseable: {err}"
                )));
                break;
            }
        }
    }

    for unclosed in stack.iter().rev() {
        report
            .errors
            .push(ValidationError::new(format!("unclosed <{unclosed}> element")));
    }

    check_skeleton(&first_seen, &mut report);

    let lowered = markup.to_lowercase();
    if !seen_doctype {
        report.warnings.push("missing <!DOCTYPE html>".to_string());
    }
    if !lowered.contains("charset") {
        report.warnings.push("missing charset declaration".to_string());
    }
    if !lowered.contains("<title") {
        report.warnings.push("missing <title> element".to_string());
    }
    if !lowered.contains("viewport") {
        report.warnings.push("missing viewport meta".to_string());
    }

    report
}

fn check_skeleton(first_seen: &[(String, usize)], report: &mut StructureReport) {
    let position = |name: &str| {
        first_seen
            .iter()
            .find(|(seen, _)| seen == name)
            .map(|(_, index)| *index)
    };

    let html = position("html");
    let head = position("head");
    let body = position("body");

    for (name, seen) in [("html", html), ("head", head), ("body", body)] {
        if seen.is_none() {
            report
                .errors
                .push(ValidationError::new(format!("missing required <{name}> element")));
        }
    }

    if let (Some(html), Some(head), Some(body)) = (html, head, body)
        && !(html < head && head < body)
    {
        report.errors.push(ValidationError::new(
            "required elements out of order: expected <html>, then <head>, then <body>",
        ));
    }
}

/// Blank the contents of raw-text elements so the strict reader never
/// misinterprets embedded `<` in scripts or stylesheets.
fn mask_raw_text(markup: &str) -> String {
    let mut out = markup.to_string();
    // ASCII lowering keeps byte offsets aligned with the original.
    let lowered = markup.to_ascii_lowercase();

    for element in RAW_TEXT_ELEMENTS {
        let open_marker = format!("<{element}");
        let close_marker = format!("</{element}");
        let mut cursor = 0usize;

        while let Some(found) = lowered[cursor..].find(&open_marker) {
            let open_at = cursor + found;
            let Some(tag_end) = lowered[open_at..].find('>') else {
                break;
            };
            let content_start = open_at + tag_end + 1;
            // A self-closing opener has no raw content to mask.
            if lowered[open_at..content_start].ends_with("/>") {
                cursor = content_start;
                continue;
            }
            let Some(close) = lowered[content_start..].find(&close_marker) else {
                break;
            };
            let content_end = content_start + close;
            out.replace_range(content_start..content_end, &" ".repeat(content_end - content_start));
            cursor = content_end;
        }
    }
    out
}

/// Deterministic lenient repair: wraps bare fragments in a full skeleton,
/// balances the tag structure (dropping orphan end tags, closing unclosed
/// elements), and injects missing head boilerplate. Returns `None` when the
/// input comes back unchanged, in which case the caller retries the model.
pub fn auto_fix(markup: &str) -> Option<String> {
    let trimmed = markup.trim();
    let mut candidate = if trimmed.to_lowercase().contains("<html") {
        trimmed.to_string()
    } else {
        wrap_fragment(trimmed)
    };

    candidate = balance_tags(&candidate);
    candidate = inject_boilerplate(&candidate);

    if candidate == markup {
        None
    } else {
        Some(candidate)
    }
}

fn wrap_fragment(fragment: &str) -> String {
    format!(
        "<html><head><title>Slide</title></head><body>{fragment}</body></html>"
    )
}

#[derive(Debug)]
enum Token<'a> {
    Open(String, &'a str),
    Close(String),
    Other(&'a str),
}

/// Recovering tag-balance pass over the raw markup. Text, comments, and
/// void/self-closing tags are copied through untouched.
fn balance_tags(markup: &str) -> String {
    let tokens = tokenize(markup);
    let mut out = String::with_capacity(markup.len());
    let mut stack: Vec<String> = Vec::new();

    for token in tokens {
        match token {
            Token::Other(text) => out.push_str(text),
            Token::Open(name, raw) => {
                out.push_str(raw);
                if !is_void(&name) && !raw.ends_with("/>") {
                    stack.push(name);
                }
            }
            Token::Close(name) => {
                if let Some(depth) = stack.iter().rposition(|open| *open == name) {
                    // Close unclosed children before the matching ancestor.
                    while stack.len() > depth + 1 {
                        let unclosed = stack.pop().unwrap();
                        out.push_str(&format!("</{unclosed}>"));
                    }
                    stack.pop();
                    out.push_str(&format!("</{name}>"));
                }
                // Orphan end tags are dropped.
            }
        }
    }

    while let Some(unclosed) = stack.pop() {
        out.push_str(&format!("</{unclosed}>"));
    }
    out
}

fn tokenize(markup: &str) -> Vec<Token<'_>> {
    let mut tokens = Vec::new();
    let bytes = markup.as_bytes();
    let lowered = markup.to_ascii_lowercase();
    let mut cursor = 0usize;

    while cursor < bytes.len() {
        let Some(lt) = markup[cursor..].find('<') else {
            tokens.push(Token::Other(&markup[cursor..]));
            break;
        };
        let lt = cursor + lt;
        if lt > cursor {
            tokens.push(Token::Other(&markup[cursor..lt]));
        }

        let rest = &markup[lt..];
        if rest.starts_with("<!--") {
            let end = rest.find("-->").map(|i| lt + i + 3).unwrap_or(bytes.len());
            tokens.push(Token::Other(&markup[lt..end]));
            cursor = end;
            continue;
        }
        if rest.starts_with("<!") || rest.starts_with("<?") {
            let end = rest.find('>').map(|i| lt + i + 1).unwrap_or(bytes.len());
            tokens.push(Token::Other(&markup[lt..end]));
            cursor = end;
            continue;
        }

        let Some(gt) = rest.find('>') else {
            tokens.push(Token::Other(&markup[lt..]));
            break;
        };
        let tag_end = lt + gt + 1;
        let raw = &markup[lt..tag_end];

        if let Some(name) = tag_name(raw) {
            if raw.starts_with("</") {
                tokens.push(Token::Close(name));
            } else {
                let is_raw_element = is_raw_text(&name);
                tokens.push(Token::Open(name.clone(), raw));
                cursor = tag_end;
                if is_raw_element && !raw.ends_with("/>") {
                    // Copy raw content verbatim through the closing tag.
                    let close_marker = format!("</{name}");
                    if let Some(found) = lowered[cursor..].find(&close_marker) {
                        let close_at = cursor + found;
                        let close_end = lowered[close_at..]
                            .find('>')
                            .map(|i| close_at + i + 1)
                            .unwrap_or(bytes.len());
                        tokens.push(Token::Other(&markup[cursor..close_at]));
                        tokens.push(Token::Close(name));
                        cursor = close_end;
                    }
                }
                continue;
            }
        } else {
            tokens.push(Token::Other(raw));
        }
        cursor = tag_end;
    }

    tokens
}

fn tag_name(raw: &str) -> Option<String> {
    let inner = raw.trim_start_matches('<').trim_start_matches('/');
    let name: String = inner
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '-')
        .collect();
    if name.is_empty() {
        None
    } else {
        Some(name.to_lowercase())
    }
}

/// Inject missing head boilerplate through a lenient streaming rewrite.
/// Failures here are cosmetic, so the balanced markup passes through
/// unchanged if the rewriter rejects it.
fn inject_boilerplate(markup: &str) -> String {
    use lol_html::{RewriteStrSettings, element, html_content::ContentType, rewrite_str};

    let lowered = markup.to_lowercase();
    let needs_charset = !lowered.contains("charset");
    let needs_title = !lowered.contains("<title");

    let mut rewritten = markup.to_string();
    if needs_charset || needs_title {
        let result = rewrite_str(
            markup,
            RewriteStrSettings {
                element_content_handlers: vec![element!("head", move |el| {
                    if needs_title {
                        el.prepend("<title>Slide</title>", ContentType::Html);
                    }
                    if needs_charset {
                        el.prepend("<meta charset=\"utf-8\">", ContentType::Html);
                    }
                    Ok(())
                })],
                ..RewriteStrSettings::new()
            },
        );
        if let Ok(output) = result {
            rewritten = output;
        }
    }

    if !rewritten.to_lowercase().starts_with("<!doctype") {
        rewritten = format!("<!DOCTYPE html>\n{rewritten}");
    }
    rewritten
}
