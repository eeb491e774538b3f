//! Layered, best-effort extraction of structured payloads from free-form
//! model output.
//!
//! Models wrap answers in prose, fences, or reasoning blocks in no
//! predictable combination. Extraction is an ordered list of pure
//! strategies, each returning an optional candidate, tried in sequence;
//! later strategies only run when earlier ones yield nothing.

/// Remove `<think>…</think>` reasoning delimiters some providers interleave
/// with the payload. Unterminated blocks are dropped to end of input.
pub fn strip_reasoning(raw: &str) -> String {
    const OPEN: &str = "<think>";
    const CLOSE: &str = "</think>";

    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    loop {
        match rest.find(OPEN) {
            Some(start) => {
                out.push_str(&rest[..start]);
                match rest[start..].find(CLOSE) {
                    Some(end) => rest = &rest[start + end + CLOSE.len()..],
                    None => break,
                }
            }
            None => {
                out.push_str(rest);
                break;
            }
        }
    }
    out
}

/// Remove trailing commas before `}` / `]` outside of string literals, the
/// most common JSON mistake in model output.
pub fn clean_trailing_commas(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut in_string = false;
    let mut escaped = false;
    let chars: Vec<char> = raw.chars().collect();

    for (i, &c) in chars.iter().enumerate() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }

        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            ',' => {
                let next = chars[i + 1..].iter().find(|ch| !ch.is_whitespace());
                if !matches!(next, Some('}') | Some(']')) {
                    out.push(c);
                }
            }
            _ => out.push(c),
        }
    }
    out
}

/// Extract a JSON candidate: tagged fence → any fence → bracket scan →
/// whole response. Trailing commas are cleaned before returning.
pub fn json_candidate(raw: &str) -> String {
    let text = strip_reasoning(raw);
    let candidate = fenced_block(&text, Some("json"))
        .or_else(|| fenced_block(&text, None))
        .or_else(|| bracket_scan(&text, '{', '}'))
        .unwrap_or_else(|| text.trim().to_string());
    clean_trailing_commas(&candidate)
}

/// Extract an HTML candidate: `html`-tagged fence → any fence → document
/// scan (`<!DOCTYPE`/`<html` through `</html>`) → whole response.
pub fn html_candidate(raw: &str) -> String {
    let text = strip_reasoning(raw);
    fenced_block(&text, Some("html"))
        .or_else(|| fenced_block(&text, None))
        .or_else(|| document_scan(&text))
        .unwrap_or_else(|| text.trim().to_string())
}

fn fenced_block(text: &str, tag: Option<&str>) -> Option<String> {
    let opener = match tag {
        Some(tag) => format!("```{tag}"),
        None => "```".to_string(),
    };

    let start = text.find(&opener)?;
    let after_opener = &text[start + opener.len()..];
    // An untagged search must not match a tagged fence opener midway.
    let body_start = after_opener.find('\n')? + 1;
    let body = &after_opener[body_start..];
    let end = body.find("```")?;
    let candidate = body[..end].trim();
    if candidate.is_empty() {
        None
    } else {
        Some(candidate.to_string())
    }
}

/// Best-effort scan from the first opening bracket to its matching close,
/// respecting string literals.
fn bracket_scan(text: &str, open: char, close: char) -> Option<String> {
    let start = text.find(open)?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            c if c == open => depth += 1,
            c if c == close => {
                depth -= 1;
                if depth == 0 {
                    return Some(text[start..start + offset + c.len_utf8()].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

fn document_scan(text: &str) -> Option<String> {
    let lowered = text.to_lowercase();
    let start = lowered.find("<!doctype").or_else(|| lowered.find("<html"))?;
    let end = lowered.rfind("</html>")?;
    if end < start {
        return None;
    }
    Some(text[start..end + "</html>".len()].to_string())
}
