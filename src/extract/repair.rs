//! String surgery used by the extraction strategies.
//!
//! Everything here works on raw model text and returns candidate text (or a
//! salvaged field value). Parsing the candidates is left to the caller.

use regex::Regex;
use std::sync::LazyLock;

/// Opening line of a fenced block: the marker plus an optional language tag.
static FENCE_TAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_+\-]*[ \t]*$").unwrap());

const CLOSERS: [char; 2] = ['}', ']'];

/// Return the inner content of the first fenced block in `text`.
///
/// The fence may carry a language tag on its opening line (```` ```json ````).
/// A fence that is never closed runs to the end of the text, which is what a
/// truncated response looks like.
pub fn strip_fence(text: &str) -> Option<&str> {
    let start = text.find("```")?;
    let after = &text[start + 3..];

    let body = match after.find('\n') {
        Some(nl) if FENCE_TAG_RE.is_match(&after[..nl]) => &after[nl + 1..],
        _ => strip_inline_tag(after),
    };

    let inner = match body.find("```") {
        Some(end) => &body[..end],
        None => body,
    };
    Some(inner.trim())
}

/// Handle ```` ```json {"a": 1}``` ```` where the tag shares a line with content.
fn strip_inline_tag(after: &str) -> &str {
    let tag_len = after
        .find(|c: char| !c.is_ascii_alphanumeric())
        .unwrap_or(after.len());
    let rest = after[tag_len..].trim_start();
    if tag_len > 0 && (rest.starts_with('{') || rest.starts_with('[')) {
        rest
    } else {
        after
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Frame {
    Object { expect_key: bool },
    Array,
}

impl Frame {
    fn closer(self) -> char {
        match self {
            Frame::Object { .. } => '}',
            Frame::Array => ']',
        }
    }
}

/// A position where the text can be cut and still be closed into valid JSON.
#[derive(Debug, Clone)]
struct CutPoint {
    end: usize,
    stack: Vec<Frame>,
}

/// Result of scanning a candidate starting at its first opening bracket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scan {
    /// The structure closed; the byte range of the balanced span.
    Balanced { start: usize, end: usize },
    /// The text ended inside the structure; the closed-up repair.
    Truncated { repaired: String },
}

/// Repair text that looks like JSON cut off mid-structure.
///
/// Starting from the first `{` or `[`, the scan tracks the container stack
/// (honouring strings and escapes). A structure that closes yields its
/// balanced span, which drops any prose around it. A structure that runs out
/// is cut back to the last complete value or container open, any trailing
/// comma is removed, and the open containers are closed innermost first.
///
/// Returns `None` when there is no opening bracket, the brackets are
/// mismatched, or nothing inside the structure completed.
pub fn repair_truncated(text: &str) -> Option<String> {
    match scan(text)? {
        Scan::Balanced { start, end } => Some(remove_dangling_commas(&text[start..end])),
        Scan::Truncated { repaired } => Some(remove_dangling_commas(&repaired)),
    }
}

/// Every repair candidate in `text`, left to right.
///
/// The first candidate is what [`repair_truncated`] returns. After a
/// balanced span the search resumes past its end, and after mismatched
/// brackets it resumes at the next opener, so a brace-using phrase like
/// `use the {name} placeholder` does not hide the object that follows it.
/// A truncated structure runs to the end of the text and is always last.
pub fn repair_candidates(text: &str) -> impl Iterator<Item = String> + '_ {
    let mut offset = 0;
    std::iter::from_fn(move || {
        while offset < text.len() {
            let start = offset + text[offset..].find(['{', '['])?;
            match scan(&text[start..]) {
                Some(Scan::Balanced { start: s, end }) => {
                    offset = start + end;
                    return Some(remove_dangling_commas(&text[start + s..start + end]));
                }
                Some(Scan::Truncated { repaired }) => {
                    offset = text.len();
                    return Some(remove_dangling_commas(&repaired));
                }
                None => offset = start + 1,
            }
        }
        None
    })
}

/// Scan `text` from its first opening bracket. See [`repair_truncated`].
pub fn scan(text: &str) -> Option<Scan> {
    let start = text.find(['{', '['])?;
    let body = &text[start..];

    let mut stack: Vec<Frame> = Vec::new();
    let mut last_cut: Option<CutPoint> = None;
    let mut in_string = false;
    let mut escaped = false;
    let mut string_is_key = false;
    let mut token_start: Option<usize> = None;

    for (i, c) in body.char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
                if !string_is_key {
                    last_cut = Some(CutPoint {
                        end: i + 1,
                        stack: stack.clone(),
                    });
                }
            }
            continue;
        }

        if let Some(ts) = token_start {
            if is_token_char(c) {
                continue;
            }
            token_start = None;
            if is_complete_scalar(&body[ts..i]) {
                last_cut = Some(CutPoint {
                    end: i,
                    stack: stack.clone(),
                });
            }
        }

        match c {
            '"' => {
                in_string = true;
                string_is_key = matches!(stack.last(), Some(Frame::Object { expect_key: true }));
            }
            '{' | '[' => {
                stack.push(if c == '{' {
                    Frame::Object { expect_key: true }
                } else {
                    Frame::Array
                });
                last_cut = Some(CutPoint {
                    end: i + 1,
                    stack: stack.clone(),
                });
            }
            '}' | ']' => {
                let frame = stack.pop()?;
                if frame.closer() != c {
                    return None;
                }
                if stack.is_empty() {
                    return Some(Scan::Balanced {
                        start,
                        end: start + i + 1,
                    });
                }
                last_cut = Some(CutPoint {
                    end: i + 1,
                    stack: stack.clone(),
                });
            }
            ':' => {
                if let Some(Frame::Object { expect_key }) = stack.last_mut() {
                    *expect_key = false;
                }
            }
            ',' => {
                if let Some(Frame::Object { expect_key }) = stack.last_mut() {
                    *expect_key = true;
                }
            }
            c if c.is_whitespace() => {}
            c if is_token_char(c) => token_start = Some(i),
            _ => {}
        }
    }

    if let Some(ts) = token_start {
        if is_complete_scalar(&body[ts..]) {
            last_cut = Some(CutPoint {
                end: body.len(),
                stack: stack.clone(),
            });
        }
    }

    let cut = last_cut?;
    let mut repaired = body[..cut.end].trim_end().trim_end_matches(',').to_string();
    for frame in cut.stack.iter().rev() {
        repaired.push(frame.closer());
    }
    Some(Scan::Truncated { repaired })
}

fn is_token_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '-' | '+' | '.')
}

fn is_complete_scalar(token: &str) -> bool {
    matches!(token, "true" | "false" | "null")
        || serde_json::from_str::<serde_json::Number>(token).is_ok()
}

/// Drop commas that directly precede a closing bracket (`[1, 2,]`).
pub fn remove_dangling_commas(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;
    let mut chars = text.chars();

    while let Some(c) = chars.next() {
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
                let rest: String = chars.clone().skip_while(|n| n.is_whitespace()).take(1).collect();
                if !rest.starts_with(CLOSERS) {
                    out.push(c);
                }
            }
            _ => out.push(c),
        }
    }
    out
}

/// Recover the string value of `field` even when its closing quote is missing.
///
/// Scans from the value's opening quote, unescaping `\"`, `\n`, `\t` and
/// `\\` (any other escaped character is kept as-is), and stops at the first
/// unescaped quote or the end of the text.
pub fn salvage_field(text: &str, field: &str) -> Option<String> {
    let pattern = Regex::new(&format!(r#""{}"\s*:\s*""#, regex::escape(field))).ok()?;
    let found = pattern.find(text)?;

    let mut content = String::new();
    let mut chars = text[found.end()..].chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some('"') => content.push('"'),
                Some('n') => content.push('\n'),
                Some('t') => content.push('\t'),
                Some('\\') => content.push('\\'),
                Some(other) => content.push(other),
                None => break,
            },
            '"' => break,
            c => content.push(c),
        }
    }

    let content = content.trim().trim_end_matches(',').trim_end();
    if content.is_empty() {
        None
    } else {
        Some(content.to_string())
    }
}
