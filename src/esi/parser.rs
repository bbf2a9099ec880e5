//! Turning captured handler output into a [`Fragment`] tree.

use super::error::ParseError;
use super::fragment::{Fragment, Include};

/// Parses a captured response body into a fragment tree.
pub trait BodyParser: Send + Sync {
    fn parse(&self, body: &str) -> Result<Fragment, ParseError>;
}

/// The default [`BodyParser`].
///
/// Understands a small ESI subset:
///
/// - `<esi:include src="..." [alt="..."] [onerror="continue"]/>` (the
///   explicit `</esi:include>` closing form is accepted too);
/// - `<esi:remove>...</esi:remove>`, dropped entirely;
/// - `<esi:comment .../>`, dropped.
///
/// Any other markup, including unknown `esi:` tags, is literal text.
///
/// # Examples
///
/// ```
/// use rttp_esi::esi::{BodyParser, Fragment, Include, IncludeParser};
///
/// let tree = IncludeParser.parse(r#"<p>hi</p><esi:include src="/nav"/>"#).unwrap();
/// let Fragment::Sequence(children) = tree else { unreachable!() };
/// assert_eq!(*children[0], Fragment::Text("<p>hi</p>".into()));
/// assert_eq!(*children[1], Fragment::Include(Include::new("/nav")));
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct IncludeParser;

const OPEN: &str = "<esi:";
const REMOVE_CLOSE: &str = "</esi:remove>";
const INCLUDE_CLOSE: &str = "</esi:include>";

impl BodyParser for IncludeParser {
    fn parse(&self, body: &str) -> Result<Fragment, ParseError> {
        let mut children = Vec::new();
        let mut text_start = 0;
        let mut pos = 0;

        while let Some(rel) = body[pos..].find(OPEN) {
            let start = pos + rel;
            let name_start = start + OPEN.len();

            let Some(tag) = tag_name(&body[name_start..]) else {
                // Unknown esi: element, keep it as text.
                pos = name_start;
                continue;
            };

            let end = find_tag_end(body, name_start + tag.name.len())
                .ok_or(ParseError::UnterminatedTag { tag: tag.label, offset: start })?;
            let inner = &body[name_start + tag.name.len()..end];
            let (inner, self_closing) = match inner.trim_end().strip_suffix('/') {
                Some(inner) => (inner, true),
                None => (inner, false),
            };
            let mut after = end + 1;

            match tag.kind {
                TagKind::Include => {
                    let attrs = parse_attributes(inner).ok_or(ParseError::MalformedAttribute {
                        tag: tag.label,
                        offset: start,
                    })?;
                    let include = include_from(attrs, start)?;
                    if !self_closing && body[after..].starts_with(INCLUDE_CLOSE) {
                        after += INCLUDE_CLOSE.len();
                    }
                    push_text(&mut children, &body[text_start..start]);
                    children.push(Fragment::Include(include));
                }
                TagKind::Comment => {
                    push_text(&mut children, &body[text_start..start]);
                }
                TagKind::Remove => {
                    if !self_closing {
                        let close = body[after..]
                            .find(REMOVE_CLOSE)
                            .ok_or(ParseError::UnclosedRemove { offset: start })?;
                        after += close + REMOVE_CLOSE.len();
                    }
                    push_text(&mut children, &body[text_start..start]);
                }
            }

            pos = after;
            text_start = after;
        }

        push_text(&mut children, &body[text_start..]);
        Ok(Fragment::sequence(children))
    }
}

#[derive(Clone, Copy)]
enum TagKind {
    Include,
    Comment,
    Remove,
}

struct Tag {
    kind: TagKind,
    name: &'static str,
    label: &'static str,
}

static TAGS: [Tag; 3] = [
    Tag { kind: TagKind::Include, name: "include", label: "esi:include" },
    Tag { kind: TagKind::Comment, name: "comment", label: "esi:comment" },
    Tag { kind: TagKind::Remove, name: "remove", label: "esi:remove" },
];

// Matches a known tag name followed by a name boundary.
fn tag_name(rest: &str) -> Option<&'static Tag> {
    TAGS.iter().find(|tag| {
        rest.starts_with(tag.name)
            && rest[tag.name.len()..]
                .chars()
                .next()
                .is_some_and(|c| c.is_ascii_whitespace() || c == '/' || c == '>')
    })
}

// Index of the `>` closing the tag, skipping quoted attribute values.
fn find_tag_end(body: &str, from: usize) -> Option<usize> {
    let mut quote = None;
    for (i, b) in body.bytes().enumerate().skip(from) {
        match (quote, b) {
            (Some(q), b) if b == q => quote = None,
            (Some(_), _) => {}
            (None, b'"' | b'\'') => quote = Some(b),
            (None, b'>') => return Some(i),
            (None, _) => {}
        }
    }
    None
}

// `name="value"` pairs separated by whitespace; single or double quotes.
fn parse_attributes(mut s: &str) -> Option<Vec<(String, String)>> {
    let mut attrs = Vec::new();
    loop {
        s = s.trim_start();
        if s.is_empty() {
            return Some(attrs);
        }
        let eq = s.find('=')?;
        let name = s[..eq].trim();
        if name.is_empty() || name.contains(char::is_whitespace) {
            return None;
        }
        let rest = s[eq + 1..].trim_start();
        let quote = rest.chars().next().filter(|c| *c == '"' || *c == '\'')?;
        let close = rest[1..].find(quote)?;
        attrs.push((name.to_ascii_lowercase(), rest[1..1 + close].to_owned()));
        s = &rest[close + 2..];
    }
}

fn include_from(attrs: Vec<(String, String)>, offset: usize) -> Result<Include, ParseError> {
    let mut src = None;
    let mut alt = None;
    let mut continue_on_error = false;
    for (name, value) in attrs {
        match name.as_str() {
            "src" => src = Some(value),
            "alt" => alt = Some(value),
            "onerror" => continue_on_error = value.eq_ignore_ascii_case("continue"),
            _ => {}
        }
    }
    let src = src.filter(|s| !s.is_empty()).ok_or(ParseError::MissingSrc { offset })?;
    Ok(Include {
        src,
        alt,
        continue_on_error,
    })
}

fn push_text(children: &mut Vec<Fragment>, text: &str) {
    if !text.is_empty() {
        children.push(Fragment::Text(text.to_owned()));
    }
}
