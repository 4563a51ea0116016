//! Minimal tag scanner.
//!
//! Splits a page into plain text and `esi:` directive tags. Everything else,
//! including ordinary HTML, is text. `<!--esi ... -->` wrappers are dropped
//! and their content scanned as if it were outside the comment.

use std::collections::HashMap;

const START: &str = "<esi:";
const END: &str = "</esi:";
const COMMENT_OPEN: &str = "<!--esi";
const COMMENT_CLOSE: &str = "-->";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Token<'a> {
    Text(&'a str),
    /// Complete tag text, from `<` to `>` inclusive.
    Tag(&'a str),
}

#[derive(Debug)]
pub struct Scanner<'a> {
    input: &'a str,
    pos: usize,
    in_esi_comment: bool,
}

impl<'a> Scanner<'a> {
    pub fn new(input: &'a str) -> Self {
        Self {
            input,
            pos: 0,
            in_esi_comment: false,
        }
    }

    /// Offset and kind of the next interesting marker at or after `pos`.
    fn next_marker(&self) -> Option<(usize, Marker)> {
        let rest = &self.input[self.pos..];
        let mut best: Option<(usize, Marker)> = None;
        let mut consider = |offset: Option<usize>, marker: Marker| {
            if let Some(offset) = offset {
                if best.map_or(true, |(b, _)| offset < b) {
                    best = Some((offset, marker));
                }
            }
        };
        consider(rest.find(START), Marker::Tag);
        consider(rest.find(END), Marker::Tag);
        consider(rest.find(COMMENT_OPEN), Marker::CommentOpen);
        if self.in_esi_comment {
            consider(rest.find(COMMENT_CLOSE), Marker::CommentClose);
        }
        best.map(|(offset, marker)| (self.pos + offset, marker))
    }
}

#[derive(Debug, Clone, Copy)]
enum Marker {
    Tag,
    CommentOpen,
    CommentClose,
}

impl<'a> Iterator for Scanner<'a> {
    type Item = Token<'a>;

    fn next(&mut self) -> Option<Token<'a>> {
        loop {
            if self.pos >= self.input.len() {
                return None;
            }
            let Some((at, marker)) = self.next_marker() else {
                let text = &self.input[self.pos..];
                self.pos = self.input.len();
                return Some(Token::Text(text));
            };
            if at > self.pos {
                let text = &self.input[self.pos..at];
                self.pos = at;
                return Some(Token::Text(text));
            }
            match marker {
                Marker::CommentOpen => {
                    self.pos = at + COMMENT_OPEN.len();
                    self.in_esi_comment = true;
                }
                Marker::CommentClose => {
                    self.pos = at + COMMENT_CLOSE.len();
                    self.in_esi_comment = false;
                }
                Marker::Tag => match find_tag_end(&self.input[at..]) {
                    Some(len) => {
                        self.pos = at + len;
                        return Some(Token::Tag(&self.input[at..at + len]));
                    }
                    None => {
                        // Unterminated tag: the rest is text.
                        let text = &self.input[at..];
                        self.pos = self.input.len();
                        return Some(Token::Text(text));
                    }
                },
            }
        }
    }
}

/// Length of the tag starting at `s[0]`, through the closing `>`.
/// A `>` inside a quoted attribute value does not end the tag.
fn find_tag_end(s: &str) -> Option<usize> {
    let mut quote: Option<char> = None;
    for (i, c) in s.char_indices() {
        match (quote, c) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"') | (None, '\'') => quote = Some(c),
            (None, '>') => return Some(i + 1),
            (None, '<') if i > 0 => return None,
            _ => {}
        }
    }
    None
}

/// Whether a start tag closes itself (`<esi:include ... />`).
pub fn is_self_closing(tag: &str) -> bool {
    tag.trim_end_matches('>').trim_end().ends_with('/')
}

/// Element name of a directive tag, without the `esi:` prefix.
pub fn tag_name(tag: &str) -> &str {
    let body = tag
        .strip_prefix(END)
        .or_else(|| tag.strip_prefix(START))
        .unwrap_or(tag);
    let end = body
        .find(|c: char| c.is_whitespace() || c == '/' || c == '>')
        .unwrap_or(body.len());
    &body[..end]
}

/// Attributes of a start tag, entity-decoded.
///
/// Accepts single or double quotes, unquoted values and whitespace around
/// `=`. Later duplicates win.
pub fn parse_attributes(tag: &str) -> HashMap<String, String> {
    let mut attributes = HashMap::new();
    let inner = tag.trim_end_matches('>').trim_end_matches('/');
    let Some(name_end) = inner.find(char::is_whitespace) else {
        return attributes;
    };
    let mut chars = inner[name_end..].chars().peekable();

    loop {
        while chars.next_if(|c| c.is_whitespace() || *c == '/').is_some() {}
        let mut name = String::new();
        while let Some(c) = chars.next_if(|c| !c.is_whitespace() && *c != '=') {
            name.push(c);
        }
        if name.is_empty() {
            break;
        }
        while chars.next_if(|c| c.is_whitespace()).is_some() {}
        if chars.next_if_eq(&'=').is_none() {
            attributes.insert(name, String::new());
            continue;
        }
        while chars.next_if(|c| c.is_whitespace()).is_some() {}

        let mut value = String::new();
        match chars.next_if(|c| *c == '"' || *c == '\'') {
            Some(quote) => {
                for c in chars.by_ref() {
                    if c == quote {
                        break;
                    }
                    value.push(c);
                }
            }
            None => {
                while let Some(c) = chars.next_if(|c| !c.is_whitespace()) {
                    value.push(c);
                }
            }
        }
        attributes.insert(name, decode_entities(&value));
    }
    attributes
}

/// Decode the handful of entities allowed in attribute values.
pub fn decode_entities(value: &str) -> String {
    if !value.contains('&') {
        return value.to_string();
    }
    value
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}
