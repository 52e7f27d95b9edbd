//! Message body markup
//!
//! A body on the wire looks like
//! `<n3c0/><f x09927b62="3"><b>hello&amp;bye</b>`:
//! an optional name tag, an optional font tag, then text that may contain
//! `<br/>` and `<b>`/`<i>`/`<u>` wrappers, HTML-escaped.

use crate::error::ProtocolError;
use crate::style::{is_hex_color, FontFamily, Style};

/// Hard cap on wrapper tags peeled off one body
const MAX_WRAPPER_DEPTH: usize = 9;

/// Anonymous senders carry a 4-digit tag in place of a name colour
pub const ANON_TAG_LEN: usize = 4;

/// Decoded body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedBody {
    pub body: String,
    pub style: Style,
    /// `<n####/>` digits, present on anonymous messages
    pub anon_tag: Option<String>,
}

/// How the sender's identity shapes outgoing markup
#[derive(Debug, Clone, Copy)]
pub enum SenderMarkup<'a> {
    Registered(&'a Style),
    Temporary,
    /// Tag digits, normally derived from server time
    Anonymous(&'a str),
}

/// Parse a raw message payload into body and style
pub fn parse_markup(raw: &str) -> Result<ParsedBody, ProtocolError> {
    let mut style = Style::default();
    let mut anon_tag = None;
    let mut rest = raw;

    if let Some(after) = rest.strip_prefix("<n") {
        let end = after
            .find("/>")
            .ok_or_else(|| ProtocolError::Markup("unterminated name tag".into()))?;
        let value = &after[..end];
        if value.is_empty() {
            style.name_color.clear();
        } else if value.len() == ANON_TAG_LEN && value.bytes().all(|b| b.is_ascii_digit()) {
            anon_tag = Some(value.to_string());
        } else if is_hex_color(value) {
            style.name_color = value.to_string();
        } else {
            return Err(ProtocolError::Markup(format!("bad name tag {:?}", value)));
        }
        rest = &after[end + 2..];
    }

    if rest.starts_with("<f ") {
        let end = rest
            .find('>')
            .ok_or_else(|| ProtocolError::Markup("unterminated font tag".into()))?;
        parse_font_tag(&rest[3..end], &mut style)?;
        rest = &rest[end + 1..];
        rest = rest.strip_suffix("</f>").unwrap_or(rest);
    }

    let mut body = rest.replace("<br/>", "\n");
    strip_wrappers(&mut body, &mut style);

    Ok(ParsedBody {
        body: unescape_html(&body),
        style,
        anon_tag,
    })
}

/// `x{size}{color}="{family}"`, every part optional
fn parse_font_tag(attr: &str, style: &mut Style) -> Result<(), ProtocolError> {
    let bad = || ProtocolError::Markup(format!("bad font tag {:?}", attr));

    let attr = attr.strip_prefix('x').ok_or_else(bad)?;
    let (sizing, family) = match attr.split_once('=') {
        Some((sizing, family)) => (sizing, family.trim_matches('"')),
        None => (attr, ""),
    };

    let (size, color) = match sizing.len() {
        0 | 3 | 6 if sizing.bytes().all(|b| b.is_ascii_hexdigit()) => ("", sizing),
        2 | 5 | 8 if sizing.is_ascii() => sizing.split_at(2),
        _ => return Err(bad()),
    };

    if !size.is_empty() {
        let size: u8 = size.parse().map_err(|_| bad())?;
        style.set_font_size(size);
    }
    if !color.is_empty() {
        if !is_hex_color(color) {
            return Err(bad());
        }
        style.text_color = color.to_string();
    }
    if !family.is_empty() {
        style.font_family = family
            .parse::<u8>()
            .ok()
            .and_then(FontFamily::from_index)
            .ok_or_else(bad)?;
    }
    Ok(())
}

/// Peel `<b>`/`<i>`/`<u>` pairs that wrap the whole body, outermost first
fn strip_wrappers(body: &mut String, style: &mut Style) {
    for _ in 0..MAX_WRAPPER_DEPTH {
        let flag = if peel(body, "b") {
            &mut style.bold
        } else if peel(body, "i") {
            &mut style.italics
        } else if peel(body, "u") {
            &mut style.underline
        } else {
            return;
        };
        *flag = true;
    }
}

fn peel(body: &mut String, tag: &str) -> bool {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    if body.len() < open.len() + close.len() || !body.starts_with(&open) || !body.ends_with(&close)
    {
        return false;
    }
    body.truncate(body.len() - close.len());
    body.drain(..open.len());
    true
}

/// Serialize a body for `bm`
pub fn encode_markup(body: &str, sender: SenderMarkup<'_>) -> String {
    let text = escape_html(body).replace("\r\n", "<br/>").replace('\n', "<br/>");
    match sender {
        SenderMarkup::Temporary => text,
        SenderMarkup::Anonymous(tag) => format!("<n{}/>{}", tag, text),
        SenderMarkup::Registered(style) => {
            let mut text = text;
            if style.bold {
                text = format!("<b>{}</b>", text);
            }
            if style.italics {
                text = format!("<i>{}</i>", text);
            }
            if style.underline {
                text = format!("<u>{}</u>", text);
            }
            let name_tag = if style.name_color.is_empty() {
                String::new()
            } else {
                format!("<n{}/>", style.name_color)
            };
            format!(
                "{}<f x{:02}{}=\"{}\">{}",
                name_tag,
                style.font_size,
                style.text_color,
                style.font_family.index(),
                text
            )
        }
    }
}

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// Decode named and numeric entities; unknown ones are left verbatim
pub fn unescape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find('&') {
        out.push_str(&rest[..start]);
        rest = &rest[start..];
        let decoded = rest
            .find(';')
            .filter(|&end| end <= 10)
            .and_then(|end| decode_entity(&rest[1..end]).map(|c| (c, end)));
        match decoded {
            Some((c, end)) => {
                out.push(c);
                rest = &rest[end + 1..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }
    out.push_str(rest);
    out
}

fn decode_entity(name: &str) -> Option<char> {
    match name {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "nbsp" => Some('\u{a0}'),
        _ => {
            let num = name.strip_prefix('#')?;
            let code = match num.strip_prefix(['x', 'X']) {
                Some(hex) => u32::from_str_radix(hex, 16).ok()?,
                None => num.parse().ok()?,
            };
            char::from_u32(code)
        }
    }
}
