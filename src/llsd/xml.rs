//! LLSD XML encoding.
//!
//! The writer emits a compact, canonical document: no insignificant
//! whitespace, booleans as `1`/`0`, reals in shortest round-trip form. The
//! reader is more forgiving and accepts the pretty-printed output of other
//! LLSD implementations (indentation, self-closing scalar elements,
//! `true`/`false` booleans, an optional XML declaration and comments).

use super::value::{parse_bool_text, LlsdMap, LlsdValue};
use crate::error::Error;
use crate::Result;
use std::fmt::Write;

pub const XML_HEADER: &str = r#"<?xml version="1.0" encoding="utf-8"?>"#;

/// Maximum container nesting accepted by the reader.
pub const MAX_DEPTH: usize = 128;

/// Serializes a value as a complete LLSD XML document.
pub fn to_string(value: &LlsdValue) -> String {
    let mut out = String::with_capacity(256);
    out.push_str(XML_HEADER);
    out.push_str("<llsd>");
    write_value(&mut out, value);
    out.push_str("</llsd>");
    out
}

/// Serializes a map as a complete LLSD XML document without wrapping it.
pub fn map_to_string(map: &LlsdMap) -> String {
    let mut out = String::with_capacity(256);
    out.push_str(XML_HEADER);
    out.push_str("<llsd>");
    write_map(&mut out, map);
    out.push_str("</llsd>");
    out
}

fn write_value(out: &mut String, value: &LlsdValue) {
    match value {
        LlsdValue::Undef => out.push_str("<undef />"),
        LlsdValue::Boolean(true) => out.push_str("<boolean>1</boolean>"),
        LlsdValue::Boolean(false) => out.push_str("<boolean>0</boolean>"),
        LlsdValue::Integer(i) => {
            let _ = write!(out, "<integer>{}</integer>", i);
        }
        LlsdValue::Real(r) => {
            let _ = write!(out, "<real>{}</real>", r);
        }
        LlsdValue::String(s) => {
            out.push_str("<string>");
            escape_into(out, s);
            out.push_str("</string>");
        }
        LlsdValue::Array(items) => {
            out.push_str("<array>");
            for item in items {
                write_value(out, item);
            }
            out.push_str("</array>");
        }
        LlsdValue::Map(map) => write_map(out, map),
    }
}

fn write_map(out: &mut String, map: &LlsdMap) {
    out.push_str("<map>");
    for (key, value) in map {
        out.push_str("<key>");
        escape_into(out, key);
        out.push_str("</key>");
        write_value(out, value);
    }
    out.push_str("</map>");
}

fn escape_into(out: &mut String, text: &str) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            // XML readers normalize bare carriage returns away.
            '\r' => out.push_str("&#13;"),
            _ => out.push(c),
        }
    }
}

/// Parses a complete LLSD XML document.
pub fn from_str(src: &str) -> Result<LlsdValue> {
    let mut reader = Reader::new(src.trim_start_matches('\u{feff}'));
    reader.skip_misc()?;
    let (name, empty) = reader.open_tag()?;
    if name != "llsd" {
        return Err(Error::decode(0, format!("expected <llsd> root, found <{}>", name)));
    }

    let value = if empty {
        LlsdValue::Undef
    } else {
        reader.skip_ws();
        let value = if reader.at_close() {
            LlsdValue::Undef
        } else {
            reader.value()?
        };
        reader.skip_ws();
        reader.close_tag("llsd")?;
        value
    };

    reader.skip_misc()?;
    if !reader.rest().is_empty() {
        return Err(reader.err("trailing content after </llsd>"));
    }
    Ok(value)
}

struct Reader<'a> {
    src: &'a str,
    pos: usize,
    depth: usize,
}

impl<'a> Reader<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, pos: 0, depth: 0 }
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn err(&self, msg: impl Into<String>) -> Error {
        Error::decode(self.pos, msg)
    }

    fn skip_ws(&mut self) {
        let rest = self.rest();
        let trimmed = rest.trim_start_matches([' ', '\t', '\r', '\n']);
        self.pos += rest.len() - trimmed.len();
    }

    /// Skips whitespace, processing instructions and comments.
    fn skip_misc(&mut self) -> Result<()> {
        loop {
            self.skip_ws();
            let rest = self.rest();
            let terminator = if rest.starts_with("<?") {
                "?>"
            } else if rest.starts_with("<!--") {
                "-->"
            } else {
                return Ok(());
            };
            let end = rest
                .find(terminator)
                .ok_or_else(|| self.err("unterminated declaration or comment"))?;
            self.pos += end + terminator.len();
        }
    }

    fn at_close(&self) -> bool {
        self.rest().starts_with("</")
    }

    fn expect(&mut self, lit: &str) -> Result<()> {
        if self.rest().starts_with(lit) {
            self.pos += lit.len();
            Ok(())
        } else {
            Err(self.err(format!("expected '{}'", lit)))
        }
    }

    /// Reads `<name ...>` or `<name .../>`, ignoring attributes.
    fn open_tag(&mut self) -> Result<(&'a str, bool)> {
        self.expect("<")?;
        let rest = self.rest();
        let name_len = rest
            .find(|c: char| c.is_ascii_whitespace() || c == '>' || c == '/')
            .ok_or_else(|| self.err("unterminated tag"))?;
        if name_len == 0 {
            return Err(self.err("empty tag name"));
        }
        let name = &rest[..name_len];
        let after = &rest[name_len..];
        let close = after.find('>').ok_or_else(|| self.err("unterminated tag"))?;
        let self_closing = after[..close].trim_end().ends_with('/');
        self.pos += name_len + close + 1;
        Ok((name, self_closing))
    }

    fn close_tag(&mut self, name: &str) -> Result<()> {
        self.expect("</")?;
        if !self.rest().starts_with(name) {
            return Err(self.err(format!("expected closing tag for <{}>", name)));
        }
        self.pos += name.len();
        self.skip_ws();
        self.expect(">")
    }

    fn text(&mut self) -> Result<String> {
        let start = self.pos;
        let rest = self.rest();
        let end = rest.find('<').ok_or_else(|| self.err("unterminated element text"))?;
        self.pos += end;
        unescape(&rest[..end], start)
    }

    /// Text content of a scalar element whose open tag was just consumed.
    fn scalar(&mut self, name: &str, empty: bool) -> Result<String> {
        if empty {
            return Ok(String::new());
        }
        let text = self.text()?;
        self.close_tag(name)?;
        Ok(text)
    }

    fn enter(&mut self) -> Result<()> {
        if self.depth >= MAX_DEPTH {
            return Err(self.err(format!("nesting deeper than {} levels", MAX_DEPTH)));
        }
        self.depth += 1;
        Ok(())
    }

    fn value(&mut self) -> Result<LlsdValue> {
        self.skip_ws();
        let start = self.pos;
        let (name, empty) = self.open_tag()?;
        match name {
            "undef" => {
                if !empty {
                    self.skip_ws();
                    self.close_tag(name)?;
                }
                Ok(LlsdValue::Undef)
            }
            "boolean" => {
                let text = self.scalar(name, empty)?;
                let text = text.trim();
                match text {
                    "" | "0" => Ok(LlsdValue::Boolean(false)),
                    "1" => Ok(LlsdValue::Boolean(true)),
                    other => parse_bool_text(other).map(LlsdValue::Boolean).ok_or_else(|| {
                        Error::decode(start, format!("invalid boolean '{}'", other))
                    }),
                }
            }
            "integer" => {
                let text = self.scalar(name, empty)?;
                let text = text.trim();
                if text.is_empty() {
                    return Ok(LlsdValue::Integer(0));
                }
                text.parse::<i32>()
                    .map(LlsdValue::Integer)
                    .map_err(|e| Error::decode(start, format!("invalid integer '{}': {}", text, e)))
            }
            "real" => {
                let text = self.scalar(name, empty)?;
                let text = text.trim();
                if text.is_empty() {
                    return Ok(LlsdValue::Real(0.0));
                }
                text.parse::<f64>()
                    .map(LlsdValue::Real)
                    .map_err(|e| Error::decode(start, format!("invalid real '{}': {}", text, e)))
            }
            // Richer LLSD scalars have no dedicated variant and decode as text.
            "string" | "uuid" | "uri" | "date" => {
                Ok(LlsdValue::String(self.scalar(name, empty)?))
            }
            "array" => {
                let mut items = Vec::new();
                if !empty {
                    self.enter()?;
                    loop {
                        self.skip_ws();
                        if self.at_close() {
                            self.close_tag(name)?;
                            break;
                        }
                        items.push(self.value()?);
                    }
                    self.depth -= 1;
                }
                Ok(LlsdValue::Array(items))
            }
            "map" => {
                let mut map = LlsdMap::new();
                if !empty {
                    self.enter()?;
                    loop {
                        self.skip_ws();
                        if self.at_close() {
                            self.close_tag(name)?;
                            break;
                        }
                        let (tag, key_empty) = self.open_tag()?;
                        if tag != "key" {
                            return Err(self.err(format!("expected <key> in map, found <{}>", tag)));
                        }
                        let key = self.scalar("key", key_empty)?;
                        let value = self.value()?;
                        map.insert(key, value);
                    }
                    self.depth -= 1;
                }
                Ok(LlsdValue::Map(map))
            }
            other => Err(Error::decode(start, format!("unsupported element <{}>", other))),
        }
    }
}

fn unescape(raw: &str, offset: usize) -> Result<String> {
    if !raw.contains('&') {
        return Ok(raw.to_string());
    }
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        let after = &rest[amp + 1..];
        let semi = after
            .find(';')
            .ok_or_else(|| Error::decode(offset, "unterminated entity reference"))?;
        let entity = &after[..semi];
        let ch = match entity {
            "amp" => '&',
            "lt" => '<',
            "gt" => '>',
            "quot" => '"',
            "apos" => '\'',
            _ => {
                let code = if let Some(hex) =
                    entity.strip_prefix("#x").or_else(|| entity.strip_prefix("#X"))
                {
                    u32::from_str_radix(hex, 16).ok()
                } else if let Some(dec) = entity.strip_prefix('#') {
                    dec.parse::<u32>().ok()
                } else {
                    None
                };
                code.and_then(char::from_u32).ok_or_else(|| {
                    Error::decode(offset, format!("unknown entity '&{};'", entity))
                })?
            }
        };
        out.push(ch);
        rest = &after[semi + 1..];
    }
    out.push_str(rest);
    Ok(out)
}
