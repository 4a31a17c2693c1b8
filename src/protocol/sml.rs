//! SML (SECS Message Language) text codec.
//!
//! Converts between the textual message notation typed by an operator and
//! [`SecsMessage`] values.
//!
//! # Syntax
//!
//! ```text
//! AreYouThere:'S1F1' W
//! <L [2]
//!   <A [4] "MDLN">
//!   <U4 [2] 1 2>
//! >
//! .
//! ```
//!
//! The header may be written `S1F1`, `'S1F1'` or `Name:'S1F1'`, followed
//! by an optional `W`. At most one root item follows; the trailing `.` is
//! optional. Item counts in brackets are optional when parsing and always
//! printed by [`to_sml`].
//!
//! ASCII text is a run of adjacent quoted segments, either `"..."` or
//! `'...'`, with no escapes. Text holding `"` is printed with each `"` in
//! its own `'"'` segment, so `say "hi"` becomes `"say " '"' "hi" '"'`.

// ============================================================================
// Imports
// ============================================================================

use std::fmt::{Display, Write};
use std::str::FromStr;

use crate::error::{Error, Result};

use super::item::{Item, ItemFormat};
use super::message::{MAX_STREAM, SecsMessage};

// ============================================================================
// Constants
// ============================================================================

/// Maximum item nesting accepted from text.
const MAX_DEPTH: usize = 64;

/// Characters that end a bare token.
const DELIMITERS: &str = "<>:.'\"[]";

// ============================================================================
// Public API
// ============================================================================

/// Parses SML text into a message.
///
/// # Errors
///
/// Returns [`Error::MalformedMessage`] on any syntax error.
pub fn parse_sml(text: &str) -> Result<SecsMessage> {
    Parser::new(text).parse_message()
}

/// Renders a message as canonical SML.
#[must_use]
pub fn to_sml(message: &SecsMessage) -> String {
    let mut out = String::new();

    match &message.name {
        Some(name) => {
            let _ = write!(out, "{name}:'{}'", message.label());
        }
        None => out.push_str(&message.label()),
    }

    if message.reply_expected {
        out.push_str(" W");
    }

    if let Some(item) = &message.item {
        out.push('\n');
        write_item(&mut out, item, 0);
    }

    out.push_str("\n.");
    out
}

// ============================================================================
// Rendering
// ============================================================================

fn write_item(out: &mut String, item: &Item, depth: usize) {
    let indent = "  ".repeat(depth);
    let _ = write!(out, "{indent}<{} [{}]", item.format().sml_name(), item.len());

    match item {
        Item::List(items) => {
            if items.is_empty() {
                out.push('>');
                return;
            }
            for child in items {
                out.push('\n');
                write_item(out, child, depth + 1);
            }
            let _ = write!(out, "\n{indent}>");
        }
        Item::Ascii(text) => {
            write_ascii(out, text);
            out.push('>');
        }
        Item::Binary(v) => write_values(out, v.iter().map(|b| format!("0x{b:02X}"))),
        Item::Boolean(v) => write_values(out, v.iter().map(|b| if *b { "T" } else { "F" })),
        Item::U1(v) => write_values(out, v),
        Item::U2(v) => write_values(out, v),
        Item::U4(v) => write_values(out, v),
        Item::U8(v) => write_values(out, v),
        Item::I1(v) => write_values(out, v),
        Item::I2(v) => write_values(out, v),
        Item::I4(v) => write_values(out, v),
        Item::I8(v) => write_values(out, v),
    }
}

fn write_ascii(out: &mut String, text: &str) {
    for (i, part) in text.split('"').enumerate() {
        if i > 0 {
            out.push_str(" '\"'");
        }
        if !part.is_empty() || (i == 0 && !text.starts_with('"')) {
            let _ = write!(out, " \"{part}\"");
        }
    }
}

fn write_values<T: Display>(out: &mut String, values: impl IntoIterator<Item = T>) {
    for value in values {
        let _ = write!(out, " {value}");
    }
    out.push('>');
}

// ============================================================================
// Parser
// ============================================================================

/// Cursor over SML text.
struct Parser<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    fn parse_message(mut self) -> Result<SecsMessage> {
        self.skip_ws();

        let (name, header) = match self.peek() {
            None => return Err(self.error("empty message text")),
            Some('\'') => (None, self.quoted('\'')?),
            Some(_) => {
                let word = self.token();
                if word.is_empty() {
                    return Err(self.error("expected message header"));
                }
                self.skip_ws();
                if self.peek() == Some(':') {
                    self.bump();
                    self.skip_ws();
                    let header = if self.peek() == Some('\'') {
                        self.quoted('\'')?
                    } else {
                        self.token()
                    };
                    (Some(word), header)
                } else {
                    (None, word)
                }
            }
        };

        let (stream, function) = parse_header(header)
            .ok_or_else(|| self.error(format!("invalid message header '{header}'")))?;

        self.skip_ws();
        let reply_expected = self.parse_w_bit()?;

        self.skip_ws();
        let item = if self.peek() == Some('<') {
            Some(self.parse_item(0)?)
        } else {
            None
        };

        self.skip_ws();
        if self.peek() == Some('.') {
            self.bump();
        }
        self.skip_ws();
        if !self.rest().is_empty() {
            return Err(self.error("unexpected trailing input"));
        }

        Ok(SecsMessage {
            stream,
            function,
            reply_expected,
            name: name.map(str::to_string),
            item,
        })
    }

    fn parse_w_bit(&mut self) -> Result<bool> {
        if !matches!(self.peek(), Some('W' | 'w')) {
            return Ok(false);
        }
        let follower = self.rest()[1..].chars().next();
        if follower.is_some_and(|c| !c.is_whitespace() && c != '<' && c != '.') {
            return Err(self.error("unexpected text after message header"));
        }
        self.bump();
        Ok(true)
    }

    fn parse_item(&mut self, depth: usize) -> Result<Item> {
        if depth > MAX_DEPTH {
            return Err(self.error("item nesting too deep"));
        }

        self.expect('<')?;
        self.skip_ws();
        let keyword = self.token();
        let format = ItemFormat::from_sml_name(keyword)
            .ok_or_else(|| self.error(format!("unknown item format '{keyword}'")))?;

        self.skip_ws();
        let declared = if self.peek() == Some('[') {
            self.bump();
            self.skip_ws();
            let count = self.token();
            let count: usize = count
                .parse()
                .map_err(|_| self.error(format!("invalid item count '{count}'")))?;
            self.skip_ws();
            self.expect(']')?;
            Some(count)
        } else {
            None
        };

        let item = match format {
            ItemFormat::List => {
                let mut items = Vec::new();
                loop {
                    self.skip_ws();
                    match self.peek() {
                        Some('<') => items.push(self.parse_item(depth + 1)?),
                        Some('>') => break,
                        Some(c) => return Err(self.error(format!("unexpected '{c}' in list"))),
                        None => return Err(self.error("unterminated list")),
                    }
                }
                Item::List(items)
            }
            ItemFormat::Ascii => {
                let mut text = String::new();
                loop {
                    self.skip_ws();
                    match self.peek() {
                        Some(quote @ ('"' | '\'')) => text.push_str(self.quoted(quote)?),
                        Some('>') => break,
                        Some(c) => {
                            return Err(self.error(format!("unexpected '{c}' in ASCII item")));
                        }
                        None => return Err(self.error("unterminated ASCII item")),
                    }
                }
                Item::Ascii(text)
            }
            _ => {
                let tokens = self.values()?;
                self.convert(format, &tokens)?
            }
        };

        self.skip_ws();
        self.expect('>')?;

        if let Some(count) = declared
            && count != item.len()
        {
            return Err(self.error(format!(
                "{} declares [{count}] but holds {}",
                format.sml_name(),
                item.len()
            )));
        }

        Ok(item)
    }

    /// Collects bare value tokens up to (not including) the closing `>`.
    fn values(&mut self) -> Result<Vec<&'a str>> {
        let mut tokens = Vec::new();
        loop {
            self.skip_ws();
            match self.peek() {
                Some('>') => return Ok(tokens),
                None => return Err(self.error("unterminated item")),
                Some(c) => {
                    let token = self.token();
                    if token.is_empty() {
                        return Err(self.error(format!("unexpected '{c}' in item")));
                    }
                    tokens.push(token);
                }
            }
        }
    }

    fn convert(&self, format: ItemFormat, tokens: &[&str]) -> Result<Item> {
        Ok(match format {
            ItemFormat::Binary => Item::Binary(
                tokens
                    .iter()
                    .map(|t| self.byte(t))
                    .collect::<Result<_>>()?,
            ),
            ItemFormat::Boolean => Item::Boolean(
                tokens
                    .iter()
                    .map(|t| self.boolean(t))
                    .collect::<Result<_>>()?,
            ),
            ItemFormat::U1 => Item::U1(self.numbers(format, tokens)?),
            ItemFormat::U2 => Item::U2(self.numbers(format, tokens)?),
            ItemFormat::U4 => Item::U4(self.numbers(format, tokens)?),
            ItemFormat::U8 => Item::U8(self.numbers(format, tokens)?),
            ItemFormat::I1 => Item::I1(self.numbers(format, tokens)?),
            ItemFormat::I2 => Item::I2(self.numbers(format, tokens)?),
            ItemFormat::I4 => Item::I4(self.numbers(format, tokens)?),
            ItemFormat::I8 => Item::I8(self.numbers(format, tokens)?),
            ItemFormat::List | ItemFormat::Ascii => {
                return Err(self.error("container formats take no bare values"));
            }
        })
    }

    fn numbers<T: FromStr>(&self, format: ItemFormat, tokens: &[&str]) -> Result<Vec<T>> {
        tokens
            .iter()
            .map(|t| {
                t.parse::<T>().map_err(|_| {
                    self.error(format!("invalid {} value '{t}'", format.sml_name()))
                })
            })
            .collect()
    }

    fn byte(&self, token: &str) -> Result<u8> {
        let parsed = match token
            .strip_prefix("0x")
            .or_else(|| token.strip_prefix("0X"))
        {
            Some(hex) => u8::from_str_radix(hex, 16),
            None => token.parse(),
        };
        parsed.map_err(|_| self.error(format!("invalid B value '{token}'")))
    }

    fn boolean(&self, token: &str) -> Result<bool> {
        match token.to_ascii_lowercase().as_str() {
            "t" | "true" | "1" => Ok(true),
            "f" | "false" | "0" => Ok(false),
            _ => Err(self.error(format!("invalid BOOLEAN value '{token}'"))),
        }
    }

    // ------------------------------------------------------------------------
    // Cursor primitives
    // ------------------------------------------------------------------------

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.bump();
        }
    }

    fn expect(&mut self, want: char) -> Result<()> {
        match self.bump() {
            Some(c) if c == want => Ok(()),
            Some(c) => Err(self.error(format!("expected '{want}', found '{c}'"))),
            None => Err(self.error(format!("expected '{want}', found end of input"))),
        }
    }

    fn token(&mut self) -> &'a str {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if c.is_whitespace() || DELIMITERS.contains(c) {
                break;
            }
            self.bump();
        }
        &self.src[start..self.pos]
    }

    fn quoted(&mut self, quote: char) -> Result<&'a str> {
        self.expect(quote)?;
        let start = self.pos;
        loop {
            match self.bump() {
                Some(c) if c == quote => return Ok(&self.src[start..self.pos - c.len_utf8()]),
                Some(_) => {}
                None => return Err(self.error("unterminated quoted text")),
            }
        }
    }

    fn error(&self, reason: impl Display) -> Error {
        Error::malformed(format!("{reason} (at offset {})", self.pos))
    }
}

/// Parses `SxFy` (case-insensitive).
fn parse_header(header: &str) -> Option<(u8, u8)> {
    let upper = header.to_ascii_uppercase();
    let (stream, function) = upper.strip_prefix('S')?.split_once('F')?;
    let stream: u8 = stream.parse().ok()?;
    let function: u8 = function.parse().ok()?;
    (stream <= MAX_STREAM).then_some((stream, function))
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bare_header() {
        let msg = parse_sml("S1F1 W").unwrap();
        assert_eq!((msg.stream, msg.function), (1, 1));
        assert!(msg.reply_expected);
        assert!(msg.name.is_none());
        assert!(msg.item.is_none());
    }

    #[test]
    fn test_parse_named_header_with_terminator() {
        let msg = parse_sml("AreYouThere:'S1F1' W.").unwrap();
        assert_eq!(msg.name.as_deref(), Some("AreYouThere"));
        assert!(msg.reply_expected);
    }

    #[test]
    fn test_parse_quoted_header_without_w() {
        let msg = parse_sml("'s6f11'").unwrap();
        assert_eq!((msg.stream, msg.function), (6, 11));
        assert!(!msg.reply_expected);
    }

    #[test]
    fn test_parse_nested_items() {
        let text = r#"S1F13 W
            <L [3]
                <A "SIM" " DEVICE">
                <B 0x01 2>
                <L
                    <BOOLEAN T false>
                    <I2 -5 7>
                >
            >
            ."#;
        let msg = parse_sml(text).unwrap();
        assert_eq!(
            msg.item,
            Some(Item::list([
                Item::ascii("SIM DEVICE"),
                Item::Binary(vec![1, 2]),
                Item::list([Item::Boolean(vec![true, false]), Item::I2(vec![-5, 7])]),
            ]))
        );
    }

    #[test]
    fn test_to_sml_canonical_form() {
        let msg = SecsMessage::new(1, 2).with_item(Item::list([
            Item::ascii("MDLN"),
            Item::U4(vec![1, 2]),
            Item::list([]),
        ]));
        assert_eq!(
            to_sml(&msg),
            "S1F2\n<L [3]\n  <A [4] \"MDLN\">\n  <U4 [2] 1 2>\n  <L [0]>\n>\n."
        );
    }

    #[test]
    fn test_to_sml_named() {
        let msg = SecsMessage::new(1, 1)
            .with_reply_expected(true)
            .with_name("AreYouThere");
        assert_eq!(to_sml(&msg), "AreYouThere:'S1F1' W\n.");
    }

    #[test]
    fn test_canonical_text_is_stable() {
        let text = "S2F41 W <L <A \"x> >";
        assert!(parse_sml(text).is_err());

        let text = "S2F41 W <L <A \"START\"> <U1 1 2 3> >";
        let first = to_sml(&parse_sml(text).unwrap());
        let second = to_sml(&parse_sml(&first).unwrap());
        assert_eq!(first, second);
    }

    #[test]
    fn test_ascii_with_double_quotes_renders_parseable_text() {
        let msg = SecsMessage::new(1, 4).with_item(Item::ascii("say \"hi\""));
        let text = to_sml(&msg);
        assert_eq!(text, "S1F4\n<A [8] \"say \" '\"' \"hi\" '\"'>\n.");
        assert_eq!(parse_sml(&text).unwrap(), msg);

        let only_quote = SecsMessage::new(1, 4).with_item(Item::ascii("\""));
        assert_eq!(parse_sml(&to_sml(&only_quote)).unwrap(), only_quote);
    }

    #[test]
    fn test_single_quoted_ascii_segments() {
        let msg = parse_sml("S1F4 <A 'it\"s' \" ok\">").unwrap();
        assert_eq!(msg.item, Some(Item::ascii("it\"s ok")));
    }

    #[test]
    fn test_declared_count_mismatch() {
        let err = parse_sml("S1F1 <U4 [3] 1 2>").unwrap_err();
        assert!(matches!(err, Error::MalformedMessage { .. }));
    }

    #[test]
    fn test_malformed_inputs() {
        for text in [
            "",
            "   ",
            "X1F1",
            "S200F1",
            "S1F1 WAIT",
            "S1F1 <U4 1",
            "S1F1 <Q 1>",
            "S1F1 <U1 300>",
            "S1F1 <BOOLEAN maybe>",
            "S1F1 <A \"open>",
            "S1F1 <A 1> extra",
        ] {
            assert!(
                matches!(parse_sml(text), Err(Error::MalformedMessage { .. })),
                "expected failure for {text:?}"
            );
        }
    }

    #[test]
    fn test_from_str() {
        let msg: SecsMessage = "S1F3 W <L <U4 1001>>".parse().unwrap();
        assert_eq!(msg.label(), "S1F3");
    }
}
