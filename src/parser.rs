use std::borrow::Cow;
use std::io::BufRead;
use std::path::Path;

use crate::command::resolve_commands;
use crate::error::{Error, ParseError, ParseErrorKind};
use crate::interpolate::{Lookup, VariableResolver, is_name_byte};
use crate::model::{Entry, Values};

/// Parse dotenv text, resolving references against the process environment.
pub fn parse_str(input: &str) -> Result<Values, Error> {
    parse_with_lookup(input, None, &process_lookup).map_err(Error::from)
}

/// Parse dotenv entries from UTF-8 bytes.
pub fn parse_bytes(input: &[u8]) -> Result<Values, Error> {
    let text = std::str::from_utf8(input)?;
    parse_str(text)
}

/// Parse dotenv entries from a buffered reader.
pub fn parse_reader<R: BufRead>(mut reader: R) -> Result<Values, Error> {
    let mut buf = Vec::new();
    reader.read_to_end(&mut buf)?;
    parse_bytes(&buf)
}

fn process_lookup(name: &str) -> Option<String> {
    std::env::var_os(name).map(|value| value.to_string_lossy().into_owned())
}

pub(crate) fn parse_with_lookup(
    input: &str,
    source: Option<&Path>,
    lookup: Lookup<'_>,
) -> Result<Values, ParseError> {
    let normalized = normalize_newlines(input);
    Lexer::new(normalized.as_ref(), source, lookup)
        .run()
        .map_err(|err| err.with_path(source.map(Path::to_path_buf)))
}

fn normalize_newlines(input: &str) -> Cow<'_, str> {
    if !input.contains('\r') {
        return Cow::Borrowed(input);
    }

    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch == '\r' {
            out.push('\n');
            if chars.peek() == Some(&'\n') {
                chars.next();
            }
            continue;
        }
        out.push(ch);
    }

    Cow::Owned(out)
}

/// PCRE `\s`: space, `\t`, `\n`, `\v`, `\f`, `\r`.
fn is_space(byte: u8) -> bool {
    byte.is_ascii_whitespace() || byte == 0x0b
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    VariableName,
    Value,
}

/// Cursor over the text of a single parse call.
#[derive(Debug)]
struct ParseState<'a> {
    text: &'a str,
    cursor: usize,
    end: usize,
    line: u32,
}

impl<'a> ParseState<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            text,
            cursor: 0,
            end: text.len(),
            line: 1,
        }
    }

    fn bytes(&self) -> &'a [u8] {
        self.text.as_bytes()
    }

    fn at_end(&self) -> bool {
        self.cursor >= self.end
    }

    fn peek(&self) -> Option<u8> {
        self.bytes().get(self.cursor).copied()
    }

    fn advance_to(&mut self, pos: usize) {
        debug_assert!(self.cursor <= pos && pos <= self.end);
        let crossed = self.bytes()[self.cursor..pos]
            .iter()
            .filter(|byte| **byte == b'\n')
            .count();
        self.line += crossed as u32;
        self.cursor = pos;
    }

    fn error(&self, kind: ParseErrorKind) -> ParseError {
        ParseError::new(self.line, self.cursor, kind)
    }

    /// Skip any mix of whitespace, blank lines and `#` comment lines.
    fn skip_empty_lines(&mut self) {
        let bytes = self.bytes();
        let mut pos = self.cursor;
        loop {
            while pos < self.end && is_space(bytes[pos]) {
                pos += 1;
            }
            if pos < self.end && bytes[pos] == b'#' {
                while pos < self.end && bytes[pos] != b'\n' {
                    pos += 1;
                }
            } else {
                break;
            }
        }
        self.advance_to(pos);
    }

    /// End of a value made only of blanks and an optional comment, if the
    /// rest of the line is exactly that.
    fn empty_value_end(&self) -> Option<usize> {
        let bytes = self.bytes();
        let mut pos = self.cursor;
        while matches!(bytes.get(pos), Some(b' ' | b'\t')) {
            pos += 1;
        }
        match bytes.get(pos) {
            None | Some(b'\n') => Some(pos),
            Some(b'#') => Some(
                self.text[pos..]
                    .find('\n')
                    .map_or(self.end, |offset| pos + offset),
            ),
            Some(_) => None,
        }
    }
}

struct Lexer<'a> {
    state: ParseState<'a>,
    values: Values,
    source: Option<&'a Path>,
    lookup: Lookup<'a>,
}

impl<'a> Lexer<'a> {
    fn new(text: &'a str, source: Option<&'a Path>, lookup: Lookup<'a>) -> Self {
        Self {
            state: ParseState::new(text),
            values: Values::new(),
            source,
            lookup,
        }
    }

    fn run(mut self) -> Result<Values, ParseError> {
        let mut state = State::VariableName;
        let mut name = String::new();
        let mut line = self.state.line;

        self.state.skip_empty_lines();

        while !self.state.at_end() {
            match state {
                State::VariableName => {
                    line = self.state.line;
                    name = self.lex_variable_name()?;
                    state = State::Value;
                }
                State::Value => {
                    let value = self.lex_value(line)?;
                    self.insert(std::mem::take(&mut name), value, line);
                    state = State::VariableName;
                }
            }
        }

        // `NAME=` at the very end of the input.
        if state == State::Value {
            self.insert(name, String::new(), line);
        }

        Ok(self.values)
    }

    fn insert(&mut self, key: String, value: String, line: u32) {
        self.values.insert_entry(Entry {
            key,
            value,
            source: self.source.map(Path::to_path_buf),
            line,
        });
    }

    fn lex_variable_name(&mut self) -> Result<String, ParseError> {
        let bytes = self.state.bytes();
        let cursor = self.state.cursor;

        let mut exported = false;
        let mut name_start = cursor;
        if self.state.text[cursor..].starts_with("export") {
            let keyword_end = cursor + "export".len();
            let mut pos = keyword_end;
            while matches!(bytes.get(pos), Some(b' ' | b'\t')) {
                pos += 1;
            }
            if pos > keyword_end && bytes.get(pos).is_some_and(u8::is_ascii_alphabetic) {
                exported = true;
                name_start = pos;
            }
        }

        if !bytes.get(name_start).is_some_and(u8::is_ascii_alphabetic) {
            return Err(self.state.error(ParseErrorKind::InvalidVariableName));
        }

        let mut name_end = name_start + 1;
        while bytes.get(name_end).is_some_and(|byte| is_name_byte(*byte)) {
            name_end += 1;
        }
        self.state.advance_to(name_end);

        match self.state.peek() {
            None | Some(b'\n' | b'#') => {
                let kind = if exported {
                    ParseErrorKind::UnsetVariable
                } else {
                    ParseErrorKind::MissingAssign
                };
                return Err(self.state.error(kind));
            }
            Some(b' ' | b'\t') => {
                return Err(self.state.error(ParseErrorKind::WhitespaceAfterName));
            }
            Some(b'=') => {}
            Some(_) => return Err(self.state.error(ParseErrorKind::MissingAssign)),
        }

        self.state.advance_to(name_end + 1);
        Ok(self.state.text[name_start..name_end].to_owned())
    }

    fn lex_value(&mut self, line: u32) -> Result<String, ParseError> {
        if let Some(pos) = self.state.empty_value_end() {
            self.state.advance_to(pos);
            self.state.skip_empty_lines();
            return Ok(String::new());
        }

        if matches!(self.state.peek(), Some(b' ' | b'\t')) {
            return Err(self.state.error(ParseErrorKind::WhitespaceBeforeValue));
        }

        let mut value = String::new();
        loop {
            match self.state.peek() {
                Some(b'\'') => value.push_str(self.lex_single_quoted()?),
                Some(b'"') => value.push_str(&self.lex_double_quoted(line)?),
                _ => {
                    let (segment, comment) = self.lex_unquoted(line)?;
                    value.push_str(&segment);
                    if comment {
                        break;
                    }
                }
            }

            // Adjacent segments such as `"a"b'c'` join into one value.
            if matches!(self.state.peek(), None | Some(b'\n')) {
                break;
            }
        }

        self.state.skip_empty_lines();
        Ok(value)
    }

    fn lex_single_quoted(&mut self) -> Result<&'a str, ParseError> {
        let text = self.state.text;
        let start = self.state.cursor + 1;

        let Some(offset) = text[start..].find('\'') else {
            self.state.advance_to(self.state.end);
            return Err(self.state.error(ParseErrorKind::UnterminatedQuote));
        };

        let close = start + offset;
        self.state.advance_to(close + 1);
        Ok(&text[start..close])
    }

    fn lex_double_quoted(&mut self, line: u32) -> Result<String, ParseError> {
        let bytes = self.state.bytes();
        let start = self.state.cursor + 1;

        let mut pos = start;
        loop {
            if pos >= self.state.end {
                self.state.advance_to(self.state.end);
                return Err(self.state.error(ParseErrorKind::UnterminatedQuote));
            }
            if bytes[pos] == b'"' && !is_escaped_quote(bytes, pos) {
                break;
            }
            pos += 1;
        }

        let raw = &self.state.text[start..pos];
        self.state.advance_to(pos + 1);

        let unescaped = raw
            .replace("\\\"", "\"")
            .replace("\\r", "\r")
            .replace("\\n", "\n");
        self.resolve(&unescaped, line)
    }

    /// Returns the resolved segment and whether an inline comment ended it.
    fn lex_unquoted(&mut self, line: u32) -> Result<(String, bool), ParseError> {
        let bytes = self.state.bytes();
        let end = self.state.end;
        let mut pos = self.state.cursor;
        let mut raw = Vec::new();

        loop {
            if bytes[pos] == b'\\' && matches!(bytes.get(pos + 1), Some(b'"' | b'\'')) {
                pos += 1;
            }
            let current = bytes[pos];
            raw.push(current);

            if current == b'$' && bytes.get(pos + 1) == Some(&b'(') {
                pos += 1;
                let nested = self.lex_nested_expression(&mut pos)?;
                raw.push(b'(');
                raw.extend_from_slice(&nested);
                raw.push(b')');
            }

            pos += 1;
            if pos >= end {
                break;
            }
            let next = bytes[pos];
            if matches!(next, b'\n' | b'"' | b'\'') {
                break;
            }
            if matches!(current, b' ' | b'\t') && next == b'#' {
                break;
            }
        }

        self.state.advance_to(pos);
        let comment = self.state.peek() == Some(b'#');

        let raw = String::from_utf8_lossy(&raw);
        let raw = raw.trim_end_matches([' ', '\t', '\n', '\r', '\0', '\x0b']);
        let resolved = self.resolve(raw, line)?;

        // Literal spaces are only allowed when quoted; spaces produced by
        // interpolation change the text and pass.
        if resolved == raw && raw.bytes().any(is_space) {
            return Err(self.state.error(ParseErrorKind::UnquotedSpaces));
        }

        Ok((resolved, comment))
    }

    /// Consume a balanced `( ... )` group; `pos` enters on `(` and leaves on
    /// the matching `)`. Returns the text between the parentheses.
    fn lex_nested_expression(&mut self, pos: &mut usize) -> Result<Vec<u8>, ParseError> {
        let bytes = self.state.bytes();
        let mut nested = Vec::new();

        *pos += 1;
        loop {
            match bytes.get(*pos) {
                None | Some(b'\n') => {
                    self.state.advance_to((*pos).min(self.state.end));
                    return Err(self.state.error(ParseErrorKind::UnclosedParenthesis));
                }
                Some(b')') => return Ok(nested),
                Some(&byte) => {
                    nested.push(byte);
                    if byte == b'(' {
                        let inner = self.lex_nested_expression(pos)?;
                        nested.extend_from_slice(&inner);
                        nested.push(b')');
                    }
                    *pos += 1;
                }
            }
        }
    }

    /// Run a raw segment through variable and command resolution, then
    /// collapse escaped backslashes.
    fn resolve(&mut self, raw: &str, line: u32) -> Result<String, ParseError> {
        let mut resolver = VariableResolver::new(&mut self.values, self.lookup, self.source, line);
        let variables = resolver
            .resolve(raw)
            .map_err(|kind| self.state.error(kind))?;
        let commands = resolve_commands(&variables).map_err(|kind| self.state.error(kind))?;
        Ok(commands.replace("\\\\", "\\"))
    }
}

/// A `"` preceded by `\` is escaped unless that backslash is itself escaped.
fn is_escaped_quote(bytes: &[u8], idx: usize) -> bool {
    idx >= 1
        && bytes[idx - 1] == b'\\'
        && (idx < 2 || bytes[idx - 2] != b'\\')
}
