//! `$NAME` / `${NAME}` / `${NAME:-default}` / `${NAME:=default}` expansion.
//!
//! References resolve against the values already declared in the current
//! file first, then against the live environment. Unset names expand to the
//! empty string.

use std::borrow::Cow;
use std::ops::Range;
use std::path::Path;

use crate::error::ParseErrorKind;
use crate::model::{Entry, Values};

/// Characters a default value may not contain.
const UNSUPPORTED_DEFAULT_CHARS: [char; 4] = ['\'', '"', '{', '$'];

pub(crate) type Lookup<'a> = &'a dyn Fn(&str) -> Option<String>;

pub(crate) struct VariableResolver<'a> {
    values: &'a mut Values,
    lookup: Lookup<'a>,
    source: Option<&'a Path>,
    line: u32,
}

/// One `$` reference and the parts it captured.
#[derive(Debug)]
struct Reference {
    /// Start of the backslash run preceding `$`.
    start: usize,
    dollar: usize,
    end: usize,
    opening_brace: bool,
    name: Option<Range<usize>>,
    default: Option<DefaultClause>,
    closing_brace: bool,
}

#[derive(Debug)]
struct DefaultClause {
    /// `:=` also stores the default under the referenced name.
    assign: bool,
    text: Range<usize>,
}

impl<'a> VariableResolver<'a> {
    pub(crate) fn new(
        values: &'a mut Values,
        lookup: Lookup<'a>,
        source: Option<&'a Path>,
        line: u32,
    ) -> Self {
        Self {
            values,
            lookup,
            source,
            line,
        }
    }

    pub(crate) fn resolve<'r>(&mut self, raw: &'r str) -> Result<Cow<'r, str>, ParseErrorKind> {
        if !raw.contains('$') {
            return Ok(Cow::Borrowed(raw));
        }

        let mut out = String::with_capacity(raw.len());
        let mut copied = 0usize;
        let mut search = 0usize;

        while let Some(reference) = find_reference(raw, search) {
            out.push_str(&raw[copied..reference.start]);
            self.expand(raw, &reference, &mut out)?;
            copied = reference.end;
            search = reference.end;
        }

        out.push_str(&raw[copied..]);
        Ok(Cow::Owned(out))
    }

    fn expand(
        &mut self,
        raw: &str,
        reference: &Reference,
        out: &mut String,
    ) -> Result<(), ParseErrorKind> {
        let backslashes = &raw[reference.start..reference.dollar];

        // An odd run escapes the `$`; one backslash is consumed as the marker.
        if backslashes.len() % 2 == 1 {
            out.push_str(&raw[reference.start + 1..reference.end]);
            return Ok(());
        }

        let Some(name_range) = reference.name.clone() else {
            out.push_str(&raw[reference.start..reference.end]);
            return Ok(());
        };

        if reference.opening_brace && !reference.closing_brace {
            return Err(ParseErrorKind::UnclosedBrace);
        }

        let name = &raw[name_range];
        let mut value = match self.values.get(name) {
            Some(value) => value.to_owned(),
            None => (self.lookup)(name).unwrap_or_default(),
        };

        if value.is_empty()
            && let Some(default) = &reference.default
        {
            let text = &raw[default.text.clone()];
            if let Some(ch) = text.chars().find(|ch| UNSUPPORTED_DEFAULT_CHARS.contains(ch)) {
                return Err(ParseErrorKind::UnsupportedDefaultChar {
                    ch,
                    name: name.to_owned(),
                });
            }

            value = text.to_owned();
            if default.assign {
                self.values.insert_entry(Entry {
                    key: name.to_owned(),
                    value: value.clone(),
                    source: self.source.map(Path::to_path_buf),
                    line: self.line,
                });
            }
        }

        out.push_str(backslashes);
        out.push_str(&value);
        if !reference.opening_brace && reference.closing_brace {
            out.push('}');
        }
        Ok(())
    }
}

/// Find the first reference starting at or after `from`.
///
/// A reference starts at a run of backslashes that is not itself preceded by
/// a backslash, followed by a `$` that does not open a `$(` substitution.
fn find_reference(raw: &str, from: usize) -> Option<Reference> {
    let bytes = raw.as_bytes();
    let mut search = from;

    loop {
        let dollar = search + raw[search..].find('$')?;
        let mut start = dollar;
        while start > search && bytes[start - 1] == b'\\' {
            start -= 1;
        }

        let escaped_run = start > 0 && bytes[start - 1] == b'\\';
        if escaped_run || bytes.get(dollar + 1) == Some(&b'(') {
            search = dollar + 1;
            continue;
        }

        let mut pos = dollar + 1;
        let opening_brace = bytes.get(pos) == Some(&b'{');
        if opening_brace {
            pos += 1;
        }

        let name_start = pos;
        if bytes.get(pos).is_some_and(u8::is_ascii_alphabetic) {
            pos += 1;
            while bytes.get(pos).is_some_and(|byte| is_name_byte(*byte)) {
                pos += 1;
            }
        }
        let name = (pos > name_start).then_some(name_start..pos);

        let mut default = None;
        if bytes.get(pos) == Some(&b':') && matches!(bytes.get(pos + 1), Some(b'-' | b'=')) {
            let text_start = pos + 2;
            let text_end = raw[text_start..]
                .find('}')
                .map_or(raw.len(), |offset| text_start + offset);
            if text_end > text_start {
                default = Some(DefaultClause {
                    assign: bytes[pos + 1] == b'=',
                    text: text_start..text_end,
                });
                pos = text_end;
            }
        }

        let closing_brace = bytes.get(pos) == Some(&b'}');
        if closing_brace {
            pos += 1;
        }

        return Some(Reference {
            start,
            dollar,
            end: pos,
            opening_brace,
            name,
            default,
            closing_brace,
        });
    }
}

pub(crate) fn is_name_byte(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'_'
}
