use std::borrow::Cow;

use crate::error::ParseErrorKind;

/// Expand `$(...)` command substitutions in a raw value.
///
/// Substitutions are recognized by the lexer but never executed, so the raw
/// text is returned unchanged.
pub(crate) fn resolve_commands(raw: &str) -> Result<Cow<'_, str>, ParseErrorKind> {
    Ok(Cow::Borrowed(raw))
}
