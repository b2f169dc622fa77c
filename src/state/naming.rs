//! Display-name templates and activity-based status.
//!
//! Templates use `$name` / `${name}` placeholders with `$$` as a literal
//! dollar sign. Recognized placeholders are `no` (channel number) and `game`
//! (derived status). Placeholder names are case-sensitive.

use thiserror::Error;

/// Status used for occupants with no playing/streaming activity.
pub const GENERAL_STATUS: &str = "General";

/// Template substitution errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("unknown placeholder '{0}'")]
    UnknownPlaceholder(String),
    #[error("invalid placeholder at byte {0}")]
    Malformed(usize),
}

/// Render a template, falling back to the raw template on any error.
///
/// Display names must never block on bad user input, so this is total.
pub fn render(template: &str, no: u32, game: &str) -> String {
    try_render(template, no, game).unwrap_or_else(|_| template.to_string())
}

/// Render a template strictly.
pub fn try_render(template: &str, no: u32, game: &str) -> Result<String, TemplateError> {
    let no = no.to_string();
    substitute(template, &[("no", no.as_str()), ("game", game)])
}

/// Check that a template renders with sample values.
pub fn validate_template(template: &str) -> Result<(), TemplateError> {
    try_render(template, 1, GENERAL_STATUS).map(|_| ())
}

fn substitute(template: &str, vars: &[(&str, &str)]) -> Result<String, TemplateError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let offset = template.len() - rest.len() + pos;
        let after = &rest[pos + 1..];

        if let Some(tail) = after.strip_prefix('$') {
            out.push('$');
            rest = tail;
            continue;
        }

        let (name, tail) = match after.strip_prefix('{') {
            Some(inner) => {
                let len = identifier_len(inner);
                match inner[len..].strip_prefix('}') {
                    Some(tail) if len > 0 => (&inner[..len], tail),
                    _ => return Err(TemplateError::Malformed(offset)),
                }
            }
            None => {
                let len = identifier_len(after);
                if len == 0 {
                    return Err(TemplateError::Malformed(offset));
                }
                (&after[..len], &after[len..])
            }
        };

        let value = vars
            .iter()
            .find(|(key, _)| *key == name)
            .map(|(_, value)| *value)
            .ok_or_else(|| TemplateError::UnknownPlaceholder(name.to_string()))?;
        out.push_str(value);
        rest = tail;
    }

    out.push_str(rest);
    Ok(out)
}

/// Length in bytes of the ASCII identifier (`[_A-Za-z][_A-Za-z0-9]*`) at the start of `s`.
fn identifier_len(s: &str) -> usize {
    let bytes = s.as_bytes();
    match bytes.first() {
        Some(b) if *b == b'_' || b.is_ascii_alphabetic() => {}
        _ => return 0,
    }
    bytes
        .iter()
        .position(|b| !(*b == b'_' || b.is_ascii_alphanumeric()))
        .unwrap_or(bytes.len())
}

/// Derive the status shown in a channel name from its occupants' activities.
///
/// Each occupant votes once: the name of their playing/streaming activity, or
/// [`GENERAL_STATUS`] when they have none. The most frequent name wins; ties go
/// to the name that was seen first. No occupants yields [`GENERAL_STATUS`].
pub fn game_status<'a, I>(activities: I) -> String
where
    I: IntoIterator<Item = Option<&'a str>>,
{
    let mut tally: Vec<(&str, usize)> = Vec::new();
    for activity in activities {
        let name = activity.unwrap_or(GENERAL_STATUS);
        match tally.iter_mut().find(|(seen, _)| *seen == name) {
            Some((_, count)) => *count += 1,
            None => tally.push((name, 1)),
        }
    }

    let mut winner: Option<(&str, usize)> = None;
    for (name, count) in tally {
        if winner.is_none_or(|(_, best)| count > best) {
            winner = Some((name, count));
        }
    }

    winner
        .map(|(name, _)| name.to_string())
        .unwrap_or_else(|| GENERAL_STATUS.to_string())
}
