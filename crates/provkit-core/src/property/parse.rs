//! Parser for property definition and query strings.
//!
//! Grammar, whitespace-insensitive:
//!
//! ```text
//! atoms  := atom ((',' | ws)+ atom)*
//! atom   := name ('=' | '?') value
//! name   := [A-Za-z0-9._-]+
//! value  := '"' .* '"' | '\'' .* '\'' | bare
//! bare   := any run without whitespace or comma
//! ```
//!
//! Bare values normalize: `yes`/`true` and `no`/`false` become booleans,
//! decimal integers become integers, everything else is lowercased text.
//! Quoted values stay verbatim strings.

use thiserror::Error;

use super::{PropertyAtom, PropertyValue};

/// Errors from parsing a property definition or query string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PropertyParseError {
    /// A character that cannot start a property name.
    #[error("unexpected character {1:?} at byte {0}")]
    Unexpected(usize, char),

    /// Property name not followed by `=` or `?`.
    #[error("expected '=' or '?' after property {0:?}")]
    MissingOperator(String),

    /// Operator not followed by a value.
    #[error("missing value for property {0:?}")]
    MissingValue(String),

    /// Quoted value without a closing quote.
    #[error("unterminated quoted value for property {0:?}")]
    UnterminatedQuote(String),

    /// The same atom name appeared twice.
    #[error("duplicate property {0:?}")]
    Duplicate(String),

    /// A `?` atom inside a property definition.
    #[error("preference atom {0:?} not allowed in a property definition")]
    OptionalInDefinition(String),
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')
}

fn normalize_bare(raw: &str) -> PropertyValue {
    let folded = raw.to_ascii_lowercase();
    match folded.as_str() {
        "yes" | "true" => PropertyValue::Bool(true),
        "no" | "false" => PropertyValue::Bool(false),
        _ => folded
            .parse::<i64>()
            .map_or(PropertyValue::Str(folded.clone()), PropertyValue::Int),
    }
}

pub(super) fn parse_atoms(
    input: &str,
    allow_optional: bool,
) -> Result<Vec<PropertyAtom>, PropertyParseError> {
    let mut atoms: Vec<PropertyAtom> = Vec::new();
    let mut it = input.char_indices().peekable();

    loop {
        // Separators: any run of whitespace and commas.
        while let Some(&(_, c)) = it.peek() {
            if c.is_ascii_whitespace() || c == ',' {
                it.next();
            } else {
                break;
            }
        }
        let Some(&(pos, first)) = it.peek() else {
            break;
        };
        if !is_name_char(first) {
            return Err(PropertyParseError::Unexpected(pos, first));
        }

        let mut name = String::new();
        while let Some(&(_, c)) = it.peek() {
            if is_name_char(c) {
                name.push(c.to_ascii_lowercase());
                it.next();
            } else {
                break;
            }
        }

        while let Some(&(_, c)) = it.peek() {
            if c.is_ascii_whitespace() {
                it.next();
            } else {
                break;
            }
        }
        let optional = match it.next() {
            Some((_, '=')) => false,
            Some((_, '?')) => true,
            _ => return Err(PropertyParseError::MissingOperator(name)),
        };
        if optional && !allow_optional {
            return Err(PropertyParseError::OptionalInDefinition(name));
        }

        while let Some(&(_, c)) = it.peek() {
            if c.is_ascii_whitespace() {
                it.next();
            } else {
                break;
            }
        }
        let value = match it.peek() {
            Some(&(_, quote @ ('"' | '\''))) => {
                it.next();
                let mut text = String::new();
                loop {
                    match it.next() {
                        Some((_, c)) if c == quote => break,
                        Some((_, c)) => text.push(c),
                        None => return Err(PropertyParseError::UnterminatedQuote(name)),
                    }
                }
                PropertyValue::Str(text)
            }
            _ => {
                let mut raw = String::new();
                while let Some(&(_, c)) = it.peek() {
                    if c.is_ascii_whitespace() || c == ',' {
                        break;
                    }
                    raw.push(c);
                    it.next();
                }
                if raw.is_empty() {
                    return Err(PropertyParseError::MissingValue(name));
                }
                normalize_bare(&raw)
            }
        };

        if atoms.iter().any(|a| a.name == name) {
            return Err(PropertyParseError::Duplicate(name));
        }
        atoms.push(PropertyAtom {
            name,
            value,
            optional,
        });
    }

    Ok(atoms)
}
