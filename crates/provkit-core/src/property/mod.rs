//! Property definitions and queries.
//!
//! Implementations advertise a *property definition*, a set of mandatory
//! `name=value` atoms describing what they provide. Callers pass a
//! *property query*, a set of `name=value` (mandatory) and `name?value`
//! (preference) atoms describing what they require. A definition matches a
//! query when every mandatory query atom is satisfied; the match *score* is
//! the number of satisfied preference atoms and is used to rank candidates.
//!
//! Values are booleans, integers, or strings with textual normalization;
//! see [`parse`](self) for the accepted grammar.

mod parse;

pub use parse::PropertyParseError;

use std::fmt;

/// A normalized property value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropertyValue {
    /// Boolean, written `yes`/`true` or `no`/`false`.
    Bool(bool),
    /// Signed decimal integer.
    Int(i64),
    /// Free-form string; quoted strings keep their case, bare strings are
    /// folded to ASCII lowercase.
    Str(String),
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(true) => f.write_str("yes"),
            Self::Bool(false) => f.write_str("no"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Str(s) => write!(f, "\"{s}\""),
        }
    }
}

/// A single `name=value` or `name?value` atom.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyAtom {
    /// Atom name, ASCII-lowercased.
    pub name: String,
    /// Atom value.
    pub value: PropertyValue,
    /// True for `?` (preference) atoms. Always false inside a definition.
    pub optional: bool,
}

impl fmt::Display for PropertyAtom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = if self.optional { '?' } else { '=' };
        write!(f, "{}{}{}", self.name, op, self.value)
    }
}

/// What an implementation provides: a set of mandatory atoms.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropertyDef {
    atoms: Vec<PropertyAtom>,
}

/// What a caller requires: a set of mandatory and preference atoms.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropertyQuery {
    atoms: Vec<PropertyAtom>,
}

impl PropertyDef {
    /// Parses a property definition.
    ///
    /// # Errors
    ///
    /// Rejects malformed input and `?` atoms, which have no meaning in a
    /// definition.
    pub fn parse(input: &str) -> Result<Self, PropertyParseError> {
        let atoms = parse::parse_atoms(input, false)?;
        Ok(Self { atoms })
    }

    /// The definition's atoms.
    #[must_use]
    pub fn atoms(&self) -> &[PropertyAtom] {
        &self.atoms
    }

    /// Checks this definition against a query.
    ///
    /// Returns `None` when a mandatory query atom is unmet, otherwise the
    /// number of satisfied preference atoms.
    #[must_use]
    pub fn satisfies(&self, query: &PropertyQuery) -> Option<usize> {
        let mut score = 0;
        for atom in &query.atoms {
            let met = self
                .atoms
                .iter()
                .any(|d| d.name == atom.name && d.value == atom.value);
            if met {
                if atom.optional {
                    score += 1;
                }
            } else if !atom.optional {
                return None;
            }
        }
        Some(score)
    }
}

impl PropertyQuery {
    /// The empty query, matched by every definition.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parses a property query.
    ///
    /// # Errors
    ///
    /// Rejects malformed input.
    pub fn parse(input: &str) -> Result<Self, PropertyParseError> {
        let atoms = parse::parse_atoms(input, true)?;
        Ok(Self { atoms })
    }

    /// The query's atoms.
    #[must_use]
    pub fn atoms(&self) -> &[PropertyAtom] {
        &self.atoms
    }

    /// True when the query has no atoms at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.atoms.is_empty()
    }

    /// Looks up an atom by (lowercased) name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&PropertyAtom> {
        self.atoms.iter().find(|a| a.name == name)
    }

    /// Combines this query with the global default query.
    ///
    /// Default atoms are appended unless this query already names the same
    /// atom; an explicit atom always overrides the default of the same name.
    #[must_use]
    pub fn merge_defaults(&self, defaults: &Self) -> Self {
        let mut atoms = self.atoms.clone();
        for atom in &defaults.atoms {
            if !atoms.iter().any(|a| a.name == atom.name) {
                atoms.push(atom.clone());
            }
        }
        Self { atoms }
    }
}

impl fmt::Display for PropertyDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        display_atoms(&self.atoms, f)
    }
}

impl fmt::Display for PropertyQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        display_atoms(&self.atoms, f)
    }
}

fn display_atoms(atoms: &[PropertyAtom], f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for (i, atom) in atoms.iter().enumerate() {
        if i > 0 {
            f.write_str(",")?;
        }
        write!(f, "{atom}")?;
    }
    Ok(())
}
