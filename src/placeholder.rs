//! Placeholder identifiers for cross-references whose target id is not known
//! when the record is built.
//!
//! On the wire a placeholder occupies the id field it stands in for, so it is
//! encoded as a marker-prefixed string: `NeedIdHaveRef:<ref>` for a forward
//! reference and `NoRepl:<value>` for a value that must pass through
//! untouched. Anything else is a concrete target id.

use crate::model::{ExternalKey, IdMap, SourceRef, TargetId};
use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub const NEEDS_REPLACEMENT_MARKER: &str = "NeedIdHaveRef:";
pub const NO_REPLACEMENT_MARKER: &str = "NoRepl:";

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum Placeholder {
    /// Must be substituted with the target id of `ref` before upload.
    NeedsReplacement(SourceRef),
    /// Looks like it needs substitution but must be passed through verbatim.
    NoReplacement(String),
    /// Already resolved.
    Concrete(TargetId),
}

impl Placeholder {
    /// Forward reference to the record identified by `source_ref`.
    pub fn needs(source_ref: &SourceRef) -> Result<Self> {
        if source_ref.is_empty() {
            bail!("ref is nil or empty");
        }
        Ok(Placeholder::NeedsReplacement(source_ref.clone()))
    }

    /// Value that must survive resolution unchanged.
    pub fn no_replacement(value: &str) -> Result<Self> {
        if value.is_empty() {
            bail!("ref is nil or empty");
        }
        Ok(Placeholder::NoReplacement(value.to_string()))
    }

    /// Decode the wire form.
    pub fn parse(raw: &str) -> Self {
        if let Some(rest) = raw.strip_prefix(NO_REPLACEMENT_MARKER) {
            Placeholder::NoReplacement(rest.to_string())
        } else if let Some(rest) = raw.strip_prefix(NEEDS_REPLACEMENT_MARKER) {
            Placeholder::NeedsReplacement(SourceRef::new(rest))
        } else {
            Placeholder::Concrete(TargetId::new(raw))
        }
    }

    pub fn to_wire(&self) -> String {
        match self {
            Placeholder::NeedsReplacement(source_ref) => {
                format!("{NEEDS_REPLACEMENT_MARKER}{source_ref}")
            }
            Placeholder::NoReplacement(value) => format!("{NO_REPLACEMENT_MARKER}{value}"),
            Placeholder::Concrete(id) => id.0.clone(),
        }
    }

    pub fn needs_resolution(&self) -> bool {
        !matches!(self, Placeholder::Concrete(_))
    }

    /// The concrete id. Reading an unresolved placeholder is an error.
    pub fn concrete(&self) -> Result<&TargetId, ResolveError> {
        match self {
            Placeholder::Concrete(id) => Ok(id),
            other => Err(ResolveError::Unresolved {
                value: other.to_wire(),
            }),
        }
    }

    /// Resolve against `id_map`.
    pub fn resolve(&self, id_map: &IdMap) -> Result<TargetId, ResolveError> {
        match self {
            Placeholder::Concrete(id) => Ok(id.clone()),
            Placeholder::NoReplacement(value) => {
                if has_marker(value) {
                    return Err(ResolveError::DoubleWrapped {
                        value: value.clone(),
                    });
                }
                Ok(TargetId::new(value.as_str()))
            }
            Placeholder::NeedsReplacement(source_ref) => {
                let id = id_map
                    .get(&ExternalKey::from(source_ref))
                    .ok_or_else(|| ResolveError::NoIdForRef {
                        source_ref: source_ref.clone(),
                    })?;
                if id.is_empty() {
                    return Err(ResolveError::EmptyId {
                        source_ref: source_ref.clone(),
                    });
                }
                Ok(id.clone())
            }
        }
    }
}

fn has_marker(value: &str) -> bool {
    value.starts_with(NEEDS_REPLACEMENT_MARKER) || value.starts_with(NO_REPLACEMENT_MARKER)
}

impl fmt::Display for Placeholder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_wire())
    }
}

impl From<Placeholder> for String {
    fn from(value: Placeholder) -> Self {
        value.to_wire()
    }
}

impl From<String> for Placeholder {
    fn from(value: String) -> Self {
        Placeholder::parse(&value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("couldn't find id for ref {source_ref:?}")]
    NoIdForRef { source_ref: SourceRef },
    #[error("id mapped for ref {source_ref:?} is empty")]
    EmptyId { source_ref: SourceRef },
    #[error("no-replacement value {value:?} still carries a placeholder marker")]
    DoubleWrapped { value: String },
    #[error("placeholder {value:?} read before resolution")]
    Unresolved { value: String },
}
