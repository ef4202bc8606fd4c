//! Hierarchical project identifiers.
//!
//! A [`ProjectPath`] names one node in the orchestrator's project tree, in the
//! familiar `:parent:child` notation with `:` as the root project. The
//! invalidation machinery only ever compares, hashes, and orders paths; the
//! structural helpers exist for the orchestrator side that produces them.

use std::fmt;
use std::sync::Arc;

use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};

/// Separator between path segments, also the spelling of the root path.
const SEPARATOR: char = ':';

/// An immutable identifier of a project in the build's project tree.
///
/// Cloning is a reference-count bump, so paths can be stored in every ledger
/// entry and graph node without copying the underlying text.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProjectPath(Arc<str>);

/// Errors produced when parsing a textual project path.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathParseError {
    /// The input was empty.
    #[error("project path is empty")]
    Empty,

    /// The input did not start with `:`.
    #[error("project path '{0}' must start with ':'")]
    NotAbsolute(String),

    /// The input contained an empty segment such as `::` or a trailing `:`.
    #[error("project path '{0}' contains an empty segment")]
    EmptySegment(String),

    /// A child name was empty or contained the `:` separator.
    #[error("'{0}' is not a valid project name")]
    InvalidName(String),
}

impl ProjectPath {
    /// Returns the root project path, `:`.
    pub fn root() -> Self {
        Self(Arc::from(":"))
    }

    /// Parses a path in `:a:b` notation.
    pub fn parse(text: &str) -> Result<Self, PathParseError> {
        if text.is_empty() {
            return Err(PathParseError::Empty);
        }
        if !text.starts_with(SEPARATOR) {
            return Err(PathParseError::NotAbsolute(text.to_string()));
        }
        if text.len() == 1 {
            return Ok(Self::root());
        }
        if text[1..].split(SEPARATOR).any(str::is_empty) {
            return Err(PathParseError::EmptySegment(text.to_string()));
        }
        Ok(Self(Arc::from(text)))
    }

    /// Returns `true` if this is the root project.
    pub fn is_root(&self) -> bool {
        &*self.0 == ":"
    }

    /// Returns the path of a direct child project named `name`.
    ///
    /// Returns an error if `name` is empty or contains the separator.
    pub fn child(&self, name: &str) -> Result<Self, PathParseError> {
        if name.is_empty() || name.contains(SEPARATOR) {
            return Err(PathParseError::InvalidName(name.to_string()));
        }
        let joined = if self.is_root() {
            format!(":{name}")
        } else {
            format!("{}:{name}", self.0)
        };
        Ok(Self(Arc::from(joined)))
    }

    /// Returns the parent project path, or `None` for the root.
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }
        match self.0.rfind(SEPARATOR) {
            Some(0) => Some(Self::root()),
            Some(idx) => Some(Self(Arc::from(&self.0[..idx]))),
            None => None,
        }
    }

    /// Returns the last segment of the path, or `None` for the root.
    pub fn name(&self) -> Option<&str> {
        if self.is_root() {
            return None;
        }
        self.0.rsplit(SEPARATOR).next()
    }

    /// Returns the canonical textual form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProjectPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for ProjectPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ProjectPath({})", self.0)
    }
}

impl std::str::FromStr for ProjectPath {
    type Err = PathParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for ProjectPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for ProjectPath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct PathVisitor;

        impl Visitor<'_> for PathVisitor {
            type Value = ProjectPath;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a project path like \":app:core\"")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<ProjectPath, E> {
                ProjectPath::parse(v).map_err(E::custom)
            }
        }

        deserializer.deserialize_str(PathVisitor)
    }
}
