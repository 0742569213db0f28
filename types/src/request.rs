//! Request vocabulary shared by the proxy and its callers.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The closed set of operations a worker answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestKind {
    Completions,
    Definitions,
    Hover,
    Usages,
    Symbols,
    Arguments,
}

impl RequestKind {
    pub const ALL: [Self; 6] = [
        Self::Completions,
        Self::Definitions,
        Self::Hover,
        Self::Usages,
        Self::Symbols,
        Self::Arguments,
    ];

    /// Operation name on the wire (`lookup` field).
    #[must_use]
    pub const fn lookup(self) -> &'static str {
        match self {
            Self::Completions => "completions",
            Self::Definitions => "definitions",
            Self::Hover => "tooltip",
            Self::Usages => "usages",
            Self::Symbols => "names",
            Self::Arguments => "arguments",
        }
    }

    /// Symbol listing works on a whole file; everything else needs a cursor.
    #[must_use]
    pub const fn requires_position(self) -> bool {
        !matches!(self, Self::Symbols)
    }

    /// Parse a user-facing name. Accepts the wire lookup names as aliases.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "completion" | "completions" => Some(Self::Completions),
            "definition" | "definitions" | "goto" => Some(Self::Definitions),
            "hover" | "tooltip" => Some(Self::Hover),
            "usages" | "references" => Some(Self::Usages),
            "symbols" | "names" => Some(Self::Symbols),
            "arguments" | "signature" => Some(Self::Arguments),
            _ => None,
        }
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Completions => "completions",
            Self::Definitions => "definitions",
            Self::Hover => "hover",
            Self::Usages => "usages",
            Self::Symbols => "symbols",
            Self::Arguments => "arguments",
        }
    }
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// 0-indexed cursor position, passed through to the worker as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    line: u32,
    column: u32,
}

impl Position {
    #[must_use]
    pub const fn new(line: u32, column: u32) -> Self {
        Self { line, column }
    }

    #[must_use]
    pub const fn line(self) -> u32 {
        self.line
    }

    #[must_use]
    pub const fn column(self) -> u32 {
        self.column
    }
}

/// Where the worker should read the document text from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceText {
    /// Unsaved buffer contents, sent with the request.
    Inline(String),
    /// The worker reads `path` itself.
    OnDisk,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestError {
    #[error("{kind} requests require a cursor position")]
    MissingPosition { kind: RequestKind },
}

/// A caller's request. Immutable once built.
///
/// Invariant: `position` is present for every kind that needs one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    kind: RequestKind,
    path: PathBuf,
    source: SourceText,
    position: Option<Position>,
}

impl Request {
    pub fn new(
        kind: RequestKind,
        path: impl Into<PathBuf>,
        source: SourceText,
        position: Option<Position>,
    ) -> Result<Self, RequestError> {
        if kind.requires_position() && position.is_none() {
            return Err(RequestError::MissingPosition { kind });
        }
        // Symbol listing never carries a position on the wire.
        let position = if kind.requires_position() {
            position
        } else {
            None
        };
        Ok(Self {
            kind,
            path: path.into(),
            source,
            position,
        })
    }

    /// Positional request; infallible for every kind.
    #[must_use]
    pub fn at(
        kind: RequestKind,
        path: impl Into<PathBuf>,
        source: SourceText,
        position: Position,
    ) -> Self {
        let path = path.into();
        let position = kind.requires_position().then_some(position);
        Self {
            kind,
            path,
            source,
            position,
        }
    }

    #[must_use]
    pub fn symbols(path: impl Into<PathBuf>, source: SourceText) -> Self {
        Self {
            kind: RequestKind::Symbols,
            path: path.into(),
            source,
            position: None,
        }
    }

    #[must_use]
    pub fn kind(&self) -> RequestKind {
        self.kind
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn source(&self) -> &SourceText {
        &self.source
    }

    #[must_use]
    pub fn position(&self) -> Option<Position> {
        self.position
    }
}
