// This source code is licensed under both the Apache 2.0 and MIT License
// (found in the LICENSE-* files in the repository)

/// Represents errors that can occur in the storage engine.
#[derive(Debug)]
pub enum Error {
    /// A configuration field is out of range or inconsistent
    /// (e.g. `min_rows_per_file_block > max_rows_per_file_block`).
    ConfigInvalid(&'static str),

    /// The repository root (or its `data/` directory) is missing,
    /// unreadable, or unwritable.
    PathInaccessible(std::path::PathBuf),

    /// The cache arena's `max_cache_size` cap was exceeded.
    ArenaExhausted,

    /// An insert targeted a table that is unknown to the catalogue or
    /// whose schema is incompatible with the row.
    MetaReject(String),

    /// A submit message or an on-disk record failed a structural or
    /// delimiter check.
    FormatError(String),

    /// I/O error
    Io(std::io::Error),

    /// An operation was attempted in the wrong repository state, or a
    /// commit was triggered while one was already pending.
    StateViolation(&'static str),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConfigInvalid(field) => write!(f, "invalid config field: {field}"),
            Self::PathInaccessible(path) => write!(f, "path inaccessible: {}", path.display()),
            Self::ArenaExhausted => write!(f, "cache arena exhausted"),
            Self::MetaReject(msg) => write!(f, "meta rejected insert: {msg}"),
            Self::FormatError(msg) => write!(f, "format error: {msg}"),
            Self::Io(e) => write!(f, "io error: {e}"),
            Self::StateViolation(msg) => write!(f, "state violation: {msg}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

/// Engine result.
pub type Result<T> = std::result::Result<T, Error>;
