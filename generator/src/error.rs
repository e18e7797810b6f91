// error.rs - Unified error model
//
// Every fallible operation in the generator returns `phillip::Result`. Each
// variant carries a stable diagnostic code so that tooling can match on the
// failure kind without parsing messages.
//
// Failure modes: none (types only).
// Side effects: none.

use std::fmt;
use std::path::PathBuf;

use crate::typemap::Origin;

/// A stable diagnostic code (e.g. `E0101`).
///
/// Once assigned, a code must never be reassigned to a different meaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DiagCode(pub &'static str);

impl fmt::Display for DiagCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

pub mod codes {
    use super::DiagCode;

    // ── Type unification (E01xx) ──
    pub const E0101: DiagCode = DiagCode("E0101"); // unknown scalar type
    pub const E0102: DiagCode = DiagCode("E0102"); // naming conflict
    pub const E0103: DiagCode = DiagCode("E0103"); // malformed pointer spelling
    pub const E0104: DiagCode = DiagCode("E0104"); // duplicate field
    pub const E0105: DiagCode = DiagCode("E0105"); // incomplete record
    pub const E0106: DiagCode = DiagCode("E0106"); // recursive type without a name
    pub const E0107: DiagCode = DiagCode("E0107"); // record contains itself by value

    // ── Build and load (E02xx) ──
    pub const E0201: DiagCode = DiagCode("E0201"); // build failure
    pub const E0202: DiagCode = DiagCode("E0202"); // unresolved symbol
    pub const E0203: DiagCode = DiagCode("E0203"); // size oracle failure
    pub const E0204: DiagCode = DiagCode("E0204"); // dynamic loader failure
    pub const E0205: DiagCode = DiagCode("E0205"); // io
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unknown {origin} scalar type '{name}'")]
    UnknownScalarType { origin: Origin, name: String },

    #[error("cannot name {descriptor} '{name}': {reason}")]
    NamingConflict {
        descriptor: String,
        name: String,
        reason: String,
    },

    #[error("malformed pointer spelling '{spelling}': {message}")]
    MalformedPointerSpelling { spelling: String, message: String },

    #[error("duplicate field '{field}' in {owner}")]
    DuplicateField { owner: String, field: String },

    #[error("record '{name}' is used before its fields are defined")]
    IncompleteRecord { name: String },

    #[error("'{name}' refers to itself and must be renamed before use")]
    RecursiveType { name: String },

    #[error("'{name}' contains itself by value and has no finite size")]
    SelfContainingRecord { name: String },

    #[error("build of '{module}' failed:\n{diagnostics}")]
    BuildFailure { module: String, diagnostics: String },

    #[error("symbol '{symbol}' is not exported by {}", .unit.display())]
    UnresolvedSymbol { symbol: String, unit: PathBuf },

    #[error("size oracle failed: {message}")]
    OracleFailure { message: String },

    #[error("cannot load {}: {source}", .path.display())]
    Load {
        path: PathBuf,
        #[source]
        source: libloading::Error,
    },

    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    pub fn code(&self) -> DiagCode {
        match self {
            Error::UnknownScalarType { .. } => codes::E0101,
            Error::NamingConflict { .. } => codes::E0102,
            Error::MalformedPointerSpelling { .. } => codes::E0103,
            Error::DuplicateField { .. } => codes::E0104,
            Error::IncompleteRecord { .. } => codes::E0105,
            Error::RecursiveType { .. } => codes::E0106,
            Error::SelfContainingRecord { .. } => codes::E0107,
            Error::BuildFailure { .. } => codes::E0201,
            Error::UnresolvedSymbol { .. } => codes::E0202,
            Error::OracleFailure { .. } => codes::E0203,
            Error::Load { .. } => codes::E0204,
            Error::Io { .. } => codes::E0205,
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
