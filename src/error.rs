//! Error taxonomy shared by every stage of the pipeline.
//!
//! Per-file failures (`ShapeMismatch`, `Parse`) are collected across worker
//! tasks; model-level failures (`Duplicate`, `AmbiguousSpecialization`,
//! `Emission`, `Containment`) stop the run at once. Context notes are
//! attached on the way up with `anyhow::Context`.

use std::path::PathBuf;
use thiserror::Error;

use crate::ast::Location;

#[derive(Error, Debug)]
pub enum Error {
    /// An AST node did not have the structure a registration idiom requires.
    #[error("`{idiom}` registration at {location}: {message}")]
    ShapeMismatch {
        idiom: &'static str,
        message: String,
        location: Location,
    },

    /// The compiler front end reported errors.
    #[error("{} failed to parse:\n{}", path.display(), diagnostics.join("\n"))]
    Parse {
        path: PathBuf,
        diagnostics: Vec<String>,
    },

    /// The same unique key was registered twice.
    #[error("duplicate {kind} `{key}`: registered at {first} and again at {second}")]
    Duplicate {
        kind: &'static str,
        key: String,
        first: Location,
        second: Location,
    },

    /// Several type-mapping rules apply and none is more specific.
    #[error("ambiguous type mapping for `{ty}`; equally specific candidates: {}", candidates.join(", "))]
    AmbiguousSpecialization { ty: String, candidates: Vec<String> },

    /// A reference could not be resolved when rendering.
    #[error("cannot emit {0}")]
    Emission(String),

    /// An entity is reachable from two containers.
    #[error("{kind} `{key}` is reachable as both `{existing}` and `{computed}`")]
    Containment {
        kind: &'static str,
        key: String,
        existing: String,
        computed: String,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub fn shape(idiom: &'static str, location: &Location, message: impl Into<String>) -> Self {
        Error::ShapeMismatch {
            idiom,
            message: message.into(),
            location: location.clone(),
        }
    }

    /// Whether the error belongs to a single file rather than the merged model.
    pub fn is_per_file(&self) -> bool {
        matches!(self, Error::ShapeMismatch { .. } | Error::Parse { .. })
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Every independent failure of one run.
#[derive(Debug)]
pub struct RunFailure {
    pub errors: Vec<anyhow::Error>,
}

impl RunFailure {
    pub fn single(error: anyhow::Error) -> Self {
        Self {
            errors: vec![error],
        }
    }
}

impl std::fmt::Display for RunFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.errors.len() {
            1 => write!(f, "{}", self.errors[0]),
            n => write!(f, "{} errors", n),
        }
    }
}

impl std::error::Error for RunFailure {}

impl From<anyhow::Error> for RunFailure {
    fn from(error: anyhow::Error) -> Self {
        RunFailure::single(error)
    }
}

impl From<Error> for RunFailure {
    fn from(error: Error) -> Self {
        RunFailure::single(error.into())
    }
}
