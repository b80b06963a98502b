use miette::Diagnostic;
use thiserror::Error;

use crate::dataset::Mismatch;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, Error, Diagnostic)]
pub enum Error {
    #[error("Path not found: {path}")]
    #[diagnostic(code(ens_tbx::not_found))]
    NotFound { path: String },

    #[error("File system error at {path}: {source}")]
    #[diagnostic(code(ens_tbx::fs))]
    Fs {
        path: String,
        #[source]
        source: BoxError,
    },

    #[error("Failed to load unit {unit}: {source}")]
    #[diagnostic(code(ens_tbx::unit_load))]
    UnitLoad {
        unit: String,
        #[source]
        source: BoxError,
    },

    #[error("Cannot combine {second} with {first}: {mismatch}")]
    #[diagnostic(
        code(ens_tbx::assembly),
        help("Every unit must provide the same variables, dtypes and non-member dimension sizes")
    )]
    Assembly {
        first: String,
        second: String,
        #[source]
        mismatch: Mismatch,
    },

    #[error("No ensemble units found under {root}")]
    #[diagnostic(code(ens_tbx::empty_ensemble))]
    EmptyEnsemble { root: String },

    #[error("Year {year} has members {found:?}, expected {expected:?}")]
    #[diagnostic(
        code(ens_tbx::non_uniform_members),
        help("Use the per-year member set to accept differing members")
    )]
    NonUniformMembers {
        year: String,
        expected: Vec<String>,
        found: Vec<String>,
    },

    #[error("Member identifier {id} is used more than once")]
    #[diagnostic(code(ens_tbx::duplicate_member))]
    DuplicateMember { id: String },
}

impl Error {
    pub(crate) fn fs(path: String, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Fs {
            path,
            source: Box::new(source),
        }
    }

    pub(crate) fn unit_load(
        unit: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::UnitLoad {
            unit: unit.into(),
            source: Box::new(source),
        }
    }

    /// The unit or path the error is about.
    pub fn subject(&self) -> &str {
        match self {
            Error::NotFound { path } | Error::Fs { path, .. } => path,
            Error::UnitLoad { unit, .. } => unit,
            Error::Assembly { second, .. } => second,
            Error::EmptyEnsemble { root } => root,
            Error::NonUniformMembers { year, .. } => year,
            Error::DuplicateMember { id } => id,
        }
    }
}
