use itertools::Itertools;
use std::fmt;
use std::io;

/// Library-wide error type.
#[derive(Debug)]
#[non_exhaustive]
pub enum Error {
    /// A requested index set is not the concatenation of any subset of the known fields.
    FieldDecompositionNotFound {
        /// Global number of target indices left over after no further field matched.
        unmatched: usize,
        /// The number of candidate fields that were considered.
        candidates: usize,
        /// The fields that did match a prefix of the target before the search got stuck.
        matched: Vec<usize>,
    },
    /// An argument was outside the set of values accepted by an operation.
    InvalidArgument(String),
    /// A failure reported by the form compiler or one of its compiled kernels.
    Evaluation(eyre::Report),
    /// Failure to write diagnostic output.
    Io(io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FieldDecompositionNotFound {
                unmatched,
                candidates,
                matched,
            } => {
                write!(
                    f,
                    "Unable to find index set in {} candidate fields \
                     ({} indices left unmatched after fields [{}])",
                    candidates,
                    unmatched,
                    matched.iter().format(", ")
                )
            }
            Self::InvalidArgument(msg) => write!(f, "Invalid argument: {}", msg),
            Self::Evaluation(err) => write!(f, "Form evaluation failed: {}", err),
            Self::Io(err) => write!(f, "I/O error: {}", err),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Evaluation(err) => Some(&**err),
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<eyre::Report> for Error {
    fn from(err: eyre::Report) -> Self {
        Self::Evaluation(err)
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
