pub use anyhow::Result;

use std::error::Error as StdError;
use std::fmt::{self, Display, Formatter};

use serde::Serialize;

/// Structured error for everything the library can signal itself.
///
/// Backend failures (e.g. the SQLite driver) are not wrapped; they travel
/// through [anyhow] unchanged.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Error {
    pub reason: Reason,
    pub help: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Reason {
    /// `get` matched more than one record.
    MultipleObjectsReturned,
    /// `get` matched no record.
    ObjectDoesNotExist,
    /// A field, index or key was missing on a record at evaluation time.
    Access {
        path: String,
    },
    /// A call target was not invokable.
    NotCallable {
        path: String,
    },
    /// An operator was applied to operands it has no meaning for.
    TypeMismatch {
        op: String,
        lhs: String,
        rhs: String,
    },
    /// `mean` over an empty collection.
    EmptyAggregation {
        kind: String,
    },
    /// Division or modulo with a zero divisor.
    DivisionByZero,
    /// The backend cannot express this construct.
    Unsupported {
        what: String,
    },
}

impl Error {
    pub fn new(reason: Reason) -> Self {
        Error { reason, help: None }
    }

    pub fn access<S: Into<String>>(path: S) -> Self {
        Error::new(Reason::Access { path: path.into() })
    }

    pub fn not_callable<S: Into<String>>(path: S) -> Self {
        Error::new(Reason::NotCallable { path: path.into() })
    }

    pub fn type_mismatch<O, L, R>(op: O, lhs: L, rhs: R) -> Self
    where
        O: Display,
        L: Into<String>,
        R: Into<String>,
    {
        Error::new(Reason::TypeMismatch {
            op: op.to_string(),
            lhs: lhs.into(),
            rhs: rhs.into(),
        })
    }

    pub fn unsupported<S: Into<String>>(what: S) -> Self {
        Error::new(Reason::Unsupported { what: what.into() })
    }

    pub fn with_help<S: Into<String>>(mut self, help: S) -> Self {
        self.help = Some(help.into());
        self
    }
}

impl Reason {
    pub fn message(&self) -> String {
        match self {
            Reason::MultipleObjectsReturned => "get matched more than one object".to_string(),
            Reason::ObjectDoesNotExist => "get matched no objects".to_string(),
            Reason::Access { path } => format!("cannot read `{path}`"),
            Reason::NotCallable { path } => format!("`{path}` is not callable"),
            Reason::TypeMismatch { op, lhs, rhs } => {
                format!("unsupported operands for `{op}`: {lhs} and {rhs}")
            }
            Reason::EmptyAggregation { kind } => {
                format!("cannot compute {kind} of an empty collection")
            }
            Reason::DivisionByZero => "division by zero".to_string(),
            Reason::Unsupported { what } => format!("unsupported: {what}"),
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.reason.message())?;
        if let Some(help) = &self.help {
            write!(f, " ({help})")?;
        }
        Ok(())
    }
}

// Needed for anyhow
impl StdError for Error {}

/// Attach a hint to a `Result` without unpacking it at every call site.
pub trait WithErrorInfo {
    fn with_help<S: Into<String>>(self, help: S) -> Self;
}

impl<T> WithErrorInfo for Result<T, Error> {
    fn with_help<S: Into<String>>(self, help: S) -> Self {
        self.map_err(|e| e.with_help(help))
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn messages() {
        assert_eq!(
            Error::new(Reason::ObjectDoesNotExist).to_string(),
            "get matched no objects"
        );
        assert_eq!(
            Error::access("giftcards").with_help("records are reached by field name").to_string(),
            "cannot read `giftcards` (records are reached by field name)"
        );
        assert_eq!(
            Error::type_mismatch("+", "integer", "string").to_string(),
            "unsupported operands for `+`: integer and string"
        );
    }
}
