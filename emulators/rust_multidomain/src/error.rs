use crate::domain::Domain;
use crate::solver::SolverError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("no {domain} data available for {context}")]
    MissingDomainData { domain: Domain, context: String },
    #[error("solver unavailable: {0}")]
    SolverUnavailable(String),
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
    #[error("unknown register {0}")]
    UnknownRegister(String),
}

impl Error {
    pub fn missing(domain: Domain, context: impl Into<String>) -> Self {
        Error::MissingDomainData {
            domain,
            context: context.into(),
        }
    }

    pub fn invariant(message: impl Into<String>) -> Self {
        Error::InvariantViolation(message.into())
    }
}

impl From<SolverError> for Error {
    fn from(err: SolverError) -> Self {
        Error::SolverUnavailable(err.to_string())
    }
}
