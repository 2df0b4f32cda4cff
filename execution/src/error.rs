use lotto_types::{ErrorKind, LotteryError};

use crate::state::CommitError;

/// Failure of a lifecycle or payment operation.
///
/// [`Error::Rejected`] carries the business outcome the caller must act on. The other
/// variants mean a collaborator failed and the operation may be retried.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Rejected(#[from] LotteryError),
    #[error("state: {0:#}")]
    State(#[source] anyhow::Error),
    #[error("ledger: {0:#}")]
    Ledger(#[source] anyhow::Error),
}

impl Error {
    pub fn rejection(&self) -> Option<&LotteryError> {
        match self {
            Error::Rejected(err) => Some(err),
            Error::State(_) | Error::Ledger(_) => None,
        }
    }

    /// Kind of the rejection, if this is one.
    pub fn kind(&self) -> Option<ErrorKind> {
        self.rejection().map(LotteryError::kind)
    }
}

impl From<CommitError> for Error {
    fn from(err: CommitError) -> Self {
        match err {
            CommitError::Conflict { key } => Error::Rejected(LotteryError::ConcurrentModification {
                entity: key.to_string(),
            }),
            CommitError::State(err) => Error::State(err),
        }
    }
}
