// Errors surfaced by an import run.

use thiserror::Error;

use crate::db::is_constraint_violation;
use crate::vrapi::UpstreamError;

/// Why an import run stopped. None of these are recovered from inside the
/// run; the stats of a failed run stay `IN_PROGRESS`.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("VR API unavailable: {0}")]
    UpstreamUnavailable(#[from] UpstreamError),

    #[error("tournament {code} conflicts with a stored record: {source:#}")]
    PersistenceConflict {
        code: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("storage error: {0:#}")]
    Storage(#[source] anyhow::Error),

    #[error("a tournament import is already running")]
    AlreadyRunning,
}

impl ImportError {
    /// Classify a storage failure that happened while writing `code`.
    pub(crate) fn storage(code: &str, err: anyhow::Error) -> Self {
        if is_constraint_violation(&err) {
            ImportError::PersistenceConflict {
                code: code.to_string(),
                source: err,
            }
        } else {
            ImportError::Storage(err)
        }
    }
}
