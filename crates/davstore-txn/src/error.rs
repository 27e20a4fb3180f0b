use std::error::Error as StdError;

use crate::log::TxnState;

/// Errors produced by the operation log.
///
/// `E` is the error type forward steps fail with; the log hands it back
/// untouched so callers keep their own taxonomy.
#[derive(Debug, thiserror::Error)]
pub enum TxnError<E>
where
    E: StdError + 'static,
{
    /// The log already committed or aborted and accepts no more work.
    #[error("transaction already {0}")]
    Finished(TxnState),

    /// A forward step failed during commit. Completed steps were rolled back.
    #[error("step `{label}` failed: {source}")]
    StepFailed {
        label: String,
        #[source]
        source: E,
    },
}

impl<E> TxnError<E>
where
    E: StdError + 'static,
{
    /// Unwrap the step error, if this is one.
    pub fn into_step_error(self) -> Option<E> {
        match self {
            Self::StepFailed { source, .. } => Some(source),
            Self::Finished(_) => None,
        }
    }
}
