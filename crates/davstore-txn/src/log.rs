//! The ordered log of staged actions and its state machine.

use std::collections::VecDeque;
use std::error::Error as StdError;
use std::fmt;
use std::io;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::{debug, error, info};

use crate::action::{Followups, StagedAction, Undo};
use crate::error::TxnError;

/// Lifecycle of a transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TxnState {
    Open,
    Committed,
    Aborted,
}

impl fmt::Display for TxnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::Committed => write!(f, "committed"),
            Self::Aborted => write!(f, "aborted"),
        }
    }
}

struct LogInner<E> {
    state: TxnState,
    actions: Vec<StagedAction<E>>,
}

/// Ordered log of staged actions owned by one transaction.
///
/// The log is shared (behind an `Arc`) by every entity the transaction hands
/// out, so staging takes `&self`.
pub struct OperationLog<E> {
    label: String,
    inner: Mutex<LogInner<E>>,
}

impl<E> OperationLog<E>
where
    E: StdError + Send + 'static,
{
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            inner: Mutex::new(LogInner {
                state: TxnState::Open,
                actions: Vec::new(),
            }),
        }
    }

    /// Diagnostic label given at creation.
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn state(&self) -> TxnState {
        self.lock().state
    }

    pub fn is_open(&self) -> bool {
        self.state() == TxnState::Open
    }

    /// Fail with [`TxnError::Finished`] unless the log is still open.
    pub fn ensure_open(&self) -> Result<(), TxnError<E>> {
        match self.state() {
            TxnState::Open => Ok(()),
            state => Err(TxnError::Finished(state)),
        }
    }

    /// Number of staged actions not yet run.
    pub fn len(&self) -> usize {
        self.lock().actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Append a staged action.
    pub fn stage(&self, action: StagedAction<E>) -> Result<(), TxnError<E>> {
        let mut inner = self.lock();
        if inner.state != TxnState::Open {
            return Err(TxnError::Finished(inner.state));
        }
        debug!(txn = %self.label, step = action.label(), deferred = action.is_deferred(), "staged");
        inner.actions.push(action);
        Ok(())
    }

    /// Append a deferred step that runs at commit.
    pub fn add_operation<F>(&self, label: impl Into<String>, forward: F) -> Result<(), TxnError<E>>
    where
        F: FnOnce(&mut Followups<E>) -> Result<Option<Undo>, E> + Send + 'static,
    {
        self.stage(StagedAction::deferred(label, forward))
    }

    /// Record the compensation for a change that already happened.
    pub fn record_undo<U>(&self, label: impl Into<String>, undo: U) -> Result<(), TxnError<E>>
    where
        U: FnOnce() -> io::Result<()> + Send + 'static,
    {
        self.stage(StagedAction::completed(label, undo))
    }

    /// Run every deferred step in order, then the follow-ups they queued.
    ///
    /// Returns the number of forward steps run. On failure, completed steps
    /// are undone in reverse order, the log becomes aborted and the step's
    /// error is returned.
    pub fn commit(&self) -> Result<usize, TxnError<E>> {
        let actions = self.finish(TxnState::Committed)?;
        let mut queue: VecDeque<StagedAction<E>> = actions.into();
        let mut completed: Vec<(String, Option<Undo>)> = Vec::with_capacity(queue.len());
        let mut ran = 0usize;

        while let Some(action) = queue.pop_front() {
            let (label, forward, undo) = action.into_parts();
            let Some(forward) = forward else {
                completed.push((label, undo));
                continue;
            };

            let mut followups = Followups::new();
            match forward(&mut followups) {
                Ok(replacement) => {
                    debug!(txn = %self.label, step = %label, "committed step");
                    completed.push((label, replacement));
                    queue.extend(followups.into_actions());
                    ran += 1;
                }
                Err(source) => {
                    error!(txn = %self.label, step = %label, error = %source, "commit step failed; rolling back");
                    completed.push((label.clone(), undo));
                    self.lock().state = TxnState::Aborted;
                    run_undos(&self.label, completed);
                    return Err(TxnError::StepFailed { label, source });
                }
            }
        }

        info!(txn = %self.label, steps = ran, "transaction committed");
        Ok(ran)
    }

    /// Undo every recorded change in reverse order. Deferred steps are
    /// discarded without running.
    pub fn abort(&self) -> Result<(), TxnError<E>> {
        let actions = self.finish(TxnState::Aborted)?;
        let undos = actions
            .into_iter()
            .map(|action| {
                let (label, _, undo) = action.into_parts();
                (label, undo)
            })
            .collect();
        run_undos(&self.label, undos);
        info!(txn = %self.label, "transaction aborted");
        Ok(())
    }

    /// Move to a terminal state and take the staged actions.
    fn finish(&self, state: TxnState) -> Result<Vec<StagedAction<E>>, TxnError<E>> {
        let mut inner = self.lock();
        if inner.state != TxnState::Open {
            return Err(TxnError::Finished(inner.state));
        }
        inner.state = state;
        Ok(std::mem::take(&mut inner.actions))
    }

    fn lock(&self) -> MutexGuard<'_, LogInner<E>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<E> fmt::Debug for OperationLog<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationLog")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

/// Best-effort rollback: failures are logged and the remaining undos still run.
fn run_undos(txn: &str, completed: Vec<(String, Option<Undo>)>) {
    for (label, undo) in completed.into_iter().rev() {
        let Some(undo) = undo else { continue };
        match undo() {
            Ok(()) => debug!(txn, step = %label, "undone"),
            Err(e) => error!(txn, step = %label, error = %e, "undo failed"),
        }
    }
}
