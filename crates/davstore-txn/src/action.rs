//! Staged actions and the follow-up queue.

use std::fmt;
use std::io;

/// Compensation for a completed change. Runs at most once.
pub type Undo = Box<dyn FnOnce() -> io::Result<()> + Send>;

/// A deferred step run at commit.
///
/// It may queue follow-up steps and may return an undo that replaces the
/// action's eager one (the eager undo usually cleans up state the forward
/// step has just moved).
pub type Forward<E> = Box<dyn FnOnce(&mut Followups<E>) -> Result<Option<Undo>, E> + Send>;

/// One entry of the operation log.
pub struct StagedAction<E> {
    label: String,
    forward: Option<Forward<E>>,
    undo: Option<Undo>,
}

impl<E> StagedAction<E> {
    /// A deferred step with no eager undo.
    pub fn deferred<F>(label: impl Into<String>, forward: F) -> Self
    where
        F: FnOnce(&mut Followups<E>) -> Result<Option<Undo>, E> + Send + 'static,
    {
        Self {
            label: label.into(),
            forward: Some(Box::new(forward)),
            undo: None,
        }
    }

    /// Compensation for a change that already happened.
    pub fn completed<U>(label: impl Into<String>, undo: U) -> Self
    where
        U: FnOnce() -> io::Result<()> + Send + 'static,
    {
        Self {
            label: label.into(),
            forward: None,
            undo: Some(Box::new(undo)),
        }
    }

    /// Attach an eager undo to a deferred step.
    ///
    /// It runs on abort, or on rollback if this step itself fails. Once the
    /// forward step succeeds, the undo it returns takes its place.
    pub fn with_undo<U>(mut self, undo: U) -> Self
    where
        U: FnOnce() -> io::Result<()> + Send + 'static,
    {
        self.undo = Some(Box::new(undo));
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_deferred(&self) -> bool {
        self.forward.is_some()
    }

    pub(crate) fn into_parts(self) -> (String, Option<Forward<E>>, Option<Undo>) {
        (self.label, self.forward, self.undo)
    }
}

impl<E> fmt::Debug for StagedAction<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StagedAction")
            .field("label", &self.label)
            .field("deferred", &self.forward.is_some())
            .field("undo", &self.undo.is_some())
            .finish()
    }
}

/// Steps queued by a running forward step; they run after the current log.
pub struct Followups<E> {
    actions: Vec<StagedAction<E>>,
}

impl<E> Followups<E> {
    pub(crate) fn new() -> Self {
        Self {
            actions: Vec::new(),
        }
    }

    /// Queue a follow-up step.
    pub fn add_operation<F>(&mut self, label: impl Into<String>, forward: F)
    where
        F: FnOnce(&mut Followups<E>) -> Result<Option<Undo>, E> + Send + 'static,
    {
        self.actions.push(StagedAction::deferred(label, forward));
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub(crate) fn into_actions(self) -> Vec<StagedAction<E>> {
        self.actions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_classify_actions() {
        let deferred: StagedAction<io::Error> = StagedAction::deferred("rename", |_| Ok(None));
        assert!(deferred.is_deferred());
        assert_eq!(deferred.label(), "rename");

        let completed: StagedAction<io::Error> = StagedAction::completed("mkdir", || Ok(()));
        assert!(!completed.is_deferred());

        let both: StagedAction<io::Error> =
            StagedAction::deferred("finalize", |_| Ok(None)).with_undo(|| Ok(()));
        let (_, forward, undo) = both.into_parts();
        assert!(forward.is_some());
        assert!(undo.is_some());
    }

    #[test]
    fn followups_collect_in_order() {
        let mut followups: Followups<io::Error> = Followups::new();
        assert!(followups.is_empty());
        followups.add_operation("a", |_| Ok(None));
        followups.add_operation("b", |_| Ok(None));
        assert_eq!(followups.len(), 2);
        let labels: Vec<String> = followups
            .into_actions()
            .iter()
            .map(|a| a.label().to_string())
            .collect();
        assert_eq!(labels, vec!["a", "b"]);
    }
}
