//! Transaction log for davstore.
//!
//! A davstore transaction mutates a plain filesystem. Some changes happen
//! eagerly (a temporary directory is created as soon as a collection is
//! requested) and some are deferred to commit (the rename that makes it
//! visible). Each change is recorded as a [`StagedAction`]: an optional
//! forward step run at commit and an optional undo run on abort.
//!
//! The [`OperationLog`] owns those actions and the open / committed /
//! aborted state machine:
//!
//! - `commit` runs forward steps in registration order. A step may queue
//!   follow-up steps, which run after everything already queued. If a step
//!   fails, every completed step is undone in reverse order and the log ends
//!   up aborted.
//! - `abort` runs the recorded undos in reverse order. Deferred forward
//!   steps never run.

pub mod action;
pub mod error;
pub mod log;

pub use action::{Followups, Forward, StagedAction, Undo};
pub use error::TxnError;
pub use log::{OperationLog, TxnState};
