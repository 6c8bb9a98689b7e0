//! External collaborators.
//!
//! The orchestrator calls these but implements none of their semantics:
//! version-control worktrees, issue tracking, and completion notification.
//! Tier collaborators (the semantic, synthesis, and execution services) are
//! reached through [`HttpCollaborator`].

#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]

pub mod http;
pub mod notify;
pub mod tracker;
pub mod worktree;

pub use http::HttpCollaborator;
pub use notify::{CompletionNotifier, LoggingNotifier, NotifyError};
pub use tracker::{IssueDraft, IssueTracker, MemoryIssueTracker, TrackedIssue, TrackerError};
pub use worktree::{GitWorktrees, MemoryWorktrees, WorktreeError, WorktreeManager};
