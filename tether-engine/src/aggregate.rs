//! Fold per-item statuses into one category outcome.

use crate::state::Progress;
use crate::status::ItemStatus;
use crate::workflow::{Outcome, Reason};

/// Result of removing one remote item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeletionResult {
    Deleted,
    /// Removal has started but the item is still present.
    InProgress,
    Failed(String),
    /// The remote API can never remove the item as things stand.
    Unsupported(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Deletion {
    pub identity: String,
    pub result: DeletionResult,
}

impl Deletion {
    pub fn new(identity: impl Into<String>, result: DeletionResult) -> Self {
        Self {
            identity: identity.into(),
            result,
        }
    }
}

/// Aggregate one category.
///
/// The outcome is `NotConfigured` when nothing is declared and nothing is
/// left to clean up, `Ready` when every declared item succeeded and every
/// deletion finished, and otherwise pending or failed. Every error message,
/// from items and deletions alike, is carried in the outcome message.
pub fn aggregate<S: ItemStatus>(
    statuses: &[S],
    desired_count: usize,
    deletions: &[Deletion],
    reason: Reason,
) -> Outcome {
    let mut errors = Vec::new();
    let mut unsupported = Vec::new();
    let mut succeeded = 0;
    let mut pending = 0;

    for status in statuses {
        match status.progress() {
            Progress::Succeeded => succeeded += 1,
            Progress::Pending => pending += 1,
            Progress::Failed => errors.push(format!(
                "{}: {}",
                status.identity(),
                status.error_message().unwrap_or("failed")
            )),
        }
    }

    let mut deleting = 0;
    for deletion in deletions {
        match &deletion.result {
            DeletionResult::Deleted => {}
            DeletionResult::InProgress => deleting += 1,
            DeletionResult::Failed(msg) => {
                errors.push(format!("failed to delete {}: {}", deletion.identity, msg))
            }
            DeletionResult::Unsupported(msg) => {
                unsupported.push(format!("cannot delete {}: {}", deletion.identity, msg))
            }
        }
    }

    if !errors.is_empty() {
        errors.extend(unsupported);
        return Outcome::failed(reason, errors.join("; "));
    }
    if !unsupported.is_empty() {
        return Outcome::terminal(Reason::UnsupportedOperation, unsupported.join("; "));
    }
    if desired_count == 0 && deleting == 0 && pending == 0 {
        return Outcome::NotConfigured;
    }
    if succeeded == desired_count && pending == 0 && deleting == 0 {
        return Outcome::Ready;
    }

    let mut message = format!("{succeeded} of {desired_count} ready");
    if deleting > 0 {
        message.push_str(&format!(", {deleting} being removed"));
    }
    Outcome::in_progress(reason, message)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Item(&'static str, Progress, Option<&'static str>);

    impl ItemStatus for Item {
        fn identity(&self) -> String {
            self.0.to_string()
        }

        fn progress(&self) -> Progress {
            self.1
        }

        fn error_message(&self) -> Option<&str> {
            self.2
        }
    }

    const R: Reason = Reason::CustomRolesNotReady;

    #[test]
    fn test_nothing_declared_is_unset() {
        let statuses: [Item; 0] = [];
        assert_eq!(aggregate(&statuses, 0, &[], R), Outcome::NotConfigured);
    }

    #[test]
    fn test_all_succeeded_is_ready() {
        let statuses = [
            Item("a", Progress::Succeeded, None),
            Item("b", Progress::Succeeded, None),
        ];
        assert_eq!(
            aggregate(&statuses, 2, &[Deletion::new("c", DeletionResult::Deleted)], R),
            Outcome::Ready
        );
    }

    #[test]
    fn test_partial_failure_reports_every_error() {
        let statuses = [
            Item("a", Progress::Failed, Some("boom")),
            Item("b", Progress::Succeeded, None),
            Item("c", Progress::Failed, Some("bang")),
        ];
        let outcome = aggregate(&statuses, 3, &[], R);
        assert_eq!(outcome, Outcome::failed(R, "a: boom; c: bang"));
    }

    #[test]
    fn test_pending_is_in_progress() {
        let statuses = [
            Item("a", Progress::Pending, None),
            Item("b", Progress::Succeeded, None),
        ];
        assert_eq!(aggregate(&statuses, 2, &[], R), Outcome::in_progress(R, "1 of 2 ready"));
    }

    #[test]
    fn test_remnant_deletion_keeps_condition_false() {
        let statuses: [Item; 0] = [];
        let deletions = [Deletion::new("x", DeletionResult::InProgress)];
        assert_eq!(
            aggregate(&statuses, 0, &deletions, R),
            Outcome::in_progress(R, "0 of 0 ready, 1 being removed")
        );
        let deletions = [Deletion::new("x", DeletionResult::Failed("denied".into()))];
        assert_eq!(
            aggregate(&statuses, 0, &deletions, R),
            Outcome::failed(R, "failed to delete x: denied")
        );
    }

    #[test]
    fn test_unsupported_deletion_is_terminal() {
        let statuses = [Item("a", Progress::Succeeded, None)];
        let deletions = [Deletion::new("role r1", DeletionResult::Unsupported("in use".into()))];
        assert_eq!(
            aggregate(&statuses, 1, &deletions, R),
            Outcome::terminal(Reason::UnsupportedOperation, "cannot delete role r1: in use")
        );
    }

    #[test]
    fn test_retryable_failure_outranks_unsupported() {
        let statuses = [Item("a", Progress::Failed, Some("timeout"))];
        let deletions = [Deletion::new("r1", DeletionResult::Unsupported("in use".into()))];
        assert_eq!(
            aggregate(&statuses, 1, &deletions, R),
            Outcome::failed(R, "a: timeout; cannot delete r1: in use")
        );
    }
}
